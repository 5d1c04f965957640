//! Header handling for the dispatch step:
//! hop-by-hop stripping, forwarding-header injection, and staged
//! `header-rewrite` application.

use std::net::IpAddr;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

/// Headers that must never be forwarded to the upstream.
const HOP_BY_HOP: &[&str] = &[
	"connection",
	"keep-alive",
	"proxy-authenticate",
	"proxy-authorization",
	"te",
	"trailer",
	"transfer-encoding",
	"upgrade",
];

/// Staged `header-rewrite {set, remove}` edits, applied to the outbound
/// request just before dispatch.
#[derive(Clone, Debug, Default)]
pub struct HeaderRewrite {
	pub set: Vec<(String, String)>,
	pub remove: Vec<String>,
}

impl HeaderRewrite {
	pub fn apply(&self, headers: &mut HeaderMap) {
		for name in &self.remove {
			if let Ok(name) = name.parse::<HeaderName>() {
				headers.remove(name);
			}
		}
		for (name, value) in &self.set {
			if let (Ok(name), Ok(value)) = (name.parse::<HeaderName>(), HeaderValue::from_str(value)) {
				headers.insert(name, value);
			}
		}
	}
}

/// Strips hop-by-hop headers from `headers` in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
	for name in HOP_BY_HOP {
		headers.remove(*name);
	}
}

/// Builds the outbound request headers: a copy of the inbound headers minus
/// hop-by-hop, with `X-Forwarded-*` and `X-Request-Id` added/overwritten.
pub fn build_forwarded_headers(
	inbound: &HeaderMap,
	client_addr: Option<IpAddr>,
	scheme: &str,
	original_host: Option<&str>,
	request_id: &str,
) -> HeaderMap {
	let mut headers = inbound.clone();
	strip_hop_by_hop(&mut headers);

	if let Some(addr) = client_addr {
		let forwarded_for = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
			Some(existing) => format!("{existing}, {addr}"),
			None => addr.to_string(),
		};
		if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
			headers.insert("x-forwarded-for", value);
		}
	}
	if let Ok(value) = HeaderValue::from_str(scheme) {
		headers.insert("x-forwarded-proto", value);
	}
	if let Some(host) = original_host {
		if let Ok(value) = HeaderValue::from_str(host) {
			headers.insert("x-forwarded-host", value);
		}
	}
	if let Ok(value) = HeaderValue::from_str(request_id) {
		headers.insert("x-request-id", value);
	}

	headers
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strips_hop_by_hop_headers() {
		let mut headers = HeaderMap::new();
		headers.insert("connection", "keep-alive".parse().unwrap());
		headers.insert("content-type", "application/json".parse().unwrap());
		strip_hop_by_hop(&mut headers);
		assert!(!headers.contains_key("connection"));
		assert!(headers.contains_key("content-type"));
	}

	#[test]
	fn build_forwarded_headers_sets_expected_fields() {
		let mut inbound = HeaderMap::new();
		inbound.insert("host", "example.com".parse().unwrap());
		inbound.insert("connection", "close".parse().unwrap());

		let addr: IpAddr = "203.0.113.9".parse().unwrap();
		let headers = build_forwarded_headers(&inbound, Some(addr), "https", Some("example.com"), "req-1");

		assert!(!headers.contains_key("connection"));
		assert_eq!(headers.get("x-forwarded-for").unwrap(), "203.0.113.9");
		assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");
		assert_eq!(headers.get("x-forwarded-host").unwrap(), "example.com");
		assert_eq!(headers.get("x-request-id").unwrap(), "req-1");
	}

	#[test]
	fn header_rewrite_set_then_remove() {
		let mut headers = HeaderMap::new();
		headers.insert("x-old", "v".parse().unwrap());
		let rewrite = HeaderRewrite {
			set: vec![("x-new".to_string(), "42".to_string())],
			remove: vec!["x-old".to_string()],
		};
		rewrite.apply(&mut headers);
		assert!(!headers.contains_key("x-old"));
		assert_eq!(headers.get("x-new").unwrap(), "42");
	}
}
