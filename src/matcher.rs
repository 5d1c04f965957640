//! Matcher Engine: per-route header/query/cookie
//! predicates, ANDed together during route lookup.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::route::{MatcherConfig, MatcherOp, MatcherTarget};

/// Process-wide compiled-regex cache keyed by pattern text. Route patterns
/// are already validated (and thus known-compilable) at ingest time
/// (`Route::validate`); this avoids recompiling the same pattern on every
/// request that walks a regex matcher during route lookup.
static REGEX_CACHE: Lazy<RwLock<HashMap<String, Regex>>> = Lazy::new(|| RwLock::new(HashMap::new()));

fn cached_regex(pattern: &str) -> Option<Regex> {
	if let Some(re) = REGEX_CACHE.read().unwrap().get(pattern) {
		return Some(re.clone());
	}
	let re = Regex::new(pattern).ok()?;
	REGEX_CACHE.write().unwrap().insert(pattern.to_string(), re.clone());
	Some(re)
}

/// The parts of an inbound request the matcher engine reasons about.
/// Built once per request by the proxy engine and reused across the
/// candidate routes the index walks during lookup.
pub struct MatchInput<'a> {
	pub headers: &'a http::HeaderMap,
	pub query: &'a HashMap<String, String>,
	pub cookies: &'a HashMap<String, String>,
}

/// Returns true iff every matcher in `matchers` holds against `input`. An
/// empty list is trivially true.
pub fn matches(matchers: &[MatcherConfig], input: &MatchInput<'_>) -> bool {
	matchers.iter().all(|m| matches_one(m, input))
}

fn matches_one(m: &MatcherConfig, input: &MatchInput<'_>) -> bool {
	let value = lookup(m, input);
	match m.op {
		MatcherOp::Exists => value.is_some(),
		MatcherOp::Equals => value.as_deref() == m.value.as_deref(),
		MatcherOp::Contains => match (value, &m.value) {
			(Some(v), Some(needle)) => v.contains(needle.as_str()),
			_ => false,
		},
		MatcherOp::Regex => match (value, &m.value) {
			(Some(v), Some(pattern)) => anchored_match(pattern, &v),
			_ => false,
		},
	}
}

fn lookup(m: &MatcherConfig, input: &MatchInput<'_>) -> Option<String> {
	match m.name {
		MatcherTarget::Header => input
			.headers
			.get(&m.key)
			.and_then(|v| v.to_str().ok())
			.map(|s| s.to_string()),
		MatcherTarget::Query => input.query.get(&m.key).cloned(),
		MatcherTarget::Cookie => input.cookies.get(&m.key).cloned(),
	}
}

/// Anchored match semantics: the pattern must match starting
/// at offset 0, but need not consume the whole value.
fn anchored_match(pattern: &str, value: &str) -> bool {
	// Routes are validated at ingest (Route::validate), so compilation here
	// should never fail; treat a failure as "does not match" defensively.
	let Some(re) = cached_regex(pattern) else { return false };
	re.find(value).map(|m| m.start() == 0).unwrap_or(false)
}

/// Parses a `Cookie` header into a key→value map. Cookie pairs are
/// `;`-separated; malformed pairs (no `=`) are skipped.
pub fn parse_cookies(headers: &http::HeaderMap) -> HashMap<String, String> {
	let mut out = HashMap::new();
	for raw in headers.get_all(http::header::COOKIE) {
		let Ok(raw) = raw.to_str() else { continue };
		for pair in raw.split(';') {
			let pair = pair.trim();
			if let Some((k, v)) = pair.split_once('=') {
				out.insert(k.trim().to_string(), v.trim().to_string());
			}
		}
	}
	out
}

/// Parses a request's raw query string into a key→value map. Repeated keys:
/// last one wins, matching the ambient framework's `Query<HashMap<_,_>>`.
pub fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
	raw.map(|q| {
		url::form_urlencoded::parse(q.as_bytes())
			.into_owned()
			.collect::<HashMap<String, String>>()
	})
	.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::route::{MatcherConfig, MatcherOp, MatcherTarget};

	fn cfg(name: MatcherTarget, key: &str, op: MatcherOp, value: Option<&str>) -> MatcherConfig {
		MatcherConfig { name, key: key.to_string(), op, value: value.map(str::to_string) }
	}

	#[test]
	fn empty_matchers_trivially_match() {
		let headers = http::HeaderMap::new();
		let query = HashMap::new();
		let cookies = HashMap::new();
		let input = MatchInput { headers: &headers, query: &query, cookies: &cookies };
		assert!(matches(&[], &input));
	}

	#[test]
	fn header_equals_and_query_exists_and_together() {
		let mut headers = http::HeaderMap::new();
		headers.insert("x-env", "prod".parse().unwrap());
		let mut query = HashMap::new();
		query.insert("v".to_string(), "1".to_string());
		let cookies = HashMap::new();
		let input = MatchInput { headers: &headers, query: &query, cookies: &cookies };

		let matchers = vec![
			cfg(MatcherTarget::Header, "x-env", MatcherOp::Equals, Some("prod")),
			cfg(MatcherTarget::Query, "v", MatcherOp::Exists, None),
		];
		assert!(matches(&matchers, &input));
	}

	#[test]
	fn missing_query_param_fails_the_and() {
		let headers = http::HeaderMap::new();
		let query = HashMap::new();
		let cookies = HashMap::new();
		let input = MatchInput { headers: &headers, query: &query, cookies: &cookies };

		let matchers = vec![cfg(MatcherTarget::Query, "v", MatcherOp::Exists, None)];
		assert!(!matches(&matchers, &input));
	}

	#[test]
	fn regex_is_anchored_at_start_not_full_match() {
		let mut headers = http::HeaderMap::new();
		headers.insert("x-trace", "abc-123-def".parse().unwrap());
		let query = HashMap::new();
		let cookies = HashMap::new();
		let input = MatchInput { headers: &headers, query: &query, cookies: &cookies };

		let prefix = vec![cfg(MatcherTarget::Header, "x-trace", MatcherOp::Regex, Some("abc-"))];
		assert!(matches(&prefix, &input));

		let mid = vec![cfg(MatcherTarget::Header, "x-trace", MatcherOp::Regex, Some("123"))];
		assert!(!matches(&mid, &input));
	}

	#[test]
	fn cookie_contains() {
		let mut headers = http::HeaderMap::new();
		headers.insert(http::header::COOKIE, "session=abc123; theme=dark".parse().unwrap());
		let cookies = parse_cookies(&headers);
		let query = HashMap::new();
		let input = MatchInput { headers: &headers, query: &query, cookies: &cookies };

		let matchers = vec![cfg(MatcherTarget::Cookie, "session", MatcherOp::Contains, Some("abc"))];
		assert!(matches(&matchers, &input));
	}
}
