//! The route document: the unit the Route Store persists and the Route Index
//! sorts.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

/// Opaque route identifier: lowercase alphanumerics and dashes.
pub type RouteId = String;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Route {
	pub id: RouteId,
	pub path: String,
	#[serde(default = "default_methods")]
	pub methods: Vec<Method>,
	pub backends: Vec<Backend>,
	#[serde(default)]
	pub priority: u32,
	#[serde(default = "default_true")]
	pub strip_prefix: bool,
	#[serde(default)]
	pub sticky_session: bool,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u32,
	#[serde(default)]
	pub retry_policy: RetryPolicy,
	#[serde(default)]
	pub circuit_breaker: CircuitBreakerConfig,
	#[serde(default)]
	pub middleware: Vec<MiddlewareConfig>,
	#[serde(default)]
	pub matchers: Vec<MatcherConfig>,
	pub created_at: chrono::DateTime<chrono::Utc>,
	pub updated_at: chrono::DateTime<chrono::Utc>,
}

fn default_true() -> bool {
	true
}

fn default_timeout_ms() -> u32 {
	5000
}

fn default_methods() -> Vec<Method> {
	vec![
		Method::Get,
		Method::Post,
		Method::Put,
		Method::Delete,
		Method::Patch,
		Method::Head,
		Method::Options,
		Method::Trace,
	]
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Method {
	#[serde(rename = "GET")]
	Get,
	#[serde(rename = "POST")]
	Post,
	#[serde(rename = "PUT")]
	Put,
	#[serde(rename = "DELETE")]
	Delete,
	#[serde(rename = "PATCH")]
	Patch,
	#[serde(rename = "HEAD")]
	Head,
	#[serde(rename = "OPTIONS")]
	Options,
	#[serde(rename = "TRACE")]
	Trace,
}

impl Method {
	pub fn from_http(m: &http::Method) -> Option<Self> {
		Some(match *m {
			http::Method::GET => Method::Get,
			http::Method::POST => Method::Post,
			http::Method::PUT => Method::Put,
			http::Method::DELETE => Method::Delete,
			http::Method::PATCH => Method::Patch,
			http::Method::HEAD => Method::Head,
			http::Method::OPTIONS => Method::Options,
			http::Method::TRACE => Method::Trace,
			_ => return None,
		})
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Backend {
	pub url: String,
	#[serde(default = "default_weight")]
	pub weight: u32,
	#[serde(default = "default_health_check_path")]
	pub health_check_path: String,
	/// Metadata passthrough only: TLS termination itself is out of scope.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tls: Option<BackendTlsConfig>,
}

fn default_weight() -> u32 {
	100
}

fn default_health_check_path() -> String {
	"/healthz".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackendTlsConfig {
	#[serde(default)]
	pub insecure_skip_verify: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ca_cert_secret: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cert_secret: Option<String>,
}

impl Backend {
	/// The scheme/host portion of `url`, used together with the route id as
	/// the circuit breaker key.
	pub fn authority(&self) -> Result<String, StoreError> {
		let parsed = url::Url::parse(&self.url)
			.map_err(|e| StoreError::Validation(format!("invalid backend url '{}': {e}", self.url)))?;
		let host = parsed
			.host_str()
			.ok_or_else(|| StoreError::Validation(format!("backend url '{}' has no host", self.url)))?;
		match parsed.port() {
			Some(port) => Ok(format!("{}://{}:{}", parsed.scheme(), host, port)),
			None => Ok(format!("{}://{}", parsed.scheme(), host)),
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryOn {
	#[serde(rename = "5xx")]
	ServerError,
	GatewayError,
	Timeout,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryPolicy {
	#[serde(default)]
	pub max_retries: u32,
	#[serde(default = "default_backoff_ms")]
	pub backoff_ms: u64,
	#[serde(default)]
	pub retry_on: Vec<RetryOn>,
}

fn default_backoff_ms() -> u64 {
	100
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { max_retries: 0, backoff_ms: default_backoff_ms(), retry_on: Vec::new() }
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CircuitBreakerConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_failure_threshold")]
	pub failure_threshold: u32,
	#[serde(default = "default_minimum_requests")]
	pub minimum_requests: u32,
	#[serde(default = "default_interval_ms")]
	pub interval_ms: u64,
	#[serde(default = "default_breaker_timeout_ms")]
	pub timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
	50
}
fn default_minimum_requests() -> u32 {
	20
}
fn default_interval_ms() -> u64 {
	60_000
}
fn default_breaker_timeout_ms() -> u64 {
	30_000
}

impl Default for CircuitBreakerConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			failure_threshold: default_failure_threshold(),
			minimum_requests: default_minimum_requests(),
			interval_ms: default_interval_ms(),
			timeout_ms: default_breaker_timeout_ms(),
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MiddlewareConfig {
	pub name: String,
	#[serde(default)]
	pub config: HashMap<String, serde_json::Value>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherTarget {
	Header,
	Query,
	Cookie,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherOp {
	Equals,
	Contains,
	Regex,
	Exists,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MatcherConfig {
	pub name: MatcherTarget,
	pub key: String,
	pub op: MatcherOp,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<String>,
}

impl Route {
	/// Validates the route's invariants. Called by every Route
	/// Store implementation before a `put()` is allowed to take effect.
	pub fn validate(&self) -> Result<(), StoreError> {
		if self.id.is_empty()
			|| !self.id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
		{
			return Err(StoreError::Validation(format!(
				"route id '{}' must be lowercase alphanumerics and dashes",
				self.id
			)));
		}
		if !self.path.starts_with('/') || self.path.is_empty() {
			return Err(StoreError::Validation(format!(
				"route '{}': path must start with '/' and be non-empty",
				self.id
			)));
		}
		if self.backends.is_empty() {
			return Err(StoreError::Validation(format!("route '{}': at least one backend required", self.id)));
		}
		if self.backends.iter().map(|b| b.weight as u64).sum::<u64>() == 0 {
			return Err(StoreError::Validation(format!(
				"route '{}': sum of backend weights must be > 0",
				self.id
			)));
		}
		for b in &self.backends {
			if !(1..=1000).contains(&b.weight) {
				return Err(StoreError::Validation(format!(
					"route '{}': backend weight {} out of range 1..=1000",
					self.id, b.weight
				)));
			}
			b.authority()?;
		}
		if !(100..=300_000).contains(&self.timeout_ms) {
			return Err(StoreError::Validation(format!(
				"route '{}': timeout_ms {} out of range 100..=300000",
				self.id, self.timeout_ms
			)));
		}
		if self.retry_policy.max_retries > 10 {
			return Err(StoreError::Validation(format!("route '{}': max_retries must be <= 10", self.id)));
		}
		if !(1..=100).contains(&self.circuit_breaker.failure_threshold) {
			return Err(StoreError::Validation(format!(
				"route '{}': circuit_breaker.failure_threshold must be 1..=100",
				self.id
			)));
		}
		if self.circuit_breaker.minimum_requests == 0 {
			return Err(StoreError::Validation(format!(
				"route '{}': circuit_breaker.minimum_requests must be >= 1",
				self.id
			)));
		}
		for m in &self.matchers {
			m.validate(&self.id)?;
		}
		Ok(())
	}
}

impl MatcherConfig {
	fn validate(&self, route_id: &str) -> Result<(), StoreError> {
		if matches!(self.op, MatcherOp::Equals | MatcherOp::Contains | MatcherOp::Regex) && self.value.is_none()
		{
			// An op that compares against a value must actually carry one.
			return Err(StoreError::Validation(format!(
				"route '{}': matcher op '{:?}' on key '{}' requires a value",
				route_id, self.op, self.key
			)));
		}
		if self.op == MatcherOp::Regex {
			if let Some(pattern) = &self.value {
				Regex::new(pattern).map_err(|e| {
					StoreError::Validation(format!(
						"route '{}': invalid regex '{}' for matcher key '{}': {e}",
						route_id, pattern, self.key
					))
				})?;
			}
		}
		Ok(())
	}
}

/// Sort key: `(-priority, -len(path), created_at)`.
pub fn sort_key(r: &Route) -> (std::cmp::Reverse<u32>, std::cmp::Reverse<usize>, chrono::DateTime<chrono::Utc>) {
	(std::cmp::Reverse(r.priority), std::cmp::Reverse(r.path.len()), r.created_at)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn backend(url: &str) -> Backend {
		Backend { url: url.to_string(), weight: 100, health_check_path: "/healthz".to_string(), tls: None }
	}

	fn base_route(id: &str, path: &str) -> Route {
		let now = chrono::Utc::now();
		Route {
			id: id.to_string(),
			path: path.to_string(),
			methods: default_methods(),
			backends: vec![backend("http://localhost:9000")],
			priority: 0,
			strip_prefix: true,
			sticky_session: false,
			timeout_ms: 5000,
			retry_policy: RetryPolicy::default(),
			circuit_breaker: CircuitBreakerConfig::default(),
			middleware: Vec::new(),
			matchers: Vec::new(),
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn rejects_bad_id() {
		let mut r = base_route("Bad_ID", "/x");
		r.id = "Bad_ID".to_string();
		assert!(r.validate().is_err());
	}

	#[test]
	fn rejects_empty_backends() {
		let mut r = base_route("a", "/x");
		r.backends.clear();
		assert!(r.validate().is_err());
	}

	#[test]
	fn rejects_zero_weight_sum() {
		let mut r = base_route("a", "/x");
		r.backends[0].weight = 0;
		// Weight 0 fails the 1..=1000 per-backend check before the sum check
		// is ever reached, matching "weight 1..1000, default 100".
		assert!(r.validate().is_err());
	}

	#[test]
	fn rejects_path_without_slash() {
		let mut r = base_route("a", "x");
		r.path = "x".to_string();
		assert!(r.validate().is_err());
	}

	#[test]
	fn rejects_bad_regex_matcher() {
		let mut r = base_route("a", "/x");
		r.matchers.push(MatcherConfig {
			name: MatcherTarget::Header,
			key: "X-Env".to_string(),
			op: MatcherOp::Regex,
			value: Some("(".to_string()),
		});
		assert!(r.validate().is_err());
	}

	#[test]
	fn rejects_matcher_missing_value() {
		let mut r = base_route("a", "/x");
		r.matchers.push(MatcherConfig {
			name: MatcherTarget::Query,
			key: "v".to_string(),
			op: MatcherOp::Equals,
			value: None,
		});
		assert!(r.validate().is_err());
	}

	#[test]
	fn accepts_well_formed_route() {
		let r = base_route("a", "/x");
		assert!(r.validate().is_ok());
	}

	#[test]
	fn sort_key_orders_by_priority_then_path_len_then_age() {
		let older = base_route("a", "/");
		let mut newer = base_route("b", "/a");
		newer.created_at = older.created_at + chrono::Duration::seconds(1);
		let mut keys = vec![sort_key(&older), sort_key(&newer)];
		keys.sort();
		// "/a" (longer path) should sort before "/" regardless of age.
		assert_eq!(keys[0], sort_key(&newer));
	}
}
