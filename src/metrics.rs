//! Metrics: a `prometheus-client` registry
//! recording proxy outcomes, exposed over `/metrics`.

use std::sync::Arc;

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, EncodeLabelValue)]
pub enum Outcome {
	Success,
	UpstreamTransport,
	UpstreamTimeout,
	BreakerDenied,
	NoBackend,
	NoRoute,
	Unauthenticated,
	Forbidden,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, EncodeLabelSet)]
pub struct RequestLabels {
	pub route: String,
	pub outcome: Outcome,
}

/// Request-scoped counters and histograms the proxy engine records against
/// on every completed proxy attempt loop. Held behind an `Arc` and shared
/// across request tasks.
pub struct Metrics {
	pub requests_total: Family<RequestLabels, Counter>,
	pub request_duration_seconds: Family<RequestLabels, Histogram>,
	pub breaker_opens_total: Family<BreakerLabels, Counter>,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, EncodeLabelSet)]
pub struct BreakerLabels {
	pub route: String,
	pub backend: String,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let requests_total = Family::default();
		registry.register(
			"harbor_proxy_requests",
			"Total number of proxied requests by route and outcome (unstable)",
			requests_total.clone(),
		);

		let request_duration_seconds =
			Family::<RequestLabels, Histogram>::new_with_constructor(|| Histogram::new(DEFAULT_BUCKETS.iter().copied()));
		registry.register(
			"harbor_proxy_request_duration_seconds",
			"Proxied request duration in seconds by route and outcome (unstable)",
			request_duration_seconds.clone(),
		);

		let breaker_opens_total = Family::default();
		registry.register(
			"harbor_circuit_breaker_opens",
			"Total number of times a circuit breaker transitioned to Open (unstable)",
			breaker_opens_total.clone(),
		);

		Self { requests_total, request_duration_seconds, breaker_opens_total }
	}

	pub fn record_request(&self, route: &str, outcome: Outcome, duration_seconds: f64) {
		let labels = RequestLabels { route: route.to_string(), outcome };
		self.requests_total.get_or_create(&labels).inc();
		self.request_duration_seconds.get_or_create(&labels).observe(duration_seconds);
	}

	pub fn record_breaker_open(&self, route: &str, backend: &str) {
		self.breaker_opens_total.get_or_create(&BreakerLabels { route: route.to_string(), backend: backend.to_string() }).inc();
	}
}

const DEFAULT_BUCKETS: [f64; 10] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Renders the registry as the Prometheus text exposition format, for the
/// `GET /metrics` handler.
pub fn encode_registry(registry: &Registry) -> Result<String, std::fmt::Error> {
	let mut buffer = String::new();
	encode(&mut buffer, registry)?;
	Ok(buffer)
}

/// Owns the registry plus the typed [`Metrics`] handle derived from it,
/// bundled together so `main` only has one thing to construct and share.
pub struct MetricsState {
	pub registry: Registry,
	pub metrics: Arc<Metrics>,
}

impl MetricsState {
	pub fn new() -> Self {
		let mut registry = Registry::default();
		let metrics = Arc::new(Metrics::new(&mut registry));
		Self { registry, metrics }
	}
}

impl Default for MetricsState {
	fn default() -> Self {
		Self::new()
	}
}
