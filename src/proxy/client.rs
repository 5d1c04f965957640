//! The pooled upstream HTTP client: a `hyper_util` legacy client over a
//! scheme-aware connector that dials plain HTTP or, via `hyper-rustls`, TLS.

use std::time::Duration;

use axum::body::Body;
use http::{Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::errors::{FailureKind, ProxyError};

#[derive(Clone)]
pub struct UpstreamClient {
	inner: Client<HttpsConnector<HttpConnector>, Body>,
}

/// Default pool sizing for the process-wide `max_connections`/
/// `max_keepalive` knobs.
const POOL_MAX_IDLE_PER_HOST: usize = 64;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

impl UpstreamClient {
	pub fn new() -> Self {
		let connector = HttpsConnectorBuilder::new()
			.with_native_roots()
			.expect("no native root CA certificates found")
			.https_or_http()
			.enable_http1()
			.enable_http2()
			.build();

		let inner = Client::builder(TokioExecutor::new())
			.timer(TokioTimer::new())
			.pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
			.pool_idle_timeout(POOL_IDLE_TIMEOUT)
			.build(connector);

		Self { inner }
	}

	/// Dispatches `request` with a deadline of `timeout` (the route's
	/// `timeout_ms`, per-attempt, not per-request). Classifies
	/// the outcome into a [`FailureKind`] the breaker and retry loop can act
	/// on, or returns the response unclassified for the caller to inspect
	/// its status.
	pub async fn dispatch(
		&self,
		request: Request<Body>,
		timeout: Duration,
	) -> Result<Response<Body>, (FailureKind, ProxyError)> {
		match tokio::time::timeout(timeout, self.inner.request(request)).await {
			Ok(Ok(response)) => Ok(response.map(Body::new)),
			Ok(Err(e)) => Err((FailureKind::UpstreamTransport, ProxyError::UpstreamTransport(e.to_string()))),
			Err(_) => Err((FailureKind::UpstreamTimeout, ProxyError::UpstreamTimeout)),
		}
	}
}

impl Default for UpstreamClient {
	fn default() -> Self {
		Self::new()
	}
}
