//! Proxy Engine: route lookup → middleware → select → breaker → dispatch →
//! retry → stream, one request at a time through the attempt state machine.

pub mod client;
pub mod headers;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use http::header::{HeaderName, HeaderValue};
use http::{Request, Response, StatusCode};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::AuthAdapter;
use crate::breaker::{Admission, BreakerRegistry, BreakerState};
use crate::errors::{FailureKind, ProxyError};
use crate::matcher::{parse_cookies, parse_query, MatchInput};
use crate::metrics::{Metrics, Outcome};
use crate::middleware;
use crate::proxy::client::UpstreamClient;
use crate::proxy::headers::strip_hop_by_hop;
use crate::route::{Route, RetryOn};
use crate::selector::BackendSelector;

pub struct ProxyEngine {
	pub index: Arc<crate::index::RouteIndex>,
	pub selector: Arc<BackendSelector>,
	pub breakers: Arc<BreakerRegistry>,
	pub client: UpstreamClient,
	pub auth: Arc<dyn AuthAdapter>,
	pub metrics: Arc<Metrics>,
}

pub struct RequestContext {
	pub client_addr: Option<IpAddr>,
	pub scheme: String,
}

/// Placeholder route label for outcomes recorded before a route is known
/// (lookup miss) — there is no route id to attribute the metric to.
const UNROUTED: &str = "-";

impl ProxyEngine {
	pub fn new(
		index: Arc<crate::index::RouteIndex>,
		selector: Arc<BackendSelector>,
		breakers: Arc<BreakerRegistry>,
		auth: Arc<dyn AuthAdapter>,
		metrics: Arc<Metrics>,
	) -> Self {
		Self { index, selector, breakers, client: UpstreamClient::new(), auth, metrics }
	}

	/// Entry point for any request that didn't match the management prefix.
	#[instrument(skip_all, fields(request_id))]
    pub async fn handle(&self, req: Request<Body>, peer: SocketAddr) -> Response<Body> {
		// Step 1: assign request id and record start time.
		let request_id = Uuid::new_v4().to_string();
		tracing::Span::current().record("request_id", &request_id.as_str());
		let start = Instant::now();

		let (parts, body) = req.into_parts();
		let query = parse_query(parts.uri.query());
		let cookies = parse_cookies(&parts.headers);
		let match_input = MatchInput { headers: &parts.headers, query: &query, cookies: &cookies };

		// Step 2+3: route lookup (matchers already applied inside lookup).
		let Some(route) = self.index.lookup(&parts.method, parts.uri.path(), &match_input) else {
			return self.finish(ProxyError::NoRoute, UNROUTED, &request_id, start, 0);
		};

		let bearer_token = bearer_token(&parts.headers);
		// Step 4: middleware chain.
		let outcome = match middleware::run_chain(&route.middleware, &self.auth, bearer_token.as_deref()).await {
			Ok(outcome) => outcome,
			Err(e) => return self.finish(e, &route.id, &request_id, start, 0),
		};

		let ctx = RequestContext { client_addr: Some(peer.ip()), scheme: parts.uri.scheme_str().unwrap_or("http").to_string() };
		let original_host = parts.headers.get(http::header::HOST).and_then(|v| v.to_str().ok()).map(str::to_string);

		// Body is forwarded as a single stream, never buffered; a retried
		// attempt after the first cannot re-read a consumed stream, so only
		// the first attempt forwards the real body.
		let mut body = Some(body);
		let mut attempts: u32 = 0;
		let max_attempts = route.retry_policy.max_retries + 1;
		let mut last_error: Option<ProxyError> = None;

		loop {
			attempts += 1;

			// Step 5: backend selection.
			let Some(backend) = self.selector.select(&route, ctx.client_addr) else {
				return self.finish(ProxyError::NoBackend, &route.id, &request_id, start, attempts);
			};
			let backend_url = backend.url.clone();
			let breaker_key = match backend.authority() {
				Ok(authority) => authority,
				Err(e) => return self.finish(ProxyError::UpstreamTransport(e.to_string()), &route.id, &request_id, start, attempts),
			};

			// Step 6: breaker consult.
			let admission = self.breakers.admit(&route.id, &breaker_key, &route.circuit_breaker);
			let admitted_as = match admission {
				Admission::Denied => return self.finish(ProxyError::BreakerOpen, &route.id, &request_id, start, attempts),
				Admission::Allowed(state) => state,
			};

			// Step 7: build upstream request.
			let upstream_body = body.take().unwrap_or_else(Body::empty);
			let upstream_req = match build_upstream_request(
				&route,
				&backend_url,
				&parts,
				&outcome,
				&ctx,
				original_host.as_deref(),
				&request_id,
				upstream_body,
			) {
				Ok(req) => req,
				Err(e) => return self.finish(e, &route.id, &request_id, start, attempts),
			};

			// Step 8+9: dispatch with per-attempt deadline; classify outcome.
			let timeout = Duration::from_millis(route.timeout_ms as u64);
			let dispatch_result = self.client.dispatch(upstream_req, timeout).await;

			let (failure_kind, response_or_err) = match dispatch_result {
				Ok(response) => {
					if response.status().is_server_error() {
						(Some(FailureKind::UpstreamStatus), Ok(response))
					} else {
						(None, Ok(response))
					}
				},
				Err((kind, err)) => (Some(kind), Err(err)),
			};

			let is_failure = failure_kind.is_some();
			let opened = self.breakers.record(&route.id, &breaker_key, admitted_as, is_failure, &route.circuit_breaker);
			if opened {
				self.metrics.record_breaker_open(&route.id, &breaker_key);
			}

			match response_or_err {
				Ok(response) if !is_failure || !retryable(&route, failure_kind, response.status()) || attempts >= max_attempts => {
					info!(route = %route.id, backend = %backend_url, status = %response.status(), attempts, "request completed");
					self.metrics.record_request(&route.id, Outcome::Success, start.elapsed().as_secs_f64());
					return finalize_response(response, &request_id, start);
				},
				Ok(response) => {
					last_error = Some(status_error(response.status()));
				},
				Err(e) if !retryable(&route, failure_kind, StatusCode::INTERNAL_SERVER_ERROR) || attempts >= max_attempts => {
					return self.finish(e, &route.id, &request_id, start, attempts);
				},
				Err(e) => {
					last_error = Some(e);
				},
			}

			tokio::time::sleep(Duration::from_millis(route.retry_policy.backoff_ms)).await;
		}
		#[allow(unreachable_code)]
		{
			self.finish(last_error.unwrap_or(ProxyError::NoBackend), &route.id, &request_id, start, attempts)
		}
	}

	fn finish(&self, err: ProxyError, route_id: &str, request_id: &str, start: Instant, attempts: u32) -> Response<Body> {
		info!(error = %err, attempts, elapsed = ?start.elapsed(), "request failed");
		self.metrics.record_request(route_id, outcome_for(&err), start.elapsed().as_secs_f64());
		let response = error_response(err, request_id);
		finalize_response(response, request_id, start)
	}
}

fn outcome_for(err: &ProxyError) -> Outcome {
	match err {
		ProxyError::NoRoute => Outcome::NoRoute,
		ProxyError::NoBackend => Outcome::NoBackend,
		ProxyError::BreakerOpen => Outcome::BreakerDenied,
		ProxyError::Unauthenticated => Outcome::Unauthenticated,
		ProxyError::Forbidden { .. } => Outcome::Forbidden,
		ProxyError::UpstreamTimeout => Outcome::UpstreamTimeout,
		ProxyError::UpstreamTransport(_) => Outcome::UpstreamTransport,
	}
}

fn status_error(status: StatusCode) -> ProxyError {
	ProxyError::UpstreamTransport(format!("upstream status {status}"))
}

fn retryable(route: &Route, failure_kind: Option<FailureKind>, status: StatusCode) -> bool {
	let Some(kind) = failure_kind else { return false };
	route.retry_policy.retry_on.iter().any(|r| match r {
		RetryOn::ServerError => kind == FailureKind::UpstreamStatus && status.is_server_error(),
		RetryOn::GatewayError => {
			kind == FailureKind::UpstreamStatus
				&& matches!(status, StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT)
		},
		RetryOn::Timeout => kind == FailureKind::UpstreamTimeout,
	})
}

fn bearer_token(headers: &http::HeaderMap) -> Option<String> {
	let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
	value.strip_prefix("Bearer ").map(str::to_string)
}

#[allow(clippy::too_many_arguments)]
fn build_upstream_request(
	route: &Route,
	backend_url: &str,
	parts: &http::request::Parts,
	outcome: &middleware::MiddlewareOutcome,
	ctx: &RequestContext,
	original_host: Option<&str>,
	request_id: &str,
	body: Body,
) -> Result<Request<Body>, ProxyError> {
	let forwarded_path = if route.strip_prefix {
		parts.uri.path().strip_prefix(route.path.as_str()).unwrap_or(parts.uri.path())
	} else {
		parts.uri.path()
	};
	let forwarded_path = if forwarded_path.is_empty() { "/" } else { forwarded_path };

	let mut url = format!("{}{}", backend_url.trim_end_matches('/'), forwarded_path);
	if let Some(raw_query) = parts.uri.query() {
		url.push('?');
		url.push_str(raw_query);
	}

	let mut headers = headers::build_forwarded_headers(
		&parts.headers,
		ctx.client_addr,
		&ctx.scheme,
		original_host,
		request_id,
	);
	outcome.header_rewrite.apply(&mut headers);

	let mut builder = Request::builder().method(parts.method.clone()).uri(&url);
	*builder.headers_mut().unwrap() = headers;
	builder.body(body).map_err(|e| ProxyError::UpstreamTransport(e.to_string()))
}

fn error_response(err: ProxyError, request_id: &str) -> Response<Body> {
	let status = err.status_code();
	Response::builder()
		.status(status)
		.body(Body::from(err.to_string()))
		.unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Strips hop-by-hop headers and stamps `X-Process-Time` (seconds, decimal)
/// and `X-Request-Id` on every dataplane response, success or error alike.
fn finalize_response(mut response: Response<Body>, request_id: &str, start: Instant) -> Response<Body> {
	strip_hop_by_hop(response.headers_mut());
	if let Ok(value) = HeaderValue::from_str(request_id) {
		response.headers_mut().insert(HeaderName::from_static("x-request-id"), value);
	}
	let process_time = format!("{:.6}", start.elapsed().as_secs_f64());
	if let Ok(value) = HeaderValue::from_str(&process_time) {
		response.headers_mut().insert(HeaderName::from_static("x-process-time"), value);
	}
	response
}
