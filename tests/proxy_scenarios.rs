//! End-to-end scenarios driving `ProxyEngine::handle` against a real upstream
//! (`wiremock`) through a `RouteIndex` fed by a `MemoryRouteStore`: happy
//! path, retry-then-success, breaker trip, AND-matcher selection, and
//! role-enforced auth.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use http::{Method as HttpMethod, Request};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use l8e_harbor::auth::jwt::JwtAuthAdapter;
use l8e_harbor::auth::{AuthAdapter, Role};
use l8e_harbor::breaker::BreakerRegistry;
use l8e_harbor::index::RouteIndex;
use l8e_harbor::metrics::Metrics;
use l8e_harbor::proxy::ProxyEngine;
use l8e_harbor::route::{
	Backend, CircuitBreakerConfig, MatcherConfig, MatcherOp, MatcherTarget, MiddlewareConfig, Method, RetryOn,
	RetryPolicy, Route,
};
use l8e_harbor::secret::localfs::LocalFsSecretProvider;
use l8e_harbor::secret::SecretProvider;
use l8e_harbor::selector::BackendSelector;
use l8e_harbor::store::memory::MemoryRouteStore;
use l8e_harbor::store::RouteStore;
use prometheus_client::registry::Registry;

const PEER: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 51000);

fn base_route(id: &str, path: &str, backend_url: &str) -> Route {
	let now = chrono::Utc::now();
	Route {
		id: id.to_string(),
		path: path.to_string(),
		methods: vec![Method::Get, Method::Post],
		backends: vec![Backend { url: backend_url.to_string(), weight: 100, health_check_path: "/healthz".to_string(), tls: None }],
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

/// Wires a `MemoryRouteStore` pre-loaded with `routes` to a live `RouteIndex`,
/// mirroring the background task `main` spawns. The index's `run()` loop
/// performs its initial resync before entering the select loop, so a short
/// sleep after spawn is enough for tests to observe a populated snapshot.
async fn seeded_index(routes: Vec<Route>) -> (Arc<RouteIndex>, Arc<dyn RouteStore>, CancellationToken) {
	let dir = tempfile::tempdir().unwrap();
	let store: Arc<dyn RouteStore> = Arc::new(MemoryRouteStore::new(dir.path().join("routes.snapshot.json")));
	std::mem::forget(dir);
	for route in routes {
		store.put(route).await.unwrap();
	}

	let index = Arc::new(RouteIndex::new());
	let cancel = CancellationToken::new();
	tokio::spawn({
		let index = index.clone();
		let store = store.clone();
		let cancel = cancel.clone();
		let breakers = Arc::new(BreakerRegistry::new());
		let selector = Arc::new(BackendSelector::new());
		async move { index.run(store, cancel, breakers, selector).await }
	});
	tokio::time::sleep(Duration::from_millis(50)).await;
	(index, store, cancel)
}

async fn noop_auth() -> Arc<JwtAuthAdapter> {
	let dir = tempfile::tempdir().unwrap();
	let secrets: Arc<dyn SecretProvider> = Arc::new(LocalFsSecretProvider::new(dir.path().join("secrets")).unwrap());
	std::mem::forget(dir);
	Arc::new(JwtAuthAdapter::new(secrets, 3600).await.unwrap())
}

fn engine(index: Arc<RouteIndex>, auth: Arc<dyn AuthAdapter>) -> ProxyEngine {
	let mut registry = Registry::default();
	let metrics = Arc::new(Metrics::new(&mut registry));
	ProxyEngine::new(index, Arc::new(BackendSelector::new()), Arc::new(BreakerRegistry::new()), auth, metrics)
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().method(HttpMethod::GET).uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn happy_path_strips_prefix_and_passes_through() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/widgets"))
		.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
		.mount(&server)
		.await;

	let route = base_route("api", "/api", &server.uri());
	let (index, _store, cancel) = seeded_index(vec![route]).await;
	let auth = noop_auth().await as Arc<dyn AuthAdapter>;
	let engine = engine(index, auth);

	let response = engine.handle(get("/api/widgets"), PEER).await;
	assert_eq!(response.status(), http::StatusCode::OK);
	assert!(response.headers().contains_key("x-request-id"));
	assert!(response.headers().contains_key("x-process-time"));

	cancel.cancel();
}

#[tokio::test]
async fn retries_on_5xx_until_success() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/flaky"))
		.respond_with(ResponseTemplate::new(500))
		.up_to_n_times(2)
		.with_priority(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/flaky"))
		.respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
		.with_priority(2)
		.mount(&server)
		.await;

	let mut route = base_route("flaky", "/r", &server.uri());
	route.retry_policy = RetryPolicy { max_retries: 3, backoff_ms: 1, retry_on: vec![RetryOn::ServerError] };
	let (index, _store, cancel) = seeded_index(vec![route]).await;
	let auth = noop_auth().await as Arc<dyn AuthAdapter>;
	let engine = engine(index, auth);

	let response = engine.handle(get("/r/flaky"), PEER).await;
	assert_eq!(response.status(), http::StatusCode::OK);

	let requests = server.received_requests().await.unwrap();
	assert_eq!(requests.len(), 3);

	cancel.cancel();
}

#[tokio::test]
async fn breaker_opens_after_threshold_and_denies_without_calling_upstream() {
	let server = MockServer::start().await;
	Mock::given(method("GET")).and(path("/always-down")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

	let mut route = base_route("broken", "/b", &server.uri());
	route.circuit_breaker =
		CircuitBreakerConfig { enabled: true, failure_threshold: 50, minimum_requests: 2, interval_ms: 60_000, timeout_ms: 60_000 };
	let (index, _store, cancel) = seeded_index(vec![route]).await;
	let auth = noop_auth().await as Arc<dyn AuthAdapter>;
	let engine = engine(index, auth);

	// No retry policy is configured, so each 500 passes through as-is; only
	// the breaker's own denial (not a retry exhaustion) produces a mapped
	// error status.
	let first = engine.handle(get("/b/always-down"), PEER).await;
	assert_eq!(first.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
	let second = engine.handle(get("/b/always-down"), PEER).await;
	assert_eq!(second.status(), http::StatusCode::INTERNAL_SERVER_ERROR);

	// The breaker has now tripped; a third call must be denied locally.
	let third = engine.handle(get("/b/always-down"), PEER).await;
	assert_eq!(third.status(), http::StatusCode::SERVICE_UNAVAILABLE);

	let requests = server.received_requests().await.unwrap();
	assert_eq!(requests.len(), 2, "the breaker-denied call must never reach the upstream");

	cancel.cancel();
}

#[tokio::test]
async fn and_matcher_selects_the_more_specific_route() {
	let canary_server = MockServer::start().await;
	Mock::given(method("GET")).and(path("/check")).respond_with(ResponseTemplate::new(200).set_body_string("canary")).mount(&canary_server).await;
	let stable_server = MockServer::start().await;
	Mock::given(method("GET")).and(path("/check")).respond_with(ResponseTemplate::new(200).set_body_string("stable")).mount(&stable_server).await;

	let mut canary = base_route("canary", "/svc", &canary_server.uri());
	canary.priority = 10;
	canary.matchers = vec![
		MatcherConfig { name: MatcherTarget::Header, key: "x-env".to_string(), op: MatcherOp::Equals, value: Some("canary".to_string()) },
		MatcherConfig { name: MatcherTarget::Query, key: "beta".to_string(), op: MatcherOp::Equals, value: Some("1".to_string()) },
	];
	let stable = base_route("stable", "/svc", &stable_server.uri());

	let (index, _store, cancel) = seeded_index(vec![canary, stable]).await;
	let auth = noop_auth().await as Arc<dyn AuthAdapter>;
	let engine = engine(index, auth);

	// Matches only one matcher: falls through to the stable route, the only
	// remaining candidate whose (empty) matcher list trivially holds.
	let partial = Request::builder()
		.method(HttpMethod::GET)
		.uri("/svc/check?beta=1")
		.header("x-env", "prod")
		.body(Body::empty())
		.unwrap();
	let response = engine.handle(partial, PEER).await;
	assert_eq!(response.status(), http::StatusCode::OK);
	let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
	assert_eq!(&body[..], b"stable");

	// Matches both matchers (AND semantics): routed to canary despite
	// `stable` also being a candidate.
	let full = Request::builder()
		.method(HttpMethod::GET)
		.uri("/svc/check?beta=1")
		.header("x-env", "canary")
		.body(Body::empty())
		.unwrap();
	let response = engine.handle(full, PEER).await;
	assert_eq!(response.status(), http::StatusCode::OK);
	let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
	assert_eq!(&body[..], b"canary");

	cancel.cancel();
}

#[tokio::test]
async fn auth_middleware_enforces_required_role() {
	let server = MockServer::start().await;
	Mock::given(method("GET")).and(path("/secrets")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

	let mut route = base_route("admin-only", "/admin", &server.uri());
	let mut config = HashMap::new();
	config.insert("require_role".to_string(), serde_json::json!(["harbor-master"]));
	route.middleware = vec![MiddlewareConfig { name: "auth".to_string(), config }];
	let (index, _store, cancel) = seeded_index(vec![route]).await;

	let auth = noop_auth().await;
	auth.bootstrap("root", "supersecret1").await.unwrap();
	let captain = auth.create_user("cap", "alsosecret1", Role::Captain, HashMap::new()).await.unwrap();
	let master_token = auth.issue_token("root", Role::HarborMaster, 900).await.unwrap();
	let captain_token = auth.issue_token(&captain.username, Role::Captain, 900).await.unwrap();

	let engine = engine(index, auth as Arc<dyn AuthAdapter>);

	let unauthenticated = engine.handle(get("/admin/secrets"), PEER).await;
	assert_eq!(unauthenticated.status(), http::StatusCode::UNAUTHORIZED);

	let wrong_role = Request::builder()
		.method(HttpMethod::GET)
		.uri("/admin/secrets")
		.header("authorization", format!("Bearer {captain_token}"))
		.body(Body::empty())
		.unwrap();
	assert_eq!(engine.handle(wrong_role, PEER).await.status(), http::StatusCode::FORBIDDEN);

	let authorized = Request::builder()
		.method(HttpMethod::GET)
		.uri("/admin/secrets")
		.header("authorization", format!("Bearer {master_token}"))
		.body(Body::empty())
		.unwrap();
	assert_eq!(engine.handle(authorized, PEER).await.status(), http::StatusCode::OK);

	cancel.cancel();
}
