use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use l8e_harbor::auth::jwt::JwtAuthAdapter;
use l8e_harbor::auth::AuthAdapter;
use l8e_harbor::breaker::BreakerRegistry;
use l8e_harbor::config::{AuthAdapterKind, Config, RouteStoreKind, SecretProviderKind};
use l8e_harbor::index::RouteIndex;
use l8e_harbor::management::{self, AppState};
use l8e_harbor::metrics::MetricsState;
use l8e_harbor::proxy::ProxyEngine;
use l8e_harbor::secret::kubernetes::KubernetesSecretProvider;
use l8e_harbor::secret::localfs::LocalFsSecretProvider;
use l8e_harbor::secret::SecretProvider;
use l8e_harbor::selector::BackendSelector;
use l8e_harbor::store::memory::MemoryRouteStore;
use l8e_harbor::store::sqlite::SqliteRouteStore;
use l8e_harbor::store::RouteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = l8e_harbor::config::Args::parse();
	let config = Config::load(args)?;

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.init();

	info!(host = %config.host, port = config.port, mode = ?config.mode, "starting l8e-harbor");

	let secrets = build_secret_provider(&config)?;
	let store = build_route_store(&config).await?;
	let auth = build_auth_adapter(&config, secrets).await?;

	let metrics = Arc::new(MetricsState::new());
	let index = Arc::new(RouteIndex::new());
	let breakers = Arc::new(BreakerRegistry::new());
	let selector = Arc::new(BackendSelector::new());

	let cancel = CancellationToken::new();
	let index_task = tokio::spawn({
		let index = index.clone();
		let store = store.clone();
		let cancel = cancel.clone();
		let breakers = breakers.clone();
		let selector = selector.clone();
		async move { index.run(store, cancel, breakers, selector).await }
	});

	let auth_dyn: Arc<dyn AuthAdapter> = auth.clone();
	let proxy_engine = Arc::new(ProxyEngine::new(index, selector, breakers, auth_dyn, metrics.metrics.clone()));

	let mgmt_state = AppState { store: store.clone(), auth: auth.clone(), metrics: metrics.clone() };
	let app: Router = management::router(mgmt_state)
		.fallback(move |ConnectInfo(peer): ConnectInfo<SocketAddr>, req: axum::extract::Request| {
			let engine = proxy_engine.clone();
			async move { engine.handle(req, peer).await }
		})
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive());

	let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
	info!(addr = %listener.local_addr()?, "listening");

	axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
		.with_graceful_shutdown(shutdown_signal(cancel.clone()))
		.await?;

	cancel.cancel();
	let _ = index_task.await;
	Ok(())
}

fn build_secret_provider(config: &Config) -> anyhow::Result<Arc<dyn SecretProvider>> {
	Ok(match config.secret_provider {
		SecretProviderKind::Localfs => Arc::new(
			LocalFsSecretProvider::new(&config.secret_path)
				.map_err(|e| anyhow::anyhow!("failed to initialise local secret provider at {}: {e}", config.secret_path))?,
		),
		SecretProviderKind::Kubernetes => {
			let namespace = std::fs::read_to_string("/var/run/secrets/kubernetes.io/serviceaccount/namespace")
				.unwrap_or_else(|_| "default".to_string());
			let token = std::fs::read_to_string("/var/run/secrets/kubernetes.io/serviceaccount/token").ok();
			let base_url = std::env::var("KUBERNETES_SERVICE_HOST")
				.map(|host| {
					let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
					format!("https://{host}:{port}")
				})
				.unwrap_or_else(|_| "https://kubernetes.default.svc".to_string());
			Arc::new(KubernetesSecretProvider::new(base_url, namespace.trim().to_string(), token))
		},
	})
}

async fn build_route_store(config: &Config) -> anyhow::Result<Arc<dyn RouteStore>> {
	Ok(match config.route_store {
		RouteStoreKind::Memory => Arc::new(MemoryRouteStore::new(config.route_store_path.clone())),
		RouteStoreKind::Sqlite => Arc::new(SqliteRouteStore::connect(&config.route_store_path).await?),
	})
}

async fn build_auth_adapter(config: &Config, secrets: Arc<dyn SecretProvider>) -> anyhow::Result<Arc<JwtAuthAdapter>> {
	match config.auth_adapter {
		AuthAdapterKind::Local => {
			Ok(Arc::new(JwtAuthAdapter::new(secrets, config.jwt_ttl_seconds).await?))
		},
		AuthAdapterKind::K8sSa => {
			anyhow::bail!(
				"auth_adapter=k8s_sa has no concrete implementation in this build; the core ships only the local JWT adapter"
			)
		},
	}
}

/// Waits for Ctrl-C or SIGTERM, then signals `cancel` so the route index's
/// refresh loop and any other cancellation-aware background task stop
/// alongside the server.
async fn shutdown_signal(cancel: CancellationToken) {
	let ctrl_c = async {
		let _ = tokio::signal::ctrl_c().await;
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut sig) => {
				sig.recv().await;
			},
			Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
		}
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
	info!("shutdown signal received");
	cancel.cancel();
}
