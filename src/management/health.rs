//! `GET /health`, `GET /readyz`, `GET /metrics` — unauthenticated probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::management::AppState;

pub async fn health() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "status": "ok" }))
}

/// Readiness is satisfied once the route store answers a `list()` call;
/// the dataplane is otherwise always ready to accept connections.
pub async fn readyz(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
	match state.store.list().await {
		Ok(_) => Ok(Json(serde_json::json!({ "status": "ready" }))),
		Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
	}
}

pub async fn metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
	crate::metrics::encode_registry(&state.metrics.registry).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
