//! Management plane: a thin axum `Router` sitting beside the proxy engine,
//! talking only to the Route Store and Auth Adapter. No business logic
//! lives here — every handler deserializes, delegates, and maps the error
//! taxonomy onto a status code.

pub mod admin;
pub mod auth;
pub mod health;
pub mod routes;

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Serialize;

use crate::auth::jwt::JwtAuthAdapter;
use crate::auth::{AuthContext, Role};
use crate::errors::ManagementError;
use crate::metrics::MetricsState;
use crate::store::RouteStore;

#[derive(Clone)]
pub struct AppState {
	pub store: Arc<dyn RouteStore>,
	pub auth: Arc<JwtAuthAdapter>,
	pub metrics: Arc<MetricsState>,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/auth/login", post(auth::login))
		.route("/.well-known/jwks.json", get(auth::jwks))
		.route("/routes", get(routes::list))
		.route("/routes:bulk-apply", post(routes::bulk_apply))
		.route("/routes:export", get(routes::export))
		.route("/routes/:id", get(routes::get).put(routes::put).delete(routes::delete))
		.route("/bootstrap", post(admin::bootstrap))
		.route("/admin/status", get(admin::status))
		.route("/admin/users", get(admin::list_users).post(admin::create_user))
		.route(
			"/admin/users/:name",
			get(admin::get_user).put(admin::update_user).delete(admin::delete_user),
		)
		.route("/health", get(health::health))
		.route("/readyz", get(health::readyz))
		.route("/metrics", get(health::metrics))
		.with_state(state)
}

impl IntoResponse for ManagementError {
	fn into_response(self) -> Response {
		(self.status, Json(DetailBody { detail: self.detail })).into_response()
	}
}

#[derive(Serialize)]
struct DetailBody {
	detail: String,
}

/// Extracts and verifies the bearer token from `headers`. Any valid role
/// passes — used for read-only endpoints, where both built-in roles may
/// look but only `harbor-master` may touch.
pub(crate) async fn require_auth(headers: &http::HeaderMap, auth: &JwtAuthAdapter) -> Result<AuthContext, ManagementError> {
	use crate::auth::AuthAdapter;

	let token = headers
		.get(http::header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer "));
	auth.authenticate(token)
		.await
		.ok_or_else(|| ManagementError::new(http::StatusCode::UNAUTHORIZED, "authentication required"))
}

/// Extracts and verifies the bearer token, then requires `required_role` by
/// exact equality — there is no role hierarchy. Used for mutating
/// management ops, which always require `harbor-master`.
pub(crate) async fn require_role(
	headers: &http::HeaderMap,
	auth: &JwtAuthAdapter,
	required_role: Role,
) -> Result<AuthContext, ManagementError> {
	let ctx = require_auth(headers, auth).await?;
	if ctx.role != required_role {
		return Err(ManagementError::new(
			http::StatusCode::FORBIDDEN,
			format!("'{}' role required", required_role.as_str()),
		));
	}
	Ok(ctx)
}
