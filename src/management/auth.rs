//! `POST /auth/login` and `GET /.well-known/jwks.json`.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::ManagementError;
use crate::management::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
	pub username: String,
	pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
	pub access_token: String,
	pub expires_in: i64,
	pub token_type: &'static str,
}

pub async fn login(
	State(state): State<AppState>,
	Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ManagementError> {
	use crate::auth::AuthAdapter;

	let ctx = state
		.auth
		.verify_credentials(&req.username, &req.password)
		.await
		.ok_or_else(|| ManagementError::new(http::StatusCode::UNAUTHORIZED, "invalid credentials"))?;

	let ttl = state.auth.default_ttl_seconds();
	let access_token = state.auth.issue_token(&ctx.subject, ctx.role, ttl).await?;

	Ok(Json(LoginResponse { access_token, expires_in: ttl, token_type: "bearer" }))
}

pub async fn jwks(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ManagementError> {
	Ok(Json(state.auth.jwks()?))
}
