//! Bootstrap and user CRUD. Every mutating op other than `/bootstrap`
//! requires `harbor-master`; `/bootstrap` is only ever allowed once, while
//! the user set is empty, so it authenticates itself.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::errors::ManagementError;
use crate::management::{require_role, AppState};

#[derive(Deserialize)]
pub struct BootstrapRequest {
	pub admin_username: String,
	pub admin_password: String,
}

#[derive(Serialize)]
pub struct BootstrapResponse {
	pub admin_user_created: bool,
	pub message: String,
}

pub async fn bootstrap(
	State(state): State<AppState>,
	Json(req): Json<BootstrapRequest>,
) -> Result<Json<BootstrapResponse>, ManagementError> {
	state.auth.bootstrap(&req.admin_username, &req.admin_password).await?;
	Ok(Json(BootstrapResponse {
		admin_user_created: true,
		message: format!("system bootstrapped successfully; admin user '{}' created", req.admin_username),
	}))
}

#[derive(Serialize)]
pub struct UserDto {
	pub username: String,
	pub role: Role,
	pub meta: HashMap<String, serde_json::Value>,
	pub created_at: chrono::DateTime<chrono::Utc>,
	pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<crate::auth::UserRecord> for UserDto {
	fn from(u: crate::auth::UserRecord) -> Self {
		Self { username: u.username, role: u.role, meta: u.meta, created_at: u.created_at, updated_at: u.updated_at }
	}
}

#[derive(Deserialize)]
pub struct UserCreateRequest {
	pub username: String,
	pub password: String,
	pub role: Role,
	#[serde(default)]
	pub meta: HashMap<String, serde_json::Value>,
}

pub async fn create_user(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(req): Json<UserCreateRequest>,
) -> Result<Json<UserDto>, ManagementError> {
	require_role(&headers, &state.auth, Role::HarborMaster).await?;
	let user = state.auth.create_user(&req.username, &req.password, req.role, req.meta).await?;
	Ok(Json(user.into()))
}

pub async fn list_users(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<Vec<UserDto>>, ManagementError> {
	require_role(&headers, &state.auth, Role::HarborMaster).await?;
	Ok(Json(state.auth.list_users().await.into_iter().map(UserDto::from).collect()))
}

pub async fn get_user(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(username): Path<String>,
) -> Result<Json<UserDto>, ManagementError> {
	require_role(&headers, &state.auth, Role::HarborMaster).await?;
	let user = state
		.auth
		.get_user(&username)
		.await
		.ok_or_else(|| ManagementError::not_found(format!("user '{username}' not found")))?;
	Ok(Json(user.into()))
}

#[derive(Deserialize)]
pub struct UserUpdateRequest {
	pub password: Option<String>,
	pub role: Option<Role>,
	pub meta: Option<HashMap<String, serde_json::Value>>,
}

pub async fn update_user(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(username): Path<String>,
	Json(req): Json<UserUpdateRequest>,
) -> Result<Json<UserDto>, ManagementError> {
	require_role(&headers, &state.auth, Role::HarborMaster).await?;
	let user = state.auth.update_user(&username, req.password.as_deref(), req.role, req.meta).await?;
	Ok(Json(user.into()))
}

pub async fn delete_user(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(username): Path<String>,
) -> Result<Json<serde_json::Value>, ManagementError> {
	require_role(&headers, &state.auth, Role::HarborMaster).await?;
	let removed = state.auth.delete_user(&username).await?;
	if !removed {
		return Err(ManagementError::not_found(format!("user '{username}' not found")));
	}
	Ok(Json(serde_json::json!({ "message": format!("user '{username}' deleted successfully") })))
}

#[derive(Serialize)]
pub struct AdminStatus {
	pub bootstrapped: bool,
	pub user_count: usize,
	pub admin_users: Vec<String>,
	pub auth_adapter: &'static str,
}

pub async fn status(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<AdminStatus>, ManagementError> {
	require_role(&headers, &state.auth, Role::HarborMaster).await?;
	let users = state.auth.list_users().await;
	Ok(Json(AdminStatus {
		bootstrapped: state.auth.is_bootstrapped().await,
		user_count: users.len(),
		admin_users: users.iter().filter(|u| u.role == Role::HarborMaster).map(|u| u.username.clone()).collect(),
		auth_adapter: "local",
	}))
}
