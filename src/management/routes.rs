//! Route CRUD, bulk-apply, and export — keyed by route id.
//! Mutating operations require the `harbor-master` role; reads require any
//! authenticated caller.

use axum::extract::{Path, State};
use axum::Json;
use http::HeaderMap;
use serde::Serialize;

use crate::auth::Role;
use crate::errors::ManagementError;
use crate::management::{require_auth, require_role, AppState};
use crate::route::Route;

pub async fn list(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<Vec<Route>>, ManagementError> {
	require_auth(&headers, &state.auth).await?;
	Ok(Json(state.store.list().await?))
}

pub async fn get(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
) -> Result<Json<Route>, ManagementError> {
	require_auth(&headers, &state.auth).await?;
	let route = state.store.get(&id).await?.ok_or_else(|| ManagementError::not_found(format!("route '{id}' not found")))?;
	Ok(Json(route))
}

pub async fn put(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
	Json(mut route): Json<Route>,
) -> Result<Json<Route>, ManagementError> {
	require_role(&headers, &state.auth, Role::HarborMaster).await?;
	route.id = id;
	let saved = state.store.put(route).await?;
	Ok(Json(saved))
}

pub async fn delete(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ManagementError> {
	require_role(&headers, &state.auth, Role::HarborMaster).await?;
	let removed = state.store.delete(&id).await?;
	if !removed {
		return Err(ManagementError::not_found(format!("route '{id}' not found")));
	}
	Ok(Json(serde_json::json!({ "message": format!("route '{id}' deleted successfully") })))
}

#[derive(Serialize)]
pub struct BulkApplyResultItem {
	pub id: String,
	pub status: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub detail: Option<String>,
}

#[derive(Serialize)]
pub struct BulkApplyResponse {
	pub results: Vec<BulkApplyResultItem>,
}

/// Applies each route in order. Per-item, not transactional: one item's
/// failure is recorded in its own result entry and does not stop the
/// remaining items from being attempted.
pub async fn bulk_apply(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(routes): Json<Vec<Route>>,
) -> Result<Json<BulkApplyResponse>, ManagementError> {
	require_role(&headers, &state.auth, Role::HarborMaster).await?;

	let mut results = Vec::with_capacity(routes.len());
	for route in routes {
		let id = route.id.clone();
		let existed = match state.store.get(&id).await {
			Ok(r) => r.is_some(),
			Err(e) => {
				results.push(BulkApplyResultItem { id, status: "error", detail: Some(e.to_string()) });
				continue;
			},
		};
		match state.store.put(route).await {
			Ok(_) => results.push(BulkApplyResultItem {
				id,
				status: if existed { "updated" } else { "created" },
				detail: None,
			}),
			Err(e) => results.push(BulkApplyResultItem { id, status: "error", detail: Some(e.to_string()) }),
		}
	}
	Ok(Json(BulkApplyResponse { results }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
	pub exported_at: chrono::DateTime<chrono::Utc>,
	pub exported_by: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteExport {
	pub api_version: &'static str,
	pub kind: &'static str,
	pub metadata: ExportMetadata,
	pub items: Vec<Route>,
}

pub async fn export(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<RouteExport>, ManagementError> {
	let ctx = require_auth(&headers, &state.auth).await?;
	let items = state.store.list().await?;
	Ok(Json(RouteExport {
		api_version: "harbor.l8e/v1",
		kind: "RouteList",
		metadata: ExportMetadata { exported_at: chrono::Utc::now(), exported_by: ctx.subject },
		items,
	}))
}
