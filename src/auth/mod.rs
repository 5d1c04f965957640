//! Auth Adapter: credential verification, token
//! issue/verify, and role derivation, shared by the dataplane's `auth`
//! middleware and the management plane.

pub mod jwt;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AuthError;

/// The two built-in roles. Comparison is exact equality;
/// there is no hierarchy in the core.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
	HarborMaster,
	Captain,
}

impl Role {
	pub fn as_str(&self) -> &'static str {
		match self {
			Role::HarborMaster => "harbor-master",
			Role::Captain => "captain",
		}
	}
}

impl std::str::FromStr for Role {
	type Err = AuthError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"harbor-master" => Ok(Role::HarborMaster),
			"captain" => Ok(Role::Captain),
			_ => Err(AuthError::KeyMaterial(format!("unknown role '{s}'"))),
		}
	}
}

/// Produced by the auth adapter and threaded through a request.
#[derive(Clone, Debug)]
pub struct AuthContext {
	pub subject: String,
	pub role: Role,
	pub meta: HashMap<String, Value>,
	pub token_id: Option<String>,
	pub expires_at: Option<i64>,
}

/// A stored user record (management plane).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRecord {
	pub username: String,
	pub password_hash: String,
	pub role: Role,
	#[serde(default)]
	pub meta: HashMap<String, Value>,
	pub created_at: chrono::DateTime<chrono::Utc>,
	pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Capability set an Auth Adapter exposes to callers.
#[async_trait]
pub trait AuthAdapter: Send + Sync {
	/// Inspects the `Authorization: Bearer <token>` header. Returns absent
	/// rather than an error on any negative outcome.
	async fn authenticate(&self, bearer_token: Option<&str>) -> Option<AuthContext>;

	/// May fail with `Unsupported` for adapters that are pure verifiers.
	async fn issue_token(&self, subject: &str, role: Role, ttl_seconds: i64) -> Result<String, AuthError>;

	/// May fail with `Unsupported` for adapters that are pure verifiers.
	async fn revoke_token(&self, token_id: &str) -> Result<bool, AuthError>;

	async fn verify_credentials(&self, username: &str, password: &str) -> Option<AuthContext>;
}
