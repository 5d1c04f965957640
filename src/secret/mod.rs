//! Secret Provider: keyed blob get/put/delete, consumed
//! by the auth adapter for key material, user records, and revocations.

pub mod kubernetes;
pub mod localfs;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::SecretError;

pub type SecretBlob = HashMap<String, Value>;

/// Capability set a Secret Provider exposes. Both concrete
/// providers treat the payload as an opaque JSON object; neither interprets
/// its contents.
#[async_trait]
pub trait SecretProvider: Send + Sync {
	async fn get(&self, path: &str) -> Result<SecretBlob, SecretError>;
	async fn put(&self, path: &str, payload: SecretBlob) -> Result<(), SecretError>;
	async fn delete(&self, path: &str) -> Result<bool, SecretError>;
	async fn list(&self, prefix: &str) -> Result<Vec<String>, SecretError>;
}
