//! Middleware chain: executes a route's
//! declared middleware in order.
//!
//! Unknown middleware names are accepted at
//! ingest and silently ignored at dispatch rather than rejected with 400.

use std::sync::Arc;

use tracing::debug;

use crate::auth::{AuthAdapter, Role};
use crate::errors::ProxyError;
use crate::proxy::headers::HeaderRewrite;
use crate::route::MiddlewareConfig;

/// Side effects staged by the middleware chain, applied by the proxy
/// engine before/around dispatch.
#[derive(Default)]
pub struct MiddlewareOutcome {
	pub header_rewrite: HeaderRewrite,
	pub log_level: Option<String>,
}

/// Runs `middleware` in declared order against `bearer_token`. Returns the
/// staged outcome on success, or the first enforcement failure (401/403).
pub async fn run_chain(
	middleware: &[MiddlewareConfig],
	auth: &Arc<dyn AuthAdapter>,
	bearer_token: Option<&str>,
) -> Result<MiddlewareOutcome, ProxyError> {
	let mut outcome = MiddlewareOutcome::default();

	for step in middleware {
		match step.name.as_str() {
			"auth" => run_auth(step, auth, bearer_token).await?,
			"logging" => {
				if let Some(level) = step.config.get("level").and_then(|v| v.as_str()) {
					outcome.log_level = Some(level.to_string());
				}
			},
			"header-rewrite" => stage_header_rewrite(step, &mut outcome.header_rewrite),
			other => {
				debug!(middleware = other, "ignoring unrecognised middleware at dispatch");
			},
		}
	}

	Ok(outcome)
}

async fn run_auth(
	step: &MiddlewareConfig,
	auth: &Arc<dyn AuthAdapter>,
	bearer_token: Option<&str>,
) -> Result<(), ProxyError> {
	let required_roles: Vec<Role> = step
		.config
		.get("require_role")
		.and_then(|v| v.as_array())
		.map(|roles| {
			roles
				.iter()
				.filter_map(|r| r.as_str())
				.filter_map(|r| r.parse::<Role>().ok())
				.collect()
		})
		.unwrap_or_default();

	let ctx = auth.authenticate(bearer_token).await.ok_or(ProxyError::Unauthenticated)?;

	if !required_roles.is_empty() && !required_roles.contains(&ctx.role) {
		return Err(ProxyError::Forbidden { required: ctx.role.as_str().to_string() });
	}
	Ok(())
}

fn stage_header_rewrite(step: &MiddlewareConfig, rewrite: &mut HeaderRewrite) {
	if let Some(set) = step.config.get("set").and_then(|v| v.as_object()) {
		for (k, v) in set {
			if let Some(v) = v.as_str() {
				rewrite.set.push((k.clone(), v.to_string()));
			}
		}
	}
	if let Some(remove) = step.config.get("remove").and_then(|v| v.as_array()) {
		for name in remove.iter().filter_map(|v| v.as_str()) {
			rewrite.remove.push(name.to_string());
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::collections::HashMap;

	use crate::auth::AuthContext;
	use crate::errors::AuthError;

	struct StubAuth {
		context: Option<AuthContext>,
	}

	#[async_trait]
	impl AuthAdapter for StubAuth {
		async fn authenticate(&self, _bearer_token: Option<&str>) -> Option<AuthContext> {
			self.context.clone()
		}
		async fn issue_token(&self, _s: &str, _r: Role, _ttl: i64) -> Result<String, AuthError> {
			Err(AuthError::Unsupported)
		}
		async fn revoke_token(&self, _t: &str) -> Result<bool, AuthError> {
			Err(AuthError::Unsupported)
		}
		async fn verify_credentials(&self, _u: &str, _p: &str) -> Option<AuthContext> {
			None
		}
	}

	fn ctx(role: Role) -> AuthContext {
		AuthContext { subject: "alice".to_string(), role, meta: HashMap::new(), token_id: None, expires_at: None }
	}

	fn require_role_middleware(role: &str) -> MiddlewareConfig {
		let mut config = HashMap::new();
		config.insert("require_role".to_string(), serde_json::json!([role]));
		MiddlewareConfig { name: "auth".to_string(), config }
	}

	#[tokio::test]
	async fn missing_context_is_unauthenticated() {
		let auth: Arc<dyn AuthAdapter> = Arc::new(StubAuth { context: None });
		let middleware = vec![require_role_middleware("harbor-master")];
		let result = run_chain(&middleware, &auth, None).await;
		assert!(matches!(result, Err(ProxyError::Unauthenticated)));
	}

	#[tokio::test]
	async fn wrong_role_is_forbidden() {
		let auth: Arc<dyn AuthAdapter> = Arc::new(StubAuth { context: Some(ctx(Role::Captain)) });
		let middleware = vec![require_role_middleware("harbor-master")];
		let result = run_chain(&middleware, &auth, Some("token")).await;
		assert!(matches!(result, Err(ProxyError::Forbidden { .. })));
	}

	#[tokio::test]
	async fn matching_role_passes() {
		let auth: Arc<dyn AuthAdapter> = Arc::new(StubAuth { context: Some(ctx(Role::HarborMaster)) });
		let middleware = vec![require_role_middleware("harbor-master")];
		assert!(run_chain(&middleware, &auth, Some("token")).await.is_ok());
	}

	#[tokio::test]
	async fn unknown_middleware_is_ignored() {
		let auth: Arc<dyn AuthAdapter> = Arc::new(StubAuth { context: None });
		let middleware = vec![MiddlewareConfig { name: "rate-limit".to_string(), config: HashMap::new() }];
		assert!(run_chain(&middleware, &auth, None).await.is_ok());
	}

	#[tokio::test]
	async fn header_rewrite_is_staged() {
		let auth: Arc<dyn AuthAdapter> = Arc::new(StubAuth { context: None });
		let mut config = HashMap::new();
		config.insert("set".to_string(), serde_json::json!({"x-env": "prod"}));
		config.insert("remove".to_string(), serde_json::json!(["x-debug"]));
		let middleware = vec![MiddlewareConfig { name: "header-rewrite".to_string(), config }];
		let outcome = run_chain(&middleware, &auth, None).await.unwrap();
		assert_eq!(outcome.header_rewrite.set, vec![("x-env".to_string(), "prod".to_string())]);
		assert_eq!(outcome.header_rewrite.remove, vec!["x-debug".to_string()]);
	}
}
