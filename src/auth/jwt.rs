//! Local JWT auth adapter: RS256 signing, bcrypt-hashed passwords,
//! best-effort revocation mirrored to the Secret Provider.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::warn;

use crate::auth::{AuthAdapter, AuthContext, Role, UserRecord};
use crate::errors::AuthError;
use crate::secret::{SecretBlob, SecretProvider};

const ISSUER: &str = "l8e-harbor";
/// The "well-known key-id" the RSA keypair is stored and published under.
const JWT_KEY_ID: &str = "l8e-harbor-1";
const JWT_KEYS_SECRET: &str = "jwt_keys_raw";
const USERS_SECRET: &str = "users";
const REVOKED_SECRET: &str = "revoked_tokens";
const RSA_KEY_BITS: usize = 2048;

#[derive(Serialize, Deserialize)]
struct Claims {
	sub: String,
	role: String,
	iat: i64,
	exp: i64,
	iss: String,
	jti: String,
}

pub struct JwtAuthAdapter {
	secrets: Arc<dyn SecretProvider>,
	encoding_key: EncodingKey,
	decoding_key: DecodingKey,
	public_key_pem: String,
	default_ttl_seconds: i64,
	revoked: RwLock<HashSet<String>>,
}

impl JwtAuthAdapter {
	/// Loads the RSA keypair from `jwt_keys_raw`, generating and persisting
	/// a fresh one on first bootstrap if absent. Key load/generation failure
	/// here is fatal at process start.
	pub async fn new(secrets: Arc<dyn SecretProvider>, default_ttl_seconds: i64) -> Result<Self, AuthError> {
		let (private_pem, public_pem) = match secrets.get(JWT_KEYS_SECRET).await {
			Ok(blob) => Self::keys_from_blob(&blob)?,
			Err(_) => {
				let (private_pem, public_pem) = Self::generate_keypair()?;
				let mut blob: SecretBlob = HashMap::new();
				blob.insert("private_key".to_string(), json!(private_pem));
				blob.insert("public_key".to_string(), json!(public_pem));
				secrets.put(JWT_KEYS_SECRET, blob).await.map_err(AuthError::Secret)?;
				(private_pem, public_pem)
			},
		};

		let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
			.map_err(|e| AuthError::KeyMaterial(format!("invalid jwt private key: {e}")))?;
		let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
			.map_err(|e| AuthError::KeyMaterial(format!("invalid jwt public key: {e}")))?;

		let revoked = Self::load_revoked(&*secrets).await;

		Ok(Self {
			secrets,
			encoding_key,
			decoding_key,
			public_key_pem: public_pem,
			default_ttl_seconds,
			revoked: RwLock::new(revoked),
		})
	}

	fn keys_from_blob(blob: &SecretBlob) -> Result<(String, String), AuthError> {
		let private_pem = blob
			.get("private_key")
			.and_then(|v| v.as_str())
			.ok_or_else(|| AuthError::KeyMaterial("jwt_keys_raw missing private_key".to_string()))?
			.to_string();
		let public_pem = blob
			.get("public_key")
			.and_then(|v| v.as_str())
			.ok_or_else(|| AuthError::KeyMaterial("jwt_keys_raw missing public_key".to_string()))?
			.to_string();
		Ok((private_pem, public_pem))
	}

	fn generate_keypair() -> Result<(String, String), AuthError> {
		let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
			.map_err(|e| AuthError::KeyMaterial(format!("rsa keygen failed: {e}")))?;
		let public_key = private_key.to_public_key();
		let private_pem = private_key
			.to_pkcs1_pem(LineEnding::LF)
			.map_err(|e| AuthError::KeyMaterial(format!("pkcs1 encode failed: {e}")))?
			.to_string();
		let public_pem = public_key
			.to_pkcs1_pem(LineEnding::LF)
			.map_err(|e| AuthError::KeyMaterial(format!("pkcs1 encode failed: {e}")))?;
		Ok((private_pem, public_pem))
	}

	async fn load_revoked(secrets: &dyn SecretProvider) -> HashSet<String> {
		match secrets.get(REVOKED_SECRET).await {
			Ok(blob) => blob
				.get("revoked_tokens")
				.and_then(|v| v.as_array())
				.map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
				.unwrap_or_default(),
			Err(_) => HashSet::new(),
		}
	}

	async fn load_users(&self) -> HashMap<String, UserRecord> {
		match self.secrets.get(USERS_SECRET).await {
			Ok(blob) => blob
				.into_iter()
				.filter_map(|(username, value)| serde_json::from_value::<UserRecord>(value).ok().map(|u| (username, u)))
				.collect(),
			Err(_) => HashMap::new(),
		}
	}

	async fn save_users(&self, users: &HashMap<String, UserRecord>) -> Result<(), AuthError> {
		let blob: SecretBlob = users
			.iter()
			.map(|(k, v)| (k.clone(), serde_json::to_value(v).expect("UserRecord always serializes")))
			.collect();
		self.secrets.put(USERS_SECRET, blob).await.map_err(AuthError::Secret)
	}

	pub fn public_key_pem(&self) -> &str {
		&self.public_key_pem
	}

	/// Renders the verification key as a JWK set for `GET
	/// /.well-known/jwks.json`, so a caller can verify tokens without access
	/// to the Secret Provider.
	pub fn jwks(&self) -> Result<serde_json::Value, AuthError> {
		let public_key = RsaPublicKey::from_pkcs1_pem(&self.public_key_pem)
			.map_err(|e| AuthError::KeyMaterial(format!("invalid jwt public key: {e}")))?;
		let encode = |b: &[u8]| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b);
		Ok(json!({
			"keys": [{
				"kty": "RSA",
				"use": "sig",
				"alg": "RS256",
				"kid": JWT_KEY_ID,
				"n": encode(&public_key.n().to_bytes_be()),
				"e": encode(&public_key.e().to_bytes_be()),
			}]
		}))
	}

	/// The configured default token TTL (`jwt_ttl_seconds`), used by callers
	/// that issue a token without an explicit override — e.g. `/auth/login`.
	pub fn default_ttl_seconds(&self) -> i64 {
		self.default_ttl_seconds
	}

	pub async fn is_bootstrapped(&self) -> bool {
		!self.load_users().await.is_empty()
	}

	/// Creates the first `harbor-master` user. Fails with `AlreadyBootstrapped`
	/// if any user already exists.
	pub async fn bootstrap(&self, username: &str, password: &str) -> Result<UserRecord, AuthError> {
		if self.is_bootstrapped().await {
			return Err(AuthError::AlreadyBootstrapped);
		}
		self.create_user(username, password, Role::HarborMaster, HashMap::new()).await
	}

	pub async fn create_user(
		&self,
		username: &str,
		password: &str,
		role: Role,
		meta: HashMap<String, serde_json::Value>,
	) -> Result<UserRecord, AuthError> {
		if password.len() < 8 {
			return Err(AuthError::WeakPassword);
		}
		let mut users = self.load_users().await;
		if users.contains_key(username) {
			return Err(AuthError::UserAlreadyExists(username.to_string()));
		}
		let password_hash =
			bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| AuthError::KeyMaterial(e.to_string()))?;
		let now = chrono::Utc::now();
		let user = UserRecord {
			username: username.to_string(),
			password_hash,
			role,
			meta,
			created_at: now,
			updated_at: now,
		};
		users.insert(username.to_string(), user.clone());
		self.save_users(&users).await?;
		Ok(user)
	}

	pub async fn get_user(&self, username: &str) -> Option<UserRecord> {
		self.load_users().await.remove(username)
	}

	pub async fn list_users(&self) -> Vec<UserRecord> {
		self.load_users().await.into_values().collect()
	}

	pub async fn update_user(
		&self,
		username: &str,
		password: Option<&str>,
		role: Option<Role>,
		meta: Option<HashMap<String, serde_json::Value>>,
	) -> Result<UserRecord, AuthError> {
		let mut users = self.load_users().await;
		let mut user = users.remove(username).ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;
		if let Some(password) = password {
			if password.len() < 8 {
				return Err(AuthError::WeakPassword);
			}
			user.password_hash =
				bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| AuthError::KeyMaterial(e.to_string()))?;
		}
		if let Some(role) = role {
			user.role = role;
		}
		if let Some(meta) = meta {
			user.meta = meta;
		}
		user.updated_at = chrono::Utc::now();
		users.insert(username.to_string(), user.clone());
		self.save_users(&users).await?;
		Ok(user)
	}

	pub async fn delete_user(&self, username: &str) -> Result<bool, AuthError> {
		let mut users = self.load_users().await;
		let removed = users.remove(username).is_some();
		if removed {
			self.save_users(&users).await?;
		}
		Ok(removed)
	}
}

#[async_trait]
impl AuthAdapter for JwtAuthAdapter {
	async fn authenticate(&self, bearer_token: Option<&str>) -> Option<AuthContext> {
		let token = bearer_token?;
		let mut validation = Validation::new(Algorithm::RS256);
		validation.set_issuer(&[ISSUER]);
		let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation).ok()?;
		let claims = data.claims;

		if self.revoked.read().await.contains(&claims.jti) {
			return None;
		}
		let role = claims.role.parse::<Role>().ok()?;

		let mut meta = HashMap::new();
		meta.insert("iat".to_string(), json!(claims.iat));
		meta.insert("iss".to_string(), json!(claims.iss));

		Some(AuthContext {
			subject: claims.sub,
			role,
			meta,
			token_id: Some(claims.jti),
			expires_at: Some(claims.exp),
		})
	}

	async fn issue_token(&self, subject: &str, role: Role, ttl_seconds: i64) -> Result<String, AuthError> {
		let now = chrono::Utc::now().timestamp();
		let jti = format!("{subject}_{now}");
		let claims = Claims {
			sub: subject.to_string(),
			role: role.as_str().to_string(),
			iat: now,
			exp: now + ttl_seconds,
			iss: ISSUER.to_string(),
			jti,
		};
		let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)?;
		Ok(token)
	}

	async fn revoke_token(&self, token_id: &str) -> Result<bool, AuthError> {
		let snapshot = {
			let mut guard = self.revoked.write().await;
			guard.insert(token_id.to_string());
			guard.clone()
		};
		// Best-effort mirror: a failed persist does not undo the in-process
		// revocation.
		let mut blob: SecretBlob = HashMap::new();
		blob.insert("revoked_tokens".to_string(), json!(snapshot.into_iter().collect::<Vec<_>>()));
		if let Err(e) = self.secrets.put(REVOKED_SECRET, blob).await {
			warn!(error = %e, "failed to persist token revocation");
		}
		Ok(true)
	}

	async fn verify_credentials(&self, username: &str, password: &str) -> Option<AuthContext> {
		let user = self.load_users().await.remove(username)?;
		let valid = bcrypt::verify(password, &user.password_hash).unwrap_or(false);
		if !valid {
			return None;
		}
		let mut meta = HashMap::new();
		meta.insert("login_time".to_string(), json!(chrono::Utc::now().timestamp()));
		Some(AuthContext { subject: username.to_string(), role: user.role, meta, token_id: None, expires_at: None })
	}
}
