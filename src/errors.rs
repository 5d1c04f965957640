//! Error taxonomy. Each subsystem gets one `thiserror` enum; the management
//! boundary maps these onto HTTP status codes rather than leaking internals.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("route '{0}' not found")]
	NotFound(String),
	#[error("route '{0}' already exists")]
	AlreadyExists(String),
	#[error("invalid route: {0}")]
	Validation(String),
	#[error("store i/o error: {0}")]
	Io(#[from] std::io::Error),
	#[error("store serialization error: {0}")]
	Serde(#[from] serde_json::Error),
	#[error("sqlite store error: {0}")]
	Sqlite(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum SecretError {
	#[error("secret '{0}' not found")]
	NotFound(String),
	#[error("secret i/o error: {0}")]
	Io(#[from] std::io::Error),
	#[error("secret serialization error: {0}")]
	Serde(#[from] serde_json::Error),
	#[error("remote secret provider error: {0}")]
	Remote(String),
}

impl From<reqwest::Error> for SecretError {
	fn from(e: reqwest::Error) -> Self {
		SecretError::Remote(e.to_string())
	}
}

#[derive(Debug, Error)]
pub enum AuthError {
	#[error("operation unsupported by this auth adapter")]
	Unsupported,
	#[error("forbidden: role '{required}' required")]
	Forbidden { required: String },
	#[error("invalid credentials")]
	InvalidCredentials,
	#[error("weak password: must be at least 8 characters")]
	WeakPassword,
	#[error("user '{0}' not found")]
	UserNotFound(String),
	#[error("user '{0}' already exists")]
	UserAlreadyExists(String),
	#[error("system already bootstrapped")]
	AlreadyBootstrapped,
	#[error(transparent)]
	Secret(#[from] SecretError),
	#[error("jwt error: {0}")]
	Jwt(#[from] jsonwebtoken::errors::Error),
	#[error("key material error: {0}")]
	KeyMaterial(String),
}

/// Kinds of upstream/dispatch failure the proxy engine and breaker registry
/// reason about. Distinct from [`ProxyError`], which also carries
/// non-failure outcomes (e.g. breaker denial) that short-circuit a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
	UpstreamStatus,
	UpstreamTransport,
	UpstreamTimeout,
	BreakerDenied,
}

#[derive(Debug, Error)]
pub enum ProxyError {
	#[error("no matching route")]
	NoRoute,
	#[error("authentication required")]
	Unauthenticated,
	#[error("forbidden: role '{required}' required")]
	Forbidden { required: String },
	#[error("circuit breaker open for backend")]
	BreakerOpen,
	#[error("no backend selectable")]
	NoBackend,
	#[error("all upstream attempts failed: {0}")]
	UpstreamTransport(String),
	#[error("upstream timed out")]
	UpstreamTimeout,
}

impl ProxyError {
	/// Maps this error onto the dataplane status codes from the wire contract.
	pub fn status_code(&self) -> http::StatusCode {
		use http::StatusCode;
		match self {
			ProxyError::NoRoute => StatusCode::NOT_FOUND,
			ProxyError::Unauthenticated => StatusCode::UNAUTHORIZED,
			ProxyError::Forbidden { .. } => StatusCode::FORBIDDEN,
			ProxyError::BreakerOpen | ProxyError::NoBackend => StatusCode::SERVICE_UNAVAILABLE,
			ProxyError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
			ProxyError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
		}
	}
}

/// Error surfaced at the management HTTP boundary: a status code plus an
/// opaque detail message, per the `{detail: <message>}` response contract.
#[derive(Debug, Error)]
#[error("{detail}")]
pub struct ManagementError {
	pub status: http::StatusCode,
	pub detail: String,
}

impl ManagementError {
	pub fn new(status: http::StatusCode, detail: impl Into<String>) -> Self {
		Self { status, detail: detail.into() }
	}

	pub fn bad_request(detail: impl Into<String>) -> Self {
		Self::new(http::StatusCode::BAD_REQUEST, detail)
	}

	pub fn not_found(detail: impl Into<String>) -> Self {
		Self::new(http::StatusCode::NOT_FOUND, detail)
	}

	pub fn internal(detail: impl Into<String>) -> Self {
		Self::new(http::StatusCode::INTERNAL_SERVER_ERROR, detail)
	}
}

impl From<StoreError> for ManagementError {
	fn from(e: StoreError) -> Self {
		match e {
			StoreError::NotFound(id) => ManagementError::not_found(format!("route '{id}' not found")),
			StoreError::AlreadyExists(id) => {
				ManagementError::bad_request(format!("route '{id}' already exists"))
			},
			StoreError::Validation(msg) => ManagementError::bad_request(msg),
			other => ManagementError::internal(other.to_string()),
		}
	}
}

impl From<AuthError> for ManagementError {
	fn from(e: AuthError) -> Self {
		match e {
			AuthError::Forbidden { .. } => ManagementError::new(http::StatusCode::FORBIDDEN, e.to_string()),
			AuthError::InvalidCredentials => {
				ManagementError::new(http::StatusCode::UNAUTHORIZED, e.to_string())
			},
			AuthError::WeakPassword => ManagementError::bad_request(e.to_string()),
			AuthError::UserNotFound(_) => ManagementError::not_found(e.to_string()),
			AuthError::UserAlreadyExists(_) => ManagementError::bad_request(e.to_string()),
			AuthError::AlreadyBootstrapped => ManagementError::bad_request(e.to_string()),
			AuthError::Unsupported => ManagementError::bad_request(e.to_string()),
			other => ManagementError::internal(other.to_string()),
		}
	}
}
