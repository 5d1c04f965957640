//! Configuration: CLI flag > env var > YAML config file > default.
//! `clap`'s `env` attribute already folds "CLI flag, falling back to env
//! var" into one parsed value, so the remaining merge here is just that
//! value over the file over the default.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
	K8s,
	Vm,
	Hybrid,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SecretProviderKind {
	Localfs,
	Kubernetes,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RouteStoreKind {
	Memory,
	Sqlite,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AuthAdapterKind {
	Local,
	K8sSa,
}

/// CLI/env surface. Every field is optional here; [`Config::load`] applies
/// the file and hard-coded defaults underneath whatever this leaves unset.
/// `#[arg(env = "...")]` makes each field resolve as "CLI flag, else env
/// var" in one pass.
#[derive(Parser, Debug, Default)]
#[command(name = "l8e-harbor", version, about = "Pluggable HTTP reverse proxy / API gateway")]
pub struct Args {
	/// YAML config file overlay, applied under CLI/env and over defaults.
	#[arg(long, env = "HARBOR_CONFIG_FILE")]
	pub config_file: Option<PathBuf>,

	#[arg(long, env = "HARBOR_HOST")]
	pub host: Option<String>,
	#[arg(long, env = "HARBOR_PORT")]
	pub port: Option<u16>,
	#[arg(long, env = "HARBOR_WORKERS")]
	pub workers: Option<usize>,
	#[arg(long, env = "HARBOR_MODE", value_enum)]
	pub mode: Option<DeployMode>,

	#[arg(long, env = "HARBOR_TLS_CERT_FILE")]
	pub tls_cert_file: Option<PathBuf>,
	#[arg(long, env = "HARBOR_TLS_KEY_FILE")]
	pub tls_key_file: Option<PathBuf>,
	#[arg(long, env = "HARBOR_TLS_CA_FILE")]
	pub tls_ca_file: Option<PathBuf>,

	#[arg(long, env = "HARBOR_SECRET_PROVIDER", value_enum)]
	pub secret_provider: Option<SecretProviderKind>,
	#[arg(long, env = "HARBOR_SECRET_PATH")]
	pub secret_path: Option<String>,

	#[arg(long, env = "HARBOR_ROUTE_STORE", value_enum)]
	pub route_store: Option<RouteStoreKind>,
	#[arg(long, env = "HARBOR_ROUTE_STORE_PATH")]
	pub route_store_path: Option<String>,

	#[arg(long, env = "HARBOR_AUTH_ADAPTER", value_enum)]
	pub auth_adapter: Option<AuthAdapterKind>,
	#[arg(long, env = "HARBOR_JWT_TTL_SECONDS")]
	pub jwt_ttl_seconds: Option<i64>,

	#[arg(long, env = "HARBOR_LOG_LEVEL")]
	pub log_level: Option<String>,
	#[arg(long, env = "HARBOR_ENABLE_METRICS")]
	pub enable_metrics: Option<bool>,
	#[arg(long, env = "HARBOR_ENABLE_TRACING")]
	pub enable_tracing: Option<bool>,
}

/// The YAML overlay shape. Every field is optional; absent fields fall
/// through to CLI/env (already applied) or the hard default.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
	host: Option<String>,
	port: Option<u16>,
	workers: Option<usize>,
	mode: Option<DeployMode>,
	tls: Option<FileTlsConfig>,
	secret_provider: Option<SecretProviderKind>,
	secret_path: Option<String>,
	route_store: Option<RouteStoreKind>,
	route_store_path: Option<String>,
	auth_adapter: Option<AuthAdapterKind>,
	jwt_ttl_seconds: Option<i64>,
	log_level: Option<String>,
	enable_metrics: Option<bool>,
	enable_tracing: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FileTlsConfig {
	cert_file: Option<PathBuf>,
	key_file: Option<PathBuf>,
	ca_file: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct TlsFiles {
	pub cert_file: Option<PathBuf>,
	pub key_file: Option<PathBuf>,
	pub ca_file: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct Config {
	pub host: String,
	pub port: u16,
	pub workers: usize,
	pub mode: DeployMode,
	pub tls: TlsFiles,
	pub secret_provider: SecretProviderKind,
	pub secret_path: String,
	pub route_store: RouteStoreKind,
	pub route_store_path: String,
	pub auth_adapter: AuthAdapterKind,
	pub jwt_ttl_seconds: i64,
	pub log_level: String,
	pub enable_metrics: bool,
	pub enable_tracing: bool,
}

impl Config {
	/// Applies the configured precedence: `args` already carries "CLI flag,
	/// else env var"; this layers the YAML file underneath it, and a hard
	/// default underneath that.
	pub fn load(args: Args) -> anyhow::Result<Self> {
		let file = match &args.config_file {
			Some(path) => {
				let contents = std::fs::read_to_string(path)
					.map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
				serde_yaml::from_str(&contents)
					.map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?
			},
			None => FileConfig::default(),
		};

		let tls_file = file.tls.unwrap_or_default();

		Ok(Self {
			host: args.host.or(file.host).unwrap_or_else(|| "0.0.0.0".to_string()),
			port: args.port.or(file.port).unwrap_or(8080),
			workers: args.workers.or(file.workers).unwrap_or_else(num_cpus::get),
			mode: args.mode.or(file.mode).unwrap_or(DeployMode::Vm),
			tls: TlsFiles {
				cert_file: args.tls_cert_file.or(tls_file.cert_file),
				key_file: args.tls_key_file.or(tls_file.key_file),
				ca_file: args.tls_ca_file.or(tls_file.ca_file),
			},
			secret_provider: args.secret_provider.or(file.secret_provider).unwrap_or(SecretProviderKind::Localfs),
			secret_path: args.secret_path.or(file.secret_path).unwrap_or_else(|| "./data/secrets".to_string()),
			route_store: args.route_store.or(file.route_store).unwrap_or(RouteStoreKind::Memory),
			route_store_path: args
				.route_store_path
				.or(file.route_store_path)
				.unwrap_or_else(|| "./data/routes.snapshot.json".to_string()),
			auth_adapter: args.auth_adapter.or(file.auth_adapter).unwrap_or(AuthAdapterKind::Local),
			jwt_ttl_seconds: args.jwt_ttl_seconds.or(file.jwt_ttl_seconds).unwrap_or(3600),
			log_level: args.log_level.or(file.log_level).unwrap_or_else(|| "info".to_string()),
			enable_metrics: args.enable_metrics.or(file.enable_metrics).unwrap_or(true),
			enable_tracing: args.enable_tracing.or(file.enable_tracing).unwrap_or(false),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn empty_args() -> Args {
		Args {
			config_file: None,
			host: None,
			port: None,
			workers: None,
			mode: None,
			tls_cert_file: None,
			tls_key_file: None,
			tls_ca_file: None,
			secret_provider: None,
			secret_path: None,
			route_store: None,
			route_store_path: None,
			auth_adapter: None,
			jwt_ttl_seconds: None,
			log_level: None,
			enable_metrics: None,
			enable_tracing: None,
		}
	}

	#[test]
	fn defaults_apply_when_nothing_set() {
		let cfg = Config::load(empty_args()).unwrap();
		assert_eq!(cfg.port, 8080);
		assert_eq!(cfg.route_store, RouteStoreKind::Memory);
		assert_eq!(cfg.jwt_ttl_seconds, 3600);
	}

	#[test]
	fn cli_overrides_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("harbor.yaml");
		std::fs::write(&path, "port: 9000\n").unwrap();

		let mut args = empty_args();
		args.config_file = Some(path);
		args.port = Some(7000);

		let cfg = Config::load(args).unwrap();
		assert_eq!(cfg.port, 7000);
	}

	#[test]
	fn file_overrides_default() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("harbor.yaml");
		std::fs::write(&path, "port: 9000\n").unwrap();

		let mut args = empty_args();
		args.config_file = Some(path);

		let cfg = Config::load(args).unwrap();
		assert_eq!(cfg.port, 9000);
	}
}
