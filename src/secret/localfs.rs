//! Local filesystem Secret Provider: one JSON file per key under a root
//! directory, mode 0600 on Unix. Reads/writes `<path>.json` only.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::SecretError;
use crate::secret::{SecretBlob, SecretProvider};

pub struct LocalFsSecretProvider {
	root: PathBuf,
}

impl LocalFsSecretProvider {
	pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
		let root = root.into();
		std::fs::create_dir_all(&root)?;
		Ok(Self { root })
	}

	fn file_for(&self, path: &str) -> PathBuf {
		self.root.join(format!("{path}.json"))
	}

	#[cfg(unix)]
	fn restrict_permissions(file: &Path) -> std::io::Result<()> {
		use std::os::unix::fs::PermissionsExt;
		let mut perms = std::fs::metadata(file)?.permissions();
		perms.set_mode(0o600);
		std::fs::set_permissions(file, perms)
	}

	#[cfg(not(unix))]
	fn restrict_permissions(_file: &Path) -> std::io::Result<()> {
		Ok(())
	}
}

#[async_trait]
impl SecretProvider for LocalFsSecretProvider {
	async fn get(&self, path: &str) -> Result<SecretBlob, SecretError> {
		let file = self.file_for(path);
		if !file.exists() {
			return Err(SecretError::NotFound(path.to_string()));
		}
		let bytes = std::fs::read(&file)?;
		Ok(serde_json::from_slice(&bytes)?)
	}

	async fn put(&self, path: &str, payload: SecretBlob) -> Result<(), SecretError> {
		let file = self.file_for(path);
		let bytes = serde_json::to_vec_pretty(&payload)?;
		std::fs::write(&file, bytes)?;
		Self::restrict_permissions(&file)?;
		Ok(())
	}

	async fn delete(&self, path: &str) -> Result<bool, SecretError> {
		let file = self.file_for(path);
		if !file.exists() {
			return Ok(false);
		}
		std::fs::remove_file(&file)?;
		Ok(true)
	}

	async fn list(&self, prefix: &str) -> Result<Vec<String>, SecretError> {
		let mut names = Vec::new();
		for entry in std::fs::read_dir(&self.root)? {
			let entry = entry?;
			if !entry.file_type()?.is_file() {
				continue;
			}
			if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
				if stem.starts_with(prefix) {
					names.push(stem.to_string());
				}
			}
		}
		names.sort();
		Ok(names)
	}
}
