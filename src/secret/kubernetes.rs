//! Cluster-native Secret Provider: a plain REST client against a
//! Kubernetes-shaped secrets API. In-cluster auth/TLS discovery is
//! packaging's concern, out of scope here; this adapter takes a base URL
//! and bearer token directly.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SecretError;
use crate::secret::{SecretBlob, SecretProvider};

const LABEL_SELECTOR: &str = "app=l8e-harbor,component=secret";

pub struct KubernetesSecretProvider {
	client: reqwest::Client,
	base_url: String,
	namespace: String,
	bearer_token: Option<String>,
}

#[derive(Serialize, Deserialize, Default)]
struct V1Secret {
	#[serde(default)]
	metadata: V1ObjectMeta,
	#[serde(default)]
	data: HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Default)]
struct V1ObjectMeta {
	name: String,
	#[serde(default)]
	labels: HashMap<String, String>,
}

#[derive(Deserialize)]
struct V1SecretList {
	items: Vec<V1Secret>,
}

impl KubernetesSecretProvider {
	pub fn new(base_url: impl Into<String>, namespace: impl Into<String>, bearer_token: Option<String>) -> Self {
		Self { client: reqwest::Client::new(), base_url: base_url.into(), namespace: namespace.into(), bearer_token }
	}

	/// Maps a secret path to a conformant Kubernetes object name.
	fn secret_name(path: &str) -> String {
		format!("l8e-harbor-{}", path.replace(['_', '/'], "-").to_lowercase())
	}

	fn secret_url(&self, name: &str) -> String {
		format!("{}/api/v1/namespaces/{}/secrets/{}", self.base_url, self.namespace, name)
	}

	fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		match &self.bearer_token {
			Some(token) => builder.bearer_auth(token),
			None => builder,
		}
	}
}

#[async_trait]
impl SecretProvider for KubernetesSecretProvider {
	async fn get(&self, path: &str) -> Result<SecretBlob, SecretError> {
		let name = Self::secret_name(path);
		let resp = self
			.request(self.client.get(self.secret_url(&name)))
			.send()
			.await
			.map_err(|e| SecretError::Remote(e.to_string()))?;
		if resp.status() == reqwest::StatusCode::NOT_FOUND {
			return Err(SecretError::NotFound(path.to_string()));
		}
		let secret: V1Secret =
			resp.error_for_status().map_err(|e| SecretError::Remote(e.to_string()))?.json().await?;

		let mut result: SecretBlob = HashMap::new();
		for (key, encoded) in secret.data {
			let decoded = base64::engine::general_purpose::STANDARD
				.decode(encoded)
				.map_err(|e| SecretError::Remote(format!("invalid base64 in secret '{path}' key '{key}': {e}")))?;
			let decoded = String::from_utf8(decoded)
				.map_err(|e| SecretError::Remote(format!("invalid utf-8 in secret '{path}' key '{key}': {e}")))?;
			let value: Value = serde_json::from_str(&decoded).unwrap_or(Value::String(decoded));
			result.insert(key, value);
		}
		// A single `data` key wrapping the whole blob unwraps transparently.
		if result.len() == 1 {
			if let Some(Value::Object(inner)) = result.get("data") {
				return Ok(inner.clone().into_iter().collect());
			}
		}
		Ok(result)
	}

	async fn put(&self, path: &str, payload: SecretBlob) -> Result<(), SecretError> {
		let name = Self::secret_name(path);
		let encoded = base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(&payload)?);
		let mut data = HashMap::new();
		data.insert("data".to_string(), encoded);
		let mut labels = HashMap::new();
		labels.insert("app".to_string(), "l8e-harbor".to_string());
		labels.insert("component".to_string(), "secret".to_string());
		let body = V1Secret { metadata: V1ObjectMeta { name: name.clone(), labels }, data };

		let patch = self
			.request(self.client.patch(self.secret_url(&name)))
			.json(&body)
			.send()
			.await
			.map_err(|e| SecretError::Remote(e.to_string()))?;
		if patch.status() == reqwest::StatusCode::NOT_FOUND {
			let ns_url = format!("{}/api/v1/namespaces/{}/secrets", self.base_url, self.namespace);
			self.request(self.client.post(ns_url))
				.json(&body)
				.send()
				.await
				.map_err(|e| SecretError::Remote(e.to_string()))?
				.error_for_status()
				.map_err(|e| SecretError::Remote(e.to_string()))?;
			return Ok(());
		}
		patch.error_for_status().map_err(|e| SecretError::Remote(e.to_string()))?;
		Ok(())
	}

	async fn delete(&self, path: &str) -> Result<bool, SecretError> {
		let name = Self::secret_name(path);
		let resp = self
			.request(self.client.delete(self.secret_url(&name)))
			.send()
			.await
			.map_err(|e| SecretError::Remote(e.to_string()))?;
		if resp.status() == reqwest::StatusCode::NOT_FOUND {
			return Ok(false);
		}
		resp.error_for_status().map_err(|e| SecretError::Remote(e.to_string()))?;
		Ok(true)
	}

	async fn list(&self, prefix: &str) -> Result<Vec<String>, SecretError> {
		let url = format!("{}/api/v1/namespaces/{}/secrets", self.base_url, self.namespace);
		let resp = self
			.request(self.client.get(url).query(&[("labelSelector", LABEL_SELECTOR)]))
			.send()
			.await
			.map_err(|e| SecretError::Remote(e.to_string()))?
			.error_for_status()
			.map_err(|e| SecretError::Remote(e.to_string()))?;
		let list: V1SecretList = resp.json().await?;
		let secret_prefix = "l8e-harbor-";
		let mut names: Vec<String> = list
			.items
			.into_iter()
			.filter_map(|s| s.metadata.name.strip_prefix(secret_prefix).map(|n| n.replace('-', "_")))
			.filter(|name| name.starts_with(prefix))
			.collect();
		names.sort();
		Ok(names)
	}
}
