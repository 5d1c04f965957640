//! In-memory Route Store with file-based snapshot persistence.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::errors::StoreError;
use crate::route::{Route, RouteId};
use crate::store::{RouteStore, StoreEvent, WATCH_CHANNEL_CAPACITY};

#[derive(Serialize, Deserialize)]
struct Snapshot {
	timestamp: chrono::DateTime<chrono::Utc>,
	routes: Vec<Route>,
}

pub struct MemoryRouteStore {
	routes: RwLock<HashMap<RouteId, Route>>,
	snapshot_path: PathBuf,
	events: broadcast::Sender<StoreEvent>,
}

impl MemoryRouteStore {
	/// Loads `snapshot_path` if present. A missing or malformed snapshot is
	/// logged and treated as an empty store, never fatal.
	pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
		let snapshot_path = snapshot_path.into();
		let routes = Self::load_snapshot(&snapshot_path).unwrap_or_else(|e| {
			warn!(path = %snapshot_path.display(), error = %e, "failed to load route snapshot, starting empty");
			HashMap::new()
		});
		let (tx, _rx) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
		Self { routes: RwLock::new(routes), snapshot_path, events: tx }
	}

	fn load_snapshot(path: &PathBuf) -> Result<HashMap<RouteId, Route>, StoreError> {
		if !path.exists() {
			return Ok(HashMap::new());
		}
		let bytes = std::fs::read(path)?;
		let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
		Ok(snapshot.routes.into_iter().map(|r| (r.id.clone(), r)).collect())
	}

	/// Writes the current route set via write-tempfile-then-rename, so a
	/// reader never observes a partially-written snapshot. Failures are
	/// logged, not propagated: the in-memory upsert remains visible to
	/// readers even if this write fails.
	fn save_snapshot(&self, routes: &HashMap<RouteId, Route>) {
		let snapshot = Snapshot { timestamp: chrono::Utc::now(), routes: routes.values().cloned().collect() };
		if let Err(e) = self.write_snapshot_atomically(&snapshot) {
			warn!(path = %self.snapshot_path.display(), error = %e, "failed to persist route snapshot");
		}
	}

	fn write_snapshot_atomically(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
		if let Some(parent) = self.snapshot_path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let bytes = serde_json::to_vec_pretty(snapshot)?;
		let tmp_path = self.snapshot_path.with_extension("tmp");
		std::fs::write(&tmp_path, bytes)?;
		std::fs::rename(&tmp_path, &self.snapshot_path)?;
		Ok(())
	}
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
	async fn list(&self) -> Result<Vec<Route>, StoreError> {
		Ok(self.routes.read().unwrap().values().cloned().collect())
	}

	async fn get(&self, id: &str) -> Result<Option<Route>, StoreError> {
		Ok(self.routes.read().unwrap().get(id).cloned())
	}

	async fn put(&self, mut route: Route) -> Result<Route, StoreError> {
		route.validate()?;
		let now = chrono::Utc::now();
		let (route, is_new, snapshot_routes) = {
			let mut guard = self.routes.write().unwrap();
			let is_new = !guard.contains_key(&route.id);
			route.updated_at = now;
			route.created_at = if is_new { now } else { guard.get(&route.id).map(|r| r.created_at).unwrap_or(now) };
			guard.insert(route.id.clone(), route.clone());
			(route, is_new, guard.clone())
		};
		self.save_snapshot(&snapshot_routes);
		let event = if is_new { StoreEvent::Created(route.clone()) } else { StoreEvent::Updated(route.clone()) };
		let _ = self.events.send(event);
		Ok(route)
	}

	async fn delete(&self, id: &str) -> Result<bool, StoreError> {
		let (removed, snapshot_routes) = {
			let mut guard = self.routes.write().unwrap();
			let removed = guard.remove(id).is_some();
			(removed, guard.clone())
		};
		if removed {
			self.save_snapshot(&snapshot_routes);
			let _ = self.events.send(StoreEvent::Deleted(id.to_string()));
		}
		Ok(removed)
	}

	fn watch(&self) -> broadcast::Receiver<StoreEvent> {
		self.events.subscribe()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::route::Backend;

	fn route(id: &str) -> Route {
		let now = chrono::Utc::now();
		Route {
			id: id.to_string(),
			path: "/x".to_string(),
			methods: vec![crate::route::Method::Get],
			backends: vec![Backend {
				url: "http://localhost:9000".to_string(),
				weight: 100,
				health_check_path: "/healthz".to_string(),
				tls: None,
			}],
			priority: 0,
			strip_prefix: true,
			sticky_session: false,
			timeout_ms: 5000,
			retry_policy: Default::default(),
			circuit_breaker: Default::default(),
			middleware: vec![],
			matchers: vec![],
			created_at: now,
			updated_at: now,
		}
	}

	#[tokio::test]
	async fn put_then_get_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let store = MemoryRouteStore::new(dir.path().join("routes.snapshot.json"));
		let r = store.put(route("a")).await.unwrap();
		assert_eq!(store.get("a").await.unwrap().unwrap().id, r.id);
	}

	#[tokio::test]
	async fn put_sets_created_and_updated_then_update_preserves_created() {
		let dir = tempfile::tempdir().unwrap();
		let store = MemoryRouteStore::new(dir.path().join("routes.snapshot.json"));
		let first = store.put(route("a")).await.unwrap();
		let mut second = first.clone();
		second.priority = 5;
		let updated = store.put(second).await.unwrap();
		assert_eq!(updated.created_at, first.created_at);
		assert!(updated.updated_at >= first.updated_at);
	}

	#[tokio::test]
	async fn delete_removes_and_emits_event() {
		let dir = tempfile::tempdir().unwrap();
		let store = MemoryRouteStore::new(dir.path().join("routes.snapshot.json"));
		let mut watcher = store.watch();
		store.put(route("a")).await.unwrap();
		assert!(store.delete("a").await.unwrap());
		assert!(store.get("a").await.unwrap().is_none());

		let first = watcher.recv().await.unwrap();
		assert!(matches!(first, StoreEvent::Created(_)));
		let second = watcher.recv().await.unwrap();
		assert!(matches!(second, StoreEvent::Deleted(id) if id == "a"));
	}

	#[tokio::test]
	async fn snapshot_round_trips_through_a_new_store() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("routes.snapshot.json");
		let store = MemoryRouteStore::new(&path);
		store.put(route("a")).await.unwrap();
		store.put(route("b")).await.unwrap();

		let reloaded = MemoryRouteStore::new(&path);
		let mut ids: Vec<_> = reloaded.list().await.unwrap().into_iter().map(|r| r.id).collect();
		ids.sort();
		assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
	}

	#[tokio::test]
	async fn malformed_snapshot_is_treated_as_empty() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("routes.snapshot.json");
		std::fs::write(&path, b"not json").unwrap();
		let store = MemoryRouteStore::new(&path);
		assert!(store.list().await.unwrap().is_empty());
	}
}
