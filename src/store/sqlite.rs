//! SQLite-backed Route Store: a single `routes` table indexed on the
//! JSON-extracted `path` and `priority` fields.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

use crate::errors::StoreError;
use crate::route::Route;
use crate::store::{RouteStore, StoreEvent, WATCH_CHANNEL_CAPACITY};

pub struct SqliteRouteStore {
	pool: SqlitePool,
	events: broadcast::Sender<StoreEvent>,
}

impl SqliteRouteStore {
	pub async fn connect(db_path: &str) -> Result<Self, StoreError> {
		let options = SqliteConnectOptions::new().filename(db_path).create_if_missing(true);
		let pool = SqlitePoolOptions::new().max_connections(8).connect_with(options).await?;
		init_schema(&pool).await?;
		let (tx, _rx) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
		Ok(Self { pool, events: tx })
	}

	fn row_to_route(spec_json: &str) -> Result<Route, StoreError> {
		Ok(serde_json::from_str(spec_json)?)
	}
}

async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
	let mut tx = pool.begin().await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS routes (
			id TEXT PRIMARY KEY,
			spec TEXT NOT NULL,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query("CREATE INDEX IF NOT EXISTS idx_routes_path ON routes(json_extract(spec, '$.path'))")
		.execute(&mut *tx)
		.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_routes_priority ON routes(json_extract(spec, '$.priority'))")
		.execute(&mut *tx)
		.await?;

	tx.commit().await?;
	Ok(())
}

#[async_trait]
impl RouteStore for SqliteRouteStore {
	async fn list(&self) -> Result<Vec<Route>, StoreError> {
		let rows = sqlx::query("SELECT spec FROM routes ORDER BY id").fetch_all(&self.pool).await?;
		rows.iter().map(|r| Self::row_to_route(r.get::<String, _>("spec").as_str())).collect()
	}

	async fn get(&self, id: &str) -> Result<Option<Route>, StoreError> {
		let row = sqlx::query("SELECT spec FROM routes WHERE id = ?")
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|r| Self::row_to_route(r.get::<String, _>("spec").as_str())).transpose()
	}

	async fn put(&self, mut route: Route) -> Result<Route, StoreError> {
		route.validate()?;
		// A `put` that inserts vs. updates is distinguished by a pre-read
		// inside the same transaction.
		let mut tx = self.pool.begin().await?;
		let existing = sqlx::query("SELECT spec FROM routes WHERE id = ?")
			.bind(&route.id)
			.fetch_optional(&mut *tx)
			.await?;
		let is_new = existing.is_none();
		let now = chrono::Utc::now();
		route.updated_at = now;
		route.created_at = match &existing {
			Some(row) => Self::row_to_route(row.get::<String, _>("spec"))?.created_at,
			None => now,
		};
		let spec_json = serde_json::to_string(&route)?;
		if is_new {
			sqlx::query("INSERT INTO routes (id, spec, created_at, updated_at) VALUES (?, ?, ?, ?)")
				.bind(&route.id)
				.bind(&spec_json)
				.bind(route.created_at)
				.bind(route.updated_at)
				.execute(&mut *tx)
				.await?;
		} else {
			sqlx::query("UPDATE routes SET spec = ?, updated_at = ? WHERE id = ?")
				.bind(&spec_json)
				.bind(route.updated_at)
				.bind(&route.id)
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;

		let event = if is_new { StoreEvent::Created(route.clone()) } else { StoreEvent::Updated(route.clone()) };
		let _ = self.events.send(event);
		Ok(route)
	}

	async fn delete(&self, id: &str) -> Result<bool, StoreError> {
		let result = sqlx::query("DELETE FROM routes WHERE id = ?").bind(id).execute(&self.pool).await?;
		let removed = result.rows_affected() > 0;
		if removed {
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
	async fn put_get_delete_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let db_path = dir.path().join("routes.db");
		let store = SqliteRouteStore::connect(db_path.to_str().unwrap()).await.unwrap();

		let r = store.put(route("a")).await.unwrap();
		assert_eq!(store.get("a").await.unwrap().unwrap().id, r.id);
		assert!(store.delete("a").await.unwrap());
		assert!(store.get("a").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn update_preserves_created_at() {
		let dir = tempfile::tempdir().unwrap();
		let db_path = dir.path().join("routes.db");
		let store = SqliteRouteStore::connect(db_path.to_str().unwrap()).await.unwrap();

		let first = store.put(route("a")).await.unwrap();
		let mut second = first.clone();
		second.priority = 7;
		let updated = store.put(second).await.unwrap();
		assert_eq!(updated.created_at, first.created_at);
	}
}
