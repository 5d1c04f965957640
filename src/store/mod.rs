//! Route Store: the durable, watchable set of route definitions.
//! Two concrete implementations live in sibling
//! modules; both satisfy [`RouteStore`].

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::errors::StoreError;
use crate::route::{Route, RouteId};

#[derive(Clone, Debug)]
pub enum StoreEvent {
	Created(Route),
	Updated(Route),
	Deleted(RouteId),
}

impl StoreEvent {
	pub fn id(&self) -> &str {
		match self {
			StoreEvent::Created(r) | StoreEvent::Updated(r) => &r.id,
			StoreEvent::Deleted(id) => id,
		}
	}
}

/// Capability set a Route Store exposes to callers.
///
/// `watch()` hands back a broadcast receiver rather than a stream directly:
/// a subscriber that falls too far behind sees `RecvError::Lagged` on its
/// next `recv()`, which it is expected to treat as eviction and rejoin by
/// calling `watch()` again — mirrored on the [`crate::index::RouteIndex`]
/// refresh loop.
#[async_trait]
pub trait RouteStore: Send + Sync {
	async fn list(&self) -> Result<Vec<Route>, StoreError>;
	async fn get(&self, id: &str) -> Result<Option<Route>, StoreError>;
	/// Upserts `route`. Sets `created_at`/`updated_at` per the invariants in
	/// and emits `Created` or `Updated` accordingly.
	async fn put(&self, route: Route) -> Result<Route, StoreError>;
	async fn delete(&self, id: &str) -> Result<bool, StoreError>;
	fn watch(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Capacity of the broadcast channel backing `watch()`. Sized generously
/// relative to expected mutation rates; a subscriber that can't keep up with
/// this many buffered events before its next `recv()` is considered broken
/// and evicted rather than allowed to stall writers.
pub const WATCH_CHANNEL_CAPACITY: usize = 256;
