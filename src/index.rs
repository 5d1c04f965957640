//! Route Index: an immutable, priority-sorted snapshot
//! of the store, rebuilt on every store event and on a coarse timer.
//! MVCC via atomic pointer replacement: readers hold an `Arc` clone for the
//! duration of their lookup, a concurrent rebuild never blocks them.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::breaker::BreakerRegistry;
use crate::matcher::{self, MatchInput};
use crate::route::{sort_key, Method, Route};
use crate::selector::BackendSelector;
use crate::store::{RouteStore, StoreEvent};

/// Belt-and-braces resync interval in case watch events are missed
/// (target refresh latency: a few tens of seconds).
const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

pub struct RouteIndex {
	snapshot: RwLock<Arc<Vec<Route>>>,
}

impl RouteIndex {
	pub fn new() -> Self {
		Self { snapshot: RwLock::new(Arc::new(Vec::new())) }
	}

	/// Returns the current snapshot. Readers hold this `Arc` for the
	/// duration of their lookup; a concurrent rebuild never blocks them.
	pub fn snapshot(&self) -> Arc<Vec<Route>> {
		self.snapshot.read().unwrap().clone()
	}

	fn replace(&self, mut routes: Vec<Route>) {
		routes.sort_by_key(sort_key);
		*self.snapshot.write().unwrap() = Arc::new(routes);
	}

	/// Walks the sequence in priority order and returns the first route
	/// whose `path` prefixes the request path, whose methods include the
	/// request method, and whose matchers all pass.
	pub fn lookup(&self, method: &http::Method, path: &str, input: &MatchInput<'_>) -> Option<Route> {
		let Some(method) = Method::from_http(method) else { return None };
		let snapshot = self.snapshot();
		snapshot
			.iter()
			.find(|r| {
				path.starts_with(r.path.as_str())
					&& r.methods.contains(&method)
					&& matcher::matches(&r.matchers, input)
			})
			.cloned()
	}

	/// Ids of every route in the current snapshot, used to diff against a
	/// prior snapshot after a resync or event so removed routes can be
	/// pruned from the backend selector's per-route state.
	fn route_ids(&self) -> HashSet<String> {
		self.snapshot().iter().map(|r| r.id.clone()).collect()
	}

	/// Drops breaker entries for (route, backend) pairs no longer present in
	/// the current snapshot and forgets the selector's round-robin counter
	/// for any route that disappeared since `previous_ids` was captured.
	fn prune_registries(&self, breakers: &BreakerRegistry, selector: &BackendSelector, previous_ids: &HashSet<String>) {
		let snapshot = self.snapshot();
		let live_keys: HashSet<(String, String)> = snapshot
			.iter()
			.flat_map(|route| {
				route.backends.iter().filter_map(move |backend| {
					backend.authority().ok().map(|authority| (route.id.clone(), authority))
				})
			})
			.collect();
		breakers.retain(&live_keys);

		let current_ids: HashSet<String> = snapshot.iter().map(|r| r.id.clone()).collect();
		for removed in previous_ids.difference(&current_ids) {
			selector.forget(removed);
		}
	}

	/// Rebuilds the snapshot from a full `store.list()`. Used for the
	/// initial load and the coarse periodic resync.
	async fn resync(&self, store: &dyn RouteStore) {
		match store.list().await {
			Ok(routes) => self.replace(routes),
			Err(e) => warn!(error = %e, "route index resync failed; keeping previous snapshot"),
		}
	}

	/// Applies a single watch event to the current snapshot without a full
	/// store read, keeping the hot path cheap under frequent small edits.
	fn apply_event(&self, event: StoreEvent) {
		let mut routes = (*self.snapshot()).clone();
		match event {
			StoreEvent::Created(route) | StoreEvent::Updated(route) => {
				routes.retain(|r| r.id != route.id);
				routes.push(route);
			},
			StoreEvent::Deleted(id) => {
				routes.retain(|r| r.id != id);
			},
		}
		self.replace(routes);
	}

	/// Drives the index for the lifetime of the process: an initial full
	/// load, then a `tokio::select!` over the store's watch stream, a
	/// coarse refresh ticker, and cancellation. On every snapshot change,
	/// prunes the breaker registry and backend selector of state for
	/// backends/routes that are no longer live.
	pub async fn run(
		self: Arc<Self>,
		store: Arc<dyn RouteStore>,
		cancel: CancellationToken,
		breakers: Arc<BreakerRegistry>,
		selector: Arc<BackendSelector>,
	) {
		self.resync(store.as_ref()).await;
		self.prune_registries(&breakers, &selector, &HashSet::new());
		let mut events = store.watch();
		let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
		ticker.tick().await; // first tick fires immediately; skip it, resync already ran

		loop {
			tokio::select! {
				_ = cancel.cancelled() => {
					debug!("route index refresh loop shutting down");
					return;
				}
				_ = ticker.tick() => {
					let previous_ids = self.route_ids();
					self.resync(store.as_ref()).await;
					self.prune_registries(&breakers, &selector, &previous_ids);
				}
				event = events.recv() => {
					match event {
						Ok(event) => {
							let previous_ids = self.route_ids();
							self.apply_event(event);
							self.prune_registries(&breakers, &selector, &previous_ids);
						}
						Err(broadcast::error::RecvError::Lagged(_)) => {
							warn!("route index watch subscriber lagged; resubscribing and resyncing");
							events = store.watch();
							let previous_ids = self.route_ids();
							self.resync(store.as_ref()).await;
							self.prune_registries(&breakers, &selector, &previous_ids);
						}
						Err(broadcast::error::RecvError::Closed) => {
							warn!("route store watch channel closed; route index will only refresh on the timer");
							// Degrade to timer-only refresh rather than busy-looping on a
							// channel that will never produce again.
							loop {
								tokio::select! {
									_ = cancel.cancelled() => return,
									_ = ticker.tick() => {
										let previous_ids = self.route_ids();
										self.resync(store.as_ref()).await;
										self.prune_registries(&breakers, &selector, &previous_ids);
									}
								}
							}
						}
					}
				}
			}
		}
	}
}

impl Default for RouteIndex {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::route::Backend;
	use std::collections::HashMap;

	fn route(id: &str, path: &str, priority: u32) -> Route {
		let now = chrono::Utc::now();
		Route {
			id: id.to_string(),
			path: path.to_string(),
			methods: vec![Method::Get],
			backends: vec![Backend {
				url: "http://localhost:9000".to_string(),
				weight: 100,
				health_check_path: "/healthz".to_string(),
				tls: None,
			}],
			priority,
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

	fn empty_input<'a>(
		headers: &'a http::HeaderMap,
		query: &'a HashMap<String, String>,
		cookies: &'a HashMap<String, String>,
	) -> MatchInput<'a> {
		MatchInput { headers, query, cookies }
	}

	#[test]
	fn longer_path_wins_tie_on_priority() {
		let index = RouteIndex::new();
		index.replace(vec![route("a", "/", 0), route("b", "/a", 0)]);

		let headers = http::HeaderMap::new();
		let query = HashMap::new();
		let cookies = HashMap::new();
		let input = empty_input(&headers, &query, &cookies);

		let found = index.lookup(&http::Method::GET, "/a/b", &input).unwrap();
		assert_eq!(found.id, "b");
	}

	#[test]
	fn higher_priority_wins_even_with_shorter_path() {
		let index = RouteIndex::new();
		index.replace(vec![route("a", "/", 0), route("b", "/a", 0), route("c", "/", 10)]);

		let headers = http::HeaderMap::new();
		let query = HashMap::new();
		let cookies = HashMap::new();
		let input = empty_input(&headers, &query, &cookies);

		let found = index.lookup(&http::Method::GET, "/a/b", &input).unwrap();
		assert_eq!(found.id, "c");
	}

	#[test]
	fn no_match_returns_none() {
		let index = RouteIndex::new();
		index.replace(vec![route("a", "/x", 0)]);

		let headers = http::HeaderMap::new();
		let query = HashMap::new();
		let cookies = HashMap::new();
		let input = empty_input(&headers, &query, &cookies);

		assert!(index.lookup(&http::Method::GET, "/y", &input).is_none());
	}

	#[test]
	fn apply_event_updates_snapshot_without_full_resync() {
		let index = RouteIndex::new();
		index.replace(vec![route("a", "/x", 0)]);
		index.apply_event(StoreEvent::Deleted("a".to_string()));
		assert!(index.snapshot().is_empty());

		index.apply_event(StoreEvent::Created(route("b", "/y", 0)));
		assert_eq!(index.snapshot().len(), 1);
		assert_eq!(index.snapshot()[0].id, "b");
	}

	#[test]
	fn prune_registries_evicts_breaker_entry_for_removed_backend() {
		use crate::breaker::{Admission, BreakerRegistry};
		use crate::route::CircuitBreakerConfig;
		use crate::selector::BackendSelector;

		let index = RouteIndex::new();
		let breakers = BreakerRegistry::new();
		let selector = BackendSelector::new();
		let mut live = route("a", "/x", 0);
		live.circuit_breaker = CircuitBreakerConfig { enabled: true, failure_threshold: 50, minimum_requests: 1, interval_ms: 60_000, timeout_ms: 30_000 };
		let authority = live.backends[0].authority().unwrap();

		index.replace(vec![live.clone()]);
		// Trip the breaker open for this (route, backend) pair.
		let Admission::Allowed(state) = breakers.admit(&live.id, &authority, &live.circuit_breaker) else { panic!() };
		breakers.record(&live.id, &authority, state, true, &live.circuit_breaker);
		assert!(matches!(breakers.admit(&live.id, &authority, &live.circuit_breaker), Admission::Denied));

		// The route is removed from the index; pruning should drop the
		// tripped entry rather than let it linger forever.
		let previous_ids: HashSet<String> = [live.id.clone()].into_iter().collect();
		index.replace(vec![]);
		index.prune_registries(&breakers, &selector, &previous_ids);

		assert!(matches!(
			breakers.admit(&live.id, &authority, &live.circuit_breaker),
			Admission::Allowed(crate::breaker::BreakerState::Closed)
		));
	}

	#[test]
	fn prune_registries_forgets_selector_counter_for_removed_route() {
		use crate::breaker::BreakerRegistry;
		use crate::selector::BackendSelector;

		let index = RouteIndex::new();
		let breakers = BreakerRegistry::new();
		let selector = BackendSelector::new();
		let live = route("a", "/x", 0);

		index.replace(vec![live.clone()]);
		for _ in 0..5 {
			selector.select(&live, None);
		}

		let previous_ids: HashSet<String> = [live.id.clone()].into_iter().collect();
		index.replace(vec![]);
		index.prune_registries(&breakers, &selector, &previous_ids);

		// Re-adding the same route id should start its counter from zero
		// again rather than continuing where the forgotten one left off.
		index.replace(vec![live.clone()]);
		let picked = selector.select(&live, None).unwrap();
		assert_eq!(picked.url, live.backends[0].url);
	}
}
