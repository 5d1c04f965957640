//! Backend Selector: weighted deterministic
//! round-robin, with a sticky-session-by-source-address fallback.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::route::{Backend, Route};

/// Per-route monotonic counters, keyed by route id. A counter survives
/// weight changes to the same route ; it is only created lazily on first selection.
#[derive(Default)]
pub struct BackendSelector {
	counters: RwLock<HashMap<String, AtomicU64>>,
}

impl BackendSelector {
	pub fn new() -> Self {
		Self::default()
	}

	/// Picks one backend for this attempt. `client_addr` is consulted only
	/// when `route.sticky_session` is set.
	pub fn select<'a>(&self, route: &'a Route, client_addr: Option<IpAddr>) -> Option<&'a Backend> {
		let selectable: Vec<&Backend> = route.backends.iter().filter(|b| b.weight > 0).collect();
		if selectable.is_empty() {
			return None;
		}

		if route.sticky_session {
			if let Some(addr) = client_addr {
				let idx = (hash_addr(addr) as usize) % selectable.len();
				return Some(selectable[idx]);
			}
		}

		let total_weight: u64 = selectable.iter().map(|b| b.weight as u64).sum();
		let counter = self.next_count(&route.id);
		let target = counter % total_weight;
		let mut cumulative = 0u64;
		for backend in &selectable {
			cumulative += backend.weight as u64;
			if target < cumulative {
				return Some(backend);
			}
		}
		selectable.last().copied()
	}

	fn next_count(&self, route_id: &str) -> u64 {
		{
			let counters = self.counters.read().unwrap();
			if let Some(counter) = counters.get(route_id) {
				return counter.fetch_add(1, Ordering::Relaxed);
			}
		}
		let mut counters = self.counters.write().unwrap();
		let counter = counters.entry(route_id.to_string()).or_insert_with(|| AtomicU64::new(0));
		counter.fetch_add(1, Ordering::Relaxed)
	}

	/// Drops the counter for a route no longer present in the index, so the
	/// registry doesn't grow unboundedly across route churn.
	pub fn forget(&self, route_id: &str) {
		self.counters.write().unwrap().remove(route_id);
	}
}

fn hash_addr(addr: IpAddr) -> u64 {
	let mut hasher = std::collections::hash_map::DefaultHasher::new();
	addr.hash(&mut hasher);
	hasher.finish()
}
