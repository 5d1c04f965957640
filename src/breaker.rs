//! Circuit Breaker Registry: one breaker per
//! (route-id, backend-url), hot-path state word plus a per-entry mutex for
//! transitions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use crate::route::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
	Closed,
	Open,
	HalfOpen,
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

struct BreakerEntry {
	/// Fast-path read: steady-state `Closed` calls never take `inner`.
	state_word: AtomicU8,
	/// Guards a HalfOpen window so only one concurrent call is admitted as
	/// the probe (P7); everything else observes `Open`.
	probe_in_flight: AtomicBool,
	inner: Mutex<BreakerInner>,
}

struct BreakerInner {
	requests: u32,
	failures: u32,
	opened_at: Option<Instant>,
}

impl BreakerEntry {
	fn new() -> Self {
		Self {
			state_word: AtomicU8::new(STATE_CLOSED),
			probe_in_flight: AtomicBool::new(false),
			inner: Mutex::new(BreakerInner { requests: 0, failures: 0, opened_at: None }),
		}
	}
}

/// Whether a call may proceed, and if so which logical state it was
/// admitted under (the proxy engine only needs to know `Denied` vs not, but
/// `HalfOpen` vs `Closed` matters for telling probes apart when recording).
pub enum Admission {
	Allowed(BreakerState),
	Denied,
}

pub struct BreakerRegistry {
	entries: RwLock<HashMap<(String, String), Arc<BreakerEntry>>>,
}

impl BreakerRegistry {
	pub fn new() -> Self {
		Self { entries: RwLock::new(HashMap::new()) }
	}

	fn entry(&self, route_id: &str, backend_url: &str) -> Arc<BreakerEntry> {
		let key = (route_id.to_string(), backend_url.to_string());
		if let Some(entry) = self.entries.read().unwrap().get(&key) {
			return entry.clone();
		}
		let mut guard = self.entries.write().unwrap();
		guard.entry(key).or_insert_with(|| Arc::new(BreakerEntry::new())).clone()
	}

	/// Drops breakers for backends no longer present on any route —
	/// called by the route index refresh with the current
	/// (route-id, backend-url) pairs still live.
	pub fn retain(&self, live_keys: &std::collections::HashSet<(String, String)>) {
		self.entries.write().unwrap().retain(|k, _| live_keys.contains(k));
	}

	/// `canExecute`: the hot path for `Closed`/`HalfOpen`, reading only the
	/// atomic state word unless a transition check or HalfOpen admission is
	/// needed.
	pub fn admit(&self, route_id: &str, backend_url: &str, cfg: &CircuitBreakerConfig) -> Admission {
		if !cfg.enabled {
			return Admission::Allowed(BreakerState::Closed);
		}
		let entry = self.entry(route_id, backend_url);
		match entry.state_word.load(Ordering::Acquire) {
			STATE_CLOSED => Admission::Allowed(BreakerState::Closed),
			STATE_OPEN => self.maybe_transition_to_half_open(&entry, cfg),
			_ => self.admit_half_open(&entry),
		}
	}

	fn maybe_transition_to_half_open(&self, entry: &Arc<BreakerEntry>, cfg: &CircuitBreakerConfig) -> Admission {
		let mut inner = entry.inner.lock().unwrap();
		let elapsed = inner.opened_at.map(|t| t.elapsed().as_millis() as u64).unwrap_or(0);
		if elapsed < cfg.timeout_ms {
			return Admission::Denied;
		}
		entry.state_word.store(STATE_HALF_OPEN, Ordering::Release);
		drop(inner);
		self.admit_half_open(entry)
	}

	fn admit_half_open(&self, entry: &Arc<BreakerEntry>) -> Admission {
		if entry
			.probe_in_flight
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
		{
			Admission::Allowed(BreakerState::HalfOpen)
		} else {
			Admission::Denied
		}
	}

	/// Records the outcome of an admitted call. `failure = true` covers
	/// upstream 5xx, transport error, and timeout; a
	/// breaker-denied call is never recorded here, to avoid positive
	/// feedback. Returns `true` exactly when this call is the one that trips
	/// the breaker open, so callers can count opens rather than denials.
	pub fn record(&self, route_id: &str, backend_url: &str, admitted_as: BreakerState, failure: bool, cfg: &CircuitBreakerConfig) -> bool {
		if !cfg.enabled {
			return false;
		}
		let entry = self.entry(route_id, backend_url);
		match admitted_as {
			BreakerState::HalfOpen => {
				entry.probe_in_flight.store(false, Ordering::Release);
				let mut inner = entry.inner.lock().unwrap();
				if failure {
					inner.opened_at = Some(Instant::now());
					entry.state_word.store(STATE_OPEN, Ordering::Release);
					true
				} else {
					inner.requests = 0;
					inner.failures = 0;
					inner.opened_at = None;
					entry.state_word.store(STATE_CLOSED, Ordering::Release);
					false
				}
			},
			BreakerState::Closed => {
				let mut inner = entry.inner.lock().unwrap();
				inner.requests += 1;
				if failure {
					inner.failures += 1;
				}
				if inner.requests >= cfg.minimum_requests
					&& (inner.failures as u64 * 100) >= (cfg.failure_threshold as u64 * inner.requests as u64)
				{
					inner.opened_at = Some(Instant::now());
					entry.state_word.store(STATE_OPEN, Ordering::Release);
					true
				} else {
					false
				}
			},
			BreakerState::Open => false,
		}
	}
}

impl Default for BreakerRegistry {
	fn default() -> Self {
		Self::new()
	}
}
