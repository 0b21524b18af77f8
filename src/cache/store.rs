//! In-memory keyed store of cached values, in-flight fetches and errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::clock::{Clock, TokioClock};
use crate::lock::lock;

use super::entry::{CacheEntry, CacheUpdate, InFlight, SharedFetch};

/// Outcome of [`QueryCache::join_or_begin`].
pub enum FetchSlot {
  /// A fetch for the key was already outstanding.
  Joined(InFlight),
  /// The caller's fetch was published and must be driven by the caller.
  Began(InFlight),
}

/// Shared, cloneable handle to the query cache.
///
/// Created once per application and handed to every query and mutation.
/// Entries live until deleted explicitly or expired by a subscription's
/// expiry timer; there is no size bound.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<CacheInner>,
}

struct CacheInner {
  entries: Mutex<HashMap<String, CacheEntry>>,
  clock: Arc<dyn Clock>,
  next_fetch_id: AtomicU64,
}

impl QueryCache {
  /// Create an empty cache using the tokio clock.
  pub fn new() -> Self {
    Self::with_clock(TokioClock::new())
  }

  pub fn with_clock(clock: impl Clock + 'static) -> Self {
    Self {
      inner: Arc::new(CacheInner {
        entries: Mutex::new(HashMap::new()),
        clock: Arc::new(clock),
        next_fetch_id: AtomicU64::new(1),
      }),
    }
  }

  /// Current time of the cache's clock in milliseconds.
  pub fn now(&self) -> u64 {
    self.inner.clock.now_millis()
  }

  fn entries(&self, op: &'static str) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    lock(&self.inner.entries, op)
  }

  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    self.entries("get").get(key).cloned()
  }

  /// Merge `update` into the entry for `key` and stamp it with the current time.
  pub fn put(&self, key: &str, update: CacheUpdate) {
    let now = self.now();
    let mut entries = self.entries("put");
    let entry = entries.entry(key.to_string()).or_default();
    apply(entry, update, now);
  }

  /// Remove the entry for `key`. Returns whether one existed.
  pub fn delete(&self, key: &str) -> bool {
    self.entries("delete").remove(key).is_some()
  }

  /// Return the outstanding fetch for `key`, or publish a new one built by
  /// `make` (which receives the fetch id). Check and publish happen under one
  /// lock, so at most one fetch per key is ever outstanding.
  pub fn join_or_begin<F>(&self, key: &str, make: F) -> FetchSlot
  where
    F: FnOnce(u64) -> SharedFetch,
  {
    let now = self.now();
    let mut entries = self.entries("join_or_begin");

    if let Some(in_flight) = entries.get(key).and_then(|e| e.promise.clone()) {
      debug!(key, fetch_id = in_flight.id, "joining in-flight fetch");
      return FetchSlot::Joined(in_flight);
    }

    let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
    let previous_timestamp = entries.get(key).map(|e| e.timestamp);
    let in_flight = InFlight {
      id,
      future: make(id),
      previous_timestamp,
    };

    let entry = entries.entry(key.to_string()).or_default();
    apply(entry, CacheUpdate::Pending(in_flight.clone()), now);
    debug!(key, fetch_id = id, "published new fetch");

    FetchSlot::Began(in_flight)
  }

  /// Record the terminal outcome of fetch `fetch_id`. The in-flight slot is
  /// only cleared if it still belongs to that fetch.
  pub fn settle(&self, key: &str, fetch_id: u64, update: CacheUpdate) {
    let now = self.now();
    let mut entries = self.entries("settle");
    let entry = entries.entry(key.to_string()).or_default();
    let other_fetch = entry.promise.take().filter(|p| p.id != fetch_id);
    apply(entry, update, now);
    entry.promise = other_fetch;
  }

  /// Withdraw a cancelled fetch, restoring the entry's previous timestamp.
  /// An entry that only existed for this fetch is removed.
  pub fn abandon(&self, key: &str, fetch_id: u64) {
    let mut entries = self.entries("abandon");
    let Some(entry) = entries.get_mut(key) else {
      return;
    };
    let Some(in_flight) = entry.promise.take_if(|p| p.id == fetch_id) else {
      return;
    };

    let created_by_fetch = match in_flight.previous_timestamp {
      Some(timestamp) => {
        entry.timestamp = timestamp;
        false
      }
      None => entry.value.is_none() && entry.error.is_none(),
    };
    if created_by_fetch {
      entries.remove(key);
    }
    debug!(key, fetch_id, "abandoned cancelled fetch");
  }

  /// Delete the entry if it has no fetch outstanding and has not been written
  /// for at least `cache_time` milliseconds.
  pub fn remove_expired(&self, key: &str, cache_time: u64) -> bool {
    let now = self.now();
    let mut entries = self.entries("remove_expired");

    let expired = entries
      .get(key)
      .is_some_and(|e| e.promise.is_none() && now.saturating_sub(e.timestamp) >= cache_time);
    if expired {
      entries.remove(key);
      info!(key, cache_time, "expired cache entry");
    }
    expired
  }

  pub fn contains(&self, key: &str) -> bool {
    self.entries("contains").contains_key(key)
  }

  pub fn keys(&self) -> Vec<String> {
    self.entries("keys").keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.entries("len").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn clear(&self) {
    self.entries("clear").clear();
  }
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for QueryCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryCache")
      .field("len", &self.len())
      .finish_non_exhaustive()
  }
}

fn apply(entry: &mut CacheEntry, update: CacheUpdate, now: u64) {
  match update {
    CacheUpdate::Pending(in_flight) => {
      entry.promise = Some(in_flight);
    }
    CacheUpdate::Resolved(value) => {
      *entry = CacheEntry {
        value: Some(value),
        ..CacheEntry::default()
      };
    }
    CacheUpdate::Failed(error) => {
      *entry = CacheEntry {
        error: Some(error),
        ..CacheEntry::default()
      };
    }
  }
  entry.timestamp = now;
}
