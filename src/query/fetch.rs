//! The fetch algorithm shared by activation and `refetch()`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{downcast, AnyValue, CacheUpdate, FetchSlot, QueryCache, SharedFetch};
use crate::error::{QueryError, Result};
use crate::lock::lock;
use crate::retry::run_with_retry;
use crate::signal::AbortSignal;

use super::options::QueryOptions;
use super::state::{QueryState, Status};

/// Boxed fetch operation. Receives the cancellation signal of the attempt.
pub(crate) type Fetcher<T> = Arc<dyn Fn(AbortSignal) -> BoxFuture<'static, Result<T>> + Send + Sync>;

pub(crate) fn boxed_fetcher<T, E, F, Fut>(fetcher: F) -> Fetcher<T>
where
  F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
  E: std::fmt::Display + Send + 'static,
{
  Arc::new(move |signal| {
    let fut = fetcher(signal);
    async move { fut.await.map_err(QueryError::transport) }.boxed()
  })
}

/// Expiry check owned by a subscription.
#[derive(Clone, Default)]
pub(crate) struct ExpiryTimer {
  handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ExpiryTimer {
  /// (Re)schedule deletion of `key` at its last write + `cache_time`.
  ///
  /// The timer keeps watching the entry until it is deleted: a fetch in
  /// flight at the deadline is awaited, and a refreshed or restored
  /// timestamp moves the deadline.
  pub fn arm(&self, cache: &QueryCache, key: &str, cache_time: Option<u64>) {
    let mut slot = lock(&self.handle, "expiry.arm");
    if let Some(previous) = slot.take() {
      previous.abort();
    }

    let Some(cache_time) = cache_time else {
      return;
    };
    if !cache.contains(key) {
      return;
    }

    let cache = cache.clone();
    let key = key.to_string();

    *slot = Some(tokio::spawn(async move {
      while let Some(entry) = cache.get(&key) {
        if let Some(in_flight) = entry.promise() {
          // Settled or withdrawn, the entry is re-read either way
          let _ = in_flight.future().await;
          continue;
        }

        let cleanup_at = entry.timestamp().saturating_add(cache_time);
        let wait = cleanup_at.saturating_sub(cache.now());
        tokio::time::sleep(Duration::from_millis(wait)).await;
        if cache.remove_expired(&key, cache_time) {
          return;
        }
      }
    }));
  }

  pub fn cancel(&self) {
    if let Some(handle) = lock(&self.handle, "expiry.cancel").take() {
      handle.abort();
    }
  }
}

/// Everything a fetch needs, detached from the subscription handle so that a
/// running fetch does not keep the subscription alive.
pub(crate) struct FetchContext<T> {
  pub cache: QueryCache,
  pub key: String,
  pub fetcher: Fetcher<T>,
  pub options: QueryOptions<T>,
  pub state: Arc<watch::Sender<QueryState<T>>>,
  pub expiry: ExpiryTimer,
  /// Key generation this context was built for
  pub generation: u64,
  /// Bumped by the subscription whenever its key changes
  pub current_generation: Arc<AtomicU64>,
}

impl<T: Send + Sync + 'static> FetchContext<T> {
  /// Fetch-or-join for this key. A cancelled run leaves state, cache and
  /// callbacks untouched and returns [`QueryError::Cancelled`].
  pub async fn run(&self, signal: AbortSignal) -> Result<Arc<T>> {
    if signal.is_aborted() {
      return Err(QueryError::Cancelled);
    }

    self.state.send_modify(|state| {
      state.status = Status::Loading;
      state.is_fetching = true;
      state.error = None;
    });

    loop {
      let slot = self
        .cache
        .join_or_begin(&self.key, |id| self.physical_fetch(id, signal.clone()));
      let (in_flight, owner) = match slot {
        FetchSlot::Began(in_flight) => (in_flight, true),
        FetchSlot::Joined(in_flight) => (in_flight, false),
      };

      let outcome = tokio::select! {
        biased;
        _ = signal.aborted() => {
          if owner {
            self.cache.abandon(&self.key, in_flight.id());
          }
          return Err(QueryError::Cancelled);
        }
        outcome = in_flight.future() => outcome,
      };

      if signal.is_aborted() {
        return Err(QueryError::Cancelled);
      }

      match outcome.and_then(|value| downcast::<T>(&self.key, value)) {
        Ok(data) => {
          self.succeed(&data, owner);
          return Ok(data);
        }
        // The owner of the fetch we joined went away; start our own.
        Err(QueryError::Cancelled) if !owner => {
          debug!(key = %self.key, "joined fetch was cancelled, fetching again");
          continue;
        }
        Err(QueryError::Cancelled) => return Err(QueryError::Cancelled),
        Err(error) => {
          self.fail(&error, owner);
          return Err(error);
        }
      }
    }
  }

  /// The retry chain for one physical fetch, published so that every
  /// subscriber of the key awaits the same outcome. Writes the outcome into
  /// the cache before any waiter resumes.
  fn physical_fetch(&self, fetch_id: u64, signal: AbortSignal) -> SharedFetch {
    let cache = self.cache.clone();
    let key = self.key.clone();
    let fetcher = Arc::clone(&self.fetcher);
    let retry = self.options.retry.clone();
    let retry_delay = self.options.retry_delay.clone();

    async move {
      debug!(key = %key, fetch_id, "fetching");
      let chain = run_with_retry(
        &key,
        &retry,
        &retry_delay,
        |_| fetcher(signal.clone()),
        |_, _| {},
      );

      let outcome: Result<AnyValue> = tokio::select! {
        biased;
        _ = signal.aborted() => Err(QueryError::Cancelled),
        result = chain => result.map(|data| Arc::new(data) as AnyValue),
      };

      match &outcome {
        Ok(value) => {
          cache.settle(&key, fetch_id, CacheUpdate::Resolved(Arc::clone(value)));
          info!(key = %key, fetch_id, "fetch succeeded");
        }
        Err(QueryError::Cancelled) => cache.abandon(&key, fetch_id),
        Err(error) => {
          cache.settle(&key, fetch_id, CacheUpdate::Failed(error.clone()));
          info!(key = %key, fetch_id, error = %error, "fetch failed");
        }
      }
      outcome
    }
    .boxed()
    .shared()
  }

  /// Whether the subscription still points at the key this fetch was for.
  /// Outcomes for a key it has moved away from reach the caller only.
  fn is_current(&self) -> bool {
    let current = self.current_generation.load(Ordering::Acquire) == self.generation;
    if !current {
      debug!(key = %self.key, "key changed during fetch, leaving state alone");
    }
    current
  }

  fn succeed(&self, data: &Arc<T>, owner: bool) {
    if !self.is_current() {
      return;
    }
    self.state.send_replace(QueryState::success(Arc::clone(data)));
    self.arm_expiry();

    if owner {
      if let Some(on_success) = &self.options.on_success {
        on_success(&**data);
      }
      if let Some(on_settled) = &self.options.on_settled {
        on_settled(Some(&**data), None);
      }
    }
  }

  fn fail(&self, error: &QueryError, owner: bool) {
    if !self.is_current() {
      return;
    }
    self.state.send_replace(QueryState::failure(error.clone()));
    self.arm_expiry();

    if owner {
      if let Some(on_error) = &self.options.on_error {
        on_error(error);
      }
      if let Some(on_settled) = &self.options.on_settled {
        on_settled(None, Some(error));
      }
    }
  }

  fn arm_expiry(&self) {
    self
      .expiry
      .arm(&self.cache, &self.key, self.options.cache_time_millis());
  }
}
