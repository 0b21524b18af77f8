//! Cached, deduplicated queries bound to a subscription lifecycle.
//!
//! Inspired by TanStack Query, a [`Query<T>`] is one call site's view of a
//! keyed, shared cache entry. It owns its own state and options; concurrent
//! subscriptions to the same key share one physical fetch.
//!
//! # Example
//!
//! ```ignore
//! let api = api.clone();
//! let mut posts = client.query("posts", move |signal| {
//!     let api = api.clone();
//!     async move { api.fetch_posts(signal).await }
//! }, QueryOptions::new().with_stale_time(Duration::from_secs(3)));
//!
//! // Activate: fetches unless a fresh value is cached
//! posts.subscribe();
//!
//! // In event loop tick
//! if posts.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // Tear down: cancels the outstanding fetch and the expiry timer
//! posts.unsubscribe();
//! ```

mod fetch;
mod options;
mod state;

pub use options::{QueryOptions, RefetchOnMount, DEFAULT_CACHE_TIME, DEFAULT_QUERY_RETRY};
pub use state::{QueryState, Status};

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

use crate::cache::QueryCache;
use crate::error::{QueryError, Result};
use crate::key::QueryKey;
use crate::lock::lock;
use crate::signal::{AbortController, AbortSignal};

use fetch::{boxed_fetcher, ExpiryTimer, FetchContext, Fetcher};

/// One subscription to a keyed query.
///
/// Clones share the subscription. Dropping the last clone tears it down like
/// [`Query::unsubscribe`].
pub struct Query<T> {
  inner: Arc<QueryInner<T>>,
  state_rx: watch::Receiver<QueryState<T>>,
}

struct QueryInner<T> {
  cache: QueryCache,
  fetcher: Fetcher<T>,
  config: Mutex<QueryConfig<T>>,
  state: Arc<watch::Sender<QueryState<T>>>,
  lifecycle: Mutex<Lifecycle>,
  expiry: ExpiryTimer,
  key_generation: Arc<AtomicU64>,
}

struct QueryConfig<T> {
  key: QueryKey,
  options: QueryOptions<T>,
}

struct Lifecycle {
  subscribed: bool,
  /// Cancels everything this subscription started, including `refetch()`
  lifetime: AbortController,
  /// Cancels the fetch started by the latest activation
  effect: Option<AbortController>,
}

impl<T: Send + Sync + 'static> Query<T> {
  /// Create an inactive subscription. Nothing is fetched until
  /// [`subscribe`](Self::subscribe) or [`refetch`](Self::refetch).
  ///
  /// The fetcher receives a cancellation signal and should abort its I/O when
  /// it fires; results of a cancelled fetch are discarded either way.
  pub fn new<F, Fut, E>(
    cache: QueryCache,
    key: impl Into<QueryKey>,
    fetcher: F,
    options: QueryOptions<T>,
  ) -> Self
  where
    F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
  {
    let (tx, rx) = watch::channel(QueryState::initial(options.enabled));

    Self {
      inner: Arc::new(QueryInner {
        cache,
        fetcher: boxed_fetcher(fetcher),
        config: Mutex::new(QueryConfig {
          key: key.into(),
          options,
        }),
        state: Arc::new(tx),
        lifecycle: Mutex::new(Lifecycle {
          subscribed: false,
          lifetime: AbortController::new(),
          effect: None,
        }),
        expiry: ExpiryTimer::default(),
        key_generation: Arc::new(AtomicU64::new(0)),
      }),
      state_rx: rx,
    }
  }

  /// Activate the subscription. No-op if already active.
  ///
  /// Reuses a cached value when it is fresh enough, otherwise fetches (or
  /// joins a fetch already in flight for the key). Fetch failures end up in
  /// the state; nothing is returned to the caller.
  pub fn subscribe(&self) {
    {
      let mut lifecycle = lock(&self.inner.lifecycle, "query.subscribe");
      if lifecycle.subscribed {
        return;
      }
      lifecycle.subscribed = true;
      if lifecycle.lifetime.is_aborted() {
        lifecycle.lifetime = AbortController::new();
      }
    }
    self.inner.activate();
    self.inner.arm_expiry();
  }

  /// Tear down: cancel outstanding fetches and the expiry timer. A cancelled
  /// fetch writes nothing to the cache or state and fires no callbacks.
  pub fn unsubscribe(&self) {
    self.inner.teardown();
  }

  pub fn is_subscribed(&self) -> bool {
    lock(&self.inner.lifecycle, "query.is_subscribed").subscribed
  }

  /// Point the subscription at another key, re-running activation if the
  /// key actually changed.
  pub fn set_key(&self, key: impl Into<QueryKey>) {
    let key = key.into();
    let changed = {
      let mut config = lock(&self.inner.config, "query.set_key");
      let changed = config.key != key;
      if changed {
        config.key = key;
        self.inner.key_generation.fetch_add(1, Ordering::AcqRel);
      }
      changed
    };
    if changed && self.is_subscribed() {
      self.inner.activate();
      self.inner.arm_expiry();
    }
  }

  /// Replace the options. Activation re-runs if `enabled`, `stale_time` or
  /// `refetch_on_mount` changed; the expiry timer is re-armed if
  /// `cache_time` changed.
  pub fn set_options(&self, options: QueryOptions<T>) {
    let (mount_changed, cache_time_changed) = {
      let mut config = lock(&self.inner.config, "query.set_options");
      let mount_changed = config.options.mount_deps() != options.mount_deps();
      let cache_time_changed = config.options.cache_time != options.cache_time;
      config.options = options;
      (mount_changed, cache_time_changed)
    };
    if !self.is_subscribed() {
      return;
    }
    if mount_changed {
      self.inner.activate();
    }
    if cache_time_changed {
      self.inner.arm_expiry();
    }
  }

  /// Re-run activation as if a dependency had changed.
  pub fn dependencies_changed(&self) {
    if self.is_subscribed() {
      self.inner.activate();
      self.inner.arm_expiry();
    }
  }

  /// Fetch now, ignoring staleness. Joins a fetch already in flight for the
  /// key. Unlike activation, failures are returned to the caller.
  ///
  /// The key is fixed when this is called. If the subscription moves to
  /// another key before the fetch settles, the outcome is still written to
  /// the cache and returned, but the state, expiry timer and callbacks are
  /// left to the new key.
  pub fn refetch(&self) -> impl Future<Output = Result<Arc<T>>> + Send + 'static {
    let ctx = self.inner.context();
    let signal = lock(&self.inner.lifecycle, "query.refetch")
      .lifetime
      .signal();
    async move { ctx.run(signal).await }
  }

  pub fn key(&self) -> QueryKey {
    lock(&self.inner.config, "query.key").key.clone()
  }

  pub fn cache(&self) -> &QueryCache {
    &self.inner.cache
  }

  /// Snapshot of the current state.
  pub fn state(&self) -> QueryState<T> {
    self.state_rx.borrow().clone()
  }

  /// Returns `true` if the state changed since the last `poll()`.
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let changed = self.state_rx.has_changed().unwrap_or(false);
    if changed {
      self.state_rx.borrow_and_update();
    }
    changed
  }

  /// Wait for the next state change.
  pub async fn changed(&mut self) -> QueryState<T> {
    // The sender lives as long as `self`, so this cannot fail.
    let _ = self.state_rx.changed().await;
    self.state_rx.borrow_and_update().clone()
  }

  /// Wait until no fetch is outstanding for this subscription.
  pub async fn settled(&mut self) -> QueryState<T> {
    let _ = self.state_rx.wait_for(|state| !state.is_fetching).await;
    self.state()
  }

  pub fn data(&self) -> Option<Arc<T>> {
    self.state_rx.borrow().data.clone()
  }

  pub fn error(&self) -> Option<QueryError> {
    self.state_rx.borrow().error.clone()
  }

  pub fn status(&self) -> Status {
    self.state_rx.borrow().status
  }

  pub fn is_idle(&self) -> bool {
    self.state_rx.borrow().is_idle()
  }

  pub fn is_loading(&self) -> bool {
    self.state_rx.borrow().is_loading()
  }

  pub fn is_error(&self) -> bool {
    self.state_rx.borrow().is_error()
  }

  pub fn is_success(&self) -> bool {
    self.state_rx.borrow().is_success()
  }

  pub fn is_fetching(&self) -> bool {
    self.state_rx.borrow().is_fetching
  }
}

impl<T: Send + Sync + 'static> QueryInner<T> {
  fn context(&self) -> FetchContext<T> {
    let config = lock(&self.config, "query.context");
    FetchContext {
      cache: self.cache.clone(),
      key: config.key.serialize().to_string(),
      fetcher: Arc::clone(&self.fetcher),
      options: config.options.clone(),
      state: Arc::clone(&self.state),
      expiry: self.expiry.clone(),
      generation: self.key_generation.load(Ordering::Acquire),
      current_generation: Arc::clone(&self.key_generation),
    }
  }

  /// Activation: reuse the cached value if allowed, otherwise fetch in the
  /// background. Cancels the fetch of the previous activation first.
  fn activate(&self) {
    let mut lifecycle = lock(&self.lifecycle, "query.activate");
    if let Some(previous) = lifecycle.effect.take() {
      previous.abort();
    }

    let ctx = self.context();
    if !ctx.options.enabled {
      self.state.send_modify(|state| {
        state.status = Status::Idle;
        state.is_fetching = false;
      });
      return;
    }

    if let Some(data) = self.fresh_cached_value(&ctx) {
      debug!(key = %ctx.key, "using cached value");
      self.state.send_replace(QueryState::success(data));
      return;
    }

    let controller = AbortController::new();
    let signal = controller.signal();
    lifecycle.effect = Some(controller);
    drop(lifecycle);

    self.state.send_modify(|state| {
      state.status = Status::Loading;
      state.is_fetching = true;
      state.error = None;
    });

    tokio::spawn(async move {
      // Failures are recorded in state; only `refetch()` returns them.
      let _ = ctx.run(signal).await;
    });
  }

  /// The cached value, unless activation must refetch.
  fn fresh_cached_value(&self, ctx: &FetchContext<T>) -> Option<Arc<T>> {
    let entry = self.cache.get(&ctx.key)?;
    let is_stale = entry.is_stale(self.cache.now(), ctx.options.stale_time_millis());
    let should_refetch = match ctx.options.refetch_on_mount {
      RefetchOnMount::Always => true,
      RefetchOnMount::IfStale => is_stale,
      RefetchOnMount::Never => false,
    };
    if should_refetch {
      return None;
    }
    entry.value_as::<T>(&ctx.key)?.ok()
  }

  fn arm_expiry(&self) {
    let config = lock(&self.config, "query.arm_expiry");
    self.expiry.arm(
      &self.cache,
      config.key.serialize(),
      config.options.cache_time_millis(),
    );
  }
}

impl<T> QueryInner<T> {
  fn teardown(&self) {
    let mut lifecycle = lock(&self.lifecycle, "query.teardown");
    lifecycle.subscribed = false;
    lifecycle.lifetime.abort();
    if let Some(effect) = lifecycle.effect.take() {
      effect.abort();
    }
    self.expiry.cancel();
  }
}

impl<T> Drop for QueryInner<T> {
  fn drop(&mut self) {
    self.teardown();
  }
}

impl<T> Clone for Query<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      state_rx: self.state_rx.clone(),
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let config = lock(&self.inner.config, "query.debug");
    f.debug_struct("Query")
      .field("key", &config.key)
      .field("state", &*self.state_rx.borrow())
      .field("options", &config.options)
      .finish_non_exhaustive()
  }
}
