//! Uncached write operations with lifecycle callbacks and retry.
//!
//! A [`Mutation`] wraps one write operation for one call site. Each call to
//! [`Mutation::mutate_async`] runs, per attempt: the optimistic hook, the
//! operation, then `on_success`/`on_error` and `on_settled`. Failed attempts
//! are retried according to the configured policy, re-running the optimistic
//! hook each time.
//!
//! Mutations never touch the query cache. Callbacks that need fresh query
//! data refetch or invalidate explicitly:
//!
//! ```ignore
//! let posts = posts.clone();
//! let create = client.mutation(
//!     move |post: NewPost| api.create_post(post),
//!     MutationOptions::new().with_retry(2).on_success(move |_, _, _| {
//!         tokio::spawn(posts.refetch());
//!     }),
//! );
//! create.mutate_async(new_post).await?;
//! ```

mod options;
mod state;

pub use options::MutationOptions;
pub use state::MutationState;

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::lock::lock;
use crate::query::Status;
use crate::retry::run_with_retry;

type MutationFn<V, D> = Arc<dyn Fn(V) -> BoxFuture<'static, Result<D>> + Send + Sync>;

/// One call site's write operation. Clones share state.
pub struct Mutation<V, D, C = ()> {
  inner: Arc<MutationInner<V, D, C>>,
  state_rx: watch::Receiver<MutationState<V, D, C>>,
}

struct MutationInner<V, D, C> {
  mutation_fn: MutationFn<V, D>,
  options: Mutex<MutationOptions<V, D, C>>,
  state: watch::Sender<MutationState<V, D, C>>,
}

impl<V, D, C> Mutation<V, D, C>
where
  V: Clone + Send + Sync + 'static,
  D: Send + Sync + 'static,
  C: Send + Sync + 'static,
{
  pub fn new<F, Fut, E>(mutation_fn: F, options: MutationOptions<V, D, C>) -> Self
  where
    F: Fn(V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<D, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
  {
    let (tx, rx) = watch::channel(MutationState::default());
    let mutation_fn: MutationFn<V, D> = Arc::new(move |variables| {
      let fut = mutation_fn(variables);
      async move { fut.await.map_err(QueryError::transport) }.boxed()
    });

    Self {
      inner: Arc::new(MutationInner {
        mutation_fn,
        options: Mutex::new(options),
        state: tx,
      }),
      state_rx: rx,
    }
  }

  /// Run the mutation and return its outcome once retries are exhausted.
  pub async fn mutate_async(&self, variables: V) -> Result<Arc<D>> {
    let options = lock(&self.inner.options, "mutation.mutate").clone();
    let variables = Arc::new(variables);
    // Context returned by `on_mutate` for the latest attempt
    let context: Mutex<Option<Arc<C>>> = Mutex::new(None);

    let outcome = {
      let (options, variables, context) = (&options, &variables, &context);
      run_with_retry(
        "mutation",
        &options.retry,
        &options.retry_delay,
        move |failure_count| self.attempt(options, variables, context, failure_count),
        move |failure_count, error| {
          let context = lock(context, "mutation.context").clone();
          self.record_failure(options, variables, context, failure_count, error);
        },
      )
      .await
    };

    let data = outcome?;
    let context = lock(&context, "mutation.context").clone();
    self.inner.state.send_modify(|state| {
      state.status = Status::Success;
      state.data = Some(Arc::clone(&data));
      state.error = None;
    });
    debug!("mutation succeeded");

    if let Some(on_success) = &options.on_success {
      on_success(&*data, &*variables, context.as_deref());
    }
    if let Some(on_settled) = &options.on_settled {
      on_settled(Some(&*data), None, &*variables, context.as_deref());
    }
    Ok(data)
  }

  /// Start the mutation in the background. The returned handle yields the
  /// same outcome as [`mutate_async`](Self::mutate_async) and may be dropped.
  pub fn mutate(&self, variables: V) -> JoinHandle<Result<Arc<D>>> {
    let this = self.clone();
    tokio::spawn(async move { this.mutate_async(variables).await })
  }

  /// One attempt: optimistic hook, loading transition, operation.
  async fn attempt(
    &self,
    options: &MutationOptions<V, D, C>,
    variables: &Arc<V>,
    context: &Mutex<Option<Arc<C>>>,
    failure_count: u32,
  ) -> Result<Arc<D>> {
    *lock(context, "mutation.context") = None;
    let current = match &options.on_mutate {
      Some(on_mutate) => Some(Arc::new(on_mutate(&**variables).await?)),
      None => None,
    };
    *lock(context, "mutation.context") = current.clone();

    self.inner.state.send_modify(|state| {
      state.status = Status::Loading;
      state.variables = Some(Arc::clone(variables));
      state.context = current;
      state.failure_count = failure_count;
    });

    (self.inner.mutation_fn)(V::clone(variables))
      .await
      .map(Arc::new)
  }

  /// Publish a failed attempt and fire the failure callbacks.
  fn record_failure(
    &self,
    options: &MutationOptions<V, D, C>,
    variables: &Arc<V>,
    context: Option<Arc<C>>,
    failure_count: u32,
    error: &QueryError,
  ) {
    self.inner.state.send_modify(|state| {
      state.status = Status::Error;
      state.error = Some(error.clone());
      state.failure_count = failure_count;
    });

    if let Some(on_error) = &options.on_error {
      on_error(error, &**variables, context.as_deref());
    }
    if let Some(on_settled) = &options.on_settled {
      on_settled(None, Some(error), &**variables, context.as_deref());
    }
  }

  /// Restore the idle state. Does not cancel a running mutation.
  pub fn reset(&self) {
    self.inner.state.send_replace(MutationState::default());
  }

  pub fn set_options(&self, options: MutationOptions<V, D, C>) {
    *lock(&self.inner.options, "mutation.set_options") = options;
  }

  pub fn state(&self) -> MutationState<V, D, C> {
    self.state_rx.borrow().clone()
  }

  /// Returns `true` if the state changed since the last `poll()`.
  pub fn poll(&mut self) -> bool {
    let changed = self.state_rx.has_changed().unwrap_or(false);
    if changed {
      self.state_rx.borrow_and_update();
    }
    changed
  }

  /// Wait for the next state change.
  pub async fn changed(&mut self) -> MutationState<V, D, C> {
    let _ = self.state_rx.changed().await;
    self.state_rx.borrow_and_update().clone()
  }

  pub fn status(&self) -> Status {
    self.state_rx.borrow().status
  }

  pub fn data(&self) -> Option<Arc<D>> {
    self.state_rx.borrow().data.clone()
  }

  pub fn error(&self) -> Option<QueryError> {
    self.state_rx.borrow().error.clone()
  }

  pub fn variables(&self) -> Option<Arc<V>> {
    self.state_rx.borrow().variables.clone()
  }

  pub fn context(&self) -> Option<Arc<C>> {
    self.state_rx.borrow().context.clone()
  }

  pub fn failure_count(&self) -> u32 {
    self.state_rx.borrow().failure_count
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
}

impl<V, D, C> Clone for Mutation<V, D, C> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      state_rx: self.state_rx.clone(),
    }
  }
}

impl<V: std::fmt::Debug, D: std::fmt::Debug, C: std::fmt::Debug> std::fmt::Debug
  for Mutation<V, D, C>
{
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Mutation")
      .field("state", &*self.state_rx.borrow())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::retry::{Retry, RetryDelay};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  #[derive(Debug, Clone, PartialEq)]
  struct NewPost {
    title: String,
  }

  fn post(title: &str) -> NewPost {
    NewPost {
      title: title.to_string(),
    }
  }

  #[tokio::test]
  async fn test_mutation_success_runs_callbacks_in_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (e1, e2, e3) = (events.clone(), events.clone(), events.clone());

    let mutation = Mutation::new(
      |post: NewPost| async move { Ok::<_, String>(format!("created {}", post.title)) },
      MutationOptions::new()
        .on_mutate(move |post: &NewPost| {
          e1.lock().unwrap().push("mutate");
          post.title.len()
        })
        .on_success(move |data: &String, _, context| {
          assert_eq!(data, "created T");
          assert_eq!(context, Some(&1));
          e2.lock().unwrap().push("success");
        })
        .on_settled(move |data, error, _, _| {
          assert!(data.is_some() && error.is_none());
          e3.lock().unwrap().push("settled");
        }),
    );

    assert!(mutation.is_idle());
    let data = mutation.mutate_async(post("T")).await.unwrap();

    assert_eq!(*data, "created T");
    assert!(mutation.is_success());
    assert_eq!(mutation.variables().as_deref(), Some(&post("T")));
    assert_eq!(mutation.context().as_deref(), Some(&1));
    assert_eq!(mutation.failure_count(), 0);
    assert_eq!(
      *events.lock().unwrap(),
      vec!["mutate", "success", "settled"]
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_two_attempts_three_times() {
    let attempts = Arc::new(AtomicU32::new(0));
    let errors = Arc::new(AtomicU32::new(0));
    let settled = Arc::new(AtomicU32::new(0));
    let (a, e, s) = (attempts.clone(), errors.clone(), settled.clone());

    let mutation: Mutation<NewPost, String> = Mutation::new(
      move |_: NewPost| {
        a.fetch_add(1, Ordering::SeqCst);
        async { Err::<String, _>("Failed to create post") }
      },
      MutationOptions::new()
        .with_retry(2)
        .with_retry_delay(Duration::ZERO)
        .on_error(move |_, _, _| {
          e.fetch_add(1, Ordering::SeqCst);
        })
        .on_settled(move |_, error, _, _| {
          assert!(error.is_some());
          s.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let result = mutation.mutate_async(post("T")).await;

    assert_eq!(
      result.unwrap_err(),
      QueryError::transport("Failed to create post")
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(errors.load(Ordering::SeqCst), 3);
    assert_eq!(settled.load(Ordering::SeqCst), 3);
    assert!(mutation.is_error());
    assert_eq!(mutation.failure_count(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_optimistic_hook_reruns_per_attempt() {
    let hooks = Arc::new(AtomicU32::new(0));
    let attempts = Arc::new(AtomicU32::new(0));
    let (h, a) = (hooks.clone(), attempts.clone());

    let mutation = Mutation::new(
      move |_: NewPost| {
        let n = a.fetch_add(1, Ordering::SeqCst);
        async move {
          if n == 0 {
            Err("flaky".to_string())
          } else {
            Ok(n)
          }
        }
      },
      MutationOptions::new()
        .with_retry(Retry::when(|count, _| count < 5))
        .with_retry_delay(RetryDelay::Fixed(Duration::from_millis(10)))
        .on_mutate(move |_: &NewPost| h.fetch_add(1, Ordering::SeqCst)),
    );

    let data = mutation.mutate_async(post("T")).await.unwrap();

    assert_eq!(*data, 1);
    assert_eq!(hooks.load(Ordering::SeqCst), 2);
    // Context of the latest attempt
    assert_eq!(mutation.context().as_deref(), Some(&1));
    assert_eq!(mutation.failure_count(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_attempts_report_their_own_context() {
    let hooks = Arc::new(AtomicU32::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (h, e) = (hooks.clone(), seen.clone());

    let mutation: Mutation<NewPost, (), u32> = Mutation::new(
      |_: NewPost| async { Err::<(), _>("Failed to delete post") },
      MutationOptions::new()
        .with_retry(2)
        .with_retry_delay(RetryDelay::Fixed(Duration::from_millis(100)))
        .on_mutate(move |_: &NewPost| h.fetch_add(1, Ordering::SeqCst))
        .on_error(move |_, _, context| {
          e.lock().unwrap().push(context.copied());
        }),
    );

    let started = tokio::time::Instant::now();
    let result = mutation.mutate_async(post("T")).await;

    assert!(result.is_err());
    assert_eq!(*seen.lock().unwrap(), vec![Some(0), Some(1), Some(2)]);
    assert_eq!(mutation.context().as_deref(), Some(&2));
    assert_eq!(mutation.failure_count(), 3);
    // Two delays between three attempts
    assert!(started.elapsed() >= Duration::from_millis(200));
  }

  #[tokio::test]
  async fn test_failing_optimistic_hook_fails_mutation() {
    let attempts = Arc::new(AtomicU32::new(0));
    let a = attempts.clone();

    let mutation: Mutation<NewPost, (), u32> = Mutation::new(
      move |_: NewPost| {
        a.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, String>(()) }
      },
      MutationOptions::new().on_mutate_async(|_: &NewPost| async { Err::<u32, _>("offline") }),
    );

    let result = mutation.mutate_async(post("T")).await;

    assert_eq!(result.unwrap_err(), QueryError::transport("offline"));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
    assert!(mutation.is_error());
    assert!(mutation.context().is_none());
  }

  #[tokio::test]
  async fn test_reset_is_idempotent() {
    let mutation: Mutation<NewPost, ()> = Mutation::new(
      |_: NewPost| async { Err::<(), _>("nope") },
      MutationOptions::new(),
    );
    let _ = mutation.mutate_async(post("T")).await;
    assert!(mutation.is_error());

    mutation.reset();
    let first = mutation.state();
    mutation.reset();
    let second = mutation.state();

    for state in [first, second] {
      assert!(state.is_idle());
      assert!(state.data.is_none());
      assert!(state.error.is_none());
      assert!(state.variables.is_none());
      assert!(state.context.is_none());
      assert_eq!(state.failure_count, 0);
    }
  }

  #[tokio::test]
  async fn test_mutate_runs_in_background() {
    let mut mutation: Mutation<u32, u32> = Mutation::new(
      |n: u32| async move { Ok::<_, String>(n * 2) },
      MutationOptions::new(),
    );
    assert!(!mutation.poll());

    let handle = mutation.mutate(21);
    assert_eq!(*handle.await.unwrap().unwrap(), 42);

    assert!(mutation.poll());
    assert_eq!(mutation.data().as_deref(), Some(&42));
  }

  #[tokio::test(start_paused = true)]
  async fn test_loading_state_records_variables() {
    let mut mutation: Mutation<u32, u32> = Mutation::new(
      |n: u32| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, String>(n)
      },
      MutationOptions::new(),
    );

    let handle = mutation.mutate(7);
    let state = mutation.changed().await;
    assert!(state.is_loading());
    assert_eq!(state.variables(), Some(&7));

    handle.await.unwrap().unwrap();
    assert!(mutation.is_success());
  }
}
