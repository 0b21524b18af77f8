//! End-to-end behavior of queries and mutations sharing one client.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use querykit::{
  query_key, Mutation, MutationOptions, Query, QueryClient, QueryError, QueryOptions, Status,
};

#[derive(Debug, Clone, PartialEq)]
struct Post {
  id: u64,
  title: String,
}

#[derive(Debug, Clone, PartialEq)]
struct NewPost {
  title: String,
  body: String,
  user_id: u64,
}

fn posts_query(
  client: &QueryClient,
  calls: &Arc<AtomicU32>,
  options: QueryOptions<Vec<Post>>,
) -> Query<Vec<Post>> {
  let calls = Arc::clone(calls);
  client.query(
    "posts",
    move |_| {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, String>(vec![Post {
          id: u64::from(n) + 1,
          title: format!("fetch {}", n),
        }])
      }
    },
    options,
  )
}

#[tokio::test(start_paused = true)]
async fn concurrent_subscribers_share_one_fetch() {
  let client = QueryClient::new();
  let calls = Arc::new(AtomicU32::new(0));

  let mut subscribers: Vec<_> = (0..8)
    .map(|_| posts_query(&client, &calls, QueryOptions::new()))
    .collect();
  for subscriber in &subscribers {
    subscriber.subscribe();
  }

  for subscriber in &mut subscribers {
    let state = subscriber.settled().await;
    assert_eq!(state.status, Status::Success);
    assert_eq!(state.data().map(|posts| posts[0].id), Some(1));
  }
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn second_subscriber_reuses_fresh_list() {
  let client = QueryClient::new();
  let calls = Arc::new(AtomicU32::new(0));
  let options = || QueryOptions::new().with_stale_time(Duration::from_millis(3000));

  let mut first = posts_query(&client, &calls, options());
  first.subscribe();
  first.settled().await;

  let second = posts_query(&client, &calls, options());
  second.subscribe();

  // Served from cache without entering a loading state
  assert!(second.is_success());
  assert!(!second.is_fetching());
  assert_eq!(second.data(), first.data());
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_list_is_refetched_on_mount() {
  let client = QueryClient::new();
  let calls = Arc::new(AtomicU32::new(0));
  let options = || QueryOptions::new().with_stale_time(Duration::from_millis(3000));

  let mut first = posts_query(&client, &calls, options());
  first.subscribe();
  first.settled().await;

  tokio::time::advance(Duration::from_millis(2900)).await;
  let young = posts_query(&client, &calls, options());
  young.subscribe();
  assert_eq!(calls.load(Ordering::SeqCst), 1);

  tokio::time::advance(Duration::from_millis(200)).await;
  let mut old = posts_query(&client, &calls, options());
  old.subscribe();
  let state = old.settled().await;

  assert_eq!(calls.load(Ordering::SeqCst), 2);
  assert_eq!(state.data().map(|posts| posts[0].id), Some(2));
}

#[tokio::test(start_paused = true)]
async fn create_post_success_refetches_through_callback() {
  let client = QueryClient::new();
  let calls = Arc::new(AtomicU32::new(0));
  let successes = Arc::new(AtomicU32::new(0));

  let mut posts = posts_query(&client, &calls, QueryOptions::new());
  posts.subscribe();
  posts.settled().await;
  assert_eq!(calls.load(Ordering::SeqCst), 1);

  let refetch_target = posts.clone();
  let s = successes.clone();
  let (refetch_tx, mut refetch_rx) = tokio::sync::mpsc::unbounded_channel();

  let create: Mutation<NewPost, Post> = client.mutation(
    |post: NewPost| async move {
      Ok::<_, String>(Post {
        id: 252,
        title: post.title,
      })
    },
    MutationOptions::new().on_success(move |created: &Post, _, _| {
      assert_eq!(created.title, "T");
      s.fetch_add(1, Ordering::SeqCst);
      let _ = refetch_tx.send(tokio::spawn(refetch_target.refetch()));
    }),
  );

  let created = create
    .mutate_async(NewPost {
      title: "T".into(),
      body: "B".into(),
      user_id: 1,
    })
    .await
    .unwrap();

  assert_eq!(created.id, 252);
  assert_eq!(create.status(), Status::Success);
  assert_eq!(successes.load(Ordering::SeqCst), 1);

  // The mutation itself never touched the cache; the callback's refetch did
  let refreshed = refetch_rx.recv().await.unwrap().await.unwrap().unwrap();
  assert_eq!(refreshed[0].id, 2);
  assert_eq!(calls.load(Ordering::SeqCst), 2);
  assert_eq!(posts.settled().await.data().map(|p| p[0].id), Some(2));
}

#[tokio::test]
async fn failing_mutation_reports_every_attempt() {
  let client = QueryClient::new();
  let attempts = Arc::new(AtomicU32::new(0));
  let errors = Arc::new(AtomicU32::new(0));
  let (a, e) = (attempts.clone(), errors.clone());

  let create: Mutation<NewPost, Post> = client.mutation(
    move |_: NewPost| {
      a.fetch_add(1, Ordering::SeqCst);
      async { Err::<Post, _>("Failed to create post") }
    },
    MutationOptions::new()
      .with_retry(2)
      .with_retry_delay(Duration::ZERO)
      .on_error(move |err, _, _| {
        assert_eq!(err.to_string(), "Failed to create post");
        e.fetch_add(1, Ordering::SeqCst);
      }),
  );

  let result = create
    .mutate_async(NewPost {
      title: "T".into(),
      body: "B".into(),
      user_id: 1,
    })
    .await;

  assert_eq!(
    result.unwrap_err(),
    QueryError::transport("Failed to create post")
  );
  assert_eq!(attempts.load(Ordering::SeqCst), 3);
  assert_eq!(errors.load(Ordering::SeqCst), 3);

  create.reset();
  create.reset();
  assert!(create.is_idle());
  assert!(create.error().is_none());
  assert_eq!(create.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failing_query_attempts_retry_plus_one_times() {
  let client = QueryClient::new();
  let calls = Arc::new(AtomicU32::new(0));
  let c = calls.clone();

  let mut user = client.query(
    query_key!("user", 999),
    move |_| {
      c.fetch_add(1, Ordering::SeqCst);
      async { Err::<Post, _>("User not found") }
    },
    QueryOptions::new().with_retry(2),
  );
  user.subscribe();
  let state = user.settled().await;

  assert!(state.is_error());
  assert_eq!(state.error(), Some(&QueryError::transport("User not found")));
  assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn entry_expires_after_cache_time_unless_refreshed() {
  let client = QueryClient::new();
  let calls = Arc::new(AtomicU32::new(0));
  let options = || QueryOptions::new().with_cache_time(Some(Duration::from_secs(10)));

  let mut posts = posts_query(&client, &calls, options());
  posts.subscribe();
  posts.settled().await;

  // A refresh at 6s pushes expiry to 16s
  tokio::time::advance(Duration::from_secs(6)).await;
  posts.refetch().await.unwrap();

  tokio::time::advance(Duration::from_secs(6)).await;
  tokio::time::sleep(Duration::from_millis(1)).await;
  assert!(client.cache().contains("\"posts\""));

  tokio::time::advance(Duration::from_secs(5)).await;
  tokio::time::sleep(Duration::from_millis(1)).await;
  assert!(!client.cache().contains("\"posts\""));
}
