//! Subcommands of the `querykit` binary.

use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use querykit::api::{NewPost, PostsApi, PostsPage, User};
use querykit::{query_key, MutationOptions, Query, QueryClient, QueryOptions, QueryState};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{Config, RetrySetting};

const POSTS_STALE_TIME: Duration = Duration::from_millis(3000);
const USER_STALE_TIME: Duration = Duration::from_millis(5000);
/// Page size of the post list, refreshed after create and delete
const DEFAULT_POSTS_LIMIT: u32 = 5;
/// Creating a post is retried twice unless configured otherwise
const CREATE_RETRY: RetrySetting = RetrySetting::Count(2);

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// List posts
  Posts {
    /// Number of posts to fetch
    #[arg(short, long, default_value_t = DEFAULT_POSTS_LIMIT)]
    limit: u32,
  },
  /// Show a user profile (0 shows nothing)
  User { id: u64 },
  /// Create a post, then refresh the post list
  CreatePost {
    #[arg(long, default_value = "New Post Title")]
    title: String,
    #[arg(long, default_value = "This is post content")]
    body: String,
    #[arg(long, default_value_t = 1)]
    user_id: u64,
  },
  /// Delete a post, then refresh the post list
  DeletePost { id: u64 },
}

pub struct App {
  client: QueryClient,
  api: PostsApi,
  config: Config,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let api = PostsApi::new(config.api.base_url()?, config.api.timeout())
      .map_err(|e| eyre!("Failed to create API client: {}", e))?;

    Ok(Self {
      client: QueryClient::new(),
      api,
      config,
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Posts { limit } => self.posts(limit).await,
      Command::User { id } => self.user(id).await,
      Command::CreatePost {
        title,
        body,
        user_id,
      } => {
        self
          .create_post(NewPost {
            title,
            body,
            user_id,
          })
          .await
      }
      Command::DeletePost { id } => self.delete_post(id).await,
    }
  }

  /// Screen-specific options with the configured overrides applied.
  fn query_options<T>(&self, stale_time: Duration) -> QueryOptions<T> {
    let overrides = &self.config.query;
    let mut options = QueryOptions::new().with_stale_time(
      overrides
        .stale_time_ms
        .map(Duration::from_millis)
        .unwrap_or(stale_time),
    );
    if let Some(cache_time) = overrides.cache_time_ms {
      options = options.with_cache_time(cache_time.map(Duration::from_millis));
    }
    if let Some(retry) = overrides.retry {
      options = options.with_retry(retry);
    }
    options
  }

  fn posts_query(&self, limit: u32) -> Query<PostsPage> {
    let api = self.api.clone();
    self.client.query(
      query_key!("posts", limit),
      move |signal| {
        let api = api.clone();
        async move { api.fetch_posts(limit, signal).await }
      },
      self
        .query_options(POSTS_STALE_TIME)
        .on_success(|page: &PostsPage| info!(count = page.posts.len(), "Posts loaded successfully"))
        .on_error(|err| error!(error = %err, "Posts load failed")),
    )
  }

  fn user_query(&self, user_id: u64) -> Query<User> {
    let api = self.api.clone();
    self.client.query(
      query_key!("user", user_id),
      move |signal| {
        let api = api.clone();
        async move { api.fetch_user(user_id, signal).await }
      },
      self
        .query_options(USER_STALE_TIME)
        .with_enabled(user_id != 0)
        .on_error(|err| error!(error = %err, "User load failed")),
    )
  }

  async fn posts(&self, limit: u32) -> Result<()> {
    // Two views of the same list share one request
    let mut list = self.posts_query(limit);
    let mut header = self.posts_query(limit);
    list.subscribe();
    header.subscribe();

    println!("Loading posts...");
    let (state, _) = tokio::join!(list.settled(), header.settled());
    print_posts(&state)
  }

  async fn user(&self, user_id: u64) -> Result<()> {
    let mut profile = self.user_query(user_id);
    profile.subscribe();

    if profile.is_idle() {
      println!("No user selected");
      return Ok(());
    }

    println!("Loading user...");
    let state = profile.settled().await;
    if let Some(err) = state.error() {
      return Err(eyre!("Error: {}", err));
    }
    if let Some(user) = state.data() {
      println!("{}", user.full_name());
      println!("Email: {}", user.email);
      println!("Phone: {}", user.phone.as_deref().unwrap_or("-"));
      println!("Last updated: {}", chrono::Local::now().format("%H:%M:%S"));
    }
    Ok(())
  }

  async fn create_post(&self, post: NewPost) -> Result<()> {
    let api = self.api.clone();
    let posts = self.posts_query(DEFAULT_POSTS_LIMIT);
    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

    let options = MutationOptions::new()
      .with_retry(self.config.mutation.retry.unwrap_or(CREATE_RETRY))
      .with_retry_delay(self.config.mutation.retry_delay())
      .on_success(refresh_on_success(&posts, refresh_tx, "Post created!"))
      .on_error(|err, _, _| error!(error = %err, "Creation failed"));

    let create = self.client.mutation(
      move |post: NewPost| {
        let api = api.clone();
        async move { api.create_post(&post).await }
      },
      options,
    );

    println!("Creating...");
    let created = create
      .mutate_async(post)
      .await
      .map_err(|e| eyre!("{}", e))?;
    println!("Created post #{}: {}", created.id, created.title);

    await_refresh(refresh_rx).await
  }

  async fn delete_post(&self, post_id: u64) -> Result<()> {
    let api = self.api.clone();
    let posts = self.posts_query(DEFAULT_POSTS_LIMIT);
    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

    let options = MutationOptions::new()
      .with_retry_delay(self.config.mutation.retry_delay())
      .on_success(refresh_on_success(&posts, refresh_tx, "Post deleted!"));

    let delete = self.client.mutation(
      move |post_id: u64| {
        let api = api.clone();
        async move { api.delete_post(post_id).await }
      },
      options,
    );

    let deleted = delete
      .mutate_async(post_id)
      .await
      .map_err(|e| eyre!("{}", e))?;
    println!(
      "Deleted post #{} ({})",
      deleted.id,
      deleted.deleted_on.as_deref().unwrap_or("now")
    );

    await_refresh(refresh_rx).await
  }
}

type Refresh = JoinHandle<querykit::Result<Arc<PostsPage>>>;

/// `on_success` callback that reports and starts a refetch of the post list.
fn refresh_on_success<D, V>(
  posts: &Query<PostsPage>,
  refresh_tx: mpsc::UnboundedSender<Refresh>,
  message: &'static str,
) -> impl Fn(&D, &V, Option<&()>) + Send + Sync + 'static {
  let posts = posts.clone();
  move |_, _, _| {
    println!("{}", message);
    let _ = refresh_tx.send(tokio::spawn(posts.refetch()));
  }
}

async fn await_refresh(mut refresh_rx: mpsc::UnboundedReceiver<Refresh>) -> Result<()> {
  let Ok(handle) = refresh_rx.try_recv() else {
    return Ok(());
  };
  let page = handle
    .await
    .map_err(|e| eyre!("Refresh task failed: {}", e))?
    .map_err(|e| eyre!("Error: {}", e))?;
  println!("Refreshed {} posts", page.posts.len());
  Ok(())
}

fn print_posts(state: &QueryState<PostsPage>) -> Result<()> {
  if let Some(err) = state.error() {
    return Err(eyre!("Error: {}", err));
  }
  let Some(page) = state.data() else {
    return Ok(());
  };

  for post in &page.posts {
    println!("#{} {}", post.id, post.title);
    println!("    {}", post.body);
    println!("    by user {}", post.user_id);
  }
  println!("{} of {} posts", page.posts.len(), page.total);
  Ok(())
}
