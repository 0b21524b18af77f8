use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::api::types::{CreatedPost, DeletedPost, NewPost, PostsPage, User};
use crate::signal::AbortSignal;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  /// Non-2xx response, carrying the message shown to the user
  #[error("{0}")]
  Status(&'static str),
  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),
  #[error("Invalid URL: {0}")]
  Url(#[from] url::ParseError),
  #[error("request aborted")]
  Aborted,
}

/// Client for a DummyJSON-compatible posts API
#[derive(Clone)]
pub struct PostsApi {
  client: reqwest::Client,
  base_url: Url,
}

impl PostsApi {
  pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ApiError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self { client, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// First `limit` posts
  pub async fn fetch_posts(&self, limit: u32, signal: AbortSignal) -> Result<PostsPage, ApiError> {
    let mut url = self.url("posts")?;
    url.query_pairs_mut().append_pair("limit", &limit.to_string());
    let request = self.client.get(url);
    abortable(signal, self.send_json(request, "Network error")).await
  }

  pub async fn fetch_user(&self, user_id: u64, signal: AbortSignal) -> Result<User, ApiError> {
    let url = self.url(&format!("users/{}", user_id))?;
    let request = self.client.get(url);
    abortable(signal, self.send_json(request, "User not found")).await
  }

  pub async fn create_post(&self, post: &NewPost) -> Result<CreatedPost, ApiError> {
    let url = self.url("posts/add")?;
    let request = self.client.post(url).json(post);
    self.send_json(request, "Failed to create post").await
  }

  pub async fn delete_post(&self, post_id: u64) -> Result<DeletedPost, ApiError> {
    let url = self.url(&format!("posts/{}", post_id))?;
    let request = self.client.delete(url);
    self.send_json(request, "Failed to delete post").await
  }

  fn url(&self, path: &str) -> Result<Url, ApiError> {
    Ok(join(&self.base_url, path)?)
  }

  async fn send_json<T: DeserializeOwned>(
    &self,
    request: reqwest::RequestBuilder,
    failure: &'static str,
  ) -> Result<T, ApiError> {
    let response = request.send().await?;
    let status = response.status();
    debug!(url = %response.url(), status = status.as_u16(), "api response");

    if !status.is_success() {
      return Err(ApiError::Status(failure));
    }
    Ok(response.json::<T>().await?)
  }
}

impl std::fmt::Debug for PostsApi {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PostsApi")
      .field("base_url", &self.base_url.as_str())
      .finish()
  }
}

/// Join `path` onto `base`, keeping any path prefix of `base`.
fn join(base: &Url, path: &str) -> Result<Url, url::ParseError> {
  let mut base = base.clone();
  if !base.path().ends_with('/') {
    let with_slash = format!("{}/", base.path());
    base.set_path(&with_slash);
  }
  base.join(path)
}

/// Drop the request as soon as `signal` fires.
async fn abortable<T, F>(signal: AbortSignal, request: F) -> Result<T, ApiError>
where
  F: Future<Output = Result<T, ApiError>>,
{
  tokio::select! {
    biased;
    _ = signal.aborted() => Err(ApiError::Aborted),
    result = request => result,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::signal::AbortController;

  #[test]
  fn test_join_keeps_base_path() {
    let base = Url::parse("https://example.com/api").unwrap();
    assert_eq!(
      join(&base, "posts/add").unwrap().as_str(),
      "https://example.com/api/posts/add"
    );

    let root = Url::parse("https://dummyjson.com").unwrap();
    assert_eq!(
      join(&root, "users/1").unwrap().as_str(),
      "https://dummyjson.com/users/1"
    );
  }

  #[test]
  fn test_status_error_message() {
    assert_eq!(ApiError::Status("User not found").to_string(), "User not found");
  }

  #[tokio::test]
  async fn test_abortable_stops_pending_request() {
    let controller = AbortController::new();
    let signal = controller.signal();
    controller.abort();

    let result: Result<(), ApiError> = abortable(signal, std::future::pending()).await;
    assert!(matches!(result, Err(ApiError::Aborted)));
  }
}
