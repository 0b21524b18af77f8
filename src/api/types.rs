use serde::{Deserialize, Serialize};

/// A post as listed by the API
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
  pub id: u64,
  pub title: String,
  pub body: String,
  pub user_id: u64,
  #[serde(default)]
  pub tags: Vec<String>,
}

/// One page of `/posts`
#[derive(Debug, Clone, Deserialize)]
pub struct PostsPage {
  pub posts: Vec<Post>,
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub skip: u64,
  #[serde(default)]
  pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: u64,
  pub first_name: String,
  pub last_name: String,
  pub email: String,
  pub phone: Option<String>,
}

impl User {
  pub fn full_name(&self) -> String {
    format!("{} {}", self.first_name, self.last_name)
  }
}

/// Body of `POST /posts/add`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
  pub title: String,
  pub body: String,
  pub user_id: u64,
}

/// Echo of a created post
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPost {
  pub id: u64,
  pub title: String,
  pub body: String,
  pub user_id: u64,
}

/// Response of `DELETE /posts/{id}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedPost {
  pub id: u64,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub is_deleted: bool,
  pub deleted_on: Option<String>,
}
