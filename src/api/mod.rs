//! HTTP collaborators used by the `querykit` binary.

mod client;
mod types;

pub use client::{ApiError, PostsApi};
pub use types::{CreatedPost, DeletedPost, NewPost, Post, PostsPage, User};
