//! Keyed async query cache with request deduplication, staleness, expiry and
//! retry, plus a mutation executor with optimistic-update hooks.
//!
//! A [`QueryClient`] owns one [`QueryCache`]. Each [`Query`] is a subscription
//! to a key in that cache; each [`Mutation`] runs a write operation with
//! lifecycle callbacks. Both publish their state over watch channels.

pub mod api;
pub mod cache;
pub mod clock;
pub mod client;
pub mod error;
pub mod key;
mod lock;
pub mod mutation;
pub mod query;
pub mod retry;
pub mod signal;

pub use cache::QueryCache;
pub use client::QueryClient;
pub use error::{QueryError, Result};
pub use key::QueryKey;
pub use mutation::{Mutation, MutationOptions, MutationState};
pub use query::{Query, QueryOptions, QueryState, RefetchOnMount, Status};
pub use retry::{Retry, RetryDelay};
pub use signal::{AbortController, AbortSignal};

#[doc(hidden)]
pub use serde_json as __serde_json;
