//! Process-wide keyed cache of query results.
//!
//! Each key holds at most one of a resolved value, an in-flight fetch or an
//! error, stamped with the time it was recorded:
//! - in-flight fetches are shared so concurrent subscribers of a key observe
//!   one physical request
//! - settles replace the in-flight slot with the value or error
//! - entries are removed explicitly or by expiry timers

mod entry;
mod store;

pub use entry::{AnyValue, CacheEntry, CacheUpdate, InFlight, SharedFetch};
pub(crate) use entry::downcast;
pub use store::{FetchSlot, QueryCache};
