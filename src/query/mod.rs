//! Query identity, state snapshots and the live query cache.
//!
//! Modelled on TanStack Query: a query is identified by a structured key,
//! hashed to a stable string, and its state lives in a `QueryCache`. The
//! persistence layer in [`crate::persist`] only talks to these through the
//! traits defined here.

mod cache;
mod key;
mod state;

pub use cache::{CachedQuery, MemoryQueryCache, QueryCache};
pub use key::{hash_identity, QueryKey};
pub use state::{FetchStatus, QueryState, QueryStatus};
