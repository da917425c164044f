//! Persist async query results to key/value storage, with max-age and
//! version-tag invalidation.
//!
//! # Example
//!
//! ```ignore
//! let storage = Arc::new(SyncAdapter::new(SqliteStorage::open()?));
//! let options = PersistOptions::new()
//!     .with_storage(storage)
//!     .with_buster("v1");
//! let persister = Persister::new(options, Arc::new(MemoryQueryCache::new()));
//!
//! let todos = persister.wrap(&json!(["todos"]), |client: Client| async move {
//!     client.todos().await
//! })?;
//!
//! // Served from storage while the record is fresh
//! let data = todos.call(client).await?;
//! ```

pub mod config;
pub mod http;
pub mod logging;
pub mod persist;
pub mod query;

pub use persist::{CacheResult, CacheSource, PersistOptions, PersistedFetch, Persister};
pub use query::{MemoryQueryCache, QueryCache, QueryKey, QueryState};
