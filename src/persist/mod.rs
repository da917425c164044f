//! Persist query results to an external key/value storage medium.
//!
//! This module provides a storage-agnostic persistence layer that:
//! - Stores one record per query, keyed by the hash of the query identity
//! - Serves a persisted record instead of fetching while it is younger than
//!   the max age and carries the current buster
//! - Deletes expired, version-mismatched and malformed records on read
//! - Writes every live fetch result back to storage

mod options;
mod persister;
mod record;
mod result;
pub mod storage;

pub use options::{PersistOptions, PersistRetryer, DEFAULT_MAX_AGE_MS, DEFAULT_PREFIX};
pub use persister::{PersistedFetch, Persister};
pub use record::{deserialize_json, serialize_json, Deserializer, PersistedRecord, Serializer};
pub use result::{CacheResult, CacheSource};
pub use storage::{AsyncStorage, DirStorage, MemoryStorage, SqliteStorage, SyncAdapter, SyncStorage};
