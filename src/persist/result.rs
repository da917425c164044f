//! Result of a persisted fetch, including where the data came from.

use chrono::{DateTime, Utc};

/// Result from a persisted fetch, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was persisted (if restored from storage)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new result from a live fetch.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new result restored from storage.
  pub fn from_storage(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Storage,
      cached_at,
    }
  }

  pub fn is_from_storage(&self) -> bool {
    self.source == CacheSource::Storage
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the underlying fetch
  Network,
  /// Valid persisted record
  Storage,
}
