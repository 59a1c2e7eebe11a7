//! Key/value storage for downloaded resources.
//!
//! Keys are URL-escaped effective resource URLs, values are the raw bytes.
//! Entries are never invalidated by a build; removal is an administrative
//! operation.

mod fs;

use std::future::Future;
use std::time::SystemTime;

use thiserror::Error;

pub use fs::FsCache;

#[derive(Debug, Error)]
pub enum CacheError {
  /// The key has never been stored (or was deleted).
  #[error("no such key: {key}")]
  NoSuchKey { key: String },

  /// Keys must be usable as a single file name.
  #[error("invalid cache key: {key:?}")]
  InvalidKey { key: String },

  #[error("cache io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Metadata about one stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub key: String,
  pub size: u64,
  pub modified: SystemTime,
}

/// A byte store shared by concurrently running builds.
pub trait Cache: Send + Sync {
  fn get(&self, key: &str) -> impl Future<Output = Result<Vec<u8>, CacheError>> + Send;

  fn set(&self, key: &str, bytes: &[u8]) -> impl Future<Output = Result<(), CacheError>> + Send;

  /// Every stored key, sorted.
  fn keys(&self) -> impl Future<Output = Result<Vec<String>, CacheError>> + Send;

  fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
}
