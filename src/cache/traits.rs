//! Core traits and types for the response cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};

use crate::net::{Request, Response};

/// Identity of a cached request: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn from_request(request: &Request) -> Self {
    let mut url = request.url.clone();
    url.set_fragment(None);

    Self {
      method: request.method.as_str().to_string(),
      url: url.to_string(),
    }
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human-readable form, stored alongside the hash.
  pub fn description(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

impl From<&Request> for RequestKey {
  fn from(request: &Request) -> Self {
    Self::from_request(request)
  }
}

/// A response snapshot read back from a store.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  /// When the snapshot was written
  pub cached_at: DateTime<Utc>,
}

/// Host-provided named cache stores.
///
/// Each store maps request keys to response snapshots. Implementations must be safe
/// for concurrent reads and writes from independent request tasks.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Open a store, creating it if absent.
  async fn open(&self, store: &str) -> Result<()>;

  /// Whether a store with this name exists.
  async fn has(&self, store: &str) -> Result<bool>;

  /// Names of every store, oldest first.
  async fn keys(&self) -> Result<Vec<String>>;

  /// Delete a store and all of its entries. Returns false if it did not exist.
  async fn delete(&self, store: &str) -> Result<bool>;

  /// Insert or replace one entry, creating the store if needed.
  async fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Insert a batch of entries; either all are committed or none are.
  async fn put_all(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Look up an entry. A missing store is a miss, not an error.
  async fn lookup(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Number of entries in a store (0 if it does not exist).
  async fn entry_count(&self, store: &str) -> Result<usize>;
}
