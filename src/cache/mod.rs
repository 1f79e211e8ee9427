//! Named response stores backing offline support.
//!
//! This module provides:
//! - `RequestKey`, the request identity (method + URL) entries are keyed by
//! - The `CacheStorage` trait, the host capability the worker is handed
//! - `SqliteStorage`, a persistent implementation with atomic batch inserts

mod storage;
mod traits;

pub use storage::SqliteStorage;
pub use traits::{CacheStorage, CachedEntry, RequestKey};
