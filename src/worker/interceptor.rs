//! Request interception: eligibility filter and network-first policy.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::{Origin, Url};

use crate::cache::{CacheStorage, CachedEntry, RequestKey};
use crate::net::{Network, Request, Response};

/// Where a delivered response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Network failed; served from the current store
  Cache,
  /// Network failed and nothing was cached; synthesized 503
  Fallback,
  /// Not intercepted; the host fetched it directly
  Passthrough,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Fallback => "fallback",
      Self::Passthrough => "passthrough",
    };
    f.pad(name)
  }
}

/// A response delivered to the page, with metadata about its source.
#[derive(Debug)]
pub struct Fetched {
  pub response: Response,
  pub source: ResponseSource,
  /// When the response was cached (if served from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Background write of the network response into the store
  pub cache_write: Option<JoinHandle<()>>,
}

impl Fetched {
  pub fn from_network(response: Response, cache_write: JoinHandle<()>) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
      cache_write: Some(cache_write),
    }
  }

  pub fn from_cache(entry: CachedEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Cache,
      cached_at: Some(entry.cached_at),
      cache_write: None,
    }
  }

  pub fn fallback() -> Self {
    Self {
      response: Response::offline_fallback(),
      source: ResponseSource::Fallback,
      cached_at: None,
      cache_write: None,
    }
  }

  pub fn passthrough(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Passthrough,
      cached_at: None,
      cache_write: None,
    }
  }

  /// Wait for the background cache write, if one was scheduled.
  pub async fn cache_write_settled(&mut self) {
    if let Some(handle) = self.cache_write.take() {
      if let Err(e) = handle.await {
        warn!(error = %e, "cache write task did not complete");
      }
    }
  }
}

/// Outcome of offering a request to the worker.
#[derive(Debug)]
pub enum FetchOutcome {
  /// Not eligible; the host handles the request as if no worker existed
  Passthrough(Request),
  Respond(Fetched),
}

/// Serves same-origin GETs network-first, falling back to the current store.
pub struct Interceptor<S, N> {
  storage: Arc<S>,
  network: Arc<N>,
  origin: Origin,
  store: String,
}

impl<S, N> Interceptor<S, N>
where
  S: CacheStorage + 'static,
  N: Network,
{
  pub fn new(storage: Arc<S>, network: Arc<N>, origin: &Url, store: &str) -> Self {
    Self {
      storage,
      network,
      origin: origin.origin(),
      store: store.to_string(),
    }
  }

  /// Only same-origin GET requests are intercepted.
  pub fn is_eligible(&self, request: &Request) -> bool {
    request.is_get() && request.is_same_origin(&self.origin)
  }

  /// Handle one intercepted request.
  ///
  /// Never fails: a rejected fetch falls back to the store, and a miss there yields
  /// the synthesized 503.
  pub async fn handle(&self, request: Request) -> FetchOutcome {
    if !self.is_eligible(&request) {
      debug!(method = %request.method, url = %request.url, "passthrough");
      return FetchOutcome::Passthrough(request);
    }

    let key = RequestKey::from(&request);
    debug!(request = %key.description(), "network attempted");

    match self.network.fetch(&request).await {
      Ok(response) => {
        debug!(request = %key.description(), status = response.status, "network ok");
        // Snapshot before the original is handed back.
        let snapshot = response.clone();
        let write = self.schedule_write(key, snapshot);
        FetchOutcome::Respond(Fetched::from_network(response, write))
      }
      Err(e) => {
        debug!(request = %key.description(), error = %e, "network failed, cache lookup");
        FetchOutcome::Respond(self.lookup_fallback(&key).await)
      }
    }
  }

  fn schedule_write(&self, key: RequestKey, snapshot: Response) -> JoinHandle<()> {
    let storage = Arc::clone(&self.storage);
    let store = self.store.clone();

    tokio::spawn(async move {
      match storage.put(&store, &key, &snapshot).await {
        Ok(()) => debug!(store = %store, request = %key.description(), "cached"),
        Err(e) => warn!(store = %store, request = %key.description(), error = %e, "cache write failed"),
      }
    })
  }

  async fn lookup_fallback(&self, key: &RequestKey) -> Fetched {
    match self.storage.lookup(&self.store, key).await {
      Ok(Some(entry)) => {
        debug!(request = %key.description(), "cache hit");
        Fetched::from_cache(entry)
      }
      Ok(None) => {
        debug!(request = %key.description(), "cache miss, fallback synthesized");
        Fetched::fallback()
      }
      Err(e) => {
        warn!(request = %key.description(), error = %e, "cache lookup failed, fallback synthesized");
        Fetched::fallback()
      }
    }
  }
}
