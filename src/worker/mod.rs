//! The offline-support worker.
//!
//! A worker is bound to one origin and one cache version. It answers three events:
//! - `Install`: open the versioned store and pre-cache the manifest, all or nothing
//! - `Activate`: delete stale stores sharing the prefix, then claim clients
//! - `Fetch`: serve same-origin GETs network-first with cache fallback

mod interceptor;
mod lifecycle;
mod manifest;

pub use interceptor::{FetchOutcome, Fetched, ResponseSource};
pub use lifecycle::{ActivateReport, InstallReport};
pub use manifest::{CacheVersion, Manifest, DEFAULT_CACHE_PREFIX};

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::cache::CacheStorage;
use crate::config::Config;
use crate::net::{Network, Request};

use interceptor::Interceptor;
use lifecycle::CacheLifecycle;

/// Event kinds a worker registers handlers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
}

/// An event delivered by the host.
#[derive(Debug)]
pub enum WorkerEvent {
  Install,
  Activate,
  Fetch(Request),
}

impl WorkerEvent {
  pub fn kind(&self) -> EventKind {
    match self {
      Self::Install => EventKind::Install,
      Self::Activate => EventKind::Activate,
      Self::Fetch(_) => EventKind::Fetch,
    }
  }
}

/// What a handler produced.
#[derive(Debug)]
pub enum EventOutcome {
  Installed(InstallReport),
  Activated(ActivateReport),
  Fetch(FetchOutcome),
}

pub struct Worker<S, N> {
  version: CacheVersion,
  lifecycle: CacheLifecycle<S, N>,
  interceptor: Interceptor<S, N>,
}

impl<S, N> Worker<S, N>
where
  S: CacheStorage + 'static,
  N: Network,
{
  pub fn new(
    origin: &Url,
    version: CacheVersion,
    manifest: Manifest,
    storage: Arc<S>,
    network: Arc<N>,
  ) -> Self {
    let interceptor = Interceptor::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      origin,
      version.store_name(),
    );
    let lifecycle = CacheLifecycle::new(storage, network, origin.clone(), version.clone(), manifest);

    Self {
      version,
      lifecycle,
      interceptor,
    }
  }

  pub fn from_config(config: &Config, storage: Arc<S>, network: Arc<N>) -> Result<Self> {
    Ok(
      Self::new(
        &config.origin,
        config.cache_version(),
        config.manifest()?,
        storage,
        network,
      )
      .with_skip_waiting(config.cache.skip_waiting),
    )
  }

  /// Without skip-waiting, an installed worker waits while another one is active.
  pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
    self.lifecycle.set_skip_waiting(skip_waiting);
    self
  }

  pub fn version(&self) -> &CacheVersion {
    &self.version
  }

  pub fn store_name(&self) -> &str {
    self.version.store_name()
  }

  /// Route an event to the handler registered for its kind.
  ///
  /// Only install and activate can fail; fetch always produces an outcome.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
    debug!(kind = ?event.kind(), store = self.store_name(), "dispatch");

    match event {
      WorkerEvent::Install => self.lifecycle.install().await.map(EventOutcome::Installed),
      WorkerEvent::Activate => self.lifecycle.activate().await.map(EventOutcome::Activated),
      WorkerEvent::Fetch(request) => Ok(EventOutcome::Fetch(self.interceptor.handle(request).await)),
    }
  }
}
