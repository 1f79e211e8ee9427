//! Install and activate: store creation, pre-caching and stale-store cleanup.

use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, RequestKey};
use crate::net::{Network, Request};

use super::manifest::{CacheVersion, Manifest};

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub store: String,
  /// Number of manifest entries committed
  pub entries: usize,
  /// Replace the previous worker without waiting for open sessions to close
  pub skip_waiting: bool,
}

/// Result of activation. Stores that failed to delete are reported, not fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  pub deleted: Vec<String>,
  pub failed: Vec<String>,
  /// All open sessions are now controlled by this worker
  pub claimed: bool,
}

/// Owns creation and deletion of this worker's cache stores.
pub struct CacheLifecycle<S, N> {
  storage: Arc<S>,
  network: Arc<N>,
  origin: Url,
  version: CacheVersion,
  manifest: Manifest,
  skip_waiting: bool,
}

impl<S: CacheStorage, N: Network> CacheLifecycle<S, N> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    origin: Url,
    version: CacheVersion,
    manifest: Manifest,
  ) -> Self {
    Self {
      storage,
      network,
      origin,
      version,
      manifest,
      skip_waiting: true,
    }
  }

  /// Whether a successful install asks to replace the active worker right away.
  pub fn set_skip_waiting(&mut self, skip_waiting: bool) {
    self.skip_waiting = skip_waiting;
  }

  /// Open the current store and pre-cache the manifest as one batch.
  ///
  /// Every asset is fetched before anything is written. A rejected fetch or a non-2xx
  /// answer fails the whole install and commits nothing.
  pub async fn install(&self) -> Result<InstallReport> {
    let store = self.version.store_name();
    info!(store, assets = self.manifest.paths().len(), "installing");

    self.storage.open(store).await?;

    let urls = self.manifest.resolve(&self.origin)?;
    let fetches = urls.into_iter().map(|url| async move {
      let request = Request::get(url);
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to pre-cache {}: {}", request.url, e))?;

      if !response.is_ok() {
        return Err(eyre!(
          "Failed to pre-cache {}: server answered {} {}",
          request.url,
          response.status,
          response.status_text
        ));
      }

      debug!(url = %request.url, bytes = response.body.len(), "fetched manifest asset");
      Ok::<_, color_eyre::Report>((RequestKey::from(&request), response))
    });

    let entries = try_join_all(fetches).await?;
    self.storage.put_all(store, &entries).await?;

    info!(store, entries = entries.len(), "install complete");

    Ok(InstallReport {
      store: store.to_string(),
      entries: entries.len(),
      skip_waiting: self.skip_waiting,
    })
  }

  /// Delete every other store carrying this worker's prefix, then claim clients.
  ///
  /// Deletions run concurrently and are joined only for completion; one failure does
  /// not stop the rest.
  pub async fn activate(&self) -> Result<ActivateReport> {
    let names = self.storage.keys().await?;
    let stale: Vec<String> = names
      .into_iter()
      .filter(|name| self.version.is_stale(name))
      .collect();

    let results = join_all(stale.iter().map(|name| async move {
      let result = self.storage.delete(name).await;
      (name, result)
    }))
    .await;

    let mut report = ActivateReport::default();
    for (name, result) in results {
      match result {
        Ok(true) => {
          info!(store = %name, "deleted stale cache store");
          report.deleted.push(name.clone());
        }
        Ok(false) => debug!(store = %name, "stale cache store already gone"),
        Err(e) => {
          warn!(store = %name, error = %e, "failed to delete stale cache store");
          report.failed.push(name.clone());
        }
      }
    }

    report.claimed = true;
    info!(
      store = self.version.store_name(),
      deleted = report.deleted.len(),
      failed = report.failed.len(),
      "activated and claimed clients"
    );

    Ok(report)
  }
}
