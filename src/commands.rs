//! CLI command handlers.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use reqwest::Method;
use std::sync::Arc;
use url::Url;

use crate::cache::{CacheStorage, SqliteStorage};
use crate::config::Config;
use crate::host::{Host, Registration};
use crate::net::{HttpNetwork, Network, OfflineNetwork, Request};
use crate::worker::Worker;

/// Install the configured version and retire stale stores.
pub async fn install(config: &Config, storage: Arc<SqliteStorage>) -> Result<()> {
  let network = Arc::new(HttpNetwork::new(&config.network)?);
  let worker = Worker::from_config(config, storage, Arc::clone(&network))?;
  let mut host = Host::new(network);

  match host.register(worker).await? {
    Registration::AlreadyActive => println!("{} is already active", config.cache_version().store_name()),
    Registration::Waiting { install } => {
      println!("Installed {} ({} entries), waiting", install.store, install.entries)
    }
    Registration::Activated { install, activate } => {
      println!("Installed {} ({} entries)", install.store, install.entries);
      for name in &activate.deleted {
        println!("  deleted {}", name);
      }
      for name in &activate.failed {
        println!("  could not delete {} (see log)", name);
      }
    }
  }

  Ok(())
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
  pub method: String,
  pub data: Option<String>,
  pub offline: bool,
  pub show_body: bool,
}

/// Send each target through the worker and print where its response came from.
pub async fn fetch(
  config: &Config,
  storage: Arc<SqliteStorage>,
  targets: &[String],
  options: &FetchOptions,
) -> Result<()> {
  let method = Method::from_bytes(options.method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method {}: {}", options.method, e))?;

  let requests = targets
    .iter()
    .map(|target| {
      resolve_target(&config.origin, target).map(|url| {
        let request = Request::new(method.clone(), url);
        match &options.data {
          Some(data) => request.with_body(data.as_bytes()),
          None => request,
        }
      })
    })
    .collect::<Result<Vec<_>>>()?;

  if options.offline {
    run_fetch(config, storage, Arc::new(OfflineNetwork), requests, options.show_body).await
  } else {
    let network = Arc::new(HttpNetwork::new(&config.network)?);
    run_fetch(config, storage, network, requests, options.show_body).await
  }
}

async fn run_fetch<N: Network + 'static>(
  config: &Config,
  storage: Arc<SqliteStorage>,
  network: Arc<N>,
  requests: Vec<Request>,
  show_body: bool,
) -> Result<()> {
  let worker = Worker::from_config(config, Arc::clone(&storage), Arc::clone(&network))?;
  let mut host = Host::new(network);

  // An empty store is what a failed install leaves behind.
  let store = worker.store_name();
  let installed = storage.has(store).await? && storage.entry_count(store).await? > 0;
  if installed {
    host.resume(worker).await?;
  } else if let Err(e) = host.register(worker).await {
    eprintln!("Worker not installed, requests go straight to the network: {}", e);
  }

  let total = requests.len();
  let results = join_all(requests.into_iter().map(|request| {
    let url = request.url.clone();
    let host = &host;
    async move { (url, host.fetch(request).await) }
  }))
  .await;

  let mut failures = 0;
  for (url, result) in results {
    match result {
      Ok(mut fetched) => {
        // Spawned writes die with the runtime, so let them land first.
        fetched.cache_write_settled().await;
        println!(
          "{} {:<22} {:<11} {:>9} bytes  {:<24} {}",
          fetched.response.status,
          fetched.response.status_text,
          fetched.source,
          fetched.response.body.len(),
          fetched.response.header("content-type").unwrap_or("-"),
          url
        );
        if show_body {
          println!("{}", fetched.response.text());
        }
      }
      Err(e) => {
        failures += 1;
        eprintln!("error {}: {}", url, e);
      }
    }
  }

  if failures > 0 {
    return Err(eyre!("{} of {} requests failed", failures, total));
  }
  Ok(())
}

/// List every store with its entry count; `*` marks the current one.
pub async fn stores(config: &Config, storage: Arc<SqliteStorage>) -> Result<()> {
  let version = config.cache_version();
  let names = storage.keys().await?;

  if names.is_empty() {
    println!("No cache stores");
    return Ok(());
  }

  for name in names {
    let count = storage.entry_count(&name).await?;
    let marker = if name == version.store_name() {
      "*"
    } else if version.owns(&name) {
      "-"
    } else {
      " "
    };
    println!("{} {:<32} {:>6} entries", marker, name, count);
  }

  Ok(())
}

/// Resolve a CLI target: paths are joined to the origin, absolute URLs are kept.
fn resolve_target(origin: &Url, target: &str) -> Result<Url> {
  origin
    .join(target)
    .map_err(|e| eyre!("Invalid target {}: {}", target, e))
}
