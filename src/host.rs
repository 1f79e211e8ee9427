//! Host runtime: registers workers and routes requests through the active one.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

use crate::cache::CacheStorage;
use crate::net::{Network, Request};
use crate::worker::{
  ActivateReport, EventOutcome, FetchOutcome, Fetched, InstallReport, Worker, WorkerEvent,
};

/// Result of registering a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
  /// A worker for the same store is already active; nothing ran
  AlreadyActive,
  /// Installed without skip-waiting while another worker is active
  Waiting { install: InstallReport },
  /// Installed, then activated in place of the previous worker
  Activated {
    install: InstallReport,
    activate: ActivateReport,
  },
}

/// Plays the browser's part: at most one active worker per origin, install strictly
/// before activate, and every request handled on its own task.
pub struct Host<S, N> {
  network: Arc<N>,
  active: Option<Arc<Worker<S, N>>>,
  waiting: Option<Worker<S, N>>,
}

impl<S, N> Host<S, N>
where
  S: CacheStorage + 'static,
  N: Network + 'static,
{
  /// `network` is used for requests the worker does not intercept.
  pub fn new(network: Arc<N>) -> Self {
    Self {
      network,
      active: None,
      waiting: None,
    }
  }

  pub fn active_store(&self) -> Option<&str> {
    self.active.as_deref().map(|worker| worker.store_name())
  }

  pub fn waiting_store(&self) -> Option<&str> {
    self.waiting.as_ref().map(|worker| worker.store_name())
  }

  /// Take over a worker installed in an earlier session.
  ///
  /// Activation runs again so stale stores left by an interrupted session are removed.
  pub async fn resume(&mut self, worker: Worker<S, N>) -> Result<ActivateReport> {
    info!(store = worker.store_name(), "resuming installed worker");
    let activate = run_activate(&worker).await?;
    self.active = Some(Arc::new(worker));
    Ok(activate)
  }

  /// Install a new worker and activate it, or park it as waiting.
  ///
  /// A failed install discards the new worker and leaves the current one in charge;
  /// the next registration retries.
  pub async fn register(&mut self, worker: Worker<S, N>) -> Result<Registration> {
    if self.active_store() == Some(worker.store_name()) {
      return Ok(Registration::AlreadyActive);
    }

    let install = match worker.dispatch(WorkerEvent::Install).await {
      Ok(EventOutcome::Installed(report)) => report,
      Ok(other) => return Err(eyre!("Install handler produced {:?}", other)),
      Err(e) => {
        warn!(
          store = worker.store_name(),
          active = self.active_store().unwrap_or("none"),
          error = %e,
          "install failed; keeping current worker"
        );
        return Err(e);
      }
    };

    if !install.skip_waiting && self.active.is_some() {
      info!(
        store = worker.store_name(),
        active = self.active_store().unwrap_or("none"),
        "installed; waiting for the active worker to be released"
      );
      self.waiting = Some(worker);
      return Ok(Registration::Waiting { install });
    }

    // Activation only starts once install has resolved; `&mut self` keeps them serialized.
    let activate = run_activate(&worker).await?;
    self.promote(worker);

    Ok(Registration::Activated { install, activate })
  }

  /// Promote the waiting worker, if any.
  ///
  /// If activation fails the worker stays waiting.
  pub async fn activate_waiting(&mut self) -> Result<Option<ActivateReport>> {
    let Some(worker) = self.waiting.take() else {
      return Ok(None);
    };

    match run_activate(&worker).await {
      Ok(activate) => {
        self.promote(worker);
        Ok(Some(activate))
      }
      Err(e) => {
        self.waiting = Some(worker);
        Err(e)
      }
    }
  }

  fn promote(&mut self, worker: Worker<S, N>) {
    info!(
      store = worker.store_name(),
      version = worker.version().version(),
      previous = self.active_store().unwrap_or("none"),
      "worker activated"
    );
    // Activation deleted any other version's store, including a waiting worker's.
    if self.waiting_store().is_some_and(|name| name != worker.store_name()) {
      self.waiting = None;
    }
    self.active = Some(Arc::new(worker));
  }

  /// Deliver one request.
  ///
  /// Intercepted requests always yield a response. Requests the worker passes through,
  /// or any request when no worker is active, go straight to the network, and only
  /// those can fail. Dropping the returned future abandons the request; a cache write
  /// that was already spawned still completes.
  pub async fn fetch(&self, request: Request) -> Result<Fetched> {
    let outcome = match &self.active {
      Some(worker) => {
        let worker = Arc::clone(worker);
        AbortOnDrop(tokio::spawn(async move {
          worker.dispatch(WorkerEvent::Fetch(request)).await
        }))
        .await
        .map_err(|e| eyre!("Fetch task failed: {}", e))??
      }
      None => EventOutcome::Fetch(FetchOutcome::Passthrough(request)),
    };

    match outcome {
      EventOutcome::Fetch(FetchOutcome::Respond(fetched)) => Ok(fetched),
      EventOutcome::Fetch(FetchOutcome::Passthrough(request)) => self.passthrough(request).await,
      other => Err(eyre!("Fetch handler produced {:?}", other)),
    }
  }

  async fn passthrough(&self, request: Request) -> Result<Fetched> {
    self
      .network
      .fetch(&request)
      .await
      .map(Fetched::passthrough)
      .map_err(|e| eyre!("{} {} failed: {}", request.method, request.url, e))
  }
}

async fn run_activate<S, N>(worker: &Worker<S, N>) -> Result<ActivateReport>
where
  S: CacheStorage + 'static,
  N: Network,
{
  match worker.dispatch(WorkerEvent::Activate).await? {
    EventOutcome::Activated(report) => Ok(report),
    other => Err(eyre!("Activate handler produced {:?}", other)),
  }
}

/// Join handle that aborts its task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
  type Output = Result<T, JoinError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    Pin::new(&mut self.get_mut().0).poll(cx)
  }
}

impl<T> Drop for AbortOnDrop<T> {
  fn drop(&mut self) {
    self.0.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{RequestKey, SqliteStorage};
  use crate::net::Response;
  use crate::testing::{self, MockNetwork};
  use crate::worker::{CacheVersion, Manifest, ResponseSource, DEFAULT_CACHE_PREFIX};
  use reqwest::Method;
  use std::time::Duration;
  use url::Url;

  type TestHost = Host<SqliteStorage, MockNetwork>;

  fn site() -> Arc<MockNetwork> {
    Arc::new(
      MockNetwork::new()
        .route("/", Response::new(200, "shell"))
        .route("/fonts/a.woff2", Response::new(200, vec![9u8; 16])),
    )
  }

  fn worker(
    storage: &Arc<SqliteStorage>,
    network: &Arc<MockNetwork>,
    version: &str,
  ) -> Worker<SqliteStorage, MockNetwork> {
    Worker::new(
      &testing::origin(),
      CacheVersion::new(DEFAULT_CACHE_PREFIX, version),
      Manifest::new(vec!["/".into(), "/fonts/a.woff2".into()]).unwrap(),
      Arc::clone(storage),
      Arc::clone(network),
    )
  }

  #[tokio::test]
  async fn test_first_install_populates_store() {
    let storage = testing::storage();
    let network = site();
    let mut host: TestHost = Host::new(network.clone());

    let registration = host.register(worker(&storage, &network, "v1")).await.unwrap();

    match registration {
      Registration::Activated { install, activate } => {
        assert_eq!(install.entries, 2);
        assert!(activate.claimed);
      }
      other => panic!("unexpected registration {:?}", other),
    }
    assert_eq!(host.active_store(), Some("bf-portfolio-v1"));
    assert_eq!(storage.entry_count("bf-portfolio-v1").await.unwrap(), 2);
  }

  #[tokio::test]
  async fn test_upgrade_retires_previous_store() {
    let storage = testing::storage();
    let network = site();
    let mut host: TestHost = Host::new(network.clone());

    host.register(worker(&storage, &network, "v1")).await.unwrap();
    host.register(worker(&storage, &network, "v2")).await.unwrap();

    assert_eq!(storage.keys().await.unwrap(), vec!["bf-portfolio-v2"]);
    assert_eq!(storage.entry_count("bf-portfolio-v2").await.unwrap(), 2);
    assert_eq!(host.active_store(), Some("bf-portfolio-v2"));
  }

  #[tokio::test]
  async fn test_registering_active_version_is_noop() {
    let storage = testing::storage();
    let network = site();
    let mut host: TestHost = Host::new(network.clone());

    host.register(worker(&storage, &network, "v1")).await.unwrap();
    let fetches_before = network.requests().len();
    let again = host.register(worker(&storage, &network, "v1")).await.unwrap();

    assert_eq!(again, Registration::AlreadyActive);
    assert_eq!(network.requests().len(), fetches_before);
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_worker() {
    let storage = testing::storage();
    let network = site();
    let mut host: TestHost = Host::new(network.clone());
    host.register(worker(&storage, &network, "v1")).await.unwrap();

    network.fail("/fonts/a.woff2");
    let result = host.register(worker(&storage, &network, "v2")).await;

    assert!(result.is_err());
    assert_eq!(host.active_store(), Some("bf-portfolio-v1"));
    assert_eq!(storage.entry_count("bf-portfolio-v1").await.unwrap(), 2);
    assert_eq!(storage.entry_count("bf-portfolio-v2").await.unwrap(), 0);

    // The old worker still answers from its own store.
    network.set_offline(true);
    let fetched = host.fetch(Request::get(testing::url("/"))).await.unwrap();
    assert_eq!(fetched.source, ResponseSource::Cache);
    assert_eq!(fetched.response.body, b"shell");
  }

  #[tokio::test]
  async fn test_install_retry_succeeds_later() {
    let storage = testing::storage();
    let network = site();
    network.set_offline(true);
    let mut host: TestHost = Host::new(network.clone());

    assert!(host.register(worker(&storage, &network, "v1")).await.is_err());
    assert_eq!(host.active_store(), None);

    network.set_offline(false);
    host.register(worker(&storage, &network, "v1")).await.unwrap();
    assert_eq!(host.active_store(), Some("bf-portfolio-v1"));
  }

  #[tokio::test]
  async fn test_offline_page_load_is_served_from_precache() {
    let storage = testing::storage();
    let network = site();
    let mut host: TestHost = Host::new(network.clone());
    host.register(worker(&storage, &network, "v1")).await.unwrap();

    network.set_offline(true);
    let shell = host.fetch(Request::get(testing::url("/"))).await.unwrap();
    let logo = host.fetch(Request::get(testing::url("/images/logo.png"))).await.unwrap();

    assert_eq!(shell.source, ResponseSource::Cache);
    assert_eq!(logo.source, ResponseSource::Fallback);
    assert_eq!(logo.response.status, 503);
  }

  #[tokio::test]
  async fn test_concurrent_fetches_populate_cache() {
    let storage = testing::storage();
    let network = site();
    for i in 0..8 {
      network.set_route(&format!("/projects/{}", i), Response::new(200, format!("project {}", i)));
    }
    let mut host: TestHost = Host::new(network.clone());
    host.register(worker(&storage, &network, "v1")).await.unwrap();

    let fetches = (0..8).map(|i| host.fetch(Request::get(testing::url(&format!("/projects/{}", i)))));
    let results = futures::future::join_all(fetches).await;

    for (i, result) in results.into_iter().enumerate() {
      let mut fetched = result.unwrap();
      fetched.cache_write_settled().await;
      assert_eq!(fetched.response.text(), format!("project {}", i));
    }
    assert_eq!(storage.entry_count("bf-portfolio-v1").await.unwrap(), 10);
  }

  #[tokio::test]
  async fn test_passthrough_requests_reach_network_uncached() {
    let storage = testing::storage();
    let network = site();
    let mut host: TestHost = Host::new(network.clone());
    host.register(worker(&storage, &network, "v1")).await.unwrap();

    let post = Request::new(Method::POST, testing::url("/")).with_body("form");
    let cross = Request::get(Url::parse("https://plausible.io/js/script.js").unwrap());

    let post = host.fetch(post).await.unwrap();
    let cross = host.fetch(cross).await.unwrap();

    assert_eq!(post.source, ResponseSource::Passthrough);
    assert_eq!(cross.source, ResponseSource::Passthrough);
    assert!(post.cache_write.is_none());
    assert_eq!(storage.entry_count("bf-portfolio-v1").await.unwrap(), 2);
    assert!(network
      .requests()
      .contains(&"GET https://plausible.io/js/script.js".to_string()));
  }

  #[tokio::test]
  async fn test_resumed_worker_serves_previous_session_cache() {
    let storage = testing::storage();
    let network = site();
    {
      let mut first: TestHost = Host::new(network.clone());
      first.register(worker(&storage, &network, "v1")).await.unwrap();
    }

    network.set_offline(true);
    let mut second: TestHost = Host::new(network.clone());
    second.resume(worker(&storage, &network, "v1")).await.unwrap();

    let fetched = second.fetch(Request::get(testing::url("/fonts/a.woff2"))).await.unwrap();
    assert_eq!(fetched.source, ResponseSource::Cache);
    assert_eq!(fetched.response.body, vec![9u8; 16]);
  }

  #[tokio::test]
  async fn test_passthrough_failure_surfaces() {
    let network = Arc::new(MockNetwork::new());
    network.set_offline(true);
    let host: TestHost = Host::new(network);

    let result = host.fetch(Request::get(testing::url("/"))).await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_resume_clears_stores_left_by_interrupted_upgrade() {
    let storage = testing::storage();
    let network = site();
    storage.open("bf-portfolio-v1").await.unwrap();
    storage.open("analytics-cache").await.unwrap();
    // Installed v2, then exited before activation.
    worker(&storage, &network, "v2").dispatch(WorkerEvent::Install).await.unwrap();

    let mut host: TestHost = Host::new(network.clone());
    let activate = host.resume(worker(&storage, &network, "v2")).await.unwrap();

    assert_eq!(activate.deleted, vec!["bf-portfolio-v1"]);
    let mut remaining = storage.keys().await.unwrap();
    remaining.sort();
    assert_eq!(remaining, vec!["analytics-cache", "bf-portfolio-v2"]);
    assert_eq!(host.active_store(), Some("bf-portfolio-v2"));
  }

  #[tokio::test]
  async fn test_install_without_skip_waiting_parks_worker() {
    let storage = testing::storage();
    let network = site();
    let mut host: TestHost = Host::new(network.clone());
    host.register(worker(&storage, &network, "v1")).await.unwrap();

    let registration = host
      .register(worker(&storage, &network, "v2").with_skip_waiting(false))
      .await
      .unwrap();

    assert!(matches!(registration, Registration::Waiting { ref install } if install.entries == 2));
    assert_eq!(host.active_store(), Some("bf-portfolio-v1"));
    assert_eq!(host.waiting_store(), Some("bf-portfolio-v2"));
    // The old store survives until the waiting worker is promoted.
    assert_eq!(storage.entry_count("bf-portfolio-v1").await.unwrap(), 2);

    let activate = host.activate_waiting().await.unwrap().unwrap();

    assert_eq!(activate.deleted, vec!["bf-portfolio-v1"]);
    assert_eq!(host.active_store(), Some("bf-portfolio-v2"));
    assert_eq!(host.waiting_store(), None);
    assert!(host.activate_waiting().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_first_worker_activates_without_skip_waiting() {
    let storage = testing::storage();
    let network = site();
    let mut host: TestHost = Host::new(network.clone());

    let registration = host
      .register(worker(&storage, &network, "v1").with_skip_waiting(false))
      .await
      .unwrap();

    assert!(matches!(registration, Registration::Activated { .. }));
    assert_eq!(host.active_store(), Some("bf-portfolio-v1"));
    assert_eq!(host.waiting_store(), None);
  }

  #[tokio::test]
  async fn test_skip_waiting_install_supersedes_waiting_worker() {
    let storage = testing::storage();
    let network = site();
    let mut host: TestHost = Host::new(network.clone());
    host.register(worker(&storage, &network, "v1")).await.unwrap();
    host
      .register(worker(&storage, &network, "v2").with_skip_waiting(false))
      .await
      .unwrap();

    host.register(worker(&storage, &network, "v3")).await.unwrap();

    assert_eq!(host.active_store(), Some("bf-portfolio-v3"));
    assert_eq!(host.waiting_store(), None);
    assert_eq!(storage.keys().await.unwrap(), vec!["bf-portfolio-v3"]);
  }

  #[tokio::test]
  async fn test_dropped_request_abandons_fetch_and_cache_write() {
    let storage = testing::storage();
    let network = site();
    network.set_route("/slow", Response::new(200, "late"));
    let mut host: TestHost = Host::new(network.clone());
    host.register(worker(&storage, &network, "v1")).await.unwrap();
    network.set_delay(Duration::from_millis(200));

    let request = host.fetch(Request::get(testing::url("/slow")));
    let result = tokio::time::timeout(Duration::from_millis(20), request).await;
    assert!(result.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;

    let key = RequestKey::from(&Request::get(testing::url("/slow")));
    assert!(storage.lookup("bf-portfolio-v1", &key).await.unwrap().is_none());
    assert_eq!(storage.entry_count("bf-portfolio-v1").await.unwrap(), 2);
  }

  #[tokio::test]
  async fn test_spawned_cache_write_outlives_response() {
    let storage = testing::storage();
    let network = site();
    network.set_route("/about", Response::new(200, "about"));
    let mut host: TestHost = Host::new(network.clone());
    host.register(worker(&storage, &network, "v1")).await.unwrap();

    let fetched = host.fetch(Request::get(testing::url("/about"))).await.unwrap();
    assert!(fetched.cache_write.is_some());
    drop(fetched);

    tokio::time::sleep(Duration::from_millis(100)).await;

    let key = RequestKey::from(&Request::get(testing::url("/about")));
    let entry = storage.lookup("bf-portfolio-v1", &key).await.unwrap().unwrap();
    assert_eq!(entry.response.body, b"about");
  }

  #[tokio::test]
  async fn test_offline_passthrough_requests_fail_uncached() {
    let storage = testing::storage();
    let network = site();
    let mut host: TestHost = Host::new(network.clone());
    host.register(worker(&storage, &network, "v1")).await.unwrap();
    network.set_offline(true);

    let post = host.fetch(Request::new(Method::POST, testing::url("/")).with_body("form")).await;
    let cross = host
      .fetch(Request::get(Url::parse("https://plausible.io/js/script.js").unwrap()))
      .await;

    assert!(post.is_err());
    assert!(cross.is_err());
    assert_eq!(storage.entry_count("bf-portfolio-v1").await.unwrap(), 2);
    assert_eq!(storage.keys().await.unwrap(), vec!["bf-portfolio-v1"]);
  }
}
