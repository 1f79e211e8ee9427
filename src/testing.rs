//! Test doubles for the injected host capabilities.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::cache::SqliteStorage;
use crate::net::{Network, NetworkError, Request, Response};

pub const ORIGIN: &str = "https://benjaminfiller.com";

pub fn origin() -> Url {
  Url::parse(ORIGIN).unwrap()
}

pub fn url(path: &str) -> Url {
  origin().join(path).unwrap()
}

pub fn storage() -> Arc<SqliteStorage> {
  Arc::new(SqliteStorage::open_in_memory().unwrap())
}

/// Scripted network: fixed routes, per-URL failures, a global offline switch and an
/// optional latency. Unrouted URLs answer 404.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Response>>,
  failing: Mutex<HashSet<String>>,
  offline: AtomicBool,
  delay: Mutex<Option<Duration>>,
  requests: Mutex<Vec<String>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(self, path: &str, response: Response) -> Self {
    self.set_route(path, response);
    self
  }

  pub fn set_route(&self, path: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), response);
  }

  pub fn fail(&self, path: &str) {
    self.failing.lock().unwrap().insert(url(path).to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  /// "METHOD URL" for every fetch attempted so far.
  pub fn requests(&self) -> Vec<String> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let target = request.url.to_string();
    self
      .requests
      .lock()
      .unwrap()
      .push(format!("{} {}", request.method, target));

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if self.offline.load(Ordering::SeqCst) {
      return Err(NetworkError::Offline);
    }
    if self.failing.lock().unwrap().contains(&target) {
      return Err(NetworkError::Connect(format!("connection reset: {}", target)));
    }

    let routed = self.routes.lock().unwrap().get(&target).cloned();
    Ok(routed.unwrap_or_else(|| Response::new(404, "Not Found")))
  }
}
