use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::NetworkConfig;

use super::types::{Request, Response};

/// A rejected fetch: no response object was obtained.
///
/// HTTP error statuses are not network errors; they arrive as `Ok(Response)`.
#[derive(Debug, Error)]
pub enum NetworkError {
  #[error("network unavailable")]
  Offline,

  #[error("request timed out: {0}")]
  Timeout(String),

  #[error("connection failed: {0}")]
  Connect(String),

  #[error("failed to read response body: {0}")]
  Body(String),

  #[error("request failed: {0}")]
  Request(String),
}

impl From<reqwest::Error> for NetworkError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      Self::Timeout(e.to_string())
    } else if e.is_connect() {
      Self::Connect(e.to_string())
    } else if e.is_body() || e.is_decode() {
      Self::Body(e.to_string())
    } else {
      Self::Request(e.to_string())
    }
  }
}

/// Asynchronous fetch capability provided by the host.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Fetches over HTTP(S) with reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(config.user_agent.as_str())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    debug!(method = %request.method, url = %request.url, "network fetch");

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone())
      .headers(request.headers.clone());
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder.send().await?;

    let status = response.status();
    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();

    // A body that fails mid-stream is a rejected fetch, same as a dropped connection.
    let body = response.bytes().await?.to_vec();

    let mut fetched = Response::new(status.as_u16(), body);
    fetched.headers = headers;
    Ok(fetched)
  }
}

/// A network that rejects every fetch. Used by `fetch --offline`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    debug!(url = %request.url, "offline network rejected fetch");
    Err(NetworkError::Offline)
  }
}
