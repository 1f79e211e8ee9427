use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::worker::{CacheVersion, Manifest, DEFAULT_CACHE_PREFIX};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the worker is registered for (e.g. "https://benjaminfiller.com")
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Asset paths pre-cached at install, in order
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  #[serde(default)]
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Prefix shared by every store this worker owns
  #[serde(default = "default_prefix")]
  pub prefix: String,
  /// Current cache version; bump it to retire the previous store
  #[serde(default = "default_version")]
  pub version: String,
  /// SQLite database path (defaults to $XDG_DATA_HOME/offline-worker/cache.db)
  pub database: Option<PathBuf>,
  /// Replace the active worker as soon as install succeeds
  #[serde(default = "default_skip_waiting")]
  pub skip_waiting: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: default_prefix(),
      version: default_version(),
      database: None,
      skip_waiting: default_skip_waiting(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_user_agent")]
  pub user_agent: String,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
      user_agent: default_user_agent(),
    }
  }
}

fn default_skip_waiting() -> bool {
  true
}

fn default_prefix() -> String {
  DEFAULT_CACHE_PREFIX.to_string()
}

fn default_version() -> String {
  "v1".to_string()
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_user_agent() -> String {
  concat!("offline-worker/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_manifest() -> Vec<String> {
  Manifest::default().paths().to_vec()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-worker/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offline-worker/config.yaml\n\
                 See offline-worker.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offline-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate YAML configuration.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  /// Replace the configured origin (e.g. from the command line) and re-validate.
  pub fn with_origin(self, origin: Url) -> Result<Self> {
    let config = Config { origin, ..self };
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if !matches!(self.origin.scheme(), "http" | "https") || !self.origin.has_host() {
      return Err(eyre!(
        "origin must be an http(s) URL with a host, got {}",
        self.origin
      ));
    }
    if self.cache.prefix.is_empty() {
      return Err(eyre!("cache.prefix must not be empty"));
    }
    if self.cache.version.is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    self.manifest()?;
    Ok(())
  }

  pub fn cache_version(&self) -> CacheVersion {
    CacheVersion::new(&self.cache.prefix, &self.cache.version)
  }

  pub fn manifest(&self) -> Result<Manifest> {
    Manifest::new(self.manifest.clone())
  }

  /// Database path from config, or the default under the user data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.database {
      return Ok(path.clone());
    }

    let data_dir = data_dir()?;
    Ok(data_dir.join("cache.db"))
  }
}

/// Per-user data directory for the database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let base = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(base.join("offline-worker"))
}
