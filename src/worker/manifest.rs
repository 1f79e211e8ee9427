//! Cache versioning and the pre-cache manifest.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use url::Url;

/// Prefix shared by every store this worker creates.
pub const DEFAULT_CACHE_PREFIX: &str = "bf-portfolio-";

/// Site shell, critical fonts and the hero image.
const DEFAULT_MANIFEST: &[&str] = &[
  "/",
  "/fonts/space-grotesk/space-grotesk-v22-latin-regular.woff2",
  "/fonts/space-grotesk/space-grotesk-v22-latin-600.woff2",
  "/fonts/archivo-black/archivo-black-v23-latin-regular.woff2",
  "/images/BenjaminFiller2.png",
];

/// A cache version and the store name derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheVersion {
  prefix: String,
  version: String,
  store_name: String,
}

impl CacheVersion {
  pub fn new(prefix: &str, version: &str) -> Self {
    Self {
      prefix: prefix.to_string(),
      version: version.to_string(),
      store_name: format!("{}{}", prefix, version),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// `<prefix><version>`, e.g. "bf-portfolio-v1".
  pub fn store_name(&self) -> &str {
    &self.store_name
  }

  /// Whether a store name belongs to this worker family.
  pub fn owns(&self, name: &str) -> bool {
    name.starts_with(&self.prefix)
  }

  /// Owned by this worker family but not the current version.
  pub fn is_stale(&self, name: &str) -> bool {
    self.owns(name) && name != self.store_name
  }
}

/// Ordered list of asset paths pre-cached at install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
  paths: Vec<String>,
}

impl Manifest {
  /// Validate and build a manifest.
  ///
  /// Paths must be origin-relative (start with '/') and unique: the install batch
  /// treats a repeated request as an error.
  pub fn new(paths: Vec<String>) -> Result<Self> {
    let mut seen = HashSet::new();

    for path in &paths {
      if !path.starts_with('/') || path.starts_with("//") {
        return Err(eyre!(
          "Manifest path must be origin-relative and start with '/': {}",
          path
        ));
      }
      if !seen.insert(path.as_str()) {
        return Err(eyre!("Duplicate manifest path: {}", path));
      }
    }

    Ok(Self { paths })
  }

  pub fn paths(&self) -> &[String] {
    &self.paths
  }

  /// Resolve every path against the worker's origin.
  pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>> {
    self
      .paths
      .iter()
      .map(|path| {
        origin
          .join(path)
          .map_err(|e| eyre!("Invalid manifest path {}: {}", path, e))
      })
      .collect()
  }
}

impl Default for Manifest {
  fn default() -> Self {
    Self {
      paths: DEFAULT_MANIFEST.iter().map(|p| p.to_string()).collect(),
    }
  }
}
