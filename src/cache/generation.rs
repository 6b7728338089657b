//! Cache generations: naming, install-time priming, activation cleanup.

use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::storage::add_all;
use super::traits::{CacheHandle, CacheStorage, GenerationKind};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::net::Network;

const INSTALLED_VERSION: &str = "installed_version";
const SERVING_VERSION: &str = "serving_version";

/// The two live generations for one build version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generations {
  pub static_cache: CacheHandle,
  pub dynamic_cache: CacheHandle,
}

impl Generations {
  pub fn for_version(prefix: &str, version: &str) -> Self {
    Self {
      static_cache: CacheHandle::new(
        format!("{}-static-v{}", prefix, version),
        GenerationKind::Static,
      ),
      dynamic_cache: CacheHandle::new(
        format!("{}-dynamic-v{}", prefix, version),
        GenerationKind::Dynamic,
      ),
    }
  }

  pub fn handle(&self, kind: GenerationKind) -> &CacheHandle {
    match kind {
      GenerationKind::Static => &self.static_cache,
      GenerationKind::Dynamic => &self.dynamic_cache,
    }
  }

  /// Both live generations, `first` before the other.
  pub fn search_order(&self, first: GenerationKind) -> [&CacheHandle; 2] {
    match first {
      GenerationKind::Static => [&self.static_cache, &self.dynamic_cache],
      GenerationKind::Dynamic => [&self.dynamic_cache, &self.static_cache],
    }
  }

  pub fn contains(&self, name: &str) -> bool {
    self.static_cache.name() == name || self.dynamic_cache.name() == name
  }
}

pub struct GenerationManager<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  version: String,
  current: Generations,
  manifest: Vec<Url>,
}

impl<S: CacheStorage, N: Network> GenerationManager<S, N> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    config: &CacheConfig,
    manifest: Vec<Url>,
  ) -> Self {
    Self {
      storage,
      network,
      version: config.version.clone(),
      current: Generations::for_version(&config.prefix, &config.version),
      manifest,
    }
  }

  pub fn current(&self) -> &Generations {
    &self.current
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Prime the shell manifest into the static generation.
  ///
  /// On failure nothing from the manifest is committed and whatever generation
  /// was serving before stays authoritative.
  pub async fn install(&self) -> Result<()> {
    let handle = self
      .storage
      .open(self.current.static_cache.name(), GenerationKind::Static)
      .map_err(|e| Error::Install(e.to_string()))?;

    info!(
      generation = handle.name(),
      files = self.manifest.len(),
      "caching static files"
    );

    add_all(
      self.storage.as_ref(),
      self.network.as_ref(),
      &handle,
      &self.manifest,
    )
    .await
    .map_err(|e| Error::Install(e.to_string()))?;

    self.storage.set_meta(INSTALLED_VERSION, &self.version)?;
    info!(generation = handle.name(), "static files cached");
    Ok(())
  }

  /// Make the current generations the only ones and record this version as serving.
  ///
  /// Safe to call repeatedly. Returns the names of the generations deleted.
  pub fn activate(&self) -> Result<Vec<String>> {
    self
      .storage
      .open(self.current.static_cache.name(), GenerationKind::Static)?;
    self
      .storage
      .open(self.current.dynamic_cache.name(), GenerationKind::Dynamic)?;

    let mut deleted = Vec::new();
    for generation in self.storage.generations()? {
      if self.current.contains(&generation.name) {
        continue;
      }
      info!(generation = %generation.name, "deleting old cache");
      if self.storage.delete_generation(&generation.name)? {
        deleted.push(generation.name);
      } else {
        warn!(generation = %generation.name, "old cache already gone");
      }
    }

    self.storage.set_meta(SERVING_VERSION, &self.version)?;
    info!(version = %self.version, "activated");

    Ok(deleted)
  }

  /// Whether a previous activation of this same version is recorded in storage.
  pub fn is_serving(&self) -> Result<bool> {
    self.recorded(SERVING_VERSION)
  }

  /// Whether this version's shell was fully primed by an earlier install.
  pub fn is_installed(&self) -> Result<bool> {
    self.recorded(INSTALLED_VERSION)
  }

  fn recorded(&self, key: &str) -> Result<bool> {
    Ok(self.storage.meta(key)?.as_deref() == Some(self.version.as_str()))
  }
}
