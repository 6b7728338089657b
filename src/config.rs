use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::db::Database;
use crate::error::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the app is served from; relative manifest entries resolve against it
  pub origin: String,
  /// Where cache.db, outbox.db and logs live (default: $XDG_DATA_HOME/offline-sync)
  pub data_dir: Option<PathBuf>,
  /// Skip waiting right after a successful install
  pub auto_activate: bool,
  pub cache: CacheConfig,
  pub queue: QueueConfig,
  pub notifications: NotificationConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      data_dir: None,
      auto_activate: false,
      cache: CacheConfig::default(),
      queue: QueueConfig::default(),
      notifications: NotificationConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Generation names are `{prefix}-static-v{version}` / `{prefix}-dynamic-v{version}`
  pub prefix: String,
  pub version: String,
  pub api_root: String,
  /// Read-mostly API resources served cache-first
  pub cache_first: Vec<String>,
  pub static_extensions: Vec<String>,
  /// Shell assets primed at install
  pub manifest: Vec<String>,
  /// Request headers that take part in the cache key
  pub key_headers: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "my-quran-journey".to_string(),
      version: "1.0.0".to_string(),
      api_root: "/api/".to_string(),
      cache_first: to_strings(&[
        "/api/quran/chapters",
        "/api/quran/reciters",
        "/api/quran/chapter/",
        "/api/quran/verse/",
      ]),
      static_extensions: to_strings(&[
        ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2", ".ttf",
      ]),
      manifest: to_strings(&[
        "/",
        "/static/js/bundle.js",
        "/static/css/main.css",
        "/manifest.json",
        "https://fonts.googleapis.com/css2?family=Amiri:wght@400;700&family=Noto+Naskh+Arabic:wght@400;700&display=swap",
      ]),
      key_headers: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Oldest actions are dropped beyond this many
  pub max_actions: usize,
  /// Sync tag that triggers a drain
  pub sync_tag: String,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_actions: 500,
      sync_tag: "background-sync-learning-progress".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub icon: String,
  pub badge: String,
  /// Page opened when a notification is clicked
  pub open_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/badge-72x72.png".to_string(),
      open_url: "/".to_string(),
    }
  }
}

fn to_strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-sync/config.yaml
  ///
  /// Without a file the built-in defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-sync").join("config.yaml");
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
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Directory holding the databases and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    match &self.data_dir {
      Some(dir) => Ok(dir.clone()),
      None => Database::default_dir().map_err(|e| eyre!("{}", e)),
    }
  }

  pub fn origin_url(&self) -> crate::Result<Url> {
    Url::parse(&self.origin)
      .map_err(|e| Error::Config(format!("invalid origin '{}': {}", self.origin, e)))
  }

  /// Resolve a possibly relative URL against the origin.
  pub fn resolve(&self, target: &str) -> crate::Result<Url> {
    self
      .origin_url()?
      .join(target)
      .map_err(|e| Error::Config(format!("invalid url '{}': {}", target, e)))
  }

  pub fn manifest_urls(&self) -> crate::Result<Vec<Url>> {
    self.cache.manifest.iter().map(|u| self.resolve(u)).collect()
  }
}
