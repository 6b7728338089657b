//! Request classification: the single table that decides how each request is served.

use reqwest::Method;

use crate::cache::GenerationKind;
use crate::config::CacheConfig;
use crate::net::Request;

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Serve from cache, revalidate in the background
  CacheFirst,
  /// Prefer the network, fall back to cache
  NetworkFirst,
  /// Serve from cache when present, otherwise fetch without storing
  ReadThrough,
  /// Mutations: always forwarded, queued when the network is down
  PassThroughMutate,
}

/// The classifier's verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
  pub strategy: Strategy,
  pub kind: GenerationKind,
  /// Page loads get the cached root or the offline page when all else fails
  pub navigation_fallback: bool,
}

impl Policy {
  fn new(strategy: Strategy, kind: GenerationKind) -> Self {
    Self {
      strategy,
      kind,
      navigation_fallback: false,
    }
  }
}

/// URL-path prefix mapped to a strategy and the generation it reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRule {
  pub prefix: String,
  pub strategy: Strategy,
  pub kind: GenerationKind,
}

#[derive(Debug, Clone)]
pub struct RequestClassifier {
  rules: Vec<ClassificationRule>,
  static_extensions: Vec<String>,
}

impl RequestClassifier {
  /// Build the table: cache-first prefixes win over the generic API root.
  pub fn new(api_root: &str, cache_first: &[String], static_extensions: &[String]) -> Self {
    let mut rules: Vec<ClassificationRule> = cache_first
      .iter()
      .map(|prefix| ClassificationRule {
        prefix: prefix.clone(),
        strategy: Strategy::CacheFirst,
        kind: GenerationKind::Dynamic,
      })
      .collect();

    rules.push(ClassificationRule {
      prefix: api_root.to_string(),
      strategy: Strategy::NetworkFirst,
      kind: GenerationKind::Dynamic,
    });

    let static_extensions = static_extensions
      .iter()
      .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
      .collect();

    Self {
      rules,
      static_extensions,
    }
  }

  pub fn from_config(config: &CacheConfig) -> Self {
    Self::new(
      &config.api_root,
      &config.cache_first,
      &config.static_extensions,
    )
  }

  pub fn rules(&self) -> &[ClassificationRule] {
    &self.rules
  }

  pub fn classify(&self, request: &Request) -> Policy {
    if request.method != Method::GET {
      return Policy::new(Strategy::PassThroughMutate, GenerationKind::Dynamic);
    }

    let path = request.url.path();
    if let Some(rule) = self.rules.iter().find(|r| path.starts_with(&r.prefix)) {
      return Policy::new(rule.strategy, rule.kind);
    }

    if request.is_navigation() {
      return Policy {
        navigation_fallback: true,
        ..Policy::new(Strategy::CacheFirst, GenerationKind::Static)
      };
    }

    if self.is_static_asset(path) {
      return Policy::new(Strategy::CacheFirst, GenerationKind::Static);
    }

    Policy::new(Strategy::ReadThrough, GenerationKind::Static)
  }

  fn is_static_asset(&self, path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
      Some((_, ext)) => self
        .static_extensions
        .iter()
        .any(|known| known.eq_ignore_ascii_case(ext)),
      None => false,
    }
  }
}
