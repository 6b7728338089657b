//! Core traits and types for the response cache.

use chrono::{DateTime, Utc};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::Result;
use crate::net::{Request, Response};

/// Which family a cache generation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationKind {
  /// App shell and static assets, primed at install
  Static,
  /// API responses and primed media, filled at runtime
  Dynamic,
}

impl GenerationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Dynamic => "dynamic",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "static" => Some(Self::Static),
      "dynamic" => Some(Self::Dynamic),
      _ => None,
    }
  }
}

/// A named cache container as recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration {
  pub name: String,
  pub kind: GenerationKind,
  pub created_at: DateTime<Utc>,
}

/// Handle to an opened generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheHandle {
  name: String,
  kind: GenerationKind,
}

impl CacheHandle {
  pub(crate) fn new(name: impl Into<String>, kind: GenerationKind) -> Self {
    Self {
      name: name.into(),
      kind,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> GenerationKind {
    self.kind
  }
}

/// Identity of a cached response: method, absolute URL (fragment stripped) and
/// the values of any configured key headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: Method,
  pub url: Url,
  pub vary: Vec<(String, String)>,
}

impl RequestKey {
  pub fn new(method: Method, mut url: Url) -> Self {
    url.set_fragment(None);
    Self {
      method,
      url,
      vary: Vec::new(),
    }
  }

  /// Build the key for `request`, picking up only the headers named in `key_headers`.
  pub fn from_request(request: &Request, key_headers: &[String]) -> Self {
    let mut vary: Vec<(String, String)> = key_headers
      .iter()
      .filter_map(|name| {
        request
          .header(name)
          .map(|value| (name.to_ascii_lowercase(), value.to_string()))
      })
      .collect();
    vary.sort();

    Self {
      vary,
      ..Self::new(request.method.clone(), request.url.clone())
    }
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut input = format!("{} {}", self.method, self.url);
    for (name, value) in &self.vary {
      input.push('\n');
      input.push_str(name);
      input.push(':');
      input.push_str(value);
    }

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub key: RequestKey,
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Implementations must give per-key atomicity for `put`, `match_entry` and
/// `delete`; concurrent callers on different keys never block each other's
/// correctness. A backend failure is an `Err`, never a miss.
pub trait CacheStorage: Send + Sync + 'static {
  /// Open (creating if needed) the generation called `name`.
  fn open(&self, name: &str, kind: GenerationKind) -> Result<CacheHandle>;

  /// Enumerate every generation the store knows about.
  fn generations(&self) -> Result<Vec<CacheGeneration>>;

  /// Drop a generation and all of its entries. Returns whether it existed.
  fn delete_generation(&self, name: &str) -> Result<bool>;

  fn match_entry(&self, handle: &CacheHandle, key: &RequestKey) -> Result<Option<CacheEntry>>;

  /// Store `response` under `key`, replacing any previous entry.
  fn put(&self, handle: &CacheHandle, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store every entry or none of them.
  fn put_all(&self, handle: &CacheHandle, entries: &[(RequestKey, Response)]) -> Result<()>;

  fn delete(&self, handle: &CacheHandle, key: &RequestKey) -> Result<bool>;

  fn entry_count(&self, handle: &CacheHandle) -> Result<usize>;

  /// Small durable key/value facts about the store (installed and serving versions).
  fn meta(&self, key: &str) -> Result<Option<String>>;

  fn set_meta(&self, key: &str, value: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_fragment_is_ignored() {
    let a = RequestKey::new(Method::GET, url("https://app.test/api/quran/chapters#top"));
    let b = RequestKey::new(Method::GET, url("https://app.test/api/quran/chapters"));
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_method_and_query_distinguish_keys() {
    let get = RequestKey::new(Method::GET, url("https://app.test/api/x?page=1"));
    let head = RequestKey::new(Method::HEAD, url("https://app.test/api/x?page=1"));
    let other = RequestKey::new(Method::GET, url("https://app.test/api/x?page=2"));
    assert_ne!(get.cache_hash(), head.cache_hash());
    assert_ne!(get.cache_hash(), other.cache_hash());
  }

  #[test]
  fn test_only_configured_headers_participate() {
    let request = Request::get(url("https://app.test/api/user/profile"))
      .with_header("Accept-Language", "ar")
      .with_header("X-Trace", "abc");
    let key = RequestKey::from_request(&request, &["accept-language".to_string()]);
    assert_eq!(
      key.vary,
      vec![("accept-language".to_string(), "ar".to_string())]
    );

    let english = Request::get(url("https://app.test/api/user/profile"))
      .with_header("Accept-Language", "en");
    let other = RequestKey::from_request(&english, &["accept-language".to_string()]);
    assert_ne!(key.cache_hash(), other.cache_hash());
  }

  #[test]
  fn test_generation_kind_round_trips_through_str() {
    for kind in [GenerationKind::Static, GenerationKind::Dynamic] {
      assert_eq!(GenerationKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(GenerationKind::parse("media"), None);
  }
}
