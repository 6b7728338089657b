//! Shared test doubles: a scripted network and a storage backend that always fails.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use url::Url;

use crate::cache::{
  CacheEntry, CacheGeneration, CacheHandle, CacheStorage, GenerationKind, RequestKey,
};
use crate::error::{Error, Result};
use crate::net::{Network, Request, Response};

pub const ORIGIN: &str = "https://app.test";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn json(status: u16, body: &str) -> Response {
  Response::new(
    status,
    vec![("Content-Type".to_string(), "application/json".to_string())],
    body,
  )
}

/// In-process origin. Unrouted URLs answer 404.
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Response>>,
  failing: Mutex<HashSet<String>>,
  rejected: Mutex<HashSet<String>>,
  online: AtomicBool,
  calls: AtomicUsize,
  log: Mutex<Vec<Request>>,
  delay: Mutex<Option<Duration>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      failing: Mutex::new(HashSet::new()),
      rejected: Mutex::new(HashSet::new()),
      online: AtomicBool::new(true),
      calls: AtomicUsize::new(0),
      log: Mutex::new(Vec::new()),
      delay: Mutex::new(None),
    }
  }

  pub fn route(&self, path: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), response);
  }

  /// Make requests to `path` fail as if the connection dropped.
  pub fn fail(&self, path: &str) {
    self.failing.lock().unwrap().insert(url(path).to_string());
  }

  /// Make requests to `path` fail before sending, like a malformed header would.
  pub fn reject(&self, path: &str) {
    self.rejected.lock().unwrap().insert(url(path).to_string());
  }

  pub fn recover(&self, path: &str) {
    self.failing.lock().unwrap().remove(url(path).as_str());
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn requests(&self) -> Vec<Request> {
    self.log.lock().unwrap().clone()
  }
}

impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.log.lock().unwrap().push(request.clone());

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let target = request.url.to_string();
    if self.rejected.lock().unwrap().contains(&target) {
      return Err(Error::InvalidRequest(format!("cannot build request: {}", target)));
    }
    if !self.online.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&target) {
      return Err(Error::Network(format!("connection refused: {}", target)));
    }

    let routed = self.routes.lock().unwrap().get(&target).cloned();
    Ok(routed.unwrap_or_else(|| Response::new(404, vec![], "not found")))
  }
}

/// Storage whose backend is permanently unavailable.
pub struct BrokenStorage;

impl BrokenStorage {
  fn unavailable<T>() -> Result<T> {
    Err(Error::Storage("disk unavailable".to_string()))
  }
}

impl CacheStorage for BrokenStorage {
  fn open(&self, _name: &str, _kind: GenerationKind) -> Result<CacheHandle> {
    Self::unavailable()
  }

  fn generations(&self) -> Result<Vec<CacheGeneration>> {
    Self::unavailable()
  }

  fn delete_generation(&self, _name: &str) -> Result<bool> {
    Self::unavailable()
  }

  fn match_entry(&self, _handle: &CacheHandle, _key: &RequestKey) -> Result<Option<CacheEntry>> {
    Self::unavailable()
  }

  fn put(&self, _handle: &CacheHandle, _key: &RequestKey, _response: &Response) -> Result<()> {
    Self::unavailable()
  }

  fn put_all(&self, _handle: &CacheHandle, _entries: &[(RequestKey, Response)]) -> Result<()> {
    Self::unavailable()
  }

  fn delete(&self, _handle: &CacheHandle, _key: &RequestKey) -> Result<bool> {
    Self::unavailable()
  }

  fn entry_count(&self, _handle: &CacheHandle) -> Result<usize> {
    Self::unavailable()
  }

  fn meta(&self, _key: &str) -> Result<Option<String>> {
    Self::unavailable()
  }

  fn set_meta(&self, _key: &str, _value: &str) -> Result<()> {
    Self::unavailable()
  }
}
