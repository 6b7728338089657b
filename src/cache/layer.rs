//! Strategy executor: runs the read/write policy for a classified request.

use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::generation::Generations;
use super::traits::{CacheEntry, CacheHandle, CacheStorage, GenerationKind, RequestKey};
use crate::classify::{Policy, Strategy};
use crate::error::{Error, Result};
use crate::net::{Network, Request, Response};
use crate::net::{DATA_UNAVAILABLE, INVALID_REQUEST, NETWORK_UNAVAILABLE, QUEUED_FOR_RETRY};
use crate::queue::DeferredActionQueue;

/// Sits between the host's request pipeline and the network, answering from
/// the current generations where policy allows.
///
/// Storage failures never reach the caller: a failed read is a miss and a
/// failed write is logged. When serving, every request gets a response.
pub struct StrategyExecutor<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  queue: Arc<DeferredActionQueue>,
  generations: Generations,
  key_headers: Arc<[String]>,
}

impl<S: CacheStorage, N: Network> StrategyExecutor<S, N> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    queue: Arc<DeferredActionQueue>,
    generations: Generations,
  ) -> Self {
    Self {
      storage,
      network,
      queue,
      generations,
      key_headers: Arc::from(Vec::new()),
    }
  }

  /// Request headers that take part in cache keys.
  pub fn with_key_headers(mut self, key_headers: &[String]) -> Self {
    self.key_headers = Arc::from(key_headers.to_vec());
    self
  }

  pub async fn execute(&self, request: Request, policy: Policy) -> Response {
    match policy.strategy {
      Strategy::CacheFirst => self.cache_first(request, policy).await,
      Strategy::NetworkFirst => self.network_first(request, policy).await,
      Strategy::ReadThrough => self.read_through(request, policy).await,
      Strategy::PassThroughMutate => self.pass_through_mutate(request).await,
    }
  }

  /// Serve a hit immediately and refresh it in the background; on a miss go to
  /// the network and store an ok answer.
  async fn cache_first(&self, request: Request, policy: Policy) -> Response {
    let handle = self.generations.handle(policy.kind);
    let key = self.key_for(&request);

    if let Some(entry) = self.lookup(handle, &key) {
      debug!(url = %request.url, "serving from cache");
      self.revalidate(handle.clone(), key, request);
      return entry.response;
    }

    match self.network.fetch(&request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store(handle, &key, &response);
        }
        response
      }
      Err(err) => {
        warn!(url = %request.url, error = %err, "offline and not cached");
        if policy.navigation_fallback {
          return self.navigation_fallback(&request);
        }
        Response::json_error(DATA_UNAVAILABLE)
      }
    }
  }

  async fn network_first(&self, request: Request, policy: Policy) -> Response {
    let handle = self.generations.handle(policy.kind);
    let key = self.key_for(&request);

    match self.network.fetch(&request).await {
      Ok(response) => {
        if response.is_ok() && request.method == Method::GET {
          self.store(handle, &key, &response);
        }
        response
      }
      Err(err) => {
        if let Some(entry) = self.lookup(handle, &key) {
          debug!(url = %request.url, error = %err, "network failed, serving cached copy");
          return entry.response;
        }
        warn!(url = %request.url, error = %err, "network unavailable");
        if policy.navigation_fallback {
          return self.navigation_fallback(&request);
        }
        Response::json_error(NETWORK_UNAVAILABLE)
      }
    }
  }

  /// Cached copy from either current generation if there is one, otherwise
  /// the network answer, unstored.
  async fn read_through(&self, request: Request, policy: Policy) -> Response {
    let key = self.key_for(&request);

    for handle in self.generations.search_order(policy.kind) {
      if let Some(entry) = self.lookup(handle, &key) {
        return entry.response;
      }
    }

    match self.network.fetch(&request).await {
      Ok(response) => response,
      Err(err) => {
        warn!(url = %request.url, error = %err, "offline and not cached");
        if policy.navigation_fallback {
          return self.navigation_fallback(&request);
        }
        Response::json_error(DATA_UNAVAILABLE)
      }
    }
  }

  /// Forward a mutation. If it never reaches the origin it is queued for replay
  /// and the caller gets an immediate 503. Requests that cannot be sent at all
  /// are refused with a 400 and never queued.
  async fn pass_through_mutate(&self, request: Request) -> Response {
    match self.network.fetch(&request).await {
      Ok(response) => response,
      Err(err) if !err.is_network() => {
        warn!(method = %request.method, url = %request.url, error = %err, "refusing unsendable action");
        Response::json_status(400, INVALID_REQUEST)
      }
      Err(err) => match self.queue.enqueue(&request) {
        Ok(id) => {
          info!(id, method = %request.method, url = %request.url, error = %err, "queued offline action");
          Response::json_error(QUEUED_FOR_RETRY)
        }
        Err(queue_err) => {
          warn!(url = %request.url, error = %queue_err, "could not queue offline action");
          Response::json_error(NETWORK_UNAVAILABLE)
        }
      },
    }
  }

  /// Cached app shell root, or the offline page.
  fn navigation_fallback(&self, request: &Request) -> Response {
    let root = request.url.join("/").unwrap_or_else(|_| request.url.clone());
    let key = RequestKey::new(Method::GET, root);

    match self.lookup(&self.generations.static_cache, &key) {
      Some(entry) => entry.response,
      None => Response::offline_page(),
    }
  }

  /// Fetch `url` and store it in the dynamic generation, bypassing classification.
  pub async fn prime(&self, url: Url) -> Result<()> {
    let request = Request::get(url);
    let response = self.network.fetch(&request).await?;
    if !response.is_ok() {
      return Err(Error::Network(format!(
        "{} returned status {}",
        request.url, response.status
      )));
    }

    let key = RequestKey::new(Method::GET, request.url.clone());
    let handle = self
      .storage
      .open(self.generations.dynamic_cache.name(), GenerationKind::Dynamic)?;
    self.storage.put(&handle, &key, &response)?;
    info!(url = %request.url, "primed into dynamic cache");

    Ok(())
  }

  /// Spawn a detached refresh of `key`. Nothing awaits it and its failures are dropped.
  fn revalidate(&self, handle: CacheHandle, key: RequestKey, request: Request) {
    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);

    tokio::spawn(async move {
      match network.fetch(&request).await {
        Ok(response) if response.is_ok() => {
          if let Err(err) = storage.put(&handle, &key, &response) {
            debug!(url = %request.url, error = %err, "background update not stored");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "background update skipped");
        }
        Err(err) => {
          debug!(url = %request.url, error = %err, "background update failed");
        }
      }
    });
  }

  fn key_for(&self, request: &Request) -> RequestKey {
    RequestKey::from_request(request, &self.key_headers)
  }

  fn lookup(&self, handle: &CacheHandle, key: &RequestKey) -> Option<CacheEntry> {
    match self.storage.match_entry(handle, key) {
      Ok(entry) => entry,
      Err(err) => {
        warn!(generation = handle.name(), error = %err, "cache read failed, treating as miss");
        None
      }
    }
  }

  fn store(&self, handle: &CacheHandle, key: &RequestKey, response: &Response) {
    if let Err(err) = self.storage.put(handle, key, response) {
      warn!(generation = handle.name(), url = %key.url, error = %err, "cache write failed");
    }
  }
}

impl<S: CacheStorage, N: Network> Clone for StrategyExecutor<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      queue: Arc::clone(&self.queue),
      generations: self.generations.clone(),
      key_headers: Arc::clone(&self.key_headers),
    }
  }
}
