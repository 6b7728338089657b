//! Lifecycle controller: install, activation, and the interception point.
//!
//! ```text
//! Installing --install ok--> Waiting --skip_waiting--> Activating --> Serving
//!     ^  |
//!     +--+ install failed (previous serving instance stays in charge)
//! ```
//!
//! Only a `Serving` controller answers intercepted requests; in every other
//! state the host sends requests straight to the network.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

use crate::cache::{CacheStorage, GenerationManager, StrategyExecutor};
use crate::classify::RequestClassifier;
use crate::config::{Config, NotificationConfig};
use crate::error::{Error, Result};
use crate::intercept::{Interceptor, Pipeline};
use crate::net::{Network, Request, Response};
use crate::notify::{self, Notification};
use crate::queue::{DeferredActionQueue, DrainReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  Waiting,
  Activating,
  Serving,
}

/// Answer for one intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
  Respond(Response),
  /// Not serving: the host should hit the network itself
  PassThrough,
}

/// Commands the host can post over the message channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
  /// Prime one resource (typically recitation audio) into the dynamic cache
  CacheAudio { url: String },
  SkipWaiting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReply {
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl MessageReply {
  fn ok() -> Self {
    Self {
      success: true,
      error: None,
    }
  }

  fn failed(err: impl std::fmt::Display) -> Self {
    Self {
      success: false,
      error: Some(err.to_string()),
    }
  }
}

pub struct LifecycleController<S: CacheStorage, N: Network> {
  state: Mutex<LifecycleState>,
  config: Config,
  storage: Arc<S>,
  network: Arc<N>,
  queue: Arc<DeferredActionQueue>,
  generations: GenerationManager<S, N>,
  pipeline: Pipeline<S, N>,
}

impl<S: CacheStorage, N: Network> LifecycleController<S, N> {
  pub fn new(config: Config, storage: S, network: N, queue: DeferredActionQueue) -> Result<Self> {
    let storage = Arc::new(storage);
    let network = Arc::new(network);
    let queue = Arc::new(queue);

    let generations = GenerationManager::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      &config.cache,
      config.manifest_urls()?,
    );
    let executor = StrategyExecutor::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      Arc::clone(&queue),
      generations.current().clone(),
    )
    .with_key_headers(&config.cache.key_headers);
    let pipeline = Pipeline::new(RequestClassifier::from_config(&config.cache), executor);

    Ok(Self {
      state: Mutex::new(LifecycleState::Installing),
      config,
      storage,
      network,
      queue,
      generations,
      pipeline,
    })
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, state: LifecycleState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn network(&self) -> &Arc<N> {
    &self.network
  }

  pub fn queue(&self) -> &Arc<DeferredActionQueue> {
    &self.queue
  }

  pub fn generations(&self) -> &GenerationManager<S, N> {
    &self.generations
  }

  /// Pick up where a previous process left off: an activated version serves
  /// immediately, an installed one waits for activation.
  pub fn resume(&self) -> Result<LifecycleState> {
    if self.state() == LifecycleState::Installing {
      if self.generations.is_serving()? {
        info!(version = self.generations.version(), "resuming as serving instance");
        self.set_state(LifecycleState::Serving);
      } else if self.generations.is_installed()? {
        self.set_state(LifecycleState::Waiting);
      }
    }
    Ok(self.state())
  }

  /// Prime the shell manifest. On failure the controller stays in `Installing`.
  pub async fn install(&self) -> Result<()> {
    let state = self.state();
    if state != LifecycleState::Installing {
      return Err(Error::InvalidState {
        action: "install",
        state,
      });
    }

    info!(version = self.generations.version(), "installing");
    if let Err(err) = self.generations.install().await {
      error!(error = %err, "error caching static files");
      return Err(err);
    }

    self.set_state(LifecycleState::Waiting);

    if self.config.auto_activate {
      self.skip_waiting()?;
    }
    Ok(())
  }

  /// Activation trigger. Calling it again while serving re-runs the cleanup.
  pub fn skip_waiting(&self) -> Result<()> {
    let previous = self.state();
    match previous {
      LifecycleState::Waiting | LifecycleState::Serving => {}
      state => {
        return Err(Error::InvalidState {
          action: "activate",
          state,
        })
      }
    }

    self.set_state(LifecycleState::Activating);
    info!("activating");

    match self.generations.activate() {
      Ok(deleted) => {
        info!(deleted = deleted.len(), "activated successfully");
        self.set_state(LifecycleState::Serving);
        Ok(())
      }
      Err(err) => {
        error!(error = %err, "activation failed");
        self.set_state(previous);
        Err(err)
      }
    }
  }

  /// The interception point.
  pub async fn handle_fetch(&self, request: Request) -> Interception {
    if self.state() != LifecycleState::Serving {
      return Interception::PassThrough;
    }
    Interception::Respond(self.pipeline.handle(request).await)
  }

  pub fn interceptor(&self) -> &Pipeline<S, N> {
    &self.pipeline
  }

  pub async fn message(&self, message: Message) -> MessageReply {
    match message {
      Message::CacheAudio { url } => {
        let result = match self.config.resolve(&url) {
          Ok(url) => self.pipeline.executor().prime(url).await,
          Err(err) => Err(err),
        };
        match result {
          Ok(()) => MessageReply::ok(),
          Err(err) => {
            error!(url = %url, error = %err, "error caching audio");
            MessageReply::failed(err)
          }
        }
      }
      Message::SkipWaiting => match self.skip_waiting() {
        Ok(()) => MessageReply::ok(),
        Err(err) => MessageReply::failed(err),
      },
    }
  }

  /// Parse a JSON message (`{"type":"CACHE_AUDIO","url":"..."}`) and handle it.
  pub async fn message_json(&self, payload: &[u8]) -> Result<MessageReply> {
    let message: Message =
      serde_json::from_slice(payload).map_err(|e| Error::Message(e.to_string()))?;
    Ok(self.message(message).await)
  }

  /// Background sync event. Only the configured tag drains the queue.
  pub async fn sync(&self, tag: &str) -> Result<Option<DrainReport>> {
    info!(tag, "background sync triggered");
    if tag != self.config.queue.sync_tag {
      return Ok(None);
    }
    self.reconnect().await.map(Some)
  }

  /// Connectivity is back: replay deferred actions.
  pub async fn reconnect(&self) -> Result<DrainReport> {
    self.queue.drain_all(self.network.as_ref()).await
  }

  pub fn push(&self, payload: &[u8]) -> Result<Option<Notification>> {
    notify::from_push(payload, &self.config.notifications)
  }

  pub fn notification_click(&self, action: Option<&str>) -> Option<String> {
    notify::on_click(action, self.notifications())
  }

  fn notifications(&self) -> &NotificationConfig {
    &self.config.notifications
  }
}
