//! Error taxonomy for the offline layer.
//!
//! Origin responses with 4xx/5xx statuses are not errors here: they are
//! ordinary [`Response`](crate::net::Response) values handed back verbatim.

use thiserror::Error;

use crate::lifecycle::LifecycleState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  /// The cache or queue backend could not be read or written.
  #[error("storage error: {0}")]
  Storage(String),

  /// The request never reached the origin.
  #[error("network error: {0}")]
  Network(String),

  /// Priming the shell manifest failed; nothing from the batch was committed.
  #[error("install failed: {0}")]
  Install(String),

  /// A lifecycle trigger arrived in a state that cannot accept it.
  #[error("cannot {action} while {state:?}")]
  InvalidState {
    action: &'static str,
    state: LifecycleState,
  },

  /// The request could not be built as written; resending it cannot succeed.
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  #[error("invalid configuration: {0}")]
  Config(String),

  /// A message-channel payload could not be understood.
  #[error("invalid message: {0}")]
  Message(String),
}

impl Error {
  pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
    Error::Storage(format!("{}: {}", context, err))
  }

  pub fn is_network(&self) -> bool {
    matches!(self, Error::Network(_))
  }
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    if err.is_builder() {
      Error::InvalidRequest(err.to_string())
    } else {
      Error::Network(err.to_string())
    }
  }
}
