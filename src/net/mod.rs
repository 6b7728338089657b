//! Request/response model and the network seam.
//!
//! Everything above this module talks to the origin through [`Network`], so
//! tests can script connectivity without a socket.

mod client;
mod types;

use std::future::Future;

use crate::error::Result;

pub use client::HttpNetwork;
pub use types::{Headers, Request, RequestMode, Response};
pub use types::{DATA_UNAVAILABLE, INVALID_REQUEST, NETWORK_UNAVAILABLE, QUEUED_FOR_RETRY};

/// Transport used to reach the origin.
///
/// `Err(Error::Network)` means the request never reached the origin. Any
/// response the origin produced, including 4xx/5xx, is `Ok`.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}
