//! Offline request caching and synchronization.
//!
//! A host hands every outbound request to a [`LifecycleController`]. Once the
//! controller is serving, requests are classified against a static rule table
//! and answered from versioned SQLite-backed caches or the network; mutations
//! that cannot reach the origin are kept in a durable outbox and replayed when
//! connectivity returns.

pub mod cache;
pub mod classify;
pub mod config;
pub mod db;
mod error;
pub mod intercept;
pub mod lifecycle;
pub mod net;
pub mod notify;
pub mod queue;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use lifecycle::{Interception, LifecycleController, LifecycleState, Message, MessageReply};
