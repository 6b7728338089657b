//! Versioned response cache with offline-aware read strategies.
//!
//! This module provides:
//! - Named cache generations (one static, one dynamic per build version)
//! - SQLite-backed storage that survives restarts
//! - Cache-first, network-first and read-through strategies with
//!   background revalidation and offline fallbacks

mod generation;
mod layer;
mod storage;
mod traits;

pub use generation::{GenerationManager, Generations};
pub use layer::StrategyExecutor;
pub use storage::{add_all, SqliteStorage};
pub use traits::{
  CacheEntry, CacheGeneration, CacheHandle, CacheStorage, GenerationKind, RequestKey,
};
