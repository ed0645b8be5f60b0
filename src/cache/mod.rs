//! Partitioned response cache with generation-based garbage collection.
//!
//! This module provides:
//! - A name-partitioned store of responses (SQLite-backed)
//! - Partition naming `<prefix>-<kind>-<generation>` and the activation GC policy
//! - The cache-first, network-first and stale-while-revalidate strategies

mod generation;
mod storage;
mod strategy;
mod traits;

pub use generation::{GenerationManager, PartitionId, PartitionKind};
pub use storage::{CacheStore, SqliteStorage};
pub use strategy::StrategyExecutor;
pub use traits::{CacheEntry, CacheResult, CacheSource, Clock, RequestKey, SystemClock};
