//! Offline-first request cache for web front-ends.
//!
//! Every outbound request goes through [`LifecycleController::on_fetch`],
//! which classifies it and serves it cache-first, network-first with a TTL
//! fallback, or stale-while-revalidate against a partitioned SQLite store.
//! Deployments install a new cache generation and activation removes the
//! superseded ones.

pub mod cache;
pub mod classify;
pub mod config;
pub mod deferred;
pub mod error;
pub mod event;
pub mod http;
pub mod lifecycle;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::CacheError;
pub use lifecycle::{Host, LifecycleController, LifecycleEvent};
