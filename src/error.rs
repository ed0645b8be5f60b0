//! Error taxonomy for the request path and the advisory event handlers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
  /// The network primitive failed before producing a response.
  #[error("network unavailable: {0}")]
  NetworkUnavailable(String),

  /// No entry for the request. Internal control signal only.
  #[error("cache miss")]
  CacheMiss,

  /// The network failed and the cached copy is older than the TTL.
  #[error("cached copy is {age_secs}s old, beyond the {ttl_secs}s TTL")]
  StaleBeyondTtl { age_secs: i64, ttl_secs: u64 },

  #[error("malformed push payload: {0}")]
  MalformedPushPayload(String),

  /// Some manifest entries could not be pre-fetched.
  #[error("{} of {total} manifest entries failed: {}", .failed.len(), .failed.join(", "))]
  PartialInstallFailure { failed: Vec<String>, total: usize },
}
