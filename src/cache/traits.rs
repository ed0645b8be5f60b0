//! Core types for the caching system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::http::{Headers, Request, Response};

/// Normalized identity of a request inside a partition.
///
/// Method and URL (without fragment) form the identity; query strings are
/// significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  hash: String,
  description: String,
}

impl RequestKey {
  pub fn for_request(request: &Request) -> Self {
    let mut url = request.url.clone();
    url.set_fragment(None);
    let description = format!("{} {}", request.method.as_str().to_uppercase(), url);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { hash, description }
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }

  /// Human readable form, e.g. `GET https://example.com/`
  pub fn description(&self) -> &str {
    &self.description
  }
}

/// A stored response. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub key: RequestKey,
  pub url: String,
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(request: &Request, response: &Response, stored_at: DateTime<Utc>) -> Self {
    let mut url = request.url.clone();
    url.set_fragment(None);
    Self {
      key: RequestKey::for_request(request),
      url: url.to_string(),
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      stored_at,
    }
  }

  /// Seconds elapsed since the entry was written.
  pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
    (now - self.stored_at).num_seconds()
  }

  pub fn to_response(&self) -> Response {
    Response::new(self.status, self.headers.clone(), self.body.clone())
  }
}

/// Source of wall-clock time for `stored_at` and staleness checks.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Data produced locally because nothing better was available.
  pub fn synthetic(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Synthetic,
      cached_at: None,
    }
  }

  /// Data fetched from the network without touching the cache.
  pub fn passthrough(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Passthrough,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, served without contacting the network
  CacheFresh,
  /// Data from cache while a background refresh is in flight
  CacheStale,
  /// Network unavailable, serving cached data
  Offline,
  /// Locally generated error response
  Synthetic,
  /// Network response that bypassed the cache
  Passthrough,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Network => "network",
      Self::CacheFresh => "cache",
      Self::CacheStale => "cache (revalidating)",
      Self::Offline => "offline",
      Self::Synthetic => "synthetic",
      Self::Passthrough => "passthrough",
    };
    f.write_str(s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use url::Url;

  fn request(method: Method, url: &str) -> Request {
    Request::new(method, Url::parse(url).unwrap())
  }

  #[test]
  fn test_key_ignores_fragment() {
    let a = RequestKey::for_request(&request(Method::GET, "https://e.com/page#top"));
    let b = RequestKey::for_request(&request(Method::GET, "https://e.com/page"));
    assert_eq!(a, b);
    assert_eq!(a.description(), "GET https://e.com/page");
    assert_eq!(a.hash().len(), 64);
  }

  #[test]
  fn test_key_distinguishes_method_and_query() {
    let get = RequestKey::for_request(&request(Method::GET, "https://e.com/api/events?page=1"));
    let head = RequestKey::for_request(&request(Method::HEAD, "https://e.com/api/events?page=1"));
    let page2 = RequestKey::for_request(&request(Method::GET, "https://e.com/api/events?page=2"));
    assert_ne!(get, head);
    assert_ne!(get, page2);
  }

  #[test]
  fn test_entry_age() {
    let stored_at = Utc::now();
    let req = request(Method::GET, "https://e.com/");
    let entry = CacheEntry::new(&req, &Response::synthetic_not_found(), stored_at);
    assert_eq!(entry.age_secs(stored_at + chrono::Duration::seconds(301)), 301);
    assert_eq!(entry.to_response().status, 404);
  }
}
