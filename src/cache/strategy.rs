//! Retrieval strategies that combine the store with the network.

use color_eyre::eyre::eyre;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::storage::CacheStore;
use super::traits::{CacheEntry, CacheResult, Clock, RequestKey};
use crate::error::CacheError;
use crate::http::{Network, Request, Response};

/// Runs the caching strategies against a store and the network.
///
/// Background revalidations started by stale-while-revalidate are tracked so
/// the host can await them with [`StrategyExecutor::settle`] before exiting.
pub struct StrategyExecutor<S: CacheStore> {
  storage: Arc<S>,
  network: Arc<dyn Network>,
  clock: Arc<dyn Clock>,
  pending: Arc<Mutex<Vec<JoinHandle<Option<Response>>>>>,
}

impl<S: CacheStore> StrategyExecutor<S> {
  pub fn new(storage: Arc<S>, network: Arc<dyn Network>, clock: Arc<dyn Clock>) -> Self {
    Self {
      storage,
      network,
      clock,
      pending: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn network(&self) -> &Arc<dyn Network> {
    &self.network
  }

  /// Fetch `request` and store it in `partition`. Used to pre-populate
  /// partitions, so non-2xx responses count as failures.
  pub async fn populate(&self, request: &Request, partition: &str) -> color_eyre::Result<()> {
    let response = self.network.fetch(request).await?;
    if !response.is_success() {
      return Err(eyre!("{} answered HTTP {}", request.url, response.status));
    }

    let entry = CacheEntry::new(request, &response, self.clock.now());
    self
      .storage
      .put(partition, &entry)
      .map_err(|e| e.wrap_err(format!("Failed to store {}", request.url)))
  }

  /// Serve from cache without touching the network; fetch and store on miss.
  ///
  /// Network failures become a synthetic 404 so optional assets never fail
  /// the caller.
  pub async fn cache_first(&self, request: &Request, partition: &str) -> CacheResult<Response> {
    let key = RequestKey::for_request(request);
    if let Ok(entry) = self.lookup(partition, &key) {
      debug!(partition, key = key.description(), "cache hit");
      return CacheResult::from_cache(entry.to_response(), entry.stored_at, false);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(partition, request, &response);
        }
        CacheResult::from_network(response)
      }
      Err(e) => {
        warn!(partition, key = key.description(), error = %e, "cache miss and network failed");
        CacheResult::synthetic(Response::synthetic_not_found())
      }
    }
  }

  /// Prefer the network; on failure serve a cached copy younger than `ttl`.
  ///
  /// The TTL runs from the write time of the entry. Reading the entry does
  /// not extend it.
  pub async fn network_first(
    &self,
    request: &Request,
    partition: &str,
    ttl: Duration,
  ) -> Result<CacheResult<Response>, CacheError> {
    let network_error = match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(partition, request, &response);
        }
        return Ok(CacheResult::from_network(response));
      }
      Err(e) => e,
    };

    let key = RequestKey::for_request(request);
    let entry = match self.lookup(partition, &key) {
      Ok(entry) => entry,
      Err(_) => {
        info!(partition, key = key.description(), error = %network_error, "network failed, nothing cached");
        return Err(network_error);
      }
    };

    let age_secs = entry.age_secs(self.clock.now());
    let ttl_secs = ttl.as_secs();
    if age_secs < i64::try_from(ttl_secs).unwrap_or(i64::MAX) {
      info!(partition, key = key.description(), age_secs, "network failed, serving cached copy");
      Ok(CacheResult::offline(entry.to_response(), entry.stored_at))
    } else {
      info!(partition, key = key.description(), age_secs, ttl_secs, "network failed, cached copy expired");
      Err(CacheError::StaleBeyondTtl { age_secs, ttl_secs })
    }
  }

  /// Serve the cached candidate at once and refresh it in the background.
  ///
  /// Without a candidate the refresh is awaited; if that fails too the
  /// offline document is served from `offline_partition`, and failing that a
  /// synthetic 503.
  pub async fn stale_while_revalidate(
    &self,
    request: &Request,
    partition: &str,
    offline_document: &Request,
    offline_partition: &str,
  ) -> CacheResult<Response> {
    let key = RequestKey::for_request(request);
    let candidate = self.lookup(partition, &key).ok();

    let revalidation = self.spawn_revalidation(request.clone(), partition.to_string());

    if let Some(entry) = candidate {
      debug!(partition, key = key.description(), "serving cached candidate, revalidating");
      self.track(revalidation);
      return CacheResult::from_cache(entry.to_response(), entry.stored_at, true);
    }

    match revalidation.await {
      Ok(Some(response)) => CacheResult::from_network(response),
      Ok(None) | Err(_) => {
        let offline_key = RequestKey::for_request(offline_document);
        match self.lookup(offline_partition, &offline_key) {
          Ok(entry) => {
            info!(key = key.description(), "navigation offline, serving offline document");
            CacheResult::offline(entry.to_response(), entry.stored_at)
          }
          Err(_) => {
            warn!(key = key.description(), "navigation offline and no offline document cached");
            CacheResult::synthetic(Response::synthetic_offline())
          }
        }
      }
    }
  }

  /// Wait for every background revalidation started so far.
  pub async fn settle(&self) {
    let handles = match self.pending.lock() {
      Ok(mut pending) => std::mem::take(&mut *pending),
      Err(e) => {
        warn!(error = %e, "revalidation tracker poisoned");
        return;
      }
    };
    if handles.is_empty() {
      return;
    }

    debug!(count = handles.len(), "waiting for background revalidations");
    for result in futures::future::join_all(handles).await {
      if let Err(e) = result {
        warn!(error = %e, "background revalidation panicked");
      }
    }
  }

  /// Number of revalidations that have not finished yet.
  pub fn pending_revalidations(&self) -> usize {
    self
      .pending
      .lock()
      .map(|pending| pending.iter().filter(|h| !h.is_finished()).count())
      .unwrap_or(0)
  }

  fn spawn_revalidation(
    &self,
    request: Request,
    partition: String,
  ) -> JoinHandle<Option<Response>> {
    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);
    let clock = Arc::clone(&self.clock);

    tokio::spawn(async move {
      match network.fetch(&request).await {
        Ok(response) => {
          if response.is_success() {
            let entry = CacheEntry::new(&request, &response, clock.now());
            if let Err(e) = storage.put(&partition, &entry) {
              warn!(partition = %partition, key = entry.key.description(), error = %e, "failed to store revalidated response");
            }
          }
          Some(response)
        }
        Err(e) => {
          debug!(url = %request.url, error = %e, "revalidation failed");
          None
        }
      }
    })
  }

  fn track(&self, handle: JoinHandle<Option<Response>>) {
    match self.pending.lock() {
      Ok(mut pending) => {
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
      }
      // The task still runs to completion; it just can't be awaited.
      Err(e) => warn!(error = %e, "revalidation tracker poisoned"),
    }
  }

  /// Read an entry. Storage failures count as a miss.
  fn lookup(&self, partition: &str, key: &RequestKey) -> Result<CacheEntry, CacheError> {
    match self.storage.get(partition, key) {
      Ok(Some(entry)) => Ok(entry),
      Ok(None) => Err(CacheError::CacheMiss),
      Err(e) => {
        warn!(partition, key = key.description(), error = %e, "cache read failed");
        Err(CacheError::CacheMiss)
      }
    }
  }

  /// Write a response. Failures are logged, never surfaced.
  fn store(&self, partition: &str, request: &Request, response: &Response) {
    let entry = CacheEntry::new(request, response, self.clock.now());
    match self.storage.put(partition, &entry) {
      Ok(()) => debug!(partition, key = entry.key.description(), "stored"),
      Err(e) => warn!(partition, key = entry.key.description(), error = %e, "cache write failed"),
    }
  }
}

impl<S: CacheStore> Clone for StrategyExecutor<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      clock: Arc::clone(&self.clock),
      pending: Arc::clone(&self.pending),
    }
  }
}
