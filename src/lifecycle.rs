//! Install / activate / fetch entry points and the lifecycle event table.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{
  CacheResult, CacheStore, Clock, GenerationManager, PartitionKind, StrategyExecutor,
};
use crate::classify::{RequestClassifier, Strategy};
use crate::config::Config;
use crate::deferred::{DeferredTaskQueue, Notification, SyncReport, SyncTask};
use crate::error::CacheError;
use crate::http::{Network, Request, Response};

/// Calls into the runtime hosting the cache.
#[async_trait]
pub trait Host: Send + Sync {
  /// Start serving with this instance without waiting for older instances
  /// to drain.
  async fn activate_immediately(&self);

  /// Route already-open clients through this instance without a reload.
  async fn take_over_existing_connections(&self);

  async fn show_notification(&self, notification: Notification);
}

/// Lifecycle events delivered by the host.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
  Install,
  Activate,
  Fetch(Request),
  /// Connectivity restored; the tag names the queued work
  Sync(String),
  /// Raw push message payload
  Push(Vec<u8>),
}

#[derive(Debug)]
pub enum EventOutcome {
  Installed(InstallReport),
  Activated(Result<ActivationReport>),
  Fetched(Result<CacheResult<Response>, CacheError>),
  Synced(SyncReport),
  Pushed(Option<Notification>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Idle,
  Installing,
  Installed,
  Activating,
  Active,
}

/// The only runtime-mutable state of the controller.
#[derive(Debug, Clone)]
pub struct ControllerState {
  pub phase: Phase,
  /// Generation whose partitions serve requests, once activated
  pub active_generation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub stored: Vec<String>,
  pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub generation: String,
  pub deleted: Vec<String>,
}

pub struct LifecycleController<S: CacheStore> {
  config: Arc<Config>,
  generations: GenerationManager,
  classifier: RequestClassifier,
  executor: StrategyExecutor<S>,
  deferred: DeferredTaskQueue,
  host: Arc<dyn Host>,
  state: RwLock<ControllerState>,
}

impl<S: CacheStore> LifecycleController<S> {
  pub fn new(
    config: Arc<Config>,
    storage: Arc<S>,
    network: Arc<dyn Network>,
    clock: Arc<dyn Clock>,
    host: Arc<dyn Host>,
  ) -> Self {
    Self {
      generations: GenerationManager::from_config(&config),
      classifier: RequestClassifier::new(&config),
      executor: StrategyExecutor::new(storage, network, clock),
      deferred: DeferredTaskQueue::new(config.push.clone()),
      host,
      state: RwLock::new(ControllerState {
        phase: Phase::Idle,
        active_generation: None,
      }),
      config,
    }
  }

  /// Register work to replay on a sync event with `tag`.
  pub fn with_sync_task(mut self, tag: impl Into<String>, task: Arc<dyn SyncTask>) -> Self {
    self.deferred.register_sync(tag, task);
    self
  }

  pub fn generations(&self) -> &GenerationManager {
    &self.generations
  }

  pub fn storage(&self) -> &Arc<S> {
    self.executor.storage()
  }

  pub fn state(&self) -> ControllerState {
    match self.state.read() {
      Ok(state) => state.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  pub fn is_ready(&self) -> bool {
    self.state().phase == Phase::Active
  }

  fn set_phase(&self, phase: Phase, active_generation: Option<String>) {
    let mut state = match self.state.write() {
      Ok(state) => state,
      Err(poisoned) => poisoned.into_inner(),
    };
    state.phase = phase;
    if active_generation.is_some() {
      state.active_generation = active_generation;
    }
  }

  /// Dispatch one lifecycle event to its handler.
  pub async fn dispatch(&self, event: LifecycleEvent) -> EventOutcome {
    match event {
      LifecycleEvent::Install => EventOutcome::Installed(self.on_install().await),
      LifecycleEvent::Activate => EventOutcome::Activated(self.on_activate().await),
      LifecycleEvent::Fetch(request) => EventOutcome::Fetched(self.on_fetch(request).await),
      LifecycleEvent::Sync(tag) => EventOutcome::Synced(self.deferred.on_sync(&tag).await),
      LifecycleEvent::Push(payload) => {
        EventOutcome::Pushed(self.deferred.on_push(&payload, self.host.as_ref()).await)
      }
    }
  }

  /// Pre-populate the static partition of the active generation from the
  /// manifest. Entries are fetched concurrently and fail independently;
  /// installation itself never fails.
  pub async fn on_install(&self) -> InstallReport {
    // A redeploy in a running process keeps serving from the cache
    let was_active = self.is_ready();
    if !was_active {
      self.set_phase(Phase::Installing, None);
    }
    let partition = self.generations.partition(PartitionKind::Static);
    info!(partition = %partition, entries = self.config.manifest.len(), "installing");

    let results = futures::future::join_all(
      self
        .config
        .manifest
        .iter()
        .map(|entry| self.precache(entry, &partition)),
    )
    .await;

    let mut report = InstallReport::default();
    for (entry, result) in self.config.manifest.iter().zip(results) {
      match result {
        Ok(()) => report.stored.push(entry.clone()),
        Err(e) => {
          warn!(entry = %entry, error = %e, "failed to pre-cache manifest entry");
          report.failed.push(entry.clone());
        }
      }
    }

    if !report.failed.is_empty() {
      let err = CacheError::PartialInstallFailure {
        failed: report.failed.clone(),
        total: self.config.manifest.len(),
      };
      warn!(error = %err, "install finished with failures");
    }

    self.host.activate_immediately().await;
    if !was_active {
      self.set_phase(Phase::Installed, None);
    }
    info!(stored = report.stored.len(), failed = report.failed.len(), "installed");
    report
  }

  async fn precache(&self, entry: &str, partition: &str) -> Result<()> {
    let url = self.config.resolve(entry)?;
    self.executor.populate(&Request::get(url), partition).await
  }

  /// Delete every partition of a superseded generation, then take over open
  /// connections. Running it again without a new install changes nothing.
  pub async fn on_activate(&self) -> Result<ActivationReport> {
    self.set_phase(Phase::Activating, None);
    let storage = self.executor.storage();

    let names = storage
      .list_partitions()
      .map_err(|e| eyre!("Failed to list partitions during activation: {}", e))?;

    let mut deleted = Vec::new();
    for name in self.generations.stale_partitions(&names) {
      match storage.delete_partition(name) {
        Ok(_) => {
          info!(partition = name, "deleted superseded partition");
          deleted.push(name.to_string());
        }
        Err(e) => warn!(partition = name, error = %e, "failed to delete superseded partition"),
      }
    }

    self.host.take_over_existing_connections().await;

    let generation = self.generations.active().to_string();
    self.set_phase(Phase::Active, Some(generation.clone()));
    info!(generation = %generation, deleted = deleted.len(), "activated");

    Ok(ActivationReport {
      generation,
      deleted,
    })
  }

  /// The request path. GET requests always go through the active
  /// generation's partitions, whatever the phase. Only API requests (and
  /// uncached non-GET pass-throughs) can surface an error, and only
  /// `NetworkUnavailable` or `StaleBeyondTtl`.
  pub async fn on_fetch(&self, request: Request) -> Result<CacheResult<Response>, CacheError> {
    if !request.is_get() {
      return self.passthrough(&request).await;
    }

    let classification = self.classifier.classify(&request);
    let partition = self.generations.partition(classification.class.partition());
    debug!(url = %request.url, ?classification, partition = %partition, "routing request");

    match classification.strategy {
      Strategy::CacheFirst => Ok(self.executor.cache_first(&request, &partition).await),
      Strategy::NetworkFirstWithTtlFallback => {
        self
          .executor
          .network_first(&request, &partition, self.config.api_ttl())
          .await
      }
      Strategy::StaleWhileRevalidate => {
        let offline_document = match self.config.resolve(&self.config.offline_document) {
          Ok(url) => Request::get(url),
          Err(e) => {
            warn!(error = %e, "offline document unresolvable, passing through");
            return self.passthrough(&request).await;
          }
        };
        let offline_partition = self.generations.partition(PartitionKind::Static);
        Ok(
          self
            .executor
            .stale_while_revalidate(&request, &partition, &offline_document, &offline_partition)
            .await,
        )
      }
    }
  }

  async fn passthrough(&self, request: &Request) -> Result<CacheResult<Response>, CacheError> {
    self
      .executor
      .network()
      .fetch(request)
      .await
      .map(CacheResult::passthrough)
  }

  /// Wait for background cache writes. Call before the process exits.
  pub async fn settle(&self) {
    self.executor.settle().await;
  }
}
