//! Best-effort handling of connectivity-restored and push events.

use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PushConfig;
use crate::error::CacheError;
use crate::lifecycle::Host;

/// Work to replay when connectivity returns, e.g. queued offline writes.
#[async_trait]
pub trait SyncTask: Send + Sync {
  async fn run(&self) -> Result<()>;
}

/// A local notification shown by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
  title: String,
  body: String,
  #[serde(default)]
  icon: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
  pub completed: usize,
  pub failed: usize,
}

pub struct DeferredTaskQueue {
  push: PushConfig,
  sync_tasks: HashMap<String, Vec<Arc<dyn SyncTask>>>,
}

impl DeferredTaskQueue {
  pub fn new(push: PushConfig) -> Self {
    Self {
      push,
      sync_tasks: HashMap::new(),
    }
  }

  /// Run `task` whenever a sync event with `tag` arrives.
  pub fn register_sync(&mut self, tag: impl Into<String>, task: Arc<dyn SyncTask>) {
    self.sync_tasks.entry(tag.into()).or_default().push(task);
  }

  /// Run every task registered for `tag`. Failures are logged and counted.
  pub async fn on_sync(&self, tag: &str) -> SyncReport {
    let Some(tasks) = self.sync_tasks.get(tag) else {
      debug!(tag, "no sync tasks registered");
      return SyncReport::default();
    };

    let mut report = SyncReport::default();
    for result in futures::future::join_all(tasks.iter().map(|t| t.run())).await {
      match result {
        Ok(()) => report.completed += 1,
        Err(e) => {
          warn!(tag, error = %e, "sync task failed");
          report.failed += 1;
        }
      }
    }

    info!(tag, completed = report.completed, failed = report.failed, "sync finished");
    report
  }

  /// Translate a push payload into one notification and hand it to the host.
  /// Malformed payloads are dropped.
  pub async fn on_push(&self, payload: &[u8], host: &dyn Host) -> Option<Notification> {
    match self.notification_for(payload) {
      Ok(notification) => {
        info!(title = %notification.title, "showing push notification");
        host.show_notification(notification.clone()).await;
        Some(notification)
      }
      Err(e) => {
        warn!(error = %e, "dropping push message");
        None
      }
    }
  }

  fn notification_for(&self, payload: &[u8]) -> Result<Notification, CacheError> {
    let payload: PushPayload = serde_json::from_slice(payload)
      .map_err(|e| CacheError::MalformedPushPayload(e.to_string()))?;

    Ok(Notification {
      title: payload.title,
      body: payload.body,
      icon: payload
        .icon
        .unwrap_or_else(|| self.push.default_icon.clone()),
      badge: self.push.default_badge.clone(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::RecordingHost;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct CountingTask {
    runs: AtomicUsize,
    fail: bool,
  }

  #[async_trait]
  impl SyncTask for CountingTask {
    async fn run(&self) -> Result<()> {
      self.runs.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        Err(eyre!("booking replay rejected"))
      } else {
        Ok(())
      }
    }
  }

  fn task(fail: bool) -> Arc<CountingTask> {
    Arc::new(CountingTask {
      runs: AtomicUsize::new(0),
      fail,
    })
  }

  #[tokio::test]
  async fn test_push_produces_one_notification_with_default_icon() {
    let queue = DeferredTaskQueue::new(PushConfig::default());
    let host = RecordingHost::new();

    let shown = queue
      .on_push(br#"{"title":"Welcome","body":"New events nearby"}"#, host.as_ref())
      .await;

    let expected = Notification {
      title: "Welcome".to_string(),
      body: "New events nearby".to_string(),
      icon: "/icons/icon-192.png".to_string(),
      badge: "/icons/badge-72.png".to_string(),
    };
    assert_eq!(shown, Some(expected.clone()));
    assert_eq!(host.notifications(), vec![expected]);
  }

  #[tokio::test]
  async fn test_push_icon_and_extra_fields() {
    let queue = DeferredTaskQueue::new(PushConfig::default());
    let host = RecordingHost::new();

    let shown = queue
      .on_push(
        br#"{"title":"Sold out","body":"Jazz night","icon":"/img/jazz.png","url":"/events/9"}"#,
        host.as_ref(),
      )
      .await
      .unwrap();
    assert_eq!(shown.icon, "/img/jazz.png");
  }

  #[tokio::test]
  async fn test_malformed_push_is_dropped() {
    let queue = DeferredTaskQueue::new(PushConfig::default());
    let host = RecordingHost::new();

    let payloads: [&[u8]; 4] = [b"not json", br#"{"title":"no body"}"#, b"[1,2]", b""];
    for payload in payloads {
      assert!(queue.on_push(payload, host.as_ref()).await.is_none());
    }
    assert!(host.notifications().is_empty());
  }

  #[tokio::test]
  async fn test_sync_runs_tasks_for_tag() {
    let mut queue = DeferredTaskQueue::new(PushConfig::default());
    let ok = task(false);
    let bad = task(true);
    let other = task(false);
    queue.register_sync("sync-bookings", ok.clone());
    queue.register_sync("sync-bookings", bad.clone());
    queue.register_sync("sync-favourites", other.clone());

    let report = queue.on_sync("sync-bookings").await;
    assert_eq!(
      report,
      SyncReport {
        completed: 1,
        failed: 1
      }
    );
    assert_eq!(ok.runs.load(Ordering::SeqCst), 1);
    assert_eq!(bad.runs.load(Ordering::SeqCst), 1);
    assert_eq!(other.runs.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_sync_unknown_tag_is_noop() {
    let queue = DeferredTaskQueue::new(PushConfig::default());
    assert_eq!(queue.on_sync("sync-anything").await, SyncReport::default());
  }
}
