//! Test doubles for the network, the host and the clock.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::cache::{Clock, SqliteStorage};
use crate::config::Config;
use crate::deferred::Notification;
use crate::error::CacheError;
use crate::http::{Headers, Network, Request, Response};
use crate::lifecycle::Host;

pub const ORIGIN: &str = "https://events.example.com";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn get(path: &str) -> Request {
  Request::get(url(path))
}

pub fn config() -> Config {
  Config::from_yaml(&format!(
    r#"
origin: "{}"
cache:
  prefix: "evently"
  generation: "v2"
manifest: ["/", "/manifest.json"]
"#,
    ORIGIN
  ))
  .unwrap()
}

pub fn storage() -> Arc<SqliteStorage> {
  Arc::new(SqliteStorage::open_in_memory().unwrap())
}

#[derive(Clone)]
enum Route {
  Respond(u16, Vec<u8>),
  Fail,
}

/// Network that answers from a routing table and counts calls per URL.
/// Unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct StubNetwork {
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<String>>,
  offline: AtomicBool,
  delay: Mutex<Option<Duration>>,
}

impl StubNetwork {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn respond(&self, path: &str, status: u16, body: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Route::Respond(status, body.as_bytes().to_vec()));
  }

  pub fn fail(&self, path: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Route::Fail);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn calls(&self, path: &str) -> usize {
    let target = url(path).to_string();
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|u| **u == target)
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Network for StubNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
    let target = request.url.to_string();
    self.calls.lock().unwrap().push(target.clone());

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if self.offline.load(Ordering::SeqCst) {
      return Err(CacheError::NetworkUnavailable("offline".into()));
    }

    let route = self.routes.lock().unwrap().get(&target).cloned();
    match route {
      Some(Route::Respond(status, body)) => {
        let headers: Headers = [("content-type", "text/plain")].into_iter().collect();
        Ok(Response::new(status, headers, body))
      }
      Some(Route::Fail) | None => Err(CacheError::NetworkUnavailable(format!(
        "unreachable: {}",
        target
      ))),
    }
  }
}

/// Clock that only moves when told to.
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      now: Mutex::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
    })
  }

  pub fn advance(&self, secs: i64) {
    let mut now = self.now.lock().unwrap();
    *now += chrono::Duration::seconds(secs);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap()
  }
}

/// Host that records every call made to it.
#[derive(Default)]
pub struct RecordingHost {
  pub activations: Mutex<usize>,
  pub takeovers: Mutex<usize>,
  pub notifications: Mutex<Vec<Notification>>,
}

impl RecordingHost {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn activations(&self) -> usize {
    *self.activations.lock().unwrap()
  }

  pub fn takeovers(&self) -> usize {
    *self.takeovers.lock().unwrap()
  }

  pub fn notifications(&self) -> Vec<Notification> {
    self.notifications.lock().unwrap().clone()
  }
}

#[async_trait]
impl Host for RecordingHost {
  async fn activate_immediately(&self) {
    *self.activations.lock().unwrap() += 1;
  }

  async fn take_over_existing_connections(&self) {
    *self.takeovers.lock().unwrap() += 1;
  }

  async fn show_notification(&self, notification: Notification) {
    self.notifications.lock().unwrap().push(notification);
  }
}
