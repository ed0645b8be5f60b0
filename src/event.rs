use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::lifecycle::{EventOutcome, LifecycleController, LifecycleEvent};

struct Envelope {
  event: LifecycleEvent,
  reply: oneshot::Sender<EventOutcome>,
}

/// Handle for submitting lifecycle events to a running [`EventQueue`].
#[derive(Clone)]
pub struct EventSender {
  tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSender {
  /// Submit an event and wait for its outcome. Returns `None` if the queue
  /// has shut down.
  pub async fn send(&self, event: LifecycleEvent) -> Option<EventOutcome> {
    let (reply, rx) = oneshot::channel();
    self.tx.send(Envelope { event, reply }).ok()?;
    rx.await.ok()
  }
}

/// Event loop that runs each lifecycle event as its own task, so fetches
/// interleave at their suspension points.
pub struct EventQueue {
  rx: mpsc::UnboundedReceiver<Envelope>,
}

impl EventQueue {
  pub fn new() -> (Self, EventSender) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { rx }, EventSender { tx })
  }

  /// Dispatch events until every sender is dropped, then wait for in-flight
  /// handlers and background revalidations.
  pub async fn run<S: CacheStore>(mut self, controller: Arc<LifecycleController<S>>) {
    let mut handlers = tokio::task::JoinSet::new();

    while let Some(Envelope { event, reply }) = self.rx.recv().await {
      let controller = Arc::clone(&controller);
      handlers.spawn(async move {
        let outcome = controller.dispatch(event).await;
        if reply.send(outcome).is_err() {
          debug!("event submitter went away before the outcome");
        }
      });
    }

    while let Some(result) = handlers.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "event handler panicked");
      }
    }
    controller.settle().await;
  }
}
