//! In-process event fan-out with per-subscriber retry and a dead-letter queue.
//!
//! Producers call [`EventRouter::publish`], which feeds a bounded channel
//! drained by a single dispatcher task, so subscribers see events in publish
//! order. A failing subscriber is retried on its own detached task with
//! exponential backoff; it never delays delivery to anyone else.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::domain::event::{DeadLetterEntry, Event};

/// A subscriber. Handlers run on the dispatcher task and must not block.
pub trait EventHandler: Send + Sync {
  fn name(&self) -> &str;
  fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

struct FnHandler<F> {
  name: String,
  f: F,
}

impl<F> EventHandler for FnHandler<F>
where
  F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
  fn name(&self) -> &str {
    &self.name
  }

  fn handle(&self, event: &Event) -> anyhow::Result<()> {
    (self.f)(event)
  }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
  pub history_cap: usize,
  pub dead_letter_cap: usize,
  /// Total delivery attempts per subscriber, including the first.
  pub max_attempts: u32,
  /// Retry `n` waits `2^n * backoff_base`.
  pub backoff_base: Duration,
  pub queue_capacity: usize,
}

impl Default for RouterConfig {
  fn default() -> Self {
    Self {
      history_cap: 1000,
      dead_letter_cap: 100,
      max_attempts: 3,
      backoff_base: Duration::from_secs(1),
      queue_capacity: 1024,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
  pub subscribers: usize,
  pub history: usize,
  pub dead_letters: usize,
}

#[derive(Default)]
struct RouterState {
  subscribers: Vec<Arc<dyn EventHandler>>,
  history: VecDeque<Event>,
  dead_letters: VecDeque<DeadLetterEntry>,
}

struct Inner {
  config: RouterConfig,
  state: Mutex<RouterState>,
  failed_tx: broadcast::Sender<DeadLetterEntry>,
}

#[derive(Clone)]
pub struct EventRouter {
  inner: Arc<Inner>,
  tx: mpsc::Sender<Event>,
}

impl EventRouter {
  /// Create the router and spawn its dispatcher. Must be called inside a Tokio runtime.
  /// The dispatcher exits once every clone of the router is dropped.
  pub fn start(config: RouterConfig) -> Self {
    let (tx, mut rx) = mpsc::channel::<Event>(config.queue_capacity.max(1));
    let (failed_tx, _) = broadcast::channel(64);
    let inner = Arc::new(Inner {
      config,
      state: Mutex::new(RouterState::default()),
      failed_tx,
    });
    let dispatcher = inner.clone();
    tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        dispatcher.route(event);
      }
      debug!(event = "router_dispatcher_stopped", "event dispatcher stopped");
    });
    Self { inner, tx }
  }

  pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
    debug!(event = "router_subscribe", handler = handler.name());
    self.inner.state.lock().subscribers.push(handler);
  }

  pub fn subscribe_fn<F>(&self, name: impl Into<String>, f: F)
  where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    self.subscribe(Arc::new(FnHandler {
      name: name.into(),
      f,
    }));
  }

  /// Enqueue for dispatch, waiting for queue space.
  pub async fn publish(&self, event: Event) {
    if self.tx.send(event).await.is_err() {
      warn!(event = "router_closed", "event dispatcher is gone; dropping event");
    }
  }

  /// Enqueue without waiting. Returns false when the queue is full or closed.
  pub fn try_publish(&self, event: Event) -> bool {
    match self.tx.try_send(event) {
      Ok(()) => true,
      Err(err) => {
        let kind = err.into_inner().kind;
        warn!(event = "router_queue_full", kind = %kind, "event queue full; dropping event");
        false
      }
    }
  }

  /// Record and deliver one event immediately on the calling task.
  pub fn route(&self, event: Event) {
    self.inner.route(event);
  }

  /// Retry a failed delivery. `attempt` is the number of attempts already made.
  pub fn handle_failed_event(
    &self,
    event: Event,
    handler: Arc<dyn EventHandler>,
    error: String,
    attempt: u32,
  ) {
    self.inner.handle_failed_event(event, handler, error, attempt);
  }

  /// Most recent `limit` events, oldest first.
  pub fn history(&self, limit: Option<usize>) -> Vec<Event> {
    let state = self.inner.state.lock();
    let skip = limit.map_or(0, |l| state.history.len().saturating_sub(l));
    state.history.iter().skip(skip).cloned().collect()
  }

  pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
    self.inner.state.lock().dead_letters.iter().cloned().collect()
  }

  pub fn clear_history(&self) {
    self.inner.state.lock().history.clear();
  }

  pub fn clear_dead_letters(&self) {
    self.inner.state.lock().dead_letters.clear();
  }

  /// Receives one entry per event that exhausted its retries.
  pub fn subscribe_failures(&self) -> broadcast::Receiver<DeadLetterEntry> {
    self.inner.failed_tx.subscribe()
  }

  pub fn stats(&self) -> RouterStats {
    let state = self.inner.state.lock();
    RouterStats {
      subscribers: state.subscribers.len(),
      history: state.history.len(),
      dead_letters: state.dead_letters.len(),
    }
  }
}

impl Inner {
  fn route(self: &Arc<Self>, mut event: Event) {
    event.timestamp = Utc::now();
    let subscribers = {
      let mut state = self.state.lock();
      if state.history.len() >= self.config.history_cap {
        state.history.pop_front();
      }
      state.history.push_back(event.clone());
      state.subscribers.clone()
    };
    debug!(event = "router_route", kind = %event.kind, source = %event.source, subscribers = subscribers.len());

    for handler in subscribers {
      if let Err(err) = handler.handle(&event) {
        self.handle_failed_event(event.clone(), handler, format!("{err:#}"), 1);
      }
    }
  }

  fn handle_failed_event(
    self: &Arc<Self>,
    event: Event,
    handler: Arc<dyn EventHandler>,
    error: String,
    attempt: u32,
  ) {
    if attempt >= self.config.max_attempts {
      self.dead_letter(event, handler.name(), error);
      return;
    }
    warn!(
      event = "router_handler_failed",
      handler = handler.name(),
      kind = %event.kind,
      attempt,
      error = %error,
      "event handler failed; retrying"
    );
    let delay = self.config.backoff_base * 2u32.saturating_pow(attempt);
    let inner = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      if let Err(err) = handler.handle(&event) {
        inner.handle_failed_event(event, handler, format!("{err:#}"), attempt + 1);
      }
    });
  }

  fn dead_letter(&self, event: Event, handler_name: &str, error: String) {
    warn!(
      event = "router_dead_letter",
      handler = handler_name,
      kind = %event.kind,
      error = %error,
      "event moved to dead-letter queue"
    );
    let entry = DeadLetterEntry {
      event,
      error,
      handler_name: handler_name.to_string(),
      timestamp: Utc::now(),
    };
    {
      let mut state = self.state.lock();
      if state.dead_letters.len() >= self.config.dead_letter_cap {
        state.dead_letters.pop_front();
      }
      state.dead_letters.push_back(entry.clone());
    }
    let _ = self.failed_tx.send(entry);
  }
}
