use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event kinds emitted by the supervisor for task lifecycle changes.
pub mod kinds {
  pub const TASK_QUEUED: &str = "task.queued";
  pub const TASK_STARTED: &str = "task.started";
  pub const TASK_COMPLETED: &str = "task.completed";
  pub const TASK_FAILED: &str = "task.failed";
  pub const TASK_CANCELLED: &str = "task.cancelled";
}

/// An immutable fact observed by the daemon (file change, cron tick, IPC call, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub source: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub payload: Value,
  #[serde(default = "Utc::now")]
  pub timestamp: DateTime<Utc>,
}

impl Event {
  pub fn new(source: impl Into<String>, kind: impl Into<String>, payload: Value) -> Self {
    Self {
      source: source.into(),
      kind: kind.into(),
      payload,
      timestamp: Utc::now(),
    }
  }

  /// JSON view used for dot-path lookups (`payload.path`, `type`, ...).
  pub fn to_value(&self) -> Value {
    serde_json::to_value(self).unwrap_or(Value::Null)
  }
}

/// An event whose delivery to one handler failed after all retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
  pub event: Event,
  pub error: String,
  pub handler_name: String,
  pub timestamp: DateTime<Utc>,
}
