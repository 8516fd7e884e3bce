//! Wire types shared by the daemon's IPC handlers and the CLI.

pub mod client;
pub mod protocol;
pub mod server;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::automation::AutomationStatus;
use crate::domain::event::Event;
use crate::domain::task::{TaskId, TaskState};
use crate::events::RouterStats;
use crate::store::TaskStats;
use crate::supervisor::SupervisorStatus;

pub use client::{ClientError, IpcClient, Notification};
pub use protocol::{HandlerError, HandlerResult};
pub use server::IpcServer;

/// Method names served by the daemon.
pub mod methods {
  pub const DAEMON_STATUS: &str = "daemon.status";
  pub const DAEMON_SHUTDOWN: &str = "daemon.shutdown";
  pub const TASK_SUBMIT: &str = "task.submit";
  pub const TASK_CANCEL: &str = "task.cancel";
  pub const TASK_LIST: &str = "task.list";
  pub const TASK_GET: &str = "task.get";
  pub const TASK_STATS: &str = "task.stats";
  pub const TASK_SUMMARY: &str = "task.summary";
  pub const TASK_CLEANUP: &str = "task.cleanup";
  pub const AUTOMATION_STATUS: &str = "automation.status";
  pub const AUTOMATION_ENABLE: &str = "automation.enable";
  pub const AUTOMATION_DISABLE: &str = "automation.disable";
  pub const AUTOMATION_LOG: &str = "automation.log";
  pub const AUTOMATION_RELOAD: &str = "automation.reload";
  pub const AUTOMATION_APPROVE: &str = "automation.approve";
  pub const EVENTS_PUBLISH: &str = "events.publish";
  pub const EVENTS_HISTORY: &str = "events.history";
  pub const EVENTS_DEAD_LETTERS: &str = "events.dead_letters";
  pub const CHAT_SEND: &str = "chat.send";
  pub const PING: &str = "ping";
}

/// Notifications the daemon broadcasts to connected clients.
pub mod notifications {
  pub const APPROVAL_REQUESTED: &str = "automation.approval_requested";
  pub const AUTOMATION_SIGNAL: &str = "automation.signal";
  pub const EVENT_FAILED: &str = "events.failed";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitParams {
  pub prompt: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub agent: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
  pub task_id: TaskId,
  pub state: TaskState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
  pub task_id: TaskId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResult {
  pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupParams {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_age_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
  pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleToggleParams {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rule_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResult {
  pub enabled: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rule_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitParams {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveParams {
  pub request_id: String,
  pub approved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveResult {
  /// False when the request id is unknown or already decided.
  pub resolved: bool,
}

/// Payload of `automation.approval_requested`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
  pub request_id: String,
  pub rule_id: String,
  pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishParams {
  pub source: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
  pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatParams {
  pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResult {
  pub pong: bool,
  pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownResult {
  pub stopping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
  Ok,
  Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
  pub version: String,
  pub pid: u32,
  pub uptime_secs: u64,
  pub started_at: DateTime<Utc>,
  pub socket: String,
  pub health: Health,
  pub supervisor: SupervisorStatus,
  pub tasks: TaskStats,
  pub automation: AutomationStatus,
  pub router: RouterStats,
}
