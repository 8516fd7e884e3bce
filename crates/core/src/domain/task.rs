use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
  Queued,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl TaskState {
  pub const ALL: [TaskState; 5] = [
    TaskState::Queued,
    TaskState::Running,
    TaskState::Completed,
    TaskState::Failed,
    TaskState::Cancelled,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      TaskState::Queued => "queued",
      TaskState::Running => "running",
      TaskState::Completed => "completed",
      TaskState::Failed => "failed",
      TaskState::Cancelled => "cancelled",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      TaskState::Completed | TaskState::Failed | TaskState::Cancelled
    )
  }
}

impl fmt::Display for TaskState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskState {
  type Err = TaskError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    TaskState::ALL
      .into_iter()
      .find(|state| state.as_str() == s)
      .ok_or_else(|| TaskError::UnknownState(s.to_string()))
  }
}

/// A unit of queued, running or finished agent work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: TaskId,
  pub prompt: String,
  #[serde(default)]
  pub agent: Option<String>,
  #[serde(default)]
  pub priority: i64,
  pub state: TaskState,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub pid: Option<u32>,
  #[serde(default)]
  pub result: Option<String>,
  #[serde(default)]
  pub error: Option<String>,
  #[serde(default)]
  pub output: String,
  #[serde(default)]
  pub metadata: Map<String, Value>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
  #[error("invalid transition: {from} -> {to}")]
  InvalidTransition { from: TaskState, to: TaskState },
  #[error("unknown task state `{0}`")]
  UnknownState(String),
}

impl Task {
  pub fn new(id: TaskId, prompt: String) -> Self {
    Self {
      id,
      prompt,
      agent: None,
      priority: 0,
      state: TaskState::Queued,
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
      pid: None,
      result: None,
      error: None,
      output: String::new(),
      metadata: Map::new(),
    }
  }

  /// Tasks reach a terminal state through `Running`, with two exceptions:
  /// `Queued -> Cancelled` for queue-side cancellation, and `Queued -> Failed`
  /// when the supervisor could not spawn a process at all (unknown agent or
  /// missing binary). A task failed that way never had a pid or `started_at`.
  pub fn can_transition(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;
    matches!(
      (from, to),
      (Queued, Running)
        | (Queued, Cancelled)
        | (Queued, Failed)
        | (Running, Completed)
        | (Running, Failed)
        | (Running, Cancelled)
    )
  }

  /// Move to `new_state`, keeping `pid` and the timestamps consistent with it.
  pub fn transition_to(&mut self, new_state: TaskState) -> Result<(), TaskError> {
    let from = self.state;
    if !Self::can_transition(from, new_state) {
      return Err(TaskError::InvalidTransition {
        from,
        to: new_state,
      });
    }
    self.state = new_state;
    match new_state {
      TaskState::Running => {
        self.started_at = Some(Utc::now());
      }
      TaskState::Completed | TaskState::Failed | TaskState::Cancelled => {
        self.pid = None;
        self.completed_at = Some(Utc::now());
      }
      TaskState::Queued => {}
    }
    Ok(())
  }

  /// Shortened prompt for status listings.
  pub fn prompt_preview(&self, max_chars: usize) -> String {
    preview(&self.prompt, max_chars)
  }
}

pub fn preview(text: &str, max_chars: usize) -> String {
  if text.chars().count() <= max_chars {
    return text.to_string();
  }
  let mut s: String = text.chars().take(max_chars).collect();
  s.push_str("...");
  s
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn transitions_enforced() {
    let mut task = Task::new(TaskId(1), "do things".into());
    task.transition_to(TaskState::Running).expect("queued->running");
    task.pid = Some(42);
    task
      .transition_to(TaskState::Completed)
      .expect("running->completed");
    assert_eq!(task.pid, None);
    assert!(task.completed_at.is_some());
    let err = task.transition_to(TaskState::Running).unwrap_err();
    assert_eq!(
      err,
      TaskError::InvalidTransition {
        from: TaskState::Completed,
        to: TaskState::Running,
      }
    );
  }

  #[test]
  fn queued_never_jumps_to_completed() {
    assert!(!Task::can_transition(TaskState::Queued, TaskState::Completed));
    assert!(Task::can_transition(TaskState::Queued, TaskState::Cancelled));
    for terminal in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
      for to in TaskState::ALL {
        assert!(!Task::can_transition(terminal, to), "{terminal} -> {to}");
      }
    }
  }

  #[test]
  fn spawn_failure_fails_a_queued_task_without_start_marks() {
    let mut task = Task::new(TaskId(5), "no such agent".into());
    task.transition_to(TaskState::Failed).expect("queued->failed");
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.pid, None);
    assert_eq!(task.started_at, None);
    assert!(task.completed_at.is_some());
  }

  #[test]
  fn state_parse_rejects_unknown() {
    assert_eq!("running".parse::<TaskState>(), Ok(TaskState::Running));
    assert_eq!(
      "paused".parse::<TaskState>(),
      Err(TaskError::UnknownState("paused".into()))
    );
  }

  #[test]
  fn serializes_camel_case() {
    let task = Task::new(TaskId(7), "p".into());
    let v = serde_json::to_value(&task).unwrap();
    assert_eq!(v["id"], 7);
    assert_eq!(v["state"], "queued");
    assert!(v.get("createdAt").is_some());
  }

  proptest! {
    #[test]
    fn preview_never_exceeds_limit(text in ".{0,300}", max in 1usize..120) {
      let p = preview(&text, max);
      prop_assert!(p.chars().count() <= max + 3);
      if text.chars().count() <= max {
        prop_assert_eq!(p, text);
      }
    }
  }
}
