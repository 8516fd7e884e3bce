//! Durable registry of task records.
//!
//! The in-memory map is authoritative for the running daemon. Every mutation
//! except [`TaskStore::append_output`] rewrites the backing JSON file through
//! [`atomic_write`], so a crash never leaves a half-written file behind.
//! Persistence failures are logged and otherwise ignored.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapters::fs::atomic_write;
use crate::domain::task::{Task, TaskError, TaskId, TaskState};

const FILE_VERSION: u32 = 1;
const RECENT_IN_SUMMARY: usize = 5;
const ORPHANED_ERROR: &str = "daemon restarted while task was running";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
  #[error("task {0} not found")]
  NotFound(TaskId),
  #[error(transparent)]
  Task(#[from] TaskError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// On-disk layout of the task file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskFile {
  version: u32,
  updated_at: DateTime<Utc>,
  tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTask {
  pub prompt: String,
  pub agent: Option<String>,
  pub priority: i64,
  pub metadata: Map<String, Value>,
}

/// Partial update applied by [`TaskStore::update_task`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
  pub state: Option<TaskState>,
  /// Only applied together with a transition to `running`.
  pub pid: Option<u32>,
  pub result: Option<String>,
  pub error: Option<String>,
  /// Merged key by key into the existing metadata.
  pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
  #[serde(default)]
  pub state: Option<TaskState>,
  #[serde(default)]
  pub agent: Option<String>,
  #[serde(default)]
  pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
  pub total: usize,
  pub queued: usize,
  pub running: usize,
  pub completed: usize,
  pub failed: usize,
  pub cancelled: usize,
}

/// What a reattaching session needs: everything running plus the latest tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
  pub running: Vec<Task>,
  pub recent: Vec<Task>,
  pub stats: TaskStats,
}

#[derive(Debug, Default)]
struct StoreState {
  tasks: BTreeMap<TaskId, Task>,
  next_id: u64,
  generation: u64,
}

pub struct TaskStore {
  path: Option<PathBuf>,
  state: Mutex<StoreState>,
  /// Generation of the last snapshot written to disk.
  written: Mutex<u64>,
}

impl TaskStore {
  /// A store persisted to `path`. Call [`TaskStore::initialize`] to load existing records.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self::with_path(Some(path.into()))
  }

  /// A store that never touches the filesystem.
  pub fn in_memory() -> Self {
    Self::with_path(None)
  }

  fn with_path(path: Option<PathBuf>) -> Self {
    Self {
      path,
      state: Mutex::new(StoreState {
        next_id: 1,
        ..StoreState::default()
      }),
      written: Mutex::new(0),
    }
  }

  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  /// Load persisted records and recover the id counter. Tasks left `running`
  /// by a previous process are marked failed. Returns the number of tasks loaded.
  pub fn initialize(&self) -> usize {
    let Some(path) = self.path.as_deref() else {
      return 0;
    };
    let file = match read_task_file(path) {
      Ok(Some(file)) => file,
      Ok(None) => {
        debug!(event = "store_no_file", path = %path.display(), "no task file yet");
        return 0;
      }
      Err(error) => {
        warn!(event = "store_load_failed", path = %path.display(), error = %error, "failed to load task file; starting empty");
        return 0;
      }
    };

    let mut orphaned = 0usize;
    let count = {
      let mut state = self.state.lock();
      state.tasks.clear();
      for mut task in file.tasks {
        if task.state == TaskState::Running {
          // No process survives a daemon restart
          task.state = TaskState::Failed;
          task.pid = None;
          task.error = Some(ORPHANED_ERROR.to_string());
          task.completed_at = Some(Utc::now());
          orphaned += 1;
        } else {
          task.pid = None;
        }
        state.tasks.insert(task.id, task);
      }
      state.next_id = state.tasks.keys().next_back().map_or(1, |id| id.0 + 1);
      state.tasks.len()
    };

    info!(event = "store_loaded", path = %path.display(), tasks = count, orphaned, "task store loaded");
    if orphaned > 0 {
      self.persist();
    }
    count
  }

  pub fn create_task(&self, new: NewTask) -> Task {
    let task = {
      let mut state = self.state.lock();
      let id = TaskId(state.next_id);
      state.next_id += 1;
      let mut task = Task::new(id, new.prompt);
      task.agent = new.agent;
      task.priority = new.priority;
      task.metadata = new.metadata;
      state.tasks.insert(id, task.clone());
      task
    };
    debug!(event = "store_task_created", id = task.id.0, priority = task.priority);
    self.persist();
    task
  }

  /// Apply a partial update. State changes are validated against the transition graph.
  pub fn update_task(&self, id: TaskId, update: TaskUpdate) -> Result<Task> {
    let task = {
      let mut state = self.state.lock();
      let task = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
      if let Some(new_state) = update.state {
        task.transition_to(new_state)?;
        if new_state == TaskState::Running {
          task.pid = update.pid;
        }
      }
      if let Some(result) = update.result {
        task.result = Some(result);
      }
      if let Some(error) = update.error {
        task.error = Some(error);
      }
      if let Some(metadata) = update.metadata {
        task.metadata.extend(metadata);
      }
      task.clone()
    };
    self.persist();
    Ok(task)
  }

  pub fn start_task(&self, id: TaskId, pid: u32) -> Result<Task> {
    self.update_task(
      id,
      TaskUpdate {
        state: Some(TaskState::Running),
        pid: Some(pid),
        ..TaskUpdate::default()
      },
    )
  }

  pub fn complete_task(&self, id: TaskId, result: String) -> Result<Task> {
    self.update_task(
      id,
      TaskUpdate {
        state: Some(TaskState::Completed),
        result: Some(result),
        ..TaskUpdate::default()
      },
    )
  }

  pub fn fail_task(&self, id: TaskId, error: String) -> Result<Task> {
    self.update_task(
      id,
      TaskUpdate {
        state: Some(TaskState::Failed),
        error: Some(error),
        ..TaskUpdate::default()
      },
    )
  }

  pub fn cancel_task(&self, id: TaskId) -> Result<Task> {
    self.update_task(
      id,
      TaskUpdate {
        state: Some(TaskState::Cancelled),
        ..TaskUpdate::default()
      },
    )
  }

  /// Accumulate process output. Kept in memory until the next persisted mutation.
  pub fn append_output(&self, id: TaskId, chunk: &str) -> Result<()> {
    let mut state = self.state.lock();
    let task = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
    task.output.push_str(chunk);
    Ok(())
  }

  pub fn get_task(&self, id: TaskId) -> Option<Task> {
    self.state.lock().tasks.get(&id).cloned()
  }

  /// Tasks matching `filter`, newest first.
  pub fn get_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
    let state = self.state.lock();
    let iter = state
      .tasks
      .values()
      .rev()
      .filter(|t| filter.state.is_none_or(|s| t.state == s))
      .filter(|t| {
        filter
          .agent
          .as_deref()
          .is_none_or(|a| t.agent.as_deref() == Some(a))
      })
      .cloned();
    match filter.limit {
      Some(limit) => iter.take(limit).collect(),
      None => iter.collect(),
    }
  }

  pub fn stats(&self) -> TaskStats {
    let state = self.state.lock();
    let mut stats = TaskStats {
      total: state.tasks.len(),
      ..TaskStats::default()
    };
    for task in state.tasks.values() {
      match task.state {
        TaskState::Queued => stats.queued += 1,
        TaskState::Running => stats.running += 1,
        TaskState::Completed => stats.completed += 1,
        TaskState::Failed => stats.failed += 1,
        TaskState::Cancelled => stats.cancelled += 1,
      }
    }
    stats
  }

  pub fn summary(&self) -> TaskSummary {
    let running = self.get_tasks(&TaskFilter {
      state: Some(TaskState::Running),
      ..TaskFilter::default()
    });
    let recent = self.get_tasks(&TaskFilter {
      limit: Some(RECENT_IN_SUMMARY),
      ..TaskFilter::default()
    });
    TaskSummary {
      running,
      recent,
      stats: self.stats(),
    }
  }

  /// Remove terminal tasks that finished more than `max_age` ago. Returns the number removed.
  pub fn cleanup(&self, max_age: Duration) -> usize {
    let cutoff = chrono::Duration::from_std(max_age)
      .ok()
      .and_then(|age| Utc::now().checked_sub_signed(age));
    let Some(cutoff) = cutoff else {
      return 0;
    };
    let removed = {
      let mut state = self.state.lock();
      let before = state.tasks.len();
      state.tasks.retain(|_, t| {
        !(t.state.is_terminal() && t.completed_at.unwrap_or(t.created_at) < cutoff)
      });
      before - state.tasks.len()
    };
    if removed > 0 {
      info!(event = "store_cleanup", removed, "purged old terminal tasks");
      self.persist();
    }
    removed
  }

  /// Force a write of the current state, including buffered output.
  pub fn save(&self) {
    self.persist();
  }

  fn persist(&self) {
    let Some(path) = self.path.as_deref() else {
      return;
    };
    let (generation, file) = {
      let mut state = self.state.lock();
      state.generation += 1;
      (
        state.generation,
        TaskFile {
          version: FILE_VERSION,
          updated_at: Utc::now(),
          tasks: state.tasks.values().cloned().collect(),
        },
      )
    };

    // Serialize writers; a snapshot older than the one on disk is dropped.
    let mut written = self.written.lock();
    if *written >= generation {
      return;
    }
    let outcome = serde_json::to_vec_pretty(&file)
      .map_err(io::Error::other)
      .and_then(|bytes| atomic_write(path, &bytes));
    match outcome {
      Ok(()) => *written = generation,
      Err(error) => {
        warn!(event = "store_persist_failed", path = %path.display(), error = %error, "failed to persist task file");
      }
    }
  }
}

fn read_task_file(path: &Path) -> io::Result<Option<TaskFile>> {
  let bytes = match fs::read(path) {
    Ok(bytes) => bytes,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(e),
  };
  let file: TaskFile = serde_json::from_slice(&bytes).map_err(io::Error::other)?;
  Ok(Some(file))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn new_task(prompt: &str) -> NewTask {
    NewTask {
      prompt: prompt.into(),
      ..NewTask::default()
    }
  }

  #[test]
  fn ids_are_monotonic() {
    let store = TaskStore::in_memory();
    let a = store.create_task(new_task("a"));
    let b = store.create_task(new_task("b"));
    assert_eq!(a.id, TaskId(1));
    assert_eq!(b.id, TaskId(2));
    assert_eq!(a.state, TaskState::Queued);
  }

  #[test]
  fn update_unknown_task_errors() {
    let store = TaskStore::in_memory();
    assert_eq!(
      store.cancel_task(TaskId(9)).unwrap_err(),
      StoreError::NotFound(TaskId(9))
    );
  }

  #[test]
  fn update_validates_transitions() {
    let store = TaskStore::in_memory();
    let t = store.create_task(new_task("a"));
    let err = store.complete_task(t.id, "done".into()).unwrap_err();
    assert!(matches!(err, StoreError::Task(TaskError::InvalidTransition { .. })));
  }

  #[test]
  fn pid_tracks_running_state() {
    let store = TaskStore::in_memory();
    let t = store.create_task(new_task("a"));
    let running = store.start_task(t.id, 4242).unwrap();
    assert_eq!(running.pid, Some(4242));
    assert!(running.started_at.is_some());
    let done = store.complete_task(t.id, "ok".into()).unwrap();
    assert_eq!(done.pid, None);
    assert_eq!(done.result.as_deref(), Some("ok"));
  }

  #[test]
  fn metadata_is_merged() {
    let store = TaskStore::in_memory();
    let mut metadata = Map::new();
    metadata.insert("ruleId".into(), json!("r1"));
    let t = store.create_task(NewTask {
      prompt: "p".into(),
      metadata,
      ..NewTask::default()
    });
    let mut extra = Map::new();
    extra.insert("note".into(), json!(1));
    let t = store
      .update_task(
        t.id,
        TaskUpdate {
          metadata: Some(extra),
          ..TaskUpdate::default()
        },
      )
      .unwrap();
    assert_eq!(t.metadata["ruleId"], json!("r1"));
    assert_eq!(t.metadata["note"], json!(1));
  }

  #[test]
  fn get_tasks_filters_newest_first() {
    let store = TaskStore::in_memory();
    for i in 0..4 {
      store.create_task(NewTask {
        prompt: format!("p{i}"),
        agent: Some(if i % 2 == 0 { "claude" } else { "shell" }.into()),
        ..NewTask::default()
      });
    }
    store.cancel_task(TaskId(2)).unwrap();

    let all = store.get_tasks(&TaskFilter::default());
    let ids: Vec<u64> = all.iter().map(|t| t.id.0).collect();
    assert_eq!(ids, vec![4, 3, 2, 1]);

    let claude = store.get_tasks(&TaskFilter {
      agent: Some("claude".into()),
      ..TaskFilter::default()
    });
    assert_eq!(claude.iter().map(|t| t.id.0).collect::<Vec<_>>(), vec![3, 1]);

    let cancelled = store.get_tasks(&TaskFilter {
      state: Some(TaskState::Cancelled),
      ..TaskFilter::default()
    });
    assert_eq!(cancelled.len(), 1);

    let limited = store.get_tasks(&TaskFilter {
      limit: Some(2),
      ..TaskFilter::default()
    });
    assert_eq!(limited.len(), 2);
  }

  #[test]
  fn stats_and_summary() {
    let store = TaskStore::in_memory();
    for _ in 0..7 {
      store.create_task(new_task("p"));
    }
    store.start_task(TaskId(1), 10).unwrap();
    store.fail_task(TaskId(2), "boom".into()).unwrap();
    let stats = store.stats();
    assert_eq!(stats.total, 7);
    assert_eq!(stats.running, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.queued, 5);

    let summary = store.summary();
    assert_eq!(summary.running.len(), 1);
    assert_eq!(summary.recent.len(), 5);
    assert_eq!(summary.recent[0].id, TaskId(7));
  }

  #[test]
  fn cleanup_only_removes_old_terminal_tasks() {
    let store = TaskStore::in_memory();
    let a = store.create_task(new_task("a"));
    let b = store.create_task(new_task("b"));
    store.cancel_task(a.id).unwrap();
    assert_eq!(store.cleanup(Duration::from_secs(3600)), 0);
    assert_eq!(store.cleanup(Duration::ZERO), 1);
    assert!(store.get_task(a.id).is_none());
    assert!(store.get_task(b.id).is_some());
  }

  #[test]
  fn save_and_initialize_round_trip() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("tasks.json");
    let store = TaskStore::new(&path);
    store.initialize();
    let a = store.create_task(NewTask {
      prompt: "a".into(),
      agent: Some("shell".into()),
      priority: 3,
      metadata: Map::new(),
    });
    let b = store.create_task(new_task("b"));
    store.start_task(b.id, 99).unwrap();
    store.append_output(b.id, "partial ").unwrap();
    store.complete_task(b.id, "result".into()).unwrap();
    let c = store.create_task(new_task("c"));
    store.cancel_task(c.id).unwrap();
    store.save();

    let reloaded = TaskStore::new(&path);
    assert_eq!(reloaded.initialize(), 3);
    let before = store.get_tasks(&TaskFilter::default());
    let after = reloaded.get_tasks(&TaskFilter::default());
    assert_eq!(before, after);
    assert_eq!(reloaded.get_task(b.id).unwrap().output, "partial ");
    assert_eq!(reloaded.get_task(a.id).unwrap().priority, 3);

    let d = reloaded.create_task(new_task("d"));
    assert_eq!(d.id, TaskId(4));
  }

  #[test]
  fn initialize_fails_orphaned_running_tasks() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("tasks.json");
    let store = TaskStore::new(&path);
    let t = store.create_task(new_task("a"));
    store.start_task(t.id, 1234).unwrap();

    let reloaded = TaskStore::new(&path);
    reloaded.initialize();
    let task = reloaded.get_task(t.id).unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.pid, None);
    assert_eq!(task.error.as_deref(), Some(ORPHANED_ERROR));
  }

  #[test]
  fn persisted_file_has_envelope() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("tasks.json");
    let store = TaskStore::new(&path);
    store.create_task(new_task("a"));
    let v: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(v["version"], json!(FILE_VERSION));
    assert!(v.get("updatedAt").is_some());
    assert_eq!(v["tasks"][0]["prompt"], json!("a"));
  }

  #[test]
  fn corrupt_file_starts_empty() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("tasks.json");
    fs::write(&path, "{ not json").unwrap();
    let store = TaskStore::new(&path);
    assert_eq!(store.initialize(), 0);
    assert_eq!(store.create_task(new_task("a")).id, TaskId(1));
  }
}
