//! Priority queue plus bounded pool of agent subprocesses.
//!
//! All bookkeeping lives behind one mutex. Spawning, waiting on children and
//! timers happen outside it: a slot is reserved under the lock, the process is
//! spawned afterwards, and a per-task monitor drives the exit handling.

use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::adapters::process::{force_kill, spawn_agent, terminate, termination_signal};
use crate::agent::resolve_command;
use crate::config::Config;
use crate::domain::event::{Event, kinds};
use crate::domain::task::{Task, TaskId, TaskState, preview};
use crate::events::EventRouter;
use crate::store::{NewTask, TaskFilter, TaskStore};

const EVENT_SOURCE: &str = "supervisor";
const PREVIEW_CHARS: usize = 100;
/// How long a timed-out process gets to honour SIGTERM before SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);
/// Bound on draining output pipes after the process exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupervisorError {
  #[error("supervisor is shutting down")]
  ShuttingDown,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
  pub agent: Option<String>,
  pub priority: Option<i64>,
  pub metadata: Map<String, Value>,
}

/// Anything that accepts new agent work. Lets the automation engine be driven
/// without a real process pool.
pub trait TaskSubmitter: Send + Sync {
  fn submit_task(&self, prompt: String, options: SubmitOptions) -> Result<Task, SupervisorError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPreview {
  pub id: TaskId,
  pub prompt: String,
  pub agent: Option<String>,
  pub priority: i64,
  pub pid: Option<u32>,
  pub started_at: Option<DateTime<Utc>>,
}

impl TaskPreview {
  fn from_task(task: &Task) -> Self {
    Self {
      id: task.id,
      prompt: task.prompt_preview(PREVIEW_CHARS),
      agent: task.agent.clone(),
      priority: task.priority,
      pid: task.pid,
      started_at: task.started_at,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
  pub running: usize,
  pub queued: usize,
  pub max_concurrency: usize,
  pub accepting: bool,
  pub running_tasks: Vec<TaskPreview>,
  pub queued_tasks: Vec<TaskPreview>,
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
  id: TaskId,
  priority: i64,
  seq: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RunningEntry {
  /// None while the slot is reserved but the process is not spawned yet.
  pid: Option<u32>,
  cancel_requested: bool,
  timed_out: bool,
}

#[derive(Debug)]
struct SupervisorState {
  queue: Vec<QueueEntry>,
  running: HashMap<TaskId, RunningEntry>,
  next_seq: u64,
  accepting: bool,
}

struct Inner {
  config: Arc<Config>,
  store: Arc<TaskStore>,
  router: Option<EventRouter>,
  state: Mutex<SupervisorState>,
  running_tx: watch::Sender<usize>,
}

#[derive(Clone)]
pub struct AgentSupervisor {
  inner: Arc<Inner>,
}

enum Exit {
  Completed(String),
  Failed(String),
  Cancelled,
}

impl AgentSupervisor {
  pub fn new(config: Arc<Config>, store: Arc<TaskStore>, router: Option<EventRouter>) -> Self {
    let (running_tx, _) = watch::channel(0usize);
    Self {
      inner: Arc::new(Inner {
        config,
        store,
        router,
        state: Mutex::new(SupervisorState {
          queue: Vec::new(),
          running: HashMap::new(),
          next_seq: 0,
          accepting: true,
        }),
        running_tx,
      }),
    }
  }

  pub fn store(&self) -> &Arc<TaskStore> {
    &self.inner.store
  }

  /// Queue a new task and return it in its `queued` state. Never waits for the process.
  pub fn submit(&self, prompt: impl Into<String>, options: SubmitOptions) -> Result<Task, SupervisorError> {
    if !self.inner.state.lock().accepting {
      return Err(SupervisorError::ShuttingDown);
    }
    let task = self.inner.store.create_task(NewTask {
      prompt: prompt.into(),
      agent: options.agent,
      priority: options.priority.unwrap_or(0),
      metadata: options.metadata,
    });

    let accepted = {
      let mut state = self.inner.state.lock();
      if state.accepting {
        state.enqueue(task.id, task.priority);
        true
      } else {
        false
      }
    };
    if !accepted {
      // Shutdown began between creating and queueing
      let _ = self.inner.store.cancel_task(task.id);
      return Err(SupervisorError::ShuttingDown);
    }

    info!(event = "task_queued", id = task.id.0, priority = task.priority, agent = ?task.agent);
    self.inner.emit(kinds::TASK_QUEUED, &task);
    self.inner.schedule();
    Ok(task)
  }

  /// Cancel a queued or running task. Returns false if it is neither.
  pub fn cancel(&self, id: TaskId) -> bool {
    enum Found {
      Queued,
      Running(Option<u32>),
      Missing,
    }
    let found = {
      let mut state = self.inner.state.lock();
      if let Some(pos) = state.queue.iter().position(|e| e.id == id) {
        state.queue.remove(pos);
        Found::Queued
      } else if let Some(entry) = state.running.get_mut(&id) {
        entry.cancel_requested = true;
        Found::Running(entry.pid)
      } else {
        Found::Missing
      }
    };

    match found {
      Found::Queued => {
        info!(event = "task_cancel_queued", id = id.0);
        match self.inner.store.cancel_task(id) {
          Ok(task) => self.inner.emit(kinds::TASK_CANCELLED, &task),
          Err(err) => warn!(event = "task_cancel_store_failed", id = id.0, error = %err),
        }
        true
      }
      Found::Running(pid) => {
        info!(event = "task_cancel_running", id = id.0, pid = ?pid);
        // A reserved slot without pid is signalled right after spawning
        if let Some(pid) = pid
          && let Err(err) = terminate(pid)
        {
          warn!(event = "task_signal_failed", id = id.0, pid, error = %err);
        }
        true
      }
      Found::Missing => false,
    }
  }

  pub fn status(&self) -> SupervisorStatus {
    let (running_ids, queued_ids, accepting) = {
      let state = self.inner.state.lock();
      let mut running: Vec<TaskId> = state.running.keys().copied().collect();
      running.sort();
      let queued: Vec<TaskId> = state.queue.iter().map(|e| e.id).collect();
      (running, queued, state.accepting)
    };
    let previews = |ids: &[TaskId]| -> Vec<TaskPreview> {
      ids
        .iter()
        .filter_map(|id| self.inner.store.get_task(*id))
        .map(|t| TaskPreview::from_task(&t))
        .collect()
    };
    SupervisorStatus {
      running: running_ids.len(),
      queued: queued_ids.len(),
      max_concurrency: self.inner.config.max_concurrency,
      accepting,
      running_tasks: previews(&running_ids),
      queued_tasks: previews(&queued_ids),
    }
  }

  pub fn running_count(&self) -> usize {
    self.inner.state.lock().running.len()
  }

  pub fn queued_count(&self) -> usize {
    self.inner.state.lock().queue.len()
  }

  /// Re-enqueue tasks persisted as `queued` by a previous daemon. Returns how many.
  pub fn restore(&self) -> usize {
    let mut pending = self.inner.store.get_tasks(&TaskFilter {
      state: Some(TaskState::Queued),
      ..TaskFilter::default()
    });
    // Oldest first so arrival order survives the restart
    pending.reverse();
    let count = {
      let mut state = self.inner.state.lock();
      for task in &pending {
        if !state.queue.iter().any(|e| e.id == task.id) {
          state.enqueue(task.id, task.priority);
        }
      }
      pending.len()
    };
    if count > 0 {
      info!(event = "supervisor_restored", count, "re-queued tasks from previous run");
      self.inner.schedule();
    }
    count
  }

  /// Stop accepting work, cancel everything queued, then give running tasks
  /// `timeout` to finish before killing them and marking them failed.
  pub async fn shutdown(&self, timeout: Duration) {
    let queued = {
      let mut state = self.inner.state.lock();
      state.accepting = false;
      std::mem::take(&mut state.queue)
    };
    info!(event = "supervisor_shutdown", queued = queued.len(), running = self.running_count(), timeout_ms = timeout.as_millis() as u64);
    for entry in queued {
      match self.inner.store.cancel_task(entry.id) {
        Ok(task) => self.inner.emit(kinds::TASK_CANCELLED, &task),
        Err(err) => warn!(event = "task_cancel_store_failed", id = entry.id.0, error = %err),
      }
    }

    let mut rx = self.inner.running_tx.subscribe();
    let drained = tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0))
      .await
      .is_ok();
    if drained {
      return;
    }

    let leftovers: Vec<(TaskId, Option<u32>)> = {
      let mut state = self.inner.state.lock();
      let drained: Vec<_> = state.running.drain().map(|(id, e)| (id, e.pid)).collect();
      self.inner.running_tx.send_replace(0);
      drained
    };
    for (id, pid) in leftovers {
      warn!(event = "task_force_killed", id = id.0, pid = ?pid);
      if let Some(pid) = pid
        && let Err(err) = force_kill(pid)
      {
        warn!(event = "task_signal_failed", id = id.0, pid, error = %err);
      }
      match self.inner.store.fail_task(id, "killed at daemon shutdown".to_string()) {
        Ok(task) => self.inner.emit(kinds::TASK_FAILED, &task),
        Err(err) => warn!(event = "task_fail_store_failed", id = id.0, error = %err),
      }
    }
  }

  /// Wait until nothing is running or queued. Intended for tests and tooling.
  pub async fn wait_idle(&self) {
    let mut rx = self.inner.running_tx.subscribe();
    loop {
      if self.running_count() == 0 && self.queued_count() == 0 {
        return;
      }
      if rx.changed().await.is_err() {
        return;
      }
    }
  }
}

impl TaskSubmitter for AgentSupervisor {
  fn submit_task(&self, prompt: String, options: SubmitOptions) -> Result<Task, SupervisorError> {
    self.submit(prompt, options)
  }
}

impl SupervisorState {
  /// Keep the queue sorted by descending priority, then arrival.
  fn enqueue(&mut self, id: TaskId, priority: i64) {
    let seq = self.next_seq;
    self.next_seq += 1;
    let pos = self
      .queue
      .partition_point(|e| e.priority > priority || (e.priority == priority && e.seq < seq));
    self.queue.insert(pos, QueueEntry { id, priority, seq });
  }
}

impl Inner {
  fn publish_running(&self, count: usize) {
    self.running_tx.send_replace(count);
  }

  /// Fill free slots from the head of the queue.
  fn schedule(self: &Arc<Self>) {
    loop {
      let next = {
        let mut state = self.state.lock();
        if !state.accepting
          || state.running.len() >= self.config.max_concurrency
          || state.queue.is_empty()
        {
          return;
        }
        let entry = state.queue.remove(0);
        state.running.insert(entry.id, RunningEntry::default());
        let count = state.running.len();
        self.publish_running(count);
        entry
      };
      self.launch(next.id);
    }
  }

  fn launch(self: &Arc<Self>, id: TaskId) {
    let Some(task) = self.store.get_task(id) else {
      warn!(event = "task_missing_on_launch", id = id.0);
      self.release(id);
      return;
    };

    let spawned = resolve_command(&self.config, task.agent.as_deref(), id, &task.prompt)
      .map_err(|e| e.to_string())
      .and_then(|cmd| {
        spawn_agent(&cmd.program, &cmd.args, &cmd.env)
          .map_err(|e| format!("failed to spawn `{}`: {e}", cmd.program))
      });
    let mut child = match spawned {
      Ok(child) => child,
      Err(error) => {
        warn!(event = "task_spawn_failed", id = id.0, error = %error);
        self.abort_launch(id, error);
        return;
      }
    };

    let Some(pid) = child.id() else {
      self.abort_launch(id, "process exited before it could be tracked".to_string());
      return;
    };

    let reserved = {
      let mut state = self.state.lock();
      state.running.get_mut(&id).map(|entry| {
        entry.pid = Some(pid);
        entry.cancel_requested
      })
    };
    let Some(cancel_requested) = reserved else {
      // Slot was reclaimed by a forced shutdown while spawning
      let _ = force_kill(pid);
      let _ = child.start_kill();
      return;
    };

    match self.store.start_task(id, pid) {
      Ok(task) => {
        info!(event = "task_started", id = id.0, pid, agent = ?task.agent);
        self.emit(kinds::TASK_STARTED, &task);
      }
      Err(err) => warn!(event = "task_start_store_failed", id = id.0, error = %err),
    }
    if cancel_requested && let Err(err) = terminate(pid) {
      warn!(event = "task_signal_failed", id = id.0, pid, error = %err);
    }
    tokio::spawn(monitor(self.clone(), id, child));
  }

  /// Fail a task whose process never started and free its slot.
  fn abort_launch(self: &Arc<Self>, id: TaskId, error: String) {
    let failed = self.store.fail_task(id, error);
    self.release(id);
    match failed {
      Ok(task) => self.emit(kinds::TASK_FAILED, &task),
      Err(err) => warn!(event = "task_fail_store_failed", id = id.0, error = %err),
    }
  }

  /// Drop a slot without touching the store.
  fn release(self: &Arc<Self>, id: TaskId) {
    let mut state = self.state.lock();
    state.running.remove(&id);
    let count = state.running.len();
    self.publish_running(count);
  }

  fn finish(self: &Arc<Self>, id: TaskId, status: std::io::Result<ExitStatus>, stdout: String, stderr: String) {
    let entry = self.state.lock().running.get(&id).copied();
    let Some(entry) = entry else {
      // Already finalized by a forced shutdown
      return;
    };

    let exit = match status {
      Err(err) => Exit::Failed(format!("failed to wait for process: {err}")),
      Ok(_) if entry.timed_out => Exit::Failed(format!(
        "timed out after {}s",
        self.config.task_timeout_secs
      )),
      Ok(status) if entry.cancel_requested || termination_signal(&status).is_some() => Exit::Cancelled,
      Ok(status) if status.success() => Exit::Completed(stdout.trim_end().to_string()),
      Ok(status) => {
        let stderr = stderr.trim();
        Exit::Failed(if stderr.is_empty() {
          format!("exited with code {}", status.code().unwrap_or(-1))
        } else {
          stderr.to_string()
        })
      }
    };

    let (outcome, kind) = match exit {
      Exit::Completed(result) => (self.store.complete_task(id, result), kinds::TASK_COMPLETED),
      Exit::Failed(error) => (self.store.fail_task(id, error), kinds::TASK_FAILED),
      Exit::Cancelled => (self.store.cancel_task(id), kinds::TASK_CANCELLED),
    };
    // The store is final before the slot frees, so idle waiters see terminal states
    self.release(id);
    match outcome {
      Ok(task) => {
        info!(event = "task_finished", id = id.0, state = %task.state, error = ?task.error);
        self.emit(kind, &task);
      }
      Err(err) => warn!(event = "task_finish_store_failed", id = id.0, error = %err),
    }
    self.schedule();
  }

  fn emit(&self, kind: &str, task: &Task) {
    let Some(router) = &self.router else {
      return;
    };
    let payload = json!({
      "taskId": task.id,
      "state": task.state,
      "agent": task.agent,
      "priority": task.priority,
      "prompt": preview(&task.prompt, PREVIEW_CHARS),
      "error": task.error,
      "metadata": task.metadata,
    });
    router.try_publish(Event::new(EVENT_SOURCE, kind, payload));
  }
}

async fn monitor(inner: Arc<Inner>, id: TaskId, mut child: Child) {
  let stdout = child
    .stdout
    .take()
    .map(|s| tokio::spawn(collect(s, Some((inner.store.clone(), id)))));
  let stderr = child.stderr.take().map(|s| tokio::spawn(collect(s, None)));

  let timeout = inner.config.task_timeout();
  let status = tokio::select! {
    status = child.wait() => status,
    _ = tokio::time::sleep(timeout) => {
      let pid = {
        let mut state = inner.state.lock();
        state.running.get_mut(&id).and_then(|entry| {
          entry.timed_out = true;
          entry.pid
        })
      };
      warn!(event = "task_timeout", id = id.0, pid = ?pid, timeout_secs = timeout.as_secs());
      if let Some(pid) = pid {
        let _ = terminate(pid);
      }
      match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
          if let Some(pid) = pid {
            let _ = force_kill(pid);
          }
          child.wait().await
        }
      }
    }
  };

  let stdout = drain(stdout).await;
  let stderr = drain(stderr).await;
  debug!(event = "task_process_exited", id = id.0, status = ?status.as_ref().ok());
  inner.finish(id, status, stdout, stderr);
}

/// Read a pipe line by line. With a store attached every chunk is appended to the task output.
async fn collect<R>(reader: R, sink: Option<(Arc<TaskStore>, TaskId)>) -> String
where
  R: AsyncRead + Unpin,
{
  let mut reader = BufReader::new(reader);
  let mut all = String::new();
  let mut line = Vec::new();
  loop {
    line.clear();
    match reader.read_until(b'\n', &mut line).await {
      Ok(0) | Err(_) => break,
      Ok(_) => {
        let chunk = String::from_utf8_lossy(&line);
        if let Some((store, id)) = &sink {
          let _ = store.append_output(*id, &chunk);
        }
        all.push_str(&chunk);
      }
    }
  }
  all
}

async fn drain(handle: Option<tokio::task::JoinHandle<String>>) -> String {
  let Some(mut handle) = handle else {
    return String::new();
  };
  match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
    Ok(Ok(text)) => text,
    Ok(Err(_)) => String::new(),
    Err(_) => {
      handle.abort();
      String::new()
    }
  }
}
