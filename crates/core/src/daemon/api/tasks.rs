use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, json};
use tracing::info;

use crate::domain::task::Task;
use crate::rpc::protocol::{HandlerError, HandlerResult, parse_params};
use crate::rpc::server::IpcServer;
use crate::rpc::{
  CancelResult, ChatParams, CleanupParams, CleanupResult, SubmitParams, SubmitResult, TaskIdParams,
  methods,
};
use crate::store::TaskFilter;
use crate::supervisor::SubmitOptions;

use super::super::DaemonState;
use super::{method, to_value};

/// Priority given to messages typed into `chat.send`.
pub const CHAT_PRIORITY: i64 = 10;

/// Register the task.* family and chat.send.
pub fn register(server: &IpcServer, state: &Arc<DaemonState>) {
  // ---- task.submit ----
  method(server, state, methods::TASK_SUBMIT, |state, params| async move {
    let p: SubmitParams = parse_params(params)?;
    let options = SubmitOptions {
      agent: p.agent,
      priority: p.priority,
      metadata: p.metadata.unwrap_or_default(),
    };
    submit(&state, p.prompt, options)
  });

  // ---- chat.send ----
  method(server, state, methods::CHAT_SEND, |state, params| async move {
    let p: ChatParams = parse_params(params)?;
    let mut metadata = Map::new();
    metadata.insert("source".to_string(), json!("chat"));
    let options = SubmitOptions {
      agent: None,
      priority: Some(CHAT_PRIORITY),
      metadata,
    };
    submit(&state, p.message, options)
  });

  // ---- task.cancel ----
  method(server, state, methods::TASK_CANCEL, |state, params| async move {
    let p: TaskIdParams = parse_params(params)?;
    let cancelled = state.supervisor.cancel(p.task_id);
    info!(event = "task_cancel_rpc", id = p.task_id.0, cancelled);
    to_value(&CancelResult { cancelled })
  });

  // ---- task.list ----
  method(server, state, methods::TASK_LIST, |state, params| async move {
    let filter: TaskFilter = parse_params(params)?;
    let tasks: Vec<Task> = state
      .store
      .get_tasks(&filter)
      .into_iter()
      .map(|mut task| {
        task.output.clear();
        task
      })
      .collect();
    to_value(&tasks)
  });

  // ---- task.get ----
  method(server, state, methods::TASK_GET, |state, params| async move {
    let p: TaskIdParams = parse_params(params)?;
    match state.store.get_task(p.task_id) {
      Some(task) => to_value(&task),
      None => Err(HandlerError::invalid_params(format!(
        "task {} not found",
        p.task_id
      ))),
    }
  });

  // ---- task.stats ----
  method(server, state, methods::TASK_STATS, |state, _params| async move {
    to_value(&state.store.stats())
  });

  // ---- task.summary ----
  method(server, state, methods::TASK_SUMMARY, |state, _params| async move {
    to_value(&state.store.summary())
  });

  // ---- task.cleanup ----
  method(server, state, methods::TASK_CLEANUP, |state, params| async move {
    let p: CleanupParams = parse_params(params)?;
    let max_age = p
      .max_age_secs
      .map(Duration::from_secs)
      .unwrap_or_else(|| Duration::from_secs(state.config.store.cleanup_max_age_hours * 60 * 60));
    let removed = state.store.cleanup(max_age);
    to_value(&CleanupResult { removed })
  });
}

fn submit(state: &DaemonState, prompt: String, options: SubmitOptions) -> HandlerResult {
  if prompt.trim().is_empty() {
    return Err(HandlerError::invalid_params("prompt must not be empty"));
  }
  if let Some(agent) = options.agent.as_deref()
    && !state.config.agents.contains_key(agent)
  {
    return Err(HandlerError::invalid_params(format!("unknown agent `{agent}`")));
  }
  let task = state
    .supervisor
    .submit(prompt, options)
    .map_err(HandlerError::internal)?;
  to_value(&SubmitResult {
    task_id: task.id,
    state: task.state,
  })
}
