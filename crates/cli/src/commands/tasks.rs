use std::io::Write;

use anyhow::Result;
use conductor_core::domain::task::{Task, TaskId};
use conductor_core::rpc::{CancelResult, SubmitParams, SubmitResult, methods};
use conductor_core::store::{TaskFilter, TaskStats};
use serde_json::{Value, json};

use super::{Ctx, print_json, typed};
use crate::args::{ListArgs, SubmitArgs};
use crate::util::render;

pub async fn submit(ctx: &Ctx, out: &mut (dyn Write + Send), args: SubmitArgs) -> Result<()> {
  let params = SubmitParams {
    prompt: args.prompt,
    agent: args.agent,
    priority: args.priority,
    metadata: None,
  };
  let value = ctx
    .request("submit", methods::TASK_SUBMIT, serde_json::to_value(params)?)
    .await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let submitted: SubmitResult = typed(value)?;
  writeln!(out, "queued task #{}", submitted.task_id)?;
  Ok(())
}

pub async fn chat(ctx: &Ctx, out: &mut (dyn Write + Send), message: String) -> Result<()> {
  let value = ctx
    .request("chat", methods::CHAT_SEND, json!({ "message": message }))
    .await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let submitted: SubmitResult = typed(value)?;
  writeln!(out, "chat queued as task #{}", submitted.task_id)?;
  Ok(())
}

pub async fn cancel(ctx: &Ctx, out: &mut (dyn Write + Send), id: TaskId) -> Result<()> {
  let value = ctx
    .request("cancel", methods::TASK_CANCEL, json!({ "taskId": id }))
    .await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let result: CancelResult = typed(value)?;
  if result.cancelled {
    writeln!(out, "cancelled task #{id}")?;
  } else {
    writeln!(out, "task #{id} is not queued or running")?;
  }
  Ok(())
}

pub async fn list(ctx: &Ctx, out: &mut (dyn Write + Send), args: ListArgs) -> Result<()> {
  let filter = TaskFilter {
    state: args.state,
    agent: args.agent,
    limit: args.limit,
  };
  let value = ctx
    .request("list", methods::TASK_LIST, serde_json::to_value(filter)?)
    .await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let tasks: Vec<Task> = typed(value)?;
  if tasks.is_empty() {
    writeln!(out, "no tasks")?;
  }
  for task in &tasks {
    writeln!(out, "{}", render::task_line(task))?;
  }
  Ok(())
}

pub async fn get(ctx: &Ctx, out: &mut (dyn Write + Send), id: TaskId) -> Result<()> {
  let value = ctx
    .request("get", methods::TASK_GET, json!({ "taskId": id }))
    .await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let task: Task = typed(value)?;
  writeln!(out, "{}", render::task_detail(&task))?;
  Ok(())
}

pub async fn stats(ctx: &Ctx, out: &mut (dyn Write + Send)) -> Result<()> {
  let value = ctx.request("stats", methods::TASK_STATS, Value::Null).await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let s: TaskStats = typed(value)?;
  writeln!(
    out,
    "total {}: {} queued, {} running, {} completed, {} failed, {} cancelled",
    s.total, s.queued, s.running, s.completed, s.failed, s.cancelled
  )?;
  Ok(())
}

pub async fn ping(ctx: &Ctx, out: &mut (dyn Write + Send)) -> Result<()> {
  let value = ctx.request("ping", methods::PING, Value::Null).await?;
  if ctx.json {
    return print_json(out, &value);
  }
  writeln!(out, "pong")?;
  Ok(())
}
