use std::io::Write;

use anyhow::Result;
use conductor_core::domain::event::{DeadLetterEntry, Event};
use conductor_core::rpc::{LimitParams, PublishParams, PublishResult, methods};
use serde_json::Value;

use super::{Ctx, print_json, typed};
use crate::util::render;

pub async fn publish(
  ctx: &Ctx,
  out: &mut (dyn Write + Send),
  source: String,
  kind: String,
  payload: Option<Value>,
) -> Result<()> {
  let params = PublishParams {
    source,
    kind: kind.clone(),
    payload: payload.unwrap_or(Value::Null),
  };
  let value = ctx
    .request("publish", methods::EVENTS_PUBLISH, serde_json::to_value(params)?)
    .await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let result: PublishResult = typed(value)?;
  if result.accepted {
    writeln!(out, "published {kind}")?;
  } else {
    writeln!(out, "dropped {kind}: event queue is full")?;
  }
  Ok(())
}

pub async fn history(ctx: &Ctx, out: &mut (dyn Write + Send), limit: Option<usize>) -> Result<()> {
  let params = LimitParams { limit };
  let value = ctx
    .request("events history", methods::EVENTS_HISTORY, serde_json::to_value(params)?)
    .await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let events: Vec<Event> = typed(value)?;
  if events.is_empty() {
    writeln!(out, "no events")?;
  }
  for event in &events {
    writeln!(out, "{}", render::event_line(event))?;
  }
  Ok(())
}

pub async fn dead_letters(ctx: &Ctx, out: &mut (dyn Write + Send)) -> Result<()> {
  let value = ctx
    .request("dead letters", methods::EVENTS_DEAD_LETTERS, Value::Null)
    .await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let entries: Vec<DeadLetterEntry> = typed(value)?;
  if entries.is_empty() {
    writeln!(out, "no dead letters")?;
  }
  for entry in &entries {
    writeln!(out, "{}", render::dead_letter_line(entry))?;
  }
  Ok(())
}
