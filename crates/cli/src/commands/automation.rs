use std::io::Write;

use anyhow::Result;
use conductor_core::automation::{AutomationStatus, ExecutionRecord, LoadReport};
use conductor_core::rpc::{LimitParams, RuleToggleParams, ToggleResult, methods};
use serde_json::Value;
use yansi::Paint;

use super::{Ctx, print_json, typed};
use crate::util::render;

pub async fn status(ctx: &Ctx, out: &mut (dyn Write + Send)) -> Result<()> {
  let value = ctx
    .request("automation status", methods::AUTOMATION_STATUS, Value::Null)
    .await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let status: AutomationStatus = typed(value)?;
  writeln!(
    out,
    "automation: {} ({} rules, {} enabled{})",
    if status.enabled { "on".green().to_string() } else { "off".yellow().to_string() },
    status.rule_count,
    status.enabled_rules,
    if status.has_approver { ", approvals over ipc" } else { "" }
  )?;
  for rule in &status.rules {
    let trigger = [
      rule.trigger.kind.as_deref(),
      rule.trigger.source.as_deref(),
      rule.trigger.pattern.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ");
    let mut flags = Vec::new();
    if rule.cooldown_ms > 0 {
      flags.push(format!("cooldown {}ms", rule.cooldown_ms));
    }
    if rule.requires_approval {
      flags.push("approval".to_string());
    }
    writeln!(
      out,
      "  [{}] {}  on {}  -> {}{}",
      if rule.enabled { "x" } else { " " },
      rule.id,
      if trigger.is_empty() { "*" } else { &trigger },
      rule.action,
      if flags.is_empty() { String::new() } else { format!("  ({})", flags.join(", ")) }
    )?;
  }
  Ok(())
}

pub async fn toggle(
  ctx: &Ctx,
  out: &mut (dyn Write + Send),
  enabled: bool,
  rule: Option<String>,
) -> Result<()> {
  let (action, method) = if enabled {
    ("automation enable", methods::AUTOMATION_ENABLE)
  } else {
    ("automation disable", methods::AUTOMATION_DISABLE)
  };
  let params = RuleToggleParams { rule_id: rule };
  let value = ctx.request(action, method, serde_json::to_value(params)?).await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let result: ToggleResult = typed(value)?;
  let word = if result.enabled { "enabled" } else { "disabled" };
  match result.rule_id {
    Some(id) => writeln!(out, "rule `{id}` {word}")?,
    None => writeln!(out, "automation {word}")?,
  }
  Ok(())
}

pub async fn log(ctx: &Ctx, out: &mut (dyn Write + Send), limit: Option<usize>) -> Result<()> {
  let params = LimitParams { limit };
  let value = ctx
    .request("automation log", methods::AUTOMATION_LOG, serde_json::to_value(params)?)
    .await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let records: Vec<ExecutionRecord> = typed(value)?;
  if records.is_empty() {
    writeln!(out, "no rule executions yet")?;
  }
  for record in &records {
    writeln!(out, "{}", render::execution_line(record))?;
  }
  Ok(())
}

pub async fn reload(ctx: &Ctx, out: &mut (dyn Write + Send)) -> Result<()> {
  let value = ctx
    .request("automation reload", methods::AUTOMATION_RELOAD, Value::Null)
    .await?;
  if ctx.json {
    return print_json(out, &value);
  }
  let report: LoadReport = typed(value)?;
  writeln!(out, "loaded {} rules", report.loaded)?;
  for reason in &report.rejected {
    writeln!(out, "  rejected: {}", reason.yellow())?;
  }
  Ok(())
}
