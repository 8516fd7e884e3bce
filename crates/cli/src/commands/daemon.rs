use std::io::Write;

use anyhow::{Result, bail};
use conductor_core::config;
use conductor_core::daemon::{self, DaemonOptions};
use conductor_core::rpc::{DaemonStatus, Health, methods};
use serde_json::Value;
use tracing::info;
use yansi::Paint;

use super::{Ctx, print_json, typed};
use crate::util::daemon_proc::{daemon_running, spawn_daemon_background, wait_for_daemon};

const STOPPED: &str = "daemon: stopped";

pub async fn status(ctx: &Ctx, out: &mut (dyn Write + Send)) -> Result<()> {
  let value = match ctx.request("status", methods::DAEMON_STATUS, Value::Null).await {
    Ok(value) => value,
    Err(_) => {
      writeln!(out, "{STOPPED}")?;
      return Ok(());
    }
  };
  if ctx.json {
    return print_json(out, &value);
  }
  let status: DaemonStatus = typed(value)?;
  let health = match status.health {
    Health::Ok => "ok".green().to_string(),
    Health::Degraded => "degraded".yellow().to_string(),
  };
  let sup = &status.supervisor;
  writeln!(
    out,
    "daemon: running (v{}, pid {}, socket {})",
    status.version, status.pid, status.socket
  )?;
  writeln!(out, "health: {health}, up {}s", status.uptime_secs)?;
  writeln!(
    out,
    "tasks: {} running, {} queued (limit {}); {} completed, {} failed, {} cancelled",
    sup.running,
    sup.queued,
    sup.max_concurrency,
    status.tasks.completed,
    status.tasks.failed,
    status.tasks.cancelled
  )?;
  writeln!(
    out,
    "automation: {}, {}/{} rules enabled",
    if status.automation.enabled { "on" } else { "off" },
    status.automation.enabled_rules,
    status.automation.rule_count
  )?;
  writeln!(
    out,
    "events: {} in history, {} dead letters",
    status.router.history, status.router.dead_letters
  )?;
  Ok(())
}

pub async fn start(ctx: &Ctx, out: &mut (dyn Write + Send)) -> Result<()> {
  if daemon_running(&ctx.socket).await {
    return status(ctx, out).await;
  }
  if let Err(e) = spawn_daemon_background(&ctx.socket, ctx.config.as_deref()) {
    bail!("failed to spawn daemon: {e}");
  }
  if wait_for_daemon(&ctx.socket, true).await {
    status(ctx, out).await
  } else {
    writeln!(out, "{STOPPED}")?;
    bail!("daemon did not come up at {}", ctx.socket.display())
  }
}

pub async fn stop(ctx: &Ctx, out: &mut (dyn Write + Send)) -> Result<()> {
  if ctx
    .request("stop", methods::DAEMON_SHUTDOWN, Value::Null)
    .await
    .is_ok()
    && !wait_for_daemon(&ctx.socket, false).await
  {
    bail!("daemon at {} did not stop", ctx.socket.display());
  }
  writeln!(out, "{STOPPED}")?;
  Ok(())
}

/// Serve in this process until `daemon.shutdown` or a signal.
pub async fn run_foreground(ctx: &Ctx, out: &mut (dyn Write + Send)) -> Result<()> {
  let cfg = config::load(ctx.config.as_deref())?;
  let mut options = DaemonOptions::from_env()?;
  options.socket_path = ctx.socket.clone();
  let handle = daemon::start(cfg, options).await?;
  info!(event = "cli_daemon_run", socket = %ctx.socket.display());
  writeln!(
    out,
    "daemon: running (pid {}, socket {})",
    std::process::id(),
    ctx.socket.display()
  )?;
  out.flush()?;
  handle.run().await;
  writeln!(out, "{STOPPED}")?;
  Ok(())
}

