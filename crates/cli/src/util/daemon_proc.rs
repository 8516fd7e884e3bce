use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use conductor_core::rpc::{IpcClient, methods};
use serde_json::Value;

const POLL_ATTEMPTS: u8 = 50;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn resolve_socket() -> Result<PathBuf> {
  conductor_core::config::resolve_socket_path().context("could not resolve socket path")
}

/// True when something answers `ping` on the socket.
pub async fn daemon_running(sock: &Path) -> bool {
  match IpcClient::connect(sock).await {
    Ok(client) => client.call::<Value>(methods::PING, Value::Null).await.is_ok(),
    Err(_) => false,
  }
}

/// Poll until the daemon's reachability matches `running`.
pub async fn wait_for_daemon(sock: &Path, running: bool) -> bool {
  for _ in 0..POLL_ATTEMPTS {
    if daemon_running(sock).await == running {
      return true;
    }
    tokio::time::sleep(POLL_INTERVAL).await;
  }
  false
}

/// Re-exec the current binary as `daemon run`, detached from this terminal.
pub fn spawn_daemon_background(sock: &Path, config: Option<&Path>) -> std::io::Result<()> {
  let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("conductor"));
  let mut cmd = Command::new(exe);
  cmd.arg("daemon").arg("run").arg("--socket").arg(sock);
  if let Some(config) = config {
    cmd.arg("--config").arg(config);
  }
  cmd.env("CONDUCTOR_SOCKET", sock);
  cmd
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null());
  let _ = cmd.spawn()?;
  Ok(())
}
