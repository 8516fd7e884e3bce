use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::rpc::server::IpcServer;
use crate::rpc::{PingResult, ShutdownResult, methods};

use super::super::DaemonState;
use super::{method, to_value};

/// Lets the `daemon.shutdown` response reach the caller before the socket closes.
const SHUTDOWN_DELAY: Duration = Duration::from_millis(50);

/// Register daemon.status, daemon.shutdown and ping.
pub fn register(server: &IpcServer, state: &Arc<DaemonState>) {
  // ---- daemon.status ----
  method(server, state, methods::DAEMON_STATUS, |state, _params| async move {
    let status = state.status();
    info!(event = "daemon_status", pid = status.pid, health = ?status.health, "status served");
    to_value(&status)
  });

  // ---- daemon.shutdown ----
  method(server, state, methods::DAEMON_SHUTDOWN, |state, _params| async move {
    info!(event = "daemon_shutdown_rpc", "shutdown requested via RPC");
    tokio::spawn(async move {
      tokio::time::sleep(SHUTDOWN_DELAY).await;
      state.request_shutdown();
    });
    to_value(&ShutdownResult { stopping: true })
  });

  // ---- ping ----
  method(server, state, methods::PING, |_state, _params| async move {
    to_value(&PingResult {
      pong: true,
      timestamp: Utc::now(),
    })
  });
}
