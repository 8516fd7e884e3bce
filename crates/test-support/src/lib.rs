use std::path::{Path, PathBuf};
use std::time::Duration;

use conductor_core::config::Config;
use conductor_core::daemon::{self, DaemonHandle, DaemonOptions};
use conductor_core::events::RouterConfig;
use conductor_core::rpc::IpcClient;

/// Temporary data directory with a config that runs prompts through `sh -c`.
pub struct TempConductor {
  pub root: tempfile::TempDir,
  pub config: Config,
}

impl Default for TempConductor {
  fn default() -> Self {
    Self::new()
  }
}

impl TempConductor {
  pub fn new() -> Self {
    let root = tempfile::tempdir().expect("tempdir");
    Self {
      root,
      config: shell_config(),
    }
  }

  pub fn path(&self) -> PathBuf {
    self.root.path().to_path_buf()
  }

  pub fn socket_path(&self) -> PathBuf {
    self.root.path().join("conductor.sock")
  }

  pub fn rules_path(&self) -> PathBuf {
    self.root.path().join("rules.yaml")
  }

  /// Write the automation rules file picked up at startup and by `automation.reload`.
  pub fn write_rules(&self, yaml: &str) {
    std::fs::write(self.rules_path(), yaml).expect("write rules");
  }

  pub fn options(&self) -> DaemonOptions {
    DaemonOptions {
      data_dir: self.path(),
      socket_path: self.socket_path(),
      router: fast_router(),
    }
  }

  /// Start a daemon rooted in this directory.
  pub async fn start(&self) -> DaemonHandle {
    daemon::start(self.config.clone(), self.options())
      .await
      .expect("daemon start")
  }

  pub async fn connect(&self) -> IpcClient {
    connect(&self.socket_path()).await
  }
}

/// Built-in config trimmed to the `shell` agent, which runs the prompt as a script.
pub fn shell_config() -> Config {
  let mut config = Config::default();
  config.default_agent = Some("shell".to_string());
  config.agents.retain(|name, _| name == "shell");
  config.shutdown_timeout_secs = 2;
  config
}

/// Router settings with millisecond backoff so retry paths finish quickly.
pub fn fast_router() -> RouterConfig {
  RouterConfig {
    backoff_base: Duration::from_millis(5),
    ..RouterConfig::default()
  }
}

pub async fn connect(socket: &Path) -> IpcClient {
  IpcClient::connect(socket).await.expect("connect to daemon")
}

/// Poll a condition repeatedly until it returns true or times out.
/// Returns true if condition met, false on timeout.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  use tokio::time::{Instant, sleep};
  let start = Instant::now();
  loop {
    if check().await {
      return true;
    }
    if start.elapsed() >= timeout {
      return false;
    }
    sleep(interval).await;
  }
}
