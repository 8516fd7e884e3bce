use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub mod api;
pub mod approvals;
pub mod lock;

use crate::adapters::fs as fsutil;
use crate::automation::{AutomationEngine, LoadReport};
use crate::config::{self, ApprovalMode, Config};
use crate::events::{EventRouter, RouterConfig};
use crate::rpc::server::IpcServer;
use crate::rpc::{DaemonStatus, Health, notifications};
use crate::store::TaskStore;
use crate::supervisor::AgentSupervisor;

use approvals::{ApprovalBroker, json_announcer};
use lock::InstanceLock;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum DaemonError {
  #[error("another daemon already holds {}", .lock.display())]
  AlreadyRunning { lock: PathBuf },
  #[error("lock file: {0}")]
  Lock(io::Error),
  #[error("failed to bind {}: {source}", .path.display())]
  Bind { path: PathBuf, source: io::Error },
  #[error("io: {0}")]
  Io(#[from] io::Error),
  #[error(transparent)]
  Config(#[from] config::ConfigError),
}

/// Where the daemon keeps its files and listens.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
  pub data_dir: PathBuf,
  pub socket_path: PathBuf,
  pub router: RouterConfig,
}

impl DaemonOptions {
  /// Paths from `CONDUCTOR_DATA_DIR` / `CONDUCTOR_SOCKET` or platform defaults.
  pub fn from_env() -> Result<Self, DaemonError> {
    Ok(Self {
      data_dir: config::resolve_data_dir()?,
      socket_path: config::resolve_socket_path()?,
      router: RouterConfig::default(),
    })
  }
}

/// Everything the IPC handlers operate on. Built once per daemon process.
pub struct DaemonState {
  pub config: Arc<Config>,
  pub store: Arc<TaskStore>,
  pub router: EventRouter,
  pub supervisor: AgentSupervisor,
  pub automation: AutomationEngine,
  pub server: IpcServer,
  pub approvals: Option<Arc<ApprovalBroker>>,
  pub rules_path: PathBuf,
  pub socket_path: PathBuf,
  started_at: DateTime<Utc>,
  started: Instant,
  shutdown_tx: watch::Sender<bool>,
}

impl DaemonState {
  pub fn status(&self) -> DaemonStatus {
    let supervisor = self.supervisor.status();
    let router = self.router.stats();
    let health = if supervisor.accepting && router.dead_letters == 0 {
      Health::Ok
    } else {
      Health::Degraded
    };
    DaemonStatus {
      version: env!("CARGO_PKG_VERSION").to_string(),
      pid: std::process::id(),
      uptime_secs: self.started.elapsed().as_secs(),
      started_at: self.started_at,
      socket: self.socket_path.display().to_string(),
      health,
      supervisor,
      tasks: self.store.stats(),
      automation: self.automation.status(),
      router,
    }
  }

  /// Ask the daemon's run loop to shut down.
  pub fn request_shutdown(&self) {
    info!(event = "daemon_shutdown_requested", "shutdown requested");
    self.shutdown_tx.send_replace(true);
  }

  pub fn reload_rules(&self) -> Result<LoadReport, crate::automation::AutomationError> {
    self.automation.load_rules_file(&self.rules_path)
  }
}

/// Handle to a started daemon. Dropping it without [`DaemonHandle::shutdown`]
/// releases the instance lock but leaves child processes running.
pub struct DaemonHandle {
  state: Arc<DaemonState>,
  background: Vec<JoinHandle<()>>,
  _lock: InstanceLock,
}

impl DaemonHandle {
  pub fn state(&self) -> &Arc<DaemonState> {
    &self.state
  }

  pub fn socket_path(&self) -> &Path {
    &self.state.socket_path
  }

  /// Resolves once shutdown was requested over IPC or by a signal.
  pub async fn wait_for_shutdown(&self) {
    let mut rx = self.state.shutdown_tx.subscribe();
    let requested = rx.wait_for(|stop| *stop);
    match signal(SignalKind::terminate()) {
      Ok(mut term) => {
        tokio::select! {
          _ = requested => {}
          _ = term.recv() => info!(event = "daemon_signal", signal = "SIGTERM"),
          _ = tokio::signal::ctrl_c() => info!(event = "daemon_signal", signal = "SIGINT"),
        }
      }
      Err(e) => {
        warn!(event = "daemon_signal_install_failed", error = %e);
        let _ = requested.await;
      }
    }
  }

  /// Stop the supervisor (bounded by `shutdown_timeout_secs`), close the
  /// socket and flush the task store.
  pub async fn shutdown(self) {
    let timeout = self.state.config.shutdown_timeout();
    info!(event = "daemon_stopping", timeout_secs = timeout.as_secs());
    self.state.shutdown_tx.send_replace(true);
    self.state.supervisor.shutdown(timeout).await;
    self.state.server.stop().await;
    for task in &self.background {
      task.abort();
    }
    self.state.store.save();
    info!(event = "daemon_stopped", "daemon stopped");
  }

  /// Serve until asked to stop, then shut down cleanly.
  pub async fn run(self) {
    self.wait_for_shutdown().await;
    self.shutdown().await;
  }
}

/// Bring up every subsystem and start serving on the configured socket.
/// Fails if another daemon holds the lock or the socket cannot be bound.
pub async fn start(config: Config, options: DaemonOptions) -> Result<DaemonHandle, DaemonError> {
  config::validate(&config)?;
  fsutil::ensure_layout(&options.data_dir)?;
  let instance_lock = InstanceLock::acquire(&fsutil::lock_path(&options.data_dir))?;

  let config = Arc::new(config);
  let store_path = config
    .store
    .path
    .clone()
    .unwrap_or_else(|| fsutil::tasks_path(&options.data_dir));
  let store = Arc::new(TaskStore::new(store_path));
  store.initialize();

  let router = EventRouter::start(options.router.clone());
  let supervisor = AgentSupervisor::new(config.clone(), store.clone(), Some(router.clone()));
  let automation = AutomationEngine::new(Arc::new(supervisor.clone()), config.automation.enabled);
  let server = IpcServer::new(&options.socket_path);

  let approvals = match config.automation.approval {
    ApprovalMode::None => None,
    ApprovalMode::Ipc => {
      let sink = server.clone();
      let broker = ApprovalBroker::new(
        Duration::from_secs(config.automation.approval_timeout_secs),
        json_announcer(move |params| sink.broadcast(notifications::APPROVAL_REQUESTED, params)),
      );
      automation.set_approver(Some(broker.approver()));
      Some(broker)
    }
  };

  let rules_path = config
    .automation
    .rules_path
    .clone()
    .unwrap_or_else(|| fsutil::rules_path(&options.data_dir));
  if let Err(e) = automation.load_rules_file(&rules_path) {
    warn!(event = "automation_rules_load_failed", path = %rules_path.display(), error = %e, "starting without rules");
  }
  automation.attach(&router);

  let (shutdown_tx, _) = watch::channel(false);
  let state = Arc::new(DaemonState {
    config: config.clone(),
    store: store.clone(),
    router: router.clone(),
    supervisor: supervisor.clone(),
    automation: automation.clone(),
    server: server.clone(),
    approvals,
    rules_path,
    socket_path: options.socket_path.clone(),
    started_at: Utc::now(),
    started: Instant::now(),
    shutdown_tx,
  });
  api::register(&server, &state);

  server.start().map_err(|source| DaemonError::Bind {
    path: options.socket_path.clone(),
    source,
  })?;

  let restored = supervisor.restore();
  let background = vec![
    spawn_cleanup(store.clone(), &config),
    spawn_signal_forwarder(&automation, server.clone()),
    spawn_failure_forwarder(&router, server.clone()),
  ];

  info!(
    event = "daemon_started",
    socket = %options.socket_path.display(),
    data_dir = %options.data_dir.display(),
    max_concurrency = config.max_concurrency,
    restored,
    "daemon started"
  );
  Ok(DaemonHandle {
    state,
    background,
    _lock: instance_lock,
  })
}

fn spawn_cleanup(store: Arc<TaskStore>, config: &Config) -> JoinHandle<()> {
  let max_age = Duration::from_secs(config.store.cleanup_max_age_hours * 60 * 60);
  tokio::spawn(async move {
    let mut tick = tokio::time::interval(CLEANUP_INTERVAL);
    loop {
      tick.tick().await;
      store.cleanup(max_age);
    }
  })
}

fn spawn_signal_forwarder(automation: &AutomationEngine, server: IpcServer) -> JoinHandle<()> {
  let mut signals = automation.subscribe_signals();
  tokio::spawn(async move {
    loop {
      match signals.recv().await {
        Ok(signal) => match serde_json::to_value(&signal) {
          Ok(params) => server.broadcast(notifications::AUTOMATION_SIGNAL, params),
          Err(e) => error!(event = "automation_signal_encode_failed", error = %e),
        },
        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
          warn!(event = "automation_signals_lagged", skipped = n);
        }
        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
      }
    }
  })
}

fn spawn_failure_forwarder(router: &EventRouter, server: IpcServer) -> JoinHandle<()> {
  let mut failures = router.subscribe_failures();
  tokio::spawn(async move {
    loop {
      match failures.recv().await {
        Ok(entry) => match serde_json::to_value(&entry) {
          Ok(params) => server.broadcast(notifications::EVENT_FAILED, params),
          Err(e) => error!(event = "dead_letter_encode_failed", error = %e),
        },
        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
          warn!(event = "event_failures_lagged", skipped = n);
        }
        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
      }
    }
  })
}
