//! JSON-lines logging shared by the daemon and the CLI.
//!
//! Every record lands in `<data_dir>/logs.jsonl`; daemon code tags records with
//! an `event = "snake_case"` field so the file can be filtered with `jq`.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::OnceLock;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LogLevel;

/// Env-filter directive that takes precedence over the configured level,
/// e.g. `CONDUCTOR_LOG=conductor_core::events=trace,info`.
pub const LOG_ENV: &str = "CONDUCTOR_LOG";

static WORKER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn level_directive(level: LogLevel) -> &'static str {
  match level {
    LogLevel::Off => "off",
    LogLevel::Warn => "warn",
    LogLevel::Info => "info",
    LogLevel::Debug => "debug",
    LogLevel::Trace => "trace",
  }
}

/// The filter for `level`, unless `directive` parses as an override.
pub fn build_filter(level: LogLevel, directive: Option<&str>) -> EnvFilter {
  directive
    .filter(|d| !d.trim().is_empty())
    .and_then(|d| EnvFilter::try_new(d).ok())
    .unwrap_or_else(|| EnvFilter::new(level_directive(level)))
}

/// Install the global JSON subscriber writing to `logs_path`.
///
/// Returns `Ok(false)` when a subscriber was already installed; the process
/// keeps logging wherever the first call pointed it.
pub fn init(logs_path: &Path, level: LogLevel) -> io::Result<bool> {
  if let Some(parent) = logs_path.parent() {
    fs::create_dir_all(parent)?;
  }
  let file = OpenOptions::new().create(true).append(true).open(logs_path)?;

  let (writer, guard) = tracing_appender::non_blocking(file);
  let env_directive = std::env::var(LOG_ENV).ok();
  let filter = build_filter(level, env_directive.as_deref());

  let json = fmt::layer()
    .json()
    .with_timer(ChronoUtc::rfc_3339())
    .with_current_span(true)
    .with_span_list(false)
    .with_target(false)
    .with_writer(writer);

  let installed = tracing_subscriber::registry()
    .with(filter)
    .with(json)
    .try_init()
    .is_ok();
  if !installed {
    return Ok(false);
  }
  let _ = WORKER_GUARD.set(guard);

  info!(
    event = "logging_ready",
    logs_path = %logs_path.display(),
    level = level_directive(level),
    env_override = env_directive.is_some(),
    pid = std::process::id(),
    version = env!("CARGO_PKG_VERSION"),
  );
  Ok(true)
}
