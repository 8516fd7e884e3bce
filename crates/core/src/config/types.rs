use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::defaults::builtin_agents;

/// Log level for the daemon and CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Off,
  Warn,
  #[default]
  Info,
  Debug,
  Trace,
}

/// Configuration for launching an agent process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub display_name: Option<String>,
  /// Program followed by its arguments. `$CONDUCTOR_*` tokens are substituted.
  pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
  /// Task file location. None means `<data_dir>/tasks.json`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub path: Option<PathBuf>,
  /// Terminal tasks older than this are purged by the periodic cleanup.
  pub cleanup_max_age_hours: u64,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      path: None,
      cleanup_max_age_hours: 24 * 7,
    }
  }
}

/// How rules flagged `requiresApproval` get a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
  /// No approver: such rules are skipped.
  #[default]
  None,
  /// Ask connected IPC clients via `automation.approval_requested`.
  Ipc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationConfig {
  pub enabled: bool,
  /// Rules file (YAML or JSON). None means `<data_dir>/rules.yaml`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub rules_path: Option<PathBuf>,
  pub approval: ApprovalMode,
  pub approval_timeout_secs: u64,
}

impl Default for AutomationConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      rules_path: None,
      approval: ApprovalMode::None,
      approval_timeout_secs: 300,
    }
  }
}

/// Effective configuration after merging defaults, global, and explicit config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
  pub log_level: LogLevel,
  /// Max concurrently running agent processes
  pub max_concurrency: usize,
  /// Per-task wall clock limit in seconds
  pub task_timeout_secs: u64,
  /// Grace period for running tasks on shutdown before they are killed
  pub shutdown_timeout_secs: u64,
  /// Agent used when a task does not name one
  #[serde(default)]
  pub default_agent: Option<String>,
  pub store: StoreConfig,
  pub automation: AutomationConfig,
  /// Agent command definitions resolved by the supervisor when spawning tasks.
  pub agents: BTreeMap<String, AgentConfig>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      log_level: LogLevel::Info,
      max_concurrency: 3,
      task_timeout_secs: 30 * 60,
      shutdown_timeout_secs: 10,
      default_agent: Some("claude".to_string()),
      store: StoreConfig::default(),
      automation: AutomationConfig::default(),
      agents: builtin_agents(),
    }
  }
}

impl Config {
  pub fn task_timeout(&self) -> Duration {
    Duration::from_secs(self.task_timeout_secs)
  }

  pub fn shutdown_timeout(&self) -> Duration {
    Duration::from_secs(self.shutdown_timeout_secs)
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("io: {0}")]
  Io(#[from] std::io::Error),
  #[error("toml: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("unsupported platform: no data or runtime directory available")]
  UnsupportedPlatform,
  #[error("agent `{agent}` is required but not configured")]
  MissingAgentDefinition { agent: String },
  #[error("agent `{agent}` must have a non-empty command")]
  InvalidAgentDefinition { agent: String },
  #[error("max_concurrency must be at least 1")]
  InvalidConcurrency,
}

pub type Result<T> = std::result::Result<T, ConfigError>;
