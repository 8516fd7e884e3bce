use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::paths::global_config_path;
use super::types::{
  AgentConfig, ApprovalMode, AutomationConfig, Config, LogLevel, Result, StoreConfig,
};
use super::validate::validate;

/// Load configuration from defaults, the global config file and an optional
/// explicit file (e.g. `--config`). Later sources override earlier ones.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
  load_from_paths(global_config_path().as_deref(), explicit)
}

/// Load configuration from explicit file paths (if present).
pub fn load_from_paths(global: Option<&Path>, explicit: Option<&Path>) -> Result<Config> {
  let mut cfg = Config::default();

  if let Some(g) = global
    && let Ok(s) = fs::read_to_string(g)
  {
    let partial: PartialConfig = toml::from_str(&s)?;
    cfg = partial.merge_over(cfg);
  }

  if let Some(p) = explicit {
    // An explicitly requested file must exist
    let s = fs::read_to_string(p)?;
    let partial: PartialConfig = toml::from_str(&s)?;
    cfg = partial.merge_over(cfg);
  }

  validate(&cfg)?;

  Ok(cfg)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
struct PartialStoreConfig {
  pub path: Option<PathBuf>,
  pub cleanup_max_age_hours: Option<u64>,
}

impl PartialStoreConfig {
  fn merge_over(self, base: StoreConfig) -> StoreConfig {
    StoreConfig {
      path: self.path.or(base.path),
      cleanup_max_age_hours: self
        .cleanup_max_age_hours
        .unwrap_or(base.cleanup_max_age_hours),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
struct PartialAutomationConfig {
  pub enabled: Option<bool>,
  pub rules_path: Option<PathBuf>,
  pub approval: Option<ApprovalMode>,
  pub approval_timeout_secs: Option<u64>,
}

impl PartialAutomationConfig {
  fn merge_over(self, base: AutomationConfig) -> AutomationConfig {
    AutomationConfig {
      enabled: self.enabled.unwrap_or(base.enabled),
      rules_path: self.rules_path.or(base.rules_path),
      approval: self.approval.unwrap_or(base.approval),
      approval_timeout_secs: self
        .approval_timeout_secs
        .unwrap_or(base.approval_timeout_secs),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
struct PartialConfig {
  pub log_level: Option<LogLevel>,
  pub max_concurrency: Option<usize>,
  pub task_timeout_secs: Option<u64>,
  pub shutdown_timeout_secs: Option<u64>,
  pub default_agent: Option<String>,
  pub store: Option<PartialStoreConfig>,
  pub automation: Option<PartialAutomationConfig>,
  pub agents: Option<BTreeMap<String, AgentConfig>>,
}

impl PartialConfig {
  fn merge_over(self, base: Config) -> Config {
    let PartialConfig {
      log_level,
      max_concurrency,
      task_timeout_secs,
      shutdown_timeout_secs,
      default_agent,
      store,
      automation,
      agents,
    } = self;

    let Config {
      log_level: base_log_level,
      max_concurrency: base_max_concurrency,
      task_timeout_secs: base_task_timeout_secs,
      shutdown_timeout_secs: base_shutdown_timeout_secs,
      default_agent: base_default_agent,
      store: base_store,
      automation: base_automation,
      agents: base_agents,
    } = base;

    let mut merged_agents = base_agents;
    if let Some(overrides) = agents {
      for (name, cfg) in overrides {
        merged_agents.insert(name, cfg);
      }
    }

    Config {
      log_level: log_level.unwrap_or(base_log_level),
      max_concurrency: max_concurrency.unwrap_or(base_max_concurrency),
      task_timeout_secs: task_timeout_secs.unwrap_or(base_task_timeout_secs),
      shutdown_timeout_secs: shutdown_timeout_secs.unwrap_or(base_shutdown_timeout_secs),
      default_agent: default_agent.or(base_default_agent),
      store: store.unwrap_or_default().merge_over(base_store),
      automation: automation.unwrap_or_default().merge_over(base_automation),
      agents: merged_agents,
    }
  }
}
