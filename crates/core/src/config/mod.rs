mod defaults;
mod load;
mod paths;
mod types;
mod validate;

pub use load::{load, load_from_paths};
pub use paths::{global_config_path, resolve_data_dir, resolve_socket_path};
pub use validate::validate;
pub use types::{
  AgentConfig, ApprovalMode, AutomationConfig, Config, ConfigError, LogLevel, Result, StoreConfig,
};

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  #[test]
  fn defaults_are_correct() {
    let cfg = Config::default();
    assert_eq!(cfg.log_level, LogLevel::Info);
    assert_eq!(cfg.max_concurrency, 3);
    assert_eq!(cfg.task_timeout_secs, 1800);
    assert_eq!(cfg.shutdown_timeout_secs, 10);
    assert_eq!(cfg.default_agent.as_deref(), Some("claude"));
    assert_eq!(cfg.store.cleanup_max_age_hours, 168);
    assert!(cfg.automation.enabled);
    assert_eq!(cfg.automation.approval, ApprovalMode::None);
    let claude = cfg.agents.get("claude").expect("claude agent");
    assert_eq!(
      claude.command,
      vec![
        "claude".to_string(),
        "-p".to_string(),
        "$CONDUCTOR_PROMPT".to_string()
      ]
    );
    let shell = cfg.agents.get("shell").expect("shell agent");
    assert_eq!(shell.display_name.as_deref(), Some("Shell"));
  }

  #[test]
  fn merge_precedence_explicit_overrides_global_over_defaults() {
    let td = tempfile::tempdir().unwrap();
    let global = td.path().join("global.toml");
    let explicit = td.path().join("explicit.toml");

    fs::write(
      &global,
      r#"
log_level = "warn"
max_concurrency = 5
task_timeout_secs = 60
[automation]
approval = "ipc"
approval_timeout_secs = 30

[agents.claude]
command = ["claude", "GLOBAL"]
"#,
    )
    .unwrap();

    fs::write(
      &explicit,
      r#"
log_level = "debug"
default_agent = "echo"
[store]
cleanup_max_age_hours = 1
[automation]
approval_timeout_secs = 5

[agents.echo]
command = ["echo", "$CONDUCTOR_PROMPT"]
"#,
    )
    .unwrap();

    let cfg = load_from_paths(Some(&global), Some(&explicit)).unwrap();
    assert_eq!(cfg.log_level, LogLevel::Debug);
    assert_eq!(cfg.max_concurrency, 5);
    assert_eq!(cfg.task_timeout_secs, 60);
    assert_eq!(cfg.default_agent.as_deref(), Some("echo"));
    assert_eq!(cfg.store.cleanup_max_age_hours, 1);
    assert_eq!(cfg.automation.approval, ApprovalMode::Ipc);
    assert_eq!(cfg.automation.approval_timeout_secs, 5);
    assert!(cfg.automation.enabled);
    assert_eq!(
      cfg.agents.get("claude").unwrap().command,
      vec!["claude".to_string(), "GLOBAL".to_string()]
    );
    assert!(cfg.agents.contains_key("shell"));
  }

  #[test]
  fn missing_default_agent_definition_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let explicit = td.path().join("c.toml");
    fs::write(&explicit, "default_agent = \"codex\"\n").unwrap();

    let err = load_from_paths(None, Some(&explicit)).unwrap_err();
    match err {
      ConfigError::MissingAgentDefinition { agent } => assert_eq!(agent, "codex"),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn empty_command_is_invalid() {
    let td = tempfile::tempdir().unwrap();
    let explicit = td.path().join("c.toml");
    fs::write(&explicit, "[agents.shell]\ncommand = []\n").unwrap();

    let err = load_from_paths(None, Some(&explicit)).unwrap_err();
    match err {
      ConfigError::InvalidAgentDefinition { agent } => assert_eq!(agent, "shell"),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn zero_concurrency_is_invalid() {
    let td = tempfile::tempdir().unwrap();
    let explicit = td.path().join("c.toml");
    fs::write(&explicit, "max_concurrency = 0\n").unwrap();
    assert!(matches!(
      load_from_paths(None, Some(&explicit)),
      Err(ConfigError::InvalidConcurrency)
    ));
  }

  #[test]
  fn missing_explicit_file_is_an_error() {
    let td = tempfile::tempdir().unwrap();
    let err = load_from_paths(None, Some(&td.path().join("nope.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
  }

  #[test]
  fn socket_env_overrides() {
    let td = tempfile::tempdir().unwrap();
    let p = td.path().join("sock");
    let got = paths::resolve_socket_path_for(Some(p.clone())).unwrap();
    assert_eq!(got, p);
  }

  #[test]
  fn socket_platform_fallback() {
    let got = paths::resolve_socket_path_for(None).unwrap();
    let expected = if let Some(r) = dirs::runtime_dir() {
      r.join("conductor").join("conductor.sock")
    } else if let Some(d) = dirs::data_dir() {
      d.join("conductor").join("conductor.sock")
    } else {
      panic!("No runtime_dir() or data_dir() available on this platform for test");
    };
    assert_eq!(got, expected);
  }
}
