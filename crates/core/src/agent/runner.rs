use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::Config;
use crate::domain::task::TaskId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentRunnerError {
  #[error("agent `{0}` is not configured")]
  MissingAgent(String),
  #[error("no agent given and no default_agent configured")]
  NoAgent,
  #[error("agent `{0}` command must not be empty")]
  EmptyCommand(String),
}

pub type RunnerResult<T> = Result<T, AgentRunnerError>;

/// A fully resolved process invocation for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
  pub agent: String,
  pub program: String,
  pub args: Vec<String>,
  pub env: Vec<(String, String)>,
}

pub fn build_env(task_id: TaskId, agent: &str, prompt: &str) -> BTreeMap<String, String> {
  let mut env = BTreeMap::new();
  env.insert("CONDUCTOR_TASK_ID".to_string(), task_id.0.to_string());
  env.insert("CONDUCTOR_AGENT".to_string(), agent.to_string());
  env.insert("CONDUCTOR_PROMPT".to_string(), prompt.to_string());
  env
}

pub fn substitute_tokens(args: &[String], env: &BTreeMap<String, String>) -> Vec<String> {
  args
    .iter()
    .map(|arg| {
      let mut substituted = arg.clone();
      for (env_key, env_value) in env {
        let token = format!("${env_key}");
        if substituted.contains(&token) {
          substituted = substituted.replace(&token, env_value);
        }
      }
      substituted
    })
    .collect()
}

/// Resolve the program, arguments and environment used to run `prompt`.
/// `agent` falls back to the configured `default_agent`.
pub fn resolve_command(
  config: &Config,
  agent: Option<&str>,
  task_id: TaskId,
  prompt: &str,
) -> RunnerResult<AgentCommand> {
  let key = agent
    .or(config.default_agent.as_deref())
    .ok_or(AgentRunnerError::NoAgent)?;
  let agent_cfg = config
    .agents
    .get(key)
    .ok_or_else(|| AgentRunnerError::MissingAgent(key.to_string()))?;
  let Some((program, base_args)) = agent_cfg.command.split_first() else {
    return Err(AgentRunnerError::EmptyCommand(key.to_string()));
  };
  let env = build_env(task_id, key, prompt);
  let args = substitute_tokens(base_args, &env);
  Ok(AgentCommand {
    agent: key.to_string(),
    program: program.clone(),
    args,
    env: env.into_iter().collect(),
  })
}
