use super::types::{Config, ConfigError, Result};

pub fn validate(cfg: &Config) -> Result<()> {
  if cfg.max_concurrency == 0 {
    return Err(ConfigError::InvalidConcurrency);
  }

  for (name, agent_cfg) in &cfg.agents {
    if agent_cfg.command.is_empty() || agent_cfg.command[0].is_empty() {
      return Err(ConfigError::InvalidAgentDefinition {
        agent: name.to_string(),
      });
    }
  }

  if let Some(agent) = cfg.default_agent.as_ref()
    && !cfg.agents.contains_key(agent)
  {
    return Err(ConfigError::MissingAgentDefinition {
      agent: agent.clone(),
    });
  }

  Ok(())
}
