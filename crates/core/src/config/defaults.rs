use std::collections::BTreeMap;

use super::types::AgentConfig;

pub(crate) fn builtin_agents() -> BTreeMap<String, AgentConfig> {
  let mut agents = BTreeMap::new();
  agents.insert(
    "claude".to_string(),
    AgentConfig {
      display_name: Some("Claude".to_string()),
      command: vec![
        "claude".to_string(),
        "-p".to_string(),
        "$CONDUCTOR_PROMPT".to_string(),
      ],
    },
  );
  agents.insert(
    "shell".to_string(),
    AgentConfig {
      display_name: Some("Shell".to_string()),
      command: vec![
        "sh".to_string(),
        "-c".to_string(),
        "$CONDUCTOR_PROMPT".to_string(),
      ],
    },
  );
  agents
}
