pub mod runner;

pub use runner::{AgentCommand, AgentRunnerError, build_env, resolve_command, substitute_tokens};
