use std::env;
use std::path::PathBuf;

use dirs::data_dir;
use dirs::runtime_dir;

use super::types::{ConfigError, Result};

/// Location of the global config file (~/.config/conductor/config.toml)
pub fn global_config_path() -> Option<PathBuf> {
  dirs::config_dir().map(|p| p.join("conductor").join("config.toml"))
}

/// Resolve the socket path using CONDUCTOR_SOCKET or platform defaults.
pub fn resolve_socket_path() -> Result<PathBuf> {
  resolve_socket_path_for(env::var_os("CONDUCTOR_SOCKET").map(PathBuf::from))
}

pub(crate) fn resolve_socket_path_for(env_socket: Option<PathBuf>) -> Result<PathBuf> {
  if let Some(val) = env_socket {
    return Ok(val);
  }
  // Prefer runtime_dir for ephemeral sockets; fall back to data_dir
  if let Some(dir) = runtime_dir().or(data_dir()) {
    return Ok(dir.join("conductor").join("conductor.sock"));
  }
  Err(ConfigError::UnsupportedPlatform)
}

/// Resolve the directory holding the task file, rules, logs and lock file.
pub fn resolve_data_dir() -> Result<PathBuf> {
  if let Some(val) = env::var_os("CONDUCTOR_DATA_DIR") {
    return Ok(PathBuf::from(val));
  }
  data_dir()
    .map(|d| d.join("conductor"))
    .ok_or(ConfigError::UnsupportedPlatform)
}
