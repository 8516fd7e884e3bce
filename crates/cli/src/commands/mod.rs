pub mod automation;
pub mod daemon;
pub mod events;
pub mod tasks;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use conductor_core::rpc::IpcClient;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::util::daemon_proc::resolve_socket;
use crate::util::errors::render_client_failure;

/// Settings shared by every command.
pub struct Ctx {
  pub socket: PathBuf,
  pub config: Option<PathBuf>,
  pub json: bool,
}

impl Ctx {
  pub fn new(socket: Option<PathBuf>, config: Option<PathBuf>, json: bool) -> Result<Self> {
    let socket = match socket {
      Some(path) => path,
      None => resolve_socket()?,
    };
    Ok(Self { socket, config, json })
  }

  pub async fn connect(&self, action: &str) -> Result<IpcClient> {
    IpcClient::connect(&self.socket)
      .await
      .map_err(|e| anyhow!(render_client_failure(action, &self.socket, &e)))
  }

  /// One request on a fresh connection; the raw JSON result.
  pub async fn request(&self, action: &str, method: &str, params: Value) -> Result<Value> {
    let client = self.connect(action).await?;
    client
      .call::<Value>(method, params)
      .await
      .map_err(|e| anyhow!(render_client_failure(action, &self.socket, &e)))
  }
}

pub fn typed<T: DeserializeOwned>(value: Value) -> Result<T> {
  Ok(serde_json::from_value(value)?)
}

pub fn print_json(out: &mut (dyn Write + Send), value: &Value) -> Result<()> {
  writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
  Ok(())
}
