//! IPC method handlers. Each submodule registers one family of methods.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::rpc::protocol::{HandlerError, HandlerResult};
use crate::rpc::server::IpcServer;

use super::DaemonState;

mod automation;
mod daemon;
mod events;
mod tasks;

pub fn register(server: &IpcServer, state: &Arc<DaemonState>) {
  daemon::register(server, state);
  tasks::register(server, state);
  automation::register(server, state);
  events::register(server, state);
}

/// Register `name` with a handler that sees the daemon state. The server is
/// owned by the state, so handlers only hold a weak reference to it.
fn method<F, Fut>(server: &IpcServer, state: &Arc<DaemonState>, name: &str, handler: F)
where
  F: Fn(Arc<DaemonState>, Value) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = HandlerResult> + Send + 'static,
{
  let weak = Arc::downgrade(state);
  server.register_method(name, move |params: Value| {
    let call = weak.upgrade().map(|state| handler(state, params));
    async move {
      match call {
        Some(call) => call.await,
        None => Err(HandlerError::internal("daemon is shutting down")),
      }
    }
  });
}

fn to_value<T: serde::Serialize>(value: &T) -> HandlerResult {
  serde_json::to_value(value).map_err(HandlerError::internal)
}
