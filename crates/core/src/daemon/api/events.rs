use std::sync::Arc;

use tracing::debug;

use crate::domain::event::Event;
use crate::rpc::protocol::{HandlerError, parse_params};
use crate::rpc::server::IpcServer;
use crate::rpc::{LimitParams, PublishParams, PublishResult, methods};

use super::super::DaemonState;
use super::{method, to_value};

/// Register events.publish, events.history and events.dead_letters.
pub fn register(server: &IpcServer, state: &Arc<DaemonState>) {
  // ---- events.publish ----
  method(server, state, methods::EVENTS_PUBLISH, |state, params| async move {
    let p: PublishParams = parse_params(params)?;
    if p.source.is_empty() || p.kind.is_empty() {
      return Err(HandlerError::invalid_params("source and type must not be empty"));
    }
    debug!(event = "event_published_rpc", source = %p.source, kind = %p.kind);
    let accepted = state.router.try_publish(Event::new(p.source, p.kind, p.payload));
    to_value(&PublishResult { accepted })
  });

  // ---- events.history ----
  method(server, state, methods::EVENTS_HISTORY, |state, params| async move {
    let p: LimitParams = parse_params(params)?;
    to_value(&state.router.history(p.limit))
  });

  // ---- events.dead_letters ----
  method(server, state, methods::EVENTS_DEAD_LETTERS, |state, _params| async move {
    to_value(&state.router.dead_letters())
  });
}
