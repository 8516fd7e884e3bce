use std::sync::Arc;

use tracing::{info, warn};

use crate::rpc::protocol::{HandlerError, parse_params};
use crate::rpc::server::IpcServer;
use crate::rpc::{
  ApproveParams, ApproveResult, LimitParams, RuleToggleParams, ToggleResult, methods,
};

use super::super::DaemonState;
use super::{method, to_value};

/// Register the automation.* family.
pub fn register(server: &IpcServer, state: &Arc<DaemonState>) {
  // ---- automation.status ----
  method(server, state, methods::AUTOMATION_STATUS, |state, _params| async move {
    to_value(&state.automation.status())
  });

  // ---- automation.enable / automation.disable ----
  for (name, enabled) in [
    (methods::AUTOMATION_ENABLE, true),
    (methods::AUTOMATION_DISABLE, false),
  ] {
    method(server, state, name, move |state, params| async move {
      let p: RuleToggleParams = parse_params(params)?;
      match p.rule_id {
        Some(rule_id) => {
          if !state.automation.set_rule_enabled(&rule_id, enabled) {
            return Err(HandlerError::invalid_params(format!("unknown rule `{rule_id}`")));
          }
          to_value(&ToggleResult {
            enabled,
            rule_id: Some(rule_id),
          })
        }
        None => {
          state.automation.set_enabled(enabled);
          to_value(&ToggleResult {
            enabled,
            rule_id: None,
          })
        }
      }
    });
  }

  // ---- automation.log ----
  method(server, state, methods::AUTOMATION_LOG, |state, params| async move {
    let p: LimitParams = parse_params(params)?;
    to_value(&state.automation.execution_log(p.limit))
  });

  // ---- automation.reload ----
  method(server, state, methods::AUTOMATION_RELOAD, |state, _params| async move {
    match state.reload_rules() {
      Ok(report) => {
        info!(event = "automation_reloaded", loaded = report.loaded, rejected = report.rejected.len());
        to_value(&report)
      }
      Err(e) => {
        warn!(event = "automation_reload_failed", path = %state.rules_path.display(), error = %e);
        Err(HandlerError::internal(e))
      }
    }
  });

  // ---- automation.approve ----
  method(server, state, methods::AUTOMATION_APPROVE, |state, params| async move {
    let p: ApproveParams = parse_params(params)?;
    let resolved = match &state.approvals {
      Some(broker) => broker.resolve(&p.request_id, p.approved),
      None => false,
    };
    to_value(&ApproveResult { resolved })
  });
}
