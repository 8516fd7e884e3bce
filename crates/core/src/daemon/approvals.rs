//! Approval requests answered by IPC clients.
//!
//! Each request is broadcast as `automation.approval_requested` and parked
//! until `automation.approve` resolves it or the timeout denies it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::automation::{ApprovalFuture, Approver};
use crate::domain::event::Event;
use crate::domain::rule::Rule;
use crate::rpc::ApprovalRequest;

/// Delivers a request to whoever can answer it.
pub type Announcer = Arc<dyn Fn(&ApprovalRequest) + Send + Sync>;

pub struct ApprovalBroker {
  pending: Mutex<HashMap<Uuid, oneshot::Sender<bool>>>,
  timeout: Duration,
  announce: Announcer,
}

impl ApprovalBroker {
  pub fn new(timeout: Duration, announce: Announcer) -> Arc<Self> {
    Arc::new(Self {
      pending: Mutex::new(HashMap::new()),
      timeout,
      announce,
    })
  }

  /// An approver for the automation engine backed by this broker.
  pub fn approver(self: &Arc<Self>) -> Approver {
    let broker = self.clone();
    Arc::new(move |rule: Rule, event: Event| -> ApprovalFuture {
      let broker = broker.clone();
      Box::pin(async move { broker.request(rule, event).await })
    })
  }

  async fn request(&self, rule: Rule, event: Event) -> bool {
    let id = Uuid::new_v4();
    let (tx, rx) = oneshot::channel();
    self.pending.lock().insert(id, tx);
    let request = ApprovalRequest {
      request_id: id.to_string(),
      rule_id: rule.id.clone(),
      event,
    };
    info!(event = "approval_requested", request_id = %id, rule = %rule.id);
    (self.announce)(&request);

    match tokio::time::timeout(self.timeout, rx).await {
      Ok(Ok(approved)) => approved,
      Ok(Err(_)) => false,
      Err(_) => {
        self.pending.lock().remove(&id);
        warn!(event = "approval_timed_out", request_id = %id, rule = %rule.id, "approval request timed out; denying");
        false
      }
    }
  }

  /// Returns false if the id is unknown, malformed or already decided.
  pub fn resolve(&self, request_id: &str, approved: bool) -> bool {
    let Ok(id) = Uuid::parse_str(request_id) else {
      return false;
    };
    let waiter = self.pending.lock().remove(&id);
    match waiter {
      Some(tx) => {
        info!(event = "approval_resolved", request_id = %id, approved);
        tx.send(approved).is_ok()
      }
      None => false,
    }
  }

  pub fn pending_count(&self) -> usize {
    self.pending.lock().len()
  }
}

/// Announcer that hands the request to a notification sink as JSON.
pub fn json_announcer<F>(sink: F) -> Announcer
where
  F: Fn(Value) + Send + Sync + 'static,
{
  Arc::new(move |request: &ApprovalRequest| match serde_json::to_value(request) {
    Ok(value) => sink(value),
    Err(e) => warn!(event = "approval_encode_failed", error = %e),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn rule() -> Rule {
    serde_json::from_value(json!({
      "id": "gate", "trigger": {}, "action": { "type": "notify", "message": "m" }
    }))
    .unwrap()
  }

  fn capture() -> (Announcer, Arc<Mutex<Vec<ApprovalRequest>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let announce: Announcer = Arc::new(move |r: &ApprovalRequest| sink.lock().push(r.clone()));
    (announce, seen)
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn resolves_with_client_decision() {
    let (announce, seen) = capture();
    let broker = ApprovalBroker::new(Duration::from_secs(5), announce);
    let approver = broker.approver();
    let decision = tokio::spawn(approver(rule(), Event::new("s", "t", json!({}))));

    let request_id = loop {
      if let Some(r) = seen.lock().first() {
        break r.request_id.clone();
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert_eq!(seen.lock()[0].rule_id, "gate");
    assert!(broker.resolve(&request_id, true));
    assert!(decision.await.unwrap());
    assert!(!broker.resolve(&request_id, false));
    assert_eq!(broker.pending_count(), 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn unanswered_request_is_denied() {
    let (announce, _) = capture();
    let broker = ApprovalBroker::new(Duration::from_millis(20), announce);
    let approved = broker.approver()(rule(), Event::new("s", "t", json!({}))).await;
    assert!(!approved);
    assert_eq!(broker.pending_count(), 0);
  }

  #[test]
  fn malformed_ids_are_rejected() {
    let (announce, _) = capture();
    let broker = ApprovalBroker::new(Duration::from_secs(1), announce);
    assert!(!broker.resolve("not-a-uuid", true));
  }
}
