//! Trigger/condition/action rules evaluated against routed events.
//!
//! Matching happens under the engine lock; approval waits and action
//! execution happen after it is released. A rule's cooldown starts the moment
//! it matches, before any approval decision.

pub mod rules;
pub mod template;

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::future::Future;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::event::Event;
use crate::domain::rule::{Action, Rule};
use crate::domain::task::TaskId;
use crate::events::{EventHandler, EventRouter};
use crate::supervisor::{SubmitOptions, TaskSubmitter};

pub use rules::{CompiledRule, RuleError, lookup};
pub use template::{interpolate, interpolate_value};

const LOG_CAP: usize = 500;

pub type ApprovalFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Decides whether a rule flagged `requiresApproval` may run for an event.
pub type Approver = Arc<dyn Fn(Rule, Event) -> ApprovalFuture + Send + Sync>;

#[derive(Debug, Error)]
pub enum AutomationError {
  #[error("io: {0}")]
  Io(#[from] io::Error),
  #[error("rules file: {0}")]
  Parse(#[from] serde_yaml::Error),
  #[error("rules file must contain a list of rules or a `rules:` list")]
  Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
  Executed,
  SkippedNoApprover,
  Denied,
  Failed,
  UnknownActionType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
  pub rule_id: String,
  pub event_type: String,
  pub event_source: String,
  pub action: String,
  pub outcome: ExecutionOutcome,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub task_id: Option<TaskId>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub detail: Option<String>,
  pub timestamp: DateTime<Utc>,
}

/// Handed to whatever delivers notifications and webhooks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutomationSignal {
  #[serde(rename_all = "camelCase")]
  Notify {
    rule_id: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    event: Event,
  },
  #[serde(rename_all = "camelCase")]
  Webhook {
    rule_id: String,
    url: String,
    payload: Value,
  },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
  pub loaded: usize,
  pub rejected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSummary {
  pub id: String,
  pub enabled: bool,
  pub trigger: crate::domain::rule::Trigger,
  pub conditions: usize,
  pub action: String,
  pub cooldown_ms: u64,
  pub requires_approval: bool,
  pub last_fired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatus {
  pub enabled: bool,
  pub rule_count: usize,
  pub enabled_rules: usize,
  pub has_approver: bool,
  pub log_entries: usize,
  pub rules: Vec<RuleSummary>,
}

struct RuleSlot {
  compiled: Arc<CompiledRule>,
  enabled: bool,
  last_fired: Option<Instant>,
  last_fired_at: Option<DateTime<Utc>>,
}

impl RuleSlot {
  fn cooling_down(&self, now: Instant) -> bool {
    let cooldown = Duration::from_millis(self.compiled.rule.cooldown_ms);
    match self.last_fired {
      Some(at) if !cooldown.is_zero() => now.duration_since(at) < cooldown,
      _ => false,
    }
  }
}

struct EngineState {
  enabled: bool,
  rules: Vec<RuleSlot>,
  log: VecDeque<ExecutionRecord>,
}

struct EngineInner {
  submitter: Arc<dyn TaskSubmitter>,
  approver: Mutex<Option<Approver>>,
  state: Mutex<EngineState>,
  signals: broadcast::Sender<AutomationSignal>,
}

#[derive(Clone)]
pub struct AutomationEngine {
  inner: Arc<EngineInner>,
}

impl AutomationEngine {
  pub fn new(submitter: Arc<dyn TaskSubmitter>, enabled: bool) -> Self {
    let (signals, _) = broadcast::channel(64);
    Self {
      inner: Arc::new(EngineInner {
        submitter,
        approver: Mutex::new(None),
        state: Mutex::new(EngineState {
          enabled,
          rules: Vec::new(),
          log: VecDeque::new(),
        }),
        signals,
      }),
    }
  }

  pub fn set_approver(&self, approver: Option<Approver>) {
    *self.inner.approver.lock() = approver;
  }

  /// Validate `raw` and replace the active rule set. Invalid or duplicate entries are dropped.
  pub fn load_rules(&self, raw: Vec<Value>) -> LoadReport {
    let mut report = LoadReport::default();
    let mut seen = HashSet::new();
    let mut slots = Vec::new();
    for (index, value) in raw.into_iter().enumerate() {
      let compiled = CompiledRule::compile(index, value).and_then(|c| {
        if seen.insert(c.id().to_string()) {
          Ok(c)
        } else {
          Err(RuleError::DuplicateId(c.id().to_string()))
        }
      });
      match compiled {
        Ok(compiled) => slots.push(RuleSlot {
          enabled: compiled.rule.enabled,
          compiled: Arc::new(compiled),
          last_fired: None,
          last_fired_at: None,
        }),
        Err(err) => {
          warn!(event = "automation_rule_rejected", error = %err, "dropping invalid rule");
          report.rejected.push(err.to_string());
        }
      }
    }
    report.loaded = slots.len();
    self.inner.state.lock().rules = slots;
    info!(event = "automation_rules_loaded", loaded = report.loaded, rejected = report.rejected.len());
    report
  }

  /// Load rules from a YAML or JSON file. A missing file clears the rule set.
  pub fn load_rules_file(&self, path: &Path) -> Result<LoadReport, AutomationError> {
    let text = match fs::read_to_string(path) {
      Ok(text) => text,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(event = "automation_no_rules_file", path = %path.display());
        return Ok(self.load_rules(Vec::new()));
      }
      Err(e) => return Err(e.into()),
    };
    Ok(self.load_rules(parse_rules(&text)?))
  }

  /// Evaluate every enabled rule against `event` and run the actions of those that match.
  pub async fn process_event(&self, event: &Event) -> Vec<ExecutionRecord> {
    let context = event.to_value();
    let matched: Vec<Arc<CompiledRule>> = {
      let mut state = self.inner.state.lock();
      if !state.enabled {
        return Vec::new();
      }
      let now = Instant::now();
      state
        .rules
        .iter_mut()
        .filter(|slot| slot.enabled && !slot.cooling_down(now))
        .filter(|slot| slot.compiled.matches(event, &context))
        .map(|slot| {
          slot.last_fired = Some(now);
          slot.last_fired_at = Some(Utc::now());
          slot.compiled.clone()
        })
        .collect()
    };

    let mut records = Vec::with_capacity(matched.len());
    for compiled in matched {
      debug!(event = "automation_rule_matched", rule = compiled.id(), kind = %event.kind);
      let record = self.run_rule(&compiled.rule, event, &context).await;
      self.record(record.clone());
      records.push(record);
    }
    records
  }

  async fn run_rule(&self, rule: &Rule, event: &Event, context: &Value) -> ExecutionRecord {
    if rule.requires_approval {
      let approver = self.inner.approver.lock().clone();
      let Some(approver) = approver else {
        return outcome_record(rule, event, ExecutionOutcome::SkippedNoApprover, None, None);
      };
      if !approver(rule.clone(), event.clone()).await {
        return outcome_record(rule, event, ExecutionOutcome::Denied, None, None);
      }
    }

    match &rule.action {
      Action::Agent(action) => {
        let mut metadata = Map::new();
        metadata.insert("ruleId".into(), json!(rule.id));
        metadata.insert("eventType".into(), json!(event.kind));
        let options = SubmitOptions {
          agent: action.agent.clone(),
          priority: action.priority,
          metadata,
        };
        let prompt = interpolate(&action.prompt, context);
        match self.inner.submitter.submit_task(prompt, options) {
          Ok(task) => outcome_record(rule, event, ExecutionOutcome::Executed, Some(task.id), None),
          Err(err) => outcome_record(rule, event, ExecutionOutcome::Failed, None, Some(err.to_string())),
        }
      }
      Action::Notify(action) => {
        self.signal(AutomationSignal::Notify {
          rule_id: rule.id.clone(),
          message: interpolate(&action.message, context),
          channel: action.channel.clone(),
          event: event.clone(),
        });
        outcome_record(rule, event, ExecutionOutcome::Executed, None, None)
      }
      Action::Webhook(action) => {
        let payload = match &action.payload {
          Some(body) => interpolate_value(body, context),
          None => context.clone(),
        };
        self.signal(AutomationSignal::Webhook {
          rule_id: rule.id.clone(),
          url: action.url.clone(),
          payload,
        });
        outcome_record(rule, event, ExecutionOutcome::Executed, None, None)
      }
      Action::Unknown { kind } => outcome_record(
        rule,
        event,
        ExecutionOutcome::UnknownActionType,
        None,
        Some(kind.clone()),
      ),
    }
  }

  fn signal(&self, signal: AutomationSignal) {
    // No receiver simply means nobody is delivering notifications
    let _ = self.inner.signals.send(signal);
  }

  fn record(&self, record: ExecutionRecord) {
    match record.outcome {
      ExecutionOutcome::Executed => {
        info!(event = "automation_executed", rule = %record.rule_id, action = %record.action, task_id = ?record.task_id)
      }
      outcome => {
        warn!(event = "automation_not_executed", rule = %record.rule_id, outcome = ?outcome, detail = ?record.detail)
      }
    }
    let mut state = self.inner.state.lock();
    if state.log.len() >= LOG_CAP {
      state.log.pop_front();
    }
    state.log.push_back(record);
  }

  /// Most recent `limit` records, oldest first.
  pub fn execution_log(&self, limit: Option<usize>) -> Vec<ExecutionRecord> {
    let state = self.inner.state.lock();
    let skip = limit.map_or(0, |l| state.log.len().saturating_sub(l));
    state.log.iter().skip(skip).cloned().collect()
  }

  pub fn status(&self) -> AutomationStatus {
    let has_approver = self.inner.approver.lock().is_some();
    let state = self.inner.state.lock();
    let rules: Vec<RuleSummary> = state
      .rules
      .iter()
      .map(|slot| {
        let rule = &slot.compiled.rule;
        RuleSummary {
          id: rule.id.clone(),
          enabled: slot.enabled,
          trigger: rule.trigger.clone(),
          conditions: rule.conditions.len(),
          action: rule.action.kind().to_string(),
          cooldown_ms: rule.cooldown_ms,
          requires_approval: rule.requires_approval,
          last_fired_at: slot.last_fired_at,
        }
      })
      .collect();
    AutomationStatus {
      enabled: state.enabled,
      rule_count: rules.len(),
      enabled_rules: rules.iter().filter(|r| r.enabled).count(),
      has_approver,
      log_entries: state.log.len(),
      rules,
    }
  }

  pub fn is_enabled(&self) -> bool {
    self.inner.state.lock().enabled
  }

  pub fn set_enabled(&self, enabled: bool) {
    info!(event = "automation_toggled", enabled);
    self.inner.state.lock().enabled = enabled;
  }

  /// Returns false when no rule has that id.
  pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
    let mut state = self.inner.state.lock();
    match state.rules.iter_mut().find(|s| s.compiled.id() == rule_id) {
      Some(slot) => {
        slot.enabled = enabled;
        info!(event = "automation_rule_toggled", rule = rule_id, enabled);
        true
      }
      None => false,
    }
  }

  pub fn subscribe_signals(&self) -> broadcast::Receiver<AutomationSignal> {
    self.inner.signals.subscribe()
  }

  /// Feed every routed event into this engine.
  pub fn attach(&self, router: &EventRouter) {
    router.subscribe(Arc::new(AutomationSubscriber {
      engine: self.clone(),
    }));
  }
}

fn outcome_record(
  rule: &Rule,
  event: &Event,
  outcome: ExecutionOutcome,
  task_id: Option<TaskId>,
  detail: Option<String>,
) -> ExecutionRecord {
  ExecutionRecord {
    rule_id: rule.id.clone(),
    event_type: event.kind.clone(),
    event_source: event.source.clone(),
    action: rule.action.kind().to_string(),
    outcome,
    task_id,
    detail,
    timestamp: Utc::now(),
  }
}

/// Accepts a top-level list or a mapping with a `rules` list. YAML is a superset of JSON.
pub fn parse_rules(text: &str) -> Result<Vec<Value>, AutomationError> {
  if text.trim().is_empty() {
    return Ok(Vec::new());
  }
  let doc: Value = serde_yaml::from_str(text)?;
  match doc {
    Value::Array(items) => Ok(items),
    Value::Object(mut map) => match map.remove("rules") {
      Some(Value::Array(items)) => Ok(items),
      _ => Err(AutomationError::Format),
    },
    Value::Null => Ok(Vec::new()),
    _ => Err(AutomationError::Format),
  }
}

/// Router subscriber that evaluates rules off the dispatcher task, so slow
/// approvals never hold up event delivery.
struct AutomationSubscriber {
  engine: AutomationEngine,
}

impl EventHandler for AutomationSubscriber {
  fn name(&self) -> &str {
    "automation"
  }

  fn handle(&self, event: &Event) -> anyhow::Result<()> {
    let engine = self.engine.clone();
    let event = event.clone();
    tokio::spawn(async move {
      engine.process_event(&event).await;
    });
    Ok(())
  }
}
