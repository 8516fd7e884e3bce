use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which events a rule reacts to. Every specified clause must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Trigger {
  #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
  /// Regex over `"{type}:{source}"`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
  Eq,
  Neq,
  Contains,
  Matches,
  Gt,
  Lt,
  Gte,
  Lte,
  Exists,
  NotExists,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
  /// Dot path into the event, e.g. `payload.path`.
  pub field: String,
  pub operator: Operator,
  #[serde(default)]
  pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
  pub prompt: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub agent: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyAction {
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookAction {
  pub url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub payload: Option<Value>,
}

/// What a matching rule does. Unrecognised `type`s are kept as `Unknown`
/// so they can be reported at execution time instead of failing the load.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
  Agent(AgentAction),
  Notify(NotifyAction),
  Webhook(WebhookAction),
  Unknown { kind: String },
}

impl Action {
  pub fn kind(&self) -> &str {
    match self {
      Action::Agent(_) => "agent",
      Action::Notify(_) => "notify",
      Action::Webhook(_) => "webhook",
      Action::Unknown { kind } => kind,
    }
  }
}

impl<'de> Deserialize<'de> for Action {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let mut raw = Map::<String, Value>::deserialize(deserializer)?;
    let kind = match raw.remove("type") {
      Some(Value::String(kind)) => kind,
      Some(_) => return Err(de::Error::custom("action `type` must be a string")),
      None => return Err(de::Error::missing_field("type")),
    };
    let rest = Value::Object(raw);
    let action = match kind.as_str() {
      "agent" => Action::Agent(serde_json::from_value(rest).map_err(de::Error::custom)?),
      "notify" => Action::Notify(serde_json::from_value(rest).map_err(de::Error::custom)?),
      "webhook" => Action::Webhook(serde_json::from_value(rest).map_err(de::Error::custom)?),
      _ => Action::Unknown { kind },
    };
    Ok(action)
  }
}

fn default_enabled() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
  pub id: String,
  pub trigger: Trigger,
  #[serde(default)]
  pub conditions: Vec<Condition>,
  pub action: Action,
  #[serde(default)]
  pub cooldown_ms: u64,
  #[serde(default)]
  pub requires_approval: bool,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn parses_agent_rule_with_defaults() {
    let rule: Rule = serde_json::from_value(json!({
      "id": "ts-review",
      "trigger": { "type": "file.modify" },
      "conditions": [{ "field": "payload.path", "operator": "contains", "value": ".ts" }],
      "action": { "type": "agent", "prompt": "review {{payload.path}}" }
    }))
    .unwrap();
    assert!(rule.enabled);
    assert_eq!(rule.cooldown_ms, 0);
    assert!(!rule.requires_approval);
    assert_eq!(rule.trigger.kind.as_deref(), Some("file.modify"));
    assert_eq!(rule.conditions[0].operator, Operator::Contains);
    match rule.action {
      Action::Agent(a) => assert_eq!(a.prompt, "review {{payload.path}}"),
      other => panic!("unexpected action: {other:?}"),
    }
  }

  #[test]
  fn unknown_action_type_is_kept() {
    let action: Action = serde_json::from_value(json!({ "type": "email", "to": "x" })).unwrap();
    assert_eq!(action, Action::Unknown { kind: "email".into() });
    assert_eq!(action.kind(), "email");
  }

  #[test]
  fn known_action_with_missing_fields_is_rejected() {
    let err = serde_json::from_value::<Action>(json!({ "type": "webhook" })).unwrap_err();
    assert!(err.to_string().contains("url"), "{err}");
  }

  #[test]
  fn unknown_operator_is_rejected() {
    let err = serde_json::from_value::<Condition>(json!({
      "field": "payload.size", "operator": "between", "value": 1
    }))
    .unwrap_err();
    assert!(err.to_string().contains("between"), "{err}");
  }

  #[test]
  fn action_serializes_with_type_tag() {
    let action = Action::Notify(NotifyAction {
      message: "hi".into(),
      channel: None,
    });
    assert_eq!(
      serde_json::to_value(&action).unwrap(),
      json!({ "type": "notify", "message": "hi" })
    );
  }
}
