//! Rule validation and matching against events.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::domain::event::Event;
use crate::domain::rule::{Operator, Rule};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
  #[error("rule #{index}: missing `{field}`")]
  MissingField { index: usize, field: &'static str },
  #[error("rule `{id}`: {reason}")]
  Invalid { id: String, reason: String },
  #[error("rule `{id}`: invalid regex `{pattern}`: {reason}")]
  BadRegex {
    id: String,
    pattern: String,
    reason: String,
  },
  #[error("rule `{0}` is defined more than once")]
  DuplicateId(String),
}

/// A validated rule with its regexes compiled once.
#[derive(Debug, Clone)]
pub struct CompiledRule {
  pub rule: Rule,
  pattern: Option<Regex>,
  /// Parallel to `rule.conditions`; set for `matches` conditions.
  condition_regexes: Vec<Option<Regex>>,
}

impl CompiledRule {
  pub fn compile(index: usize, raw: Value) -> Result<Self, RuleError> {
    let id = match raw.get("id") {
      Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
      _ => return Err(RuleError::MissingField { index, field: "id" }),
    };
    for field in ["trigger", "action"] {
      if !raw.get(field).is_some_and(Value::is_object) {
        return Err(RuleError::MissingField { index, field });
      }
    }
    let rule: Rule = serde_json::from_value(raw).map_err(|e| RuleError::Invalid {
      id: id.clone(),
      reason: e.to_string(),
    })?;

    let pattern = rule
      .trigger
      .pattern
      .as_deref()
      .map(|p| compile_regex(&id, p))
      .transpose()?;
    let condition_regexes = rule
      .conditions
      .iter()
      .map(|c| match (c.operator, &c.value) {
        (Operator::Matches, Value::String(p)) => compile_regex(&id, p).map(Some),
        (Operator::Matches, _) => Err(RuleError::Invalid {
          id: id.clone(),
          reason: format!("`matches` on `{}` needs a string pattern", c.field),
        }),
        _ => Ok(None),
      })
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Self {
      rule,
      pattern,
      condition_regexes,
    })
  }

  pub fn id(&self) -> &str {
    &self.rule.id
  }

  /// Every specified trigger clause must hold.
  pub fn trigger_matches(&self, event: &Event) -> bool {
    let trigger = &self.rule.trigger;
    if trigger.kind.as_deref().is_some_and(|k| k != event.kind) {
      return false;
    }
    if trigger.source.as_deref().is_some_and(|s| s != event.source) {
      return false;
    }
    match &self.pattern {
      Some(re) => re.is_match(&format!("{}:{}", event.kind, event.source)),
      None => true,
    }
  }

  /// `context` is the event rendered as JSON.
  pub fn conditions_hold(&self, context: &Value) -> bool {
    self
      .rule
      .conditions
      .iter()
      .zip(&self.condition_regexes)
      .all(|(c, re)| evaluate(c.operator, lookup(context, &c.field), &c.value, re.as_ref()))
  }

  pub fn matches(&self, event: &Event, context: &Value) -> bool {
    self.trigger_matches(event) && self.conditions_hold(context)
  }
}

fn compile_regex(id: &str, pattern: &str) -> Result<Regex, RuleError> {
  Regex::new(pattern).map_err(|e| RuleError::BadRegex {
    id: id.to_string(),
    pattern: pattern.to_string(),
    reason: e.to_string(),
  })
}

/// Follow a dot path (`payload.files.0.name`) through objects and arrays.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
  path.split('.').try_fold(value, |current, segment| match current {
    Value::Object(map) => map.get(segment),
    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
    _ => None,
  })
}

fn evaluate(op: Operator, actual: Option<&Value>, expected: &Value, re: Option<&Regex>) -> bool {
  let present = actual.filter(|v| !v.is_null());
  match op {
    Operator::Exists => present.is_some(),
    Operator::NotExists => present.is_none(),
    Operator::Eq => actual.is_some_and(|a| loosely_equal(a, expected)),
    Operator::Neq => !actual.is_some_and(|a| loosely_equal(a, expected)),
    Operator::Contains => match (present, expected) {
      (Some(Value::String(hay)), Value::String(needle)) => hay.contains(needle.as_str()),
      (Some(Value::Array(items)), needle) => items.iter().any(|i| loosely_equal(i, needle)),
      _ => false,
    },
    Operator::Matches => match (present, re) {
      (Some(Value::String(s)), Some(re)) => re.is_match(s),
      _ => false,
    },
    Operator::Gt => compare(present, expected) == Some(Ordering::Greater),
    Operator::Lt => compare(present, expected) == Some(Ordering::Less),
    Operator::Gte => matches!(compare(present, expected), Some(Ordering::Greater | Ordering::Equal)),
    Operator::Lte => matches!(compare(present, expected), Some(Ordering::Less | Ordering::Equal)),
  }
}

/// Numbers compare by value so `1` equals `1.0`.
fn loosely_equal(a: &Value, b: &Value) -> bool {
  match (a.as_f64(), b.as_f64()) {
    (Some(x), Some(y)) => x == y,
    _ => a == b,
  }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
  match (actual?, expected) {
    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
    (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
  }
}
