use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use super::rules::lookup;

static PLACEHOLDER: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("placeholder regex"));

/// Replace `{{dot.path}}` placeholders with values looked up in `context`.
/// Placeholders that do not resolve are left as written.
pub fn interpolate(template: &str, context: &Value) -> String {
  PLACEHOLDER
    .replace_all(template, |caps: &Captures<'_>| match lookup(context, &caps[1]) {
      Some(Value::String(s)) => s.clone(),
      Some(Value::Null) | None => caps[0].to_string(),
      Some(other) => other.to_string(),
    })
    .into_owned()
}

/// Apply [`interpolate`] to every string inside `value`.
pub fn interpolate_value(value: &Value, context: &Value) -> Value {
  match value {
    Value::String(s) => Value::String(interpolate(s, context)),
    Value::Array(items) => Value::Array(items.iter().map(|v| interpolate_value(v, context)).collect()),
    Value::Object(map) => Value::Object(
      map
        .iter()
        .map(|(k, v)| (k.clone(), interpolate_value(v, context)))
        .collect(),
    ),
    other => other.clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn substitutes_nested_fields() {
    let ctx = json!({ "type": "file.modify", "payload": { "path": "src/a.ts", "size": 12 } });
    assert_eq!(
      interpolate("review {{payload.path}} ({{ payload.size }} bytes, {{type}})", &ctx),
      "review src/a.ts (12 bytes, file.modify)"
    );
  }

  #[test]
  fn unresolved_placeholders_are_kept() {
    let ctx = json!({ "payload": { "path": null } });
    assert_eq!(
      interpolate("{{payload.missing}} and {{payload.path}}", &ctx),
      "{{payload.missing}} and {{payload.path}}"
    );
  }

  #[test]
  fn interpolates_nested_json() {
    let ctx = json!({ "payload": { "path": "a.ts" } });
    let body = json!({ "text": "changed {{payload.path}}", "n": 1, "list": ["{{payload.path}}"] });
    assert_eq!(
      interpolate_value(&body, &ctx),
      json!({ "text": "changed a.ts", "n": 1, "list": ["a.ts"] })
    );
  }

  #[test]
  fn objects_render_as_json() {
    let ctx = json!({ "payload": { "tags": ["a", "b"] } });
    assert_eq!(interpolate("tags={{payload.tags}}", &ctx), r#"tags=["a","b"]"#);
  }
}
