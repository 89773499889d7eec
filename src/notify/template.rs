//! Placeholder templating for notification messages and payloads.
//!
//! Value substitution only: `{name}` expands to the variable's value, a
//! missing key expands to the empty string. No expressions, no escaping.

use std::collections::BTreeMap;

use serde_json::Value;

pub type TemplateVars = BTreeMap<String, String>;

/// Render `{name}` placeholders in a string template.
pub fn render_string(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(['{', '}']) {
            // A well-formed placeholder
            Some(close) if after.as_bytes()[close] == b'}' => {
                let key = &after[..close];
                if let Some(value) = vars.get(key) {
                    out.push_str(value);
                }
                rest = &after[close + 1..];
            }
            // Nested or unterminated brace: emit literally and move on
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render a JSON template tree: leaf strings are substituted, every other
/// leaf passes through untouched.
pub fn render_value(template: &Value, vars: &TemplateVars) -> Value {
    match template {
        Value::String(s) => Value::String(render_string(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Flatten a payload object into template variables. Non-string leaves are
/// JSON-encoded; nested objects and arrays keep their JSON form.
pub fn vars_from_payload(payload: &Value) -> TemplateVars {
    let mut vars = TemplateVars::new();
    if let Value::Object(map) = payload {
        for (key, value) in map {
            vars.insert(key.clone(), coerce(value));
        }
    }
    vars
}

fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
