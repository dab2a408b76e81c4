//! `{{path.to.value}}` substitution into step configuration.
//!
//! String config fields may embed interpolation tokens resolved by dotted-path
//! lookup against the execution scope. Missing paths resolve to the empty
//! string -- never an error. Non-scalar values substitute as pretty-printed
//! JSON. Resolution recurses into nested objects and arrays, not only
//! top-level strings.

use serde_json::Value;

/// Resolve all interpolation tokens in `value` against `scope`, recursing
/// into nested objects and arrays.
pub fn interpolate_value(value: &Value, scope: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_str(s, scope)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_value(item, scope))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve `{{path}}` tokens in a single string.
pub fn interpolate_str(template: &str, scope: &Value) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let path = after_open[..end].trim();
                result.push_str(&render(lookup_path(scope, path)));
                rest = &after_open[end + 2..];
            }
            None => {
                // Unterminated token: emit the remainder verbatim.
                result.push_str(&rest[start..]);
                return result;
            }
        }
    }
    result.push_str(rest);
    result
}

/// Walk a dotted path through the scope. Array segments may be numeric
/// indices. Returns `None` when any segment is missing.
pub fn lookup_path<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = scope;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a looked-up value into a string. Missing paths are empty; scalars
/// render bare; objects and arrays render as formatted JSON.
fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
