//! Deterministic instance names.
//!
//! An instance name is the cache key of a holder and the identifier that shows
//! up in diagnostics. It must not depend on argument order.

use serde_json::Value;

/// Builds `identity` or `identity:suffix` from validated arguments.
///
/// Object arguments render as `key=value` pairs sorted by key; nested values
/// render as compact JSON with quotes dropped and colons turned into `=`.
///
/// ```rust
/// use ferrous_locator::naming::instance_name;
/// use serde_json::json;
///
/// let a = instance_name("Db(7)", Some(&json!({ "port": 5432, "host": "db" })));
/// let b = instance_name("Db(7)", Some(&json!({ "host": "db", "port": 5432 })));
/// assert_eq!(a, "Db(7):host=db,port=5432");
/// assert_eq!(a, b);
/// assert_eq!(instance_name("Db(7)", None), "Db(7)");
/// ```
pub fn instance_name(identity: &str, args: Option<&Value>) -> String {
    match args {
        None | Some(Value::Null) => identity.to_string(),
        Some(Value::Object(map)) if map.is_empty() => identity.to_string(),
        Some(args) => format!("{}:{}", identity, args_suffix(args)),
    }
}

fn args_suffix(args: &Value) -> String {
    match args {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            entries
                .into_iter()
                .map(|(key, value)| format!("{}={}", key, render(value)))
                .collect::<Vec<_>>()
                .join(",")
        }
        other => render(other),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => normalize(s),
        other => normalize(&canonical_json(other)),
    }
}

// serde_json::Map may preserve insertion order depending on features, so sort explicitly
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonical_json(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{}}}", body)
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{}]", body)
        }
        other => other.to_string(),
    }
}

fn normalize(raw: &str) -> String {
    raw.replace('"', "").replace(':', "=")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_are_order_independent() {
        let a = instance_name("Svc(1)", Some(&json!({ "cfg": { "b": 1, "a": [1, 2] } })));
        let b = instance_name("Svc(1)", Some(&json!({ "cfg": { "a": [1, 2], "b": 1 } })));
        assert_eq!(a, b);
        assert_eq!(a, "Svc(1):cfg={a=[1,2],b=1}");
    }

    #[test]
    fn scalar_arguments_render_whole() {
        assert_eq!(instance_name("Svc(1)", Some(&json!(42))), "Svc(1):42");
        assert_eq!(instance_name("Svc(1)", Some(&json!("a:b"))), "Svc(1):a=b");
    }

    #[test]
    fn empty_arguments_are_ignored() {
        assert_eq!(instance_name("Svc(1)", Some(&json!({}))), "Svc(1)");
        assert_eq!(instance_name("Svc(1)", Some(&Value::Null)), "Svc(1)");
    }
}
