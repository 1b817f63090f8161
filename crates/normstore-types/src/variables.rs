use std::collections::BTreeMap;

use serde_json::Value;

/// Bound operation variables. Ordered, so serialization is stable.
pub type Variables = BTreeMap<String, Value>;

/// Serialize a JSON value with object keys in sorted order.
///
/// `serde_json` maps are ordered by key unless `preserve_order` is enabled,
/// which this workspace never does, so plain serialization is already stable.
pub fn stable_json(value: &Value) -> String {
    value.to_string()
}

/// Storage key of a field given its resolved argument values.
///
/// `name` alone when there are no non-null arguments, else
/// `name(arg:json,...)` with arguments in name order. Null arguments are
/// dropped, so `friends(first: null)` shares storage with `friends`.
pub fn format_storage_key(name: &str, args: &BTreeMap<String, Value>) -> String {
    let parts: Vec<String> = args
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| format!("{k}:{}", stable_json(v)))
        .collect();
    if parts.is_empty() {
        name.to_string()
    } else {
        format!("{name}({})", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn no_arguments() {
        assert_eq!(format_storage_key("name", &BTreeMap::new()), "name");
    }

    #[test]
    fn arguments_are_sorted_and_json_encoded() {
        let key = format_storage_key(
            "friends",
            &args(&[("orderby", json!(["name"])), ("first", json!(10))]),
        );
        assert_eq!(key, r#"friends(first:10,orderby:["name"])"#);
    }

    #[test]
    fn null_arguments_are_dropped() {
        let key = format_storage_key("friends", &args(&[("first", Value::Null)]));
        assert_eq!(key, "friends");
    }

    #[test]
    fn stable_json_sorts_object_keys() {
        assert_eq!(stable_json(&json!({"b": 1, "a": 2})), r#"{"a":2,"b":1}"#);
    }
}
