//! Helpers for walking the generic document tree

use serde_yaml::{Mapping, Value};

/// Human readable kind of a node, used in error messages
pub fn kind_name(node: &Value) -> &'static str {
    match node {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// Render a mapping key as a path segment. Only scalar keys are accepted.
pub fn key_str(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Render a scalar as a string (numbers and booleans included)
pub fn scalar_str(node: &Value) -> Option<String> {
    match node {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integer held by a number, or by a string as interpolation leaves it
/// (`replicas: ${REPLICAS:-2}`)
pub fn integer(node: &Value) -> Option<i64> {
    match node {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Append a field name to a dotted path
pub fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}

/// Append a sequence index to a path
pub fn index(path: &str, i: usize) -> String {
    format!("{}[{}]", path, i)
}

/// Look up a string-keyed field in a mapping
pub fn field<'a>(mapping: &'a Mapping, name: &str) -> Option<&'a Value> {
    mapping.get(name)
}

/// Extension fields (`x-*`) are carried by the format but ignored here
pub fn is_extension(key: &str) -> bool {
    key.starts_with("x-")
}

/// Names of a list-or-map section such as `depends_on` or `networks`.
///
/// `[a, b]` and `{a: ..., b: ...}` both yield `a`, `b` in document order.
pub fn section_names(node: &Value) -> Vec<String> {
    match node {
        Value::Sequence(items) => items.iter().filter_map(scalar_str).collect(),
        Value::Mapping(map) => map.keys().filter_map(key_str).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(join("", "services"), "services");
        assert_eq!(join("services", "web"), "services.web");
        assert_eq!(index("services.web.ports", 2), "services.web.ports[2]");
    }

    #[test]
    fn test_integer_from_number_or_string() {
        assert_eq!(integer(&Value::from(3)), Some(3));
        assert_eq!(integer(&Value::from("2")), Some(2));
        assert_eq!(integer(&Value::from(" -1 ")), Some(-1));
        assert_eq!(integer(&Value::from("two")), None);
        assert_eq!(integer(&Value::from(1.5)), None);
    }

    #[test]
    fn test_section_names_list_and_map() {
        let list: Value = serde_yaml::from_str("[db, cache]").unwrap();
        let map: Value =
            serde_yaml::from_str("{db: {condition: service_started}, cache: null}").unwrap();

        assert_eq!(section_names(&list), vec!["db", "cache"]);
        assert_eq!(section_names(&map), vec!["db", "cache"]);
    }
}
