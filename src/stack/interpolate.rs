//! Environment variable interpolation in stack documents
//!
//! Supported forms, in any string value:
//!
//! - `$VAR` and `${VAR}`
//! - `${VAR:-default}` (default when unset or empty)
//! - `${VAR-default}` (default when unset)
//! - `${VAR:?message}` / `${VAR?message}` (error when unset or empty / unset)
//! - `$$` for a literal `$`
//!
//! Keys are never interpolated.

use super::node::{index, join, key_str};
use crate::error::{Result, StackError, ValidationError};
use regex::Regex;
use serde_yaml::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(\$)|\{([^}]*)\}|([A-Za-z_][A-Za-z0-9_]*)|(\{))")
        .expect("variable pattern is valid")
});

static BRACED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([A-Za-z_][A-Za-z0-9_]*)(?:(:-|-|:\?|\?)(.*))?$")
        .expect("braced variable pattern is valid")
});

/// Substitutes variables from a fixed environment
#[derive(Debug, Clone, Default)]
pub struct Interpolator {
    env: HashMap<String, String>,
}

impl Interpolator {
    pub fn new(env: HashMap<String, String>) -> Self {
        Self { env }
    }

    /// Snapshot of the current process environment
    pub fn from_process_env() -> Self {
        Self::new(std::env::vars().collect())
    }

    /// Interpolate every string value in the tree
    pub fn apply(&self, mut doc: Value) -> Result<Value> {
        let mut errors = Vec::new();
        self.walk(&mut doc, "", &mut errors);

        if errors.is_empty() {
            Ok(doc)
        } else {
            Err(StackError::Validation(errors))
        }
    }

    fn walk(&self, node: &mut Value, path: &str, errors: &mut Vec<ValidationError>) {
        match node {
            Value::String(s) => {
                let expanded = self.interpolate_str(s, path, errors);
                *s = expanded;
            }
            Value::Sequence(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    self.walk(item, &index(path, i), errors);
                }
            }
            Value::Mapping(map) => {
                for (key, value) in map.iter_mut() {
                    let segment = key_str(key).unwrap_or_else(|| "?".to_string());
                    self.walk(value, &join(path, &segment), errors);
                }
            }
            Value::Tagged(tagged) => self.walk(&mut tagged.value, path, errors),
            _ => {}
        }
    }

    fn interpolate_str(
        &self,
        input: &str,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) -> String {
        let mut out = String::with_capacity(input.len());
        let mut last = 0;

        for caps in VARIABLE.captures_iter(input) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&input[last..whole.start()]);
            last = whole.end();

            if caps.get(1).is_some() {
                out.push('$');
            } else if let Some(body) = caps.get(2) {
                match self.expand(body.as_str()) {
                    Ok(value) => out.push_str(&value),
                    Err(reason) => errors.push(ValidationError::new(path, reason)),
                }
            } else if let Some(name) = caps.get(3) {
                out.push_str(&self.lookup(name.as_str()));
            } else {
                errors.push(ValidationError::new(
                    path,
                    format!("unterminated variable reference in '{}'", input),
                ));
                out.push_str(&input[whole.start()..]);
                last = input.len();
                break;
            }
        }

        out.push_str(&input[last..]);
        out
    }

    fn expand(&self, body: &str) -> std::result::Result<String, String> {
        let Some(caps) = BRACED.captures(body) else {
            return Err(format!("invalid interpolation format for '${{{}}}'", body));
        };
        let name = &caps[1];
        let value = self.env.get(name);
        let arg = caps.get(3).map(|m| m.as_str()).unwrap_or_default();

        match caps.get(2).map(|m| m.as_str()) {
            None => Ok(self.lookup(name)),
            Some(":-") => Ok(match value {
                Some(v) if !v.is_empty() => v.clone(),
                _ => arg.to_string(),
            }),
            Some("-") => Ok(value.cloned().unwrap_or_else(|| arg.to_string())),
            Some(":?") => match value {
                Some(v) if !v.is_empty() => Ok(v.clone()),
                _ => Err(required(name, arg)),
            },
            Some(_) => value.cloned().ok_or_else(|| required(name, arg)),
        }
    }

    fn lookup(&self, name: &str) -> String {
        match self.env.get(name) {
            Some(value) => value.clone(),
            None => {
                tracing::warn!(
                    "The {} variable is not set. Defaulting to a blank string.",
                    name
                );
                String::new()
            }
        }
    }
}

fn required(name: &str, message: &str) -> String {
    if message.is_empty() {
        format!("required variable {} is missing a value", name)
    } else {
        format!("required variable {} is missing a value: {}", name, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpolator() -> Interpolator {
        let mut env = HashMap::new();
        env.insert("TAG".to_string(), "1.0.0".to_string());
        env.insert("EMPTY".to_string(), String::new());
        Interpolator::new(env)
    }

    fn expand(input: &str) -> (String, Vec<ValidationError>) {
        let mut errors = Vec::new();
        let out = interpolator().interpolate_str(input, "services.web.image", &mut errors);
        (out, errors)
    }

    #[test]
    fn test_interpolate() {
        assert_eq!(expand("nginx:${TAG}").0, "nginx:1.0.0");
        assert_eq!(expand("nginx:$TAG").0, "nginx:1.0.0");
        assert_eq!(expand("nginx:$UNSET").0, "nginx:");
    }

    #[test]
    fn test_interpolate_defaults() {
        assert_eq!(expand("${UNSET:-latest}").0, "latest");
        assert_eq!(expand("${EMPTY:-latest}").0, "latest");
        assert_eq!(expand("${EMPTY-latest}").0, "");
        assert_eq!(expand("${TAG:-latest}").0, "1.0.0");
    }

    #[test]
    fn test_interpolate_escape() {
        assert_eq!(expand("cost: $$5 and $$TAG").0, "cost: $5 and $TAG");
    }

    #[test]
    fn test_required_variable() {
        let (_, errors) = expand("${UNSET:?set the tag}");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "services.web.image");
        assert!(errors[0].reason.contains("set the tag"));
    }

    #[test]
    fn test_malformed_references() {
        let (_, errors) = expand("${not valid}");
        assert_eq!(errors.len(), 1);

        let (out, errors) = expand("nginx:${TAG");
        assert_eq!(errors.len(), 1);
        assert_eq!(out, "nginx:${TAG");
    }

    #[test]
    fn test_apply_walks_values_not_keys() {
        let doc: Value = serde_yaml::from_str(
            r#"
services:
  web:
    image: "web:${TAG}"
    environment:
      $TAG: "${UNSET:-x}"
    ports: ["${PORT:-80}:80"]
"#,
        )
        .unwrap();

        let doc = interpolator().apply(doc).unwrap();
        assert_eq!(doc["services"]["web"]["image"].as_str(), Some("web:1.0.0"));
        assert_eq!(doc["services"]["web"]["environment"]["$TAG"].as_str(), Some("x"));
        assert_eq!(doc["services"]["web"]["ports"][0].as_str(), Some("80:80"));
    }

    #[test]
    fn test_apply_collects_paths() {
        let doc: Value =
            serde_yaml::from_str("services: {web: {image: '${A:?}', command: '${B?}'}}").unwrap();

        match interpolator().apply(doc) {
            Err(StackError::Validation(errors)) => {
                let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(paths, vec!["services.web.image", "services.web.command"]);
            }
            other => panic!("expected validation errors, got {:?}", other),
        }
    }
}
