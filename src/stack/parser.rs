//! Stack file parser

use crate::error::{Result, StackError, SyntaxError};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

/// Default stack file names, in lookup order
pub const DEFAULT_STACK_FILES: &[&str] = &[
    "docker-stack.yml",
    "docker-stack.yaml",
    "compose.yaml",
    "compose.yml",
    "docker-compose.yml",
    "docker-compose.yaml",
];

/// Stack file parser
pub struct StackParser;

impl StackParser {
    /// Find stack file in directory
    pub fn find_stack_file(dir: &Path) -> Option<PathBuf> {
        DEFAULT_STACK_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Parse stack file from path
    pub fn parse_file(path: &Path) -> Result<Value> {
        let content = std::fs::read_to_string(path).map_err(|source| StackError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!("Read {} bytes from {}", content.len(), path.display());

        Self::parse_str(&content).map_err(|err| match err {
            StackError::Syntax(syntax) => StackError::Syntax(syntax.in_file(path)),
            other => other,
        })
    }

    /// Parse stack document from string into a generic tree.
    ///
    /// `<<` merge keys are expanded, so anchors declared in `x-` blocks can
    /// be shared between services.
    pub fn parse_str(content: &str) -> Result<Value> {
        let mut doc: Value =
            serde_yaml::from_str(content).map_err(|err| StackError::Syntax(syntax_error(&err)))?;
        doc.apply_merge()
            .map_err(|err| StackError::Syntax(syntax_error(&err)))?;
        Ok(doc)
    }

    /// Parse several files and merge them, later files overriding earlier ones
    pub fn parse_files(paths: &[PathBuf]) -> Result<Value> {
        let mut merged = Value::Null;

        for path in paths {
            let document = Self::parse_file(path)?;
            merged = Self::merge(merged, document);
        }

        Ok(merged)
    }

    /// Deep merge two trees.
    ///
    /// Mappings merge key by key; any other node in `overlay` replaces the
    /// corresponding node in `base`.
    pub fn merge(base: Value, overlay: Value) -> Value {
        match (base, overlay) {
            (Value::Mapping(mut base), Value::Mapping(overlay)) => {
                for (key, value) in overlay {
                    match base.get_mut(&key) {
                        Some(slot) => {
                            let current = std::mem::replace(slot, Value::Null);
                            *slot = Self::merge(current, value);
                        }
                        None => {
                            base.insert(key, value);
                        }
                    }
                }
                Value::Mapping(base)
            }
            (_, overlay) => overlay,
        }
    }
}

fn syntax_error(err: &serde_yaml::Error) -> SyntaxError {
    let message = err.to_string();
    let message = match message.find(" at line ") {
        Some(idx) => message[..idx].to_string(),
        None => message,
    };

    match err.location() {
        Some(location) => SyntaxError::new(location.line(), location.column(), message),
        None => SyntaxError::new(0, 0, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_simple_stack() {
        let yaml = r#"
version: "3"
services:
  web:
    image: nginx:latest
    ports:
      - "80:80"
  db:
    image: postgres:13
"#;

        let doc = StackParser::parse_str(yaml).unwrap();
        let services = doc.get("services").and_then(Value::as_mapping).unwrap();
        assert_eq!(services.len(), 2);
        assert!(services.contains_key("web"));
        assert!(services.contains_key("db"));
    }

    #[test]
    fn test_parse_error_has_location() {
        let yaml = "services:\n  web:\n    image: [nginx\n";

        match StackParser::parse_str(yaml) {
            Err(StackError::Syntax(err)) => {
                assert!(err.line >= 3);
                assert!(err.column > 0);
                assert!(!err.message.contains(" at line "));
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_applies_merge_keys() {
        let yaml = r#"
x-common: &common
  image: web:latest
  restart: always
services:
  web:
    <<: *common
    restart: on-failure
    ports: ["80:80"]
"#;

        let doc = StackParser::parse_str(yaml).unwrap();
        let web = &doc["services"]["web"];
        assert!(!web.as_mapping().unwrap().contains_key("<<"));
        assert_eq!(web["image"].as_str(), Some("web:latest"));
        assert_eq!(web["restart"].as_str(), Some("on-failure"));
        assert_eq!(web["ports"][0].as_str(), Some("80:80"));
    }

    #[test]
    fn test_parse_rejects_bad_merge_value() {
        let yaml = "services:\n  web:\n    <<: 1\n    image: web\n";
        assert!(matches!(StackParser::parse_str(yaml), Err(StackError::Syntax(_))));
    }

    #[test]
    fn test_parse_file_names_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("docker-stack.yml");
        std::fs::write(&path, "services: {web: }\n  bad: [").unwrap();

        match StackParser::parse_file(&path) {
            Err(StackError::Syntax(err)) => assert_eq!(err.file.as_deref(), Some(path.as_path())),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_missing_file() {
        let temp = tempdir().unwrap();
        let result = StackParser::parse_file(&temp.path().join("nope.yml"));
        assert!(matches!(result, Err(StackError::Read { .. })));
    }

    #[test]
    fn test_find_stack_file_prefers_stack_name() {
        let temp = tempdir().unwrap();
        assert!(StackParser::find_stack_file(temp.path()).is_none());

        std::fs::write(temp.path().join("compose.yaml"), "services: {}").unwrap();
        std::fs::write(temp.path().join("docker-stack.yml"), "services: {}").unwrap();

        let found = StackParser::find_stack_file(temp.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "docker-stack.yml");
    }

    #[test]
    fn test_merge_overlay_wins() {
        let base = StackParser::parse_str(
            r#"
services:
  web:
    image: web:1
    ports: ["80:80"]
  db:
    image: postgres
"#,
        )
        .unwrap();
        let overlay = StackParser::parse_str(
            r#"
services:
  web:
    image: web:2
    ports: ["8080:80"]
  cache:
    image: redis
"#,
        )
        .unwrap();

        let merged = StackParser::merge(base, overlay);
        let services = merged["services"].as_mapping().unwrap();
        let names: Vec<_> = services.keys().filter_map(Value::as_str).collect();

        assert_eq!(names, vec!["web", "db", "cache"]);
        assert_eq!(merged["services"]["web"]["image"].as_str(), Some("web:2"));
        assert_eq!(merged["services"]["web"]["ports"][0].as_str(), Some("8080:80"));
        assert_eq!(merged["services"]["db"]["image"].as_str(), Some("postgres"));
    }
}
