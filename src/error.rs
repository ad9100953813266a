//! Error types for stackfile

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for stackfile operations
pub type Result<T> = std::result::Result<T, StackError>;

/// Stackfile error types
#[derive(Error, Debug)]
pub enum StackError {
    #[error("{0}")]
    Syntax(SyntaxError),

    #[error("{} validation error(s)", .0.len())]
    Validation(Vec<ValidationError>),

    #[error("{} unresolved reference(s)", .0.len())]
    Reference(Vec<ReferenceError>),

    #[error("No stack file found in {0}")]
    StackFileNotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StackError {
    /// One diagnostic line per underlying problem, ready for stderr
    pub fn diagnostics(&self) -> Vec<String> {
        match self {
            StackError::Syntax(err) => vec![err.to_string()],
            StackError::Validation(errors) => errors.iter().map(|e| e.to_string()).collect(),
            StackError::Reference(errors) => errors.iter().map(|e| e.to_string()).collect(),
            other => vec![other.to_string()],
        }
    }
}

/// Malformed document structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// File the document was read from, if any
    pub file: Option<PathBuf>,
    /// 1-based line, 0 when the location is unknown
    pub line: usize,
    /// 1-based column, 0 when the location is unknown
    pub column: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            file: None,
            line,
            column,
            message: message.into(),
        }
    }

    /// Attach the source file name
    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self
            .file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<input>".to_string());
        write!(
            f,
            "{}:{}:{}: syntax error: {}",
            file, self.line, self.column, self.message
        )
    }
}

/// A single schema violation, located by its dotted field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// What kind of top-level entry a reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Service,
    Network,
    Volume,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Service => write!(f, "service"),
            ReferenceKind::Network => write!(f, "network"),
            ReferenceKind::Volume => write!(f, "volume"),
        }
    }
}

/// A name that does not resolve to any declared entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceError {
    pub path: String,
    pub kind: ReferenceKind,
    pub identifier: String,
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: undefined {} '{}'",
            self.path, self.kind, self.identifier
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let err = SyntaxError::new(3, 7, "did not find expected key").in_file("docker-stack.yml");
        assert_eq!(
            err.to_string(),
            "docker-stack.yml:3:7: syntax error: did not find expected key"
        );
    }

    #[test]
    fn test_diagnostics_one_line_per_error() {
        let err = StackError::Validation(vec![
            ValidationError::new("services.web.image", "required field is missing"),
            ValidationError::new("services.db.deploy.replicas", "must be at least 1"),
        ]);

        let lines = err.diagnostics();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("services.web.image: "));
        assert!(lines[1].starts_with("services.db.deploy.replicas: "));
    }

    #[test]
    fn test_reference_error_display() {
        let err = ReferenceError {
            path: "services.web.networks.webnet".to_string(),
            kind: ReferenceKind::Network,
            identifier: "webnet".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "services.web.networks.webnet: undefined network 'webnet'"
        );
    }
}
