//! Parse, validate and resolve in one call

use super::interpolate::Interpolator;
use super::model::Manifest;
use super::parser::StackParser;
use super::resolver::Resolver;
use super::schema::SchemaValidator;
use crate::error::{Result, StackError};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Where interpolation values come from
#[derive(Debug, Clone, Default)]
enum Interpolation {
    #[default]
    ProcessEnv,
    Fixed(HashMap<String, String>),
    Disabled,
}

/// Stack loader
///
/// ```no_run
/// use stackfile::StackLoader;
///
/// let manifest = StackLoader::new().load_file("docker-stack.yml".as_ref())?;
/// println!("{} services", manifest.services().len());
/// # Ok::<(), stackfile::StackError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct StackLoader {
    project_dir: Option<PathBuf>,
    interpolation: Interpolation,
}

impl StackLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base directory for relative volume paths
    pub fn project_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Interpolate from a fixed set of variables instead of the process environment
    pub fn environment(mut self, env: HashMap<String, String>) -> Self {
        self.interpolation = Interpolation::Fixed(env);
        self
    }

    pub fn without_interpolation(mut self) -> Self {
        self.interpolation = Interpolation::Disabled;
        self
    }

    /// Load a single stack file
    pub fn load_file(&self, path: &Path) -> Result<Manifest> {
        self.load_files(&[path.to_path_buf()])
    }

    /// Load and merge stack files; later files override earlier ones
    pub fn load_files(&self, paths: &[PathBuf]) -> Result<Manifest> {
        let doc = StackParser::parse_files(paths)?;

        let base_dir = match &self.project_dir {
            Some(dir) => dir.clone(),
            None => paths
                .first()
                .and_then(|p| p.parent())
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };

        let manifest = self.finish(doc, &base_dir)?;
        tracing::info!(
            "Loaded {} with {} services",
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            manifest.services().len()
        );
        Ok(manifest)
    }

    /// Load a stack document held in memory
    pub fn load_str(&self, content: &str) -> Result<Manifest> {
        let doc = StackParser::parse_str(content)?;
        let base_dir = self.project_dir.clone().unwrap_or_default();
        self.finish(doc, &base_dir)
    }

    fn finish(&self, doc: Value, base_dir: &Path) -> Result<Manifest> {
        let doc = match &self.interpolation {
            Interpolation::ProcessEnv => Interpolator::from_process_env().apply(doc)?,
            Interpolation::Fixed(env) => Interpolator::new(env.clone()).apply(doc)?,
            Interpolation::Disabled => doc,
        };
        tracing::debug!("Interpolation finished");

        SchemaValidator::validate(&doc)?;
        tracing::debug!("Schema validation passed");

        let base_dir = absolute(base_dir)?;
        Resolver::new(base_dir).resolve(&doc)
    }
}

fn absolute(dir: &Path) -> Result<PathBuf> {
    if dir.as_os_str().is_empty() {
        return Ok(std::env::current_dir()?);
    }
    std::path::absolute(dir).map_err(StackError::Io)
}
