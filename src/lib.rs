//! Stackfile - loader and validator for container stack manifests
//!
//! Reads a Docker stack / Compose style deployment file, checks it and
//! produces an immutable [`Manifest`] for an external orchestrator:
//!
//! - YAML parsing with line/column syntax errors
//! - Variable interpolation (`${VAR:-default}`)
//! - Schema validation that reports every problem in one pass
//! - Reference resolution for services, networks and volumes
//! - Host port uniqueness and dependency cycle checks

pub mod error;
pub mod stack;

pub use error::{Result, StackError};
pub use stack::{Manifest, StackLoader};
