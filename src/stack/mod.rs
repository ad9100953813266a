//! Stack file loading
//!
//! A stack file goes through three stages:
//!
//! 1. [`StackParser`] turns text into a generic YAML tree (syntax errors)
//! 2. [`SchemaValidator`] checks the tree's shape (validation errors)
//! 3. [`Resolver`] builds a typed [`Manifest`] and checks names (reference errors)
//!
//! [`StackLoader`] runs all three, with variable interpolation before validation.

pub mod interpolate;
pub mod loader;
pub mod model;
pub mod node;
pub mod orchestrator;
pub mod parser;
pub mod resolver;
pub mod schema;

pub use interpolate::Interpolator;
pub use loader::StackLoader;
pub use model::{Manifest, NetworkSpec, ServiceSpec, VolumeSpec};
pub use orchestrator::{Orchestrator, PlanPrinter};
pub use parser::StackParser;
pub use resolver::Resolver;
pub use schema::SchemaValidator;
