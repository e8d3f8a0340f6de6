//! Step Definition Module
//!
//! Provides the step and continuation types, validation of step
//! collections, and resolution of named steps from flow documents.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Step, Next, Value)
//! - [`validator`]: Arity checking before an orchestration starts
//! - [`catalog`]: Named steps and YAML/JSON flow documents

pub mod catalog;
pub mod model;
pub mod validator;

pub use catalog::{FlowDocument, StepCatalog};
pub use model::{Next, Step, Value, Values};
pub use validator::validate;
