//! Observer Module
//!
//! Provides event delivery for orchestrations: the per-event registry that
//! arbitrates between a convenience handler and named subscribers, and the
//! readiness gate that holds steps back until observers are in place.
//!
//! # Structure
//!
//! - [`registry`]: Event names, listeners and delivery paths
//! - [`gate`]: Deferred check that every terminal event is observed

pub(crate) mod gate;
pub mod registry;

pub use registry::{EventName, FlowEvent, Listener};
