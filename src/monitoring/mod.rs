//! Monitoring Module
//!
//! Provides the per-orchestration timeline of step activity and event
//! delivery.

pub mod timeline;

pub use timeline::{EventType, Timeline, TimelineEvent};
