//! Orchestration Module
//!
//! Provides the two execution engines and their shared handle.
//!
//! # Architecture
//!
//! - [`sequence`]: One step at a time, resumable after errors
//! - [`parallel`]: All steps at once, stoppable notification
//! - [`for_each`]: Per-element iteration on top of the parallel engine
//! - [`handle`]: Observer registration and release

pub mod for_each;
pub mod handle;
pub mod parallel;
pub mod sequence;
mod token;

pub use for_each::for_each;
pub use handle::Handle;
pub use parallel::{parallel, Parallel, ParallelEvent, Stop};
pub use sequence::{sequence, Resume, Sequence, SequenceEvent};
