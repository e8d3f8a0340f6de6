//! Stepflow - Control Flow for Callback-Style Steps
//!
//! Orchestrates collections of steps that report through an error-first
//! continuation, in two shapes:
//!
//! - **Sequence**: one step at a time, each receiving the previous step's
//!   results. A failure suspends the run and offers a resume token.
//! - **Parallel**: every step started together, completions reported as
//!   they arrive. Any notification but the last offers a stop token.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`steps`]: Step and continuation types, validation, named-step catalogs
//! - [`observers`]: Event names, per-event delivery paths, readiness gate
//! - [`execution`]: Sequential and parallel engines and their handle
//! - [`monitoring`]: Per-orchestration timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use stepflow::{sequence, SequenceEvent, Step};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetch = Step::new(1, |args, next| next.ok(vec![json!(format!("body of {}", args[0]))]));
//!     let parse = Step::new(1, |args, next| match args[0].as_str() {
//!         Some(body) => next.ok(vec![json!(body.len())]),
//!         None => next.fail("not text"),
//!     });
//!
//!     sequence(vec![fetch, parse])
//!         .with_args(vec![json!("https://example.com")])
//!         .with_callback(|event| match event {
//!             SequenceEvent::Error { error, resume } => {
//!                 eprintln!("step failed: {}", error);
//!                 if let Some(resume) = resume {
//!                     let _ = resume.resume();
//!                 }
//!             }
//!             SequenceEvent::Done { values } => println!("result: {:?}", values),
//!         })
//!         .start()?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod monitoring;
pub mod observers;
pub mod steps;

// Re-export commonly used types
pub use error::{FlowError, MisuseError, StepError, ValidationError};
pub use execution::{
    for_each, parallel, sequence, Handle, Parallel, ParallelEvent, Resume, Sequence,
    SequenceEvent, Stop,
};
pub use observers::EventName;
pub use steps::{Next, Step, Value, Values};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_module_exports_step() {
        let step = Step::new(1, |args, next| next.ok(args));
        assert_eq!(step.arity(), 1);
    }

    #[test]
    fn test_module_exports_entry_points() {
        let err = sequence(vec![Step::new(0, |_, next| next.ok(vec![]))])
            .with_args(vec![json!(1)])
            .start()
            .unwrap_err();
        assert!(matches!(err, ValidationError::Arity { index: 0, .. }));

        assert!(parallel(Vec::new()).with_callback(|_| {}).start().is_ok());
    }
}
