//! Step Data Model
//!
//! A [`Step`] is an opaque callable taking leading positional values plus a
//! one-shot continuation ([`Next`]). Steps declare how many leading values
//! they need; the validator checks that declaration before anything runs.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use stepflow::steps::Step;
//!
//! let double = Step::new(1, |args, next| {
//!     let n = args[0].as_i64().unwrap_or(0);
//!     next.ok(vec![json!(n * 2)]);
//! })
//! .with_name("double");
//!
//! assert_eq!(double.arity(), 1);
//! assert_eq!(double.name(), Some("double"));
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::StepError;

/// A single positional value passed between steps.
pub type Value = serde_json::Value;

/// Ordered positional values.
pub type Values = Vec<Value>;

type StepFn = dyn Fn(Values, Next) + Send + Sync;

/// One unit of work in an orchestration.
///
/// Cloning is cheap; clones share the same callable.
#[derive(Clone)]
pub struct Step {
    name: Option<String>,
    arity: usize,
    run: Arc<StepFn>,
}

impl Step {
    /// Creates a step that requires `arity` leading values.
    ///
    /// The step may ignore extra values but is never invoked with fewer
    /// than it declares.
    pub fn new<F>(arity: usize, run: F) -> Self
    where
        F: Fn(Values, Next) + Send + Sync + 'static,
    {
        Self {
            name: None,
            arity,
            run: Arc::new(run),
        }
    }

    /// Attaches a name used in log output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Number of leading values this step declares.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn invoke(&self, args: Values, next: Next) {
        (self.run)(args, next)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// What a step reported through its continuation.
#[derive(Debug, Clone)]
pub(crate) struct Completion {
    pub error: Option<StepError>,
    pub values: Values,
}

/// Continuation handed to every step invocation.
///
/// Consumed by whichever completion method is called, so a step reports
/// at most once. Dropping it without calling anything means the step never
/// completes.
pub struct Next {
    settle: Box<dyn FnOnce(Completion) + Send>,
}

impl Next {
    pub(crate) fn new<F>(settle: F) -> Self
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        Self {
            settle: Box::new(settle),
        }
    }

    /// Reports success with result values.
    pub fn ok(self, values: Values) {
        (self.settle)(Completion {
            error: None,
            values,
        })
    }

    /// Reports failure.
    pub fn fail(self, error: impl Into<StepError>) {
        self.fail_with(error, Vec::new())
    }

    /// Reports failure together with values a resumed sequence should carry.
    pub fn fail_with(self, error: impl Into<StepError>, values: Values) {
        (self.settle)(Completion {
            error: Some(error.into()),
            values,
        })
    }

    /// Reports a `Result` in one call.
    pub fn complete(self, result: Result<Values, StepError>) {
        match result {
            Ok(values) => self.ok(values),
            Err(error) => self.fail(error),
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}
