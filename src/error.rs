//! Error Types
//!
//! Three families of failure exist:
//!
//! - Configuration errors ([`ValidationError`], [`CatalogError`]) are returned
//!   synchronously before any step runs.
//! - Step-domain errors ([`StepError`]) are data. Steps report them through
//!   their continuation and they reach consumers on the `error` event.
//! - Listener-contract violations ([`MissingListenersError`]) are synthesized
//!   by the readiness gate and also travel on the `error` event.
//!
//! [`FlowError`] is the payload type of every `error` event. [`MisuseError`]
//! reports a resume or stop token used more than once.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Configuration error detected before an orchestration starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The step collection is not an ordered sequence.
    #[error("{flow}: first argument must be an ordered sequence")]
    Shape { flow: String },

    /// An element of the step collection cannot be invoked.
    #[error("{flow}: non-function at index {index}")]
    NotCallable { flow: String, index: usize },

    /// A step declares fewer leading arguments than the orchestration supplies.
    #[error("{flow}: function at index {index} must take at least {}", plural_args(.required))]
    Arity {
        flow: String,
        index: usize,
        required: usize,
        declared: usize,
    },
}

impl ValidationError {
    /// Position of the offending step, if the error concerns a single step.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Shape { .. } => None,
            Self::NotCallable { index, .. } | Self::Arity { index, .. } => Some(*index),
        }
    }
}

fn plural_args(count: &usize) -> String {
    if *count == 1 {
        "1 leading argument".to_string()
    } else {
        format!("{} leading arguments", count)
    }
}

/// Error reported by a step through its continuation.
#[derive(Clone)]
pub struct StepError {
    message: String,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl StepError {
    /// Creates an error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an arbitrary error, keeping it reachable through `source()`.
    pub fn wrap<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepError")
            .field("message", &self.message)
            .field("wrapped", &self.source.is_some())
            .finish()
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for StepError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl PartialEq for StepError {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Raised when a terminal event has nobody to receive it.
///
/// `details` lists one human-readable entry per missing event, in the
/// orchestration's terminal-event order, e.g. `no "done" listener`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{flow}: required listeners not found")]
pub struct MissingListenersError {
    pub flow: String,
    pub details: Vec<String>,
}

/// Payload of every `error` event.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error(transparent)]
    Step(#[from] StepError),

    #[error(transparent)]
    MissingListeners(#[from] MissingListenersError),

    /// A sequential step was reached with fewer values than it declares.
    /// The step is not invoked and the run ends.
    #[error("{flow}: function at index {index} needs {}, received {received}", plural_args(.declared))]
    InsufficientArgs {
        flow: String,
        index: usize,
        declared: usize,
        received: usize,
    },
}

impl FlowError {
    /// Returns the step error, if this is one.
    pub fn as_step(&self) -> Option<&StepError> {
        match self {
            Self::Step(e) => Some(e),
            Self::MissingListeners(_) | Self::InsufficientArgs { .. } => None,
        }
    }

    /// Missing-event details, empty for every other kind.
    pub fn details(&self) -> &[String] {
        match self {
            Self::Step(_) | Self::InsufficientArgs { .. } => &[],
            Self::MissingListeners(e) => &e.details,
        }
    }
}

/// A one-shot token was used after it had already taken effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MisuseError {
    #[error("{flow}: resume token already used")]
    ResumeConsumed { flow: String },

    #[error("{flow}: orchestration already stopped")]
    AlreadyStopped { flow: String },
}

/// Failure to turn a flow document into steps.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read flow document: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse flow document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}
