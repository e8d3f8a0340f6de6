//! Step Validation
//!
//! Checks a step collection before an orchestration starts. Every step must
//! declare at least as many leading values as the orchestration will pass
//! it. The first offending step is reported.
//!
//! Shape and callability are guaranteed by the type system for `Vec<Step>`;
//! documents resolved through [`StepCatalog`](super::catalog::StepCatalog)
//! report those problems during resolution instead.

use log::debug;

use crate::error::ValidationError;

use super::model::Step;

/// Validates that every step accepts `required` leading values.
///
/// Pure inspection with no side effects.
pub fn validate(flow: &str, steps: &[Step], required: usize) -> Result<(), ValidationError> {
    for (index, step) in steps.iter().enumerate() {
        if step.arity() < required {
            return Err(ValidationError::Arity {
                flow: flow.to_string(),
                index,
                required,
                declared: step.arity(),
            });
        }
    }

    debug!(
        "{}: {} steps accept {} leading values",
        flow,
        steps.len(),
        required
    );
    Ok(())
}
