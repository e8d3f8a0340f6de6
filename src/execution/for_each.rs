//! Per-Element Iteration
//!
//! Runs one callable once per element, concurrently, by building one step
//! per element and handing them to the parallel engine.

use std::sync::Arc;

use crate::steps::{Next, Step, Values};

use super::parallel::{parallel, Parallel};

/// Default label for per-element runs.
const LABEL: &str = "ForEach";

/// Builds a parallel run calling `f` once with each element of `items`.
///
/// # Example
///
/// ```rust,no_run
/// use serde_json::json;
/// use stepflow::for_each;
///
/// let items = vec![vec![json!(1), json!(2)], vec![json!(3), json!(4)]];
/// for_each(items, |values, next| next.ok(values))
///     .with_callback(|event| println!("{:?}", event))
///     .start()
///     .expect("zero-arity steps always validate");
/// ```
pub fn for_each<F>(items: Vec<Values>, f: F) -> Parallel
where
    F: Fn(Values, Next) + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let steps = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let f = Arc::clone(&f);
            Step::new(0, move |_, next| f(item.clone(), next)).with_name(format!("item {}", index))
        })
        .collect();

    parallel(steps).with_name(LABEL)
}
