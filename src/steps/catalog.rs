//! Step Catalog
//!
//! Resolves flow documents into step lists. A document names its steps;
//! the catalog maps each name to a registered [`Step`].
//!
//! # Example Document
//!
//! ```yaml
//! name: ingest
//! args: [ "s3://bucket/input.csv" ]
//! steps:
//!   - fetch
//!   - parse
//!   - store
//! ```
//!
//! JSON documents are accepted as well.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, ValidationError};
use crate::execution::{parallel, sequence, Parallel, Sequence};

use super::model::{Step, Value, Values};

/// Default flow label for sequential documents.
const SEQUENCE_LABEL: &str = "Sequence";

/// Default flow label for parallel documents.
const PARALLEL_LABEL: &str = "Parallel";

/// A flow definition as written on disk.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FlowDocument {
    /// Label used in error messages and logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Leading values passed to the first (sequential) or every (parallel) step
    #[serde(default)]
    pub args: Values,

    /// Ordered step names. Kept untyped so a malformed shape is reported
    /// as a validation error rather than a parse error.
    #[serde(default)]
    pub steps: Value,
}

impl FlowDocument {
    /// Parses a document from YAML (or JSON) text.
    pub fn from_yaml(text: &str) -> Result<Self, CatalogError> {
        let document = serde_yaml::from_str(text)?;
        Ok(document)
    }

    /// Reads and parses a document from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let document = Self::from_yaml(&text)?;

        info!("Loaded flow document: {}", path.display());
        Ok(document)
    }
}

/// Named steps available to flow documents.
#[derive(Clone, Default, Debug)]
pub struct StepCatalog {
    steps: HashMap<String, Step>,
}

impl StepCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a step under `name`, replacing any previous entry.
    ///
    /// Unnamed steps take the catalog name for log output.
    pub fn register(&mut self, name: impl Into<String>, step: Step) -> &mut Self {
        let name = name.into();
        let step = match step.name() {
            Some(_) => step,
            None => step.with_name(name.clone()),
        };
        self.steps.insert(name, step);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Turns a list of step names into steps.
    ///
    /// # Errors
    ///
    /// * [`ValidationError::Shape`] - `steps` is not a sequence
    /// * [`ValidationError::NotCallable`] - an element is not the name of a
    ///   registered step
    pub fn resolve(&self, flow: &str, steps: &Value) -> Result<Vec<Step>, ValidationError> {
        let Value::Array(entries) = steps else {
            return Err(ValidationError::Shape {
                flow: flow.to_string(),
            });
        };

        let resolved = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                entry
                    .as_str()
                    .and_then(|name| self.steps.get(name))
                    .cloned()
                    .ok_or_else(|| ValidationError::NotCallable {
                        flow: flow.to_string(),
                        index,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!("{}: resolved {} steps from catalog", flow, resolved.len());
        Ok(resolved)
    }

    /// Builds a sequential orchestration from a document.
    pub fn sequence(&self, document: &FlowDocument) -> Result<Sequence, ValidationError> {
        let flow = document.name.as_deref().unwrap_or(SEQUENCE_LABEL);
        let steps = self.resolve(flow, &document.steps)?;

        Ok(sequence(steps)
            .with_name(flow)
            .with_args(document.args.clone()))
    }

    /// Builds a parallel orchestration from a document.
    pub fn parallel(&self, document: &FlowDocument) -> Result<Parallel, ValidationError> {
        let flow = document.name.as_deref().unwrap_or(PARALLEL_LABEL);
        let steps = self.resolve(flow, &document.steps)?;

        Ok(parallel(steps)
            .with_name(flow)
            .with_args(document.args.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc::channel;
    use std::time::Duration;
    use tempfile::tempdir;

    use crate::execution::SequenceEvent;

    fn catalog() -> StepCatalog {
        let mut catalog = StepCatalog::new();
        catalog
            .register(
                "inc",
                Step::new(1, |args, next| {
                    let n = args[0].as_i64().unwrap_or(0);
                    next.ok(vec![json!(n + 1)]);
                }),
            )
            .register(
                "double",
                Step::new(1, |args, next| {
                    let n = args[0].as_i64().unwrap_or(0);
                    next.ok(vec![json!(n * 2)]);
                }),
            );
        catalog
    }

    #[test]
    fn test_register_names_steps() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 2);
        assert!(!catalog.is_empty());
        assert_eq!(catalog.get("inc").and_then(Step::name), Some("inc"));
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_resolve_rejects_non_sequence() {
        let catalog = catalog();
        for shape in [json!(null), json!(1), json!(true), json!("inc"), json!({})] {
            let err = catalog.resolve("Sequence", &shape).unwrap_err();
            assert_eq!(
                err.to_string(),
                "Sequence: first argument must be an ordered sequence"
            );
        }
    }

    #[test]
    fn test_resolve_rejects_unknown_and_non_string() {
        let catalog = catalog();

        let err = catalog.resolve("Sequence", &json!(["inc", "foo"])).unwrap_err();
        assert_eq!(err.to_string(), "Sequence: non-function at index 1");

        let err = catalog.resolve("Sequence", &json!([42, "inc"])).unwrap_err();
        assert_eq!(err.index(), Some(0));
    }

    #[test]
    fn test_resolve_preserves_order() {
        let steps = catalog()
            .resolve("Sequence", &json!(["double", "inc", "double"]))
            .unwrap();
        let names: Vec<_> = steps.iter().filter_map(Step::name).collect();
        assert_eq!(names, vec!["double", "inc", "double"]);
    }

    #[test]
    fn test_document_from_yaml() {
        let document = FlowDocument::from_yaml(
            "name: math\nargs: [3]\nsteps:\n  - inc\n  - double\n",
        )
        .unwrap();

        assert_eq!(document.name.as_deref(), Some("math"));
        assert_eq!(document.args, vec![json!(3)]);
        assert_eq!(document.steps, json!(["inc", "double"]));
    }

    #[test]
    fn test_document_from_json() {
        let document = FlowDocument::from_yaml(r#"{"steps": ["inc"]}"#).unwrap();
        assert!(document.name.is_none());
        assert!(document.args.is_empty());
    }

    #[test]
    fn test_document_missing_steps_is_shape_error() {
        let document = FlowDocument::from_yaml("name: empty\n").unwrap();
        let err = catalog().sequence(&document).unwrap_err();
        assert!(matches!(err, ValidationError::Shape { ref flow } if flow == "empty"));
    }

    #[test]
    fn test_document_load_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("flow.yaml");
        fs::write(&path, "steps: [inc]\n").unwrap();

        let document = FlowDocument::load(&path).unwrap();
        assert_eq!(document.steps, json!(["inc"]));

        let missing = FlowDocument::load(temp_dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(CatalogError::Io(_))));
    }

    #[test]
    fn test_document_parse_error() {
        let result = FlowDocument::from_yaml("steps: [inc\n");
        assert!(matches!(result, Err(CatalogError::Parse(_))));
    }

    #[test]
    fn test_catalog_sequence_runs_document() {
        let document =
            FlowDocument::from_yaml("name: math\nargs: [3]\nsteps: [inc, double]\n").unwrap();
        let (tx, rx) = channel();

        catalog()
            .sequence(&document)
            .unwrap()
            .with_callback(move |event| {
                let _ = tx.send(event);
            })
            .start()
            .unwrap();

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            SequenceEvent::Done { values } => assert_eq!(values, vec![json!(8)]),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_catalog_arity_checked_at_start() {
        let document = FlowDocument::from_yaml("args: [1, 2]\nsteps: [inc]\n").unwrap();
        let err = catalog().parallel(&document).unwrap().start().unwrap_err();

        assert!(matches!(
            err,
            ValidationError::Arity { index: 0, required: 2, declared: 1, .. }
        ));
    }
}
