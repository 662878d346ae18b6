#[macro_use]
extern crate lazy_static;

pub mod codegen;
pub mod conformance;
pub mod document;
pub mod edges;
pub mod env;
pub mod error;
pub mod evaluator;
pub mod marshal;
pub mod ops;
pub mod resources;
pub mod runtime;
pub mod types;
pub mod validator;
pub mod value;

use std::collections::HashMap;

use document::{Document, Function};
use error::{EngineError, EngineResult};
use evaluator::{Completion, Evaluator};
use marshal::Clock;
use resources::ResourceStore;
use validator::Validator;
use value::Value;

/// The top-level facade (Design Note 9): hides the validator/evaluator/
/// resource-store/codegen machinery behind one object a caller constructs
/// once per loaded document, the way the teacher's `v1`/`config` layer
/// hides its own document parsing behind a single entry point.
pub struct Engine {
    doc: Document,
}

impl Engine {
    pub fn load(json: &str) -> EngineResult<Engine> {
        let doc = Document::from_json_str(json)?;
        Ok(Engine { doc })
    }

    /// Wrap an already-parsed (and possibly CLI-resource-spec-mutated)
    /// document directly, bypassing `from_json_str`.
    pub fn from_document(doc: Document) -> Engine {
        Engine { doc }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Run the full two-pass static validator (spec.md §4.3), accumulating
    /// every error rather than stopping at the first.
    pub fn validate(&self) -> Vec<validator::ValidationError> {
        let mut errors = Validator::new(&self.doc).validate();
        errors.extend(validator::check_resource_invariants(&self.doc.resources));
        errors
    }

    /// Validate, then run a `cpu` function to completion against a fresh
    /// `ResourceStore` built from the document's declarations.
    pub fn execute(&self, function_id: &str, inputs: HashMap<String, Value>) -> EngineResult<ExecutionResult> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }
        let func = self.doc.function(function_id).ok_or_else(|| EngineError::UnknownEntryPoint(function_id.to_string()))?;

        let mut store = resources::build_from_document(&self.doc)?;
        let clock = Clock::default();
        let mut evaluator = Evaluator::new(&self.doc, &mut store, &clock);
        let completion = evaluator.call(func, &inputs)?;
        let returned = match completion {
            Completion::Returned(v) => v,
            Completion::Fell => None,
        };
        Ok(ExecutionResult { resources: store, returned })
    }

    /// Generate WGSL source for a `shader`/`vertex`/`fragment` function
    /// (spec.md §5.2). Does not validate the whole document first; callers
    /// driving this from the CLI are expected to call `validate` up front.
    pub fn generate_wgsl(&self, function_id: &str) -> EngineResult<String> {
        let func = self.function_or_err(function_id)?;
        Ok(codegen::WgslGenerator.generate(&self.doc, func))
    }

    pub fn generate_native(&self, function_id: &str) -> EngineResult<String> {
        let func = self.function_or_err(function_id)?;
        Ok(codegen::NativeGenerator.generate(&self.doc, func))
    }

    /// Generate the straight-line host driver for a `cpu` function (spec.md
    /// §5.2), shared verbatim between both device backends.
    pub fn generate_host(&self, function_id: &str) -> EngineResult<String> {
        let func = self.function_or_err(function_id)?;
        Ok(codegen::common::generate_host_driver(&self.doc, func))
    }

    fn function_or_err(&self, function_id: &str) -> EngineResult<&Function> {
        self.doc.function(function_id).ok_or_else(|| EngineError::UnknownEntryPoint(function_id.to_string()))
    }
}

pub struct ExecutionResult {
    pub resources: ResourceStore,
    pub returned: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"{
            "version": "1",
            "entryPoint": "main",
            "resources": [],
            "structs": [],
            "functions": [{
                "id": "main", "kind": "cpu", "inputs": [], "outputs": [{"name": "out", "type": "int"}],
                "nodes": [
                    {"id": "a", "op": "literal", "value": 2},
                    {"id": "b", "op": "literal", "value": 3},
                    {"id": "sum", "op": "math_add", "a": "a", "b": "b"},
                    {"id": "r", "op": "func_return", "value": "sum"}
                ]
            }]
        }"#
    }

    #[test]
    fn engine_validates_and_executes_a_cpu_function() {
        let engine = Engine::load(sample()).unwrap();
        assert!(engine.validate().is_empty());
        let result = engine.execute("main", HashMap::new()).unwrap();
        assert_eq!(result.returned, Some(Value::Int(5)));
    }

    #[test]
    fn unknown_entry_point_is_an_engine_error() {
        let engine = Engine::load(sample()).unwrap();
        assert!(engine.execute("nope", HashMap::new()).is_err());
    }
}
