//! Static validator (spec.md §4.3): structural schema pass plus a
//! logic/type-inference pass, accumulating every error rather than
//! short-circuiting on the first one.
//!
//! Grounded on the teacher's `typechecker.rs::TypeChecker` paired with
//! `env.rs::Env` — here the environment carries `ValueType`s instead of the
//! teacher's `TypeTag`s, and `check_*` methods push onto an accumulator
//! instead of returning on the first `Err`.

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::document::{Document, Function, FunctionKind, Node, Resource, ResourceKind};
use crate::edges::{self, QuatFormError};
use crate::env::Env;
use crate::ops::{self, ArgKind, OpKind};
use crate::types::ValueType;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Referenced resource/function/variable '{0}' does not exist")]
    UnresolvedIdentifier(String),
    #[error("Type Mismatch")]
    TypeMismatch,
    #[error("Missing required argument for op '{0}'")]
    MissingRequiredArgument(String),
    #[error("Invalid constant name")]
    InvalidConstantName,
    #[error("Invalid Negative Index")]
    InvalidNegativeIndex,
    #[error("Static OOB Access")]
    StaticOobAccess,
    #[error("Invalid explicit type '{0}'")]
    InvalidExplicitType(String),
    #[error("not allowed in shader functions")]
    NotAllowedInShaderFunctions,
    #[error("unknown op '{0}'")]
    UnknownOp(String),
    #[error("node id '{0}' is duplicated within function '{1}'")]
    DuplicateNodeId(String, String),
    #[error("execution reference '{0}' from node '{1}' does not resolve")]
    DanglingExecEdge(String, String),
}

/// Named engine constants `const_get` may read (spec.md §4.2).
const KNOWN_CONSTANTS: &[&str] = &["pi", "tau", "e"];

/// CPU-injected builtins available to `builtin_get` (spec.md §5.3), plus
/// `gid` (spec.md §8 scenario a), the device-side `global_invocation_id`
/// every shader/vertex/fragment invocation carries implicitly.
const KNOWN_BUILTINS: &[&str] =
    &["time", "delta_time", "bpm", "beat_number", "beat_delta", "output_size", "gid"];

pub struct Validator<'doc> {
    doc: &'doc Document,
    errors: Vec<ValidationError>,
}

impl<'doc> Validator<'doc> {
    pub fn new(doc: &'doc Document) -> Self {
        Validator { doc, errors: Vec::new() }
    }

    /// Run both passes over every function and return the accumulated
    /// error list. Empty means the document may execute (spec.md §4.3).
    pub fn validate(mut self) -> Vec<ValidationError> {
        for func in &self.doc.functions {
            self.check_structure(func);
        }
        for func in &self.doc.functions {
            let env = Rc::new(Env::<ValueType>::root());
            self.bind_inputs(func, &env);
            for node in &func.nodes {
                // errors from inference are accumulated inside; the
                // resulting type is discarded here, only used by callers
                // that need a specific node's type (e.g. struct field
                // chains), which re-derive it through the same method.
                let _ = self.infer_node(func, node, &env);
            }
        }
        self.errors
    }

    fn push(&mut self, err: ValidationError) {
        self.errors.push(err);
    }

    fn check_structure(&mut self, func: &Function) {
        let mut seen: HashMap<&str, u32> = HashMap::new();
        for node in &func.nodes {
            *seen.entry(node.id.as_str()).or_insert(0) += 1;
        }
        for (id, count) in &seen {
            if *count > 1 {
                self.push(ValidationError::DuplicateNodeId(id.to_string(), func.id.clone()));
            }
        }

        for node in &func.nodes {
            let Some(desc) = ops::lookup(&node.op) else {
                self.push(ValidationError::UnknownOp(node.op.clone()));
                continue;
            };

            if matches!(desc.kind, OpKind::HostOnly) && matches!(func.kind, FunctionKind::Shader | FunctionKind::Vertex | FunctionKind::Fragment) {
                self.push(ValidationError::NotAllowedInShaderFunctions);
            }

            for target in node.exec_targets() {
                if func.node(target.1).is_none() {
                    self.push(ValidationError::DanglingExecEdge(target.1.to_string(), node.id.clone()));
                }
            }

            for arg in ops::required_args(desc) {
                if !self.node_has_arg(func, node, arg.name, arg.kind) {
                    self.push(ValidationError::MissingRequiredArgument(node.op.clone()));
                }
            }

            self.check_op_specific_structure(func, node, desc.kind);
        }
    }

    fn node_has_arg(&self, func: &Function, node: &Node, name: &str, kind: ArgKind) -> bool {
        match (node.op.as_str(), name) {
            ("math_step", "x") | ("math_step", "val") => edges::resolve_math_step_value(node).is_some(),
            ("cmd_dispatch", "threads") | ("cmd_dispatch", "dispatch") => {
                edges::resolve_dispatch_threads(node).is_some()
            }
            _ => match kind {
                ArgKind::Resource => node.args.get(name).and_then(|v| v.as_str()).map(|id| self.doc.resource(id).is_some()).unwrap_or(false),
                ArgKind::Func => node.args.get(name).and_then(|v| v.as_str()).map(|id| self.doc.function(id).is_some()).unwrap_or(false),
                ArgKind::Struct => node.args.get(name).and_then(|v| v.as_str()).map(|id| self.doc.struct_def(id).is_some()).unwrap_or(false),
                _ => node.args.contains_key(name),
            },
        }
    }

    fn check_op_specific_structure(&mut self, _func: &Function, node: &Node, _kind: OpKind) {
        match node.op.as_str() {
            "quat" => {
                if let Err(e) = edges::resolve_quat_form(node) {
                    match e {
                        QuatFormError::NeitherFormPresent | QuatFormError::BothFormsPresent => {
                            self.push(ValidationError::MissingRequiredArgument("quat".to_string()));
                        }
                    }
                }
            }
            "literal" => {
                if let Some(ty) = node.args.get("type").and_then(|v| v.as_str()) {
                    if parse_literal_explicit_type(ty).is_none() {
                        self.push(ValidationError::InvalidExplicitType(ty.to_string()));
                    }
                }
            }
            "const_get" => {
                if let Some(name) = node.args.get("name").and_then(|v| v.as_str()) {
                    if !KNOWN_CONSTANTS.contains(&name) {
                        self.push(ValidationError::InvalidConstantName);
                    }
                }
            }
            "builtin_get" => {
                if let Some(name) = node.args.get("name").and_then(|v| v.as_str()) {
                    if !KNOWN_BUILTINS.contains(&name) {
                        self.push(ValidationError::UnresolvedIdentifier(name.to_string()));
                    }
                }
            }
            "buffer_load" | "buffer_store" => self.check_static_bounds(node),
            _ => {}
        }
    }

    fn check_static_bounds(&mut self, node: &Node) {
        let Some(index) = node.args.get("index").and_then(|v| v.as_i64()) else { return };
        if index < 0 {
            self.push(ValidationError::InvalidNegativeIndex);
            return;
        }
        let Some(buffer_id) = node.args.get("buffer").and_then(|v| v.as_str()) else { return };
        let Some(resource) = self.doc.resource(buffer_id) else { return };
        if let crate::document::ResourceSize::Fixed(n) = resource.size {
            if index as u64 >= n as u64 {
                self.push(ValidationError::StaticOobAccess);
            }
        }
    }

    fn bind_inputs(&self, func: &Function, env: &Rc<Env<ValueType>>) {
        for input in &func.inputs {
            if let Some(ty) = parse_type_name(&input.type_name) {
                env.define(&input.name, &Rc::new(ty));
            }
        }
        for local in &func.local_vars {
            if let Some(ty) = parse_type_name(&local.type_name) {
                env.define(&local.name, &Rc::new(ty));
            }
        }
    }

    /// Infer a node's result type, accumulating any error found along the
    /// way. Returns `None` (without necessarily having pushed an error) for
    /// ops whose result type is not meaningfully inferable (side-effecting
    /// commands, control flow).
    fn infer_node(&mut self, func: &Function, node: &Node, env: &Rc<Env<ValueType>>) -> Option<ValueType> {
        match node.op.as_str() {
            "literal" => self.infer_literal(node),
            "var_get" => {
                let name = node.args.get("name")?.as_str()?;
                match env.get(name) {
                    Some(ty) => Some((*ty).clone()),
                    None => {
                        self.push(ValidationError::UnresolvedIdentifier(name.to_string()));
                        None
                    }
                }
            }
            "math_add" | "math_sub" | "math_mul" | "math_div" | "math_mod" | "math_min" | "math_max" => {
                self.infer_binary_numeric(func, node, env)
            }
            "math_pow" | "math_atan2" => {
                self.infer_operand(func, node, env, "a")?;
                self.infer_operand(func, node, env, "b")?;
                Some(ValueType::Float)
            }
            "math_step" => {
                self.infer_operand(func, node, env, "edge")?;
                Some(ValueType::Float)
            }
            "math_neg" | "math_abs" => self.infer_operand(func, node, env, "value"),
            "math_sqrt" | "math_floor" | "math_ceil" | "math_sin" | "math_cos" => {
                self.infer_operand(func, node, env, "value")?;
                Some(ValueType::Float)
            }
            "cmp_lt" | "cmp_gt" | "cmp_lte" | "cmp_gte" | "cmp_eq" | "cmp_neq" => {
                self.infer_operand(func, node, env, "a")?;
                self.infer_operand(func, node, env, "b")?;
                Some(ValueType::Bool)
            }
            "logic_and" | "logic_or" => {
                self.expect_bool(func, node, env, "a")?;
                self.expect_bool(func, node, env, "b")?;
                Some(ValueType::Bool)
            }
            "logic_not" => {
                self.expect_bool(func, node, env, "value")?;
                Some(ValueType::Bool)
            }
            "cast_int" => Some(ValueType::Int),
            "cast_float" => Some(ValueType::Float),
            "cast_bool" => Some(ValueType::Bool),
            "struct_extract" => {
                let value_ty = self.infer_operand(func, node, env, "value")?;
                match value_ty {
                    ValueType::Struct(ref id) => {
                        let field = node.args.get("field")?.as_str()?;
                        let sdef = self.doc.struct_def(id)?;
                        match sdef.members.iter().find(|m| m.name == field) {
                            Some(m) => parse_type_name(&m.type_name),
                            None => {
                                self.push(ValidationError::TypeMismatch);
                                None
                            }
                        }
                    }
                    _ => {
                        self.push(ValidationError::TypeMismatch);
                        None
                    }
                }
            }
            "swizzle" => {
                let value_ty = self.infer_operand(func, node, env, "value")?;
                if !value_ty.is_vector() {
                    self.push(ValidationError::TypeMismatch);
                    return None;
                }
                let pattern = node.args.get("pattern")?.as_str()?;
                if pattern.len() > value_ty.lanes() || pattern.is_empty() {
                    self.push(ValidationError::TypeMismatch);
                    return None;
                }
                Some(match pattern.len() {
                    1 => value_ty.element_type(),
                    2 => if value_ty.element_type() == ValueType::Int { ValueType::Int2 } else { ValueType::Float2 },
                    3 => if value_ty.element_type() == ValueType::Int { ValueType::Int3 } else { ValueType::Float3 },
                    4 => if value_ty.element_type() == ValueType::Int { ValueType::Int4 } else { ValueType::Float4 },
                    _ => {
                        self.push(ValidationError::TypeMismatch);
                        return None;
                    }
                })
            }
            "call_func" => {
                let callee_id = node.args.get("function")?.as_str()?;
                let callee = self.doc.function(callee_id)?;
                callee.outputs.first().and_then(|o| parse_type_name(&o.type_name))
            }
            _ => None,
        }
    }

    fn infer_operand(&mut self, func: &Function, node: &Node, env: &Rc<Env<ValueType>>, field: &str) -> Option<ValueType> {
        let reference = node.args.get(field)?.as_str();
        if let Some(id) = reference {
            if let Some(referenced) = func.node(id.split('.').next().unwrap_or(id)) {
                return self.infer_node(func, referenced, env);
            }
        }
        literal_type_of(node.args.get(field)?)
    }

    fn infer_binary_numeric(&mut self, func: &Function, node: &Node, env: &Rc<Env<ValueType>>) -> Option<ValueType> {
        let a = self.infer_operand(func, node, env, "a")?;
        let b = self.infer_operand(func, node, env, "b")?;
        match crate::types::unify(&a, &b) {
            Ok((ty, _, _)) => Some(ty),
            Err(_) => {
                self.push(ValidationError::TypeMismatch);
                None
            }
        }
    }

    fn expect_bool(&mut self, func: &Function, node: &Node, env: &Rc<Env<ValueType>>, field: &str) -> Option<()> {
        match self.infer_operand(func, node, env, field) {
            Some(ValueType::Bool) => Some(()),
            Some(_) => {
                self.push(ValidationError::TypeMismatch);
                None
            }
            None => None,
        }
    }

    fn infer_literal(&mut self, node: &Node) -> Option<ValueType> {
        if let Some(explicit) = node.args.get("type").and_then(|v| v.as_str()) {
            return match parse_literal_explicit_type(explicit) {
                Some(ty) => Some(ty),
                None => {
                    self.push(ValidationError::InvalidExplicitType(explicit.to_string()));
                    None
                }
            };
        }
        literal_type_of(node.args.get("value")?)
    }
}

fn parse_type_name(name: &str) -> Option<ValueType> {
    Some(crate::types::parse_type_name(name))
}

/// `literal`'s explicit `type` field may only name a closed-lattice scalar
/// or vector/matrix type, never a struct id (a struct can't be spelled as
/// a literal) — anything else is `Invalid explicit type 'T'` (spec.md
/// §4.3).
fn parse_literal_explicit_type(name: &str) -> Option<ValueType> {
    match crate::types::parse_type_name(name) {
        ValueType::Struct(_) => None,
        ty => Some(ty),
    }
}

fn literal_type_of(value: &serde_json::Value) -> Option<ValueType> {
    use serde_json::Value as Json;
    match value {
        Json::Number(n) if n.is_i64() || n.is_u64() => Some(ValueType::Int),
        Json::Number(_) => Some(ValueType::Float),
        Json::Bool(_) => Some(ValueType::Bool),
        Json::String(_) => Some(ValueType::Str),
        Json::Array(items) => match items.len() {
            2 => Some(ValueType::Float2),
            3 => Some(ValueType::Float3),
            4 => Some(ValueType::Float4),
            _ => None,
        },
        _ => None,
    }
}

/// Structural-pass resources sanity check: atomic counters must have
/// element type `int`, samplers may only attach to textures (spec.md §3).
pub fn check_resource_invariants(resources: &[Resource]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for r in resources {
        if r.kind == ResourceKind::AtomicCounter {
            if r.element_type.as_deref() != Some("int") {
                errors.push(ValidationError::TypeMismatch);
            }
        }
        if r.sampler.is_some() && r.kind != ResourceKind::Texture2d {
            errors.push(ValidationError::TypeMismatch);
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn doc(json: &str) -> Document {
        Document::from_json_str(json).unwrap()
    }

    #[test]
    fn mismatched_add_operands_accumulate_type_mismatch() {
        let d = doc(
            r#"{
                "version": "1", "entryPoint": "main", "resources": [], "structs": [],
                "functions": [{
                    "id": "main", "kind": "cpu", "inputs": [], "outputs": [],
                    "nodes": [
                        {"id": "a", "op": "literal", "value": "hello"},
                        {"id": "b", "op": "literal", "value": 1.0},
                        {"id": "c", "op": "math_add", "a": "a", "b": "b"}
                    ]
                }]
            }"#,
        );
        let errors = Validator::new(&d).validate();
        assert!(errors.contains(&ValidationError::TypeMismatch));
    }

    #[test]
    fn static_oob_buffer_store_is_detected() {
        let d = doc(
            r#"{
                "version": "1", "entryPoint": "main",
                "resources": [{"id": "buf", "kind": "buffer", "elementType": "float", "size": 2}],
                "structs": [],
                "functions": [{
                    "id": "main", "kind": "cpu", "inputs": [], "outputs": [],
                    "nodes": [
                        {"id": "idx", "op": "literal", "value": 5},
                        {"id": "val", "op": "literal", "value": 100.0},
                        {"id": "store", "op": "buffer_store", "buffer": "buf", "index": "idx", "value": "val"}
                    ]
                }]
            }"#,
        );
        let errors = Validator::new(&d).validate();
        assert!(errors.contains(&ValidationError::StaticOobAccess));
    }

    #[test]
    fn host_only_op_inside_shader_function_is_rejected() {
        let d = doc(
            r#"{
                "version": "1", "entryPoint": "main",
                "resources": [{"id": "buf", "kind": "buffer", "elementType": "float", "size": 2}],
                "structs": [],
                "functions": [{
                    "id": "main", "kind": "shader", "inputs": [], "outputs": [],
                    "nodes": [
                        {"id": "n0", "op": "cmd_resize_resource", "resource": "buf", "size": 4}
                    ]
                }]
            }"#,
        );
        let errors = Validator::new(&d).validate();
        assert!(errors.contains(&ValidationError::NotAllowedInShaderFunctions));
    }

    #[test]
    fn valid_document_accumulates_no_errors() {
        let d = doc(
            r#"{
                "version": "1", "entryPoint": "main", "resources": [], "structs": [],
                "functions": [{
                    "id": "main", "kind": "cpu", "inputs": [], "outputs": [],
                    "nodes": [
                        {"id": "a", "op": "literal", "value": 1.0},
                        {"id": "b", "op": "literal", "value": 2.0},
                        {"id": "c", "op": "math_add", "a": "a", "b": "b"}
                    ]
                }]
            }"#,
        );
        assert!(Validator::new(&d).validate().is_empty());
    }
}
