//! Edge normalization (spec.md §9 Design Notes, §3 "Edges").
//!
//! The document surface represents edges implicitly: a string-valued
//! argument that equals a sibling node's id (optionally followed by
//! `.<swizzle>`) is a data reference; execution-flow fields are execution
//! references. This module normalizes a function's nodes into an explicit
//! `Edge` list so the validator and evaluator never have to re-derive "is
//! this string a reference or a literal" themselves, and canonicalizes the
//! handful of fields spec.md §9 notes have multiple spellings for across
//! document vintages.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::document::{Function, Node};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    Data,
    Exec,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    pub from: String,
    /// `Some(swizzle)` when the reference carried a `.xyz`-style suffix.
    pub from_port: Option<String>,
    pub to: String,
    pub to_port: String,
    pub kind: EdgeKind,
}

/// Split a reference like `particle.xy` into (`particle`, `Some("xy")`).
pub(crate) fn split_swizzle(reference: &str) -> (&str, Option<&str>) {
    match reference.split_once('.') {
        Some((base, suffix)) => (base, Some(suffix)),
        None => (reference, None),
    }
}

/// True if `text` names an existing node in `func`, optionally with a
/// `.swizzle` suffix — the rule spec.md §3 uses to distinguish a data
/// reference from a literal string argument.
pub fn is_data_reference(func: &Function, text: &str) -> bool {
    let (base, _) = split_swizzle(text);
    func.node(base).is_some()
}

/// Build the explicit edge list for one function: an execution edge per set
/// `exec_*`/`next` field, and a data edge per string-valued argument that
/// resolves to a sibling node id.
pub fn normalize_function(func: &Function) -> Vec<Edge> {
    let mut edges = Vec::new();

    for node in &func.nodes {
        for (field, target) in node.exec_targets() {
            edges.push(Edge {
                from: node.id.clone(),
                from_port: None,
                to: target.to_string(),
                to_port: field.to_string(),
                kind: EdgeKind::Exec,
            });
        }

        for (arg_name, value) in &node.args {
            if let Json::String(text) = value {
                let (base, swizzle) = split_swizzle(text);
                if func.node(base).is_some() {
                    edges.push(Edge {
                        from: base.to_string(),
                        from_port: swizzle.map(|s| s.to_string()),
                        to: node.id.clone(),
                        to_port: arg_name.clone(),
                        kind: EdgeKind::Data,
                    });
                }
            }
        }
    }

    edges
}

/// Named spellings for a `cmd_dispatch` node's thread-count argument
/// (spec.md §9 Open Question): `threads` and `dispatch` are both accepted.
const DISPATCH_SIZE_ALIASES: &[&str] = &["threads", "dispatch"];

/// Resolve a `cmd_dispatch` node's thread-count argument under any of its
/// accepted spellings. Falls back to a bare `[x, y, z]` array carried under
/// some other, unrecognized key — the third accepted vintage (spec.md §9
/// Open Question) — but only when exactly one such 3-element numeric array
/// argument exists; an ambiguous node (more than one candidate array) is left
/// unresolved rather than guessed at, surfacing as a missing-argument error
/// from the validator.
pub fn resolve_dispatch_threads(node: &Node) -> Option<&Json> {
    if let Some(v) = DISPATCH_SIZE_ALIASES.iter().find_map(|key| node.args.get(*key)) {
        return Some(v);
    }
    let is_dim_triple = |v: &&Json| matches!(v, Json::Array(a) if a.len() == 3 && a.iter().all(|x| x.is_number()));
    let mut candidates = node.args.values().filter(is_dim_triple);
    let first = candidates.next()?;
    if candidates.next().is_some() {
        return None;
    }
    Some(first)
}

/// `math_step`'s second operand is spelled `x` in some document vintages and
/// `val` in others (spec.md §9 Open Question); both are accepted as an
/// alias set, any other key name is rejected.
const MATH_STEP_VALUE_ALIASES: &[&str] = &["x", "val"];

pub fn resolve_math_step_value(node: &Node) -> Option<&Json> {
    MATH_STEP_VALUE_ALIASES.iter().find_map(|key| node.args.get(*key))
}

/// `quat` nodes must carry exactly one of the axis/angle form (`axis` +
/// `angle`) or the xyzw form (`x`, `y`, `z`, `w`) — spec.md §9 Open Question.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuatForm {
    AxisAngle,
    Xyzw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuatFormError {
    NeitherFormPresent,
    BothFormsPresent,
}

pub fn resolve_quat_form(node: &Node) -> Result<QuatForm, QuatFormError> {
    let has_axis_angle = node.args.contains_key("axis") && node.args.contains_key("angle");
    let has_xyzw = ["x", "y", "z", "w"].iter().all(|k| node.args.contains_key(*k));
    match (has_axis_angle, has_xyzw) {
        (true, false) => Ok(QuatForm::AxisAngle),
        (false, true) => Ok(QuatForm::Xyzw),
        (false, false) => Err(QuatFormError::NeitherFormPresent),
        (true, true) => Err(QuatFormError::BothFormsPresent),
    }
}

/// Index edges by destination node+port for O(1) "what feeds this argument"
/// lookups during evaluation/codegen.
pub fn index_by_destination(edges: &[Edge]) -> HashMap<(String, String), &Edge> {
    edges.iter().map(|e| ((e.to.clone(), e.to_port.clone()), e)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Function, FunctionKind};
    use serde_json::json;

    fn node(id: &str, op: &str, args: &[(&str, Json)]) -> Node {
        Node {
            id: id.to_string(),
            op: op.to_string(),
            exec_in: None,
            exec_out: None,
            exec_true: None,
            exec_false: None,
            exec_body: None,
            exec_completed: None,
            next: None,
            comment: None,
            args: args.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    #[test]
    fn data_reference_detected_via_sibling_node_id() {
        let f = Function {
            id: "main".into(),
            kind: FunctionKind::Shader,
            inputs: vec![],
            outputs: vec![],
            workgroup_size: None,
            local_vars: vec![],
            nodes: vec![
                node("a", "literal", &[("value", json!(1.0))]),
                node("b", "math_neg", &[("value", json!("a"))]),
            ],
        };
        let edges = normalize_function(&f);
        assert!(edges.iter().any(|e| e.from == "a" && e.to == "b" && e.kind == EdgeKind::Data));
    }

    #[test]
    fn swizzle_suffix_is_split_from_the_base_reference() {
        let f = Function {
            id: "main".into(),
            kind: FunctionKind::Shader,
            inputs: vec![],
            outputs: vec![],
            workgroup_size: None,
            local_vars: vec![],
            nodes: vec![
                node("p", "literal", &[]),
                node("b", "math_neg", &[("value", json!("p.xy"))]),
            ],
        };
        let edges = normalize_function(&f);
        let e = edges.iter().find(|e| e.to == "b").unwrap();
        assert_eq!(e.from_port.as_deref(), Some("xy"));
    }

    #[test]
    fn dispatch_threads_accepts_legacy_key() {
        let n = node("d", "cmd_dispatch", &[("dispatch", json!([10, 1, 1]))]);
        assert_eq!(resolve_dispatch_threads(&n), Some(&json!([10, 1, 1])));
    }

    #[test]
    fn dispatch_threads_accepts_a_bare_unkeyed_triple() {
        let n = node("d", "cmd_dispatch", &[("shader", json!("fill")), ("size", json!([4, 1, 1]))]);
        assert_eq!(resolve_dispatch_threads(&n), Some(&json!([4, 1, 1])));
    }

    #[test]
    fn dispatch_threads_is_unresolved_when_two_triples_are_ambiguous() {
        let n = node("d", "cmd_dispatch", &[("a", json!([4, 1, 1])), ("b", json!([8, 1, 1]))]);
        assert_eq!(resolve_dispatch_threads(&n), None);
    }

    #[test]
    fn quat_rejects_both_forms_present() {
        let n = node(
            "q",
            "quat",
            &[("axis", json!([0, 1, 0])), ("angle", json!(1.0)), ("x", json!(0.0)), ("y", json!(0.0)), ("z", json!(0.0)), ("w", json!(1.0))],
        );
        assert_eq!(resolve_quat_form(&n), Err(QuatFormError::BothFormsPresent));
    }
}
