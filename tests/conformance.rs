//! End-to-end scenarios (a)-(f) from spec.md §8, driven through the public
//! `Engine` facade and `ReferenceRuntime` the same way an embedder would:
//! load a document, validate it, then either execute a `cpu` function
//! directly or simulate the host-driver dispatch/resize calls a `shader`
//! function's generated driver would issue against `RuntimeContext`.

use std::collections::HashMap;

use shadeflow::document::Document;
use shadeflow::marshal::Clock;
use shadeflow::resources;
use shadeflow::runtime::{ReferenceRuntime, RuntimeContext};
use shadeflow::value::Value;
use shadeflow::Engine;

fn build_runtime(doc: &Document) -> ReferenceRuntime<'_> {
    let store = resources::build_from_document(doc).unwrap();
    ReferenceRuntime::new(doc, store, Clock::default())
}

/// (a) Buffer resize then GPU write: resize `b_output` from 2 to 10, then
/// dispatch a shader storing `gid.x` as float at `b_output[gid.x]`.
#[test]
fn scenario_a_resize_then_dispatch_fills_buffer_with_thread_ids() {
    let doc = Document::from_json_str(
        r#"{
            "version": "1", "entryPoint": "main", "resources": [
                {"id": "b_output", "kind": "buffer", "elementType": "float", "size": 2}
            ], "structs": [],
            "functions": [
                {"id": "main", "kind": "cpu", "inputs": [], "outputs": [], "nodes": []},
                {"id": "shader_fill", "kind": "shader", "inputs": [], "outputs": [], "nodes": [
                    {"id": "gid", "op": "builtin_get", "name": "gid"},
                    {"id": "as_float", "op": "cast_float", "value": "gid.x"},
                    {"id": "store", "op": "buffer_store", "buffer": "b_output", "index": "gid.x", "value": "as_float"}
                ]}
            ]
        }"#,
    )
    .unwrap();

    let mut runtime = build_runtime(&doc);
    runtime.resize("b_output", (10, 1), false).unwrap();
    runtime.dispatch_shader("shader_fill", 10, 1, 1, &[]).unwrap();

    let stored = runtime.resources.get("b_output").unwrap();
    assert_eq!(stored.buffer_len(), 10);
    for i in 0..10i64 {
        assert_eq!(stored.buffer_load(i).unwrap(), Value::Float(i as f64));
    }
}

/// (b) Atomic accumulation: 64 invocations each `atomic_add(cnt, 0, 1)`,
/// then a second dispatch reads the counter into `b_res[0]`.
#[test]
fn scenario_b_atomic_accumulation_across_sixty_four_threads() {
    let doc = Document::from_json_str(
        r#"{
            "version": "1", "entryPoint": "main", "resources": [
                {"id": "cnt", "kind": "atomic_counter", "elementType": "int", "size": 1},
                {"id": "b_res", "kind": "buffer", "elementType": "int", "size": 1}
            ], "structs": [],
            "functions": [
                {"id": "main", "kind": "cpu", "inputs": [], "outputs": [], "nodes": []},
                {"id": "shader_add", "kind": "shader", "inputs": [], "outputs": [], "nodes": [
                    {"id": "one", "op": "literal", "value": 1},
                    {"id": "add", "op": "atomic_add", "counter": "cnt", "index": 0, "value": "one"}
                ]},
                {"id": "shader_read", "kind": "shader", "inputs": [], "outputs": [], "nodes": [
                    {"id": "load", "op": "atomic_load", "counter": "cnt", "index": 0, "next": "store"},
                    {"id": "store", "op": "buffer_store", "buffer": "b_res", "index": 0, "value": "load"}
                ]}
            ]
        }"#,
    )
    .unwrap();

    let mut runtime = build_runtime(&doc);
    runtime.dispatch_shader("shader_add", 64, 1, 1, &[]).unwrap();
    runtime.dispatch_shader("shader_read", 1, 1, 1, &[]).unwrap();

    let res = runtime.resources.get("b_res").unwrap();
    assert_eq!(res.buffer_load(0).unwrap(), Value::Int(64));
}

/// (c) Struct extract: construct a `Particle { pos, vel }`, extract `pos`,
/// swizzle out `.x`, and store it.
#[test]
fn scenario_c_struct_field_extract_then_swizzle() {
    let source = r#"{
        "version": "1", "entryPoint": "main", "resources": [
            {"id": "b_result", "kind": "buffer", "elementType": "float", "size": 1}
        ],
        "structs": [{"id": "Particle", "members": [
            {"name": "pos", "type": "float2"},
            {"name": "vel", "type": "float2"}
        ]}],
        "functions": [{
            "id": "main", "kind": "cpu", "inputs": [], "outputs": [],
            "nodes": [
                {"id": "p", "op": "struct_construct", "type": "Particle", "fields": {"pos": [1.0, 2.0], "vel": [0.0, 0.0]}},
                {"id": "pos", "op": "struct_extract", "value": "p", "field": "pos"},
                {"id": "x", "op": "swizzle", "value": "pos", "pattern": "x"},
                {"id": "store", "op": "buffer_store", "buffer": "b_result", "index": 0, "value": "x"}
            ]
        }]
    }"#;

    let engine = Engine::load(source).unwrap();
    assert!(engine.validate().is_empty());
    let result = engine.execute("main", HashMap::new()).unwrap();
    assert_eq!(result.resources.get("b_result").unwrap().buffer_load(0).unwrap(), Value::Float(1.0));
}

/// (d) Static OOB detection: a fixed-size-2 buffer store at a literal
/// out-of-range index must be rejected by validation before execution.
#[test]
fn scenario_d_static_oob_store_fails_validation() {
    let source = r#"{
        "version": "1", "entryPoint": "main", "resources": [
            {"id": "buf", "kind": "buffer", "elementType": "float", "size": 2}
        ], "structs": [],
        "functions": [{
            "id": "main", "kind": "cpu", "inputs": [], "outputs": [],
            "nodes": [
                {"id": "val", "op": "literal", "value": 100.0},
                {"id": "store", "op": "buffer_store", "buffer": "buf", "index": 5, "value": "val"}
            ]
        }]
    }"#;
    let engine = Engine::load(source).unwrap();
    let errors = engine.validate();
    assert!(!errors.is_empty());
    assert!(errors.iter().any(|e| e.to_string().contains("Static OOB")));
    assert!(engine.execute("main", HashMap::new()).is_err());
}

/// (e) Division semantics: integer division truncates toward zero, float
/// division does not.
#[test]
fn scenario_e_division_semantics_differ_by_type() {
    let source = r#"{
        "version": "1", "entryPoint": "main", "resources": [], "structs": [],
        "functions": [
            {"id": "div_int", "kind": "cpu", "inputs": [], "outputs": [], "nodes": [
                {"id": "a", "op": "literal", "value": 7},
                {"id": "b", "op": "literal", "value": 2},
                {"id": "d", "op": "math_div", "a": "a", "b": "b"},
                {"id": "r", "op": "func_return", "value": "d"}
            ]},
            {"id": "div_float", "kind": "cpu", "inputs": [], "outputs": [], "nodes": [
                {"id": "a", "op": "literal", "value": 7.0},
                {"id": "b", "op": "literal", "value": 2.0},
                {"id": "d", "op": "math_div", "a": "a", "b": "b"},
                {"id": "r", "op": "func_return", "value": "d"}
            ]},
            {"id": "div_neg_int", "kind": "cpu", "inputs": [], "outputs": [], "nodes": [
                {"id": "a", "op": "literal", "value": -7},
                {"id": "b", "op": "literal", "value": 2},
                {"id": "d", "op": "math_div", "a": "a", "b": "b"},
                {"id": "r", "op": "func_return", "value": "d"}
            ]}
        ]
    }"#;
    let engine = Engine::load(source).unwrap();
    assert!(engine.validate().is_empty());

    assert_eq!(engine.execute("div_int", HashMap::new()).unwrap().returned, Some(Value::Int(3)));
    assert_eq!(engine.execute("div_float", HashMap::new()).unwrap().returned, Some(Value::Float(3.5)));
    assert_eq!(engine.execute("div_neg_int", HashMap::new()).unwrap().returned, Some(Value::Int(-3)));
}

/// (f) Matrix times vector: a float4x4 translation by `[10,20,0]` applied
/// to the homogeneous origin yields `[10,20,0,1]`.
#[test]
fn scenario_f_translation_matrix_times_homogeneous_point() {
    let source = r#"{
        "version": "1", "entryPoint": "main", "resources": [], "structs": [],
        "functions": [{
            "id": "main", "kind": "cpu", "inputs": [], "outputs": [],
            "nodes": [
                {"id": "m", "op": "mat_construct", "columns": [
                    [1.0, 0.0, 0.0, 0.0],
                    [0.0, 1.0, 0.0, 0.0],
                    [0.0, 0.0, 1.0, 0.0],
                    [10.0, 20.0, 0.0, 1.0]
                ]},
                {"id": "p", "op": "literal", "value": [0.0, 0.0, 0.0, 1.0]},
                {"id": "mul", "op": "mat_mul", "a": "m", "b": "p"},
                {"id": "r", "op": "func_return", "value": "mul"}
            ]
        }]
    }"#;
    let engine = Engine::load(source).unwrap();
    assert!(engine.validate().is_empty());
    let result = engine.execute("main", HashMap::new()).unwrap();
    assert_eq!(result.returned, Some(Value::Float4([10.0, 20.0, 0.0, 1.0])));
}

/// Thread-count semantics (spec.md §8 invariant 4): a dispatch of `[n,1,1]`
/// writes exactly invocations `0..n-1`; cells beyond `n` keep their prior
/// contents.
#[test]
fn dispatch_leaves_cells_beyond_thread_count_untouched() {
    let doc = Document::from_json_str(
        r#"{
            "version": "1", "entryPoint": "main", "resources": [
                {"id": "b_output", "kind": "buffer", "elementType": "float", "size": 10, "clearValue": -1.0}
            ], "structs": [],
            "functions": [
                {"id": "main", "kind": "cpu", "inputs": [], "outputs": [], "nodes": []},
                {"id": "shader_fill", "kind": "shader", "inputs": [], "outputs": [], "nodes": [
                    {"id": "gid", "op": "builtin_get", "name": "gid"},
                    {"id": "as_float", "op": "cast_float", "value": "gid.x"},
                    {"id": "store", "op": "buffer_store", "buffer": "b_output", "index": "gid.x", "value": "as_float"}
                ]}
            ]
        }"#,
    )
    .unwrap();

    let mut runtime = build_runtime(&doc);
    runtime.dispatch_shader("shader_fill", 4, 1, 1, &[]).unwrap();

    let res = runtime.resources.get("b_output").unwrap();
    for i in 0..4i64 {
        assert_eq!(res.buffer_load(i).unwrap(), Value::Float(i as f64));
    }
    for i in 4..10i64 {
        assert_eq!(res.buffer_load(i).unwrap(), Value::Float(-1.0));
    }
}
