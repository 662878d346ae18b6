//! The flat-ABI marshaller (spec.md §4.6): encodes a function's input
//! values plus CPU-injected builtins into one float buffer in the
//! document's canonical order, and assigns resources to fixed binding
//! slots.
//!
//! Grounded on the teacher's `clock.rs::Clock` (generalized here to feed
//! every CPU-injected builtin, not just wall time) for the time source;
//! the flattening table itself is new (spec.md §4.6 "Flat-ABI Encoding
//! Table"), using `bytemuck` for the final `f32 -> [u8]` cast the way the
//! rest of this domain's corpus moves typed buffers to byte slices.

use std::time::Instant;

use crate::document::{Document, Function};
use crate::value::Value;

/// CPU-injected builtins, in the fixed order spec.md §4.6 places them
/// after user inputs and before `output_size`.
pub const CPU_BUILTINS: &[&str] = &["time", "delta_time", "bpm", "beat_number", "beat_delta"];

/// Tracks wall time and the current tempo/beat/output-size state that
/// feeds `builtin_get` and the flat-ABI buffer's builtin section.
pub struct Clock {
    start: Instant,
    last_tick: f64,
    bpm: f64,
    output_size: (u32, u32),
}

impl Clock {
    pub fn new(bpm: f64, output_size: (u32, u32)) -> Clock {
        Clock { start: Instant::now(), last_tick: 0.0, bpm, output_size }
    }

    fn seconds(&self) -> f64 {
        let e = self.start.elapsed();
        (e.as_secs() as f64) + (0.000_000_001 * e.subsec_nanos() as f64)
    }

    pub fn set_output_size(&mut self, size: (u32, u32)) {
        self.output_size = size;
    }

    /// Advance the clock one host frame, returning the elapsed
    /// `delta_time` since the previous tick (spec.md §4.6 "delta_time").
    pub fn tick(&mut self) -> f64 {
        let now = self.seconds();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    fn beat(&self) -> f64 {
        self.seconds() * self.bpm / 60.0
    }

    pub fn builtin(&self, name: &str) -> Option<Value> {
        match name {
            "time" => Some(Value::Float(self.seconds())),
            "delta_time" => Some(Value::Float(self.seconds() - self.last_tick)),
            "bpm" => Some(Value::Float(self.bpm)),
            "beat_number" => Some(Value::Int(self.beat().floor() as i64)),
            "beat_delta" => Some(Value::Float(self.beat().fract())),
            "output_size" => Some(Value::Float2([self.output_size.0 as f64, self.output_size.1 as f64])),
            _ => None,
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new(120.0, (1, 1))
    }
}

/// The set of builtin names a function actually reads, collected from its
/// `builtin_get` nodes' `name` argument.
fn referenced_builtins(func: &Function) -> std::collections::HashSet<String> {
    func.nodes
        .iter()
        .filter(|n| n.op == "builtin_get")
        .filter_map(|n| n.args.get("name"))
        .filter_map(|v| v.as_str())
        .map(|s| s.to_string())
        .collect()
}

/// Canonical input ordering for the flat-ABI buffer (spec.md §4.6): the
/// function's declared user inputs in declaration order, then the
/// CPU-injected builtins the function actually references, then
/// `output_size` if referenced.
pub fn canonical_input_order(func: &Function) -> Vec<String> {
    let referenced = referenced_builtins(func);
    let mut names: Vec<String> = func.inputs.iter().map(|p| p.name.clone()).collect();
    names.extend(CPU_BUILTINS.iter().filter(|b| referenced.contains(**b)).map(|s| s.to_string()));
    if referenced.contains("output_size") {
        names.push("output_size".to_string());
    }
    names
}

/// Flatten a function's resolved input values plus the clock's builtins
/// into one `f32` lane sequence, in canonical order.
pub fn flatten_args(func: &Function, inputs: &std::collections::HashMap<String, Value>, clock: &Clock) -> Vec<f32> {
    let mut lanes = Vec::new();
    for name in canonical_input_order(func) {
        let value = inputs.get(&name).cloned().or_else(|| clock.builtin(&name));
        if let Some(v) = value {
            lanes.extend(v.flatten_lanes());
        }
    }
    lanes
}

pub fn flatten_to_bytes(lanes: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(lanes).to_vec()
}

/// Fixed binding-slot layout (spec.md §4.6): slot 0 is always the flat
/// argument buffer; slots 1.. are resources in the order the `CppGenerator`
/// (here, `codegen::native`) declares them, which is simply document
/// declaration order.
pub struct BindingLayout {
    pub slots: Vec<String>,
}

pub fn binding_layout(doc: &Document) -> BindingLayout {
    let mut slots = vec!["<flat-args>".to_string()];
    slots.extend(doc.resources.iter().map(|r| r.id.clone()));
    BindingLayout { slots }
}

impl BindingLayout {
    pub fn slot_of(&self, resource_id: &str) -> Option<usize> {
        self.slots.iter().position(|s| s == resource_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Param};
    use std::collections::HashMap;

    fn sample_func() -> Function {
        Function {
            id: "main".to_string(),
            kind: crate::document::FunctionKind::Shader,
            inputs: vec![Param { name: "speed".to_string(), type_name: "float".to_string() }],
            outputs: vec![],
            workgroup_size: None,
            local_vars: vec![],
            nodes: vec![],
        }
    }

    fn sample_func_referencing_bpm_and_output_size() -> Function {
        let mut func = sample_func();
        func.nodes.push(crate::document::Node {
            id: "b".to_string(),
            op: "builtin_get".to_string(),
            exec_in: None,
            exec_out: None,
            exec_true: None,
            exec_false: None,
            exec_body: None,
            exec_completed: None,
            next: None,
            comment: None,
            args: [("name".to_string(), serde_json::json!("bpm"))].into_iter().collect(),
        });
        func.nodes.push(crate::document::Node {
            id: "o".to_string(),
            op: "builtin_get".to_string(),
            exec_in: None,
            exec_out: None,
            exec_true: None,
            exec_false: None,
            exec_body: None,
            exec_completed: None,
            next: None,
            comment: None,
            args: [("name".to_string(), serde_json::json!("output_size"))].into_iter().collect(),
        });
        func
    }

    #[test]
    fn canonical_order_places_referenced_builtins_after_inputs_and_output_size_last() {
        let order = canonical_input_order(&sample_func_referencing_bpm_and_output_size());
        assert_eq!(order.first().unwrap(), "speed");
        assert_eq!(order.last().unwrap(), "output_size");
        assert!(order.contains(&"bpm".to_string()));
    }

    #[test]
    fn canonical_order_omits_unreferenced_builtins() {
        let order = canonical_input_order(&sample_func());
        assert_eq!(order, vec!["speed".to_string()]);
    }

    #[test]
    fn flatten_args_includes_user_input_and_builtin_lanes() {
        let func = sample_func_referencing_bpm_and_output_size();
        let mut inputs = HashMap::new();
        inputs.insert("speed".to_string(), Value::Float(2.0));
        let clock = Clock::default();
        let lanes = flatten_args(&func, &inputs, &clock);
        assert_eq!(lanes[0], 2.0);
        assert!(lanes.len() > 1);
    }

    #[test]
    fn binding_slot_zero_is_reserved_for_flat_args() {
        let doc = Document::from_json_str(
            r#"{
                "version": "1", "entryPoint": "main",
                "resources": [{"id": "buf", "kind": "buffer", "elementType": "float", "size": 2}],
                "structs": [], "functions": []
            }"#,
        )
        .unwrap();
        let layout = binding_layout(&doc);
        assert_eq!(layout.slot_of("buf"), Some(1));
    }
}
