//! WGSL-style device source generator (spec.md §5.2).
//!
//! Emits a compute/vertex/fragment entry point with the fixed binding
//! layout and the flat-arg unpacking preamble, then a straight-line
//! rendering of each node in execution order. Source text only — handing
//! this to a real `wgpu`/`naga` pipeline is the `CompileService`'s job,
//! out of scope here (spec.md §1 Non-goals).

use crate::codegen::common::{self, BodyEmitter, ExprEmitter, Target};
use crate::document::{Document, Function, FunctionKind};
use crate::marshal::binding_layout;
use crate::types::ValueType;

pub struct WgslGenerator;

impl ExprEmitter for WgslGenerator {
    fn type_name(&self, ty: &ValueType) -> String {
        match ty {
            ValueType::Float => "f32".to_string(),
            ValueType::Int => "i32".to_string(),
            ValueType::Bool => "bool".to_string(),
            ValueType::Str => "/* string: host-only */".to_string(),
            ValueType::Float2 => "vec2<f32>".to_string(),
            ValueType::Float3 => "vec3<f32>".to_string(),
            ValueType::Float4 => "vec4<f32>".to_string(),
            ValueType::Int2 => "vec2<i32>".to_string(),
            ValueType::Int3 => "vec3<i32>".to_string(),
            ValueType::Int4 => "vec4<i32>".to_string(),
            ValueType::Float3x3 => "mat3x3<f32>".to_string(),
            ValueType::Float4x4 => "mat4x4<f32>".to_string(),
            ValueType::Array(elem, n) => format!("array<{}, {n}>", self.type_name(elem)),
            ValueType::Struct(id) => id.clone(),
        }
    }
}

impl WgslGenerator {
    pub fn generate(&self, doc: &Document, func: &Function) -> String {
        let layout = binding_layout(doc);
        let mut out = String::new();
        out.push_str(&common::binding_layout_comment(&layout));
        out.push_str("struct FlatArgs {\n    data: array<f32>,\n};\n");
        out.push_str("@group(0) @binding(0) var<storage, read> flat_args: FlatArgs;\n");
        for (slot, id) in layout.slots.iter().enumerate().skip(1) {
            out.push_str(&format!(
                "@group(0) @binding({slot}) var<storage, read_write> res_{id}: array<f32>;\n"
            ));
        }

        let entry_attr = match func.kind {
            FunctionKind::Shader => {
                let wg = func.workgroup_size.unwrap_or([1, 1, 1]);
                format!("@compute @workgroup_size({}, {}, {})", wg[0], wg[1], wg[2])
            }
            FunctionKind::Vertex => "@vertex".to_string(),
            FunctionKind::Fragment => "@fragment".to_string(),
            FunctionKind::Cpu => String::new(),
        };
        out.push_str(&format!("\n{entry_attr}\nfn {}(@builtin(global_invocation_id) thread_id: vec3<u32>) {{\n", sanitize(&func.id)));

        for local in common::unpack_plan(func) {
            out.push_str(&format!(
                "    let {} = flat_args.data[{}]; // {} lane(s)\n",
                sanitize(&local.name),
                local.offset,
                local.lanes
            ));
        }

        let body = BodyEmitter::new(doc, func, self, Target::Device);
        out.push_str(&body.emit_entry_block(1));

        out.push_str("}\n");
        out
    }
}

fn sanitize(id: &str) -> String {
    id.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Param};

    #[test]
    fn shader_function_emits_workgroup_size_attribute() {
        let doc = Document::from_json_str(
            r#"{"version":"1","entryPoint":"main","resources":[],"structs":[],
               "functions":[{"id":"main","kind":"shader","inputs":[],"outputs":[],
               "workgroupSize":[8,8,1],"nodes":[]}]}"#,
        )
        .unwrap();
        let f = doc.function("main").unwrap();
        let src = WgslGenerator.generate(&doc, f);
        assert!(src.contains("@workgroup_size(8, 8, 1)"));
    }

    #[test]
    fn unpack_preamble_includes_declared_inputs() {
        let mut doc = Document::from_json_str(
            r#"{"version":"1","entryPoint":"main","resources":[],"structs":[],
               "functions":[{"id":"main","kind":"shader","inputs":[],"outputs":[],"nodes":[]}]}"#,
        )
        .unwrap();
        doc.functions[0].inputs.push(Param { name: "speed".to_string(), type_name: "float".to_string() });
        let f = doc.function("main").unwrap();
        let src = WgslGenerator.generate(&doc, f);
        assert!(src.contains("let speed ="));
    }
}
