//! Native shading-language generator (spec.md §5.2) — an MSL/HLSL-shaped
//! dialect: braces, `float3`/`float4x4` constructor syntax, C-style
//! function declarations. Shares the ABI/binding contract in
//! `codegen::common` with `codegen::wgsl`; only the surface syntax
//! differs.

use crate::codegen::common::{self, BodyEmitter, ExprEmitter, Target};
use crate::document::{Document, Function, FunctionKind};
use crate::marshal::binding_layout;
use crate::types::ValueType;

pub struct NativeGenerator;

impl ExprEmitter for NativeGenerator {
    fn type_name(&self, ty: &ValueType) -> String {
        match ty {
            ValueType::Float => "float".to_string(),
            ValueType::Int => "int".to_string(),
            ValueType::Bool => "bool".to_string(),
            ValueType::Str => "/* string: host-only */".to_string(),
            ValueType::Float2 => "float2".to_string(),
            ValueType::Float3 => "float3".to_string(),
            ValueType::Float4 => "float4".to_string(),
            ValueType::Int2 => "int2".to_string(),
            ValueType::Int3 => "int3".to_string(),
            ValueType::Int4 => "int4".to_string(),
            ValueType::Float3x3 => "float3x3".to_string(),
            ValueType::Float4x4 => "float4x4".to_string(),
            ValueType::Array(elem, n) => format!("{}[{n}]", self.type_name(elem)),
            ValueType::Struct(id) => id.clone(),
        }
    }

    fn array_literal(&self, elem_ty: &ValueType, _n: usize, args: &[String]) -> String {
        let _ = elem_ty;
        format!("{{ {} }}", args.join(", "))
    }

    fn local_decl(&self, name: &str, ty_name: &str) -> String {
        format!("{ty_name} {name}")
    }

    fn for_loop_header(&self, var: &str, start: &str, end: &str) -> String {
        format!("for (int {var} = {start}; {var} < {end}; {var}++)")
    }

    fn atomic_call(&self, op: &str, ref_expr: &str, operand: Option<&str>) -> String {
        match operand {
            None => format!("atomic_load_explicit(&{ref_expr}, memory_order_relaxed)"),
            Some(v) => match op {
                "store" => format!("atomic_store_explicit(&{ref_expr}, {v}, memory_order_relaxed)"),
                "add" => format!("atomic_fetch_add_explicit(&{ref_expr}, {v}, memory_order_relaxed)"),
                "sub" => format!("atomic_fetch_sub_explicit(&{ref_expr}, {v}, memory_order_relaxed)"),
                "min" => format!("atomic_fetch_min_explicit(&{ref_expr}, {v}, memory_order_relaxed)"),
                "max" => format!("atomic_fetch_max_explicit(&{ref_expr}, {v}, memory_order_relaxed)"),
                "exchange" => format!("atomic_exchange_explicit(&{ref_expr}, {v}, memory_order_relaxed)"),
                _ => format!("/* unknown atomic op {op} */"),
            },
        }
    }
}

impl NativeGenerator {
    pub fn generate(&self, doc: &Document, func: &Function) -> String {
        let layout = binding_layout(doc);
        let mut out = String::new();
        out.push_str(&common::binding_layout_comment(&layout));
        out.push_str("struct FlatArgs { float data[]; };\n");
        for (slot, id) in layout.slots.iter().enumerate().skip(1) {
            out.push_str(&format!("// binding({slot}) buffer res_{id}\n"));
        }

        let qualifier = match func.kind {
            FunctionKind::Shader => "kernel",
            FunctionKind::Vertex => "vertex",
            FunctionKind::Fragment => "fragment",
            FunctionKind::Cpu => "",
        };
        out.push_str(&format!("\n{qualifier} void {}(uint3 thread_id) {{\n", func.id));

        for local in common::unpack_plan(func) {
            out.push_str(&format!("    float {} = flat_args.data[{}]; // {} lane(s)\n", local.name, local.offset, local.lanes));
        }

        let body = BodyEmitter::new(doc, func, self, Target::Device);
        out.push_str(&body.emit_entry_block(1));

        out.push_str("}\n");
        out
    }

    pub fn generate_host(&self, doc: &Document, func: &Function) -> String {
        common::generate_host_driver(doc, func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    #[test]
    fn kernel_qualifier_used_for_shader_functions() {
        let doc = Document::from_json_str(
            r#"{"version":"1","entryPoint":"main","resources":[],"structs":[],
               "functions":[{"id":"main","kind":"shader","inputs":[],"outputs":[],"nodes":[]}]}"#,
        )
        .unwrap();
        let f = doc.function("main").unwrap();
        let src = NativeGenerator.generate(&doc, f);
        assert!(src.starts_with("// binding layout") || src.contains("kernel void main"));
        assert!(src.contains("kernel void main"));
    }

    #[test]
    fn cpu_function_host_driver_translates_dispatch_commands() {
        let doc = Document::from_json_str(
            r#"{"version":"1","entryPoint":"main","resources":[],"structs":[],
               "functions":[{"id":"main","kind":"cpu","inputs":[],"outputs":[],
               "nodes":[{"id":"d0","op":"cmd_dispatch","shader":"fill","threads":[64,1,1]}]}]}"#,
        )
        .unwrap();
        let f = doc.function("main").unwrap();
        let src = NativeGenerator.generate_host(&doc, f);
        assert!(src.contains("dispatch_shader"));
    }
}
