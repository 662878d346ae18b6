//! Shared contract between the device code generators (spec.md §5.2): the
//! fixed binding layout, the flat-float unpacking scheme, the node-body
//! renderer (`BodyEmitter`), and the cast/broadcast/select emission rules
//! every generator must agree on so the evaluator and a generated backend
//! can never silently diverge.
//!
//! `BodyEmitter` walks a function's nodes the same way `evaluator.rs` does
//! (data references resolved lazily and memoized per node id, execution
//! edges followed via `exec_out`/`next`) and renders the same op semantics
//! as source text instead of interpreting them. The WGSL and native
//! generators each supply a small `ExprEmitter` for their dialect's
//! constructor/local/loop/atomic syntax; the host driver gets its own
//! `HostEmitter`, which renders calls against `RuntimeContext` and `Value`
//! instead of flat device buffers.

use std::cell::RefCell;
use std::collections::HashMap;

use serde_json::Value as Json;

use crate::document::{Document, Function, Node, Param, ResourceSize};
use crate::edges::split_swizzle;
use crate::marshal::{self, BindingLayout};
use crate::types::{self, ValueType};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Device,
    Host,
}

/// Render a node expression tree into device source. Implemented per
/// target (`wgsl.rs`, `native.rs`, and the host driver's own `HostEmitter`
/// below); shared here only for the parts that must not drift between them.
pub trait ExprEmitter {
    /// The target's spelling of a value type (`vec3<f32>` for WGSL,
    /// `float3` for the native generator, etc.).
    fn type_name(&self, ty: &ValueType) -> String;

    /// `select(0, 1, expr)` is how spec.md §4.1 requires bool-as-numeric to
    /// be rendered in generated device code (never a native `bool` binary
    /// op), since device backends differ on whether `bool` participates
    /// in arithmetic at all.
    fn select_bool_numeric(&self, cond_expr: &str) -> String {
        format!("select(0.0, 1.0, {cond_expr})")
    }

    /// A type's constructor call with already-rendered argument expressions.
    fn constructor_call(&self, ty: &ValueType, args: &[String]) -> String {
        format!("{}({})", self.type_name(ty), args.join(", "))
    }

    /// A fixed-size array literal.
    fn array_literal(&self, elem_ty: &ValueType, n: usize, args: &[String]) -> String {
        format!("array<{}, {n}>({})", self.type_name(elem_ty), args.join(", "))
    }

    /// Declare a mutable local named `name` holding `ty_name`, without a
    /// trailing initializer or semicolon.
    fn local_decl(&self, name: &str, ty_name: &str) -> String {
        format!("var {name}: {ty_name}")
    }

    fn for_loop_header(&self, var: &str, start: &str, end: &str) -> String {
        format!("for (var {var}: i32 = {start}; {var} < {end}; {var} = {var} + 1)")
    }

    /// Atomic call syntax; `operand` is absent for `atomic_load`. Every
    /// variant returns the pre-modification value, matching
    /// `AtomicCell::rmw`'s documented contract.
    fn atomic_call(&self, op: &str, ref_expr: &str, operand: Option<&str>) -> String {
        match operand {
            None => format!("atomicLoad(&{ref_expr})"),
            Some(v) => match op {
                "store" => format!("atomicStore(&{ref_expr}, {v})"),
                "add" => format!("atomicAdd(&{ref_expr}, {v})"),
                "sub" => format!("atomicSub(&{ref_expr}, {v})"),
                "min" => format!("atomicMin(&{ref_expr}, {v})"),
                "max" => format!("atomicMax(&{ref_expr}, {v})"),
                "exchange" => format!("atomicExchange(&{ref_expr}, {v})"),
                _ => format!("/* unknown atomic op {op} */"),
            },
        }
    }
}

/// Emit the fixed binding-slot layout as a source comment block, shared
/// verbatim by both generators (spec.md §4.6: "slot 0 = flat args, slots
/// 1.. = resources in `CppGenerator` order").
pub fn binding_layout_comment(layout: &BindingLayout) -> String {
    let mut out = String::from("// binding layout:\n");
    for (slot, name) in layout.slots.iter().enumerate() {
        out.push_str(&format!("//   slot {slot}: {name}\n"));
    }
    out
}

/// The per-function flat-arg unpacking preamble: one named local per
/// canonical input (spec.md §5.2: "unpacks the flat float buffer into
/// named locals mirroring the marshaller"), with the byte offset each
/// local starts at.
pub struct UnpackedLocal {
    pub name: String,
    pub offset: usize,
    pub lanes: usize,
}

pub fn unpack_plan(func: &Function) -> Vec<UnpackedLocal> {
    let mut offset = 0;
    let mut out = Vec::new();
    for name in marshal::canonical_input_order(func) {
        let lanes = lanes_for_input(func, &name);
        out.push(UnpackedLocal { name, offset, lanes });
        offset += lanes;
    }
    out
}

fn lanes_for_input(func: &Function, name: &str) -> usize {
    if let Some(Param { type_name, .. }) = func.inputs.iter().find(|p| &p.name == name) {
        return crate::types::parse_type_name(type_name).lanes();
    }
    match name {
        "time" | "delta_time" | "bpm" | "beat_delta" | "beat_number" => 1,
        "output_size" => 2,
        _ => 1,
    }
}

/// Matrix element access is flat column-major in every generated target
/// (spec.md §4.1), so the index arithmetic string is shared verbatim.
pub fn column_major_index_expr(col_expr: &str, row_expr: &str, col_size: usize) -> String {
    format!("(({col_expr}) * {col_size} + ({row_expr}))")
}

/// `res_{id}` is the flat storage-buffer binding name both device
/// generators declare for a resource (spec.md §4.6).
pub fn resource_ident(id: &str) -> String {
    format!("res_{}", sanitize_ident(id))
}

pub fn sanitize_ident(id: &str) -> String {
    id.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect()
}

fn literal_expr(json: &Json) -> String {
    match json {
        Json::Bool(b) => b.to_string(),
        Json::Number(n) => {
            if n.is_i64() || n.is_u64() {
                n.to_string()
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    format!("{f}")
                }
            } else {
                "0".to_string()
            }
        }
        Json::String(s) => format!("\"{s}\""),
        Json::Array(items) => format!("[{}]", items.iter().map(literal_expr).collect::<Vec<_>>().join(", ")),
        _ => "0".to_string(),
    }
}

fn swizzle_result_type(base: &ValueType, pattern: &str) -> ValueType {
    let is_float = matches!(base.element_type(), ValueType::Float);
    match (pattern.len(), is_float) {
        (1, true) => ValueType::Float,
        (1, false) => ValueType::Int,
        (2, true) => ValueType::Float2,
        (2, false) => ValueType::Int2,
        (3, true) => ValueType::Float3,
        (3, false) => ValueType::Int3,
        (_, true) => ValueType::Float4,
        (_, false) => ValueType::Int4,
    }
}

/// Convert a rendered `Value`-typed host expression to a plain `i64`.
fn value_as_i64(expr: &str) -> String {
    format!("(({expr}).as_i64().unwrap_or(0))")
}

fn value_lane_i64(expr: &str, lane: usize) -> String {
    format!("(({expr}).lane({lane}).and_then(|v| v.as_i64()).unwrap_or(0))")
}

fn value_lane_f64(expr: &str, lane: usize) -> String {
    format!("(({expr}).lane({lane}).and_then(|v| v.as_f64()).unwrap_or(0.0))")
}

fn atomic_op_variant(name: &str) -> &'static str {
    match name {
        "add" => "Add",
        "sub" => "Sub",
        "min" => "Min",
        "max" => "Max",
        _ => "Exchange",
    }
}

enum BinForm {
    Operator(&'static str),
    Func(&'static str),
}

/// Body/expression renderer shared by both device dialects and the host
/// driver. One instance per function being rendered.
pub struct BodyEmitter<'a, E: ExprEmitter> {
    doc: &'a Document,
    func: &'a Function,
    emitter: &'a E,
    target: Target,
    exprs: RefCell<HashMap<String, String>>,
    types: RefCell<HashMap<String, ValueType>>,
    hoisted: RefCell<Vec<String>>,
}

impl<'a, E: ExprEmitter> BodyEmitter<'a, E> {
    pub fn new(doc: &'a Document, func: &'a Function, emitter: &'a E, target: Target) -> Self {
        BodyEmitter { doc, func, emitter, target, exprs: RefCell::new(HashMap::new()), types: RefCell::new(HashMap::new()), hoisted: RefCell::new(Vec::new()) }
    }

    fn ind(n: usize) -> String {
        "    ".repeat(n)
    }

    /// Render the function body starting at its entry node, at the given
    /// indent level (spec.md §4.4 execution order).
    pub fn emit_entry_block(&self, indent: usize) -> String {
        self.emit_block(self.func.entry_node().map(|n| n.id.as_str()), indent)
    }

    fn emit_block(&self, start: Option<&str>, indent: usize) -> String {
        let mut out = String::new();
        let mut current = start.map(|s| s.to_string());
        while let Some(id) = current {
            let Some(node) = self.func.node(&id) else { break };
            out.push_str(&self.emit_statement(node, indent));
            current = node.exec_out.clone().or_else(|| node.next.clone());
        }
        out
    }

    fn drain_hoisted(&self, indent: usize) -> String {
        let pad = Self::ind(indent);
        let mut buf = String::new();
        for line in self.hoisted.borrow_mut().drain(..) {
            buf.push_str(&pad);
            buf.push_str(&line);
            buf.push('\n');
        }
        buf
    }

    fn emit_statement(&self, node: &Node, indent: usize) -> String {
        let pad = Self::ind(indent);
        match node.op.as_str() {
            "var_set" => {
                let name = node.args.get("name").and_then(|v| v.as_str()).unwrap_or("");
                let value = self.resolve_operand(node, "value");
                let hoisted = self.drain_hoisted(indent);
                format!("{hoisted}{pad}{} = {value};\n", sanitize_ident(name))
            }
            "buffer_store" | "texture_store" => self.emit_store(node, indent),
            "flow_branch" => self.emit_branch(node, indent),
            "flow_loop" => self.emit_loop(node, indent),
            "call_func" => {
                let expr = self.emit_call_expr(node);
                let hoisted = self.drain_hoisted(indent);
                format!("{hoisted}{pad}{expr};\n")
            }
            "func_return" => {
                let value = if node.args.contains_key("value") { Some(self.resolve_operand(node, "value")) } else { None };
                let hoisted = self.drain_hoisted(indent);
                match value {
                    Some(v) => format!("{hoisted}{pad}return {v};\n"),
                    None => format!("{hoisted}{pad}return;\n"),
                }
            }
            "comment" => node.comment.as_deref().map(|c| format!("{pad}// {c}\n")).unwrap_or_default(),
            op if op.starts_with("cmd_") => {
                if self.target == Target::Host {
                    self.emit_cmd_call(node, indent)
                } else {
                    format!("{pad}// node {}: {op} (host-only, unreachable on device)\n", node.id)
                }
            }
            _ => {
                // Every other op is resolvable as a data expression
                // (`array_set`/atomic ops are evaluated and discarded here
                // exactly the way `evaluator.rs::exec_node`'s own fallback
                // arm resolves a stray pure node reached directly on the
                // exec chain).
                let expr = self.emit_expr(&node.id);
                let hoisted = self.drain_hoisted(indent);
                format!("{hoisted}{pad}{expr};\n")
            }
        }
    }

    fn emit_store(&self, node: &Node, indent: usize) -> String {
        let pad = Self::ind(indent);
        let field = if node.op == "buffer_store" { "buffer" } else { "texture" };
        let res_id = node.args.get(field).and_then(|v| v.as_str()).unwrap_or("");
        let index_field = if node.op == "buffer_store" { "index" } else { "coord" };
        let value = self.resolve_operand(node, "value");

        if self.target == Target::Host {
            let call = if node.op == "buffer_store" {
                let index = self.resolve_operand(node, index_field);
                format!("ctx.buffer_store(\"{res_id}\", {}, {value})?", value_as_i64(&index))
            } else {
                let coord = self.resolve_operand(node, index_field);
                format!("ctx.texture_store(\"{res_id}\", [{}, {}], {value})?", value_lane_i64(&coord, 0), value_lane_i64(&coord, 1))
            };
            let hoisted = self.drain_hoisted(indent);
            return format!("{hoisted}{pad}{call};\n");
        }

        let elem_ty = self.resource_element_type(res_id);
        let flat_index = self.flat_resource_index(node, index_field, res_id);
        let ident = resource_ident(res_id);
        let hoisted = self.drain_hoisted(indent);
        match elem_ty.lanes() {
            1 => format!("{hoisted}{pad}{ident}[{flat_index}] = {value};\n"),
            n => {
                let mut out = hoisted;
                for lane in 0..n {
                    out.push_str(&format!("{pad}{ident}[({flat_index}) * {n} + {lane}] = ({value})[{lane}];\n"));
                }
                out
            }
        }
    }

    fn emit_branch(&self, node: &Node, indent: usize) -> String {
        let pad = Self::ind(indent);
        let cond = self.resolve_operand(node, "cond");
        let hoisted = self.drain_hoisted(indent);
        let mut out = format!("{hoisted}{pad}if {cond} {{\n");
        out.push_str(&self.emit_block(node.exec_true.as_deref(), indent + 1));
        out.push_str(&pad.to_string());
        out.push('}');
        if node.exec_false.is_some() {
            out.push_str(" else {\n");
            out.push_str(&self.emit_block(node.exec_false.as_deref(), indent + 1));
            out.push_str(&pad.to_string());
            out.push('}');
        }
        out.push('\n');
        out
    }

    fn emit_loop(&self, node: &Node, indent: usize) -> String {
        let pad = Self::ind(indent);
        let tag = node.args.get("tag").and_then(|v| v.as_str()).unwrap_or(&node.id);
        let idx_var = loop_var_name(tag);
        let (start, end) = if node.args.contains_key("count") {
            let count = self.resolve_operand(node, "count");
            ("0".to_string(), count)
        } else {
            let s = if node.args.contains_key("start") { self.resolve_operand(node, "start") } else { "0".to_string() };
            let e = if node.args.contains_key("end") { self.resolve_operand(node, "end") } else { "0".to_string() };
            (s, e)
        };
        let hoisted = self.drain_hoisted(indent);
        let mut out = format!("{hoisted}{pad}{} {{\n", self.emitter.for_loop_header(&idx_var, &start, &end));
        out.push_str(&self.emit_block(node.exec_body.as_deref(), indent + 1));
        out.push_str(&format!("{pad}}}\n"));
        out
    }

    fn emit_call_expr(&self, node: &Node) -> String {
        let callee = node.args.get("function").and_then(|v| v.as_str()).unwrap_or("");
        let args: Vec<String> = node
            .args
            .get("args")
            .and_then(|v| v.as_object())
            .map(|m| m.values().map(|v| self.resolve_json(v)).collect())
            .unwrap_or_default();
        format!("{}({})", sanitize_ident(callee), args.join(", "))
    }

    fn emit_cmd_call(&self, node: &Node, indent: usize) -> String {
        let pad = Self::ind(indent);
        match node.op.as_str() {
            "cmd_dispatch" => {
                let shader = node.args.get("shader").and_then(|v| v.as_str()).unwrap_or("");
                let (dx, dy, dz) = match crate::edges::resolve_dispatch_threads(node) {
                    Some(Json::Array(a)) if a.len() == 3 => (literal_expr(&a[0]), literal_expr(&a[1]), literal_expr(&a[2])),
                    Some(other) => {
                        let e = self.resolve_json(other);
                        (value_lane_i64(&e, 0), value_lane_i64(&e, 1), value_lane_i64(&e, 2))
                    }
                    None => ("0".to_string(), "0".to_string(), "0".to_string()),
                };
                format!("{pad}ctx.dispatch_shader(\"{shader}\", ({dx}) as u32, ({dy}) as u32, ({dz}) as u32, flat_args)?;\n")
            }
            "cmd_draw" => {
                let target = node.args.get("target").and_then(|v| v.as_str()).unwrap_or("");
                let vs = node.args.get("vertex_shader").and_then(|v| v.as_str()).unwrap_or("");
                let fs = node.args.get("fragment_shader").and_then(|v| v.as_str()).unwrap_or("");
                let count = self.resolve_operand(node, "count");
                format!("{pad}ctx.draw(\"{target}\", \"{vs}\", \"{fs}\", ({}) as u32, flat_args)?;\n", value_as_i64(&count))
            }
            "cmd_resize_resource" => {
                let resource = node.args.get("resource").and_then(|v| v.as_str()).unwrap_or("");
                let (w, h) = match node.args.get("size") {
                    Some(Json::Array(a)) if a.len() == 2 => (literal_expr(&a[0]), literal_expr(&a[1])),
                    Some(Json::Array(a)) if a.len() == 1 => (literal_expr(&a[0]), "1".to_string()),
                    Some(other) => {
                        let e = self.resolve_json(other);
                        (value_lane_i64(&e, 0), value_lane_i64(&e, 1))
                    }
                    None => ("0".to_string(), "0".to_string()),
                };
                format!("{pad}ctx.resize(\"{resource}\", (({w}) as u32, ({h}) as u32), false)?;\n")
            }
            "cmd_copy_buffer" => {
                let src = node.args.get("src").and_then(|v| v.as_str()).unwrap_or("");
                let dst = node.args.get("dst").and_then(|v| v.as_str()).unwrap_or("");
                format!("{pad}ctx.copy_buffer(\"{src}\", \"{dst}\")?;\n")
            }
            "cmd_sync_to_cpu" => {
                let resource = node.args.get("resource").and_then(|v| v.as_str()).unwrap_or("");
                format!("{pad}// cmd_sync_to_cpu {resource}: host read barrier, no separate memory domain in this driver\n")
            }
            "cmd_wait_cpu_sync" => {
                let resource = node.args.get("resource").and_then(|v| v.as_str()).unwrap_or("");
                format!("{pad}// cmd_wait_cpu_sync {resource}: readback already observable\n")
            }
            _ => String::new(),
        }
    }

    // ---- expressions ----

    /// Resolve an argument field to a rendered expression: a sibling-node
    /// data reference (with optional `.swizzle`), or a literal.
    fn resolve_operand(&self, node: &Node, field: &str) -> String {
        match node.args.get(field) {
            Some(json) => self.resolve_json(json),
            None => "0".to_string(),
        }
    }

    fn resolve_json(&self, json: &Json) -> String {
        if let Json::String(text) = json {
            let (base, swizzle) = split_swizzle(text);
            if self.func.node(base).is_some() {
                let expr = self.emit_expr(base);
                return match swizzle {
                    Some(pattern) => format!("({expr}).{pattern}"),
                    None => expr,
                };
            }
        }
        literal_expr(json)
    }

    /// Memoized expression for a node id: computed once, cached, and
    /// reused by every sibling that references it — so a side-effecting op
    /// reached only via data references (`array_set`, the atomic RMW family)
    /// still executes exactly once regardless of fan-out.
    fn emit_expr(&self, node_id: &str) -> String {
        if let Some(cached) = self.exprs.borrow().get(node_id) {
            return cached.clone();
        }
        let expr = match self.func.node(node_id) {
            Some(node) => self.emit_expr_uncached(node),
            None => "0".to_string(),
        };
        self.exprs.borrow_mut().insert(node_id.to_string(), expr.clone());
        expr
    }

    fn hoist_temp_name(&self, node: &Node) -> String {
        format!("_t_{}", sanitize_ident(&node.id))
    }

    fn hoist_as_temp(&self, node: &Node, ty: &ValueType, init_expr: &str) -> String {
        let tmp = self.hoist_temp_name(node);
        let decl = self.emitter.local_decl(&tmp, &self.emitter.type_name(ty));
        self.hoisted.borrow_mut().push(format!("{decl} = {init_expr};"));
        tmp
    }

    fn emit_expr_uncached(&self, node: &Node) -> String {
        match node.op.as_str() {
            "literal" => literal_expr(node.args.get("value").unwrap_or(&Json::Null)),
            "var_get" => sanitize_ident(node.args.get("name").and_then(|v| v.as_str()).unwrap_or("")),
            "builtin_get" => {
                let name = node.args.get("name").and_then(|v| v.as_str()).unwrap_or("");
                if name == "gid" {
                    self.gid_expr()
                } else {
                    sanitize_ident(name)
                }
            }
            "const_get" => match node.args.get("name").and_then(|v| v.as_str()) {
                Some("pi") => format!("{:.17}", std::f64::consts::PI),
                Some("tau") => format!("{:.17}", std::f64::consts::TAU),
                Some("e") => format!("{:.17}", std::f64::consts::E),
                _ => "0.0".to_string(),
            },
            "loop_index" => loop_var_name(node.args.get("tag").and_then(|v| v.as_str()).unwrap_or(&node.id)),
            "math_step" => {
                let edge = self.resolve_operand(node, "edge");
                let x = crate::edges::resolve_math_step_value(node).map(|j| self.resolve_json(j)).unwrap_or_else(|| "0".to_string());
                format!("step({edge}, {x})")
            }
            "math_neg" => format!("-({})", self.resolve_operand(node, "value")),
            "math_abs" => self.unary_func("abs", node),
            "math_sqrt" => self.unary_func("sqrt", node),
            "math_floor" => self.unary_func("floor", node),
            "math_ceil" => self.unary_func("ceil", node),
            "math_sin" => self.unary_func("sin", node),
            "math_cos" => self.unary_func("cos", node),
            "math_add" => self.numeric_binary(node, BinForm::Operator("+")),
            "math_sub" => self.numeric_binary(node, BinForm::Operator("-")),
            "math_mul" => self.numeric_binary(node, BinForm::Operator("*")),
            "math_div" => self.numeric_binary(node, BinForm::Operator("/")),
            "math_mod" => self.numeric_binary(node, BinForm::Operator("%")),
            "math_pow" => self.numeric_binary(node, BinForm::Func("pow")),
            "math_atan2" => self.numeric_binary(node, BinForm::Func("atan2")),
            "math_min" => self.numeric_binary(node, BinForm::Func("min")),
            "math_max" => self.numeric_binary(node, BinForm::Func("max")),
            "logic_and" => format!("({} && {})", self.resolve_operand(node, "a"), self.resolve_operand(node, "b")),
            "logic_or" => format!("({} || {})", self.resolve_operand(node, "a"), self.resolve_operand(node, "b")),
            "logic_not" => format!("!({})", self.resolve_operand(node, "value")),
            "cmp_lt" => self.comparison(node, "<"),
            "cmp_gt" => self.comparison(node, ">"),
            "cmp_lte" => self.comparison(node, "<="),
            "cmp_gte" => self.comparison(node, ">="),
            "cmp_eq" => self.comparison(node, "=="),
            "cmp_neq" => self.comparison(node, "!="),
            "cast_int" => format!("{}({})", self.emitter.type_name(&ValueType::Int), self.resolve_operand(node, "value")),
            "cast_float" => format!("{}({})", self.emitter.type_name(&ValueType::Float), self.resolve_operand(node, "value")),
            "cast_bool" => format!("bool({})", self.resolve_operand(node, "value")),
            "vec_construct" => self.emit_vec_construct(node),
            "mat_construct" => self.emit_mat_construct(node),
            "swizzle" => {
                let base = self.resolve_operand(node, "value");
                let pattern = node.args.get("pattern").and_then(|v| v.as_str()).unwrap_or("x");
                format!("({base}).{pattern}")
            }
            "vec_element" => {
                let base_ty = self.infer_arg_type(node, "value");
                let base = self.resolve_operand(node, "value");
                let letters = ['x', 'y', 'z', 'w'];
                if let Some(n) = node.args.get("index").and_then(|v| v.as_u64()) {
                    if (n as usize) < base_ty.lanes() {
                        return format!("({base}).{}", letters[n as usize]);
                    }
                }
                let index = self.resolve_operand(node, "index");
                format!("({base})[{index}]")
            }
            "mat_mul" => format!("({} * {})", self.resolve_operand(node, "a"), self.resolve_operand(node, "b")),
            "mat_transpose" => format!("transpose({})", self.resolve_operand(node, "value")),
            "quat" => self.emit_quat(node),
            "quat_mul" => self.emit_quat_mul(node),
            "struct_construct" => self.emit_struct_construct(node),
            "struct_extract" => {
                let base = self.resolve_operand(node, "value");
                let field = node.args.get("field").and_then(|v| v.as_str()).unwrap_or("");
                format!("({base}).{field}")
            }
            "array_construct" => self.emit_array_construct(node),
            "array_extract" => format!("({})[{}]", self.resolve_operand(node, "value"), self.resolve_operand(node, "index")),
            "array_set" => {
                let base = self.resolve_operand(node, "value");
                let index = self.resolve_operand(node, "index");
                let element = self.resolve_operand(node, "element");
                let ty = self.infer_arg_type(node, "value");
                let tmp = self.hoist_temp_name(node);
                let decl = self.emitter.local_decl(&tmp, &self.emitter.type_name(&ty));
                self.hoisted.borrow_mut().push(format!("{decl} = {base};"));
                self.hoisted.borrow_mut().push(format!("{tmp}[{index}] = {element};"));
                tmp
            }
            "array_length" => match self.infer_type(&node.id) {
                ValueType::Array(_, n) => n.to_string(),
                _ => "0".to_string(),
            },
            "buffer_load" => self.emit_resource_load(node, "buffer", "index"),
            "texture_load" => self.emit_resource_load(node, "texture", "coord"),
            "texture_sample" => self.emit_texture_sample(node),
            "atomic_load" => self.emit_atomic(node, "load"),
            op @ ("atomic_store" | "atomic_add" | "atomic_sub" | "atomic_min" | "atomic_max" | "atomic_exchange") => {
                self.emit_atomic(node, op.trim_start_matches("atomic_"))
            }
            other => format!("/* unsupported op {other} */ 0"),
        }
    }

    fn unary_func(&self, name: &str, node: &Node) -> String {
        format!("{name}({})", self.resolve_operand(node, "value"))
    }

    fn numeric_binary(&self, node: &Node, form: BinForm) -> String {
        let a_ty = self.infer_arg_type(node, "a");
        let b_ty = self.infer_arg_type(node, "b");
        let mut a = self.resolve_operand(node, "a");
        let mut b = self.resolve_operand(node, "b");
        if let Ok((unified, ca, cb)) = types::unify(&a_ty, &b_ty) {
            a = self.apply_coercion(&a, ca, &unified);
            b = self.apply_coercion(&b, cb, &unified);
        }
        match form {
            BinForm::Operator(op) => format!("({a} {op} {b})"),
            BinForm::Func(f) => format!("{f}({a}, {b})"),
        }
    }

    fn apply_coercion(&self, expr: &str, c: types::Coercion, target: &ValueType) -> String {
        match c {
            types::Coercion::Identity => expr.to_string(),
            types::Coercion::IntToFloat => format!("{}({expr})", self.emitter.type_name(target)),
            types::Coercion::Broadcast => self.emitter.constructor_call(target, &vec![expr.to_string(); target.lanes()]),
            types::Coercion::BoolToNumeric => self.emitter.select_bool_numeric(expr),
        }
    }

    fn comparison(&self, node: &Node, op: &str) -> String {
        let a = self.resolve_operand(node, "a");
        let b = self.resolve_operand(node, "b");
        format!("({a} {op} {b})")
    }

    fn emit_vec_construct(&self, node: &Node) -> String {
        let fields = ["x", "y", "z", "w"];
        let present: Vec<&str> = fields.iter().filter(|f| node.args.contains_key(**f)).cloned().collect();
        let is_float = present.iter().any(|f| matches!(self.infer_arg_type(node, f), ValueType::Float | ValueType::Float2 | ValueType::Float3 | ValueType::Float4));
        let ty = match (present.len(), is_float) {
            (2, true) => ValueType::Float2,
            (2, false) => ValueType::Int2,
            (3, true) => ValueType::Float3,
            (3, false) => ValueType::Int3,
            (_, true) => ValueType::Float4,
            (_, false) => ValueType::Int4,
        };
        let args: Vec<String> = present.iter().map(|f| self.resolve_operand(node, f)).collect();
        self.emitter.constructor_call(&ty, &args)
    }

    fn emit_mat_construct(&self, node: &Node) -> String {
        let columns = node.args.get("columns").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let lanes = if columns.len() == 3 { 3 } else { 4 };
        let ty = if lanes == 3 { ValueType::Float3x3 } else { ValueType::Float4x4 };
        if self.target == Target::Host {
            // `Value::Mat3`/`Mat4` store a flat `[f64; 9|16]`, not nested
            // column vectors, so each column must be unpacked lane by lane
            // rather than passed through as a whole vector expression.
            let mut flat = Vec::new();
            for col in &columns {
                match col {
                    Json::Array(items) => flat.extend(items.iter().map(literal_expr)),
                    Json::String(s) if self.func.node(split_swizzle(s).0).is_some() => {
                        let col_expr = self.resolve_json(col);
                        flat.extend((0..lanes).map(|lane| value_lane_f64(&col_expr, lane)));
                    }
                    other => flat.push(literal_expr(other)),
                }
            }
            return self.emitter.constructor_call(&ty, &flat);
        }
        let args: Vec<String> = columns.iter().map(|c| self.resolve_json(c)).collect();
        self.emitter.constructor_call(&ty, &args)
    }

    fn emit_quat(&self, node: &Node) -> String {
        match crate::edges::resolve_quat_form(node) {
            Ok(crate::edges::QuatForm::Xyzw) => {
                let args = ["x", "y", "z", "w"].iter().map(|f| self.resolve_operand(node, f)).collect::<Vec<_>>();
                self.emitter.constructor_call(&ValueType::Float4, &args)
            }
            _ => {
                // axis/angle form: n = normalize(axis); half = angle/2;
                // result = (n * sin(half), cos(half)) — mirrors
                // `evaluator.rs::eval_pure`'s `"quat"` arm exactly.
                let axis = self.resolve_operand(node, "axis");
                let angle = self.resolve_operand(node, "angle");
                let tmp_n = format!("_qn_{}", sanitize_ident(&node.id));
                let tmp_h = format!("_qh_{}", sanitize_ident(&node.id));
                self.hoisted.borrow_mut().push(format!("{} = normalize({axis});", self.emitter.local_decl(&tmp_n, &self.emitter.type_name(&ValueType::Float3))));
                self.hoisted.borrow_mut().push(format!("{} = ({angle}) * 0.5;", self.emitter.local_decl(&tmp_h, &self.emitter.type_name(&ValueType::Float))));
                self.emitter.constructor_call(
                    &ValueType::Float4,
                    &[format!("({tmp_n}).x * sin({tmp_h})"), format!("({tmp_n}).y * sin({tmp_h})"), format!("({tmp_n}).z * sin({tmp_h})"), format!("cos({tmp_h})")],
                )
            }
        }
    }

    fn emit_quat_mul(&self, node: &Node) -> String {
        let a = self.resolve_operand(node, "a");
        let b = self.resolve_operand(node, "b");
        let tmp_a = format!("_qa_{}", sanitize_ident(&node.id));
        let tmp_b = format!("_qb_{}", sanitize_ident(&node.id));
        let float4 = self.emitter.type_name(&ValueType::Float4);
        self.hoisted.borrow_mut().push(format!("{} = {a};", self.emitter.local_decl(&tmp_a, &float4)));
        self.hoisted.borrow_mut().push(format!("{} = {b};", self.emitter.local_decl(&tmp_b, &float4)));
        let (x1, y1, z1, w1) = (format!("({tmp_a}).x"), format!("({tmp_a}).y"), format!("({tmp_a}).z"), format!("({tmp_a}).w"));
        let (x2, y2, z2, w2) = (format!("({tmp_b}).x"), format!("({tmp_b}).y"), format!("({tmp_b}).z"), format!("({tmp_b}).w"));
        self.emitter.constructor_call(
            &ValueType::Float4,
            &[
                format!("{w1}*{x2} + {x1}*{w2} + {y1}*{z2} - {z1}*{y2}"),
                format!("{w1}*{y2} - {x1}*{z2} + {y1}*{w2} + {z1}*{x2}"),
                format!("{w1}*{z2} + {x1}*{y2} - {y1}*{x2} + {z1}*{w2}"),
                format!("{w1}*{w2} - {x1}*{x2} - {y1}*{y2} - {z1}*{z2}"),
            ],
        )
    }

    fn emit_struct_construct(&self, node: &Node) -> String {
        let type_name = node.args.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let fields = node.args.get("fields").and_then(|v| v.as_object());
        let order: Vec<String> = self.doc.struct_def(type_name).map(|d| d.members.iter().map(|m| m.name.clone()).collect()).unwrap_or_default();
        let args: Vec<String> = order.iter().map(|name| fields.and_then(|f| f.get(name)).map(|v| self.resolve_json(v)).unwrap_or_else(|| "0".to_string())).collect();
        format!("{}({})", sanitize_ident(type_name), args.join(", "))
    }

    fn emit_array_construct(&self, node: &Node) -> String {
        let elements = node.args.get("elements").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let args: Vec<String> = elements.iter().map(|e| self.resolve_json(e)).collect();
        let elem_ty = elements.first().map(|e| self.infer_json_type(e)).unwrap_or(ValueType::Float);
        self.emitter.array_literal(&elem_ty, elements.len(), &args)
    }

    fn emit_atomic(&self, node: &Node, op: &str) -> String {
        let res_id = node.args.get("counter").and_then(|v| v.as_str()).unwrap_or("");
        let index = self.resolve_operand(node, "index");
        let tmp = self.hoist_temp_name(node);
        let int_ty = self.emitter.type_name(&ValueType::Int);

        if self.target == Target::Host {
            let index_i64 = value_as_i64(&index);
            match op {
                "load" => {
                    self.hoisted.borrow_mut().push(format!("{} = Value::Int(ctx.atomic_load(\"{res_id}\", {index_i64})?);", self.emitter.local_decl(&tmp, &int_ty)));
                }
                "store" => {
                    let value = self.resolve_operand(node, "value");
                    let value_i64 = value_as_i64(&value);
                    self.hoisted.borrow_mut().push(format!("ctx.atomic_store(\"{res_id}\", {index_i64}, {value_i64})?;"));
                    self.hoisted.borrow_mut().push(format!("{} = {value};", self.emitter.local_decl(&tmp, &int_ty)));
                }
                name => {
                    let value = self.resolve_operand(node, "value");
                    let value_i64 = value_as_i64(&value);
                    let variant = atomic_op_variant(name);
                    self.hoisted.borrow_mut().push(format!(
                        "{} = Value::Int(ctx.atomic_rmw(\"{res_id}\", {index_i64}, AtomicOp::{variant}, {value_i64})?);",
                        self.emitter.local_decl(&tmp, &int_ty)
                    ));
                }
            }
        } else {
            let ref_expr = format!("{}[{index}]", resource_ident(res_id));
            match op {
                "load" => {
                    let call = self.emitter.atomic_call("load", &ref_expr, None);
                    self.hoisted.borrow_mut().push(format!("{} = {call};", self.emitter.local_decl(&tmp, &int_ty)));
                }
                "store" => {
                    let value = self.resolve_operand(node, "value");
                    let call = self.emitter.atomic_call("store", &ref_expr, Some(&value));
                    self.hoisted.borrow_mut().push(format!("{call};"));
                    self.hoisted.borrow_mut().push(format!("{} = {value};", self.emitter.local_decl(&tmp, &int_ty)));
                }
                name => {
                    let value = self.resolve_operand(node, "value");
                    let call = self.emitter.atomic_call(name, &ref_expr, Some(&value));
                    self.hoisted.borrow_mut().push(format!("{} = {call};", self.emitter.local_decl(&tmp, &int_ty)));
                }
            }
        }
        tmp
    }

    fn emit_resource_load(&self, node: &Node, res_field: &str, index_field: &str) -> String {
        let res_id = node.args.get(res_field).and_then(|v| v.as_str()).unwrap_or("");
        if self.target == Target::Host {
            return if res_field == "buffer" {
                let index = self.resolve_operand(node, index_field);
                format!("ctx.buffer_load(\"{res_id}\", {})?", value_as_i64(&index))
            } else {
                let coord = self.resolve_operand(node, index_field);
                format!("ctx.texture_load(\"{res_id}\", [{}, {}])?", value_lane_i64(&coord, 0), value_lane_i64(&coord, 1))
            };
        }
        let elem_ty = self.resource_element_type(res_id);
        let flat = self.flat_resource_index(node, index_field, res_id);
        let ident = resource_ident(res_id);
        match elem_ty.lanes() {
            1 => format!("{ident}[{flat}]"),
            n => {
                let lanes: Vec<String> = (0..n).map(|lane| format!("{ident}[({flat}) * {n} + {lane}]")).collect();
                self.emitter.constructor_call(&elem_ty, &lanes)
            }
        }
    }

    fn emit_texture_sample(&self, node: &Node) -> String {
        let res_id = node.args.get("texture").and_then(|v| v.as_str()).unwrap_or("");
        if self.target == Target::Host {
            let uv = self.resolve_operand(node, "uv");
            return format!("ctx.texture_sample(\"{res_id}\", [{}, {}])?", value_lane_f64(&uv, 0), value_lane_f64(&uv, 1));
        }
        // Nearest-neighbor sample over the flat texel buffer: uv * (w, h),
        // floored and clamped to bounds, then the same flat read as
        // `texture_load`.
        let width = self.texture_width_expr(res_id);
        let height = self.texture_height_expr(res_id);
        let uv = self.resolve_operand(node, "uv");
        let elem_ty = self.resource_element_type(res_id);
        let ident = resource_ident(res_id);
        let x = format!("clamp(i32(({uv}).x * f32({width})), 0, i32({width}) - 1)");
        let y = format!("clamp(i32(({uv}).y * f32({height})), 0, i32({height}) - 1)");
        let flat = format!("(({y}) * {width} + ({x}))");
        match elem_ty.lanes() {
            1 => format!("{ident}[{flat}]"),
            n => {
                let lanes: Vec<String> = (0..n).map(|lane| format!("{ident}[({flat}) * {n} + {lane}]")).collect();
                self.emitter.constructor_call(&elem_ty, &lanes)
            }
        }
    }

    fn flat_resource_index(&self, node: &Node, index_field: &str, res_id: &str) -> String {
        if index_field == "coord" {
            let width = self.texture_width_expr(res_id);
            let coord = self.resolve_operand(node, index_field);
            format!("(({coord}).y * {width} + ({coord}).x)")
        } else {
            self.resolve_operand(node, index_field)
        }
    }

    fn texture_width_expr(&self, res_id: &str) -> String {
        match self.doc.resource(res_id).map(|r| &r.size) {
            Some(ResourceSize::Fixed2(w, _)) => w.to_string(),
            // Viewport-tracking textures don't have a statically known
            // width; this flat-buffer codegen has no runtime resource
            // descriptor to read it from, so it falls back to 1 (documented
            // limitation, see DESIGN.md).
            _ => "1".to_string(),
        }
    }

    fn texture_height_expr(&self, res_id: &str) -> String {
        match self.doc.resource(res_id).map(|r| &r.size) {
            Some(ResourceSize::Fixed2(_, h)) => h.to_string(),
            _ => "1".to_string(),
        }
    }

    fn resource_element_type(&self, res_id: &str) -> ValueType {
        match self.doc.resource(res_id) {
            Some(r) => r.element_type.as_deref().map(types::parse_type_name).unwrap_or(ValueType::Float4),
            None => ValueType::Float,
        }
    }

    fn gid_expr(&self) -> String {
        match self.target {
            Target::Device => "vec3<i32>(thread_id)".to_string(),
            Target::Host => "Value::Int3([0, 0, 0]) /* gid is device-only */".to_string(),
        }
    }

    // ---- type inference (just enough for coercion/arity decisions) ----

    fn infer_type(&self, node_id: &str) -> ValueType {
        if let Some(t) = self.types.borrow().get(node_id) {
            return t.clone();
        }
        let ty = match self.func.node(node_id) {
            Some(node) => self.infer_node_type(node),
            None => ValueType::Float,
        };
        self.types.borrow_mut().insert(node_id.to_string(), ty.clone());
        ty
    }

    fn infer_arg_type(&self, node: &Node, field: &str) -> ValueType {
        match node.args.get(field) {
            Some(json) => self.infer_json_type(json),
            None => ValueType::Float,
        }
    }

    fn infer_json_type(&self, json: &Json) -> ValueType {
        match json {
            Json::String(s) => {
                let (base, swizzle) = split_swizzle(s);
                if self.func.node(base).is_some() {
                    match swizzle {
                        Some(pattern) => swizzle_result_type(&self.infer_type(base), pattern),
                        None => self.infer_type(base),
                    }
                } else {
                    ValueType::Str
                }
            }
            Json::Bool(_) => ValueType::Bool,
            Json::Number(n) if n.is_i64() || n.is_u64() => ValueType::Int,
            Json::Number(_) => ValueType::Float,
            Json::Array(items) => match items.len() {
                2 => ValueType::Float2,
                3 => ValueType::Float3,
                4 => ValueType::Float4,
                _ => ValueType::Float,
            },
            _ => ValueType::Float,
        }
    }

    fn infer_node_type(&self, node: &Node) -> ValueType {
        match node.op.as_str() {
            "literal" => self.infer_arg_type(node, "value"),
            "var_get" => {
                let name = node.args.get("name").and_then(|v| v.as_str()).unwrap_or("");
                self.func
                    .inputs
                    .iter()
                    .chain(self.func.outputs.iter())
                    .find(|p| p.name == name)
                    .map(|p| types::parse_type_name(&p.type_name))
                    .or_else(|| self.func.local_vars.iter().find(|l| l.name == name).map(|l| types::parse_type_name(&l.type_name)))
                    .unwrap_or(ValueType::Float)
            }
            "builtin_get" => match node.args.get("name").and_then(|v| v.as_str()) {
                Some("gid") => ValueType::Int3,
                Some("output_size") => ValueType::Float2,
                _ => ValueType::Float,
            },
            "const_get" => ValueType::Float,
            "loop_index" => ValueType::Int,
            op if op.starts_with("cmp_") || op == "logic_and" || op == "logic_or" || op == "logic_not" => ValueType::Bool,
            "cast_int" => ValueType::Int,
            "cast_float" => ValueType::Float,
            "cast_bool" => ValueType::Bool,
            "math_neg" | "math_abs" => self.infer_arg_type(node, "value"),
            "math_sqrt" | "math_floor" | "math_ceil" | "math_sin" | "math_cos" => ValueType::Float,
            "math_step" => ValueType::Float,
            op if op.starts_with("math_") => {
                let a = self.infer_arg_type(node, "a");
                let b = self.infer_arg_type(node, "b");
                types::unify(&a, &b).map(|(t, _, _)| t).unwrap_or(a)
            }
            "vec_construct" => {
                let fields = ["x", "y", "z", "w"];
                let present: Vec<&str> = fields.iter().filter(|f| node.args.contains_key(**f)).cloned().collect();
                let is_float = present.iter().any(|f| matches!(self.infer_arg_type(node, f), ValueType::Float));
                match (present.len(), is_float) {
                    (2, true) => ValueType::Float2,
                    (2, false) => ValueType::Int2,
                    (3, true) => ValueType::Float3,
                    (3, false) => ValueType::Int3,
                    (_, true) => ValueType::Float4,
                    (_, false) => ValueType::Int4,
                }
            }
            "mat_construct" => {
                let n = node.args.get("columns").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(4);
                if n == 3 {
                    ValueType::Float3x3
                } else {
                    ValueType::Float4x4
                }
            }
            "swizzle" => {
                let base = self.infer_arg_type(node, "value");
                let pattern = node.args.get("pattern").and_then(|v| v.as_str()).unwrap_or("x");
                swizzle_result_type(&base, pattern)
            }
            "vec_element" => self.infer_arg_type(node, "value").element_type(),
            "mat_mul" => self.infer_arg_type(node, "a"),
            "mat_transpose" => self.infer_arg_type(node, "value"),
            "quat" | "quat_mul" => ValueType::Float4,
            "struct_construct" => ValueType::Struct(node.args.get("type").and_then(|v| v.as_str()).unwrap_or("").to_string()),
            "struct_extract" => {
                if let ValueType::Struct(id) = self.infer_arg_type(node, "value") {
                    let field = node.args.get("field").and_then(|v| v.as_str()).unwrap_or("");
                    self.doc.struct_def(&id).and_then(|d| d.members.iter().find(|m| m.name == field)).map(|m| types::parse_type_name(&m.type_name)).unwrap_or(ValueType::Float)
                } else {
                    ValueType::Float
                }
            }
            "array_construct" => {
                let elems = node.args.get("elements").and_then(|v| v.as_array()).cloned().unwrap_or_default();
                let elem_ty = elems.first().map(|e| self.infer_json_type(e)).unwrap_or(ValueType::Float);
                ValueType::Array(Box::new(elem_ty), elems.len())
            }
            "array_extract" => match self.infer_arg_type(node, "value") {
                ValueType::Array(elem, _) => *elem,
                _ => ValueType::Float,
            },
            "array_set" => self.infer_arg_type(node, "value"),
            "array_length" => ValueType::Int,
            "buffer_load" => self.resource_element_type(node.args.get("buffer").and_then(|v| v.as_str()).unwrap_or("")),
            "texture_load" | "texture_sample" => self.resource_element_type(node.args.get("texture").and_then(|v| v.as_str()).unwrap_or("")),
            "atomic_load" | "atomic_store" | "atomic_add" | "atomic_sub" | "atomic_min" | "atomic_max" | "atomic_exchange" => ValueType::Int,
            _ => ValueType::Float,
        }
    }
}

fn loop_var_name(tag: &str) -> String {
    format!("_loop_{}", sanitize_ident(tag))
}

/// Rust-syntax emitter for the `cpu`-function host driver (spec.md §5.2):
/// every local is typed `Value` (the same runtime representation
/// `evaluator.rs` uses), and vector/matrix constructors build `Value`
/// variants directly rather than a shading-dialect constructor call.
pub struct HostEmitter;

impl ExprEmitter for HostEmitter {
    fn type_name(&self, ty: &ValueType) -> String {
        format!("{ty}")
    }

    fn select_bool_numeric(&self, cond_expr: &str) -> String {
        format!("if {cond_expr} {{ 1.0 }} else {{ 0.0 }}")
    }

    fn constructor_call(&self, ty: &ValueType, args: &[String]) -> String {
        match ty {
            ValueType::Float => format!("Value::Float(({}) as f64)", args.first().cloned().unwrap_or_else(|| "0.0".to_string())),
            ValueType::Int => format!("Value::Int(({}) as i64)", args.first().cloned().unwrap_or_else(|| "0".to_string())),
            ValueType::Bool => format!("Value::Bool({})", args.first().cloned().unwrap_or_else(|| "false".to_string())),
            ValueType::Float2 => format!("Value::Float2([{}])", args.join(", ")),
            ValueType::Float3 => format!("Value::Float3([{}])", args.join(", ")),
            ValueType::Float4 => format!("Value::Float4([{}])", args.join(", ")),
            ValueType::Int2 => format!("Value::Int2([{}])", args.join(", ")),
            ValueType::Int3 => format!("Value::Int3([{}])", args.join(", ")),
            ValueType::Int4 => format!("Value::Int4([{}])", args.join(", ")),
            ValueType::Float3x3 => format!("Value::Mat3(crate::value::Mat3([{}]))", args.join(", ")),
            ValueType::Float4x4 => format!("Value::Mat4(crate::value::Mat4([{}]))", args.join(", ")),
            _ => format!("/* unsupported host constructor for {ty} */"),
        }
    }

    fn array_literal(&self, _elem_ty: &ValueType, _n: usize, args: &[String]) -> String {
        format!("Value::Array(std::rc::Rc::new(vec![{}]))", args.join(", "))
    }

    fn local_decl(&self, name: &str, ty_name: &str) -> String {
        format!("let mut {name}: Value /* {ty_name} */")
    }

    fn for_loop_header(&self, var: &str, start: &str, end: &str) -> String {
        format!("for {var} in ({start})..({end})")
    }

    fn atomic_call(&self, _op: &str, ref_expr: &str, _operand: Option<&str>) -> String {
        format!("/* unreachable: atomics route through ctx.* in the host driver, not {ref_expr} */")
    }
}

/// Emit a straight-line host driver for a `cpu` function (spec.md §5.2):
/// declares `localVars`, threads real exec edges, folds pure data nodes
/// into nested expressions, and translates `cmd_*` nodes to calls on the
/// opaque `RuntimeContext` (spec.md §5.2's fixed call surface). Shared by
/// both backends since a `cpu` function never touches shading-dialect
/// syntax — only the device functions it dispatches do.
pub fn generate_host_driver(doc: &Document, func: &Function) -> String {
    let emitter = HostEmitter;
    let body = BodyEmitter::new(doc, func, &emitter, Target::Host);

    let mut out = String::new();
    out.push_str(&format!(
        "fn {}(ctx: &mut dyn RuntimeContext, flat_args: &[f32]) -> Result<(), RuntimeError> {{\n",
        sanitize_ident(&func.id)
    ));
    for local in &func.local_vars {
        let ty = types::parse_type_name(&local.type_name);
        let init_value = match &local.initial_value {
            Some(v) => emitter.constructor_call(&ty, &[literal_expr(v)]),
            None => format!("Value::zero_of(&crate::types::parse_type_name(\"{}\"))", local.type_name),
        };
        out.push_str(&format!("    let mut {}: Value /* {} */ = {init_value};\n", sanitize_ident(&local.name), local.type_name));
    }
    out.push_str(&body.emit_entry_block(1));
    out.push_str("    Ok(())\n}\n");
    out
}
