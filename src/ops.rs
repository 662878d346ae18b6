//! The op registry (spec.md §4.2): a closed catalog of operations, each
//! carrying an argument schema, execution kind, and host/device placement.
//!
//! Grounded on the teacher's `ast.rs` closed `Opcode` enum and the
//! "descriptor table" shape `vm.rs` switches on; generalized here into a
//! data-driven table (rather than a bare enum) because the validator,
//! evaluator, both code generators, and a docs helper all need the same
//! per-op facts (spec.md §4.2: "single source of truth consumed by
//! validator, evaluator, code generators, and documentation helpers").

use std::collections::HashMap;

use lazy_static::lazy_static;

/// How an op participates in execution (spec.md §4.2/§4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// No side effect; result resolved lazily from its data arguments.
    Pure,
    /// Mutates state (`var_set`, `buffer_store`, `atomic_*`, `cmd_*`); must
    /// sit on an execution edge to have defined ordering.
    SideEffecting,
    /// Branch/loop/call/return — participates in execution edges and
    /// changes which node executes next.
    ControlFlow,
    /// Rejected inside `shader`/`vertex`/`fragment` functions.
    HostOnly,
    /// Only meaningful inside device functions (none currently; reserved
    /// for builtins like `thread_id` that only exist during a dispatch).
    DeviceOnly,
    /// Valid on either side.
    Either,
}

/// The kind of thing an argument field refers to (spec.md §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    /// A data-reference-or-literal value argument.
    Data,
    /// An execution-flow field (`exec_true`, `exec_body`, ...).
    Exec,
    /// Names a local var/input/output by identifier.
    Var,
    /// Names a function by id.
    Func,
    /// Names a resource by id.
    Resource,
    /// Names a struct type by id.
    Struct,
    /// Names a CPU-injected builtin (`time`, `delta_time`, ...).
    Builtin,
    /// Names a `flow_loop` tag.
    Loop,
    /// Names a struct member.
    Field,
    /// Names a named constant (`const_get`).
    Const,
}

#[derive(Clone, Debug)]
pub struct ArgDescriptor {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    /// True if this argument may additionally be a literal JSON value
    /// rather than a reference (most `Data` args; `Var`/`Func`/etc. never
    /// are).
    pub accepts_literal: bool,
}

impl ArgDescriptor {
    const fn data(name: &'static str, required: bool) -> Self {
        ArgDescriptor { name, kind: ArgKind::Data, required, accepts_literal: true }
    }
    const fn reference(name: &'static str, kind: ArgKind, required: bool) -> Self {
        ArgDescriptor { name, kind, required, accepts_literal: false }
    }
}

#[derive(Clone, Debug)]
pub struct OpDescriptor {
    pub name: &'static str,
    pub kind: OpKind,
    pub args: Vec<ArgDescriptor>,
    pub doc: &'static str,
}

fn op(name: &'static str, kind: OpKind, args: Vec<ArgDescriptor>, doc: &'static str) -> OpDescriptor {
    OpDescriptor { name, kind, args, doc }
}

fn binary_numeric(name: &'static str, doc: &'static str) -> OpDescriptor {
    op(name, OpKind::Pure, vec![ArgDescriptor::data("a", true), ArgDescriptor::data("b", true)], doc)
}

fn unary_numeric(name: &'static str, doc: &'static str) -> OpDescriptor {
    op(name, OpKind::Pure, vec![ArgDescriptor::data("value", true)], doc)
}

lazy_static! {
    pub static ref REGISTRY: HashMap<&'static str, OpDescriptor> = {
        let mut ops = vec![
            // numeric binary
            binary_numeric("math_add", "Addition with int/float unification and scalar broadcast."),
            binary_numeric("math_sub", "Subtraction with int/float unification and scalar broadcast."),
            binary_numeric("math_mul", "Multiplication with int/float unification and scalar broadcast."),
            binary_numeric("math_div", "Division; int operands truncate toward zero."),
            binary_numeric("math_mod", "Modulo; int operands truncate toward zero."),
            binary_numeric("math_pow", "Power; always produces float."),
            binary_numeric("math_atan2", "Two-argument arctangent; always produces float."),
            binary_numeric("math_min", "Lane-wise minimum."),
            binary_numeric("math_max", "Lane-wise maximum."),
            op(
                "math_step",
                OpKind::Pure,
                vec![ArgDescriptor::data("edge", true), ArgDescriptor::data("x", false), ArgDescriptor::data("val", false)],
                "Step function; second operand accepted under either alias `x` or `val` (see `edges::resolve_math_step_value`).",
            ),
            // numeric unary
            unary_numeric("math_neg", "Arithmetic negation."),
            unary_numeric("math_abs", "Absolute value."),
            unary_numeric("math_sqrt", "Square root; always produces float."),
            unary_numeric("math_floor", "Floor; always produces float."),
            unary_numeric("math_ceil", "Ceiling; always produces float."),
            unary_numeric("math_sin", "Sine; always produces float."),
            unary_numeric("math_cos", "Cosine; always produces float."),
            // logic
            binary_numeric("logic_and", "Boolean conjunction."),
            binary_numeric("logic_or", "Boolean disjunction."),
            unary_numeric("logic_not", "Boolean negation."),
            // comparison / equality
            binary_numeric("cmp_lt", "Less-than comparison, produces bool."),
            binary_numeric("cmp_gt", "Greater-than comparison, produces bool."),
            binary_numeric("cmp_lte", "Less-than-or-equal comparison, produces bool."),
            binary_numeric("cmp_gte", "Greater-than-or-equal comparison, produces bool."),
            binary_numeric("cmp_eq", "Equality comparison, produces bool."),
            binary_numeric("cmp_neq", "Inequality comparison, produces bool."),
            // cast
            op(
                "cast_int",
                OpKind::Pure,
                vec![ArgDescriptor::data("value", true)],
                "Cast to int; out-of-range float wraps (`types::wrapping_cast_float_to_int`).",
            ),
            op("cast_float", OpKind::Pure, vec![ArgDescriptor::data("value", true)], "Cast to float."),
            op("cast_bool", OpKind::Pure, vec![ArgDescriptor::data("value", true)], "Explicit 0/1 <-> bool cast."),
            // literal + typed constructors
            op(
                "literal",
                OpKind::Pure,
                vec![ArgDescriptor::data("value", true), ArgDescriptor::reference("type", ArgKind::Var, false)],
                "A constant value; an explicit `type` field outside the closed lattice emits `Invalid explicit type`.",
            ),
            op(
                "vec_construct",
                OpKind::Pure,
                vec![
                    ArgDescriptor::data("x", true),
                    ArgDescriptor::data("y", true),
                    ArgDescriptor::data("z", false),
                    ArgDescriptor::data("w", false),
                ],
                "Construct a float2/3/4 or int2/3/4 from its lanes, arity from how many are present.",
            ),
            op(
                "mat_construct",
                OpKind::Pure,
                vec![ArgDescriptor::data("columns", true)],
                "Construct a float3x3/float4x4 from an array of column vectors.",
            ),
            // swizzle / element access
            op(
                "swizzle",
                OpKind::Pure,
                vec![ArgDescriptor::data("value", true), ArgDescriptor::reference("pattern", ArgKind::Field, true)],
                "Vector lane selection; non-vector operand or out-of-arity pattern is a Type Mismatch.",
            ),
            op(
                "vec_element",
                OpKind::Pure,
                vec![ArgDescriptor::data("value", true), ArgDescriptor::data("index", true)],
                "Single-lane extraction by numeric index.",
            ),
            // texture
            op(
                "texture_sample",
                OpKind::SideEffecting,
                vec![
                    ArgDescriptor::reference("texture", ArgKind::Resource, true),
                    ArgDescriptor::data("uv", true),
                ],
                "Filtered/wrapped sample per the resource's sampler.",
            ),
            op(
                "texture_load",
                OpKind::SideEffecting,
                vec![
                    ArgDescriptor::reference("texture", ArgKind::Resource, true),
                    ArgDescriptor::data("coord", true),
                ],
                "Unfiltered texel fetch by integer coordinate.",
            ),
            op(
                "texture_store",
                OpKind::SideEffecting,
                vec![
                    ArgDescriptor::reference("texture", ArgKind::Resource, true),
                    ArgDescriptor::data("coord", true),
                    ArgDescriptor::data("value", true),
                ],
                "Write a texel.",
            ),
            // buffer
            op(
                "buffer_load",
                OpKind::SideEffecting,
                vec![ArgDescriptor::reference("buffer", ArgKind::Resource, true), ArgDescriptor::data("index", true)],
                "Element read; literal negative index is `Invalid Negative Index`, literal OOB against a fixed size is `Static OOB`.",
            ),
            op(
                "buffer_store",
                OpKind::SideEffecting,
                vec![
                    ArgDescriptor::reference("buffer", ArgKind::Resource, true),
                    ArgDescriptor::data("index", true),
                    ArgDescriptor::data("value", true),
                ],
                "Element write; same bounds rules as `buffer_load`.",
            ),
            // atomic
            op(
                "atomic_load",
                OpKind::SideEffecting,
                vec![ArgDescriptor::reference("counter", ArgKind::Resource, true), ArgDescriptor::data("index", true)],
                "Sequentially-consistent read.",
            ),
            op(
                "atomic_store",
                OpKind::SideEffecting,
                vec![
                    ArgDescriptor::reference("counter", ArgKind::Resource, true),
                    ArgDescriptor::data("index", true),
                    ArgDescriptor::data("value", true),
                ],
                "Sequentially-consistent write.",
            ),
            atomic_rmw("atomic_add", "Atomic add; returns the pre-modification value."),
            atomic_rmw("atomic_sub", "Atomic subtract; returns the pre-modification value."),
            atomic_rmw("atomic_min", "Atomic min; returns the pre-modification value."),
            atomic_rmw("atomic_max", "Atomic max; returns the pre-modification value."),
            atomic_rmw("atomic_exchange", "Atomic exchange; returns the pre-modification value."),
            // matrix / quaternion
            op(
                "mat_mul",
                OpKind::Pure,
                vec![ArgDescriptor::data("a", true), ArgDescriptor::data("b", true)],
                "Matrix*matrix or matrix*vector multiplication.",
            ),
            op(
                "mat_transpose",
                OpKind::Pure,
                vec![ArgDescriptor::data("value", true)],
                "Matrix transpose.",
            ),
            op(
                "quat",
                OpKind::Pure,
                vec![
                    ArgDescriptor::data("axis", false),
                    ArgDescriptor::data("angle", false),
                    ArgDescriptor::data("x", false),
                    ArgDescriptor::data("y", false),
                    ArgDescriptor::data("z", false),
                    ArgDescriptor::data("w", false),
                ],
                "Quaternion construction; exactly one of the axis/angle or xyzw forms must be present (see `edges::resolve_quat_form`).",
            ),
            op(
                "quat_mul",
                OpKind::Pure,
                vec![ArgDescriptor::data("a", true), ArgDescriptor::data("b", true)],
                "Quaternion composition.",
            ),
            // struct / array
            op(
                "struct_construct",
                OpKind::Pure,
                vec![
                    ArgDescriptor::reference("type", ArgKind::Struct, true),
                    ArgDescriptor::data("fields", true),
                ],
                "Build a struct value from named field values.",
            ),
            op(
                "struct_extract",
                OpKind::Pure,
                vec![ArgDescriptor::data("value", true), ArgDescriptor::reference("field", ArgKind::Field, true)],
                "Field read; non-struct operand is a Type Mismatch.",
            ),
            op(
                "array_construct",
                OpKind::Pure,
                vec![ArgDescriptor::data("elements", true)],
                "Build a fixed array from element values.",
            ),
            op(
                "array_extract",
                OpKind::Pure,
                vec![ArgDescriptor::data("value", true), ArgDescriptor::data("index", true)],
                "Indexed array read.",
            ),
            op(
                "array_set",
                OpKind::SideEffecting,
                vec![ArgDescriptor::data("value", true), ArgDescriptor::data("index", true), ArgDescriptor::data("element", true)],
                "Indexed array write, producing an updated array value.",
            ),
            op(
                "array_length",
                OpKind::Pure,
                vec![ArgDescriptor::data("value", true)],
                "Static array length.",
            ),
            // commands (host-only)
            op(
                "cmd_dispatch",
                OpKind::HostOnly,
                vec![
                    ArgDescriptor::reference("shader", ArgKind::Func, true),
                    ArgDescriptor::data("threads", false),
                    ArgDescriptor::data("dispatch", false),
                    ArgDescriptor::data("args", false),
                ],
                "Dispatch a `shader` function over a thread-count grid (not workgroup-rounded); see `edges::resolve_dispatch_threads`.",
            ),
            op(
                "cmd_draw",
                OpKind::HostOnly,
                vec![
                    ArgDescriptor::reference("target", ArgKind::Resource, true),
                    ArgDescriptor::reference("vertex_shader", ArgKind::Func, true),
                    ArgDescriptor::reference("fragment_shader", ArgKind::Func, true),
                    ArgDescriptor::data("count", true),
                    ArgDescriptor::data("args", false),
                ],
                "Draw call against a vertex/fragment function pair.",
            ),
            op(
                "cmd_resize_resource",
                OpKind::HostOnly,
                vec![
                    ArgDescriptor::reference("resource", ArgKind::Resource, true),
                    ArgDescriptor::data("size", true),
                ],
                "Resize a resource per its `clearOnResize` persistence flag.",
            ),
            op(
                "cmd_copy_buffer",
                OpKind::HostOnly,
                vec![
                    ArgDescriptor::reference("src", ArgKind::Resource, true),
                    ArgDescriptor::reference("dst", ArgKind::Resource, true),
                ],
                "Element-for-element copy between resources of identical element type and size.",
            ),
            op(
                "cmd_sync_to_cpu",
                OpKind::HostOnly,
                vec![ArgDescriptor::reference("resource", ArgKind::Resource, true)],
                "Request host-visible readback of a CPU-accessible resource.",
            ),
            op(
                "cmd_wait_cpu_sync",
                OpKind::HostOnly,
                vec![ArgDescriptor::reference("resource", ArgKind::Resource, true)],
                "Block the host frame until the named resource's pending read is observable.",
            ),
            // control flow
            op(
                "var_get",
                OpKind::Pure,
                vec![ArgDescriptor::reference("name", ArgKind::Var, true)],
                "Read a local var/input/output by lexical lookup.",
            ),
            op(
                "var_set",
                OpKind::SideEffecting,
                vec![ArgDescriptor::reference("name", ArgKind::Var, true), ArgDescriptor::data("value", true)],
                "Write a local var/output by lexical lookup.",
            ),
            op(
                "builtin_get",
                OpKind::Pure,
                vec![ArgDescriptor::reference("name", ArgKind::Builtin, true)],
                "Read a CPU-injected builtin (`time`, `delta_time`, `bpm`, `beat_number`, `beat_delta`, `output_size`).",
            ),
            op(
                "const_get",
                OpKind::Pure,
                vec![ArgDescriptor::reference("name", ArgKind::Const, true)],
                "Read a named engine constant; unknown name is `Invalid constant name`.",
            ),
            op(
                "loop_index",
                OpKind::Pure,
                vec![ArgDescriptor::reference("tag", ArgKind::Loop, true)],
                "Current iteration index of the enclosing `flow_loop` bearing a matching tag.",
            ),
            op(
                "flow_branch",
                OpKind::ControlFlow,
                vec![ArgDescriptor::data("cond", true)],
                "Evaluate `cond` and follow `exec_true` or `exec_false`.",
            ),
            op(
                "flow_loop",
                OpKind::ControlFlow,
                vec![
                    ArgDescriptor::reference("tag", ArgKind::Loop, true),
                    ArgDescriptor::data("count", false),
                    ArgDescriptor::data("start", false),
                    ArgDescriptor::data("end", false),
                ],
                "Iterate the `exec_body` sub-graph, then follow `exec_completed`.",
            ),
            op(
                "call_func",
                OpKind::ControlFlow,
                vec![
                    ArgDescriptor::reference("function", ArgKind::Func, true),
                    ArgDescriptor::data("args", false),
                ],
                "Push a frame, bind arguments to the callee's declared inputs, run to completion or `func_return`.",
            ),
            op(
                "func_return",
                OpKind::ControlFlow,
                vec![ArgDescriptor::data("value", false)],
                "Unwind the current frame with an optional value.",
            ),
            op(
                "comment",
                OpKind::Pure,
                vec![],
                "No-op annotation node; never produces a value.",
            ),
        ];
        ops.drain(..).map(|d| (d.name, d)).collect()
    };
}

fn atomic_rmw(name: &'static str, doc: &'static str) -> OpDescriptor {
    op(
        name,
        OpKind::SideEffecting,
        vec![
            ArgDescriptor::reference("counter", ArgKind::Resource, true),
            ArgDescriptor::data("index", true),
            ArgDescriptor::data("value", true),
        ],
        doc,
    )
}

pub fn lookup(name: &str) -> Option<&'static OpDescriptor> {
    REGISTRY.get(name)
}

pub fn is_host_only(name: &str) -> bool {
    matches!(lookup(name).map(|d| d.kind), Some(OpKind::HostOnly))
}

/// An op never participates in the execution graph on its own (spec.md
/// §3's data vs. exec edge distinction): it is reached only by a data
/// reference from some other node's argument, resolved lazily. An unknown
/// op name is never treated as pure, so a document entry search doesn't
/// silently skip past it.
pub fn is_pure(name: &str) -> bool {
    matches!(lookup(name).map(|d| d.kind), Some(OpKind::Pure))
}

pub fn required_args(desc: &OpDescriptor) -> impl Iterator<Item = &ArgDescriptor> {
    desc.args.iter().filter(|a| a.required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_every_documented_category() {
        for name in [
            "math_add", "math_div", "math_step", "logic_and", "cmp_lt", "cast_int", "literal",
            "vec_construct", "swizzle", "texture_sample", "buffer_store", "atomic_add", "mat_mul",
            "quat", "struct_construct", "array_set", "cmd_dispatch", "var_get", "builtin_get",
            "const_get", "loop_index", "flow_branch", "flow_loop", "call_func", "func_return",
            "comment",
        ] {
            assert!(lookup(name).is_some(), "missing op descriptor for {name}");
        }
    }

    #[test]
    fn cmd_ops_are_host_only() {
        assert!(is_host_only("cmd_dispatch"));
        assert!(is_host_only("cmd_draw"));
        assert!(!is_host_only("math_add"));
    }

    #[test]
    fn missing_required_argument_is_detectable_from_the_descriptor() {
        let desc = lookup("buffer_store").unwrap();
        let names: Vec<_> = required_args(desc).map(|a| a.name).collect();
        assert_eq!(names, vec!["buffer", "index", "value"]);
    }
}
