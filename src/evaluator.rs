//! The tree-walking interpreter (spec.md §4.4): a frame stack over
//! execution edges, lazy memoized data-node resolution, loop/branch/call
//! semantics, and a recursion-depth ceiling.
//!
//! Grounded on the teacher's `vm.rs::VM`/`Error`/`ControlFlow` (the frame
//! stack and fallible-step shape) and `env.rs::Env` (reused here, with
//! `Value` instead of `TypeTag`, for a frame's lexical variable scope).

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::document::{Document, Function, Node};
use crate::edges;
use crate::env::Env;
use crate::ops::OpKind;
use crate::resources::{ResourceError, ResourceStore};
use crate::value::{Mat4, StructValue, Value};

/// Hard ceiling on call-stack depth (spec.md §4.4: "a recursion-depth
/// counter; exceeding emits `Recursion detected`"). Chosen generously
/// above any legitimate IR call depth.
pub const MAX_CALL_DEPTH: usize = 256;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("Runtime Error: Variable '{0}' is not defined")]
    UndefinedVariable(String),
    #[error("Recursion detected")]
    RecursionDetected,
    #[error("Type Mismatch")]
    TypeMismatch,
    #[error(transparent)]
    Value(#[from] crate::value::ValueError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("node '{0}' does not exist")]
    MissingNode(String),
    #[error("op '{0}' is not valid in a host function")]
    NotHostExecutable(String),
    #[error("host-only op '{0}' has no evaluator implementation")]
    Unimplemented(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

/// One call frame: a lexical variable scope chained to the caller's (so a
/// nested `flow_loop` body sees the enclosing function's inputs, but a
/// `call_func` callee does not see the caller's locals — spec.md §4.4), a
/// per-invocation memo table for lazily-resolved pure nodes, and the
/// current loop-tag -> index bindings active in this frame.
struct Frame {
    vars: Rc<Env<Value>>,
    memo: HashMap<String, Value>,
    loop_index: HashMap<String, i64>,
}

impl Frame {
    fn root() -> Frame {
        Frame { vars: Rc::new(Env::root()), memo: HashMap::new(), loop_index: HashMap::new() }
    }

    fn child(parent: &Rc<Env<Value>>) -> Frame {
        Frame { vars: Rc::new(Env::chain(parent)), memo: HashMap::new(), loop_index: HashMap::new() }
    }
}

/// Outcome of running a function body to completion.
pub enum Completion {
    /// Ran off the end of the execution-edge chain with no `func_return`.
    Fell,
    /// Hit a `func_return`, optionally carrying a value.
    Returned(Option<Value>),
}

pub struct Evaluator<'a> {
    pub doc: &'a Document,
    pub resources: &'a mut ResourceStore,
    pub clock: &'a crate::marshal::Clock,
    /// The invoking device thread's `gid` (spec.md §8 scenario a), set by a
    /// dispatch simulator before calling a `shader`/`vertex`/`fragment`
    /// entry point; `None` for `cpu` functions, which have no thread id.
    thread_id: Option<[i64; 3]>,
    frames: Vec<Frame>,
}

impl<'a> Evaluator<'a> {
    pub fn new(doc: &'a Document, resources: &'a mut ResourceStore, clock: &'a crate::marshal::Clock) -> Self {
        Evaluator { doc, resources, clock, thread_id: None, frames: vec![Frame::root()] }
    }

    /// Construct an evaluator for one device-thread invocation of a
    /// dispatch (spec.md §5.1 "device concurrency ... parallel over thread
    /// ids").
    pub fn for_thread(doc: &'a Document, resources: &'a mut ResourceStore, clock: &'a crate::marshal::Clock, thread_id: [i64; 3]) -> Self {
        Evaluator { doc, resources, clock, thread_id: Some(thread_id), frames: vec![Frame::root()] }
    }

    fn frame(&self) -> &Frame {
        self.frames.last().expect("evaluator always has at least one frame")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("evaluator always has at least one frame")
    }

    /// Run `func` to completion starting at its entry node, binding
    /// `args` to its declared inputs by name (spec.md §4.4: "binds named
    /// arguments to the callee's inputs in declaration order-or-by-name").
    pub fn call(&mut self, func: &Function, args: &HashMap<String, Value>) -> EvalResult<Completion> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(EvalError::RecursionDetected);
        }
        let parent_vars = self.frame().vars.clone();
        let mut frame = Frame::child(&parent_vars);
        for input in &func.inputs {
            let value = args.get(&input.name).cloned().unwrap_or(Value::Int(0));
            frame.vars.define(&input.name, &Rc::new(value));
        }
        for local in &func.local_vars {
            let initial = local
                .initial_value
                .as_ref()
                .and_then(json_literal_to_value)
                .unwrap_or_else(|| Value::Int(0));
            frame.vars.define(&local.name, &Rc::new(initial));
        }
        self.frames.push(frame);

        let entry = func.entry_node().ok_or_else(|| EvalError::MissingNode("<entry>".to_string()))?;
        let result = self.run_exec_chain(func, entry);

        self.frames.pop();
        result
    }

    /// Walk execution edges starting at `start`, applying each
    /// side-effecting/control-flow node, until the chain runs out or a
    /// `func_return` is hit.
    fn run_exec_chain(&mut self, func: &Function, start: &Node) -> EvalResult<Completion> {
        let mut current = Some(start);
        while let Some(node) = current {
            match self.exec_node(func, node)? {
                Completion::Returned(v) => return Ok(Completion::Returned(v)),
                Completion::Fell => {}
            }
            current = self.next_exec_node(func, node)?;
        }
        Ok(Completion::Fell)
    }

    fn next_exec_node<'f>(&mut self, func: &'f Function, node: &Node) -> EvalResult<Option<&'f Node>> {
        let target = node.exec_out.as_deref().or(node.next.as_deref());
        match target {
            Some(id) => Ok(Some(func.node(id).ok_or_else(|| EvalError::MissingNode(id.to_string()))?)),
            None => Ok(None),
        }
    }

    /// Execute one node on the execution chain: branch/loop/call/return
    /// nodes drive control flow themselves (returning where the chain
    /// should continue); ordinary side-effecting ops just run and the
    /// caller advances via `exec_out`/`next`.
    fn exec_node(&mut self, func: &Function, node: &Node) -> EvalResult<Completion> {
        match node.op.as_str() {
            "flow_branch" => {
                let cond = self.resolve(func, node, "cond")?;
                let take_true = match cond {
                    Value::Bool(b) => b,
                    _ => return Err(EvalError::TypeMismatch),
                };
                let branch_id = if take_true { node.exec_true.as_deref() } else { node.exec_false.as_deref() };
                if let Some(id) = branch_id {
                    let target = func.node(id).ok_or_else(|| EvalError::MissingNode(id.to_string()))?;
                    return self.run_exec_chain(func, target);
                }
                Ok(Completion::Fell)
            }
            "flow_loop" => self.exec_loop(func, node),
            "call_func" => self.exec_call(func, node),
            "func_return" => {
                let value = match node.args.get("value") {
                    Some(_) => Some(self.resolve(func, node, "value")?),
                    None => None,
                };
                Ok(Completion::Returned(value))
            }
            "var_set" => {
                let name = node.args.get("name").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                let value = self.resolve(func, node, "value")?;
                self.frame().vars.define(name, &Rc::new(value));
                Ok(Completion::Fell)
            }
            "buffer_store" | "texture_store" => {
                let res_id = node.args.get(if node.op == "buffer_store" { "buffer" } else { "texture" }).and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                let index = self.resolve(func, node, "index")?.as_i64().ok_or(EvalError::TypeMismatch)?;
                let value = self.resolve(func, node, "value")?;
                let res = self.resources.get_mut(res_id).ok_or_else(|| ResourceError::NotFound(res_id.to_string()))?;
                res.buffer_store(index, value)?;
                Ok(Completion::Fell)
            }
            "array_set" => {
                // Produces an updated array value; without an assignment
                // target this is only meaningful feeding a `var_set`, so
                // evaluated lazily like a pure node when referenced as data.
                Ok(Completion::Fell)
            }
            op if op.starts_with("atomic_") => {
                self.exec_atomic(func, node)?;
                Ok(Completion::Fell)
            }
            op if op.starts_with("cmd_") => self.exec_command(func, node),
            "comment" => Ok(Completion::Fell),
            other => {
                if crate::ops::lookup(other).map(|d| d.kind) == Some(OpKind::Pure) {
                    // A pure op reachable directly on an execution chain
                    // (rather than only as a data reference) still just
                    // resolves and discards, e.g. a stray literal node.
                    let _ = self.resolve_node(func, node);
                    Ok(Completion::Fell)
                } else {
                    Err(EvalError::Unimplemented(other.to_string()))
                }
            }
        }
    }

    fn exec_loop(&mut self, func: &Function, node: &Node) -> EvalResult<Completion> {
        let tag = node.args.get("tag").and_then(|v| v.as_str()).unwrap_or(&node.id).to_string();
        let (start, end) = if let Some(count) = node.args.get("count") {
            let count = self.value_from_json(func, node, count)?.as_i64().ok_or(EvalError::TypeMismatch)?;
            (0, count)
        } else {
            let start = match node.args.get("start") {
                Some(v) => self.value_from_json(func, node, v)?.as_i64().ok_or(EvalError::TypeMismatch)?,
                None => 0,
            };
            let end = match node.args.get("end") {
                Some(v) => self.value_from_json(func, node, v)?.as_i64().ok_or(EvalError::TypeMismatch)?,
                None => 0,
            };
            (start, end)
        };

        if let Some(body_id) = node.exec_body.clone() {
            let body = func.node(&body_id).cloned().ok_or_else(|| EvalError::MissingNode(body_id.clone()))?;
            for i in start..end {
                self.frame_mut().loop_index.insert(tag.clone(), i);
                if let Completion::Returned(v) = self.run_exec_chain(func, &body)? {
                    return Ok(Completion::Returned(v));
                }
            }
            self.frame_mut().loop_index.remove(&tag);
        }

        if let Some(id) = &node.exec_completed {
            let target = func.node(id).cloned().ok_or_else(|| EvalError::MissingNode(id.clone()))?;
            return self.run_exec_chain(func, &target);
        }
        Ok(Completion::Fell)
    }

    fn exec_call(&mut self, func: &Function, node: &Node) -> EvalResult<Completion> {
        let callee_id = node.args.get("function").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
        let callee = self.doc.function(callee_id).ok_or_else(|| EvalError::MissingNode(callee_id.to_string()))?;

        let mut args = HashMap::new();
        if let Some(arg_values) = node.args.get("args").and_then(|v| v.as_object()).cloned() {
            for (name, json) in &arg_values {
                let v = self.value_from_json(func, node, json)?;
                args.insert(name.clone(), v);
            }
        }

        if let Completion::Returned(Some(v)) = self.call(callee, &args)? {
            self.store_result(node, v);
        }
        Ok(Completion::Fell)
    }

    fn store_result(&mut self, node: &Node, value: Value) {
        self.frame_mut().memo.insert(node.id.clone(), value);
    }

    fn exec_atomic(&mut self, func: &Function, node: &Node) -> EvalResult<Value> {
        let counter_id = node.args.get("counter").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
        let index = self.resolve(func, node, "index")?.as_i64().ok_or(EvalError::TypeMismatch)?;
        let res = self.resources.get(counter_id).ok_or_else(|| ResourceError::NotFound(counter_id.to_string()))?;
        let cell = res.atomic_cell(index)?;

        let result = match node.op.as_str() {
            "atomic_load" => cell.load(),
            "atomic_store" => {
                let v = self.resolve(func, node, "value")?.as_i64().ok_or(EvalError::TypeMismatch)?;
                cell.store(v);
                v
            }
            "atomic_add" => {
                let delta = self.resolve(func, node, "value")?.as_i64().ok_or(EvalError::TypeMismatch)?;
                cell.rmw(|old| old + delta)
            }
            "atomic_sub" => {
                let delta = self.resolve(func, node, "value")?.as_i64().ok_or(EvalError::TypeMismatch)?;
                cell.rmw(|old| old - delta)
            }
            "atomic_min" => {
                let v = self.resolve(func, node, "value")?.as_i64().ok_or(EvalError::TypeMismatch)?;
                cell.rmw(|old| old.min(v))
            }
            "atomic_max" => {
                let v = self.resolve(func, node, "value")?.as_i64().ok_or(EvalError::TypeMismatch)?;
                cell.rmw(|old| old.max(v))
            }
            "atomic_exchange" => {
                let v = self.resolve(func, node, "value")?.as_i64().ok_or(EvalError::TypeMismatch)?;
                cell.rmw(|_| v)
            }
            other => return Err(EvalError::Unimplemented(other.to_string())),
        };
        let value = Value::Int(result);
        self.store_result(node, value.clone());
        Ok(value)
    }

    fn exec_command(&mut self, func: &Function, node: &Node) -> EvalResult<Completion> {
        match node.op.as_str() {
            "cmd_resize_resource" => {
                let res_id = node.args.get("resource").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                let size_json = node.args.get("size").ok_or(EvalError::TypeMismatch)?;
                let size = json_to_resource_size(size_json)?;
                self.resources.resize(res_id, size, Value::Float(0.0))?;
            }
            "cmd_copy_buffer" => {
                let src = node.args.get("src").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                let dst = node.args.get("dst").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                self.resources.copy(src, dst)?;
            }
            "cmd_dispatch" => {
                let shader_id = node.args.get("shader").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?.to_string();
                let dims_json = edges::resolve_dispatch_threads(node).cloned().ok_or(EvalError::TypeMismatch)?;
                let (dx, dy, dz) = self.resolve_dispatch_dims(func, node, &dims_json)?;
                let shader = self.doc.function(&shader_id).ok_or_else(|| EvalError::MissingNode(shader_id))?;
                self.run_dispatch(shader, dx, dy, dz)?;
            }
            "cmd_draw" => {
                // Rasterization itself is an opaque external collaborator
                // (spec.md §1 Non-goals): the reference host has no pixel
                // pipeline to run a vertex/fragment pair through.
            }
            "cmd_sync_to_cpu" | "cmd_wait_cpu_sync" => {
                // Reference host has one shared `ResourceStore`, not separate
                // GPU/CPU memory domains, so there is nothing to sync/wait on.
            }
            other => return Err(EvalError::Unimplemented(other.to_string())),
        }
        Ok(Completion::Fell)
    }

    /// Resolve a `cmd_dispatch` thread-count argument to concrete `u32`
    /// dimensions: a literal `[x, y, z]` array of integers, or a data
    /// reference to an `Int3`/`Float3`-valued node.
    fn resolve_dispatch_dims(&mut self, func: &Function, node: &Node, dims_json: &serde_json::Value) -> EvalResult<(u32, u32, u32)> {
        if let serde_json::Value::Array(items) = dims_json {
            if items.len() == 3 {
                if let Some(ints) = items.iter().map(|v| v.as_i64()).collect::<Option<Vec<_>>>() {
                    return Ok((ints[0] as u32, ints[1] as u32, ints[2] as u32));
                }
            }
        }
        match self.value_from_json(func, node, dims_json)? {
            Value::Int3(v) => Ok((v[0] as u32, v[1] as u32, v[2] as u32)),
            Value::Float3(v) => Ok((v[0] as u32, v[1] as u32, v[2] as u32)),
            _ => Err(EvalError::TypeMismatch),
        }
    }

    /// Run `shader` once per thread id in `[0, dx) x [0, dy) x [0, dz)`,
    /// fanned out over rayon's thread pool (spec.md §5.1 "device concurrency
    /// ... parallel over thread ids"; mirrors `ReferenceRuntime::
    /// dispatch_shader`, the host-driver-facing twin of this call reachable
    /// once a document's `cmd_dispatch` is compiled rather than
    /// tree-walked). Each thread still locks the shared `ResourceStore` for
    /// the span of its own invocation — real parallelism across threads
    /// whose bodies don't touch resources, with resource reads/writes
    /// themselves serialized at the mutex boundary.
    fn run_dispatch(&mut self, shader: &Function, dx: u32, dy: u32, dz: u32) -> EvalResult<()> {
        use rayon::prelude::*;

        let total = (dx as i64) * (dy as i64) * (dz as i64);
        let doc = self.doc;
        let clock = self.clock;
        let resources_mutex = std::sync::Mutex::new(&mut *self.resources);
        let first_error = (0..total)
            .into_par_iter()
            .map(|i| {
                let plane = dx as i64 * dy as i64;
                let z = i / plane;
                let rem = i % plane;
                let y = rem / dx as i64;
                let x = rem % dx as i64;
                let mut guard = resources_mutex.lock().expect("resource store mutex poisoned");
                let mut thread = Evaluator::for_thread(doc, &mut **guard, clock, [x, y, z]);
                thread.call(shader, &HashMap::new())
            })
            .find_any(|r| r.is_err());
        match first_error {
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Resolve a named data argument of `node` to a value, recursing
    /// through data references and memoizing pure nodes per frame
    /// (spec.md §4.4: "resolved lazily ... memoised per function
    /// invocation").
    fn resolve(&mut self, func: &Function, node: &Node, field: &str) -> EvalResult<Value> {
        let json = node.args.get(field).cloned().ok_or(EvalError::TypeMismatch)?;
        self.value_from_json(func, node, &json)
    }

    fn value_from_json(&mut self, func: &Function, _parent: &Node, json: &serde_json::Value) -> EvalResult<Value> {
        if let serde_json::Value::String(text) = json {
            let base = text.split('.').next().unwrap_or(text);
            if let Some(referenced) = func.node(base) {
                let value = self.resolve_node(func, referenced)?;
                if let Some((_, swizzle)) = text.split_once('.') {
                    return self.apply_swizzle(&value, swizzle);
                }
                return Ok(value);
            }
            if let Some(bound) = self.frame().vars.get(text) {
                return Ok((*bound).clone());
            }
        }
        json_literal_to_value(json).ok_or(EvalError::TypeMismatch)
    }

    fn apply_swizzle(&self, value: &Value, pattern: &str) -> EvalResult<Value> {
        let lane_index = |c: char| -> usize {
            match c {
                'x' | 'r' => 0,
                'y' | 'g' => 1,
                'z' | 'b' => 2,
                'w' | 'a' => 3,
                _ => 0,
            }
        };
        if pattern.len() == 1 {
            return value.lane(lane_index(pattern.chars().next().unwrap())).ok_or(EvalError::TypeMismatch);
        }
        let lanes: Vec<f64> = pattern
            .chars()
            .map(|c| value.lane(lane_index(c)).and_then(|v| v.as_f64()).unwrap_or(0.0))
            .collect();
        Ok(match lanes.len() {
            2 => Value::Float2([lanes[0], lanes[1]]),
            3 => Value::Float3([lanes[0], lanes[1], lanes[2]]),
            4 => Value::Float4([lanes[0], lanes[1], lanes[2], lanes[3]]),
            _ => return Err(EvalError::TypeMismatch),
        })
    }

    /// Resolve the value a pure (or already-executed side-effecting) node
    /// produces, memoizing so a fan-in node is computed once per frame.
    fn resolve_node(&mut self, func: &Function, node: &Node) -> EvalResult<Value> {
        if let Some(v) = self.frame().memo.get(&node.id) {
            return Ok(v.clone());
        }
        let value = self.eval_pure(func, node)?;
        self.store_result(node, value.clone());
        Ok(value)
    }

    fn eval_pure(&mut self, func: &Function, node: &Node) -> EvalResult<Value> {
        use Value::*;
        match node.op.as_str() {
            "literal" => node.args.get("value").and_then(json_literal_to_value).ok_or(EvalError::TypeMismatch),
            "var_get" => {
                let name = node.args.get("name").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                self.frame()
                    .vars
                    .get(name)
                    .map(|v| (*v).clone())
                    .ok_or_else(|| EvalError::UndefinedVariable(name.to_string()))
            }
            "builtin_get" => {
                let name = node.args.get("name").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                if name == "gid" {
                    let [x, y, z] = self.thread_id.unwrap_or([0, 0, 0]);
                    return Ok(Value::Int3([x, y, z]));
                }
                Ok(self.clock.builtin(name).unwrap_or(Value::Float(0.0)))
            }
            "const_get" => {
                let name = node.args.get("name").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                match name {
                    "pi" => Ok(Float(std::f64::consts::PI)),
                    "tau" => Ok(Float(std::f64::consts::TAU)),
                    "e" => Ok(Float(std::f64::consts::E)),
                    _ => Err(EvalError::TypeMismatch),
                }
            }
            "loop_index" => {
                let tag = node.args.get("tag").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                self.frame().loop_index.get(tag).copied().map(Int).ok_or(EvalError::TypeMismatch)
            }
            "math_add" => self.binary(func, node, |a, b| a.add(b)),
            "math_sub" => self.binary(func, node, |a, b| a.sub(b)),
            "math_mul" => self.binary(func, node, |a, b| a.mul(b)),
            "math_div" => self.binary(func, node, |a, b| a.div(b)),
            "math_mod" => self.binary(func, node, |a, b| a.modulo(b)),
            "math_pow" => self.binary(func, node, |a, b| a.pow(b)),
            "math_atan2" => self.binary(func, node, |a, b| a.atan2(b)),
            "math_min" => self.binary(func, node, |a, b| a.min(b)),
            "math_max" => self.binary(func, node, |a, b| a.max(b)),
            "math_step" => {
                let edge = self.resolve(func, node, "edge")?.as_f64().ok_or(EvalError::TypeMismatch)?;
                let value = edges::resolve_math_step_value(node).ok_or(EvalError::TypeMismatch)?.clone();
                let x = self.value_from_json(func, node, &value)?.as_f64().ok_or(EvalError::TypeMismatch)?;
                Ok(Float(if x < edge { 0.0 } else { 1.0 }))
            }
            "math_neg" => self.unary(func, node, |v| v.neg()),
            "math_abs" => self.unary(func, node, |v| v.abs()),
            "math_sqrt" => Ok(Float(self.resolve(func, node, "value")?.as_f64().ok_or(EvalError::TypeMismatch)?.sqrt())),
            "math_floor" => Ok(Float(self.resolve(func, node, "value")?.as_f64().ok_or(EvalError::TypeMismatch)?.floor())),
            "math_ceil" => Ok(Float(self.resolve(func, node, "value")?.as_f64().ok_or(EvalError::TypeMismatch)?.ceil())),
            "math_sin" => Ok(Float(self.resolve(func, node, "value")?.as_f64().ok_or(EvalError::TypeMismatch)?.sin())),
            "math_cos" => Ok(Float(self.resolve(func, node, "value")?.as_f64().ok_or(EvalError::TypeMismatch)?.cos())),
            "logic_and" => self.binary(func, node, |a, b| a.and(b)),
            "logic_or" => {
                let a = self.resolve(func, node, "a")?;
                let b = self.resolve(func, node, "b")?;
                match (a, b) {
                    (Bool(a), Bool(b)) => Ok(Bool(a || b)),
                    _ => Err(EvalError::TypeMismatch),
                }
            }
            "logic_not" => self.unary(func, node, |v| v.not()),
            "cmp_lt" => self.binary(func, node, |a, b| a.lt(b)),
            "cmp_gt" => self.binary(func, node, |a, b| a.gt(b)),
            "cmp_lte" => self.binary(func, node, |a, b| a.lte(b)),
            "cmp_gte" => self.binary(func, node, |a, b| a.gte(b)),
            "cmp_eq" => {
                let a = self.resolve(func, node, "a")?;
                let b = self.resolve(func, node, "b")?;
                Ok(Bool(a.eq_value(&b)))
            }
            "cmp_neq" => {
                let a = self.resolve(func, node, "a")?;
                let b = self.resolve(func, node, "b")?;
                Ok(Bool(!a.eq_value(&b)))
            }
            "cast_int" => {
                let v = self.resolve(func, node, "value")?;
                Ok(Int(v.as_i64().ok_or(EvalError::TypeMismatch)?))
            }
            "cast_float" => {
                let v = self.resolve(func, node, "value")?;
                Ok(Float(v.as_f64().ok_or(EvalError::TypeMismatch)?))
            }
            "cast_bool" => {
                let v = self.resolve(func, node, "value")?;
                Ok(v.coerce_bool_numeric(false)?)
            }
            "vec_construct" => self.eval_vec_construct(func, node),
            "swizzle" => {
                let value = self.resolve(func, node, "value")?;
                let pattern = node.args.get("pattern").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                self.apply_swizzle(&value, pattern)
            }
            "vec_element" => {
                let value = self.resolve(func, node, "value")?;
                let index = self.resolve(func, node, "index")?.as_i64().ok_or(EvalError::TypeMismatch)? as usize;
                value.lane(index).ok_or(EvalError::TypeMismatch)
            }
            "mat_mul" => {
                let a = self.resolve(func, node, "a")?;
                let b = self.resolve(func, node, "b")?;
                match (a, b) {
                    (Mat4(m), Float4(v)) => Ok(Float4(m.mul_vec4(v))),
                    _ => Err(EvalError::TypeMismatch),
                }
            }
            "mat_construct" => {
                let columns_json = node.args.get("columns").and_then(|v| v.as_array()).ok_or(EvalError::TypeMismatch)?;
                let mut columns = Vec::with_capacity(columns_json.len());
                for c in columns_json {
                    columns.push(self.value_from_json(func, node, c)?);
                }
                match columns.len() {
                    3 => {
                        let mut m = [0.0; 9];
                        for (c, col) in columns.iter().enumerate() {
                            let lanes = match col {
                                Float3(v) => *v,
                                _ => return Err(EvalError::TypeMismatch),
                            };
                            for r in 0..3 {
                                m[crate::types::matrix_flat_index(c, r, 3)] = lanes[r];
                            }
                        }
                        Ok(Mat3(crate::value::Mat3(m)))
                    }
                    4 => {
                        let mut m = [0.0; 16];
                        for (c, col) in columns.iter().enumerate() {
                            let lanes = match col {
                                Float4(v) => *v,
                                _ => return Err(EvalError::TypeMismatch),
                            };
                            for r in 0..4 {
                                m[crate::types::matrix_flat_index(c, r, 4)] = lanes[r];
                            }
                        }
                        Ok(Mat4(crate::value::Mat4(m)))
                    }
                    _ => Err(EvalError::TypeMismatch),
                }
            }
            "mat_transpose" => {
                let v = self.resolve(func, node, "value")?;
                match v {
                    Mat4(m) => {
                        let mut t = [0.0; 16];
                        for c in 0..4 {
                            for r in 0..4 {
                                t[crate::types::matrix_flat_index(r, c, 4)] = m.get(c, r);
                            }
                        }
                        Ok(Mat4(crate::value::Mat4(t)))
                    }
                    _ => Err(EvalError::TypeMismatch),
                }
            }
            // Quaternions have no dedicated `Value` variant; they are carried
            // as a `Float4` of `[x, y, z, w]` lanes the same way the flat-ABI
            // marshaller would unpack them (spec.md §4.6).
            "quat" => match edges::resolve_quat_form(node).map_err(|_| EvalError::TypeMismatch)? {
                edges::QuatForm::AxisAngle => {
                    let axis = match self.resolve(func, node, "axis")? {
                        Float3(v) => v,
                        _ => return Err(EvalError::TypeMismatch),
                    };
                    let angle = self.resolve(func, node, "angle")?.as_f64().ok_or(EvalError::TypeMismatch)?;
                    let len = (axis[0] * axis[0] + axis[1] * axis[1] + axis[2] * axis[2]).sqrt();
                    let n = if len > 0.0 { [axis[0] / len, axis[1] / len, axis[2] / len] } else { axis };
                    let half = angle / 2.0;
                    let s = half.sin();
                    Ok(Float4([n[0] * s, n[1] * s, n[2] * s, half.cos()]))
                }
                edges::QuatForm::Xyzw => {
                    let x = self.resolve(func, node, "x")?.as_f64().ok_or(EvalError::TypeMismatch)?;
                    let y = self.resolve(func, node, "y")?.as_f64().ok_or(EvalError::TypeMismatch)?;
                    let z = self.resolve(func, node, "z")?.as_f64().ok_or(EvalError::TypeMismatch)?;
                    let w = self.resolve(func, node, "w")?.as_f64().ok_or(EvalError::TypeMismatch)?;
                    Ok(Float4([x, y, z, w]))
                }
            },
            "quat_mul" => {
                let a = self.resolve(func, node, "a")?;
                let b = self.resolve(func, node, "b")?;
                match (a, b) {
                    (Float4([x1, y1, z1, w1]), Float4([x2, y2, z2, w2])) => Ok(Float4([
                        w1 * x2 + x1 * w2 + y1 * z2 - z1 * y2,
                        w1 * y2 - x1 * z2 + y1 * w2 + z1 * x2,
                        w1 * z2 + x1 * y2 - y1 * x2 + z1 * w2,
                        w1 * w2 - x1 * x2 - y1 * y2 - z1 * z2,
                    ])),
                    _ => Err(EvalError::TypeMismatch),
                }
            }
            "struct_construct" => {
                let type_name = node.args.get("type").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                let fields_json = node.args.get("fields").and_then(|v| v.as_object()).ok_or(EvalError::TypeMismatch)?;
                let mut fields = Vec::new();
                for (name, json) in fields_json {
                    let value = self.value_from_json(func, node, json)?;
                    fields.push((name.clone(), value));
                }
                Ok(Struct(Rc::new(StructValue { name: type_name.to_string(), fields })))
            }
            "struct_extract" => {
                let value = self.resolve(func, node, "value")?;
                let field = node.args.get("field").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                match value {
                    Struct(s) => s.get(field).cloned().ok_or(EvalError::TypeMismatch),
                    _ => Err(EvalError::TypeMismatch),
                }
            }
            "array_construct" => {
                let elements = node.args.get("elements").and_then(|v| v.as_array()).ok_or(EvalError::TypeMismatch)?;
                let mut values = Vec::new();
                for e in elements {
                    values.push(self.value_from_json(func, node, e)?);
                }
                Ok(Array(Rc::new(values)))
            }
            "array_extract" => {
                let value = self.resolve(func, node, "value")?;
                let index = self.resolve(func, node, "index")?.as_i64().ok_or(EvalError::TypeMismatch)? as usize;
                match value {
                    Array(items) => items.get(index).cloned().ok_or(EvalError::TypeMismatch),
                    _ => Err(EvalError::TypeMismatch),
                }
            }
            "array_set" => {
                let value = self.resolve(func, node, "value")?;
                let index = self.resolve(func, node, "index")?.as_i64().ok_or(EvalError::TypeMismatch)? as usize;
                let element = self.resolve(func, node, "element")?;
                match value {
                    Array(items) => {
                        let mut updated = (*items).clone();
                        if let Some(slot) = updated.get_mut(index) {
                            *slot = element;
                        }
                        Ok(Array(Rc::new(updated)))
                    }
                    _ => Err(EvalError::TypeMismatch),
                }
            }
            "array_length" => {
                let value = self.resolve(func, node, "value")?;
                match value {
                    Array(items) => Ok(Int(items.len() as i64)),
                    _ => Err(EvalError::TypeMismatch),
                }
            }
            "buffer_load" => {
                let res_id = node.args.get("buffer").and_then(|v| v.as_str()).ok_or(EvalError::TypeMismatch)?;
                let index = self.resolve(func, node, "index")?.as_i64().ok_or(EvalError::TypeMismatch)?;
                let res = self.resources.get(res_id).ok_or_else(|| ResourceError::NotFound(res_id.to_string()))?;
                Ok(res.buffer_load(index)?)
            }
            "atomic_load" | "atomic_add" | "atomic_sub" | "atomic_min" | "atomic_max" | "atomic_exchange" => {
                self.exec_atomic(func, node)
            }
            "call_func" => {
                self.exec_call(func, node)?;
                self.frame().memo.get(&node.id).cloned().ok_or(EvalError::TypeMismatch)
            }
            "comment" => Ok(Value::Bool(false)),
            other => Err(EvalError::Unimplemented(other.to_string())),
        }
    }

    fn binary(&mut self, func: &Function, node: &Node, f: impl Fn(&Value, &Value) -> Result<Value, crate::value::ValueError>) -> EvalResult<Value> {
        let a = self.resolve(func, node, "a")?;
        let b = self.resolve(func, node, "b")?;
        Ok(f(&a, &b)?)
    }

    fn unary(&mut self, func: &Function, node: &Node, f: impl Fn(&Value) -> Result<Value, crate::value::ValueError>) -> EvalResult<Value> {
        let v = self.resolve(func, node, "value")?;
        Ok(f(&v)?)
    }

    fn eval_vec_construct(&mut self, func: &Function, node: &Node) -> EvalResult<Value> {
        let x = self.resolve(func, node, "x")?;
        let y = self.resolve(func, node, "y")?;
        let z = node.args.get("z").map(|_| self.resolve(func, node, "z")).transpose()?;
        let w = node.args.get("w").map(|_| self.resolve(func, node, "w")).transpose()?;
        let is_int = matches!(x, Value::Int(_)) && matches!(y, Value::Int(_));
        let lane = |v: &Value| v.as_f64().unwrap_or(0.0);
        Ok(match (z, w) {
            (None, None) if is_int => Value::Int2([x.as_i64().unwrap_or(0), y.as_i64().unwrap_or(0)]),
            (None, None) => Value::Float2([lane(&x), lane(&y)]),
            (Some(z), None) if is_int => Value::Int3([x.as_i64().unwrap_or(0), y.as_i64().unwrap_or(0), z.as_i64().unwrap_or(0)]),
            (Some(z), None) => Value::Float3([lane(&x), lane(&y), lane(&z)]),
            (Some(z), Some(w)) if is_int => Value::Int4([x.as_i64().unwrap_or(0), y.as_i64().unwrap_or(0), z.as_i64().unwrap_or(0), w.as_i64().unwrap_or(0)]),
            (Some(z), Some(w)) => Value::Float4([lane(&x), lane(&y), lane(&z), lane(&w)]),
            (None, Some(_)) => return Err(EvalError::TypeMismatch),
        })
    }
}

fn json_literal_to_value(json: &serde_json::Value) -> Option<Value> {
    use serde_json::Value as Json;
    match json {
        Json::Bool(b) => Some(Value::Bool(*b)),
        Json::Number(n) if n.is_i64() || n.is_u64() => Some(Value::Int(n.as_i64().unwrap_or(0))),
        Json::Number(n) => Some(Value::Float(n.as_f64().unwrap_or(0.0))),
        Json::String(s) => Some(Value::Str(Rc::new(s.clone()))),
        Json::Array(items) => {
            let floats: Option<Vec<f64>> = items.iter().map(|v| v.as_f64()).collect();
            let floats = floats?;
            match floats.len() {
                2 => Some(Value::Float2([floats[0], floats[1]])),
                3 => Some(Value::Float3([floats[0], floats[1], floats[2]])),
                4 => Some(Value::Float4([floats[0], floats[1], floats[2], floats[3]])),
                _ => None,
            }
        }
        _ => None,
    }
}

fn json_to_resource_size(json: &serde_json::Value) -> EvalResult<crate::document::ResourceSize> {
    use crate::document::ResourceSize;
    use serde_json::Value as Json;
    match json {
        Json::Number(n) => Ok(ResourceSize::Fixed(n.as_u64().ok_or(EvalError::TypeMismatch)? as u32)),
        Json::Array(items) if items.len() == 2 => {
            let w = items[0].as_u64().ok_or(EvalError::TypeMismatch)? as u32;
            let h = items[1].as_u64().ok_or(EvalError::TypeMismatch)? as u32;
            Ok(ResourceSize::Fixed2(w, h))
        }
        _ => Err(EvalError::TypeMismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::marshal::Clock;
    use crate::resources::{AtomicCell, Backing, ResourceState};
    use crate::document::{Persistence, ResourceKind};

    fn doc(json: &str) -> Document {
        Document::from_json_str(json).unwrap()
    }

    #[test]
    fn division_semantics_match_scenario_e() {
        let d = doc(
            r#"{
                "version": "1", "entryPoint": "main", "resources": [], "structs": [],
                "functions": [{
                    "id": "main", "kind": "cpu", "inputs": [], "outputs": [{"name": "out", "type": "int"}],
                    "nodes": [
                        {"id": "a", "op": "literal", "value": 7},
                        {"id": "b", "op": "literal", "value": 2},
                        {"id": "d", "op": "math_div", "a": "a", "b": "b"},
                        {"id": "r", "op": "func_return", "value": "d"}
                    ]
                }]
            }"#,
        );
        let mut resources = ResourceStore::new();
        let clock = Clock::default();
        let mut ev = Evaluator::new(&d, &mut resources, &clock);
        let f = d.function("main").unwrap();
        match ev.call(f, &HashMap::new()).unwrap() {
            Completion::Returned(Some(Value::Int(v))) => assert_eq!(v, 3),
            _ => panic!("expected a returned int"),
        }
    }

    #[test]
    fn negative_int_division_truncates_toward_zero() {
        let d = doc(
            r#"{
                "version": "1", "entryPoint": "main", "resources": [], "structs": [],
                "functions": [{
                    "id": "main", "kind": "cpu", "inputs": [], "outputs": [{"name": "out", "type": "int"}],
                    "nodes": [
                        {"id": "a", "op": "literal", "value": -7},
                        {"id": "b", "op": "literal", "value": 2},
                        {"id": "d", "op": "math_div", "a": "a", "b": "b"},
                        {"id": "r", "op": "func_return", "value": "d"}
                    ]
                }]
            }"#,
        );
        let mut resources = ResourceStore::new();
        let clock = Clock::default();
        let mut ev = Evaluator::new(&d, &mut resources, &clock);
        let f = d.function("main").unwrap();
        if let Completion::Returned(Some(Value::Int(v))) = ev.call(f, &HashMap::new()).unwrap() {
            assert_eq!(v, -3);
        } else {
            panic!("expected a returned int");
        }
    }

    #[test]
    fn matrix_times_point_translation() {
        // spec.md §8 scenario (f): translation by [10,20,0] applied to the
        // origin homogeneous point yields [10,20,0,1].
        let translation = Value::Mat4(Mat4::translation([10.0, 20.0, 0.0]));
        let point = Value::Float4([0.0, 0.0, 0.0, 1.0]);
        let result = translation.mul(&point).unwrap();
        assert_eq!(result, Value::Float4([10.0, 20.0, 0.0, 1.0]));
    }

    #[test]
    fn mat_construct_builds_a_translation_matrix_from_columns() {
        let d = doc(
            r#"{
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
            }"#,
        );
        let mut resources = ResourceStore::new();
        let clock = Clock::default();
        let mut ev = Evaluator::new(&d, &mut resources, &clock);
        let f = d.function("main").unwrap();
        match ev.call(f, &HashMap::new()).unwrap() {
            Completion::Returned(Some(v)) => assert_eq!(v, Value::Float4([10.0, 20.0, 0.0, 1.0])),
            _ => panic!("expected a returned float4"),
        }
    }

    #[test]
    fn atomic_accumulation_returns_pre_modification_value_across_calls() {
        let mut resources = ResourceStore::new();
        resources.insert(
            "cnt",
            ResourceState {
                kind: ResourceKind::AtomicCounter,
                element_type: Some("int".to_string()),
                persistence: Persistence::default(),
                sampler: None,
                backing: Backing::AtomicCounter(vec![AtomicCell::default()]),
            },
        );
        let cell = resources.get("cnt").unwrap().atomic_cell(0).unwrap();
        let mut last = -1;
        for _ in 0..64 {
            let old = cell.rmw(|v| v + 1);
            assert!(old > last);
            last = old;
        }
        assert_eq!(cell.load(), 64);
    }

    #[test]
    fn cmd_dispatch_runs_the_named_shader_once_per_thread_id() {
        let d = doc(
            r#"{
                "version": "1", "entryPoint": "main", "resources": [
                    {"id": "b_output", "kind": "buffer", "elementType": "float", "size": 4}
                ], "structs": [],
                "functions": [
                    {"id": "main", "kind": "cpu", "inputs": [], "outputs": [], "nodes": [
                        {"id": "go", "op": "cmd_dispatch", "shader": "shader_fill", "threads": [4, 1, 1]}
                    ]},
                    {"id": "shader_fill", "kind": "shader", "inputs": [], "outputs": [], "nodes": [
                        {"id": "gid", "op": "builtin_get", "name": "gid"},
                        {"id": "as_float", "op": "cast_float", "value": "gid.x"},
                        {"id": "store", "op": "buffer_store", "buffer": "b_output", "index": "gid.x", "value": "as_float"}
                    ]}
                ]
            }"#,
        );
        let mut resources = crate::resources::build_from_document(&d).unwrap();
        let clock = Clock::default();
        let mut ev = Evaluator::new(&d, &mut resources, &clock);
        let f = d.function("main").unwrap();
        ev.call(f, &HashMap::new()).unwrap();
        for i in 0..4i64 {
            assert_eq!(resources.get("b_output").unwrap().buffer_load(i).unwrap(), Value::Float(i as f64));
        }
    }

    #[test]
    fn quat_xyzw_form_round_trips_through_quat_mul_identity() {
        let d = doc(
            r#"{
                "version": "1", "entryPoint": "main", "resources": [], "structs": [],
                "functions": [{
                    "id": "main", "kind": "cpu", "inputs": [], "outputs": [],
                    "nodes": [
                        {"id": "q", "op": "quat", "x": 0.0, "y": 0.7071067811865476, "z": 0.0, "w": 0.7071067811865476},
                        {"id": "ident", "op": "quat", "x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0},
                        {"id": "mul", "op": "quat_mul", "a": "q", "b": "ident"},
                        {"id": "r", "op": "func_return", "value": "mul"}
                    ]
                }]
            }"#,
        );
        let mut resources = ResourceStore::new();
        let clock = Clock::default();
        let mut ev = Evaluator::new(&d, &mut resources, &clock);
        let f = d.function("main").unwrap();
        match ev.call(f, &HashMap::new()).unwrap() {
            Completion::Returned(Some(Value::Float4(v))) => {
                assert!((v[1] - 0.7071067811865476).abs() < 1e-9);
                assert!((v[3] - 0.7071067811865476).abs() < 1e-9);
            }
            _ => panic!("expected a returned float4"),
        }
    }

    #[test]
    fn quat_axis_angle_form_builds_a_unit_quaternion() {
        let d = doc(
            r#"{
                "version": "1", "entryPoint": "main", "resources": [], "structs": [],
                "functions": [{
                    "id": "main", "kind": "cpu", "inputs": [], "outputs": [],
                    "nodes": [
                        {"id": "q", "op": "quat", "axis": [0.0, 1.0, 0.0], "angle": 3.141592653589793},
                        {"id": "r", "op": "func_return", "value": "q"}
                    ]
                }]
            }"#,
        );
        let mut resources = ResourceStore::new();
        let clock = Clock::default();
        let mut ev = Evaluator::new(&d, &mut resources, &clock);
        let f = d.function("main").unwrap();
        match ev.call(f, &HashMap::new()).unwrap() {
            Completion::Returned(Some(Value::Float4(v))) => {
                let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2] + v[3] * v[3]).sqrt();
                assert!((len - 1.0).abs() < 1e-9);
                assert!((v[1] - 1.0).abs() < 1e-9);
            }
            _ => panic!("expected a returned float4"),
        }
    }
}
