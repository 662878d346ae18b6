//! Runtime value representation (spec.md §9 Design Notes: "a tagged variant
//! spanning scalars, small-vector wrappers, a boxed matrix, a boxed struct
//! ..., and an array indirected by arena index"). Grounded on the teacher's
//! `vm.rs::Value` enum and its `operator!` macro, which is kept verbatim in
//! spirit: a whitelist match table per operator, anything unmatched is a
//! runtime `TypeMismatch`.

use std::collections::HashMap;
use std::rc::Rc;

use crate::types::ValueType;

/// Arena index into an evaluation context's backing array storage
/// (spec.md §9: "array (indirected by arena index to avoid cyclic
/// ownership)").
pub type ArrayRef = usize;

#[derive(Clone, Debug, PartialEq)]
pub struct StructValue {
    pub name: String,
    pub fields: Vec<(String, Value)>,
}

impl StructValue {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat3(pub [f64; 9]);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat4(pub [f64; 16]);

impl Mat4 {
    pub fn identity() -> Mat4 {
        let mut m = [0.0; 16];
        for i in 0..4 {
            m[i * 4 + i] = 1.0;
        }
        Mat4(m)
    }

    pub fn translation(t: [f64; 3]) -> Mat4 {
        let mut m = Mat4::identity();
        // column-major: column 3 holds the translation.
        m.0[3 * 4 + 0] = t[0];
        m.0[3 * 4 + 1] = t[1];
        m.0[3 * 4 + 2] = t[2];
        m
    }

    pub fn get(&self, col: usize, row: usize) -> f64 {
        self.0[crate::types::matrix_flat_index(col, row, 4)]
    }

    pub fn mul_vec4(&self, v: [f64; 4]) -> [f64; 4] {
        let mut out = [0.0; 4];
        for row in 0..4 {
            let mut acc = 0.0;
            for col in 0..4 {
                acc += self.get(col, row) * v[col];
            }
            out[row] = acc;
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(Rc<String>),
    Float2([f64; 2]),
    Float3([f64; 3]),
    Float4([f64; 4]),
    Int2([i64; 2]),
    Int3([i64; 3]),
    Int4([i64; 4]),
    Mat3(Mat3),
    Mat4(Mat4),
    Struct(Rc<StructValue>),
    /// Resident array contents; a resource's backing buffer is a `Vec<Value>`
    /// held by the resource store (`resources.rs`), referenced by id, not by
    /// `Value::Array` (resources are not first-class values, spec.md §3).
    Array(Rc<Vec<Value>>),
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("Type Mismatch")]
    TypeMismatch { lhs: ValueType, rhs: ValueType },
    #[error("Type Mismatch")]
    UnaryTypeMismatch { operand: ValueType },
}

type VResult<T> = Result<T, ValueError>;

fn mismatch(a: &Value, b: &Value) -> ValueError {
    ValueError::TypeMismatch { lhs: a.value_type(), rhs: b.value_type() }
}

/// Factor out the boilerplate of "match the whitelisted operand shapes for
/// this operator, anything else is a runtime type mismatch" — the same
/// macro shape as the teacher's `operator!` in `vm.rs`.
macro_rules! operator {
    (bin $name:ident { $( $p:pat => $e:expr ),+ $(,)? }) => {
        pub fn $name(&self, other: &Value) -> VResult<Value> {
            use Value::*;
            #[allow(unreachable_patterns)]
            match (self, other) {
                $($p => Ok($e)),+,
                (a, b) => Err(mismatch(&a.clone(), &b.clone())),
            }
        }
    };
    (un $name:ident { $( $p:pat => $e:expr ),+ $(,)? }) => {
        pub fn $name(&self) -> VResult<Value> {
            use Value::*;
            match self {
                $($p => Ok($e)),+,
                v => Err(ValueError::UnaryTypeMismatch { operand: v.value_type() }),
            }
        }
    };
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Float(_) => ValueType::Float,
            Value::Int(_) => ValueType::Int,
            Value::Bool(_) => ValueType::Bool,
            Value::Str(_) => ValueType::Str,
            Value::Float2(_) => ValueType::Float2,
            Value::Float3(_) => ValueType::Float3,
            Value::Float4(_) => ValueType::Float4,
            Value::Int2(_) => ValueType::Int2,
            Value::Int3(_) => ValueType::Int3,
            Value::Int4(_) => ValueType::Int4,
            Value::Mat3(_) => ValueType::Float3x3,
            Value::Mat4(_) => ValueType::Float4x4,
            Value::Struct(s) => ValueType::Struct(s.name.clone()),
            Value::Array(items) => {
                let elem = items.first().map(|v| v.value_type()).unwrap_or(ValueType::Float);
                ValueType::Array(Box::new(elem), items.len())
            }
        }
    }

    pub fn zero_of(ty: &ValueType) -> Value {
        match ty {
            ValueType::Float => Value::Float(0.0),
            ValueType::Int => Value::Int(0),
            ValueType::Bool => Value::Bool(false),
            ValueType::Str => Value::Str(Rc::new(String::new())),
            ValueType::Float2 => Value::Float2([0.0; 2]),
            ValueType::Float3 => Value::Float3([0.0; 3]),
            ValueType::Float4 => Value::Float4([0.0; 4]),
            ValueType::Int2 => Value::Int2([0; 2]),
            ValueType::Int3 => Value::Int3([0; 3]),
            ValueType::Int4 => Value::Int4([0; 4]),
            ValueType::Float3x3 => Value::Mat3(Mat3([0.0; 9])),
            ValueType::Float4x4 => Value::Mat4(Mat4([0.0; 16])),
            ValueType::Array(elem, n) => Value::Array(Rc::new(vec![Value::zero_of(elem); *n])),
            ValueType::Struct(name) => Value::Struct(Rc::new(StructValue {
                name: name.clone(),
                fields: Vec::new(),
            })),
        }
    }

    operator! { bin add {
        (Int(a), Int(b)) => Int(a + b),
        (Float(a), Float(b)) => Float(a + b),
        (Float2(a), Float2(b)) => Float2([a[0]+b[0], a[1]+b[1]]),
        (Float3(a), Float3(b)) => Float3([a[0]+b[0], a[1]+b[1], a[2]+b[2]]),
        (Float4(a), Float4(b)) => Float4([a[0]+b[0], a[1]+b[1], a[2]+b[2], a[3]+b[3]]),
        (Int2(a), Int2(b)) => Int2([a[0]+b[0], a[1]+b[1]]),
        (Int3(a), Int3(b)) => Int3([a[0]+b[0], a[1]+b[1], a[2]+b[2]]),
        (Int4(a), Int4(b)) => Int4([a[0]+b[0], a[1]+b[1], a[2]+b[2], a[3]+b[3]])
    } }

    operator! { bin sub {
        (Int(a), Int(b)) => Int(a - b),
        (Float(a), Float(b)) => Float(a - b),
        (Float2(a), Float2(b)) => Float2([a[0]-b[0], a[1]-b[1]]),
        (Float3(a), Float3(b)) => Float3([a[0]-b[0], a[1]-b[1], a[2]-b[2]]),
        (Float4(a), Float4(b)) => Float4([a[0]-b[0], a[1]-b[1], a[2]-b[2], a[3]-b[3]])
    } }

    operator! { bin mul {
        (Int(a), Int(b)) => Int(a * b),
        (Float(a), Float(b)) => Float(a * b),
        (Float2(a), Float2(b)) => Float2([a[0]*b[0], a[1]*b[1]]),
        (Float3(a), Float3(b)) => Float3([a[0]*b[0], a[1]*b[1], a[2]*b[2]]),
        (Float4(a), Float4(b)) => Float4([a[0]*b[0], a[1]*b[1], a[2]*b[2], a[3]*b[3]]),
        (Mat4(a), Float4(b)) => Float4(a.mul_vec4(*b))
    } }

    /// Integer division truncates toward zero (spec.md §4.1); never
    /// silently rounds through a float intermediate.
    operator! { bin div {
        (Int(a), Int(b)) => Int(crate::types::int_div_trunc(*a, *b)),
        (Float(a), Float(b)) => Float(a / b)
    } }

    operator! { bin modulo {
        (Int(a), Int(b)) => Int(a % b),
        (Float(a), Float(b)) => Float(a % b)
    } }

    operator! { bin pow {
        (Int(a), Int(b)) => Int(a.pow(*b as u32)),
        (Float(a), Float(b)) => Float(a.powf(*b))
    } }

    operator! { bin atan2 {
        (Float(a), Float(b)) => Float(a.atan2(*b))
    } }

    operator! { bin min {
        (Int(a), Int(b)) => Int(*a.min(b)),
        (Float(a), Float(b)) => Float(a.min(*b))
    } }

    operator! { bin max {
        (Int(a), Int(b)) => Int(*a.max(b)),
        (Float(a), Float(b)) => Float(a.max(*b))
    } }

    operator! { un neg {
        Int(a) => Int(-a),
        Float(a) => Float(-a)
    } }

    operator! { un abs {
        Int(a) => Int(a.abs()),
        Float(a) => Float(a.abs())
    } }

    operator! { un not {
        Bool(a) => Bool(!a)
    } }

    operator! { bin and {
        (Bool(a), Bool(b)) => Bool(*a && *b)
    } }

    /// Comparisons always produce `bool`; storing the result into a float
    /// location is the generator's job (`select(0, 1, expr)`, spec.md §4.1),
    /// not this op's.
    operator! { bin lt {
        (Int(a), Int(b)) => Bool(a < b),
        (Float(a), Float(b)) => Bool(a < b)
    } }

    operator! { bin gt {
        (Int(a), Int(b)) => Bool(a > b),
        (Float(a), Float(b)) => Bool(a > b)
    } }

    operator! { bin lte {
        (Int(a), Int(b)) => Bool(a <= b),
        (Float(a), Float(b)) => Bool(a <= b)
    } }

    operator! { bin gte {
        (Int(a), Int(b)) => Bool(a >= b),
        (Float(a), Float(b)) => Bool(a >= b)
    } }

    pub fn eq_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => self.value_type() == other.value_type() && format!("{self:?}") == format!("{other:?}"),
        }
    }

    /// `bool <-> {0.0, 1.0}` explicit cast (spec.md §4.1).
    pub fn coerce_bool_numeric(&self, to_float: bool) -> VResult<Value> {
        match (self, to_float) {
            (Value::Bool(b), true) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            (Value::Bool(b), false) => Ok(Value::Int(if *b { 1 } else { 0 })),
            (Value::Float(f), _) => Ok(Value::Bool(*f != 0.0)),
            (Value::Int(i), _) => Ok(Value::Bool(*i != 0)),
            _ => Err(ValueError::UnaryTypeMismatch { operand: self.value_type() }),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(crate::types::wrapping_cast_float_to_int(*f)),
            _ => None,
        }
    }

    /// Index into a vector by lane (0..arity), used by swizzle/element
    /// accessor ops.
    pub fn lane(&self, index: usize) -> Option<Value> {
        match self {
            Value::Float2(v) => v.get(index).map(|x| Value::Float(*x)),
            Value::Float3(v) => v.get(index).map(|x| Value::Float(*x)),
            Value::Float4(v) => v.get(index).map(|x| Value::Float(*x)),
            Value::Int2(v) => v.get(index).map(|x| Value::Int(*x)),
            Value::Int3(v) => v.get(index).map(|x| Value::Int(*x)),
            Value::Int4(v) => v.get(index).map(|x| Value::Int(*x)),
            _ => None,
        }
    }

    /// Flatten a value to its flat-ABI `f32` lanes (spec.md §4.6); structs
    /// and dynamic-length arrays are handled one level up in `marshal.rs`
    /// since they need the document's struct table.
    pub fn flatten_lanes(&self) -> Vec<f32> {
        match self {
            Value::Float(v) => vec![*v as f32],
            Value::Int(v) => vec![*v as f32],
            Value::Bool(v) => vec![if *v { 1.0 } else { 0.0 }],
            Value::Float2(v) => v.iter().map(|x| *x as f32).collect(),
            Value::Float3(v) => v.iter().map(|x| *x as f32).collect(),
            Value::Float4(v) => v.iter().map(|x| *x as f32).collect(),
            Value::Int2(v) => v.iter().map(|x| *x as f32).collect(),
            Value::Int3(v) => v.iter().map(|x| *x as f32).collect(),
            Value::Int4(v) => v.iter().map(|x| *x as f32).collect(),
            Value::Mat3(m) => m.0.iter().map(|x| *x as f32).collect(),
            Value::Mat4(m) => m.0.iter().map(|x| *x as f32).collect(),
            Value::Struct(s) => s.fields.iter().flat_map(|(_, v)| v.flatten_lanes()).collect(),
            Value::Array(items) => items.iter().flat_map(|v| v.flatten_lanes()).collect(),
            Value::Str(_) => Vec::new(),
        }
    }
}

/// Side arena for resource-backed arrays, keyed by resource id, so array
/// values never need cyclic ownership (spec.md §9 Design Notes).
#[derive(Default)]
pub struct Arena {
    arrays: HashMap<ArrayRef, Vec<Value>>,
    next: ArrayRef,
}

impl Arena {
    pub fn alloc(&mut self, contents: Vec<Value>) -> ArrayRef {
        let id = self.next;
        self.next += 1;
        self.arrays.insert(id, contents);
        id
    }

    pub fn get(&self, id: ArrayRef) -> Option<&Vec<Value>> {
        self.arrays.get(&id)
    }

    pub fn get_mut(&mut self, id: ArrayRef) -> Option<&mut Vec<Value>> {
        self.arrays.get_mut(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_mismatched_types_is_type_mismatch() {
        let err = Value::Int(1).add(&Value::Float(1.0)).unwrap_err();
        assert_eq!(
            err,
            ValueError::TypeMismatch { lhs: ValueType::Int, rhs: ValueType::Float }
        );
    }

    #[test]
    fn div_int_truncates_toward_zero() {
        assert_eq!(Value::Int(-7).div(&Value::Int(2)).unwrap(), Value::Int(-3));
        assert_eq!(Value::Int(7).div(&Value::Int(2)).unwrap(), Value::Int(3));
    }

    #[test]
    fn div_float_is_float() {
        assert_eq!(Value::Float(7.0).div(&Value::Float(2.0)).unwrap(), Value::Float(3.5));
    }

    #[test]
    fn translation_matrix_times_point() {
        let m = Mat4::translation([10.0, 20.0, 0.0]);
        assert_eq!(m.mul_vec4([0.0, 0.0, 0.0, 1.0]), [10.0, 20.0, 0.0, 1.0]);
    }

    #[test]
    fn bool_numeric_cast_round_trips() {
        assert_eq!(Value::Bool(true).coerce_bool_numeric(true).unwrap(), Value::Float(1.0));
        assert_eq!(Value::Float(0.0).coerce_bool_numeric(true).unwrap(), Value::Bool(false));
    }
}
