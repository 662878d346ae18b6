//! The closed value-type lattice and its coercion rules (spec.md §4.1).
//!
//! Every op in the registry (`ops.rs`) produces a statically-inferred
//! `ValueType`; the validator's logic pass (`validator.rs`) and both device
//! code generators (`codegen/`) share the `unify`/`broadcast` helpers here so
//! mixed-type arithmetic and scalar-broadcast insertion can never drift
//! between the interpreter and a generated backend. Grounded on the
//! teacher's `ast.rs::TypeTag` closed enum and the coercion arms scattered
//! through `typechecker.rs::eval_binop`/`eval_unop`, centralized per Design
//! Note 9 ("mixed float/int in generator", "bool vs 0/1", "broadcast").

use std::fmt;

/// The closed set of value types (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Float,
    Int,
    Bool,
    Str,
    Float2,
    Float3,
    Float4,
    Int2,
    Int3,
    Int4,
    Float3x3,
    Float4x4,
    /// Fixed-size array of a homogeneous element type.
    Array(Box<ValueType>, usize),
    /// Reference to a user-declared struct by id; members live in the
    /// document's struct table, not inline here.
    Struct(String),
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Float => write!(f, "float"),
            ValueType::Int => write!(f, "int"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::Str => write!(f, "string"),
            ValueType::Float2 => write!(f, "float2"),
            ValueType::Float3 => write!(f, "float3"),
            ValueType::Float4 => write!(f, "float4"),
            ValueType::Int2 => write!(f, "int2"),
            ValueType::Int3 => write!(f, "int3"),
            ValueType::Int4 => write!(f, "int4"),
            ValueType::Float3x3 => write!(f, "float3x3"),
            ValueType::Float4x4 => write!(f, "float4x4"),
            ValueType::Array(elem, n) => write!(f, "array<{elem}, {n}>"),
            ValueType::Struct(id) => write!(f, "{id}"),
        }
    }
}

impl ValueType {
    pub fn is_numeric_scalar(&self) -> bool {
        matches!(self, ValueType::Float | ValueType::Int)
    }

    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            ValueType::Float2
                | ValueType::Float3
                | ValueType::Float4
                | ValueType::Int2
                | ValueType::Int3
                | ValueType::Int4
        )
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, ValueType::Float3x3 | ValueType::Float4x4)
    }

    /// Number of scalar lanes: 1 for scalars, 2/3/4 for vectors, 9/16 for
    /// matrices, the flat-ABI element count for arrays/structs is computed
    /// by `marshal.rs`, not here (it needs the struct table).
    pub fn lanes(&self) -> usize {
        match self {
            ValueType::Float | ValueType::Int | ValueType::Bool | ValueType::Str => 1,
            ValueType::Float2 | ValueType::Int2 => 2,
            ValueType::Float3 | ValueType::Int3 => 3,
            ValueType::Float4 | ValueType::Int4 => 4,
            ValueType::Float3x3 => 9,
            ValueType::Float4x4 => 16,
            ValueType::Array(elem, n) => elem.lanes() * n,
            ValueType::Struct(_) => 0, // resolved via the struct table
        }
    }

    /// The scalar element type underlying a vector, or `self` for scalars.
    pub fn element_type(&self) -> ValueType {
        match self {
            ValueType::Float2 | ValueType::Float3 | ValueType::Float4 => ValueType::Float,
            ValueType::Int2 | ValueType::Int3 | ValueType::Int4 => ValueType::Int,
            other => other.clone(),
        }
    }

    /// Construct the vector type with the same arity as `self` but a float
    /// element type (the shape numeric binary ops unify mixed int/float
    /// vectors onto).
    fn float_sibling(&self) -> Option<ValueType> {
        match self {
            ValueType::Int2 => Some(ValueType::Float2),
            ValueType::Int3 => Some(ValueType::Float3),
            ValueType::Int4 => Some(ValueType::Float4),
            ValueType::Float2 | ValueType::Float3 | ValueType::Float4 => Some(self.clone()),
            _ => None,
        }
    }
}

/// How a single operand must be converted to reach the unified type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coercion {
    /// No conversion needed.
    Identity,
    /// `int` -> `float` (or the int-vector -> float-vector sibling).
    IntToFloat,
    /// Scalar broadcast to every lane of a vector shape.
    Broadcast,
    /// `bool` -> numeric `0.0`/`1.0` (or the reverse, at a comparison site).
    BoolToNumeric,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnifyError {
    pub lhs: ValueType,
    pub rhs: ValueType,
}

/// Unify two operand types for a numeric binary op, per spec.md §4.1:
/// int<->float mix unifies to float; scalar broadcasts to a vector operand;
/// cross-element-type vectors (e.g. `float3` vs `int3`) never unify; shapes
/// otherwise must match exactly.
pub fn unify(a: &ValueType, b: &ValueType) -> Result<(ValueType, Coercion, Coercion), UnifyError> {
    use ValueType::*;

    if a == b {
        return Ok((a.clone(), Coercion::Identity, Coercion::Identity));
    }

    match (a, b) {
        (Int, Float) => Ok((Float, Coercion::IntToFloat, Coercion::Identity)),
        (Float, Int) => Ok((Float, Coercion::Identity, Coercion::IntToFloat)),

        // scalar -> vector broadcast (same element kind only)
        (scalar, vector) if scalar.is_numeric_scalar() && vector.is_vector() => {
            if vector.element_type() == *scalar || (*scalar == Int && vector.element_type() == Float) {
                Ok((vector.clone(), Coercion::Broadcast, Coercion::Identity))
            } else {
                Err(UnifyError { lhs: a.clone(), rhs: b.clone() })
            }
        }
        (vector, scalar) if scalar.is_numeric_scalar() && vector.is_vector() => {
            if vector.element_type() == *scalar || (*scalar == Int && vector.element_type() == Float) {
                Ok((vector.clone(), Coercion::Identity, Coercion::Broadcast))
            } else {
                Err(UnifyError { lhs: a.clone(), rhs: b.clone() })
            }
        }

        // int-vector / float-vector of matching arity unify to float-vector
        (v1, v2) if v1.is_vector() && v2.is_vector() => {
            match (v1.float_sibling(), v2.float_sibling()) {
                (Some(f1), Some(f2)) if f1 == f2 => {
                    let c1 = if v1 == &f1 { Coercion::Identity } else { Coercion::IntToFloat };
                    let c2 = if v2 == &f2 { Coercion::Identity } else { Coercion::IntToFloat };
                    Ok((f1, c1, c2))
                }
                _ => Err(UnifyError { lhs: a.clone(), rhs: b.clone() }),
            }
        }

        _ => Err(UnifyError { lhs: a.clone(), rhs: b.clone() }),
    }
}

/// Broadcast a value's static shape to `target`, used by the code generators
/// to emit scalar-to-vector constructors (spec.md §4.7) and by the
/// evaluator to replicate a scalar lane-wise.
pub fn broadcast_shape(value: &ValueType, target: &ValueType) -> Option<ValueType> {
    if value == target {
        return Some(target.clone());
    }
    if value.is_numeric_scalar() && target.is_vector() {
        if target.element_type() == *value || (*value == ValueType::Int && target.element_type() == ValueType::Float)
        {
            return Some(target.clone());
        }
    }
    None
}

/// Parse a document type-name string into the closed lattice; anything
/// unrecognized is assumed to be a user struct id (spec.md §3).
pub fn parse_type_name(name: &str) -> ValueType {
    match name {
        "float" => ValueType::Float,
        "int" => ValueType::Int,
        "bool" => ValueType::Bool,
        "string" => ValueType::Str,
        "float2" => ValueType::Float2,
        "float3" => ValueType::Float3,
        "float4" => ValueType::Float4,
        "int2" => ValueType::Int2,
        "int3" => ValueType::Int3,
        "int4" => ValueType::Int4,
        "float3x3" => ValueType::Float3x3,
        "float4x4" => ValueType::Float4x4,
        other => ValueType::Struct(other.to_string()),
    }
}

/// Matrix element access is flat column-major: `index = col * col_size + row`
/// (spec.md §4.1).
pub fn matrix_flat_index(col: usize, row: usize, col_size: usize) -> usize {
    col * col_size + row
}

/// `static_cast_int` on an out-of-range float wraps rather than saturating
/// or panicking (spec.md §4.1), matching the documented two's-complement
/// truncation of the generated device code's `i32` cast.
pub fn wrapping_cast_float_to_int(value: f64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    if value >= i64::MAX as f64 {
        return (value as i128 as u64) as i64;
    }
    if value < i64::MIN as f64 {
        return (value as i128 as u64) as i64;
    }
    value as i64
}

/// Integer division truncates toward zero; never silently rounds via float
/// (spec.md §4.1).
pub fn int_div_trunc(a: i64, b: i64) -> i64 {
    a.wrapping_div(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_unify() {
        assert_eq!(
            unify(&ValueType::Float, &ValueType::Float),
            Ok((ValueType::Float, Coercion::Identity, Coercion::Identity))
        );
    }

    #[test]
    fn int_float_mix_unifies_to_float() {
        assert_eq!(
            unify(&ValueType::Int, &ValueType::Float),
            Ok((ValueType::Float, Coercion::IntToFloat, Coercion::Identity))
        );
    }

    #[test]
    fn scalar_broadcasts_to_vector() {
        assert_eq!(
            unify(&ValueType::Float, &ValueType::Float3),
            Ok((ValueType::Float3, Coercion::Broadcast, Coercion::Identity))
        );
    }

    #[test]
    fn cross_element_vectors_never_unify() {
        assert!(unify(&ValueType::Float3, &ValueType::Int4).is_err());
        assert!(unify(&ValueType::Float2, &ValueType::Bool).is_err());
    }

    #[test]
    fn matrix_index_is_column_major() {
        // 4x4: column 2, row 1 -> 2*4 + 1 = 9
        assert_eq!(matrix_flat_index(2, 1, 4), 9);
    }

    #[test]
    fn int_div_truncates_toward_zero() {
        assert_eq!(int_div_trunc(-7, 2), -3);
        assert_eq!(int_div_trunc(7, 2), 3);
    }

    #[test]
    fn wrapping_cast_does_not_panic_on_overflow() {
        let _ = wrapping_cast_float_to_int(1e30);
        let _ = wrapping_cast_float_to_int(-1e30);
        assert_eq!(wrapping_cast_float_to_int(f64::NAN), 0);
    }
}
