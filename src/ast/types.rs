//! Type system definitions for the AST.
//!
//! This module defines the type system used in the language, including:
//!
//! - Language-level types written by the type checker (`int`, `long`,
//!   `float`, `double`, `string`, arrays, `json`)
//! - Machine-level categories written by the lowering pass (`i32`,
//!   `i64`, `f32`, `f64` and the pointer categories)
//! - Function signatures, including the closure provenance link
//! - Literal value representations
//!
//! Types start out on nodes as annotations or inferred names, and are
//! rewritten in place to machine categories by the lowering pass. Keeping
//! both levels in one enum makes that rewrite a total `Ty -> Ty` table
//! and lets the generator match exhaustively on what it receives.

use std::fmt::Display;

use super::nodes::Expr;

/// A type descriptor attached to nodes, signatures and scope entries.
///
/// The first group of variants is what the type checker produces; the
/// second group is what the lowering pass rewrites them to. The code
/// generator only ever sees the second group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    /// 32-bit integer, the default numeric type.
    Int,
    /// 64-bit integer.
    Long,
    /// 32-bit float. Only reachable through an explicit annotation.
    Float,
    /// 64-bit float. Every float literal and float-promoted operation.
    Double,
    Str,
    Array(Box<Ty>),
    Json,
    /// A callable bound to a name. Never a machine value; calls through
    /// the name are rewritten to direct calls during finalization.
    Func,
    /// Statements and value-less expressions.
    Nothing,

    // Machine-level categories, produced by lowering.
    I32,
    I64,
    F32,
    F64,
    /// Offset of a NUL-terminated string in linear memory.
    StrPtr,
    /// Offset of a length-prefixed array in linear memory. The element
    /// type is already machine-level.
    ArrPtr(Box<Ty>),
    /// Offset of a serialized JSON payload in linear memory.
    JsonPtr,
}

impl Ty {
    /// Whether this is a language-level numeric type that participates
    /// in the widening lattice.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Long | Ty::Float | Ty::Double)
    }

    /// Whether this is a machine-level category (post-lowering).
    pub fn is_machine(&self) -> bool {
        matches!(
            self,
            Ty::I32
                | Ty::I64
                | Ty::F32
                | Ty::F64
                | Ty::StrPtr
                | Ty::ArrPtr(_)
                | Ty::JsonPtr
                | Ty::Nothing
        )
    }

    /// Position in the widening lattice `Int -> Long -> Float -> Double`.
    ///
    /// Machine scalars rank the same as their language counterparts so
    /// the conversion tables can reuse the ordering.
    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            Ty::Int | Ty::I32 => Some(0),
            Ty::Long | Ty::I64 => Some(1),
            Ty::Float | Ty::F32 => Some(2),
            Ty::Double | Ty::F64 => Some(3),
            _ => None,
        }
    }

    /// Whether this type carries a floating representation.
    pub fn is_float(&self) -> bool {
        matches!(self, Ty::Float | Ty::Double | Ty::F32 | Ty::F64)
    }

    /// The wasm value type keyword for a machine-level category.
    ///
    /// All pointer categories occupy an `i32` slot: an "object" value at
    /// the machine level is purely an offset into linear memory.
    ///
    /// # Panics
    ///
    /// Panics when called on a language-level type or `Nothing`; the
    /// lowering pass must have run first.
    pub fn val_type(&self) -> &'static str {
        match self {
            Ty::I32 => "i32",
            Ty::I64 => "i64",
            Ty::F32 => "f32",
            Ty::F64 => "f64",
            Ty::StrPtr | Ty::ArrPtr(_) | Ty::JsonPtr => "i32",
            other => panic!("val_type called on unlowered type {:?}", other),
        }
    }

    /// Index into the scalar instruction tables (i32, i64, f32, f64).
    ///
    /// Pointer categories have no scalar instructions; arithmetic on
    /// them is a checked error, not a table entry.
    pub fn scalar_index(&self) -> Option<usize> {
        match self {
            Ty::I32 => Some(0),
            Ty::I64 => Some(1),
            Ty::F32 => Some(2),
            Ty::F64 => Some(3),
            _ => None,
        }
    }

    /// Byte width of an array element of this machine type.
    pub fn elem_width(&self) -> u32 {
        match self {
            Ty::I64 | Ty::F64 => 8,
            _ => 4,
        }
    }
}

impl Display for Ty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ty::Int => write!(f, "int"),
            Ty::Long => write!(f, "long"),
            Ty::Float => write!(f, "float"),
            Ty::Double => write!(f, "double"),
            Ty::Str => write!(f, "string"),
            Ty::Array(elem) => write!(f, "array of {}", elem),
            Ty::Json => write!(f, "json"),
            Ty::Func => write!(f, "function"),
            Ty::Nothing => write!(f, "nothing"),
            Ty::I32 => write!(f, "i32"),
            Ty::I64 => write!(f, "i64"),
            Ty::F32 => write!(f, "f32"),
            Ty::F64 => write!(f, "f64"),
            Ty::StrPtr => write!(f, "string pointer"),
            Ty::ArrPtr(elem) => write!(f, "array pointer of {}", elem),
            Ty::JsonPtr => write!(f, "json pointer"),
        }
    }
}

/// A literal value carried by a `Literal` expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    /// Booleans are integer-typed 1/0 at the machine level.
    Bool(bool),
}

impl LiteralValue {
    /// The language-level type of this literal.
    pub fn ty(&self) -> Ty {
        match self {
            LiteralValue::Int(_) => Ty::Int,
            LiteralValue::Long(_) => Ty::Long,
            LiteralValue::Float(_) => Ty::Float,
            LiteralValue::Double(_) => Ty::Double,
            LiteralValue::Str(_) => Ty::Str,
            LiteralValue::Bool(_) => Ty::Int,
        }
    }
}

/// One parameter slot of a signature.
///
/// The type stays `None` until an annotation, a call site (pass 2) or
/// the body walk fills it in.
#[derive(Debug, Clone)]
pub struct ParamSlot {
    pub name: String,
    pub ty: Option<Ty>,
    pub default: Option<Expr>,
}

/// A callable's shape: ordered parameter slots plus a return type.
///
/// A signature whose `lifted_name` is set is a closure value: the link
/// points at the module-level function its anonymous body was lifted to.
/// Aliasing a callable (`let f2 = f1`) copies the whole signature,
/// including that link, so calls through the alias dispatch directly.
#[derive(Debug, Clone)]
pub struct Signature {
    pub params: Vec<ParamSlot>,
    pub return_ty: Option<Ty>,
    /// Target function name for closures and aliases.
    pub lifted_name: Option<String>,
    /// Host-supplied functions are imported, never emitted or exported.
    pub is_native: bool,
}

impl Signature {
    pub fn new(params: Vec<ParamSlot>, return_ty: Option<Ty>) -> Self {
        Signature {
            params,
            return_ty,
            lifted_name: None,
            is_native: false,
        }
    }

    /// A host import signature with fully-known parameter types.
    pub fn native(params: Vec<(&str, Ty)>, return_ty: Ty) -> Self {
        Signature {
            params: params
                .into_iter()
                .map(|(name, ty)| ParamSlot {
                    name: String::from(name),
                    ty: Some(ty),
                    default: None,
                })
                .collect(),
            return_ty: Some(return_ty),
            lifted_name: None,
            is_native: true,
        }
    }
}
