//! Shader type vocabulary and the implicit conversion relation.
//!
//! Scalar kinds are ordered along the promotion ladder
//! `bool < int < uint < half < float`; moving up the ladder is a promotion,
//! moving down is a demotion. Both are implicit in HLSL but rank differently
//! during overload resolution.

use crate::ast::StructId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    Bool,
    Int,
    Uint,
    Half,
    Float,
}

impl ScalarKind {
    pub fn hlsl_name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int => "int",
            ScalarKind::Uint => "uint",
            ScalarKind::Half => "half",
            ScalarKind::Float => "float",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, ScalarKind::Int | ScalarKind::Uint)
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarKind::Half | ScalarKind::Float)
    }

    fn from_name(name: &str) -> Option<ScalarKind> {
        let kind = match name {
            "bool" => ScalarKind::Bool,
            "int" | "min16int" => ScalarKind::Int,
            "uint" | "dword" | "min16uint" => ScalarKind::Uint,
            "half" | "min16float" | "min10float" => ScalarKind::Half,
            "float" | "double" => ScalarKind::Float,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerDim {
    Tex2D,
    Tex3D,
    Cube,
}

/// Arrangement of the components of a numeric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Scalar,
    Vector(u8),
    Matrix(u8, u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Scalar(ScalarKind),
    Vector(ScalarKind, u8),
    /// Rows, then columns, as spelled in HLSL (`float3x4` has 3 rows).
    Matrix(ScalarKind, u8, u8),
    /// Combined texture/sampler handle with the scalar its fetches return.
    Sampler(SamplerDim, ScalarKind),
    Struct(StructId),
    Array(Box<Type>, Option<u32>),
}

impl Type {
    pub const FLOAT: Type = Type::Scalar(ScalarKind::Float);
    pub const INT: Type = Type::Scalar(ScalarKind::Int);
    pub const BOOL: Type = Type::Scalar(ScalarKind::Bool);

    /// Vector of `n` components; a single component degrades to the scalar.
    pub fn vector(kind: ScalarKind, n: u8) -> Type {
        if n == 1 { Type::Scalar(kind) } else { Type::Vector(kind, n) }
    }

    pub fn from_shape(kind: ScalarKind, shape: Shape) -> Type {
        match shape {
            Shape::Scalar => Type::Scalar(kind),
            Shape::Vector(n) => Type::vector(kind, n),
            Shape::Matrix(r, c) => Type::Matrix(kind, r, c),
        }
    }

    pub fn shape(&self) -> Option<Shape> {
        match self {
            Type::Scalar(_) => Some(Shape::Scalar),
            Type::Vector(_, n) => Some(Shape::Vector(*n)),
            Type::Matrix(_, r, c) => Some(Shape::Matrix(*r, *c)),
            _ => None,
        }
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Type::Scalar(k) | Type::Vector(k, _) | Type::Matrix(k, _, _) => Some(*k),
            _ => None,
        }
    }

    pub fn with_kind(&self, kind: ScalarKind) -> Option<Type> {
        self.shape().map(|shape| Type::from_shape(kind, shape))
    }

    pub fn is_numeric(&self) -> bool {
        self.shape().is_some()
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Scalar(_))
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Type::Vector(..))
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Type::Matrix(..))
    }

    pub fn is_sampler(&self) -> bool {
        matches!(self, Type::Sampler(..))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn component_count(&self) -> Option<u32> {
        match self.shape()? {
            Shape::Scalar => Some(1),
            Shape::Vector(n) => Some(n as u32),
            Shape::Matrix(r, c) => Some(r as u32 * c as u32),
        }
    }

    /// Element type of an indexing expression (`v[i]`, `m[i]`, `a[i]`).
    pub fn index_result(&self) -> Option<Type> {
        match self {
            Type::Vector(k, _) => Some(Type::Scalar(*k)),
            Type::Matrix(k, _, c) => Some(Type::vector(*k, *c)),
            Type::Array(elem, _) => Some((**elem).clone()),
            _ => None,
        }
    }

    /// Strip array extents, returning the innermost element type.
    pub fn base_element(&self) -> &Type {
        match self {
            Type::Array(elem, _) => elem.base_element(),
            other => other,
        }
    }

    /// Resolve a built-in type keyword such as `float4`, `half3x3` or `sampler2D`.
    pub fn from_builtin_name(name: &str) -> Option<Type> {
        match name {
            "void" => return Some(Type::Void),
            "sampler" | "sampler2D" => return Some(Type::Sampler(SamplerDim::Tex2D, ScalarKind::Float)),
            "sampler3D" => return Some(Type::Sampler(SamplerDim::Tex3D, ScalarKind::Float)),
            "samplerCUBE" => return Some(Type::Sampler(SamplerDim::Cube, ScalarKind::Float)),
            _ => {}
        }

        if let Some(kind) = ScalarKind::from_name(name) {
            return Some(Type::Scalar(kind));
        }

        let split = name.find(|c: char| c.is_ascii_digit()).unwrap_or(name.len());
        let (base, dims) = name.split_at(split);
        let kind = ScalarKind::from_name(base)?;

        let digit = |c: u8| (b'1'..=b'4').contains(&c).then(|| c - b'0');
        match dims.as_bytes() {
            [n] => Some(Type::vector(kind, digit(*n)?)),
            [r, b'x', c] => {
                let (r, c) = (digit(*r)?, digit(*c)?);
                (r >= 2 && c >= 2).then_some(Type::Matrix(kind, r, c))
            }
            _ => None,
        }
    }

    /// HLSL spelling, with struct names supplied by the caller.
    pub fn display_with<F>(&self, struct_name: &F) -> String
    where
        F: Fn(StructId) -> String,
    {
        match self {
            Type::Void => "void".to_string(),
            Type::Scalar(k) => k.hlsl_name().to_string(),
            Type::Vector(k, n) => format!("{}{}", k.hlsl_name(), n),
            Type::Matrix(k, r, c) => format!("{}{}x{}", k.hlsl_name(), r, c),
            Type::Sampler(dim, _) => match dim {
                SamplerDim::Tex2D => "sampler2D".to_string(),
                SamplerDim::Tex3D => "sampler3D".to_string(),
                SamplerDim::Cube => "samplerCUBE".to_string(),
            },
            Type::Struct(id) => struct_name(*id),
            Type::Array(elem, Some(n)) => format!("{}[{}]", elem.display_with(struct_name), n),
            Type::Array(elem, None) => format!("{}[]", elem.display_with(struct_name)),
        }
    }
}

const RANK_PROMOTION: u32 = 1;
const RANK_DEMOTION: u32 = 2;
const RANK_BROADCAST: u32 = 3;
const RANK_TRUNCATION: u32 = 4;

fn kind_rank(from: ScalarKind, to: ScalarKind) -> u32 {
    if from == to {
        0
    } else if from < to {
        RANK_PROMOTION
    } else {
        RANK_DEMOTION
    }
}

fn shape_rank(from: Shape, to: Shape) -> Option<u32> {
    match (from, to) {
        _ if from == to => Some(0),
        (Shape::Scalar, Shape::Vector(_) | Shape::Matrix(..)) => Some(RANK_BROADCAST),
        (Shape::Vector(_) | Shape::Matrix(..), Shape::Scalar) => Some(RANK_TRUNCATION),
        (Shape::Vector(n), Shape::Vector(m)) if m < n => Some(RANK_TRUNCATION),
        (Shape::Matrix(r, c), Shape::Matrix(r2, c2)) if r2 <= r && c2 <= c => Some(RANK_TRUNCATION),
        _ => None,
    }
}

/// Cost of implicitly converting `from` into `to`.
///
/// `Some(0)` means the types are identical, `None` means no implicit
/// conversion exists.
pub fn conversion_rank(from: &Type, to: &Type) -> Option<u32> {
    if from == to {
        return Some(0);
    }
    match (from.shape(), to.shape()) {
        (Some(fs), Some(ts)) => {
            let fk = from.scalar_kind()?;
            let tk = to.scalar_kind()?;
            Some(kind_rank(fk, tk) + shape_rank(fs, ts)?)
        }
        _ => match (from, to) {
            (Type::Array(fe, Some(_)), Type::Array(te, None)) if fe == te => Some(RANK_TRUNCATION),
            _ => None,
        },
    }
}

pub fn is_convertible(from: &Type, to: &Type) -> bool {
    conversion_rank(from, to).is_some()
}

fn combine_shapes(lhs: Shape, rhs: Shape) -> Option<Shape> {
    match (lhs, rhs) {
        (Shape::Scalar, other) | (other, Shape::Scalar) => Some(other),
        (Shape::Vector(n), Shape::Vector(m)) => Some(Shape::Vector(n.min(m))),
        (Shape::Matrix(r, c), Shape::Matrix(r2, c2)) => Some(Shape::Matrix(r.min(r2), c.min(c2))),
        _ => None,
    }
}

/// Common type of the operands of a component-wise binary operator.
///
/// Arithmetic promotes `bool` operands to `int`; comparisons keep them.
pub fn combine_operands(lhs: &Type, rhs: &Type, promote_bool: bool) -> Option<Type> {
    let shape = combine_shapes(lhs.shape()?, rhs.shape()?)?;
    let mut kind = lhs.scalar_kind()?.max(rhs.scalar_kind()?);
    if promote_bool && kind == ScalarKind::Bool {
        kind = ScalarKind::Int;
    }
    Some(Type::from_shape(kind, shape))
}

/// Type an operand is converted to before a component-wise operator with
/// result `common`. Scalars keep their shape and rely on broadcasting.
pub fn operand_target(common: &Type, operand: &Type) -> Option<Type> {
    let kind = common.scalar_kind()?;
    if operand.is_scalar() {
        Some(Type::Scalar(kind))
    } else {
        Some(common.clone())
    }
}
