// Built-in HLSL function vocabulary.
// Provides the overload candidates the parser resolves intrinsic calls against.

use crate::types::{SamplerDim, ScalarKind, Shape, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Intrinsic {
    Abs,
    Acos,
    All,
    Any,
    Asin,
    Atan,
    Atan2,
    Ceil,
    Clamp,
    Clip,
    Cos,
    Cosh,
    Cross,
    Ddx,
    Ddy,
    Degrees,
    Determinant,
    Distance,
    Dot,
    Exp,
    Exp2,
    FaceForward,
    Floor,
    Fmod,
    Frac,
    Fwidth,
    IsInf,
    IsNan,
    Ldexp,
    Length,
    Lerp,
    Log,
    Log10,
    Log2,
    Mad,
    Max,
    Min,
    Mul,
    Normalize,
    Pow,
    Radians,
    Reflect,
    Refract,
    Round,
    Rsqrt,
    Saturate,
    Sign,
    Sin,
    Sinh,
    SmoothStep,
    Sqrt,
    Step,
    Tan,
    Tanh,
    Transpose,
    Trunc,
    Tex2D,
    Tex2DBias,
    Tex2DGrad,
    Tex2DLod,
    Tex2DProj,
    Tex3D,
    Tex3DLod,
    TexCube,
    TexCubeBias,
    TexCubeLod,
}

/// One overload of an intrinsic. Every parameter is an `in` parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl Signature {
    fn new(params: Vec<Type>, ret: Type) -> Self {
        Signature { params, ret }
    }
}

const F: ScalarKind = ScalarKind::Float;

/// Float scalar and vector shapes, `float` through `float4`.
fn float_shapes(kind: ScalarKind) -> impl Iterator<Item = Type> {
    (1..=4).map(move |n| Type::vector(kind, n))
}

fn all_matrix_shapes() -> impl Iterator<Item = (u8, u8)> {
    (2..=4).flat_map(|r| (2..=4).map(move |c| (r, c)))
}

impl Intrinsic {
    pub const ALL: &'static [Intrinsic] = &[
        Intrinsic::Abs,
        Intrinsic::Acos,
        Intrinsic::All,
        Intrinsic::Any,
        Intrinsic::Asin,
        Intrinsic::Atan,
        Intrinsic::Atan2,
        Intrinsic::Ceil,
        Intrinsic::Clamp,
        Intrinsic::Clip,
        Intrinsic::Cos,
        Intrinsic::Cosh,
        Intrinsic::Cross,
        Intrinsic::Ddx,
        Intrinsic::Ddy,
        Intrinsic::Degrees,
        Intrinsic::Determinant,
        Intrinsic::Distance,
        Intrinsic::Dot,
        Intrinsic::Exp,
        Intrinsic::Exp2,
        Intrinsic::FaceForward,
        Intrinsic::Floor,
        Intrinsic::Fmod,
        Intrinsic::Frac,
        Intrinsic::Fwidth,
        Intrinsic::IsInf,
        Intrinsic::IsNan,
        Intrinsic::Ldexp,
        Intrinsic::Length,
        Intrinsic::Lerp,
        Intrinsic::Log,
        Intrinsic::Log10,
        Intrinsic::Log2,
        Intrinsic::Mad,
        Intrinsic::Max,
        Intrinsic::Min,
        Intrinsic::Mul,
        Intrinsic::Normalize,
        Intrinsic::Pow,
        Intrinsic::Radians,
        Intrinsic::Reflect,
        Intrinsic::Refract,
        Intrinsic::Round,
        Intrinsic::Rsqrt,
        Intrinsic::Saturate,
        Intrinsic::Sign,
        Intrinsic::Sin,
        Intrinsic::Sinh,
        Intrinsic::SmoothStep,
        Intrinsic::Sqrt,
        Intrinsic::Step,
        Intrinsic::Tan,
        Intrinsic::Tanh,
        Intrinsic::Transpose,
        Intrinsic::Trunc,
        Intrinsic::Tex2D,
        Intrinsic::Tex2DBias,
        Intrinsic::Tex2DGrad,
        Intrinsic::Tex2DLod,
        Intrinsic::Tex2DProj,
        Intrinsic::Tex3D,
        Intrinsic::Tex3DLod,
        Intrinsic::TexCube,
        Intrinsic::TexCubeBias,
        Intrinsic::TexCubeLod,
    ];

    pub fn from_name(name: &str) -> Option<Intrinsic> {
        Intrinsic::ALL.iter().copied().find(|i| i.name() == name)
    }

    /// HLSL spelling.
    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::Abs => "abs",
            Intrinsic::Acos => "acos",
            Intrinsic::All => "all",
            Intrinsic::Any => "any",
            Intrinsic::Asin => "asin",
            Intrinsic::Atan => "atan",
            Intrinsic::Atan2 => "atan2",
            Intrinsic::Ceil => "ceil",
            Intrinsic::Clamp => "clamp",
            Intrinsic::Clip => "clip",
            Intrinsic::Cos => "cos",
            Intrinsic::Cosh => "cosh",
            Intrinsic::Cross => "cross",
            Intrinsic::Ddx => "ddx",
            Intrinsic::Ddy => "ddy",
            Intrinsic::Degrees => "degrees",
            Intrinsic::Determinant => "determinant",
            Intrinsic::Distance => "distance",
            Intrinsic::Dot => "dot",
            Intrinsic::Exp => "exp",
            Intrinsic::Exp2 => "exp2",
            Intrinsic::FaceForward => "faceforward",
            Intrinsic::Floor => "floor",
            Intrinsic::Fmod => "fmod",
            Intrinsic::Frac => "frac",
            Intrinsic::Fwidth => "fwidth",
            Intrinsic::IsInf => "isinf",
            Intrinsic::IsNan => "isnan",
            Intrinsic::Ldexp => "ldexp",
            Intrinsic::Length => "length",
            Intrinsic::Lerp => "lerp",
            Intrinsic::Log => "log",
            Intrinsic::Log10 => "log10",
            Intrinsic::Log2 => "log2",
            Intrinsic::Mad => "mad",
            Intrinsic::Max => "max",
            Intrinsic::Min => "min",
            Intrinsic::Mul => "mul",
            Intrinsic::Normalize => "normalize",
            Intrinsic::Pow => "pow",
            Intrinsic::Radians => "radians",
            Intrinsic::Reflect => "reflect",
            Intrinsic::Refract => "refract",
            Intrinsic::Round => "round",
            Intrinsic::Rsqrt => "rsqrt",
            Intrinsic::Saturate => "saturate",
            Intrinsic::Sign => "sign",
            Intrinsic::Sin => "sin",
            Intrinsic::Sinh => "sinh",
            Intrinsic::SmoothStep => "smoothstep",
            Intrinsic::Sqrt => "sqrt",
            Intrinsic::Step => "step",
            Intrinsic::Tan => "tan",
            Intrinsic::Tanh => "tanh",
            Intrinsic::Transpose => "transpose",
            Intrinsic::Trunc => "trunc",
            Intrinsic::Tex2D => "tex2D",
            Intrinsic::Tex2DBias => "tex2Dbias",
            Intrinsic::Tex2DGrad => "tex2Dgrad",
            Intrinsic::Tex2DLod => "tex2Dlod",
            Intrinsic::Tex2DProj => "tex2Dproj",
            Intrinsic::Tex3D => "tex3D",
            Intrinsic::Tex3DLod => "tex3Dlod",
            Intrinsic::TexCube => "texCUBE",
            Intrinsic::TexCubeBias => "texCUBEbias",
            Intrinsic::TexCubeLod => "texCUBElod",
        }
    }

    /// Dimensionality of the sampler a texture fetch takes as first argument.
    pub fn sampler_dim(self) -> Option<SamplerDim> {
        match self {
            Intrinsic::Tex2D
            | Intrinsic::Tex2DBias
            | Intrinsic::Tex2DGrad
            | Intrinsic::Tex2DLod
            | Intrinsic::Tex2DProj => Some(SamplerDim::Tex2D),
            Intrinsic::Tex3D | Intrinsic::Tex3DLod => Some(SamplerDim::Tex3D),
            Intrinsic::TexCube | Intrinsic::TexCubeBias | Intrinsic::TexCubeLod => Some(SamplerDim::Cube),
            _ => None,
        }
    }

    pub fn is_texture(self) -> bool {
        self.sampler_dim().is_some()
    }

    /// Intrinsics that only make sense in a fragment shader.
    pub fn is_fragment_only(self) -> bool {
        matches!(
            self,
            Intrinsic::Ddx
                | Intrinsic::Ddy
                | Intrinsic::Fwidth
                | Intrinsic::Clip
                | Intrinsic::Tex2D
                | Intrinsic::Tex2DBias
                | Intrinsic::Tex2DProj
                | Intrinsic::Tex3D
                | Intrinsic::TexCube
                | Intrinsic::TexCubeBias
        )
    }

    /// Overload candidates. Texture fetches take their sampler parameter from
    /// the first argument so sampler return-type hints flow into the result.
    pub fn candidates(self, args: &[Type]) -> Vec<Signature> {
        use Intrinsic::*;

        let unary = |kinds: &[ScalarKind]| -> Vec<Signature> {
            kinds
                .iter()
                .flat_map(|&k| float_shapes(k))
                .map(|t| Signature::new(vec![t.clone()], t))
                .collect()
        };
        let same = |arity: usize, kinds: &[ScalarKind]| -> Vec<Signature> {
            kinds
                .iter()
                .flat_map(|&k| float_shapes(k))
                .map(|t| Signature::new(vec![t.clone(); arity], t))
                .collect()
        };
        let vectors = || (2..=4).map(|n| Type::Vector(F, n));

        match self {
            Acos | Asin | Atan | Ceil | Cos | Cosh | Ddx | Ddy | Degrees | Exp | Exp2 | Floor | Frac
            | Fwidth | Log | Log10 | Log2 | Normalize | Radians | Round | Rsqrt | Saturate | Sin | Sinh
            | Sqrt | Tan | Tanh | Trunc => unary(&[F]),
            Abs => unary(&[F, ScalarKind::Int]),
            Sign => [F, ScalarKind::Int]
                .iter()
                .flat_map(|&k| float_shapes(k))
                .filter_map(|t| {
                    let ret = t.with_kind(ScalarKind::Int)?;
                    Some(Signature::new(vec![t], ret))
                })
                .collect(),
            IsInf | IsNan => float_shapes(F)
                .filter_map(|t| {
                    let ret = t.with_kind(ScalarKind::Bool)?;
                    Some(Signature::new(vec![t], ret))
                })
                .collect(),
            All | Any => [ScalarKind::Bool, ScalarKind::Int, F]
                .iter()
                .flat_map(|&k| float_shapes(k))
                .map(|t| Signature::new(vec![t], Type::BOOL))
                .collect(),
            Clip => float_shapes(F).map(|t| Signature::new(vec![t], Type::Void)).collect(),
            Length => float_shapes(F).map(|t| Signature::new(vec![t], Type::FLOAT)).collect(),
            Atan2 | Fmod | Pow | Step | Ldexp => same(2, &[F]),
            Min | Max => same(2, &[F, ScalarKind::Int, ScalarKind::Uint]),
            Clamp => same(3, &[F, ScalarKind::Int, ScalarKind::Uint]),
            Lerp | SmoothStep | Mad => same(3, &[F]),
            Distance => float_shapes(F).map(|t| Signature::new(vec![t.clone(), t], Type::FLOAT)).collect(),
            Dot => [F, ScalarKind::Int]
                .iter()
                .flat_map(|&k| float_shapes(k))
                .filter_map(|t| {
                    let ret = Type::Scalar(t.scalar_kind()?);
                    Some(Signature::new(vec![t.clone(), t], ret))
                })
                .collect(),
            Cross => vec![Signature::new(vec![Type::Vector(F, 3); 2], Type::Vector(F, 3))],
            Reflect => vectors().map(|t| Signature::new(vec![t.clone(), t.clone()], t)).collect(),
            Refract => vectors()
                .map(|t| Signature::new(vec![t.clone(), t.clone(), Type::FLOAT], t))
                .collect(),
            FaceForward => vectors().map(|t| Signature::new(vec![t.clone(); 3], t)).collect(),
            Determinant => (2..=4).map(|n| Signature::new(vec![Type::Matrix(F, n, n)], Type::FLOAT)).collect(),
            Transpose => all_matrix_shapes()
                .map(|(r, c)| Signature::new(vec![Type::Matrix(F, r, c)], Type::Matrix(F, c, r)))
                .collect(),
            Mul => mul_candidates(),
            Tex2D | Tex2DBias | Tex2DGrad | Tex2DLod | Tex2DProj | Tex3D | Tex3DLod | TexCube | TexCubeBias
            | TexCubeLod => self.texture_candidates(args),
        }
    }

    fn texture_candidates(self, args: &[Type]) -> Vec<Signature> {
        let Some(dim) = self.sampler_dim() else {
            return Vec::new();
        };
        let element = match args.first() {
            Some(Type::Sampler(d, k)) if *d == dim => *k,
            _ => F,
        };
        let sampler = Type::Sampler(dim, element);
        let coord = match dim {
            SamplerDim::Tex2D => Type::Vector(F, 2),
            SamplerDim::Tex3D | SamplerDim::Cube => Type::Vector(F, 3),
        };
        let ret = Type::Vector(element, 4);
        let params = match self {
            Intrinsic::Tex2D | Intrinsic::Tex3D | Intrinsic::TexCube => vec![sampler, coord],
            Intrinsic::Tex2DGrad => vec![sampler, coord.clone(), coord.clone(), coord],
            _ => vec![sampler, Type::Vector(F, 4)],
        };
        vec![Signature::new(params, ret)]
    }
}

/// Every shape combination `mul` accepts, for float and int operands.
fn mul_candidates() -> Vec<Signature> {
    let mut out = Vec::new();
    for kind in [F, ScalarKind::Int] {
        let scalar = Type::Scalar(kind);
        let others = (2..=4)
            .map(|n| Shape::Vector(n))
            .chain(all_matrix_shapes().map(|(r, c)| Shape::Matrix(r, c)));

        out.push(Signature::new(vec![scalar.clone(), scalar.clone()], scalar.clone()));
        for shape in others {
            let t = Type::from_shape(kind, shape);
            out.push(Signature::new(vec![scalar.clone(), t.clone()], t.clone()));
            out.push(Signature::new(vec![t.clone(), scalar.clone()], t));
        }
        for n in 2..=4 {
            let v = Type::Vector(kind, n);
            out.push(Signature::new(vec![v.clone(), v], scalar.clone()));
        }
        for (r, c) in all_matrix_shapes() {
            let m = Type::Matrix(kind, r, c);
            out.push(Signature::new(vec![Type::Vector(kind, r), m.clone()], Type::Vector(kind, c)));
            out.push(Signature::new(vec![m.clone(), Type::Vector(kind, c)], Type::Vector(kind, r)));
            for k in 2..=4 {
                out.push(Signature::new(
                    vec![m.clone(), Type::Matrix(kind, c, k)],
                    Type::Matrix(kind, r, k),
                ));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for &intrinsic in Intrinsic::ALL {
            assert_eq!(Intrinsic::from_name(intrinsic.name()), Some(intrinsic));
        }
        assert_eq!(Intrinsic::from_name("texture"), None);
    }

    #[test]
    fn test_every_intrinsic_has_candidates() {
        let sampler_args = |i: Intrinsic| match i.sampler_dim() {
            Some(dim) => vec![Type::Sampler(dim, F)],
            None => vec![],
        };
        for &intrinsic in Intrinsic::ALL {
            assert!(
                !intrinsic.candidates(&sampler_args(intrinsic)).is_empty(),
                "{} has no overloads",
                intrinsic.name()
            );
        }
    }

    #[test]
    fn test_mul_matrix_vector_shapes() {
        let candidates = Intrinsic::Mul.candidates(&[]);
        let m34 = Type::Matrix(F, 3, 4);
        let found = candidates
            .iter()
            .find(|s| s.params == vec![m34.clone(), Type::Vector(F, 4)])
            .map(|s| s.ret.clone());
        assert_eq!(found, Some(Type::Vector(F, 3)));

        let found = candidates
            .iter()
            .find(|s| s.params == vec![Type::Vector(F, 3), m34.clone()])
            .map(|s| s.ret.clone());
        assert_eq!(found, Some(Type::Vector(F, 4)));
    }

    #[test]
    fn test_texture_result_follows_sampler_hint() {
        let half_sampler = Type::Sampler(SamplerDim::Tex2D, ScalarKind::Half);
        let candidates = Intrinsic::Tex2D.candidates(&[half_sampler.clone()]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].params[0], half_sampler);
        assert_eq!(candidates[0].ret, Type::Vector(ScalarKind::Half, 4));
    }
}
