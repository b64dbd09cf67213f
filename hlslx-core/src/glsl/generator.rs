//! GLSL generator.
//!
//! HLSL `floatRxC` becomes `matRxC` holding the same data, so a GLSL column
//! is an HLSL row. Indexing and constructors carry over unchanged and
//! `mul(a, b)` becomes `b * a`. The entry function is emitted as an ordinary
//! function called from a generated `void main()` that reads the stage
//! inputs and writes the stage outputs.

use super::GlslVersion;
use crate::ast::{BinaryOp, FunctionId, Item, ParamModifier, SyntaxTree};
use crate::codegen::bindings::{BindingTable, Resource};
use crate::codegen::entry::{Binding, EntryInterface, Varying};
use crate::codegen::{
    infix, plain_binary, prec, CodeWriter, Dialect, Emitted, Emitter, Helper, IntrinsicCall,
};
use crate::error::{CompilerError, Result};
use crate::intrinsics::Intrinsic;
use crate::logger::Logger;
use crate::reachability::{reachable, Reachable};
use crate::semantic::{Direction, Role};
use crate::types::{SamplerDim, ScalarKind, Type};
use crate::{bail_semantic, Stage};
use log::debug;
use std::borrow::Cow;
use std::collections::BTreeSet;

const RESERVED: &[&str] = &[
    "active", "asm", "atan", "attribute", "bvec2", "bvec3", "bvec4", "buffer", "cast", "centroid", "class",
    "coherent", "common", "dFdx", "dFdy", "double", "dvec2", "dvec3", "dvec4", "enum", "equal", "extern",
    "external", "filter", "fixed", "flat", "fract", "ftransform", "goto", "greaterThan", "greaterThanEqual",
    "highp", "in", "inline", "input", "interface", "inverse", "inversesqrt", "invariant", "isampler2D",
    "isampler3D", "isamplerCube", "ivec2", "ivec3", "ivec4", "layout", "lessThan", "lessThanEqual", "long",
    "lowp", "main", "mat2", "mat2x2", "mat2x3", "mat2x4", "mat3", "mat3x2", "mat3x3", "mat3x4", "mat4",
    "mat4x2", "mat4x3", "mat4x4", "matrixCompMult", "mediump", "mix", "mod", "namespace", "noinline", "noise1",
    "noise2", "noise3", "noise4", "not", "notEqual", "outerProduct", "output", "partition", "patch",
    "precision", "public", "readonly", "restrict", "sample", "sampler1D", "sampler2DShadow", "samplerCube",
    "shared", "short", "sizeof", "smooth", "subroutine", "superp", "template", "texture", "texture2D",
    "texture2DLod", "texture2DProj", "texture3D", "textureCube", "textureCubeLod", "textureGrad", "textureLod",
    "textureProj", "this", "typedef", "union", "unsigned", "usampler2D", "using", "uvec2", "uvec3", "uvec4",
    "varying", "vec2", "vec3", "vec4", "volatile", "writeonly",
];

/// GLSL spelling of the shared emitter hooks.
struct GlslDialect {
    version: GlslVersion,
    stage: Stage,
    helpers: BTreeSet<Helper>,
    extensions: BTreeSet<&'static str>,
}

impl GlslDialect {
    fn new(version: GlslVersion, stage: Stage) -> Self {
        GlslDialect {
            version,
            stage,
            helpers: BTreeSet::new(),
            extensions: BTreeSet::new(),
        }
    }

    fn require_modern(&self, what: &str) -> Result<()> {
        if self.version.is_legacy() {
            bail_semantic!("{} is not supported by {}", what, self.version);
        }
        Ok(())
    }

    fn value_type(&self, ty: &Type) -> Result<String> {
        match ty {
            Type::Scalar(kind) => Ok(self.scalar_name(*kind)?.to_string()),
            Type::Vector(kind, n) => self.vector_name(*kind, *n),
            Type::Matrix(kind, rows, cols) => self.matrix_name(*kind, *rows, *cols),
            _ => bail_semantic!("unexpected operand type in {}", self.version),
        }
    }

    /// `vecN(s)` when a scalar operand meets a vector result.
    fn broadcast(&self, operand: &Type, ty: &Type, value: Emitted) -> Result<Emitted> {
        match (operand, ty) {
            (Type::Scalar(kind), Type::Vector(_, n)) => Ok(self.cast(&self.vector_name(*kind, *n)?, value)),
            _ => Ok(value),
        }
    }

    fn texture_function(&mut self, intrinsic: Intrinsic) -> Result<&'static str> {
        use Intrinsic::*;
        if intrinsic.sampler_dim() == Some(SamplerDim::Tex3D) && !self.version.has_3d_textures() {
            bail_semantic!("3D textures are not supported by {}", self.version);
        }
        if !self.version.is_legacy() {
            return Ok(match intrinsic {
                Tex2DLod | Tex3DLod | TexCubeLod => "textureLod",
                Tex2DGrad => "textureGrad",
                Tex2DProj => "textureProj",
                _ => "texture",
            });
        }

        let es = self.version.is_es();
        let fragment = self.stage == Stage::Fragment;
        let lod_extension = match (es, fragment) {
            (_, false) => None,
            (false, true) => Some("GL_ARB_shader_texture_lod"),
            (true, true) => Some("GL_EXT_shader_texture_lod"),
        };
        let name = match intrinsic {
            Tex2D | Tex2DBias => "texture2D",
            Tex2DProj => "texture2DProj",
            Tex3D => "texture3D",
            TexCube | TexCubeBias => "textureCube",
            Tex2DLod if es && fragment => "texture2DLodEXT",
            Tex2DLod => "texture2DLod",
            Tex3DLod => "texture3DLod",
            TexCubeLod if es && fragment => "textureCubeLodEXT",
            TexCubeLod => "textureCubeLod",
            Tex2DGrad if es => "texture2DGradEXT",
            Tex2DGrad => "texture2DGradARB",
            _ => bail_semantic!("'{}' is not a texture function", intrinsic.name()),
        };
        let extension = match intrinsic {
            Tex2DLod | Tex3DLod | TexCubeLod => lod_extension,
            Tex2DGrad if es => Some("GL_EXT_shader_texture_lod"),
            Tex2DGrad => Some("GL_ARB_shader_texture_lod"),
            _ => None,
        };
        if let Some(extension) = extension {
            self.extensions.insert(extension);
        }
        Ok(name)
    }

    fn texture(&mut self, call: &IntrinsicCall) -> Result<Emitted> {
        use Intrinsic::*;
        let function = self.texture_function(call.intrinsic)?;
        let texts: Vec<String> = call.args.iter().map(|a| a.text.clone()).collect();
        match call.intrinsic {
            Tex2DBias | Tex2DLod | Tex3DLod | TexCubeBias | TexCubeLod => {
                let helper = Helper::Texture(call.intrinsic, call.texel_kind());
                self.helpers.insert(helper);
                Ok(Emitted::call(&helper.name(), &texts))
            }
            _ => Ok(Emitted::call(function, &texts)),
        }
    }

    fn mul(&self, call: &IntrinsicCall) -> Result<Emitted> {
        let (Some(a), Some(b)) = (call.args.first(), call.args.get(1)) else {
            bail_semantic!("'mul' takes two arguments");
        };
        let (ta, tb) = (&call.arg_types[0], &call.arg_types[1]);
        if ta.is_scalar() || tb.is_scalar() {
            return Ok(infix(a, "*", b, prec::MULTIPLICATIVE));
        }
        if ta.is_vector() && tb.is_vector() {
            return Ok(Emitted::call("dot", &[a.text.clone(), b.text.clone()]));
        }
        Ok(infix(b, "*", a, prec::MULTIPLICATIVE))
    }

    fn write_helper(&self, helper: Helper, out: &mut CodeWriter) -> Result<()> {
        match helper {
            Helper::Fmod => {
                for n in 1..=4 {
                    let t = self.vector_name(ScalarKind::Float, n)?;
                    out.open(format!("{t} hlslx_fmod({t} x, {t} y)"));
                    out.line(format!("{} q = x / y;", t));
                    out.line("return x - y * (sign(q) * floor(abs(q)));");
                    out.close("");
                }
            }
            Helper::Trunc => {
                for n in 1..=4 {
                    let t = self.vector_name(ScalarKind::Float, n)?;
                    out.open(format!("{t} hlslx_trunc({t} x)"));
                    out.line("return sign(x) * floor(abs(x));");
                    out.close("");
                }
            }
            Helper::Texture(intrinsic, kind) => {
                let Some(dim) = intrinsic.sampler_dim() else {
                    bail_semantic!("'{}' is not a texture function", intrinsic.name());
                };
                let coords = if dim == SamplerDim::Tex2D { "xy" } else { "xyz" };
                let function = match intrinsic {
                    Intrinsic::Tex2DLod if self.version.is_es() && self.stage == Stage::Fragment => "texture2DLodEXT",
                    Intrinsic::TexCubeLod if self.version.is_es() && self.stage == Stage::Fragment => {
                        "textureCubeLodEXT"
                    }
                    Intrinsic::Tex2DLod if self.version.is_legacy() => "texture2DLod",
                    Intrinsic::Tex3DLod if self.version.is_legacy() => "texture3DLod",
                    Intrinsic::TexCubeLod if self.version.is_legacy() => "textureCubeLod",
                    Intrinsic::Tex2DLod | Intrinsic::Tex3DLod | Intrinsic::TexCubeLod => "textureLod",
                    Intrinsic::Tex2DBias if self.version.is_legacy() => "texture2D",
                    Intrinsic::TexCubeBias if self.version.is_legacy() => "textureCube",
                    _ => "texture",
                };
                out.open(format!(
                    "{} {}({} s, vec4 t)",
                    self.vector_name(kind, 4)?,
                    helper.name(),
                    self.sampler_type(dim, kind)?
                ));
                out.line(format!("return {}(s, t.{}, t.w);", function, coords));
                out.close("");
            }
        }
        out.blank();
        Ok(())
    }
}

impl Dialect for GlslDialect {
    fn name(&self) -> String {
        self.version.to_string()
    }

    fn scalar_name(&self, kind: ScalarKind) -> Result<&'static str> {
        Ok(match kind {
            ScalarKind::Bool => "bool",
            ScalarKind::Int => "int",
            ScalarKind::Uint if self.version.is_legacy() => "int",
            ScalarKind::Uint => "uint",
            ScalarKind::Half | ScalarKind::Float => "float",
        })
    }

    fn vector_name(&self, kind: ScalarKind, n: u8) -> Result<String> {
        if n == 1 {
            return Ok(self.scalar_name(kind)?.to_string());
        }
        let prefix = match kind {
            ScalarKind::Bool => "b",
            ScalarKind::Int => "i",
            ScalarKind::Uint if self.version.is_legacy() => "i",
            ScalarKind::Uint => "u",
            ScalarKind::Half | ScalarKind::Float => "",
        };
        Ok(format!("{}vec{}", prefix, n))
    }

    fn matrix_name(&self, kind: ScalarKind, rows: u8, cols: u8) -> Result<String> {
        if !kind.is_float() {
            bail_semantic!("'{}{}x{}' matrices are not supported by {}", kind.hlsl_name(), rows, cols, self.version);
        }
        if rows == cols {
            return Ok(format!("mat{}", rows));
        }
        if self.version.is_legacy() {
            bail_semantic!("non-square matrices are not supported by {}", self.version);
        }
        Ok(format!("mat{}x{}", rows, cols))
    }

    fn sampler_type(&self, dim: SamplerDim, kind: ScalarKind) -> Result<String> {
        let prefix = match kind {
            ScalarKind::Half | ScalarKind::Float => "",
            _ if self.version.is_legacy() => {
                bail_semantic!("integer samplers are not supported by {}", self.version)
            }
            ScalarKind::Uint => "u",
            ScalarKind::Int | ScalarKind::Bool => "i",
        };
        let base = match dim {
            SamplerDim::Tex2D => "sampler2D",
            SamplerDim::Tex3D if !self.version.has_3d_textures() => {
                bail_semantic!("3D textures are not supported by {}", self.version)
            }
            SamplerDim::Tex3D => "sampler3D",
            SamplerDim::Cube => "samplerCube",
        };
        Ok(format!("{}{}", prefix, base))
    }

    fn is_reserved(&self, name: &str) -> bool {
        RESERVED.contains(&name)
    }

    fn identifier<'n>(&self, name: &'n str) -> Cow<'n, str> {
        if name.starts_with("gl_") || name.contains("__") {
            Cow::Owned(format!("hlslx_{}", name.replace("__", "_0")))
        } else if self.is_reserved(name) {
            Cow::Owned(format!("{}_", name))
        } else {
            Cow::Borrowed(name)
        }
    }

    fn uint_literal(&self, value: u64) -> String {
        if self.version.is_legacy() {
            value.to_string()
        } else {
            format!("{}u", value)
        }
    }

    fn init_list(&self, type_text: &str, ty: &Type, elements: Vec<String>) -> Result<Emitted> {
        if matches!(ty, Type::Array(..)) && self.version.is_legacy() {
            bail_semantic!("array initializers are not supported by {}", self.version);
        }
        Ok(Emitted::call(type_text, &elements))
    }

    fn binary(&mut self, op: BinaryOp, operands: [&Type; 2], ty: &Type, lhs: Emitted, rhs: Emitted) -> Result<Emitted> {
        let [lt, rt] = operands;
        if op.is_comparison() && ty.is_vector() {
            let function = match op {
                BinaryOp::Eq => "equal",
                BinaryOp::Ne => "notEqual",
                BinaryOp::Lt => "lessThan",
                BinaryOp::Gt => "greaterThan",
                BinaryOp::Le => "lessThanEqual",
                _ => "greaterThanEqual",
            };
            let shape = |t: &Type| t.scalar_kind().map(|k| Type::Vector(k, ty.component_count().unwrap_or(1) as u8));
            let lhs = self.broadcast(lt, &shape(lt).unwrap_or_else(|| lt.clone()), lhs)?;
            let rhs = self.broadcast(rt, &shape(rt).unwrap_or_else(|| rt.clone()), rhs)?;
            return Ok(Emitted::call(function, &[lhs.text, rhs.text]));
        }
        if op.is_logical() && !ty.is_scalar() {
            bail_semantic!("component-wise '{}' is not supported by {}", op.symbol(), self.version);
        }
        if op.is_bitwise() {
            self.require_modern(&format!("operator '{}'", op.symbol()))?;
        }
        match op {
            BinaryOp::Mul if lt.is_matrix() && rt.is_matrix() => {
                Ok(Emitted::call("matrixCompMult", &[lhs.text, rhs.text]))
            }
            BinaryOp::Mod if ty.scalar_kind().is_some_and(|k| k.is_float()) => {
                self.helpers.insert(Helper::Fmod);
                let lhs = self.broadcast(lt, ty, lhs)?;
                let rhs = self.broadcast(rt, ty, rhs)?;
                Ok(Emitted::call("hlslx_fmod", &[lhs.text, rhs.text]))
            }
            BinaryOp::Mod => {
                self.require_modern("integer '%'")?;
                Ok(plain_binary(op, &lhs, &rhs))
            }
            _ => Ok(plain_binary(op, &lhs, &rhs)),
        }
    }

    fn vector_not(&self, operand: Emitted) -> Result<Emitted> {
        Ok(Emitted::call("not", &[operand.text]))
    }

    fn select(&mut self, cond: Emitted, then_expr: Emitted, else_expr: Emitted) -> Result<Emitted> {
        self.require_modern("a component-wise '?:'")?;
        Ok(Emitted::call("mix", &[else_expr.text, then_expr.text, cond.text]))
    }

    fn intrinsic(&mut self, call: IntrinsicCall) -> Result<Emitted> {
        use Intrinsic::*;
        let texts: Vec<String> = call.args.iter().map(|a| a.text.clone()).collect();
        let arg_kind = call.arg_types.first().and_then(|t| t.scalar_kind()).unwrap_or(ScalarKind::Float);
        let named = |name: &str| -> Result<Emitted> { Ok(Emitted::call(name, &texts)) };

        match call.intrinsic {
            Acos | Asin | Atan | Ceil | Cos | Cross | Degrees | Distance | Exp | Exp2 | FaceForward | Floor
            | Length | Log | Log2 | Normalize | Pow | Radians | Reflect | Refract | Sin | SmoothStep | Sqrt
            | Step | Tan => named(call.intrinsic.name()),
            Abs | Min | Max | Clamp => {
                if arg_kind.is_integer() {
                    self.require_modern(&format!("integer '{}'", call.intrinsic.name()))?;
                }
                named(call.intrinsic.name())
            }
            Dot => {
                if arg_kind.is_integer() {
                    return Err(call.unsupported(&format!("{} for integer vectors", self.version)));
                }
                named("dot")
            }
            Cosh | Sinh | Tanh | IsInf | IsNan => {
                self.require_modern(&format!("'{}'", call.intrinsic.name()))?;
                named(call.intrinsic.name())
            }
            Atan2 => named("atan"),
            Ddx | Ddy | Fwidth => {
                if self.version == GlslVersion::Es100 {
                    self.extensions.insert("GL_OES_standard_derivatives");
                }
                named(match call.intrinsic {
                    Ddx => "dFdx",
                    Ddy => "dFdy",
                    _ => "fwidth",
                })
            }
            Frac => named("fract"),
            Lerp => named("mix"),
            Rsqrt => named("inversesqrt"),
            Saturate => Ok(Emitted::call("clamp", &[texts[0].clone(), "0.0".to_string(), "1.0".to_string()])),
            Fmod => {
                self.helpers.insert(Helper::Fmod);
                named("hlslx_fmod")
            }
            Ldexp => {
                let scale = Emitted::call("exp2", &[texts[1].clone()]);
                Ok(infix(&call.args[0], "*", &scale, prec::MULTIPLICATIVE))
            }
            Log10 => {
                let log = Emitted::call("log", &[texts[0].clone()]);
                Ok(infix(&log, "*", &Emitted::primary("0.4342944819032518"), prec::MULTIPLICATIVE))
            }
            Mad => {
                let product = infix(&call.args[0], "*", &call.args[1], prec::MULTIPLICATIVE);
                Ok(infix(&product, "+", &call.args[2], prec::ADDITIVE))
            }
            Round if self.version.is_legacy() => {
                let shifted = infix(&call.args[0], "+", &Emitted::primary("0.5"), prec::ADDITIVE);
                Ok(Emitted::call("floor", &[shifted.text]))
            }
            Trunc if self.version.is_legacy() => {
                self.helpers.insert(Helper::Trunc);
                named("hlslx_trunc")
            }
            Round | Trunc => named(call.intrinsic.name()),
            Sign => {
                let sign = Emitted::call("sign", &texts);
                if arg_kind.is_integer() && !self.version.is_legacy() {
                    Ok(sign)
                } else {
                    Ok(self.cast(&self.value_type(&call.ty)?, sign))
                }
            }
            All | Any => {
                let arg_ty = &call.arg_types[0];
                let value = match (arg_ty, arg_kind) {
                    (Type::Scalar(ScalarKind::Bool), _) => return Ok(call.args[0].clone()),
                    (Type::Scalar(_), _) => return Ok(self.cast("bool", call.args[0].clone())),
                    (_, ScalarKind::Bool) => texts[0].clone(),
                    (ty, _) => {
                        let n = ty.component_count().unwrap_or(1) as u8;
                        self.cast(&self.vector_name(ScalarKind::Bool, n)?, call.args[0].clone()).text
                    }
                };
                Ok(Emitted::call(call.intrinsic.name(), &[value]))
            }
            Mul => self.mul(&call),
            Transpose => {
                self.require_modern("'transpose'")?;
                named("transpose")
            }
            Determinant => {
                if !self.version.has_determinant() {
                    return Err(call.unsupported(&self.version.to_string()));
                }
                named("determinant")
            }
            Clip => Err(call.unsupported("an expression")),
            Tex2D | Tex2DBias | Tex2DGrad | Tex2DLod | Tex2DProj | Tex3D | Tex3DLod | TexCube | TexCubeBias
            | TexCubeLod => self.texture(&call),
        }
    }

    fn clip(&mut self, ty: &Type, operand: Emitted) -> Result<String> {
        match ty {
            Type::Vector(kind, n) => {
                let zero = self.cast(&self.vector_name(*kind, *n)?, Emitted::primary("0.0"));
                Ok(format!("if (any(lessThan({}, {}))) discard;", operand.text, zero.text))
            }
            _ => Ok(format!("if ({} < 0.0) discard;", operand.wrap(prec::RELATIONAL + 1))),
        }
    }

    fn const_locals(&self) -> bool {
        false
    }
}

/// Emits GLSL for one entry point. The text is available from
/// [`GlslGenerator::result`] after a successful [`GlslGenerator::generate`].
pub struct GlslGenerator<'l> {
    logger: &'l dyn Logger,
    output: String,
}

impl<'l> GlslGenerator<'l> {
    pub fn new(logger: &'l dyn Logger) -> Self {
        GlslGenerator {
            logger,
            output: String::new(),
        }
    }

    pub fn generate(&mut self, tree: &SyntaxTree, stage: Stage, version: GlslVersion, entry: &str) -> Result<()> {
        self.output.clear();
        match Translation::run(tree, stage, version, entry) {
            Ok(text) => {
                self.output = text;
                Ok(())
            }
            Err(err) => {
                self.logger.report_error(&err);
                Err(err)
            }
        }
    }

    pub fn result(&self) -> &str {
        &self.output
    }
}

struct Translation<'a> {
    em: Emitter<'a, GlslDialect>,
    version: GlslVersion,
    entry: FunctionId,
    interface: EntryInterface,
    bindings: BindingTable,
    reach: Reachable,
}

impl<'a> Translation<'a> {
    fn run(tree: &'a SyntaxTree, stage: Stage, version: GlslVersion, entry: &str) -> Result<String> {
        let entry = tree.find_entry(entry)?;
        let mut translation = Translation {
            em: Emitter::new(tree, stage, GlslDialect::new(version, stage)),
            version,
            entry,
            interface: EntryInterface::build(tree, entry, stage)?,
            bindings: BindingTable::build(tree, entry)?,
            reach: reachable(tree, entry)?,
        };
        debug!("generating {} {:?} shader for '{}'", version, stage, tree.function(entry).name);
        translation.emit()
    }

    fn tree(&self) -> &'a SyntaxTree {
        self.em.tree
    }

    fn emit(&mut self) -> Result<String> {
        let tree = self.tree();
        for &id in &self.reach.structs.clone() {
            self.em.struct_decl(id)?;
        }
        for item in &tree.items {
            match *item {
                Item::Buffer(id) if self.reach.uses_buffer(id) => self.buffer(id)?,
                Item::Global(id) if self.reach.uses_global(id) => self.global(id)?,
                _ => {}
            }
        }
        self.entry_uniforms()?;
        self.em.out.blank();
        self.interface_variables()?;
        self.em.out.blank();
        for &id in &self.reach.functions.clone() {
            self.em.function(id)?;
        }
        self.main()?;

        let mut out = CodeWriter::new();
        out.line(self.version.directive());
        for extension in &self.em.dialect.extensions {
            out.line(format!("#extension {} : require", extension));
        }
        if self.version.is_es() {
            out.line("precision highp float;");
        }
        out.blank();
        for helper in &self.em.dialect.helpers {
            self.em.dialect.write_helper(*helper, &mut out)?;
        }
        out.append(&self.em.out);
        Ok(out.into_string())
    }

    fn buffer(&mut self, id: crate::ast::BufferId) -> Result<()> {
        let tree = self.tree();
        let decl = tree.buffer(id);
        let mut fields = Vec::with_capacity(decl.fields.len());
        for field in &decl.fields {
            fields.push(self.em.declarator(&field.ty, &self.em.dialect.identifier(&field.name))?);
        }
        if !self.version.has_uniform_blocks() {
            for field in fields {
                self.em.out.line(format!("uniform {};", field));
            }
            return Ok(());
        }
        let layout = match self.bindings.slot(Resource::Buffer(id)) {
            Some(slot) if self.version.has_layout_bindings() => format!("layout(std140, binding = {})", slot),
            _ => "layout(std140)".to_string(),
        };
        self.em
            .out
            .open(format!("{} uniform {}", layout, self.em.dialect.identifier(&decl.name)));
        for field in fields {
            self.em.out.line(format!("{};", field));
        }
        self.em.out.close(";");
        Ok(())
    }

    fn global(&mut self, id: crate::ast::GlobalId) -> Result<()> {
        let tree = self.tree();
        let decl = tree.global(id);
        let name = self.em.dialect.identifier(&decl.name).into_owned();
        let ty = match (&decl.ty, decl.init) {
            (Type::Array(_, None), Some(init)) => tree.expr(init).ty.clone(),
            (ty, _) => ty.clone(),
        };
        let declarator = self
            .em
            .declarator(&ty, &name)
            .map_err(|err| crate::codegen::locate(tree, err, decl.line))?;

        if decl.is_uniform() {
            let layout = match self.bindings.slot(Resource::Global(id)) {
                Some(slot) if self.version.has_layout_bindings() => format!("layout(binding = {}) ", slot),
                _ => String::new(),
            };
            self.em.out.line(format!("{}uniform {};", layout, declarator));
            return Ok(());
        }
        let qualifier = if decl.is_constant() { "const " } else { "" };
        match decl.init {
            Some(init) => {
                let value = self.em.expr_text(init)?;
                self.em.out.line(format!("{}{} = {};", qualifier, declarator, value));
            }
            None => self.em.out.line(format!("{};", declarator)),
        }
        Ok(())
    }

    fn entry_uniforms(&mut self) -> Result<()> {
        let tree = self.tree();
        let decl = tree.function(self.entry);
        for &index in &self.interface.uniforms {
            let param = &decl.params[index];
            let declarator = self
                .em
                .declarator(&param.ty, &self.em.dialect.identifier(&param.name))?;
            let layout = match self.bindings.slot(Resource::EntryParam(index)) {
                Some(slot) if self.version.has_layout_bindings() => format!("layout(binding = {}) ", slot),
                _ => String::new(),
            };
            self.em.out.line(format!("{}uniform {};", layout, declarator));
        }
        Ok(())
    }

    fn check_interface_type(&self, varying: &Varying) -> Result<()> {
        match varying.ty.scalar_kind() {
            Some(ScalarKind::Bool) => bail_semantic!(
                "'{}' cannot carry a bool value in {}",
                varying.semantic,
                self.version
            ),
            Some(kind) if kind.is_integer() && self.version.is_legacy() => bail_semantic!(
                "'{}' cannot carry an integer value in {}",
                varying.semantic,
                self.version
            ),
            _ => Ok(()),
        }
    }

    fn interface_variables(&mut self) -> Result<()> {
        let stage = self.em.stage;
        let legacy = self.version.is_legacy();
        let location = self.tree().location(self.tree().function(self.entry).line);

        let mut attribute = 0;
        for varying in &self.interface.inputs {
            let Some(name) = varying.generated_name(stage, Direction::Input) else {
                continue;
            };
            self.check_interface_type(varying)
                .map_err(|err| crate::codegen::locate(self.tree(), err, location.line))?;
            let qualifier = match (stage, legacy) {
                (Stage::Vertex, true) => "attribute",
                (Stage::Fragment, true) => "varying",
                _ => "in",
            };
            let mut prefix = String::new();
            if stage == Stage::Vertex && self.version.has_layout_locations() {
                prefix = format!("layout(location = {}) ", attribute);
                attribute += 1;
            }
            if stage == Stage::Fragment && varying.ty.scalar_kind().is_some_and(|k| k.is_integer()) {
                prefix.push_str("flat ");
            }
            let declarator = self.em.declarator(&varying.ty, &name)?;
            self.em.out.line(format!("{}{} {};", prefix, qualifier, declarator));
        }

        for varying in &self.interface.outputs {
            let Some(name) = varying.generated_name(stage, Direction::Output) else {
                continue;
            };
            self.check_interface_type(varying)
                .map_err(|err| crate::codegen::locate(self.tree(), err, location.line))?;
            match varying.role {
                Role::Target(_) if legacy => {}
                Role::Target(n) => {
                    let layout = if self.version.has_layout_locations() {
                        format!("layout(location = {}) ", n)
                    } else {
                        String::new()
                    };
                    let declarator = self.em.declarator(&varying.ty, &name)?;
                    self.em.out.line(format!("{}out {};", layout, declarator));
                }
                _ => {
                    let qualifier = if legacy { "varying" } else { "out" };
                    let flat = if varying.ty.scalar_kind().is_some_and(|k| k.is_integer()) {
                        "flat "
                    } else {
                        ""
                    };
                    let declarator = self.em.declarator(&varying.ty, &name)?;
                    self.em.out.line(format!("{}{} {};", flat, qualifier, declarator));
                }
            }
        }
        Ok(())
    }

    /// Value read from a stage input, converted to the declared type.
    fn input_value(&self, varying: &Varying) -> Result<String> {
        let stage = self.em.stage;
        if let Some(name) = varying.generated_name(stage, Direction::Input) {
            return Ok(name);
        }
        let (builtin, ty) = match varying.role {
            Role::VertexId => {
                if self.version.is_legacy() {
                    bail_semantic!("'{}' is not supported by {}", varying.semantic, self.version);
                }
                ("gl_VertexID", Type::INT)
            }
            Role::InstanceId => {
                if !self.version.has_instance_id() {
                    bail_semantic!("'{}' is not supported by {}", varying.semantic, self.version);
                }
                ("gl_InstanceID", Type::INT)
            }
            Role::FragCoord => ("gl_FragCoord", Type::Vector(ScalarKind::Float, 4)),
            Role::FrontFacing => {
                if varying.ty.scalar_kind().is_some_and(|k| k.is_float()) {
                    return Ok("gl_FrontFacing ? 1.0 : -1.0".to_string());
                }
                ("gl_FrontFacing", Type::BOOL)
            }
            _ => bail_semantic!("'{}' is not a valid input semantic", varying.semantic),
        };
        Ok(self.em.convert(&ty, &varying.ty, Emitted::primary(builtin))?.text)
    }

    /// Variable a stage output is written to.
    fn output_target(&self, varying: &Varying) -> Result<String> {
        let stage = self.em.stage;
        let float4 = Type::Vector(ScalarKind::Float, 4);
        let target = match varying.role {
            Role::Position => {
                if varying.ty != float4 {
                    bail_semantic!("'{}' must be written as a float4", varying.semantic);
                }
                "gl_Position".to_string()
            }
            Role::PointSize => "gl_PointSize".to_string(),
            Role::Depth => {
                if self.version == GlslVersion::Es100 {
                    bail_semantic!("'{}' is not supported by {}", varying.semantic, self.version);
                }
                "gl_FragDepth".to_string()
            }
            Role::Target(n) if self.version.is_legacy() => {
                if varying.ty != float4 {
                    bail_semantic!("'{}' must be written as a float4 in {}", varying.semantic, self.version);
                }
                let multiple = self.interface.outputs.iter().any(|v| matches!(v.role, Role::Target(i) if i > 0));
                if multiple {
                    format!("gl_FragData[{}]", n)
                } else {
                    "gl_FragColor".to_string()
                }
            }
            _ => match varying.generated_name(stage, Direction::Output) {
                Some(name) => name,
                None => bail_semantic!("'{}' is not a valid output semantic", varying.semantic),
            },
        };
        Ok(target)
    }

    fn main(&mut self) -> Result<()> {
        let tree = self.tree();
        let decl = tree.function(self.entry);
        let local = |name: &str| format!("entry_{}", name);
        let at = |err: CompilerError| crate::codegen::locate(tree, err, decl.line);

        self.em.out.open("void main()");
        for (index, param) in decl.params.iter().enumerate() {
            if param.modifier == ParamModifier::Uniform {
                continue;
            }
            let declarator = self.em.declarator(&param.ty, &local(&param.name)).map_err(at)?;
            let inputs: Vec<&Varying> = self
                .interface
                .inputs
                .iter()
                .filter(|v| v.binding == Binding::Param(index))
                .collect();
            match inputs.as_slice() {
                [single] if single.fields.is_empty() => {
                    let value = self.input_value(single).map_err(at)?;
                    self.em.out.line(format!("{} = {};", declarator, value));
                }
                _ => {
                    self.em.out.line(format!("{};", declarator));
                    for varying in &inputs {
                        let target = self.em.varying_access(&local(&param.name), &varying.fields);
                        let value = self.input_value(varying).map_err(at)?;
                        self.em.out.line(format!("{} = {};", target, value));
                    }
                }
            }
        }

        let args: Vec<String> = decl
            .params
            .iter()
            .map(|p| match p.modifier {
                ParamModifier::Uniform => self.em.dialect.identifier(&p.name).into_owned(),
                _ => local(&p.name),
            })
            .collect();
        let call = format!("{}({})", self.em.dialect.identifier(&decl.name), args.join(", "));
        if decl.return_type.is_void() {
            self.em.out.line(format!("{};", call));
        } else {
            let declarator = self.em.declarator(&decl.return_type, "entry_result").map_err(at)?;
            self.em.out.line(format!("{} = {};", declarator, call));
        }

        for varying in &self.interface.outputs {
            let root = match varying.binding {
                Binding::Param(index) => local(&decl.params[index].name),
                Binding::Return => "entry_result".to_string(),
            };
            let value = self.em.varying_access(&root, &varying.fields);
            let target = self.output_target(varying).map_err(at)?;
            self.em.out.line(format!("{} = {};", target, value));
        }
        self.em.out.close("");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::CollectingLogger;
    use crate::parse;

    fn generate(source: &str, stage: Stage, version: GlslVersion) -> Result<String> {
        let tree = parse(source, "test.hlsl")?;
        let logger = CollectingLogger::new();
        let mut generator = GlslGenerator::new(&logger);
        generator.generate(&tree, stage, version, "main")?;
        Ok(generator.result().to_string())
    }

    fn expect_glsl(source: &str, stage: Stage, version: GlslVersion) -> String {
        match generate(source, stage, version) {
            Ok(text) => text,
            Err(e) => panic!("generation failed: {}", e),
        }
    }

    #[test]
    fn test_vertex_wrapper() {
        let glsl = expect_glsl(
            "float4 main(float4 pos : POSITION) : SV_Position { return pos * 2.0; }",
            Stage::Vertex,
            GlslVersion::V140,
        );
        assert!(glsl.starts_with("#version 140\n"));
        assert!(glsl.contains("in vec4 attr_POSITION0;"));
        assert!(glsl.contains("vec4 main_(vec4 pos) {\n    return pos * 2.0;\n}"));
        assert!(glsl.contains("vec4 entry_pos = attr_POSITION0;"));
        assert!(glsl.contains("vec4 entry_result = main_(entry_pos);"));
        assert!(glsl.contains("gl_Position = entry_result;"));
    }

    #[test]
    fn test_legacy_fragment_uses_frag_color() {
        let glsl = expect_glsl(
            "float4 main(float2 uv : TEXCOORD0) : COLOR { return float4(uv, 0.0, 1.0); }",
            Stage::Fragment,
            GlslVersion::V110,
        );
        assert!(glsl.contains("varying vec2 var_TEXCOORD0;"));
        assert!(glsl.contains("gl_FragColor = entry_result;"));
        assert!(!glsl.contains("out vec4"));
    }

    #[test]
    fn test_modern_fragment_outputs_have_locations() {
        let glsl = expect_glsl(
            "float4 main(float2 uv : TEXCOORD0) : SV_Target { return float4(uv, 0.0, 1.0); }",
            Stage::Fragment,
            GlslVersion::V330,
        );
        assert!(glsl.contains("layout(location = 0) out vec4 frag_Target0;"));
        assert!(glsl.contains("in vec2 var_TEXCOORD0;"));
        assert!(glsl.contains("frag_Target0 = entry_result;"));
    }

    #[test]
    fn test_mul_reverses_operands() {
        let source = r#"
            float4x4 worldViewProj;
            float4 main(float4 pos : POSITION) : SV_Position { return mul(worldViewProj, pos); }
        "#;
        let glsl = expect_glsl(source, Stage::Vertex, GlslVersion::V140);
        assert!(glsl.contains("uniform mat4 worldViewProj;"));
        assert!(glsl.contains("return pos * worldViewProj;"));
    }

    #[test]
    fn test_uniform_blocks_follow_version() {
        let source = r#"
            cbuffer Frame : register(b3) { float4 tint; float time; };
            float4 main() : SV_Target { return tint * time; }
        "#;
        let modern = expect_glsl(source, Stage::Fragment, GlslVersion::V450);
        assert!(modern.contains("layout(std140, binding = 3) uniform Frame {\n    vec4 tint;\n    float time;\n};"));
        let legacy = expect_glsl(source, Stage::Fragment, GlslVersion::V110);
        assert!(legacy.contains("uniform vec4 tint;\nuniform float time;"));
    }

    #[test]
    fn test_texture_sampling_by_version() {
        let source = r#"
            sampler2D diffuse;
            float4 main(float2 uv : TEXCOORD0) : SV_Target { return tex2D(diffuse, uv); }
        "#;
        assert!(expect_glsl(source, Stage::Fragment, GlslVersion::V110).contains("texture2D(diffuse, uv)"));
        assert!(expect_glsl(source, Stage::Fragment, GlslVersion::V330).contains("texture(diffuse, uv)"));
    }

    #[test]
    fn test_lod_sampling_uses_helper() {
        let source = r#"
            sampler2D heights;
            float4 main(float4 pos : POSITION) : SV_Position {
                float h = tex2Dlod(heights, float4(pos.xy, 0.0, 0.0)).x;
                return pos + h;
            }
        "#;
        let glsl = expect_glsl(source, Stage::Vertex, GlslVersion::V330);
        assert!(glsl.contains("vec4 hlslx_tex2Dlod(sampler2D s, vec4 t) {\n    return textureLod(s, t.xy, t.w);\n}"));
        assert!(glsl.contains("hlslx_tex2Dlod(heights, vec4(pos.xy, 0.0, 0.0)).x"));
    }

    #[test]
    fn test_fmod_helper_and_saturate() {
        let source = r#"
            float4 main(float4 c : COLOR0) : SV_Target {
                float4 w = fmod(c, 0.5);
                return saturate(w);
            }
        "#;
        let glsl = expect_glsl(source, Stage::Fragment, GlslVersion::V140);
        assert!(glsl.contains("vec4 hlslx_fmod(vec4 x, vec4 y) {"));
        assert!(glsl.contains("clamp(w, 0.0, 1.0)"));
    }

    #[test]
    fn test_vector_comparison_and_select() {
        let source = r#"
            float4 main(float4 a : TEXCOORD0, float4 b : TEXCOORD1) : SV_Target {
                return (a < b) ? a : b;
            }
        "#;
        let glsl = expect_glsl(source, Stage::Fragment, GlslVersion::V330);
        assert!(glsl.contains("mix(b, a, lessThan(a, b))"));
        assert!(generate(source, Stage::Fragment, GlslVersion::V110).is_err());
    }

    #[test]
    fn test_clip_and_discard() {
        let source = r#"
            float4 main(float4 c : COLOR0) : SV_Target {
                clip(c.a - 0.5);
                if (c.r > 0.9) discard;
                return c;
            }
        "#;
        let glsl = expect_glsl(source, Stage::Fragment, GlslVersion::V140);
        assert!(glsl.contains("if (c.w - 0.5 < 0.0) discard;"));
        assert!(glsl.contains("discard;"));
    }

    #[test]
    fn test_derivatives_rejected_in_vertex_stage() {
        let source = "float4 main(float4 p : POSITION) : SV_Position { return ddx(p); }";
        let err = generate(source, Stage::Vertex, GlslVersion::V140).unwrap_err();
        assert!(err.message().contains("'ddx' is only available in fragment shaders"));
        assert!(err.location().is_some());
    }

    #[test]
    fn test_es100_derivatives_enable_extension() {
        let source = "float4 main(float4 c : COLOR0) : SV_Target { return fwidth(c); }";
        let glsl = expect_glsl(source, Stage::Fragment, GlslVersion::Es100);
        assert!(glsl.starts_with("#version 100\n#extension GL_OES_standard_derivatives : require\nprecision highp float;\n"));
    }

    #[test]
    fn test_struct_zero_initialization() {
        let source = r#"
            struct Light { float3 dir; float power; };
            float4 main() : SV_Target {
                Light l = (Light)0;
                return float4(l.dir, l.power);
            }
        "#;
        let glsl = expect_glsl(source, Stage::Fragment, GlslVersion::V140);
        assert!(glsl.contains("struct Light {\n    vec3 dir;\n    float power;\n};"));
        assert!(glsl.contains("Light l = Light(vec3(0.0), 0.0);"));
    }

    #[test]
    fn test_reserved_identifiers_are_renamed() {
        let source = r#"
            float4 main(float4 input : TEXCOORD0) : SV_Target {
                float4 texture = input * 2.0;
                return texture;
            }
        "#;
        let glsl = expect_glsl(source, Stage::Fragment, GlslVersion::V140);
        assert!(glsl.contains("vec4 texture_ = input_ * 2.0;"));
        assert!(glsl.contains("entry_result = main_(entry_input);"));
    }

    #[test]
    fn test_errors_reach_logger() {
        let tree = parse("float4 main() : SV_Target { return 1.0; }", "t.hlsl").unwrap();
        let logger = CollectingLogger::new();
        let mut generator = GlslGenerator::new(&logger);
        assert!(generator.generate(&tree, Stage::Fragment, GlslVersion::V140, "missing").is_err());
        assert_eq!(generator.result(), "");
        assert_eq!(logger.messages().len(), 1);
        assert!(logger.messages()[0].contains("entry point 'missing' not found"));
    }
}
