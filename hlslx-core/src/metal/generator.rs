//! Metal generator.
//!
//! HLSL `floatRxC` becomes Metal `floatRxC`, which Metal reads as R columns
//! of C rows; a Metal column is therefore an HLSL row and `mul(a, b)`
//! becomes `b * a`, as in GLSL.

use crate::ast::{BinaryOp, BufferId, FunctionId, GlobalId, Item, ParamModifier, StorageClass, SyntaxTree};
use crate::codegen::bindings::{BindingTable, Resource, BUFFER_CLASS};
use crate::codegen::entry::{Binding, EntryInterface, Varying};
use crate::codegen::{infix, locate, plain_binary, prec, CodeWriter, Dialect, Emitted, Emitter, Helper, IntrinsicCall};
use crate::error::{CompilerError, Result};
use crate::intrinsics::Intrinsic;
use crate::logger::Logger;
use crate::reachability::{reachable, Reachable};
use crate::semantic::{Direction, Role};
use crate::types::{SamplerDim, ScalarKind, Type};
use crate::{bail_semantic, Stage};
use log::debug;
use std::collections::BTreeSet;

fn buffer_member(name: &str) -> String {
    format!("{}_buffer", name)
}

struct MetalDialect {
    helpers: BTreeSet<Helper>,
}

impl MetalDialect {
    fn texture_type(&self, dim: SamplerDim, kind: ScalarKind) -> Result<String> {
        if kind == ScalarKind::Bool {
            bail_semantic!("bool textures are not supported by Metal");
        }
        let object = match dim {
            SamplerDim::Tex2D => "texture2d",
            SamplerDim::Tex3D => "texture3d",
            SamplerDim::Cube => "texturecube",
        };
        Ok(format!("{}<{}>", object, kind.hlsl_name()))
    }

    fn broadcast(&self, operand: &Type, ty: &Type, value: Emitted) -> Result<Emitted> {
        match (operand, ty) {
            (Type::Scalar(kind), Type::Vector(_, n)) => Ok(self.cast(&self.vector_name(*kind, *n)?, value)),
            _ => Ok(value),
        }
    }

    fn sample(&mut self, call: &IntrinsicCall) -> Result<Emitted> {
        use Intrinsic::*;
        let sampler = call.sampler_name()?.to_string();
        let mut args = self.sampler_arguments(&sampler);
        let rest: Vec<String> = call.args.iter().skip(1).map(|a| a.text.clone()).collect();
        match call.intrinsic {
            Tex2D | Tex3D | TexCube => {
                let texture = args.remove(0);
                args.extend(rest);
                Ok(Emitted::call(&format!("{}.sample", texture), &args))
            }
            Tex2DGrad => {
                let [coord, dx, dy] = rest.as_slice() else {
                    bail_semantic!("'tex2Dgrad' takes four arguments");
                };
                let texture = args.remove(0);
                args.push(coord.clone());
                args.push(format!("gradient2d({}, {})", dx, dy));
                Ok(Emitted::call(&format!("{}.sample", texture), &args))
            }
            Tex2DBias | Tex2DLod | Tex2DProj | Tex3DLod | TexCubeBias | TexCubeLod => {
                let helper = Helper::Texture(call.intrinsic, call.texel_kind());
                self.helpers.insert(helper);
                args.extend(rest);
                Ok(Emitted::call(&helper.name(), &args))
            }
            _ => bail_semantic!("'{}' is not a texture function", call.intrinsic.name()),
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
        let Helper::Texture(intrinsic, kind) = helper else {
            bail_semantic!("helper '{}' is not used by Metal", helper.name());
        };
        let Some(dim) = intrinsic.sampler_dim() else {
            bail_semantic!("'{}' is not a texture function", intrinsic.name());
        };
        let coords = if dim == SamplerDim::Tex2D { "c.xy" } else { "c.xyz" };
        let body = match intrinsic {
            Intrinsic::Tex2DProj => "t.sample(s, c.xy / c.w)".to_string(),
            Intrinsic::Tex2DBias | Intrinsic::TexCubeBias => format!("t.sample(s, {}, bias(c.w))", coords),
            _ => format!("t.sample(s, {}, level(c.w))", coords),
        };
        out.open(format!(
            "{} {}({} t, sampler s, float4 c)",
            self.vector_name(kind, 4)?,
            helper.name(),
            self.texture_type(dim, kind)?
        ));
        out.line(format!("return {};", body));
        out.close("");
        out.blank();
        Ok(())
    }
}

impl Dialect for MetalDialect {
    fn name(&self) -> String {
        "Metal".to_string()
    }

    fn scalar_name(&self, kind: ScalarKind) -> Result<&'static str> {
        Ok(kind.hlsl_name())
    }

    fn vector_name(&self, kind: ScalarKind, n: u8) -> Result<String> {
        if n == 1 {
            return Ok(kind.hlsl_name().to_string());
        }
        Ok(format!("{}{}", kind.hlsl_name(), n))
    }

    fn matrix_name(&self, kind: ScalarKind, rows: u8, cols: u8) -> Result<String> {
        if !kind.is_float() {
            bail_semantic!("'{}{}x{}' matrices are not supported by Metal", kind.hlsl_name(), rows, cols);
        }
        Ok(format!("{}{}x{}", kind.hlsl_name(), rows, cols))
    }

    fn sampler_type(&self, dim: SamplerDim, kind: ScalarKind) -> Result<String> {
        self.texture_type(dim, kind)
    }

    fn is_reserved(&self, name: &str) -> bool {
        super::is_reserved(name)
    }

    fn variable(&self, tree: &SyntaxTree, name: &str, storage: StorageClass) -> String {
        let name = self.identifier(name);
        match storage {
            StorageClass::Global(id) => {
                let decl = tree.global(id);
                if decl.is_uniform() && !decl.ty.base_element().is_sampler() {
                    format!("uniforms.{}", name)
                } else {
                    name.into_owned()
                }
            }
            StorageClass::BufferField(id, _) => {
                let buffer = self.identifier(&tree.buffer(id).name).into_owned();
                format!("{}.{}", buffer_member(&buffer), name)
            }
            StorageClass::Local | StorageClass::Parameter(_) => name.into_owned(),
        }
    }

    fn zero_struct(&self, type_text: &str) -> Option<Emitted> {
        Some(Emitted::new(format!("{}{{}}", type_text), prec::POSTFIX))
    }

    fn init_list(&self, _type_text: &str, _ty: &Type, elements: Vec<String>) -> Result<Emitted> {
        Ok(Emitted::primary(format!("{{ {} }}", elements.join(", "))))
    }

    fn binary(&mut self, op: BinaryOp, operands: [&Type; 2], ty: &Type, lhs: Emitted, rhs: Emitted) -> Result<Emitted> {
        let [lt, rt] = operands;
        if op == BinaryOp::Mul && lt.is_matrix() && rt.is_matrix() {
            bail_semantic!("component-wise matrix multiplication is not supported by Metal");
        }
        if op.is_logical() && !ty.is_scalar() {
            bail_semantic!("component-wise '{}' is not supported by Metal", op.symbol());
        }
        if op == BinaryOp::Mod && ty.scalar_kind().is_some_and(|k| k.is_float()) {
            let lhs = self.broadcast(lt, ty, lhs)?;
            let rhs = self.broadcast(rt, ty, rhs)?;
            return Ok(Emitted::call("fmod", &[lhs.text, rhs.text]));
        }
        Ok(plain_binary(op, &lhs, &rhs))
    }

    fn select(&mut self, cond: Emitted, then_expr: Emitted, else_expr: Emitted) -> Result<Emitted> {
        Ok(Emitted::call("select", &[else_expr.text, then_expr.text, cond.text]))
    }

    fn intrinsic(&mut self, call: IntrinsicCall) -> Result<Emitted> {
        use Intrinsic::*;
        let texts: Vec<String> = call.args.iter().map(|a| a.text.clone()).collect();
        let arg_kind = call.arg_types.first().and_then(|t| t.scalar_kind()).unwrap_or(ScalarKind::Float);
        let named = |name: &str| -> Result<Emitted> { Ok(Emitted::call(name, &texts)) };

        match call.intrinsic {
            Abs | Acos | Asin | Atan | Atan2 | Ceil | Clamp | Cos | Cosh | Cross | Determinant | Distance | Exp
            | Exp2 | FaceForward | Floor | Fmod | Fwidth | IsInf | IsNan | Length | Log | Log10 | Log2 | Max
            | Min | Normalize | Pow | Reflect | Refract | Round | Rsqrt | Saturate | Sin | Sinh | SmoothStep
            | Sqrt | Step | Tan | Tanh | Transpose | Trunc => named(call.intrinsic.name()),
            Dot => {
                if arg_kind.is_integer() {
                    return Err(call.unsupported("Metal for integer vectors"));
                }
                named("dot")
            }
            Ddx => named("dfdx"),
            Ddy => named("dfdy"),
            Frac => named("fract"),
            Lerp => named("mix"),
            Mad => named("fma"),
            Degrees => Ok(infix(&call.args[0], "*", &Emitted::primary("57.29577951308232"), prec::MULTIPLICATIVE)),
            Radians => Ok(infix(
                &call.args[0],
                "*",
                &Emitted::primary("0.017453292519943295"),
                prec::MULTIPLICATIVE,
            )),
            Ldexp => {
                let scale = Emitted::call("exp2", &[texts[1].clone()]);
                Ok(infix(&call.args[0], "*", &scale, prec::MULTIPLICATIVE))
            }
            Sign => {
                let operand = match &call.arg_types[0] {
                    ty if arg_kind.is_integer() => {
                        let float = ty.with_kind(ScalarKind::Float).unwrap_or(Type::FLOAT);
                        let float_name = match float {
                            Type::Vector(kind, n) => self.vector_name(kind, n)?,
                            _ => "float".to_string(),
                        };
                        self.cast(&float_name, call.args[0].clone())
                    }
                    _ => call.args[0].clone(),
                };
                let sign = Emitted::call("sign", &[operand.text]);
                let result = match &call.ty {
                    Type::Vector(kind, n) => self.vector_name(*kind, *n)?,
                    Type::Scalar(kind) => kind.hlsl_name().to_string(),
                    _ => bail_semantic!("'sign' returns a scalar or a vector"),
                };
                Ok(self.cast(&result, sign))
            }
            All | Any => {
                let value = match (&call.arg_types[0], arg_kind) {
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
            Clip => Err(call.unsupported("an expression")),
            Tex2D | Tex2DBias | Tex2DGrad | Tex2DLod | Tex2DProj | Tex3D | Tex3DLod | TexCube | TexCubeBias
            | TexCubeLod => self.sample(&call),
        }
    }

    fn clip(&mut self, ty: &Type, operand: Emitted) -> Result<String> {
        let test = infix(&operand, "<", &Emitted::primary("0.0"), prec::RELATIONAL);
        match ty {
            Type::Vector(..) => Ok(format!("if (any({})) discard_fragment();", test.text)),
            _ => Ok(format!("if ({}) discard_fragment();", test.text)),
        }
    }

    fn discard(&self) -> &'static str {
        "discard_fragment()"
    }

    fn parameter(&self, modifier: ParamModifier, type_text: &str, name: &str, suffix: &str) -> String {
        match modifier {
            ParamModifier::Out | ParamModifier::InOut if suffix.is_empty() => {
                format!("thread {}& {}", type_text, name)
            }
            ParamModifier::Out | ParamModifier::InOut => format!("thread {} (&{}){}", type_text, name, suffix),
            ParamModifier::In | ParamModifier::Uniform => format!("{} {}{}", type_text, name, suffix),
        }
    }

    fn splits_samplers(&self) -> bool {
        true
    }

    fn sampler_parameters(&self, name: &str, dim: SamplerDim, kind: ScalarKind) -> Result<Vec<String>> {
        Ok(vec![
            format!("{} {}_texture", self.texture_type(dim, kind)?, name),
            format!("sampler {}_sampler", name),
        ])
    }

    fn sampler_arguments(&self, name: &str) -> Vec<String> {
        vec![format!("{}_texture", name), format!("{}_sampler", name)]
    }

    fn truncates_matrix_by_cast(&self) -> bool {
        false
    }
}

/// Emits Metal Shading Language for one entry point.
pub struct MetalGenerator<'l> {
    logger: &'l dyn Logger,
    output: String,
}

impl<'l> MetalGenerator<'l> {
    pub fn new(logger: &'l dyn Logger) -> Self {
        MetalGenerator {
            logger,
            output: String::new(),
        }
    }

    pub fn generate(&mut self, tree: &SyntaxTree, stage: Stage, entry: &str) -> Result<()> {
        self.output.clear();
        match Translation::run(tree, stage, entry) {
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
    em: Emitter<'a, MetalDialect>,
    entry: FunctionId,
    interface: EntryInterface,
    bindings: BindingTable,
    reach: Reachable,
    /// `<entry>_` prefix of the generated type names.
    prefix: String,
    /// Context members initialized from stage function parameters.
    context_members: Vec<String>,
    /// Resource parameters of the stage function.
    stage_params: Vec<String>,
}

impl<'a> Translation<'a> {
    fn run(tree: &'a SyntaxTree, stage: Stage, entry: &str) -> Result<String> {
        let entry = tree.find_entry(entry)?;
        let mut translation = Translation {
            em: Emitter::new(tree, stage, MetalDialect { helpers: BTreeSet::new() }),
            entry,
            interface: EntryInterface::build(tree, entry, stage)?,
            bindings: BindingTable::build(tree, entry)?,
            reach: reachable(tree, entry)?,
            prefix: tree.function(entry).name.clone(),
            context_members: Vec::new(),
            stage_params: Vec::new(),
        };
        debug!("generating Metal {:?} shader for '{}'", stage, tree.function(entry).name);
        translation.emit()
    }

    fn emit(&mut self) -> Result<String> {
        let tree = self.em.tree;
        for &id in &self.reach.structs.clone() {
            self.em.struct_decl(id)?;
        }
        for item in &tree.items {
            match *item {
                Item::Buffer(id) if self.reach.uses_buffer(id) => self.buffer_struct(id)?,
                Item::Global(id) if self.reach.uses_global(id) && tree.global(id).is_constant() => {
                    self.constant(id)?
                }
                _ => {}
            }
        }
        self.em.out.blank();
        self.uniforms_struct()?;
        self.interface_struct(Direction::Input)?;
        self.interface_struct(Direction::Output)?;
        let declarations = self.em.take_output();

        self.context()?;
        self.stage_function()?;

        let mut out = CodeWriter::new();
        out.line("#include <metal_stdlib>");
        out.line("using namespace metal;");
        out.blank();
        out.append(&declarations);
        for helper in &self.em.dialect.helpers {
            self.em.dialect.write_helper(*helper, &mut out)?;
        }
        out.append(&self.em.out);
        Ok(out.into_string())
    }

    fn buffer_struct(&mut self, id: BufferId) -> Result<()> {
        let tree = self.em.tree;
        let decl = tree.buffer(id);
        let name = self.em.dialect.identifier(&decl.name).into_owned();
        self.em.out.open(format!("struct {}", name));
        for field in &decl.fields {
            let declarator = self
                .em
                .declarator(&field.ty, &self.em.dialect.identifier(&field.name))
                .map_err(|err| locate(tree, err, decl.line))?;
            self.em.out.line(format!("{};", declarator));
        }
        self.em.out.close(";");
        self.em.out.blank();
        Ok(())
    }

    fn constant(&mut self, id: GlobalId) -> Result<()> {
        let tree = self.em.tree;
        let decl = tree.global(id);
        let Some(init) = decl.init else {
            return Ok(());
        };
        let ty = match &decl.ty {
            Type::Array(_, None) => tree.expr(init).ty.clone(),
            ty => ty.clone(),
        };
        let declarator = self
            .em
            .declarator(&ty, &self.em.dialect.identifier(&decl.name))
            .map_err(|err| locate(tree, err, decl.line))?;
        let value = self.em.expr_text(init)?;
        self.em.out.line(format!("constant {} = {};", declarator, value));
        Ok(())
    }

    /// Loose uniform globals and non-sampler `uniform` entry parameters.
    fn uniform_fields(&self) -> Result<Vec<String>> {
        let tree = self.em.tree;
        let mut fields = Vec::new();
        for &id in &self.reach.globals {
            let decl = tree.global(id);
            if decl.is_uniform() && !decl.ty.base_element().is_sampler() {
                let name = self.em.dialect.identifier(&decl.name);
                fields.push(self.em.declarator(&decl.ty, &name).map_err(|err| locate(tree, err, decl.line))?);
            }
        }
        let entry = tree.function(self.entry);
        for &index in &self.interface.uniforms {
            let param = &entry.params[index];
            if !param.ty.is_sampler() {
                let name = self.em.dialect.identifier(&param.name);
                fields.push(self.em.declarator(&param.ty, &name).map_err(|err| locate(tree, err, entry.line))?);
            }
        }
        Ok(fields)
    }

    fn uniforms_struct(&mut self) -> Result<()> {
        let fields = self.uniform_fields()?;
        if fields.is_empty() {
            return Ok(());
        }
        self.em.out.open(format!("struct {}_Uniforms", self.prefix));
        for field in fields {
            self.em.out.line(format!("{};", field));
        }
        self.em.out.close(";");
        self.em.out.blank();
        Ok(())
    }

    /// Stage struct member a varying lives in, with its attribute. `None`
    /// for values passed as stage function parameters.
    fn interface_member(&self, varying: &Varying, direction: Direction, attribute: u32) -> Result<Option<String>> {
        let stage = self.em.stage;
        if varying.ty.scalar_kind() == Some(ScalarKind::Bool) && !varying.role.is_builtin() {
            bail_semantic!("'{}' cannot carry a bool value in Metal", varying.semantic);
        }
        let float4 = Type::Vector(ScalarKind::Float, 4);
        let member = match (&varying.role, direction) {
            (Role::Generic(_), Direction::Input) if stage == Stage::Vertex => {
                let name = self.generated(varying, direction)?;
                format!("{} [[attribute({})]]", self.em.declarator(&varying.ty, &name)?, attribute)
            }
            (Role::Generic(sem), _) => {
                let name = self.generated(varying, direction)?;
                let flat = direction == Direction::Input && varying.ty.scalar_kind().is_some_and(|k| k.is_integer());
                format!(
                    "{} [[user({})]]{}",
                    self.em.declarator(&varying.ty, &name)?,
                    sem,
                    if flat { " [[flat]]" } else { "" }
                )
            }
            (Role::FragCoord, _) => "float4 position [[position]]".to_string(),
            (Role::Position, _) => {
                if varying.ty != float4 {
                    bail_semantic!("'{}' must be written as a float4", varying.semantic);
                }
                "float4 position [[position]]".to_string()
            }
            (Role::PointSize, _) => "float point_size [[point_size]]".to_string(),
            (Role::Target(n), _) => {
                let name = self.generated(varying, direction)?;
                format!("{} [[color({})]]", self.em.declarator(&varying.ty, &name)?, n)
            }
            (Role::Depth, _) => "float depth [[depth(any)]]".to_string(),
            (Role::VertexId | Role::InstanceId | Role::FrontFacing, _) => return Ok(None),
        };
        Ok(Some(member))
    }

    fn generated(&self, varying: &Varying, direction: Direction) -> Result<String> {
        match varying.generated_name(self.em.stage, direction) {
            Some(name) => Ok(name),
            None => bail_semantic!("'{}' has no generated name", varying.semantic),
        }
    }

    /// Name of the stage struct member or parameter holding a varying.
    fn interface_access(&self, varying: &Varying, direction: Direction) -> Result<String> {
        let root = match direction {
            Direction::Input => "stage_input",
            Direction::Output => "stage_output",
        };
        let name = match varying.role {
            Role::Generic(_) | Role::Target(_) => format!("{}.{}", root, self.generated(varying, direction)?),
            Role::Position | Role::FragCoord => format!("{}.position", root),
            Role::PointSize => format!("{}.point_size", root),
            Role::Depth => format!("{}.depth", root),
            Role::VertexId => "vertex_id".to_string(),
            Role::InstanceId => "instance_id".to_string(),
            Role::FrontFacing => "front_facing".to_string(),
        };
        Ok(name)
    }

    fn interface_struct(&mut self, direction: Direction) -> Result<()> {
        let tree = self.em.tree;
        let line = tree.function(self.entry).line;
        let varyings = match direction {
            Direction::Input => &self.interface.inputs,
            Direction::Output => &self.interface.outputs,
        };
        let mut members = Vec::new();
        let mut attribute = 0;
        for varying in varyings {
            let member = self
                .interface_member(varying, direction, attribute)
                .map_err(|err| locate(tree, err, line))?;
            if let Some(member) = member {
                if matches!(varying.role, Role::Generic(_)) {
                    attribute += 1;
                }
                members.push(member);
            }
        }
        if members.is_empty() {
            return Ok(());
        }
        let suffix = match direction {
            Direction::Input => "Input",
            Direction::Output => "Output",
        };
        self.em.out.open(format!("struct {}_{}", self.prefix, suffix));
        for member in members {
            self.em.out.line(format!("{};", member));
        }
        self.em.out.close(";");
        self.em.out.blank();
        Ok(())
    }

    fn has_struct(&self, direction: Direction) -> bool {
        let varyings = match direction {
            Direction::Input => &self.interface.inputs,
            Direction::Output => &self.interface.outputs,
        };
        varyings
            .iter()
            .any(|v| !matches!(v.role, Role::VertexId | Role::InstanceId | Role::FrontFacing))
    }

    fn context(&mut self) -> Result<()> {
        let tree = self.em.tree;
        self.em.out.open(format!("struct {}_Context", self.prefix));

        for item in &tree.items {
            let Item::Buffer(id) = *item else {
                continue;
            };
            if !self.reach.uses_buffer(id) {
                continue;
            }
            let name = self.em.dialect.identifier(&tree.buffer(id).name).into_owned();
            let member = buffer_member(&name);
            let slot = self.bindings.slot(Resource::Buffer(id)).unwrap_or(0);
            self.em.out.line(format!("constant {}& {};", name, member));
            self.stage_params.push(format!("constant {}& {} [[buffer({})]]", name, member, slot));
            self.context_members.push(member);
        }

        if !self.uniform_fields()?.is_empty() {
            let ty = format!("{}_Uniforms", self.prefix);
            let slot = self.bindings.free_slot(BUFFER_CLASS);
            self.em.out.line(format!("constant {}& uniforms;", ty));
            self.stage_params.push(format!("constant {}& uniforms [[buffer({})]]", ty, slot));
            self.context_members.push("uniforms".to_string());
        }

        let mut statics = Vec::new();
        for &id in &self.reach.globals.clone() {
            let decl = tree.global(id);
            if decl.is_uniform() && decl.ty.base_element().is_sampler() {
                let &Type::Sampler(dim, kind) = &decl.ty else {
                    return Err(locate(
                        tree,
                        CompilerError::SemanticError(format!("sampler array '{}' is not supported", decl.name), None),
                        decl.line,
                    ));
                };
                let name = self.em.dialect.identifier(&decl.name).into_owned();
                let slot = self.bindings.slot(Resource::Global(id)).unwrap_or(0);
                self.sampler_member(&name, dim, kind, slot)
                    .map_err(|err| locate(tree, err, decl.line))?;
            } else if decl.is_static && !decl.is_constant() {
                statics.push(id);
            }
        }

        for id in statics {
            let decl = tree.global(id);
            let ty = match (&decl.ty, decl.init) {
                (Type::Array(_, None), Some(init)) => tree.expr(init).ty.clone(),
                (ty, _) => ty.clone(),
            };
            let declarator = self
                .em
                .declarator(&ty, &self.em.dialect.identifier(&decl.name))
                .map_err(|err| locate(tree, err, decl.line))?;
            match decl.init {
                Some(init) => {
                    let value = self.em.expr_text(init)?;
                    self.em.out.line(format!("{} = {};", declarator, value));
                }
                None => self.em.out.line(format!("{};", declarator)),
            }
        }

        self.em.out.blank();
        for &id in &self.reach.functions.clone() {
            self.em.function(id)?;
        }
        self.em.out.close(";");
        self.em.out.blank();
        Ok(())
    }

    fn sampler_member(&mut self, name: &str, dim: SamplerDim, kind: ScalarKind, slot: u32) -> Result<()> {
        let texture = self.em.dialect.texture_type(dim, kind)?;
        self.em.out.line(format!("{} {}_texture;", texture, name));
        self.em.out.line(format!("sampler {}_sampler;", name));
        self.stage_params
            .push(format!("{} {}_texture [[texture({})]]", texture, name, slot));
        self.stage_params.push(format!("sampler {}_sampler [[sampler({})]]", name, slot));
        self.context_members.push(format!("{}_texture", name));
        self.context_members.push(format!("{}_sampler", name));
        Ok(())
    }

    /// Value of a stage input converted to its declared type.
    fn input_value(&self, varying: &Varying) -> Result<String> {
        let access = self.interface_access(varying, Direction::Input)?;
        let builtin = match varying.role {
            Role::Generic(_) => return Ok(access),
            Role::FragCoord => Type::Vector(ScalarKind::Float, 4),
            Role::VertexId | Role::InstanceId => Type::Scalar(ScalarKind::Uint),
            Role::FrontFacing if varying.ty.scalar_kind().is_some_and(|k| k.is_float()) => {
                return Ok(format!("{} ? 1.0 : -1.0", access));
            }
            Role::FrontFacing => Type::BOOL,
            _ => bail_semantic!("'{}' is not a valid input semantic", varying.semantic),
        };
        Ok(self.em.convert(&builtin, &varying.ty, Emitted::primary(access))?.text)
    }

    fn stage_function(&mut self) -> Result<()> {
        let tree = self.em.tree;
        let stage = self.em.stage;
        let decl = tree.function(self.entry);
        let at = |err: CompilerError| locate(tree, err, decl.line);
        let local = |name: &str| format!("entry_{}", name);

        let mut params = Vec::new();
        if self.has_struct(Direction::Input) {
            params.push(format!("{}_Input stage_input [[stage_in]]", self.prefix));
        }
        params.extend(self.stage_params.iter().cloned());
        for (index, param) in decl.params.iter().enumerate() {
            if let (ParamModifier::Uniform, Type::Sampler(dim, kind)) = (param.modifier, &param.ty) {
                let name = self.em.dialect.identifier(&param.name).into_owned();
                let slot = self.bindings.slot(Resource::EntryParam(index)).unwrap_or(0);
                let texture = self.em.dialect.texture_type(*dim, *kind).map_err(at)?;
                params.push(format!("{} {}_texture [[texture({})]]", texture, name, slot));
                params.push(format!("sampler {}_sampler [[sampler({})]]", name, slot));
            }
        }
        for varying in &self.interface.inputs {
            match varying.role {
                Role::VertexId => params.push("uint vertex_id [[vertex_id]]".to_string()),
                Role::InstanceId => params.push("uint instance_id [[instance_id]]".to_string()),
                Role::FrontFacing => params.push("bool front_facing [[front_facing]]".to_string()),
                _ => {}
            }
        }

        let has_output = self.has_struct(Direction::Output);
        let return_type = if has_output {
            format!("{}_Output", self.prefix)
        } else {
            "void".to_string()
        };
        let qualifier = match stage {
            Stage::Vertex => "vertex",
            Stage::Fragment => "fragment",
        };
        let stage_name = match stage {
            Stage::Vertex => "vertex",
            Stage::Fragment => "fragment",
        };
        self.em.out.open(format!(
            "{} {} {}_{}({})",
            qualifier,
            return_type,
            self.prefix,
            stage_name,
            params.join(", ")
        ));

        let init = if self.context_members.is_empty() {
            "{}".to_string()
        } else {
            format!("{{ {} }}", self.context_members.join(", "))
        };
        self.em.out.line(format!("{}_Context context = {};", self.prefix, init));

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

        let mut args = Vec::with_capacity(decl.params.len());
        for param in &decl.params {
            let name = self.em.dialect.identifier(&param.name).into_owned();
            match (param.modifier, &param.ty) {
                (ParamModifier::Uniform, Type::Sampler(..)) => {
                    args.extend(self.em.dialect.sampler_arguments(&name));
                }
                (ParamModifier::Uniform, _) => args.push(format!("uniforms.{}", name)),
                _ => args.push(local(&param.name)),
            }
        }
        let call = format!("context.{}({})", self.em.dialect.identifier(&decl.name), args.join(", "));
        if decl.return_type.is_void() {
            self.em.out.line(format!("{};", call));
        } else {
            let declarator = self.em.declarator(&decl.return_type, "entry_result").map_err(at)?;
            self.em.out.line(format!("{} = {};", declarator, call));
        }

        if has_output {
            self.em.out.line(format!("{}_Output stage_output;", self.prefix));
            for varying in &self.interface.outputs {
                let root = match varying.binding {
                    Binding::Param(index) => local(&decl.params[index].name),
                    Binding::Return => "entry_result".to_string(),
                };
                let value = self.em.varying_access(&root, &varying.fields);
                let target = self.interface_access(varying, Direction::Output).map_err(at)?;
                self.em.out.line(format!("{} = {};", target, value));
            }
            self.em.out.line("return stage_output;");
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

    fn generate(source: &str, stage: Stage) -> Result<String> {
        let tree = parse(source, "test.hlsl")?;
        let logger = CollectingLogger::new();
        let mut generator = MetalGenerator::new(&logger);
        generator.generate(&tree, stage, "main")?;
        Ok(generator.result().to_string())
    }

    fn expect_metal(source: &str, stage: Stage) -> String {
        match generate(source, stage) {
            Ok(text) => text,
            Err(e) => panic!("generation failed: {}", e),
        }
    }

    #[test]
    fn test_vertex_stage_function() {
        let msl = expect_metal(
            "float4 main(float4 pos : POSITION) : SV_Position { return pos * 2.0; }",
            Stage::Vertex,
        );
        assert!(msl.starts_with("#include <metal_stdlib>\nusing namespace metal;\n"));
        assert!(msl.contains("struct main_Input {\n    float4 attr_POSITION0 [[attribute(0)]];\n};"));
        assert!(msl.contains("struct main_Output {\n    float4 position [[position]];\n};"));
        assert!(msl.contains("    float4 main_(float4 pos) {\n        return pos * 2.0;\n    }"));
        assert!(msl.contains("vertex main_Output main_vertex(main_Input stage_input [[stage_in]]) {"));
        assert!(msl.contains("main_Context context = {};"));
        assert!(msl.contains("float4 entry_pos = stage_input.attr_POSITION0;"));
        assert!(msl.contains("float4 entry_result = context.main_(entry_pos);"));
        assert!(msl.contains("stage_output.position = entry_result;"));
    }

    #[test]
    fn test_buffers_and_uniforms() {
        let source = r#"
            cbuffer Frame : register(b1) { float4 tint; };
            float4 scale;
            float4 main(float2 uv : TEXCOORD0) : SV_Target { return tint * scale; }
        "#;
        let msl = expect_metal(source, Stage::Fragment);
        assert!(msl.contains("struct Frame {\n    float4 tint;\n};"));
        assert!(msl.contains("struct main_Uniforms {\n    float4 scale;\n};"));
        assert!(msl.contains("    constant Frame& Frame_buffer;\n    constant main_Uniforms& uniforms;"));
        assert!(msl.contains("return Frame_buffer.tint * uniforms.scale;"));
        assert!(msl.contains("constant Frame& Frame_buffer [[buffer(1)]], constant main_Uniforms& uniforms [[buffer(0)]]"));
        assert!(msl.contains("main_Context context = { Frame_buffer, uniforms };"));
        assert!(msl.contains("float2 var_TEXCOORD0 [[user(TEXCOORD0)]];"));
        assert!(msl.contains("float4 frag_Target0 [[color(0)]];"));
    }

    #[test]
    fn test_textures_are_split() {
        let source = r#"
            sampler2D diffuse;
            float4 main(float2 uv : TEXCOORD0) : SV_Target { return tex2D(diffuse, uv); }
        "#;
        let msl = expect_metal(source, Stage::Fragment);
        assert!(msl.contains("    texture2d<float> diffuse_texture;\n    sampler diffuse_sampler;"));
        assert!(msl.contains("return diffuse_texture.sample(diffuse_sampler, uv);"));
        assert!(msl.contains("texture2d<float> diffuse_texture [[texture(0)]], sampler diffuse_sampler [[sampler(0)]]"));
    }

    #[test]
    fn test_entry_uniform_parameters() {
        let source = r#"
            float4 main(float4 pos : POSITION, uniform float4x4 mvp) : SV_Position { return mul(mvp, pos); }
        "#;
        let msl = expect_metal(source, Stage::Vertex);
        assert!(msl.contains("struct main_Uniforms {\n    float4x4 mvp;\n};"));
        assert!(msl.contains("float4 main_(float4 pos, float4x4 mvp) {"));
        assert!(msl.contains("return pos * mvp;"));
        assert!(msl.contains("context.main_(entry_pos, uniforms.mvp)"));
    }

    #[test]
    fn test_out_parameters_and_discard() {
        let source = r#"
            void main(float2 uv : TEXCOORD0, out float4 color : SV_Target) {
                if (uv.x > 0.5) discard;
                clip(uv - 0.25);
                color = float4(frac(uv), lerp(0.0, 1.0, uv.y), 1.0);
            }
        "#;
        let msl = expect_metal(source, Stage::Fragment);
        assert!(msl.contains("void main_(float2 uv, thread float4& color) {"));
        assert!(msl.contains("discard_fragment();"));
        assert!(msl.contains("if (any(uv - 0.25 < 0.0)) discard_fragment();"));
        assert!(msl.contains("fract(uv)"));
        assert!(msl.contains("mix(0.0, 1.0, uv.y)"));
        assert!(msl.contains("float4 entry_color;"));
        assert!(msl.contains("context.main_(entry_uv, entry_color);"));
        assert!(msl.contains("stage_output.frag_Target0 = entry_color;"));
    }

    #[test]
    fn test_file_scope_state() {
        let source = r#"
            static const float SCALE = 2.0;
            static float bias = 0.5;
            float4 main(float4 c : COLOR0) : SV_Target { return c * SCALE + bias; }
        "#;
        let msl = expect_metal(source, Stage::Fragment);
        assert!(msl.contains("constant float SCALE = 2.0;"));
        assert!(msl.contains("    float bias = 0.5;"));
        assert!(msl.contains("return c * SCALE + bias;"));
    }

    #[test]
    fn test_component_wise_matrix_product_is_rejected() {
        let source = r#"
            float4x4 a;
            float4x4 b;
            float4 main(float4 p : POSITION) : SV_Position { float4x4 m = a * b; return mul(m, p); }
        "#;
        let err = generate(source, Stage::Vertex).unwrap_err();
        assert!(err.message().contains("not supported by Metal"));
        assert!(err.location().is_some());
    }
}
