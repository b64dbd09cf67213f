//! HLSL generator.
//!
//! The entry function is emitted as written, with its semantics rewritten
//! for the selected shader model. Expressions translate the same way in
//! both modes; only declarations, samplers and entry semantics differ.

use super::semantic_name;
use crate::ast::{BufferId, BufferKind, FunctionId, GlobalId, Item, ParamModifier, StmtAttribute, StructId, SyntaxTree};
use crate::codegen::bindings::{register_count, BindingTable, Resource, BUFFER_CLASS, SAMPLER_CLASS};
use crate::codegen::entry::{Binding, EntryInterface, Varying};
use crate::codegen::{locate, prec, CodeWriter, Dialect, Emitted, Emitter, Helper, IntrinsicCall};
use crate::error::{CompilerError, Result};
use crate::intrinsics::Intrinsic;
use crate::logger::Logger;
use crate::reachability::{reachable, Reachable};
use crate::semantic::Role;
use crate::types::{SamplerDim, ScalarKind, Type};
use crate::{bail_semantic, Stage};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Shader model 4+ keywords and generated names a shader model 3 source may
/// use as identifiers.
const RESERVED: &[&str] = &[
    "AppendStructuredBuffer", "Buffer", "ByteAddressBuffer", "ConsumeStructuredBuffer", "InputPatch",
    "OutputPatch", "RWBuffer", "RWByteAddressBuffer", "RWStructuredBuffer", "RWTexture1D", "RWTexture2D",
    "RWTexture3D", "SamplerComparisonState", "SamplerState", "StructuredBuffer", "Texture1D", "Texture1DArray",
    "Texture2D", "Texture2DArray", "Texture2DMS", "Texture3D", "TextureCube", "TextureCubeArray", "class",
    "export", "groupshared", "interface", "line", "lineadj", "namespace", "point", "precise", "shared",
    "snorm", "triangle", "triangleadj", "unorm", "volatile",
];

/// Semantics of the entry signature after renaming.
#[derive(Debug, Default)]
struct EntrySemantics {
    params: BTreeMap<usize, String>,
    ret: Option<String>,
    fields: BTreeMap<(StructId, usize), String>,
}

impl EntrySemantics {
    fn build(tree: &SyntaxTree, interface: &EntryInterface, legacy: bool) -> Result<Self> {
        let decl = tree.function(interface.function);
        let mut semantics = EntrySemantics::default();
        let outputs = interface.outputs.iter().map(|varying| (varying, true));
        for (varying, is_output) in interface.inputs.iter().map(|varying| (varying, false)).chain(outputs) {
            let name = semantic_name(&varying.role, legacy)?;
            check_front_facing(varying, legacy)?;
            let root = match varying.binding {
                Binding::Param(index) => &decl.params[index].ty,
                Binding::Return => &decl.return_type,
            };
            match (leaf_field(tree, root, &varying.fields), varying.binding) {
                (Some(field), _) => {
                    // A struct field carries one semantic, so a struct read as
                    // input and written as output must agree on it.
                    match semantics.fields.insert(field, name.clone()) {
                        Some(previous) if is_output && previous != name => {
                            let (id, index) = field;
                            let decl = tree.struct_decl(id);
                            bail_semantic!(
                                "field '{}' of struct '{}' needs semantic '{}' as an input and '{}' as an output; use separate input and output structs",
                                decl.fields[index].name,
                                decl.name,
                                previous,
                                name
                            );
                        }
                        _ => {}
                    }
                }
                (None, Binding::Param(index)) => {
                    semantics.params.insert(index, name);
                }
                (None, Binding::Return) => semantics.ret = Some(name),
            }
        }
        Ok(semantics)
    }
}

fn check_front_facing(varying: &Varying, legacy: bool) -> Result<()> {
    if varying.role != Role::FrontFacing {
        return Ok(());
    }
    match (&varying.ty, legacy) {
        (Type::Scalar(ScalarKind::Bool), false) => Ok(()),
        (Type::Scalar(kind), true) if kind.is_float() => Ok(()),
        (_, false) => bail_semantic!("'{}' must be a bool in shader model 4 and later", varying.semantic),
        (_, true) => bail_semantic!("'{}' must be a float in legacy HLSL", varying.semantic),
    }
}

/// Struct field a field path ends at.
fn leaf_field(tree: &SyntaxTree, root: &Type, fields: &[String]) -> Option<(StructId, usize)> {
    let mut ty = root;
    let mut leaf = None;
    for name in fields {
        let Type::Struct(id) = ty else {
            return None;
        };
        let decl = tree.struct_decl(*id);
        let index = decl.field_index(name)?;
        leaf = Some((*id, index));
        ty = &decl.fields[index].ty;
    }
    leaf
}

struct HlslDialect {
    legacy: bool,
    entry: FunctionId,
    semantics: EntrySemantics,
    helpers: BTreeSet<Helper>,
}

impl HlslDialect {
    fn texture_type(&self, dim: SamplerDim, kind: ScalarKind) -> Result<String> {
        let object = match dim {
            SamplerDim::Tex2D => "Texture2D",
            SamplerDim::Tex3D => "Texture3D",
            SamplerDim::Cube => "TextureCube",
        };
        Ok(format!("{}<{}>", object, self.vector_name(kind, 4)?))
    }

    /// `t.Method(s, ...)` on a split sampler.
    fn sample(&mut self, call: &IntrinsicCall) -> Result<Emitted> {
        use Intrinsic::*;
        let sampler = call.sampler_name()?.to_string();
        let mut args = self.sampler_arguments(&sampler);
        args.extend(call.args.iter().skip(1).map(|a| a.text.clone()));
        let method = match call.intrinsic {
            Tex2D | Tex3D | TexCube => "Sample",
            Tex2DGrad => "SampleGrad",
            Tex2DBias | Tex2DLod | Tex2DProj | Tex3DLod | TexCubeBias | TexCubeLod => {
                let helper = Helper::Texture(call.intrinsic, call.texel_kind());
                self.helpers.insert(helper);
                return Ok(Emitted::call(&helper.name(), &args));
            }
            _ => bail_semantic!("'{}' is not a texture function", call.intrinsic.name()),
        };
        let texture = args.remove(0);
        Ok(Emitted::call(&format!("{}.{}", texture, method), &args))
    }

    fn write_helper(&self, helper: Helper, out: &mut CodeWriter) -> Result<()> {
        let Helper::Texture(intrinsic, kind) = helper else {
            bail_semantic!("helper '{}' is not used by HLSL", helper.name());
        };
        let Some(dim) = intrinsic.sampler_dim() else {
            bail_semantic!("'{}' is not a texture function", intrinsic.name());
        };
        let coords = if dim == SamplerDim::Tex2D { "c.xy" } else { "c.xyz" };
        let body = match intrinsic {
            Intrinsic::Tex2DProj => "t.Sample(s, c.xy / c.w)".to_string(),
            Intrinsic::Tex2DBias | Intrinsic::TexCubeBias => format!("t.SampleBias(s, {}, c.w)", coords),
            _ => format!("t.SampleLevel(s, {}, c.w)", coords),
        };
        out.open(format!(
            "{} {}({} t, SamplerState s, float4 c)",
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

impl Dialect for HlslDialect {
    fn name(&self) -> String {
        if self.legacy { "legacy HLSL" } else { "HLSL" }.to_string()
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
        Ok(format!("{}{}x{}", kind.hlsl_name(), rows, cols))
    }

    fn sampler_type(&self, dim: SamplerDim, kind: ScalarKind) -> Result<String> {
        if !self.legacy {
            return self.texture_type(dim, kind);
        }
        if !kind.is_float() {
            bail_semantic!("integer samplers are not supported by legacy HLSL");
        }
        Ok(match dim {
            SamplerDim::Tex2D => "sampler2D",
            SamplerDim::Tex3D => "sampler3D",
            SamplerDim::Cube => "samplerCUBE",
        }
        .to_string())
    }

    fn is_reserved(&self, name: &str) -> bool {
        !self.legacy && RESERVED.contains(&name)
    }

    fn cast(&self, type_text: &str, operand: Emitted) -> Emitted {
        Emitted::new(format!("({}){}", type_text, operand.wrap(prec::UNARY)), prec::UNARY)
    }

    fn zero_struct(&self, type_text: &str) -> Option<Emitted> {
        Some(Emitted::new(format!("({})0", type_text), prec::UNARY))
    }

    fn init_list(&self, _type_text: &str, _ty: &Type, elements: Vec<String>) -> Result<Emitted> {
        Ok(Emitted::primary(format!("{{ {} }}", elements.join(", "))))
    }

    fn select(&mut self, cond: Emitted, then_expr: Emitted, else_expr: Emitted) -> Result<Emitted> {
        Ok(Emitted::new(
            format!(
                "{} ? {} : {}",
                cond.wrap(prec::LOGICAL_OR),
                then_expr.wrap(prec::CONDITIONAL),
                else_expr.wrap(prec::CONDITIONAL)
            ),
            prec::CONDITIONAL,
        ))
    }

    fn intrinsic(&mut self, call: IntrinsicCall) -> Result<Emitted> {
        if call.intrinsic == Intrinsic::Clip {
            return Err(call.unsupported("an expression"));
        }
        if call.intrinsic.is_texture() && !self.legacy {
            return self.sample(&call);
        }
        let texts: Vec<String> = call.args.iter().map(|a| a.text.clone()).collect();
        Ok(Emitted::call(call.intrinsic.name(), &texts))
    }

    fn clip(&mut self, _ty: &Type, operand: Emitted) -> Result<String> {
        Ok(format!("clip({});", operand.text))
    }

    fn statement_attributes(&self, attributes: &[StmtAttribute]) -> Option<String> {
        let text: String = attributes
            .iter()
            .map(|a| match &a.argument {
                Some(argument) => format!("[{}({})]", a.name, argument),
                None => format!("[{}]", a.name),
            })
            .collect();
        Some(text)
    }

    fn parameter(&self, modifier: ParamModifier, type_text: &str, name: &str, suffix: &str) -> String {
        let qualifier = match modifier {
            ParamModifier::Out => "out ",
            ParamModifier::InOut => "inout ",
            ParamModifier::Uniform => "uniform ",
            ParamModifier::In => "",
        };
        format!("{}{} {}{}", qualifier, type_text, name, suffix)
    }

    fn splits_samplers(&self) -> bool {
        !self.legacy
    }

    fn sampler_parameters(&self, name: &str, dim: SamplerDim, kind: ScalarKind) -> Result<Vec<String>> {
        if self.legacy {
            return Ok(vec![format!("{} {}", self.sampler_type(dim, kind)?, name)]);
        }
        Ok(vec![
            format!("{} {}_texture", self.texture_type(dim, kind)?, name),
            format!("SamplerState {}_sampler", name),
        ])
    }

    fn sampler_arguments(&self, name: &str) -> Vec<String> {
        if self.legacy {
            return vec![name.to_string()];
        }
        vec![format!("{}_texture", name), format!("{}_sampler", name)]
    }

    fn parameter_semantic(&self, function: FunctionId, index: usize) -> Option<String> {
        if function != self.entry {
            return None;
        }
        self.semantics.params.get(&index).cloned()
    }

    fn return_semantic(&self, function: FunctionId) -> Option<String> {
        if function != self.entry {
            return None;
        }
        self.semantics.ret.clone()
    }

    fn field_semantic(&self, id: StructId, index: usize) -> Option<String> {
        self.semantics.fields.get(&(id, index)).cloned()
    }
}

/// Emits HLSL for one entry point, either for shader model 4 and later or
/// for legacy shader model 3.
pub struct HlslGenerator<'l> {
    logger: &'l dyn Logger,
    output: String,
}

impl<'l> HlslGenerator<'l> {
    pub fn new(logger: &'l dyn Logger) -> Self {
        HlslGenerator {
            logger,
            output: String::new(),
        }
    }

    pub fn generate(&mut self, tree: &SyntaxTree, stage: Stage, entry: &str, legacy: bool) -> Result<()> {
        self.output.clear();
        match Translation::run(tree, stage, entry, legacy) {
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

/// Sequential `c` register allocation around explicitly bound ranges.
#[derive(Debug, Default)]
struct ConstantRegisters {
    used: Vec<(u32, u32)>,
}

impl ConstantRegisters {
    fn reserve(&mut self, start: u32, count: u32) {
        self.used.push((start, count));
    }

    fn allocate(&mut self, count: u32) -> u32 {
        let mut start = 0;
        while let Some(&(s, c)) = self.used.iter().find(|(s, c)| start < s + c && *s < start + count) {
            start = s + c;
        }
        self.used.push((start, count));
        start
    }
}

struct Translation<'a> {
    em: Emitter<'a, HlslDialect>,
    legacy: bool,
    bindings: BindingTable,
    reach: Reachable,
    constants: ConstantRegisters,
}

impl<'a> Translation<'a> {
    fn run(tree: &'a SyntaxTree, stage: Stage, entry: &str, legacy: bool) -> Result<String> {
        let entry = tree.find_entry(entry)?;
        let interface = EntryInterface::build(tree, entry, stage)?;
        let semantics = EntrySemantics::build(tree, &interface, legacy)
            .map_err(|err| locate(tree, err, tree.function(entry).line))?;
        let dialect = HlslDialect {
            legacy,
            entry,
            semantics,
            helpers: BTreeSet::new(),
        };
        let reach = reachable(tree, entry)?;

        let mut constants = ConstantRegisters::default();
        for &id in &reach.globals {
            let decl = tree.global(id);
            if let Some(register) = decl.register.filter(|r| r.class == 'c') {
                constants.reserve(register.slot, register_count(tree, &decl.ty));
            }
        }

        let mut translation = Translation {
            em: Emitter::new(tree, stage, dialect),
            legacy,
            bindings: BindingTable::build(tree, entry)?,
            reach,
            constants,
        };
        debug!(
            "generating {} {:?} shader for '{}'",
            translation.em.dialect.name(),
            stage,
            tree.function(entry).name
        );
        translation.emit()
    }

    fn emit(&mut self) -> Result<String> {
        let tree = self.em.tree;
        for &id in &self.reach.structs.clone() {
            self.em.struct_decl(id)?;
        }

        let mut loose = Vec::new();
        for item in &tree.items {
            match *item {
                Item::Buffer(id) if self.reach.uses_buffer(id) => self.buffer(id)?,
                Item::Global(id) if self.reach.uses_global(id) => self.global(id, &mut loose)?,
                _ => {}
            }
        }
        if !loose.is_empty() {
            let slot = self.bindings.free_slot(BUFFER_CLASS);
            self.em.out.open(format!("cbuffer hlslx_Globals : register(b{})", slot));
            for line in loose {
                self.em.out.line(line);
            }
            self.em.out.close(";");
        }
        self.em.out.blank();

        for &id in &self.reach.functions.clone() {
            self.em.function(id)?;
        }

        let mut out = CodeWriter::new();
        for helper in &self.em.dialect.helpers {
            self.em.dialect.write_helper(*helper, &mut out)?;
        }
        out.append(&self.em.out);
        Ok(out.into_string())
    }

    fn buffer(&mut self, id: BufferId) -> Result<()> {
        let tree = self.em.tree;
        let decl = tree.buffer(id);
        let at = |err: CompilerError| locate(tree, err, decl.line);
        if self.legacy {
            for field in &decl.fields {
                let name = self.em.dialect.identifier(&field.name).into_owned();
                let declarator = self.em.declarator(&field.ty, &name).map_err(at)?;
                let register = self.constants.allocate(register_count(tree, &field.ty));
                self.em.out.line(format!("uniform {} : register(c{});", declarator, register));
            }
            return Ok(());
        }

        let name = self.em.dialect.identifier(&decl.name).into_owned();
        let header = match decl.kind {
            BufferKind::Constant => {
                let slot = self.bindings.slot(Resource::Buffer(id)).unwrap_or(0);
                format!("cbuffer {} : register(b{})", name, slot)
            }
            BufferKind::Texture => format!("tbuffer {}", name),
        };
        self.em.out.open(header);
        for field in &decl.fields {
            let declarator = self
                .em
                .declarator(&field.ty, &self.em.dialect.identifier(&field.name))
                .map_err(at)?;
            self.em.out.line(format!("{};", declarator));
        }
        self.em.out.close(";");
        Ok(())
    }

    fn global(&mut self, id: GlobalId, loose: &mut Vec<String>) -> Result<()> {
        let tree = self.em.tree;
        let decl = tree.global(id);
        let at = |err: CompilerError| locate(tree, err, decl.line);
        let name = self.em.dialect.identifier(&decl.name).into_owned();

        if decl.is_uniform() && decl.ty.base_element().is_sampler() {
            let Type::Sampler(dim, kind) = decl.ty else {
                return Err(at(CompilerError::SemanticError(
                    format!("sampler array '{}' is not supported", decl.name),
                    None,
                )));
            };
            let slot = match self.bindings.slot(Resource::Global(id)) {
                Some(slot) => slot,
                None => self.bindings.free_slot(SAMPLER_CLASS),
            };
            if self.legacy {
                let ty = self.em.dialect.sampler_type(dim, kind).map_err(at)?;
                self.em.out.line(format!("{} {} : register(s{});", ty, name, slot));
            } else {
                let ty = self.em.dialect.texture_type(dim, kind).map_err(at)?;
                self.em.out.line(format!("{} {}_texture : register(t{});", ty, name, slot));
                self.em.out.line(format!("SamplerState {}_sampler : register(s{});", name, slot));
            }
            return Ok(());
        }

        let ty = match (&decl.ty, decl.init) {
            (Type::Array(_, None), Some(init)) => tree.expr(init).ty.clone(),
            (ty, _) => ty.clone(),
        };
        let declarator = self.em.declarator(&ty, &name).map_err(at)?;
        if decl.is_uniform() {
            if self.legacy {
                let register = match decl.register.filter(|r| r.class == 'c') {
                    Some(register) => register.slot,
                    None => self.constants.allocate(register_count(tree, &ty)),
                };
                self.em.out.line(format!("uniform {} : register(c{});", declarator, register));
            } else {
                loose.push(format!("{};", declarator));
            }
            return Ok(());
        }

        let qualifier = if decl.is_const { "static const" } else { "static" };
        match decl.init {
            Some(init) => {
                let value = self.em.expr_text(init)?;
                self.em.out.line(format!("{} {} = {};", qualifier, declarator, value));
            }
            None => self.em.out.line(format!("{} {};", qualifier, declarator)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::CollectingLogger;
    use crate::parse;

    fn generate(source: &str, stage: Stage, legacy: bool) -> Result<String> {
        let tree = parse(source, "test.hlsl")?;
        let logger = CollectingLogger::new();
        let mut generator = HlslGenerator::new(&logger);
        generator.generate(&tree, stage, "main", legacy)?;
        Ok(generator.result().to_string())
    }

    fn expect_hlsl(source: &str, stage: Stage, legacy: bool) -> String {
        match generate(source, stage, legacy) {
            Ok(text) => text,
            Err(e) => panic!("generation failed: {}", e),
        }
    }

    #[test]
    fn test_entry_semantics_follow_shader_model() {
        let source = "float4 main(float4 pos : POSITION) : POSITION { return pos * 2.0; }";
        let modern = expect_hlsl(source, Stage::Vertex, false);
        assert!(modern.contains("float4 main(float4 pos : POSITION0) : SV_Position {"));
        assert!(modern.contains("return pos * 2.0;"));
        let legacy = expect_hlsl(source, Stage::Vertex, true);
        assert!(legacy.contains("float4 main(float4 pos : POSITION0) : POSITION {"));
    }

    #[test]
    fn test_struct_shared_by_input_and_output() {
        let source = r#"
            struct V { float4 pos : POSITION; float2 uv : TEXCOORD0; };
            V main(V v) { return v; }
        "#;
        for legacy in [false, true] {
            let err = generate(source, Stage::Vertex, legacy).unwrap_err();
            assert!(err.is_semantic());
            assert!(err.message().contains("struct 'V'"), "{}", err);
            assert_eq!(err.location().map(|l| l.line), Some(3));
        }

        let source = "struct V { float2 uv : TEXCOORD0; float4 c : COLOR0; };\nV main(V v) { return v; }";
        let modern = expect_hlsl(source, Stage::Vertex, false);
        assert!(modern.contains("float2 uv : TEXCOORD0;"), "{}", modern);
    }

    #[test]
    fn test_fragment_targets() {
        let source = "float4 main(float2 uv : TEXCOORD0) : SV_Target { return float4(uv, 0.0, 1.0); }";
        assert!(expect_hlsl(source, Stage::Fragment, true).contains(") : COLOR0 {"));
        assert!(expect_hlsl(source, Stage::Fragment, false).contains(") : SV_Target0 {"));
    }

    #[test]
    fn test_struct_field_semantics() {
        let source = r#"
            struct VSOut { float4 pos : POSITION; float2 uv : TEXCOORD0; };
            VSOut main(float3 p : POSITION, float2 uv : TEXCOORD0) {
                VSOut o;
                o.pos = float4(p, 1.0);
                o.uv = uv;
                return o;
            }
        "#;
        let hlsl = expect_hlsl(source, Stage::Vertex, false);
        assert!(hlsl.contains("struct VSOut {\n    float4 pos : SV_Position;\n    float2 uv : TEXCOORD0;\n};"));
        assert!(hlsl.contains("VSOut main(float3 p : POSITION0, float2 uv : TEXCOORD0) {"));
    }

    #[test]
    fn test_modern_samplers_are_split() {
        let source = r#"
            sampler2D diffuse : register(s2);
            float4 fetch(sampler2D s, float2 uv) { return tex2D(s, uv); }
            float4 main(float2 uv : TEXCOORD0) : SV_Target { return fetch(diffuse, uv); }
        "#;
        let hlsl = expect_hlsl(source, Stage::Fragment, false);
        assert!(hlsl.contains("Texture2D<float4> diffuse_texture : register(t2);"));
        assert!(hlsl.contains("SamplerState diffuse_sampler : register(s2);"));
        assert!(hlsl.contains("float4 fetch(Texture2D<float4> s_texture, SamplerState s_sampler, float2 uv) {"));
        assert!(hlsl.contains("return s_texture.Sample(s_sampler, uv);"));
        assert!(hlsl.contains("fetch(diffuse_texture, diffuse_sampler, uv)"));
    }

    #[test]
    fn test_legacy_keeps_combined_samplers() {
        let source = r#"
            sampler2D diffuse;
            float4 main(float2 uv : TEXCOORD0) : COLOR { return tex2D(diffuse, uv); }
        "#;
        let hlsl = expect_hlsl(source, Stage::Fragment, true);
        assert!(hlsl.contains("sampler2D diffuse : register(s0);"));
        assert!(hlsl.contains("return tex2D(diffuse, uv);"));
    }

    #[test]
    fn test_lod_sampling_uses_helper() {
        let source = r#"
            sampler2D heights;
            float4 main(float4 pos : POSITION) : SV_Position {
                return pos + tex2Dlod(heights, float4(pos.xy, 0.0, 0.0));
            }
        "#;
        let hlsl = expect_hlsl(source, Stage::Vertex, false);
        assert!(hlsl.contains("float4 hlslx_tex2Dlod(Texture2D<float4> t, SamplerState s, float4 c) {"));
        assert!(hlsl.contains("return t.SampleLevel(s, c.xy, c.w);"));
        assert!(hlsl.contains("hlslx_tex2Dlod(heights_texture, heights_sampler, float4(pos.xy, 0.0, 0.0))"));
    }

    #[test]
    fn test_legacy_flattens_constant_buffers() {
        let source = r#"
            cbuffer Frame : register(b1) { float4x4 view; float4 tint; };
            float4 scale;
            float4 main(float4 pos : POSITION) : POSITION { return mul(view, pos) * tint * scale; }
        "#;
        let legacy = expect_hlsl(source, Stage::Vertex, true);
        assert!(legacy.contains("uniform float4x4 view : register(c0);"));
        assert!(legacy.contains("uniform float4 tint : register(c4);"));
        assert!(legacy.contains("uniform float4 scale : register(c5);"));
        assert!(legacy.contains("mul(view, pos) * tint * scale"));

        let modern = expect_hlsl(source, Stage::Vertex, false);
        assert!(modern.contains("cbuffer Frame : register(b1) {\n    float4x4 view;\n    float4 tint;\n};"));
        assert!(modern.contains("cbuffer hlslx_Globals : register(b0) {\n    float4 scale;\n};"));
    }

    #[test]
    fn test_statements_keep_attributes_and_clip() {
        let source = r#"
            float4 main(float4 c : COLOR0) : SV_Target {
                float acc = 0.0;
                [unroll(4)] for (int i = 0; i < 4; i++) { acc += c[i]; }
                clip(acc - 0.5);
                return (float4)acc;
            }
        "#;
        let hlsl = expect_hlsl(source, Stage::Fragment, false);
        assert!(hlsl.contains("[unroll(4)]\n    for (int i = 0; i < 4; i++) {"));
        assert!(hlsl.contains("clip(acc - 0.5);"));
        assert!(hlsl.contains("return (float4)acc;"));
    }

    #[test]
    fn test_legacy_rejects_vertex_id() {
        let source = "float4 main(uint id : SV_VertexID) : SV_Position { return (float4)id; }";
        let err = generate(source, Stage::Vertex, true).unwrap_err();
        assert!(err.message().contains("not supported by legacy HLSL"));
        assert!(generate(source, Stage::Vertex, false).is_ok());
    }
}
