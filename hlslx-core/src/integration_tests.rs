use crate::ast::{StmtKind, SyntaxTree};
use crate::logger::CollectingLogger;
use crate::parser::swizzle_components;
use crate::types::{ScalarKind, Type};
use crate::{parse, GlslVersion, Stage, Target, Translator};
use proptest::prelude::*;

const TARGETS: &[Target] = &[
    Target::Glsl(GlslVersion::V110),
    Target::Glsl(GlslVersion::V140),
    Target::Glsl(GlslVersion::V450),
    Target::Glsl(GlslVersion::Es300),
    Target::Hlsl,
    Target::LegacyHlsl,
    Target::Metal,
];

fn translate(source: &str, entry: &str, stage: Stage, target: Target) -> crate::Result<String> {
    let logger = CollectingLogger::new();
    Translator::new(&logger).translate(source, "test.hlsl", entry, stage, target)
}

fn expect_translation(source: &str, stage: Stage, target: Target) -> String {
    match translate(source, "main", stage, target) {
        Ok(text) => text,
        Err(e) => panic!("{} translation failed: {}", target.name(), e),
    }
}

#[test]
fn test_vertex_scenario_to_glsl() {
    let source = "float4 Main(float4 pos : POSITION) : SV_Position { return pos * 2.0; }";
    let glsl = match translate(source, "Main", Stage::Vertex, Target::Glsl(GlslVersion::V140)) {
        Ok(text) => text,
        Err(e) => panic!("translation failed: {}", e),
    };
    assert!(glsl.starts_with("#version 140"));
    assert!(glsl.contains("vec4 attr_POSITION0;"));
    assert!(glsl.contains("vec4 Main(vec4 pos) {"));
    assert!(glsl.contains("return pos * 2.0;"));
    assert!(glsl.contains("void main() {"));
    assert!(glsl.contains("vec4 entry_result = Main(entry_pos);"));
    assert!(glsl.contains("gl_Position = entry_result;"));
}

#[test]
fn test_undeclared_identifier_fails_parse() {
    let source = "float4 main() : SV_Target { return missing; }";
    let logger = CollectingLogger::new();
    let err = Translator::new(&logger)
        .check_only(source, "test.hlsl")
        .unwrap_err();
    assert!(err.is_semantic());
    assert!(err.message().contains("missing"));
    assert_eq!(err.location().map(|l| l.line), Some(1));
    assert!(!logger.is_empty());
}

#[test]
fn test_types_survive_every_target() {
    let source = r#"
        struct Surface { float3 normal; float gloss; };
        float4 main(float3 n : NORMAL, float2 uv : TEXCOORD0) : SV_Target {
            Surface s;
            s.normal = normalize(n);
            s.gloss = uv.x;
            float3 lit = s.normal * s.gloss;
            return float4(lit, 1.0);
        }
    "#;
    for &target in TARGETS {
        let text = expect_translation(source, Stage::Fragment, target);
        let (vec3, vec4) = match target {
            Target::Glsl(_) => ("vec3", "vec4"),
            _ => ("float3", "float4"),
        };
        assert!(text.contains(&format!("{} lit = s.normal * s.gloss;", vec3)), "{}", text);
        assert!(text.contains(&format!("return {}(lit, 1.0);", vec4)), "{}", text);
        assert!(text.contains(&format!("{} normal;", vec3)), "{}", text);
    }
}

#[test]
fn test_entry_must_be_unique() {
    let source = r#"
        float4 main(float4 p : POSITION) : SV_Position { return p; }
        float4 main(float3 p : POSITION) : SV_Position { return float4(p, 1.0); }
    "#;
    for &target in TARGETS {
        let err = translate(source, "main", Stage::Vertex, target).unwrap_err();
        assert!(err.is_semantic());
        assert!(err.message().contains("more than once"));
    }
    let err = translate(source, "absent", Stage::Vertex, Target::Metal).unwrap_err();
    assert!(err.message().contains("not found"));
}

#[test]
fn test_generation_is_idempotent() {
    let source = r#"
        cbuffer Frame : register(b0) { float4x4 viewProj; float4 tint; };
        sampler2D diffuse;
        float4 shade(float2 uv) { return tex2D(diffuse, uv) * tint; }
        float4 main(float2 uv : TEXCOORD0) : SV_Target { return shade(uv); }
    "#;
    let tree = match parse(source, "test.hlsl") {
        Ok(tree) => tree,
        Err(e) => panic!("parse failed: {}", e),
    };
    let logger = CollectingLogger::new();
    let translator = Translator::new(&logger);
    for &target in TARGETS {
        let first = translator.generate(&tree, "main", Stage::Fragment, target);
        let second = translator.generate(&tree, "main", Stage::Fragment, target);
        assert_eq!(first, second, "{}", target.name());
    }
}

#[test]
fn test_mul_keeps_row_vector_convention() {
    let source = r#"
        float4x4 world;
        float4 main(float4 p : POSITION) : SV_Position { return mul(world, p) + mul(p, world); }
    "#;
    let glsl = expect_translation(source, Stage::Vertex, Target::Glsl(GlslVersion::V330));
    assert!(glsl.contains("return p * world + world * p;"));
    let hlsl = expect_translation(source, Stage::Vertex, Target::Hlsl);
    assert!(hlsl.contains("return mul(world, p) + mul(p, world);"));
    let metal = expect_translation(source, Stage::Vertex, Target::Metal);
    assert!(metal.contains("return p * uniforms.world + uniforms.world * p;"));
}

const INTRINSIC_CALLS: &[&str] = &[
    "abs(a)",
    "acos(a)",
    "asin(a)",
    "atan(a)",
    "atan2(a, b)",
    "ceil(a)",
    "clamp(a, b, c)",
    "cos(a)",
    "cosh(a)",
    "float4(cross(a.xyz, b.xyz), 1.0)",
    "ddx(a)",
    "ddy(a)",
    "degrees(a)",
    "distance(a, b)",
    "dot(a, b)",
    "exp(a)",
    "exp2(a)",
    "faceforward(a, b, c)",
    "floor(a)",
    "fmod(a, b)",
    "frac(a)",
    "fwidth(a)",
    "ldexp(a, b)",
    "length(a)",
    "lerp(a, b, c)",
    "log(a)",
    "log10(a)",
    "log2(a)",
    "mad(a, b, c)",
    "max(a, b)",
    "min(a, b)",
    "mul(a, b)",
    "normalize(a)",
    "pow(a, b)",
    "radians(a)",
    "reflect(a, b)",
    "round(a)",
    "rsqrt(a)",
    "saturate(a)",
    "sign(a)",
    "sin(a)",
    "sinh(a)",
    "smoothstep(a, b, c)",
    "sqrt(a)",
    "step(a, b)",
    "tan(a)",
    "tanh(a)",
    "trunc(a)",
    "(all(a) ? a : b)",
    "(any(a) ? a : b)",
    "(any(isnan(a)) ? a : b)",
    "(any(isinf(a)) ? a : b)",
];

#[test]
fn test_every_intrinsic_maps_or_fails_explicitly() {
    for call in INTRINSIC_CALLS {
        let source = format!(
            "float4 main(float4 a : TEXCOORD0, float4 b : TEXCOORD1, float4 c : TEXCOORD2) : SV_Target {{ return a + {}; }}",
            call
        );
        for &target in TARGETS {
            match translate(&source, "main", Stage::Fragment, target) {
                Ok(text) => assert!(text.contains("return a + "), "{}: {}", call, text),
                Err(e) => assert!(e.is_semantic(), "{} on {}: {}", call, target.name(), e),
            }
        }
        let hlsl = translate(&source, "main", Stage::Fragment, Target::Hlsl);
        assert!(hlsl.is_ok(), "{}: {:?}", call, hlsl.err());
    }
}

#[test]
fn test_fragment_only_intrinsics_rejected_in_vertex_stage() {
    let source = "float4 main(float4 p : POSITION) : SV_Position { return ddx(p); }";
    for &target in TARGETS {
        let err = translate(source, "main", Stage::Vertex, target).unwrap_err();
        assert!(err.is_semantic(), "{}", target.name());
    }
}

#[test]
fn test_expanded_compound_assignment_evaluates_target_once() {
    let source = r#"
        float4 main(float4 c : COLOR0) : SV_Target {
            float a[2];
            a[0] = c.x;
            a[1] = c.y;
            int i = 0;
            a[i++] %= 2.0;
            return c * a[i];
        }
    "#;
    let hlsl = expect_translation(source, Stage::Fragment, Target::Hlsl);
    assert!(hlsl.contains("a[i++] %= 2.0;"), "{}", hlsl);
    for target in [Target::Glsl(GlslVersion::V330), Target::Metal] {
        let err = translate(source, "main", Stage::Fragment, target).unwrap_err();
        assert!(err.is_semantic(), "{}", target.name());
        assert!(err.message().contains("side effects"), "{}", err);
    }
}

fn returned_type(tree: &SyntaxTree, name: &str) -> Option<Type> {
    let id = tree.functions_named(name).next()?;
    let last = *tree.function(id).body.as_ref()?.last()?;
    match &tree.stmt(last).kind {
        StmtKind::Return(Some(value)) => Some(tree.expr(*value).ty.clone()),
        _ => None,
    }
}

fn swizzle_letters(components: &[u8], set: &str) -> String {
    components.iter().map(|&c| set.as_bytes()[c as usize] as char).collect()
}

proptest! {
    #[test]
    fn prop_swizzle_arity(arity in 1u8..=4, components in prop::collection::vec(0u8..4, 1..=4), rgba in any::<bool>()) {
        let set = if rgba { "rgba" } else { "xyzw" };
        let name = swizzle_letters(&components, set);
        let result = swizzle_components(&name, arity);
        if components.iter().all(|&c| c < arity) {
            prop_assert_eq!(result, Ok(components));
        } else {
            prop_assert!(result.is_err());
        }
    }

    #[test]
    fn prop_swizzle_type_has_one_component_per_letter(components in prop::collection::vec(0u8..4, 1..=4)) {
        let name = swizzle_letters(&components, "xyzw");
        let expected = match components.len() {
            1 => Type::FLOAT,
            n => Type::vector(ScalarKind::Float, n as u8),
        };
        let source = format!("float4 v; {} g() {{ return v.{}; }}", expected.display_with(&|_| String::new()), name);
        let tree = parse(&source, "test.hlsl").map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(&returned_type(&tree, "g"), &Some(expected));
    }

    #[test]
    fn prop_mixed_swizzle_sets_rejected(split in 1usize..4) {
        let name: String = "xyzw"[..split].chars().chain("rgba"[split..].chars()).collect();
        prop_assert!(swizzle_components(&name, 4).is_err());
    }
}
