use hlslx_core::{translate, CollectingLogger, GlslVersion, Stage, Target, Translator};

const SKINNED_VERTEX: &str = r#"
struct VsOut {
    float4 pos : SV_Position;
    float2 uv : TEXCOORD0;
};

cbuffer Camera {
    float4x4 viewProj;
};

VsOut main(float3 pos : POSITION, float2 uv : TEXCOORD0) {
    VsOut o;
    o.pos = mul(viewProj, float4(pos, 1.0));
    o.uv = uv;
    return o;
}
"#;

fn translate_vertex(target: Target) -> String {
    match translate(SKINNED_VERTEX, "skinned.hlsl", "main", Stage::Vertex, target) {
        Ok(text) => text,
        Err(e) => panic!("{} translation failed: {}", target.name(), e),
    }
}

#[test]
fn test_struct_output_to_glsl() {
    let glsl = translate_vertex(Target::Glsl(GlslVersion::V330));
    assert!(glsl.contains("vec4(pos, 1.0) * viewProj"));
    assert!(glsl.contains("gl_Position = entry_result.pos;"));
    assert!(glsl.contains("var_TEXCOORD0 = entry_result.uv;"));
}

#[test]
fn test_struct_output_to_hlsl() {
    let modern = translate_vertex(Target::Hlsl);
    assert!(modern.contains("float4 pos : SV_Position;"));
    assert!(modern.contains("float2 uv : TEXCOORD0;"));
    assert!(modern.contains("mul(viewProj, float4(pos, 1.0))"));

    let legacy = translate_vertex(Target::LegacyHlsl);
    assert!(legacy.contains("float4 pos : POSITION;"));
    assert!(legacy.contains("uniform float4x4 viewProj : register(c0);"));
}

#[test]
fn test_struct_output_to_metal() {
    let metal = translate_vertex(Target::Metal);
    assert!(metal.contains("float3 attr_POSITION0 [[attribute(0)]];"));
    assert!(metal.contains("float2 attr_TEXCOORD0 [[attribute(1)]];"));
    assert!(metal.contains("float2 var_TEXCOORD0 [[user(TEXCOORD0)]];"));
    assert!(metal.contains("float4(pos, 1.0) * Camera_buffer.viewProj"));
    assert!(metal.contains("stage_output.position = entry_result.pos;"));
    assert!(metal.contains("stage_output.var_TEXCOORD0 = entry_result.uv;"));
}

#[test]
fn test_syntax_error_is_located() {
    let logger = CollectingLogger::new();
    let err = Translator::new(&logger)
        .translate("float4 main() : SV_Target {\n    return 1.0 +;\n}", "broken.hlsl", "main", Stage::Fragment, Target::Metal)
        .unwrap_err();
    assert!(err.is_syntax());
    let location = err.location().map(|l| l.to_string());
    assert_eq!(location.as_deref(), Some("broken.hlsl(2)"));
    assert!(!logger.is_empty());
}

#[test]
fn test_unused_declarations_are_dropped() {
    let source = r#"
        float4 unusedTint;
        struct Unused { float x; };
        float helper(float x) { return x * 2.0; }
        float4 main(float4 c : COLOR0) : SV_Target { return c; }
    "#;
    for target in [Target::Glsl(GlslVersion::V140), Target::Hlsl, Target::Metal] {
        let text = match translate(source, "t.hlsl", "main", Stage::Fragment, target) {
            Ok(text) => text,
            Err(e) => panic!("{} translation failed: {}", target.name(), e),
        };
        assert!(!text.contains("unusedTint"), "{}", text);
        assert!(!text.contains("Unused"), "{}", text);
        assert!(!text.contains("helper"), "{}", text);
    }
}
