use super::*;
use crate::intrinsics::Intrinsic;
use crate::logger::CollectingLogger;
use crate::types::SamplerDim;

const FLOAT: ScalarKind = ScalarKind::Float;

/// Helper function that expects parsing to succeed and runs a check function on the tree.
/// If the check fails, outputs the parsed tree for debugging.
fn expect_parse<F>(input: &str, check_fn: F)
where
    F: FnOnce(&SyntaxTree) -> std::result::Result<(), String>,
{
    let logger = CollectingLogger::new();
    let tree = match Parser::new(&logger, "test.hlsl", input).parse() {
        Ok(tree) => tree,
        Err(e) => {
            println!("Parse failed with error: {}", e);
            panic!("Failed to parse input: {:?}", e);
        }
    };
    assert!(logger.is_empty());

    if let Err(msg) = check_fn(&tree) {
        println!("Check failed: {}", msg);
        println!("Parsed tree: {:#?}", tree);
        panic!("Test assertion failed: {}", msg);
    }
}

/// Helper function that expects parsing to fail with a specific error.
/// Also checks that the error was reported through the logger.
fn expect_parse_error<F>(input: &str, error_check: F)
where
    F: FnOnce(&CompilerError) -> std::result::Result<(), String>,
{
    let logger = CollectingLogger::new();
    match Parser::new(&logger, "test.hlsl", input).parse() {
        Ok(tree) => {
            println!("Expected parse error, but parsing succeeded");
            println!("Parsed tree: {:#?}", tree);
            panic!("Expected parse to fail, but it succeeded");
        }
        Err(ref error) => {
            assert_eq!(logger.messages(), vec![error.to_string()]);
            if let Err(msg) = error_check(error) {
                println!("Error check failed: {}", msg);
                println!("Actual error: {:?}", error);
                panic!("Error assertion failed: {}", msg);
            }
        }
    }
}

fn semantic_containing(needle: &'static str) -> impl FnOnce(&CompilerError) -> std::result::Result<(), String> {
    move |error| {
        if !error.is_semantic() {
            return Err(format!("expected semantic error, got {}", error));
        }
        if !error.message().contains(needle) {
            return Err(format!("expected message containing '{}', got '{}'", needle, error.message()));
        }
        Ok(())
    }
}

/// The expression returned by the last statement of function `name`.
fn returned_expr<'t>(tree: &'t SyntaxTree, name: &str) -> std::result::Result<&'t Expr, String> {
    let id = tree.functions_named(name).next().ok_or(format!("no function '{}'", name))?;
    let body = tree.function(id).body.as_ref().ok_or("function has no body")?;
    let last = body.last().ok_or("empty body")?;
    match &tree.stmt(*last).kind {
        StmtKind::Return(Some(value)) => Ok(tree.expr(*value)),
        other => Err(format!("expected return, got {:?}", other)),
    }
}

#[test]
fn test_parse_simple_function() {
    expect_parse("float4 Main(float4 pos : POSITION) : SV_Position { return pos * 2.0; }", |tree| {
        let entry = tree.find_entry("Main").map_err(|e| e.to_string())?;
        let f = tree.function(entry);
        if f.params.len() != 1 || f.params[0].semantic.as_deref() != Some("POSITION") {
            return Err(format!("unexpected params {:?}", f.params));
        }
        if f.return_semantic.as_deref() != Some("SV_Position") {
            return Err("missing return semantic".to_string());
        }
        let ret = returned_expr(tree, "Main")?;
        match &ret.kind {
            ExprKind::Binary { op: BinaryOp::Mul, rhs, .. } => {
                if ret.ty != Type::Vector(FLOAT, 4) {
                    return Err(format!("expected float4 product, got {:?}", ret.ty));
                }
                let rhs = tree.expr(*rhs);
                if rhs.kind != ExprKind::Literal(Literal::Float(2.0)) || rhs.ty != Type::FLOAT {
                    return Err(format!("scalar operand should stay a float literal, got {:?}", rhs));
                }
                Ok(())
            }
            other => Err(format!("expected multiplication, got {:?}", other)),
        }
    });
}

#[test]
fn test_int_literal_is_retyped_not_converted() {
    expect_parse("float f() { return 2; }", |tree| {
        let ret = returned_expr(tree, "f")?;
        if ret.kind != ExprKind::Literal(Literal::Float(2.0)) {
            return Err(format!("expected float literal, got {:?}", ret.kind));
        }
        Ok(())
    });
}

#[test]
fn test_implicit_conversion_node() {
    expect_parse("float3 f(int3 v) { return v; }", |tree| {
        let ret = returned_expr(tree, "f")?;
        match ret.kind {
            ExprKind::Conversion { .. } if ret.ty == Type::Vector(FLOAT, 3) => Ok(()),
            _ => Err(format!("expected int3 -> float3 conversion, got {:?}", ret)),
        }
    });
}

#[test]
fn test_vector_truncation_is_implicit() {
    expect_parse("float2 f(float4 v) { return v; }", |tree| {
        let ret = returned_expr(tree, "f")?;
        if !matches!(ret.kind, ExprKind::Conversion { .. }) {
            return Err("expected truncating conversion".to_string());
        }
        Ok(())
    });
}

#[test]
fn test_operator_precedence() {
    expect_parse("int f(int a, int b, int c) { return a + b * c << 1 & 7; }", |tree| {
        let ret = returned_expr(tree, "f")?;
        let ExprKind::Binary { op: BinaryOp::BitAnd, lhs, .. } = &ret.kind else {
            return Err(format!("expected '&' at the root, got {:?}", ret.kind));
        };
        let ExprKind::Binary { op: BinaryOp::Shl, lhs, .. } = &tree.expr(*lhs).kind else {
            return Err("expected '<<' under '&'".to_string());
        };
        let ExprKind::Binary { op: BinaryOp::Add, rhs, .. } = &tree.expr(*lhs).kind else {
            return Err("expected '+' under '<<'".to_string());
        };
        match tree.expr(*rhs).kind {
            ExprKind::Binary { op: BinaryOp::Mul, .. } => Ok(()),
            _ => Err("expected '*' as right operand of '+'".to_string()),
        }
    });
}

#[test]
fn test_swizzles() {
    expect_parse("float3 f(float4 c) { float s = c.w; return c.bgr; }", |tree| {
        let ret = returned_expr(tree, "f")?;
        match &ret.kind {
            ExprKind::Swizzle { components, .. } if components == &vec![2, 1, 0] => Ok(()),
            other => Err(format!("expected bgr swizzle, got {:?}", other)),
        }
    });
}

#[test]
fn test_scalar_swizzle() {
    expect_parse("float3 f(float s) { return s.xxx; }", |tree| {
        let ret = returned_expr(tree, "f")?;
        if ret.ty != Type::Vector(FLOAT, 3) {
            return Err(format!("expected float3, got {:?}", ret.ty));
        }
        Ok(())
    });
}

#[test]
fn test_mixed_swizzle_sets_rejected() {
    expect_parse_error("float2 f(float4 v) { return v.xg; }", semantic_containing("invalid swizzle"));
}

#[test]
fn test_swizzle_out_of_range_rejected() {
    expect_parse_error("float f(float2 v) { return v.z; }", semantic_containing("selects component 3"));
}

#[test]
fn test_matrix_element_access() {
    expect_parse("float f(float4x4 m) { return m._m01 + m._12; }", |tree| {
        let ret = returned_expr(tree, "f")?;
        let ExprKind::Binary { lhs, rhs, .. } = &ret.kind else {
            return Err("expected addition".to_string());
        };
        for (side, expected) in [(*lhs, (0, 1)), (*rhs, (0, 1))] {
            let ExprKind::Index { base, index } = &tree.expr(side).kind else {
                return Err("expected element index".to_string());
            };
            let ExprKind::Index { index: row, .. } = &tree.expr(*base).kind else {
                return Err("expected row index".to_string());
            };
            let row = &tree.expr(*row).kind;
            let col = &tree.expr(*index).kind;
            if *row != ExprKind::Literal(Literal::Int(expected.0)) || *col != ExprKind::Literal(Literal::Int(expected.1)) {
                return Err(format!("unexpected element {:?} {:?}", row, col));
            }
        }
        Ok(())
    });
}

#[test]
fn test_struct_and_member_access() {
    let src = r#"
        struct VSOut { float4 pos : SV_Position; float2 uv : TEXCOORD0; };
        float2 f(VSOut v) { return v.uv; }
    "#;
    expect_parse(src, |tree| {
        let s = tree.find_struct("VSOut").ok_or("struct missing")?;
        let decl = tree.struct_decl(s);
        if decl.fields[1].semantic.as_deref() != Some("TEXCOORD0") {
            return Err("field semantic lost".to_string());
        }
        let ret = returned_expr(tree, "f")?;
        match ret.kind {
            ExprKind::Member { field: 1, .. } => Ok(()),
            _ => Err(format!("expected member access, got {:?}", ret.kind)),
        }
    });
}

#[test]
fn test_cbuffer_fields_are_globals() {
    let src = r#"
        cbuffer PerFrame : register(b2) { float4x4 ViewProj; float Time; };
        float f() { return Time; }
    "#;
    expect_parse(src, |tree| {
        let buffer = &tree.buffers[0];
        if buffer.register != Some(Register { class: 'b', slot: 2 }) {
            return Err(format!("register lost: {:?}", buffer.register));
        }
        let ret = returned_expr(tree, "f")?;
        match ret.kind {
            ExprKind::Variable {
                storage: StorageClass::BufferField(BufferId(0), 1),
                ..
            } => Ok(()),
            _ => Err(format!("expected buffer field reference, got {:?}", ret.kind)),
        }
    });
}

#[test]
fn test_sampler_with_return_hint() {
    expect_parse("sampler2D<half4> tex : register(s1); half4 f(float2 uv) { return tex2D(tex, uv); }", |tree| {
        let g = &tree.globals[0];
        if g.ty != Type::Sampler(SamplerDim::Tex2D, ScalarKind::Half) {
            return Err(format!("unexpected sampler type {:?}", g.ty));
        }
        let ret = returned_expr(tree, "f")?;
        if ret.ty != Type::Vector(ScalarKind::Half, 4) {
            return Err(format!("texture fetch should return half4, got {:?}", ret.ty));
        }
        Ok(())
    });
}

#[test]
fn test_vector_and_matrix_template_syntax() {
    expect_parse("matrix<float, 3, 3> m; vector<int, 2> f() { vector<int, 2> v = int2(1, 2); return v; }", |tree| {
        if tree.globals[0].ty != Type::Matrix(FLOAT, 3, 3) {
            return Err(format!("unexpected matrix type {:?}", tree.globals[0].ty));
        }
        let ret = returned_expr(tree, "f")?;
        if ret.ty != Type::Vector(ScalarKind::Int, 2) {
            return Err(format!("unexpected vector type {:?}", ret.ty));
        }
        Ok(())
    });
}

#[test]
fn test_constructor_component_count() {
    expect_parse("float4 f(float3 v) { return float4(v, 1); }", |tree| {
        let ret = returned_expr(tree, "f")?;
        let ExprKind::Constructor { args } = &ret.kind else {
            return Err("expected constructor".to_string());
        };
        if tree.expr(args[1]).kind != ExprKind::Literal(Literal::Float(1.0)) {
            return Err("scalar argument should be retyped to float".to_string());
        }
        Ok(())
    });
    expect_parse_error("float4 f(float2 v) { return float4(v, 1); }", semantic_containing("needs 4 components"));
}

#[test]
fn test_struct_zero_cast() {
    expect_parse("struct S { float a; int b; }; S f() { S s = (S)0; return s; }", |tree| {
        let f = tree.function(FunctionId(0));
        let body = f.body.as_ref().ok_or("no body")?;
        let StmtKind::Declaration(decls) = &tree.stmt(body[0]).kind else {
            return Err("expected declaration".to_string());
        };
        let init = tree.expr(decls[0].init.ok_or("missing initializer")?);
        match init.kind {
            ExprKind::Cast { .. } if matches!(init.ty, Type::Struct(_)) => Ok(()),
            _ => Err(format!("expected struct zero cast, got {:?}", init)),
        }
    });
    expect_parse_error("struct S { float a; }; S f() { return (S)1; }", semantic_containing("cannot cast"));
}

#[test]
fn test_init_list_sizes_array() {
    expect_parse("static const float weights[] = { 0.25, 0.5, 0.25 };", |tree| {
        let g = &tree.globals[0];
        if g.ty != Type::Array(Box::new(Type::FLOAT), Some(3)) {
            return Err(format!("expected float[3], got {:?}", g.ty));
        }
        if !g.is_constant() {
            return Err("static const global should be a constant".to_string());
        }
        Ok(())
    });
}

#[test]
fn test_array_extent_from_constant() {
    expect_parse("static const int N = 4; float4 lights[N];", |tree| {
        match &tree.globals[1].ty {
            Type::Array(_, Some(4)) => Ok(()),
            other => Err(format!("expected extent 4, got {:?}", other)),
        }
    });
}

#[test]
fn test_control_flow_and_attributes() {
    let src = r#"
        float f(float x) {
            float acc = 0;
            [unroll(4)]
            for (int i = 0; i < 4; i++) {
                if (i == 2) continue;
                acc += x;
            }
            while (acc > 10) { acc -= 1; }
            do { acc *= 0.5; } while (acc > 1);
            return acc;
        }
    "#;
    expect_parse(src, |tree| {
        let body = tree.function(FunctionId(0)).body.as_ref().ok_or("no body")?;
        let for_stmt = tree.stmt(body[1]);
        if for_stmt.attributes
            != vec![StmtAttribute {
                name: "unroll".to_string(),
                argument: Some("4".to_string()),
            }]
        {
            return Err(format!("attributes lost: {:?}", for_stmt.attributes));
        }
        if !matches!(for_stmt.kind, StmtKind::For { init: Some(_), cond: Some(_), step: Some(_), .. }) {
            return Err(format!("expected full for loop, got {:?}", for_stmt.kind));
        }
        if !matches!(tree.stmt(body[2]).kind, StmtKind::While { .. }) {
            return Err("expected while".to_string());
        }
        if !matches!(tree.stmt(body[3]).kind, StmtKind::DoWhile { .. }) {
            return Err("expected do-while".to_string());
        }
        Ok(())
    });
}

#[test]
fn test_for_scope_ends_with_loop() {
    expect_parse_error(
        "int f() { for (int i = 0; i < 2; i++) {} return i; }",
        semantic_containing("undeclared identifier 'i'"),
    );
}

#[test]
fn test_undeclared_identifier() {
    expect_parse_error("float4 main() : SV_Target { return color; }", |error| {
        if !error.is_semantic() {
            return Err(format!("expected semantic error, got {}", error));
        }
        if error.location().map(|l| l.line) != Some(1) {
            return Err("error should carry the line".to_string());
        }
        if error.message() != "undeclared identifier 'color'" {
            return Err(format!("unexpected message '{}'", error.message()));
        }
        Ok(())
    });
}

#[test]
fn test_syntax_error_location() {
    expect_parse_error("float f()\n{\n  return 1\n}", |error| {
        if !error.is_syntax() {
            return Err(format!("expected syntax error, got {}", error));
        }
        if error.location().map(|l| l.line) != Some(4) {
            return Err(format!("expected line 4, got {:?}", error.location()));
        }
        Ok(())
    });
}

#[test]
fn test_user_function_hides_intrinsic() {
    expect_parse("float saturate(float x) { return x; } float f(float y) { return saturate(y); }", |tree| {
        let ret = returned_expr(tree, "f")?;
        match ret.kind {
            ExprKind::Call { callee: Callee::Function(FunctionId(0)), .. } => Ok(()),
            _ => Err(format!("expected user function call, got {:?}", ret.kind)),
        }
    });
}

#[test]
fn test_overload_prefers_fewer_conversions() {
    let src = r#"
        float pick(float a, float b) { return a; }
        float pick(int a, int b) { return 0; }
        float f(int x, int y) { return pick(x, y); }
    "#;
    expect_parse(src, |tree| {
        let ret = returned_expr(tree, "f")?;
        match ret.kind {
            ExprKind::Call { callee: Callee::Function(FunctionId(1)), .. } => Ok(()),
            _ => Err(format!("expected the int overload, got {:?}", ret.kind)),
        }
    });
}

#[test]
fn test_ambiguous_overload() {
    let src = r#"
        float pick(float a, int b) { return a; }
        float pick(int a, float b) { return b; }
        float f(int x) { return pick(x, x); }
    "#;
    expect_parse_error(src, semantic_containing("ambiguous call to 'pick(int, int)'"));
}

#[test]
fn test_out_parameter_requires_lvalue_of_exact_type() {
    let src = r#"
        void split(float4 v, out float3 rgb) { rgb = v.rgb; }
        float3 f(float4 c) { float3 o; split(c, o); return o; }
    "#;
    expect_parse(src, |_| Ok(()));

    let src = r#"
        void split(float4 v, out float3 rgb) { rgb = v.rgb; }
        float3 f(float4 c) { float4 o; split(c, o); return o.rgb; }
    "#;
    expect_parse_error(src, semantic_containing("no matching overload"));
}

#[test]
fn test_intrinsic_resolution() {
    expect_parse("float4x4 M; float4 f(float4 p) { return mul(M, p); }", |tree| {
        let ret = returned_expr(tree, "f")?;
        match ret.kind {
            ExprKind::Call { callee: Callee::Intrinsic(Intrinsic::Mul), .. } if ret.ty == Type::Vector(FLOAT, 4) => Ok(()),
            _ => Err(format!("expected mul returning float4, got {:?}", ret)),
        }
    });
}

#[test]
fn test_matrix_star_vector_rejected() {
    expect_parse_error("float4x4 M; float4 f(float4 p) { return M * p; }", semantic_containing("use mul()"));
}

#[test]
fn test_assignment_to_uniform_rejected() {
    expect_parse_error("float4 tint; void f() { tint = 0; }", semantic_containing("cannot assign to uniform 'tint'"));
    expect_parse_error(
        "cbuffer C { float k; }; void f() { k = 1; }",
        semantic_containing("cannot assign to buffer member 'k'"),
    );
    expect_parse_error("void f() { const float k = 1; k = 2; }", semantic_containing("cannot assign to constant"));
}

#[test]
fn test_static_global_is_assignable() {
    expect_parse("static float counter = 0; void f() { counter += 1; }", |tree| {
        if tree.globals[0].is_uniform() {
            return Err("static global should not be a uniform".to_string());
        }
        Ok(())
    });
}

#[test]
fn test_compound_assignment_widening() {
    expect_parse("void f() { int i = 0; i += 0.5; }", |tree| {
        let body = tree.function(FunctionId(0)).body.as_ref().ok_or("no body")?;
        match &tree.stmt(body[1]).kind {
            StmtKind::Assign { op: AssignOp::Assign, value, .. } => match tree.expr(*value).kind {
                ExprKind::Conversion { .. } => Ok(()),
                ref other => Err(format!("expected conversion back to int, got {:?}", other)),
            },
            other => Err(format!("expected rewritten assignment, got {:?}", other)),
        }
    });
}

#[test]
fn test_widening_compound_assignment_keeps_single_evaluation() {
    expect_parse_error(
        "void f() { int a[4] = {1, 2, 3, 4}; int i = 0; a[i++] += 0.5; }",
        semantic_containing("must not have side effects"),
    );
    expect_parse("void f() { int a[4] = {1, 2, 3, 4}; int i = 0; a[i++] += 1; a[i] += 0.5; }", |tree| {
        let body = tree.function(FunctionId(0)).body.as_ref().ok_or("no body")?;
        match &tree.stmt(body[2]).kind {
            StmtKind::Assign { op: AssignOp::Add, .. } => Ok(()),
            other => Err(format!("expected compound assignment to stay compound, got {:?}", other)),
        }
    });
}

#[test]
fn test_negative_constant_index_rejected() {
    expect_parse_error("float f(float4 v) { return v[-1]; }", semantic_containing("index -1 is out of range"));
    expect_parse_error("void f() { float a[3]; a[3] = 1.0; }", semantic_containing("index 3 is out of range"));
}

#[test]
fn test_break_outside_loop() {
    expect_parse_error("void f() { break; }", semantic_containing("outside of a loop"));
}

#[test]
fn test_return_type_checks() {
    expect_parse_error("void f() { return 1; }", semantic_containing("void function"));
    expect_parse_error("float f() { return; }", semantic_containing("must return a value"));
}

#[test]
fn test_prototype_then_definition() {
    let src = r#"
        float helper(float x);
        float main(float x : TEXCOORD0) : SV_Target { return helper(x); }
        float helper(float x) { return x * 2; }
    "#;
    expect_parse(src, |tree| {
        let ids: Vec<_> = tree.functions_named("helper").collect();
        if ids.len() != 1 || !tree.function(ids[0]).is_definition() {
            return Err(format!("prototype and definition should merge, got {:?}", ids));
        }
        Ok(())
    });
    expect_parse_error("float g() { return 1; } float g() { return 2; }", semantic_containing("redefinition"));
}

#[test]
fn test_vector_comparison_and_ternary() {
    expect_parse("float3 f(float3 a, float3 b) { return a < b ? a : b; }", |tree| {
        let ret = returned_expr(tree, "f")?;
        let ExprKind::Conditional { cond, .. } = &ret.kind else {
            return Err("expected conditional".to_string());
        };
        if tree.expr(*cond).ty != Type::Vector(ScalarKind::Bool, 3) {
            return Err(format!("expected bool3 condition, got {:?}", tree.expr(*cond).ty));
        }
        Ok(())
    });
}

#[test]
fn test_comments_and_directives() {
    let src = "#pragma pack_matrix(row_major)\n// a comment\n/* block */ float f() { return 1.0h; }";
    expect_parse(src, |tree| {
        let ret = returned_expr(tree, "f")?;
        if ret.ty != Type::FLOAT {
            return Err(format!("half literal should convert to the float return type, got {:?}", ret.ty));
        }
        Ok(())
    });
}

#[test]
fn test_helpers_for_swizzles() {
    assert_eq!(swizzle_components("wzyx", 4), Ok(vec![3, 2, 1, 0]));
    assert_eq!(swizzle_components("r", 1), Ok(vec![0]));
    assert!(swizzle_components("xyzwx", 4).is_err());
    assert!(swizzle_components("", 4).is_err());
    assert_eq!(matrix_elements("_m00_m11", 2, 2), Some(vec![(0, 0), (1, 1)]));
    assert_eq!(matrix_elements("_44", 4, 4), Some(vec![(3, 3)]));
    assert_eq!(matrix_elements("_m33", 3, 3), None);
    assert_eq!(matrix_elements("_00", 4, 4), None);
}
