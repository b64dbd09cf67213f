//! Reachability analysis over the syntax tree.
//!
//! Starting from the entry function this collects everything a generator has
//! to emit. Functions come back in topological order (callees before callers)
//! so every dialect can emit them without forward declarations.

use crate::ast::{BufferId, Callee, ExprKind, FunctionId, GlobalId, StorageClass, StructId, SyntaxTree};
use crate::error::Result;
use crate::types::Type;
use log::debug;
use std::collections::{BTreeSet, HashSet};

/// Declarations reachable from one entry point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reachable {
    /// Post-order: callees first, the entry function last.
    pub functions: Vec<FunctionId>,
    /// Declaration order, which is also dependency order since a struct can
    /// only name structs declared before it.
    pub structs: Vec<StructId>,
    pub globals: Vec<GlobalId>,
    pub buffers: Vec<BufferId>,
}

impl Reachable {
    pub fn uses_global(&self, id: GlobalId) -> bool {
        self.globals.contains(&id)
    }

    pub fn uses_buffer(&self, id: BufferId) -> bool {
        self.buffers.contains(&id)
    }
}

/// Find every declaration reachable from `entry`.
pub fn reachable(tree: &SyntaxTree, entry: FunctionId) -> Result<Reachable> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    let mut functions = Vec::new();
    dfs_postorder(tree, entry, &mut visited, &mut in_stack, &mut functions)?;

    let mut globals = BTreeSet::new();
    let mut buffers = BTreeSet::new();
    let mut types = Vec::new();

    for &function in &functions {
        let decl = tree.function(function);
        types.push(decl.return_type.clone());
        types.extend(decl.params.iter().map(|p| p.ty.clone()));

        let body = decl.body.as_deref().unwrap_or(&[]);
        tree.walk_stmts(body, &mut |_, stmt| {
            if let crate::ast::StmtKind::Declaration(decls) = &stmt.kind {
                types.extend(decls.iter().map(|d| d.ty.clone()));
            }
        });
        tree.walk_exprs(body, &mut |_, expr| {
            types.push(expr.ty.clone());
            if let ExprKind::Variable { storage, .. } = &expr.kind {
                match storage {
                    StorageClass::Global(id) => {
                        globals.insert(*id);
                    }
                    StorageClass::BufferField(id, _) => {
                        buffers.insert(*id);
                    }
                    StorageClass::Local | StorageClass::Parameter(_) => {}
                }
            }
        });
    }

    // Global initializers can name further globals.
    let mut pending: Vec<GlobalId> = globals.iter().copied().collect();
    while let Some(id) = pending.pop() {
        let global = tree.global(id);
        types.push(global.ty.clone());
        if let Some(init) = global.init {
            tree.walk_expr(init, &mut |_, expr| {
                types.push(expr.ty.clone());
                match &expr.kind {
                    ExprKind::Variable {
                        storage: StorageClass::Global(other),
                        ..
                    } => {
                        if globals.insert(*other) {
                            pending.push(*other);
                        }
                    }
                    ExprKind::Variable {
                        storage: StorageClass::BufferField(buffer, _),
                        ..
                    } => {
                        buffers.insert(*buffer);
                    }
                    _ => {}
                }
            });
        }
    }
    for &id in &buffers {
        types.extend(tree.buffer(id).fields.iter().map(|f| f.ty.clone()));
    }

    let mut structs = BTreeSet::new();
    for ty in &types {
        collect_structs(tree, ty, &mut structs);
    }

    let result = Reachable {
        functions,
        structs: structs.into_iter().collect(),
        globals: globals.into_iter().collect(),
        buffers: buffers.into_iter().collect(),
    };
    debug!(
        "reachable from '{}': {} functions, {} structs, {} globals, {} buffers",
        tree.function(entry).name,
        result.functions.len(),
        result.structs.len(),
        result.globals.len(),
        result.buffers.len()
    );
    Ok(result)
}

fn dfs_postorder(
    tree: &SyntaxTree,
    function: FunctionId,
    visited: &mut HashSet<FunctionId>,
    in_stack: &mut HashSet<FunctionId>,
    order: &mut Vec<FunctionId>,
) -> Result<()> {
    if visited.contains(&function) {
        return Ok(());
    }
    if !in_stack.insert(function) {
        let decl = tree.function(function);
        crate::bail_semantic_at!(tree.location(decl.line), "recursive call to '{}'", decl.name);
    }

    let decl = tree.function(function);
    let Some(body) = decl.body.as_deref() else {
        crate::bail_semantic_at!(
            tree.location(decl.line),
            "function '{}' is declared but never defined",
            decl.name
        );
    };

    let mut callees = Vec::new();
    tree.walk_exprs(body, &mut |_, expr| {
        if let ExprKind::Call {
            callee: Callee::Function(id),
            ..
        } = &expr.kind
        {
            if !callees.contains(id) {
                callees.push(*id);
            }
        }
    });
    for callee in callees {
        dfs_postorder(tree, callee, visited, in_stack, order)?;
    }

    in_stack.remove(&function);
    visited.insert(function);
    order.push(function);
    Ok(())
}

fn collect_structs(tree: &SyntaxTree, ty: &Type, out: &mut BTreeSet<StructId>) {
    if let Type::Struct(id) = ty.base_element() {
        if out.insert(*id) {
            for field in &tree.struct_decl(*id).fields {
                collect_structs(tree, &field.ty, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn names(tree: &SyntaxTree, ids: &[FunctionId]) -> Vec<String> {
        ids.iter().map(|id| tree.function(*id).name.clone()).collect()
    }

    #[test]
    fn test_callees_come_first() {
        let source = r#"
            float leaf(float x) { return x * 2.0; }
            float middle(float x) { return leaf(x) + leaf(x); }
            float unused(float x) { return x; }
            float4 main(float4 p : POSITION) : SV_Position { return p * middle(1.0); }
        "#;
        let tree = parse(source, "t.hlsl").unwrap();
        let entry = tree.find_entry("main").unwrap();
        let reach = reachable(&tree, entry).unwrap();
        assert_eq!(names(&tree, &reach.functions), vec!["leaf", "middle", "main"]);
    }

    #[test]
    fn test_collects_used_declarations_only() {
        let source = r#"
            struct Light { float3 dir; };
            struct Unused { float a; };
            struct Material { Light light; float4 tint; };
            cbuffer Frame : register(b0) { float4 ambient; };
            cbuffer Other { float4 ignored; };
            static const float scale = 2.0;
            static const float twice = scale * 2.0;
            float4 unusedColor;
            float4 shade(Material m) { return m.tint * twice + ambient; }
            float4 main() : SV_Target { Material m = (Material)0; return shade(m); }
        "#;
        let tree = parse(source, "t.hlsl").unwrap();
        let entry = tree.find_entry("main").unwrap();
        let reach = reachable(&tree, entry).unwrap();

        let structs: Vec<&str> = reach.structs.iter().map(|id| tree.struct_decl(*id).name.as_str()).collect();
        assert_eq!(structs, vec!["Light", "Material"]);

        let globals: Vec<&str> = reach.globals.iter().map(|id| tree.global(*id).name.as_str()).collect();
        assert_eq!(globals, vec!["scale", "twice"]);

        assert_eq!(reach.buffers.len(), 1);
        assert_eq!(tree.buffer(reach.buffers[0]).name, "Frame");
    }

    #[test]
    fn test_undefined_prototype_is_an_error() {
        let source = r#"
            float helper(float x);
            float4 main() : SV_Target { return helper(1.0); }
        "#;
        let tree = parse(source, "t.hlsl").unwrap();
        let entry = tree.find_entry("main").unwrap();
        let err = reachable(&tree, entry).unwrap_err();
        assert!(err.message().contains("never defined"));
    }
}
