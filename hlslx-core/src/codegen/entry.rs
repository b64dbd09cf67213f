//! Entry-point interface: the stage inputs and outputs an entry function
//! reads and writes, flattened through struct parameters and return values.

use crate::ast::{FunctionId, ParamModifier, SyntaxTree};
use crate::error::Result;
use crate::semantic::{classify, Direction, Role};
use crate::types::Type;
use crate::{bail_semantic_at, Stage};
use log::debug;

/// Where a varying lives relative to the entry function's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Param(usize),
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Varying {
    pub binding: Binding,
    /// Struct fields walked from the parameter or return value.
    pub fields: Vec<String>,
    pub ty: Type,
    pub role: Role,
    /// Semantic as written in the source.
    pub semantic: String,
}

impl Varying {
    /// `root.field.field`
    pub fn access(&self, root: &str) -> String {
        let mut path = root.to_string();
        for field in &self.fields {
            path.push('.');
            path.push_str(field);
        }
        path
    }

    /// Dialect-neutral name for attributes, inter-stage varyings and render
    /// targets. Built-in roles have no generated name.
    pub fn generated_name(&self, stage: Stage, direction: Direction) -> Option<String> {
        match (&self.role, stage, direction) {
            (Role::Generic(sem), Stage::Vertex, Direction::Input) => Some(format!("attr_{}", sem)),
            (Role::Generic(sem), _, _) => Some(format!("var_{}", sem)),
            (Role::Target(n), _, _) => Some(format!("frag_Target{}", n)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryInterface {
    pub function: FunctionId,
    pub stage: Stage,
    pub inputs: Vec<Varying>,
    pub outputs: Vec<Varying>,
    /// Indices of `uniform` parameters.
    pub uniforms: Vec<usize>,
}

impl EntryInterface {
    pub fn build(tree: &SyntaxTree, function: FunctionId, stage: Stage) -> Result<Self> {
        let decl = tree.function(function);
        let mut interface = EntryInterface {
            function,
            stage,
            inputs: Vec::new(),
            outputs: Vec::new(),
            uniforms: Vec::new(),
        };
        let mut builder = Builder { tree, stage, function };

        for (index, param) in decl.params.iter().enumerate() {
            if param.modifier == ParamModifier::Uniform {
                interface.uniforms.push(index);
                continue;
            }
            let binding = Binding::Param(index);
            let what = format!("parameter '{}'", param.name);
            if param.modifier != ParamModifier::Out {
                builder.flatten(
                    &param.ty,
                    param.semantic.as_deref(),
                    binding,
                    Direction::Input,
                    &what,
                    &mut Vec::new(),
                    &mut interface.inputs,
                )?;
            }
            if param.modifier.is_output() {
                builder.flatten(
                    &param.ty,
                    param.semantic.as_deref(),
                    binding,
                    Direction::Output,
                    &what,
                    &mut Vec::new(),
                    &mut interface.outputs,
                )?;
            }
        }

        if !decl.return_type.is_void() {
            builder.flatten(
                &decl.return_type,
                decl.return_semantic.as_deref(),
                Binding::Return,
                Direction::Output,
                "return value",
                &mut Vec::new(),
                &mut interface.outputs,
            )?;
        }

        builder.check_unique(&interface.inputs, "input")?;
        builder.check_unique(&interface.outputs, "output")?;
        debug!(
            "entry '{}': {} inputs, {} outputs, {} uniforms",
            decl.name,
            interface.inputs.len(),
            interface.outputs.len(),
            interface.uniforms.len()
        );
        Ok(interface)
    }

    pub fn generic_inputs(&self) -> impl Iterator<Item = &Varying> {
        self.inputs.iter().filter(|v| matches!(v.role, Role::Generic(_)))
    }
}

struct Builder<'a> {
    tree: &'a SyntaxTree,
    stage: Stage,
    function: FunctionId,
}

impl Builder<'_> {
    #[allow(clippy::too_many_arguments)]
    fn flatten(
        &mut self,
        ty: &Type,
        semantic: Option<&str>,
        binding: Binding,
        direction: Direction,
        what: &str,
        fields: &mut Vec<String>,
        out: &mut Vec<Varying>,
    ) -> Result<()> {
        let entry = self.tree.function(self.function);
        let location = self.tree.location(entry.line);
        match ty {
            Type::Struct(id) => {
                let decl = self.tree.struct_decl(*id);
                for field in &decl.fields {
                    fields.push(field.name.clone());
                    let what = format!("{} member '{}'", what, fields.join("."));
                    self.flatten(&field.ty, field.semantic.as_deref(), binding, direction, &what, fields, out)?;
                    fields.pop();
                }
                Ok(())
            }
            Type::Array(..) => {
                bail_semantic_at!(location, "{} of entry point '{}' cannot be an array", what, entry.name)
            }
            Type::Sampler(..) => {
                bail_semantic_at!(location, "{} of entry point '{}' must be 'uniform'", what, entry.name)
            }
            _ => {
                let Some(semantic) = semantic else {
                    bail_semantic_at!(location, "{} of entry point '{}' has no semantic", what, entry.name);
                };
                let role = classify(semantic, self.stage, direction)
                    .map_err(|err| crate::error::CompilerError::SemanticError(err.message().to_string(), Some(location)))?;
                out.push(Varying {
                    binding,
                    fields: fields.clone(),
                    ty: ty.clone(),
                    role,
                    semantic: semantic.to_string(),
                });
                Ok(())
            }
        }
    }

    fn check_unique(&self, varyings: &[Varying], what: &str) -> Result<()> {
        for (i, varying) in varyings.iter().enumerate() {
            if varyings[..i].iter().any(|other| other.role == varying.role) {
                let entry = self.tree.function(self.function);
                bail_semantic_at!(
                    self.tree.location(entry.line),
                    "semantic '{}' is used by more than one {} of entry point '{}'",
                    varying.semantic,
                    what,
                    entry.name
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use crate::semantic::Semantic;

    fn interface(source: &str, stage: Stage) -> Result<EntryInterface> {
        let tree = parse(source, "t.hlsl").unwrap();
        let entry = tree.find_entry("main").unwrap();
        EntryInterface::build(&tree, entry, stage)
    }

    #[test]
    fn test_struct_parameters_are_flattened() {
        let source = r#"
            struct VSIn { float3 pos : POSITION; float2 uv : TEXCOORD0; };
            struct VSOut { float4 pos : SV_Position; float2 uv : TEXCOORD0; };
            VSOut main(VSIn input, uniform float4x4 mvp) {
                VSOut o;
                o.pos = mul(mvp, float4(input.pos, 1.0));
                o.uv = input.uv;
                return o;
            }
        "#;
        let iface = interface(source, Stage::Vertex).unwrap();
        assert_eq!(iface.inputs.len(), 2);
        assert_eq!(iface.inputs[1].access("input"), "input.uv");
        assert_eq!(
            iface.inputs[1].generated_name(Stage::Vertex, Direction::Input).as_deref(),
            Some("attr_TEXCOORD0")
        );
        assert_eq!(iface.outputs[0].role, Role::Position);
        assert_eq!(iface.outputs[1].role, Role::Generic(Semantic::parse("TEXCOORD0").unwrap()));
        assert_eq!(
            iface.outputs[1].generated_name(Stage::Vertex, Direction::Output).as_deref(),
            Some("var_TEXCOORD0")
        );
        assert_eq!(iface.uniforms, vec![1]);
    }

    #[test]
    fn test_out_parameters_become_outputs() {
        let source = r#"
            void main(float2 uv : TEXCOORD1, out float4 color : COLOR1, inout float depth : DEPTH) {
                color = float4(uv, 0.0, 1.0);
                depth = depth * 0.5;
            }
        "#;
        let iface = interface(source, Stage::Fragment).unwrap();
        assert_eq!(iface.inputs.len(), 2);
        assert_eq!(iface.outputs.len(), 2);
        assert_eq!(iface.outputs[0].role, Role::Target(1));
        assert_eq!(iface.outputs[1].role, Role::Depth);
    }

    #[test]
    fn test_missing_semantic_is_an_error() {
        let err = interface("float4 main(float4 p) : SV_Target { return p; }", Stage::Fragment).unwrap_err();
        assert!(err.message().contains("parameter 'p' of entry point 'main' has no semantic"));
    }

    #[test]
    fn test_duplicate_semantic_is_an_error() {
        let source = "float4 main(float4 a : TEXCOORD0, float4 b : TEXCOORD0) : SV_Target { return a + b; }";
        let err = interface(source, Stage::Fragment).unwrap_err();
        assert!(err.message().contains("more than one input"));
    }

    #[test]
    fn test_invalid_fragment_output() {
        let err = interface("float4 main() : TEXCOORD0 { return 0; }", Stage::Fragment).unwrap_err();
        assert!(err.message().contains("not a valid fragment output"));
        assert!(err.location().is_some());
    }
}
