//! Resource binding slots.
//!
//! Explicit `register(...)` annotations keep their slot. Everything else
//! receives the lowest free slot of its class, walking the whole tree in
//! declaration order, so the table does not depend on which function is the
//! entry point or on hash iteration order. A sampler array takes one slot
//! per element, as GLSL texture units do.

use crate::ast::{BufferId, FunctionId, GlobalId, Item, ParamModifier, Register, SyntaxTree};
use crate::error::Result;
use crate::types::Type;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// A declaration that occupies a binding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Buffer(BufferId),
    Global(GlobalId),
    /// `uniform` parameter of the entry function.
    EntryParam(usize),
}

/// Constant buffers live in `b` slots, samplers in `s` slots. A texture
/// split from a sampler reuses the sampler's slot number.
pub const BUFFER_CLASS: char = 'b';
pub const SAMPLER_CLASS: char = 's';

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingTable {
    slots: BTreeMap<Resource, u32>,
    used: BTreeMap<char, BTreeSet<u32>>,
}

impl BindingTable {
    pub fn build(tree: &SyntaxTree, entry: FunctionId) -> Result<Self> {
        let mut requests: Vec<Request> = Vec::new();
        for item in &tree.items {
            match *item {
                Item::Buffer(id) => {
                    let decl = tree.buffer(id);
                    requests.push(Request {
                        resource: Resource::Buffer(id),
                        class: BUFFER_CLASS,
                        register: decl.register,
                        width: 1,
                        name: &decl.name,
                    });
                }
                Item::Global(id) => {
                    let decl = tree.global(id);
                    if decl.is_uniform() && decl.ty.base_element().is_sampler() {
                        requests.push(Request {
                            resource: Resource::Global(id),
                            class: SAMPLER_CLASS,
                            register: decl.register,
                            width: slot_width(&decl.ty),
                            name: &decl.name,
                        });
                    }
                }
                Item::Struct(_) | Item::Function(_) => {}
            }
        }
        for (index, param) in tree.function(entry).params.iter().enumerate() {
            if param.modifier == ParamModifier::Uniform && param.ty.is_sampler() {
                requests.push(Request {
                    resource: Resource::EntryParam(index),
                    class: SAMPLER_CLASS,
                    register: None,
                    width: 1,
                    name: &param.name,
                });
            }
        }

        let mut table = BindingTable::default();
        let mut owners: BTreeMap<(char, u32), &str> = BTreeMap::new();

        // Explicit slots first so implicit ones never steal them.
        for request in &requests {
            let Some(register) = request.register.filter(|r| accepts(request.class, r.class)) else {
                continue;
            };
            for slot in register.slot..register.slot + request.width {
                if let Some(owner) = owners.insert((request.class, slot), request.name) {
                    crate::bail_semantic!(
                        "register '{}{}' is bound to both '{}' and '{}'",
                        register.class,
                        slot,
                        owner,
                        request.name
                    );
                }
            }
            table.claim(request.resource, request.class, register.slot, request.width);
        }
        for request in &requests {
            if table.slots.contains_key(&request.resource) {
                continue;
            }
            let slot = table.free_run(request.class, request.width);
            table.claim(request.resource, request.class, slot, request.width);
            debug!("binding '{}' to {}{}", request.name, request.class, slot);
        }
        Ok(table)
    }

    fn claim(&mut self, resource: Resource, class: char, slot: u32, width: u32) {
        self.slots.insert(resource, slot);
        self.used.entry(class).or_default().extend(slot..slot + width);
    }

    pub fn slot(&self, resource: Resource) -> Option<u32> {
        self.slots.get(&resource).copied()
    }

    /// Lowest slot of `class` nobody occupies.
    pub fn free_slot(&self, class: char) -> u32 {
        self.free_run(class, 1)
    }

    /// First slot of the lowest run of `width` unoccupied slots of `class`.
    pub fn free_run(&self, class: char, width: u32) -> u32 {
        let Some(used) = self.used.get(&class) else {
            return 0;
        };
        let mut start = 0;
        for &slot in used.range(0..) {
            if slot >= start + width {
                break;
            }
            if slot >= start {
                start = slot + 1;
            }
        }
        start
    }
}

struct Request<'t> {
    resource: Resource,
    class: char,
    register: Option<Register>,
    width: u32,
    name: &'t str,
}

/// Consecutive slots a resource of type `ty` spans.
fn slot_width(ty: &Type) -> u32 {
    match ty {
        Type::Array(element, len) => slot_width(element) * len.unwrap_or(1).max(1),
        _ => 1,
    }
}

fn accepts(class: char, register: char) -> bool {
    match class {
        SAMPLER_CLASS => register == 's' || register == 't',
        _ => register == class,
    }
}

/// Number of float4 constant registers a value of `ty` occupies under the
/// shader model 3 packing rules.
pub fn register_count(tree: &SyntaxTree, ty: &Type) -> u32 {
    match ty {
        Type::Matrix(_, rows, _) => u32::from(*rows),
        Type::Array(element, len) => register_count(tree, element) * len.unwrap_or(1),
        Type::Struct(id) => tree.struct_decl(*id).fields.iter().map(|f| register_count(tree, &f.ty)).sum(),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn table(source: &str) -> (SyntaxTree, BindingTable) {
        let tree = parse(source, "t.hlsl").unwrap();
        let entry = tree.find_entry("main").unwrap();
        let table = BindingTable::build(&tree, entry).unwrap();
        (tree, table)
    }

    #[test]
    fn test_explicit_slots_are_preserved() {
        let source = r#"
            cbuffer A { float4 a; };
            cbuffer B : register(b0) { float4 b; };
            cbuffer C { float4 c; };
            float4 main() : SV_Target { return a + b + c; }
        "#;
        let (_, table) = table(source);
        assert_eq!(table.slot(Resource::Buffer(BufferId(1))), Some(0));
        assert_eq!(table.slot(Resource::Buffer(BufferId(0))), Some(1));
        assert_eq!(table.slot(Resource::Buffer(BufferId(2))), Some(2));
        assert_eq!(table.free_slot(BUFFER_CLASS), 3);
    }

    #[test]
    fn test_samplers_and_entry_params() {
        let source = r#"
            sampler2D diffuse : register(s1);
            sampler2D normals;
            float4 main(float2 uv : TEXCOORD0, uniform sampler2D extra) : SV_Target {
                return tex2D(diffuse, uv) + tex2D(normals, uv) + tex2D(extra, uv);
            }
        "#;
        let (tree, table) = table(source);
        let diffuse = GlobalId(0);
        let normals = GlobalId(1);
        assert_eq!(tree.global(normals).name, "normals");
        assert_eq!(table.slot(Resource::Global(diffuse)), Some(1));
        assert_eq!(table.slot(Resource::Global(normals)), Some(0));
        assert_eq!(table.slot(Resource::EntryParam(1)), Some(2));
    }

    #[test]
    fn test_sampler_array_spans_consecutive_slots() {
        let source = r#"
            sampler2D layers[2];
            sampler2D extra;
            float4 main(float2 uv : TEXCOORD0) : SV_Target {
                return tex2D(layers[0], uv) + tex2D(layers[1], uv) + tex2D(extra, uv);
            }
        "#;
        let (_, table) = table(source);
        assert_eq!(table.slot(Resource::Global(GlobalId(0))), Some(0));
        assert_eq!(table.slot(Resource::Global(GlobalId(1))), Some(2));
        assert_eq!(table.free_slot(SAMPLER_CLASS), 3);
    }

    #[test]
    fn test_implicit_array_skips_too_small_gap() {
        let source = r#"
            sampler2D first : register(s0);
            sampler2D pinned : register(s2);
            sampler2D shadows[2];
            sampler2D extra;
            float4 main(float2 uv : TEXCOORD0) : SV_Target {
                return tex2D(first, uv) + tex2D(pinned, uv) + tex2D(shadows[1], uv) + tex2D(extra, uv);
            }
        "#;
        let (_, table) = table(source);
        assert_eq!(table.slot(Resource::Global(GlobalId(2))), Some(3));
        assert_eq!(table.slot(Resource::Global(GlobalId(3))), Some(1));
    }

    #[test]
    fn test_explicit_array_overlap_is_reported() {
        let source = r#"
            sampler2D layers[3] : register(s0);
            sampler2D extra : register(s2);
            float4 main(float2 uv : TEXCOORD0) : SV_Target { return tex2D(layers[0], uv) + tex2D(extra, uv); }
        "#;
        let tree = parse(source, "t.hlsl").unwrap();
        let entry = tree.find_entry("main").unwrap();
        let err = BindingTable::build(&tree, entry).unwrap_err();
        assert!(err.message().contains("'s2'"), "{}", err);
    }

    #[test]
    fn test_conflicting_registers() {
        let source = r#"
            cbuffer A : register(b2) { float4 a; };
            cbuffer B : register(b2) { float4 b; };
            float4 main() : SV_Target { return a + b; }
        "#;
        let tree = parse(source, "t.hlsl").unwrap();
        let entry = tree.find_entry("main").unwrap();
        let err = BindingTable::build(&tree, entry).unwrap_err();
        assert!(err.message().contains("'b2'"));
    }

    #[test]
    fn test_register_count() {
        let tree = parse("struct S { float4x4 m; float3 v; }; float4 main() : SV_Target { return 0; }", "t.hlsl").unwrap();
        let s = Type::Struct(tree.find_struct("S").unwrap());
        assert_eq!(register_count(&tree, &s), 5);
        assert_eq!(register_count(&tree, &Type::Array(Box::new(Type::FLOAT), Some(3))), 3);
    }
}
