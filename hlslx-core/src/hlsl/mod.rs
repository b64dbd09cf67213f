//! HLSL code generation backend.
//!
//! Modern output targets shader model 4 and later: samplers are split into
//! a texture and a `SamplerState`, and system values use `SV_` semantics.
//! Legacy output targets shader model 3: combined samplers, `tex2D`, and
//! constant buffers flattened into `c` registers.

pub mod generator;

pub use generator::HlslGenerator;

use crate::bail_semantic;
use crate::error::Result;
use crate::semantic::Role;

/// Semantic written for an entry varying.
pub fn semantic_name(role: &Role, legacy: bool) -> Result<String> {
    let name = match role {
        Role::Generic(sem) => sem.to_string(),
        Role::Position if legacy => "POSITION".to_string(),
        Role::FragCoord if legacy => "VPOS".to_string(),
        Role::Position | Role::FragCoord => "SV_Position".to_string(),
        Role::PointSize => "PSIZE".to_string(),
        Role::FrontFacing if legacy => "VFACE".to_string(),
        Role::FrontFacing => "SV_IsFrontFace".to_string(),
        Role::Target(n) if legacy => format!("COLOR{}", n),
        Role::Target(n) => format!("SV_Target{}", n),
        Role::Depth if legacy => "DEPTH".to_string(),
        Role::Depth => "SV_Depth".to_string(),
        Role::VertexId if legacy => bail_semantic!("'SV_VertexID' is not supported by legacy HLSL"),
        Role::VertexId => "SV_VertexID".to_string(),
        Role::InstanceId if legacy => bail_semantic!("'SV_InstanceID' is not supported by legacy HLSL"),
        Role::InstanceId => "SV_InstanceID".to_string(),
    };
    Ok(name)
}
