//! Shader semantic strings and the fixed-function roles they map to.

use crate::error::Result;
use crate::Stage;
use std::fmt;

/// A semantic split into its base name and index: `TEXCOORD3` is
/// `("TEXCOORD", 3)`, `COLOR` is `("COLOR", 0)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Semantic {
    pub base: String,
    pub index: u32,
}

impl Semantic {
    pub fn parse(text: &str) -> Result<Semantic> {
        let digits = text.len() - text.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let (base, index) = text.split_at(text.len() - digits);
        let index = match index {
            "" => 0,
            digits => match digits.parse() {
                Ok(index) => index,
                Err(_) => crate::bail_semantic!("semantic index in '{}' is out of range", text),
            },
        };
        Ok(Semantic {
            base: base.to_ascii_uppercase(),
            index,
        })
    }

    fn is(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.base == *n)
    }
}

impl fmt::Display for Semantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

/// Fixed-function role of an entry-point input or output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// Vertex attribute or inter-stage varying carried under its semantic.
    Generic(Semantic),
    VertexId,
    InstanceId,
    /// Clip-space position written by the vertex stage.
    Position,
    PointSize,
    /// Window-space position read by the fragment stage.
    FragCoord,
    FrontFacing,
    Target(u32),
    Depth,
}

impl Role {
    pub fn is_builtin(&self) -> bool {
        !matches!(self, Role::Generic(_) | Role::Target(_))
    }
}

/// Classify a semantic for the given stage and direction.
pub fn classify(text: &str, stage: Stage, direction: Direction) -> Result<Role> {
    let sem = Semantic::parse(text)?;
    let role = match (stage, direction) {
        (Stage::Vertex, Direction::Input) => {
            if sem.is(&["SV_VERTEXID"]) {
                Role::VertexId
            } else if sem.is(&["SV_INSTANCEID"]) {
                Role::InstanceId
            } else {
                Role::Generic(sem)
            }
        }
        (Stage::Vertex, Direction::Output) => {
            if sem.is(&["SV_POSITION", "POSITION"]) && sem.index == 0 {
                Role::Position
            } else if sem.is(&["PSIZE"]) {
                Role::PointSize
            } else {
                Role::Generic(sem)
            }
        }
        (Stage::Fragment, Direction::Input) => {
            if sem.is(&["SV_POSITION", "VPOS"]) {
                Role::FragCoord
            } else if sem.is(&["SV_ISFRONTFACE", "VFACE"]) {
                Role::FrontFacing
            } else {
                Role::Generic(sem)
            }
        }
        (Stage::Fragment, Direction::Output) => {
            if sem.is(&["SV_TARGET", "COLOR"]) {
                Role::Target(sem.index)
            } else if sem.is(&["SV_DEPTH", "DEPTH"]) {
                Role::Depth
            } else {
                crate::bail_semantic!("semantic '{}' is not a valid fragment output", text)
            }
        }
    };
    Ok(role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_index() {
        assert_eq!(
            Semantic::parse("TEXCOORD3").unwrap(),
            Semantic {
                base: "TEXCOORD".to_string(),
                index: 3
            }
        );
        assert_eq!(Semantic::parse("color").unwrap().to_string(), "COLOR0");
        assert_eq!(Semantic::parse("SV_Target1").unwrap().base, "SV_TARGET");
    }

    #[test]
    fn test_vertex_roles() {
        assert_eq!(classify("POSITION", Stage::Vertex, Direction::Input).unwrap(),
            Role::Generic(Semantic::parse("POSITION0").unwrap()));
        assert_eq!(classify("SV_VertexID", Stage::Vertex, Direction::Input).unwrap(), Role::VertexId);
        assert_eq!(classify("SV_Position", Stage::Vertex, Direction::Output).unwrap(), Role::Position);
        assert_eq!(classify("POSITION", Stage::Vertex, Direction::Output).unwrap(), Role::Position);
        assert!(matches!(
            classify("TEXCOORD1", Stage::Vertex, Direction::Output).unwrap(),
            Role::Generic(_)
        ));
    }

    #[test]
    fn test_fragment_roles() {
        assert_eq!(classify("VPOS", Stage::Fragment, Direction::Input).unwrap(), Role::FragCoord);
        assert_eq!(classify("VFACE", Stage::Fragment, Direction::Input).unwrap(), Role::FrontFacing);
        assert_eq!(classify("SV_Target2", Stage::Fragment, Direction::Output).unwrap(), Role::Target(2));
        assert_eq!(classify("COLOR", Stage::Fragment, Direction::Output).unwrap(), Role::Target(0));
        assert_eq!(classify("SV_Depth", Stage::Fragment, Direction::Output).unwrap(), Role::Depth);
        assert!(classify("TEXCOORD0", Stage::Fragment, Direction::Output).is_err());
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let err = Semantic::parse("TEXCOORD99999999999").unwrap_err();
        assert!(err.is_semantic());
        assert!(err.message().contains("TEXCOORD99999999999"));
        assert!(classify("TEXCOORD99999999999", Stage::Vertex, Direction::Input).is_err());
        assert_eq!(Semantic::parse("TEXCOORD4294967295").unwrap().index, u32::MAX);
    }
}
