//! GLSL code generation backend.
//!
//! Desktop GLSL 1.10 through 4.50 and GLSL ES 1.00 / 3.00. Features that
//! differ between versions are gated on [`GlslVersion`].

pub mod generator;

pub use generator::GlslGenerator;

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlslVersion {
    V110,
    V140,
    V150,
    V330,
    V450,
    Es100,
    Es300,
}

impl GlslVersion {
    pub const ALL: &'static [GlslVersion] = &[
        GlslVersion::V110,
        GlslVersion::V140,
        GlslVersion::V150,
        GlslVersion::V330,
        GlslVersion::V450,
        GlslVersion::Es100,
        GlslVersion::Es300,
    ];

    /// The `#version` line.
    pub fn directive(self) -> &'static str {
        match self {
            GlslVersion::V110 => "#version 110",
            GlslVersion::V140 => "#version 140",
            GlslVersion::V150 => "#version 150",
            GlslVersion::V330 => "#version 330",
            GlslVersion::V450 => "#version 450",
            GlslVersion::Es100 => "#version 100",
            GlslVersion::Es300 => "#version 300 es",
        }
    }

    pub fn is_es(self) -> bool {
        matches!(self, GlslVersion::Es100 | GlslVersion::Es300)
    }

    /// `attribute`/`varying`, `gl_FragColor`, `texture2D`, no unsigned or
    /// bitwise integers.
    pub fn is_legacy(self) -> bool {
        matches!(self, GlslVersion::V110 | GlslVersion::Es100)
    }

    pub fn has_uniform_blocks(self) -> bool {
        !self.is_legacy()
    }

    pub fn has_layout_locations(self) -> bool {
        matches!(self, GlslVersion::V330 | GlslVersion::V450 | GlslVersion::Es300)
    }

    pub fn has_layout_bindings(self) -> bool {
        self == GlslVersion::V450
    }

    pub fn has_instance_id(self) -> bool {
        !self.is_legacy()
    }

    pub fn has_determinant(self) -> bool {
        matches!(
            self,
            GlslVersion::V150 | GlslVersion::V330 | GlslVersion::V450 | GlslVersion::Es300
        )
    }

    pub fn has_3d_textures(self) -> bool {
        self != GlslVersion::Es100
    }
}

impl fmt::Display for GlslVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GlslVersion::V110 => "GLSL 1.10",
            GlslVersion::V140 => "GLSL 1.40",
            GlslVersion::V150 => "GLSL 1.50",
            GlslVersion::V330 => "GLSL 3.30",
            GlslVersion::V450 => "GLSL 4.50",
            GlslVersion::Es100 => "GLSL ES 1.00",
            GlslVersion::Es300 => "GLSL ES 3.00",
        };
        f.write_str(label)
    }
}

impl FromStr for GlslVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "110" => Ok(GlslVersion::V110),
            "140" => Ok(GlslVersion::V140),
            "150" => Ok(GlslVersion::V150),
            "330" => Ok(GlslVersion::V330),
            "450" => Ok(GlslVersion::V450),
            "100es" | "100" => Ok(GlslVersion::Es100),
            "300es" => Ok(GlslVersion::Es300),
            _ => Err(format!("unknown GLSL version '{}'", s)),
        }
    }
}
