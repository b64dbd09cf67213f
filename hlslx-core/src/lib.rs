pub mod ast;
pub mod codegen;
pub mod error;
pub mod glsl;
pub mod hlsl;
pub mod intrinsics;
pub mod lexer;
pub mod logger;
pub mod metal;
pub mod parser;
pub mod reachability;
pub mod scope;
pub mod semantic;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use ast::SyntaxTree;
pub use error::{CompilerError, Location, Result};
pub use glsl::{GlslGenerator, GlslVersion};
pub use hlsl::HlslGenerator;
pub use logger::{CollectingLogger, LogLogger, Logger};
pub use metal::MetalGenerator;
pub use parser::Parser;

use log::info;

/// Pipeline stage an entry point is translated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
}

/// Output language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Glsl(GlslVersion),
    /// Shader model 4 and later.
    Hlsl,
    /// Shader model 3.
    LegacyHlsl,
    Metal,
}

impl Target {
    pub fn name(self) -> String {
        match self {
            Target::Glsl(version) => version.to_string(),
            Target::Hlsl => "HLSL".to_string(),
            Target::LegacyHlsl => "legacy HLSL".to_string(),
            Target::Metal => "Metal".to_string(),
        }
    }
}

/// Parse and type check `source`, reporting failures through `log`.
pub fn parse(source: &str, file: &str) -> Result<SyntaxTree> {
    Parser::new(&LogLogger, file, source).parse()
}

/// Translate one entry point of `source`, reporting failures through `log`.
pub fn translate(source: &str, file: &str, entry: &str, stage: Stage, target: Target) -> Result<String> {
    Translator::new(&LogLogger).translate(source, file, entry, stage, target)
}

/// Parser and generators sharing one diagnostic sink.
pub struct Translator<'l> {
    logger: &'l dyn Logger,
}

impl<'l> Translator<'l> {
    pub fn new(logger: &'l dyn Logger) -> Self {
        Translator { logger }
    }

    /// Parse and type check without generating code.
    pub fn check_only(&self, source: &str, file: &str) -> Result<SyntaxTree> {
        Parser::new(self.logger, file, source).parse()
    }

    /// Generate `target` source for an already parsed tree.
    pub fn generate(&self, tree: &SyntaxTree, entry: &str, stage: Stage, target: Target) -> Result<String> {
        info!("generating {} {:?} shader for '{}'", target.name(), stage, entry);
        match target {
            Target::Glsl(version) => {
                let mut generator = GlslGenerator::new(self.logger);
                generator.generate(tree, stage, version, entry)?;
                Ok(generator.result().to_string())
            }
            Target::Hlsl | Target::LegacyHlsl => {
                let mut generator = HlslGenerator::new(self.logger);
                generator.generate(tree, stage, entry, target == Target::LegacyHlsl)?;
                Ok(generator.result().to_string())
            }
            Target::Metal => {
                let mut generator = MetalGenerator::new(self.logger);
                generator.generate(tree, stage, entry)?;
                Ok(generator.result().to_string())
            }
        }
    }

    pub fn translate(&self, source: &str, file: &str, entry: &str, stage: Stage, target: Target) -> Result<String> {
        let tree = self.check_only(source, file)?;
        self.generate(&tree, entry, stage, target)
    }
}
