use std::fmt;
use thiserror::Error;

/// Position of a diagnostic in the translated source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Location {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.file, self.line)
    }
}

fn location_prefix(location: &Option<Location>) -> String {
    match location {
        Some(loc) => format!("{}: ", loc),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompilerError {
    #[error("{1}: lexical error: {0}")]
    LexicalError(String, Location),

    #[error("{1}: syntax error: {0}")]
    SyntaxError(String, Location),

    #[error("{}semantic error: {}", location_prefix(.1), .0)]
    SemanticError(String, Option<Location>),
}

impl CompilerError {
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::LexicalError(_, loc) | Self::SyntaxError(_, loc) => Some(loc),
            Self::SemanticError(_, loc) => loc.as_ref(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::LexicalError(msg, _) | Self::SyntaxError(msg, _) | Self::SemanticError(msg, _) => msg,
        }
    }

    pub fn is_lexical(&self) -> bool {
        matches!(self, Self::LexicalError(..))
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::SyntaxError(..))
    }

    pub fn is_semantic(&self) -> bool {
        matches!(self, Self::SemanticError(..))
    }
}

pub type Result<T> = std::result::Result<T, CompilerError>;

// Bail macros without location

#[macro_export]
macro_rules! bail_semantic {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::SemanticError(format!($($arg)*), None))
    };
}

// Bail macros with location

#[macro_export]
macro_rules! bail_lex_at {
    ($loc:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::LexicalError(format!($($arg)*), $loc))
    };
}

#[macro_export]
macro_rules! bail_syntax_at {
    ($loc:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::SyntaxError(format!($($arg)*), $loc))
    };
}

#[macro_export]
macro_rules! bail_semantic_at {
    ($loc:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::SemanticError(format!($($arg)*), Some($loc)))
    };
}
