//! Diagnostic reporting contract.
//!
//! The parser and generators never print. Every error they stop on is handed
//! to a [`Logger`] before it is returned, so a host can redirect or batch
//! diagnostics.

use crate::error::CompilerError;
use std::cell::RefCell;

pub trait Logger {
    fn report_error(&self, error: &CompilerError);
}

/// Forwards diagnostics to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLogger;

impl Logger for LogLogger {
    fn report_error(&self, error: &CompilerError) {
        log::error!("{}", error);
    }
}

/// Keeps every reported diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingLogger {
    messages: RefCell<Vec<String>>,
}

impl CollectingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }
}

impl Logger for CollectingLogger {
    fn report_error(&self, error: &CompilerError) {
        self.messages.borrow_mut().push(error.to_string());
    }
}

impl<L: Logger + ?Sized> Logger for &L {
    fn report_error(&self, error: &CompilerError) {
        (**self).report_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Location;

    #[test]
    fn test_collecting_logger_records_in_order() {
        let logger = CollectingLogger::new();
        logger.report_error(&CompilerError::LexicalError(
            "unexpected character '$'".to_string(),
            Location::new("a.hlsl", 1),
        ));
        logger.report_error(&CompilerError::SemanticError("boom".to_string(), None));

        let messages = logger.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("'$'"));
        assert_eq!(messages[1], "semantic error: boom");
    }
}
