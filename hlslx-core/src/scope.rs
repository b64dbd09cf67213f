//! Lexical scopes for single-pass name binding.

use crate::ast::StorageClass;
use crate::types::Type;
use std::collections::HashMap;

/// What a name in scope refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub ty: Type,
    pub storage: StorageClass,
    pub is_const: bool,
    /// Depth of the declaring scope, 0 for file scope.
    pub depth: usize,
}

/// Nested name bindings. The outermost level is file scope and is never
/// popped; HLSL lets an inner block shadow any outer name.
#[derive(Debug, Clone)]
pub struct ScopeStack<T> {
    levels: Vec<HashMap<String, T>>,
}

impl<T> Default for ScopeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ScopeStack<T> {
    pub fn new() -> Self {
        ScopeStack {
            levels: vec![HashMap::new()],
        }
    }

    /// Enter a function body or block.
    pub fn push_scope(&mut self) {
        self.levels.push(HashMap::new());
    }

    /// Leave the innermost block, returning its bindings. File scope stays.
    pub fn pop_scope(&mut self) -> Option<HashMap<String, T>> {
        if self.levels.len() > 1 {
            self.levels.pop()
        } else {
            None
        }
    }

    pub fn insert(&mut self, name: String, value: T) {
        if let Some(level) = self.levels.last_mut() {
            level.insert(name, value);
        }
    }

    /// Innermost binding of `name`.
    pub fn lookup(&self, name: &str) -> Option<&T> {
        self.levels.iter().rev().find_map(|level| level.get(name))
    }

    /// Whether the innermost block already declares `name`.
    pub fn is_defined_in_current_scope(&self, name: &str) -> bool {
        self.levels.last().is_some_and(|level| level.contains_key(name))
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }
}
