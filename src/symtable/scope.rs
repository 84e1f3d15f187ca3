//! Stack of variable scopes.
//!
//! One table per lexical block. Resolution searches from the innermost
//! scope outwards; popping a scope enforces that every variable in it was
//! read at least once.

use super::{Symtable, VariableSymbol};
use crate::error::{CompileError, CompileResult, ErrorKind};

#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    frames: Vec<Symtable<VariableSymbol>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self { frames: vec![] }
    }

    pub fn push(&mut self) {
        self.frames.push(Symtable::new());
    }

    /// Pops the innermost scope. Fails when a variable in it was never read.
    pub fn pop(&mut self, line: usize) -> CompileResult<()> {
        let Some(frame) = self.frames.pop() else {
            return Ok(());
        };
        for variable in frame.values() {
            if !variable.used {
                return Err(CompileError::new(
                    ErrorKind::UnusedVariable,
                    line,
                    format!("Variable '{}' was declared but never used", variable.name),
                ));
            }
        }
        Ok(())
    }

    /// Searches from the innermost scope outwards; first hit wins.
    pub fn find(&self, name: &str) -> Option<&VariableSymbol> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut VariableSymbol> {
        self.frames
            .iter_mut()
            .rev()
            .find_map(|frame| frame.get_mut(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Marks a variable as read. Unknown names are ignored; the callers
    /// resolve the symbol first.
    pub fn mark_used(&mut self, name: &str) {
        if let Some(variable) = self.find_mut(name) {
            variable.used = true;
        }
    }

    /// Inserts into the innermost scope. Shadowing rules are enforced by the
    /// parser, which also has the function table at hand.
    pub fn insert(&mut self, symbol: VariableSymbol) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(symbol.name.clone(), symbol);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symtable::DataType;

    fn used_symbol(name: &str) -> VariableSymbol {
        let mut symbol = VariableSymbol::new(name, DataType::Int32, false);
        symbol.used = true;
        symbol
    }

    #[test]
    fn test_resolution_is_innermost_first() {
        let mut scopes = ScopeStack::new();
        scopes.push();
        let mut outer = used_symbol("x");
        outer.ty = DataType::Double64;
        scopes.insert(outer);
        scopes.push();
        scopes.insert(used_symbol("x"));

        assert_eq!(scopes.find("x").unwrap().ty, DataType::Int32);
        scopes.pop(1).unwrap();
        assert_eq!(scopes.find("x").unwrap().ty, DataType::Double64);
    }

    #[test]
    fn test_pop_rejects_unused() {
        let mut scopes = ScopeStack::new();
        scopes.push();
        scopes.insert(VariableSymbol::new("x", DataType::Int32, false));
        let err = scopes.pop(3).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnusedVariable);
    }

    #[test]
    fn test_mark_used() {
        let mut scopes = ScopeStack::new();
        scopes.push();
        scopes.insert(VariableSymbol::new("x", DataType::Int32, false));
        scopes.mark_used("x");
        assert!(scopes.pop(1).is_ok());
    }
}
