//! Symbol model and the open-addressed symbol table.

mod scope;

pub use scope::ScopeStack;

use std::fmt::Display;

/// Data types of the source language, plus the internal types that only
/// exist during analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int32,
    Int32Nullable,
    Double64,
    Double64Nullable,
    U8Array,
    U8ArrayNullable,
    /// Result of relational operators; never the type of a variable.
    Boolean,
    /// No type: `void` functions, and variables whose type is not yet known.
    Void,
    /// Polymorphic marker accepted by some built-ins (`write`, `string`).
    Term,
    /// Type of the bare `null` literal.
    Null,
}

impl DataType {
    pub fn is_nullable(self) -> bool {
        matches!(
            self,
            DataType::Int32Nullable
                | DataType::Double64Nullable
                | DataType::U8ArrayNullable
                | DataType::Null
        )
    }

    /// Strips the nullability, `?i32` -> `i32`.
    pub fn denullified(self) -> Self {
        match self {
            DataType::Int32Nullable => DataType::Int32,
            DataType::Double64Nullable => DataType::Double64,
            DataType::U8ArrayNullable => DataType::U8Array,
            other => other,
        }
    }

    /// True for every type a `term` parameter accepts.
    pub fn is_term(self) -> bool {
        matches!(
            self,
            DataType::Int32
                | DataType::Int32Nullable
                | DataType::Double64
                | DataType::Double64Nullable
                | DataType::U8Array
                | DataType::U8ArrayNullable
                | DataType::Term
        )
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DataType::Int32 => "i32",
            DataType::Int32Nullable => "?i32",
            DataType::Double64 => "f64",
            DataType::Double64Nullable => "?f64",
            DataType::U8Array => "[]u8",
            DataType::U8ArrayNullable => "?[]u8",
            DataType::Boolean => "bool",
            DataType::Void => "void",
            DataType::Term => "term",
            DataType::Null => "null",
        })
    }
}

/// `a <- b`: can a value of type `b` be assigned, returned or passed where
/// `a` is expected?
pub fn types_compatible(expected: DataType, got: DataType) -> bool {
    expected == got
        || match (expected, got) {
            (DataType::Int32Nullable, DataType::Int32) => true,
            (DataType::Double64Nullable, DataType::Double64) => true,
            (DataType::U8ArrayNullable, DataType::U8Array) => true,
            (expected, DataType::Null) => expected.is_nullable(),
            (DataType::Term, got) => got.is_term(),
            _ => false,
        }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableSymbol {
    pub name: String,
    pub ty: DataType,
    pub is_const: bool,
    pub nullable: bool,
    /// Assigned at least once.
    pub defined: bool,
    /// Read at least once; checked when the owning scope is popped.
    pub used: bool,
    /// Compile-time value, only for constants initialized from a literal.
    pub value: Option<String>,
}

impl VariableSymbol {
    pub fn new(name: impl Into<String>, ty: DataType, is_const: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            is_const,
            nullable: ty.is_nullable(),
            defined: false,
            used: false,
            value: None,
        }
    }

    /// Type updates keep the nullability flag in sync.
    pub fn set_type(&mut self, ty: DataType) {
        self.ty = ty;
        self.nullable = ty.is_nullable();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSymbol {
    pub name: String,
    pub return_type: DataType,
    pub parameters: Vec<VariableSymbol>,
    /// Set when a well-typed `return` is parsed in the body.
    pub has_return: bool,
    /// Local variable names hoisted by the preloader; the frame declarations
    /// are emitted before the body runs.
    pub locals: Vec<String>,
}

impl FunctionSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            return_type: DataType::Void,
            parameters: vec![],
            has_return: false,
            locals: vec![],
        }
    }

    /// Hoists a local name, once.
    pub fn add_local(&mut self, name: &str) {
        if !self.locals.iter().any(|l| l == name) {
            self.locals.push(name.to_string());
        }
    }
}

const INITIAL_CAPACITY: usize = 64;

/// Open-addressed hash table with linear probing, keyed by symbol name.
///
/// The table grows by doubling at three-quarters load; the hashing
/// discipline is the classic `h = 65599*h + byte`.
#[derive(Debug, Clone)]
pub struct Symtable<T> {
    slots: Vec<Option<(String, T)>>,
    len: usize,
}

fn symbol_hash(name: &str) -> usize {
    let mut hash: u32 = 0;
    for byte in name.bytes() {
        hash = hash.wrapping_mul(65599).wrapping_add(u32::from(byte));
    }
    hash as usize
}

impl<T> Symtable<T> {
    pub fn new() -> Self {
        Self {
            slots: (0..INITIAL_CAPACITY).map(|_| None).collect(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot_of(&self, name: &str) -> Option<usize> {
        let capacity = self.slots.len();
        let mut index = symbol_hash(name) % capacity;
        for _ in 0..capacity {
            match &self.slots[index] {
                Some((occupant, _)) if occupant == name => return Some(index),
                Some(_) => index = (index + 1) % capacity,
                None => return None,
            }
        }
        None
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.slot_of(name)
            .and_then(|i| self.slots[i].as_ref())
            .map(|(_, symbol)| symbol)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        let index = self.slot_of(name)?;
        self.slots[index].as_mut().map(|(_, symbol)| symbol)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slot_of(name).is_some()
    }

    /// Returns false (and leaves the table unchanged) when the name is
    /// already present.
    pub fn insert(&mut self, name: String, symbol: T) -> bool {
        if self.contains(&name) {
            return false;
        }
        if (self.len + 1) * 4 >= self.slots.len() * 3 {
            self.grow();
        }

        let capacity = self.slots.len();
        let mut index = symbol_hash(&name) % capacity;
        while self.slots[index].is_some() {
            index = (index + 1) % capacity;
        }
        self.slots[index] = Some((name, symbol));
        self.len += 1;
        true
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|(_, symbol)| symbol))
    }

    fn grow(&mut self) {
        let next_capacity = self.slots.len() * 2;
        let old = std::mem::replace(
            &mut self.slots,
            (0..next_capacity).map(|_| None).collect(),
        );
        for (name, symbol) in old.into_iter().flatten() {
            let mut index = symbol_hash(&name) % next_capacity;
            while self.slots[index].is_some() {
                index = (index + 1) % next_capacity;
            }
            self.slots[index] = Some((name, symbol));
        }
    }
}

impl<T> Default for Symtable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let mut table = Symtable::new();
        assert!(table.insert("x".to_string(), 1));
        assert!(table.insert("y".to_string(), 2));
        assert_eq!(table.get("x"), Some(&1));
        assert_eq!(table.get("y"), Some(&2));
        assert_eq!(table.get("z"), None);
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut table = Symtable::new();
        assert!(table.insert("x".to_string(), 1));
        assert!(!table.insert("x".to_string(), 2));
        assert_eq!(table.get("x"), Some(&1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_growth_keeps_entries() {
        let mut table = Symtable::new();
        for i in 0..500 {
            assert!(table.insert(format!("name{i}"), i));
        }
        for i in 0..500 {
            assert_eq!(table.get(&format!("name{i}")), Some(&i));
        }
    }

    #[test]
    fn test_get_mut() {
        let mut table = Symtable::new();
        table.insert("f".to_string(), FunctionSymbol::new("f"));
        table.get_mut("f").unwrap().has_return = true;
        assert!(table.get("f").unwrap().has_return);
    }

    #[test]
    fn test_type_compatibility() {
        use DataType::*;
        assert!(types_compatible(Int32, Int32));
        assert!(types_compatible(Int32Nullable, Int32));
        assert!(types_compatible(Int32Nullable, Null));
        assert!(types_compatible(Term, U8Array));
        assert!(types_compatible(Term, Int32Nullable));
        assert!(!types_compatible(Int32, Int32Nullable));
        assert!(!types_compatible(Int32, Null));
        assert!(!types_compatible(Int32, Double64));
        assert!(!types_compatible(Term, Void));
    }
}
