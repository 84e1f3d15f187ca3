//! Error reporting for the whole pipeline.
//!
//! Every stage produces a [`CompileError`] carrying the kind of failure and
//! the source line it was detected on. The binary maps the kind onto the
//! process exit code; compilation stops at the first error.

use std::{error::Error, fmt::Display};

/// Classification of a compilation failure. Each kind is bound to exactly one
/// process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid token in the input text.
    Lexical,
    /// Token sequence does not match the grammar.
    Syntactic,
    /// Use of an undefined variable or function.
    UndefinedSymbol,
    /// Wrong count or type of call arguments, or wrong return value type.
    CallMismatch,
    /// Redefinition of a symbol, or reassignment of a constant.
    Redefinition,
    /// Missing or forbidden expression in a return statement.
    MissingExpression,
    /// Incompatible types in an expression or assignment.
    TypeMismatch,
    /// A variable's type is not given and cannot be derived.
    TypeInference,
    /// A variable was declared but never read.
    UnusedVariable,
    /// Semantic errors with no more specific category.
    OtherSemantic,
    /// Internal compiler failure (I/O on the sink, broken invariants).
    Internal,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Lexical => 1,
            ErrorKind::Syntactic => 2,
            ErrorKind::UndefinedSymbol => 3,
            ErrorKind::CallMismatch => 4,
            ErrorKind::Redefinition => 5,
            ErrorKind::MissingExpression => 6,
            ErrorKind::TypeMismatch => 7,
            ErrorKind::TypeInference => 8,
            ErrorKind::UnusedVariable => 9,
            ErrorKind::OtherSemantic => 10,
            ErrorKind::Internal => 99,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<usize>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, line: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: Some(line),
        }
    }

    /// An error that is not tied to any particular source line.
    pub fn global(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "Line {}: {}", line, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl Error for CompileError {}

impl From<std::io::Error> for CompileError {
    fn from(err: std::io::Error) -> Self {
        CompileError::global(
            ErrorKind::Internal,
            format!("failed to write intermediate code: {err}"),
        )
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
