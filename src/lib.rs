//! Compiler for the IFJ24 language.
//!
//! The pipeline is strictly sequential: the lexer materializes the whole
//! token stream, a preloading pass registers every function signature so
//! call sites may precede definitions, and a single statement-parsing pass
//! performs syntactic and semantic analysis while emitting IFJcode24
//! intermediate code directly. There is no AST and no recovery: the first
//! error terminates compilation with a well-defined exit code.

pub mod codegen;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod symtable;

pub use error::{CompileError, CompileResult, ErrorKind};

use std::io::Write;

use codegen::Emitter;
use lexer::{Lexer, TokenStream};
use parser::Parser;

/// Compiles a whole program, writing the intermediate code to `out`.
///
/// On failure, whatever was emitted before the offending construct has
/// already been flushed; callers should discard it.
pub fn compile(source: &str, out: impl Write) -> CompileResult<()> {
    let tokens = Lexer::new(source).lex()?;
    Parser::new(TokenStream::new(tokens), Emitter::new(out)).run()
}

/// Convenience wrapper collecting the emitted code into a string.
pub fn compile_to_string(source: &str) -> CompileResult<String> {
    let mut out = Vec::new();
    compile(source, &mut out)?;
    String::from_utf8(out)
        .map_err(|_| CompileError::global(ErrorKind::Internal, "emitted code is not valid UTF-8"))
}
