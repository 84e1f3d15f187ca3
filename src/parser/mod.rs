//! The main parser: interleaved syntactic and semantic analysis with direct
//! code emission.
//!
//! There is no AST. The parser walks the token stream twice: the preloader
//! pass registers every function signature so call sites may precede
//! definitions, then the statement loop in this module re-walks the stream,
//! checks semantics against the scope stack and the global function table,
//! and emits instructions as it goes.

mod builtins;
mod expr;
mod preload;

pub use builtins::{Builtin, BUILTINS};

use std::io::Write;

use log::debug;

use crate::codegen::{Emitter, Instruction, Operand};
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::lexer::{Keyword, Token, TokenKind, TokenStream};
use crate::symtable::{
    types_compatible, DataType, FunctionSymbol, ScopeStack, Symtable, VariableSymbol,
};

pub struct Parser<W: Write> {
    stream: TokenStream,
    scopes: ScopeStack,
    functions: Symtable<FunctionSymbol>,
    emitter: Emitter<W>,
    current_function: Option<String>,
    line: usize,
    has_main: bool,
}

impl<W: Write> Parser<W> {
    pub fn new(stream: TokenStream, emitter: Emitter<W>) -> Self {
        let mut parser = Self {
            stream,
            scopes: ScopeStack::new(),
            functions: Symtable::new(),
            emitter,
            current_function: None,
            line: 1,
            has_main: false,
        };
        parser.scopes.push();
        parser.insert_builtins();
        parser
    }

    /// Drives the whole compilation: preload, preamble, header, program.
    pub fn run(&mut self) -> CompileResult<()> {
        self.preload()?;
        self.current_function = None;

        self.emitter.preamble()?;
        self.header()?;

        if !self.has_main {
            return Err(CompileError::global(
                ErrorKind::UndefinedSymbol,
                "Main function not found",
            ));
        }

        self.program_body()
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn next_token(&mut self) -> Token {
        let token = self.stream.next();
        self.line = token.line;
        token
    }

    fn err(&self, kind: ErrorKind, message: impl Into<String>) -> CompileError {
        CompileError::new(kind, self.line, message)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> CompileResult<Token> {
        let token = self.next_token();
        if token.kind != kind {
            return Err(self.err(ErrorKind::Syntactic, format!("Expected '{what}'")));
        }
        Ok(token)
    }

    fn expect_keyword(&mut self, keyword: Keyword, what: &str) -> CompileResult<Token> {
        let token = self.next_token();
        if token.keyword != Some(keyword) {
            return Err(self.err(ErrorKind::Syntactic, format!("Expected '{what}' keyword")));
        }
        Ok(token)
    }

    /// Declared type after a `:`; also used for parameter and return types.
    fn data_type_from_token(token: &Token) -> Option<DataType> {
        let nullable = token.is_nullable_type();
        match token.keyword? {
            Keyword::I32 => Some(if nullable {
                DataType::Int32Nullable
            } else {
                DataType::Int32
            }),
            Keyword::F64 => Some(if nullable {
                DataType::Double64Nullable
            } else {
                DataType::Double64
            }),
            Keyword::U8 => Some(if nullable {
                DataType::U8ArrayNullable
            } else {
                DataType::U8Array
            }),
            Keyword::Void => Some(DataType::Void),
            _ => None,
        }
    }

    /// Inserts into the innermost scope; a name colliding with any visible
    /// variable or any function is a redefinition.
    fn declare_variable(&mut self, symbol: VariableSymbol) -> CompileResult<()> {
        if self.scopes.contains(&symbol.name) || self.functions.contains(&symbol.name) {
            return Err(self.err(
                ErrorKind::Redefinition,
                format!("Variable '{}' already declared", symbol.name),
            ));
        }
        self.scopes.insert(symbol);
        Ok(())
    }

    fn variable(&self, name: &str) -> CompileResult<VariableSymbol> {
        self.scopes.find(name).cloned().ok_or_else(|| {
            CompileError::new(
                ErrorKind::Internal,
                self.line,
                format!("lost track of variable '{name}'"),
            )
        })
    }

    // ------------------------------------------------------------------
    // Program structure
    // ------------------------------------------------------------------

    /// The mandatory prelude: `const ifj = @import("ifj24.zig");`
    fn header(&mut self) -> CompileResult<()> {
        self.expect_keyword(Keyword::Const, "const")?;
        let name = self.expect(TokenKind::Identifier, "ifj")?;
        if name.lexeme != "ifj" {
            return Err(self.err(ErrorKind::Syntactic, "Expected 'ifj'"));
        }
        self.expect(TokenKind::Assign, "=")?;
        self.expect(TokenKind::Import, "@import")?;
        self.expect(TokenKind::LeftParen, "(")?;
        let import = self.expect(TokenKind::StringLit, "ifj24.zig")?;
        if import.lexeme != "ifj24.zig" {
            return Err(self.err(ErrorKind::Syntactic, "Expected 'ifj24.zig'"));
        }
        self.expect(TokenKind::RightParen, ")")?;
        self.expect(TokenKind::Semicolon, ";")?;
        Ok(())
    }

    /// The statement loop. Each call parses one block: statements up to the
    /// closing brace (or EOF at the top level).
    fn program_body(&mut self) -> CompileResult<()> {
        loop {
            let token = self.next_token();

            // Code cannot live outside of a function.
            if self.current_function.is_none()
                && token.kind != TokenKind::Eof
                && token.keyword != Some(Keyword::Pub)
            {
                return Err(self.err(ErrorKind::Syntactic, "Expected 'pub' keyword"));
            }

            match token.kind {
                TokenKind::Keyword => match token.keyword {
                    Some(Keyword::Pub) => self.function_definition()?,
                    Some(Keyword::If) => self.if_else()?,
                    Some(Keyword::While) => self.while_loop()?,
                    Some(Keyword::Const) => self.declaration(true)?,
                    Some(Keyword::Var) => self.declaration(false)?,
                    Some(Keyword::Return) => self.function_return()?,
                    _ => {
                        return Err(self.err(
                            ErrorKind::Syntactic,
                            format!("Unexpected token \"{}\"", token.lexeme),
                        ));
                    }
                },

                TokenKind::RightBrace => {
                    let line = self.line;
                    self.scopes.pop(line)?;
                    return Ok(());
                }

                TokenKind::Identifier => {
                    if token.lexeme == "ifj" {
                        let builtin = self.builtin_lookup()?;
                        self.builtin_call(&builtin, None)?;
                    } else if self.assignment_target(&token)? {
                        self.assignment(Some(token.lexeme.as_str()))?;
                    } else if self.stream.peek().kind == TokenKind::LeftParen {
                        self.call_statement(&token.lexeme)?;
                    } else if self.scopes.find(&token.lexeme).is_none() {
                        return Err(self.err(
                            ErrorKind::UndefinedSymbol,
                            format!("Undefined variable \"{}\"", token.lexeme),
                        ));
                    }
                }

                TokenKind::Underscore => {
                    self.expect(TokenKind::Assign, "=")?;
                    self.assignment(None)?;
                }

                TokenKind::Eof => {
                    if self.current_function.is_some() {
                        return Err(self.err(ErrorKind::Syntactic, "Unexpected end of file"));
                    }
                    return Ok(());
                }

                _ => {
                    return Err(self.err(
                        ErrorKind::Syntactic,
                        format!("Unexpected token \"{}\"", token.lexeme),
                    ));
                }
            }
        }
    }

    /// Is this identifier statement an assignment (`x = ...`)? Only said for
    /// known variables; the `=` is then mandatory and gets consumed.
    fn assignment_target(&mut self, token: &Token) -> CompileResult<bool> {
        if self.functions.contains(&token.lexeme) || self.scopes.find(&token.lexeme).is_none() {
            return Ok(false);
        }
        self.expect(TokenKind::Assign, "=")?;
        Ok(true)
    }

    /// Reopens a function whose symbol the preloader created: emits the
    /// label, the frame setup, the hoisted local definitions and the
    /// parameter bindings, then parses the body.
    fn function_definition(&mut self) -> CompileResult<()> {
        self.expect_keyword(Keyword::Fn, "fn")?;
        let name = self.expect(TokenKind::Identifier, "identifier")?.lexeme;
        let func = self.functions.get(&name).cloned().ok_or_else(|| {
            self.err(
                ErrorKind::Internal,
                format!("function '{name}' missing from the preload table"),
            )
        })?;
        debug!("compiling function '{name}'");

        self.emitter.emit(Instruction::Label(name.clone()))?;
        if name == "main" {
            self.emitter.emit(Instruction::CreateFrame)?;
        }
        self.emitter.emit(Instruction::PushFrame)?;

        for local in &func.locals {
            self.emitter
                .emit(Instruction::DefVar(Operand::local(local)))?;
        }

        // The signature was validated by the preloader; skip to the body.
        loop {
            let token = self.next_token();
            if token.kind == TokenKind::LeftBrace {
                break;
            }
            if token.kind == TokenKind::Eof {
                return Err(self.err(ErrorKind::Syntactic, "Unexpected end of file"));
            }
        }

        self.scopes.push();

        for (order, parameter) in func.parameters.iter().enumerate() {
            self.emitter
                .emit(Instruction::DefVar(Operand::local(&parameter.name)))?;
            self.emitter.emit(Instruction::Move(
                Operand::local(&parameter.name),
                Operand::local(format!("PARAM{order}")),
            ))?;

            // Parameters are immutable once bound.
            let mut symbol = parameter.clone();
            symbol.is_const = true;
            symbol.defined = true;
            self.declare_variable(symbol)?;
        }

        self.current_function = Some(name.clone());
        self.program_body()?;

        if name == "main" {
            self.emitter
                .emit(Instruction::Exit(Operand::Int("0".to_string())))?;
        } else if func.return_type == DataType::Void {
            self.emitter.emit(Instruction::PopFrame)?;
            self.emitter.emit(Instruction::Return)?;
        } else {
            let has_return = self
                .functions
                .get(&name)
                .map(|f| f.has_return)
                .unwrap_or(false);
            if !has_return {
                return Err(self.err(
                    ErrorKind::MissingExpression,
                    format!("Missing return statement in function \"{name}\""),
                ));
            }
        }

        self.current_function = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Declarations and assignment
    // ------------------------------------------------------------------

    /// `const`/`var NAME [: TYPE] = ...;`
    fn declaration(&mut self, is_const: bool) -> CompileResult<()> {
        let name = self.expect(TokenKind::Identifier, "identifier")?.lexeme;
        self.declare_variable(VariableSymbol::new(name.clone(), DataType::Void, is_const))?;

        let token = self.next_token();
        match token.kind {
            TokenKind::Colon => {
                let type_token = self.next_token();
                let ty = Self::data_type_from_token(&type_token)
                    .filter(|ty| *ty != DataType::Void)
                    .ok_or_else(|| self.err(ErrorKind::Syntactic, "Expected data type"))?;
                if let Some(symbol) = self.scopes.find_mut(&name) {
                    symbol.set_type(ty);
                }
                self.expect(TokenKind::Assign, "=")?;
            }
            TokenKind::Assign => {}
            _ => return Err(self.err(ErrorKind::Syntactic, "Expected '=' or ':'")),
        }

        if is_const && self.const_value_assignment(&name)? {
            return Ok(());
        }

        self.assignment(Some(name.as_str()))
    }

    /// `const NAME = LITERAL;`: remembers the literal as the compile-time
    /// value, derives the type when none was declared and emits the move.
    /// Returns false when the initializer is not such a literal.
    fn const_value_assignment(&mut self, name: &str) -> CompileResult<bool> {
        if self.stream.peek_at(1).kind != TokenKind::Semicolon {
            return Ok(false);
        }
        let value = self.stream.peek().clone();
        let var = self.variable(name)?;

        let (ty, operand) = match value.kind {
            TokenKind::Integer => match var.ty {
                DataType::Int32 | DataType::Int32Nullable => {
                    (var.ty, Operand::Int(value.lexeme.clone()))
                }
                DataType::Void => (DataType::Int32, Operand::Int(value.lexeme.clone())),
                // An integer literal still initializes a declared float
                // constant; it widens at emission.
                DataType::Double64 | DataType::Double64Nullable => (
                    var.ty,
                    Operand::Float(value.lexeme.parse().unwrap_or(0.0)),
                ),
                _ => return Ok(false),
            },
            TokenKind::Float => match var.ty {
                DataType::Double64 | DataType::Double64Nullable => (
                    var.ty,
                    Operand::Float(value.lexeme.parse().unwrap_or(0.0)),
                ),
                DataType::Void => (
                    DataType::Double64,
                    Operand::Float(value.lexeme.parse().unwrap_or(0.0)),
                ),
                _ => return Ok(false),
            },
            TokenKind::Keyword if value.is_keyword(Keyword::Null) && var.nullable => {
                (var.ty, Operand::Nil)
            }
            _ => return Ok(false),
        };

        self.stream.advance(2);
        if let Some(symbol) = self.scopes.find_mut(name) {
            symbol.set_type(ty);
            symbol.value = Some(value.lexeme);
            symbol.defined = true;
        }
        self.emitter
            .emit(Instruction::Move(Operand::local(name), operand))?;
        Ok(true)
    }

    /// Parses the right-hand side of an assignment. `target` is `None` for
    /// the `_ = ...` discard form.
    fn assignment(&mut self, target: Option<&str>) -> CompileResult<()> {
        if let Some(name) = target {
            let var = self.variable(name)?;
            if var.is_const && var.defined {
                return Err(self.err(
                    ErrorKind::Redefinition,
                    format!("Reassignment of constant variable \"{name}\""),
                ));
            }
            if var.defined {
                self.scopes.mark_used(name);
            }
        }

        // User function call on the right-hand side.
        if self.stream.peek().kind == TokenKind::Identifier
            && self.stream.peek_at(1).kind == TokenKind::LeftParen
            && self.stream.peek().lexeme != "ifj"
        {
            let name = self.next_token().lexeme;
            let func = self.functions.get(&name).cloned().ok_or_else(|| {
                self.err(
                    ErrorKind::UndefinedSymbol,
                    format!("Undefined function \"{name}\""),
                )
            })?;
            self.function_to_variable(target, &func)?;
            self.expect(TokenKind::Semicolon, ";")?;
            return Ok(());
        }

        let token = self.next_token();

        // Built-in call on the right-hand side.
        if token.kind == TokenKind::Identifier && token.lexeme == "ifj" {
            let builtin = self.builtin_lookup()?;
            return self.builtin_call(&builtin, target);
        }

        // String literals exist only as built-in arguments.
        if token.kind == TokenKind::StringLit {
            let typed = target
                .and_then(|name| self.scopes.find(name))
                .map(|var| var.ty != DataType::Void)
                .unwrap_or(false);
            return Err(if typed {
                self.err(
                    ErrorKind::TypeMismatch,
                    "Assigning string literal to variable",
                )
            } else {
                self.err(
                    ErrorKind::TypeInference,
                    "Can't derive a type from a string literal",
                )
            });
        }

        // Bare null needs an already-known nullable type.
        if token.is_keyword(Keyword::Null) && self.stream.peek().kind == TokenKind::Semicolon {
            self.next_token();
            match target {
                None => {
                    self.emitter.emit(Instruction::Pushs(Operand::Nil))?;
                    self.emitter.emit(Instruction::Clears)?;
                }
                Some(name) => {
                    let var = self.variable(name)?;
                    if var.ty == DataType::Void {
                        return Err(self.err(
                            ErrorKind::TypeInference,
                            format!("Assigning NULL to variable \"{name}\" with no type"),
                        ));
                    }
                    if !var.nullable {
                        return Err(self.err(
                            ErrorKind::TypeMismatch,
                            format!("Assigning NULL to non-nullable variable \"{name}\""),
                        ));
                    }
                    self.emitter
                        .emit(Instruction::Move(Operand::local(name), Operand::Nil))?;
                    if let Some(symbol) = self.scopes.find_mut(name) {
                        symbol.defined = true;
                    }
                }
            }
            return Ok(());
        }
        self.stream.rewind(1);

        // Single-token fast path: LITERAL-or-ID followed by a semicolon.
        let operand = self.stream.peek().clone();
        let follower = self.stream.peek_at(1).clone();
        if follower.kind == TokenKind::Semicolon {
            match operand.kind {
                TokenKind::Integer | TokenKind::Float => {
                    self.stream.advance(2);
                    let Some(name) = target else { return Ok(()) };
                    let var = self.variable(name)?;
                    let (got, src) = if operand.kind == TokenKind::Integer {
                        (DataType::Int32, Operand::Int(operand.lexeme.clone()))
                    } else {
                        (
                            DataType::Double64,
                            Operand::Float(operand.lexeme.parse().unwrap_or(0.0)),
                        )
                    };
                    if !types_compatible(var.ty, got) && var.ty != DataType::Void {
                        return Err(self.err(
                            ErrorKind::TypeMismatch,
                            format!("Assigning invalid type to variable \"{name}\""),
                        ));
                    }
                    self.emitter
                        .emit(Instruction::Move(Operand::local(name), src))?;
                    if let Some(symbol) = self.scopes.find_mut(name) {
                        if symbol.ty == DataType::Void {
                            symbol.set_type(got);
                        }
                        symbol.defined = true;
                    }
                    return Ok(());
                }
                TokenKind::Identifier => {
                    self.stream.advance(2);
                    let source = self.scopes.find(&operand.lexeme).cloned().ok_or_else(|| {
                        self.err(
                            ErrorKind::UndefinedSymbol,
                            format!("Undefined variable \"{}\"", operand.lexeme),
                        )
                    })?;
                    self.scopes.mark_used(&operand.lexeme);
                    let Some(name) = target else { return Ok(()) };
                    let var = self.variable(name)?;
                    if !types_compatible(var.ty, source.ty) && var.ty != DataType::Void {
                        return Err(self.err(
                            ErrorKind::TypeMismatch,
                            format!("Assigning invalid type to variable \"{name}\""),
                        ));
                    }
                    self.emitter.emit(Instruction::Move(
                        Operand::local(name),
                        Operand::local(&operand.lexeme),
                    ))?;
                    if let Some(symbol) = self.scopes.find_mut(name) {
                        if symbol.ty == DataType::Void {
                            symbol.set_type(source.ty);
                        }
                        symbol.defined = true;
                    }
                    return Ok(());
                }
                TokenKind::Keyword => {
                    return Err(self.err(
                        ErrorKind::Syntactic,
                        format!("Unexpected token \"{}\" in assignment", operand.lexeme),
                    ));
                }
                _ => {}
            }
        }

        // Full expression; the result lands on the operand stack.
        let postfix = self.infix_to_postfix()?;
        let expr_type = self.parse_expression(postfix)?;

        match target {
            None => {
                self.emitter.emit(Instruction::Clears)?;
            }
            Some(name) => {
                let var = self.variable(name)?;
                if !types_compatible(var.ty, expr_type) && var.ty != DataType::Void {
                    return Err(self.err(
                        ErrorKind::TypeMismatch,
                        format!("Assigning invalid type to variable \"{name}\""),
                    ));
                }
                self.emitter.emit(Instruction::Pops(Operand::local(name)))?;
                self.emitter.emit(Instruction::Clears)?;
                if let Some(symbol) = self.scopes.find_mut(name) {
                    if symbol.ty == DataType::Void {
                        symbol.set_type(expr_type);
                    }
                    symbol.defined = true;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Function calls
    // ------------------------------------------------------------------

    /// `NAME(args);` as a statement. Discarding a non-void result is an
    /// error; `_ = NAME(args);` does that explicitly.
    fn call_statement(&mut self, name: &str) -> CompileResult<()> {
        let func = self.functions.get(name).cloned().ok_or_else(|| {
            self.err(
                ErrorKind::UndefinedSymbol,
                format!("Undefined function \"{name}\""),
            )
        })?;
        if func.return_type != DataType::Void {
            return Err(self.err(
                ErrorKind::CallMismatch,
                format!("Discarding the return value of function \"{name}\""),
            ));
        }

        self.next_token(); // the '('
        self.emitter.emit(Instruction::CreateFrame)?;
        self.params_on_call(&func)?;
        self.emitter.emit(Instruction::Call(func.name.clone()))?;
        self.expect(TokenKind::Semicolon, ";")?;
        Ok(())
    }

    /// Call whose result is assigned (or discarded via `_`). The callee's
    /// name token and the variable checks are done; cursor is at `(`.
    fn function_to_variable(
        &mut self,
        target: Option<&str>,
        func: &FunctionSymbol,
    ) -> CompileResult<()> {
        if let Some(name) = target {
            if func.return_type == DataType::Void {
                return Err(self.err(
                    ErrorKind::TypeMismatch,
                    "Assigning return value of void function to variable",
                ));
            }
            let var = self.variable(name)?;
            if var.ty == DataType::Void {
                if let Some(symbol) = self.scopes.find_mut(name) {
                    symbol.set_type(func.return_type);
                }
            } else if !types_compatible(var.ty, func.return_type) {
                return Err(self.err(
                    ErrorKind::TypeMismatch,
                    format!("Assigning invalid type to variable \"{name}\""),
                ));
            }
        }

        self.expect(TokenKind::LeftParen, "(")?;
        self.emitter.emit(Instruction::CreateFrame)?;
        self.params_on_call(func)?;
        self.emitter.emit(Instruction::Call(func.name.clone()))?;
        if let Some(name) = target {
            self.emitter.emit(Instruction::Pops(Operand::local(name)))?;
            if let Some(symbol) = self.scopes.find_mut(name) {
                symbol.defined = true;
            }
        }
        self.emitter.emit(Instruction::Clears)?;
        Ok(())
    }

    /// Parses the argument list of a user call and emits the temporary-frame
    /// parameter moves. Arity and per-position types are checked against the
    /// callee's parameter array.
    fn params_on_call(&mut self, func: &FunctionSymbol) -> CompileResult<()> {
        let mut loaded = 0usize;

        loop {
            let token = self.next_token();
            if token.kind == TokenKind::RightParen {
                break;
            }

            let got = match token.kind {
                TokenKind::Integer => DataType::Int32,
                TokenKind::Float => DataType::Double64,
                TokenKind::StringLit => DataType::U8Array,
                TokenKind::Identifier => {
                    let symbol = self.scopes.find(&token.lexeme).cloned().ok_or_else(|| {
                        self.err(
                            ErrorKind::UndefinedSymbol,
                            format!("Undefined variable \"{}\"", token.lexeme),
                        )
                    })?;
                    self.scopes.mark_used(&token.lexeme);
                    symbol.ty
                }
                _ => {
                    return Err(self.err(
                        ErrorKind::Syntactic,
                        format!("Unexpected token \"{}\" in function call", token.lexeme),
                    ));
                }
            };

            if loaded >= func.parameters.len()
                || !types_compatible(func.parameters[loaded].ty, got)
            {
                return Err(self.err(
                    ErrorKind::CallMismatch,
                    format!("Invalid parameter when calling function \"{}\"", func.name),
                ));
            }

            self.emitter.emit(Instruction::DefVar(Operand::temporary(
                format!("PARAM{loaded}"),
            )))?;
            self.emitter.emit(Instruction::Move(
                Operand::temporary(format!("PARAM{loaded}")),
                crate::codegen::token_operand(&token),
            ))?;
            loaded += 1;

            let separator = self.next_token();
            match separator.kind {
                TokenKind::Comma => {}
                TokenKind::RightParen => break,
                _ => return Err(self.err(ErrorKind::Syntactic, "Expected ',' or ')'")),
            }
        }

        if loaded != func.parameters.len() {
            return Err(self.err(
                ErrorKind::CallMismatch,
                format!(
                    "Invalid parameter count when calling function \"{}\": expected {}, got {}",
                    func.name,
                    func.parameters.len(),
                    loaded
                ),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Return statements
    // ------------------------------------------------------------------

    fn function_return(&mut self) -> CompileResult<()> {
        let name = self
            .current_function
            .clone()
            .ok_or_else(|| self.err(ErrorKind::Syntactic, "'return' outside of a function"))?;
        if let Some(func) = self.functions.get_mut(&name) {
            func.has_return = true;
        }
        let func = self.functions.get(&name).cloned().ok_or_else(|| {
            self.err(ErrorKind::Internal, "current function missing from the table")
        })?;

        // In main, return exits the program; a value is forbidden.
        if name == "main" {
            if self.next_token().kind != TokenKind::Semicolon {
                return Err(self.err(
                    ErrorKind::MissingExpression,
                    "Invalid usage of \"return\" in main function (unexpected expression)",
                ));
            }
            self.emitter.emit(Instruction::PopFrame)?;
            self.emitter
                .emit(Instruction::Exit(Operand::Int("0".to_string())))?;
            return Ok(());
        }

        if func.return_type == DataType::Void {
            if self.next_token().kind != TokenKind::Semicolon {
                return Err(self.err(
                    ErrorKind::MissingExpression,
                    format!("Returning a value from void function \"{name}\""),
                ));
            }
            self.emitter.emit(Instruction::PopFrame)?;
            self.emitter.emit(Instruction::Return)?;
            return Ok(());
        }

        if self.stream.peek().kind == TokenKind::Semicolon {
            return Err(self.err(
                ErrorKind::MissingExpression,
                format!("Missing expression in return statement for function \"{name}\""),
            ));
        }

        let operand = self.stream.peek().clone();
        let follower = self.stream.peek_at(1).clone();

        if follower.kind == TokenKind::Semicolon {
            // Single-token return pushes the value directly.
            self.stream.advance(2);
            self.line = follower.line;

            let mismatch = |parser: &Self| {
                parser.err(
                    ErrorKind::CallMismatch,
                    format!("Invalid return type for function \"{name}\""),
                )
            };
            match operand.kind {
                TokenKind::Integer => {
                    if !types_compatible(func.return_type, DataType::Int32) {
                        return Err(mismatch(self));
                    }
                    self.emitter
                        .emit(Instruction::Pushs(Operand::Int(operand.lexeme)))?;
                }
                TokenKind::Float => {
                    if !types_compatible(func.return_type, DataType::Double64) {
                        return Err(mismatch(self));
                    }
                    self.emitter.emit(Instruction::Pushs(Operand::Float(
                        operand.lexeme.parse().unwrap_or(0.0),
                    )))?;
                }
                TokenKind::Keyword => {
                    if !operand.is_keyword(Keyword::Null) {
                        return Err(self.err(
                            ErrorKind::Syntactic,
                            format!("Unexpected token \"{}\" in return statement", operand.lexeme),
                        ));
                    }
                    if !types_compatible(func.return_type, DataType::Null) {
                        return Err(mismatch(self));
                    }
                    self.emitter.emit(Instruction::Pushs(Operand::Nil))?;
                }
                TokenKind::Identifier => {
                    let symbol = self.scopes.find(&operand.lexeme).cloned().ok_or_else(|| {
                        self.err(
                            ErrorKind::UndefinedSymbol,
                            format!("Undefined variable \"{}\"", operand.lexeme),
                        )
                    })?;
                    self.scopes.mark_used(&operand.lexeme);
                    if !types_compatible(func.return_type, symbol.ty) {
                        return Err(mismatch(self));
                    }
                    self.emitter
                        .emit(Instruction::Pushs(Operand::local(&operand.lexeme)))?;
                }
                _ => {
                    return Err(self.err(
                        ErrorKind::Syntactic,
                        format!("Unexpected token \"{}\" in return statement", operand.lexeme),
                    ));
                }
            }
        } else {
            // Full expression; its value stays on the operand stack for the
            // caller to pop.
            let postfix = self.infix_to_postfix()?;
            let expr_type = self.parse_expression(postfix)?;
            if !types_compatible(func.return_type, expr_type) {
                return Err(self.err(
                    ErrorKind::CallMismatch,
                    format!("Invalid return type for function \"{name}\""),
                ));
            }
        }

        self.emitter.emit(Instruction::PopFrame)?;
        self.emitter.emit(Instruction::Return)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    /// Looks ahead for the `|binding|` form that distinguishes a nullable
    /// unwrap from a plain boolean condition. The cursor is restored.
    fn scan_nullable_binding(&mut self) -> CompileResult<bool> {
        let start = self.stream.cursor();
        self.expect(TokenKind::LeftParen, "(")?;

        let mut depth = 1;
        while depth != 0 {
            let token = self.next_token();
            match token.kind {
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen => depth -= 1,
                TokenKind::Eof => {
                    return Err(self.err(ErrorKind::Syntactic, "Incorrectly ended condition"));
                }
                _ => {}
            }
        }

        let nullable = if self.next_token().kind == TokenKind::VerticalBar {
            self.expect(TokenKind::Identifier, "identifier")?;
            self.expect(TokenKind::VerticalBar, "|")?;
            true
        } else {
            false
        };

        self.stream.set_cursor(start);
        Ok(nullable)
    }

    fn if_else(&mut self) -> CompileResult<()> {
        self.scopes.push();
        if self.scan_nullable_binding()? {
            self.nullable_if()
        } else {
            self.value_if()
        }
    }

    fn value_if(&mut self) -> CompileResult<()> {
        let id = self.emitter.alloc_if_label();
        self.emitter.emit(Instruction::Label(format!("$if{id}")))?;

        self.expect(TokenKind::LeftParen, "(")?;
        let postfix = self.infix_to_postfix()?;
        let condition_type = self.parse_expression(postfix)?;
        if condition_type != DataType::Boolean {
            return Err(self.err(
                ErrorKind::TypeMismatch,
                "Expected boolean expression in conditional",
            ));
        }
        self.emitter.pop_to_register(DataType::Boolean)?;
        self.emitter.emit(Instruction::Clears)?;
        self.emitter.emit(Instruction::JumpIfEq(
            format!("$else{id}"),
            Operand::register("B0"),
            Operand::Bool(false),
        ))?;

        self.expect(TokenKind::LeftBrace, "{")?;
        self.program_body()?;
        self.emitter.emit(Instruction::Jump(format!("$endif{id}")))?;

        self.expect_keyword(Keyword::Else, "else")?;
        self.expect(TokenKind::LeftBrace, "{")?;
        self.emitter.emit(Instruction::Label(format!("$else{id}")))?;
        self.scopes.push();
        self.program_body()?;

        self.emitter.emit(Instruction::Label(format!("$endif{id}")))
    }

    /// `if (nullable) |binding| { ... } else { ... }`: tests against nil and
    /// binds the denullified value inside the then-branch.
    fn nullable_if(&mut self) -> CompileResult<()> {
        let id = self.emitter.alloc_if_label();
        self.emitter.emit(Instruction::Label(format!("$if{id}")))?;

        self.expect(TokenKind::LeftParen, "(")?;
        let tested = self.expect(TokenKind::Identifier, "identifier")?;
        let var = self.scopes.find(&tested.lexeme).cloned().ok_or_else(|| {
            self.err(
                ErrorKind::UndefinedSymbol,
                format!("Undefined variable \"{}\"", tested.lexeme),
            )
        })?;
        if !var.ty.is_nullable() {
            return Err(self.err(
                ErrorKind::TypeMismatch,
                format!("Variable \"{}\" is not of a nullable type", tested.lexeme),
            ));
        }
        self.scopes.mark_used(&tested.lexeme);

        self.expect(TokenKind::RightParen, ")")?;
        self.expect(TokenKind::VerticalBar, "|")?;
        let binding = self.expect(TokenKind::Identifier, "identifier")?;
        self.expect(TokenKind::VerticalBar, "|")?;

        let mut symbol =
            VariableSymbol::new(binding.lexeme.clone(), var.ty.denullified(), false);
        symbol.defined = true;
        self.declare_variable(symbol)?;

        self.emitter.emit(Instruction::JumpIfEq(
            format!("$else{id}"),
            Operand::local(&tested.lexeme),
            Operand::Nil,
        ))?;
        self.emitter.emit(Instruction::Move(
            Operand::local(&binding.lexeme),
            Operand::local(&tested.lexeme),
        ))?;

        self.expect(TokenKind::LeftBrace, "{")?;
        self.program_body()?;
        self.emitter.emit(Instruction::Jump(format!("$endif{id}")))?;

        self.expect_keyword(Keyword::Else, "else")?;
        self.expect(TokenKind::LeftBrace, "{")?;
        self.emitter.emit(Instruction::Label(format!("$else{id}")))?;
        self.scopes.push();
        self.program_body()?;

        self.emitter.emit(Instruction::Label(format!("$endif{id}")))
    }

    fn while_loop(&mut self) -> CompileResult<()> {
        self.scopes.push();
        if self.scan_nullable_binding()? {
            self.nullable_while()
        } else {
            self.value_while()
        }
    }

    fn value_while(&mut self) -> CompileResult<()> {
        let id = self.emitter.alloc_while_label();

        // The condition is re-evaluated on every iteration, so its code sits
        // behind the loop label.
        self.emitter
            .emit(Instruction::Label(format!("$while{id}")))?;

        self.expect(TokenKind::LeftParen, "(")?;
        let postfix = self.infix_to_postfix()?;
        let condition_type = self.parse_expression(postfix)?;
        if condition_type != DataType::Boolean {
            return Err(self.err(
                ErrorKind::TypeMismatch,
                "Expected boolean expression in while loop",
            ));
        }
        self.emitter.pop_to_register(DataType::Boolean)?;
        self.emitter.emit(Instruction::Clears)?;
        self.emitter.emit(Instruction::JumpIfEq(
            format!("$endwhile{id}"),
            Operand::register("B0"),
            Operand::Bool(false),
        ))?;

        self.expect(TokenKind::LeftBrace, "{")?;
        self.program_body()?;

        self.emitter.emit(Instruction::Jump(format!("$while{id}")))?;
        self.emitter
            .emit(Instruction::Label(format!("$endwhile{id}")))
    }

    fn nullable_while(&mut self) -> CompileResult<()> {
        let id = self.emitter.alloc_while_label();

        self.expect(TokenKind::LeftParen, "(")?;
        let tested = self.expect(TokenKind::Identifier, "identifier")?;
        let var = self.scopes.find(&tested.lexeme).cloned().ok_or_else(|| {
            self.err(
                ErrorKind::UndefinedSymbol,
                format!("Undefined variable \"{}\"", tested.lexeme),
            )
        })?;
        if !var.ty.is_nullable() {
            return Err(self.err(
                ErrorKind::TypeMismatch,
                format!("Variable \"{}\" is not of a nullable type", tested.lexeme),
            ));
        }
        self.scopes.mark_used(&tested.lexeme);

        self.expect(TokenKind::RightParen, ")")?;
        self.expect(TokenKind::VerticalBar, "|")?;
        let binding = self.expect(TokenKind::Identifier, "identifier")?;
        self.expect(TokenKind::VerticalBar, "|")?;

        let mut symbol =
            VariableSymbol::new(binding.lexeme.clone(), var.ty.denullified(), false);
        symbol.defined = true;
        self.declare_variable(symbol)?;

        self.emitter
            .emit(Instruction::Label(format!("$while{id}")))?;
        self.emitter.emit(Instruction::JumpIfEq(
            format!("$endwhile{id}"),
            Operand::local(&tested.lexeme),
            Operand::Nil,
        ))?;
        self.emitter.emit(Instruction::Move(
            Operand::local(&binding.lexeme),
            Operand::local(&tested.lexeme),
        ))?;

        self.expect(TokenKind::LeftBrace, "{")?;
        self.program_body()?;

        self.emitter.emit(Instruction::Jump(format!("$while{id}")))?;
        self.emitter
            .emit(Instruction::Label(format!("$endwhile{id}")))
    }
}
