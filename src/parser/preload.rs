//! Function-preloading pass.
//!
//! Before any code is emitted, the whole token stream is walked once to
//! register every function signature in the global table, so that call
//! sites may precede definitions. The pass also hoists the name of every
//! local declaration (and every nullable-condition binding) into the owning
//! function, which lets the main parser define the whole local frame up
//! front.

use std::io::Write;

use log::debug;

use super::Parser;
use crate::error::{CompileResult, ErrorKind};
use crate::lexer::{Keyword, TokenKind};
use crate::symtable::{DataType, FunctionSymbol, VariableSymbol};

impl<W: Write> Parser<W> {
    /// Walks the stream from the start, tracking brace depth; resets the
    /// cursor when done.
    pub(super) fn preload(&mut self) -> CompileResult<()> {
        let mut nested = 0i32;

        loop {
            let token = self.next_token();
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::LeftBrace => nested += 1,
                TokenKind::RightBrace => nested -= 1,
                TokenKind::Keyword => match token.keyword {
                    Some(Keyword::Pub) => {
                        self.preload_function()?;
                        // Definitions only exist at the top level; the
                        // signature parse already consumed the opening '{'.
                        if nested != 0 {
                            return Err(self.err(
                                ErrorKind::OtherSemantic,
                                "Function definition cannot be nested inside another block",
                            ));
                        }
                        nested += 1;
                    }
                    Some(Keyword::Var) => self.preload_declaration(true)?,
                    Some(Keyword::Const) => self.preload_declaration(false)?,
                    Some(Keyword::If) | Some(Keyword::While) => {
                        self.preload_condition()?;
                        nested += 1;
                    }
                    _ => {}
                },
                _ => {}
            }
        }

        self.stream.set_cursor(0);
        Ok(())
    }

    /// `fn NAME ( id : TYPE , ... ) RETTY {` after the `pub`.
    fn preload_function(&mut self) -> CompileResult<()> {
        self.expect_keyword(Keyword::Fn, "fn")?;
        let name = self.expect(TokenKind::Identifier, "identifier")?.lexeme;

        if self.functions.contains(&name) {
            return Err(self.err(
                ErrorKind::Redefinition,
                format!("Redefinition of function {name}"),
            ));
        }

        let mut func = FunctionSymbol::new(name.clone());
        let is_main = name == "main";
        if is_main {
            self.has_main = true;
        }

        self.expect(TokenKind::LeftParen, "(")?;
        loop {
            let token = self.next_token();
            match token.kind {
                TokenKind::RightParen => break,
                TokenKind::Identifier => {
                    if func.parameters.iter().any(|p| p.name == token.lexeme) {
                        return Err(self.err(
                            ErrorKind::Redefinition,
                            format!(
                                "Multiple parameters with name '{}' in function '{name}'",
                                token.lexeme
                            ),
                        ));
                    }
                    self.expect(TokenKind::Colon, ":")?;

                    let type_token = self.next_token();
                    let ty = Self::data_type_from_token(&type_token)
                        .filter(|ty| *ty != DataType::Void)
                        .ok_or_else(|| self.err(ErrorKind::Syntactic, "Expected data type"))?;
                    func.parameters
                        .push(VariableSymbol::new(token.lexeme, ty, false));

                    match self.next_token().kind {
                        TokenKind::Comma => {}
                        TokenKind::RightParen => break,
                        _ => {
                            return Err(self.err(ErrorKind::Syntactic, "Expected ',' or ')'"));
                        }
                    }
                }
                TokenKind::Eof => {
                    return Err(self.err(ErrorKind::Syntactic, "Expected ')'"));
                }
                _ => return Err(self.err(ErrorKind::Syntactic, "Expected identifier")),
            }
        }

        let return_token = self.next_token();
        func.return_type = Self::data_type_from_token(&return_token)
            .ok_or_else(|| self.err(ErrorKind::Syntactic, "Expected data type"))?;

        if is_main && (func.return_type != DataType::Void || !func.parameters.is_empty()) {
            return Err(self.err(
                ErrorKind::CallMismatch,
                "Main function has incorrect return type or parameters",
            ));
        }

        self.expect(TokenKind::LeftBrace, "{")?;

        debug!(
            "preloaded function '{name}' ({} parameters)",
            func.parameters.len()
        );
        self.functions.insert(name.clone(), func);
        self.current_function = Some(name);
        Ok(())
    }

    /// Hoists the declared name into the current function's local list. The
    /// program header is a `const` outside any function and is skipped; a
    /// `var` out there is an error.
    fn preload_declaration(&mut self, is_var: bool) -> CompileResult<()> {
        let token = self.expect(TokenKind::Identifier, "identifier")?;

        if self.current_function.is_none() {
            if is_var {
                return Err(self.err(
                    ErrorKind::OtherSemantic,
                    "Variable declaration outside of a function",
                ));
            }
            return Ok(());
        }
        if token.lexeme == "ifj" {
            return Ok(());
        }

        if let Some(name) = self.current_function.clone() {
            if let Some(func) = self.functions.get_mut(&name) {
                func.add_local(&token.lexeme);
            }
        }
        Ok(())
    }

    /// Skims an `if`/`while` head through its opening `{`, hoisting the
    /// `|binding|` name when the nullable form is used.
    fn preload_condition(&mut self) -> CompileResult<()> {
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

        let token = self.next_token();
        if token.kind == TokenKind::VerticalBar {
            let binding = self.expect(TokenKind::Identifier, "identifier")?;
            if let Some(name) = self.current_function.clone() {
                if let Some(func) = self.functions.get_mut(&name) {
                    func.add_local(&binding.lexeme);
                }
            }
            self.expect(TokenKind::VerticalBar, "|")?;
            self.expect(TokenKind::LeftBrace, "{")?;
            return Ok(());
        }

        if token.kind != TokenKind::LeftBrace {
            return Err(self.err(ErrorKind::Syntactic, "Expected '{' after condition"));
        }
        Ok(())
    }
}
