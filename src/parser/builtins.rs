//! The `ifj.*` built-in functions.
//!
//! A fixed catalog of thirteen entries, inserted into the global function
//! table at startup so they resolve exactly like user functions (and cannot
//! be redefined). Calls are validated strictly against the catalog, then
//! dispatched to the emitter, which either maps them onto a single target
//! instruction or expands an inline labeled routine.

use std::io::Write;

use super::Parser;
use crate::error::{CompileResult, ErrorKind};
use crate::lexer::{Token, TokenKind};
use crate::symtable::{types_compatible, DataType, FunctionSymbol, VariableSymbol};

pub struct Builtin {
    pub name: &'static str,
    pub parameters: &'static [DataType],
    pub return_type: DataType,
}

pub static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "readstr",
        parameters: &[],
        return_type: DataType::U8ArrayNullable,
    },
    Builtin {
        name: "readi32",
        parameters: &[],
        return_type: DataType::Int32Nullable,
    },
    Builtin {
        name: "readf64",
        parameters: &[],
        return_type: DataType::Double64Nullable,
    },
    Builtin {
        name: "write",
        parameters: &[DataType::Term],
        return_type: DataType::Void,
    },
    Builtin {
        name: "i2f",
        parameters: &[DataType::Int32],
        return_type: DataType::Double64,
    },
    Builtin {
        name: "f2i",
        parameters: &[DataType::Double64],
        return_type: DataType::Int32,
    },
    Builtin {
        name: "string",
        parameters: &[DataType::Term],
        return_type: DataType::U8Array,
    },
    Builtin {
        name: "length",
        parameters: &[DataType::U8Array],
        return_type: DataType::Int32,
    },
    Builtin {
        name: "concat",
        parameters: &[DataType::U8Array, DataType::U8Array],
        return_type: DataType::U8Array,
    },
    Builtin {
        name: "substring",
        parameters: &[DataType::U8Array, DataType::Int32, DataType::Int32],
        return_type: DataType::U8ArrayNullable,
    },
    Builtin {
        name: "strcmp",
        parameters: &[DataType::U8Array, DataType::U8Array],
        return_type: DataType::Int32,
    },
    Builtin {
        name: "ord",
        parameters: &[DataType::U8Array, DataType::Int32],
        return_type: DataType::Int32,
    },
    Builtin {
        name: "chr",
        parameters: &[DataType::Int32],
        return_type: DataType::U8Array,
    },
];

impl<W: Write> Parser<W> {
    /// Seeds the global table; resolution then treats built-ins exactly like
    /// user functions, so redefining one collides in the usual way.
    pub(super) fn insert_builtins(&mut self) {
        for builtin in BUILTINS {
            let mut func = FunctionSymbol::new(builtin.name);
            func.return_type = builtin.return_type;
            func.parameters = builtin
                .parameters
                .iter()
                .map(|&ty| VariableSymbol::new("", ty, false))
                .collect();
            self.functions.insert(builtin.name.to_string(), func);
        }
    }

    /// After the `ifj` identifier: expects `.name` and resolves the name in
    /// the catalog. Leaves the cursor on the argument list.
    pub(super) fn builtin_lookup(&mut self) -> CompileResult<FunctionSymbol> {
        let dot = self.next_token();
        if dot.kind != TokenKind::Dot {
            return Err(self.err(ErrorKind::UndefinedSymbol, "Undefined variable \"ifj\""));
        }

        let name = self.next_token();
        if name.kind != TokenKind::Identifier {
            return Err(self.err(
                ErrorKind::Syntactic,
                "Expected a built-in function name following \"ifj.\"",
            ));
        }

        if !BUILTINS.iter().any(|b| b.name == name.lexeme) {
            return Err(self.err(
                ErrorKind::UndefinedSymbol,
                format!("Invalid built-in function name \"{}\"", name.lexeme),
            ));
        }

        self.functions.get(&name.lexeme).cloned().ok_or_else(|| {
            self.err(
                ErrorKind::Internal,
                format!("built-in '{}' missing from the table", name.lexeme),
            )
        })
    }

    /// `ifj.name(args);` with the result going to `target` (`None` when the
    /// call is a statement or the result is discarded with `_`).
    pub(super) fn builtin_call(
        &mut self,
        func: &FunctionSymbol,
        target: Option<&str>,
    ) -> CompileResult<()> {
        let mut target_type = DataType::Void;
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
            target_type = self.variable(name)?.ty;
        }

        self.expect(TokenKind::LeftParen, "(")?;
        let args = self.builtin_args(func)?;
        self.expect(TokenKind::Semicolon, ";")?;

        match func.name.as_str() {
            "readi32" => self.emitter.read(target, target_type, DataType::Int32)?,
            "readf64" => self.emitter.read(target, target_type, DataType::Double64)?,
            "readstr" => self.emitter.read(target, target_type, DataType::U8Array)?,
            "write" => self.emitter.write_value(&args[0])?,
            "i2f" => self.emitter.int2float(target, &args[0])?,
            "f2i" => self.emitter.float2int(target, &args[0])?,
            "length" => self.emitter.strlen(target, &args[0])?,
            "concat" => self.emitter.concat(target, &args[0], &args[1])?,
            "strcmp" => self.emitter.strcmp(target, &args[0], &args[1])?,
            "string" => self.emitter.string_move(target, &args[0])?,
            "ord" => self.emitter.ord(target, &args[0], &args[1])?,
            "chr" => self.emitter.int2char(target, &args[0])?,
            "substring" => self
                .emitter
                .substring(target, &args[0], &args[1], &args[2])?,
            other => {
                return Err(self.err(
                    ErrorKind::Internal,
                    format!("no emission strategy for built-in '{other}'"),
                ));
            }
        }

        if let Some(name) = target {
            if let Some(symbol) = self.scopes.find_mut(name) {
                symbol.defined = true;
            }
        }
        Ok(())
    }

    /// Argument tokens of a built-in call, validated against the catalog.
    /// No code is emitted here; every built-in consumes its arguments in
    /// place instead of going through a call frame.
    fn builtin_args(&mut self, func: &FunctionSymbol) -> CompileResult<Vec<Token>> {
        let mut args = vec![];

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
                        format!(
                            "Unexpected token \"{}\" in call of \"{}\"",
                            token.lexeme, func.name
                        ),
                    ));
                }
            };

            if args.len() >= func.parameters.len()
                || !types_compatible(func.parameters[args.len()].ty, got)
            {
                return Err(self.err(
                    ErrorKind::CallMismatch,
                    format!(
                        "Incompatible parameter {} in call of \"{}\"",
                        args.len() + 1,
                        func.name
                    ),
                ));
            }
            args.push(token);

            if args.len() == func.parameters.len() {
                self.expect(TokenKind::RightParen, ")")?;
                break;
            }
            self.expect(TokenKind::Comma, ",")?;
        }

        if args.len() != func.parameters.len() {
            return Err(self.err(
                ErrorKind::CallMismatch,
                format!(
                    "Invalid parameter count when calling function '{}': expected {}, got {}",
                    func.name,
                    func.parameters.len(),
                    args.len()
                ),
            ));
        }
        Ok(args)
    }
}
