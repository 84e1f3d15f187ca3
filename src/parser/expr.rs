//! Operator-precedence expression parsing and typed emission.
//!
//! Expressions are first converted to postfix with a table-driven
//! shift/reduce loop over a stack of terminals, one handle marker and one
//! non-terminal. The postfix vector is then scanned left to right with a
//! small operand stack, checking operand/operator compatibility and pushing
//! stack instructions as reductions replay.

use std::io::Write;

use super::Parser;
use crate::codegen::{Instruction, Operand};
use crate::error::{CompileResult, ErrorKind};
use crate::lexer::{Keyword, Token, TokenKind};
use crate::symtable::{DataType, VariableSymbol};

/// Tolerance when deciding whether a float constant has a fractional part.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Shift,
    Reduce,
    Match,
    Accept,
    Invalid,
}

/// Row/column indices of the precedence table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableKey {
    Id,
    Mul,
    Div,
    Add,
    Sub,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    LeftBracket,
    RightBracket,
    Dollar,
}

use Action::{Accept, Invalid, Match, Reduce, Shift};

#[rustfmt::skip]
const PRECEDENCE: [[Action; 14]; 14] = [
    /* id */ [Invalid, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Invalid, Reduce, Reduce],
    /* *  */ [Shift, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Shift, Reduce, Reduce],
    /* /  */ [Shift, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Shift, Reduce, Reduce],
    /* +  */ [Shift, Shift, Shift, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Shift, Reduce, Reduce],
    /* -  */ [Shift, Shift, Shift, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Shift, Reduce, Reduce],
    /* == */ [Shift, Shift, Shift, Shift, Shift, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Shift, Reduce, Reduce],
    /* != */ [Shift, Shift, Shift, Shift, Shift, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Shift, Reduce, Reduce],
    /* <  */ [Shift, Shift, Shift, Shift, Shift, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Shift, Reduce, Reduce],
    /* >  */ [Shift, Shift, Shift, Shift, Shift, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Shift, Reduce, Reduce],
    /* <= */ [Shift, Shift, Shift, Shift, Shift, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Shift, Reduce, Reduce],
    /* >= */ [Shift, Shift, Shift, Shift, Shift, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Shift, Reduce, Reduce],
    /* (  */ [Shift, Shift, Shift, Shift, Shift, Shift, Shift, Shift, Shift, Shift, Shift, Shift, Match, Invalid],
    /* )  */ [Invalid, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Reduce, Invalid, Reduce, Reduce],
    /* $  */ [Shift, Shift, Shift, Shift, Shift, Shift, Shift, Shift, Shift, Shift, Shift, Shift, Invalid, Accept],
];

/// Classifies a token for the table. The `)` that takes the running bracket
/// counter to -1 is the first unmatched right bracket: it acts as the
/// end-of-expression sentinel. `None` marks a token that cannot appear in an
/// expression at all.
fn table_key(token: &Token, bracket_count: i32) -> Option<TableKey> {
    match token.kind {
        TokenKind::Identifier | TokenKind::Integer | TokenKind::Float => Some(TableKey::Id),
        TokenKind::Keyword => token.is_keyword(Keyword::Null).then_some(TableKey::Id),
        TokenKind::Multiply => Some(TableKey::Mul),
        TokenKind::Divide => Some(TableKey::Div),
        TokenKind::Plus => Some(TableKey::Add),
        TokenKind::Minus => Some(TableKey::Sub),
        TokenKind::Equal => Some(TableKey::Eq),
        TokenKind::NotEqual => Some(TableKey::Neq),
        TokenKind::Less => Some(TableKey::Lt),
        TokenKind::Greater => Some(TableKey::Gt),
        TokenKind::LessEqual => Some(TableKey::Le),
        TokenKind::GreaterEqual => Some(TableKey::Ge),
        TokenKind::LeftParen => Some(TableKey::LeftBracket),
        TokenKind::RightParen => {
            if bracket_count == -1 {
                Some(TableKey::Dollar)
            } else {
                Some(TableKey::RightBracket)
            }
        }
        TokenKind::Semicolon => Some(TableKey::Dollar),
        _ => None,
    }
}

#[derive(Debug, Clone)]
enum StackEntry {
    Handle,
    Nonterminal,
    /// `token` is `None` only for the bottom-of-stack sentinel.
    Terminal {
        token: Option<Token>,
        key: TableKey,
    },
}

#[derive(Debug, Default)]
struct ExprStack(Vec<StackEntry>);

impl ExprStack {
    fn push(&mut self, entry: StackEntry) {
        self.0.push(entry);
    }

    fn pop(&mut self) -> Option<StackEntry> {
        self.0.pop()
    }

    fn topmost_terminal_key(&self) -> TableKey {
        self.0
            .iter()
            .rev()
            .find_map(|entry| match entry {
                StackEntry::Terminal { key, .. } => Some(*key),
                _ => None,
            })
            .unwrap_or(TableKey::Dollar)
    }

    /// Inserts the handle marker right above the topmost terminal.
    fn push_handle_after_topmost(&mut self) {
        let position = self
            .0
            .iter()
            .rposition(|entry| matches!(entry, StackEntry::Terminal { .. }))
            .map(|i| i + 1)
            .unwrap_or(0);
        self.0.insert(position, StackEntry::Handle);
    }

    /// Number of entries above the topmost handle marker.
    fn handle_distance(&self) -> Option<usize> {
        self.0
            .iter()
            .rposition(|entry| matches!(entry, StackEntry::Handle))
            .map(|i| self.0.len() - 1 - i)
    }

    fn peek(&self, depth: usize) -> Option<&StackEntry> {
        self.0.iter().rev().nth(depth)
    }
}

/// The grammar rule recognized between the stack top and the handle.
#[derive(Debug, Clone, PartialEq)]
enum Rule {
    /// E -> id
    Identifier,
    /// E -> (E)
    Bracket,
    /// E -> E op E
    Operator(Token),
}

fn find_rule(stack: &ExprStack, distance: usize) -> Option<Rule> {
    match distance {
        1 => match stack.peek(0) {
            Some(StackEntry::Terminal {
                token: Some(token), ..
            }) if token.is_operand() => Some(Rule::Identifier),
            _ => None,
        },
        3 => {
            match (stack.peek(0), stack.peek(1), stack.peek(2)) {
                // ) E (
                (
                    Some(StackEntry::Terminal {
                        token: Some(close), ..
                    }),
                    Some(StackEntry::Nonterminal),
                    Some(StackEntry::Terminal {
                        token: Some(open), ..
                    }),
                ) if close.kind == TokenKind::RightParen && open.kind == TokenKind::LeftParen => {
                    Some(Rule::Bracket)
                }
                // E op E
                (
                    Some(StackEntry::Nonterminal),
                    Some(StackEntry::Terminal {
                        token: Some(op), ..
                    }),
                    Some(StackEntry::Nonterminal),
                ) if matches!(
                    op.kind,
                    TokenKind::Multiply
                        | TokenKind::Divide
                        | TokenKind::Plus
                        | TokenKind::Minus
                        | TokenKind::Equal
                        | TokenKind::NotEqual
                        | TokenKind::Less
                        | TokenKind::Greater
                        | TokenKind::LessEqual
                        | TokenKind::GreaterEqual
                ) =>
                {
                    Some(Rule::Operator(op.clone()))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Pops the reduced region and the handle, appending the rule's terminals
/// (never brackets) to the postfix output.
fn reduce(stack: &mut ExprStack, postfix: &mut Vec<Token>, rule: Rule) {
    match rule {
        Rule::Identifier => {
            if let Some(StackEntry::Terminal {
                token: Some(token), ..
            }) = stack.pop()
            {
                postfix.push(token);
            }
            stack.pop(); // handle
        }
        Rule::Bracket => {
            stack.pop();
            stack.pop();
            stack.pop();
            stack.pop(); // ')', E, '(', handle
        }
        Rule::Operator(op) => {
            stack.pop(); // E
            stack.pop(); // the operator terminal
            stack.pop(); // E
            stack.pop(); // handle
            postfix.push(op);
        }
    }
    stack.push(StackEntry::Nonterminal);
}

impl<W: Write> Parser<W> {
    /// Precedence-parses the expression at the cursor into its postfix
    /// form. The final separator (`;`, or the first unmatched `)`) is
    /// consumed and appended as the last element.
    pub(super) fn infix_to_postfix(&mut self) -> CompileResult<Vec<Token>> {
        let first = self.next_token();
        if first.kind == TokenKind::Semicolon || first.kind == TokenKind::RightParen {
            return Err(self.err(ErrorKind::Syntactic, "Empty expression"));
        }
        self.stream.rewind(1);

        let mut stack = ExprStack::default();
        stack.push(StackEntry::Terminal {
            token: None,
            key: TableKey::Dollar,
        });

        let mut postfix = vec![];
        let mut bracket_count = 0i32;
        let mut expression_over = false;
        let mut token = first;

        loop {
            if !expression_over {
                token = self.next_token();
                match token.kind {
                    TokenKind::LeftParen => bracket_count += 1,
                    TokenKind::RightParen => bracket_count -= 1,
                    _ => {}
                }
            }

            let topmost = stack.topmost_terminal_key();
            let key = table_key(&token, bracket_count).ok_or_else(|| {
                self.err(
                    ErrorKind::Syntactic,
                    format!("Unexpected token \"{}\" in expression", token.lexeme),
                )
            })?;
            if key == TableKey::Dollar {
                expression_over = true;
            }

            match PRECEDENCE[topmost as usize][key as usize] {
                Match => stack.push(StackEntry::Terminal {
                    token: Some(token.clone()),
                    key,
                }),
                Shift => {
                    stack.push_handle_after_topmost();
                    stack.push(StackEntry::Terminal {
                        token: Some(token.clone()),
                        key,
                    });
                }
                Reduce => {
                    // The lookahead gets re-read after the reduction.
                    if !expression_over {
                        self.stream.rewind(1);
                        match token.kind {
                            TokenKind::RightParen => bracket_count += 1,
                            TokenKind::LeftParen => bracket_count -= 1,
                            _ => {}
                        }
                    }
                    let rule = stack
                        .handle_distance()
                        .and_then(|distance| find_rule(&stack, distance))
                        .ok_or_else(|| self.err(ErrorKind::Syntactic, "Invalid expression"))?;
                    reduce(&mut stack, &mut postfix, rule);
                }
                Accept => {
                    postfix.push(token);
                    return Ok(postfix);
                }
                Invalid => {
                    return Err(self.err(ErrorKind::Syntactic, "Invalid expression"));
                }
            }
        }
    }

    /// Replaces references to non-nullable float constants with a whole
    /// value by integer literal tokens, which lets the compatibility rules
    /// below convert them implicitly. Running it twice is a no-op.
    fn replace_constants(&mut self, postfix: &mut [Token]) {
        for token in postfix.iter_mut() {
            if token.kind != TokenKind::Identifier {
                continue;
            }
            let Some(var) = self.scopes.find(&token.lexeme) else {
                continue;
            };
            if var.nullable || !var.is_const || var.ty != DataType::Double64 {
                continue;
            }
            let Some(value) = var.value.clone() else {
                continue;
            };
            if !has_zero_decimal_places(&value) {
                continue;
            }

            self.scopes.mark_used(&token.lexeme);
            let folded = value.parse::<f64>().unwrap_or(0.0) as i64;
            *token = Token::new(TokenKind::Integer, folded.to_string(), token.line);
        }
    }

    /// Evaluates the postfix form over an operand stack, emitting `PUSHS`
    /// for operands and the checked stack operation for each operator.
    /// Returns the type of the single residual value.
    pub(super) fn parse_expression(&mut self, mut postfix: Vec<Token>) -> CompileResult<DataType> {
        self.replace_constants(&mut postfix);

        let mut operands: Vec<Token> = vec![];
        let mut return_type = DataType::Int32;

        for index in 0..postfix.len() {
            let token = postfix[index].clone();
            match token.kind {
                TokenKind::Integer
                | TokenKind::Float
                | TokenKind::Identifier
                | TokenKind::Keyword => {
                    if token.kind == TokenKind::Float {
                        return_type = DataType::Double64;
                    }
                    if token.kind == TokenKind::Keyword && !token.is_keyword(Keyword::Null) {
                        return Err(self.err(
                            ErrorKind::Syntactic,
                            format!("Unexpected keyword \"{}\" in expression", token.lexeme),
                        ));
                    }
                    let operand = if token.kind == TokenKind::Identifier {
                        let symbol = self.scopes.find(&token.lexeme).cloned().ok_or_else(|| {
                            self.err(
                                ErrorKind::UndefinedSymbol,
                                format!("Undefined variable \"{}\"", token.lexeme),
                            )
                        })?;
                        self.scopes.mark_used(&token.lexeme);
                        if symbol.ty == DataType::Double64 {
                            return_type = DataType::Double64;
                        }
                        Operand::local(&token.lexeme)
                    } else {
                        crate::codegen::token_operand(&token)
                    };

                    self.emitter.emit(Instruction::Pushs(operand))?;
                    operands.push(token);
                }

                TokenKind::Multiply | TokenKind::Divide | TokenKind::Plus | TokenKind::Minus => {
                    let (left, right) = pop_operands(&mut operands)
                        .ok_or_else(|| self.err(ErrorKind::Syntactic, "Invalid expression"))?;
                    let result_type = self.arithmetic_operation(&left, &right, &token)?;
                    return_type = result_type;
                    operands.push(Token::new(
                        if result_type == DataType::Int32 {
                            TokenKind::Integer
                        } else {
                            TokenKind::Float
                        },
                        "",
                        token.line,
                    ));
                }

                TokenKind::Equal
                | TokenKind::NotEqual
                | TokenKind::Less
                | TokenKind::Greater
                | TokenKind::LessEqual
                | TokenKind::GreaterEqual => {
                    let (left, right) = pop_operands(&mut operands)
                        .ok_or_else(|| self.err(ErrorKind::Syntactic, "Invalid expression"))?;
                    self.relational_operation(&left, &right, &token)?;
                    return_type = DataType::Boolean;

                    // A boolean is never an operand of a further operator.
                    let next = postfix.get(index + 1);
                    if !matches!(
                        next.map(|t| t.kind),
                        Some(TokenKind::Semicolon) | Some(TokenKind::RightParen)
                    ) {
                        return Err(self.err(
                            ErrorKind::Syntactic,
                            "Unexpected token after boolean expression",
                        ));
                    }
                }

                TokenKind::Semicolon | TokenKind::RightParen => {}

                _ => {
                    return Err(self.err(
                        ErrorKind::Syntactic,
                        format!("Unexpected token \"{}\" in expression", token.lexeme),
                    ));
                }
            }
        }

        Ok(return_type)
    }

    // ------------------------------------------------------------------
    // Arithmetic operators
    // ------------------------------------------------------------------

    fn arithmetic_operation(
        &mut self,
        left: &Token,
        right: &Token,
        op: &Token,
    ) -> CompileResult<DataType> {
        let left_is_id = left.kind == TokenKind::Identifier;
        let right_is_id = right.kind == TokenKind::Identifier;

        if !left_is_id && !right_is_id {
            self.check_literals_arithmetic(left, right, op)?;
            self.arithmetic_two_literals(left, right, op)
        } else if left_is_id && !right_is_id {
            self.check_literal_var_arithmetic(right, left, op)?;
            let symbol = self.expression_symbol(left)?;
            self.arithmetic_literal_id(right, &symbol, op, true)
        } else if !left_is_id && right_is_id {
            self.check_literal_var_arithmetic(left, right, op)?;
            let symbol = self.expression_symbol(right)?;
            self.arithmetic_literal_id(left, &symbol, op, false)
        } else {
            self.check_two_vars_arithmetic(left, right)?;
            let lhs = self.expression_symbol(left)?;
            let rhs = self.expression_symbol(right)?;
            let result = if lhs.ty == DataType::Double64 || rhs.ty == DataType::Double64 {
                DataType::Double64
            } else {
                DataType::Int32
            };
            self.emit_arithmetic(op, result)?;
            Ok(result)
        }
    }

    fn check_literals_arithmetic(
        &self,
        left: &Token,
        right: &Token,
        op: &Token,
    ) -> CompileResult<()> {
        if left.kind == TokenKind::Keyword || right.kind == TokenKind::Keyword {
            return Err(self.err(ErrorKind::Syntactic, "Unexpected keyword in expression"));
        }
        if op.kind != TokenKind::Divide {
            return Ok(());
        }
        // Mixed-kind division only works when the float side is whole.
        if left.kind != right.kind {
            let float_side = if left.kind == TokenKind::Float {
                left
            } else {
                right
            };
            if !has_zero_decimal_places(&float_side.lexeme) {
                return Err(self.err(
                    ErrorKind::TypeMismatch,
                    "Incompatible types in division operation",
                ));
            }
        }
        Ok(())
    }

    fn arithmetic_two_literals(
        &mut self,
        left: &Token,
        right: &Token,
        op: &Token,
    ) -> CompileResult<DataType> {
        let result = if left.kind == TokenKind::Float || right.kind == TokenKind::Float {
            DataType::Double64
        } else {
            DataType::Int32
        };

        if right.kind == TokenKind::Integer && left.kind == TokenKind::Float {
            self.emitter.emit(Instruction::Int2Floats)?;
        } else if left.kind == TokenKind::Integer && right.kind == TokenKind::Float {
            self.convert_below_top(Instruction::Int2Floats, DataType::Double64)?;
        }

        self.emit_arithmetic(op, result)?;
        Ok(result)
    }

    fn check_literal_var_arithmetic(
        &mut self,
        literal: &Token,
        var: &Token,
        op: &Token,
    ) -> CompileResult<()> {
        if literal.kind == TokenKind::Keyword {
            return Err(self.err(ErrorKind::Syntactic, "Unexpected keyword in expression"));
        }
        let symbol = self.expression_symbol(var)?;
        if symbol.ty.is_nullable() {
            return Err(self.err(
                ErrorKind::TypeMismatch,
                format!("Variable \"{}\" is nullable", var.lexeme),
            ));
        }

        let compatible = matches!(
            (literal.kind, symbol.ty),
            (TokenKind::Integer, DataType::Int32) | (TokenKind::Float, DataType::Double64)
        ) || (literal.kind == TokenKind::Integer
            && symbol.ty == DataType::Double64
            && op.kind != TokenKind::Divide)
            || (literal.kind == TokenKind::Float
                && symbol.ty == DataType::Int32
                && has_zero_decimal_places(&literal.lexeme));

        if !compatible {
            return Err(self.err(ErrorKind::TypeMismatch, "Incompatible types in expression"));
        }
        Ok(())
    }

    /// A literal operand converts toward the variable's kind, so the result
    /// follows the variable.
    fn arithmetic_literal_id(
        &mut self,
        literal: &Token,
        symbol: &VariableSymbol,
        op: &Token,
        literal_on_top: bool,
    ) -> CompileResult<DataType> {
        let result;
        if literal.kind == TokenKind::Integer && symbol.ty == DataType::Double64 {
            result = DataType::Double64;
            if literal_on_top {
                self.emitter.emit(Instruction::Int2Floats)?;
            } else {
                self.convert_below_top(Instruction::Int2Floats, DataType::Double64)?;
            }
        } else if literal.kind == TokenKind::Float && symbol.ty == DataType::Int32 {
            result = DataType::Int32;
            if literal_on_top {
                self.emitter.emit(Instruction::Float2Ints)?;
            } else {
                self.convert_below_top(Instruction::Float2Ints, DataType::Int32)?;
            }
        } else {
            result = if literal.kind == TokenKind::Float || symbol.ty == DataType::Double64 {
                DataType::Double64
            } else {
                DataType::Int32
            };
        }

        self.emit_arithmetic(op, result)?;
        Ok(result)
    }

    fn check_two_vars_arithmetic(&mut self, left: &Token, right: &Token) -> CompileResult<()> {
        let lhs = self.expression_symbol(left)?;
        let rhs = self.expression_symbol(right)?;

        for (token, symbol) in [(left, &lhs), (right, &rhs)] {
            if symbol.ty.is_nullable() {
                return Err(self.err(
                    ErrorKind::TypeMismatch,
                    format!("Variable \"{}\" is nullable", token.lexeme),
                ));
            }
        }
        if lhs.ty != rhs.ty {
            return Err(self.err(ErrorKind::TypeMismatch, "Incompatible types in expression"));
        }
        Ok(())
    }

    fn emit_arithmetic(&mut self, op: &Token, result: DataType) -> CompileResult<()> {
        let instruction = match op.kind {
            TokenKind::Multiply => Instruction::Muls,
            TokenKind::Divide => {
                if result == DataType::Double64 {
                    Instruction::Divs
                } else {
                    Instruction::IDivs
                }
            }
            TokenKind::Plus => Instruction::Adds,
            TokenKind::Minus => Instruction::Subs,
            _ => {
                return Err(self.err(ErrorKind::Internal, "invalid arithmetic operator"));
            }
        };
        self.emitter.emit(instruction)
    }

    // ------------------------------------------------------------------
    // Relational operators
    // ------------------------------------------------------------------

    fn relational_operation(
        &mut self,
        left: &Token,
        right: &Token,
        op: &Token,
    ) -> CompileResult<()> {
        let left_is_id = left.kind == TokenKind::Identifier;
        let right_is_id = right.kind == TokenKind::Identifier;

        if !left_is_id && !right_is_id {
            self.check_literals_relational(left, right, op)?;
            if left.kind == TokenKind::Float && right.kind == TokenKind::Integer {
                self.emitter.emit(Instruction::Int2Floats)?;
            } else if left.kind == TokenKind::Integer && right.kind == TokenKind::Float {
                self.convert_below_top(Instruction::Int2Floats, DataType::Double64)?;
            }
        } else if left_is_id != right_is_id {
            let (literal, var, literal_on_top) = if left_is_id {
                (right, left, true)
            } else {
                (left, right, false)
            };
            self.check_literal_var_relational(literal, var, op)?;
            let symbol = self.expression_symbol(var)?;
            if literal.kind == TokenKind::Integer && symbol.ty == DataType::Double64 {
                if literal_on_top {
                    self.emitter.emit(Instruction::Int2Floats)?;
                } else {
                    self.convert_below_top(Instruction::Int2Floats, DataType::Double64)?;
                }
            } else if literal.kind == TokenKind::Float && symbol.ty == DataType::Int32 {
                if literal_on_top {
                    self.emitter.emit(Instruction::Float2Ints)?;
                } else {
                    self.convert_below_top(Instruction::Float2Ints, DataType::Int32)?;
                }
            }
        } else {
            self.check_two_vars_relational(left, right, op)?;
        }

        self.emit_relational(op)
    }

    fn check_literals_relational(
        &self,
        left: &Token,
        right: &Token,
        op: &Token,
    ) -> CompileResult<()> {
        let equality = matches!(op.kind, TokenKind::Equal | TokenKind::NotEqual);
        if left.kind == TokenKind::Keyword && right.kind == TokenKind::Keyword && !equality {
            return Err(self.err(
                ErrorKind::TypeMismatch,
                "\"null\" can only be compared with \"==\" and \"!=\"",
            ));
        }
        if (left.kind == TokenKind::Keyword) != (right.kind == TokenKind::Keyword) {
            return Err(self.err(ErrorKind::TypeMismatch, "Incompatible types in expression"));
        }
        Ok(())
    }

    fn check_literal_var_relational(
        &mut self,
        literal: &Token,
        var: &Token,
        op: &Token,
    ) -> CompileResult<()> {
        let symbol = self.expression_symbol(var)?;
        let equality = matches!(op.kind, TokenKind::Equal | TokenKind::NotEqual);

        if literal.kind == TokenKind::Keyword {
            if !equality {
                return Err(self.err(
                    ErrorKind::TypeMismatch,
                    "\"null\" can only be compared with \"==\" and \"!=\"",
                ));
            }
            if !symbol.ty.is_nullable() {
                return Err(self.err(
                    ErrorKind::TypeMismatch,
                    format!("Variable \"{}\" is not nullable", var.lexeme),
                ));
            }
        }

        if symbol.ty.is_nullable() && !equality {
            return Err(self.err(
                ErrorKind::TypeMismatch,
                format!(
                    "Comparing nullable variable \"{}\" with a constant",
                    var.lexeme
                ),
            ));
        }
        if literal.kind == TokenKind::Float
            && symbol.ty == DataType::Int32
            && !has_zero_decimal_places(&literal.lexeme)
        {
            return Err(self.err(ErrorKind::TypeMismatch, "Incompatible types in expression"));
        }
        Ok(())
    }

    fn check_two_vars_relational(
        &mut self,
        left: &Token,
        right: &Token,
        op: &Token,
    ) -> CompileResult<()> {
        let lhs = self.expression_symbol(left)?;
        let rhs = self.expression_symbol(right)?;
        let equality = matches!(op.kind, TokenKind::Equal | TokenKind::NotEqual);

        if !equality && (lhs.ty.is_nullable() || rhs.ty.is_nullable()) {
            return Err(self.err(
                ErrorKind::TypeMismatch,
                "Using nullable variables with operators other than \"==\" or \"!=\"",
            ));
        }
        if lhs.ty != rhs.ty && !self.convert_const_vars(&lhs, &rhs)? {
            return Err(self.err(ErrorKind::TypeMismatch, "Incompatible types in expression"));
        }
        Ok(())
    }

    /// Two same-named-type constants with compile-time values can still be
    /// compared across int/float when the float side is whole; the
    /// conversion happens right on the operand stack. Returns false when no
    /// conversion applies.
    fn convert_const_vars(
        &mut self,
        lhs: &VariableSymbol,
        rhs: &VariableSymbol,
    ) -> CompileResult<bool> {
        let lhs_const = lhs.is_const && lhs.value.is_some();
        let rhs_const = rhs.is_const && rhs.value.is_some();
        if !lhs_const && !rhs_const {
            return Ok(false);
        }
        if (lhs.nullable || rhs.nullable) && lhs.ty != rhs.ty {
            return Ok(false);
        }

        if lhs_const {
            // The left operand sits below the stack top.
            match lhs.ty {
                DataType::Int32 | DataType::Int32Nullable => {
                    self.convert_below_top(Instruction::Int2Floats, DataType::Double64)?;
                }
                DataType::Double64 | DataType::Double64Nullable => {
                    if !has_zero_decimal_places(lhs.value.as_deref().unwrap_or("")) {
                        return Ok(false);
                    }
                    self.convert_below_top(Instruction::Float2Ints, DataType::Int32)?;
                }
                _ => return Ok(false),
            }
        } else {
            match rhs.ty {
                DataType::Int32 | DataType::Int32Nullable => {
                    self.emitter.emit(Instruction::Int2Floats)?;
                }
                DataType::Double64 | DataType::Double64Nullable => {
                    if !has_zero_decimal_places(rhs.value.as_deref().unwrap_or("")) {
                        return Ok(false);
                    }
                    self.emitter.emit(Instruction::Float2Ints)?;
                }
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    fn emit_relational(&mut self, op: &Token) -> CompileResult<()> {
        match op.kind {
            TokenKind::Equal => self.emitter.emit(Instruction::Eqs),
            TokenKind::NotEqual => {
                self.emitter.emit(Instruction::Eqs)?;
                self.emitter.emit(Instruction::Nots)
            }
            TokenKind::Less => self.emitter.emit(Instruction::Lts),
            TokenKind::Greater => self.emitter.emit(Instruction::Gts),
            TokenKind::LessEqual => {
                self.emitter.emit(Instruction::Gts)?;
                self.emitter.emit(Instruction::Nots)
            }
            TokenKind::GreaterEqual => {
                self.emitter.emit(Instruction::Lts)?;
                self.emitter.emit(Instruction::Nots)
            }
            _ => Err(self.err(ErrorKind::Internal, "invalid relational operator")),
        }
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    fn expression_symbol(&self, token: &Token) -> CompileResult<VariableSymbol> {
        self.scopes.find(&token.lexeme).cloned().ok_or_else(|| {
            self.err(
                ErrorKind::UndefinedSymbol,
                format!("Undefined variable \"{}\"", token.lexeme),
            )
        })
    }

    /// Converts the operand below the stack top: the top is parked in the
    /// typed register, the remaining top is converted in place, and the
    /// register is pushed back.
    fn convert_below_top(
        &mut self,
        conversion: Instruction,
        top_type: DataType,
    ) -> CompileResult<()> {
        let register = match top_type {
            DataType::Double64 => "F0",
            _ => "R0",
        };
        self.emitter.pop_to_register(top_type)?;
        self.emitter.emit(conversion)?;
        self.emitter
            .emit(Instruction::Pushs(Operand::register(register)))
    }
}

fn pop_operands(operands: &mut Vec<Token>) -> Option<(Token, Token)> {
    let right = operands.pop()?;
    let left = operands.pop()?;
    Some((left, right))
}

fn has_zero_decimal_places(value: &str) -> bool {
    let value: f64 = value.parse().unwrap_or(0.0);
    value.fract().abs() < EPSILON
}
