//! Emission of IFJcode24 intermediate code.
//!
//! Instructions are modeled as an enum with a `Display` implementation, one
//! line per instruction, written unbuffered to the sink. The [`Emitter`]
//! additionally owns the label counters for control flow and for the
//! built-ins that expand into inline labeled routines.

mod float;

pub use float::hex_float;

use std::fmt::Display;
use std::io::Write;

use crate::error::CompileResult;
use crate::lexer::{Token, TokenKind};
use crate::symtable::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Global,
    Local,
    Temporary,
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Frame::Global => "GF",
            Frame::Local => "LF",
            Frame::Temporary => "TF",
        })
    }
}

/// A symbol or literal operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Var(Frame, String),
    Int(String),
    Float(f64),
    Str(String),
    Bool(bool),
    Nil,
}

impl Operand {
    pub fn local(name: impl Into<String>) -> Self {
        Operand::Var(Frame::Local, name.into())
    }

    pub fn temporary(name: impl Into<String>) -> Self {
        Operand::Var(Frame::Temporary, name.into())
    }

    /// The global registers are `$`-prefixed so they can never collide with
    /// user variables.
    pub fn register(name: &str) -> Self {
        Operand::Var(Frame::Global, format!("${name}"))
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Var(frame, name) => write!(f, "{frame}@{name}"),
            Operand::Int(value) => write!(f, "int@{value}"),
            Operand::Float(value) => write!(f, "float@{}", hex_float(*value)),
            Operand::Str(value) => write!(f, "string@{}", escape_string(value)),
            Operand::Bool(value) => write!(f, "bool@{value}"),
            Operand::Nil => f.write_str("nil@nil"),
        }
    }
}

/// Escapes a decoded string for the IR: whitespace, control characters and
/// the characters special to the target format become `\NNN` decimal codes.
pub fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        let code = c as u32;
        if code <= 32 || (127..=255).contains(&code) || matches!(c, '#' | '\\' | '\'' | '"') {
            escaped.push_str(&format!("\\{code:03}"));
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Converts an argument token into the operand it denotes: identifiers are
/// frame-qualified (local), literals are type-qualified.
pub fn token_operand(token: &Token) -> Operand {
    match token.kind {
        TokenKind::Identifier => Operand::local(token.lexeme.clone()),
        TokenKind::Integer => Operand::Int(token.lexeme.clone()),
        TokenKind::Float => Operand::Float(token.lexeme.parse().unwrap_or(0.0)),
        TokenKind::StringLit => Operand::Str(token.lexeme.clone()),
        _ => Operand::Nil,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    DefVar(Operand),
    Move(Operand, Operand),
    CreateFrame,
    PushFrame,
    PopFrame,
    Call(String),
    Return,
    Label(String),
    Jump(String),
    JumpIfEq(String, Operand, Operand),
    Pushs(Operand),
    Pops(Operand),
    Clears,
    Adds,
    Subs,
    Muls,
    Divs,
    IDivs,
    Int2Floats,
    Float2Ints,
    Eqs,
    Lts,
    Gts,
    Nots,
    Add(Operand, Operand, Operand),
    Sub(Operand, Operand, Operand),
    Lt(Operand, Operand, Operand),
    Gt(Operand, Operand, Operand),
    Eq(Operand, Operand, Operand),
    Or(Operand, Operand, Operand),
    Strlen(Operand, Operand),
    Concat(Operand, Operand, Operand),
    GetChar(Operand, Operand, Operand),
    Stri2Int(Operand, Operand, Operand),
    Int2Char(Operand, Operand),
    Int2Float(Operand, Operand),
    Float2Int(Operand, Operand),
    Read(Operand, &'static str),
    Write(Operand),
    Exit(Operand),
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Instruction::*;
        match self {
            DefVar(var) => write!(f, "DEFVAR {var}"),
            Move(dst, src) => write!(f, "MOVE {dst} {src}"),
            CreateFrame => f.write_str("CREATEFRAME"),
            PushFrame => f.write_str("PUSHFRAME"),
            PopFrame => f.write_str("POPFRAME"),
            Call(label) => write!(f, "CALL {label}"),
            Return => f.write_str("RETURN"),
            Label(label) => write!(f, "LABEL {label}"),
            Jump(label) => write!(f, "JUMP {label}"),
            JumpIfEq(label, a, b) => write!(f, "JUMPIFEQ {label} {a} {b}"),
            Pushs(symb) => write!(f, "PUSHS {symb}"),
            Pops(var) => write!(f, "POPS {var}"),
            Clears => f.write_str("CLEARS"),
            Adds => f.write_str("ADDS"),
            Subs => f.write_str("SUBS"),
            Muls => f.write_str("MULS"),
            Divs => f.write_str("DIVS"),
            IDivs => f.write_str("IDIVS"),
            Int2Floats => f.write_str("INT2FLOATS"),
            Float2Ints => f.write_str("FLOAT2INTS"),
            Eqs => f.write_str("EQS"),
            Lts => f.write_str("LTS"),
            Gts => f.write_str("GTS"),
            Nots => f.write_str("NOTS"),
            Add(dst, a, b) => write!(f, "ADD {dst} {a} {b}"),
            Sub(dst, a, b) => write!(f, "SUB {dst} {a} {b}"),
            Lt(dst, a, b) => write!(f, "LT {dst} {a} {b}"),
            Gt(dst, a, b) => write!(f, "GT {dst} {a} {b}"),
            Eq(dst, a, b) => write!(f, "EQ {dst} {a} {b}"),
            Or(dst, a, b) => write!(f, "OR {dst} {a} {b}"),
            Strlen(dst, src) => write!(f, "STRLEN {dst} {src}"),
            Concat(dst, a, b) => write!(f, "CONCAT {dst} {a} {b}"),
            GetChar(dst, src, index) => write!(f, "GETCHAR {dst} {src} {index}"),
            Stri2Int(dst, src, index) => write!(f, "STRI2INT {dst} {src} {index}"),
            Int2Char(dst, src) => write!(f, "INT2CHAR {dst} {src}"),
            Int2Float(dst, src) => write!(f, "INT2FLOAT {dst} {src}"),
            Float2Int(dst, src) => write!(f, "FLOAT2INT {dst} {src}"),
            Read(dst, ty) => write!(f, "READ {dst} {ty}"),
            Write(symb) => write!(f, "WRITE {symb}"),
            Exit(code) => write!(f, "EXIT {code}"),
        }
    }
}

/// Writes instructions to the output sink and owns every label counter, so
/// that generated labels never collide across expansions.
pub struct Emitter<W: Write> {
    out: W,
    if_count: usize,
    while_count: usize,
    strcmp_count: usize,
    ord_count: usize,
    substring_count: usize,
}

impl<W: Write> Emitter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            if_count: 0,
            while_count: 0,
            strcmp_count: 0,
            ord_count: 0,
            substring_count: 0,
        }
    }

    pub fn emit(&mut self, instruction: Instruction) -> CompileResult<()> {
        writeln!(self.out, "{instruction}")?;
        Ok(())
    }

    /// Program header, global register definitions and the jump to `main`.
    pub fn preamble(&mut self) -> CompileResult<()> {
        writeln!(self.out, ".IFJcode24")?;
        for register in [
            "R0", "F0", "B0", "S0", "R1", "R2", "F1", "F2", "B1", "B2", "S1", "S2",
        ] {
            self.emit(Instruction::DefVar(Operand::register(register)))?;
        }
        self.emit(Instruction::Jump("main".to_string()))
    }

    pub fn alloc_if_label(&mut self) -> usize {
        let id = self.if_count;
        self.if_count += 1;
        id
    }

    pub fn alloc_while_label(&mut self) -> usize {
        let id = self.while_count;
        self.while_count += 1;
        id
    }

    /// Pops the expression result into the typed result register.
    pub fn pop_to_register(&mut self, ty: DataType) -> CompileResult<()> {
        let register = match ty {
            DataType::Int32 => "R0",
            DataType::Double64 => "F0",
            DataType::Boolean => "B0",
            _ => return Ok(()),
        };
        self.emit(Instruction::Pops(Operand::register(register)))
    }

    /// `READ <dst> <type>`; the type name comes from the destination's type,
    /// falling back to the built-in's return type while the destination is
    /// still untyped.
    pub fn read(
        &mut self,
        dst: Option<&str>,
        dst_ty: DataType,
        default_ty: DataType,
    ) -> CompileResult<()> {
        let Some(dst) = dst else { return Ok(()) };
        let ty = if dst_ty == DataType::Void {
            default_ty
        } else {
            dst_ty
        };
        let name = match ty.denullified() {
            DataType::Int32 => "int",
            DataType::Double64 => "float",
            DataType::U8Array => "string",
            DataType::Boolean => "bool",
            _ => "int",
        };
        self.emit(Instruction::Read(Operand::local(dst), name))
    }

    pub fn write_value(&mut self, arg: &Token) -> CompileResult<()> {
        self.emit(Instruction::Write(token_operand(arg)))
    }

    pub fn int2float(&mut self, dst: Option<&str>, arg: &Token) -> CompileResult<()> {
        let Some(dst) = dst else { return Ok(()) };
        self.emit(Instruction::Int2Float(Operand::local(dst), token_operand(arg)))
    }

    pub fn float2int(&mut self, dst: Option<&str>, arg: &Token) -> CompileResult<()> {
        let Some(dst) = dst else { return Ok(()) };
        self.emit(Instruction::Float2Int(Operand::local(dst), token_operand(arg)))
    }

    pub fn strlen(&mut self, dst: Option<&str>, arg: &Token) -> CompileResult<()> {
        let Some(dst) = dst else { return Ok(()) };
        self.emit(Instruction::Strlen(Operand::local(dst), token_operand(arg)))
    }

    pub fn concat(&mut self, dst: Option<&str>, a: &Token, b: &Token) -> CompileResult<()> {
        let Some(dst) = dst else { return Ok(()) };
        self.emit(Instruction::Concat(
            Operand::local(dst),
            token_operand(a),
            token_operand(b),
        ))
    }

    pub fn int2char(&mut self, dst: Option<&str>, arg: &Token) -> CompileResult<()> {
        let Some(dst) = dst else { return Ok(()) };
        self.emit(Instruction::Int2Char(Operand::local(dst), token_operand(arg)))
    }

    /// `ifj.string` has no machine counterpart; a plain move materializes
    /// the value.
    pub fn string_move(&mut self, dst: Option<&str>, arg: &Token) -> CompileResult<()> {
        let Some(dst) = dst else { return Ok(()) };
        let src = if arg.kind == TokenKind::Identifier {
            Operand::local(arg.lexeme.clone())
        } else {
            Operand::Str(arg.lexeme.clone())
        };
        self.emit(Instruction::Move(Operand::local(dst), src))
    }

    /// Three-way string comparison: -1, 0 or 1 in `dst`. Clobbers `$B1` and
    /// `$B2`.
    pub fn strcmp(&mut self, dst: Option<&str>, a: &Token, b: &Token) -> CompileResult<()> {
        use Instruction::*;
        let Some(dst) = dst else { return Ok(()) };
        let dst = Operand::local(dst);
        let (a, b) = (token_operand(a), token_operand(b));
        let id = self.strcmp_count;
        self.strcmp_count += 1;

        self.emit(Gt(Operand::register("B1"), a.clone(), b.clone()))?;
        self.emit(Gt(Operand::register("B2"), b, a))?;
        self.emit(JumpIfEq(
            format!("FIRSTGREATER{id}"),
            Operand::register("B1"),
            Operand::Bool(true),
        ))?;
        self.emit(JumpIfEq(
            format!("SECONDGREATER{id}"),
            Operand::register("B2"),
            Operand::Bool(true),
        ))?;
        self.emit(Jump(format!("AREEQUAL{id}")))?;
        self.emit(Label(format!("FIRSTGREATER{id}")))?;
        self.emit(Move(dst.clone(), Operand::Int("1".to_string())))?;
        self.emit(Jump(format!("ENDSTRCMP{id}")))?;
        self.emit(Label(format!("SECONDGREATER{id}")))?;
        self.emit(Move(dst.clone(), Operand::Int("-1".to_string())))?;
        self.emit(Jump(format!("ENDSTRCMP{id}")))?;
        self.emit(Label(format!("AREEQUAL{id}")))?;
        self.emit(Move(dst, Operand::Int("0".to_string())))?;
        self.emit(Label(format!("ENDSTRCMP{id}")))
    }

    /// Ordinal value of `string[position]`, 0 when the position is out of
    /// range. Clobbers `$R0`, `$B0`-`$B2`.
    pub fn ord(&mut self, dst: Option<&str>, string: &Token, position: &Token) -> CompileResult<()> {
        use Instruction::*;
        let Some(dst) = dst else { return Ok(()) };
        let dst = Operand::local(dst);
        let (string, position) = (token_operand(string), token_operand(position));
        let id = self.ord_count;
        self.ord_count += 1;

        self.emit(Strlen(Operand::register("R0"), string.clone()))?;
        self.emit(JumpIfEq(
            format!("ORDRETURN0{id}"),
            Operand::register("R0"),
            Operand::Int("0".to_string()),
        ))?;
        self.emit(Lt(
            Operand::register("B2"),
            position.clone(),
            Operand::Int("0".to_string()),
        ))?;
        self.emit(Sub(
            Operand::register("R0"),
            Operand::register("R0"),
            Operand::Int("1".to_string()),
        ))?;
        self.emit(Gt(
            Operand::register("B1"),
            position.clone(),
            Operand::register("R0"),
        ))?;
        self.emit(Or(
            Operand::register("B0"),
            Operand::register("B1"),
            Operand::register("B2"),
        ))?;
        self.emit(JumpIfEq(
            format!("ORDRETURN0{id}"),
            Operand::register("B0"),
            Operand::Bool(true),
        ))?;
        self.emit(Stri2Int(dst.clone(), string, position))?;
        self.emit(Jump(format!("ENDORD{id}")))?;
        self.emit(Label(format!("ORDRETURN0{id}")))?;
        self.emit(Move(dst, Operand::Int("0".to_string())))?;
        self.emit(Label(format!("ENDORD{id}")))
    }

    /// Substring of `s` over `[begin, end)`: null on any invalid bound, the
    /// empty string when `begin == end`, otherwise a character-by-character
    /// copy loop. Clobbers `$R0`-`$R2`, `$B0`-`$B2`, `$S0`, `$S1`.
    pub fn substring(
        &mut self,
        dst: Option<&str>,
        string: &Token,
        begin: &Token,
        end: &Token,
    ) -> CompileResult<()> {
        use Instruction::*;
        let Some(dst) = dst else { return Ok(()) };
        let dst = Operand::local(dst);
        let string = token_operand(string);
        let (begin, end) = (token_operand(begin), token_operand(end));
        let id = self.substring_count;
        self.substring_count += 1;

        let (r0, r1, r2) = (
            Operand::register("R0"),
            Operand::register("R1"),
            Operand::register("R2"),
        );
        let (b0, b1, b2) = (
            Operand::register("B0"),
            Operand::register("B1"),
            Operand::register("B2"),
        );
        let (s0, s1) = (Operand::register("S0"), Operand::register("S1"));
        let zero = Operand::Int("0".to_string());
        let one = Operand::Int("1".to_string());

        // Bounds validation; any failed check routes to the null exit.
        self.emit(Move(r0.clone(), begin))?;
        self.emit(Move(r1.clone(), end))?;
        self.emit(Strlen(r2.clone(), string.clone()))?;
        self.emit(Lt(b1.clone(), r0.clone(), zero.clone()))?;
        self.emit(Lt(b2.clone(), r1.clone(), zero))?;
        self.emit(Or(b0.clone(), b1.clone(), b2.clone()))?;
        self.emit(Gt(b1.clone(), r0.clone(), r1.clone()))?;
        self.emit(Or(b0.clone(), b0.clone(), b1.clone()))?;
        self.emit(Gt(b1.clone(), r0.clone(), r2.clone()))?;
        self.emit(Eq(b2.clone(), r0.clone(), r2.clone()))?;
        self.emit(Or(b1.clone(), b1.clone(), b2.clone()))?;
        self.emit(Or(b0.clone(), b0.clone(), b1.clone()))?;
        self.emit(Gt(b1.clone(), r1.clone(), r2.clone()))?;
        self.emit(Or(b0.clone(), b0.clone(), b1.clone()))?;
        self.emit(JumpIfEq(
            format!("SUBSTRINGRETURNNULL{id}"),
            b0.clone(),
            Operand::Bool(true),
        ))?;

        // begin == end produces the empty string without entering the loop.
        self.emit(Eq(b0.clone(), r0.clone(), r1.clone()))?;
        self.emit(JumpIfEq(
            format!("SUBSTRINGRETURNEMPTY{id}"),
            b0.clone(),
            Operand::Bool(true),
        ))?;

        // Copy loop; $B2 flags the first character.
        self.emit(Move(b2.clone(), Operand::Bool(true)))?;
        self.emit(Label(format!("SUBSTRINGWHILE{id}")))?;
        self.emit(Lt(b0.clone(), r0.clone(), r1.clone()))?;
        self.emit(JumpIfEq(
            format!("SUBSTRINGWHILEEND{id}"),
            b0,
            Operand::Bool(false),
        ))?;
        self.emit(GetChar(s1.clone(), string, r0.clone()))?;
        self.emit(JumpIfEq(
            format!("SUBSTRINGFIRSTCHAR{id}"),
            b2.clone(),
            Operand::Bool(true),
        ))?;
        self.emit(Concat(s0.clone(), s0.clone(), s1.clone()))?;
        self.emit(Jump(format!("SUBSTRINGNOTFIRSTCHAR{id}")))?;
        self.emit(Label(format!("SUBSTRINGFIRSTCHAR{id}")))?;
        self.emit(Move(s0.clone(), s1))?;
        self.emit(Move(b2, Operand::Bool(false)))?;
        self.emit(Label(format!("SUBSTRINGNOTFIRSTCHAR{id}")))?;
        self.emit(Add(r0.clone(), r0, one))?;
        self.emit(Jump(format!("SUBSTRINGWHILE{id}")))?;
        self.emit(Label(format!("SUBSTRINGWHILEEND{id}")))?;
        self.emit(Move(dst.clone(), s0))?;
        self.emit(Jump(format!("SUBSTRINGEND{id}")))?;

        self.emit(Label(format!("SUBSTRINGRETURNNULL{id}")))?;
        self.emit(Move(dst.clone(), Operand::Nil))?;
        self.emit(Jump(format!("SUBSTRINGEND{id}")))?;

        self.emit(Label(format!("SUBSTRINGRETURNEMPTY{id}")))?;
        self.emit(Move(dst, Operand::Str(String::new())))?;

        self.emit(Label(format!("SUBSTRINGEND{id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_display() {
        assert_eq!(Operand::local("x").to_string(), "LF@x");
        assert_eq!(Operand::register("R0").to_string(), "GF@$R0");
        assert_eq!(Operand::Int("42".to_string()).to_string(), "int@42");
        assert_eq!(Operand::Float(5.0).to_string(), "float@0x1.4p+2");
        assert_eq!(Operand::Bool(false).to_string(), "bool@false");
        assert_eq!(Operand::Nil.to_string(), "nil@nil");
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(escape_string("a b"), "a\\032b");
        assert_eq!(escape_string("new\nline"), "new\\010line");
        assert_eq!(escape_string("tab\there"), "tab\\009here");
        assert_eq!(escape_string("back\\slash"), "back\\092slash");
        assert_eq!(escape_string("hash#"), "hash\\035");
        assert_eq!(escape_string("plain"), "plain");
    }

    #[test]
    fn test_instruction_display() {
        let mov = Instruction::Move(
            Operand::local("x"),
            Operand::Int("5".to_string()),
        );
        assert_eq!(mov.to_string(), "MOVE LF@x int@5");

        let jump = Instruction::JumpIfEq(
            "$else0".to_string(),
            Operand::register("B0"),
            Operand::Bool(false),
        );
        assert_eq!(jump.to_string(), "JUMPIFEQ $else0 GF@$B0 bool@false");
    }

    #[test]
    fn test_preamble() {
        let mut out = Vec::new();
        Emitter::new(&mut out).preamble().unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(".IFJcode24\n"));
        assert!(text.contains("DEFVAR GF@$R0"));
        assert!(text.contains("DEFVAR GF@$S2"));
        assert!(text.ends_with("JUMP main\n"));
    }

    #[test]
    fn test_substring_labels_do_not_collide() {
        let mut out = Vec::new();
        let mut emitter = Emitter::new(&mut out);
        let s = Token::new(TokenKind::Identifier, "s", 1);
        let i = Token::new(TokenKind::Integer, "0", 1);
        emitter.substring(Some("a"), &s, &i, &i).unwrap();
        emitter.substring(Some("b"), &s, &i, &i).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("LABEL SUBSTRINGEND0"));
        assert!(text.contains("LABEL SUBSTRINGEND1"));
    }

    #[test]
    fn test_ord_checks_bounds() {
        let mut out = Vec::new();
        let mut emitter = Emitter::new(&mut out);
        let s = Token::new(TokenKind::StringLit, "abc", 1);
        let i = Token::new(TokenKind::Integer, "7", 1);
        emitter.ord(Some("c"), &s, &i).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("STRLEN GF@$R0 string@abc"));
        assert!(text.contains("MOVE LF@c int@0"));
    }
}
