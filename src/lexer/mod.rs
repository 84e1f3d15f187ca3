//! Lexical analysis.
//!
//! The lexer consumes the whole input text up front and materializes the
//! token stream the parser indexes into. It is a direct-coded state machine:
//! the top level dispatches on the first non-whitespace character and hands
//! off to a scanning routine per token family. Comments (`//` to end of
//! line) are skipped in place, and every token is tagged with the line it
//! starts on.

mod token;

pub use token::*;

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{CompileError, CompileResult, ErrorKind};

static KEYWORDS: Lazy<HashMap<&'static str, Keyword>> = Lazy::new(|| {
    HashMap::from([
        ("const", Keyword::Const),
        ("else", Keyword::Else),
        ("fn", Keyword::Fn),
        ("if", Keyword::If),
        ("i32", Keyword::I32),
        ("f64", Keyword::F64),
        ("null", Keyword::Null),
        ("pub", Keyword::Pub),
        ("return", Keyword::Return),
        ("u8", Keyword::U8),
        ("var", Keyword::Var),
        ("void", Keyword::Void),
        ("while", Keyword::While),
    ])
});

#[derive(Debug, Clone)]
pub struct Lexer {
    chars: Vec<char>,
    position: usize,
    line: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            position: 0,
            line: 1,
            tokens: vec![],
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.position + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn bump_if(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(ErrorKind::Lexical, self.line, message)
    }

    /// Tokenizes the entire input, ending with a single EOF token.
    pub fn lex(mut self) -> CompileResult<Vec<Token>> {
        loop {
            self.eat_whitespace();

            let Some(c) = self.peek() else {
                self.tokens.push(Token::new(TokenKind::Eof, "", self.line));
                return Ok(self.tokens);
            };

            // Comments restart the loop to re-skip whitespace.
            if c == '/' && self.peek_at(1) == Some('/') {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
                continue;
            }

            let token = self.scan_token(c)?;
            self.tokens.push(token);
        }
    }

    fn eat_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn scan_token(&mut self, c: char) -> CompileResult<Token> {
        let line = self.line;
        match c {
            '=' => {
                self.bump();
                if self.bump_if('=') {
                    Ok(Token::new(TokenKind::Equal, "==", line))
                } else {
                    Ok(Token::new(TokenKind::Assign, "=", line))
                }
            }
            '+' => self.single(TokenKind::Plus, "+"),
            '-' => self.single(TokenKind::Minus, "-"),
            '*' => self.single(TokenKind::Multiply, "*"),
            '/' => self.single(TokenKind::Divide, "/"),
            '!' => {
                self.bump();
                if self.bump_if('=') {
                    Ok(Token::new(TokenKind::NotEqual, "!=", line))
                } else {
                    Err(self.error(format!(
                        "Invalid token '!{}'",
                        self.peek().unwrap_or(' ')
                    )))
                }
            }
            '<' => {
                self.bump();
                if self.bump_if('=') {
                    Ok(Token::new(TokenKind::LessEqual, "<=", line))
                } else {
                    Ok(Token::new(TokenKind::Less, "<", line))
                }
            }
            '>' => {
                self.bump();
                if self.bump_if('=') {
                    Ok(Token::new(TokenKind::GreaterEqual, ">=", line))
                } else {
                    Ok(Token::new(TokenKind::Greater, ">", line))
                }
            }
            '(' => self.single(TokenKind::LeftParen, "("),
            ')' => self.single(TokenKind::RightParen, ")"),
            '{' => self.single(TokenKind::LeftBrace, "{"),
            '}' => self.single(TokenKind::RightBrace, "}"),
            '|' => self.single(TokenKind::VerticalBar, "|"),
            ';' => self.single(TokenKind::Semicolon, ";"),
            ',' => self.single(TokenKind::Comma, ","),
            '.' => self.single(TokenKind::Dot, "."),
            ':' => self.single(TokenKind::Colon, ":"),
            '[' => self.scan_u8_type(false),
            '?' => match self.peek_at(1) {
                Some('[') => {
                    self.bump();
                    self.scan_u8_type(true)
                }
                Some(c) if c.is_ascii_alphanumeric() => self.scan_nullable_type(),
                _ => Err(self.error("Invalid token '?'")),
            },
            '"' => self.scan_string(),
            '\\' => {
                if self.peek_at(1) == Some('\\') {
                    self.bump();
                    self.bump();
                    self.scan_multiline_string(line)
                } else {
                    Err(self.error(format!(
                        "Invalid token '\\{}'",
                        self.peek_at(1).unwrap_or(' ')
                    )))
                }
            }
            '@' => self.scan_import(),
            '0'..='9' => {
                if c == '0' && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) {
                    return Err(self.error(format!(
                        "Invalid token '0{}'",
                        self.peek_at(1).unwrap_or(' ')
                    )));
                }
                self.scan_number()
            }
            c if c.is_ascii_alphabetic() || c == '_' => self.scan_identifier(),
            c => Err(self.error(format!("Invalid token '{c}'"))),
        }
    }

    fn single(&mut self, kind: TokenKind, lexeme: &str) -> CompileResult<Token> {
        let line = self.line;
        self.bump();
        Ok(Token::new(kind, lexeme, line))
    }

    /// Decimal integer by default. A dot switches to float, an `e`/`E`
    /// begins an exponent only when a digit or a signed digit follows,
    /// otherwise the `e` stays in the input and the literal ends.
    fn scan_number(&mut self) -> CompileResult<Token> {
        let line = self.line;
        let mut text = String::new();
        let mut is_float = false;
        let mut has_dot = false;
        let mut has_exponent = false;

        loop {
            match self.peek() {
                Some(d) if d.is_ascii_digit() => {
                    text.push(d);
                    self.bump();
                }
                Some('.') => {
                    if has_dot {
                        return Err(self.error(format!("Invalid token {text}.")));
                    }
                    has_dot = true;
                    is_float = true;
                    text.push('.');
                    self.bump();
                }
                Some(e) if (e == 'e' || e == 'E') && !has_exponent => {
                    let next = self.peek_at(1);
                    let exponent_follows = match next {
                        Some(d) if d.is_ascii_digit() => true,
                        Some('+') | Some('-') => {
                            matches!(self.peek_at(2), Some(d) if d.is_ascii_digit())
                        }
                        _ => false,
                    };
                    if !exponent_follows {
                        break;
                    }
                    has_exponent = true;
                    is_float = true;
                    text.push(e);
                    self.bump();
                    if matches!(self.peek(), Some('+') | Some('-')) {
                        text.push(self.bump().unwrap_or('+'));
                    }
                    while matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
                        text.push(self.bump().unwrap_or('0'));
                    }
                }
                _ => break,
            }
        }

        if is_float {
            // Normalize by parse-and-reprint so that "5.0", "5e0" and
            // "0.5e1" all carry the same attribute.
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(format!("Invalid token {text}")))?;
            Ok(Token::new(TokenKind::Float, value.to_string(), line))
        } else {
            Ok(Token::new(TokenKind::Integer, text, line))
        }
    }

    fn scan_identifier(&mut self) -> CompileResult<Token> {
        let line = self.line;
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            text.push(self.bump().unwrap_or('_'));
        }

        if text == "_" {
            return Ok(Token::new(TokenKind::Underscore, "_", line));
        }

        match KEYWORDS.get(text.as_str()) {
            Some(&keyword) => Ok(Token::keyword(keyword, text, line)),
            None => Ok(Token::new(TokenKind::Identifier, text, line)),
        }
    }

    /// `?i32` and `?f64`: the only keywords the `?` prefix is valid for
    /// (`?[]u8` is consumed separately). Anything else after the `?` is a
    /// lexical error.
    fn scan_nullable_type(&mut self) -> CompileResult<Token> {
        let line = self.line;
        self.bump();
        let mut text = String::from("?");
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            text.push(self.bump().unwrap_or('_'));
        }

        match KEYWORDS.get(&text[1..]).copied() {
            Some(Keyword::I32) => Ok(Token::keyword(Keyword::I32, text, line)),
            Some(Keyword::F64) => Ok(Token::keyword(Keyword::F64, text, line)),
            _ => Err(self.error(format!("Invalid token {text}"))),
        }
    }

    /// `[]u8`, or `?[]u8` when the `?` was already consumed.
    fn scan_u8_type(&mut self, nullable: bool) -> CompileResult<Token> {
        let line = self.line;
        let mut text = String::from(if nullable { "?" } else { "" });
        for expected in ['[', ']', 'u', '8'] {
            if !self.bump_if(expected) {
                return Err(self.error(format!(
                    "Invalid token {text}{}",
                    self.peek().unwrap_or(' ')
                )));
            }
            text.push(expected);
        }
        Ok(Token::keyword(Keyword::U8, text, line))
    }

    fn scan_import(&mut self) -> CompileResult<Token> {
        let line = self.line;
        self.bump();
        for expected in "import".chars() {
            if !self.bump_if(expected) {
                return Err(self.error("Invalid token '@'"));
            }
        }
        Ok(Token::new(TokenKind::Import, "@import", line))
    }

    /// A `"..."` literal. The decoded content is stored raw; re-escaping for
    /// the intermediate code happens in the emitter.
    fn scan_string(&mut self) -> CompileResult<Token> {
        let line = self.line;
        self.bump();
        let mut text = String::new();

        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(self.error("String missing a second \""));
                }
                Some('"') => {
                    self.bump();
                    return Ok(Token::new(TokenKind::StringLit, text, line));
                }
                Some('\\') => {
                    self.bump();
                    match self.bump() {
                        Some('"') => text.push('"'),
                        Some('n') => text.push('\n'),
                        Some('r') => text.push('\r'),
                        Some('t') => text.push('\t'),
                        Some('\\') => text.push('\\'),
                        Some('x') => text.push(self.scan_hex_escape()?),
                        other => {
                            return Err(self.error(format!(
                                "Invalid escape sequence '\\{}' in a literal",
                                other.unwrap_or(' ')
                            )));
                        }
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.bump();
                }
            }
        }
    }

    fn scan_hex_escape(&mut self) -> CompileResult<char> {
        let mut value = 0u32;
        for _ in 0..2 {
            let digit = match self.bump() {
                Some(d) if d.is_ascii_hexdigit() => d.to_digit(16).unwrap_or(0),
                other => {
                    return Err(self.error(format!(
                        "Invalid hexadecimal escape sequence '\\x{}'",
                        other.unwrap_or(' ')
                    )));
                }
            };
            value = value * 16 + digit;
        }
        Ok(char::from_u32(value).unwrap_or('\0'))
    }

    /// A `\\`-introduced multi-line literal: bytes accumulate until the end
    /// of the line, then another `\\` past whitespace continues the literal
    /// with an implicit newline.
    fn scan_multiline_string(&mut self, line: usize) -> CompileResult<Token> {
        let mut text = String::new();

        loop {
            match self.bump() {
                None => return Err(self.error("Unexpected end of file")),
                Some('\n') => {
                    if self.multiline_continues() {
                        text.push('\n');
                    } else {
                        return Ok(Token::new(TokenKind::StringLit, text, line));
                    }
                }
                Some(c) => text.push(c),
            }
        }
    }

    /// Looks past whitespace for another `\\` pair; consumes it when found.
    /// A newline or any other character ends the literal.
    fn multiline_continues(&mut self) -> bool {
        loop {
            match self.peek() {
                Some('\\') if self.peek_at(1) == Some('\\') => {
                    self.bump();
                    self.bump();
                    return true;
                }
                Some('\n') => {
                    self.bump();
                    return false;
                }
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                _ => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .lex()
            .expect("lexing failed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_lex_identifier() {
        let tokens = Lexer::new("letter").lex().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::new(TokenKind::Identifier, "letter", 1),
                Token::new(TokenKind::Eof, "", 1),
            ]
        );
    }

    #[test]
    fn test_lex_declaration() {
        let tokens = Lexer::new("const foo = 42;").lex().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::keyword(Keyword::Const, "const", 1),
                Token::new(TokenKind::Identifier, "foo", 1),
                Token::new(TokenKind::Assign, "=", 1),
                Token::new(TokenKind::Integer, "42", 1),
                Token::new(TokenKind::Semicolon, ";", 1),
                Token::new(TokenKind::Eof, "", 1),
            ]
        );
    }

    #[test]
    fn test_lex_operators() {
        assert_eq!(
            kinds("== != <= >= < > = + - * /"),
            vec![
                TokenKind::Equal,
                TokenKind::NotEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::Less,
                TokenKind::Greater,
                TokenKind::Assign,
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Multiply,
                TokenKind::Divide,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_nullable_types() {
        let tokens = Lexer::new("?i32 ?f64 ?[]u8 []u8").lex().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::keyword(Keyword::I32, "?i32", 1),
                Token::keyword(Keyword::F64, "?f64", 1),
                Token::keyword(Keyword::U8, "?[]u8", 1),
                Token::keyword(Keyword::U8, "[]u8", 1),
                Token::new(TokenKind::Eof, "", 1),
            ]
        );
    }

    #[test]
    fn test_lex_nullable_prefix_requires_numeric_type() {
        assert!(Lexer::new("?foo").lex().is_err());
        assert!(Lexer::new("? ").lex().is_err());
        // Only i32 and f64 take the prefix; other keywords do not.
        assert!(Lexer::new("?while").lex().is_err());
        assert!(Lexer::new("?null").lex().is_err());
        assert!(Lexer::new("?void").lex().is_err());
        assert!(Lexer::new("?u8").lex().is_err());
    }

    #[test]
    fn test_lex_underscore() {
        assert_eq!(
            kinds("_ = _x;"),
            vec![
                TokenKind::Underscore,
                TokenKind::Assign,
                TokenKind::Identifier,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_float_normalization() {
        let tokens = Lexer::new("5.0 5e0 0.5e1").lex().unwrap();
        assert_eq!(tokens[0].lexeme, "5");
        assert_eq!(tokens[1].lexeme, "5");
        assert_eq!(tokens[2].lexeme, "5");
        assert!(tokens[..3].iter().all(|t| t.kind == TokenKind::Float));
    }

    #[test]
    fn test_lex_exponent_backtracking() {
        // The 'e' is not followed by a digit, so it starts an identifier.
        let tokens = Lexer::new("3else").lex().unwrap();
        assert_eq!(tokens[0], Token::new(TokenKind::Integer, "3", 1));
        assert_eq!(tokens[1], Token::keyword(Keyword::Else, "else", 1));
    }

    #[test]
    fn test_lex_leading_zero() {
        assert!(Lexer::new("0123").lex().is_err());
        assert!(Lexer::new("0").lex().is_ok());
    }

    #[test]
    fn test_lex_second_dot_is_error() {
        assert!(Lexer::new("3.14.15").lex().is_err());
    }

    #[test]
    fn test_lex_string_escapes() {
        let tokens = Lexer::new(r#""a\n\t\\\"\x41""#).lex().unwrap();
        assert_eq!(tokens[0].lexeme, "a\n\t\\\"A");
    }

    #[test]
    fn test_lex_unterminated_string() {
        assert!(Lexer::new("\"abc\n\"").lex().is_err());
        assert!(Lexer::new("\"abc").lex().is_err());
    }

    #[test]
    fn test_lex_multiline_string() {
        let tokens = Lexer::new("\\\\first\n  \\\\second\nx").lex().unwrap();
        assert_eq!(tokens[0], Token::new(TokenKind::StringLit, "first\nsecond", 1));
        assert_eq!(tokens[1], Token::new(TokenKind::Identifier, "x", 3));
    }

    #[test]
    fn test_lex_empty_multiline_string() {
        let tokens = Lexer::new("\\\\\n").lex().unwrap();
        assert_eq!(tokens[0], Token::new(TokenKind::StringLit, "", 1));
    }

    #[test]
    fn test_lex_import_marker() {
        let tokens = Lexer::new("@import").lex().unwrap();
        assert_eq!(tokens[0], Token::new(TokenKind::Import, "@import", 1));
        assert!(Lexer::new("@includ").lex().is_err());
    }

    #[test]
    fn test_lex_comments_and_lines() {
        let tokens = Lexer::new("a // comment\nb").lex().unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn test_lex_lone_bang_is_error() {
        assert!(Lexer::new("!x").lex().is_err());
    }
}
