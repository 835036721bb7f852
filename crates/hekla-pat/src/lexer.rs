//   Copyright (c) 2024-2026 Anton Kundenko <singaraiona@gmail.com>
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

// One-pass scanner. Whitespace and comments separate tokens and advance the
// line counter; brace matching is left to the parser. A failed lex discards
// all partial tokens and reports a single diagnostic.

use crate::token::{Keyword, Literal, Operator, Separator, Token, TokenKind, ValueType};
use crate::{Diagnostic, ErrorKind, Result};

/// Lex a (preprocessed) source text into a token stream. The terminating
/// `EndOfProgram` separator is always appended on success.
pub fn lex(source: &str) -> Result<Vec<Token>> {
    Lexer { bytes: source.as_bytes(), source, pos: 0, line: 1 }.run()
}

struct Lexer<'a> {
    bytes: &'a [u8],
    source: &'a str,
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(&b) = self.bytes.get(self.pos) {
            match b {
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'/' if self.peek(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment()?,
                b'\'' => {
                    let lit = self.lex_char_literal()?;
                    tokens.push(self.token(TokenKind::Literal(lit)));
                }
                b'"' => {
                    let lit = self.lex_string_literal()?;
                    tokens.push(self.token(TokenKind::Literal(lit)));
                }
                b'0'..=b'9' => {
                    let lit = self.lex_number()?;
                    tokens.push(self.token(TokenKind::Literal(lit)));
                }
                b if b.is_ascii_alphabetic() || b == b'_' => {
                    let kind = self.lex_word();
                    tokens.push(self.token(kind));
                }
                _ => {
                    let kind = self.lex_symbol()?;
                    tokens.push(self.token(kind));
                }
            }
        }
        tokens.push(Token::new(TokenKind::Separator(Separator::EndOfProgram), self.line));
        Ok(tokens)
    }

    fn token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.line)
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(kind, self.line, message)
    }

    fn skip_line_comment(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            self.pos += 1;
            if b == b'\n' {
                self.line += 1;
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<()> {
        self.pos += 2;
        loop {
            match self.bytes.get(self.pos) {
                Some(b'*') if self.peek(1) == Some(b'/') => {
                    self.pos += 2;
                    return Ok(());
                }
                Some(b'\n') => {
                    self.line += 1;
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
                None => return Err(self.error(ErrorKind::UnknownToken, "unterminated comment")),
            }
        }
    }

    // ------------------------------------------------------------------
    // Symbols
    // ------------------------------------------------------------------

    fn lex_symbol(&mut self) -> Result<TokenKind> {
        use Operator::*;
        use Separator::*;

        let two = [self.bytes[self.pos], self.peek(1).unwrap_or(0)];
        let kind = match &two {
            b"::" => TokenKind::Separator(ScopeResolution),
            b"==" => TokenKind::Operator(Equals),
            b"!=" => TokenKind::Operator(NotEquals),
            b">=" => TokenKind::Operator(GreaterEquals),
            b"<=" => TokenKind::Operator(LessEquals),
            b"&&" => TokenKind::Operator(BoolAnd),
            b"||" => TokenKind::Operator(BoolOr),
            b"^^" => TokenKind::Operator(BoolXor),
            b"<<" => TokenKind::Operator(ShiftLeft),
            b">>" => TokenKind::Operator(ShiftRight),
            _ => {
                let kind = match two[0] {
                    b';' => TokenKind::Separator(Semicolon),
                    b'(' => TokenKind::Separator(OpenParen),
                    b')' => TokenKind::Separator(CloseParen),
                    b'{' => TokenKind::Separator(OpenBrace),
                    b'}' => TokenKind::Separator(CloseBrace),
                    b'[' => TokenKind::Separator(OpenBracket),
                    b']' => TokenKind::Separator(CloseBracket),
                    b',' => TokenKind::Separator(Comma),
                    b'.' => TokenKind::Separator(Dot),
                    b'+' => TokenKind::Operator(Plus),
                    b'-' => TokenKind::Operator(Minus),
                    b'*' => TokenKind::Operator(Star),
                    b'/' => TokenKind::Operator(Slash),
                    b'%' => TokenKind::Operator(Percent),
                    b'&' => TokenKind::Operator(BitAnd),
                    b'|' => TokenKind::Operator(BitOr),
                    b'^' => TokenKind::Operator(BitXor),
                    b'~' => TokenKind::Operator(BitNot),
                    b'!' => TokenKind::Operator(BoolNot),
                    b'=' => TokenKind::Operator(Assign),
                    b'>' => TokenKind::Operator(Greater),
                    b'<' => TokenKind::Operator(Less),
                    b'?' => TokenKind::Operator(Ternary),
                    b':' => TokenKind::Operator(Colon),
                    b'@' => TokenKind::Operator(At),
                    b'$' => TokenKind::Operator(Dollar),
                    other => {
                        return Err(self.error(
                            ErrorKind::UnknownToken,
                            format!("unknown token '{}'", other as char),
                        ))
                    }
                };
                self.pos += 1;
                return Ok(kind);
            }
        };
        self.pos += 2;
        Ok(kind)
    }

    // ------------------------------------------------------------------
    // Words: keywords, value types, identifiers
    // ------------------------------------------------------------------

    fn lex_word(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .map_or(false, |b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            self.pos += 1;
        }
        let word = &self.source[start..self.pos];

        let keyword = match word {
            "struct" => Some(Keyword::Struct),
            "union" => Some(Keyword::Union),
            "enum" => Some(Keyword::Enum),
            "bitfield" => Some(Keyword::Bitfield),
            "using" => Some(Keyword::Using),
            "fn" => Some(Keyword::Fn),
            "return" => Some(Keyword::Return),
            "namespace" => Some(Keyword::Namespace),
            "if" => Some(Keyword::If),
            "else" => Some(Keyword::Else),
            "while" => Some(Keyword::While),
            "for" => Some(Keyword::For),
            "break" => Some(Keyword::Break),
            "continue" => Some(Keyword::Continue),
            "in" => Some(Keyword::In),
            "out" => Some(Keyword::Out),
            "be" => Some(Keyword::BigEndian),
            "le" => Some(Keyword::LittleEndian),
            "parent" => Some(Keyword::Parent),
            "this" => Some(Keyword::This),
            "section" => Some(Keyword::Section),
            _ => None,
        };
        if let Some(keyword) = keyword {
            return TokenKind::Keyword(keyword);
        }

        let value_type = match word {
            "u8" => Some(ValueType::U8),
            "s8" => Some(ValueType::S8),
            "u16" => Some(ValueType::U16),
            "s16" => Some(ValueType::S16),
            "u32" => Some(ValueType::U32),
            "s32" => Some(ValueType::S32),
            "u64" => Some(ValueType::U64),
            "s64" => Some(ValueType::S64),
            "u128" => Some(ValueType::U128),
            "s128" => Some(ValueType::S128),
            "float" => Some(ValueType::Float),
            "double" => Some(ValueType::Double),
            "char" => Some(ValueType::Char),
            "char16" => Some(ValueType::Char16),
            "bool" => Some(ValueType::Bool),
            "str" => Some(ValueType::Str),
            "padding" => Some(ValueType::Padding),
            "auto" => Some(ValueType::Auto),
            _ => None,
        };
        if let Some(value_type) = value_type {
            return TokenKind::ValueType(value_type);
        }

        match word {
            "true" => TokenKind::Literal(Literal::Bool(true)),
            "false" => TokenKind::Literal(Literal::Bool(false)),
            "sizeof" => TokenKind::Operator(Operator::SizeOf),
            "addressof" => TokenKind::Operator(Operator::AddressOf),
            _ => TokenKind::Identifier(word.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Numeric literals
    // ------------------------------------------------------------------

    fn lex_number(&mut self) -> Result<Literal> {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .map_or(false, |b| b.is_ascii_alphanumeric() || *b == b'\'' || *b == b'.')
        {
            self.pos += 1;
        }
        let text = &self.source[start..self.pos];
        parse_number(text).ok_or_else(|| {
            self.error(ErrorKind::InvalidLiteral, format!("invalid numeric literal '{text}'"))
        })
    }

    // ------------------------------------------------------------------
    // Character and string literals
    // ------------------------------------------------------------------

    fn lex_char_literal(&mut self) -> Result<Literal> {
        self.pos += 1;
        let c = self
            .read_char_item()
            .ok_or_else(|| self.error(ErrorKind::InvalidLiteral, "invalid character literal"))?;
        if self.bytes.get(self.pos) != Some(&b'\'') {
            return Err(self.error(ErrorKind::InvalidLiteral, "unterminated character literal"));
        }
        self.pos += 1;
        Ok(Literal::Char(c))
    }

    fn lex_string_literal(&mut self) -> Result<Literal> {
        self.pos += 1;
        let mut result = String::new();
        loop {
            match self.bytes.get(self.pos) {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(Literal::Str(result));
                }
                Some(b'\n') | None => {
                    return Err(self.error(ErrorKind::InvalidLiteral, "unterminated string literal"))
                }
                Some(_) => {
                    let c = self.read_char_item().ok_or_else(|| {
                        self.error(ErrorKind::InvalidLiteral, "invalid escape sequence")
                    })?;
                    result.push(c);
                }
            }
        }
    }

    /// One character of a char/string literal, resolving escape sequences.
    fn read_char_item(&mut self) -> Option<char> {
        let b = *self.bytes.get(self.pos)?;
        if b != b'\\' {
            // Multi-byte UTF-8 sequences pass through unchanged.
            let c = self.source[self.pos..].chars().next()?;
            self.pos += c.len_utf8();
            return Some(c);
        }
        let esc = *self.bytes.get(self.pos + 1)?;
        let (c, consumed) = match esc {
            b'a' => ('\x07', 2),
            b'b' => ('\x08', 2),
            b'f' => ('\x0C', 2),
            b'n' => ('\n', 2),
            b'r' => ('\r', 2),
            b't' => ('\t', 2),
            b'v' => ('\x0B', 2),
            b'\\' => ('\\', 2),
            b'\'' => ('\'', 2),
            b'"' => ('"', 2),
            b'x' => {
                let hex = self.source.get(self.pos + 2..self.pos + 4)?;
                let value = u8::from_str_radix(hex, 16).ok()?;
                (value as char, 4)
            }
            b'o' => {
                let oct = self.source.get(self.pos + 2..self.pos + 5)?;
                let value = u16::from_str_radix(oct, 8).ok()?;
                (char::from_u32(value as u32)?, 5)
            }
            _ => return None,
        };
        self.pos += consumed;
        Some(c)
    }
}

/// Parse a numeric literal: `0x/0o/0b` prefixes, `'` digit separators,
/// `U/u/L/l` integer suffixes, `F/f/D/d` float suffixes. Returns None on any
/// malformed input; the caller owns the diagnostic.
pub fn parse_number(text: &str) -> Option<Literal> {
    // Digit separators may not lead or trail.
    if text.starts_with('\'') || text.ends_with('\'') {
        return None;
    }
    let text: String = text.chars().filter(|&c| c != '\'').collect();
    let mut text = text.as_str();

    let has_float_suffix = matches!(text.as_bytes().last(), Some(b'F' | b'f' | b'D' | b'd'));
    let is_float = text.bytes().filter(|&b| b == b'.').count() == 1
        || (!text.starts_with("0x") && !text.starts_with("0X") && has_float_suffix);

    if is_float {
        let mut single = false;
        if has_float_suffix {
            single = matches!(text.as_bytes().last(), Some(b'F' | b'f'));
            text = &text[..text.len() - 1];
        }
        let value: f64 = text.parse().ok()?;
        return Some(Literal::Float(if single { value as f32 as f64 } else { value }));
    }

    // Integer suffixes: U pins unsignedness, L is accepted and ignored.
    let mut unsigned = false;
    loop {
        match text.as_bytes().last() {
            Some(b'U' | b'u') => {
                unsigned = true;
                text = &text[..text.len() - 1];
            }
            Some(b'L' | b'l') => text = &text[..text.len() - 1],
            _ => break,
        }
    }

    let (digits, base) = match text.get(..2) {
        Some("0x") | Some("0X") => (&text[2..], 16),
        Some("0o") | Some("0O") => (&text[2..], 8),
        Some("0b") | Some("0B") => (&text[2..], 2),
        _ => (text, 10),
    };
    if digits.is_empty() {
        return None;
    }

    // Widen through a 128-bit accumulator with overflow detection.
    let mut value: u128 = 0;
    for c in digits.chars() {
        let digit = c.to_digit(base)? as u128;
        value = value.checked_mul(base as u128)?.checked_add(digit)?;
    }

    Some(if unsigned { Literal::Unsigned(value) } else { Literal::Signed(value as i128) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Literal::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn literal(source: &str) -> Literal {
        match kinds(source).into_iter().next().unwrap() {
            TokenKind::Literal(lit) => lit,
            other => panic!("expected literal, got {other:?}"),
        }
    }

    #[test]
    fn scans_a_placement() {
        let tokens = kinds("u32 x @ 0x00;");
        assert_eq!(
            tokens,
            vec![
                TokenKind::ValueType(ValueType::U32),
                TokenKind::Identifier("x".into()),
                TokenKind::Operator(Operator::At),
                TokenKind::Literal(Signed(0)),
                TokenKind::Separator(Separator::Semicolon),
                TokenKind::Separator(Separator::EndOfProgram),
            ]
        );
    }

    #[test]
    fn integer_bases_and_separators() {
        assert_eq!(literal("0xFF"), Signed(255));
        assert_eq!(literal("0o17"), Signed(15));
        assert_eq!(literal("0b1010"), Signed(10));
        assert_eq!(literal("1'000'000"), Signed(1_000_000));
        assert_eq!(literal("0xFFFF'FFFF"), Signed(0xFFFF_FFFF));
    }

    #[test]
    fn integer_suffixes() {
        assert_eq!(literal("42U"), Unsigned(42));
        assert_eq!(literal("42u"), Unsigned(42));
        assert_eq!(literal("42L"), Signed(42));
        assert_eq!(literal("42UL"), Unsigned(42));
    }

    #[test]
    fn float_literals() {
        assert_eq!(literal("1.5"), Float(1.5));
        assert_eq!(literal("2D"), Float(2.0));
        assert_eq!(literal("1.25F"), Float(1.25));
        // 0x prefix disables float-suffix detection: D is a hex digit.
        assert_eq!(literal("0x1D"), Signed(0x1D));
    }

    #[test]
    fn literal_round_trips_within_precision() {
        for text in ["0", "255", "0xDEADBEEF", "170141183460469231731687303715884105727"] {
            let Signed(value) = parse_number(text).unwrap() else { panic!() };
            assert_eq!(parse_number(&value.to_string()), Some(Signed(value)));
        }
    }

    #[test]
    fn overflow_is_an_invalid_literal() {
        // One past u128::MAX.
        let err = lex("340282366920938463463374607431768211456").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidLiteral);
    }

    #[test]
    fn char_and_string_escapes() {
        assert_eq!(literal("'a'"), Char('a'));
        assert_eq!(literal(r"'\n'"), Char('\n'));
        assert_eq!(literal(r"'\x41'"), Char('A'));
        assert_eq!(literal(r"'\o101'"), Char('A'));
        assert_eq!(literal(r#""he\tllo""#), Str("he\tllo".into()));
    }

    #[test]
    fn unterminated_string_fails() {
        let err = lex("\"abc").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidLiteral);
    }

    #[test]
    fn unknown_token_reports_line() {
        let err = lex("u8 a;\n`").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownToken);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn comments_separate_tokens_and_count_lines() {
        let tokens = lex("u8 /* multi\nline */ x; // tail\ny").unwrap();
        assert_eq!(tokens[1].line, 2); // x lands after the block comment
        assert_eq!(tokens[3].line, 3); // y after the line comment
    }

    #[test]
    fn lexing_is_deterministic() {
        let src = "struct A { u8 x; }; A a @ 0x10; // done";
        assert_eq!(lex(src).unwrap(), lex(src).unwrap());
    }

    #[test]
    fn canonical_serialization_round_trips() {
        let src = r#"struct H : Base { be u16 flags; s8 tag[4]; };
H h @ 0x10 + 2U * sizeof(u32);
fn f(auto v) { return v != 3 ? "yes\n" : 'n' + 1.5; }"#;
        let tokens = lex(src).unwrap();
        let canonical = tokens
            .iter()
            .map(|t| t.kind.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let relexed = lex(&canonical).unwrap();
        let kinds = |ts: &[Token]| ts.iter().map(|t| t.kind.clone()).collect::<Vec<_>>();
        assert_eq!(kinds(&tokens), kinds(&relexed));
    }

    #[test]
    fn keywords_and_operators() {
        let tokens = kinds("sizeof addressof be le parent this $ ? :");
        assert_eq!(
            tokens[..9],
            [
                TokenKind::Operator(Operator::SizeOf),
                TokenKind::Operator(Operator::AddressOf),
                TokenKind::Keyword(Keyword::BigEndian),
                TokenKind::Keyword(Keyword::LittleEndian),
                TokenKind::Keyword(Keyword::Parent),
                TokenKind::Keyword(Keyword::This),
                TokenKind::Operator(Operator::Dollar),
                TokenKind::Operator(Operator::Ternary),
                TokenKind::Operator(Operator::Colon),
            ]
        );
    }
}
