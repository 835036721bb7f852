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

// The lexeme inventory of the pattern language.

use hekla::Endian;

/// A lexeme with the line it was found on.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

impl Token {
    pub fn new(kind: TokenKind, line: u32) -> Self {
        Token { kind, line }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Separator(Separator),
    Operator(Operator),
    Keyword(Keyword),
    ValueType(ValueType),
    Literal(Literal),
    Identifier(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Semicolon,
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    OpenBracket,
    CloseBracket,
    Comma,
    Dot,
    ScopeResolution,
    EndOfProgram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    BoolAnd,
    BoolOr,
    BoolXor,
    BoolNot,
    Equals,
    NotEquals,
    Greater,
    Less,
    GreaterEquals,
    LessEquals,
    Assign,
    Ternary,
    /// `:` — ternary separator, pointer width, inheritance, enum underlying type.
    Colon,
    /// `@` placement.
    At,
    /// `$` current read offset.
    Dollar,
    SizeOf,
    AddressOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Struct,
    Union,
    Enum,
    Bitfield,
    Using,
    Fn,
    Return,
    Namespace,
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    In,
    Out,
    BigEndian,
    LittleEndian,
    Parent,
    This,
    Section,
}

/// Built-in value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
    U64,
    S64,
    U128,
    S128,
    Float,
    Double,
    Char,
    Char16,
    Bool,
    Str,
    Padding,
    Auto,
}

impl ValueType {
    /// Width in bytes, None for `str`/`padding`/`auto` whose size is not
    /// fixed by the type alone.
    pub fn width(&self) -> Option<u8> {
        match self {
            ValueType::U8 | ValueType::S8 | ValueType::Char | ValueType::Bool => Some(1),
            ValueType::U16 | ValueType::S16 | ValueType::Char16 => Some(2),
            ValueType::U32 | ValueType::S32 | ValueType::Float => Some(4),
            ValueType::U64 | ValueType::S64 | ValueType::Double => Some(8),
            ValueType::U128 | ValueType::S128 => Some(16),
            ValueType::Str | ValueType::Padding | ValueType::Auto => None,
        }
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            ValueType::U8 | ValueType::U16 | ValueType::U32 | ValueType::U64 | ValueType::U128
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            ValueType::S8 | ValueType::S16 | ValueType::S32 | ValueType::S64 | ValueType::S128
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueType::U8 => "u8",
            ValueType::S8 => "s8",
            ValueType::U16 => "u16",
            ValueType::S16 => "s16",
            ValueType::U32 => "u32",
            ValueType::S32 => "s32",
            ValueType::U64 => "u64",
            ValueType::S64 => "s64",
            ValueType::U128 => "u128",
            ValueType::S128 => "s128",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::Char => "char",
            ValueType::Char16 => "char16",
            ValueType::Bool => "bool",
            ValueType::Str => "str",
            ValueType::Padding => "padding",
            ValueType::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Unsigned(u128),
    Signed(i128),
    Float(f64),
    Char(char),
    Str(String),
    Bool(bool),
}

impl Keyword {
    pub fn endian(&self) -> Option<Endian> {
        match self {
            Keyword::BigEndian => Some(Endian::Big),
            Keyword::LittleEndian => Some(Endian::Little),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Keyword::Struct => "struct",
            Keyword::Union => "union",
            Keyword::Enum => "enum",
            Keyword::Bitfield => "bitfield",
            Keyword::Using => "using",
            Keyword::Fn => "fn",
            Keyword::Return => "return",
            Keyword::Namespace => "namespace",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::For => "for",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::In => "in",
            Keyword::Out => "out",
            Keyword::BigEndian => "be",
            Keyword::LittleEndian => "le",
            Keyword::Parent => "parent",
            Keyword::This => "this",
            Keyword::Section => "section",
        }
    }
}

/// Canonical spelling of a lexeme. Serializing a token stream with one space
/// between tokens and re-lexing it reproduces the same stream.
impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Separator(sep) => f.write_str(match sep {
                Separator::Semicolon => ";",
                Separator::OpenParen => "(",
                Separator::CloseParen => ")",
                Separator::OpenBrace => "{",
                Separator::CloseBrace => "}",
                Separator::OpenBracket => "[",
                Separator::CloseBracket => "]",
                Separator::Comma => ",",
                Separator::Dot => ".",
                Separator::ScopeResolution => "::",
                Separator::EndOfProgram => "",
            }),
            TokenKind::Operator(op) => f.write_str(match op {
                Operator::Plus => "+",
                Operator::Minus => "-",
                Operator::Star => "*",
                Operator::Slash => "/",
                Operator::Percent => "%",
                Operator::ShiftLeft => "<<",
                Operator::ShiftRight => ">>",
                Operator::BitAnd => "&",
                Operator::BitOr => "|",
                Operator::BitXor => "^",
                Operator::BitNot => "~",
                Operator::BoolAnd => "&&",
                Operator::BoolOr => "||",
                Operator::BoolXor => "^^",
                Operator::BoolNot => "!",
                Operator::Equals => "==",
                Operator::NotEquals => "!=",
                Operator::Greater => ">",
                Operator::Less => "<",
                Operator::GreaterEquals => ">=",
                Operator::LessEquals => "<=",
                Operator::Assign => "=",
                Operator::Ternary => "?",
                Operator::Colon => ":",
                Operator::At => "@",
                Operator::Dollar => "$",
                Operator::SizeOf => "sizeof",
                Operator::AddressOf => "addressof",
            }),
            TokenKind::Keyword(kw) => f.write_str(kw.name()),
            TokenKind::ValueType(vt) => f.write_str(vt.name()),
            TokenKind::Literal(lit) => lit.fmt(f),
            TokenKind::Identifier(name) => f.write_str(name),
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // The U suffix keeps the unsigned tag through a re-lex.
            Literal::Unsigned(v) => write!(f, "{v}U"),
            Literal::Signed(v) => write!(f, "{v}"),
            // Debug formatting always keeps a decimal point.
            Literal::Float(v) => write!(f, "{v:?}"),
            Literal::Char(c) => match c {
                '\n' => f.write_str("'\\n'"),
                '\t' => f.write_str("'\\t'"),
                '\\' => f.write_str("'\\\\'"),
                '\'' => f.write_str("'\\''"),
                c => write!(f, "'{c}'"),
            },
            Literal::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        '\\' => f.write_str("\\\\")?,
                        '"' => f.write_str("\\\"")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
            Literal::Bool(v) => write!(f, "{v}"),
        }
    }
}
