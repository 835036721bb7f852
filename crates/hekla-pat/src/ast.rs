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

// Abstract syntax tree. Every node owns its children and carries the source
// line it came from; nodes are cloned when a declaration is registered in
// more than one container.

use hekla::Endian;

use crate::token::{Literal, ValueType};

/// Reference to a type: a built-in value type or a (possibly qualified)
/// user-defined name like `fmt::Header`.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Builtin(ValueType),
    Named(String),
}

impl TypeRef {
    pub fn display(&self) -> String {
        match self {
            TypeRef::Builtin(vt) => vt.name().to_string(),
            TypeRef::Named(name) => name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    BoolNot,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    BoolAnd,
    BoolOr,
    BoolXor,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BoolAnd => "&&",
            BinaryOp::BoolOr => "||",
            BinaryOp::BoolXor => "^^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Ge => ">=",
            BinaryOp::Le => "<=",
        }
    }
}

/// Argument of `sizeof(...)`: either a type or a value path.
#[derive(Debug, Clone, PartialEq)]
pub enum SizeOfTarget {
    Type(TypeRef),
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: u32,
}

impl Expr {
    pub fn new(kind: ExprKind, line: u32) -> Self {
        Expr { kind, line }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    /// Possibly qualified identifier reference (`name` or `Enum::Entry`).
    Ident(String),
    /// `$` — the current read cursor.
    Dollar,
    /// The immediately enclosing compound pattern.
    Parent,
    /// The pattern currently being built.
    This,
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Ternary { cond: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr> },
    Member { base: Box<Expr>, member: String },
    Index { base: Box<Expr>, index: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
    SizeOf(SizeOfTarget),
    AddressOf(Box<Expr>),
}

/// One attribute out of a `[[...]]` list.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<Expr>,
    pub line: u32,
}

/// A variable declaration: placed program variable, struct/union member, or
/// function local.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub line: u32,
    pub endian: Option<Endian>,
    pub ty: TypeRef,
    pub name: String,
    /// Array size expression, if declared with `[...]`.
    pub array: Option<Expr>,
    /// Pointer storage type for `T *name : u16` declarations.
    pub pointer_width: Option<ValueType>,
    /// `@ expr` placement for program-scope variables.
    pub placement: Option<Expr>,
    /// Target section name of `@ expr in name`.
    pub section: Option<String>,
    pub in_var: bool,
    pub out_var: bool,
    /// Initializer of a function-local declaration.
    pub init: Option<Expr>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    /// Inherited type whose members are laid out first.
    pub parent: Option<String>,
    pub members: Vec<VarDecl>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionDecl {
    pub name: String,
    pub members: Vec<VarDecl>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: String,
    pub underlying: ValueType,
    /// Entries carry an optional constant expression; omitted values
    /// auto-increment from the previous entry.
    pub entries: Vec<(String, Option<Expr>)>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitfieldDecl {
    pub name: String,
    /// `(field name, bit width expression)`. Anonymous padding fields carry
    /// an empty name and only advance the bit cursor.
    pub fields: Vec<(String, Expr)>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnParam {
    pub name: String,
    /// `auto` parameters accept any value; a concrete type documents intent
    /// but is not checked before the call.
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: String,
    pub params: Vec<FnParam>,
    pub body: Vec<Stmt>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsingDecl {
    pub name: String,
    pub endian: Option<Endian>,
    pub target: TypeRef,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionDecl {
    pub name: String,
    pub size: Expr,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Ident(String),
    /// `$ = expr;` moves the read cursor.
    Dollar,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Decl(VarDecl),
    Assign { target: AssignTarget, value: Expr, line: u32 },
    If { cond: Expr, then_body: Vec<Stmt>, else_body: Vec<Stmt>, line: u32 },
    While { cond: Expr, body: Vec<Stmt>, line: u32 },
    For { init: Box<Stmt>, cond: Expr, step: Box<Stmt>, body: Vec<Stmt>, line: u32 },
    Return { value: Option<Expr>, line: u32 },
    Break { line: u32 },
    Continue { line: u32 },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Using(UsingDecl),
    Struct(StructDecl),
    Union(UnionDecl),
    Enum(EnumDecl),
    Bitfield(BitfieldDecl),
    Fn(FnDecl),
    Var(VarDecl),
    Namespace { name: String, decls: Vec<Decl>, line: u32 },
    Section(SectionDecl),
}
