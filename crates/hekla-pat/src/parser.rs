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

// Recursive descent parser with Pratt-style binary precedence. No recovery:
// the first error aborts the parse.

use hekla::Endian;

use crate::ast::*;
use crate::token::{Keyword, Operator, Separator, Token, TokenKind, ValueType};
use crate::{Diagnostic, ErrorKind, Result};

/// Parse a token stream into the list of top-level declarations.
pub fn parse(tokens: &[Token]) -> Result<Vec<Decl>> {
    Parser { tokens, pos: 0 }.program()
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    // ------------------------------------------------------------------
    // Cursor helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &'a TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, ahead: usize) -> &'a TokenKind {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)].kind
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn bump(&mut self) -> &'a TokenKind {
        let kind = &self.tokens[self.pos.min(self.tokens.len() - 1)].kind;
        self.pos += 1;
        kind
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), TokenKind::Separator(Separator::EndOfProgram))
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(kind, self.line(), message)
    }

    fn eat_sep(&mut self, sep: Separator) -> bool {
        if *self.peek() == TokenKind::Separator(sep) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: Operator) -> bool {
        if *self.peek() == TokenKind::Operator(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if *self.peek() == TokenKind::Keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sep(&mut self, sep: Separator, what: &str) -> Result<()> {
        if self.eat_sep(sep) {
            Ok(())
        } else {
            Err(self.error(ErrorKind::MissingToken, format!("expected {what}")))
        }
    }

    fn expect_op(&mut self, op: Operator, what: &str) -> Result<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(ErrorKind::MissingToken, format!("expected {what}")))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String> {
        match self.peek() {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            other => {
                Err(self.error(ErrorKind::UnexpectedToken, format!("expected {what}, found {other:?}")))
            }
        }
    }

    /// Identifier with optional `::` qualification.
    fn qualified_ident(&mut self, what: &str) -> Result<String> {
        let mut name = self.expect_ident(what)?;
        while self.eat_sep(Separator::ScopeResolution) {
            name.push_str("::");
            name.push_str(&self.expect_ident("identifier after '::'")?);
        }
        Ok(name)
    }

    fn eat_endian(&mut self) -> Option<Endian> {
        if self.eat_keyword(Keyword::BigEndian) {
            Some(Endian::Big)
        } else if self.eat_keyword(Keyword::LittleEndian) {
            Some(Endian::Little)
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn program(&mut self) -> Result<Vec<Decl>> {
        let mut decls = Vec::new();
        while !self.at_end() {
            decls.push(self.declaration()?);
        }
        Ok(decls)
    }

    fn declaration(&mut self) -> Result<Decl> {
        match self.peek() {
            TokenKind::Keyword(Keyword::Using) => self.using_decl().map(Decl::Using),
            TokenKind::Keyword(Keyword::Struct) => self.struct_decl().map(Decl::Struct),
            TokenKind::Keyword(Keyword::Union) => self.union_decl().map(Decl::Union),
            TokenKind::Keyword(Keyword::Enum) => self.enum_decl().map(Decl::Enum),
            TokenKind::Keyword(Keyword::Bitfield) => self.bitfield_decl().map(Decl::Bitfield),
            TokenKind::Keyword(Keyword::Fn) => self.fn_decl().map(Decl::Fn),
            TokenKind::Keyword(Keyword::Namespace) => self.namespace_decl(),
            TokenKind::Keyword(Keyword::Section) => self.section_decl().map(Decl::Section),
            TokenKind::ValueType(_)
            | TokenKind::Identifier(_)
            | TokenKind::Keyword(Keyword::BigEndian)
            | TokenKind::Keyword(Keyword::LittleEndian) => {
                let decl = self.var_decl(DeclPosition::Program)?;
                Ok(Decl::Var(decl))
            }
            other => Err(self.error(
                ErrorKind::UnexpectedToken,
                format!("unexpected token at top level: {other:?}"),
            )),
        }
    }

    fn using_decl(&mut self) -> Result<UsingDecl> {
        let line = self.line();
        self.bump();
        let name = self.expect_ident("alias name")?;
        self.expect_op(Operator::Assign, "'=' in using declaration")?;
        let endian = self.eat_endian();
        // `auto` is a valid alias target; a declaration whose type resolves
        // to it is rejected where the alias is used.
        let target = self.type_ref()?;
        self.expect_sep(Separator::Semicolon, "';' after using declaration")?;
        Ok(UsingDecl { name, endian, target, line })
    }

    fn struct_decl(&mut self) -> Result<StructDecl> {
        let line = self.line();
        self.bump();
        let name = self.expect_ident("struct name")?;
        let parent = if self.eat_op(Operator::Colon) {
            Some(self.qualified_ident("inherited type name")?)
        } else {
            None
        };
        self.expect_sep(Separator::OpenBrace, "'{' after struct name")?;
        let mut members = Vec::new();
        while !self.eat_sep(Separator::CloseBrace) {
            members.push(self.var_decl(DeclPosition::Member)?);
        }
        self.expect_sep(Separator::Semicolon, "';' after struct definition")?;
        Ok(StructDecl { name, parent, members, line })
    }

    fn union_decl(&mut self) -> Result<UnionDecl> {
        let line = self.line();
        self.bump();
        let name = self.expect_ident("union name")?;
        self.expect_sep(Separator::OpenBrace, "'{' after union name")?;
        let mut members = Vec::new();
        while !self.eat_sep(Separator::CloseBrace) {
            members.push(self.var_decl(DeclPosition::Member)?);
        }
        self.expect_sep(Separator::Semicolon, "';' after union definition")?;
        Ok(UnionDecl { name, members, line })
    }

    fn enum_decl(&mut self) -> Result<EnumDecl> {
        let line = self.line();
        self.bump();
        let name = self.expect_ident("enum name")?;
        self.expect_op(Operator::Colon, "':' and underlying type after enum name")?;
        let underlying = match self.bump() {
            TokenKind::ValueType(vt) if vt.is_signed() || vt.is_unsigned() => *vt,
            other => {
                return Err(Diagnostic::error(
                    ErrorKind::MalformedDeclaration,
                    line,
                    format!("enum underlying type must be integral, found {other:?}"),
                ))
            }
        };
        self.expect_sep(Separator::OpenBrace, "'{' after enum header")?;
        let mut entries = Vec::new();
        while !self.eat_sep(Separator::CloseBrace) {
            let entry = self.expect_ident("enum entry name")?;
            let value = if self.eat_op(Operator::Assign) { Some(self.expression()?) } else { None };
            entries.push((entry, value));
            if !self.eat_sep(Separator::Comma) {
                self.expect_sep(Separator::CloseBrace, "'}' after enum entries")?;
                break;
            }
        }
        self.expect_sep(Separator::Semicolon, "';' after enum definition")?;
        Ok(EnumDecl { name, underlying, entries, line })
    }

    fn bitfield_decl(&mut self) -> Result<BitfieldDecl> {
        let line = self.line();
        self.bump();
        let name = self.expect_ident("bitfield name")?;
        self.expect_sep(Separator::OpenBrace, "'{' after bitfield name")?;
        let mut fields = Vec::new();
        while !self.eat_sep(Separator::CloseBrace) {
            // `padding : N;` advances the bit cursor without naming a field.
            let field = if *self.peek() == TokenKind::ValueType(ValueType::Padding) {
                self.pos += 1;
                String::new()
            } else {
                self.expect_ident("bitfield field name")?
            };
            self.expect_op(Operator::Colon, "':' after bitfield field name")?;
            let width = self.expression()?;
            self.expect_sep(Separator::Semicolon, "';' after bitfield field")?;
            fields.push((field, width));
        }
        self.expect_sep(Separator::Semicolon, "';' after bitfield definition")?;
        Ok(BitfieldDecl { name, fields, line })
    }

    fn fn_decl(&mut self) -> Result<FnDecl> {
        let line = self.line();
        self.bump();
        let name = self.expect_ident("function name")?;
        self.expect_sep(Separator::OpenParen, "'(' after function name")?;
        let mut params = Vec::new();
        while !self.eat_sep(Separator::CloseParen) {
            let ty = self.type_ref()?;
            let pname = self.expect_ident("parameter name")?;
            params.push(FnParam { name: pname, ty });
            if !self.eat_sep(Separator::Comma) {
                self.expect_sep(Separator::CloseParen, "')' after parameters")?;
                break;
            }
        }
        let body = self.block()?;
        Ok(FnDecl { name, params, body, line })
    }

    fn namespace_decl(&mut self) -> Result<Decl> {
        let line = self.line();
        self.bump();
        let name = self.qualified_ident("namespace name")?;
        self.expect_sep(Separator::OpenBrace, "'{' after namespace name")?;
        let mut decls = Vec::new();
        while !self.eat_sep(Separator::CloseBrace) {
            if self.at_end() {
                return Err(self.error(ErrorKind::MissingToken, "expected '}' to close namespace"));
            }
            decls.push(self.declaration()?);
        }
        // Trailing ';' after a namespace is permitted but not required.
        self.eat_sep(Separator::Semicolon);
        Ok(Decl::Namespace { name, decls, line })
    }

    fn section_decl(&mut self) -> Result<SectionDecl> {
        let line = self.line();
        self.bump();
        let name = self.expect_ident("section name")?;
        self.expect_sep(Separator::OpenBracket, "'[' before section size")?;
        let size = self.expression()?;
        self.expect_sep(Separator::CloseBracket, "']' after section size")?;
        self.expect_sep(Separator::Semicolon, "';' after section declaration")?;
        Ok(SectionDecl { name, size, line })
    }

    fn type_ref(&mut self) -> Result<TypeRef> {
        match self.peek() {
            TokenKind::ValueType(vt) => {
                let vt = *vt;
                self.pos += 1;
                Ok(TypeRef::Builtin(vt))
            }
            TokenKind::Identifier(_) => Ok(TypeRef::Named(self.qualified_ident("type name")?)),
            other => {
                Err(self.error(ErrorKind::UnknownType, format!("expected type, found {other:?}")))
            }
        }
    }

    /// Variable declaration in one of three positions: program scope (needs a
    /// placement or in/out marker), struct/union member, or function local
    /// (may carry an initializer).
    fn var_decl(&mut self, position: DeclPosition) -> Result<VarDecl> {
        let line = self.line();
        let endian = self.eat_endian();
        let ty = self.type_ref()?;

        if matches!(ty, TypeRef::Builtin(ValueType::Auto)) {
            return Err(Diagnostic::error(
                ErrorKind::MalformedDeclaration,
                line,
                "'auto' is only valid as a function parameter type",
            ));
        }

        let is_pointer = self.eat_op(Operator::Star);
        let name = match position {
            // `padding[N];` has no name.
            _ if matches!(ty, TypeRef::Builtin(ValueType::Padding)) => String::new(),
            _ => self.expect_ident("variable name")?,
        };

        // A lone '[' opens an array size; '[[' opens the attribute list.
        let at_array = matches!(self.peek(), TokenKind::Separator(Separator::OpenBracket))
            && !matches!(self.peek_at(1), TokenKind::Separator(Separator::OpenBracket));
        let array = if at_array {
            self.pos += 1;
            let size = self.expression()?;
            self.expect_sep(Separator::CloseBracket, "']' after array size")?;
            Some(size)
        } else {
            None
        };

        let pointer_width = if is_pointer {
            self.expect_op(Operator::Colon, "':' and pointer size type after pointer name")?;
            match self.bump() {
                TokenKind::ValueType(vt) if vt.is_unsigned() || vt.is_signed() => Some(*vt),
                other => {
                    return Err(Diagnostic::error(
                        ErrorKind::MalformedDeclaration,
                        line,
                        format!("pointer size must be an integral type, found {other:?}"),
                    ))
                }
            }
        } else {
            None
        };

        let mut placement = None;
        let mut section = None;
        let mut in_var = false;
        let mut out_var = false;
        let mut init = None;

        if self.eat_op(Operator::At) {
            placement = Some(self.expression()?);
            if self.eat_keyword(Keyword::In) {
                section = Some(self.expect_ident("section name after 'in'")?);
            }
        } else if self.eat_keyword(Keyword::In) {
            in_var = true;
        } else if self.eat_keyword(Keyword::Out) {
            out_var = true;
        } else if position == DeclPosition::Local && self.eat_op(Operator::Assign) {
            init = Some(self.expression()?);
        }

        let attributes = self.attribute_list()?;
        self.expect_sep(Separator::Semicolon, "';' after declaration")?;

        match position {
            DeclPosition::Program => {
                if placement.is_none() && !in_var && !out_var {
                    return Err(Diagnostic::error(
                        ErrorKind::MalformedDeclaration,
                        line,
                        format!("variable '{name}' at program scope needs a placement or in/out marker"),
                    ));
                }
            }
            DeclPosition::Member | DeclPosition::Local => {
                if placement.is_some() || in_var || out_var {
                    return Err(Diagnostic::error(
                        ErrorKind::MalformedDeclaration,
                        line,
                        format!("'{name}' may not use placement or in/out here"),
                    ));
                }
            }
        }

        Ok(VarDecl {
            line,
            endian,
            ty,
            name,
            array,
            pointer_width,
            placement,
            section,
            in_var,
            out_var,
            init,
            attributes,
        })
    }

    /// `[[name, name("value"), ...]]` — attributes attach to the preceding
    /// declaration.
    fn attribute_list(&mut self) -> Result<Vec<Attribute>> {
        if !matches!(self.peek(), TokenKind::Separator(Separator::OpenBracket))
            || !matches!(self.peek_at(1), TokenKind::Separator(Separator::OpenBracket))
        {
            return Ok(Vec::new());
        }
        self.pos += 2;

        let mut attributes = Vec::new();
        loop {
            let line = self.line();
            let name = self.expect_ident("attribute name")?;
            let value = if self.eat_sep(Separator::OpenParen) {
                let value = self.expression()?;
                self.expect_sep(Separator::CloseParen, "')' after attribute value")?;
                Some(value)
            } else {
                None
            };
            attributes.push(Attribute { name, value, line });
            if !self.eat_sep(Separator::Comma) {
                break;
            }
        }
        self.expect_sep(Separator::CloseBracket, "']]' after attributes")?;
        self.expect_sep(Separator::CloseBracket, "']]' after attributes")?;
        Ok(attributes)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect_sep(Separator::OpenBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.eat_sep(Separator::CloseBrace) {
            if self.at_end() {
                return Err(self.error(ErrorKind::MissingToken, "expected '}' to close block"));
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn body(&mut self) -> Result<Vec<Stmt>> {
        if matches!(self.peek(), TokenKind::Separator(Separator::OpenBrace)) {
            self.block()
        } else {
            Ok(vec![self.statement()?])
        }
    }

    fn statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        match self.peek() {
            TokenKind::Keyword(Keyword::If) => {
                self.pos += 1;
                self.expect_sep(Separator::OpenParen, "'(' after 'if'")?;
                let cond = self.expression()?;
                self.expect_sep(Separator::CloseParen, "')' after condition")?;
                let then_body = self.body()?;
                let else_body = if self.eat_keyword(Keyword::Else) { self.body()? } else { Vec::new() };
                Ok(Stmt::If { cond, then_body, else_body, line })
            }
            TokenKind::Keyword(Keyword::While) => {
                self.pos += 1;
                self.expect_sep(Separator::OpenParen, "'(' after 'while'")?;
                let cond = self.expression()?;
                self.expect_sep(Separator::CloseParen, "')' after condition")?;
                let body = self.body()?;
                Ok(Stmt::While { cond, body, line })
            }
            TokenKind::Keyword(Keyword::For) => {
                self.pos += 1;
                self.expect_sep(Separator::OpenParen, "'(' after 'for'")?;
                let init = self.simple_statement()?;
                self.expect_sep(Separator::Comma, "',' after for-loop initializer")?;
                let cond = self.expression()?;
                self.expect_sep(Separator::Comma, "',' after for-loop condition")?;
                let step = self.simple_statement()?;
                self.expect_sep(Separator::CloseParen, "')' after for-loop header")?;
                let body = self.body()?;
                Ok(Stmt::For { init: Box::new(init), cond, step: Box::new(step), body, line })
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.pos += 1;
                let value = if matches!(self.peek(), TokenKind::Separator(Separator::Semicolon)) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect_sep(Separator::Semicolon, "';' after return")?;
                Ok(Stmt::Return { value, line })
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.pos += 1;
                self.expect_sep(Separator::Semicolon, "';' after break")?;
                Ok(Stmt::Break { line })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.pos += 1;
                self.expect_sep(Separator::Semicolon, "';' after continue")?;
                Ok(Stmt::Continue { line })
            }
            _ => {
                let stmt = self.simple_statement()?;
                self.expect_sep(Separator::Semicolon, "';' after statement")?;
                Ok(stmt)
            }
        }
    }

    /// Statement without its terminator: assignment, local declaration or
    /// expression. Used directly inside for-loop headers.
    fn simple_statement(&mut self) -> Result<Stmt> {
        let line = self.line();

        if self.eat_op(Operator::Dollar) {
            self.expect_op(Operator::Assign, "'=' after '$'")?;
            let value = self.expression()?;
            return Ok(Stmt::Assign { target: AssignTarget::Dollar, value, line });
        }

        match self.peek() {
            // `Type name ...` is a local declaration.
            TokenKind::ValueType(_)
            | TokenKind::Keyword(Keyword::BigEndian)
            | TokenKind::Keyword(Keyword::LittleEndian) => {
                return Ok(Stmt::Decl(self.local_decl()?));
            }
            TokenKind::Identifier(_) => {
                // Identifier followed by another identifier: custom-typed
                // local (skipping any `::` qualification). Identifier
                // followed by '=': assignment.
                let mut ahead = 1;
                while *self.peek_at(ahead) == TokenKind::Separator(Separator::ScopeResolution)
                    && matches!(self.peek_at(ahead + 1), TokenKind::Identifier(_))
                {
                    ahead += 2;
                }
                if matches!(self.peek_at(ahead), TokenKind::Identifier(_)) {
                    return Ok(Stmt::Decl(self.local_decl()?));
                }
                if *self.peek_at(1) == TokenKind::Operator(Operator::Assign) {
                    let name = self.expect_ident("assignment target")?;
                    self.pos += 1; // '='
                    let value = self.expression()?;
                    return Ok(Stmt::Assign { target: AssignTarget::Ident(name), value, line });
                }
            }
            _ => {}
        }

        Ok(Stmt::Expr(self.expression()?))
    }

    /// Function-local declaration, parsed without the trailing semicolon.
    fn local_decl(&mut self) -> Result<VarDecl> {
        let line = self.line();
        let endian = self.eat_endian();
        let ty = self.type_ref()?;
        let name = self.expect_ident("variable name")?;
        let init = if self.eat_op(Operator::Assign) { Some(self.expression()?) } else { None };
        Ok(VarDecl {
            line,
            endian,
            ty,
            name,
            array: None,
            pointer_width: None,
            placement: None,
            section: None,
            in_var: false,
            out_var: false,
            init,
            attributes: Vec::new(),
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self) -> Result<Expr> {
        let cond = self.binary_expr(0)?;
        if self.eat_op(Operator::Ternary) {
            let line = cond.line;
            let then_expr = self.expression()?;
            self.expect_op(Operator::Colon, "':' in ternary expression")?;
            let else_expr = self.expression()?;
            return Ok(Expr::new(
                ExprKind::Ternary {
                    cond: Box::new(cond),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                },
                line,
            ));
        }
        Ok(cond)
    }

    fn binary_op(&self) -> Option<(BinaryOp, u8)> {
        let op = match self.peek() {
            TokenKind::Operator(op) => *op,
            _ => return None,
        };
        // Binding powers, high to low, per the language precedence table.
        let entry = match op {
            Operator::Star => (BinaryOp::Mul, 100),
            Operator::Slash => (BinaryOp::Div, 100),
            Operator::Percent => (BinaryOp::Rem, 100),
            Operator::Plus => (BinaryOp::Add, 90),
            Operator::Minus => (BinaryOp::Sub, 90),
            Operator::ShiftLeft => (BinaryOp::Shl, 80),
            Operator::ShiftRight => (BinaryOp::Shr, 80),
            Operator::Less => (BinaryOp::Lt, 70),
            Operator::Greater => (BinaryOp::Gt, 70),
            Operator::LessEquals => (BinaryOp::Le, 70),
            Operator::GreaterEquals => (BinaryOp::Ge, 70),
            Operator::Equals => (BinaryOp::Eq, 60),
            Operator::NotEquals => (BinaryOp::Ne, 60),
            Operator::BitAnd => (BinaryOp::BitAnd, 50),
            Operator::BitXor => (BinaryOp::BitXor, 45),
            Operator::BitOr => (BinaryOp::BitOr, 40),
            Operator::BoolAnd => (BinaryOp::BoolAnd, 35),
            Operator::BoolXor => (BinaryOp::BoolXor, 33),
            Operator::BoolOr => (BinaryOp::BoolOr, 30),
            _ => return None,
        };
        Some(entry)
    }

    fn binary_expr(&mut self, min_bp: u8) -> Result<Expr> {
        let mut lhs = self.unary_expr()?;
        while let Some((op, bp)) = self.binary_op() {
            if bp < min_bp {
                break;
            }
            self.pos += 1;
            // Left associativity: the right side binds one step tighter.
            let rhs = self.binary_expr(bp + 1)?;
            let line = lhs.line;
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, line);
        }
        Ok(lhs)
    }

    fn unary_expr(&mut self) -> Result<Expr> {
        let line = self.line();
        let op = match self.peek() {
            TokenKind::Operator(Operator::Minus) => Some(UnaryOp::Neg),
            TokenKind::Operator(Operator::Plus) => Some(UnaryOp::Plus),
            TokenKind::Operator(Operator::BoolNot) => Some(UnaryOp::BoolNot),
            TokenKind::Operator(Operator::BitNot) => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.unary_expr()?;
            return Ok(Expr::new(ExprKind::Unary { op, operand: Box::new(operand) }, line));
        }
        self.postfix_expr()
    }

    fn postfix_expr(&mut self) -> Result<Expr> {
        let mut expr = self.primary_expr()?;
        loop {
            // `[[` opens an attribute list on the enclosing declaration, not
            // an index.
            let attr_start = matches!(self.peek(), TokenKind::Separator(Separator::OpenBracket))
                && matches!(self.peek_at(1), TokenKind::Separator(Separator::OpenBracket));
            if self.eat_sep(Separator::Dot) {
                let line = expr.line;
                let member = self.expect_ident("member name after '.'")?;
                expr = Expr::new(ExprKind::Member { base: Box::new(expr), member }, line);
            } else if !attr_start && self.eat_sep(Separator::OpenBracket) {
                let line = expr.line;
                let index = self.expression()?;
                self.expect_sep(Separator::CloseBracket, "']' after index")?;
                expr = Expr::new(
                    ExprKind::Index { base: Box::new(expr), index: Box::new(index) },
                    line,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary_expr(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.peek().clone() {
            TokenKind::Literal(lit) => {
                self.pos += 1;
                Ok(Expr::new(ExprKind::Literal(lit), line))
            }
            TokenKind::Separator(Separator::OpenParen) => {
                self.pos += 1;
                let expr = self.expression()?;
                self.expect_sep(Separator::CloseParen, "')'")?;
                Ok(expr)
            }
            TokenKind::Operator(Operator::Dollar) => {
                self.pos += 1;
                Ok(Expr::new(ExprKind::Dollar, line))
            }
            TokenKind::Keyword(Keyword::Parent) => {
                self.pos += 1;
                Ok(Expr::new(ExprKind::Parent, line))
            }
            TokenKind::Keyword(Keyword::This) => {
                self.pos += 1;
                Ok(Expr::new(ExprKind::This, line))
            }
            TokenKind::Operator(Operator::SizeOf) => {
                self.pos += 1;
                self.expect_sep(Separator::OpenParen, "'(' after sizeof")?;
                let target = if let TokenKind::ValueType(vt) = self.peek() {
                    let vt = *vt;
                    self.pos += 1;
                    SizeOfTarget::Type(TypeRef::Builtin(vt))
                } else {
                    SizeOfTarget::Expr(Box::new(self.expression()?))
                };
                self.expect_sep(Separator::CloseParen, "')' after sizeof argument")?;
                Ok(Expr::new(ExprKind::SizeOf(target), line))
            }
            TokenKind::Operator(Operator::AddressOf) => {
                self.pos += 1;
                self.expect_sep(Separator::OpenParen, "'(' after addressof")?;
                let target = self.expression()?;
                self.expect_sep(Separator::CloseParen, "')' after addressof argument")?;
                Ok(Expr::new(ExprKind::AddressOf(Box::new(target)), line))
            }
            TokenKind::Identifier(_) => {
                let name = self.qualified_ident("identifier")?;
                if self.eat_sep(Separator::OpenParen) {
                    let mut args = Vec::new();
                    while !self.eat_sep(Separator::CloseParen) {
                        args.push(self.expression()?);
                        if !self.eat_sep(Separator::Comma) {
                            self.expect_sep(Separator::CloseParen, "')' after call arguments")?;
                            break;
                        }
                    }
                    Ok(Expr::new(ExprKind::Call { name, args }, line))
                } else {
                    Ok(Expr::new(ExprKind::Ident(name), line))
                }
            }
            other => Err(self.error(
                ErrorKind::UnexpectedToken,
                format!("expected expression, found {other:?}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclPosition {
    Program,
    Member,
    Local,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_src(source: &str) -> Vec<Decl> {
        parse(&lex(source).unwrap()).unwrap()
    }

    fn parse_err(source: &str) -> Diagnostic {
        parse(&lex(source).unwrap()).unwrap_err()
    }

    #[test]
    fn placed_variable() {
        let decls = parse_src("u32 x @ 0x10;");
        let Decl::Var(var) = &decls[0] else { panic!() };
        assert_eq!(var.name, "x");
        assert_eq!(var.ty, TypeRef::Builtin(ValueType::U32));
        assert!(var.placement.is_some());
    }

    #[test]
    fn struct_with_padding_member() {
        let decls = parse_src("struct H { u32 magic; u8 ver; padding[3]; u16 flags; }; H hdr @ 0;");
        let Decl::Struct(s) = &decls[0] else { panic!() };
        assert_eq!(s.members.len(), 4);
        assert_eq!(s.members[2].ty, TypeRef::Builtin(ValueType::Padding));
        assert!(s.members[2].array.is_some());
    }

    #[test]
    fn pointer_declaration() {
        let decls = parse_src("struct S { u8 v; }; S *p : u16 @ 0;");
        let Decl::Var(var) = &decls[1] else { panic!() };
        assert_eq!(var.pointer_width, Some(ValueType::U16));
    }

    #[test]
    fn precedence_shapes_the_tree() {
        let decls = parse_src("u8 x @ 1 + 2 * 3;");
        let Decl::Var(var) = &decls[0] else { panic!() };
        let Some(Expr { kind: ExprKind::Binary { op, rhs, .. }, .. }) = &var.placement else {
            panic!()
        };
        // `+` at the root, `*` below it.
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn ternary_and_comparison() {
        let decls = parse_src("u8 x @ 1 < 2 ? 0 : 4;");
        let Decl::Var(var) = &decls[0] else { panic!() };
        assert!(matches!(
            var.placement.as_ref().unwrap().kind,
            ExprKind::Ternary { .. }
        ));
    }

    #[test]
    fn attributes_parse() {
        let decls = parse_src(r#"u32 x @ 0 [[color("FF0000"), hidden]];"#);
        let Decl::Var(var) = &decls[0] else { panic!() };
        assert_eq!(var.attributes.len(), 2);
        assert_eq!(var.attributes[0].name, "color");
        assert_eq!(var.attributes[1].name, "hidden");
    }

    #[test]
    fn enum_entries_with_auto_increment() {
        let decls = parse_src("enum E : u8 { A = 1, B, C = 10 };");
        let Decl::Enum(e) = &decls[0] else { panic!() };
        assert_eq!(e.entries.len(), 3);
        assert!(e.entries[1].1.is_none());
    }

    #[test]
    fn function_with_control_flow() {
        let decls = parse_src(
            "fn f(auto n) { u32 acc = 0; for (u32 i = 0, i < n, i = i + 1) { acc = acc + i; } return acc; }",
        );
        let Decl::Fn(f) = &decls[0] else { panic!() };
        assert_eq!(f.params.len(), 1);
        assert_eq!(f.body.len(), 3);
    }

    #[test]
    fn namespace_qualifies_contents() {
        let decls = parse_src("namespace fmt { struct A { u8 b; }; } fmt::A a @ 0;");
        assert!(matches!(decls[0], Decl::Namespace { .. }));
        let Decl::Var(var) = &decls[1] else { panic!() };
        assert_eq!(var.ty, TypeRef::Named("fmt::A".into()));
    }

    #[test]
    fn section_and_placement_into_section() {
        let decls = parse_src("section scratch[0x100]; u32 x @ 0 in scratch;");
        assert!(matches!(decls[0], Decl::Section(_)));
        let Decl::Var(var) = &decls[1] else { panic!() };
        assert_eq!(var.section.as_deref(), Some("scratch"));
    }

    #[test]
    fn in_out_variables() {
        let decls = parse_src("u32 offset in; u64 total out;");
        let Decl::Var(a) = &decls[0] else { panic!() };
        let Decl::Var(b) = &decls[1] else { panic!() };
        assert!(a.in_var);
        assert!(b.out_var);
    }

    #[test]
    fn top_level_variable_requires_placement() {
        let err = parse_err("u32 x;");
        assert_eq!(err.kind, ErrorKind::MalformedDeclaration);
    }

    #[test]
    fn auto_is_restricted_to_parameters_and_aliases() {
        let err = parse_err("auto x @ 0;");
        assert_eq!(err.kind, ErrorKind::MalformedDeclaration);
        // As an alias target `auto` parses; placing such an alias over bytes
        // is rejected during evaluation.
        let decls = parse_src("using Any = auto;");
        let Decl::Using(u) = &decls[0] else { panic!() };
        assert_eq!(u.target, TypeRef::Builtin(ValueType::Auto));
    }

    #[test]
    fn missing_semicolon_reports_line() {
        let err = parse_err("u32 x @ 0\nu8 y @ 4;");
        assert_eq!(err.kind, ErrorKind::MissingToken);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn sizeof_accepts_types_and_paths() {
        let decls = parse_src("u8 a @ sizeof(u32); u8 b @ sizeof(a);");
        let Decl::Var(a) = &decls[0] else { panic!() };
        assert!(matches!(
            a.placement.as_ref().unwrap().kind,
            ExprKind::SizeOf(SizeOfTarget::Type(_))
        ));
    }
}
