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

// Dynamic runtime values and the operator semantics over them.
//
// Numbers are stored at 128-bit width (or f64); the promotion ladder
// therefore reduces to: float wins, then mixed signedness promotes to
// unsigned. Strings support `+` concatenation and `*` repetition.

use hekla::PatternId;

use crate::ast::{BinaryOp, UnaryOp};
use crate::token::Literal;
use crate::{Diagnostic, ErrorKind, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unsigned(u128),
    Signed(i128),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    /// Reference to a materialized pattern; dereferenced on demand by the
    /// evaluator before any arithmetic.
    Pattern(PatternId),
}

impl From<Literal> for Value {
    fn from(lit: Literal) -> Self {
        match lit {
            Literal::Unsigned(v) => Value::Unsigned(v),
            Literal::Signed(v) => Value::Signed(v),
            Literal::Float(v) => Value::Float(v),
            Literal::Char(v) => Value::Char(v),
            Literal::Str(v) => Value::Str(v),
            Literal::Bool(v) => Value::Bool(v),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Unsigned(v) => write!(f, "{v}"),
            Value::Signed(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Pattern(id) => write!(f, "<pattern #{}>", id.0),
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unsigned(_) => "unsigned",
            Value::Signed(_) => "signed",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Pattern(_) => "pattern",
        }
    }

    /// Interpret as a non-negative 64-bit quantity (offset, count, size).
    pub fn to_u64(&self, line: u32) -> Result<u64> {
        let err = || {
            Diagnostic::error(
                ErrorKind::TypeMismatch,
                line,
                format!("expected a non-negative integer, got {self}"),
            )
        };
        match self {
            Value::Unsigned(v) => u64::try_from(*v).map_err(|_| err()),
            Value::Signed(v) => u64::try_from(*v).map_err(|_| err()),
            Value::Bool(v) => Ok(*v as u64),
            Value::Char(v) => Ok(*v as u64),
            _ => Err(err()),
        }
    }

    /// Truthiness for conditions and logical operators.
    pub fn truthy(&self, line: u32) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            Value::Unsigned(v) => Ok(*v != 0),
            Value::Signed(v) => Ok(*v != 0),
            Value::Float(v) => Ok(*v != 0.0),
            Value::Char(v) => Ok(*v != '\0'),
            other => Err(Diagnostic::error(
                ErrorKind::TypeMismatch,
                line,
                format!("{} cannot be used as a condition", other.type_name()),
            )),
        }
    }
}

/// Numeric view used during promotion.
#[derive(Debug, Clone, Copy)]
enum Num {
    U(u128),
    I(i128),
    F(f64),
}

fn numeric(value: &Value, line: u32) -> Result<Num> {
    match value {
        Value::Unsigned(v) => Ok(Num::U(*v)),
        Value::Signed(v) => Ok(Num::I(*v)),
        Value::Float(v) => Ok(Num::F(*v)),
        Value::Bool(v) => Ok(Num::U(*v as u128)),
        Value::Char(v) => Ok(Num::U(*v as u128)),
        other => Err(Diagnostic::error(
            ErrorKind::InvalidOperation,
            line,
            format!("invalid operand of type {}", other.type_name()),
        )),
    }
}

/// Promote a pair of numeric operands: floats win, then mixed signedness
/// promotes to unsigned 128-bit.
fn promote(a: Num, b: Num) -> (Num, Num) {
    match (a, b) {
        (Num::F(_), _) | (_, Num::F(_)) => (Num::F(to_f64(a)), Num::F(to_f64(b))),
        (Num::I(x), Num::I(y)) => (Num::I(x), Num::I(y)),
        _ => (Num::U(to_u128(a)), Num::U(to_u128(b))),
    }
}

fn to_f64(n: Num) -> f64 {
    match n {
        Num::U(v) => v as f64,
        Num::I(v) => v as f64,
        Num::F(v) => v,
    }
}

fn to_u128(n: Num) -> u128 {
    match n {
        Num::U(v) => v,
        Num::I(v) => v as u128,
        Num::F(v) => v as u128,
    }
}

fn shl_u(v: u128, count: u128) -> u128 {
    if count >= 128 {
        0
    } else {
        v << count
    }
}

fn shr_u(v: u128, count: u128) -> u128 {
    if count >= 128 {
        0
    } else {
        v >> count
    }
}

fn shr_i(v: i128, count: u128) -> i128 {
    if count >= 128 {
        if v < 0 {
            -1
        } else {
            0
        }
    } else {
        v >> count
    }
}

/// Evaluate a binary operator. `Pattern` operands must be dereferenced by the
/// caller first.
pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value, line: u32) -> Result<Value> {
    use BinaryOp::*;

    // String rules come first: `+` concatenates, `*` repeats, comparisons
    // order lexicographically.
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => {
            return match op {
                Add => Ok(Value::Str(format!("{a}{b}"))),
                Eq => Ok(Value::Bool(a == b)),
                Ne => Ok(Value::Bool(a != b)),
                Lt => Ok(Value::Bool(a < b)),
                Gt => Ok(Value::Bool(a > b)),
                Le => Ok(Value::Bool(a <= b)),
                Ge => Ok(Value::Bool(a >= b)),
                _ => Err(invalid_op(op, lhs, rhs, line)),
            };
        }
        (Value::Str(a), Value::Char(c)) if op == Add => {
            let mut out = a.clone();
            out.push(*c);
            return Ok(Value::Str(out));
        }
        (Value::Char(c), Value::Str(b)) if op == Add => {
            return Ok(Value::Str(format!("{c}{b}")));
        }
        (Value::Str(a), _) if op == Mul => {
            let count = rhs.to_u64(line)?;
            return Ok(Value::Str(a.repeat(count as usize)));
        }
        (Value::Str(_), _) | (_, Value::Str(_)) => return Err(invalid_op(op, lhs, rhs, line)),
        _ => {}
    }

    // Logical operators work on truthiness and always produce bool.
    if matches!(op, BoolAnd | BoolOr | BoolXor) {
        let a = lhs.truthy(line)?;
        let b = rhs.truthy(line)?;
        return Ok(Value::Bool(match op {
            BoolAnd => a && b,
            BoolOr => a || b,
            _ => a != b,
        }));
    }

    let (a, b) = promote(numeric(lhs, line)?, numeric(rhs, line)?);

    if matches!(op, Div | Rem) {
        let zero = match b {
            Num::U(v) => v == 0,
            Num::I(v) => v == 0,
            Num::F(v) => v == 0.0,
        };
        if zero {
            return Err(Diagnostic::error(ErrorKind::DivisionByZero, line, "division by zero"));
        }
    }

    match (a, b) {
        (Num::F(x), Num::F(y)) => match op {
            Add => Ok(Value::Float(x + y)),
            Sub => Ok(Value::Float(x - y)),
            Mul => Ok(Value::Float(x * y)),
            Div => Ok(Value::Float(x / y)),
            Eq => Ok(Value::Bool(x == y)),
            Ne => Ok(Value::Bool(x != y)),
            Gt => Ok(Value::Bool(x > y)),
            Lt => Ok(Value::Bool(x < y)),
            Ge => Ok(Value::Bool(x >= y)),
            Le => Ok(Value::Bool(x <= y)),
            // Bitwise, shift and modulus operators reject floats.
            _ => Err(Diagnostic::error(
                ErrorKind::InvalidOperation,
                line,
                format!("invalid floating point operation '{}'", op.symbol()),
            )),
        },
        (Num::U(x), Num::U(y)) => match op {
            Add => Ok(Value::Unsigned(x.wrapping_add(y))),
            Sub => Ok(Value::Unsigned(x.wrapping_sub(y))),
            Mul => Ok(Value::Unsigned(x.wrapping_mul(y))),
            Div => Ok(Value::Unsigned(x / y)),
            Rem => Ok(Value::Unsigned(x % y)),
            Shl => Ok(Value::Unsigned(shl_u(x, y))),
            Shr => Ok(Value::Unsigned(shr_u(x, y))),
            BitAnd => Ok(Value::Unsigned(x & y)),
            BitOr => Ok(Value::Unsigned(x | y)),
            BitXor => Ok(Value::Unsigned(x ^ y)),
            Eq => Ok(Value::Bool(x == y)),
            Ne => Ok(Value::Bool(x != y)),
            Gt => Ok(Value::Bool(x > y)),
            Lt => Ok(Value::Bool(x < y)),
            Ge => Ok(Value::Bool(x >= y)),
            Le => Ok(Value::Bool(x <= y)),
            BoolAnd | BoolOr | BoolXor => unreachable!("handled above"),
        },
        (Num::I(x), Num::I(y)) => match op {
            Add => Ok(Value::Signed(x.wrapping_add(y))),
            Sub => Ok(Value::Signed(x.wrapping_sub(y))),
            Mul => Ok(Value::Signed(x.wrapping_mul(y))),
            Div => Ok(Value::Signed(x.wrapping_div(y))),
            Rem => Ok(Value::Signed(x.wrapping_rem(y))),
            Shl => Ok(Value::Signed(shl_u(x as u128, y as u128) as i128)),
            Shr => Ok(Value::Signed(shr_i(x, y as u128))),
            BitAnd => Ok(Value::Signed(x & y)),
            BitOr => Ok(Value::Signed(x | y)),
            BitXor => Ok(Value::Signed(x ^ y)),
            Eq => Ok(Value::Bool(x == y)),
            Ne => Ok(Value::Bool(x != y)),
            Gt => Ok(Value::Bool(x > y)),
            Lt => Ok(Value::Bool(x < y)),
            Ge => Ok(Value::Bool(x >= y)),
            Le => Ok(Value::Bool(x <= y)),
            BoolAnd | BoolOr | BoolXor => unreachable!("handled above"),
        },
        _ => Err(invalid_op(op, lhs, rhs, line)),
    }
}

/// Evaluate a unary operator.
pub fn unary(op: UnaryOp, value: &Value, line: u32) -> Result<Value> {
    match op {
        UnaryOp::BoolNot => Ok(Value::Bool(!value.truthy(line)?)),
        UnaryOp::Plus => match numeric(value, line)? {
            Num::U(v) => Ok(Value::Unsigned(v)),
            Num::I(v) => Ok(Value::Signed(v)),
            Num::F(v) => Ok(Value::Float(v)),
        },
        UnaryOp::Neg => match numeric(value, line)? {
            Num::U(v) => Ok(Value::Signed((v as i128).wrapping_neg())),
            Num::I(v) => Ok(Value::Signed(v.wrapping_neg())),
            Num::F(v) => Ok(Value::Float(-v)),
        },
        UnaryOp::BitNot => match numeric(value, line)? {
            Num::U(v) => Ok(Value::Unsigned(!v)),
            Num::I(v) => Ok(Value::Signed(!v)),
            Num::F(_) => Err(Diagnostic::error(
                ErrorKind::InvalidOperation,
                line,
                "invalid floating point operation '~'",
            )),
        },
    }
}

fn invalid_op(op: BinaryOp, lhs: &Value, rhs: &Value, line: u32) -> Diagnostic {
    Diagnostic::error(
        ErrorKind::InvalidOperation,
        line,
        format!(
            "operator '{}' cannot combine {} and {}",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use BinaryOp::*;
    use Value::*;

    fn ok(op: BinaryOp, a: Value, b: Value) -> Value {
        binary(op, &a, &b, 1).unwrap()
    }

    fn kind(op: BinaryOp, a: Value, b: Value) -> ErrorKind {
        binary(op, &a, &b, 1).unwrap_err().kind
    }

    #[test]
    fn float_wins_promotion() {
        assert_eq!(ok(Add, Signed(1), Float(0.5)), Float(1.5));
        assert_eq!(ok(Mul, Float(2.0), Unsigned(3)), Float(6.0));
    }

    #[test]
    fn mixed_signedness_promotes_to_unsigned() {
        assert_eq!(ok(Add, Unsigned(1), Signed(2)), Unsigned(3));
        assert_eq!(ok(Sub, Signed(5), Signed(7)), Signed(-2));
        // -1 viewed as unsigned wraps; the comparison runs on u128.
        assert_eq!(ok(Gt, Signed(-1), Unsigned(1)), Bool(true));
    }

    #[test]
    fn division_by_zero_in_any_numeric_domain() {
        assert_eq!(kind(Div, Signed(1), Signed(0)), ErrorKind::DivisionByZero);
        assert_eq!(kind(Rem, Unsigned(1), Unsigned(0)), ErrorKind::DivisionByZero);
        assert_eq!(kind(Div, Float(1.0), Float(0.0)), ErrorKind::DivisionByZero);
    }

    #[test]
    fn float_bit_operations_are_invalid() {
        for op in [Shl, Shr, BitAnd, BitOr, BitXor, Rem] {
            assert_eq!(kind(op, Float(1.0), Float(2.0)), ErrorKind::InvalidOperation);
            assert_eq!(kind(op, Float(1.0), Signed(2)), ErrorKind::InvalidOperation);
        }
    }

    #[test]
    fn comparisons_yield_bool() {
        assert_eq!(ok(Lt, Signed(2), Signed(3)), Bool(true));
        assert_eq!(ok(Eq, Float(2.0), Unsigned(2)), Bool(true));
        assert_eq!(ok(Ge, Unsigned(3), Unsigned(3)), Bool(true));
    }

    #[test]
    fn string_concat_and_repeat() {
        assert_eq!(ok(Add, Str("ab".into()), Str("cd".into())), Str("abcd".into()));
        assert_eq!(ok(Add, Str("ab".into()), Char('c')), Str("abc".into()));
        assert_eq!(ok(Mul, Str("ab".into()), Signed(3)), Str("ababab".into()));
        assert_eq!(ok(Eq, Str("x".into()), Str("x".into())), Bool(true));
        assert_eq!(kind(Sub, Str("a".into()), Str("b".into())), ErrorKind::InvalidOperation);
        assert_eq!(kind(Add, Str("a".into()), Signed(1)), ErrorKind::InvalidOperation);
    }

    #[test]
    fn logical_operators_use_truthiness() {
        assert_eq!(ok(BoolAnd, Unsigned(1), Bool(true)), Bool(true));
        assert_eq!(ok(BoolOr, Unsigned(0), Bool(false)), Bool(false));
        assert_eq!(ok(BoolXor, Bool(true), Bool(true)), Bool(false));
    }

    #[test]
    fn unary_operators() {
        assert_eq!(unary(UnaryOp::Neg, &Unsigned(5), 1).unwrap(), Signed(-5));
        assert_eq!(unary(UnaryOp::BitNot, &Unsigned(0), 1).unwrap(), Unsigned(u128::MAX));
        assert_eq!(unary(UnaryOp::BoolNot, &Unsigned(0), 1).unwrap(), Bool(true));
        assert_eq!(unary(UnaryOp::BitNot, &Float(1.0), 1).unwrap_err().kind, ErrorKind::InvalidOperation);
    }

    #[test]
    fn shift_counts_saturate() {
        assert_eq!(ok(Shl, Unsigned(1), Unsigned(200)), Unsigned(0));
        assert_eq!(ok(Shr, Signed(-8), Signed(2)), Signed(-2));
    }
}
