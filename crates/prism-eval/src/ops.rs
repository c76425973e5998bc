//! Operator semantics.

use std::cmp::Ordering;

use prism_parser::{BinOp, UnOp};

use crate::error::Error;
use crate::stack::ensure_sufficient_stack;
use crate::value::{Sequence, Value, Visit, Walk};
use crate::Result;

/// A numeric operand. Booleans take part in arithmetic as 0 and 1.
#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Int(n) => Some(Num::Int(*n)),
            Value::Bool(b) => Some(Num::Int(*b as i64)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Num::Int(n) => n == 0,
            Num::Float(f) => f == 0.0,
        }
    }
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> Error {
    Error::runtime(format!(
        "unsupported operand types for {}: {} and {}",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn overflow(op: BinOp) -> Error {
    Error::runtime(format!("integer overflow in {}", op.symbol()))
}

/// Apply a binary operator to two evaluated operands.
pub(crate) fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    match op {
        BinOp::Add => add(left, right),
        BinOp::Mul => multiply(left, right),
        BinOp::Sub | BinOp::Div | BinOp::IntDiv | BinOp::Mod | BinOp::Pow => {
            let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) else {
                return Err(unsupported(op, left, right));
            };
            arithmetic(op, a, b)
        }
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::BitNand | BinOp::BitNor => {
            bitwise(op, left, right)
        }
        BinOp::Eq => Ok(Value::Bool(left == right)),
        BinOp::NotEq => Ok(Value::Bool(left != right)),
        BinOp::Ge => compare(op, left, right, Ordering::is_ge),
        BinOp::Gt => compare(op, left, right, Ordering::is_gt),
        BinOp::Le => compare(op, left, right, Ordering::is_le),
        BinOp::Lt => compare(op, left, right, Ordering::is_lt),
    }
}

/// `+`: string concatenation if either side is a string, sequence
/// concatenation if both are sequences, numeric addition otherwise.
fn add(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::String(_), _) | (_, Value::String(_)) => {
            Ok(Value::String(format!("{}{}", left, right)))
        }
        (Value::Sequence(a), Value::Sequence(b)) => {
            let mut items = a.snapshot();
            items.extend(b.snapshot());
            Ok(Value::Sequence(Sequence::new(items)))
        }
        _ => match (Num::of(left), Num::of(right)) {
            (Some(a), Some(b)) => arithmetic(BinOp::Add, a, b),
            _ => Err(unsupported(BinOp::Add, left, right)),
        },
    }
}

/// `*`: numeric, or repetition of a string or sequence by an integer.
fn multiply(left: &Value, right: &Value) -> Result<Value> {
    let repeat = |count: i64| usize::try_from(count).unwrap_or(0);
    match (left, right) {
        (Value::String(s), Value::Int(n)) | (Value::Int(n), Value::String(s)) => {
            Ok(Value::String(s.repeat(repeat(*n))))
        }
        (Value::Sequence(seq), Value::Int(n)) | (Value::Int(n), Value::Sequence(seq)) => {
            let items = seq.snapshot();
            let mut out = Vec::with_capacity(items.len() * repeat(*n));
            for _ in 0..repeat(*n) {
                out.extend(items.iter().cloned());
            }
            Ok(Value::Sequence(Sequence::new(out)))
        }
        _ => match (Num::of(left), Num::of(right)) {
            (Some(a), Some(b)) => arithmetic(BinOp::Mul, a, b),
            _ => Err(unsupported(BinOp::Mul, left, right)),
        },
    }
}

fn arithmetic(op: BinOp, a: Num, b: Num) -> Result<Value> {
    if matches!(op, BinOp::Div | BinOp::IntDiv | BinOp::Mod) && b.is_zero() {
        return Err(Error::runtime("division by zero"));
    }

    match op {
        BinOp::Div => return Ok(Value::Float(a.as_f64() / b.as_f64())),
        BinOp::Pow => return Ok(Value::Float(a.as_f64().powf(b.as_f64()))),
        _ => {}
    }

    match (a, b) {
        (Num::Int(x), Num::Int(y)) => {
            let result = match op {
                BinOp::Add => x.checked_add(y),
                BinOp::Sub => x.checked_sub(y),
                BinOp::Mul => x.checked_mul(y),
                BinOp::IntDiv => floor_div(x, y),
                BinOp::Mod => floor_mod(x, y),
                _ => None,
            };
            result.map(Value::Int).ok_or_else(|| overflow(op))
        }
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            match op {
                BinOp::Add => Ok(Value::Float(x + y)),
                BinOp::Sub => Ok(Value::Float(x - y)),
                BinOp::Mul => Ok(Value::Float(x * y)),
                BinOp::IntDiv => {
                    let quotient = (x / y).floor();
                    if quotient.is_finite() {
                        Ok(Value::Int(quotient as i64))
                    } else {
                        Err(overflow(op))
                    }
                }
                // Truncated remainder, sign of the dividend.
                BinOp::Mod => Ok(Value::Float(x % y)),
                _ => Err(Error::runtime(format!("{} is not arithmetic", op.symbol()))),
            }
        }
    }
}

/// Integer division rounding toward negative infinity.
fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if (x % y != 0) && ((x < 0) != (y < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// Integer remainder taking the sign of the divisor.
fn floor_mod(x: i64, y: i64) -> Option<i64> {
    let r = x.checked_rem(y)?;
    if r != 0 && ((r < 0) != (y < 0)) {
        Some(r + y)
    } else {
        Some(r)
    }
}

fn bitwise(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    if let (Value::Bool(a), Value::Bool(b)) = (left, right) {
        let (a, b) = (*a, *b);
        return Ok(Value::Bool(match op {
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            BinOp::BitXor => a ^ b,
            BinOp::BitNand => !(a & b),
            _ => !(a | b),
        }));
    }
    let (Some(a), Some(b)) = (left.as_int(), right.as_int()) else {
        return Err(unsupported(op, left, right));
    };
    Ok(Value::Int(match op {
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::BitNand => !(a & b),
        _ => !(a | b),
    }))
}

fn compare(op: BinOp, left: &Value, right: &Value, test: fn(Ordering) -> bool) -> Result<Value> {
    let ordering = order(left, right).ok_or_else(|| {
        Error::runtime(format!(
            "cannot compare {} and {} with {}",
            left.type_name(),
            right.type_name(),
            op.symbol()
        ))
    })?;
    Ok(Value::Bool(test(ordering)))
}

/// Natural ordering, defined for numbers, strings and sequences.
pub(crate) fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Sequence(a), Value::Sequence(b)) => {
            // A pair met again below itself is a cycle with no order.
            let _visit = Visit::enter(Walk::Order, a.addr(), b.addr())?;
            let (a, b) = (a.snapshot(), b.snapshot());
            ensure_sufficient_stack(|| {
                for (x, y) in a.iter().zip(b.iter()) {
                    if x != y {
                        return order(x, y);
                    }
                }
                Some(a.len().cmp(&b.len()))
            })
        }
        _ => match (Num::of(left)?, Num::of(right)?) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        },
    }
}

pub(crate) fn unary(op: UnOp, operand: &Value) -> Result<Value> {
    match op {
        UnOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnOp::Neg => match Num::of(operand) {
            Some(Num::Int(n)) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| Error::runtime("integer overflow in negation")),
            Some(Num::Float(f)) => Ok(Value::Float(-f)),
            None => Err(Error::runtime(format!("cannot negate {}", operand.type_name()))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(op: BinOp, left: impl Into<Value>, right: impl Into<Value>) -> Result<Value> {
        binary(op, &left.into(), &right.into())
    }

    #[test]
    fn test_add_concatenates_strings() {
        assert_eq!(apply(BinOp::Add, "eggs", "spam").unwrap(), Value::from("eggsspam"));
        assert_eq!(apply(BinOp::Add, "eggs", 5).unwrap(), Value::from("eggs5"));
        assert_eq!(apply(BinOp::Add, 2.0, "x").unwrap(), Value::from("2.0x"));
    }

    #[test]
    fn test_add_joins_sequences_without_mutating() {
        let left = Value::from(vec![1, 2, 3]);
        let right = Value::from(vec![4, 5, 6]);
        let joined = binary(BinOp::Add, &left, &right).unwrap();
        assert_eq!(joined, Value::from(vec![1, 2, 3, 4, 5, 6]));
        assert_eq!(left, Value::from(vec![1, 2, 3]));
    }

    #[test]
    fn test_division_forms() {
        assert_eq!(apply(BinOp::Div, 3, 2).unwrap(), Value::Float(1.5));
        assert!(matches!(apply(BinOp::Div, 4, 2).unwrap(), Value::Float(f) if f == 2.0));
        assert_eq!(apply(BinOp::IntDiv, 3, 2).unwrap(), Value::Int(1));
        assert_eq!(apply(BinOp::IntDiv, -3, 2).unwrap(), Value::Int(-2));
        assert_eq!(apply(BinOp::IntDiv, 7.5, 2).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_division_by_zero() {
        for op in [BinOp::Div, BinOp::IntDiv, BinOp::Mod] {
            let err = apply(op, 1, 0).unwrap_err();
            assert_eq!(err.to_string(), "division by zero");
        }
        assert!(apply(BinOp::Div, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_modulo_sign_rules() {
        assert_eq!(apply(BinOp::Mod, -7, 3).unwrap(), Value::Int(2));
        assert_eq!(apply(BinOp::Mod, 7, -3).unwrap(), Value::Int(-2));
        assert_eq!(apply(BinOp::Mod, -7.0, 3).unwrap(), Value::Float(-1.0));
    }

    #[test]
    fn test_power_is_float() {
        assert_eq!(apply(BinOp::Pow, 2, 10).unwrap(), Value::Float(1024.0));
        assert!(matches!(apply(BinOp::Pow, 2, 10).unwrap(), Value::Float(_)));
    }

    #[test]
    fn test_booleans_count_as_integers() {
        assert_eq!(apply(BinOp::Add, true, 1).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_integer_overflow() {
        assert!(apply(BinOp::Add, i64::MAX, 1).is_err());
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(apply(BinOp::BitAnd, 6, 3).unwrap(), Value::Int(2));
        assert_eq!(apply(BinOp::BitXor, 6, 3).unwrap(), Value::Int(5));
        assert_eq!(apply(BinOp::BitNor, 0, 0).unwrap(), Value::Int(-1));
        assert_eq!(apply(BinOp::BitNand, true, false).unwrap(), Value::Bool(true));
        assert!(apply(BinOp::BitOr, 1.5, 1).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(apply(BinOp::Lt, 1, 2.5).unwrap(), Value::Bool(true));
        assert_eq!(apply(BinOp::Ge, "b", "a").unwrap(), Value::Bool(true));
        assert_eq!(
            binary(BinOp::Lt, &Value::from(vec![1, 2]), &Value::from(vec![1, 3])).unwrap(),
            Value::Bool(true)
        );
        assert!(apply(BinOp::Lt, "a", 1).is_err());
        assert_eq!(apply(BinOp::Eq, "a", 1).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_mismatched_arithmetic() {
        let err = apply(BinOp::Sub, "a", 1).unwrap_err();
        assert!(err.to_string().contains("string and int"), "{}", err);
    }

    #[test]
    fn test_repetition() {
        assert_eq!(apply(BinOp::Mul, "ab", 2).unwrap(), Value::from("abab"));
    }

    #[test]
    fn test_unary() {
        assert_eq!(unary(UnOp::Not, &Value::Int(0)).unwrap(), Value::Bool(true));
        assert_eq!(unary(UnOp::Neg, &Value::Float(1.5)).unwrap(), Value::Float(-1.5));
        assert!(unary(UnOp::Neg, &Value::from("x")).is_err());
    }
}
