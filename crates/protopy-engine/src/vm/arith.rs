//! Numeric arithmetic on `bool`, `int` and `float`.
//!
//! Integers stay in `i64` while the checked operation succeeds and promote
//! to `BigInt` when it overflows. Floor division and modulo round toward
//! negative infinity.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

use super::ops::{BinOp, UnaryOp};
use crate::runtime::Value;

/// Why a numeric operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ArithError {
    /// `ZeroDivisionError(message)`
    ZeroDivision(&'static str),
    /// `OverflowError(message)`
    Overflow(&'static str),
    /// `ValueError(message)`
    Domain(&'static str),
}

type ArithResult = Result<Value, ArithError>;

/// Largest integer, in bits, that `<<` and `**` will build.
const MAX_INT_BITS: u64 = 1 << 28;

const TOO_MANY_DIGITS: ArithError = ArithError::Overflow("too many digits in integer");

/// Applies `op` when both operands are numbers. `None` means the operand
/// types are not handled here.
pub(crate) fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Option<ArithResult> {
    if !lhs.is_number() || !rhs.is_number() {
        return None;
    }
    if let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) {
        match op {
            BinOp::And => return Some(Ok(Value::Bool(a & b))),
            BinOp::Or => return Some(Ok(Value::Bool(a | b))),
            BinOp::Xor => return Some(Ok(Value::Bool(a ^ b))),
            _ => {}
        }
    }
    if lhs.is_int() && rhs.is_int() {
        return Some(match (lhs.as_i64(), rhs.as_i64()) {
            (Some(a), Some(b)) if !matches!(lhs, Value::Long(_)) && !matches!(rhs, Value::Long(_)) => {
                small_int(op, a, b)
            }
            _ => big_int(op, &lhs.to_bigint()?, &rhs.to_bigint()?),
        });
    }
    if matches!(op, BinOp::LShift | BinOp::RShift | BinOp::And | BinOp::Or | BinOp::Xor) {
        return None;
    }
    let a = match to_float(lhs) {
        Ok(a) => a,
        Err(e) => return Some(Err(e)),
    };
    let b = match to_float(rhs) {
        Ok(b) => b,
        Err(e) => return Some(Err(e)),
    };
    Some(float(op, a, b))
}

/// Applies a unary operator to a number.
pub(crate) fn unary(op: UnaryOp, operand: &Value) -> Option<Value> {
    Some(match (op, operand) {
        (UnaryOp::Pos, Value::Bool(b)) => Value::Int(*b as i64),
        (UnaryOp::Pos, Value::Int(_) | Value::Long(_) | Value::Float(_)) => operand.clone(),
        (UnaryOp::Neg, Value::Float(x)) => Value::Float(-x),
        (UnaryOp::Neg, Value::Bool(_) | Value::Int(_)) => {
            let n = operand.as_i64()?;
            match n.checked_neg() {
                Some(neg) => Value::Int(neg),
                None => Value::from_bigint(-BigInt::from(n)),
            }
        }
        (UnaryOp::Neg, Value::Long(n)) => Value::from_bigint(-(**n).clone()),
        (UnaryOp::Invert, Value::Bool(_) | Value::Int(_)) => Value::Int(!operand.as_i64()?),
        (UnaryOp::Invert, Value::Long(n)) => Value::from_bigint(-(**n).clone() - 1),
        _ => return None,
    })
}

fn to_float(value: &Value) -> Result<f64, ArithError> {
    match value {
        Value::Float(x) => Ok(*x),
        Value::Long(n) => n
            .to_f64()
            .filter(|x| x.is_finite())
            .ok_or(ArithError::Overflow("int too large to convert to float")),
        other => Ok(other.as_f64().unwrap_or(0.0)),
    }
}

fn small_int(op: BinOp, a: i64, b: i64) -> ArithResult {
    let checked = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::TrueDiv => {
            if b == 0 {
                return Err(ArithError::ZeroDivision("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv | BinOp::Mod => {
            if b == 0 {
                return Err(ArithError::ZeroDivision("integer division or modulo by zero"));
            }
            if a == i64::MIN && b == -1 {
                None
            } else if op == BinOp::FloorDiv {
                Some(Integer::div_floor(&a, &b))
            } else {
                Some(Integer::mod_floor(&a, &b))
            }
        }
        BinOp::Pow => {
            if b < 0 {
                return float(BinOp::Pow, a as f64, b as f64);
            }
            u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp))
        }
        BinOp::LShift => {
            if b < 0 {
                return Err(ArithError::Domain("negative shift count"));
            }
            if a == 0 {
                Some(0)
            } else if b < 64 {
                let shifted = (a as i128) << b;
                i64::try_from(shifted).ok()
            } else {
                None
            }
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(ArithError::Domain("negative shift count"));
            }
            Some(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
        }
        BinOp::And => Some(a & b),
        BinOp::Or => Some(a | b),
        BinOp::Xor => Some(a ^ b),
    };
    match checked {
        Some(n) => Ok(Value::Int(n)),
        None => big_int(op, &BigInt::from(a), &BigInt::from(b)),
    }
}

fn big_int(op: BinOp, a: &BigInt, b: &BigInt) -> ArithResult {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::TrueDiv => {
            if b.is_zero() {
                return Err(ArithError::ZeroDivision("division by zero"));
            }
            let x = to_float(&Value::from_bigint(a.clone()))?;
            let y = to_float(&Value::from_bigint(b.clone()))?;
            return Ok(Value::Float(x / y));
        }
        BinOp::FloorDiv => {
            if b.is_zero() {
                return Err(ArithError::ZeroDivision("integer division or modulo by zero"));
            }
            Integer::div_floor(a, b)
        }
        BinOp::Mod => {
            if b.is_zero() {
                return Err(ArithError::ZeroDivision("integer division or modulo by zero"));
            }
            a.mod_floor(b)
        }
        BinOp::Pow => {
            if b.is_negative() {
                let x = to_float(&Value::from_bigint(a.clone()))?;
                let y = to_float(&Value::from_bigint(b.clone()))?;
                return float(BinOp::Pow, x, y);
            }
            match b.to_u32() {
                Some(exp) => {
                    // |a| >= 2^(bits - 1), so this is a lower bound on the result size.
                    if a.bits().saturating_sub(1).saturating_mul(u64::from(exp)) > MAX_INT_BITS {
                        return Err(TOO_MANY_DIGITS);
                    }
                    a.pow(exp)
                }
                None if a.is_zero() || a == &BigInt::from(1) => a.clone(),
                None if a == &BigInt::from(-1) => {
                    if b.is_even() { BigInt::from(1) } else { a.clone() }
                }
                None => return Err(ArithError::Overflow("exponent too large")),
            }
        }
        BinOp::LShift => {
            if b.is_negative() {
                return Err(ArithError::Domain("negative shift count"));
            }
            if a.is_zero() {
                return Ok(Value::Int(0));
            }
            let shift = b
                .to_u64()
                .filter(|shift| a.bits().saturating_add(*shift) <= MAX_INT_BITS)
                .ok_or(TOO_MANY_DIGITS)?;
            a << shift as usize
        }
        BinOp::RShift => {
            if b.is_negative() {
                return Err(ArithError::Domain("negative shift count"));
            }
            match b.to_usize() {
                Some(shift) => a >> shift,
                None => BigInt::from(if a.is_negative() { -1 } else { 0 }),
            }
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
    };
    Ok(Value::from_bigint(result))
}

fn float(op: BinOp, a: f64, b: f64) -> ArithResult {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::TrueDiv => {
            if b == 0.0 {
                return Err(ArithError::ZeroDivision("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(ArithError::ZeroDivision("float floor division by zero"));
            }
            float_divmod(a, b).0
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(ArithError::ZeroDivision("float modulo"));
            }
            float_divmod(a, b).1
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ArithError::ZeroDivision("0.0 cannot be raised to a negative power"));
            }
            if a < 0.0 && b.fract() != 0.0 && b.is_finite() {
                return Err(ArithError::Domain("negative number cannot be raised to a fractional power"));
            }
            let result = a.powf(b);
            if result.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(ArithError::Overflow("numerical result out of range"));
            }
            result
        }
        BinOp::LShift | BinOp::RShift | BinOp::And | BinOp::Or | BinOp::Xor => {
            return Err(ArithError::Domain("unsupported float operation"));
        }
    };
    Ok(Value::Float(result))
}

/// `divmod` on floats: the modulo takes the sign of the divisor.
fn float_divmod(a: f64, b: f64) -> (f64, f64) {
    let mut modulo = a % b;
    let mut div = (a - modulo) / b;
    if modulo != 0.0 {
        if (b < 0.0) != (modulo < 0.0) {
            modulo += b;
            div -= 1.0;
        }
    } else {
        modulo = 0.0_f64.copysign(b);
    }
    let floor = div.floor();
    if div - floor > 0.5 {
        div = floor + 1.0;
    } else {
        div = floor;
    }
    (div, modulo)
}

/// Orders two numbers, or `None` when either is NaN.
pub(crate) fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Float(x), other) => compare_float_int(*x, &other.to_bigint()?),
        (other, Value::Float(x)) => compare_float_int(*x, &other.to_bigint()?).map(Ordering::reverse),
        _ => match (lhs.as_i64(), rhs.as_i64()) {
            (Some(a), Some(b)) if !matches!(lhs, Value::Long(_)) && !matches!(rhs, Value::Long(_)) => {
                Some(a.cmp(&b))
            }
            _ => Some(lhs.to_bigint()?.cmp(&rhs.to_bigint()?)),
        },
    }
}

/// Compares a float against an integer without losing precision.
fn compare_float_int(x: f64, n: &BigInt) -> Option<Ordering> {
    if x.is_nan() {
        return None;
    }
    if x.is_infinite() {
        return Some(if x > 0.0 { Ordering::Greater } else { Ordering::Less });
    }
    let floor = x.floor();
    let whole = BigInt::from_f64(floor)?;
    match whole.cmp(n) {
        Ordering::Equal if x > floor => Some(Ordering::Greater),
        ordering => Some(ordering),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Value {
        Value::Int(n)
    }

    fn eval(op: BinOp, a: Value, b: Value) -> ArithResult {
        binary(op, &a, &b).expect("numeric operands")
    }

    #[test]
    fn test_overflow_promotes() {
        let result = eval(BinOp::Mul, int(i64::MAX), int(2)).unwrap();
        assert!(matches!(result, Value::Long(_)));
        let back = eval(BinOp::FloorDiv, result, int(2)).unwrap();
        assert!(matches!(back, Value::Int(n) if n == i64::MAX));
        assert!(matches!(eval(BinOp::Pow, int(2), int(100)).unwrap(), Value::Long(_)));
    }

    #[test]
    fn test_floor_semantics() {
        assert!(matches!(eval(BinOp::FloorDiv, int(-7), int(2)).unwrap(), Value::Int(-4)));
        assert!(matches!(eval(BinOp::Mod, int(-7), int(2)).unwrap(), Value::Int(1)));
        assert!(matches!(eval(BinOp::Mod, int(7), int(-2)).unwrap(), Value::Int(-1)));
        assert!(matches!(eval(BinOp::Mod, Value::Float(-7.5), int(2)).unwrap(), Value::Float(x) if x == 0.5));
        assert!(matches!(eval(BinOp::FloorDiv, Value::Float(7.0), int(-2)).unwrap(), Value::Float(x) if x == -4.0));
    }

    #[test]
    fn test_division_errors() {
        assert_eq!(
            eval(BinOp::FloorDiv, int(1), int(0)).unwrap_err(),
            ArithError::ZeroDivision("integer division or modulo by zero")
        );
        assert_eq!(eval(BinOp::TrueDiv, int(1), int(0)).unwrap_err(), ArithError::ZeroDivision("division by zero"));
        assert_eq!(
            eval(BinOp::TrueDiv, Value::Float(1.0), int(0)).unwrap_err(),
            ArithError::ZeroDivision("float division by zero")
        );
        assert_eq!(eval(BinOp::LShift, int(1), int(-1)).unwrap_err(), ArithError::Domain("negative shift count"));
    }

    #[test]
    fn test_mixed_and_bool() {
        assert!(matches!(eval(BinOp::TrueDiv, int(7), int(2)).unwrap(), Value::Float(x) if x == 3.5));
        assert!(matches!(eval(BinOp::Pow, int(2), int(-1)).unwrap(), Value::Float(x) if x == 0.5));
        assert!(matches!(eval(BinOp::Add, Value::Bool(true), int(1)).unwrap(), Value::Int(2)));
        assert!(matches!(eval(BinOp::And, Value::Bool(true), Value::Bool(false)).unwrap(), Value::Bool(false)));
        assert!(matches!(eval(BinOp::LShift, int(1), int(70)).unwrap(), Value::Long(_)));
        assert!(binary(BinOp::Add, &Value::from("a"), &int(1)).is_none());
        assert!(binary(BinOp::Xor, &Value::Float(1.0), &int(1)).is_none());
    }

    #[test]
    fn test_huge_results_are_rejected() {
        assert_eq!(eval(BinOp::LShift, int(1), int(100_000_000_000)).unwrap_err(), TOO_MANY_DIGITS);
        assert_eq!(eval(BinOp::Pow, int(3), int(4_000_000_000)).unwrap_err(), TOO_MANY_DIGITS);
        assert!(matches!(eval(BinOp::LShift, int(0), int(100_000_000_000)).unwrap(), Value::Int(0)));
        assert!(matches!(eval(BinOp::Pow, int(-1), int(4_000_000_001)).unwrap(), Value::Int(-1)));
        assert!(matches!(eval(BinOp::LShift, int(1), int(4096)).unwrap(), Value::Long(_)));
    }

    #[test]
    fn test_unary() {
        assert!(matches!(unary(UnaryOp::Neg, &int(i64::MIN)), Some(Value::Long(_))));
        assert!(matches!(unary(UnaryOp::Invert, &int(5)), Some(Value::Int(-6))));
        assert!(matches!(unary(UnaryOp::Pos, &Value::Bool(true)), Some(Value::Int(1))));
        assert!(unary(UnaryOp::Invert, &Value::Float(1.0)).is_none());
    }

    #[test]
    fn test_compare_mixed() {
        assert_eq!(compare(&int(1), &Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(compare(&Value::Float(2.0), &int(2)), Some(Ordering::Equal));
        assert_eq!(compare(&Value::Float(f64::NAN), &int(2)), None);
        let big = Value::from_bigint(BigInt::from(i64::MAX) * 4);
        assert_eq!(compare(&big, &int(3)), Some(Ordering::Greater));
    }
}
