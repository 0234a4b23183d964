//! `bool`, `int` and `float`, plus the numeric builtin functions.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

use super::{check_arity, check_method_arity, receiver, take_keywords, ExceptionKind, MethodTable};
use crate::runtime::{Args, Value};
use crate::vm::{quote_str, BinOp, Vm, VmResult};

// ============================================================================
// Constructors
// ============================================================================

/// `bool(x=False)`
pub fn bool_new(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "bool", 0, 1)?;
    match args.positional.first() {
        Some(value) => vm.truthy(value).map(Value::Bool),
        None => Ok(Value::Bool(false)),
    }
}

/// `int(x=0)` or `int(text, base)`.
pub fn int_new(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let keywords = take_keywords(vm, &mut args, "int", &["base"])?;
    check_arity(vm, &args, "int", 0, 2)?;
    let base = args.positional.get(1).cloned().or_else(|| keywords[0].clone());
    let value = match args.positional.first() {
        Some(value) => value.clone(),
        None if base.is_some() => return Err(vm.type_error("int() missing string argument")),
        None => return Ok(Value::Int(0)),
    };

    if let Some(base) = base {
        let base = vm.index_value(&base)?;
        if base != 0 && !(2..=36).contains(&base) {
            return Err(vm.value_error("int() base must be >= 2 and <= 36, or 0"));
        }
        return match &value {
            Value::Str(text) => parse_int_or_raise(vm, text, base as u32),
            _ => Err(vm.type_error("int() can't convert non-string with explicit base")),
        };
    }

    match &value {
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Int(_) | Value::Long(_) => Ok(value.clone()),
        Value::Float(x) => float_to_int(vm, *x),
        Value::Str(text) => parse_int_or_raise(vm, text, 10),
        _ => {
            if vm.user_class(&value).is_some() {
                for method in ["__int__", "__index__"] {
                    if let Some(result) = vm.call_special(&value, method, vec![])? {
                        if result.is_int() {
                            return Ok(result);
                        }
                        let type_name = vm.type_name(&result);
                        return Err(vm.type_error(format!("{} returned non-int (type {})", method, type_name)));
                    }
                }
            }
            let type_name = vm.type_name(&value);
            Err(vm.type_error(format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                type_name
            )))
        }
    }
}

fn parse_int_or_raise(vm: &mut Vm, text: &str, base: u32) -> VmResult<Value> {
    match parse_int(text, base) {
        Some(n) => Ok(Value::from_bigint(n)),
        None => Err(vm.value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            quote_str(text)
        ))),
    }
}

/// Parses an integer literal the way `int(text, base)` accepts it: optional
/// whitespace and sign, a radix prefix matching `base` (any prefix for base
/// 0), and single underscores between digits.
pub(crate) fn parse_int(text: &str, base: u32) -> Option<BigInt> {
    let trimmed = text.trim();
    let (negative, body) = match trimmed.as_bytes().first()? {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = body.to_ascii_lowercase();
    let prefixed = |p: &str| lower.starts_with(p);
    let (radix, digits) = match base {
        0 if prefixed("0x") => (16, &body[2..]),
        0 if prefixed("0o") => (8, &body[2..]),
        0 if prefixed("0b") => (2, &body[2..]),
        0 => {
            if body.len() > 1 && body.starts_with('0') && body.chars().any(|c| c != '0' && c != '_') {
                return None;
            }
            (10, body)
        }
        16 if prefixed("0x") => (16, &body[2..]),
        8 if prefixed("0o") => (8, &body[2..]),
        2 if prefixed("0b") => (2, &body[2..]),
        other => (other, body),
    };
    let digits = digits.strip_prefix('_').filter(|_| digits.len() != body.len()).unwrap_or(digits);
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return None;
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = BigInt::parse_bytes(cleaned.as_bytes(), radix)?;
    Some(if negative { -magnitude } else { magnitude })
}

pub(crate) fn float_to_int(vm: &mut Vm, x: f64) -> VmResult<Value> {
    if x.is_nan() {
        return Err(vm.value_error("cannot convert float NaN to integer"));
    }
    if x.is_infinite() {
        return Err(vm.error(ExceptionKind::OverflowError, "cannot convert float infinity to integer"));
    }
    let truncated = x.trunc();
    match BigInt::from_f64(truncated) {
        Some(n) => Ok(Value::from_bigint(n)),
        None => Err(vm.error(ExceptionKind::OverflowError, "cannot convert float to integer")),
    }
}

/// `float(x=0.0)`
pub fn float_new(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "float", 0, 1)?;
    let value = match args.positional.first() {
        Some(value) => value.clone(),
        None => return Ok(Value::Float(0.0)),
    };
    match &value {
        Value::Float(_) => Ok(value.clone()),
        Value::Bool(_) | Value::Int(_) | Value::Long(_) => match value.as_f64() {
            Some(x) if x.is_finite() => Ok(Value::Float(x)),
            _ => Err(vm.error(ExceptionKind::OverflowError, "int too large to convert to float")),
        },
        Value::Str(text) => match parse_float(text) {
            Some(x) => Ok(Value::Float(x)),
            None => Err(vm.value_error(format!("could not convert string to float: {}", quote_str(text)))),
        },
        _ => {
            if vm.user_class(&value).is_some() {
                if let Some(result) = vm.call_special(&value, "__float__", vec![])? {
                    return match result {
                        Value::Float(_) => Ok(result),
                        other => {
                            let type_name = vm.type_name(&other);
                            Err(vm.type_error(format!("__float__ returned non-float (type {})", type_name)))
                        }
                    };
                }
            }
            let type_name = vm.type_name(&value);
            Err(vm.type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                type_name
            )))
        }
    }
}

/// Parses `float(text)`: decimal or exponent notation, `inf`, `infinity`
/// and `nan` in any case, with single underscores between digits.
pub(crate) fn parse_float(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let bytes = trimmed.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'_' {
            let before = i > 0 && bytes[i - 1].is_ascii_digit();
            let after = bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
            if !before || !after {
                return None;
            }
        }
    }
    let cleaned: String = trimmed.chars().filter(|c| *c != '_').collect();
    let unsigned = cleaned.trim_start_matches(['+', '-']);
    let lower = unsigned.to_ascii_lowercase();
    if !matches!(lower.as_str(), "inf" | "infinity" | "nan")
        && !unsigned.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

// ============================================================================
// int / float methods
// ============================================================================

/// Methods of `int` (and so of `bool`).
pub const INT_METHODS: MethodTable = &[
    ("bit_length", int_bit_length),
    ("conjugate", number_conjugate),
    ("is_integer", int_is_integer),
];

/// Methods of `float`.
pub const FLOAT_METHODS: MethodTable = &[
    ("is_integer", float_is_integer),
    ("conjugate", number_conjugate),
];

fn int_receiver(vm: &mut Vm, args: &Args, method: &str) -> VmResult<BigInt> {
    let this = receiver(vm, args, method)?;
    match this.to_bigint() {
        Some(n) => Ok(n),
        None => Err(super::wrong_receiver(vm, method, "int", &this)),
    }
}

/// `int.bit_length()`: bits needed to represent `abs(self)`.
pub fn int_bit_length(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "bit_length", 0, 0)?;
    let n = int_receiver(vm, &args, "bit_length")?;
    Ok(Value::Int(n.bits() as i64))
}

/// `int.is_integer()`: always true.
pub fn int_is_integer(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "is_integer", 0, 0)?;
    int_receiver(vm, &args, "is_integer")?;
    Ok(Value::Bool(true))
}

/// `float.is_integer()`
pub fn float_is_integer(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "is_integer", 0, 0)?;
    match receiver(vm, &args, "is_integer")? {
        Value::Float(x) => Ok(Value::Bool(x.is_finite() && x.fract() == 0.0)),
        other => Err(super::wrong_receiver(vm, "is_integer", "float", &other)),
    }
}

/// `x.conjugate()`: real numbers are their own conjugate.
pub fn number_conjugate(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "conjugate", 0, 0)?;
    match receiver(vm, &args, "conjugate")? {
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        value if value.is_number() => Ok(value),
        other => Err(super::wrong_receiver(vm, "conjugate", "int", &other)),
    }
}

// ============================================================================
// Numeric builtin functions
// ============================================================================

/// An integer argument, accepting `__index__` on user objects.
pub(crate) fn int_arg(vm: &mut Vm, value: &Value) -> VmResult<BigInt> {
    if let Some(n) = value.to_bigint() {
        return Ok(n);
    }
    if vm.user_class(value).is_some() {
        if let Some(result) = vm.call_special(value, "__index__", vec![])? {
            if let Some(n) = result.to_bigint() {
                return Ok(n);
            }
        }
    }
    let type_name = vm.type_name(value);
    Err(vm.type_error(format!("'{}' object cannot be interpreted as an integer", type_name)))
}

/// `abs(x)`
pub fn builtin_abs(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "abs", 1, 1)?;
    let value = &args.positional[0];
    match value {
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Int(n) => Ok(match n.checked_abs() {
            Some(abs) => Value::Int(abs),
            None => Value::from_bigint(BigInt::from(*n).abs()),
        }),
        Value::Long(n) => Ok(Value::from_bigint(n.abs())),
        Value::Float(x) => Ok(Value::Float(x.abs())),
        _ => {
            if let Some(result) = vm.call_special(value, "__abs__", vec![])? {
                return Ok(result);
            }
            let type_name = vm.type_name(value);
            Err(vm.type_error(format!("bad operand type for abs(): '{}'", type_name)))
        }
    }
}

/// `round(number, ndigits=None)`: halves round to even.
pub fn builtin_round(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let keywords = take_keywords(vm, &mut args, "round", &["ndigits"])?;
    check_arity(vm, &args, "round", 1, 2)?;
    let number = args.positional[0].clone();
    let ndigits = match args.positional.get(1).cloned().or_else(|| keywords[0].clone()) {
        Some(Value::None) | None => None,
        Some(n) => Some(vm.index_value(&n)?),
    };
    match (&number, ndigits) {
        (Value::Float(x), None) => float_to_int(vm, x.round_ties_even()),
        (Value::Float(x), Some(digits)) => Ok(Value::Float(round_float(*x, digits))),
        (value, digits) if value.is_int() => {
            let n = value.to_bigint().unwrap_or_default();
            Ok(Value::from_bigint(round_int(&n, digits.unwrap_or(0))))
        }
        _ => {
            let extra = ndigits.map(Value::Int).into_iter().collect();
            if let Some(result) = vm.call_special(&number, "__round__", extra)? {
                return Ok(result);
            }
            let type_name = vm.type_name(&number);
            Err(vm.type_error(format!("type {} doesn't define __round__ method", type_name)))
        }
    }
}

fn round_float(x: f64, ndigits: i64) -> f64 {
    if !x.is_finite() || ndigits > 308 {
        return x;
    }
    if ndigits >= 0 {
        return format!("{:.*}", ndigits as usize, x).parse().unwrap_or(x);
    }
    let factor = 10f64.powi((-ndigits).min(400) as i32);
    if factor.is_infinite() {
        return 0.0 * x;
    }
    (x / factor).round_ties_even() * factor
}

fn round_int(n: &BigInt, ndigits: i64) -> BigInt {
    if ndigits >= 0 {
        return n.clone();
    }
    let exponent = u32::try_from(-ndigits).unwrap_or(u32::MAX).min(4300);
    let scale = num_traits::pow(BigInt::from(10), exponent as usize);
    let (quotient, remainder) = n.div_mod_floor(&scale);
    let quotient = match (&remainder * BigInt::from(2)).cmp(&scale) {
        Ordering::Less => quotient,
        Ordering::Greater => quotient + 1,
        Ordering::Equal if quotient.is_odd() => quotient + 1,
        Ordering::Equal => quotient,
    };
    quotient * scale
}

/// `divmod(a, b)`
pub fn builtin_divmod(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "divmod", 2, 2)?;
    let (a, b) = (&args.positional[0], &args.positional[1]);
    let quotient = vm.binary_op(BinOp::FloorDiv, a, b)?;
    let remainder = vm.binary_op(BinOp::Mod, a, b)?;
    Ok(vm.new_tuple(vec![quotient, remainder]))
}

/// `pow(base, exp, mod=None)`
pub fn builtin_pow(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let keywords = take_keywords(vm, &mut args, "pow", &["base", "exp", "mod"])?;
    let mut slots: Vec<Option<Value>> = (0..3).map(|i| args.positional.get(i).cloned()).collect();
    for (slot, keyword) in slots.iter_mut().zip(keywords) {
        if slot.is_none() {
            *slot = keyword;
        }
    }
    check_arity(vm, &args, "pow", 0, 3)?;
    let (base, exp, modulus) = match slots.as_slice() {
        [Some(base), Some(exp), modulus] => (base.clone(), exp.clone(), modulus.clone()),
        _ => return Err(vm.type_error("pow() missing required argument 'base' or 'exp'")),
    };
    match modulus {
        None | Some(Value::None) => vm.binary_op(BinOp::Pow, &base, &exp),
        Some(modulus) => {
            if !(base.is_int() && exp.is_int() && modulus.is_int()) {
                return Err(vm.type_error("pow() 3rd argument not allowed unless all arguments are integers"));
            }
            let base = base.to_bigint().unwrap_or_default();
            let exp = exp.to_bigint().unwrap_or_default();
            let modulus = modulus.to_bigint().unwrap_or_default();
            if modulus.is_zero() {
                return Err(vm.value_error("pow() 3rd argument cannot be 0"));
            }
            if exp.is_negative() {
                return Err(vm.value_error("pow() 2nd argument cannot be negative when 3rd argument specified"));
            }
            Ok(Value::from_bigint(base.modpow(&exp, &modulus)))
        }
    }
}

fn radix_text(vm: &mut Vm, args: &Args, name: &str, prefix: &str, radix: u32) -> VmResult<Value> {
    check_arity(vm, args, name, 1, 1)?;
    let n = int_arg(vm, &args.positional[0])?;
    let digits = n.abs().to_str_radix(radix);
    let sign = if n.is_negative() { "-" } else { "" };
    Ok(Value::from(format!("{}{}{}", sign, prefix, digits)))
}

/// `hex(x)`
pub fn builtin_hex(vm: &mut Vm, args: Args) -> VmResult<Value> {
    radix_text(vm, &args, "hex", "0x", 16)
}

/// `oct(x)`
pub fn builtin_oct(vm: &mut Vm, args: Args) -> VmResult<Value> {
    radix_text(vm, &args, "oct", "0o", 8)
}

/// `bin(x)`
pub fn builtin_bin(vm: &mut Vm, args: Args) -> VmResult<Value> {
    radix_text(vm, &args, "bin", "0b", 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_literals() {
        assert_eq!(parse_int(" 42 ", 10), Some(BigInt::from(42)));
        assert_eq!(parse_int("-1_000", 10), Some(BigInt::from(-1000)));
        assert_eq!(parse_int("0x1f", 0), Some(BigInt::from(31)));
        assert_eq!(parse_int("ff", 16), Some(BigInt::from(255)));
        assert_eq!(parse_int("0b101", 2), Some(BigInt::from(5)));
        assert_eq!(parse_int("1__0", 10), None);
        assert_eq!(parse_int("012", 0), None);
        assert_eq!(parse_int("3.5", 10), None);
        assert_eq!(parse_int("", 10), None);
    }

    #[test]
    fn test_parse_float_literals() {
        assert_eq!(parse_float("1.5"), Some(1.5));
        assert_eq!(parse_float(" -2e3 "), Some(-2000.0));
        assert_eq!(parse_float("1_000.5"), Some(1000.5));
        assert!(parse_float("nan").is_some_and(f64::is_nan));
        assert_eq!(parse_float("-Infinity"), Some(f64::NEG_INFINITY));
        assert_eq!(parse_float("abc"), None);
        assert_eq!(parse_float("0x10"), None);
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_float(2.675, 2), 2.67);
        assert_eq!(round_float(1234.5, -2), 1200.0);
        assert_eq!(round_int(&BigInt::from(250), -2), BigInt::from(200));
        assert_eq!(round_int(&BigInt::from(350), -2), BigInt::from(400));
        assert_eq!(round_int(&BigInt::from(-151), -2), BigInt::from(-200));
    }

    #[test]
    fn test_invalid_int_literal_message() {
        let mut vm = Vm::new(crate::config::EngineConfig::default());
        match int_new(&mut vm, Args::new(vec![Value::from("x")])) {
            Err(crate::vm::VmError::Exception(exc)) => assert_eq!(
                vm.describe_exception(&exc),
                "ValueError: invalid literal for int() with base 10: 'x'"
            ),
            _ => panic!("expected ValueError"),
        }
    }
}
