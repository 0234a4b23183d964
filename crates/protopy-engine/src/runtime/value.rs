//! Runtime value representation.
//!
//! Scalars live inline; everything else is a shared heap object behind an
//! [`ObjRef`]. Values are `Send + Sync` so interpreters on different threads
//! can share them.

use std::fmt;
use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use super::object::{ObjRef, ObjectKind};

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    /// `None`
    None,
    /// `True` / `False`
    Bool(bool),
    /// Integer that fits in an `i64`
    Int(i64),
    /// Integer outside the `i64` range
    Long(Arc<BigInt>),
    /// IEEE 754 double
    Float(f64),
    /// Immutable string
    Str(Arc<str>),
    /// `...`
    Ellipsis,
    /// Returned by binary dunders that do not handle an operand
    NotImplemented,
    /// Heap object
    Object(ObjRef),
}

impl Value {
    /// Creates a string value.
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    /// Creates an integer, demoting to `Int` when it fits.
    pub fn from_bigint(n: BigInt) -> Self {
        match n.to_i64() {
            Some(small) => Value::Int(small),
            None => Value::Long(Arc::new(n)),
        }
    }

    /// Returns true for `None`.
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Returns true for `int` and `bool` values.
    pub fn is_int(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Long(_))
    }

    /// Returns true for `int`, `bool` and `float` values.
    pub fn is_number(&self) -> bool {
        self.is_int() || matches!(self, Value::Float(_))
    }

    /// The integer value, if this is an `int` or `bool`.
    pub fn to_bigint(&self) -> Option<BigInt> {
        match self {
            Value::Bool(b) => Some(BigInt::from(*b as i64)),
            Value::Int(n) => Some(BigInt::from(*n)),
            Value::Long(n) => Some((**n).clone()),
            _ => None,
        }
    }

    /// The integer value if it fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(n) => Some(*n),
            Value::Long(n) => n.to_i64(),
            _ => None,
        }
    }

    /// The numeric value as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Int(n) => Some(*n as f64),
            Value::Long(n) => n.to_f64(),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// The string contents, if this is a `str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The heap object, if any.
    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Truthiness of values that do not need dunder dispatch.
    ///
    /// Returns `None` for instances, whose truth is decided by `__bool__`
    /// or `__len__`.
    pub fn builtin_truth(&self) -> Option<bool> {
        let truth = match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Long(n) => !n.is_zero(),
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Ellipsis | Value::NotImplemented => true,
            Value::Object(obj) => match &obj.read().kind {
                ObjectKind::List(items) | ObjectKind::Tuple(items) => !items.is_empty(),
                ObjectKind::Dict(dict) => !dict.is_empty(),
                ObjectKind::Set(set) => !set.is_empty(),
                ObjectKind::Range(range) => range.len() > 0,
                ObjectKind::Instance => return None,
                _ => true,
            },
        };
        Some(truth)
    }

    /// Identity comparison (`is`).
    ///
    /// Heap objects compare by address. Scalars of the same type compare by
    /// value, so small ints and equal strings are identical.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None)
            | (Value::Ellipsis, Value::Ellipsis)
            | (Value::NotImplemented, Value::NotImplemented) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => Arc::ptr_eq(a, b),
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// A stable identifier for `id()`.
    pub fn identity(&self) -> usize {
        match self {
            Value::Object(obj) => obj.id(),
            Value::Str(s) => Arc::as_ptr(s) as *const u8 as usize,
            Value::Long(n) => Arc::as_ptr(n) as usize,
            Value::Int(n) => *n as usize,
            Value::Bool(b) => *b as usize + 1,
            Value::Float(x) => x.to_bits() as usize,
            Value::None => 0,
            Value::Ellipsis => 2,
            Value::NotImplemented => 3,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Long(n) => write!(f, "Long({})", n),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Ellipsis => f.write_str("Ellipsis"),
            Value::NotImplemented => f.write_str("NotImplemented"),
            Value::Object(obj) => write!(f, "Object({:?})", obj),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<ObjRef> for Value {
    fn from(obj: ObjRef) -> Self {
        Value::Object(obj)
    }
}

/// Formats a float the way `repr(float)` does: shortest round-trip digits,
/// always with a decimal point or exponent.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = x.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let text = format!("{:e}", x);
        let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return format!("{}e{}{:0>2}", mantissa, sign, digits);
    }
    let text = format!("{}", x);
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bigint_normalisation() {
        assert!(matches!(Value::from_bigint(BigInt::from(5)), Value::Int(5)));
        let big = BigInt::from(i64::MAX) + 1;
        assert!(matches!(Value::from_bigint(big), Value::Long(_)));
    }

    #[test]
    fn test_scalar_truth() {
        assert_eq!(Value::None.builtin_truth(), Some(false));
        assert_eq!(Value::Int(0).builtin_truth(), Some(false));
        assert_eq!(Value::str("x").builtin_truth(), Some(true));
        assert_eq!(Value::Float(0.0).builtin_truth(), Some(false));
    }

    #[test]
    fn test_identity() {
        assert!(Value::None.is(&Value::None));
        assert!(Value::Int(3).is(&Value::Int(3)));
        assert!(!Value::Int(1).is(&Value::Bool(true)));
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }
}
