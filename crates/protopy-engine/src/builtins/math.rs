//! The `math` module.
//!
//! Functions take `int`, `bool` or `float` arguments (or objects with
//! `__float__`) and compute in `f64`, except the integer functions
//! (`gcd`, `factorial`, `isqrt`, `comb`, `perm`) which stay exact.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

use super::{check_arity, number, ExceptionKind};
use crate::runtime::{Args, Namespace, NativeFn, Value};
use crate::vm::{Vm, VmResult};

/// Functions of the module.
const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("sqrt", math_sqrt),
    ("exp", math_exp),
    ("log", math_log),
    ("log2", math_log2),
    ("log10", math_log10),
    ("pow", math_pow),
    ("sin", math_sin),
    ("cos", math_cos),
    ("tan", math_tan),
    ("asin", math_asin),
    ("acos", math_acos),
    ("atan", math_atan),
    ("atan2", math_atan2),
    ("hypot", math_hypot),
    ("degrees", math_degrees),
    ("radians", math_radians),
    ("fabs", math_fabs),
    ("fmod", math_fmod),
    ("copysign", math_copysign),
    ("floor", math_floor),
    ("ceil", math_ceil),
    ("trunc", math_trunc),
    ("isnan", math_isnan),
    ("isinf", math_isinf),
    ("isfinite", math_isfinite),
    ("isclose", math_isclose),
    ("gcd", math_gcd),
    ("factorial", math_factorial),
    ("isqrt", math_isqrt),
    ("comb", math_comb),
    ("perm", math_perm),
];

/// Builds the module namespace.
pub fn namespace(vm: &Vm) -> Namespace {
    let names = Namespace::new();
    names.set("__name__", Value::from("math"));
    for (name, func) in FUNCTIONS {
        names.set(*name, vm.new_native(*name, *func));
    }
    names.set("pi", Value::Float(std::f64::consts::PI));
    names.set("e", Value::Float(std::f64::consts::E));
    names.set("tau", Value::Float(std::f64::consts::TAU));
    names.set("inf", Value::Float(f64::INFINITY));
    names.set("nan", Value::Float(f64::NAN));
    names
}

// ============================================================================
// Argument conversion
// ============================================================================

fn float_arg(vm: &mut Vm, value: &Value) -> VmResult<f64> {
    if let Some(x) = value.as_f64() {
        return Ok(x);
    }
    if let Value::Long(_) = value {
        return Err(vm.error(ExceptionKind::OverflowError, "int too large to convert to float"));
    }
    if vm.user_class(value).is_some() {
        if let Some(result) = vm.call_special(value, "__float__", Vec::new())? {
            if let Value::Float(x) = result {
                return Ok(x);
            }
        }
    }
    let type_name = vm.type_name(value);
    Err(vm.type_error(format!("must be real number, not {}", type_name)))
}

fn domain_error(vm: &mut Vm) -> crate::vm::VmError {
    vm.value_error("math domain error")
}

fn unary(vm: &mut Vm, args: &Args, name: &str) -> VmResult<f64> {
    check_arity(vm, args, name, 1, 1)?;
    float_arg(vm, &args.positional[0])
}

fn binary(vm: &mut Vm, args: &Args, name: &str) -> VmResult<(f64, f64)> {
    check_arity(vm, args, name, 2, 2)?;
    let a = float_arg(vm, &args.positional[0])?;
    let b = float_arg(vm, &args.positional[1])?;
    Ok((a, b))
}

/// A float result, checked for overflow of finite inputs.
fn finite_result(vm: &mut Vm, input_finite: bool, result: f64) -> VmResult<Value> {
    if input_finite && result.is_infinite() {
        return Err(vm.error(ExceptionKind::OverflowError, "math range error"));
    }
    Ok(Value::Float(result))
}

// ============================================================================
// Powers and logarithms
// ============================================================================

/// `math.sqrt(x)`
pub fn math_sqrt(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let x = unary(vm, &args, "sqrt")?;
    if x < 0.0 {
        return Err(domain_error(vm));
    }
    Ok(Value::Float(x.sqrt()))
}

/// `math.exp(x)`
pub fn math_exp(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let x = unary(vm, &args, "exp")?;
    finite_result(vm, x.is_finite(), x.exp())
}

fn positive_log(vm: &mut Vm, value: &Value, log: fn(f64) -> f64) -> VmResult<f64> {
    // Big ints go through their bit length so huge values still work.
    if let Value::Long(n) = value {
        if n.is_positive() {
            let bits = n.bits();
            let shift = bits.saturating_sub(53);
            let top: BigInt = &**n >> shift;
            let mantissa = top.to_f64().unwrap_or(f64::NAN);
            return Ok(log(mantissa) + shift as f64 * log(2.0));
        }
    }
    let x = float_arg(vm, value)?;
    if x <= 0.0 {
        return Err(domain_error(vm));
    }
    Ok(log(x))
}

/// `math.log(x[, base])`
pub fn math_log(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "log", 1, 2)?;
    let num = positive_log(vm, &args.positional[0], f64::ln)?;
    match args.positional.get(1) {
        Some(base) => {
            let den = positive_log(vm, base, f64::ln)?;
            if den == 0.0 {
                return Err(vm.error(ExceptionKind::ZeroDivisionError, "float division by zero"));
            }
            Ok(Value::Float(num / den))
        }
        None => Ok(Value::Float(num)),
    }
}

/// `math.log2(x)`
pub fn math_log2(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "log2", 1, 1)?;
    Ok(Value::Float(positive_log(vm, &args.positional[0], f64::log2)?))
}

/// `math.log10(x)`
pub fn math_log10(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "log10", 1, 1)?;
    Ok(Value::Float(positive_log(vm, &args.positional[0], f64::log10)?))
}

/// `math.pow(x, y)`: always a float.
pub fn math_pow(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (x, y) = binary(vm, &args, "pow")?;
    if x == 0.0 && y < 0.0 {
        return Err(domain_error(vm));
    }
    if x < 0.0 && y.is_finite() && y.fract() != 0.0 {
        return Err(domain_error(vm));
    }
    finite_result(vm, x.is_finite() && y.is_finite(), x.powf(y))
}

// ============================================================================
// Trigonometry
// ============================================================================

macro_rules! float_fn {
    ($(#[$doc:meta])* $name:ident, $label:literal, $op:expr, $domain:expr) => {
        $(#[$doc])*
        pub fn $name(vm: &mut Vm, args: Args) -> VmResult<Value> {
            let x = unary(vm, &args, $label)?;
            let in_domain: fn(f64) -> bool = $domain;
            if !in_domain(x) {
                return Err(domain_error(vm));
            }
            let op: fn(f64) -> f64 = $op;
            Ok(Value::Float(op(x)))
        }
    };
}

float_fn!(/// `math.sin(x)`
    math_sin, "sin", f64::sin, |x| !x.is_infinite());
float_fn!(/// `math.cos(x)`
    math_cos, "cos", f64::cos, |x| !x.is_infinite());
float_fn!(/// `math.tan(x)`
    math_tan, "tan", f64::tan, |x| !x.is_infinite());
float_fn!(/// `math.asin(x)`
    math_asin, "asin", f64::asin, |x| x.is_nan() || (-1.0..=1.0).contains(&x));
float_fn!(/// `math.acos(x)`
    math_acos, "acos", f64::acos, |x| x.is_nan() || (-1.0..=1.0).contains(&x));
float_fn!(/// `math.atan(x)`
    math_atan, "atan", f64::atan, |_| true);
float_fn!(/// `math.degrees(x)`
    math_degrees, "degrees", f64::to_degrees, |_| true);
float_fn!(/// `math.radians(x)`
    math_radians, "radians", f64::to_radians, |_| true);
float_fn!(/// `math.fabs(x)`
    math_fabs, "fabs", f64::abs, |_| true);

/// `math.atan2(y, x)`
pub fn math_atan2(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (y, x) = binary(vm, &args, "atan2")?;
    Ok(Value::Float(y.atan2(x)))
}

/// `math.hypot(*coordinates)`
pub fn math_hypot(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let mut sum = 0.0f64;
    for value in &args.positional {
        let x = float_arg(vm, value)?;
        if x.is_infinite() {
            return Ok(Value::Float(f64::INFINITY));
        }
        sum += x * x;
    }
    Ok(Value::Float(sum.sqrt()))
}

/// `math.fmod(x, y)`: the remainder with the sign of `x`.
pub fn math_fmod(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (x, y) = binary(vm, &args, "fmod")?;
    if y == 0.0 || x.is_infinite() {
        return Err(domain_error(vm));
    }
    Ok(Value::Float(x % y))
}

/// `math.copysign(x, y)`
pub fn math_copysign(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (x, y) = binary(vm, &args, "copysign")?;
    Ok(Value::Float(x.copysign(y)))
}

// ============================================================================
// Rounding and classification
// ============================================================================

fn rounded(vm: &mut Vm, args: Args, name: &str, dunder: &str, op: fn(f64) -> f64) -> VmResult<Value> {
    check_arity(vm, &args, name, 1, 1)?;
    let value = &args.positional[0];
    if value.is_int() {
        return Ok(Value::from_bigint(value.to_bigint().unwrap_or_default()));
    }
    if vm.user_class(value).is_some() {
        if let Some(result) = vm.call_special(value, dunder, Vec::new())? {
            return Ok(result);
        }
    }
    let x = float_arg(vm, value)?;
    number::float_to_int(vm, op(x))
}

/// `math.floor(x)`: an `int`.
pub fn math_floor(vm: &mut Vm, args: Args) -> VmResult<Value> {
    rounded(vm, args, "floor", "__floor__", f64::floor)
}

/// `math.ceil(x)`: an `int`.
pub fn math_ceil(vm: &mut Vm, args: Args) -> VmResult<Value> {
    rounded(vm, args, "ceil", "__ceil__", f64::ceil)
}

/// `math.trunc(x)`: an `int`.
pub fn math_trunc(vm: &mut Vm, args: Args) -> VmResult<Value> {
    rounded(vm, args, "trunc", "__trunc__", f64::trunc)
}

/// `math.isnan(x)`
pub fn math_isnan(vm: &mut Vm, args: Args) -> VmResult<Value> {
    Ok(Value::Bool(unary(vm, &args, "isnan")?.is_nan()))
}

/// `math.isinf(x)`
pub fn math_isinf(vm: &mut Vm, args: Args) -> VmResult<Value> {
    Ok(Value::Bool(unary(vm, &args, "isinf")?.is_infinite()))
}

/// `math.isfinite(x)`
pub fn math_isfinite(vm: &mut Vm, args: Args) -> VmResult<Value> {
    Ok(Value::Bool(unary(vm, &args, "isfinite")?.is_finite()))
}

/// `math.isclose(a, b, *, rel_tol=1e-09, abs_tol=0.0)`
pub fn math_isclose(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let mut tolerances = super::take_keywords(vm, &mut args, "isclose", &["rel_tol", "abs_tol"])?.into_iter();
    let (a, b) = binary(vm, &args, "isclose")?;
    let rel_tol = match tolerances.next().flatten() {
        Some(v) => float_arg(vm, &v)?,
        None => 1e-9,
    };
    let abs_tol = match tolerances.next().flatten() {
        Some(v) => float_arg(vm, &v)?,
        None => 0.0,
    };
    if rel_tol < 0.0 || abs_tol < 0.0 {
        return Err(vm.value_error("tolerances must be non-negative"));
    }
    if a == b {
        return Ok(Value::Bool(true));
    }
    if a.is_infinite() || b.is_infinite() {
        return Ok(Value::Bool(false));
    }
    let diff = (a - b).abs();
    let close = diff <= (rel_tol * b.abs()).max(rel_tol * a.abs()) || diff <= abs_tol;
    Ok(Value::Bool(close))
}

// ============================================================================
// Integer functions
// ============================================================================

fn exact_int(vm: &mut Vm, value: &Value, func: &str) -> VmResult<BigInt> {
    match value.to_bigint() {
        Some(n) => Ok(n),
        None => {
            let type_name = vm.type_name(value);
            Err(vm.type_error(format!(
                "{}() argument must be int, not '{}'",
                func, type_name
            )))
        }
    }
}

fn non_negative(vm: &mut Vm, value: &Value, func: &str, what: &str) -> VmResult<BigInt> {
    let n = exact_int(vm, value, func)?;
    if n.is_negative() {
        return Err(vm.value_error(format!("{}() {}", func, what)));
    }
    Ok(n)
}

/// `math.gcd(*integers)`
pub fn math_gcd(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let mut acc = BigInt::zero();
    for value in &args.positional {
        let n = exact_int(vm, value, "gcd")?;
        acc = acc.gcd(&n);
    }
    Ok(Value::from_bigint(acc))
}

/// `math.factorial(n)`
pub fn math_factorial(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "factorial", 1, 1)?;
    let n = non_negative(vm, &args.positional[0], "factorial", "not defined for negative values")?;
    let mut acc = BigInt::one();
    let mut i = BigInt::from(2);
    while i <= n {
        acc *= &i;
        i += 1;
    }
    Ok(Value::from_bigint(acc))
}

/// `math.isqrt(n)`: the integer square root.
pub fn math_isqrt(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "isqrt", 1, 1)?;
    let n = non_negative(vm, &args.positional[0], "isqrt", "argument must be nonnegative")?;
    Ok(Value::from_bigint(n.sqrt()))
}

/// Falling factorial `n * (n-1) * ... * (n-k+1)`.
fn falling(n: &BigInt, k: &BigInt) -> BigInt {
    let mut acc = BigInt::one();
    let mut i = BigInt::zero();
    while &i < k {
        acc *= n - &i;
        i += 1;
    }
    acc
}

/// `math.comb(n, k)`
pub fn math_comb(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "comb", 2, 2)?;
    let n = non_negative(vm, &args.positional[0], "comb", "n must be a non-negative integer")?;
    let k = non_negative(vm, &args.positional[1], "comb", "k must be a non-negative integer")?;
    if k > n {
        return Ok(Value::Int(0));
    }
    let k = std::cmp::min(k.clone(), &n - &k);
    let mut denominator = BigInt::one();
    let mut i = BigInt::from(2);
    while i <= k {
        denominator *= &i;
        i += 1;
    }
    Ok(Value::from_bigint(falling(&n, &k) / denominator))
}

/// `math.perm(n, k=None)`
pub fn math_perm(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "perm", 1, 2)?;
    let n = non_negative(vm, &args.positional[0], "perm", "n must be a non-negative integer")?;
    let k = match args.positional.get(1) {
        Some(k) if !k.is_none() => non_negative(vm, k, "perm", "k must be a non-negative integer")?,
        _ => n.clone(),
    };
    if k > n {
        return Ok(Value::Int(0));
    }
    Ok(Value::from_bigint(falling(&n, &k)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::vm::VmError;

    fn call(vm: &mut Vm, func: NativeFn, args: Vec<Value>) -> VmResult<Value> {
        func(vm, Args::new(args))
    }

    #[test]
    fn test_sqrt_domain() {
        let mut vm = Vm::new(EngineConfig::default());
        assert!(matches!(call(&mut vm, math_sqrt, vec![Value::Int(9)]), Ok(Value::Float(x)) if x == 3.0));
        match call(&mut vm, math_sqrt, vec![Value::Int(-1)]) {
            Err(VmError::Exception(exc)) => {
                assert_eq!(vm.describe_exception(&exc), "ValueError: math domain error")
            }
            _ => panic!("expected ValueError"),
        }
    }

    #[test]
    fn test_floor_returns_int() {
        let mut vm = Vm::new(EngineConfig::default());
        assert!(matches!(call(&mut vm, math_floor, vec![Value::Float(-2.5)]), Ok(Value::Int(-3))));
        assert!(matches!(call(&mut vm, math_ceil, vec![Value::Float(2.1)]), Ok(Value::Int(3))));
        assert!(call(&mut vm, math_floor, vec![Value::Float(f64::NAN)]).is_err());
    }

    #[test]
    fn test_integer_functions() {
        let mut vm = Vm::new(EngineConfig::default());
        assert!(matches!(call(&mut vm, math_gcd, vec![Value::Int(12), Value::Int(-18)]), Ok(Value::Int(6))));
        assert!(matches!(call(&mut vm, math_factorial, vec![Value::Int(5)]), Ok(Value::Int(120))));
        assert!(matches!(call(&mut vm, math_comb, vec![Value::Int(5), Value::Int(2)]), Ok(Value::Int(10))));
        assert!(matches!(call(&mut vm, math_perm, vec![Value::Int(5), Value::Int(2)]), Ok(Value::Int(20))));
        assert!(matches!(call(&mut vm, math_isqrt, vec![Value::Int(17)]), Ok(Value::Int(4))));
        let big = call(&mut vm, math_factorial, vec![Value::Int(25)]).unwrap();
        assert!(matches!(big, Value::Long(_)));
    }

    #[test]
    fn test_log_of_big_int() {
        let mut vm = Vm::new(EngineConfig::default());
        let big = Value::from_bigint(BigInt::from(10).pow(400u32));
        match call(&mut vm, math_log10, vec![big]) {
            Ok(Value::Float(x)) => assert!((x - 400.0).abs() < 1e-9),
            _ => panic!("expected a float"),
        }
    }

    #[test]
    fn test_isclose() {
        let mut vm = Vm::new(EngineConfig::default());
        let close = call(&mut vm, math_isclose, vec![Value::Float(1.0), Value::Float(1.0 + 1e-12)]).unwrap();
        assert!(matches!(close, Value::Bool(true)));
    }
}
