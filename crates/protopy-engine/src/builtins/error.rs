//! The builtin exception hierarchy.
//!
//! ```text
//! BaseException
//!  ├── GeneratorExit
//!  ├── KeyboardInterrupt
//!  └── Exception
//!       ├── ArithmeticError ── ZeroDivisionError, OverflowError
//!       ├── LookupError ────── KeyError, IndexError
//!       ├── NameError ──────── UnboundLocalError
//!       ├── RuntimeError ───── RecursionError, NotImplementedError
//!       ├── ImportError ────── ModuleNotFoundError
//!       └── TypeError, ValueError, AttributeError, StopIteration,
//!           StopAsyncIteration, AssertionError, SyntaxError, EOFError
//! ```
//!
//! Every class here is tagged [`TypeTag::Exception`](crate::runtime::TypeTag)
//! and instances are plain instances carrying `args`, `__cause__` and
//! `__context__` attributes.

use super::{check_method_arity, receiver, MethodTable};
use crate::runtime::{Args, Value};
use crate::vm::{Vm, VmResult};

/// A builtin exception class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ExceptionKind {
    BaseException,
    GeneratorExit,
    KeyboardInterrupt,
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    KeyError,
    IndexError,
    TypeError,
    ValueError,
    NameError,
    UnboundLocalError,
    AttributeError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    StopIteration,
    StopAsyncIteration,
    AssertionError,
    ImportError,
    ModuleNotFoundError,
    SyntaxError,
    EOFError,
}

impl ExceptionKind {
    /// Every kind, each after its base.
    pub const ALL: [ExceptionKind; 25] = [
        ExceptionKind::BaseException,
        ExceptionKind::GeneratorExit,
        ExceptionKind::KeyboardInterrupt,
        ExceptionKind::Exception,
        ExceptionKind::ArithmeticError,
        ExceptionKind::ZeroDivisionError,
        ExceptionKind::OverflowError,
        ExceptionKind::LookupError,
        ExceptionKind::KeyError,
        ExceptionKind::IndexError,
        ExceptionKind::TypeError,
        ExceptionKind::ValueError,
        ExceptionKind::NameError,
        ExceptionKind::UnboundLocalError,
        ExceptionKind::AttributeError,
        ExceptionKind::RuntimeError,
        ExceptionKind::RecursionError,
        ExceptionKind::NotImplementedError,
        ExceptionKind::StopIteration,
        ExceptionKind::StopAsyncIteration,
        ExceptionKind::AssertionError,
        ExceptionKind::ImportError,
        ExceptionKind::ModuleNotFoundError,
        ExceptionKind::SyntaxError,
        ExceptionKind::EOFError,
    ];

    /// The class name.
    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::BaseException => "BaseException",
            ExceptionKind::GeneratorExit => "GeneratorExit",
            ExceptionKind::KeyboardInterrupt => "KeyboardInterrupt",
            ExceptionKind::Exception => "Exception",
            ExceptionKind::ArithmeticError => "ArithmeticError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
            ExceptionKind::OverflowError => "OverflowError",
            ExceptionKind::LookupError => "LookupError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::UnboundLocalError => "UnboundLocalError",
            ExceptionKind::AttributeError => "AttributeError",
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::RecursionError => "RecursionError",
            ExceptionKind::NotImplementedError => "NotImplementedError",
            ExceptionKind::StopIteration => "StopIteration",
            ExceptionKind::StopAsyncIteration => "StopAsyncIteration",
            ExceptionKind::AssertionError => "AssertionError",
            ExceptionKind::ImportError => "ImportError",
            ExceptionKind::ModuleNotFoundError => "ModuleNotFoundError",
            ExceptionKind::SyntaxError => "SyntaxError",
            ExceptionKind::EOFError => "EOFError",
        }
    }

    /// The direct base, `None` for `BaseException`.
    pub fn parent(self) -> Option<ExceptionKind> {
        use ExceptionKind::*;
        match self {
            BaseException => None,
            GeneratorExit | KeyboardInterrupt | Exception => Some(BaseException),
            ZeroDivisionError | OverflowError => Some(ArithmeticError),
            KeyError | IndexError => Some(LookupError),
            UnboundLocalError => Some(NameError),
            RecursionError | NotImplementedError => Some(RuntimeError),
            ModuleNotFoundError => Some(ImportError),
            _ => Some(Exception),
        }
    }

    /// Position in [`ExceptionKind::ALL`].
    pub(crate) fn index(self) -> usize {
        Self::ALL.iter().position(|k| *k == self).unwrap_or(0)
    }
}

// ============================================================================
// BaseException methods
// ============================================================================

/// Methods of `BaseException`, inherited by every exception class.
pub const EXCEPTION_METHODS: MethodTable = &[
    ("__init__", exception_init),
    ("__str__", exception_str),
    ("__repr__", exception_repr),
    ("with_traceback", exception_with_traceback),
];

/// `BaseException.__init__(self, *args)`
pub fn exception_init(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let this = receiver(vm, &args, "__init__")?;
    let rest = args.positional[1..].to_vec();
    let tuple = vm.new_tuple(rest);
    if let Value::Object(obj) = &this {
        obj.write().attrs.insert("args".into(), tuple);
    }
    Ok(Value::None)
}

fn exception_args(vm: &mut Vm, this: &Value) -> VmResult<Vec<Value>> {
    let args = match this {
        Value::Object(obj) => obj.read().attrs.get("args").cloned(),
        _ => None,
    };
    match args {
        Some(args) => vm.collect(&args),
        None => Ok(Vec::new()),
    }
}

/// `BaseException.__str__(self)`: empty for no arguments, the argument
/// itself for one (its repr for `KeyError`), the args tuple otherwise.
pub fn exception_str(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "__str__", 0, 0)?;
    let this = receiver(vm, &args, "__str__")?;
    let items = exception_args(vm, &this)?;
    let text = match items.as_slice() {
        [] => String::new(),
        [only] if vm.exception_is(&this, ExceptionKind::KeyError) => vm.repr(only)?,
        [only] => vm.to_str(only)?,
        _ => {
            let tuple = vm.new_tuple(items);
            vm.repr(&tuple)?
        }
    };
    Ok(Value::from(text))
}

/// `BaseException.__repr__(self)`
pub fn exception_repr(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "__repr__", 0, 0)?;
    let this = receiver(vm, &args, "__repr__")?;
    let text = match &this {
        Value::Object(obj) => vm.repr_object(obj)?,
        other => vm.repr(other)?,
    };
    Ok(Value::from(text))
}

/// `BaseException.with_traceback(self, tb)`: tracebacks are not recorded,
/// so this returns `self`.
pub fn exception_with_traceback(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "with_traceback", 1, 1)?;
    receiver(vm, &args, "with_traceback")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_lists_bases_first() {
        for (i, kind) in ExceptionKind::ALL.iter().enumerate() {
            if let Some(parent) = kind.parent() {
                assert!(parent.index() < i, "{} listed before its base", kind.name());
            }
        }
    }

    #[test]
    fn test_parents() {
        assert_eq!(ExceptionKind::KeyError.parent(), Some(ExceptionKind::LookupError));
        assert_eq!(ExceptionKind::GeneratorExit.parent(), Some(ExceptionKind::BaseException));
        assert_eq!(ExceptionKind::SyntaxError.parent(), Some(ExceptionKind::Exception));
        assert_eq!(ExceptionKind::BaseException.parent(), None);
    }
}
