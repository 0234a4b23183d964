//! Generator, coroutine and native iterator methods.

use super::{check_method_arity, receiver, ExceptionKind, MethodTable};
use crate::runtime::{Args, ObjRef, ObjectKind, ObjectModel, Value};
use crate::vm::{Vm, VmError, VmResult};

pub const GENERATOR_METHODS: MethodTable = &[
    ("send", gen_send),
    ("throw", gen_throw),
    ("close", gen_close),
    ("__iter__", iter_self),
    ("__next__", gen_next),
];

/// Coroutines are driven by `await`, not by iteration.
pub const COROUTINE_METHODS: MethodTable = &[("send", gen_send), ("throw", gen_throw), ("close", gen_close)];

pub const ITERATOR_METHODS: MethodTable = &[("__iter__", iter_self), ("__next__", iterator_next)];

fn generator_ref(vm: &mut Vm, args: &Args, method: &str) -> VmResult<ObjRef> {
    let this = receiver(vm, args, method)?;
    if let Value::Object(obj) = &this {
        if matches!(obj.read().kind, ObjectKind::Generator(_)) {
            return Ok(obj.clone());
        }
    }
    Err(super::wrong_receiver(vm, method, "generator", &this))
}

/// `gen.send(value)`
pub fn gen_send(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "send", 1, 1)?;
    let generator = generator_ref(vm, &args, "send")?;
    vm.gen_send(&generator, args.positional[1].clone())
}

/// `gen.throw(exc)` or `gen.throw(type, value)`
pub fn gen_throw(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "throw", 1, 2)?;
    let generator = generator_ref(vm, &args, "throw")?;
    let exc = match args.positional.get(2) {
        Some(value) if !value.is_none() => {
            let class = args.positional[1].clone();
            let already = match &class {
                Value::Object(class) => vm.is_instance(value, class),
                _ => false,
            };
            if already {
                value.clone()
            } else {
                vm.call(&class, Args::new(vec![value.clone()]))?
            }
        }
        _ => args.positional[1].clone(),
    };
    vm.gen_throw(&generator, &exc)
}

/// `gen.close()`
pub fn gen_close(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "close", 0, 0)?;
    let generator = generator_ref(vm, &args, "close")?;
    vm.gen_close(&generator)
}

/// `gen.__next__()`, the same as `gen.send(None)`.
pub fn gen_next(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "__next__", 0, 0)?;
    let generator = generator_ref(vm, &args, "__next__")?;
    vm.gen_send(&generator, Value::None)
}

/// `it.__iter__()`: an iterator is its own iterator.
pub fn iter_self(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "__iter__", 0, 0)?;
    receiver(vm, &args, "__iter__")
}

/// `it.__next__()` on a native iterator.
pub fn iterator_next(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "__next__", 0, 0)?;
    let this = receiver(vm, &args, "__next__")?;
    match vm.next(&this)? {
        Some(value) => Ok(value),
        None => {
            let class = vm.types().exception(ExceptionKind::StopIteration).clone();
            Err(VmError::Exception(vm.exception_from_args(&class, Vec::new())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn make_generator(vm: &mut Vm, source: &str) -> Value {
        let code = vm.compile_source(source, "<test>").unwrap();
        let globals = vm.new_globals("__main__");
        vm.run_module_code(code, globals.clone()).unwrap();
        let factory = globals.get("g").unwrap();
        vm.call(&factory, Args::default()).unwrap()
    }

    #[test]
    fn test_send_resumes_with_value() {
        let mut vm = Vm::new(EngineConfig::default());
        let g = make_generator(&mut vm, "def g():\n    x = yield 1\n    yield x * 2\n");
        let first = gen_send(&mut vm, Args::new(vec![g.clone(), Value::None])).unwrap();
        assert!(matches!(first, Value::Int(1)));
        let second = gen_send(&mut vm, Args::new(vec![g, Value::Int(21)])).unwrap();
        assert!(matches!(second, Value::Int(42)));
    }

    #[test]
    fn test_throw_is_caught_inside() {
        let mut vm = Vm::new(EngineConfig::default());
        let source = "def g():\n    try:\n        yield 1\n    except ValueError:\n        yield 'caught'\n";
        let g = make_generator(&mut vm, source);
        gen_send(&mut vm, Args::new(vec![g.clone(), Value::None])).unwrap();
        let value_error = vm.builtins().get("ValueError").unwrap();
        let caught = gen_throw(&mut vm, Args::new(vec![g, value_error])).unwrap();
        assert_eq!(caught.as_str(), Some("caught"));
    }

    #[test]
    fn test_dunder_next_and_iter() {
        let mut vm = Vm::new(EngineConfig::default());
        let g = make_generator(&mut vm, "def g():\n    yield 1\n");
        let same = iter_self(&mut vm, Args::new(vec![g.clone()])).unwrap();
        assert!(matches!((&same, &g), (Value::Object(a), Value::Object(b)) if a.ptr_eq(b)));
        assert!(matches!(gen_next(&mut vm, Args::new(vec![g.clone()])), Ok(Value::Int(1))));
        match gen_next(&mut vm, Args::new(vec![g])) {
            Err(VmError::Exception(exc)) => assert!(vm.exception_is(&exc, ExceptionKind::StopIteration)),
            _ => panic!("expected StopIteration"),
        }
    }

    #[test]
    fn test_close_then_send_stops() {
        let mut vm = Vm::new(EngineConfig::default());
        let g = make_generator(&mut vm, "def g():\n    yield 1\n    yield 2\n");
        gen_send(&mut vm, Args::new(vec![g.clone(), Value::None])).unwrap();
        gen_close(&mut vm, Args::new(vec![g.clone()])).unwrap();
        match gen_send(&mut vm, Args::new(vec![g, Value::None])) {
            Err(VmError::Exception(exc)) => {
                assert!(vm.exception_is(&exc, crate::builtins::ExceptionKind::StopIteration))
            }
            _ => panic!("expected StopIteration"),
        }
    }
}
