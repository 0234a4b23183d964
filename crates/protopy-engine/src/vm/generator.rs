//! Resuming generators and coroutines.
//!
//! A generator object owns its suspended [`Frame`](crate::runtime::Frame)
//! and [`ExecState`](crate::runtime::ExecState). Resuming moves both out of
//! the object while the interpreter loop runs them and moves them back if
//! the body yields again. A body that resumes its own generator finds it
//! `Running` and gets a `ValueError`.

use tracing::trace;

use super::iter::stop_value;
use super::{Vm, VmError, VmResult};
use crate::builtins::ExceptionKind;
use crate::compiler::bytecode::decode_at;
use crate::compiler::CodeObject;
use crate::runtime::object::ObjectKind;
use crate::runtime::{Args, Completion, GeneratorKind, GeneratorState, IterState, ObjRef, Value};

/// How a suspended generator is resumed.
#[derive(Debug, Clone)]
pub enum Resume {
    /// `send(value)`; `next()` sends `None`
    Send(Value),
    /// `throw(exc)`: raise `exc` at the suspension point
    Throw(Value),
}

/// The outcome of one resumption.
#[derive(Debug, Clone)]
pub enum GenStep {
    /// The body yielded a value and is suspended again
    Yielded(Value),
    /// The body returned; the value becomes `StopIteration.value`
    Returned(Value),
}

impl Vm {
    /// Resumes generator `obj` once.
    pub fn resume_generator(&mut self, obj: &ObjRef, resume: Resume) -> VmResult<GenStep> {
        let (kind, state, suspended) = {
            let mut guard = obj.write();
            let generator = match &mut guard.kind {
                ObjectKind::Generator(generator) => generator,
                _ => return Err(VmError::internal("resume of a non-generator")),
            };
            let state = generator.state;
            let suspended = match state {
                GeneratorState::Created | GeneratorState::Suspended => {
                    generator.state = GeneratorState::Running;
                    generator.suspended.take()
                }
                _ => None,
            };
            (generator.kind, state, suspended)
        };

        match state {
            GeneratorState::Running => {
                return Err(self.value_error(format!("{} already executing", kind.name())));
            }
            GeneratorState::Completed | GeneratorState::Failed => {
                return match resume {
                    Resume::Throw(exc) => Err(VmError::Exception(exc)),
                    Resume::Send(_) if kind == GeneratorKind::Coroutine => {
                        Err(self.runtime_error("cannot reuse already awaited coroutine"))
                    }
                    Resume::Send(_) => Ok(GenStep::Returned(Value::None)),
                };
            }
            GeneratorState::Created | GeneratorState::Suspended => {}
        }
        let mut suspended = match suspended {
            Some(suspended) => suspended,
            None => return Err(VmError::internal("suspended generator without a frame")),
        };

        match resume {
            Resume::Send(value) => {
                if state == GeneratorState::Created {
                    if !value.is_none() {
                        self.set_generator_state(obj, GeneratorState::Created, Some(suspended));
                        return Err(self.type_error(format!(
                            "can't send non-None value to a just-started {}",
                            kind.name()
                        )));
                    }
                } else {
                    suspended.exec.push(value);
                }
            }
            Resume::Throw(exc) if suspended.exec.delegating => {
                let sub = suspended.exec.peek(0)?.clone();
                match self.throw_into(&sub, exc) {
                    Ok(GenStep::Yielded(value)) => {
                        self.set_generator_state(obj, GeneratorState::Suspended, Some(suspended));
                        return Ok(GenStep::Yielded(value));
                    }
                    Ok(GenStep::Returned(value)) => {
                        let exec = &mut suspended.exec;
                        exec.pop()?;
                        exec.push(value);
                        exec.delegating = false;
                        let instr = decode_at(&suspended.frame.code.bytecode, exec.pc)
                            .map_err(|e| VmError::internal(e.to_string()))?;
                        exec.pc = instr.next_offset();
                    }
                    Err(VmError::Exception(raised)) => {
                        suspended.exec.delegating = false;
                        suspended.exec.pending = Some(raised);
                    }
                    Err(internal) => {
                        self.set_generator_state(obj, GeneratorState::Failed, None);
                        return Err(internal);
                    }
                }
            }
            Resume::Throw(exc) => suspended.exec.pending = Some(exc),
        }

        trace!(generator = %suspended.frame.code.qualname, "resume");
        let result = match self.enter_call() {
            Ok(()) => {
                self.scopes.push(Self::scope_link(&suspended.frame));
                let end = suspended.frame.code.bytecode.len();
                let result = super::with_native_stack(|| {
                    self.execute_bytecode_range(&mut suspended.frame, &mut suspended.exec, end)
                });
                self.scopes.pop();
                self.leave_call();
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(Completion::Yield(value)) => {
                self.set_generator_state(obj, GeneratorState::Suspended, Some(suspended));
                Ok(GenStep::Yielded(value))
            }
            Ok(Completion::Return(value)) => {
                self.set_generator_state(obj, GeneratorState::Completed, None);
                Ok(GenStep::Returned(value))
            }
            Ok(Completion::EndOfRange) => {
                self.set_generator_state(obj, GeneratorState::Completed, None);
                Ok(GenStep::Returned(Value::None))
            }
            Err(VmError::Exception(exc)) => {
                self.set_generator_state(obj, GeneratorState::Failed, None);
                if self.exception_is(&exc, ExceptionKind::StopIteration) {
                    let replacement = self.new_exception(
                        ExceptionKind::RuntimeError,
                        format!("{} raised StopIteration", kind.name()),
                    );
                    if let Value::Object(r) = &replacement {
                        let mut guard = r.write();
                        guard.attrs.insert("__cause__".into(), exc.clone());
                        guard.attrs.insert("__context__".into(), exc);
                    }
                    return Err(VmError::Exception(replacement));
                }
                Err(VmError::Exception(exc))
            }
            Err(internal) => {
                self.set_generator_state(obj, GeneratorState::Failed, None);
                Err(internal)
            }
        }
    }

    fn set_generator_state(
        &mut self,
        obj: &ObjRef,
        state: GeneratorState,
        suspended: Option<Box<crate::runtime::generator::Suspended>>,
    ) {
        if let ObjectKind::Generator(generator) = &mut obj.write().kind {
            generator.state = state;
            generator.suspended = suspended;
        }
    }

    /// Raises `exc` inside the iterator a `yield from` is delegating to.
    fn throw_into(&mut self, sub: &Value, exc: Value) -> VmResult<GenStep> {
        if let Value::Object(obj) = sub {
            if matches!(obj.read().kind, ObjectKind::Generator(_)) {
                return self.resume_generator(obj, Resume::Throw(exc));
            }
        }
        match self.lookup_attr(sub, "throw")? {
            Some(throw) => match self.call(&throw, Args::new(vec![exc])) {
                Ok(value) => Ok(GenStep::Yielded(value)),
                Err(VmError::Exception(raised)) if self.exception_is(&raised, ExceptionKind::StopIteration) => {
                    Ok(GenStep::Returned(stop_value(&raised)))
                }
                Err(err) => Err(err),
            },
            None => Err(VmError::Exception(exc)),
        }
    }

    /// `gen.send(value)`: the next yielded value, or `StopIteration`.
    pub fn gen_send(&mut self, obj: &ObjRef, value: Value) -> VmResult<Value> {
        match self.resume_generator(obj, Resume::Send(value))? {
            GenStep::Yielded(value) => Ok(value),
            GenStep::Returned(value) => Err(self.stop_iteration(value)),
        }
    }

    /// `gen.throw(exc)`: `exc` may be an exception class or instance.
    pub fn gen_throw(&mut self, obj: &ObjRef, exc: &Value) -> VmResult<Value> {
        let exc = self.make_exception(exc)?;
        match self.resume_generator(obj, Resume::Throw(exc))? {
            GenStep::Yielded(value) => Ok(value),
            GenStep::Returned(value) => Err(self.stop_iteration(value)),
        }
    }

    /// `gen.close()`: raises `GeneratorExit` at the suspension point and
    /// expects the body to finish.
    pub fn gen_close(&mut self, obj: &ObjRef) -> VmResult<Value> {
        let state = match &mut obj.write().kind {
            ObjectKind::Generator(generator) => {
                if generator.state == GeneratorState::Created {
                    generator.state = GeneratorState::Completed;
                    generator.suspended = None;
                }
                generator.state
            }
            _ => return Err(VmError::internal("close of a non-generator")),
        };
        if state.is_finished() {
            return Ok(Value::None);
        }
        let class = self.types.exception(ExceptionKind::GeneratorExit).clone();
        let exit = self.exception_from_args(&class, Vec::new());
        match self.resume_generator(obj, Resume::Throw(exit)) {
            Ok(GenStep::Yielded(_)) => Err(self.runtime_error("generator ignored GeneratorExit")),
            Ok(GenStep::Returned(_)) => Ok(Value::None),
            Err(VmError::Exception(exc))
                if self.exception_is(&exc, ExceptionKind::GeneratorExit)
                    || self.exception_is(&exc, ExceptionKind::StopIteration) =>
            {
                Ok(Value::None)
            }
            Err(err) => Err(err),
        }
    }

    /// `YIELD_FROM`: one step of the delegated-to iterator, sending `sent`.
    pub(crate) fn delegate(&mut self, sub: &Value, sent: Value) -> VmResult<GenStep> {
        self.step(sub, sent)
    }

    /// `GET_YIELD_FROM_ITER`: generators and, inside a coroutine,
    /// coroutines are delegated to directly; anything else is iterated.
    pub(crate) fn yield_from_iter(&mut self, iterable: &Value, code: &CodeObject) -> VmResult<Value> {
        if let Value::Object(obj) = iterable {
            let kind = match &obj.read().kind {
                ObjectKind::Generator(generator) => Some(generator.kind),
                _ => None,
            };
            match kind {
                Some(GeneratorKind::Generator) => return Ok(iterable.clone()),
                Some(GeneratorKind::Coroutine) if code.is_coroutine() => return Ok(iterable.clone()),
                Some(GeneratorKind::Coroutine) => {
                    return Err(
                        self.type_error("cannot 'yield from' a coroutine object in a non-coroutine generator")
                    );
                }
                None => {}
            }
        }
        self.get_iter(iterable)
    }

    /// `GET_AWAITABLE`: coroutines, native awaitables, and objects whose
    /// `__await__` returns an iterator.
    pub(crate) fn get_awaitable(&mut self, value: &Value) -> VmResult<Value> {
        if let Value::Object(obj) = value {
            let direct = match &obj.read().kind {
                ObjectKind::Generator(generator) => generator.kind == GeneratorKind::Coroutine,
                ObjectKind::Iterator(IterState::Awaitable { .. }) => true,
                _ => false,
            };
            if direct {
                return Ok(value.clone());
            }
            if self.user_class(value).is_some() {
                if let Some(iter) = self.call_special(value, "__await__", Vec::new())? {
                    if generator_kind(&iter) == Some(GeneratorKind::Coroutine) {
                        return Err(self.type_error("__await__() returned a coroutine"));
                    }
                    return self.get_iter(&iter);
                }
            }
        }
        let type_name = self.type_name(value);
        Err(self.type_error(format!("object {} can't be used in 'await' expression", type_name)))
    }

    /// A native awaitable that suspends once when `suspend` is set and
    /// then completes with `result`.
    pub fn new_awaitable(&self, suspend: bool, result: Value) -> Value {
        self.new_iterator(IterState::Awaitable { suspend, result })
    }
}

fn generator_kind(value: &Value) -> Option<GeneratorKind> {
    match value {
        Value::Object(obj) => match &obj.read().kind {
            ObjectKind::Generator(generator) => Some(generator.kind),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::parser::Parser;
    use crate::runtime::Namespace;

    fn run(source: &str) -> (Vm, VmResult<Value>, Namespace) {
        let module = Parser::new(source).parse_module().unwrap();
        let code = crate::compiler::compile_module_checked(&module, "<test>").unwrap();
        let mut vm = Vm::new(EngineConfig::default());
        let globals = vm.new_globals("__main__");
        let result = vm.run_module_code(code, globals.clone());
        (vm, result, globals)
    }

    fn generator(vm: &mut Vm, globals: &Namespace, name: &str) -> ObjRef {
        let f = globals.get(name).unwrap();
        match vm.call(&f, Args::default()).unwrap() {
            Value::Object(obj) => obj,
            _ => panic!("not a generator"),
        }
    }

    #[test]
    fn test_send_and_return_value() {
        let (mut vm, result, globals) = run("def g():\n    x = yield 1\n    return x * 2\n");
        assert!(result.is_ok());
        let g = generator(&mut vm, &globals, "g");
        assert!(matches!(vm.resume_generator(&g, Resume::Send(Value::None)).unwrap(), GenStep::Yielded(Value::Int(1))));
        assert!(matches!(
            vm.resume_generator(&g, Resume::Send(Value::Int(5))).unwrap(),
            GenStep::Returned(Value::Int(10))
        ));
        assert!(matches!(vm.resume_generator(&g, Resume::Send(Value::None)).unwrap(), GenStep::Returned(Value::None)));
    }

    #[test]
    fn test_send_non_none_to_new_generator() {
        let (mut vm, _, globals) = run("def g():\n    yield 1\n");
        let g = generator(&mut vm, &globals, "g");
        match vm.gen_send(&g, Value::Int(1)) {
            Err(VmError::Exception(exc)) => assert_eq!(
                vm.describe_exception(&exc),
                "TypeError: can't send non-None value to a just-started generator"
            ),
            _ => panic!("expected TypeError"),
        }
        assert!(matches!(vm.gen_send(&g, Value::None), Ok(Value::Int(1))));
    }

    #[test]
    fn test_throw_is_caught_in_body() {
        let (mut vm, _, globals) =
            run("def g():\n    try:\n        yield 1\n    except ValueError:\n        yield 'caught'\n");
        let g = generator(&mut vm, &globals, "g");
        vm.gen_send(&g, Value::None).unwrap();
        let class = Value::Object(vm.types.exception(ExceptionKind::ValueError).clone());
        let value = vm.gen_throw(&g, &class).unwrap();
        assert_eq!(value.as_str(), Some("caught"));
    }

    #[test]
    fn test_close_ignoring_generator_exit() {
        let (mut vm, _, globals) =
            run("def g():\n    while True:\n        try:\n            yield 1\n        except GeneratorExit:\n            pass\n");
        let g = generator(&mut vm, &globals, "g");
        vm.gen_send(&g, Value::None).unwrap();
        match vm.gen_close(&g) {
            Err(VmError::Exception(exc)) => {
                assert_eq!(vm.describe_exception(&exc), "RuntimeError: generator ignored GeneratorExit")
            }
            _ => panic!("expected RuntimeError"),
        }
    }

    #[test]
    fn test_stop_iteration_in_body_becomes_runtime_error() {
        let (mut vm, _, globals) = run("def g():\n    yield 1\n    raise StopIteration\n");
        let g = generator(&mut vm, &globals, "g");
        vm.gen_send(&g, Value::None).unwrap();
        match vm.gen_send(&g, Value::None) {
            Err(VmError::Exception(exc)) => {
                assert_eq!(vm.describe_exception(&exc), "RuntimeError: generator raised StopIteration")
            }
            _ => panic!("expected RuntimeError"),
        }
    }

    #[test]
    fn test_yield_from_forwards_throw() {
        let source = "def inner():\n    try:\n        yield 1\n    except KeyError:\n        return 'inner done'\n\ndef outer():\n    r = yield from inner()\n    yield r\n";
        let (mut vm, _, globals) = run(source);
        let g = generator(&mut vm, &globals, "outer");
        vm.gen_send(&g, Value::None).unwrap();
        let class = Value::Object(vm.types.exception(ExceptionKind::KeyError).clone());
        let value = vm.gen_throw(&g, &class).unwrap();
        assert_eq!(value.as_str(), Some("inner done"));
    }

    #[test]
    fn test_await_rejects_plain_generator() {
        let (mut vm, _, globals) = run("def g():\n    yield 1\n");
        let g = Value::Object(generator(&mut vm, &globals, "g"));
        match vm.get_awaitable(&g) {
            Err(VmError::Exception(exc)) => assert_eq!(
                vm.describe_exception(&exc),
                "TypeError: object generator can't be used in 'await' expression"
            ),
            _ => panic!("expected TypeError"),
        }
    }
}
