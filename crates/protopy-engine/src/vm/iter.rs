//! The iteration protocol.
//!
//! Builtin containers iterate through an [`IterState`] held in an iterator
//! object. User classes iterate through `__iter__`/`__next__`, with the
//! end of iteration signalled by `StopIteration`. No object lock is held
//! while user code runs. A step advances the state under the lock and
//! calls out only after releasing it.

use std::collections::VecDeque;

use super::generator::{GenStep, Resume};
use super::{Vm, VmError, VmResult};
use crate::builtins::ExceptionKind;
use crate::runtime::object::ObjectKind;
use crate::runtime::{Args, GeneratorKind, IterState, ObjRef, Value};

/// One step of a native iterator, decided under the lock.
enum Step {
    Ready(Option<Value>),
    Sequence(Value, usize),
    Map(Value, Vec<Value>),
    Filter(Value, Value),
    Zip(Vec<Value>),
    Enumerate(Value, i64),
}

impl Vm {
    /// `iter(value)`.
    pub fn get_iter(&mut self, value: &Value) -> VmResult<Value> {
        if self.user_class(value).is_some() {
            if let Some(result) = self.call_special(value, "__iter__", Vec::new())? {
                if self.special_method(&result, "__next__")?.is_none() && !self.is_native_iterator(&result) {
                    let type_name = self.type_name(&result);
                    return Err(self.type_error(format!("iter() returned non-iterator of type '{}'", type_name)));
                }
                return Ok(result);
            }
        }
        let state = match value {
            Value::Str(text) => Some(IterState::Chars {
                text: text.clone(),
                offset: 0,
            }),
            Value::Object(obj) => match &obj.read().kind {
                ObjectKind::List(_) | ObjectKind::Tuple(_) => Some(IterState::Sequence {
                    seq: value.clone(),
                    index: 0,
                }),
                ObjectKind::Dict(dict) => Some(IterState::Snapshot(dict.keys().into())),
                ObjectKind::Set(set) => Some(IterState::Snapshot(set.values().into())),
                ObjectKind::Range(range) => Some(IterState::Range {
                    next: range.start,
                    remaining: range.len(),
                    step: range.step,
                }),
                ObjectKind::Iterator(_) => return Ok(value.clone()),
                ObjectKind::Generator(generator) if generator.kind == GeneratorKind::Generator => {
                    return Ok(value.clone())
                }
                _ => None,
            },
            _ => None,
        };
        let state = match state {
            Some(state) => state,
            None => return Err(self.not_iterable(value)),
        };
        Ok(self.new_iterator(state))
    }

    fn not_iterable(&mut self, value: &Value) -> VmError {
        let type_name = self.type_name(value);
        self.type_error(format!("'{}' object is not iterable", type_name))
    }

    fn is_native_iterator(&self, value: &Value) -> bool {
        match value {
            Value::Object(obj) => matches!(
                &obj.read().kind,
                ObjectKind::Iterator(_) | ObjectKind::Generator(_)
            ),
            _ => false,
        }
    }

    /// `next(iter)`, with exhaustion as `Ok(None)`.
    pub fn next(&mut self, iter: &Value) -> VmResult<Option<Value>> {
        match self.step(iter, Value::None)? {
            GenStep::Yielded(value) => Ok(Some(value)),
            GenStep::Returned(_) => Ok(None),
        }
    }

    /// Advances `iter` once, keeping the return value that ends it. `sent`
    /// goes to generators and to a user iterator's `send`.
    pub(crate) fn step(&mut self, iter: &Value, sent: Value) -> VmResult<GenStep> {
        let obj = match iter {
            Value::Object(obj) => obj.clone(),
            _ => return Err(self.not_an_iterator(iter)),
        };
        let native = match &obj.read().kind {
            ObjectKind::Generator(_) => Some(true),
            ObjectKind::Iterator(_) => Some(false),
            _ => None,
        };
        match native {
            Some(true) => self.resume_generator(&obj, Resume::Send(sent)),
            Some(false) => self.step_native(&obj),
            None => self.step_user(iter, sent),
        }
    }

    fn not_an_iterator(&mut self, value: &Value) -> VmError {
        let type_name = self.type_name(value);
        self.type_error(format!("'{}' object is not an iterator", type_name))
    }

    fn step_user(&mut self, iter: &Value, sent: Value) -> VmResult<GenStep> {
        let result = if sent.is_none() {
            match self.special_method(iter, "__next__")? {
                Some(next) => self.call(&next, Args::default()),
                None => return Err(self.not_an_iterator(iter)),
            }
        } else {
            let send = crate::runtime::ObjectModel::get_attr(self, iter, "send")?;
            self.call(&send, Args::new(vec![sent]))
        };
        match result {
            Ok(value) => Ok(GenStep::Yielded(value)),
            Err(VmError::Exception(exc)) if self.exception_is(&exc, ExceptionKind::StopIteration) => {
                Ok(GenStep::Returned(stop_value(&exc)))
            }
            Err(err) => Err(err),
        }
    }

    fn step_native(&mut self, obj: &ObjRef) -> VmResult<GenStep> {
        let step = {
            let mut guard = obj.write();
            let state = match &mut guard.kind {
                ObjectKind::Iterator(state) => state,
                _ => return Err(VmError::internal("iterator lost its state")),
            };
            match state {
                IterState::Sequence { seq, index } => {
                    let step = Step::Sequence(seq.clone(), *index);
                    *index += 1;
                    step
                }
                IterState::Chars { text, offset } => {
                    let next = text[*offset..].chars().next();
                    if let Some(c) = next {
                        *offset += c.len_utf8();
                    }
                    Step::Ready(next.map(|c| Value::from(c.to_string())))
                }
                IterState::Range { next, remaining, step } => {
                    if *remaining == 0 {
                        Step::Ready(None)
                    } else {
                        let value = *next;
                        *remaining -= 1;
                        *next = next.wrapping_add(*step);
                        Step::Ready(Some(Value::Int(value)))
                    }
                }
                IterState::Snapshot(items) => Step::Ready(items.pop_front()),
                IterState::Map { func, iters } => Step::Map(func.clone(), iters.clone()),
                IterState::Filter { func, iter } => Step::Filter(func.clone(), iter.clone()),
                IterState::Zip { iters } => Step::Zip(iters.clone()),
                IterState::Enumerate { iter, count } => {
                    let step = Step::Enumerate(iter.clone(), *count);
                    *count += 1;
                    step
                }
                IterState::Awaitable { suspend, result } => {
                    if *suspend {
                        *suspend = false;
                        return Ok(GenStep::Yielded(Value::None));
                    }
                    let result = std::mem::replace(result, Value::None);
                    *state = IterState::Done;
                    return Ok(GenStep::Returned(result));
                }
                IterState::Done => Step::Ready(None),
            }
        };

        let produced = match step {
            Step::Ready(value) => value,
            Step::Sequence(seq, index) => match &seq {
                Value::Object(s) => match &s.read().kind {
                    ObjectKind::List(items) | ObjectKind::Tuple(items) => items.get(index).cloned(),
                    _ => None,
                },
                _ => None,
            },
            Step::Map(func, iters) => match self.next_of_all(&iters)? {
                Some(args) => Some(self.call(&func, Args::new(args))?),
                None => None,
            },
            Step::Filter(func, iter) => loop {
                match self.next(&iter)? {
                    Some(item) => {
                        let keep = if func.is_none() {
                            self.truthy(&item)?
                        } else {
                            let verdict = self.call(&func, Args::new(vec![item.clone()]))?;
                            self.truthy(&verdict)?
                        };
                        if keep {
                            break Some(item);
                        }
                    }
                    None => break None,
                }
            },
            Step::Zip(iters) => match self.next_of_all(&iters)? {
                Some(items) => Some(self.new_tuple(items)),
                None => None,
            },
            Step::Enumerate(iter, count) => match self.next(&iter)? {
                Some(item) => Some(self.new_tuple(vec![Value::Int(count), item])),
                None => None,
            },
        };
        match produced {
            Some(value) => Ok(GenStep::Yielded(value)),
            None => {
                if let ObjectKind::Iterator(state) = &mut obj.write().kind {
                    *state = IterState::Done;
                }
                Ok(GenStep::Returned(Value::None))
            }
        }
    }

    /// One item from each iterator, or `None` once any is exhausted.
    fn next_of_all(&mut self, iters: &[Value]) -> VmResult<Option<Vec<Value>>> {
        let mut items = Vec::with_capacity(iters.len());
        for iter in iters {
            match self.next(iter)? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }
        Ok(Some(items))
    }

    /// Drains `iterable` into a vector.
    pub fn collect(&mut self, iterable: &Value) -> VmResult<Vec<Value>> {
        if self.user_class(iterable).is_none() {
            if let Value::Object(obj) = iterable {
                if let ObjectKind::List(items) | ObjectKind::Tuple(items) = &obj.read().kind {
                    return Ok(items.clone());
                }
            }
        }
        let iter = self.get_iter(iterable)?;
        let mut items = Vec::new();
        while let Some(item) = self.next(&iter)? {
            items.push(item);
        }
        Ok(items)
    }

    /// An iterator over a snapshot of `items`.
    pub fn snapshot_iter(&self, items: Vec<Value>) -> Value {
        self.new_iterator(IterState::Snapshot(VecDeque::from(items)))
    }
}

/// The `value` carried by a `StopIteration`.
pub(crate) fn stop_value(exc: &Value) -> Value {
    match exc {
        Value::Object(obj) => obj.read().attrs.get("value").cloned().unwrap_or(Value::None),
        _ => Value::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_collect_string_chars() {
        let mut vm = Vm::new(EngineConfig::default());
        let items = vm.collect(&Value::from("hé!")).unwrap();
        let chars: Vec<String> = items.iter().map(|v| v.as_str().unwrap().to_string()).collect();
        assert_eq!(chars, vec!["h", "é", "!"]);
    }

    #[test]
    fn test_zip_stops_at_shortest() {
        let mut vm = Vm::new(EngineConfig::default());
        let a = vm.new_list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let b = Value::from("xy");
        let iters = vec![vm.get_iter(&a).unwrap(), vm.get_iter(&b).unwrap()];
        let zipped = vm.new_iterator(IterState::Zip { iters });
        assert_eq!(vm.collect(&zipped).unwrap().len(), 2);
        assert!(vm.next(&zipped).unwrap().is_none());
    }

    #[test]
    fn test_list_iteration_sees_appends() {
        let mut vm = Vm::new(EngineConfig::default());
        let list = vm.new_list(vec![Value::Int(1)]);
        let iter = vm.get_iter(&list).unwrap();
        assert!(matches!(vm.next(&iter).unwrap(), Some(Value::Int(1))));
        if let Value::Object(obj) = &list {
            if let ObjectKind::List(items) = &mut obj.write().kind {
                items.push(Value::Int(2));
            }
        }
        assert!(matches!(vm.next(&iter).unwrap(), Some(Value::Int(2))));
        assert!(vm.next(&iter).unwrap().is_none());
    }

    #[test]
    fn test_int_is_not_iterable() {
        let mut vm = Vm::new(EngineConfig::default());
        match vm.get_iter(&Value::Int(3)) {
            Err(VmError::Exception(exc)) => {
                assert_eq!(vm.describe_exception(&exc), "TypeError: 'int' object is not iterable")
            }
            _ => panic!("expected TypeError"),
        }
    }

    #[test]
    fn test_awaitable_suspends_once() {
        let mut vm = Vm::new(EngineConfig::default());
        let awaitable = vm.new_iterator(IterState::Awaitable {
            suspend: true,
            result: Value::Int(7),
        });
        assert!(matches!(vm.step(&awaitable, Value::None).unwrap(), GenStep::Yielded(Value::None)));
        assert!(matches!(vm.step(&awaitable, Value::None).unwrap(), GenStep::Returned(Value::Int(7))));
    }
}
