//! The bytecode interpreter.
//!
//! [`Vm::execute_bytecode_range`] runs one frame's bytecode from the saved
//! program counter until a return, a yield, or the end of the requested
//! range. Everything it needs to continue later lives in the [`ExecState`]
//! it is handed, so a generator resumes by calling it again with the state
//! it saved at its last yield.

use std::sync::Arc;

use tracing::trace;

use super::{BinOp, GenStep, UnaryOp, Vm, VmError, VmResult};
use crate::builtins::ExceptionKind;
use crate::compiler::bytecode::{
    decode_at, FORMAT_ASCII, FORMAT_CONVERSION_MASK, FORMAT_REPR, FORMAT_STR, FORMAT_WITH_SPEC,
    MAKE_FUNCTION_DEFAULTS, MAKE_FUNCTION_KWDEFAULTS,
};
use crate::compiler::{CodeFlags, CodeObject, CompareOp, Constant, Instruction, OpCode};
use crate::runtime::object::{ObjectKind, Slice};
use crate::runtime::{
    Args, Block, Completion, Dict, Environment, ExecState, Frame, Function, Namespace, ObjectModel, PrototypeModel,
    Set, Value,
};

/// What one instruction asks the loop to do next.
enum Flow {
    Continue,
    Return(Value),
    Yield(Value),
}

impl Vm {
    /// Runs module-level `code` in `globals` and returns the value of its
    /// trailing expression statement, if any.
    pub fn run_module_code(&mut self, code: Arc<CodeObject>, globals: Namespace) -> VmResult<Value> {
        let mut frame = Frame::module(code, globals);
        self.run_frame(&mut frame)
    }

    /// Executes `frame.code` from `state.pc` until it returns, yields, or
    /// reaches `end`.
    ///
    /// An exception raised by an instruction unwinds `state.blocks` looking
    /// for a handler; if none is left the exception propagates to the
    /// caller. A pending exception in `state` (injected by
    /// `generator.throw()`) is raised before the first instruction.
    pub fn execute_bytecode_range(
        &mut self,
        frame: &mut Frame,
        state: &mut ExecState,
        end: usize,
    ) -> VmResult<Completion> {
        let code = Arc::clone(&frame.code);
        let tracing_enabled = self.config.trace_execution;
        loop {
            if let Some(exc) = state.pending.take() {
                self.unwind(state, exc)?;
            }
            if state.pc >= end {
                return Ok(Completion::EndOfRange);
            }
            let instr = decode_at(&code.bytecode, state.pc).map_err(|e| VmError::internal(e.to_string()))?;
            if tracing_enabled {
                trace!(
                    code = %code.qualname,
                    offset = instr.offset,
                    op = instr.opcode.name(),
                    arg = ?instr.arg,
                    depth = state.stack.len(),
                    "execute"
                );
            }
            state.pc = instr.next_offset();
            match self.dispatch(frame, state, &code, instr) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(value)) => return Ok(Completion::Return(value)),
                Ok(Flow::Yield(value)) => return Ok(Completion::Yield(value)),
                Err(VmError::Exception(exc)) => state.pending = Some(exc),
                Err(internal) => return Err(internal),
            }
        }
    }

    /// Transfers control to the innermost handler for `exc`, or returns it
    /// as an error when the block stack holds none.
    fn unwind(&mut self, state: &mut ExecState, exc: Value) -> VmResult<()> {
        if let Some(handled) = &state.handled {
            if !handled.is(&exc) {
                self.set_context(&exc, handled.clone());
            }
        }
        while let Some(block) = state.blocks.pop() {
            match block {
                Block::ExceptHandler { level, previous } => {
                    state.stack.truncate(level);
                    state.handled = previous;
                }
                Block::Finally { handler, level } => {
                    state.stack.truncate(level);
                    state.blocks.push(Block::ExceptHandler {
                        level,
                        previous: state.handled.take(),
                    });
                    state.handled = Some(exc.clone());
                    state.stack.push(exc);
                    state.pc = handler;
                    return Ok(());
                }
            }
        }
        Err(VmError::Exception(exc))
    }

    fn set_context(&mut self, exc: &Value, context: Value) {
        if let Value::Object(obj) = exc {
            let mut guard = obj.write();
            if matches!(guard.attrs.get("__context__"), None | Some(Value::None)) {
                guard.attrs.insert("__context__".into(), context);
            }
        }
    }

    fn dispatch(
        &mut self,
        frame: &mut Frame,
        state: &mut ExecState,
        code: &Arc<CodeObject>,
        instr: Instruction,
    ) -> VmResult<Flow> {
        let arg = instr.arg.unwrap_or(0);
        match instr.opcode {
            OpCode::Nop => {}

            // ===== Stack manipulation =====
            OpCode::PopTop => {
                state.pop()?;
            }
            OpCode::RotTwo => {
                let len = state.stack.len();
                if len < 2 {
                    return Err(VmError::internal("operand stack underflow"));
                }
                state.stack.swap(len - 1, len - 2);
            }
            OpCode::RotThree => rotate(state, 3)?,
            OpCode::RotFour => rotate(state, 4)?,
            OpCode::DupTop => {
                let top = state.peek(0)?.clone();
                state.push(top);
            }
            OpCode::DupTopTwo => {
                let second = state.peek(1)?.clone();
                let top = state.peek(0)?.clone();
                state.push(second);
                state.push(top);
            }

            // ===== Operators =====
            OpCode::UnaryPositive | OpCode::UnaryNegative | OpCode::UnaryInvert => {
                let operand = state.pop()?;
                let op = match instr.opcode {
                    OpCode::UnaryPositive => UnaryOp::Pos,
                    OpCode::UnaryNegative => UnaryOp::Neg,
                    _ => UnaryOp::Invert,
                };
                let result = self.unary_op(op, &operand)?;
                state.push(result);
            }
            OpCode::UnaryNot => {
                let operand = state.pop()?;
                let truth = self.truthy(&operand)?;
                state.push(Value::Bool(!truth));
            }
            op if op.is_binary_operator() => {
                let rhs = state.pop()?;
                let lhs = state.pop()?;
                let (bin, inplace) = binary_operator(op)?;
                let result = if inplace {
                    self.inplace_op(bin, &lhs, &rhs)?
                } else {
                    self.binary_op(bin, &lhs, &rhs)?
                };
                state.push(result);
            }
            OpCode::CompareOp => {
                let rhs = state.pop()?;
                let lhs = state.pop()?;
                let op = CompareOp::from_arg(arg)
                    .ok_or_else(|| VmError::internal(format!("bad comparison code {}", arg)))?;
                let result = self.compare(op, &lhs, &rhs)?;
                state.push(result);
            }

            // ===== Subscripts =====
            OpCode::BinarySubscr => {
                let index = state.pop()?;
                let container = state.pop()?;
                let result = self.get_item(&container, &index)?;
                state.push(result);
            }
            OpCode::StoreSubscr => {
                let index = state.pop()?;
                let container = state.pop()?;
                let value = state.pop()?;
                self.set_item(&container, &index, value)?;
            }
            OpCode::DeleteSubscr => {
                let index = state.pop()?;
                let container = state.pop()?;
                self.del_item(&container, &index)?;
            }

            // ===== Constants and names =====
            OpCode::LoadConst => {
                let constant = code
                    .constants
                    .get(arg as usize)
                    .ok_or_else(|| VmError::internal(format!("constant index {} out of range", arg)))?;
                let value = self.constant_value(constant);
                state.push(value);
            }
            OpCode::LoadName => {
                let name = name_at(code, arg)?;
                let value = match frame.names.as_ref().and_then(|names| names.get(name)) {
                    Some(value) => value,
                    None => {
                        if is_function_scope(code) && code.varnames.iter().any(|local| local == name) {
                            return Err(unbound_local(self, name));
                        }
                        self.load_global(&frame.globals, name)?
                    }
                };
                state.push(value);
            }
            OpCode::StoreName => {
                let name = name_at(code, arg)?;
                let value = state.pop()?;
                frame
                    .names
                    .as_ref()
                    .ok_or_else(|| VmError::internal("STORE_NAME in a slot-addressed frame"))?
                    .set(name, value);
            }
            OpCode::DeleteName => {
                let name = name_at(code, arg)?;
                let removed = frame.names.as_ref().and_then(|names| names.remove(name));
                if removed.is_none() {
                    return Err(self.name_error(format!("name '{}' is not defined", name)));
                }
            }
            OpCode::LoadGlobal => {
                let name = name_at(code, arg)?;
                let value = self.load_global(&frame.globals, name)?;
                state.push(value);
            }
            OpCode::StoreGlobal => {
                let name = name_at(code, arg)?;
                let value = state.pop()?;
                frame.globals.set(name, value);
            }
            OpCode::DeleteGlobal => {
                let name = name_at(code, arg)?;
                if frame.globals.remove(name).is_none() {
                    return Err(self.name_error(format!("name '{}' is not defined", name)));
                }
            }
            OpCode::LoadFast => {
                let index = arg as usize;
                match frame.local(index) {
                    Some(value) => state.push(value),
                    None => {
                        let name = code.varnames.get(index).map(String::as_str).unwrap_or("?");
                        return Err(unbound_local(self, name));
                    }
                }
            }
            OpCode::StoreFast => {
                let value = state.pop()?;
                frame.bind_local(arg as usize, value);
            }
            OpCode::DeleteFast => {
                let index = arg as usize;
                if frame.local(index).is_none() {
                    let name = code.varnames.get(index).map(String::as_str).unwrap_or("?");
                    return Err(unbound_local(self, name));
                }
                match &frame.names {
                    Some(names) => {
                        if let Some(name) = code.varnames.get(index) {
                            names.remove(name);
                        }
                    }
                    None => {
                        if let Some(slot) = frame.fast.get_mut(index) {
                            *slot = None;
                        }
                    }
                }
            }
            OpCode::LoadDeref => {
                let name = name_at(code, arg)?;
                let env = frame.enclosing.as_deref().and_then(|env| env.resolve(name));
                let value = match env {
                    Some(env) => env.names.get(name).ok_or_else(|| {
                        self.name_error(format!(
                            "free variable '{}' referenced before assignment in enclosing scope",
                            name
                        ))
                    })?,
                    None => self.load_global(&frame.globals, name)?,
                };
                state.push(value);
            }
            OpCode::StoreDeref => {
                let name = name_at(code, arg)?;
                let value = state.pop()?;
                match frame.enclosing.as_deref().and_then(|env| env.resolve(name)) {
                    Some(env) => env.names.set(name, value),
                    None => return Err(VmError::internal(format!("no enclosing binding for '{}'", name))),
                }
            }
            OpCode::DeleteDeref => {
                let name = name_at(code, arg)?;
                let removed = frame
                    .enclosing
                    .as_deref()
                    .and_then(|env| env.resolve(name))
                    .and_then(|env| env.names.remove(name));
                if removed.is_none() {
                    return Err(self.name_error(format!(
                        "free variable '{}' referenced before assignment in enclosing scope",
                        name
                    )));
                }
            }

            // ===== Attributes =====
            OpCode::LoadAttr => {
                let name = name_at(code, arg)?;
                let obj = state.pop()?;
                let value = self.get_attr(&obj, name)?;
                state.push(value);
            }
            OpCode::StoreAttr => {
                let name = name_at(code, arg)?;
                let obj = state.pop()?;
                let value = state.pop()?;
                self.set_attr(&obj, name, value)?;
            }
            OpCode::DeleteAttr => {
                let name = name_at(code, arg)?;
                let obj = state.pop()?;
                self.del_attr(&obj, name)?;
            }

            // ===== Collections =====
            OpCode::BuildTuple => {
                let items = state.pop_n(arg as usize)?;
                state.push(self.new_tuple(items));
            }
            OpCode::BuildList => {
                let items = state.pop_n(arg as usize)?;
                state.push(self.new_list(items));
            }
            OpCode::BuildSet => {
                let items = state.pop_n(arg as usize)?;
                let mut set = Set::new();
                for item in items {
                    let key = self.hash_key(&item)?;
                    set.insert(key, item);
                }
                state.push(self.new_set(set));
            }
            OpCode::BuildMap => {
                let items = state.pop_n(2 * arg as usize)?;
                let mut dict = Dict::new();
                let mut items = items.into_iter();
                while let (Some(key), Some(value)) = (items.next(), items.next()) {
                    let hashed = self.hash_key(&key)?;
                    dict.insert(hashed, key, value);
                }
                state.push(self.new_dict(dict));
            }
            OpCode::BuildSlice => {
                let step = if arg == 3 { state.pop()? } else { Value::None };
                let stop = state.pop()?;
                let start = state.pop()?;
                let slice = self.alloc(ObjectKind::Slice(Slice { start, stop, step }), &self.types.slice);
                state.push(slice);
            }
            OpCode::BuildString => {
                let parts = state.pop_n(arg as usize)?;
                let mut text = String::new();
                for part in &parts {
                    match part {
                        Value::Str(s) => text.push_str(s),
                        other => text.push_str(&self.to_str(other)?),
                    }
                }
                state.push(Value::from(text));
            }
            OpCode::FormatValue => {
                let spec = if arg & FORMAT_WITH_SPEC != 0 {
                    Some(state.pop()?)
                } else {
                    None
                };
                let value = state.pop()?;
                let value = match arg & FORMAT_CONVERSION_MASK {
                    FORMAT_STR => Value::from(self.to_str(&value)?),
                    FORMAT_REPR => Value::from(self.repr(&value)?),
                    FORMAT_ASCII => Value::from(ascii_escape(&self.repr(&value)?)),
                    _ => value,
                };
                let spec = match &spec {
                    Some(Value::Str(s)) => s.to_string(),
                    Some(other) => self.to_str(other)?,
                    None => String::new(),
                };
                let text = self.format_value(&value, &spec)?;
                state.push(Value::from(text));
            }
            OpCode::ListAppend => {
                let item = state.pop()?;
                let target = collection_at(state, arg)?;
                match &mut target_object(&target)?.write().kind {
                    ObjectKind::List(items) => items.push(item),
                    _ => return Err(VmError::internal("LIST_APPEND target is not a list")),
                }
            }
            OpCode::SetAdd => {
                let item = state.pop()?;
                let key = self.hash_key(&item)?;
                let target = collection_at(state, arg)?;
                match &mut target_object(&target)?.write().kind {
                    ObjectKind::Set(set) => set.insert(key, item),
                    _ => return Err(VmError::internal("SET_ADD target is not a set")),
                }
            }
            OpCode::MapAdd => {
                let value = state.pop()?;
                let key = state.pop()?;
                let hashed = self.hash_key(&key)?;
                let target = collection_at(state, arg)?;
                match &mut target_object(&target)?.write().kind {
                    ObjectKind::Dict(dict) => dict.insert(hashed, key, value),
                    _ => return Err(VmError::internal("MAP_ADD target is not a dict")),
                }
            }
            OpCode::ListExtend => {
                let iterable = state.pop()?;
                let items = self.collect(&iterable)?;
                let target = collection_at(state, arg)?;
                match &mut target_object(&target)?.write().kind {
                    ObjectKind::List(list) => list.extend(items),
                    _ => return Err(VmError::internal("LIST_EXTEND target is not a list")),
                }
            }
            OpCode::SetUpdate => {
                let iterable = state.pop()?;
                let items = self.collect(&iterable)?;
                let mut keyed = Vec::with_capacity(items.len());
                for item in items {
                    keyed.push((self.hash_key(&item)?, item));
                }
                let target = collection_at(state, arg)?;
                match &mut target_object(&target)?.write().kind {
                    ObjectKind::Set(set) => {
                        for (key, item) in keyed {
                            set.insert(key, item);
                        }
                    }
                    _ => return Err(VmError::internal("SET_UPDATE target is not a set")),
                }
            }
            OpCode::DictUpdate | OpCode::DictMerge => {
                let mapping = state.pop()?;
                let entries = self.mapping_items(&mapping)?;
                let target = collection_at(state, arg)?;
                let merge = instr.opcode == OpCode::DictMerge;
                let mut duplicate = None;
                let mut keyed = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    if merge && !matches!(key, Value::Str(_)) {
                        return Err(self.type_error("keywords must be strings"));
                    }
                    keyed.push((self.hash_key(&key)?, key, value));
                }
                match &mut target_object(&target)?.write().kind {
                    ObjectKind::Dict(dict) => {
                        for (hashed, key, value) in keyed {
                            if merge && dict.contains(&hashed) {
                                duplicate = Some(key);
                                break;
                            }
                            dict.insert(hashed, key, value);
                        }
                    }
                    _ => return Err(VmError::internal("DICT_UPDATE target is not a dict")),
                }
                if let Some(key) = duplicate {
                    let name = key.as_str().unwrap_or_default().to_string();
                    return Err(self.type_error(format!("got multiple values for keyword argument '{}'", name)));
                }
            }
            OpCode::ListToTuple => {
                let list = state.pop()?;
                let items = match &list {
                    Value::Object(obj) => match &obj.read().kind {
                        ObjectKind::List(items) => items.clone(),
                        _ => return Err(VmError::internal("LIST_TO_TUPLE operand is not a list")),
                    },
                    _ => return Err(VmError::internal("LIST_TO_TUPLE operand is not a list")),
                };
                state.push(self.new_tuple(items));
            }
            OpCode::UnpackSequence => {
                let sequence = state.pop()?;
                let items = self.collect(&sequence)?;
                let expected = arg as usize;
                if items.len() > expected {
                    return Err(self.value_error(format!("too many values to unpack (expected {})", expected)));
                }
                if items.len() < expected {
                    return Err(self.value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        expected,
                        items.len()
                    )));
                }
                state.stack.extend(items.into_iter().rev());
            }
            OpCode::UnpackEx => {
                let before = (arg & 0xff) as usize;
                let after = (arg >> 8) as usize;
                let sequence = state.pop()?;
                let mut items = self.collect(&sequence)?;
                if items.len() < before + after {
                    return Err(self.value_error(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        before + after,
                        items.len()
                    )));
                }
                let trailing = items.split_off(items.len() - after);
                let middle = items.split_off(before);
                state.stack.extend(trailing.into_iter().rev());
                state.push(self.new_list(middle));
                state.stack.extend(items.into_iter().rev());
            }

            // ===== Control flow =====
            OpCode::JumpAbsolute => state.pc = arg as usize,
            OpCode::PopJumpIfFalse => {
                let cond = state.pop()?;
                if !self.truthy(&cond)? {
                    state.pc = arg as usize;
                }
            }
            OpCode::PopJumpIfTrue => {
                let cond = state.pop()?;
                if self.truthy(&cond)? {
                    state.pc = arg as usize;
                }
            }
            OpCode::JumpIfFalseOrPop => {
                let cond = state.peek(0)?.clone();
                if self.truthy(&cond)? {
                    state.pop()?;
                } else {
                    state.pc = arg as usize;
                }
            }
            OpCode::JumpIfTrueOrPop => {
                let cond = state.peek(0)?.clone();
                if self.truthy(&cond)? {
                    state.pc = arg as usize;
                } else {
                    state.pop()?;
                }
            }
            OpCode::GetIter => {
                let iterable = state.pop()?;
                let iter = self.get_iter(&iterable)?;
                state.push(iter);
            }
            OpCode::ForIter => {
                let iter = state.peek(0)?.clone();
                match self.next(&iter)? {
                    Some(value) => state.push(value),
                    None => {
                        state.pop()?;
                        state.pc = arg as usize;
                    }
                }
            }
            OpCode::ReturnValue => {
                let value = state.pop()?;
                return Ok(Flow::Return(value));
            }

            // ===== Exceptions and blocks =====
            OpCode::SetupFinally => state.blocks.push(Block::Finally {
                handler: arg as usize,
                level: state.stack.len(),
            }),
            OpCode::PopBlock => {
                state
                    .blocks
                    .pop()
                    .ok_or_else(|| VmError::internal("POP_BLOCK with an empty block stack"))?;
            }
            OpCode::PopExcept => match state.blocks.pop() {
                Some(Block::ExceptHandler { previous, .. }) => state.handled = previous,
                _ => return Err(VmError::internal("POP_EXCEPT outside an exception handler")),
            },
            OpCode::JumpIfNotExcMatch => {
                let spec = state.pop()?;
                let exc = state.pop()?;
                if !self.exception_matches(&exc, &spec)? {
                    state.pc = arg as usize;
                }
            }
            OpCode::Reraise => {
                let exc = state.pop()?;
                return Err(VmError::Exception(exc));
            }
            OpCode::RaiseVarargs => {
                let exc = match arg {
                    0 => {
                        return match &state.handled {
                            Some(exc) => Err(VmError::Exception(exc.clone())),
                            None => Err(self.runtime_error("No active exception to reraise")),
                        };
                    }
                    1 => {
                        let raised = state.pop()?;
                        self.make_exception(&raised)?
                    }
                    _ => {
                        let cause = state.pop()?;
                        let raised = state.pop()?;
                        let exc = self.make_exception(&raised)?;
                        let cause = if cause.is_none() {
                            Value::None
                        } else {
                            self.make_exception(&cause)?
                        };
                        if let Value::Object(obj) = &exc {
                            obj.write().attrs.insert("__cause__".into(), cause);
                        }
                        exc
                    }
                };
                return Err(VmError::Exception(exc));
            }
            OpCode::LoadAssertionError => {
                let class = self.types.exception(ExceptionKind::AssertionError).clone();
                state.push(Value::Object(class));
            }
            OpCode::SetupWith => {
                let manager = state.pop()?;
                let enter = self.get_attr(&manager, "__enter__")?;
                let exit = self.get_attr(&manager, "__exit__")?;
                state.push(exit);
                state.blocks.push(Block::Finally {
                    handler: arg as usize,
                    level: state.stack.len(),
                });
                let entered = self.call(&enter, Args::default())?;
                state.push(entered);
            }
            OpCode::WithExceptStart => {
                let exc = state.peek(0)?.clone();
                let exit = state.peek(1)?.clone();
                let exc_type = Value::Object(self.type_of(&exc));
                let result = self.call(&exit, Args::new(vec![exc_type, exc, Value::None]))?;
                state.push(result);
            }
            OpCode::BeforeAsyncWith => {
                let manager = state.pop()?;
                let exit = self.get_attr(&manager, "__aexit__")?;
                let enter = self.call_method(&manager, "__aenter__", Args::default())?;
                state.push(exit);
                state.push(enter);
            }
            OpCode::SetupAsyncWith => {
                let entered = state.pop()?;
                state.blocks.push(Block::Finally {
                    handler: arg as usize,
                    level: state.stack.len(),
                });
                state.push(entered);
            }

            // ===== Generators and coroutines =====
            OpCode::YieldValue => {
                let value = state.pop()?;
                return Ok(Flow::Yield(value));
            }
            OpCode::YieldFrom => {
                let sent = state.pop()?;
                let sub = state.peek(0)?.clone();
                match self.delegate(&sub, sent)? {
                    GenStep::Yielded(value) => {
                        state.pc = instr.offset;
                        state.delegating = true;
                        return Ok(Flow::Yield(value));
                    }
                    GenStep::Returned(value) => {
                        state.delegating = false;
                        state.pop()?;
                        state.push(value);
                    }
                }
            }
            OpCode::GetYieldFromIter => {
                let iterable = state.pop()?;
                let iter = self.yield_from_iter(&iterable, code)?;
                state.push(iter);
            }
            OpCode::GetAwaitable => {
                let value = state.pop()?;
                let awaitable = self.get_awaitable(&value)?;
                state.push(awaitable);
            }
            OpCode::GetAiter => {
                let iterable = state.pop()?;
                let aiter = self.call_method(&iterable, "__aiter__", Args::default())?;
                state.push(aiter);
            }
            OpCode::GetAnext => {
                let aiter = state.peek(0)?.clone();
                let next = self.call_method(&aiter, "__anext__", Args::default())?;
                let awaitable = self.get_awaitable(&next)?;
                state.push(awaitable);
            }
            OpCode::EndAsyncFor => {
                let exc = state.pop()?;
                if !self.exception_is(&exc, ExceptionKind::StopAsyncIteration) {
                    return Err(VmError::Exception(exc));
                }
                match state.blocks.pop() {
                    Some(Block::ExceptHandler { previous, .. }) => state.handled = previous,
                    _ => return Err(VmError::internal("END_ASYNC_FOR outside an exception handler")),
                }
                state.pop()?;
            }

            // ===== Functions and classes =====
            OpCode::CallFunction => {
                let args = state.pop_n(arg as usize)?;
                let callee = state.pop()?;
                let result = self.call(&callee, Args::new(args))?;
                state.push(result);
            }
            OpCode::CallFunctionKw => {
                let names = state.pop()?;
                let names = self.collect(&names)?;
                let mut positional = state.pop_n(arg as usize)?;
                if names.len() > positional.len() {
                    return Err(VmError::internal("CALL_FUNCTION_KW with more names than arguments"));
                }
                let values = positional.split_off(positional.len() - names.len());
                let keywords = names
                    .into_iter()
                    .zip(values)
                    .map(|(name, value)| (name.as_str().unwrap_or_default().to_string(), value))
                    .collect();
                let callee = state.pop()?;
                let result = self.call(&callee, Args::with_keywords(positional, keywords))?;
                state.push(result);
            }
            OpCode::CallFunctionEx => {
                let keywords = if arg & 1 != 0 {
                    let mapping = state.pop()?;
                    let mut keywords = Vec::new();
                    for (key, value) in self.mapping_items(&mapping)? {
                        match key {
                            Value::Str(name) => keywords.push((name.to_string(), value)),
                            _ => return Err(self.type_error("keywords must be strings")),
                        }
                    }
                    keywords
                } else {
                    Vec::new()
                };
                let positional = state.pop()?;
                let positional = self.collect(&positional)?;
                let callee = state.pop()?;
                let result = self.call(&callee, Args::with_keywords(positional, keywords))?;
                state.push(result);
            }
            OpCode::MakeFunction => {
                let qualname = state.pop()?;
                let body = state.pop()?;
                let kwdefaults = if arg & MAKE_FUNCTION_KWDEFAULTS != 0 {
                    let mapping = state.pop()?;
                    self.mapping_items(&mapping)?
                        .into_iter()
                        .map(|(k, v)| (k.as_str().unwrap_or_default().to_string(), v))
                        .collect()
                } else {
                    Vec::new()
                };
                let defaults = if arg & MAKE_FUNCTION_DEFAULTS != 0 {
                    let tuple = state.pop()?;
                    self.collect(&tuple)?
                } else {
                    Vec::new()
                };
                let body = match &body {
                    Value::Object(obj) => match &obj.read().kind {
                        ObjectKind::Code(body) => Arc::clone(body),
                        _ => return Err(VmError::internal("MAKE_FUNCTION operand is not a code object")),
                    },
                    _ => return Err(VmError::internal("MAKE_FUNCTION operand is not a code object")),
                };
                let closure = closure_for(frame);
                let function = Function {
                    name: body.name.clone(),
                    qualname: qualname.as_str().map(str::to_string).unwrap_or_else(|| body.qualname.clone()),
                    code: body,
                    globals: frame.globals.clone(),
                    defaults,
                    kwdefaults,
                    closure,
                    class: None,
                };
                let function = self.alloc(ObjectKind::Function(function), &self.types.function);
                state.push(function);
            }
            OpCode::BuildClass => {
                let bases = state.pop_n(arg as usize)?;
                let name = state.pop()?;
                let body = state.pop()?;
                let name = name.as_str().unwrap_or_default().to_string();
                let class = self.build_class(&body, name, bases)?;
                state.push(class);
            }

            // ===== Imports =====
            OpCode::ImportName => {
                let name = name_at(code, arg)?;
                let fromlist = state.pop()?;
                let level = state.pop()?;
                let level = level.as_i64().unwrap_or(0);
                let module = self.import_name(name, &fromlist, level, &frame.globals)?;
                state.push(module);
            }
            OpCode::ImportFrom => {
                let name = name_at(code, arg)?;
                let module = state.peek(0)?.clone();
                let value = self.import_from(&module, name)?;
                state.push(value);
            }
            OpCode::ImportStar => {
                let module = state.pop()?;
                let target = frame
                    .names
                    .clone()
                    .ok_or_else(|| VmError::internal("IMPORT_STAR in a slot-addressed frame"))?;
                self.import_star(&module, &target)?;
            }

            other => {
                return Err(VmError::internal(format!("opcode {} has no handler", other.name())));
            }
        }
        Ok(Flow::Continue)
    }

    /// Materializes a constant-pool entry.
    fn constant_value(&self, constant: &Constant) -> Value {
        match constant {
            Constant::None => Value::None,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(n) => Value::Int(*n),
            Constant::BigInt(n) => Value::Long(Arc::clone(n)),
            Constant::Float(x) => Value::Float(*x),
            Constant::Str(s) => Value::Str(Arc::clone(s)),
            Constant::Ellipsis => Value::Ellipsis,
            Constant::Tuple(items) => {
                let items = items.iter().map(|item| self.constant_value(item)).collect();
                self.new_tuple(items)
            }
            Constant::Code(code) => self.alloc(ObjectKind::Code(Arc::clone(code)), &self.types.code),
        }
    }

    fn load_global(&mut self, globals: &Namespace, name: &str) -> VmResult<Value> {
        if let Some(value) = globals.get(name) {
            return Ok(value);
        }
        if let Some(value) = self.builtins.get(name) {
            return Ok(value);
        }
        Err(self.name_error(format!("name '{}' is not defined", name)))
    }

    /// Turns the operand of `raise` into an exception instance.
    pub(crate) fn make_exception(&mut self, raised: &Value) -> VmResult<Value> {
        let base = self.types.exception(ExceptionKind::BaseException).clone();
        if let Value::Object(obj) = raised {
            if self.is_class_object(obj) {
                if PrototypeModel::is_subclass(obj, &base) {
                    return self.call(raised, Args::default());
                }
            } else if self.is_instance(raised, &base) {
                return Ok(raised.clone());
            }
        }
        Err(self.type_error("exceptions must derive from BaseException"))
    }

    /// `except spec:` where `spec` is a class or a tuple of classes.
    fn exception_matches(&mut self, exc: &Value, spec: &Value) -> VmResult<bool> {
        let base = self.types.exception(ExceptionKind::BaseException).clone();
        let candidates = match spec {
            Value::Object(obj) if self.is_class_object(obj) => vec![spec.clone()],
            _ => self.collect(spec)?,
        };
        for candidate in &candidates {
            match candidate {
                Value::Object(class)
                    if self.is_class_object(class) && PrototypeModel::is_subclass(class, &base) =>
                {
                    if self.is_instance(exc, class) {
                        return Ok(true);
                    }
                }
                _ => {
                    return Err(self.type_error("catching classes that do not inherit from BaseException is not allowed"));
                }
            }
        }
        Ok(false)
    }

    /// The key/value pairs of a dict or any object with `keys()`.
    pub(crate) fn mapping_items(&mut self, mapping: &Value) -> VmResult<Vec<(Value, Value)>> {
        if let Value::Object(obj) = mapping {
            if let ObjectKind::Dict(dict) = &obj.read().kind {
                return Ok(dict.items());
            }
        }
        if self.lookup_attr(mapping, "keys")?.is_none() {
            let name = self.type_name(mapping);
            return Err(self.type_error(format!("'{}' object is not a mapping", name)));
        }
        let keys = self.call_method(mapping, "keys", Args::default())?;
        let mut items = Vec::new();
        for key in self.collect(&keys)? {
            let value = self.get_item(mapping, &key)?;
            items.push((key, value));
        }
        Ok(items)
    }
}

fn rotate(state: &mut ExecState, n: usize) -> VmResult<()> {
    let len = state.stack.len();
    if len < n {
        return Err(VmError::internal("operand stack underflow"));
    }
    let top = state.stack.remove(len - 1);
    state.stack.insert(len - n, top);
    Ok(())
}

fn name_at(code: &CodeObject, arg: u32) -> VmResult<&str> {
    code.names
        .get(arg as usize)
        .map(String::as_str)
        .ok_or_else(|| VmError::internal(format!("name index {} out of range", arg)))
}

fn is_function_scope(code: &CodeObject) -> bool {
    !code.flags.contains(CodeFlags::MODULE) && !code.flags.contains(CodeFlags::CLASS_BODY)
}

fn unbound_local(vm: &mut Vm, name: &str) -> VmError {
    vm.error(
        ExceptionKind::UnboundLocalError,
        format!("local variable '{}' referenced before assignment", name),
    )
}

/// The closure a function created in `frame` captures.
///
/// A name-addressed function frame becomes a link in the chain; module and
/// class bodies pass their own enclosing scope through.
fn closure_for(frame: &Frame) -> Option<Arc<Environment>> {
    match &frame.names {
        Some(names) if is_function_scope(&frame.code) => Some(Arc::new(Environment::new(
            names.clone(),
            Arc::clone(&frame.code),
            frame.enclosing.clone(),
        ))),
        _ => frame.enclosing.clone(),
    }
}

/// The collection a comprehension appends to, `depth` entries from the top.
fn collection_at(state: &ExecState, depth: u32) -> VmResult<Value> {
    let depth = depth as usize;
    if depth == 0 {
        return Err(VmError::internal("collection depth 0"));
    }
    state.peek(depth - 1).cloned()
}

fn target_object(value: &Value) -> VmResult<&crate::runtime::ObjRef> {
    value
        .as_object()
        .ok_or_else(|| VmError::internal("collection operand is not an object"))
}

fn binary_operator(op: OpCode) -> VmResult<(BinOp, bool)> {
    Ok(match op {
        OpCode::BinaryAdd => (BinOp::Add, false),
        OpCode::BinarySubtract => (BinOp::Sub, false),
        OpCode::BinaryMultiply => (BinOp::Mul, false),
        OpCode::BinaryTrueDivide => (BinOp::TrueDiv, false),
        OpCode::BinaryFloorDivide => (BinOp::FloorDiv, false),
        OpCode::BinaryModulo => (BinOp::Mod, false),
        OpCode::BinaryPower => (BinOp::Pow, false),
        OpCode::BinaryLshift => (BinOp::LShift, false),
        OpCode::BinaryRshift => (BinOp::RShift, false),
        OpCode::BinaryAnd => (BinOp::And, false),
        OpCode::BinaryOr => (BinOp::Or, false),
        OpCode::BinaryXor => (BinOp::Xor, false),
        OpCode::InplaceAdd => (BinOp::Add, true),
        OpCode::InplaceSubtract => (BinOp::Sub, true),
        OpCode::InplaceMultiply => (BinOp::Mul, true),
        OpCode::InplaceTrueDivide => (BinOp::TrueDiv, true),
        OpCode::InplaceFloorDivide => (BinOp::FloorDiv, true),
        OpCode::InplaceModulo => (BinOp::Mod, true),
        OpCode::InplacePower => (BinOp::Pow, true),
        OpCode::InplaceLshift => (BinOp::LShift, true),
        OpCode::InplaceRshift => (BinOp::RShift, true),
        OpCode::InplaceAnd => (BinOp::And, true),
        OpCode::InplaceOr => (BinOp::Or, true),
        OpCode::InplaceXor => (BinOp::Xor, true),
        other => return Err(VmError::internal(format!("{} is not a binary operator", other.name()))),
    })
}

/// `ascii()` applied to an already computed repr.
pub(crate) fn ascii_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c as u32 {
            0..=0x7f => out.push(c),
            0x80..=0xff => out.push_str(&format!("\\x{:02x}", c as u32)),
            0x100..=0xffff => out.push_str(&format!("\\u{:04x}", c as u32)),
            n => out.push_str(&format!("\\U{:08x}", n)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::parser::Parser;

    fn run(source: &str) -> (Vm, VmResult<Value>) {
        let module = Parser::new(source).parse_module().expect("parse");
        let code = crate::compiler::compile_module_checked(&module, "<test>").expect("compile");
        let mut vm = Vm::new(EngineConfig::default());
        let globals = vm.new_globals("__main__");
        let result = vm.run_module_code(code, globals);
        (vm, result)
    }

    #[test]
    fn test_stack_depth_restored_after_handler() {
        let source = "def f():\n    try:\n        return [1, 2, (3 + 1 / 0)]\n    except ZeroDivisionError:\n        return 'caught'\nf()\n";
        let (_, result) = run(source);
        assert!(matches!(result, Ok(Value::Str(s)) if &*s == "caught"));
    }

    #[test]
    fn test_unhandled_exception_propagates() {
        let (mut vm, result) = run("x = 1\n[][x]\n");
        match result {
            Err(VmError::Exception(exc)) => assert!(vm.exception_is(&exc, ExceptionKind::IndexError)),
            _ => panic!("expected IndexError"),
        }
    }

    #[test]
    fn test_bare_raise_without_active_exception() {
        let (mut vm, result) = run("raise\n");
        match result {
            Err(VmError::Exception(exc)) => {
                assert_eq!(vm.describe_exception(&exc), "RuntimeError: No active exception to reraise")
            }
            _ => panic!("expected RuntimeError"),
        }
    }

    #[test]
    fn test_corrupt_bytecode_is_internal() {
        let module = Parser::new("x = 1\n").parse_module().expect("parse");
        let code = crate::compiler::compile_module_checked(&module, "<test>").expect("compile");
        let mut code = Arc::try_unwrap(code).expect("unshared code object");
        code.bytecode = vec![9999];
        let mut vm = Vm::new(EngineConfig::default());
        let globals = vm.new_globals("__main__");
        assert!(matches!(
            vm.run_module_code(Arc::new(code), globals),
            Err(VmError::Internal(_))
        ));
    }

    #[test]
    fn test_rotations() {
        let mut state = ExecState::default();
        state.stack = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        rotate(&mut state, 3).unwrap();
        assert!(matches!(state.stack[..], [Value::Int(3), Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_ascii_escape() {
        assert_eq!(ascii_escape("'é'"), "'\\xe9'");
        assert_eq!(ascii_escape("'a'"), "'a'");
    }
}
