//! Activation records and the resumable execution state.
//!
//! A [`Frame`] is where names live; an [`ExecState`] is where the
//! interpreter is: operand stack, block stack and program counter. Keeping
//! the two apart is what lets a generator suspend. Its `ExecState` is plain
//! data the generator object owns between resumptions.

use std::sync::Arc;

use super::environment::{Environment, Namespace};
use super::object::ObjRef;
use super::value::Value;
use crate::compiler::CodeObject;
use crate::vm::{VmError, VmResult};

/// One activation's bindings.
#[derive(Debug)]
pub struct Frame {
    /// The code being executed
    pub code: Arc<CodeObject>,
    /// Module globals
    pub globals: Namespace,
    /// Name bag, for modules, class bodies and functions without slots
    pub names: Option<Namespace>,
    /// Local slots, for functions with `SLOTS`
    pub fast: Vec<Option<Value>>,
    /// Enclosing function activations, for free variables
    pub enclosing: Option<Arc<Environment>>,
    /// Class the executing function was defined in (for `super()`)
    pub class: Option<ObjRef>,
}

impl Frame {
    /// A frame whose names are the module globals.
    pub fn module(code: Arc<CodeObject>, globals: Namespace) -> Self {
        Self {
            code,
            names: Some(globals.clone()),
            globals,
            fast: Vec::new(),
            enclosing: None,
            class: None,
        }
    }

    /// A fresh frame for a call of `code`, with every local unbound.
    pub fn for_call(
        code: Arc<CodeObject>,
        globals: Namespace,
        enclosing: Option<Arc<Environment>>,
        class: Option<ObjRef>,
    ) -> Self {
        let (names, fast) = if code.uses_slots() {
            (None, vec![None; code.nslots as usize])
        } else {
            (Some(Namespace::new()), Vec::new())
        };
        Self {
            code,
            globals,
            names,
            fast,
            enclosing,
            class,
        }
    }

    /// Binds local `index` (a `varnames` position).
    pub fn bind_local(&mut self, index: usize, value: Value) {
        match &self.names {
            Some(names) => {
                if let Some(name) = self.code.varnames.get(index) {
                    names.set(name.clone(), value);
                }
            }
            None => {
                if let Some(slot) = self.fast.get_mut(index) {
                    *slot = Some(value);
                }
            }
        }
    }

    /// Reads local `index` (a `varnames` position).
    pub fn local(&self, index: usize) -> Option<Value> {
        match &self.names {
            Some(names) => self.code.varnames.get(index).and_then(|name| names.get(name)),
            None => self.fast.get(index).cloned().flatten(),
        }
    }
}

/// A block-stack entry.
#[derive(Debug, Clone)]
pub enum Block {
    /// Protected region: on an exception, truncate the operand stack to
    /// `level`, push the exception and continue at `handler`
    Finally {
        /// Handler address
        handler: usize,
        /// Operand stack depth at setup
        level: usize,
    },
    /// A handler is running; `previous` is the exception it displaced
    ExceptHandler {
        /// Operand stack depth below the handler's values
        level: usize,
        /// Exception handled before this one
        previous: Option<Value>,
    },
}

/// Where the interpreter is within a code object.
#[derive(Debug, Default)]
pub struct ExecState {
    /// Operand stack
    pub stack: Vec<Value>,
    /// Block stack
    pub blocks: Vec<Block>,
    /// Next instruction
    pub pc: usize,
    /// Exception being handled, if any
    pub handled: Option<Value>,
    /// Exception to raise before executing the next instruction
    pub pending: Option<Value>,
    /// Suspended inside `YIELD_FROM`; the sub-iterator is on top of the stack
    pub delegating: bool,
}

impl ExecState {
    /// A state positioned at the start of `code`.
    pub fn new(code: &CodeObject) -> Self {
        Self {
            stack: Vec::with_capacity(code.stacksize as usize),
            ..Self::default()
        }
    }

    /// Pushes onto the operand stack.
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pops the top of the operand stack.
    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or_else(|| VmError::internal("operand stack underflow"))
    }

    /// Pops the top `n` values, oldest first.
    pub fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        let len = self.stack.len();
        if n > len {
            return Err(VmError::internal("operand stack underflow"));
        }
        Ok(self.stack.split_off(len - n))
    }

    /// The value `depth` entries below the top (0 is the top).
    pub fn peek(&self, depth: usize) -> VmResult<&Value> {
        let len = self.stack.len();
        if depth >= len {
            return Err(VmError::internal("operand stack underflow"));
        }
        Ok(&self.stack[len - 1 - depth])
    }
}

/// How a run of `execute_bytecode_range` ended.
#[derive(Debug)]
pub enum Completion {
    /// `RETURN_VALUE`
    Return(Value),
    /// A generator suspended with this value
    Yield(Value),
    /// The program counter reached the end of the range
    EndOfRange,
}
