//! The bytecode virtual machine.
//!
//! [`Vm`] is the explicit interpreter-state object: every operation that
//! needs "the current interpreter" is a method on it, and nested calls
//! re-enter [`Vm::execute_bytecode_range`] recursively.
//!
//! ## Structure
//!
//! - `interpreter` - the fetch/decode/dispatch loop and exception unwinding
//! - `call` - the call protocol, argument binding, class construction
//! - `attr` - the [`ObjectModel`](crate::runtime::ObjectModel) implementation
//! - `ops` / `arith` - operators, comparisons, subscripts
//! - `convert` - `repr`, `str`, truthiness, hashing
//! - `iter` - the iteration protocol
//! - `generator` - resuming generators and coroutines
//! - `import` - module resolution and loading

mod arith;
mod attr;
mod call;
mod convert;
mod generator;
mod import;
mod interpreter;
mod iter;
mod ops;

/// Native stack that must remain before a frame starts running.
const STACK_RED_ZONE: usize = 256 * 1024;
/// Size of each extra stack segment allocated once the red zone is reached.
const STACK_SEGMENT: usize = 4 * 1024 * 1024;

/// Runs `f` with at least [`STACK_RED_ZONE`] bytes of native stack, on a
/// freshly allocated segment when the current one is nearly exhausted.
pub(crate) fn with_native_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, f)
}

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::builtins::{self, BuiltinTypes, ExceptionKind};
use crate::config::EngineConfig;
use crate::runtime::object::{Module, ObjectKind};
use crate::runtime::{
    BoundMethod, Dict, IterState, Namespace, NativeFn, NativeFunction, ObjRef, Object, PrototypeModel, Set, Value,
};

pub(crate) use attr::class_tag;
pub(crate) use convert::class_name;
pub use convert::quote_str;
pub use generator::{GenStep, Resume};
pub(crate) use interpreter::ascii_escape;
pub use ops::{BinOp, UnaryOp};
pub(crate) use ops::{set_difference, set_intersection, set_union};

/// An error raised while executing bytecode.
#[derive(Debug, Clone, Error)]
pub enum VmError {
    /// A user-visible exception (an instance of a `BaseException` subclass)
    #[error("unhandled exception: {0:?}")]
    Exception(Value),
    /// An interpreter invariant was violated (corrupt bytecode, stack underflow)
    #[error("internal error: {0}")]
    Internal(String),
}

impl VmError {
    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        VmError::Internal(message.into())
    }
}

/// Result type for VM operations.
pub type VmResult<T> = Result<T, VmError>;

/// What `locals()`, `globals()` and zero-argument `super()` see: one entry
/// per active frame.
#[derive(Debug, Clone)]
pub(crate) struct ScopeLink {
    pub globals: Namespace,
    pub names: Option<Namespace>,
    pub class: Option<ObjRef>,
    pub first_arg: Option<Value>,
}

/// The interpreter state.
pub struct Vm {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) types: Arc<BuiltinTypes>,
    pub(crate) builtins: Namespace,
    /// Loaded modules by qualified name, shared between forks
    pub(crate) modules: Namespace,
    depth: usize,
    pub(crate) scopes: Vec<ScopeLink>,
    pub(crate) repr_guard: Vec<usize>,
    /// When set, `print` appends here instead of writing to stdout
    output: Option<Arc<Mutex<String>>>,
}

impl Vm {
    /// Creates an interpreter with fresh builtins.
    pub fn new(config: EngineConfig) -> Self {
        let types = Arc::new(BuiltinTypes::new());
        let builtins = builtins::global::namespace(&types);
        Self {
            config: Arc::new(config),
            types,
            builtins,
            modules: Namespace::new(),
            depth: 0,
            scopes: Vec::new(),
            repr_guard: Vec::new(),
            output: None,
        }
    }

    /// An interpreter for another thread. It shares the heap, the builtins
    /// and the module cache, and has its own call stack.
    pub fn fork(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            types: Arc::clone(&self.types),
            builtins: self.builtins.clone(),
            modules: self.modules.clone(),
            depth: 0,
            scopes: Vec::new(),
            repr_guard: Vec::new(),
            output: self.output.clone(),
        }
    }

    /// Redirects `print` output into a buffer, returned for inspection.
    pub fn capture_output(&mut self) -> Arc<Mutex<String>> {
        let buffer = Arc::new(Mutex::new(String::new()));
        self.output = Some(Arc::clone(&buffer));
        buffer
    }

    /// Writes program output to the capture buffer or stdout.
    pub fn write_output(&mut self, text: &str) -> VmResult<()> {
        match &self.output {
            Some(buffer) => {
                buffer.lock().push_str(text);
                Ok(())
            }
            None => {
                use std::io::Write;
                let mut stdout = std::io::stdout().lock();
                stdout
                    .write_all(text.as_bytes())
                    .and_then(|_| stdout.flush())
                    .map_err(|err| VmError::internal(format!("stdout: {}", err)))
            }
        }
    }

    /// The configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The builtin classes.
    pub fn types(&self) -> &BuiltinTypes {
        &self.types
    }

    /// The builtins namespace.
    pub fn builtins(&self) -> &Namespace {
        &self.builtins
    }

    /// A fresh module namespace named `name`.
    pub fn new_globals(&self, name: &str) -> Namespace {
        let globals = Namespace::new();
        globals.set("__name__", Value::from(name));
        globals.set("__builtins__", Value::None);
        globals
    }

    pub(crate) fn enter_call(&mut self) -> VmResult<()> {
        if self.depth >= self.config.recursion_limit {
            return Err(self.error(ExceptionKind::RecursionError, "maximum recursion depth exceeded"));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave_call(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ===== Exceptions =====

    /// Instantiates exception class `class` with `args`.
    pub fn exception_from_args(&mut self, class: &ObjRef, args: Vec<Value>) -> Value {
        let instance = ObjRef::new(Object::new(ObjectKind::Instance, class.clone()));
        {
            let mut guard = instance.write();
            if PrototypeModel::is_subclass(class, self.types.exception(ExceptionKind::StopIteration)) {
                guard
                    .attrs
                    .insert("value".into(), args.first().cloned().unwrap_or(Value::None));
            }
            guard.attrs.insert("__cause__".into(), Value::None);
            guard.attrs.insert("__context__".into(), Value::None);
        }
        let args = self.new_tuple(args);
        instance.write().attrs.insert("args".into(), args);
        Value::Object(instance)
    }

    /// A `kind` exception with a single message argument.
    pub fn new_exception(&mut self, kind: ExceptionKind, message: impl Into<String>) -> Value {
        let class = self.types.exception(kind).clone();
        self.exception_from_args(&class, vec![Value::from(message.into())])
    }

    /// A `kind` exception, ready to propagate.
    pub fn error(&mut self, kind: ExceptionKind, message: impl Into<String>) -> VmError {
        VmError::Exception(self.new_exception(kind, message))
    }

    /// `TypeError(message)`.
    pub fn type_error(&mut self, message: impl Into<String>) -> VmError {
        self.error(ExceptionKind::TypeError, message)
    }

    /// `ValueError(message)`.
    pub fn value_error(&mut self, message: impl Into<String>) -> VmError {
        self.error(ExceptionKind::ValueError, message)
    }

    /// `IndexError(message)`.
    pub fn index_error(&mut self, message: impl Into<String>) -> VmError {
        self.error(ExceptionKind::IndexError, message)
    }

    /// `AttributeError(message)`.
    pub fn attribute_error(&mut self, message: impl Into<String>) -> VmError {
        self.error(ExceptionKind::AttributeError, message)
    }

    /// `NameError(message)`.
    pub fn name_error(&mut self, message: impl Into<String>) -> VmError {
        self.error(ExceptionKind::NameError, message)
    }

    /// `RuntimeError(message)`.
    pub fn runtime_error(&mut self, message: impl Into<String>) -> VmError {
        self.error(ExceptionKind::RuntimeError, message)
    }

    /// `KeyError(key)`: the argument is the key itself, not a message.
    pub fn key_error(&mut self, key: Value) -> VmError {
        let class = self.types.exception(ExceptionKind::KeyError).clone();
        VmError::Exception(self.exception_from_args(&class, vec![key]))
    }

    /// `StopIteration(value)`.
    pub fn stop_iteration(&mut self, value: Value) -> VmError {
        let class = self.types.exception(ExceptionKind::StopIteration).clone();
        VmError::Exception(self.exception_from_args(&class, vec![value]))
    }

    /// Returns true if `exc` is an instance of the builtin exception `kind`.
    pub fn exception_is(&self, exc: &Value, kind: ExceptionKind) -> bool {
        match exc {
            Value::Object(obj) => {
                let class = obj.read().class_ref().cloned();
                class.is_some_and(|class| PrototypeModel::is_subclass(&class, self.types.exception(kind)))
            }
            _ => false,
        }
    }

    /// Renders an exception as `Type: message`, the form the CLI prints.
    pub fn describe_exception(&mut self, exc: &Value) -> String {
        let class = self.type_of(exc);
        let name = convert::class_name(&class);
        match self.to_str(exc) {
            Ok(text) if text.is_empty() => name,
            Ok(text) => format!("{}: {}", name, text),
            Err(_) => name,
        }
    }

    // ===== Allocation =====

    /// Allocates an object of `kind` whose class is `class`.
    pub fn alloc(&self, kind: ObjectKind, class: &ObjRef) -> Value {
        Value::Object(ObjRef::new(Object::new(kind, class.clone())))
    }

    /// A new `list`.
    pub fn new_list(&self, items: Vec<Value>) -> Value {
        self.alloc(ObjectKind::List(items), &self.types.list)
    }

    /// A new `tuple`.
    pub fn new_tuple(&self, items: Vec<Value>) -> Value {
        self.alloc(ObjectKind::Tuple(items), &self.types.tuple)
    }

    /// A new `dict`.
    pub fn new_dict(&self, dict: Dict) -> Value {
        self.alloc(ObjectKind::Dict(dict), &self.types.dict)
    }

    /// A new `set`.
    pub fn new_set(&self, set: Set) -> Value {
        self.alloc(ObjectKind::Set(set), &self.types.set)
    }

    /// A builtin function object.
    pub fn new_native(&self, name: &'static str, func: NativeFn) -> Value {
        self.alloc(ObjectKind::Native(NativeFunction { name, func }), &self.types.builtin_function)
    }

    /// A native iterator.
    pub fn new_iterator(&self, state: IterState) -> Value {
        self.alloc(ObjectKind::Iterator(state), &self.types.iterator)
    }

    /// `function` bound to `receiver`.
    pub fn new_bound_method(&self, receiver: Value, function: Value) -> Value {
        self.alloc(ObjectKind::BoundMethod(BoundMethod { receiver, function }), &self.types.method)
    }

    /// A module object over `namespace`.
    pub fn new_module(&self, name: &str, namespace: Namespace, file: Option<PathBuf>) -> Value {
        let module = Module {
            name: name.to_string(),
            namespace,
            file,
        };
        self.alloc(ObjectKind::Module(module), &self.types.module)
    }

    /// A dict built from string-keyed entries.
    pub fn dict_from_entries(&mut self, entries: Vec<(String, Value)>) -> Value {
        let mut dict = Dict::new();
        for (name, value) in entries {
            let key = Value::from(name);
            if let Ok(hashed) = crate::runtime::DictKey::from_value(&key) {
                dict.insert(hashed, key, value);
            }
        }
        self.new_dict(dict)
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("depth", &self.depth)
            .field("modules", &self.modules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_instances() {
        let mut vm = Vm::new(EngineConfig::default());
        let exc = vm.new_exception(ExceptionKind::ZeroDivisionError, "division by zero");
        assert!(vm.exception_is(&exc, ExceptionKind::ArithmeticError));
        assert!(vm.exception_is(&exc, ExceptionKind::BaseException));
        assert!(!vm.exception_is(&exc, ExceptionKind::LookupError));
        assert_eq!(vm.describe_exception(&exc), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_recursion_limit() {
        let mut vm = Vm::new(EngineConfig::default().with_recursion_limit(2));
        assert!(vm.enter_call().is_ok());
        assert!(vm.enter_call().is_ok());
        match vm.enter_call() {
            Err(VmError::Exception(exc)) => assert!(vm.exception_is(&exc, ExceptionKind::RecursionError)),
            other => panic!("expected RecursionError, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_fork_shares_modules() {
        let vm = Vm::new(EngineConfig::default());
        let child = vm.fork();
        vm.modules.set("m", Value::Int(1));
        assert!(child.modules.contains("m"));
    }
}
