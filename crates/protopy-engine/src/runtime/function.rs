//! Callable objects.

use std::fmt;
use std::sync::Arc;

use super::environment::{Environment, Namespace};
use super::object::ObjRef;
use super::value::Value;
use crate::compiler::CodeObject;
use crate::vm::{Vm, VmResult};

/// A user function: code plus the context it was created in.
#[derive(Debug, Clone)]
pub struct Function {
    /// Compiled body
    pub code: Arc<CodeObject>,
    /// Globals of the defining module
    pub globals: Namespace,
    /// `__name__`
    pub name: String,
    /// `__qualname__`
    pub qualname: String,
    /// Defaults for the trailing positional parameters
    pub defaults: Vec<Value>,
    /// Defaults for keyword-only parameters
    pub kwdefaults: Vec<(String, Value)>,
    /// Enclosing function activations
    pub closure: Option<Arc<Environment>>,
    /// Class whose body defined this function
    pub class: Option<ObjRef>,
}

/// Arguments of a call.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Positional arguments
    pub positional: Vec<Value>,
    /// Keyword arguments in call order
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    /// Positional-only arguments.
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    /// Positional and keyword arguments.
    pub fn with_keywords(positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self { positional, keywords }
    }

    /// Number of positional arguments.
    pub fn len(&self) -> usize {
        self.positional.len()
    }

    /// Returns true if there are no arguments at all.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    /// Positional argument `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Removes and returns keyword `name`.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(index).1)
    }

    /// Prepends a receiver.
    pub fn prepend(mut self, receiver: Value) -> Self {
        self.positional.insert(0, receiver);
        self
    }
}

/// Signature of a function implemented in Rust.
pub type NativeFn = fn(&mut Vm, Args) -> VmResult<Value>;

/// A function implemented in Rust.
#[derive(Clone)]
pub struct NativeFunction {
    /// `__name__`
    pub name: &'static str,
    /// Implementation
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// A callable bound to its first argument.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    /// Value passed as the first argument
    pub receiver: Value,
    /// The underlying callable
    pub function: Value,
}
