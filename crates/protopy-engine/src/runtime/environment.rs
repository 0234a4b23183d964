//! Name bags and the closure chain.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::value::Value;
use crate::compiler::CodeObject;

/// A shared name-to-value bag: module globals, class bodies and the locals
/// of functions that cannot use slots.
#[derive(Debug, Clone, Default)]
pub struct Namespace(Arc<RwLock<FxHashMap<String, Value>>>);

impl Namespace {
    /// Creates an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a name.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.read().get(name).cloned()
    }

    /// Binds a name.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.write().insert(name.into(), value);
    }

    /// Unbinds a name, returning the old value.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.write().remove(name)
    }

    /// Returns true if the name is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.0.read().contains_key(name)
    }

    /// A copy of every binding, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        let mut entries: Vec<_> = self.0.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Returns true if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Returns true if both handles share storage.
    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// One link of the closure chain: the name bag of an enclosing function
/// activation and the code that owns it.
///
/// A free variable resolves to the innermost environment whose code
/// declares it as a local.
#[derive(Debug)]
pub struct Environment {
    /// The activation's locals
    pub names: Namespace,
    /// Code whose `varnames` lists the locals owned here
    pub code: Arc<CodeObject>,
    /// Next enclosing function activation
    pub outer: Option<Arc<Environment>>,
}

impl Environment {
    /// Creates a link over `names`.
    pub fn new(names: Namespace, code: Arc<CodeObject>, outer: Option<Arc<Environment>>) -> Self {
        Self { names, code, outer }
    }

    /// Finds the environment that owns `name`.
    pub fn resolve(&self, name: &str) -> Option<&Environment> {
        let mut env = Some(self);
        while let Some(current) = env {
            if current.code.varnames.iter().any(|local| local == name) {
                return Some(current);
            }
            env = current.outer.as_deref();
        }
        None
    }
}
