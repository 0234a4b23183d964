//! Heap objects.
//!
//! Every object carries a prototype list: a class's bases, or an
//! instance's class. Attribute lookup walks that list (see
//! [`super::object_model`]).

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;

use super::dict::{Dict, Set};
use super::environment::Namespace;
use super::function::{BoundMethod, Function, NativeFunction};
use super::generator::Generator;
use super::iterator::IterState;
use super::sync::{ThreadHandle, UserLock};
use super::value::Value;
use crate::compiler::CodeObject;

/// A shared, lock-guarded heap object.
#[derive(Clone)]
pub struct ObjRef(Arc<RwLock<Object>>);

impl ObjRef {
    /// Allocates `object`.
    pub fn new(object: Object) -> Self {
        Self(Arc::new(RwLock::new(object)))
    }

    /// Locks for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, Object> {
        self.0.read()
    }

    /// Locks for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, Object> {
        self.0.write()
    }

    /// Returns true if both refer to the same object.
    pub fn ptr_eq(&self, other: &ObjRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The object's address.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(object) => write!(f, "<{} at {:#x}>", object.kind.kind_name(), self.id()),
            None => write!(f, "<locked object at {:#x}>", self.id()),
        }
    }
}

/// A heap object.
#[derive(Debug)]
pub struct Object {
    /// Payload
    pub kind: ObjectKind,
    /// Bases of a class, or the class of anything else
    pub prototypes: Vec<ObjRef>,
    /// Own attributes
    pub attrs: FxHashMap<String, Value>,
}

impl Object {
    /// Creates an object of class `class`.
    pub fn new(kind: ObjectKind, class: ObjRef) -> Self {
        Self {
            kind,
            prototypes: vec![class],
            attrs: FxHashMap::default(),
        }
    }

    /// Creates a class object.
    pub fn class(data: ClassData, bases: Vec<ObjRef>) -> Self {
        Self {
            kind: ObjectKind::Class(data),
            prototypes: bases,
            attrs: FxHashMap::default(),
        }
    }

    /// The class of a non-class object.
    pub fn class_ref(&self) -> Option<&ObjRef> {
        match self.kind {
            ObjectKind::Class(_) => None,
            _ => self.prototypes.first(),
        }
    }
}

/// Tag for classes implemented natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// `object`
    Object,
    /// `type`
    Type,
    /// `NoneType`
    NoneType,
    /// `bool`
    Bool,
    /// `int`
    Int,
    /// `float`
    Float,
    /// `str`
    Str,
    /// `list`
    List,
    /// `tuple`
    Tuple,
    /// `dict`
    Dict,
    /// `set`
    Set,
    /// `range`
    Range,
    /// `slice`
    Slice,
    /// `function`
    Function,
    /// `builtin_function_or_method`
    BuiltinFunction,
    /// `method`
    Method,
    /// `staticmethod`
    StaticMethod,
    /// `classmethod`
    ClassMethod,
    /// `property`
    Property,
    /// `super`
    Super,
    /// `code`
    Code,
    /// `module`
    Module,
    /// `generator`
    Generator,
    /// `coroutine`
    Coroutine,
    /// `iterator`
    Iterator,
    /// `ellipsis`
    Ellipsis,
    /// `NotImplementedType`
    NotImplementedType,
    /// `lock`
    Lock,
    /// `thread`
    Thread,
    /// `BaseException` and its native subclasses
    Exception,
}

/// Class metadata.
#[derive(Debug, Clone)]
pub struct ClassData {
    /// `__name__`
    pub name: String,
    /// `__qualname__`
    pub qualname: String,
    /// Set for natively implemented classes
    pub tag: Option<TypeTag>,
}

/// `range(start, stop, step)`; `step` is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// First value
    pub start: i64,
    /// Exclusive bound
    pub stop: i64,
    /// Increment
    pub step: i64,
}

impl Range {
    /// Number of values.
    pub fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (self.start as i128, self.stop as i128, self.step as i128)
        } else {
            (self.stop as i128, self.start as i128, -(self.step as i128))
        };
        if lo >= hi {
            0
        } else {
            ((hi - lo - 1) / step + 1) as usize
        }
    }

    /// Returns true if the range is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value at `index`, which must be in bounds.
    pub fn at(&self, index: usize) -> i64 {
        self.start + self.step * index as i64
    }

    /// Returns true if `n` is one of the values.
    pub fn contains(&self, n: i64) -> bool {
        let in_bounds = if self.step > 0 {
            n >= self.start && n < self.stop
        } else {
            n <= self.start && n > self.stop
        };
        in_bounds && (n - self.start) % self.step == 0
    }
}

/// `slice(start, stop, step)`; any part may be `None`.
#[derive(Debug, Clone)]
pub struct Slice {
    /// Lower bound
    pub start: Value,
    /// Upper bound
    pub stop: Value,
    /// Stride
    pub step: Value,
}

/// A `property` descriptor.
#[derive(Debug, Clone)]
pub struct Property {
    /// Getter
    pub fget: Value,
    /// Setter, or `None`
    pub fset: Value,
}

/// The proxy returned by `super()`.
#[derive(Debug, Clone)]
pub struct SuperProxy {
    /// Lookup starts after this class in the receiver's chain
    pub class: ObjRef,
    /// Instance (or class) methods are bound to
    pub receiver: Value,
}

/// A loaded module.
#[derive(Debug, Clone)]
pub struct Module {
    /// Dotted module name
    pub name: String,
    /// Module globals
    pub namespace: Namespace,
    /// Source path for modules loaded from files
    pub file: Option<PathBuf>,
}

/// Object payloads.
#[derive(Debug)]
pub enum ObjectKind {
    /// Instance of a user class; state lives in `attrs`
    Instance,
    /// A class
    Class(ClassData),
    /// `list`
    List(Vec<Value>),
    /// `tuple`
    Tuple(Vec<Value>),
    /// `dict`
    Dict(Dict),
    /// `set`
    Set(Set),
    /// `range`
    Range(Range),
    /// `slice`
    Slice(Slice),
    /// User function
    Function(Function),
    /// Function implemented in Rust
    Native(NativeFunction),
    /// Function bound to a receiver
    BoundMethod(BoundMethod),
    /// `staticmethod(f)`
    StaticMethod(Value),
    /// `classmethod(f)`
    ClassMethod(Value),
    /// `property(fget, fset)`
    Property(Property),
    /// `super()`
    Super(SuperProxy),
    /// Code object constant
    Code(Arc<CodeObject>),
    /// Module
    Module(Module),
    /// Generator or coroutine
    Generator(Generator),
    /// Native iterator
    Iterator(IterState),
    /// `_thread` lock
    Lock(Arc<UserLock>),
    /// `_thread` handle
    Thread(ThreadHandle),
}

impl ObjectKind {
    /// Short name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ObjectKind::Instance => "instance",
            ObjectKind::Class(_) => "class",
            ObjectKind::List(_) => "list",
            ObjectKind::Tuple(_) => "tuple",
            ObjectKind::Dict(_) => "dict",
            ObjectKind::Set(_) => "set",
            ObjectKind::Range(_) => "range",
            ObjectKind::Slice(_) => "slice",
            ObjectKind::Function(_) => "function",
            ObjectKind::Native(_) => "builtin_function_or_method",
            ObjectKind::BoundMethod(_) => "method",
            ObjectKind::StaticMethod(_) => "staticmethod",
            ObjectKind::ClassMethod(_) => "classmethod",
            ObjectKind::Property(_) => "property",
            ObjectKind::Super(_) => "super",
            ObjectKind::Code(_) => "code",
            ObjectKind::Module(_) => "module",
            ObjectKind::Generator(generator) => generator.kind.name(),
            ObjectKind::Iterator(_) => "iterator",
            ObjectKind::Lock(_) => "lock",
            ObjectKind::Thread(_) => "thread",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_len() {
        assert_eq!(Range { start: 0, stop: 3, step: 1 }.len(), 3);
        assert_eq!(Range { start: 0, stop: 10, step: 3 }.len(), 4);
        assert_eq!(Range { start: 5, stop: 0, step: -2 }.len(), 3);
        assert_eq!(Range { start: 3, stop: 3, step: 1 }.len(), 0);
        assert_eq!(Range { start: 0, stop: 5, step: -1 }.len(), 0);
    }

    #[test]
    fn test_range_contains() {
        let r = Range { start: 1, stop: 10, step: 3 };
        assert!(r.contains(4));
        assert!(!r.contains(5));
        assert!(!r.contains(10));
        let down = Range { start: 5, stop: 0, step: -2 };
        assert!(down.contains(1));
        assert!(!down.contains(0));
    }

    #[test]
    fn test_identity_and_prototypes() {
        let class = ObjRef::new(Object::class(
            ClassData {
                name: "A".into(),
                qualname: "A".into(),
                tag: None,
            },
            vec![],
        ));
        let a = ObjRef::new(Object::new(ObjectKind::Instance, class.clone()));
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(a.read().class_ref().is_some_and(|c| c.ptr_eq(&class)));
        assert!(class.read().class_ref().is_none());
    }
}
