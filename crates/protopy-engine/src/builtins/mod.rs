//! Builtin classes, functions and native modules.
//!
//! [`BuiltinTypes`] creates every native class once per engine. Methods of
//! builtin types are native functions stored as class attributes, so they
//! bind to their receiver through the ordinary attribute protocol and
//! arrive with the receiver as the first positional argument.
//!
//! Operator dunders (`__add__`, `__getitem__`, `__eq__`, ...) are not
//! installed on builtin classes: the VM implements those natively, and a
//! user subclass that defines one overrides the native behaviour.

pub mod console;
pub mod dict;
pub mod error;
pub mod format;
pub mod function;
pub mod global;
pub mod list;
pub mod math;
pub mod modules;
pub mod number;
pub mod object;
pub mod string;

pub use error::ExceptionKind;

use crate::runtime::{Args, ClassData, NativeFn, NativeFunction, ObjRef, Object, ObjectKind, TypeTag, Value};
use crate::vm::{Vm, VmResult};

/// A table of native methods.
pub type MethodTable = &'static [(&'static str, NativeFn)];

/// The native classes.
#[derive(Debug)]
#[allow(missing_docs)]
pub struct BuiltinTypes {
    pub object: ObjRef,
    pub type_: ObjRef,
    pub none_type: ObjRef,
    pub bool_: ObjRef,
    pub int: ObjRef,
    pub float: ObjRef,
    pub str_: ObjRef,
    pub list: ObjRef,
    pub tuple: ObjRef,
    pub dict: ObjRef,
    pub set: ObjRef,
    pub range: ObjRef,
    pub slice: ObjRef,
    pub function: ObjRef,
    pub builtin_function: ObjRef,
    pub method: ObjRef,
    pub staticmethod: ObjRef,
    pub classmethod: ObjRef,
    pub property: ObjRef,
    pub super_: ObjRef,
    pub code: ObjRef,
    pub module: ObjRef,
    pub generator: ObjRef,
    pub coroutine: ObjRef,
    pub iterator: ObjRef,
    pub ellipsis: ObjRef,
    pub not_implemented: ObjRef,
    pub lock: ObjRef,
    pub thread: ObjRef,
    exceptions: Vec<ObjRef>,
}

fn native_class(name: &str, tag: TypeTag, bases: Vec<ObjRef>) -> ObjRef {
    let data = ClassData {
        name: name.to_string(),
        qualname: name.to_string(),
        tag: Some(tag),
    };
    let class = ObjRef::new(Object::class(data, bases));
    class.write().attrs.insert("__module__".into(), Value::from("builtins"));
    class
}

impl BuiltinTypes {
    /// Creates the class graph and installs native methods.
    pub fn new() -> Self {
        let object = native_class("object", TypeTag::Object, Vec::new());
        let derive = |name: &str, tag: TypeTag| native_class(name, tag, vec![object.clone()]);

        let int = derive("int", TypeTag::Int);
        let bool_ = native_class("bool", TypeTag::Bool, vec![int.clone()]);

        let mut exceptions: Vec<ObjRef> = Vec::with_capacity(ExceptionKind::ALL.len());
        for kind in ExceptionKind::ALL {
            let base = match kind.parent() {
                Some(parent) => exceptions[parent.index()].clone(),
                None => object.clone(),
            };
            exceptions.push(native_class(kind.name(), TypeTag::Exception, vec![base]));
        }

        let types = Self {
            type_: derive("type", TypeTag::Type),
            none_type: derive("NoneType", TypeTag::NoneType),
            bool_,
            int,
            float: derive("float", TypeTag::Float),
            str_: derive("str", TypeTag::Str),
            list: derive("list", TypeTag::List),
            tuple: derive("tuple", TypeTag::Tuple),
            dict: derive("dict", TypeTag::Dict),
            set: derive("set", TypeTag::Set),
            range: derive("range", TypeTag::Range),
            slice: derive("slice", TypeTag::Slice),
            function: derive("function", TypeTag::Function),
            builtin_function: derive("builtin_function_or_method", TypeTag::BuiltinFunction),
            method: derive("method", TypeTag::Method),
            staticmethod: derive("staticmethod", TypeTag::StaticMethod),
            classmethod: derive("classmethod", TypeTag::ClassMethod),
            property: derive("property", TypeTag::Property),
            super_: derive("super", TypeTag::Super),
            code: derive("code", TypeTag::Code),
            module: derive("module", TypeTag::Module),
            generator: derive("generator", TypeTag::Generator),
            coroutine: derive("coroutine", TypeTag::Coroutine),
            iterator: derive("iterator", TypeTag::Iterator),
            ellipsis: derive("ellipsis", TypeTag::Ellipsis),
            not_implemented: derive("NotImplementedType", TypeTag::NotImplementedType),
            lock: derive("lock", TypeTag::Lock),
            thread: derive("thread", TypeTag::Thread),
            exceptions,
            object,
        };
        types.install_methods();
        types
    }

    fn install_methods(&self) {
        self.install(&self.object, object::OBJECT_METHODS);
        self.install(&self.type_, object::TYPE_METHODS);
        self.install(&self.property, object::PROPERTY_METHODS);
        self.install(&self.int, number::INT_METHODS);
        self.install(&self.float, number::FLOAT_METHODS);
        self.install(&self.str_, string::STR_METHODS);
        self.install(&self.list, list::LIST_METHODS);
        self.install(&self.tuple, list::TUPLE_METHODS);
        self.install(&self.range, list::RANGE_METHODS);
        self.install(&self.dict, dict::DICT_METHODS);
        self.install(&self.set, dict::SET_METHODS);
        self.install(&self.generator, function::GENERATOR_METHODS);
        self.install(&self.coroutine, function::COROUTINE_METHODS);
        self.install(&self.iterator, function::ITERATOR_METHODS);
        self.install(&self.lock, modules::LOCK_METHODS);
        self.install(&self.thread, modules::THREAD_METHODS);
        self.install(self.exception(ExceptionKind::BaseException), error::EXCEPTION_METHODS);

        for (name, func) in dict::DICT_CLASS_METHODS {
            let function = self.native(*name, *func);
            let wrapped = Object::new(ObjectKind::ClassMethod(function), self.classmethod.clone());
            self.dict.write().attrs.insert((*name).to_string(), Value::Object(ObjRef::new(wrapped)));
        }
        for (name, func) in string::STR_STATIC_METHODS {
            let function = self.native(*name, *func);
            let wrapped = Object::new(ObjectKind::StaticMethod(function), self.staticmethod.clone());
            self.str_.write().attrs.insert((*name).to_string(), Value::Object(ObjRef::new(wrapped)));
        }
    }

    fn install(&self, class: &ObjRef, methods: MethodTable) {
        let mut guard = class.write();
        for (name, func) in methods {
            guard.attrs.insert((*name).to_string(), self.native(*name, *func));
        }
    }

    /// A native function object.
    pub fn native(&self, name: &'static str, func: NativeFn) -> Value {
        let native = NativeFunction { name, func };
        Value::Object(ObjRef::new(Object::new(
            ObjectKind::Native(native),
            self.builtin_function.clone(),
        )))
    }

    /// The class of builtin exception `kind`.
    pub fn exception(&self, kind: ExceptionKind) -> &ObjRef {
        &self.exceptions[kind.index()]
    }

    /// The builtin classes exposed by name in the builtins namespace.
    pub fn named(&self) -> Vec<(&'static str, ObjRef)> {
        let mut named = vec![
            ("object", self.object.clone()),
            ("type", self.type_.clone()),
            ("bool", self.bool_.clone()),
            ("int", self.int.clone()),
            ("float", self.float.clone()),
            ("str", self.str_.clone()),
            ("list", self.list.clone()),
            ("tuple", self.tuple.clone()),
            ("dict", self.dict.clone()),
            ("set", self.set.clone()),
            ("range", self.range.clone()),
            ("slice", self.slice.clone()),
            ("staticmethod", self.staticmethod.clone()),
            ("classmethod", self.classmethod.clone()),
            ("property", self.property.clone()),
            ("super", self.super_.clone()),
        ];
        for kind in ExceptionKind::ALL {
            named.push((kind.name(), self.exception(kind).clone()));
        }
        named
    }
}

impl Default for BuiltinTypes {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Checks the positional argument count of a builtin function.
pub(crate) fn check_arity(vm: &mut Vm, args: &Args, name: &str, min: usize, max: usize) -> VmResult<()> {
    arity_error(vm, args.positional.len(), name, min, max)
}

/// Checks the positional argument count of a builtin method, not counting
/// the receiver.
pub(crate) fn check_method_arity(vm: &mut Vm, args: &Args, name: &str, min: usize, max: usize) -> VmResult<()> {
    arity_error(vm, args.positional.len().saturating_sub(1), name, min, max)
}

fn arity_error(vm: &mut Vm, given: usize, name: &str, min: usize, max: usize) -> VmResult<()> {
    if (min..=max).contains(&given) {
        return Ok(());
    }
    let message = if min == max && min == 0 {
        format!("{}() takes no arguments ({} given)", name, given)
    } else if min == max {
        format!("{}() takes exactly {} argument{} ({} given)", name, min, plural(min), given)
    } else if given < min {
        format!("{} expected at least {} argument{}, got {}", name, min, plural(min), given)
    } else {
        format!("{} expected at most {} argument{}, got {}", name, max, plural(max), given)
    };
    Err(vm.type_error(message))
}

/// The receiver of a builtin method.
pub(crate) fn receiver(vm: &mut Vm, args: &Args, name: &str) -> VmResult<Value> {
    match args.positional.first() {
        Some(value) => Ok(value.clone()),
        None => Err(vm.type_error(format!("descriptor '{}' needs an argument", name))),
    }
}

/// Rejects keyword arguments for builtins that take none.
pub(crate) fn no_keywords(vm: &mut Vm, args: &Args, name: &str) -> VmResult<()> {
    if args.keywords.is_empty() {
        Ok(())
    } else {
        Err(vm.type_error(format!("{}() takes no keyword arguments", name)))
    }
}

/// Removes the keywords in `allowed` from `args` and rejects any other.
pub(crate) fn take_keywords(
    vm: &mut Vm,
    args: &mut Args,
    name: &str,
    allowed: &[&str],
) -> VmResult<Vec<Option<Value>>> {
    let taken = allowed.iter().map(|k| args.take_keyword(k)).collect();
    if let Some((unexpected, _)) = args.keywords.first() {
        let unexpected = unexpected.clone();
        return Err(vm.type_error(format!("'{}' is an invalid keyword argument for {}()", unexpected, name)));
    }
    Ok(taken)
}

/// Positional argument `index`, or `default`.
pub(crate) fn arg_or(args: &Args, index: usize, default: Value) -> Value {
    args.positional.get(index).cloned().unwrap_or(default)
}

/// A `str` argument.
pub(crate) fn str_arg(vm: &mut Vm, value: &Value, name: &str) -> VmResult<std::sync::Arc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => {
            let type_name = vm.type_name(other);
            Err(vm.type_error(format!("{}() argument must be str, not {}", name, type_name)))
        }
    }
}

/// Raises the `TypeError` a method gets when called on the wrong type.
pub(crate) fn wrong_receiver(vm: &mut Vm, method: &str, expected: &str, got: &Value) -> crate::vm::VmError {
    let type_name = vm.type_name(got);
    vm.type_error(format!(
        "descriptor '{}' requires a '{}' object but received a '{}'",
        method, expected, type_name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::PrototypeModel;

    #[test]
    fn test_bool_derives_from_int() {
        let types = BuiltinTypes::new();
        assert!(PrototypeModel::is_subclass(&types.bool_, &types.int));
        assert!(PrototypeModel::is_subclass(&types.int, &types.object));
    }

    #[test]
    fn test_exception_classes_follow_hierarchy() {
        let types = BuiltinTypes::new();
        let key_error = types.exception(ExceptionKind::KeyError);
        assert!(PrototypeModel::is_subclass(key_error, types.exception(ExceptionKind::LookupError)));
        assert!(PrototypeModel::is_subclass(key_error, types.exception(ExceptionKind::Exception)));
        let exit = types.exception(ExceptionKind::GeneratorExit);
        assert!(!PrototypeModel::is_subclass(exit, types.exception(ExceptionKind::Exception)));
    }

    #[test]
    fn test_methods_installed() {
        let types = BuiltinTypes::new();
        assert!(PrototypeModel::lookup(&types.list, "append").is_some());
        assert!(PrototypeModel::lookup(&types.dict, "fromkeys").is_some());
        assert!(PrototypeModel::lookup(&types.list, "__getitem__").is_none());
    }

    #[test]
    fn test_arity_messages() {
        let mut vm = Vm::new(crate::config::EngineConfig::default());
        let args = Args::new(vec![Value::Int(1), Value::Int(2)]);
        match check_arity(&mut vm, &args, "len", 1, 1) {
            Err(crate::vm::VmError::Exception(exc)) => assert_eq!(
                vm.describe_exception(&exc),
                "TypeError: len() takes exactly 1 argument (2 given)"
            ),
            _ => panic!("expected TypeError"),
        }
    }
}
