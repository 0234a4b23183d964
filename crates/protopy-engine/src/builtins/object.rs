//! `object`, `type` and the descriptor classes.
//!
//! [`construct`] is where calling any builtin class ends up: the VM hands
//! every tagged class to it, and it dispatches on the tag to the
//! constructor in the module that owns the type.

use super::{check_arity, check_method_arity, dict, list, modules, number, receiver, string, take_keywords};
use super::MethodTable;
use crate::runtime::object::{ClassData, Property, SuperProxy};
use crate::runtime::{Args, ObjRef, Object, ObjectKind, PrototypeModel, TypeTag, Value};
use crate::vm::{class_name, class_tag, Vm, VmResult};

// ============================================================================
// Construction
// ============================================================================

/// `class(*args)` for a builtin class.
pub fn construct(vm: &mut Vm, class: &ObjRef, args: Args) -> VmResult<Value> {
    let tag = match class_tag(class) {
        Some(tag) => tag,
        None => return vm.call(&Value::Object(class.clone()), args),
    };
    match tag {
        TypeTag::Object => {
            if !args.is_empty() || !args.keywords.is_empty() {
                return Err(vm.type_error("object() takes no arguments"));
            }
            Ok(vm.alloc(ObjectKind::Instance, class))
        }
        TypeTag::Type => type_new(vm, args),
        TypeTag::NoneType => singleton(vm, args, "NoneType", Value::None),
        TypeTag::Ellipsis => singleton(vm, args, "ellipsis", Value::Ellipsis),
        TypeTag::NotImplementedType => singleton(vm, args, "NotImplementedType", Value::NotImplemented),
        TypeTag::Bool => number::bool_new(vm, args),
        TypeTag::Int => number::int_new(vm, args),
        TypeTag::Float => number::float_new(vm, args),
        TypeTag::Str => string::str_new(vm, args),
        TypeTag::List => list::list_new(vm, args),
        TypeTag::Tuple => list::tuple_new(vm, args),
        TypeTag::Range => list::range_new(vm, args),
        TypeTag::Slice => list::slice_new(vm, args),
        TypeTag::Dict => dict::dict_new(vm, args),
        TypeTag::Set => dict::set_new(vm, args),
        TypeTag::StaticMethod => {
            check_arity(vm, &args, "staticmethod", 1, 1)?;
            Ok(vm.alloc(ObjectKind::StaticMethod(args.positional[0].clone()), class))
        }
        TypeTag::ClassMethod => {
            check_arity(vm, &args, "classmethod", 1, 1)?;
            Ok(vm.alloc(ObjectKind::ClassMethod(args.positional[0].clone()), class))
        }
        TypeTag::Property => property_new(vm, args),
        TypeTag::Super => super_new(vm, args),
        TypeTag::Exception => {
            if !args.keywords.is_empty() {
                let name = class_name(class);
                return Err(vm.type_error(format!("{}() takes no keyword arguments", name)));
            }
            Ok(vm.exception_from_args(class, args.positional))
        }
        TypeTag::Lock => modules::allocate_lock(vm, args),
        _ => {
            let name = class_name(class);
            Err(vm.type_error(format!("cannot create '{}' instances", name)))
        }
    }
}

fn singleton(vm: &mut Vm, args: Args, name: &str, value: Value) -> VmResult<Value> {
    if args.is_empty() && args.keywords.is_empty() {
        Ok(value)
    } else {
        Err(vm.type_error(format!("{} takes no arguments", name)))
    }
}

/// `type(obj)` or `type(name, bases, dict)`.
fn type_new(vm: &mut Vm, args: Args) -> VmResult<Value> {
    match args.positional.as_slice() {
        [obj] => Ok(Value::Object(vm.type_of(obj))),
        [name, bases, namespace] => {
            let name = match name {
                Value::Str(s) => s.to_string(),
                other => {
                    let type_name = vm.type_name(other);
                    return Err(vm.type_error(format!("type() argument 1 must be str, not {}", type_name)));
                }
            };
            let mut base_classes = Vec::new();
            for base in vm.collect(bases)? {
                match base {
                    Value::Object(obj) if vm.is_class_object(&obj) => base_classes.push(obj),
                    other => {
                        let type_name = vm.type_name(&other);
                        return Err(vm.type_error(format!("bases must be types, not '{}'", type_name)));
                    }
                }
            }
            if base_classes.is_empty() {
                base_classes.push(vm.types().object.clone());
            }
            let entries = vm.mapping_items(namespace)?;
            let data = ClassData {
                name: name.clone(),
                qualname: name,
                tag: None,
            };
            let class = ObjRef::new(Object::class(data, base_classes));
            for (key, value) in entries {
                match key {
                    Value::Str(key) => {
                        class.write().attrs.insert(key.to_string(), value);
                    }
                    other => {
                        let type_name = vm.type_name(&other);
                        return Err(vm.type_error(format!("type() attribute names must be str, not {}", type_name)));
                    }
                }
            }
            Ok(Value::Object(class))
        }
        _ => Err(vm.type_error("type() takes 1 or 3 arguments")),
    }
}

/// `property(fget=None, fset=None, fdel=None, doc=None)`. Deleters and
/// docstrings are accepted and ignored.
fn property_new(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let keywords = take_keywords(vm, &mut args, "property", &["fget", "fset", "fdel", "doc"])?;
    check_arity(vm, &args, "property", 0, 4)?;
    let pick = |i: usize| {
        args.positional
            .get(i)
            .cloned()
            .or_else(|| keywords[i].clone())
            .unwrap_or(Value::None)
    };
    let property = Property {
        fget: pick(0),
        fset: pick(1),
    };
    let class = vm.types().property.clone();
    Ok(vm.alloc(ObjectKind::Property(property), &class))
}

/// `super()` and `super(type, obj)`.
///
/// The zero-argument form reads the defining class and first argument of
/// the innermost running function.
fn super_new(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (class, receiver) = match args.positional.as_slice() {
        [] => {
            let scope = vm.scopes.last().cloned();
            let class = match scope.as_ref().and_then(|s| s.class.clone()) {
                Some(class) => class,
                None => return Err(vm.runtime_error("super(): __class__ cell not found")),
            };
            match scope.and_then(|s| s.first_arg) {
                Some(first) => (class, first),
                None => return Err(vm.runtime_error("super(): no arguments")),
            }
        }
        [Value::Object(class), receiver] if vm.is_class_object(class) => {
            let compatible = match receiver {
                Value::Object(r) if vm.is_class_object(r) => PrototypeModel::is_subclass(r, class),
                other => PrototypeModel::is_subclass(&vm.type_of(other), class),
            };
            if !compatible {
                return Err(vm.type_error("super(type, obj): obj must be an instance or subtype of type"));
            }
            (class.clone(), receiver.clone())
        }
        [first, _] => {
            let type_name = vm.type_name(first);
            return Err(vm.type_error(format!("super() argument 1 must be a type, not {}", type_name)));
        }
        _ => return Err(vm.type_error("super() takes 0 or 2 arguments")),
    };
    let proxy = SuperProxy { class, receiver };
    let super_class = vm.types().super_.clone();
    Ok(vm.alloc(ObjectKind::Super(proxy), &super_class))
}

// ============================================================================
// object
// ============================================================================

/// Methods of `object`, inherited by every class.
pub const OBJECT_METHODS: MethodTable = &[
    ("__init__", object_init),
    ("__new__", object_new),
    ("__repr__", object_repr),
    ("__str__", object_str),
];

/// `object.__init__(self, *args)`: extra arguments are an error unless the
/// class customises construction.
pub fn object_init(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let this = receiver(vm, &args, "__init__")?;
    if args.positional.len() == 1 && args.keywords.is_empty() {
        return Ok(Value::None);
    }
    let class = vm.type_of(&this);
    let object = vm.types().object.clone();
    let overridden = |name: &str| {
        PrototypeModel::lookup(&class, name).is_some_and(|(_, owner)| !owner.ptr_eq(&object))
    };
    if overridden("__init__") {
        return Err(vm.type_error("object.__init__() takes exactly one argument (the instance to initialize)"));
    }
    let native_base = PrototypeModel::linearize(&class)
        .iter()
        .filter_map(class_tag)
        .any(|tag| tag != TypeTag::Object);
    if overridden("__new__") || native_base {
        return Ok(Value::None);
    }
    Err(vm.type_error(format!("{}() takes no arguments", class_name(&class))))
}

/// `object.__new__(cls, *args)`
pub fn object_new(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let cls = receiver(vm, &args, "__new__")?;
    match &cls {
        Value::Object(class) if vm.is_class_object(class) => match class_tag(class) {
            Some(TypeTag::Object) | None => Ok(vm.allocate_instance(class, &args.positional[1..])),
            Some(_) => construct(vm, class, Args::new(args.positional[1..].to_vec())),
        },
        other => {
            let type_name = vm.type_name(other);
            Err(vm.type_error(format!("object.__new__(X): X is not a type object ({})", type_name)))
        }
    }
}

/// `object.__repr__(self)`: `<module.Name object at 0x...>`
pub fn object_repr(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "__repr__", 0, 0)?;
    let this = receiver(vm, &args, "__repr__")?;
    let text = match &this {
        Value::Object(obj) => vm.repr_object(obj)?,
        other => vm.repr(other)?,
    };
    Ok(Value::from(text))
}

/// `object.__str__(self)`: `repr(self)`.
pub fn object_str(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "__str__", 0, 0)?;
    let this = receiver(vm, &args, "__str__")?;
    vm.repr(&this).map(Value::from)
}

// ============================================================================
// type
// ============================================================================

/// Methods classes get from `type`.
pub const TYPE_METHODS: MethodTable = &[("mro", type_mro)];

/// `cls.mro()`
pub fn type_mro(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "mro", 0, 0)?;
    match receiver(vm, &args, "mro")? {
        Value::Object(class) if vm.is_class_object(&class) => {
            let order = PrototypeModel::linearize(&class).into_iter().map(Value::Object).collect();
            Ok(vm.new_list(order))
        }
        other => Err(super::wrong_receiver(vm, "mro", "type", &other)),
    }
}

// ============================================================================
// property
// ============================================================================

/// Methods of `property`.
pub const PROPERTY_METHODS: MethodTable = &[("getter", property_getter), ("setter", property_setter)];

fn property_of(vm: &mut Vm, this: &Value, method: &str) -> VmResult<Property> {
    let found = match this {
        Value::Object(obj) => match &obj.read().kind {
            ObjectKind::Property(property) => Some(property.clone()),
            _ => None,
        },
        _ => None,
    };
    match found {
        Some(property) => Ok(property),
        None => Err(super::wrong_receiver(vm, method, "property", this)),
    }
}

/// `prop.getter(fget)`: a copy with a new getter.
pub fn property_getter(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "getter", 1, 1)?;
    let this = receiver(vm, &args, "getter")?;
    let mut property = property_of(vm, &this, "getter")?;
    property.fget = args.positional[1].clone();
    let class = vm.type_of(&this);
    Ok(vm.alloc(ObjectKind::Property(property), &class))
}

/// `prop.setter(fset)`: a copy with a new setter.
pub fn property_setter(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "setter", 1, 1)?;
    let this = receiver(vm, &args, "setter")?;
    let mut property = property_of(vm, &this, "setter")?;
    property.fset = args.positional[1].clone();
    let class = vm.type_of(&this);
    Ok(vm.alloc(ObjectKind::Property(property), &class))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::vm::VmError;

    fn describe(vm: &mut Vm, result: VmResult<Value>) -> String {
        match result {
            Err(VmError::Exception(exc)) => vm.describe_exception(&exc),
            Ok(value) => format!("ok: {}", vm.repr(&value).unwrap_or_default()),
            Err(err) => err.to_string(),
        }
    }

    #[test]
    fn test_type_of_value() {
        let mut vm = Vm::new(EngineConfig::default());
        let class = vm.types().type_.clone();
        let result = construct(&mut vm, &class, Args::new(vec![Value::Int(3)]));
        assert_eq!(describe(&mut vm, result), "ok: <class 'int'>");
    }

    #[test]
    fn test_object_takes_no_arguments() {
        let mut vm = Vm::new(EngineConfig::default());
        let class = vm.types().object.clone();
        let result = construct(&mut vm, &class, Args::new(vec![Value::Int(1)]));
        assert_eq!(describe(&mut vm, result), "TypeError: object() takes no arguments");
    }

    #[test]
    fn test_super_outside_method() {
        let mut vm = Vm::new(EngineConfig::default());
        let class = vm.types().super_.clone();
        let result = construct(&mut vm, &class, Args::default());
        assert_eq!(describe(&mut vm, result), "RuntimeError: super(): __class__ cell not found");
    }

    #[test]
    fn test_function_class_is_not_constructible() {
        let mut vm = Vm::new(EngineConfig::default());
        let class = vm.types().function.clone();
        let result = construct(&mut vm, &class, Args::default());
        assert_eq!(describe(&mut vm, result), "TypeError: cannot create 'function' instances");
    }
}
