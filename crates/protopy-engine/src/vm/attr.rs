//! Attribute access: the [`ObjectModel`] implementation.

use super::{convert, Vm, VmResult};
use crate::runtime::object::{ObjectKind, TypeTag};
use crate::runtime::{Args, ObjRef, ObjectModel, PrototypeModel, Value};

/// How a value found on a class binds to whoever looked it up.
enum Binding {
    Method,
    Class(Value),
    Static(Value),
    Property(Value),
    Plain,
}

fn binding_of(value: &Value) -> Binding {
    match value {
        Value::Object(obj) => match &obj.read().kind {
            ObjectKind::Function(_) | ObjectKind::Native(_) => Binding::Method,
            ObjectKind::ClassMethod(inner) => Binding::Class(inner.clone()),
            ObjectKind::StaticMethod(inner) => Binding::Static(inner.clone()),
            ObjectKind::Property(property) => Binding::Property(property.fget.clone()),
            _ => Binding::Plain,
        },
        _ => Binding::Plain,
    }
}

/// The builtin tag of a class, `None` for user-defined classes.
pub(crate) fn class_tag(class: &ObjRef) -> Option<TypeTag> {
    match &class.read().kind {
        ObjectKind::Class(data) => data.tag,
        _ => None,
    }
}

impl Vm {
    /// The class of `value`.
    pub fn type_of(&self, value: &Value) -> ObjRef {
        let types = &self.types;
        match value {
            Value::None => types.none_type.clone(),
            Value::Bool(_) => types.bool_.clone(),
            Value::Int(_) | Value::Long(_) => types.int.clone(),
            Value::Float(_) => types.float.clone(),
            Value::Str(_) => types.str_.clone(),
            Value::Ellipsis => types.ellipsis.clone(),
            Value::NotImplemented => types.not_implemented.clone(),
            Value::Object(obj) => {
                let guard = obj.read();
                match guard.class_ref() {
                    Some(class) => class.clone(),
                    None => types.type_.clone(),
                }
            }
        }
    }

    /// The name of `value`'s class, as error messages show it.
    pub fn type_name(&self, value: &Value) -> String {
        convert::class_name(&self.type_of(value))
    }

    /// Returns true if `obj` is a class.
    pub fn is_class_object(&self, obj: &ObjRef) -> bool {
        PrototypeModel::is_class(obj)
    }

    /// The user-defined class of `value`, if it has one.
    pub(crate) fn user_class(&self, value: &Value) -> Option<ObjRef> {
        match value {
            Value::Object(obj) => {
                let class = obj.read().class_ref().cloned()?;
                class_tag(&class).is_none().then_some(class)
            }
            _ => None,
        }
    }

    /// Looks `name` up on `value`'s class only (not the instance), bound to
    /// `value`. Operators and protocols dispatch through this.
    pub(crate) fn special_method(&mut self, value: &Value, name: &str) -> VmResult<Option<Value>> {
        let class = self.type_of(value);
        match PrototypeModel::lookup(&class, name) {
            Some((found, _)) => self.bind_to_instance(found, value).map(Some),
            None => Ok(None),
        }
    }

    /// Calls the special method `name` if `value`'s class defines it.
    pub(crate) fn call_special(&mut self, value: &Value, name: &str, args: Vec<Value>) -> VmResult<Option<Value>> {
        match self.special_method(value, name)? {
            Some(method) => self.call(&method, Args::new(args)).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn bind_to_instance(&mut self, value: Value, receiver: &Value) -> VmResult<Value> {
        match binding_of(&value) {
            Binding::Method => Ok(self.new_bound_method(receiver.clone(), value)),
            Binding::Class(inner) => {
                let class = Value::Object(self.type_of(receiver));
                Ok(self.new_bound_method(class, inner))
            }
            Binding::Static(inner) => Ok(inner),
            Binding::Property(fget) => {
                if fget.is_none() {
                    return Err(self.attribute_error("unreadable attribute"));
                }
                self.call(&fget, Args::new(vec![receiver.clone()]))
            }
            Binding::Plain => Ok(value),
        }
    }

    pub(crate) fn bind_to_class(&mut self, value: Value, class: &ObjRef) -> Value {
        match binding_of(&value) {
            Binding::Class(inner) => self.new_bound_method(Value::Object(class.clone()), inner),
            Binding::Static(inner) => inner,
            _ => value,
        }
    }

    /// `getattr(obj, name, None)` without the default: `Ok(None)` when the
    /// attribute does not exist.
    pub fn lookup_attr(&mut self, obj: &Value, name: &str) -> VmResult<Option<Value>> {
        if name == "__class__" {
            return Ok(Some(Value::Object(self.type_of(obj))));
        }
        if let Value::Object(o) = obj {
            if let Some(found) = self.intrinsic_attr(o, name) {
                return Ok(Some(found));
            }
            if self.is_class_object(o) {
                if let Some((found, _)) = PrototypeModel::lookup(o, name) {
                    return Ok(Some(self.bind_to_class(found, o)));
                }
                let meta = self.types.type_.clone();
                return match PrototypeModel::lookup(&meta, name) {
                    Some((found, _)) => self.bind_to_instance(found, obj).map(Some),
                    None => Ok(None),
                };
            }
            let proxy = match &o.read().kind {
                ObjectKind::Super(proxy) => Some(proxy.clone()),
                _ => None,
            };
            if let Some(proxy) = proxy {
                let receiver_class = match &proxy.receiver {
                    Value::Object(r) if self.is_class_object(r) => Some(r.clone()),
                    _ => None,
                };
                let start = receiver_class.clone().unwrap_or_else(|| self.type_of(&proxy.receiver));
                return match PrototypeModel::lookup_after(&start, &proxy.class, name) {
                    Some((found, _)) => match receiver_class {
                        Some(class) => Ok(Some(self.bind_to_class(found, &class))),
                        None => self.bind_to_instance(found, &proxy.receiver).map(Some),
                    },
                    None => Ok(None),
                };
            }
        }

        let class = self.type_of(obj);
        let found = PrototypeModel::lookup(&class, name);
        if let Some((value, _)) = &found {
            if matches!(binding_of(value), Binding::Property(_)) {
                return self.bind_to_instance(value.clone(), obj).map(Some);
            }
        }
        if let Value::Object(o) = obj {
            let own = o.read().attrs.get(name).cloned();
            if own.is_some() {
                return Ok(own);
            }
        }
        if let Some((value, _)) = found {
            return self.bind_to_instance(value, obj).map(Some);
        }
        if name != "__getattr__" {
            if let Some(getattr) = self.special_method(obj, "__getattr__")? {
                return self.call(&getattr, Args::new(vec![Value::from(name)])).map(Some);
            }
        }
        Ok(None)
    }

    /// Attributes computed from an object's native state.
    fn intrinsic_attr(&mut self, obj: &ObjRef, name: &str) -> Option<Value> {
        let guard = obj.read();
        let value = match (&guard.kind, name) {
            (ObjectKind::Class(data), "__name__") => Value::from(data.name.as_str()),
            (ObjectKind::Class(data), "__qualname__") => Value::from(data.qualname.as_str()),
            (ObjectKind::Class(_), "__bases__") => {
                let bases = guard.prototypes.iter().cloned().map(Value::Object).collect();
                return Some(self.new_tuple(bases));
            }
            (ObjectKind::Class(_), "__mro__") => {
                let order = PrototypeModel::linearize(obj).into_iter().map(Value::Object).collect();
                return Some(self.new_tuple(order));
            }
            (ObjectKind::Class(_), "__dict__") | (ObjectKind::Instance, "__dict__") => {
                let mut entries: Vec<(String, Value)> =
                    guard.attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                return Some(self.dict_from_entries(entries));
            }
            (ObjectKind::Module(module), "__dict__") => {
                let entries = module.namespace.snapshot();
                return Some(self.dict_from_entries(entries));
            }
            (ObjectKind::Module(module), _) => return module.namespace.get(name),
            (ObjectKind::Function(function), _) => match name {
                "__name__" => Value::from(function.name.as_str()),
                "__qualname__" => Value::from(function.qualname.as_str()),
                "__module__" => function.globals.get("__name__").unwrap_or(Value::None),
                "__code__" => {
                    let code = function.code.clone();
                    return Some(self.alloc(ObjectKind::Code(code), &self.types.code));
                }
                "__defaults__" => {
                    let defaults = function.defaults.clone();
                    return Some(if defaults.is_empty() {
                        Value::None
                    } else {
                        self.new_tuple(defaults)
                    });
                }
                "__doc__" => guard.attrs.get(name).cloned().unwrap_or(Value::None),
                _ => return None,
            },
            (ObjectKind::Native(native), "__name__" | "__qualname__") => Value::from(native.name),
            (ObjectKind::BoundMethod(bound), "__self__") => bound.receiver.clone(),
            (ObjectKind::BoundMethod(bound), "__func__") => bound.function.clone(),
            (ObjectKind::BoundMethod(bound), "__name__" | "__qualname__") => {
                let function = bound.function.clone();
                return function.as_object().and_then(|f| self.intrinsic_attr(f, name));
            }
            (ObjectKind::StaticMethod(inner) | ObjectKind::ClassMethod(inner), "__func__") => inner.clone(),
            (ObjectKind::Property(property), "fget") => property.fget.clone(),
            (ObjectKind::Property(property), "fset") => property.fset.clone(),
            (ObjectKind::Generator(generator), "__name__") => Value::from(generator.name.as_str()),
            (ObjectKind::Generator(generator), "__qualname__") => Value::from(generator.qualname.as_str()),
            (ObjectKind::Range(range), "start") => Value::Int(range.start),
            (ObjectKind::Range(range), "stop") => Value::Int(range.stop),
            (ObjectKind::Range(range), "step") => Value::Int(range.step),
            (ObjectKind::Slice(slice), "start") => slice.start.clone(),
            (ObjectKind::Slice(slice), "stop") => slice.stop.clone(),
            (ObjectKind::Slice(slice), "step") => slice.step.clone(),
            (ObjectKind::Code(code), "co_name") => Value::from(code.name.as_str()),
            (ObjectKind::Code(code), "co_argcount") => Value::Int(code.argcount as i64),
            (ObjectKind::Code(code), "co_filename") => Value::Str(code.filename.clone()),
            _ => return None,
        };
        Some(value)
    }

    /// `del obj.name`.
    pub fn del_attr(&mut self, obj: &Value, name: &str) -> VmResult<()> {
        let removed = match obj {
            Value::Object(o) => {
                let namespace = match &o.read().kind {
                    ObjectKind::Module(module) => Some(module.namespace.clone()),
                    _ => None,
                };
                match namespace {
                    Some(namespace) => namespace.remove(name),
                    None => o.write().attrs.remove(name),
                }
            }
            _ => None,
        };
        match removed {
            Some(_) => Ok(()),
            None => {
                let type_name = self.type_name(obj);
                Err(self.attribute_error(format!("'{}' object has no attribute '{}'", type_name, name)))
            }
        }
    }

    /// `hasattr(obj, name)`: true unless lookup raises `AttributeError` or
    /// finds nothing.
    pub fn has_attr(&mut self, obj: &Value, name: &str) -> VmResult<bool> {
        match self.lookup_attr(obj, name) {
            Ok(found) => Ok(found.is_some()),
            Err(super::VmError::Exception(exc)) if self.exception_is(&exc, crate::builtins::ExceptionKind::AttributeError) => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

impl ObjectModel for Vm {
    fn get_attr(&mut self, obj: &Value, name: &str) -> VmResult<Value> {
        match self.lookup_attr(obj, name)? {
            Some(value) => Ok(value),
            None => {
                let message = match obj {
                    Value::Object(o) if self.is_class_object(o) => {
                        format!("type object '{}' has no attribute '{}'", convert::class_name(o), name)
                    }
                    Value::Object(o) if matches!(o.read().kind, ObjectKind::Module(_)) => {
                        let module = match &o.read().kind {
                            ObjectKind::Module(module) => module.name.clone(),
                            _ => String::new(),
                        };
                        format!("module '{}' has no attribute '{}'", module, name)
                    }
                    _ => format!("'{}' object has no attribute '{}'", self.type_name(obj), name),
                };
                Err(self.attribute_error(message))
            }
        }
    }

    fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> VmResult<()> {
        let o = match obj {
            Value::Object(o) => o.clone(),
            _ => {
                let type_name = self.type_name(obj);
                return Err(self.attribute_error(format!("'{}' object has no attribute '{}'", type_name, name)));
            }
        };
        let (is_class, module) = {
            let guard = o.read();
            match &guard.kind {
                ObjectKind::Class(_) => (true, None),
                ObjectKind::Module(module) => (false, Some(module.namespace.clone())),
                _ => (false, None),
            }
        };
        if let Some(namespace) = module {
            namespace.set(name, value);
            return Ok(());
        }
        if is_class {
            o.write().attrs.insert(name.to_string(), value);
            return Ok(());
        }

        let class = self.type_of(obj);
        if let Some((found, _)) = PrototypeModel::lookup(&class, name) {
            let fset = match &found {
                Value::Object(f) => match &f.read().kind {
                    ObjectKind::Property(property) => Some(property.fset.clone()),
                    _ => None,
                },
                _ => None,
            };
            if let Some(fset) = fset {
                if fset.is_none() {
                    return Err(self.attribute_error("can't set attribute"));
                }
                self.call(&fset, Args::new(vec![obj.clone(), value]))?;
                return Ok(());
            }
        }
        let accepts =
            class_tag(&class).is_none() || matches!(o.read().kind, ObjectKind::Function(_) | ObjectKind::Instance);
        if !accepts {
            let type_name = convert::class_name(&class);
            return Err(self.attribute_error(format!("'{}' object has no attribute '{}'", type_name, name)));
        }
        o.write().attrs.insert(name.to_string(), value);
        Ok(())
    }

    fn call_method(&mut self, obj: &Value, name: &str, args: Args) -> VmResult<Value> {
        let method = self.get_attr(obj, name)?;
        self.call(&method, args)
    }

    fn is_instance(&mut self, obj: &Value, class: &ObjRef) -> bool {
        PrototypeModel::is_subclass(&self.type_of(obj), class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_type_of_scalars() {
        let vm = Vm::new(EngineConfig::default());
        assert_eq!(vm.type_name(&Value::Int(1)), "int");
        assert_eq!(vm.type_name(&Value::Bool(true)), "bool");
        assert_eq!(vm.type_name(&Value::None), "NoneType");
        assert_eq!(vm.type_name(&vm.new_list(vec![])), "list");
    }

    #[test]
    fn test_builtin_method_binds_receiver() {
        let mut vm = Vm::new(EngineConfig::default());
        let list = vm.new_list(vec![]);
        vm.call_method(&list, "append", Args::new(vec![Value::Int(7)])).unwrap();
        let len = vm.len(&list).unwrap();
        assert_eq!(len, 1);
    }

    #[test]
    fn test_missing_attribute_message() {
        let mut vm = Vm::new(EngineConfig::default());
        match vm.get_attr(&Value::Int(1), "nope") {
            Err(super::super::VmError::Exception(exc)) => {
                assert_eq!(
                    vm.describe_exception(&exc),
                    "AttributeError: 'int' object has no attribute 'nope'"
                );
            }
            _ => panic!("expected AttributeError"),
        }
    }

    #[test]
    fn test_bool_is_instance_of_int() {
        let mut vm = Vm::new(EngineConfig::default());
        let int = vm.types.int.clone();
        assert!(vm.is_instance(&Value::Bool(true), &int));
    }
}
