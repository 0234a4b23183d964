//! Conversions every protocol needs: `repr`, `str`, truth, hashing, `len`.

use super::attr::class_tag;
use super::{Vm, VmResult};
use crate::builtins::{format, ExceptionKind};
use crate::runtime::object::{ObjectKind, TypeTag};
use crate::runtime::value::format_float;
use crate::runtime::{DictKey, ObjRef, Value};

/// A class's `__name__`.
pub(crate) fn class_name(class: &ObjRef) -> String {
    match &class.read().kind {
        ObjectKind::Class(data) => data.name.clone(),
        other => other.kind_name().to_string(),
    }
}

/// `repr()` of a string: single quotes unless the text contains one and no
/// double quote.
pub fn quote_str(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

impl Vm {
    /// `repr(value)`.
    pub fn repr(&mut self, value: &Value) -> VmResult<String> {
        match value {
            Value::None => Ok("None".into()),
            Value::Bool(true) => Ok("True".into()),
            Value::Bool(false) => Ok("False".into()),
            Value::Int(n) => Ok(n.to_string()),
            Value::Long(n) => Ok(n.to_string()),
            Value::Float(x) => Ok(format_float(*x)),
            Value::Str(s) => Ok(quote_str(s)),
            Value::Ellipsis => Ok("Ellipsis".into()),
            Value::NotImplemented => Ok("NotImplemented".into()),
            Value::Object(obj) => {
                if self.user_class(value).is_some() || self.is_exception_instance(value) {
                    if let Some(result) = self.call_special(value, "__repr__", vec![])? {
                        return self.expect_str(result, "__repr__");
                    }
                }
                self.repr_object(obj)
            }
        }
    }

    /// `str(value)`.
    pub fn to_str(&mut self, value: &Value) -> VmResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Object(_) if self.user_class(value).is_some() || self.is_exception_instance(value) => {
                match self.call_special(value, "__str__", vec![])? {
                    Some(result) => self.expect_str(result, "__str__"),
                    None => self.repr(value),
                }
            }
            _ => self.repr(value),
        }
    }

    fn expect_str(&mut self, result: Value, method: &str) -> VmResult<String> {
        match result {
            Value::Str(s) => Ok(s.to_string()),
            other => {
                let type_name = self.type_name(&other);
                Err(self.type_error(format!("{} returned non-string (type {})", method, type_name)))
            }
        }
    }

    fn is_exception_instance(&self, value: &Value) -> bool {
        match value {
            Value::Object(obj) => {
                let class = obj.read().class_ref().cloned();
                class.is_some_and(|class| class_tag(&class) == Some(TypeTag::Exception))
            }
            _ => false,
        }
    }

    /// The native repr of a heap object.
    pub(crate) fn repr_object(&mut self, obj: &ObjRef) -> VmResult<String> {
        enum Shape {
            Text(String),
            Sequence(&'static str, &'static str, Vec<Value>, bool),
            Mapping(Vec<(Value, Value)>),
            Set(Vec<Value>),
            Bound(String, Value),
            Instance(String, Option<Value>),
            Slice(Value, Value, Value),
            Default(String),
        }

        let shape = {
            let guard = obj.read();
            match &guard.kind {
                ObjectKind::List(items) => Shape::Sequence("[", "]", items.clone(), false),
                ObjectKind::Tuple(items) => Shape::Sequence("(", ")", items.clone(), items.len() == 1),
                ObjectKind::Dict(dict) => Shape::Mapping(dict.items()),
                ObjectKind::Set(set) => Shape::Set(set.values()),
                ObjectKind::Range(range) => Shape::Text(if range.step == 1 {
                    format!("range({}, {})", range.start, range.stop)
                } else {
                    format!("range({}, {}, {})", range.start, range.stop, range.step)
                }),
                ObjectKind::Slice(slice) => {
                    Shape::Slice(slice.start.clone(), slice.stop.clone(), slice.step.clone())
                }
                ObjectKind::Class(data) => {
                    let module = match (data.tag, guard.attrs.get("__module__")) {
                        (None, Some(Value::Str(module))) if &**module != "builtins" => format!("{}.", module),
                        _ => String::new(),
                    };
                    Shape::Text(format!("<class '{}{}'>", module, data.qualname))
                }
                ObjectKind::Function(function) => {
                    Shape::Text(format!("<function {} at {:#x}>", function.qualname, obj.id()))
                }
                ObjectKind::Native(native) => Shape::Text(format!("<built-in function {}>", native.name)),
                ObjectKind::BoundMethod(bound) => {
                    let name = match &bound.function {
                        Value::Object(f) => match &f.read().kind {
                            ObjectKind::Function(function) => function.qualname.clone(),
                            ObjectKind::Native(native) => native.name.to_string(),
                            _ => "?".into(),
                        },
                        _ => "?".into(),
                    };
                    Shape::Bound(name, bound.receiver.clone())
                }
                ObjectKind::Module(module) => Shape::Text(match &module.file {
                    Some(file) => format!("<module '{}' from '{}'>", module.name, file.display()),
                    None => format!("<module '{}' (built-in)>", module.name),
                }),
                ObjectKind::Generator(generator) => Shape::Text(format!(
                    "<{} object {} at {:#x}>",
                    generator.kind.name(),
                    generator.qualname,
                    obj.id()
                )),
                ObjectKind::Code(code) => Shape::Text(format!("<code object {} at {:#x}>", code.name, obj.id())),
                ObjectKind::Lock(lock) => Shape::Text(format!(
                    "<{} _thread.lock object at {:#x}>",
                    if lock.is_locked() { "locked" } else { "unlocked" },
                    obj.id()
                )),
                ObjectKind::Instance => {
                    let name = guard.class_ref().map(class_name).unwrap_or_default();
                    Shape::Instance(name, guard.attrs.get("args").cloned())
                }
                other => Shape::Default(other.kind_name().to_string()),
            }
        };

        match shape {
            Shape::Text(text) => Ok(text),
            Shape::Default(name) => Ok(format!("<{} object at {:#x}>", name, obj.id())),
            Shape::Slice(start, stop, step) => Ok(format!(
                "slice({}, {}, {})",
                self.repr(&start)?,
                self.repr(&stop)?,
                self.repr(&step)?
            )),
            Shape::Instance(name, Some(args))
                if self.exception_is(&Value::Object(obj.clone()), ExceptionKind::BaseException) =>
            {
                let items = self.collect(&args)?;
                let parts = items.iter().map(|item| self.repr(item)).collect::<VmResult<Vec<_>>>()?;
                Ok(format!("{}({})", name, parts.join(", ")))
            }
            Shape::Instance(name, _) => Ok(format!("<{} object at {:#x}>", name, obj.id())),
            Shape::Bound(name, receiver) => Ok(format!("<bound method {} of {}>", name, self.repr(&receiver)?)),
            Shape::Sequence(open, close, items, trailing_comma) => self.guarded_repr(obj, "[...]", |vm| {
                let parts = items.iter().map(|item| vm.repr(item)).collect::<VmResult<Vec<_>>>()?;
                let comma = if trailing_comma { "," } else { "" };
                Ok(format!("{}{}{}{}", open, parts.join(", "), comma, close))
            }),
            Shape::Mapping(entries) => self.guarded_repr(obj, "{...}", |vm| {
                let mut parts = Vec::with_capacity(entries.len());
                for (key, value) in &entries {
                    parts.push(format!("{}: {}", vm.repr(key)?, vm.repr(value)?));
                }
                Ok(format!("{{{}}}", parts.join(", ")))
            }),
            Shape::Set(items) => {
                if items.is_empty() {
                    return Ok("set()".into());
                }
                self.guarded_repr(obj, "{...}", |vm| {
                    let parts = items.iter().map(|item| vm.repr(item)).collect::<VmResult<Vec<_>>>()?;
                    Ok(format!("{{{}}}", parts.join(", ")))
                })
            }
        }
    }

    /// Runs `render` unless `obj` is already being rendered further up.
    fn guarded_repr(
        &mut self,
        obj: &ObjRef,
        placeholder: &str,
        render: impl FnOnce(&mut Vm) -> VmResult<String>,
    ) -> VmResult<String> {
        let id = obj.id();
        if self.repr_guard.contains(&id) {
            return Ok(placeholder.to_string());
        }
        self.repr_guard.push(id);
        let result = render(self);
        self.repr_guard.retain(|entry| *entry != id);
        result
    }

    /// Truth value testing: `__bool__`, then `__len__`, then true.
    pub fn truthy(&mut self, value: &Value) -> VmResult<bool> {
        if self.user_class(value).is_some() {
            if let Some(result) = self.call_special(value, "__bool__", vec![])? {
                return match result {
                    Value::Bool(b) => Ok(b),
                    other => {
                        let type_name = self.type_name(&other);
                        Err(self.type_error(format!("__bool__ should return bool, returned {}", type_name)))
                    }
                };
            }
            if let Some(result) = self.call_special(value, "__len__", vec![])? {
                return Ok(result.as_i64().unwrap_or(0) != 0);
            }
        }
        Ok(value.builtin_truth().unwrap_or(true))
    }

    /// The dict/set key of `value`, or `TypeError: unhashable type`.
    pub fn hash_key(&mut self, value: &Value) -> VmResult<DictKey> {
        DictKey::from_value(value).map_err(|unhashable| self.type_error(format!("unhashable type: '{}'", unhashable.0)))
    }

    /// `len(value)`.
    pub fn len(&mut self, value: &Value) -> VmResult<usize> {
        if let Value::Str(s) = value {
            return Ok(s.chars().count());
        }
        if let Value::Object(obj) = value {
            let native = match &obj.read().kind {
                ObjectKind::List(items) | ObjectKind::Tuple(items) => Some(items.len()),
                ObjectKind::Dict(dict) => Some(dict.len()),
                ObjectKind::Set(set) => Some(set.len()),
                ObjectKind::Range(range) => Some(range.len()),
                _ => None,
            };
            if let Some(len) = native {
                return Ok(len);
            }
            if let Some(result) = self.call_special(value, "__len__", vec![])? {
                return match result.as_i64() {
                    Some(n) if n >= 0 => Ok(n as usize),
                    Some(_) => Err(self.value_error("__len__() should return >= 0")),
                    None => {
                        let type_name = self.type_name(&result);
                        Err(self.type_error(format!("'{}' object cannot be interpreted as an integer", type_name)))
                    }
                };
            }
        }
        let type_name = self.type_name(value);
        Err(self.type_error(format!("object of type '{}' has no len()", type_name)))
    }

    /// An integer argument, as `__index__` would produce it.
    pub fn index_value(&mut self, value: &Value) -> VmResult<i64> {
        match value {
            Value::Bool(_) | Value::Int(_) => Ok(value.as_i64().unwrap_or(0)),
            Value::Long(_) => Err(self.error(
                ExceptionKind::OverflowError,
                "Python int too large to convert to C ssize_t",
            )),
            _ => {
                if let Some(result) = self.call_special(value, "__index__", vec![])? {
                    if let Some(n) = result.as_i64() {
                        return Ok(n);
                    }
                }
                let type_name = self.type_name(value);
                Err(self.type_error(format!("'{}' object cannot be interpreted as an integer", type_name)))
            }
        }
    }

    /// `format(value, spec)`.
    pub fn format_value(&mut self, value: &Value, spec: &str) -> VmResult<String> {
        if self.user_class(value).is_some() {
            if let Some(method) = self.special_method(value, "__format__")? {
                let result = self.call(&method, crate::runtime::Args::new(vec![Value::from(spec)]))?;
                return self.expect_str(result, "__format__");
            }
        }
        if spec.is_empty() {
            return self.to_str(value);
        }
        let parsed = match format::FormatSpec::parse(spec) {
            Ok(parsed) => parsed,
            Err(message) => return Err(self.value_error(message)),
        };
        let rendered = match value {
            Value::Str(s) => format::format_str(s, &parsed),
            Value::Float(x) => format::format_float(*x, &parsed),
            Value::Bool(_) | Value::Int(_) | Value::Long(_) => {
                let n = value.to_bigint().unwrap_or_default();
                format::format_int(&n, &parsed)
            }
            _ => {
                let text = self.to_str(value)?;
                format::format_str(&text, &parsed)
            }
        };
        rendered.map_err(|message| self.value_error(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_quote_str() {
        assert_eq!(quote_str("abc"), "'abc'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
        assert_eq!(quote_str("'\""), "'\\'\"'");
    }

    #[test]
    fn test_container_repr() {
        let mut vm = Vm::new(EngineConfig::default());
        let one = vm.new_tuple(vec![Value::Int(1)]);
        assert_eq!(vm.repr(&one).unwrap(), "(1,)");
        let list = vm.new_list(vec![Value::Int(1), Value::from("a"), Value::None]);
        assert_eq!(vm.repr(&list).unwrap(), "[1, 'a', None]");
    }

    #[test]
    fn test_recursive_list_repr() {
        let mut vm = Vm::new(EngineConfig::default());
        let list = vm.new_list(vec![]);
        if let Value::Object(obj) = &list {
            if let ObjectKind::List(items) = &mut obj.write().kind {
                items.push(list.clone());
            }
        }
        assert_eq!(vm.repr(&list).unwrap(), "[[...]]");
    }

    #[test]
    fn test_unhashable() {
        let mut vm = Vm::new(EngineConfig::default());
        let list = vm.new_list(vec![]);
        assert!(vm.hash_key(&list).is_err());
        assert_eq!(vm.hash_key(&Value::Bool(true)).unwrap(), vm.hash_key(&Value::Int(1)).unwrap());
    }
}
