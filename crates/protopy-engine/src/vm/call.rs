//! The call protocol: argument binding, frames, instantiation and class
//! construction.

use std::sync::Arc;

use super::attr::class_tag;
use super::{ScopeLink, Vm, VmError, VmResult};
use crate::builtins;
use crate::runtime::object::{ClassData, ObjectKind, TypeTag};
use crate::runtime::{
    Args, Completion, Dict, DictKey, ExecState, Frame, Function, Generator, GeneratorKind, ObjRef, Object,
    PrototypeModel, Value,
};

/// What a callee turned out to be, read out of its lock.
enum Callee {
    Function(Function),
    Native(crate::runtime::NativeFn),
    Bound(Value, Value),
    Class(ObjRef),
    Static(Value),
    Other,
}

/// Joins parameter names the way arity errors list them: `'a'`, `'a' and
/// 'b'`, `'a', 'b', and 'c'`.
fn join_names(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
    match quoted.len() {
        0 => String::new(),
        1 => quoted[0].clone(),
        2 => format!("{} and {}", quoted[0], quoted[1]),
        n => format!("{}, and {}", quoted[..n - 1].join(", "), quoted[n - 1]),
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

impl Vm {
    /// `callee(*args)`.
    pub fn call(&mut self, callee: &Value, args: Args) -> VmResult<Value> {
        let target = match callee {
            Value::Object(obj) => {
                let guard = obj.read();
                match &guard.kind {
                    ObjectKind::Function(function) => Callee::Function(function.clone()),
                    ObjectKind::Native(native) => Callee::Native(native.func),
                    ObjectKind::BoundMethod(bound) => Callee::Bound(bound.receiver.clone(), bound.function.clone()),
                    ObjectKind::Class(_) => Callee::Class(obj.clone()),
                    ObjectKind::StaticMethod(inner) => Callee::Static(inner.clone()),
                    _ => Callee::Other,
                }
            }
            _ => Callee::Other,
        };
        match target {
            Callee::Function(function) => self.call_function(&function, args),
            Callee::Native(func) => func(self, args),
            Callee::Bound(receiver, function) => self.call(&function, args.prepend(receiver)),
            Callee::Class(class) => self.instantiate(&class, args),
            Callee::Static(inner) => self.call(&inner, args),
            Callee::Other => {
                if self.user_class(callee).is_some() {
                    if let Some(method) = self.special_method(callee, "__call__")? {
                        return self.call(&method, args);
                    }
                }
                let type_name = self.type_name(callee);
                Err(self.type_error(format!("'{}' object is not callable", type_name)))
            }
        }
    }

    /// `callable(value)`.
    pub fn is_callable(&mut self, value: &Value) -> VmResult<bool> {
        if let Value::Object(obj) = value {
            let direct = matches!(
                obj.read().kind,
                ObjectKind::Function(_)
                    | ObjectKind::Native(_)
                    | ObjectKind::BoundMethod(_)
                    | ObjectKind::Class(_)
                    | ObjectKind::StaticMethod(_)
            );
            if direct {
                return Ok(true);
            }
            if self.user_class(value).is_some() {
                return Ok(self.special_method(value, "__call__")?.is_some());
            }
        }
        Ok(false)
    }

    /// Calls a user function: binds arguments into a fresh frame, then runs
    /// it, or wraps it in a generator when the code is resumable.
    pub(crate) fn call_function(&mut self, function: &Function, args: Args) -> VmResult<Value> {
        let code = Arc::clone(&function.code);
        let mut frame = Frame::for_call(
            Arc::clone(&code),
            function.globals.clone(),
            function.closure.clone(),
            function.class.clone(),
        );
        self.bind_arguments(function, &mut frame, args)?;
        if code.is_generator() || code.is_coroutine() {
            let (kind, class) = if code.is_coroutine() && !code.is_generator() {
                (GeneratorKind::Coroutine, self.types.coroutine.clone())
            } else {
                (GeneratorKind::Generator, self.types.generator.clone())
            };
            let generator = Generator::new(kind, function.name.clone(), function.qualname.clone(), frame);
            return Ok(self.alloc(ObjectKind::Generator(generator), &class));
        }
        self.run_frame(&mut frame)
    }

    /// Binds `args` to the parameters of `function` in `frame`.
    fn bind_arguments(&mut self, function: &Function, frame: &mut Frame, args: Args) -> VmResult<()> {
        let code = Arc::clone(&function.code);
        let name = function.qualname.as_str();
        let argcount = code.argcount as usize;
        let kwonlycount = code.kwonlyargcount as usize;
        let Args { positional, keywords } = args;
        let given = positional.len();

        let mut bound: Vec<Option<Value>> = vec![None; argcount];
        let mut extra = Vec::new();
        for (i, value) in positional.into_iter().enumerate() {
            if i < argcount {
                bound[i] = Some(value);
            } else {
                extra.push(value);
            }
        }
        if !extra.is_empty() && code.vararg_name().is_none() {
            let required = argcount - function.defaults.len().min(argcount);
            let takes = if required == argcount {
                plural(argcount, "positional argument")
            } else {
                format!("from {} to {} positional arguments", required, argcount)
            };
            let were = if given == 1 { "was" } else { "were" };
            return Err(self.type_error(format!("{}() takes {} but {} {} given", name, takes, given, were)));
        }

        let mut kwonly: Vec<Option<Value>> = vec![None; kwonlycount];
        let mut kwargs = Vec::new();
        for (keyword, value) in keywords {
            if let Some(i) = code.varnames[..argcount].iter().position(|p| *p == keyword) {
                if bound[i].is_some() {
                    return Err(self.type_error(format!(
                        "{}() got multiple values for argument '{}'",
                        name, keyword
                    )));
                }
                bound[i] = Some(value);
            } else if let Some(j) = (0..kwonlycount).find(|&j| code.varnames[code.kwonly_slot(j)] == keyword) {
                kwonly[j] = Some(value);
            } else if code.varkw_name().is_some() {
                kwargs.push((keyword, value));
            } else {
                return Err(self.type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, keyword
                )));
            }
        }

        let first_default = argcount.saturating_sub(function.defaults.len());
        for (i, slot) in bound.iter_mut().enumerate() {
            if slot.is_none() && i >= first_default {
                *slot = function.defaults.get(i - first_default).cloned();
            }
        }
        let missing: Vec<String> = bound
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| code.varnames[i].clone())
            .collect();
        if !missing.is_empty() {
            return Err(self.type_error(format!(
                "{}() missing {}: {}",
                name,
                plural(missing.len(), "required positional argument"),
                join_names(&missing)
            )));
        }

        for (j, slot) in kwonly.iter_mut().enumerate() {
            if slot.is_none() {
                let param = &code.varnames[code.kwonly_slot(j)];
                *slot = function
                    .kwdefaults
                    .iter()
                    .find(|(k, _)| k == param)
                    .map(|(_, v)| v.clone());
            }
        }
        let missing: Vec<String> = kwonly
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(j, _)| code.varnames[code.kwonly_slot(j)].clone())
            .collect();
        if !missing.is_empty() {
            return Err(self.type_error(format!(
                "{}() missing {}: {}",
                name,
                plural(missing.len(), "required keyword-only argument"),
                join_names(&missing)
            )));
        }

        for (i, value) in bound.into_iter().enumerate() {
            if let Some(value) = value {
                frame.bind_local(i, value);
            }
        }
        let mut next = argcount;
        if code.vararg_name().is_some() {
            let tuple = self.new_tuple(extra);
            frame.bind_local(next, tuple);
            next += 1;
        }
        if code.varkw_name().is_some() {
            let mut dict = Dict::new();
            for (keyword, value) in kwargs {
                let key = Value::from(keyword.as_str());
                dict.insert(DictKey::Str(Arc::from(keyword.as_str())), key, value);
            }
            let dict = self.new_dict(dict);
            frame.bind_local(next, dict);
        }
        for (j, value) in kwonly.into_iter().enumerate() {
            if let Some(value) = value {
                frame.bind_local(code.kwonly_slot(j), value);
            }
        }
        Ok(())
    }

    /// The `ScopeLink` recorded while `frame` executes.
    pub(crate) fn scope_link(frame: &Frame) -> ScopeLink {
        ScopeLink {
            globals: frame.globals.clone(),
            names: frame.names.clone(),
            class: frame.class.clone(),
            first_arg: if frame.code.argcount > 0 || frame.code.vararg_name().is_some() {
                frame.local(0)
            } else {
                None
            },
        }
    }

    /// Runs `frame` to completion with a fresh operand stack.
    pub(crate) fn run_frame(&mut self, frame: &mut Frame) -> VmResult<Value> {
        self.enter_call()?;
        self.scopes.push(Self::scope_link(frame));
        let mut state = ExecState::new(&frame.code);
        let end = frame.code.bytecode.len();
        let result = super::with_native_stack(|| self.execute_bytecode_range(frame, &mut state, end));
        self.scopes.pop();
        self.leave_call();
        match result? {
            Completion::Return(value) => Ok(value),
            Completion::EndOfRange => Ok(Value::None),
            Completion::Yield(_) => Err(VmError::internal("yield outside a generator frame")),
        }
    }

    // ===== Instantiation =====

    /// `class(*args)`.
    pub(crate) fn instantiate(&mut self, class: &ObjRef, args: Args) -> VmResult<Value> {
        if class_tag(class).is_some() {
            return builtins::object::construct(self, class, args);
        }
        let instance = match self.user_new(class)? {
            Some(new) => {
                let instance = self.call(&new, args.clone().prepend(Value::Object(class.clone())))?;
                if !self.is_instance_of(&instance, class) {
                    return Ok(instance);
                }
                instance
            }
            None => self.allocate_instance(class, &args.positional),
        };
        self.init_instance(&instance, args)?;
        Ok(instance)
    }

    fn is_instance_of(&self, value: &Value, class: &ObjRef) -> bool {
        PrototypeModel::is_subclass(&self.type_of(value), class)
    }

    /// A `__new__` defined by a user class in `class`'s chain.
    fn user_new(&mut self, class: &ObjRef) -> VmResult<Option<Value>> {
        match PrototypeModel::lookup(class, "__new__") {
            Some((new, owner)) if class_tag(&owner).is_none() => {
                let inner = match &new {
                    Value::Object(obj) => match &obj.read().kind {
                        ObjectKind::StaticMethod(inner) => Some(inner.clone()),
                        _ => None,
                    },
                    _ => None,
                };
                Ok(Some(inner.unwrap_or(new)))
            }
            _ => Ok(None),
        }
    }

    /// Allocates an instance of user class `class`, with the native payload
    /// of its first builtin base.
    pub(crate) fn allocate_instance(&mut self, class: &ObjRef, args: &[Value]) -> Value {
        let base = PrototypeModel::linearize(class).into_iter().find_map(|c| class_tag(&c));
        match base {
            Some(TypeTag::Exception) => self.exception_from_args(class, args.to_vec()),
            Some(TypeTag::List) => self.alloc(ObjectKind::List(Vec::new()), class),
            Some(TypeTag::Dict) => self.alloc(ObjectKind::Dict(Dict::new()), class),
            Some(TypeTag::Set) => self.alloc(ObjectKind::Set(crate::runtime::Set::new()), class),
            _ => self.alloc(ObjectKind::Instance, class),
        }
    }

    fn init_instance(&mut self, instance: &Value, args: Args) -> VmResult<()> {
        let init = match self.special_method(instance, "__init__")? {
            Some(init) => init,
            None => return Ok(()),
        };
        let result = self.call(&init, args)?;
        if !result.is_none() {
            let type_name = self.type_name(&result);
            return Err(self.type_error(format!("__init__() should return None, not '{}'", type_name)));
        }
        Ok(())
    }

    // ===== Classes =====

    /// `BUILD_CLASS`: runs the class body, then creates the class from the
    /// names it bound.
    pub(crate) fn build_class(&mut self, body: &Value, name: String, bases: Vec<Value>) -> VmResult<Value> {
        let function = match body {
            Value::Object(obj) => match &obj.read().kind {
                ObjectKind::Function(function) => Some(function.clone()),
                _ => None,
            },
            _ => None,
        }
        .ok_or_else(|| VmError::internal("BUILD_CLASS body is not a function"))?;

        let mut base_classes = Vec::with_capacity(bases.len());
        for base in &bases {
            match base {
                Value::Object(obj) if self.is_class_object(obj) => base_classes.push(obj.clone()),
                other => {
                    let type_name = self.type_name(other);
                    return Err(self.type_error(format!("bases must be types, not '{}'", type_name)));
                }
            }
        }
        if base_classes.is_empty() {
            base_classes.push(self.types.object.clone());
        }

        let mut frame = Frame::for_call(
            Arc::clone(&function.code),
            function.globals.clone(),
            function.closure.clone(),
            None,
        );
        let namespace = frame
            .names
            .clone()
            .ok_or_else(|| VmError::internal("class body compiled with slots"))?;
        self.run_frame(&mut frame)?;

        let qualname = namespace
            .get("__qualname__")
            .and_then(|q| q.as_str().map(str::to_string))
            .unwrap_or_else(|| name.clone());
        let class = ObjRef::new(Object::class(ClassData { name, qualname, tag: None }, base_classes));
        for (key, value) in namespace.snapshot() {
            self.adopt_method(&value, &class);
            class.write().attrs.insert(key, value);
        }
        Ok(Value::Object(class))
    }

    /// Records `class` as the defining class of a function found in its
    /// body, looking through method wrappers.
    fn adopt_method(&mut self, value: &Value, class: &ObjRef) {
        let obj = match value {
            Value::Object(obj) => obj,
            _ => return,
        };
        let wrapped: Vec<Value> = match &obj.read().kind {
            ObjectKind::StaticMethod(inner) | ObjectKind::ClassMethod(inner) => vec![inner.clone()],
            ObjectKind::Property(property) => vec![property.fget.clone(), property.fset.clone()],
            _ => Vec::new(),
        };
        for inner in &wrapped {
            self.adopt_method(inner, class);
        }
        if let ObjectKind::Function(function) = &mut obj.write().kind {
            if function.class.is_none() {
                function.class = Some(class.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::parser::Parser;

    fn run(source: &str) -> (Vm, VmResult<Value>, crate::runtime::Namespace) {
        let module = Parser::new(source).parse_module().unwrap();
        let code = crate::compiler::compile_module_checked(&module, "<test>").unwrap();
        let mut vm = Vm::new(EngineConfig::default());
        let globals = vm.new_globals("__main__");
        let result = vm.run_module_code(code, globals.clone());
        (vm, result, globals)
    }

    fn error_text(source: &str) -> String {
        let (mut vm, result, _) = run(source);
        match result {
            Err(VmError::Exception(exc)) => vm.describe_exception(&exc),
            other => panic!("expected an exception, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_join_names() {
        assert_eq!(join_names(&["a".into()]), "'a'");
        assert_eq!(join_names(&["a".into(), "b".into()]), "'a' and 'b'");
        assert_eq!(join_names(&["a".into(), "b".into(), "c".into()]), "'a', 'b', and 'c'");
    }

    #[test]
    fn test_defaults_and_keywords() {
        let (_, result, globals) = run("def f(a, b=2, *rest, c, d=4, **kw):\n    return a + b + c + d + len(rest) + len(kw)\nr = f(1, c=3, e=5)\n");
        assert!(result.is_ok());
        assert!(matches!(globals.get("r"), Some(Value::Int(11))));
    }

    #[test]
    fn test_arity_errors() {
        assert_eq!(
            error_text("def f(x):\n    pass\nf(1, 2)\n"),
            "TypeError: f() takes 1 positional argument but 2 were given"
        );
        assert_eq!(
            error_text("def f(x, y):\n    pass\nf()\n"),
            "TypeError: f() missing 2 required positional arguments: 'x' and 'y'"
        );
        assert_eq!(
            error_text("def f(x):\n    pass\nf(1, x=2)\n"),
            "TypeError: f() got multiple values for argument 'x'"
        );
        assert_eq!(
            error_text("def f(x):\n    pass\nf(y=2)\n"),
            "TypeError: f() got an unexpected keyword argument 'y'"
        );
        assert_eq!(
            error_text("def f(*, k):\n    pass\nf()\n"),
            "TypeError: f() missing 1 required keyword-only argument: 'k'"
        );
    }

    #[test]
    fn test_not_callable() {
        assert_eq!(error_text("x = 1\nx()\n"), "TypeError: 'int' object is not callable");
    }

    #[test]
    fn test_class_construction_and_init() {
        let (_, result, globals) = run(
            "class P:\n    def __init__(self, x):\n        self.x = x\n    def double(self):\n        return self.x * 2\nr = P(21).double()\n",
        );
        assert!(result.is_ok());
        assert!(matches!(globals.get("r"), Some(Value::Int(42))));
    }

    #[test]
    fn test_init_must_return_none() {
        assert_eq!(
            error_text("class A:\n    def __init__(self):\n        return 1\nA()\n"),
            "TypeError: __init__() should return None, not 'int'"
        );
    }

    #[test]
    fn test_recursion_limit_is_recoverable() {
        let (_, result, globals) = run(
            "def f(n):\n    return f(n + 1)\ntry:\n    f(0)\nexcept RecursionError:\n    ok = True\n",
        );
        assert!(result.is_ok());
        assert!(matches!(globals.get("ok"), Some(Value::Bool(true))));
    }

    #[test]
    fn test_deep_recursion_grows_native_stack() {
        let mut vm = Vm::new(EngineConfig::default().with_recursion_limit(6_000));
        let globals = vm.new_globals("__main__");
        let source = "def depth(n):\n    if n == 0:\n        return 0\n    return depth(n - 1) + 1\nr = depth(5000)\n";
        let code = vm.compile_source(source, "<test>").unwrap();
        assert!(vm.run_module_code(code, globals.clone()).is_ok());
        assert!(matches!(globals.get("r"), Some(Value::Int(5000))));
    }
}
