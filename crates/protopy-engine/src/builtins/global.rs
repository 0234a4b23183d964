//! The builtins namespace and the free builtin functions.
//!
//! Builtin classes (`int`, `list`, `range`, the exceptions, ...) are bound
//! by name next to the functions here; calling one goes through
//! [`object::construct`](super::object::construct).

use super::{check_arity, console, list, no_keywords, number, str_arg, take_keywords, BuiltinTypes, ExceptionKind};
use crate::runtime::{Args, Dict, Frame, IterState, Namespace, NativeFn, ObjRef, ObjectKind, ObjectModel, Value};
use crate::vm::{ascii_escape, BinOp, Vm, VmError, VmResult};

/// Every builtin function by name.
const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("print", console::builtin_print),
    ("input", console::builtin_input),
    ("len", builtin_len),
    ("repr", builtin_repr),
    ("ascii", builtin_ascii),
    ("format", builtin_format),
    ("isinstance", builtin_isinstance),
    ("issubclass", builtin_issubclass),
    ("iter", builtin_iter),
    ("next", builtin_next),
    ("abs", number::builtin_abs),
    ("round", number::builtin_round),
    ("divmod", number::builtin_divmod),
    ("pow", number::builtin_pow),
    ("hex", number::builtin_hex),
    ("oct", number::builtin_oct),
    ("bin", number::builtin_bin),
    ("min", builtin_min),
    ("max", builtin_max),
    ("sum", builtin_sum),
    ("sorted", list::builtin_sorted),
    ("reversed", list::builtin_reversed),
    ("enumerate", builtin_enumerate),
    ("zip", builtin_zip),
    ("map", builtin_map),
    ("filter", builtin_filter),
    ("any", builtin_any),
    ("all", builtin_all),
    ("hasattr", builtin_hasattr),
    ("getattr", builtin_getattr),
    ("setattr", builtin_setattr),
    ("delattr", builtin_delattr),
    ("id", builtin_id),
    ("hash", builtin_hash),
    ("callable", builtin_callable),
    ("chr", builtin_chr),
    ("ord", builtin_ord),
    ("locals", builtin_locals),
    ("globals", builtin_globals),
    ("exec", builtin_exec),
    ("eval", builtin_eval),
];

/// Builds the builtins namespace for one engine.
pub fn namespace(types: &BuiltinTypes) -> Namespace {
    let builtins = Namespace::new();
    for (name, func) in FUNCTIONS {
        builtins.set(*name, types.native(*name, *func));
    }
    for (name, class) in types.named() {
        builtins.set(name, Value::Object(class));
    }
    builtins.set("NotImplemented", Value::NotImplemented);
    builtins.set("Ellipsis", Value::Ellipsis);
    builtins.set("__name__", Value::from("builtins"));
    builtins
}

// ============================================================================
// Introspection
// ============================================================================

/// `len(obj)`
pub fn builtin_len(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "len", 1, 1)?;
    let len = vm.len(&args.positional[0])?;
    Ok(Value::Int(len as i64))
}

/// `repr(obj)`
pub fn builtin_repr(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "repr", 1, 1)?;
    Ok(Value::from(vm.repr(&args.positional[0])?))
}

/// `ascii(obj)`: `repr` with non-ASCII characters escaped.
pub fn builtin_ascii(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "ascii", 1, 1)?;
    let repr = vm.repr(&args.positional[0])?;
    Ok(Value::from(ascii_escape(&repr)))
}

/// `format(value, spec='')`
pub fn builtin_format(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "format", 1, 2)?;
    let spec = match args.positional.get(1) {
        Some(spec) => str_arg(vm, spec, "format")?,
        None => "".into(),
    };
    Ok(Value::from(vm.format_value(&args.positional[0], &spec)?))
}

/// Classes named by the second argument of `isinstance`/`issubclass`: one
/// class or a (nested) tuple of them.
fn class_spec(vm: &mut Vm, spec: &Value, func: &str) -> VmResult<Vec<ObjRef>> {
    if let Value::Object(obj) = spec {
        if vm.is_class_object(obj) {
            return Ok(vec![obj.clone()]);
        }
        let items = match &obj.read().kind {
            ObjectKind::Tuple(items) => Some(items.clone()),
            _ => None,
        };
        if let Some(items) = items {
            let mut classes = Vec::new();
            for item in &items {
                classes.extend(class_spec(vm, item, func)?);
            }
            return Ok(classes);
        }
    }
    Err(vm.type_error(format!(
        "{}() arg 2 must be a type, a tuple of types, or a union",
        func
    )))
}

/// `isinstance(obj, class_or_tuple)`
pub fn builtin_isinstance(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "isinstance", 2, 2)?;
    let classes = class_spec(vm, &args.positional[1], "isinstance")?;
    let obj = &args.positional[0];
    Ok(Value::Bool(classes.iter().any(|class| vm.is_instance(obj, class))))
}

/// `issubclass(class, class_or_tuple)`
pub fn builtin_issubclass(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "issubclass", 2, 2)?;
    let class = match &args.positional[0] {
        Value::Object(obj) if vm.is_class_object(obj) => obj.clone(),
        _ => return Err(vm.type_error("issubclass() arg 1 must be a class")),
    };
    let classes = class_spec(vm, &args.positional[1], "issubclass")?;
    Ok(Value::Bool(
        classes
            .iter()
            .any(|base| crate::runtime::PrototypeModel::is_subclass(&class, base)),
    ))
}

/// `id(obj)`
pub fn builtin_id(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "id", 1, 1)?;
    Ok(Value::Int(args.positional[0].identity() as i64))
}

/// `hash(obj)`
pub fn builtin_hash(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "hash", 1, 1)?;
    let key = vm.hash_key(&args.positional[0])?;
    Ok(Value::Int(key.hash_value()))
}

/// `callable(obj)`
pub fn builtin_callable(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "callable", 1, 1)?;
    Ok(Value::Bool(vm.is_callable(&args.positional[0])?))
}

/// `chr(i)`
pub fn builtin_chr(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "chr", 1, 1)?;
    let code = vm.index_value(&args.positional[0])?;
    match u32::try_from(code).ok().and_then(char::from_u32) {
        Some(c) => Ok(Value::from(c.to_string())),
        None => Err(vm.value_error("chr() arg not in range(0x110000)")),
    }
}

/// `ord(c)`
pub fn builtin_ord(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "ord", 1, 1)?;
    let text = str_arg(vm, &args.positional[0], "ord")?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => Err(vm.type_error(format!(
            "ord() expected a character, but string of length {} found",
            text.chars().count()
        ))),
    }
}

// ============================================================================
// Attributes
// ============================================================================

fn attr_name(vm: &mut Vm, value: &Value, func: &str) -> VmResult<std::sync::Arc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => {
            let type_name = vm.type_name(other);
            Err(vm.type_error(format!("{}(): attribute name must be string, not '{}'", func, type_name)))
        }
    }
}

/// `hasattr(obj, name)`
pub fn builtin_hasattr(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "hasattr", 2, 2)?;
    let name = attr_name(vm, &args.positional[1], "hasattr")?;
    Ok(Value::Bool(vm.has_attr(&args.positional[0], &name)?))
}

/// `getattr(obj, name[, default])`: the default only replaces
/// `AttributeError`.
pub fn builtin_getattr(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "getattr", 2, 3)?;
    let name = attr_name(vm, &args.positional[1], "getattr")?;
    match vm.get_attr(&args.positional[0], &name) {
        Err(VmError::Exception(exc))
            if args.positional.len() == 3 && vm.exception_is(&exc, ExceptionKind::AttributeError) =>
        {
            Ok(args.positional[2].clone())
        }
        other => other,
    }
}

/// `setattr(obj, name, value)`
pub fn builtin_setattr(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "setattr", 3, 3)?;
    let name = attr_name(vm, &args.positional[1], "setattr")?;
    vm.set_attr(&args.positional[0], &name, args.positional[2].clone())?;
    Ok(Value::None)
}

/// `delattr(obj, name)`
pub fn builtin_delattr(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "delattr", 2, 2)?;
    let name = attr_name(vm, &args.positional[1], "delattr")?;
    vm.del_attr(&args.positional[0], &name)?;
    Ok(Value::None)
}

// ============================================================================
// Iteration
// ============================================================================

/// `iter(iterable)`
pub fn builtin_iter(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "iter", 1, 1)?;
    vm.get_iter(&args.positional[0])
}

/// `next(iterator[, default])`
pub fn builtin_next(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "next", 1, 2)?;
    match vm.next(&args.positional[0])? {
        Some(value) => Ok(value),
        None => match args.positional.get(1) {
            Some(default) => Ok(default.clone()),
            None => Err(vm.stop_iteration(Value::None)),
        },
    }
}

/// `enumerate(iterable, start=0)`
pub fn builtin_enumerate(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let start = take_keywords(vm, &mut args, "enumerate", &["start"])?.pop().flatten();
    check_arity(vm, &args, "enumerate", 1, 2)?;
    let start = match start.or_else(|| args.positional.get(1).cloned()) {
        Some(start) => vm.index_value(&start)?,
        None => 0,
    };
    let iter = vm.get_iter(&args.positional[0])?;
    Ok(vm.new_iterator(IterState::Enumerate { iter, count: start }))
}

/// `zip(*iterables)`
pub fn builtin_zip(vm: &mut Vm, args: Args) -> VmResult<Value> {
    no_keywords(vm, &args, "zip")?;
    let mut iters = Vec::with_capacity(args.positional.len());
    for iterable in &args.positional {
        iters.push(vm.get_iter(iterable)?);
    }
    Ok(vm.new_iterator(IterState::Zip { iters }))
}

/// `map(func, *iterables)`
pub fn builtin_map(vm: &mut Vm, args: Args) -> VmResult<Value> {
    no_keywords(vm, &args, "map")?;
    if args.positional.len() < 2 {
        return Err(vm.type_error("map() must have at least two arguments."));
    }
    let mut iters = Vec::with_capacity(args.positional.len() - 1);
    for iterable in &args.positional[1..] {
        iters.push(vm.get_iter(iterable)?);
    }
    Ok(vm.new_iterator(IterState::Map {
        func: args.positional[0].clone(),
        iters,
    }))
}

/// `filter(func_or_none, iterable)`
pub fn builtin_filter(vm: &mut Vm, args: Args) -> VmResult<Value> {
    no_keywords(vm, &args, "filter")?;
    check_arity(vm, &args, "filter", 2, 2)?;
    let iter = vm.get_iter(&args.positional[1])?;
    Ok(vm.new_iterator(IterState::Filter {
        func: args.positional[0].clone(),
        iter,
    }))
}

/// `any(iterable)`: stops at the first truthy item.
pub fn builtin_any(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "any", 1, 1)?;
    let iter = vm.get_iter(&args.positional[0])?;
    while let Some(item) = vm.next(&iter)? {
        if vm.truthy(&item)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

/// `all(iterable)`: stops at the first falsy item.
pub fn builtin_all(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "all", 1, 1)?;
    let iter = vm.get_iter(&args.positional[0])?;
    while let Some(item) = vm.next(&iter)? {
        if !vm.truthy(&item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

/// `sum(iterable, start=0)`
pub fn builtin_sum(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let start = take_keywords(vm, &mut args, "sum", &["start"])?.pop().flatten();
    check_arity(vm, &args, "sum", 1, 2)?;
    let mut total = start.or_else(|| args.positional.get(1).cloned()).unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(vm.type_error("sum() can't sum strings [use ''.join(seq) instead]"));
    }
    let iter = vm.get_iter(&args.positional[0])?;
    while let Some(item) = vm.next(&iter)? {
        total = vm.binary_op(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

/// Shared body of `min` and `max`: `prefer(candidate, best)` says whether
/// the candidate replaces the current pick.
fn extreme(
    vm: &mut Vm,
    mut args: Args,
    name: &str,
    prefer: fn(&mut Vm, &Value, &Value) -> VmResult<bool>,
) -> VmResult<Value> {
    let mut options = take_keywords(vm, &mut args, name, &["key", "default"])?.into_iter();
    let key = options.next().flatten().filter(|k| !k.is_none());
    let default = options.next().flatten();

    let items = match args.positional.len() {
        0 => return Err(vm.type_error(format!("{} expected at least 1 argument, got 0", name))),
        1 => vm.collect(&args.positional[0])?,
        _ => {
            if default.is_some() {
                return Err(vm.type_error(format!(
                    "Cannot specify a default for {}() with multiple positional arguments",
                    name
                )));
            }
            args.positional
        }
    };

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let rank = match &key {
            Some(key) => vm.call(key, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => prefer(vm, &rank, best_rank)?,
        };
        if replace {
            best = Some((rank, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(vm.value_error(format!("{}() iterable argument is empty", name))),
    }
}

/// `min(iterable, *, key=None, default=...)` or `min(a, b, *rest, key=None)`
pub fn builtin_min(vm: &mut Vm, args: Args) -> VmResult<Value> {
    extreme(vm, args, "min", |vm, candidate, best| vm.less_than(candidate, best))
}

/// `max(iterable, *, key=None, default=...)` or `max(a, b, *rest, key=None)`
pub fn builtin_max(vm: &mut Vm, args: Args) -> VmResult<Value> {
    extreme(vm, args, "max", |vm, candidate, best| vm.less_than(best, candidate))
}

// ============================================================================
// Namespaces and dynamic execution
// ============================================================================

fn namespace_dict(vm: &mut Vm, names: &Namespace) -> VmResult<Value> {
    let mut dict = Dict::new();
    let mut entries = names.snapshot();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in entries {
        let key = Value::from(name);
        let hashed = vm.hash_key(&key)?;
        dict.insert(hashed, key, value);
    }
    Ok(vm.new_dict(dict))
}

/// `globals()`: a snapshot of the calling frame's module namespace.
pub fn builtin_globals(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "globals", 0, 0)?;
    let globals = match vm.scopes.last() {
        Some(scope) => scope.globals.clone(),
        None => return Ok(vm.new_dict(Dict::new())),
    };
    namespace_dict(vm, &globals)
}

/// `locals()`: a snapshot of the calling frame's local names.
pub fn builtin_locals(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "locals", 0, 0)?;
    let names = match vm.scopes.last() {
        Some(scope) => scope.names.clone().unwrap_or_else(|| scope.globals.clone()),
        None => return Ok(vm.new_dict(Dict::new())),
    };
    namespace_dict(vm, &names)
}

/// Where `exec`/`eval` run: the caller's namespaces, or fresh ones seeded
/// from explicit dicts (written back afterwards).
struct ExecTarget {
    globals: Namespace,
    names: Namespace,
    write_back: Vec<(ObjRef, Namespace)>,
}

fn dict_arg(vm: &mut Vm, value: &Value, func: &str, which: &str) -> VmResult<Option<ObjRef>> {
    match value {
        Value::None => Ok(None),
        Value::Object(obj) if matches!(obj.read().kind, ObjectKind::Dict(_)) => Ok(Some(obj.clone())),
        other => {
            let type_name = vm.type_name(other);
            Err(vm.type_error(format!("{}() {} must be a dict, not {}", func, which, type_name)))
        }
    }
}

fn seed_namespace(vm: &mut Vm, dict: &ObjRef) -> VmResult<Namespace> {
    let names = Namespace::new();
    for (key, value) in vm.mapping_items(&Value::Object(dict.clone()))? {
        if let Value::Str(name) = key {
            names.set(name.to_string(), value);
        }
    }
    Ok(names)
}

fn exec_target(vm: &mut Vm, args: &Args, func: &str) -> VmResult<ExecTarget> {
    let globals_dict = match args.positional.get(1) {
        Some(value) => dict_arg(vm, value, func, "globals")?,
        None => None,
    };
    let locals_dict = match args.positional.get(2) {
        Some(value) => dict_arg(vm, value, func, "locals")?,
        None => None,
    };

    let mut write_back = Vec::new();
    let (globals, mut names) = match globals_dict {
        Some(dict) => {
            let globals = seed_namespace(vm, &dict)?;
            write_back.push((dict, globals.clone()));
            (globals.clone(), globals)
        }
        None => match vm.scopes.last() {
            Some(scope) => (
                scope.globals.clone(),
                scope.names.clone().unwrap_or_else(|| scope.globals.clone()),
            ),
            None => {
                let globals = vm.new_globals("__main__");
                (globals.clone(), globals)
            }
        },
    };
    if let Some(dict) = locals_dict {
        names = seed_namespace(vm, &dict)?;
        write_back.push((dict, names.clone()));
    }
    Ok(ExecTarget {
        globals,
        names,
        write_back,
    })
}

fn run_in(vm: &mut Vm, code: std::sync::Arc<crate::compiler::CodeObject>, target: ExecTarget) -> VmResult<Value> {
    let mut frame = Frame::module(code, target.globals);
    frame.names = Some(target.names);
    let result = vm.run_frame(&mut frame);
    for (dict, names) in target.write_back {
        for (name, value) in names.snapshot() {
            let key = Value::from(name);
            let hashed = vm.hash_key(&key)?;
            if let ObjectKind::Dict(entries) = &mut dict.write().kind {
                entries.insert(hashed, key, value);
            }
        }
    }
    result
}

fn code_arg(vm: &mut Vm, source: &Value, func: &str, expression: bool) -> VmResult<std::sync::Arc<crate::compiler::CodeObject>> {
    if let Value::Object(obj) = source {
        if let ObjectKind::Code(code) = &obj.read().kind {
            return Ok(code.clone());
        }
    }
    let text = match source {
        Value::Str(s) => s.clone(),
        other => {
            let type_name = vm.type_name(other);
            return Err(vm.type_error(format!(
                "{}() arg 1 must be a string or code object, not {}",
                func, type_name
            )));
        }
    };
    let filename = "<string>";
    if expression {
        vm.compile_expression_source(text.trim(), filename)
    } else {
        vm.compile_source(&text, filename)
    }
}

/// `exec(source, globals=None, locals=None)`: runs statements and returns
/// `None`.
pub fn builtin_exec(vm: &mut Vm, args: Args) -> VmResult<Value> {
    no_keywords(vm, &args, "exec")?;
    check_arity(vm, &args, "exec", 1, 3)?;
    let code = code_arg(vm, &args.positional[0], "exec", false)?;
    let target = exec_target(vm, &args, "exec")?;
    run_in(vm, code, target)?;
    Ok(Value::None)
}

/// `eval(expression, globals=None, locals=None)`
pub fn builtin_eval(vm: &mut Vm, args: Args) -> VmResult<Value> {
    no_keywords(vm, &args, "eval")?;
    check_arity(vm, &args, "eval", 1, 3)?;
    let code = code_arg(vm, &args.positional[0], "eval", true)?;
    let target = exec_target(vm, &args, "eval")?;
    run_in(vm, code, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn run(vm: &mut Vm, source: &str) -> Namespace {
        let code = vm.compile_source(source, "<test>").unwrap();
        let globals = vm.new_globals("__main__");
        vm.run_module_code(code, globals.clone()).unwrap();
        globals
    }

    fn describe(vm: &mut Vm, result: VmResult<Value>) -> String {
        match result {
            Err(VmError::Exception(exc)) => vm.describe_exception(&exc),
            Err(other) => format!("{}", other),
            Ok(value) => vm.repr(&value).unwrap(),
        }
    }

    #[test]
    fn test_namespace_has_functions_and_classes() {
        let types = BuiltinTypes::new();
        let builtins = namespace(&types);
        for name in ["print", "len", "sorted", "exec", "int", "ValueError", "super"] {
            assert!(builtins.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn test_min_max_with_key_and_default() {
        let mut vm = Vm::new(EngineConfig::default());
        let globals = run(
            &mut vm,
            "a = max([3, 1, 2])\nb = min('bca')\nc = max(['aa', 'b'], key=len)\nd = min([], default=7)\n",
        );
        assert!(matches!(globals.get("a"), Some(Value::Int(3))));
        assert_eq!(globals.get("b").and_then(|v| v.as_str().map(str::to_string)).as_deref(), Some("a"));
        assert_eq!(globals.get("c").and_then(|v| v.as_str().map(str::to_string)).as_deref(), Some("aa"));
        assert!(matches!(globals.get("d"), Some(Value::Int(7))));
    }

    #[test]
    fn test_min_empty_raises() {
        let mut vm = Vm::new(EngineConfig::default());
        let empty = vm.new_list(Vec::new());
        let result = builtin_min(&mut vm, Args::new(vec![empty]));
        assert_eq!(describe(&mut vm, result), "ValueError: min() iterable argument is empty");
    }

    #[test]
    fn test_getattr_default_only_for_attribute_error() {
        let mut vm = Vm::new(EngineConfig::default());
        let result = builtin_getattr(&mut vm, Args::new(vec![Value::Int(1), Value::from("nope"), Value::Int(0)]));
        assert!(matches!(result, Ok(Value::Int(0))));
        let result = builtin_getattr(&mut vm, Args::new(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(
            describe(&mut vm, result),
            "TypeError: getattr(): attribute name must be string, not 'int'"
        );
    }

    #[test]
    fn test_chr_ord() {
        let mut vm = Vm::new(EngineConfig::default());
        let c = builtin_chr(&mut vm, Args::new(vec![Value::Int(955)])).unwrap();
        assert_eq!(c.as_str(), Some("λ"));
        let o = builtin_ord(&mut vm, Args::new(vec![c])).unwrap();
        assert!(matches!(o, Value::Int(955)));
        let result = builtin_ord(&mut vm, Args::new(vec![Value::from("ab")]));
        assert_eq!(
            describe(&mut vm, result),
            "TypeError: ord() expected a character, but string of length 2 found"
        );
    }

    #[test]
    fn test_exec_and_eval_share_namespace() {
        let mut vm = Vm::new(EngineConfig::default());
        let globals = run(&mut vm, "exec('x = 6')\ny = eval('x * 7')\n");
        assert!(matches!(globals.get("y"), Some(Value::Int(42))));
    }

    #[test]
    fn test_exec_with_explicit_dict() {
        let mut vm = Vm::new(EngineConfig::default());
        let globals = run(&mut vm, "ns = {'a': 2}\nexec('b = a + 1', ns)\nr = ns['b']\n");
        assert!(matches!(globals.get("r"), Some(Value::Int(3))));
    }

    #[test]
    fn test_sum_rejects_str_start() {
        let mut vm = Vm::new(EngineConfig::default());
        let items = vm.new_list(Vec::new());
        let result = builtin_sum(&mut vm, Args::new(vec![items, Value::from("")]));
        assert_eq!(
            describe(&mut vm, result),
            "TypeError: sum() can't sum strings [use ''.join(seq) instead]"
        );
    }
}
