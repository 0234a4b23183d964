//! `dict` and `set`.
//!
//! `keys()`, `values()` and `items()` return list snapshots rather than live
//! views.

use super::{check_arity, check_method_arity, receiver, MethodTable};
use crate::runtime::{Args, Dict, ObjRef, ObjectKind, Set, Value};
use crate::vm::{set_difference, set_intersection, set_union, Vm, VmError, VmResult};

// ============================================================================
// dict
// ============================================================================

/// `dict(mapping_or_iterable=(), **kwargs)`
pub fn dict_new(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "dict", 0, 1)?;
    let dict = vm.new_dict(Dict::new());
    if let Value::Object(obj) = &dict {
        update_dict(vm, obj, args.positional.first(), args.keywords)?;
    }
    Ok(dict)
}

/// Methods of `dict`.
pub const DICT_METHODS: MethodTable = &[
    ("__init__", dict_init),
    ("keys", dict_keys),
    ("values", dict_values),
    ("items", dict_items),
    ("get", dict_get),
    ("pop", dict_pop),
    ("popitem", dict_popitem),
    ("setdefault", dict_setdefault),
    ("update", dict_update),
    ("clear", dict_clear),
    ("copy", dict_copy),
];

/// Class methods of `dict`.
pub const DICT_CLASS_METHODS: MethodTable = &[("fromkeys", dict_fromkeys)];

fn dict_ref(vm: &mut Vm, args: &Args, method: &str) -> VmResult<ObjRef> {
    let this = receiver(vm, args, method)?;
    if let Value::Object(obj) = &this {
        if matches!(obj.read().kind, ObjectKind::Dict(_)) {
            return Ok(obj.clone());
        }
    }
    Err(super::wrong_receiver(vm, method, "dict", &this))
}

fn with_dict<R>(dict: &ObjRef, f: impl FnOnce(&mut Dict) -> R) -> VmResult<R> {
    match &mut dict.write().kind {
        ObjectKind::Dict(entries) => Ok(f(entries)),
        _ => Err(VmError::internal("dict payload changed type")),
    }
}

/// Inserts `key: value`, hashing the key first.
pub(crate) fn dict_insert(vm: &mut Vm, dict: &ObjRef, key: Value, value: Value) -> VmResult<()> {
    let hashed = vm.hash_key(&key)?;
    with_dict(dict, |entries| entries.insert(hashed, key, value))
}

/// `dict.update` semantics: a mapping (anything with `keys()`), or an
/// iterable of pairs, then keyword arguments.
fn update_dict(vm: &mut Vm, dict: &ObjRef, source: Option<&Value>, keywords: Vec<(String, Value)>) -> VmResult<()> {
    if let Some(source) = source {
        let is_mapping = match source {
            Value::Object(obj) if matches!(obj.read().kind, ObjectKind::Dict(_)) => true,
            other => vm.has_attr(other, "keys")?,
        };
        if is_mapping {
            for (key, value) in vm.mapping_items(source)? {
                dict_insert(vm, dict, key, value)?;
            }
        } else {
            for (i, element) in vm.collect(source)?.into_iter().enumerate() {
                let pair = match vm.collect(&element) {
                    Ok(pair) => pair,
                    Err(VmError::Exception(exc))
                        if vm.exception_is(&exc, super::ExceptionKind::TypeError) =>
                    {
                        return Err(vm.type_error(format!(
                            "cannot convert dictionary update sequence element #{} to a sequence",
                            i
                        )));
                    }
                    Err(err) => return Err(err),
                };
                match <[Value; 2]>::try_from(pair) {
                    Ok([key, value]) => dict_insert(vm, dict, key, value)?,
                    Err(pair) => {
                        return Err(vm.value_error(format!(
                            "dictionary update sequence element #{} has length {}; 2 is required",
                            i,
                            pair.len()
                        )));
                    }
                }
            }
        }
    }
    for (name, value) in keywords {
        dict_insert(vm, dict, Value::from(name), value)?;
    }
    Ok(())
}

/// `dict.__init__(self, mapping_or_iterable=(), **kwargs)`
pub fn dict_init(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "dict", 0, 1)?;
    let dict = dict_ref(vm, &args, "__init__")?;
    update_dict(vm, &dict, args.positional.get(1), args.keywords.clone())?;
    Ok(Value::None)
}

/// `dict.keys()`
pub fn dict_keys(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "keys", 0, 0)?;
    let dict = dict_ref(vm, &args, "keys")?;
    let keys = with_dict(&dict, |entries| entries.keys())?;
    Ok(vm.new_list(keys))
}

/// `dict.values()`
pub fn dict_values(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "values", 0, 0)?;
    let dict = dict_ref(vm, &args, "values")?;
    let values = with_dict(&dict, |entries| entries.values())?;
    Ok(vm.new_list(values))
}

/// `dict.items()`: a list of `(key, value)` tuples.
pub fn dict_items(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "items", 0, 0)?;
    let dict = dict_ref(vm, &args, "items")?;
    let items = with_dict(&dict, |entries| entries.items())?;
    let pairs = items.into_iter().map(|(k, v)| vm.new_tuple(vec![k, v])).collect();
    Ok(vm.new_list(pairs))
}

/// `dict.get(key, default=None)`
pub fn dict_get(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "get", 1, 2)?;
    let dict = dict_ref(vm, &args, "get")?;
    let key = vm.hash_key(&args.positional[1])?;
    let found = with_dict(&dict, |entries| entries.get(&key).cloned())?;
    Ok(found.unwrap_or_else(|| super::arg_or(&args, 2, Value::None)))
}

/// `dict.pop(key[, default])`
pub fn dict_pop(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "pop", 1, 2)?;
    let dict = dict_ref(vm, &args, "pop")?;
    let key = vm.hash_key(&args.positional[1])?;
    match with_dict(&dict, |entries| entries.remove(&key))? {
        Some((_, value)) => Ok(value),
        None => match args.positional.get(2) {
            Some(default) => Ok(default.clone()),
            None => Err(vm.key_error(args.positional[1].clone())),
        },
    }
}

/// `dict.popitem()`: the most recently inserted pair.
pub fn dict_popitem(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "popitem", 0, 0)?;
    let dict = dict_ref(vm, &args, "popitem")?;
    match with_dict(&dict, Dict::pop_last)? {
        Some((key, value)) => Ok(vm.new_tuple(vec![key, value])),
        None => Err(vm.key_error(Value::from("popitem(): dictionary is empty"))),
    }
}

/// `dict.setdefault(key, default=None)`
pub fn dict_setdefault(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "setdefault", 1, 2)?;
    let dict = dict_ref(vm, &args, "setdefault")?;
    let original = args.positional[1].clone();
    let key = vm.hash_key(&original)?;
    let default = super::arg_or(&args, 2, Value::None);
    with_dict(&dict, |entries| match entries.get(&key) {
        Some(existing) => existing.clone(),
        None => {
            entries.insert(key, original, default.clone());
            default
        }
    })
}

/// `dict.update([other], **kwargs)`
pub fn dict_update(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "update", 0, 1)?;
    let dict = dict_ref(vm, &args, "update")?;
    update_dict(vm, &dict, args.positional.get(1), args.keywords.clone())?;
    Ok(Value::None)
}

/// `dict.clear()`
pub fn dict_clear(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "clear", 0, 0)?;
    let dict = dict_ref(vm, &args, "clear")?;
    with_dict(&dict, Dict::clear)?;
    Ok(Value::None)
}

/// `dict.copy()`: a shallow copy.
pub fn dict_copy(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "copy", 0, 0)?;
    let dict = dict_ref(vm, &args, "copy")?;
    let copy = with_dict(&dict, |entries| entries.clone())?;
    Ok(vm.new_dict(copy))
}

/// `dict.fromkeys(iterable, value=None)`, bound to the class.
pub fn dict_fromkeys(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "fromkeys", 1, 2)?;
    let value = super::arg_or(&args, 2, Value::None);
    let mut dict = Dict::new();
    for key in vm.collect(&args.positional[1])? {
        let hashed = vm.hash_key(&key)?;
        dict.insert(hashed, key, value.clone());
    }
    Ok(vm.new_dict(dict))
}

// ============================================================================
// set
// ============================================================================

/// Hashes every item of `iterable` into a set.
pub(crate) fn set_from_iterable(vm: &mut Vm, iterable: &Value) -> VmResult<Set> {
    if let Value::Object(obj) = iterable {
        if let ObjectKind::Set(set) = &obj.read().kind {
            return Ok(set.clone());
        }
    }
    let mut set = Set::new();
    for item in vm.collect(iterable)? {
        let key = vm.hash_key(&item)?;
        set.insert(key, item);
    }
    Ok(set)
}

/// `set(iterable=())`
pub fn set_new(vm: &mut Vm, args: Args) -> VmResult<Value> {
    super::no_keywords(vm, &args, "set")?;
    check_arity(vm, &args, "set", 0, 1)?;
    let set = match args.positional.first() {
        Some(iterable) => set_from_iterable(vm, iterable)?,
        None => Set::new(),
    };
    Ok(vm.new_set(set))
}

/// Methods of `set`.
pub const SET_METHODS: MethodTable = &[
    ("__init__", set_init),
    ("add", set_add),
    ("remove", set_remove),
    ("discard", set_discard),
    ("pop", set_pop),
    ("clear", set_clear),
    ("copy", set_copy),
    ("update", set_update),
    ("union", set_union_method),
    ("intersection", set_intersection_method),
    ("difference", set_difference_method),
    ("symmetric_difference", set_symmetric_difference),
    ("intersection_update", set_intersection_update),
    ("difference_update", set_difference_update),
    ("issubset", set_issubset),
    ("issuperset", set_issuperset),
    ("isdisjoint", set_isdisjoint),
];

fn set_ref(vm: &mut Vm, args: &Args, method: &str) -> VmResult<ObjRef> {
    let this = receiver(vm, args, method)?;
    if let Value::Object(obj) = &this {
        if matches!(obj.read().kind, ObjectKind::Set(_)) {
            return Ok(obj.clone());
        }
    }
    Err(super::wrong_receiver(vm, method, "set", &this))
}

fn with_set<R>(set: &ObjRef, f: impl FnOnce(&mut Set) -> R) -> VmResult<R> {
    match &mut set.write().kind {
        ObjectKind::Set(members) => Ok(f(members)),
        _ => Err(VmError::internal("set payload changed type")),
    }
}

/// The receiver's members and every other positional argument as a set.
fn set_operands(vm: &mut Vm, args: &Args, method: &str) -> VmResult<(ObjRef, Set, Vec<Set>)> {
    let this = set_ref(vm, args, method)?;
    let own = with_set(&this, |members| members.clone())?;
    let mut others = Vec::with_capacity(args.positional.len().saturating_sub(1));
    for other in &args.positional[1..] {
        others.push(set_from_iterable(vm, other)?);
    }
    Ok((this, own, others))
}

/// `set.__init__(self, iterable=())`
pub fn set_init(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "set", 0, 1)?;
    let this = set_ref(vm, &args, "__init__")?;
    let members = match args.positional.get(1) {
        Some(iterable) => set_from_iterable(vm, iterable)?,
        None => Set::new(),
    };
    with_set(&this, |current| *current = members)?;
    Ok(Value::None)
}

/// `set.add(x)`
pub fn set_add(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "add", 1, 1)?;
    let this = set_ref(vm, &args, "add")?;
    let item = args.positional[1].clone();
    let key = vm.hash_key(&item)?;
    with_set(&this, |members| members.insert(key, item))?;
    Ok(Value::None)
}

/// `set.remove(x)`: `KeyError` when absent.
pub fn set_remove(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "remove", 1, 1)?;
    let this = set_ref(vm, &args, "remove")?;
    let key = vm.hash_key(&args.positional[1])?;
    match with_set(&this, |members| members.remove(&key))? {
        Some(_) => Ok(Value::None),
        None => Err(vm.key_error(args.positional[1].clone())),
    }
}

/// `set.discard(x)`
pub fn set_discard(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "discard", 1, 1)?;
    let this = set_ref(vm, &args, "discard")?;
    let key = vm.hash_key(&args.positional[1])?;
    with_set(&this, |members| members.remove(&key))?;
    Ok(Value::None)
}

/// `set.pop()`
pub fn set_pop(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "pop", 0, 0)?;
    let this = set_ref(vm, &args, "pop")?;
    match with_set(&this, Set::pop_first)? {
        Some(item) => Ok(item),
        None => Err(vm.key_error(Value::from("pop from an empty set"))),
    }
}

/// `set.clear()`
pub fn set_clear(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "clear", 0, 0)?;
    let this = set_ref(vm, &args, "clear")?;
    with_set(&this, Set::clear)?;
    Ok(Value::None)
}

/// `set.copy()`
pub fn set_copy(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "copy", 0, 0)?;
    let this = set_ref(vm, &args, "copy")?;
    let copy = with_set(&this, |members| members.clone())?;
    Ok(vm.new_set(copy))
}

/// `set.update(*iterables)`
pub fn set_update(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (this, own, others) = set_operands(vm, &args, "update")?;
    let merged = others.iter().fold(own, |acc, other| set_union(&acc, other));
    with_set(&this, |members| *members = merged)?;
    Ok(Value::None)
}

/// `set.union(*others)`
pub fn set_union_method(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (_, own, others) = set_operands(vm, &args, "union")?;
    let result = others.iter().fold(own, |acc, other| set_union(&acc, other));
    Ok(vm.new_set(result))
}

/// `set.intersection(*others)`
pub fn set_intersection_method(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (_, own, others) = set_operands(vm, &args, "intersection")?;
    let result = others.iter().fold(own, |acc, other| set_intersection(&acc, other));
    Ok(vm.new_set(result))
}

/// `set.difference(*others)`
pub fn set_difference_method(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (_, own, others) = set_operands(vm, &args, "difference")?;
    let result = others.iter().fold(own, |acc, other| set_difference(&acc, other));
    Ok(vm.new_set(result))
}

/// `set.symmetric_difference(other)`
pub fn set_symmetric_difference(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "symmetric_difference", 1, 1)?;
    let (_, own, others) = set_operands(vm, &args, "symmetric_difference")?;
    let other = &others[0];
    let result = set_union(&set_difference(&own, other), &set_difference(other, &own));
    Ok(vm.new_set(result))
}

/// `set.intersection_update(*others)`
pub fn set_intersection_update(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (this, own, others) = set_operands(vm, &args, "intersection_update")?;
    let result = others.iter().fold(own, |acc, other| set_intersection(&acc, other));
    with_set(&this, |members| *members = result)?;
    Ok(Value::None)
}

/// `set.difference_update(*others)`
pub fn set_difference_update(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (this, own, others) = set_operands(vm, &args, "difference_update")?;
    let result = others.iter().fold(own, |acc, other| set_difference(&acc, other));
    with_set(&this, |members| *members = result)?;
    Ok(Value::None)
}

fn set_relation(vm: &mut Vm, args: Args, method: &str, test: fn(&Set, &Set) -> bool) -> VmResult<Value> {
    check_method_arity(vm, &args, method, 1, 1)?;
    let (_, own, others) = set_operands(vm, &args, method)?;
    Ok(Value::Bool(test(&own, &others[0])))
}

/// `set.issubset(other)`
pub fn set_issubset(vm: &mut Vm, args: Args) -> VmResult<Value> {
    set_relation(vm, args, "issubset", |a, b| a.iter().all(|(key, _)| b.contains(key)))
}

/// `set.issuperset(other)`
pub fn set_issuperset(vm: &mut Vm, args: Args) -> VmResult<Value> {
    set_relation(vm, args, "issuperset", |a, b| b.iter().all(|(key, _)| a.contains(key)))
}

/// `set.isdisjoint(other)`
pub fn set_isdisjoint(vm: &mut Vm, args: Args) -> VmResult<Value> {
    set_relation(vm, args, "isdisjoint", |a, b| !a.iter().any(|(key, _)| b.contains(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_dict_from_pairs_and_keywords() {
        let mut vm = Vm::new(EngineConfig::default());
        let pair = vm.new_tuple(vec![Value::from("a"), Value::Int(1)]);
        let pairs = vm.new_list(vec![pair]);
        let args = Args::with_keywords(vec![pairs], vec![("b".into(), Value::Int(2))]);
        let dict = dict_new(&mut vm, args).unwrap();
        assert_eq!(vm.repr(&dict).unwrap(), "{'a': 1, 'b': 2}");
    }

    #[test]
    fn test_dict_update_element_length() {
        let mut vm = Vm::new(EngineConfig::default());
        let triple = vm.new_tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let pairs = vm.new_list(vec![triple]);
        match dict_new(&mut vm, Args::new(vec![pairs])) {
            Err(VmError::Exception(exc)) => assert_eq!(
                vm.describe_exception(&exc),
                "ValueError: dictionary update sequence element #0 has length 3; 2 is required"
            ),
            _ => panic!("expected ValueError"),
        }
    }

    #[test]
    fn test_pop_missing_key() {
        let mut vm = Vm::new(EngineConfig::default());
        let dict = vm.new_dict(Dict::new());
        match dict_pop(&mut vm, Args::new(vec![dict, Value::from("k")])) {
            Err(VmError::Exception(exc)) => assert_eq!(vm.describe_exception(&exc), "KeyError: 'k'"),
            _ => panic!("expected KeyError"),
        }
    }

    #[test]
    fn test_set_operations() {
        let mut vm = Vm::new(EngineConfig::default());
        let a = set_new(&mut vm, Args::new(vec![Value::from("abc")])).unwrap();
        let result = set_intersection_method(&mut vm, Args::new(vec![a.clone(), Value::from("bcd")])).unwrap();
        assert_eq!(vm.len(&result).unwrap(), 2);
        let subset = set_issubset(&mut vm, Args::new(vec![result, a])).unwrap();
        assert!(matches!(subset, Value::Bool(true)));
    }
}
