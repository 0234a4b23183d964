//! `list`, `tuple`, `range` and `slice`, plus `sorted` and `reversed`.

use std::cmp::Ordering;

use super::{check_arity, check_method_arity, receiver, take_keywords, MethodTable};
use crate::runtime::object::{Range, Slice};
use crate::runtime::{Args, IterState, ObjRef, ObjectKind, Value};
use crate::vm::{Vm, VmError, VmResult};

// ============================================================================
// Constructors
// ============================================================================

/// `list(iterable=())`
pub fn list_new(vm: &mut Vm, args: Args) -> VmResult<Value> {
    super::no_keywords(vm, &args, "list")?;
    check_arity(vm, &args, "list", 0, 1)?;
    let items = match args.positional.first() {
        Some(iterable) => vm.collect(iterable)?,
        None => Vec::new(),
    };
    Ok(vm.new_list(items))
}

/// `tuple(iterable=())`
pub fn tuple_new(vm: &mut Vm, args: Args) -> VmResult<Value> {
    super::no_keywords(vm, &args, "tuple")?;
    check_arity(vm, &args, "tuple", 0, 1)?;
    match args.positional.first() {
        Some(value) if vm.type_of(value).ptr_eq(&vm.types().tuple) => Ok(value.clone()),
        Some(iterable) => {
            let items = vm.collect(iterable)?;
            Ok(vm.new_tuple(items))
        }
        None => Ok(vm.new_tuple(Vec::new())),
    }
}

/// `range(stop)` or `range(start, stop[, step])`
pub fn range_new(vm: &mut Vm, args: Args) -> VmResult<Value> {
    super::no_keywords(vm, &args, "range")?;
    check_arity(vm, &args, "range", 1, 3)?;
    let mut bounds = Vec::with_capacity(3);
    for value in &args.positional {
        bounds.push(vm.index_value(value)?);
    }
    let range = match bounds.as_slice() {
        [stop] => Range { start: 0, stop: *stop, step: 1 },
        [start, stop] => Range { start: *start, stop: *stop, step: 1 },
        [start, stop, step] => {
            if *step == 0 {
                return Err(vm.value_error("range() arg 3 must not be zero"));
            }
            Range { start: *start, stop: *stop, step: *step }
        }
        _ => return Err(VmError::internal("range arity")),
    };
    let class = vm.types().range.clone();
    Ok(vm.alloc(ObjectKind::Range(range), &class))
}

/// `slice(stop)` or `slice(start, stop[, step])`
pub fn slice_new(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "slice", 1, 3)?;
    let slice = match args.positional.as_slice() {
        [stop] => Slice {
            start: Value::None,
            stop: stop.clone(),
            step: Value::None,
        },
        [start, stop] => Slice {
            start: start.clone(),
            stop: stop.clone(),
            step: Value::None,
        },
        [start, stop, step] => Slice {
            start: start.clone(),
            stop: stop.clone(),
            step: step.clone(),
        },
        _ => return Err(VmError::internal("slice arity")),
    };
    let class = vm.types().slice.clone();
    Ok(vm.alloc(ObjectKind::Slice(slice), &class))
}

// ============================================================================
// list
// ============================================================================

/// Methods of `list`.
pub const LIST_METHODS: MethodTable = &[
    ("__init__", list_init),
    ("append", list_append),
    ("extend", list_extend),
    ("insert", list_insert),
    ("pop", list_pop),
    ("remove", list_remove),
    ("index", sequence_index),
    ("count", sequence_count),
    ("clear", list_clear),
    ("copy", list_copy),
    ("reverse", list_reverse),
    ("sort", list_sort),
];

fn list_ref(vm: &mut Vm, args: &Args, method: &str) -> VmResult<ObjRef> {
    let this = receiver(vm, args, method)?;
    if let Value::Object(obj) = &this {
        if matches!(obj.read().kind, ObjectKind::List(_)) {
            return Ok(obj.clone());
        }
    }
    Err(super::wrong_receiver(vm, method, "list", &this))
}

/// Runs `f` on the list's items under the write lock. `f` must not call
/// back into the VM.
fn with_items<R>(list: &ObjRef, f: impl FnOnce(&mut Vec<Value>) -> R) -> Option<R> {
    match &mut list.write().kind {
        ObjectKind::List(items) => Some(f(items)),
        _ => None,
    }
}

/// The items of a list or tuple, copied out.
fn items_of(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Object(obj) => match &obj.read().kind {
            ObjectKind::List(items) | ObjectKind::Tuple(items) => Some(items.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// `list.__init__(self, iterable=())`: replaces the contents.
pub fn list_init(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "list", 0, 1)?;
    let list = list_ref(vm, &args, "__init__")?;
    let items = match args.positional.get(1) {
        Some(iterable) => vm.collect(iterable)?,
        None => Vec::new(),
    };
    with_items(&list, |current| *current = items);
    Ok(Value::None)
}

/// `list.append(x)`
pub fn list_append(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "append", 1, 1)?;
    let list = list_ref(vm, &args, "append")?;
    let item = args.positional[1].clone();
    with_items(&list, |items| items.push(item));
    Ok(Value::None)
}

/// `list.extend(iterable)`
pub fn list_extend(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "extend", 1, 1)?;
    let list = list_ref(vm, &args, "extend")?;
    let extra = vm.collect(&args.positional[1])?;
    with_items(&list, |items| items.extend(extra));
    Ok(Value::None)
}

/// `list.insert(index, x)`: the index is clamped to the list bounds.
pub fn list_insert(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "insert", 2, 2)?;
    let list = list_ref(vm, &args, "insert")?;
    let index = vm.index_value(&args.positional[1])?;
    let item = args.positional[2].clone();
    with_items(&list, |items| {
        let len = items.len() as i64;
        let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
        items.insert(at as usize, item);
    });
    Ok(Value::None)
}

/// `list.pop(index=-1)`
pub fn list_pop(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "pop", 0, 1)?;
    let list = list_ref(vm, &args, "pop")?;
    let index = match args.positional.get(1) {
        Some(value) => vm.index_value(value)?,
        None => -1,
    };
    let popped = with_items(&list, |items| {
        if items.is_empty() {
            return Err("pop from empty list");
        }
        let len = items.len() as i64;
        let at = if index < 0 { index + len } else { index };
        if at < 0 || at >= len {
            return Err("pop index out of range");
        }
        Ok(items.remove(at as usize))
    });
    match popped {
        Some(Ok(item)) => Ok(item),
        Some(Err(message)) => Err(vm.index_error(message)),
        None => Err(VmError::internal("list payload changed type")),
    }
}

/// Position of the first item equal to `target` in `items[start..end]`.
fn position(vm: &mut Vm, items: &[Value], target: &Value, start: usize, end: usize) -> VmResult<Option<usize>> {
    for (i, item) in items.iter().enumerate().take(end).skip(start) {
        if item.is(target) || vm.equals(item, target)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// `list.remove(x)`
pub fn list_remove(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "remove", 1, 1)?;
    let list = list_ref(vm, &args, "remove")?;
    let target = args.positional[1].clone();
    let items = items_of(&args.positional[0]).unwrap_or_default();
    match position(vm, &items, &target, 0, items.len())? {
        Some(i) => {
            with_items(&list, |current| {
                if i < current.len() {
                    current.remove(i);
                }
            });
            Ok(Value::None)
        }
        None => Err(vm.value_error("list.remove(x): x not in list")),
    }
}

fn bound_index(value: Option<i64>, len: usize, default: usize) -> usize {
    match value {
        None => default,
        Some(i) if i < 0 => (i + len as i64).max(0) as usize,
        Some(i) => (i as usize).min(len),
    }
}

/// `seq.index(x[, start[, end]])` for lists and tuples.
pub fn sequence_index(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "index", 1, 3)?;
    let this = receiver(vm, &args, "index")?;
    let items = match items_of(&this) {
        Some(items) => items,
        None => return Err(super::wrong_receiver(vm, "index", "list", &this)),
    };
    let mut bounds = [None, None];
    for (slot, value) in bounds.iter_mut().zip(args.positional.iter().skip(2)) {
        *slot = Some(vm.index_value(value)?);
    }
    let start = bound_index(bounds[0], items.len(), 0);
    let end = bound_index(bounds[1], items.len(), items.len());
    let target = args.positional[1].clone();
    match position(vm, &items, &target, start, end)? {
        Some(i) => Ok(Value::Int(i as i64)),
        None => {
            let kind = vm.type_name(&this);
            let shown = vm.repr(&target)?;
            Err(vm.value_error(format!("{} is not in {}", shown, kind)))
        }
    }
}

/// `seq.count(x)` for lists and tuples.
pub fn sequence_count(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "count", 1, 1)?;
    let this = receiver(vm, &args, "count")?;
    let items = match items_of(&this) {
        Some(items) => items,
        None => return Err(super::wrong_receiver(vm, "count", "list", &this)),
    };
    let target = &args.positional[1];
    let mut count = 0;
    for item in &items {
        if item.is(target) || vm.equals(item, target)? {
            count += 1;
        }
    }
    Ok(Value::Int(count))
}

/// `list.clear()`
pub fn list_clear(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "clear", 0, 0)?;
    let list = list_ref(vm, &args, "clear")?;
    with_items(&list, Vec::clear);
    Ok(Value::None)
}

/// `list.copy()`: a shallow copy.
pub fn list_copy(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "copy", 0, 0)?;
    let list = list_ref(vm, &args, "copy")?;
    let items = with_items(&list, |items| items.clone()).unwrap_or_default();
    Ok(vm.new_list(items))
}

/// `list.reverse()`: in place.
pub fn list_reverse(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "reverse", 0, 0)?;
    let list = list_ref(vm, &args, "reverse")?;
    with_items(&list, |items| items.reverse());
    Ok(Value::None)
}

/// `list.sort(*, key=None, reverse=False)`: stable, in place.
pub fn list_sort(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let keywords = take_keywords(vm, &mut args, "sort", &["key", "reverse"])?;
    if args.positional.len() > 1 {
        return Err(vm.type_error("sort() takes no positional arguments"));
    }
    let list = list_ref(vm, &args, "sort")?;
    let items = with_items(&list, |items| items.clone()).unwrap_or_default();
    let sorted = sort_values(vm, items, keywords[0].clone(), keywords[1].clone())?;
    with_items(&list, |items| *items = sorted);
    Ok(Value::None)
}

/// Sorts `items` with `<`, optionally through `key`. Reversal keeps equal
/// items in their original order.
pub(crate) fn sort_values(
    vm: &mut Vm,
    mut items: Vec<Value>,
    key: Option<Value>,
    reverse: Option<Value>,
) -> VmResult<Vec<Value>> {
    let reverse = match reverse {
        Some(flag) => vm.truthy(&flag)?,
        None => false,
    };
    if reverse {
        items.reverse();
    }
    let keys = match key {
        Some(key) if !key.is_none() => {
            let mut keys = Vec::with_capacity(items.len());
            for item in &items {
                keys.push(vm.call(&key, Args::new(vec![item.clone()]))?);
            }
            keys
        }
        _ => items.clone(),
    };

    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure: Option<VmError> = None;
    order.sort_by(|&a, &b| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        let mut less = |x: &Value, y: &Value| match vm.less_than(x, y) {
            Ok(result) => result,
            Err(err) => {
                failure.get_or_insert(err);
                false
            }
        };
        if less(&keys[a], &keys[b]) {
            Ordering::Less
        } else if less(&keys[b], &keys[a]) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }

    let mut sorted: Vec<Value> = order.into_iter().map(|i| items[i].clone()).collect();
    if reverse {
        sorted.reverse();
    }
    Ok(sorted)
}

// ============================================================================
// tuple / range
// ============================================================================

/// Methods of `tuple`.
pub const TUPLE_METHODS: MethodTable = &[("index", sequence_index), ("count", sequence_count)];

/// Methods of `range`.
pub const RANGE_METHODS: MethodTable = &[("index", range_index), ("count", range_count)];

fn range_of(vm: &mut Vm, args: &Args, method: &str) -> VmResult<Range> {
    let this = receiver(vm, args, method)?;
    if let Value::Object(obj) = &this {
        if let ObjectKind::Range(range) = &obj.read().kind {
            return Ok(*range);
        }
    }
    Err(super::wrong_receiver(vm, method, "range", &this))
}

/// `range.index(x)`
pub fn range_index(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "index", 1, 1)?;
    let range = range_of(vm, &args, "index")?;
    match args.positional[1].as_i64().filter(|_| args.positional[1].is_int()) {
        Some(n) if range.contains(n) => Ok(Value::Int((n - range.start) / range.step)),
        _ => {
            let shown = vm.repr(&args.positional[1])?;
            Err(vm.value_error(format!("{} is not in range", shown)))
        }
    }
}

/// `range.count(x)`
pub fn range_count(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "count", 1, 1)?;
    let range = range_of(vm, &args, "count")?;
    let target = &args.positional[1];
    let found = match target {
        Value::Float(x) if x.fract() == 0.0 => range.contains(*x as i64),
        other => other.is_int() && other.as_i64().is_some_and(|n| range.contains(n)),
    };
    Ok(Value::Int(found as i64))
}

// ============================================================================
// sorted / reversed
// ============================================================================

/// `sorted(iterable, *, key=None, reverse=False)`
pub fn builtin_sorted(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let keywords = take_keywords(vm, &mut args, "sorted", &["key", "reverse"])?;
    check_arity(vm, &args, "sorted", 1, 1)?;
    let items = vm.collect(&args.positional[0])?;
    let sorted = sort_values(vm, items, keywords[0].clone(), keywords[1].clone())?;
    Ok(vm.new_list(sorted))
}

/// `reversed(seq)`
pub fn builtin_reversed(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "reversed", 1, 1)?;
    let seq = args.positional[0].clone();
    if vm.user_class(&seq).is_some() {
        if let Some(result) = vm.call_special(&seq, "__reversed__", vec![])? {
            return Ok(result);
        }
    }
    if let Value::Str(text) = &seq {
        let chars = text.chars().rev().map(|c| Value::from(c.to_string())).collect();
        return Ok(vm.snapshot_iter(chars));
    }
    if let Some(mut items) = items_of(&seq) {
        items.reverse();
        return Ok(vm.snapshot_iter(items));
    }
    if let Value::Object(obj) = &seq {
        let range = match &obj.read().kind {
            ObjectKind::Range(range) => Some(*range),
            _ => None,
        };
        if let Some(range) = range {
            let len = range.len();
            let last = if len == 0 { range.start } else { range.at(len - 1) };
            return Ok(vm.new_iterator(IterState::Range {
                next: last,
                remaining: len,
                step: -range.step,
            }));
        }
    }
    if vm.user_class(&seq).is_some()
        && vm.special_method(&seq, "__len__")?.is_some()
        && vm.special_method(&seq, "__getitem__")?.is_some()
    {
        let len = vm.len(&seq)?;
        let mut items = Vec::with_capacity(len);
        for i in (0..len).rev() {
            items.push(vm.get_item(&seq, &Value::Int(i as i64))?);
        }
        return Ok(vm.snapshot_iter(items));
    }
    let type_name = vm.type_name(&seq);
    Err(vm.type_error(format!("'{}' object is not reversible", type_name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|n| Value::Int(*n)).collect()
    }

    fn as_ints(values: &[Value]) -> Vec<i64> {
        values.iter().filter_map(Value::as_i64).collect()
    }

    #[test]
    fn test_sort_is_stable_under_reverse() {
        let mut vm = Vm::new(EngineConfig::default());
        let pairs: Vec<Value> = [(1, 0), (0, 1), (1, 2), (0, 3)]
            .iter()
            .map(|(k, tag)| vm.new_tuple(vec![Value::Int(*k), Value::Int(*tag)]))
            .collect();
        let key = vm.new_native("key", |vm, args| vm.get_item(&args.positional[0], &Value::Int(0)));
        let sorted = sort_values(&mut vm, pairs, Some(key), Some(Value::Bool(true))).unwrap();
        let tags: Vec<i64> = sorted
            .iter()
            .map(|pair| items_of(pair).unwrap()[1].as_i64().unwrap())
            .collect();
        assert_eq!(tags, vec![0, 2, 1, 3]);
    }

    #[test]
    fn test_sort_reports_incomparable_items() {
        let mut vm = Vm::new(EngineConfig::default());
        let items = vec![Value::Int(1), Value::from("a")];
        match sort_values(&mut vm, items, None, None) {
            Err(VmError::Exception(exc)) => assert_eq!(
                vm.describe_exception(&exc),
                "TypeError: '<' not supported between instances of 'str' and 'int'"
            ),
            _ => panic!("expected TypeError"),
        }
    }

    #[test]
    fn test_pop_and_insert() {
        let mut vm = Vm::new(EngineConfig::default());
        let list = vm.new_list(ints(&[1, 2, 3]));
        let popped = list_pop(&mut vm, Args::new(vec![list.clone()])).unwrap();
        assert!(matches!(popped, Value::Int(3)));
        list_insert(&mut vm, Args::new(vec![list.clone(), Value::Int(-100), Value::Int(0)])).unwrap();
        assert_eq!(as_ints(&items_of(&list).unwrap()), vec![0, 1, 2]);
        let empty = vm.new_list(Vec::new());
        match list_pop(&mut vm, Args::new(vec![empty])) {
            Err(VmError::Exception(exc)) => {
                assert_eq!(vm.describe_exception(&exc), "IndexError: pop from empty list")
            }
            _ => panic!("expected IndexError"),
        }
    }

    #[test]
    fn test_reversed_range() {
        let mut vm = Vm::new(EngineConfig::default());
        let range = range_new(&mut vm, Args::new(ints(&[1, 10, 3]))).unwrap();
        let iter = builtin_reversed(&mut vm, Args::new(vec![range])).unwrap();
        assert_eq!(as_ints(&vm.collect(&iter).unwrap()), vec![7, 4, 1]);
    }

    #[test]
    fn test_index_message() {
        let mut vm = Vm::new(EngineConfig::default());
        let list = vm.new_list(ints(&[1]));
        match sequence_index(&mut vm, Args::new(vec![list, Value::Int(5)])) {
            Err(VmError::Exception(exc)) => {
                assert_eq!(vm.describe_exception(&exc), "ValueError: 5 is not in list")
            }
            _ => panic!("expected ValueError"),
        }
    }
}
