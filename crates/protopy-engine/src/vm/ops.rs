//! Operators, comparisons, membership and subscripts.
//!
//! Every binary operator tries the left operand's dunder, then the right
//! operand's reflected dunder, then the native implementation for builtin
//! types. A dunder returning `NotImplemented` counts as absent.

use std::cmp::Ordering;

use super::arith::{self, ArithError};
use super::interpreter::ascii_escape;
use super::{Vm, VmError, VmResult};
use crate::builtins::format::{self, PercentPiece};
use crate::builtins::ExceptionKind;
use crate::compiler::CompareOp;
use crate::runtime::object::{ObjectKind, Range, Slice};
use crate::runtime::{Dict, ObjRef, Set, Value};

/// A binary arithmetic or bitwise operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    TrueDiv,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
    /// `**`
    Pow,
    /// `<<`
    LShift,
    /// `>>`
    RShift,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
}

impl BinOp {
    /// The operator as error messages spell it.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::TrueDiv => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "** or pow()",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
        }
    }

    fn stem(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::TrueDiv => "truediv",
            BinOp::FloorDiv => "floordiv",
            BinOp::Mod => "mod",
            BinOp::Pow => "pow",
            BinOp::LShift => "lshift",
            BinOp::RShift => "rshift",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        }
    }

    /// `__add__`
    pub fn dunder(self) -> String {
        format!("__{}__", self.stem())
    }

    /// `__radd__`
    pub fn reflected(self) -> String {
        format!("__r{}__", self.stem())
    }

    /// `__iadd__`
    pub fn inplace(self) -> String {
        format!("__i{}__", self.stem())
    }
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `+x`
    Pos,
    /// `-x`
    Neg,
    /// `~x`
    Invert,
}

impl UnaryOp {
    fn dunder(self) -> &'static str {
        match self {
            UnaryOp::Pos => "__pos__",
            UnaryOp::Neg => "__neg__",
            UnaryOp::Invert => "__invert__",
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Pos => "+",
            UnaryOp::Neg => "-",
            UnaryOp::Invert => "~",
        }
    }
}

fn compare_symbol(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "==",
        CompareOp::Ne => "!=",
        CompareOp::Lt => "<",
        CompareOp::Le => "<=",
        CompareOp::Gt => ">",
        CompareOp::Ge => ">=",
        CompareOp::In => "in",
        CompareOp::NotIn => "not in",
        CompareOp::Is => "is",
        CompareOp::IsNot => "is not",
    }
}

/// The dunder for a rich comparison and its reflection.
fn compare_dunders(op: CompareOp) -> (&'static str, &'static str) {
    match op {
        CompareOp::Eq => ("__eq__", "__eq__"),
        CompareOp::Ne => ("__ne__", "__ne__"),
        CompareOp::Lt => ("__lt__", "__gt__"),
        CompareOp::Le => ("__le__", "__ge__"),
        CompareOp::Gt => ("__gt__", "__lt__"),
        _ => ("__ge__", "__le__"),
    }
}

fn ordering_holds(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Eq => ordering == Ordering::Equal,
        _ => ordering != Ordering::Equal,
    }
}

/// A snapshot of a list's or tuple's items, with the kind's name.
fn sequence_items(value: &Value) -> Option<(&'static str, Vec<Value>)> {
    match value {
        Value::Object(obj) => match &obj.read().kind {
            ObjectKind::List(items) => Some(("list", items.clone())),
            ObjectKind::Tuple(items) => Some(("tuple", items.clone())),
            _ => None,
        },
        _ => None,
    }
}

fn set_members(value: &Value) -> Option<Set> {
    match value {
        Value::Object(obj) => match &obj.read().kind {
            ObjectKind::Set(set) => Some(set.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn dict_entries(value: &Value) -> Option<Dict> {
    match value {
        Value::Object(obj) => match &obj.read().kind {
            ObjectKind::Dict(dict) => Some(dict.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn slice_of(value: &Value) -> Option<Slice> {
    match value {
        Value::Object(obj) => match &obj.read().kind {
            ObjectKind::Slice(slice) => Some(slice.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// The positions a resolved slice selects.
fn slice_positions(start: i64, stop: i64, step: i64) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        positions.push(i as usize);
        i += step;
    }
    positions
}

impl Vm {
    fn arith_error(&mut self, error: ArithError) -> VmError {
        match error {
            ArithError::ZeroDivision(message) => self.error(ExceptionKind::ZeroDivisionError, message),
            ArithError::Overflow(message) => self.error(ExceptionKind::OverflowError, message),
            ArithError::Domain(message) => self.value_error(message),
        }
    }

    /// Calls `name` on a user-class operand. `None` when the operand has no
    /// such method or it returned `NotImplemented`.
    fn try_dunder(&mut self, receiver: &Value, name: &str, args: Vec<Value>) -> VmResult<Option<Value>> {
        if self.user_class(receiver).is_none() {
            return Ok(None);
        }
        match self.call_special(receiver, name, args)? {
            Some(Value::NotImplemented) | None => Ok(None),
            Some(result) => Ok(Some(result)),
        }
    }

    /// `lhs <op> rhs`.
    pub fn binary_op(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> VmResult<Value> {
        if let Some(result) = self.try_dunder(lhs, &op.dunder(), vec![rhs.clone()])? {
            return Ok(result);
        }
        if !self.type_of(lhs).ptr_eq(&self.type_of(rhs)) {
            if let Some(result) = self.try_dunder(rhs, &op.reflected(), vec![lhs.clone()])? {
                return Ok(result);
            }
        }
        if let Some(result) = self.native_binary(op, lhs, rhs)? {
            return Ok(result);
        }
        let (a, b) = (self.type_name(lhs), self.type_name(rhs));
        Err(self.type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            a,
            b
        )))
    }

    fn native_binary(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> VmResult<Option<Value>> {
        if let Some(result) = arith::binary(op, lhs, rhs) {
            return result.map(Some).map_err(|e| self.arith_error(e));
        }
        match (op, lhs, rhs) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Some(Value::from(format!("{}{}", a, b)))),
            (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.is_int() => {
                let count = n.as_i64().unwrap_or(0).max(0) as usize;
                return Ok(Some(Value::from(s.repeat(count))));
            }
            (BinOp::Mod, Value::Str(template), args) => {
                let text = self.percent_format(template, args)?;
                return Ok(Some(Value::from(text)));
            }
            _ => {}
        }
        if let (Some((lkind, litems)), Some((rkind, ritems))) = (sequence_items(lhs), sequence_items(rhs)) {
            if op == BinOp::Add && lkind == rkind {
                let mut items = litems;
                items.extend(ritems);
                return Ok(Some(self.new_sequence(lkind, items)));
            }
            return Ok(None);
        }
        if op == BinOp::Mul {
            let repeated = match (sequence_items(lhs), sequence_items(rhs)) {
                (Some((kind, items)), None) if rhs.is_int() => Some((kind, items, rhs)),
                (None, Some((kind, items))) if lhs.is_int() => Some((kind, items, lhs)),
                _ => None,
            };
            if let Some((kind, items, count)) = repeated {
                let count = count.as_i64().unwrap_or(0).max(0) as usize;
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend(items.iter().cloned());
                }
                return Ok(Some(self.new_sequence(kind, out)));
            }
        }
        if let (Some(a), Some(b)) = (set_members(lhs), set_members(rhs)) {
            let result = match op {
                BinOp::Sub => set_difference(&a, &b),
                BinOp::And => set_intersection(&a, &b),
                BinOp::Or => set_union(&a, &b),
                BinOp::Xor => set_union(&set_difference(&a, &b), &set_difference(&b, &a)),
                _ => return Ok(None),
            };
            return Ok(Some(self.new_set(result)));
        }
        if op == BinOp::Or {
            if let (Some(mut a), Some(b)) = (dict_entries(lhs), dict_entries(rhs)) {
                for (key, (original, value)) in b.iter() {
                    a.insert(key.clone(), original.clone(), value.clone());
                }
                return Ok(Some(self.new_dict(a)));
            }
        }
        Ok(None)
    }

    fn new_sequence(&self, kind: &str, items: Vec<Value>) -> Value {
        if kind == "tuple" {
            self.new_tuple(items)
        } else {
            self.new_list(items)
        }
    }

    /// `lhs <op>= rhs`: mutates lists, sets and dicts in place, otherwise
    /// falls back to the binary operator.
    pub fn inplace_op(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> VmResult<Value> {
        if let Some(result) = self.try_dunder(lhs, &op.inplace(), vec![rhs.clone()])? {
            return Ok(result);
        }
        if let Value::Object(target) = lhs {
            let kind = match &target.read().kind {
                ObjectKind::List(_) => "list",
                ObjectKind::Set(_) => "set",
                ObjectKind::Dict(_) => "dict",
                _ => "",
            };
            match (kind, op) {
                ("list", BinOp::Add) => {
                    let items = self.collect(rhs)?;
                    if let ObjectKind::List(list) = &mut target.write().kind {
                        list.extend(items);
                    }
                    return Ok(lhs.clone());
                }
                ("list", BinOp::Mul) if rhs.is_int() => {
                    let count = rhs.as_i64().unwrap_or(0).max(0) as usize;
                    if let ObjectKind::List(list) = &mut target.write().kind {
                        let original = std::mem::take(list);
                        for _ in 0..count {
                            list.extend(original.iter().cloned());
                        }
                    }
                    return Ok(lhs.clone());
                }
                ("set", BinOp::Sub | BinOp::And | BinOp::Or | BinOp::Xor) => {
                    if let Some(Value::Object(result)) = self.native_binary(op, lhs, rhs)? {
                        let updated = match &result.read().kind {
                            ObjectKind::Set(set) => set.clone(),
                            _ => Set::new(),
                        };
                        if let ObjectKind::Set(set) = &mut target.write().kind {
                            *set = updated;
                        }
                        return Ok(lhs.clone());
                    }
                }
                ("dict", BinOp::Or) => {
                    let entries = self.mapping_items(rhs)?;
                    let mut hashed = Vec::with_capacity(entries.len());
                    for (key, value) in entries {
                        hashed.push((self.hash_key(&key)?, key, value));
                    }
                    if let ObjectKind::Dict(dict) = &mut target.write().kind {
                        for (projection, key, value) in hashed {
                            dict.insert(projection, key, value);
                        }
                    }
                    return Ok(lhs.clone());
                }
                _ => {}
            }
        }
        self.binary_op(op, lhs, rhs).map_err(|err| self.rename_inplace_error(err, op, lhs, rhs))
    }

    fn rename_inplace_error(&mut self, err: VmError, op: BinOp, lhs: &Value, rhs: &Value) -> VmError {
        match &err {
            VmError::Exception(exc) if self.exception_is(exc, ExceptionKind::TypeError) => {
                let message = self.to_str(exc).unwrap_or_default();
                if message.starts_with("unsupported operand type(s)") {
                    let (a, b) = (self.type_name(lhs), self.type_name(rhs));
                    let symbol = if op == BinOp::Pow { "**=".to_string() } else { format!("{}=", op.symbol()) };
                    return self.type_error(format!(
                        "unsupported operand type(s) for {}: '{}' and '{}'",
                        symbol, a, b
                    ));
                }
                err
            }
            _ => err,
        }
    }

    /// `+x`, `-x`, `~x`.
    pub fn unary_op(&mut self, op: UnaryOp, operand: &Value) -> VmResult<Value> {
        if let Some(result) = self.try_dunder(operand, op.dunder(), vec![])? {
            return Ok(result);
        }
        if let Some(result) = arith::unary(op, operand) {
            return Ok(result);
        }
        let type_name = self.type_name(operand);
        Err(self.type_error(format!("bad operand type for unary {}: '{}'", op.symbol(), type_name)))
    }

    // ===== Comparisons =====

    /// `lhs <op> rhs` for every comparison operator.
    pub fn compare(&mut self, op: CompareOp, lhs: &Value, rhs: &Value) -> VmResult<Value> {
        match op {
            CompareOp::Is => Ok(Value::Bool(lhs.is(rhs))),
            CompareOp::IsNot => Ok(Value::Bool(!lhs.is(rhs))),
            CompareOp::In => Ok(Value::Bool(self.contains(rhs, lhs)?)),
            CompareOp::NotIn => Ok(Value::Bool(!self.contains(rhs, lhs)?)),
            _ => self.rich_compare(op, lhs, rhs),
        }
    }

    fn rich_compare(&mut self, op: CompareOp, lhs: &Value, rhs: &Value) -> VmResult<Value> {
        let (name, reflected) = compare_dunders(op);
        if let Some(result) = self.try_dunder(lhs, name, vec![rhs.clone()])? {
            return Ok(result);
        }
        if let Some(result) = self.try_dunder(rhs, reflected, vec![lhs.clone()])? {
            return Ok(result);
        }
        match op {
            CompareOp::Eq => Ok(Value::Bool(self.equals(lhs, rhs)?)),
            CompareOp::Ne => Ok(Value::Bool(!self.equals(lhs, rhs)?)),
            _ => self.native_order(op, lhs, rhs).map(Value::Bool),
        }
    }

    /// `lhs == rhs` as a bool.
    pub fn equals(&mut self, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        if self.user_class(lhs).is_some() || self.user_class(rhs).is_some() {
            if let Some(result) = self.try_dunder(lhs, "__eq__", vec![rhs.clone()])? {
                return self.truthy(&result);
            }
            if let Some(result) = self.try_dunder(rhs, "__eq__", vec![lhs.clone()])? {
                return self.truthy(&result);
            }
        }
        if lhs.is_number() && rhs.is_number() {
            return Ok(arith::compare(lhs, rhs) == Some(Ordering::Equal));
        }
        match (lhs, rhs) {
            (Value::Str(a), Value::Str(b)) => return Ok(a == b),
            (Value::Object(a), Value::Object(b)) if a.ptr_eq(b) => {
                if sequence_items(lhs).is_none() {
                    return Ok(true);
                }
            }
            _ => {}
        }
        if let (Some((lkind, a)), Some((rkind, b))) = (sequence_items(lhs), sequence_items(rhs)) {
            if lkind != rkind || a.len() != b.len() {
                return Ok(false);
            }
            for (x, y) in a.iter().zip(b.iter()) {
                if !x.is(y) && !self.equals(x, y)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        if let (Some(a), Some(b)) = (dict_entries(lhs), dict_entries(rhs)) {
            if a.len() != b.len() {
                return Ok(false);
            }
            for (key, (_, value)) in a.iter() {
                let other = match b.get(key) {
                    Some(other) => other.clone(),
                    None => return Ok(false),
                };
                if !value.is(&other) && !self.equals(value, &other)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        if let (Some(a), Some(b)) = (set_members(lhs), set_members(rhs)) {
            return Ok(a.len() == b.len() && a.iter().all(|(key, _)| b.contains(key)));
        }
        if let (Some(a), Some(b)) = (range_of(lhs), range_of(rhs)) {
            let (la, lb) = (a.len(), b.len());
            return Ok(la == lb && (la == 0 || (a.start == b.start && (la == 1 || a.step == b.step))));
        }
        Ok(lhs.is(rhs))
    }

    /// `lhs < rhs` as a bool; the ordering `sorted`, `min` and `max` use.
    pub fn less_than(&mut self, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        let result = self.rich_compare(CompareOp::Lt, lhs, rhs)?;
        self.truthy(&result)
    }

    fn native_order(&mut self, op: CompareOp, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        if lhs.is_number() && rhs.is_number() {
            return Ok(arith::compare(lhs, rhs).is_some_and(|ordering| ordering_holds(op, ordering)));
        }
        if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
            return Ok(ordering_holds(op, a.as_ref().cmp(b.as_ref())));
        }
        if let (Some((lkind, a)), Some((rkind, b))) = (sequence_items(lhs), sequence_items(rhs)) {
            if lkind == rkind {
                for (x, y) in a.iter().zip(b.iter()) {
                    if !x.is(y) && !self.equals(x, y)? {
                        let result = self.rich_compare(op, x, y)?;
                        return self.truthy(&result);
                    }
                }
                return Ok(ordering_holds(op, a.len().cmp(&b.len())));
            }
        }
        if let (Some(a), Some(b)) = (set_members(lhs), set_members(rhs)) {
            let subset = a.iter().all(|(key, _)| b.contains(key));
            let superset = b.iter().all(|(key, _)| a.contains(key));
            return Ok(match op {
                CompareOp::Lt => subset && a.len() < b.len(),
                CompareOp::Le => subset,
                CompareOp::Gt => superset && a.len() > b.len(),
                _ => superset,
            });
        }
        let (a, b) = (self.type_name(lhs), self.type_name(rhs));
        Err(self.type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            compare_symbol(op),
            a,
            b
        )))
    }

    /// `item in container`.
    pub fn contains(&mut self, container: &Value, item: &Value) -> VmResult<bool> {
        if let Some(result) = self.try_dunder(container, "__contains__", vec![item.clone()])? {
            return self.truthy(&result);
        }
        match container {
            Value::Str(text) => {
                return match item {
                    Value::Str(needle) => Ok(text.contains(needle.as_ref())),
                    other => {
                        let type_name = self.type_name(other);
                        Err(self.type_error(format!(
                            "'in <string>' requires string as left operand, not {}",
                            type_name
                        )))
                    }
                };
            }
            Value::Object(obj) => {
                enum Membership {
                    Items(Vec<Value>),
                    Keyed,
                    Range(Range),
                    Iterate,
                }
                let membership = {
                    let guard = obj.read();
                    match &guard.kind {
                        ObjectKind::List(items) | ObjectKind::Tuple(items) => Membership::Items(items.clone()),
                        ObjectKind::Dict(_) | ObjectKind::Set(_) => Membership::Keyed,
                        ObjectKind::Range(range) => Membership::Range(*range),
                        _ => Membership::Iterate,
                    }
                };
                match membership {
                    Membership::Items(items) => {
                        for candidate in &items {
                            if candidate.is(item) || self.equals(candidate, item)? {
                                return Ok(true);
                            }
                        }
                        return Ok(false);
                    }
                    Membership::Keyed => {
                        let key = self.hash_key(item)?;
                        let guard = obj.read();
                        return Ok(match &guard.kind {
                            ObjectKind::Dict(dict) => dict.contains(&key),
                            ObjectKind::Set(set) => set.contains(&key),
                            _ => false,
                        });
                    }
                    Membership::Range(range) => {
                        return Ok(match item {
                            Value::Bool(_) | Value::Int(_) => range.contains(item.as_i64().unwrap_or(0)),
                            Value::Float(x) if x.fract() == 0.0 && x.is_finite() => range.contains(*x as i64),
                            _ => false,
                        });
                    }
                    Membership::Iterate => {}
                }
            }
            _ => {}
        }
        let iter = match self.get_iter(container) {
            Ok(iter) => iter,
            Err(VmError::Exception(exc)) if self.exception_is(&exc, ExceptionKind::TypeError) => {
                let type_name = self.type_name(container);
                return Err(self.type_error(format!("argument of type '{}' is not iterable", type_name)));
            }
            Err(err) => return Err(err),
        };
        while let Some(candidate) = self.next(&iter)? {
            if candidate.is(item) || self.equals(&candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ===== Subscripts =====

    /// Resolves `slice` against a sequence of `len` items into
    /// `(start, stop, step)` positions.
    pub(crate) fn slice_indices(&mut self, slice: &Slice, len: usize) -> VmResult<(i64, i64, i64)> {
        let len = len as i64;
        let step = if slice.step.is_none() { 1 } else { self.index_value(&slice.step)? };
        if step == 0 {
            return Err(self.value_error("slice step cannot be zero"));
        }
        let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
        let bound = |vm: &mut Vm, value: &Value, default: i64| -> VmResult<i64> {
            if value.is_none() {
                return Ok(default);
            }
            let mut n = vm.index_value(value)?;
            if n < 0 {
                n += len;
            }
            Ok(n.clamp(lower, upper))
        };
        let start = bound(self, &slice.start, if step > 0 { lower } else { upper })?;
        let stop = bound(self, &slice.stop, if step > 0 { upper } else { lower })?;
        Ok((start, stop, step))
    }

    fn sequence_index(&mut self, index: &Value, len: usize, kind: &str) -> VmResult<usize> {
        if !index.is_int() && self.user_class(index).is_none() {
            let type_name = self.type_name(index);
            return Err(self.type_error(format!(
                "{} indices must be integers or slices, not {}",
                kind, type_name
            )));
        }
        let mut n = self.index_value(index)?;
        if n < 0 {
            n += len as i64;
        }
        if n < 0 || n >= len as i64 {
            return Err(self.index_error(format!("{} index out of range", kind)));
        }
        Ok(n as usize)
    }

    /// `container[index]`.
    pub fn get_item(&mut self, container: &Value, index: &Value) -> VmResult<Value> {
        if self.user_class(container).is_some() {
            if let Some(result) = self.call_special(container, "__getitem__", vec![index.clone()])? {
                return Ok(result);
            }
        }
        if let Value::Str(text) = container {
            let chars: Vec<char> = text.chars().collect();
            if let Some(slice) = slice_of(index) {
                let (start, stop, step) = self.slice_indices(&slice, chars.len())?;
                let picked: String = slice_positions(start, stop, step).into_iter().map(|i| chars[i]).collect();
                return Ok(Value::from(picked));
            }
            let i = self.sequence_index(index, chars.len(), "string")?;
            return Ok(Value::from(chars[i].to_string()));
        }
        let obj = match container {
            Value::Object(obj) => obj.clone(),
            _ => return Err(self.not_subscriptable(container)),
        };
        if self.is_class_object(&obj) {
            if let Some(result) = self.call_special(container, "__class_getitem__", vec![index.clone()])? {
                return Ok(result);
            }
            return Ok(container.clone());
        }
        if let Some((kind, items)) = sequence_items(container) {
            if let Some(slice) = slice_of(index) {
                let (start, stop, step) = self.slice_indices(&slice, items.len())?;
                let picked = slice_positions(start, stop, step).into_iter().map(|i| items[i].clone()).collect();
                return Ok(self.new_sequence(kind, picked));
            }
            let i = self.sequence_index(index, items.len(), kind)?;
            return Ok(items[i].clone());
        }
        if let Some(range) = range_of(container) {
            if let Some(slice) = slice_of(index) {
                let (start, stop, step) = self.slice_indices(&slice, range.len())?;
                let sliced = Range {
                    start: range.start + start * range.step,
                    stop: range.start + stop * range.step,
                    step: range.step * step,
                };
                return Ok(self.alloc(ObjectKind::Range(sliced), &self.types.range));
            }
            let i = self.sequence_index(index, range.len(), "range object")?;
            return Ok(Value::Int(range.at(i)));
        }
        let is_dict = matches!(obj.read().kind, ObjectKind::Dict(_));
        if is_dict {
            let key = self.hash_key(index)?;
            let found = match &obj.read().kind {
                ObjectKind::Dict(dict) => dict.get(&key).cloned(),
                _ => None,
            };
            return match found {
                Some(value) => Ok(value),
                None => {
                    if self.user_class(container).is_some() {
                        if let Some(result) = self.call_special(container, "__missing__", vec![index.clone()])? {
                            return Ok(result);
                        }
                    }
                    Err(self.key_error(index.clone()))
                }
            };
        }
        Err(self.not_subscriptable(container))
    }

    fn not_subscriptable(&mut self, container: &Value) -> VmError {
        let type_name = self.type_name(container);
        self.type_error(format!("'{}' object is not subscriptable", type_name))
    }

    /// `container[index] = value`.
    pub fn set_item(&mut self, container: &Value, index: &Value, value: Value) -> VmResult<()> {
        if self.user_class(container).is_some() {
            if let Some(method) = self.special_method(container, "__setitem__")? {
                self.call(&method, crate::runtime::Args::new(vec![index.clone(), value]))?;
                return Ok(());
            }
        }
        let obj = match container {
            Value::Object(obj) => obj.clone(),
            _ => return Err(self.no_item_assignment(container)),
        };
        let kind = match &obj.read().kind {
            ObjectKind::List(items) => Some(("list", items.len())),
            ObjectKind::Dict(_) => Some(("dict", 0)),
            _ => None,
        };
        match kind {
            Some(("list", len)) => {
                if let Some(slice) = slice_of(index) {
                    let replacement = self.collect(&value)?;
                    let (start, stop, step) = self.slice_indices(&slice, len)?;
                    return self.assign_slice(&obj, start, stop, step, replacement);
                }
                let i = self.sequence_index(index, len, "list")?;
                if let ObjectKind::List(items) = &mut obj.write().kind {
                    if let Some(slot) = items.get_mut(i) {
                        *slot = value;
                    }
                }
                Ok(())
            }
            Some(_) => {
                let key = self.hash_key(index)?;
                if let ObjectKind::Dict(dict) = &mut obj.write().kind {
                    dict.insert(key, index.clone(), value);
                }
                Ok(())
            }
            None => Err(self.no_item_assignment(container)),
        }
    }

    fn assign_slice(
        &mut self,
        obj: &ObjRef,
        start: i64,
        stop: i64,
        step: i64,
        replacement: Vec<Value>,
    ) -> VmResult<()> {
        if step == 1 {
            let start = start as usize;
            let stop = (stop.max(start as i64)) as usize;
            if let ObjectKind::List(items) = &mut obj.write().kind {
                let stop = stop.min(items.len());
                let start = start.min(stop);
                items.splice(start..stop, replacement);
            }
            return Ok(());
        }
        let positions = slice_positions(start, stop, step);
        if positions.len() != replacement.len() {
            return Err(self.value_error(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                positions.len()
            )));
        }
        if let ObjectKind::List(items) = &mut obj.write().kind {
            for (position, value) in positions.into_iter().zip(replacement) {
                if let Some(slot) = items.get_mut(position) {
                    *slot = value;
                }
            }
        }
        Ok(())
    }

    fn no_item_assignment(&mut self, container: &Value) -> VmError {
        let type_name = self.type_name(container);
        self.type_error(format!("'{}' object does not support item assignment", type_name))
    }

    /// `del container[index]`.
    pub fn del_item(&mut self, container: &Value, index: &Value) -> VmResult<()> {
        if self.user_class(container).is_some() {
            if self.call_special(container, "__delitem__", vec![index.clone()])?.is_some() {
                return Ok(());
            }
        }
        let obj = match container {
            Value::Object(obj) => obj.clone(),
            _ => return Err(self.no_item_deletion(container)),
        };
        let kind = match &obj.read().kind {
            ObjectKind::List(items) => Some(("list", items.len())),
            ObjectKind::Dict(_) => Some(("dict", 0)),
            _ => None,
        };
        match kind {
            Some(("list", len)) => {
                let mut positions = match slice_of(index) {
                    Some(slice) => {
                        let (start, stop, step) = self.slice_indices(&slice, len)?;
                        slice_positions(start, stop, step)
                    }
                    None => vec![self.sequence_index(index, len, "list")?],
                };
                positions.sort_unstable_by(|a, b| b.cmp(a));
                if let ObjectKind::List(items) = &mut obj.write().kind {
                    for position in positions {
                        if position < items.len() {
                            items.remove(position);
                        }
                    }
                }
                Ok(())
            }
            Some(_) => {
                let key = self.hash_key(index)?;
                let removed = match &mut obj.write().kind {
                    ObjectKind::Dict(dict) => dict.remove(&key),
                    _ => None,
                };
                match removed {
                    Some(_) => Ok(()),
                    None => Err(self.key_error(index.clone())),
                }
            }
            None => Err(self.no_item_deletion(container)),
        }
    }

    fn no_item_deletion(&mut self, container: &Value) -> VmError {
        let type_name = self.type_name(container);
        self.type_error(format!("'{}' object doesn't support item deletion", type_name))
    }

    // ===== printf-style formatting =====

    /// `template % args`.
    pub(crate) fn percent_format(&mut self, template: &str, args: &Value) -> VmResult<String> {
        let pieces = format::parse_percent(template).map_err(|message| self.value_error(message))?;
        let mut values = match sequence_items(args) {
            Some(("tuple", items)) => items,
            _ => vec![args.clone()],
        }
        .into_iter();
        let mut out = String::new();
        for piece in pieces {
            let (mut spec, conversion) = match piece {
                PercentPiece::Literal(text) => {
                    out.push_str(&text);
                    continue;
                }
                PercentPiece::Conversion(spec, conversion) => (spec, conversion),
            };
            let value = match values.next() {
                Some(value) => value,
                None => return Err(self.type_error("not enough arguments for format string")),
            };
            let rendered = match conversion {
                's' | 'r' | 'a' => {
                    let text = match conversion {
                        's' => self.to_str(&value)?,
                        'r' => self.repr(&value)?,
                        _ => ascii_escape(&self.repr(&value)?),
                    };
                    if spec.align == Some('=') {
                        spec.align = Some('>');
                        spec.fill = ' ';
                    }
                    format::format_str(&text, &spec)
                }
                'c' => match &value {
                    Value::Str(s) if s.chars().count() == 1 => format::format_str(s, &spec),
                    other if other.is_int() => {
                        spec.kind = Some('c');
                        format::format_int(&other.to_bigint().unwrap_or_default(), &spec)
                    }
                    _ => return Err(self.type_error("%c requires int or char")),
                },
                'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
                    let n = match &value {
                        Value::Float(x) if x.is_finite() => {
                            num_bigint::BigInt::from(x.trunc() as i64)
                        }
                        other if other.is_int() => other.to_bigint().unwrap_or_default(),
                        other => {
                            let type_name = self.type_name(other);
                            return Err(self.type_error(format!(
                                "%{} format: a real number is required, not {}",
                                conversion, type_name
                            )));
                        }
                    };
                    spec.kind = Some(if matches!(conversion, 'i' | 'u') { 'd' } else { conversion });
                    spec.precision = None;
                    format::format_int(&n, &spec)
                }
                _ => {
                    let x = match value.as_f64() {
                        Some(x) => x,
                        None => {
                            let type_name = self.type_name(&value);
                            return Err(self.type_error(format!("must be real number, not {}", type_name)));
                        }
                    };
                    spec.kind = Some(conversion);
                    if spec.precision.is_none() {
                        spec.precision = Some(6);
                    }
                    format::format_float(x, &spec)
                }
            };
            out.push_str(&rendered.map_err(|message| self.value_error(message))?);
        }
        if values.next().is_some() {
            return Err(self.type_error("not all arguments converted during string formatting"));
        }
        Ok(out)
    }
}

fn range_of(value: &Value) -> Option<Range> {
    match value {
        Value::Object(obj) => match &obj.read().kind {
            ObjectKind::Range(range) => Some(*range),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn set_union(a: &Set, b: &Set) -> Set {
    let mut out = a.clone();
    for (key, value) in b.iter() {
        out.insert(key.clone(), value.clone());
    }
    out
}

pub(crate) fn set_intersection(a: &Set, b: &Set) -> Set {
    let mut out = Set::new();
    for (key, value) in a.iter() {
        if b.contains(key) {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

pub(crate) fn set_difference(a: &Set, b: &Set) -> Set {
    let mut out = Set::new();
    for (key, value) in a.iter() {
        if !b.contains(key) {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn vm() -> Vm {
        Vm::new(EngineConfig::default())
    }

    fn message(vm: &mut Vm, err: VmError) -> String {
        match err {
            VmError::Exception(exc) => vm.describe_exception(&exc),
            VmError::Internal(message) => message,
        }
    }

    #[test]
    fn test_unsupported_operands() {
        let mut vm = vm();
        let err = vm.binary_op(BinOp::Add, &Value::Int(1), &Value::from("a")).unwrap_err();
        assert_eq!(
            message(&mut vm, err),
            "TypeError: unsupported operand type(s) for +: 'int' and 'str'"
        );
        let err = vm.inplace_op(BinOp::Sub, &Value::from("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(
            message(&mut vm, err),
            "TypeError: unsupported operand type(s) for -=: 'str' and 'int'"
        );
    }

    #[test]
    fn test_sequence_operators() {
        let mut vm = vm();
        let a = vm.new_list(vec![Value::Int(1)]);
        let b = vm.new_list(vec![Value::Int(2)]);
        let joined = vm.binary_op(BinOp::Add, &a, &b).unwrap();
        assert_eq!(vm.repr(&joined).unwrap(), "[1, 2]");
        let repeated = vm.binary_op(BinOp::Mul, &Value::Int(2), &a).unwrap();
        assert_eq!(vm.repr(&repeated).unwrap(), "[1, 1]");
        let text = vm.binary_op(BinOp::Mul, &Value::from("ab"), &Value::Int(3)).unwrap();
        assert_eq!(text.as_str(), Some("ababab"));
        let same = vm.inplace_op(BinOp::Add, &a, &b).unwrap();
        assert!(same.is(&a));
        assert_eq!(vm.repr(&a).unwrap(), "[1, 2]");
    }

    #[test]
    fn test_comparisons() {
        let mut vm = vm();
        let lt = vm.compare(CompareOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap();
        assert!(matches!(lt, Value::Bool(true)));
        let a = vm.new_tuple(vec![Value::Int(1), Value::Int(2)]);
        let b = vm.new_tuple(vec![Value::Int(1), Value::Int(3)]);
        assert!(vm.less_than(&a, &b).unwrap());
        assert!(vm.equals(&Value::Int(1), &Value::Bool(true)).unwrap());
        let err = vm.compare(CompareOp::Lt, &Value::from("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(
            message(&mut vm, err),
            "TypeError: '<' not supported between instances of 'str' and 'int'"
        );
        let nan = Value::Float(f64::NAN);
        assert!(!vm.equals(&nan, &nan).unwrap());
        let list = vm.new_list(vec![nan.clone()]);
        assert!(vm.contains(&list, &nan).unwrap());
    }

    #[test]
    fn test_subscripts_and_slices() {
        let mut vm = vm();
        let list = vm.new_list((0..6).map(Value::Int).collect());
        let slice = vm.alloc(
            ObjectKind::Slice(Slice {
                start: Value::None,
                stop: Value::None,
                step: Value::Int(-2),
            }),
            &vm.types.slice.clone(),
        );
        let picked = vm.get_item(&list, &slice).unwrap();
        assert_eq!(vm.repr(&picked).unwrap(), "[5, 3, 1]");
        let last = vm.get_item(&list, &Value::Int(-1)).unwrap();
        assert!(matches!(last, Value::Int(5)));
        let err = vm.get_item(&list, &Value::Int(6)).unwrap_err();
        assert_eq!(message(&mut vm, err), "IndexError: list index out of range");
        vm.del_item(&list, &slice).unwrap();
        assert_eq!(vm.repr(&list).unwrap(), "[0, 2, 4]");
        let text = vm.get_item(&Value::from("hello"), &Value::Int(1)).unwrap();
        assert_eq!(text.as_str(), Some("e"));
    }

    #[test]
    fn test_dict_subscript_key_error() {
        let mut vm = vm();
        let dict = vm.new_dict(Dict::new());
        vm.set_item(&dict, &Value::from("a"), Value::Int(1)).unwrap();
        assert!(matches!(vm.get_item(&dict, &Value::from("a")).unwrap(), Value::Int(1)));
        let err = vm.get_item(&dict, &Value::from("b")).unwrap_err();
        assert_eq!(message(&mut vm, err), "KeyError: 'b'");
    }

    #[test]
    fn test_percent_format() {
        let mut vm = vm();
        let args = vm.new_tuple(vec![Value::from("x"), Value::Int(42), Value::Float(2.5)]);
        let text = vm.percent_format("%s=%05d (%.2f) 100%%", &args).unwrap();
        assert_eq!(text, "x=00042 (2.50) 100%");
        let err = vm.percent_format("%d %d", &Value::Int(1)).unwrap_err();
        assert_eq!(message(&mut vm, err), "TypeError: not enough arguments for format string");
    }
}
