//! Hashable keys and the insertion-ordered `dict`/`set` storage.

use std::sync::Arc;

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use super::object::ObjectKind;
use super::value::Value;

/// The hashable projection of a value.
///
/// Numbers that compare equal hash equal: `True`, `1` and `1.0` are the same
/// key. Heap objects without value semantics are keyed by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    /// `None`
    None,
    /// `...`
    Ellipsis,
    /// Integral number in `i64` range (including `bool` and integral floats)
    Int(i64),
    /// Integer outside `i64` range
    Long(BigInt),
    /// Non-integral float, by bit pattern
    Float(u64),
    /// String
    Str(Arc<str>),
    /// Tuple of hashable items
    Tuple(Vec<DictKey>),
    /// Any other object, by address
    Identity(usize),
}

/// Why a value could not be hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unhashable(pub &'static str);

impl DictKey {
    /// Projects `value` to its key, or names the unhashable type.
    pub fn from_value(value: &Value) -> Result<DictKey, Unhashable> {
        Ok(match value {
            Value::None => DictKey::None,
            Value::Ellipsis => DictKey::Ellipsis,
            Value::NotImplemented => DictKey::Identity(3),
            Value::Bool(b) => DictKey::Int(*b as i64),
            Value::Int(n) => DictKey::Int(*n),
            Value::Long(n) => DictKey::Long((**n).clone()),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    match x.to_i64() {
                        Some(n) => DictKey::Int(n),
                        None => DictKey::Float(x.to_bits()),
                    }
                } else {
                    DictKey::Float(x.to_bits())
                }
            }
            Value::Str(s) => DictKey::Str(s.clone()),
            Value::Object(obj) => {
                let guard = obj.read();
                match &guard.kind {
                    ObjectKind::Tuple(items) => DictKey::Tuple(
                        items.iter().map(DictKey::from_value).collect::<Result<_, _>>()?,
                    ),
                    ObjectKind::List(_) => return Err(Unhashable("list")),
                    ObjectKind::Dict(_) => return Err(Unhashable("dict")),
                    ObjectKind::Set(_) => return Err(Unhashable("set")),
                    _ => DictKey::Identity(obj.id()),
                }
            }
        })
    }

    /// A 64-bit hash for `hash()`.
    pub fn hash_value(&self) -> i64 {
        use std::hash::{Hash, Hasher};
        match self {
            DictKey::Int(n) => *n,
            _ => {
                let mut hasher = rustc_hash::FxHasher::default();
                self.hash(&mut hasher);
                hasher.finish() as i64
            }
        }
    }
}

/// `dict` storage: key projection to `(original key, value)`.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: IndexMap<DictKey, (Value, Value)>,
}

impl Dict {
    /// Creates an empty dict.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the dict has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or replaces. The original key is kept on replacement.
    pub fn insert(&mut self, key: DictKey, original: Value, value: Value) {
        match self.entries.get_mut(&key) {
            Some(entry) => entry.1 = value,
            None => {
                self.entries.insert(key, (original, value));
            }
        }
    }

    /// Looks up a value.
    pub fn get(&self, key: &DictKey) -> Option<&Value> {
        self.entries.get(key).map(|(_, v)| v)
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &DictKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes an entry, keeping the order of the rest.
    pub fn remove(&mut self, key: &DictKey) -> Option<(Value, Value)> {
        self.entries.shift_remove(key)
    }

    /// Removes the most recently inserted entry.
    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        self.entries.pop().map(|(_, entry)| entry)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(k, _)| k.clone()).collect()
    }

    /// Values in insertion order.
    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, v)| v.clone()).collect()
    }

    /// `(key, value)` pairs in insertion order.
    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.values().cloned().collect()
    }

    /// Iterates over `(projection, (key, value))`.
    pub fn iter(&self) -> impl Iterator<Item = (&DictKey, &(Value, Value))> {
        self.entries.iter()
    }
}

/// `set` storage: key projection to the original member.
#[derive(Debug, Clone, Default)]
pub struct Set {
    members: IndexMap<DictKey, Value>,
}

impl Set {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Adds a member; an equal member already present is kept.
    pub fn insert(&mut self, key: DictKey, value: Value) {
        self.members.entry(key).or_insert(value);
    }

    /// Returns true if `key` is a member.
    pub fn contains(&self, key: &DictKey) -> bool {
        self.members.contains_key(key)
    }

    /// Removes a member.
    pub fn remove(&mut self, key: &DictKey) -> Option<Value> {
        self.members.shift_remove(key)
    }

    /// Removes and returns the first member.
    pub fn pop_first(&mut self) -> Option<Value> {
        self.members.shift_remove_index(0).map(|(_, v)| v)
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Members in insertion order.
    pub fn values(&self) -> Vec<Value> {
        self.members.values().cloned().collect()
    }

    /// Iterates over `(projection, member)`.
    pub fn iter(&self) -> impl Iterator<Item = (&DictKey, &Value)> {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_keys_unify() {
        let one = DictKey::from_value(&Value::Int(1)).unwrap();
        assert_eq!(DictKey::from_value(&Value::Bool(true)).unwrap(), one);
        assert_eq!(DictKey::from_value(&Value::Float(1.0)).unwrap(), one);
        assert_ne!(DictKey::from_value(&Value::Float(1.5)).unwrap(), one);
    }

    #[test]
    fn test_dict_keeps_first_key_and_order() {
        let mut dict = Dict::new();
        let k = DictKey::from_value(&Value::Int(1)).unwrap();
        dict.insert(k.clone(), Value::Int(1), Value::str("a"));
        dict.insert(DictKey::Str("z".into()), Value::str("z"), Value::None);
        dict.insert(k.clone(), Value::Float(1.0), Value::str("b"));
        assert_eq!(dict.len(), 2);
        assert!(matches!(dict.keys()[0], Value::Int(1)));
        assert_eq!(dict.get(&k).and_then(|v| v.as_str()), Some("b"));
        dict.remove(&k);
        assert!(matches!(dict.keys()[0], Value::Str(_)));
    }

    #[test]
    fn test_set_membership() {
        let mut set = Set::new();
        set.insert(DictKey::Int(2), Value::Int(2));
        set.insert(DictKey::Int(2), Value::Float(2.0));
        assert_eq!(set.len(), 1);
        assert!(matches!(set.values()[0], Value::Int(2)));
        assert!(set.contains(&DictKey::Int(2)));
    }
}
