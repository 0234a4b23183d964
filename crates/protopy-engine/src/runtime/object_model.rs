//! The object-model capability.
//!
//! The compiler and interpreter only need four operations on objects:
//! get an attribute, set an attribute, call a method, test instance-of.
//! [`ObjectModel`] names them; the interpreter implements it on top of
//! [`PrototypeModel`], which knows how prototype chains are walked.
//!
//! ## Lookup order
//!
//! ```text
//! class A: ...          class B(A): ...     class C(A): ...
//! class D(B, C): ...
//!
//! depth-first, left to right:   D B A object C A object
//! keep the last duplicate:      D B C A object
//! ```
//!
//! Keeping the last occurrence of a repeated prototype means a shared base
//! is searched after every class that derives from it.

use super::function::Args;
use super::object::{ObjRef, ObjectKind};
use super::value::Value;
use crate::vm::VmResult;

/// Attribute access and dispatch on runtime values.
pub trait ObjectModel {
    /// `obj.name`, binding methods to `obj`.
    fn get_attr(&mut self, obj: &Value, name: &str) -> VmResult<Value>;

    /// `obj.name = value`.
    fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> VmResult<()>;

    /// `obj.name(*args)`.
    fn call_method(&mut self, obj: &Value, name: &str, args: Args) -> VmResult<Value>;

    /// `isinstance(obj, class)`.
    fn is_instance(&mut self, obj: &Value, class: &ObjRef) -> bool;
}

/// Prototype-chain walking.
pub struct PrototypeModel;

impl PrototypeModel {
    /// The lookup order starting at `class`, `class` included.
    pub fn linearize(class: &ObjRef) -> Vec<ObjRef> {
        let mut order = Vec::new();
        Self::walk(class, &mut order);
        let mut result: Vec<ObjRef> = Vec::with_capacity(order.len());
        for (i, entry) in order.iter().enumerate() {
            if !order[i + 1..].iter().any(|later| later.ptr_eq(entry)) {
                result.push(entry.clone());
            }
        }
        result
    }

    fn walk(class: &ObjRef, order: &mut Vec<ObjRef>) {
        order.push(class.clone());
        let bases = class.read().prototypes.clone();
        for base in &bases {
            Self::walk(base, order);
        }
    }

    /// Finds `name` on `class` or its bases. Returns the value and the
    /// class that defines it.
    pub fn lookup(class: &ObjRef, name: &str) -> Option<(Value, ObjRef)> {
        Self::linearize(class)
            .into_iter()
            .find_map(|entry| entry.read().attrs.get(name).cloned().map(|value| (value, entry.clone())))
    }

    /// Finds `name` in the classes after `after` in `class`'s lookup order.
    pub fn lookup_after(class: &ObjRef, after: &ObjRef, name: &str) -> Option<(Value, ObjRef)> {
        let order = Self::linearize(class);
        let start = order.iter().position(|entry| entry.ptr_eq(after))? + 1;
        order[start..]
            .iter()
            .find_map(|entry| entry.read().attrs.get(name).cloned().map(|value| (value, entry.clone())))
    }

    /// Returns true if `class` is `base` or derives from it.
    pub fn is_subclass(class: &ObjRef, base: &ObjRef) -> bool {
        if class.ptr_eq(base) {
            return true;
        }
        let bases = class.read().prototypes.clone();
        bases.iter().any(|b| Self::is_subclass(b, base))
    }

    /// Returns true if `obj` is a class.
    pub fn is_class(obj: &ObjRef) -> bool {
        matches!(obj.read().kind, ObjectKind::Class(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::{ClassData, Object};

    fn class(name: &str, bases: Vec<ObjRef>) -> ObjRef {
        ObjRef::new(Object::class(
            ClassData {
                name: name.into(),
                qualname: name.into(),
                tag: None,
            },
            bases,
        ))
    }

    fn names(order: &[ObjRef]) -> Vec<String> {
        order
            .iter()
            .map(|c| match &c.read().kind {
                ObjectKind::Class(data) => data.name.clone(),
                _ => String::new(),
            })
            .collect()
    }

    #[test]
    fn test_diamond_order() {
        let a = class("A", vec![]);
        let b = class("B", vec![a.clone()]);
        let c = class("C", vec![a.clone()]);
        let d = class("D", vec![b, c]);
        assert_eq!(names(&PrototypeModel::linearize(&d)), ["D", "B", "C", "A"]);
    }

    #[test]
    fn test_lookup_and_override() {
        let a = class("A", vec![]);
        a.write().attrs.insert("x".into(), Value::Int(1));
        a.write().attrs.insert("y".into(), Value::Int(2));
        let b = class("B", vec![a.clone()]);
        b.write().attrs.insert("x".into(), Value::Int(10));

        let (x, owner) = PrototypeModel::lookup(&b, "x").unwrap();
        assert!(matches!(x, Value::Int(10)));
        assert!(owner.ptr_eq(&b));
        assert!(matches!(PrototypeModel::lookup(&b, "y"), Some((Value::Int(2), _))));
        assert!(matches!(PrototypeModel::lookup_after(&b, &b, "x"), Some((Value::Int(1), _))));
        assert!(PrototypeModel::lookup(&b, "z").is_none());
    }

    #[test]
    fn test_subclass() {
        let a = class("A", vec![]);
        let b = class("B", vec![a.clone()]);
        assert!(PrototypeModel::is_subclass(&b, &a));
        assert!(!PrototypeModel::is_subclass(&a, &b));
        assert!(PrototypeModel::is_class(&a));
    }
}
