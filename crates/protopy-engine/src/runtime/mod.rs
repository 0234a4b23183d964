//! Runtime types: values, heap objects, frames and the object model.
//!
//! The interpreter (`crate::vm`) operates on these; nothing here executes
//! bytecode.

pub mod dict;
pub mod environment;
pub mod frame;
pub mod function;
pub mod generator;
pub mod iterator;
pub mod object;
pub mod object_model;
pub mod sync;
pub mod value;

pub use dict::{Dict, DictKey, Set};
pub use environment::{Environment, Namespace};
pub use frame::{Block, Completion, ExecState, Frame};
pub use function::{Args, BoundMethod, Function, NativeFn, NativeFunction};
pub use generator::{Generator, GeneratorKind, GeneratorState};
pub use iterator::IterState;
pub use object::{ClassData, ObjRef, Object, ObjectKind, TypeTag};
pub use object_model::{ObjectModel, PrototypeModel};
pub use value::Value;
