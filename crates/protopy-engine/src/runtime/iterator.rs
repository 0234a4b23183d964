//! Native iterator states.

use std::collections::VecDeque;
use std::sync::Arc;

use super::value::Value;

/// State of a native iterator. Advanced by `Vm::next`.
#[derive(Debug)]
pub enum IterState {
    /// Over a list or tuple, read live at each step
    Sequence {
        /// The list or tuple
        seq: Value,
        /// Next index
        index: usize,
    },
    /// Over the characters of a string
    Chars {
        /// The string
        text: Arc<str>,
        /// Byte offset of the next character
        offset: usize,
    },
    /// Over an integer range
    Range {
        /// Next value
        next: i64,
        /// Values left
        remaining: usize,
        /// Increment
        step: i64,
    },
    /// Over a snapshot (dict keys, set members, reversed sequences)
    Snapshot(VecDeque<Value>),
    /// `map(func, *iterables)`
    Map {
        /// Mapped callable
        func: Value,
        /// Source iterators
        iters: Vec<Value>,
    },
    /// `filter(func, iterable)`
    Filter {
        /// Predicate, or `None` for truthiness
        func: Value,
        /// Source iterator
        iter: Value,
    },
    /// `zip(*iterables)`
    Zip {
        /// Source iterators
        iters: Vec<Value>,
    },
    /// `enumerate(iterable, start)`
    Enumerate {
        /// Source iterator
        iter: Value,
        /// Next count
        count: i64,
    },
    /// An awaitable that optionally suspends once, then returns `result`
    Awaitable {
        /// Suspend (yield `None`) before completing
        suspend: bool,
        /// Value produced when awaited
        result: Value,
    },
    /// Exhausted
    Done,
}
