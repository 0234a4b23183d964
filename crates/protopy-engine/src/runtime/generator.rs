//! Generator and coroutine objects.
//!
//! A suspended generator is data: its frame and the [`ExecState`] the
//! interpreter left behind at the last `yield`. Resuming re-enters the
//! interpreter with that state (see `vm::generator`).

use super::frame::{ExecState, Frame};

/// Generator execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Created by a call; no bytecode has run yet
    Created,
    /// Currently executing; re-entry is an error
    Running,
    /// Stopped at a `yield`
    Suspended,
    /// Returned
    Completed,
    /// An exception escaped the body
    Failed,
}

impl GeneratorState {
    /// Returns true once the generator can never yield again.
    pub fn is_finished(self) -> bool {
        matches!(self, GeneratorState::Completed | GeneratorState::Failed)
    }
}

/// Whether the object came from `def` with `yield` or from `async def`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    /// Generator function
    Generator,
    /// `async def`
    Coroutine,
}

impl GeneratorKind {
    /// Type name.
    pub fn name(self) -> &'static str {
        match self {
            GeneratorKind::Generator => "generator",
            GeneratorKind::Coroutine => "coroutine",
        }
    }
}

/// The saved activation of a generator.
#[derive(Debug)]
pub struct Suspended {
    /// Bindings
    pub frame: Frame,
    /// Operand stack, block stack and resume point
    pub exec: ExecState,
}

/// A generator or coroutine.
#[derive(Debug)]
pub struct Generator {
    /// Generator or coroutine
    pub kind: GeneratorKind,
    /// `__name__`
    pub name: String,
    /// `__qualname__`
    pub qualname: String,
    /// Lifecycle state
    pub state: GeneratorState,
    /// The activation; taken out while running and dropped when finished
    pub suspended: Option<Box<Suspended>>,
}

impl Generator {
    /// Wraps a freshly bound frame.
    pub fn new(kind: GeneratorKind, name: String, qualname: String, frame: Frame) -> Self {
        let exec = ExecState::new(&frame.code);
        Self {
            kind,
            name,
            qualname,
            state: GeneratorState::Created,
            suspended: Some(Box::new(Suspended { frame, exec })),
        }
    }
}
