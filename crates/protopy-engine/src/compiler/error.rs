//! Compile-time diagnostics.

use thiserror::Error;

use crate::ast::Position;

/// What went wrong while compiling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    /// `break` with no enclosing loop
    #[error("'break' outside loop")]
    BreakOutsideLoop,
    /// `continue` with no enclosing loop
    #[error("'continue' not properly in loop")]
    ContinueOutsideLoop,
    /// `return` at module or class level
    #[error("'return' outside function")]
    ReturnOutsideFunction,
    /// `yield` at module or class level
    #[error("'yield' outside function")]
    YieldOutsideFunction,
    /// `await`, `async for` or `async with` outside `async def`
    #[error("'{0}' outside async function")]
    AsyncOutsideAsyncFunction(&'static str),
    /// `nonlocal` at module level
    #[error("nonlocal declaration not allowed at module level")]
    NonlocalAtModuleLevel,
    /// `nonlocal x` with no enclosing binding of `x`
    #[error("no binding for nonlocal '{0}' found")]
    NonlocalNotFound(String),
    /// A name declared both global and nonlocal
    #[error("name '{0}' is nonlocal and global")]
    NonlocalAndGlobal(String),
    /// A parameter declared global or nonlocal
    #[error("name '{0}' is parameter and {1}")]
    ParameterDeclared(String, &'static str),
    /// A starred expression where none is allowed
    #[error("can't use starred expression here")]
    StarredNotAllowed,
    /// More than one starred target
    #[error("multiple starred expressions in assignment")]
    MultipleStarred,
    /// Too many targets before or after a starred target
    #[error("too many expressions in star-unpacking assignment")]
    TooManyUnpackTargets,
    /// An expression that cannot be a target
    #[error("cannot {0} {1}")]
    InvalidTarget(&'static str, &'static str),
    /// A construct this compiler does not lower
    #[error("{0} are not supported")]
    Unsupported(&'static str),
    /// `:=` inside a comprehension in a class body
    #[error("assignment expression within a comprehension cannot be used in a class body")]
    NamedExprInClassComprehension,
    /// The compiler produced inconsistent output (a defect, not a user error)
    #[error("internal compiler error: {0}")]
    Internal(String),
}

/// A compile-time error with the position of the offending node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} (line {}, column {})", pos.line, pos.column)]
pub struct CompileError {
    /// What went wrong
    pub kind: CompileErrorKind,
    /// Where
    pub pos: Position,
}

impl CompileError {
    /// Creates a new compile error.
    pub fn new(kind: CompileErrorKind, pos: Position) -> Self {
        Self { kind, pos }
    }
}

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;
