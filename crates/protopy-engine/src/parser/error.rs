//! Syntax errors.

use thiserror::Error;

use crate::lexer::LexError;

/// The first syntax error found in a unit, with its location.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (line {line}, column {column})")]
pub struct SyntaxError {
    /// Human-readable description
    pub message: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

impl SyntaxError {
    /// Creates a new syntax error.
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

impl From<LexError> for SyntaxError {
    fn from(err: LexError) -> Self {
        let (line, column) = err.position();
        let message = err.to_string();
        // The lexer already appends the position; keep only the description.
        let message = match message.rfind(" (line ") {
            Some(idx) => message[..idx].to_string(),
            None => message,
        };
        Self::new(message, line, column)
    }
}

/// Result type for parsing.
pub type ParseResult<T> = Result<T, SyntaxError>;
