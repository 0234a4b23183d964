//! Lexical errors.

use thiserror::Error;

/// An error raised while tokenizing source text.
///
/// Every variant carries the 1-based line and column where scanning stopped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexError {
    /// A dedent that does not return to any enclosing indentation level.
    #[error("unindent does not match any outer indentation level (line {line}, column {column})")]
    InconsistentDedent {
        /// Line of the offending indentation
        line: u32,
        /// Column of the offending indentation
        column: u32,
    },

    /// A character that cannot start any token.
    #[error("invalid character '{character}' (line {line}, column {column})")]
    UnexpectedCharacter {
        /// The character found
        character: char,
        /// Line of the character
        line: u32,
        /// Column of the character
        column: u32,
    },

    /// A string literal missing its closing quote.
    #[error("unterminated string literal (line {line}, column {column})")]
    UnterminatedString {
        /// Line where the literal starts
        line: u32,
        /// Column where the literal starts
        column: u32,
    },

    /// A malformed numeric literal.
    #[error("invalid numeric literal '{literal}' (line {line}, column {column})")]
    InvalidNumber {
        /// The literal text
        literal: String,
        /// Line of the literal
        line: u32,
        /// Column of the literal
        column: u32,
    },

    /// A closing bracket with no matching opener.
    #[error("unmatched '{bracket}' (line {line}, column {column})")]
    UnmatchedBracket {
        /// The closing bracket
        bracket: char,
        /// Line of the bracket
        line: u32,
        /// Column of the bracket
        column: u32,
    },
}

impl LexError {
    /// Returns the (line, column) position of the error.
    pub fn position(&self) -> (u32, u32) {
        match self {
            LexError::InconsistentDedent { line, column }
            | LexError::UnexpectedCharacter { line, column, .. }
            | LexError::UnterminatedString { line, column }
            | LexError::InvalidNumber { line, column, .. }
            | LexError::UnmatchedBracket { line, column, .. } => (*line, *column),
        }
    }
}

/// Result type for scanning.
pub type LexResult<T> = Result<T, LexError>;
