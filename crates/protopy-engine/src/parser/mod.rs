//! Parser for Python-like source code.
//!
//! Transforms the token stream into an Abstract Syntax Tree (AST).
//!
//! ## Structure
//!
//! - `parser` - `Parser` state, block handling and token helpers
//! - `statements` - Statement parsing (if, for, def, class, try, etc.)
//! - `expressions` - Expression parsing (operators, literals, calls, f-strings)
//! - `error` - `SyntaxError`
//!
//! ## Usage
//!
//! ```rust
//! use protopy_engine::parser::Parser;
//!
//! let mut parser = Parser::new("x = 1 + 2\n");
//! let module = parser.parse_module().expect("Should parse");
//! assert_eq!(module.body.len(), 1);
//! ```

mod error;
mod expressions;
#[allow(clippy::module_inception)]
mod parser;
mod statements;

pub use error::{ParseResult, SyntaxError};
pub use parser::Parser;
