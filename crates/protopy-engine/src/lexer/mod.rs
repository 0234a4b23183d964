//! Lexical analysis (tokenization) for source code.
//!
//! The lexer transforms source text into a stream of tokens that can be
//! consumed by the parser. Block structure is made explicit: the scanner
//! keeps an indentation stack and reports `Indent`/`Dedent` tokens, plus a
//! `Newline` at the end of each logical line.
//!
//! ## Structure
//!
//! - `scanner.rs` - Main `Scanner` struct that produces tokens
//! - `token.rs` - `Token` and `TokenKind` definitions
//! - `error.rs` - `LexError`
//!
//! ## Usage
//!
//! ```rust
//! use protopy_engine::lexer::{Scanner, TokenKind};
//!
//! let mut scanner = Scanner::new("x = 42\n");
//!
//! loop {
//!     let token = scanner.next_token().unwrap();
//!     if matches!(token.kind, TokenKind::Eof) {
//!         break;
//!     }
//!     println!("{:?}", token.kind);
//! }
//! ```

mod error;
mod scanner;
mod token;

pub use error::{LexError, LexResult};
pub use scanner::Scanner;
pub use token::{Span, Token, TokenKind};
