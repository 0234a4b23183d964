// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # protopy-engine
//!
//! A Python-like language runtime implemented in Rust.
//!
//! ## Overview
//!
//! This crate provides the whole execution pipeline:
//! - Lexer and indentation-aware parser producing a typed AST
//! - Single-pass compiler from the AST to stack-machine bytecode
//! - Bytecode interpreter with exception unwinding, generators and coroutines
//! - Built-in types and functions plus the `sys`, `math`, `time`, `asyncio`
//!   and `_thread` native modules
//! - Optional async (`tokio`) and parallel (`rayon`) front ends
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use protopy_engine::{Engine, EngineConfig, Value};
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! let result = engine.eval_expression("1 + 2")?;
//! assert!(matches!(result, Value::Int(3)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod config;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod vm;

#[cfg(any(feature = "async", feature = "parallel"))]
pub mod async_engine;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

pub use compiler::{CodeObject, CompileError};
pub use config::EngineConfig;
pub use parser::SyntaxError;
pub use runtime::{Namespace, Value};
pub use vm::{Vm, VmError};

#[cfg(feature = "async")]
pub use async_engine::AsyncEngine;
#[cfg(feature = "parallel")]
pub use async_engine::ParallelCompiler;

/// The main engine instance.
///
/// Owns one interpreter and one `__main__` namespace. Successive calls to
/// [`Engine::eval`] share that namespace, which is what the REPL relies on.
pub struct Engine {
    vm: Vm,
    globals: Namespace,
}

impl Engine {
    /// Creates an engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        let vm = Vm::new(config);
        let globals = vm.new_globals("__main__");
        Self { vm, globals }
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        self.vm.config()
    }

    /// The `__main__` namespace.
    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    /// Direct access to the interpreter.
    pub fn vm(&mut self) -> &mut Vm {
        &mut self.vm
    }

    /// Routes `print` output into a buffer instead of stdout.
    pub fn capture_output(&mut self) -> Arc<Mutex<String>> {
        self.vm.capture_output()
    }

    /// Parses and compiles module source without running it.
    pub fn compile(&self, source: &str, filename: &str) -> Result<Arc<CodeObject>, Error> {
        let module = parser::Parser::new(source).parse_module()?;
        Ok(compiler::compile_module_checked(&module, filename)?)
    }

    /// Parses and compiles a single expression without running it.
    pub fn compile_expression(&self, source: &str, filename: &str) -> Result<Arc<CodeObject>, Error> {
        let expr = parser::Parser::new(source).parse_expression_source()?;
        Ok(compiler::compile_expression_checked(&expr, filename)?)
    }

    /// Runs already compiled module code in the `__main__` namespace.
    pub fn run_code(&mut self, code: Arc<CodeObject>) -> Result<Value, Error> {
        let globals = self.globals.clone();
        self.vm.run_module_code(code, globals).map_err(|err| self.convert(err))
    }

    /// Evaluates module source in the `__main__` namespace.
    ///
    /// Returns the value of a trailing expression statement, or `None`.
    pub fn eval(&mut self, source: &str) -> Result<Value, Error> {
        let filename = self.vm.config().filename.clone();
        let code = self.compile(source, &filename)?;
        self.run_code(code)
    }

    /// Evaluates a single expression in the `__main__` namespace.
    pub fn eval_expression(&mut self, source: &str) -> Result<Value, Error> {
        let filename = self.vm.config().filename.clone();
        let code = self.compile_expression(source, &filename)?;
        self.run_code(code)
    }

    /// Reads and evaluates a source file, setting `__file__`.
    pub fn eval_file(&mut self, path: impl AsRef<Path>) -> Result<Value, Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        let filename = path.display().to_string();
        let code = self.compile(&source, &filename)?;
        self.globals.set("__file__", Value::from(filename.as_str()));
        self.run_code(code)
    }

    /// Runs module `name` from the search path as `__main__`.
    pub fn run_module(&mut self, name: &str) -> Result<Value, Error> {
        let globals = self.globals.clone();
        self.vm.run_main_module(name, &globals).map_err(|err| self.convert(err))
    }

    /// `repr(value)`, for displaying results.
    pub fn repr(&mut self, value: &Value) -> Result<String, Error> {
        self.vm.repr(value).map_err(|err| self.convert(err))
    }

    fn convert(&mut self, err: VmError) -> Error {
        match err {
            VmError::Exception(value) => Error::Exception {
                message: self.vm.describe_exception(&value),
                value,
            },
            VmError::Internal(message) => Error::Internal(message),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Errors surfaced by [`Engine`].
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The source did not parse
    #[error("SyntaxError: {0}")]
    Syntax(#[from] SyntaxError),

    /// The AST was rejected by the compiler
    #[error("SyntaxError: {0}")]
    Compile(#[from] CompileError),

    /// An exception propagated out of the program
    #[error("{message}")]
    Exception {
        /// `Type: message`
        message: String,
        /// The exception object
        value: Value,
    },

    /// The interpreter hit an internal defect
    #[error("internal error: {0}")]
    Internal(String),

    /// A source file could not be read
    #[error("cannot read '{}': {message}", path.display())]
    Io {
        /// The file
        path: PathBuf,
        /// The OS error text
        message: String,
    },
}

impl Error {
    fn io(path: &Path, err: std::io::Error) -> Self {
        Error::Io { path: path.to_path_buf(), message: err.to_string() }
    }

    /// The exception object, for [`Error::Exception`].
    pub fn exception(&self) -> Option<&Value> {
        match self {
            Error::Exception { value, .. } => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_returns_trailing_expression() {
        let mut engine = Engine::default();
        let result = engine.eval("x = 20\nx + 22").unwrap();
        assert!(matches!(result, Value::Int(42)));
    }

    #[test]
    fn test_eval_shares_globals() {
        let mut engine = Engine::default();
        engine.eval("def double(n):\n    return n * 2\n").unwrap();
        let result = engine.eval_expression("double(21)").unwrap();
        assert!(matches!(result, Value::Int(42)));
        assert!(engine.globals().contains("double"));
    }

    #[test]
    fn test_syntax_error_is_typed() {
        let mut engine = Engine::default();
        let err = engine.eval("def f(:\n").unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
        assert!(err.to_string().starts_with("SyntaxError"));
    }

    #[test]
    fn test_exception_is_described() {
        let mut engine = Engine::default();
        let err = engine.eval("1 / 0").unwrap_err();
        assert!(err.exception().is_some());
        assert!(err.to_string().starts_with("ZeroDivisionError"), "{}", err);
    }

    #[test]
    fn test_print_capture() {
        let mut engine = Engine::default();
        let out = engine.capture_output();
        engine.eval("print('hello', 1 + 1)").unwrap();
        assert_eq!(out.lock().as_str(), "hello 2\n");
    }

    #[test]
    fn test_missing_file() {
        let mut engine = Engine::default();
        let err = engine.eval_file("/definitely/not/here.py").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
