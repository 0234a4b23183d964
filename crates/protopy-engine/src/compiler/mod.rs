//! Bytecode compiler.
//!
//! Transforms the AST into code objects that can be executed by the VM.
//!
//! # Module Structure
//!
//! - `bytecode`: opcode set, operand predicate and instruction decoding
//! - `code`: `CodeObject`, `CodeFlags` and the constant pool entries
//! - `symtable`: scope analysis (slot vs name addressing, free variables)
//! - `codegen`: the `Compiler`
//!   - `codegen::expressions`: expression lowering
//!   - `codegen::statements`: statement lowering
//! - `blocks`: basic-block boundaries and stack depth
//! - `dis`: disassembler
//! - `error`: `CompileError`

pub mod blocks;
pub mod bytecode;
pub mod code;
pub mod codegen;
pub mod dis;
pub mod error;
pub mod symtable;

use std::sync::Arc;

pub use blocks::{basic_blocks, BlockRange};
pub use bytecode::{CompareOp, Instruction, OpCode};
pub use code::{CodeFlags, CodeObject, Constant};
pub use codegen::Compiler;
pub use dis::disassemble;
pub use error::{CompileError, CompileErrorKind, CompileResult};

use crate::ast::{Expression, Module};

/// Compiles a module, returning the typed diagnostic on failure.
pub fn compile_module_checked(module: &Module, filename: &str) -> CompileResult<Arc<CodeObject>> {
    let mut compiler = Compiler::new(filename);
    if compiler.compile_module(module) {
        Ok(compiler.make_code_object())
    } else {
        Err(compiler.error().cloned().unwrap_or_else(|| {
            CompileError::new(
                CompileErrorKind::Internal("compilation failed without a diagnostic".into()),
                Default::default(),
            )
        }))
    }
}

/// Compiles a single expression, returning the typed diagnostic on failure.
pub fn compile_expression_checked(expr: &Expression, filename: &str) -> CompileResult<Arc<CodeObject>> {
    let mut compiler = Compiler::new(filename);
    if compiler.compile_expression(expr) {
        Ok(compiler.make_code_object())
    } else {
        Err(compiler.error().cloned().unwrap_or_else(|| {
            CompileError::new(
                CompileErrorKind::Internal("compilation failed without a diagnostic".into()),
                Default::default(),
            )
        }))
    }
}
