//! Code generation from AST to bytecode.
//!
//! This module contains the `Compiler` which lowers a parsed module (or a
//! single expression) into a [`CodeObject`]. Scope analysis runs first over
//! the whole tree; every function, lambda, comprehension and class body is
//! then compiled by a fresh child `Compiler` bound to its own [`Scope`].
//!
//! Jumps are emitted against [`Label`]s with a placeholder operand and
//! backpatched once the unit is complete.

mod expressions;
mod statements;

#[cfg(test)]
mod tests;

use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::blocks::max_stack_depth;
use super::bytecode::OpCode;
use super::code::{CodeObject, Constant};
use super::error::{CompileError, CompileErrorKind, CompileResult};
use super::symtable::{analyze_expression, analyze_module, NameAccess, Scope};
use crate::ast::*;

/// Operand written before a jump target is known.
const UNRESOLVED: u32 = u32::MAX;

/// A forward or backward jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Which operation a name access performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameOp {
    Load,
    Store,
    Delete,
}

/// A construct that must be cleaned up when control leaves it early
/// (`break`, `continue`, `return`).
#[derive(Debug, Clone, Copy)]
enum FBlockKind<'a> {
    WhileLoop,
    /// The iterator sits on the stack
    ForLoop,
    /// Inside the protected body of `try/except`
    TryExcept,
    /// Inside the protected part of `try/finally`; leaving runs the body
    FinallyTry(&'a [Statement]),
    /// Inside the exceptional copy of a finally body; the exception sits
    /// on the stack
    FinallyEnd,
    /// Inside an except handler body, optionally bound to a name
    HandlerCleanup(Option<&'a str>),
    /// Inside a with body; `__exit__` sits on the stack
    With { is_async: bool },
}

#[derive(Debug, Clone, Copy)]
struct FBlock<'a> {
    kind: FBlockKind<'a>,
    /// `continue` target for loops
    start: Label,
    /// `break` target for loops
    exit: Label,
}

impl FBlock<'_> {
    fn is_loop(&self) -> bool {
        matches!(self.kind, FBlockKind::WhileLoop | FBlockKind::ForLoop)
    }
}

/// Compiles AST to bytecode.
///
/// `compile_module` and `compile_expression` return `false` on failure and
/// keep the diagnostic, available through [`Compiler::error`].
pub struct Compiler<'a> {
    filename: Arc<str>,
    scope: Rc<Scope>,
    constants: Vec<Constant>,
    names: Vec<String>,
    name_index: FxHashMap<String, u32>,
    bytecode: Vec<u32>,
    labels: Vec<Option<u32>>,
    patches: Vec<(usize, Label)>,
    fblocks: Vec<FBlock<'a>>,
    line_table: Vec<(u32, u32)>,
    first_line: u32,
    stacksize: u32,
    error: Option<CompileError>,
}

impl<'a> Compiler<'a> {
    /// Creates a new compiler for a top-level unit.
    pub fn new(filename: &str) -> Self {
        Self::with_scope(Arc::from(filename), Rc::new(Scope::module()))
    }

    fn with_scope(filename: Arc<str>, scope: Rc<Scope>) -> Self {
        Self {
            filename,
            scope,
            constants: Vec::new(),
            names: Vec::new(),
            name_index: FxHashMap::default(),
            bytecode: Vec::new(),
            labels: Vec::new(),
            patches: Vec::new(),
            fblocks: Vec::new(),
            line_table: Vec::new(),
            first_line: 1,
            stacksize: 0,
            error: None,
        }
    }

    /// Compiles a module. The code returns the value of a trailing
    /// expression statement, or `None`.
    pub fn compile_module(&mut self, module: &'a Module) -> bool {
        let result = self.try_compile_module(module);
        self.record(result)
    }

    /// Compiles a single expression whose value the code returns.
    pub fn compile_expression(&mut self, expr: &'a Expression) -> bool {
        let result = self.try_compile_expression(expr);
        self.record(result)
    }

    /// The diagnostic of the last failed compile call.
    pub fn error(&self) -> Option<&CompileError> {
        self.error.as_ref()
    }

    /// Emitted bytecode so far.
    pub fn bytecode(&self) -> &[u32] {
        &self.bytecode
    }

    /// Constant pool so far.
    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    /// Name table so far.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Seals the compiled unit into a code object.
    pub fn make_code_object(&self) -> Arc<CodeObject> {
        let scope = &self.scope;
        let nslots = if scope.uses_slots() {
            scope.varnames().len() as u32
        } else {
            0
        };
        Arc::new(CodeObject {
            name: scope.name.clone(),
            qualname: if scope.qualname.is_empty() {
                scope.name.clone()
            } else {
                scope.qualname.clone()
            },
            filename: self.filename.clone(),
            constants: self.constants.clone(),
            names: self.names.clone(),
            bytecode: self.bytecode.clone(),
            argcount: scope.argcount(),
            kwonlyargcount: scope.kwonlyargcount(),
            varnames: scope.varnames().to_vec(),
            nslots,
            stacksize: self.stacksize,
            flags: scope.flags(),
            freevars: scope.freevars().to_vec(),
            cellvars: scope.cellvars().to_vec(),
            first_line: self.first_line,
            line_table: self.line_table.clone(),
        })
    }

    fn record(&mut self, result: CompileResult<()>) -> bool {
        match result {
            Ok(()) => {
                self.error = None;
                true
            }
            Err(err) => {
                debug!(filename = %self.filename, error = %err, "compilation failed");
                self.error = Some(err);
                false
            }
        }
    }

    fn try_compile_module(&mut self, module: &'a Module) -> CompileResult<()> {
        self.scope = analyze_module(module)?;
        if let Some(first) = module.body.first() {
            self.first_line = first.pos.line;
        }
        let count = module.body.len();
        for (i, stmt) in module.body.iter().enumerate() {
            match &stmt.kind {
                StatementKind::Expression(expr) if i + 1 == count => {
                    self.set_line(stmt.pos);
                    self.compile_expr(expr)?;
                    self.emit(OpCode::ReturnValue);
                }
                _ => self.compile_statement(stmt)?,
            }
        }
        if !matches!(module.body.last().map(|s| &s.kind), Some(StatementKind::Expression(_))) {
            self.emit_return_none();
        }
        self.finish()
    }

    fn try_compile_expression(&mut self, expr: &'a Expression) -> CompileResult<()> {
        self.scope = analyze_expression(expr)?;
        self.first_line = expr.pos.line;
        self.set_line(expr.pos);
        self.compile_expr(expr)?;
        self.emit(OpCode::ReturnValue);
        self.finish()
    }

    /// Backpatches jumps and computes the stack size.
    fn finish(&mut self) -> CompileResult<()> {
        for (at, label) in std::mem::take(&mut self.patches) {
            let target = self.labels[label.0].ok_or_else(|| {
                CompileError::new(
                    CompileErrorKind::Internal(format!("label {} never bound", label.0)),
                    Position::default(),
                )
            })?;
            self.bytecode[at] = target;
        }
        self.stacksize = max_stack_depth(&self.bytecode).map_err(|err| {
            CompileError::new(CompileErrorKind::Internal(err.to_string()), Position::default())
        })?;
        Ok(())
    }

    /// Compiles a nested unit with a child compiler and returns its code.
    fn compile_nested(
        &mut self,
        scope: Rc<Scope>,
        pos: Position,
        body: impl FnOnce(&mut Compiler<'a>) -> CompileResult<()>,
    ) -> CompileResult<Arc<CodeObject>> {
        let mut child = Compiler::with_scope(self.filename.clone(), scope);
        child.first_line = pos.line;
        child.set_line(pos);
        body(&mut child)?;
        child.finish()?;
        Ok(child.make_code_object())
    }

    fn missing_scope(pos: Position) -> CompileError {
        CompileError::new(
            CompileErrorKind::Internal("nested scope was not analyzed".into()),
            pos,
        )
    }

    // ========================================================================
    // Emission
    // ========================================================================

    fn emit(&mut self, op: OpCode) -> usize {
        debug_assert!(!op.has_operand(), "{} takes an operand", op);
        let at = self.bytecode.len();
        self.bytecode.push(op as u32);
        at
    }

    fn emit_arg(&mut self, op: OpCode, arg: u32) -> usize {
        debug_assert!(op.has_operand(), "{} takes no operand", op);
        let at = self.bytecode.len();
        self.bytecode.push(op as u32);
        self.bytecode.push(arg);
        at
    }

    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    fn bind_label(&mut self, label: Label) {
        self.labels[label.0] = Some(self.bytecode.len() as u32);
    }

    fn emit_jump(&mut self, op: OpCode, label: Label) {
        debug_assert!(op.is_jump());
        self.emit_arg(op, UNRESOLVED);
        self.patches.push((self.bytecode.len() - 1, label));
    }

    fn set_line(&mut self, pos: Position) {
        if pos.line == 0 {
            return;
        }
        let offset = self.bytecode.len() as u32;
        match self.line_table.last_mut() {
            Some((_, line)) if *line == pos.line => {}
            Some((start, line)) if *start == offset => *line = pos.line,
            _ => self.line_table.push((offset, pos.line)),
        }
    }

    fn add_constant(&mut self, constant: Constant) -> u32 {
        if let Some(i) = self.constants.iter().position(|c| c.same_entry(&constant)) {
            return i as u32;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as u32
    }

    fn emit_const(&mut self, constant: Constant) {
        let index = self.add_constant(constant);
        self.emit_arg(OpCode::LoadConst, index);
    }

    fn emit_return_none(&mut self) {
        self.emit_const(Constant::None);
        self.emit(OpCode::ReturnValue);
    }

    fn add_name(&mut self, name: &str) -> u32 {
        if let Some(&i) = self.name_index.get(name) {
            return i;
        }
        let i = self.names.len() as u32;
        self.names.push(name.to_string());
        self.name_index.insert(name.to_string(), i);
        i
    }

    fn emit_name(&mut self, name: &str, op: NameOp) {
        let (load, store, delete, arg) = match self.scope.access(name) {
            NameAccess::Fast(slot) => (OpCode::LoadFast, OpCode::StoreFast, OpCode::DeleteFast, slot),
            NameAccess::Name => {
                let arg = self.add_name(name);
                (OpCode::LoadName, OpCode::StoreName, OpCode::DeleteName, arg)
            }
            NameAccess::Global => {
                let arg = self.add_name(name);
                (OpCode::LoadGlobal, OpCode::StoreGlobal, OpCode::DeleteGlobal, arg)
            }
            NameAccess::Deref => {
                let arg = self.add_name(name);
                (OpCode::LoadDeref, OpCode::StoreDeref, OpCode::DeleteDeref, arg)
            }
        };
        let opcode = match op {
            NameOp::Load => load,
            NameOp::Store => store,
            NameOp::Delete => delete,
        };
        self.emit_arg(opcode, arg);
    }

    fn load_name(&mut self, name: &str) {
        self.emit_name(name, NameOp::Load);
    }

    fn store_name(&mut self, name: &str) {
        self.emit_name(name, NameOp::Store);
    }

    fn delete_name(&mut self, name: &str) {
        self.emit_name(name, NameOp::Delete);
    }

    fn emit_attr(&mut self, op: OpCode, attr: &str) {
        let index = self.add_name(attr);
        self.emit_arg(op, index);
    }

    // ========================================================================
    // Frame blocks
    // ========================================================================

    fn push_fblock(&mut self, kind: FBlockKind<'a>, start: Label, exit: Label) {
        self.fblocks.push(FBlock { kind, start, exit });
    }

    fn pop_fblock(&mut self) {
        self.fblocks.pop();
    }

    /// Emits the cleanup for leaving `block` early. With `preserve_tos`
    /// the value on top of the stack survives the cleanup.
    fn unwind_fblock(&mut self, block: &FBlock<'a>, preserve_tos: bool) -> CompileResult<()> {
        match block.kind {
            FBlockKind::WhileLoop => {}
            FBlockKind::ForLoop => {
                if preserve_tos {
                    self.emit(OpCode::RotTwo);
                }
                self.emit(OpCode::PopTop);
            }
            FBlockKind::TryExcept => {
                self.emit(OpCode::PopBlock);
            }
            FBlockKind::FinallyTry(body) => {
                self.emit(OpCode::PopBlock);
                self.compile_body(body)?;
            }
            FBlockKind::FinallyEnd => {
                if preserve_tos {
                    self.emit(OpCode::RotTwo);
                }
                self.emit(OpCode::PopTop);
                self.emit(OpCode::PopExcept);
            }
            FBlockKind::HandlerCleanup(name) => {
                self.emit(OpCode::PopExcept);
                if let Some(name) = name {
                    self.emit_const(Constant::None);
                    self.store_name(name);
                    self.delete_name(name);
                }
            }
            FBlockKind::With { is_async } => {
                self.emit(OpCode::PopBlock);
                if preserve_tos {
                    self.emit(OpCode::RotTwo);
                }
                self.emit_const(Constant::None);
                self.emit(OpCode::DupTop);
                self.emit(OpCode::DupTop);
                self.emit_arg(OpCode::CallFunction, 3);
                if is_async {
                    self.emit_await();
                }
                self.emit(OpCode::PopTop);
            }
        }
        Ok(())
    }

    /// Unwinds frame blocks from the top. With `loop_only`, stops at the
    /// innermost loop and returns it without unwinding it.
    fn unwind_fblock_stack(&mut self, preserve_tos: bool, loop_only: bool) -> CompileResult<Option<FBlock<'a>>> {
        let Some(top) = self.fblocks.last().copied() else {
            return Ok(None);
        };
        if loop_only && top.is_loop() {
            return Ok(Some(top));
        }
        self.fblocks.pop();
        let unwound = self.unwind_fblock(&top, preserve_tos);
        let result = match unwound {
            Ok(()) => self.unwind_fblock_stack(preserve_tos, loop_only),
            Err(err) => Err(err),
        };
        self.fblocks.push(top);
        result
    }

    /// `GET_AWAITABLE; LOAD_CONST None; YIELD_FROM`
    fn emit_await(&mut self) {
        self.emit(OpCode::GetAwaitable);
        self.emit_const(Constant::None);
        self.emit(OpCode::YieldFrom);
    }
}
