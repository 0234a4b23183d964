//! Statement compilation.
//!
//! Statements leave the operand stack as they found it. Control flow uses
//! labels resolved at the end of the unit.
//!
//! ## Loops
//!
//! ```text
//! for i in range(3): body
//!
//!   LOAD_NAME range; LOAD_CONST 3; CALL_FUNCTION 1; GET_ITER
//! start:
//!   FOR_ITER cleanup      ; exhausted: pop iterator, jump
//!   STORE_NAME i
//!   body
//!   JUMP_ABSOLUTE start
//! cleanup:
//!   orelse
//! exit:                    ; break lands here
//! ```
//!
//! ## Exception Handling
//!
//! | Construct | Lowering |
//! |-----------|----------|
//! | `try/except` | `SETUP_FINALLY handler`, body, `POP_BLOCK`, else, `JUMP end` |
//! | handler test | `DUP_TOP`, type, `JUMP_IF_NOT_EXC_MATCH next` |
//! | no match | `RERAISE` |
//! | `finally` | body copied on the normal path and on the exceptional path (then `RERAISE`) |
//! | `with` | `SETUP_WITH handler`, body, `POP_BLOCK`, `__exit__(None, None, None)` |
//!
//! A handler starts with the exception on the stack and the previously
//! handled exception saved by the interpreter; `POP_EXCEPT` restores it.

use std::sync::Arc;

use super::expressions::inplace_opcode;
use super::{Compiler, FBlockKind};
use crate::ast::*;
use crate::compiler::bytecode::OpCode;
use crate::compiler::code::Constant;
use crate::compiler::error::{CompileError, CompileErrorKind, CompileResult};
use crate::compiler::symtable::ScopeKind;

impl<'a> Compiler<'a> {
    pub(super) fn compile_body(&mut self, body: &'a [Statement]) -> CompileResult<()> {
        body.iter().try_for_each(|stmt| self.compile_statement(stmt))
    }

    pub(super) fn compile_statement(&mut self, stmt: &'a Statement) -> CompileResult<()> {
        self.set_line(stmt.pos);
        match &stmt.kind {
            StatementKind::Expression(expr) => {
                self.compile_expr(expr)?;
                self.emit(OpCode::PopTop);
                Ok(())
            }
            StatementKind::Assign(assign) => {
                self.compile_expr(&assign.value)?;
                let count = assign.targets.len();
                for (i, target) in assign.targets.iter().enumerate() {
                    if i + 1 < count {
                        self.emit(OpCode::DupTop);
                    }
                    self.compile_store(target)?;
                }
                Ok(())
            }
            StatementKind::AugAssign(aug) => self.compile_aug_assign(aug),
            StatementKind::AnnAssign(ann) => {
                if let Some(value) = &ann.value {
                    self.compile_expr(value)?;
                    self.compile_store(&ann.target)?;
                }
                Ok(())
            }
            StatementKind::If(if_stmt) => self.compile_if(if_stmt),
            StatementKind::While(while_stmt) => self.compile_while(while_stmt),
            StatementKind::For(for_stmt) if for_stmt.is_async => self.compile_async_for(for_stmt),
            StatementKind::For(for_stmt) => self.compile_for(for_stmt),
            StatementKind::Break => self.compile_break(stmt.pos),
            StatementKind::Continue => self.compile_continue(stmt.pos),
            StatementKind::Pass => Ok(()),
            StatementKind::Return(value) => self.compile_return(value.as_ref(), stmt.pos),
            StatementKind::FunctionDef(def) => self.compile_function_def(def, stmt.pos),
            StatementKind::ClassDef(class) => self.compile_class_def(class, stmt.pos),
            StatementKind::Try(try_stmt) => self.compile_try(try_stmt),
            StatementKind::Raise(raise) => {
                let mut argc = 0;
                if let Some(exc) = &raise.exc {
                    self.compile_expr(exc)?;
                    argc += 1;
                    if let Some(cause) = &raise.cause {
                        self.compile_expr(cause)?;
                        argc += 1;
                    }
                }
                self.emit_arg(OpCode::RaiseVarargs, argc);
                Ok(())
            }
            StatementKind::With(with) => self.compile_with(with, 0),
            StatementKind::Import(aliases) => self.compile_import(aliases),
            StatementKind::ImportFrom(from) => self.compile_import_from(from),
            StatementKind::Global(_) | StatementKind::Nonlocal(_) => Ok(()),
            StatementKind::Delete(targets) => targets.iter().try_for_each(|t| self.compile_delete(t)),
            StatementKind::Assert(assert) => self.compile_assert(assert),
        }
    }

    fn compile_aug_assign(&mut self, aug: &'a AugAssignStatement) -> CompileResult<()> {
        let op = inplace_opcode(aug.op);
        match &aug.target.kind {
            ExpressionKind::Name(name) => {
                self.load_name(name);
                self.compile_expr(&aug.value)?;
                self.emit(op);
                self.store_name(name);
            }
            ExpressionKind::Attribute(attr) => {
                self.compile_expr(&attr.value)?;
                self.emit(OpCode::DupTop);
                self.emit_attr(OpCode::LoadAttr, &attr.attr);
                self.compile_expr(&aug.value)?;
                self.emit(op);
                self.emit(OpCode::RotTwo);
                self.emit_attr(OpCode::StoreAttr, &attr.attr);
            }
            ExpressionKind::Subscript(sub) => {
                self.compile_expr(&sub.value)?;
                self.compile_expr(&sub.index)?;
                self.emit(OpCode::DupTopTwo);
                self.emit(OpCode::BinarySubscr);
                self.compile_expr(&aug.value)?;
                self.emit(op);
                self.emit(OpCode::RotThree);
                self.emit(OpCode::StoreSubscr);
            }
            _ => {
                return Err(CompileError::new(
                    CompileErrorKind::InvalidTarget("assign to", "expression"),
                    aug.target.pos,
                ))
            }
        }
        Ok(())
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    fn compile_if(&mut self, if_stmt: &'a IfStatement) -> CompileResult<()> {
        let orelse = self.new_label();
        self.compile_expr(&if_stmt.test)?;
        self.emit_jump(OpCode::PopJumpIfFalse, orelse);
        self.compile_body(&if_stmt.body)?;
        if if_stmt.orelse.is_empty() {
            self.bind_label(orelse);
        } else {
            let end = self.new_label();
            self.emit_jump(OpCode::JumpAbsolute, end);
            self.bind_label(orelse);
            self.compile_body(&if_stmt.orelse)?;
            self.bind_label(end);
        }
        Ok(())
    }

    fn compile_while(&mut self, while_stmt: &'a WhileStatement) -> CompileResult<()> {
        let start = self.new_label();
        let orelse = self.new_label();
        let exit = self.new_label();

        self.bind_label(start);
        self.compile_expr(&while_stmt.test)?;
        self.emit_jump(OpCode::PopJumpIfFalse, orelse);

        self.push_fblock(FBlockKind::WhileLoop, start, exit);
        self.compile_body(&while_stmt.body)?;
        self.pop_fblock();
        self.emit_jump(OpCode::JumpAbsolute, start);

        self.bind_label(orelse);
        self.compile_body(&while_stmt.orelse)?;
        self.bind_label(exit);
        Ok(())
    }

    fn compile_for(&mut self, for_stmt: &'a ForStatement) -> CompileResult<()> {
        let start = self.new_label();
        let cleanup = self.new_label();
        let exit = self.new_label();

        self.compile_expr(&for_stmt.iter)?;
        self.emit(OpCode::GetIter);

        self.bind_label(start);
        self.emit_jump(OpCode::ForIter, cleanup);
        self.push_fblock(FBlockKind::ForLoop, start, exit);
        self.compile_store(&for_stmt.target)?;
        self.compile_body(&for_stmt.body)?;
        self.pop_fblock();
        self.emit_jump(OpCode::JumpAbsolute, start);

        self.bind_label(cleanup);
        self.compile_body(&for_stmt.orelse)?;
        self.bind_label(exit);
        Ok(())
    }

    /// ```text
    ///   GET_AITER
    /// start:
    ///   SETUP_FINALLY done; GET_ANEXT; LOAD_CONST None; YIELD_FROM; POP_BLOCK
    ///   store target; body; JUMP_ABSOLUTE start
    /// done:
    ///   END_ASYNC_FOR; orelse
    /// ```
    fn compile_async_for(&mut self, for_stmt: &'a ForStatement) -> CompileResult<()> {
        let start = self.new_label();
        let done = self.new_label();
        let exit = self.new_label();

        self.compile_expr(&for_stmt.iter)?;
        self.emit(OpCode::GetAiter);

        self.bind_label(start);
        self.emit_jump(OpCode::SetupFinally, done);
        self.emit(OpCode::GetAnext);
        self.emit_const(Constant::None);
        self.emit(OpCode::YieldFrom);
        self.emit(OpCode::PopBlock);

        self.push_fblock(FBlockKind::ForLoop, start, exit);
        self.compile_store(&for_stmt.target)?;
        self.compile_body(&for_stmt.body)?;
        self.pop_fblock();
        self.emit_jump(OpCode::JumpAbsolute, start);

        self.bind_label(done);
        self.emit(OpCode::EndAsyncFor);
        self.compile_body(&for_stmt.orelse)?;
        self.bind_label(exit);
        Ok(())
    }

    fn compile_break(&mut self, pos: Position) -> CompileResult<()> {
        let Some(loop_block) = self.unwind_fblock_stack(false, true)? else {
            return Err(CompileError::new(CompileErrorKind::BreakOutsideLoop, pos));
        };
        self.unwind_fblock(&loop_block, false)?;
        self.emit_jump(OpCode::JumpAbsolute, loop_block.exit);
        Ok(())
    }

    fn compile_continue(&mut self, pos: Position) -> CompileResult<()> {
        let Some(loop_block) = self.unwind_fblock_stack(false, true)? else {
            return Err(CompileError::new(CompileErrorKind::ContinueOutsideLoop, pos));
        };
        self.emit_jump(OpCode::JumpAbsolute, loop_block.start);
        Ok(())
    }

    fn compile_return(&mut self, value: Option<&'a Expression>, pos: Position) -> CompileResult<()> {
        if matches!(self.scope.kind, ScopeKind::Module | ScopeKind::Class) {
            return Err(CompileError::new(CompileErrorKind::ReturnOutsideFunction, pos));
        }
        match value {
            Some(value) => {
                self.compile_expr(value)?;
                self.unwind_fblock_stack(true, false)?;
            }
            None => {
                self.unwind_fblock_stack(false, false)?;
                self.emit_const(Constant::None);
            }
        }
        self.emit(OpCode::ReturnValue);
        Ok(())
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    fn compile_function_def(&mut self, def: &'a FunctionDef, pos: Position) -> CompileResult<()> {
        for decorator in &def.decorators {
            self.compile_expr(decorator)?;
        }
        let scope = self.scope.function(def).ok_or_else(|| Self::missing_scope(pos))?;
        let code = self.compile_nested(scope, pos, |c| {
            c.compile_body(&def.body)?;
            if !matches!(def.body.last().map(|s| &s.kind), Some(StatementKind::Return(_))) {
                c.emit_return_none();
            }
            Ok(())
        })?;
        self.emit_make_function(&def.params, code)?;
        for _ in &def.decorators {
            self.emit_arg(OpCode::CallFunction, 1);
        }
        self.store_name(&def.name);
        Ok(())
    }

    /// ```text
    ///   LOAD_CONST <code>; LOAD_CONST 'A'; MAKE_FUNCTION 0
    ///   LOAD_CONST 'A'; bases...; BUILD_CLASS n
    /// ```
    fn compile_class_def(&mut self, class: &'a ClassDef, pos: Position) -> CompileResult<()> {
        for decorator in &class.decorators {
            self.compile_expr(decorator)?;
        }
        let scope = self.scope.class(class).ok_or_else(|| Self::missing_scope(pos))?;
        let qualname = scope.qualname.clone();
        let code = self.compile_nested(scope, pos, |c| {
            c.load_name("__name__");
            c.store_name("__module__");
            c.emit_const(Constant::Str(Arc::from(qualname.as_str())));
            c.store_name("__qualname__");
            c.compile_body(&class.body)?;
            c.emit_return_none();
            Ok(())
        })?;
        self.emit_code(code);
        self.emit_arg(OpCode::MakeFunction, 0);
        self.emit_const(Constant::Str(Arc::from(class.name.as_str())));
        for base in &class.bases {
            self.compile_expr(base)?;
        }
        // Keywords such as metaclass= are evaluated for their effects only.
        for keyword in &class.keywords {
            self.compile_expr(&keyword.value)?;
            self.emit(OpCode::PopTop);
        }
        self.emit_arg(OpCode::BuildClass, class.bases.len() as u32);
        for _ in &class.decorators {
            self.emit_arg(OpCode::CallFunction, 1);
        }
        self.store_name(&class.name);
        Ok(())
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    fn compile_try(&mut self, try_stmt: &'a TryStatement) -> CompileResult<()> {
        if try_stmt.finalbody.is_empty() {
            return self.compile_try_except(try_stmt);
        }

        let handler = self.new_label();
        let end = self.new_label();
        let unused = self.new_label();

        self.emit_jump(OpCode::SetupFinally, handler);
        self.push_fblock(FBlockKind::FinallyTry(&try_stmt.finalbody), unused, unused);
        if try_stmt.handlers.is_empty() {
            self.compile_body(&try_stmt.body)?;
        } else {
            self.compile_try_except(try_stmt)?;
        }
        self.emit(OpCode::PopBlock);
        self.pop_fblock();
        self.compile_body(&try_stmt.finalbody)?;
        self.emit_jump(OpCode::JumpAbsolute, end);

        self.bind_label(handler);
        self.push_fblock(FBlockKind::FinallyEnd, unused, unused);
        self.compile_body(&try_stmt.finalbody)?;
        self.pop_fblock();
        self.emit(OpCode::Reraise);

        self.bind_label(end);
        self.bind_label(unused);
        Ok(())
    }

    fn compile_try_except(&mut self, try_stmt: &'a TryStatement) -> CompileResult<()> {
        let handlers = self.new_label();
        let end = self.new_label();
        let unused = self.new_label();

        self.emit_jump(OpCode::SetupFinally, handlers);
        self.push_fblock(FBlockKind::TryExcept, unused, unused);
        self.compile_body(&try_stmt.body)?;
        self.pop_fblock();
        self.emit(OpCode::PopBlock);
        self.compile_body(&try_stmt.orelse)?;
        self.emit_jump(OpCode::JumpAbsolute, end);

        self.bind_label(handlers);
        for handler in &try_stmt.handlers {
            self.set_line(handler.pos);
            let next = self.new_label();
            match &handler.kind {
                Some(kind) => {
                    self.emit(OpCode::DupTop);
                    self.compile_expr(kind)?;
                    self.emit_jump(OpCode::JumpIfNotExcMatch, next);
                }
                None => {}
            }
            match &handler.name {
                Some(name) => self.store_name(name),
                None => {
                    self.emit(OpCode::PopTop);
                }
            }

            let name = handler.name.as_deref();
            self.push_fblock(FBlockKind::HandlerCleanup(name), unused, unused);
            self.compile_body(&handler.body)?;
            self.pop_fblock();
            self.emit(OpCode::PopExcept);
            if let Some(name) = name {
                self.emit_const(Constant::None);
                self.store_name(name);
                self.delete_name(name);
            }
            self.emit_jump(OpCode::JumpAbsolute, end);
            self.bind_label(next);
        }
        // No handler matched.
        self.emit(OpCode::Reraise);

        self.bind_label(end);
        self.bind_label(unused);
        Ok(())
    }

    /// Compiles `with` items from `index` on, nesting one block per item.
    fn compile_with(&mut self, with: &'a WithStatement, index: usize) -> CompileResult<()> {
        let Some(item) = with.items.get(index) else {
            return self.compile_body(&with.body);
        };
        let handler = self.new_label();
        let suppress = self.new_label();
        let end = self.new_label();
        let unused = self.new_label();

        self.compile_expr(&item.context)?;
        if with.is_async {
            self.emit(OpCode::BeforeAsyncWith);
            self.emit_await();
            self.emit_jump(OpCode::SetupAsyncWith, handler);
        } else {
            self.emit_jump(OpCode::SetupWith, handler);
        }
        match &item.target {
            Some(target) => self.compile_store(target)?,
            None => {
                self.emit(OpCode::PopTop);
            }
        }

        self.push_fblock(FBlockKind::With { is_async: with.is_async }, unused, unused);
        self.compile_with(with, index + 1)?;
        self.pop_fblock();

        // Normal exit: __exit__(None, None, None)
        self.emit(OpCode::PopBlock);
        self.emit_const(Constant::None);
        self.emit(OpCode::DupTop);
        self.emit(OpCode::DupTop);
        self.emit_arg(OpCode::CallFunction, 3);
        if with.is_async {
            self.emit_await();
        }
        self.emit(OpCode::PopTop);
        self.emit_jump(OpCode::JumpAbsolute, end);

        // Exceptional exit: stack is [__exit__, exc].
        self.bind_label(handler);
        self.emit(OpCode::WithExceptStart);
        if with.is_async {
            self.emit_await();
        }
        self.emit_jump(OpCode::PopJumpIfTrue, suppress);
        self.emit(OpCode::Reraise);

        self.bind_label(suppress);
        self.emit(OpCode::PopTop);
        self.emit(OpCode::PopExcept);
        self.emit(OpCode::PopTop);

        self.bind_label(end);
        self.bind_label(unused);
        Ok(())
    }

    // ========================================================================
    // Imports and assert
    // ========================================================================

    fn compile_import(&mut self, aliases: &'a [Alias]) -> CompileResult<()> {
        for alias in aliases {
            self.emit_const(Constant::Int(0));
            self.emit_const(Constant::None);
            self.emit_attr(OpCode::ImportName, &alias.name);
            match &alias.asname {
                Some(asname) => {
                    // IMPORT_NAME pushed the top-level package; walk down.
                    for component in alias.name.split('.').skip(1) {
                        self.emit_attr(OpCode::ImportFrom, component);
                        self.emit(OpCode::RotTwo);
                        self.emit(OpCode::PopTop);
                    }
                    self.store_name(asname);
                }
                None => {
                    let top = alias.name.split('.').next().unwrap_or(&alias.name);
                    self.store_name(top);
                }
            }
        }
        Ok(())
    }

    fn compile_import_from(&mut self, from: &'a ImportFrom) -> CompileResult<()> {
        let names: Vec<Constant> = from
            .names
            .iter()
            .map(|alias| Constant::Str(Arc::from(alias.name.as_str())))
            .collect();
        self.emit_const(Constant::Int(i64::from(from.level)));
        self.emit_const(Constant::Tuple(names.into()));
        self.emit_attr(OpCode::ImportName, from.module.as_deref().unwrap_or(""));

        if from.names.iter().any(|alias| alias.name == "*") {
            self.emit(OpCode::ImportStar);
            return Ok(());
        }
        for alias in &from.names {
            self.emit_attr(OpCode::ImportFrom, &alias.name);
            self.store_name(alias.asname.as_deref().unwrap_or(&alias.name));
        }
        self.emit(OpCode::PopTop);
        Ok(())
    }

    fn compile_assert(&mut self, assert: &'a AssertStatement) -> CompileResult<()> {
        let end = self.new_label();
        self.compile_expr(&assert.test)?;
        self.emit_jump(OpCode::PopJumpIfTrue, end);
        self.emit(OpCode::LoadAssertionError);
        if let Some(msg) = &assert.msg {
            self.compile_expr(msg)?;
            self.emit_arg(OpCode::CallFunction, 1);
        }
        self.emit_arg(OpCode::RaiseVarargs, 1);
        self.bind_label(end);
        Ok(())
    }
}
