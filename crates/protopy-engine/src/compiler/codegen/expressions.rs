//! Expression compilation.
//!
//! Every expression leaves exactly one value on the operand stack.
//!
//! ## Expression Compilation Overview
//!
//! | Expression | Key Operations | Stack Effect |
//! |------------|----------------|--------------|
//! | Literal | `LOAD_CONST` | Push value |
//! | Name | `LOAD_FAST`/`LOAD_NAME`/`LOAD_GLOBAL`/`LOAD_DEREF` | Push value |
//! | Binary | `BINARY_ADD`/`BINARY_SUBTRACT`/etc | Pop 2, push 1 |
//! | Compare | `COMPARE_OP n` | Pop 2, push 1 |
//! | `and`/`or` | `JUMP_IF_FALSE_OR_POP`/`JUMP_IF_TRUE_OR_POP` | Short-circuit |
//! | Call | `CALL_FUNCTION`/`CALL_FUNCTION_KW`/`CALL_FUNCTION_EX` | Pop callee and args, push result |
//! | Comprehension | `MAKE_FUNCTION`, `GET_ITER`, `CALL_FUNCTION 1` | Push result |
//! | `yield from`/`await` | `GET_YIELD_FROM_ITER`/`GET_AWAITABLE`, `YIELD_FROM` | Pop 1, push 1 |
//!
//! ## Stack Machine Model
//!
//! ```text
//! Expression: 1 + 2 * 3
//!
//! Bytecode:
//!   LOAD_CONST 1      ; stack: [1]
//!   LOAD_CONST 2      ; stack: [1, 2]
//!   LOAD_CONST 3      ; stack: [1, 2, 3]
//!   BINARY_MULTIPLY   ; stack: [1, 6]
//!   BINARY_ADD        ; stack: [7]
//! ```
//!
//! ## Comparison Chains
//!
//! `a < b < c` evaluates `b` once:
//!
//! ```text
//!   a; b; DUP_TOP; ROT_THREE; COMPARE_OP <; JUMP_IF_FALSE_OR_POP cleanup
//!   c; COMPARE_OP <; JUMP_ABSOLUTE end
//! cleanup:
//!   ROT_TWO; POP_TOP
//! end:
//! ```

use std::rc::Rc;
use std::sync::Arc;

use num_bigint::BigInt;

use super::Compiler;
use crate::ast::*;
use crate::compiler::bytecode::{
    CompareOp, OpCode, FORMAT_ASCII, FORMAT_REPR, FORMAT_STR, FORMAT_WITH_SPEC, MAKE_FUNCTION_DEFAULTS,
    MAKE_FUNCTION_KWDEFAULTS,
};
use crate::compiler::code::{CodeObject, Constant};
use crate::compiler::error::{CompileError, CompileErrorKind, CompileResult};
use crate::compiler::symtable::{Scope, COMPREHENSION_ITER};

/// What a comprehension builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

/// The element part of a comprehension.
#[derive(Clone, Copy)]
enum Element<'a> {
    Single(&'a Expression),
    Pair(&'a Expression, &'a Expression),
}

pub(super) fn binary_opcode(op: BinaryOperator) -> OpCode {
    match op {
        BinaryOperator::Add => OpCode::BinaryAdd,
        BinaryOperator::Sub => OpCode::BinarySubtract,
        BinaryOperator::Mul => OpCode::BinaryMultiply,
        BinaryOperator::Div => OpCode::BinaryTrueDivide,
        BinaryOperator::FloorDiv => OpCode::BinaryFloorDivide,
        BinaryOperator::Mod => OpCode::BinaryModulo,
        BinaryOperator::Pow => OpCode::BinaryPower,
        BinaryOperator::LShift => OpCode::BinaryLshift,
        BinaryOperator::RShift => OpCode::BinaryRshift,
        BinaryOperator::BitAnd => OpCode::BinaryAnd,
        BinaryOperator::BitOr => OpCode::BinaryOr,
        BinaryOperator::BitXor => OpCode::BinaryXor,
    }
}

pub(super) fn inplace_opcode(op: BinaryOperator) -> OpCode {
    match op {
        BinaryOperator::Add => OpCode::InplaceAdd,
        BinaryOperator::Sub => OpCode::InplaceSubtract,
        BinaryOperator::Mul => OpCode::InplaceMultiply,
        BinaryOperator::Div => OpCode::InplaceTrueDivide,
        BinaryOperator::FloorDiv => OpCode::InplaceFloorDivide,
        BinaryOperator::Mod => OpCode::InplaceModulo,
        BinaryOperator::Pow => OpCode::InplacePower,
        BinaryOperator::LShift => OpCode::InplaceLshift,
        BinaryOperator::RShift => OpCode::InplaceRshift,
        BinaryOperator::BitAnd => OpCode::InplaceAnd,
        BinaryOperator::BitOr => OpCode::InplaceOr,
        BinaryOperator::BitXor => OpCode::InplaceXor,
    }
}

fn is_starred(expr: &Expression) -> bool {
    matches!(expr.kind, ExpressionKind::Starred(_))
}

impl<'a> Compiler<'a> {
    pub(super) fn compile_expr(&mut self, expr: &'a Expression) -> CompileResult<()> {
        match &expr.kind {
            ExpressionKind::Literal(lit) => self.compile_literal(lit, expr.pos),
            ExpressionKind::Name(name) => {
                self.load_name(name);
                Ok(())
            }
            ExpressionKind::BoolOp(bool_op) => self.compile_bool_op(bool_op),
            ExpressionKind::Binary(bin) => {
                self.compile_expr(&bin.left)?;
                self.compile_expr(&bin.right)?;
                self.emit(binary_opcode(bin.op));
                Ok(())
            }
            ExpressionKind::Unary(unary) => {
                self.compile_expr(&unary.operand)?;
                self.emit(match unary.op {
                    UnaryOperator::Not => OpCode::UnaryNot,
                    UnaryOperator::Neg => OpCode::UnaryNegative,
                    UnaryOperator::Pos => OpCode::UnaryPositive,
                    UnaryOperator::Invert => OpCode::UnaryInvert,
                });
                Ok(())
            }
            ExpressionKind::Compare(cmp) => self.compile_compare(cmp),
            ExpressionKind::Call(call) => self.compile_call(call),
            ExpressionKind::Attribute(attr) => {
                self.compile_expr(&attr.value)?;
                self.emit_attr(OpCode::LoadAttr, &attr.attr);
                Ok(())
            }
            ExpressionKind::Subscript(sub) => {
                self.compile_expr(&sub.value)?;
                self.compile_expr(&sub.index)?;
                self.emit(OpCode::BinarySubscr);
                Ok(())
            }
            ExpressionKind::Slice(slice) => self.compile_slice(slice),
            ExpressionKind::Starred(_) => Err(CompileError::new(CompileErrorKind::StarredNotAllowed, expr.pos)),
            ExpressionKind::List(items) => self.compile_sequence_display(items, OpCode::BuildList, false),
            ExpressionKind::Tuple(items) => self.compile_sequence_display(items, OpCode::BuildTuple, true),
            ExpressionKind::Set(items) => self.compile_set_display(items),
            ExpressionKind::Dict(items) => self.compile_dict_display(items),
            ExpressionKind::ListComp(comp) => {
                let scope = self.scope.comprehension(comp).ok_or_else(|| Self::missing_scope(expr.pos))?;
                self.compile_comprehension(
                    scope,
                    ComprehensionKind::List,
                    &comp.generators,
                    Element::Single(&comp.element),
                    expr.pos,
                )
            }
            ExpressionKind::SetComp(comp) => {
                let scope = self.scope.comprehension(comp).ok_or_else(|| Self::missing_scope(expr.pos))?;
                self.compile_comprehension(
                    scope,
                    ComprehensionKind::Set,
                    &comp.generators,
                    Element::Single(&comp.element),
                    expr.pos,
                )
            }
            ExpressionKind::GeneratorExp(comp) => {
                let scope = self.scope.comprehension(comp).ok_or_else(|| Self::missing_scope(expr.pos))?;
                self.compile_comprehension(
                    scope,
                    ComprehensionKind::Generator,
                    &comp.generators,
                    Element::Single(&comp.element),
                    expr.pos,
                )
            }
            ExpressionKind::DictComp(comp) => {
                let scope = self
                    .scope
                    .dict_comprehension(comp)
                    .ok_or_else(|| Self::missing_scope(expr.pos))?;
                self.compile_comprehension(
                    scope,
                    ComprehensionKind::Dict,
                    &comp.generators,
                    Element::Pair(&comp.key, &comp.value),
                    expr.pos,
                )
            }
            ExpressionKind::Conditional(cond) => {
                let orelse = self.new_label();
                let end = self.new_label();
                self.compile_expr(&cond.test)?;
                self.emit_jump(OpCode::PopJumpIfFalse, orelse);
                self.compile_expr(&cond.body)?;
                self.emit_jump(OpCode::JumpAbsolute, end);
                self.bind_label(orelse);
                self.compile_expr(&cond.orelse)?;
                self.bind_label(end);
                Ok(())
            }
            ExpressionKind::Lambda(lambda) => self.compile_lambda(lambda, expr.pos),
            ExpressionKind::Yield(value) => {
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.emit_const(Constant::None),
                }
                self.emit(OpCode::YieldValue);
                Ok(())
            }
            ExpressionKind::YieldFrom(value) => {
                self.compile_expr(value)?;
                self.emit(OpCode::GetYieldFromIter);
                self.emit_const(Constant::None);
                self.emit(OpCode::YieldFrom);
                Ok(())
            }
            ExpressionKind::Await(value) => {
                self.compile_expr(value)?;
                self.emit_await();
                Ok(())
            }
            ExpressionKind::FormattedString(parts) => self.compile_fstring(parts),
            ExpressionKind::NamedExpr(named) => {
                self.compile_expr(&named.value)?;
                self.emit(OpCode::DupTop);
                self.store_name(&named.target);
                Ok(())
            }
        }
    }

    fn literal_constant(lit: &Literal, pos: Position) -> CompileResult<Constant> {
        Ok(match lit {
            Literal::None => Constant::None,
            Literal::Bool(b) => Constant::Bool(*b),
            Literal::Int(n) => Constant::Int(*n),
            Literal::BigInt(digits) => {
                let big: BigInt = digits.parse().map_err(|_| {
                    CompileError::new(CompileErrorKind::Internal(format!("bad integer literal {}", digits)), pos)
                })?;
                Constant::BigInt(Arc::new(big))
            }
            Literal::Float(x) => Constant::Float(*x),
            Literal::Str(s) => Constant::Str(Arc::from(s.as_str())),
            Literal::Ellipsis => Constant::Ellipsis,
        })
    }

    fn compile_literal(&mut self, lit: &Literal, pos: Position) -> CompileResult<()> {
        let constant = Self::literal_constant(lit, pos)?;
        self.emit_const(constant);
        Ok(())
    }

    fn compile_bool_op(&mut self, bool_op: &'a BoolOpExpression) -> CompileResult<()> {
        let end = self.new_label();
        let jump = match bool_op.op {
            BoolOperator::And => OpCode::JumpIfFalseOrPop,
            BoolOperator::Or => OpCode::JumpIfTrueOrPop,
        };
        let (last, rest) = match bool_op.values.split_last() {
            Some(split) => split,
            None => return Ok(()),
        };
        for value in rest {
            self.compile_expr(value)?;
            self.emit_jump(jump, end);
        }
        self.compile_expr(last)?;
        self.bind_label(end);
        Ok(())
    }

    fn compile_compare(&mut self, cmp: &'a CompareExpression) -> CompileResult<()> {
        self.compile_expr(&cmp.left)?;
        let count = cmp.ops.len();
        if count == 1 {
            self.compile_expr(&cmp.comparators[0])?;
            self.emit_arg(OpCode::CompareOp, CompareOp::from(cmp.ops[0]) as u32);
            return Ok(());
        }

        let cleanup = self.new_label();
        let end = self.new_label();
        for (i, (op, right)) in cmp.ops.iter().zip(&cmp.comparators).enumerate() {
            self.compile_expr(right)?;
            if i + 1 < count {
                self.emit(OpCode::DupTop);
                self.emit(OpCode::RotThree);
                self.emit_arg(OpCode::CompareOp, CompareOp::from(*op) as u32);
                self.emit_jump(OpCode::JumpIfFalseOrPop, cleanup);
            } else {
                self.emit_arg(OpCode::CompareOp, CompareOp::from(*op) as u32);
            }
        }
        self.emit_jump(OpCode::JumpAbsolute, end);
        self.bind_label(cleanup);
        self.emit(OpCode::RotTwo);
        self.emit(OpCode::PopTop);
        self.bind_label(end);
        Ok(())
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn compile_call(&mut self, call: &'a CallExpression) -> CompileResult<()> {
        self.compile_expr(&call.func)?;

        if call.has_unpacking() {
            self.compile_unpacking_call(call)
        } else if call.keywords.is_empty() {
            for arg in &call.args {
                self.compile_expr(arg)?;
            }
            self.emit_arg(OpCode::CallFunction, call.args.len() as u32);
            Ok(())
        } else {
            for arg in &call.args {
                self.compile_expr(arg)?;
            }
            let mut names = Vec::with_capacity(call.keywords.len());
            for keyword in &call.keywords {
                self.compile_expr(&keyword.value)?;
                if let Some(name) = &keyword.name {
                    names.push(Constant::Str(Arc::from(name.as_str())));
                }
            }
            self.emit_const(Constant::Tuple(names.into()));
            let total = call.args.len() + call.keywords.len();
            self.emit_arg(OpCode::CallFunctionKw, total as u32);
            Ok(())
        }
    }

    /// Builds the positional tuple (and keyword dict) explicitly.
    fn compile_unpacking_call(&mut self, call: &'a CallExpression) -> CompileResult<()> {
        self.emit_arg(OpCode::BuildList, 0);
        for arg in &call.args {
            match &arg.kind {
                ExpressionKind::Starred(inner) => {
                    self.compile_expr(inner)?;
                    self.emit_arg(OpCode::ListExtend, 1);
                }
                _ => {
                    self.compile_expr(arg)?;
                    self.emit_arg(OpCode::ListAppend, 1);
                }
            }
        }
        self.emit(OpCode::ListToTuple);

        if call.keywords.is_empty() {
            self.emit_arg(OpCode::CallFunctionEx, 0);
            return Ok(());
        }
        self.emit_arg(OpCode::BuildMap, 0);
        for keyword in &call.keywords {
            match &keyword.name {
                Some(name) => {
                    self.emit_const(Constant::Str(Arc::from(name.as_str())));
                    self.compile_expr(&keyword.value)?;
                    self.emit_arg(OpCode::MapAdd, 1);
                }
                None => {
                    self.compile_expr(&keyword.value)?;
                    self.emit_arg(OpCode::DictMerge, 1);
                }
            }
        }
        self.emit_arg(OpCode::CallFunctionEx, 1);
        Ok(())
    }

    // ========================================================================
    // Displays
    // ========================================================================

    fn compile_slice(&mut self, slice: &'a SliceExpression) -> CompileResult<()> {
        for part in [&slice.lower, &slice.upper] {
            match part {
                Some(expr) => self.compile_expr(expr)?,
                None => self.emit_const(Constant::None),
            }
        }
        match &slice.step {
            Some(step) => {
                self.compile_expr(step)?;
                self.emit_arg(OpCode::BuildSlice, 3);
            }
            None => {
                self.emit_arg(OpCode::BuildSlice, 2);
            }
        }
        Ok(())
    }

    fn compile_sequence_display(&mut self, items: &'a [Expression], build: OpCode, tuple: bool) -> CompileResult<()> {
        if !items.iter().any(is_starred) {
            for item in items {
                self.compile_expr(item)?;
            }
            self.emit_arg(build, items.len() as u32);
            return Ok(());
        }
        self.emit_arg(OpCode::BuildList, 0);
        for item in items {
            match &item.kind {
                ExpressionKind::Starred(inner) => {
                    self.compile_expr(inner)?;
                    self.emit_arg(OpCode::ListExtend, 1);
                }
                _ => {
                    self.compile_expr(item)?;
                    self.emit_arg(OpCode::ListAppend, 1);
                }
            }
        }
        if tuple {
            self.emit(OpCode::ListToTuple);
        }
        Ok(())
    }

    fn compile_set_display(&mut self, items: &'a [Expression]) -> CompileResult<()> {
        if !items.iter().any(is_starred) {
            for item in items {
                self.compile_expr(item)?;
            }
            self.emit_arg(OpCode::BuildSet, items.len() as u32);
            return Ok(());
        }
        self.emit_arg(OpCode::BuildSet, 0);
        for item in items {
            match &item.kind {
                ExpressionKind::Starred(inner) => {
                    self.compile_expr(inner)?;
                    self.emit_arg(OpCode::SetUpdate, 1);
                }
                _ => {
                    self.compile_expr(item)?;
                    self.emit_arg(OpCode::SetAdd, 1);
                }
            }
        }
        Ok(())
    }

    fn compile_dict_display(&mut self, items: &'a [DictItem]) -> CompileResult<()> {
        if items.iter().all(|item| item.key.is_some()) {
            for item in items {
                if let Some(key) = &item.key {
                    self.compile_expr(key)?;
                }
                self.compile_expr(&item.value)?;
            }
            self.emit_arg(OpCode::BuildMap, items.len() as u32);
            return Ok(());
        }
        self.emit_arg(OpCode::BuildMap, 0);
        for item in items {
            match &item.key {
                Some(key) => {
                    self.compile_expr(key)?;
                    self.compile_expr(&item.value)?;
                    self.emit_arg(OpCode::MapAdd, 1);
                }
                None => {
                    self.compile_expr(&item.value)?;
                    self.emit_arg(OpCode::DictUpdate, 1);
                }
            }
        }
        Ok(())
    }

    fn compile_fstring(&mut self, parts: &'a [FStringPart]) -> CompileResult<()> {
        if parts.is_empty() {
            self.emit_const(Constant::Str(Arc::from("")));
            return Ok(());
        }
        for part in parts {
            match part {
                FStringPart::Literal(text) => self.emit_const(Constant::Str(Arc::from(text.as_str()))),
                FStringPart::Field(field) => {
                    self.compile_expr(&field.value)?;
                    let mut flags = match field.conversion {
                        Some('s') => FORMAT_STR,
                        Some('r') => FORMAT_REPR,
                        Some('a') => FORMAT_ASCII,
                        _ => 0,
                    };
                    if !field.format_spec.is_empty() {
                        self.compile_fstring(&field.format_spec)?;
                        flags |= FORMAT_WITH_SPEC;
                    }
                    self.emit_arg(OpCode::FormatValue, flags);
                }
            }
        }
        if parts.len() > 1 {
            self.emit_arg(OpCode::BuildString, parts.len() as u32);
        } else if matches!(parts[0], FStringPart::Field(_)) {
            // A lone field still has to produce a str.
            self.emit_arg(OpCode::BuildString, 1);
        }
        Ok(())
    }

    // ========================================================================
    // Functions and comprehensions
    // ========================================================================

    /// Emits `MAKE_FUNCTION` for `code`, evaluating defaults in the current
    /// scope first.
    pub(super) fn emit_make_function(&mut self, params: &'a Parameters, code: Arc<CodeObject>) -> CompileResult<()> {
        let mut flags = 0;
        let defaults: Vec<&Expression> = params.args.iter().filter_map(|p| p.default.as_ref()).collect();
        if !defaults.is_empty() {
            for default in &defaults {
                self.compile_expr(default)?;
            }
            self.emit_arg(OpCode::BuildTuple, defaults.len() as u32);
            flags |= MAKE_FUNCTION_DEFAULTS;
        }

        let kwdefaults: Vec<&Parameter> = params.kwonly.iter().filter(|p| p.default.is_some()).collect();
        if !kwdefaults.is_empty() {
            for param in &kwdefaults {
                self.emit_const(Constant::Str(Arc::from(param.name.as_str())));
                if let Some(default) = &param.default {
                    self.compile_expr(default)?;
                }
            }
            self.emit_arg(OpCode::BuildMap, kwdefaults.len() as u32);
            flags |= MAKE_FUNCTION_KWDEFAULTS;
        }

        self.emit_code(code);
        self.emit_arg(OpCode::MakeFunction, flags);
        Ok(())
    }

    /// Pushes a code object and its qualified name.
    pub(super) fn emit_code(&mut self, code: Arc<CodeObject>) {
        let qualname = Constant::Str(Arc::from(code.qualname.as_str()));
        self.emit_const(Constant::Code(code));
        self.emit_const(qualname);
    }

    fn compile_lambda(&mut self, lambda: &'a LambdaExpression, pos: Position) -> CompileResult<()> {
        let scope = self.scope.lambda(lambda).ok_or_else(|| Self::missing_scope(pos))?;
        let code = self.compile_nested(scope, pos, |c| {
            c.compile_expr(&lambda.body)?;
            c.emit(OpCode::ReturnValue);
            Ok(())
        })?;
        self.emit_make_function(&lambda.params, code)
    }

    fn compile_comprehension(
        &mut self,
        scope: Rc<Scope>,
        kind: ComprehensionKind,
        generators: &'a [ComprehensionFor],
        element: Element<'a>,
        pos: Position,
    ) -> CompileResult<()> {
        let Some(first) = generators.first() else {
            return Err(CompileError::new(
                CompileErrorKind::Internal("comprehension without a for clause".into()),
                pos,
            ));
        };
        let code = self.compile_nested(scope, pos, |c| {
            match kind {
                ComprehensionKind::List => {
                    c.emit_arg(OpCode::BuildList, 0);
                }
                ComprehensionKind::Set => {
                    c.emit_arg(OpCode::BuildSet, 0);
                }
                ComprehensionKind::Dict => {
                    c.emit_arg(OpCode::BuildMap, 0);
                }
                ComprehensionKind::Generator => {}
            }
            c.compile_comprehension_clause(kind, generators, 0, element)?;
            if kind == ComprehensionKind::Generator {
                c.emit_const(Constant::None);
            }
            c.emit(OpCode::ReturnValue);
            Ok(())
        })?;

        self.emit_code(code);
        self.emit_arg(OpCode::MakeFunction, 0);
        self.compile_expr(&first.iter)?;
        self.emit(OpCode::GetIter);
        self.emit_arg(OpCode::CallFunction, 1);
        Ok(())
    }

    /// One `for ... if ...` level; the innermost level emits the element.
    fn compile_comprehension_clause(
        &mut self,
        kind: ComprehensionKind,
        generators: &'a [ComprehensionFor],
        index: usize,
        element: Element<'a>,
    ) -> CompileResult<()> {
        let clause = &generators[index];
        if index == 0 {
            self.load_name(COMPREHENSION_ITER);
        } else {
            self.compile_expr(&clause.iter)?;
            self.emit(OpCode::GetIter);
        }

        let start = self.new_label();
        let anchor = self.new_label();
        self.bind_label(start);
        self.emit_jump(OpCode::ForIter, anchor);
        self.compile_store(&clause.target)?;
        for cond in &clause.ifs {
            self.compile_expr(cond)?;
            self.emit_jump(OpCode::PopJumpIfFalse, start);
        }

        if index + 1 < generators.len() {
            self.compile_comprehension_clause(kind, generators, index + 1, element)?;
        } else {
            // The collection sits below one iterator per clause.
            let depth = generators.len() as u32 + 1;
            match (kind, element) {
                (ComprehensionKind::List, Element::Single(elt)) => {
                    self.compile_expr(elt)?;
                    self.emit_arg(OpCode::ListAppend, depth);
                }
                (ComprehensionKind::Set, Element::Single(elt)) => {
                    self.compile_expr(elt)?;
                    self.emit_arg(OpCode::SetAdd, depth);
                }
                (ComprehensionKind::Generator, Element::Single(elt)) => {
                    self.compile_expr(elt)?;
                    self.emit(OpCode::YieldValue);
                    self.emit(OpCode::PopTop);
                }
                (ComprehensionKind::Dict, Element::Pair(key, value)) => {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                    self.emit_arg(OpCode::MapAdd, depth);
                }
                _ => {
                    return Err(CompileError::new(
                        CompileErrorKind::Internal("comprehension element mismatch".into()),
                        clause.iter.pos,
                    ))
                }
            }
        }

        self.emit_jump(OpCode::JumpAbsolute, start);
        self.bind_label(anchor);
        Ok(())
    }

    // ========================================================================
    // Targets
    // ========================================================================

    /// Stores the value on top of the stack into `target`.
    pub(super) fn compile_store(&mut self, target: &'a Expression) -> CompileResult<()> {
        match &target.kind {
            ExpressionKind::Name(name) => {
                self.store_name(name);
                Ok(())
            }
            ExpressionKind::Attribute(attr) => {
                self.compile_expr(&attr.value)?;
                self.emit_attr(OpCode::StoreAttr, &attr.attr);
                Ok(())
            }
            ExpressionKind::Subscript(sub) => {
                self.compile_expr(&sub.value)?;
                self.compile_expr(&sub.index)?;
                self.emit(OpCode::StoreSubscr);
                Ok(())
            }
            ExpressionKind::Tuple(items) | ExpressionKind::List(items) => self.compile_unpack(items, target.pos),
            ExpressionKind::Starred(_) => Err(CompileError::new(CompileErrorKind::StarredNotAllowed, target.pos)),
            _ => Err(CompileError::new(
                CompileErrorKind::InvalidTarget("assign to", "expression"),
                target.pos,
            )),
        }
    }

    fn compile_unpack(&mut self, items: &'a [Expression], pos: Position) -> CompileResult<()> {
        let mut starred = None;
        for (i, item) in items.iter().enumerate() {
            if is_starred(item) {
                if starred.is_some() {
                    return Err(CompileError::new(CompileErrorKind::MultipleStarred, pos));
                }
                starred = Some(i);
            }
        }
        match starred {
            None => {
                self.emit_arg(OpCode::UnpackSequence, items.len() as u32);
            }
            Some(before) => {
                let after = items.len() - before - 1;
                if before > 0xff || after > 0xff_ffff {
                    return Err(CompileError::new(CompileErrorKind::TooManyUnpackTargets, pos));
                }
                self.emit_arg(OpCode::UnpackEx, (before | (after << 8)) as u32);
            }
        }
        for item in items {
            match &item.kind {
                ExpressionKind::Starred(inner) => self.compile_store(inner)?,
                _ => self.compile_store(item)?,
            }
        }
        Ok(())
    }

    pub(super) fn compile_delete(&mut self, target: &'a Expression) -> CompileResult<()> {
        match &target.kind {
            ExpressionKind::Name(name) => {
                self.delete_name(name);
                Ok(())
            }
            ExpressionKind::Attribute(attr) => {
                self.compile_expr(&attr.value)?;
                self.emit_attr(OpCode::DeleteAttr, &attr.attr);
                Ok(())
            }
            ExpressionKind::Subscript(sub) => {
                self.compile_expr(&sub.value)?;
                self.compile_expr(&sub.index)?;
                self.emit(OpCode::DeleteSubscr);
                Ok(())
            }
            ExpressionKind::Tuple(items) | ExpressionKind::List(items) => {
                items.iter().try_for_each(|item| self.compile_delete(item))
            }
            _ => Err(CompileError::new(
                CompileErrorKind::InvalidTarget("delete", "expression"),
                target.pos,
            )),
        }
    }
}
