//! Statement parsing.
//!
//! Compound statements (`if`, `while`, `for`, `try`, `with`, `def`, `class`
//! and their `async`/decorated forms) each own a block; everything else is a
//! simple statement terminated by `;` or a newline.

use super::Parser;
use super::error::ParseResult;
use crate::ast::*;
use crate::lexer::TokenKind;

impl Parser<'_> {
    /// Parses one statement line. Simple statements separated by `;` yield
    /// several statements.
    pub fn parse_statement(&mut self) -> ParseResult<Vec<Statement>> {
        let pos = self.pos();
        let stmt = match &self.current.kind {
            TokenKind::If => self.parse_if_statement()?,
            TokenKind::While => self.parse_while_statement()?,
            TokenKind::For => self.parse_for_statement(pos, false)?,
            TokenKind::Try => self.parse_try_statement()?,
            TokenKind::With => self.parse_with_statement(pos, false)?,
            TokenKind::Def => self.parse_function_def(pos, Vec::new(), false)?,
            TokenKind::Class => self.parse_class_def(pos, Vec::new())?,
            TokenKind::At => self.parse_decorated()?,
            TokenKind::Async => self.parse_async_statement()?,
            _ => return self.parse_simple_statements(),
        };
        Ok(vec![stmt])
    }

    /// Parses `small_stmt (';' small_stmt)* [';'] NEWLINE`.
    pub(super) fn parse_simple_statements(&mut self) -> ParseResult<Vec<Statement>> {
        let mut stmts = vec![self.parse_small_statement()?];
        while self.eat(&TokenKind::Semicolon)? {
            if self.check(&TokenKind::Newline) || self.is_at_end() {
                break;
            }
            stmts.push(self.parse_small_statement()?);
        }
        if !self.is_at_end() {
            if !self.check(&TokenKind::Newline) {
                return Err(self.unexpected());
            }
            self.advance()?;
        }
        Ok(stmts)
    }

    fn parse_small_statement(&mut self) -> ParseResult<Statement> {
        let pos = self.pos();
        let kind = match &self.current.kind {
            TokenKind::Pass => {
                self.advance()?;
                StatementKind::Pass
            }
            TokenKind::Break => {
                self.advance()?;
                StatementKind::Break
            }
            TokenKind::Continue => {
                self.advance()?;
                StatementKind::Continue
            }
            TokenKind::Return => {
                self.advance()?;
                if self.at_statement_end() {
                    StatementKind::Return(None)
                } else {
                    StatementKind::Return(Some(self.parse_testlist_star_expr()?))
                }
            }
            TokenKind::Raise => self.parse_raise_statement()?,
            TokenKind::Global => {
                self.advance()?;
                StatementKind::Global(self.parse_name_list()?)
            }
            TokenKind::Nonlocal => {
                self.advance()?;
                StatementKind::Nonlocal(self.parse_name_list()?)
            }
            TokenKind::Del => self.parse_del_statement()?,
            TokenKind::Assert => {
                self.advance()?;
                let test = self.parse_expression()?;
                let msg = if self.eat(&TokenKind::Comma)? {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                StatementKind::Assert(AssertStatement { test, msg })
            }
            TokenKind::Import => self.parse_import_statement()?,
            TokenKind::From => self.parse_from_import_statement()?,
            _ => return self.parse_expression_statement(),
        };
        Ok(Statement::new(kind, pos))
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.current.kind,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        )
    }

    // ========================================================================
    // Expression statements and assignment
    // ========================================================================

    fn parse_expression_statement(&mut self) -> ParseResult<Statement> {
        let pos = self.pos();
        let first = self.parse_testlist_star_expr()?;

        if let Some(op) = self.augmented_operator() {
            self.validate_target(&first, false)?;
            if matches!(first.kind, ExpressionKind::Tuple(_) | ExpressionKind::List(_)) {
                return Err(self.error_at(first.pos, "illegal expression for augmented assignment"));
            }
            self.advance()?;
            let value = self.parse_assignment_value()?;
            return Ok(Statement::new(
                StatementKind::AugAssign(AugAssignStatement {
                    target: first,
                    op,
                    value,
                }),
                pos,
            ));
        }

        if self.check(&TokenKind::Colon) {
            self.advance()?;
            self.validate_target(&first, false)?;
            let annotation = self.parse_expression()?;
            let value = if self.eat(&TokenKind::Equal)? {
                Some(self.parse_assignment_value()?)
            } else {
                None
            };
            return Ok(Statement::new(
                StatementKind::AnnAssign(AnnAssignStatement {
                    target: first,
                    annotation,
                    value,
                }),
                pos,
            ));
        }

        if !self.check(&TokenKind::Equal) {
            if matches!(first.kind, ExpressionKind::Starred(_)) {
                return Err(self.error_at(first.pos, "can't use starred expression here"));
            }
            return Ok(Statement::new(StatementKind::Expression(first), pos));
        }

        let mut targets = vec![first];
        let mut value = None;
        while self.eat(&TokenKind::Equal)? {
            let next = self.parse_assignment_value()?;
            if let Some(previous) = value.replace(next) {
                targets.push(previous);
            }
        }
        for target in &targets {
            self.validate_target(target, true)?;
        }
        let value = value.ok_or_else(|| self.unexpected())?;
        Ok(Statement::new(
            StatementKind::Assign(AssignStatement { targets, value }),
            pos,
        ))
    }

    /// Right-hand side of `=`: a yield expression or an expression list.
    fn parse_assignment_value(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Yield) {
            self.parse_yield_expression()
        } else {
            self.parse_testlist_star_expr()
        }
    }

    fn augmented_operator(&self) -> Option<BinaryOperator> {
        let op = match self.current.kind {
            TokenKind::PlusEqual => BinaryOperator::Add,
            TokenKind::MinusEqual => BinaryOperator::Sub,
            TokenKind::StarEqual => BinaryOperator::Mul,
            TokenKind::SlashEqual => BinaryOperator::Div,
            TokenKind::DoubleSlashEqual => BinaryOperator::FloorDiv,
            TokenKind::PercentEqual => BinaryOperator::Mod,
            TokenKind::DoubleStarEqual => BinaryOperator::Pow,
            TokenKind::LeftShiftEqual => BinaryOperator::LShift,
            TokenKind::RightShiftEqual => BinaryOperator::RShift,
            TokenKind::AmpersandEqual => BinaryOperator::BitAnd,
            TokenKind::PipeEqual => BinaryOperator::BitOr,
            TokenKind::CaretEqual => BinaryOperator::BitXor,
            _ => return None,
        };
        Some(op)
    }

    /// Checks that `expr` can be assigned to (or deleted).
    pub(super) fn validate_target(&self, expr: &Expression, allow_unpack: bool) -> ParseResult<()> {
        match &expr.kind {
            ExpressionKind::Name(_)
            | ExpressionKind::Attribute(_)
            | ExpressionKind::Subscript(_) => Ok(()),
            ExpressionKind::Tuple(items) | ExpressionKind::List(items) if allow_unpack => {
                let mut starred = 0;
                for item in items {
                    if let ExpressionKind::Starred(inner) = &item.kind {
                        starred += 1;
                        self.validate_target(inner, false)?;
                    } else {
                        self.validate_target(item, true)?;
                    }
                }
                if starred > 1 {
                    return Err(self.error_at(expr.pos, "multiple starred expressions in assignment"));
                }
                Ok(())
            }
            ExpressionKind::Starred(_) => {
                Err(self.error_at(expr.pos, "starred assignment target must be in a list or tuple"))
            }
            _ => Err(self.error_at(expr.pos, format!("cannot assign to {}", describe(expr)))),
        }
    }

    // ========================================================================
    // Simple statements
    // ========================================================================

    fn parse_raise_statement(&mut self) -> ParseResult<StatementKind> {
        self.advance()?;
        if self.at_statement_end() {
            return Ok(StatementKind::Raise(RaiseStatement {
                exc: None,
                cause: None,
            }));
        }
        let exc = self.parse_expression()?;
        let cause = if self.eat(&TokenKind::From)? {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(StatementKind::Raise(RaiseStatement {
            exc: Some(exc),
            cause,
        }))
    }

    fn parse_del_statement(&mut self) -> ParseResult<StatementKind> {
        self.advance()?;
        let mut targets = Vec::new();
        loop {
            let target = self.parse_bitwise_or()?;
            self.validate_delete_target(&target)?;
            targets.push(target);
            if !self.eat(&TokenKind::Comma)? || self.at_statement_end() {
                break;
            }
        }
        Ok(StatementKind::Delete(targets))
    }

    fn validate_delete_target(&self, expr: &Expression) -> ParseResult<()> {
        match &expr.kind {
            ExpressionKind::Name(_)
            | ExpressionKind::Attribute(_)
            | ExpressionKind::Subscript(_) => Ok(()),
            ExpressionKind::Tuple(items) | ExpressionKind::List(items) => {
                items.iter().try_for_each(|item| self.validate_delete_target(item))
            }
            _ => Err(self.error_at(expr.pos, format!("cannot delete {}", describe(expr)))),
        }
    }

    fn parse_name_list(&mut self) -> ParseResult<Vec<String>> {
        let mut names = vec![self.expect_identifier()?];
        while self.eat(&TokenKind::Comma)? {
            names.push(self.expect_identifier()?);
        }
        Ok(names)
    }

    fn parse_dotted_name(&mut self) -> ParseResult<String> {
        let mut name = self.expect_identifier()?;
        while self.eat(&TokenKind::Dot)? {
            name.push('.');
            name.push_str(&self.expect_identifier()?);
        }
        Ok(name)
    }

    fn parse_import_statement(&mut self) -> ParseResult<StatementKind> {
        self.advance()?;
        let mut aliases = Vec::new();
        loop {
            let name = self.parse_dotted_name()?;
            let asname = if self.eat(&TokenKind::As)? {
                Some(self.expect_identifier()?)
            } else {
                None
            };
            aliases.push(Alias { name, asname });
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        Ok(StatementKind::Import(aliases))
    }

    fn parse_from_import_statement(&mut self) -> ParseResult<StatementKind> {
        self.advance()?;
        let mut level = 0;
        loop {
            match self.current.kind {
                TokenKind::Dot => level += 1,
                TokenKind::Ellipsis => level += 3,
                _ => break,
            }
            self.advance()?;
        }
        let module = if self.check(&TokenKind::Import) {
            if level == 0 {
                return Err(self.error_at_current("expected module name"));
            }
            None
        } else {
            Some(self.parse_dotted_name()?)
        };
        self.expect(&TokenKind::Import)?;

        if self.eat(&TokenKind::Star)? {
            return Ok(StatementKind::ImportFrom(ImportFrom {
                module,
                names: vec![Alias {
                    name: "*".into(),
                    asname: None,
                }],
                level,
            }));
        }

        let parenthesized = self.eat(&TokenKind::LeftParen)?;
        let mut names = Vec::new();
        loop {
            let name = self.expect_identifier()?;
            let asname = if self.eat(&TokenKind::As)? {
                Some(self.expect_identifier()?)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
            if parenthesized && self.check(&TokenKind::RightParen) {
                break;
            }
        }
        if parenthesized {
            self.expect(&TokenKind::RightParen)?;
        }
        Ok(StatementKind::ImportFrom(ImportFrom {
            module,
            names,
            level,
        }))
    }

    // ========================================================================
    // Compound statements
    // ========================================================================

    fn parse_if_statement(&mut self) -> ParseResult<Statement> {
        let pos = self.pos();
        self.advance()?; // consume 'if' or 'elif'
        let test = self.parse_named_expression()?;
        let body = self.parse_block()?;
        let orelse = match self.current.kind {
            TokenKind::Elif => vec![self.parse_if_statement()?],
            TokenKind::Else => {
                self.advance()?;
                self.parse_block()?
            }
            _ => Vec::new(),
        };
        Ok(Statement::new(
            StatementKind::If(IfStatement { test, body, orelse }),
            pos,
        ))
    }

    fn parse_while_statement(&mut self) -> ParseResult<Statement> {
        let pos = self.pos();
        self.advance()?;
        let test = self.parse_named_expression()?;
        let body = self.parse_block()?;
        let orelse = self.parse_else_block()?;
        Ok(Statement::new(
            StatementKind::While(WhileStatement { test, body, orelse }),
            pos,
        ))
    }

    fn parse_else_block(&mut self) -> ParseResult<Vec<Statement>> {
        if self.eat(&TokenKind::Else)? {
            self.parse_block()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_for_statement(&mut self, pos: Position, is_async: bool) -> ParseResult<Statement> {
        self.expect(&TokenKind::For)?;
        let target = self.parse_target_list()?;
        self.expect(&TokenKind::In)?;
        let iter = self.parse_testlist_star_expr()?;
        let body = self.parse_block()?;
        let orelse = self.parse_else_block()?;
        Ok(Statement::new(
            StatementKind::For(ForStatement {
                target,
                iter,
                body,
                orelse,
                is_async,
            }),
            pos,
        ))
    }

    /// Parses a `for` target list: star or bitwise-or expressions separated by
    /// commas, stopping before `in`.
    pub(super) fn parse_target_list(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        let first = self.parse_star_or_bitwise_or()?;
        if !self.check(&TokenKind::Comma) {
            self.validate_target(&first, true)?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma)? {
            if self.check(&TokenKind::In) {
                break;
            }
            items.push(self.parse_star_or_bitwise_or()?);
        }
        let target = Expression::new(ExpressionKind::Tuple(items), pos);
        self.validate_target(&target, true)?;
        Ok(target)
    }

    fn parse_try_statement(&mut self) -> ParseResult<Statement> {
        let pos = self.pos();
        self.advance()?;
        let body = self.parse_block()?;

        let mut handlers = Vec::new();
        while self.check(&TokenKind::Except) {
            let handler_pos = self.pos();
            self.advance()?;
            let (kind, name) = if self.check(&TokenKind::Colon) {
                (None, None)
            } else {
                let kind = self.parse_expression()?;
                let name = if self.eat(&TokenKind::As)? {
                    Some(self.expect_identifier()?)
                } else {
                    None
                };
                (Some(kind), name)
            };
            let handler_body = self.parse_block()?;
            handlers.push(ExceptHandler {
                kind,
                name,
                body: handler_body,
                pos: handler_pos,
            });
        }

        if let Some(bare) = handlers
            .iter()
            .take(handlers.len().saturating_sub(1))
            .find(|h| h.kind.is_none())
        {
            return Err(self.error_at(bare.pos, "default 'except:' must be last"));
        }

        let orelse = if !handlers.is_empty() {
            self.parse_else_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat(&TokenKind::Finally)? {
            self.parse_block()?
        } else {
            Vec::new()
        };

        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error_at_current("expected 'except' or 'finally' block"));
        }

        Ok(Statement::new(
            StatementKind::Try(TryStatement {
                body,
                handlers,
                orelse,
                finalbody,
            }),
            pos,
        ))
    }

    fn parse_with_statement(&mut self, pos: Position, is_async: bool) -> ParseResult<Statement> {
        self.expect(&TokenKind::With)?;
        let mut items = Vec::new();
        loop {
            let context = self.parse_expression()?;
            let target = if self.eat(&TokenKind::As)? {
                let target = self.parse_star_or_bitwise_or()?;
                self.validate_target(&target, true)?;
                Some(target)
            } else {
                None
            };
            items.push(WithItem { context, target });
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(Statement::new(
            StatementKind::With(WithStatement {
                items,
                body,
                is_async,
            }),
            pos,
        ))
    }

    fn parse_async_statement(&mut self) -> ParseResult<Statement> {
        let pos = self.pos();
        self.advance()?; // consume 'async'
        match self.current.kind {
            TokenKind::Def => self.parse_function_def(pos, Vec::new(), true),
            TokenKind::For => self.parse_for_statement(pos, true),
            TokenKind::With => self.parse_with_statement(pos, true),
            _ => Err(self.error_at_current("expected 'def', 'for' or 'with' after 'async'")),
        }
    }

    fn parse_decorated(&mut self) -> ParseResult<Statement> {
        let pos = self.pos();
        let mut decorators = Vec::new();
        while self.eat(&TokenKind::At)? {
            decorators.push(self.parse_named_expression()?);
            self.expect(&TokenKind::Newline)?;
        }
        match self.current.kind {
            TokenKind::Def => self.parse_function_def(pos, decorators, false),
            TokenKind::Class => self.parse_class_def(pos, decorators),
            TokenKind::Async => {
                self.advance()?;
                if !self.check(&TokenKind::Def) {
                    return Err(self.error_at_current("expected 'def' after 'async'"));
                }
                self.parse_function_def(pos, decorators, true)
            }
            _ => Err(self.error_at_current("expected function or class after decorator")),
        }
    }

    fn parse_function_def(
        &mut self,
        pos: Position,
        decorators: Vec<Expression>,
        is_async: bool,
    ) -> ParseResult<Statement> {
        self.expect(&TokenKind::Def)?;
        let name = self.expect_identifier()?;
        self.expect(&TokenKind::LeftParen)?;
        let params = self.parse_parameters(&TokenKind::RightParen, true)?;
        self.expect(&TokenKind::RightParen)?;
        let returns = if self.eat(&TokenKind::Arrow)? {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(Statement::new(
            StatementKind::FunctionDef(FunctionDef {
                name,
                params,
                body,
                decorators,
                returns,
                is_async,
            }),
            pos,
        ))
    }

    /// Parses a parameter list up to (not including) `close`.
    ///
    /// `annotations` allows `name: expr`; lambdas pass false.
    pub(super) fn parse_parameters(
        &mut self,
        close: &TokenKind,
        annotations: bool,
    ) -> ParseResult<Parameters> {
        let mut params = Parameters::default();
        let mut seen_star = false;
        let mut seen_default = false;

        while !self.check(close) {
            let pos = self.pos();
            if self.eat(&TokenKind::DoubleStar)? {
                params.kwarg = Some(self.parse_parameter_name(annotations)?);
                self.eat(&TokenKind::Comma)?;
                if !self.check(close) {
                    return Err(self.error_at_current("parameter after '**' parameter"));
                }
                break;
            }
            if self.eat(&TokenKind::Star)? {
                if seen_star {
                    return Err(self.error_at(pos, "'*' may appear only once"));
                }
                seen_star = true;
                if let TokenKind::Identifier(_) = self.current.kind {
                    params.vararg = Some(self.parse_parameter_name(annotations)?);
                }
            } else if self.eat(&TokenKind::Slash)? {
                // Positional-only marker; such parameters bind positionally anyway.
            } else {
                let name = self.parse_parameter_name(annotations)?;
                if params.names().any(|existing| existing == name) {
                    return Err(self.error_at(pos, format!("duplicate argument '{}' in function definition", name)));
                }
                let default = if self.eat(&TokenKind::Equal)? {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                if seen_star {
                    params.kwonly.push(Parameter { name, default });
                } else {
                    if default.is_some() {
                        seen_default = true;
                    } else if seen_default {
                        return Err(self.error_at(pos, "non-default argument follows default argument"));
                    }
                    params.args.push(Parameter { name, default });
                }
            }
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        Ok(params)
    }

    fn parse_parameter_name(&mut self, annotations: bool) -> ParseResult<String> {
        let name = self.expect_identifier()?;
        if annotations && self.eat(&TokenKind::Colon)? {
            // Annotations are parsed and dropped.
            self.parse_expression()?;
        }
        Ok(name)
    }

    fn parse_class_def(&mut self, pos: Position, decorators: Vec<Expression>) -> ParseResult<Statement> {
        self.expect(&TokenKind::Class)?;
        let name = self.expect_identifier()?;
        let (bases, keywords) = if self.eat(&TokenKind::LeftParen)? {
            let (args, keywords) = self.parse_call_arguments()?;
            self.expect(&TokenKind::RightParen)?;
            (args, keywords)
        } else {
            (Vec::new(), Vec::new())
        };
        if let Some(starred) = bases
            .iter()
            .find(|b| matches!(b.kind, ExpressionKind::Starred(_)))
        {
            return Err(self.error_at(starred.pos, "starred bases are not supported"));
        }
        let body = self.parse_block()?;
        Ok(Statement::new(
            StatementKind::ClassDef(ClassDef {
                name,
                bases,
                keywords,
                body,
                decorators,
            }),
            pos,
        ))
    }
}

/// Describes an expression for "cannot assign to ..." messages.
fn describe(expr: &Expression) -> &'static str {
    match &expr.kind {
        ExpressionKind::Literal(_) | ExpressionKind::FormattedString(_) => "literal",
        ExpressionKind::Call(_) => "function call",
        ExpressionKind::BoolOp(_) | ExpressionKind::Binary(_) | ExpressionKind::Unary(_) => "expression",
        ExpressionKind::Compare(_) => "comparison",
        ExpressionKind::Lambda(_) => "lambda",
        ExpressionKind::Conditional(_) => "conditional expression",
        ExpressionKind::ListComp(_)
        | ExpressionKind::SetComp(_)
        | ExpressionKind::DictComp(_)
        | ExpressionKind::GeneratorExp(_) => "comprehension",
        ExpressionKind::Dict(_) | ExpressionKind::Set(_) => "display",
        ExpressionKind::Yield(_) | ExpressionKind::YieldFrom(_) => "yield expression",
        ExpressionKind::Await(_) => "await expression",
        ExpressionKind::NamedExpr(_) => "named expression",
        _ => "expression",
    }
}
