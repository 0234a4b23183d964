//! Expression parsing.
//!
//! Precedence, loosest first: lambda, conditional, `or`, `and`, `not`,
//! comparisons, `|`, `^`, `&`, shifts, `+ -`, `* / // %`, unary `+ - ~`,
//! `**`, `await`, then primaries with their call/subscript/attribute
//! trailers.

use super::Parser;
use super::error::{ParseResult, SyntaxError};
use crate::ast::*;
use crate::lexer::TokenKind;

impl Parser<'_> {
    /// Parses a single expression (`test` in the grammar): a lambda, a
    /// conditional expression or anything tighter.
    pub fn parse_expression(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Lambda) {
            return self.parse_lambda();
        }
        let pos = self.pos();
        let body = self.parse_or_test()?;
        if !self.check(&TokenKind::If) {
            return Ok(body);
        }
        self.advance()?;
        let test = self.parse_or_test()?;
        self.expect(&TokenKind::Else)?;
        let orelse = self.parse_expression()?;
        Ok(Expression::new(
            ExpressionKind::Conditional(ConditionalExpression {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            }),
            pos,
        ))
    }

    /// Parses `name := value` or a plain expression.
    pub(super) fn parse_named_expression(&mut self) -> ParseResult<Expression> {
        if let TokenKind::Identifier(name) = &self.current.kind {
            let name = name.clone();
            if matches!(self.peek_next()?, TokenKind::Walrus) {
                let pos = self.pos();
                self.advance()?;
                self.advance()?;
                let value = self.parse_expression()?;
                return Ok(Expression::new(
                    ExpressionKind::NamedExpr(NamedExpression {
                        target: name,
                        value: Box::new(value),
                    }),
                    pos,
                ));
            }
        }
        self.parse_expression()
    }

    /// Parses a comma-separated expression list that may contain starred
    /// items. A trailing comma or more than one item makes a tuple.
    pub(super) fn parse_testlist_star_expr(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Yield) {
            return self.parse_yield_expression();
        }
        let pos = self.pos();
        let first = self.parse_star_or_expression()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma)? {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_star_or_expression()?);
        }
        Ok(Expression::new(ExpressionKind::Tuple(items), pos))
    }

    fn parse_star_or_expression(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Star) {
            let pos = self.pos();
            self.advance()?;
            let value = self.parse_bitwise_or()?;
            return Ok(Expression::new(ExpressionKind::Starred(Box::new(value)), pos));
        }
        self.parse_named_expression()
    }

    pub(super) fn parse_star_or_bitwise_or(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Star) {
            let pos = self.pos();
            self.advance()?;
            let value = self.parse_bitwise_or()?;
            return Ok(Expression::new(ExpressionKind::Starred(Box::new(value)), pos));
        }
        self.parse_bitwise_or()
    }

    /// Returns true if the current token can begin an expression.
    fn starts_expression(&self) -> bool {
        matches!(
            self.current.kind,
            TokenKind::Int(_)
                | TokenKind::BigInt(_)
                | TokenKind::Float(_)
                | TokenKind::String(_)
                | TokenKind::FString(_)
                | TokenKind::Identifier(_)
                | TokenKind::None
                | TokenKind::True
                | TokenKind::False
                | TokenKind::LeftParen
                | TokenKind::LeftBracket
                | TokenKind::LeftBrace
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Tilde
                | TokenKind::Not
                | TokenKind::Lambda
                | TokenKind::Await
                | TokenKind::Star
                | TokenKind::Ellipsis
        )
    }

    /// Parses `yield`, `yield value(s)` or `yield from value`.
    pub(super) fn parse_yield_expression(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        self.expect(&TokenKind::Yield)?;
        if self.eat(&TokenKind::From)? {
            let value = self.parse_expression()?;
            return Ok(Expression::new(ExpressionKind::YieldFrom(Box::new(value)), pos));
        }
        if !self.starts_expression() {
            return Ok(Expression::new(ExpressionKind::Yield(None), pos));
        }
        let value = self.parse_testlist_star_expr()?;
        Ok(Expression::new(ExpressionKind::Yield(Some(Box::new(value))), pos))
    }

    fn parse_lambda(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        self.expect(&TokenKind::Lambda)?;
        let params = self.parse_parameters(&TokenKind::Colon, false)?;
        self.expect(&TokenKind::Colon)?;
        let body = self.parse_expression()?;
        Ok(Expression::new(
            ExpressionKind::Lambda(LambdaExpression {
                params,
                body: Box::new(body),
            }),
            pos,
        ))
    }

    // ========================================================================
    // Boolean operators and comparisons
    // ========================================================================

    fn parse_or_test(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        let first = self.parse_and_test()?;
        if !self.check(&TokenKind::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&TokenKind::Or)? {
            values.push(self.parse_and_test()?);
        }
        Ok(Expression::new(
            ExpressionKind::BoolOp(BoolOpExpression {
                op: BoolOperator::Or,
                values,
            }),
            pos,
        ))
    }

    fn parse_and_test(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        let first = self.parse_not_test()?;
        if !self.check(&TokenKind::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&TokenKind::And)? {
            values.push(self.parse_not_test()?);
        }
        Ok(Expression::new(
            ExpressionKind::BoolOp(BoolOpExpression {
                op: BoolOperator::And,
                values,
            }),
            pos,
        ))
    }

    fn parse_not_test(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Not) {
            let pos = self.pos();
            self.advance()?;
            let operand = self.parse_not_test()?;
            return Ok(Expression::new(
                ExpressionKind::Unary(UnaryExpression {
                    op: UnaryOperator::Not,
                    operand: Box::new(operand),
                }),
                pos,
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        let left = self.parse_bitwise_or()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.comparison_operator()? {
            ops.push(op);
            comparators.push(self.parse_bitwise_or()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expression::new(
            ExpressionKind::Compare(CompareExpression {
                left: Box::new(left),
                ops,
                comparators,
            }),
            pos,
        ))
    }

    /// Consumes a comparison operator, including `not in` and `is not`.
    fn comparison_operator(&mut self) -> ParseResult<Option<CompareOperator>> {
        let op = match self.current.kind {
            TokenKind::EqualEqual => CompareOperator::Eq,
            TokenKind::NotEqual => CompareOperator::NotEq,
            TokenKind::Less => CompareOperator::Lt,
            TokenKind::LessEqual => CompareOperator::LtE,
            TokenKind::Greater => CompareOperator::Gt,
            TokenKind::GreaterEqual => CompareOperator::GtE,
            TokenKind::In => CompareOperator::In,
            TokenKind::Is => {
                self.advance()?;
                if self.eat(&TokenKind::Not)? {
                    return Ok(Some(CompareOperator::IsNot));
                }
                return Ok(Some(CompareOperator::Is));
            }
            TokenKind::Not => {
                if !matches!(self.peek_next()?, TokenKind::In) {
                    return Ok(None);
                }
                self.advance()?;
                self.advance()?;
                return Ok(Some(CompareOperator::NotIn));
            }
            _ => return Ok(None),
        };
        self.advance()?;
        Ok(Some(op))
    }

    // ========================================================================
    // Binary operators
    // ========================================================================

    pub(super) fn parse_bitwise_or(&mut self) -> ParseResult<Expression> {
        self.parse_binary_level(0)
    }

    /// Parses one left-associative binary precedence level; the tightest
    /// level bottoms out at unary operators.
    fn parse_binary_level(&mut self, level: usize) -> ParseResult<Expression> {
        if level == BINARY_LEVEL_COUNT {
            return self.parse_factor();
        }
        let pos = self.pos();
        let mut left = self.parse_binary_level(level + 1)?;
        while let Some(op) = binary_operator(level, &self.current.kind) {
            self.advance()?;
            let right = self.parse_binary_level(level + 1)?;
            left = Expression::new(
                ExpressionKind::Binary(BinaryExpression {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }),
                pos,
            );
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> ParseResult<Expression> {
        let op = match self.current.kind {
            TokenKind::Minus => UnaryOperator::Neg,
            TokenKind::Plus => UnaryOperator::Pos,
            TokenKind::Tilde => UnaryOperator::Invert,
            _ => return self.parse_power(),
        };
        let pos = self.pos();
        self.advance()?;
        let operand = self.parse_factor()?;
        Ok(Expression::new(
            ExpressionKind::Unary(UnaryExpression {
                op,
                operand: Box::new(operand),
            }),
            pos,
        ))
    }

    fn parse_power(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        let base = if self.eat(&TokenKind::Await)? {
            let value = self.parse_primary()?;
            Expression::new(ExpressionKind::Await(Box::new(value)), pos)
        } else {
            self.parse_primary()?
        };
        if !self.eat(&TokenKind::DoubleStar)? {
            return Ok(base);
        }
        // Right-associative, and binds tighter than a unary operator on its
        // left but looser than one on its right.
        let exponent = self.parse_factor()?;
        Ok(Expression::new(
            ExpressionKind::Binary(BinaryExpression {
                op: BinaryOperator::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            }),
            pos,
        ))
    }

    // ========================================================================
    // Primaries
    // ========================================================================

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        let mut expr = self.parse_atom()?;
        loop {
            match self.current.kind {
                TokenKind::Dot => {
                    self.advance()?;
                    let attr = self.expect_identifier()?;
                    expr = Expression::new(
                        ExpressionKind::Attribute(AttributeExpression {
                            value: Box::new(expr),
                            attr,
                        }),
                        pos,
                    );
                }
                TokenKind::LeftParen => {
                    self.advance()?;
                    let (args, keywords) = self.parse_call_arguments()?;
                    self.expect(&TokenKind::RightParen)?;
                    expr = Expression::new(
                        ExpressionKind::Call(CallExpression {
                            func: Box::new(expr),
                            args,
                            keywords,
                        }),
                        pos,
                    );
                }
                TokenKind::LeftBracket => {
                    self.advance()?;
                    let index = self.parse_subscript()?;
                    self.expect(&TokenKind::RightBracket)?;
                    expr = Expression::new(
                        ExpressionKind::Subscript(SubscriptExpression {
                            value: Box::new(expr),
                            index: Box::new(index),
                        }),
                        pos,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Parses call arguments up to (not including) the closing paren.
    pub(super) fn parse_call_arguments(&mut self) -> ParseResult<(Vec<Expression>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();

        while !self.check(&TokenKind::RightParen) {
            let pos = self.pos();
            if self.eat(&TokenKind::DoubleStar)? {
                let value = self.parse_expression()?;
                keywords.push(Keyword { name: None, value });
            } else if self.eat(&TokenKind::Star)? {
                let value = self.parse_expression()?;
                if keywords.iter().any(|k| k.name.is_none()) {
                    return Err(self.error_at(pos, "iterable argument unpacking follows keyword argument unpacking"));
                }
                args.push(Expression::new(ExpressionKind::Starred(Box::new(value)), pos));
            } else if self.at_keyword_argument()? {
                let name = self.expect_identifier()?;
                self.expect(&TokenKind::Equal)?;
                let value = self.parse_expression()?;
                if keywords.iter().any(|k| k.name.as_deref() == Some(name.as_str())) {
                    return Err(self.error_at(pos, format!("keyword argument repeated: {}", name)));
                }
                keywords.push(Keyword {
                    name: Some(name),
                    value,
                });
            } else {
                let value = self.parse_named_expression()?;
                if self.at_comprehension()? {
                    let generators = self.parse_comprehension_clauses()?;
                    let genexp = Expression::new(
                        ExpressionKind::GeneratorExp(Comprehension {
                            element: Box::new(value),
                            generators,
                        }),
                        pos,
                    );
                    if !args.is_empty() || !keywords.is_empty() || !self.check(&TokenKind::RightParen) {
                        return Err(self.error_at(pos, "Generator expression must be parenthesized"));
                    }
                    args.push(genexp);
                    break;
                }
                if keywords.iter().any(|k| k.name.is_none()) {
                    return Err(self.error_at(pos, "positional argument follows keyword argument unpacking"));
                }
                if !keywords.is_empty() {
                    return Err(self.error_at(pos, "positional argument follows keyword argument"));
                }
                args.push(value);
            }
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        Ok((args, keywords))
    }

    fn at_keyword_argument(&mut self) -> ParseResult<bool> {
        if !matches!(self.current.kind, TokenKind::Identifier(_)) {
            return Ok(false);
        }
        Ok(matches!(self.peek_next()?, TokenKind::Equal))
    }

    fn at_comprehension(&mut self) -> ParseResult<bool> {
        match self.current.kind {
            TokenKind::For => Ok(true),
            TokenKind::Async => Ok(matches!(self.peek_next()?, TokenKind::For)),
            _ => Ok(false),
        }
    }

    /// Parses one or more `[async] for ... in ... [if ...]` clauses.
    fn parse_comprehension_clauses(&mut self) -> ParseResult<Vec<ComprehensionFor>> {
        let mut generators = Vec::new();
        while self.at_comprehension()? {
            let is_async = self.eat(&TokenKind::Async)?;
            self.expect(&TokenKind::For)?;
            let target = self.parse_target_list()?;
            self.expect(&TokenKind::In)?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.eat(&TokenKind::If)? {
                ifs.push(self.parse_or_test()?);
            }
            generators.push(ComprehensionFor {
                target,
                iter,
                ifs,
                is_async,
            });
        }
        Ok(generators)
    }

    /// Parses the inside of `[...]` after a primary: an index, a slice, or
    /// a comma-separated mix that becomes a tuple.
    fn parse_subscript(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        let first = self.parse_slice_item()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma)? {
            if self.check(&TokenKind::RightBracket) {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(Expression::new(ExpressionKind::Tuple(items), pos))
    }

    fn parse_slice_item(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            let expr = self.parse_named_expression()?;
            if !self.check(&TokenKind::Colon) {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect(&TokenKind::Colon)?;
        let upper = self.parse_optional_slice_bound()?;
        let step = if self.eat(&TokenKind::Colon)? {
            self.parse_optional_slice_bound()?
        } else {
            None
        };
        Ok(Expression::new(
            ExpressionKind::Slice(SliceExpression { lower, upper, step }),
            pos,
        ))
    }

    fn parse_optional_slice_bound(&mut self) -> ParseResult<Option<Box<Expression>>> {
        if matches!(
            self.current.kind,
            TokenKind::Colon | TokenKind::Comma | TokenKind::RightBracket
        ) {
            Ok(None)
        } else {
            Ok(Some(Box::new(self.parse_expression()?)))
        }
    }

    // ========================================================================
    // Atoms
    // ========================================================================

    fn parse_atom(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        let literal = match &self.current.kind {
            TokenKind::Int(n) => Literal::Int(*n),
            TokenKind::BigInt(digits) => Literal::BigInt(digits.clone()),
            TokenKind::Float(n) => Literal::Float(*n),
            TokenKind::None => Literal::None,
            TokenKind::True => Literal::Bool(true),
            TokenKind::False => Literal::Bool(false),
            TokenKind::Ellipsis => Literal::Ellipsis,
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance()?;
                return Ok(Expression::new(ExpressionKind::Name(name), pos));
            }
            TokenKind::String(_) | TokenKind::FString(_) => return self.parse_strings(),
            TokenKind::LeftParen => return self.parse_paren_atom(),
            TokenKind::LeftBracket => return self.parse_list_atom(),
            TokenKind::LeftBrace => return self.parse_brace_atom(),
            _ => return Err(self.unexpected()),
        };
        self.advance()?;
        Ok(Expression::new(ExpressionKind::Literal(literal), pos))
    }

    /// Parses adjacent string literals, concatenating them. Any f-string in
    /// the run turns the whole run into a formatted string.
    fn parse_strings(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        loop {
            match &self.current.kind {
                TokenKind::String(s) => {
                    push_literal(&mut parts, s);
                    self.advance()?;
                }
                TokenKind::FString(body) => {
                    let body = body.clone();
                    self.advance()?;
                    formatted = true;
                    let span = self.previous.span;
                    let origin = Position::new(span.line, span.column);
                    for part in split_fstring(&body, origin)? {
                        match part {
                            FStringPart::Literal(text) => push_literal(&mut parts, &text),
                            field => parts.push(field),
                        }
                    }
                }
                _ => break,
            }
        }

        if !formatted {
            let text = match parts.pop() {
                Some(FStringPart::Literal(text)) => text,
                _ => String::new(),
            };
            return Ok(Expression::new(ExpressionKind::Literal(Literal::Str(text)), pos));
        }
        Ok(Expression::new(ExpressionKind::FormattedString(parts), pos))
    }

    fn parse_paren_atom(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        self.expect(&TokenKind::LeftParen)?;
        if self.eat(&TokenKind::RightParen)? {
            return Ok(Expression::new(ExpressionKind::Tuple(Vec::new()), pos));
        }
        if self.check(&TokenKind::Yield) {
            let expr = self.parse_yield_expression()?;
            self.expect(&TokenKind::RightParen)?;
            return Ok(expr);
        }

        let first = self.parse_star_or_expression()?;
        if self.at_comprehension()? {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(&TokenKind::RightParen)?;
            return Ok(Expression::new(
                ExpressionKind::GeneratorExp(Comprehension {
                    element: Box::new(first),
                    generators,
                }),
                pos,
            ));
        }
        if self.eat(&TokenKind::RightParen)? {
            if matches!(first.kind, ExpressionKind::Starred(_)) {
                return Err(self.error_at(first.pos, "can't use starred expression here"));
            }
            return Ok(first);
        }

        let mut items = vec![first];
        while self.eat(&TokenKind::Comma)? {
            if self.check(&TokenKind::RightParen) {
                break;
            }
            items.push(self.parse_star_or_expression()?);
        }
        self.expect(&TokenKind::RightParen)?;
        Ok(Expression::new(ExpressionKind::Tuple(items), pos))
    }

    fn parse_list_atom(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        self.expect(&TokenKind::LeftBracket)?;
        if self.eat(&TokenKind::RightBracket)? {
            return Ok(Expression::new(ExpressionKind::List(Vec::new()), pos));
        }
        let first = self.parse_star_or_expression()?;
        if self.at_comprehension()? {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(&TokenKind::RightBracket)?;
            return Ok(Expression::new(
                ExpressionKind::ListComp(Comprehension {
                    element: Box::new(first),
                    generators,
                }),
                pos,
            ));
        }
        let items = self.parse_display_rest(first, &TokenKind::RightBracket)?;
        Ok(Expression::new(ExpressionKind::List(items), pos))
    }

    fn parse_display_rest(&mut self, first: Expression, close: &TokenKind) -> ParseResult<Vec<Expression>> {
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma)? {
            if self.check(close) {
                break;
            }
            items.push(self.parse_star_or_expression()?);
        }
        self.expect(close)?;
        Ok(items)
    }

    fn parse_brace_atom(&mut self) -> ParseResult<Expression> {
        let pos = self.pos();
        self.expect(&TokenKind::LeftBrace)?;
        if self.eat(&TokenKind::RightBrace)? {
            return Ok(Expression::new(ExpressionKind::Dict(Vec::new()), pos));
        }

        // `{**a, ...}` or `{k: v, ...}` is a dict; anything else a set.
        let first_key = if self.eat(&TokenKind::DoubleStar)? {
            None
        } else {
            let first = self.parse_star_or_expression()?;
            if !self.check(&TokenKind::Colon) {
                if self.at_comprehension()? {
                    let generators = self.parse_comprehension_clauses()?;
                    self.expect(&TokenKind::RightBrace)?;
                    return Ok(Expression::new(
                        ExpressionKind::SetComp(Comprehension {
                            element: Box::new(first),
                            generators,
                        }),
                        pos,
                    ));
                }
                let items = self.parse_display_rest(first, &TokenKind::RightBrace)?;
                return Ok(Expression::new(ExpressionKind::Set(items), pos));
            }
            Some(first)
        };

        let first_value = match first_key {
            Some(_) => {
                self.expect(&TokenKind::Colon)?;
                self.parse_expression()?
            }
            None => self.parse_bitwise_or()?,
        };

        let first_key = match first_key {
            Some(key) if self.at_comprehension()? => {
                let generators = self.parse_comprehension_clauses()?;
                self.expect(&TokenKind::RightBrace)?;
                return Ok(Expression::new(
                    ExpressionKind::DictComp(DictComprehension {
                        key: Box::new(key),
                        value: Box::new(first_value),
                        generators,
                    }),
                    pos,
                ));
            }
            other => other,
        };

        let mut items = vec![DictItem {
            key: first_key,
            value: first_value,
        }];
        while self.eat(&TokenKind::Comma)? {
            if self.check(&TokenKind::RightBrace) {
                break;
            }
            if self.eat(&TokenKind::DoubleStar)? {
                let value = self.parse_bitwise_or()?;
                items.push(DictItem { key: None, value });
            } else {
                let key = self.parse_expression()?;
                self.expect(&TokenKind::Colon)?;
                let value = self.parse_expression()?;
                items.push(DictItem {
                    key: Some(key),
                    value,
                });
            }
        }
        self.expect(&TokenKind::RightBrace)?;
        Ok(Expression::new(ExpressionKind::Dict(items), pos))
    }
}

const BINARY_LEVEL_COUNT: usize = 6;

/// Maps a token to its binary operator at `level`, loosest level first.
fn binary_operator(level: usize, kind: &TokenKind) -> Option<BinaryOperator> {
    let op = match (level, kind) {
        (0, TokenKind::Pipe) => BinaryOperator::BitOr,
        (1, TokenKind::Caret) => BinaryOperator::BitXor,
        (2, TokenKind::Ampersand) => BinaryOperator::BitAnd,
        (3, TokenKind::LeftShift) => BinaryOperator::LShift,
        (3, TokenKind::RightShift) => BinaryOperator::RShift,
        (4, TokenKind::Plus) => BinaryOperator::Add,
        (4, TokenKind::Minus) => BinaryOperator::Sub,
        (5, TokenKind::Star) => BinaryOperator::Mul,
        (5, TokenKind::Slash) => BinaryOperator::Div,
        (5, TokenKind::DoubleSlash) => BinaryOperator::FloorDiv,
        (5, TokenKind::Percent) => BinaryOperator::Mod,
        _ => return None,
    };
    Some(op)
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

// ============================================================================
// f-strings
// ============================================================================

/// Splits an f-string body into literal text and replacement fields.
///
/// `{{` and `}}` are literal braces. A field is `{expr[!conv][:spec]}` where
/// the format spec may itself contain fields. Field expressions are parsed with a
/// fresh parser; errors are reported relative to `origin`, the string
/// token's position.
fn split_fstring(body: &str, origin: Position) -> ParseResult<Vec<FStringPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '}' => return Err(fstring_error(origin, "f-string: single '}' is not allowed")),
            '{' => {
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                let (field, next) = parse_fstring_field(&chars, i + 1, origin)?;
                parts.push(FStringPart::Field(field));
                i = next;
            }
            ch => {
                literal.push(ch);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

/// Parses a replacement field starting just after its `{`. Returns the field
/// and the index just past its closing `}`.
fn parse_fstring_field(chars: &[char], start: usize, origin: Position) -> ParseResult<(FormattedValue, usize)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start;

    // Find the end of the expression: a top-level `!`, `:` or `}`.
    while i < chars.len() {
        let ch = chars[i];
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth > 0 => depth -= 1,
            '}' => break,
            '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => break,
            ':' if depth == 0 => break,
            _ => {}
        }
        i += 1;
    }
    if i >= chars.len() {
        return Err(fstring_error(origin, "f-string: expecting '}'"));
    }

    let source: String = chars[start..i].iter().collect();
    if source.trim().is_empty() {
        return Err(fstring_error(origin, "f-string: empty expression not allowed"));
    }
    let value = parse_field_expression(&source, origin)?;

    let mut conversion = None;
    if chars[i] == '!' {
        let conv = chars.get(i + 1).copied();
        match conv {
            Some(c @ ('r' | 's' | 'a')) => conversion = Some(c),
            _ => {
                return Err(fstring_error(
                    origin,
                    "f-string: invalid conversion character: expected 's', 'r', or 'a'",
                ));
            }
        }
        i += 2;
    }

    let mut format_spec = Vec::new();
    if chars.get(i) == Some(&':') {
        // The format spec runs to the matching `}`; nested fields are allowed.
        let spec_start = i + 1;
        let mut depth = 0usize;
        i = spec_start;
        while i < chars.len() {
            match chars[i] {
                '{' => depth += 1,
                '}' if depth == 0 => break,
                '}' => depth -= 1,
                _ => {}
            }
            i += 1;
        }
        let spec: String = chars[spec_start..i.min(chars.len())].iter().collect();
        format_spec = split_fstring(&spec, origin)?;
    }

    if chars.get(i) != Some(&'}') {
        return Err(fstring_error(origin, "f-string: expecting '}'"));
    }

    Ok((
        FormattedValue {
            value: Box::new(value),
            conversion,
            format_spec,
        },
        i + 1,
    ))
}

fn parse_field_expression(source: &str, origin: Position) -> ParseResult<Expression> {
    // Parenthesized so the field may span lines and hold a bare tuple.
    let wrapped = format!("({})", source.trim());
    let mut parser = Parser::new(&wrapped);
    let mut expr = parser.parse_expression_source().map_err(|err| {
        SyntaxError::new(format!("f-string: {}", err.message), origin.line, origin.column)
    })?;
    expr.pos = origin;
    Ok(expr)
}

fn fstring_error(origin: Position, message: &str) -> SyntaxError {
    SyntaxError::new(message, origin.line, origin.column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fparts(body: &str) -> Vec<FStringPart> {
        split_fstring(body, Position::new(1, 1)).unwrap()
    }

    #[test]
    fn test_fstring_escaped_braces() {
        assert_eq!(fparts("{{}}"), vec![FStringPart::Literal("{}".into())]);
    }

    #[test]
    fn test_fstring_nested_spec() {
        let parts = fparts("{x:{width}}");
        let FStringPart::Field(field) = &parts[0] else {
            panic!("expected field");
        };
        assert!(matches!(field.format_spec[0], FStringPart::Field(_)));
    }

    #[test]
    fn test_fstring_field_with_brackets_and_strings() {
        let parts = fparts("{d['a:b']}{f(1, 2)!s}");
        assert_eq!(parts.len(), 2);
        let FStringPart::Field(second) = &parts[1] else {
            panic!("expected field");
        };
        assert_eq!(second.conversion, Some('s'));
    }

    #[test]
    fn test_fstring_not_equal_inside_field() {
        let parts = fparts("{a != b}");
        let FStringPart::Field(field) = &parts[0] else {
            panic!("expected field");
        };
        assert!(matches!(field.value.kind, ExpressionKind::Compare(_)));
        assert_eq!(field.conversion, None);
    }

    #[test]
    fn test_fstring_errors() {
        let origin = Position::new(3, 7);
        let err = split_fstring("{}", origin).unwrap_err();
        assert!(err.message.contains("empty expression"));
        assert_eq!((err.line, err.column), (3, 7));
        assert!(split_fstring("a}", origin).unwrap_err().message.contains("single '}'"));
        assert!(split_fstring("{a", origin).unwrap_err().message.contains("expecting '}'"));
        assert!(split_fstring("{a!x}", origin).unwrap_err().message.contains("conversion"));
    }

    #[test]
    fn test_adjacent_string_concatenation() {
        let mut parser = Parser::new("'a' \"b\" f'{c}d'");
        let ExpressionKind::FormattedString(parts) = parser.parse_expression_source().unwrap().kind else {
            panic!("expected f-string");
        };
        assert_eq!(parts[0], FStringPart::Literal("ab".into()));
        assert_eq!(parts.len(), 3);

        let mut parser = Parser::new("'a' 'b'");
        assert_eq!(
            parser.parse_expression_source().unwrap().kind,
            ExpressionKind::Literal(Literal::Str("ab".into()))
        );
    }

    #[test]
    fn test_walrus_and_star_displays() {
        let mut parser = Parser::new("(y := f(x))");
        assert!(matches!(parser.parse_expression_source().unwrap().kind, ExpressionKind::NamedExpr(_)));
        let mut parser = Parser::new("[*a, b]");
        let ExpressionKind::List(items) = parser.parse_expression_source().unwrap().kind else {
            panic!("expected list");
        };
        assert!(matches!(items[0].kind, ExpressionKind::Starred(_)));
        let mut parser = Parser::new("{**a, 'b': 1}");
        let ExpressionKind::Dict(items) = parser.parse_expression_source().unwrap().kind else {
            panic!("expected dict");
        };
        assert!(items[0].key.is_none());
    }

    #[test]
    fn test_generator_argument_must_be_alone() {
        let mut parser = Parser::new("f(x for x in y)");
        assert!(parser.parse_expression_source().is_ok());
        let mut parser = Parser::new("f(x for x in y, 1)");
        assert!(parser.parse_expression_source().is_err());
    }

    #[test]
    fn test_keyword_argument_order() {
        let mut parser = Parser::new("f(a=1, 2)");
        let err = parser.parse_expression_source().unwrap_err();
        assert!(err.message.contains("positional argument follows keyword argument"));
    }

    #[test]
    fn test_await_and_unary_power() {
        let mut parser = Parser::new("await x ** 2");
        let ExpressionKind::Binary(pow) = parser.parse_expression_source().unwrap().kind else {
            panic!("expected power");
        };
        assert!(matches!(pow.left.kind, ExpressionKind::Await(_)));
        let mut parser = Parser::new("2 ** -1");
        assert!(parser.parse_expression_source().is_ok());
    }
}
