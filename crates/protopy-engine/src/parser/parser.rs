//! The main parser implementation.

use std::mem;

use super::error::{ParseResult, SyntaxError};
use crate::ast::*;
use crate::lexer::{Scanner, Span, Token, TokenKind};

/// A recursive descent parser.
///
/// Parsing stops at the first error; the error is kept and can be read back
/// with [`Parser::last_error`]. There is no recovery.
pub struct Parser<'a> {
    scanner: Scanner<'a>,
    pub(super) current: Token,
    pub(super) previous: Token,
    lookahead: Option<Token>,
    error: Option<SyntaxError>,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given source code.
    pub fn new(source: &'a str) -> Self {
        let mut scanner = Scanner::new(source);
        let eof = Token::new(TokenKind::Eof, Span::new(0, 0, 1, 1));
        let (current, error) = match scanner.next_token() {
            Ok(token) => (token, None),
            Err(err) => (eof.clone(), Some(SyntaxError::from(err))),
        };
        Self {
            scanner,
            current,
            previous: eof,
            lookahead: None,
            error,
        }
    }

    /// Parses the source code into a Module AST node.
    pub fn parse_module(&mut self) -> ParseResult<Module> {
        let result = self.module_body();
        self.record(result)
    }

    /// Parses the whole source as a single expression (eval mode).
    ///
    /// Trailing newlines are allowed; anything else after the expression is
    /// an error.
    pub fn parse_expression_source(&mut self) -> ParseResult<Expression> {
        let result = self.expression_body();
        self.record(result)
    }

    /// Returns the first error recorded by this parser, if any.
    pub fn last_error(&self) -> Option<&SyntaxError> {
        self.error.as_ref()
    }

    /// Returns true if a parse error has been recorded.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    fn record<T>(&mut self, result: ParseResult<T>) -> ParseResult<T> {
        if let Err(err) = &result {
            self.error = Some(err.clone());
        }
        result
    }

    fn module_body(&mut self) -> ParseResult<Module> {
        self.take_pending_error()?;
        let mut body = Vec::new();
        while !self.is_at_end() {
            if self.check(&TokenKind::Newline) {
                self.advance()?;
                continue;
            }
            if self.check(&TokenKind::Indent) {
                return Err(self.error_at_current("unexpected indent"));
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Module { body })
    }

    fn expression_body(&mut self) -> ParseResult<Expression> {
        self.take_pending_error()?;
        while self.check(&TokenKind::Newline) || self.check(&TokenKind::Indent) {
            self.advance()?;
        }
        let expr = self.parse_testlist_star_expr()?;
        while matches!(
            self.current.kind,
            TokenKind::Newline | TokenKind::Dedent
        ) {
            self.advance()?;
        }
        if !self.is_at_end() {
            return Err(self.unexpected());
        }
        Ok(expr)
    }

    fn take_pending_error(&mut self) -> ParseResult<()> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    /// Parses `':' suite`, where a suite is either a simple statement list on
    /// the same line or an indented block.
    pub(super) fn parse_block(&mut self) -> ParseResult<Vec<Statement>> {
        self.expect(&TokenKind::Colon)?;
        if !self.check(&TokenKind::Newline) {
            return self.parse_simple_statements();
        }
        self.advance()?;
        if !self.check(&TokenKind::Indent) {
            return Err(self.error_at_current("expected an indented block"));
        }
        self.advance()?;

        let mut body = Vec::new();
        while !self.check(&TokenKind::Dedent) && !self.is_at_end() {
            if self.check(&TokenKind::Newline) {
                self.advance()?;
                continue;
            }
            if self.check(&TokenKind::Indent) {
                return Err(self.error_at_current("unexpected indent"));
            }
            body.extend(self.parse_statement()?);
        }
        if self.check(&TokenKind::Dedent) {
            self.advance()?;
        }
        Ok(body)
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    pub(super) fn advance(&mut self) -> ParseResult<()> {
        let next = match self.lookahead.take() {
            Some(token) => token,
            None => self.scanner.next_token()?,
        };
        self.previous = mem::replace(&mut self.current, next);
        Ok(())
    }

    /// Returns the token after `current` without consuming anything.
    pub(super) fn peek_next(&mut self) -> ParseResult<&TokenKind> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.scanner.next_token()?);
        }
        Ok(&self.lookahead.as_ref().map_or(&self.current, |t| t).kind)
    }

    pub(super) fn check(&self, kind: &TokenKind) -> bool {
        mem::discriminant(&self.current.kind) == mem::discriminant(kind)
    }

    /// Consumes the current token if it matches.
    pub(super) fn eat(&mut self, kind: &TokenKind) -> ParseResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(super) fn expect(&mut self, kind: &TokenKind) -> ParseResult<()> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.error_at_current(format!(
                "expected {}, found {}",
                kind, self.current.kind
            )))
        }
    }

    pub(super) fn expect_identifier(&mut self) -> ParseResult<String> {
        if let TokenKind::Identifier(name) = &self.current.kind {
            let name = name.clone();
            self.advance()?;
            Ok(name)
        } else {
            Err(self.error_at_current(format!(
                "expected identifier, found {}",
                self.current.kind
            )))
        }
    }

    pub(super) fn is_at_end(&self) -> bool {
        matches!(self.current.kind, TokenKind::Eof)
    }

    /// Position of the current token.
    pub(super) fn pos(&self) -> Position {
        Position::new(self.current.span.line, self.current.span.column)
    }

    pub(super) fn error_at_current(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.current.span.line, self.current.span.column)
    }

    pub(super) fn error_at(&self, pos: Position, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, pos.line, pos.column)
    }

    pub(super) fn unexpected(&self) -> SyntaxError {
        match self.current.kind {
            TokenKind::Indent => self.error_at_current("unexpected indent"),
            TokenKind::Eof => self.error_at_current("unexpected end of input"),
            _ => self.error_at_current(format!("invalid syntax near {}", self.current.kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Helper to parse and get first statement
    fn parse_stmt(src: &str) -> Statement {
        let mut parser = Parser::new(src);
        let module = parser.parse_module().unwrap();
        module.body.into_iter().next().unwrap()
    }

    // Helper to parse and check it succeeds
    fn parse_ok(src: &str) -> Module {
        let mut parser = Parser::new(src);
        parser.parse_module().unwrap()
    }

    // Helper to parse and check it fails
    fn parse_err(src: &str) -> SyntaxError {
        let mut parser = Parser::new(src);
        parser.parse_module().unwrap_err()
    }

    fn parse_expr(src: &str) -> Expression {
        let mut parser = Parser::new(src);
        parser.parse_expression_source().unwrap()
    }

    #[test]
    fn test_parse_empty_module() {
        assert!(parse_ok("").body.is_empty());
        assert!(parse_ok("\n\n# only a comment\n").body.is_empty());
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_expr("1 + 2 * 3");
        let ExpressionKind::Binary(add) = expr.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(add.op, BinaryOperator::Add);
        assert!(matches!(
            add.right.kind,
            ExpressionKind::Binary(BinaryExpression { op: BinaryOperator::Mul, .. })
        ));
    }

    #[test]
    fn test_parse_power_binds_tighter_than_unary() {
        let expr = parse_expr("-2 ** 2");
        let ExpressionKind::Unary(neg) = expr.kind else {
            panic!("expected unary expression");
        };
        assert_eq!(neg.op, UnaryOperator::Neg);
        assert!(matches!(neg.operand.kind, ExpressionKind::Binary(_)));
    }

    #[test]
    fn test_parse_comparison_chain() {
        let expr = parse_expr("a < b <= c not in d is not e");
        let ExpressionKind::Compare(cmp) = expr.kind else {
            panic!("expected comparison");
        };
        assert_eq!(
            cmp.ops,
            vec![
                CompareOperator::Lt,
                CompareOperator::LtE,
                CompareOperator::NotIn,
                CompareOperator::IsNot
            ]
        );
    }

    #[test]
    fn test_parse_bool_ops() {
        let expr = parse_expr("a or b and not c");
        let ExpressionKind::BoolOp(or) = expr.kind else {
            panic!("expected bool op");
        };
        assert_eq!(or.op, BoolOperator::Or);
        assert!(matches!(
            or.values[1].kind,
            ExpressionKind::BoolOp(BoolOpExpression { op: BoolOperator::And, .. })
        ));
    }

    #[test]
    fn test_parse_assignment_forms() {
        assert!(matches!(parse_stmt("a = b = 1").kind, StatementKind::Assign(ref a) if a.targets.len() == 2));
        assert!(matches!(parse_stmt("a += 1").kind, StatementKind::AugAssign(_)));
        assert!(matches!(parse_stmt("a: int = 1").kind, StatementKind::AnnAssign(_)));
        assert!(matches!(parse_stmt("a, *b = c").kind, StatementKind::Assign(_)));
        assert!(matches!(parse_stmt("x[0].y = 2").kind, StatementKind::Assign(_)));
    }

    #[test]
    fn test_parse_invalid_assignment_target() {
        let err = parse_err("1 = x");
        assert!(err.message.contains("cannot assign"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_parse_if_elif_else() {
        let stmt = parse_stmt("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        let StatementKind::If(if_stmt) = stmt.kind else {
            panic!("expected if");
        };
        assert_eq!(if_stmt.body.len(), 1);
        assert!(matches!(if_stmt.orelse[0].kind, StatementKind::If(_)));
    }

    #[test]
    fn test_parse_function_def() {
        let stmt = parse_stmt("def f(a, b=1, *args, c, d=2, **kw) -> int:\n    return a\n");
        let StatementKind::FunctionDef(def) = stmt.kind else {
            panic!("expected def");
        };
        assert_eq!(def.name, "f");
        assert_eq!(def.params.args.len(), 2);
        assert_eq!(def.params.vararg.as_deref(), Some("args"));
        assert_eq!(def.params.kwonly.len(), 2);
        assert_eq!(def.params.kwarg.as_deref(), Some("kw"));
        assert!(def.returns.is_some());
    }

    #[test]
    fn test_parse_decorated_class() {
        let stmt = parse_stmt("@dec\nclass A(B, C):\n    x = 1\n    def m(self):\n        pass\n");
        let StatementKind::ClassDef(class) = stmt.kind else {
            panic!("expected class");
        };
        assert_eq!(class.decorators.len(), 1);
        assert_eq!(class.bases.len(), 2);
        assert_eq!(class.body.len(), 2);
    }

    #[test]
    fn test_parse_try_statement() {
        let stmt = parse_stmt(
            "try:\n    a\nexcept ValueError as e:\n    b\nexcept:\n    c\nelse:\n    d\nfinally:\n    e\n",
        );
        let StatementKind::Try(try_stmt) = stmt.kind else {
            panic!("expected try");
        };
        assert_eq!(try_stmt.handlers.len(), 2);
        assert_eq!(try_stmt.handlers[0].name.as_deref(), Some("e"));
        assert!(try_stmt.handlers[1].kind.is_none());
        assert_eq!(try_stmt.orelse.len(), 1);
        assert_eq!(try_stmt.finalbody.len(), 1);
    }

    #[test]
    fn test_parse_comprehensions() {
        assert!(matches!(parse_expr("[x for x in y if x]").kind, ExpressionKind::ListComp(_)));
        assert!(matches!(parse_expr("{x for x in y}").kind, ExpressionKind::SetComp(_)));
        assert!(matches!(parse_expr("{k: v for k, v in y}").kind, ExpressionKind::DictComp(_)));
        assert!(matches!(parse_expr("(x for x in y)").kind, ExpressionKind::GeneratorExp(_)));
        let ExpressionKind::ListComp(comp) = parse_expr("[x for a in b for x in a]").kind else {
            panic!("expected list comprehension");
        };
        assert_eq!(comp.generators.len(), 2);
    }

    #[test]
    fn test_parse_call_arguments() {
        let ExpressionKind::Call(call) = parse_expr("f(1, *a, k=2, **kw)").kind else {
            panic!("expected call");
        };
        assert_eq!(call.args.len(), 2);
        assert_eq!(call.keywords.len(), 2);
        assert!(call.has_unpacking());
    }

    #[test]
    fn test_parse_fstring() {
        let ExpressionKind::FormattedString(parts) = parse_expr("f'a{b!r:>4}c{{d}}'").kind else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], FStringPart::Literal("a".into()));
        let FStringPart::Field(field) = &parts[1] else {
            panic!("expected field");
        };
        assert_eq!(field.conversion, Some('r'));
        assert_eq!(field.format_spec, vec![FStringPart::Literal(">4".into())]);
        assert_eq!(parts[2], FStringPart::Literal("c{d}".into()));
    }

    #[test]
    fn test_parse_slices() {
        let ExpressionKind::Subscript(sub) = parse_expr("a[1:2:3]").kind else {
            panic!("expected subscript");
        };
        assert!(matches!(sub.index.kind, ExpressionKind::Slice(_)));
        assert!(matches!(parse_expr("a[::2]").kind, ExpressionKind::Subscript(_)));
    }

    #[test]
    fn test_parse_lambda_and_conditional() {
        assert!(matches!(parse_expr("lambda x, y=1: x + y").kind, ExpressionKind::Lambda(_)));
        assert!(matches!(parse_expr("a if b else c").kind, ExpressionKind::Conditional(_)));
    }

    #[test]
    fn test_parse_imports() {
        assert!(matches!(parse_stmt("import a.b as c, d").kind, StatementKind::Import(ref v) if v.len() == 2));
        let StatementKind::ImportFrom(from) = parse_stmt("from ..pkg import (x as y, z)").kind else {
            panic!("expected from-import");
        };
        assert_eq!(from.level, 2);
        assert_eq!(from.module.as_deref(), Some("pkg"));
        assert_eq!(from.names.len(), 2);
    }

    #[test]
    fn test_parse_async_constructs() {
        let module = parse_ok(
            "async def f():\n    async for x in y:\n        await x\n    async with a as b:\n        pass\n",
        );
        let StatementKind::FunctionDef(def) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert!(def.is_async);
        assert!(matches!(&def.body[0].kind, StatementKind::For(f) if f.is_async));
        assert!(matches!(&def.body[1].kind, StatementKind::With(w) if w.is_async));
    }

    #[test]
    fn test_parse_yield_forms() {
        let module = parse_ok("def g():\n    yield 1\n    x = yield\n    yield from h()\n");
        let StatementKind::FunctionDef(def) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.body.len(), 3);
    }

    #[test]
    fn test_parse_semicolon_separated() {
        assert_eq!(parse_ok("a = 1; b = 2; c\n").body.len(), 3);
    }

    #[test]
    fn test_first_error_is_recorded() {
        let mut parser = Parser::new("x = (1 +\ny = 2\n");
        assert!(parser.parse_module().is_err());
        let err = parser.last_error().unwrap().clone();
        assert!(parser.has_error());
        // Asking again returns the same first error.
        assert_eq!(parser.parse_module().unwrap_err(), err);
    }

    #[test]
    fn test_error_positions() {
        let err = parse_err("a = 1\nb = )\n");
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 5);
    }

    #[test]
    fn test_break_outside_loop_parses() {
        // Structural checks belong to the compiler.
        assert!(matches!(parse_stmt("break\n").kind, StatementKind::Break));
    }

    #[test]
    fn test_missing_indent() {
        let err = parse_err("if a:\nb\n");
        assert!(err.message.contains("indented block"));
    }

    #[test]
    fn test_positions_are_recorded() {
        let module = parse_ok("x = 1\n\ny = 2\n");
        assert_eq!(module.body[1].pos, Position::new(3, 1));
    }
}
