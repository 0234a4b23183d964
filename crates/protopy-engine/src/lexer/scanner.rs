//! The scanner that produces tokens from source text.

use std::collections::VecDeque;

use num_bigint::BigInt;
use unicode_xid::UnicodeXID;

use super::error::{LexError, LexResult};
use super::{Span, Token, TokenKind};

/// Columns a tab advances indentation to (next multiple of this width).
const TAB_WIDTH: usize = 8;

/// A scanner that tokenizes indentation-sensitive source code.
///
/// Indentation is reported as explicit `Indent`/`Dedent` tokens and logical
/// line ends as `Newline`, so the parser never looks at columns itself.
/// Newlines inside brackets are insignificant.
pub struct Scanner<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    line: u32,
    column: u32,
    indent_stack: Vec<usize>,
    pending: VecDeque<Token>,
    at_line_start: bool,
    nesting: Vec<char>,
    /// Whether a token other than `Newline` was emitted since the last line end
    line_has_tokens: bool,
    finished: bool,
}

/// String prefix flags (`r`, `b`, `f`).
#[derive(Debug, Clone, Copy, Default)]
struct StringPrefix {
    raw: bool,
    format: bool,
}

impl<'a> Scanner<'a> {
    /// Creates a new scanner for the given source code.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            column: 1,
            indent_stack: vec![0],
            pending: VecDeque::new(),
            at_line_start: true,
            nesting: Vec::new(),
            line_has_tokens: false,
            finished: false,
        }
    }

    /// Returns the next token from the source.
    ///
    /// After the end of input every call returns `Eof`.
    pub fn next_token(&mut self) -> LexResult<Token> {
        if let Some(token) = self.pending.pop_front() {
            return Ok(token);
        }

        loop {
            if self.at_line_start && self.nesting.is_empty() {
                self.at_line_start = false;
                if self.scan_indentation()? {
                    continue;
                }
                if let Some(token) = self.pending.pop_front() {
                    return Ok(token);
                }
            }

            self.skip_whitespace_and_comments();

            let start = self.current_pos;
            let (line, column) = (self.line, self.column);

            let Some((_, ch)) = self.advance() else {
                return Ok(self.finish(start, line, column));
            };

            let kind = match ch {
                '\n' => {
                    if !self.nesting.is_empty() {
                        continue;
                    }
                    self.at_line_start = true;
                    if !self.line_has_tokens {
                        continue;
                    }
                    self.line_has_tokens = false;
                    return Ok(Token::new(
                        TokenKind::Newline,
                        Span::new(start, self.current_pos, line, column),
                    ));
                }
                '\r' => continue,
                '(' | '[' | '{' => {
                    self.nesting.push(ch);
                    match ch {
                        '(' => TokenKind::LeftParen,
                        '[' => TokenKind::LeftBracket,
                        _ => TokenKind::LeftBrace,
                    }
                }
                ')' | ']' | '}' => {
                    let expected = match ch {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    if self.nesting.pop() != Some(expected) {
                        return Err(LexError::UnmatchedBracket {
                            bracket: ch,
                            line,
                            column,
                        });
                    }
                    match ch {
                        ')' => TokenKind::RightParen,
                        ']' => TokenKind::RightBracket,
                        _ => TokenKind::RightBrace,
                    }
                }
                ',' => TokenKind::Comma,
                ';' => TokenKind::Semicolon,
                '~' => TokenKind::Tilde,
                ':' => self.scan_colon(),
                '.' => self.scan_dot(line, column)?,
                '+' => self.with_equal(TokenKind::Plus, TokenKind::PlusEqual),
                '-' => self.scan_minus(),
                '*' => self.scan_star(),
                '/' => self.scan_slash(),
                '%' => self.with_equal(TokenKind::Percent, TokenKind::PercentEqual),
                '@' => TokenKind::At,
                '&' => self.with_equal(TokenKind::Ampersand, TokenKind::AmpersandEqual),
                '|' => self.with_equal(TokenKind::Pipe, TokenKind::PipeEqual),
                '^' => self.with_equal(TokenKind::Caret, TokenKind::CaretEqual),
                '<' => self.scan_less_than(),
                '>' => self.scan_greater_than(),
                '=' => self.with_equal(TokenKind::Equal, TokenKind::EqualEqual),
                '!' => {
                    if self.peek() == Some('=') {
                        self.advance();
                        TokenKind::NotEqual
                    } else {
                        return Err(LexError::UnexpectedCharacter {
                            character: '!',
                            line,
                            column,
                        });
                    }
                }
                '"' | '\'' => self.scan_string(ch, StringPrefix::default(), line, column)?,
                '0'..='9' => self.scan_number(ch, line, column)?,
                c if c == '_' || c.is_xid_start() => self.scan_identifier_or_string(start, line, column)?,
                other => {
                    return Err(LexError::UnexpectedCharacter {
                        character: other,
                        line,
                        column,
                    });
                }
            };

            self.line_has_tokens = true;
            return Ok(Token::new(kind, Span::new(start, self.current_pos, line, column)));
        }
    }

    /// Tokenizes the whole input, including the trailing `Eof`.
    pub fn tokenize(mut self) -> LexResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    // ========================================================================
    // Layout
    // ========================================================================

    /// Measures the indentation of a fresh line and queues Indent/Dedent.
    ///
    /// Returns true when the line is blank or comment-only and was skipped.
    fn scan_indentation(&mut self) -> LexResult<bool> {
        let mut width = 0usize;
        let (line, column) = (self.line, self.column);
        while let Some(ch) = self.peek() {
            match ch {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\x0c' => width = 0,
                _ => break,
            }
            self.advance();
        }

        match self.peek() {
            None => return Ok(false),
            Some('#') => {
                self.skip_comment();
                self.skip_line_end();
                self.at_line_start = true;
                return Ok(true);
            }
            Some('\n') | Some('\r') => {
                self.skip_line_end();
                self.at_line_start = true;
                return Ok(true);
            }
            Some(_) => {}
        }

        let current = self.indent_stack.last().copied().unwrap_or(0);
        let span = Span::new(self.current_pos, self.current_pos, line, column);
        if width > current {
            self.indent_stack.push(width);
            self.pending.push_back(Token::new(TokenKind::Indent, span));
        } else if width < current {
            while self.indent_stack.last().is_some_and(|&top| top > width) {
                self.indent_stack.pop();
                self.pending.push_back(Token::new(TokenKind::Dedent, span));
            }
            if self.indent_stack.last().copied().unwrap_or(0) != width {
                return Err(LexError::InconsistentDedent { line, column });
            }
        }
        Ok(false)
    }

    fn skip_line_end(&mut self) {
        if self.peek() == Some('\r') {
            self.advance();
        }
        if self.peek() == Some('\n') {
            self.advance();
        }
    }

    /// Produces the end-of-input token sequence: a closing `Newline` if the
    /// last line had tokens, one `Dedent` per open block, then `Eof`.
    fn finish(&mut self, start: usize, line: u32, column: u32) -> Token {
        let span = Span::new(start, start, line, column);
        if !self.finished {
            self.finished = true;
            if self.line_has_tokens {
                self.line_has_tokens = false;
                self.pending.push_back(Token::new(TokenKind::Newline, span));
            }
            while self.indent_stack.len() > 1 {
                self.indent_stack.pop();
                self.pending.push_back(Token::new(TokenKind::Dedent, span));
            }
        }
        self.pending
            .pop_front()
            .unwrap_or_else(|| Token::new(TokenKind::Eof, span))
    }

    // ========================================================================
    // Character helpers
    // ========================================================================

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((pos, ch)) = result {
            self.current_pos = pos + ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        result
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn peek_second(&self) -> Option<char> {
        let mut iter = self.source[self.current_pos..].chars();
        iter.next();
        iter.next()
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.peek() {
            match ch {
                ' ' | '\t' | '\x0c' => {
                    self.advance();
                }
                '#' => self.skip_comment(),
                '\\' if matches!(self.peek_second(), Some('\n') | Some('\r')) => {
                    self.advance();
                    self.skip_line_end();
                }
                '\r' if self.peek_second() == Some('\n') => {
                    self.advance();
                }
                _ => break,
            }
        }
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn with_equal(&mut self, plain: TokenKind, with_eq: TokenKind) -> TokenKind {
        if self.peek() == Some('=') {
            self.advance();
            with_eq
        } else {
            plain
        }
    }

    fn scan_colon(&mut self) -> TokenKind {
        self.with_equal(TokenKind::Colon, TokenKind::Walrus)
    }

    fn scan_dot(&mut self, line: u32, column: u32) -> LexResult<TokenKind> {
        if self.peek().is_some_and(|c| c.is_ascii_digit()) {
            return self.scan_number('.', line, column);
        }
        if self.peek() == Some('.') && self.peek_second() == Some('.') {
            self.advance();
            self.advance();
            return Ok(TokenKind::Ellipsis);
        }
        Ok(TokenKind::Dot)
    }

    fn scan_minus(&mut self) -> TokenKind {
        match self.peek() {
            Some('>') => {
                self.advance();
                TokenKind::Arrow
            }
            _ => self.with_equal(TokenKind::Minus, TokenKind::MinusEqual),
        }
    }

    fn scan_star(&mut self) -> TokenKind {
        if self.peek() == Some('*') {
            self.advance();
            self.with_equal(TokenKind::DoubleStar, TokenKind::DoubleStarEqual)
        } else {
            self.with_equal(TokenKind::Star, TokenKind::StarEqual)
        }
    }

    fn scan_slash(&mut self) -> TokenKind {
        if self.peek() == Some('/') {
            self.advance();
            self.with_equal(TokenKind::DoubleSlash, TokenKind::DoubleSlashEqual)
        } else {
            self.with_equal(TokenKind::Slash, TokenKind::SlashEqual)
        }
    }

    fn scan_less_than(&mut self) -> TokenKind {
        match self.peek() {
            Some('<') => {
                self.advance();
                self.with_equal(TokenKind::LeftShift, TokenKind::LeftShiftEqual)
            }
            Some('=') => {
                self.advance();
                TokenKind::LessEqual
            }
            _ => TokenKind::Less,
        }
    }

    fn scan_greater_than(&mut self) -> TokenKind {
        match self.peek() {
            Some('>') => {
                self.advance();
                self.with_equal(TokenKind::RightShift, TokenKind::RightShiftEqual)
            }
            Some('=') => {
                self.advance();
                TokenKind::GreaterEqual
            }
            _ => TokenKind::Greater,
        }
    }

    // ========================================================================
    // Literals
    // ========================================================================

    fn scan_identifier_or_string(&mut self, start: usize, line: u32, column: u32) -> LexResult<TokenKind> {
        while let Some(ch) = self.peek() {
            if ch == '_' || ch.is_xid_continue() {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.source[start..self.current_pos];

        if let Some(quote @ ('"' | '\'')) = self.peek() {
            if let Some(prefix) = Self::string_prefix(text) {
                self.advance();
                return self.scan_string(quote, prefix, line, column);
            }
        }

        Ok(TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Identifier(text.to_string())))
    }

    fn string_prefix(text: &str) -> Option<StringPrefix> {
        if text.len() > 2 {
            return None;
        }
        let mut prefix = StringPrefix::default();
        let mut bytes = false;
        for ch in text.chars() {
            match ch.to_ascii_lowercase() {
                'r' if !prefix.raw => prefix.raw = true,
                'f' if !prefix.format && !bytes => prefix.format = true,
                // Byte strings are read as text strings.
                'b' if !bytes && !prefix.format => bytes = true,
                'u' if text.len() == 1 => {}
                _ => return None,
            }
        }
        Some(prefix)
    }

    fn scan_string(
        &mut self,
        quote: char,
        prefix: StringPrefix,
        line: u32,
        column: u32,
    ) -> LexResult<TokenKind> {
        let triple = self.peek() == Some(quote) && self.peek_second() == Some(quote);
        if triple {
            self.advance();
            self.advance();
        } else if self.peek() == Some(quote) {
            self.advance();
            return Ok(if prefix.format {
                TokenKind::FString(String::new())
            } else {
                TokenKind::String(String::new())
            });
        }

        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(LexError::UnterminatedString { line, column }),
                Some((_, '\n')) if !triple => {
                    return Err(LexError::UnterminatedString { line, column });
                }
                Some((_, ch)) if ch == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek() == Some(quote) && self.peek_second() == Some(quote) {
                        self.advance();
                        self.advance();
                        break;
                    }
                    value.push(ch);
                }
                Some((_, '\\')) => {
                    let Some((_, escaped)) = self.advance() else {
                        return Err(LexError::UnterminatedString { line, column });
                    };
                    if prefix.raw {
                        value.push('\\');
                        value.push(escaped);
                    } else {
                        self.push_escape(escaped, &mut value);
                    }
                }
                Some((_, ch)) => value.push(ch),
            }
        }

        Ok(if prefix.format {
            TokenKind::FString(value)
        } else {
            TokenKind::String(value)
        })
    }

    fn push_escape(&mut self, escaped: char, value: &mut String) {
        match escaped {
            'n' => value.push('\n'),
            'r' => value.push('\r'),
            't' => value.push('\t'),
            '\\' => value.push('\\'),
            '\'' => value.push('\''),
            '"' => value.push('"'),
            'a' => value.push('\x07'),
            'b' => value.push('\x08'),
            'f' => value.push('\x0c'),
            'v' => value.push('\x0b'),
            '\n' => {}
            'x' => self.push_hex_escape(2, 'x', value),
            'u' => self.push_hex_escape(4, 'u', value),
            'U' => self.push_hex_escape(8, 'U', value),
            '0'..='7' => {
                let mut code = escaped.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            self.advance();
                        }
                        None => break,
                    }
                }
                value.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            other => {
                value.push('\\');
                value.push(other);
            }
        }
    }

    fn push_hex_escape(&mut self, digits: usize, marker: char, value: &mut String) {
        let mut code = 0u32;
        let mut read = String::new();
        for _ in 0..digits {
            match self.peek().filter(|c| c.is_ascii_hexdigit()) {
                Some(ch) => {
                    read.push(ch);
                    code = code * 16 + ch.to_digit(16).unwrap_or(0);
                    self.advance();
                }
                None => break,
            }
        }
        match char::from_u32(code).filter(|_| read.len() == digits) {
            Some(ch) => value.push(ch),
            None => {
                value.push('\\');
                value.push(marker);
                value.push_str(&read);
            }
        }
    }

    fn scan_number(&mut self, first: char, line: u32, column: u32) -> LexResult<TokenKind> {
        let invalid = |literal: String| LexError::InvalidNumber {
            literal,
            line,
            column,
        };

        if first == '0' {
            let radix = match self.peek() {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance();
                let mut digits = String::new();
                while let Some(ch) = self.peek() {
                    if ch == '_' {
                        self.advance();
                    } else if ch.is_digit(radix) {
                        digits.push(ch);
                        self.advance();
                    } else if ch.is_ascii_alphanumeric() {
                        digits.push(ch);
                        return Err(invalid(digits));
                    } else {
                        break;
                    }
                }
                return Self::integer_token(&digits, radix).ok_or_else(|| invalid(digits));
            }
        }

        let mut text = String::new();
        let mut is_float = first == '.';
        text.push(first);
        self.scan_digits(&mut text);

        if !is_float && self.peek() == Some('.') && self.peek_second() != Some('.') {
            is_float = true;
            text.push('.');
            self.advance();
            self.scan_digits(&mut text);
        }

        if matches!(self.peek(), Some('e' | 'E')) {
            let next = self.peek_second();
            if next.is_some_and(|c| c.is_ascii_digit() || c == '+' || c == '-') {
                is_float = true;
                text.push('e');
                self.advance();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.advance();
                }
                self.scan_digits(&mut text);
            }
        }

        if self.peek().is_some_and(|c| c == '_' || c.is_xid_start()) {
            let bad = self.peek().unwrap_or('?');
            text.push(bad);
            return Err(invalid(text));
        }

        if is_float {
            return text
                .parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| invalid(text));
        }
        Self::integer_token(&text, 10).ok_or_else(|| invalid(text))
    }

    fn scan_digits(&mut self, text: &mut String) {
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.advance();
            } else if ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn integer_token(digits: &str, radix: u32) -> Option<TokenKind> {
        if digits.is_empty() {
            return None;
        }
        if let Ok(n) = i64::from_str_radix(digits, radix) {
            return Some(TokenKind::Int(n));
        }
        BigInt::parse_bytes(digits.as_bytes(), radix).map(|big| TokenKind::BigInt(big.to_string()))
    }
}

impl Iterator for Scanner<'_> {
    type Item = LexResult<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(token) if token.kind == TokenKind::Eof => None,
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Scanner::new(src)
            .tokenize()
            .expect("tokenize should succeed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_tokens() {
        let toks = kinds("( ) [ ] , :");
        assert_eq!(
            toks,
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBracket,
                TokenKind::RightBracket,
                TokenKind::Comma,
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let mut scanner = Scanner::new("42 3.14 0xff 0b1010 1_000 1e3 .5");
        assert!(matches!(scanner.next_token().unwrap().kind, TokenKind::Int(42)));
        assert!(matches!(scanner.next_token().unwrap().kind, TokenKind::Float(n) if n == 3.14));
        assert!(matches!(scanner.next_token().unwrap().kind, TokenKind::Int(255)));
        assert!(matches!(scanner.next_token().unwrap().kind, TokenKind::Int(10)));
        assert!(matches!(scanner.next_token().unwrap().kind, TokenKind::Int(1000)));
        assert!(matches!(scanner.next_token().unwrap().kind, TokenKind::Float(n) if n == 1000.0));
        assert!(matches!(scanner.next_token().unwrap().kind, TokenKind::Float(n) if n == 0.5));
    }

    #[test]
    fn test_big_integer_literal() {
        let toks = kinds("123456789012345678901234567890");
        assert_eq!(
            toks[0],
            TokenKind::BigInt("123456789012345678901234567890".into())
        );
    }

    #[test]
    fn test_strings() {
        let mut scanner = Scanner::new(r#""hello" 'wor\tld' r'\n' f"x{y}""#);
        assert!(matches!(scanner.next_token().unwrap().kind, TokenKind::String(s) if s == "hello"));
        assert!(matches!(scanner.next_token().unwrap().kind, TokenKind::String(s) if s == "wor\tld"));
        assert!(matches!(scanner.next_token().unwrap().kind, TokenKind::String(s) if s == "\\n"));
        assert!(matches!(scanner.next_token().unwrap().kind, TokenKind::FString(s) if s == "x{y}"));
    }

    #[test]
    fn test_triple_quoted_string() {
        let toks = kinds("'''a\nb'''");
        assert_eq!(toks[0], TokenKind::String("a\nb".into()));
    }

    #[test]
    fn test_keywords() {
        let toks = kinds("def yield lambda None");
        assert_eq!(
            &toks[..4],
            &[
                TokenKind::Def,
                TokenKind::Yield,
                TokenKind::Lambda,
                TokenKind::None
            ]
        );
    }

    #[test]
    fn test_operators() {
        let toks = kinds("** //= -> != := <<= ...");
        assert_eq!(
            &toks[..7],
            &[
                TokenKind::DoubleStar,
                TokenKind::DoubleSlashEqual,
                TokenKind::Arrow,
                TokenKind::NotEqual,
                TokenKind::Walrus,
                TokenKind::LeftShiftEqual,
                TokenKind::Ellipsis,
            ]
        );
    }

    #[test]
    fn test_indent_dedent() {
        let toks = kinds("if x:\n    y\nz\n");
        assert_eq!(
            toks,
            vec![
                TokenKind::If,
                TokenKind::Identifier("x".into()),
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Identifier("y".into()),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Identifier("z".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_dedents_at_eof() {
        let toks = kinds("def f():\n  if a:\n    b");
        let dedents = toks.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(toks.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn test_blank_and_comment_lines_are_skipped() {
        let toks = kinds("a\n\n   # comment\n\nb\n");
        assert_eq!(
            toks,
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Newline,
                TokenKind::Identifier("b".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_ignored() {
        let toks = kinds("f(1,\n      2)\n");
        assert!(!toks[..toks.len() - 2].contains(&TokenKind::Newline));
        assert!(!toks.contains(&TokenKind::Indent));
    }

    #[test]
    fn test_inconsistent_dedent() {
        let err = Scanner::new("if x:\n    a\n  b\n").tokenize().unwrap_err();
        assert!(matches!(err, LexError::InconsistentDedent { line: 3, .. }));
    }

    #[test]
    fn test_unterminated_string() {
        let err = Scanner::new("x = 'abc\n").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString { line: 1, column: 5 }));
    }

    #[test]
    fn test_positions() {
        let tokens = Scanner::new("a = 1\nbb = 2").tokenize().unwrap();
        let bb = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Identifier("bb".into()))
            .unwrap();
        assert_eq!((bb.span.line, bb.span.column), (2, 1));
    }
}
