// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interactive prompt for protopy.
//!
//! Input is highlighted with the engine's own lexer. A statement that opens
//! a block keeps reading lines until an empty one, like the CPython prompt.

use std::borrow::Cow;
use std::ops::ControlFlow;
use std::path::PathBuf;

use owo_colors::OwoColorize;
use protopy_engine::compiler::disassemble;
use protopy_engine::lexer::{Scanner, TokenKind};
use protopy_engine::{Engine, Value};
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Config, Editor, Helper};
use tracing::debug;

use crate::report;

const HISTORY_FILE: &str = ".protopy_history";
const PROMPT: &str = ">>> ";

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del",
    "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal",
    "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Help,
    Exit,
    Clear,
    Version,
    Load,
    Dis,
}

struct CommandSpec {
    /// The first name is the one shown and completed.
    names: &'static [&'static str],
    usage: &'static str,
    help: &'static str,
    command: Command,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec { names: &["help", "h", "?"], usage: "", help: "Show this help message", command: Command::Help },
    CommandSpec { names: &["exit", "quit", "q"], usage: "", help: "Leave the prompt", command: Command::Exit },
    CommandSpec { names: &["clear", "cls"], usage: "", help: "Clear the screen", command: Command::Clear },
    CommandSpec { names: &["version", "v"], usage: "", help: "Show version information", command: Command::Version },
    CommandSpec {
        names: &["load", "l"],
        usage: "<file>",
        help: "Run a file in the session namespace",
        command: Command::Load,
    },
    CommandSpec {
        names: &["dis"],
        usage: "<code>",
        help: "Show the bytecode for a statement or expression",
        command: Command::Dis,
    },
];

impl Command {
    /// `.name [argument]`, matched case-insensitively against every alias.
    fn parse(input: &str) -> Option<(Self, Option<&str>)> {
        let rest = input.trim().strip_prefix('.')?;
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim()).filter(|arg| !arg.is_empty())),
            None => (rest, None),
        };
        COMMANDS
            .iter()
            .find(|spec| spec.names.iter().any(|alias| alias.eq_ignore_ascii_case(name)))
            .map(|spec| (spec.command, arg))
    }
}

struct ProtopyHelper {
    /// Sorted completion candidates: keywords, public builtins and dot commands.
    words: Vec<String>,
}

impl ProtopyHelper {
    fn new(builtins: impl IntoIterator<Item = String>) -> Self {
        let mut words: Vec<String> = KEYWORDS
            .iter()
            .map(|word| word.to_string())
            .chain(builtins.into_iter().filter(|name| !name.starts_with('_')))
            .chain(COMMANDS.iter().map(|spec| format!(".{}", spec.names[0])))
            .collect();
        words.sort();
        words.dedup();
        Self { words }
    }

    fn completions<'w>(&'w self, prefix: &'w str) -> impl Iterator<Item = &'w String> + 'w {
        self.words.iter().filter(move |word| word.len() > prefix.len() && word.starts_with(prefix))
    }
}

/// The identifier (or dot command) that ends at the end of `line`.
fn trailing_word(line: &str) -> &str {
    let start = line
        .rfind(|c: char| !c.is_alphanumeric() && c != '_' && c != '.')
        .map_or(0, |i| i + 1);
    &line[start..]
}

impl Completer for ProtopyHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let word = trailing_word(&line[..pos]);
        if word.is_empty() {
            return Ok((pos, Vec::new()));
        }
        let pairs = self
            .completions(word)
            .map(|candidate| Pair {
                display: candidate.clone(),
                replacement: candidate[word.len()..].to_string(),
            })
            .collect();
        Ok((pos, pairs))
    }
}

impl Hinter for ProtopyHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        let word = trailing_word(line);
        if pos < line.len() || word.len() < 2 {
            return None;
        }
        let rest = &self.completions(word).next()?[word.len()..];
        Some(rest.dimmed().to_string())
    }
}

impl Highlighter for ProtopyHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        Cow::Owned(highlight_source(line))
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

/// Colors `source` token by token. Text the lexer rejects, such as an
/// unterminated string, is left as it is.
fn highlight_source(source: &str) -> String {
    if source.trim_start().starts_with('.') {
        return source.magenta().to_string();
    }
    let mut out = String::with_capacity(source.len() * 2);
    let mut copied = 0;
    let mut scanner = Scanner::new(source);
    while let Ok(token) = scanner.next_token() {
        if token.kind == TokenKind::Eof {
            break;
        }
        let (start, end) = (token.span.start, token.span.end);
        if start < copied || start >= end || end > source.len() {
            continue;
        }
        out.push_str(&paint_gap(&source[copied..start]));
        out.push_str(&paint_token(&token.kind, &source[start..end]));
        copied = end;
    }
    out.push_str(&paint_gap(&source[copied..]));
    out
}

/// Whitespace and comments between tokens.
fn paint_gap(gap: &str) -> String {
    match gap.find('#') {
        Some(hash) => format!("{}{}", &gap[..hash], (&gap[hash..]).dimmed()),
        None => gap.to_string(),
    }
}

fn paint_token(kind: &TokenKind, text: &str) -> String {
    match kind {
        TokenKind::True | TokenKind::False | TokenKind::None => text.blue().to_string(),
        TokenKind::Int(_) | TokenKind::BigInt(_) | TokenKind::Float(_) => text.yellow().to_string(),
        TokenKind::String(_) | TokenKind::FString(_) => text.green().to_string(),
        kind if kind.is_keyword() => text.magenta().bold().to_string(),
        _ => text.to_string(),
    }
}

impl Validator for ProtopyHelper {
    fn validate(&self, ctx: &mut ValidationContext<'_>) -> rustyline::Result<ValidationResult> {
        Ok(if needs_more_input(ctx.input()) {
            ValidationResult::Incomplete
        } else {
            ValidationResult::Valid(None)
        })
    }
}

impl Helper for ProtopyHelper {}

/// Whether `input` is an unfinished statement.
///
/// Open brackets, open triple-quoted strings and trailing backslashes
/// continue. A block (any line ending in `:`) continues until a blank line.
fn needs_more_input(input: &str) -> bool {
    if input.trim_start().starts_with('.') {
        return false;
    }
    if !is_balanced(input) || input.trim_end_matches([' ', '\t']).ends_with('\\') {
        return true;
    }
    let opens_block = input.lines().any(|line| strip_comment(line).trim_end().ends_with(':'));
    let ends_blank = input.ends_with('\n') || input.lines().last().is_some_and(|line| line.trim().is_empty());
    opens_block && !ends_blank
}

/// The part of `line` before a `#` that is not inside a string.
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match quote {
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' => return &line[..i],
            None => {}
        }
    }
    line
}

/// Whether every bracket is closed and no string is left open. A closing
/// bracket without a match counts as balanced so the parser reports it.
fn is_balanced(input: &str) -> bool {
    let mut brackets = Vec::new();
    let mut chars = input.chars().peekable();
    // The open quote character and whether it is tripled.
    let mut string: Option<(char, bool)> = None;

    while let Some(c) = chars.next() {
        match string {
            Some(_) if c == '\\' => {
                chars.next();
            }
            Some((quote, triple)) if c == quote => {
                if !triple || (chars.next_if_eq(&quote).is_some() && chars.next_if_eq(&quote).is_some()) {
                    string = None;
                }
            }
            Some((_, false)) if c == '\n' => string = None,
            Some(_) => {}
            None => match c {
                '#' => {
                    chars.by_ref().find(|&next| next == '\n');
                }
                '"' | '\'' => {
                    let doubled = chars.next_if_eq(&c).is_some();
                    // `''` is an empty string, `'''` opens a triple-quoted one.
                    if !doubled || chars.next_if_eq(&c).is_some() {
                        string = Some((c, doubled));
                    }
                }
                '(' => brackets.push(')'),
                '[' => brackets.push(']'),
                '{' => brackets.push('}'),
                ')' | ']' | '}' if brackets.pop() != Some(c) => return true,
                _ => {}
            },
        }
    }

    brackets.is_empty() && string.is_none()
}

/// The interactive prompt around one engine.
pub struct Repl {
    engine: Engine,
    editor: Editor<ProtopyHelper, DefaultHistory>,
    history_path: PathBuf,
}

impl Repl {
    /// Wraps `engine`, keeping its namespace.
    pub fn new(mut engine: Engine) -> rustyline::Result<Self> {
        let config = Config::builder()
            .history_ignore_dups(true)?
            .auto_add_history(true)
            .build();

        let builtins = engine.vm().builtins().snapshot().into_iter().map(|(name, _)| name);
        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(ProtopyHelper::new(builtins)));

        let history_path = dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(HISTORY_FILE);
        if let Err(err) = editor.load_history(&history_path) {
            debug!(path = %history_path.display(), error = %err, "no history loaded");
        }

        Ok(Self {
            engine,
            editor,
            history_path,
        })
    }

    pub fn run(&mut self) -> rustyline::Result<()> {
        println!(
            "{} {} {}",
            "protopy".bright_cyan().bold(),
            env!("CARGO_PKG_VERSION").bright_yellow(),
            format!("({} {})", std::env::consts::OS, std::env::consts::ARCH).dimmed()
        );
        println!("{} {} {}", "Type".dimmed(), ".help".cyan(), "for available commands".dimmed());

        loop {
            let line = match self.editor.readline(PROMPT) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "KeyboardInterrupt".dimmed());
                    continue;
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("{}: {:?}", "error".red().bold(), err);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match Command::parse(&line) {
                Some((command, arg)) => {
                    if self.execute(command, arg).is_break() {
                        break;
                    }
                }
                None if line.trim_start().starts_with('.') => {
                    eprintln!("{}: unknown command {}", "error".red().bold(), line.trim().cyan());
                }
                None => self.eval_and_print(&line),
            }
        }

        if let Err(err) = self.editor.save_history(&self.history_path) {
            debug!(path = %self.history_path.display(), error = %err, "history not saved");
        }
        Ok(())
    }

    fn execute(&mut self, command: Command, arg: Option<&str>) -> ControlFlow<()> {
        match (command, arg) {
            (Command::Help, _) => print_help(),
            (Command::Exit, _) => return ControlFlow::Break(()),
            (Command::Clear, _) => print!("\x1B[2J\x1B[H"),
            (Command::Version, _) => {
                println!("{} {}", "protopy".bright_cyan().bold(), env!("CARGO_PKG_VERSION").yellow());
                println!("{} {}", "recursion limit".dimmed(), self.engine.config().recursion_limit);
            }
            (Command::Load, Some(path)) => match self.engine.eval_file(path) {
                Ok(_) => println!("{} {}", "loaded".dimmed(), path.green()),
                Err(err) => report(&err),
            },
            (Command::Dis, Some(source)) => match self.engine.compile(source, "<stdin>") {
                Ok(code) => print!("{}", disassemble(&code)),
                Err(err) => report(&err),
            },
            (Command::Load | Command::Dis, None) => {
                let spec = COMMANDS.iter().find(|spec| spec.command == command);
                let usage = spec.map_or("", |spec| spec.usage);
                eprintln!("{}: .{} {}", "usage".red().bold(), spec.map_or("", |spec| spec.names[0]), usage);
            }
        }
        ControlFlow::Continue(())
    }

    fn eval_and_print(&mut self, input: &str) {
        let shown = self.engine.eval(input).and_then(|value| match value {
            Value::None => Ok(None),
            value => self.engine.repr(&value).map(|text| Some(paint_value(&value, text))),
        });
        match shown {
            Ok(Some(text)) => println!("{}", text),
            Ok(None) => {}
            Err(err) => report(&err),
        }
    }
}

fn print_help() {
    println!();
    for spec in COMMANDS {
        let usage = format!(".{} {}", spec.names[0], spec.usage);
        println!("  {:16} {}", usage.cyan(), spec.help.dimmed());
    }
    println!();
    println!("{}", "Blocks ending in ':' continue until an empty line.".dimmed());
    println!();
}

fn paint_value(value: &Value, repr: String) -> String {
    match value {
        Value::Bool(_) | Value::None => repr.blue().to_string(),
        Value::Int(_) | Value::Long(_) | Value::Float(_) => repr.yellow().to_string(),
        Value::Str(_) => repr.green().to_string(),
        Value::Ellipsis | Value::NotImplemented => repr.magenta().to_string(),
        Value::Object(_) => repr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `text` with ANSI color sequences removed.
    fn plain(text: &str) -> String {
        let mut out = String::new();
        let mut chars = text.chars();
        while let Some(c) = chars.next() {
            if c == '\x1B' {
                chars.by_ref().find(|&next| next == 'm');
            } else {
                out.push(c);
            }
        }
        out
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse(".help"), Some((Command::Help, None)));
        assert_eq!(Command::parse("  .QUIT "), Some((Command::Exit, None)));
        assert_eq!(Command::parse(".load test.py"), Some((Command::Load, Some("test.py"))));
        assert_eq!(Command::parse(".dis x + 1"), Some((Command::Dis, Some("x + 1"))));
        assert_eq!(Command::parse(".load   "), Some((Command::Load, None)));
        assert_eq!(Command::parse("not a command"), None);
        assert_eq!(Command::parse(".bogus"), None);
    }

    #[test]
    fn test_is_balanced() {
        assert!(is_balanced("(1 + 2)"));
        assert!(is_balanced("{'a': 1}"));
        assert!(!is_balanced("(1 + 2"));
        assert!(!is_balanced("[1,\n 2"));
        assert!(is_balanced("'string with (unbalanced'"));
        assert!(is_balanced("x = 1  # comment (with paren"));
        assert!(!is_balanced("doc = \"\"\"open"));
        assert!(is_balanced("doc = \"\"\"open\nclosed\"\"\""));
        assert!(is_balanced("s = ''"));
    }

    #[test]
    fn test_block_continuation() {
        assert!(needs_more_input("def f():"));
        assert!(needs_more_input("def f():\n    return 1"));
        assert!(!needs_more_input("def f():\n    return 1\n"));
        assert!(!needs_more_input("x = {'a': 1}"));
        assert!(!needs_more_input("x = 1  # trailing:"));
        assert!(needs_more_input("total = 1 + \\"));
        assert!(!needs_more_input(".load script.py"));
    }

    #[test]
    fn test_completion_words() {
        let helper = ProtopyHelper::new(vec!["print".to_string(), "__name__".to_string()]);
        assert!(helper.words.iter().any(|w| w == "print"));
        assert!(helper.words.iter().any(|w| w == "lambda"));
        assert!(helper.words.iter().any(|w| w == ".dis"));
        assert!(!helper.words.iter().any(|w| w == "__name__"));
        assert_eq!(helper.completions("lam").collect::<Vec<_>>(), vec!["lambda"]);
        assert_eq!(trailing_word("x = pri"), "pri");
    }

    #[test]
    fn test_highlighting_keeps_text() {
        for source in ["def f(x):  # add one", "s = 'open", "    return x + 1.5", "print(f\"{x!r}\")"] {
            assert_eq!(plain(&highlight_source(source)), source);
        }
        let colored = highlight_source("while True: pass");
        assert_ne!(colored, "while True: pass");
    }
}
