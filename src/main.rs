// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! protopy - a Python-like language runtime written in Rust
//!
//! This is the main entry point for the protopy CLI/REPL.
//!
//! ## Features
//!
//! - Interactive REPL with highlighting, history and block continuation
//! - Script, `-e` and `-m` execution on the async engine
//! - Bytecode disassembly and compile-only dry runs

mod repl;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use owo_colors::OwoColorize;
use protopy_engine::compiler::disassemble;
use protopy_engine::config::{DEFAULT_RECURSION_LIMIT, PATH_ENV, RECURSION_LIMIT_ENV};
use protopy_engine::{AsyncEngine, Engine, EngineConfig, Error};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const PATH_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

/// Run Python-like scripts, or start an interactive session.
#[derive(Debug, Parser)]
#[command(name = "protopy", version, about, long_about = None)]
struct Cli {
    /// Script to run
    #[arg(value_name = "SCRIPT")]
    script: Option<PathBuf>,

    /// Arguments passed to the program as `sys.argv[1:]`
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Evaluate CODE instead of a script
    #[arg(short = 'e', long = "eval", value_name = "CODE", conflicts_with_all = ["script", "module"])]
    eval: Option<String>,

    /// Run library module NAME as a script
    #[arg(short = 'm', long = "module", value_name = "NAME", conflicts_with = "script")]
    module: Option<String>,

    /// Add a module search directory
    #[arg(short = 'p', long = "path", value_name = "DIR", env = PATH_ENV, value_delimiter = PATH_SEPARATOR)]
    path: Vec<PathBuf>,

    /// Print the bytecode instead of executing
    #[arg(long)]
    dis: bool,

    /// Parse and compile only
    #[arg(long)]
    dry_run: bool,

    /// Log every executed instruction
    #[arg(long)]
    trace: bool,

    /// Enable debug logging
    #[arg(long)]
    verbose: bool,

    /// Start the REPL after running the program
    #[arg(short = 'i', long)]
    interactive: bool,

    /// Maximum call depth
    #[arg(long, value_name = "N", env = RECURSION_LIMIT_ENV, default_value_t = DEFAULT_RECURSION_LIMIT)]
    recursion_limit: usize,
}

/// What the command line asked to run.
enum Program<'a> {
    Script(&'a Path),
    Eval(&'a str),
    Module(&'a str),
    Repl,
}

impl Cli {
    fn program(&self) -> Program<'_> {
        if let Some(code) = &self.eval {
            Program::Eval(code)
        } else if let Some(name) = &self.module {
            Program::Module(name)
        } else if let Some(script) = &self.script {
            Program::Script(script)
        } else {
            Program::Repl
        }
    }

    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_recursion_limit(self.recursion_limit)
            .with_search_paths(self.path.iter().cloned());
        config.trace_execution = self.trace;

        let argv0 = match self.program() {
            Program::Script(path) => {
                // The script's directory goes first, so sibling modules import.
                let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
                config.search_paths.insert(0, dir.to_path_buf());
                config.filename = path.display().to_string();
                path.display().to_string()
            }
            Program::Eval(_) => {
                config.filename = "<string>".to_string();
                "-e".to_string()
            }
            Program::Module(name) => {
                config.search_paths.insert(0, PathBuf::from("."));
                name.to_string()
            }
            Program::Repl => {
                config.search_paths.insert(0, PathBuf::from("."));
                config.filename = "<stdin>".to_string();
                String::new()
            }
        };
        config.argv = std::iter::once(argv0).chain(self.args.iter().cloned()).collect();
        config
    }
}

fn init_logging(cli: &Cli) {
    let default = if cli.trace {
        "protopy=debug,protopy_engine=trace"
    } else if cli.verbose {
        "protopy=debug,protopy_engine=debug"
    } else {
        "protopy=warn,protopy_engine=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Main entry point - uses tokio runtime for async file reads.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}: {:#}", "error".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.config();
    debug!(search_paths = ?config.search_paths, argv = ?config.argv, "starting");

    if cli.dis || cli.dry_run {
        return compile_only(&cli, config);
    }

    let engine = AsyncEngine::new(config);
    let outcome = match cli.program() {
        Program::Script(path) => {
            if !path.exists() {
                bail!("can't open file '{}': no such file", path.display());
            }
            engine.eval_file(path).await.map(drop)
        }
        Program::Eval(code) => match engine.eval(code).await {
            Ok(value) if !value.is_none() => engine
                .with_engine(|engine| engine.repr(&value))
                .await
                .map(|text| println!("{}", text)),
            other => other.map(drop),
        },
        Program::Module(name) => engine.with_engine(|engine| engine.run_module(name)).await.map(drop),
        Program::Repl => {
            let engine = engine.into_inner().context("engine is still in use")?;
            return start_repl(engine);
        }
    };

    let failed = match outcome {
        Ok(()) => false,
        Err(err) => {
            report(&err);
            true
        }
    };

    if cli.interactive {
        let engine = engine.into_inner().context("engine is still in use")?;
        return start_repl(engine);
    }
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// `--dis` and `--dry-run`: compile the program without running it.
fn compile_only(cli: &Cli, config: EngineConfig) -> Result<ExitCode> {
    let filename = config.filename.clone();
    let engine = Engine::new(config);
    let source = match cli.program() {
        Program::Script(path) => {
            std::fs::read_to_string(path).with_context(|| format!("can't open file '{}'", path.display()))?
        }
        Program::Eval(code) => code.to_string(),
        Program::Module(_) | Program::Repl => bail!("--dis and --dry-run need a script or -e CODE"),
    };
    match engine.compile(&source, &filename) {
        Ok(code) => {
            if cli.dis {
                print!("{}", disassemble(&code));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            report(&err);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn start_repl(engine: Engine) -> Result<ExitCode> {
    let mut repl = repl::Repl::new(engine).context("failed to initialize REPL")?;
    repl.run().context("REPL error")?;
    Ok(ExitCode::SUCCESS)
}

/// Prints an uncaught error the way the REPL does.
pub(crate) fn report(err: &Error) {
    match err {
        Error::Exception { message, .. } => {
            eprintln!("{}", "Traceback (most recent call last):".dimmed());
            eprintln!("{}", message.red());
        }
        Error::Syntax(_) | Error::Compile(_) => eprintln!("{}", err.to_string().red()),
        Error::Io { .. } => eprintln!("{}: {}", "error".red().bold(), err),
        Error::Internal(_) => eprintln!("{}: {}", "fatal".red().bold(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script_with_args() {
        let cli = Cli::try_parse_from(["protopy", "prog.py", "-x", "1"]).unwrap();
        assert_eq!(cli.script.as_deref(), Some(Path::new("prog.py")));
        assert_eq!(cli.args, vec!["-x", "1"]);
        let config = cli.config();
        assert_eq!(config.argv, vec!["prog.py", "-x", "1"]);
        assert_eq!(config.search_paths[0], PathBuf::from("."));
    }

    #[test]
    fn test_parse_eval() {
        let cli = Cli::try_parse_from(["protopy", "-e", "1 + 1"]).unwrap();
        assert!(matches!(cli.program(), Program::Eval("1 + 1")));
        assert_eq!(cli.config().filename, "<string>");
    }

    #[test]
    fn test_eval_conflicts_with_module() {
        assert!(Cli::try_parse_from(["protopy", "-e", "1", "-m", "pkg"]).is_err());
    }

    #[test]
    fn test_repeated_path() {
        let cli = Cli::try_parse_from(["protopy", "-p", "lib", "--path", "vendor", "-m", "tool"]).unwrap();
        let config = cli.config();
        assert_eq!(config.search_paths, vec![PathBuf::from("."), PathBuf::from("lib"), PathBuf::from("vendor")]);
        assert_eq!(config.argv, vec!["tool"]);
    }

    #[test]
    fn test_no_arguments_is_repl() {
        let cli = Cli::try_parse_from(["protopy"]).unwrap();
        assert!(matches!(cli.program(), Program::Repl));
    }
}
