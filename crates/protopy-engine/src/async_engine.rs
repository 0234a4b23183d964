//! Asynchronous and parallel front ends.
//!
//! [`AsyncEngine`] wraps an [`Engine`] behind a `tokio` lock so source files
//! can be read without blocking the runtime. [`ParallelCompiler`] parses and
//! compiles independent modules on a `rayon` pool.
//!
//! # Example
//!
//! ```ignore
//! use protopy_engine::{AsyncEngine, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = AsyncEngine::new(EngineConfig::default());
//!     let result = engine.eval_file("script.py").await.unwrap();
//! }
//! ```

#[cfg(feature = "async")]
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "async")]
use tokio::fs;
#[cfg(feature = "async")]
use tokio::sync::Mutex;

use crate::compiler::{self, CodeObject};
use crate::parser::Parser;
#[cfg(feature = "async")]
use crate::runtime::Value;
#[cfg(feature = "async")]
use crate::{Engine, EngineConfig};
use crate::Error;

/// An engine whose file I/O is asynchronous.
///
/// Execution itself stays synchronous and holds the lock for its duration,
/// so evaluations never interleave.
#[cfg(feature = "async")]
pub struct AsyncEngine {
    engine: Arc<Mutex<Engine>>,
}

#[cfg(feature = "async")]
impl AsyncEngine {
    /// Creates an async engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: Arc::new(Mutex::new(Engine::new(config))),
        }
    }

    /// Evaluates module source in the shared `__main__` namespace.
    pub async fn eval(&self, source: &str) -> Result<Value, Error> {
        self.engine.lock().await.eval(source)
    }

    /// Reads a file with `tokio::fs` and evaluates it.
    pub async fn eval_file(&self, path: impl AsRef<Path>) -> Result<Value, Error> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).await.map_err(|err| Error::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let code = compile(&source, &path.display().to_string())?;
        let mut engine = self.engine.lock().await;
        engine.globals().set("__file__", Value::from(path.display().to_string().as_str()));
        engine.run_code(code)
    }

    /// Evaluates several files. Reads overlap; execution happens in the
    /// order the reads finish. Results come back in argument order.
    pub async fn eval_files(&self, paths: &[impl AsRef<Path>]) -> Vec<Result<Value, Error>> {
        let pending: Vec<_> = paths.iter().map(|path| self.eval_file(path)).collect();
        futures::future::join_all(pending).await
    }

    /// Runs `f` with exclusive access to the wrapped engine.
    pub async fn with_engine<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        let mut engine = self.engine.lock().await;
        f(&mut engine)
    }

    /// Unwraps the engine. `None` while an evaluation is still borrowing it.
    pub fn into_inner(self) -> Option<Engine> {
        Arc::try_unwrap(self.engine).ok().map(Mutex::into_inner)
    }
}

#[cfg(feature = "async")]
impl Default for AsyncEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn compile(source: &str, filename: &str) -> Result<Arc<CodeObject>, Error> {
    let module = Parser::new(source).parse_module()?;
    Ok(compiler::compile_module_checked(&module, filename)?)
}

/// Compiles independent modules in parallel.
#[cfg(feature = "parallel")]
pub struct ParallelCompiler {
    pool: Option<rayon::ThreadPool>,
}

#[cfg(feature = "parallel")]
impl ParallelCompiler {
    /// Uses the global `rayon` pool.
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Uses a dedicated pool of `num_threads` threads.
    pub fn with_threads(num_threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(num_threads).build()?;
        Ok(Self { pool: Some(pool) })
    }

    /// Compiles `(filename, source)` pairs. Results are in input order.
    pub fn compile_all(&self, sources: &[(&str, &str)]) -> Vec<Result<Arc<CodeObject>, Error>> {
        use rayon::prelude::*;

        let run = || {
            sources
                .par_iter()
                .map(|(filename, source)| compile(source, filename))
                .collect()
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

#[cfg(feature = "parallel")]
impl Default for ParallelCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "async"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_async_eval() {
        let engine = AsyncEngine::default();
        let result = engine.eval("1 + 2").await.unwrap();
        assert!(matches!(result, Value::Int(3)));
    }

    #[tokio::test]
    async fn test_async_eval_shares_namespace() {
        let engine = AsyncEngine::default();
        engine.eval("greeting = 'hello'").await.unwrap();
        let result = engine.eval("greeting + ' world'").await.unwrap();
        assert!(matches!(result, Value::Str(s) if &*s == "hello world"));
    }

    #[tokio::test]
    async fn test_eval_files() {
        let dir = std::env::temp_dir().join(format!("protopy-async-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let first = dir.join("first.py");
        let second = dir.join("second.py");
        std::fs::write(&first, "a = 1\na").unwrap();
        std::fs::write(&second, "raise ValueError('nope')").unwrap();

        let engine = AsyncEngine::default();
        let results = engine.eval_files(&[&first, &second]).await;
        assert!(matches!(results[0], Ok(Value::Int(1))));
        assert!(results[1].as_ref().unwrap_err().to_string().contains("ValueError: nope"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_eval_missing_file() {
        let engine = AsyncEngine::default();
        let err = engine.eval_file("/no/such/file.py").await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_compile() {
        let compiler = ParallelCompiler::with_threads(2).unwrap();
        let results = compiler.compile_all(&[("a.py", "x = 1\n"), ("b.py", "def f(:\n"), ("c.py", "y = [i for i in x]\n")]);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Syntax(_))));
        assert_eq!(&*results[2].as_ref().unwrap().filename, "c.py");
    }
}
