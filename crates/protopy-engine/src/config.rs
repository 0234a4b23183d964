//! Engine configuration.

use std::path::PathBuf;

/// Environment variable listing module search directories.
pub const PATH_ENV: &str = "PROTOPY_PATH";

/// Environment variable overriding the recursion limit.
pub const RECURSION_LIMIT_ENV: &str = "PROTOPY_RECURSION_LIMIT";

/// Default maximum call depth.
pub const DEFAULT_RECURSION_LIMIT: usize = 1000;

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directories searched for `<name>.py` and `<name>/__init__.py`
    pub search_paths: Vec<PathBuf>,

    /// Maximum call depth before `RecursionError`
    pub recursion_limit: usize,

    /// Emit a `trace!` event per executed instruction
    pub trace_execution: bool,

    /// Filename reported for source evaluated without one
    pub filename: String,

    /// `sys.argv`
    pub argv: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            trace_execution: false,
            filename: "<module>".to_string(),
            argv: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Defaults, overridden by `PROTOPY_PATH` and `PROTOPY_RECURSION_LIMIT`.
    ///
    /// An unparsable recursion limit is ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(paths) = std::env::var_os(PATH_ENV) {
            config.search_paths.extend(std::env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()));
        }
        if let Some(limit) = std::env::var(RECURSION_LIMIT_ENV).ok().and_then(|v| v.trim().parse().ok()) {
            config.recursion_limit = limit;
        }
        config
    }

    /// Appends a module search directory.
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Appends several module search directories.
    pub fn with_search_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Sets the recursion limit.
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Turns per-instruction tracing on or off.
    pub fn with_trace_execution(mut self, enabled: bool) -> Self {
        self.trace_execution = enabled;
        self
    }

    /// Sets the default filename.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Sets `sys.argv`.
    pub fn with_argv(mut self, argv: Vec<String>) -> Self {
        self.argv = argv;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.recursion_limit, 1000);
        assert_eq!(config.filename, "<module>");
        assert!(config.search_paths.is_empty());
        assert!(!config.trace_execution);
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_search_path("lib")
            .with_search_paths(["a", "b"])
            .with_recursion_limit(50)
            .with_trace_execution(true)
            .with_argv(vec!["prog.py".into()]);
        assert_eq!(config.search_paths, vec![PathBuf::from("lib"), PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(config.recursion_limit, 50);
        assert!(config.trace_execution);
        assert_eq!(config.argv, vec!["prog.py".to_string()]);
    }
}
