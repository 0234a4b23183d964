//! Module resolution and loading.
//!
//! A dotted name is imported one component at a time. Each component is
//! found in this order:
//!
//! 1. the native modules (`asyncio`, `time`, `_thread`, `sys`, `math`);
//! 2. the module cache shared by every interpreter of an engine;
//! 3. `<dir>/<name>.py` or `<dir>/<name>/__init__.py`, where `<dir>` runs
//!    over the configured search paths for a top-level module and over the
//!    parent package's `__path__` for a submodule.
//!
//! A module is cached before its body runs, so an import cycle sees the
//! partially initialised module instead of recursing. If the body raises,
//! the entry is removed again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::{Vm, VmError, VmResult};
use crate::builtins::{self, ExceptionKind};
use crate::compiler;
use crate::parser::Parser;
use crate::runtime::object::ObjectKind;
use crate::runtime::{Namespace, Value};

impl Vm {
    /// `IMPORT_NAME`: imports `name` relative to the module owning
    /// `globals` and returns what the import statement binds. That is the
    /// top-level package for `import a.b` and the named module itself when
    /// `fromlist` is non-empty.
    pub fn import_name(&mut self, name: &str, fromlist: &Value, level: i64, globals: &Namespace) -> VmResult<Value> {
        let absolute = if level > 0 {
            self.resolve_relative(name, level, globals)?
        } else {
            name.to_string()
        };
        if absolute.is_empty() {
            return Err(self.value_error("Empty module name"));
        }

        let mut module = Value::None;
        let mut top = Value::None;
        let mut path = String::new();
        for (i, part) in absolute.split('.').enumerate() {
            let parent = module.clone();
            if i > 0 {
                path.push('.');
            }
            path.push_str(part);
            module = self.load_module(&path, &parent)?;
            if i == 0 {
                top = module.clone();
            } else if let Some(namespace) = module_namespace(&parent) {
                namespace.set(part, module.clone());
            }
        }

        let fromlist = if fromlist.is_none() { Vec::new() } else { self.collect(fromlist)? };
        if fromlist.is_empty() {
            return Ok(if level > 0 { module } else { top });
        }
        if is_package(&module) {
            for entry in &fromlist {
                let entry = match entry.as_str() {
                    Some(entry) if entry != "*" => entry.to_string(),
                    _ => continue,
                };
                if self.lookup_attr(&module, &entry)?.is_some() {
                    continue;
                }
                let full = format!("{}.{}", absolute, entry);
                match self.load_module(&full, &module) {
                    Ok(submodule) => {
                        if let Some(namespace) = module_namespace(&module) {
                            namespace.set(entry, submodule);
                        }
                    }
                    Err(VmError::Exception(exc)) if self.exception_is(&exc, ExceptionKind::ModuleNotFoundError) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(module)
    }

    /// The absolute name of `from <dots><name> import ...`.
    fn resolve_relative(&mut self, name: &str, level: i64, globals: &Namespace) -> VmResult<String> {
        let package = match globals.get("__package__") {
            Some(Value::Str(package)) => package.to_string(),
            _ => {
                let module = globals.get("__name__").and_then(|n| n.as_str().map(str::to_string));
                match (module, globals.contains("__path__")) {
                    (Some(module), true) => module,
                    (Some(module), false) => match module.rfind('.') {
                        Some(dot) => module[..dot].to_string(),
                        None => String::new(),
                    },
                    (None, _) => String::new(),
                }
            }
        };
        if package.is_empty() {
            return Err(self.error(
                ExceptionKind::ImportError,
                "attempted relative import with no known parent package",
            ));
        }
        let mut base = package.as_str();
        for _ in 1..level {
            match base.rfind('.') {
                Some(dot) => base = &base[..dot],
                None => {
                    return Err(self.error(
                        ExceptionKind::ImportError,
                        "attempted relative import beyond top-level package",
                    ));
                }
            }
        }
        Ok(if name.is_empty() {
            base.to_string()
        } else {
            format!("{}.{}", base, name)
        })
    }

    /// Loads one module by its full dotted name, `parent` being the
    /// already-loaded package above it (or `None`).
    fn load_module(&mut self, full: &str, parent: &Value) -> VmResult<Value> {
        if let Some(module) = builtins::modules::load(self, full) {
            return Ok(module);
        }
        if let Some(module) = self.modules.get(full) {
            return Ok(module);
        }

        let search: Vec<PathBuf> = if parent.is_none() {
            self.config.search_paths.clone()
        } else {
            package_dirs(parent)
        };
        let leaf = full.rsplit('.').next().unwrap_or(full);
        let found = search.iter().find_map(|dir| locate(dir, leaf));
        let (file, package_dir) = match found {
            Some(found) => found,
            None => {
                return Err(self.error(ExceptionKind::ModuleNotFoundError, format!("No module named '{}'", full)));
            }
        };
        debug!(module = full, path = %file.display(), "import");

        let source = match std::fs::read_to_string(&file) {
            Ok(source) => source,
            Err(err) => {
                return Err(self.error(
                    ExceptionKind::ImportError,
                    format!("cannot read '{}': {}", file.display(), err),
                ));
            }
        };
        let filename = file.display().to_string();
        let code = self.compile_source(&source, &filename)?;

        let globals = self.new_globals(full);
        globals.set("__file__", Value::from(filename.as_str()));
        match &package_dir {
            Some(dir) => {
                globals.set("__package__", Value::from(full));
                let path = self.new_list(vec![Value::from(dir.display().to_string())]);
                globals.set("__path__", path);
            }
            None => {
                let package = full.rsplit_once('.').map(|(p, _)| p).unwrap_or("");
                globals.set("__package__", Value::from(package));
            }
        }
        let module = self.new_module(full, globals.clone(), Some(file));
        self.modules.set(full, module.clone());
        if let Err(err) = self.run_module_code(code, globals) {
            self.modules.remove(full);
            return Err(err);
        }
        debug!(module = full, "import complete");
        Ok(module)
    }

    /// Parses and compiles module source, reporting failures as
    /// `SyntaxError`.
    pub(crate) fn compile_source(&mut self, source: &str, filename: &str) -> VmResult<Arc<compiler::CodeObject>> {
        let module = match Parser::new(source).parse_module() {
            Ok(module) => module,
            Err(err) => return Err(self.error(ExceptionKind::SyntaxError, format!("{} ({})", err, filename))),
        };
        compiler::compile_module_checked(&module, filename)
            .map_err(|err| self.error(ExceptionKind::SyntaxError, format!("{} ({})", err, filename)))
    }

    /// Runs module `name` as the main program in `globals` (`python -m`).
    /// Parent packages are imported normally; the module itself is not
    /// cached, and a package runs its `__main__.py`.
    pub fn run_main_module(&mut self, name: &str, globals: &Namespace) -> VmResult<Value> {
        let (parent_name, leaf) = match name.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, name),
        };
        let search = match parent_name {
            Some(parent) => {
                let fromlist = self.new_tuple(vec![Value::from("*")]);
                let package = self.import_name(parent, &fromlist, 0, globals)?;
                package_dirs(&package)
            }
            None => self.config.search_paths.clone(),
        };
        let file = match search.iter().find_map(|dir| locate(dir, leaf)) {
            Some((_, Some(package_dir))) => {
                let main = package_dir.join("__main__.py");
                if !main.is_file() {
                    return Err(self.error(
                        ExceptionKind::ImportError,
                        format!("No module named {}.__main__; '{}' is a package and cannot be directly executed", name, name),
                    ));
                }
                main
            }
            Some((file, None)) => file,
            None => {
                return Err(self.error(ExceptionKind::ModuleNotFoundError, format!("No module named '{}'", name)));
            }
        };
        let source = std::fs::read_to_string(&file).map_err(|err| {
            self.error(ExceptionKind::ImportError, format!("cannot read '{}': {}", file.display(), err))
        })?;
        let filename = file.display().to_string();
        let code = self.compile_source(&source, &filename)?;
        globals.set("__file__", Value::from(filename.as_str()));
        globals.set("__package__", Value::from(parent_name.unwrap_or("")));
        debug!(module = name, path = %filename, "run as __main__");
        self.run_module_code(code, globals.clone())
    }

    /// Parses and compiles a lone expression for `eval`.
    pub(crate) fn compile_expression_source(
        &mut self,
        source: &str,
        filename: &str,
    ) -> VmResult<Arc<compiler::CodeObject>> {
        let expr = match Parser::new(source).parse_expression_source() {
            Ok(expr) => expr,
            Err(err) => return Err(self.error(ExceptionKind::SyntaxError, format!("{} ({})", err, filename))),
        };
        compiler::compile_expression_checked(&expr, filename)
            .map_err(|err| self.error(ExceptionKind::SyntaxError, format!("{} ({})", err, filename)))
    }

    /// `IMPORT_FROM`: `from module import name`.
    pub fn import_from(&mut self, module: &Value, name: &str) -> VmResult<Value> {
        if let Some(value) = self.lookup_attr(module, name)? {
            return Ok(value);
        }
        let module_name = module_name(module).unwrap_or_else(|| "<unknown module name>".to_string());
        if is_package(module) {
            let full = format!("{}.{}", module_name, name);
            if let Ok(submodule) = self.load_module(&full, module) {
                return Ok(submodule);
            }
        }
        Err(self.error(
            ExceptionKind::ImportError,
            format!("cannot import name '{}' from '{}'", name, module_name),
        ))
    }

    /// `IMPORT_STAR`: binds the module's `__all__`, or its public names,
    /// in `target`.
    pub fn import_star(&mut self, module: &Value, target: &Namespace) -> VmResult<()> {
        let namespace = match module_namespace(module) {
            Some(namespace) => namespace,
            None => return Err(self.type_error("import * expects a module")),
        };
        match namespace.get("__all__") {
            Some(all) => {
                for name in self.collect(&all)? {
                    let name = match name.as_str() {
                        Some(name) => name.to_string(),
                        None => {
                            let type_name = self.type_name(&name);
                            return Err(self.type_error(format!(
                                "Item in __all__ must be str, not {}",
                                type_name
                            )));
                        }
                    };
                    let value = self.import_from(module, &name)?;
                    target.set(name, value);
                }
            }
            None => {
                for (name, value) in namespace.snapshot() {
                    if !name.starts_with('_') {
                        target.set(name, value);
                    }
                }
            }
        }
        Ok(())
    }
}

/// `<dir>/<name>.py`, or `<dir>/<name>/__init__.py` together with the
/// package directory.
fn locate(dir: &Path, name: &str) -> Option<(PathBuf, Option<PathBuf>)> {
    let package = dir.join(name);
    let init = package.join("__init__.py");
    if init.is_file() {
        return Some((init, Some(package)));
    }
    let file = dir.join(format!("{}.py", name));
    file.is_file().then_some((file, None))
}

fn module_namespace(module: &Value) -> Option<Namespace> {
    match module {
        Value::Object(obj) => match &obj.read().kind {
            ObjectKind::Module(module) => Some(module.namespace.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn module_name(module: &Value) -> Option<String> {
    match module {
        Value::Object(obj) => match &obj.read().kind {
            ObjectKind::Module(module) => Some(module.name.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn is_package(module: &Value) -> bool {
    module_namespace(module).is_some_and(|ns| ns.contains("__path__"))
}

/// The directories listed in a package's `__path__`.
fn package_dirs(package: &Value) -> Vec<PathBuf> {
    let path = match module_namespace(package).and_then(|ns| ns.get("__path__")) {
        Some(Value::Object(list)) => list,
        _ => return Vec::new(),
    };
    let guard = path.read();
    match &guard.kind {
        ObjectKind::List(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(PathBuf::from))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("protopy-import-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn run_in(dir: &Path, source: &str) -> (Vm, VmResult<Value>, Namespace) {
        let config = EngineConfig::default().with_search_path(dir);
        let mut vm = Vm::new(config);
        let globals = vm.new_globals("__main__");
        let code = vm.compile_source(source, "<test>").unwrap();
        let result = vm.run_module_code(code, globals.clone());
        (vm, result, globals)
    }

    #[test]
    fn test_module_runs_once() {
        let dir = scratch_dir("once");
        std::fs::write(dir.join("counter.py"), "hits = []\nhits.append(1)\n").unwrap();
        let (_, result, globals) = run_in(&dir, "import counter\nimport counter as again\nn = len(again.hits)\n");
        assert!(result.is_ok());
        assert!(matches!(globals.get("n"), Some(Value::Int(1))));
    }

    #[test]
    fn test_package_and_relative_import() {
        let dir = scratch_dir("pkg");
        std::fs::create_dir_all(dir.join("pkg")).unwrap();
        std::fs::write(dir.join("pkg").join("__init__.py"), "from .helpers import double\n").unwrap();
        std::fs::write(dir.join("pkg").join("helpers.py"), "def double(x):\n    return x * 2\n").unwrap();
        let (_, result, globals) = run_in(&dir, "import pkg.helpers\nfrom pkg import double\nr = double(4) + pkg.helpers.double(1)\n");
        assert!(result.is_ok());
        assert!(matches!(globals.get("r"), Some(Value::Int(10))));
    }

    #[test]
    fn test_missing_module() {
        let dir = scratch_dir("missing");
        let (mut vm, result, _) = run_in(&dir, "import nowhere\n");
        match result {
            Err(VmError::Exception(exc)) => {
                assert_eq!(vm.describe_exception(&exc), "ModuleNotFoundError: No module named 'nowhere'")
            }
            _ => panic!("expected ModuleNotFoundError"),
        }
    }

    #[test]
    fn test_failed_import_is_not_cached() {
        let dir = scratch_dir("failing");
        std::fs::write(dir.join("broken.py"), "x = 1 / 0\n").unwrap();
        let (vm, result, _) = run_in(&dir, "import broken\n");
        assert!(result.is_err());
        assert!(!vm.modules.contains("broken"));
    }

    #[test]
    fn test_import_star_respects_all() {
        let dir = scratch_dir("star");
        std::fs::write(dir.join("shapes.py"), "__all__ = ['a']\na = 1\nb = 2\n_c = 3\n").unwrap();
        let (_, result, globals) = run_in(&dir, "from shapes import *\n");
        assert!(result.is_ok());
        assert!(globals.contains("a"));
        assert!(!globals.contains("b"));
    }

    #[test]
    fn test_cannot_import_name() {
        let dir = scratch_dir("name");
        std::fs::write(dir.join("plain.py"), "a = 1\n").unwrap();
        let (mut vm, result, _) = run_in(&dir, "from plain import b\n");
        match result {
            Err(VmError::Exception(exc)) => assert_eq!(
                vm.describe_exception(&exc),
                "ImportError: cannot import name 'b' from 'plain'"
            ),
            _ => panic!("expected ImportError"),
        }
    }
}
