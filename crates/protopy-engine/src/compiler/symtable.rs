//! Scope analysis.
//!
//! Runs before code generation. Every function-like body (function, lambda,
//! comprehension), class body and the module gets a [`Scope`] that classifies
//! each identifier it mentions exactly once:
//!
//! - `Global`: module namespace (explicit `global`, or never bound in any
//!   enclosing function)
//! - `Deref`: bound in an enclosing function scope and read through the
//!   closure environment
//! - `Fast(slot)`: local in a numbered slot
//! - `Name`: local in the frame's name bag
//!
//! A function-like scope uses slots only when it has no dynamic locals
//! access (`locals`, `vars`, `exec`, `eval`) and none of its locals is
//! captured by a nested scope. The decision covers the whole scope.

use std::rc::Rc;

use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};

use super::code::CodeFlags;
use super::error::{CompileError, CompileErrorKind, CompileResult};
use crate::ast::*;

/// Kind of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Module top level
    Module,
    /// `def` / `async def`
    Function,
    /// `lambda`
    Lambda,
    /// List, set, dict or generator comprehension
    Comprehension,
    /// Class body
    Class,
}

impl ScopeKind {
    fn is_function_like(self) -> bool {
        matches!(self, ScopeKind::Function | ScopeKind::Lambda | ScopeKind::Comprehension)
    }
}

/// How an identifier is accessed in a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameAccess {
    /// Local slot
    Fast(u32),
    /// Name bag of the current frame
    Name,
    /// Module globals (then builtins)
    Global,
    /// Enclosing function environments
    Deref,
}

/// Names that make a scope fall back to name-bag locals when called.
const DYNAMIC_LOCALS: [&str; 4] = ["locals", "vars", "exec", "eval"];

/// Parameter name of a comprehension's source iterator.
pub const COMPREHENSION_ITER: &str = ".0";

/// The analyzed scope of one compiled unit.
#[derive(Debug)]
pub struct Scope {
    /// What kind of body this is
    pub kind: ScopeKind,
    /// Display name
    pub name: String,
    /// Dotted qualified name
    pub qualname: String,
    symbols: FxHashMap<String, NameAccess>,
    varnames: Vec<String>,
    argcount: u32,
    kwonlyargcount: u32,
    flags: CodeFlags,
    freevars: Vec<String>,
    cellvars: Vec<String>,
    children: FxHashMap<ScopeKey, Rc<Scope>>,
}

/// Identifies the AST node that owns a nested scope.
type ScopeKey = (usize, ScopeKind);

fn key_of<T>(node: &T, kind: ScopeKind) -> ScopeKey {
    (node as *const T as usize, kind)
}

impl Scope {
    /// An empty module scope.
    pub fn module() -> Scope {
        Builder::seal(RawScope::new(
            ScopeKind::Module,
            (0, ScopeKind::Module),
            "<module>".into(),
            String::new(),
            None,
        ))
    }

    /// Looks up how `name` is accessed here.
    pub fn access(&self, name: &str) -> NameAccess {
        if let Some(access) = self.symbols.get(name) {
            return *access;
        }
        match self.kind {
            ScopeKind::Module | ScopeKind::Class => NameAccess::Name,
            _ => NameAccess::Global,
        }
    }

    /// The scope of the function defined by `def`.
    pub fn function(&self, def: &FunctionDef) -> Option<Rc<Scope>> {
        self.children.get(&key_of(def, ScopeKind::Function)).cloned()
    }

    /// The scope of a lambda.
    pub fn lambda(&self, lambda: &LambdaExpression) -> Option<Rc<Scope>> {
        self.children.get(&key_of(lambda, ScopeKind::Lambda)).cloned()
    }

    /// The scope of a class body.
    pub fn class(&self, class: &ClassDef) -> Option<Rc<Scope>> {
        self.children.get(&key_of(class, ScopeKind::Class)).cloned()
    }

    /// The scope of a list, set or generator comprehension.
    pub fn comprehension(&self, comp: &Comprehension) -> Option<Rc<Scope>> {
        self.children.get(&key_of(comp, ScopeKind::Comprehension)).cloned()
    }

    /// The scope of a dict comprehension.
    pub fn dict_comprehension(&self, comp: &DictComprehension) -> Option<Rc<Scope>> {
        self.children.get(&key_of(comp, ScopeKind::Comprehension)).cloned()
    }

    /// Local names; with slots, index `i` names slot `i`.
    pub fn varnames(&self) -> &[String] {
        &self.varnames
    }

    /// Number of positional parameters.
    pub fn argcount(&self) -> u32 {
        self.argcount
    }

    /// Number of keyword-only parameters.
    pub fn kwonlyargcount(&self) -> u32 {
        self.kwonlyargcount
    }

    /// Code flags implied by the analysis.
    pub fn flags(&self) -> CodeFlags {
        self.flags
    }

    /// Returns true if locals live in slots.
    pub fn uses_slots(&self) -> bool {
        self.flags.contains(CodeFlags::SLOTS)
    }

    /// Returns true if the body contains `yield`.
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    /// Returns true if the body belongs to an `async def`.
    pub fn is_coroutine(&self) -> bool {
        self.flags.contains(CodeFlags::COROUTINE)
    }

    /// Names read from enclosing function scopes (including names passed
    /// through to nested scopes).
    pub fn freevars(&self) -> &[String] {
        &self.freevars
    }

    /// Own locals captured by nested scopes.
    pub fn cellvars(&self) -> &[String] {
        &self.cellvars
    }
}

/// Builds the scope tree of a module.
pub fn analyze_module(module: &Module) -> CompileResult<Rc<Scope>> {
    let mut builder = Builder::new();
    builder.visit_body(&module.body)?;
    builder.finish()
}

/// Builds the scope tree of a standalone expression (eval mode).
pub fn analyze_expression(expr: &Expression) -> CompileResult<Rc<Scope>> {
    let mut builder = Builder::new();
    builder.visit_expr(expr)?;
    builder.finish()
}

// ============================================================================
// Collection
// ============================================================================

#[derive(Debug)]
struct RawScope {
    kind: ScopeKind,
    key: ScopeKey,
    name: String,
    qualname: String,
    parent: Option<usize>,
    params: Vec<String>,
    kwonly: Vec<String>,
    has_varargs: bool,
    has_varkw: bool,
    globals: FxHashSet<String>,
    nonlocals: FxHashMap<String, Position>,
    /// Names a comprehension binds in its enclosing function via `:=`
    walrus: FxHashSet<String>,
    bound: IndexSet<String>,
    used: IndexSet<String>,
    generator: bool,
    coroutine: bool,
    dynamic_locals: bool,
    free: IndexSet<String>,
    captured: IndexSet<String>,
    symbols: FxHashMap<String, NameAccess>,
}

impl RawScope {
    fn new(kind: ScopeKind, key: ScopeKey, name: String, qualname: String, parent: Option<usize>) -> Self {
        Self {
            kind,
            key,
            name,
            qualname,
            parent,
            params: Vec::new(),
            kwonly: Vec::new(),
            has_varargs: false,
            has_varkw: false,
            globals: FxHashSet::default(),
            nonlocals: FxHashMap::default(),
            walrus: FxHashSet::default(),
            bound: IndexSet::new(),
            used: IndexSet::new(),
            generator: false,
            coroutine: false,
            dynamic_locals: false,
            free: IndexSet::new(),
            captured: IndexSet::new(),
            symbols: FxHashMap::default(),
        }
    }

    /// Binds a parameter name. Parameters always come first in `bound`.
    fn bind_param(&mut self, name: &str) {
        self.bound.insert(name.to_string());
    }

    /// Returns true if `name` is a local of this scope.
    fn binds(&self, name: &str) -> bool {
        self.bound.contains(name) && !self.globals.contains(name) && !self.nonlocals.contains_key(name)
    }
}

struct Builder {
    scopes: Vec<RawScope>,
    current: usize,
}

impl Builder {
    fn new() -> Self {
        let module = RawScope::new(
            ScopeKind::Module,
            (0, ScopeKind::Module),
            "<module>".into(),
            String::new(),
            None,
        );
        Self {
            scopes: vec![module],
            current: 0,
        }
    }

    fn scope(&mut self) -> &mut RawScope {
        &mut self.scopes[self.current]
    }

    fn enter(&mut self, kind: ScopeKind, key: ScopeKey, name: &str) -> usize {
        let parent = &self.scopes[self.current];
        let prefix = match parent.kind {
            ScopeKind::Module => String::new(),
            ScopeKind::Class => format!("{}.", parent.qualname),
            _ => format!("{}.<locals>.", parent.qualname),
        };
        let qualname = format!("{}{}", prefix, name);
        let index = self.scopes.len();
        self.scopes.push(RawScope::new(kind, key, name.to_string(), qualname, Some(self.current)));
        self.current = index;
        index
    }

    fn leave(&mut self, previous: usize) {
        self.current = previous;
    }

    fn bind(&mut self, name: &str) {
        self.scope().bound.insert(name.to_string());
    }

    fn use_name(&mut self, name: &str) {
        self.scope().used.insert(name.to_string());
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn visit_body(&mut self, body: &[Statement]) -> CompileResult<()> {
        body.iter().try_for_each(|stmt| self.visit_stmt(stmt))
    }

    fn visit_stmt(&mut self, stmt: &Statement) -> CompileResult<()> {
        match &stmt.kind {
            StatementKind::Expression(expr) => self.visit_expr(expr),
            StatementKind::Assign(assign) => {
                self.visit_expr(&assign.value)?;
                assign.targets.iter().try_for_each(|t| self.visit_target(t))
            }
            StatementKind::AugAssign(aug) => {
                self.visit_expr(&aug.value)?;
                if let ExpressionKind::Name(name) = &aug.target.kind {
                    self.use_name(name);
                }
                self.visit_target(&aug.target)
            }
            StatementKind::AnnAssign(ann) => {
                if let Some(value) = &ann.value {
                    self.visit_expr(value)?;
                    self.visit_target(&ann.target)?;
                } else if !matches!(ann.target.kind, ExpressionKind::Name(_)) {
                    self.visit_expr(&ann.target)?;
                }
                Ok(())
            }
            StatementKind::If(if_stmt) => {
                self.visit_expr(&if_stmt.test)?;
                self.visit_body(&if_stmt.body)?;
                self.visit_body(&if_stmt.orelse)
            }
            StatementKind::While(while_stmt) => {
                self.visit_expr(&while_stmt.test)?;
                self.visit_body(&while_stmt.body)?;
                self.visit_body(&while_stmt.orelse)
            }
            StatementKind::For(for_stmt) => {
                if for_stmt.is_async {
                    self.require_coroutine("async for", stmt.pos)?;
                }
                self.visit_expr(&for_stmt.iter)?;
                self.visit_target(&for_stmt.target)?;
                self.visit_body(&for_stmt.body)?;
                self.visit_body(&for_stmt.orelse)
            }
            StatementKind::Break | StatementKind::Continue | StatementKind::Pass => Ok(()),
            StatementKind::Return(value) => match value {
                Some(value) => self.visit_expr(value),
                None => Ok(()),
            },
            StatementKind::FunctionDef(def) => self.visit_function_def(def, stmt.pos),
            StatementKind::ClassDef(class) => self.visit_class_def(class),
            StatementKind::Try(try_stmt) => {
                self.visit_body(&try_stmt.body)?;
                for handler in &try_stmt.handlers {
                    if let Some(kind) = &handler.kind {
                        self.visit_expr(kind)?;
                    }
                    if let Some(name) = &handler.name {
                        self.bind(name);
                    }
                    self.visit_body(&handler.body)?;
                }
                self.visit_body(&try_stmt.orelse)?;
                self.visit_body(&try_stmt.finalbody)
            }
            StatementKind::Raise(raise) => {
                if let Some(exc) = &raise.exc {
                    self.visit_expr(exc)?;
                }
                if let Some(cause) = &raise.cause {
                    self.visit_expr(cause)?;
                }
                Ok(())
            }
            StatementKind::With(with) => {
                if with.is_async {
                    self.require_coroutine("async with", stmt.pos)?;
                }
                for item in &with.items {
                    self.visit_expr(&item.context)?;
                    if let Some(target) = &item.target {
                        self.visit_target(target)?;
                    }
                }
                self.visit_body(&with.body)
            }
            StatementKind::Import(aliases) => {
                for alias in aliases {
                    let bound = match &alias.asname {
                        Some(asname) => asname.as_str(),
                        None => alias.name.split('.').next().unwrap_or(&alias.name),
                    };
                    self.bind(bound);
                }
                Ok(())
            }
            StatementKind::ImportFrom(from) => {
                for alias in &from.names {
                    if alias.name == "*" {
                        if self.scope().kind != ScopeKind::Module {
                            return Err(CompileError::new(
                                CompileErrorKind::Unsupported("star imports outside module level"),
                                stmt.pos,
                            ));
                        }
                        continue;
                    }
                    self.bind(alias.asname.as_deref().unwrap_or(&alias.name));
                }
                Ok(())
            }
            StatementKind::Global(names) => {
                for name in names {
                    let scope = self.scope();
                    if scope.nonlocals.contains_key(name) {
                        return Err(CompileError::new(CompileErrorKind::NonlocalAndGlobal(name.clone()), stmt.pos));
                    }
                    if scope.params.contains(name) || scope.kwonly.contains(name) {
                        return Err(CompileError::new(
                            CompileErrorKind::ParameterDeclared(name.clone(), "global"),
                            stmt.pos,
                        ));
                    }
                    scope.globals.insert(name.clone());
                }
                Ok(())
            }
            StatementKind::Nonlocal(names) => {
                if self.scope().kind == ScopeKind::Module {
                    return Err(CompileError::new(CompileErrorKind::NonlocalAtModuleLevel, stmt.pos));
                }
                for name in names {
                    let scope = self.scope();
                    if scope.globals.contains(name) {
                        return Err(CompileError::new(CompileErrorKind::NonlocalAndGlobal(name.clone()), stmt.pos));
                    }
                    if scope.params.contains(name) || scope.kwonly.contains(name) {
                        return Err(CompileError::new(
                            CompileErrorKind::ParameterDeclared(name.clone(), "nonlocal"),
                            stmt.pos,
                        ));
                    }
                    scope.nonlocals.insert(name.clone(), stmt.pos);
                }
                Ok(())
            }
            StatementKind::Delete(targets) => targets.iter().try_for_each(|t| self.visit_target(t)),
            StatementKind::Assert(assert) => {
                self.visit_expr(&assert.test)?;
                if let Some(msg) = &assert.msg {
                    self.visit_expr(msg)?;
                }
                Ok(())
            }
        }
    }

    fn require_coroutine(&self, what: &'static str, pos: Position) -> CompileResult<()> {
        if self.scopes[self.current].coroutine {
            Ok(())
        } else {
            Err(CompileError::new(CompileErrorKind::AsyncOutsideAsyncFunction(what), pos))
        }
    }

    fn visit_function_def(&mut self, def: &FunctionDef, pos: Position) -> CompileResult<()> {
        def.decorators.iter().try_for_each(|d| self.visit_expr(d))?;
        self.visit_defaults(&def.params)?;
        self.bind(&def.name);

        let previous = self.current;
        self.enter(ScopeKind::Function, key_of(def, ScopeKind::Function), &def.name);
        self.declare_params(&def.params);
        self.scope().coroutine = def.is_async;
        self.visit_body(&def.body)?;
        if def.is_async && self.scope().generator {
            return Err(CompileError::new(
                CompileErrorKind::Unsupported("asynchronous generators"),
                pos,
            ));
        }
        self.leave(previous);
        Ok(())
    }

    fn visit_defaults(&mut self, params: &Parameters) -> CompileResult<()> {
        for param in params.args.iter().chain(&params.kwonly) {
            if let Some(default) = &param.default {
                self.visit_expr(default)?;
            }
        }
        Ok(())
    }

    fn declare_params(&mut self, params: &Parameters) {
        let scope = self.scope();
        for param in &params.args {
            scope.params.push(param.name.clone());
            scope.bind_param(&param.name);
        }
        if let Some(vararg) = &params.vararg {
            scope.params.push(vararg.clone());
            scope.has_varargs = true;
            scope.bind_param(vararg);
        }
        if let Some(kwarg) = &params.kwarg {
            scope.params.push(kwarg.clone());
            scope.has_varkw = true;
            scope.bind_param(kwarg);
        }
        for param in &params.kwonly {
            scope.kwonly.push(param.name.clone());
            scope.bind_param(&param.name);
        }
    }

    fn visit_class_def(&mut self, class: &ClassDef) -> CompileResult<()> {
        class.decorators.iter().try_for_each(|d| self.visit_expr(d))?;
        class.bases.iter().try_for_each(|b| self.visit_expr(b))?;
        class.keywords.iter().try_for_each(|k| self.visit_expr(&k.value))?;
        self.bind(&class.name);

        let previous = self.current;
        self.enter(ScopeKind::Class, key_of(class, ScopeKind::Class), &class.name);
        self.visit_body(&class.body)?;
        self.leave(previous);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Visits an assignment or deletion target.
    fn visit_target(&mut self, target: &Expression) -> CompileResult<()> {
        match &target.kind {
            ExpressionKind::Name(name) => {
                self.bind(name);
                Ok(())
            }
            ExpressionKind::Tuple(items) | ExpressionKind::List(items) => {
                items.iter().try_for_each(|item| self.visit_target(item))
            }
            ExpressionKind::Starred(inner) => self.visit_target(inner),
            ExpressionKind::Attribute(attr) => self.visit_expr(&attr.value),
            ExpressionKind::Subscript(sub) => {
                self.visit_expr(&sub.value)?;
                self.visit_expr(&sub.index)
            }
            _ => self.visit_expr(target),
        }
    }

    fn visit_expr(&mut self, expr: &Expression) -> CompileResult<()> {
        match &expr.kind {
            ExpressionKind::Literal(_) => Ok(()),
            ExpressionKind::Name(name) => {
                self.use_name(name);
                Ok(())
            }
            ExpressionKind::BoolOp(op) => op.values.iter().try_for_each(|v| self.visit_expr(v)),
            ExpressionKind::Binary(bin) => {
                self.visit_expr(&bin.left)?;
                self.visit_expr(&bin.right)
            }
            ExpressionKind::Unary(unary) => self.visit_expr(&unary.operand),
            ExpressionKind::Compare(cmp) => {
                self.visit_expr(&cmp.left)?;
                cmp.comparators.iter().try_for_each(|c| self.visit_expr(c))
            }
            ExpressionKind::Call(call) => {
                if let ExpressionKind::Name(name) = &call.func.kind {
                    if DYNAMIC_LOCALS.contains(&name.as_str()) {
                        self.scope().dynamic_locals = true;
                    }
                }
                self.visit_expr(&call.func)?;
                call.args.iter().try_for_each(|a| self.visit_expr(a))?;
                call.keywords.iter().try_for_each(|k| self.visit_expr(&k.value))
            }
            ExpressionKind::Attribute(attr) => self.visit_expr(&attr.value),
            ExpressionKind::Subscript(sub) => {
                self.visit_expr(&sub.value)?;
                self.visit_expr(&sub.index)
            }
            ExpressionKind::Slice(slice) => {
                for part in [&slice.lower, &slice.upper, &slice.step].into_iter().flatten() {
                    self.visit_expr(part)?;
                }
                Ok(())
            }
            ExpressionKind::Starred(inner) => self.visit_expr(inner),
            ExpressionKind::List(items) | ExpressionKind::Tuple(items) | ExpressionKind::Set(items) => {
                items.iter().try_for_each(|item| self.visit_expr(item))
            }
            ExpressionKind::Dict(items) => {
                for item in items {
                    if let Some(key) = &item.key {
                        self.visit_expr(key)?;
                    }
                    self.visit_expr(&item.value)?;
                }
                Ok(())
            }
            ExpressionKind::ListComp(comp) | ExpressionKind::SetComp(comp) => {
                self.visit_comprehension(comp, key_of(comp, ScopeKind::Comprehension), false, expr.pos, |b| {
                    b.visit_expr(&comp.element)
                })
            }
            ExpressionKind::GeneratorExp(comp) => {
                self.visit_comprehension(comp, key_of(comp, ScopeKind::Comprehension), true, expr.pos, |b| {
                    b.visit_expr(&comp.element)
                })
            }
            ExpressionKind::DictComp(comp) => {
                let key = key_of(comp, ScopeKind::Comprehension);
                let generators = &comp.generators;
                self.visit_generators(generators, key, false, expr.pos, "<dictcomp>", |b| {
                    b.visit_expr(&comp.key)?;
                    b.visit_expr(&comp.value)
                })
            }
            ExpressionKind::Conditional(cond) => {
                self.visit_expr(&cond.test)?;
                self.visit_expr(&cond.body)?;
                self.visit_expr(&cond.orelse)
            }
            ExpressionKind::Lambda(lambda) => {
                self.visit_defaults(&lambda.params)?;
                let previous = self.current;
                self.enter(ScopeKind::Lambda, key_of(lambda, ScopeKind::Lambda), "<lambda>");
                self.declare_params(&lambda.params);
                self.visit_expr(&lambda.body)?;
                self.leave(previous);
                Ok(())
            }
            ExpressionKind::Yield(value) => {
                self.mark_generator(expr.pos)?;
                match value {
                    Some(value) => self.visit_expr(value),
                    None => Ok(()),
                }
            }
            ExpressionKind::YieldFrom(value) => {
                self.mark_generator(expr.pos)?;
                self.visit_expr(value)
            }
            ExpressionKind::Await(value) => {
                self.require_coroutine("await", expr.pos)?;
                self.visit_expr(value)
            }
            ExpressionKind::FormattedString(parts) => self.visit_fstring(parts),
            ExpressionKind::NamedExpr(named) => {
                self.visit_expr(&named.value)?;
                self.bind_walrus(&named.target, expr.pos)
            }
        }
    }

    fn visit_fstring(&mut self, parts: &[FStringPart]) -> CompileResult<()> {
        for part in parts {
            if let FStringPart::Field(field) = part {
                self.visit_expr(&field.value)?;
                self.visit_fstring(&field.format_spec)?;
            }
        }
        Ok(())
    }

    fn mark_generator(&mut self, pos: Position) -> CompileResult<()> {
        match self.scope().kind {
            ScopeKind::Module | ScopeKind::Class => {
                Err(CompileError::new(CompileErrorKind::YieldOutsideFunction, pos))
            }
            ScopeKind::Comprehension => Err(CompileError::new(
                CompileErrorKind::Unsupported("'yield' expressions inside comprehensions"),
                pos,
            )),
            ScopeKind::Function | ScopeKind::Lambda => {
                self.scope().generator = true;
                Ok(())
            }
        }
    }

    /// `:=` binds in the nearest enclosing non-comprehension scope.
    fn bind_walrus(&mut self, name: &str, pos: Position) -> CompileResult<()> {
        if self.scope().kind != ScopeKind::Comprehension {
            self.bind(name);
            return Ok(());
        }
        let mut target = self.current;
        while self.scopes[target].kind == ScopeKind::Comprehension {
            self.scopes[target].walrus.insert(name.to_string());
            target = match self.scopes[target].parent {
                Some(parent) => parent,
                None => break,
            };
        }
        if self.scopes[target].kind == ScopeKind::Class {
            return Err(CompileError::new(CompileErrorKind::NamedExprInClassComprehension, pos));
        }
        self.scopes[target].bound.insert(name.to_string());
        Ok(())
    }

    fn visit_comprehension(
        &mut self,
        comp: &Comprehension,
        key: ScopeKey,
        generator: bool,
        pos: Position,
        element: impl FnOnce(&mut Self) -> CompileResult<()>,
    ) -> CompileResult<()> {
        let name = if generator { "<genexpr>" } else { "<listcomp>" };
        self.visit_generators(&comp.generators, key, generator, pos, name, element)
    }

    fn visit_generators(
        &mut self,
        generators: &[ComprehensionFor],
        key: ScopeKey,
        generator: bool,
        pos: Position,
        name: &str,
        element: impl FnOnce(&mut Self) -> CompileResult<()>,
    ) -> CompileResult<()> {
        if generators.iter().any(|g| g.is_async) {
            return Err(CompileError::new(
                CompileErrorKind::Unsupported("asynchronous comprehensions"),
                pos,
            ));
        }
        let Some(first) = generators.first() else {
            return Ok(());
        };
        // The outermost iterable is evaluated in the enclosing scope.
        self.visit_expr(&first.iter)?;

        let previous = self.current;
        self.enter(ScopeKind::Comprehension, key, name);
        self.scope().params.push(COMPREHENSION_ITER.to_string());
        self.scope().bind_param(COMPREHENSION_ITER);
        self.scope().generator = generator;
        for (i, clause) in generators.iter().enumerate() {
            if i > 0 {
                self.visit_expr(&clause.iter)?;
            }
            self.visit_target(&clause.target)?;
            clause.ifs.iter().try_for_each(|cond| self.visit_expr(cond))?;
        }
        element(self)?;
        self.leave(previous);
        Ok(())
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    fn finish(mut self) -> CompileResult<Rc<Scope>> {
        for index in 0..self.scopes.len() {
            self.resolve_scope(index)?;
        }
        self.freeze()
    }

    fn resolve_scope(&mut self, index: usize) -> CompileResult<()> {
        let scope = &self.scopes[index];
        let mut names: IndexSet<String> = scope.bound.iter().cloned().collect();
        names.extend(scope.used.iter().cloned());
        names.extend(scope.globals.iter().cloned());
        names.extend(scope.nonlocals.keys().cloned());
        names.extend(scope.walrus.iter().cloned());

        for name in names {
            let access = self.classify(index, &name)?;
            self.scopes[index].symbols.insert(name, access);
        }
        Ok(())
    }

    fn classify(&mut self, index: usize, name: &str) -> CompileResult<NameAccess> {
        let scope = &self.scopes[index];
        let kind = scope.kind;

        if scope.globals.contains(name) {
            return Ok(if kind == ScopeKind::Module {
                NameAccess::Name
            } else {
                NameAccess::Global
            });
        }
        if kind == ScopeKind::Module {
            return Ok(NameAccess::Name);
        }
        if let Some(&pos) = scope.nonlocals.get(name) {
            return match self.find_binder(index, name) {
                Some(Binder::Function(binder)) => {
                    self.capture(index, binder, name);
                    Ok(NameAccess::Deref)
                }
                _ => Err(CompileError::new(
                    CompileErrorKind::NonlocalNotFound(name.to_string()),
                    pos,
                )),
            };
        }
        if scope.walrus.contains(name) && !scope.bound.contains(name) {
            return match self.find_binder(index, name) {
                Some(Binder::Function(binder)) => {
                    self.capture(index, binder, name);
                    Ok(NameAccess::Deref)
                }
                _ => Ok(NameAccess::Global),
            };
        }
        if scope.binds(name) {
            // Slot or name is decided once captures are known.
            return Ok(NameAccess::Name);
        }
        match self.find_binder(index, name) {
            Some(Binder::Function(binder)) => {
                self.capture(index, binder, name);
                Ok(NameAccess::Deref)
            }
            _ if kind == ScopeKind::Class => Ok(NameAccess::Name),
            _ => Ok(NameAccess::Global),
        }
    }

    /// Finds the enclosing function-like scope that owns `name`. Class
    /// scopes are transparent.
    fn find_binder(&self, index: usize, name: &str) -> Option<Binder> {
        let mut cursor = self.scopes[index].parent;
        while let Some(i) = cursor {
            let scope = &self.scopes[i];
            match scope.kind {
                ScopeKind::Module => return None,
                ScopeKind::Class => {}
                _ => {
                    if scope.globals.contains(name) {
                        return Some(Binder::Global);
                    }
                    if scope.binds(name) {
                        return Some(Binder::Function(i));
                    }
                }
            }
            cursor = scope.parent;
        }
        None
    }

    /// Records that `user` reads `name` owned by `binder`: the binder
    /// captures it and every scope in between passes it through.
    fn capture(&mut self, user: usize, binder: usize, name: &str) {
        self.scopes[binder].captured.insert(name.to_string());
        let mut cursor = Some(user);
        while let Some(i) = cursor {
            if i == binder {
                break;
            }
            self.scopes[i].free.insert(name.to_string());
            cursor = self.scopes[i].parent;
        }
    }

    /// Decides addressing per scope and links the tree.
    fn freeze(self) -> CompileResult<Rc<Scope>> {
        let mut parents = Vec::with_capacity(self.scopes.len());
        let mut built: Vec<Option<(ScopeKey, Scope)>> = Vec::with_capacity(self.scopes.len());
        for raw in self.scopes {
            parents.push(raw.parent);
            let key = raw.key;
            built.push(Some((key, Self::seal(raw))));
        }

        // Children are always created after their parent, so walking
        // backwards attaches complete subtrees.
        for index in (1..built.len()).rev() {
            let (Some(parent), Some((key, scope))) = (parents[index], built[index].take()) else {
                continue;
            };
            if let Some((_, parent_scope)) = built[parent].as_mut() {
                parent_scope.children.insert(key, Rc::new(scope));
            }
        }
        match built.swap_remove(0) {
            Some((_, root)) => Ok(Rc::new(root)),
            None => Err(CompileError::new(
                CompileErrorKind::Unsupported("empty scope trees"),
                Position::default(),
            )),
        }
    }

    fn seal(raw: RawScope) -> Scope {
        let mut flags = CodeFlags::NONE;
        if raw.has_varargs {
            flags |= CodeFlags::VARARGS;
        }
        if raw.has_varkw {
            flags |= CodeFlags::VARKEYWORDS;
        }
        if raw.generator {
            flags |= CodeFlags::GENERATOR;
        }
        if raw.coroutine {
            flags |= CodeFlags::COROUTINE;
        }
        match raw.kind {
            ScopeKind::Module => flags |= CodeFlags::MODULE,
            ScopeKind::Class => flags |= CodeFlags::CLASS_BODY,
            _ => {}
        }

        // Slot order: positional, *args, **kwargs, other locals in order of
        // first appearance, keyword-only parameters last.
        let mut varnames: Vec<String> = Vec::new();
        if raw.kind.is_function_like() {
            varnames.extend(raw.params.iter().cloned());
            for name in &raw.bound {
                if raw.binds(name) && !raw.params.contains(name) && !raw.kwonly.contains(name) {
                    varnames.push(name.clone());
                }
            }
            varnames.extend(raw.kwonly.iter().cloned());
        }

        let uses_slots = raw.kind.is_function_like() && !raw.dynamic_locals && raw.captured.is_empty();
        let mut symbols = raw.symbols;
        if uses_slots {
            flags |= CodeFlags::SLOTS;
            for (slot, name) in varnames.iter().enumerate() {
                symbols.insert(name.clone(), NameAccess::Fast(slot as u32));
            }
        }

        let argcount = raw.params.len() - usize::from(raw.has_varargs) - usize::from(raw.has_varkw);

        Scope {
            kind: raw.kind,
            name: raw.name,
            qualname: raw.qualname,
            symbols,
            varnames,
            argcount: argcount as u32,
            kwonlyargcount: raw.kwonly.len() as u32,
            flags,
            freevars: raw.free.into_iter().collect(),
            cellvars: raw.captured.into_iter().collect(),
            children: FxHashMap::default(),
        }
    }
}

enum Binder {
    Global,
    Function(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn analyze(source: &str) -> Rc<Scope> {
        let module = Parser::new(source).parse_module().expect("Should parse");
        analyze_module(&module).expect("Should analyze")
    }

    fn analyze_err(source: &str) -> CompileErrorKind {
        let module = Parser::new(source).parse_module().expect("Should parse");
        analyze_module(&module).expect_err("Should fail").kind
    }

    fn first_function(source: &str) -> Rc<Scope> {
        let module = Parser::new(source).parse_module().expect("Should parse");
        let root = analyze_module(&module).expect("Should analyze");
        let StatementKind::FunctionDef(def) = &module.body[0].kind else {
            panic!("Expected function");
        };
        root.function(def).expect("Function scope")
    }

    #[test]
    fn test_module_names() {
        let root = analyze("x = 1\nprint(x)\n");
        assert_eq!(root.kind, ScopeKind::Module);
        assert_eq!(root.access("x"), NameAccess::Name);
        assert_eq!(root.access("print"), NameAccess::Name);
        assert!(root.flags().contains(CodeFlags::MODULE));
    }

    #[test]
    fn test_slot_order() {
        let scope = first_function("def f(a, b, *args, c, **kw):\n    z = 1\n    y = 2\n");
        assert!(scope.uses_slots());
        assert_eq!(scope.varnames(), ["a", "b", "args", "kw", "z", "y", "c"]);
        assert_eq!(scope.argcount(), 2);
        assert_eq!(scope.kwonlyargcount(), 1);
        assert_eq!(scope.access("a"), NameAccess::Fast(0));
        assert_eq!(scope.access("c"), NameAccess::Fast(6));
        assert_eq!(scope.access("len"), NameAccess::Global);
    }

    #[test]
    fn test_explicit_global() {
        let scope = first_function("def f():\n    global g\n    g = 1\n");
        assert_eq!(scope.access("g"), NameAccess::Global);
        assert!(scope.varnames().is_empty());
    }

    #[test]
    fn test_captured_names_disable_slots() {
        let source = "def outer():\n    x = 1\n    def inner():\n        return x\n    return inner\n";
        let module = Parser::new(source).parse_module().expect("Should parse");
        let root = analyze_module(&module).expect("Should analyze");
        let StatementKind::FunctionDef(outer_def) = &module.body[0].kind else {
            panic!("Expected function");
        };
        let outer = root.function(outer_def).expect("outer");
        assert!(!outer.uses_slots());
        assert_eq!(outer.access("x"), NameAccess::Name);
        assert_eq!(outer.cellvars(), ["x"]);

        let StatementKind::FunctionDef(inner_def) = &outer_def.body[1].kind else {
            panic!("Expected function");
        };
        let inner = outer.function(inner_def).expect("inner");
        assert!(inner.uses_slots());
        assert_eq!(inner.access("x"), NameAccess::Deref);
        assert_eq!(inner.freevars(), ["x"]);
    }

    #[test]
    fn test_nonlocal() {
        let source = "def outer():\n    n = 0\n    def inc():\n        nonlocal n\n        n += 1\n    return inc\n";
        let module = Parser::new(source).parse_module().expect("Should parse");
        let root = analyze_module(&module).expect("Should analyze");
        let StatementKind::FunctionDef(outer_def) = &module.body[0].kind else {
            panic!("Expected function");
        };
        let outer = root.function(outer_def).expect("outer");
        let StatementKind::FunctionDef(inc_def) = &outer_def.body[1].kind else {
            panic!("Expected function");
        };
        let inc = outer.function(inc_def).expect("inc");
        assert_eq!(inc.access("n"), NameAccess::Deref);
        assert!(!inc.varnames().contains(&"n".to_string()));
    }

    #[test]
    fn test_pass_through_free_variable() {
        let source = "def a():\n    v = 1\n    def b():\n        def c():\n            return v\n        return c\n    return b\n";
        let module = Parser::new(source).parse_module().expect("Should parse");
        let root = analyze_module(&module).expect("Should analyze");
        let StatementKind::FunctionDef(a_def) = &module.body[0].kind else {
            panic!("Expected function");
        };
        let a = root.function(a_def).expect("a");
        let StatementKind::FunctionDef(b_def) = &a_def.body[1].kind else {
            panic!("Expected function");
        };
        let b = a.function(b_def).expect("b");
        assert_eq!(b.freevars(), ["v"]);
        assert!(b.cellvars().is_empty());
    }

    #[test]
    fn test_class_scope_is_skipped_by_methods() {
        let source = "class A:\n    x = 1\n    def m(self):\n        return x\n";
        let module = Parser::new(source).parse_module().expect("Should parse");
        let root = analyze_module(&module).expect("Should analyze");
        let StatementKind::ClassDef(class_def) = &module.body[0].kind else {
            panic!("Expected class");
        };
        let class = root.class(class_def).expect("class");
        assert_eq!(class.access("x"), NameAccess::Name);
        assert_eq!(class.qualname, "A");
        let StatementKind::FunctionDef(m_def) = &class_def.body[1].kind else {
            panic!("Expected method");
        };
        let method = class.function(m_def).expect("method");
        assert_eq!(method.access("x"), NameAccess::Global);
        assert_eq!(method.qualname, "A.m");
    }

    #[test]
    fn test_dynamic_locals_use_name_bag() {
        let scope = first_function("def f():\n    a = 1\n    return locals()\n");
        assert!(!scope.uses_slots());
        assert_eq!(scope.access("a"), NameAccess::Name);
        assert_eq!(scope.varnames(), ["a"]);
    }

    #[test]
    fn test_generator_and_coroutine_flags() {
        let scope = first_function("def g():\n    yield 1\n");
        assert!(scope.is_generator());
        let scope = first_function("async def c():\n    await x\n");
        assert!(scope.is_coroutine());
        assert!(!scope.is_generator());
    }

    #[test]
    fn test_comprehension_scope() {
        let source = "def f(xs):\n    return [x * 2 for x in xs]\n";
        let module = Parser::new(source).parse_module().expect("Should parse");
        let root = analyze_module(&module).expect("Should analyze");
        let StatementKind::FunctionDef(def) = &module.body[0].kind else {
            panic!("Expected function");
        };
        let scope = root.function(def).expect("f");
        assert_eq!(scope.access("xs"), NameAccess::Fast(0));
        assert_eq!(scope.varnames(), ["xs"]);

        let StatementKind::Return(Some(ret)) = &def.body[0].kind else {
            panic!("Expected return");
        };
        let ExpressionKind::ListComp(comp) = &ret.kind else {
            panic!("Expected list comprehension");
        };
        let inner = scope.comprehension(comp).expect("comprehension");
        assert_eq!(inner.varnames(), [COMPREHENSION_ITER, "x"]);
        assert_eq!(inner.argcount(), 1);
        assert_eq!(inner.qualname, "f.<locals>.<listcomp>");
    }

    #[test]
    fn test_walrus_in_comprehension_binds_outside() {
        let source = "def f(xs):\n    ys = [last := x for x in xs]\n    return last\n";
        let scope = first_function(source);
        assert!(scope.cellvars().contains(&"last".to_string()));
        assert!(!scope.uses_slots());
    }

    #[test]
    fn test_errors() {
        assert_eq!(analyze_err("yield 1\n"), CompileErrorKind::YieldOutsideFunction);
        assert_eq!(analyze_err("nonlocal x\n"), CompileErrorKind::NonlocalAtModuleLevel);
        assert_eq!(
            analyze_err("def f():\n    nonlocal x\n"),
            CompileErrorKind::NonlocalNotFound("x".into())
        );
        assert_eq!(
            analyze_err("def f():\n    await g()\n"),
            CompileErrorKind::AsyncOutsideAsyncFunction("await")
        );
        assert_eq!(
            analyze_err("async def f():\n    yield 1\n"),
            CompileErrorKind::Unsupported("asynchronous generators")
        );
        assert_eq!(
            analyze_err("class A:\n    ys = [y := 1 for _ in range(3)]\n"),
            CompileErrorKind::NamedExprInClassComprehension
        );
        assert_eq!(
            analyze_err("def f(a):\n    global a\n"),
            CompileErrorKind::ParameterDeclared("a".into(), "global")
        );
    }
}
