//! Abstract Syntax Tree (AST) definitions.
//!
//! The tree is a closed set of sum types. Every statement and expression
//! carries the source [`Position`] it started at, and each node owns its
//! children exclusively. Comprehensions, f-strings, decorators, async forms
//! and exception handling keep dedicated node types so the compiler can pick
//! a lowering strategy per construct.

use std::fmt;

/// A 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Line number
    pub line: u32,
    /// Column number
    pub column: u32,
}

impl Position {
    /// Creates a new position.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A complete module.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    /// The statements in the module
    pub body: Vec<Statement>,
}

// ============================================================================
// Statements
// ============================================================================

/// A statement with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// What kind of statement this is
    pub kind: StatementKind,
    /// Where the statement starts
    pub pos: Position,
}

impl Statement {
    /// Creates a new statement.
    pub fn new(kind: StatementKind, pos: Position) -> Self {
        Self { kind, pos }
    }
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// Expression statement
    Expression(Expression),
    /// Assignment `a = b = value`
    Assign(AssignStatement),
    /// Augmented assignment `a += value`
    AugAssign(AugAssignStatement),
    /// Annotated assignment `a: T = value`
    AnnAssign(AnnAssignStatement),
    /// If statement
    If(IfStatement),
    /// While statement
    While(WhileStatement),
    /// For statement (also `async for`)
    For(ForStatement),
    /// Break statement
    Break,
    /// Continue statement
    Continue,
    /// Pass statement
    Pass,
    /// Return statement
    Return(Option<Expression>),
    /// Function definition (also `async def`)
    FunctionDef(FunctionDef),
    /// Class definition
    ClassDef(ClassDef),
    /// Try statement
    Try(TryStatement),
    /// Raise statement
    Raise(RaiseStatement),
    /// With statement (also `async with`)
    With(WithStatement),
    /// `import a.b as c`
    Import(Vec<Alias>),
    /// `from a import b`
    ImportFrom(ImportFrom),
    /// `global a, b`
    Global(Vec<String>),
    /// `nonlocal a, b`
    Nonlocal(Vec<String>),
    /// `del a, b[0]`
    Delete(Vec<Expression>),
    /// `assert test, msg`
    Assert(AssertStatement),
}

/// An assignment statement.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignStatement {
    /// Targets, outermost first (`a = b = 1` has two)
    pub targets: Vec<Expression>,
    /// The assigned value
    pub value: Expression,
}

/// An augmented assignment statement.
#[derive(Debug, Clone, PartialEq)]
pub struct AugAssignStatement {
    /// The target
    pub target: Expression,
    /// The operator
    pub op: BinaryOperator,
    /// The right-hand side
    pub value: Expression,
}

/// An annotated assignment statement.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnAssignStatement {
    /// The target
    pub target: Expression,
    /// The annotation (evaluated only for module and class scopes)
    pub annotation: Expression,
    /// Optional value
    pub value: Option<Expression>,
}

/// An if statement; `elif` chains nest in `orelse`.
#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    /// The condition
    pub test: Expression,
    /// Statements when true
    pub body: Vec<Statement>,
    /// Statements when false
    pub orelse: Vec<Statement>,
}

/// A while statement.
#[derive(Debug, Clone, PartialEq)]
pub struct WhileStatement {
    /// The condition
    pub test: Expression,
    /// Loop body
    pub body: Vec<Statement>,
    /// Runs when the loop ends without `break`
    pub orelse: Vec<Statement>,
}

/// A for statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ForStatement {
    /// Loop target
    pub target: Expression,
    /// Iterated expression
    pub iter: Expression,
    /// Loop body
    pub body: Vec<Statement>,
    /// Runs when the loop ends without `break`
    pub orelse: Vec<Statement>,
    /// Whether this is `async for`
    pub is_async: bool,
}

/// A single formal parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Default value
    pub default: Option<Expression>,
}

/// The formal parameter list of a function or lambda.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parameters {
    /// Positional-or-keyword parameters
    pub args: Vec<Parameter>,
    /// `*args` name
    pub vararg: Option<String>,
    /// Keyword-only parameters (after `*` or `*args`)
    pub kwonly: Vec<Parameter>,
    /// `**kwargs` name
    pub kwarg: Option<String>,
}

impl Parameters {
    /// Iterates over every parameter name in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.vararg.as_deref())
            .chain(self.kwonly.iter().map(|p| p.name.as_str()))
            .chain(self.kwarg.as_deref())
    }
}

/// A function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    /// Function name
    pub name: String,
    /// Parameters
    pub params: Parameters,
    /// Function body
    pub body: Vec<Statement>,
    /// Decorators, outermost first
    pub decorators: Vec<Expression>,
    /// Return annotation (parsed, not evaluated)
    pub returns: Option<Expression>,
    /// Whether this is `async def`
    pub is_async: bool,
}

/// A class definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    /// Class name
    pub name: String,
    /// Base class expressions
    pub bases: Vec<Expression>,
    /// Class keywords such as `metaclass=` (evaluated, otherwise ignored)
    pub keywords: Vec<Keyword>,
    /// Class body
    pub body: Vec<Statement>,
    /// Decorators, outermost first
    pub decorators: Vec<Expression>,
}

/// An `except` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    /// Exception type expression; `None` for a bare `except:`
    pub kind: Option<Expression>,
    /// Name bound to the exception
    pub name: Option<String>,
    /// Handler body
    pub body: Vec<Statement>,
    /// Where the clause starts
    pub pos: Position,
}

/// A try statement.
#[derive(Debug, Clone, PartialEq)]
pub struct TryStatement {
    /// Protected body
    pub body: Vec<Statement>,
    /// Handlers, tried in order
    pub handlers: Vec<ExceptHandler>,
    /// Runs when the body raised nothing
    pub orelse: Vec<Statement>,
    /// Always runs
    pub finalbody: Vec<Statement>,
}

/// A raise statement.
#[derive(Debug, Clone, PartialEq)]
pub struct RaiseStatement {
    /// Raised exception; `None` re-raises the active one
    pub exc: Option<Expression>,
    /// `from` cause
    pub cause: Option<Expression>,
}

/// One `expr as target` item of a with statement.
#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    /// Context manager expression
    pub context: Expression,
    /// Optional target
    pub target: Option<Expression>,
}

/// A with statement.
#[derive(Debug, Clone, PartialEq)]
pub struct WithStatement {
    /// Items, entered left to right
    pub items: Vec<WithItem>,
    /// Body
    pub body: Vec<Statement>,
    /// Whether this is `async with`
    pub is_async: bool,
}

/// `name as asname` in an import.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    /// Dotted name (or `*`)
    pub name: String,
    /// Binding name
    pub asname: Option<String>,
}

/// A from-import statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportFrom {
    /// Module path, `None` for `from . import x`
    pub module: Option<String>,
    /// Imported names
    pub names: Vec<Alias>,
    /// Number of leading dots
    pub level: u32,
}

/// An assert statement.
#[derive(Debug, Clone, PartialEq)]
pub struct AssertStatement {
    /// The checked condition
    pub test: Expression,
    /// Optional message
    pub msg: Option<Expression>,
}

// ============================================================================
// Expressions
// ============================================================================

/// An expression with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    /// What kind of expression this is
    pub kind: ExpressionKind,
    /// Where the expression starts
    pub pos: Position,
}

impl Expression {
    /// Creates a new expression.
    pub fn new(kind: ExpressionKind, pos: Position) -> Self {
        Self { kind, pos }
    }

    /// Creates a boxed expression.
    pub fn boxed(kind: ExpressionKind, pos: Position) -> Box<Self> {
        Box::new(Self::new(kind, pos))
    }
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    /// Literal constant
    Literal(Literal),
    /// Name reference
    Name(String),
    /// `a and b`, `a or b or c`
    BoolOp(BoolOpExpression),
    /// Binary operation
    Binary(BinaryExpression),
    /// Unary operation
    Unary(UnaryExpression),
    /// Comparison chain `a < b <= c`
    Compare(CompareExpression),
    /// Call
    Call(CallExpression),
    /// Attribute access `a.b`
    Attribute(AttributeExpression),
    /// Subscript `a[b]`
    Subscript(SubscriptExpression),
    /// Slice `a:b:c` (only inside a subscript)
    Slice(SliceExpression),
    /// Starred `*a`
    Starred(Box<Expression>),
    /// List display
    List(Vec<Expression>),
    /// Tuple display
    Tuple(Vec<Expression>),
    /// Set display
    Set(Vec<Expression>),
    /// Dict display
    Dict(Vec<DictItem>),
    /// List comprehension
    ListComp(Comprehension),
    /// Set comprehension
    SetComp(Comprehension),
    /// Generator expression
    GeneratorExp(Comprehension),
    /// Dict comprehension
    DictComp(DictComprehension),
    /// `body if test else orelse`
    Conditional(ConditionalExpression),
    /// Lambda
    Lambda(LambdaExpression),
    /// `yield` / `yield value`
    Yield(Option<Box<Expression>>),
    /// `yield from value`
    YieldFrom(Box<Expression>),
    /// `await value`
    Await(Box<Expression>),
    /// f-string
    FormattedString(Vec<FStringPart>),
    /// `name := value`
    NamedExpr(NamedExpression),
}

/// A literal constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// None
    None,
    /// True / False
    Bool(bool),
    /// Integer that fits in an i64
    Int(i64),
    /// Larger integer, decimal digits
    BigInt(String),
    /// Float
    Float(f64),
    /// String
    Str(String),
    /// `...`
    Ellipsis,
}

/// Boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOperator {
    /// and
    And,
    /// or
    Or,
}

/// `a and b and c`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoolOpExpression {
    /// The operator
    pub op: BoolOperator,
    /// Two or more operands
    pub values: Vec<Expression>,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// +
    Add,
    /// -
    Sub,
    /// *
    Mul,
    /// /
    Div,
    /// //
    FloorDiv,
    /// %
    Mod,
    /// **
    Pow,
    /// <<
    LShift,
    /// >>
    RShift,
    /// &
    BitAnd,
    /// |
    BitOr,
    /// ^
    BitXor,
}

impl BinaryOperator {
    /// The operator's source spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::FloorDiv => "//",
            BinaryOperator::Mod => "%",
            BinaryOperator::Pow => "**",
            BinaryOperator::LShift => "<<",
            BinaryOperator::RShift => ">>",
            BinaryOperator::BitAnd => "&",
            BinaryOperator::BitOr => "|",
            BinaryOperator::BitXor => "^",
        }
    }
}

/// A binary operation.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpression {
    /// The operator
    pub op: BinaryOperator,
    /// Left operand
    pub left: Box<Expression>,
    /// Right operand
    pub right: Box<Expression>,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// not
    Not,
    /// -
    Neg,
    /// +
    Pos,
    /// ~
    Invert,
}

/// A unary operation.
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpression {
    /// The operator
    pub op: UnaryOperator,
    /// The operand
    pub operand: Box<Expression>,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOperator {
    /// ==
    Eq,
    /// !=
    NotEq,
    /// <
    Lt,
    /// <=
    LtE,
    /// >
    Gt,
    /// >=
    GtE,
    /// in
    In,
    /// not in
    NotIn,
    /// is
    Is,
    /// is not
    IsNot,
}

/// A comparison chain.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareExpression {
    /// Leftmost operand
    pub left: Box<Expression>,
    /// Operators, one per comparator
    pub ops: Vec<CompareOperator>,
    /// Right-hand operands
    pub comparators: Vec<Expression>,
}

/// A keyword argument; `name` is `None` for `**mapping`.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// Keyword name
    pub name: Option<String>,
    /// Argument value
    pub value: Expression,
}

/// A call expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpression {
    /// Callee
    pub func: Box<Expression>,
    /// Positional arguments; may contain `Starred`
    pub args: Vec<Expression>,
    /// Keyword arguments
    pub keywords: Vec<Keyword>,
}

impl CallExpression {
    /// Returns true if the call uses `*args` or `**kwargs` unpacking.
    pub fn has_unpacking(&self) -> bool {
        self.args
            .iter()
            .any(|a| matches!(a.kind, ExpressionKind::Starred(_)))
            || self.keywords.iter().any(|k| k.name.is_none())
    }
}

/// Attribute access.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeExpression {
    /// Object
    pub value: Box<Expression>,
    /// Attribute name
    pub attr: String,
}

/// Subscript access.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptExpression {
    /// Container
    pub value: Box<Expression>,
    /// Index (possibly a `Slice` or a `Tuple` of them)
    pub index: Box<Expression>,
}

/// A slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceExpression {
    /// Lower bound
    pub lower: Option<Box<Expression>>,
    /// Upper bound
    pub upper: Option<Box<Expression>>,
    /// Step
    pub step: Option<Box<Expression>>,
}

/// An entry of a dict display; `key` is `None` for `**mapping`.
#[derive(Debug, Clone, PartialEq)]
pub struct DictItem {
    /// Key
    pub key: Option<Expression>,
    /// Value
    pub value: Expression,
}

/// One `for target in iter if cond` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ComprehensionFor {
    /// Loop target
    pub target: Expression,
    /// Iterated expression
    pub iter: Expression,
    /// Filters
    pub ifs: Vec<Expression>,
    /// Whether this is `async for`
    pub is_async: bool,
}

/// A list, set or generator comprehension.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    /// Produced element
    pub element: Box<Expression>,
    /// Clauses, outermost first
    pub generators: Vec<ComprehensionFor>,
}

/// A dict comprehension.
#[derive(Debug, Clone, PartialEq)]
pub struct DictComprehension {
    /// Produced key
    pub key: Box<Expression>,
    /// Produced value
    pub value: Box<Expression>,
    /// Clauses, outermost first
    pub generators: Vec<ComprehensionFor>,
}

/// A conditional expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalExpression {
    /// Condition
    pub test: Box<Expression>,
    /// Value when true
    pub body: Box<Expression>,
    /// Value when false
    pub orelse: Box<Expression>,
}

/// A lambda.
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaExpression {
    /// Parameters
    pub params: Parameters,
    /// Body expression
    pub body: Box<Expression>,
}

/// A piece of an f-string.
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    /// Literal text
    Literal(String),
    /// Replacement field
    Field(FormattedValue),
}

/// A `{value!conversion:spec}` replacement field.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedValue {
    /// The formatted expression
    pub value: Box<Expression>,
    /// `r`, `s` or `a`
    pub conversion: Option<char>,
    /// Format spec, itself possibly containing fields
    pub format_spec: Vec<FStringPart>,
}

/// `target := value`.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedExpression {
    /// Bound name
    pub target: String,
    /// Value
    pub value: Box<Expression>,
}
