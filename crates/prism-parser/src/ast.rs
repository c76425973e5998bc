//! AST types for Prism scripts.
//!
//! A parsed [`Script`] owns all of its data so that it can be merged into a
//! live namespace and shared between threads.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A parsed script: its node table and its function table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub nodes: HashMap<String, Block>,
    pub functions: HashMap<FunctionKey, Block>,
}

/// Functions are keyed by name and the set of parameter names, so two
/// same-named functions with different parameter sets coexist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey {
    pub name: String,
    pub params: BTreeSet<String>,
}

impl FunctionKey {
    pub fn new<I, S>(name: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(String::as_str).collect();
        write!(f, "{}({})", self.name, params.join(", "))
    }
}

/// A list of statements.
pub type Block = Vec<Statement>;

/// Which scope an identifier is read from or written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Qualifier {
    /// Locals first, then globals; assignments go to locals.
    #[default]
    Auto,
    Local,
    Global,
}

/// A possibly-qualified variable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub qualifier: Qualifier,
    pub name: String,
}

impl Target {
    pub fn auto(name: impl Into<String>) -> Self {
        Self {
            qualifier: Qualifier::Auto,
            name: name.into(),
        }
    }
}

/// What a `for` loop binds each element to.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Single(Target),
    /// `[a, None, b]`: `None` entries discard their element.
    Pattern(Vec<Option<Target>>),
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `x = expr;`
    Assign { target: Target, value: Expr },
    /// `x += expr;` and friends.
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    /// `[a, None, b] = expr;`
    Destructure {
        targets: Vec<Option<Target>>,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
    },
    While { condition: Expr, body: Block },
    For {
        binding: Binding,
        iterable: Expr,
        body: Block,
    },
    Goto(String),
    Return(Option<Expr>),
    Exit(Option<Expr>),
    Break,
    Continue,
    /// An expression evaluated for its effects.
    Expr(Expr),
}

/// Binary operators. Both operands are always evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    BitNand,
    BitNor,
    Eq,
    NotEq,
    Ge,
    Gt,
    Le,
    Lt,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::IntDiv => "\\",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::BitAnd => "and",
            BinOp::BitOr => "or",
            BinOp::BitXor => "xor",
            BinOp::BitNand => "nand",
            BinOp::BitNor => "nor",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Ge => ">=",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Lt => "<",
        }
    }
}

/// Short-circuiting operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

/// What an unqualified or dotted call names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// `name(...)`: a bound callable or a script function.
    Local(String),
    /// `a.b.c(...)`: an attribute of a variable or a registered host function.
    Scoped(String),
}

/// A named call argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: Expr,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ident(Target),
    /// A dotted name like `seq.length`.
    Scoped(String),
    Sequence(Vec<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary { op: UnOp, operand: Box<Expr> },
    Call {
        target: CallTarget,
        args: Vec<Argument>,
    },
    /// `(expr).a.b`
    Suffix { base: Box<Expr>, path: Vec<String> },
    /// `(expr).a.b(args)`
    SuffixCall {
        base: Box<Expr>,
        path: Vec<String>,
        args: Vec<Argument>,
    },
}
