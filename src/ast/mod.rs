use serde::{Deserialize, Serialize};

/// A complete program is a list of top-level statements
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

/// `{ stmt; stmt }`: the body of an `if` branch or a function literal
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Stmt>,
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `let name = value;`
    Let { name: String, value: Expr },

    /// `return value;`
    Return(Expr),

    /// Expression as statement; its value is discarded
    Expr(Expr),
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Ident(String),
    Int(i64),
    Str(String),
    Bool(bool),

    /// `!right`, `-right`. The operator is kept as written in the source.
    Prefix { op: String, right: Box<Expr> },

    /// `left op right`
    Infix {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `if (condition) { consequence } else { alternative }`
    If {
        condition: Box<Expr>,
        consequence: Block,
        alternative: Option<Block>,
    },

    Function(FunctionLiteral),

    /// `function(arguments...)`
    Call {
        function: Box<Expr>,
        arguments: Vec<Expr>,
    },

    Array(Vec<Expr>),

    /// `{key: value, ...}` in source order
    Hash(Vec<(Expr, Expr)>),

    /// `left[index]`
    Index { left: Box<Expr>, index: Box<Expr> },
}

/// `fn(params) { body }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionLiteral {
    pub parameters: Vec<String>,
    pub body: Block,
    /// Set when the literal is bound by `let name = fn...`, so the body can
    /// call itself by that name.
    #[serde(default)]
    pub name: Option<String>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Program { statements }
    }
}

impl Block {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Block { statements }
    }
}
