//! Expression nodes.

use crate::ast::stmt::Stmt;
use crate::ast::ty::TypeExpr;
use crate::token::{BindingSpec, SourceLoc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::LtEq => "<=",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// A function or lambda parameter. Defaults are expressions evaluated at call
/// time in the callee's definition scope.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub default: Option<Expr>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    /// `42`, `"text"`, `true`, `null` — matched by structural equality.
    Literal(Expr),
    /// `Some(x)` or a bare variant name. Binds payload names in the arm body.
    Variant {
        module: Option<String>,
        enum_name: Option<String>,
        name: String,
        bindings: Vec<String>,
        loc: SourceLoc,
    },
    Wildcard(SourceLoc),
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Vec<Stmt>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Null(SourceLoc),
    Bool(bool, SourceLoc),
    Int(i64, SourceLoc),
    Float(f64, SourceLoc),
    Str(String, SourceLoc),
    Identifier(String, SourceLoc),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        loc: SourceLoc,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        loc: SourceLoc,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        loc: SourceLoc,
    },
    Member {
        object: Box<Expr>,
        field: String,
        loc: SourceLoc,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        loc: SourceLoc,
    },
    /// `new Name { field: value }`, optionally module-qualified and with
    /// explicit type arguments: `new geometry.Box<int> { value: 1 }`.
    StructLiteral {
        module: Option<String>,
        name: String,
        type_args: Vec<TypeExpr>,
        fields: Vec<(String, Expr)>,
        loc: SourceLoc,
    },
    List {
        elements: Vec<Expr>,
        loc: SourceLoc,
    },
    /// Keys are string literals or bare identifiers (sugar for strings).
    Dict {
        entries: Vec<(String, Expr)>,
        loc: SourceLoc,
    },
    Lambda {
        params: Vec<Param>,
        body: Vec<Stmt>,
        is_async: bool,
        loc: SourceLoc,
    },
    /// `left |> right`: left is evaluated eagerly, right lazily.
    Pipeline {
        left: Box<Expr>,
        right: Box<Expr>,
        loc: SourceLoc,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        loc: SourceLoc,
    },
    /// `if` in expression position; the value is the last expression
    /// statement of the taken branch, `null` otherwise.
    If {
        cond: Box<Expr>,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
        loc: SourceLoc,
    },
    Match {
        subject: Box<Expr>,
        arms: Vec<MatchArm>,
        loc: SourceLoc,
    },
    Polyglot {
        lang: String,
        bindings: Vec<BindingSpec>,
        body: String,
        json_return: bool,
        loc: SourceLoc,
    },
    Await {
        operand: Box<Expr>,
        loc: SourceLoc,
    },
}

impl Expr {
    pub fn loc(&self) -> &SourceLoc {
        match self {
            Expr::Null(loc)
            | Expr::Bool(_, loc)
            | Expr::Int(_, loc)
            | Expr::Float(_, loc)
            | Expr::Str(_, loc)
            | Expr::Identifier(_, loc)
            | Expr::Binary { loc, .. }
            | Expr::Unary { loc, .. }
            | Expr::Call { loc, .. }
            | Expr::Member { loc, .. }
            | Expr::Index { loc, .. }
            | Expr::StructLiteral { loc, .. }
            | Expr::List { loc, .. }
            | Expr::Dict { loc, .. }
            | Expr::Lambda { loc, .. }
            | Expr::Pipeline { loc, .. }
            | Expr::Range { loc, .. }
            | Expr::If { loc, .. }
            | Expr::Match { loc, .. }
            | Expr::Polyglot { loc, .. }
            | Expr::Await { loc, .. } => loc,
        }
    }
}
