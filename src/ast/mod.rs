//! Abstract syntax tree.
//!
//! Two disjoint families: statements and expressions. Every node owns its
//! children exclusively and carries the source location it started at.

mod expr;
mod stmt;
mod ty;

pub use expr::{BinaryOp, Expr, MatchArm, Param, Pattern, UnaryOp};
pub use stmt::{FieldDecl, Stmt, VariantDecl};
pub use ty::TypeExpr;
