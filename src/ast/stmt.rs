//! Statement nodes.

use crate::ast::expr::{Expr, Param};
use crate::ast::ty::TypeExpr;
use crate::token::SourceLoc;

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub loc: SourceLoc,
}

/// One enum variant; payload types are positional: `Some(T)`.
#[derive(Debug, Clone)]
pub struct VariantDecl {
    pub name: String,
    pub payload: Vec<TypeExpr>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Let {
        name: String,
        ty: Option<TypeExpr>,
        value: Expr,
        loc: SourceLoc,
    },
    /// Assignment to an identifier, member, or index target.
    Assign {
        target: Expr,
        value: Expr,
        loc: SourceLoc,
    },
    FnDecl {
        name: String,
        params: Vec<Param>,
        body: Vec<Stmt>,
        is_async: bool,
        loc: SourceLoc,
    },
    StructDecl {
        name: String,
        generics: Vec<String>,
        fields: Vec<FieldDecl>,
        loc: SourceLoc,
    },
    EnumDecl {
        name: String,
        generics: Vec<String>,
        variants: Vec<VariantDecl>,
        loc: SourceLoc,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        loc: SourceLoc,
    },
    For {
        var: String,
        iterable: Expr,
        body: Vec<Stmt>,
        loc: SourceLoc,
    },
    Return {
        value: Option<Expr>,
        loc: SourceLoc,
    },
    Throw {
        value: Expr,
        loc: SourceLoc,
    },
    Break {
        loc: SourceLoc,
    },
    Continue {
        loc: SourceLoc,
    },
    Try {
        body: Vec<Stmt>,
        catch: Option<(String, Vec<Stmt>)>,
        finally: Option<Vec<Stmt>>,
        loc: SourceLoc,
    },
    /// `use modname [as alias]` or `use modname.submod`.
    Import {
        path: Vec<String>,
        alias: Option<String>,
        loc: SourceLoc,
    },
    /// A free-standing `{ ... }` compound block with its own scope.
    Block {
        body: Vec<Stmt>,
        loc: SourceLoc,
    },
    Expr {
        expr: Expr,
        loc: SourceLoc,
    },
}

impl Stmt {
    pub fn loc(&self) -> &SourceLoc {
        match self {
            Stmt::Let { loc, .. }
            | Stmt::Assign { loc, .. }
            | Stmt::FnDecl { loc, .. }
            | Stmt::StructDecl { loc, .. }
            | Stmt::EnumDecl { loc, .. }
            | Stmt::While { loc, .. }
            | Stmt::For { loc, .. }
            | Stmt::Return { loc, .. }
            | Stmt::Throw { loc, .. }
            | Stmt::Break { loc }
            | Stmt::Continue { loc }
            | Stmt::Try { loc, .. }
            | Stmt::Import { loc, .. }
            | Stmt::Block { loc, .. }
            | Stmt::Expr { loc, .. } => loc,
        }
    }
}
