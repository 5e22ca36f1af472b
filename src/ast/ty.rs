//! Type annotations.

use crate::token::SourceLoc;

/// A parsed type annotation.
///
/// The module prefix is first-class: `geometry.Point` and `physics.Point` are
/// different types even though the base name matches.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Named {
        module: Option<String>,
        name: String,
        params: Vec<TypeExpr>,
        nullable: bool,
        loc: SourceLoc,
    },
    /// `int | string`. Nullability distributes over the whole union.
    Union {
        alternatives: Vec<TypeExpr>,
        nullable: bool,
        loc: SourceLoc,
    },
}

impl TypeExpr {
    pub fn named(name: impl Into<String>, loc: SourceLoc) -> Self {
        TypeExpr::Named {
            module: None,
            name: name.into(),
            params: Vec::new(),
            nullable: false,
            loc,
        }
    }

    pub fn loc(&self) -> &SourceLoc {
        match self {
            TypeExpr::Named { loc, .. } | TypeExpr::Union { loc, .. } => loc,
        }
    }

    pub fn nullable(&self) -> bool {
        match self {
            TypeExpr::Named { nullable, .. } | TypeExpr::Union { nullable, .. } => *nullable,
        }
    }

    /// Render back to source form, used in type-mismatch messages.
    pub fn display_name(&self) -> String {
        match self {
            TypeExpr::Named {
                module,
                name,
                params,
                nullable,
                ..
            } => {
                let mut out = String::new();
                if let Some(m) = module {
                    out.push_str(m);
                    out.push('.');
                }
                out.push_str(name);
                if !params.is_empty() {
                    let inner: Vec<String> = params.iter().map(|p| p.display_name()).collect();
                    out.push('<');
                    out.push_str(&inner.join(", "));
                    out.push('>');
                }
                if *nullable {
                    out.push('?');
                }
                out
            }
            TypeExpr::Union {
                alternatives,
                nullable,
                ..
            } => {
                let inner: Vec<String> = alternatives.iter().map(|a| a.display_name()).collect();
                let mut out = inner.join(" | ");
                if *nullable {
                    out.push('?');
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn loc() -> SourceLoc {
        SourceLoc::new(Arc::from("t.naab"), 1, 1)
    }

    #[test]
    fn display_name_includes_module_and_params() {
        let ty = TypeExpr::Named {
            module: Some("collections".into()),
            name: "Box".into(),
            params: vec![TypeExpr::named("int", loc())],
            nullable: true,
            loc: loc(),
        };
        assert_eq!(ty.display_name(), "collections.Box<int>?");
    }

    #[test]
    fn display_name_for_union() {
        let ty = TypeExpr::Union {
            alternatives: vec![TypeExpr::named("int", loc()), TypeExpr::named("string", loc())],
            nullable: false,
            loc: loc(),
        };
        assert_eq!(ty.display_name(), "int | string");
    }
}
