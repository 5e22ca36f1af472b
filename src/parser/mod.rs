//! Recursive-descent parser.
//!
//! Statements are parsed top-down; binary expressions use precedence
//! climbing (see `expr.rs`). Every recursive rule passes through
//! [`Parser::descend`], which enforces the configured depth cap.

mod expr;


use crate::ast::{Expr, FieldDecl, Param, Stmt, TypeExpr, VariantDecl};
use crate::error::{ErrorKind, NaabError};
use crate::limits::Limits;
use crate::suggest::find_similar;
use crate::token::{SourceLoc, Token, TokenType};

pub(crate) type ParseResult<T> = Result<T, NaabError>;

pub struct Parser<'a> {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
    limits: &'a Limits,
    /// Names declared so far, fuel for "did you mean?" suggestions.
    known_names: Vec<String>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, limits: &'a Limits) -> Self {
        Parser {
            tokens,
            current: 0,
            depth: 0,
            limits,
            known_names: Vec::new(),
        }
    }

    /// Parse a whole program: statements separated by newlines/semicolons.
    pub fn parse_program(mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        self.skip_separators();
        while !self.at_eof() {
            stmts.push(self.parse_statement()?);
            self.expect_statement_end()?;
        }
        Ok(stmts)
    }

    // -- token plumbing --

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenType {
        &self.peek().kind
    }

    fn peek_ahead(&self, offset: usize) -> &TokenType {
        &self.tokens[(self.current + offset).min(self.tokens.len() - 1)].kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenType::Eof)
    }

    fn loc(&self) -> SourceLoc {
        self.peek().loc.clone()
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.current.min(self.tokens.len() - 1)].clone();
        if self.current < self.tokens.len() - 1 {
            self.current += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenType) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenType) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenType) -> ParseResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("expected {}", kind.describe())))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> ParseResult<(String, SourceLoc)> {
        match self.peek_kind().clone() {
            TokenType::Identifier(name) => {
                let loc = self.loc();
                self.advance();
                Ok((name, loc))
            }
            _ if TokenType::keyword(&self.peek().lexeme).is_some() => Err(NaabError::syntax(
                format!(
                    "reserved keyword '{}' cannot be used as {}",
                    self.peek().lexeme,
                    what
                ),
                self.loc(),
            )),
            _ => Err(self.unexpected(&format!("expected {}", what))),
        }
    }

    /// Build an expected-X-got-Y error, with an edit-distance suggestion when
    /// the offending token is an identifier close to something known.
    fn unexpected(&self, expected: &str) -> NaabError {
        let found = self.peek_kind().describe();
        let suggestion = if let TokenType::Identifier(name) = self.peek_kind() {
            find_similar(
                name,
                TokenType::KEYWORDS
                    .iter()
                    .copied()
                    .chain(self.known_names.iter().map(|s| s.as_str())),
                2,
            )
        } else {
            None
        };
        NaabError::syntax(format!("{}, got {}", expected, found), self.loc())
            .with_suggestion(suggestion)
    }

    fn mark(&self) -> usize {
        self.current
    }

    fn restore(&mut self, checkpoint: usize) {
        self.current = checkpoint;
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenType::Separator) {
            self.advance();
        }
    }

    fn expect_statement_end(&mut self) -> ParseResult<()> {
        match self.peek_kind() {
            TokenType::Separator => {
                self.skip_separators();
                Ok(())
            }
            TokenType::Eof | TokenType::RBrace => Ok(()),
            _ => Err(self.unexpected("expected end of statement")),
        }
    }

    /// Depth-guarded recursion: every grammar rule that can self-nest goes
    /// through here.
    fn descend<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<T> {
        self.depth += 1;
        if self.depth > self.limits.max_parse_depth {
            self.depth -= 1;
            return Err(NaabError::syntax(
                format!(
                    "parser recursion limit of {} exceeded",
                    self.limits.max_parse_depth
                ),
                self.loc(),
            ));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn remember(&mut self, name: &str) {
        self.known_names.push(name.to_string());
    }

    // -- statements --

    pub(crate) fn parse_statement(&mut self) -> ParseResult<Stmt> {
        self.descend(|p| p.parse_statement_inner())
    }

    fn parse_statement_inner(&mut self) -> ParseResult<Stmt> {
        let loc = self.loc();
        match self.peek_kind() {
            TokenType::Let => self.parse_let(),
            TokenType::Fn if matches!(self.peek_ahead(1), TokenType::Identifier(_)) => {
                self.parse_fn_decl(false)
            }
            TokenType::Async if matches!(self.peek_ahead(1), TokenType::Fn) => {
                self.advance();
                if matches!(self.peek_ahead(1), TokenType::Identifier(_)) {
                    self.parse_fn_decl(true)
                } else {
                    // `async fn (x) { .. }` lambda in statement position.
                    let expr = self.parse_lambda(true)?;
                    Ok(Stmt::Expr { expr, loc })
                }
            }
            TokenType::Struct => self.parse_struct_decl(),
            TokenType::Enum => self.parse_enum_decl(),
            TokenType::While => self.parse_while(),
            TokenType::For => self.parse_for(),
            TokenType::Return => {
                self.advance();
                let value = if matches!(
                    self.peek_kind(),
                    TokenType::Separator | TokenType::Eof | TokenType::RBrace
                ) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                Ok(Stmt::Return { value, loc })
            }
            TokenType::Throw => {
                self.advance();
                let value = self.parse_expression()?;
                Ok(Stmt::Throw { value, loc })
            }
            TokenType::Break => {
                self.advance();
                Ok(Stmt::Break { loc })
            }
            TokenType::Continue => {
                self.advance();
                Ok(Stmt::Continue { loc })
            }
            TokenType::Try => self.parse_try(),
            TokenType::Use => self.parse_import(),
            TokenType::LBrace => {
                let body = self.parse_block()?;
                Ok(Stmt::Block { body, loc })
            }
            _ => {
                let expr = self.parse_expression()?;
                if self.eat(&TokenType::Assign) {
                    self.validate_assign_target(&expr)?;
                    let value = self.parse_expression()?;
                    Ok(Stmt::Assign {
                        target: expr,
                        value,
                        loc,
                    })
                } else {
                    Ok(Stmt::Expr { expr, loc })
                }
            }
        }
    }

    fn validate_assign_target(&self, target: &Expr) -> ParseResult<()> {
        match target {
            Expr::Identifier(..) | Expr::Member { .. } | Expr::Index { .. } => Ok(()),
            other => Err(NaabError::syntax(
                "invalid assignment target",
                other.loc().clone(),
            )),
        }
    }

    fn parse_let(&mut self) -> ParseResult<Stmt> {
        let loc = self.loc();
        self.advance();
        let (name, _) = self.expect_identifier("a variable name")?;
        self.remember(&name);
        let ty = if self.eat(&TokenType::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(TokenType::Assign)?;
        let value = self.parse_expression()?;
        Ok(Stmt::Let {
            name,
            ty,
            value,
            loc,
        })
    }

    fn parse_fn_decl(&mut self, is_async: bool) -> ParseResult<Stmt> {
        let loc = self.loc();
        self.advance();
        let (name, _) = self.expect_identifier("a function name")?;
        self.remember(&name);
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(Stmt::FnDecl {
            name,
            params,
            body,
            is_async,
            loc,
        })
    }

    pub(crate) fn parse_params(&mut self) -> ParseResult<Vec<Param>> {
        self.expect(TokenType::LParen)?;
        let mut params = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&TokenType::RParen) {
                break;
            }
            let loc = self.loc();
            let (name, _) = self.expect_identifier("a parameter name")?;
            self.remember(&name);
            let ty = if self.eat(&TokenType::Colon) {
                Some(self.parse_type()?)
            } else {
                None
            };
            let default = if self.eat(&TokenType::Assign) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            params.push(Param {
                name,
                ty,
                default,
                loc,
            });
            self.skip_separators();
            if !self.eat(&TokenType::Comma) {
                self.skip_separators();
                self.expect(TokenType::RParen)?;
                break;
            }
        }
        Ok(params)
    }

    fn parse_generics(&mut self) -> ParseResult<Vec<String>> {
        let mut generics = Vec::new();
        if self.eat(&TokenType::Lt) {
            loop {
                let (name, _) = self.expect_identifier("a type parameter")?;
                generics.push(name);
                if !self.eat(&TokenType::Comma) {
                    self.expect(TokenType::Gt)?;
                    break;
                }
            }
        }
        Ok(generics)
    }

    fn parse_struct_decl(&mut self) -> ParseResult<Stmt> {
        let loc = self.loc();
        self.advance();
        let (name, _) = self.expect_identifier("a struct name")?;
        self.remember(&name);
        let generics = self.parse_generics()?;
        self.expect(TokenType::LBrace)?;
        let mut fields = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&TokenType::RBrace) {
                break;
            }
            let field_loc = self.loc();
            let (field_name, _) = self.expect_identifier("a field name")?;
            self.expect(TokenType::Colon)?;
            let ty = self.parse_type()?;
            fields.push(FieldDecl {
                name: field_name,
                ty,
                loc: field_loc,
            });
            self.skip_separators();
            if !self.eat(&TokenType::Comma) {
                self.skip_separators();
                self.expect(TokenType::RBrace)?;
                break;
            }
        }
        Ok(Stmt::StructDecl {
            name,
            generics,
            fields,
            loc,
        })
    }

    fn parse_enum_decl(&mut self) -> ParseResult<Stmt> {
        let loc = self.loc();
        self.advance();
        let (name, _) = self.expect_identifier("an enum name")?;
        self.remember(&name);
        let generics = self.parse_generics()?;
        self.expect(TokenType::LBrace)?;
        let mut variants = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&TokenType::RBrace) {
                break;
            }
            let variant_loc = self.loc();
            let (variant_name, _) = self.expect_identifier("a variant name")?;
            let mut payload = Vec::new();
            if self.eat(&TokenType::LParen) {
                loop {
                    payload.push(self.parse_type()?);
                    if !self.eat(&TokenType::Comma) {
                        self.expect(TokenType::RParen)?;
                        break;
                    }
                }
            }
            variants.push(VariantDecl {
                name: variant_name,
                payload,
                loc: variant_loc,
            });
            self.skip_separators();
            if !self.eat(&TokenType::Comma) {
                self.skip_separators();
                self.expect(TokenType::RBrace)?;
                break;
            }
        }
        Ok(Stmt::EnumDecl {
            name,
            generics,
            variants,
            loc,
        })
    }

    fn parse_while(&mut self) -> ParseResult<Stmt> {
        let loc = self.loc();
        self.advance();
        let cond = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::While { cond, body, loc })
    }

    fn parse_for(&mut self) -> ParseResult<Stmt> {
        let loc = self.loc();
        self.advance();
        let (var, _) = self.expect_identifier("a loop variable")?;
        self.remember(&var);
        self.expect(TokenType::In)?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::For {
            var,
            iterable,
            body,
            loc,
        })
    }

    fn parse_try(&mut self) -> ParseResult<Stmt> {
        let loc = self.loc();
        self.advance();
        let body = self.parse_block()?;
        let mut catch = None;
        let mut finally = None;

        // Clauses may sit on following lines, but a separator that is not
        // followed by one belongs to the next statement.
        let checkpoint = self.mark();
        self.skip_separators();
        if self.eat(&TokenType::Catch) {
            self.expect(TokenType::LParen)?;
            let (name, _) = self.expect_identifier("a catch binding")?;
            self.remember(&name);
            self.expect(TokenType::RParen)?;
            let catch_body = self.parse_block()?;
            catch = Some((name, catch_body));
        } else {
            self.restore(checkpoint);
        }

        let checkpoint = self.mark();
        self.skip_separators();
        if self.eat(&TokenType::Finally) {
            finally = Some(self.parse_block()?);
        } else {
            self.restore(checkpoint);
        }
        if catch.is_none() && finally.is_none() {
            return Err(NaabError::syntax(
                "try requires a catch or finally clause",
                loc,
            ));
        }
        Ok(Stmt::Try {
            body,
            catch,
            finally,
            loc,
        })
    }

    fn parse_import(&mut self) -> ParseResult<Stmt> {
        let loc = self.loc();
        self.advance();
        let (first, _) = self.expect_identifier("a module name")?;
        let mut path = vec![first];
        while self.eat(&TokenType::Dot) {
            let (next, _) = self.expect_identifier("a module segment")?;
            path.push(next);
        }
        let alias = if self.eat(&TokenType::As) {
            let (alias, _) = self.expect_identifier("an import alias")?;
            self.remember(&alias);
            Some(alias)
        } else {
            self.remember(path.last().expect("path is nonempty"));
            None
        };
        Ok(Stmt::Import { path, alias, loc })
    }

    /// `{ stmt* }` with separators between statements.
    pub(crate) fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.skip_separators();
        self.expect(TokenType::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&TokenType::RBrace) {
                break;
            }
            if self.at_eof() {
                return Err(self.unexpected("expected '}'"));
            }
            stmts.push(self.parse_statement()?);
            match self.peek_kind() {
                TokenType::Separator => self.skip_separators(),
                TokenType::RBrace => {}
                _ => return Err(self.unexpected("expected end of statement")),
            }
        }
        Ok(stmts)
    }

    // -- types --

    pub(crate) fn parse_type(&mut self) -> ParseResult<TypeExpr> {
        self.descend(|p| {
            let first = p.parse_single_type()?;
            if !p.check(&TokenType::Pipe) {
                return Ok(first);
            }
            let loc = first.loc().clone();
            let mut alternatives = vec![first];
            while p.eat(&TokenType::Pipe) {
                alternatives.push(p.parse_single_type()?);
            }
            let nullable = p.eat(&TokenType::Question);
            Ok(TypeExpr::Union {
                alternatives,
                nullable,
                loc,
            })
        })
    }

    fn parse_single_type(&mut self) -> ParseResult<TypeExpr> {
        let loc = self.loc();
        let (first, _) = self.expect_identifier("a type name")?;

        // `module.Type`: the prefix is a first-class part of the annotation.
        let (module, name) = if self.check(&TokenType::Dot)
            && matches!(self.peek_ahead(1), TokenType::Identifier(_))
        {
            self.advance();
            let (name, _) = self.expect_identifier("a type name")?;
            (Some(first), name)
        } else {
            (None, first)
        };

        let mut params = Vec::new();
        if self.eat(&TokenType::Lt) {
            loop {
                params.push(self.parse_type()?);
                if !self.eat(&TokenType::Comma) {
                    self.expect(TokenType::Gt)?;
                    break;
                }
            }
        }

        let nullable = self.eat(&TokenType::Question);
        Ok(TypeExpr::Named {
            module,
            name,
            params,
            nullable,
            loc,
        })
    }
}
