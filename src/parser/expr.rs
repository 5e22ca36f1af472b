//! Expression parsing: precedence climbing over the operator table.
//!
//! Lowest to highest: pipeline, logical-or, logical-and, equality,
//! comparison, range, additive, multiplicative, unary, power, postfix
//! (call/member/index), primary. Assignment is handled at statement level.

use crate::ast::{BinaryOp, Expr, MatchArm, Pattern, Stmt, TypeExpr, UnaryOp};
use crate::error::NaabError;
use crate::parser::{ParseResult, Parser};
use crate::token::{SourceLoc, TokenType};

impl<'a> Parser<'a> {
    pub(crate) fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.descend(|p| p.parse_pipeline())
    }

    /// `left |> right`. The right operand is kept unevaluated; the
    /// interpreter evaluates it only after the left value is in hand.
    fn parse_pipeline(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_or()?;
        while self.check(&TokenType::Pipeline) {
            let loc = self.loc();
            self.advance();
            self.skip_separators();
            let right = self.parse_or()?;
            expr = Expr::Pipeline {
                left: Box::new(expr),
                right: Box::new(right),
                loc,
            };
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_and()?;
        while self.check(&TokenType::OrOr) {
            let loc = self.loc();
            self.advance();
            let right = self.parse_and()?;
            expr = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(expr),
                right: Box::new(right),
                loc,
            };
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_equality()?;
        while self.check(&TokenType::AndAnd) {
            let loc = self.loc();
            self.advance();
            let right = self.parse_equality()?;
            expr = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(expr),
                right: Box::new(right),
                loc,
            };
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokenType::EqEq => BinaryOp::Eq,
                TokenType::NotEq => BinaryOp::NotEq,
                _ => break,
            };
            let loc = self.loc();
            self.advance();
            let right = self.parse_comparison()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                loc,
            };
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_range()?;
        loop {
            let op = match self.peek_kind() {
                TokenType::Lt => BinaryOp::Lt,
                TokenType::Gt => BinaryOp::Gt,
                TokenType::LtEq => BinaryOp::LtEq,
                TokenType::GtEq => BinaryOp::GtEq,
                _ => break,
            };
            let loc = self.loc();
            self.advance();
            let right = self.parse_range()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                loc,
            };
        }
        Ok(expr)
    }

    fn parse_range(&mut self) -> ParseResult<Expr> {
        let expr = self.parse_additive()?;
        if self.check(&TokenType::Range) {
            let loc = self.loc();
            self.advance();
            let end = self.parse_additive()?;
            return Ok(Expr::Range {
                start: Box::new(expr),
                end: Box::new(end),
                loc,
            });
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenType::Plus => BinaryOp::Add,
                TokenType::Minus => BinaryOp::Sub,
                _ => break,
            };
            let loc = self.loc();
            self.advance();
            let right = self.parse_multiplicative()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                loc,
            };
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenType::Star => BinaryOp::Mul,
                TokenType::Slash => BinaryOp::Div,
                TokenType::Percent => BinaryOp::Mod,
                _ => break,
            };
            let loc = self.loc();
            self.advance();
            let right = self.parse_unary()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                loc,
            };
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let loc = self.loc();
        match self.peek_kind() {
            TokenType::Minus => {
                self.advance();
                let operand = self.descend(|p| p.parse_unary())?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                    loc,
                })
            }
            TokenType::Bang => {
                self.advance();
                let operand = self.descend(|p| p.parse_unary())?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                    loc,
                })
            }
            TokenType::Await => {
                self.advance();
                let operand = self.descend(|p| p.parse_unary())?;
                Ok(Expr::Await {
                    operand: Box::new(operand),
                    loc,
                })
            }
            _ => self.parse_power(),
        }
    }

    /// `**` binds tighter than unary and is right-associative.
    fn parse_power(&mut self) -> ParseResult<Expr> {
        let base = self.parse_postfix()?;
        if self.check(&TokenType::StarStar) {
            let loc = self.loc();
            self.advance();
            let exponent = self.descend(|p| p.parse_power())?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
                loc,
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenType::LParen => {
                    let loc = self.loc();
                    self.advance();
                    let mut args = Vec::new();
                    loop {
                        self.skip_separators();
                        if self.eat(&TokenType::RParen) {
                            break;
                        }
                        args.push(self.parse_expression()?);
                        self.skip_separators();
                        if !self.eat(&TokenType::Comma) {
                            self.skip_separators();
                            self.expect(TokenType::RParen)?;
                            break;
                        }
                    }
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        loc,
                    };
                }
                TokenType::Dot => {
                    let loc = self.loc();
                    self.advance();
                    let (field, _) = self.expect_identifier("a member name")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        field,
                        loc,
                    };
                }
                TokenType::LBracket => {
                    let loc = self.loc();
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenType::RBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        loc,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let loc = self.loc();
        match self.peek_kind().clone() {
            TokenType::Null => {
                self.advance();
                Ok(Expr::Null(loc))
            }
            TokenType::True => {
                self.advance();
                Ok(Expr::Bool(true, loc))
            }
            TokenType::False => {
                self.advance();
                Ok(Expr::Bool(false, loc))
            }
            TokenType::Int(n) => {
                self.advance();
                Ok(Expr::Int(n, loc))
            }
            TokenType::Float(x) => {
                self.advance();
                Ok(Expr::Float(x, loc))
            }
            TokenType::Str(s) => {
                self.advance();
                Ok(Expr::Str(s, loc))
            }
            TokenType::Identifier(name) => {
                self.advance();
                Ok(Expr::Identifier(name, loc))
            }
            TokenType::LParen => {
                self.advance();
                self.skip_separators();
                let expr = self.parse_expression()?;
                self.skip_separators();
                self.expect(TokenType::RParen)?;
                Ok(expr)
            }
            TokenType::LBracket => self.parse_list_literal(),
            TokenType::LBrace => self.parse_dict_literal(),
            TokenType::Fn => self.parse_lambda(false),
            TokenType::Async if matches!(self.peek_ahead(1), TokenType::Fn) => {
                self.advance();
                self.parse_lambda(true)
            }
            TokenType::New => self.parse_struct_literal(),
            TokenType::If => self.parse_if_expr(),
            TokenType::Match => self.parse_match(),
            TokenType::PolyglotBlock {
                lang,
                bindings,
                body,
                json_return,
            } => {
                self.advance();
                Ok(Expr::Polyglot {
                    lang,
                    bindings,
                    body,
                    json_return,
                    loc,
                })
            }
            _ => Err(self.unexpected("expected an expression")),
        }
    }

    fn parse_list_literal(&mut self) -> ParseResult<Expr> {
        let loc = self.loc();
        self.expect(TokenType::LBracket)?;
        let mut elements = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&TokenType::RBracket) {
                break;
            }
            elements.push(self.parse_expression()?);
            self.limits
                .check_literal_elements(elements.len())
                .map_err(|e| e.at(loc.clone()))?;
            self.skip_separators();
            if !self.eat(&TokenType::Comma) {
                self.skip_separators();
                self.expect(TokenType::RBracket)?;
                break;
            }
        }
        Ok(Expr::List { elements, loc })
    }

    /// `{ key: value, ... }`. Keys are bare identifiers or string literals.
    fn parse_dict_literal(&mut self) -> ParseResult<Expr> {
        let loc = self.loc();
        self.expect(TokenType::LBrace)?;
        let mut entries = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&TokenType::RBrace) {
                break;
            }
            let key = match self.peek_kind().clone() {
                TokenType::Str(s) => {
                    self.advance();
                    s
                }
                TokenType::Identifier(name) => {
                    self.advance();
                    name
                }
                _ => return Err(self.unexpected("expected a dict key")),
            };
            self.expect(TokenType::Colon)?;
            let value = self.parse_expression()?;
            entries.push((key, value));
            self.limits
                .check_literal_elements(entries.len())
                .map_err(|e| e.at(loc.clone()))?;
            self.skip_separators();
            if !self.eat(&TokenType::Comma) {
                self.skip_separators();
                self.expect(TokenType::RBrace)?;
                break;
            }
        }
        Ok(Expr::Dict { entries, loc })
    }

    pub(crate) fn parse_lambda(&mut self, is_async: bool) -> ParseResult<Expr> {
        let loc = self.loc();
        self.expect(TokenType::Fn)?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(Expr::Lambda {
            params,
            body,
            is_async,
            loc,
        })
    }

    /// `new [module.]Name[<args>] { field: value, ... }`.
    fn parse_struct_literal(&mut self) -> ParseResult<Expr> {
        let loc = self.loc();
        self.expect(TokenType::New)?;
        let (first, _) = self.expect_identifier("a struct name")?;
        let (module, name) = if self.check(&TokenType::Dot) {
            self.advance();
            let (name, _) = self.expect_identifier("a struct name")?;
            (Some(first), name)
        } else {
            (None, first)
        };

        let mut type_args: Vec<TypeExpr> = Vec::new();
        if self.eat(&TokenType::Lt) {
            loop {
                type_args.push(self.parse_type()?);
                if !self.eat(&TokenType::Comma) {
                    self.expect(TokenType::Gt)?;
                    break;
                }
            }
        }

        self.expect(TokenType::LBrace)?;
        let mut fields = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&TokenType::RBrace) {
                break;
            }
            let (field_name, _) = self.expect_identifier("a field name")?;
            self.expect(TokenType::Colon)?;
            let value = self.parse_expression()?;
            fields.push((field_name, value));
            self.skip_separators();
            if !self.eat(&TokenType::Comma) {
                self.skip_separators();
                self.expect(TokenType::RBrace)?;
                break;
            }
        }
        Ok(Expr::StructLiteral {
            module,
            name,
            type_args,
            fields,
            loc,
        })
    }

    fn parse_if_expr(&mut self) -> ParseResult<Expr> {
        let loc = self.loc();
        self.expect(TokenType::If)?;
        let cond = self.parse_expression()?;
        let then_body = self.parse_block()?;
        let mut else_body = None;
        // `else` may sit on the next line.
        let checkpoint = self.mark();
        self.skip_separators();
        if self.eat(&TokenType::Else) {
            if self.check(&TokenType::If) {
                let nested_loc = self.loc();
                let nested = self.parse_if_expr()?;
                else_body = Some(vec![Stmt::Expr {
                    expr: nested,
                    loc: nested_loc,
                }]);
            } else {
                else_body = Some(self.parse_block()?);
            }
        } else {
            self.restore(checkpoint);
        }
        Ok(Expr::If {
            cond: Box::new(cond),
            then_body,
            else_body,
            loc,
        })
    }

    fn parse_match(&mut self) -> ParseResult<Expr> {
        let loc = self.loc();
        self.expect(TokenType::Match)?;
        let subject = self.parse_expression()?;
        self.expect(TokenType::LBrace)?;
        let mut arms = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&TokenType::RBrace) {
                break;
            }
            let arm_loc = self.loc();
            let pattern = self.parse_pattern()?;
            self.expect(TokenType::Arrow)?;
            let body = if self.check(&TokenType::LBrace) {
                self.parse_block()?
            } else {
                let expr_loc = self.loc();
                let expr = self.parse_expression()?;
                vec![Stmt::Expr {
                    expr,
                    loc: expr_loc,
                }]
            };
            arms.push(MatchArm {
                pattern,
                body,
                loc: arm_loc,
            });
            self.skip_separators();
            if !self.eat(&TokenType::Comma) {
                self.skip_separators();
                self.expect(TokenType::RBrace)?;
                break;
            }
        }
        if arms.is_empty() {
            return Err(NaabError::syntax("match requires at least one arm", loc));
        }
        Ok(Expr::Match {
            subject: Box::new(subject),
            arms,
            loc,
        })
    }

    fn parse_pattern(&mut self) -> ParseResult<Pattern> {
        let loc = self.loc();
        match self.peek_kind().clone() {
            TokenType::Underscore => {
                self.advance();
                Ok(Pattern::Wildcard(loc))
            }
            TokenType::Int(n) => {
                self.advance();
                Ok(Pattern::Literal(Expr::Int(n, loc)))
            }
            TokenType::Float(x) => {
                self.advance();
                Ok(Pattern::Literal(Expr::Float(x, loc)))
            }
            TokenType::Minus => {
                self.advance();
                match self.peek_kind().clone() {
                    TokenType::Int(n) => {
                        self.advance();
                        Ok(Pattern::Literal(Expr::Int(-n, loc)))
                    }
                    TokenType::Float(x) => {
                        self.advance();
                        Ok(Pattern::Literal(Expr::Float(-x, loc)))
                    }
                    _ => Err(self.unexpected("expected a numeric literal")),
                }
            }
            TokenType::Str(s) => {
                self.advance();
                Ok(Pattern::Literal(Expr::Str(s, loc)))
            }
            TokenType::True => {
                self.advance();
                Ok(Pattern::Literal(Expr::Bool(true, loc)))
            }
            TokenType::False => {
                self.advance();
                Ok(Pattern::Literal(Expr::Bool(false, loc)))
            }
            TokenType::Null => {
                self.advance();
                Ok(Pattern::Literal(Expr::Null(loc)))
            }
            TokenType::Identifier(_) => self.parse_variant_pattern(loc),
            _ => Err(self.unexpected("expected a pattern")),
        }
    }

    /// `Variant`, `Enum.Variant`, `module.Enum.Variant`, each optionally
    /// followed by `(binding, ...)`.
    fn parse_variant_pattern(&mut self, loc: SourceLoc) -> ParseResult<Pattern> {
        let (first, _) = self.expect_identifier("a variant name")?;
        let mut segments = vec![first];
        while self.check(&TokenType::Dot) {
            self.advance();
            let (next, _) = self.expect_identifier("a variant name")?;
            segments.push(next);
        }
        let name = segments.pop().expect("segments is nonempty");
        let (module, enum_name) = match segments.len() {
            0 => (None, None),
            1 => (None, Some(segments.remove(0))),
            _ => {
                let module = segments.remove(0);
                (Some(module), Some(segments.remove(0)))
            }
        };

        let mut bindings = Vec::new();
        if self.eat(&TokenType::LParen) {
            loop {
                if self.eat(&TokenType::RParen) {
                    break;
                }
                match self.peek_kind().clone() {
                    TokenType::Identifier(binding) => {
                        self.advance();
                        bindings.push(binding);
                    }
                    TokenType::Underscore => {
                        self.advance();
                        bindings.push("_".to_string());
                    }
                    _ => return Err(self.unexpected("expected a payload binding")),
                }
                if !self.eat(&TokenType::Comma) {
                    self.expect(TokenType::RParen)?;
                    break;
                }
            }
        }
        Ok(Pattern::Variant {
            module,
            enum_name,
            name,
            bindings,
            loc,
        })
    }
}
