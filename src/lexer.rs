//! Lexer: NAAb source text to a token stream.
//!
//! Tokens carry 1-indexed line/column locations. Polyglot block bodies are
//! captured line-oriented and verbatim (indentation preserved), since the
//! foreign side may be whitespace-sensitive.

use std::path::Path;
use std::sync::Arc;

use crate::error::NaabError;
use crate::limits::Limits;
use crate::token::{BindingSpec, SourceLoc, Token, TokenType};

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    file: Arc<str>,
    limits: &'a Limits,
    /// Paren/bracket nesting; newlines inside are not statement separators.
    group_depth: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &str, file: &Path, limits: &'a Limits) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            file: Arc::from(file.to_string_lossy().as_ref()),
            limits,
            group_depth: 0,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, NaabError> {
        // Shebang tolerated on line 1; `#` starts a comment anyway, but a
        // shebang may contain arbitrary text so consume it wholesale.
        if self.peek() == Some('#') && self.peek_at(1) == Some('!') {
            self.skip_to_line_end();
        }

        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '\n' => {
                    let loc = self.loc();
                    self.advance();
                    if self.group_depth == 0 {
                        self.push_separator(loc);
                    }
                }
                ';' => {
                    let loc = self.loc();
                    self.advance();
                    self.push_separator(loc);
                }
                '/' if self.peek_at(1) == Some('/') => self.skip_to_line_end(),
                '#' => self.skip_to_line_end(),
                '/' if self.peek_at(1) == Some('*') => self.skip_block_comment()?,
                '"' | '\'' => self.lex_string(c)?,
                '<' if self.peek_at(1) == Some('<') => self.lex_polyglot()?,
                c if c.is_ascii_digit() => self.lex_number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.lex_number()?,
                c if c.is_alphabetic() || c == '_' => self.lex_word(),
                _ => self.lex_operator()?,
            }
        }

        // Drop separators that immediately precede `|>` so a pipeline may
        // continue on the next line.
        let mut tokens = Vec::with_capacity(self.tokens.len() + 1);
        let mut iter = self.tokens.into_iter().peekable();
        while let Some(tok) = iter.next() {
            if matches!(tok.kind, TokenType::Separator) {
                if let Some(next) = iter.peek() {
                    if matches!(next.kind, TokenType::Pipeline) {
                        continue;
                    }
                }
            }
            tokens.push(tok);
        }

        tokens.push(Token::new(
            TokenType::Eof,
            "",
            SourceLoc::new(self.file.clone(), self.line, self.column),
        ));
        Ok(tokens)
    }

    // -- scanning helpers --

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if let Some(c) = c {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        c
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.file.clone(), self.line, self.column)
    }

    fn push(&mut self, kind: TokenType, lexeme: impl Into<String>, loc: SourceLoc) {
        self.tokens.push(Token::new(kind, lexeme, loc));
    }

    fn push_separator(&mut self, loc: SourceLoc) {
        // Runs of blank lines or semicolons collapse to one separator.
        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            Some(TokenType::Separator) | None
        ) {
            self.push(TokenType::Separator, "", loc);
        }
    }

    fn skip_to_line_end(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), NaabError> {
        let start = self.loc();
        self.advance();
        self.advance();
        loop {
            match self.peek() {
                Some('*') if self.peek_at(1) == Some('/') => {
                    self.advance();
                    self.advance();
                    return Ok(());
                }
                Some(_) => {
                    self.advance();
                }
                None => return Err(NaabError::syntax("unterminated block comment", start)),
            }
        }
    }

    // -- literals --

    fn lex_string(&mut self, quote: char) -> Result<(), NaabError> {
        let start = self.loc();
        self.advance();
        let mut text = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(NaabError::syntax("unterminated string literal", start));
                }
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escape_loc = self.loc();
                    match self.advance() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('r') => text.push('\r'),
                        Some('\\') => text.push('\\'),
                        Some('"') => text.push('"'),
                        Some('\'') => text.push('\''),
                        Some('0') => text.push('\0'),
                        Some(other) => {
                            return Err(NaabError::syntax(
                                format!("unknown escape sequence '\\{}'", other),
                                escape_loc,
                            ));
                        }
                        None => {
                            return Err(NaabError::syntax("unterminated string literal", start));
                        }
                    }
                }
                Some(c) => text.push(c),
            }
            self.limits.check_string_len(text.len()).map_err(|e| e.at(start.clone()))?;
        }
        self.push(TokenType::Str(text.clone()), text, start);
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), NaabError> {
        let start = self.loc();
        let mut text = String::new();
        let mut is_float = false;

        if self.peek() == Some('.') {
            // Leading decimal point: `.5`
            is_float = true;
            text.push('.');
            self.advance();
        }

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else if c == '.' && !is_float {
                // Two dots form the range operator, not a float.
                if self.peek_at(1) == Some('.') {
                    break;
                }
                is_float = true;
                text.push('.');
                self.advance();
            } else {
                break;
            }
        }

        if is_float {
            let value: f64 = text.parse().map_err(|_| {
                NaabError::syntax(format!("malformed float literal '{}'", text), start.clone())
            })?;
            self.push(TokenType::Float(value), text, start);
        } else {
            let value: i64 = text.parse().map_err(|_| {
                NaabError::syntax(
                    format!("integer literal '{}' overflows 64 bits", text),
                    start.clone(),
                )
            })?;
            self.push(TokenType::Int(value), text, start);
        }
        Ok(())
    }

    fn lex_word(&mut self) {
        let start = self.loc();
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = if word == "_" {
            TokenType::Underscore
        } else {
            TokenType::keyword(&word).unwrap_or(TokenType::Identifier(word.clone()))
        };
        self.push(kind, word, start);
    }

    // -- polyglot blocks --

    /// `<<lang[a, ref b] -> JSON` ... `>>`.
    ///
    /// Single-line form closes with `>>` on the open line. Multi-line bodies
    /// run verbatim until a line whose column one is `>>`.
    fn lex_polyglot(&mut self) -> Result<(), NaabError> {
        let start = self.loc();
        self.advance();
        self.advance();

        let mut lang = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '+' || c == '#' {
                lang.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if lang.is_empty() {
            return Err(NaabError::syntax(
                "expected language tag after '<<'",
                start,
            ));
        }

        let bindings = if self.peek() == Some('[') {
            self.lex_binding_list(&start)?
        } else {
            Vec::new()
        };

        // Optional `-> JSON` return-framing directive.
        let mut json_return = false;
        self.skip_inline_spaces();
        if self.peek() == Some('-') && self.peek_at(1) == Some('>') {
            let arrow_loc = self.loc();
            self.advance();
            self.advance();
            self.skip_inline_spaces();
            let mut word = String::new();
            while let Some(c) = self.peek() {
                if c.is_alphanumeric() {
                    word.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            if !word.eq_ignore_ascii_case("json") {
                return Err(NaabError::syntax(
                    format!("unknown return directive '-> {}'", word),
                    arrow_loc,
                ));
            }
            json_return = true;
        }

        let body = self.capture_body(&start)?;
        self.limits
            .check_block_len(body.len())
            .map_err(|e| e.at(start.clone()))?;

        self.push(
            TokenType::PolyglotBlock {
                lang: lang.clone(),
                bindings,
                body,
                json_return,
            },
            format!("<<{}", lang),
            start,
        );
        Ok(())
    }

    fn lex_binding_list(&mut self, open: &SourceLoc) -> Result<Vec<BindingSpec>, NaabError> {
        self.advance();
        let mut bindings = Vec::new();
        loop {
            self.skip_inline_spaces();
            match self.peek() {
                Some(']') => {
                    self.advance();
                    return Ok(bindings);
                }
                Some(c) if c.is_alphabetic() || c == '_' => {
                    let mut word = String::new();
                    while let Some(c) = self.peek() {
                        if c.is_alphanumeric() || c == '_' {
                            word.push(c);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    let by_ref = word == "ref";
                    if by_ref {
                        self.skip_inline_spaces();
                        word.clear();
                        while let Some(c) = self.peek() {
                            if c.is_alphanumeric() || c == '_' {
                                word.push(c);
                                self.advance();
                            } else {
                                break;
                            }
                        }
                        if word.is_empty() {
                            return Err(NaabError::syntax(
                                "expected binding name after 'ref'",
                                open.clone(),
                            ));
                        }
                    }
                    bindings.push(BindingSpec { name: word, by_ref });
                    self.skip_inline_spaces();
                    if self.peek() == Some(',') {
                        self.advance();
                    }
                }
                _ => {
                    return Err(NaabError::syntax(
                        "unterminated polyglot bindings list",
                        open.clone(),
                    ));
                }
            }
        }
    }

    fn capture_body(&mut self, open: &SourceLoc) -> Result<String, NaabError> {
        // Single-line: `>>` appears before the newline.
        let mut offset = 0;
        while let Some(c) = self.peek_at(offset) {
            if c == '\n' {
                break;
            }
            if c == '>' && self.peek_at(offset + 1) == Some('>') {
                let mut body = String::new();
                for _ in 0..offset {
                    body.push(self.advance().unwrap());
                }
                self.advance();
                self.advance();
                // Single-line bodies shed their delimiter padding; only
                // multi-line capture is indentation-sensitive.
                return Ok(body.trim().to_string());
            }
            offset += 1;
        }

        // Multi-line: consume the rest of the open line, then capture verbatim
        // lines until `>>` in column one.
        while let Some(c) = self.peek() {
            self.advance();
            if c == '\n' {
                break;
            }
        }
        if self.pos >= self.chars.len() {
            return Err(NaabError::syntax(
                "unterminated polyglot block",
                open.clone(),
            ));
        }

        let mut body = String::new();
        loop {
            if self.peek().is_none() {
                return Err(NaabError::syntax(
                    "unterminated polyglot block",
                    open.clone(),
                ));
            }
            // At column one here.
            if self.peek() == Some('>') && self.peek_at(1) == Some('>') {
                self.advance();
                self.advance();
                return Ok(body);
            }
            loop {
                match self.advance() {
                    Some('\n') => {
                        body.push('\n');
                        break;
                    }
                    Some(c) => body.push(c),
                    None => break,
                }
            }
            self.limits
                .check_block_len(body.len())
                .map_err(|e| e.at(open.clone()))?;
        }
    }

    fn skip_inline_spaces(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.advance();
        }
    }

    // -- operators & punctuation --

    fn lex_operator(&mut self) -> Result<(), NaabError> {
        let start = self.loc();
        let c = self.advance().unwrap();
        let kind = match c {
            '+' => TokenType::Plus,
            '-' => {
                if self.peek() == Some('>') {
                    self.advance();
                    TokenType::Arrow
                } else {
                    TokenType::Minus
                }
            }
            '*' => {
                if self.peek() == Some('*') {
                    self.advance();
                    TokenType::StarStar
                } else {
                    TokenType::Star
                }
            }
            '/' => TokenType::Slash,
            '%' => TokenType::Percent,
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenType::EqEq
                } else {
                    TokenType::Assign
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenType::NotEq
                } else {
                    TokenType::Bang
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenType::LtEq
                } else {
                    TokenType::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenType::GtEq
                } else {
                    TokenType::Gt
                }
            }
            '&' => {
                if self.peek() == Some('&') {
                    self.advance();
                    TokenType::AndAnd
                } else {
                    return Err(NaabError::syntax("unexpected character '&'", start));
                }
            }
            '|' => match self.peek() {
                Some('|') => {
                    self.advance();
                    TokenType::OrOr
                }
                Some('>') => {
                    self.advance();
                    TokenType::Pipeline
                }
                _ => TokenType::Pipe,
            },
            '.' => {
                if self.peek() == Some('.') {
                    self.advance();
                    TokenType::Range
                } else {
                    TokenType::Dot
                }
            }
            '?' => TokenType::Question,
            '(' => {
                self.group_depth += 1;
                TokenType::LParen
            }
            ')' => {
                self.group_depth = self.group_depth.saturating_sub(1);
                TokenType::RParen
            }
            '[' => {
                self.group_depth += 1;
                TokenType::LBracket
            }
            ']' => {
                self.group_depth = self.group_depth.saturating_sub(1);
                TokenType::RBracket
            }
            '{' => TokenType::LBrace,
            '}' => TokenType::RBrace,
            ',' => TokenType::Comma,
            ':' => TokenType::Colon,
            other => {
                return Err(NaabError::syntax(
                    format!("unexpected character '{}'", other),
                    start,
                ));
            }
        };
        self.push(kind, "", start);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::path::PathBuf;

    fn lex(source: &str) -> Vec<Token> {
        let limits = Limits::default();
        Lexer::new(source, &PathBuf::from("test.naab"), &limits)
            .tokenize()
            .expect("lex should succeed")
    }

    fn lex_err(source: &str) -> NaabError {
        let limits = Limits::default();
        Lexer::new(source, &PathBuf::from("test.naab"), &limits)
            .tokenize()
            .expect_err("lex should fail")
    }

    fn kinds(source: &str) -> Vec<TokenType> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn eof_is_emitted_exactly_once() {
        let toks = lex("");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].kind, TokenType::Eof);
    }

    #[test]
    fn locations_are_one_indexed() {
        let toks = lex("let x = 1");
        assert_eq!(toks[0].loc.line, 1);
        assert_eq!(toks[0].loc.column, 1);
        assert_eq!(toks[1].loc.column, 5);
    }

    #[test]
    fn range_operator_is_not_a_float() {
        let k = kinds("1..5");
        assert_eq!(
            k,
            vec![
                TokenType::Int(1),
                TokenType::Range,
                TokenType::Int(5),
                TokenType::Eof
            ]
        );
    }

    #[test]
    fn leading_and_trailing_decimal_floats() {
        assert_eq!(kinds(".5")[0], TokenType::Float(0.5));
        assert_eq!(kinds("5.")[0], TokenType::Float(5.0));
        assert_eq!(kinds("1.25")[0], TokenType::Float(1.25));
    }

    #[test]
    fn int_literal_boundary() {
        assert_eq!(kinds("9223372036854775807")[0], TokenType::Int(i64::MAX));
        let err = lex_err("9223372036854775808");
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.contains("overflow"), "{}", err.message);
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\tc\\\"\'\0\r""#)[0],
            TokenType::Str("a\nb\tc\\\"'\0\r".into())
        );
    }

    #[test]
    fn single_quoted_strings() {
        assert_eq!(kinds("'hi'")[0], TokenType::Str("hi".into()));
    }

    #[test]
    fn unknown_escape_is_syntax_error() {
        let err = lex_err(r#""\q""#);
        assert!(err.message.contains("escape"), "{}", err.message);
    }

    #[test]
    fn unterminated_string_is_syntax_error() {
        assert_eq!(lex_err("\"abc").kind, ErrorKind::Syntax);
    }

    #[test]
    fn comments_are_skipped() {
        let k = kinds("1 // c\n# d\n/* e\ne */ 2");
        assert!(k.contains(&TokenType::Int(1)));
        assert!(k.contains(&TokenType::Int(2)));
    }

    #[test]
    fn shebang_line_is_tolerated() {
        let k = kinds("#!/usr/bin/env naab\nlet x = 1");
        assert!(k.contains(&TokenType::Let));
    }

    #[test]
    fn semicolons_and_newlines_both_separate() {
        let k = kinds("1; 2\n3");
        let separators = k
            .iter()
            .filter(|t| matches!(t, TokenType::Separator))
            .count();
        assert_eq!(separators, 2);
    }

    #[test]
    fn newlines_inside_parens_do_not_separate() {
        let k = kinds("f(\n1,\n2\n)");
        assert!(!k.contains(&TokenType::Separator));
    }

    #[test]
    fn newline_before_pipeline_continues_expression() {
        let k = kinds("x\n|> f");
        assert!(!k.contains(&TokenType::Separator));
        assert!(k.contains(&TokenType::Pipeline));
    }

    #[test]
    fn single_line_polyglot_block() {
        let k = kinds("let x = <<python[] 1 + 1 >>");
        let block = k
            .iter()
            .find(|t| matches!(t, TokenType::PolyglotBlock { .. }))
            .expect("block token");
        if let TokenType::PolyglotBlock {
            lang,
            body,
            bindings,
            json_return,
        } = block
        {
            assert_eq!(lang, "python");
            assert_eq!(body.trim(), "1 + 1");
            assert!(bindings.is_empty());
            assert!(!json_return);
        }
    }

    #[test]
    fn multiline_body_preserves_indentation() {
        let source = "let r = <<python[x]\nif x:\n    y = 1\n>>";
        let k = kinds(source);
        if let Some(TokenType::PolyglotBlock { body, bindings, .. }) = k
            .iter()
            .find(|t| matches!(t, TokenType::PolyglotBlock { .. }))
        {
            assert_eq!(body, "if x:\n    y = 1\n");
            assert_eq!(bindings.len(), 1);
            assert_eq!(bindings[0].name, "x");
        } else {
            panic!("no block token");
        }
    }

    #[test]
    fn close_delimiter_mid_line_stays_in_body() {
        let source = "let r = <<shell[]\necho '>>' done\n>>";
        if let Some(TokenType::PolyglotBlock { body, .. }) = kinds(source)
            .iter()
            .find(|t| matches!(t, TokenType::PolyglotBlock { .. }))
        {
            assert!(body.contains(">>"), "body: {:?}", body);
        } else {
            panic!("no block token");
        }
    }

    #[test]
    fn json_return_directive() {
        let k = kinds("let r = <<python[a, ref b] -> JSON\nprint(1)\n>>");
        if let Some(TokenType::PolyglotBlock {
            bindings,
            json_return,
            ..
        }) = k
            .iter()
            .find(|t| matches!(t, TokenType::PolyglotBlock { .. }))
        {
            assert!(*json_return);
            assert_eq!(bindings[0].name, "a");
            assert!(!bindings[0].by_ref);
            assert_eq!(bindings[1].name, "b");
            assert!(bindings[1].by_ref);
        } else {
            panic!("no block token");
        }
    }

    #[test]
    fn unterminated_polyglot_block_fails() {
        assert_eq!(lex_err("let x = <<python[]\n1 + 1\n").kind, ErrorKind::Syntax);
    }

    #[test]
    fn operators_lex_distinctly() {
        let k = kinds("a |> b ** c != d .. e");
        assert!(k.contains(&TokenType::Pipeline));
        assert!(k.contains(&TokenType::StarStar));
        assert!(k.contains(&TokenType::NotEq));
        assert!(k.contains(&TokenType::Range));
    }
}
