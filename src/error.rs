//! Runtime and load-time errors.
//!
//! One error type flows through the whole core. Each carries a kind from the
//! fixed taxonomy, a message, the source location it was raised at, and the
//! call-stack frames it unwound past. User-visible rendering (one-line
//! summary, stack trace, caret underline, "did you mean?") lives here too.

use std::fmt;

use crate::token::SourceLoc;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Type,
    Name,
    Arithmetic,
    Index,
    Key,
    Path,
    Polyglot,
    Import,
    StackOverflow,
    ResourceLimit,
    /// A plain user `throw` with no runtime kind.
    User,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Name => "NameError",
            ErrorKind::Arithmetic => "ArithmeticError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Key => "KeyError",
            ErrorKind::Path => "PathError",
            ErrorKind::Polyglot => "PolyglotError",
            ErrorKind::Import => "ImportError",
            ErrorKind::StackOverflow => "StackOverflowError",
            ErrorKind::ResourceLimit => "ResourceLimitError",
            ErrorKind::User => "Error",
        }
    }

    /// Whether user code may observe this error in a `catch` clause.
    /// Syntax errors surface at load; resource-limit breaches abort the run.
    pub fn catchable(&self) -> bool {
        !matches!(self, ErrorKind::Syntax | ErrorKind::ResourceLimit)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic call-stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub function: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// Extra context on errors that crossed a foreign-language boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolyglotDetail {
    pub language: String,
    /// Foreign error class name, when the runtime reports one.
    pub foreign_type: Option<String>,
    /// Line within the polyglot block body, not the enclosing NAAb file.
    pub block_line: Option<u32>,
    pub timeout: bool,
}

#[derive(Debug, Clone)]
pub struct NaabError {
    pub kind: ErrorKind,
    pub message: String,
    pub loc: Option<SourceLoc>,
    /// Frames accumulated while unwinding, innermost first.
    pub stack: Vec<Frame>,
    /// The raw value from a user `throw`, bound at the catch site.
    pub payload: Option<Value>,
    /// The error a finally-clause throw displaced, if any.
    pub cause: Option<Box<NaabError>>,
    pub polyglot: Option<PolyglotDetail>,
    /// Offered when an undefined name is close to a known one.
    pub suggestion: Option<String>,
}

impl NaabError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        NaabError {
            kind,
            message: message.into(),
            loc: None,
            stack: Vec::new(),
            payload: None,
            cause: None,
            polyglot: None,
            suggestion: None,
        }
    }

    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }

    pub fn with_payload(mut self, value: Value) -> Self {
        self.payload = Some(value);
        self
    }

    pub fn with_cause(mut self, cause: NaabError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn syntax(message: impl Into<String>, loc: SourceLoc) -> Self {
        NaabError::new(ErrorKind::Syntax, message).at(loc)
    }

    /// Record a frame while the error unwinds past a call.
    pub fn push_frame(&mut self, frame: Frame) {
        self.stack.push(frame);
    }

    /// Render the user-visible failure report: summary line, stack trace, and
    /// a caret pointer into the offending source line when available.
    ///
    /// `production` scrubs absolute paths down to their final component.
    pub fn render(&self, source: Option<&str>, production: bool) -> String {
        let mut out = format!("{}: {}", self.kind, self.scrubbed_message(production));

        for frame in &self.stack {
            let file = if production {
                scrub_path(&frame.file)
            } else {
                frame.file.clone()
            };
            out.push_str(&format!(
                "\n  at {} ({}:{}:{})",
                frame.function, file, frame.line, frame.column
            ));
        }

        if let (Some(loc), Some(src)) = (&self.loc, source) {
            if let Some(line_text) = src.lines().nth(loc.line.saturating_sub(1) as usize) {
                let col = loc.column.saturating_sub(1) as usize;
                out.push_str(&format!(
                    "\n{:4} | {}\n     | {}^",
                    loc.line,
                    line_text,
                    " ".repeat(col.min(line_text.len()))
                ));
            }
        }

        if let Some(suggestion) = &self.suggestion {
            out.push_str(&format!("\n     | help: did you mean '{}'?", suggestion));
        }

        out
    }

    fn scrubbed_message(&self, production: bool) -> String {
        if !production {
            return self.message.clone();
        }
        self.message
            .split_whitespace()
            .map(|word| {
                if word.starts_with('/') && word.len() > 1 {
                    scrub_path(word)
                } else {
                    word.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn scrub_path(path: &str) -> String {
    std::path::Path::new(path.trim_end_matches(|c: char| c == ':' || c == ',' || c == '\''))
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

impl fmt::Display for NaabError {
    /// Just the summary line; `render` is the full report.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(loc) = &self.loc {
            write!(f, " ({})", loc)?;
        }
        Ok(())
    }
}

impl std::error::Error for NaabError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn loc(line: u32, column: u32) -> SourceLoc {
        SourceLoc::new(Arc::from("main.naab"), line, column)
    }

    #[test]
    fn kinds_render_their_names() {
        assert_eq!(ErrorKind::Type.as_str(), "TypeError");
        assert_eq!(ErrorKind::ResourceLimit.as_str(), "ResourceLimitError");
    }

    #[test]
    fn syntax_and_resource_limit_are_uncatchable() {
        assert!(!ErrorKind::Syntax.catchable());
        assert!(!ErrorKind::ResourceLimit.catchable());
        assert!(ErrorKind::Type.catchable());
        assert!(ErrorKind::Polyglot.catchable());
    }

    #[test]
    fn render_points_caret_at_column() {
        let err = NaabError::new(ErrorKind::Name, "undefined name 'countr'").at(loc(2, 5));
        let report = err.render(Some("let a = 1\nlet countr = 2"), false);
        assert!(report.contains("NameError"), "{}", report);
        assert!(report.contains("   2 | let countr = 2"), "{}", report);
        assert!(report.contains("    ^"), "{}", report);
    }

    #[test]
    fn render_includes_stack_frames() {
        let mut err = NaabError::new(ErrorKind::User, "ouch");
        err.push_frame(Frame {
            function: "inner".into(),
            file: "main.naab".into(),
            line: 4,
            column: 3,
        });
        let report = err.render(None, false);
        assert!(report.contains("at inner (main.naab:4:3)"), "{}", report);
    }

    #[test]
    fn production_mode_scrubs_absolute_paths() {
        let err = NaabError::new(
            ErrorKind::Path,
            "rejected path /home/alice/secrets/key.pem outside allow-list",
        );
        let report = err.render(None, true);
        assert!(!report.contains("/home/alice"), "{}", report);
        assert!(report.contains("key.pem"), "{}", report);
    }

    #[test]
    fn suggestion_appears_in_report() {
        let err = NaabError::new(ErrorKind::Name, "undefined name 'countr'")
            .with_suggestion(Some("counter".into()));
        assert!(err.render(None, false).contains("did you mean 'counter'?"));
    }
}
