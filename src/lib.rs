pub mod audit;
pub mod ast;
pub mod config;
pub mod env;
pub mod error;
pub mod gc;
pub mod interpreter;
pub mod lexer;
pub mod limits;
pub mod modules;
pub mod parser;
pub mod polyglot;
pub mod stdlib;
pub mod suggest;
pub mod token;
pub mod types;
pub mod validate;
pub mod value;

pub use audit::{AuditEntry, AuditLog, AuditVerifier, VerifyFailure};
pub use config::RuntimeConfig;
pub use env::Env;
pub use error::{ErrorKind, Frame, NaabError, PolyglotDetail};
pub use interpreter::{Interpreter, RunOutcome};
pub use lexer::Lexer;
pub use limits::Limits;
pub use parser::Parser;
pub use polyglot::{BlockOutput, ExecOptions, ExecutorRegistry, Payload, PolyglotExecutor};
pub use token::{SourceLoc, Token, TokenType};
pub use types::{EnumDef, StructDef, TypeRegistry};
pub use value::Value;

use std::path::Path;

/// Parse and execute NAAb source text under the given configuration.
///
/// This is the embedding entry point: the front-end reads the file, the core
/// enforces the input caps, lexes, parses, and interprets. Collected `print`
/// output is returned alongside the final expression value.
pub fn run_source(
    source: &str,
    file: &Path,
    config: RuntimeConfig,
) -> Result<RunOutcome, NaabError> {
    config.limits.check_source_len(source.len(), file)?;
    let mut interp = Interpreter::new(config);
    interp.run_file(source, file)
}
