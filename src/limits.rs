//! Input caps enforced at the source boundary.
//!
//! Every external input crosses one of these checks before the lexer or
//! interpreter sees it. Breaching a cap raises `ResourceLimitError`, which is
//! not catchable by user code.

use std::path::Path;

use serde::Deserialize;

use crate::error::{ErrorKind, NaabError};

/// 10 MiB source file cap.
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 10 * 1024 * 1024;
/// 1 MiB cap on a single string literal.
pub const DEFAULT_MAX_STRING_BYTES: usize = 1024 * 1024;
/// 1 MiB cap on a polyglot block body.
pub const DEFAULT_MAX_BLOCK_BYTES: usize = 1024 * 1024;
/// Parser recursion depth cap.
pub const DEFAULT_MAX_PARSE_DEPTH: usize = 1_000;
/// Interpreter call depth cap.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 10_000;
/// Element cap for a single list or dict literal.
pub const DEFAULT_MAX_LITERAL_ELEMENTS: usize = 1_000_000;

/// Configurable input caps (defaults above).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_source_bytes: usize,
    pub max_string_bytes: usize,
    pub max_block_bytes: usize,
    pub max_parse_depth: usize,
    pub max_call_depth: usize,
    pub max_literal_elements: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_string_bytes: DEFAULT_MAX_STRING_BYTES,
            max_block_bytes: DEFAULT_MAX_BLOCK_BYTES,
            max_parse_depth: DEFAULT_MAX_PARSE_DEPTH,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_literal_elements: DEFAULT_MAX_LITERAL_ELEMENTS,
        }
    }
}

impl Limits {
    /// Reject a source file larger than the cap. Exactly at the cap is fine.
    pub fn check_source_len(&self, len: usize, file: &Path) -> Result<(), NaabError> {
        if len > self.max_source_bytes {
            return Err(NaabError::new(
                ErrorKind::ResourceLimit,
                format!(
                    "source file '{}' is {} bytes, cap is {}",
                    file.display(),
                    len,
                    self.max_source_bytes
                ),
            ));
        }
        Ok(())
    }

    pub fn check_string_len(&self, len: usize) -> Result<(), NaabError> {
        if len > self.max_string_bytes {
            return Err(NaabError::new(
                ErrorKind::ResourceLimit,
                format!(
                    "string literal is {} bytes, cap is {}",
                    len, self.max_string_bytes
                ),
            ));
        }
        Ok(())
    }

    pub fn check_block_len(&self, len: usize) -> Result<(), NaabError> {
        if len > self.max_block_bytes {
            return Err(NaabError::new(
                ErrorKind::ResourceLimit,
                format!(
                    "polyglot block body is {} bytes, cap is {}",
                    len, self.max_block_bytes
                ),
            ));
        }
        Ok(())
    }

    pub fn check_literal_elements(&self, count: usize) -> Result<(), NaabError> {
        if count > self.max_literal_elements {
            return Err(NaabError::new(
                ErrorKind::ResourceLimit,
                format!(
                    "literal has {} elements, cap is {}",
                    count, self.max_literal_elements
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn source_at_cap_is_accepted() {
        let limits = Limits::default();
        let file = PathBuf::from("main.naab");
        assert!(limits
            .check_source_len(limits.max_source_bytes, &file)
            .is_ok());
    }

    #[test]
    fn source_one_byte_over_cap_is_rejected() {
        let limits = Limits::default();
        let file = PathBuf::from("main.naab");
        let err = limits
            .check_source_len(limits.max_source_bytes + 1, &file)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceLimit);
    }

    #[test]
    fn string_cap_applies_to_literals() {
        let limits = Limits {
            max_string_bytes: 8,
            ..Limits::default()
        };
        assert!(limits.check_string_len(8).is_ok());
        assert!(limits.check_string_len(9).is_err());
    }

    #[test]
    fn literal_element_cap() {
        let limits = Limits {
            max_literal_elements: 3,
            ..Limits::default()
        };
        assert!(limits.check_literal_elements(3).is_ok());
        assert!(limits.check_literal_elements(4).is_err());
    }
}
