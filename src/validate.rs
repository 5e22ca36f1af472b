//! Boundary validators: paths, FFI-inbound values, checked arithmetic, and
//! deserialization guards.
//!
//! Everything that crosses from user input into path operations, or from
//! foreign code into the interpreter, funnels through here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::warn;

use crate::error::{ErrorKind, NaabError};

/// Total path length cap (bytes).
pub const MAX_PATH_LEN: usize = 4096;
/// Nesting cap for deserialized JSON documents.
pub const MAX_JSON_DEPTH: usize = 128;
/// Size cap for deserialized JSON documents (bytes).
pub const MAX_JSON_BYTES: usize = 16 * 1024 * 1024;
/// Regex patterns longer than this are rejected outright.
pub const MAX_REGEX_LEN: usize = 1000;

// -- paths --

/// Canonicalize `path` and require it to land inside one of the allow-listed
/// roots. Symlinks are resolved before the containment check, so a link
/// pointing outside the allow-list is rejected even when the link itself is
/// inside.
pub fn validate_path(path: &Path, allowed_roots: &[PathBuf]) -> Result<PathBuf, NaabError> {
    let raw = path.as_os_str().as_encoded_bytes();
    if raw.contains(&0) {
        return Err(path_error(path, "contains a null byte"));
    }
    if raw.len() > MAX_PATH_LEN {
        return Err(path_error(path, "exceeds the path length cap"));
    }

    // Canonicalize through the nearest existing ancestor so that paths to
    // not-yet-created files still normalize `..` and symlinks.
    let canonical = canonicalize_lenient(path)
        .map_err(|e| path_error(path, &format!("cannot canonicalize: {}", e)))?;

    for root in allowed_roots {
        let canonical_root = match canonicalize_lenient(root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if canonical.starts_with(&canonical_root) {
            return Ok(canonical);
        }
    }
    warn!(path = %path.display(), "path rejected: outside allow-list");
    Err(path_error(path, "escapes the allowed directories"))
}

fn canonicalize_lenient(path: &Path) -> std::io::Result<PathBuf> {
    match path.canonicalize() {
        Ok(p) => Ok(p),
        Err(_) => {
            let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file = path.file_name();
            match (parent, file) {
                (Some(parent), Some(file)) => Ok(parent.canonicalize()?.join(file)),
                _ => path.canonicalize(),
            }
        }
    }
}

fn path_error(path: &Path, why: &str) -> NaabError {
    NaabError::new(
        ErrorKind::Path,
        format!("rejected path '{}': {}", path.display(), why),
    )
}

// -- FFI inbound --

/// Foreign-origin integers must fit NAAb's 64-bit signed range.
pub fn ffi_int(value: i128, language: &str) -> Result<i64, NaabError> {
    i64::try_from(value).map_err(|_| {
        NaabError::new(
            ErrorKind::Polyglot,
            format!("{} integer {} exceeds the 64-bit range", language, value),
        )
    })
}

/// Foreign-origin byte strings must be valid UTF-8.
pub fn ffi_string(bytes: &[u8], language: &str) -> Result<String, NaabError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        NaabError::new(
            ErrorKind::Polyglot,
            format!("{} returned a string that is not valid UTF-8", language),
        )
    })
}

/// Registry of opaque foreign pointers. The interpreter stores only the
/// handle id; dereferencing is the owning executor's business.
static FOREIGN_HANDLES: Lazy<Mutex<HandleTable>> = Lazy::new(|| Mutex::new(HandleTable::new()));

struct HandleTable {
    next: u64,
    entries: HashMap<u64, String>,
}

impl HandleTable {
    fn new() -> Self {
        HandleTable {
            next: 1,
            entries: HashMap::new(),
        }
    }
}

pub fn register_foreign_handle(language: &str) -> u64 {
    let mut table = FOREIGN_HANDLES.lock().expect("handle table poisoned");
    let id = table.next;
    table.next += 1;
    table.entries.insert(id, language.to_string());
    id
}

pub fn foreign_handle_language(id: u64) -> Option<String> {
    let table = FOREIGN_HANDLES.lock().expect("handle table poisoned");
    table.entries.get(&id).cloned()
}

pub fn release_foreign_handle(id: u64) {
    let mut table = FOREIGN_HANDLES.lock().expect("handle table poisoned");
    table.entries.remove(&id);
}

// -- arithmetic --

pub fn checked_add(a: i64, b: i64) -> Result<i64, NaabError> {
    a.checked_add(b).ok_or_else(|| overflow("+", a, b))
}

pub fn checked_sub(a: i64, b: i64) -> Result<i64, NaabError> {
    a.checked_sub(b).ok_or_else(|| overflow("-", a, b))
}

pub fn checked_mul(a: i64, b: i64) -> Result<i64, NaabError> {
    a.checked_mul(b).ok_or_else(|| overflow("*", a, b))
}

pub fn checked_div(a: i64, b: i64) -> Result<i64, NaabError> {
    if b == 0 {
        return Err(NaabError::new(ErrorKind::Arithmetic, "division by zero"));
    }
    a.checked_div(b).ok_or_else(|| overflow("/", a, b))
}

pub fn checked_rem(a: i64, b: i64) -> Result<i64, NaabError> {
    if b == 0 {
        return Err(NaabError::new(ErrorKind::Arithmetic, "modulo by zero"));
    }
    a.checked_rem(b).ok_or_else(|| overflow("%", a, b))
}

pub fn checked_neg(a: i64) -> Result<i64, NaabError> {
    a.checked_neg().ok_or_else(|| {
        NaabError::new(
            ErrorKind::Arithmetic,
            format!("integer overflow negating {}", a),
        )
    })
}

/// `a ** b` for non-negative exponents, overflow-checked.
pub fn checked_pow(a: i64, b: i64) -> Result<i64, NaabError> {
    let exp = u32::try_from(b).map_err(|_| {
        NaabError::new(
            ErrorKind::Arithmetic,
            format!("integer exponent {} out of range", b),
        )
    })?;
    a.checked_pow(exp).ok_or_else(|| overflow("**", a, b))
}

fn overflow(op: &str, a: i64, b: i64) -> NaabError {
    NaabError::new(
        ErrorKind::Arithmetic,
        format!("integer overflow in {} {} {}", a, op, b),
    )
}

// -- deserialization guards --

/// Parse a JSON document with size and depth caps applied.
pub fn parse_json_guarded(text: &str) -> Result<serde_json::Value, NaabError> {
    if text.len() > MAX_JSON_BYTES {
        return Err(NaabError::new(
            ErrorKind::ResourceLimit,
            format!("JSON document is {} bytes, cap is {}", text.len(), MAX_JSON_BYTES),
        ));
    }
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| NaabError::new(ErrorKind::Type, format!("malformed JSON: {}", e)))?;
    check_json_depth(&value, 0)?;
    Ok(value)
}

fn check_json_depth(value: &serde_json::Value, depth: usize) -> Result<(), NaabError> {
    if depth > MAX_JSON_DEPTH {
        return Err(NaabError::new(
            ErrorKind::ResourceLimit,
            format!("JSON nesting exceeds the depth cap of {}", MAX_JSON_DEPTH),
        ));
    }
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                check_json_depth(item, depth + 1)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                check_json_depth(item, depth + 1)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Length pre-filter for regex patterns. A catastrophic-backtracking
/// analyzer is a known future item; the cap blocks the obvious abuse.
pub fn check_regex_pattern(pattern: &str) -> Result<(), NaabError> {
    if pattern.len() > MAX_REGEX_LEN {
        return Err(NaabError::new(
            ErrorKind::ResourceLimit,
            format!(
                "regex pattern is {} bytes, cap is {}",
                pattern.len(),
                MAX_REGEX_LEN
            ),
        ));
    }
    Ok(())
}
