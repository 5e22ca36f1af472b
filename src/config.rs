//! Runtime configuration for the NAAb core.
//!
//! The embedding front-end decides where these values come from (flags, env,
//! config file); the core only consumes the struct.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::limits::Limits;

/// GC runs after this many value allocations since the last collection.
pub const DEFAULT_GC_THRESHOLD: usize = 10_000;
/// Per-block polyglot execution timeout.
pub const DEFAULT_POLYGLOT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub limits: Limits,
    /// Allocations between automatic collections.
    pub gc_threshold: usize,
    /// Default per-block timeout, overridable per block.
    pub polyglot_timeout_secs: u64,
    /// Directories the path validator accepts. Empty means "source tree root
    /// plus user cache", filled in when the interpreter learns the source root.
    pub allowed_roots: Vec<PathBuf>,
    /// Audit log destination; `None` selects the user cache directory.
    pub audit_log_path: Option<PathBuf>,
    /// When set, audit entries carry an HMAC-SHA256 signature.
    pub audit_hmac_key: Option<Vec<u8>>,
    /// Scrub absolute paths and offsets from user-visible errors.
    pub production_mode: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            limits: Limits::default(),
            gc_threshold: DEFAULT_GC_THRESHOLD,
            polyglot_timeout_secs: DEFAULT_POLYGLOT_TIMEOUT_SECS,
            allowed_roots: Vec::new(),
            audit_log_path: None,
            audit_hmac_key: None,
            production_mode: false,
        }
    }
}

impl RuntimeConfig {
    pub fn polyglot_timeout(&self) -> Duration {
        Duration::from_secs(self.polyglot_timeout_secs)
    }

    /// The allow-list with defaults applied: configured roots, plus the source
    /// tree root, plus the user cache directory.
    pub fn effective_roots(&self, source_root: Option<&PathBuf>) -> Vec<PathBuf> {
        let mut roots = self.allowed_roots.clone();
        if let Some(root) = source_root {
            roots.push(root.clone());
        }
        if let Some(cache) = dirs::cache_dir() {
            roots.push(cache.join("naab"));
        }
        roots
    }
}
