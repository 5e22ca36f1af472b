//! Tamper-evident audit log.
//!
//! Security-sensitive events append hash-chained entries to a line-delimited
//! JSON file. Each entry hashes a canonical serialization of itself plus the
//! previous entry's hash; an offline verifier recomputes the chain and flags
//! any break. With an HMAC key configured, entries are additionally signed.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{ErrorKind, NaabError};

type HmacSha256 = Hmac<Sha256>;

pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Event kinds worth auditing. Free-form details ride alongside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    BlockLoad,
    BlockExecute,
    PathRejection,
    FfiRejection,
    PolicyViolation,
    AuthAction,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::BlockLoad => "block_load",
            AuditEvent::BlockExecute => "block_execute",
            AuditEvent::PathRejection => "path_rejection",
            AuditEvent::FfiRejection => "ffi_rejection",
            AuditEvent::PolicyViolation => "policy_violation",
            AuditEvent::AuthAction => "auth_action",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    pub sequence: u64,
    /// ISO 8601 UTC.
    pub timestamp: String,
    pub prev_hash: String,
    pub event: String,
    pub details: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub hash: String,
    /// Empty string when HMAC is disabled.
    #[serde(default)]
    pub signature: String,
}

impl AuditEntry {
    /// The deterministic byte layout that gets hashed. Metadata keys are
    /// sorted; separators inside field content are escaped so the layout
    /// round-trips identically with what is written.
    fn canonical_string(&self) -> String {
        let metadata: Vec<String> = self
            .metadata
            .iter()
            .map(|(k, v)| format!("{}={}", escape_field(k), escape_field(v)))
            .collect();
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.sequence,
            escape_field(&self.timestamp),
            self.prev_hash,
            escape_field(&self.event),
            escape_field(&self.details),
            metadata.join(",")
        )
    }

    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_string().as_bytes());
        to_hex(&hasher.finalize())
    }

    fn compute_signature(&self, key: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(self.hash.as_bytes());
        to_hex(&mac.finalize().into_bytes())
    }
}

/// The fixed escape scheme for canonical serialization: backslash first,
/// then every separator character, then newlines.
fn escape_field(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('|', "\\|")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace('\n', "\\n")
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

struct LogState {
    file: File,
    sequence: u64,
    prev_hash: String,
}

/// Append-only writer. A mutex guards the sequence counter, chain head, and
/// file handle together.
pub struct AuditLog {
    path: PathBuf,
    hmac_key: Option<Vec<u8>>,
    state: Mutex<LogState>,
}

impl AuditLog {
    /// Open (or create) a log at `path`, resuming the chain from the last
    /// entry when the file already has content.
    pub fn open(path: &Path, hmac_key: Option<Vec<u8>>) -> Result<AuditLog, NaabError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| io_error(path, &e))?;
            }
        }

        let (sequence, prev_hash) = match read_entries(path) {
            Ok(entries) => match entries.last() {
                Some(last) => (last.sequence + 1, last.hash.clone()),
                None => (0, GENESIS_HASH.to_string()),
            },
            Err(_) => (0, GENESIS_HASH.to_string()),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| io_error(path, &e))?;

        Ok(AuditLog {
            path: path.to_path_buf(),
            hmac_key,
            state: Mutex::new(LogState {
                file,
                sequence,
                prev_hash,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry; returns the entry as written.
    pub fn append(
        &self,
        event: AuditEvent,
        details: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<AuditEntry, NaabError> {
        let mut state = self.state.lock().expect("audit log poisoned");

        let mut entry = AuditEntry {
            sequence: state.sequence,
            timestamp: chrono::Utc::now().to_rfc3339(),
            prev_hash: state.prev_hash.clone(),
            event: event.as_str().to_string(),
            details: details.into(),
            metadata,
            hash: String::new(),
            signature: String::new(),
        };
        entry.hash = entry.compute_hash();
        if let Some(key) = &self.hmac_key {
            entry.signature = entry.compute_signature(key);
        }

        let line = serde_json::to_string(&entry)
            .map_err(|e| NaabError::new(ErrorKind::Type, format!("audit serialize: {}", e)))?;
        writeln!(state.file, "{}", line).map_err(|e| io_error(&self.path, &e))?;
        state.file.flush().map_err(|e| io_error(&self.path, &e))?;

        state.sequence += 1;
        state.prev_hash = entry.hash.clone();
        Ok(entry)
    }
}

fn io_error(path: &Path, e: &dyn std::fmt::Display) -> NaabError {
    NaabError::new(
        ErrorKind::Path,
        format!("audit log '{}': {}", path.display(), e),
    )
}

fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, NaabError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| io_error(path, &e))?;
    let mut entries = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| io_error(path, &e))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| {
            NaabError::new(
                ErrorKind::Type,
                format!("audit log line {}: {}", line_no + 1, e),
            )
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyFailure {
    pub sequence: u64,
    pub reason: String,
}

/// Offline chain verifier; read-only.
pub struct AuditVerifier {
    hmac_key: Option<Vec<u8>>,
}

impl AuditVerifier {
    pub fn new(hmac_key: Option<Vec<u8>>) -> Self {
        AuditVerifier { hmac_key }
    }

    pub fn verify_file(&self, path: &Path) -> Result<Vec<VerifyFailure>, NaabError> {
        let entries = read_entries(path)?;
        Ok(self.verify_entries(&entries))
    }

    /// Recompute every hash, link, sequence number, and (when keyed)
    /// signature. An empty result means the chain is intact.
    ///
    /// Linkage is checked against the recomputed chain, not the stored
    /// hashes: tampering with one entry therefore also surfaces as broken
    /// prev-hash linkage on every entry after it.
    pub fn verify_entries(&self, entries: &[AuditEntry]) -> Vec<VerifyFailure> {
        let mut failures = Vec::new();
        let mut expected_prev = GENESIS_HASH.to_string();

        for (i, entry) in entries.iter().enumerate() {
            if entry.sequence != i as u64 {
                failures.push(VerifyFailure {
                    sequence: entry.sequence,
                    reason: format!("sequence discontinuity: expected {}, found {}", i, entry.sequence),
                });
            }
            if entry.compute_hash() != entry.hash {
                failures.push(VerifyFailure {
                    sequence: entry.sequence,
                    reason: "content hash mismatch".to_string(),
                });
            }
            if entry.prev_hash != expected_prev {
                failures.push(VerifyFailure {
                    sequence: entry.sequence,
                    reason: "broken prev-hash linkage".to_string(),
                });
            }
            if let Some(key) = &self.hmac_key {
                if entry.compute_signature(key) != entry.signature {
                    failures.push(VerifyFailure {
                        sequence: entry.sequence,
                        reason: "HMAC signature mismatch".to_string(),
                    });
                }
            }
            let mut chained = entry.clone();
            chained.prev_hash = expected_prev;
            expected_prev = chained.compute_hash();
        }

        if !failures.is_empty() {
            warn!(count = failures.len(), "audit verification failures");
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn write_log(dir: &Path, n: usize, key: Option<Vec<u8>>) -> PathBuf {
        let path = dir.join("audit.jsonl");
        let log = AuditLog::open(&path, key).unwrap();
        for i in 0..n {
            log.append(
                AuditEvent::BlockExecute,
                format!("block {}", i),
                meta(&[("lang", "python"), ("index", &i.to_string())]),
            )
            .unwrap();
        }
        path
    }

    #[test]
    fn genesis_entry_has_zero_prev_and_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path, None).unwrap();
        let entry = log.append(AuditEvent::BlockLoad, "first", meta(&[])).unwrap();
        assert_eq!(entry.sequence, 0);
        assert_eq!(entry.prev_hash, GENESIS_HASH);
        assert_eq!(entry.hash.len(), 64);
    }

    #[test]
    fn append_then_verify_accepts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(dir.path(), 6, None);
        let failures = AuditVerifier::new(None).verify_file(&path).unwrap();
        assert!(failures.is_empty(), "{:?}", failures);
    }

    #[test]
    fn hmac_signatures_verify_with_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = b"audit-secret".to_vec();
        let path = write_log(dir.path(), 3, Some(key.clone()));
        let failures = AuditVerifier::new(Some(key)).verify_file(&path).unwrap();
        assert!(failures.is_empty(), "{:?}", failures);
        // Wrong key fails on every entry.
        let failures = AuditVerifier::new(Some(b"wrong".to_vec()))
            .verify_file(&path)
            .unwrap();
        assert_eq!(failures.len(), 3);
    }

    #[test]
    fn tampered_details_flag_entry_and_linkage() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(dir.path(), 6, None);

        // Flip one character in the details field of entry 3.
        let content = std::fs::read_to_string(&path).unwrap();
        let mutated: Vec<String> = content
            .lines()
            .map(|line| {
                if line.contains("block 3") {
                    line.replace("block 3", "block X")
                } else {
                    line.to_string()
                }
            })
            .collect();
        std::fs::write(&path, mutated.join("\n") + "\n").unwrap();

        let failures = AuditVerifier::new(None).verify_file(&path).unwrap();
        assert!(
            failures.iter().any(|f| f.sequence == 3 && f.reason.contains("hash mismatch")),
            "{:?}",
            failures
        );
        // The recomputed chain diverges at the mutation, so every later
        // entry reports broken linkage.
        for seq in [4, 5] {
            assert!(
                failures
                    .iter()
                    .any(|f| f.sequence == seq && f.reason.contains("prev-hash")),
                "entry {} should report broken linkage: {:?}",
                seq,
                failures
            );
        }
    }

    #[test]
    fn truncation_breaks_linkage() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(dir.path(), 5, None);
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = content.lines().collect();
        lines.remove(2);
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        let failures = AuditVerifier::new(None).verify_file(&path).unwrap();
        assert!(failures
            .iter()
            .any(|f| f.reason.contains("sequence discontinuity")));
        assert!(failures.iter().any(|f| f.reason.contains("prev-hash")));
    }

    #[test]
    fn reopened_log_continues_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = AuditLog::open(&path, None).unwrap();
            log.append(AuditEvent::BlockLoad, "one", meta(&[])).unwrap();
        }
        {
            let log = AuditLog::open(&path, None).unwrap();
            let entry = log.append(AuditEvent::BlockLoad, "two", meta(&[])).unwrap();
            assert_eq!(entry.sequence, 1);
        }
        let failures = AuditVerifier::new(None).verify_file(&path).unwrap();
        assert!(failures.is_empty(), "{:?}", failures);
    }

    #[test]
    fn canonical_escaping_round_trips_special_characters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path, None).unwrap();
        log.append(
            AuditEvent::PolicyViolation,
            "details with | pipe, comma = equals \"quotes\"\nand newline",
            meta(&[("key|x", "value,y=z")]),
        )
        .unwrap();
        let failures = AuditVerifier::new(None).verify_file(&path).unwrap();
        assert!(failures.is_empty(), "{:?}", failures);
    }

    #[test]
    fn metadata_keys_hash_in_sorted_order() {
        let entry_a = AuditEntry {
            sequence: 0,
            timestamp: "2026-01-01T00:00:00+00:00".into(),
            prev_hash: GENESIS_HASH.into(),
            event: "block_load".into(),
            details: "d".into(),
            metadata: meta(&[("b", "2"), ("a", "1")]),
            hash: String::new(),
            signature: String::new(),
        };
        // BTreeMap iterates sorted regardless of insertion order.
        assert!(entry_a.canonical_string().contains("a=1,b=2"));
    }
}
