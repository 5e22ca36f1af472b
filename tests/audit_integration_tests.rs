//! End-to-end audit logging: the interpreter appends block-execution events
//! and the offline verifier accepts the resulting chain.

use std::path::PathBuf;
use std::sync::Arc;

use naab::{
    AuditVerifier, BlockOutput, ExecOptions, ExecutorRegistry, Interpreter, Payload,
    PolyglotExecutor, RuntimeConfig,
};

struct ConstExecutor;

impl PolyglotExecutor for ConstExecutor {
    fn language(&self) -> &str {
        "mock"
    }
    fn execute(
        &self,
        code: &str,
        _bindings: &[(String, Payload)],
        _options: &ExecOptions,
    ) -> Result<BlockOutput, naab::polyglot::PolyglotFailure> {
        if code.trim() == "fail" {
            return Err(naab::polyglot::PolyglotFailure::new("requested failure"));
        }
        Ok(BlockOutput::value(Payload::Int(1)))
    }
}

#[test]
fn block_executions_are_audited_and_chain_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("audit.jsonl");

    let mut config = RuntimeConfig::default();
    config.audit_log_path = Some(log_path.clone());
    let mut interp = Interpreter::new(config);
    let registry = ExecutorRegistry::new();
    registry.register(Arc::new(ConstExecutor));
    interp.set_executors(Arc::new(registry));

    interp
        .run_file(
            "let a = <<mock[] ok >>\nlet b = <<mock[] ok >>\nlet c = <<mock[a, b] ok >>\nc",
            &PathBuf::from("audited.naab"),
        )
        .unwrap();

    let content = std::fs::read_to_string(&log_path).unwrap();
    let block_events = content.matches("block_execute").count();
    assert_eq!(block_events, 3, "one audit entry per block: {}", content);

    let failures = AuditVerifier::new(None).verify_file(&log_path).unwrap();
    assert!(failures.is_empty(), "{:?}", failures);
}

#[test]
fn failed_blocks_are_audited_too() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("audit.jsonl");

    let mut config = RuntimeConfig::default();
    config.audit_log_path = Some(log_path.clone());
    let mut interp = Interpreter::new(config);
    let registry = ExecutorRegistry::new();
    registry.register(Arc::new(ConstExecutor));
    interp.set_executors(Arc::new(registry));

    let _ = interp
        .run_file(
            "let x = <<mock[] fail >>\nx",
            &PathBuf::from("audited.naab"),
        )
        .unwrap_err();

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("\"ok\":\"false\""), "{}", content);
}

#[test]
fn hmac_keyed_log_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("audit.jsonl");
    let key = b"integration-key".to_vec();

    let mut config = RuntimeConfig::default();
    config.audit_log_path = Some(log_path.clone());
    config.audit_hmac_key = Some(key.clone());
    let mut interp = Interpreter::new(config);
    let registry = ExecutorRegistry::new();
    registry.register(Arc::new(ConstExecutor));
    interp.set_executors(Arc::new(registry));

    interp
        .run_file("let a = <<mock[] ok >>\na", &PathBuf::from("audited.naab"))
        .unwrap();

    let failures = AuditVerifier::new(Some(key)).verify_file(&log_path).unwrap();
    assert!(failures.is_empty(), "{:?}", failures);
}
