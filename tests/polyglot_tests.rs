//! Polyglot dispatch observed through whole programs.
//!
//! Determinism and grouping run against an in-test mock executor so they
//! pass without any foreign toolchain; shell and Python coverage probes for
//! the real binary and returns early when it is absent.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use naab::error::ErrorKind;
use naab::value::Value;
use naab::{
    BlockOutput, ExecOptions, ExecutorRegistry, Interpreter, Payload, PolyglotExecutor,
    RuntimeConfig,
};

/// Body grammar: `int:N` yields N; `sum` yields the sum of int bindings;
/// `sleep:MS:N` sleeps then yields N; `fail:MSG` fails; `bump` reports every
/// binding back with its `count` field incremented (ref write-back probe).
struct MockExecutor;

impl PolyglotExecutor for MockExecutor {
    fn language(&self) -> &str {
        "mock"
    }

    fn execute(
        &self,
        code: &str,
        bindings: &[(String, Payload)],
        options: &ExecOptions,
    ) -> Result<BlockOutput, naab::polyglot::PolyglotFailure> {
        let body = code.trim();
        if let Some(n) = body.strip_prefix("int:") {
            return Ok(BlockOutput::value(Payload::Int(n.parse().unwrap_or(0))));
        }
        if let Some(rest) = body.strip_prefix("sleep:") {
            let mut parts = rest.splitn(2, ':');
            let ms: u64 = parts.next().unwrap_or("0").parse().unwrap_or(0);
            let value: i64 = parts.next().unwrap_or("0").parse().unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
            return Ok(BlockOutput::value(Payload::Int(value)));
        }
        if let Some(message) = body.strip_prefix("fail:") {
            return Err(naab::polyglot::PolyglotFailure::new(message.to_string()));
        }
        if body == "sum" {
            let sum: i64 = bindings
                .iter()
                .map(|(_, p)| match p {
                    Payload::Int(n) => *n,
                    _ => 0,
                })
                .sum();
            return Ok(BlockOutput::value(Payload::Int(sum)));
        }
        if body == "corrupt" {
            let ref_values = options
                .ref_bindings
                .iter()
                .map(|name| {
                    (
                        name.clone(),
                        Payload::Dict(vec![(
                            "count".to_string(),
                            Payload::Str("oops".to_string()),
                        )]),
                    )
                })
                .collect();
            return Ok(BlockOutput {
                value: Payload::Null,
                ref_values,
            });
        }
        if body == "bump" {
            let ref_values = bindings
                .iter()
                .filter(|(name, _)| options.ref_bindings.contains(name))
                .map(|(name, payload)| {
                    let bumped = match payload {
                        Payload::Dict(entries) => Payload::Dict(
                            entries
                                .iter()
                                .map(|(k, v)| {
                                    let next = match (k.as_str(), v) {
                                        ("count", Payload::Int(n)) => Payload::Int(n + 1),
                                        _ => v.clone(),
                                    };
                                    (k.clone(), next)
                                })
                                .collect(),
                        ),
                        other => other.clone(),
                    };
                    (name.clone(), bumped)
                })
                .collect();
            return Ok(BlockOutput {
                value: Payload::Null,
                ref_values,
            });
        }
        Ok(BlockOutput::value(Payload::Null))
    }
}

fn mock_interpreter() -> Interpreter {
    let mut interp = Interpreter::new(RuntimeConfig::default());
    let registry = ExecutorRegistry::new();
    registry.register(Arc::new(MockExecutor));
    interp.set_executors(Arc::new(registry));
    interp
}

fn run_mock(source: &str) -> naab::RunOutcome {
    mock_interpreter()
        .run_file(source, &PathBuf::from("poly_test.naab"))
        .expect("program should run")
}

#[test]
fn single_block_evaluates_in_place() {
    let outcome = run_mock("let x = <<mock[] int:7 >>\nx");
    assert!(outcome.value.equals(&Value::Int(7)));
}

#[test]
fn independent_blocks_then_dependent_block() {
    // Two independent producers feed a third block that needs both.
    let outcome = run_mock(
        "let x = <<mock[] int:1 >>\nlet y = <<mock[] int:2 >>\nlet z = <<mock[x, y] sum >>\nz",
    );
    assert!(outcome.value.equals(&Value::Int(3)));
}

#[test]
fn independent_group_runs_concurrently() {
    let start = Instant::now();
    run_mock(
        "let a = <<mock[] sleep:150:1 >>\nlet b = <<mock[] sleep:150:2 >>\nlet c = <<mock[] sleep:150:3 >>\na",
    );
    // Three 150ms blocks sequentially would take 450ms.
    assert!(
        start.elapsed() < Duration::from_millis(400),
        "independent blocks did not overlap: {:?}",
        start.elapsed()
    );
}

#[test]
fn parallel_results_match_sequential_semantics() {
    let outcome = run_mock(
        "let a = <<mock[] int:5 >>\nlet b = <<mock[a] sum >>\nlet c = <<mock[a, b] sum >>\nc",
    );
    // Sequentially: a=5, b=5, c=10. Parallel dispatch must agree.
    assert!(outcome.value.equals(&Value::Int(10)));
}

#[test]
fn slow_early_block_still_commits_first() {
    // The textually earlier block finishes last; source order must win at
    // commit time, so the dependent block sees both values.
    let outcome = run_mock(
        "let slow = <<mock[] sleep:120:10 >>\nlet fast = <<mock[] int:1 >>\nlet both = <<mock[slow, fast] sum >>\nboth",
    );
    assert!(outcome.value.equals(&Value::Int(11)));
}

#[test]
fn dependent_block_waits_for_a_slow_producer() {
    // If the dependency were ignored, z's snapshot would run before x is
    // committed and fail with a NameError.
    let outcome = run_mock(
        "let x = <<mock[] sleep:100:4 >>\nlet z = <<mock[x] sum >>\nz",
    );
    assert!(outcome.value.equals(&Value::Int(4)));
}

#[test]
fn earliest_error_wins_in_a_group() {
    let err = mock_interpreter()
        .run_file(
            "let p = <<mock[] fail:first >>\nlet q = <<mock[] fail:second >>\np",
            &PathBuf::from("poly_test.naab"),
        )
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Polyglot);
    assert!(err.message.contains("first"), "{}", err.message);
}

#[test]
fn polyglot_errors_are_catchable_with_language_detail() {
    let outcome = run_mock(
        "let t = \"\"\ntry { let x = <<mock[] fail:boom >>\nx } catch (e) { t = e.type + \":\" + e.message }\nt",
    );
    assert!(outcome.value.equals(&Value::str("PolyglotError:boom")));
}

#[test]
fn assignment_form_commits_to_existing_binding() {
    let outcome = run_mock("let x = 0\nx = <<mock[] int:9 >>\nx");
    assert!(outcome.value.equals(&Value::Int(9)));
}

#[test]
fn ref_struct_mutations_are_written_back() {
    let outcome = run_mock(
        "struct Counter { count: int }\nlet c = new Counter { count: 1 }\nlet r = <<mock[ref c] bump >>\nc.count",
    );
    assert!(outcome.value.equals(&Value::Int(2)));
}

#[test]
fn ref_write_back_commits_in_parallel_waves_too() {
    let outcome = run_mock(
        "struct Counter { count: int }\nlet a = new Counter { count: 1 }\nlet b = new Counter { count: 10 }\nlet x = <<mock[ref a] bump >>\nlet y = <<mock[ref b] bump >>\na.count + b.count",
    );
    assert!(outcome.value.equals(&Value::Int(13)));
}

#[test]
fn plain_struct_bindings_are_not_written_back() {
    // Without `ref`, the executor still reports nothing for the binding and
    // the struct keeps its snapshot-time value.
    let outcome = run_mock(
        "struct Counter { count: int }\nlet c = new Counter { count: 1 }\nlet r = <<mock[c] bump >>\nc.count",
    );
    assert!(outcome.value.equals(&Value::Int(1)));
}

#[test]
fn ref_binding_must_be_a_struct() {
    let err = mock_interpreter()
        .run_file(
            "let n = 5\nlet x = <<mock[ref n] int:1 >>\nx",
            &PathBuf::from("poly_test.naab"),
        )
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("by reference"), "{}", err.message);
}

#[test]
fn ref_write_back_validates_field_types() {
    // The foreign side hands back a string where the declaration says int;
    // the write-back must refuse and leave the struct untouched.
    let err = mock_interpreter()
        .run_file(
            "struct Counter { count: int }\nlet c = new Counter { count: 1 }\nlet r = <<mock[ref c] corrupt >>\nr",
            &PathBuf::from("poly_test.naab"),
        )
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("write-back"), "{}", err.message);
}

#[test]
fn undefined_binding_in_snapshot_is_a_name_error() {
    let err = mock_interpreter()
        .run_file(
            "let x = <<mock[ghost] sum >>\nx",
            &PathBuf::from("poly_test.naab"),
        )
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Name);
}

// -- real runtimes, probed --

fn binary_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

#[test]
fn shell_block_value_is_stdout() {
    let outcome = run_source_default("let out = <<shell[] echo hi >>\nout");
    assert!(outcome.value.equals(&Value::str("hi")));
}

#[test]
fn shell_sovereign_pipe_returns_json_value() {
    let outcome = run_source_default(
        "let v = <<shell[] -> JSON\necho '{\"a\": [1, 2]}'\n>>\nv.a[1]",
    );
    assert!(outcome.value.equals(&Value::Int(2)));
}

#[test]
fn shell_timeout_maps_to_polyglot_error() {
    let mut config = RuntimeConfig::default();
    config.polyglot_timeout_secs = 1;
    let err = naab::run_source(
        "let x = <<shell[] sleep 10 >>\nx",
        &PathBuf::from("poly_test.naab"),
        config,
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Polyglot);
    let detail = err.polyglot.expect("polyglot detail");
    assert!(detail.timeout);
}

#[test]
fn python_parallel_scenario_end_to_end() {
    if !binary_available("python3") {
        return;
    }
    let outcome = run_source_default(
        "let x = <<python[] 1 >>\nlet y = <<python[] 2 >>\nlet z = <<python[x, y] x + y >>\nz",
    );
    assert!(outcome.value.equals(&Value::Int(3)));
}

#[test]
fn python_ref_struct_write_back_end_to_end() {
    if !binary_available("python3") {
        return;
    }
    let outcome = run_source_default(
        "struct P { x: int }\nlet p = new P { x: 1 }\nlet r = <<python[ref p] p['x'] = 41; p['x'] + 1 >>\nstr(r) + \":\" + str(p.x)",
    );
    assert!(outcome.value.equals(&Value::str("42:41")));
}

#[test]
fn python_block_preserves_indentation() {
    if !binary_available("python3") {
        return;
    }
    let outcome = run_source_default(
        "let xs = [1, 2, 3]\nlet total = <<python[xs]\nacc = 0\nfor v in xs:\n    acc += v\nacc\n>>\ntotal",
    );
    assert!(outcome.value.equals(&Value::Int(6)));
}

fn run_source_default(source: &str) -> naab::RunOutcome {
    naab::run_source(
        source,
        &PathBuf::from("poly_test.naab"),
        RuntimeConfig::default(),
    )
    .expect("program should run")
}
