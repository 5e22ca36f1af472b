//! Garbage collector behavior observed through whole programs.
//!
//! `gc::live_count` is the allocation-registry probe; the registry is
//! thread-local, and the test harness gives each test its own thread.

use std::path::PathBuf;

use naab::value::Value;
use naab::{gc, Interpreter, RuntimeConfig};

fn file() -> PathBuf {
    PathBuf::from("gc_test.naab")
}

#[test]
fn struct_cycle_is_reclaimed_after_explicit_collect() {
    let mut interp = Interpreter::new(RuntimeConfig::default());
    interp
        .run_file(
            "struct Node { next: Node? }\n{\n  let a = new Node { next: null }\n  let b = new Node { next: a }\n  a.next = b\n}",
            &file(),
        )
        .unwrap();

    // The block scope is gone but the a<->b cycle keeps both cells alive.
    let before = gc::live_count();
    interp.run_file("gc_collect()\nnull", &file()).unwrap();
    let after = gc::live_count();
    assert!(
        after < before,
        "cycle should be reclaimed: before={} after={}",
        before,
        after
    );
}

#[test]
fn reachable_values_survive_collection() {
    let mut interp = Interpreter::new(RuntimeConfig::default());
    let outcome = interp
        .run_file(
            "struct Node { next: Node? }\nlet keep = new Node { next: null }\nlet other = new Node { next: keep }\ngc_collect()\nkeep == other.next",
            &file(),
        )
        .unwrap();
    assert!(outcome.value.equals(&Value::Bool(true)));
}

#[test]
fn closure_environment_cycle_is_collected() {
    let mut interp = Interpreter::new(RuntimeConfig::default());
    // The function value lives in the very environment it captures.
    interp
        .run_file(
            "{\n  let payload = [1, 2, 3]\n  fn grab() { return payload }\n}",
            &file(),
        )
        .unwrap();
    let before = gc::live_count();
    interp.run_file("gc_collect()\nnull", &file()).unwrap();
    let after = gc::live_count();
    assert!(
        after < before,
        "env<->closure cycle should be reclaimed: before={} after={}",
        before,
        after
    );
}

#[test]
fn threshold_triggers_collection_mid_loop() {
    let mut config = RuntimeConfig::default();
    config.gc_threshold = 64;
    let mut interp = Interpreter::new(config);
    interp
        .run_file(
            "let i = 0\nwhile i < 500 {\n  let scratch = [i]\n  i = i + 1\n}",
            &file(),
        )
        .unwrap();
    // 500 loop iterations allocate well past the threshold; automatic
    // collection must have run and reset the counter along the way.
    assert!(
        gc::allocations_since_collect() < 500,
        "counter {} suggests no automatic collection",
        gc::allocations_since_collect()
    );
}

#[test]
fn collection_never_runs_mid_expression() {
    // A call that requests collection inside an argument list must not free
    // sibling temporaries; the sweep is deferred to a statement boundary.
    let mut config = RuntimeConfig::default();
    config.gc_threshold = 1;
    let mut interp = Interpreter::new(config);
    let outcome = interp
        .run_file(
            "fn second(a, b) { return b }\nsecond([10, 20], (fn() { gc_collect()\nreturn [1, 2] })())[1]",
            &file(),
        )
        .unwrap();
    assert!(outcome.value.equals(&Value::Int(2)));
}

#[test]
fn shutdown_collection_clears_leftovers() {
    let mut interp = Interpreter::new(RuntimeConfig::default());
    interp
        .run_file(
            "struct Node { next: Node? }\n{\n  let a = new Node { next: null }\n  let b = new Node { next: a }\n  a.next = b\n}",
            &file(),
        )
        .unwrap();
    let cleared = interp.shutdown();
    assert!(cleared >= 2, "shutdown cleared {}", cleared);
}
