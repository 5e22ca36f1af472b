//! Whole-program interpreter tests through the public `run_source` entry.

use std::path::PathBuf;

use naab::error::ErrorKind;
use naab::limits::Limits;
use naab::value::Value;
use naab::{run_source, RunOutcome, RuntimeConfig};

fn run(source: &str) -> RunOutcome {
    try_run(source).expect("program should run")
}

fn try_run(source: &str) -> Result<RunOutcome, naab::NaabError> {
    run_source(source, &PathBuf::from("test.naab"), RuntimeConfig::default())
}

#[test]
fn arithmetic_and_final_value() {
    let outcome = run("let x = 2\nlet y = 3\nx * y + 1");
    assert!(outcome.value.equals(&Value::Int(7)));
}

#[test]
fn print_collects_output() {
    let outcome = run("print(\"hello\", 42)\nprint([1, 2])");
    assert_eq!(outcome.output, vec!["hello 42", "[1, 2]"]);
}

#[test]
fn integer_overflow_raises_arithmetic_error() {
    let err = try_run("9223372036854775807 + 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Arithmetic);
    assert!(err.message.contains("overflow"), "{}", err.message);
}

#[test]
fn division_by_zero_is_catchable() {
    let outcome = run(
        "let caught = \"\"\ntry { 1 / 0 } catch (e) { caught = e.type }\ncaught",
    );
    assert!(outcome.value.equals(&Value::str("ArithmeticError")));
}

#[test]
fn mixed_numeric_equality_but_not_string() {
    let outcome = run("1 == 1.0");
    assert!(outcome.value.equals(&Value::Bool(true)));
    let outcome = run("1 == \"1\"");
    assert!(outcome.value.equals(&Value::Bool(false)));
}

#[test]
fn string_concatenation_formats_operands() {
    let outcome = run("\"n=\" + 42");
    assert!(outcome.value.equals(&Value::str("n=42")));
}

#[test]
fn functions_defaults_reference_earlier_params() {
    let outcome = run("fn pad(width, fill = width * 2) { return fill }\npad(3)");
    assert!(outcome.value.equals(&Value::Int(6)));
}

#[test]
fn default_values_evaluate_fresh_each_call() {
    // Call-time evaluation: mutating state between calls changes defaults.
    let outcome = run(
        "let base = 1\nfn next(n = base) { return n }\nlet first = next()\nbase = 10\nlet second = next()\nfirst + second",
    );
    assert!(outcome.value.equals(&Value::Int(11)));
}

#[test]
fn closures_see_mutations_after_capture() {
    let outcome = run(
        "let counter = 0\nfn bump() { counter = counter + 1\nreturn counter }\nbump()\nbump()\nbump()",
    );
    assert!(outcome.value.equals(&Value::Int(3)));
}

#[test]
fn while_loop_with_break_and_continue() {
    let outcome = run(
        "let total = 0\nlet i = 0\nwhile true {\n  i = i + 1\n  if i > 10 { break }\n  if i % 2 == 0 { continue }\n  total = total + i\n}\ntotal",
    );
    // 1 + 3 + 5 + 7 + 9
    assert!(outcome.value.equals(&Value::Int(25)));
}

#[test]
fn for_loop_over_range_and_dict_order() {
    let outcome = run(
        "let keys = \"\"\nlet d = { b: 1, a: 2, c: 3 }\nfor k in d { keys = keys + k }\nkeys",
    );
    assert!(outcome.value.equals(&Value::str("bac")), "insertion order");

    let outcome = run("let sum = 0\nfor n in 1..4 { sum = sum + n }\nsum");
    assert!(outcome.value.equals(&Value::Int(10)));
}

#[test]
fn list_and_dict_assignment_deep_copies() {
    let outcome = run("let a = [1, 2]\nlet b = a\nb[0] = 99\na[0]");
    assert!(outcome.value.equals(&Value::Int(1)), "copy-on-assignment");
}

#[test]
fn struct_assignment_shares_the_instance() {
    let outcome = run(
        "struct P { x: int }\nlet a = new P { x: 1 }\nlet b = a\nb.x = 99\na.x",
    );
    assert!(outcome.value.equals(&Value::Int(99)), "structs are reference types");
}

#[test]
fn struct_field_type_is_validated() {
    let err = try_run("struct P { x: int }\nlet p = new P { x: \"no\" }").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn nullable_fields_admit_null() {
    let outcome = run("struct N { next: N? }\nlet n = new N { next: null }\nn.next == null");
    assert!(outcome.value.equals(&Value::Bool(true)));
}

#[test]
fn generic_struct_monomorphizes_once() {
    let mut interp = naab::Interpreter::new(RuntimeConfig::default());
    let outcome = interp
        .run_file(
            "struct Box<T> { value: T }\nlet b: Box<int> = new Box<int> { value: 42 }\nlet c = new Box<int> { value: 7 }\nb.value",
            &PathBuf::from("test.naab"),
        )
        .unwrap();
    assert!(outcome.value.equals(&Value::Int(42)));
    assert!(interp.types().has_struct_monomorphization(
        "Box",
        &[naab::ast::TypeExpr::named("int", naab::SourceLoc::internal())]
    ));
    assert_eq!(interp.types().monomorphization_count(), 1);
}

#[test]
fn generic_inference_from_field_values() {
    let outcome = run("struct Box<T> { value: T }\nlet b = new Box { value: \"text\" }\nb.value");
    assert!(outcome.value.equals(&Value::str("text")));
}

#[test]
fn enums_and_match_with_payload_binding() {
    let outcome = run(
        "enum Shape { Circle(float), Point }\nlet s = Shape.Circle(2.0)\nmatch s { Circle(r) -> r * 3.0, Point -> 0.0 }",
    );
    assert!(outcome.value.equals(&Value::Float(6.0)));
}

#[test]
fn match_literals_and_wildcard() {
    let outcome = run("match 42 { 0 -> \"zero\", 42 -> \"answer\", _ -> \"other\" }");
    assert!(outcome.value.equals(&Value::str("answer")));
    let outcome = run("match 7 { 0 -> \"zero\", _ -> \"other\" }");
    assert!(outcome.value.equals(&Value::str("other")));
}

#[test]
fn if_as_expression() {
    let outcome = run("let x = 85\nif x > 90 { \"A\" } else if x > 80 { \"B\" } else { \"C\" }");
    assert!(outcome.value.equals(&Value::str("B")));
}

#[test]
fn pipeline_passes_value_as_first_argument() {
    let outcome = run("fn add(a, b) { return a + b }\n10 |> add(5)");
    assert!(outcome.value.equals(&Value::Int(15)));
}

#[test]
fn pipeline_right_side_is_lazy() {
    // The throwing function is defined but never called.
    let outcome = run(
        "fn side_effect_if_called() { throw \"ouch\" }\nlet r = 10 |> (fn(x) { x * 2 })\nr",
    );
    assert!(outcome.value.equals(&Value::Int(20)));
}

#[test]
fn thrown_values_carry_message_type_and_stack() {
    let outcome = run(
        "fn inner() { throw \"ouch\" }\nfn outer() { inner() }\nlet got = null\ntry { outer() } catch (e) { got = e }\ngot.message + \"/\" + got.type + \"/\" + str(len(got.stack))",
    );
    assert!(outcome.value.equals(&Value::str("ouch/Error/2")));
}

#[test]
fn finally_always_runs_even_on_catch_rethrow() {
    let outcome = run(
        "let order = \"\"\ntry {\n  try { throw \"a\" } catch (e) { order = order + \"c\"\nthrow \"b\" } finally { order = order + \"f\" }\n} catch (e2) { order = order + \"o\" }\norder",
    );
    assert!(outcome.value.equals(&Value::str("cfo")));
}

#[test]
fn finally_throw_replaces_error_and_records_cause() {
    let outcome = run(
        "let got = null\ntry {\n  try { throw \"original\" } finally { throw \"cleanup\" }\n} catch (e) { got = e }\ngot.message + \"/\" + got.cause.message",
    );
    assert!(outcome.value.equals(&Value::str("cleanup/original")));
}

#[test]
fn return_survives_finally() {
    let outcome = run("fn f() { try { return 1 } finally { let x = 2 } }\nf()");
    assert!(outcome.value.equals(&Value::Int(1)));
}

#[test]
fn undefined_name_suggests_a_close_one() {
    let err = try_run("let counter = 1\ncountr + 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Name);
    assert_eq!(err.suggestion.as_deref(), Some("counter"));
}

#[test]
fn call_depth_cap_raises_stack_overflow() {
    let mut config = RuntimeConfig::default();
    config.limits = Limits {
        max_call_depth: 50,
        ..Limits::default()
    };
    let err = run_source(
        "fn loop_forever() { loop_forever() }\nloop_forever()",
        &PathBuf::from("test.naab"),
        config,
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::StackOverflow);
}

#[test]
fn stack_overflow_is_catchable() {
    let mut config = RuntimeConfig::default();
    config.limits = Limits {
        max_call_depth: 50,
        ..Limits::default()
    };
    let outcome = run_source(
        "fn f() { f() }\nlet t = \"\"\ntry { f() } catch (e) { t = e.type }\nt",
        &PathBuf::from("test.naab"),
        config,
    )
    .unwrap();
    assert!(outcome.value.equals(&Value::str("StackOverflowError")));
}

#[test]
fn source_cap_boundary() {
    let mut config = RuntimeConfig::default();
    config.limits = Limits {
        max_source_bytes: 64,
        ..Limits::default()
    };
    let pad = |len: usize| {
        let base = "let x = 1".to_string();
        format!("{}{}", base, " ".repeat(len - base.len()))
    };
    assert!(run_source(&pad(64), &PathBuf::from("t.naab"), config.clone()).is_ok());
    let err = run_source(&pad(65), &PathBuf::from("t.naab"), config).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResourceLimit);
}

#[test]
fn list_index_errors() {
    let err = try_run("let xs = [1, 2]\nxs[5]").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Index);
    let err = try_run("let d = { a: 1 }\nd[\"b\"]").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Key);
}

#[test]
fn member_access_on_dict_is_key_shorthand() {
    let outcome = run("let d = { name: \"ada\" }\nd.name");
    assert!(outcome.value.equals(&Value::str("ada")));
}

#[test]
fn error_location_points_into_the_source() {
    let err = try_run("let a = 1\nlet b = {\n").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Syntax);
    let loc = err.loc.expect("location");
    assert!(loc.line >= 2);
}

#[test]
fn lambdas_are_first_class() {
    let outcome = run("fn apply(f, v) { return f(v) }\napply(fn(x) { x + 1 }, 41)");
    assert!(outcome.value.equals(&Value::Int(42)));
}

#[test]
fn builtins_len_type_str() {
    let outcome = run("len([1, 2, 3])");
    assert!(outcome.value.equals(&Value::Int(3)));
    let outcome = run("type_of(1.5)");
    assert!(outcome.value.equals(&Value::str("float")));
    let outcome = run("str(12) + str(true)");
    assert!(outcome.value.equals(&Value::str("12true")));
}

#[test]
fn logical_operators_short_circuit() {
    let outcome = run(
        "fn boom() { throw \"called\" }\nlet a = false && boom()\nlet b = true || boom()\na == false && b == true",
    );
    assert!(outcome.value.equals(&Value::Bool(true)));
}
