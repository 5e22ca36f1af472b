//! Module loading, caching, and cycle detection over real files.

use std::fs;
use std::path::PathBuf;

use naab::error::ErrorKind;
use naab::value::Value;
use naab::{run_source, RuntimeConfig};

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new() -> Project {
        Project {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn write(&self, name: &str, source: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, source).unwrap();
        path
    }

    fn run(&self, main: &str) -> Result<naab::RunOutcome, naab::NaabError> {
        let path = self.dir.path().join("main.naab");
        fs::write(&path, main).unwrap();
        let mut config = RuntimeConfig::default();
        config.allowed_roots = vec![self.dir.path().to_path_buf()];
        run_source(main, &path, config)
    }
}

#[test]
fn module_bindings_are_accessible_through_member_access() {
    let project = Project::new();
    project.write("mathx.naab", "fn double(n) { return n * 2 }\nlet answer = 21");
    let outcome = project.run("use mathx\nmathx.double(mathx.answer)").unwrap();
    assert!(outcome.value.equals(&Value::Int(42)));
}

#[test]
fn aliased_import_binds_under_the_alias() {
    let project = Project::new();
    project.write("helpers.naab", "fn triple(n) { return n * 3 }");
    let outcome = project.run("use helpers as h\nh.triple(7)").unwrap();
    assert!(outcome.value.equals(&Value::Int(21)));
}

#[test]
fn module_loads_exactly_once_for_repeated_imports() {
    let project = Project::new();
    project.write("shared.naab", "let items = [0]");
    // Both bindings must expose the same module environment: a mutation
    // through one alias is visible through the other.
    let outcome = project
        .run("use shared\nuse shared as again\nshared.items[0] = 99\nagain.items[0]")
        .unwrap();
    assert!(outcome.value.equals(&Value::Int(99)));
}

#[test]
fn diamond_imports_share_one_load() {
    let project = Project::new();
    project.write("d.naab", "let items = [0]");
    project.write("b.naab", "use d\nd.items[0] = 5");
    let outcome = project.run("use d\nuse b\nd.items[0]").unwrap();
    assert!(outcome.value.equals(&Value::Int(5)));
}

#[test]
fn import_cycle_is_detected_and_names_the_cycle() {
    let project = Project::new();
    project.write("a.naab", "use b");
    project.write("b.naab", "use a");
    let err = project.run("use a").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Import);
    assert!(err.message.contains("a"), "{}", err.message);
    assert!(err.message.contains("b"), "{}", err.message);
    assert!(err.message.contains("cyclic"), "{}", err.message);
}

#[test]
fn self_import_is_a_cycle() {
    let project = Project::new();
    project.write("selfish.naab", "use selfish");
    let err = project.run("use selfish").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Import);
}

#[test]
fn missing_module_is_an_import_error() {
    let project = Project::new();
    let err = project.run("use phantom").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Import);
    assert!(err.message.contains("phantom"), "{}", err.message);
}

#[test]
fn module_types_are_qualified_by_module_name() {
    let project = Project::new();
    project.write("geometry.naab", "struct Point { x: int, y: int }");
    let outcome = project
        .run("use geometry\nlet p = new geometry.Point { x: 3, y: 4 }\np.x + p.y")
        .unwrap();
    assert!(outcome.value.equals(&Value::Int(7)));
}

#[test]
fn same_base_name_in_different_modules_stays_distinct() {
    let project = Project::new();
    project.write("north.naab", "struct Marker { tag: int }");
    project.write("south.naab", "struct Marker { tag: string }");
    let outcome = project
        .run(
            "use north\nuse south\nlet a = new north.Marker { tag: 1 }\nlet b = new south.Marker { tag: \"s\" }\ntype_of(a) == type_of(b)",
        )
        .unwrap();
    assert!(outcome.value.equals(&Value::Bool(false)));
}

#[test]
fn submodule_paths_resolve_nested_files() {
    let project = Project::new();
    project.write("geo/shapes.naab", "let sides = 4");
    let outcome = project.run("use geo.shapes\nshapes.sides").unwrap();
    assert!(outcome.value.equals(&Value::Int(4)));
}

#[test]
fn lib_directory_is_on_the_search_path() {
    let project = Project::new();
    project.write("lib/util.naab", "fn id(x) { return x }");
    let outcome = project.run("use util\nutil.id(9)").unwrap();
    assert!(outcome.value.equals(&Value::Int(9)));
}

#[test]
fn failed_module_load_can_be_retried() {
    let project = Project::new();
    project.write("flaky.naab", "this is not naab ((");
    let main = project.write("main.naab", "");

    let mut config = RuntimeConfig::default();
    config.allowed_roots = vec![project.dir.path().to_path_buf()];
    let mut interp = naab::Interpreter::new(config);

    let err = interp.run_file("use flaky", &main).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Syntax);

    // The aborted load must not leave the module wedged in `Loading`.
    project.write("flaky.naab", "let ok = 1");
    let outcome = interp.run_file("use flaky\nflaky.ok", &main).unwrap();
    assert!(outcome.value.equals(&Value::Int(1)));
}

#[test]
fn module_error_includes_import_location() {
    let project = Project::new();
    let err = project.run("let x = 1\nuse nowhere").unwrap_err();
    let loc = err.loc.expect("import errors carry a location");
    assert_eq!(loc.line, 2);
}
