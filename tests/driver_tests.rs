// SPDX-License-Identifier: PMPL-1.0-or-later

//! End-to-end driver runs over on-disk projects.

use cursive0::diag::CompileStatus;
use cursive0::driver::{compile, BuildOptions};
use std::fs;
use tempfile::TempDir;

fn project_with_main(body: &str) -> TempDir {
    project(&[("src/main.cursive", body)])
}

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("cursive.toml"),
        "[[assembly]]\nname = \"app\"\nkind = \"executable\"\nroot = \"src\"\n",
    )
    .unwrap();
    for (rel, content) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

fn check_only() -> BuildOptions {
    BuildOptions {
        assembly: None,
        emit_ir: None,
        write_outputs: false,
    }
}

#[test]
fn minimal_executable_compiles_clean() {
    let dir = project_with_main("procedure main() -> i32 { 0 }\n");
    let outcome = compile(dir.path(), &check_only()).unwrap();
    assert_eq!(outcome.status, CompileStatus::Ok, "{:?}", outcome.diags.ordered());
    assert_eq!(outcome.exit_code(), 0);
}

#[test]
fn null_deref_fails_with_e_ptr_0001() {
    let dir = project_with_main(
        "procedure foo(p: Ptr<i32>@Null) -> i32 { *p }\nprocedure main() -> i32 { 0 }\n",
    );
    let outcome = compile(dir.path(), &check_only()).unwrap();
    assert_eq!(outcome.exit_code(), 2);
    assert!(outcome.diags.has_code("E-PTR-0001"));
}

#[test]
fn parallel_key_conflict_fails_with_e_key_0001() {
    let dir = project_with_main(
        "record Data { pub field: i32 }\n\
         procedure run(d: unique Data) {\nparallel {\n{ d.field = 1 },\n{ d.field = 2 },\n}\n}\n\
         procedure main() -> i32 { 0 }\n",
    );
    let outcome = compile(dir.path(), &check_only()).unwrap();
    assert_eq!(outcome.exit_code(), 2);
    assert!(outcome.diags.has_code("E-KEY-0001"));
}

#[test]
fn extern_capability_param_fails_with_e_cap_0011() {
    let dir = project_with_main(
        "extern \"C\" { procedure ext_open(fs: dyn $FileSystem) -> i32 }\n\
         procedure main() -> i32 { 0 }\n",
    );
    let outcome = compile(dir.path(), &check_only()).unwrap();
    assert_eq!(outcome.exit_code(), 2);
    assert!(outcome.diags.has_code("E-CAP-0011"));
}

#[test]
fn bitcopy_record_by_value_twice_is_accepted() {
    let dir = project_with_main(
        "record P implements Bitcopy { pub x: i32 }\n\
         procedure take(move p: P) -> i32 { p.x }\n\
         procedure main() -> i32 {\nlet v = P { x: 1 }\ntake(v) + take(v)\n}\n",
    );
    let outcome = compile(dir.path(), &check_only()).unwrap();
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diags.ordered());
}

#[test]
fn non_exhaustive_match_fails() {
    let dir = project_with_main(
        "procedure pick(x: u8) -> i32 { match x { 0 => 1, 1 => 2 } }\n\
         procedure main() -> i32 { 0 }\n",
    );
    let outcome = compile(dir.path(), &check_only()).unwrap();
    assert_eq!(outcome.exit_code(), 2);
    assert!(outcome.diags.has_code("E-SEM-0111"));
}

#[test]
fn missing_main_in_executable_fails() {
    let dir = project_with_main("procedure helper() -> i32 { 0 }\n");
    let outcome = compile(dir.path(), &check_only()).unwrap();
    assert_eq!(outcome.exit_code(), 2);
    assert!(outcome.diags.has_code("E-SEM-3009"));
}

#[test]
fn library_needs_no_main() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("cursive.toml"),
        "[[assembly]]\nname = \"core\"\nkind = \"library\"\nroot = \"src\"\n",
    )
    .unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(
        dir.path().join("src/lib.cursive"),
        "pub procedure double(x: i32) -> i32 { x + x }\n",
    )
    .unwrap();
    let outcome = compile(dir.path(), &check_only()).unwrap();
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diags.ordered());
}

#[test]
fn subset_violation_fails_conformance() {
    let dir = project_with_main(
        "procedure main() -> i32 { 0 }\n// fine line\nprocedure later() -> i32 { comptime { 1 } }\n",
    );
    let outcome = compile(dir.path(), &check_only()).unwrap();
    assert_eq!(outcome.exit_code(), 2);
    assert!(outcome.diags.has_code("E-CNF-0104"));
}

#[test]
fn multi_module_project_resolves_imports() {
    let dir = project(&[
        (
            "src/main.cursive",
            "import app::util\nprocedure main() -> i32 { double(21) }\n",
        ),
        (
            "src/util/lib.cursive",
            "pub procedure double(x: i32) -> i32 { x + x }\n",
        ),
    ]);
    let outcome = compile(dir.path(), &check_only()).unwrap();
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diags.ordered());
}

#[test]
fn import_cycle_fails_with_e_sem_3005() {
    let dir = project(&[
        ("src/main.cursive", "procedure main() -> i32 { 0 }\n"),
        ("src/a/x.cursive", "import app::b\n"),
        ("src/b/y.cursive", "import app::a\n"),
    ]);
    let outcome = compile(dir.path(), &check_only()).unwrap();
    assert_eq!(outcome.exit_code(), 2);
    assert!(outcome.diags.has_code("E-SEM-3005"));
}

#[test]
fn unresolved_type_annotation_fails() {
    let dir = project_with_main(
        "procedure main() -> i32 {\nlet p: Missing = 0\n0\n}\n",
    );
    let outcome = compile(dir.path(), &check_only()).unwrap();
    assert_eq!(outcome.exit_code(), 2);
    assert!(outcome.diags.has_code("E-SEM-3007"));
}
