// SPDX-License-Identifier: PMPL-1.0-or-later

//! Project loading: manifest validation, module discovery, output paths.

use cursive0::project::{discovery, load_project, manifest::AssemblyKind, outputs};
use std::fs;
use tempfile::TempDir;

fn write_project(dir: &TempDir, manifest: &str, files: &[(&str, &str)]) {
    fs::write(dir.path().join("cursive.toml"), manifest).unwrap();
    for (rel, content) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

const SIMPLE_MANIFEST: &str = r#"
[[assembly]]
name = "app"
kind = "executable"
root = "src"
"#;

#[test]
fn loads_a_single_assembly_project() {
    let dir = TempDir::new().unwrap();
    write_project(
        &dir,
        SIMPLE_MANIFEST,
        &[("src/main.cursive", "procedure main() -> i32 { 0 }\n")],
    );
    let result = load_project(dir.path(), None);
    assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
    let project = result.project.expect("project should load");
    assert_eq!(project.assembly.name, "app");
    assert_eq!(project.assembly.kind, AssemblyKind::Executable);
    assert_eq!(project.assembly.modules.len(), 1);
    assert_eq!(project.assembly.modules[0].path_key, "app");
}

#[test]
fn missing_manifest_is_a_prj_error() {
    let dir = TempDir::new().unwrap();
    let result = load_project(dir.path(), None);
    assert!(result.project.is_none());
    assert!(result.diags.has_code("E-PRJ-0201"));
}

#[test]
fn invalid_kind_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_project(
        &dir,
        "[[assembly]]\nname = \"app\"\nkind = \"plugin\"\nroot = \"src\"\n",
        &[("src/main.cursive", "")],
    );
    let result = load_project(dir.path(), None);
    assert!(result.diags.has_code("E-PRJ-0204"));
}

#[test]
fn keyword_assembly_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_project(
        &dir,
        "[[assembly]]\nname = \"match\"\nkind = \"library\"\nroot = \"src\"\n",
        &[("src/lib.cursive", "")],
    );
    let result = load_project(dir.path(), None);
    assert!(result.diags.has_code("E-PRJ-0203"));
}

#[test]
fn several_assemblies_need_a_selector() {
    let dir = TempDir::new().unwrap();
    let manifest = r#"
[[assembly]]
name = "app"
kind = "executable"
root = "src"

[[assembly]]
name = "tool"
kind = "executable"
root = "tools"
"#;
    write_project(
        &dir,
        manifest,
        &[("src/a.cursive", ""), ("tools/b.cursive", "")],
    );
    let unselected = load_project(dir.path(), None);
    assert!(unselected.diags.has_code("E-PRJ-0205"));

    let selected = load_project(dir.path(), Some("tool"));
    assert_eq!(selected.project.unwrap().assembly.name, "tool");
}

#[test]
fn escaping_root_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_project(
        &dir,
        "[[assembly]]\nname = \"app\"\nkind = \"library\"\nroot = \"../outside\"\n",
        &[],
    );
    let result = load_project(dir.path(), None);
    assert!(result.diags.has_code("E-PRJ-0304"));
}

#[test]
fn module_keys_follow_directories() {
    let dir = TempDir::new().unwrap();
    write_project(
        &dir,
        SIMPLE_MANIFEST,
        &[
            ("src/main.cursive", ""),
            ("src/util/text.cursive", ""),
            ("src/util/deep/inner.cursive", ""),
        ],
    );
    let project = load_project(dir.path(), None).project.unwrap();
    let keys: Vec<&str> = project
        .assembly
        .modules
        .iter()
        .map(|m| m.path_key.as_str())
        .collect();
    assert_eq!(keys, vec!["app", "app::util", "app::util::deep"]);
}

#[test]
fn module_order_is_case_folded_lexicographic() {
    use std::cmp::Ordering;
    assert_eq!(
        discovery::deterministic_order("app::Beta", "app::alpha"),
        Ordering::Greater
    );
    assert_eq!(
        discovery::deterministic_order("app::Alpha", "app::alpha"),
        Ordering::Less
    );
}

#[test]
fn keyword_module_dir_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_project(
        &dir,
        SIMPLE_MANIFEST,
        &[("src/main.cursive", ""), ("src/match/x.cursive", "")],
    );
    let result = load_project(dir.path(), None);
    assert!(result.diags.has_code("E-MOD-0102"));
}

#[test]
fn output_paths_are_under_build() {
    let dir = TempDir::new().unwrap();
    write_project(
        &dir,
        SIMPLE_MANIFEST,
        &[("src/main.cursive", ""), ("src/util/u.cursive", "")],
    );
    let project = load_project(dir.path(), None).project.unwrap();
    let obj = outputs::obj_path(&project, &project.assembly.modules[1]);
    assert!(obj.ends_with("build/obj/app.util.o"), "{}", obj.display());
    let exe = outputs::exe_path(&project);
    assert!(exe.ends_with("build/bin/app.exe"));

    let mut diags = cursive0::diag::DiagnosticStream::new();
    assert!(outputs::check_output_hygiene(&project, &mut diags));
    assert!(diags.is_empty());
}
