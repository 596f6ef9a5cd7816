mod common;

use std::path::Path;

use common::{emberc, run_emberc};
use ember::config::{find_config, parse_config, CompileOptions, CONFIG_FILE};

const DIVIDE: &str = "def f(a: int, b: int) -> int:\n    return a // b\n";

fn write_config(dir: &Path, text: &str) {
    std::fs::write(dir.join(CONFIG_FILE), text).unwrap();
}

/// Run `emberc compile` on `stem.py` in a directory that already holds a config.
fn compile_with_config(config: &str, stem: &str, extra: &[&str]) -> (std::process::Output, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), config);
    let src = dir.path().join(format!("{stem}.py"));
    std::fs::write(&src, DIVIDE).unwrap();
    let output = emberc().arg("compile").arg(&src).args(extra).output().unwrap();
    (output, dir)
}

#[test]
fn config_sets_the_registered_module() {
    let (output, dir) = compile_with_config("[module]\nname = \"fastmath\"\n", "src", &[]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let c = std::fs::read_to_string(dir.path().join("src.c")).unwrap();
    assert!(c.contains("MP_REGISTER_MODULE(MP_QSTR_fastmath, fastmath_user_cmodule);"));
    assert!(c.contains("fastmath_f("));
}

#[test]
fn command_line_module_overrides_the_config() {
    let (output, dir) = compile_with_config("[module]\nname = \"fastmath\"\n", "src", &["--module", "other"]);
    assert!(output.status.success());
    let c = std::fs::read_to_string(dir.path().join("src.c")).unwrap();
    assert!(c.contains("MP_REGISTER_MODULE(MP_QSTR_other, other_user_cmodule);"));
}

#[test]
fn unchecked_division_uses_c_operators() {
    let (output, dir) = compile_with_config("[codegen]\nchecked_division = false\n", "m", &[]);
    assert!(output.status.success());
    let c = std::fs::read_to_string(dir.path().join("m.c")).unwrap();
    assert!(c.contains("(a / b)"));
    assert!(!c.contains("ember_int_floordiv(a, b)"));
}

#[test]
fn source_comments_mark_each_function() {
    let (output, dir) = compile_with_config("[codegen]\nemit_source_comments = true\n", "m", &[]);
    assert!(output.status.success());
    let c = std::fs::read_to_string(dir.path().join("m.c")).unwrap();
    assert!(c.contains("/* f (line 1) */"));
}

#[test]
fn unknown_key_is_rejected() {
    let (output, dir) = compile_with_config("[codegen]\nopt_level = 3\n", "m", &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains(CONFIG_FILE));
    assert!(!dir.path().join("m.c").exists());
}

#[test]
fn file_stem_must_be_an_identifier() {
    let (output, _dir) = run_emberc("my-mod", DIVIDE, &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid module name 'my-mod'"));
}

#[test]
fn explicit_module_rescues_an_awkward_stem() {
    let (output, dir) = run_emberc("my-mod", DIVIDE, &["--module", "my_mod"]);
    assert!(output.status.success());
    assert!(dir.path().join("my-mod.c").is_file());
}

#[test]
fn discovery_walks_up_from_nested_directories() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "[module]\nname = \"top\"\n");
    let nested = dir.path().join("a").join("b");
    std::fs::create_dir_all(&nested).unwrap();
    assert_eq!(find_config(&nested), Some(dir.path().join(CONFIG_FILE)));
}

#[test]
fn discovery_stops_at_a_repository_root() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "[module]\nname = \"outside\"\n");
    let repo = dir.path().join("repo");
    std::fs::create_dir_all(repo.join(".git")).unwrap();
    assert_eq!(find_config(&repo), None);
}

#[test]
fn partial_config_keeps_defaults() {
    let config = parse_config("[codegen]\nemit_source_comments = true\n", Path::new(CONFIG_FILE)).unwrap();
    let mut options = CompileOptions::for_module("keep");
    options.apply(&config);
    assert_eq!(options.module_name, "keep");
    assert!(options.checked_division);
    assert!(options.emit_source_comments);
}
