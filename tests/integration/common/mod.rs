#![allow(dead_code)]

use std::process::Command;

use ember::config::CompileOptions;
use ember::CompileResult;

pub fn emberc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_emberc"))
}

/// Translate `source` as module `m`.
pub fn compile(source: &str) -> CompileResult {
    ember::compile_source(source, &CompileOptions::for_module("m"))
}

/// Translate `source` and require a clean result.
pub fn compile_ok(source: &str) -> String {
    let result = compile(source);
    assert!(result.success, "unexpected diagnostics: {:#?}", result.diagnostics);
    result.c_source.expect("a successful unit carries C source")
}

/// The definition of the C function `name`: its signature line through the
/// closing brace at column zero.
pub fn c_function<'a>(c: &'a str, name: &str) -> &'a str {
    let needle = format!(" {name}(");
    let mut offset = 0;
    for line in c.split_inclusive('\n') {
        if line.starts_with("static ") && line.contains(&needle) && line.trim_end().ends_with('{') {
            let rest = &c[offset..];
            let end = rest.find("\n}\n").map_or(rest.len(), |i| i + 3);
            return &rest[..end];
        }
        offset += line.len();
    }
    panic!("no definition of {name} in:\n{c}");
}

/// Write `source` to a temporary `<stem>.py` and run `emberc compile` on it.
pub fn run_emberc(stem: &str, source: &str, extra: &[&str]) -> (std::process::Output, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join(format!("{stem}.py"));
    std::fs::write(&src_path, source).unwrap();
    let output = emberc().arg("compile").arg(&src_path).args(extra).output().unwrap();
    (output, dir)
}
