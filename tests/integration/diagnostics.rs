mod common;

use common::{compile, run_emberc};
use ember::diagnostics::{render_to_string, DiagnosticKind};

const PARTIAL: &str = "\
def good(x: int) -> int:
    return x + 1

def bad(w: Widget) -> int:
    return 0
";

#[test]
fn function_scoped_problem_keeps_the_rest_of_the_unit() {
    let result = compile(PARTIAL);
    assert!(!result.success);
    assert!(result.c_source.as_deref().is_some_and(|c| c.contains("m_good")));
    let diags: Vec<_> = result.diagnostics.iter().collect();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].kind, DiagnosticKind::Resolution);
    assert_eq!(diags[0].scope.as_deref(), Some("bad"));
    assert!(diags[0].short(PARTIAL).starts_with("4:"), "{}", diags[0].short(PARTIAL));
}

#[test]
fn rendered_report_names_the_kind_and_message() {
    let result = compile(PARTIAL);
    let diag = result.diagnostics.iter().next().unwrap();
    let text = render_to_string(PARTIAL, diag);
    assert!(text.contains(diag.kind.label()), "{text}");
    assert!(text.contains("Widget"), "{text}");
}

#[test]
fn cli_prints_json_diagnostics_and_fails() {
    let (output, dir) = run_emberc("partial", PARTIAL, &["--diagnostics-json"]);
    assert_eq!(output.status.code(), Some(1));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["kind"], "resolution");
    assert_eq!(entries[0]["scope"], "bad");
    // The partial unit is still written next to the source.
    assert!(dir.path().join("partial.c").is_file());
}

#[test]
fn cli_succeeds_and_writes_the_unit() {
    let (output, dir) = run_emberc("calc", "def add(a: int, b: int) -> int:\n    return a + b\n", &[]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let c = std::fs::read_to_string(dir.path().join("calc.c")).unwrap();
    assert!(c.contains("MP_REGISTER_MODULE(MP_QSTR_calc, calc_user_cmodule);"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("wrote"));
}

#[test]
fn cli_writes_nothing_for_a_syntax_error() {
    let (output, dir) = run_emberc("broken", "def f(:\n", &["--diagnostics-json"]);
    assert_eq!(output.status.code(), Some(1));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json[0]["kind"], "syntax");
    assert!(!dir.path().join("broken.c").exists());
}
