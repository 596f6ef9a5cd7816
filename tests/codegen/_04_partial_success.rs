// Category 4: function-scoped failures leave the rest of the unit intact.

use super::common::compile;
use ember::diagnostics::DiagnosticKind;

const MIXED: &str = "\
def bad(x: Widget) -> int:
    return 1

def good(a: int) -> int:
    return a + 1
";

#[test]
fn unknown_annotation_drops_only_its_function() {
    let result = compile(MIXED);
    assert!(!result.success);
    let c = result.c_source.expect("function-scoped errors still emit the unit");
    assert!(c.contains("static mp_obj_t m_good(mp_obj_t a_in) {"));
    assert!(c.contains("MP_ROM_PTR(&m_good_obj)"));
    assert!(!c.contains("m_bad("));
    let diags: Vec<_> = result.diagnostics.iter().collect();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].kind, DiagnosticKind::Resolution);
    assert!(diags[0].message.contains("Widget"));
}

#[test]
fn calls_to_a_dropped_function_resolve_at_runtime() {
    let result = compile(&format!("{MIXED}\ndef caller() -> int:\n    return bad(2)\n"));
    let c = result.c_source.unwrap();
    assert!(c.contains("mp_load_global(MP_QSTR_bad)"));
}

#[test]
fn unsupported_statement_marks_the_function_and_continues() {
    let result = compile("def f(x: int) -> int:\n    assert x > 0\n    return x\n\ndef g() -> int:\n    return 2\n");
    assert!(!result.success);
    let c = result.c_source.unwrap();
    assert!(c.contains("/* unsupported: "));
    assert!(c.contains("return mp_obj_new_int(x);"));
    assert!(c.contains("static mp_obj_t m_g(void) {"));
    assert_eq!(result.diagnostics.iter().next().map(|d| d.kind), Some(DiagnosticKind::Unsupported));
}

#[test]
fn layout_conflict_aborts_the_unit() {
    let src = "class A:\n    def f(self, x: int) -> int:\n        return x\n\nclass B(A):\n    def f(self) -> int:\n        return 0\n";
    let result = compile(src);
    assert!(!result.success);
    assert!(result.c_source.is_none());
    assert_eq!(result.diagnostics.iter().next().map(|d| d.kind), Some(DiagnosticKind::LayoutConflict));
}
