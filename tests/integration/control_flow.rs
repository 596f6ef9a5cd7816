mod common;

use common::{c_function, compile_ok};

#[test]
fn try_except_matches_by_subclass_and_binds() {
    let src = "\
def parse(s: str) -> int:
    try:
        return int(s)
    except ValueError as e:
        print(e)
        return -1
";
    let c = compile_ok(src);
    let f = c_function(&c, "m_parse");
    assert!(f.contains("nlr_buf_t _nlr1;"));
    assert!(f.contains("if (nlr_push(&_nlr1) == 0) {"));
    assert!(f.contains(
        "if (mp_obj_is_subclass_fast(MP_OBJ_FROM_PTR(mp_obj_get_type(MP_OBJ_FROM_PTR(_nlr1.ret_val))), MP_OBJ_FROM_PTR(&mp_type_ValueError))) {"
    ), "{f}");
    assert!(f.contains("e = MP_OBJ_FROM_PTR(_nlr1.ret_val);"));
    // Unmatched exceptions keep propagating.
    assert!(f.contains("nlr_jump(_nlr1.ret_val);"));
}

#[test]
fn return_inside_try_pops_the_handler_first() {
    let src = "\
def guarded(x: int) -> int:
    try:
        return x * 2
    finally:
        print(\"done\")
";
    let c = compile_ok(src);
    let f = c_function(&c, "m_guarded");
    let save = f.find("mp_obj_t _retv = ").expect(f);
    let pop = f[save..].find("nlr_pop();").map(|i| i + save).expect(f);
    let ret = f[pop..].find("return _retv;").map(|i| i + pop).expect(f);
    let cleanup = &f[pop..ret];
    assert!(cleanup.contains("mp_obj_print_helper(&mp_plat_print"), "{f}");
}

#[test]
fn break_inside_try_inside_loop_unwinds_the_handler() {
    let src = "\
def first_ok(xs: list) -> int:
    n = 0
    for x in xs:
        try:
            n += 1
            break
        except ValueError:
            pass
    return n
";
    let c = compile_ok(src);
    let f = c_function(&c, "m_first_ok");
    let brk = f.find("break;").expect(f);
    let before = &f[..brk];
    assert!(before.rfind("nlr_pop();").is_some(), "{f}");
}

#[test]
fn raise_with_a_literal_message_uses_the_runtime_helper() {
    let c = compile_ok("def check(x: int) -> int:\n    if x < 0:\n        raise ValueError(\"negative\")\n    return x\n");
    assert!(c_function(&c, "m_check").contains("mp_raise_msg(&mp_type_ValueError, MP_ERROR_TEXT(\"negative\"));"));
}

#[test]
fn bare_raise_rethrows_the_caught_exception() {
    let src = "\
def passthrough(x: int) -> int:
    try:
        return 10 // x
    except ZeroDivisionError:
        raise
";
    let c = compile_ok(src);
    let f = c_function(&c, "m_passthrough");
    assert!(f.contains("ember_int_floordiv(10, x)"), "{f}");
    assert_eq!(f.matches("nlr_jump(_nlr1.ret_val);").count(), 2, "{f}");
}

#[test]
fn print_separates_arguments_and_ends_the_line() {
    let c = compile_ok("def show(a: int, b: int) -> None:\n    print(a, b)\n");
    let f = c_function(&c, "m_show");
    assert_eq!(f.matches("mp_obj_print_helper(&mp_plat_print, ").count(), 2);
    assert!(f.contains("mp_print_str(&mp_plat_print, \" \");"));
    assert!(f.contains("mp_print_str(&mp_plat_print, \"\\n\");"));
}

#[test]
fn dict_literal_is_presized() {
    let c = compile_ok("def table() -> dict:\n    return {\"a\": 1, \"b\": 2, \"c\": 3}\n");
    let f = c_function(&c, "m_table");
    assert!(f.contains("= ember_dict_new(3);"), "{f}");
    assert_eq!(f.matches("mp_obj_dict_store(").count(), 3);
}

#[test]
fn float_division_is_checked_by_default() {
    let c = compile_ok("def ratio(a: float, b: float) -> float:\n    return a / b\n");
    assert!(c_function(&c, "m_ratio").contains("ember_float_div(a, b)"));
}
