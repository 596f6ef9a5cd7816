// Category 1: boxing at the calling-convention boundary.

use super::common::{c_function, compile_ok};

#[test]
fn int_arithmetic_unboxes_on_entry_and_boxes_once() {
    let c = compile_ok("def add(a: int, b: int) -> int:\n    return a + b\n");
    let f = c_function(&c, "m_add");
    assert!(f.contains("static mp_obj_t m_add(mp_obj_t a_in, mp_obj_t b_in) {"));
    assert!(f.contains("mp_int_t a = mp_obj_get_int(a_in);"));
    assert!(f.contains("mp_int_t b = mp_obj_get_int(b_in);"));
    assert_eq!(f.matches("mp_obj_new_int(").count(), 1, "{f}");
    assert!(f.contains("return mp_obj_new_int((a + b));"));
    assert!(c.contains("static MP_DEFINE_CONST_FUN_OBJ_2(m_add_obj, m_add);"));
}

#[test]
fn optional_parameters_use_the_between_convention() {
    let c = compile_ok("def scale(x: float, k: float = 2.0) -> float:\n    return x * k\n");
    let f = c_function(&c, "m_scale");
    assert!(f.contains("size_t n_args, const mp_obj_t *args"));
    assert!(f.contains("mp_float_t k = n_args > 1 ? mp_get_float_checked(args[1]) : MICROPY_FLOAT_CONST(2.0);"));
    assert!(c.contains("MP_DEFINE_CONST_FUN_OBJ_VAR_BETWEEN(m_scale_obj, 1, 2, m_scale);"));
}

#[test]
fn function_without_return_yields_none() {
    let c = compile_ok("def noop() -> None:\n    pass\n");
    let f = c_function(&c, "m_noop");
    assert!(f.contains("static mp_obj_t m_noop(void) {"));
    assert!(f.contains("return mp_const_none;"));
}

#[test]
fn str_parameters_are_checked() {
    let c = compile_ok("def greet(name: str) -> str:\n    return name\n");
    assert!(c_function(&c, "m_greet").contains("mp_obj_t name = ember_check_str(name_in);"));
}

#[test]
fn machine_tuples_get_a_shared_record_type() {
    let c = compile_ok(
        "def pair(a: int) -> tuple[int, int]:\n    return (a, a)\n\ndef swap(a: int, b: int) -> tuple[int, int]:\n    return (b, a)\n",
    );
    assert_eq!(c.matches("typedef struct _rtuple_int_int_t {").count(), 1);
    assert!(c_function(&c, "m_pair").contains("rtuple_int_int_box("));
}

#[test]
fn small_constants_are_exported_through_rom() {
    let c = compile_ok("LIMIT = 10\nDEBUG = False\n\ndef limit() -> int:\n    return LIMIT\n");
    assert!(c.contains("{ MP_ROM_QSTR(MP_QSTR_LIMIT), MP_ROM_INT(10) },"));
    assert!(c.contains("{ MP_ROM_QSTR(MP_QSTR_DEBUG), MP_ROM_FALSE },"));
    assert!(c.contains("MP_REGISTER_MODULE(MP_QSTR_m, m_user_cmodule);"));
}

#[test]
fn calls_between_module_functions_skip_the_dispatcher() {
    let c = compile_ok("def sq(x: int) -> int:\n    return x * x\n\ndef f(y: int) -> int:\n    return sq(y) + 1\n");
    let f = c_function(&c, "m_f");
    assert!(f.contains("m_sq("), "{f}");
    assert!(!f.contains("mp_call_function_n_kw"), "{f}");
}
