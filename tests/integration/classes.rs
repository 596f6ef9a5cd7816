mod common;

use common::{c_function, compile, compile_ok};

const COUNTER: &str = "\
class Counter:
    def __init__(self, start: int = 0):
        self.value = start

    def bump(self, by: int) -> int:
        self.value += by
        return self.value

    @staticmethod
    def zero() -> int:
        return 0

    @property
    def doubled(self) -> int:
        return self.value * 2
";

#[test]
fn method_has_a_native_body_and_a_checked_wrapper() {
    let c = compile_ok(COUNTER);
    let native = c_function(&c, "m_Counter_bump_native");
    assert!(native.starts_with("static mp_int_t m_Counter_bump_native(void *self_ptr, mp_int_t by) {"));
    assert!(native.contains("m_Counter_obj_t *self = (m_Counter_obj_t *)self_ptr;"));
    let wrapper = c_function(&c, "m_Counter_bump_mp");
    assert!(wrapper.contains("ember_check_instance(self_in, &m_Counter_type);"));
    assert!(wrapper.contains("mp_int_t by = mp_obj_get_int(by_in);"));
    assert!(wrapper.contains("return mp_obj_new_int(m_Counter_bump_native(MP_OBJ_TO_PTR(self_in), by));"));
    assert!(c.contains("static MP_DEFINE_CONST_FUN_OBJ_2(m_Counter_bump_obj, m_Counter_bump_mp);"));
}

#[test]
fn constructor_parses_optional_arguments() {
    let c = compile_ok(COUNTER);
    let make_new = c_function(&c, "m_Counter_make_new");
    assert!(make_new.contains("{ MP_QSTR_start, MP_ARG_OBJ, {.u_obj = MP_OBJ_NULL} },"));
    assert!(make_new.contains("mp_int_t start = _vals[0].u_obj != MP_OBJ_NULL ? mp_obj_get_int(_vals[0].u_obj) : 0;"));
    assert!(make_new.contains("m_Counter___init___native(self, start);"));
}

#[test]
fn static_methods_and_properties_are_exposed() {
    let c = compile_ok(COUNTER);
    assert!(c.contains("static MP_DEFINE_CONST_STATICMETHOD_OBJ(m_Counter_zero_static_obj, MP_ROM_PTR(&m_Counter_zero_obj));"));
    assert!(c.contains("{ MP_ROM_QSTR(MP_QSTR_zero), MP_ROM_PTR(&m_Counter_zero_static_obj) },"));
    assert!(c.contains("{ MP_ROM_QSTR(MP_QSTR_bump), MP_ROM_PTR(&m_Counter_bump_obj) },"));
    assert!(!c.contains("MP_QSTR_doubled), MP_ROM_PTR"));
    assert!(c_function(&c, "m_Counter_attr").contains("dest[0] = m_Counter_doubled_mp(self_in);"));
}

#[test]
fn class_is_registered_in_the_module() {
    let c = compile_ok(COUNTER);
    assert!(c.contains("{ MP_ROM_QSTR(MP_QSTR_Counter), MP_ROM_PTR(&m_Counter_type) },"));
}

#[test]
fn inherited_methods_appear_in_the_derived_locals() {
    let src = "\
class Base:
    def hello(self) -> int:
        return 1

class Child(Base):
    def extra(self) -> int:
        return 2
";
    let c = compile_ok(src);
    let table = c.split("m_Child_locals_dict_table[] = {").nth(1).unwrap();
    let table = &table[..table.find("};").unwrap()];
    assert!(table.contains("MP_ROM_PTR(&m_Child_extra_obj)"));
    assert!(table.contains("MP_ROM_PTR(&m_Base_hello_obj)"));
}

#[test]
fn untranslatable_method_raises_when_called() {
    let result = compile("class C:\n    def f(self, *args) -> int:\n        return 0\n");
    assert!(!result.success);
    let c = result.c_source.unwrap();
    let native = c_function(&c, "m_C_f_native");
    assert!(native.contains("mp_raise_msg(&mp_type_NotImplementedError, MP_ERROR_TEXT(\"C.f could not be translated\"));"));
}
