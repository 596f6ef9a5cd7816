// Category 6: imported names load through the module object, never as globals.

use super::common::{c_function, compile_ok};

#[test]
fn aliased_member_loads_the_original_attribute() {
    let c = compile_ok("from math import sqrt as sq\n\ndef root(x: float) -> float:\n    return sq(x)\n");
    let f = c_function(&c, "m_root");
    assert!(f.contains("mp_import_name(MP_QSTR_math, mp_const_none, MP_OBJ_NEW_SMALL_INT(0))"), "{f}");
    assert!(f.contains(", MP_QSTR_sqrt)"), "{f}");
    assert!(f.contains("mp_load_attr("), "{f}");
    assert!(!f.contains("MP_QSTR_sq)"), "{f}");
    assert!(!f.contains("mp_load_global"), "{f}");
}

#[test]
fn every_module_of_a_combined_import_is_bound() {
    let c = compile_ok("import math, time\n\ndef now() -> int:\n    return time.ticks_ms()\n");
    let f = c_function(&c, "m_now");
    assert!(f.contains("mp_import_name(MP_QSTR_time, "), "{f}");
    assert!(!f.contains("mp_load_global(MP_QSTR_time)"), "{f}");
}

#[test]
fn aliased_module_imports_the_real_name() {
    let c = compile_ok("import math as m2\n\ndef pi() -> float:\n    return m2.pi\n");
    let f = c_function(&c, "m_pi");
    assert!(f.contains("mp_import_name(MP_QSTR_math, "), "{f}");
    assert!(!f.contains("MP_QSTR_m2"), "{f}");
}
