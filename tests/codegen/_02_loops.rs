// Category 2: range loops stay native; everything else uses the iterator protocol.

use super::common::{c_function, compile_ok};

const RANGE_SUM: &str = "\
def total(n: int) -> int:
    s = 0
    for i in range(n):
        s += i
    return s
";

#[test]
fn range_sum_is_one_native_loop() {
    let c = compile_ok(RANGE_SUM);
    let f = c_function(&c, "m_total");
    assert_eq!(f.matches("for (").count(), 1, "{f}");
    assert!(f.contains("for (i = 0; i < _tmp1; i++) {"), "{f}");
    assert!(f.contains("s = (s + i);"));
    assert!(!f.contains("mp_getiter"));
    assert!(!f.contains("mp_obj_new_int(i)"));
}

#[test]
fn negative_constant_step_counts_down() {
    let c = compile_ok("def f() -> int:\n    s = 0\n    for i in range(10, 0, -2):\n        s += i\n    return s\n");
    assert!(c_function(&c, "m_f").contains("for (i = 10; i > 0; i -= 2) {"));
}

#[test]
fn dynamic_step_is_checked_before_the_loop() {
    let c = compile_ok(
        "def f(a: int, b: int, k: int) -> int:\n    s = 0\n    for i in range(a, b, k):\n        s += i\n    return s\n",
    );
    let f = c_function(&c, "m_f");
    let check = f.find("arg 3 must not be zero").unwrap();
    let header = f.find("for (i = a;").unwrap();
    assert!(check < header);
    assert!(f.contains(" > 0 ? i < _tmp"), "{f}");
}

#[test]
fn loop_over_a_list_uses_the_iterator_protocol() {
    let c = compile_ok("def total(xs: list) -> int:\n    s = 0\n    for x in xs:\n        s += x\n    return s\n");
    let f = c_function(&c, "m_total");
    assert!(f.contains("mp_obj_iter_buf_t _iter_buf1;"));
    assert!(f.contains("_iter1 = mp_getiter(xs, &_iter_buf1);"));
    assert!(f.contains("!= MP_OBJ_STOP_ITERATION) {"));
}

#[test]
fn while_loop_with_break() {
    let c = compile_ok(
        "def first_over(limit: int) -> int:\n    i = 0\n    while True:\n        if i * i > limit:\n            break\n        i += 1\n    return i\n",
    );
    let f = c_function(&c, "m_first_over");
    assert!(f.contains("while (true) {"), "{f}");
    assert!(f.contains("break;"));
}
