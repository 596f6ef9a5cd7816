// Category 5: generators become resumable frame objects.

use super::common::{c_function, compile_ok};

const COUNT: &str = "\
def count(n: int):
    i = 0
    while i < n:
        yield i
        i += 1
";

#[test]
fn generator_state_lives_in_the_frame() {
    let c = compile_ok(COUNT);
    let frame = c.split("typedef struct _m_count_gen_t {").nth(1).unwrap();
    let frame = &frame[..frame.find("} m_count_gen_t;").unwrap()];
    assert!(frame.contains("uint16_t state;"));
    assert!(frame.contains("mp_int_t n;"));
    assert!(frame.contains("mp_int_t i;"));
}

#[test]
fn next_resumes_after_the_yield() {
    let c = compile_ok(COUNT);
    let next = c_function(&c, "m_count_gen_iternext");
    assert!(next.contains("goto _resume1;"));
    assert!(next.contains("gen->state = 1;"));
    assert!(next.contains("return mp_obj_new_int(gen->i);"));
    assert!(next.contains("_resume1:;"));
    assert!(next.contains("return MP_OBJ_STOP_ITERATION;"));
}

#[test]
fn entry_allocates_and_returns_the_frame() {
    let c = compile_ok(COUNT);
    let entry = c_function(&c, "m_count");
    assert!(entry.contains("m_count_gen_t *gen = mp_obj_malloc(m_count_gen_t, &m_count_gen_type);"));
    assert!(entry.contains("gen->n = n;"));
    assert!(entry.contains("return MP_OBJ_FROM_PTR(gen);"));
    assert!(c.contains("MP_TYPE_FLAG_ITER_IS_ITERNEXT,"));
}
