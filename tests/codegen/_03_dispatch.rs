// Category 3: classes, layouts and dispatch through the vtable.

use super::common::{c_function, compile_ok};

const SHAPES: &str = "\
class Shape:
    def __init__(self, name: str):
        self.name = name

    def area(self) -> float:
        return 0.0

    def __str__(self) -> str:
        return self.name

class Square(Shape):
    def __init__(self, side: float):
        super().__init__(\"square\")
        self.side = side

    def area(self) -> float:
        return self.side * self.side

    @property
    def double(self) -> float:
        return self.side * 2.0

def measure(s: Shape) -> float:
    return s.area()
";

#[test]
fn derived_instance_embeds_its_base() {
    let c = compile_ok(SHAPES);
    let square = c.split("struct _m_Square_obj_t {").nth(1).unwrap();
    assert!(square.starts_with("\n    m_Shape_obj_t super;\n    mp_float_t side;\n};"), "{square}");
    let shape = c.split("struct _m_Shape_obj_t {").nth(1).unwrap();
    assert!(shape.starts_with("\n    mp_obj_base_t base;\n    const void *vtable;\n"), "{shape}");
}

#[test]
fn override_fills_the_derived_dispatch_table() {
    let c = compile_ok(SHAPES);
    assert!(c.contains("static const m_Square_vtable_t m_Square_vtable_inst = {\n    .area = m_Square_area_native,"));
    assert!(c.contains("static const m_Shape_vtable_t m_Shape_vtable_inst = {\n    .area = m_Shape_area_native,"));
    let make_new = c_function(&c, "m_Square_make_new");
    assert!(make_new.contains("self->super.vtable = &m_Square_vtable_inst;"));
    assert!(make_new.contains("self->super.base.type = type;"));
}

#[test]
fn calls_on_a_base_typed_receiver_go_through_the_vtable() {
    let c = compile_ok(SHAPES);
    let f = c_function(&c, "m_measure");
    assert!(f.contains("(const m_Shape_vtable_t *)"), "{f}");
    assert!(f.contains("->area("), "{f}");
    assert!(!f.contains("mp_load_method"), "{f}");
}

#[test]
fn type_object_links_parent_print_and_properties() {
    let c = compile_ok(SHAPES);
    let ty = c.split("MP_DEFINE_CONST_OBJ_TYPE(\n    m_Square_type,").nth(1).unwrap();
    let ty = &ty[..ty.find(");").unwrap()];
    assert!(ty.contains("make_new, m_Square_make_new"));
    assert!(ty.contains("attr, m_Square_attr"));
    assert!(ty.contains("print, m_Square_print"));
    assert!(ty.contains("parent, &m_Shape_type"));
    assert!(ty.contains("locals_dict, &m_Square_locals_dict"));
    assert!(c.contains("if (attr == MP_QSTR_double) {"));
    assert!(c.contains("mp_obj_print_helper(print, m_Shape___str___native(MP_OBJ_TO_PTR(self_in)), PRINT_STR);"));
}

#[test]
fn fields_are_reachable_by_offset() {
    let c = compile_ok(SHAPES);
    assert!(c.contains("{ MP_QSTR_name, offsetof(m_Square_obj_t, super.name), EMBER_FIELD_OBJ },"));
    assert!(c.contains("{ MP_QSTR_side, offsetof(m_Square_obj_t, side), EMBER_FIELD_FLOAT },"));
}

#[test]
fn dataclass_constructor_takes_its_fields() {
    let c = compile_ok(
        "from dataclasses import dataclass\n\n@dataclass\nclass Point:\n    x: float\n    y: float = 0.0\n",
    );
    let make_new = c_function(&c, "m_Point_make_new");
    assert!(make_new.contains("{ MP_QSTR_x, MP_ARG_REQUIRED | MP_ARG_OBJ, {.u_obj = MP_OBJ_NULL} },"));
    assert!(make_new.contains("{ MP_QSTR_y, MP_ARG_OBJ, {.u_obj = MP_OBJ_NULL} },"));
    assert!(make_new.contains("self->x = x;"));
    assert!(make_new.contains("self->y = y;"));
}
