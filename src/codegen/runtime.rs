//! C helpers every generated unit carries ahead of its own definitions.
//!
//! Helpers are `static inline`, so a unit that never calls one pays nothing
//! and two units linked into one firmware never clash.

use crate::config::CompileOptions;
use super::writer::CWriter;

/// One helper definition, emitted verbatim.
pub struct Helper {
    pub name: &'static str,
    pub source: &'static str,
}

const INCLUDES: &[&str] = &[
    "<stdbool.h>",
    "<stddef.h>",
    "<stdint.h>",
    "<string.h>",
    "\"py/obj.h\"",
    "\"py/objlist.h\"",
    "\"py/objtuple.h\"",
    "\"py/runtime.h\"",
];

const CONVERSIONS: &[Helper] = &[
    Helper {
        name: "mp_get_float_checked",
        source: "\
static inline mp_float_t mp_get_float_checked(mp_obj_t o) {
    if (mp_obj_is_float(o)) {
        return mp_obj_float_get(o);
    }
    return (mp_float_t)mp_obj_get_int(o);
}",
    },
    Helper {
        name: "ember_check_str",
        source: "\
static inline mp_obj_t ember_check_str(mp_obj_t o) {
    if (!mp_obj_is_str(o)) {
        mp_raise_TypeError(MP_ERROR_TEXT(\"expected str\"));
    }
    return o;
}",
    },
    Helper {
        name: "ember_check_instance",
        source: "\
static inline mp_obj_t ember_check_instance(mp_obj_t o, const mp_obj_type_t *type) {
    if (!mp_obj_is_subclass_fast(MP_OBJ_FROM_PTR(mp_obj_get_type(o)), MP_OBJ_FROM_PTR(type))) {
        mp_raise_TypeError(MP_ERROR_TEXT(\"argument has the wrong type\"));
    }
    return o;
}",
    },
];

const ARITHMETIC: &[Helper] = &[
    Helper {
        name: "ember_int_floordiv",
        source: "\
static inline mp_int_t ember_int_floordiv(mp_int_t a, mp_int_t b) {
    if (b == 0) {
        mp_raise_msg(&mp_type_ZeroDivisionError, MP_ERROR_TEXT(\"integer division by zero\"));
    }
    if (b == -1) {
        return (mp_int_t)(0 - (mp_uint_t)a);
    }
    mp_int_t q = a / b;
    if ((a % b != 0) && ((a < 0) != (b < 0))) {
        q -= 1;
    }
    return q;
}",
    },
    Helper {
        name: "ember_int_mod",
        source: "\
static inline mp_int_t ember_int_mod(mp_int_t a, mp_int_t b) {
    if (b == 0) {
        mp_raise_msg(&mp_type_ZeroDivisionError, MP_ERROR_TEXT(\"integer modulo by zero\"));
    }
    if (b == -1) {
        return 0;
    }
    mp_int_t r = a % b;
    if (r != 0 && ((r < 0) != (b < 0))) {
        r += b;
    }
    return r;
}",
    },
    Helper {
        name: "ember_int_pow",
        source: "\
static inline mp_int_t ember_int_pow(mp_int_t base, mp_int_t exp) {
    if (exp < 0) {
        mp_raise_ValueError(MP_ERROR_TEXT(\"negative power of an integer\"));
    }
    mp_int_t result = 1;
    while (exp > 0) {
        if (exp & 1) {
            result *= base;
        }
        exp >>= 1;
        base *= base;
    }
    return result;
}",
    },
    Helper {
        name: "ember_float_div",
        source: "\
static inline mp_float_t ember_float_div(mp_float_t a, mp_float_t b) {
    if (b == 0) {
        mp_raise_msg(&mp_type_ZeroDivisionError, MP_ERROR_TEXT(\"float division by zero\"));
    }
    return a / b;
}",
    },
    Helper {
        name: "ember_float_mod",
        source: "\
static inline mp_float_t ember_float_mod(mp_float_t a, mp_float_t b) {
    if (b == 0) {
        mp_raise_msg(&mp_type_ZeroDivisionError, MP_ERROR_TEXT(\"float modulo by zero\"));
    }
    mp_float_t r = MICROPY_FLOAT_C_FUN(fmod)(a, b);
    if (r != 0 && ((r < 0) != (b < 0))) {
        r += b;
    }
    return r;
}",
    },
];

const CONTAINERS: &[Helper] = &[
    Helper {
        name: "ember_list_len",
        source: "\
static inline mp_int_t ember_list_len(mp_obj_t o) {
    if (mp_obj_is_type(o, &mp_type_list)) {
        return (mp_int_t)((mp_obj_list_t *)MP_OBJ_TO_PTR(o))->len;
    }
    return mp_obj_get_int(mp_obj_len(o));
}",
    },
    Helper {
        name: "ember_list_index",
        source: "\
static inline size_t ember_list_index(const mp_obj_list_t *list, mp_int_t index) {
    if (index < 0) {
        index += (mp_int_t)list->len;
    }
    if (index < 0 || (size_t)index >= list->len) {
        mp_raise_msg(&mp_type_IndexError, MP_ERROR_TEXT(\"list index out of range\"));
    }
    return (size_t)index;
}",
    },
    Helper {
        name: "ember_list_get",
        source: "\
static inline mp_obj_t ember_list_get(mp_obj_t o, mp_int_t index) {
    if (mp_obj_is_type(o, &mp_type_list)) {
        mp_obj_list_t *list = MP_OBJ_TO_PTR(o);
        return list->items[ember_list_index(list, index)];
    }
    return mp_obj_subscr(o, mp_obj_new_int(index), MP_OBJ_SENTINEL);
}",
    },
    Helper {
        name: "ember_list_set",
        source: "\
static inline void ember_list_set(mp_obj_t o, mp_int_t index, mp_obj_t value) {
    if (mp_obj_is_type(o, &mp_type_list)) {
        mp_obj_list_t *list = MP_OBJ_TO_PTR(o);
        list->items[ember_list_index(list, index)] = value;
        return;
    }
    mp_obj_subscr(o, mp_obj_new_int(index), value);
}",
    },
    Helper {
        name: "ember_list_append",
        source: "\
static inline void ember_list_append(mp_obj_t o, mp_obj_t item) {
    if (mp_obj_is_type(o, &mp_type_list)) {
        mp_obj_list_t *list = MP_OBJ_TO_PTR(o);
        if (list->len >= list->alloc) {
            size_t alloc = list->alloc + list->alloc / 2 + 2;
            list->items = m_renew(mp_obj_t, list->items, list->alloc, alloc);
            mp_seq_clear(list->items, list->len + 1, alloc, sizeof(*list->items));
            list->alloc = alloc;
        }
        list->items[list->len++] = item;
        return;
    }
    mp_obj_t dest[3];
    mp_load_method(o, MP_QSTR_append, dest);
    dest[2] = item;
    mp_call_method_n_kw(1, 0, dest);
}",
    },
    Helper {
        name: "ember_dict_new",
        source: "\
static inline mp_obj_t ember_dict_new(size_t n) {
    return mp_obj_new_dict(n < 2 ? 4 : 2 * n);
}",
    },
    Helper {
        name: "ember_kw_take",
        source: "\
static inline mp_obj_t ember_kw_take(mp_obj_t dict, qstr name) {
    mp_map_t *map = mp_obj_dict_get_map(dict);
    mp_map_elem_t *elem = mp_map_lookup(map, MP_OBJ_NEW_QSTR(name), MP_MAP_LOOKUP_REMOVE_IF_FOUND);
    return elem == NULL ? MP_OBJ_NULL : elem->value;
}",
    },
];

const FIELDS: &[Helper] = &[
    Helper {
        name: "ember_field_t",
        source: "\
#define EMBER_FIELD_OBJ (0)
#define EMBER_FIELD_INT (1)
#define EMBER_FIELD_FLOAT (2)
#define EMBER_FIELD_BOOL (3)

typedef struct _ember_field_t {
    qstr name;
    uint16_t offset;
    uint8_t kind;
} ember_field_t;",
    },
    Helper {
        name: "ember_field_lookup",
        source: "\
static inline const ember_field_t *ember_field_lookup(const ember_field_t *fields, size_t n, qstr name) {
    for (size_t i = 0; i < n; i++) {
        if (fields[i].name == name) {
            return &fields[i];
        }
    }
    return NULL;
}",
    },
    Helper {
        name: "ember_field_load",
        source: "\
static inline mp_obj_t ember_field_load(void *self, const ember_field_t *field) {
    char *slot = (char *)self + field->offset;
    switch (field->kind) {
        case EMBER_FIELD_INT:
            return mp_obj_new_int(*(mp_int_t *)slot);
        case EMBER_FIELD_FLOAT:
            return mp_obj_new_float(*(mp_float_t *)slot);
        case EMBER_FIELD_BOOL:
            return mp_obj_new_bool(*(bool *)slot);
        default:
            return *(mp_obj_t *)slot;
    }
}",
    },
    Helper {
        name: "ember_field_store",
        source: "\
static inline void ember_field_store(void *self, const ember_field_t *field, mp_obj_t value) {
    char *slot = (char *)self + field->offset;
    switch (field->kind) {
        case EMBER_FIELD_INT:
            *(mp_int_t *)slot = mp_obj_get_int(value);
            break;
        case EMBER_FIELD_FLOAT:
            *(mp_float_t *)slot = mp_get_float_checked(value);
            break;
        case EMBER_FIELD_BOOL:
            *(bool *)slot = mp_obj_is_true(value);
            break;
        default:
            *(mp_obj_t *)slot = value;
            break;
    }
}",
    },
];

/// Every helper in emission order.
pub fn helpers() -> impl Iterator<Item = &'static Helper> {
    CONVERSIONS.iter().chain(ARITHMETIC).chain(CONTAINERS).chain(FIELDS)
}

pub fn is_helper(symbol: &str) -> bool {
    helpers().any(|h| h.name == symbol)
}

/// Header comment, includes and helper definitions.
pub fn emit_prelude(w: &mut CWriter, options: &CompileOptions) {
    w.line(format!("/* Generated by emberc for module '{}'. Do not edit. */", options.module_name));
    w.blank();
    for include in INCLUDES {
        w.line(format!("#include {include}"));
    }
    w.blank();
    for helper in helpers() {
        for line in helper.source.lines() {
            w.line(line);
        }
        w.blank();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_helper_defines_its_name() {
        for helper in helpers() {
            assert!(helper.source.contains(helper.name), "{} missing from its source", helper.name);
        }
    }

    #[test]
    fn append_growth_matches_the_capacity_rule() {
        let append = helpers().find(|h| h.name == "ember_list_append").unwrap();
        assert!(append.source.contains("list->alloc + list->alloc / 2 + 2"));
    }

    #[test]
    fn prelude_includes_the_runtime_headers() {
        let mut w = CWriter::new();
        emit_prelude(&mut w, &CompileOptions::for_module("geo"));
        let text = w.finish();
        assert!(text.starts_with("/* Generated by emberc for module 'geo'"));
        assert!(text.contains("#include \"py/runtime.h\""));
        assert!(text.contains("static inline mp_int_t ember_int_floordiv"));
    }

    #[test]
    fn division_by_minus_one_skips_the_native_operator() {
        for name in ["ember_int_floordiv", "ember_int_mod"] {
            let helper = helpers().find(|h| h.name == name).unwrap();
            let guard = helper.source.find("if (b == -1)").unwrap_or_else(|| panic!("{name} has no -1 guard"));
            let native = helper.source.find("a / b").or_else(|| helper.source.find("a % b")).unwrap();
            assert!(guard < native, "{name} divides before the -1 guard");
        }
    }
}
