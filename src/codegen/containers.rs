//! Unboxed tuple records and the sizing rules of the container helpers.

use std::collections::BTreeSet;

use crate::ir::scan::visit_values;
use crate::ir::{IRFunction, IRModule, IRValue};
use crate::typeck::types::{CType, RTuple};
use super::writer::CWriter;

/// Capacity after one append-triggered growth of a sequence holding `cap` slots.
pub fn next_capacity(cap: usize) -> usize {
    cap + cap / 2 + 2
}

/// Initial slot count of a mapping built from `n` entries.
pub fn dict_capacity(n: usize) -> usize {
    (2 * n).max(4)
}

/// Number of reallocations `n` consecutive appends to an empty sequence cause.
pub fn reallocations(n: usize) -> usize {
    let mut cap = 0;
    let mut count = 0;
    for len in 0..n {
        if len >= cap {
            cap = next_capacity(cap);
            count += 1;
        }
    }
    count
}

/// Every rtuple shape the module mentions, in a stable order.
pub fn collect_rtuples(module: &IRModule) -> BTreeSet<RTuple> {
    let mut shapes = BTreeSet::new();
    let mut note = |ty: &CType| {
        if let CType::RTuple(shape) = ty {
            shapes.insert(shape.clone());
        }
    };
    let functions = module.functions.iter().chain(module.classes.iter().flat_map(|c| c.methods.iter()));
    for f in functions {
        for ty in function_types(f) {
            note(&ty);
        }
        visit_values(&f.body, &mut |value| match value {
            IRValue::MakeRTuple { shape, .. } => note(&CType::RTuple(shape.clone())),
            IRValue::Box { from: ty, .. } | IRValue::Unbox { to: ty, .. } | IRValue::Cast { to: ty, .. } => note(ty),
            _ => {}
        });
    }
    for class in &module.classes {
        for slot in &class.vtable {
            slot.params.iter().for_each(&mut note);
            note(&slot.ret);
        }
        for field in &class.fields {
            note(&field.storage());
        }
        if let Some(init) = &class.init {
            for p in &init.params {
                note(&p.ty.c_type());
            }
        }
    }
    shapes
}

fn function_types(f: &IRFunction) -> Vec<CType> {
    let mut types = f.temps.clone();
    types.extend(f.params.iter().map(|p| p.ty.c_type()));
    types.extend(f.locals.iter().map(|l| l.ty.c_type()));
    types.push(f.ret.c_type());
    types
}

/// Record typedef plus its box and unbox conversions.
pub fn emit_rtuple(w: &mut CWriter, shape: &RTuple) {
    let name = shape.c_name();
    let n = shape.len();
    w.open(format!("typedef struct _{name}"));
    for (i, elem) in shape.elems.iter().enumerate() {
        w.line(format!("{} f{i};", elem.c_type().c_name()));
    }
    w.close_with(&format!("}} {name};"));
    w.blank();

    let boxed: Vec<String> = shape
        .elems
        .iter()
        .enumerate()
        .map(|(i, elem)| elem.c_type().box_expr(&format!("t.f{i}")))
        .collect();
    w.open(format!("static inline mp_obj_t {}({name} t)", shape.box_fn()));
    w.line(format!("mp_obj_t items[{n}] = {{ {} }};", boxed.join(", ")));
    w.line(format!("return mp_obj_new_tuple({n}, items);"));
    w.close();
    w.blank();

    let unboxed: Vec<String> = shape
        .elems
        .iter()
        .enumerate()
        .map(|(i, elem)| elem.c_type().unbox_expr(&format!("items[{i}]")))
        .collect();
    w.open(format!("static inline {name} {}(mp_obj_t o)", shape.unbox_fn()));
    w.line("mp_obj_t *items;");
    w.line(format!("mp_obj_get_array_fixed_n(o, {n}, &items);"));
    w.line(format!("{name} t = {{ {} }};", unboxed.join(", ")));
    w.line("return t;");
    w.close();
    w.blank();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeck::types::Scalar;

    #[test]
    fn growth_adds_half_plus_two() {
        assert_eq!(next_capacity(0), 2);
        assert_eq!(next_capacity(2), 5);
        assert_eq!(next_capacity(5), 9);
        assert_eq!(next_capacity(9), 15);
    }

    #[test]
    fn dict_tables_start_at_four_slots() {
        assert_eq!(dict_capacity(0), 4);
        assert_eq!(dict_capacity(1), 4);
        assert_eq!(dict_capacity(3), 6);
    }

    #[test]
    fn reallocation_count_for_small_sequences() {
        assert_eq!(reallocations(0), 0);
        assert_eq!(reallocations(1), 1);
        assert_eq!(reallocations(2), 1);
        assert_eq!(reallocations(3), 2);
        assert_eq!(reallocations(10), 4);
    }

    #[test]
    fn rtuple_record_and_conversions() {
        let shape = RTuple { elems: vec![Scalar::Int, Scalar::Float] };
        let mut w = CWriter::new();
        emit_rtuple(&mut w, &shape);
        insta::assert_snapshot!(w.finish(), @r"
        typedef struct _rtuple_int_float_t {
            mp_int_t f0;
            mp_float_t f1;
        } rtuple_int_float_t;

        static inline mp_obj_t rtuple_int_float_box(rtuple_int_float_t t) {
            mp_obj_t items[2] = { mp_obj_new_int(t.f0), mp_obj_new_float(t.f1) };
            return mp_obj_new_tuple(2, items);
        }

        static inline rtuple_int_float_t rtuple_int_float_unbox(mp_obj_t o) {
            mp_obj_t *items;
            mp_obj_get_array_fixed_n(o, 2, &items);
            rtuple_int_float_t t = { mp_obj_get_int(items[0]), mp_get_float_checked(items[1]) };
            return t;
        }
        ");
    }
}
