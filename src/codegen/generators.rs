//! Generator functions as resumable state machines.
//!
//! The entry point allocates a frame object holding every parameter, local and
//! temporary, and returns it. Each `next()` re-enters the body through a switch
//! on the saved state and jumps to the label after the last `yield`.

use crate::config::CompileOptions;
use crate::ir::scan::{referenced_temps, used_iter_slots};
use crate::ir::temps::temp_name;
use crate::ir::IRFunction;
use crate::typeck::env::ModuleEnv;
use crate::typeck::types::CType;
use super::function::{boxed_prologue, entry_signature, fun_obj_define, source_comment, zero_expr, BodyEmitter, ReturnMode};
use super::writer::CWriter;

/// Per-generator symbols derived from the entry point.
pub struct GenNames {
    pub frame_t: String,
    pub type_obj: String,
    pub iternext: String,
}

impl GenNames {
    pub fn new(symbol: &str) -> Self {
        Self {
            frame_t: format!("{symbol}_gen_t"),
            type_obj: format!("{symbol}_gen_type"),
            iternext: format!("{symbol}_gen_iternext"),
        }
    }
}

/// (C type, member name) of every value the frame keeps across a suspension.
fn frame_members(f: &IRFunction) -> Vec<(CType, String)> {
    let mut members: Vec<(CType, String)> = f
        .params
        .iter()
        .chain(f.star_args.iter())
        .chain(f.star_kwargs.iter())
        .map(|p| (p.ty.c_type(), p.c_name.clone()))
        .collect();
    members.extend(f.locals.iter().map(|l| (l.ty.c_type(), l.c_name.clone())));
    for t in referenced_temps(&f.body) {
        if let Some(ty) = t.checked_sub(1).and_then(|i| f.temps.get(i)) {
            if *ty != CType::Void {
                members.push((ty.clone(), temp_name(t)));
            }
        }
    }
    members
}

pub fn emit_generator(w: &mut CWriter, f: &IRFunction, env: &ModuleEnv, options: &CompileOptions) {
    let _span = tracing::trace_span!("emit_generator", name = %f.name).entered();
    let names = GenNames::new(&f.symbol);
    let members = frame_members(f);
    let slots = used_iter_slots(&f.body);

    source_comment(w, f, options);
    w.open(format!("typedef struct _{}", names.frame_t));
    w.line("mp_obj_base_t base;");
    w.line("uint16_t state;");
    for (ty, name) in &members {
        w.line(format!("{} {name};", ty.c_name()));
    }
    for slot in &slots {
        w.line(format!("mp_obj_iter_buf_t _iter_buf{slot};"));
        w.line(format!("mp_obj_t _iter{slot};"));
    }
    w.close_with(&format!("}} {};", names.frame_t));
    w.blank();

    w.line(format!("static mp_obj_t {}(mp_obj_t self_in);", names.iternext));
    w.line("static MP_DEFINE_CONST_OBJ_TYPE(");
    w.line(format!("    {},", names.type_obj));
    w.line("    MP_QSTR_generator,");
    w.line("    MP_TYPE_FLAG_ITER_IS_ITERNEXT,");
    w.line(format!("    iter, {}", names.iternext));
    w.line("    );");
    w.blank();

    w.open(format!("static mp_obj_t {}(mp_obj_t self_in)", names.iternext));
    w.line(format!("{} *gen = MP_OBJ_TO_PTR(self_in);", names.frame_t));
    w.open("switch (gen->state)");
    w.line("case 0:");
    w.line("    break;");
    for state in 1..=f.yield_count {
        w.line(format!("case {state}:"));
        w.line(format!("    goto _resume{state};"));
    }
    w.line("default:");
    w.line("    return MP_OBJ_STOP_ITERATION;");
    w.close();
    let mut body = BodyEmitter::new(options, ReturnMode::Generator, 1).in_frame();
    body.function_body(&f.body);
    w.append(body.finish());
    w.close();
    w.blank();

    let prologue = boxed_prologue(env, f.shape, None, &f.params, f.star_args.as_ref(), f.star_kwargs.as_ref());
    w.open(entry_signature(&f.symbol, &prologue.params));
    for line in &prologue.lines {
        w.line(line);
    }
    w.line(format!("{0} *gen = mp_obj_malloc({0}, &{1});", names.frame_t, names.type_obj));
    w.line("gen->state = 0;");
    let bound = f.params.len() + usize::from(f.star_args.is_some()) + usize::from(f.star_kwargs.is_some());
    for (i, (ty, name)) in members.iter().enumerate() {
        if i < bound {
            w.line(format!("gen->{name} = {name};"));
        } else {
            w.line(format!("gen->{name} = {};", zero_expr(ty)));
        }
    }
    w.line("return MP_OBJ_FROM_PTR(gen);");
    w.close();
    w.line(fun_obj_define(f.shape, &format!("{}_obj", f.symbol), &f.symbol));
    w.blank();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionKind, IRParam, IRStmt, IRValue, RangeStep, StmtKind};
    use crate::typeck::env::ArgShape;
    use crate::typeck::types::{ReturnType, SourceType};

    /// `def count(n: int): for i in range(n): yield i`
    fn counter() -> IRFunction {
        let yield_i = IRStmt::bare(
            StmtKind::Yield {
                state: 1,
                value: IRValue::Box { from: CType::Int, value: Box::new(IRValue::Local("i".into())) },
            },
            2,
        );
        let body = vec![IRStmt::bare(
            StmtKind::RangeLoop {
                var: "i".into(),
                start: IRValue::int(0),
                stop: IRValue::Local("n".into()),
                step: RangeStep::Const(1),
                body: vec![yield_i],
            },
            2,
        )];
        IRFunction {
            name: "count".into(),
            symbol: "m_count".into(),
            kind: FunctionKind::Free,
            params: vec![IRParam { name: "n".into(), c_name: "n".into(), ty: SourceType::MachineInt, default: None }],
            star_args: None,
            star_kwargs: None,
            ret: ReturnType::Value(SourceType::opaque()),
            body,
            locals: vec![crate::ir::IRLocal { name: "i".into(), c_name: "i".into(), ty: SourceType::MachineInt }],
            temps: Vec::new(),
            iter_slots: 0,
            yield_count: 1,
            is_generator: true,
            shape: ArgShape::Fixed(1),
            line: 1,
            doc: None,
            failed: false,
        }
    }

    #[test]
    fn frame_keeps_parameters_and_locals() {
        let members = frame_members(&counter());
        let names: Vec<_> = members.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(names, ["n", "i"]);
    }

    #[test]
    fn resume_jumps_to_the_yield_label() {
        let mut w = CWriter::new();
        emit_generator(&mut w, &counter(), &ModuleEnv::new("m"), &CompileOptions::default());
        let text = w.finish();
        assert!(text.contains("typedef struct _m_count_gen_t {"));
        assert!(text.contains("        goto _resume1;"));
        assert!(text.contains("for (gen->i = 0; gen->i < gen->n; gen->i++) {"));
        assert!(text.contains("gen->state = 1;\n"));
        assert!(text.contains("return mp_obj_new_int(gen->i);"));
        assert!(text.contains("_resume1:;"));
        assert!(text.contains("gen->state = 0xFFFF;"));
        assert!(text.contains("gen->n = n;"));
        assert!(text.contains("gen->i = 0;"));
        assert!(text.contains("static MP_DEFINE_CONST_FUN_OBJ_1(m_count_obj, m_count);"));
    }
}
