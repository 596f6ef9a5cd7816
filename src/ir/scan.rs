//! Post-build rewrites over function bodies.

use std::collections::BTreeSet;

use super::{Callee, Handler, IRStmt, IRValue, Instr, Place, RaiseKind, RangeStep, StmtKind, TempId};

/// Replace every `Box(Local(var))` in `body` with the boxed loop item `item`.
/// Only valid while the body never reassigns `var`. Returns the number of
/// uses rewritten; zero means the loop needs no boxed alias.
pub fn rebox_loop_uses(body: &mut [IRStmt], var: &str, item: TempId) -> usize {
    let mut count = 0;
    for stmt in body.iter_mut() {
        walk_stmt_values(stmt, &mut |value| count += rewrite(value, var, item));
    }
    count
}

fn rewrite(value: &mut IRValue, var: &str, item: TempId) -> usize {
    if let IRValue::Box { value: inner, .. } = value {
        if matches!(inner.as_ref(), IRValue::Local(name) if name == var) {
            *value = IRValue::Temp(item);
            return 1;
        }
    }
    let mut count = 0;
    for child in children_mut(value) {
        count += rewrite(child, var, item);
    }
    count
}

fn children_mut(value: &mut IRValue) -> Vec<&mut IRValue> {
    match value {
        IRValue::Const(_)
        | IRValue::Local(_)
        | IRValue::Temp(_)
        | IRValue::SelfPtr
        | IRValue::SelfObj
        | IRValue::Raw(_)
        | IRValue::Global(_) => Vec::new(),
        IRValue::Binary { lhs, rhs, .. }
        | IRValue::Compare { lhs, rhs, .. }
        | IRValue::Logical { lhs, rhs, .. } => vec![lhs.as_mut(), rhs.as_mut()],
        IRValue::Unary { operand, .. } => vec![operand.as_mut()],
        IRValue::Not(inner) => vec![inner.as_mut()],
        IRValue::Ternary { cond, then_value, else_value } => {
            vec![cond.as_mut(), then_value.as_mut(), else_value.as_mut()]
        }
        IRValue::Box { value, .. }
        | IRValue::Unbox { value, .. }
        | IRValue::Cast { value, .. }
        | IRValue::ObjPtr { value, .. }
        | IRValue::TupleField { value, .. } => vec![value.as_mut()],
        IRValue::Field { ptr, .. } => vec![ptr.as_mut()],
        IRValue::MakeRTuple { fields, .. } => fields.iter_mut().collect(),
    }
}

/// Apply `f` to every top-level value a statement (and its nested statements) reads.
pub fn walk_stmt_values(stmt: &mut IRStmt, f: &mut dyn FnMut(&mut IRValue)) {
    for instr in stmt.prelude.iter_mut() {
        walk_instr_values(instr, f);
    }
    match &mut stmt.kind {
        StmtKind::Assign { value, .. } => f(value),
        StmtKind::FieldStore { ptr, value, .. } => {
            f(ptr);
            f(value);
        }
        StmtKind::Exec
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Unsupported(_)
        | StmtKind::Return(None) => {}
        StmtKind::Return(Some(value)) | StmtKind::Yield { value, .. } => f(value),
        StmtKind::If { cond, then_body, else_body } => {
            f(cond);
            walk_block(then_body, f);
            walk_block(else_body, f);
        }
        StmtKind::While { cond_prelude, cond, body } => {
            for instr in cond_prelude.iter_mut() {
                walk_instr_values(instr, f);
            }
            f(cond);
            walk_block(body, f);
        }
        StmtKind::RangeLoop { start, stop, step, body, .. } => {
            f(start);
            f(stop);
            if let RangeStep::Dynamic(step) = step {
                f(step);
            }
            walk_block(body, f);
        }
        StmtKind::IterLoop { iterable, body, .. } => {
            f(iterable);
            walk_block(body, f);
        }
        StmtKind::Try { body, handlers, orelse, finally } => {
            walk_block(body, f);
            for Handler { exc_type, body, .. } in handlers.iter_mut() {
                if let Some(exc_type) = exc_type {
                    f(exc_type);
                }
                walk_block(body, f);
            }
            walk_block(orelse, f);
            walk_block(finally, f);
        }
        StmtKind::Raise(RaiseKind::Object(value)) => f(value),
        StmtKind::Raise(_) => {}
    }
}

fn walk_block(body: &mut [IRStmt], f: &mut dyn FnMut(&mut IRValue)) {
    for stmt in body.iter_mut() {
        walk_stmt_values(stmt, f);
    }
}

fn walk_instr_values(instr: &mut Instr, f: &mut dyn FnMut(&mut IRValue)) {
    match instr {
        Instr::Assign { value, .. } => f(value),
        Instr::Call { callee, args, kwargs, .. } => {
            match callee {
                Callee::Dynamic(target) => f(target),
                Callee::Method { receiver, .. } => f(receiver),
                Callee::Virtual { ptr, .. } => f(ptr),
                Callee::Boxed { .. } | Callee::Native(_) | Callee::Construct { .. } => {}
            }
            args.iter_mut().for_each(&mut *f);
            kwargs.iter_mut().for_each(|(_, v)| f(v));
        }
        Instr::NewList { items, .. } | Instr::NewTuple { items, .. } | Instr::NewSet { items, .. } => {
            items.iter_mut().for_each(&mut *f);
        }
        Instr::NewDict { entries, .. } => {
            for (k, v) in entries.iter_mut() {
                f(k);
                f(v);
            }
        }
        Instr::Unpack { source, .. } => f(source),
        Instr::Print { args, .. } => args.iter_mut().for_each(&mut *f),
        Instr::Block(stmts) => walk_block(stmts, f),
    }
}

/// Call `f` on every value a body reads, including nested sub-values.
pub fn visit_values(body: &[IRStmt], f: &mut dyn FnMut(&IRValue)) {
    let mut copy = body.to_vec();
    for stmt in copy.iter_mut() {
        walk_stmt_values(stmt, &mut |value| visit_value(value, f));
    }
}

fn visit_value(value: &mut IRValue, f: &mut dyn FnMut(&IRValue)) {
    f(value);
    for child in children_mut(value) {
        visit_value(child, f);
    }
}

/// Every temporary a body reads or writes. Allocated temporaries whose only
/// use was dropped never reach the emitted declarations.
pub fn referenced_temps(body: &[IRStmt]) -> BTreeSet<TempId> {
    let mut used = BTreeSet::new();
    visit_values(body, &mut |value| {
        if let IRValue::Temp(t) = value {
            used.insert(*t);
        }
    });
    collect_dests(body, &mut used);
    used
}

fn collect_dests(body: &[IRStmt], used: &mut BTreeSet<TempId>) {
    for stmt in body {
        collect_instr_dests(&stmt.prelude, used);
        match &stmt.kind {
            StmtKind::Assign { place: Place::Temp(t), .. } => {
                used.insert(*t);
            }
            StmtKind::If { then_body, else_body, .. } => {
                collect_dests(then_body, used);
                collect_dests(else_body, used);
            }
            StmtKind::While { cond_prelude, body, .. } => {
                collect_instr_dests(cond_prelude, used);
                collect_dests(body, used);
            }
            StmtKind::RangeLoop { body, .. } => collect_dests(body, used),
            StmtKind::IterLoop { item, body, .. } => {
                used.insert(*item);
                collect_dests(body, used);
            }
            StmtKind::Try { body, handlers, orelse, finally } => {
                collect_dests(body, used);
                for handler in handlers {
                    collect_dests(&handler.body, used);
                }
                collect_dests(orelse, used);
                collect_dests(finally, used);
            }
            _ => {}
        }
    }
}

fn collect_instr_dests(prelude: &[Instr], used: &mut BTreeSet<TempId>) {
    for instr in prelude {
        match instr {
            Instr::Assign { dest, .. }
            | Instr::NewList { dest, .. }
            | Instr::NewTuple { dest, .. }
            | Instr::NewDict { dest, .. }
            | Instr::NewSet { dest, .. } => {
                used.insert(*dest);
            }
            Instr::Call { dest, .. } => used.extend(*dest),
            Instr::Unpack { dests, .. } => used.extend(dests.iter().copied()),
            Instr::Block(stmts) => collect_dests(stmts, used),
            Instr::Print { .. } => {}
        }
    }
}

/// Iterator buffer slots the generic loops of a body use.
pub fn used_iter_slots(body: &[IRStmt]) -> BTreeSet<usize> {
    let mut slots = BTreeSet::new();
    visit_stmts(body, &mut |stmt| {
        if let StmtKind::IterLoop { slot, .. } = &stmt.kind {
            slots.insert(*slot);
        }
    });
    slots
}

/// Call `f` on every statement, including those nested in blocks and preludes.
pub fn visit_stmts(body: &[IRStmt], f: &mut dyn FnMut(&IRStmt)) {
    for stmt in body {
        f(stmt);
        visit_prelude(&stmt.prelude, f);
        match &stmt.kind {
            StmtKind::If { then_body, else_body, .. } => {
                visit_stmts(then_body, f);
                visit_stmts(else_body, f);
            }
            StmtKind::While { cond_prelude, body, .. } => {
                visit_prelude(cond_prelude, f);
                visit_stmts(body, f);
            }
            StmtKind::RangeLoop { body, .. } | StmtKind::IterLoop { body, .. } => visit_stmts(body, f),
            StmtKind::Try { body, handlers, orelse, finally } => {
                visit_stmts(body, f);
                for handler in handlers {
                    visit_stmts(&handler.body, f);
                }
                visit_stmts(orelse, f);
                visit_stmts(finally, f);
            }
            _ => {}
        }
    }
}

fn visit_prelude(prelude: &[Instr], f: &mut dyn FnMut(&IRStmt)) {
    for instr in prelude {
        if let Instr::Block(stmts) = instr {
            visit_stmts(stmts, f);
        }
    }
}
