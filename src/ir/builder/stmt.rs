use std::collections::HashMap;

use crate::diagnostics::CompileError;
use crate::parser::ast::{BinOp, Block, ExceptHandler, Expr, Stmt};
use crate::span::{Span, Spanned};
use crate::typeck::types::{CType, ReturnType, SourceType};
use crate::visit;
use crate::ir::scan::rebox_loop_uses;
use crate::ir::{Constant, Handler, IRStmt, IRValue, Instr, Place, RaiseKind, RangeStep, StmtKind};
use super::{unsupported, FunctionContext, Typed, BUILTIN_EXCEPTIONS};

/// Drop the destination of a trailing call whose result nobody reads.
fn discard_result(pre: &mut [Instr], value: &IRValue) {
    let target = match value {
        IRValue::Temp(t) => Some(*t),
        IRValue::Unbox { value, .. } => match value.as_ref() {
            IRValue::Temp(t) => Some(*t),
            _ => None,
        },
        _ => None,
    };
    if let (Some(t), Some(Instr::Call { dest, .. })) = (target, pre.last_mut()) {
        if *dest == Some(t) {
            *dest = None;
        }
    }
}

impl FunctionContext<'_> {
    /// Lower a block. Unsupported statements become markers and are recorded;
    /// any other error fails the function.
    pub(crate) fn build_block(&mut self, block: &Spanned<Block>) -> Result<Vec<IRStmt>, CompileError> {
        let mut out = Vec::new();
        for stmt in &block.node.stmts {
            match self.build_stmt(stmt) {
                Ok(stmts) => out.extend(stmts),
                Err(CompileError::Unsupported { msg, span }) => {
                    let line = self.line(stmt.span);
                    tracing::debug!(line, %msg, "unsupported statement");
                    out.push(IRStmt::bare(StmtKind::Unsupported(msg.clone()), line));
                    self.errors.push(CompileError::unsupported(msg, span));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    fn build_stmt(&mut self, stmt: &Spanned<Stmt>) -> Result<Vec<IRStmt>, CompileError> {
        let line = self.line(stmt.span);
        match &stmt.node {
            Stmt::Expr(e) => {
                if let Expr::Yield(value) = &e.node {
                    return Ok(vec![self.build_yield(value.as_deref(), line)?]);
                }
                let (v, mut pre) = self.expr(e)?;
                discard_result(&mut pre, &v.value);
                if pre.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![IRStmt::new(pre, StmtKind::Exec, line)])
            }
            Stmt::Assign { target, value } => {
                if let Expr::Yield(yielded) = &value.node {
                    let mut out = vec![self.build_yield(yielded.as_deref(), line)?];
                    // Values sent into a generator are not supported; the target sees None.
                    out.extend(self.assign_to(target, Typed::none(), Vec::new(), line)?);
                    return Ok(out);
                }
                let (v, pre) = self.expr(value)?;
                self.assign_to(target, v, pre, line)
            }
            Stmt::AnnAssign { target, ty, value } => {
                let declared = self.resolver.resolve(ty)?;
                if let Expr::Ident(name) = &target.node {
                    if self.self_name.as_deref() == Some(name.as_str()) {
                        return Err(unsupported("rebinding self", target.span));
                    }
                    let c = self.local_c_name(name);
                    self.annotate(&c, declared);
                }
                match value {
                    Some(value) => {
                        let (v, pre) = self.expr(value)?;
                        self.assign_to(target, v, pre, line)
                    }
                    None => Ok(Vec::new()),
                }
            }
            Stmt::AugAssign { target, op, value } => self.build_aug_assign(target, *op, value, line),
            Stmt::Return(value) => self.build_return(value.as_ref(), line),
            Stmt::If { condition, then_block, else_block } => {
                let (c, pre) = self.expr(condition)?;
                let cond = self.truthy(&c);
                let then_body = self.build_block(then_block)?;
                let else_body = match else_block {
                    Some(block) => self.build_block(block)?,
                    None => Vec::new(),
                };
                Ok(vec![IRStmt::new(pre, StmtKind::If { cond, then_body, else_body }, line)])
            }
            Stmt::While { condition, body } => {
                let (c, cond_prelude) = self.expr(condition)?;
                let cond = self.truthy(&c);
                let body = self.build_block(body)?;
                Ok(vec![IRStmt::bare(StmtKind::While { cond_prelude, cond, body }, line)])
            }
            Stmt::For { var, iterable, body } => {
                Ok(vec![self.build_for_loop(var, iterable, line, Some(body), |cx| cx.build_block(body))?])
            }
            Stmt::Try { body, handlers, else_block, finally_block } => {
                self.build_try(body, handlers, else_block.as_ref(), finally_block.as_ref(), stmt.span, line)
            }
            Stmt::Raise { exc } => self.build_raise(exc.as_ref(), line),
            Stmt::Break => Ok(vec![IRStmt::bare(StmtKind::Break, line)]),
            Stmt::Continue => Ok(vec![IRStmt::bare(StmtKind::Continue, line)]),
            Stmt::Pass => Ok(Vec::new()),
            Stmt::Unsupported(msg) => Err(unsupported(msg.clone(), stmt.span)),
        }
    }

    // ── Assignment ──

    pub(crate) fn assign_to(
        &mut self,
        target: &Spanned<Expr>,
        v: Typed,
        mut pre: Vec<Instr>,
        line: usize,
    ) -> Result<Vec<IRStmt>, CompileError> {
        match &target.node {
            Expr::Ident(name) => {
                if self.self_name.as_deref() == Some(name.as_str()) {
                    return Err(unsupported("rebinding self", target.span));
                }
                let c = self.local_c_name(name);
                let value = self.bind_local(&c, v, &mut pre);
                Ok(vec![IRStmt::new(pre, StmtKind::Assign { place: Place::Local(c), value }, line)])
            }
            Expr::Attribute { object, attr } => {
                let obj = self.lower(object, &mut pre)?;
                let kind = self.store_attr(obj, &attr.node, v, &mut pre);
                Ok(vec![IRStmt::new(pre, kind, line)])
            }
            Expr::Index { object, index } => {
                let obj = self.lower(object, &mut pre)?;
                let idx = self.lower_subscript(index, &mut pre)?;
                self.store_index(obj, idx, v, &mut pre);
                Ok(vec![IRStmt::new(pre, StmtKind::Exec, line)])
            }
            Expr::Tuple(targets) | Expr::List(targets) => self.unpack_into(targets, v, pre, line),
            _ => Err(unsupported("assignment to this kind of target", target.span)),
        }
    }

    /// `a, b = value`: the value is fully evaluated before any target is bound.
    fn unpack_into(
        &mut self,
        targets: &[Spanned<Expr>],
        v: Typed,
        mut pre: Vec<Instr>,
        line: usize,
    ) -> Result<Vec<IRStmt>, CompileError> {
        let n = targets.len();
        let source_ty = v.ty.clone();
        let parts: Vec<Typed> = match (&source_ty, source_ty.c_type()) {
            (SourceType::FixedTuple(elems), CType::RTuple(_)) if elems.len() == n => {
                let elems = elems.clone();
                let tuple = self.simple(v, &mut pre);
                elems
                    .into_iter()
                    .enumerate()
                    .map(|(index, ty)| {
                        Typed::new(IRValue::TupleField { value: Box::new(tuple.value.clone()), index }, ty)
                    })
                    .collect()
            }
            (ty, _) => {
                let elem_types = match ty {
                    SourceType::FixedTuple(elems) if elems.len() == n => elems.clone(),
                    _ => vec![SourceType::opaque(); n],
                };
                let source = self.box_value(v);
                let dests: Vec<usize> = (0..n).map(|_| self.alloc(CType::Obj)).collect();
                pre.push(Instr::Unpack { source, dests: dests.clone() });
                dests
                    .into_iter()
                    .zip(elem_types)
                    .map(|(d, ty)| Typed::new(IRValue::unboxed(ty.c_type(), IRValue::Temp(d)), ty))
                    .collect()
            }
        };
        let mut out = Vec::new();
        if !pre.is_empty() {
            out.push(IRStmt::new(pre, StmtKind::Exec, line));
        }
        for (target, part) in targets.iter().zip(parts) {
            out.extend(self.assign_to(target, part, Vec::new(), line)?);
        }
        Ok(out)
    }

    fn build_aug_assign(
        &mut self,
        target: &Spanned<Expr>,
        op: BinOp,
        value: &Spanned<Expr>,
        line: usize,
    ) -> Result<Vec<IRStmt>, CompileError> {
        let mut pre = Vec::new();
        match &target.node {
            Expr::Ident(name) => {
                if self.self_name.as_deref() == Some(name.as_str()) {
                    return Err(unsupported("rebinding self", target.span));
                }
                let current = self.lower_name(name, target.span, &mut pre)?;
                let rhs = self.lower(value, &mut pre)?;
                let result = self.binary(op, current, rhs, true, &mut pre);
                let c = self.local_c_name(name);
                let value = self.bind_local(&c, result, &mut pre);
                Ok(vec![IRStmt::new(pre, StmtKind::Assign { place: Place::Local(c), value }, line)])
            }
            Expr::Attribute { object, attr } => {
                let obj = self.lower(object, &mut pre)?;
                let obj = self.simple(obj, &mut pre);
                let current = self.load_attr(obj.clone(), &attr.node, attr.span, &mut pre)?;
                let rhs = self.lower(value, &mut pre)?;
                let result = self.binary(op, current, rhs, true, &mut pre);
                let kind = self.store_attr(obj, &attr.node, result, &mut pre);
                Ok(vec![IRStmt::new(pre, kind, line)])
            }
            Expr::Index { object, index } => {
                let obj = self.lower(object, &mut pre)?;
                let obj = self.simple(obj, &mut pre);
                let idx = self.lower_subscript(index, &mut pre)?;
                let idx = self.simple(idx, &mut pre);
                let sliced = matches!(index.node, Expr::Slice { .. });
                let current = self.load_index(obj.clone(), idx.clone(), sliced, &mut pre);
                let rhs = self.lower(value, &mut pre)?;
                let result = self.binary(op, current, rhs, true, &mut pre);
                self.store_index(obj, idx, result, &mut pre);
                Ok(vec![IRStmt::new(pre, StmtKind::Exec, line)])
            }
            _ => Err(unsupported("augmented assignment to this kind of target", target.span)),
        }
    }

    // ── Control flow ──

    fn build_return(&mut self, value: Option<&Spanned<Expr>>, line: usize) -> Result<Vec<IRStmt>, CompileError> {
        let mut pre = Vec::new();
        let lowered = match value {
            Some(e) => Some(self.lower(e, &mut pre)?),
            None => None,
        };
        if self.is_generator {
            // Returning from a generator finishes it; the value is not delivered.
            if let Some(v) = &lowered {
                discard_result(&mut pre, &v.value);
            }
            return Ok(vec![IRStmt::new(pre, StmtKind::Return(None), line)]);
        }
        let kind = match self.ret.clone() {
            ReturnType::Nothing => {
                if let Some(v) = &lowered {
                    discard_result(&mut pre, &v.value);
                }
                if self.ret_ctype == CType::Void {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(IRValue::none()))
                }
            }
            ReturnType::Value(ty) => {
                let v = lowered.unwrap_or_else(Typed::none);
                let coerced = self.coerce(v, &ty, &mut pre);
                let out = if self.ret_ctype == CType::Obj { IRValue::boxed(ty.c_type(), coerced) } else { coerced };
                StmtKind::Return(Some(out))
            }
        };
        Ok(vec![IRStmt::new(pre, kind, line)])
    }

    fn build_raise(&mut self, exc: Option<&Spanned<Expr>>, line: usize) -> Result<Vec<IRStmt>, CompileError> {
        let Some(exc) = exc else {
            return Ok(vec![IRStmt::bare(StmtKind::Raise(RaiseKind::Reraise), line)]);
        };
        let builtin = |cx: &Self, name: &str| BUILTIN_EXCEPTIONS.contains(&name) && !cx.shadowed(name);
        match &exc.node {
            Expr::Ident(name) if builtin(self, name) => {
                return Ok(vec![IRStmt::bare(StmtKind::Raise(RaiseKind::Type(name.clone())), line)]);
            }
            Expr::Call { func, args, kwargs } if kwargs.is_empty() && args.len() == 1 => {
                if let (Expr::Ident(name), Expr::StringLit(message)) = (&func.node, &args[0].node) {
                    if builtin(self, name) {
                        let kind = RaiseKind::Message { exc_type: name.clone(), message: message.clone() };
                        return Ok(vec![IRStmt::bare(StmtKind::Raise(kind), line)]);
                    }
                }
            }
            _ => {}
        }
        let (v, pre) = self.expr(exc)?;
        let value = self.box_value(v);
        Ok(vec![IRStmt::new(pre, StmtKind::Raise(RaiseKind::Object(value)), line)])
    }

    fn build_try(
        &mut self,
        body: &Spanned<Block>,
        handlers: &[ExceptHandler],
        else_block: Option<&Spanned<Block>>,
        finally_block: Option<&Spanned<Block>>,
        span: Span,
        line: usize,
    ) -> Result<Vec<IRStmt>, CompileError> {
        if self.is_generator {
            return Err(unsupported("try statement inside a generator", span));
        }
        let body = self.build_block(body)?;
        let mut lowered = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let exc_type = match &handler.exc_type {
                Some(name) => Some(self.exception_type(&name.node, name.span)?),
                None => None,
            };
            let binding = match &handler.name {
                Some(name) => {
                    let c = self.local_c_name(&name.node);
                    self.bind_type(&c, &SourceType::opaque());
                    Some(c)
                }
                None => None,
            };
            let body = self.build_block(&handler.body)?;
            lowered.push(Handler { exc_type, binding, body });
        }
        let orelse = match else_block {
            Some(block) => self.build_block(block)?,
            None => Vec::new(),
        };
        let finally = match finally_block {
            Some(block) => self.build_block(block)?,
            None => Vec::new(),
        };
        Ok(vec![IRStmt::bare(StmtKind::Try { body, handlers: lowered, orelse, finally }, line)])
    }

    fn exception_type(&mut self, name: &str, span: Span) -> Result<IRValue, CompileError> {
        if name.contains('.') {
            return Err(unsupported(format!("qualified exception type '{name}'"), span));
        }
        if BUILTIN_EXCEPTIONS.contains(&name) && !self.shadowed(name) {
            return Ok(IRValue::Raw(format!("MP_OBJ_FROM_PTR(&mp_type_{name})")));
        }
        if let Some(info) = self.env.class(name) {
            return Ok(IRValue::Raw(format!("MP_OBJ_FROM_PTR(&{}_type)", info.c_name)));
        }
        if self.env.imports.contains_key(name) || self.is_local_name(name) {
            return Err(unsupported(format!("exception type '{name}' must be a builtin or global name"), span));
        }
        Ok(IRValue::Global(name.to_string()))
    }

    fn build_yield(&mut self, value: Option<&Spanned<Expr>>, line: usize) -> Result<IRStmt, CompileError> {
        let (yielded, pre) = match value {
            Some(e) => {
                let (v, pre) = self.expr(e)?;
                (self.box_value(v), pre)
            }
            None => (IRValue::none(), Vec::new()),
        };
        self.next_state += 1;
        Ok(IRStmt::new(pre, StmtKind::Yield { state: self.next_state, value: yielded }, line))
    }

    // ── Loops ──

    /// Lower `for var in iterable`. `body_block` is the statement body when the
    /// loop comes from a `for` statement, `None` for a comprehension, whose
    /// targets get their own scope.
    pub(crate) fn build_for_loop<F>(
        &mut self,
        var: &Spanned<Expr>,
        iterable: &Spanned<Expr>,
        line: usize,
        body_block: Option<&Spanned<Block>>,
        body_fn: F,
    ) -> Result<IRStmt, CompileError>
    where
        F: FnOnce(&mut Self) -> Result<Vec<IRStmt>, CompileError>,
    {
        let mut pre = Vec::new();
        if let (Expr::Call { func, args, kwargs }, Expr::Ident(var_name)) = (&iterable.node, &var.node) {
            let is_range = matches!(&func.node, Expr::Ident(n) if n == "range") && !self.shadowed("range");
            if is_range && kwargs.is_empty() && (1..=3).contains(&args.len()) {
                let mut bounds = Vec::with_capacity(args.len());
                for arg in args {
                    bounds.push(self.lower(arg, &mut pre)?);
                }
                if bounds.iter().all(|b| matches!(b.ty, SourceType::MachineInt | SourceType::Boolean)) {
                    let step_const = match args.get(2) {
                        Some(step) => match self.fold(&step.node) {
                            Some(Constant::Int(k)) => Some(k),
                            _ => None,
                        },
                        None => Some(1),
                    };
                    return self.range_loop(var_name, bounds, step_const, pre, line, body_block, body_fn);
                }
                let range = self.call_values(
                    crate::ir::Callee::Dynamic(IRValue::Global("range".into())),
                    super::calls::CallArgs { positional: bounds, keywords: Vec::new() },
                    &mut pre,
                );
                return self.iter_loop(var, range, pre, line, body_block, body_fn);
            }
        }
        let it = self.lower(iterable, &mut pre)?;
        self.iter_loop(var, it, pre, line, body_block, body_fn)
    }

    /// Push a comprehension scope binding every name in `target` to a fresh local.
    fn push_target_scope(&mut self, target: &Spanned<Expr>) {
        let mut scope = HashMap::new();
        let mut pending = vec![target];
        while let Some(t) = pending.pop() {
            match &t.node {
                Expr::Ident(name) => {
                    let c = self.scoped_local(name);
                    scope.insert(name.clone(), c);
                }
                Expr::Tuple(items) | Expr::List(items) => pending.extend(items.iter()),
                _ => {}
            }
        }
        self.scopes.push(scope);
    }

    #[allow(clippy::too_many_arguments)]
    fn range_loop<F>(
        &mut self,
        var_name: &str,
        bounds: Vec<Typed>,
        step_const: Option<i64>,
        mut pre: Vec<Instr>,
        line: usize,
        body_block: Option<&Spanned<Block>>,
        body_fn: F,
    ) -> Result<IRStmt, CompileError>
    where
        F: FnOnce(&mut Self) -> Result<Vec<IRStmt>, CompileError>,
    {
        let ints: Vec<Typed> = bounds
            .iter()
            .map(|b| Typed::new(self.as_int(b), SourceType::MachineInt))
            .collect();
        let (start, stop, step) = match ints.len() {
            1 => (Typed::constant(Constant::Int(0)), ints[0].clone(), None),
            2 => (ints[0].clone(), ints[1].clone(), None),
            _ => (ints[0].clone(), ints[1].clone(), Some(ints[2].clone())),
        };
        // The stop bound and a dynamic step are evaluated once, before the loop.
        let stop = match stop.value {
            IRValue::Const(_) => stop,
            _ => {
                let dest = self.alloc(CType::Int);
                pre.push(Instr::Assign { dest, value: stop.value });
                Typed::new(IRValue::Temp(dest), SourceType::MachineInt)
            }
        };
        let step = match (step_const, step) {
            (Some(0), _) => {
                let kind = RaiseKind::Message {
                    exc_type: "ValueError".into(),
                    message: "arg 3 must not be zero".into(),
                };
                return Ok(IRStmt::new(pre, StmtKind::Raise(kind), line));
            }
            (Some(k), _) => RangeStep::Const(k),
            (None, Some(step)) => {
                let dest = self.alloc(CType::Int);
                pre.push(Instr::Assign { dest, value: step.value });
                RangeStep::Dynamic(IRValue::Temp(dest))
            }
            (None, None) => RangeStep::Const(1),
        };

        let comprehension = body_block.is_none();
        let c = if comprehension {
            let mut scope = HashMap::new();
            let c = self.scoped_local(var_name);
            scope.insert(var_name.to_string(), c.clone());
            self.scopes.push(scope);
            c
        } else {
            self.local_c_name(var_name)
        };
        let var_ty = self.bind_type(&c, &SourceType::MachineInt);

        // The loop variable is the C control variable unless the body rebinds
        // it, it is read after the loop, or it is not a plain int.
        let needs_counter = match body_block {
            Some(block) => {
                var_ty != SourceType::MachineInt
                    || visit::assigns_name(block, var_name)
                    || visit::count_reads(self.fn_body, var_name) > visit::count_reads(block, var_name)
            }
            None => var_ty != SourceType::MachineInt,
        };
        let control = if needs_counter { self.hidden_local("i", SourceType::MachineInt) } else { c.clone() };
        let mut body = Vec::new();
        if needs_counter {
            let counter = Typed::new(IRValue::Local(control.clone()), SourceType::MachineInt);
            let mut bind_pre = Vec::new();
            let value = self.coerce(counter, &var_ty, &mut bind_pre);
            body.push(IRStmt::new(bind_pre, StmtKind::Assign { place: Place::Local(c.clone()), value }, line));
        }
        let built = body_fn(self);
        if comprehension {
            self.scopes.pop();
        }
        body.extend(built?);
        Ok(IRStmt::new(pre, StmtKind::RangeLoop { var: control, start: start.value, stop: stop.value, step, body }, line))
    }

    fn iter_loop<F>(
        &mut self,
        var: &Spanned<Expr>,
        iterable: Typed,
        pre: Vec<Instr>,
        line: usize,
        body_block: Option<&Spanned<Block>>,
        body_fn: F,
    ) -> Result<IRStmt, CompileError>
    where
        F: FnOnce(&mut Self) -> Result<Vec<IRStmt>, CompileError>,
    {
        let iterable = self.box_value(iterable);
        let slot = self.temps.alloc_iter_slot();
        let item = self.alloc(CType::Obj);
        let comprehension = body_block.is_none();
        if comprehension {
            self.push_target_scope(var);
        }
        let body = self.iter_loop_body(var, item, line, body_block, body_fn);
        if comprehension {
            self.scopes.pop();
        }
        Ok(IRStmt::new(pre, StmtKind::IterLoop { iterable, slot, item, body: body? }, line))
    }

    /// Bind the boxed item to the loop target, then build the body. A machine
    /// typed loop variable that the body never rebinds reuses the boxed item
    /// wherever the body would box it again.
    fn iter_loop_body<F>(
        &mut self,
        var: &Spanned<Expr>,
        item: usize,
        line: usize,
        body_block: Option<&Spanned<Block>>,
        body_fn: F,
    ) -> Result<Vec<IRStmt>, CompileError>
    where
        F: FnOnce(&mut Self) -> Result<Vec<IRStmt>, CompileError>,
    {
        let item_value = Typed::new(IRValue::Temp(item), SourceType::opaque());
        let mut body = Vec::new();
        let mut rebox = None;
        match &var.node {
            Expr::Ident(name) => {
                if self.self_name.as_deref() == Some(name.as_str()) {
                    return Err(unsupported("rebinding self", var.span));
                }
                let c = self.local_c_name(name);
                let mut bind_pre = Vec::new();
                let value = self.bind_local(&c, item_value, &mut bind_pre);
                let machine = self.slots.get(&c).and_then(|s| s.ty.as_ref()).is_some_and(|t| t.is_machine());
                let rebinds = body_block.is_some_and(|b| visit::assigns_name(b, name));
                if machine && !rebinds {
                    rebox = Some(c.clone());
                }
                body.push(IRStmt::new(bind_pre, StmtKind::Assign { place: Place::Local(c), value }, line));
            }
            Expr::Tuple(_) | Expr::List(_) => {
                body.extend(self.assign_to(var, item_value, Vec::new(), line)?);
            }
            _ => return Err(unsupported("loop target must be a name or a tuple of names", var.span)),
        }
        let bound = body.len();
        body.extend(body_fn(self)?);
        if let Some(c) = rebox {
            let rewritten = rebox_loop_uses(&mut body[bound..], &c, item);
            tracing::trace!(var = %c, rewritten, "reused boxed loop item");
        }
        Ok(body)
    }
}
