use crate::diagnostics::CompileError;
use crate::parser::ast::{BinOp, BoolOp, CmpOp, Expr, UnaryOp};
use crate::span::{Span, Spanned};
use crate::typeck::env::ImportBinding;
use crate::typeck::types::{CType, ContainerHint, RTuple, SourceType};
use crate::ir::{Callee, Constant, IRStmt, IRValue, Instr, NumKind, Place, StmtKind};
use super::{unsupported, FunctionContext, Typed, BUILTIN_EXCEPTIONS};

pub(crate) fn binary_op_name(op: BinOp, inplace: bool) -> String {
    let base = match op {
        BinOp::Add => "ADD",
        BinOp::Sub => "SUBTRACT",
        BinOp::Mul => "MULTIPLY",
        BinOp::Div => "TRUE_DIVIDE",
        BinOp::FloorDiv => "FLOOR_DIVIDE",
        BinOp::Mod => "MODULO",
        BinOp::Pow => "POWER",
        BinOp::BitAnd => "AND",
        BinOp::BitOr => "OR",
        BinOp::BitXor => "XOR",
        BinOp::Shl => "LSHIFT",
        BinOp::Shr => "RSHIFT",
    };
    if inplace { format!("MP_BINARY_OP_INPLACE_{base}") } else { format!("MP_BINARY_OP_{base}") }
}

fn ordering_op_name(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Lt => "MP_BINARY_OP_LESS",
        CmpOp::LtEq => "MP_BINARY_OP_LESS_EQUAL",
        CmpOp::Gt => "MP_BINARY_OP_MORE",
        _ => "MP_BINARY_OP_MORE_EQUAL",
    }
}

fn is_bitwise(op: BinOp) -> bool {
    matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr)
}

/// Common type of two branches: equal types stay, numerics widen, the rest box.
pub(crate) fn unify(a: &SourceType, b: &SourceType) -> SourceType {
    if a == b {
        return a.clone();
    }
    if a.is_numeric() && b.is_numeric() {
        return a.join(b);
    }
    SourceType::opaque()
}

impl FunctionContext<'_> {
    /// Lower an expression into a value and the prelude it needs.
    pub(crate) fn expr(&mut self, e: &Spanned<Expr>) -> Result<(Typed, Vec<Instr>), CompileError> {
        let mut pre = Vec::new();
        let v = self.lower(e, &mut pre)?;
        Ok((v, pre))
    }

    pub(crate) fn lower(&mut self, e: &Spanned<Expr>, pre: &mut Vec<Instr>) -> Result<Typed, CompileError> {
        match &e.node {
            Expr::IntLit(v) => Ok(Typed::constant(Constant::Int(*v))),
            Expr::FloatLit(v) => Ok(Typed::constant(Constant::Float(*v))),
            Expr::BoolLit(v) => Ok(Typed::constant(Constant::Bool(*v))),
            Expr::StringLit(s) => Ok(Typed::constant(Constant::Str(s.clone()))),
            Expr::NoneLit => Ok(Typed::none()),
            Expr::Ident(name) => self.lower_name(name, e.span, pre),
            Expr::BinOp { op, lhs, rhs } => {
                let l = self.lower(lhs, pre)?;
                let r = self.lower(rhs, pre)?;
                Ok(self.binary(*op, l, r, false, pre))
            }
            Expr::UnaryOp { op, operand } => {
                if let Some(c) = self.fold(&e.node) {
                    return Ok(Typed::constant(c));
                }
                let v = self.lower(operand, pre)?;
                Ok(self.unary(*op, v, pre))
            }
            Expr::BoolOp { op, lhs, rhs } => self.lower_bool_op(*op, lhs, rhs, e.span, pre),
            Expr::Compare { first, ops, rest } => self.lower_compare(first, ops, rest, e.span, pre),
            Expr::Call { func, args, kwargs } => self.lower_call(func, args, kwargs, e.span, pre),
            Expr::Attribute { object, attr } => {
                let obj = self.lower(object, pre)?;
                self.load_attr(obj, &attr.node, attr.span, pre)
            }
            Expr::Index { object, index } => {
                let obj = self.lower(object, pre)?;
                let idx = self.lower_subscript(index, pre)?;
                let sliced = matches!(index.node, Expr::Slice { .. });
                Ok(self.load_index(obj, idx, sliced, pre))
            }
            Expr::Slice { .. } => Err(unsupported("slice outside a subscript", e.span)),
            Expr::List(items) => {
                let items = self.boxed_items(items, pre)?;
                let dest = self.alloc(CType::Obj);
                pre.push(Instr::NewList { dest, items });
                Ok(Typed::new(IRValue::Temp(dest), SourceType::sequence()))
            }
            Expr::Tuple(items) => self.lower_tuple(items, pre),
            Expr::Set(items) => {
                let items = self.boxed_items(items, pre)?;
                let dest = self.alloc(CType::Obj);
                pre.push(Instr::NewSet { dest, items });
                Ok(Typed::new(IRValue::Temp(dest), SourceType::OpaqueHandle(ContainerHint::Set)))
            }
            Expr::Dict(pairs) => {
                let mut entries = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let k = self.lower(k, pre)?;
                    let v = self.lower(v, pre)?;
                    entries.push((self.box_value(k), self.box_value(v)));
                }
                let dest = self.alloc(CType::Obj);
                pre.push(Instr::NewDict { dest, entries });
                Ok(Typed::new(IRValue::Temp(dest), SourceType::OpaqueHandle(ContainerHint::Mapping)))
            }
            Expr::ListComp { element, var, iterable, condition } => {
                self.lower_list_comp(element, var, iterable, condition.as_deref(), e.span, pre)
            }
            Expr::IfExpr { condition, then_expr, else_expr } => {
                self.lower_if_expr(condition, then_expr, else_expr, e.span, pre)
            }
            Expr::Yield(_) => Err(unsupported("yield inside an expression", e.span)),
            Expr::Unsupported(msg) => Err(unsupported(msg.clone(), e.span)),
        }
    }

    pub(crate) fn boxed_items(
        &mut self,
        items: &[Spanned<Expr>],
        pre: &mut Vec<Instr>,
    ) -> Result<Vec<IRValue>, CompileError> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let v = self.lower(item, pre)?;
            out.push(self.box_value(v));
        }
        Ok(out)
    }

    // ── Names ──

    pub(crate) fn lower_name(&mut self, name: &str, span: Span, pre: &mut Vec<Instr>) -> Result<Typed, CompileError> {
        if let Some(c) = self.scoped(name) {
            return Ok(self.read_local(&c));
        }
        if self.self_name.as_deref() == Some(name) {
            if let Some(class) = self.class {
                return Ok(Typed::new(IRValue::SelfObj, SourceType::UserClass(class.name.clone())));
            }
        }
        if self.function_locals.contains(name) {
            let c = self.local_c_name(name);
            return Ok(self.read_local(&c));
        }
        let env = self.env;
        if let Some(c) = env.constants.get(name) {
            return Ok(Typed::constant(c.clone()));
        }
        if let Some(sig) = self.function_sig(name) {
            return Ok(Typed::new(IRValue::Raw(format!("MP_OBJ_FROM_PTR(&{}_obj)", sig.symbol)), SourceType::opaque()));
        }
        if env.class(name).is_some() {
            let type_obj = format!("MP_OBJ_FROM_PTR(&{}_type)", env.class_c_name(name));
            return Ok(Typed::new(IRValue::Raw(type_obj), SourceType::opaque()));
        }
        if let Some(binding) = env.imports.get(name) {
            return self.lower_import(binding, span, pre);
        }
        if BUILTIN_EXCEPTIONS.contains(&name) {
            return Ok(Typed::new(IRValue::Raw(format!("MP_OBJ_FROM_PTR(&mp_type_{name})")), SourceType::opaque()));
        }
        Ok(Typed::new(IRValue::Global(name.to_string()), SourceType::opaque()))
    }

    fn lower_import(&mut self, binding: &ImportBinding, span: Span, pre: &mut Vec<Instr>) -> Result<Typed, CompileError> {
        let module = match binding {
            ImportBinding::Module(path) | ImportBinding::Member { module: path, .. } => path,
        };
        if module.contains('.') {
            return Err(unsupported(format!("use of dotted import '{module}'"), span));
        }
        let handle = self.native_obj(
            "mp_import_name",
            vec![
                IRValue::Raw(format!("MP_QSTR_{module}")),
                IRValue::Raw("mp_const_none".into()),
                IRValue::Raw("MP_OBJ_NEW_SMALL_INT(0)".into()),
            ],
            pre,
        );
        let value = match binding {
            ImportBinding::Module(_) => handle,
            ImportBinding::Member { name, .. } => {
                self.native_obj("mp_load_attr", vec![handle, IRValue::Raw(format!("MP_QSTR_{name}"))], pre)
            }
        };
        Ok(Typed::new(value, SourceType::opaque()))
    }

    // ── Operators ──

    pub(crate) fn binary(&mut self, op: BinOp, l: Typed, r: Typed, inplace: bool, pre: &mut Vec<Instr>) -> Typed {
        if l.ty.is_numeric() && r.ty.is_numeric() {
            if let Some(native) = self.native_binary(op, &l, &r) {
                return native;
            }
        }
        let seq = ContainerHint::Sequence;
        let result_ty = match (op, &l.ty, &r.ty) {
            (BinOp::Add, SourceType::Text, SourceType::Text)
            | (BinOp::Mul, SourceType::Text, SourceType::MachineInt)
            | (BinOp::Mul, SourceType::MachineInt, SourceType::Text)
            | (BinOp::Mod, SourceType::Text, _) => SourceType::Text,
            (BinOp::Add, a, b) if a.container_hint() == seq && b.container_hint() == seq => SourceType::sequence(),
            (BinOp::Mul, a, SourceType::MachineInt) if a.container_hint() == seq => SourceType::sequence(),
            _ => SourceType::opaque(),
        };
        let args = vec![IRValue::Raw(binary_op_name(op, inplace)), self.box_value(l), self.box_value(r)];
        let value = self.native_obj("mp_binary_op", args, pre);
        Typed::new(value, result_ty)
    }

    fn native_binary(&self, op: BinOp, l: &Typed, r: &Typed) -> Option<Typed> {
        let float = l.ty == SourceType::MachineFloat || r.ty == SourceType::MachineFloat || op == BinOp::Div;
        if float {
            if is_bitwise(op) {
                return None;
            }
            let value = IRValue::Binary {
                op,
                num: NumKind::Float,
                lhs: Box::new(self.as_float(l)),
                rhs: Box::new(self.as_float(r)),
            };
            return Some(Typed::new(value, SourceType::MachineFloat));
        }
        if op == BinOp::Pow && !matches!(r.value, IRValue::Const(Constant::Int(k)) if k >= 0) {
            return None;
        }
        let both_bool = l.ty == SourceType::Boolean && r.ty == SourceType::Boolean;
        if both_bool && matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) {
            let value = IRValue::Binary { op, num: NumKind::Int, lhs: Box::new(l.value.clone()), rhs: Box::new(r.value.clone()) };
            return Some(Typed::new(value, SourceType::Boolean));
        }
        let value =
            IRValue::Binary { op, num: NumKind::Int, lhs: Box::new(self.as_int(l)), rhs: Box::new(self.as_int(r)) };
        Some(Typed::new(value, SourceType::MachineInt))
    }

    pub(crate) fn unary(&mut self, op: UnaryOp, v: Typed, pre: &mut Vec<Instr>) -> Typed {
        match (op, &v.ty) {
            (UnaryOp::Not, _) => Typed::new(IRValue::Not(Box::new(self.truthy(&v))), SourceType::Boolean),
            (UnaryOp::Neg | UnaryOp::Pos, SourceType::MachineFloat) => {
                Typed::new(IRValue::Unary { op, num: NumKind::Float, operand: Box::new(v.value) }, SourceType::MachineFloat)
            }
            (UnaryOp::Pos, SourceType::MachineInt | SourceType::Boolean) => {
                Typed::new(self.as_int(&v), SourceType::MachineInt)
            }
            (UnaryOp::Neg | UnaryOp::Invert, SourceType::MachineInt | SourceType::Boolean) => Typed::new(
                IRValue::Unary { op, num: NumKind::Int, operand: Box::new(self.as_int(&v)) },
                SourceType::MachineInt,
            ),
            _ => {
                let name = match op {
                    UnaryOp::Neg => "MP_UNARY_OP_NEGATIVE",
                    UnaryOp::Pos => "MP_UNARY_OP_POSITIVE",
                    _ => "MP_UNARY_OP_INVERT",
                };
                let value = self.native_obj("mp_unary_op", vec![IRValue::Raw(name.into()), self.box_value(v)], pre);
                Typed::new(value, SourceType::opaque())
            }
        }
    }

    fn lower_bool_op(
        &mut self,
        op: BoolOp,
        lhs: &Spanned<Expr>,
        rhs: &Spanned<Expr>,
        span: Span,
        pre: &mut Vec<Instr>,
    ) -> Result<Typed, CompileError> {
        let l = self.lower(lhs, pre)?;
        let (r, rpre) = self.expr(rhs)?;
        if l.ty == SourceType::Boolean && r.ty == SourceType::Boolean && rpre.is_empty() {
            let value = IRValue::Logical { op, lhs: Box::new(l.value), rhs: Box::new(r.value) };
            return Ok(Typed::new(value, SourceType::Boolean));
        }
        // The result is whichever operand decided, so it lives in a temporary
        // of the operands' common type.
        let ty = unify(&l.ty, &r.ty);
        let dest = self.alloc(ty.c_type());
        let first = self.convert(l, &ty);
        pre.push(Instr::Assign { dest, value: first });
        let held = Typed::new(IRValue::Temp(dest), ty.clone());
        let cond = match op {
            BoolOp::And => self.truthy(&held),
            BoolOp::Or => IRValue::Not(Box::new(self.truthy(&held))),
        };
        let second = self.convert(r, &ty);
        let line = self.line(span);
        let assign = IRStmt::new(rpre, StmtKind::Assign { place: Place::Temp(dest), value: second }, line);
        let branch = IRStmt::bare(StmtKind::If { cond, then_body: vec![assign], else_body: Vec::new() }, line);
        pre.push(Instr::Block(vec![branch]));
        Ok(held)
    }

    // ── Comparisons ──

    fn lower_compare(
        &mut self,
        first: &Spanned<Expr>,
        ops: &[CmpOp],
        rest: &[Spanned<Expr>],
        span: Span,
        pre: &mut Vec<Instr>,
    ) -> Result<Typed, CompileError> {
        let left = self.lower(first, pre)?;
        if ops.len() == 1 {
            let right = self.lower(&rest[0], pre)?;
            return Ok(self.compare(ops[0], left, right, pre));
        }
        let dest = self.alloc(CType::Bool);
        let left = self.simple(left, pre);
        let line = self.line(span);
        let chain = self.compare_chain(left, ops, rest, dest, line)?;
        pre.extend(chain);
        Ok(Typed::new(IRValue::Temp(dest), SourceType::Boolean))
    }

    /// `a < b < c`: each link runs only if the previous held, and middle
    /// operands are evaluated once.
    fn compare_chain(
        &mut self,
        left: Typed,
        ops: &[CmpOp],
        rest: &[Spanned<Expr>],
        dest: usize,
        line: usize,
    ) -> Result<Vec<Instr>, CompileError> {
        let mut pre = Vec::new();
        let right = self.lower(&rest[0], &mut pre)?;
        let right = if ops.len() > 1 { self.simple(right, &mut pre) } else { right };
        let link = self.compare(ops[0], left, right.clone(), &mut pre);
        pre.push(Instr::Assign { dest, value: link.value });
        if ops.len() > 1 {
            let inner = self.compare_chain(right, &ops[1..], &rest[1..], dest, line)?;
            let then_body = vec![IRStmt::new(inner, StmtKind::Exec, line)];
            let branch = IRStmt::bare(StmtKind::If { cond: IRValue::Temp(dest), then_body, else_body: Vec::new() }, line);
            pre.push(Instr::Block(vec![branch]));
        }
        Ok(pre)
    }

    pub(crate) fn compare(&mut self, op: CmpOp, l: Typed, r: Typed, pre: &mut Vec<Instr>) -> Typed {
        let value = match op {
            CmpOp::In | CmpOp::NotIn => {
                let args = vec![IRValue::Raw("MP_BINARY_OP_IN".into()), self.box_value(l), self.box_value(r)];
                let found = IRValue::unboxed(CType::Bool, self.native_obj("mp_binary_op", args, pre));
                if op == CmpOp::NotIn { IRValue::Not(Box::new(found)) } else { found }
            }
            CmpOp::Is | CmpOp::IsNot => {
                IRValue::Compare { op, lhs: Box::new(self.box_value(l)), rhs: Box::new(self.box_value(r)) }
            }
            _ if l.ty.is_numeric() && r.ty.is_numeric() => {
                let num = if l.ty == SourceType::MachineFloat || r.ty == SourceType::MachineFloat {
                    NumKind::Float
                } else {
                    NumKind::Int
                };
                let (lhs, rhs) = if l.ty == r.ty {
                    (l.value, r.value)
                } else {
                    (self.as_num(&l, num), self.as_num(&r, num))
                };
                IRValue::Compare { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
            }
            CmpOp::Eq | CmpOp::NotEq => {
                let args = vec![self.box_value(l), self.box_value(r)];
                let equal = self
                    .call(Callee::Native("mp_obj_equal".into()), args, Vec::new(), Some(CType::Bool), pre)
                    .unwrap_or(IRValue::Const(Constant::Bool(false)));
                if op == CmpOp::NotEq { IRValue::Not(Box::new(equal)) } else { equal }
            }
            _ => {
                let args = vec![IRValue::Raw(ordering_op_name(op).into()), self.box_value(l), self.box_value(r)];
                IRValue::unboxed(CType::Bool, self.native_obj("mp_binary_op", args, pre))
            }
        };
        Typed::new(value, SourceType::Boolean)
    }

    // ── Attributes and subscripts ──

    /// Typed instance pointer for field access on a value of class `class`.
    pub(crate) fn instance_ptr(&mut self, obj: Typed, class: &str, pre: &mut Vec<Instr>) -> IRValue {
        if obj.value == IRValue::SelfObj {
            if let Some(current) = self.class {
                if current.name == class {
                    return IRValue::SelfPtr;
                }
                return IRValue::ObjPtr { class_c: self.env.class_c_name(class), value: Box::new(IRValue::SelfPtr) };
            }
        }
        let obj = self.simple(obj, pre);
        IRValue::ObjPtr { class_c: self.env.class_c_name(class), value: Box::new(obj.value) }
    }

    pub(crate) fn load_attr(&mut self, obj: Typed, attr: &str, span: Span, pre: &mut Vec<Instr>) -> Result<Typed, CompileError> {
        if let SourceType::UserClass(class) = obj.ty.clone() {
            let env = self.env;
            if let Some((field, path)) = env.lookup_field(&class, attr) {
                let ptr = self.instance_ptr(obj, &class, pre);
                return Ok(Typed::new(IRValue::Field { ptr: Box::new(ptr), path }, field.ty));
            }
            if let Some(method) = env.lookup_method(&class, attr) {
                if method.role == crate::typeck::env::MethodRole::Property {
                    return self.call_native_method(method, obj, &[], &[], span, pre);
                }
            }
        }
        let args = vec![self.box_value(obj), IRValue::Raw(format!("MP_QSTR_{attr}"))];
        Ok(Typed::new(self.native_obj("mp_load_attr", args, pre), SourceType::opaque()))
    }

    /// Store into an attribute. Returns the statement kind doing the store.
    pub(crate) fn store_attr(&mut self, obj: Typed, attr: &str, v: Typed, pre: &mut Vec<Instr>) -> StmtKind {
        if let SourceType::UserClass(class) = &obj.ty {
            if let Some((field, path)) = self.env.lookup_field(class, attr) {
                let class = class.clone();
                let ptr = self.instance_ptr(obj, &class, pre);
                let value = self.coerce(v, &field.ty, pre);
                return StmtKind::FieldStore { ptr, path, value };
            }
        }
        let args = vec![self.box_value(obj), IRValue::Raw(format!("MP_QSTR_{attr}")), self.box_value(v)];
        self.call(Callee::Native("mp_store_attr".into()), args, Vec::new(), None, pre);
        StmtKind::Exec
    }

    /// Lower a subscript, building a slice object for `a:b:c` forms.
    pub(crate) fn lower_subscript(&mut self, index: &Spanned<Expr>, pre: &mut Vec<Instr>) -> Result<Typed, CompileError> {
        let Expr::Slice { lower, upper, step } = &index.node else {
            return self.lower(index, pre);
        };
        let mut bounds = Vec::with_capacity(3);
        for part in [lower, upper, step] {
            let value = match part {
                Some(e) => {
                    let v = self.lower(e, pre)?;
                    self.box_value(v)
                }
                None => IRValue::none(),
            };
            bounds.push(value);
        }
        let slice = self.native_obj("mp_obj_new_slice", bounds, pre);
        Ok(Typed::new(slice, SourceType::opaque()))
    }

    pub(crate) fn load_index(&mut self, obj: Typed, idx: Typed, sliced: bool, pre: &mut Vec<Instr>) -> Typed {
        let int_index = matches!(idx.ty, SourceType::MachineInt | SourceType::Boolean);
        if let SourceType::FixedTuple(elems) = &obj.ty {
            if let IRValue::Const(Constant::Int(k)) = idx.value {
                let len = elems.len() as i64;
                let pos = if k < 0 { k + len } else { k };
                if (0..len).contains(&pos) {
                    let elem_ty = elems[pos as usize].clone();
                    if let CType::RTuple(_) = obj.ty.c_type() {
                        let tuple = self.simple(obj, pre);
                        return Typed::new(IRValue::TupleField { value: Box::new(tuple.value), index: pos as usize }, elem_ty);
                    }
                    let args = vec![self.box_value(obj), self.box_value(idx), IRValue::Raw("MP_OBJ_SENTINEL".into())];
                    let item = self.native_obj("mp_obj_subscr", args, pre);
                    return Typed::new(IRValue::unboxed(elem_ty.c_type(), item), elem_ty);
                }
            }
        }
        if obj.ty.container_hint() == ContainerHint::Sequence && int_index {
            let args = vec![self.box_value(obj), self.as_int(&idx)];
            return Typed::new(self.native_obj("ember_list_get", args, pre), SourceType::opaque());
        }
        let result_ty = match &obj.ty {
            SourceType::Text => SourceType::Text,
            t if sliced && t.container_hint() == ContainerHint::Sequence => SourceType::sequence(),
            _ => SourceType::opaque(),
        };
        let args = vec![self.box_value(obj), self.box_value(idx), IRValue::Raw("MP_OBJ_SENTINEL".into())];
        Typed::new(self.native_obj("mp_obj_subscr", args, pre), result_ty)
    }

    pub(crate) fn store_index(&mut self, obj: Typed, idx: Typed, v: Typed, pre: &mut Vec<Instr>) {
        let int_index = matches!(idx.ty, SourceType::MachineInt | SourceType::Boolean);
        if obj.ty.container_hint() == ContainerHint::Sequence && int_index {
            let args = vec![self.box_value(obj), self.as_int(&idx), self.box_value(v)];
            self.call(Callee::Native("ember_list_set".into()), args, Vec::new(), None, pre);
            return;
        }
        let args = vec![self.box_value(obj), self.box_value(idx), self.box_value(v)];
        self.call(Callee::Native("mp_obj_subscr".into()), args, Vec::new(), None, pre);
    }

    // ── Containers ──

    fn lower_tuple(&mut self, items: &[Spanned<Expr>], pre: &mut Vec<Instr>) -> Result<Typed, CompileError> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            values.push(self.lower(item, pre)?);
        }
        let types: Vec<SourceType> = values.iter().map(|v| v.ty.clone()).collect();
        if let Some(shape) = RTuple::from_elements(&types) {
            let fields = values.into_iter().map(|v| v.value).collect();
            return Ok(Typed::new(IRValue::MakeRTuple { shape, fields }, SourceType::FixedTuple(types)));
        }
        let items = values.into_iter().map(|v| self.box_value(v)).collect();
        let dest = self.alloc(CType::Obj);
        pre.push(Instr::NewTuple { dest, items });
        let ty = if types.is_empty() { SourceType::opaque() } else { SourceType::FixedTuple(types) };
        Ok(Typed::new(IRValue::Temp(dest), ty))
    }

    fn lower_list_comp(
        &mut self,
        element: &Spanned<Expr>,
        var: &Spanned<Expr>,
        iterable: &Spanned<Expr>,
        condition: Option<&Spanned<Expr>>,
        span: Span,
        pre: &mut Vec<Instr>,
    ) -> Result<Typed, CompileError> {
        let dest = self.alloc(CType::Obj);
        pre.push(Instr::NewList { dest, items: Vec::new() });
        let result = IRValue::Temp(dest);
        let line = self.line(span);
        let looped = self.build_for_loop(var, iterable, line, None, |cx| {
            let mut epre = Vec::new();
            let elem = cx.lower(element, &mut epre)?;
            let elem = cx.box_value(elem);
            cx.call(Callee::Native("ember_list_append".into()), vec![result.clone(), elem], Vec::new(), None, &mut epre);
            let append = IRStmt::new(epre, StmtKind::Exec, line);
            match condition {
                Some(c) => {
                    let (cv, cpre) = cx.expr(c)?;
                    let cond = cx.truthy(&cv);
                    let kind = StmtKind::If { cond, then_body: vec![append], else_body: Vec::new() };
                    Ok(vec![IRStmt::new(cpre, kind, line)])
                }
                None => Ok(vec![append]),
            }
        })?;
        pre.push(Instr::Block(vec![looped]));
        Ok(Typed::new(result, SourceType::sequence()))
    }

    fn lower_if_expr(
        &mut self,
        condition: &Spanned<Expr>,
        then_expr: &Spanned<Expr>,
        else_expr: &Spanned<Expr>,
        span: Span,
        pre: &mut Vec<Instr>,
    ) -> Result<Typed, CompileError> {
        let c = self.lower(condition, pre)?;
        let cond = self.truthy(&c);
        let (t, tpre) = self.expr(then_expr)?;
        let (e, epre) = self.expr(else_expr)?;
        let ty = unify(&t.ty, &e.ty);
        let then_value = self.convert(t, &ty);
        let else_value = self.convert(e, &ty);
        if tpre.is_empty() && epre.is_empty() {
            let value = IRValue::Ternary {
                cond: Box::new(cond),
                then_value: Box::new(then_value),
                else_value: Box::new(else_value),
            };
            return Ok(Typed::new(value, ty));
        }
        let dest = self.alloc(ty.c_type());
        let line = self.line(span);
        let branch = IRStmt::bare(
            StmtKind::If {
                cond,
                then_body: vec![IRStmt::new(tpre, StmtKind::Assign { place: Place::Temp(dest), value: then_value }, line)],
                else_body: vec![IRStmt::new(epre, StmtKind::Assign { place: Place::Temp(dest), value: else_value }, line)],
            },
            line,
        );
        pre.push(Instr::Block(vec![branch]));
        Ok(Typed::new(IRValue::Temp(dest), ty))
    }
}
