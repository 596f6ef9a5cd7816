use crate::codegen::names::ClassNames;
use crate::diagnostics::CompileError;
use crate::parser::ast::{CmpOp, Expr, UnaryOp};
use crate::span::{Span, Spanned};
use crate::typeck::env::{ArgShape, ClassInfo, FuncSig, MethodRole, MethodSig, ParamSig};
use crate::typeck::types::{CType, ContainerHint, ReturnType, SourceType};
use crate::ir::{Callee, Constant, IRValue, Instr, NumKind};
use super::{unsupported, FunctionContext, Typed};

type Kwargs = [(Spanned<String>, Spanned<Expr>)];

/// Arguments of a call site, lowered in source order.
#[derive(Debug, Default)]
pub(crate) struct CallArgs {
    pub positional: Vec<Typed>,
    pub keywords: Vec<(String, Typed)>,
}

/// Match call arguments to parameters: positionals first, then keywords by
/// name, then defaults. `None` when the call does not fit statically.
pub(crate) fn bind_params(params: &[ParamSig], positional: &[Typed], keywords: &[(String, Typed)]) -> Option<Vec<Typed>> {
    if positional.len() > params.len() {
        return None;
    }
    let mut slots: Vec<Option<Typed>> = vec![None; params.len()];
    for (slot, value) in slots.iter_mut().zip(positional) {
        *slot = Some(value.clone());
    }
    for (name, value) in keywords {
        let pos = params.iter().position(|p| p.name == *name)?;
        if slots[pos].is_some() {
            return None;
        }
        slots[pos] = Some(value.clone());
    }
    slots
        .into_iter()
        .zip(params)
        .map(|(slot, param)| slot.or_else(|| param.default.clone().map(Typed::constant)))
        .collect()
}

impl FunctionContext<'_> {
    pub(crate) fn lower_args(
        &mut self,
        args: &[Spanned<Expr>],
        kwargs: &Kwargs,
        pre: &mut Vec<Instr>,
    ) -> Result<CallArgs, CompileError> {
        let mut out = CallArgs::default();
        for arg in args {
            out.positional.push(self.lower(arg, pre)?);
        }
        for (name, value) in kwargs {
            let v = self.lower(value, pre)?;
            out.keywords.push((name.node.clone(), v));
        }
        Ok(out)
    }

    /// Generic call through the object protocol; the result is a handle.
    pub(crate) fn call_values(&mut self, callee: Callee, args: CallArgs, pre: &mut Vec<Instr>) -> Typed {
        let positional = args.positional.into_iter().map(|v| self.box_value(v)).collect();
        let keywords = args.keywords.into_iter().map(|(k, v)| (k, self.box_value(v))).collect();
        let value = self.call(callee, positional, keywords, Some(CType::Obj), pre).unwrap_or_else(IRValue::none);
        Typed::new(value, SourceType::opaque())
    }

    /// Type a boxed result according to a declared return type.
    fn boxed_result(&self, ret: &ReturnType, is_generator: bool, value: IRValue) -> Typed {
        match ret {
            ReturnType::Value(ty) if !is_generator => Typed::new(IRValue::unboxed(ty.c_type(), value), ty.clone()),
            _ => Typed::new(value, SourceType::opaque()),
        }
    }

    /// Call whose result arrives in its native representation.
    fn native_result(&mut self, callee: Callee, args: Vec<IRValue>, ret: &ReturnType, pre: &mut Vec<Instr>) -> Typed {
        match ret {
            ReturnType::Nothing => {
                self.call(callee, args, Vec::new(), None, pre);
                Typed::none()
            }
            ReturnType::Value(ty) => {
                let value = self.call(callee, args, Vec::new(), Some(ty.c_type()), pre).unwrap_or_else(IRValue::none);
                Typed::new(value, ty.clone())
            }
        }
    }

    pub(crate) fn lower_call(
        &mut self,
        func: &Spanned<Expr>,
        args: &[Spanned<Expr>],
        kwargs: &Kwargs,
        span: Span,
        pre: &mut Vec<Instr>,
    ) -> Result<Typed, CompileError> {
        match &func.node {
            Expr::Ident(name) if !self.is_local_name(name) => self.lower_named_call(name, func.span, args, kwargs, span, pre),
            Expr::Attribute { object, attr } => self.lower_method_call(object, &attr.node, args, kwargs, span, pre),
            _ => {
                let target = self.lower(func, pre)?;
                let target = self.box_value(target);
                let args = self.lower_args(args, kwargs, pre)?;
                Ok(self.call_values(Callee::Dynamic(target), args, pre))
            }
        }
    }

    fn lower_named_call(
        &mut self,
        name: &str,
        name_span: Span,
        args: &[Spanned<Expr>],
        kwargs: &Kwargs,
        span: Span,
        pre: &mut Vec<Instr>,
    ) -> Result<Typed, CompileError> {
        if name == "print" && !self.shadowed("print") {
            return self.lower_print(args, kwargs, span, pre);
        }
        if let Some(sig) = self.function_sig(name) {
            let lowered = self.lower_args(args, kwargs, pre)?;
            return Ok(self.call_function(sig, lowered, pre));
        }
        let env = self.env;
        if let Some(info) = env.class(name) {
            let lowered = self.lower_args(args, kwargs, pre)?;
            return Ok(self.construct(info, lowered, pre));
        }
        if kwargs.is_empty() && !self.shadowed(name) {
            if name == "super" {
                return Err(unsupported("super() outside a method call", span));
            }
            let lowered = self.lower_args(args, kwargs, pre)?;
            return self.lower_builtin(name, lowered, pre);
        }
        let target = self.lower_name(name, name_span, pre)?;
        let target = self.box_value(target);
        let lowered = self.lower_args(args, kwargs, pre)?;
        Ok(self.call_values(Callee::Dynamic(target), lowered, pre))
    }

    fn lower_print(
        &mut self,
        args: &[Spanned<Expr>],
        kwargs: &Kwargs,
        span: Span,
        pre: &mut Vec<Instr>,
    ) -> Result<Typed, CompileError> {
        let values = self.boxed_items(args, pre)?;
        let mut sep = " ".to_string();
        let mut end = "\n".to_string();
        for (key, value) in kwargs {
            let Expr::StringLit(text) = &value.node else {
                return Err(unsupported(format!("print() keyword '{}' must be a string literal", key.node), value.span));
            };
            match key.node.as_str() {
                "sep" => sep = text.clone(),
                "end" => end = text.clone(),
                other => return Err(unsupported(format!("print() keyword '{other}'"), span)),
            }
        }
        pre.push(Instr::Print { args: values, sep, end });
        Ok(Typed::none())
    }

    /// Native fast paths for builtins; anything else calls the global.
    fn lower_builtin(&mut self, name: &str, args: CallArgs, pre: &mut Vec<Instr>) -> Result<Typed, CompileError> {
        let n = args.positional.len();
        let first_ty = args.positional.first().map(|a| a.ty.clone());
        match (name, n, first_ty.as_ref()) {
            ("len", 1, Some(SourceType::FixedTuple(elems))) => {
                return Ok(Typed::constant(Constant::Int(elems.len() as i64)));
            }
            ("len", 1, Some(ty)) => {
                let arg = self.box_value(args.positional[0].clone());
                if ty.container_hint() == ContainerHint::Sequence {
                    let value = self
                        .call(Callee::Native("ember_list_len".into()), vec![arg], Vec::new(), Some(CType::Int), pre)
                        .unwrap_or_else(|| IRValue::int(0));
                    return Ok(Typed::new(value, SourceType::MachineInt));
                }
                let len = self.native_obj("mp_obj_len", vec![arg], pre);
                return Ok(Typed::new(IRValue::unboxed(CType::Int, len), SourceType::MachineInt));
            }
            ("abs", 1, Some(SourceType::MachineInt | SourceType::Boolean)) => {
                let v = Typed::new(self.as_int(&args.positional[0]), SourceType::MachineInt);
                let v = self.simple(v, pre);
                let value = IRValue::Ternary {
                    cond: Box::new(IRValue::Compare {
                        op: CmpOp::Lt,
                        lhs: Box::new(v.value.clone()),
                        rhs: Box::new(IRValue::int(0)),
                    }),
                    then_value: Box::new(IRValue::Unary { op: UnaryOp::Neg, num: NumKind::Int, operand: Box::new(v.value.clone()) }),
                    else_value: Box::new(v.value),
                };
                return Ok(Typed::new(value, SourceType::MachineInt));
            }
            ("abs", 1, Some(SourceType::MachineFloat)) => {
                let arg = args.positional[0].value.clone();
                let value = self
                    .call(Callee::Native("MICROPY_FLOAT_C_FUN(fabs)".into()), vec![arg], Vec::new(), Some(CType::Float), pre)
                    .unwrap_or_else(|| IRValue::Const(Constant::Float(0.0)));
                return Ok(Typed::new(value, SourceType::MachineFloat));
            }
            ("int", 0, _) => return Ok(Typed::constant(Constant::Int(0))),
            ("int", 1, Some(ty)) if ty.is_numeric() => {
                return Ok(Typed::new(self.as_int(&args.positional[0]), SourceType::MachineInt));
            }
            ("float", 0, _) => return Ok(Typed::constant(Constant::Float(0.0))),
            ("float", 1, Some(ty)) if ty.is_numeric() => {
                return Ok(Typed::new(self.as_float(&args.positional[0]), SourceType::MachineFloat));
            }
            ("bool", 0, _) => return Ok(Typed::constant(Constant::Bool(false))),
            ("bool", 1, Some(_)) => {
                return Ok(Typed::new(self.truthy(&args.positional[0]), SourceType::Boolean));
            }
            ("min" | "max", 2, Some(_))
                if args.positional.iter().all(|a| a.ty.is_numeric()) =>
            {
                return Ok(self.min_max(name == "min", args, pre));
            }
            ("list", 0, _) => {
                let dest = self.alloc(CType::Obj);
                pre.push(Instr::NewList { dest, items: Vec::new() });
                return Ok(Typed::new(IRValue::Temp(dest), SourceType::sequence()));
            }
            ("dict", 0, _) => {
                let dest = self.alloc(CType::Obj);
                pre.push(Instr::NewDict { dest, entries: Vec::new() });
                return Ok(Typed::new(IRValue::Temp(dest), SourceType::OpaqueHandle(ContainerHint::Mapping)));
            }
            ("set", 0, _) => {
                let dest = self.alloc(CType::Obj);
                pre.push(Instr::NewSet { dest, items: Vec::new() });
                return Ok(Typed::new(IRValue::Temp(dest), SourceType::OpaqueHandle(ContainerHint::Set)));
            }
            _ => {}
        }

        let result = self.call_values(Callee::Dynamic(IRValue::Global(name.to_string())), args, pre);
        Ok(match name {
            "int" | "len" => Typed::new(IRValue::unboxed(CType::Int, result.value), SourceType::MachineInt),
            "float" => Typed::new(IRValue::unboxed(CType::Float, result.value), SourceType::MachineFloat),
            "str" | "repr" => Typed::new(result.value, SourceType::Text),
            "list" | "sorted" => Typed::new(result.value, SourceType::sequence()),
            "dict" => Typed::new(result.value, SourceType::OpaqueHandle(ContainerHint::Mapping)),
            "set" => Typed::new(result.value, SourceType::OpaqueHandle(ContainerHint::Set)),
            _ => result,
        })
    }

    /// Two-operand `min`/`max`; ties keep the first operand.
    fn min_max(&mut self, is_min: bool, args: CallArgs, pre: &mut Vec<Instr>) -> Typed {
        let (a, b) = (&args.positional[0], &args.positional[1]);
        let float = a.ty == SourceType::MachineFloat || b.ty == SourceType::MachineFloat;
        let (num, ty) = if float {
            (NumKind::Float, SourceType::MachineFloat)
        } else {
            (NumKind::Int, SourceType::MachineInt)
        };
        let a = Typed::new(self.as_num(a, num), ty.clone());
        let b = Typed::new(self.as_num(b, num), ty.clone());
        let a = self.simple(a, pre);
        let b = self.simple(b, pre);
        let op = if is_min { CmpOp::LtEq } else { CmpOp::GtEq };
        let value = IRValue::Ternary {
            cond: Box::new(IRValue::Compare { op, lhs: Box::new(a.value.clone()), rhs: Box::new(b.value.clone()) }),
            then_value: Box::new(a.value),
            else_value: Box::new(b.value),
        };
        Typed::new(value, ty)
    }

    /// Direct call of a module function's boxed entry when the arguments fit
    /// its shape; otherwise through its function object.
    pub(crate) fn call_function(&mut self, sig: &FuncSig, args: CallArgs, pre: &mut Vec<Instr>) -> Typed {
        let k = sig.params.len();
        let direct = match sig.shape {
            ArgShape::Kw { .. } => None,
            ArgShape::Var { .. } => {
                let split = k.min(args.positional.len());
                bind_params(&sig.params, &args.positional[..split], &args.keywords)
                    .map(|bound| bound.into_iter().chain(args.positional[split..].iter().cloned()).collect::<Vec<_>>())
            }
            _ => bind_params(&sig.params, &args.positional, &args.keywords),
        };
        match direct {
            Some(bound) => {
                let boxed = bound.into_iter().map(|v| self.box_value(v)).collect();
                let callee = Callee::Boxed { symbol: sig.symbol.clone(), shape: sig.shape };
                let value = self.call_obj(callee, boxed, pre);
                self.boxed_result(&sig.ret, sig.is_generator, value)
            }
            None => {
                let fun_obj = IRValue::Raw(format!("MP_OBJ_FROM_PTR(&{}_obj)", sig.symbol));
                let result = self.call_values(Callee::Dynamic(fun_obj), args, pre);
                self.boxed_result(&sig.ret, sig.is_generator, result.value)
            }
        }
    }

    pub(crate) fn construct(&mut self, info: &ClassInfo, args: CallArgs, pre: &mut Vec<Instr>) -> Typed {
        let result = self.call_values(Callee::Construct { class_c: info.c_name.clone() }, args, pre);
        Typed::new(result.value, SourceType::UserClass(info.name.clone()))
    }

    fn lower_method_call(
        &mut self,
        object: &Spanned<Expr>,
        attr: &str,
        args: &[Spanned<Expr>],
        kwargs: &Kwargs,
        span: Span,
        pre: &mut Vec<Instr>,
    ) -> Result<Typed, CompileError> {
        let env = self.env;

        // super().m(...)
        if let Expr::Call { func, args: super_args, .. } = &object.node {
            if matches!(&func.node, Expr::Ident(s) if s == "super") && !self.shadowed("super") {
                if !super_args.is_empty() {
                    return Err(unsupported("super() with arguments", object.span));
                }
                let class = self.class.ok_or_else(|| unsupported("super() outside a method", object.span))?;
                let base = class
                    .base
                    .as_deref()
                    .ok_or_else(|| unsupported(format!("super() in '{}', which has no base class", class.name), object.span))?;
                let method = env.lookup_method(base, attr).ok_or_else(|| {
                    unsupported(format!("super().{attr}: no method '{attr}' on the bases of '{}'", class.name), span)
                })?;
                let recv = Typed::new(IRValue::SelfObj, SourceType::UserClass(class.name.clone()));
                return match method.role {
                    MethodRole::Static => self.call_static(method, args, kwargs, span, pre),
                    _ => self.call_native_method(method, recv, args, kwargs, span, pre),
                };
            }
        }

        // Class.method(...)
        if let Expr::Ident(class_name) = &object.node {
            if !self.is_local_name(class_name) && env.class(class_name).is_some() {
                if let Some(method) = env.lookup_method(class_name, attr) {
                    match method.role {
                        MethodRole::Static => return self.call_static(method, args, kwargs, span, pre),
                        MethodRole::Instance if !args.is_empty() => {
                            let recv = self.lower(&args[0], pre)?;
                            let recv_ty = SourceType::UserClass(class_name.clone());
                            let checked = self.coerce(recv, &recv_ty, pre);
                            let recv = Typed::new(checked, recv_ty);
                            return self.call_native_method(method, recv, &args[1..], kwargs, span, pre);
                        }
                        _ => {}
                    }
                }
            }
        }

        let recv = self.lower(object, pre)?;
        if let SourceType::UserClass(class) = recv.ty.clone() {
            if let Some(method) = env.lookup_method(&class, attr) {
                match method.role {
                    MethodRole::Instance if method.is_virtual => {
                        return self.call_virtual(&class, method, recv, args, kwargs, span, pre);
                    }
                    MethodRole::Instance => return self.call_native_method(method, recv, args, kwargs, span, pre),
                    MethodRole::Static => {
                        // The receiver's prelude has already run.
                        return self.call_static(method, args, kwargs, span, pre);
                    }
                    MethodRole::Property => {}
                }
            }
        }

        if recv.ty.container_hint() == ContainerHint::Sequence && attr == "append" && args.len() == 1 && kwargs.is_empty() {
            let list = self.box_value(recv);
            let item = self.lower(&args[0], pre)?;
            let item = self.box_value(item);
            self.call(Callee::Native("ember_list_append".into()), vec![list, item], Vec::new(), None, pre);
            return Ok(Typed::none());
        }

        let known = if recv.ty == SourceType::Text { text_method_result(attr) } else { None };
        let receiver = self.box_value(recv);
        let lowered = self.lower_args(args, kwargs, pre)?;
        let result = self.call_values(Callee::Method { receiver, name: attr.to_string() }, lowered, pre);
        Ok(match known {
            Some(ty) => Typed::new(result.value, ty),
            None => result,
        })
    }

    fn bind_method_args(
        &mut self,
        method: &MethodSig,
        args: &[Spanned<Expr>],
        kwargs: &Kwargs,
        span: Span,
        pre: &mut Vec<Instr>,
    ) -> Result<Vec<IRValue>, CompileError> {
        let lowered = self.lower_args(args, kwargs, pre)?;
        let bound = bind_params(&method.params, &lowered.positional, &lowered.keywords).ok_or_else(|| {
            unsupported(
                format!("arguments of the call to '{}.{}' do not match its parameters", method.owner, method.name),
                span,
            )
        })?;
        let mut out = Vec::with_capacity(bound.len());
        for (param, value) in method.params.iter().zip(bound) {
            out.push(self.coerce(value, &param.ty, pre));
        }
        Ok(out)
    }

    /// Direct call of a method's native implementation.
    pub(crate) fn call_native_method(
        &mut self,
        method: &MethodSig,
        recv: Typed,
        args: &[Spanned<Expr>],
        kwargs: &Kwargs,
        span: Span,
        pre: &mut Vec<Instr>,
    ) -> Result<Typed, CompileError> {
        let ptr = self.instance_ptr(recv, &method.owner, pre);
        let mut call_args = vec![ptr];
        call_args.extend(self.bind_method_args(method, args, kwargs, span, pre)?);
        let symbol = ClassNames::new(&self.env.class_c_name(&method.owner)).native(&method.name);
        Ok(self.native_result(Callee::Native(symbol), call_args, &method.ret, pre))
    }

    fn call_virtual(
        &mut self,
        class: &str,
        method: &MethodSig,
        recv: Typed,
        args: &[Spanned<Expr>],
        kwargs: &Kwargs,
        span: Span,
        pre: &mut Vec<Instr>,
    ) -> Result<Typed, CompileError> {
        let Some(vtable_path) = self.env.vtable_path(class) else {
            return self.call_native_method(method, recv, args, kwargs, span, pre);
        };
        let ptr = self.instance_ptr(recv, class, pre);
        let call_args = self.bind_method_args(method, args, kwargs, span, pre)?;
        let callee = Callee::Virtual {
            vtable_c: self.env.class_c_name(class),
            vtable_path,
            ptr,
            slot: method.name.clone(),
        };
        Ok(self.native_result(callee, call_args, &method.ret, pre))
    }

    fn call_static(
        &mut self,
        method: &MethodSig,
        args: &[Spanned<Expr>],
        kwargs: &Kwargs,
        span: Span,
        pre: &mut Vec<Instr>,
    ) -> Result<Typed, CompileError> {
        let names = ClassNames::new(&self.env.class_c_name(&method.owner));
        let lowered = self.lower_args(args, kwargs, pre)?;
        let Some(bound) = bind_params(&method.params, &lowered.positional, &lowered.keywords) else {
            return Err(unsupported(
                format!("arguments of the call to '{}.{}' do not match its parameters", method.owner, method.name),
                span,
            ));
        };
        let required = method.params.iter().filter(|p| p.default.is_none()).count();
        let shape = ArgShape::for_params(method.params.len(), required, false, false);
        let boxed = bound.into_iter().map(|v| self.box_value(v)).collect();
        let value = self.call_obj(Callee::Boxed { symbol: names.static_entry(&method.name), shape }, boxed, pre);
        Ok(self.boxed_result(&method.ret, false, value))
    }
}

/// Result types of the common `str` methods.
fn text_method_result(attr: &str) -> Option<SourceType> {
    match attr {
        "upper" | "lower" | "strip" | "lstrip" | "rstrip" | "replace" | "join" | "format" => Some(SourceType::Text),
        "split" => Some(SourceType::sequence()),
        _ => None,
    }
}
