//! AST to IR lowering.
//!
//! One [`FunctionContext`] lowers one function or method body. Expressions
//! lower to a pure [`IRValue`] plus the prelude instructions it depends on;
//! statements wrap both into [`IRStmt`]s. Unannotated locals are typed by
//! their first assignment and widened by later ones: when a later assignment
//! widens a local the body is rebuilt with the widened types seeded, so every
//! use sees one consistent representation.

mod calls;
mod class;
mod expr;
mod stmt;

use std::collections::{HashMap, HashSet};

use crate::diagnostics::{CompileError, Diagnostics};
use crate::parser::ast::{Block, Expr, Function, Program};
use crate::span::{Span, Spanned};
use crate::typeck::env::{ArgShape, ClassInfo, FuncSig, ModuleEnv, ParamSig};
use crate::typeck::resolve::TypeResolver;
use crate::typeck::types::{CType, ContainerHint, ReturnType, SourceType};
use crate::codegen::names::local_name;
use crate::visit;
use super::temps::TempAllocator;
use super::{
    Callee, Constant, FunctionKind, IRConstant, IRFunction, IRLocal, IRModule, IRParam, IRStmt, IRValue, Instr,
    NumKind, TempId,
};

pub use class::build_class;

/// Rebuilds allowed while local types keep widening.
const MAX_WIDENING_PASSES: usize = 8;

/// Builtin exception types the runtime exposes as `mp_type_<Name>`.
pub const BUILTIN_EXCEPTIONS: &[&str] = &[
    "BaseException", "Exception", "ArithmeticError", "AssertionError", "AttributeError", "EOFError",
    "ImportError", "IndexError", "KeyError", "KeyboardInterrupt", "LookupError", "MemoryError",
    "NameError", "NotImplementedError", "OSError", "OverflowError", "RuntimeError", "StopIteration",
    "SyntaxError", "SystemExit", "TypeError", "ValueError", "ZeroDivisionError",
];

/// A lowered expression with its static type.
#[derive(Debug, Clone, PartialEq)]
pub struct Typed {
    pub value: IRValue,
    pub ty: SourceType,
}

impl Typed {
    pub fn new(value: IRValue, ty: SourceType) -> Self {
        Self { value, ty }
    }

    pub fn constant(c: Constant) -> Self {
        let ty = c.source_type();
        Self { value: IRValue::Const(c), ty }
    }

    pub fn none() -> Self {
        Self::constant(Constant::None)
    }

    pub fn ctype(&self) -> CType {
        self.ty.c_type()
    }
}

pub(crate) fn unsupported(msg: impl Into<String>, span: Span) -> CompileError {
    CompileError::unsupported(msg, span)
}

/// State shared by every function built from one unit.
pub struct Shared<'a> {
    pub env: &'a ModuleEnv,
    pub classes: HashSet<String>,
    /// Functions dropped after their bodies failed; calls to them go through globals.
    pub omitted: HashSet<String>,
    pub source: &'a str,
}

impl<'a> Shared<'a> {
    pub fn new(env: &'a ModuleEnv, source: &'a str) -> Self {
        Self { env, classes: env.classes.keys().cloned().collect(), omitted: HashSet::new(), source }
    }

    pub fn line(&self, span: Span) -> usize {
        span.line_col(self.source).0
    }
}

/// Build IR for every registered function and class.
pub fn build_module(program: &Program, env: &ModuleEnv, source: &str, diags: &mut Diagnostics) -> IRModule {
    let mut shared = Shared::new(env, source);

    // A body failure drops the function; calls already lowered against its
    // direct entry would then dangle, so rebuild until the set is stable.
    let (functions, reports) = loop {
        let mut functions = Vec::new();
        let mut reports: Vec<(CompileError, String)> = Vec::new();
        let mut dropped = Vec::new();
        for name in &env.function_order {
            let Some(sig) = env.function(name) else { continue };
            if shared.omitted.contains(name) {
                continue;
            }
            let Some(func) = program.functions.iter().rev().find(|f| f.node.name.node == *name) else {
                continue;
            };
            let _span = tracing::debug_span!("function", name = %name).entered();
            match build_function(func, sig, &shared) {
                Ok((ir, errors)) => {
                    reports.extend(errors.into_iter().map(|e| (e, name.clone())));
                    functions.push(ir);
                }
                Err(err) => {
                    tracing::debug!(function = %name, error = %err, "function omitted");
                    reports.push((err, name.clone()));
                    dropped.push(name.clone());
                }
            }
        }
        if dropped.is_empty() {
            break (functions, reports);
        }
        shared.omitted.extend(dropped);
    };
    for (err, scope) in &reports {
        diags.report(err, Some(scope));
    }

    let mut classes = Vec::new();
    for name in &env.class_order {
        let Some(info) = env.class(name) else { continue };
        let Some(decl) = program.classes.iter().find(|c| c.node.name.node == *name) else { continue };
        let _span = tracing::debug_span!("class", name = %name).entered();
        classes.push(build_class(decl, info, &shared, diags));
    }

    let constants = env
        .constant_order
        .iter()
        .filter_map(|n| env.constants.get(n).map(|v| IRConstant { name: n.clone(), value: v.clone() }))
        .collect();

    IRModule { name: env.module.clone(), functions, classes, constants }
}

/// Everything a body build needs beyond the AST.
pub(crate) struct FnSpec<'a> {
    pub name: String,
    pub symbol: String,
    pub kind: FunctionKind,
    pub params: &'a [ParamSig],
    pub star_args: Option<&'a str>,
    pub star_kwargs: Option<&'a str>,
    pub ret: ReturnType,
    /// C type of values the body returns.
    pub ret_ctype: CType,
    pub is_generator: bool,
    pub shape: ArgShape,
    pub class: Option<&'a ClassInfo>,
    pub self_name: Option<String>,
}

/// Lower a module function. `Err` fails the whole function; unsupported
/// statements come back as markers plus their errors.
pub fn build_function<'a>(
    func: &'a Spanned<Function>,
    sig: &'a FuncSig,
    shared: &'a Shared<'a>,
) -> Result<(IRFunction, Vec<CompileError>), CompileError> {
    let spec = FnSpec {
        name: sig.name.clone(),
        symbol: sig.symbol.clone(),
        kind: FunctionKind::Free,
        params: &sig.params,
        star_args: sig.star_args.as_deref(),
        star_kwargs: sig.star_kwargs.as_deref(),
        ret: sig.ret.clone(),
        ret_ctype: CType::Obj,
        is_generator: sig.is_generator,
        shape: sig.shape,
        class: None,
        self_name: None,
    };
    build_body(&func.node, &spec, shared)
}

pub(crate) fn build_body<'a>(
    func: &'a Function,
    spec: &FnSpec<'a>,
    shared: &'a Shared<'a>,
) -> Result<(IRFunction, Vec<CompileError>), CompileError> {
    let mut seed: HashMap<String, SourceType> = HashMap::new();
    let mut pass = 0;
    loop {
        pass += 1;
        let mut cx = FunctionContext::new(shared, spec, &func.body, seed);
        let body = cx.build_block(&func.body)?;
        if !cx.widened || pass == MAX_WIDENING_PASSES {
            tracing::trace!(function = %spec.name, passes = pass, "body built");
            return Ok(cx.finish(spec, func, body));
        }
        seed = cx.slot_types();
    }
}

#[derive(Debug, Clone)]
struct Slot {
    py_name: String,
    ty: Option<SourceType>,
    annotated: bool,
    is_param: bool,
}

pub(crate) struct FunctionContext<'a> {
    pub(crate) env: &'a ModuleEnv,
    resolver: TypeResolver<'a>,
    omitted: &'a HashSet<String>,
    source: &'a str,
    pub(crate) class: Option<&'a ClassInfo>,
    self_name: Option<String>,
    fn_body: &'a Spanned<Block>,
    ret: ReturnType,
    ret_ctype: CType,
    is_generator: bool,
    temps: TempAllocator,
    /// Python name to C name for function-level locals.
    names: HashMap<String, String>,
    /// Comprehension scopes, innermost last.
    scopes: Vec<HashMap<String, String>>,
    slots: HashMap<String, Slot>,
    local_order: Vec<String>,
    /// Names bound anywhere in the body, plus parameters.
    function_locals: HashSet<String>,
    seed: HashMap<String, SourceType>,
    next_state: u16,
    hidden: usize,
    widened: bool,
    errors: Vec<CompileError>,
}

impl<'a> FunctionContext<'a> {
    fn new(
        shared: &'a Shared<'a>,
        spec: &FnSpec<'a>,
        fn_body: &'a Spanned<Block>,
        seed: HashMap<String, SourceType>,
    ) -> Self {
        let mut function_locals = visit::assigned_names(fn_body);
        let mut cx = Self {
            env: shared.env,
            resolver: TypeResolver::new(&shared.classes),
            omitted: &shared.omitted,
            source: shared.source,
            class: spec.class,
            self_name: spec.self_name.clone(),
            fn_body,
            ret: spec.ret.clone(),
            ret_ctype: spec.ret_ctype.clone(),
            is_generator: spec.is_generator,
            temps: TempAllocator::new(),
            names: HashMap::new(),
            scopes: Vec::new(),
            slots: HashMap::new(),
            local_order: Vec::new(),
            function_locals: HashSet::new(),
            seed,
            next_state: 0,
            hidden: 0,
            widened: false,
            errors: Vec::new(),
        };
        for param in spec.params {
            cx.declare_param(&param.name, param.ty.clone());
            function_locals.insert(param.name.clone());
        }
        if let Some(name) = spec.star_args {
            cx.declare_param(name, SourceType::opaque());
            function_locals.insert(name.to_string());
        }
        if let Some(name) = spec.star_kwargs {
            cx.declare_param(name, SourceType::OpaqueHandle(ContainerHint::Mapping));
            function_locals.insert(name.to_string());
        }
        if let Some(self_name) = &cx.self_name {
            function_locals.remove(self_name);
        }
        cx.function_locals = function_locals;
        cx
    }

    pub(crate) fn line(&self, span: Span) -> usize {
        span.line_col(self.source).0
    }

    // ── Locals ──

    fn unique_c_name(&self, base: String) -> String {
        if !self.slots.contains_key(&base) {
            return base;
        }
        let mut k = 2;
        loop {
            let candidate = format!("{base}_{k}");
            if !self.slots.contains_key(&candidate) {
                return candidate;
            }
            k += 1;
        }
    }

    fn declare_param(&mut self, name: &str, ty: SourceType) {
        let c = self.unique_c_name(local_name(name));
        self.names.insert(name.to_string(), c.clone());
        self.slots.insert(c, Slot { py_name: name.to_string(), ty: Some(ty), annotated: true, is_param: true });
    }

    fn new_slot(&mut self, py_name: &str, c: String, ty: Option<SourceType>, annotated: bool) {
        let ty = ty.or_else(|| self.seed.get(&c).cloned());
        self.slots.insert(c.clone(), Slot { py_name: py_name.to_string(), ty, annotated, is_param: false });
        self.local_order.push(c);
    }

    /// C name of a comprehension variable or function local, if `name` is one.
    fn scoped(&self, name: &str) -> Option<String> {
        for scope in self.scopes.iter().rev() {
            if let Some(c) = scope.get(name) {
                return Some(c.clone());
            }
        }
        if self.function_locals.contains(name) { self.names.get(name).cloned() } else { None }
    }

    pub(crate) fn is_local_name(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains_key(name))
            || self.function_locals.contains(name)
            || self.self_name.as_deref() == Some(name)
    }

    /// Shadowed builtins lose their fast paths.
    pub(crate) fn shadowed(&self, name: &str) -> bool {
        self.is_local_name(name)
            || self.env.functions.contains_key(name)
            || self.env.classes.contains_key(name)
            || self.env.imports.contains_key(name)
            || self.env.constants.contains_key(name)
    }

    /// C name for a function local, creating its slot on first sight.
    pub(crate) fn local_c_name(&mut self, name: &str) -> String {
        if let Some(c) = self.scoped(name) {
            return c;
        }
        if let Some(c) = self.names.get(name) {
            return c.clone();
        }
        let c = self.unique_c_name(local_name(name));
        self.names.insert(name.to_string(), c.clone());
        self.new_slot(name, c.clone(), None, false);
        c
    }

    /// Fresh C local for a comprehension variable.
    fn scoped_local(&mut self, name: &str) -> String {
        self.hidden += 1;
        let c = self.unique_c_name(format!("{}_c{}", local_name(name), self.hidden));
        self.new_slot(name, c.clone(), None, false);
        c
    }

    /// Compiler-introduced local with a fixed type.
    fn hidden_local(&mut self, base: &str, ty: SourceType) -> String {
        self.hidden += 1;
        let c = self.unique_c_name(format!("_{base}{}", self.hidden));
        self.new_slot(&c.clone(), c.clone(), Some(ty), true);
        c
    }

    pub(crate) fn annotate(&mut self, c: &str, ty: SourceType) {
        if let Some(slot) = self.slots.get_mut(c) {
            if slot.ty.as_ref().is_some_and(|t| *t != ty) {
                self.widened = true;
            }
            slot.ty = Some(ty);
            slot.annotated = true;
        }
    }

    /// Record that a value of type `ty` is stored into `c`; returns the slot's type.
    fn bind_type(&mut self, c: &str, ty: &SourceType) -> SourceType {
        let joined = {
            let Some(slot) = self.slots.get(c) else { return ty.clone() };
            match &slot.ty {
                None => ty.clone(),
                Some(current) if slot.annotated || current == ty => return current.clone(),
                Some(current) => self.join(current, ty),
            }
        };
        let Some(slot) = self.slots.get_mut(c) else { return joined };
        if slot.ty.is_some() && slot.ty.as_ref() != Some(&joined) {
            self.widened = true;
        }
        slot.ty = Some(joined.clone());
        joined
    }

    /// Type join that also meets user classes at their nearest shared ancestor.
    fn join(&self, a: &SourceType, b: &SourceType) -> SourceType {
        if let (SourceType::UserClass(x), SourceType::UserClass(y)) = (a, b) {
            if let Some(common) =
                self.env.ancestry(x).into_iter().find(|c| self.env.is_subclass(y, &c.name))
            {
                return SourceType::UserClass(common.name.clone());
            }
        }
        a.join(b)
    }

    /// Store `v` into local `c`, converting to the slot's type.
    pub(crate) fn bind_local(&mut self, c: &str, v: Typed, pre: &mut Vec<Instr>) -> IRValue {
        let ty = self.bind_type(c, &v.ty);
        self.coerce(v, &ty, pre)
    }

    pub(crate) fn read_local(&mut self, c: &str) -> Typed {
        let ty = match self.slots.get_mut(c) {
            Some(slot) => slot.ty.get_or_insert_with(SourceType::opaque).clone(),
            None => SourceType::opaque(),
        };
        Typed::new(IRValue::Local(c.to_string()), ty)
    }

    fn slot_types(&self) -> HashMap<String, SourceType> {
        self.slots
            .iter()
            .filter(|(_, s)| !s.is_param)
            .filter_map(|(c, s)| s.ty.clone().map(|t| (c.clone(), t)))
            .collect()
    }

    pub(crate) fn alloc(&mut self, ty: CType) -> TempId {
        self.temps.alloc(ty)
    }

    pub(crate) fn function_sig(&self, name: &str) -> Option<&'a FuncSig> {
        if self.omitted.contains(name) {
            return None;
        }
        self.env.function(name)
    }

    // ── Conversions ──

    pub(crate) fn box_value(&self, v: Typed) -> IRValue {
        IRValue::boxed(v.ty.c_type(), v.value)
    }

    /// Representation change without instance checks.
    pub(crate) fn convert(&self, v: Typed, to: &SourceType) -> IRValue {
        let from_c = v.ty.c_type();
        let to_c = to.c_type();
        match (&from_c, &to_c) {
            (a, b) if a == b => v.value,
            (CType::Int | CType::Bool, CType::Float) | (CType::Bool, CType::Int) => {
                IRValue::Cast { to: to_c, value: Box::new(v.value) }
            }
            (CType::Int | CType::Float, CType::Bool) => IRValue::Cast { to: CType::Bool, value: Box::new(v.value) },
            (_, CType::Obj) => IRValue::boxed(from_c, v.value),
            (CType::Obj, _) => IRValue::unboxed(to_c, v.value),
            _ => IRValue::unboxed(to_c, IRValue::boxed(from_c, v.value)),
        }
    }

    /// Convert `v` for storage as `to`. Handles stored into class-typed slots
    /// are checked against the class at runtime.
    pub(crate) fn coerce(&mut self, v: Typed, to: &SourceType, pre: &mut Vec<Instr>) -> IRValue {
        if let SourceType::UserClass(target) = to {
            let statically_ok = matches!(&v.ty, SourceType::UserClass(c) if self.env.is_subclass(c, target));
            if !statically_ok {
                let dest = self.alloc(CType::Obj);
                let type_obj = format!("&{}_type", self.env.class_c_name(target));
                pre.push(Instr::Call {
                    dest: Some(dest),
                    callee: Callee::Native("ember_check_instance".into()),
                    args: vec![self.box_value(v), IRValue::Raw(type_obj)],
                    kwargs: Vec::new(),
                });
                return IRValue::Temp(dest);
            }
        }
        self.convert(v, to)
    }

    pub(crate) fn truthy(&self, v: &Typed) -> IRValue {
        match v.ty.c_type() {
            CType::Bool => v.value.clone(),
            CType::Int => IRValue::Compare {
                op: crate::parser::ast::CmpOp::NotEq,
                lhs: Box::new(v.value.clone()),
                rhs: Box::new(IRValue::int(0)),
            },
            CType::Float => IRValue::Compare {
                op: crate::parser::ast::CmpOp::NotEq,
                lhs: Box::new(v.value.clone()),
                rhs: Box::new(IRValue::Const(Constant::Float(0.0))),
            },
            CType::Obj => IRValue::unboxed(CType::Bool, v.value.clone()),
            CType::RTuple(_) => IRValue::Const(Constant::Bool(true)),
            CType::Void => IRValue::Const(Constant::Bool(false)),
        }
    }

    pub(crate) fn as_int(&self, v: &Typed) -> IRValue {
        match v.ty.c_type() {
            CType::Int => v.value.clone(),
            CType::Bool | CType::Float => IRValue::Cast { to: CType::Int, value: Box::new(v.value.clone()) },
            _ => IRValue::unboxed(CType::Int, self.box_value(v.clone())),
        }
    }

    pub(crate) fn as_float(&self, v: &Typed) -> IRValue {
        match v.ty.c_type() {
            CType::Float => v.value.clone(),
            CType::Int | CType::Bool => IRValue::Cast { to: CType::Float, value: Box::new(v.value.clone()) },
            _ => IRValue::unboxed(CType::Float, self.box_value(v.clone())),
        }
    }

    pub(crate) fn as_num(&self, v: &Typed, num: NumKind) -> IRValue {
        match num {
            NumKind::Int => self.as_int(v),
            NumKind::Float => self.as_float(v),
        }
    }

    /// Evaluate `v` once into a temporary unless it is already cheap to repeat.
    pub(crate) fn simple(&mut self, v: Typed, pre: &mut Vec<Instr>) -> Typed {
        if v.value.is_simple() {
            return v;
        }
        let dest = self.alloc(v.ty.c_type());
        pre.push(Instr::Assign { dest, value: v.value });
        Typed::new(IRValue::Temp(dest), v.ty)
    }

    /// Emit a call into a fresh temporary of `ret` type, or with no destination for `None`.
    pub(crate) fn call(
        &mut self,
        callee: Callee,
        args: Vec<IRValue>,
        kwargs: Vec<(String, IRValue)>,
        ret: Option<CType>,
        pre: &mut Vec<Instr>,
    ) -> Option<IRValue> {
        let dest = ret.map(|ty| self.alloc(ty));
        pre.push(Instr::Call { dest, callee, args, kwargs });
        dest.map(IRValue::Temp)
    }

    /// Call returning a boxed handle.
    pub(crate) fn call_obj(&mut self, callee: Callee, args: Vec<IRValue>, pre: &mut Vec<Instr>) -> IRValue {
        self.call(callee, args, Vec::new(), Some(CType::Obj), pre).unwrap_or_else(IRValue::none)
    }

    pub(crate) fn native_obj(&mut self, symbol: &str, args: Vec<IRValue>, pre: &mut Vec<Instr>) -> IRValue {
        self.call_obj(Callee::Native(symbol.to_string()), args, pre)
    }

    pub(crate) fn fold(&self, e: &Expr) -> Option<Constant> {
        crate::typeck::env::fold_literal(e, &self.env.constants)
    }

    // ── Finish ──

    fn finish(self, spec: &FnSpec, func: &Function, body: Vec<IRStmt>) -> (IRFunction, Vec<CompileError>) {
        let param_of = |name: &str, ty: &SourceType, default: Option<Constant>| IRParam {
            name: name.to_string(),
            c_name: self.names.get(name).cloned().unwrap_or_else(|| local_name(name)),
            ty: ty.clone(),
            default,
        };
        let params = spec.params.iter().map(|p| param_of(&p.name, &p.ty, p.default.clone())).collect();
        let star_args = spec.star_args.map(|n| param_of(n, &SourceType::opaque(), None));
        let star_kwargs =
            spec.star_kwargs.map(|n| param_of(n, &SourceType::OpaqueHandle(ContainerHint::Mapping), None));

        let locals = self
            .local_order
            .iter()
            .filter_map(|c| {
                let slot = self.slots.get(c)?;
                Some(IRLocal {
                    name: slot.py_name.clone(),
                    c_name: c.clone(),
                    ty: slot.ty.clone().unwrap_or_else(SourceType::opaque),
                })
            })
            .collect();
        let (temps, iter_slots) = self.temps.finish();
        let failed = !self.errors.is_empty();
        let ir = IRFunction {
            name: spec.name.clone(),
            symbol: spec.symbol.clone(),
            kind: spec.kind.clone(),
            params,
            star_args,
            star_kwargs,
            ret: spec.ret.clone(),
            body,
            locals,
            temps,
            iter_slots,
            yield_count: self.next_state,
            is_generator: spec.is_generator,
            shape: spec.shape,
            line: func.name.span.line_col(self.source).0,
            doc: func.doc.clone(),
            failed,
        };
        (ir, self.errors)
    }
}

#[cfg(test)]
mod tests;
