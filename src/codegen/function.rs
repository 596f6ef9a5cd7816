//! Function bodies: boxed-entry prologues, statements, preludes and values.

use crate::config::CompileOptions;
use crate::ir::scan::{referenced_temps, used_iter_slots};
use crate::ir::temps::temp_name;
use crate::ir::{
    c_string, Callee, Constant, IRFunction, IRParam, IRStmt, IRValue, Instr, NumKind, Place, RaiseKind, RangeStep,
    StmtKind, TempId,
};
use crate::parser::ast::{BinOp, BoolOp, CmpOp, UnaryOp};
use crate::typeck::env::{ArgShape, ModuleEnv};
use crate::typeck::types::{CType, SourceType};
use super::names::ClassNames;
use super::writer::CWriter;

/// How a body hands back its result.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnMode {
    /// Boxed entry point: every return yields an `mp_obj_t`.
    Boxed,
    /// Native method returning its declared C type.
    Native(CType),
    /// Generator resume function: returning ends the iteration.
    Generator,
}

/// A `try` the emitter is currently inside.
#[derive(Debug, Clone, Copy)]
struct TryFrame<'a> {
    id: usize,
    loop_depth: usize,
    finally: &'a [IRStmt],
    /// Inside the protected body, where leaving must pop the handler.
    protected: bool,
}

/// Emits one function body into its own buffer.
pub struct BodyEmitter<'a> {
    out: CWriter,
    options: &'a CompileOptions,
    mode: ReturnMode,
    /// Prefix for locals and temporaries: empty, or `gen->` in a generator frame.
    frame: &'static str,
    tries: Vec<TryFrame<'a>>,
    /// Ids of the `try` statements whose handlers enclose the current point.
    handlers: Vec<usize>,
    loop_depth: usize,
    next_try: usize,
}

impl<'a> BodyEmitter<'a> {
    pub fn new(options: &'a CompileOptions, mode: ReturnMode, depth: usize) -> Self {
        Self {
            out: CWriter::indented(depth),
            options,
            mode,
            frame: "",
            tries: Vec::new(),
            handlers: Vec::new(),
            loop_depth: 0,
            next_try: 0,
        }
    }

    /// Locals and temporaries live in the generator object behind `gen`.
    pub fn in_frame(mut self) -> Self {
        self.frame = "gen->";
        self
    }

    pub fn finish(self) -> CWriter {
        self.out
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        self.out.line(text);
    }

    /// Declare the non-parameter locals, the temporaries the body references
    /// and the iterator buffers of its generic loops.
    pub fn declare(&mut self, f: &IRFunction) {
        for local in &f.locals {
            let ty = local.ty.c_type();
            self.out.line(format!("{} {} = {};", ty.c_name(), local.c_name, ty.zero()));
        }
        for t in referenced_temps(&f.body) {
            let Some(ty) = t.checked_sub(1).and_then(|i| f.temps.get(i)) else { continue };
            if *ty != CType::Void {
                self.out.line(format!("{} {} = {};", ty.c_name(), temp_name(t), ty.zero()));
            }
        }
        for slot in used_iter_slots(&f.body) {
            self.out.line(format!("mp_obj_iter_buf_t _iter_buf{slot};"));
            self.out.line(format!("mp_obj_t _iter{slot};"));
        }
    }

    /// Emit `body` and, unless it already ends by leaving, the default return.
    pub fn function_body(&mut self, body: &'a [IRStmt]) {
        self.stmts(body);
        let ends = matches!(body.last().map(|s| &s.kind), Some(StmtKind::Return(_) | StmtKind::Raise(_)));
        if !ends {
            self.return_line(None);
        }
    }

    pub fn stmts(&mut self, body: &'a [IRStmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    // ── Values ──

    fn local(&self, c: &str) -> String {
        format!("{}{c}", self.frame)
    }

    fn temp(&self, t: TempId) -> String {
        format!("{}{}", self.frame, temp_name(t))
    }

    fn place(&self, place: &Place) -> String {
        match place {
            Place::Local(c) => self.local(c),
            Place::Temp(t) => self.temp(*t),
        }
    }

    pub fn value(&self, v: &IRValue) -> String {
        match v {
            IRValue::Const(c) => c.native_literal(),
            IRValue::Local(c) => self.local(c),
            IRValue::Temp(t) => self.temp(*t),
            IRValue::SelfPtr => "self".to_string(),
            IRValue::SelfObj => "MP_OBJ_FROM_PTR(self)".to_string(),
            IRValue::Raw(text) => text.clone(),
            IRValue::Global(name) => format!("mp_load_global(MP_QSTR_{name})"),
            IRValue::Binary { op, num, lhs, rhs } => self.binary(*op, *num, &self.value(lhs), &self.value(rhs)),
            IRValue::Unary { op, operand, .. } => {
                let x = self.value(operand);
                match op {
                    UnaryOp::Neg => format!("(-{x})"),
                    UnaryOp::Pos => format!("(+{x})"),
                    UnaryOp::Invert => format!("(~{x})"),
                    UnaryOp::Not => format!("(!{x})"),
                }
            }
            IRValue::Compare { op, lhs, rhs } => {
                format!("({} {} {})", self.value(lhs), compare_symbol(*op), self.value(rhs))
            }
            IRValue::Logical { op, lhs, rhs } => {
                let symbol = match op {
                    BoolOp::And => "&&",
                    BoolOp::Or => "||",
                };
                format!("({} {symbol} {})", self.value(lhs), self.value(rhs))
            }
            IRValue::Not(inner) => format!("(!{})", self.value(inner)),
            IRValue::Ternary { cond, then_value, else_value } => format!(
                "({} ? {} : {})",
                self.value(cond),
                self.value(then_value),
                self.value(else_value)
            ),
            IRValue::Box { from, value } => match value.as_ref() {
                IRValue::Const(c) => c.boxed_literal(),
                other => from.box_expr(&self.value(other)),
            },
            IRValue::Unbox { to, value } => to.unbox_expr(&self.value(value)),
            IRValue::Cast { to, value } => {
                let x = self.value(value);
                match to {
                    CType::Float => format!("((mp_float_t)({x}))"),
                    CType::Int => format!("((mp_int_t)({x}))"),
                    CType::Bool => format!("(({x}) != 0)"),
                    _ => x,
                }
            }
            IRValue::ObjPtr { class_c, value } => {
                let obj_t = ClassNames::new(class_c).obj_t();
                match value.as_ref() {
                    IRValue::SelfPtr => format!("(({obj_t} *)self)"),
                    other => format!("(({obj_t} *)MP_OBJ_TO_PTR({}))", self.value(other)),
                }
            }
            IRValue::Field { ptr, path } => format!("{}->{path}", self.value(ptr)),
            IRValue::TupleField { value, index } => format!("({}).f{index}", self.value(value)),
            IRValue::MakeRTuple { shape, fields } => {
                let fields: Vec<String> = fields.iter().map(|f| self.value(f)).collect();
                format!("(({}){{ {} }})", shape.c_name(), fields.join(", "))
            }
        }
    }

    fn binary(&self, op: BinOp, num: NumKind, l: &str, r: &str) -> String {
        let checked = self.options.checked_division;
        match (num, op) {
            (NumKind::Int, BinOp::FloorDiv) if checked => format!("ember_int_floordiv({l}, {r})"),
            (NumKind::Int, BinOp::Mod) if checked => format!("ember_int_mod({l}, {r})"),
            (NumKind::Int, BinOp::Pow) => format!("ember_int_pow({l}, {r})"),
            (NumKind::Int, BinOp::Div) => {
                self.binary(BinOp::Div, NumKind::Float, &format!("((mp_float_t)({l}))"), &format!("((mp_float_t)({r}))"))
            }
            (NumKind::Float, BinOp::Div) if checked => format!("ember_float_div({l}, {r})"),
            (NumKind::Float, BinOp::FloorDiv) => {
                let quotient = self.binary(BinOp::Div, NumKind::Float, l, r);
                format!("MICROPY_FLOAT_C_FUN(floor)({quotient})")
            }
            (NumKind::Float, BinOp::Mod) if checked => format!("ember_float_mod({l}, {r})"),
            (NumKind::Float, BinOp::Mod) => format!("MICROPY_FLOAT_C_FUN(fmod)({l}, {r})"),
            (NumKind::Float, BinOp::Pow) => format!("MICROPY_FLOAT_C_FUN(pow)({l}, {r})"),
            (_, BinOp::FloorDiv) => format!("({l} / {r})"),
            _ => format!("({l} {} {r})", op.symbol()),
        }
    }

    // ── Preludes ──

    fn instrs(&mut self, prelude: &'a [Instr]) {
        for instr in prelude {
            self.instr(instr);
        }
    }

    fn instr(&mut self, instr: &'a Instr) {
        match instr {
            Instr::Assign { dest, value } => {
                let line = format!("{} = {};", self.temp(*dest), self.value(value));
                self.out.line(line);
            }
            Instr::Call { dest, callee, args, kwargs } => self.call(*dest, callee, args, kwargs),
            Instr::NewList { dest, items } => {
                let items = self.values(items);
                let line = format!("{} = mp_obj_new_list({}, {});", self.temp(*dest), items.len(), obj_array(&items, false));
                self.out.line(line);
            }
            Instr::NewTuple { dest, items } => {
                let items = self.values(items);
                let line = format!("{} = mp_obj_new_tuple({}, {});", self.temp(*dest), items.len(), obj_array(&items, true));
                self.out.line(line);
            }
            Instr::NewSet { dest, items } => {
                let items = self.values(items);
                let line = format!("{} = mp_obj_new_set({}, {});", self.temp(*dest), items.len(), obj_array(&items, false));
                self.out.line(line);
            }
            Instr::NewDict { dest, entries } => {
                let dict = self.temp(*dest);
                self.out.line(format!("{dict} = ember_dict_new({});", entries.len()));
                for (key, value) in entries {
                    let line = format!("mp_obj_dict_store({dict}, {}, {});", self.value(key), self.value(value));
                    self.out.line(line);
                }
            }
            Instr::Unpack { source, dests } => {
                let source = self.value(source);
                self.out.open("");
                self.out.line("mp_obj_t *_items;");
                self.out.line(format!("mp_obj_get_array_fixed_n({source}, {}, &_items);", dests.len()));
                for (i, dest) in dests.iter().enumerate() {
                    let line = format!("{} = _items[{i}];", self.temp(*dest));
                    self.out.line(line);
                }
                self.out.close();
            }
            Instr::Print { args, sep, end } => {
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 && !sep.is_empty() {
                        self.out.line(format!("mp_print_str(&mp_plat_print, {});", c_string(sep)));
                    }
                    let line = format!("mp_obj_print_helper(&mp_plat_print, {}, PRINT_STR);", self.value(arg));
                    self.out.line(line);
                }
                if !end.is_empty() {
                    self.out.line(format!("mp_print_str(&mp_plat_print, {});", c_string(end)));
                }
            }
            Instr::Block(stmts) => self.stmts(stmts),
        }
    }

    fn values(&self, items: &[IRValue]) -> Vec<String> {
        items.iter().map(|v| self.value(v)).collect()
    }

    fn call(&mut self, dest: Option<TempId>, callee: &'a Callee, args: &[IRValue], kwargs: &[(String, IRValue)]) {
        let args_c = self.values(args);
        let mut with_kw = args_c.clone();
        for (name, value) in kwargs {
            with_kw.push(format!("MP_OBJ_NEW_QSTR(MP_QSTR_{name})"));
            with_kw.push(self.value(value));
        }
        let expr = match callee {
            Callee::Boxed { symbol, shape: ArgShape::Fixed(_) } => format!("{symbol}({})", args_c.join(", ")),
            Callee::Boxed { symbol, .. } => format!("{symbol}({}, {})", args_c.len(), obj_array(&args_c, true)),
            Callee::Native(name) => format!("{name}({})", args_c.join(", ")),
            Callee::Dynamic(target) => format!(
                "mp_call_function_n_kw({}, {}, {}, {})",
                self.value(target),
                args_c.len(),
                kwargs.len(),
                obj_array(&with_kw, true)
            ),
            Callee::Method { receiver, name } => {
                self.method_call(dest, receiver, name, &args_c, &with_kw[args_c.len()..]);
                return;
            }
            Callee::Virtual { vtable_c, vtable_path, ptr, slot } => {
                let ptr = self.value(ptr);
                let mut all = vec![ptr.clone()];
                all.extend(args_c);
                let vtable_t = ClassNames::new(vtable_c).vtable_t();
                format!("((const {vtable_t} *)({ptr})->{vtable_path})->{slot}({})", all.join(", "))
            }
            Callee::Construct { class_c } => {
                let names = ClassNames::new(class_c);
                format!(
                    "{}(&{}, {}, {}, {})",
                    names.make_new(),
                    names.type_obj(),
                    args_c.len(),
                    kwargs.len(),
                    obj_array(&with_kw, true)
                )
            }
        };
        self.assign_result(dest, expr);
    }

    fn assign_result(&mut self, dest: Option<TempId>, expr: String) {
        let line = match dest {
            Some(t) => format!("{} = {expr};", self.temp(t)),
            None => format!("{expr};"),
        };
        self.out.line(line);
    }

    /// `receiver.name(args)` through the runtime's method lookup. `kw` holds
    /// the flattened (qstr, value) pairs.
    fn method_call(&mut self, dest: Option<TempId>, receiver: &IRValue, name: &str, args: &[String], kw: &[String]) {
        let n = args.len();
        let receiver = self.value(receiver);
        self.out.open("");
        self.out.line(format!("mp_obj_t _call[{}];", 2 + n + kw.len()));
        self.out.line(format!("mp_load_method({receiver}, MP_QSTR_{name}, _call);"));
        for (i, arg) in args.iter().chain(kw).enumerate() {
            self.out.line(format!("_call[{}] = {arg};", i + 2));
        }
        self.assign_result(dest, format!("mp_call_method_n_kw({n}, {}, _call)", kw.len() / 2));
        self.out.close();
    }

    // ── Statements ──

    fn stmt(&mut self, stmt: &'a IRStmt) {
        self.instrs(&stmt.prelude);
        match &stmt.kind {
            StmtKind::Assign { place, value } => {
                let line = format!("{} = {};", self.place(place), self.value(value));
                self.out.line(line);
            }
            StmtKind::FieldStore { ptr, path, value } => {
                let line = format!("{}->{path} = {};", self.value(ptr), self.value(value));
                self.out.line(line);
            }
            StmtKind::Exec => {}
            StmtKind::Return(value) => self.emit_return(value.as_ref()),
            StmtKind::If { cond, then_body, else_body } => {
                let cond = self.value(cond);
                self.out.open(format!("if ({cond})"));
                self.stmts(then_body);
                if !else_body.is_empty() {
                    self.out.reopen("} else {");
                    self.stmts(else_body);
                }
                self.out.close();
            }
            StmtKind::While { cond_prelude, cond, body } => {
                self.loop_depth += 1;
                if cond_prelude.is_empty() {
                    let cond = self.value(cond);
                    self.out.open(format!("while ({cond})"));
                } else {
                    self.out.open("while (1)");
                    self.instrs(cond_prelude);
                    let cond = self.value(cond);
                    self.out.open(format!("if (!({cond}))"));
                    self.out.line("break;");
                    self.out.close();
                }
                self.stmts(body);
                self.out.close();
                self.loop_depth -= 1;
            }
            StmtKind::RangeLoop { var, start, stop, step, body } => self.range_loop(var, start, stop, step, body),
            StmtKind::IterLoop { iterable, slot, item, body } => {
                let iter = self.local(&format!("_iter{slot}"));
                let buf = self.local(&format!("_iter_buf{slot}"));
                let line = format!("{iter} = mp_getiter({}, &{buf});", self.value(iterable));
                self.out.line(line);
                let item = self.temp(*item);
                self.out.open(format!("while (({item} = mp_iternext({iter})) != MP_OBJ_STOP_ITERATION)"));
                self.loop_depth += 1;
                self.stmts(body);
                self.loop_depth -= 1;
                self.out.close();
            }
            StmtKind::Break => {
                self.unwind(Some(self.loop_depth));
                self.out.line("break;");
            }
            StmtKind::Continue => {
                self.unwind(Some(self.loop_depth));
                self.out.line("continue;");
            }
            StmtKind::Try { body, handlers, orelse, finally } => self.try_stmt(body, handlers, orelse, finally),
            StmtKind::Raise(kind) => self.raise(kind),
            StmtKind::Yield { state, value } => {
                let value = self.value(value);
                self.out.line(format!("gen->state = {state};"));
                self.out.line(format!("return {value};"));
                self.out.line(format!("_resume{state}:;"));
            }
            StmtKind::Unsupported(msg) => {
                self.out.line(format!("/* unsupported: {} */", msg.replace("*/", "* /")));
            }
        }
    }

    fn range_loop(&mut self, var: &str, start: &IRValue, stop: &IRValue, step: &RangeStep, body: &'a [IRStmt]) {
        let v = self.local(var);
        let start = self.value(start);
        let stop = self.value(stop);
        let header = match step {
            RangeStep::Const(k) if *k > 0 => {
                let advance = if *k == 1 { format!("{v}++") } else { format!("{v} += {k}") };
                format!("for ({v} = {start}; {v} < {stop}; {advance})")
            }
            RangeStep::Const(k) => {
                let advance = if *k == -1 { format!("{v}--") } else { format!("{v} -= {}", k.unsigned_abs()) };
                format!("for ({v} = {start}; {v} > {stop}; {advance})")
            }
            RangeStep::Dynamic(step) => {
                let step = self.value(step);
                self.out.open(format!("if ({step} == 0)"));
                self.out.line("mp_raise_ValueError(MP_ERROR_TEXT(\"arg 3 must not be zero\"));");
                self.out.close();
                format!("for ({v} = {start}; {step} > 0 ? {v} < {stop} : {v} > {stop}; {v} += {step})")
            }
        };
        self.out.open(header);
        self.loop_depth += 1;
        self.stmts(body);
        self.loop_depth -= 1;
        self.out.close();
    }

    fn raise(&mut self, kind: &RaiseKind) {
        let line = match kind {
            RaiseKind::Message { exc_type, message } => {
                format!("mp_raise_msg(&mp_type_{exc_type}, MP_ERROR_TEXT({}));", c_string(message))
            }
            RaiseKind::Type(exc_type) => format!("nlr_raise(mp_obj_new_exception(&mp_type_{exc_type}));"),
            RaiseKind::Object(value) => format!("nlr_raise(mp_make_raise_obj({}));", self.value(value)),
            RaiseKind::Reraise => match self.handlers.last() {
                Some(id) => format!("nlr_jump(_nlr{id}.ret_val);"),
                None => "mp_raise_msg(&mp_type_RuntimeError, MP_ERROR_TEXT(\"no active exception to reraise\"));"
                    .to_string(),
            },
        };
        self.out.line(line);
    }

    // ── Leaving ──

    fn return_c_type(&self) -> Option<CType> {
        match &self.mode {
            ReturnMode::Boxed => Some(CType::Obj),
            ReturnMode::Native(CType::Void) | ReturnMode::Generator => None,
            ReturnMode::Native(ty) => Some(ty.clone()),
        }
    }

    fn emit_return(&mut self, value: Option<&IRValue>) {
        let value = value.map(|v| self.value(v));
        if self.tries.is_empty() {
            self.return_line(value);
            return;
        }
        // The value is computed before any finally block runs.
        self.out.open("");
        let saved = match (self.return_c_type(), value) {
            (Some(ty), Some(value)) => {
                self.out.line(format!("{} _retv = {value};", ty.c_name()));
                Some("_retv".to_string())
            }
            _ => None,
        };
        self.unwind(None);
        self.return_line(saved);
        self.out.close();
    }

    fn return_line(&mut self, value: Option<String>) {
        match &self.mode {
            ReturnMode::Boxed => {
                let value = value.unwrap_or_else(|| "mp_const_none".to_string());
                self.out.line(format!("return {value};"));
            }
            ReturnMode::Native(CType::Void) => self.out.line("return;"),
            ReturnMode::Native(ty) => {
                let value = value.unwrap_or_else(|| zero_expr(ty));
                self.out.line(format!("return {value};"));
            }
            ReturnMode::Generator => {
                self.out.line("gen->state = 0xFFFF;");
                self.out.line("return MP_OBJ_STOP_ITERATION;");
            }
        }
    }

    /// Leave the enclosing `try` statements: pop live handlers and run each
    /// finally block, innermost first. With a loop depth, only the statements
    /// entered inside that loop are left.
    fn unwind(&mut self, loop_depth: Option<usize>) {
        let saved = self.tries.clone();
        let saved_handlers = self.handlers.clone();
        for i in (0..saved.len()).rev() {
            let frame = saved[i];
            if loop_depth.is_some_and(|depth| frame.loop_depth < depth) {
                break;
            }
            if frame.protected {
                self.out.line("nlr_pop();");
            }
            self.tries.truncate(i);
            self.handlers.retain(|id| *id < frame.id);
            self.stmts(frame.finally);
        }
        self.tries = saved;
        self.handlers = saved_handlers;
    }

    fn try_stmt(
        &mut self,
        body: &'a [IRStmt],
        handlers: &'a [crate::ir::Handler],
        orelse: &'a [IRStmt],
        finally: &'a [IRStmt],
    ) {
        self.next_try += 1;
        let id = self.next_try;
        let nlr = format!("_nlr{id}");
        let frame = TryFrame { id, loop_depth: self.loop_depth, finally, protected: true };

        self.out.open("");
        self.out.line(format!("nlr_buf_t {nlr};"));
        self.out.open(format!("if (nlr_push(&{nlr}) == 0)"));
        self.tries.push(frame);
        self.stmts(body);
        self.tries.pop();
        self.out.line("nlr_pop();");
        self.tries.push(TryFrame { protected: false, ..frame });
        self.stmts(orelse);
        self.out.reopen("} else {");

        self.handlers.push(id);
        let exc = format!("MP_OBJ_FROM_PTR({nlr}.ret_val)");
        let mut chain_open = false;
        let mut caught_all = false;
        for handler in handlers {
            match &handler.exc_type {
                Some(exc_type) => {
                    let cond = format!(
                        "mp_obj_is_subclass_fast(MP_OBJ_FROM_PTR(mp_obj_get_type({exc})), {})",
                        self.value(exc_type)
                    );
                    if chain_open {
                        self.out.reopen(&format!("}} else if ({cond}) {{"));
                    } else {
                        self.out.open(format!("if ({cond})"));
                        chain_open = true;
                    }
                }
                None => {
                    if chain_open {
                        self.out.reopen("} else {");
                    }
                    caught_all = true;
                }
            }
            if let Some(binding) = &handler.binding {
                let line = format!("{} = {exc};", self.local(binding));
                self.out.line(line);
            }
            self.stmts(&handler.body);
            if caught_all {
                break;
            }
        }
        self.handlers.pop();
        self.tries.pop();
        if !caught_all {
            if chain_open {
                self.out.reopen("} else {");
            }
            self.stmts(finally);
            self.out.line(format!("nlr_jump({nlr}.ret_val);"));
        }
        if chain_open {
            self.out.close();
        }
        self.out.close();
        self.stmts(finally);
        self.out.close();
    }
}

fn compare_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq | CmpOp::Is | CmpOp::In => "==",
        CmpOp::NotEq | CmpOp::IsNot | CmpOp::NotIn => "!=",
        CmpOp::Lt => "<",
        CmpOp::LtEq => "<=",
        CmpOp::Gt => ">",
        CmpOp::GtEq => ">=",
    }
}

/// `NULL`, or a compound-literal array of handles.
fn obj_array(items: &[String], constant: bool) -> String {
    if items.is_empty() {
        return "NULL".to_string();
    }
    let qualifier = if constant { "const " } else { "" };
    format!("({qualifier}mp_obj_t[]){{{}}}", items.join(", "))
}

/// A zero value usable as an expression.
pub fn zero_expr(ty: &CType) -> String {
    match ty {
        CType::RTuple(shape) => format!("(({}){{0}})", shape.c_name()),
        other => other.zero(),
    }
}

// ── Boxed entry points ──

/// Parameter list and binding statements of a boxed entry point.
#[derive(Debug, Default)]
pub struct Prologue {
    pub params: String,
    pub lines: Vec<String>,
}

/// The boxed receiver of a method wrapper, checked against its class.
pub struct Receiver<'a> {
    pub type_obj: &'a str,
}

/// Convert a handle into a parameter's native form, checking its type.
pub fn unbox_param(env: &ModuleEnv, ty: &SourceType, expr: &str) -> String {
    match ty {
        SourceType::Text => format!("ember_check_str({expr})"),
        SourceType::UserClass(class) => {
            format!("ember_check_instance({expr}, &{})", ClassNames::new(&env.class_c_name(class)).type_obj())
        }
        other => other.c_type().unbox_expr(expr),
    }
}

pub fn default_literal(p: &IRParam, default: &Constant) -> String {
    match (p.ty.c_type(), default) {
        (CType::Obj, d) => d.boxed_literal(),
        (ty, Constant::None) => zero_expr(&ty),
        (_, d) => d.native_literal(),
    }
}

fn bind_line(env: &ModuleEnv, p: &IRParam, expr: &str) -> String {
    format!("{} {} = {};", p.ty.c_type().c_name(), p.c_name, unbox_param(env, &p.ty, expr))
}

fn bind_optional(env: &ModuleEnv, p: &IRParam, present: &str, expr: &str) -> String {
    match &p.default {
        Some(d) => format!(
            "{} {} = {present} ? {} : {};",
            p.ty.c_type().c_name(),
            p.c_name,
            unbox_param(env, &p.ty, expr),
            default_literal(p, d)
        ),
        None => bind_line(env, p, expr),
    }
}

/// Build the prologue binding `params` from the calling convention `shape`.
/// With a receiver, the first boxed argument is `self_in`.
pub fn boxed_prologue(
    env: &ModuleEnv,
    shape: ArgShape,
    receiver: Option<Receiver>,
    params: &[IRParam],
    star_args: Option<&IRParam>,
    star_kwargs: Option<&IRParam>,
) -> Prologue {
    let offset = usize::from(receiver.is_some());
    let check = receiver.as_ref().map(|r| format!("ember_check_instance(self_in, &{});", r.type_obj));
    let mut lines = Vec::new();
    let params_c = match shape {
        ArgShape::Fixed(_) => {
            let mut decls = Vec::new();
            if receiver.is_some() {
                decls.push("mp_obj_t self_in".to_string());
            }
            lines.extend(check);
            for p in params {
                decls.push(format!("mp_obj_t {}_in", p.c_name));
                lines.push(bind_line(env, p, &format!("{}_in", p.c_name)));
            }
            if decls.is_empty() { "void".to_string() } else { decls.join(", ") }
        }
        ArgShape::Between { .. } | ArgShape::Var { .. } => {
            if receiver.is_some() {
                lines.push("mp_obj_t self_in = args[0];".to_string());
            }
            lines.extend(check);
            for (i, p) in params.iter().enumerate() {
                let j = i + offset;
                lines.push(bind_optional(env, p, &format!("n_args > {j}"), &format!("args[{j}]")));
            }
            if let Some(rest) = star_args {
                lines.push(rest_tuple(&rest.c_name, params.len() + offset, "args"));
            }
            "size_t n_args, const mp_obj_t *args".to_string()
        }
        ArgShape::Kw { .. } => {
            let kw = star_kwargs.map_or("_kw", |p| p.c_name.as_str());
            lines.push(format!("mp_obj_t {kw} = mp_obj_new_dict(kw_args->used);"));
            lines.push("for (size_t _kw_i = 0; _kw_i < kw_args->alloc; _kw_i++) {".to_string());
            lines.push("    if (mp_map_slot_is_filled(kw_args, _kw_i)) {".to_string());
            lines.push(format!("        mp_obj_dict_store({kw}, kw_args->table[_kw_i].key, kw_args->table[_kw_i].value);"));
            lines.push("    }".to_string());
            lines.push("}".to_string());
            for (j, p) in params.iter().enumerate() {
                let arg = format!("{}_in", p.c_name);
                lines.push(format!("mp_obj_t {arg} = ember_kw_take({kw}, MP_QSTR_{});", p.name));
                lines.push(format!("if (n_args > {j}) {{"));
                lines.push(format!("    if ({arg} != MP_OBJ_NULL) {{"));
                lines.push(format!(
                    "        mp_raise_TypeError(MP_ERROR_TEXT(\"multiple values for argument '{}'\"));",
                    p.name
                ));
                lines.push("    }".to_string());
                lines.push(format!("    {arg} = pos_args[{j}];"));
                lines.push("}".to_string());
                if p.default.is_none() {
                    lines.push(format!("if ({arg} == MP_OBJ_NULL) {{"));
                    lines.push(format!(
                        "    mp_raise_TypeError(MP_ERROR_TEXT(\"missing required argument '{}'\"));",
                        p.name
                    ));
                    lines.push("}".to_string());
                }
                lines.push(bind_optional(env, p, &format!("{arg} != MP_OBJ_NULL"), &arg));
            }
            let k = params.len();
            match star_args {
                Some(rest) => lines.push(rest_tuple(&rest.c_name, k, "pos_args")),
                None => {
                    lines.push(format!("if (n_args > {k}) {{"));
                    lines.push("    mp_raise_TypeError(MP_ERROR_TEXT(\"too many positional arguments\"));".to_string());
                    lines.push("}".to_string());
                }
            }
            "size_t n_args, const mp_obj_t *pos_args, mp_map_t *kw_args".to_string()
        }
    };
    Prologue { params: params_c, lines }
}

fn rest_tuple(name: &str, from: usize, args: &str) -> String {
    format!("mp_obj_t {name} = n_args > {from} ? mp_obj_new_tuple(n_args - {from}, {args} + {from}) : mp_const_empty_tuple;")
}

/// `static const` forward declaration of a function object.
pub fn fun_obj_decl(shape: ArgShape, obj: &str) -> String {
    let ty = match shape {
        ArgShape::Fixed(_) => "mp_obj_fun_builtin_fixed_t",
        _ => "mp_obj_fun_builtin_var_t",
    };
    format!("static const {ty} {obj};")
}

pub fn fun_obj_define(shape: ArgShape, obj: &str, entry: &str) -> String {
    match shape {
        ArgShape::Fixed(n) => format!("static MP_DEFINE_CONST_FUN_OBJ_{n}({obj}, {entry});"),
        ArgShape::Between { min, max } => {
            format!("static MP_DEFINE_CONST_FUN_OBJ_VAR_BETWEEN({obj}, {min}, {max}, {entry});")
        }
        ArgShape::Var { min } => format!("static MP_DEFINE_CONST_FUN_OBJ_VAR({obj}, {min}, {entry});"),
        // Required parameters may arrive by keyword, so no positional minimum.
        ArgShape::Kw { .. } => format!("static MP_DEFINE_CONST_FUN_OBJ_KW({obj}, 0, {entry});"),
    }
}

pub fn entry_signature(symbol: &str, params: &str) -> String {
    format!("static mp_obj_t {symbol}({params})")
}

pub fn source_comment(w: &mut CWriter, f: &IRFunction, options: &CompileOptions) {
    if options.emit_source_comments {
        w.line(format!("/* {} (line {}) */", f.name, f.line));
    }
}

/// Boxed entry of a module function or static method, followed by its function object.
pub fn emit_function(w: &mut CWriter, f: &IRFunction, env: &ModuleEnv, options: &CompileOptions) {
    if f.is_generator {
        super::generators::emit_generator(w, f, env, options);
        return;
    }
    let _span = tracing::trace_span!("emit_function", name = %f.name).entered();
    source_comment(w, f, options);
    let prologue = boxed_prologue(env, f.shape, None, &f.params, f.star_args.as_ref(), f.star_kwargs.as_ref());
    w.open(entry_signature(&f.symbol, &prologue.params));
    for line in &prologue.lines {
        w.line(line);
    }
    let mut body = BodyEmitter::new(options, ReturnMode::Boxed, 1);
    body.declare(f);
    body.function_body(&f.body);
    w.append(body.finish());
    w.close();
    w.line(fun_obj_define(f.shape, &format!("{}_obj", f.symbol), &f.symbol));
    w.blank();
}
