//! Typed intermediate representation.
//!
//! Values are pure: reading an [`IRValue`] never performs a side effect. Every
//! call, allocation, container mutation and iterator advance is an [`Instr`]
//! in the prelude of the statement that needs it, so emission order equals
//! Python evaluation order even after statements are restructured.

pub mod builder;
pub mod scan;
pub mod temps;

use crate::parser::ast::{BinOp, BoolOp, CmpOp, UnaryOp};
use crate::typeck::env::ArgShape;
use crate::typeck::types::{CType, RTuple, ReturnType, SourceType};

pub type TempId = usize;

/// Small ints are stored inline in the handle on every port.
const SMALL_INT_MIN: i64 = -(1 << 30);
const SMALL_INT_MAX: i64 = (1 << 30) - 1;

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
}

impl Constant {
    pub fn source_type(&self) -> SourceType {
        match self {
            Constant::Int(_) => SourceType::MachineInt,
            Constant::Float(_) => SourceType::MachineFloat,
            Constant::Bool(_) => SourceType::Boolean,
            Constant::Str(_) => SourceType::Text,
            Constant::None => SourceType::opaque(),
        }
    }

    /// C expression in the constant's own representation.
    pub fn native_literal(&self) -> String {
        match self {
            Constant::Int(v) => int_literal(*v),
            Constant::Float(v) => float_literal(*v),
            Constant::Bool(true) => "true".to_string(),
            Constant::Bool(false) => "false".to_string(),
            Constant::Str(s) => format!("mp_obj_new_str({}, {})", c_string(s), s.len()),
            Constant::None => "mp_const_none".to_string(),
        }
    }

    /// C expression producing a boxed handle for the constant.
    pub fn boxed_literal(&self) -> String {
        match self {
            Constant::Int(v) if (SMALL_INT_MIN..=SMALL_INT_MAX).contains(v) => {
                format!("MP_OBJ_NEW_SMALL_INT({v})")
            }
            Constant::Int(v) => format!("mp_obj_new_int_from_ll({}LL)", v),
            Constant::Float(v) => format!("mp_obj_new_float({})", float_literal(*v)),
            Constant::Bool(true) => "mp_const_true".to_string(),
            Constant::Bool(false) => "mp_const_false".to_string(),
            Constant::Str(_) | Constant::None => self.native_literal(),
        }
    }

    /// ROM table form for the module globals, when one exists.
    pub fn rom_literal(&self) -> Option<String> {
        match self {
            Constant::Int(v) if (SMALL_INT_MIN..=SMALL_INT_MAX).contains(v) => Some(format!("MP_ROM_INT({v})")),
            Constant::Bool(true) => Some("MP_ROM_TRUE".to_string()),
            Constant::Bool(false) => Some("MP_ROM_FALSE".to_string()),
            Constant::None => Some("MP_ROM_NONE".to_string()),
            _ => None,
        }
    }
}

fn int_literal(v: i64) -> String {
    if v == i64::MIN {
        // The literal 9223372036854775808 does not fit a signed long long.
        "(-9223372036854775807LL - 1)".to_string()
    } else if (SMALL_INT_MIN..=SMALL_INT_MAX).contains(&v) {
        v.to_string()
    } else {
        format!("{v}LL")
    }
}

fn float_literal(v: f64) -> String {
    if v.is_nan() {
        "MICROPY_FLOAT_C_FUN(nan)(\"\")".to_string()
    } else if v.is_infinite() {
        let sign = if v < 0.0 { "-" } else { "" };
        format!("({sign}MICROPY_FLOAT_CONST(1.0) / MICROPY_FLOAT_CONST(0.0))")
    } else {
        // `{:?}` always keeps a decimal point or exponent.
        format!("MICROPY_FLOAT_CONST({v:?})")
    }
}

/// Quote `s` as a C string literal. Non-ASCII bytes use octal escapes, which
/// never swallow a following digit the way `\x` escapes do.
pub fn c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for byte in s.bytes() {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'?' => out.push_str("\\?"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\{byte:03o}")),
        }
    }
    out.push('"');
    out
}

/// Which native arithmetic a binary or unary node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumKind {
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IRValue {
    Const(Constant),
    /// A named C local (or generator frame field).
    Local(String),
    Temp(TempId),
    /// Native `self` pointer inside a method body.
    SelfPtr,
    /// Boxed handle of the enclosing method's `self`.
    SelfObj,
    /// Verbatim C token: qstrs, type objects, function objects.
    Raw(String),
    /// `mp_load_global(MP_QSTR_name)`.
    Global(String),
    Binary { op: BinOp, num: NumKind, lhs: Box<IRValue>, rhs: Box<IRValue> },
    Unary { op: UnaryOp, num: NumKind, operand: Box<IRValue> },
    /// Numeric comparison, or handle identity for `is` / `is not`.
    Compare { op: CmpOp, lhs: Box<IRValue>, rhs: Box<IRValue> },
    Logical { op: BoolOp, lhs: Box<IRValue>, rhs: Box<IRValue> },
    Not(Box<IRValue>),
    Ternary { cond: Box<IRValue>, then_value: Box<IRValue>, else_value: Box<IRValue> },
    Box { from: CType, value: Box<IRValue> },
    Unbox { to: CType, value: Box<IRValue> },
    /// Numeric conversion between native types.
    Cast { to: CType, value: Box<IRValue> },
    /// Typed instance pointer: `((C_obj_t *)MP_OBJ_TO_PTR(v))`, or a cast of `self`.
    ObjPtr { class_c: String, value: Box<IRValue> },
    /// `ptr->path`, where `ptr` is `SelfPtr` or `ObjPtr`.
    Field { ptr: Box<IRValue>, path: String },
    TupleField { value: Box<IRValue>, index: usize },
    MakeRTuple { shape: RTuple, fields: Vec<IRValue> },
}

impl IRValue {
    pub fn int(v: i64) -> Self {
        IRValue::Const(Constant::Int(v))
    }

    pub fn none() -> Self {
        IRValue::Const(Constant::None)
    }

    pub fn boxed(from: CType, value: IRValue) -> Self {
        match (from, value) {
            (CType::Obj, value) => value,
            (_, IRValue::Unbox { value, .. }) => *value,
            (from, value) => IRValue::Box { from, value: Box::new(value) },
        }
    }

    pub fn unboxed(to: CType, value: IRValue) -> Self {
        match (to, value) {
            (CType::Obj, value) => value,
            (to, IRValue::Box { from, value }) if from == to => *value,
            (to, value) => IRValue::Unbox { to, value: Box::new(value) },
        }
    }

    /// Cheap to evaluate twice: no calls, no allocation.
    pub fn is_simple(&self) -> bool {
        matches!(
            self,
            IRValue::Const(_) | IRValue::Local(_) | IRValue::Temp(_) | IRValue::SelfPtr | IRValue::SelfObj | IRValue::Raw(_)
        )
    }
}

/// Target of a call instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// Boxed entry point of a module function, called directly.
    Boxed { symbol: String, shape: ArgShape },
    /// Plain C function taking the arguments as given.
    Native(String),
    /// `mp_call_function_n_kw` on a handle.
    Dynamic(IRValue),
    /// `mp_load_method` + `mp_call_method_n_kw`.
    Method { receiver: IRValue, name: String },
    /// Dispatch through the receiver's vtable. `ptr` is a simple typed pointer.
    Virtual { vtable_c: String, vtable_path: String, ptr: IRValue, slot: String },
    /// Construct an instance of a module class through its type object.
    Construct { class_c: String },
}

/// A side-effecting step that runs before the values depending on it.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Evaluate a value once into a temporary.
    Assign { dest: TempId, value: IRValue },
    Call { dest: Option<TempId>, callee: Callee, args: Vec<IRValue>, kwargs: Vec<(String, IRValue)> },
    NewList { dest: TempId, items: Vec<IRValue> },
    NewTuple { dest: TempId, items: Vec<IRValue> },
    NewDict { dest: TempId, entries: Vec<(IRValue, IRValue)> },
    NewSet { dest: TempId, items: Vec<IRValue> },
    /// Fixed-arity unpack of a boxed iterable into boxed temporaries.
    Unpack { source: IRValue, dests: Vec<TempId> },
    Print { args: Vec<IRValue>, sep: String, end: String },
    /// Conditional or looping region (short-circuit operands, comprehensions).
    Block(Vec<IRStmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    Local(String),
    Temp(TempId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeStep {
    Const(i64),
    /// Evaluated once into a temporary before the loop.
    Dynamic(IRValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    /// Boxed exception type to match; `None` catches everything.
    pub exc_type: Option<IRValue>,
    /// Local receiving the exception object.
    pub binding: Option<String>,
    pub body: Vec<IRStmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RaiseKind {
    /// `raise E("literal")` on a builtin exception.
    Message { exc_type: String, message: String },
    /// `raise E` on a builtin exception.
    Type(String),
    /// Raise a constructed exception object.
    Object(IRValue),
    /// Bare `raise`.
    Reraise,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign { place: Place, value: IRValue },
    FieldStore { ptr: IRValue, path: String, value: IRValue },
    /// Only the prelude carries work.
    Exec,
    Return(Option<IRValue>),
    If { cond: IRValue, then_body: Vec<IRStmt>, else_body: Vec<IRStmt> },
    While { cond_prelude: Vec<Instr>, cond: IRValue, body: Vec<IRStmt> },
    /// Native counting loop. `var` is the C control variable: the Python loop
    /// variable itself, or a hidden counter copied into it at the top of `body`.
    RangeLoop {
        var: String,
        start: IRValue,
        stop: IRValue,
        step: RangeStep,
        body: Vec<IRStmt>,
    },
    /// Iterator protocol loop. `item` receives each boxed element; the body
    /// starts with the statements binding it to the loop target.
    IterLoop {
        iterable: IRValue,
        slot: usize,
        item: TempId,
        body: Vec<IRStmt>,
    },
    Break,
    Continue,
    Try { body: Vec<IRStmt>, handlers: Vec<Handler>, orelse: Vec<IRStmt>, finally: Vec<IRStmt> },
    Raise(RaiseKind),
    Yield { state: u16, value: IRValue },
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IRStmt {
    pub prelude: Vec<Instr>,
    pub kind: StmtKind,
    pub line: usize,
}

impl IRStmt {
    pub fn new(prelude: Vec<Instr>, kind: StmtKind, line: usize) -> Self {
        Self { prelude, kind, line }
    }

    pub fn bare(kind: StmtKind, line: usize) -> Self {
        Self { prelude: Vec::new(), kind, line }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IRParam {
    pub name: String,
    pub c_name: String,
    pub ty: SourceType,
    pub default: Option<Constant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IRLocal {
    pub name: String,
    pub c_name: String,
    pub ty: SourceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Instance,
    Static,
    Property,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionKind {
    Free,
    Method { class: String, class_c: String, kind: MethodKind, is_virtual: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IRFunction {
    pub name: String,
    /// Boxed entry point for free and static functions; method prefix otherwise.
    pub symbol: String,
    pub kind: FunctionKind,
    pub params: Vec<IRParam>,
    pub star_args: Option<IRParam>,
    pub star_kwargs: Option<IRParam>,
    pub ret: ReturnType,
    pub body: Vec<IRStmt>,
    /// Non-parameter locals in first-binding order.
    pub locals: Vec<IRLocal>,
    /// CType of each temporary; `_tmp{i + 1}` has type `temps[i]`.
    pub temps: Vec<CType>,
    pub iter_slots: usize,
    pub yield_count: u16,
    pub is_generator: bool,
    pub shape: ArgShape,
    pub line: usize,
    pub doc: Option<String>,
    /// Contains unsupported markers.
    pub failed: bool,
}

impl IRFunction {
    pub fn max_temp(&self) -> usize {
        self.temps.len()
    }

    /// C type the body's `return` statements produce.
    pub fn body_return_ctype(&self) -> CType {
        match &self.kind {
            FunctionKind::Method { kind: MethodKind::Instance | MethodKind::Property, .. } => self.ret.c_type(),
            _ => CType::Obj,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IRField {
    pub name: String,
    /// Member path from the class's own struct, e.g. `super.x`.
    pub path: String,
    pub ty: SourceType,
    pub default: Option<Constant>,
}

impl IRField {
    pub fn storage(&self) -> CType {
        self.ty.c_type()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IRSlot {
    pub name: String,
    /// Native function implementing the slot for this class.
    pub impl_symbol: String,
    /// Class whose `_obj_t` the implementation takes as `self`.
    pub owner_c: String,
    pub params: Vec<CType>,
    pub ret: CType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitCall {
    pub native: String,
    pub owner_c: String,
    pub params: Vec<IRParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IRClass {
    pub name: String,
    pub c_name: String,
    pub base_c: Option<String>,
    /// Declared directly on this class, in storage order.
    pub own_fields: Vec<IRField>,
    /// Full layout including inherited fields, base first.
    pub fields: Vec<IRField>,
    pub methods: Vec<IRFunction>,
    pub vtable: Vec<IRSlot>,
    /// Path of the vtable pointer from this class's struct, when the hierarchy has one.
    pub vtable_path: Option<String>,
    pub init: Option<InitCall>,
    pub dataclass: bool,
    /// Property getters visible on this class: (name, boxed wrapper symbol).
    pub properties: Vec<(String, String)>,
    /// Native `__str__`/`__repr__` used for printing: (symbol, owner class C name).
    pub print_method: Option<(String, String)>,
    pub doc: Option<String>,
    pub line: usize,
}

/// A module-level export that is not a function or class.
#[derive(Debug, Clone, PartialEq)]
pub struct IRConstant {
    pub name: String,
    pub value: Constant,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IRModule {
    pub name: String,
    pub functions: Vec<IRFunction>,
    pub classes: Vec<IRClass>,
    pub constants: Vec<IRConstant>,
}
