use super::*;
use crate::ir::{IRClass, RaiseKind, RangeStep, StmtKind};
use crate::parser::parse_source;
use crate::typeck::env::build_env;

fn build(src: &str) -> (IRModule, Diagnostics) {
    let program = parse_source(src).unwrap();
    let mut diags = Diagnostics::new();
    let env = build_env(&program, "m", &mut diags).unwrap();
    let module = build_module(&program, &env, src, &mut diags);
    (module, diags)
}

fn function<'m>(module: &'m IRModule, name: &str) -> &'m IRFunction {
    module.functions.iter().find(|f| f.name == name).unwrap()
}

fn class<'m>(module: &'m IRModule, name: &str) -> &'m IRClass {
    module.classes.iter().find(|c| c.name == name).unwrap()
}

fn local_type(f: &IRFunction, name: &str) -> SourceType {
    f.locals.iter().find(|l| l.name == name).map(|l| l.ty.clone()).unwrap()
}

fn find_stmt<'f>(body: &'f [IRStmt], pred: &dyn Fn(&StmtKind) -> bool) -> Option<&'f StmtKind> {
    for stmt in body {
        if pred(&stmt.kind) {
            return Some(&stmt.kind);
        }
        let nested: Option<&StmtKind> = match &stmt.kind {
            StmtKind::If { then_body, else_body, .. } => {
                find_stmt(then_body, pred).or_else(|| find_stmt(else_body, pred))
            }
            StmtKind::While { body, .. } | StmtKind::RangeLoop { body, .. } | StmtKind::IterLoop { body, .. } => {
                find_stmt(body, pred)
            }
            _ => None,
        };
        if nested.is_some() {
            return nested;
        }
    }
    None
}

#[test]
fn range_loop_uses_the_variable_as_counter() {
    let src = "def total(n: int) -> int:\n    s = 0\n    for i in range(n):\n        s += i\n    return s\n";
    let (module, diags) = build(src);
    assert!(diags.is_empty());
    let f = function(&module, "total");
    assert!(!f.failed);
    assert_eq!(local_type(f, "s"), SourceType::MachineInt);
    let Some(StmtKind::RangeLoop { var, step, .. }) = find_stmt(&f.body, &|k| matches!(k, StmtKind::RangeLoop { .. }))
    else {
        panic!("no range loop in {:?}", f.body);
    };
    assert_eq!(var, "i");
    assert_eq!(step, &RangeStep::Const(1));
}

#[test]
fn loop_variable_read_after_the_loop_gets_a_hidden_counter() {
    let src = "def last(n: int) -> int:\n    i = -1\n    for i in range(n):\n        pass\n    return i\n";
    let (module, _) = build(src);
    let f = function(&module, "last");
    let Some(StmtKind::RangeLoop { var, body, .. }) = find_stmt(&f.body, &|k| matches!(k, StmtKind::RangeLoop { .. }))
    else {
        panic!("no range loop");
    };
    assert_ne!(var, "i");
    assert!(var.starts_with("_i"));
    assert!(matches!(&body[0].kind, StmtKind::Assign { place: crate::ir::Place::Local(c), .. } if c == "i"));
}

#[test]
fn zero_step_raises_value_error() {
    let src = "def f() -> None:\n    for i in range(0, 10, 0):\n        print(i)\n";
    let (module, _) = build(src);
    let f = function(&module, "f");
    let raised = find_stmt(&f.body, &|k| matches!(k, StmtKind::Raise(_)));
    assert!(matches!(
        raised,
        Some(StmtKind::Raise(RaiseKind::Message { exc_type, .. })) if exc_type == "ValueError"
    ));
}

#[test]
fn later_assignment_widens_int_local_to_float() {
    let src = "def f(flag: bool) -> float:\n    x = 1\n    if flag:\n        x = 2.5\n    return x\n";
    let (module, _) = build(src);
    let f = function(&module, "f");
    assert_eq!(local_type(f, "x"), SourceType::MachineFloat);
}

#[test]
fn disagreeing_assignments_make_an_opaque_local() {
    let src = "def f(flag: bool) -> None:\n    x = 1\n    if flag:\n        x = \"one\"\n    print(x)\n";
    let (module, _) = build(src);
    assert_eq!(local_type(function(&module, "f"), "x"), SourceType::opaque());
}

#[test]
fn unsupported_statement_becomes_a_marker() {
    let src = "def f(x: int) -> int:\n    assert x > 0\n    return x\n";
    let (module, diags) = build(src);
    let f = function(&module, "f");
    assert!(f.failed);
    assert!(matches!(&f.body[0].kind, StmtKind::Unsupported(msg) if msg.contains("assert")));
    assert_eq!(diags.len(), 1);
}

#[test]
fn generator_counts_resume_states() {
    let src = "def count(n: int):\n    i = 0\n    while i < n:\n        yield i\n        i += 1\n";
    let (module, _) = build(src);
    let f = function(&module, "count");
    assert!(f.is_generator);
    assert_eq!(f.yield_count, 1);
}

const SHAPES: &str = "\
class Shape:
    def __init__(self, name: str):
        self.name = name

    def area(self) -> float:
        return 0.0

    def __str__(self) -> str:
        return self.name

class Square(Shape):
    def __init__(self, side: float):
        super().__init__(\"square\")
        self.side = side

    def area(self) -> float:
        return self.side * self.side

    @property
    def double(self) -> float:
        return self.side * 2.0
";

#[test]
fn class_dispatch_table_points_at_overrides() {
    let (module, diags) = build(SHAPES);
    assert!(diags.is_empty());
    let square = class(&module, "Square");
    assert_eq!(square.base_c.as_deref(), Some("m_Shape"));
    let area = square.vtable.iter().find(|s| s.name == "area").unwrap();
    assert_eq!(area.impl_symbol, "m_Square_area_native");
    assert_eq!(area.owner_c, "m_Square");
    assert_eq!(square.vtable_path.as_deref(), Some("super.vtable"));
}

#[test]
fn class_hooks_come_from_the_nearest_definition() {
    let (module, _) = build(SHAPES);
    let square = class(&module, "Square");
    let init = square.init.as_ref().unwrap();
    assert_eq!(init.native, "m_Square___init___native");
    assert_eq!(init.params.len(), 1);
    assert_eq!(square.print_method, Some(("m_Shape___str___native".to_string(), "m_Shape".to_string())));
    assert_eq!(square.properties, vec![("double".to_string(), "m_Square_double_mp".to_string())]);
    let paths: Vec<_> = square.fields.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["super.name", "side"]);
}

#[test]
fn field_reads_in_methods_go_through_self() {
    let (module, _) = build(SHAPES);
    let square = class(&module, "Square");
    let area = square.methods.iter().find(|m| m.name == "area").unwrap();
    assert!(!area.failed);
    let Some(StmtKind::Return(Some(value))) = find_stmt(&area.body, &|k| matches!(k, StmtKind::Return(_))) else {
        panic!("no return");
    };
    let text = format!("{value:?}");
    assert!(text.contains("SelfPtr"));
    assert!(text.contains("side"));
}

#[test]
fn untranslatable_method_becomes_a_raising_stub() {
    let src = "class C:\n    def f(self, *args) -> int:\n        return 0\n";
    let (module, diags) = build(src);
    let c = class(&module, "C");
    let f = c.methods.iter().find(|m| m.name == "f").unwrap();
    assert!(f.failed);
    assert!(matches!(
        &f.body[0].kind,
        StmtKind::Raise(RaiseKind::Message { exc_type, .. }) if exc_type == "NotImplementedError"
    ));
    assert!(!diags.is_empty());
}

#[test]
fn calls_between_module_functions_are_direct() {
    let src = "def sq(x: int) -> int:\n    return x * x\n\ndef f(y: int) -> int:\n    return sq(y) + 1\n";
    let (module, _) = build(src);
    let f = function(&module, "f");
    let has_direct = f.body.iter().flat_map(|s| &s.prelude).any(|i| {
        matches!(i, Instr::Call { callee: Callee::Boxed { symbol, .. }, .. } if symbol.ends_with("sq"))
    });
    assert!(has_direct, "{:?}", f.body);
}

#[test]
fn module_constants_are_collected() {
    let (module, _) = build("LIMIT = 10\nDEBUG = False\n\ndef f() -> int:\n    return LIMIT\n");
    let names: Vec<_> = module.constants.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["LIMIT", "DEBUG"]);
}
