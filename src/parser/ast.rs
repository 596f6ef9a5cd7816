use crate::span::{Span, Spanned};

#[derive(Debug, Clone)]
pub struct Program {
    pub imports: Vec<Spanned<ImportDecl>>,
    pub functions: Vec<Spanned<Function>>,
    pub classes: Vec<Spanned<ClassDecl>>,
    pub constants: Vec<Spanned<ConstDecl>>,
    /// Module-level statements that are neither definitions nor constants.
    pub other: Vec<Spanned<Stmt>>,
    /// Definition order of functions and classes, as (is_class, index).
    pub order: Vec<(bool, usize)>,
}

#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub module: Vec<Spanned<String>>,
    /// Names pulled in by `from m import a, b`; empty for plain `import m`.
    pub names: Vec<ImportName>,
    /// `import m as alias`.
    pub alias: Option<Spanned<String>>,
}

/// One `name [as alias]` of a `from` import.
#[derive(Debug, Clone)]
pub struct ImportName {
    pub name: Spanned<String>,
    pub alias: Option<Spanned<String>>,
}

impl ImportName {
    /// The name bound in the importing module.
    pub fn local(&self) -> &str {
        self.alias.as_ref().unwrap_or(&self.name).node.as_str()
    }
}

impl ImportDecl {
    pub fn full_path(&self) -> String {
        self.module.iter().map(|s| s.node.as_str()).collect::<Vec<_>>().join(".")
    }
}

/// `NAME = literal` or `NAME: T = literal` at module level.
#[derive(Debug, Clone)]
pub struct ConstDecl {
    pub name: Spanned<String>,
    pub ty: Option<Spanned<TypeExpr>>,
    pub value: Spanned<Expr>,
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: Spanned<String>,
    pub base: Option<Spanned<String>>,
    /// Bases after the first; single inheritance only, so these are reported.
    pub extra_bases: Vec<Spanned<String>>,
    pub decorators: Vec<Spanned<Decorator>>,
    pub fields: Vec<Field>,
    pub methods: Vec<Spanned<Function>>,
    pub doc: Option<String>,
    /// Class-body statements with no lowering (unannotated class attributes, nested classes).
    pub unsupported: Vec<Spanned<String>>,
}

impl ClassDecl {
    pub fn has_decorator(&self, name: &str) -> bool {
        self.decorators.iter().any(|d| d.node.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: Spanned<String>,
    pub ty: Spanned<TypeExpr>,
    pub default: Option<Spanned<Expr>>,
}

#[derive(Debug, Clone)]
pub struct Decorator {
    pub name: String,
    pub args: Vec<Spanned<Expr>>,
    pub kwargs: Vec<(Spanned<String>, Spanned<Expr>)>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    pub star_args: Option<Param>,
    pub star_kwargs: Option<Param>,
    pub return_type: Option<Spanned<TypeExpr>>,
    pub decorators: Vec<Spanned<Decorator>>,
    pub body: Spanned<Block>,
    pub doc: Option<String>,
    /// Position of a bare `*` or `/` parameter marker, if any.
    pub marker: Option<Span>,
}

impl Function {
    pub fn has_decorator(&self, name: &str) -> bool {
        self.decorators.iter().any(|d| d.node.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Spanned<String>,
    pub ty: Option<Spanned<TypeExpr>>,
    pub default: Option<Spanned<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Named(String),
    /// `typing.List` style dotted name.
    Qualified { module: String, name: String },
    /// `list[int]`, `tuple[int, float]`, `Optional[str]`.
    Generic { base: String, args: Vec<Spanned<TypeExpr>> },
    /// `int | None`
    Union(Vec<Spanned<TypeExpr>>),
    NoneType,
    /// Quoted forward reference, e.g. `"Node"`.
    Forward(String),
    /// Anything else written in annotation position.
    Other,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Spanned<Stmt>>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Spanned<Expr>),
    Assign {
        target: Spanned<Expr>,
        value: Spanned<Expr>,
    },
    AnnAssign {
        target: Spanned<Expr>,
        ty: Spanned<TypeExpr>,
        value: Option<Spanned<Expr>>,
    },
    AugAssign {
        target: Spanned<Expr>,
        op: BinOp,
        value: Spanned<Expr>,
    },
    Return(Option<Spanned<Expr>>),
    If {
        condition: Spanned<Expr>,
        then_block: Spanned<Block>,
        else_block: Option<Spanned<Block>>,
    },
    While {
        condition: Spanned<Expr>,
        body: Spanned<Block>,
    },
    For {
        var: Spanned<Expr>,
        iterable: Spanned<Expr>,
        body: Spanned<Block>,
    },
    Try {
        body: Spanned<Block>,
        handlers: Vec<ExceptHandler>,
        else_block: Option<Spanned<Block>>,
        finally_block: Option<Spanned<Block>>,
    },
    Raise {
        exc: Option<Spanned<Expr>>,
    },
    Break,
    Continue,
    Pass,
    /// A statement shape the subset does not lower (`with`, `global`, `del`, nested `def`...).
    Unsupported(String),
}

#[derive(Debug, Clone)]
pub struct ExceptHandler {
    pub exc_type: Option<Spanned<String>>,
    pub name: Option<Spanned<String>>,
    pub body: Spanned<Block>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    StringLit(String),
    NoneLit,
    Ident(String),
    BinOp {
        op: BinOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Spanned<Expr>>,
    },
    BoolOp {
        op: BoolOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
    /// `a < b < c` keeps every operand; `ops.len() == rest.len()`.
    Compare {
        first: Box<Spanned<Expr>>,
        ops: Vec<CmpOp>,
        rest: Vec<Spanned<Expr>>,
    },
    Call {
        func: Box<Spanned<Expr>>,
        args: Vec<Spanned<Expr>>,
        kwargs: Vec<(Spanned<String>, Spanned<Expr>)>,
    },
    Attribute {
        object: Box<Spanned<Expr>>,
        attr: Spanned<String>,
    },
    Index {
        object: Box<Spanned<Expr>>,
        index: Box<Spanned<Expr>>,
    },
    Slice {
        lower: Option<Box<Spanned<Expr>>>,
        upper: Option<Box<Spanned<Expr>>>,
        step: Option<Box<Spanned<Expr>>>,
    },
    List(Vec<Spanned<Expr>>),
    Tuple(Vec<Spanned<Expr>>),
    Set(Vec<Spanned<Expr>>),
    Dict(Vec<(Spanned<Expr>, Spanned<Expr>)>),
    ListComp {
        element: Box<Spanned<Expr>>,
        var: Box<Spanned<Expr>>,
        iterable: Box<Spanned<Expr>>,
        condition: Option<Box<Spanned<Expr>>>,
    },
    IfExpr {
        condition: Box<Spanned<Expr>>,
        then_expr: Box<Spanned<Expr>>,
        else_expr: Box<Spanned<Expr>>,
    },
    Yield(Option<Box<Spanned<Expr>>>),
    /// Parsed but never lowered (`lambda`, starred expressions, ...).
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}
