//! AST visitor infrastructure
//!
//! `Visitor` is a read-only traversal over the syntax tree. Implement it for an
//! analysis pass, overriding only the methods you need, and call the matching
//! `walk_*` function inside an override to keep the default recursion.
//!
//! ```rust
//! use ember::visit::{Visitor, walk_expr};
//! use ember::parser::ast::Expr;
//! use ember::span::Spanned;
//! use std::collections::HashSet;
//!
//! struct IdentCollector {
//!     names: HashSet<String>,
//! }
//!
//! impl Visitor for IdentCollector {
//!     fn visit_expr(&mut self, expr: &Spanned<Expr>) {
//!         if let Expr::Ident(name) = &expr.node {
//!             self.names.insert(name.clone());
//!         }
//!         walk_expr(self, expr);
//!     }
//! }
//! ```
//!
//! Use the visitor for passes where most match arms would be pure recursion
//! (yield detection, assignment collection). The IR builder and emitters match by hand.

use std::collections::HashSet;

use crate::parser::ast::*;
use crate::span::Spanned;

/// Read-only AST visitor. Default implementations recurse into all children.
/// Omit the walk call in an override to prune traversal at that node.
pub trait Visitor: Sized {
    fn visit_program(&mut self, program: &Program) {
        walk_program(self, program);
    }

    fn visit_function(&mut self, func: &Spanned<Function>) {
        walk_function(self, func);
    }

    fn visit_class(&mut self, class: &Spanned<ClassDecl>) {
        walk_class(self, class);
    }

    fn visit_block(&mut self, block: &Spanned<Block>) {
        walk_block(self, block);
    }

    fn visit_stmt(&mut self, stmt: &Spanned<Stmt>) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Spanned<Expr>) {
        walk_expr(self, expr);
    }

    /// Called for every assignment target (plain, annotated, augmented, loop
    /// variables, comprehension targets, `except ... as` names).
    fn visit_target(&mut self, target: &Spanned<Expr>) {
        walk_expr(self, target);
    }
}

pub fn walk_program<V: Visitor>(v: &mut V, program: &Program) {
    for constant in &program.constants {
        v.visit_expr(&constant.node.value);
    }
    for func in &program.functions {
        v.visit_function(func);
    }
    for class in &program.classes {
        v.visit_class(class);
    }
    for stmt in &program.other {
        v.visit_stmt(stmt);
    }
}

pub fn walk_function<V: Visitor>(v: &mut V, func: &Spanned<Function>) {
    for param in &func.node.params {
        if let Some(default) = &param.default {
            v.visit_expr(default);
        }
    }
    v.visit_block(&func.node.body);
}

pub fn walk_class<V: Visitor>(v: &mut V, class: &Spanned<ClassDecl>) {
    for field in &class.node.fields {
        if let Some(default) = &field.default {
            v.visit_expr(default);
        }
    }
    for method in &class.node.methods {
        v.visit_function(method);
    }
}

pub fn walk_block<V: Visitor>(v: &mut V, block: &Spanned<Block>) {
    for stmt in &block.node.stmts {
        v.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor>(v: &mut V, stmt: &Spanned<Stmt>) {
    match &stmt.node {
        Stmt::Expr(expr) => v.visit_expr(expr),
        Stmt::Assign { target, value } => {
            v.visit_expr(value);
            v.visit_target(target);
        }
        Stmt::AnnAssign { target, value, .. } => {
            if let Some(value) = value {
                v.visit_expr(value);
            }
            v.visit_target(target);
        }
        Stmt::AugAssign { target, value, .. } => {
            v.visit_expr(value);
            v.visit_target(target);
        }
        Stmt::Return(value) => {
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
        Stmt::If { condition, then_block, else_block } => {
            v.visit_expr(condition);
            v.visit_block(then_block);
            if let Some(else_block) = else_block {
                v.visit_block(else_block);
            }
        }
        Stmt::While { condition, body } => {
            v.visit_expr(condition);
            v.visit_block(body);
        }
        Stmt::For { var, iterable, body } => {
            v.visit_expr(iterable);
            v.visit_target(var);
            v.visit_block(body);
        }
        Stmt::Try { body, handlers, else_block, finally_block } => {
            v.visit_block(body);
            for handler in handlers {
                if let Some(name) = &handler.name {
                    let target = Spanned::new(Expr::Ident(name.node.clone()), name.span);
                    v.visit_target(&target);
                }
                v.visit_block(&handler.body);
            }
            if let Some(block) = else_block {
                v.visit_block(block);
            }
            if let Some(block) = finally_block {
                v.visit_block(block);
            }
        }
        Stmt::Raise { exc } => {
            if let Some(exc) = exc {
                v.visit_expr(exc);
            }
        }
        Stmt::Break | Stmt::Continue | Stmt::Pass | Stmt::Unsupported(_) => {}
    }
}

pub fn walk_expr<V: Visitor>(v: &mut V, expr: &Spanned<Expr>) {
    match &expr.node {
        Expr::IntLit(_)
        | Expr::FloatLit(_)
        | Expr::BoolLit(_)
        | Expr::StringLit(_)
        | Expr::NoneLit
        | Expr::Ident(_)
        | Expr::Unsupported(_) => {}
        Expr::BinOp { lhs, rhs, .. } | Expr::BoolOp { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        Expr::UnaryOp { operand, .. } => v.visit_expr(operand),
        Expr::Compare { first, rest, .. } => {
            v.visit_expr(first);
            for e in rest {
                v.visit_expr(e);
            }
        }
        Expr::Call { func, args, kwargs } => {
            v.visit_expr(func);
            for arg in args {
                v.visit_expr(arg);
            }
            for (_, value) in kwargs {
                v.visit_expr(value);
            }
        }
        Expr::Attribute { object, .. } => v.visit_expr(object),
        Expr::Index { object, index } => {
            v.visit_expr(object);
            v.visit_expr(index);
        }
        Expr::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                v.visit_expr(part);
            }
        }
        Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
            for item in items {
                v.visit_expr(item);
            }
        }
        Expr::Dict(pairs) => {
            for (key, value) in pairs {
                v.visit_expr(key);
                v.visit_expr(value);
            }
        }
        Expr::ListComp { element, var, iterable, condition } => {
            v.visit_expr(iterable);
            v.visit_target(var);
            if let Some(condition) = condition {
                v.visit_expr(condition);
            }
            v.visit_expr(element);
        }
        Expr::IfExpr { condition, then_expr, else_expr } => {
            v.visit_expr(condition);
            v.visit_expr(then_expr);
            v.visit_expr(else_expr);
        }
        Expr::Yield(value) => {
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
    }
}

// ── Ready-made analyses ──

struct YieldFinder {
    found: usize,
}

impl Visitor for YieldFinder {
    fn visit_expr(&mut self, expr: &Spanned<Expr>) {
        if matches!(expr.node, Expr::Yield(_)) {
            self.found += 1;
        }
        walk_expr(self, expr);
    }
}

/// Number of `yield` expressions in a function body, in any position.
pub fn count_yields(block: &Spanned<Block>) -> usize {
    let mut finder = YieldFinder { found: 0 };
    finder.visit_block(block);
    finder.found
}

/// Collects every plain name bound by an assignment-like statement.
#[derive(Default)]
pub struct AssignedNames {
    pub names: HashSet<String>,
}

impl AssignedNames {
    fn bind(&mut self, target: &Spanned<Expr>) {
        match &target.node {
            Expr::Ident(name) => {
                self.names.insert(name.clone());
            }
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.bind(item);
                }
            }
            _ => {}
        }
    }
}

impl Visitor for AssignedNames {
    fn visit_target(&mut self, target: &Spanned<Expr>) {
        self.bind(target);
        walk_expr(self, target);
    }

    fn visit_expr(&mut self, expr: &Spanned<Expr>) {
        // Comprehension targets are scoped to the comprehension.
        if let Expr::ListComp { element, iterable, condition, .. } = &expr.node {
            self.visit_expr(iterable);
            if let Some(condition) = condition {
                self.visit_expr(condition);
            }
            self.visit_expr(element);
            return;
        }
        walk_expr(self, expr);
    }
}

pub fn assigned_names(block: &Spanned<Block>) -> HashSet<String> {
    let mut collector = AssignedNames::default();
    collector.visit_block(block);
    collector.names
}

/// True if `name` is rebound anywhere inside `block`.
pub fn assigns_name(block: &Spanned<Block>, name: &str) -> bool {
    assigned_names(block).contains(name)
}

struct ReadCounter<'a> {
    name: &'a str,
    reads: usize,
}

impl Visitor for ReadCounter<'_> {
    fn visit_expr(&mut self, expr: &Spanned<Expr>) {
        if matches!(&expr.node, Expr::Ident(n) if n == self.name) {
            self.reads += 1;
        }
        walk_expr(self, expr);
    }

    fn visit_target(&mut self, target: &Spanned<Expr>) {
        // A bare name target is a write; anything else reads its object.
        if !matches!(target.node, Expr::Ident(_)) {
            walk_expr(self, target);
        }
    }

    fn visit_stmt(&mut self, stmt: &Spanned<Stmt>) {
        // `x += 1` reads x as well as writing it.
        if let Stmt::AugAssign { target, .. } = &stmt.node {
            self.visit_expr(target);
        }
        walk_stmt(self, stmt);
    }
}

/// Number of places `name` is read inside `block`.
pub fn count_reads(block: &Spanned<Block>, name: &str) -> usize {
    let mut counter = ReadCounter { name, reads: 0 };
    counter.visit_block(block);
    counter.reads
}
