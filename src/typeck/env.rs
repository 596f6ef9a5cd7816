use std::collections::{HashMap, HashSet};

use crate::diagnostics::{CompileError, Diagnostics};
use crate::ir::Constant;
use crate::parser::ast::*;
use crate::span::{Span, Spanned};
use crate::visit;
use super::resolve::TypeResolver;
use super::types::{CType, ReturnType, SourceType};

/// Largest parameter count the host has a fixed-arity function macro for.
pub const MAX_FIXED_ARITY: usize = 3;

/// Modules whose imports only matter to static checkers.
const IGNORED_IMPORTS: &[&str] = &["typing", "typing_extensions", "__future__", "micropython", "dataclasses"];

/// How a boxed entry point receives its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    /// `MP_DEFINE_CONST_FUN_OBJ_{0..3}`.
    Fixed(usize),
    /// `MP_DEFINE_CONST_FUN_OBJ_VAR_BETWEEN` with `(n_args, args)`.
    Between { min: usize, max: usize },
    /// `MP_DEFINE_CONST_FUN_OBJ_VAR` with `(n_args, args)`.
    Var { min: usize },
    /// `MP_DEFINE_CONST_FUN_OBJ_KW` with `(n_args, pos_args, kw_args)`.
    Kw { min: usize },
}

impl ArgShape {
    pub fn for_params(total: usize, required: usize, star_args: bool, star_kwargs: bool) -> Self {
        if star_kwargs {
            ArgShape::Kw { min: required }
        } else if star_args {
            ArgShape::Var { min: required }
        } else if required == total && total <= MAX_FIXED_ARITY {
            ArgShape::Fixed(total)
        } else {
            ArgShape::Between { min: required, max: total }
        }
    }

    /// Whether a call with `n` positional arguments is statically valid.
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            ArgShape::Fixed(k) => n == k,
            ArgShape::Between { min, max } => (min..=max).contains(&n),
            ArgShape::Var { min } | ArgShape::Kw { min } => n >= min,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSig {
    pub name: String,
    pub ty: SourceType,
    pub default: Option<Constant>,
}

#[derive(Debug, Clone)]
pub struct FuncSig {
    pub name: String,
    /// Boxed entry point symbol.
    pub symbol: String,
    pub params: Vec<ParamSig>,
    pub star_args: Option<String>,
    pub star_kwargs: Option<String>,
    pub ret: ReturnType,
    pub is_generator: bool,
    pub shape: ArgShape,
    pub span: Span,
}

impl FuncSig {
    pub fn required(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRole {
    Instance,
    Static,
    Property,
}

#[derive(Debug, Clone)]
pub struct MethodSig {
    pub name: String,
    /// Python class declaring the method.
    pub owner: String,
    pub role: MethodRole,
    /// Parameters after `self` (all of them for static methods).
    pub params: Vec<ParamSig>,
    pub ret: ReturnType,
    pub is_virtual: bool,
    pub span: Span,
}

impl MethodSig {
    pub fn param_ctypes(&self) -> Vec<CType> {
        self.params.iter().map(|p| p.ty.c_type()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub ty: SourceType,
    pub default: Option<Constant>,
    pub span: Span,
}

/// One dispatch-table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct VSlot {
    pub name: String,
    /// Python class whose implementation fills the slot.
    pub owner: String,
    pub params: Vec<CType>,
    pub ret: CType,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub c_name: String,
    pub base: Option<String>,
    pub own_fields: Vec<FieldInfo>,
    pub methods: Vec<MethodSig>,
    pub vtable: Vec<VSlot>,
    pub dataclass: bool,
    pub depth: usize,
    pub span: Span,
}

impl ClassInfo {
    pub fn own_method(&self, name: &str) -> Option<&MethodSig> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportBinding {
    Module(String),
    Member { module: String, name: String },
}

/// Module-wide symbol information the builder and emitters consult.
#[derive(Debug)]
pub struct ModuleEnv {
    pub module: String,
    pub functions: HashMap<String, FuncSig>,
    pub function_order: Vec<String>,
    pub classes: HashMap<String, ClassInfo>,
    /// Bases before derived classes.
    pub class_order: Vec<String>,
    pub constants: HashMap<String, Constant>,
    pub constant_order: Vec<String>,
    pub imports: HashMap<String, ImportBinding>,
    /// Functions omitted from the unit after a function-scoped error.
    pub failed: HashSet<String>,
}

impl ModuleEnv {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            functions: HashMap::new(),
            function_order: Vec::new(),
            classes: HashMap::new(),
            class_order: Vec::new(),
            constants: HashMap::new(),
            constant_order: Vec::new(),
            imports: HashMap::new(),
            failed: HashSet::new(),
        }
    }

    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn class_c_name(&self, name: &str) -> String {
        format!("{}_{}", self.module, name)
    }

    pub fn function(&self, name: &str) -> Option<&FuncSig> {
        if self.failed.contains(name) {
            return None;
        }
        self.functions.get(name)
    }

    /// The class followed by its ancestors, nearest first.
    pub fn ancestry(&self, name: &str) -> Vec<&ClassInfo> {
        let mut chain = Vec::new();
        let mut current = self.classes.get(name);
        while let Some(info) = current {
            chain.push(info);
            current = info.base.as_deref().and_then(|b| self.classes.get(b));
        }
        chain
    }

    pub fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
        self.ancestry(class).iter().any(|c| c.name == ancestor)
    }

    pub fn root_of(&self, name: &str) -> Option<&ClassInfo> {
        self.ancestry(name).last().copied()
    }

    /// Full storage layout: inherited fields first, each with its member path.
    pub fn layout(&self, name: &str) -> Vec<(FieldInfo, String)> {
        let chain = self.ancestry(name);
        let mut fields = Vec::new();
        for (up, info) in chain.iter().enumerate().rev() {
            let prefix = "super.".repeat(up);
            for field in &info.own_fields {
                fields.push((field.clone(), format!("{prefix}{}", field.name)));
            }
        }
        fields
    }

    pub fn lookup_field(&self, class: &str, field: &str) -> Option<(FieldInfo, String)> {
        self.layout(class).into_iter().find(|(f, _)| f.name == field)
    }

    /// Method visible on `class`, searching from the class upward.
    pub fn lookup_method(&self, class: &str, method: &str) -> Option<&MethodSig> {
        self.ancestry(class).into_iter().find_map(|c| c.own_method(method))
    }

    /// Whether any class sharing `name`'s root has a dispatch table.
    pub fn hierarchy_has_vtable(&self, name: &str) -> bool {
        let Some(root) = self.root_of(name) else {
            return false;
        };
        self.classes
            .values()
            .any(|c| !c.vtable.is_empty() && self.root_of(&c.name).is_some_and(|r| r.name == root.name))
    }

    pub fn vtable_path(&self, name: &str) -> Option<String> {
        let info = self.classes.get(name)?;
        if !self.hierarchy_has_vtable(name) {
            return None;
        }
        Some(format!("{}vtable", "super.".repeat(info.depth)))
    }
}

/// Fold a literal (or negated numeric literal, or known constant name) to a value.
pub fn fold_literal(expr: &Expr, constants: &HashMap<String, Constant>) -> Option<Constant> {
    match expr {
        Expr::IntLit(v) => Some(Constant::Int(*v)),
        Expr::FloatLit(v) => Some(Constant::Float(*v)),
        Expr::BoolLit(v) => Some(Constant::Bool(*v)),
        Expr::StringLit(s) => Some(Constant::Str(s.clone())),
        Expr::NoneLit => Some(Constant::None),
        Expr::Ident(name) => constants.get(name).cloned(),
        Expr::UnaryOp { op: UnaryOp::Neg, operand } => match fold_literal(&operand.node, constants)? {
            Constant::Int(v) => v.checked_neg().map(Constant::Int),
            Constant::Float(v) => Some(Constant::Float(-v)),
            _ => None,
        },
        Expr::UnaryOp { op: UnaryOp::Pos, operand } => match fold_literal(&operand.node, constants)? {
            c @ (Constant::Int(_) | Constant::Float(_)) => Some(c),
            _ => None,
        },
        _ => None,
    }
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

fn decorator_is(decorator: &Decorator, name: &str) -> bool {
    decorator.name == name || decorator.name.rsplit('.').next() == Some(name)
}

/// Populate the module environment. Function-scoped problems are reported into
/// `diags` and leave the unit usable; layout conflicts abort the unit.
pub fn build_env(program: &Program, module: &str, diags: &mut Diagnostics) -> Result<ModuleEnv, CompileError> {
    let mut env = ModuleEnv::new(module);
    register_constants(program, &mut env);
    register_imports(program, &mut env);

    let order = class_order(program, diags);
    let class_names: HashSet<String> = order.iter().map(|&i| program.classes[i].node.name.node.clone()).collect();
    let resolver = TypeResolver::new(&class_names);

    for idx in order {
        let class = &program.classes[idx];
        let info = register_class(class, &env, &resolver, diags)?;
        tracing::debug!(class = %info.name, fields = info.own_fields.len(), slots = info.vtable.len(), "registered class");
        env.class_order.push(info.name.clone());
        env.classes.insert(info.name.clone(), info);
    }

    for func in &program.functions {
        let name = func.node.name.node.clone();
        match register_function(func, &env, &resolver) {
            Ok(sig) => {
                env.failed.remove(&name);
                if !env.function_order.contains(&name) {
                    env.function_order.push(name.clone());
                }
                env.functions.insert(name, sig);
            }
            Err(err) => {
                diags.report(&err, Some(&name));
                env.failed.insert(name);
            }
        }
    }
    Ok(env)
}

fn register_constants(program: &Program, env: &mut ModuleEnv) {
    for decl in &program.constants {
        let name = decl.node.name.node.clone();
        if let Some(value) = fold_literal(&decl.node.value.node, &env.constants) {
            if !env.constants.contains_key(&name) {
                env.constant_order.push(name.clone());
            }
            env.constants.insert(name, value);
        }
    }
}

fn register_imports(program: &Program, env: &mut ModuleEnv) {
    for import in &program.imports {
        let decl = &import.node;
        let path = decl.full_path();
        let top = decl.module.first().map(|s| s.node.clone()).unwrap_or_default();
        if IGNORED_IMPORTS.contains(&top.as_str()) {
            continue;
        }
        if decl.names.is_empty() {
            let (local, target) = match &decl.alias {
                Some(alias) => (alias.node.clone(), path.clone()),
                None => (top.clone(), top.clone()),
            };
            env.imports.insert(local, ImportBinding::Module(target));
        } else {
            for item in decl.names.iter().filter(|item| item.name.node != "*") {
                let binding = ImportBinding::Member { module: path.clone(), name: item.name.node.clone() };
                env.imports.insert(item.local().to_string(), binding);
            }
        }
    }
}

/// Topological order of the declarable classes. Classes with a base outside the
/// module or more than one base are reported and dropped.
fn class_order(program: &Program, diags: &mut Diagnostics) -> Vec<usize> {
    let mut pending: Vec<usize> = Vec::new();
    for (idx, class) in program.classes.iter().enumerate() {
        let decl = &class.node;
        if let Some(extra) = decl.extra_bases.first() {
            let err = CompileError::unsupported(
                format!("class '{}' has more than one base; only single inheritance is supported", decl.name.node),
                extra.span,
            );
            diags.report(&err, Some(&decl.name.node));
            continue;
        }
        pending.push(idx);
    }

    let mut placed: Vec<usize> = Vec::new();
    let mut placed_names: HashSet<&str> = HashSet::new();
    loop {
        let before = placed.len();
        pending.retain(|&idx| {
            let decl = &program.classes[idx].node;
            let ready = match &decl.base {
                None => true,
                Some(base) => placed_names.contains(base.node.as_str()),
            };
            if ready {
                placed.push(idx);
                placed_names.insert(decl.name.node.as_str());
            }
            !ready
        });
        if placed.len() == before {
            break;
        }
    }

    for idx in pending {
        let decl = &program.classes[idx].node;
        if let Some(base) = &decl.base {
            let err = CompileError::unsupported(
                format!("base class '{}' of '{}' is not a class defined in this module", base.node, decl.name.node),
                base.span,
            );
            diags.report(&err, Some(&decl.name.node));
        }
    }
    placed
}

fn resolve_or_report(
    resolver: &TypeResolver,
    ty: Option<&Spanned<TypeExpr>>,
    scope: &str,
    diags: &mut Diagnostics,
) -> SourceType {
    match resolver.resolve_opt(ty) {
        Ok(ty) => field_storage_type(ty),
        Err(err) => {
            diags.report(&err, Some(scope));
            SourceType::opaque()
        }
    }
}

/// Fixed tuples held in instance storage stay boxed.
fn field_storage_type(ty: SourceType) -> SourceType {
    match ty {
        SourceType::FixedTuple(_) => SourceType::opaque(),
        other => other,
    }
}

fn register_class(
    class: &Spanned<ClassDecl>,
    env: &ModuleEnv,
    resolver: &TypeResolver,
    diags: &mut Diagnostics,
) -> Result<ClassInfo, CompileError> {
    let decl = &class.node;
    let name = decl.name.node.clone();
    let base_info = decl.base.as_ref().and_then(|b| env.class(&b.node));
    let inherited: HashSet<String> = match &decl.base {
        Some(base) => env.layout(&base.node).into_iter().map(|(f, _)| f.name).collect(),
        None => HashSet::new(),
    };

    for stmt in &decl.unsupported {
        diags.report(&CompileError::unsupported(stmt.node.clone(), stmt.span), Some(&name));
    }

    let mut own_fields: Vec<FieldInfo> = Vec::new();
    for field in &decl.fields {
        if inherited.contains(&field.name.node) || own_fields.iter().any(|f| f.name == field.name.node) {
            continue;
        }
        let ty = resolve_or_report(resolver, Some(&field.ty), &name, diags);
        let default = match &field.default {
            Some(expr) => match fold_literal(&expr.node, &env.constants) {
                Some(value) => Some(value),
                None => {
                    let err = CompileError::unsupported(
                        format!("default for field '{}' must be a constant", field.name.node),
                        expr.span,
                    );
                    diags.report(&err, Some(&name));
                    None
                }
            },
            None => None,
        };
        own_fields.push(FieldInfo { name: field.name.node.clone(), ty, default, span: field.name.span });
    }

    if let Some(init) = decl.methods.iter().find(|m| m.node.name.node == "__init__") {
        collect_init_fields(&init.node, &inherited, &mut own_fields, env, resolver, &name, diags);
    }

    let mut methods = Vec::new();
    for method in &decl.methods {
        let sig = register_method(method, &name, env, resolver, diags);
        methods.push(sig);
    }

    let mut vtable = base_info.map(|b| b.vtable.clone()).unwrap_or_default();
    for method in &methods {
        let existing = vtable.iter().position(|s| s.name == method.name);
        if !method.is_virtual {
            if existing.is_some() {
                return Err(CompileError::layout_conflict(
                    format!(
                        "'{}.{}' replaces an inherited virtual method with a non-instance method",
                        name, method.name
                    ),
                    method.span,
                ));
            }
            continue;
        }
        let slot = VSlot {
            name: method.name.clone(),
            owner: name.clone(),
            params: method.param_ctypes(),
            ret: method.ret.c_type(),
        };
        match existing {
            Some(pos) => {
                let inherited_slot = &vtable[pos];
                if inherited_slot.params.len() != slot.params.len() {
                    return Err(CompileError::layout_conflict(
                        format!(
                            "override '{}.{}' takes {} parameters but the inherited slot takes {}",
                            name,
                            method.name,
                            slot.params.len(),
                            inherited_slot.params.len()
                        ),
                        method.span,
                    ));
                }
                if inherited_slot.params != slot.params || inherited_slot.ret != slot.ret {
                    return Err(CompileError::layout_conflict(
                        format!(
                            "override '{}.{}' changes the native signature of the inherited slot",
                            name, method.name
                        ),
                        method.span,
                    ));
                }
                vtable[pos] = slot;
            }
            None => vtable.push(slot),
        }
    }

    Ok(ClassInfo {
        c_name: env.class_c_name(&name),
        base: decl.base.as_ref().map(|b| b.node.clone()),
        own_fields,
        methods,
        vtable,
        dataclass: decl.decorators.iter().any(|d| decorator_is(&d.node, "dataclass")),
        depth: base_info.map_or(0, |b| b.depth + 1),
        span: class.span,
        name,
    })
}

/// Instance fields introduced by `self.x: T = ...` and `self.x = ...` in `__init__`.
fn collect_init_fields(
    init: &Function,
    inherited: &HashSet<String>,
    fields: &mut Vec<FieldInfo>,
    env: &ModuleEnv,
    resolver: &TypeResolver,
    class: &str,
    diags: &mut Diagnostics,
) {
    let self_name = init.params.first().map(|p| p.name.node.as_str()).unwrap_or("self");
    let param_types: HashMap<&str, &Spanned<TypeExpr>> = init
        .params
        .iter()
        .skip(1)
        .filter_map(|p| p.ty.as_ref().map(|t| (p.name.node.as_str(), t)))
        .collect();

    let mut annotated = Vec::new();
    let mut plain = Vec::new();
    collect_self_stores(&init.body.node, self_name, &mut annotated, &mut plain);

    let known = |fields: &Vec<FieldInfo>, n: &str| inherited.contains(n) || fields.iter().any(|f| f.name == n);

    for (attr, ty, span) in annotated {
        if known(fields, &attr) {
            continue;
        }
        let ty = resolve_or_report(resolver, Some(ty), class, diags);
        fields.push(FieldInfo { name: attr, ty, default: None, span });
    }
    for (attr, value, span) in plain {
        if known(fields, &attr) {
            continue;
        }
        let ty = match &value.node {
            Expr::Ident(n) if param_types.contains_key(n.as_str()) => {
                resolve_or_report(resolver, param_types.get(n.as_str()).copied(), class, diags)
            }
            other => fold_literal(other, &env.constants)
                .map(|c| c.source_type())
                .map(field_storage_type)
                .unwrap_or_else(|| literal_hint(other)),
        };
        fields.push(FieldInfo { name: attr, ty, default: None, span });
    }
}

/// Container literals assigned to unannotated fields keep their hint.
fn literal_hint(expr: &Expr) -> SourceType {
    use super::types::ContainerHint;
    match expr {
        Expr::List(_) | Expr::ListComp { .. } => SourceType::OpaqueHandle(ContainerHint::Sequence),
        Expr::Dict(_) => SourceType::OpaqueHandle(ContainerHint::Mapping),
        Expr::Set(_) => SourceType::OpaqueHandle(ContainerHint::Set),
        _ => SourceType::opaque(),
    }
}

type AnnotatedStore<'a> = (String, &'a Spanned<TypeExpr>, Span);
type PlainStore<'a> = (String, &'a Spanned<Expr>, Span);

fn collect_self_stores<'a>(
    block: &'a Block,
    self_name: &str,
    annotated: &mut Vec<AnnotatedStore<'a>>,
    plain: &mut Vec<PlainStore<'a>>,
) {
    let self_attr = |target: &Spanned<Expr>| -> Option<(String, Span)> {
        match &target.node {
            Expr::Attribute { object, attr } if matches!(&object.node, Expr::Ident(n) if n == self_name) => {
                Some((attr.node.clone(), attr.span))
            }
            _ => None,
        }
    };
    for stmt in &block.stmts {
        match &stmt.node {
            Stmt::AnnAssign { target, ty, .. } => {
                if let Some((attr, span)) = self_attr(target) {
                    annotated.push((attr, ty, span));
                }
            }
            Stmt::Assign { target, value } => {
                if let Some((attr, span)) = self_attr(target) {
                    plain.push((attr, value, span));
                }
            }
            Stmt::If { then_block, else_block, .. } => {
                collect_self_stores(&then_block.node, self_name, annotated, plain);
                if let Some(else_block) = else_block {
                    collect_self_stores(&else_block.node, self_name, annotated, plain);
                }
            }
            Stmt::While { body, .. } | Stmt::For { body, .. } => {
                collect_self_stores(&body.node, self_name, annotated, plain);
            }
            Stmt::Try { body, handlers, else_block, finally_block } => {
                collect_self_stores(&body.node, self_name, annotated, plain);
                for handler in handlers {
                    collect_self_stores(&handler.body.node, self_name, annotated, plain);
                }
                for block in [else_block, finally_block].into_iter().flatten() {
                    collect_self_stores(&block.node, self_name, annotated, plain);
                }
            }
            _ => {}
        }
    }
}

/// Signature failures in a method fall back to handles so the class layout stays whole.
fn register_method(
    method: &Spanned<Function>,
    class: &str,
    env: &ModuleEnv,
    resolver: &TypeResolver,
    diags: &mut Diagnostics,
) -> MethodSig {
    let func = &method.node;
    let role = if func.has_decorator("staticmethod") {
        MethodRole::Static
    } else if func.has_decorator("property") {
        MethodRole::Property
    } else {
        MethodRole::Instance
    };
    let scope = format!("{class}.{}", func.name.node);
    let skip = usize::from(role != MethodRole::Static);

    let mut params = Vec::new();
    for param in func.params.iter().skip(skip) {
        let ty = match resolver.resolve_opt(param.ty.as_ref()) {
            Ok(ty) => ty,
            Err(err) => {
                diags.report(&err, Some(&scope));
                SourceType::opaque()
            }
        };
        let default = param.default.as_ref().and_then(|d| fold_literal(&d.node, &env.constants));
        params.push(ParamSig { name: param.name.node.clone(), ty, default });
    }
    let ret = match resolver.resolve_return(func.return_type.as_ref()) {
        Ok(ret) => ret,
        Err(err) => {
            diags.report(&err, Some(&scope));
            ReturnType::Value(SourceType::opaque())
        }
    };

    MethodSig {
        name: func.name.node.clone(),
        owner: class.to_string(),
        role,
        params,
        ret,
        is_virtual: role == MethodRole::Instance && !is_dunder(&func.name.node),
        span: func.name.span,
    }
}

fn register_function(
    func: &Spanned<Function>,
    env: &ModuleEnv,
    resolver: &TypeResolver,
) -> Result<FuncSig, CompileError> {
    let f = &func.node;
    if let Some(decorator) = f.decorators.first() {
        return Err(CompileError::unsupported(
            format!("decorator '@{}' on a module function", decorator.node.name),
            decorator.span,
        ));
    }

    let mut params = Vec::new();
    for param in &f.params {
        let ty = resolver.resolve_opt(param.ty.as_ref())?;
        let default = match &param.default {
            Some(expr) => Some(fold_literal(&expr.node, &env.constants).ok_or_else(|| {
                CompileError::unsupported(
                    format!("default for parameter '{}' must be a constant", param.name.node),
                    expr.span,
                )
            })?),
            None => None,
        };
        params.push(ParamSig { name: param.name.node.clone(), ty, default });
    }
    let ret = resolver.resolve_return(f.return_type.as_ref())?;
    let required = params.iter().filter(|p| p.default.is_none()).count();
    let shape = ArgShape::for_params(params.len(), required, f.star_args.is_some(), f.star_kwargs.is_some());

    Ok(FuncSig {
        name: f.name.node.clone(),
        symbol: format!("{}_{}", env.module, f.name.node),
        params,
        star_args: f.star_args.as_ref().map(|p| p.name.node.clone()),
        star_kwargs: f.star_kwargs.as_ref().map(|p| p.name.node.clone()),
        ret,
        is_generator: visit::count_yields(&f.body) > 0,
        shape,
        span: f.name.span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn env_for(src: &str) -> (ModuleEnv, Diagnostics) {
        let program = parse_source(src).unwrap();
        let mut diags = Diagnostics::new();
        let env = build_env(&program, "m", &mut diags).unwrap();
        (env, diags)
    }

    #[test]
    fn arg_shapes() {
        assert_eq!(ArgShape::for_params(2, 2, false, false), ArgShape::Fixed(2));
        assert_eq!(ArgShape::for_params(4, 4, false, false), ArgShape::Between { min: 4, max: 4 });
        assert_eq!(ArgShape::for_params(2, 1, false, false), ArgShape::Between { min: 1, max: 2 });
        assert_eq!(ArgShape::for_params(1, 1, true, false), ArgShape::Var { min: 1 });
        assert_eq!(ArgShape::for_params(0, 0, true, true), ArgShape::Kw { min: 0 });
        assert!(ArgShape::Between { min: 1, max: 2 }.accepts(2));
        assert!(!ArgShape::Fixed(1).accepts(2));
    }

    #[test]
    fn function_signatures_and_shapes() {
        let (env, diags) = env_for("def add(a: int, b: int) -> int:\n    return a + b\n");
        assert!(diags.is_empty());
        let sig = env.function("add").unwrap();
        assert_eq!(sig.symbol, "m_add");
        assert_eq!(sig.shape, ArgShape::Fixed(2));
        assert_eq!(sig.ret, ReturnType::Value(SourceType::MachineInt));
    }

    #[test]
    fn unknown_annotation_fails_only_its_function() {
        let (env, diags) = env_for("def bad(x: Widget) -> int:\n    return 1\n\ndef good(x: int) -> int:\n    return x\n");
        assert!(env.function("bad").is_none());
        assert!(env.failed.contains("bad"));
        assert!(env.function("good").is_some());
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn constants_fold_including_negation() {
        let (env, _) = env_for("N = 10\nNEG = -3\nSCALE: float = 2.5\n");
        assert_eq!(env.constants["N"], Constant::Int(10));
        assert_eq!(env.constants["NEG"], Constant::Int(-3));
        assert_eq!(env.constants["SCALE"], Constant::Float(2.5));
        assert_eq!(env.constant_order, vec!["N", "NEG", "SCALE"]);
    }

    #[test]
    fn imports_bind_local_names() {
        let (env, _) = env_for("import math\nfrom random import randint as ri\nfrom typing import List\n");
        assert_eq!(env.imports["math"], ImportBinding::Module("math".into()));
        assert_eq!(
            env.imports["ri"],
            ImportBinding::Member { module: "random".into(), name: "randint".into() }
        );
        assert!(!env.imports.contains_key("List"));
    }

    #[test]
    fn combined_imports_bind_every_module_and_alias() {
        let (env, _) = env_for("import math, time as t\nfrom ustruct import pack as p, unpack\n");
        assert_eq!(env.imports["math"], ImportBinding::Module("math".into()));
        assert_eq!(env.imports["t"], ImportBinding::Module("time".into()));
        assert!(!env.imports.contains_key("time"));
        assert_eq!(env.imports["p"], ImportBinding::Member { module: "ustruct".into(), name: "pack".into() });
        assert_eq!(env.imports["unpack"], ImportBinding::Member { module: "ustruct".into(), name: "unpack".into() });
    }

    const SHAPES: &str = "\
class Shape:
    name: str

    def __init__(self, name: str):
        self.name = name
        self.scale: float = 1.0
        self.hits = 0

    def area(self) -> float:
        return 0.0

    def describe(self) -> str:
        return self.name

class Circle(Shape):
    def __init__(self, r: float):
        super().__init__(\"circle\")
        self.r = r

    def area(self) -> float:
        return 3.14 * self.r * self.r

    def grow(self, k: float) -> None:
        self.r = self.r * k
";

    #[test]
    fn fields_follow_declaration_order() {
        let (env, _) = env_for(SHAPES);
        let shape = env.class("Shape").unwrap();
        let names: Vec<_> = shape.own_fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "scale", "hits"]);
        assert_eq!(shape.own_fields[2].ty, SourceType::MachineInt);
        let circle = env.class("Circle").unwrap();
        assert_eq!(circle.own_fields.len(), 1);
        assert_eq!(circle.own_fields[0].ty, SourceType::MachineFloat);
    }

    #[test]
    fn derived_layout_uses_super_paths() {
        let (env, _) = env_for(SHAPES);
        let layout: Vec<_> = env.layout("Circle").into_iter().map(|(_, p)| p).collect();
        assert_eq!(layout, vec!["super.name", "super.scale", "super.hits", "r"]);
        assert_eq!(env.vtable_path("Circle").as_deref(), Some("super.vtable"));
    }

    #[test]
    fn vtable_prefix_is_preserved() {
        let (env, _) = env_for(SHAPES);
        let base: Vec<_> = env.class("Shape").unwrap().vtable.iter().map(|s| s.name.clone()).collect();
        let derived = &env.class("Circle").unwrap().vtable;
        let names: Vec<_> = derived.iter().map(|s| s.name.clone()).collect();
        assert_eq!(base, vec!["area", "describe"]);
        assert_eq!(names, vec!["area", "describe", "grow"]);
        assert_eq!(derived[0].owner, "Circle");
        assert_eq!(derived[1].owner, "Shape");
    }

    #[test]
    fn init_is_not_virtual() {
        let (env, _) = env_for(SHAPES);
        let init = env.class("Shape").unwrap().own_method("__init__").unwrap();
        assert!(!init.is_virtual);
        assert_eq!(env.lookup_method("Circle", "describe").unwrap().owner, "Shape");
    }

    #[test]
    fn override_with_different_arity_is_layout_conflict() {
        let src = "class A:\n    def f(self, x: int) -> int:\n        return x\n\nclass B(A):\n    def f(self) -> int:\n        return 0\n";
        let program = parse_source(src).unwrap();
        let err = build_env(&program, "m", &mut Diagnostics::new()).unwrap_err();
        assert!(matches!(err, CompileError::LayoutConflict { .. }));
    }

    #[test]
    fn override_with_different_representation_is_layout_conflict() {
        let src = "class A:\n    def f(self, x: int) -> int:\n        return x\n\nclass B(A):\n    def f(self, x: float) -> int:\n        return 0\n";
        let program = parse_source(src).unwrap();
        assert!(build_env(&program, "m", &mut Diagnostics::new()).is_err());
    }

    #[test]
    fn foreign_base_is_reported_and_dropped() {
        let (env, diags) = env_for("class MyError(Exception):\n    pass\n");
        assert!(env.class("MyError").is_none());
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn classes_are_ordered_bases_first() {
        let (env, _) = env_for("class B(A):\n    pass\n\nclass A:\n    pass\n");
        assert_eq!(env.class_order, vec!["A", "B"]);
    }

    #[test]
    fn dataclass_and_static_methods() {
        let src = "@dataclass\nclass P:\n    x: int\n    y: int = 0\n\n    @staticmethod\n    def origin() -> int:\n        return 0\n";
        let (env, _) = env_for(src);
        let p = env.class("P").unwrap();
        assert!(p.dataclass);
        assert_eq!(p.own_fields[1].default, Some(Constant::Int(0)));
        assert_eq!(p.own_method("origin").unwrap().role, MethodRole::Static);
        assert!(p.vtable.is_empty());
        assert!(env.vtable_path("P").is_none());
    }
}
