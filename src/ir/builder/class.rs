use std::collections::HashSet;

use crate::codegen::names::{local_name, ClassNames};
use crate::diagnostics::{CompileError, Diagnostics};
use crate::parser::ast::{ClassDecl, Function};
use crate::span::Spanned;
use crate::typeck::env::{ArgShape, ClassInfo, MethodRole, MethodSig};
use crate::typeck::types::CType;
use crate::visit;
use crate::ir::{
    FunctionKind, IRClass, IRField, IRFunction, IRParam, IRSlot, IRStmt, InitCall, MethodKind, RaiseKind, StmtKind,
};
use super::{build_body, unsupported, FnSpec, Shared};

/// Build the IR for one class: layout, methods, dispatch table and the
/// hooks the type object needs.
pub fn build_class(decl: &Spanned<ClassDecl>, info: &ClassInfo, shared: &Shared, diags: &mut Diagnostics) -> IRClass {
    let env = shared.env;
    let fields = env
        .layout(&info.name)
        .into_iter()
        .map(|(f, path)| IRField { name: f.name, path, ty: f.ty, default: f.default })
        .collect();
    let own_fields = info
        .own_fields
        .iter()
        .map(|f| IRField { name: f.name.clone(), path: f.name.clone(), ty: f.ty.clone(), default: f.default.clone() })
        .collect();

    let methods = decl
        .node
        .methods
        .iter()
        .zip(&info.methods)
        .map(|(method, sig)| {
            let _span = tracing::debug_span!("method", name = %sig.name).entered();
            build_method(method, sig, info, shared, diags)
        })
        .collect();

    let vtable = info
        .vtable
        .iter()
        .map(|slot| {
            let owner_c = env.class_c_name(&slot.owner);
            IRSlot {
                name: slot.name.clone(),
                impl_symbol: ClassNames::new(&owner_c).native(&slot.name),
                owner_c,
                params: slot.params.clone(),
                ret: slot.ret.clone(),
            }
        })
        .collect();

    let init = env.lookup_method(&info.name, "__init__").filter(|m| m.role == MethodRole::Instance).map(|m| {
        let owner_c = env.class_c_name(&m.owner);
        InitCall { native: ClassNames::new(&owner_c).native("__init__"), owner_c, params: ir_params(m) }
    });

    let mut seen = HashSet::new();
    let mut properties = Vec::new();
    for class in env.ancestry(&info.name) {
        for m in class.methods.iter().filter(|m| m.role == MethodRole::Property) {
            if seen.insert(m.name.clone()) {
                properties.push((m.name.clone(), ClassNames::new(&class.c_name).wrapper(&m.name)));
            }
        }
    }

    let print_method = ["__str__", "__repr__"].iter().find_map(|name| {
        let m = env.lookup_method(&info.name, name).filter(|m| m.role == MethodRole::Instance)?;
        let owner_c = env.class_c_name(&m.owner);
        Some((ClassNames::new(&owner_c).native(name), owner_c))
    });

    IRClass {
        name: info.name.clone(),
        c_name: info.c_name.clone(),
        base_c: info.base.as_ref().map(|b| env.class_c_name(b)),
        own_fields,
        fields,
        methods,
        vtable,
        vtable_path: env.vtable_path(&info.name),
        init,
        dataclass: info.dataclass,
        properties,
        print_method,
        doc: decl.node.doc.clone(),
        line: shared.line(decl.node.name.span),
    }
}

fn ir_params(m: &MethodSig) -> Vec<IRParam> {
    m.params
        .iter()
        .map(|p| IRParam { name: p.name.clone(), c_name: local_name(&p.name), ty: p.ty.clone(), default: p.default.clone() })
        .collect()
}

fn method_kind(role: MethodRole) -> MethodKind {
    match role {
        MethodRole::Instance => MethodKind::Instance,
        MethodRole::Static => MethodKind::Static,
        MethodRole::Property => MethodKind::Property,
    }
}

/// Reject method shapes the native calling convention cannot carry.
fn check_method_shape(method: &Spanned<Function>, sig: &MethodSig) -> Result<(), CompileError> {
    let f = &method.node;
    let span = f.name.span;
    if let Some(decorator) = f
        .decorators
        .iter()
        .find(|d| !matches!(d.node.name.as_str(), "staticmethod" | "property"))
    {
        return Err(unsupported(format!("decorator '@{}' on a method", decorator.node.name), decorator.span));
    }
    if f.star_args.is_some() || f.star_kwargs.is_some() {
        return Err(unsupported(format!("'*args' or '**kwargs' in method '{}'", sig.name), span));
    }
    if visit::count_yields(&f.body) > 0 {
        return Err(unsupported(format!("generator method '{}'", sig.name), span));
    }
    if sig.role != MethodRole::Static && f.params.is_empty() {
        return Err(unsupported(format!("method '{}' has no self parameter", sig.name), span));
    }
    if sig.role == MethodRole::Property && !sig.params.is_empty() {
        return Err(unsupported(format!("property '{}' takes parameters", sig.name), span));
    }
    Ok(())
}

fn build_method(
    method: &Spanned<Function>,
    sig: &MethodSig,
    info: &ClassInfo,
    shared: &Shared,
    diags: &mut Diagnostics,
) -> IRFunction {
    let names = ClassNames::new(&info.c_name);
    let scope = format!("{}.{}", info.name, sig.name);
    let kind = FunctionKind::Method {
        class: info.name.clone(),
        class_c: info.c_name.clone(),
        kind: method_kind(sig.role),
        is_virtual: sig.is_virtual,
    };
    let required = sig.params.iter().filter(|p| p.default.is_none()).count();
    let (ret_ctype, self_name, shape) = match sig.role {
        MethodRole::Static => (CType::Obj, None, ArgShape::for_params(sig.params.len(), required, false, false)),
        _ => (
            sig.ret.c_type(),
            method.node.params.first().map(|p| p.name.node.clone()),
            ArgShape::for_params(sig.params.len() + 1, required + 1, false, false),
        ),
    };
    let spec = FnSpec {
        name: sig.name.clone(),
        symbol: names.static_entry(&sig.name),
        kind,
        params: &sig.params,
        star_args: None,
        star_kwargs: None,
        ret: sig.ret.clone(),
        ret_ctype,
        is_generator: false,
        shape,
        class: Some(info),
        self_name,
    };

    let built = check_method_shape(method, sig).and_then(|()| build_body(&method.node, &spec, shared));
    match built {
        Ok((ir, errors)) => {
            for err in &errors {
                diags.report(err, Some(&scope));
            }
            ir
        }
        Err(err) => {
            diags.report(&err, Some(&scope));
            stub_method(method, sig, &spec, shared)
        }
    }
}

/// Body for a method that could not be translated: raises when called, keeps
/// its slot and wrapper so the class layout stays intact.
fn stub_method(method: &Spanned<Function>, sig: &MethodSig, spec: &FnSpec, shared: &Shared) -> IRFunction {
    let line = shared.line(method.node.name.span);
    let message = format!("{}.{} could not be translated", sig.owner, sig.name);
    let raise = StmtKind::Raise(RaiseKind::Message { exc_type: "NotImplementedError".into(), message });
    IRFunction {
        name: spec.name.clone(),
        symbol: spec.symbol.clone(),
        kind: spec.kind.clone(),
        params: ir_params(sig),
        star_args: None,
        star_kwargs: None,
        ret: sig.ret.clone(),
        body: vec![IRStmt::bare(raise, line)],
        locals: Vec::new(),
        temps: Vec::new(),
        iter_slots: 0,
        yield_count: 0,
        is_generator: false,
        shape: spec.shape,
        line,
        doc: method.node.doc.clone(),
        failed: true,
    }
}
