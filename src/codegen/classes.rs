//! Native classes: instance structs, dispatch tables, method natives and
//! wrappers, and the type object tying them to the runtime.

use std::collections::HashSet;

use crate::config::CompileOptions;
use crate::ir::{Constant, FunctionKind, IRClass, IRField, IRFunction, IRParam, MethodKind};
use crate::typeck::env::{MethodRole, ModuleEnv};
use crate::typeck::types::CType;
use super::function::{
    boxed_prologue, default_literal, emit_function, entry_signature, fun_obj_decl, fun_obj_define, source_comment,
    unbox_param, BodyEmitter, Prologue, Receiver, ReturnMode,
};
use super::names::ClassNames;
use super::writer::CWriter;

fn method_kind(f: &IRFunction) -> MethodKind {
    match &f.kind {
        FunctionKind::Method { kind, .. } => *kind,
        FunctionKind::Free => MethodKind::Static,
    }
}

fn struct_depth(env: &ModuleEnv, class: &IRClass) -> usize {
    env.class(&class.name).map_or(0, |info| info.depth)
}

/// Forward typedefs, instance structs and vtable types. `classes` must list
/// bases before derived classes.
pub fn emit_layout(w: &mut CWriter, classes: &[IRClass]) {
    if classes.is_empty() {
        return;
    }
    for class in classes {
        let names = ClassNames::new(&class.c_name);
        w.line(format!("typedef struct _{0} {0};", names.obj_t()));
    }
    w.blank();
    for class in classes {
        let names = ClassNames::new(&class.c_name);
        if !class.vtable.is_empty() {
            w.open(format!("typedef struct _{}", names.vtable_t()));
            for slot in &class.vtable {
                let mut params = vec!["void *self".to_string()];
                params.extend(slot.params.iter().map(CType::c_name));
                w.line(format!("{} (*{})({});", slot.ret.c_name(), slot.name, params.join(", ")));
            }
            w.close_with(&format!("}} {};", names.vtable_t()));
            w.blank();
        }
        w.open(format!("struct _{}", names.obj_t()));
        match &class.base_c {
            Some(base) => w.line(format!("{} super;", ClassNames::new(base).obj_t())),
            None => {
                w.line("mp_obj_base_t base;");
                if class.vtable_path.as_deref() == Some("vtable") {
                    w.line("const void *vtable;");
                }
            }
        }
        for field in &class.own_fields {
            w.line(format!("{} {};", field.storage().c_name(), field.name));
        }
        w.close_with("};");
        w.blank();
    }
}

fn native_signature(names: &ClassNames, f: &IRFunction) -> String {
    let mut params = vec!["void *self_ptr".to_string()];
    params.extend(f.params.iter().map(|p| format!("{} {}", p.ty.c_type().c_name(), p.c_name)));
    format!("static {} {}({})", f.body_return_ctype().c_name(), names.native(&f.name), params.join(", "))
}

fn wrapper_prologue(env: &ModuleEnv, names: &ClassNames, f: &IRFunction) -> Prologue {
    let type_obj = names.type_obj();
    boxed_prologue(env, f.shape, Some(Receiver { type_obj: &type_obj }), &f.params, None, None)
}

/// Prototypes for everything other units of code may reference before the
/// class body is emitted.
pub fn emit_declarations(w: &mut CWriter, class: &IRClass, env: &ModuleEnv) {
    let names = ClassNames::new(&class.c_name);
    for f in &class.methods {
        match method_kind(f) {
            MethodKind::Instance | MethodKind::Property => {
                w.line(format!("{};", native_signature(&names, f)));
                let prologue = wrapper_prologue(env, &names, f);
                w.line(format!("{};", entry_signature(&names.wrapper(&f.name), &prologue.params)));
                if method_kind(f) == MethodKind::Instance {
                    w.line(fun_obj_decl(f.shape, &names.fun_obj(&f.name)));
                }
            }
            MethodKind::Static => {
                let prologue = boxed_prologue(env, f.shape, None, &f.params, None, None);
                w.line(format!("{};", entry_signature(&f.symbol, &prologue.params)));
                w.line(fun_obj_decl(f.shape, &names.fun_obj(&f.name)));
            }
        }
    }
    w.line(format!(
        "static mp_obj_t {}(const mp_obj_type_t *type, size_t n_args, size_t n_kw, const mp_obj_t *args);",
        names.make_new()
    ));
    w.line(format!("extern const mp_obj_type_t {};", names.type_obj()));
    w.blank();
}

/// Method bodies, construction, attribute access and the type object.
pub fn emit_class(w: &mut CWriter, class: &IRClass, env: &ModuleEnv, options: &CompileOptions) {
    let _span = tracing::debug_span!("emit_class", class = %class.name).entered();
    let names = ClassNames::new(&class.c_name);
    for f in &class.methods {
        match method_kind(f) {
            MethodKind::Static => {
                emit_function(w, f, env, options);
                w.line(format!(
                    "static MP_DEFINE_CONST_STATICMETHOD_OBJ({}, MP_ROM_PTR(&{}));",
                    names.static_obj(&f.name),
                    names.fun_obj(&f.name)
                ));
                w.blank();
            }
            kind => {
                emit_native(w, &names, f, options);
                emit_wrapper(w, &names, f, env);
                if kind == MethodKind::Instance {
                    w.line(fun_obj_define(f.shape, &names.fun_obj(&f.name), &names.wrapper(&f.name)));
                }
                w.blank();
            }
        }
    }
    emit_vtable_instance(w, class, &names);
    emit_make_new(w, class, &names, env);
    let has_attr = emit_attr(w, class, &names);
    if let Some((native, _)) = &class.print_method {
        w.open(format!(
            "static void {}(const mp_print_t *print, mp_obj_t self_in, mp_print_kind_t kind)",
            names.print()
        ));
        w.line("(void)kind;");
        w.line(format!("mp_obj_print_helper(print, {native}(MP_OBJ_TO_PTR(self_in)), PRINT_STR);"));
        w.close();
        w.blank();
    }
    let has_locals = emit_locals_dict(w, class, &names, env);
    emit_type(w, class, &names, has_attr, has_locals);
}

fn emit_native(w: &mut CWriter, names: &ClassNames, f: &IRFunction, options: &CompileOptions) {
    source_comment(w, f, options);
    w.open(native_signature(names, f));
    w.line(format!("{0} *self = ({0} *)self_ptr;", names.obj_t()));
    w.line("(void)self;");
    let mut body = BodyEmitter::new(options, ReturnMode::Native(f.body_return_ctype()), 1);
    body.declare(f);
    body.function_body(&f.body);
    w.append(body.finish());
    w.close();
}

fn emit_wrapper(w: &mut CWriter, names: &ClassNames, f: &IRFunction, env: &ModuleEnv) {
    let prologue = wrapper_prologue(env, names, f);
    w.open(entry_signature(&names.wrapper(&f.name), &prologue.params));
    for line in &prologue.lines {
        w.line(line);
    }
    let mut args = vec!["MP_OBJ_TO_PTR(self_in)".to_string()];
    args.extend(f.params.iter().map(|p| p.c_name.clone()));
    let call = format!("{}({})", names.native(&f.name), args.join(", "));
    match f.body_return_ctype() {
        CType::Void => {
            w.line(format!("{call};"));
            w.line("return mp_const_none;");
        }
        ty => w.line(format!("return {};", ty.box_expr(&call))),
    }
    w.close();
}

fn emit_vtable_instance(w: &mut CWriter, class: &IRClass, names: &ClassNames) {
    if class.vtable.is_empty() {
        return;
    }
    w.open(format!("static const {} {} =", names.vtable_t(), names.vtable_inst()));
    for slot in &class.vtable {
        w.line(format!(".{} = {},", slot.name, slot.impl_symbol));
    }
    w.close_with("};");
    w.blank();
}

fn field_default(field: &IRField) -> Option<String> {
    let storage = field.storage();
    match (&field.default, storage) {
        (Some(d), CType::Obj) => Some(d.boxed_literal()),
        (Some(Constant::None), _) => None,
        (Some(d), _) => Some(d.native_literal()),
        (None, CType::Obj) => Some("mp_const_none".to_string()),
        (None, _) => None,
    }
}

/// Constructor arguments: the `__init__` parameters, or the fields of a
/// dataclass without one.
fn constructor_params(class: &IRClass) -> Vec<IRParam> {
    match &class.init {
        Some(init) => init.params.clone(),
        None if class.dataclass => class
            .fields
            .iter()
            .map(|f| IRParam {
                name: f.name.clone(),
                c_name: super::names::local_name(&f.name),
                ty: f.ty.clone(),
                default: f.default.clone(),
            })
            .collect(),
        None => Vec::new(),
    }
}

fn emit_make_new(w: &mut CWriter, class: &IRClass, names: &ClassNames, env: &ModuleEnv) {
    w.open(format!(
        "static mp_obj_t {}(const mp_obj_type_t *type, size_t n_args, size_t n_kw, const mp_obj_t *args)",
        names.make_new()
    ));
    let obj_t = names.obj_t();
    w.line(format!("{obj_t} *self = m_new0({obj_t}, 1);"));
    let depth = struct_depth(env, class);
    w.line(format!("self->{}base.type = type;", "super.".repeat(depth)));
    if let Some(path) = &class.vtable_path {
        if class.vtable.is_empty() {
            w.line(format!("self->{path} = NULL;"));
        } else {
            w.line(format!("self->{path} = &{};", names.vtable_inst()));
        }
    }
    for field in &class.fields {
        if let Some(value) = field_default(field) {
            w.line(format!("self->{} = {value};", field.path));
        }
    }

    let params = constructor_params(class);
    if params.is_empty() {
        w.line("mp_arg_check_num(n_args, n_kw, 0, 0, false);");
    } else {
        w.line("static const mp_arg_t _allowed[] = {");
        for p in &params {
            let flags = if p.default.is_some() { "MP_ARG_OBJ" } else { "MP_ARG_REQUIRED | MP_ARG_OBJ" };
            w.line(format!("    {{ MP_QSTR_{}, {flags}, {{.u_obj = MP_OBJ_NULL}} }},", p.name));
        }
        w.line("};");
        w.line("mp_arg_val_t _vals[MP_ARRAY_SIZE(_allowed)];");
        w.line("mp_arg_parse_all_kw_array(n_args, n_kw, args, MP_ARRAY_SIZE(_allowed), _allowed, _vals);");
        for (j, p) in params.iter().enumerate() {
            let slot = format!("_vals[{j}].u_obj");
            let unboxed = unbox_param(env, &p.ty, &slot);
            let value = match &p.default {
                Some(d) => format!("{slot} != MP_OBJ_NULL ? {unboxed} : {}", default_literal(p, d)),
                None => unboxed,
            };
            w.line(format!("{} {} = {value};", p.ty.c_type().c_name(), p.c_name));
        }
        match &class.init {
            Some(init) => {
                let mut args = vec!["self".to_string()];
                args.extend(params.iter().map(|p| p.c_name.clone()));
                w.line(format!("{}({});", init.native, args.join(", ")));
            }
            None => {
                for (field, p) in class.fields.iter().zip(&params) {
                    w.line(format!("self->{} = {};", field.path, p.c_name));
                }
            }
        }
    }
    w.line("return MP_OBJ_FROM_PTR(self);");
    w.close();
    w.blank();
}

fn field_kind(field: &IRField) -> &'static str {
    match field.storage() {
        CType::Int => "EMBER_FIELD_INT",
        CType::Float => "EMBER_FIELD_FLOAT",
        CType::Bool => "EMBER_FIELD_BOOL",
        _ => "EMBER_FIELD_OBJ",
    }
}

/// Field and property access. Returns whether a handler was emitted.
fn emit_attr(w: &mut CWriter, class: &IRClass, names: &ClassNames) -> bool {
    if class.fields.is_empty() && class.properties.is_empty() {
        return false;
    }
    if !class.fields.is_empty() {
        w.open(format!("static const ember_field_t {}[] =", names.fields()));
        for field in &class.fields {
            w.line(format!(
                "{{ MP_QSTR_{}, offsetof({}, {}), {} }},",
                field.name,
                names.obj_t(),
                field.path,
                field_kind(field)
            ));
        }
        w.close_with("};");
        w.blank();
    }

    w.open(format!("static void {}(mp_obj_t self_in, qstr attr, mp_obj_t *dest)", names.attr()));
    if !class.fields.is_empty() {
        w.line(format!(
            "const ember_field_t *field = ember_field_lookup({0}, MP_ARRAY_SIZE({0}), attr);",
            names.fields()
        ));
        w.open("if (field != NULL)");
        w.open("if (dest[0] == MP_OBJ_NULL)");
        w.line("dest[0] = ember_field_load(MP_OBJ_TO_PTR(self_in), field);");
        w.reopen("} else if (dest[1] != MP_OBJ_NULL) {");
        w.line("ember_field_store(MP_OBJ_TO_PTR(self_in), field, dest[1]);");
        w.line("dest[0] = MP_OBJ_NULL;");
        w.close();
        w.line("return;");
        w.close();
    }
    w.open("if (dest[0] == MP_OBJ_NULL)");
    for (name, wrapper) in &class.properties {
        w.open(format!("if (attr == MP_QSTR_{name})"));
        w.line(format!("dest[0] = {wrapper}(self_in);"));
        w.line("return;");
        w.close();
    }
    // Continue the lookup in the locals dict.
    w.line("dest[1] = MP_OBJ_SENTINEL;");
    w.close();
    w.close();
    w.blank();
    true
}

/// Methods callable through the instance, including inherited ones that are
/// not overridden. Returns whether a dict was emitted.
fn emit_locals_dict(w: &mut CWriter, class: &IRClass, names: &ClassNames, env: &ModuleEnv) -> bool {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for info in env.ancestry(&class.name) {
        let owner = ClassNames::new(&info.c_name);
        for m in &info.methods {
            if m.name == "__init__" || !seen.insert(m.name.clone()) {
                continue;
            }
            match m.role {
                MethodRole::Instance => entries.push((m.name.clone(), owner.fun_obj(&m.name))),
                MethodRole::Static => entries.push((m.name.clone(), owner.static_obj(&m.name))),
                MethodRole::Property => {}
            }
        }
    }
    if entries.is_empty() {
        return false;
    }
    let table = format!("{}_table", names.locals_dict());
    w.open(format!("static const mp_rom_map_elem_t {table}[] ="));
    for (name, obj) in &entries {
        w.line(format!("{{ MP_ROM_QSTR(MP_QSTR_{name}), MP_ROM_PTR(&{obj}) }},"));
    }
    w.close_with("};");
    w.line(format!("static MP_DEFINE_CONST_DICT({}, {table});", names.locals_dict()));
    w.blank();
    true
}

fn emit_type(w: &mut CWriter, class: &IRClass, names: &ClassNames, has_attr: bool, has_locals: bool) {
    let mut slots = vec![format!("make_new, {}", names.make_new())];
    if has_attr {
        slots.push(format!("attr, {}", names.attr()));
    }
    if class.print_method.is_some() {
        slots.push(format!("print, {}", names.print()));
    }
    if let Some(base) = &class.base_c {
        slots.push(format!("parent, &{}", ClassNames::new(base).type_obj()));
    }
    if has_locals {
        slots.push(format!("locals_dict, &{}", names.locals_dict()));
    }
    w.line("MP_DEFINE_CONST_OBJ_TYPE(");
    w.line(format!("    {},", names.type_obj()));
    w.line(format!("    MP_QSTR_{},", class.name));
    w.line("    MP_TYPE_FLAG_NONE,");
    let last = slots.len() - 1;
    for (i, slot) in slots.iter().enumerate() {
        let sep = if i == last { "" } else { "," };
        w.line(format!("    {slot}{sep}"));
    }
    w.line("    );");
    w.blank();
}
