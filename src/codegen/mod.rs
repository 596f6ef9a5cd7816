//! C emission for one translation unit.
//!
//! A unit is laid out so every symbol is declared before use: runtime helpers,
//! rtuple records, class structs, prototypes, function and class bodies, and
//! finally the module globals table and registration.

pub mod classes;
pub mod containers;
pub mod function;
pub mod generators;
pub mod names;
pub mod runtime;
pub mod writer;

use crate::config::CompileOptions;
use crate::diagnostics::CompileError;
use crate::ir::{IRClass, IRFunction, IRModule, MethodKind, FunctionKind};
use crate::typeck::env::ModuleEnv;
use generators::GenNames;
use names::{ClassNames, NameTable};
use writer::CWriter;

/// Render `module` as a complete MicroPython user C module.
pub fn generate(module: &IRModule, env: &ModuleEnv, options: &CompileOptions) -> Result<String, CompileError> {
    let _span = tracing::info_span!("codegen", module = %module.name).entered();
    claim_symbols(module)?;

    let mut w = CWriter::new();
    runtime::emit_prelude(&mut w, options);

    let shapes = containers::collect_rtuples(module);
    tracing::debug!(count = shapes.len(), "rtuple shapes");
    for shape in &shapes {
        containers::emit_rtuple(&mut w, shape);
    }

    classes::emit_layout(&mut w, &module.classes);
    for f in &module.functions {
        emit_prototype(&mut w, f, env);
    }
    w.blank();
    for class in &module.classes {
        classes::emit_declarations(&mut w, class, env);
    }

    for f in &module.functions {
        function::emit_function(&mut w, f, env, options);
    }
    for class in &module.classes {
        classes::emit_class(&mut w, class, env, options);
    }

    emit_module_globals(&mut w, module);
    tracing::debug!(
        functions = module.functions.len(),
        classes = module.classes.len(),
        "unit emitted"
    );
    Ok(w.finish())
}

fn emit_prototype(w: &mut CWriter, f: &IRFunction, env: &ModuleEnv) {
    let prologue =
        function::boxed_prologue(env, f.shape, None, &f.params, f.star_args.as_ref(), f.star_kwargs.as_ref());
    w.line(format!("{};", function::entry_signature(&f.symbol, &prologue.params)));
    w.line(function::fun_obj_decl(f.shape, &format!("{}_obj", f.symbol)));
}

fn function_symbols(f: &IRFunction) -> Vec<String> {
    let mut symbols = vec![f.symbol.clone(), format!("{}_obj", f.symbol)];
    if f.is_generator {
        let names = GenNames::new(&f.symbol);
        symbols.extend([names.frame_t, names.type_obj, names.iternext]);
    }
    symbols
}

fn class_symbols(class: &IRClass) -> Vec<String> {
    let names = ClassNames::new(&class.c_name);
    let mut symbols = vec![
        names.obj_t(),
        names.type_obj(),
        names.make_new(),
        names.fields(),
        names.attr(),
        names.print(),
        names.locals_dict(),
        format!("{}_table", names.locals_dict()),
    ];
    if !class.vtable.is_empty() {
        symbols.push(names.vtable_t());
        symbols.push(names.vtable_inst());
    }
    for m in &class.methods {
        match &m.kind {
            FunctionKind::Method { kind: MethodKind::Static, .. } => {
                symbols.push(names.static_entry(&m.name));
                symbols.push(names.fun_obj(&m.name));
                symbols.push(names.static_obj(&m.name));
            }
            FunctionKind::Method { kind: MethodKind::Property, .. } => {
                symbols.push(names.native(&m.name));
                symbols.push(names.wrapper(&m.name));
            }
            _ => {
                symbols.push(names.native(&m.name));
                symbols.push(names.wrapper(&m.name));
                symbols.push(names.fun_obj(&m.name));
            }
        }
    }
    symbols
}

/// Every top-level C symbol the unit defines, checked for collisions.
fn claim_symbols(module: &IRModule) -> Result<NameTable, CompileError> {
    let mut table = NameTable::new();
    let m = &module.name;
    for symbol in [format!("{m}_module_globals"), format!("{m}_module_globals_table"), format!("{m}_user_cmodule")] {
        table.claim(&symbol, &format!("module '{m}'"))?;
    }
    for f in &module.functions {
        let owner = format!("function '{}'", f.name);
        for symbol in function_symbols(f) {
            table.claim(&symbol, &owner)?;
        }
    }
    for class in &module.classes {
        let owner = format!("class '{}'", class.name);
        for symbol in class_symbols(class) {
            table.claim(&symbol, &owner)?;
        }
    }
    Ok(table)
}

fn emit_module_globals(w: &mut CWriter, module: &IRModule) {
    let m = &module.name;
    w.open(format!("static const mp_rom_map_elem_t {m}_module_globals_table[] ="));
    w.line(format!("{{ MP_ROM_QSTR(MP_QSTR___name__), MP_ROM_QSTR(MP_QSTR_{m}) }},"));
    for f in &module.functions {
        w.line(format!("{{ MP_ROM_QSTR(MP_QSTR_{}), MP_ROM_PTR(&{}_obj) }},", f.name, f.symbol));
    }
    for class in &module.classes {
        let type_obj = ClassNames::new(&class.c_name).type_obj();
        w.line(format!("{{ MP_ROM_QSTR(MP_QSTR_{}), MP_ROM_PTR(&{type_obj}) }},", class.name));
    }
    for constant in &module.constants {
        match constant.value.rom_literal() {
            Some(value) => w.line(format!("{{ MP_ROM_QSTR(MP_QSTR_{}), {value} }},", constant.name)),
            None => tracing::debug!(name = %constant.name, "constant has no ROM form, not exported"),
        }
    }
    w.close_with("};");
    w.line(format!("static MP_DEFINE_CONST_DICT({m}_module_globals, {m}_module_globals_table);"));
    w.blank();
    w.open(format!("const mp_obj_module_t {m}_user_cmodule ="));
    w.line(".base = { &mp_type_module },");
    w.line(format!(".globals = (mp_obj_dict_t *)&{m}_module_globals,"));
    w.close_with("};");
    w.blank();
    w.line(format!("MP_REGISTER_MODULE(MP_QSTR_{m}, {m}_user_cmodule);"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, IRConstant, IRParam, IRStmt, IRValue, StmtKind};
    use crate::typeck::env::ArgShape;
    use crate::typeck::types::{ReturnType, SourceType};

    fn free_function(name: &str) -> IRFunction {
        IRFunction {
            name: name.into(),
            symbol: format!("m_{name}"),
            kind: FunctionKind::Free,
            params: vec![IRParam { name: "x".into(), c_name: "x".into(), ty: SourceType::opaque(), default: None }],
            star_args: None,
            star_kwargs: None,
            ret: ReturnType::Value(SourceType::opaque()),
            body: vec![IRStmt::bare(StmtKind::Return(Some(IRValue::Local("x".into()))), 2)],
            locals: Vec::new(),
            temps: Vec::new(),
            iter_slots: 0,
            yield_count: 0,
            is_generator: false,
            shape: ArgShape::Fixed(1),
            line: 1,
            doc: None,
            failed: false,
        }
    }

    #[test]
    fn unit_registers_functions_and_constants() {
        let module = IRModule {
            name: "m".into(),
            functions: vec![free_function("ident")],
            classes: Vec::new(),
            constants: vec![
                IRConstant { name: "LIMIT".into(), value: Constant::Int(10) },
                IRConstant { name: "RATE".into(), value: Constant::Float(0.5) },
            ],
        };
        let c = generate(&module, &ModuleEnv::new("m"), &CompileOptions::for_module("m")).unwrap();
        assert!(c.contains("static mp_obj_t m_ident(mp_obj_t x_in);"));
        assert!(c.contains("{ MP_ROM_QSTR(MP_QSTR_ident), MP_ROM_PTR(&m_ident_obj) },"));
        assert!(c.contains("{ MP_ROM_QSTR(MP_QSTR_LIMIT), MP_ROM_INT(10) },"));
        assert!(!c.contains("MP_QSTR_RATE"));
        assert!(c.trim_end().ends_with("MP_REGISTER_MODULE(MP_QSTR_m, m_user_cmodule);"));
    }

    #[test]
    fn colliding_symbols_are_rejected() {
        let mut clash = free_function("ident");
        clash.name = "ident2".into();
        let module = IRModule {
            name: "m".into(),
            functions: vec![free_function("ident"), clash],
            ..IRModule::default()
        };
        let err = generate(&module, &ModuleEnv::new("m"), &CompileOptions::for_module("m")).unwrap_err();
        assert!(matches!(err, CompileError::NameCollision { .. }));
    }
}
