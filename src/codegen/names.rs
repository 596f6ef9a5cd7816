use std::collections::HashMap;

use crate::diagnostics::CompileError;

/// C keywords and identifiers every generated function body may use.
const C_RESERVED: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else", "enum",
    "extern", "float", "for", "goto", "if", "inline", "int", "long", "register", "restrict", "return",
    "short", "signed", "sizeof", "static", "struct", "switch", "typedef", "union", "unsigned", "void",
    "volatile", "while", "bool", "true", "false", "NULL", "self", "self_in", "args", "n_args",
    "pos_args", "kw_args", "dest", "attr", "type", "print", "kind", "n_kw", "self_ptr", "gen",
];

/// Prefixes of the scratch names generated bodies declare.
const INTERNAL_PREFIXES: &[&str] = &["_tmp", "_iter", "_nlr", "_retv", "_call", "_items", "_kw", "_gen", "_resume", "_vals", "_allowed"];

/// C spelling of a Python local. Names that shadow C keywords or the
/// generated calling-convention parameters get a trailing underscore.
pub fn local_name(name: &str) -> String {
    if C_RESERVED.contains(&name) || INTERNAL_PREFIXES.iter().any(|p| name.starts_with(p)) {
        format!("{name}_")
    } else {
        name.to_string()
    }
}

/// Symbols for one class `{module}_{Class}`.
#[derive(Debug, Clone)]
pub struct ClassNames {
    pub c_name: String,
}

impl ClassNames {
    pub fn new(c_name: &str) -> Self {
        Self { c_name: c_name.to_string() }
    }

    pub fn obj_t(&self) -> String {
        format!("{}_obj_t", self.c_name)
    }

    pub fn vtable_t(&self) -> String {
        format!("{}_vtable_t", self.c_name)
    }

    pub fn vtable_inst(&self) -> String {
        format!("{}_vtable_inst", self.c_name)
    }

    pub fn type_obj(&self) -> String {
        format!("{}_type", self.c_name)
    }

    pub fn make_new(&self) -> String {
        format!("{}_make_new", self.c_name)
    }

    pub fn fields(&self) -> String {
        format!("{}_fields", self.c_name)
    }

    pub fn attr(&self) -> String {
        format!("{}_attr", self.c_name)
    }

    pub fn print(&self) -> String {
        format!("{}_print", self.c_name)
    }

    pub fn locals_dict(&self) -> String {
        format!("{}_locals_dict", self.c_name)
    }

    pub fn native(&self, method: &str) -> String {
        format!("{}_{}_native", self.c_name, method)
    }

    pub fn wrapper(&self, method: &str) -> String {
        format!("{}_{}_mp", self.c_name, method)
    }

    pub fn fun_obj(&self, method: &str) -> String {
        format!("{}_{}_obj", self.c_name, method)
    }

    /// Boxed entry of a static method.
    pub fn static_entry(&self, method: &str) -> String {
        format!("{}_{}", self.c_name, method)
    }

    pub fn static_obj(&self, method: &str) -> String {
        format!("{}_{}_static_obj", self.c_name, method)
    }
}

/// Per-unit table of generated top-level C symbols.
#[derive(Debug, Default)]
pub struct NameTable {
    owners: HashMap<String, String>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `symbol` as generated for `owner`; a second claim is a collision.
    pub fn claim(&mut self, symbol: &str, owner: &str) -> Result<(), CompileError> {
        if super::runtime::is_helper(symbol) || symbol.starts_with("rtuple_") {
            return Err(CompileError::name_collision(format!(
                "generated symbol '{symbol}' for {owner} is reserved by the runtime"
            )));
        }
        if let Some(previous) = self.owners.get(symbol) {
            return Err(CompileError::name_collision(format!(
                "generated symbol '{symbol}' for {owner} collides with {previous}"
            )));
        }
        self.owners.insert(symbol.to_string(), owner.to_string());
        Ok(())
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.owners.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
