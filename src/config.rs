use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diagnostics::CompileError;

pub const CONFIG_FILE: &str = "ember.toml";
pub const DEFAULT_MODULE_NAME: &str = "mymodule";

/// Options for one translation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Name the module registers under (`import <name>`); also the C symbol prefix.
    pub module_name: String,
    /// Emit floor-division / modulo helpers that raise ZeroDivisionError.
    pub checked_division: bool,
    /// Annotate each emitted function with its source line.
    pub emit_source_comments: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            module_name: DEFAULT_MODULE_NAME.to_string(),
            checked_division: true,
            emit_source_comments: false,
        }
    }
}

impl CompileOptions {
    pub fn for_module(name: impl Into<String>) -> Self {
        Self { module_name: name.into(), ..Self::default() }
    }

    /// Overlay values from a parsed config file. Absent keys keep their current value.
    pub fn apply(&mut self, config: &EmberConfig) {
        if let Some(module) = &config.module {
            if let Some(name) = &module.name {
                self.module_name = name.clone();
            }
        }
        if let Some(codegen) = &config.codegen {
            if let Some(v) = codegen.checked_division {
                self.checked_division = v;
            }
            if let Some(v) = codegen.emit_source_comments {
                self.emit_source_comments = v;
            }
        }
    }
}

// ---- TOML deserialization types ----

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmberConfig {
    pub module: Option<ModuleSection>,
    pub codegen: Option<CodegenSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleSection {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodegenSection {
    pub checked_division: Option<bool>,
    pub emit_source_comments: Option<bool>,
}

// ---- Discovery ----

/// Walk from start_dir up to a `.git` boundary or the filesystem root, looking for ember.toml.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut dir = start_dir.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if dir.join(".git").exists() {
            return None;
        }
        if !dir.pop() {
            return None;
        }
    }
}

// ---- Parsing & validation ----

pub fn parse_config(content: &str, path: &Path) -> Result<EmberConfig, CompileError> {
    let config: EmberConfig = toml::from_str(content).map_err(|e| {
        CompileError::config(format!("{CONFIG_FILE}: invalid syntax: {e}"), path.to_path_buf())
    })?;

    if let Some(name) = config.module.as_ref().and_then(|m| m.name.as_deref()) {
        validate_module_name(name, path)?;
    }
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<EmberConfig, CompileError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CompileError::config(format!("{CONFIG_FILE}: could not read file: {e}"), path.to_path_buf())
    })?;
    let config = parse_config(&content, path)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Module names become C identifiers and `import` targets.
pub fn validate_module_name(name: &str, path: &Path) -> Result<(), CompileError> {
    if name.trim().is_empty() {
        return Err(CompileError::config(
            format!("{CONFIG_FILE}: module name must not be empty"),
            path.to_path_buf(),
        ));
    }
    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CompileError::config(
            format!("{CONFIG_FILE}: invalid module name '{name}': expected an identifier"),
            path.to_path_buf(),
        ));
    }
    Ok(())
}
