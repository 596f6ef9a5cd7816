pub mod span;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod typeck;
pub mod ir;
pub mod codegen;
pub mod config;
pub mod visit;

use std::sync::OnceLock;

use config::CompileOptions;
use diagnostics::{CompileError, Diagnostics};

/// Outcome of translating one source file.
#[derive(Debug)]
pub struct CompileResult {
    /// The generated unit. `None` when a unit-scoped error aborted emission.
    pub c_source: Option<String>,
    pub diagnostics: Diagnostics,
    /// No diagnostics were reported. A unit can be emitted and still not succeed.
    pub success: bool,
}

/// Translate a source string to C (parse → environment → IR → codegen).
/// No file I/O.
pub fn compile_source(source: &str, options: &CompileOptions) -> CompileResult {
    let _span = tracing::info_span!("compile", module = %options.module_name).entered();
    let mut diags = Diagnostics::new();
    let c_source = match translate(source, options, &mut diags) {
        Ok(c) => Some(c),
        Err(err) => {
            diags.report(&err, None);
            None
        }
    };
    let success = c_source.is_some() && diags.is_empty();
    tracing::info!(success, diagnostics = diags.len(), "compile finished");
    CompileResult { c_source, diagnostics: diags, success }
}

/// The unit-scoped part of the pipeline: any error returned here aborts
/// emission. Function-scoped problems land in `diags` instead.
fn translate(source: &str, options: &CompileOptions, diags: &mut Diagnostics) -> Result<String, CompileError> {
    let program = {
        let _span = tracing::debug_span!("parse").entered();
        parser::parse_source(source)?
    };
    let env = {
        let _span = tracing::debug_span!("environment").entered();
        typeck::build_env(&program, &options.module_name, diags)?
    };
    let module = {
        let _span = tracing::debug_span!("lower").entered();
        ir::builder::build_module(&program, &env, source, diags)
    };
    codegen::generate(&module, &env, options)
}

/// Install the `fmt` subscriber filtered by `RUST_LOG`. Later calls do nothing.
pub fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        // A subscriber installed by the embedding program wins.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
