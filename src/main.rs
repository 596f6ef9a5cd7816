use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use ember::config::{self, CompileOptions};
use ember::diagnostics::{render_diagnostic, CompileError};

#[derive(Parser)]
#[command(name = "emberc", version, about = "Translate typed Python modules to MicroPython C modules")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a .py source file to a C user module
    Compile {
        /// Source file path
        file: PathBuf,
        /// Output C file (defaults to the source path with a .c extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Module name to register (defaults to the config, then the file stem)
        #[arg(long)]
        module: Option<String>,
        /// Path to ember.toml (defaults to searching upward from the source file)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print diagnostics as JSON on stdout instead of rendering them
        #[arg(long)]
        diagnostics_json: bool,
    },
}

fn fail(err: &CompileError) -> ! {
    eprintln!("error: {err}");
    std::process::exit(1);
}

/// Options from the file stem, then the config file, then the command line.
fn resolve_options(file: &Path, module: Option<String>, config_path: Option<PathBuf>) -> Result<CompileOptions, CompileError> {
    let stem = file.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let mut options = CompileOptions::for_module(stem);
    let start = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    if let Some(path) = config_path.or_else(|| config::find_config(start)) {
        options.apply(&config::load_config(&path)?);
    }
    if let Some(name) = module {
        options.module_name = name;
    }
    config::validate_module_name(&options.module_name, file)?;
    Ok(options)
}

fn main() {
    ember::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile { file, output, module, config, diagnostics_json } => {
            let options = resolve_options(&file, module, config).unwrap_or_else(|err| fail(&err));
            let source = std::fs::read_to_string(&file).unwrap_or_else(|e| {
                eprintln!("error: could not read {}: {e}", file.display());
                std::process::exit(1);
            });

            let result = ember::compile_source(&source, &options);

            if diagnostics_json {
                match result.diagnostics.to_json() {
                    Ok(json) => println!("{json}"),
                    Err(e) => eprintln!("error: could not serialize diagnostics: {e}"),
                }
            } else {
                let filename = file.to_string_lossy();
                for diag in result.diagnostics.iter() {
                    if render_diagnostic(&source, &filename, diag).is_err() {
                        eprintln!("{}", diag.short(&source));
                    }
                }
            }

            if let Some(c_source) = &result.c_source {
                let out = output.unwrap_or_else(|| file.with_extension("c"));
                if let Err(e) = std::fs::write(&out, c_source) {
                    eprintln!("error: could not write {}: {e}", out.display());
                    std::process::exit(1);
                }
                eprintln!("  wrote {} (module '{}')", out.display(), options.module_name);
            }

            if !result.success {
                std::process::exit(1);
            }
        }
    }
}
