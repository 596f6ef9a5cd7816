//! Static types: annotation resolution and the module-wide symbol environment.

pub mod env;
pub mod resolve;
pub mod types;

pub use env::{build_env, ArgShape, ModuleEnv};
pub use resolve::TypeResolver;
pub use types::{CType, ContainerHint, ReturnType, SourceType};
