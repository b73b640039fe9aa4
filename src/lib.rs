//! Back end for the idk scripting language: scope resolution, a binary
//! bytecode module format, and the stack machine that runs it.
//!
//! ```text
//! ast::Node ──resolve──▶ ir::Root ──emit──▶ module bytes ──Module::read──▶ vm::run
//! ```

pub mod ast;
pub mod bytecode;
pub mod diagnostic;
pub mod emit;
pub mod host;
pub mod ir;
pub mod resolve;
pub mod value;
pub mod vm;

use std::sync::Arc;

pub use bytecode::{FormatError, Module, WriteError};
pub use emit::{EmitError, emit};
pub use resolve::{ResolveError, resolve};
pub use value::Value;
pub use vm::{Globals, VmError, VmOptions, run};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid syntax tree: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Emit(#[from] EmitError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Vm(#[from] VmError),
}

/// Reads a syntax tree from the parser's JSON form.
pub fn parse_tree(json: &str) -> Result<ast::Node, Error> {
    Ok(serde_json::from_str(json)?)
}

/// Resolves and emits a syntax tree into module bytes.
pub fn compile(tree: &ast::Node) -> Result<Vec<u8>, Error> {
    let root = resolve(tree)?;
    Ok(emit(&root)?)
}

/// Reads module bytes into a shareable module.
pub fn load(bytes: &[u8]) -> Result<Arc<Module>, Error> {
    Ok(Arc::new(Module::read(bytes)?))
}

/// Compiles and runs a syntax tree against `globals`.
pub fn eval(tree: &ast::Node, globals: &mut Globals, options: VmOptions) -> Result<Value, Error> {
    let module = load(&compile(tree)?)?;
    Ok(vm::Vm::with_options(globals, options).run(&module)?)
}
