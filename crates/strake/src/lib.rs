//! strake — WebAssembly to Rust function compiler.
//!
//! The pipeline: parse the module (`parser`), then compile every function
//! body independently (`func`) — decode its stack bytecode into basic
//! blocks of packed expression trees (`ast`, driven by the per-opcode
//! metadata in `meta`), optimize each block locally, and lower the result
//! to Rust source text — and assemble the generated items into one source
//! file (`codegen`). Generated code links against `strake-runtime`.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod func;
pub mod meta;
pub mod parser;

pub use anyhow::{Context, Result};
pub use error::CompileError;

/// Compilation options.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Maximum memory pages when the module declares no maximum.
    pub max_pages: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { max_pages: 256 }
    }
}

/// Compile a WebAssembly binary to Rust source code.
///
/// # Example
/// ```no_run
/// use strake::{transpile, CompileOptions};
///
/// let wasm = std::fs::read("input.wasm").unwrap();
/// let rust = transpile(&wasm, &CompileOptions::default()).unwrap();
/// std::fs::write("output.rs", rust).unwrap();
/// ```
pub fn transpile(wasm_bytes: &[u8], options: &CompileOptions) -> Result<String> {
    let module =
        parser::parse_module(wasm_bytes).context("failed to parse WebAssembly module")?;
    codegen::generate_module(&module, options).context("failed to generate Rust code")
}
