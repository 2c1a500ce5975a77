use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use strake::{transpile, CompileOptions};

/// strake — WebAssembly to Rust function compiler.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input WebAssembly binary (.wasm)
    input: PathBuf,

    /// Output Rust source file (stdout if omitted)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Maximum memory pages when the module declares no maximum
    #[arg(long, default_value = "256")]
    max_pages: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let wasm_bytes =
        fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;

    let options = CompileOptions {
        max_pages: cli.max_pages,
    };
    let rust_code = transpile(&wasm_bytes, &options).context("compilation failed")?;

    match cli.output {
        Some(path) => {
            fs::write(&path, &rust_code)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("strake: wrote {}", path.display());
        }
        None => print!("{rust_code}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["strake", "input.wasm"]);
        assert_eq!(cli.max_pages, 256);
        assert!(cli.output.is_none());
    }
}
