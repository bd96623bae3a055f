//! `mclc`: compile MCL source to an assembly listing.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "mclc", version, about = "MCL compiler")]
struct Options {
    /// Input MCL source file (.mcl).
    input: PathBuf,

    /// Output assembly file; defaults to the input with an .asm extension.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the generated assembly to stdout as well.
    #[arg(long)]
    dump: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let options = Options::parse();

    if options.input.extension().map_or(true, |e| e != "mcl") {
        log::warn!("input '{}' does not have an .mcl extension", options.input.display());
    }

    let source = std::fs::read_to_string(&options.input)
        .with_context(|| format!("cannot read '{}'", options.input.display()))?;
    let base_dir = options.input.parent().unwrap_or(Path::new("."));

    let expanded = mcl_frontend::preprocess(&source, base_dir)?;
    let program = match mcl_frontend::parse_source(&expanded) {
        Ok(program) => program,
        Err(e) => bail!("{}: {e}", options.input.display()),
    };
    let listing = mcl_codegen::compile(&program)
        .with_context(|| format!("compiling '{}'", options.input.display()))?;

    if options.dump {
        print!("{listing}");
    }

    let output = options
        .output
        .unwrap_or_else(|| options.input.with_extension("asm"));
    std::fs::write(&output, &listing)
        .with_context(|| format!("cannot write '{}'", output.display()))?;
    eprintln!("{} -> {}", options.input.display(), output.display());
    Ok(())
}
