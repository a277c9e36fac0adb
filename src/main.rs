use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use structopt::StructOpt;

use compass60::{Assembler, InstructionTable, BUILTIN_MAP};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "compass60",
    about = "Two-pass COMPASS cross-assembler for the CDC 6000 series."
)]
struct CliOptions {
    /// COMPASS source file to assemble
    input: PathBuf,
    /// Listing output path (stdout when absent)
    #[structopt(short = "l", long)]
    listing: Option<PathBuf>,
    /// Binary output path
    #[structopt(short = "o", long, default_value = "binfile")]
    output: PathBuf,
    /// Enable debug tracing
    #[structopt(short = "d", long)]
    debug: bool,
}

fn main() {
    let options = CliOptions::from_args();

    let mut logger = env_logger::Builder::from_default_env();
    if options.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    match run(&options) {
        Ok(success) => process::exit(if success { 0 } else { 1 }),
        Err(e) => {
            eprintln!("compass60: {:#}", e);
            process::exit(1);
        }
    }
}

fn run(options: &CliOptions) -> anyhow::Result<bool> {
    let source = fs::read_to_string(&options.input)
        .with_context(|| format!("cannot read input file '{}'", options.input.display()))?;
    let table = InstructionTable::parse(BUILTIN_MAP)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("instruction map")?;

    let mut binary = File::create(&options.output)
        .with_context(|| format!("cannot open binary file '{}'", options.output.display()))?;

    let mut assembler = Assembler::new(table);
    let success = match &options.listing {
        Some(path) => {
            let mut listing = File::create(path)
                .with_context(|| format!("cannot open listing file '{}'", path.display()))?;
            assembler.assemble(&source, &mut listing, &mut binary)
        }
        None => {
            let stdout = io::stdout();
            let mut listing = stdout.lock();
            assembler.assemble(&source, &mut listing, &mut binary)
        }
    };

    let stderr = io::stderr();
    let mut err = stderr.lock();
    assembler.diagnostics().write_summary(&mut err)?;
    err.flush()?;

    Ok(success)
}
