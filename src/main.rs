use std::path::PathBuf;

use bcc::{
    backend::CodegenOptions,
    driver::{self, CompileOptions, Emit},
    middle::link::DceStrategy,
};
use clap::Parser as ClapParser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(required = true)]
    source_files: Vec<PathBuf>,

    /// Output file, `.urcl` is appended when it has no extension
    #[arg(short, long)]
    output: PathBuf,

    /// Do not compile the library directory
    #[arg(long)]
    nostdlib: bool,

    /// Directory searched recursively for `*.b` library files
    #[arg(long, default_value = "lib")]
    lib_dir: PathBuf,

    /// Skip the peephole optimizer
    #[arg(long)]
    no_optimize: bool,

    /// How live globals are computed
    #[arg(long, value_enum, default_value_t)]
    dce: DceStrategy,

    #[arg(long, value_enum, default_value_t)]
    emit: Emit,

    #[arg(long, default_value_t = 16)]
    bits: u32,

    #[arg(long, default_value_t = 8192)]
    min_stack: u32,

    #[arg(long, default_value_t = 8192)]
    min_heap: u32,

    /// More logging, repeat for even more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl From<Args> for CompileOptions {
    fn from(args: Args) -> Self {
        Self {
            sources: args.source_files,
            output: args.output,
            nostdlib: args.nostdlib,
            lib_dir: args.lib_dir,
            optimize: !args.no_optimize,
            dce: args.dce,
            emit: args.emit,
            codegen: CodegenOptions {
                bits: args.bits,
                min_stack: args.min_stack,
                min_heap: args.min_heap,
            },
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    let default = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn main() {
    let args = Args::parse();

    setup_logging(args.verbose, args.quiet);

    let options = CompileOptions::from(args);

    if let Err(error) = driver::compile(&options) {
        error.report();
        std::process::exit(1);
    }
}
