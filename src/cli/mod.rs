use anyhow::Result;
use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

// CLI Commands (cmd_ prefix)
mod cmd_recover;
mod cmd_status;
mod cmd_verify;
mod cmd_write;

// Helper modules (no cmd_ prefix)
mod logger;
mod utils;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(bin_name = "strax-writer")]
#[command(version = VERSION)]
#[command(about = concat!("strax-writer v", env!("CARGO_PKG_VERSION"), " - chunked fragment sink maintenance"))]
#[command(long_about = concat!(
    "strax-writer v", env!("CARGO_PKG_VERSION"), " - chunked fragment sink maintenance\n\n",
    "Inspects, verifies and repairs run directories written by the chunk\n",
    "writer: output/<run>/<chunk>[_temp]/<host>, one zstd block-framed file\n",
    "per host per chunk."
))]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output root containing run directories
    #[arg(short = 'C', long = "output", global = true, default_value = ".", value_hint = ValueHint::DirPath)]
    output: PathBuf,

    /// Width of zero-padded chunk ids
    #[arg(long, global = true, default_value_t = strax_writer::constants::DEFAULT_CHUNK_NAME_LENGTH)]
    name_length: usize,

    /// Suppress progress output
    #[arg(long, global = true)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Status(cmd_status::StatusCommand),
    Verify(cmd_verify::VerifyCommand),
    Recover(cmd_recover::RecoverCommand),
    Write(cmd_write::WriteCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logger::init_logger(cli.verbose, cli.quiet);

    let ctx = utils::Context {
        output: cli.output,
        name_length: cli.name_length,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Status(cmd) => cmd_status::run(cmd, &ctx)?,
        Commands::Verify(cmd) => cmd_verify::run(cmd, &ctx)?,
        Commands::Recover(cmd) => cmd_recover::run(cmd, &ctx)?,
        Commands::Write(cmd) => cmd_write::run(cmd, &ctx)?,
    }

    Ok(())
}
