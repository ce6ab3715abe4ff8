use super::utils::{self, Context};
use anyhow::{Result, bail};
use clap::Args;
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::Instant;
use strax_writer::format::{format_bytes, format_bytes_per_sec, format_number, format_ratio};
use strax_writer::fragment_format::{self, BlockSummary};
use strax_writer::recovery;

#[derive(Args)]
#[command(
    about = "Decode every fragment block of a run",
    long_about = "Reads every host file of every finalized chunk and decompresses each
fragment block, checking the block headers against the decoded sizes.
A file that ends mid-block or holds an undecodable block is reported as
corrupt and the command exits with an error.

Temp chunks are skipped unless --include-temp is given; their last block
may legitimately be incomplete while a writer is running.",
    after_help = "Examples:\n  \
            # Verify a whole run\n  \
            strax-writer -C /data verify run001\n\n  \
            # Only one host, chunks 0-99, 8 threads\n  \
            strax-writer -C /data verify run001 --host readerA --chunks 0-99 -j 8"
)]
pub struct VerifyCommand {
    /// Run name
    pub run: String,

    /// Only verify files of this host
    #[arg(long)]
    pub host: Option<String>,

    /// Chunk ids to verify (e.g., "42", "0-100", or "1-10,20-30")
    #[arg(long)]
    pub chunks: Option<String>,

    /// Also verify chunks still in temp naming
    #[arg(long)]
    pub include_temp: bool,

    /// Number of threads to use (0 = auto-detect)
    #[arg(short = 'j', long, default_value = "0")]
    pub threads: usize,
}

struct FileResult {
    path: PathBuf,
    outcome: strax_writer::Result<BlockSummary>,
}

pub fn run(cmd: VerifyCommand, ctx: &Context) -> Result<()> {
    let layout = ctx.existing_layout(&cmd.run, "")?;
    let ranges = cmd.chunks.as_deref().map(utils::parse_chunk_range).transpose()?;

    let files: Vec<PathBuf> = recovery::scan_run(&layout)?
        .into_iter()
        .filter(|c| cmd.include_temp || !c.temp)
        .filter(|c| ranges.as_ref().is_none_or(|r| utils::in_ranges(r, c.id.0)))
        .flat_map(|c| c.files)
        .filter(|f| cmd.host.as_ref().is_none_or(|h| &f.host == h))
        .map(|f| f.path)
        .collect();

    if files.is_empty() {
        eprintln!("No chunk files to verify");
        return Ok(());
    }

    let num_threads = if cmd.threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    } else {
        cmd.threads
    };
    if ctx.verbose {
        eprintln!("[DEBUG] Using {} thread(s) for verification", num_threads);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()?;

    let start = Instant::now();
    let results: Vec<FileResult> = pool.install(|| {
        files
            .par_iter()
            .map(|path| FileResult {
                path: path.clone(),
                outcome: fragment_format::summarize_file(path),
            })
            .collect()
    });
    let elapsed = start.elapsed();

    let mut total = BlockSummary::default();
    let mut corrupt = 0usize;
    for result in &results {
        match &result.outcome {
            Ok(summary) => {
                total.blocks += summary.blocks;
                total.raw_bytes += summary.raw_bytes;
                total.compressed_bytes += summary.compressed_bytes;
                if ctx.verbose {
                    eprintln!(
                        "  ok    {} ({} blocks)",
                        utils::display_path(&result.path).display(),
                        summary.blocks
                    );
                }
            }
            Err(e) => {
                corrupt += 1;
                eprintln!("  FAIL  {}: {}", utils::display_path(&result.path).display(), e);
            }
        }
    }

    if !ctx.quiet {
        eprintln!();
        eprintln!("Files:       {}", format_number(results.len()));
        eprintln!("Blocks:      {}", format_number(total.blocks));
        eprintln!(
            "Size:        {} on disk, {} decoded ({})",
            format_bytes(total.compressed_bytes),
            format_bytes(total.raw_bytes),
            format_ratio(total.raw_bytes, total.compressed_bytes)
        );
        eprintln!(
            "Throughput:  {}",
            format_bytes_per_sec(total.raw_bytes as f64 / elapsed.as_secs_f64().max(1e-9))
        );
    }

    if corrupt > 0 {
        bail!("{} of {} file(s) failed verification", corrupt, results.len());
    }
    if !ctx.quiet {
        eprintln!("✓ All files verified");
    }
    Ok(())
}
