use super::utils::Context;
use anyhow::{Context as _, Result, bail};
use clap::Args;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};
use strax_writer::format::{format_bytes, format_bytes_per_sec, format_number, format_ratio};
use strax_writer::{ChunkWriter, CleanupRuntime, WriterOptions};

#[derive(Args)]
#[command(
    about = "Write synthetic fragments into a run",
    long_about = "Drives a chunk writer with synthetic fragments from several producer
threads, advancing through chunk ids the way an acquisition run does.
Useful to check a storage target end to end and to measure throughput.

Options can be loaded from a JSON file with --config; command-line values
override it.",
    after_help = "Examples:\n  \
            # 50 chunks, 4 producers\n  \
            strax-writer -C /scratch write test_run --host readerA --chunks 50 -p 4\n\n  \
            # Background cleanup instead of per-batch cleanup\n  \
            strax-writer -C /scratch write test_run --host readerA --background 200"
)]
pub struct WriteCommand {
    /// Run name
    pub run: String,

    /// Host identity to write as
    #[arg(long)]
    pub host: Option<String>,

    /// JSON writer options
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of chunks to produce
    #[arg(long, default_value = "20")]
    pub chunks: u64,

    /// Fragments per chunk and producer
    #[arg(long, default_value = "64")]
    pub fragments: usize,

    /// Fragment size in bytes
    #[arg(long, default_value = "4096")]
    pub fragment_size: usize,

    /// Number of producer threads
    #[arg(short = 'p', long, default_value = "2")]
    pub producers: usize,

    /// Chunk close delay
    #[arg(long)]
    pub delay: Option<u64>,

    /// Run cleanup from a background thread every N milliseconds
    #[arg(long)]
    pub background: Option<u64>,
}

pub fn run(cmd: WriteCommand, ctx: &Context) -> Result<()> {
    let mut options = match &cmd.config {
        Some(path) => WriterOptions::from_json_file(path)?,
        None => WriterOptions::default(),
    };
    options.output_path = ctx.output.clone();
    options.run_name = cmd.run.clone();
    options.chunk_name_length = ctx.name_length;
    options.full_fragment_size = cmd.fragment_size;
    if let Some(host) = &cmd.host {
        options.hostname = host.clone();
    }
    if let Some(delay) = cmd.delay {
        options.chunk_close_delay = delay;
    }
    if cmd.background.is_some() {
        options.auto_cleanup = false;
    }
    if options.hostname.is_empty() {
        bail!("No host given: use --host or set hostname in --config");
    }
    if cmd.producers == 0 {
        bail!("At least one producer is required");
    }

    let writer = Arc::new(ChunkWriter::initialize(options).context("Failed to start writer")?);
    let runtime = cmd
        .background
        .map(|ms| CleanupRuntime::spawn(Arc::clone(&writer), Duration::from_millis(ms)))
        .transpose()?;

    // producers advance through chunk ids in lockstep, like channels sharing a clock
    let barrier = Barrier::new(cmd.producers);
    let start = Instant::now();
    let failed = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..cmd.producers)
            .map(|producer| {
                let writer = Arc::clone(&writer);
                let cmd = &cmd;
                let barrier = &barrier;
                scope.spawn(move || produce(&writer, cmd, barrier, producer))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err(anyhow::anyhow!("producer panicked"))))
            .collect::<Result<Vec<usize>>>()
    })?
    .into_iter()
    .sum::<usize>();

    if let Some(runtime) = runtime {
        runtime.shutdown()?;
    }
    let report = writer.end()?;
    let elapsed = start.elapsed();
    let stats = writer.stats();

    if !ctx.quiet {
        eprintln!("Fragments:   {}", format_number(stats.fragments_written));
        eprintln!("Failed:      {}", format_number(failed));
        eprintln!("Chunks:      {} finalized", format_number(stats.chunks_finalized));
        eprintln!(
            "Size:        {} -> {} ({})",
            format_bytes(stats.raw_bytes),
            format_bytes(stats.compressed_bytes),
            format_ratio(stats.raw_bytes, stats.compressed_bytes)
        );
        eprintln!(
            "Throughput:  {}",
            format_bytes_per_sec(stats.raw_bytes as f64 / elapsed.as_secs_f64().max(1e-9))
        );
        if ctx.verbose {
            eprintln!("Finalized at end: {}", report.finalized.len());
        }
    }

    if failed > 0 {
        bail!("{} fragment(s) were not written", failed);
    }
    Ok(())
}

/// One producer: walks the chunk ids in order, one batch per chunk
fn produce(
    writer: &ChunkWriter,
    cmd: &WriteCommand,
    barrier: &Barrier,
    producer: usize,
) -> Result<usize> {
    let width = writer.layout().name_length();
    let mut failed = 0;
    let mut fatal = None;
    for chunk in 0..cmd.chunks {
        // keep meeting the barrier after a fatal error so the other producers finish
        if fatal.is_none() {
            let id = format!("{:0width$}", chunk, width = width);
            let batch: Vec<(String, Vec<u8>)> = (0..cmd.fragments)
                .map(|n| (id.clone(), synthetic_fragment(producer, chunk, n, cmd.fragment_size)))
                .collect();
            match writer.insert_fragments(batch) {
                Ok(report) => {
                    failed += report.failed_count();
                    fatal = report.cleanup_error;
                }
                Err(e) => fatal = Some(e),
            }
        }
        barrier.wait();
    }
    match fatal {
        Some(e) => Err(e.into()),
        None => Ok(failed),
    }
}

/// Digitizer-like payload: a slow baseline with a pulse, so it compresses realistically
fn synthetic_fragment(producer: usize, chunk: u64, n: usize, size: usize) -> Vec<u8> {
    let seed = (producer as u64).wrapping_mul(7919) ^ chunk.wrapping_mul(104_729) ^ n as u64;
    (0..size)
        .map(|i| {
            let baseline = 16u64 + ((i as u64 / 64) % 4);
            let pulse = if (i as u64 + seed) % 512 < 8 { 180 } else { 0 };
            (baseline + pulse) as u8
        })
        .collect()
}
