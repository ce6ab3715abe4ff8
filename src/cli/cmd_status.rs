use super::utils::{self, Context};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use strax_writer::format::{format_bytes, format_number, format_timestamp};
use strax_writer::recovery::{self, ChunkEntry};

#[derive(Args)]
#[command(
    about = "Show the chunks of a run",
    long_about = "Lists every chunk directory of a run with its state and per-host files.

Chunks still being written carry the _temp suffix and are not yet visible
to downstream tools. A temp chunk that trails the newest chunk by a wide
margin usually means a writer stopped without shutting down; use
'recover' to promote it.",
    alias = "ls",
    after_help = "Examples:\n  \
            # Summary of a run\n  \
            strax-writer -C /data status run001\n\n  \
            # Every chunk with its host files\n  \
            strax-writer -C /data status run001 --detailed\n\n  \
            # JSON output for scripting\n  \
            strax-writer -C /data status run001 --json"
)]
pub struct StatusCommand {
    /// Run name
    pub run: String,

    /// List every chunk and host file
    #[arg(short, long)]
    pub detailed: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ChunkStatus {
    id: String,
    state: &'static str,
    hosts: Vec<HostStatus>,
}

#[derive(Debug, Serialize)]
struct HostStatus {
    host: String,
    size_bytes: u64,
}

#[derive(Debug, Default, Serialize)]
struct RunStatus {
    run: String,
    final_chunks: usize,
    temp_chunks: usize,
    total_bytes: u64,
    hosts: Vec<String>,
    last_modified: Option<String>,
    chunks: Vec<ChunkStatus>,
}

pub fn run(cmd: StatusCommand, ctx: &Context) -> Result<()> {
    let layout = ctx.existing_layout(&cmd.run, "")?;
    let entries = recovery::scan_run(&layout)?;
    let status = summarize(&cmd.run, &layout, &entries);

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Run: {}", utils::display_path(layout.run_dir()).display());
    println!("  Final chunks: {}", format_number(status.final_chunks));
    println!("  Temp chunks:  {}", format_number(status.temp_chunks));
    println!("  Total size:   {}", format_bytes(status.total_bytes));
    println!("  Hosts:        {}", status.hosts.join(", "));
    if let Some(modified) = &status.last_modified {
        println!("  Last write:   {}", modified);
    }

    if cmd.detailed && !status.chunks.is_empty() {
        println!();
        for chunk in &status.chunks {
            println!("  {} [{}]", chunk.id, chunk.state);
            for host in &chunk.hosts {
                println!("      {:<20} {:>12}", host.host, format_bytes(host.size_bytes));
            }
        }
    }

    Ok(())
}

fn summarize(run: &str, layout: &strax_writer::ChunkLayout, entries: &[ChunkEntry]) -> RunStatus {
    let mut status = RunStatus {
        run: run.to_string(),
        ..RunStatus::default()
    };

    let mut latest = None;
    for entry in entries {
        if entry.temp {
            status.temp_chunks += 1;
        } else {
            status.final_chunks += 1;
        }
        status.total_bytes += entry.total_size();

        for file in &entry.files {
            if !status.hosts.contains(&file.host) {
                status.hosts.push(file.host.clone());
            }
            if let Ok(modified) = std::fs::metadata(&file.path).and_then(|m| m.modified())
                && latest.is_none_or(|l| modified > l)
            {
                latest = Some(modified);
            }
        }

        status.chunks.push(ChunkStatus {
            id: layout.chunk_name(entry.id),
            state: if entry.temp { "temp" } else { "final" },
            hosts: entry
                .files
                .iter()
                .map(|f| HostStatus {
                    host: f.host.clone(),
                    size_bytes: f.size,
                })
                .collect(),
        });
    }

    status.hosts.sort();
    status.last_modified = latest.map(format_timestamp);
    status
}
