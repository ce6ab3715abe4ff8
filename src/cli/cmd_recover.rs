use super::utils::{self, Context};
use anyhow::{Result, bail};
use clap::Args;
use strax_writer::format::format_bytes;
use strax_writer::recovery;

#[derive(Args)]
#[command(
    about = "Promote temp chunks left behind by a stopped writer",
    long_about = "Finds chunk directories of a run that are still in temp naming and hold a
file for the given host, and moves that file to the chunk's final
directory. A last block cut short by a crash is cut off first. Empty temp
directories are removed.

Only run this while no writer for the host is active on the run: an active
writer's open chunks would be promoted under it. A chunk whose final file
already exists is never overwritten; it is reported as a conflict and the
command exits with an error.",
    alias = "cleanup",
    after_help = "Examples:\n  \
            # Show what would be promoted\n  \
            strax-writer -C /data recover run001 --host readerA --dry-run\n\n  \
            # Promote stale chunks of readerA\n  \
            strax-writer -C /data recover run001 --host readerA"
)]
pub struct RecoverCommand {
    /// Run name
    pub run: String,

    /// Host whose files are promoted
    #[arg(long)]
    pub host: String,

    /// Only report what would change
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

pub fn run(cmd: RecoverCommand, ctx: &Context) -> Result<()> {
    let layout = ctx.existing_layout(&cmd.run, &cmd.host)?;
    let report = recovery::recover_stale_chunks(&layout, |_| false, cmd.dry_run)?;

    let verb = if cmd.dry_run { "Would cut" } else { "Cut" };
    for (id, bytes) in &report.truncated {
        println!(
            "{} {} of an incomplete block from chunk {}",
            verb,
            format_bytes(*bytes),
            layout.chunk_name(*id)
        );
    }
    let verb = if cmd.dry_run { "Would promote" } else { "Promoted" };
    for id in &report.promoted {
        println!(
            "{} {} -> {}",
            verb,
            utils::display_path(&layout.chunk_file(*id, true)).display(),
            utils::display_path(&layout.chunk_file(*id, false)).display()
        );
    }
    let verb = if cmd.dry_run { "Would remove" } else { "Removed" };
    for id in &report.removed_empty {
        println!(
            "{} empty {}",
            verb,
            utils::display_path(&layout.chunk_dir(*id, true)).display()
        );
    }
    for (id, target) in &report.conflicts {
        eprintln!(
            "Conflict: chunk {} already has {}",
            layout.chunk_name(*id),
            utils::display_path(target).display()
        );
    }

    if !report.conflicts.is_empty() {
        bail!("{} chunk(s) could not be promoted", report.conflicts.len());
    }
    if report.is_clean() && !ctx.quiet {
        println!("✓ No stale chunks for host {}", cmd.host);
    }
    Ok(())
}
