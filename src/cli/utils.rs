// Shared utility functions for CLI commands

use anyhow::{Result, bail};
use std::path::{Path, PathBuf};
use strax_writer::ChunkLayout;

/// Global flags shared by every command
pub struct Context {
    pub output: PathBuf,
    pub name_length: usize,
    pub quiet: bool,
    pub verbose: bool,
}

impl Context {
    /// Layout of `run` as seen by `host`
    pub fn layout(&self, run: &str, host: &str) -> Result<ChunkLayout> {
        if run.is_empty() || run.contains(['/', '\\']) || run == "." || run == ".." {
            bail!("Invalid run name: {:?}", run);
        }
        if self.name_length == 0 || self.name_length > strax_writer::constants::MAX_CHUNK_NAME_LENGTH {
            bail!("Invalid chunk name length: {}", self.name_length);
        }
        Ok(ChunkLayout::new(&self.output, run, host, self.name_length))
    }

    /// Layout of `run` that must already exist on disk
    pub fn existing_layout(&self, run: &str, host: &str) -> Result<ChunkLayout> {
        let layout = self.layout(run, host)?;
        if !layout.run_dir().is_dir() {
            bail!("Run directory not found: {}", display_path(layout.run_dir()).display());
        }
        Ok(layout)
    }
}

/// Parse chunk range string (e.g., "1-10,15,20-25") into an inclusive id filter
pub fn parse_chunk_range(spec: &str) -> Result<Vec<(u64, u64)>> {
    let mut result = Vec::new();

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: u64 = start.trim().parse()?;
            let end: u64 = end.trim().parse()?;
            if start > end {
                bail!("Invalid range: {} > {}", start, end);
            }
            result.push((start, end));
        } else {
            let num: u64 = part.parse()?;
            result.push((num, num));
        }
    }

    if result.is_empty() {
        bail!("Empty chunk range: {:?}", spec);
    }
    Ok(result)
}

pub fn in_ranges(ranges: &[(u64, u64)], id: u64) -> bool {
    ranges.iter().any(|(start, end)| (*start..=*end).contains(&id))
}

/// Display path relative to the current directory when possible
pub fn display_path(path: &Path) -> PathBuf {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(&cwd).ok().map(Path::to_path_buf))
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| path.to_path_buf())
}
