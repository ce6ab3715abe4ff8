//! Path resolution for chunk directories and per-host chunk files
//!
//! Layout: `output_path/run_name/<padded-id>[_temp]/<hostname>`. The temporary and
//! final locations of a chunk differ only in the `_temp` suffix on the chunk
//! directory, so either can be recovered from the id alone.

use crate::constants::TEMP_SUFFIX;
use crate::error::{ChunkError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Numeric chunk id; rendered zero-padded to the run's chunk name width
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(pub u64);

impl ChunkId {
    /// Parse a zero-padded decimal id of exactly `width` digits
    pub fn parse(id: &str, width: usize) -> Result<Self> {
        let invalid = || ChunkError::InvalidId {
            id: id.to_string(),
            width,
        };
        if id.len() != width || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        id.parse::<u64>().map(ChunkId).map_err(|_| invalid())
    }

    pub fn padded(self, width: usize) -> String {
        format!("{:0width$}", self.0, width = width)
    }

    /// Steps this chunk trails `watermark` by (0 if it is at or ahead of it)
    pub fn lag_behind(self, watermark: u64) -> u64 {
        watermark.saturating_sub(self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pure mapping from chunk ids to on-disk locations for one run and host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLayout {
    run_dir: PathBuf,
    hostname: String,
    name_length: usize,
}

impl ChunkLayout {
    pub fn new(
        output_path: impl AsRef<Path>,
        run_name: &str,
        hostname: &str,
        name_length: usize,
    ) -> Self {
        Self {
            run_dir: output_path.as_ref().join(run_name),
            hostname: hostname.to_string(),
            name_length,
        }
    }

    /// `output_path/run_name`
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn name_length(&self) -> usize {
        self.name_length
    }

    pub fn parse_id(&self, id: &str) -> Result<ChunkId> {
        ChunkId::parse(id, self.name_length)
    }

    pub fn chunk_name(&self, id: ChunkId) -> String {
        id.padded(self.name_length)
    }

    /// Directory name of a chunk: `<padded-id>` or `<padded-id>_temp`
    pub fn dir_name(&self, id: ChunkId, temp: bool) -> String {
        let name = self.chunk_name(id);
        if temp { name + TEMP_SUFFIX } else { name }
    }

    pub fn chunk_dir(&self, id: ChunkId, temp: bool) -> PathBuf {
        self.run_dir.join(self.dir_name(id, temp))
    }

    /// File of `host` inside a chunk directory
    pub fn host_file(&self, id: ChunkId, host: &str, temp: bool) -> PathBuf {
        self.chunk_dir(id, temp).join(host)
    }

    pub fn chunk_file(&self, id: ChunkId, temp: bool) -> PathBuf {
        self.host_file(id, &self.hostname, temp)
    }

    /// Directory path for a string id; fails with `InvalidId` on malformed ids
    pub fn directory_path(&self, id: &str, temp: bool) -> Result<PathBuf> {
        Ok(self.chunk_dir(self.parse_id(id)?, temp))
    }

    /// File path of this host for a string id; fails with `InvalidId` on malformed ids
    pub fn file_path(&self, id: &str, temp: bool) -> Result<PathBuf> {
        Ok(self.chunk_file(self.parse_id(id)?, temp))
    }

    /// Inverse of `dir_name`: returns the id and temp flag of a chunk directory name
    pub fn parse_dir_name(&self, name: &str) -> Option<(ChunkId, bool)> {
        let (base, temp) = match name.strip_suffix(TEMP_SUFFIX) {
            Some(base) => (base, true),
            None => (name, false),
        };
        ChunkId::parse(base, self.name_length)
            .ok()
            .map(|id| (id, temp))
    }
}
