//! Chunk promotion (temp -> final naming) and stale-chunk recovery
//!
//! Promotion never overwrites: if the final file of any host already exists the
//! chunk is left in temp naming and `FinalizeConflict` is returned.

use crate::error::{ChunkError, Result};
use crate::fragment_format;
use crate::layout::{ChunkId, ChunkLayout};
use log::{debug, info, warn};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Move the files of `hosts` for chunk `id` from the temp to the final directory
///
/// When the final directory does not exist yet and the temp directory holds only
/// these hosts' files, the whole directory is renamed in one step. Otherwise each
/// host file is moved into the existing final directory.
pub fn promote_chunk(layout: &ChunkLayout, id: ChunkId, hosts: &[&str]) -> Result<()> {
    let temp_dir = layout.chunk_dir(id, true);
    let final_dir = layout.chunk_dir(id, false);

    for host in hosts {
        let target = final_dir.join(host);
        if target.exists() {
            return Err(ChunkError::FinalizeConflict {
                id: layout.chunk_name(id),
                target,
            });
        }
    }

    if hosts.is_empty() {
        remove_if_empty(&temp_dir);
        return Ok(());
    }

    if !final_dir.exists() && contains_only(&temp_dir, hosts)? {
        fs::rename(&temp_dir, &final_dir).map_err(|e| ChunkError::io("rename", &temp_dir, e))?;
        debug!("renamed {} -> {}", temp_dir.display(), final_dir.display());
        return Ok(());
    }

    fs::create_dir_all(&final_dir).map_err(|e| ChunkError::io("create directory", &final_dir, e))?;
    for host in hosts {
        let from = temp_dir.join(host);
        let to = final_dir.join(host);
        fs::rename(&from, &to).map_err(|e| ChunkError::io("rename", &from, e))?;
        debug!("moved {} -> {}", from.display(), to.display());
    }
    remove_if_empty(&temp_dir);
    Ok(())
}

fn contains_only(dir: &Path, hosts: &[&str]) -> Result<bool> {
    let entries = fs::read_dir(dir).map_err(|e| ChunkError::io("read directory", dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ChunkError::io("read directory", dir, e))?;
        let name = entry.file_name();
        if !hosts.iter().any(|h| name.to_str() == Some(*h)) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn remove_if_empty(dir: &Path) {
    match fs::remove_dir(dir) {
        Ok(()) => debug!("removed {}", dir.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        // other hosts may still be writing into the temp directory
        Err(e) => debug!("kept {}: {}", dir.display(), e),
    }
}

/// One file inside a chunk directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFile {
    pub host: String,
    pub path: PathBuf,
    pub size: u64,
}

/// One chunk directory found under the run directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    pub id: ChunkId,
    pub temp: bool,
    pub path: PathBuf,
    pub files: Vec<HostFile>,
}

impl ChunkEntry {
    pub fn file_for(&self, host: &str) -> Option<&HostFile> {
        self.files.iter().find(|f| f.host == host)
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// List every chunk directory of the run, ordered by id (final before temp)
///
/// Entries whose name is not a chunk name are ignored. A missing run directory
/// yields an empty list.
pub fn scan_run(layout: &ChunkLayout) -> Result<Vec<ChunkEntry>> {
    let run_dir = layout.run_dir();
    let entries = match fs::read_dir(run_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ChunkError::io("read directory", run_dir, e)),
    };

    let mut chunks = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ChunkError::io("read directory", run_dir, e))?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Some((id, temp)) = layout.parse_dir_name(&name) else {
            continue;
        };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let mut files = Vec::new();
        for file in fs::read_dir(&path).map_err(|e| ChunkError::io("read directory", &path, e))? {
            let file = file.map_err(|e| ChunkError::io("read directory", &path, e))?;
            let meta = file
                .metadata()
                .map_err(|e| ChunkError::io("stat", file.path(), e))?;
            if !meta.is_file() {
                continue;
            }
            files.push(HostFile {
                host: file.file_name().to_string_lossy().into_owned(),
                path: file.path(),
                size: meta.len(),
            });
        }
        files.sort_by(|a, b| a.host.cmp(&b.host));

        chunks.push(ChunkEntry {
            id,
            temp,
            path,
            files,
        });
    }

    chunks.sort_by_key(|c| (c.id, c.temp));
    Ok(chunks)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Temp chunks of this host moved to final naming
    pub promoted: Vec<ChunkId>,
    /// Empty temp directories removed
    pub removed_empty: Vec<ChunkId>,
    /// Temp chunks whose final file already exists (left untouched)
    pub conflicts: Vec<(ChunkId, PathBuf)>,
    /// Bytes of an incomplete last block cut from a promoted file
    pub truncated: Vec<(ChunkId, u64)>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.promoted.is_empty() && self.removed_empty.is_empty() && self.conflicts.is_empty()
    }
}

/// Promote temp chunks left behind by an earlier writer of this host
///
/// Chunks for which `is_active` returns true are still being written and are
/// skipped. With `dry_run` nothing on disk changes; the report lists what would.
pub fn recover_stale_chunks(
    layout: &ChunkLayout,
    is_active: impl Fn(ChunkId) -> bool,
    dry_run: bool,
) -> Result<RecoveryReport> {
    let host = layout.hostname();
    let mut report = RecoveryReport::default();

    for entry in scan_run(layout)? {
        if !entry.temp || is_active(entry.id) {
            continue;
        }

        if entry.files.is_empty() {
            if !dry_run {
                remove_if_empty(&entry.path);
            }
            report.removed_empty.push(entry.id);
            continue;
        }

        if entry.file_for(host).is_none() {
            continue;
        }

        let target = layout.chunk_file(entry.id, false);
        if target.exists() {
            warn!(
                "stale chunk {} conflicts with {}",
                entry.path.display(),
                target.display()
            );
            report.conflicts.push((entry.id, target));
            continue;
        }

        let path = layout.chunk_file(entry.id, true);
        let torn = torn_tail(&path, dry_run)?;
        if torn > 0 {
            report.truncated.push((entry.id, torn));
        }

        if !dry_run {
            promote_chunk(layout, entry.id, &[host])?;
            info!("recovered stale chunk {}", layout.chunk_name(entry.id));
        }
        report.promoted.push(entry.id);
    }

    Ok(report)
}

/// Bytes past the last complete block of `path`; cut off unless `dry_run`
fn torn_tail(path: &Path, dry_run: bool) -> Result<u64> {
    let len = fs::metadata(path)
        .map_err(|e| ChunkError::io("stat", path, e))?
        .len();
    let complete = fragment_format::complete_length(path)?;
    let torn = len - complete;
    if torn == 0 || dry_run {
        return Ok(torn);
    }

    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| ChunkError::io("open", path, e))?;
    file.set_len(complete)
        .and_then(|_| file.sync_all())
        .map_err(|e| ChunkError::io("truncate", path, e))?;
    warn!(
        "dropped {} bytes of an incomplete block at the end of {}",
        torn,
        path.display()
    );
    Ok(torn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment_format::{FragmentCompressor, write_fragment};
    use tempfile::TempDir;

    fn layout(tmp: &TempDir) -> ChunkLayout {
        ChunkLayout::new(tmp.path(), "run001", "readerA", 6)
    }

    fn block(payload: &[u8]) -> Vec<u8> {
        let mut compressor = FragmentCompressor::new(1, payload.len()).unwrap();
        let mut file = Vec::new();
        write_fragment(&mut file, &mut compressor, payload).unwrap();
        file
    }

    fn write_temp(layout: &ChunkLayout, id: u64, host: &str) {
        let dir = layout.chunk_dir(ChunkId(id), true);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(host), block(b"payload")).unwrap();
    }

    #[test]
    fn test_promote_renames_directory() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        write_temp(&layout, 0, "readerA");

        promote_chunk(&layout, ChunkId(0), &["readerA"]).unwrap();

        assert!(!layout.chunk_dir(ChunkId(0), true).exists());
        assert_eq!(fs::read(layout.chunk_file(ChunkId(0), false)).unwrap(), block(b"payload"));
    }

    #[test]
    fn test_promote_into_existing_final_directory() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        let final_dir = layout.chunk_dir(ChunkId(1), false);
        fs::create_dir_all(&final_dir).unwrap();
        fs::write(final_dir.join("readerB"), b"other").unwrap();
        write_temp(&layout, 1, "readerA");

        promote_chunk(&layout, ChunkId(1), &["readerA"]).unwrap();

        assert!(final_dir.join("readerA").exists());
        assert!(final_dir.join("readerB").exists());
        assert!(!layout.chunk_dir(ChunkId(1), true).exists());
    }

    #[test]
    fn test_promote_keeps_other_hosts_in_temp() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        write_temp(&layout, 2, "readerA");
        write_temp(&layout, 2, "readerB");

        promote_chunk(&layout, ChunkId(2), &["readerA"]).unwrap();

        assert!(layout.chunk_file(ChunkId(2), false).exists());
        assert!(layout.host_file(ChunkId(2), "readerB", true).exists());
    }

    #[test]
    fn test_promote_conflict_never_overwrites() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        let final_dir = layout.chunk_dir(ChunkId(3), false);
        fs::create_dir_all(&final_dir).unwrap();
        fs::write(final_dir.join("readerA"), b"original").unwrap();
        write_temp(&layout, 3, "readerA");

        let err = promote_chunk(&layout, ChunkId(3), &["readerA"]).unwrap_err();
        assert!(matches!(err, ChunkError::FinalizeConflict { ref id, .. } if id == "000003"));
        assert_eq!(fs::read(final_dir.join("readerA")).unwrap(), b"original");
        assert!(layout.chunk_file(ChunkId(3), true).exists());
    }

    #[test]
    fn test_scan_run_orders_and_filters() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        write_temp(&layout, 5, "readerA");
        fs::create_dir_all(layout.chunk_dir(ChunkId(2), false)).unwrap();
        fs::write(layout.chunk_file(ChunkId(2), false), b"12345").unwrap();
        fs::create_dir_all(layout.run_dir().join("not_a_chunk")).unwrap();
        fs::write(layout.run_dir().join(".write_probe"), b"").unwrap();

        let chunks = scan_run(&layout).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].id, chunks[0].temp), (ChunkId(2), false));
        assert_eq!(chunks[0].total_size(), 5);
        assert_eq!((chunks[1].id, chunks[1].temp), (ChunkId(5), true));
        assert!(chunks[1].file_for("readerA").is_some());
    }

    #[test]
    fn test_scan_missing_run_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_run(&layout(&tmp)).unwrap().is_empty());
    }

    #[test]
    fn test_recover_stale_chunks() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        write_temp(&layout, 1, "readerA");
        write_temp(&layout, 2, "readerB");
        write_temp(&layout, 3, "readerA");
        fs::create_dir_all(layout.chunk_dir(ChunkId(4), true)).unwrap();

        let report = recover_stale_chunks(&layout, |id| id == ChunkId(3), false).unwrap();

        assert_eq!(report.promoted, vec![ChunkId(1)]);
        assert_eq!(report.removed_empty, vec![ChunkId(4)]);
        assert!(report.conflicts.is_empty());
        assert!(layout.chunk_file(ChunkId(1), false).exists());
        // another host's temp chunk and an active chunk are left alone
        assert!(layout.host_file(ChunkId(2), "readerB", true).exists());
        assert!(layout.chunk_file(ChunkId(3), true).exists());
        assert!(!layout.chunk_dir(ChunkId(4), true).exists());
    }

    #[test]
    fn test_recover_dry_run_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        write_temp(&layout, 1, "readerA");

        let report = recover_stale_chunks(&layout, |_| false, true).unwrap();
        assert_eq!(report.promoted, vec![ChunkId(1)]);
        assert!(layout.chunk_file(ChunkId(1), true).exists());
        assert!(!layout.chunk_file(ChunkId(1), false).exists());
    }

    #[test]
    fn test_recover_reports_conflicts() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        write_temp(&layout, 6, "readerA");
        fs::create_dir_all(layout.chunk_dir(ChunkId(6), false)).unwrap();
        fs::write(layout.chunk_file(ChunkId(6), false), b"final").unwrap();

        let report = recover_stale_chunks(&layout, |_| false, false).unwrap();
        assert!(report.promoted.is_empty());
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].0, ChunkId(6));
        assert_eq!(fs::read(layout.chunk_file(ChunkId(6), false)).unwrap(), b"final");
    }

    #[test]
    fn test_recover_cuts_incomplete_last_block() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        let good = block(b"complete");
        let torn = block(&[5u8; 300]);
        let mut contents = good.clone();
        contents.extend_from_slice(&torn[..torn.len() / 2]);

        let dir = layout.chunk_dir(ChunkId(8), true);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("readerA"), &contents).unwrap();

        let report = recover_stale_chunks(&layout, |_| false, true).unwrap();
        assert_eq!(report.truncated, vec![(ChunkId(8), (torn.len() / 2) as u64)]);
        assert_eq!(fs::read(dir.join("readerA")).unwrap(), contents);

        let report = recover_stale_chunks(&layout, |_| false, false).unwrap();
        assert_eq!(report.promoted, vec![ChunkId(8)]);
        assert_eq!(report.truncated, vec![(ChunkId(8), (torn.len() / 2) as u64)]);

        let summary = fragment_format::summarize_file(&layout.chunk_file(ChunkId(8), false)).unwrap();
        assert_eq!(summary.blocks, 1);
        assert_eq!(summary.compressed_bytes, good.len() as u64);
    }
}
