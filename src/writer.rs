//! Chunk writer: routes fragments to per-chunk host files and finalizes chunks
//! once they trail the watermark by more than the close delay.
use crate::constants::FINALIZE_RETRY_BACKOFF_MS;
use crate::error::{ChunkError, Result};
use crate::format::{format_bytes, format_std_duration_ms};
use crate::fragment_format::FragmentCompressor;
use crate::handles::{ChunkPhase, HandleTable, SharedSlot, lock_slot};
use crate::layout::{ChunkId, ChunkLayout};
use crate::options::WriterOptions;
use crate::recovery::{self, ChunkEntry, RecoveryReport};
use log::{debug, error, info, warn};
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub fragments_written: u64,
    pub fragments_failed: u64,
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    pub chunks_finalized: u64,
    pub cleanup_runs: u64,
}

/// A fragment that could not be written
#[derive(Debug)]
pub struct FailedFragment {
    pub id: String,
    pub error: ChunkError,
}

/// Outcome of one `insert_fragments` call
#[derive(Debug, Default)]
pub struct InsertReport {
    pub accepted: usize,
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    pub failed: Vec<FailedFragment>,
    /// Fatal error from the cleanup that followed the batch; the fragments above
    /// were written regardless
    pub cleanup_error: Option<ChunkError>,
}

impl InsertReport {
    /// True when every fragment of the batch was written
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Outcome of one `clean_up` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub finalized: Vec<ChunkId>,
    pub still_open: usize,
}

/// On-disk sink for one run and host
///
/// Shared between producer threads through `Arc`; every operation is synchronous.
pub struct ChunkWriter {
    options: WriterOptions,
    layout: ChunkLayout,
    table: HandleTable,
    watermark: AtomicU64,
    stats: RwLock<WriterStats>,
    // inserts hold it shared for a whole batch, `end` exclusively
    gate: RwLock<()>,
    ended: AtomicBool,
    drained: AtomicBool,
}

impl ChunkWriter {
    /// Validate options, create the run directory, check it is writable and
    /// recover temp chunks left by an earlier writer of this host
    pub fn initialize(options: WriterOptions) -> Result<Self> {
        options.validate()?;

        let layout = ChunkLayout::new(
            &options.output_path,
            &options.run_name,
            &options.hostname,
            options.chunk_name_length,
        );
        let run_dir = layout.run_dir().to_path_buf();

        fs::create_dir_all(&run_dir).map_err(|source| ChunkError::RootNotWritable {
            path: run_dir.clone(),
            source,
        })?;

        let probe = run_dir.join(crate::constants::WRITE_PROBE_FILE);
        fs::write(&probe, b"")
            .and_then(|_| fs::remove_file(&probe))
            .map_err(|source| ChunkError::RootNotWritable {
                path: run_dir.clone(),
                source,
            })?;

        let writer = Self {
            options,
            layout,
            table: HandleTable::new(),
            watermark: AtomicU64::new(0),
            stats: RwLock::new(WriterStats::default()),
            gate: RwLock::new(()),
            ended: AtomicBool::new(false),
            drained: AtomicBool::new(false),
        };

        let recovered = writer.recover_stale_chunks()?;
        info!(
            "{} initialized: {} (host {}, close delay {}, {} stale chunk(s) recovered)",
            crate::constants::created_by(),
            run_dir.display(),
            writer.options.hostname,
            writer.options.chunk_close_delay,
            recovered.promoted.len()
        );

        Ok(writer)
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    /// Highest chunk id observed so far
    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> WriterStats {
        self.stats.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn open_chunks(&self) -> Vec<ChunkId> {
        self.table.open_chunks()
    }

    pub fn open_handle_count(&self) -> usize {
        self.table.open_handle_count()
    }

    /// True once `end` has been called; no fragments are accepted after that
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// True once `end` has finalized every chunk
    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    /// Write a batch of (chunk id -> fragment) pairs for this writer's host
    pub fn insert_fragments<I, K, V>(&self, fragments: I) -> Result<InsertReport>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let host = self.options.hostname.clone();
        self.insert_fragments_as(&host, fragments)
    }

    /// Write a batch on behalf of `host`
    ///
    /// Malformed ids and per-fragment I/O failures are reported in the returned
    /// `InsertReport` and do not stop the batch. So is a fatal error from the
    /// automatic cleanup that follows it. Within the batch fragments are
    /// written in ascending chunk id order; fragments for the same id keep their
    /// relative order.
    pub fn insert_fragments_as<I, K, V>(&self, host: &str, fragments: I) -> Result<InsertReport>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if self.is_ended() {
            return Err(ChunkError::WriterClosed);
        }
        if host.is_empty() || host.contains(['/', '\\']) || host == "." || host == ".." {
            return Err(ChunkError::InvalidOptions(format!(
                "host {:?} is not a valid file name",
                host
            )));
        }

        let mut report = InsertReport::default();
        let mut batch = Vec::new();
        for (key, payload) in fragments {
            let key = key.as_ref();
            match self.layout.parse_id(key) {
                Ok(id) => batch.push((id, payload)),
                Err(e) => {
                    warn!("skipping fragment: {}", e);
                    report.failed.push(FailedFragment {
                        id: key.to_string(),
                        error: e,
                    });
                }
            }
        }
        batch.sort_by_key(|(id, _)| *id);

        if let Some((max_id, _)) = batch.last() {
            self.watermark.fetch_max(max_id.0, Ordering::AcqRel);
        }

        let mut compressor = FragmentCompressor::new(
            self.options.compression_level,
            self.options.full_fragment_size,
        )
        .map_err(|e| ChunkError::io("create compressor", self.layout.run_dir(), e))?;

        for (id, payload) in batch {
            let raw = payload.as_ref();
            match self.write_fragment(&mut compressor, id, host, raw) {
                Ok(written) => {
                    report.accepted += 1;
                    report.raw_bytes += raw.len() as u64;
                    report.compressed_bytes += written as u64;
                }
                Err(e) => {
                    warn!("failed to write fragment for chunk {}: {}", self.layout.chunk_name(id), e);
                    report.failed.push(FailedFragment {
                        id: self.layout.chunk_name(id),
                        error: e,
                    });
                }
            }
        }

        {
            let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
            stats.fragments_written += report.accepted as u64;
            stats.fragments_failed += report.failed.len() as u64;
            stats.raw_bytes += report.raw_bytes;
            stats.compressed_bytes += report.compressed_bytes;
        }

        if self.options.auto_cleanup {
            match self.clean_up(self.watermark(), false) {
                Ok(_) => {}
                Err(e) if e.is_fatal() => report.cleanup_error = Some(e),
                Err(e) => warn!("cleanup after insert failed: {}", e),
            }
        }

        Ok(report)
    }

    fn write_fragment(
        &self,
        compressor: &mut FragmentCompressor,
        id: ChunkId,
        host: &str,
        raw: &[u8],
    ) -> Result<usize> {
        if raw.len() > self.options.full_fragment_size {
            debug!(
                "fragment for chunk {} is {} (nominal {})",
                self.layout.chunk_name(id),
                format_bytes(raw.len() as u64),
                format_bytes(self.options.full_fragment_size as u64)
            );
        }

        let compressed = compressor
            .compress(raw)
            .map_err(|e| ChunkError::io("compress", self.layout.host_file(id, host, true), e))?;

        self.table
            .with_stream(&self.layout, id, host, |stream| stream.append_block(compressed, raw.len()))
    }

    /// Finalize every open chunk with `back_from_id - id > chunk_close_delay`,
    /// or every open chunk when `force_all` is set
    ///
    /// All candidates are attempted; the first error is returned afterwards.
    pub fn clean_up(&self, back_from_id: u64, force_all: bool) -> Result<CleanupReport> {
        let delay = self.options.chunk_close_delay;
        let candidates = self
            .table
            .select(|id| force_all || id.lag_behind(back_from_id) > delay);

        let mut report = CleanupReport::default();
        let mut first_err = None;
        for (id, slot) in candidates {
            match self.finalize_chunk(id, &slot) {
                Ok(true) => report.finalized.push(id),
                Ok(false) => {}
                Err(e) => {
                    error!("failed to finalize chunk {}: {}", self.layout.chunk_name(id), e);
                    first_err.get_or_insert(e);
                }
            }
        }
        report.still_open = self.table.open_chunks().len();

        {
            let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
            stats.cleanup_runs += 1;
            stats.chunks_finalized += report.finalized.len() as u64;
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Close and promote one chunk; `Ok(false)` if another caller already did
    fn finalize_chunk(&self, id: ChunkId, slot: &SharedSlot) -> Result<bool> {
        let mut chunk = lock_slot(slot);
        if chunk.phase() == ChunkPhase::Finalized {
            return Ok(false);
        }

        chunk.close_streams()?;
        let hosts: Vec<&str> = chunk.hosts().collect();
        recovery::promote_chunk(&self.layout, id, &hosts)?;
        chunk.mark_finalized();
        drop(chunk);

        self.table.release(id);
        debug!("finalized chunk {}", self.layout.chunk_name(id));
        Ok(true)
    }

    /// Force-finalize every open chunk and close the writer
    ///
    /// Waits for inserts in flight, then refuses new ones. Transient I/O failures
    /// are retried `finalize_retries` times; conflicts and exhausted retries are
    /// returned, and `end` may be called again once the cause is cleared. After a
    /// successful `end` further calls are no-ops.
    pub fn end(&self) -> Result<CleanupReport> {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.ended.store(true, Ordering::Release);
        if self.is_drained() {
            return Ok(CleanupReport::default());
        }

        let start = Instant::now();
        let attempts = self.options.finalize_retries.max(1);
        let mut total = CleanupReport::default();
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.clean_up(u64::MAX, true) {
                Ok(report) => {
                    total.finalized.extend(report.finalized);
                    last_err = None;
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!("shutdown stopped by unsafe state: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("shutdown finalize attempt {}/{} failed: {}", attempt, attempts, e);
                    last_err = Some(e);
                    std::thread::sleep(Duration::from_millis(FINALIZE_RETRY_BACKOFF_MS));
                }
            }
        }
        total.still_open = self.table.open_chunks().len();

        if let Some(e) = last_err {
            error!(
                "writer ended with {} chunk(s) still open: {}",
                total.still_open, e
            );
            return Err(e);
        }
        self.drained.store(true, Ordering::Release);

        let stats = self.stats();
        info!(
            "writer ended: {} fragments, {} -> {}, {} chunks finalized in {}",
            stats.fragments_written,
            format_bytes(stats.raw_bytes),
            format_bytes(stats.compressed_bytes),
            stats.chunks_finalized,
            format_std_duration_ms(start.elapsed())
        );
        Ok(total)
    }

    /// Promote temp chunks of this host that no open handle refers to
    ///
    /// Conflicting chunks are left in place and reported as `FinalizeConflict`.
    pub fn recover_stale_chunks(&self) -> Result<RecoveryReport> {
        let report = recovery::recover_stale_chunks(&self.layout, |id| self.table.contains(id), false)?;

        for id in &report.promoted {
            self.table.mark_finalized(*id);
            self.watermark.fetch_max(id.0, Ordering::AcqRel);
        }

        if let Some((id, target)) = report.conflicts.first() {
            return Err(ChunkError::FinalizeConflict {
                id: self.layout.chunk_name(*id),
                target: target.clone(),
            });
        }
        Ok(report)
    }

    /// Chunk directories currently on disk for this run
    pub fn scan(&self) -> Result<Vec<ChunkEntry>> {
        recovery::scan_run(&self.layout)
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        if self.is_drained() {
            return;
        }
        if let Err(e) = self.end() {
            error!("writer dropped without a clean shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment_format::BlockReader;
    use crate::options::WriterOptionsBuilder;
    use std::collections::HashMap;
    use std::fs::File;
    use tempfile::TempDir;

    fn options(tmp: &TempDir, delay: u64) -> WriterOptions {
        WriterOptionsBuilder::new()
            .output_path(tmp.path())
            .run_name("run001")
            .hostname("readerA")
            .full_fragment_size(4096)
            .chunk_close_delay(delay)
            .auto_cleanup(false)
            .build()
    }

    fn decode(path: &std::path::Path) -> Vec<Vec<u8>> {
        BlockReader::new(File::open(path).unwrap())
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_insert_writes_temp_chunk() {
        let tmp = TempDir::new().unwrap();
        let writer = ChunkWriter::initialize(options(&tmp, 2)).unwrap();

        let report = writer
            .insert_fragments(HashMap::from([("000000".to_string(), vec![0xDE, 0xAD])]))
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.accepted, 1);
        assert_eq!(report.raw_bytes, 2);

        let temp = tmp.path().join("run001/000000_temp/readerA");
        assert!(temp.exists());
        assert!(!tmp.path().join("run001/000000/readerA").exists());
        assert_eq!(writer.open_handle_count(), 1);

        writer.clean_up(3, false).unwrap();
        assert!(!tmp.path().join("run001/000000_temp").exists());
        let fin = tmp.path().join("run001/000000/readerA");
        assert_eq!(decode(&fin), vec![vec![0xDE, 0xAD]]);
        assert_eq!(writer.open_handle_count(), 0);
    }

    #[test]
    fn test_clean_up_respects_delay() {
        let tmp = TempDir::new().unwrap();
        let writer = ChunkWriter::initialize(options(&tmp, 3)).unwrap();
        writer
            .insert_fragments([("000004", b"a".as_slice()), ("000005", b"b".as_slice())])
            .unwrap();

        // 8 - 5 == 3 is not beyond the delay; 8 - 4 == 4 is
        let report = writer.clean_up(8, false).unwrap();
        assert_eq!(report.finalized, vec![ChunkId(4)]);
        assert_eq!(report.still_open, 1);
        assert_eq!(writer.open_chunks(), vec![ChunkId(5)]);
    }

    #[test]
    fn test_finalized_chunk_rejects_inserts() {
        let tmp = TempDir::new().unwrap();
        let writer = ChunkWriter::initialize(options(&tmp, 3)).unwrap();
        writer.insert_fragments([("000005", vec![1u8; 16])]).unwrap();
        writer.insert_fragments([("000010", vec![2u8; 16])]).unwrap();

        let report = writer.clean_up(10, false).unwrap();
        assert_eq!(report.finalized, vec![ChunkId(5)]);

        let report = writer.insert_fragments([("000005", vec![3u8; 16])]).unwrap();
        assert!(!report.is_complete());
        assert!(matches!(
            report.failed[0].error,
            ChunkError::ChunkAlreadyClosed { ref id } if id == "000005"
        ));
        let fin = writer.layout().chunk_file(ChunkId(5), false);
        assert_eq!(decode(&fin), vec![vec![1u8; 16]]);
    }

    #[test]
    fn test_invalid_ids_do_not_abort_batch() {
        let tmp = TempDir::new().unwrap();
        let writer = ChunkWriter::initialize(options(&tmp, 2)).unwrap();

        let report = writer
            .insert_fragments([("12", b"x".as_slice()), ("000001", b"y".as_slice()), ("00000z", b"z".as_slice())])
            .unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.failed_count(), 2);
        assert!(report.failed.iter().all(|f| matches!(f.error, ChunkError::InvalidId { .. })));
        assert_eq!(writer.watermark(), 1);
        assert_eq!(writer.stats().fragments_failed, 2);
    }

    #[test]
    fn test_same_chunk_keeps_insertion_order() {
        let tmp = TempDir::new().unwrap();
        let writer = ChunkWriter::initialize(options(&tmp, 2)).unwrap();
        writer
            .insert_fragments([("000002", b"first".as_slice()), ("000001", b"other".as_slice()), ("000002", b"second".as_slice())])
            .unwrap();
        writer.insert_fragments([("000002", b"third".as_slice())]).unwrap();
        writer.end().unwrap();

        let fin = writer.layout().chunk_file(ChunkId(2), false);
        assert_eq!(
            decode(&fin),
            vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
        );
    }

    #[test]
    fn test_auto_cleanup_after_insert() {
        let tmp = TempDir::new().unwrap();
        let mut opts = options(&tmp, 1);
        opts.auto_cleanup = true;
        let writer = ChunkWriter::initialize(opts).unwrap();

        writer.insert_fragments([("000000", b"a".as_slice())]).unwrap();
        writer.insert_fragments([("000001", b"b".as_slice())]).unwrap();
        assert_eq!(writer.open_chunks(), vec![ChunkId(0), ChunkId(1)]);

        writer.insert_fragments([("000002", b"c".as_slice())]).unwrap();
        assert_eq!(writer.open_chunks(), vec![ChunkId(1), ChunkId(2)]);
        assert!(writer.layout().chunk_file(ChunkId(0), false).exists());
    }

    #[test]
    fn test_end_finalizes_everything() {
        let tmp = TempDir::new().unwrap();
        let writer = ChunkWriter::initialize(options(&tmp, 100)).unwrap();
        for n in 0..5 {
            writer.insert_fragments([(format!("{:06}", n), vec![n as u8; 64])]).unwrap();
        }

        let report = writer.end().unwrap();
        assert_eq!(report.finalized.len(), 5);
        assert_eq!(report.still_open, 0);
        assert_eq!(writer.open_handle_count(), 0);
        assert!(writer.scan().unwrap().iter().all(|c| !c.temp));

        // second call is a no-op, later inserts are refused
        assert_eq!(writer.end().unwrap(), CleanupReport::default());
        assert!(matches!(
            writer.insert_fragments([("000009", b"x".as_slice())]),
            Err(ChunkError::WriterClosed)
        ));
    }

    #[test]
    fn test_end_reports_conflict() {
        let tmp = TempDir::new().unwrap();
        let writer = ChunkWriter::initialize(options(&tmp, 100)).unwrap();
        writer.insert_fragments([("000001", b"new".as_slice())]).unwrap();

        // another process finalized the same chunk for this host in the meantime
        let fin = writer.layout().chunk_file(ChunkId(1), false);
        fs::create_dir_all(fin.parent().unwrap()).unwrap();
        fs::write(&fin, b"existing").unwrap();

        let err = writer.end().unwrap_err();
        assert!(matches!(err, ChunkError::FinalizeConflict { .. }));
        assert_eq!(fs::read(&fin).unwrap(), b"existing");
        assert!(writer.layout().chunk_file(ChunkId(1), true).exists());
        assert_eq!(writer.open_handle_count(), 0);
    }

    #[test]
    fn test_end_can_be_retried_after_conflict() {
        let tmp = TempDir::new().unwrap();
        let writer = ChunkWriter::initialize(options(&tmp, 100)).unwrap();
        writer.insert_fragments([("000001", b"new".as_slice())]).unwrap();

        let fin = writer.layout().chunk_file(ChunkId(1), false);
        fs::create_dir_all(fin.parent().unwrap()).unwrap();
        fs::write(&fin, b"existing").unwrap();

        assert!(matches!(writer.end(), Err(ChunkError::FinalizeConflict { .. })));
        assert!(writer.is_ended());
        assert!(!writer.is_drained());
        assert!(matches!(
            writer.insert_fragments([("000002", b"x".as_slice())]),
            Err(ChunkError::WriterClosed)
        ));

        // once the operator moves the stray file away the chunk goes through
        fs::remove_file(&fin).unwrap();
        let report = writer.end().unwrap();
        assert_eq!(report.finalized, vec![ChunkId(1)]);
        assert!(writer.is_drained());
        assert!(!writer.layout().chunk_dir(ChunkId(1), true).exists());
        assert_eq!(decode(&fin), vec![b"new".to_vec()]);
        assert_eq!(writer.end().unwrap(), CleanupReport::default());
    }

    #[test]
    fn test_cleanup_conflict_keeps_insert_report() {
        let tmp = TempDir::new().unwrap();
        let mut opts = options(&tmp, 2);
        opts.auto_cleanup = true;
        let writer = ChunkWriter::initialize(opts).unwrap();
        writer.insert_fragments([("000000", b"a".as_slice())]).unwrap();

        let fin = writer.layout().chunk_file(ChunkId(0), false);
        fs::create_dir_all(fin.parent().unwrap()).unwrap();
        fs::write(&fin, b"planted").unwrap();

        let report = writer.insert_fragments([("000005", b"b".as_slice())]).unwrap();
        assert_eq!(report.accepted, 1);
        assert!(report.is_complete());
        assert!(matches!(
            report.cleanup_error,
            Some(ChunkError::FinalizeConflict { ref id, .. }) if id == "000000"
        ));
        assert!(writer.layout().chunk_file(ChunkId(5), true).exists());

        // the stuck chunk is retried and reported on every batch until it clears
        let report = writer.insert_fragments([("000005", b"c".as_slice())]).unwrap();
        assert_eq!(report.accepted, 1);
        assert!(report.cleanup_error.is_some());

        fs::remove_file(&fin).unwrap();
        let report = writer.insert_fragments([("000006", b"d".as_slice())]).unwrap();
        assert!(report.cleanup_error.is_none());
        assert_eq!(decode(&fin), vec![b"a".to_vec()]);
        writer.end().unwrap();
        assert_eq!(
            decode(&writer.layout().chunk_file(ChunkId(5), false)),
            vec![b"b".to_vec(), b"c".to_vec()]
        );
    }

    #[test]
    fn test_multiple_hosts_share_chunk_lock() {
        let tmp = TempDir::new().unwrap();
        let writer = ChunkWriter::initialize(options(&tmp, 1)).unwrap();
        writer.insert_fragments_as("readerA", [("000000", b"a".as_slice())]).unwrap();
        writer.insert_fragments_as("readerB", [("000000", b"b".as_slice())]).unwrap();
        assert_eq!(writer.open_handle_count(), 2);

        writer.clean_up(2, false).unwrap();
        let dir = writer.layout().chunk_dir(ChunkId(0), false);
        assert_eq!(decode(&dir.join("readerA")), vec![b"a".to_vec()]);
        assert_eq!(decode(&dir.join("readerB")), vec![b"b".to_vec()]);

        assert!(matches!(
            writer.insert_fragments_as("../x", [("000003", b"c".as_slice())]),
            Err(ChunkError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_initialize_recovers_stale_chunks() {
        let tmp = TempDir::new().unwrap();
        {
            let writer = ChunkWriter::initialize(options(&tmp, 100)).unwrap();
            writer.insert_fragments([("000007", b"left".as_slice())]).unwrap();
            // simulate a crash: flush the file but never finalize
            let slot = writer.table.acquire(writer.layout(), ChunkId(7)).unwrap();
            lock_slot(&slot).close_streams().unwrap();
            std::mem::forget(writer);
        }
        assert!(tmp.path().join("run001/000007_temp/readerA").exists());

        let writer = ChunkWriter::initialize(options(&tmp, 100)).unwrap();
        assert!(tmp.path().join("run001/000007/readerA").exists());
        assert_eq!(writer.watermark(), 7);

        let report = writer.insert_fragments([("000007", b"late".as_slice())]).unwrap();
        assert!(matches!(report.failed[0].error, ChunkError::ChunkAlreadyClosed { .. }));
    }

    #[test]
    fn test_initialize_rejects_invalid_options() {
        let tmp = TempDir::new().unwrap();
        let mut opts = options(&tmp, 2);
        opts.hostname.clear();
        assert!(matches!(
            ChunkWriter::initialize(opts),
            Err(ChunkError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_initialize_fails_when_root_is_a_file() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        fs::write(&blocker, b"").unwrap();

        let opts = WriterOptions::new(&blocker, "run001", 4096, "readerA");
        assert!(matches!(
            ChunkWriter::initialize(opts),
            Err(ChunkError::RootNotWritable { .. })
        ));
    }

    #[test]
    fn test_drop_finalizes_open_chunks() {
        let tmp = TempDir::new().unwrap();
        {
            let writer = ChunkWriter::initialize(options(&tmp, 100)).unwrap();
            writer.insert_fragments([("000003", b"x".as_slice())]).unwrap();
        }
        assert!(tmp.path().join("run001/000003/readerA").exists());
        assert!(!tmp.path().join("run001/000003_temp").exists());
    }
}
