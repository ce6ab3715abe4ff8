//! Handle table: one lock per chunk id guarding every host stream of that chunk
//!
//! A chunk moves `Open -> Closing -> Finalized`. Streams are only opened while the
//! chunk is `Open`; once it is `Closing` its files are flushed and closed, and the
//! finalizer owns the rename. The table lock is never held while waiting on a
//! chunk lock.

use crate::constants::WRITE_BUFFER_SIZE;
use crate::error::{ChunkError, Result};
use crate::fragment_format;
use crate::layout::{ChunkId, ChunkLayout};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPhase {
    Open,
    Closing,
    Finalized,
}

/// Buffered append stream for one (chunk, host) file
///
/// The file only ever grows by whole blocks: a block whose write fails is cut
/// off again before the next one is appended.
pub struct HostStream {
    path: PathBuf,
    writer: BufWriter<File>,
    // file length when the stream was opened
    base: u64,
    blocks: u64,
    bytes: u64,
    broken: bool,
}

impl HostStream {
    fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ChunkError::io("open", &path, e))?;
        let base = file
            .metadata()
            .map_err(|e| ChunkError::io("stat", &path, e))?
            .len();
        Ok(Self {
            path,
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            base,
            blocks: 0,
            bytes: 0,
            broken: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one framed block; returns the bytes it occupies in the file
    pub fn append_block(&mut self, compressed: &[u8], raw_len: usize) -> io::Result<usize> {
        if self.broken {
            return Err(io::Error::other(
                "stream was abandoned after a failed write",
            ));
        }
        match fragment_format::write_block(&mut self.writer, compressed, raw_len) {
            Ok(written) => {
                self.blocks += 1;
                self.bytes += written as u64;
                Ok(written)
            }
            Err(e) => {
                self.discard_partial_block();
                Err(e)
            }
        }
    }

    /// Drop whatever part of a failed block reached the buffer or the file
    fn discard_partial_block(&mut self) {
        match self.rewind() {
            Ok(intact) => debug!("rewound {} to {} bytes", self.path.display(), intact),
            Err(e) => {
                warn!(
                    "cannot rewind {} after a failed write, abandoning it: {}",
                    self.path.display(),
                    e
                );
                self.broken = true;
            }
        }
    }

    fn rewind(&mut self) -> io::Result<u64> {
        let intact = self.base + self.bytes;
        let on_disk = self.writer.get_ref().metadata()?.len();
        let fresh = BufWriter::with_capacity(WRITE_BUFFER_SIZE, self.writer.get_ref().try_clone()?);
        // into_parts hands back the buffer without writing it out
        let (file, unwritten) = std::mem::replace(&mut self.writer, fresh).into_parts();
        let pending = unwritten.unwrap_or_else(|panicked| panicked.into_inner());

        if on_disk >= intact {
            file.set_len(intact)?;
        } else {
            // earlier blocks still waiting in the buffer are kept
            let keep = usize::try_from(intact - on_disk).map_err(io::Error::other)?;
            let good = pending
                .get(..keep)
                .ok_or_else(|| io::Error::other("buffer lost bytes of earlier blocks"))?;
            self.writer.write_all(good)?;
        }
        Ok(intact)
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    fn flush_and_sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| ChunkError::io("flush", &self.path, e))?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| ChunkError::io("sync", &self.path, e))
    }
}

/// State of one chunk, guarded by the chunk's lock
pub struct ChunkSlot {
    id: ChunkId,
    phase: ChunkPhase,
    streams: HashMap<String, HostStream>,
    // hosts that have a file in the temp directory, kept after streams close
    hosts: BTreeSet<String>,
}

impl ChunkSlot {
    fn new(id: ChunkId) -> Self {
        Self {
            id,
            phase: ChunkPhase::Open,
            streams: HashMap::new(),
            hosts: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn phase(&self) -> ChunkPhase {
        self.phase
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }

    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    /// Stream for `host`, creating the temp directory and file on first access
    pub fn stream(&mut self, layout: &ChunkLayout, host: &str) -> Result<&mut HostStream> {
        if self.phase != ChunkPhase::Open {
            return Err(self.closed_error(layout));
        }

        if !self.streams.contains_key(host) {
            if layout.host_file(self.id, host, false).exists() {
                return Err(self.closed_error(layout));
            }

            let dir = layout.chunk_dir(self.id, true);
            fs::create_dir_all(&dir).map_err(|e| ChunkError::io("create directory", &dir, e))?;

            let stream = HostStream::open(layout.host_file(self.id, host, true))?;
            debug!("opened {}", stream.path().display());
            self.hosts.insert(host.to_string());
            self.streams.insert(host.to_string(), stream);
        }

        let id = self.id;
        self.streams
            .get_mut(host)
            .ok_or_else(|| ChunkError::ChunkAlreadyClosed {
                id: layout.chunk_name(id),
            })
    }

    /// `Open -> Closing`: flush, fsync and close every host stream
    ///
    /// Streams that fail to flush stay open so a later attempt can retry them.
    pub fn close_streams(&mut self) -> Result<()> {
        if self.phase == ChunkPhase::Finalized {
            return Ok(());
        }
        self.phase = ChunkPhase::Closing;

        let mut first_err = None;
        let hosts: Vec<String> = self.streams.keys().cloned().collect();
        for host in hosts {
            let Some(stream) = self.streams.get_mut(&host) else {
                continue;
            };
            match stream.flush_and_sync() {
                Ok(()) => {
                    self.streams.remove(&host);
                }
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// `Closing -> Finalized`; called once the rename has succeeded
    pub(crate) fn mark_finalized(&mut self) {
        debug_assert!(self.streams.is_empty());
        self.phase = ChunkPhase::Finalized;
    }

    fn closed_error(&self, layout: &ChunkLayout) -> ChunkError {
        ChunkError::ChunkAlreadyClosed {
            id: layout.chunk_name(self.id),
        }
    }
}

pub type SharedSlot = Arc<Mutex<ChunkSlot>>;

/// Lock a chunk slot; a poisoned lock still yields the slot, whose state stays consistent
pub fn lock_slot(slot: &SharedSlot) -> MutexGuard<'_, ChunkSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Every id below `closed_below` is closed, as is every id in `finalized`.
/// Finalized ids below the oldest open chunk fold into `closed_below`, so the
/// set stays as small as the spread of open chunks.
#[derive(Default)]
struct TableState {
    slots: BTreeMap<ChunkId, SharedSlot>,
    closed_below: u64,
    finalized: BTreeSet<ChunkId>,
}

impl TableState {
    fn is_closed(&self, id: ChunkId) -> bool {
        id.0 < self.closed_below || self.finalized.contains(&id)
    }

    fn close(&mut self, id: ChunkId) {
        if id.0 >= self.closed_below {
            self.finalized.insert(id);
        }
        self.compact();
    }

    fn compact(&mut self) {
        let oldest_open = self.slots.keys().next().map_or(u64::MAX, |id| id.0);
        while let Some(&first) = self.finalized.first() {
            if first.0 >= oldest_open {
                break;
            }
            self.finalized.remove(&first);
            self.closed_below = self.closed_below.max(first.0.saturating_add(1));
        }
    }
}

/// In-memory map from chunk id to its guarded slot
#[derive(Default)]
pub struct HandleTable {
    state: Mutex<TableState>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Slot for `id`, created on first access; fails for finalized chunks
    pub fn acquire(&self, layout: &ChunkLayout, id: ChunkId) -> Result<SharedSlot> {
        let mut state = self.state();
        if state.is_closed(id) {
            return Err(ChunkError::ChunkAlreadyClosed {
                id: layout.chunk_name(id),
            });
        }
        let slot = state
            .slots
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(ChunkSlot::new(id))));
        Ok(Arc::clone(slot))
    }

    /// Run `f` on the stream of (`id`, `host`) while holding the chunk lock
    pub fn with_stream<T>(
        &self,
        layout: &ChunkLayout,
        id: ChunkId,
        host: &str,
        f: impl FnOnce(&mut HostStream) -> io::Result<T>,
    ) -> Result<T> {
        let slot = self.acquire(layout, id)?;
        let mut chunk = lock_slot(&slot);
        let stream = chunk.stream(layout, host)?;
        let path = stream.path().to_path_buf();
        f(stream).map_err(|e| ChunkError::io("write", path, e))
    }

    /// Evict a chunk and remember it as finalized
    ///
    /// Ids older than every open chunk that never received data count as closed
    /// once a newer chunk is finalized: they trail the watermark even further.
    pub fn release(&self, id: ChunkId) -> Option<SharedSlot> {
        let mut state = self.state();
        let slot = state.slots.remove(&id);
        state.close(id);
        slot
    }

    /// Record a chunk finalized outside the table (e.g. by recovery)
    pub fn mark_finalized(&self, id: ChunkId) {
        self.state().close(id);
    }

    pub fn is_finalized(&self, id: ChunkId) -> bool {
        self.state().is_closed(id)
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.state().slots.contains_key(&id)
    }

    /// Snapshot of the slots whose id satisfies `pred`, in ascending id order
    pub fn select(&self, mut pred: impl FnMut(ChunkId) -> bool) -> Vec<(ChunkId, SharedSlot)> {
        self.state()
            .slots
            .iter()
            .filter(|(id, _)| pred(**id))
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect()
    }

    pub fn open_chunks(&self) -> Vec<ChunkId> {
        self.state().slots.keys().copied().collect()
    }

    /// Number of open file handles across all chunks
    pub fn open_handle_count(&self) -> usize {
        self.select(|_| true)
            .iter()
            .map(|(_, slot)| lock_slot(slot).open_streams())
            .sum()
    }
}
