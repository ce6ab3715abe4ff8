//! Error taxonomy for chunk writing and finalization
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = ChunkError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ChunkError {
    /// Chunk id is not a decimal string of the configured width
    #[error("invalid chunk id {id:?}: expected {width} decimal digits")]
    InvalidId { id: String, width: usize },

    #[error("I/O error while trying to {op} {}: {source}", path.display())]
    IoFailure {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A fragment addressed a chunk that was already finalized
    #[error("chunk {id} is already closed")]
    ChunkAlreadyClosed { id: String },

    /// The final location of a chunk file already exists; nothing is overwritten
    #[error("cannot finalize chunk {id}: {} already exists", target.display())]
    FinalizeConflict { id: String, target: PathBuf },

    #[error("invalid writer options: {0}")]
    InvalidOptions(String),

    #[error("run directory {} is not writable: {source}", path.display())]
    RootNotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("writer has already been ended")]
    WriterClosed,

    #[error("corrupt fragment block at offset {offset}: {reason}")]
    CorruptBlock { offset: u64, reason: String },
}

impl ChunkError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ChunkError::IoFailure {
            op,
            path: path.into(),
            source,
        }
    }

    /// Errors that leave the run in an unsafe state and must halt it
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChunkError::FinalizeConflict { .. } | ChunkError::RootNotWritable { .. }
        )
    }
}
