//! Chunked, compressed on-disk sink for streaming data acquisition.
//!
//! Producers hand [`ChunkWriter::insert_fragments`] batches of fragments keyed by
//! zero-padded chunk ids. Each fragment is zstd-compressed and appended as an
//! independently decodable block to `output/run/<id>_temp/<host>`. Once a chunk
//! trails the newest id by more than the close delay, [`ChunkWriter::clean_up`]
//! closes its files and renames it to `output/run/<id>`, after which it is never
//! written again.
//!
//! ```no_run
//! use strax_writer::{ChunkWriter, WriterOptions};
//!
//! # fn main() -> Result<(), strax_writer::ChunkError> {
//! let writer = ChunkWriter::initialize(WriterOptions::new("/data", "run001", 4096, "readerA"))?;
//! let report = writer.insert_fragments([("000000", vec![0xDE, 0xAD])])?;
//! assert!(report.is_complete());
//! writer.end()?;
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod error;
pub mod format;
pub mod fragment_format;
pub mod handles;
pub mod layout;
pub mod options;
pub mod recovery;
pub mod runtime;
pub mod writer;

pub use error::{ChunkError, Result};
pub use fragment_format::{BlockReader, BlockSummary, FragmentCompressor};
pub use handles::{ChunkPhase, HandleTable};
pub use layout::{ChunkId, ChunkLayout};
pub use options::{WriterOptions, WriterOptionsBuilder};
pub use recovery::{ChunkEntry, HostFile, RecoveryReport};
pub use runtime::CleanupRuntime;
pub use writer::{ChunkWriter, CleanupReport, FailedFragment, InsertReport, WriterStats};
