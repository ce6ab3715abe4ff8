//! Global constants and helpers for chunk naming, compression and finalization defaults

/// Binary name used in logs and tool output
pub const BINARY_NAME: &str = "strax-writer";

/// Package version from Cargo.toml (set at compile time)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the writer identification string (e.g. "strax-writer/0.3.0")
pub fn created_by() -> String {
    format!("{}/{}", BINARY_NAME, VERSION)
}

// ============================================================================
// Chunk Naming Constants
// ============================================================================

/// Suffix appended to a chunk directory while it is still being written
pub const TEMP_SUFFIX: &str = "_temp";

/// Default width of zero-padded chunk ids (e.g. "000042")
pub const DEFAULT_CHUNK_NAME_LENGTH: usize = 6;

/// Largest supported chunk name width (u64::MAX has 20 digits)
pub const MAX_CHUNK_NAME_LENGTH: usize = 19;

/// Default number of id steps a chunk must trail the watermark before closing
pub const DEFAULT_CHUNK_CLOSE_DELAY: u64 = 2;

/// Default nominal fragment size in bytes
pub const DEFAULT_FULL_FRAGMENT_SIZE: usize = 4096;

/// Name of the probe file used to check the run directory is writable
pub const WRITE_PROBE_FILE: &str = ".write_probe";

// ============================================================================
// Compression Constants
// ============================================================================

/// Zstd compression level (1 = fast, 3 = balanced, 19 = maximum)
pub const ZSTD_COMPRESSION_LEVEL: i32 = 1;

/// Size of a fragment block header: compressed length (u32 LE) + raw length (u32 LE)
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Upper bound on a single decompressed fragment (guards corrupt headers)
pub const MAX_FRAGMENT_SIZE: usize = 64 * 1024 * 1024;

/// Buffered writer capacity per open host file
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// Finalization Constants
// ============================================================================

/// How many times a failed finalize is retried during shutdown
pub const DEFAULT_FINALIZE_RETRIES: u32 = 3;

/// Pause between shutdown finalize attempts
pub const FINALIZE_RETRY_BACKOFF_MS: u64 = 50;

/// Default interval of the background cleanup loop
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 1000;
