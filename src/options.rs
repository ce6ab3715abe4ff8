use crate::constants;
use crate::error::{ChunkError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration options for a chunk writer
///
/// Captured once at initialization and immutable for the lifetime of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Root directory under which run directories are created
    pub output_path: PathBuf,
    /// Name of the run directory
    pub run_name: String,
    /// Host identity; names the per-host file inside each chunk
    pub hostname: String,
    /// Nominal fragment size in bytes
    pub full_fragment_size: usize,
    /// Id steps a chunk must trail the watermark before it is finalized
    pub chunk_close_delay: u64,
    /// Width of zero-padded chunk ids
    pub chunk_name_length: usize,
    /// Zstd compression level
    pub compression_level: i32,
    /// Run the finalizer after every inserted batch
    pub auto_cleanup: bool,
    /// Interval of the background cleanup loop (milliseconds)
    pub cleanup_interval_ms: u64,
    /// Finalize attempts per chunk during shutdown
    pub finalize_retries: u32,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("."),
            run_name: String::new(),
            hostname: String::new(),
            full_fragment_size: constants::DEFAULT_FULL_FRAGMENT_SIZE,
            chunk_close_delay: constants::DEFAULT_CHUNK_CLOSE_DELAY,
            chunk_name_length: constants::DEFAULT_CHUNK_NAME_LENGTH,
            compression_level: constants::ZSTD_COMPRESSION_LEVEL,
            auto_cleanup: true,
            cleanup_interval_ms: constants::DEFAULT_CLEANUP_INTERVAL_MS,
            finalize_retries: constants::DEFAULT_FINALIZE_RETRIES,
        }
    }
}

impl WriterOptions {
    /// Options for the four values every run must supply
    pub fn new(
        output_path: impl Into<PathBuf>,
        run_name: impl Into<String>,
        full_fragment_size: usize,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            output_path: output_path.into(),
            run_name: run_name.into(),
            hostname: hostname.into(),
            full_fragment_size,
            ..Self::default()
        }
    }

    /// Load options from a JSON document; absent fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| ChunkError::io("read", path, e))?;
        serde_json::from_slice(&data).map_err(|e| {
            ChunkError::InvalidOptions(format!("{}: {}", path.display(), e))
        })
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_name.is_empty() {
            return Err(ChunkError::InvalidOptions("run_name is empty".into()));
        }
        if self.run_name.contains(['/', '\\']) || self.run_name == "." || self.run_name == ".." {
            return Err(ChunkError::InvalidOptions(format!(
                "run_name {:?} is not a valid directory name",
                self.run_name
            )));
        }
        if self.hostname.is_empty() {
            return Err(ChunkError::InvalidOptions("hostname is empty".into()));
        }
        if self.hostname.contains(['/', '\\']) || self.hostname == "." || self.hostname == ".." {
            return Err(ChunkError::InvalidOptions(format!(
                "hostname {:?} is not a valid file name",
                self.hostname
            )));
        }
        if self.chunk_name_length == 0 || self.chunk_name_length > constants::MAX_CHUNK_NAME_LENGTH {
            return Err(ChunkError::InvalidOptions(format!(
                "chunk_name_length must be between 1 and {}, got {}",
                constants::MAX_CHUNK_NAME_LENGTH,
                self.chunk_name_length
            )));
        }
        if self.full_fragment_size == 0 {
            return Err(ChunkError::InvalidOptions(
                "full_fragment_size must be positive".into(),
            ));
        }
        let levels = zstd::compression_level_range();
        if !levels.contains(&self.compression_level) {
            return Err(ChunkError::InvalidOptions(format!(
                "compression_level {} outside {:?}",
                self.compression_level, levels
            )));
        }
        Ok(())
    }
}

/// Builder for WriterOptions
pub struct WriterOptionsBuilder {
    options: WriterOptions,
}

impl WriterOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: WriterOptions::default(),
        }
    }

    pub fn output_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.output_path = path.into();
        self
    }

    pub fn run_name<S: Into<String>>(mut self, name: S) -> Self {
        self.options.run_name = name.into();
        self
    }

    pub fn hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.options.hostname = hostname.into();
        self
    }

    pub fn full_fragment_size(mut self, size: usize) -> Self {
        self.options.full_fragment_size = size;
        self
    }

    pub fn chunk_close_delay(mut self, delay: u64) -> Self {
        self.options.chunk_close_delay = delay;
        self
    }

    pub fn chunk_name_length(mut self, width: usize) -> Self {
        self.options.chunk_name_length = width;
        self
    }

    pub fn compression_level(mut self, level: i32) -> Self {
        self.options.compression_level = level;
        self
    }

    pub fn auto_cleanup(mut self, enabled: bool) -> Self {
        self.options.auto_cleanup = enabled;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.options.cleanup_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn finalize_retries(mut self, retries: u32) -> Self {
        self.options.finalize_retries = retries;
        self
    }

    pub fn build(self) -> WriterOptions {
        self.options
    }
}

impl Default for WriterOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builder_defaults() {
        let opts = WriterOptionsBuilder::new()
            .output_path("/data")
            .run_name("run001")
            .hostname("readerA")
            .build();
        assert_eq!(opts.chunk_name_length, 6);
        assert_eq!(opts.chunk_close_delay, 2);
        assert_eq!(opts.compression_level, 1);
        assert!(opts.auto_cleanup);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = WriterOptions::new("/data", "run001", 4096, "readerA");

        let mut opts = base.clone();
        opts.hostname = "a/b".into();
        assert!(matches!(opts.validate(), Err(ChunkError::InvalidOptions(_))));

        let mut opts = base.clone();
        opts.run_name.clear();
        assert!(opts.validate().is_err());

        // run_dir must stay inside output_path
        for name in [".", "..", "../run001"] {
            let mut opts = base.clone();
            opts.run_name = name.into();
            assert!(matches!(opts.validate(), Err(ChunkError::InvalidOptions(_))));
        }

        let mut opts = base.clone();
        opts.chunk_name_length = 0;
        assert!(opts.validate().is_err());

        let mut opts = base.clone();
        opts.chunk_name_length = 20;
        assert!(opts.validate().is_err());

        let mut opts = base;
        opts.full_fragment_size = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_cleanup_interval_saturates() {
        let opts = WriterOptionsBuilder::new()
            .cleanup_interval(Duration::from_millis(250))
            .build();
        assert_eq!(opts.cleanup_interval_ms, 250);

        let opts = WriterOptionsBuilder::new()
            .cleanup_interval(Duration::MAX)
            .build();
        assert_eq!(opts.cleanup_interval_ms, u64::MAX);
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"output_path": "/data", "run_name": "run007", "hostname": "reader3", "chunk_close_delay": 5}}"#
        )
        .unwrap();

        let opts = WriterOptions::from_json_file(file.path()).unwrap();
        assert_eq!(opts.run_name, "run007");
        assert_eq!(opts.hostname, "reader3");
        assert_eq!(opts.chunk_close_delay, 5);
        assert_eq!(opts.chunk_name_length, constants::DEFAULT_CHUNK_NAME_LENGTH);
        assert_eq!(opts.cleanup_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_from_json_file_malformed() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            WriterOptions::from_json_file(file.path()),
            Err(ChunkError::InvalidOptions(_))
        ));
    }
}
