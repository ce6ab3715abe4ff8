use anyhow::Result;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tempfile::TempDir;

use strax_writer::{BlockReader, ChunkWriter, WriterOptions, WriterOptionsBuilder};

pub const RUN: &str = "run_000";
pub const HOST: &str = "reader0";

pub fn setup_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(anyhow::Error::from)
}

pub fn options(dir: &Path) -> WriterOptionsBuilder {
    WriterOptionsBuilder::new()
        .output_path(dir)
        .run_name(RUN)
        .hostname(HOST)
        .full_fragment_size(1024)
        .chunk_name_length(6)
}

#[allow(dead_code)]
pub fn setup_writer(dir: &Path, delay: u64) -> Result<ChunkWriter> {
    let options: WriterOptions = options(dir).chunk_close_delay(delay).build();
    Ok(ChunkWriter::initialize(options)?)
}

/// Decode every fragment of one host file
#[allow(dead_code)]
pub fn read_fragments(path: &Path) -> Result<Vec<Vec<u8>>> {
    let reader = BlockReader::new(BufReader::new(File::open(path)?));
    let fragments = reader.collect::<strax_writer::Result<Vec<_>>>()?;
    Ok(fragments)
}

/// Fragment payload that identifies its producer and position
#[allow(dead_code)]
pub fn tagged_fragment(producer: usize, chunk: u64, n: usize, size: usize) -> Vec<u8> {
    let tag = format!("p{}c{}n{}|", producer, chunk, n);
    tag.bytes().cycle().take(size.max(tag.len())).collect()
}
