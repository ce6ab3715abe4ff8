//! Fragment block format for chunk files
//!
//! Format (repeated until end of file):
//! - Compressed length (u32, little-endian)
//! - Raw length (u32, little-endian)
//! - One zstd frame holding the fragment payload
//!
//! Each block decompresses independently of its neighbours.

use crate::constants::{BLOCK_HEADER_SIZE, MAX_FRAGMENT_SIZE};
use crate::error::{ChunkError, Result};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Reusable zstd compressor for fragment payloads
pub struct FragmentCompressor {
    compressor: zstd::bulk::Compressor<'static>,
    buffer: Vec<u8>,
}

impl FragmentCompressor {
    /// `full_fragment_size` sizes the scratch buffer up front
    pub fn new(level: i32, full_fragment_size: usize) -> io::Result<Self> {
        Ok(Self {
            compressor: zstd::bulk::Compressor::new(level)?,
            buffer: Vec::with_capacity(zstd::zstd_safe::compress_bound(full_fragment_size)),
        })
    }

    /// Compress `raw` into the internal buffer and return the compressed bytes
    pub fn compress(&mut self, raw: &[u8]) -> io::Result<&[u8]> {
        let bound = zstd::zstd_safe::compress_bound(raw.len());
        self.buffer.clear();
        if self.buffer.capacity() < bound {
            self.buffer.reserve(bound);
        }
        self.compressor.compress_to_buffer(raw, &mut self.buffer)?;
        Ok(&self.buffer)
    }
}

/// Write one framed block; returns the number of bytes written
pub fn write_block<W: Write>(writer: &mut W, compressed: &[u8], raw_len: usize) -> io::Result<usize> {
    let compressed_len = u32::try_from(compressed.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "compressed fragment exceeds 4 GiB"))?;
    let raw_len = u32::try_from(raw_len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "fragment exceeds 4 GiB"))?;

    writer.write_all(&compressed_len.to_le_bytes())?;
    writer.write_all(&raw_len.to_le_bytes())?;
    writer.write_all(compressed)?;

    Ok(BLOCK_HEADER_SIZE + compressed.len())
}

/// Compress `raw` and write it as one framed block
pub fn write_fragment<W: Write>(
    writer: &mut W,
    compressor: &mut FragmentCompressor,
    raw: &[u8],
) -> io::Result<usize> {
    let compressed = compressor.compress(raw)?;
    write_block(writer, compressed, raw.len())
}

/// Streaming decoder over the blocks of a chunk file
pub struct BlockReader<R> {
    reader: R,
    offset: u64,
}

impl<R: Read> BlockReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Byte offset of the next block
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read and decompress the next block; `Ok(None)` at a clean end of file
    pub fn next_fragment(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; BLOCK_HEADER_SIZE];
        let start = self.offset;

        let got = read_full(&mut self.reader, &mut header).map_err(|e| corrupt(start, e))?;
        if got == 0 {
            return Ok(None);
        }
        if got < BLOCK_HEADER_SIZE {
            return Err(ChunkError::CorruptBlock {
                offset: start,
                reason: format!("truncated header ({} of {} bytes)", got, BLOCK_HEADER_SIZE),
            });
        }

        let compressed_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let raw_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if raw_len > MAX_FRAGMENT_SIZE {
            return Err(ChunkError::CorruptBlock {
                offset: start,
                reason: format!("raw length {} exceeds limit", raw_len),
            });
        }

        let mut compressed = vec![0u8; compressed_len];
        self.reader
            .read_exact(&mut compressed)
            .map_err(|e| corrupt(start, e))?;

        let raw = zstd::bulk::decompress(&compressed, raw_len).map_err(|e| corrupt(start, e))?;
        if raw.len() != raw_len {
            return Err(ChunkError::CorruptBlock {
                offset: start,
                reason: format!("decompressed {} bytes, header says {}", raw.len(), raw_len),
            });
        }

        self.offset += (BLOCK_HEADER_SIZE + compressed_len) as u64;
        Ok(Some(raw))
    }
}

impl<R: Read> Iterator for BlockReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_fragment().transpose()
    }
}

/// Totals for one decoded chunk file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockSummary {
    pub blocks: usize,
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
}

/// Decode every block in a chunk file
pub fn summarize_file(path: &Path) -> Result<BlockSummary> {
    let file = File::open(path).map_err(|e| ChunkError::io("open", path, e))?;
    let mut reader = BlockReader::new(io::BufReader::new(file));
    let mut summary = BlockSummary::default();
    while let Some(raw) = reader.next_fragment()? {
        summary.blocks += 1;
        summary.raw_bytes += raw.len() as u64;
    }
    summary.compressed_bytes = reader.offset();
    Ok(summary)
}

/// Length of the leading run of complete blocks in a chunk file
///
/// Only headers are read. A last block cut short by a crash is not counted;
/// payloads are not decoded.
pub fn complete_length(path: &Path) -> Result<u64> {
    let file = File::open(path).map_err(|e| ChunkError::io("open", path, e))?;
    let total = file
        .metadata()
        .map_err(|e| ChunkError::io("stat", path, e))?
        .len();
    let mut reader = io::BufReader::new(file);
    let mut header = [0u8; BLOCK_HEADER_SIZE];
    let mut offset = 0u64;

    while total - offset >= BLOCK_HEADER_SIZE as u64 {
        reader
            .read_exact(&mut header)
            .map_err(|e| ChunkError::io("read", path, e))?;
        let compressed_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let end = offset + (BLOCK_HEADER_SIZE as u64) + u64::from(compressed_len);
        if end > total {
            break;
        }
        reader
            .seek_relative(i64::from(compressed_len))
            .map_err(|e| ChunkError::io("seek", path, e))?;
        offset = end;
    }
    Ok(offset)
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn corrupt(offset: u64, e: io::Error) -> ChunkError {
    ChunkError::CorruptBlock {
        offset,
        reason: e.to_string(),
    }
}
