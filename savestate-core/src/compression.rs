/*!
Compression adapters for encoded records.

The codec compresses the record container before it is written to a backend.
Gzip is the default; the header id lets a blob name the algorithm it was
written with so it can be decoded by any codec configuration.
*/

use crate::{Result, SaveError};
use flate2::{read::GzDecoder, Compression, GzBuilder};
use std::io::{Read, Write};

/// Compression abstraction for encoded records
pub trait CompressionAdapter {
    /// Compress the input data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress the input data
    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>>;

    /// Get the name of the compression algorithm
    fn algorithm_name(&self) -> &str;

    /// One-byte id written into the blob header
    fn algorithm_id(&self) -> u8;
}

/// Header id for uncompressed payloads
pub const NO_COMPRESSION_ID: u8 = 0;
/// Header id for gzip payloads
pub const GZIP_ID: u8 = 1;

/// Gzip compression adapter
///
/// Output is deterministic: the gzip header carries no modification time or
/// file name, so the same input always yields the same bytes.
///
/// # Example
/// ```rust
/// use savestate_core::{CompressionAdapter, GzipCompressor};
///
/// let compressor = GzipCompressor::new();
/// let data = b"flags flags flags flags";
/// let compressed = compressor.compress(data)?;
/// assert_eq!(compressor.decompress(&compressed)?, data);
/// # Ok::<(), savestate_core::SaveError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    compression_level: Compression,
}

impl GzipCompressor {
    /// Create a new gzip compressor with default compression level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    /// Create a gzip compressor with the given level (0-9, clamped)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level.min(9)),
        }
    }

    /// Create a compressor for fast compression (level 1)
    pub fn fast() -> Self {
        Self::with_level(1)
    }

    /// Create a compressor for maximum compression (level 9)
    pub fn max() -> Self {
        Self::with_level(9)
    }

    pub fn level(&self) -> u32 {
        self.compression_level.level()
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzBuilder::new()
            .mtime(0)
            .write(Vec::new(), self.compression_level);

        encoder.write_all(data).map_err(|e| {
            SaveError::compression(format!("Failed to write data for compression: {e}"))
        })?;

        encoder
            .finish()
            .map_err(|e| SaveError::compression(format!("Failed to finish compression: {e}")))
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        decompress_gzip(compressed_data)
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }

    fn algorithm_id(&self) -> u8 {
        GZIP_ID
    }
}

/// Pass-through adapter, for tests or already-compact payloads
#[derive(Debug, Clone)]
pub struct NoCompression;

impl NoCompression {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoCompression {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed_data.to_vec())
    }

    fn algorithm_name(&self) -> &str {
        "none"
    }

    fn algorithm_id(&self) -> u8 {
        NO_COMPRESSION_ID
    }
}

/// Upper bound on the decompressed size of one record container
pub const MAX_DECOMPRESSED_BYTES: u64 = 64 * 1024 * 1024;

fn decompress_gzip(compressed_data: &[u8]) -> Result<Vec<u8>> {
    decompress_gzip_bounded(compressed_data, MAX_DECOMPRESSED_BYTES)
}

fn decompress_gzip_bounded(compressed_data: &[u8], limit: u64) -> Result<Vec<u8>> {
    // one byte past the limit tells an exact fit from an overflow
    let mut decoder = GzDecoder::new(compressed_data).take(limit.saturating_add(1));
    let mut decompressed = Vec::new();

    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| SaveError::compression(format!("Failed to decompress data: {e}")))?;

    if decompressed.len() as u64 > limit {
        return Err(SaveError::compression(format!(
            "Decompressed data exceeds {limit} bytes"
        )));
    }
    Ok(decompressed)
}

/// Decompress a payload written with the algorithm named by `id`
pub fn decompress_with_id(id: u8, data: &[u8]) -> Result<Vec<u8>> {
    match id {
        NO_COMPRESSION_ID => Ok(data.to_vec()),
        GZIP_ID => decompress_gzip(data),
        other => Err(SaveError::decode(format!(
            "Unknown compression id {other}"
        ))),
    }
}
