/*!
Record serializer: converts a [`Record`] to a portable byte blob and back.

Blob layout:

| bytes | content                                         |
|-------|-------------------------------------------------|
| 0..4  | magic `SVST`                                    |
| 4     | format version                                  |
| 5     | compression id (0 = none, 1 = gzip)             |
| 6..   | compressed JSON `{ "metadata": .., "record": .. }` |

The JSON container is self-describing; the metadata carries a SHA-256 of the
record JSON which is checked on decode.
*/

use crate::compression::{decompress_with_id, CompressionAdapter, GzipCompressor};
use crate::metadata::{BlobMetadata, FORMAT_VERSION};
use crate::record::Record;
use crate::{Result, SaveError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Leading bytes of every encoded record
pub const MAGIC: &[u8; 4] = b"SVST";

const HEADER_LEN: usize = MAGIC.len() + 2;

#[derive(Serialize)]
struct ContainerRef<'a> {
    metadata: &'a BlobMetadata,
    record: &'a Record,
}

#[derive(Deserialize)]
struct Container {
    metadata: BlobMetadata,
    record: Record,
}

/// Encoder/decoder for record blobs
///
/// # Example
/// ```rust
/// use savestate_core::{RecordCodec, RecordStore};
///
/// let mut store = RecordStore::new();
/// store.set_flag_int("gold", 100);
///
/// let codec = RecordCodec::default();
/// let blob = codec.encode(store.record().unwrap())?;
/// let decoded = codec.decode(&blob)?;
/// assert_eq!(Some(&decoded), store.record());
/// # Ok::<(), savestate_core::SaveError>(())
/// ```
#[derive(Debug, Clone)]
pub struct RecordCodec<C = GzipCompressor>
where
    C: CompressionAdapter,
{
    compressor: C,
}

impl<C> RecordCodec<C>
where
    C: CompressionAdapter,
{
    pub fn new(compressor: C) -> Self {
        Self { compressor }
    }

    pub fn compressor(&self) -> &C {
        &self.compressor
    }

    /// Encode a record into a versioned blob
    pub fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        let record_json = serde_json::to_vec(record)?;
        let metadata = BlobMetadata::for_payload(&record_json, self.compressor.algorithm_name());

        let container_json = serde_json::to_vec(&ContainerRef {
            metadata: &metadata,
            record,
        })?;
        let compressed = self.compressor.compress(&container_json)?;

        let mut blob = Vec::with_capacity(HEADER_LEN + compressed.len());
        blob.extend_from_slice(MAGIC);
        blob.push(FORMAT_VERSION);
        blob.push(self.compressor.algorithm_id());
        blob.extend_from_slice(&compressed);

        debug!(
            uncompressed = metadata.uncompressed_size,
            encoded = blob.len(),
            compression = self.compressor.algorithm_name(),
            "Encoded record"
        );
        Ok(blob)
    }

    /// Decode a blob produced by [`RecordCodec::encode`]
    ///
    /// Any compression id known to this build is accepted, regardless of the
    /// compressor this codec encodes with.
    pub fn decode(&self, blob: &[u8]) -> Result<Record> {
        let (metadata, record) = decode_container(blob).map_err(|e| {
            warn!(size = blob.len(), error = %e, "Failed to decode record blob");
            e
        })?;
        debug!(
            uncompressed = metadata.uncompressed_size,
            compression = %metadata.compression_algorithm,
            "Decoded record"
        );
        Ok(record)
    }

    /// Read only the metadata of a blob, still verifying its integrity
    pub fn inspect(&self, blob: &[u8]) -> Result<BlobMetadata> {
        decode_container(blob).map(|(metadata, _)| metadata)
    }
}

impl Default for RecordCodec<GzipCompressor> {
    fn default() -> Self {
        Self::new(GzipCompressor::new())
    }
}

fn decode_container(blob: &[u8]) -> Result<(BlobMetadata, Record)> {
    if blob.len() < HEADER_LEN {
        return Err(SaveError::decode(format!(
            "Blob is truncated: {} bytes, header needs {}",
            blob.len(),
            HEADER_LEN
        )));
    }
    if &blob[..MAGIC.len()] != MAGIC {
        return Err(SaveError::decode("Not a savestate record blob"));
    }

    let version = blob[MAGIC.len()];
    if version == 0 || version > FORMAT_VERSION {
        return Err(SaveError::decode(format!(
            "Unsupported blob format version: {version} (current: {FORMAT_VERSION})"
        )));
    }

    let compression_id = blob[MAGIC.len() + 1];
    let container_json = decompress_with_id(compression_id, &blob[HEADER_LEN..])?;

    let container: Container = serde_json::from_slice(&container_json)
        .map_err(|e| SaveError::decode(format!("Malformed record container: {e}")))?;

    // inside a blob, bad metadata is a malformed blob, not bad caller input
    container.metadata.validate().map_err(|e| match e {
        SaveError::Validation(msg) => SaveError::decode(format!("Invalid blob metadata: {msg}")),
        other => other,
    })?;
    if container.metadata.format_version != version {
        return Err(SaveError::decode(format!(
            "Header version {version} does not match metadata version {}",
            container.metadata.format_version
        )));
    }

    let record_json = serde_json::to_vec(&container.record)?;
    container.metadata.verify_integrity(&record_json)?;

    Ok((container.metadata, container.record))
}
