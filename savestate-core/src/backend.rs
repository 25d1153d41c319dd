/*!
Local and cloud save backends.

Both backends persist a [`SavedSnapshot`] (encoded record plus save
timestamp) as two entries, `save.timestamp` and `save.blob`, written in one
[`WriteBatch`] so neither can be updated without the other.
*/

use crate::storage::{KeyValueStore, WriteBatch};
use crate::{Result, SaveError};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info, warn};

/// Key holding the RFC 3339 time of the last successful save
pub const TIMESTAMP_KEY: &str = "save.timestamp";
/// Key holding the encoded record
pub const BLOB_KEY: &str = "save.blob";
/// Default ceiling for one cloud snapshot (blob, timestamp and keys), 1 MiB
pub const DEFAULT_CLOUD_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Encoded record paired with the time it was saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSnapshot {
    pub timestamp: DateTime<Utc>,
    pub blob: Vec<u8>,
}

/// Render a save timestamp the way it is stored
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a stored save timestamp
pub fn parse_timestamp(raw: &[u8]) -> Result<DateTime<Utc>> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| SaveError::decode(format!("Save timestamp is not UTF-8: {e}")))?;
    DateTime::parse_from_rfc3339(text.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SaveError::decode(format!("Invalid save timestamp {text:?}: {e}")))
}

/// Blob first, timestamp last: a store applying entries in order only
/// advances the timestamp once the matching blob is in place
fn snapshot_batch(blob: &[u8], timestamp: &DateTime<Utc>) -> WriteBatch {
    WriteBatch::new()
        .put(BLOB_KEY, blob)
        .put(TIMESTAMP_KEY, format_timestamp(timestamp))
}

/// Snapshot read/write path shared by both backends
#[derive(Debug, Clone)]
struct SnapshotSlot<S> {
    store: S,
}

impl<S: KeyValueStore> SnapshotSlot<S> {
    fn write(&self, batch: &WriteBatch) -> Result<()> {
        self.store.write_batch(batch)
    }

    fn load(&self) -> Result<Option<SavedSnapshot>> {
        let Some(raw_timestamp) = self.store.get(TIMESTAMP_KEY)? else {
            return Ok(None);
        };
        let Some(blob) = self.store.get(BLOB_KEY)? else {
            return Ok(None);
        };
        if blob.is_empty() {
            return Ok(None);
        }
        Ok(Some(SavedSnapshot {
            timestamp: parse_timestamp(&raw_timestamp)?,
            blob,
        }))
    }

    fn has_data(&self) -> bool {
        self.store.contains(TIMESTAMP_KEY) && self.store.contains(BLOB_KEY)
    }

    fn saved_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        self.store
            .get(TIMESTAMP_KEY)?
            .map(|raw| parse_timestamp(&raw))
            .transpose()
    }

    fn clear(&self) -> Result<()> {
        self.store.remove(TIMESTAMP_KEY)?;
        self.store.remove(BLOB_KEY)
    }
}

fn reject_empty(blob: &[u8]) -> Result<()> {
    if blob.is_empty() {
        return Err(SaveError::EmptyRecord);
    }
    Ok(())
}

/// On-device backend
///
/// # Example
/// ```rust
/// use savestate_core::{LocalBackend, MemoryStore};
///
/// let backend = LocalBackend::new(MemoryStore::new());
/// assert!(!backend.has_data());
/// backend.save(b"encoded record", chrono::Utc::now())?;
/// assert!(backend.has_data());
/// # Ok::<(), savestate_core::SaveError>(())
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend<S> {
    slot: SnapshotSlot<S>,
}

impl<S: KeyValueStore> LocalBackend<S> {
    pub fn new(store: S) -> Self {
        Self {
            slot: SnapshotSlot { store },
        }
    }

    pub fn store(&self) -> &S {
        &self.slot.store
    }

    /// Write `blob` and `timestamp` together
    pub fn save(&self, blob: &[u8], timestamp: DateTime<Utc>) -> Result<()> {
        reject_empty(blob)?;
        self.slot
            .write(&snapshot_batch(blob, &timestamp))
            .map_err(|e| {
                warn!(store = %self.slot.store.describe(), error = %e, "Local save failed");
                e
            })?;
        debug!(
            store = %self.slot.store.describe(),
            size = blob.len(),
            timestamp = %format_timestamp(&timestamp),
            "Saved snapshot locally"
        );
        Ok(())
    }

    /// The stored snapshot, if both entries are present
    pub fn load(&self) -> Result<Option<SavedSnapshot>> {
        self.slot.load()
    }

    /// True iff both entries exist, whether or not they decode
    pub fn has_data(&self) -> bool {
        self.slot.has_data()
    }

    pub fn saved_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        self.slot.saved_timestamp()
    }

    /// Remove the stored snapshot
    pub fn clear(&self) -> Result<()> {
        self.slot.clear()
    }
}

/// Size-capped remote mirror, inert unless enabled
#[derive(Debug, Clone)]
pub struct CloudBackend<S> {
    slot: SnapshotSlot<S>,
    enabled: bool,
    max_payload_bytes: usize,
}

impl<S: KeyValueStore> CloudBackend<S> {
    /// Create a cloud backend; it starts disabled
    pub fn new(store: S) -> Self {
        Self {
            slot: SnapshotSlot { store },
            enabled: false,
            max_payload_bytes: DEFAULT_CLOUD_MAX_PAYLOAD_BYTES,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the hard ceiling on one snapshot's size
    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        info!(enabled, "Cloud storage toggled");
        self.enabled = enabled;
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    pub fn store(&self) -> &S {
        &self.slot.store
    }

    fn require_enabled(&self, op: &str) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            warn!(operation = op, "Cloud operation requested while cloud storage is disabled");
            Err(SaveError::CloudDisabled)
        }
    }

    /// Mirror `blob` and `timestamp` to the remote store
    ///
    /// Fails with [`SaveError::PayloadTooLarge`] before any network write when
    /// the snapshot exceeds the size ceiling.
    pub fn save(&self, blob: &[u8], timestamp: DateTime<Utc>) -> Result<()> {
        self.require_enabled("save")?;
        reject_empty(blob)?;

        let batch = snapshot_batch(blob, &timestamp);
        let size = batch.payload_size();
        if size > self.max_payload_bytes {
            warn!(size, limit = self.max_payload_bytes, "Snapshot exceeds cloud size limit");
            return Err(SaveError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }

        self.slot.write(&batch).map_err(|e| {
            warn!(store = %self.slot.store.describe(), error = %e, "Cloud save failed");
            e
        })?;
        info!(
            store = %self.slot.store.describe(),
            size,
            timestamp = %format_timestamp(&timestamp),
            "Mirrored snapshot to cloud"
        );
        Ok(())
    }

    /// Read the mirrored snapshot
    ///
    /// A remote blob above the size ceiling is refused with
    /// [`SaveError::PayloadTooLarge`] instead of being handed to the codec.
    pub fn load(&self) -> Result<Option<SavedSnapshot>> {
        self.require_enabled("load")?;
        match self.slot.load()? {
            Some(snapshot) if snapshot.blob.len() > self.max_payload_bytes => {
                let size = snapshot.blob.len();
                warn!(size, limit = self.max_payload_bytes, "Cloud snapshot exceeds size limit");
                Err(SaveError::PayloadTooLarge {
                    size,
                    limit: self.max_payload_bytes,
                })
            }
            other => Ok(other),
        }
    }

    /// True iff enabled and both entries exist remotely
    pub fn has_data(&self) -> bool {
        self.require_enabled("has_data").is_ok() && self.slot.has_data()
    }

    pub fn saved_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        self.require_enabled("saved_timestamp")?;
        self.slot.saved_timestamp()
    }

    pub fn clear(&self) -> Result<()> {
        self.require_enabled("clear")?;
        self.slot.clear()
    }
}
