/*!
Save orchestration between the in-memory record and its two backends.

[`SaveGame`] owns the [`RecordStore`], the codec and both backends. A cloud
save always writes locally first and mirrors the exact same blob and
timestamp, so the two sides can be compared by timestamp alone: the newer
timestamp wins and a tie keeps the local copy.
*/

use crate::backend::{format_timestamp, CloudBackend, LocalBackend, SavedSnapshot};
use crate::codec::RecordCodec;
use crate::compression::{CompressionAdapter, GzipCompressor};
use crate::record_store::RecordStore;
use crate::storage::KeyValueStore;
use crate::{Result, SaveError};
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use crate::observability::SaveMetrics;

/// Which backend a load was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSource {
    Local,
    Cloud,
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncSource::Local => write!(f, "local"),
            SyncSource::Cloud => write!(f, "cloud"),
        }
    }
}

/// A save game: record, codec, and local plus cloud backends
///
/// # Example
/// ```rust
/// use savestate_core::{MemoryStore, SaveGame};
///
/// let device = MemoryStore::new();
/// let mut game = SaveGame::new(device.clone(), MemoryStore::new());
/// assert!(!game.has_local_saved_data());
/// game.records_mut().set_flag_int("gold", 100);
/// game.save_local()?;
///
/// let mut restarted = SaveGame::new(device, MemoryStore::new());
/// restarted.load_local()?;
/// assert_eq!(restarted.records().get_flag_as_int("gold"), 100);
/// # Ok::<(), savestate_core::SaveError>(())
/// ```
#[derive(Debug)]
pub struct SaveGame<L, R, C = GzipCompressor>
where
    C: CompressionAdapter,
{
    records: RecordStore,
    codec: RecordCodec<C>,
    local: LocalBackend<L>,
    cloud: CloudBackend<R>,
}

impl<L, R> SaveGame<L, R, GzipCompressor>
where
    L: KeyValueStore,
    R: KeyValueStore,
{
    /// Create a save game with default gzip encoding; the cloud mirror starts disabled
    pub fn new(local_store: L, cloud_store: R) -> Self {
        Self::from_parts(
            LocalBackend::new(local_store),
            CloudBackend::new(cloud_store),
            RecordCodec::default(),
        )
    }
}

impl<L, R, C> SaveGame<L, R, C>
where
    L: KeyValueStore,
    R: KeyValueStore,
    C: CompressionAdapter,
{
    pub fn from_parts(local: LocalBackend<L>, cloud: CloudBackend<R>, codec: RecordCodec<C>) -> Self {
        Self {
            records: RecordStore::new(),
            codec,
            local,
            cloud,
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut RecordStore {
        &mut self.records
    }

    pub fn codec(&self) -> &RecordCodec<C> {
        &self.codec
    }

    pub fn local(&self) -> &LocalBackend<L> {
        &self.local
    }

    pub fn cloud(&self) -> &CloudBackend<R> {
        &self.cloud
    }

    pub fn cloud_enabled(&self) -> bool {
        self.cloud.is_enabled()
    }

    pub fn set_cloud_enabled(&mut self, enabled: bool) {
        self.cloud.set_enabled(enabled);
    }

    /// True iff the local backend holds both a timestamp and a blob
    pub fn has_local_saved_data(&self) -> bool {
        self.local.has_data()
    }

    /// Encode the current record and write it locally, stamped with the current time
    ///
    /// # Errors
    /// [`SaveError::EmptyRecord`] when no record exists yet; otherwise any
    /// encode or store failure.
    pub fn save_local(&self) -> Result<()> {
        self.write_local(Utc::now()).map(|_| ())
    }

    /// Save locally, then mirror the same snapshot to the cloud
    ///
    /// Nothing is written anywhere when the cloud is disabled, and the cloud
    /// is not contacted when the local save fails. A failed mirror leaves the
    /// fresh local save in place.
    pub fn save_cloud(&self) -> Result<()> {
        if !self.cloud.is_enabled() {
            warn!("Cloud save requested while cloud storage is disabled");
            return Err(SaveError::CloudDisabled);
        }

        let snapshot = self.write_local(Utc::now())?;
        let result = self.cloud.save(&snapshot.blob, snapshot.timestamp);

        #[cfg(feature = "metrics")]
        if let Some(metrics) = SaveMetrics::global() {
            match &result {
                Ok(()) => metrics.record_cloud_save(snapshot.blob.len()),
                Err(_) => metrics.record_failure("save_cloud"),
            }
        }

        result?;
        info!(
            timestamp = %format_timestamp(&snapshot.timestamp),
            size = snapshot.blob.len(),
            "Saved game locally and to cloud"
        );
        Ok(())
    }

    /// Replace the in-memory record with the local save
    ///
    /// Fails with [`SaveError::Storage`] when nothing is saved locally. On
    /// any failure the in-memory record is left as it was.
    pub fn load_local(&mut self) -> Result<()> {
        let snapshot = self
            .local
            .load()?
            .ok_or_else(|| SaveError::storage("No local save data"))?;
        self.apply(SyncSource::Local, &snapshot)
    }

    /// Replace the in-memory record with the cloud save
    ///
    /// Fails when the cloud is disabled, when either remote entry is absent,
    /// or when the blob does not decode; the in-memory record is then left
    /// as it was.
    pub fn load_from_cloud(&mut self) -> Result<()> {
        let snapshot = self
            .cloud
            .load()?
            .ok_or_else(|| SaveError::storage("No cloud save data"))?;
        self.apply(SyncSource::Cloud, &snapshot)
    }

    /// True iff the cloud holds a save that should replace the local one
    ///
    /// No cloud timestamp means false. A cloud timestamp with no local one
    /// means true. Otherwise the local timestamp must be strictly older.
    pub fn cloud_is_newer(&self) -> bool {
        if !self.cloud.is_enabled() {
            debug!("Cloud storage disabled, cloud is not newer");
            return false;
        }

        let cloud_time = match self.cloud.saved_timestamp() {
            Ok(Some(t)) => t,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "Could not read cloud save timestamp");
                return false;
            }
        };

        let local_time = match self.local.saved_timestamp() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Local save timestamp unreadable, treating as absent");
                None
            }
        };

        is_newer(local_time, cloud_time)
    }

    /// Load whichever side holds the newer save
    pub fn load_newest(&mut self) -> Result<SyncSource> {
        if self.cloud_is_newer() {
            self.load_from_cloud()?;
            Ok(SyncSource::Cloud)
        } else {
            self.load_local()?;
            Ok(SyncSource::Local)
        }
    }

    fn write_local(&self, timestamp: DateTime<Utc>) -> Result<SavedSnapshot> {
        let record = self.records.record().ok_or_else(|| {
            warn!("Save requested before any record exists");
            SaveError::EmptyRecord
        })?;

        let blob = self.codec.encode(record)?;
        let result = self.local.save(&blob, timestamp);

        #[cfg(feature = "metrics")]
        if let Some(metrics) = SaveMetrics::global() {
            match &result {
                Ok(()) => metrics.record_local_save(blob.len()),
                Err(_) => metrics.record_failure("save_local"),
            }
        }

        result?;
        Ok(SavedSnapshot { timestamp, blob })
    }

    fn apply(&mut self, source: SyncSource, snapshot: &SavedSnapshot) -> Result<()> {
        let decoded = self.codec.decode(&snapshot.blob);

        #[cfg(feature = "metrics")]
        if let Some(metrics) = SaveMetrics::global() {
            match &decoded {
                Ok(_) => metrics.record_load(),
                Err(_) => metrics.record_failure("load"),
            }
        }

        let record = decoded.map_err(|e| {
            warn!(%source, error = %e, "Stored save could not be decoded");
            e
        })?;
        self.records.replace_record(record);
        info!(
            %source,
            timestamp = %format_timestamp(&snapshot.timestamp),
            size = snapshot.blob.len(),
            "Loaded save"
        );
        Ok(())
    }
}

/// Timestamp rule: cloud wins only when strictly newer, or when there is no local save
fn is_newer(local: Option<DateTime<Utc>>, cloud: DateTime<Utc>) -> bool {
    match local {
        None => true,
        Some(local) => local < cloud,
    }
}
