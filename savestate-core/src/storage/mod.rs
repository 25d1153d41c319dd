/*!
Key-value storage adapters for saved snapshots.

This module defines the storage abstraction (port) and its concrete adapters.
Backends only ever talk to a [`KeyValueStore`], so the same local/cloud logic
runs against a directory on disk, an in-memory map, or an S3 bucket.
*/

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use crate::{Result, SaveError};
use savestate_retry::RetryError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// A set of key/value writes that must land together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    entries: Vec<(String, Vec<u8>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; a later entry for the same key replaces an earlier one
    pub fn put<K: Into<String>, V: Into<Vec<u8>>>(mut self, key: K, value: V) -> Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total size of keys and values in bytes
    pub fn payload_size(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

/// Storage abstraction for persisted key/value entries
///
/// Implementations must apply a [`WriteBatch`] atomically from a reader's
/// point of view: after `write_batch` returns an error, none of the batch's
/// new values may be visible.
pub trait KeyValueStore {
    /// Read the value stored under `key`
    ///
    /// # Returns
    /// `Ok(None)` when the key is absent, an error when the store can't be read
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write every entry of `batch`, durably, or none of them
    fn write_batch(&self, batch: &WriteBatch) -> Result<()>;

    /// Check if a value exists under `key`
    fn contains(&self, key: &str) -> bool;

    /// Remove `key`; removing an absent key succeeds
    fn remove(&self, key: &str) -> Result<()>;

    /// Human-readable location, used in diagnostics
    fn describe(&self) -> String;

    /// Write a single entry
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.write_batch(&WriteBatch::new().put(key, value))
    }
}

/// A store chosen at runtime
pub type DynStore = Box<dyn KeyValueStore + Send + Sync>;

impl KeyValueStore for DynStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        (**self).write_batch(batch)
    }

    fn contains(&self, key: &str) -> bool {
        (**self).contains(key)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Memory-based key-value store
///
/// Clones share the same underlying map, which lets two engines observe the
/// same "device" in tests. A batch is applied under a single lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|_| SaveError::storage("Memory store lock poisoned"))
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        let mut data = self.lock()?;
        for (key, value) in batch.entries() {
            data.insert(key.to_string(), value.to_vec());
        }
        Ok(())
    }

    fn contains(&self, key: &str) -> bool {
        self.lock().map(|m| m.contains_key(key)).unwrap_or(false)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Apply `batch` one entry at a time, putting back what was there on failure
///
/// Each entry's previous value is read before it is overwritten. When a read
/// or write fails, already written entries are restored in reverse order
/// (or deleted if they were absent) and the original error is returned.
/// Stores without a native multi-key commit use this for `write_batch`.
pub(crate) fn write_entries_restoring<R, W, D>(
    batch: &WriteBatch,
    read: R,
    write: W,
    delete: D,
) -> Result<()>
where
    R: Fn(&str) -> Result<Option<Vec<u8>>>,
    W: Fn(&str, &[u8]) -> Result<()>,
    D: Fn(&str) -> Result<()>,
{
    let mut written: Vec<(&str, Option<Vec<u8>>)> = Vec::with_capacity(batch.len());
    for (key, value) in batch.entries() {
        let outcome = read(key).and_then(|previous| write(key, value).map(|_| previous));
        match outcome {
            Ok(previous) => written.push((key, previous)),
            Err(e) => {
                warn!(key = %key, error = %e, "Batch entry failed, restoring earlier entries");
                for (done, previous) in written.iter().rev() {
                    let restored = match previous {
                        Some(old) => write(done, old),
                        None => delete(done),
                    };
                    if let Err(rb) = restored {
                        warn!(key = %done, error = %rb, "Rollback could not restore entry");
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Unwrap the store error carried by a failed retry loop
pub(crate) fn from_retry_error(err: RetryError) -> SaveError {
    let message = err.to_string();
    match err.into_source().downcast::<SaveError>() {
        Ok(inner) => *inner,
        Err(_) => SaveError::storage(message),
    }
}

// Re-export types for convenience
pub use local::DirectoryStore;
#[cfg(feature = "s3")]
pub use s3::S3Store;
