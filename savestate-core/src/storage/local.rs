/*!
Directory-backed key-value store for on-device saves.
*/

use super::{from_retry_error, KeyValueStore, WriteBatch};
use crate::{Result, SaveError};
use savestate_retry::{classify_error, local_storage_retry_policy, retry_blocking, RetryPolicy};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, error, warn};

/// Key-value store keeping one file per key under a base directory
///
/// Batches are staged into temporary files in the same directory and
/// fsynced before any of them is renamed into place. Each entry's previous
/// contents are read just before its rename; if a later rename fails, the
/// entries already renamed by that batch get their previous contents back
/// (or are removed if they were new), so a reader never sees half a batch.
///
/// # Example
/// ```rust
/// use savestate_core::storage::{DirectoryStore, KeyValueStore};
///
/// let dir = tempfile::tempdir()?;
/// let store = DirectoryStore::new(dir.path());
/// store.put("save.timestamp", b"2024-01-01T00:00:00Z")?;
/// assert!(store.contains("save.timestamp"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    base_dir: PathBuf,
    retry_policy: RetryPolicy,
}

impl DirectoryStore {
    /// Create a store rooted at `base_dir`; the directory is created on first write
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            retry_policy: local_storage_retry_policy(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Map a key to its file, rejecting keys that could escape the directory
    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(SaveError::validation(format!("Invalid storage key: {key:?}")));
        }
        Ok(self.base_dir.join(key))
    }

    fn ensure_base_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir).map_err(|e| {
                SaveError::storage(format!(
                    "Failed to create directory {}: {}",
                    self.base_dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Write `value` to a synced temp file next to its final location
    fn stage(&self, key: &str, value: &[u8]) -> Result<TempPath> {
        retry_blocking("stage_entry", &self.retry_policy, |_| {
            let write = || -> std::io::Result<TempPath> {
                let mut tmp = NamedTempFile::new_in(&self.base_dir)?;
                tmp.write_all(value)?;
                tmp.as_file().sync_all()?;
                Ok(tmp.into_temp_path())
            };
            write().map_err(|e| classify_error("stage_entry", SaveError::Io(e)))
        })
        .map_err(|e| {
            let err = from_retry_error(e);
            error!(key, dir = %self.base_dir.display(), error = %err, "Failed to stage entry");
            err
        })
    }

    /// Put back what a partially committed batch replaced, newest first
    fn roll_back(&self, committed: &[(PathBuf, Option<Vec<u8>>)]) {
        for (path, previous) in committed.iter().rev() {
            let restored = match previous {
                Some(old) => self.restore(path, old),
                None => fs::remove_file(path).or_else(|e| match e.kind() {
                    ErrorKind::NotFound => Ok(()),
                    _ => Err(e),
                }),
            };
            if let Err(e) = restored {
                warn!(path = %path.display(), error = %e, "Rollback could not restore entry");
            }
        }
        self.sync_dir();
    }

    fn restore(&self, path: &Path, old: &[u8]) -> std::io::Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.base_dir)?;
        tmp.write_all(old)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map(|_| ()).map_err(|e| e.error)
    }

    #[cfg(unix)]
    fn sync_dir(&self) {
        if let Err(e) = fs::File::open(&self.base_dir).and_then(|d| d.sync_all()) {
            warn!(dir = %self.base_dir.display(), error = %e, "Failed to sync directory");
        }
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) {}
}

/// Current contents of `path`, kept so a failed batch can put them back
fn previous_value(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SaveError::storage(format!(
            "Failed to read {} before overwriting: {}",
            path.display(),
            e
        ))),
    }
}

impl KeyValueStore for DirectoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SaveError::storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        self.ensure_base_dir()?;

        let mut staged = Vec::with_capacity(batch.len());
        for (key, value) in batch.entries() {
            let path = self.key_path(key)?;
            staged.push((path, self.stage(key, value)?));
        }

        let mut committed: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::with_capacity(staged.len());
        for (path, tmp) in staged {
            let commit = previous_value(&path).and_then(|previous| {
                tmp.persist(&path).map(|_| previous).map_err(|e| {
                    SaveError::storage(format!("Failed to write {}: {}", path.display(), e.error))
                })
            });
            match commit {
                Ok(previous) => committed.push((path, previous)),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to commit entry, rolling back batch");
                    self.roll_back(&committed);
                    return Err(e);
                }
            }
        }

        self.sync_dir();
        debug!(
            dir = %self.base_dir.display(),
            entries = batch.len(),
            bytes = batch.payload_size(),
            "Wrote batch"
        );
        Ok(())
    }

    fn contains(&self, key: &str) -> bool {
        self.key_path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SaveError::storage(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn describe(&self) -> String {
        self.base_dir.display().to_string()
    }
}
