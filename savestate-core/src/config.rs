//! Configuration for save locations and the cloud mirror
//!
//! A [`SaveConfig`] names the local save directory, whether the cloud mirror
//! is enabled, where the mirror lives, and how blobs are compressed. It can
//! be built in code or read from a JSON file.

use crate::backend::{CloudBackend, LocalBackend, DEFAULT_CLOUD_MAX_PAYLOAD_BYTES};
use crate::codec::RecordCodec;
use crate::compression::GzipCompressor;
use crate::storage::{DirectoryStore, DynStore, MemoryStore};
use crate::sync::SaveGame;
use crate::{Result, SaveError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the cloud mirror is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloudTarget {
    /// A directory that an external sync tool keeps up to date (e.g. a synced folder)
    Directory { path: PathBuf },
    /// Amazon S3 bucket, keys kept under `prefix`
    S3 { bucket: String, prefix: String },
}

impl CloudTarget {
    /// Parse a cloud target URI
    ///
    /// Supports formats:
    /// - `s3://bucket-name/prefix` for S3 storage
    /// - `/local/path` or `./relative/path` for a mirrored directory
    pub fn from_uri(uri: &str) -> Result<Self> {
        if let Some(s3_part) = uri.strip_prefix("s3://") {
            let (bucket, prefix) = match s3_part.split_once('/') {
                Some((bucket, prefix)) => (bucket, prefix),
                None => (s3_part, ""),
            };
            if bucket.is_empty() {
                return Err(SaveError::validation("Invalid S3 URI: missing bucket name"));
            }
            Ok(CloudTarget::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.trim_matches('/').to_string(),
            })
        } else if uri.is_empty() {
            Err(SaveError::validation("Cloud target cannot be empty"))
        } else {
            Ok(CloudTarget::Directory {
                path: PathBuf::from(uri),
            })
        }
    }
}

/// Cloud mirror settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    pub target: CloudTarget,
    /// Hard ceiling on one mirrored snapshot, in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

fn default_max_payload_bytes() -> usize {
    DEFAULT_CLOUD_MAX_PAYLOAD_BYTES
}

fn default_compression_level() -> u32 {
    6
}

impl CloudConfig {
    pub fn new(target: CloudTarget) -> Self {
        Self {
            target,
            max_payload_bytes: DEFAULT_CLOUD_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveConfig {
    /// Directory holding the on-device save
    pub local_dir: PathBuf,
    /// Cloud mirror use; off unless explicitly enabled
    #[serde(default)]
    pub cloud_enabled: bool,
    /// Cloud mirror location, required when `cloud_enabled` is set
    #[serde(default)]
    pub cloud: Option<CloudConfig>,
    /// Gzip level for encoded records (0-9)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

impl SaveConfig {
    /// Local-only configuration rooted at `local_dir`
    pub fn local<P: Into<PathBuf>>(local_dir: P) -> Self {
        Self {
            local_dir: local_dir.into(),
            cloud_enabled: false,
            cloud: None,
            compression_level: default_compression_level(),
        }
    }

    /// Attach a cloud mirror and enable it
    pub fn with_cloud(mut self, cloud: CloudConfig) -> Self {
        self.cloud = Some(cloud);
        self.cloud_enabled = true;
        self
    }

    /// Read a configuration from a JSON file and validate it
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: SaveConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.local_dir.as_os_str().is_empty() {
            return Err(SaveError::validation("local_dir cannot be empty"));
        }
        if self.compression_level > 9 {
            return Err(SaveError::validation(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        match (&self.cloud, self.cloud_enabled) {
            (None, true) => {
                return Err(SaveError::validation(
                    "cloud_enabled requires a cloud target",
                ))
            }
            (Some(cloud), _) => {
                if cloud.max_payload_bytes == 0 {
                    return Err(SaveError::validation("max_payload_bytes must be positive"));
                }
                match &cloud.target {
                    CloudTarget::S3 { bucket, .. } if bucket.is_empty() => {
                        return Err(SaveError::validation(
                            "S3 cloud target requires a valid bucket name",
                        ))
                    }
                    CloudTarget::Directory { path } if *path == self.local_dir => {
                        return Err(SaveError::validation(
                            "cloud directory must differ from local_dir",
                        ))
                    }
                    _ => {}
                }
            }
            (None, false) => {}
        }
        Ok(())
    }
}

/// Build a [`SaveGame`] from a validated configuration
///
/// The local save lives in a [`DirectoryStore`]. The cloud store is picked
/// from the configured target; without one, an in-memory store stands in and
/// the mirror stays disabled.
pub fn open_save_game(config: &SaveConfig) -> Result<SaveGame<DirectoryStore, DynStore>> {
    config.validate()?;

    let (cloud_store, max_payload_bytes): (DynStore, usize) = match &config.cloud {
        None => (Box::new(MemoryStore::new()), DEFAULT_CLOUD_MAX_PAYLOAD_BYTES),
        Some(cloud) => {
            let store: DynStore = match &cloud.target {
                CloudTarget::Directory { path } => Box::new(DirectoryStore::new(path)),
                #[cfg(feature = "s3")]
                CloudTarget::S3 { bucket, prefix } => Box::new(crate::storage::S3Store::new(
                    bucket.clone(),
                    prefix.clone(),
                )?),
                #[cfg(not(feature = "s3"))]
                CloudTarget::S3 { .. } => {
                    return Err(SaveError::validation(
                        "S3 cloud target requires the `s3` feature",
                    ))
                }
            };
            (store, cloud.max_payload_bytes)
        }
    };

    tracing::info!(
        local = %config.local_dir.display(),
        cloud = %cloud_store.describe(),
        cloud_enabled = config.cloud_enabled,
        "Opening save game"
    );

    Ok(SaveGame::from_parts(
        LocalBackend::new(DirectoryStore::new(&config.local_dir)),
        CloudBackend::new(cloud_store)
            .enabled(config.cloud_enabled)
            .with_max_payload_bytes(max_payload_bytes),
        RecordCodec::new(GzipCompressor::with_level(config.compression_level)),
    ))
}
