/*!
Metadata embedded in every encoded record blob.
*/

use crate::{Result, SaveError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Current blob format version for compatibility tracking
pub const FORMAT_VERSION: u8 = 1;

/// Integrity and format information stored next to the record
///
/// Only fields derived from the record itself are kept here so that encoding
/// the same record twice yields identical bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    /// Format version for compatibility (current: 1)
    pub format_version: u8,

    /// SHA-256 hash of the canonical record JSON
    pub content_hash: String,

    /// Size of the record JSON in bytes
    pub uncompressed_size: usize,

    /// Compression algorithm used
    pub compression_algorithm: String,
}

impl BlobMetadata {
    /// Describe a record payload
    pub fn for_payload<S: Into<String>>(record_json: &[u8], compression_algorithm: S) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            content_hash: Self::compute_hash(record_json),
            uncompressed_size: record_json.len(),
            compression_algorithm: compression_algorithm.into(),
        }
    }

    /// Hex SHA-256 of `data`
    pub fn compute_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    /// Verify the record payload against the stored hash
    pub fn verify_integrity(&self, record_json: &[u8]) -> Result<()> {
        let computed_hash = Self::compute_hash(record_json);
        if computed_hash == self.content_hash {
            Ok(())
        } else {
            Err(SaveError::IntegrityCheckFailed {
                expected: self.content_hash.clone(),
                actual: computed_hash,
            })
        }
    }

    /// Check if this metadata is readable by the current format version
    pub fn is_compatible(&self) -> bool {
        self.format_version <= FORMAT_VERSION
    }

    pub fn validate(&self) -> Result<()> {
        if self.content_hash.is_empty() {
            return Err(SaveError::validation("content_hash cannot be empty"));
        }
        if !self.is_compatible() {
            return Err(SaveError::decode(format!(
                "Incompatible blob format version: {} (current: {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash() {
        let hash = BlobMetadata::compute_hash(b"test data");
        assert_eq!(
            hash,
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
    }

    #[test]
    fn test_integrity_verification() {
        let metadata = BlobMetadata::for_payload(b"{\"flags\":{}}", "gzip");
        assert!(metadata.verify_integrity(b"{\"flags\":{}}").is_ok());
        assert!(matches!(
            metadata.verify_integrity(b"{\"flags\":{\"x\":1}}"),
            Err(SaveError::IntegrityCheckFailed { .. })
        ));
    }

    #[test]
    fn test_validation_and_compatibility() {
        let mut metadata = BlobMetadata::for_payload(b"abc", "none");
        assert_eq!(metadata.uncompressed_size, 3);
        assert!(metadata.validate().is_ok());

        metadata.format_version = FORMAT_VERSION + 1;
        assert!(!metadata.is_compatible());
        assert!(metadata.validate().is_err());

        metadata.format_version = FORMAT_VERSION;
        metadata.content_hash.clear();
        assert!(metadata.validate().is_err());
    }
}
