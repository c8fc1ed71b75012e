//! Portable namespace archives
//!
//! An archive carries the logical keys of one database together with the
//! content-addressed blocks they reference, so a database can be backed up
//! or moved to another instance and verified on arrival.

use crate::block::BlockKey;
use nodus_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Current archive encoding version
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

const MAGIC: &[u8; 4] = b"NDSA";

/// A serialized snapshot of one namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceArchive {
    /// Encoding version
    pub format_version: u32,

    /// Name of the namespace the archive was exported from
    pub namespace: String,

    /// Logical key (without the namespace prefix) to block address
    pub refs: Vec<(String, BlockKey)>,

    /// Deduplicated block payloads
    pub blocks: Vec<(BlockKey, Vec<u8>)>,
}

impl NamespaceArchive {
    /// Check version, block integrity and reference closure
    pub fn validate(&self) -> Result<()> {
        if self.format_version != ARCHIVE_FORMAT_VERSION {
            return Err(Error::Deserialization(format!(
                "unsupported archive version {}",
                self.format_version
            )));
        }
        let mut present = HashSet::with_capacity(self.blocks.len());
        for (key, bytes) in &self.blocks {
            if BlockKey::of(bytes) != *key {
                return Err(Error::DataCorruption(format!(
                    "archive block {key} does not match its content"
                )));
            }
            present.insert(*key);
        }
        for (name, key) in &self.refs {
            if !present.contains(key) {
                return Err(Error::DataCorruption(format!(
                    "archive reference {name} points at missing block {key}"
                )));
            }
        }
        Ok(())
    }

    /// Encode to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))?;
        let mut out = Vec::with_capacity(MAGIC.len() + body.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode from bytes produced by [`NamespaceArchive::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_prefix(&MAGIC[..])
            .ok_or_else(|| Error::Deserialization("not a namespace archive".to_string()))?;
        let archive: NamespaceArchive =
            bincode::deserialize(body).map_err(|e| Error::Deserialization(e.to_string()))?;
        archive.validate()?;
        Ok(archive)
    }

    /// Number of logical keys in the archive
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// True if the archive carries no keys
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NamespaceArchive {
        let payload = b"block".to_vec();
        let key = BlockKey::of(&payload);
        NamespaceArchive {
            format_version: ARCHIVE_FORMAT_VERSION,
            namespace: "people".to_string(),
            refs: vec![("node:00000000000000000001".to_string(), key)],
            blocks: vec![(key, payload)],
        }
    }

    #[test]
    fn test_bytes_round_trip() {
        let archive = sample();
        let bytes = archive.to_bytes().unwrap();
        assert_eq!(NamespaceArchive::from_bytes(&bytes).unwrap(), archive);
    }

    #[test]
    fn test_rejects_foreign_bytes() {
        assert!(NamespaceArchive::from_bytes(b"garbage").is_err());
    }

    #[test]
    fn test_detects_tampered_block() {
        let mut archive = sample();
        archive.blocks[0].1 = b"tampered".to_vec();
        let err = archive.validate().unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_detects_dangling_reference() {
        let mut archive = sample();
        archive.blocks.clear();
        assert!(archive.validate().is_err());
    }
}
