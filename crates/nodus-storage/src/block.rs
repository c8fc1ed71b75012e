//! Content-addressed block store abstraction
//!
//! Blocks are immutable byte strings addressed by the hash of their content.
//! A small named-reference table maps qualified logical keys to blocks; it
//! is the only mutable state a store holds.

use crate::archive::{ARCHIVE_FORMAT_VERSION, NamespaceArchive};
use crate::keys::Namespace;
use nodus_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Shared immutable block bytes
pub type Bytes = Arc<[u8]>;

/// Address of a block: the 128-bit xxh3 hash of its bytes
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockKey(u128);

impl BlockKey {
    /// Compute the address of `bytes`
    pub fn of(bytes: &[u8]) -> Self {
        Self(xxhash_rust::xxh3::xxh3_128(bytes))
    }

    /// Big-endian byte form, used as the on-disk key
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Rebuild from the on-disk key
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::DataCorruption(format!("block key of {} bytes", bytes.len())))?;
        Ok(Self(u128::from_be_bytes(raw)))
    }
}

impl fmt::Debug for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockKey({:032x})", self.0)
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A content-addressed object store with a named-reference table
pub trait BlockStore: Send + Sync {
    /// Fetch a block, `None` when it does not exist
    fn get(&self, key: &BlockKey) -> Result<Option<Bytes>>;

    /// Store a block and return its address; storing existing content is a no-op
    fn put(&self, bytes: &[u8]) -> Result<BlockKey>;

    /// Check whether a block exists
    fn contains(&self, key: &BlockKey) -> Result<bool>;

    /// Fetch several blocks, preserving order
    fn get_many(&self, keys: &[BlockKey]) -> Result<Vec<Option<Bytes>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Store several blocks, preserving order
    fn put_many(&self, blocks: &[&[u8]]) -> Result<Vec<BlockKey>> {
        blocks.iter().map(|bytes| self.put(bytes)).collect()
    }

    /// Resolve a named reference
    fn resolve_ref(&self, name: &str) -> Result<Option<BlockKey>>;

    /// Set (`Some`) or remove (`None`) references as one atomic batch
    fn update_refs(&self, updates: &[(String, Option<BlockKey>)]) -> Result<()>;

    /// List references whose name starts with `prefix`, ordered by name
    fn scan_refs(&self, prefix: &str) -> Result<Vec<(String, BlockKey)>>;

    /// Copy every reference and block of a namespace into a portable archive
    fn export_namespace(&self, namespace: &Namespace) -> Result<NamespaceArchive> {
        let refs = self.scan_refs(&namespace.prefix())?;
        let mut seen = HashSet::new();
        let mut blocks = Vec::new();
        let mut entries = Vec::with_capacity(refs.len());

        for (qualified, block) in refs {
            let Some(logical) = namespace.strip(&qualified) else {
                continue;
            };
            if seen.insert(block) {
                let bytes = self.get(&block)?.ok_or_else(|| {
                    Error::DataCorruption(format!("reference {qualified} points at missing block {block}"))
                })?;
                blocks.push((block, bytes.to_vec()));
            }
            entries.push((logical.to_string(), block));
        }

        info!(
            namespace = namespace.name(),
            refs = entries.len(),
            blocks = blocks.len(),
            "Exported namespace"
        );

        Ok(NamespaceArchive {
            format_version: ARCHIVE_FORMAT_VERSION,
            namespace: namespace.name().to_string(),
            refs: entries,
            blocks,
        })
    }

    /// Load an archive into a namespace, optionally under a new name
    ///
    /// The target namespace must be empty. Block contents are verified
    /// against their addresses before any reference is written.
    fn import_namespace(
        &self,
        archive: &NamespaceArchive,
        rename: Option<&Namespace>,
    ) -> Result<Namespace> {
        archive.validate()?;
        let target = match rename {
            Some(ns) => ns.clone(),
            None => Namespace::new(&archive.namespace)?,
        };
        if !self.scan_refs(&target.prefix())?.is_empty() {
            return Err(Error::Namespace(format!(
                "database '{}' already exists",
                target.name()
            )));
        }

        let payloads: Vec<&[u8]> = archive.blocks.iter().map(|(_, b)| b.as_slice()).collect();
        let stored = self.put_many(&payloads)?;
        debug!(blocks = stored.len(), "Imported blocks");

        let updates: Vec<(String, Option<BlockKey>)> = archive
            .refs
            .iter()
            .map(|(logical, block)| (target.qualify(logical), Some(*block)))
            .collect();
        self.update_refs(&updates)?;

        info!(
            source = archive.namespace.as_str(),
            target = target.name(),
            refs = updates.len(),
            "Imported namespace"
        );
        Ok(target)
    }
}

#[derive(Default)]
struct MemoryState {
    blocks: HashMap<BlockKey, Bytes>,
    refs: BTreeMap<String, BlockKey>,
}

/// Volatile in-process block store
#[derive(Default)]
pub struct MemoryBlockStore {
    state: RwLock<MemoryState>,
}

impl MemoryBlockStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blocks held
    pub fn block_count(&self) -> usize {
        self.state.read().map(|s| s.blocks.len()).unwrap_or(0)
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| Error::Internal("Failed to acquire block store lock".to_string()))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| Error::Internal("Failed to acquire block store lock".to_string()))
    }
}

impl BlockStore for MemoryBlockStore {
    fn get(&self, key: &BlockKey) -> Result<Option<Bytes>> {
        Ok(self.read_state()?.blocks.get(key).cloned())
    }

    fn put(&self, bytes: &[u8]) -> Result<BlockKey> {
        let key = BlockKey::of(bytes);
        self.write_state()?
            .blocks
            .entry(key)
            .or_insert_with(|| Arc::from(bytes));
        Ok(key)
    }

    fn contains(&self, key: &BlockKey) -> Result<bool> {
        Ok(self.read_state()?.blocks.contains_key(key))
    }

    fn put_many(&self, blocks: &[&[u8]]) -> Result<Vec<BlockKey>> {
        let mut state = self.write_state()?;
        Ok(blocks
            .iter()
            .map(|bytes| {
                let key = BlockKey::of(bytes);
                state.blocks.entry(key).or_insert_with(|| Arc::from(*bytes));
                key
            })
            .collect())
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<BlockKey>> {
        Ok(self.read_state()?.refs.get(name).copied())
    }

    fn update_refs(&self, updates: &[(String, Option<BlockKey>)]) -> Result<()> {
        let mut state = self.write_state()?;
        for (name, target) in updates {
            if let Some(block) = target {
                if !state.blocks.contains_key(block) {
                    return Err(Error::Storage(format!(
                        "reference {name} targets unknown block {block}"
                    )));
                }
            }
        }
        for (name, target) in updates {
            match target {
                Some(block) => {
                    state.refs.insert(name.clone(), *block);
                }
                None => {
                    state.refs.remove(name);
                }
            }
        }
        Ok(())
    }

    fn scan_refs(&self, prefix: &str) -> Result<Vec<(String, BlockKey)>> {
        let state = self.read_state()?;
        Ok(state
            .refs
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, block)| (name.clone(), *block))
            .collect())
    }
}
