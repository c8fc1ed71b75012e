//! Namespaced, versioned key space over a block store
//!
//! A `Backend` owns one database namespace. It keeps an ordered in-memory
//! index of logical key -> (block address, version), where the version is
//! the commit sequence number that last touched the key. Values live in
//! the shared content-addressed block store behind an LRU cache.
//!
//! Commits are validated optimistically: every key a transaction read must
//! still carry the version it observed, and no key under a prefix it
//! scanned may have been touched after the scan's watermark. The later of
//! two overlapping committers gets a retryable conflict.

use crate::archive::NamespaceArchive;
use crate::block::{BlockKey, BlockStore, Bytes};
use crate::cache::{CacheStats, LruCache};
use crate::keys::{Namespace, SEQUENCE_KEY};
use nodus_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Index entry for one logical key
#[derive(Debug, Clone, Copy)]
struct Entry {
    /// `None` marks a key deleted since the backend was opened
    block: Option<BlockKey>,
    version: u64,
}

/// A pending mutation of one logical key
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put(Bytes),
    Delete,
}

/// What a transaction observed, validated at commit
#[derive(Debug, Default, Clone)]
pub struct ReadSet {
    /// Key -> version observed (0 when the key did not exist)
    pub keys: HashMap<String, u64>,
    /// Prefix -> commit sequence at the time of the scan
    pub prefixes: Vec<(String, u64)>,
}

impl ReadSet {
    /// True when nothing needs validating
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.prefixes.is_empty()
    }
}

/// One database's view of the block store
pub struct Backend {
    namespace: Namespace,
    store: Arc<dyn BlockStore>,
    index: RwLock<BTreeMap<String, Entry>>,
    cache: Mutex<LruCache<BlockKey, Bytes>>,
    committed_seq: Mutex<u64>,
    seq_changed: Condvar,
}

impl Backend {
    /// Open a namespace, loading its reference table into the index
    pub fn open(store: Arc<dyn BlockStore>, namespace: Namespace, cache_capacity: usize) -> Result<Self> {
        let refs = store.scan_refs(&namespace.prefix())?;
        let mut seq = 0u64;
        if let Some(block) = store.resolve_ref(&namespace.qualify(SEQUENCE_KEY))? {
            let bytes = store
                .get(&block)?
                .ok_or_else(|| Error::DataCorruption("sequence block missing".to_string()))?;
            seq = decode_seq(&bytes)?;
        }

        let mut index = BTreeMap::new();
        for (qualified, block) in refs {
            if let Some(logical) = namespace.strip(&qualified) {
                if logical == SEQUENCE_KEY {
                    continue;
                }
                index.insert(
                    logical.to_string(),
                    Entry {
                        block: Some(block),
                        version: seq,
                    },
                );
            }
        }

        info!(
            database = namespace.name(),
            keys = index.len(),
            seq,
            "Opened database backend"
        );

        Ok(Self {
            namespace,
            store,
            index: RwLock::new(index),
            cache: Mutex::new(LruCache::new(cache_capacity)),
            committed_seq: Mutex::new(seq),
            seq_changed: Condvar::new(),
        })
    }

    /// The namespace served by this backend
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Last committed sequence number
    pub fn committed_seq(&self) -> u64 {
        self.committed_seq.lock().map(|seq| *seq).unwrap_or(0)
    }

    /// Number of live logical keys
    pub fn key_count(&self) -> usize {
        self.index
            .read()
            .map(|index| index.values().filter(|e| e.block.is_some()).count())
            .unwrap_or(0)
    }

    /// Cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .lock()
            .map(|cache| cache.stats())
            .unwrap_or_default()
    }

    fn read_index(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Entry>>> {
        self.index
            .read()
            .map_err(|_| Error::Internal("Failed to acquire index lock".to_string()))
    }

    fn write_index(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Entry>>> {
        self.index
            .write()
            .map_err(|_| Error::Internal("Failed to acquire index lock".to_string()))
    }

    fn fetch_blocks(&self, keys: &[BlockKey]) -> Result<Vec<Bytes>> {
        let mut found: Vec<Option<Bytes>> = Vec::with_capacity(keys.len());
        let mut missing = Vec::new();
        {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| Error::Internal("Failed to acquire cache lock".to_string()))?;
            for (i, key) in keys.iter().enumerate() {
                let hit = cache.get(key);
                if hit.is_none() {
                    missing.push(i);
                }
                found.push(hit);
            }
        }

        if !missing.is_empty() {
            let wanted: Vec<BlockKey> = missing.iter().map(|&i| keys[i]).collect();
            let fetched = self.store.get_many(&wanted)?;
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| Error::Internal("Failed to acquire cache lock".to_string()))?;
            for (slot, (key, bytes)) in missing.into_iter().zip(wanted.into_iter().zip(fetched)) {
                let bytes = bytes.ok_or_else(|| {
                    Error::DataCorruption(format!("block {key} referenced but not stored"))
                })?;
                cache.insert(key, bytes.clone());
                found[slot] = Some(bytes);
            }
        }

        found
            .into_iter()
            .map(|b| b.ok_or_else(|| Error::Internal("unfilled block slot".to_string())))
            .collect()
    }

    /// Read one key, returning its value and the version observed
    pub fn read(&self, key: &str) -> Result<(Option<Bytes>, u64)> {
        let mut results = self.read_many(&[key])?;
        results
            .pop()
            .ok_or_else(|| Error::Internal("empty batch read".to_string()))
    }

    /// Batched read; versions are 0 for keys that never existed
    pub fn read_many(&self, keys: &[&str]) -> Result<Vec<(Option<Bytes>, u64)>> {
        let entries: Vec<Option<Entry>> = {
            let index = self.read_index()?;
            keys.iter().map(|k| index.get(*k).copied()).collect()
        };

        let blocks: Vec<BlockKey> = entries.iter().filter_map(|e| e.and_then(|e| e.block)).collect();
        let mut fetched = self.fetch_blocks(&blocks)?.into_iter();

        Ok(entries
            .into_iter()
            .map(|entry| match entry {
                Some(Entry {
                    block: Some(_),
                    version,
                }) => (fetched.next(), version),
                Some(Entry {
                    block: None,
                    version,
                }) => (None, version),
                None => (None, 0),
            })
            .collect())
    }

    /// List live keys under a prefix with the sequence watermark of the scan
    pub fn scan_keys(&self, prefix: &str) -> Result<(Vec<String>, u64)> {
        let index = self.read_index()?;
        let watermark = self.committed_seq();
        let keys = index
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.block.is_some())
            .map(|(k, _)| k.clone())
            .collect();
        Ok((keys, watermark))
    }

    /// List live keys and values under a prefix with the scan watermark
    pub fn scan(&self, prefix: &str) -> Result<(Vec<(String, Bytes)>, u64)> {
        let (keys, blocks, watermark) = {
            let index = self.read_index()?;
            let watermark = self.committed_seq();
            let mut keys = Vec::new();
            let mut blocks = Vec::new();
            for (k, e) in index
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
            {
                if let Some(block) = e.block {
                    keys.push(k.clone());
                    blocks.push(block);
                }
            }
            (keys, blocks, watermark)
        };
        let values = self.fetch_blocks(&blocks)?;
        Ok((keys.into_iter().zip(values).collect(), watermark))
    }

    /// Validate a transaction and apply its writes atomically
    ///
    /// Returns the new commit sequence number, or the current one when
    /// there is nothing to write.
    pub fn commit(&self, reads: &ReadSet, writes: &BTreeMap<String, WriteOp>) -> Result<u64> {
        if writes.is_empty() {
            return Ok(self.committed_seq());
        }

        // Blocks are content-addressed, so storing them before validation
        // is harmless if the commit is later rejected.
        let payloads: Vec<&[u8]> = writes
            .values()
            .filter_map(|op| match op {
                WriteOp::Put(bytes) => Some(&bytes[..]),
                WriteOp::Delete => None,
            })
            .collect();
        let mut block_keys = self.store.put_many(&payloads)?.into_iter();

        let mut index = self.write_index()?;
        validate(&index, reads)?;

        let seq = self.committed_seq() + 1;
        let seq_bytes = encode_seq(seq);
        let seq_block = self.store.put(&seq_bytes)?;

        let mut updates = Vec::with_capacity(writes.len() + 1);
        let mut applied = Vec::with_capacity(writes.len());
        for (key, op) in writes {
            let block = match op {
                WriteOp::Put(_) => Some(
                    block_keys
                        .next()
                        .ok_or_else(|| Error::Internal("block batch too short".to_string()))?,
                ),
                WriteOp::Delete => None,
            };
            updates.push((self.namespace.qualify(key), block));
            applied.push((key.clone(), block));
        }
        updates.push((self.namespace.qualify(SEQUENCE_KEY), Some(seq_block)));

        self.store.update_refs(&updates)?;

        for (key, block) in applied {
            index.insert(key, Entry { block, version: seq });
        }

        {
            let mut committed = self
                .committed_seq
                .lock()
                .map_err(|_| Error::Internal("Failed to acquire sequence lock".to_string()))?;
            *committed = seq;
        }
        self.seq_changed.notify_all();
        drop(index);

        debug!(
            database = self.namespace.name(),
            seq,
            writes = writes.len(),
            "Committed transaction"
        );
        Ok(seq)
    }

    /// Block until `seq` is committed or the timeout elapses
    pub fn wait_for_seq(&self, seq: u64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut committed = self
            .committed_seq
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire sequence lock".to_string()))?;
        while *committed < seq {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    database = self.namespace.name(),
                    wanted = seq,
                    committed = *committed,
                    "Bookmark wait timed out"
                );
                return Err(Error::Bookmark(format!(
                    "database '{}' has not reached sequence {seq} (at {})",
                    self.namespace.name(),
                    *committed
                )));
            }
            let (guard, _) = self
                .seq_changed
                .wait_timeout(committed, deadline - now)
                .map_err(|_| Error::Internal("Failed to acquire sequence lock".to_string()))?;
            committed = guard;
        }
        Ok(())
    }

    /// Export this namespace to a portable archive
    ///
    /// Holds the index lock so the archive reflects one commit boundary.
    pub fn export(&self) -> Result<NamespaceArchive> {
        let _guard = self.read_index()?;
        self.store.export_namespace(&self.namespace)
    }
}

fn validate(index: &BTreeMap<String, Entry>, reads: &ReadSet) -> Result<()> {
    for (key, observed) in &reads.keys {
        let current = index.get(key).map(|e| e.version).unwrap_or(0);
        if current != *observed {
            warn!(key = key.as_str(), observed, current, "Read-set conflict");
            return Err(Error::conflict(format!(
                "key {key} changed after it was read (version {observed} -> {current})"
            )));
        }
    }
    for (prefix, watermark) in &reads.prefixes {
        let touched = index
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(prefix.as_str()))
            .find(|(_, e)| e.version > *watermark);
        if let Some((key, entry)) = touched {
            warn!(prefix = prefix.as_str(), key = key.as_str(), "Scanned-range conflict");
            return Err(Error::conflict(format!(
                "key {key} under scanned prefix {prefix} committed at {} after scan at {watermark}",
                entry.version
            )));
        }
    }
    Ok(())
}

fn encode_seq(seq: u64) -> Vec<u8> {
    let mut bytes = SEQUENCE_KEY.as_bytes().to_vec();
    bytes.extend_from_slice(&seq.to_be_bytes());
    bytes
}

fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let raw = bytes
        .strip_prefix(SEQUENCE_KEY.as_bytes())
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .ok_or_else(|| Error::DataCorruption("malformed sequence block".to_string()))?;
    Ok(u64::from_be_bytes(raw))
}
