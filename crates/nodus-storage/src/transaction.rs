//! Key-level transactions over a [`Backend`]
//!
//! A transaction buffers its writes privately and records what it read.
//! Reads see the transaction's own pending writes. Nothing reaches the
//! backend until commit, where the read set is validated and the write
//! buffer is applied as one atomic batch.

use crate::backend::{Backend, ReadSet, WriteOp};
use crate::block::Bytes;
use nodus_core::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Global transaction ID counter
static TRANSACTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and accepting operations
    Active,
    /// Transaction has been committed
    Committed,
    /// Transaction has been rolled back
    RolledBack,
}

/// Whether a transaction may write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

/// A key-level optimistic transaction
pub struct Transaction {
    /// Transaction ID
    id: u64,

    backend: Arc<Backend>,
    mode: AccessMode,
    state: TransactionState,
    reads: ReadSet,
    writes: BTreeMap<String, WriteOp>,
}

impl Transaction {
    /// Begin a transaction against a backend
    pub fn begin(backend: Arc<Backend>, mode: AccessMode) -> Self {
        let id = TRANSACTION_COUNTER.fetch_add(1, Ordering::SeqCst);
        debug!(tx = id, database = backend.namespace().name(), ?mode, "Begin transaction");
        Self {
            id,
            backend,
            mode,
            state: TransactionState::Active,
            reads: ReadSet::default(),
            writes: BTreeMap::new(),
        }
    }

    /// Get the transaction ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the transaction state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Access mode fixed at begin
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// The backend this transaction runs against
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Check if transaction is active
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// True once anything has been buffered for writing
    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Get the number of pending writes
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    fn check_active(&self) -> Result<()> {
        if !self.is_active() {
            return Err(Error::Transaction(format!(
                "transaction {} is no longer active ({:?})",
                self.id, self.state
            )));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_active()?;
        if self.mode == AccessMode::Read {
            return Err(Error::Transaction(
                "cannot write in a read-only transaction".to_string(),
            ));
        }
        Ok(())
    }

    fn record_read(&mut self, key: &str, version: u64) {
        self.reads.keys.entry(key.to_string()).or_insert(version);
    }

    // ========== Reads ==========

    /// Read a key, seeing this transaction's own writes
    pub fn get(&mut self, key: &str) -> Result<Option<Bytes>> {
        self.check_active()?;
        if let Some(op) = self.writes.get(key) {
            return Ok(match op {
                WriteOp::Put(bytes) => Some(bytes.clone()),
                WriteOp::Delete => None,
            });
        }
        let (value, version) = self.backend.read(key)?;
        self.record_read(key, version);
        Ok(value)
    }

    /// Batched read preserving order
    pub fn get_many(&mut self, keys: &[&str]) -> Result<Vec<Option<Bytes>>> {
        self.check_active()?;
        let remote: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|k| !self.writes.contains_key(*k))
            .collect();
        let mut fetched = self.backend.read_many(&remote)?.into_iter();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match self.writes.get(*key) {
                Some(WriteOp::Put(bytes)) => out.push(Some(bytes.clone())),
                Some(WriteOp::Delete) => out.push(None),
                None => {
                    let (value, version) = fetched
                        .next()
                        .ok_or_else(|| Error::Internal("batched read too short".to_string()))?;
                    self.record_read(key, version);
                    out.push(value);
                }
            }
        }
        Ok(out)
    }

    /// Check key existence, recording the read
    pub fn contains(&mut self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Keys under a prefix, merged with pending writes, in key order
    pub fn scan_keys(&mut self, prefix: &str) -> Result<Vec<String>> {
        self.check_active()?;
        let (committed, watermark) = self.backend.scan_keys(prefix)?;
        self.reads.prefixes.push((prefix.to_string(), watermark));

        let mut merged: BTreeMap<String, bool> =
            committed.into_iter().map(|k| (k, true)).collect();
        for (key, op) in self
            .writes
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            merged.insert(key.clone(), matches!(op, WriteOp::Put(_)));
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, live)| live.then_some(k))
            .collect())
    }

    /// Keys and values under a prefix, merged with pending writes
    pub fn scan(&mut self, prefix: &str) -> Result<Vec<(String, Bytes)>> {
        self.check_active()?;
        let (committed, watermark) = self.backend.scan(prefix)?;
        self.reads.prefixes.push((prefix.to_string(), watermark));

        let mut merged: BTreeMap<String, Option<Bytes>> =
            committed.into_iter().map(|(k, v)| (k, Some(v))).collect();
        for (key, op) in self
            .writes
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            let value = match op {
                WriteOp::Put(bytes) => Some(bytes.clone()),
                WriteOp::Delete => None,
            };
            merged.insert(key.clone(), value);
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    // ========== Writes ==========

    /// Buffer a put
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) -> Result<()> {
        self.check_writable()?;
        self.writes.insert(key.into(), WriteOp::Put(Arc::from(value)));
        Ok(())
    }

    /// Buffer a delete
    pub fn delete(&mut self, key: impl Into<String>) -> Result<()> {
        self.check_writable()?;
        self.writes.insert(key.into(), WriteOp::Delete);
        Ok(())
    }

    // ========== Transaction Control ==========

    /// Commit the transaction, returning the commit sequence number
    ///
    /// On any error the write buffer is discarded and the transaction
    /// ends rolled back.
    pub fn commit(&mut self) -> Result<u64> {
        self.check_active()?;
        let result = self.backend.commit(&self.reads, &self.writes);
        self.writes.clear();
        self.reads = ReadSet::default();
        match result {
            Ok(seq) => {
                self.state = TransactionState::Committed;
                debug!(tx = self.id, seq, "Transaction committed");
                Ok(seq)
            }
            Err(e) => {
                self.state = TransactionState::RolledBack;
                debug!(tx = self.id, error = %e, "Transaction aborted at commit");
                Err(e)
            }
        }
    }

    /// Rollback the transaction, discarding all pending writes
    pub fn rollback(&mut self) -> Result<()> {
        self.check_active()?;
        self.writes.clear();
        self.reads = ReadSet::default();
        self.state = TransactionState::RolledBack;
        debug!(tx = self.id, "Transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockStore, MemoryBlockStore};
    use crate::keys::Namespace;

    fn create_test_backend() -> Arc<Backend> {
        let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        Arc::new(Backend::open(store, Namespace::new("test").unwrap(), 64).unwrap())
    }

    #[test]
    fn test_transaction_commit() {
        let backend = create_test_backend();
        let mut tx = Transaction::begin(backend.clone(), AccessMode::Write);
        assert!(tx.is_active());

        tx.put("node:1", b"alice".to_vec()).unwrap();

        // Visible in the transaction, not outside it
        assert!(tx.get("node:1").unwrap().is_some());
        assert!(backend.read("node:1").unwrap().0.is_none());

        assert_eq!(tx.commit().unwrap(), 1);
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(backend.read("node:1").unwrap().0.is_some());
    }

    #[test]
    fn test_transaction_rollback() {
        let backend = create_test_backend();
        let mut tx = Transaction::begin(backend.clone(), AccessMode::Write);
        tx.put("node:1", b"alice".to_vec()).unwrap();
        tx.rollback().unwrap();

        assert!(backend.read("node:1").unwrap().0.is_none());
        assert!(tx.put("node:2", vec![]).is_err());
        assert!(tx.commit().is_err());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let backend = create_test_backend();
        let mut tx = Transaction::begin(backend, AccessMode::Read);
        let err = tx.put("k", vec![1]).unwrap_err();
        assert_eq!(err.kind(), "TransactionError");
    }

    #[test]
    fn test_scan_merges_pending_writes() {
        let backend = create_test_backend();
        let mut setup = Transaction::begin(backend.clone(), AccessMode::Write);
        setup.put("label:A:1", vec![]).unwrap();
        setup.put("label:A:2", vec![]).unwrap();
        setup.commit().unwrap();

        let mut tx = Transaction::begin(backend, AccessMode::Write);
        tx.delete("label:A:1").unwrap();
        tx.put("label:A:3", vec![]).unwrap();
        assert_eq!(tx.scan_keys("label:A:").unwrap(), vec!["label:A:2", "label:A:3"]);
    }

    #[test]
    fn test_concurrent_writers_one_conflicts() {
        let backend = create_test_backend();
        let mut setup = Transaction::begin(backend.clone(), AccessMode::Write);
        setup.put("node:1", b"v0".to_vec()).unwrap();
        setup.commit().unwrap();

        let mut t1 = Transaction::begin(backend.clone(), AccessMode::Write);
        let mut t2 = Transaction::begin(backend.clone(), AccessMode::Write);
        t1.get("node:1").unwrap();
        t2.get("node:1").unwrap();
        t1.put("node:1", b"t1".to_vec()).unwrap();
        t2.put("node:1", b"t2".to_vec()).unwrap();

        t1.commit().unwrap();
        let err = t2.commit().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(t2.state(), TransactionState::RolledBack);
        assert_eq!(backend.read("node:1").unwrap().0.as_deref(), Some(&b"t1"[..]));
    }

    #[test]
    fn test_disjoint_writers_both_commit() {
        let backend = create_test_backend();
        let mut t1 = Transaction::begin(backend.clone(), AccessMode::Write);
        let mut t2 = Transaction::begin(backend.clone(), AccessMode::Write);
        t1.get("a").unwrap();
        t2.get("b").unwrap();
        t1.put("a", vec![1]).unwrap();
        t2.put("b", vec![2]).unwrap();
        t1.commit().unwrap();
        t2.commit().unwrap();
    }

    #[test]
    fn test_get_many_mixes_buffer_and_backend() {
        let backend = create_test_backend();
        let mut setup = Transaction::begin(backend.clone(), AccessMode::Write);
        setup.put("x", vec![1]).unwrap();
        setup.put("y", vec![2]).unwrap();
        setup.commit().unwrap();

        let mut tx = Transaction::begin(backend, AccessMode::Write);
        tx.put("y", vec![20]).unwrap();
        tx.delete("x").unwrap();
        let values = tx.get_many(&["x", "y", "z"]).unwrap();
        assert!(values[0].is_none());
        assert_eq!(values[1].as_deref(), Some(&[20u8][..]));
        assert!(values[2].is_none());
    }
}
