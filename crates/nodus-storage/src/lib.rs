//! Nodus Storage Layer
//!
//! A namespaced, content-addressed key/value layer.
//!
//! # Architecture
//!
//! - `block` - the [`BlockStore`] trait: immutable blocks addressed by the
//!   xxh3-128 hash of their bytes plus a small named-reference table
//! - `rocks` - persistent block store on RocksDB (`blocks` and `refs`
//!   column families)
//! - `keys` - database namespaces (`db:<name>:<key>`) and graph key encoding
//! - `cache` - LRU cache placed in front of the block store
//! - `backend` - one database's versioned key space with optimistic commit
//! - `transaction` - buffered key-level transactions
//! - `archive` - portable namespace export/import

pub mod archive;
pub mod backend;
pub mod block;
pub mod cache;
pub mod keys;
pub mod options;
#[cfg(feature = "rocksdb")]
pub mod rocks;
pub mod transaction;

pub use archive::NamespaceArchive;
pub use backend::{Backend, ReadSet, WriteOp};
pub use block::{BlockKey, BlockStore, Bytes, MemoryBlockStore};
pub use cache::{CacheStats, LruCache};
pub use keys::{KeyBuilder, KeyDecoder, Namespace};
pub use options::StorageOptions;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksBlockStore;
pub use transaction::{AccessMode, Transaction, TransactionState};
