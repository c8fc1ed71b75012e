//! RocksDB-backed block store
//!
//! Two column families: `blocks` maps a 16-byte block address to its
//! payload, `refs` maps a qualified logical key to a block address.

use crate::block::{BlockKey, BlockStore, Bytes};
use crate::options::StorageOptions;
use nodus_core::{Error, Result};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options, WriteBatch, WriteOptions};
use std::sync::Arc;
use tracing::{debug, info};

/// Column family names
pub mod cf {
    pub const BLOCKS: &str = "blocks";
    pub const REFS: &str = "refs";
}

/// All column families used by the block store
pub const COLUMN_FAMILIES: &[&str] = &[cf::BLOCKS, cf::REFS];

/// Persistent block store
pub struct RocksBlockStore {
    db: Arc<DB>,
    options: StorageOptions,
}

impl RocksBlockStore {
    /// Open or create a block store
    pub fn open(options: StorageOptions) -> Result<Self> {
        options.validate()?;
        info!("Opening block store at {:?}", options.path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(options.create_if_missing);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(options.write_buffer_size);
        db_opts.set_max_write_buffer_number(options.max_write_buffer_number);
        db_opts.set_target_file_size_base(options.target_file_size_base);
        db_opts.set_max_bytes_for_level_base(options.max_bytes_for_level_base);
        db_opts.set_max_background_jobs(options.max_background_jobs);
        if options.compression {
            db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let cache = rocksdb::Cache::new_lru_cache(options.block_cache_size);
        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_block_cache(&cache);
                if let Some(bits) = options.bloom_filter_bits {
                    block_opts.set_bloom_filter(bits as f64, false);
                }
                let mut cf_opts = Options::default();
                cf_opts.set_block_based_table_factory(&block_opts);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, &options.path, cf_descriptors)
            .map_err(|e| Error::Storage(e.to_string()))?;

        info!("Block store opened successfully");

        Ok(Self {
            db: Arc::new(db),
            options,
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Internal(format!("Column family not found: {}", name)))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.options.sync_writes);
        opts
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> Result<()> {
        for name in COLUMN_FAMILIES {
            self.db
                .flush_cf(self.cf(name)?)
                .map_err(|e| Error::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// Compact both column families
    pub fn compact(&self) -> Result<()> {
        for name in COLUMN_FAMILIES {
            self.db
                .compact_range_cf(self.cf(name)?, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }
}

impl BlockStore for RocksBlockStore {
    fn get(&self, key: &BlockKey) -> Result<Option<Bytes>> {
        let value = self
            .db
            .get_cf(self.cf(cf::BLOCKS)?, key.to_bytes())
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(value.map(Arc::from))
    }

    fn put(&self, bytes: &[u8]) -> Result<BlockKey> {
        let key = BlockKey::of(bytes);
        if !self.contains(&key)? {
            self.db
                .put_cf_opt(self.cf(cf::BLOCKS)?, key.to_bytes(), bytes, &self.write_options())
                .map_err(|e| Error::Storage(e.to_string()))?;
        }
        Ok(key)
    }

    fn contains(&self, key: &BlockKey) -> Result<bool> {
        let present = self
            .db
            .get_pinned_cf(self.cf(cf::BLOCKS)?, key.to_bytes())
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(present.is_some())
    }

    fn get_many(&self, keys: &[BlockKey]) -> Result<Vec<Option<Bytes>>> {
        let cf = self.cf(cf::BLOCKS)?;
        self.db
            .multi_get_cf(keys.iter().map(|k| (cf, k.to_bytes())))
            .into_iter()
            .map(|res| {
                res.map(|value| value.map(Arc::from))
                    .map_err(|e| Error::Storage(e.to_string()))
            })
            .collect()
    }

    fn put_many(&self, blocks: &[&[u8]]) -> Result<Vec<BlockKey>> {
        let cf = self.cf(cf::BLOCKS)?;
        let mut batch = WriteBatch::default();
        let mut keys = Vec::with_capacity(blocks.len());
        for bytes in blocks {
            let key = BlockKey::of(bytes);
            batch.put_cf(cf, key.to_bytes(), bytes);
            keys.push(key);
        }
        self.db
            .write_opt(batch, &self.write_options())
            .map_err(|e| Error::Storage(e.to_string()))?;
        debug!(blocks = keys.len(), "Wrote block batch");
        Ok(keys)
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<BlockKey>> {
        let value = self
            .db
            .get_cf(self.cf(cf::REFS)?, name.as_bytes())
            .map_err(|e| Error::Storage(e.to_string()))?;
        value.map(|v| BlockKey::from_bytes(&v)).transpose()
    }

    fn update_refs(&self, updates: &[(String, Option<BlockKey>)]) -> Result<()> {
        let cf = self.cf(cf::REFS)?;
        let mut batch = WriteBatch::default();
        for (name, target) in updates {
            match target {
                Some(block) => batch.put_cf(cf, name.as_bytes(), block.to_bytes()),
                None => batch.delete_cf(cf, name.as_bytes()),
            }
        }
        self.db
            .write_opt(batch, &self.write_options())
            .map_err(|e| Error::Storage(e.to_string()))
    }

    fn scan_refs(&self, prefix: &str) -> Result<Vec<(String, BlockKey)>> {
        let cf = self.cf(cf::REFS)?;
        let mut refs = Vec::new();
        let iter = self.db.prefix_iterator_cf(cf, prefix.as_bytes());

        for item in iter {
            let (key, value) = item.map_err(|e| Error::Storage(e.to_string()))?;

            // Check if we're still in the prefix
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }

            let name = String::from_utf8(key.to_vec())
                .map_err(|e| Error::DataCorruption(format!("non-utf8 reference name: {e}")))?;
            refs.push((name, BlockKey::from_bytes(&value)?));
        }

        Ok(refs)
    }
}
