//! Storage configuration options

use nodus_core::{Error, Result};
use std::path::PathBuf;

const MB: usize = 1024 * 1024;

/// Options for the RocksDB block store and the per-database block cache
///
/// The write-ahead log is always enabled: reference batches must survive a
/// crash together with the blocks they point at.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Directory holding the RocksDB files
    pub path: PathBuf,

    pub create_if_missing: bool,

    /// Memtable size in bytes
    pub write_buffer_size: usize,

    pub max_write_buffer_number: i32,

    /// Target size of level-1 SST files
    pub target_file_size_base: u64,

    /// Total size budget of level 1
    pub max_bytes_for_level_base: u64,

    /// Flush and compaction threads
    pub max_background_jobs: i32,

    /// LZ4-compress SST blocks
    pub compression: bool,

    /// RocksDB block cache in bytes, shared by both column families
    pub block_cache_size: usize,

    /// Bloom filter bits per key; `None` disables the filter
    pub bloom_filter_bits: Option<i32>,

    /// fsync the WAL on every reference batch
    pub sync_writes: bool,

    /// Blocks held by each database's LRU cache
    pub cache_capacity: usize,
}

impl StorageOptions {
    /// Default options for a store at `path`
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Small buffers, no compression, no fsync
    pub fn for_testing<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_buffer_size: 4 * MB,
            max_write_buffer_number: 2,
            target_file_size_base: 4 * MB as u64,
            max_bytes_for_level_base: 16 * MB as u64,
            max_background_jobs: 2,
            compression: false,
            block_cache_size: 8 * MB,
            sync_writes: false,
            cache_capacity: 1024,
            ..Default::default()
        }
    }

    /// Large buffers and caches with synced commits
    pub fn for_production<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_buffer_size: 64 * MB,
            max_write_buffer_number: 4,
            target_file_size_base: 64 * MB as u64,
            max_bytes_for_level_base: 256 * MB as u64,
            max_background_jobs: 4,
            compression: true,
            block_cache_size: 512 * MB,
            sync_writes: true,
            cache_capacity: 100_000,
            ..Default::default()
        }
    }

    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    pub fn block_cache_size(mut self, size: usize) -> Self {
        self.block_cache_size = size;
        self
    }

    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn bloom_filter_bits(mut self, bits: Option<i32>) -> Self {
        self.bloom_filter_bits = bits;
        self
    }

    /// Per-database block cache capacity in entries
    pub fn cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = entries;
        self
    }

    /// Reject option combinations RocksDB or the block cache cannot use
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::Configuration("storage path is empty".to_string()));
        }
        if self.cache_capacity == 0 {
            return Err(Error::Configuration(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_write_buffer_number < 1 || self.max_background_jobs < 1 {
            return Err(Error::Configuration(
                "max_write_buffer_number and max_background_jobs must be positive".to_string(),
            ));
        }
        if matches!(self.bloom_filter_bits, Some(bits) if bits < 1) {
            return Err(Error::Configuration(
                "bloom_filter_bits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./nodus-data"),
            create_if_missing: true,
            write_buffer_size: 32 * MB,
            max_write_buffer_number: 3,
            target_file_size_base: 32 * MB as u64,
            max_bytes_for_level_base: 128 * MB as u64,
            max_background_jobs: 4,
            compression: true,
            block_cache_size: 128 * MB,
            bloom_filter_bits: Some(10),
            sync_writes: false,
            cache_capacity: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let testing = StorageOptions::for_testing("/tmp/test");
        assert!(!testing.sync_writes);
        assert!(!testing.compression);
        assert!(testing.validate().is_ok());

        let production = StorageOptions::for_production("/var/lib/nodus");
        assert!(production.sync_writes);
        assert!(production.compression);
        assert_eq!(production.bloom_filter_bits, Some(10));
        assert!(production.cache_capacity > StorageOptions::default().cache_capacity);
    }

    #[test]
    fn test_builders() {
        let opts = StorageOptions::new("/data")
            .write_buffer_size(128 * MB)
            .sync_writes(true)
            .compression(false)
            .bloom_filter_bits(None)
            .cache_capacity(16);

        assert_eq!(opts.write_buffer_size, 128 * MB);
        assert!(opts.sync_writes);
        assert!(!opts.compression);
        assert_eq!(opts.bloom_filter_bits, None);
        assert_eq!(opts.cache_capacity, 16);
    }

    #[test]
    fn test_validation() {
        assert!(StorageOptions::new("").validate().is_err());
        assert!(StorageOptions::new("/data").cache_capacity(0).validate().is_err());
        assert!(
            StorageOptions::new("/data")
                .bloom_filter_bits(Some(0))
                .validate()
                .is_err()
        );
    }
}
