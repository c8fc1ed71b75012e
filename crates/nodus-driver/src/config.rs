//! Driver configuration

use nodus_core::{Error, Result};
use nodus_storage::Namespace;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where the driver keeps its blocks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local block store, lost on drop
    #[default]
    Memory,

    /// RocksDB block store at `path`
    Rocksdb {
        path: PathBuf,
        #[serde(default)]
        sync_writes: bool,
    },
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_database() -> String {
    "neo4j".to_string()
}

fn default_bookmark_timeout_ms() -> u64 {
    5_000
}

fn default_max_var_length() -> u32 {
    10
}

fn default_max_expression_depth() -> usize {
    nodus_query::DEFAULT_MAX_EXPRESSION_DEPTH
}

fn default_true() -> bool {
    true
}

/// Configuration for a [`Driver`](crate::Driver)
///
/// Every field has a default, so `{}` is a valid JSON configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    /// LRU entries per database backend
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Database used by [`Driver::default_session`](crate::Driver::default_session)
    #[serde(default = "default_database")]
    pub default_database: String,

    /// Deadline applied to every query unless overridden; `None` is unbounded
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,

    /// How long a session waits for its input bookmarks to become visible
    #[serde(default = "default_bookmark_timeout_ms")]
    pub bookmark_timeout_ms: u64,

    /// Upper bound for `*` and `*n..` relationship patterns
    #[serde(default = "default_max_var_length")]
    pub max_var_length: u32,

    /// Deepest expression nesting a query may use
    #[serde(default = "default_max_expression_depth")]
    pub max_expression_depth: usize,

    #[serde(default = "default_true")]
    pub predicate_pushdown: bool,

    /// Plan with per-label and per-index statistics
    #[serde(default = "default_true")]
    pub statistics: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            cache_capacity: default_cache_capacity(),
            default_database: default_database(),
            query_timeout_ms: None,
            bookmark_timeout_ms: default_bookmark_timeout_ms(),
            max_var_length: default_max_var_length(),
            max_expression_depth: default_max_expression_depth(),
            predicate_pushdown: true,
            statistics: true,
        }
    }
}

impl DriverConfig {
    /// In-memory configuration with small caches and short waits
    pub fn for_testing() -> Self {
        Self {
            cache_capacity: 256,
            query_timeout_ms: Some(10_000),
            bookmark_timeout_ms: 500,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid driver configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the driver cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(Error::Configuration(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_var_length == 0 {
            return Err(Error::Configuration(
                "max_var_length must be at least 1".to_string(),
            ));
        }
        if self.max_expression_depth == 0 {
            return Err(Error::Configuration(
                "max_expression_depth must be at least 1".to_string(),
            ));
        }
        Namespace::new(&self.default_database).map_err(|e| {
            Error::Configuration(format!("invalid default_database: {e}"))
        })?;
        if let StorageConfig::Rocksdb { path, .. } = &self.storage {
            if path.as_os_str().is_empty() {
                return Err(Error::Configuration(
                    "rocksdb storage requires a path".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    pub fn bookmark_timeout(&self) -> Duration {
        Duration::from_millis(self.bookmark_timeout_ms)
    }

    // ========== Builders ==========

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Use a RocksDB store at `path`
    pub fn with_rocksdb<P: Into<PathBuf>>(self, path: P) -> Self {
        self.with_storage(StorageConfig::Rocksdb {
            path: path.into(),
            sync_writes: false,
        })
    }

    pub fn with_cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = entries;
        self
    }

    pub fn with_default_database(mut self, name: impl Into<String>) -> Self {
        self.default_database = name.into();
        self
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_bookmark_timeout(mut self, timeout: Duration) -> Self {
        self.bookmark_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_var_length(mut self, hops: u32) -> Self {
        self.max_var_length = hops;
        self
    }

    pub fn with_max_expression_depth(mut self, depth: usize) -> Self {
        self.max_expression_depth = depth;
        self
    }

    pub fn with_predicate_pushdown(mut self, enabled: bool) -> Self {
        self.predicate_pushdown = enabled;
        self
    }

    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.statistics = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = DriverConfig::from_json_str("{}").unwrap();
        assert_eq!(config, DriverConfig::default());
        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.query_timeout(), None);
        assert!(config.predicate_pushdown);
    }

    #[test]
    fn test_json_overrides() {
        let config = DriverConfig::from_json_str(
            r#"{
                "storage": {"kind": "rocksdb", "path": "/var/lib/nodus"},
                "default_database": "tenant-a",
                "query_timeout_ms": 250,
                "max_var_length": 4,
                "max_expression_depth": 16,
                "statistics": false
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.storage,
            StorageConfig::Rocksdb {
                path: PathBuf::from("/var/lib/nodus"),
                sync_writes: false
            }
        );
        assert_eq!(config.default_database, "tenant-a");
        assert_eq!(config.query_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.max_var_length, 4);
        assert_eq!(config.max_expression_depth, 16);
        assert!(!config.statistics);
        assert_eq!(config.cache_capacity, 10_000);
    }

    #[test]
    fn test_invalid_configuration() {
        for json in [
            r#"{"cache_capacity": 0}"#,
            r#"{"max_var_length": 0}"#,
            r#"{"max_expression_depth": 0}"#,
            r#"{"default_database": "no spaces"}"#,
            r#"{"storage": {"kind": "tape"}}"#,
            "not json",
        ] {
            assert!(
                matches!(DriverConfig::from_json_str(json), Err(Error::Configuration(_))),
                "{json} should be rejected"
            );
        }
    }

    #[test]
    fn test_builders() {
        let config = DriverConfig::for_testing()
            .with_default_database("graph")
            .with_query_timeout(Some(Duration::from_secs(2)))
            .with_predicate_pushdown(false)
            .with_rocksdb("/tmp/nodus");
        assert_eq!(config.query_timeout_ms, Some(2_000));
        assert!(!config.predicate_pushdown);
        assert!(matches!(config.storage, StorageConfig::Rocksdb { .. }));
        assert!(config.validate().is_ok());
    }
}
