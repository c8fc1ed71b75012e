//! Driver: entry point owning the block store and the per-database graphs

use crate::bookmark::Bookmark;
use crate::config::{DriverConfig, StorageConfig};
use crate::session::Session;
use nodus_core::{Error, Result};
use nodus_graph::{ConstraintType, Graph, Statistics};
use nodus_query::{FunctionRegistry, PlannerOptions, QueryEngine, SimilarityScorer};
use nodus_storage::{AccessMode, Backend, BlockStore, MemoryBlockStore, Namespace, NamespaceArchive};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

pub(crate) struct DriverShared {
    pub(crate) config: DriverConfig,
    store: Arc<dyn BlockStore>,
    graphs: RwLock<HashMap<String, Graph>>,
    pub(crate) engine: QueryEngine,
}

/// Handle to a graph database store
///
/// Cheap to clone. Each database name maps to one graph backend, created
/// on first reference and shared by every later session on that name.
#[derive(Clone)]
pub struct Driver {
    shared: Arc<DriverShared>,
}

/// Builder for a [`Driver`] with a custom store, scorer or function registry
pub struct DriverBuilder {
    config: DriverConfig,
    store: Option<Arc<dyn BlockStore>>,
    scorer: Option<Arc<dyn SimilarityScorer>>,
    functions: Option<FunctionRegistry>,
}

impl DriverBuilder {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            store: None,
            scorer: None,
            functions: None,
        }
    }

    /// Use an existing block store instead of the configured one
    pub fn store(mut self, store: Arc<dyn BlockStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Enable `similarity()` predicates with this scorer
    pub fn scorer(mut self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn build(self) -> Result<Driver> {
        self.config.validate()?;
        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config)?,
        };

        let mut engine = QueryEngine::new().with_options(PlannerOptions {
            predicate_pushdown: self.config.predicate_pushdown,
            max_var_length: self.config.max_var_length,
            similarity_enabled: false,
            max_expression_depth: self.config.max_expression_depth,
        });
        if let Some(functions) = self.functions {
            engine = engine.with_functions(functions);
        }
        if let Some(scorer) = self.scorer {
            engine = engine.with_scorer(scorer);
        }

        info!(storage = ?self.config.storage, "Opened driver");
        Ok(Driver {
            shared: Arc::new(DriverShared {
                config: self.config,
                store,
                graphs: RwLock::new(HashMap::new()),
                engine,
            }),
        })
    }
}

fn open_store(config: &DriverConfig) -> Result<Arc<dyn BlockStore>> {
    match &config.storage {
        StorageConfig::Memory => Ok(Arc::new(MemoryBlockStore::new())),
        #[cfg(feature = "rocksdb")]
        StorageConfig::Rocksdb { path, sync_writes } => {
            let options = nodus_storage::StorageOptions::new(path)
                .cache_capacity(config.cache_capacity)
                .sync_writes(*sync_writes);
            Ok(Arc::new(nodus_storage::RocksBlockStore::open(options)?))
        }
        #[cfg(not(feature = "rocksdb"))]
        StorageConfig::Rocksdb { .. } => Err(Error::Configuration(
            "rocksdb storage requires the `rocksdb` feature".to_string(),
        )),
    }
}

impl Driver {
    /// Open a driver with the configured store
    pub fn open(config: DriverConfig) -> Result<Self> {
        DriverBuilder::new(config).build()
    }

    pub fn builder(config: DriverConfig) -> DriverBuilder {
        DriverBuilder::new(config)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.shared.engine
    }

    /// Open a session on `database`
    ///
    /// The session waits for every bookmark naming `database` before its
    /// first read.
    pub fn session(
        &self,
        database: &str,
        mode: AccessMode,
        bookmarks: Vec<Bookmark>,
    ) -> Result<Session> {
        let graph = self.graph(database)?;
        debug!(database, ?mode, bookmarks = bookmarks.len(), "Opened session");
        Ok(Session::new(self.shared.clone(), graph, mode, bookmarks))
    }

    /// Open a session on the configured default database
    pub fn default_session(&self, mode: AccessMode) -> Result<Session> {
        self.session(&self.shared.config.default_database, mode, Vec::new())
    }

    /// Graph for `database`, opening its backend on first use
    pub fn graph(&self, database: &str) -> Result<Graph> {
        {
            let graphs = self
                .shared
                .graphs
                .read()
                .map_err(|_| Error::Internal("Failed to acquire graphs lock".to_string()))?;
            if let Some(graph) = graphs.get(database) {
                return Ok(graph.clone());
            }
        }

        let namespace = Namespace::new(database)?;
        let mut graphs = self
            .shared
            .graphs
            .write()
            .map_err(|_| Error::Internal("Failed to acquire graphs lock".to_string()))?;
        if let Some(graph) = graphs.get(database) {
            return Ok(graph.clone());
        }

        let backend = Backend::open(
            self.shared.store.clone(),
            namespace,
            self.shared.config.cache_capacity,
        )?;
        let graph = Graph::open(Arc::new(backend))?;
        graphs.insert(database.to_string(), graph.clone());
        info!(database, "Opened database");
        Ok(graph)
    }

    /// Names of every database with stored data or an open backend
    pub fn databases(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for (key, _) in self.shared.store.scan_refs(Namespace::ROOT)? {
            if let Some(name) = Namespace::name_of(&key) {
                names.insert(name.to_string());
            }
        }
        let graphs = self
            .shared
            .graphs
            .read()
            .map_err(|_| Error::Internal("Failed to acquire graphs lock".to_string()))?;
        names.extend(graphs.keys().cloned());
        Ok(names.into_iter().collect())
    }

    /// Snapshot every committed block of `database` into an archive
    pub fn export_database(&self, database: &str) -> Result<NamespaceArchive> {
        self.graph(database)?.backend().export()
    }

    /// Load an archive into this driver's store, optionally under a new name
    ///
    /// The target database must be empty and not yet opened. Returns the
    /// name the data was imported as.
    pub fn import_database(
        &self,
        archive: &NamespaceArchive,
        rename: Option<&str>,
    ) -> Result<String> {
        let target = rename.map(Namespace::new).transpose()?;
        let name = target
            .as_ref()
            .map(|ns| ns.name().to_string())
            .unwrap_or_else(|| archive.namespace.clone());

        let graphs = self
            .shared
            .graphs
            .write()
            .map_err(|_| Error::Internal("Failed to acquire graphs lock".to_string()))?;
        if graphs.contains_key(&name) {
            return Err(Error::Namespace(format!(
                "cannot import into open database '{name}'"
            )));
        }
        let imported = self.shared.store.import_namespace(archive, target.as_ref())?;
        drop(graphs);

        debug!(source = %archive.namespace, database = imported.name(), "Imported database");
        Ok(imported.name().to_string())
    }

    /// Planner statistics of `database`
    pub fn statistics(&self, database: &str) -> Result<Statistics> {
        self.graph(database)?.statistics()
    }

    /// Create an index on `(label, property)`; false if it already exists
    pub fn create_index(&self, database: &str, label: &str, property: &str) -> Result<bool> {
        self.graph(database)?.create_index(label, property)
    }

    /// Add a unique or existence constraint; false if it already exists
    pub fn add_constraint(
        &self,
        database: &str,
        label: &str,
        property: &str,
        kind: ConstraintType,
    ) -> Result<bool> {
        self.graph(database)?.add_constraint(label, property, kind)
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("config", &self.shared.config)
            .field("engine", &self.shared.engine)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn driver() -> Driver {
        Driver::open(DriverConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_graph_is_cached_per_database() {
        let driver = driver();
        let a = driver.graph("alpha").unwrap();
        let again = driver.graph("alpha").unwrap();
        assert!(Arc::ptr_eq(a.backend(), again.backend()));

        let b = driver.graph("beta").unwrap();
        assert!(!Arc::ptr_eq(a.backend(), b.backend()));
        assert_eq!(driver.databases().unwrap(), ["alpha", "beta"]);
    }

    #[test]
    fn test_invalid_database_name() {
        let driver = driver();
        assert!(matches!(
            driver.session("no:colons", AccessMode::Read, Vec::new()),
            Err(Error::Namespace(_))
        ));
    }

    #[test]
    fn test_databases_lists_stored_namespaces() {
        let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        {
            let driver = Driver::builder(DriverConfig::for_testing())
                .store(store.clone())
                .build()
                .unwrap();
            let mut session = driver.session("stored", AccessMode::Write, Vec::new()).unwrap();
            session.run("CREATE (:Thing)", HashMap::new()).unwrap();
        }

        let reopened = Driver::builder(DriverConfig::for_testing())
            .store(store)
            .build()
            .unwrap();
        assert_eq!(reopened.databases().unwrap(), ["stored"]);
    }

    #[test]
    fn test_import_into_open_database_is_rejected() {
        let driver = driver();
        let mut session = driver.session("src", AccessMode::Write, Vec::new()).unwrap();
        session.run("CREATE (:Thing)", HashMap::new()).unwrap();
        let archive = driver.export_database("src").unwrap();

        driver.graph("busy").unwrap();
        assert!(matches!(
            driver.import_database(&archive, Some("busy")),
            Err(Error::Namespace(_))
        ));
        assert_eq!(driver.import_database(&archive, Some("copy")).unwrap(), "copy");
        assert_eq!(driver.statistics("copy").unwrap().node_count(), 1);
    }

    #[test]
    fn test_schema_administration() {
        let driver = driver();
        assert!(driver.create_index("admin", "Person", "name").unwrap());
        assert!(!driver.create_index("admin", "Person", "name").unwrap());
        assert!(
            driver
                .add_constraint("admin", "Person", "email", ConstraintType::Unique)
                .unwrap()
        );
        assert!(driver.graph("admin").unwrap().schema().unwrap().has_index("Person", "name"));
    }
}
