//! Graph instance implementation

use crate::schema::{Constraint, ConstraintType, Index, Schema};
use crate::statistics::Statistics;
use crate::transaction::GraphTransaction;
use nodus_core::{Error, IdGenerator, Node, Relationship, Result};
use nodus_storage::keys::KeyBuilder;
use nodus_storage::{AccessMode, Backend, Transaction};
use std::sync::{Arc, RwLock};
use tracing::info;

/// A graph instance: one database namespace seen as nodes and relationships
///
/// Cloning is cheap; clones share the backend, id generator, cached schema
/// and statistics.
#[derive(Clone)]
pub struct Graph {
    /// Name of the graph (the database name)
    name: String,

    /// Versioned key space of this database
    backend: Arc<Backend>,

    /// ID generator for this graph
    id_gen: Arc<IdGenerator>,

    /// Latest schema snapshot seen by any transaction
    schema: Arc<RwLock<Arc<Schema>>>,

    /// Planner statistics
    statistics: Arc<RwLock<Statistics>>,
}

impl Graph {
    /// Open a graph over a backend, rebuilding ids, schema and statistics
    pub fn open(backend: Arc<Backend>) -> Result<Self> {
        let name = backend.namespace().name().to_string();
        let id_gen = IdGenerator::new();
        let mut statistics = Statistics::new();

        let mut tx = Transaction::begin(backend.clone(), AccessMode::Read);
        let schema = Schema::load(&mut tx)?;
        let indexes: Vec<Index> = schema.indexes.iter().cloned().collect();
        for index in &indexes {
            statistics.track_index(index.clone());
        }

        for (_, bytes) in tx.scan(&KeyBuilder::node_prefix())? {
            let node: Node = crate::schema::decode(&bytes)?;
            id_gen.observe_node_id(node.id);
            statistics.observe_node(&node, &indexes);
        }
        for (_, bytes) in tx.scan(&KeyBuilder::relationship_prefix())? {
            let rel: Relationship = crate::schema::decode(&bytes)?;
            id_gen.observe_relationship_id(rel.id);
            statistics.observe_relationship(&rel);
        }
        tx.rollback()?;

        info!(
            graph = %name,
            nodes = statistics.node_count(),
            relationships = statistics.relationship_count(),
            indexes = schema.indexes.len(),
            constraints = schema.constraints.len(),
            "Opened graph"
        );

        Ok(Self {
            name,
            backend,
            id_gen: Arc::new(id_gen),
            schema: Arc::new(RwLock::new(Arc::new(schema))),
            statistics: Arc::new(RwLock::new(statistics)),
        })
    }

    /// Get the graph name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the backend serving this graph
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub(crate) fn id_generator(&self) -> &IdGenerator {
        &self.id_gen
    }

    /// Latest known schema snapshot
    pub fn schema(&self) -> Result<Arc<Schema>> {
        let schema = self
            .schema
            .read()
            .map_err(|_| Error::Internal("Failed to acquire schema lock".to_string()))?;
        Ok(schema.clone())
    }

    /// Replace the cached schema if `schema` is newer
    pub(crate) fn install_schema(&self, schema: Arc<Schema>) -> Result<()> {
        let mut current = self
            .schema
            .write()
            .map_err(|_| Error::Internal("Failed to acquire schema lock".to_string()))?;
        if schema.version > current.version {
            *current = schema;
        }
        Ok(())
    }

    /// Snapshot of the planner statistics
    pub fn statistics(&self) -> Result<Statistics> {
        let stats = self
            .statistics
            .read()
            .map_err(|_| Error::Internal("Failed to acquire statistics lock".to_string()))?;
        Ok(stats.clone())
    }

    pub(crate) fn update_statistics(&self, f: impl FnOnce(&mut Statistics)) -> Result<()> {
        let mut stats = self
            .statistics
            .write()
            .map_err(|_| Error::Internal("Failed to acquire statistics lock".to_string()))?;
        f(&mut stats);
        Ok(())
    }

    /// Begin a transaction on this graph
    pub fn begin(&self, mode: AccessMode) -> Result<GraphTransaction> {
        GraphTransaction::begin(self.clone(), mode)
    }

    // ========== Schema Operations ==========

    /// Declare an index on (label, property), back-filling existing nodes
    ///
    /// Returns false when the index already exists.
    pub fn create_index(&self, label: &str, property: &str) -> Result<bool> {
        let mut tx = self.begin(AccessMode::Write)?;
        let created = tx.declare_index(Index::new(label, property))?;
        tx.commit()?;
        if created {
            info!(graph = %self.name, label, property, "Created index");
        }
        Ok(created)
    }

    /// Declare a constraint, failing if existing data already violates it
    ///
    /// A unique constraint also declares the matching index. Returns false
    /// when the constraint already exists.
    pub fn add_constraint(&self, label: &str, property: &str, kind: ConstraintType) -> Result<bool> {
        let constraint = match kind {
            ConstraintType::Unique => Constraint::unique(label, property),
            ConstraintType::Exists => Constraint::exists(label, property),
        };
        let mut tx = self.begin(AccessMode::Write)?;
        let created = tx.declare_constraint(constraint)?;
        tx.commit()?;
        if created {
            info!(graph = %self.name, label, property, kind = kind.as_str(), "Added constraint");
        }
        Ok(created)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodus_core::{Direction, Property, Value};
    use nodus_storage::{BlockStore, MemoryBlockStore, Namespace};

    fn open_graph(store: &Arc<dyn BlockStore>, name: &str) -> Graph {
        let backend = Backend::open(store.clone(), Namespace::new(name).unwrap(), 256).unwrap();
        Graph::open(Arc::new(backend)).unwrap()
    }

    fn create_test_graph() -> Graph {
        let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        open_graph(&store, "test")
    }

    #[test]
    fn test_create_node() {
        let graph = create_test_graph();
        let mut tx = graph.begin(AccessMode::Write).unwrap();
        let node = tx.create_node(["Person"], Property::new()).unwrap();
        assert!(node.has_label_name("Person"));
        tx.commit().unwrap();

        let mut reader = graph.begin(AccessMode::Read).unwrap();
        let retrieved = reader.get_node(node.id).unwrap().unwrap();
        assert_eq!(retrieved.id, node.id);
    }

    #[test]
    fn test_create_index_backfills() {
        let graph = create_test_graph();
        let mut tx = graph.begin(AccessMode::Write).unwrap();
        tx.create_node(["Person"], Property::with("name", "Alice")).unwrap();
        tx.create_node(["Person"], Property::with("name", "Bob")).unwrap();
        tx.commit().unwrap();

        assert!(graph.create_index("Person", "name").unwrap());
        assert!(!graph.create_index("Person", "name").unwrap());
        assert!(graph.schema().unwrap().has_index("Person", "name"));

        let stats = graph.statistics().unwrap();
        let idx = stats.index("Person", "name").unwrap();
        assert_eq!(idx.entries, 2);
        assert_eq!(idx.distinct_values, 2);

        let mut reader = graph.begin(AccessMode::Read).unwrap();
        let found = reader
            .index_seek("Person", "name", &Value::from("Alice"))
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_unique_constraint_rejects_existing_duplicates() {
        let graph = create_test_graph();
        let mut tx = graph.begin(AccessMode::Write).unwrap();
        tx.create_node(["User"], Property::with("email", "a@x")).unwrap();
        tx.create_node(["User"], Property::with("email", "a@x")).unwrap();
        tx.commit().unwrap();

        let err = graph
            .add_constraint("User", "email", ConstraintType::Unique)
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert!(graph.schema().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_rebuilds_state() {
        let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let first_id = {
            let graph = open_graph(&store, "reopen");
            graph.create_index("Person", "name").unwrap();
            let mut tx = graph.begin(AccessMode::Write).unwrap();
            let a = tx.create_node(["Person"], Property::with("name", "A")).unwrap();
            let b = tx.create_node(["Person"], Property::new()).unwrap();
            tx.create_relationship(a.id, b.id, "KNOWS", Property::new())
                .unwrap();
            tx.commit().unwrap();
            b.id
        };

        let graph = open_graph(&store, "reopen");
        let stats = graph.statistics().unwrap();
        assert_eq!(stats.node_count(), 2);
        assert_eq!(stats.relationship_count(), 1);
        assert_eq!(stats.index("Person", "name").unwrap().entries, 1);
        assert!(graph.schema().unwrap().has_index("Person", "name"));

        let mut tx = graph.begin(AccessMode::Write).unwrap();
        let fresh = tx.create_node(["Person"], Property::new()).unwrap();
        assert!(fresh.id > first_id);
        assert_eq!(
            tx.relationships(first_id, Direction::Incoming, &[])
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_graphs_are_isolated() {
        let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let a = open_graph(&store, "a");
        let b = open_graph(&store, "b");

        let mut tx = a.begin(AccessMode::Write).unwrap();
        tx.create_node(["Secret"], Property::new()).unwrap();
        tx.commit().unwrap();

        let mut reader = b.begin(AccessMode::Read).unwrap();
        assert!(reader.scan_all_nodes().unwrap().is_empty());
        assert!(reader.scan_label("Secret").unwrap().is_empty());
    }
}
