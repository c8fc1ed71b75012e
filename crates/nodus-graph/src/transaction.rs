//! Graph-level transactions
//!
//! A [`GraphTransaction`] turns node and relationship operations into key
//! writes on a storage [`Transaction`], keeping the label, adjacency and
//! property index families in step with the entity records. Constraints are
//! checked once, at commit, against the transaction's final state.

use crate::graph::Graph;
use crate::schema::{self, Constraint, ConstraintType, Index, Schema, decode, encode};
use crate::statistics::StatsDelta;
use nodus_core::{
    Direction, EntityId, Error, Label, Node, NodeId, Property, Relationship, RelationshipId,
    Result, Value,
};
use nodus_storage::keys::{KeyBuilder, trailing_id};
use nodus_storage::{AccessMode, Transaction, TransactionState};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A transaction over one graph
pub struct GraphTransaction {
    graph: Graph,
    tx: Transaction,
    schema: Arc<Schema>,
    delta: StatsDelta,
    /// Nodes written by this transaction, checked against constraints
    touched: BTreeSet<NodeId>,
    /// Nodes deleted by this transaction, checked for dangling relationships
    deleted: BTreeSet<NodeId>,
    schema_changed: bool,
}

impl GraphTransaction {
    pub(crate) fn begin(graph: Graph, mode: AccessMode) -> Result<Self> {
        let mut tx = Transaction::begin(graph.backend().clone(), mode);
        let version = schema::read_version(&mut tx)?;
        let mut schema = graph.schema()?;
        if schema.version != version {
            debug!(graph = graph.name(), version, "Reloading schema");
            schema = Arc::new(Schema::load(&mut tx)?);
            graph.install_schema(schema.clone())?;
        }

        Ok(Self {
            graph,
            tx,
            schema,
            delta: StatsDelta::default(),
            touched: BTreeSet::new(),
            deleted: BTreeSet::new(),
            schema_changed: false,
        })
    }

    /// Storage transaction id
    pub fn id(&self) -> u64 {
        self.tx.id()
    }

    /// The graph this transaction runs against
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Access mode fixed at begin
    pub fn mode(&self) -> AccessMode {
        self.tx.mode()
    }

    /// Storage transaction state
    pub fn state(&self) -> TransactionState {
        self.tx.state()
    }

    /// True until commit or rollback
    pub fn is_active(&self) -> bool {
        self.tx.is_active()
    }

    /// True once anything has been buffered for writing
    pub fn has_writes(&self) -> bool {
        self.tx.has_writes()
    }

    /// Schema snapshot this transaction runs under
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    // ========== Node Operations ==========

    /// Create a node with labels and properties
    pub fn create_node<I, L>(&mut self, labels: I, properties: Property) -> Result<Node>
    where
        I: IntoIterator<Item = L>,
        L: Into<Label>,
    {
        check_storable(&properties)?;
        let id = self.graph.id_generator().next_node_id();
        let node = Node::with_labels_and_properties(id, labels, properties);

        self.tx.put(KeyBuilder::node(id), encode(&node)?)?;
        for label in &node.labels {
            self.tx.put(KeyBuilder::label_index(label.name(), id), Vec::new())?;
            self.delta.label(label, 1);
        }
        let schema = self.schema.clone();
        for index in &schema.indexes {
            if let Some(hash) = index_entry(&node, index) {
                self.put_index_entry(index, hash, id)?;
            }
        }
        self.delta.node(1);
        self.touched.insert(id);

        debug!(node = %id, "Created node");
        Ok(node)
    }

    /// Get a node by ID
    pub fn get_node(&mut self, id: NodeId) -> Result<Option<Node>> {
        match self.tx.get(&KeyBuilder::node(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get several nodes in one batched read, preserving order
    pub fn get_nodes(&mut self, ids: &[NodeId]) -> Result<Vec<Option<Node>>> {
        let keys: Vec<String> = ids.iter().map(|id| KeyBuilder::node(*id)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.tx
            .get_many(&refs)?
            .into_iter()
            .map(|bytes| bytes.map(|b| decode(&b)).transpose())
            .collect()
    }

    /// Write back a modified node, maintaining label and property indexes
    pub fn update_node(&mut self, node: &Node) -> Result<()> {
        check_storable(&node.properties)?;
        let old = self
            .get_node(node.id)?
            .ok_or_else(|| Error::NodeNotFound(node.id.to_string()))?;

        self.tx.put(KeyBuilder::node(node.id), encode(node)?)?;

        for label in old.labels.difference(&node.labels) {
            self.tx.delete(KeyBuilder::label_index(label.name(), node.id))?;
            self.delta.label(label, -1);
        }
        for label in node.labels.difference(&old.labels) {
            self.tx
                .put(KeyBuilder::label_index(label.name(), node.id), Vec::new())?;
            self.delta.label(label, 1);
        }

        let schema = self.schema.clone();
        for index in &schema.indexes {
            let before = index_entry(&old, index);
            let after = index_entry(node, index);
            if before == after {
                continue;
            }
            if let Some(hash) = before {
                self.delete_index_entry(index, hash, node.id)?;
            }
            if let Some(hash) = after {
                self.put_index_entry(index, hash, node.id)?;
            }
        }

        self.touched.insert(node.id);
        Ok(())
    }

    /// Delete a node, returning false if it did not exist
    ///
    /// With `detach` every attached relationship is deleted as well;
    /// otherwise the node must have none left by commit time.
    pub fn delete_node(&mut self, id: NodeId, detach: bool) -> Result<bool> {
        let Some(node) = self.get_node(id)? else {
            return Ok(false);
        };

        if detach {
            for rel in self.relationships(id, Direction::Both, &[])? {
                self.delete_relationship(rel.id)?;
            }
        }

        self.tx.delete(KeyBuilder::node(id))?;
        for label in &node.labels {
            self.tx.delete(KeyBuilder::label_index(label.name(), id))?;
            self.delta.label(label, -1);
        }
        let schema = self.schema.clone();
        for index in &schema.indexes {
            if let Some(hash) = index_entry(&node, index) {
                self.delete_index_entry(index, hash, id)?;
            }
        }
        self.delta.node(-1);
        self.touched.remove(&id);
        self.deleted.insert(id);

        debug!(node = %id, detach, "Deleted node");
        Ok(true)
    }

    /// IDs of the nodes carrying a label, in id order
    pub fn label_node_ids(&mut self, label: &str) -> Result<Vec<NodeId>> {
        Ok(self
            .tx
            .scan_keys(&KeyBuilder::label_index_prefix(label))?
            .iter()
            .filter_map(|key| trailing_id(key))
            .map(NodeId::from_internal)
            .collect())
    }

    /// IDs of every node, in id order
    pub fn all_node_ids(&mut self) -> Result<Vec<NodeId>> {
        Ok(self
            .tx
            .scan_keys(&KeyBuilder::node_prefix())?
            .iter()
            .filter_map(|key| trailing_id(key))
            .map(NodeId::from_internal)
            .collect())
    }

    /// Nodes carrying a label
    pub fn scan_label(&mut self, label: &str) -> Result<Vec<Node>> {
        let ids = self.label_node_ids(label)?;
        Ok(self.get_nodes(&ids)?.into_iter().flatten().collect())
    }

    /// Every node of the graph
    pub fn scan_all_nodes(&mut self) -> Result<Vec<Node>> {
        self.tx
            .scan(&KeyBuilder::node_prefix())?
            .iter()
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }

    /// Nodes with `label` whose `property` equals `value`
    ///
    /// Served from the property index when one is declared, otherwise by
    /// filtering a label scan.
    pub fn index_seek(&mut self, label: &str, property: &str, value: &Value) -> Result<Vec<Node>> {
        if value.is_null() {
            return Ok(Vec::new());
        }
        let candidates = if self.schema.has_index(label, property) {
            let prefix = KeyBuilder::property_index_value_prefix(label, property, value.stable_hash());
            let ids: Vec<NodeId> = self
                .tx
                .scan_keys(&prefix)?
                .iter()
                .filter_map(|key| trailing_id(key))
                .map(NodeId::from_internal)
                .collect();
            self.get_nodes(&ids)?.into_iter().flatten().collect()
        } else {
            self.scan_label(label)?
        };

        Ok(candidates
            .into_iter()
            .filter(|node| {
                node.has_label_name(label)
                    && node
                        .get_property(property)
                        .and_then(|v| v.equals(value))
                        .unwrap_or(false)
            })
            .collect())
    }

    // ========== Relationship Operations ==========

    /// Create a relationship between two existing nodes
    pub fn create_relationship<L: Into<Label>>(
        &mut self,
        source: NodeId,
        target: NodeId,
        rel_type: L,
        properties: Property,
    ) -> Result<Relationship> {
        check_storable(&properties)?;
        for endpoint in [source, target] {
            if self.get_node(endpoint)?.is_none() {
                return Err(Error::NodeNotFound(endpoint.to_string()));
            }
        }

        let id = self.graph.id_generator().next_relationship_id();
        let rel = Relationship::with_properties(id, rel_type, source, target, properties);
        let type_name = rel.rel_type.name();

        self.tx.put(KeyBuilder::relationship(id), encode(&rel)?)?;
        self.tx
            .put(KeyBuilder::adjacency_out(source, type_name, id), Vec::new())?;
        self.tx
            .put(KeyBuilder::adjacency_in(target, type_name, id), Vec::new())?;
        self.delta.relationship(&rel.rel_type, 1);

        debug!(relationship = %id, %source, %target, "Created relationship");
        Ok(rel)
    }

    /// Get a relationship by ID
    pub fn get_relationship(&mut self, id: RelationshipId) -> Result<Option<Relationship>> {
        match self.tx.get(&KeyBuilder::relationship(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write back a relationship whose properties changed
    ///
    /// Type and endpoints are immutable.
    pub fn update_relationship(&mut self, rel: &Relationship) -> Result<()> {
        check_storable(&rel.properties)?;
        let old = self
            .get_relationship(rel.id)?
            .ok_or_else(|| Error::RelationshipNotFound(rel.id.to_string()))?;
        if old.rel_type != rel.rel_type || old.source != rel.source || old.target != rel.target {
            return Err(Error::InvalidGraphOperation(format!(
                "relationship {} cannot change its type or endpoints",
                rel.id
            )));
        }
        self.tx.put(KeyBuilder::relationship(rel.id), encode(rel)?)
    }

    /// Delete a relationship, returning false if it did not exist
    pub fn delete_relationship(&mut self, id: RelationshipId) -> Result<bool> {
        let Some(rel) = self.get_relationship(id)? else {
            return Ok(false);
        };
        let type_name = rel.rel_type.name();
        self.tx.delete(KeyBuilder::relationship(id))?;
        self.tx
            .delete(KeyBuilder::adjacency_out(rel.source, type_name, id))?;
        self.tx
            .delete(KeyBuilder::adjacency_in(rel.target, type_name, id))?;
        self.delta.relationship(&rel.rel_type, -1);
        Ok(true)
    }

    /// Relationships attached to a node, optionally restricted by type
    ///
    /// A self-loop followed in both directions is returned once.
    pub fn relationships(
        &mut self,
        node: NodeId,
        direction: Direction,
        types: &[&str],
    ) -> Result<Vec<Relationship>> {
        let sides: &[bool] = match direction {
            Direction::Outgoing => &[true],
            Direction::Incoming => &[false],
            Direction::Both => &[true, false],
        };

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for &outgoing in sides {
            let prefixes: Vec<String> = if types.is_empty() {
                vec![KeyBuilder::adjacency_prefix(outgoing, node, None)]
            } else {
                types
                    .iter()
                    .map(|t| KeyBuilder::adjacency_prefix(outgoing, node, Some(t)))
                    .collect()
            };
            for prefix in prefixes {
                for key in self.tx.scan_keys(&prefix)? {
                    if let Some(raw) = trailing_id(&key) {
                        let id = RelationshipId::from_internal(raw);
                        if seen.insert(id) {
                            ids.push(id);
                        }
                    }
                }
            }
        }

        let keys: Vec<String> = ids.iter().map(|id| KeyBuilder::relationship(*id)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mut rels = Vec::with_capacity(ids.len());
        for (id, bytes) in ids.iter().zip(self.tx.get_many(&refs)?) {
            let bytes = bytes.ok_or_else(|| {
                Error::DataCorruption(format!("adjacency entry for missing relationship {id}"))
            })?;
            rels.push(decode(&bytes)?);
        }
        Ok(rels)
    }

    // ========== Schema Operations ==========

    /// Declare an index inside this transaction, back-filling entries
    pub fn declare_index(&mut self, index: Index) -> Result<bool> {
        if self.schema.indexes.contains(&index) {
            return Ok(false);
        }
        self.tx.put(index.key(), encode(&index)?)?;

        for node in self.scan_label(index.label.name())? {
            if let Some(hash) = index_entry(&node, &index) {
                self.put_index_entry(&index, hash, node.id)?;
            }
        }

        let mut schema = (*self.schema).clone();
        schema.indexes.insert(index);
        schema.version = schema::bump_version(&mut self.tx)?;
        self.schema = Arc::new(schema);
        self.schema_changed = true;
        Ok(true)
    }

    /// Declare a constraint inside this transaction, validating existing data
    pub fn declare_constraint(&mut self, constraint: Constraint) -> Result<bool> {
        if self.schema.constraints.contains(&constraint) {
            return Ok(false);
        }
        let label = constraint.label.name().to_string();
        let property = constraint.property.clone();

        match constraint.constraint_type {
            ConstraintType::Unique => {
                self.declare_index(Index::new(label.as_str(), &property))?;
                let mut seen: HashMap<u64, Vec<Value>> = HashMap::new();
                for node in self.scan_label(&label)? {
                    let Some(value) = node.get_property(&property) else {
                        continue;
                    };
                    let bucket = seen.entry(value.stable_hash()).or_default();
                    if bucket.iter().any(|v| v.equals(value) == Some(true)) {
                        return Err(Error::ConstraintViolation(format!(
                            "cannot add {constraint}: value {value} appears more than once"
                        )));
                    }
                    bucket.push(value.clone());
                }
            }
            ConstraintType::Exists => {
                for node in self.scan_label(&label)? {
                    if !node.properties.contains(&property) {
                        return Err(Error::ConstraintViolation(format!(
                            "cannot add {constraint}: node {} lacks the property",
                            node.id
                        )));
                    }
                }
            }
        }

        self.tx.put(constraint.key(), encode(&constraint)?)?;
        let mut schema = (*self.schema).clone();
        schema.constraints.insert(constraint);
        schema.version = schema::bump_version(&mut self.tx)?;
        self.schema = Arc::new(schema);
        self.schema_changed = true;
        Ok(true)
    }

    // ========== Transaction Control ==========

    /// Check constraints and commit, returning the commit sequence number
    ///
    /// A constraint violation or conflict rolls the whole transaction back.
    pub fn commit(&mut self) -> Result<u64> {
        if self.tx.is_active() && self.tx.has_writes() {
            if let Err(e) = self.check_constraints() {
                debug!(tx = self.tx.id(), error = %e, "Constraint check failed");
                self.tx.rollback()?;
                return Err(e);
            }
        }

        let seq = self.tx.commit()?;
        let delta = std::mem::take(&mut self.delta);
        if self.schema_changed {
            let schema = self.schema.clone();
            self.graph.update_statistics(|stats| {
                for index in &schema.indexes {
                    stats.track_index(index.clone());
                }
            })?;
            self.graph.install_schema(schema)?;
        }
        if !delta.is_empty() {
            self.graph.update_statistics(|stats| stats.apply(&delta))?;
        }
        Ok(seq)
    }

    /// Discard every buffered change
    pub fn rollback(&mut self) -> Result<()> {
        self.delta = StatsDelta::default();
        self.tx.rollback()
    }

    fn check_constraints(&mut self) -> Result<()> {
        for id in self.deleted.clone() {
            for outgoing in [true, false] {
                let prefix = KeyBuilder::adjacency_prefix(outgoing, id, None);
                if !self.tx.scan_keys(&prefix)?.is_empty() {
                    return Err(Error::ConstraintViolation(format!(
                        "cannot delete node {id}: it still has relationships; use DETACH DELETE"
                    )));
                }
            }
        }

        if self.schema.constraints.is_empty() {
            return Ok(());
        }
        let schema = self.schema.clone();
        for id in self.touched.clone() {
            let Some(node) = self.get_node(id)? else {
                continue;
            };
            for label in &node.labels {
                for constraint in schema.constraints_for_label(label) {
                    let value = node.get_property(&constraint.property);
                    match (constraint.constraint_type, value) {
                        (ConstraintType::Exists, None) => {
                            return Err(Error::ConstraintViolation(format!(
                                "node {id} violates {constraint}: property is missing"
                            )));
                        }
                        (ConstraintType::Unique, Some(value)) => {
                            self.check_unique(&node, label, constraint, value)?;
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn check_unique(
        &mut self,
        node: &Node,
        label: &Label,
        constraint: &Constraint,
        value: &Value,
    ) -> Result<()> {
        let prefix = KeyBuilder::property_index_value_prefix(
            label.name(),
            &constraint.property,
            value.stable_hash(),
        );
        let others: Vec<NodeId> = self
            .tx
            .scan_keys(&prefix)?
            .iter()
            .filter_map(|key| trailing_id(key))
            .map(NodeId::from_internal)
            .filter(|other| *other != node.id)
            .collect();

        for other in self.get_nodes(&others)?.into_iter().flatten() {
            let duplicate = other.labels.contains(label)
                && other
                    .get_property(&constraint.property)
                    .and_then(|v| v.equals(value))
                    .unwrap_or(false);
            if duplicate {
                return Err(Error::ConstraintViolation(format!(
                    "node {} violates {constraint}: value {value} already held by node {}",
                    node.id, other.id
                )));
            }
        }
        Ok(())
    }

    fn put_index_entry(&mut self, index: &Index, hash: u64, node: NodeId) -> Result<()> {
        let key = KeyBuilder::property_index(index.label.name(), &index.property, hash, node);
        self.tx.put(key, Vec::new())?;
        self.delta.index_entry(index, hash, 1);
        Ok(())
    }

    fn delete_index_entry(&mut self, index: &Index, hash: u64, node: NodeId) -> Result<()> {
        let key = KeyBuilder::property_index(index.label.name(), &index.property, hash, node);
        self.tx.delete(key)?;
        self.delta.index_entry(index, hash, -1);
        Ok(())
    }
}

/// Value hash a node contributes to an index, if any
fn index_entry(node: &Node, index: &Index) -> Option<u64> {
    if !node.labels.contains(&index.label) {
        return None;
    }
    node.get_property(&index.property).map(Value::stable_hash)
}

fn check_storable(properties: &Property) -> Result<()> {
    for (key, value) in properties.iter() {
        if !value.is_storable() {
            return Err(Error::InvalidGraphOperation(format!(
                "property '{key}' cannot hold a {}",
                value.type_name()
            )));
        }
    }
    Ok(())
}
