//! Core graph types for Nodus
//!
//! Defines the fundamental building blocks: nodes, relationships, paths,
//! labels, and directions.

use crate::id::{NodeId, RelationshipId};
use crate::property::Property;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A label for nodes or relationship types
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label(String);

impl Label {
    /// Create a new label
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    /// Get the label name
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Convert to owned string
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a relationship traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Outgoing relationship (->)
    Outgoing,
    /// Incoming relationship (<-)
    Incoming,
    /// Both directions (--)
    Both,
}

impl Direction {
    /// Returns the opposite direction
    pub fn reverse(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
            Direction::Both => Direction::Both,
        }
    }
}

/// A node in the property graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within its database
    pub id: NodeId,

    /// Labels attached to this node
    pub labels: BTreeSet<Label>,

    /// Properties of this node
    pub properties: Property,
}

impl Node {
    /// Create a new node with the given ID
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            labels: BTreeSet::new(),
            properties: Property::new(),
        }
    }

    /// Create a node with labels
    pub fn with_labels<I, L>(id: NodeId, labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Label>,
    {
        Self::with_labels_and_properties(id, labels, Property::new())
    }

    /// Create a node with labels and properties
    pub fn with_labels_and_properties<I, L>(id: NodeId, labels: I, properties: Property) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Label>,
    {
        Self {
            id,
            labels: labels.into_iter().map(Into::into).collect(),
            properties,
        }
    }

    /// Add a label to this node, returning true if it was not present
    pub fn add_label<L: Into<Label>>(&mut self, label: L) -> bool {
        self.labels.insert(label.into())
    }

    /// Remove a label from this node
    pub fn remove_label(&mut self, label: &Label) -> bool {
        self.labels.remove(label)
    }

    /// Check if node has a label by name
    pub fn has_label_name(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name() == name)
    }

    /// Set a property
    pub fn set_property<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        self.properties.set(key, value);
    }

    /// Get a property
    pub fn get_property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Remove a property
    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }
}

/// A directed relationship between two nodes
///
/// The direction is carried by the (source, target) order; traversals
/// choose a [`Direction`] to follow it forwards, backwards or both ways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier within its database
    pub id: RelationshipId,

    /// The relationship type
    pub rel_type: Label,

    /// Start node ID
    pub source: NodeId,

    /// End node ID
    pub target: NodeId,

    /// Properties of this relationship
    pub properties: Property,
}

impl Relationship {
    /// Create a new relationship
    pub fn new<L: Into<Label>>(
        id: RelationshipId,
        rel_type: L,
        source: NodeId,
        target: NodeId,
    ) -> Self {
        Self::with_properties(id, rel_type, source, target, Property::new())
    }

    /// Create a relationship with properties
    pub fn with_properties<L: Into<Label>>(
        id: RelationshipId,
        rel_type: L,
        source: NodeId,
        target: NodeId,
        properties: Property,
    ) -> Self {
        Self {
            id,
            rel_type: rel_type.into(),
            source,
            target,
            properties,
        }
    }

    /// Get the node ID at the other end of the relationship
    pub fn other(&self, node_id: NodeId) -> Option<NodeId> {
        if self.source == node_id {
            Some(self.target)
        } else if self.target == node_id {
            Some(self.source)
        } else {
            None
        }
    }

    /// Check if this relationship connects to a node
    pub fn connects(&self, node_id: NodeId) -> bool {
        self.source == node_id || self.target == node_id
    }

    /// Set a property
    pub fn set_property<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        self.properties.set(key, value);
    }

    /// Get a property
    pub fn get_property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Remove a property
    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }
}

/// A path through the graph: alternating nodes and relationships
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Nodes in the path (in order)
    pub nodes: Vec<Node>,

    /// Relationships in the path (in order)
    pub relationships: Vec<Relationship>,
}

impl Path {
    /// Create a path starting with a single node
    pub fn from_node(node: Node) -> Self {
        Self {
            nodes: vec![node],
            relationships: Vec::new(),
        }
    }

    /// Add a relationship and target node to the path
    pub fn extend(&mut self, relationship: Relationship, node: Node) {
        self.relationships.push(relationship);
        self.nodes.push(node);
    }

    /// Append another path that starts where this one ends
    pub fn join(&mut self, other: Path) {
        let mut nodes = other.nodes.into_iter();
        nodes.next();
        self.nodes.extend(nodes);
        self.relationships.extend(other.relationships);
    }

    /// Get the length of the path (number of relationships)
    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    /// Check if the path has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get the start node
    pub fn start(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// Get the end node
    pub fn end(&self) -> Option<&Node> {
        self.nodes.last()
    }

    /// Ids of the nodes along the path
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id).collect()
    }

    /// Ids of the relationships along the path
    pub fn relationship_ids(&self) -> Vec<RelationshipId> {
        self.relationships.iter().map(|r| r.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdGenerator;

    #[test]
    fn test_label_creation() {
        let label = Label::new("Person");
        assert_eq!(label.name(), "Person");

        let label2: Label = "Company".into();
        assert_eq!(label2.name(), "Company");
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(Direction::Outgoing.reverse(), Direction::Incoming);
        assert_eq!(Direction::Incoming.reverse(), Direction::Outgoing);
        assert_eq!(Direction::Both.reverse(), Direction::Both);
    }

    #[test]
    fn test_node_with_labels() {
        let id_gen = IdGenerator::new();
        let mut node = Node::with_labels(id_gen.next_node_id(), ["Person", "Employee"]);

        assert!(node.has_label_name("Person"));
        assert!(node.has_label_name("Employee"));
        assert!(!node.has_label_name("Company"));
        assert!(!node.add_label("Person"));
        assert!(node.remove_label(&Label::new("Employee")));
    }

    #[test]
    fn test_node_properties() {
        let id_gen = IdGenerator::new();
        let mut node = Node::new(id_gen.next_node_id());

        node.set_property("name", "Alice");
        node.set_property("age", 30i64);

        assert_eq!(node.get_property("name").and_then(|v| v.as_str()), Some("Alice"));
        assert_eq!(node.get_property("age").and_then(|v| v.as_integer()), Some(30));
        assert_eq!(node.remove_property("age"), Some(Value::Integer(30)));
    }

    #[test]
    fn test_relationship_other() {
        let id_gen = IdGenerator::new();
        let source = id_gen.next_node_id();
        let target = id_gen.next_node_id();
        let other = id_gen.next_node_id();

        let rel = Relationship::new(id_gen.next_relationship_id(), "KNOWS", source, target);

        assert_eq!(rel.rel_type.name(), "KNOWS");
        assert_eq!(rel.other(source), Some(target));
        assert_eq!(rel.other(target), Some(source));
        assert_eq!(rel.other(other), None);
        assert!(rel.connects(source));
        assert!(!rel.connects(other));
    }

    #[test]
    fn test_path() {
        let id_gen = IdGenerator::new();
        let a = Node::with_labels(id_gen.next_node_id(), ["Person"]);
        let b = Node::with_labels(id_gen.next_node_id(), ["Person"]);
        let c = Node::with_labels(id_gen.next_node_id(), ["Person"]);

        let ab = Relationship::new(id_gen.next_relationship_id(), "KNOWS", a.id, b.id);
        let bc = Relationship::new(id_gen.next_relationship_id(), "KNOWS", b.id, c.id);

        let mut path = Path::from_node(a.clone());
        path.extend(ab, b.clone());
        let mut tail = Path::from_node(b);
        tail.extend(bc, c.clone());
        path.join(tail);

        assert_eq!(path.len(), 2);
        assert_eq!(path.node_ids(), vec![a.id, path.nodes[1].id, c.id]);
        assert_eq!(path.start().map(|n| n.id), Some(a.id));
        assert_eq!(path.end().map(|n| n.id), Some(c.id));
    }
}
