//! Cardinality statistics used by the query planner
//!
//! Counts are rebuilt from storage when a graph is opened and then kept
//! current by applying each committed transaction's [`StatsDelta`].

use crate::schema::Index;
use nodus_core::{Label, Node, Relationship};
use std::collections::{BTreeMap, HashMap};

/// Per-index counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStatistics {
    /// Number of index entries
    pub entries: u64,
    /// Number of distinct indexed values
    pub distinct_values: u64,
}

impl IndexStatistics {
    /// Expected number of nodes matching one equality seek
    pub fn selectivity(&self) -> f64 {
        if self.distinct_values == 0 {
            0.0
        } else {
            self.entries as f64 / self.distinct_values as f64
        }
    }
}

/// Snapshot of graph cardinalities
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    node_count: u64,
    relationship_count: u64,
    label_counts: BTreeMap<Label, u64>,
    type_counts: BTreeMap<Label, u64>,
    /// index -> value hash -> entries carrying it
    index_values: BTreeMap<Index, HashMap<u64, u64>>,
}

impl Statistics {
    /// Create empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of nodes
    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    /// Total number of relationships
    pub fn relationship_count(&self) -> u64 {
        self.relationship_count
    }

    /// Nodes carrying a label
    pub fn label_count(&self, label: &str) -> u64 {
        self.label_counts
            .get(&Label::new(label))
            .copied()
            .unwrap_or(0)
    }

    /// Relationships of a type
    pub fn relationship_type_count(&self, rel_type: &str) -> u64 {
        self.type_counts
            .get(&Label::new(rel_type))
            .copied()
            .unwrap_or(0)
    }

    /// Counters for a declared index, if tracked
    pub fn index(&self, label: &str, property: &str) -> Option<IndexStatistics> {
        let values = self.index_values.get(&Index::new(label, property))?;
        Some(IndexStatistics {
            entries: values.values().sum(),
            distinct_values: values.len() as u64,
        })
    }

    /// All label counts
    pub fn labels(&self) -> impl Iterator<Item = (&Label, u64)> {
        self.label_counts.iter().map(|(l, c)| (l, *c))
    }

    /// Start tracking an index with no entries
    pub fn track_index(&mut self, index: Index) {
        self.index_values.entry(index).or_default();
    }

    /// Count a node found while rebuilding
    pub fn observe_node(&mut self, node: &Node, indexes: &[Index]) {
        self.node_count += 1;
        for label in &node.labels {
            *self.label_counts.entry(label.clone()).or_default() += 1;
        }
        for index in indexes {
            if !node.labels.contains(&index.label) {
                continue;
            }
            if let Some(value) = node.get_property(&index.property) {
                *self
                    .index_values
                    .entry(index.clone())
                    .or_default()
                    .entry(value.stable_hash())
                    .or_default() += 1;
            }
        }
    }

    /// Count a relationship found while rebuilding
    pub fn observe_relationship(&mut self, rel: &Relationship) {
        self.relationship_count += 1;
        *self.type_counts.entry(rel.rel_type.clone()).or_default() += 1;
    }

    /// Fold a committed transaction's changes in
    pub fn apply(&mut self, delta: &StatsDelta) {
        self.node_count = add_signed(self.node_count, delta.nodes);
        self.relationship_count = add_signed(self.relationship_count, delta.relationships);
        apply_counts(&mut self.label_counts, &delta.labels);
        apply_counts(&mut self.type_counts, &delta.types);
        for ((index, hash), change) in &delta.index_entries {
            let values = self.index_values.entry(index.clone()).or_default();
            let count = values.entry(*hash).or_default();
            *count = add_signed(*count, *change);
            if *count == 0 {
                values.remove(hash);
            }
        }
    }
}

/// Net changes made by one transaction
///
/// Every recorded event is a real state transition of its storage key, so
/// summing events yields the net effect even when an entity is touched
/// several times.
#[derive(Debug, Clone, Default)]
pub struct StatsDelta {
    nodes: i64,
    relationships: i64,
    labels: BTreeMap<Label, i64>,
    types: BTreeMap<Label, i64>,
    index_entries: BTreeMap<(Index, u64), i64>,
}

impl StatsDelta {
    pub fn node(&mut self, change: i64) {
        self.nodes += change;
    }

    pub fn relationship(&mut self, rel_type: &Label, change: i64) {
        self.relationships += change;
        *self.types.entry(rel_type.clone()).or_default() += change;
    }

    pub fn label(&mut self, label: &Label, change: i64) {
        *self.labels.entry(label.clone()).or_default() += change;
    }

    pub fn index_entry(&mut self, index: &Index, value_hash: u64, change: i64) {
        *self
            .index_entries
            .entry((index.clone(), value_hash))
            .or_default() += change;
    }

    /// True when no event has been recorded
    pub fn is_empty(&self) -> bool {
        self.nodes == 0
            && self.relationships == 0
            && self.labels.is_empty()
            && self.types.is_empty()
            && self.index_entries.is_empty()
    }
}

fn add_signed(count: u64, change: i64) -> u64 {
    if change >= 0 {
        count.saturating_add(change as u64)
    } else {
        count.saturating_sub(change.unsigned_abs())
    }
}

fn apply_counts(counts: &mut BTreeMap<Label, u64>, changes: &BTreeMap<Label, i64>) {
    for (label, change) in changes {
        let count = counts.entry(label.clone()).or_default();
        *count = add_signed(*count, *change);
        if *count == 0 {
            counts.remove(label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodus_core::{EntityId, NodeId, Property, RelationshipId};

    fn person(id: u64, name: &str) -> Node {
        Node::with_labels_and_properties(
            NodeId::from_internal(id),
            ["Person"],
            Property::with("name", name),
        )
    }

    #[test]
    fn test_observe_counts() {
        let index = Index::new("Person", "name");
        let mut stats = Statistics::new();
        stats.observe_node(&person(1, "a"), &[index.clone()]);
        stats.observe_node(&person(2, "a"), &[index.clone()]);
        stats.observe_node(&person(3, "b"), &[index]);
        stats.observe_relationship(&Relationship::new(
            RelationshipId::from_internal(1),
            "KNOWS",
            NodeId::from_internal(1),
            NodeId::from_internal(2),
        ));

        assert_eq!(stats.node_count(), 3);
        assert_eq!(stats.label_count("Person"), 3);
        assert_eq!(stats.label_count("Company"), 0);
        assert_eq!(stats.relationship_type_count("KNOWS"), 1);

        let idx = stats.index("Person", "name").unwrap();
        assert_eq!(idx.entries, 3);
        assert_eq!(idx.distinct_values, 2);
        assert!((idx.selectivity() - 1.5).abs() < f64::EPSILON);
        assert!(stats.index("Person", "age").is_none());
    }

    #[test]
    fn test_apply_delta() {
        let index = Index::new("Person", "name");
        let mut stats = Statistics::new();
        stats.track_index(index.clone());

        let label = Label::new("Person");
        let mut delta = StatsDelta::default();
        assert!(delta.is_empty());
        delta.node(2);
        delta.label(&label, 2);
        delta.index_entry(&index, 7, 1);
        delta.index_entry(&index, 9, 1);
        stats.apply(&delta);

        assert_eq!(stats.node_count(), 2);
        assert_eq!(stats.index("Person", "name").unwrap().distinct_values, 2);

        let mut removal = StatsDelta::default();
        removal.node(-1);
        removal.label(&label, -1);
        removal.index_entry(&index, 9, -1);
        stats.apply(&removal);

        assert_eq!(stats.node_count(), 1);
        assert_eq!(stats.label_count("Person"), 1);
        let idx = stats.index("Person", "name").unwrap();
        assert_eq!(idx.entries, 1);
        assert_eq!(idx.distinct_values, 1);
    }
}
