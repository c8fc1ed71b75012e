//! Entity identification types for Nodus
//!
//! Ids are dense sequential integers scoped to one database namespace.
//! They are never raw references, so cyclic graphs serialize trivially.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Internal numeric ID for storage and lookup
pub type InternalId = u64;

/// Trait for all entity identifiers
pub trait EntityId: Clone + Copy + Eq + Ord + std::hash::Hash + fmt::Debug + fmt::Display {
    /// Create from internal numeric ID
    fn from_internal(id: InternalId) -> Self;

    /// Get the internal numeric representation
    fn as_internal(&self) -> InternalId;
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(InternalId);

        impl EntityId for $name {
            fn from_internal(id: InternalId) -> Self {
                Self(id)
            }

            fn as_internal(&self) -> InternalId {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier for a node in the graph
    NodeId
);

entity_id!(
    /// Identifier for a relationship in the graph
    RelationshipId
);

/// Identifier generator for sequential IDs within a database
#[derive(Debug)]
pub struct IdGenerator {
    next_node_id: AtomicU64,
    next_rel_id: AtomicU64,
}

impl IdGenerator {
    /// Create a new ID generator
    pub fn new() -> Self {
        Self::with_start(1, 1)
    }

    /// Create with starting values (for recovery)
    pub fn with_start(node_start: u64, rel_start: u64) -> Self {
        Self {
            next_node_id: AtomicU64::new(node_start.max(1)),
            next_rel_id: AtomicU64::new(rel_start.max(1)),
        }
    }

    /// Generate the next node ID
    pub fn next_node_id(&self) -> NodeId {
        NodeId::from_internal(self.next_node_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Generate the next relationship ID
    pub fn next_relationship_id(&self) -> RelationshipId {
        RelationshipId::from_internal(self.next_rel_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Advance the node counter past `id` if it has not got there yet
    pub fn observe_node_id(&self, id: NodeId) {
        self.next_node_id
            .fetch_max(id.as_internal() + 1, Ordering::SeqCst);
    }

    /// Advance the relationship counter past `id` if it has not got there yet
    pub fn observe_relationship_id(&self, id: RelationshipId) {
        self.next_rel_id
            .fetch_max(id.as_internal() + 1, Ordering::SeqCst);
    }

    /// Get current node ID counter value
    pub fn current_node_id(&self) -> u64 {
        self.next_node_id.load(Ordering::SeqCst)
    }

    /// Get current relationship ID counter value
    pub fn current_relationship_id(&self) -> u64 {
        self.next_rel_id.load(Ordering::SeqCst)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_from_internal() {
        let id = NodeId::from_internal(42);
        assert_eq!(id.as_internal(), 42);
        assert_eq!(format!("{id:?}"), "NodeId(42)");
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_id_generator() {
        let id_gen = IdGenerator::new();

        let n1 = id_gen.next_node_id();
        let n2 = id_gen.next_node_id();
        assert_ne!(n1, n2);
        assert_eq!(n1.as_internal() + 1, n2.as_internal());

        let r1 = id_gen.next_relationship_id();
        let r2 = id_gen.next_relationship_id();
        assert!(r1 < r2);
    }

    #[test]
    fn test_id_generator_with_start() {
        let id_gen = IdGenerator::with_start(100, 200);
        assert_eq!(id_gen.next_node_id().as_internal(), 100);
        assert_eq!(id_gen.next_relationship_id().as_internal(), 200);
    }

    #[test]
    fn test_observe_only_moves_forward() {
        let id_gen = IdGenerator::with_start(10, 1);
        id_gen.observe_node_id(NodeId::from_internal(4));
        assert_eq!(id_gen.current_node_id(), 10);
        id_gen.observe_node_id(NodeId::from_internal(20));
        assert_eq!(id_gen.next_node_id().as_internal(), 21);
    }
}
