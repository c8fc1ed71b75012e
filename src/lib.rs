//! Nodus - embeddable multi-database graph engine
//!
//! This is the main library crate that re-exports all Nodus components.

pub use nodus_core as core;
pub use nodus_driver as driver;
pub use nodus_graph as graph;
pub use nodus_query as query;
pub use nodus_storage as storage;

// Re-export commonly used types
pub use nodus_core::{
    Direction, DurationValue, EntityId, Error, Label, Node, NodeId, Path, Point, Property,
    Relationship, RelationshipId, Result, Value,
};

pub use nodus_driver::{
    AccessMode, Bookmark, ConstraintType, CosineScorer, Driver, DriverBuilder, DriverConfig,
    QueryStats, Record, ResultCursor, Session, SimilarityScorer, StorageConfig, Transaction,
};
pub use nodus_storage::{NamespaceArchive, StorageOptions};
