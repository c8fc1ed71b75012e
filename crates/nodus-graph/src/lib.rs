//! Nodus Graph Engine
//!
//! Provides node and relationship operations built on top of the storage
//! layer.
//!
//! # Overview
//!
//! The graph engine provides:
//! - Graph instances, one per database namespace
//! - Transactional node and relationship operations with label, adjacency
//!   and property index maintenance
//! - Schema management (indexes, unique and existence constraints)
//! - Cardinality statistics for the query planner

pub mod graph;
pub mod schema;
pub mod statistics;
pub mod transaction;

pub use graph::Graph;
pub use schema::{Constraint, ConstraintType, Index, Schema};
pub use statistics::{IndexStatistics, Statistics, StatsDelta};
pub use transaction::GraphTransaction;
