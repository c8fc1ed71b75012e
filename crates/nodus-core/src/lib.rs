//! Nodus Core Library
//!
//! This crate provides the fundamental types and error handling shared by
//! every layer of the Nodus graph engine.
//!
//! # Modules
//!
//! - `error` - Error taxonomy and result alias
//! - `id` - Entity identification and generation
//! - `value` - Tagged runtime values, ordering and hashing
//! - `property` - Property collections
//! - `types` - Nodes, relationships, paths, labels, directions
//! - `temporal` - Dates, datetimes and ISO-8601 durations

pub mod error;
pub mod id;
pub mod property;
pub mod temporal;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use id::{EntityId, IdGenerator, NodeId, RelationshipId};
pub use property::Property;
pub use temporal::DurationValue;
pub use types::{Direction, Label, Node, Path, Relationship};
pub use value::{GroupKey, Point, Value};
