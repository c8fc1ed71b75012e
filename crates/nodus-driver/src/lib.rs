//! Nodus Driver
//!
//! Client-facing API of the graph database.
//!
//! # Overview
//!
//! - [`Driver`] owns one block store and lazily opens one graph per
//!   database name
//! - [`Session`] binds a database and an access mode, runs auto-commit
//!   queries and waits for input bookmarks before its first read
//! - [`Transaction`] gives explicit commit and rollback control
//! - [`Bookmark`] tokens (`<database>:<sequence>`) chain causally
//!   consistent sessions

pub mod bookmark;
pub mod config;
pub mod driver;
pub mod session;
pub mod transaction;

pub use bookmark::Bookmark;
pub use config::{DriverConfig, StorageConfig};
pub use driver::{Driver, DriverBuilder};
pub use session::Session;
pub use transaction::Transaction;

pub use nodus_graph::ConstraintType;
pub use nodus_query::{CosineScorer, QueryStats, Record, ResultCursor, SimilarityScorer};
pub use nodus_storage::AccessMode;
