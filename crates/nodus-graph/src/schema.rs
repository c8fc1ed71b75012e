//! Schema management for graph databases
//!
//! Index and constraint descriptors are ordinary keys in the database's key
//! space (`schema:index:*`, `schema:constraint:*`) plus a `schema:version`
//! counter that every schema change bumps. Write transactions read the
//! version, so a concurrent schema change makes them conflict instead of
//! committing against stale descriptors.

use nodus_core::{Error, Label, Result};
use nodus_storage::keys::{KeyBuilder, KeyDecoder};
use nodus_storage::{Bytes, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A property index definition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Index {
    /// Label this index applies to
    pub label: Label,

    /// Indexed property
    pub property: String,
}

impl Index {
    /// Create a new index descriptor
    pub fn new<L: Into<Label>>(label: L, property: &str) -> Self {
        Self {
            label: label.into(),
            property: property.to_string(),
        }
    }

    /// Storage key of this descriptor
    pub fn key(&self) -> String {
        KeyBuilder::schema_index(self.label.name(), &self.property)
    }
}

impl std::fmt::Display for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ":{}({})", self.label.name(), self.property)
    }
}

/// Type of constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConstraintType {
    /// Unique property value within a label
    Unique,
    /// Property must exist
    Exists,
}

impl ConstraintType {
    /// Name used in storage keys and messages
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintType::Unique => "unique",
            ConstraintType::Exists => "exists",
        }
    }

    /// Parse a constraint kind name, case-insensitively
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "unique" => Ok(ConstraintType::Unique),
            "exists" => Ok(ConstraintType::Exists),
            other => Err(Error::InvalidGraphOperation(format!(
                "unknown constraint kind '{other}' (expected unique or exists)"
            ))),
        }
    }
}

/// A constraint definition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Constraint {
    /// Type of constraint
    pub constraint_type: ConstraintType,

    /// Label this constraint applies to
    pub label: Label,

    /// Constrained property
    pub property: String,
}

impl Constraint {
    /// Create a unique constraint
    pub fn unique<L: Into<Label>>(label: L, property: &str) -> Self {
        Self {
            constraint_type: ConstraintType::Unique,
            label: label.into(),
            property: property.to_string(),
        }
    }

    /// Create an existence constraint
    pub fn exists<L: Into<Label>>(label: L, property: &str) -> Self {
        Self {
            constraint_type: ConstraintType::Exists,
            label: label.into(),
            property: property.to_string(),
        }
    }

    /// Storage key of this descriptor
    pub fn key(&self) -> String {
        KeyBuilder::schema_constraint(
            self.constraint_type.as_str(),
            self.label.name(),
            &self.property,
        )
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} :{}({})",
            self.constraint_type.as_str(),
            self.label.name(),
            self.property
        )
    }
}

/// Schema for a graph, containing all indexes and constraints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    /// Value of `schema:version` this snapshot was loaded at
    pub version: u64,

    /// Declared indexes
    pub indexes: BTreeSet<Index>,

    /// Declared constraints
    pub constraints: BTreeSet<Constraint>,
}

impl Schema {
    /// Create a new empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every descriptor visible to a transaction
    pub fn load(tx: &mut Transaction) -> Result<Self> {
        let version = read_version(tx)?;
        let version_key = KeyBuilder::schema_version();
        let mut schema = Schema {
            version,
            ..Schema::default()
        };

        for (key, bytes) in tx.scan(&KeyBuilder::schema_prefix())? {
            if key == version_key {
                continue;
            }
            let mut decoder = KeyDecoder::new(&key);
            decoder.read_raw();
            match decoder.read_raw() {
                Some("index") => {
                    schema.indexes.insert(decode(&bytes)?);
                }
                Some("constraint") => {
                    schema.constraints.insert(decode(&bytes)?);
                }
                _ => {
                    return Err(Error::DataCorruption(format!(
                        "unrecognised schema key: {key}"
                    )));
                }
            }
        }

        Ok(schema)
    }

    /// Check for an index on (label, property)
    pub fn has_index(&self, label: &str, property: &str) -> bool {
        self.indexes
            .iter()
            .any(|i| i.label.name() == label && i.property == property)
    }

    /// Get all indexes for a label
    pub fn indexes_for_label<'a>(&'a self, label: &'a Label) -> impl Iterator<Item = &'a Index> {
        self.indexes.iter().filter(move |i| &i.label == label)
    }

    /// Get all constraints for a label
    pub fn constraints_for_label<'a>(
        &'a self,
        label: &'a Label,
    ) -> impl Iterator<Item = &'a Constraint> {
        self.constraints.iter().filter(move |c| &c.label == label)
    }

    /// Check if a property has a unique constraint
    pub fn has_unique_constraint(&self, label: &Label, property: &str) -> bool {
        self.constraints.iter().any(|c| {
            &c.label == label
                && c.property == property
                && c.constraint_type == ConstraintType::Unique
        })
    }

    /// True when no descriptor is declared
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty() && self.constraints.is_empty()
    }
}

/// Current `schema:version` as seen by a transaction (0 when never set)
pub fn read_version(tx: &mut Transaction) -> Result<u64> {
    match tx.get(&KeyBuilder::schema_version())? {
        Some(bytes) => decode_version(&bytes),
        None => Ok(0),
    }
}

/// Buffer a bump of `schema:version`, returning the new version
pub fn bump_version(tx: &mut Transaction) -> Result<u64> {
    let next = read_version(tx)? + 1;
    tx.put(KeyBuilder::schema_version(), next.to_be_bytes().to_vec())?;
    Ok(next)
}

fn decode_version(bytes: &Bytes) -> Result<u64> {
    let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
        Error::DataCorruption(format!("schema version has {} bytes", bytes.len()))
    })?;
    Ok(u64::from_be_bytes(raw))
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Serialization(e.to_string()))
}

pub(crate) fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}
