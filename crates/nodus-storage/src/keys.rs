//! Key encoding for storage operations
//!
//! Logical keys are `:`-separated text. User-supplied segments (labels,
//! relationship types, property names) are escaped so they can never
//! contain the separator, and ids are zero-padded so lexicographic order
//! matches numeric order. Every logical key is qualified with its
//! database namespace (`db:<name>:<key>`) before it reaches a block store.

use nodus_core::{EntityId, Error, NodeId, RelationshipId, Result};

/// Family names for the logical key space of a graph
pub mod family {
    pub const NODE: &str = "node";
    pub const RELATIONSHIP: &str = "rel";
    pub const LABEL_INDEX: &str = "label";
    pub const ADJACENCY_OUT: &str = "out";
    pub const ADJACENCY_IN: &str = "in";
    pub const PROPERTY_INDEX: &str = "prop";
    pub const SCHEMA: &str = "schema";
}

/// Reserved key holding the last committed sequence number of a namespace
pub const SEQUENCE_KEY: &str = "#seq";

const SEPARATOR: char = ':';
const MAX_NAMESPACE_LEN: usize = 64;

/// A validated database namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    name: String,
    prefix: String,
}

impl Namespace {
    /// Prefix shared by the keys of every namespace
    pub const ROOT: &'static str = "db:";

    /// Database name a qualified key belongs to
    pub fn name_of(qualified: &str) -> Option<&str> {
        qualified
            .strip_prefix(Self::ROOT)?
            .split(SEPARATOR)
            .next()
            .filter(|name| !name.is_empty())
    }

    /// Validate a database name and build its namespace
    ///
    /// Names are 1 to 64 bytes of `[A-Za-z0-9_.-]`, so no name can be a
    /// prefix-collision of another once the trailing separator is added.
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() || name.len() > MAX_NAMESPACE_LEN {
            return Err(Error::Namespace(format!(
                "database name must be 1 to {MAX_NAMESPACE_LEN} bytes, got {}",
                name.len()
            )));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
        {
            return Err(Error::Namespace(format!(
                "database name '{name}' contains invalid character '{bad}'"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            prefix: format!("db{SEPARATOR}{name}{SEPARATOR}"),
        })
    }

    /// Database name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `db:<name>:` prefix shared by every key of this namespace
    pub fn prefix(&self) -> String {
        self.prefix.clone()
    }

    /// Qualify a logical key
    pub fn qualify(&self, key: &str) -> String {
        let mut out = String::with_capacity(self.prefix.len() + key.len());
        out.push_str(&self.prefix);
        out.push_str(key);
        out
    }

    /// Strip the namespace prefix, `None` if the key belongs elsewhere
    pub fn strip<'a>(&self, qualified: &'a str) -> Option<&'a str> {
        qualified.strip_prefix(self.prefix.as_str())
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Escape a user-supplied key segment
pub fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for ch in segment.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape_segment`]
pub fn unescape_segment(segment: &str) -> String {
    segment.replace("%3A", ":").replace("%25", "%")
}

/// Key builder for graph storage keys
#[derive(Debug)]
pub struct KeyBuilder {
    buffer: String,
}

impl KeyBuilder {
    /// Create a new key builder starting with a family name
    pub fn new(family: &str) -> Self {
        let mut buffer = String::with_capacity(48);
        buffer.push_str(family);
        Self { buffer }
    }

    // ========== Entities ==========

    /// Key of a node record
    pub fn node(node_id: NodeId) -> String {
        Self::new(family::NODE).push_id(node_id.as_internal()).finish()
    }

    /// Prefix over all node records
    pub fn node_prefix() -> String {
        Self::new(family::NODE).finish_prefix()
    }

    /// Key of a relationship record
    pub fn relationship(rel_id: RelationshipId) -> String {
        Self::new(family::RELATIONSHIP)
            .push_id(rel_id.as_internal())
            .finish()
    }

    /// Prefix over all relationship records
    pub fn relationship_prefix() -> String {
        Self::new(family::RELATIONSHIP).finish_prefix()
    }

    // ========== Label Index ==========

    /// Label index entry (label -> node_id)
    pub fn label_index(label: &str, node_id: NodeId) -> String {
        Self::new(family::LABEL_INDEX)
            .push_segment(label)
            .push_id(node_id.as_internal())
            .finish()
    }

    /// Prefix over all nodes carrying a label
    pub fn label_index_prefix(label: &str) -> String {
        Self::new(family::LABEL_INDEX)
            .push_segment(label)
            .finish_prefix()
    }

    // ========== Adjacency ==========

    /// Outgoing adjacency entry
    pub fn adjacency_out(source: NodeId, rel_type: &str, rel_id: RelationshipId) -> String {
        Self::new(family::ADJACENCY_OUT)
            .push_id(source.as_internal())
            .push_segment(rel_type)
            .push_id(rel_id.as_internal())
            .finish()
    }

    /// Incoming adjacency entry
    pub fn adjacency_in(target: NodeId, rel_type: &str, rel_id: RelationshipId) -> String {
        Self::new(family::ADJACENCY_IN)
            .push_id(target.as_internal())
            .push_segment(rel_type)
            .push_id(rel_id.as_internal())
            .finish()
    }

    /// Prefix over the adjacency of one node in one direction, optionally
    /// restricted to a relationship type
    pub fn adjacency_prefix(outgoing: bool, node: NodeId, rel_type: Option<&str>) -> String {
        let family = if outgoing {
            family::ADJACENCY_OUT
        } else {
            family::ADJACENCY_IN
        };
        let builder = Self::new(family).push_id(node.as_internal());
        match rel_type {
            Some(t) => builder.push_segment(t).finish_prefix(),
            None => builder.finish_prefix(),
        }
    }

    // ========== Property Index ==========

    /// Property index entry
    pub fn property_index(label: &str, property: &str, value_hash: u64, node_id: NodeId) -> String {
        Self::new(family::PROPERTY_INDEX)
            .push_segment(label)
            .push_segment(property)
            .push_hash(value_hash)
            .push_id(node_id.as_internal())
            .finish()
    }

    /// Prefix over every entry of one index
    pub fn property_index_prefix(label: &str, property: &str) -> String {
        Self::new(family::PROPERTY_INDEX)
            .push_segment(label)
            .push_segment(property)
            .finish_prefix()
    }

    /// Prefix over the entries of one index holding one value
    pub fn property_index_value_prefix(label: &str, property: &str, value_hash: u64) -> String {
        Self::new(family::PROPERTY_INDEX)
            .push_segment(label)
            .push_segment(property)
            .push_hash(value_hash)
            .finish_prefix()
    }

    // ========== Schema ==========

    /// Index descriptor key
    pub fn schema_index(label: &str, property: &str) -> String {
        Self::new(family::SCHEMA)
            .push_segment("index")
            .push_segment(label)
            .push_segment(property)
            .finish()
    }

    /// Constraint descriptor key
    pub fn schema_constraint(kind: &str, label: &str, property: &str) -> String {
        Self::new(family::SCHEMA)
            .push_segment("constraint")
            .push_segment(kind)
            .push_segment(label)
            .push_segment(property)
            .finish()
    }

    /// Prefix over every schema descriptor
    pub fn schema_prefix() -> String {
        Self::new(family::SCHEMA).finish_prefix()
    }

    /// Key bumped on every schema change
    pub fn schema_version() -> String {
        Self::new(family::SCHEMA).push_segment("version").finish()
    }

    // Builder methods

    fn push_segment(mut self, segment: &str) -> Self {
        self.buffer.push(SEPARATOR);
        self.buffer.push_str(&escape_segment(segment));
        self
    }

    fn push_id(mut self, id: u64) -> Self {
        self.buffer.push(SEPARATOR);
        self.buffer.push_str(&format!("{id:020}"));
        self
    }

    fn push_hash(mut self, hash: u64) -> Self {
        self.buffer.push(SEPARATOR);
        self.buffer.push_str(&format!("{hash:016x}"));
        self
    }

    fn finish(self) -> String {
        self.buffer
    }

    fn finish_prefix(mut self) -> String {
        self.buffer.push(SEPARATOR);
        self.buffer
    }
}

/// Key decoder for parsing stored keys
pub struct KeyDecoder<'a> {
    segments: std::str::Split<'a, char>,
}

impl<'a> KeyDecoder<'a> {
    /// Create a decoder positioned at the family segment
    pub fn new(key: &'a str) -> Self {
        Self {
            segments: key.split(SEPARATOR),
        }
    }

    /// Read a raw segment
    pub fn read_raw(&mut self) -> Option<&'a str> {
        self.segments.next()
    }

    /// Read an escaped segment
    pub fn read_segment(&mut self) -> Option<String> {
        self.segments.next().map(unescape_segment)
    }

    /// Read a zero-padded id
    pub fn read_id(&mut self) -> Option<u64> {
        self.segments.next()?.parse().ok()
    }

    /// Read a hex value hash
    pub fn read_hash(&mut self) -> Option<u64> {
        u64::from_str_radix(self.segments.next()?, 16).ok()
    }
}

/// The id in the final segment of a key
pub fn trailing_id(key: &str) -> Option<u64> {
    key.rsplit(SEPARATOR).next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_validation() {
        assert!(Namespace::new("neo4j").is_ok());
        assert!(Namespace::new("tenant-1.prod_a").is_ok());
        assert!(Namespace::new("").is_err());
        assert!(Namespace::new("a:b").is_err());
        assert!(Namespace::new("white space").is_err());
        assert!(Namespace::new(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_namespace_qualify_and_strip() {
        let a = Namespace::new("a").unwrap();
        let ab = Namespace::new("ab").unwrap();
        let key = a.qualify("node:1");
        assert_eq!(key, "db:a:node:1");
        assert_eq!(a.strip(&key), Some("node:1"));
        assert_eq!(ab.strip(&key), None);
        assert!(!ab.qualify("x").starts_with(&a.prefix()));
        assert_eq!(Namespace::name_of(&key), Some("a"));
        assert_eq!(Namespace::name_of("other:a"), None);
    }

    #[test]
    fn test_node_key_orders_numerically() {
        let k9 = KeyBuilder::node(NodeId::from_internal(9));
        let k10 = KeyBuilder::node(NodeId::from_internal(10));
        assert!(k9 < k10);
        assert!(k9.starts_with(&KeyBuilder::node_prefix()));
        assert_eq!(trailing_id(&k10), Some(10));
    }

    #[test]
    fn test_label_index_key() {
        let key = KeyBuilder::label_index("Person", NodeId::from_internal(123));
        assert!(key.starts_with(&KeyBuilder::label_index_prefix("Person")));
        assert!(!key.starts_with(&KeyBuilder::label_index_prefix("Pers")));

        let mut decoder = KeyDecoder::new(&key);
        assert_eq!(decoder.read_raw(), Some(family::LABEL_INDEX));
        assert_eq!(decoder.read_segment().as_deref(), Some("Person"));
        assert_eq!(decoder.read_id(), Some(123));
    }

    #[test]
    fn test_escaped_segments_cannot_break_prefixes() {
        let tricky = KeyBuilder::label_index("A:B", NodeId::from_internal(1));
        assert!(!tricky.starts_with(&KeyBuilder::label_index_prefix("A")));
        let mut decoder = KeyDecoder::new(&tricky);
        decoder.read_raw();
        assert_eq!(decoder.read_segment().as_deref(), Some("A:B"));
        assert_eq!(unescape_segment(&escape_segment("50%:x")), "50%:x");
    }

    #[test]
    fn test_adjacency_key() {
        let source = NodeId::from_internal(1);
        let rel_id = RelationshipId::from_internal(100);
        let key = KeyBuilder::adjacency_out(source, "KNOWS", rel_id);

        assert!(key.starts_with(&KeyBuilder::adjacency_prefix(true, source, None)));
        assert!(key.starts_with(&KeyBuilder::adjacency_prefix(true, source, Some("KNOWS"))));
        assert!(!key.starts_with(&KeyBuilder::adjacency_prefix(false, source, None)));

        let mut decoder = KeyDecoder::new(&key);
        assert_eq!(decoder.read_raw(), Some(family::ADJACENCY_OUT));
        assert_eq!(decoder.read_id(), Some(1));
        assert_eq!(decoder.read_segment().as_deref(), Some("KNOWS"));
        assert_eq!(decoder.read_id(), Some(100));
    }

    #[test]
    fn test_property_index_key() {
        let key = KeyBuilder::property_index("Person", "email", 0xabc, NodeId::from_internal(7));
        assert!(key.starts_with(&KeyBuilder::property_index_value_prefix("Person", "email", 0xabc)));
        assert!(key.starts_with(&KeyBuilder::property_index_prefix("Person", "email")));

        let mut decoder = KeyDecoder::new(&key);
        decoder.read_raw();
        decoder.read_segment();
        decoder.read_segment();
        assert_eq!(decoder.read_hash(), Some(0xabc));
        assert_eq!(decoder.read_id(), Some(7));
    }

    #[test]
    fn test_schema_keys_share_prefix() {
        let prefix = KeyBuilder::schema_prefix();
        assert!(KeyBuilder::schema_index("Person", "name").starts_with(&prefix));
        assert!(KeyBuilder::schema_constraint("unique", "Person", "email").starts_with(&prefix));
        assert!(KeyBuilder::schema_version().starts_with(&prefix));
    }
}
