//! Causal-consistency bookmarks

use nodus_core::{Error, Result};
use nodus_storage::Namespace;
use std::fmt;
use std::str::FromStr;

/// Position of a committed transaction in one database
///
/// Rendered as `<database>:<sequence>`. A session given a bookmark waits
/// until the database has committed at least that sequence before its first
/// read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bookmark {
    database: String,
    seq: u64,
}

impl Bookmark {
    pub fn new(database: impl Into<String>, seq: u64) -> Self {
        Self {
            database: database.into(),
            seq,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Parse a `<database>:<sequence>` token
    pub fn parse(token: &str) -> Result<Self> {
        let (database, seq) = token
            .rsplit_once(':')
            .ok_or_else(|| Error::Bookmark(format!("malformed bookmark '{token}'")))?;
        Namespace::new(database)
            .map_err(|e| Error::Bookmark(format!("malformed bookmark '{token}': {e}")))?;
        let seq = seq
            .parse::<u64>()
            .map_err(|_| Error::Bookmark(format!("malformed bookmark sequence in '{token}'")))?;
        Ok(Self::new(database, seq))
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.database, self.seq)
    }
}

impl FromStr for Bookmark {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let bookmark = Bookmark::new("neo4j", 42);
        assert_eq!(bookmark.to_string(), "neo4j:42");
        assert_eq!("neo4j:42".parse::<Bookmark>().unwrap(), bookmark);
    }

    #[test]
    fn test_rejects_malformed_tokens() {
        for token in ["", "neo4j", "neo4j:", "neo4j:-1", "neo4j:x", ":7", "bad name:3"] {
            assert!(
                matches!(Bookmark::parse(token), Err(Error::Bookmark(_))),
                "{token:?} should be rejected"
            );
        }
    }
}
