//! Error types for Nodus
//!
//! One error hierarchy is shared by every layer, from lexing to commit.

use thiserror::Error;

/// The main error type for Nodus operations
#[derive(Error, Debug)]
pub enum Error {
    // ========== Query Front-End Errors ==========
    #[error("Syntax error at line {line}, column {column} (offset {offset}): {message}")]
    Syntax {
        message: String,
        offset: usize,
        line: usize,
        column: usize,
    },

    #[error("Parse error in {clause}: {message}")]
    Parse { clause: String, message: String },

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Type error in {function}() argument {position}: {message}")]
    Type {
        function: String,
        position: usize,
        message: String,
    },

    // ========== Execution Errors ==========
    #[error("Query execution error: {0}")]
    QueryExecution(String),

    #[error("Deadline exceeded: query budget exhausted")]
    DeadlineExceeded,

    // ========== Constraint Errors ==========
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    // ========== Transaction Errors ==========
    #[error("Transaction conflict: {message}")]
    Conflict { message: String, retryable: bool },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Bookmark error: {0}")]
    Bookmark(String),

    // ========== Graph Errors ==========
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Relationship not found: {0}")]
    RelationshipNotFound(String),

    #[error("Invalid graph operation: {0}")]
    InvalidGraphOperation(String),

    // ========== Storage Errors ==========
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Data corruption detected: {0}")]
    DataCorruption(String),

    #[error("Invalid namespace: {0}")]
    Namespace(String),

    // ========== Serialization Errors ==========
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ========== IO Errors ==========
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Configuration Errors ==========
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Nodus operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a syntax error, deriving line and column from a byte offset into `source`
    pub fn syntax(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let offset = offset.min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(pos) => before[pos + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };
        Error::Syntax {
            message: message.into(),
            offset,
            line,
            column,
        }
    }

    /// Build a parse error attributed to a clause
    pub fn parse(clause: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Parse {
            clause: clause.into(),
            message: message.into(),
        }
    }

    /// Build a type error for a function argument (1-based position)
    pub fn type_error(function: &str, position: usize, message: impl Into<String>) -> Self {
        Error::Type {
            function: function.to_string(),
            position,
            message: message.into(),
        }
    }

    /// Build a retryable write-write conflict
    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict {
            message: message.into(),
            retryable: true,
        }
    }

    /// Returns true if the caller may retry the whole transaction
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { retryable: true, .. })
    }

    /// Returns true if this error indicates data corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::DataCorruption(_))
    }

    /// Returns true if this error is a constraint violation
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::ConstraintViolation(_))
    }

    /// Returns true for errors raised before any storage access
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            Error::Syntax { .. } | Error::Parse { .. } | Error::Planning(_)
        )
    }

    /// Returns true when the error is caused by the query or its arguments
    pub fn is_client_error(&self) -> bool {
        self.is_compile_time()
            || matches!(
                self,
                Error::Type { .. }
                    | Error::ConstraintViolation(_)
                    | Error::Bookmark(_)
                    | Error::InvalidGraphOperation(_)
            )
    }

    /// Stable classification name, used in logs and by callers matching on kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Syntax { .. } => "SyntaxError",
            Error::Parse { .. } => "ParseError",
            Error::Planning(_) => "PlanningError",
            Error::Type { .. } => "TypeError",
            Error::QueryExecution(_) => "ExecutionError",
            Error::DeadlineExceeded => "DeadlineExceeded",
            Error::ConstraintViolation(_) => "ConstraintViolation",
            Error::Conflict { .. } => "ConflictError",
            Error::Transaction(_) => "TransactionError",
            Error::Bookmark(_) => "BookmarkError",
            Error::NodeNotFound(_)
            | Error::RelationshipNotFound(_)
            | Error::InvalidGraphOperation(_) => "GraphError",
            Error::Storage(_)
            | Error::KeyNotFound(_)
            | Error::DataCorruption(_)
            | Error::Namespace(_) => "StorageError",
            Error::Serialization(_) | Error::Deserialization(_) => "SerializationError",
            Error::Io(_) => "IoError",
            Error::Configuration(_) => "ConfigurationError",
            Error::Internal(_) => "InternalError",
        }
    }
}
