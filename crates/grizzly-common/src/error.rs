//! Error types for Grizzly
//!
//! Provides a unified error type hierarchy for the entire engine. Index misses and
//! empty groups are not errors and never appear here.

use thiserror::Error;

/// Result type alias using Grizzly's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Grizzly
#[derive(Error, Debug)]
pub enum Error {
    // Schema Errors
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    // Query Errors
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    // Storage Errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // Integrity Errors
    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    // Replication Errors
    #[error("Replication error: {0}")]
    Replication(#[from] ReplicationError),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal Errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Schema and table-shape errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Duplicate field: {0}")]
    DuplicateField(String),

    #[error("Arity mismatch: schema has {expected} fields, row has {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Field {field} expects {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Row {row} out of bounds for table with {len} rows")]
    RowOutOfBounds { row: usize, len: usize },

    #[error("Unknown type tag: {0}")]
    UnknownType(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Invalid table name {0:?}: expected a letter or underscore followed by letters, digits or underscores")]
    InvalidName(String),
}

/// Query-related errors, returned inside a query result rather than thrown
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Parse error in {clause} clause: {message}")]
    ParseError { clause: String, message: String },

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Ambiguous column: {0}")]
    AmbiguousColumn(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Invalid grouping: {0}")]
    InvalidGrouping(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl QueryError {
    /// Build a parse error attributed to a clause
    pub fn parse(clause: impl Into<String>, message: impl Into<String>) -> Self {
        QueryError::ParseError {
            clause: clause.into(),
            message: message.into(),
        }
    }

    /// Build a type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        QueryError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("WAL error: {0}")]
    WalError(String),

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Duplicate block: {0}")]
    DuplicateBlock(String),

    #[error("Block not found: {0}")]
    BlockNotFound(String),

    #[error("Unknown storage backend: {0}")]
    UnknownBackend(String),

    #[error("Index error: {0}")]
    IndexError(String),
}

/// Integrity failures in the block chain
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Block {position} hash mismatch: stored {stored}, computed {computed}")]
    HashMismatch {
        position: usize,
        stored: String,
        computed: String,
    },

    #[error("Block {position} does not link to its predecessor: expected {expected}, found {found}")]
    BrokenLink {
        position: usize,
        expected: String,
        found: String,
    },
}

/// Replication and distributed-commit errors
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("Participant {participant} failed to prepare transaction {txn_id}: {reason}")]
    PrepareFailed {
        txn_id: String,
        participant: String,
        reason: String,
    },

    #[error("Participant {0} is unreachable")]
    Unreachable(String),

    #[error("No alive nodes available")]
    NoAliveNodes,

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Transaction {txn_id} is in state {state}, cannot {action}")]
    InvalidState {
        txn_id: String,
        state: String,
        action: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Schema mismatch merging results from {0}")]
    SchemaMismatch(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
