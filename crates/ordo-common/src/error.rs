//! Error types for OrdoDB.

use thiserror::Error;

/// Result type alias using OrdoError.
pub type Result<T> = std::result::Result<T, OrdoError>;

/// Errors that can occur in OrdoDB operations.
#[derive(Debug, Error)]
pub enum OrdoError {
    // Storage errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored object corrupted: {object}, reason: {reason}")]
    ObjectCorrupted { object: String, reason: String },

    #[error("Page {page} is at capacity ({capacity} rows)")]
    CapacityExceeded { page: u32, capacity: usize },

    #[error("Row not found for clustering key {0}")]
    RowNotFound(String),

    // Type errors
    #[error("Type mismatch on column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    // Catalog errors
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Missing value for column: {0}")]
    MissingColumn(String),

    #[error("Index already exists on {table}.{column}")]
    IndexAlreadyExists { table: String, column: String },

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Clustering key column {0} cannot be updated")]
    ClusteringKeyImmutable(String),

    // Query errors
    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Predicates span more than one table: expected {expected}, found {found}")]
    TableMismatch { expected: String, found: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrdoError {
    /// Builds an `ObjectCorrupted` error for the named object.
    pub fn corrupted(object: impl Into<String>, reason: impl Into<String>) -> Self {
        OrdoError::ObjectCorrupted {
            object: object.into(),
            reason: reason.into(),
        }
    }
}
