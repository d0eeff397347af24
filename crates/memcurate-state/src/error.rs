//! Error types for memcurate-state

use thiserror::Error;

/// Errors raised while connecting to or initializing the backing database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors surfaced through the storage traits
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("memory not found: {memory_id}")]
    MemoryNotFound { memory_id: String },

    #[error("memory already exists: {memory_id}")]
    DuplicateMemory { memory_id: String },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    /// A write batch was rejected and none of its ops were applied.
    #[error("write batch aborted: {reason}")]
    BatchAborted { reason: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
