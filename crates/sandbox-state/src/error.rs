//! Error types for sandbox-state

use thiserror::Error;

/// Errors raised while connecting to or initialising a backing store
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

/// Errors surfaced through the [`crate::SessionStateStore`] trait
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No session stored under this id
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// No execution stored under this id
    #[error("execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    /// A record with the same id already exists
    #[error("duplicate {kind}: {id}")]
    Duplicate { kind: &'static str, id: String },

    /// Backend failure (query, connection, lock poisoning)
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Stored data could not be decoded
    #[error("stored record could not be decoded: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
