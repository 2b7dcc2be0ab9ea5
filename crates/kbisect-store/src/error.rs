//! Error types for kbisect-store.

use thiserror::Error;

/// Errors from the durable store.
///
/// `store_io` in the core taxonomy (§7) is any variant here except
/// `NotFound`/`InvalidTransition`, which are caller bugs rather than I/O
/// failures and are handled locally by the coordinator.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database connection error.
    #[error("database connection failed: {0}")]
    Connection(String),

    /// Database query error.
    #[error("database query failed: {0}")]
    Query(String),

    /// Serialization error.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller asked for a state transition the invariants forbid (e.g. two
    /// non-terminal sessions for one working copy).
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    /// Schema setup error.
    #[error("schema setup failed: {0}")]
    SchemaSetup(String),

    /// A stored checksum did not match recomputed content on read.
    #[error("integrity error for {what}: expected {expected}, got {actual}")]
    Integrity {
        what: String,
        expected: String,
        actual: String,
    },
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
