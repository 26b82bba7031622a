//! Error types for LabLedger

use thiserror::Error;

/// Result type alias using LabLedger Error
pub type Result<T> = std::result::Result<T, Error>;

/// LabLedger error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Store operation timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Credential hashing error: {0}")]
    Hash(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the failure came from the store layer (timeout included).
    /// Callers must treat these as fail-closed: deny, never grant.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Timeout { .. })
    }
}
