//! Error types for cluster formation.

use sqlha_core::{BroadcastError, DbError};
use thiserror::Error;

/// Result type for cluster operations.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur while forming the cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Reading or writing broadcast state failed.
    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    /// A shared secret needed for this step has not been advertised.
    #[error("Shared secret {0} has not been advertised yet")]
    MissingSecret(&'static str),

    /// The advertised certificate bundle could not be decoded.
    #[error("Invalid certificate bundle: {0}")]
    InvalidBundle(String),

    /// Persisted state is unusable.
    #[error("State error: {0}")]
    State(String),

    /// Persisted state was written by an incompatible version.
    #[error("Unsupported state version {found}, expected {expected}")]
    UnsupportedStateVersion {
        /// Version found on disk.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::Serialization(e.to_string())
    }
}
