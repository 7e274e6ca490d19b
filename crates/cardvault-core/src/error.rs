//! Error types for cardvault-core

use thiserror::Error;

/// Result type alias using cardvault-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in cardvault-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Collection not found
    #[error("Collection not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level HTTP failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote service answered with a non-success status
    #[error("Collection service error: {message} ({status})")]
    Api { status: u16, message: String },

    /// Remote payload could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Client configuration error
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Outcome of a deduplicated sync that failed for another caller
    #[error("Sync failed: {0}")]
    SyncFailed(String),
}
