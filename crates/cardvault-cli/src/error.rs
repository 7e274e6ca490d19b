use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] cardvault_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Collection id cannot be empty")]
    EmptyCollectionId,
    #[error("Collection not found for id/prefix: {0}")]
    CollectionNotFound(String),
    #[error("{0}")]
    AmbiguousCollectionId(String),
    #[error("'{0}' is not a valid collection id")]
    InvalidCollectionId(String),
    #[error("Invalid collection type: {0}")]
    InvalidCollectionType(String),
    #[error("Nothing to update; pass at least one field flag")]
    NothingToUpdate,
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<cardvault_core::config::ConfigError> for CliError {
    fn from(error: cardvault_core::config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}
