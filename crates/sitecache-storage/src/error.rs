//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generation not found: {0}")]
    NotFound(String),

    #[error("Invalid generation name: {0}")]
    InvalidName(String),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}
