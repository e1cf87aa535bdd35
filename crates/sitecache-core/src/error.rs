//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] sitecache_storage::StorageError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] sitecache_proxy::ProxyError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Install of cache generation {version} failed: {reason}")]
    InstallFailed { version: String, reason: String },

    #[error("Worker for {version} cannot be activated from state {state}")]
    InvalidState { version: String, state: String },

    #[error("No active worker")]
    NoActiveWorker,

    #[error("Offline and not cached: {0}")]
    Offline(String),

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Internal error: {0}")]
    Internal(String),
}
