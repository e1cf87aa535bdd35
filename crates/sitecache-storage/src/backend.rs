//! Cache store trait

use async_trait::async_trait;
use std::sync::Arc;

use crate::entry::{CapturedResponse, RequestDescriptor};
use crate::error::StorageError;

/// Cache store trait
///
/// A store holds any number of named generations. Each generation is an
/// independent key-value map from request to captured response. Concurrent
/// writes to the same key are serialized by the backend; the last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create a generation if it does not exist yet
    async fn open(&self, name: &str) -> Result<(), StorageError>;

    /// List all generation names, sorted
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Check whether a generation exists
    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.keys().await?.iter().any(|k| k == name))
    }

    /// Delete a generation and every entry in it
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;

    /// Store a response, replacing any previous entry for the same request
    async fn put(
        &self,
        name: &str,
        request: &RequestDescriptor,
        response: &CapturedResponse,
    ) -> Result<(), StorageError>;

    /// Find the stored response for a request
    async fn lookup(
        &self,
        name: &str,
        request: &RequestDescriptor,
    ) -> Result<Option<CapturedResponse>, StorageError>;

    /// List the requests stored in a generation
    async fn entries(&self, name: &str) -> Result<Vec<RequestDescriptor>, StorageError>;

    /// Short backend name for logs
    fn kind(&self) -> &'static str;
}

/// Validate a generation name.
///
/// Names become directory or object-path components, so only
/// `[A-Za-z0-9._-]` is accepted and dot-only names are rejected.
pub fn validate_generation_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.len() > 128 {
        return Err(StorageError::InvalidName(format!(
            "Name must be 1-128 characters: {:?}",
            name
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(StorageError::InvalidName(format!(
            "Only letters, digits, '.', '_' and '-' are allowed: {:?}",
            name
        )));
    }

    if name.chars().all(|c| c == '.') {
        return Err(StorageError::InvalidName(name.to_string()));
    }

    Ok(())
}

/// Handle to one generation of a store
#[derive(Clone)]
pub struct Generation {
    store: Arc<dyn CacheStore>,
    name: String,
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("name", &self.name)
            .field("store", &self.store.kind())
            .finish()
    }
}

impl Generation {
    pub async fn put(
        &self,
        request: &RequestDescriptor,
        response: &CapturedResponse,
    ) -> Result<(), StorageError> {
        self.store.put(&self.name, request, response).await
    }
}

/// Open (creating if needed) a generation and return a handle to it
pub async fn open_generation(
    store: Arc<dyn CacheStore>,
    name: &str,
) -> Result<Generation, StorageError> {
    store.open(name).await?;
    Ok(Generation {
        store,
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_generation_name() {
        assert!(validate_generation_name("psp-v1").is_ok());
        assert!(validate_generation_name("site_2024.10").is_ok());
        assert!(validate_generation_name("").is_err());
        assert!(validate_generation_name("..").is_err());
        assert!(validate_generation_name("../etc").is_err());
        assert!(validate_generation_name("a/b").is_err());
        assert!(validate_generation_name("v 1").is_err());
        assert!(validate_generation_name(&"x".repeat(129)).is_err());
    }
}
