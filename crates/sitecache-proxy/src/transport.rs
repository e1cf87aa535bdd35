//! Network transport trait

use async_trait::async_trait;
use sitecache_storage::{CapturedResponse, RequestDescriptor};

use crate::error::ProxyError;

/// Network transport
///
/// A fetch that reaches the server resolves with whatever status the server
/// returned; only failures to obtain a response at all are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<CapturedResponse, ProxyError>;
}
