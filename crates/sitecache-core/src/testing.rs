//! Test doubles shared by the core tests

use async_trait::async_trait;
use parking_lot::Mutex;
use sitecache_proxy::{ProxyError, Transport};
use sitecache_storage::{CacheStore, CapturedResponse, ObjectStorage, RequestDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::{CacheVersion, PrecacheManifest, WorkerConfig};

pub(crate) const ORIGIN: &str = "https://powerscraperpro.com";

#[derive(Clone)]
pub(crate) enum Reply {
    Respond(CapturedResponse),
    Fail,
    Hang,
}

/// Scripted transport keyed by request path
#[derive(Default)]
pub(crate) struct MockTransport {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, path: &str, status: u16, body: &'static str) {
        self.replies.lock().insert(
            path.to_string(),
            Reply::Respond(CapturedResponse::new(status, body)),
        );
    }

    pub(crate) fn fail(&self, path: &str) {
        self.replies.lock().insert(path.to_string(), Reply::Fail);
    }

    pub(crate) fn hang(&self, path: &str) {
        self.replies.lock().insert(path.to_string(), Reply::Hang);
    }

    pub(crate) fn calls(&self, path: &str) -> usize {
        self.calls.lock().iter().filter(|p| *p == path).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<CapturedResponse, ProxyError> {
        let path = request.url.path().to_string();
        self.calls.lock().push(path.clone());
        let reply = self.replies.lock().get(&path).cloned().unwrap_or(Reply::Fail);
        match reply {
            Reply::Respond(response) => Ok(response),
            Reply::Fail => Err(ProxyError::Unreachable(path)),
            Reply::Hang => std::future::pending().await,
        }
    }
}

pub(crate) fn memory_store() -> Arc<dyn CacheStore> {
    Arc::new(ObjectStorage::in_memory())
}

pub(crate) fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub(crate) fn get(path: &str) -> RequestDescriptor {
    RequestDescriptor::get(url(path))
}

pub(crate) fn navigate(path: &str) -> RequestDescriptor {
    get(path)
        .with_navigate(true)
        .with_header("accept", "text/html,application/xhtml+xml")
}

pub(crate) fn worker_config(version: &str, manifest: &[&str]) -> WorkerConfig {
    WorkerConfig::new(
        CacheVersion::new(version).unwrap(),
        PrecacheManifest::new(manifest.iter().copied()).unwrap(),
        Url::parse(ORIGIN).unwrap(),
    )
}

/// Wait up to a second for the transport to have seen `count` calls to `path`
pub(crate) async fn wait_for_calls(transport: &MockTransport, path: &str, count: usize) -> bool {
    for _ in 0..100 {
        if transport.calls(path) >= count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Wait up to a second for a generation to hold `body` for `request`
pub(crate) async fn wait_for_body(
    store: &Arc<dyn CacheStore>,
    generation: &str,
    request: &RequestDescriptor,
    body: &str,
) -> bool {
    for _ in 0..100 {
        if let Ok(Some(found)) = store.lookup(generation, request).await {
            if found.body == body.as_bytes() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
