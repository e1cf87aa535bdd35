//! Fetch routing
//!
//! Every intercepted request is classified once, then handed to the strategy
//! for its class:
//!
//! | class          | strategy                 |
//! |----------------|--------------------------|
//! | `Excluded`     | bypass (network only)    |
//! | `Document`     | network-first            |
//! | `StaticAsset`  | stale-while-revalidate   |
//!
//! The router writes at most one entry per request into the current
//! generation and never deletes anything.

use serde::Serialize;
use sitecache_proxy::{ProxyError, Transport};
use sitecache_storage::{CacheStore, CapturedResponse, RequestDescriptor};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::error::CoreError;

/// Why a request is not intercepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    NonGet,
    CrossOrigin,
    ApiNamespace,
}

/// Routing class of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Excluded(Exclusion),
    Document,
    StaticAsset,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::Excluded(_) => "excluded",
            RequestClass::Document => "document",
            RequestClass::StaticAsset => "static_asset",
        }
    }
}

/// Classify a request for routing
pub fn classify(request: &RequestDescriptor, config: &WorkerConfig) -> RequestClass {
    if request.method != "GET" {
        return RequestClass::Excluded(Exclusion::NonGet);
    }
    if !config.is_same_origin(&request.url) {
        return RequestClass::Excluded(Exclusion::CrossOrigin);
    }
    if config.is_api_path(request.path()) {
        return RequestClass::Excluded(Exclusion::ApiNamespace);
    }

    let wants_html = request
        .accept()
        .is_some_and(|accept| accept.to_ascii_lowercase().contains("text/html"));

    if request.navigate || wants_html {
        RequestClass::Document
    } else {
        RequestClass::StaticAsset
    }
}

/// Where a routed response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    /// Live network response
    Network,
    /// Entry for the exact request
    Cache,
    /// Cached root document served in place of a failed navigation
    RootFallback,
    /// Request was not intercepted
    Bypass,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::RootFallback => "root-fallback",
            ResponseSource::Bypass => "bypass",
        }
    }
}

/// A response together with its origin
#[derive(Debug, Clone)]
pub struct Routed {
    pub response: CapturedResponse,
    pub source: ResponseSource,
}

impl Routed {
    fn new(response: CapturedResponse, source: ResponseSource) -> Self {
        Self { response, source }
    }
}

/// Fetch router bound to one generation
pub struct FetchRouter {
    config: Arc<WorkerConfig>,
    store: Arc<dyn CacheStore>,
    transport: Arc<dyn Transport>,
}

impl FetchRouter {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn CacheStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            store,
            transport,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn generation(&self) -> &str {
        self.config.cache_version.as_str()
    }

    /// Route one request
    pub async fn handle(&self, request: RequestDescriptor) -> Result<Routed, CoreError> {
        let class = classify(&request, &self.config);
        metrics::counter!("sitecache_requests_total", "class" => class.as_str()).increment(1);
        debug!("{} {} -> {}", request.method, request.url, class.as_str());

        // Intercepted requests are fetched and stored with identity encoding
        match class {
            RequestClass::Excluded(reason) => self.bypass(request, reason).await,
            RequestClass::Document => {
                self.network_first(request.without_header("accept-encoding"))
                    .await
            }
            RequestClass::StaticAsset => {
                self.stale_while_revalidate(request.without_header("accept-encoding"))
                    .await
            }
        }
    }

    /// Pass the request through without touching the cache
    async fn bypass(
        &self,
        request: RequestDescriptor,
        reason: Exclusion,
    ) -> Result<Routed, CoreError> {
        debug!("Bypassing cache for {} ({:?})", request.url, reason);
        let response = self.transport.fetch(&request).await.inspect_err(|_| {
            metrics::counter!("sitecache_network_failures_total").increment(1);
        })?;
        Ok(Routed::new(response, ResponseSource::Bypass))
    }

    /// Documents: live response first, cache only when the network fails
    async fn network_first(&self, request: RequestDescriptor) -> Result<Routed, CoreError> {
        match self.transport.fetch(&request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.store_entry(&request, &response).await;
                }
                Ok(Routed::new(response, ResponseSource::Network))
            }
            Err(e) => {
                metrics::counter!("sitecache_network_failures_total").increment(1);
                debug!("Network failed for document {}: {}", request.url, e);

                if let Some(cached) = self.lookup(&request).await {
                    record_hit();
                    return Ok(Routed::new(cached, ResponseSource::Cache));
                }

                let root = self.config.root_request()?;
                if let Some(cached) = self.lookup(&root).await {
                    record_hit();
                    return Ok(Routed::new(cached, ResponseSource::RootFallback));
                }

                record_miss();
                Err(CoreError::Offline(request.url.to_string()))
            }
        }
    }

    /// Static assets: cached copy immediately, refresh the entry in the background
    async fn stale_while_revalidate(
        &self,
        request: RequestDescriptor,
    ) -> Result<Routed, CoreError> {
        let revalidation = self.spawn_revalidation(request.clone());

        if let Some(cached) = self.lookup(&request).await {
            record_hit();
            return Ok(Routed::new(cached, ResponseSource::Cache));
        }

        record_miss();
        match revalidation.await {
            Ok(Ok(response)) => Ok(Routed::new(response, ResponseSource::Network)),
            Ok(Err(_)) => Err(CoreError::Offline(request.url.to_string())),
            Err(e) => Err(CoreError::Internal(format!(
                "Revalidation task for {} failed: {}",
                request.url, e
            ))),
        }
    }

    /// Fetch from the network and store the result; runs to completion even
    /// when nobody awaits it
    fn spawn_revalidation(
        &self,
        request: RequestDescriptor,
    ) -> JoinHandle<Result<CapturedResponse, ProxyError>> {
        let store = self.store.clone();
        let transport = self.transport.clone();
        let generation = self.generation().to_string();

        tokio::spawn(async move {
            let response = match transport.fetch(&request).await {
                Ok(response) => response,
                Err(e) => {
                    metrics::counter!("sitecache_network_failures_total").increment(1);
                    debug!("Revalidation of {} failed: {}", request.url, e);
                    return Err(e);
                }
            };

            if response.is_cacheable() {
                write_entry(store.as_ref(), &generation, &request, &response).await;
            }

            Ok(response)
        })
    }

    /// Read an entry from the current generation; store errors count as a miss
    async fn lookup(&self, request: &RequestDescriptor) -> Option<CapturedResponse> {
        match self.store.lookup(self.generation(), request).await {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    "Cache lookup for {} in {} failed: {}",
                    request.url,
                    self.generation(),
                    e
                );
                None
            }
        }
    }

    async fn store_entry(&self, request: &RequestDescriptor, response: &CapturedResponse) {
        write_entry(self.store.as_ref(), self.generation(), request, response).await;
    }
}

/// Write an entry if its generation still exists; failures never fail the request
///
/// A generation deleted by a newer activation stays deleted, even when a
/// request routed by the replaced worker completes afterwards.
async fn write_entry(
    store: &dyn CacheStore,
    generation: &str,
    request: &RequestDescriptor,
    response: &CapturedResponse,
) {
    match store.has(generation).await {
        Ok(true) => {
            if let Err(e) = store.put(generation, request, response).await {
                warn!("Failed to cache {} in {}: {}", request.url, generation, e);
            }
        }
        Ok(false) => debug!(
            "Generation {} no longer exists, not caching {}",
            generation, request.url
        ),
        Err(e) => warn!("Failed to check generation {}: {}", generation, e),
    }
}

fn record_hit() {
    metrics::counter!("sitecache_cache_hits_total").increment(1);
}

fn record_miss() {
    metrics::counter!("sitecache_cache_misses_total").increment(1);
}
