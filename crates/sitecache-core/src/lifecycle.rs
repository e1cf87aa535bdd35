//! Worker lifecycle: install, activate, serve
//!
//! A [`Worker`] pairs one [`WorkerConfig`] with a [`FetchRouter`] bound to
//! that config's generation. The [`LifecycleManager`] owns the slot for the
//! active worker. Installing a new worker populates its generation from the
//! precache manifest; activating it removes every other generation and
//! moves the active slot over to it.
//!
//! ```text
//! Uninstalled -> Installing -> Installed -> Activating -> Active -> Redundant
//!                     \______________________________________________/
//!                                    (install failed)
//! ```

use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::Serialize;
use sitecache_proxy::Transport;
use sitecache_storage::{CacheStore, CapturedResponse, RequestDescriptor, open_generation};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{CacheVersion, WorkerConfig};
use crate::error::CoreError;
use crate::router::{FetchRouter, ResponseSource, Routed};

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Uninstalled,
    Installing,
    Installed,
    Activating,
    Active,
    /// Replaced by a newer worker, or install failed
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Uninstalled => "uninstalled",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One deployed version of the cache policy
pub struct Worker {
    config: Arc<WorkerConfig>,
    router: FetchRouter,
    state: RwLock<WorkerState>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("version", &self.config.cache_version)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Worker {
    fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn CacheStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            router: FetchRouter::new(config.clone(), store, transport),
            config,
            state: RwLock::new(WorkerState::Uninstalled),
        }
    }

    pub fn version(&self) -> &CacheVersion {
        &self.config.cache_version
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn router(&self) -> &FetchRouter {
        &self.router
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    fn set_state(&self, state: WorkerState) {
        let mut current = self.state.write();
        debug!(
            "Worker {}: {} -> {}",
            self.config.cache_version, *current, state
        );
        *current = state;
    }
}

/// A generation that could not be deleted during activation
#[derive(Debug, Clone, Serialize)]
pub struct DeletionFailure {
    pub generation: String,
    pub error: String,
}

/// Outcome of an activation's cleanup step
#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub version: String,
    pub deleted: Vec<String>,
    pub failed: Vec<DeletionFailure>,
    /// Set when the generation listing itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_error: Option<String>,
}

impl ActivationReport {
    fn new(version: &CacheVersion) -> Self {
        Self {
            version: version.to_string(),
            deleted: Vec::new(),
            failed: Vec::new(),
            list_error: None,
        }
    }

    /// True when every stale generation was removed
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.list_error.is_none()
    }
}

/// Snapshot of the lifecycle for the management API
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleStatus {
    pub active_version: Option<String>,
    pub state: WorkerState,
    pub generations: Vec<String>,
    pub entries: Option<usize>,
    pub precache: Vec<String>,
    pub storage: &'static str,
}

/// Owner of the active worker
pub struct LifecycleManager {
    store: Arc<dyn CacheStore>,
    transport: Arc<dyn Transport>,
    active: RwLock<Option<Arc<Worker>>>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn CacheStore>, transport: Arc<dyn Transport>) -> Self {
        info!("Initializing lifecycle manager (storage: {})", store.kind());
        Self {
            store,
            transport,
            active: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn active_worker(&self) -> Option<Arc<Worker>> {
        self.active.read().clone()
    }

    pub fn active_version(&self) -> Option<CacheVersion> {
        self.active.read().as_ref().map(|w| w.version().clone())
    }

    /// Install a worker: populate its generation from the precache manifest.
    ///
    /// Either every manifest entry is fetched and stored, or the install
    /// fails and the currently active worker (if any) keeps serving.
    pub async fn install(&self, config: WorkerConfig) -> Result<Arc<Worker>, CoreError> {
        config.validate()?;
        let config = Arc::new(config);
        let worker = Arc::new(Worker::new(
            config.clone(),
            self.store.clone(),
            self.transport.clone(),
        ));

        worker.set_state(WorkerState::Installing);
        info!(
            "Installing cache generation {} ({} precache entries)",
            config.cache_version,
            config.precache.len()
        );
        if config.precache.is_empty() {
            warn!(
                "Precache manifest of {} is empty, offline navigations have no root fallback",
                config.cache_version
            );
        }

        match self.populate(&config).await {
            Ok(count) => {
                worker.set_state(WorkerState::Installed);
                metrics::counter!("sitecache_installs_total", "result" => "success").increment(1);
                info!(
                    "Installed cache generation {} with {} entries",
                    config.cache_version, count
                );
                Ok(worker)
            }
            Err(e) => {
                worker.set_state(WorkerState::Redundant);
                metrics::counter!("sitecache_installs_total", "result" => "failure").increment(1);
                error!("Install of cache generation {} failed: {}", config.cache_version, e);
                Err(e)
            }
        }
    }

    /// Fetch the whole manifest, then store it; undo a generation this call created
    async fn populate(&self, config: &WorkerConfig) -> Result<usize, CoreError> {
        let version = config.cache_version.as_str();
        let requests = config.precache.requests(&config.origin)?;
        let existed = self.store.has(version).await?;
        let generation = open_generation(self.store.clone(), version).await?;

        let outcome: Result<usize, CoreError> = async {
            let responses = try_join_all(
                requests
                    .iter()
                    .map(|request| self.fetch_for_install(version, request)),
            )
            .await?;

            for (request, response) in requests.iter().zip(&responses) {
                generation.put(request, response).await?;
            }
            Ok(responses.len())
        }
        .await;

        let serving = self
            .active_version()
            .is_some_and(|active| active.as_str() == version);

        if outcome.is_err() && !existed && !serving {
            debug!("Removing partially created generation {}", version);
            if let Err(e) = self.store.delete(version).await {
                warn!("Failed to remove failed generation {}: {}", version, e);
            }
        }

        outcome
    }

    async fn fetch_for_install(
        &self,
        version: &str,
        request: &RequestDescriptor,
    ) -> Result<CapturedResponse, CoreError> {
        let response = self
            .transport
            .fetch(request)
            .await
            .map_err(|e| CoreError::InstallFailed {
                version: version.to_string(),
                reason: format!("{}: {}", request.url, e),
            })?;

        if !response.is_cacheable() {
            return Err(CoreError::InstallFailed {
                version: version.to_string(),
                reason: format!("{} returned status {}", request.url, response.status),
            });
        }

        Ok(response)
    }

    /// Activate an installed worker.
    ///
    /// Deletes every generation not named after the worker's version, then
    /// makes it the active worker. Deletion failures are reported and logged
    /// but do not stop activation.
    pub async fn activate(&self, worker: &Arc<Worker>) -> Result<ActivationReport, CoreError> {
        let state = worker.state();
        if !matches!(state, WorkerState::Installed | WorkerState::Active) {
            return Err(CoreError::InvalidState {
                version: worker.version().to_string(),
                state: state.to_string(),
            });
        }

        worker.set_state(WorkerState::Activating);
        let version = worker.version().as_str();
        let mut report = ActivationReport::new(worker.version());

        match self.store.keys().await {
            Ok(names) => {
                for name in names.into_iter().filter(|n| n != version) {
                    match self.store.delete(&name).await {
                        Ok(true) => {
                            info!("Deleted stale cache generation {}", name);
                            report.deleted.push(name);
                        }
                        Ok(false) => debug!("Stale cache generation {} already gone", name),
                        Err(e) => {
                            metrics::counter!("sitecache_generation_delete_failures_total")
                                .increment(1);
                            warn!("Failed to delete stale cache generation {}: {}", name, e);
                            report.failed.push(DeletionFailure {
                                generation: name,
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                metrics::counter!("sitecache_generation_delete_failures_total").increment(1);
                warn!("Failed to list cache generations: {}", e);
                report.list_error = Some(e.to_string());
            }
        }

        // Claim clients: later fetches go through this worker
        let previous = self.active.write().replace(worker.clone());
        if let Some(previous) = previous.filter(|p| !Arc::ptr_eq(p, worker)) {
            previous.set_state(WorkerState::Redundant);
        }
        worker.set_state(WorkerState::Active);

        info!(
            "Cache generation {} is active ({} stale generations deleted, {} failed)",
            version,
            report.deleted.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Install a configuration and, on success, take over immediately
    pub async fn deploy(&self, config: WorkerConfig) -> Result<ActivationReport, CoreError> {
        let worker = self.install(config).await?;
        self.activate(&worker).await
    }

    /// Re-run the activation cleanup for the active worker
    pub async fn cleanup(&self) -> Result<ActivationReport, CoreError> {
        let worker = self.active_worker().ok_or(CoreError::NoActiveWorker)?;
        self.activate(&worker).await
    }

    /// Serve one request through the active worker
    ///
    /// With no active worker nothing is intercepted.
    pub async fn handle_fetch(&self, request: RequestDescriptor) -> Result<Routed, CoreError> {
        match self.active_worker() {
            Some(worker) => worker.router().handle(request).await,
            None => {
                debug!("No active worker, passing {} through", request.url);
                let response = self.transport.fetch(&request).await?;
                Ok(Routed {
                    response,
                    source: ResponseSource::Bypass,
                })
            }
        }
    }

    /// Current lifecycle snapshot
    pub async fn status(&self) -> Result<LifecycleStatus, CoreError> {
        let worker = self.active_worker();
        let generations = self.store.keys().await?;

        let entries = match &worker {
            Some(w) => match self.store.entries(w.version().as_str()).await {
                Ok(entries) => Some(entries.len()),
                Err(e) => {
                    warn!("Failed to count entries of {}: {}", w.version(), e);
                    None
                }
            },
            None => None,
        };

        Ok(LifecycleStatus {
            active_version: worker.as_ref().map(|w| w.version().to_string()),
            state: worker
                .as_ref()
                .map(|w| w.state())
                .unwrap_or(WorkerState::Uninstalled),
            generations,
            entries,
            precache: worker
                .as_ref()
                .map(|w| w.config().precache.paths().to_vec())
                .unwrap_or_default(),
            storage: self.store.kind(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, get, memory_store, navigate, wait_for_body, worker_config};
    use async_trait::async_trait;
    use bytes::Bytes;
    use sitecache_storage::StorageError;

    fn manager(transport: &Arc<MockTransport>, store: &Arc<dyn CacheStore>) -> LifecycleManager {
        LifecycleManager::new(store.clone(), transport.clone())
    }

    #[tokio::test]
    async fn test_install_populates_generation() {
        let transport = MockTransport::new();
        transport.respond("/", 200, "home");
        transport.respond("/index.html", 200, "index");
        let store = memory_store();
        let manager = manager(&transport, &store);

        let worker = manager
            .install(worker_config("v1", &["/", "/index.html"]))
            .await
            .unwrap();

        assert_eq!(worker.state(), WorkerState::Installed);
        assert_eq!(store.entries("v1").await.unwrap().len(), 2);
        // Installed but not yet active
        assert!(manager.active_worker().is_none());
    }

    #[tokio::test]
    async fn test_install_with_empty_manifest() {
        let transport = MockTransport::new();
        let store = memory_store();
        let manager = manager(&transport, &store);

        let worker = manager.install(worker_config("v1", &[])).await.unwrap();
        assert_eq!(worker.state(), WorkerState::Installed);
        assert_eq!(store.keys().await.unwrap(), vec!["v1".to_string()]);
        assert!(store.entries("v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_failure_is_atomic() {
        let transport = MockTransport::new();
        transport.respond("/", 200, "home");
        transport.fail("/index.html");
        let store = memory_store();
        let manager = manager(&transport, &store);

        let result = manager
            .install(worker_config("v1", &["/", "/index.html"]))
            .await;

        assert!(matches!(result, Err(CoreError::InstallFailed { .. })));
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_rejects_error_status() {
        let transport = MockTransport::new();
        transport.respond("/", 200, "home");
        transport.respond("/new.css", 404, "missing");
        let store = memory_store();
        let manager = manager(&transport, &store);

        let err = manager
            .install(worker_config("v1", &["/", "/new.css"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
        assert!(!store.has("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_install_keeps_previous_worker_serving() {
        let transport = MockTransport::new();
        transport.respond("/", 200, "home-v1");
        let store = memory_store();
        let manager = manager(&transport, &store);
        manager.deploy(worker_config("v1", &["/"])).await.unwrap();

        transport.fail("/");
        let result = manager.deploy(worker_config("v2", &["/"])).await;
        assert!(result.is_err());

        assert_eq!(manager.active_version().unwrap().as_str(), "v1");
        assert_eq!(store.keys().await.unwrap(), vec!["v1"]);

        // Still serving v1 offline
        let routed = manager.handle_fetch(navigate("/")).await.unwrap();
        assert_eq!(routed.source, ResponseSource::Cache);
        assert_eq!(routed.response.body, Bytes::from("home-v1"));
    }

    #[tokio::test]
    async fn test_activation_deletes_other_generations_and_is_idempotent() {
        let transport = MockTransport::new();
        transport.respond("/", 200, "home");
        let store = memory_store();
        for stale in ["psp-v0", "old-site", "v2"] {
            store.open(stale).await.unwrap();
        }
        let manager = manager(&transport, &store);

        let worker = manager.install(worker_config("v2", &["/"])).await.unwrap();
        let report = manager.activate(&worker).await.unwrap();
        assert_eq!(report.deleted, vec!["old-site", "psp-v0"]);
        assert!(report.is_clean());
        assert_eq!(store.keys().await.unwrap(), vec!["v2"]);
        assert_eq!(worker.state(), WorkerState::Active);

        let again = manager.cleanup().await.unwrap();
        assert!(again.deleted.is_empty());
        assert_eq!(store.keys().await.unwrap(), vec!["v2"]);
    }

    #[tokio::test]
    async fn test_cannot_activate_failed_worker() {
        let transport = MockTransport::new();
        let store = memory_store();
        let manager = manager(&transport, &store);

        let worker = Arc::new(Worker::new(
            Arc::new(worker_config("v1", &["/"])),
            store.clone(),
            transport.clone(),
        ));
        worker.set_state(WorkerState::Redundant);
        assert!(matches!(
            manager.activate(&worker).await,
            Err(CoreError::InvalidState { .. })
        ));
        assert!(matches!(manager.cleanup().await, Err(CoreError::NoActiveWorker)));
    }

    #[tokio::test]
    async fn test_no_active_worker_passes_through() {
        let transport = MockTransport::new();
        transport.respond("/css/styles.css", 200, "css");
        let store = memory_store();
        let manager = manager(&transport, &store);

        let routed = manager.handle_fetch(get("/css/styles.css")).await.unwrap();
        assert_eq!(routed.source, ResponseSource::Bypass);
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_v1_then_v2() {
        let transport = MockTransport::new();
        transport.respond("/", 200, "home");
        transport.respond("/index.html", 200, "index");
        let store = memory_store();
        let manager = manager(&transport, &store);

        manager
            .deploy(worker_config("v1", &["/", "/index.html"]))
            .await
            .unwrap();
        assert_eq!(store.entries("v1").await.unwrap().len(), 2);
        let v1 = manager.active_worker().unwrap();

        transport.respond("/new.css", 200, "new-css");
        let report = manager
            .deploy(worker_config("v2", &["/", "/index.html", "/new.css"]))
            .await
            .unwrap();

        assert_eq!(report.deleted, vec!["v1"]);
        assert_eq!(store.keys().await.unwrap(), vec!["v2"]);
        assert_eq!(store.entries("v2").await.unwrap().len(), 3);
        assert_eq!(v1.state(), WorkerState::Redundant);

        // The asset is answered from v2 even with the network gone
        transport.fail("/new.css");
        let routed = manager.handle_fetch(get("/new.css")).await.unwrap();
        assert_eq!(routed.source, ResponseSource::Cache);
        assert_eq!(routed.response.body, Bytes::from("new-css"));

        let status = manager.status().await.unwrap();
        assert_eq!(status.active_version.as_deref(), Some("v2"));
        assert_eq!(status.state, WorkerState::Active);
        assert_eq!(status.entries, Some(3));
    }

    #[tokio::test]
    async fn test_router_writes_into_active_generation() {
        let transport = MockTransport::new();
        transport.respond("/", 200, "home");
        transport.respond("/js/main.js", 200, "js");
        let store = memory_store();
        let manager = manager(&transport, &store);
        manager.deploy(worker_config("v1", &["/"])).await.unwrap();

        manager.handle_fetch(get("/js/main.js")).await.unwrap();
        assert!(wait_for_body(&store, "v1", &get("/js/main.js"), "js").await);
    }

    /// Store whose deletes always fail
    struct StickyStore {
        inner: Arc<dyn CacheStore>,
    }

    #[async_trait]
    impl CacheStore for StickyStore {
        async fn open(&self, name: &str) -> Result<(), StorageError> {
            self.inner.open(name).await
        }
        async fn keys(&self) -> Result<Vec<String>, StorageError> {
            self.inner.keys().await
        }
        async fn delete(&self, name: &str) -> Result<bool, StorageError> {
            Err(StorageError::ObjectStore(format!("permission denied: {}", name)))
        }
        async fn put(
            &self,
            name: &str,
            request: &RequestDescriptor,
            response: &CapturedResponse,
        ) -> Result<(), StorageError> {
            self.inner.put(name, request, response).await
        }
        async fn lookup(
            &self,
            name: &str,
            request: &RequestDescriptor,
        ) -> Result<Option<CapturedResponse>, StorageError> {
            self.inner.lookup(name, request).await
        }
        async fn entries(&self, name: &str) -> Result<Vec<RequestDescriptor>, StorageError> {
            self.inner.entries(name).await
        }
        fn kind(&self) -> &'static str {
            "sticky"
        }
    }

    #[tokio::test]
    async fn test_deletion_failures_are_reported_not_fatal() {
        let transport = MockTransport::new();
        transport.respond("/", 200, "home");
        let inner = memory_store();
        inner.open("v1").await.unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(StickyStore { inner });
        let manager = manager(&transport, &store);

        let report = manager.deploy(worker_config("v2", &["/"])).await.unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].generation, "v1");
        assert_eq!(manager.active_version().unwrap().as_str(), "v2");

        // Routing targets v2 by name regardless of the leftover
        transport.fail("/");
        let routed = manager.handle_fetch(navigate("/")).await.unwrap();
        assert_eq!(routed.response.body, Bytes::from("home"));
    }
}
