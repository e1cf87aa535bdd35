//! Application state

use metrics_exporter_prometheus::PrometheusHandle;
use sitecache_core::{ChatService, LifecycleManager, WaitlistService, WorkerConfig};
use std::sync::Arc;

/// Handle used to render the Prometheus exposition
pub type MetricsHandle = PrometheusHandle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    /// Configuration redeployed by the install endpoint
    pub worker_config: Arc<WorkerConfig>,
    /// `None` when the chat function is disabled
    pub chat: Option<Arc<ChatService>>,
    pub waitlist: WaitlistService,
    /// Bearer token required by the management routes
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        worker_config: Arc<WorkerConfig>,
        chat: Option<Arc<ChatService>>,
    ) -> Self {
        Self {
            lifecycle,
            worker_config,
            chat,
            waitlist: WaitlistService::new(),
            admin_token: None,
        }
    }

    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.admin_token = (!token.is_empty()).then(|| Arc::from(token));
        self
    }
}
