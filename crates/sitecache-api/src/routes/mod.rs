//! API routes

mod auth;
mod functions;
mod health;
pub mod metrics;
pub mod proxy;
mod worker;

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;

use crate::state::{AppState, MetricsHandle};

/// Create the main router
pub fn create_router(state: AppState, metrics_handle: Option<Arc<MetricsHandle>>) -> Router {
    let mut router = Router::new()
        // Health check
        .merge(health::routes())
        // Site functions
        .merge(functions::routes())
        // Worker management
        .merge(worker::routes())
        .fallback(proxy::handle)
        .with_state(state)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024));

    // Add metrics endpoint if handle is provided
    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle));
    }

    router
}
