//! Worker management routes

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use sitecache_core::{ActivationReport, LifecycleStatus};
use tracing::info;

use super::auth::RequireAdmin;
use crate::error::ApiError;
use crate::state::AppState;

/// GET /_sitecache/status
async fn status(State(state): State<AppState>) -> Result<Json<LifecycleStatus>, ApiError> {
    Ok(Json(state.lifecycle.status().await?))
}

/// POST /_sitecache/install - install and activate the configured version (admin)
async fn install(
    _admin: RequireAdmin,
    State(state): State<AppState>,
) -> Result<Json<ActivationReport>, ApiError> {
    info!(
        "Redeploying cache generation {}",
        state.worker_config.cache_version
    );

    let config = state.worker_config.as_ref().clone();
    Ok(Json(state.lifecycle.deploy(config).await?))
}

/// POST /_sitecache/activate - rerun stale generation cleanup (admin)
async fn activate(
    _admin: RequireAdmin,
    State(state): State<AppState>,
) -> Result<Json<ActivationReport>, ApiError> {
    info!("Running cache generation cleanup");

    Ok(Json(state.lifecycle.cleanup().await?))
}

/// Create worker management routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/_sitecache/status", get(status))
        .route("/_sitecache/install", post(install))
        .route("/_sitecache/activate", post(activate))
}
