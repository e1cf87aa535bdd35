//! Site Cache HTTP API
//!
//! This crate provides the Axum-based HTTP surface for sitecache: the site
//! functions, the worker management endpoints, health and metrics, and the
//! fallback that routes every other request through the active worker.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};
