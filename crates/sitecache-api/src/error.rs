//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sitecache_core::CoreError;
use thiserror::Error;

/// Message returned when the chat provider fails
pub const CHAT_FAILURE_MESSAGE: &str = "AI service temporarily unavailable. Please try again.";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Chat is not configured")]
    ChatDisabled,

    #[error("AI service temporarily unavailable. Please try again.")]
    ChatFailed,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized".to_string(),
            ),
            ApiError::ChatDisabled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CHAT_DISABLED",
                self.to_string(),
            ),
            ApiError::ChatFailed => (
                StatusCode::BAD_GATEWAY,
                "CHAT_FAILED",
                CHAT_FAILURE_MESSAGE.to_string(),
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
            ApiError::Core(e) => match e {
                CoreError::InvalidEmail => (StatusCode::BAD_REQUEST, "INVALID_EMAIL", e.to_string()),
                CoreError::Offline(_) => (StatusCode::GATEWAY_TIMEOUT, "OFFLINE", e.to_string()),
                CoreError::InstallFailed { .. } => {
                    (StatusCode::BAD_GATEWAY, "INSTALL_FAILED", e.to_string())
                }
                CoreError::Proxy(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", e.to_string()),
                CoreError::InvalidState { .. } | CoreError::NoActiveWorker => {
                    (StatusCode::CONFLICT, "INVALID_STATE", e.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    e.to_string(),
                ),
            },
        };

        let body = axum::Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
