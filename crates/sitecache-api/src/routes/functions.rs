//! Site function routes: chat assistant and waitlist

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{Method, header},
    routing::post,
};
use serde::{Deserialize, Serialize};
use sitecache_core::Signup;
use sitecache_proxy::ChatMessage;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Deserialize)]
pub struct WaitlistRequest {
    #[serde(default)]
    pub email: Option<String>,
}

/// POST /api/chat
async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let service = state.chat.as_ref().ok_or(ApiError::ChatDisabled)?;

    let reply = service.reply(&request.messages).await.map_err(|e| {
        error!("Chat function error: {}", e);
        ApiError::ChatFailed
    })?;

    Ok(Json(ChatResponse { reply }))
}

/// POST /api/waitlist
async fn waitlist(
    State(state): State<AppState>,
    body: Result<Json<WaitlistRequest>, JsonRejection>,
) -> Result<Json<Signup>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let email = request.email.unwrap_or_default();

    Ok(Json(state.waitlist.signup(&email)?))
}

/// Create function routes, open to cross-origin callers
pub fn routes() -> Router<AppState> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/waitlist", post(waitlist))
        .layer(cors)
}
