//! Proxy error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upstream returned error: {status} - {message}")]
    UpstreamError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
