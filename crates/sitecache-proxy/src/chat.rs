//! Chat-completion provider client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ProxyError;

/// Chat client configuration
#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    /// Messages endpoint of the provider
    pub api_url: String,
    /// API key sent as `x-api-key`
    pub api_key: String,
    /// Value of the `anthropic-version` header
    pub api_version: String,
    /// Model identifier
    pub model: String,
    /// Upper bound on generated tokens
    pub max_tokens: u32,
}

/// One turn of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Anything that can answer a conversation
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Return the reply text, or `None` when the provider produced none
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<Option<String>, ProxyError>;
}

/// Client for the chat-completion messages API
pub struct ChatClient {
    config: ChatClientConfig,
    client: Client,
}

impl ChatClient {
    /// Create a new chat client
    pub fn new(config: ChatClientConfig) -> Result<Self, ProxyError> {
        let client = Client::builder().build()?;

        info!(
            "Created chat client for {} (model: {})",
            config.api_url, config.model
        );

        Ok(Self { config, client })
    }
}

#[async_trait]
impl ChatCompletion for ChatClient {
    /// Send a conversation and return the text of the first content block
    ///
    /// `Ok(None)` means the provider answered but produced no text.
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<Option<String>, ProxyError> {
        debug!("Sending {} chat messages to provider", messages.len());

        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system,
            messages,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("Chat provider error: {} {}", status.as_u16(), message);
            return Err(ProxyError::UpstreamError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::InvalidResponse(e.to_string()))?;

        Ok(first_text(parsed))
    }
}

fn first_text(response: MessagesResponse) -> Option<String> {
    response
        .content
        .into_iter()
        .next()
        .and_then(|block| block.text)
        .filter(|text| !text.is_empty())
}
