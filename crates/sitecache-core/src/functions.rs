//! Site functions served next to the cached site: chat assistant and waitlist

use regex::Regex;
use serde::Serialize;
use sitecache_proxy::{ChatCompletion, ChatMessage};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

use crate::error::CoreError;

/// Reply used when the provider answers without any text
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't generate a response. Try again!";

/// Number of trailing messages forwarded to the provider by default
pub const DEFAULT_MAX_HISTORY: usize = 10;

pub const WAITLIST_SUCCESS: &str = "Successfully added to waitlist!";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

/// Chat assistant backed by a completion provider
pub struct ChatService {
    client: Arc<dyn ChatCompletion>,
    system_prompt: String,
    max_history: usize,
}

impl ChatService {
    pub fn new(client: Arc<dyn ChatCompletion>, system_prompt: impl Into<String>) -> Self {
        Self {
            client,
            system_prompt: system_prompt.into(),
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// Answer a conversation using only its most recent messages
    pub async fn reply(&self, messages: &[ChatMessage]) -> Result<String, CoreError> {
        let recent = &messages[messages.len().saturating_sub(self.max_history)..];
        debug!(
            "Forwarding {} of {} chat messages",
            recent.len(),
            messages.len()
        );

        let reply = self.client.complete(&self.system_prompt, recent).await?;
        Ok(reply.unwrap_or_else(|| FALLBACK_REPLY.to_string()))
    }
}

/// Result of a waitlist signup
#[derive(Debug, Clone, Serialize)]
pub struct Signup {
    pub success: bool,
    pub message: &'static str,
}

/// Waitlist signups; accepted addresses are only logged
#[derive(Debug, Default, Clone)]
pub struct WaitlistService;

impl WaitlistService {
    pub fn new() -> Self {
        Self
    }

    pub fn is_valid_email(email: &str) -> bool {
        EMAIL_RE.is_match(email)
    }

    pub fn signup(&self, email: &str) -> Result<Signup, CoreError> {
        if !Self::is_valid_email(email) {
            return Err(CoreError::InvalidEmail);
        }

        info!("New waitlist signup: {}", email);
        Ok(Signup {
            success: true,
            message: WAITLIST_SUCCESS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sitecache_proxy::ProxyError;

    #[derive(Default)]
    struct RecordingChat {
        reply: Option<String>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatCompletion for RecordingChat {
        async fn complete(
            &self,
            _system: &str,
            messages: &[ChatMessage],
        ) -> Result<Option<String>, ProxyError> {
            self.seen.lock().push(messages.to_vec());
            Ok(self.reply.clone())
        }
    }

    struct BrokenChat;

    #[async_trait]
    impl ChatCompletion for BrokenChat {
        async fn complete(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
        ) -> Result<Option<String>, ProxyError> {
            Err(ProxyError::UpstreamError {
                status: 529,
                message: "overloaded".to_string(),
            })
        }
    }

    fn conversation(len: usize) -> Vec<ChatMessage> {
        (0..len)
            .map(|i| ChatMessage {
                role: if i % 2 == 0 { "user" } else { "assistant" }.to_string(),
                content: format!("message {}", i),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_chat_trims_history() {
        let client = Arc::new(RecordingChat {
            reply: Some("Hi!".to_string()),
            ..Default::default()
        });
        let service = ChatService::new(client.clone(), "be brief");

        let reply = service.reply(&conversation(13)).await.unwrap();
        assert_eq!(reply, "Hi!");

        let seen = client.seen.lock();
        assert_eq!(seen[0].len(), DEFAULT_MAX_HISTORY);
        assert_eq!(seen[0][0].content, "message 3");
        assert_eq!(seen[0][9].content, "message 12");
    }

    #[tokio::test]
    async fn test_chat_short_history_and_fallback() {
        let client = Arc::new(RecordingChat::default());
        let service = ChatService::new(client.clone(), "be brief").with_max_history(4);

        let reply = service.reply(&conversation(2)).await.unwrap();
        assert_eq!(reply, FALLBACK_REPLY);
        assert_eq!(client.seen.lock()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_chat_provider_failure() {
        let service = ChatService::new(Arc::new(BrokenChat), "be brief");
        assert!(matches!(
            service.reply(&conversation(1)).await,
            Err(CoreError::Proxy(_))
        ));
    }

    #[test]
    fn test_email_validation() {
        assert!(WaitlistService::is_valid_email("fan@example.com"));
        assert!(WaitlistService::is_valid_email("a.b+c@mail.co.uk"));
        assert!(!WaitlistService::is_valid_email(""));
        assert!(!WaitlistService::is_valid_email("no-at-sign.com"));
        assert!(!WaitlistService::is_valid_email("fan@localhost"));
        assert!(!WaitlistService::is_valid_email("fan @example.com"));
        assert!(!WaitlistService::is_valid_email("a@b@c.com"));
    }

    #[test]
    fn test_signup() {
        let waitlist = WaitlistService::new();
        let signup = waitlist.signup("fan@example.com").unwrap();
        assert!(signup.success);
        assert_eq!(signup.message, WAITLIST_SUCCESS);

        assert!(matches!(
            waitlist.signup("nope"),
            Err(CoreError::InvalidEmail)
        ));
    }
}
