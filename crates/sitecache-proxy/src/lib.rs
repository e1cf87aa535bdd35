//! Site Cache Network Layer
//!
//! This crate provides the clients sitecache talks to: the site origin
//! (through the [`Transport`] trait) and the chat-completion provider.

pub mod chat;
pub mod error;
pub mod origin;
pub mod transport;

pub use chat::{ChatClient, ChatClientConfig, ChatCompletion, ChatMessage};
pub use error::ProxyError;
pub use origin::{OriginClient, OriginClientConfig};
pub use transport::Transport;
