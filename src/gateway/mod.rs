//! Remote Gateway: the collaborator that owns persistence and generation.
//!
//! The engine only depends on [`RemoteGateway`]; [`http::HttpGateway`] talks
//! to the Iris backend over HTTP, and tests substitute a scripted gateway.

pub mod http;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::core::conversation::{ConversationId, ConversationSummary};
use crate::core::message::Message;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// A request/response call failed (network error or unexpected status).
    #[error("{operation} failed: {message}")]
    Sync {
        operation: &'static str,
        message: String,
    },
    /// The response stream could not be opened or broke off.
    #[error("stream failed: {message}")]
    Transport { message: String },
}

impl GatewayError {
    pub fn sync(operation: &'static str, message: impl Into<String>) -> Self {
        GatewayError::Sync {
            operation,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        GatewayError::Transport {
            message: message.into(),
        }
    }
}

/// Lazy, finite sequence of response text fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub prompt: String,
    pub conversation: ConversationId,
    pub context: String,
    /// Messages preceding `prompt`.
    pub history: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    Global,
    Conversation(ConversationId),
}

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, GatewayError>;

    async fn create_conversation(&self, title: &str) -> Result<ConversationSummary, GatewayError>;

    async fn get_conversation(&self, id: ConversationId) -> Result<Vec<Message>, GatewayError>;

    async fn rename_conversation(&self, id: ConversationId, title: &str)
        -> Result<(), GatewayError>;

    async fn delete_conversation(&self, id: ConversationId) -> Result<(), GatewayError>;

    /// Open the response stream for `request`. Fails with
    /// [`GatewayError::Transport`] when the connection is refused or the
    /// backend answers with a non-success status.
    async fn stream_response(&self, request: StreamRequest)
        -> Result<FragmentStream, GatewayError>;

    async fn add_memory(&self, scope: MemoryScope, content: &str) -> Result<(), GatewayError>;
}
