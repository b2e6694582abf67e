//! Wire payloads exchanged with the conversation backend.

use serde::{Deserialize, Serialize};

use crate::core::conversation::{ConversationId, ConversationSummary};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of `POST /chat`. The backend appends `prompt` as the newest user turn
/// itself, so `messages` carries only the history that precedes it.
#[derive(Serialize)]
pub struct ChatRequest {
    pub prompt: String,
    pub conversation: ConversationId,
    pub context: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct ConversationCreate {
    pub title: String,
}

#[derive(Serialize)]
pub struct ConversationRename {
    pub title: String,
}

#[derive(Serialize)]
pub struct MemoryUpdate {
    pub content: String,
}

#[derive(Deserialize)]
pub struct ConversationListResponse {
    #[serde(default)]
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Deserialize)]
pub struct ConversationDetail {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}
