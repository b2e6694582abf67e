use std::fmt;

use serde::{Deserialize, Serialize};

use super::message::Message;

/// Server-assigned conversation identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(u64);

impl ConversationId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ConversationId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    #[serde(default = "default_summary_title")]
    pub title: String,
}

impl ConversationSummary {
    pub fn new(id: impl Into<ConversationId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

fn default_summary_title() -> String {
    crate::core::constants::DEFAULT_CONVERSATION_TITLE.to_string()
}

pub type ConversationLog = Vec<Message>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_without_title_uses_default() {
        let summary: ConversationSummary = serde_json::from_str(r#"{"id":7}"#).expect("parse");
        assert_eq!(summary.id, ConversationId::new(7));
        assert_eq!(summary.title, "New Conversation");
    }
}
