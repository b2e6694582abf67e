use serde::{Deserialize, Serialize};

use crate::api::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Author {
    User,
    Assistant,
}

/// One entry in a conversation log.
///
/// The text of an assistant message grows only while it is the target of a
/// streaming session; every other message is immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub author: Author,
    pub text: String,
}

impl Author {
    pub fn as_str(self) -> &'static str {
        match self {
            Author::User => "user",
            Author::Assistant => "assistant",
        }
    }

    pub fn is_user(self) -> bool {
        self == Author::User
    }

    pub fn is_assistant(self) -> bool {
        self == Author::Assistant
    }
}

impl AsRef<str> for Author {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<&str> for Author {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl TryFrom<&str> for Author {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Author::User),
            "assistant" => Ok(Author::Assistant),
            _ => Err(format!("invalid message author: {value}")),
        }
    }
}

impl TryFrom<String> for Author {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Author> for String {
    fn from(value: Author) -> Self {
        value.as_str().to_string()
    }
}

impl Message {
    pub fn new(author: Author, text: impl Into<String>) -> Self {
        Self {
            author,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Author::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Author::Assistant, text)
    }

    /// Empty assistant message that a streaming session extends in place.
    pub fn assistant_placeholder() -> Self {
        Self::new(Author::Assistant, String::new())
    }

    pub fn is_user(&self) -> bool {
        self.author.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.author.is_assistant()
    }

    pub fn to_api(&self) -> ChatMessage {
        ChatMessage {
            role: self.author.as_str().to_string(),
            content: self.text.clone(),
        }
    }

    /// Convert a wire message into a log entry. Roles other than `user` and
    /// `assistant` (for example server-side system prompts) yield `None`.
    pub fn from_api(message: ChatMessage) -> Option<Self> {
        let author = Author::try_from(message.role.as_str()).ok()?;
        Some(Self::new(author, message.content))
    }
}
