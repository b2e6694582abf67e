use super::conversation::ConversationId;
use super::session::SessionState;

/// Change notifications for the UI layer. The coordinator and its sessions
/// publish on an unbounded channel; the UI drains it and re-reads whatever
/// state it renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Conversations were loaded, created, renamed or removed.
    ConversationsChanged,
    SelectionChanged {
        index: usize,
    },
    MessageAppended {
        conversation: ConversationId,
        index: usize,
    },
    /// A reveal tick extended the trailing assistant message.
    UnitRevealed {
        conversation: ConversationId,
        unit: String,
    },
    SessionStateChanged {
        conversation: ConversationId,
        state: SessionState,
    },
    /// The fire-and-forget remote delete failed after the local removal.
    RemoteDeleteFailed {
        conversation: ConversationId,
        error: String,
    },
}
