//! Shared constants used across the engine

/// Title used when the backend omits one or a replacement conversation has to
/// be synthesized.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

/// Seed message for freshly created conversations; `{title}` is substituted.
/// Matches the greeting the backend stores for new conversations.
pub const DEFAULT_GREETING: &str =
    "Hi, I am Iris. This is '{title}'. What are we building today?";

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Context tag sent with every prompt.
pub const DEFAULT_CONTEXT: &str = "default";

/// Reveal cadence: one display unit per tick.
pub const DEFAULT_REVEAL_INTERVAL_MS: u64 = 8;

/// Shortest reveal cadence; `tokio::time::interval` rejects a zero period.
pub const MIN_REVEAL_INTERVAL_MS: u64 = 1;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Prefix of the notice appended to an assistant message whose stream failed.
pub const FAILURE_NOTICE_PREFIX: &str = "[error]";
