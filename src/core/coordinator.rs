use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::Config;
use super::constants::{
    DEFAULT_CONTEXT, DEFAULT_CONVERSATION_TITLE, DEFAULT_GREETING, DEFAULT_REVEAL_INTERVAL_MS,
};
use super::conversation::{ConversationId, ConversationSummary};
use super::events::EngineEvent;
use super::message::Message;
use super::session::{SessionParams, StreamingSession};
use super::store::{lock_store, ConversationStore, SharedStore, StoreError};
use crate::gateway::{GatewayError, MemoryScope, RemoteGateway, StreamRequest};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("the assistant is still responding in conversation {0}")]
    InputLocked(ConversationId),
    #[error("conversations have not been loaded yet")]
    NotInitialized,
}

impl CoordinatorError {
    pub fn is_sync_error(&self) -> bool {
        matches!(self, CoordinatorError::Gateway(GatewayError::Sync { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub context: String,
    pub default_title: String,
    /// Seed message template; `{title}` is replaced by the conversation title.
    pub greeting: String,
    pub reveal_interval: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            context: DEFAULT_CONTEXT.to_string(),
            default_title: DEFAULT_CONVERSATION_TITLE.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            reveal_interval: Duration::from_millis(DEFAULT_REVEAL_INTERVAL_MS),
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            context: config.context().to_string(),
            default_title: config.default_title().to_string(),
            greeting: config.greeting().to_string(),
            reveal_interval: config.reveal_interval(),
        }
    }

    pub fn greeting_for(&self, title: &str) -> String {
        self.greeting.replace("{title}", title)
    }
}

/// Which memory a note is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteScope {
    Global,
    /// The currently selected conversation.
    Conversation,
}

/// Entry point for the UI layer.
///
/// Owns the conversation store and every streaming session. Mutating entry
/// points take `&mut self`, so they never run concurrently; the only other
/// writers are the reveal timers of live sessions, each confined to the
/// trailing message of its own conversation.
pub struct SessionCoordinator {
    gateway: Arc<dyn RemoteGateway>,
    store: SharedStore,
    sessions: HashMap<ConversationId, StreamingSession>,
    settings: CoordinatorSettings,
    events: mpsc::UnboundedSender<EngineEvent>,
    initialized: bool,
}

impl SessionCoordinator {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        settings: CoordinatorSettings,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            gateway,
            store: ConversationStore::new().into_shared(),
            sessions: HashMap::new(),
            settings,
            events,
            initialized: false,
        };
        (coordinator, rx)
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn ensure_initialized(&self) -> Result<(), CoordinatorError> {
        if self.initialized {
            Ok(())
        } else {
            Err(CoordinatorError::NotInitialized)
        }
    }

    /// Release sessions that reached a terminal state.
    fn reap_sessions(&mut self) {
        self.sessions.retain(|id, session| {
            let live = session.is_live();
            if !live {
                debug!(conversation = %id, state = %session.state(), "Releasing session");
            }
            live
        });
    }

    fn emit_selection(&self) {
        if let Some(index) = lock_store(&self.store).selected_index() {
            self.emit(EngineEvent::SelectionChanged { index });
        }
    }

    /// Load every conversation from the gateway, replacing local state.
    ///
    /// When the backend has none, one default conversation is created so the
    /// store is never empty afterwards. On failure the store is untouched.
    pub async fn init(&mut self) -> Result<(), CoordinatorError> {
        let summaries = self.gateway.list_conversations().await?;
        let mut logs = HashMap::with_capacity(summaries.len());
        for summary in &summaries {
            let log = self.gateway.get_conversation(summary.id).await?;
            logs.insert(summary.id, log);
        }

        self.cancel_all_sessions();
        lock_store(&self.store).load(summaries, logs)?;
        self.initialized = true;
        info!(
            conversations = lock_store(&self.store).len(),
            "Loaded conversations"
        );
        self.emit(EngineEvent::ConversationsChanged);

        if lock_store(&self.store).is_empty() {
            let title = self.settings.default_title.clone();
            self.create_conversation(&title).await?;
        } else {
            self.emit_selection();
        }
        Ok(())
    }

    /// Cancel every outstanding session and its timer.
    pub fn shutdown(&mut self) {
        self.cancel_all_sessions();
    }

    fn cancel_all_sessions(&mut self) {
        for (id, session) in self.sessions.drain() {
            if session.is_live() {
                debug!(conversation = %id, "Cancelling session");
            }
            session.cancel();
        }
    }

    /// Send `text` to the selected conversation.
    ///
    /// Appends the user message and an empty assistant placeholder, then
    /// starts a session that streams the reply into the placeholder. Returns
    /// immediately; `Ok(None)` means the text was blank and nothing happened.
    pub fn send_message(
        &mut self,
        text: &str,
    ) -> Result<Option<StreamingSession>, CoordinatorError> {
        let prompt = text.trim();
        if prompt.is_empty() {
            return Ok(None);
        }
        self.ensure_initialized()?;
        self.reap_sessions();

        let (target, history, message_index) = {
            let mut store = lock_store(&self.store);
            let target = store.selected_id()?;
            if self.sessions.contains_key(&target) {
                return Err(CoordinatorError::InputLocked(target));
            }
            let history = store.log(target).map(<[_]>::to_vec).unwrap_or_default();
            let user_index = store.append_message(target, Message::user(prompt))?;
            let message_index = store.append_message(target, Message::assistant_placeholder())?;
            self.emit(EngineEvent::MessageAppended {
                conversation: target,
                index: user_index,
            });
            self.emit(EngineEvent::MessageAppended {
                conversation: target,
                index: message_index,
            });
            (target, history, message_index)
        };

        debug!(conversation = %target, history = history.len(), "Starting session");
        let session = StreamingSession::start(SessionParams {
            target,
            message_index,
            request: StreamRequest {
                prompt: prompt.to_string(),
                conversation: target,
                context: self.settings.context.clone(),
                history,
            },
            gateway: self.gateway.clone(),
            store: self.store.clone(),
            reveal_interval: self.settings.reveal_interval,
            events: self.events.clone(),
        });
        self.sessions.insert(target, session.clone());
        Ok(Some(session))
    }

    /// Select the conversation at `index`. Sessions of other conversations
    /// keep running. Returns `false` if `index` was already selected.
    pub fn select_conversation(&mut self, index: usize) -> Result<bool, CoordinatorError> {
        self.ensure_initialized()?;
        let changed = lock_store(&self.store).select(index)?;
        if changed {
            self.emit(EngineEvent::SelectionChanged { index });
        }
        Ok(changed)
    }

    /// Create a conversation on the backend, seed it with a greeting and
    /// select it. Returns its index.
    pub async fn create_conversation(&mut self, title: &str) -> Result<usize, CoordinatorError> {
        self.ensure_initialized()?;
        let title = match title.trim() {
            "" => self.settings.default_title.clone(),
            trimmed => trimmed.to_string(),
        };

        let summary = self.gateway.create_conversation(&title).await?;
        let greeting = Message::assistant(self.settings.greeting_for(&summary.title));
        let id = summary.id;
        let index = lock_store(&self.store).insert_conversation(summary, vec![greeting])?;
        info!(conversation = %id, "Created conversation");

        self.emit(EngineEvent::ConversationsChanged);
        self.emit(EngineEvent::SelectionChanged { index });
        Ok(index)
    }

    /// Delete the conversation at `index`.
    ///
    /// A session streaming into it is cancelled first. The remote delete runs
    /// in the background; its failure is reported as
    /// [`EngineEvent::RemoteDeleteFailed`]. Deleting the last conversation
    /// creates a default replacement.
    pub async fn delete_conversation(&mut self, index: usize) -> Result<(), CoordinatorError> {
        self.ensure_initialized()?;
        let id = lock_store(&self.store).summary_at(index)?.id;

        if let Some(session) = self.sessions.remove(&id) {
            debug!(conversation = %id, state = %session.state(), "Cancelling session of deleted conversation");
            session.cancel();
        }

        let gateway = self.gateway.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(err) = gateway.delete_conversation(id).await {
                warn!(conversation = %id, error = %err, "Remote delete failed");
                let _ = events.send(EngineEvent::RemoteDeleteFailed {
                    conversation: id,
                    error: err.to_string(),
                });
            }
        });

        let now_empty = {
            let mut store = lock_store(&self.store);
            store.remove_conversation(index)?;
            store.is_empty()
        };
        info!(conversation = %id, "Deleted conversation");
        self.emit(EngineEvent::ConversationsChanged);

        if now_empty {
            let title = self.settings.default_title.clone();
            self.create_conversation(&title).await?;
        } else {
            self.emit_selection();
        }
        Ok(())
    }

    pub async fn rename_conversation(
        &mut self,
        index: usize,
        title: &str,
    ) -> Result<(), CoordinatorError> {
        self.ensure_initialized()?;
        let title = match title.trim() {
            "" => self.settings.default_title.clone(),
            trimmed => trimmed.to_string(),
        };
        let id = lock_store(&self.store).summary_at(index)?.id;
        self.gateway.rename_conversation(id, &title).await?;
        lock_store(&self.store).rename(id, title)?;
        self.emit(EngineEvent::ConversationsChanged);
        Ok(())
    }

    /// Replace the log at `index` with the backend's copy.
    pub async fn reload_conversation(&mut self, index: usize) -> Result<(), CoordinatorError> {
        self.ensure_initialized()?;
        self.reap_sessions();
        let id = lock_store(&self.store).summary_at(index)?.id;
        if self.sessions.contains_key(&id) {
            return Err(CoordinatorError::InputLocked(id));
        }
        let log = self.gateway.get_conversation(id).await?;
        lock_store(&self.store).replace_log(id, log)?;
        self.emit(EngineEvent::ConversationsChanged);
        Ok(())
    }

    /// Pull titles from the backend for conversations known locally. The
    /// backend retitles conversations after each exchange. Returns how many
    /// titles changed.
    pub async fn sync_titles(&mut self) -> Result<usize, CoordinatorError> {
        self.ensure_initialized()?;
        let remote = self.gateway.list_conversations().await?;
        let mut changed = 0;
        {
            let mut store = lock_store(&self.store);
            for summary in remote {
                let differs = store
                    .index_of(summary.id)
                    .map(|index| store.summaries()[index].title != summary.title)
                    .unwrap_or(false);
                if differs {
                    store.rename(summary.id, summary.title)?;
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.emit(EngineEvent::ConversationsChanged);
        }
        Ok(changed)
    }

    /// File a memory note with the backend. Blank notes are ignored.
    pub async fn remember(&mut self, scope: NoteScope, note: &str) -> Result<bool, CoordinatorError> {
        self.ensure_initialized()?;
        let note = note.trim();
        if note.is_empty() {
            return Ok(false);
        }
        let scope = match scope {
            NoteScope::Global => MemoryScope::Global,
            NoteScope::Conversation => {
                MemoryScope::Conversation(lock_store(&self.store).selected_id()?)
            }
        };
        self.gateway.add_memory(scope, note).await?;
        Ok(true)
    }

    /// Run `read` against the store. Keep it short: reveal timers wait on the
    /// same lock.
    pub fn read<R>(&self, read: impl FnOnce(&ConversationStore) -> R) -> R {
        read(&lock_store(&self.store))
    }

    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.read(|store| store.summaries().to_vec())
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.read(ConversationStore::selected_index)
    }

    pub fn selected_id(&self) -> Option<ConversationId> {
        self.read(|store| store.selected_id().ok())
    }

    pub fn current_messages(&self) -> Vec<Message> {
        self.read(|store| store.selected_log().to_vec())
    }

    pub fn messages(&self, id: ConversationId) -> Option<Vec<Message>> {
        self.read(|store| store.log(id).map(<[_]>::to_vec))
    }

    pub fn session(&self, id: ConversationId) -> Option<StreamingSession> {
        self.sessions
            .get(&id)
            .filter(|session| session.is_live())
            .cloned()
    }

    pub fn live_session_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|session| session.is_live())
            .count()
    }

    /// Whether the assistant is producing output for the visible conversation.
    /// While true, sending into it is refused.
    pub fn is_streaming_visible(&self) -> bool {
        self.selected_id()
            .and_then(|id| self.session(id))
            .is_some()
    }

    pub fn is_input_locked(&self) -> bool {
        self.is_streaming_visible()
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.cancel_all_sessions();
    }
}
