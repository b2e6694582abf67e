use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use super::conversation::{ConversationId, ConversationLog, ConversationSummary};
use super::message::Message;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),
    #[error("last message of conversation {0} is not an assistant message")]
    InvalidTarget(ConversationId),
    #[error("conversation index {index} is out of range (have {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("conversation {0} is already present")]
    DuplicateConversation(ConversationId),
    #[error("no conversations are available")]
    Empty,
}

/// Handle shared between the coordinator and the reveal timers of its sessions.
pub type SharedStore = Arc<Mutex<ConversationStore>>;

/// Lock the shared store, recovering the data if a previous holder panicked.
pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, ConversationStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered conversation summaries plus one message log per conversation.
///
/// Every id in `order` has exactly one log. The selection is a position into
/// `order` and is kept valid by every mutation.
#[derive(Debug, Default)]
pub struct ConversationStore {
    order: Vec<ConversationSummary>,
    logs: HashMap<ConversationId, ConversationLog>,
    selected: usize,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Replace the whole store. Summaries without a supplied log get an empty
    /// one; logs for ids not present in `summaries` are dropped.
    pub fn load(
        &mut self,
        summaries: Vec<ConversationSummary>,
        mut logs: HashMap<ConversationId, ConversationLog>,
    ) -> Result<(), StoreError> {
        let mut next_logs = HashMap::with_capacity(summaries.len());
        for summary in &summaries {
            if next_logs.contains_key(&summary.id) {
                return Err(StoreError::DuplicateConversation(summary.id));
            }
            next_logs.insert(summary.id, logs.remove(&summary.id).unwrap_or_default());
        }

        self.order = summaries;
        self.logs = next_logs;
        self.selected = 0;
        Ok(())
    }

    /// Append a conversation and select it. Returns its index.
    pub fn insert_conversation(
        &mut self,
        summary: ConversationSummary,
        initial_log: ConversationLog,
    ) -> Result<usize, StoreError> {
        if self.logs.contains_key(&summary.id) {
            return Err(StoreError::DuplicateConversation(summary.id));
        }
        self.logs.insert(summary.id, initial_log);
        self.order.push(summary);
        self.selected = self.order.len() - 1;
        Ok(self.selected)
    }

    /// Remove the conversation at `index` together with its log.
    ///
    /// The selection clamps to `min(previous, len - 1)`. When this empties the
    /// store, the caller has to insert a replacement before anything else.
    pub fn remove_conversation(
        &mut self,
        index: usize,
    ) -> Result<(ConversationSummary, ConversationLog), StoreError> {
        self.check_index(index)?;
        let summary = self.order.remove(index);
        let log = self.logs.remove(&summary.id).unwrap_or_default();
        self.selected = self.selected.min(self.order.len().saturating_sub(1));
        Ok((summary, log))
    }

    /// Append `message` to the log of `id`. Returns the index of the new message.
    pub fn append_message(
        &mut self,
        id: ConversationId,
        message: Message,
    ) -> Result<usize, StoreError> {
        let log = self
            .logs
            .get_mut(&id)
            .ok_or(StoreError::UnknownConversation(id))?;
        log.push(message);
        Ok(log.len() - 1)
    }

    /// Extend the trailing assistant message of `id` with `fragment`.
    pub fn extend_last_message(
        &mut self,
        id: ConversationId,
        fragment: &str,
    ) -> Result<(), StoreError> {
        let log = self
            .logs
            .get_mut(&id)
            .ok_or(StoreError::UnknownConversation(id))?;
        match log.last_mut() {
            Some(message) if message.is_assistant() => {
                message.text.push_str(fragment);
                Ok(())
            }
            _ => Err(StoreError::InvalidTarget(id)),
        }
    }

    pub fn rename(&mut self, id: ConversationId, title: impl Into<String>) -> Result<(), StoreError> {
        let summary = self
            .order
            .iter_mut()
            .find(|summary| summary.id == id)
            .ok_or(StoreError::UnknownConversation(id))?;
        summary.title = title.into();
        Ok(())
    }

    pub fn replace_log(&mut self, id: ConversationId, log: ConversationLog) -> Result<(), StoreError> {
        let slot = self
            .logs
            .get_mut(&id)
            .ok_or(StoreError::UnknownConversation(id))?;
        *slot = log;
        Ok(())
    }

    /// Move the selection. Returns `false` when `index` was already selected.
    pub fn select(&mut self, index: usize) -> Result<bool, StoreError> {
        self.check_index(index)?;
        if self.selected == index {
            return Ok(false);
        }
        self.selected = index;
        Ok(true)
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.order
    }

    pub fn summary_at(&self, index: usize) -> Result<&ConversationSummary, StoreError> {
        self.check_index(index)?;
        Ok(&self.order[index])
    }

    pub fn index_of(&self, id: ConversationId) -> Option<usize> {
        self.order.iter().position(|summary| summary.id == id)
    }

    pub fn contains(&self, id: ConversationId) -> bool {
        self.logs.contains_key(&id)
    }

    pub fn log(&self, id: ConversationId) -> Option<&[Message]> {
        self.logs.get(&id).map(Vec::as_slice)
    }

    pub fn selected_index(&self) -> Option<usize> {
        (!self.order.is_empty()).then_some(self.selected)
    }

    pub fn selected_id(&self) -> Result<ConversationId, StoreError> {
        self.order
            .get(self.selected)
            .map(|summary| summary.id)
            .ok_or(StoreError::Empty)
    }

    pub fn selected_log(&self) -> &[Message] {
        self.selected_id()
            .ok()
            .and_then(|id| self.log(id))
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn check_index(&self, index: usize) -> Result<(), StoreError> {
        if index < self.order.len() {
            Ok(())
        } else {
            Err(StoreError::IndexOutOfRange {
                index,
                len: self.order.len(),
            })
        }
    }
}
