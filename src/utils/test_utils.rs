use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::mpsc;

use crate::core::conversation::{ConversationId, ConversationSummary};
use crate::core::coordinator::CoordinatorSettings;
use crate::core::message::Message;
use crate::gateway::{FragmentStream, GatewayError, MemoryScope, RemoteGateway, StreamRequest};

pub type FragmentFeed = mpsc::UnboundedSender<Result<String, GatewayError>>;

enum ScriptedStream {
    Fragments(Vec<Result<String, GatewayError>>),
    Channel(mpsc::UnboundedReceiver<Result<String, GatewayError>>),
    Refused(GatewayError),
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    conversations: Vec<ConversationSummary>,
    logs: HashMap<ConversationId, Vec<Message>>,
    streams: VecDeque<ScriptedStream>,
    failing: HashSet<&'static str>,
    stream_requests: Vec<StreamRequest>,
    deleted: Vec<ConversationId>,
    renamed: Vec<(ConversationId, String)>,
    memories: Vec<(MemoryScope, String)>,
}

/// Scripted in-memory gateway.
///
/// Each `stream_response` call consumes the next scripted stream; when none
/// is queued the response is empty. Operations named in [`MockGateway::fail`]
/// (`"list"`, `"create"`, `"get"`, `"rename"`, `"delete"`, `"memory"`) return a
/// sync error instead.
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock gateway lock")
    }

    /// Add a remote conversation and return its id.
    pub fn with_conversation(&self, title: &str, messages: Vec<Message>) -> ConversationId {
        let mut state = self.lock();
        let id = ConversationId::new(state.next_id);
        state.next_id += 1;
        state.conversations.push(ConversationSummary::new(id, title));
        state.logs.insert(id, messages);
        id
    }

    pub fn set_remote_title(&self, id: ConversationId, title: &str) {
        let mut state = self.lock();
        if let Some(summary) = state.conversations.iter_mut().find(|s| s.id == id) {
            summary.title = title.to_string();
        }
    }

    pub fn push_stream<I, S>(&self, fragments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = fragments.into_iter().map(|f| Ok(f.into())).collect();
        self.lock()
            .streams
            .push_back(ScriptedStream::Fragments(items));
    }

    pub fn push_stream_items(&self, items: Vec<Result<String, GatewayError>>) {
        self.lock()
            .streams
            .push_back(ScriptedStream::Fragments(items));
    }

    /// Queue a stream fed by the returned sender; dropping the sender ends it.
    pub fn push_stream_channel(&self) -> FragmentFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().streams.push_back(ScriptedStream::Channel(rx));
        tx
    }

    pub fn push_stream_refusal(&self, error: GatewayError) {
        self.lock()
            .streams
            .push_back(ScriptedStream::Refused(error));
    }

    pub fn fail(&self, operation: &'static str) {
        self.lock().failing.insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.lock().failing.remove(operation);
    }

    pub fn stream_requests(&self) -> Vec<StreamRequest> {
        self.lock().stream_requests.clone()
    }

    pub fn deleted(&self) -> Vec<ConversationId> {
        self.lock().deleted.clone()
    }

    pub fn renamed(&self) -> Vec<(ConversationId, String)> {
        self.lock().renamed.clone()
    }

    pub fn memories(&self) -> Vec<(MemoryScope, String)> {
        self.lock().memories.clone()
    }

    fn check(&self, operation: &'static str) -> Result<(), GatewayError> {
        if self.lock().failing.contains(operation) {
            Err(GatewayError::sync(operation, "HTTP 500 Internal Server Error"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, GatewayError> {
        self.check("list")?;
        Ok(self.lock().conversations.clone())
    }

    async fn create_conversation(&self, title: &str) -> Result<ConversationSummary, GatewayError> {
        self.check("create")?;
        let mut state = self.lock();
        let id = ConversationId::new(state.next_id);
        state.next_id += 1;
        let summary = ConversationSummary::new(id, title);
        state.conversations.push(summary.clone());
        state.logs.insert(id, Vec::new());
        Ok(summary)
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Vec<Message>, GatewayError> {
        self.check("get")?;
        self.lock()
            .logs
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::sync("get", "HTTP 404 Not Found: Not found"))
    }

    async fn rename_conversation(
        &self,
        id: ConversationId,
        title: &str,
    ) -> Result<(), GatewayError> {
        self.check("rename")?;
        self.lock().renamed.push((id, title.to_string()));
        self.set_remote_title(id, title);
        Ok(())
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<(), GatewayError> {
        self.check("delete")?;
        let mut state = self.lock();
        state.deleted.push(id);
        state.conversations.retain(|summary| summary.id != id);
        state.logs.remove(&id);
        Ok(())
    }

    async fn stream_response(
        &self,
        request: StreamRequest,
    ) -> Result<FragmentStream, GatewayError> {
        let scripted = {
            let mut state = self.lock();
            state.stream_requests.push(request);
            state.streams.pop_front()
        };
        match scripted {
            None => Ok(Box::pin(stream::empty())),
            Some(ScriptedStream::Fragments(items)) => Ok(Box::pin(stream::iter(items))),
            Some(ScriptedStream::Channel(rx)) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }))),
            Some(ScriptedStream::Refused(error)) => Err(error),
        }
    }

    async fn add_memory(&self, scope: MemoryScope, content: &str) -> Result<(), GatewayError> {
        self.check("memory")?;
        self.lock().memories.push((scope, content.to_string()));
        Ok(())
    }
}

pub fn test_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        reveal_interval: Duration::from_millis(8),
        ..CoordinatorSettings::default()
    }
}

pub fn create_test_messages() -> Vec<Message> {
    vec![
        Message::user("Hello"),
        Message::assistant("Hi there!"),
        Message::user("How are you?"),
        Message::assistant("I'm doing well, thank you for asking!"),
    ]
}
