use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::constants::{FAILURE_NOTICE_PREFIX, MIN_REVEAL_INTERVAL_MS};
use super::conversation::ConversationId;
use super::events::EngineEvent;
use super::reveal::{NextUnit, RevealQueue};
use super::store::{lock_store, SharedStore, StoreError};
use crate::gateway::{RemoteGateway, StreamRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    /// Request submitted, waiting for the stream to open.
    Sending,
    /// Stream open; fragments are being queued and revealed.
    Streaming,
    /// Stream closed; queued units are still being revealed.
    Draining,
    Finished,
    /// Stream failed; a failure notice was appended to the message.
    Errored,
    /// Stopped from outside (conversation deleted or engine shut down).
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Finished | SessionState::Errored | SessionState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Sending => "sending",
            SessionState::Streaming => "streaming",
            SessionState::Draining => "draining",
            SessionState::Finished => "finished",
            SessionState::Errored => "errored",
            SessionState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text appended to an assistant message whose stream failed.
pub fn failure_notice(existing_text: &str, error: &str) -> String {
    let separator = if existing_text.is_empty() { "" } else { "\n\n" };
    format!("{separator}{FAILURE_NOTICE_PREFIX} {}", error.trim())
}

pub struct SessionParams {
    pub target: ConversationId,
    /// Index of the assistant placeholder in the target log.
    pub message_index: usize,
    pub request: StreamRequest,
    pub gateway: Arc<dyn RemoteGateway>,
    pub store: SharedStore,
    pub reveal_interval: Duration,
    pub events: mpsc::UnboundedSender<EngineEvent>,
}

struct SessionDriver {
    target: ConversationId,
    queue: RevealQueue,
    store: SharedStore,
    state: watch::Sender<SessionState>,
    cancel_token: CancellationToken,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl SessionDriver {
    /// Move to `next` unless the session already reached a terminal state.
    fn transition(&self, next: SessionState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(conversation = %self.target, state = %next, "Session state changed");
            let _ = self.events.send(EngineEvent::SessionStateChanged {
                conversation: self.target,
                state: next,
            });
        }
        changed
    }

    async fn consume(&self, gateway: &dyn RemoteGateway, request: StreamRequest) {
        let mut fragments = match gateway.stream_response(request).await {
            Ok(fragments) => fragments,
            Err(err) => {
                warn!(conversation = %self.target, error = %err, "Chat stream failed to open");
                self.queue.close_with_failure(err.to_string());
                return;
            }
        };
        self.transition(SessionState::Streaming);

        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    self.queue.push_fragment(&fragment);
                }
                Err(err) => {
                    warn!(conversation = %self.target, error = %err, "Chat stream broke off");
                    if self.queue.close_with_failure(err.to_string()) > 0 {
                        self.transition(SessionState::Draining);
                    }
                    return;
                }
            }
        }

        if self.queue.close() > 0 {
            self.transition(SessionState::Draining);
        }
    }

    /// Reveal one unit per tick until the queue runs dry. Returns `true` when
    /// the timer should re-arm on the next enqueue, `false` once the session
    /// is over.
    async fn reveal(&self, cadence: Duration) -> bool {
        let mut ticker = tokio::time::interval(cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => return false,
                _ = ticker.tick() => {}
            }

            match self.queue.next_unit() {
                NextUnit::Unit(unit) => self.reveal_unit(unit),
                NextUnit::Idle => return true,
                NextUnit::Drained { failure } => {
                    self.finish(failure);
                    return false;
                }
            }
        }
    }

    fn reveal_unit(&self, unit: String) {
        let mut store = lock_store(&self.store);
        // Checked under the store lock: once a delete has cancelled us, no
        // further write reaches the log.
        if self.cancel_token.is_cancelled() {
            return;
        }
        match store.extend_last_message(self.target, &unit) {
            Ok(()) => {
                let _ = self.events.send(EngineEvent::UnitRevealed {
                    conversation: self.target,
                    unit,
                });
            }
            Err(StoreError::UnknownConversation(_)) => {
                debug!(conversation = %self.target, "Target conversation is gone; dropping unit");
            }
            Err(err) => {
                warn!(conversation = %self.target, error = %err, "Failed to reveal unit");
            }
        }
    }

    fn finish(&self, failure: Option<String>) {
        match failure {
            None => {
                self.transition(SessionState::Finished);
            }
            Some(error) => {
                {
                    let mut store = lock_store(&self.store);
                    if !self.cancel_token.is_cancelled() {
                        let existing = store
                            .log(self.target)
                            .and_then(<[_]>::last)
                            .map(|message| message.text.clone())
                            .unwrap_or_default();
                        let notice = failure_notice(&existing, &error);
                        if let Err(err) = store.extend_last_message(self.target, &notice) {
                            debug!(conversation = %self.target, error = %err, "Could not append failure notice");
                        }
                    }
                }
                self.transition(SessionState::Errored);
            }
        }
        // The terminal transition owns teardown of both tasks.
        self.cancel_token.cancel();
    }
}

async fn pump_network(
    driver: Arc<SessionDriver>,
    gateway: Arc<dyn RemoteGateway>,
    request: StreamRequest,
) {
    tokio::select! {
        biased;
        _ = driver.cancel_token.cancelled() => {
            debug!(conversation = %driver.target, "Network subscription dropped");
        }
        _ = driver.consume(gateway.as_ref(), request) => {}
    }
}

async fn run_reveal_timer(driver: Arc<SessionDriver>, cadence: Duration) {
    loop {
        // Disarmed until the first unit arrives or the source closes.
        tokio::select! {
            biased;
            _ = driver.cancel_token.cancelled() => return,
            _ = driver.queue.ready() => {}
        }
        if !driver.reveal(cadence).await {
            return;
        }
    }
}

/// One live response: a network consumer filling a [`RevealQueue`] and a
/// reveal timer draining it into the trailing assistant message of one
/// conversation.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct StreamingSession {
    driver: Arc<SessionDriver>,
    message_index: usize,
    state: watch::Receiver<SessionState>,
}

impl StreamingSession {
    /// Spawn the network consumer and the reveal timer. Must be called from
    /// within a Tokio runtime. A cadence below one millisecond is raised to it.
    pub fn start(params: SessionParams) -> Self {
        let SessionParams {
            target,
            message_index,
            request,
            gateway,
            store,
            reveal_interval,
            events,
        } = params;
        let reveal_interval = reveal_interval.max(Duration::from_millis(MIN_REVEAL_INTERVAL_MS));

        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let driver = Arc::new(SessionDriver {
            target,
            queue: RevealQueue::new(),
            store,
            state: state_tx,
            cancel_token: CancellationToken::new(),
            events,
        });
        driver.transition(SessionState::Sending);

        tokio::spawn(pump_network(driver.clone(), gateway, request));
        tokio::spawn(run_reveal_timer(driver.clone(), reveal_interval));

        Self {
            driver,
            message_index,
            state: state_rx,
        }
    }

    pub fn target(&self) -> ConversationId {
        self.driver.target
    }

    pub fn message_index(&self) -> usize {
        self.message_index
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_live(&self) -> bool {
        !self.state().is_terminal()
    }

    pub fn queue(&self) -> &RevealQueue {
        &self.driver.queue
    }

    /// Stop both tasks and drop pending units. Text already revealed stays in
    /// the log. No-op once the session is terminal.
    pub fn cancel(&self) {
        if self.driver.transition(SessionState::Cancelled) {
            self.driver.cancel_token.cancel();
            self.driver.queue.discard();
        }
    }

    /// Wait for the session to reach a terminal state.
    pub async fn finished(&self) -> SessionState {
        let mut state = self.state.clone();
        if let Ok(terminal) = state.wait_for(|state| state.is_terminal()).await {
            return *terminal;
        }
        let current = *state.borrow();
        current
    }
}

impl fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingSession")
            .field("target", &self.driver.target)
            .field("message_index", &self.message_index)
            .field("state", &self.state())
            .field("queued", &self.driver.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::ConversationSummary;
    use crate::core::message::Message;
    use crate::core::store::ConversationStore;
    use crate::gateway::GatewayError;
    use crate::utils::test_utils::MockGateway;
    use std::collections::HashMap;

    const CADENCE: Duration = Duration::from_millis(8);

    struct Fixture {
        gateway: Arc<MockGateway>,
        store: SharedStore,
        events: mpsc::UnboundedReceiver<EngineEvent>,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
        id: ConversationId,
    }

    fn fixture() -> Fixture {
        let id = ConversationId::new(1);
        let mut store = ConversationStore::new();
        store
            .load(vec![ConversationSummary::new(id, "chat")], HashMap::new())
            .expect("load");
        store.append_message(id, Message::user("hello")).expect("append");
        store
            .append_message(id, Message::assistant_placeholder())
            .expect("append");
        let (events_tx, events) = mpsc::unbounded_channel();
        Fixture {
            gateway: Arc::new(MockGateway::new()),
            store: store.into_shared(),
            events,
            events_tx,
            id,
        }
    }

    fn start(fixture: &Fixture) -> StreamingSession {
        start_with_cadence(fixture, CADENCE)
    }

    fn start_with_cadence(fixture: &Fixture, cadence: Duration) -> StreamingSession {
        StreamingSession::start(SessionParams {
            target: fixture.id,
            message_index: 1,
            request: StreamRequest {
                prompt: "hello".into(),
                conversation: fixture.id,
                context: "default".into(),
                history: Vec::new(),
            },
            gateway: fixture.gateway.clone(),
            store: fixture.store.clone(),
            reveal_interval: cadence,
            events: fixture.events_tx.clone(),
        })
    }

    fn assistant_text(fixture: &Fixture) -> String {
        lock_store(&fixture.store)
            .log(fixture.id)
            .and_then(<[_]>::last)
            .map(|message| message.text.clone())
            .unwrap_or_default()
    }

    fn drain_states(events: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<SessionState> {
        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::SessionStateChanged { state, .. } = event {
                states.push(state);
            }
        }
        states
    }

    #[tokio::test(start_paused = true)]
    async fn fragments_are_revealed_in_order_then_finish() {
        let mut fixture = fixture();
        fixture.gateway.push_stream(["Hi", " there", "!"]);

        let session = start(&fixture);
        assert_eq!(session.finished().await, SessionState::Finished);
        assert_eq!(assistant_text(&fixture), "Hi there!");
        assert!(session.queue().is_empty());

        let states = drain_states(&mut fixture.events);
        assert_eq!(states.first(), Some(&SessionState::Sending));
        assert_eq!(states.last(), Some(&SessionState::Finished));
        assert!(states.contains(&SessionState::Streaming));
    }

    #[tokio::test(start_paused = true)]
    async fn reveal_is_paced_one_unit_per_tick() {
        let fixture = fixture();
        let feed = fixture.gateway.push_stream_channel();
        let session = start(&fixture);

        feed.send(Ok("abcdef".into())).expect("feed");
        tokio::time::sleep(CADENCE / 2).await;
        // The first tick fires immediately on arming.
        assert_eq!(assistant_text(&fixture), "a");

        tokio::time::sleep(CADENCE * 2).await;
        assert_eq!(assistant_text(&fixture), "abc");
        assert_eq!(session.queue().len(), 3);
        assert_eq!(session.state(), SessionState::Streaming);

        drop(feed);
        assert_eq!(session.finished().await, SessionState::Finished);
        assert_eq!(assistant_text(&fixture), "abcdef");
    }

    #[tokio::test(start_paused = true)]
    async fn closing_with_pending_units_enters_draining() {
        let mut fixture = fixture();
        let feed = fixture.gateway.push_stream_channel();
        let session = start(&fixture);

        feed.send(Ok("long answer".into())).expect("feed");
        drop(feed);
        tokio::time::sleep(CADENCE).await;
        assert_eq!(session.state(), SessionState::Draining);

        assert_eq!(session.finished().await, SessionState::Finished);
        assert_eq!(assistant_text(&fixture), "long answer");
        let states = drain_states(&mut fixture.events);
        assert_eq!(
            states,
            vec![
                SessionState::Sending,
                SessionState::Streaming,
                SessionState::Draining,
                SessionState::Finished
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refused_stream_appends_notice_and_errors() {
        let mut fixture = fixture();
        fixture
            .gateway
            .push_stream_refusal(GatewayError::transport("connection refused"));

        let session = start(&fixture);
        assert_eq!(session.finished().await, SessionState::Errored);
        assert_eq!(
            assistant_text(&fixture),
            "[error] stream failed: connection refused"
        );
        assert_eq!(
            drain_states(&mut fixture.events),
            vec![SessionState::Sending, SessionState::Errored]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mid_stream_failure_keeps_received_text() {
        let fixture = fixture();
        let feed = fixture.gateway.push_stream_channel();
        let session = start(&fixture);

        feed.send(Ok("partial".into())).expect("feed");
        feed.send(Err(GatewayError::transport("connection reset")))
            .expect("feed");

        assert_eq!(session.finished().await, SessionState::Errored);
        assert_eq!(
            assistant_text(&fixture),
            "partial\n\n[error] stream failed: connection reset"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_reveal_and_discards_pending_units() {
        let fixture = fixture();
        let feed = fixture.gateway.push_stream_channel();
        let session = start(&fixture);

        feed.send(Ok("0123456789".into())).expect("feed");
        tokio::time::sleep(CADENCE * 3).await;
        let before = assistant_text(&fixture);
        assert!(!before.is_empty());

        session.cancel();
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(session.queue().len(), 0);

        let _ = feed.send(Ok("more".into()));
        tokio::time::sleep(CADENCE * 20).await;
        assert_eq!(assistant_text(&fixture), before);
        assert_eq!(session.queue().len(), 0);
        assert_eq!(session.finished().await, SessionState::Cancelled);

        // Cancelling twice is harmless.
        session.cancel();
        assert_eq!(session.state(), SessionState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cadence_still_reveals_and_finishes() {
        let fixture = fixture();
        fixture.gateway.push_stream(["Hi"]);

        let session = start_with_cadence(&fixture, Duration::ZERO);
        let state = tokio::time::timeout(Duration::from_secs(2), session.finished())
            .await
            .expect("session should reach a terminal state");
        assert_eq!(state, SessionState::Finished);
        assert_eq!(assistant_text(&fixture), "Hi");
    }

    #[test]
    fn failure_notice_separates_existing_text() {
        assert_eq!(failure_notice("", " boom "), "[error] boom");
        assert_eq!(failure_notice("Hi", "boom"), "\n\n[error] boom");
    }
}
