//! Line-mode chat loop.
//!
//! Reads one line at a time from stdin, runs slash commands against the
//! coordinator and prints revealed units of the selected conversation as
//! they arrive on the event channel.

use std::collections::HashMap;
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::commands::{
    default_dump_filename, dump_conversation, help_text, process_input, ChatCommand,
};
use crate::core::config::Config;
use crate::core::conversation::ConversationId;
use crate::core::coordinator::{
    CoordinatorError, CoordinatorSettings, NoteScope, SessionCoordinator,
};
use crate::core::events::EngineEvent;
use crate::core::message::Message;
use crate::core::session::{SessionState, StreamingSession};
use crate::core::store::StoreError;
use crate::gateway::RemoteGateway;
use crate::utils::logging::TranscriptLog;

pub struct ChatOptions {
    pub base_url: String,
    pub log_file: Option<String>,
    pub config: Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Glue between the coordinator and a text sink.
pub struct ChatDriver<W: Write> {
    coordinator: SessionCoordinator,
    transcript: TranscriptLog,
    out: W,
    /// Bytes of the trailing assistant message already written, per conversation.
    shown: HashMap<ConversationId, usize>,
    /// Assistant message index of each exchange waiting to be logged.
    pending: HashMap<ConversationId, usize>,
    errored: usize,
}

impl<W: Write> ChatDriver<W> {
    pub fn new(coordinator: SessionCoordinator, transcript: TranscriptLog, out: W) -> Self {
        Self {
            coordinator,
            transcript,
            out,
            shown: HashMap::new(),
            pending: HashMap::new(),
            errored: 0,
        }
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut SessionCoordinator {
        &mut self.coordinator
    }

    /// Number of sessions that ended with a failure notice.
    pub fn errored_sessions(&self) -> usize {
        self.errored
    }

    pub fn into_output(mut self) -> W {
        self.coordinator.shutdown();
        let Self { out, .. } = self;
        out
    }

    pub async fn handle_line(&mut self, line: &str) -> io::Result<Flow> {
        match process_input(line) {
            ChatCommand::SendMessage(text) => self.send(&text)?,
            ChatCommand::Help => writeln!(self.out, "{}", help_text())?,
            ChatCommand::New(title) => {
                let title = title.unwrap_or_else(|| self.coordinator.settings().default_title.clone());
                match self.coordinator.create_conversation(&title).await {
                    Ok(_) => self.show_conversation()?,
                    Err(err) => self.report(err)?,
                }
            }
            ChatCommand::List => self.list()?,
            ChatCommand::Switch(index) => match self.coordinator.select_conversation(index) {
                Ok(true) => self.show_conversation()?,
                Ok(false) => {}
                Err(err) => self.report(err)?,
            },
            ChatCommand::Delete(index) => {
                let index = index.or_else(|| self.coordinator.selected_index());
                let Some(index) = index else {
                    return Ok(Flow::Continue);
                };
                match self.coordinator.delete_conversation(index).await {
                    Ok(()) => self.show_conversation()?,
                    Err(err) => self.report(err)?,
                }
            }
            ChatCommand::Rename(title) => {
                if let Some(index) = self.coordinator.selected_index() {
                    match self.coordinator.rename_conversation(index, &title).await {
                        Ok(()) => writeln!(self.out, "Renamed to: {}", title.trim())?,
                        Err(err) => self.report(err)?,
                    }
                }
            }
            ChatCommand::Reload => {
                if let Some(index) = self.coordinator.selected_index() {
                    match self.coordinator.reload_conversation(index).await {
                        Ok(()) => self.show_conversation()?,
                        Err(err) => self.report(err)?,
                    }
                }
            }
            ChatCommand::Sync => match self.coordinator.sync_titles().await {
                Ok(0) => writeln!(self.out, "Titles are up to date.")?,
                Ok(changed) => writeln!(self.out, "Updated {changed} title(s).")?,
                Err(err) => self.report(err)?,
            },
            ChatCommand::Remember { global, note } => {
                let scope = if global {
                    NoteScope::Global
                } else {
                    NoteScope::Conversation
                };
                match self.coordinator.remember(scope, &note).await {
                    Ok(_) => writeln!(self.out, "Noted.")?,
                    Err(err) => self.report(err)?,
                }
            }
            ChatCommand::Log(path) => {
                let result = match path {
                    Some(path) => self.transcript.set_log_file(path),
                    None => self.transcript.toggle_logging(),
                };
                match result {
                    Ok(message) => writeln!(self.out, "{message}")?,
                    Err(err) => writeln!(self.out, "Log error: {err}")?,
                }
            }
            ChatCommand::Dump(path) => {
                let filename = path.unwrap_or_else(default_dump_filename);
                let messages = self.coordinator.current_messages();
                match dump_conversation(&messages, &filename) {
                    Ok(()) => writeln!(self.out, "Conversation dumped to: {filename}")?,
                    Err(err) => writeln!(self.out, "Dump error: {err}")?,
                }
            }
            ChatCommand::Quit => return Ok(Flow::Quit),
            ChatCommand::Invalid(message) => writeln!(self.out, "{message}")?,
        }
        self.out.flush()?;
        Ok(Flow::Continue)
    }

    /// Send `text` to the selected conversation and track the reply until
    /// its session ends.
    pub fn start_reply(
        &mut self,
        text: &str,
    ) -> Result<Option<StreamingSession>, CoordinatorError> {
        let session = self.coordinator.send_message(text)?;
        if let Some(session) = &session {
            self.pending.insert(session.target(), session.message_index());
            self.shown.insert(session.target(), 0);
        }
        Ok(session)
    }

    fn send(&mut self, text: &str) -> io::Result<()> {
        if let Err(err) = self.start_reply(text) {
            self.report(err)?;
        }
        Ok(())
    }

    fn report(&mut self, err: CoordinatorError) -> io::Result<()> {
        match err {
            // Conversations are numbered from 1 on screen.
            CoordinatorError::Store(StoreError::IndexOutOfRange { index, len }) => writeln!(
                self.out,
                "error: there is no conversation {} (have {len})",
                index + 1
            ),
            err => writeln!(self.out, "error: {err}"),
        }
    }

    fn list(&mut self) -> io::Result<()> {
        let selected = self.coordinator.selected_index();
        for (position, summary) in self.coordinator.summaries().iter().enumerate() {
            let marker = if Some(position) == selected { '*' } else { ' ' };
            let streaming = if self.coordinator.session(summary.id).is_some() {
                " (responding)"
            } else {
                ""
            };
            writeln!(
                self.out,
                "{marker}{:>3}. {}{streaming}",
                position + 1,
                summary.title
            )?;
        }
        Ok(())
    }

    /// Print the selected conversation from the top. A reply still streaming
    /// into it is left open so later units continue on the same line.
    pub fn show_conversation(&mut self) -> io::Result<()> {
        let Some(index) = self.coordinator.selected_index() else {
            return Ok(());
        };
        let summaries = self.coordinator.summaries();
        let Some(summary) = summaries.get(index) else {
            return Ok(());
        };
        let id = summary.id;
        writeln!(self.out, "== {}. {} ==", index + 1, summary.title)?;

        let messages = self.coordinator.current_messages();
        let streaming = self.coordinator.session(id).is_some();
        for (position, message) in messages.iter().enumerate() {
            let open = streaming && position + 1 == messages.len();
            write_message(&mut self.out, message, open)?;
        }
        if streaming {
            let shown = messages.last().map(|message| message.text.len()).unwrap_or(0);
            self.shown.insert(id, shown);
        }
        self.out.flush()
    }

    pub fn handle_event(&mut self, event: EngineEvent) -> io::Result<()> {
        match event {
            EngineEvent::UnitRevealed { conversation, .. } => {
                if self.coordinator.selected_id() == Some(conversation) {
                    self.write_new_text(conversation)?;
                }
            }
            EngineEvent::SessionStateChanged {
                conversation,
                state,
            } if state.is_terminal() => self.session_ended(conversation, state)?,
            EngineEvent::RemoteDeleteFailed {
                conversation,
                error,
            } => {
                writeln!(
                    self.out,
                    "warning: conversation {conversation} was removed locally but not on the backend: {error}"
                )?;
            }
            _ => {}
        }
        self.out.flush()
    }

    /// Write whatever part of the trailing assistant message is not on screen yet.
    fn write_new_text(&mut self, conversation: ConversationId) -> io::Result<()> {
        let text = self
            .coordinator
            .messages(conversation)
            .and_then(|mut log| log.pop())
            .filter(Message::is_assistant)
            .map(|message| message.text)
            .unwrap_or_default();
        let shown = self.shown.entry(conversation).or_insert(0);
        if let Some(fresh) = text.get(*shown..) {
            self.out.write_all(fresh.as_bytes())?;
            *shown = text.len();
        }
        Ok(())
    }

    fn session_ended(&mut self, conversation: ConversationId, state: SessionState) -> io::Result<()> {
        debug!(conversation = %conversation, state = %state, "Session ended");
        if state == SessionState::Errored {
            self.errored += 1;
        }

        if state != SessionState::Cancelled {
            if self.coordinator.selected_id() == Some(conversation) {
                self.write_new_text(conversation)?;
                writeln!(self.out)?;
            }
            if let Some(index) = self.pending.get(&conversation).copied() {
                self.log_exchange(conversation, index);
            }
        }
        self.pending.remove(&conversation);
        self.shown.remove(&conversation);
        Ok(())
    }

    fn log_exchange(&mut self, conversation: ConversationId, index: usize) {
        let Some(log) = self.coordinator.messages(conversation) else {
            return;
        };
        let (Some(user), Some(reply)) = (
            index.checked_sub(1).and_then(|i| log.get(i)),
            log.get(index),
        ) else {
            return;
        };
        if let Err(err) = self.transcript.log_exchange(&user.text, &reply.text) {
            let _ = writeln!(self.out, "Log error: {err}");
        }
    }

    /// Keep processing events until every tracked reply has delivered its
    /// terminal state change. A session's state turns terminal before that
    /// event is sent, so the live count alone is not enough.
    pub async fn wait_for_sessions(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<EngineEvent>,
    ) -> io::Result<()> {
        loop {
            while let Ok(event) = events.try_recv() {
                self.handle_event(event)?;
            }
            if self.pending.is_empty() {
                break;
            }
            match events.recv().await {
                Some(event) => self.handle_event(event)?,
                None => break,
            }
        }
        Ok(())
    }
}

fn write_message<W: Write>(out: &mut W, message: &Message, open: bool) -> io::Result<()> {
    if message.is_user() {
        writeln!(out, "You: {}", message.text)?;
    } else if open {
        write!(out, "{}", message.text)?;
    } else {
        writeln!(out, "{}", message.text)?;
    }
    if !open {
        writeln!(out)?;
    }
    Ok(())
}

/// Load conversations and build a driver writing to `out`.
pub async fn connect<W: Write>(
    gateway: Arc<dyn RemoteGateway>,
    options: ChatOptions,
    out: W,
) -> Result<(ChatDriver<W>, mpsc::UnboundedReceiver<EngineEvent>), Box<dyn Error>> {
    let settings = CoordinatorSettings::from_config(&options.config);
    let (mut coordinator, events) = SessionCoordinator::new(gateway, settings);
    coordinator.init().await?;

    let mut transcript = TranscriptLog::new();
    if let Some(path) = options.log_file {
        transcript.set_log_file(path)?;
    }
    Ok((ChatDriver::new(coordinator, transcript, out), events))
}

pub async fn run_chat(
    gateway: Arc<dyn RemoteGateway>,
    options: ChatOptions,
) -> Result<(), Box<dyn Error>> {
    let base_url = options.base_url.clone();
    let (mut driver, mut events) = connect(gateway, options, io::stdout()).await?;
    println!("Connected to {base_url}. Type /help for commands.");
    driver.show_conversation()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if driver.handle_line(&line).await? == Flow::Quit {
                        break;
                    }
                }
                None => {
                    // Input closed; let replies in flight finish.
                    driver.wait_for_sessions(&mut events).await?;
                    break;
                }
            },
            Some(event) = events.recv() => driver.handle_event(event)?,
        }
    }

    driver.into_output();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{create_test_messages, MockGateway};
    use std::time::Duration;

    fn options() -> ChatOptions {
        ChatOptions {
            base_url: "http://127.0.0.1:8000".to_string(),
            log_file: None,
            config: Config {
                reveal_interval_ms: Some(8),
                ..Default::default()
            },
        }
    }

    fn output(driver: ChatDriver<Vec<u8>>) -> String {
        String::from_utf8(driver.into_output()).expect("utf8")
    }

    #[tokio::test(start_paused = true)]
    async fn reply_is_printed_as_it_is_revealed() {
        let gateway = Arc::new(MockGateway::new());
        gateway.with_conversation("Chat", Vec::new());
        gateway.push_stream(["Hi", " there", "!"]);
        let (mut driver, mut events) = connect(gateway, options(), Vec::new())
            .await
            .expect("connect");

        assert_eq!(driver.handle_line("hello").await.expect("line"), Flow::Continue);
        driver.wait_for_sessions(&mut events).await.expect("wait");
        assert_eq!(driver.errored_sessions(), 0);
        assert_eq!(output(driver), "Hi there!\n");
    }

    #[tokio::test(start_paused = true)]
    async fn failure_notice_is_printed_after_partial_text() {
        let gateway = Arc::new(MockGateway::new());
        gateway.with_conversation("Chat", Vec::new());
        gateway.push_stream_items(vec![
            Ok("partial".to_string()),
            Err(crate::gateway::GatewayError::transport("connection reset")),
        ]);
        let (mut driver, mut events) = connect(gateway, options(), Vec::new())
            .await
            .expect("connect");

        driver.handle_line("hello").await.expect("line");
        driver.wait_for_sessions(&mut events).await.expect("wait");
        assert_eq!(driver.errored_sessions(), 1);
        assert_eq!(
            output(driver),
            "partial\n\n[error] stream failed: connection reset\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_conversation_output_is_not_printed() {
        let gateway = Arc::new(MockGateway::new());
        gateway.with_conversation("First", Vec::new());
        gateway.with_conversation("Second", create_test_messages());
        let feed = gateway.push_stream_channel();
        let (mut driver, mut events) = connect(gateway, options(), Vec::new())
            .await
            .expect("connect");

        driver.handle_line("hello").await.expect("line");
        driver.handle_line("/switch 2").await.expect("switch");
        feed.send(Ok("background".into())).expect("feed");
        drop(feed);
        driver.wait_for_sessions(&mut events).await.expect("wait");

        let first = driver.coordinator().summaries()[0].id;
        assert_eq!(
            driver.coordinator().messages(first).expect("log")[1],
            Message::assistant("background")
        );
        let text = output(driver);
        assert!(text.starts_with("== 2. Second ==\nYou: Hello\n\nHi there!\n\n"));
        assert!(!text.contains("background"));
    }

    #[tokio::test]
    async fn commands_report_errors_inline() {
        let gateway = Arc::new(MockGateway::new());
        gateway.with_conversation("Only", Vec::new());
        let (mut driver, _events) = connect(gateway, options(), Vec::new())
            .await
            .expect("connect");

        driver.handle_line("/switch 9").await.expect("switch");
        driver.handle_line("/delete 3").await.expect("delete");
        driver.handle_line("/list").await.expect("list");
        assert_eq!(driver.handle_line("/quit").await.expect("quit"), Flow::Quit);

        let text = output(driver);
        assert!(text.contains("error: there is no conversation 9 (have 1)"));
        assert!(text.contains("error: there is no conversation 3 (have 1)"));
        assert!(text.contains("*  1. Only"));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_late_terminal_events() {
        let gateway = Arc::new(MockGateway::new());
        gateway.with_conversation("Chat", Vec::new());
        gateway.push_stream(["Hi"]);
        let (mut driver, mut events) = connect(gateway, options(), Vec::new())
            .await
            .expect("connect");

        let session = driver
            .start_reply("hello")
            .expect("send")
            .expect("session");
        assert_eq!(session.finished().await, SessionState::Finished);
        assert_eq!(driver.coordinator().live_session_count(), 0);

        // Hand the session's events over only after a delay, as a busy
        // runtime might.
        let mut held = Vec::new();
        while let Ok(event) = events.try_recv() {
            held.push(event);
        }
        let (late_tx, mut late) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            for event in held {
                let _ = late_tx.send(event);
            }
            std::future::pending::<()>().await;
        });

        driver.wait_for_sessions(&mut late).await.expect("wait");
        assert_eq!(output(driver), "Hi\n");
    }

    #[tokio::test(start_paused = true)]
    async fn finished_exchanges_are_logged() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("chat.log");
        let gateway = Arc::new(MockGateway::new());
        gateway.with_conversation("Chat", Vec::new());
        gateway.push_stream(["Sure thing."]);
        let mut options = options();
        options.log_file = Some(path.to_string_lossy().into_owned());
        let (mut driver, mut events) = connect(gateway, options, Vec::new())
            .await
            .expect("connect");

        driver.handle_line("help me").await.expect("line");
        driver.wait_for_sessions(&mut events).await.expect("wait");
        tokio::time::sleep(Duration::from_millis(1)).await;

        let logged = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(logged, "You: help me\n\nSure thing.\n\n");
    }
}
