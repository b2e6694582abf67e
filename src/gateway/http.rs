use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use super::{FragmentStream, GatewayError, MemoryScope, RemoteGateway, StreamRequest};
use crate::api::{
    ChatRequest, ConversationCreate, ConversationDetail, ConversationListResponse,
    ConversationRename, MemoryUpdate,
};
use crate::core::conversation::{ConversationId, ConversationSummary};
use crate::core::message::Message;
use crate::utils::url::construct_api_url;

/// Gateway backed by the Iris HTTP API.
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, request_timeout)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            request_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        construct_api_url(&self.base_url, endpoint)
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, GatewayError> {
        request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|err| GatewayError::sync(operation, err.to_string()))
    }
}

async fn expect_status(
    operation: &'static str,
    response: Response,
    accepted: impl Fn(StatusCode) -> bool,
) -> Result<Response, GatewayError> {
    let status = response.status();
    if accepted(status) {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    Err(GatewayError::sync(operation, format_status_error(status, &body)))
}

fn is_success(status: StatusCode) -> bool {
    status.is_success()
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            ["error", "detail", "message"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_owned))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Render a non-success response as a one-line description.
pub(crate) fn format_status_error(status: StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {status}");
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value) {
            if !summary.is_empty() {
                return format!("HTTP {status}: {summary}");
            }
        }
    }

    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("HTTP {status}: {collapsed}")
}

/// Incremental UTF-8 decoder for a chunked body. A multi-byte sequence split
/// across network chunks is held back until the rest arrives; invalid bytes
/// become U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid_up_to]).unwrap_or_default());
                    match err.error_len() {
                        Some(invalid_len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid_len);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is left once the body ends.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(tail)
    }
}

struct BodyState<S> {
    body: S,
    decoder: Utf8Chunker,
    finished: bool,
}

/// Turn a byte stream into text fragments, ending with a transport error if
/// the body breaks off.
pub(crate) fn decode_fragments<S, B, E>(body: S) -> impl Stream<Item = Result<String, GatewayError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let state = BodyState {
        body,
        decoder: Utf8Chunker::default(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let text = state.decoder.push(bytes.as_ref());
                    if !text.is_empty() {
                        return Some((Ok(text), state));
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(GatewayError::transport(err.to_string())), state));
                }
                None => {
                    state.finished = true;
                    return state.decoder.finish().map(|tail| (Ok(tail), state));
                }
            }
        }
    })
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, GatewayError> {
        const OP: &str = "list conversations";
        let response = self.send(OP, self.client.get(self.url("conversations"))).await?;
        let response = expect_status(OP, response, is_success).await?;
        let listing = response
            .json::<ConversationListResponse>()
            .await
            .map_err(|err| GatewayError::sync(OP, err.to_string()))?;
        Ok(listing.conversations)
    }

    async fn create_conversation(&self, title: &str) -> Result<ConversationSummary, GatewayError> {
        const OP: &str = "create conversation";
        let request = self.client.post(self.url("conversation")).json(&ConversationCreate {
            title: title.to_string(),
        });
        let response = self.send(OP, request).await?;
        let response = expect_status(OP, response, |status| status == StatusCode::CREATED).await?;
        response
            .json::<ConversationSummary>()
            .await
            .map_err(|err| GatewayError::sync(OP, err.to_string()))
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Vec<Message>, GatewayError> {
        const OP: &str = "fetch conversation";
        let response = self
            .send(OP, self.client.get(self.url(&format!("conversation/{id}"))))
            .await?;
        let response = expect_status(OP, response, is_success).await?;
        let detail = response
            .json::<ConversationDetail>()
            .await
            .map_err(|err| GatewayError::sync(OP, err.to_string()))?;

        let total = detail.messages.len();
        let messages: Vec<Message> = detail
            .messages
            .into_iter()
            .filter_map(Message::from_api)
            .collect();
        if messages.len() != total {
            debug!(
                conversation = %id,
                skipped = total - messages.len(),
                "Skipped messages with roles other than user/assistant"
            );
        }
        Ok(messages)
    }

    async fn rename_conversation(
        &self,
        id: ConversationId,
        title: &str,
    ) -> Result<(), GatewayError> {
        const OP: &str = "rename conversation";
        let request = self
            .client
            .patch(self.url(&format!("conversation/{id}")))
            .json(&ConversationRename {
                title: title.to_string(),
            });
        let response = self.send(OP, request).await?;
        expect_status(OP, response, is_success).await?;
        Ok(())
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<(), GatewayError> {
        const OP: &str = "delete conversation";
        let response = self
            .send(OP, self.client.delete(self.url(&format!("conversation/{id}"))))
            .await?;
        expect_status(OP, response, |status| status == StatusCode::NO_CONTENT).await?;
        Ok(())
    }

    async fn stream_response(
        &self,
        request: StreamRequest,
    ) -> Result<FragmentStream, GatewayError> {
        let StreamRequest {
            prompt,
            conversation,
            context,
            history,
        } = request;

        let body = ChatRequest {
            prompt,
            conversation,
            context,
            messages: history.iter().map(Message::to_api).collect(),
        };

        // No per-request timeout here: a long answer is not a stalled one.
        let response = self
            .client
            .post(self.url("chat"))
            .json(&body)
            .send()
            .await
            .map_err(|err| GatewayError::transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            warn!(conversation = %conversation, %status, "Chat stream rejected");
            return Err(GatewayError::transport(format_status_error(
                status,
                &error_text,
            )));
        }

        debug!(conversation = %conversation, "Chat stream opened");
        Ok(Box::pin(decode_fragments(Box::pin(response.bytes_stream()))))
    }

    async fn add_memory(&self, scope: MemoryScope, content: &str) -> Result<(), GatewayError> {
        const OP: &str = "save memory";
        let endpoint = match scope {
            MemoryScope::Global => "memory/global".to_string(),
            MemoryScope::Conversation(id) => format!("memory/conversation/{id}"),
        };
        let request = self.client.post(self.url(&endpoint)).json(&MemoryUpdate {
            content: content.to_string(),
        });
        let response = self.send(OP, request).await?;
        expect_status(OP, response, is_success).await?;
        Ok(())
    }
}
