//! Host model backed by an OpenAI-compatible `/chat/completions` endpoint.
//!
//! Generations are always requested with `stream: true`. Text deltas are forwarded as
//! they arrive; tool-call deltas are assembled per `index` and emitted whole.

use super::{FragmentStream, HostError, HostErrorKind, HostModel, HostModelInfo};
use crate::canonical::{Content, ContentPart, Message, Request, Role, StreamPart, ToolMode};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::models::ProviderModelsResponse;
use crate::translate::chat::request::parse_arguments;
use crate::translate::chat::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool,
    ChatToolCall, ChatToolCallFunction, ChatToolChoice, ChunkToolCall,
};
use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tokio_util::sync::CancellationToken;

/// Passthrough options forwarded upstream, with the name they are sent under.
const FORWARDED_OPTIONS: &[(&str, &str)] = &[
    ("temperature", "temperature"),
    ("top_p", "top_p"),
    ("max_tokens", "max_tokens"),
    ("max_completion_tokens", "max_completion_tokens"),
    ("max_output_tokens", "max_tokens"),
    ("stop", "stop"),
    ("stop_sequences", "stop"),
    ("seed", "seed"),
    ("presence_penalty", "presence_penalty"),
    ("frequency_penalty", "frequency_penalty"),
    ("user", "user"),
];

/// Bounds connection setup only. Generations stream for as long as the provider sends.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| BridgeError::config(format!("Failed to build HTTP client: {e}")))
}

#[derive(Clone)]
pub struct UpstreamModel {
    client: reqwest::Client,
    provider: String,
    base_url: String,
    api_key: Option<String>,
    drop: Vec<String>,
    bpe: Arc<CoreBPE>,
}

impl UpstreamModel {
    pub fn from_config(config: &BridgeConfig, client: reqwest::Client) -> Result<Self> {
        let bpe = cl100k_base()
            .map_err(|e| BridgeError::config(format!("Failed to load tokenizer: {e}")))?;
        Ok(Self {
            client,
            provider: config
                .provider
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_default(),
            base_url: config.effective_base_url()?,
            api_key: config.resolve_api_key()?,
            drop: config.params.drop.clone(),
            bpe: Arc::new(bpe),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl HostModel for UpstreamModel {
    async fn send_request(
        &self,
        request: &Request,
        cancel: CancellationToken,
    ) -> std::result::Result<FragmentStream, HostError> {
        let body = upstream_request(request, &self.drop);
        let url = self.url("chat/completions");
        tracing::info!(url = %url, model = %request.model, "forwarding generation upstream");

        let send = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(HostError::cancelled()),
            result = send => result.map_err(|e| {
                HostError::new(HostErrorKind::Unknown, format!("Upstream request failed: {e}"))
            })?,
        };

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status, body_len = body.len(), "upstream rejected generation");
            return Err(status_error(status, &body));
        }

        Ok(Box::pin(fragment_stream(response.bytes_stream(), cancel)))
    }

    async fn count_tokens(&self, text: &str) -> std::result::Result<u64, HostError> {
        Ok(self.bpe.encode_with_special_tokens(text).len() as u64)
    }

    async fn list_models(&self) -> std::result::Result<Vec<HostModelInfo>, HostError> {
        let response = self
            .authorized(self.client.get(self.url("models")))
            .send()
            .await
            .map_err(|e| HostError::new(HostErrorKind::Unknown, format!("Failed to fetch models: {e}")))?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let parsed: ProviderModelsResponse = response.json().await.map_err(|e| {
            HostError::new(HostErrorKind::Unknown, format!("Failed to parse models response: {e}"))
        })?;

        Ok(parsed
            .data
            .into_iter()
            .map(|m| HostModelInfo {
                display_name: m.id.clone(),
                vendor: m.owned_by.unwrap_or_else(|| self.provider.clone()),
                id: m.id,
            })
            .collect())
    }
}

/// Classify an upstream HTTP failure.
///
/// Unclassified failures keep the `Request Failed: <status> <body>` form so the OpenAI
/// error table can surface the provider's own status and body.
pub fn status_error(status: u16, body: &str) -> HostError {
    if body.contains("content_filter") {
        return HostError::new(HostErrorKind::Blocked, upstream_message(body));
    }
    let kind = match status {
        400 => HostErrorKind::InvalidMessage,
        401 | 403 => HostErrorKind::NoPermission,
        404 => HostErrorKind::NotFound,
        429 => HostErrorKind::QuotaExceeded,
        _ => return HostError::new(HostErrorKind::Unknown, format!("Request Failed: {status} {body}")),
    };
    HostError::new(kind, upstream_message(body))
}

/// `error.message` from an OpenAI-style error body, or the raw body.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// Canonical -> upstream
// ---------------------------------------------------------------------------

pub fn upstream_request(request: &Request, drop: &[String]) -> ChatCompletionRequest {
    let tools: Vec<ChatTool> = request
        .tools
        .iter()
        .map(|tool| ChatTool {
            tool_type: "function".to_string(),
            function: Some(ChatFunction {
                name: tool.name.clone(),
                description: (!tool.description.is_empty()).then(|| tool.description.clone()),
                parameters: Some(
                    tool.input_schema
                        .clone()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                ),
            }),
            extra: Map::new(),
        })
        .collect();

    let tool_choice = match (tools.is_empty(), request.tool_mode) {
        (false, ToolMode::Required) => Some(ChatToolChoice::String("required".to_string())),
        _ => None,
    };

    let mut extra = Map::new();
    for (key, upstream_key) in FORWARDED_OPTIONS {
        if drop.iter().any(|d| d == key) {
            continue;
        }
        if let Some(value) = request.options.get(*key) {
            extra.insert((*upstream_key).to_string(), value.clone());
        }
    }

    ChatCompletionRequest {
        model: Some(request.model.clone()),
        messages: Some(request.messages.iter().flat_map(upstream_messages).collect()),
        stream: Some(true),
        stream_options: None,
        tools: (!tools.is_empty()).then_some(tools),
        tool_choice,
        extra,
    }
}

fn upstream_messages(message: &Message) -> Vec<ChatMessage> {
    let name = (!message.display_name.is_empty()).then(|| message.display_name.clone());

    if let Some(text) = message.instruction_text() {
        return vec![text_message("system", text, None)];
    }

    match message.role {
        Role::Assistant => {
            let tool_calls: Vec<ChatToolCall> = message
                .content
                .parts()
                .into_iter()
                .filter_map(|part| match part {
                    ContentPart::ToolCall {
                        call_id,
                        name,
                        input,
                    } => Some(ChatToolCall {
                        id: call_id,
                        call_type: "function".to_string(),
                        function: ChatToolCallFunction {
                            name,
                            arguments: match input {
                                Value::String(raw) => raw,
                                other => other.to_string(),
                            },
                        },
                    }),
                    _ => None,
                })
                .collect();
            let text = message.content.plain_text();
            vec![ChatMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty() || tool_calls.is_empty()).then(|| ChatContent::Text(text)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
                name,
            }]
        }
        Role::User => {
            let mut out = Vec::new();
            let mut texts = Vec::new();
            for part in message.content.parts() {
                match part {
                    ContentPart::ToolResult { call_id, content } => out.push(ChatMessage {
                        role: "tool".to_string(),
                        content: Some(ChatContent::Text(content.join("\n"))),
                        tool_calls: None,
                        tool_call_id: Some(call_id),
                        name: None,
                    }),
                    other => texts.push(other.counted_text()),
                }
            }
            let has_tool_results = !out.is_empty();
            if !texts.is_empty() || !has_tool_results {
                out.push(text_message("user", texts.join("\n"), name));
            }
            out
        }
    }
}

fn text_message(role: &str, text: String, name: Option<String>) -> ChatMessage {
    ChatMessage {
        role: role.to_string(),
        content: Some(ChatContent::Text(text)),
        tool_calls: None,
        tool_call_id: None,
        name,
    }
}

// ---------------------------------------------------------------------------
// Upstream SSE -> fragments
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PendingCall {
    index: u32,
    id: String,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn into_part(self) -> StreamPart {
        let call_id = if self.id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            self.id
        };
        StreamPart::tool_call(call_id, self.name, parse_arguments(&self.arguments))
    }
}

/// Accumulates streamed tool-call deltas, one call at a time.
#[derive(Debug, Default)]
struct ToolCallAssembler {
    pending: Option<PendingCall>,
}

impl ToolCallAssembler {
    /// Absorb a delta; returns the previous call once a new index starts.
    fn push(&mut self, delta: &ChunkToolCall) -> Option<StreamPart> {
        let flushed = match &self.pending {
            Some(p) if p.index != delta.index => self.flush(),
            _ => None,
        };
        let pending = self.pending.get_or_insert_with(|| PendingCall {
            index: delta.index,
            ..PendingCall::default()
        });
        if let Some(id) = &delta.id {
            pending.id.push_str(id);
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                pending.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                pending.arguments.push_str(arguments);
            }
        }
        flushed
    }

    fn flush(&mut self) -> Option<StreamPart> {
        self.pending.take().map(PendingCall::into_part)
    }
}

/// Turn an upstream SSE body into canonical fragments, stopping on cancellation.
pub fn fragment_stream<S, E>(
    byte_stream: S,
    cancel: CancellationToken,
) -> impl Stream<Item = std::result::Result<StreamPart, HostError>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut events = Box::pin(byte_stream.eventsource());
        let mut calls = ToolCallAssembler::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = events.next() => Some(next),
            };
            let Some(next) = next else {
                yield Err(HostError::cancelled());
                return;
            };

            let event = match next {
                None => break,
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    yield Err(HostError::new(HostErrorKind::Unknown, format!("Upstream stream error: {e}")));
                    return;
                }
            };

            let data = event.data.trim();
            if data == "[DONE]" {
                break;
            }
            if let Ok(body) = serde_json::from_str::<Value>(data) {
                if body.get("error").is_some() {
                    yield Err(HostError::new(
                        HostErrorKind::Unknown,
                        format!("Request Failed: 500 {data}"),
                    ));
                    return;
                }
            }
            let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unparseable upstream chunk");
                    continue;
                }
            };

            for choice in &chunk.choices {
                if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
                    if let Some(call) = calls.flush() {
                        yield Ok(call);
                    }
                    yield Ok(StreamPart::text(text));
                }
                for delta in choice.delta.tool_calls.as_deref().unwrap_or_default() {
                    if let Some(call) = calls.push(delta) {
                        yield Ok(call);
                    }
                }
                match choice.finish_reason.as_deref() {
                    Some("content_filter") => {
                        yield Err(HostError::new(HostErrorKind::Blocked, "Output blocked by content filter"));
                        return;
                    }
                    Some(_) => {
                        if let Some(call) = calls.flush() {
                            yield Ok(call);
                        }
                    }
                    None => {}
                }
            }
        }

        if let Some(call) = calls.flush() {
            yield Ok(call);
        }
    }
}
