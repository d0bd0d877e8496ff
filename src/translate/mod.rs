//! Protocol translation between the three public dialects and the canonical chat model.
//!
//! Each dialect module pairs a normalizer (`request`) with a non-streaming synthesizer
//! (`response`) and a streaming state machine (`streaming`). Everything here is pure:
//! I/O and token counting happen in [`crate::dispatch`], which feeds the results in.

pub mod anthropic;
pub mod chat;
pub mod responses;

use crate::canonical::{StreamPart, Usage};
use crate::taxonomy::MappedError;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    OpenAiChat,
    OpenAiResponses,
    Anthropic,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenAiChat => "openai-chat",
            Self::OpenAiResponses => "openai-responses",
            Self::Anthropic => "anthropic",
        })
    }
}

/// Terminal status of a generation, before dialect naming.
///
/// Starts as `Stop` and flips to `ToolCalls` on the first tool-call fragment; it never flips back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    Stop,
    ToolCalls,
}

impl StopReason {
    pub fn observe(&mut self, part: &StreamPart) {
        if matches!(part, StreamPart::ToolCall { .. }) {
            *self = Self::ToolCalls;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub input: Value,
}

impl ToolCall {
    /// Arguments as the JSON string OpenAI dialects expect.
    pub fn arguments(&self) -> String {
        serde_json::to_string(&self.input).unwrap_or_default()
    }
}

/// Aggregate of a whole generation, for non-streaming responses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub stop_reason: StopReason,
}

impl Completion {
    pub fn new(input_tokens: u64) -> Self {
        Self {
            usage: Usage {
                input_tokens,
                output_tokens: 0,
            },
            ..Self::default()
        }
    }

    pub fn push(&mut self, part: StreamPart, output_tokens: u64) {
        self.stop_reason.observe(&part);
        self.usage.output_tokens += output_tokens;
        match part {
            StreamPart::Text { value } => self.text.push_str(&value),
            StreamPart::ToolCall {
                call_id,
                name,
                input,
            } => self.tool_calls.push(ToolCall {
                call_id,
                name,
                input,
            }),
        }
    }
}

/// One server-sent event, ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn named(event: &str, payload: &impl Serialize) -> Self {
        Self {
            event: Some(event.to_string()),
            data: serde_json::to_string(payload).unwrap_or_default(),
        }
    }

    pub fn data(payload: &impl Serialize) -> Self {
        Self {
            event: None,
            data: serde_json::to_string(payload).unwrap_or_default(),
        }
    }

    pub fn raw(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data).unwrap_or(Value::Null)
    }
}

/// Per-dialect state machine turning fragments into events.
///
/// The driver calls `start` once, `on_part` for every fragment in order, then exactly
/// one of `finish` or `fail`.
pub trait StreamSynthesizer: Send + 'static {
    fn dialect(&self) -> Dialect;

    fn start(&mut self) -> Vec<SseEvent>;

    fn on_part(&mut self, part: &StreamPart, output_tokens: u64) -> Vec<SseEvent>;

    fn finish(&mut self) -> Vec<SseEvent>;

    /// In-band error followed by the dialect's normal termination framing.
    fn fail(&mut self, error: &MappedError) -> Vec<SseEvent>;

    fn usage(&self) -> Usage;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stop_reason_is_sticky() {
        let mut reason = StopReason::default();
        reason.observe(&StreamPart::text("a"));
        assert_eq!(reason, StopReason::Stop);
        reason.observe(&StreamPart::tool_call("c", "f", json!({})));
        reason.observe(&StreamPart::text("b"));
        assert_eq!(reason, StopReason::ToolCalls);
    }

    #[test]
    fn test_completion_accumulates_in_order() {
        let mut completion = Completion::new(7);
        completion.push(StreamPart::text("Hel"), 1);
        completion.push(StreamPart::tool_call("c1", "f", json!({"a": 1})), 3);
        completion.push(StreamPart::text("lo"), 1);
        assert_eq!(completion.text, "Hello");
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].arguments(), r#"{"a":1}"#);
        assert_eq!(completion.usage.input_tokens, 7);
        assert_eq!(completion.usage.output_tokens, 5);
        assert_eq!(completion.stop_reason, StopReason::ToolCalls);
    }
}
