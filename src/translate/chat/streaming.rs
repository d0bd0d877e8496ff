//! Chat Completions streaming: one `chat.completion.chunk` per fragment, a closing
//! chunk carrying the finish reason, then the `[DONE]` sentinel.

use super::response::{chat_usage, completion_id, finish_reason};
use super::types::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
};
use crate::canonical::{StreamPart, Usage};
use crate::taxonomy::MappedError;
use crate::translate::{Dialect, SseEvent, StopReason, StreamSynthesizer};

pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug)]
pub struct ChatStreamSynthesizer {
    id: String,
    model: String,
    created: i64,
    include_usage: bool,
    role_sent: bool,
    next_tool_index: u32,
    stop_reason: StopReason,
    usage: Usage,
}

impl ChatStreamSynthesizer {
    pub fn new(model: &str, input_tokens: u64, include_usage: bool) -> Self {
        Self {
            id: completion_id(),
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
            include_usage,
            role_sent: false,
            next_tool_index: 0,
            stop_reason: StopReason::Stop,
            usage: Usage {
                input_tokens,
                output_tokens: 0,
            },
        }
    }

    fn chunk(&self, choices: Vec<ChunkChoice>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices,
            usage: None,
        }
    }

    fn delta_chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> SseEvent {
        SseEvent::data(&self.chunk(vec![ChunkChoice {
            index: 0,
            delta,
            logprobs: None,
            finish_reason,
        }]))
    }

    /// The first text-bearing chunk announces the assistant role, once.
    fn take_role(&mut self) -> Option<String> {
        if self.role_sent {
            return None;
        }
        self.role_sent = true;
        Some("assistant".to_string())
    }
}

impl StreamSynthesizer for ChatStreamSynthesizer {
    fn dialect(&self) -> Dialect {
        Dialect::OpenAiChat
    }

    fn start(&mut self) -> Vec<SseEvent> {
        Vec::new()
    }

    fn on_part(&mut self, part: &StreamPart, output_tokens: u64) -> Vec<SseEvent> {
        self.stop_reason.observe(part);
        self.usage.output_tokens += output_tokens;

        let delta = match part {
            StreamPart::Text { value } => ChunkDelta {
                role: self.take_role(),
                content: Some(value.clone()),
                tool_calls: None,
            },
            StreamPart::ToolCall {
                call_id,
                name,
                input,
            } => {
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                ChunkDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ChunkToolCall {
                        index,
                        id: Some(call_id.clone()),
                        call_type: Some("function".to_string()),
                        function: Some(ChunkToolCallFunction {
                            name: Some(name.clone()),
                            arguments: Some(serde_json::to_string(input).unwrap_or_default()),
                        }),
                    }]),
                }
            }
        };

        vec![self.delta_chunk(delta, None)]
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = vec![self.delta_chunk(
            ChunkDelta::default(),
            Some(finish_reason(self.stop_reason).to_string()),
        )];

        if self.include_usage {
            let mut usage_chunk = self.chunk(Vec::new());
            usage_chunk.usage = Some(chat_usage(self.usage));
            events.push(SseEvent::data(&usage_chunk));
        }

        events.push(SseEvent::raw(DONE_SENTINEL));
        events
    }

    fn fail(&mut self, error: &MappedError) -> Vec<SseEvent> {
        vec![SseEvent::data(&error.body()), SseEvent::raw(DONE_SENTINEL)]
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(parts: &[StreamPart], include_usage: bool) -> Vec<SseEvent> {
        let mut synth = ChatStreamSynthesizer::new("gpt-4o", 5, include_usage);
        let mut events = synth.start();
        for part in parts {
            events.extend(synth.on_part(part, 1));
        }
        events.extend(synth.finish());
        events
    }

    #[test]
    fn test_simple_text_stream() {
        let events = run(&[StreamPart::text("Hel"), StreamPart::text("lo")], false);

        assert_eq!(events.len(), 4);
        let first = events[0].json();
        assert_eq!(first["object"], "chat.completion.chunk");
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(first["choices"][0]["delta"]["content"], "Hel");
        assert!(first["choices"][0]["finish_reason"].is_null());

        let second = events[1].json();
        assert!(second["choices"][0]["delta"].get("role").is_none());

        let last = events[2].json();
        assert_eq!(last["choices"][0]["delta"], json!({}));
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(events[3].data, DONE_SENTINEL);
    }

    #[test]
    fn test_tool_calls_get_increasing_indices() {
        let events = run(
            &[
                StreamPart::text("Checking"),
                StreamPart::tool_call("call_a", "search", json!({"q": "x"})),
                StreamPart::tool_call("call_b", "search", json!({"q": "y"})),
            ],
            false,
        );

        let a = events[1].json();
        let b = events[2].json();
        assert_eq!(a["choices"][0]["delta"]["tool_calls"][0]["index"], 0);
        assert_eq!(a["choices"][0]["delta"]["tool_calls"][0]["id"], "call_a");
        assert_eq!(
            a["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"],
            r#"{"q":"x"}"#
        );
        assert_eq!(b["choices"][0]["delta"]["tool_calls"][0]["index"], 1);
        assert_eq!(events[3].json()["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn test_role_waits_for_first_text() {
        let events = run(
            &[
                StreamPart::tool_call("call_a", "search", json!({"q": "x"})),
                StreamPart::text("Found it"),
                StreamPart::text("."),
            ],
            false,
        );

        assert!(events[0].json()["choices"][0]["delta"].get("role").is_none());
        assert_eq!(events[1].json()["choices"][0]["delta"]["role"], "assistant");
        assert!(events[2].json()["choices"][0]["delta"].get("role").is_none());
    }

    #[test]
    fn test_usage_chunk_when_requested() {
        let events = run(&[StreamPart::text("a b")], true);

        let usage = events[2].json();
        assert_eq!(usage["choices"], json!([]));
        assert_eq!(usage["usage"]["prompt_tokens"], 5);
        assert_eq!(usage["usage"]["completion_tokens"], 1);
        assert_eq!(events.last().unwrap().data, DONE_SENTINEL);
    }

    #[test]
    fn test_empty_stream_still_terminates() {
        let events = run(&[], false);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].json()["choices"][0]["finish_reason"], "stop");
        assert_eq!(events[1].data, DONE_SENTINEL);
    }
}
