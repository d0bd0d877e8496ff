//! Anthropic Messages streaming.
//!
//! Text fragments are grouped into runs, one `text` content block per run. A tool call
//! closes any open run and is emitted as a complete `tool_use` block. Blocks never
//! interleave and indices only grow.

use super::response::{message_id, stop_reason};
use super::types::{
    Delta, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent,
    Usage as AnthropicUsage,
};
use crate::canonical::{StreamPart, Usage};
use crate::taxonomy::MappedError;
use crate::translate::{Dialect, SseEvent, StopReason, StreamSynthesizer};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Idle,
    InTextRun { index: usize },
}

#[derive(Debug)]
pub struct AnthropicStreamSynthesizer {
    id: String,
    model: String,
    state: BlockState,
    next_index: usize,
    stop_reason: StopReason,
    usage: Usage,
}

fn event(ev: StreamEvent) -> SseEvent {
    SseEvent::named(ev.event_name(), &ev)
}

impl AnthropicStreamSynthesizer {
    pub fn new(model: &str, input_tokens: u64) -> Self {
        Self {
            id: message_id(),
            model: model.to_string(),
            state: BlockState::Idle,
            next_index: 0,
            stop_reason: StopReason::Stop,
            usage: Usage {
                input_tokens,
                output_tokens: 0,
            },
        }
    }

    fn open_block(&mut self, block: ResponseContentBlock) -> (usize, SseEvent) {
        let index = self.next_index;
        self.next_index += 1;
        (
            index,
            event(StreamEvent::ContentBlockStart {
                index,
                content_block: block,
            }),
        )
    }

    /// Close the current text run, if any.
    fn close_run(&mut self) -> Option<SseEvent> {
        match std::mem::replace(&mut self.state, BlockState::Idle) {
            BlockState::InTextRun { index } => Some(event(StreamEvent::ContentBlockStop { index })),
            BlockState::Idle => None,
        }
    }

    fn text(&mut self, value: &str) -> Vec<SseEvent> {
        let mut events = Vec::with_capacity(2);
        let index = match self.state {
            BlockState::InTextRun { index } => index,
            BlockState::Idle => {
                let (index, start) = self.open_block(ResponseContentBlock::Text {
                    text: String::new(),
                });
                events.push(start);
                self.state = BlockState::InTextRun { index };
                index
            }
        };
        events.push(event(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta {
                text: value.to_string(),
            },
        }));
        events
    }

    fn tool_call(&mut self, call_id: &str, name: &str, input: &serde_json::Value) -> Vec<SseEvent> {
        let mut events = Vec::with_capacity(4);
        events.extend(self.close_run());

        let (index, start) = self.open_block(ResponseContentBlock::ToolUse {
            id: call_id.to_string(),
            name: name.to_string(),
            input: json!({}),
        });
        events.push(start);
        events.push(event(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::InputJsonDelta {
                partial_json: serde_json::to_string(input).unwrap_or_default(),
            },
        }));
        events.push(event(StreamEvent::ContentBlockStop { index }));
        events
    }
}

impl StreamSynthesizer for AnthropicStreamSynthesizer {
    fn dialect(&self) -> Dialect {
        Dialect::Anthropic
    }

    fn start(&mut self) -> Vec<SseEvent> {
        vec![event(StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: AnthropicUsage::default(),
            },
        })]
    }

    fn on_part(&mut self, part: &StreamPart, output_tokens: u64) -> Vec<SseEvent> {
        self.stop_reason.observe(part);
        self.usage.output_tokens += output_tokens;

        match part {
            StreamPart::Text { value } => self.text(value),
            StreamPart::ToolCall {
                call_id,
                name,
                input,
            } => self.tool_call(call_id, name, input),
        }
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        let mut events: Vec<SseEvent> = self.close_run().into_iter().collect();
        events.push(event(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason(self.stop_reason).to_string()),
                stop_sequence: None,
            },
            usage: AnthropicUsage {
                input_tokens: self.usage.input_tokens,
                output_tokens: self.usage.output_tokens,
            },
        }));
        events.push(event(StreamEvent::MessageStop));
        events
    }

    fn fail(&mut self, error: &MappedError) -> Vec<SseEvent> {
        let mut events: Vec<SseEvent> = self.close_run().into_iter().collect();
        events.push(SseEvent::named("error", &error.body()));
        events.push(event(StreamEvent::MessageStop));
        events
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::host::{HostError, HostErrorKind};
    use crate::taxonomy::map_error;

    fn run(parts: &[StreamPart]) -> Vec<SseEvent> {
        let mut synth = AnthropicStreamSynthesizer::new("claude-sonnet-4", 9);
        let mut events = synth.start();
        for part in parts {
            events.extend(synth.on_part(part, 1));
        }
        events.extend(synth.finish());
        events
    }

    fn names(events: &[SseEvent]) -> Vec<&str> {
        events.iter().filter_map(|e| e.event.as_deref()).collect()
    }

    #[test]
    fn test_text_run_is_one_block() {
        let events = run(&[StreamPart::text("Hel"), StreamPart::text("lo")]);

        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        let start = events[0].json();
        assert_eq!(start["message"]["usage"]["input_tokens"], 0);
        assert_eq!(start["message"]["content"], json!([]));
        assert_eq!(events[1].json()["content_block"], json!({"type": "text", "text": ""}));
        assert_eq!(events[2].json()["delta"], json!({"type": "text_delta", "text": "Hel"}));

        let delta = events[5].json();
        assert_eq!(delta["delta"]["stop_reason"], "end_turn");
        assert_eq!(delta["usage"]["input_tokens"], 9);
        assert_eq!(delta["usage"]["output_tokens"], 2);
    }

    #[test]
    fn test_tool_call_splits_text_runs() {
        let events = run(&[
            StreamPart::text("Checking"),
            StreamPart::tool_call("call_1", "get_weather", json!({"location": "Tokyo"})),
            StreamPart::text("Done"),
        ]);

        let starts: Vec<_> = events
            .iter()
            .filter(|e| e.event.as_deref() == Some("content_block_start"))
            .map(|e| e.json())
            .collect();
        assert_eq!(starts.len(), 3);
        assert_eq!(starts[0]["index"], 0);
        assert_eq!(starts[1]["index"], 1);
        assert_eq!(starts[1]["content_block"]["type"], "tool_use");
        assert_eq!(starts[1]["content_block"]["id"], "call_1");
        assert_eq!(starts[2]["index"], 2);
        assert_eq!(starts[2]["content_block"]["type"], "text");

        let json_delta = events
            .iter()
            .map(SseEvent::json)
            .find(|e| e["delta"]["type"] == "input_json_delta")
            .unwrap();
        assert_eq!(json_delta["delta"]["partial_json"], r#"{"location":"Tokyo"}"#);

        let message_delta = &events[events.len() - 2].json();
        assert_eq!(message_delta["delta"]["stop_reason"], "tool_use");
    }

    #[test]
    fn test_every_start_has_matching_stop() {
        let events = run(&[
            StreamPart::tool_call("a", "f", json!({})),
            StreamPart::text("x"),
            StreamPart::text("y"),
            StreamPart::tool_call("b", "f", json!({})),
            StreamPart::tool_call("c", "f", json!({})),
            StreamPart::text("z"),
        ]);

        let mut open: Option<u64> = None;
        let mut last_index: Option<u64> = None;
        for ev in &events {
            let body = ev.json();
            match ev.event.as_deref() {
                Some("content_block_start") => {
                    assert!(open.is_none(), "blocks interleave");
                    let index = body["index"].as_u64().unwrap();
                    if let Some(last) = last_index {
                        assert!(index > last);
                    }
                    open = Some(index);
                    last_index = Some(index);
                }
                Some("content_block_delta") => assert_eq!(body["index"].as_u64(), open),
                Some("content_block_stop") => {
                    assert_eq!(body["index"].as_u64(), open);
                    open = None;
                }
                _ => {}
            }
        }
        assert!(open.is_none());
        assert_eq!(last_index, Some(4));
    }

    #[test]
    fn test_failure_closes_block_then_reports() {
        let mut synth = AnthropicStreamSynthesizer::new("m", 0);
        synth.start();
        synth.on_part(&StreamPart::text("partial"), 1);

        let err = BridgeError::from(HostError::new(HostErrorKind::QuotaExceeded, "slow down"));
        let events = synth.fail(&map_error(&err, Dialect::Anthropic));

        assert_eq!(names(&events), vec!["content_block_stop", "error", "message_stop"]);
        let body = events[1].json();
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "rate_limit_error");
    }
}
