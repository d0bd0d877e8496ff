//! OpenAI Responses streaming.
//!
//! The message item (output index 0) and its single `output_text` part open at the
//! start and close at the end. Each tool call is emitted whole as its own
//! `function_call` item at the next output index. Every event carries a
//! `sequence_number`.

use super::response::{
    function_call_item, function_call_item_id, message_item, message_item_id, response_id,
    responses_usage,
};
use super::types::{OutputContent, OutputItem, ResponseError, ResponseObject, ResponsesEvent, Sequenced};
use crate::canonical::{StreamPart, Usage};
use crate::taxonomy::MappedError;
use crate::translate::{Dialect, SseEvent, StreamSynthesizer, ToolCall};

const MESSAGE_INDEX: usize = 0;
const CONTENT_INDEX: usize = 0;

#[derive(Debug)]
pub struct ResponsesStreamSynthesizer {
    id: String,
    item_id: String,
    model: String,
    created_at: i64,
    sequence: u64,
    text: String,
    function_calls: Vec<OutputItem>,
    usage: Usage,
}

impl ResponsesStreamSynthesizer {
    pub fn new(model: &str, input_tokens: u64) -> Self {
        Self {
            id: response_id(),
            item_id: message_item_id(),
            model: model.to_string(),
            created_at: chrono::Utc::now().timestamp(),
            sequence: 0,
            text: String::new(),
            function_calls: Vec::new(),
            usage: Usage {
                input_tokens,
                output_tokens: 0,
            },
        }
    }

    fn emit(&mut self, event: ResponsesEvent) -> SseEvent {
        let sse = SseEvent::named(
            event.event_name(),
            &Sequenced {
                event: &event,
                sequence_number: self.sequence,
            },
        );
        self.sequence += 1;
        sse
    }

    fn snapshot(&self, status: &str, output: Vec<OutputItem>, usage: bool) -> ResponseObject {
        ResponseObject {
            id: self.id.clone(),
            object: "response".to_string(),
            created_at: self.created_at,
            status: status.to_string(),
            error: None,
            model: self.model.clone(),
            output,
            usage: usage.then(|| responses_usage(self.usage)),
        }
    }

    fn message(&self, status: &str) -> OutputItem {
        message_item(
            &self.item_id,
            status,
            vec![OutputContent::text(self.text.clone())],
        )
    }

    fn tool_call(&mut self, call: ToolCall) -> Vec<SseEvent> {
        let output_index = self.function_calls.len() + 1;
        let item_id = function_call_item_id();
        let arguments = call.arguments();
        let done = function_call_item(&item_id, "completed", &call, &arguments);

        let events = vec![
            self.emit(ResponsesEvent::OutputItemAdded {
                output_index,
                item: function_call_item(&item_id, "in_progress", &call, ""),
            }),
            self.emit(ResponsesEvent::FunctionCallArgumentsDelta {
                item_id: item_id.clone(),
                output_index,
                delta: arguments.clone(),
            }),
            self.emit(ResponsesEvent::FunctionCallArgumentsDone {
                item_id,
                output_index,
                arguments,
            }),
            self.emit(ResponsesEvent::OutputItemDone {
                output_index,
                item: done.clone(),
            }),
        ];
        self.function_calls.push(done);
        events
    }
}

impl StreamSynthesizer for ResponsesStreamSynthesizer {
    fn dialect(&self) -> Dialect {
        Dialect::OpenAiResponses
    }

    fn start(&mut self) -> Vec<SseEvent> {
        let created = self.snapshot("in_progress", Vec::new(), false);
        let item = message_item(&self.item_id, "in_progress", Vec::new());
        vec![
            self.emit(ResponsesEvent::Created {
                response: created.clone(),
            }),
            self.emit(ResponsesEvent::InProgress { response: created }),
            self.emit(ResponsesEvent::OutputItemAdded {
                output_index: MESSAGE_INDEX,
                item,
            }),
            self.emit(ResponsesEvent::ContentPartAdded {
                item_id: self.item_id.clone(),
                output_index: MESSAGE_INDEX,
                content_index: CONTENT_INDEX,
                part: OutputContent::text(""),
            }),
        ]
    }

    fn on_part(&mut self, part: &StreamPart, output_tokens: u64) -> Vec<SseEvent> {
        self.usage.output_tokens += output_tokens;

        match part {
            StreamPart::Text { value } => {
                self.text.push_str(value);
                vec![self.emit(ResponsesEvent::OutputTextDelta {
                    item_id: self.item_id.clone(),
                    output_index: MESSAGE_INDEX,
                    content_index: CONTENT_INDEX,
                    delta: value.clone(),
                })]
            }
            StreamPart::ToolCall {
                call_id,
                name,
                input,
            } => self.tool_call(ToolCall {
                call_id: call_id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
        }
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        let message = self.message("completed");
        let mut output = vec![message.clone()];
        output.extend(self.function_calls.iter().cloned());
        let completed = self.snapshot("completed", output, true);

        vec![
            self.emit(ResponsesEvent::OutputTextDone {
                item_id: self.item_id.clone(),
                output_index: MESSAGE_INDEX,
                content_index: CONTENT_INDEX,
                text: self.text.clone(),
            }),
            self.emit(ResponsesEvent::ContentPartDone {
                item_id: self.item_id.clone(),
                output_index: MESSAGE_INDEX,
                content_index: CONTENT_INDEX,
                part: OutputContent::text(self.text.clone()),
            }),
            self.emit(ResponsesEvent::OutputItemDone {
                output_index: MESSAGE_INDEX,
                item: message,
            }),
            self.emit(ResponsesEvent::Completed {
                response: completed,
            }),
        ]
    }

    fn fail(&mut self, error: &MappedError) -> Vec<SseEvent> {
        let code = error.code.clone().unwrap_or_else(|| error.error_type.clone());
        let mut output = vec![self.message("incomplete")];
        output.extend(self.function_calls.iter().cloned());
        let mut failed = self.snapshot("failed", output, true);
        failed.error = Some(ResponseError {
            code: code.clone(),
            message: error.message.clone(),
        });

        vec![
            self.emit(ResponsesEvent::Error {
                code: Some(code),
                message: error.message.clone(),
                param: None,
            }),
            self.emit(ResponsesEvent::Failed { response: failed }),
        ]
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}
