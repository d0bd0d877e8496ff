use super::types::{MessagesResponse, ResponseContentBlock, Usage};
use crate::translate::{Completion, StopReason};

pub fn stop_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Stop => "end_turn",
        StopReason::ToolCalls => "tool_use",
    }
}

pub fn message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

/// Build the aggregate Messages response.
///
/// Text comes first, then one `tool_use` block per call in arrival order. A generation
/// with neither still carries a single empty text block.
pub fn to_messages_response(completion: &Completion, model: &str) -> MessagesResponse {
    let mut content = Vec::with_capacity(completion.tool_calls.len() + 1);
    if !completion.text.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: completion.text.clone(),
        });
    }
    content.extend(
        completion
            .tool_calls
            .iter()
            .map(|tc| ResponseContentBlock::ToolUse {
                id: tc.call_id.clone(),
                name: tc.name.clone(),
                input: tc.input.clone(),
            }),
    );
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    MessagesResponse {
        id: message_id(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason: Some(stop_reason(completion.stop_reason).to_string()),
        stop_sequence: None,
        usage: Usage {
            input_tokens: completion.usage.input_tokens,
            output_tokens: completion.usage.output_tokens,
        },
    }
}
