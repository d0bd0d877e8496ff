use super::types::{
    InputTokensDetails, OutputContent, OutputItem, OutputTokensDetails, ResponseObject,
    ResponsesUsage,
};
use crate::canonical::Usage;
use crate::translate::{Completion, ToolCall};

pub fn response_id() -> String {
    format!("resp_{}", uuid::Uuid::new_v4().simple())
}

pub fn message_item_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

pub fn function_call_item_id() -> String {
    format!("fc_{}", uuid::Uuid::new_v4().simple())
}

pub fn responses_usage(usage: Usage) -> ResponsesUsage {
    ResponsesUsage {
        input_tokens: usage.input_tokens,
        input_tokens_details: InputTokensDetails::default(),
        output_tokens: usage.output_tokens,
        output_tokens_details: OutputTokensDetails::default(),
        total_tokens: usage.total(),
    }
}

pub fn message_item(id: &str, status: &str, content: Vec<OutputContent>) -> OutputItem {
    OutputItem::Message {
        id: id.to_string(),
        status: status.to_string(),
        role: "assistant".to_string(),
        content,
    }
}

pub fn function_call_item(id: &str, status: &str, call: &ToolCall, arguments: &str) -> OutputItem {
    OutputItem::FunctionCall {
        id: id.to_string(),
        status: status.to_string(),
        call_id: call.call_id.clone(),
        name: call.name.clone(),
        arguments: arguments.to_string(),
    }
}

/// Build the aggregate response object: one message item, then one `function_call`
/// item per tool call.
pub fn to_response_object(completion: &Completion, model: &str) -> ResponseObject {
    let mut output = vec![message_item(
        &message_item_id(),
        "completed",
        vec![OutputContent::text(completion.text.clone())],
    )];
    output.extend(completion.tool_calls.iter().map(|call| {
        function_call_item(&function_call_item_id(), "completed", call, &call.arguments())
    }));

    ResponseObject {
        id: response_id(),
        object: "response".to_string(),
        created_at: chrono::Utc::now().timestamp(),
        status: "completed".to_string(),
        error: None,
        model: model.to_string(),
        output,
        usage: Some(responses_usage(completion.usage)),
    }
}
