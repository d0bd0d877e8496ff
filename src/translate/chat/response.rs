use super::types::{
    ChatCompletionResponse, ChatToolCall, ChatToolCallFunction, ChatUsage, Choice, ChoiceMessage,
};
use crate::canonical::Usage;
use crate::translate::{Completion, StopReason};

/// Chat Completions name for a stop reason.
pub fn finish_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Stop => "stop",
        StopReason::ToolCalls => "tool_calls",
    }
}

pub fn chat_usage(usage: Usage) -> ChatUsage {
    ChatUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total(),
    }
}

pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Build the aggregate Chat Completions response. `model` is what the client asked for.
pub fn to_chat_response(completion: &Completion, model: &str) -> ChatCompletionResponse {
    let tool_calls: Vec<ChatToolCall> = completion
        .tool_calls
        .iter()
        .map(|tc| ChatToolCall {
            id: tc.call_id.clone(),
            call_type: "function".to_string(),
            function: ChatToolCallFunction {
                name: tc.name.clone(),
                arguments: tc.arguments(),
            },
        })
        .collect();

    ChatCompletionResponse {
        id: completion_id(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: completion.text.clone(),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                refusal: None,
            },
            logprobs: None,
            finish_reason: finish_reason(completion.stop_reason).to_string(),
        }],
        usage: chat_usage(completion.usage),
    }
}
