//! Normalize OpenAI Chat Completions requests into the canonical chat model.
//!
//! `system` and `developer` messages become tagged assistant messages, `tool` and
//! legacy `function` messages become user messages carrying a tool result.

use super::types::{
    ChatCompletionRequest, ChatContent, ChatContentPart, ChatMessage, ChatTool, ChatToolCall,
    ChatToolChoice, KnownChatPart,
};
use crate::canonical::{
    pass_option, Content, ContentPart, FoldedPart, InstructionTag, Message, Request, ToolMode,
    ToolSpec,
};
use crate::error::{BridgeError, Result};
use crate::tokens::TokenAccountant;
use serde_json::Value;

/// Validate and normalize, then count input tokens.
pub async fn normalize(
    req: &ChatCompletionRequest,
    accountant: &TokenAccountant,
) -> Result<(Request, u64)> {
    let request = to_canonical(req)?;
    let input_tokens = accountant.count_messages(&request.messages).await?;
    Ok((request, input_tokens))
}

pub fn to_canonical(req: &ChatCompletionRequest) -> Result<Request> {
    let model = req
        .model
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| BridgeError::missing_field("model"))?;
    let messages = req
        .messages
        .as_deref()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| BridgeError::missing_field("messages"))?;

    let mut request = Request {
        model: model.to_string(),
        messages: messages.iter().map(translate_message).collect(),
        tools: req
            .tools
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(translate_tool)
            .collect(),
        ..Request::default()
    };

    for (key, value) in &req.extra {
        pass_option(&mut request.options, key, value);
    }

    match &req.tool_choice {
        Some(ChatToolChoice::String(choice)) if choice == "required" => {
            request.tool_mode = ToolMode::Required;
        }
        Some(ChatToolChoice::Specific(specific)) => {
            request.tool_mode = ToolMode::Required;
            request.narrow_tools_to(&specific.function.name);
        }
        // "auto", "none" and shapes we cannot express
        _ => request.tool_mode = ToolMode::Auto,
    }

    Ok(request)
}

fn translate_message(msg: &ChatMessage) -> Message {
    let name = msg.name.clone().unwrap_or_default();

    match msg.role.as_str() {
        "system" => Message::instruction(InstructionTag::System, &content_text(msg.content.as_ref())),
        "developer" => {
            Message::instruction(InstructionTag::Developer, &content_text(msg.content.as_ref()))
        }
        "assistant" => {
            let mut parts = content_parts(msg.content.as_ref());
            parts.extend(
                msg.tool_calls
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(translate_tool_call),
            );
            Message::assistant(Content::from_parts(parts)).with_name(name)
        }
        "tool" | "function" => {
            let call_id = msg.tool_call_id.clone().unwrap_or_else(|| name.clone());
            Message::user(Content::Parts(vec![ContentPart::ToolResult {
                call_id,
                content: vec![content_text(msg.content.as_ref())],
            }]))
        }
        // "user" and anything unrecognised
        _ => Message::user(Content::from_parts(content_parts(msg.content.as_ref()))).with_name(name),
    }
}

fn content_parts(content: Option<&ChatContent>) -> Vec<ContentPart> {
    match content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) => vec![ContentPart::text(text.clone())],
        Some(ChatContent::Parts(parts)) => parts.iter().map(translate_part).collect(),
    }
}

fn content_text(content: Option<&ChatContent>) -> String {
    content_parts(content)
        .iter()
        .map(ContentPart::counted_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn translate_part(part: &ChatContentPart) -> ContentPart {
    let folded = match part {
        ChatContentPart::Known(KnownChatPart::Text { text }) => return ContentPart::text(text.clone()),
        ChatContentPart::Known(KnownChatPart::ImageUrl { image_url }) => {
            FoldedPart::ImageUrl(image_url.url.clone())
        }
        ChatContentPart::Known(KnownChatPart::InputAudio { input_audio }) => FoldedPart::Audio {
            format: input_audio.format.clone(),
            bytes: input_audio.data.len(),
        },
        ChatContentPart::Known(KnownChatPart::File { file }) => FoldedPart::File(
            file.filename
                .clone()
                .or_else(|| file.file_id.clone())
                .unwrap_or_else(|| "inline file".to_string()),
        ),
        ChatContentPart::Known(KnownChatPart::Refusal { refusal }) => {
            FoldedPart::Refusal(refusal.clone())
        }
        ChatContentPart::Other(raw) => FoldedPart::Unsupported {
            kind: raw
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("content")
                .to_string(),
            raw: raw.clone(),
        },
    };
    folded.into_part()
}

fn translate_tool_call(call: &ChatToolCall) -> ContentPart {
    ContentPart::ToolCall {
        call_id: call.id.clone(),
        name: call.function.name.clone(),
        input: parse_arguments(&call.function.arguments),
    }
}

/// Tool-call arguments arrive as a JSON string; keep the raw string if it does not parse.
pub fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}

fn translate_tool(tool: &ChatTool) -> ToolSpec {
    if let Some(function) = &tool.function {
        return ToolSpec {
            name: function.name.clone(),
            description: function.description.clone().unwrap_or_default(),
            input_schema: function.parameters.clone(),
        };
    }

    // Custom and built-in tool types carry their payload under a key named after the type
    let payload = tool.extra.get(&tool.tool_type);
    let field = |key: &str| {
        payload
            .and_then(|p| p.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    ToolSpec {
        name: field("name").unwrap_or_else(|| tool.tool_type.clone()),
        description: field("description")
            .unwrap_or_else(|| format!("Built-in {} tool", tool.tool_type)),
        input_schema: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Role;
    use serde_json::json;

    fn parse(body: Value) -> ChatCompletionRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_simple_text_request() {
        let req = parse(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "You are helpful"},
                {"role": "user", "content": "Hello"}
            ],
            "temperature": 0.3,
        }));

        let result = to_canonical(&req).unwrap();

        assert_eq!(result.model, "gpt-4o");
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, Role::Assistant);
        assert_eq!(
            result.messages[0].content,
            Content::Text("[SYSTEM] You are helpful".to_string())
        );
        assert_eq!(result.messages[1].role, Role::User);
        assert_eq!(result.options["temperature"], json!(0.3));
        assert_eq!(result.tool_mode, ToolMode::Auto);
    }

    #[test]
    fn test_missing_fields_are_validation_errors() {
        let no_messages = parse(json!({"model": "gpt-4o"}));
        let err = to_canonical(&no_messages).unwrap_err();
        assert!(matches!(err, BridgeError::Validation { .. }));
        assert!(err.to_string().contains("messages"));

        let no_model = parse(json!({"messages": [{"role": "user", "content": "hi"}]}));
        assert!(to_canonical(&no_model).unwrap_err().to_string().contains("model"));

        let empty = parse(json!({"model": "gpt-4o", "messages": []}));
        assert!(to_canonical(&empty).is_err());
    }

    #[test]
    fn test_tool_round_trip_messages() {
        let req = parse(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "Weather in Tokyo?"},
                {"role": "assistant", "content": null, "tool_calls": [{
                    "id": "call_1", "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"location\":\"Tokyo\"}"}
                }]},
                {"role": "tool", "tool_call_id": "call_1", "content": "Sunny"}
            ]
        }));

        let result = to_canonical(&req).unwrap();

        assert_eq!(
            result.messages[1].content,
            Content::Parts(vec![ContentPart::ToolCall {
                call_id: "call_1".to_string(),
                name: "get_weather".to_string(),
                input: json!({"location": "Tokyo"}),
            }])
        );
        assert_eq!(result.messages[2].role, Role::User);
        assert_eq!(
            result.messages[2].content,
            Content::Parts(vec![ContentPart::ToolResult {
                call_id: "call_1".to_string(),
                content: vec!["Sunny".to_string()],
            }])
        );
    }

    #[test]
    fn test_non_text_parts_are_labeled() {
        let req = parse(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "What is this?"},
                {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}},
                {"type": "input_audio", "input_audio": {"data": "AAAA", "format": "wav"}},
                {"type": "hologram", "beam": 3}
            ]}]
        }));

        let text = to_canonical(&req).unwrap().messages[0].counted_text();

        assert!(text.contains("[Image URL]: https://example.com/cat.png"));
        assert!(text.contains("[Audio]: wav"));
        assert!(text.contains("[Unsupported hologram]"));
    }

    #[test]
    fn test_tool_choice_mapping() {
        let base = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [
                {"type": "function", "function": {"name": "a", "parameters": {"type": "object"}}},
                {"type": "function", "function": {"name": "b"}}
            ]
        });
        let with_choice = |choice: Value| {
            let mut body = base.clone();
            body["tool_choice"] = choice;
            to_canonical(&parse(body)).unwrap()
        };

        assert_eq!(with_choice(json!("none")).tool_mode, ToolMode::Auto);
        assert_eq!(with_choice(json!("auto")).tool_mode, ToolMode::Auto);
        assert_eq!(with_choice(json!("required")).tool_mode, ToolMode::Required);

        let named = with_choice(json!({"type": "function", "function": {"name": "b"}}));
        assert_eq!(named.tool_mode, ToolMode::Required);
        assert_eq!(named.tools.len(), 1);
        assert_eq!(named.tools[0].name, "b");
    }

    #[test]
    fn test_non_function_tool_kept_as_description() {
        let req = parse(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"type": "custom", "custom": {"name": "grammar", "description": "Free-form"}}]
        }));

        let tools = to_canonical(&req).unwrap().tools;

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "grammar");
        assert_eq!(tools[0].description, "Free-form");
        assert!(tools[0].input_schema.is_none());
    }

    #[test]
    fn test_max_tokens_floor() {
        let req = parse(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1
        }));
        let options = to_canonical(&req).unwrap().options;
        assert_eq!(options["max_tokens"], json!(crate::canonical::MIN_OUTPUT_TOKENS));
    }
}
