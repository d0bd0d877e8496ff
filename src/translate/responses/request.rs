//! Normalize OpenAI Responses requests into the canonical chat model.
//!
//! `input` is either a bare string or a list of items. Items other than messages
//! (function calls and their outputs, reasoning) are mapped onto canonical messages so
//! that a client replaying a previous turn keeps its context.

use super::types::{
    FunctionOutput, InputContent, InputItem, InputMessage, InputPart, KnownInputPart, KnownItem,
    ResponsesInput, ResponsesRequest, ResponsesTool, ResponsesToolChoice,
};
use crate::canonical::{
    pass_option, Content, ContentPart, FoldedPart, InstructionTag, Message, Request, ToolMode,
    ToolSpec,
};
use crate::error::{BridgeError, Result};
use crate::tokens::TokenAccountant;
use crate::translate::chat::request::parse_arguments;
use serde_json::{json, Value};

pub async fn normalize(
    req: &ResponsesRequest,
    accountant: &TokenAccountant,
) -> Result<(Request, u64)> {
    let request = to_canonical(req)?;
    let input_tokens = accountant.count_messages(&request.messages).await?;
    Ok((request, input_tokens))
}

pub fn to_canonical(req: &ResponsesRequest) -> Result<Request> {
    let model = req
        .model
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| BridgeError::missing_field("model"))?;

    let mut messages = Vec::new();
    if let Some(instructions) = req.instructions.as_deref().filter(|i| !i.is_empty()) {
        messages.push(Message::instruction(InstructionTag::System, instructions));
    }
    match &req.input {
        Some(ResponsesInput::Text(text)) if !text.is_empty() => {
            messages.push(Message::user(Content::Text(text.clone())));
        }
        Some(ResponsesInput::Items(items)) if !items.is_empty() => {
            messages.extend(items.iter().map(translate_item));
        }
        _ => return Err(BridgeError::missing_field("input")),
    }

    let mut request = Request {
        model: model.to_string(),
        messages,
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

    apply_tool_choice(&mut request, req.tool_choice.as_ref());
    Ok(request)
}

fn apply_tool_choice(request: &mut Request, choice: Option<&ResponsesToolChoice>) {
    request.tool_mode = match choice {
        Some(ResponsesToolChoice::Mode(mode)) if mode == "required" => ToolMode::Required,
        Some(ResponsesToolChoice::Object {
            choice_type, name, ..
        }) if choice_type == "function" => {
            if let Some(name) = name {
                request.narrow_tools_to(name);
            }
            ToolMode::Required
        }
        Some(ResponsesToolChoice::Object {
            choice_type, mode, ..
        }) if choice_type == "allowed_tools" => match mode.as_deref() {
            Some("required") => ToolMode::Required,
            _ => ToolMode::Auto,
        },
        // Hosted tools such as `{"type": "file_search"}`
        Some(ResponsesToolChoice::Object { .. }) => ToolMode::Required,
        _ => ToolMode::Auto,
    };
}

fn translate_item(item: &InputItem) -> Message {
    match item {
        InputItem::Known(KnownItem::Message(msg)) | InputItem::Bare(msg) => translate_message(msg),
        InputItem::Known(KnownItem::FunctionCall {
            call_id,
            name,
            arguments,
        }) => Message::assistant(Content::Parts(vec![ContentPart::ToolCall {
            call_id: call_id.clone(),
            name: name.clone(),
            input: parse_arguments(arguments),
        }])),
        InputItem::Known(KnownItem::FunctionCallOutput { call_id, output }) => {
            let content = match output {
                FunctionOutput::Text(text) => vec![text.clone()],
                FunctionOutput::Parts(parts) => parts
                    .iter()
                    .map(|p| translate_part(p).counted_text())
                    .collect(),
            };
            Message::user(Content::Parts(vec![ContentPart::ToolResult {
                call_id: call_id.clone(),
                content,
            }]))
        }
        InputItem::Known(KnownItem::Reasoning { summary }) => {
            let text = summary
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            Message::assistant(Content::Text(FoldedPart::Reasoning(text).render()))
        }
        InputItem::Other(raw) => {
            Message::user(Content::Text(unsupported(raw, "item").render()))
        }
    }
}

fn translate_message(msg: &InputMessage) -> Message {
    let parts = match &msg.content {
        InputContent::Text(text) => vec![ContentPart::text(text.clone())],
        InputContent::Parts(parts) => parts.iter().map(translate_part).collect(),
    };

    match msg.role.as_str() {
        "system" | "developer" => {
            let tag = if msg.role == "system" {
                InstructionTag::System
            } else {
                InstructionTag::Developer
            };
            let text = parts
                .iter()
                .map(ContentPart::counted_text)
                .collect::<Vec<_>>()
                .join("\n");
            Message::instruction(tag, &text)
        }
        "assistant" => Message::assistant(Content::from_parts(parts)),
        _ => Message::user(Content::from_parts(parts)),
    }
}

fn translate_part(part: &InputPart) -> ContentPart {
    let known = match part {
        InputPart::Known(known) => known,
        InputPart::Other(raw) => return unsupported(raw, "content").into_part(),
    };

    let folded = match known {
        KnownInputPart::InputText { text } | KnownInputPart::OutputText { text } => {
            return ContentPart::text(text.clone())
        }
        KnownInputPart::InputImage { image_url, file_id } => match (image_url, file_id) {
            (Some(url), _) => FoldedPart::ImageUrl(url.clone()),
            (None, Some(id)) => FoldedPart::ImageFile(id.clone()),
            (None, None) => FoldedPart::ImageFile(String::new()),
        },
        KnownInputPart::InputFile {
            filename,
            file_id,
            file_url,
        } => FoldedPart::File(
            filename
                .clone()
                .or_else(|| file_id.clone())
                .or_else(|| file_url.clone())
                .unwrap_or_else(|| "inline file".to_string()),
        ),
        KnownInputPart::InputAudio { input_audio } => FoldedPart::Audio {
            format: input_audio.format.clone(),
            bytes: input_audio.data.len(),
        },
        KnownInputPart::Refusal { refusal } => FoldedPart::Refusal(refusal.clone()),
    };
    folded.into_part()
}

fn unsupported(raw: &Value, fallback: &str) -> FoldedPart {
    FoldedPart::Unsupported {
        kind: raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string(),
        raw: raw.clone(),
    }
}

fn translate_tool(tool: &ResponsesTool) -> ToolSpec {
    if tool.tool_type == "function" {
        return ToolSpec {
            name: tool.name.clone().unwrap_or_default(),
            description: tool.description.clone().unwrap_or_default(),
            input_schema: tool.parameters.clone(),
        };
    }

    let name = tool
        .name
        .clone()
        .or_else(|| {
            tool.extra
                .get("server_label")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| tool.tool_type.clone());
    let description = tool
        .description
        .clone()
        .unwrap_or_else(|| builtin_description(tool));

    ToolSpec {
        name,
        description,
        input_schema: builtin_schema(&tool.tool_type),
    }
}

fn builtin_description(tool: &ResponsesTool) -> String {
    let mut description = format!("Built-in {} tool", tool.tool_type);
    match tool.tool_type.as_str() {
        "computer_use_preview" => {
            if let (Some(w), Some(h)) = (
                tool.extra.get("display_width"),
                tool.extra.get("display_height"),
            ) {
                description.push_str(&format!(" for a {w}x{h} display"));
            }
        }
        "file_search" => {
            if let Some(ids) = tool.extra.get("vector_store_ids") {
                description.push_str(&format!(" over vector stores {ids}"));
            }
        }
        "mcp" => {
            if let Some(url) = tool.extra.get("server_url").and_then(Value::as_str) {
                description.push_str(&format!(" at {url}"));
            }
        }
        _ => {}
    }
    description
}

fn builtin_schema(tool_type: &str) -> Option<Value> {
    let properties = match tool_type {
        "web_search" | "web_search_preview" | "file_search" => json!({"query": {"type": "string"}}),
        "code_interpreter" => json!({"code": {"type": "string"}}),
        "computer_use_preview" => json!({
            "action": {"type": "string"},
            "x": {"type": "integer"},
            "y": {"type": "integer"},
            "text": {"type": "string"}
        }),
        "image_generation" => json!({"prompt": {"type": "string"}}),
        "local_shell" => json!({"command": {"type": "array", "items": {"type": "string"}}}),
        _ => return None,
    };
    Some(json!({"type": "object", "properties": properties}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Role;

    fn parse(body: Value) -> ResponsesRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_string_input_with_instructions() {
        let req = parse(json!({
            "model": "gpt-4.1",
            "instructions": "Answer in French.",
            "input": "Hello",
            "max_output_tokens": 1
        }));

        let result = to_canonical(&req).unwrap();

        assert_eq!(result.messages.len(), 2);
        assert_eq!(
            result.messages[0].content,
            Content::Text("[SYSTEM] Answer in French.".to_string())
        );
        assert_eq!(result.messages[1].role, Role::User);
        assert_eq!(result.messages[1].content, Content::Text("Hello".to_string()));
        assert_eq!(
            result.options["max_output_tokens"],
            json!(crate::canonical::MIN_OUTPUT_TOKENS)
        );
    }

    #[test]
    fn test_item_list_with_function_round_trip() {
        let req = parse(json!({
            "model": "gpt-4.1",
            "input": [
                {"role": "developer", "content": "Use tools."},
                {"type": "message", "role": "user", "content": [{"type": "input_text", "text": "Weather?"}]},
                {"type": "function_call", "call_id": "call_9", "name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"},
                {"type": "function_call_output", "call_id": "call_9", "output": "Snow"},
                {"type": "reasoning", "id": "rs_1", "summary": [{"type": "summary_text", "text": "Checked weather"}]},
                {"type": "item_reference", "id": "msg_0"}
            ]
        }));

        let messages = to_canonical(&req).unwrap().messages;

        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].display_name, "developer");
        assert_eq!(messages[0].content, Content::Text("[DEVELOPER] Use tools.".to_string()));
        assert_eq!(messages[1].content, Content::Text("Weather?".to_string()));
        assert_eq!(
            messages[2].content,
            Content::Parts(vec![ContentPart::ToolCall {
                call_id: "call_9".to_string(),
                name: "get_weather".to_string(),
                input: json!({"city": "Oslo"}),
            }])
        );
        assert_eq!(messages[3].role, Role::User);
        assert_eq!(
            messages[3].content,
            Content::Parts(vec![ContentPart::ToolResult {
                call_id: "call_9".to_string(),
                content: vec!["Snow".to_string()],
            }])
        );
        assert_eq!(messages[4].role, Role::Assistant);
        assert!(messages[4].counted_text().starts_with("[Reasoning]: Checked weather"));
        assert!(messages[5].counted_text().starts_with("[Unsupported item_reference]"));
    }

    #[test]
    fn test_non_text_parts_are_labeled() {
        let req = parse(json!({
            "model": "gpt-4.1",
            "input": [{"role": "user", "content": [
                {"type": "input_image", "image_url": "https://x/cat.png"},
                {"type": "input_file", "filename": "notes.pdf", "file_data": "..."},
                {"type": "input_image", "file_id": "file_123"}
            ]}]
        }));

        let text = to_canonical(&req).unwrap().messages[0].counted_text();

        assert!(text.contains("[Image URL]: https://x/cat.png"));
        assert!(text.contains("[File]: notes.pdf"));
        assert!(text.contains("[Image File]: file_123"));
    }

    #[test]
    fn test_missing_input_is_validation_error() {
        let err = to_canonical(&parse(json!({"model": "gpt-4.1"}))).unwrap_err();
        assert!(matches!(err, BridgeError::Validation { .. }));
        assert!(err.to_string().contains("input"));

        let empty = parse(json!({"model": "gpt-4.1", "input": []}));
        assert!(to_canonical(&empty).is_err());
    }

    #[test]
    fn test_tools_and_choice() {
        let req = parse(json!({
            "model": "gpt-4.1",
            "input": "hi",
            "tools": [
                {"type": "function", "name": "lookup", "description": "Find", "parameters": {"type": "object"}},
                {"type": "web_search_preview"},
                {"type": "mcp", "server_label": "docs", "server_url": "https://mcp.example"}
            ],
            "tool_choice": {"type": "function", "name": "lookup"}
        }));

        let result = to_canonical(&req).unwrap();
        assert_eq!(result.tool_mode, ToolMode::Required);
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.tools[0].name, "lookup");

        let mut all = req.clone();
        all.tool_choice = None;
        let tools = to_canonical(&all).unwrap().tools;
        assert_eq!(tools[1].name, "web_search_preview");
        assert!(tools[1].input_schema.as_ref().unwrap()["properties"]["query"].is_object());
        assert_eq!(tools[2].name, "docs");
        assert!(tools[2].description.contains("https://mcp.example"));
        assert!(tools[2].input_schema.is_none());
    }

    #[test]
    fn test_hosted_tool_choice_is_required() {
        let req = parse(json!({
            "model": "gpt-4.1",
            "input": "hi",
            "tool_choice": {"type": "file_search"}
        }));
        assert_eq!(to_canonical(&req).unwrap().tool_mode, ToolMode::Required);

        let none = parse(json!({"model": "gpt-4.1", "input": "hi", "tool_choice": "none"}));
        assert_eq!(to_canonical(&none).unwrap().tool_mode, ToolMode::Auto);
    }
}
