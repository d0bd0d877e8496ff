//! Normalize Anthropic Messages requests into the canonical chat model.

use super::types::{
    ContentBlock, KnownBlock, MediaSource, Message as AnthropicMessage, MessagesRequest, Tool,
    ToolChoice, ToolResultContent,
};
use crate::canonical::{
    pass_option, Content, ContentPart, FoldedPart, InstructionTag, Message, Request, ToolMode,
    ToolSpec,
};
use crate::error::{BridgeError, Result};
use crate::tokens::TokenAccountant;
use serde_json::{json, Value};

/// Prefixes of Anthropic-defined tool types, which carry no `input_schema`.
const BUILTIN_TOOL_PREFIXES: &[&str] = &[
    "bash_",
    "computer_",
    "text_editor_",
    "web_search_",
    "code_execution_",
];

pub async fn normalize(
    req: &MessagesRequest,
    accountant: &TokenAccountant,
) -> Result<(Request, u64)> {
    let request = to_canonical(req)?;
    let input_tokens = accountant.count_messages(&request.messages).await?;
    Ok((request, input_tokens))
}

pub fn to_canonical(req: &MessagesRequest) -> Result<Request> {
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

    let mut canonical = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = &req.system {
        let text = system.as_text();
        if !text.is_empty() {
            canonical.push(Message::instruction(InstructionTag::System, &text));
        }
    }
    canonical.extend(messages.iter().map(translate_message));

    let mut request = Request {
        model: model.to_string(),
        messages: canonical,
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

fn apply_tool_choice(request: &mut Request, choice: Option<&ToolChoice>) {
    let Some(choice) = choice else {
        return;
    };
    match choice.choice_type.as_str() {
        "any" => request.tool_mode = ToolMode::Required,
        "tool" => {
            request.tool_mode = ToolMode::Required;
            if let Some(name) = &choice.name {
                request.narrow_tools_to(name);
            }
        }
        // "auto", and "none" which canonical cannot express
        _ => request.tool_mode = ToolMode::Auto,
    }
}

fn translate_message(msg: &AnthropicMessage) -> Message {
    let parts: Vec<ContentPart> = msg.content.blocks().iter().map(translate_block).collect();
    let content = Content::from_parts(parts);
    match msg.role.as_str() {
        "assistant" => Message::assistant(content),
        _ => Message::user(content),
    }
}

fn translate_block(block: &ContentBlock) -> ContentPart {
    let known = match block {
        ContentBlock::Known(known) => known,
        ContentBlock::Other(raw) => return unsupported(raw).into_part(),
    };

    let folded = match known {
        KnownBlock::Text { text } => return ContentPart::text(text.clone()),
        KnownBlock::ToolUse { id, name, input } => {
            return ContentPart::ToolCall {
                call_id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }
        }
        KnownBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            return ContentPart::ToolResult {
                call_id: tool_use_id.clone(),
                content: tool_result_text(content.as_ref(), is_error.unwrap_or(false)),
            }
        }
        KnownBlock::Image { source } => image_part(source),
        KnownBlock::Document { source, title } => FoldedPart::Document(
            title
                .clone()
                .or_else(|| source.url.clone())
                .or_else(|| source.file_id.clone())
                .or_else(|| source.media_type.clone())
                .unwrap_or_else(|| source.source_type.clone()),
        ),
        KnownBlock::Thinking { thinking, .. } => FoldedPart::Thinking(thinking.clone()),
        KnownBlock::RedactedThinking { .. } => FoldedPart::RedactedThinking,
        KnownBlock::ServerToolUse { name, input, .. } => FoldedPart::ServerToolUse {
            name: name.clone(),
            input: input.clone(),
        },
        KnownBlock::WebSearchToolResult { .. } => {
            FoldedPart::ServerToolResult("web_search_tool_result".to_string())
        }
    };
    folded.into_part()
}

fn image_part(source: &MediaSource) -> FoldedPart {
    match source.source_type.as_str() {
        "url" => FoldedPart::ImageUrl(source.url.clone().unwrap_or_default()),
        "file" => FoldedPart::ImageFile(source.file_id.clone().unwrap_or_default()),
        _ => FoldedPart::ImageData {
            media_type: source.media_type.clone().unwrap_or_else(|| "image".to_string()),
            bytes: source.data.as_deref().map_or(0, str::len),
        },
    }
}

fn unsupported(raw: &Value) -> FoldedPart {
    FoldedPart::Unsupported {
        kind: raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("block")
            .to_string(),
        raw: raw.clone(),
    }
}

fn tool_result_text(content: Option<&ToolResultContent>, is_error: bool) -> Vec<String> {
    let mut texts: Vec<String> = match content {
        None => Vec::new(),
        Some(ToolResultContent::Text(text)) => vec![text.clone()],
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .map(|b| translate_block(b).counted_text())
            .collect(),
    };
    if is_error {
        match texts.first_mut() {
            Some(first) => first.insert_str(0, "ERROR: "),
            None => texts.push("ERROR: ".to_string()),
        }
    }
    texts
}

fn translate_tool(tool: &Tool) -> ToolSpec {
    let builtin = tool
        .tool_type
        .as_deref()
        .filter(|t| BUILTIN_TOOL_PREFIXES.iter().any(|p| t.starts_with(p)));

    match builtin {
        None => ToolSpec {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            input_schema: tool.input_schema.clone(),
        },
        Some(tool_type) => ToolSpec {
            name: tool.name.clone(),
            description: tool
                .description
                .clone()
                .unwrap_or_else(|| builtin_description(tool_type, tool)),
            input_schema: Some(builtin_schema(tool_type)),
        },
    }
}

fn builtin_description(tool_type: &str, tool: &Tool) -> String {
    let mut description = format!("Built-in {tool_type} tool");
    if let (Some(w), Some(h)) = (
        tool.extra.get("display_width_px"),
        tool.extra.get("display_height_px"),
    ) {
        description.push_str(&format!(" for a {w}x{h} display"));
    }
    description
}

fn builtin_schema(tool_type: &str) -> Value {
    let properties = if tool_type.starts_with("bash_") {
        json!({
            "command": {"type": "string"},
            "restart": {"type": "boolean"}
        })
    } else if tool_type.starts_with("computer_") {
        json!({
            "action": {"type": "string"},
            "coordinate": {"type": "array", "items": {"type": "integer"}},
            "text": {"type": "string"}
        })
    } else if tool_type.starts_with("text_editor_") {
        json!({
            "command": {"type": "string"},
            "path": {"type": "string"},
            "file_text": {"type": "string"},
            "old_str": {"type": "string"},
            "new_str": {"type": "string"},
            "insert_line": {"type": "integer"},
            "view_range": {"type": "array", "items": {"type": "integer"}}
        })
    } else if tool_type.starts_with("web_search_") {
        json!({"query": {"type": "string"}})
    } else {
        json!({"code": {"type": "string"}})
    };
    json!({"type": "object", "properties": properties})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Role;

    fn parse(body: Value) -> MessagesRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_system_prompt_becomes_tagged_message() {
        let req = parse(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 1024,
            "system": [{"type": "text", "text": "Be terse."}, {"type": "text", "text": "Be kind."}],
            "messages": [{"role": "user", "content": "Hello"}]
        }));

        let result = to_canonical(&req).unwrap();

        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, Role::Assistant);
        assert_eq!(result.messages[0].display_name, "system");
        assert_eq!(
            result.messages[0].content,
            Content::Text("[SYSTEM] Be terse.\nBe kind.".to_string())
        );
        assert_eq!(result.messages[1].content, Content::Text("Hello".to_string()));
        assert_eq!(result.options["max_tokens"], json!(1024));
    }

    #[test]
    fn test_tool_use_and_result_blocks() {
        let req = parse(json!({
            "model": "claude-sonnet-4",
            "messages": [
                {"role": "user", "content": "Weather?"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "Let me check."},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "timeout", "is_error": true}
                ]}
            ]
        }));

        let result = to_canonical(&req).unwrap();

        assert_eq!(
            result.messages[1].content,
            Content::Parts(vec![
                ContentPart::text("Let me check."),
                ContentPart::ToolCall {
                    call_id: "toolu_1".to_string(),
                    name: "get_weather".to_string(),
                    input: json!({"city": "Paris"}),
                }
            ])
        );
        assert_eq!(
            result.messages[2].content,
            Content::Parts(vec![ContentPart::ToolResult {
                call_id: "toolu_1".to_string(),
                content: vec!["ERROR: timeout".to_string()],
            }])
        );
    }

    #[test]
    fn test_non_text_blocks_are_labeled() {
        let req = parse(json!({
            "model": "claude-sonnet-4",
            "messages": [
                {"role": "user", "content": [
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "iVBORw0K"}},
                    {"type": "document", "source": {"type": "url", "url": "https://x/a.pdf"}, "title": "Q3 report"},
                    {"type": "container_upload", "file_id": "f1"}
                ]},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "pondering", "signature": "sig"},
                    {"type": "redacted_thinking", "data": "xx"},
                    {"type": "server_tool_use", "id": "srv_1", "name": "web_search", "input": {"query": "q"}}
                ]}
            ]
        }));

        let result = to_canonical(&req).unwrap();
        let user = result.messages[0].counted_text();
        let assistant = result.messages[1].counted_text();

        assert!(user.contains("[Image]: image/png, 8 bytes base64"));
        assert!(user.contains("[Document]: Q3 report"));
        assert!(user.contains("[Unsupported container_upload]"));
        assert!(assistant.contains("[Thinking]: pondering"));
        assert!(assistant.contains("[Redacted Thinking]"));
        assert!(assistant.contains("[Server Tool Use]: web_search"));
    }

    #[test]
    fn test_unknown_role_falls_back_to_user() {
        let req = parse(json!({
            "model": "m",
            "messages": [{"role": "narrator", "content": "Once upon a time"}]
        }));
        assert_eq!(to_canonical(&req).unwrap().messages[0].role, Role::User);
    }

    #[test]
    fn test_missing_messages_is_validation_error() {
        let err = to_canonical(&parse(json!({"model": "m"}))).unwrap_err();
        assert!(matches!(err, BridgeError::Validation { .. }));
    }

    #[test]
    fn test_builtin_tools_get_synthesized_schema() {
        let req = parse(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "ls"}],
            "tools": [
                {"type": "bash_20250124", "name": "bash"},
                {"type": "computer_20250124", "name": "computer", "display_width_px": 1024, "display_height_px": 768},
                {"name": "lookup", "description": "Find things", "input_schema": {"type": "object"}}
            ]
        }));

        let tools = to_canonical(&req).unwrap().tools;

        assert_eq!(tools.len(), 3);
        assert_eq!(tools[0].name, "bash");
        assert!(tools[0].input_schema.as_ref().unwrap()["properties"]["command"].is_object());
        assert!(tools[1].description.contains("1024x768"));
        assert_eq!(tools[2].description, "Find things");
        assert_eq!(tools[2].input_schema, Some(json!({"type": "object"})));
    }

    #[test]
    fn test_tool_choice_mapping() {
        let base = json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"name": "a", "input_schema": {}}, {"name": "b", "input_schema": {}}]
        });
        let with_choice = |choice: Value| {
            let mut body = base.clone();
            body["tool_choice"] = choice;
            to_canonical(&parse(body)).unwrap()
        };

        assert_eq!(with_choice(json!({"type": "auto"})).tool_mode, ToolMode::Auto);
        assert_eq!(with_choice(json!({"type": "none"})).tool_mode, ToolMode::Auto);
        assert_eq!(with_choice(json!({"type": "any"})).tool_mode, ToolMode::Required);

        let named = with_choice(json!({"type": "tool", "name": "a"}));
        assert_eq!(named.tool_mode, ToolMode::Required);
        assert_eq!(named.tools.len(), 1);
        assert_eq!(named.tools[0].name, "a");
    }
}
