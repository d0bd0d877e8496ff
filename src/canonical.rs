//! Dialect-neutral chat representation shared by every normalizer and synthesizer.
//!
//! The model is deliberately small: two roles, three content parts. Anything a dialect
//! can say that does not fit (images, audio, documents, reasoning blocks, system prompts)
//! is folded into labeled text so that its origin stays recognizable downstream.

use serde::Serialize;
use serde_json::{Map, Value};

/// Smallest output budget forwarded to the host model.
///
/// Clients sometimes probe with `max_tokens: 1`, which most backends cannot serve.
pub const MIN_OUTPUT_TOKENS: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        call_id: String,
        content: Vec<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Text used by the token accountant for this part.
    pub fn counted_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::ToolCall { name, input, .. } => format!("{name} {input}"),
            Self::ToolResult { content, .. } => content.join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// A lone text part collapses to plain text; no parts collapse to empty text.
    pub fn from_parts(parts: Vec<ContentPart>) -> Self {
        match parts.as_slice() {
            [] => Self::Text(String::new()),
            [ContentPart::Text { text }] => Self::Text(text.clone()),
            _ => Self::Parts(parts),
        }
    }

    pub fn parts(&self) -> Vec<ContentPart> {
        match self {
            Self::Text(text) => vec![ContentPart::text(text.clone())],
            Self::Parts(parts) => parts.clone(),
        }
    }

    /// Concatenated text of every text part, ignoring tool traffic.
    pub fn plain_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub display_name: String,
    pub content: Content,
}

impl Message {
    pub fn user(content: Content) -> Self {
        Self {
            role: Role::User,
            display_name: String::new(),
            content,
        }
    }

    pub fn assistant(content: Content) -> Self {
        Self {
            role: Role::Assistant,
            display_name: String::new(),
            content,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// A system or developer instruction, carried as a tagged assistant message.
    pub fn instruction(tag: InstructionTag, text: &str) -> Self {
        Self {
            role: Role::Assistant,
            display_name: tag.display_name().to_string(),
            content: Content::Text(format!("{} {text}", tag.label())),
        }
    }

    /// The text of a system or developer instruction with its tag removed.
    pub fn instruction_text(&self) -> Option<String> {
        let tag = match (self.role, self.display_name.as_str()) {
            (Role::Assistant, "system") => InstructionTag::System,
            (Role::Assistant, "developer") => InstructionTag::Developer,
            _ => return None,
        };
        let text = self.content.plain_text();
        Some(match text.strip_prefix(tag.label()) {
            Some(rest) => rest.trim_start().to_string(),
            None => text,
        })
    }

    pub fn counted_text(&self) -> String {
        match &self.content {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => parts
                .iter()
                .map(ContentPart::counted_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Roles with no canonical counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionTag {
    System,
    Developer,
}

impl InstructionTag {
    pub fn label(self) -> &'static str {
        match self {
            Self::System => "[SYSTEM]",
            Self::Developer => "[DEVELOPER]",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Developer => "developer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ToolMode {
    #[default]
    Auto,
    Required,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Request {
    /// Backend model id, after alias resolution.
    pub model: String,
    pub messages: Vec<Message>,
    pub tool_mode: ToolMode,
    pub tools: Vec<ToolSpec>,
    pub options: Map<String, Value>,
}

impl Request {
    /// Keep only the named tool. Used when a client pins `tool_choice` to one function.
    pub fn narrow_tools_to(&mut self, name: &str) {
        if self.tools.iter().any(|t| t.name == name) {
            self.tools.retain(|t| t.name == name);
        }
    }
}

/// Copy a dialect field into the passthrough options, widening degenerate output budgets.
pub fn pass_option(options: &mut Map<String, Value>, key: &str, value: &Value) {
    let value = match (key, value.as_u64()) {
        ("max_tokens" | "max_completion_tokens" | "max_output_tokens", Some(n)) if n <= 1 => {
            Value::from(MIN_OUTPUT_TOKENS)
        }
        _ => value.clone(),
    };
    options.insert(key.to_string(), value);
}

/// One increment of the host model's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPart {
    Text {
        value: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        input: Value,
    },
}

impl StreamPart {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    pub fn tool_call(call_id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolCall {
            call_id: call_id.into(),
            name: name.into(),
            input,
        }
    }

    /// Payload whose token count is charged as output.
    ///
    /// Tool calls are charged for their JSON encoding so that streaming and
    /// aggregate responses report the same totals.
    pub fn counted_text(&self) -> String {
        match self {
            Self::Text { value } => value.clone(),
            Self::ToolCall { .. } => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Content a dialect can express but the canonical model cannot.
#[derive(Debug, Clone, PartialEq)]
pub enum FoldedPart {
    ImageUrl(String),
    ImageData { media_type: String, bytes: usize },
    ImageFile(String),
    File(String),
    Audio { format: String, bytes: usize },
    Document(String),
    Thinking(String),
    RedactedThinking,
    Reasoning(String),
    Refusal(String),
    ServerToolUse { name: String, input: Value },
    ServerToolResult(String),
    Unsupported { kind: String, raw: Value },
}

impl FoldedPart {
    pub fn render(&self) -> String {
        match self {
            Self::ImageUrl(url) => format!("[Image URL]: {url}"),
            Self::ImageData { media_type, bytes } => {
                format!("[Image]: {media_type}, {bytes} bytes base64")
            }
            Self::ImageFile(id) => format!("[Image File]: {id}"),
            Self::File(name) => format!("[File]: {name}"),
            Self::Audio { format, bytes } => format!("[Audio]: {format}, {bytes} bytes base64"),
            Self::Document(title) => format!("[Document]: {title}"),
            Self::Thinking(text) => format!("[Thinking]: {text}"),
            Self::RedactedThinking => "[Redacted Thinking]".to_string(),
            Self::Reasoning(summary) => format!("[Reasoning]: {summary}"),
            Self::Refusal(text) => format!("[Refusal]: {text}"),
            Self::ServerToolUse { name, input } => format!("[Server Tool Use]: {name} {input}"),
            Self::ServerToolResult(kind) => format!("[Server Tool Result]: {kind}"),
            Self::Unsupported { kind, raw } => format!("[Unsupported {kind}]: {raw}"),
        }
    }

    pub fn into_part(self) -> ContentPart {
        ContentPart::text(self.render())
    }
}
