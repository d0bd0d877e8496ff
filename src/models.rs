//! Model selection and model-object projections.
//!
//! Clients name models in their own vocabulary. The selector turns that into a backend
//! model id: the synthetic `default` id, the `[models]` alias table, and for the
//! Claude Code route the `[claude_code]` family mapping.

use crate::config::{BridgeConfig, ClaudeCodeConfig};
use crate::host::HostModelInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Model id meaning "whichever backend model is configured as default".
pub const DEFAULT_MODEL_ID: &str = "default";

#[derive(Debug, Clone)]
pub struct ModelSelector {
    default_model: String,
    aliases: HashMap<String, String>,
    claude_code: ClaudeCodeConfig,
}

impl ModelSelector {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
            aliases: HashMap::new(),
            claude_code: ClaudeCodeConfig::default(),
        }
    }

    pub fn from_config(config: &BridgeConfig, default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
            aliases: config.models.clone(),
            claude_code: config.claude_code.clone(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Backend id for a model named by a Chat, Responses or Messages client.
    pub fn resolve(&self, requested: &str) -> String {
        if requested == DEFAULT_MODEL_ID {
            return self.default_model.clone();
        }
        self.aliases
            .get(requested)
            .cloned()
            .unwrap_or_else(|| requested.to_string())
    }

    /// Backend id for a model named by Claude Code.
    ///
    /// Claude Code sends dated Claude ids (`claude-sonnet-4-20250514`); anything that
    /// is not an explicit alias is mapped by family, then to `fallback`, then to the
    /// default model.
    pub fn resolve_claude_code(&self, requested: &str) -> String {
        if requested == DEFAULT_MODEL_ID {
            return self.default_model.clone();
        }
        if let Some(alias) = self.aliases.get(requested) {
            return alias.clone();
        }

        let lower = requested.to_lowercase();
        let family = if lower.contains("opus") {
            self.claude_code.opus.as_ref()
        } else if lower.contains("haiku") {
            self.claude_code.haiku.as_ref()
        } else if lower.contains("sonnet") {
            self.claude_code.sonnet.as_ref()
        } else {
            None
        };

        family
            .or(self.claude_code.fallback.as_ref())
            .cloned()
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// Host models plus the synthetic default entry, which is listed first.
    pub fn catalog(&self, host_models: Vec<HostModelInfo>) -> Vec<HostModelInfo> {
        let mut models = Vec::with_capacity(host_models.len() + 1);
        models.push(HostModelInfo {
            id: DEFAULT_MODEL_ID.to_string(),
            display_name: format!("Default ({})", self.default_model),
            vendor: "chat-bridge".to_string(),
        });
        models.extend(host_models);
        models
    }
}

/// An OpenAI-compatible model object, as listed by `/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderModel {
    pub id: String,
    #[serde(default = "model_object")]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub owned_by: Option<String>,
}

fn model_object() -> String {
    "model".to_string()
}

/// The response from an OpenAI-compatible `/models` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderModelsResponse {
    #[serde(default = "list_object")]
    pub object: String,
    pub data: Vec<ProviderModel>,
}

fn list_object() -> String {
    "list".to_string()
}

/// An Anthropic model object, as served from `/v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicModel {
    #[serde(rename = "type")]
    pub model_type: String,
    pub id: String,
    pub display_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicModelsResponse {
    pub data: Vec<AnthropicModel>,
    pub has_more: bool,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
}

pub fn openai_model(info: &HostModelInfo) -> ProviderModel {
    ProviderModel {
        id: info.id.clone(),
        object: model_object(),
        created: 0,
        owned_by: Some(info.vendor.clone()),
    }
}

pub fn anthropic_model(info: &HostModelInfo) -> AnthropicModel {
    AnthropicModel {
        model_type: "model".to_string(),
        id: info.id.clone(),
        display_name: info.display_name.clone(),
        created_at: "1970-01-01T00:00:00Z".to_string(),
    }
}

pub fn openai_model_list(models: &[HostModelInfo]) -> ProviderModelsResponse {
    ProviderModelsResponse {
        object: list_object(),
        data: models.iter().map(openai_model).collect(),
    }
}

pub fn anthropic_model_list(models: &[HostModelInfo]) -> AnthropicModelsResponse {
    AnthropicModelsResponse {
        data: models.iter().map(anthropic_model).collect(),
        has_more: false,
        first_id: models.first().map(|m| m.id.clone()),
        last_id: models.last().map(|m| m.id.clone()),
    }
}
