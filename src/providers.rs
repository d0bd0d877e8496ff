//! Built-in presets for OpenAI-compatible upstream providers.
//!
//! A preset fills in the base URL, the environment variable holding the API key and
//! a sensible default model, so a config only needs `[provider] name = "..."`.

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    /// `None` for local servers that take no key.
    pub default_api_key_env: Option<&'static str>,
    pub default_model: &'static str,
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        default_api_key_env: Some("OPENAI_API_KEY"),
        default_model: "gpt-4o-mini",
    },
    ProviderPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        default_api_key_env: Some("OPENROUTER_API_KEY"),
        default_model: "openai/gpt-4o-mini",
    },
    ProviderPreset {
        name: "fireworks",
        base_url: "https://api.fireworks.ai/inference/v1",
        default_api_key_env: Some("FIREWORKS_API_KEY"),
        default_model: "accounts/fireworks/models/llama-v3p1-70b-instruct",
    },
    ProviderPreset {
        name: "grok",
        base_url: "https://api.x.ai/v1",
        default_api_key_env: Some("XAI_API_KEY"),
        default_model: "grok-3-mini",
    },
    ProviderPreset {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        default_api_key_env: Some("TOGETHER_API_KEY"),
        default_model: "meta-llama/Llama-3.3-70B-Instruct-Turbo",
    },
    ProviderPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        default_api_key_env: Some("GROQ_API_KEY"),
        default_model: "llama-3.3-70b-versatile",
    },
    ProviderPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        default_api_key_env: Some("DEEPSEEK_API_KEY"),
        default_model: "deepseek-chat",
    },
    ProviderPreset {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        default_api_key_env: None,
        default_model: "llama3.2",
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        let name = name.to_lowercase();
        PRESETS.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }

    #[must_use]
    pub fn names() -> Vec<&'static str> {
        PRESETS.iter().map(|p| p.name).collect()
    }
}
