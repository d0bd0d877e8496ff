use crate::error::{BridgeError, Result};
use crate::providers::ProviderPreset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Which host model serves generations. Inferred from `[provider]` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    /// Backend model used for the synthetic `default` id and unmapped requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,
    /// Requested model id -> backend model id.
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub claude_code: ClaudeCodeConfig,
    #[serde(default)]
    pub params: ParamsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Upstream,
    Echo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

/// Backend models for the families Claude Code asks for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaudeCodeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonnet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub haiku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsConfig {
    /// Passthrough options never forwarded upstream.
    #[serde(default = "default_drop_params")]
    pub drop: Vec<String>,
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            drop: default_drop_params(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            backend: None,
            default_model: None,
            provider: None,
            models: HashMap::new(),
            claude_code: ClaudeCodeConfig::default(),
            params: ParamsConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    4222
}

fn default_drop_params() -> Vec<String> {
    vec![
        "betas".to_string(),
        "anthropic_beta".to_string(),
        "anthropic-beta".to_string(),
        "context_management".to_string(),
        "reasoning_effort".to_string(),
    ]
}

impl BridgeConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file, falling back to built-in defaults.
    /// Priority: CLI arg > CWD > platform config dir > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using built-in defaults (echo backend)");
        Ok(Self::default())
    }

    pub fn effective_backend(&self) -> Backend {
        match (self.backend, &self.provider) {
            (Some(backend), _) => backend,
            (None, Some(_)) => Backend::Upstream,
            (None, None) => Backend::Echo,
        }
    }

    fn provider(&self) -> Result<&ProviderConfig> {
        self.provider
            .as_ref()
            .ok_or_else(|| BridgeError::config("The upstream backend needs a [provider] section"))
    }

    /// Resolve the effective base URL (config override or provider preset default)
    pub fn effective_base_url(&self) -> Result<String> {
        let provider = self.provider()?;
        if let Some(ref url) = provider.base_url {
            return Ok(url.clone());
        }

        let preset = ProviderPreset::from_name(&provider.name).ok_or_else(|| {
            BridgeError::config(format!(
                "Unknown provider '{}' and no base_url configured. Known providers: {}",
                provider.name,
                ProviderPreset::names().join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    /// Resolve the API key from the configured (or preset) environment variable.
    /// `None` when the provider takes no key.
    pub fn resolve_api_key(&self) -> Result<Option<String>> {
        let provider = self.provider()?;
        let env = provider.api_key_env.clone().or_else(|| {
            ProviderPreset::from_name(&provider.name)
                .and_then(|p| p.default_api_key_env)
                .map(str::to_string)
        });

        match env {
            None => Ok(None),
            Some(env) => std::env::var(&env).map(Some).map_err(|_| {
                BridgeError::config(format!(
                    "Environment variable '{env}' not set. Set it with your provider API key."
                ))
            }),
        }
    }

    /// Backend model for the synthetic `default` id.
    pub fn effective_default_model(&self) -> Option<String> {
        self.default_model.clone().or_else(|| {
            self.provider
                .as_ref()
                .and_then(|p| ProviderPreset::from_name(&p.name))
                .map(|p| p.default_model.to_string())
        })
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("chat-bridge.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("chat-bridge")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("chat-bridge").join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join("chat-bridge").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = home_dir() {
        paths.push(home.join(".chat-bridge.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
