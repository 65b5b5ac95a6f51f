//! Configuration schema: the per-agent endpoint description
//! ([`ProviderConfig`]) and the process settings ([`Settings`]) that carry
//! provider credentials and the retry policy.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DispatchError;

// ─────────────────────────────────────────────
// Provider kind
// ─────────────────────────────────────────────

/// Closed set of upstream API families the dispatcher knows how to talk to.
///
/// Serialized as the endpoint-type string used in agent configs
/// (`"openai"`, `"anthropic"`, `"ollama"`, ...). Local completion servers
/// all share the [`ProviderKind::Local`] variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderKind {
    OpenAi,
    Azure,
    Anthropic,
    Xai,
    Groq,
    Together,
    Bedrock,
    DeepSeek,
    Local(LocalBackend),
}

/// Self-hosted completion servers reachable through the local path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LocalBackend {
    Vllm,
    Ollama,
    LmStudio,
    LlamaCpp,
    KoboldCpp,
    WebUi,
}

impl LocalBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalBackend::Vllm => "vllm",
            LocalBackend::Ollama => "ollama",
            LocalBackend::LmStudio => "lmstudio",
            LocalBackend::LlamaCpp => "llamacpp",
            LocalBackend::KoboldCpp => "koboldcpp",
            LocalBackend::WebUi => "webui",
        }
    }
}

impl ProviderKind {
    /// Registry key: one per backend implementation.
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Azure => "azure",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Xai => "xai",
            ProviderKind::Groq => "groq",
            ProviderKind::Together => "together",
            ProviderKind::Bedrock => "bedrock",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Local(_) => "local",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Local(backend) => f.write_str(backend.as_str()),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_lowercase().as_str() {
            "openai" => ProviderKind::OpenAi,
            "azure" => ProviderKind::Azure,
            "anthropic" => ProviderKind::Anthropic,
            "xai" => ProviderKind::Xai,
            "groq" => ProviderKind::Groq,
            "together" => ProviderKind::Together,
            "bedrock" => ProviderKind::Bedrock,
            "deepseek" => ProviderKind::DeepSeek,
            "local" | "vllm" => ProviderKind::Local(LocalBackend::Vllm),
            "ollama" => ProviderKind::Local(LocalBackend::Ollama),
            "lmstudio" => ProviderKind::Local(LocalBackend::LmStudio),
            "llamacpp" => ProviderKind::Local(LocalBackend::LlamaCpp),
            "koboldcpp" => ProviderKind::Local(LocalBackend::KoboldCpp),
            "webui" => ProviderKind::Local(LocalBackend::WebUi),
            other => {
                return Err(DispatchError::Config(format!(
                    "unknown model endpoint type '{}'",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

impl TryFrom<String> for ProviderKind {
    type Error = DispatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProviderKind> for String {
    fn from(kind: ProviderKind) -> Self {
        kind.to_string()
    }
}

/// Who owns the credential used for an endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCategory {
    /// First-party key from [`ModelSettings`].
    #[default]
    Base,
    /// Bring-your-own-key: resolved per organization at call time.
    Byok,
}

// ─────────────────────────────────────────────
// Per-agent endpoint config
// ─────────────────────────────────────────────

/// Immutable description of one upstream endpoint and its sampling setup.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Model identifier sent upstream (e.g. `"gpt-4o"`).
    pub model: String,
    pub model_endpoint_type: ProviderKind,
    /// Endpoint base URL. `None` (or empty) means the provider default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_endpoint: Option<String>,
    /// Name used to look up BYOK override keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    pub provider_category: ProviderCategory,
    /// Prompt wrapper for local completion servers. Unset or `chatml`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_wrapper: Option<String>,
    /// Deployment handle, e.g. `"vllm/llama-3"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    /// Maximum prompt + tool-definition tokens.
    pub context_window: usize,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Carry model reasoning inside a synthetic `inner_thoughts` tool argument.
    pub put_inner_thoughts_in_kwargs: bool,
    /// Request extended thinking (Anthropic).
    pub enable_reasoner: bool,
    pub max_reasoning_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            model_endpoint_type: ProviderKind::OpenAi,
            model_endpoint: None,
            provider_name: None,
            provider_category: ProviderCategory::Base,
            model_wrapper: None,
            handle: None,
            context_window: 8192,
            temperature: 0.7,
            max_tokens: Some(4096),
            frequency_penalty: None,
            presence_penalty: None,
            put_inner_thoughts_in_kwargs: false,
            enable_reasoner: false,
            max_reasoning_tokens: 1024,
        }
    }
}

impl ProviderConfig {
    /// Shortcut for a config pointing at `kind`/`model` with defaults elsewhere.
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            model_endpoint_type: kind,
            ..Default::default()
        }
    }

    /// Builder-style endpoint override.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.model_endpoint = Some(endpoint.into());
        self
    }

    /// Configured endpoint, treating an empty string as unset.
    pub fn endpoint(&self) -> Option<&str> {
        self.model_endpoint.as_deref().filter(|e| !e.trim().is_empty())
    }

    /// Configured endpoint or `default`, without a trailing slash.
    pub fn endpoint_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.endpoint().unwrap_or(default).trim_end_matches('/')
    }

    /// Name used for BYOK lookups (falls back to the endpoint type).
    pub fn provider_label(&self) -> String {
        self.provider_name
            .clone()
            .unwrap_or_else(|| self.model_endpoint_type.name().to_string())
    }
}

// ─────────────────────────────────────────────
// Process settings
// ─────────────────────────────────────────────

/// Root settings: loaded from `~/.llmgate/settings.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub model: ModelSettings,
    pub retry: RetrySettings,
}

/// How local completion servers expect the key to be presented.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalAuthType {
    #[default]
    BearerToken,
    ApiKey,
}

impl FromStr for LocalAuthType {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bearer_token" => Ok(LocalAuthType::BearerToken),
            "api_key" => Ok(LocalAuthType::ApiKey),
            other => Err(DispatchError::Config(format!("unknown auth type '{}'", other))),
        }
    }
}

/// Provider credentials and endpoint facts, passed explicitly to the dispatcher.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xai_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groq_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub together_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deepseek_api_key: Option<String>,
    /// Bedrock API key (bearer token).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws_bearer_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws_region: Option<String>,
    pub openllm_auth_type: LocalAuthType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openllm_api_key: Option<String>,
    /// Endpoints that proxy upstream models and may not support forced tool choice.
    pub proxy_endpoints: Vec<String>,
}

/// Returns the value only when it is present and non-blank.
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Exponential backoff policy for upstream calls.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 20,
            initial_delay_ms: 1000,
            exponential_base: 2.0,
            jitter: true,
            retryable_status_codes: vec![429],
        }
    }
}
