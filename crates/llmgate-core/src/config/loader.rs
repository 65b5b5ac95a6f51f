//! Settings loader: reads `~/.llmgate/settings.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Settings::default()`)
//! 2. JSON file at `~/.llmgate/settings.json`
//! 3. Provider env vars (`OPENAI_API_KEY`, `AZURE_BASE_URL`, ...)
//! 4. `LLMGATE_RETRY__<FIELD>` env vars for the retry policy

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::{ProviderConfig, Settings};
use crate::error::DispatchError;

/// Default settings file path.
pub fn get_settings_path() -> PathBuf {
    crate::utils::get_data_path().join("settings.json")
}

/// Load settings from the default path (or `path`) + process env vars.
///
/// Falls back to defaults if the file doesn't exist or can't be parsed.
pub fn load_settings(path: Option<&Path>) -> Settings {
    let settings_path = path.map(PathBuf::from).unwrap_or_else(get_settings_path);
    let settings = load_settings_from_path(&settings_path);
    apply_env_overrides(settings, |key| std::env::var(key).ok())
}

fn load_settings_from_path(path: &Path) -> Settings {
    if !path.exists() {
        info!("No settings file found at {}, using defaults", path.display());
        return Settings::default();
    }

    debug!("Loading settings from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read settings file {}: {}", path.display(), e);
            return Settings::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Failed to parse settings JSON: {}", e);
            Settings::default()
        }
    }
}

/// Load one agent's endpoint config. Unlike settings, a bad file is an error.
pub fn load_provider_config(path: &Path) -> Result<ProviderConfig, DispatchError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| DispatchError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| DispatchError::Config(format!("invalid config {}: {}", path.display(), e)))
}

/// Apply environment overrides using `lookup` to read variables.
///
/// Supported overrides:
/// - `OPENAI_API_KEY`, `XAI_API_KEY`, `ANTHROPIC_API_KEY`, `GROQ_API_KEY`,
///   `TOGETHER_API_KEY`, `DEEPSEEK_API_KEY`
/// - `AZURE_API_KEY`, `AZURE_BASE_URL`, `AZURE_API_VERSION`
/// - `AWS_BEARER_TOKEN_BEDROCK`, `AWS_REGION`
/// - `OPENLLM_AUTH_TYPE`, `OPENLLM_API_KEY`
/// - `LLMGATE_RETRY__MAX_RETRIES`, `LLMGATE_RETRY__INITIAL_DELAY_MS`,
///   `LLMGATE_RETRY__EXPONENTIAL_BASE`, `LLMGATE_RETRY__JITTER`
pub fn apply_env_overrides<F>(mut settings: Settings, lookup: F) -> Settings
where
    F: Fn(&str) -> Option<String>,
{
    let model = &mut settings.model;
    let string_overrides: [(&str, &mut Option<String>); 12] = [
        ("OPENAI_API_KEY", &mut model.openai_api_key),
        ("XAI_API_KEY", &mut model.xai_api_key),
        ("AZURE_API_KEY", &mut model.azure_api_key),
        ("AZURE_BASE_URL", &mut model.azure_base_url),
        ("AZURE_API_VERSION", &mut model.azure_api_version),
        ("ANTHROPIC_API_KEY", &mut model.anthropic_api_key),
        ("GROQ_API_KEY", &mut model.groq_api_key),
        ("TOGETHER_API_KEY", &mut model.together_api_key),
        ("DEEPSEEK_API_KEY", &mut model.deepseek_api_key),
        ("AWS_BEARER_TOKEN_BEDROCK", &mut model.aws_bearer_token),
        ("AWS_REGION", &mut model.aws_region),
        ("OPENLLM_API_KEY", &mut model.openllm_api_key),
    ];
    for (var, field) in string_overrides {
        if let Some(val) = lookup(var).filter(|v| !v.is_empty()) {
            *field = Some(val);
        }
    }

    if let Some(val) = lookup("OPENLLM_AUTH_TYPE") {
        match val.parse() {
            Ok(auth) => model.openllm_auth_type = auth,
            Err(e) => warn!("Ignoring OPENLLM_AUTH_TYPE: {}", e),
        }
    }

    let retry = &mut settings.retry;
    if let Some(n) = lookup("LLMGATE_RETRY__MAX_RETRIES").and_then(|v| v.parse().ok()) {
        retry.max_retries = n;
    }
    if let Some(n) = lookup("LLMGATE_RETRY__INITIAL_DELAY_MS").and_then(|v| v.parse().ok()) {
        retry.initial_delay_ms = n;
    }
    if let Some(b) = lookup("LLMGATE_RETRY__EXPONENTIAL_BASE").and_then(|v| v.parse().ok()) {
        retry.exponential_base = b;
    }
    if let Some(j) = lookup("LLMGATE_RETRY__JITTER").and_then(|v| v.parse().ok()) {
        retry.jitter = j;
    }

    settings
}
