//! Provider registry: static specs for the nine supported upstream families.
//!
//! Each `ProviderSpec` describes what a provider can do and where it lives:
//! default API base, which settings field holds its key, and the feature
//! gates the dispatcher enforces before any network call.

use llmgate_core::config::schema::{non_empty, ModelSettings, ProviderKind};

// ─────────────────────────────────────────────
// ProviderSpec: static metadata for one provider
// ─────────────────────────────────────────────

/// Static specification describing one LLM provider family.
#[derive(Clone, Debug)]
pub struct ProviderSpec {
    /// Internal name, identical to [`ProviderKind::name`] (e.g. `"openai"`).
    pub name: &'static str,
    /// Human-readable name for logs. E.g. `"OpenAI"`.
    pub display_name: &'static str,
    /// Settings field holding the key, as reported in `MissingCredential`.
    pub key_field: Option<&'static str>,
    /// Environment variable the loader reads the key from.
    pub env_key: Option<&'static str>,
    /// Default API base URL. `None` when it must come from configuration.
    pub default_api_base: Option<&'static str>,
    /// Whether token streaming is implemented for this provider.
    pub supports_streaming: bool,
    /// Whether the provider only works in tool-calling mode.
    pub requires_tool_calling: bool,
    /// Whether successful calls are recorded through the telemetry sink.
    pub records_traces: bool,
}

impl ProviderSpec {
    /// Whether `endpoint` (or the absence of one) is this provider's canonical API base.
    pub fn is_default_endpoint(&self, endpoint: Option<&str>) -> bool {
        match (endpoint, self.default_api_base) {
            (None, _) => true,
            (Some(ep), Some(default)) => {
                ep.trim_end_matches('/') == default.trim_end_matches('/')
            }
            (Some(_), None) => false,
        }
    }
}

// ─────────────────────────────────────────────
// All providers
// ─────────────────────────────────────────────

/// Complete list of supported provider specifications.
pub static PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "openai",
        display_name: "OpenAI",
        key_field: Some("openai_api_key"),
        env_key: Some("OPENAI_API_KEY"),
        default_api_base: Some("https://api.openai.com/v1"),
        supports_streaming: true,
        requires_tool_calling: false,
        records_traces: true,
    },
    ProviderSpec {
        name: "azure",
        display_name: "Azure OpenAI",
        key_field: Some("azure_api_key"),
        env_key: Some("AZURE_API_KEY"),
        default_api_base: None,
        supports_streaming: false,
        requires_tool_calling: false,
        records_traces: false,
    },
    ProviderSpec {
        name: "anthropic",
        display_name: "Anthropic",
        key_field: Some("anthropic_api_key"),
        env_key: Some("ANTHROPIC_API_KEY"),
        default_api_base: Some("https://api.anthropic.com/v1"),
        supports_streaming: true,
        requires_tool_calling: true,
        records_traces: true,
    },
    ProviderSpec {
        name: "xai",
        display_name: "xAI",
        key_field: Some("xai_api_key"),
        env_key: Some("XAI_API_KEY"),
        default_api_base: Some("https://api.x.ai/v1"),
        supports_streaming: true,
        requires_tool_calling: false,
        records_traces: false,
    },
    ProviderSpec {
        name: "groq",
        display_name: "Groq",
        key_field: Some("groq_api_key"),
        env_key: Some("GROQ_API_KEY"),
        default_api_base: Some("https://api.groq.com/openai/v1"),
        supports_streaming: false,
        requires_tool_calling: false,
        records_traces: false,
    },
    ProviderSpec {
        name: "together",
        display_name: "Together AI",
        key_field: Some("together_api_key"),
        env_key: Some("TOGETHER_API_KEY"),
        default_api_base: Some("https://api.together.xyz/v1"),
        supports_streaming: false,
        requires_tool_calling: false,
        records_traces: false,
    },
    ProviderSpec {
        name: "bedrock",
        display_name: "AWS Bedrock",
        key_field: Some("aws_bearer_token"),
        env_key: Some("AWS_BEARER_TOKEN_BEDROCK"),
        default_api_base: None,
        supports_streaming: false,
        requires_tool_calling: true,
        records_traces: false,
    },
    ProviderSpec {
        name: "deepseek",
        display_name: "DeepSeek",
        key_field: Some("deepseek_api_key"),
        env_key: Some("DEEPSEEK_API_KEY"),
        default_api_base: Some("https://api.deepseek.com/v1"),
        supports_streaming: true,
        requires_tool_calling: false,
        records_traces: false,
    },
    ProviderSpec {
        name: "local",
        display_name: "Local model",
        key_field: None,
        env_key: Some("OPENLLM_API_KEY"),
        default_api_base: None,
        supports_streaming: false,
        requires_tool_calling: false,
        records_traces: false,
    },
];

// ─────────────────────────────────────────────
// Lookup
// ─────────────────────────────────────────────

/// Find a provider spec by exact name.
pub fn find_by_name(name: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|spec| spec.name == name)
}

/// Spec for a provider kind. Every kind has exactly one entry.
pub fn spec_for(kind: ProviderKind) -> &'static ProviderSpec {
    find_by_name(kind.name()).unwrap_or(&PROVIDERS[PROVIDERS.len() - 1])
}

/// Whether `settings` holds a first-party credential for `spec`.
pub fn is_configured(spec: &ProviderSpec, settings: &ModelSettings) -> bool {
    match spec.name {
        "openai" => non_empty(&settings.openai_api_key).is_some(),
        "azure" => {
            non_empty(&settings.azure_api_key).is_some()
                && non_empty(&settings.azure_base_url).is_some()
                && non_empty(&settings.azure_api_version).is_some()
        }
        "anthropic" => non_empty(&settings.anthropic_api_key).is_some(),
        "xai" => non_empty(&settings.xai_api_key).is_some(),
        "groq" => non_empty(&settings.groq_api_key).is_some(),
        "together" => non_empty(&settings.together_api_key).is_some(),
        "bedrock" => {
            non_empty(&settings.aws_bearer_token).is_some()
                && non_empty(&settings.aws_region).is_some()
        }
        "deepseek" => non_empty(&settings.deepseek_api_key).is_some(),
        // Local servers usually run without auth.
        _ => true,
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_core::config::schema::LocalBackend;

    #[test]
    fn test_every_kind_has_a_spec() {
        let kinds = [
            ProviderKind::OpenAi,
            ProviderKind::Azure,
            ProviderKind::Anthropic,
            ProviderKind::Xai,
            ProviderKind::Groq,
            ProviderKind::Together,
            ProviderKind::Bedrock,
            ProviderKind::DeepSeek,
            ProviderKind::Local(LocalBackend::Ollama),
        ];
        for kind in kinds {
            assert_eq!(spec_for(kind).name, kind.name());
        }
    }

    #[test]
    fn test_find_by_name() {
        let spec = find_by_name("deepseek").unwrap();
        assert_eq!(spec.display_name, "DeepSeek");
        assert_eq!(spec.env_key, Some("DEEPSEEK_API_KEY"));
        assert!(find_by_name("cohere").is_none());
    }

    #[test]
    fn test_streaming_gates() {
        let streaming: Vec<&str> = PROVIDERS
            .iter()
            .filter(|s| s.supports_streaming)
            .map(|s| s.name)
            .collect();
        assert_eq!(streaming, vec!["openai", "anthropic", "xai", "deepseek"]);
    }

    #[test]
    fn test_tool_calling_mandatory_for_anthropic_family() {
        assert!(find_by_name("anthropic").unwrap().requires_tool_calling);
        assert!(find_by_name("bedrock").unwrap().requires_tool_calling);
        assert!(!find_by_name("openai").unwrap().requires_tool_calling);
    }

    #[test]
    fn test_is_default_endpoint() {
        let spec = find_by_name("openai").unwrap();
        assert!(spec.is_default_endpoint(None));
        assert!(spec.is_default_endpoint(Some("https://api.openai.com/v1/")));
        assert!(!spec.is_default_endpoint(Some("http://localhost:4000/v1")));

        let azure = find_by_name("azure").unwrap();
        assert!(!azure.is_default_endpoint(Some("https://x.openai.azure.com")));
    }

    #[test]
    fn test_is_configured() {
        let mut settings = ModelSettings::default();
        let azure = find_by_name("azure").unwrap();
        settings.azure_api_key = Some("k".into());
        assert!(!is_configured(azure, &settings));
        settings.azure_base_url = Some("https://x.openai.azure.com".into());
        settings.azure_api_version = Some("2024-06-01".into());
        assert!(is_configured(azure, &settings));
        assert!(is_configured(find_by_name("local").unwrap(), &settings));
    }

    #[test]
    fn test_all_providers_have_unique_names() {
        let names: Vec<&str> = PROVIDERS.iter().map(|s| s.name).collect();
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(names.len(), unique.len(), "Duplicate provider names found");
        assert_eq!(PROVIDERS.len(), 9);
    }
}
