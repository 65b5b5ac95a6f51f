//! Per-provider request builders and response normalizers.
//!
//! Each backend turns a [`CallPlan`] into a [`WireRequest`] and maps the
//! provider's reply back onto [`CanonicalResponse`]. The dispatcher owns
//! everything around that: gating, credentials, retries, transport and
//! telemetry.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use llmgate_core::config::schema::{non_empty, ModelSettings, ProviderConfig};
use llmgate_core::types::{CanonicalResponse, Message, ToolChoice, ToolDefinition};
use llmgate_core::DispatchError;

use crate::registry::ProviderSpec;

pub mod anthropic;
pub mod azure;
pub mod chatml;
pub mod deepseek;
pub mod groq;
pub mod local;
pub mod openai;

/// Key sent to endpoints that accept any bearer value.
pub const PLACEHOLDER_API_KEY: &str = "placeholder";

// ─────────────────────────────────────────────
// Call plan
// ─────────────────────────────────────────────

/// Everything a backend needs to build one request.
///
/// `config` is a call-scoped copy: backends may flip flags on it in
/// [`ProviderBackend::prepare`] without touching the caller's config.
/// `messages` stays borrowed unless a backend has to rewrite the list.
#[derive(Clone, Debug)]
pub struct CallPlan<'a> {
    pub config: ProviderConfig,
    pub settings: &'a ModelSettings,
    pub messages: Cow<'a, [Message]>,
    pub tools: &'a [ToolDefinition],
    /// Resolved tool-choice policy. `None` when no tools are sent.
    pub tool_choice: Option<ToolChoice>,
    pub force_tool_call: Option<String>,
    pub stream: bool,
    pub use_tool_naming: bool,
    pub put_inner_thoughts_first: bool,
    pub user_id: Option<String>,
}

impl CallPlan<'_> {
    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn inner_thoughts_in_kwargs(&self) -> bool {
        self.config.put_inner_thoughts_in_kwargs
    }
}

/// How the dispatcher should authenticate the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    /// A first-party key from settings.
    ApiKey(String),
    /// Endpoint accepts any key; send [`PLACEHOLDER_API_KEY`].
    Placeholder,
    /// Ask the credential resolver for an override key.
    ResolveOverride,
    /// Send no key at all.
    Anonymous,
}

/// A fully built HTTP request.
#[derive(Clone, Debug)]
pub struct WireRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl WireRequest {
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Add `Authorization: Bearer <key>`.
    pub fn bearer(self, api_key: Option<&str>) -> Result<Self, DispatchError> {
        match api_key {
            Some(key) => self.header("authorization", &format!("Bearer {}", key)),
            None => Ok(self),
        }
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Result<Self, DispatchError> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| DispatchError::Config(format!("invalid value for header {}: {}", name, e)))?;
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(self)
    }
}

/// Wire format of a provider's server-sent events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamProtocol {
    /// `chat.completion.chunk` frames terminated by `[DONE]`.
    OpenAi { expect_reasoning_content: bool },
    /// Anthropic message/content-block events.
    Anthropic,
}

// ─────────────────────────────────────────────
// Backend trait
// ─────────────────────────────────────────────

/// One upstream API family.
pub trait ProviderBackend: Send + Sync {
    fn spec(&self) -> &'static ProviderSpec;

    /// Adjust the call-scoped plan before building (feature flags,
    /// message rewrites). Runs after the dispatcher's own gating.
    fn prepare(&self, _plan: &mut CallPlan<'_>) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Decide how to authenticate. Runs before any network activity.
    fn credential(&self, plan: &CallPlan<'_>) -> Result<Credential, DispatchError>;

    fn build(&self, plan: &CallPlan<'_>, api_key: Option<&str>) -> Result<WireRequest, DispatchError>;

    /// Map a non-streaming response body onto the canonical shape.
    fn normalize(&self, plan: &CallPlan<'_>, body: Value) -> Result<CanonicalResponse, DispatchError>;

    /// SSE format for streaming calls, `None` when streaming is unsupported.
    fn stream_protocol(&self, _plan: &CallPlan<'_>) -> Option<StreamProtocol> {
        None
    }

    /// Post-process a response from either path.
    fn finalize(
        &self,
        _plan: &CallPlan<'_>,
        response: CanonicalResponse,
    ) -> Result<CanonicalResponse, DispatchError> {
        Ok(response)
    }
}

/// Backend table keyed by [`ProviderSpec::name`].
pub fn default_backends() -> HashMap<&'static str, Arc<dyn ProviderBackend>> {
    let backends: Vec<Arc<dyn ProviderBackend>> = vec![
        Arc::new(openai::OpenAiBackend::openai()),
        Arc::new(openai::OpenAiBackend::xai()),
        Arc::new(azure::AzureBackend),
        Arc::new(anthropic::AnthropicBackend::direct()),
        Arc::new(anthropic::AnthropicBackend::bedrock()),
        Arc::new(groq::GroqBackend),
        Arc::new(deepseek::DeepSeekBackend),
        Arc::new(local::LocalBackendClient::together()),
        Arc::new(local::LocalBackendClient::local()),
    ];
    backends.into_iter().map(|b| (b.spec().name, b)).collect()
}

// ─────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────

/// Credential rule shared by the key-per-provider backends: use the key
/// when present, fail when the canonical endpoint has no key, and go
/// anonymous for custom endpoints (self-hosted proxies).
pub(crate) fn key_or_missing(
    spec: &ProviderSpec,
    key: &Option<String>,
    plan: &CallPlan<'_>,
) -> Result<Credential, DispatchError> {
    if let Some(key) = non_empty(key) {
        return Ok(Credential::ApiKey(key.to_string()));
    }
    if spec.is_default_endpoint(plan.config.endpoint()) {
        Err(DispatchError::missing_credential(
            spec.name,
            &[spec.key_field.unwrap_or("api_key")],
        ))
    } else {
        Ok(Credential::Anonymous)
    }
}

/// Fresh tool call id for providers that do not return one.
pub(crate) fn new_call_id() -> String {
    format!("call_{:016x}", rand::random::<u64>())
}

/// Parse the outermost `{...}` block out of free-form model text.
pub(crate) fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Merge consecutive messages that share a role into one, joining text.
///
/// Used for upstreams that reject back-to-back turns from the same side.
pub(crate) fn merge_consecutive_text(messages: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = Vec::with_capacity(messages.len());
    for (role, text) in messages {
        match merged.last_mut() {
            Some((last_role, last_text)) if *last_role == role => {
                last_text.push_str("\n\n");
                last_text.push_str(&text);
            }
            _ => merged.push((role, text)),
        }
    }
    merged
}

/// Shared test fixtures for the backend modules.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use llmgate_core::config::schema::ProviderKind;
    use serde_json::json;

    pub fn send_message_tool() -> ToolDefinition {
        ToolDefinition::new(
            "send_message",
            "Sends a message to the human user.",
            json!({
                "type": "object",
                "properties": { "message": { "type": "string", "description": "Message contents." } },
                "required": ["message"]
            }),
        )
    }

    pub fn plan<'a>(
        kind: ProviderKind,
        model: &str,
        settings: &'a ModelSettings,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
    ) -> CallPlan<'a> {
        CallPlan {
            config: ProviderConfig::new(kind, model),
            settings,
            messages: Cow::Borrowed(messages),
            tools,
            tool_choice: if tools.is_empty() { None } else { Some(ToolChoice::Required) },
            force_tool_call: None,
            stream: false,
            use_tool_naming: true,
            put_inner_thoughts_first: true,
            user_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_backends_cover_every_provider() {
        let table = default_backends();
        for spec in crate::registry::PROVIDERS {
            assert!(table.contains_key(spec.name), "missing backend for {}", spec.name);
        }
        assert_eq!(table.len(), crate::registry::PROVIDERS.len());
    }

    #[test]
    fn test_extract_json_object() {
        let text = "Sure! ```json\n{\"function\": \"send_message\", \"params\": {\"message\": \"hi\"}}\n```";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["function"], "send_message");
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("} backwards {").is_none());
    }

    #[test]
    fn test_merge_consecutive_text() {
        let merged = merge_consecutive_text(vec![
            ("user".into(), "a".into()),
            ("user".into(), "b".into()),
            ("assistant".into(), "c".into()),
        ]);
        assert_eq!(
            merged,
            vec![("user".into(), "a\n\nb".into()), ("assistant".into(), "c".into())]
        );
    }

    #[test]
    fn test_wire_request_bearer() {
        let req = WireRequest::new("http://x", json!({}))
            .bearer(Some("sk-test"))
            .unwrap();
        assert_eq!(req.headers["authorization"], "Bearer sk-test");

        let anonymous = WireRequest::new("http://x", json!({})).bearer(None).unwrap();
        assert!(anonymous.headers.is_empty());
    }

    #[test]
    fn test_new_call_id_shape() {
        let id = new_call_id();
        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), "call_".len() + 16);
    }
}
