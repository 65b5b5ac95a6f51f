//! OpenAI chat completions, shared by every OpenAI-compatible backend.
//!
//! [`OpenAiBackend`] serves both OpenAI and xAI; Azure, Groq and DeepSeek
//! reuse [`build_chat_request`] and [`normalize_chat_completion`].

use serde_json::{json, Value};
use tracing::debug;

use llmgate_core::config::schema::{ProviderCategory, ProviderKind};
use llmgate_core::types::{
    CanonicalResponse, ChatCompletionRequest, ChatCompletionResponse, ToolCall, ToolChoice,
    ToolDefinition,
};
use llmgate_core::DispatchError;

use super::{key_or_missing, CallPlan, Credential, ProviderBackend, StreamProtocol, WireRequest};
use crate::inner_thoughts;
use crate::registry::{spec_for, ProviderSpec};

// ─────────────────────────────────────────────
// Shared chat-completions builder
// ─────────────────────────────────────────────

/// `{base}/chat/completions`, tolerating a trailing slash on `base`.
pub(crate) fn chat_completions_url(base: &str) -> String {
    format!("{}/chat/completions", base.trim_end_matches('/'))
}

/// Build the OpenAI-shaped request body for `plan`.
///
/// Applies the inner-thoughts workaround when the plan asks for it, strict
/// schemas when `structured_output` is set, and falls back to the legacy
/// `functions`/`function_call` fields when tool naming is off.
pub(crate) fn build_chat_request(plan: &CallPlan<'_>, structured_output: bool) -> ChatCompletionRequest {
    let kwargs = plan.inner_thoughts_in_kwargs();

    let messages = if kwargs {
        inner_thoughts::pack_messages(&plan.messages, plan.put_inner_thoughts_first)
    } else {
        plan.messages.to_vec()
    };

    let mut tools: Vec<ToolDefinition> = if kwargs {
        inner_thoughts::add_to_tools(plan.tools, plan.put_inner_thoughts_first)
    } else {
        plan.tools.to_vec()
    };
    if structured_output {
        tools = tools.into_iter().map(to_structured_tool).collect();
    }

    let mut request = ChatCompletionRequest {
        model: plan.config.model.clone(),
        messages,
        max_tokens: plan.config.max_tokens,
        temperature: Some(plan.config.temperature),
        frequency_penalty: plan.config.frequency_penalty,
        presence_penalty: plan.config.presence_penalty,
        user: plan.user_id.clone(),
        ..Default::default()
    };

    if !tools.is_empty() {
        if plan.use_tool_naming {
            request.tool_choice = plan.tool_choice.as_ref().map(ToolChoice::to_openai);
            request.tools = Some(tools);
        } else {
            request.function_call = plan
                .tool_choice
                .as_ref()
                .map(ToolChoice::to_legacy_function_call);
            request.functions = Some(tools.into_iter().map(|t| t.function).collect());
        }
    }

    if plan.stream {
        request.stream = Some(true);
        request.stream_options = Some(json!({ "include_usage": true }));
    }

    request
}

/// Mark a tool schema strict: every property required, no extras.
///
/// Properties that were optional become nullable so the model can still
/// leave them out in spirit.
fn to_structured_tool(mut tool: ToolDefinition) -> ToolDefinition {
    let Some(schema) = tool.function.parameters.as_object_mut() else {
        return tool;
    };
    let Some(properties) = schema.get("properties").and_then(Value::as_object).cloned() else {
        return tool;
    };

    let originally_required: Vec<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let mut strict_properties = properties.clone();
    for (name, prop) in strict_properties.iter_mut() {
        if originally_required.contains(name) {
            continue;
        }
        if let Some(Value::String(ty)) = prop.get("type").cloned() {
            prop["type"] = json!([ty, "null"]);
        }
    }

    schema.insert("properties".into(), Value::Object(strict_properties));
    schema.insert(
        "required".into(),
        Value::Array(properties.keys().map(|k| Value::from(k.as_str())).collect()),
    );
    schema.insert("additionalProperties".into(), Value::Bool(false));
    tool.function.strict = Some(true);
    tool
}

/// Map an OpenAI-shaped response body onto [`CanonicalResponse`].
pub(crate) fn normalize_chat_completion(
    provider: &str,
    body: Value,
) -> Result<CanonicalResponse, DispatchError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Err(DispatchError::protocol(provider, message));
    }

    let parsed: ChatCompletionResponse = serde_json::from_value(body)
        .map_err(|e| DispatchError::protocol(provider, format!("unexpected response shape: {}", e)))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| DispatchError::protocol(provider, "response has no choices"))?;

    let mut tool_calls = choice.message.tool_calls.unwrap_or_default();
    if tool_calls.is_empty() {
        if let Some(legacy) = choice.message.function_call {
            tool_calls.push(ToolCall::new(super::new_call_id(), legacy.name, legacy.arguments));
        }
    }

    Ok(CanonicalResponse {
        id: parsed.id,
        model: parsed.model.unwrap_or_default(),
        content: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
        inner_thoughts: None,
        reasoning_content: choice.message.reasoning_content.filter(|r| !r.is_empty()),
        finish_reason: choice.finish_reason,
        usage: parsed.usage,
    })
}

// ─────────────────────────────────────────────
// OpenAI / xAI backend
// ─────────────────────────────────────────────

/// OpenAI and xAI: same wire format, different defaults.
#[derive(Clone, Debug)]
pub struct OpenAiBackend {
    spec: &'static ProviderSpec,
    kind: ProviderKind,
}

impl OpenAiBackend {
    pub fn openai() -> Self {
        Self {
            spec: spec_for(ProviderKind::OpenAi),
            kind: ProviderKind::OpenAi,
        }
    }

    pub fn xai() -> Self {
        Self {
            spec: spec_for(ProviderKind::Xai),
            kind: ProviderKind::Xai,
        }
    }

    fn is_xai(&self) -> bool {
        self.kind == ProviderKind::Xai
    }
}

impl ProviderBackend for OpenAiBackend {
    fn spec(&self) -> &'static ProviderSpec {
        self.spec
    }

    fn credential(&self, plan: &CallPlan<'_>) -> Result<Credential, DispatchError> {
        if self.is_xai() {
            return key_or_missing(self.spec, &plan.settings.xai_api_key, plan);
        }

        if plan.config.provider_category == ProviderCategory::Byok {
            return Ok(Credential::ResolveOverride);
        }
        match key_or_missing(self.spec, &plan.settings.openai_api_key, plan) {
            // The public endpoint with no key still gets a request; it will
            // come back 401 with a clear upstream message.
            Err(DispatchError::MissingCredential { .. })
                if self.spec.is_default_endpoint(plan.config.endpoint()) =>
            {
                Ok(Credential::Placeholder)
            }
            Ok(Credential::Anonymous) => Err(DispatchError::missing_credential(
                self.spec.name,
                &["openai_api_key"],
            )),
            other => other,
        }
    }

    fn build(&self, plan: &CallPlan<'_>, api_key: Option<&str>) -> Result<WireRequest, DispatchError> {
        let base = plan.config.endpoint_or(self.spec.default_api_base.unwrap_or_default());
        let mut request = build_chat_request(plan, !self.is_xai());

        if self.is_xai() && plan.config.model.contains("grok-3-mini-") {
            // These reasoning models reject penalty parameters.
            request.presence_penalty = None;
            request.frequency_penalty = None;
        }

        debug!(
            provider = self.spec.display_name,
            model = %request.model,
            tools = request.tools.as_ref().map_or(0, |t| t.len()),
            stream = plan.stream,
            "Built chat completion request"
        );

        let body = serde_json::to_value(&request)
            .map_err(|e| DispatchError::Config(format!("failed to encode request: {}", e)))?;
        WireRequest::new(chat_completions_url(base), body).bearer(api_key)
    }

    fn normalize(&self, _plan: &CallPlan<'_>, body: Value) -> Result<CanonicalResponse, DispatchError> {
        normalize_chat_completion(self.spec.name, body)
    }

    fn stream_protocol(&self, _plan: &CallPlan<'_>) -> Option<StreamProtocol> {
        Some(StreamProtocol::OpenAi {
            expect_reasoning_content: false,
        })
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_support::{plan, send_message_tool};
    use llmgate_core::config::schema::ModelSettings;
    use llmgate_core::types::Message;

    #[test]
    fn test_credential_default_endpoint_without_key_uses_placeholder() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let p = plan(ProviderKind::OpenAi, "gpt-4o", &settings, &messages, &[]);
        assert_eq!(OpenAiBackend::openai().credential(&p).unwrap(), Credential::Placeholder);
    }

    #[test]
    fn test_credential_custom_endpoint_without_key_is_missing() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let mut p = plan(ProviderKind::OpenAi, "gpt-4o", &settings, &messages, &[]);
        p.config.model_endpoint = Some("http://localhost:4000/v1".into());

        let err = OpenAiBackend::openai().credential(&p).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::MissingCredential { ref missing_fields, .. } if missing_fields == &["openai_api_key"]
        ));
    }

    #[test]
    fn test_credential_byok_defers_to_resolver() {
        let settings = ModelSettings {
            openai_api_key: Some("sk-base".into()),
            ..Default::default()
        };
        let messages = vec![Message::user("hi")];
        let mut p = plan(ProviderKind::OpenAi, "gpt-4o", &settings, &messages, &[]);
        p.config.provider_category = ProviderCategory::Byok;
        assert_eq!(
            OpenAiBackend::openai().credential(&p).unwrap(),
            Credential::ResolveOverride
        );
    }

    #[test]
    fn test_xai_requires_key_on_public_endpoint() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let p = plan(ProviderKind::Xai, "grok-3", &settings, &messages, &[]);
        assert!(matches!(
            OpenAiBackend::xai().credential(&p),
            Err(DispatchError::MissingCredential { .. })
        ));
    }

    #[test]
    fn test_build_uses_structured_tools_for_openai() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let tools = vec![send_message_tool()];
        let p = plan(ProviderKind::OpenAi, "gpt-4o", &settings, &messages, &tools);

        let wire = OpenAiBackend::openai().build(&p, Some("sk-test")).unwrap();
        assert_eq!(wire.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(wire.headers["authorization"], "Bearer sk-test");
        assert_eq!(wire.body["tool_choice"], "required");
        let function = &wire.body["tools"][0]["function"];
        assert_eq!(function["strict"], true);
        assert_eq!(function["parameters"]["additionalProperties"], false);
    }

    #[test]
    fn test_structured_output_makes_optional_fields_nullable() {
        let tool = ToolDefinition::new(
            "search",
            "",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "page": {"type": "integer"}
                },
                "required": ["query"]
            }),
        );
        let strict = to_structured_tool(tool);
        let params = &strict.function.parameters;
        assert_eq!(params["required"], serde_json::json!(["query", "page"]));
        assert_eq!(params["properties"]["page"]["type"], serde_json::json!(["integer", "null"]));
        assert_eq!(params["properties"]["query"]["type"], "string");
    }

    #[test]
    fn test_xai_grok_3_mini_drops_penalties() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let mut p = plan(ProviderKind::Xai, "grok-3-mini-beta", &settings, &messages, &[]);
        p.config.presence_penalty = Some(0.5);
        p.config.frequency_penalty = Some(0.5);

        let wire = OpenAiBackend::xai().build(&p, Some("xai-key")).unwrap();
        assert_eq!(wire.url, "https://api.x.ai/v1/chat/completions");
        assert!(wire.body.get("presence_penalty").is_none());
        assert!(wire.body.get("frequency_penalty").is_none());
    }

    #[test]
    fn test_legacy_function_mode() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let tools = vec![send_message_tool()];
        let mut p = plan(ProviderKind::OpenAi, "gpt-4o", &settings, &messages, &tools);
        p.use_tool_naming = false;

        let request = build_chat_request(&p, false);
        assert!(request.tools.is_none());
        assert_eq!(request.functions.as_ref().unwrap()[0].name, "send_message");
        assert_eq!(request.function_call, Some(Value::from("auto")));
    }

    #[test]
    fn test_build_stream_sets_usage_option() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let mut p = plan(ProviderKind::OpenAi, "gpt-4o", &settings, &messages, &[]);
        p.stream = true;

        let request = build_chat_request(&p, true);
        assert_eq!(request.stream, Some(true));
        assert_eq!(request.stream_options, Some(json!({"include_usage": true})));
    }

    #[test]
    fn test_normalize_tool_call_response() {
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "send_message", "arguments": "{\"message\":\"hi\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });

        let resp = normalize_chat_completion("openai", body).unwrap();
        assert_eq!(resp.id.as_deref(), Some("chatcmpl-1"));
        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls[0].function.name, "send_message");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_normalize_legacy_function_call_gets_id() {
        let body = json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {"content": null, "function_call": {"name": "f", "arguments": "{}"}},
                "finish_reason": "function_call"
            }]
        });
        let resp = normalize_chat_completion("openai", body).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert!(resp.tool_calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_normalize_errors() {
        let err = normalize_chat_completion("openai", json!({"choices": []})).unwrap_err();
        assert!(err.to_string().contains("no choices"));

        let err = normalize_chat_completion(
            "openai",
            json!({"error": {"message": "model overloaded"}}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }
}
