//! Raw completion servers: vLLM, Ollama, LM Studio, llama.cpp, KoboldCpp,
//! text-generation-webui, and Together's `/completions` endpoint.

use std::borrow::Cow;

use serde_json::{json, Value};
use tracing::debug;

use llmgate_core::config::schema::{non_empty, LocalAuthType, LocalBackend, ProviderKind};
use llmgate_core::types::{CanonicalResponse, Message, ToolCall, UsageInfo};
use llmgate_core::DispatchError;

use super::chatml::{self, ParsedOutput};
use super::{new_call_id, CallPlan, Credential, ProviderBackend, WireRequest};
use crate::inner_thoughts;
use crate::registry::{spec_for, ProviderSpec};

const DEFAULT_MAX_TOKENS: u32 = 1024;
const R1_TOOL_INSTRUCTIONS: &str = "Select best function to call simply by responding with a single json block with the keys \"function\" and \"params\". Use double quotes around the arguments.";

#[derive(Clone, Debug)]
pub struct LocalBackendClient {
    spec: &'static ProviderSpec,
    together: bool,
}

impl LocalBackendClient {
    pub fn local() -> Self {
        Self {
            spec: spec_for(ProviderKind::Local(LocalBackend::Vllm)),
            together: false,
        }
    }

    pub fn together() -> Self {
        Self {
            spec: spec_for(ProviderKind::Together),
            together: true,
        }
    }

    /// Server flavor; Together serves the vLLM-style completions API.
    fn server(&self, plan: &CallPlan<'_>) -> LocalBackend {
        match plan.config.model_endpoint_type {
            ProviderKind::Local(backend) if !self.together => backend,
            _ => LocalBackend::Vllm,
        }
    }

    fn base_url<'p>(&self, plan: &'p CallPlan<'_>) -> Result<&'p str, DispatchError> {
        match plan.config.endpoint() {
            Some(endpoint) => Ok(endpoint.trim_end_matches('/')),
            None => self
                .spec
                .default_api_base
                .ok_or_else(|| DispatchError::Config("model endpoint is not configured".into())),
        }
    }

    fn is_public_together(&self, plan: &CallPlan<'_>) -> bool {
        match plan.config.endpoint() {
            None => true,
            Some(endpoint) => {
                endpoint.contains("api.together.xyz") || endpoint.contains("api.together.ai")
            }
        }
    }
}

/// `/v1/completions` under `base`, unless `base` already names it.
fn completions_url(base: &str) -> String {
    if base.ends_with("/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{}/completions", base)
    } else {
        format!("{}/v1/completions", base)
    }
}

impl ProviderBackend for LocalBackendClient {
    fn spec(&self) -> &'static ProviderSpec {
        self.spec
    }

    fn prepare(&self, plan: &mut CallPlan<'_>) -> Result<(), DispatchError> {
        match plan.config.model_wrapper.as_deref().map(str::trim) {
            None | Some("") => {}
            Some(name) if name.eq_ignore_ascii_case(chatml::WRAPPER_NAME) => {}
            Some(other) => {
                return Err(DispatchError::Config(format!(
                    "unsupported model wrapper '{}' (available: {})",
                    other,
                    chatml::WRAPPER_NAME
                )))
            }
        }

        // The prompt wrapper always carries reasoning in the params.
        plan.config.put_inner_thoughts_in_kwargs = true;

        if self.together || !plan.has_tools() {
            return Ok(());
        }
        if plan.config.model.to_lowercase().contains("deepseek-r1") {
            let listing: Vec<String> = plan
                .tools
                .iter()
                .filter_map(|t| serde_json::to_string(&t.function).ok())
                .collect();
            let hint = format!(
                "<available functions> {} </available functions>{}",
                listing.join(""),
                R1_TOOL_INSTRUCTIONS
            );
            if let Some(first) = plan.messages.first() {
                let mut rewritten: Vec<Message> = plan.messages.to_vec();
                rewritten[0] = first.with_appended_text(&hint);
                plan.messages = Cow::Owned(rewritten);
            }
        }
        Ok(())
    }

    fn credential(&self, plan: &CallPlan<'_>) -> Result<Credential, DispatchError> {
        self.base_url(plan)?;

        let key = if self.together {
            &plan.settings.together_api_key
        } else {
            &plan.settings.openllm_api_key
        };
        match non_empty(key) {
            Some(key) => Ok(Credential::ApiKey(key.to_string())),
            None if self.together && self.is_public_together(plan) => Err(
                DispatchError::missing_credential(self.spec.name, &["together_api_key"]),
            ),
            None => Ok(Credential::Anonymous),
        }
    }

    fn build(&self, plan: &CallPlan<'_>, api_key: Option<&str>) -> Result<WireRequest, DispatchError> {
        let base = self.base_url(plan)?;
        let kwargs = plan.inner_thoughts_in_kwargs();
        let messages = if kwargs {
            inner_thoughts::pack_messages(&plan.messages, plan.put_inner_thoughts_first)
        } else {
            plan.messages.to_vec()
        };
        let tools = if kwargs {
            inner_thoughts::add_to_tools(plan.tools, plan.put_inner_thoughts_first)
        } else {
            plan.tools.to_vec()
        };
        let prompt = chatml::build_prompt(&messages, &tools);

        let max_tokens = plan.config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let temperature = plan.config.temperature;
        let stop = chatml::STOP_SEQUENCES;
        let server = self.server(plan);

        let (url, body) = match server {
            LocalBackend::Vllm | LocalBackend::LmStudio | LocalBackend::WebUi => (
                completions_url(base),
                json!({
                    "model": plan.config.model,
                    "prompt": prompt,
                    "max_tokens": max_tokens,
                    "temperature": temperature,
                    "stop": stop,
                    "user": plan.user_id,
                }),
            ),
            LocalBackend::Ollama => (
                format!("{}/api/generate", base),
                json!({
                    "model": plan.config.model,
                    "prompt": prompt,
                    "stream": false,
                    "raw": true,
                    "options": {
                        "temperature": temperature,
                        "num_predict": max_tokens,
                        "stop": stop,
                    },
                }),
            ),
            LocalBackend::LlamaCpp => (
                format!("{}/completion", base),
                json!({
                    "prompt": prompt,
                    "n_predict": max_tokens,
                    "temperature": temperature,
                    "stop": stop,
                }),
            ),
            LocalBackend::KoboldCpp => (
                format!("{}/api/v1/generate", base),
                json!({
                    "prompt": prompt,
                    "max_length": max_tokens,
                    "temperature": temperature,
                    "stop_sequence": stop,
                }),
            ),
        };

        debug!(
            provider = self.spec.display_name,
            server = server.as_str(),
            model = %plan.config.model,
            prompt_chars = prompt.len(),
            "Built completion request"
        );

        let wire = WireRequest::new(url, body);
        match (api_key, plan.settings.openllm_auth_type) {
            (Some(key), LocalAuthType::ApiKey) if !self.together => wire.header("api-key", key),
            (key, _) => wire.bearer(key),
        }
    }

    fn normalize(&self, plan: &CallPlan<'_>, body: Value) -> Result<CanonicalResponse, DispatchError> {
        let server = self.server(plan);
        let text = match server {
            LocalBackend::Vllm | LocalBackend::LmStudio | LocalBackend::WebUi => {
                body.pointer("/choices/0/text")
            }
            LocalBackend::Ollama => body.get("response"),
            LocalBackend::LlamaCpp => body.get("content"),
            LocalBackend::KoboldCpp => body.pointer("/results/0/text"),
        }
        .and_then(Value::as_str)
        .ok_or_else(|| {
            DispatchError::protocol(
                self.spec.name,
                format!("{} response carries no completion text", server.as_str()),
            )
        })?;

        let usage = match server {
            LocalBackend::Ollama => completion_usage(&body, "prompt_eval_count", "eval_count"),
            LocalBackend::LlamaCpp => completion_usage(&body, "tokens_evaluated", "tokens_predicted"),
            _ => body
                .get("usage")
                .and_then(|u| serde_json::from_value::<UsageInfo>(u.clone()).ok()),
        };

        let mut response = CanonicalResponse {
            model: plan.config.model.clone(),
            usage,
            ..Default::default()
        };
        match chatml::parse_output(text) {
            ParsedOutput::Call { name, arguments } => {
                response.tool_calls = vec![ToolCall::new(new_call_id(), name, arguments)];
                response.finish_reason = Some("tool_calls".to_string());
            }
            ParsedOutput::Text(text) => {
                response.content = (!text.is_empty()).then_some(text);
                response.finish_reason = Some("stop".to_string());
            }
        }
        Ok(response)
    }
}

fn completion_usage(body: &Value, prompt_key: &str, completion_key: &str) -> Option<UsageInfo> {
    let prompt = body.get(prompt_key)?.as_u64()?;
    let completion = body.get(completion_key)?.as_u64()?;
    Some(UsageInfo::new(prompt as u32, completion as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_support::{plan, send_message_tool};
    use llmgate_core::config::schema::ModelSettings;

    #[test]
    fn test_missing_endpoint_is_config_error() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let p = plan(ProviderKind::Local(LocalBackend::Ollama), "llama3", &settings, &messages, &[]);
        assert!(matches!(
            LocalBackendClient::local().credential(&p),
            Err(DispatchError::Config(_))
        ));
    }

    #[test]
    fn test_model_wrapper_selects_chatml() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let mut p = plan(ProviderKind::Local(LocalBackend::Vllm), "llama3", &settings, &messages, &[]);
        p.config.model_endpoint = Some("http://localhost:8000".into());

        p.config.model_wrapper = Some("ChatML".into());
        assert!(LocalBackendClient::local().prepare(&mut p).is_ok());

        p.config.model_wrapper = Some("airoboros-l2-70b-2.1".into());
        let err = LocalBackendClient::local().prepare(&mut p).unwrap_err();
        assert!(matches!(err, DispatchError::Config(ref msg) if msg.contains("airoboros")));
    }

    #[test]
    fn test_deepseek_r1_hint_appended_to_copy() {
        let settings = ModelSettings::default();
        let messages = vec![Message::system("You are Sam."), Message::user("hi")];
        let tools = vec![send_message_tool()];
        let mut p = plan(
            ProviderKind::Local(LocalBackend::Vllm),
            "DeepSeek-R1-Distill-Qwen-32B",
            &settings,
            &messages,
            &tools,
        );
        p.config.model_endpoint = Some("http://localhost:8000".into());

        LocalBackendClient::local().prepare(&mut p).unwrap();
        let first = p.messages[0].text().unwrap();
        assert!(first.starts_with("You are Sam.<available functions> {\"name\":\"send_message\""));
        assert!(first.ends_with("Use double quotes around the arguments."));
        // caller's list untouched
        assert_eq!(messages[0], Message::system("You are Sam."));
    }

    #[test]
    fn test_other_models_get_no_hint() {
        let settings = ModelSettings::default();
        let messages = vec![Message::system("You are Sam.")];
        let tools = vec![send_message_tool()];
        let mut p = plan(ProviderKind::Local(LocalBackend::Vllm), "llama-3-8b", &settings, &messages, &tools);
        LocalBackendClient::local().prepare(&mut p).unwrap();
        assert!(matches!(p.messages, Cow::Borrowed(_)));
    }

    #[test]
    fn test_ollama_request_shape() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let tools = vec![send_message_tool()];
        let mut p = plan(ProviderKind::Local(LocalBackend::Ollama), "llama3", &settings, &messages, &tools);
        p.config.model_endpoint = Some("http://localhost:11434/".into());
        let backend = LocalBackendClient::local();
        backend.prepare(&mut p).unwrap();

        let wire = backend.build(&p, None).unwrap();
        assert_eq!(wire.url, "http://localhost:11434/api/generate");
        assert_eq!(wire.body["raw"], true);
        assert!(wire.body["prompt"].as_str().unwrap().contains("inner_thoughts: Deep inner monologue"));
        assert!(wire.headers.is_empty());
    }

    #[test]
    fn test_api_key_auth_type() {
        let settings = ModelSettings {
            openllm_api_key: Some("local-key".into()),
            openllm_auth_type: LocalAuthType::ApiKey,
            ..Default::default()
        };
        let messages = vec![Message::user("hi")];
        let mut p = plan(ProviderKind::Local(LocalBackend::Vllm), "m", &settings, &messages, &[]);
        p.config.model_endpoint = Some("http://localhost:8000/v1".into());

        let backend = LocalBackendClient::local();
        let credential = backend.credential(&p).unwrap();
        assert_eq!(credential, Credential::ApiKey("local-key".into()));
        let wire = backend.build(&p, Some("local-key")).unwrap();
        assert_eq!(wire.url, "http://localhost:8000/v1/completions");
        assert_eq!(wire.headers["api-key"], "local-key");
    }

    #[test]
    fn test_together_requires_key_on_public_endpoint() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let mut p = plan(ProviderKind::Together, "mixtral", &settings, &messages, &[]);
        p.config.model_endpoint = Some("https://api.together.ai/v1/completions".into());
        let err = LocalBackendClient::together().credential(&p).unwrap_err();
        assert!(matches!(err, DispatchError::MissingCredential { .. }));

        p.config.model_endpoint = Some("http://my-proxy:8080".into());
        assert_eq!(
            LocalBackendClient::together().credential(&p).unwrap(),
            Credential::Anonymous
        );
    }

    #[test]
    fn test_normalize_function_call_from_completion_text() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let p = plan(ProviderKind::Local(LocalBackend::LlamaCpp), "m", &settings, &messages, &[]);

        let body = json!({
            "content": "{\"function\": \"send_message\", \"params\": {\"inner_thoughts\": \"say hi\", \"message\": \"hi!\"}}",
            "tokens_evaluated": 40,
            "tokens_predicted": 12
        });
        let resp = LocalBackendClient::local().normalize(&p, body).unwrap();
        assert_eq!(resp.tool_calls[0].function.name, "send_message");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(resp.usage.unwrap().total_tokens, 52);
    }

    #[test]
    fn test_normalize_missing_text_is_protocol_error() {
        let settings = ModelSettings::default();
        let messages = vec![Message::user("hi")];
        let p = plan(ProviderKind::Local(LocalBackend::KoboldCpp), "m", &settings, &messages, &[]);
        let err = LocalBackendClient::local().normalize(&p, json!({"results": []})).unwrap_err();
        assert!(matches!(err, DispatchError::ProviderProtocol { .. }));
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(completions_url("http://h:8000"), "http://h:8000/v1/completions");
        assert_eq!(completions_url("http://h:8000/v1"), "http://h:8000/v1/completions");
        assert_eq!(
            completions_url("https://api.together.xyz/v1/completions"),
            "https://api.together.xyz/v1/completions"
        );
    }
}
