//! Groq's OpenAI-compatible endpoint.

use serde_json::Value;

use llmgate_core::config::schema::ProviderKind;
use llmgate_core::types::{CanonicalResponse, ChatCompletionRequest};
use llmgate_core::DispatchError;

use super::openai::{build_chat_request, chat_completions_url, normalize_chat_completion};
use super::{key_or_missing, CallPlan, Credential, ProviderBackend, WireRequest};
use crate::registry::{spec_for, ProviderSpec};

/// Groq drops assistant text next to tool calls, so inner thoughts always
/// ride in the tool arguments.
#[derive(Clone, Debug, Default)]
pub struct GroqBackend;

/// Request fields Groq rejects. These are never set by our builder, so a
/// violation is a programming error rather than a user input problem.
pub(crate) fn assert_groq_constraints(request: &ChatCompletionRequest) {
    assert!(request.top_logprobs.is_none(), "groq does not support top_logprobs");
    assert!(request.logit_bias.is_none(), "groq does not support logit_bias");
    assert!(!request.logprobs.unwrap_or(false), "groq does not support logprobs");
    assert!(request.n.unwrap_or(1) == 1, "groq only supports n = 1");
}

impl ProviderBackend for GroqBackend {
    fn spec(&self) -> &'static ProviderSpec {
        spec_for(ProviderKind::Groq)
    }

    fn prepare(&self, plan: &mut CallPlan<'_>) -> Result<(), DispatchError> {
        plan.config.put_inner_thoughts_in_kwargs = true;
        Ok(())
    }

    fn credential(&self, plan: &CallPlan<'_>) -> Result<Credential, DispatchError> {
        key_or_missing(self.spec(), &plan.settings.groq_api_key, plan)
    }

    fn build(&self, plan: &CallPlan<'_>, api_key: Option<&str>) -> Result<WireRequest, DispatchError> {
        let base = plan
            .config
            .endpoint_or(self.spec().default_api_base.unwrap_or_default());
        let request = build_chat_request(plan, false);
        assert_groq_constraints(&request);

        let body = serde_json::to_value(&request)
            .map_err(|e| DispatchError::Config(format!("failed to encode request: {}", e)))?;
        WireRequest::new(chat_completions_url(base), body).bearer(api_key)
    }

    fn normalize(&self, _plan: &CallPlan<'_>, body: Value) -> Result<CanonicalResponse, DispatchError> {
        normalize_chat_completion(self.spec().name, body)
    }
}
