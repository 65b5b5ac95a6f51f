//! Azure OpenAI deployments.

use serde_json::Value;

use llmgate_core::config::schema::{non_empty, ProviderKind};
use llmgate_core::types::CanonicalResponse;
use llmgate_core::DispatchError;

use super::openai::{build_chat_request, normalize_chat_completion};
use super::{CallPlan, Credential, ProviderBackend, WireRequest};
use crate::registry::{spec_for, ProviderSpec};

/// Azure speaks the OpenAI format but routes by deployment name and
/// authenticates with an `api-key` header.
#[derive(Clone, Debug, Default)]
pub struct AzureBackend;

impl ProviderBackend for AzureBackend {
    fn spec(&self) -> &'static ProviderSpec {
        spec_for(ProviderKind::Azure)
    }

    fn credential(&self, plan: &CallPlan<'_>) -> Result<Credential, DispatchError> {
        let settings = plan.settings;
        let missing: Vec<&str> = [
            ("azure_api_key", &settings.azure_api_key),
            ("azure_base_url", &settings.azure_base_url),
            ("azure_api_version", &settings.azure_api_version),
        ]
        .into_iter()
        .filter(|(_, value)| non_empty(value).is_none())
        .map(|(field, _)| field)
        .collect();

        if !missing.is_empty() {
            return Err(DispatchError::missing_credential(self.spec().name, &missing));
        }
        let key = non_empty(&settings.azure_api_key).unwrap_or_default();
        Ok(Credential::ApiKey(key.to_string()))
    }

    fn build(&self, plan: &CallPlan<'_>, api_key: Option<&str>) -> Result<WireRequest, DispatchError> {
        let settings = plan.settings;
        let base = non_empty(&settings.azure_base_url)
            .ok_or_else(|| DispatchError::missing_credential(self.spec().name, &["azure_base_url"]))?;
        let version = non_empty(&settings.azure_api_version).ok_or_else(|| {
            DispatchError::missing_credential(self.spec().name, &["azure_api_version"])
        })?;

        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            base.trim_end_matches('/'),
            plan.config.model,
            version
        );

        let request = build_chat_request(plan, false);
        let body = serde_json::to_value(&request)
            .map_err(|e| DispatchError::Config(format!("failed to encode request: {}", e)))?;

        let wire = WireRequest::new(url, body);
        match api_key {
            Some(key) => wire.header("api-key", key),
            None => Ok(wire),
        }
    }

    fn normalize(&self, _plan: &CallPlan<'_>, body: Value) -> Result<CanonicalResponse, DispatchError> {
        normalize_chat_completion(self.spec().name, body)
    }
}
