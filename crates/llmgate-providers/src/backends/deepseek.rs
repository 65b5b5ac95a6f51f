//! DeepSeek chat and reasoner models.
//!
//! `deepseek-chat` takes native tools. `deepseek-reasoner` does not, so for
//! it the tool list is described in the system prompt, prior tool traffic
//! is flattened to text, and the JSON block the model answers with is
//! lifted back into a tool call.

use serde_json::{json, Value};
use tracing::debug;

use llmgate_core::config::schema::ProviderKind;
use llmgate_core::types::{CanonicalResponse, ChatCompletionRequest, Message, ToolCall};
use llmgate_core::DispatchError;

use super::openai::{build_chat_request, chat_completions_url, normalize_chat_completion};
use super::{
    extract_json_object, key_or_missing, merge_consecutive_text, new_call_id, CallPlan, Credential,
    ProviderBackend, StreamProtocol, WireRequest,
};
use crate::registry::{spec_for, ProviderSpec};

const TOOL_INSTRUCTIONS: &str = "Select the best function to call by responding with a single JSON block with the keys \"name\" and \"arguments\". Use double quotes around the arguments.";

#[derive(Clone, Debug, Default)]
pub struct DeepSeekBackend;

fn is_reasoner(model: &str) -> bool {
    model.contains("reasoner")
}

/// Flatten the history into plain text turns the reasoner accepts, with
/// the tool catalogue appended to the system prompt.
fn reasoner_messages(plan: &CallPlan<'_>) -> Result<Vec<Message>, DispatchError> {
    let mut turns: Vec<(String, String)> = Vec::with_capacity(plan.messages.len() + 1);

    let catalogue = if plan.has_tools() {
        let described: Vec<Value> = plan
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.function.name,
                    "description": t.function.description,
                    "parameters": t.function.parameters,
                })
            })
            .collect();
        let listing = serde_json::to_string_pretty(&described)
            .map_err(|e| DispatchError::Config(format!("failed to encode tools: {}", e)))?;
        Some(format!(
            "\n\n<available functions>\n{}\n</available functions>\n\n{}",
            listing, TOOL_INSTRUCTIONS
        ))
    } else {
        None
    };

    for msg in plan.messages.iter() {
        let turn = match msg {
            Message::System { content } => ("system", content.clone()),
            Message::User { content } => ("user", content.text()),
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => {
                let mut parts: Vec<String> = content.iter().cloned().collect();
                for call in tool_calls.iter().flatten() {
                    let arguments: Value =
                        serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
                    parts.push(json!({ "name": call.function.name, "arguments": arguments }).to_string());
                }
                ("assistant", parts.join("\n"))
            }
            Message::Tool { content, .. } => ("user", format!("Function call result: {}", content)),
        };
        turns.push((turn.0.to_string(), turn.1));
    }

    let mut merged = merge_consecutive_text(turns);
    if let Some(catalogue) = catalogue {
        match merged.iter_mut().find(|(role, _)| role == "system") {
            Some((_, text)) => text.push_str(&catalogue),
            None => merged.insert(0, ("system".to_string(), catalogue.trim_start().to_string())),
        }
    }

    Ok(merged
        .into_iter()
        .map(|(role, text)| match role.as_str() {
            "system" => Message::system(text),
            "assistant" => Message::assistant(text),
            _ => Message::user(text),
        })
        .collect())
}

impl ProviderBackend for DeepSeekBackend {
    fn spec(&self) -> &'static ProviderSpec {
        spec_for(ProviderKind::DeepSeek)
    }

    fn prepare(&self, plan: &mut CallPlan<'_>) -> Result<(), DispatchError> {
        // Reasoning arrives in its own field.
        plan.config.put_inner_thoughts_in_kwargs = false;
        Ok(())
    }

    fn credential(&self, plan: &CallPlan<'_>) -> Result<Credential, DispatchError> {
        key_or_missing(self.spec(), &plan.settings.deepseek_api_key, plan)
    }

    fn build(&self, plan: &CallPlan<'_>, api_key: Option<&str>) -> Result<WireRequest, DispatchError> {
        let base = plan
            .config
            .endpoint_or(self.spec().default_api_base.unwrap_or_default());

        let request = if is_reasoner(&plan.config.model) {
            debug!(model = %plan.config.model, tools = plan.tools.len(), "Describing tools in prompt for reasoner");
            let mut request = ChatCompletionRequest {
                model: plan.config.model.clone(),
                messages: reasoner_messages(plan)?,
                max_tokens: plan.config.max_tokens,
                user: plan.user_id.clone(),
                ..Default::default()
            };
            if plan.stream {
                request.stream = Some(true);
                request.stream_options = Some(json!({ "include_usage": true }));
            }
            request
        } else {
            build_chat_request(plan, false)
        };

        let body = serde_json::to_value(&request)
            .map_err(|e| DispatchError::Config(format!("failed to encode request: {}", e)))?;
        WireRequest::new(chat_completions_url(base), body).bearer(api_key)
    }

    fn normalize(&self, _plan: &CallPlan<'_>, body: Value) -> Result<CanonicalResponse, DispatchError> {
        normalize_chat_completion(self.spec().name, body)
    }

    fn stream_protocol(&self, _plan: &CallPlan<'_>) -> Option<StreamProtocol> {
        Some(StreamProtocol::OpenAi {
            expect_reasoning_content: true,
        })
    }

    fn finalize(
        &self,
        plan: &CallPlan<'_>,
        mut response: CanonicalResponse,
    ) -> Result<CanonicalResponse, DispatchError> {
        if !is_reasoner(&plan.config.model) || !plan.has_tools() || response.has_tool_calls() {
            return Ok(response);
        }
        let Some(text) = response.content.as_deref() else {
            return Ok(response);
        };
        let Some(block) = extract_json_object(text) else {
            return Ok(response);
        };
        let Some(name) = block.get("name").and_then(Value::as_str) else {
            return Ok(response);
        };
        if !plan.tools.iter().any(|t| t.name() == name) {
            debug!(tool = name, "Reasoner named an unknown function, keeping text response");
            return Ok(response);
        }

        let arguments = match block.get("arguments") {
            Some(Value::String(raw)) => raw.clone(),
            Some(args) => args.to_string(),
            None => "{}".to_string(),
        };
        response.tool_calls = vec![ToolCall::new(new_call_id(), name, arguments)];
        response.content = None;
        response.finish_reason = Some("tool_calls".to_string());
        Ok(response)
    }
}
