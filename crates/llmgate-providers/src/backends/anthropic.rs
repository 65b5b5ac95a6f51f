//! Anthropic Messages API, direct and through AWS Bedrock.
//!
//! The chat history is translated into Anthropic's shape: system messages
//! are hoisted into the top-level `system` field, tool results become
//! `tool_result` blocks on a user turn, and consecutive turns from the same
//! side are merged because the API requires strict alternation.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use llmgate_core::config::schema::{non_empty, ProviderCategory, ProviderKind};
use llmgate_core::types::{
    CanonicalResponse, ContentPart, Message, MessageContent, ToolCall, ToolDefinition, UsageInfo,
};
use llmgate_core::DispatchError;

use super::{key_or_missing, CallPlan, Credential, ProviderBackend, StreamProtocol, WireRequest};
use crate::inner_thoughts;
use crate::registry::{spec_for, ProviderSpec};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ─────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct AnthropicBackend {
    spec: &'static ProviderSpec,
    bedrock: bool,
}

impl AnthropicBackend {
    pub fn direct() -> Self {
        Self {
            spec: spec_for(ProviderKind::Anthropic),
            bedrock: false,
        }
    }

    pub fn bedrock() -> Self {
        Self {
            spec: spec_for(ProviderKind::Bedrock),
            bedrock: true,
        }
    }

    fn url(&self, plan: &CallPlan<'_>) -> Result<String, DispatchError> {
        if !self.bedrock {
            let base = plan
                .config
                .endpoint_or(self.spec.default_api_base.unwrap_or_default());
            return Ok(format!("{}/messages", base));
        }

        let base = match plan.config.endpoint() {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => {
                let region = non_empty(&plan.settings.aws_region).ok_or_else(|| {
                    DispatchError::missing_credential(self.spec.name, &["aws_region"])
                })?;
                format!("https://bedrock-runtime.{}.amazonaws.com", region)
            }
        };
        Ok(format!("{}/model/{}/invoke", base, plan.config.model))
    }
}

impl ProviderBackend for AnthropicBackend {
    fn spec(&self) -> &'static ProviderSpec {
        self.spec
    }

    fn prepare(&self, plan: &mut CallPlan<'_>) -> Result<(), DispatchError> {
        // Thinking blocks already carry the reasoning.
        if plan.config.enable_reasoner {
            plan.config.put_inner_thoughts_in_kwargs = false;
        }

        if let Some(forced) = plan.force_tool_call.as_deref() {
            if !plan.tools.iter().any(|t| t.name() == forced) {
                return Err(DispatchError::Config(format!(
                    "forced tool '{}' is not among the provided tools",
                    forced
                )));
            }
            // A forced tool_use turn has no text block, so reasoning has to
            // travel inside the arguments.
            plan.config.put_inner_thoughts_in_kwargs = true;
            if plan.config.enable_reasoner {
                warn!(
                    provider = self.spec.display_name,
                    tool = forced,
                    "Extended thinking cannot be combined with a forced tool call, disabling thinking"
                );
                plan.config.enable_reasoner = false;
            }
        }
        Ok(())
    }

    fn credential(&self, plan: &CallPlan<'_>) -> Result<Credential, DispatchError> {
        if self.bedrock {
            let settings = plan.settings;
            let mut missing = Vec::new();
            if non_empty(&settings.aws_bearer_token).is_none() {
                missing.push("aws_bearer_token");
            }
            if non_empty(&settings.aws_region).is_none() && plan.config.endpoint().is_none() {
                missing.push("aws_region");
            }
            if !missing.is_empty() {
                return Err(DispatchError::missing_credential(self.spec.name, &missing));
            }
            let token = non_empty(&settings.aws_bearer_token).unwrap_or_default();
            return Ok(Credential::ApiKey(token.to_string()));
        }

        if plan.config.provider_category == ProviderCategory::Byok {
            return Ok(Credential::ResolveOverride);
        }
        key_or_missing(self.spec, &plan.settings.anthropic_api_key, plan)
    }

    fn build(&self, plan: &CallPlan<'_>, api_key: Option<&str>) -> Result<WireRequest, DispatchError> {
        let kwargs = plan.inner_thoughts_in_kwargs();
        let messages = if kwargs {
            inner_thoughts::pack_messages(&plan.messages, plan.put_inner_thoughts_first)
        } else {
            plan.messages.to_vec()
        };
        let (system, turns) = convert_messages(&messages);

        let selected: Vec<ToolDefinition> = match plan.force_tool_call.as_deref() {
            Some(forced) => plan.tools.iter().filter(|t| t.name() == forced).cloned().collect(),
            None => plan.tools.to_vec(),
        };
        let selected = if kwargs {
            inner_thoughts::add_to_tools(&selected, plan.put_inner_thoughts_first)
        } else {
            selected
        };

        let mut max_tokens = plan.config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let mut body = Map::new();
        if !self.bedrock {
            body.insert("model".into(), Value::from(plan.config.model.as_str()));
        }
        body.insert("messages".into(), Value::Array(turns));
        if let Some(system) = system {
            body.insert("system".into(), Value::from(system));
        }

        if !selected.is_empty() {
            body.insert(
                "tools".into(),
                Value::Array(selected.iter().map(to_anthropic_tool).collect()),
            );
            let choice = match plan.force_tool_call.as_deref() {
                Some(forced) => json!({ "type": "tool", "name": forced }),
                None if kwargs => json!({ "type": "any", "disable_parallel_tool_use": true }),
                None => json!({ "type": "auto", "disable_parallel_tool_use": true }),
            };
            body.insert("tool_choice".into(), choice);
        }

        if plan.config.enable_reasoner {
            let budget = plan.config.max_reasoning_tokens;
            if max_tokens <= budget {
                max_tokens = budget.saturating_add(max_tokens);
            }
            body.insert(
                "thinking".into(),
                json!({ "type": "enabled", "budget_tokens": budget }),
            );
            // Thinking requires the default temperature.
            body.insert("temperature".into(), json!(1.0));
        } else {
            body.insert("temperature".into(), json!(plan.config.temperature));
        }
        body.insert("max_tokens".into(), json!(max_tokens));

        if let Some(user_id) = &plan.user_id {
            body.insert("metadata".into(), json!({ "user_id": user_id }));
        }
        if self.bedrock {
            body.insert("anthropic_version".into(), Value::from(BEDROCK_ANTHROPIC_VERSION));
        } else if plan.stream {
            body.insert("stream".into(), Value::Bool(true));
        }

        debug!(
            provider = self.spec.display_name,
            model = %plan.config.model,
            tools = selected.len(),
            forced_tool = plan.force_tool_call.as_deref().unwrap_or("-"),
            thinking = plan.config.enable_reasoner,
            "Built messages request"
        );

        let wire = WireRequest::new(self.url(plan)?, Value::Object(body));
        if self.bedrock {
            return wire.bearer(api_key);
        }
        let wire = wire.header("anthropic-version", ANTHROPIC_VERSION)?;
        match api_key {
            Some(key) => wire.header("x-api-key", key),
            None => Ok(wire),
        }
    }

    fn normalize(&self, _plan: &CallPlan<'_>, body: Value) -> Result<CanonicalResponse, DispatchError> {
        parse_message_response(self.spec.name, body)
    }

    fn stream_protocol(&self, _plan: &CallPlan<'_>) -> Option<StreamProtocol> {
        if self.bedrock {
            None
        } else {
            Some(StreamProtocol::Anthropic)
        }
    }
}

// ─────────────────────────────────────────────
// Request translation
// ─────────────────────────────────────────────

fn to_anthropic_tool(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.function.name,
        "description": tool.function.description,
        "input_schema": tool.function.parameters,
    })
}

/// Split `messages` into the hoisted system prompt and alternating turns.
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for msg in messages {
        let (role, blocks) = match msg {
            Message::System { content } => {
                system_parts.push(content);
                continue;
            }
            Message::User { content } => ("user", user_blocks(content)),
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => {
                let mut blocks = Vec::new();
                if let Some(text) = content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(json!({ "type": "text", "text": text }));
                }
                for call in tool_calls.iter().flatten() {
                    blocks.push(tool_use_block(call));
                }
                ("assistant", blocks)
            }
            Message::Tool {
                content,
                tool_call_id,
            } => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": content,
                })],
            ),
        };

        if blocks.is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    let turns = turns
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect();
    (system, turns)
}

fn user_blocks(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(text) if text.is_empty() => Vec::new(),
        MessageContent::Text(text) => vec![json!({ "type": "text", "text": text })],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } if text.is_empty() => None,
                ContentPart::Text { text } => Some(json!({ "type": "text", "text": text })),
                ContentPart::ImageUrl { image_url } => Some(image_block(&image_url.url)),
            })
            .collect(),
    }
}

fn image_block(url: &str) -> Value {
    // data:<media type>;base64,<payload>
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((media_type, data)) = rest.split_once(";base64,") {
            return json!({
                "type": "image",
                "source": { "type": "base64", "media_type": media_type, "data": data }
            });
        }
    }
    json!({ "type": "image", "source": { "type": "url", "url": url } })
}

fn tool_use_block(call: &ToolCall) -> Value {
    let input = match serde_json::from_str::<Value>(&call.function.arguments) {
        Ok(value @ Value::Object(_)) => value,
        _ => {
            warn!(
                tool_call_id = %call.id,
                "Tool call arguments in history are not a JSON object, sending empty input"
            );
            json!({})
        }
    };
    json!({
        "type": "tool_use",
        "id": call.id,
        "name": call.function.name,
        "input": input,
    })
}

// ─────────────────────────────────────────────
// Response translation
// ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

/// Map Anthropic stop reasons onto OpenAI finish reasons.
pub(crate) fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        other => other,
    }
    .to_string()
}

fn parse_message_response(provider: &str, body: Value) -> Result<CanonicalResponse, DispatchError> {
    if body.get("type").and_then(Value::as_str) == Some("error") {
        let message = body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(DispatchError::protocol(provider, message));
    }

    let parsed: MessageResponse = serde_json::from_value(body)
        .map_err(|e| DispatchError::protocol(provider, format!("unexpected response shape: {}", e)))?;

    let mut text = Vec::new();
    let mut thinking = Vec::new();
    let mut tool_calls = Vec::new();
    for block in parsed.content {
        match block {
            ContentBlock::Text { text: t } => text.push(t),
            ContentBlock::Thinking { thinking: t } => thinking.push(t),
            ContentBlock::ToolUse { id, name, input } => {
                let arguments = if input.is_null() {
                    "{}".to_string()
                } else {
                    input.to_string()
                };
                tool_calls.push(ToolCall::new(id, name, arguments));
            }
            ContentBlock::Other => {}
        }
    }

    let join = |parts: Vec<String>| {
        let joined = parts.join("\n");
        (!joined.is_empty()).then_some(joined)
    };

    Ok(CanonicalResponse {
        id: parsed.id,
        model: parsed.model.unwrap_or_default(),
        content: join(text),
        tool_calls,
        inner_thoughts: None,
        reasoning_content: join(thinking),
        finish_reason: parsed.stop_reason.as_deref().map(map_stop_reason),
        usage: parsed
            .usage
            .map(|u| UsageInfo::new(u.input_tokens, u.output_tokens)),
    })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
