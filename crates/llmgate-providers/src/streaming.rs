//! Server-sent event accumulators.
//!
//! Each SSE `data` payload is turned into zero or more
//! [`CanonicalResponseDelta`]s for the stream sink while the accumulator
//! assembles the final [`CanonicalResponse`]. Tool call argument fragments
//! are concatenated per tool index.

use std::collections::HashMap;

use serde_json::Value;

use llmgate_core::types::{CanonicalResponse, CanonicalResponseDelta, ToolCall, ToolCallDelta, UsageInfo};
use llmgate_core::DispatchError;

use crate::backends::anthropic::{map_stop_reason, AnthropicUsage};
use crate::backends::{new_call_id, StreamProtocol};

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Builds one response out of a sequence of stream events.
#[derive(Debug)]
pub struct StreamAccumulator {
    provider: String,
    protocol: StreamProtocol,
    id: Option<String>,
    model: Option<String>,
    content: String,
    reasoning: String,
    tools: Vec<PartialToolCall>,
    /// Anthropic content-block index to tool position.
    tool_blocks: HashMap<u64, usize>,
    finish_reason: Option<String>,
    usage: Option<UsageInfo>,
    prompt_tokens: u32,
    done: bool,
}

impl StreamAccumulator {
    pub fn new(provider: impl Into<String>, protocol: StreamProtocol) -> Self {
        Self {
            provider: provider.into(),
            protocol,
            id: None,
            model: None,
            content: String::new(),
            reasoning: String::new(),
            tools: Vec::new(),
            tool_blocks: HashMap::new(),
            finish_reason: None,
            usage: None,
            prompt_tokens: 0,
            done: false,
        }
    }

    /// Whether the provider signalled the end of the stream.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one SSE `data` payload.
    pub fn push(&mut self, data: &str) -> Result<Vec<CanonicalResponseDelta>, DispatchError> {
        let data = data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(Vec::new());
        }

        let event: Value = serde_json::from_str(data).map_err(|e| {
            DispatchError::protocol(&self.provider, format!("invalid stream event: {}", e))
        })?;

        match self.protocol {
            StreamProtocol::OpenAi {
                expect_reasoning_content,
            } => self.push_openai(&event, expect_reasoning_content),
            StreamProtocol::Anthropic => self.push_anthropic(&event),
        }
    }

    fn push_openai(
        &mut self,
        chunk: &Value,
        expect_reasoning_content: bool,
    ) -> Result<Vec<CanonicalResponseDelta>, DispatchError> {
        if let Some(error) = chunk.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown stream error");
            return Err(DispatchError::protocol(&self.provider, message));
        }

        if let Some(id) = chunk.get("id").and_then(Value::as_str) {
            self.id.get_or_insert_with(|| id.to_string());
        }
        if let Some(model) = chunk.get("model").and_then(Value::as_str) {
            self.model.get_or_insert_with(|| model.to_string());
        }
        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.usage = serde_json::from_value(usage.clone()).ok();
        }

        let mut deltas = Vec::new();
        let Some(choice) = chunk.pointer("/choices/0") else {
            return Ok(deltas);
        };
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(text) = delta.get("content").and_then(Value::as_str).filter(|t| !t.is_empty()) {
            self.content.push_str(text);
            deltas.push(CanonicalResponseDelta {
                content: Some(text.to_string()),
                ..Default::default()
            });
        }

        if expect_reasoning_content {
            if let Some(text) = delta
                .get("reasoning_content")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
            {
                self.reasoning.push_str(text);
                deltas.push(CanonicalResponseDelta {
                    reasoning_content: Some(text.to_string()),
                    ..Default::default()
                });
            }
        }

        for (position, fragment) in delta
            .get("tool_calls")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .enumerate()
        {
            let index = fragment
                .get("index")
                .and_then(Value::as_u64)
                .map_or(Ok(position), usize::try_from)
                .ok()
                .filter(|i| *i <= self.tools.len())
                .ok_or_else(|| {
                    DispatchError::protocol(
                        &self.provider,
                        format!("tool call index out of sequence ({} known)", self.tools.len()),
                    )
                })?;
            if index == self.tools.len() {
                self.tools.push(PartialToolCall::default());
            }
            let slot = &mut self.tools[index];

            let id = fragment.get("id").and_then(Value::as_str).map(String::from);
            let name = fragment
                .pointer("/function/name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .map(String::from);
            let arguments = fragment
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .filter(|a| !a.is_empty())
                .map(String::from);

            if let Some(id) = &id {
                slot.id = id.clone();
            }
            if let Some(name) = &name {
                slot.name.push_str(name);
            }
            if let Some(arguments) = &arguments {
                slot.arguments.push_str(arguments);
            }

            deltas.push(CanonicalResponseDelta {
                tool_call: Some(ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                }),
                ..Default::default()
            });
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
            deltas.push(CanonicalResponseDelta {
                finish_reason: Some(reason.to_string()),
                ..Default::default()
            });
        }

        Ok(deltas)
    }

    fn push_anthropic(&mut self, event: &Value) -> Result<Vec<CanonicalResponseDelta>, DispatchError> {
        let kind = event.get("type").and_then(Value::as_str).unwrap_or_default();
        let mut deltas = Vec::new();

        match kind {
            "message_start" => {
                let message = event.get("message").unwrap_or(&Value::Null);
                self.id = message.get("id").and_then(Value::as_str).map(String::from);
                self.model = message.get("model").and_then(Value::as_str).map(String::from);
                if let Some(usage) = message
                    .get("usage")
                    .and_then(|u| serde_json::from_value::<AnthropicUsage>(u.clone()).ok())
                {
                    self.prompt_tokens = usage.input_tokens;
                }
            }
            "content_block_start" => {
                let block_index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                let block = event.get("content_block").unwrap_or(&Value::Null);
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => {
                        let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                        let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                        let position = self.tools.len();
                        self.tools.push(PartialToolCall {
                            id: id.to_string(),
                            name: name.to_string(),
                            arguments: String::new(),
                        });
                        self.tool_blocks.insert(block_index, position);
                        deltas.push(CanonicalResponseDelta {
                            tool_call: Some(ToolCallDelta {
                                index: position,
                                id: Some(id.to_string()),
                                name: Some(name.to_string()),
                                arguments: None,
                            }),
                            ..Default::default()
                        });
                    }
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str).filter(|t| !t.is_empty()) {
                            self.content.push_str(text);
                            deltas.push(CanonicalResponseDelta {
                                content: Some(text.to_string()),
                                ..Default::default()
                            });
                        }
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let block_index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                let delta = event.get("delta").unwrap_or(&Value::Null);
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            self.content.push_str(text);
                            deltas.push(CanonicalResponseDelta {
                                content: Some(text.to_string()),
                                ..Default::default()
                            });
                        }
                    }
                    Some("thinking_delta") => {
                        if let Some(text) = delta.get("thinking").and_then(Value::as_str) {
                            self.reasoning.push_str(text);
                            deltas.push(CanonicalResponseDelta {
                                reasoning_content: Some(text.to_string()),
                                ..Default::default()
                            });
                        }
                    }
                    Some("input_json_delta") => {
                        let partial = delta
                            .get("partial_json")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let position = *self.tool_blocks.get(&block_index).ok_or_else(|| {
                            DispatchError::protocol(
                                &self.provider,
                                format!("input_json_delta for unknown block {}", block_index),
                            )
                        })?;
                        self.tools[position].arguments.push_str(partial);
                        deltas.push(CanonicalResponseDelta {
                            tool_call: Some(ToolCallDelta {
                                index: position,
                                arguments: Some(partial.to_string()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        });
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                if let Some(reason) = event.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    let mapped = map_stop_reason(reason);
                    self.finish_reason = Some(mapped.clone());
                    deltas.push(CanonicalResponseDelta {
                        finish_reason: Some(mapped),
                        ..Default::default()
                    });
                }
                if let Some(output) = event.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                    self.usage = Some(UsageInfo::new(self.prompt_tokens, output as u32));
                }
            }
            "message_stop" => self.done = true,
            "error" => {
                let message = event
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown stream error");
                return Err(DispatchError::protocol(&self.provider, message));
            }
            // ping, content_block_stop
            _ => {}
        }

        Ok(deltas)
    }

    /// Assemble the final response once the event stream is exhausted.
    pub fn finish(self) -> Result<CanonicalResponse, DispatchError> {
        if !self.done && self.finish_reason.is_none() {
            return Err(DispatchError::protocol(
                &self.provider,
                "stream ended before completion",
            ));
        }

        let tool_calls = self
            .tools
            .into_iter()
            .filter(|t| !t.name.is_empty())
            .map(|t| {
                let id = if t.id.is_empty() { new_call_id() } else { t.id };
                let arguments = if t.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    t.arguments
                };
                ToolCall::new(id, t.name, arguments)
            })
            .collect();

        Ok(CanonicalResponse {
            id: self.id,
            model: self.model.unwrap_or_default(),
            content: (!self.content.is_empty()).then_some(self.content),
            tool_calls,
            inner_thoughts: None,
            reasoning_content: (!self.reasoning.is_empty()).then_some(self.reasoning),
            finish_reason: self.finish_reason,
            usage: self.usage,
        })
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
