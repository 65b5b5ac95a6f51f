//! Core types for llmgate: the provider-neutral conversation model and the
//! canonical response shape every upstream is normalized into.
//!
//! Messages and tool definitions follow the OpenAI chat completions format,
//! which doubles as the wire format for every OpenAI-compatible provider.
//! Providers with a different wire shape (Anthropic, Bedrock, local
//! completion servers) translate from these types in their own builders.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Messages (OpenAI chat completions format)
// ─────────────────────────────────────────────

/// A chat message in the OpenAI format.
///
/// Each variant maps to a `role` field value. Messages are owned by the
/// caller; the dispatcher only ever reads them or builds new lists.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System { content: String },

    #[serde(rename = "user")]
    User { content: MessageContent },

    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
        /// Reasoning/thinking content from models like DeepSeek-R1.
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
    },

    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    /// Create a user message with text content.
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a user message with multipart content (text + images).
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Message::User {
            content: MessageContent::Parts(parts),
        }
    }

    /// Create an assistant message with text content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: None,
            reasoning_content: None,
        }
    }

    /// Create an assistant message with tool calls (no text content).
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content: None,
            tool_calls: Some(tool_calls),
            reasoning_content: None,
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    /// The role string as it appears on the wire.
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    /// Plain text of the message, with multipart text segments joined.
    ///
    /// Returns `None` for assistant turns that only carry tool calls.
    pub fn text(&self) -> Option<String> {
        match self {
            Message::System { content } | Message::Tool { content, .. } => Some(content.clone()),
            Message::User { content } => Some(content.text()),
            Message::Assistant { content, .. } => content.clone(),
        }
    }

    /// Return a copy of this message with `suffix` appended to its text.
    ///
    /// Multipart user content gets the suffix on its first text part (or a
    /// new text part when there is none).
    pub fn with_appended_text(&self, suffix: &str) -> Message {
        let mut msg = self.clone();
        match &mut msg {
            Message::System { content } | Message::Tool { content, .. } => content.push_str(suffix),
            Message::User { content } => match content {
                MessageContent::Text(text) => text.push_str(suffix),
                MessageContent::Parts(parts) => {
                    let first_text = parts.iter_mut().find_map(|p| match p {
                        ContentPart::Text { text } => Some(text),
                        _ => None,
                    });
                    match first_text {
                        Some(text) => text.push_str(suffix),
                        None => parts.push(ContentPart::Text {
                            text: suffix.to_string(),
                        }),
                    }
                }
            },
            Message::Assistant { content, .. } => {
                content.get_or_insert_with(String::new).push_str(suffix)
            }
        }
        msg
    }
}

// ─────────────────────────────────────────────
// Message Content (text or multipart/vision)
// ─────────────────────────────────────────────

/// User message content: either plain text or multipart (for vision/images).
///
/// When serialized: text becomes a plain string, parts become an array of objects.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content (most common case).
    Text(String),
    /// Multipart content with text and/or images (for vision models).
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of all text segments.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A single part of a multipart message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Text part.
    #[serde(rename = "text")]
    Text { text: String },
    /// Image URL part (can be a URL or base64 data URI).
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image URL payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ─────────────────────────────────────────────
// Tool Calls (function calling)
// ─────────────────────────────────────────────

/// A tool call from the assistant, requesting execution of a function.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique ID for this tool call (used to match results).
    pub id: String,
    /// Always "function" in current OpenAI API.
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    /// The function to call.
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Create a new tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        ToolCall {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// The function name and arguments within a tool call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    /// Name of the function/tool to call.
    pub name: String,
    /// JSON-encoded arguments string.
    pub arguments: String,
}

// ─────────────────────────────────────────────
// Tool Definitions (for LLM requests)
// ─────────────────────────────────────────────

/// Definition of a tool, sent to the LLM so it knows what tools are available.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Always "function".
    #[serde(rename = "type")]
    pub tool_type: String,
    /// The function schema.
    pub function: FunctionDefinition,
}

/// Schema of a function tool.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Value,
    /// OpenAI structured-output flag; absent unless a builder turns it on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
                strict: None,
            },
        }
    }

    /// Tool name shortcut.
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Tool-choice policy for a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    Auto,
    /// The model must call some tool.
    Required,
    /// Tool calling disabled for this turn.
    None,
    /// The model must call the named tool.
    Function(String),
}

impl ToolChoice {
    /// OpenAI `tool_choice` representation.
    pub fn to_openai(&self) -> Value {
        match self {
            ToolChoice::Auto => Value::from("auto"),
            ToolChoice::Required => Value::from("required"),
            ToolChoice::None => Value::from("none"),
            ToolChoice::Function(name) => serde_json::json!({
                "type": "function",
                "function": { "name": name }
            }),
        }
    }

    /// Legacy `function_call` representation (pre tool-naming API).
    pub fn to_legacy_function_call(&self) -> Value {
        match self {
            ToolChoice::Auto | ToolChoice::Required => Value::from("auto"),
            ToolChoice::None => Value::from("none"),
            ToolChoice::Function(name) => serde_json::json!({ "name": name }),
        }
    }
}

// ─────────────────────────────────────────────
// Canonical response
// ─────────────────────────────────────────────

/// The single normalized result shape returned for every provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CanonicalResponse {
    /// Upstream response id, when the provider returns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Model that produced the response.
    pub model: String,
    /// Text content from the assistant (None if only tool calls).
    pub content: Option<String>,
    /// Tool calls requested by the assistant.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Reasoning text recovered from the `inner_thoughts` tool argument.
    pub inner_thoughts: Option<String>,
    /// Reasoning text delivered through a dedicated wire field
    /// (DeepSeek `reasoning_content`, Anthropic thinking blocks).
    pub reasoning_content: Option<String>,
    /// Why the model stopped generating.
    pub finish_reason: Option<String>,
    /// Token usage statistics.
    pub usage: Option<UsageInfo>,
}

impl CanonicalResponse {
    /// Whether the response contains tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage statistics from the LLM.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl UsageInfo {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        UsageInfo {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One incremental chunk of a streaming response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CanonicalResponseDelta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_call: Option<ToolCallDelta>,
    pub finish_reason: Option<String>,
}

/// A fragment of a tool call arriving over a stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolCallDelta {
    /// Position of the tool call within the response.
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Partial JSON arguments.
    pub arguments: Option<String>,
}

// ─────────────────────────────────────────────
// Caller identity and telemetry
// ─────────────────────────────────────────────

/// Opaque identity of the caller on whose behalf a request is made.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub id: String,
    pub organization_id: String,
}

/// One audit entry per upstream call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderTraceRecord {
    pub provider: String,
    pub model: String,
    pub request_json: Value,
    pub response_json: Value,
    pub step_id: Option<String>,
    pub organization_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// ─────────────────────────────────────────────
// OpenAI-compatible wire types
// ─────────────────────────────────────────────

/// Request body for an OpenAI-compatible chat completion API.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Legacy function-calling fields, used when tool naming is off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<HashMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

/// Raw chat completion response from an OpenAI-compatible API.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    pub usage: Option<UsageInfo>,
}

/// A single choice in a chat completion response.
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: AssistantMessage,
    pub finish_reason: Option<String>,
}

/// The assistant message within a chat completion choice.
#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Legacy single function call (pre tool-naming API).
    #[serde(default)]
    pub function_call: Option<FunctionCall>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_message_serialization() {
        let msg = Message::system("You are a helpful assistant.");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "You are a helpful assistant.");
    }

    #[test]
    fn test_user_multipart_message_serialization() {
        let msg = Message::user_parts(vec![
            ContentPart::Text {
                text: "What's in this image?".to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:image/png;base64,abc123".to_string(),
                    detail: Some("high".to_string()),
                },
            },
        ]);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "user");
        let content = json["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,abc123");
    }

    #[test]
    fn test_assistant_tool_calls_serialization() {
        let msg = Message::assistant_tool_calls(vec![ToolCall::new(
            "call_123",
            "send_message",
            r#"{"message": "hi"}"#,
        )]);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "assistant");
        assert!(json.get("content").is_none());
        assert!(json.get("reasoning_content").is_none());
        let calls = json["tool_calls"].as_array().unwrap();
        assert_eq!(calls[0]["type"], "function");
        assert_eq!(calls[0]["function"]["name"], "send_message");
    }

    #[test]
    fn test_tool_call_deserialization_defaults_type() {
        let call: ToolCall = serde_json::from_value(json!({
            "id": "call_1",
            "function": { "name": "f", "arguments": "{}" }
        }))
        .unwrap();
        assert_eq!(call.call_type, "function");
    }

    #[test]
    fn test_message_text_joins_parts() {
        let msg = Message::user_parts(vec![
            ContentPart::Text { text: "a".into() },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "https://x/y.png".into(),
                    detail: None,
                },
            },
            ContentPart::Text { text: "b".into() },
        ]);
        assert_eq!(msg.text().as_deref(), Some("a\nb"));
        assert!(Message::assistant_tool_calls(vec![]).text().is_none());
    }

    #[test]
    fn test_with_appended_text_leaves_original_untouched() {
        let original = Message::system("base");
        let extended = original.with_appended_text(" + more");

        assert_eq!(original, Message::system("base"));
        assert_eq!(extended, Message::system("base + more"));
    }

    #[test]
    fn test_with_appended_text_on_parts_without_text() {
        let msg = Message::user_parts(vec![ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: "https://x/y.png".into(),
                detail: None,
            },
        }]);
        let extended = msg.with_appended_text("hint");
        assert_eq!(extended.text().as_deref(), Some("hint"));
    }

    #[test]
    fn test_tool_choice_wire_forms() {
        assert_eq!(ToolChoice::Required.to_openai(), json!("required"));
        assert_eq!(
            ToolChoice::Function("send_message".into()).to_openai(),
            json!({"type": "function", "function": {"name": "send_message"}})
        );
        assert_eq!(ToolChoice::Required.to_legacy_function_call(), json!("auto"));
    }

    #[test]
    fn test_chat_request_skips_unset_fields() {
        let request = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![Message::user("Hello")],
            max_tokens: Some(1024),
            ..Default::default()
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["max_tokens"], 1024);
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
        assert!(json.get("logit_bias").is_none());
        assert!(json.get("n").is_none());
    }

    #[test]
    fn test_chat_completion_response_parsing() {
        let resp: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "content": null,
                    "function_call": { "name": "legacy", "arguments": "{}" }
                },
                "finish_reason": "function_call"
            }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5 }
        }))
        .unwrap();

        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.choices[0].message.function_call.as_ref().unwrap().name, "legacy");
        assert_eq!(resp.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn test_usage_new_sums_total() {
        let usage = UsageInfo::new(10, 5);
        assert_eq!(usage.total_tokens, 15);
    }
}
