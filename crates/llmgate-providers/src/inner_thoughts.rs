//! Inner thoughts carried as a tool argument.
//!
//! Some providers drop assistant text when a tool call is made. To keep the
//! model's reasoning, every tool schema gains a required `inner_thoughts`
//! string argument, past assistant text is moved into that argument on the
//! way out, and the argument is popped back off on the way in.

use serde_json::{Map, Value};
use tracing::warn;

use llmgate_core::types::{CanonicalResponse, Message, ToolDefinition};
use llmgate_core::DispatchError;

/// Name of the synthetic tool argument.
pub const INNER_THOUGHTS_KWARG: &str = "inner_thoughts";

/// Schema description shown to the model for the synthetic argument.
pub const INNER_THOUGHTS_DESCRIPTION: &str = "Deep inner monologue private to you only.";

// ─────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────

/// Copy `tools` with a required `inner_thoughts` property added to each.
///
/// The property goes first in both `properties` and `required` when
/// `put_first` is set, last otherwise. Tools that already declare it are
/// left as they are.
pub fn add_to_tools(tools: &[ToolDefinition], put_first: bool) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|tool| {
            let mut tool = tool.clone();
            tool.function.parameters = add_to_schema(&tool.function.parameters, put_first);
            tool
        })
        .collect()
}

fn add_to_schema(parameters: &Value, put_first: bool) -> Value {
    let mut schema = match parameters {
        Value::Object(map) => map.clone(),
        _ => {
            let mut map = Map::new();
            map.insert("type".into(), Value::from("object"));
            map
        }
    };

    let existing = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if existing.contains_key(INNER_THOUGHTS_KWARG) {
        return Value::Object(schema);
    }

    let thoughts = serde_json::json!({
        "type": "string",
        "description": INNER_THOUGHTS_DESCRIPTION,
    });
    let mut properties = Map::new();
    if put_first {
        properties.insert(INNER_THOUGHTS_KWARG.into(), thoughts);
        properties.extend(existing);
    } else {
        properties.extend(existing);
        properties.insert(INNER_THOUGHTS_KWARG.into(), thoughts);
    }
    schema.insert("properties".into(), Value::Object(properties));

    let mut required = schema
        .get("required")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if put_first {
        required.insert(0, Value::from(INNER_THOUGHTS_KWARG));
    } else {
        required.push(Value::from(INNER_THOUGHTS_KWARG));
    }
    schema.insert("required".into(), Value::Array(required));

    Value::Object(schema)
}

/// Insert `thoughts` into a JSON arguments string.
///
/// Returns `None` when the arguments are not a JSON object.
pub fn pack_arguments(arguments: &str, thoughts: &str, put_first: bool) -> Option<String> {
    let parsed: Value = if arguments.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(arguments).ok()?
    };
    let Value::Object(existing) = parsed else {
        return None;
    };

    let mut packed = Map::new();
    if put_first {
        packed.insert(INNER_THOUGHTS_KWARG.into(), Value::from(thoughts));
        packed.extend(existing.into_iter().filter(|(k, _)| k != INNER_THOUGHTS_KWARG));
    } else {
        packed.extend(existing.into_iter().filter(|(k, _)| k != INNER_THOUGHTS_KWARG));
        packed.insert(INNER_THOUGHTS_KWARG.into(), Value::from(thoughts));
    }
    serde_json::to_string(&Value::Object(packed)).ok()
}

/// Copy `messages`, moving assistant text into the `inner_thoughts`
/// argument of that turn's tool calls.
///
/// Assistant turns without tool calls keep their text. If any call on a
/// turn has non-object arguments the turn is copied unchanged.
pub fn pack_messages(messages: &[Message], put_first: bool) -> Vec<Message> {
    messages
        .iter()
        .map(|msg| match msg {
            Message::Assistant {
                content: Some(text),
                tool_calls: Some(calls),
                reasoning_content,
            } if !text.is_empty() && !calls.is_empty() => {
                let mut packed_calls = Vec::with_capacity(calls.len());
                for call in calls {
                    match pack_arguments(&call.function.arguments, text, put_first) {
                        Some(arguments) => {
                            let mut call = call.clone();
                            call.function.arguments = arguments;
                            packed_calls.push(call);
                        }
                        None => {
                            warn!(
                                tool_call_id = %call.id,
                                "Tool call arguments are not a JSON object, leaving message text in place"
                            );
                            return msg.clone();
                        }
                    }
                }
                Message::Assistant {
                    content: None,
                    tool_calls: Some(packed_calls),
                    reasoning_content: reasoning_content.clone(),
                }
            }
            other => other.clone(),
        })
        .collect()
}

// ─────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────

/// Pop `inner_thoughts` out of every tool call into
/// [`CanonicalResponse::inner_thoughts`].
///
/// Tool call arguments that are not valid JSON are a protocol error: the
/// model was told to produce JSON and did not.
pub fn unpack_response(
    provider: &str,
    mut response: CanonicalResponse,
) -> Result<CanonicalResponse, DispatchError> {
    let mut recovered: Option<String> = None;

    for call in &mut response.tool_calls {
        if call.function.arguments.trim().is_empty() {
            continue;
        }
        let parsed: Value = serde_json::from_str(&call.function.arguments).map_err(|e| {
            DispatchError::protocol(
                provider,
                format!(
                    "tool call '{}' has invalid JSON arguments: {}",
                    call.function.name, e
                ),
            )
        })?;
        let Value::Object(args) = parsed else {
            continue;
        };
        let Some(thoughts) = args.get(INNER_THOUGHTS_KWARG).cloned() else {
            continue;
        };
        let args: Map<String, Value> = args
            .into_iter()
            .filter(|(k, _)| k != INNER_THOUGHTS_KWARG)
            .collect();

        match thoughts {
            Value::String(text) => {
                if recovered.is_none() {
                    recovered = Some(text);
                } else if recovered.as_deref() != Some(text.as_str()) {
                    warn!(
                        tool = %call.function.name,
                        "Multiple tool calls carried different inner thoughts, keeping the first"
                    );
                }
            }
            other => {
                warn!(tool = %call.function.name, value = %other, "Non-string inner thoughts dropped");
            }
        }

        call.function.arguments = Value::Object(args).to_string();
    }

    if recovered.is_some() {
        response.inner_thoughts = recovered;
    }
    Ok(response)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
