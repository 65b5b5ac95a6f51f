//! ChatML prompt wrapper for raw completion servers.
//!
//! Local servers take a single prompt string, so tool calling is emulated:
//! the available functions are listed in the system block and the model is
//! asked to answer with `{"function": ..., "params": {...}}`.

use serde_json::{Map, Value};

use llmgate_core::types::{Message, ToolDefinition};

use super::extract_json_object;

/// Name selecting this wrapper in `ProviderConfig::model_wrapper`.
pub const WRAPPER_NAME: &str = "chatml";

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";

/// Stop sequences that end the assistant turn.
pub const STOP_SEQUENCES: &[&str] = &[IM_END, IM_START];

const FUNCTION_PREAMBLE: &str = "Please select the most suitable function and parameters from the list of available functions below, based on the ongoing conversation. Provide your response in JSON format.";

fn describe_functions(tools: &[ToolDefinition]) -> String {
    let mut out = String::from(FUNCTION_PREAMBLE);
    out.push_str("\nAvailable functions:");
    for tool in tools {
        out.push_str(&format!("\n{}:", tool.function.name));
        if !tool.function.description.is_empty() {
            out.push_str(&format!("\n  description: {}", tool.function.description));
        }
        let Some(props) = tool.function.parameters.get("properties").and_then(Value::as_object) else {
            continue;
        };
        out.push_str("\n  params:");
        for (name, prop) in props {
            let detail = prop
                .get("description")
                .or_else(|| prop.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("");
            out.push_str(&format!("\n    {}: {}", name, detail));
        }
    }
    out
}

fn block(out: &mut String, role: &str, text: &str) {
    out.push_str(IM_START);
    out.push_str(role);
    out.push('\n');
    out.push_str(text);
    out.push_str(IM_END);
    out.push('\n');
}

/// Render `messages` and `tools` as one ChatML prompt, ending with an open
/// assistant turn.
pub fn build_prompt(messages: &[Message], tools: &[ToolDefinition]) -> String {
    let mut out = String::new();
    let functions = (!tools.is_empty()).then(|| describe_functions(tools));
    let mut functions_written = false;

    for msg in messages {
        match msg {
            Message::System { content } => {
                let mut text = content.clone();
                if let Some(functions) = functions.as_deref().filter(|_| !functions_written) {
                    text.push_str("\n\n");
                    text.push_str(functions);
                    functions_written = true;
                }
                block(&mut out, "system", &text);
            }
            Message::User { content } => block(&mut out, "user", &content.text()),
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => {
                let mut parts: Vec<String> = content.iter().cloned().collect();
                for call in tool_calls.iter().flatten() {
                    let params: Value = serde_json::from_str(&call.function.arguments)
                        .unwrap_or_else(|_| Value::Object(Map::new()));
                    parts.push(
                        serde_json::json!({ "function": call.function.name, "params": params })
                            .to_string(),
                    );
                }
                block(&mut out, "assistant", &parts.join("\n"));
            }
            Message::Tool { content, .. } => block(&mut out, "tool", content),
        }
    }

    if let Some(functions) = functions.filter(|_| !functions_written) {
        let mut prefixed = String::new();
        block(&mut prefixed, "system", &functions);
        out.insert_str(0, &prefixed);
    }

    out.push_str(IM_START);
    out.push_str("assistant\n");
    out
}

/// What the model produced: either a function call or plain text.
#[derive(Debug, PartialEq)]
pub enum ParsedOutput {
    Call { name: String, arguments: String },
    Text(String),
}

/// Interpret raw completion text.
pub fn parse_output(text: &str) -> ParsedOutput {
    let trimmed = text.trim().trim_end_matches(IM_END).trim();
    if let Some(object) = extract_json_object(trimmed) {
        if let Some(name) = object.get("function").and_then(Value::as_str) {
            let arguments = match object.get("params") {
                Some(params @ Value::Object(_)) => params.to_string(),
                _ => "{}".to_string(),
            };
            return ParsedOutput::Call {
                name: name.to_string(),
                arguments,
            };
        }
    }
    ParsedOutput::Text(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_support::send_message_tool;
    use llmgate_core::types::ToolCall;

    #[test]
    fn test_prompt_lists_functions_in_system_block() {
        let prompt = build_prompt(
            &[Message::system("You are Sam."), Message::user("hi")],
            &[send_message_tool()],
        );
        assert!(prompt.starts_with("<|im_start|>system\nYou are Sam.\n\nPlease select"));
        assert!(prompt.contains("send_message:\n  description: Sends a message to the human user."));
        assert!(prompt.contains("    message: Message contents."));
        assert!(prompt.contains("<|im_start|>user\nhi<|im_end|>"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn test_prompt_without_system_message_still_lists_functions() {
        let prompt = build_prompt(&[Message::user("hi")], &[send_message_tool()]);
        assert!(prompt.starts_with("<|im_start|>system\nPlease select"));
    }

    #[test]
    fn test_prompt_renders_past_calls_as_json() {
        let prompt = build_prompt(
            &[Message::assistant_tool_calls(vec![ToolCall::new(
                "c1",
                "send_message",
                r#"{"message":"hey"}"#,
            )])],
            &[],
        );
        assert!(prompt.contains(r#"{"function":"send_message","params":{"message":"hey"}}"#));
    }

    #[test]
    fn test_parse_function_call() {
        let parsed = parse_output(
            " {\"function\": \"send_message\", \"params\": {\"inner_thoughts\": \"hm\", \"message\": \"hi\"}}<|im_end|>",
        );
        assert_eq!(
            parsed,
            ParsedOutput::Call {
                name: "send_message".into(),
                arguments: r#"{"inner_thoughts":"hm","message":"hi"}"#.into(),
            }
        );
    }

    #[test]
    fn test_parse_plain_text() {
        assert_eq!(parse_output("  hello there "), ParsedOutput::Text("hello there".into()));
    }
}
