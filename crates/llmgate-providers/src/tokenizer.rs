//! Approximate token counting for the context-window precheck.

use llmgate_core::types::{Message, ToolDefinition};

use crate::traits::Tokenizer;

/// Framing tokens every chat message costs on top of its text.
const TOKENS_PER_MESSAGE: usize = 3;
/// Tokens that prime the assistant reply.
const REPLY_PRIMING_TOKENS: usize = 3;
/// Fixed overhead per function definition.
const TOKENS_PER_FUNCTION: usize = 12;

/// Character-based estimate: roughly four characters per token.
///
/// Errs on the high side for code and JSON, which is the safe direction for
/// a precheck that only exists to refuse hopeless requests early.
#[derive(Clone, Debug, Default)]
pub struct ApproxTokenizer;

impl ApproxTokenizer {
    fn estimate(text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

impl Tokenizer for ApproxTokenizer {
    fn count_tokens(&self, messages: &[Message], _model: &str) -> usize {
        let body: usize = messages
            .iter()
            .map(|msg| {
                let mut tokens = TOKENS_PER_MESSAGE + Self::estimate(&msg.text().unwrap_or_default());
                if let Message::Assistant {
                    tool_calls: Some(calls),
                    ..
                } = msg
                {
                    tokens += calls
                        .iter()
                        .map(|c| Self::estimate(&c.function.name) + Self::estimate(&c.function.arguments))
                        .sum::<usize>();
                }
                tokens
            })
            .sum();
        body + REPLY_PRIMING_TOKENS
    }

    fn count_function_tokens(&self, tools: &[ToolDefinition], _model: &str) -> usize {
        tools
            .iter()
            .map(|tool| {
                TOKENS_PER_FUNCTION
                    + Self::estimate(&tool.function.name)
                    + Self::estimate(&tool.function.description)
                    + Self::estimate(&tool.function.parameters.to_string())
            })
            .sum()
    }
}
