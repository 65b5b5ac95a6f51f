//! Dispatch error taxonomy.
//!
//! Every failure that reaches a caller of the dispatcher is one of these
//! variants, carrying enough structure to drive automated recovery
//! (summarization on context overflow) or an operator-facing message.

use thiserror::Error;

/// Errors produced while dispatching a chat completion.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Prompt plus tool definitions do not fit the model's context window.
    #[error(
        "request exceeds maximum context length ({} > {limit} tokens)",
        .prompt_tokens + .function_tokens
    )]
    ContextLengthExceeded {
        prompt_tokens: usize,
        function_tokens: usize,
        limit: usize,
    },

    #[error("{provider}: missing credential configuration ({})", .missing_fields.join(", "))]
    MissingCredential {
        provider: String,
        missing_fields: Vec<String>,
    },

    #[error("{provider}: {feature} is not supported")]
    UnsupportedFeature { provider: String, feature: String },

    #[error("maximum number of retries exceeded ({max_retries})")]
    RateLimitExceeded { max_retries: u32 },

    /// Upstream answered with a non-success HTTP status.
    #[error("upstream returned HTTP {status}: {body}")]
    Transport { status: u16, body: String },

    /// The request never produced an HTTP status (DNS, reset, timeout).
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request cancelled")]
    Cancelled,

    /// A provider response could not be mapped onto the canonical shape.
    #[error("{provider}: malformed response: {message}")]
    ProviderProtocol { provider: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl DispatchError {
    pub fn missing_credential(provider: impl Into<String>, fields: &[&str]) -> Self {
        DispatchError::MissingCredential {
            provider: provider.into(),
            missing_fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn unsupported(provider: impl Into<String>, feature: impl Into<String>) -> Self {
        DispatchError::UnsupportedFeature {
            provider: provider.into(),
            feature: feature.into(),
        }
    }

    pub fn protocol(provider: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::ProviderProtocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this is the context-overflow failure callers summarize on.
    pub fn is_context_overflow(&self) -> bool {
        matches!(self, DispatchError::ContextLengthExceeded { .. })
    }

    /// HTTP status carried by a transport failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            DispatchError::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a retry policy keyed on `codes` should retry this error.
    pub fn is_retryable(&self, codes: &[u16]) -> bool {
        self.status().map_or(false, |s| codes.contains(&s))
    }

    /// Short variant name for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::ContextLengthExceeded { .. } => "ContextLengthExceeded",
            DispatchError::MissingCredential { .. } => "MissingCredential",
            DispatchError::UnsupportedFeature { .. } => "UnsupportedFeature",
            DispatchError::RateLimitExceeded { .. } => "RateLimitExceeded",
            DispatchError::Transport { .. } => "Transport",
            DispatchError::Connection(_) => "Connection",
            DispatchError::Cancelled => "Cancelled",
            DispatchError::ProviderProtocol { .. } => "ProviderProtocol",
            DispatchError::Config(_) => "Config",
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_overflow_message_contains_total() {
        let err = DispatchError::ContextLengthExceeded {
            prompt_tokens: 7000,
            function_tokens: 1500,
            limit: 8192,
        };
        assert!(err.is_context_overflow());
        assert!(err
            .to_string()
            .contains("maximum context length (8500 > 8192 tokens)"));
    }

    #[test]
    fn test_missing_credential_lists_fields() {
        let err = DispatchError::missing_credential("azure", &["azure_api_key", "azure_base_url"]);
        assert_eq!(
            err.to_string(),
            "azure: missing credential configuration (azure_api_key, azure_base_url)"
        );
        assert!(!err.is_context_overflow());
    }

    #[test]
    fn test_retryable_only_for_listed_status() {
        let rate_limited = DispatchError::Transport {
            status: 429,
            body: "slow down".into(),
        };
        let server_error = DispatchError::Transport {
            status: 500,
            body: "boom".into(),
        };
        assert!(rate_limited.is_retryable(&[429]));
        assert!(!server_error.is_retryable(&[429]));
        assert!(!DispatchError::Cancelled.is_retryable(&[429]));
        assert!(!DispatchError::Connection("reset".into()).is_retryable(&[429]));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(DispatchError::Cancelled.kind(), "Cancelled");
        assert_eq!(
            DispatchError::RateLimitExceeded { max_retries: 3 }.kind(),
            "RateLimitExceeded"
        );
    }
}
