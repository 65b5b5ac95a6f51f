//! Collaborator traits the dispatcher calls out to.
//!
//! None of these are implemented against a concrete store here: the host
//! application supplies a credential vault, a trace store, a token counter
//! and a stream consumer. Async hooks use `async_trait` so they can be held
//! as `Arc<dyn Trait>`.

use async_trait::async_trait;

use llmgate_core::types::{
    Actor, CanonicalResponseDelta, Message, ProviderTraceRecord, ToolDefinition,
};

/// Looks up bring-your-own-key credentials at call time.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Override key for `provider_name` on behalf of `actor`, if one is stored.
    async fn resolve_api_key(
        &self,
        provider_name: &str,
        actor: Option<&Actor>,
    ) -> anyhow::Result<Option<String>>;
}

/// Receives one audit record per successful upstream call.
///
/// Failures are logged by the dispatcher and never fail the call.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record_trace(&self, record: ProviderTraceRecord) -> anyhow::Result<()>;
}

/// Consumes normalized chunks while a response is produced.
///
/// `on_stream_start` and `on_stream_end` bracket every call made with a
/// sink attached, streaming or not.
pub trait StreamSink: Send + Sync {
    fn on_stream_start(&self) {}

    fn on_chunk(&self, delta: &CanonicalResponseDelta);

    fn on_stream_end(&self) {}
}

/// Counts prompt tokens for the context-window precheck.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, messages: &[Message], model: &str) -> usize;

    fn count_function_tokens(&self, tools: &[ToolDefinition], model: &str) -> usize;
}
