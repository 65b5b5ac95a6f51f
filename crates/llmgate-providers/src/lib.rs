//! Provider dispatch layer for llmgate.
//!
//! One call surface over every supported LLM API family.
//!
//! # Architecture
//!
//! - [`dispatcher::ProviderDispatcher`]: the entry point; gating, credentials, retries, telemetry
//! - [`backends`]: per-provider request builders and response normalizers
//! - [`registry`]: static specs for the supported providers
//! - [`backoff`]: exponential backoff with jitter for rate-limited calls
//! - [`streaming`]: SSE chunk accumulation into canonical responses
//! - [`inner_thoughts`]: moving reasoning text in and out of tool arguments
//! - [`traits`]: collaborator seams (credentials, telemetry, stream sink, tokenizer)

pub mod backends;
pub mod backoff;
pub mod dispatcher;
pub mod inner_thoughts;
pub mod registry;
pub mod streaming;
pub mod tokenizer;
pub mod traits;
pub mod transport;

pub use backoff::{BackoffExecutor, BackoffPolicy};
pub use dispatcher::{DispatchOptions, ProviderDispatcher};
pub use registry::{ProviderSpec, PROVIDERS};
pub use tokenizer::ApproxTokenizer;
pub use traits::{CredentialResolver, StreamSink, TelemetrySink, Tokenizer};
