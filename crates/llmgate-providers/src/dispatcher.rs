//! The dispatcher: one entry point for every provider.
//!
//! A call runs through a fixed pipeline:
//!
//! 1. context-window precheck against the tokenizer
//! 2. tool-choice resolution and provider feature gating
//! 3. backend preparation on a call-scoped plan
//! 4. credential resolution (no network until this succeeds)
//! 5. request build, then transport under the backoff policy
//! 6. normalization, inner-thoughts unpacking, telemetry

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use llmgate_core::config::schema::{ModelSettings, ProviderConfig, Settings};
use llmgate_core::types::{
    Actor, CanonicalResponse, Message, ProviderTraceRecord, ToolChoice, ToolDefinition,
};
use llmgate_core::DispatchError;

use crate::backends::{
    default_backends, CallPlan, Credential, ProviderBackend, WireRequest, PLACEHOLDER_API_KEY,
};
use crate::backoff::{BackoffExecutor, BackoffPolicy};
use crate::inner_thoughts;
use crate::registry::ProviderSpec;
use crate::tokenizer::ApproxTokenizer;
use crate::traits::{CredentialResolver, StreamSink, TelemetrySink, Tokenizer};
use crate::transport::HttpTransport;

// ─────────────────────────────────────────────
// Per-call options
// ─────────────────────────────────────────────

/// Per-call knobs that are not part of the endpoint config.
#[derive(Clone)]
pub struct DispatchOptions {
    /// Stream tokens through `stream_sink` as they arrive.
    pub stream: bool,
    /// Explicit tool-choice policy. Defaults to `Required` (or `Auto` for
    /// proxy endpoints) whenever tools are supplied.
    pub function_call: Option<ToolChoice>,
    /// Force the model to call this tool (Anthropic family).
    pub force_tool_call: Option<String>,
    /// `false` selects the legacy `functions` request fields.
    pub use_tool_naming: bool,
    pub put_inner_thoughts_first: bool,
    /// End-user identifier forwarded upstream.
    pub user_id: Option<String>,
    /// Caller label for logs.
    pub name: Option<String>,
    pub step_id: Option<String>,
    pub actor: Option<Actor>,
    pub stream_sink: Option<Arc<dyn StreamSink>>,
    pub cancel: CancellationToken,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            stream: false,
            function_call: None,
            force_tool_call: None,
            use_tool_naming: true,
            put_inner_thoughts_first: true,
            user_id: None,
            name: None,
            step_id: None,
            actor: None,
            stream_sink: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for DispatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchOptions")
            .field("stream", &self.stream)
            .field("function_call", &self.function_call)
            .field("force_tool_call", &self.force_tool_call)
            .field("use_tool_naming", &self.use_tool_naming)
            .field("step_id", &self.step_id)
            .field("has_sink", &self.stream_sink.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────
// ProviderDispatcher
// ─────────────────────────────────────────────

/// Routes chat completion requests to the backend for their provider kind.
///
/// Holds no per-call state, so one dispatcher serves concurrent calls.
pub struct ProviderDispatcher {
    settings: ModelSettings,
    backoff: BackoffExecutor,
    transport: HttpTransport,
    tokenizer: Arc<dyn Tokenizer>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    credentials: Option<Arc<dyn CredentialResolver>>,
    backends: HashMap<&'static str, Arc<dyn ProviderBackend>>,
}

impl std::fmt::Debug for ProviderDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDispatcher")
            .field("backoff", self.backoff.policy())
            .field("backends", &self.backends.len())
            .field("telemetry", &self.telemetry.is_some())
            .field("credentials", &self.credentials.is_some())
            .finish()
    }
}

impl ProviderDispatcher {
    pub fn new(settings: Settings) -> Self {
        Self {
            backoff: BackoffExecutor::new(BackoffPolicy::from(&settings.retry)),
            settings: settings.model,
            transport: HttpTransport::default(),
            tokenizer: Arc::new(ApproxTokenizer),
            telemetry: None,
            credentials: None,
            backends: default_backends(),
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn with_credential_resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = Some(resolver);
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.transport = HttpTransport::new(client);
        self
    }

    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = BackoffExecutor::new(policy);
        self
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// Send one chat completion to the provider `config` names and return
    /// its normalized response.
    pub async fn dispatch(
        &self,
        config: &ProviderConfig,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: DispatchOptions,
    ) -> Result<CanonicalResponse, DispatchError> {
        self.check_context_window(config, messages, tools)?;

        let kind = config.model_endpoint_type;
        let backend = self
            .backends
            .get(kind.name())
            .cloned()
            .ok_or_else(|| DispatchError::Config(format!("no backend registered for '{}'", kind)))?;
        let spec = backend.spec();

        if options.stream && !spec.supports_streaming {
            return Err(DispatchError::unsupported(spec.name, "streaming"));
        }
        if spec.requires_tool_calling && !options.use_tool_naming {
            return Err(DispatchError::unsupported(spec.name, "non-tool mode"));
        }

        let mut plan = CallPlan {
            config: config.clone(),
            settings: &self.settings,
            messages: Cow::Borrowed(messages),
            tools,
            tool_choice: self.resolve_tool_choice(config, tools, &options),
            force_tool_call: options.force_tool_call.clone(),
            stream: options.stream,
            use_tool_naming: options.use_tool_naming,
            put_inner_thoughts_first: options.put_inner_thoughts_first,
            user_id: options.user_id.clone(),
        };
        backend.prepare(&mut plan)?;

        let protocol = if plan.stream {
            Some(
                backend
                    .stream_protocol(&plan)
                    .ok_or_else(|| DispatchError::unsupported(spec.name, "streaming"))?,
            )
        } else {
            None
        };

        let api_key = self.resolve_credential(backend.as_ref(), &plan, &options).await?;
        let wire = backend.build(&plan, api_key.as_deref())?;

        info!(
            provider = spec.display_name,
            model = %plan.config.model,
            caller = options.name.as_deref().unwrap_or("-"),
            messages = plan.messages.len(),
            tools = tools.len(),
            stream = plan.stream,
            "Dispatching chat completion"
        );

        let response = match protocol {
            Some(protocol) => {
                let transport = &self.transport;
                let wire = &wire;
                let sink = options.stream_sink.as_deref();
                let cancel = &options.cancel;
                self.backoff
                    .run(cancel, move || {
                        transport.post_stream(spec.name, wire, protocol, sink, cancel)
                    })
                    .await?
            }
            None => {
                let sink = options.stream_sink.as_deref();
                if let Some(sink) = sink {
                    sink.on_stream_start();
                }
                let transport = &self.transport;
                let wire_ref = &wire;
                let body = self
                    .backoff
                    .run(&options.cancel, move || transport.post_json(spec.name, wire_ref))
                    .await;
                if let Some(sink) = sink {
                    sink.on_stream_end();
                }
                backend.normalize(&plan, body?)?
            }
        };

        let mut response = backend.finalize(&plan, response)?;
        if plan.inner_thoughts_in_kwargs() {
            response = inner_thoughts::unpack_response(spec.name, response)?;
        }

        debug!(
            provider = spec.display_name,
            has_content = response.content.is_some(),
            tool_calls = response.tool_calls.len(),
            finish_reason = response.finish_reason.as_deref().unwrap_or("?"),
            "LLM response received"
        );

        if spec.records_traces {
            self.record_trace(spec, &plan, &wire, &response, &options).await;
        }
        Ok(response)
    }

    fn check_context_window(
        &self,
        config: &ProviderConfig,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<(), DispatchError> {
        let prompt_tokens = self.tokenizer.count_tokens(messages, &config.model);
        let function_tokens = if tools.is_empty() {
            0
        } else {
            self.tokenizer.count_function_tokens(tools, &config.model)
        };

        if prompt_tokens + function_tokens > config.context_window {
            warn!(
                model = %config.model,
                prompt_tokens,
                function_tokens,
                limit = config.context_window,
                "Request exceeds context window"
            );
            return Err(DispatchError::ContextLengthExceeded {
                prompt_tokens,
                function_tokens,
                limit: config.context_window,
            });
        }
        Ok(())
    }

    /// Effective tool choice: none without tools, the caller's choice when
    /// given, otherwise `required`, relaxed to `auto` for endpoints that
    /// proxy other models (they often reject forced tool use).
    fn resolve_tool_choice(
        &self,
        config: &ProviderConfig,
        tools: &[ToolDefinition],
        options: &DispatchOptions,
    ) -> Option<ToolChoice> {
        if tools.is_empty() {
            return None;
        }
        if let Some(choice) = &options.function_call {
            return Some(choice.clone());
        }

        let is_proxy = config.endpoint().is_some_and(|endpoint| {
            self.settings
                .proxy_endpoints
                .iter()
                .any(|proxy| endpoint.trim_end_matches('/') == proxy.trim_end_matches('/'))
        });
        let is_vllm = config
            .handle
            .as_deref()
            .is_some_and(|handle| handle.contains("vllm"));

        if is_proxy || is_vllm {
            Some(ToolChoice::Auto)
        } else {
            Some(ToolChoice::Required)
        }
    }

    async fn resolve_credential(
        &self,
        backend: &dyn ProviderBackend,
        plan: &CallPlan<'_>,
        options: &DispatchOptions,
    ) -> Result<Option<String>, DispatchError> {
        let provider = backend.spec().name;
        match backend.credential(plan)? {
            Credential::ApiKey(key) => Ok(Some(key)),
            Credential::Placeholder => Ok(Some(PLACEHOLDER_API_KEY.to_string())),
            Credential::Anonymous => Ok(None),
            Credential::ResolveOverride => {
                let label = plan.config.provider_label();
                let Some(resolver) = &self.credentials else {
                    return Err(DispatchError::missing_credential(provider, &["byok_api_key"]));
                };
                match resolver.resolve_api_key(&label, options.actor.as_ref()).await {
                    Ok(Some(key)) if !key.trim().is_empty() => Ok(Some(key)),
                    Ok(_) => Err(DispatchError::missing_credential(provider, &["byok_api_key"])),
                    Err(e) => Err(DispatchError::Config(format!(
                        "credential lookup for '{}' failed: {}",
                        label, e
                    ))),
                }
            }
        }
    }

    async fn record_trace(
        &self,
        spec: &ProviderSpec,
        plan: &CallPlan<'_>,
        wire: &WireRequest,
        response: &CanonicalResponse,
        options: &DispatchOptions,
    ) {
        let Some(sink) = &self.telemetry else {
            return;
        };
        let response_json = match serde_json::to_value(response) {
            Ok(value) => value,
            Err(e) => {
                warn!(provider = spec.name, error = %e, "Failed to encode response for trace");
                return;
            }
        };
        let record = ProviderTraceRecord {
            provider: spec.name.to_string(),
            model: plan.config.model.clone(),
            request_json: wire.body.clone(),
            response_json,
            step_id: options.step_id.clone(),
            organization_id: options.actor.as_ref().map(|a| a.organization_id.clone()),
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = sink.record_trace(record).await {
            warn!(provider = spec.name, error = %e, "Failed to record provider trace");
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
