//! HTTP transport: JSON round trips and SSE streams over a shared client.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use llmgate_core::types::CanonicalResponse;
use llmgate_core::utils::truncate_string;
use llmgate_core::DispatchError;

use crate::backends::{StreamProtocol, WireRequest};
use crate::streaming::StreamAccumulator;
use crate::traits::StreamSink;

/// Request timeout for the default client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest error body kept in log lines.
const MAX_LOGGED_BODY: usize = 500;

/// Connection-pooled HTTP client shared by all providers.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, provider: &str, request: &WireRequest) -> Result<reqwest::Response, DispatchError> {
        let response = self
            .client
            .post(&request.url)
            .headers(request.headers.clone())
            .json(&request.body)
            .send()
            .await
            .map_err(|e| {
                error!(provider, url = %request.url, error = %e, "HTTP request failed");
                DispatchError::Connection(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            warn!(
                provider,
                status = status.as_u16(),
                body = %truncate_string(&body, MAX_LOGGED_BODY),
                "API error"
            );
            return Err(DispatchError::Transport {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// POST `request` and decode the JSON reply.
    pub async fn post_json(&self, provider: &str, request: &WireRequest) -> Result<Value, DispatchError> {
        let response = self.send(provider, request).await?;
        let text = response
            .text()
            .await
            .map_err(|e| DispatchError::Connection(format!("failed to read response body: {}", e)))?;
        debug!(provider, bytes = text.len(), "Response received");

        serde_json::from_str(&text).map_err(|e| {
            DispatchError::protocol(
                provider,
                format!("response is not JSON ({}): {}", e, truncate_string(&text, MAX_LOGGED_BODY)),
            )
        })
    }

    /// POST `request` and consume the SSE reply, forwarding deltas to `sink`.
    ///
    /// `on_stream_start` fires only once the upstream accepted the request,
    /// so a rate-limited attempt never opens the sink. Once opened, the sink
    /// is always closed, whatever the outcome.
    pub async fn post_stream(
        &self,
        provider: &str,
        request: &WireRequest,
        protocol: StreamProtocol,
        sink: Option<&dyn StreamSink>,
        cancel: &CancellationToken,
    ) -> Result<CanonicalResponse, DispatchError> {
        let response = self.send(provider, request).await?;

        if let Some(sink) = sink {
            sink.on_stream_start();
        }
        let result = consume_stream(provider, response, protocol, sink, cancel).await;
        if let Some(sink) = sink {
            sink.on_stream_end();
        }
        result
    }
}

async fn consume_stream(
    provider: &str,
    response: reqwest::Response,
    protocol: StreamProtocol,
    sink: Option<&dyn StreamSink>,
    cancel: &CancellationToken,
) -> Result<CanonicalResponse, DispatchError> {
    let mut accumulator = StreamAccumulator::new(provider, protocol);
    let mut events = response.bytes_stream().eventsource();
    let mut chunks = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
            next = events.next() => next,
        };
        let Some(event) = next else {
            break;
        };
        let event = event.map_err(|e| DispatchError::Connection(format!("stream interrupted: {}", e)))?;

        for delta in accumulator.push(&event.data)? {
            chunks += 1;
            if let Some(sink) = sink {
                sink.on_chunk(&delta);
            }
        }
        if accumulator.is_done() {
            break;
        }
    }

    debug!(provider, chunks, "Stream finished");
    accumulator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_core::types::CanonicalResponseDelta;
    use serde_json::json;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl StreamSink for RecordingSink {
        fn on_stream_start(&self) {
            self.events.lock().unwrap().push("start".into());
        }

        fn on_chunk(&self, delta: &CanonicalResponseDelta) {
            let label = delta.content.clone().unwrap_or_else(|| "-".into());
            self.events.lock().unwrap().push(label);
        }

        fn on_stream_end(&self) {
            self.events.lock().unwrap().push("end".into());
        }
    }

    fn wire(server: &MockServer) -> WireRequest {
        WireRequest::new(format!("{}/v1/chat/completions", server.uri()), json!({"model": "m"}))
            .bearer(Some("sk-test"))
            .unwrap()
    }

    #[tokio::test]
    async fn test_post_json_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let body = HttpTransport::default()
            .post_json("openai", &wire(&server))
            .await
            .unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_post_json_maps_status_to_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = HttpTransport::default()
            .post_json("openai", &wire(&server))
            .await
            .unwrap_err();
        match err {
            DispatchError::Transport { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_post_json_rejects_non_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let err = HttpTransport::default()
            .post_json("openai", &wire(&server))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ProviderProtocol { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        let request = WireRequest::new("http://127.0.0.1:1/v1/chat/completions", json!({}));
        let err = HttpTransport::default()
            .post_json("openai", &request)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Connection(_)));
    }

    #[tokio::test]
    async fn test_stream_brackets_sink() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"id\":\"c1\",\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\" there\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let sink = RecordingSink::default();
        let response = HttpTransport::default()
            .post_stream(
                "openai",
                &wire(&server),
                StreamProtocol::OpenAi {
                    expect_reasoning_content: false,
                },
                Some(&sink),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.content.as_deref(), Some("Hi there"));
        let events = sink.events.lock().unwrap().clone();
        assert_eq!(events, vec!["start", "Hi", " there", "-", "end"]);
    }

    #[tokio::test]
    async fn test_stream_rejected_before_start_does_not_open_sink() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let sink = RecordingSink::default();
        let err = HttpTransport::default()
            .post_stream(
                "openai",
                &wire(&server),
                StreamProtocol::Anthropic,
                Some(&sink),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(429));
        assert!(sink.events.lock().unwrap().is_empty());
    }
}
