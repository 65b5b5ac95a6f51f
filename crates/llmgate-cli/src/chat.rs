//! `llmgate chat`: one dispatch from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use llmgate_core::config::{load_provider_config, Settings};
use llmgate_core::types::{Message, ProviderTraceRecord, ToolDefinition};
use llmgate_core::utils::expand_home;
use llmgate_providers::{DispatchOptions, ProviderDispatcher, StreamSink, TelemetrySink};

use crate::helpers::{self, StdoutSink};

pub struct ChatArgs {
    pub config: PathBuf,
    pub tools: Option<PathBuf>,
    pub stream: bool,
    pub force_tool: Option<String>,
    pub json: bool,
    pub message: String,
}

/// Writes provider traces to the log instead of a store.
struct LogTelemetry;

#[async_trait]
impl TelemetrySink for LogTelemetry {
    async fn record_trace(&self, record: ProviderTraceRecord) -> anyhow::Result<()> {
        info!(
            provider = %record.provider,
            model = %record.model,
            request_bytes = record.request_json.to_string().len(),
            response_bytes = record.response_json.to_string().len(),
            "Provider trace"
        );
        Ok(())
    }
}

pub async fn run(settings: Settings, args: ChatArgs) -> Result<()> {
    let config_path = expand_home(&args.config.to_string_lossy());
    let config = load_provider_config(&config_path)
        .with_context(|| format!("failed to load endpoint config {}", config_path.display()))?;
    let tools = match &args.tools {
        Some(path) => load_tools(&expand_home(&path.to_string_lossy()))?,
        None => Vec::new(),
    };

    let dispatcher = ProviderDispatcher::new(settings).with_telemetry(Arc::new(LogTelemetry));

    let options = DispatchOptions {
        stream: args.stream,
        force_tool_call: args.force_tool,
        stream_sink: args.stream.then(|| Arc::new(StdoutSink::default()) as Arc<dyn StreamSink>),
        name: Some("cli".into()),
        ..Default::default()
    };

    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let messages = vec![Message::user(args.message)];
    let response = dispatcher
        .dispatch(&config, &messages, &tools, options)
        .await
        .with_context(|| format!("{} request failed", config.model_endpoint_type))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        helpers::print_response(&response, args.stream);
    }
    Ok(())
}

/// Read a JSON array of tool definitions.
pub fn load_tools(path: &Path) -> Result<Vec<ToolDefinition>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid tool list in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_tools() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"type":"function","function":{{"name":"send_message","description":"Reply","parameters":{{"type":"object","properties":{{}}}}}}}}]"#
        )
        .unwrap();

        let tools = load_tools(file.path()).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "send_message");
    }

    #[test]
    fn test_load_tools_rejects_object() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name":"send_message"}}"#).unwrap();
        assert!(load_tools(file.path()).is_err());
    }
}
