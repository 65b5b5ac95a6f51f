//! llmgate CLI entry point.
//!
//! # Commands
//!
//! - `llmgate chat --config AGENT.json [--tools TOOLS.json] [--stream] [--force-tool NAME] MESSAGE`
//! - `llmgate providers`: list supported providers and whether each is configured

mod chat;
mod helpers;
mod providers_cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Send chat completions to any supported LLM provider
#[derive(Parser)]
#[command(name = "llmgate", version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to ~/.llmgate/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch one message and print the normalized response
    Chat {
        /// Endpoint config JSON (model, endpoint type, context window, ...)
        #[arg(short, long)]
        config: PathBuf,

        /// JSON array of tool definitions
        #[arg(short, long)]
        tools: Option<PathBuf>,

        /// Stream tokens to stdout as they arrive
        #[arg(long, default_value_t = false)]
        stream: bool,

        /// Force the model to call this tool
        #[arg(long)]
        force_tool: Option<String>,

        /// Print the canonical response as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,

        /// User message
        message: String,
    },

    /// Show supported providers and their credential status
    Providers,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings_path = helpers::effective_settings_path(cli.settings.as_deref());
    let settings = llmgate_core::config::load_settings(Some(&settings_path));

    match cli.command {
        Commands::Chat {
            config,
            tools,
            stream,
            force_tool,
            json,
            logs,
            message,
        } => {
            init_logging(logs);
            let args = chat::ChatArgs {
                config,
                tools,
                stream,
                force_tool,
                json,
                message,
            };
            chat::run(settings, args).await
        }
        Commands::Providers => providers_cmd::run(&settings, &settings_path),
    }
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("llmgate_providers=debug,llmgate_core=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
