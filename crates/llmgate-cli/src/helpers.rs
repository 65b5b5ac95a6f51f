//! Terminal output: response printing and the streaming sink.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;

use llmgate_core::config::get_settings_path;
use llmgate_core::types::{CanonicalResponse, CanonicalResponseDelta};
use llmgate_core::utils::expand_home;
use llmgate_providers::StreamSink;

/// Settings file actually read: `--settings` when given, else the default.
pub fn effective_settings_path(flag: Option<&Path>) -> PathBuf {
    match flag {
        Some(path) => expand_home(&path.to_string_lossy()),
        None => get_settings_path(),
    }
}

/// Prints streamed text and reasoning to stdout as it arrives.
#[derive(Default)]
pub struct StdoutSink {
    in_reasoning: AtomicBool,
}

impl StreamSink for StdoutSink {
    fn on_stream_start(&self) {
        println!();
    }

    fn on_chunk(&self, delta: &CanonicalResponseDelta) {
        let mut out = std::io::stdout().lock();
        if let Some(reasoning) = &delta.reasoning_content {
            self.in_reasoning.store(true, Ordering::Relaxed);
            let _ = write!(out, "{}", reasoning.dimmed());
        }
        if let Some(text) = &delta.content {
            if self.in_reasoning.swap(false, Ordering::Relaxed) {
                let _ = writeln!(out);
            }
            let _ = write!(out, "{}", text);
        }
        let _ = out.flush();
    }

    fn on_stream_end(&self) {
        println!();
    }
}

/// Print a canonical response. Text already streamed is not repeated.
pub fn print_response(response: &CanonicalResponse, streamed: bool) {
    println!();
    println!("{}  {}", "llmgate".cyan().bold(), response.model.dimmed());

    if let Some(thoughts) = &response.inner_thoughts {
        println!("{} {}", "thinking:".dimmed(), thoughts.dimmed());
    }
    if !streamed {
        if let Some(reasoning) = &response.reasoning_content {
            println!("{} {}", "reasoning:".dimmed(), reasoning.dimmed());
        }
        match response.content.as_deref() {
            Some(text) if !text.is_empty() => println!("{}", text),
            _ if response.tool_calls.is_empty() => println!("{}", "(no response)".dimmed()),
            _ => {}
        }
    }
    for call in &response.tool_calls {
        println!(
            "{} {}({})",
            "→".green(),
            call.function.name.bold(),
            call.function.arguments
        );
    }

    if let Some(usage) = &response.usage {
        println!(
            "{}",
            format!(
                "tokens: {} prompt + {} completion = {} | finish: {}",
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens,
                response.finish_reason.as_deref().unwrap_or("-")
            )
            .dimmed()
        );
    }
    println!();
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_flag_overrides_default_path() {
        let path = effective_settings_path(Some(Path::new("/etc/llmgate/settings.json")));
        assert_eq!(path, PathBuf::from("/etc/llmgate/settings.json"));
    }

    #[test]
    fn test_settings_path_defaults_to_data_dir() {
        assert_eq!(effective_settings_path(None), get_settings_path());
    }

    #[test]
    fn test_settings_flag_expands_home() {
        let path = effective_settings_path(Some(Path::new("~/work/settings.json")));
        assert!(!path.starts_with("~"));
        assert!(path.ends_with("work/settings.json"));
    }
}
