//! `llmgate providers`: supported providers and credential status.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use llmgate_core::config::Settings;
use llmgate_providers::registry::{is_configured, PROVIDERS};

pub fn run(settings: &Settings, settings_path: &Path) -> Result<()> {
    println!();
    println!("{}", "llmgate providers".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Settings:".bold(),
        settings_path.display(),
        if settings_path.exists() {
            "✓".green().to_string()
        } else {
            "(not found, using env)".dimmed().to_string()
        }
    );
    println!(
        "  {:<18} {}",
        "Retry:".bold(),
        format!(
            "max {} | initial {}ms | base {} | jitter {}",
            settings.retry.max_retries,
            settings.retry.initial_delay_ms,
            settings.retry.exponential_base,
            settings.retry.jitter
        )
        .dimmed()
    );

    println!();
    for spec in PROVIDERS {
        let status = if is_configured(spec, &settings.model) {
            format!("{} configured", "✓".green())
        } else {
            let hint = spec.env_key.map(|k| format!(" (set {})", k)).unwrap_or_default();
            format!("{}", format!("· not configured{}", hint).dimmed())
        };
        let streaming = if spec.supports_streaming { "stream" } else { "" };
        println!(
            "    {:<10} {:<20} {:<8} {}",
            spec.name,
            spec.display_name,
            streaming.dimmed(),
            status
        );
    }
    println!();

    Ok(())
}
