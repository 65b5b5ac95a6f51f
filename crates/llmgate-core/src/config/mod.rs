//! Configuration system: schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use llmgate_core::config;
//!
//! let settings = config::load_settings(None);
//! println!("Max retries: {}", settings.retry.max_retries);
//! ```

pub mod loader;
pub mod schema;

// Re-export key types
pub use loader::{get_settings_path, load_provider_config, load_settings};
pub use schema::{
    LocalAuthType, LocalBackend, ModelSettings, ProviderCategory, ProviderConfig, ProviderKind,
    RetrySettings, Settings,
};
