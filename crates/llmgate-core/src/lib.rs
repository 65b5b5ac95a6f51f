//! Core types, configuration, and errors for llmgate.
//!
//! - [`types`]: provider-neutral messages, tool definitions, the canonical response
//! - [`config`]: per-agent [`config::ProviderConfig`] and process [`config::Settings`]
//! - [`error`]: the [`error::DispatchError`] taxonomy

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use error::DispatchError;
