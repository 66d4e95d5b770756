//! CLI command implementations for `quill`.
//!
//! - [`serve`] -- HTTP server.
//! - [`train`] -- One-off training.
//! - [`parse`] -- Parse text with a model directory.
//! - [`evaluate`] -- Evaluate a model directory.
//! - [`convert`] -- Training data conversion.
//! - [`worker`] -- Training worker process.

pub mod convert;
pub mod evaluate;
pub mod parse;
pub mod serve;
pub mod train;
pub mod worker;

use std::path::Path;
use std::sync::Arc;

use quill_core::ComponentRegistry;
use quill_types::config::ServerConfig;

/// The registry used by every command: the built-in components.
pub fn registry() -> Arc<ComponentRegistry> {
    Arc::new(ComponentRegistry::with_builtins())
}

/// Load server configuration from an explicit path or via discovery
/// (`QUILL_CONFIG`, then `./quill.yml`, then defaults).
pub fn load_server_config(config_override: Option<&str>) -> anyhow::Result<ServerConfig> {
    if let Some(path) = config_override
        && !Path::new(path).is_file()
    {
        anyhow::bail!("config file not found: {path}");
    }
    Ok(ServerConfig::discover(config_override.map(Path::new))?)
}
