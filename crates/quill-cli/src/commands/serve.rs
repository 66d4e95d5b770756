//! `quill serve` -- run the HTTP server.
//!
//! # Example
//!
//! ```text
//! quill serve --config quill.yml
//! quill serve --path models --port 5000 --emulate luis
//! ```

use std::sync::Arc;

use clap::Args;
use tracing::info;

use quill_server::api;
use quill_server::{DataRouter, ProcessExecutor};
use quill_types::config::ServerConfig;

use super::{load_server_config, registry};

/// Arguments for the `quill serve` subcommand.
#[derive(Args)]
pub struct ServeArgs {
    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    pub config: Option<String>,

    /// Model root directory.
    #[arg(long)]
    pub path: Option<String>,

    /// Interface to bind.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Output emulation mode (wit, luis).
    #[arg(long)]
    pub emulate: Option<String>,

    /// Maximum number of concurrent training workers.
    #[arg(long)]
    pub max_training_processes: Option<usize>,

    /// Directory for the query log.
    #[arg(long)]
    pub response_log: Option<String>,

    /// Remote model storage, e.g. `dir:/mnt/models`.
    #[arg(long)]
    pub storage: Option<String>,

    /// Projects whose latest model is loaded at start-up.
    #[arg(long)]
    pub pre_load: Vec<String>,
}

impl ServeArgs {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(path) = self.path {
            config.path = path;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.emulate.is_some() {
            config.emulate = self.emulate;
        }
        if let Some(n) = self.max_training_processes {
            config.max_training_processes = n;
        }
        if self.response_log.is_some() {
            config.response_log = self.response_log;
        }
        if self.storage.is_some() {
            config.storage = self.storage;
        }
        if !self.pre_load.is_empty() {
            config.pre_load = self.pre_load;
        }
        config
    }
}

/// Run the serve command until the process is stopped.
pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_server_config(args.config.as_deref())?;
    let config = args.apply(config);

    let executor = match &config.worker_program {
        Some(program) => ProcessExecutor::new(program),
        None => ProcessExecutor::current_exe()?,
    };
    info!(
        path = %config.model_root().display(),
        worker = %executor.program().display(),
        "starting quill server"
    );

    let router = DataRouter::new(config, registry(), Arc::new(executor)).await?;
    api::serve(Arc::new(router)).await?;
    Ok(())
}
