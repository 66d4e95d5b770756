//! `quill` -- CLI binary for the quill intent classification framework.
//!
//! Provides the following subcommands:
//!
//! - `quill serve` -- Start the HTTP server.
//! - `quill train` -- Train a model and persist it.
//! - `quill parse` -- Parse text with a persisted model.
//! - `quill evaluate` -- Score a persisted model against labelled data.
//! - `quill convert` -- Convert training data between formats.

use clap::{Parser, Subcommand};

mod commands;

/// quill intent classification and entity extraction CLI.
#[derive(Parser)]
#[command(name = "quill", about = "quill intent classification CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve(commands::serve::ServeArgs),

    /// Train a model and persist it.
    Train(commands::train::TrainArgs),

    /// Parse text with a persisted model.
    Parse(commands::parse::ParseArgs),

    /// Score a persisted model against labelled data.
    Evaluate(commands::evaluate::EvaluateArgs),

    /// Convert training data between rasa JSON and markdown.
    Convert(commands::convert::ConvertArgs),

    /// Run one training job read from stdin (used by the server).
    #[command(name = "train-worker", hide = true)]
    TrainWorker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output and the worker protocol.
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args).await?,
        Commands::Train(args) => commands::train::run(args)?,
        Commands::Parse(args) => commands::parse::run(args)?,
        Commands::Evaluate(args) => commands::evaluate::run(args)?,
        Commands::Convert(args) => commands::convert::run(args)?,
        Commands::TrainWorker => commands::worker::run().await?,
    }

    Ok(())
}
