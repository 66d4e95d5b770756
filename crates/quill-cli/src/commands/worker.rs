//! `quill train-worker` -- serve one training job for the server.

use quill_server::training::WorkerOutcome;
use quill_server::worker::run_worker;

use super::registry;

/// Read a job from stdin and write the outcome to stdout.
///
/// Exits with an error status when training failed.
pub async fn run() -> anyhow::Result<()> {
    let outcome = run_worker(tokio::io::stdin(), tokio::io::stdout(), registry()).await?;
    if let WorkerOutcome::Error(message) = outcome {
        anyhow::bail!("training failed: {message}");
    }
    Ok(())
}
