//! Training worker side of the process protocol.
//!
//! Reads one JSON [`TrainingJob`] from `input`, trains it, uploads the model
//! and writes one [`WorkerOutcome`] line to `output`.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info};

use quill_core::ComponentRegistry;
use quill_core::train::TrainingJob;
use quill_types::Result;

use crate::training::{WorkerOutcome, run_blocking};

async fn train_from<R: AsyncRead + Unpin>(input: &mut R, registry: Arc<ComponentRegistry>) -> Result<std::path::PathBuf> {
    let mut payload = Vec::new();
    input.read_to_end(&mut payload).await?;
    let job: TrainingJob = serde_json::from_slice(&payload)?;
    info!(project = %job.project, "worker received training job");
    let dir = run_blocking(&job, registry).await?;
    job.upload(&dir).await;
    Ok(dir)
}

/// Serve one job. Returns the outcome that was written.
pub async fn run_worker<R, W>(mut input: R, mut output: W, registry: Arc<ComponentRegistry>) -> Result<WorkerOutcome>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let outcome = WorkerOutcome::from(train_from(&mut input, registry).await);
    if let WorkerOutcome::Error(message) = &outcome {
        error!(error = %message, "training worker failed");
    }
    let mut line = serde_json::to_vec(&outcome)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_types::config::ModelConfig;
    use quill_types::message::Message;
    use quill_types::training::TrainingData;

    #[tokio::test]
    async fn worker_trains_and_reports_directory() {
        let root = tempfile::tempdir().unwrap();
        let data = TrainingData::new(
            vec![
                Message::training_example("hello", Some("greet".into()), vec![]),
                Message::training_example("bye", Some("goodbye".into()), vec![]),
            ],
            Default::default(),
            vec![],
        );
        let job = TrainingJob::new("p1", ModelConfig::from_template("bag_of_words").unwrap(), &data, root.path()).unwrap();
        let input = serde_json::to_vec(&job).unwrap();

        let mut output = Vec::new();
        let outcome = run_worker(&input[..], &mut output, Arc::new(ComponentRegistry::with_builtins()))
            .await
            .unwrap();

        let WorkerOutcome::Ok(dir) = outcome else {
            panic!("expected a model directory");
        };
        assert!(dir.starts_with(root.path().join("p1")));
        let written: WorkerOutcome = serde_json::from_slice(output.trim_ascii()).unwrap();
        assert_eq!(written, WorkerOutcome::Ok(dir));
    }

    #[tokio::test]
    async fn malformed_job_reports_error() {
        let mut output = Vec::new();
        let outcome = run_worker(&b"not json"[..], &mut output, Arc::new(ComponentRegistry::with_builtins()))
            .await
            .unwrap();
        assert!(matches!(outcome, WorkerOutcome::Error(_)));
        assert!(String::from_utf8(output).unwrap().starts_with("{\"error\""));
    }
}
