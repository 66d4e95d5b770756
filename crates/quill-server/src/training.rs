//! Training orchestration.
//!
//! [`TrainingOrchestrator`] runs [`TrainingJob`]s on a pool bounded by a
//! semaphore. The work itself is delegated to a [`TrainingExecutor`]: the
//! [`ProcessExecutor`] spawns `<program> train-worker` and speaks JSON over
//! stdin/stdout, the [`InProcessExecutor`] trains on a blocking thread.
//!
//! Completion is reported exactly once through a [`TrainingHandle`]. The
//! project's model table is updated (or its status reset) before the handle
//! resolves.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Semaphore, oneshot};
use tracing::{info, warn};

use quill_core::ComponentRegistry;
use quill_core::train::TrainingJob;
use quill_types::{QuillError, Result};

use crate::project::Project;

/// Subcommand a worker program is started with.
pub const WORKER_SUBCOMMAND: &str = "train-worker";

/// Result line written by a training worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerOutcome {
    /// Directory of the persisted model.
    Ok(PathBuf),
    /// Failure description.
    Error(String),
}

impl From<Result<PathBuf>> for WorkerOutcome {
    fn from(result: Result<PathBuf>) -> Self {
        match result {
            Ok(dir) => Self::Ok(dir),
            Err(e) => Self::Error(e.to_string()),
        }
    }
}

fn training_error(project: &str, message: impl Into<String>) -> QuillError {
    QuillError::Training {
        project: project.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

/// Runs one training job to completion.
#[async_trait]
pub trait TrainingExecutor: Send + Sync {
    /// Train, persist and upload. Returns the model directory.
    async fn execute(&self, job: TrainingJob) -> Result<PathBuf>;
}

/// Trains on a blocking thread of the current runtime.
///
/// A panicking component is reported as a training failure.
pub struct InProcessExecutor {
    registry: Arc<ComponentRegistry>,
}

impl InProcessExecutor {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `job` on a blocking thread, turning a panic into an error.
pub async fn run_blocking(job: &TrainingJob, registry: Arc<ComponentRegistry>) -> Result<PathBuf> {
    let project = job.project.clone();
    let blocking_job = job.clone();
    match tokio::task::spawn_blocking(move || blocking_job.run(&registry)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic().as_ref());
            Err(training_error(&project, format!("training panicked: {message}")))
        }
        Err(e) => Err(training_error(&project, format!("training task failed: {e}"))),
    }
}

#[async_trait]
impl TrainingExecutor for InProcessExecutor {
    async fn execute(&self, job: TrainingJob) -> Result<PathBuf> {
        let dir = run_blocking(&job, Arc::clone(&self.registry)).await?;
        job.upload(&dir).await;
        Ok(dir)
    }
}

/// Trains in a child process started as `<program> train-worker`.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: PathBuf,
}

impl ProcessExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use the running executable as the worker program.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// Find the worker outcome in a worker's stdout: the last line that parses.
pub fn parse_worker_output(stdout: &[u8]) -> Option<WorkerOutcome> {
    String::from_utf8_lossy(stdout)
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .find_map(|l| serde_json::from_str(l).ok())
}

#[async_trait]
impl TrainingExecutor for ProcessExecutor {
    async fn execute(&self, job: TrainingJob) -> Result<PathBuf> {
        let payload = serde_json::to_vec(&job)?;
        let mut child = tokio::process::Command::new(&self.program)
            .arg(WORKER_SUBCOMMAND)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                training_error(
                    &job.project,
                    format!("failed to start worker '{}': {e}", self.program.display()),
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // An early exit closes the pipe; the exit status is reported below.
            if let Err(e) = async {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await
            }
            .await
            {
                warn!(project = %job.project, error = %e, "failed to send job to worker");
            }
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| training_error(&job.project, format!("failed to wait for worker: {e}")))?;

        match parse_worker_output(&output.stdout) {
            Some(WorkerOutcome::Ok(dir)) if output.status.success() => Ok(dir),
            Some(WorkerOutcome::Error(message)) => Err(training_error(&job.project, message)),
            _ => Err(training_error(
                &job.project,
                format!("worker exited with {} without reporting a model", output.status),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Resolves once the training run has finished and the project was updated.
#[derive(Debug)]
pub struct TrainingHandle {
    project: String,
    rx: oneshot::Receiver<Result<String>>,
}

impl TrainingHandle {
    /// Project being trained.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Wait for the new model id.
    pub async fn wait(self) -> Result<String> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(training_error(&self.project, "training task ended without a result")),
        }
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded pool of training runs.
pub struct TrainingOrchestrator {
    executor: Arc<dyn TrainingExecutor>,
    permits: Arc<Semaphore>,
    capacity: usize,
    active: Arc<AtomicUsize>,
    timeout: Option<Duration>,
}

impl TrainingOrchestrator {
    /// Pool of `capacity` (at least one) concurrent runs.
    pub fn new(executor: Arc<dyn TrainingExecutor>, capacity: usize, timeout: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            executor,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(AtomicUsize::new(0)),
            timeout,
        }
    }

    /// Maximum number of concurrent runs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Runs currently executing.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Start `job` for `project`, which must already be marked as training.
    pub fn submit(&self, job: TrainingJob, project: Arc<Project>) -> TrainingHandle {
        let (tx, rx) = oneshot::channel();
        let name = job.project.clone();
        let executor = Arc::clone(&self.executor);
        let permits = Arc::clone(&self.permits);
        let active = Arc::clone(&self.active);
        let timeout = self.timeout;

        tokio::spawn(async move {
            let project_name = job.project.clone();
            let run = async {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| training_error(&project_name, "training pool is closed"))?;
                let _active = ActiveGuard::enter(&active);
                info!(project = %project_name, "training started");
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, executor.execute(job))
                        .await
                        .unwrap_or_else(|_| {
                            Err(training_error(
                                &project_name,
                                format!("training exceeded {}s", limit.as_secs()),
                            ))
                        }),
                    None => executor.execute(job).await,
                }
            };

            let outcome = match run.await {
                Ok(model_dir) => {
                    let model = model_dir
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    project.update(&model).await;
                    info!(project = %project_name, model = %model, "training finished");
                    Ok(model)
                }
                Err(e) => {
                    project.set_idle();
                    warn!(project = %project_name, error = %e, "training failed");
                    Err(match e {
                        e @ QuillError::Training { .. } => e,
                        other => training_error(&project_name, other.to_string()),
                    })
                }
            };
            let _ = tx.send(outcome);
        });

        TrainingHandle { project: name, rx }
    }
}

impl std::fmt::Debug for TrainingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingOrchestrator")
            .field("capacity", &self.capacity)
            .field("active", &self.active())
            .field("timeout", &self.timeout)
            .finish()
    }
}
