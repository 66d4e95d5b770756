//! Model serving for quill.
//!
//! - [`project`]: per-project model tables with lazy loading
//! - [`router`]: the [`DataRouter`] request dispatcher
//! - [`training`]: bounded training pool and worker executors
//! - [`worker`]: the `train-worker` side of the process protocol
//! - [`query_log`]: append-only JSONL log of parse results
//! - [`api`]: axum HTTP endpoints

pub mod api;
pub mod project;
pub mod query_log;
pub mod router;
pub mod training;
pub mod worker;

pub use project::{Project, ProjectInfo, ProjectStatus};
pub use router::{DataRouter, RouterStatus};
pub use training::{InProcessExecutor, ProcessExecutor, TrainingExecutor, TrainingHandle};
