//! Append-only query log.
//!
//! Each parse appends one JSON line `{time, project, model, user_input}` to
//! `quill_log-<timestamp>-<pid>.log` inside the configured directory. Write
//! failures are logged and otherwise ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use quill_core::metadata::timestamp;
use quill_types::Result;
use quill_types::message::ParseResult;

/// One logged query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub time: String,
    pub project: String,
    pub model: String,
    pub user_input: ParseResult,
}

/// JSONL sink for parse results.
#[derive(Debug)]
pub struct QueryLogger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl QueryLogger {
    /// Create the log directory and pick a file name for this process.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = format!("quill_log-{}-{}.log", timestamp(), std::process::id());
        let path = dir.join(file);
        info!(path = %path.display(), "logging requests");
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry.
    pub async fn log(&self, project: &str, model: &str, user_input: &ParseResult) {
        let entry = QueryLogEntry {
            time: chrono::Utc::now().to_rfc3339(),
            project: project.to_string(),
            model: model.to_string(),
            user_input: user_input.clone(),
        };
        if let Err(e) = self.append(&entry).await {
            warn!(path = %self.path.display(), error = %e, "failed to write query log");
        }
    }

    async fn append(&self, entry: &QueryLogEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_one_line_per_query() {
        let dir = tempfile::tempdir().unwrap();
        let logger = QueryLogger::new(&dir.path().join("logs")).unwrap();
        let name = logger.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("quill_log-"));
        assert!(name.ends_with(&format!("-{}.log", std::process::id())));

        logger.log("p1", "fallback", &ParseResult::empty("hello")).await;
        logger.log("p1", "model_x", &ParseResult::empty("bye")).await;

        let content = std::fs::read_to_string(logger.path()).unwrap();
        let entries: Vec<QueryLogEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].model, "fallback");
        assert_eq!(entries[1].user_input.text, "bye");
    }

    #[tokio::test]
    async fn write_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let logger = QueryLogger::new(dir.path()).unwrap();
        std::fs::create_dir_all(logger.path()).unwrap();
        logger.log("p1", "m", &ParseResult::empty("x")).await;
    }
}
