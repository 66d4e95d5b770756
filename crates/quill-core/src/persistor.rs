//! Remote model storage.
//!
//! Models trained by one server can be shared through a [`RemoteStorage`]
//! backend mirroring `<root>/<project>/<model>/`. Callers treat listing
//! failures as "nothing there" and only propagate a failed `retrieve` of an
//! explicitly requested model.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use quill_types::{QuillError, Result};

/// Storage backend for trained models.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Project names present in storage.
    async fn list_projects(&self) -> Result<Vec<String>>;

    /// Model ids stored for `project`.
    async fn list_models(&self, project: &str) -> Result<Vec<String>>;

    /// Download `project/model` into `target` (the local model directory).
    async fn retrieve(&self, model: &str, project: &str, target: &Path) -> Result<()>;

    /// Upload the local `model_dir` as `project/model`.
    async fn persist(&self, model_dir: &Path, model: &str, project: &str) -> Result<()>;
}

/// Parse a storage spec such as `dir:/mnt/models`.
pub fn create_storage(spec: Option<&str>) -> Result<Option<Arc<dyn RemoteStorage>>> {
    let Some(spec) = spec.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    match spec.split_once(':') {
        Some(("dir", root)) if !root.is_empty() => Ok(Some(Arc::new(DirStorage::new(root)))),
        _ => Err(QuillError::config(format!(
            "unsupported storage '{spec}', expected 'dir:<path>'"
        ))),
    }
}

/// List the non-hidden subdirectory names of `dir`, sorted.
pub fn list_subdirectories(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_dir() && !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Recursively copy `from` into `to`.
pub fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| QuillError::Storage { message: e.to_string() })?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| QuillError::Storage { message: e.to_string() })?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn storage_error(e: tokio::task::JoinError) -> QuillError {
    QuillError::Storage {
        message: format!("storage task failed: {e}"),
    }
}

/// A directory acting as remote storage, e.g. a network mount.
#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    /// Storage rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl RemoteStorage for DirStorage {
    async fn list_projects(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_subdirectories(&root))
            .await
            .map_err(storage_error)?
    }

    async fn list_models(&self, project: &str) -> Result<Vec<String>> {
        let dir = self.root.join(project);
        tokio::task::spawn_blocking(move || list_subdirectories(&dir))
            .await
            .map_err(storage_error)?
    }

    async fn retrieve(&self, model: &str, project: &str, target: &Path) -> Result<()> {
        let source = self.root.join(project).join(model);
        if !source.is_dir() {
            return Err(QuillError::Storage {
                message: format!("model '{model}' of project '{project}' is not in storage"),
            });
        }
        debug!(source = %source.display(), target = %target.display(), "retrieving model");
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || copy_dir(&source, &target))
            .await
            .map_err(storage_error)?
    }

    async fn persist(&self, model_dir: &Path, model: &str, project: &str) -> Result<()> {
        let target = self.root.join(project).join(model);
        info!(project = %project, model = %model, target = %target.display(), "uploading model");
        let source = model_dir.to_path_buf();
        tokio::task::spawn_blocking(move || copy_dir(&source, &target))
            .await
            .map_err(storage_error)?
    }
}
