//! Projects: named groups of trained models.
//!
//! A [`Project`] owns a table of model ids. Entries start unloaded and are
//! loaded lazily on first use, so a table entry is either a placeholder for
//! a model that exists on disk (or in remote storage) or a loaded [`Model`].
//!
//! The table sits behind a write-preferring [`RwLock`]: parses hold the read
//! side for the whole resolve, load and invoke sequence, while `update`,
//! `unload` and re-scans take the write side. Each entry carries its own
//! [`OnceCell`] so concurrent readers asking for the same unloaded id share a
//! single load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use quill_core::metadata::METADATA_FILE;
use quill_core::persistor::{RemoteStorage, list_subdirectories};
use quill_core::{ComponentRegistry, Model};
use quill_types::message::ParseResult;
use quill_types::{QuillError, Result};

/// Id of the keyword-backed model used when nothing is trained.
pub const FALLBACK_MODEL_NAME: &str = "fallback";

const MODEL_NAME_PREFIX: &str = "model_";
const MODEL_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Whether a project is serving only or has a training run in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ProjectStatus {
    Ready = 0,
    Training = 1,
}

impl ProjectStatus {
    /// Numeric form: 0 idle, 1 training.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Status snapshot of one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub status: ProjectStatus,
    pub available_models: Vec<String>,
    pub loaded_models: Vec<String>,
}

#[derive(Default)]
struct ModelSlot {
    model: OnceCell<Arc<Model>>,
}

impl ModelSlot {
    fn unloaded() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn loaded(model: Model) -> Arc<Self> {
        Arc::new(Self {
            model: OnceCell::new_with(Some(Arc::new(model))),
        })
    }

    fn is_loaded(&self) -> bool {
        self.model.initialized()
    }
}

type ModelTable = BTreeMap<String, Arc<ModelSlot>>;

/// Parse the timestamp out of a `model_YYYYmmdd-HHMMSS` id.
pub fn model_timestamp(name: &str) -> Option<NaiveDateTime> {
    let stamp = name.strip_prefix(MODEL_NAME_PREFIX)?;
    NaiveDateTime::parse_from_str(stamp, MODEL_TIMESTAMP_FORMAT).ok()
}

/// Pick the model served when a request names none.
///
/// The newest timestamped id wins; without one, the fallback model when
/// present, otherwise the lexicographically greatest id.
pub fn latest_model_name<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let names: Vec<&str> = names.into_iter().collect();
    if let Some((_, name)) = names
        .iter()
        .filter_map(|n| model_timestamp(n).map(|ts| (ts, *n)))
        .max()
    {
        return Some(name.to_string());
    }
    if names.contains(&FALLBACK_MODEL_NAME) {
        return Some(FALLBACK_MODEL_NAME.to_string());
    }
    names.iter().max().map(|n| n.to_string())
}

/// A named group of models sharing a directory `<root>/<name>/`.
pub struct Project {
    name: String,
    dir: PathBuf,
    registry: Arc<ComponentRegistry>,
    storage: Option<Arc<dyn RemoteStorage>>,
    models: RwLock<ModelTable>,
    training: AtomicBool,
}

impl Project {
    /// Open the project `name` under `root`, discovering its models.
    pub async fn open(
        name: impl Into<String>,
        root: &Path,
        registry: Arc<ComponentRegistry>,
        storage: Option<Arc<dyn RemoteStorage>>,
    ) -> Self {
        let name = name.into();
        let project = Self {
            dir: root.join(&name),
            name,
            registry,
            storage,
            models: RwLock::new(ModelTable::new()),
            training: AtomicBool::new(false),
        };
        let found = project.search_for_models().await;
        {
            let mut table = project.models.write().await;
            project.merge_found(&mut table, found);
        }
        project
    }

    /// Project name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local directory of the project's models.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current status.
    pub fn status(&self) -> ProjectStatus {
        if self.training.load(Ordering::Acquire) {
            ProjectStatus::Training
        } else {
            ProjectStatus::Ready
        }
    }

    /// Move from ready to training. Fails if a run is already in flight.
    pub fn begin_training(&self) -> Result<()> {
        self.training
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| QuillError::AlreadyTraining {
                project: self.name.clone(),
            })
    }

    /// Return to ready without touching the model table.
    pub fn set_idle(&self) {
        self.training.store(false, Ordering::Release);
    }

    /// Parse `text` with the requested model, or the latest one.
    ///
    /// Returns the result and the id of the model that produced it.
    pub async fn parse(
        &self,
        text: &str,
        time: Option<String>,
        requested_model: Option<&str>,
    ) -> Result<(ParseResult, String)> {
        self.with_model(requested_model, |model| model.parse(text, time))
            .await
    }

    /// Make sure the latest model is loaded. Returns its id.
    pub async fn load_model(&self) -> Result<String> {
        let ((), name) = self.with_model(None, |_| Ok(())).await?;
        Ok(name)
    }

    /// Mark `model_name` as (re)trained so the next use loads it from disk.
    ///
    /// Also returns the project to ready.
    pub async fn update(&self, model_name: &str) {
        let mut table = self.models.write().await;
        table.insert(model_name.to_string(), ModelSlot::unloaded());
        if model_name != FALLBACK_MODEL_NAME && !self.dir.join(FALLBACK_MODEL_NAME).is_dir() {
            table.remove(FALLBACK_MODEL_NAME);
        }
        self.set_idle();
        info!(project = %self.name, model = %model_name, "model updated");
    }

    /// Drop the loaded instance of `model_name`, keeping the id known.
    pub async fn unload(&self, model_name: &str) -> Result<String> {
        let mut table = self.models.write().await;
        if !table.contains_key(model_name) {
            return Err(QuillError::ModelNotFound {
                project: self.name.clone(),
                model: model_name.to_string(),
            });
        }
        table.insert(model_name.to_string(), ModelSlot::unloaded());
        info!(project = %self.name, model = %model_name, "model unloaded");
        Ok(model_name.to_string())
    }

    /// Snapshot of status and model ids.
    pub async fn as_info(&self) -> ProjectInfo {
        let table = self.models.read().await;
        ProjectInfo {
            status: self.status(),
            available_models: table.keys().cloned().collect(),
            loaded_models: table
                .iter()
                .filter(|(_, slot)| slot.is_loaded())
                .map(|(name, _)| name.clone())
                .collect(),
        }
    }

    async fn with_model<R>(
        &self,
        requested: Option<&str>,
        f: impl FnOnce(&Model) -> Result<R>,
    ) -> Result<(R, String)> {
        let table = self.models.read().await;
        let (table, name) = match resolve(&table, requested) {
            Some(name) => (table, name),
            None => {
                drop(table);
                self.rescan_and_resolve(requested).await?
            }
        };
        let slot = table.get(&name).cloned().ok_or_else(|| self.not_found(&name))?;
        let model = slot
            .model
            .get_or_try_init(|| self.load_from_storage(&name))
            .await?
            .clone();
        let output = f(model.as_ref())?;
        drop(table);
        Ok((output, name))
    }

    async fn rescan_and_resolve(
        &self,
        requested: Option<&str>,
    ) -> Result<(RwLockReadGuard<'_, ModelTable>, String)> {
        debug!(project = %self.name, model = ?requested, "model not in table, searching storage");
        let found = self.search_for_models().await;
        let mut table = self.models.write().await;
        self.merge_found(&mut table, found);
        let table = table.downgrade();
        match resolve(&table, requested) {
            Some(name) => Ok((table, name)),
            None => Err(self.not_found(requested.unwrap_or("latest"))),
        }
    }

    fn not_found(&self, model: &str) -> QuillError {
        QuillError::ModelNotFound {
            project: self.name.clone(),
            model: model.to_string(),
        }
    }

    /// Model ids present locally or in remote storage.
    async fn search_for_models(&self) -> Vec<String> {
        let mut names = match list_subdirectories(&self.dir) {
            Ok(names) => names,
            Err(e) => {
                warn!(project = %self.name, error = %e, "failed to list local models");
                Vec::new()
            }
        };
        if let Some(storage) = &self.storage {
            match storage.list_models(&self.name).await {
                Ok(remote) => names.extend(remote),
                Err(e) => warn!(project = %self.name, error = %e, "failed to list remote models"),
            }
        }
        names.sort();
        names.dedup();
        names
    }

    fn merge_found(&self, table: &mut ModelTable, found: Vec<String>) {
        for name in found {
            table.entry(name).or_insert_with(ModelSlot::unloaded);
        }
        if table.is_empty() {
            match Model::fallback(&self.registry) {
                Ok(model) => {
                    debug!(project = %self.name, "no trained models, serving the fallback model");
                    table.insert(FALLBACK_MODEL_NAME.to_string(), ModelSlot::loaded(model));
                }
                Err(e) => warn!(project = %self.name, error = %e, "cannot build fallback model"),
            }
        }
    }

    async fn load_from_storage(&self, name: &str) -> Result<Arc<Model>> {
        if name == FALLBACK_MODEL_NAME && !self.dir.join(name).is_dir() {
            return Model::fallback(&self.registry).map(Arc::new);
        }
        let model_dir = self.dir.join(name);
        if !model_dir.join(METADATA_FILE).is_file() {
            match &self.storage {
                Some(storage) => self.download(storage.as_ref(), name, &model_dir).await?,
                None if !model_dir.is_dir() => return Err(self.not_found(name)),
                None => {}
            }
        }
        info!(project = %self.name, model = %name, "loading model");
        let registry = Arc::clone(&self.registry);
        let model = tokio::task::spawn_blocking(move || Model::load(&model_dir, &registry))
            .await
            .map_err(std::io::Error::other)??;
        Ok(Arc::new(model))
    }

    /// Retrieve `name` into a hidden sibling of `model_dir` and move it into
    /// place once complete. A failed download leaves nothing behind.
    async fn download(&self, storage: &dyn RemoteStorage, name: &str, model_dir: &Path) -> Result<()> {
        let partial = self.dir.join(format!(".{name}.partial"));
        remove_if_present(&partial)?;
        if let Err(e) = storage.retrieve(name, &self.name, &partial).await {
            warn!(project = %self.name, model = %name, error = %e, "model download failed");
            if let Err(cleanup) = remove_if_present(&partial) {
                warn!(path = %partial.display(), error = %cleanup, "failed to remove partial download");
            }
            return Err(e);
        }
        remove_if_present(model_dir)?;
        std::fs::rename(&partial, model_dir)?;
        debug!(project = %self.name, model = %name, "downloaded model from storage");
        Ok(())
    }

    #[cfg(test)]
    async fn hold_read_lock(&self) -> RwLockReadGuard<'_, ModelTable> {
        self.models.read().await
    }
}

fn remove_if_present(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

fn resolve(table: &ModelTable, requested: Option<&str>) -> Option<String> {
    match requested {
        Some(name) => table.contains_key(name).then(|| name.to_string()),
        None => latest_model_name(table.keys().map(String::as_str)),
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("status", &self.status())
            .finish()
    }
}
