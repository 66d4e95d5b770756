//! Training entry points.
//!
//! [`do_train`] trains and persists a model synchronously. A [`TrainingJob`]
//! is the serializable unit of work handed to a training worker; running it
//! also uploads the result to remote storage when one is configured.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use quill_types::config::ModelConfig;
use quill_types::training::TrainingData;
use quill_types::{QuillError, Result};

use crate::persistor::create_storage;
use crate::pipeline::{Model, Pipeline};
use crate::registry::ComponentRegistry;
use crate::training_data;

/// Check that `name` is usable as a single directory name under the model
/// root: one normal path segment that is not hidden and has no separators
/// or control characters.
pub fn validate_path_segment(kind: &str, name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    let unsafe_char = name.chars().any(|c| matches!(c, '/' | '\\') || c.is_control());
    if !single || name.starts_with('.') || unsafe_char {
        return Err(QuillError::config(format!(
            "invalid {kind} name '{name}', expected a single directory name"
        )));
    }
    Ok(())
}

/// Train `config` on `data`. When `path` is given the model is persisted
/// under `path/<project>/` and its directory returned.
pub fn do_train(
    config: &ModelConfig,
    data: &TrainingData,
    registry: &ComponentRegistry,
    path: Option<&Path>,
    project: &str,
    fixed_model_name: Option<&str>,
) -> Result<(Model, Option<PathBuf>)> {
    let pipeline = Pipeline::build(config, registry)?;
    info!(
        project = %project,
        components = ?pipeline.component_names(),
        examples = data.training_examples.len(),
        "training model"
    );
    let model = pipeline.train(data)?;
    let dir = match path {
        Some(path) => Some(model.persist(path, project, fixed_model_name, Some(data))?),
        None => None,
    };
    Ok((model, dir))
}

/// A training request as exchanged with worker processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    /// Project the model belongs to.
    pub project: String,
    /// Pipeline to train.
    pub config: ModelConfig,
    /// Training data, as a rasa JSON document.
    pub data: serde_json::Value,
    /// Local model root.
    pub path: PathBuf,
    /// Name to use instead of a timestamped one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_model_name: Option<String>,
    /// Remote storage spec to upload the model to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

impl TrainingJob {
    /// Build a job from parsed training data.
    pub fn new(project: impl Into<String>, config: ModelConfig, data: &TrainingData, path: impl Into<PathBuf>) -> Result<Self> {
        let data = serde_json::from_str(&training_data::rasa::to_json_string(data)?)?;
        Ok(Self {
            project: project.into(),
            config,
            data,
            path: path.into(),
            fixed_model_name: None,
            storage: None,
        })
    }

    /// Decode the job's training data.
    pub fn training_data(&self) -> Result<TrainingData> {
        training_data::load_data_from_value(&self.data)
    }

    /// Train and persist synchronously. Returns the model directory.
    pub fn run(&self, registry: &ComponentRegistry) -> Result<PathBuf> {
        if self.project.is_empty() {
            return Err(QuillError::InvalidProject {
                message: "missing project name to train".into(),
            });
        }
        validate_path_segment("project", &self.project)?;
        if let Some(name) = &self.fixed_model_name {
            validate_path_segment("model", name)?;
        }
        let data = self.training_data()?;
        let (_, dir) = do_train(
            &self.config,
            &data,
            registry,
            Some(&self.path),
            &self.project,
            self.fixed_model_name.as_deref(),
        )?;
        dir.ok_or_else(|| QuillError::Training {
            project: self.project.clone(),
            message: "model was not persisted".into(),
        })
    }

    /// Upload a trained model directory to the configured remote storage.
    ///
    /// Upload failures are logged and ignored.
    pub async fn upload(&self, model_dir: &Path) {
        let storage = match create_storage(self.storage.as_deref()) {
            Ok(Some(storage)) => storage,
            Ok(None) => return,
            Err(e) => {
                warn!(project = %self.project, error = %e, "invalid storage configuration, skipping upload");
                return;
            }
        };
        let model_name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if let Err(e) = storage.persist(model_dir, &model_name, &self.project).await {
            warn!(project = %self.project, model = %model_name, error = %e, "failed to upload model");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_types::message::Message;

    fn data() -> TrainingData {
        TrainingData::new(
            vec![
                Message::training_example("hello friend", Some("greet".into()), vec![]),
                Message::training_example("good morning", Some("greet".into()), vec![]),
                Message::training_example("bye for now", Some("goodbye".into()), vec![]),
                Message::training_example("see you later", Some("goodbye".into()), vec![]),
            ],
            Default::default(),
            vec![],
        )
    }

    #[test]
    fn job_round_trips_through_json() {
        let job = TrainingJob::new("p1", ModelConfig::from_template("bag_of_words").unwrap(), &data(), "/tmp/m").unwrap();
        let json = serde_json::to_string(&job).unwrap();
        let back: TrainingJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.project, "p1");
        assert_eq!(back.training_data().unwrap(), data());
    }

    #[test]
    fn job_run_persists_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = TrainingJob::new("p1", ModelConfig::from_template("bag_of_words").unwrap(), &data(), dir.path()).unwrap();
        job.fixed_model_name = Some("my_model".into());
        let model_dir = job.run(&ComponentRegistry::with_builtins()).unwrap();
        assert_eq!(model_dir, dir.path().join("p1/my_model"));
        assert!(model_dir.join("metadata.json").is_file());
        assert!(model_dir.join("training_data.json").is_file());
    }

    #[test]
    fn empty_project_is_rejected() {
        let job = TrainingJob::new("", ModelConfig::from_template("keyword").unwrap(), &data(), "/tmp/m").unwrap();
        assert!(job.run(&ComponentRegistry::with_builtins()).unwrap_err().is_not_found());
    }

    #[test]
    fn path_segments_must_stay_under_the_root() {
        for good in ["p1", "model_20240101-000000", "my.model"] {
            assert!(validate_path_segment("project", good).is_ok(), "{good}");
        }
        for bad in ["..", ".", "../escaped", "a/b", "/abs", ".hidden", "a\\b", "", "nul\0byte", "line\nbreak"] {
            assert!(
                matches!(validate_path_segment("project", bad), Err(QuillError::InvalidConfig { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn job_with_escaping_names_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("models");
        let registry = ComponentRegistry::with_builtins();

        let mut job = TrainingJob::new("p1", ModelConfig::from_template("keyword").unwrap(), &data(), &root).unwrap();
        job.fixed_model_name = Some("../../pwned".into());
        assert!(matches!(job.run(&registry), Err(QuillError::InvalidConfig { .. })));

        let job = TrainingJob::new("../escaped", ModelConfig::from_template("keyword").unwrap(), &data(), &root).unwrap();
        assert!(matches!(job.run(&registry), Err(QuillError::InvalidConfig { .. })));

        assert!(!dir.path().join("pwned").exists());
        assert!(!dir.path().join("escaped").exists());
        assert!(!root.exists());
    }
}
