//! Request router.
//!
//! [`DataRouter`] maps parse, train, evaluate and unload requests onto the
//! project store. Projects are created on demand when they exist locally or
//! in remote storage, and when a training run names a new one.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use quill_core::ComponentRegistry;
use quill_core::emulators::{Emulator, ParseRequest, create_emulator};
use quill_core::evaluate::{EvaluationResult, IntentPrediction, clean_intent_label};
use quill_core::persistor::{RemoteStorage, create_storage, list_subdirectories};
use quill_core::train::{TrainingJob, validate_path_segment};
use quill_types::config::{ModelConfig, ServerConfig};
use quill_types::training::TrainingData;
use quill_types::{QuillError, Result};

use crate::project::{Project, ProjectInfo};
use crate::query_log::QueryLogger;
use crate::training::{TrainingExecutor, TrainingHandle, TrainingOrchestrator};

/// Snapshot returned by `/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterStatus {
    pub available_projects: BTreeMap<String, ProjectInfo>,
    pub max_training_processes: usize,
    pub current_training_processes: usize,
}

/// Dispatches requests onto projects.
pub struct DataRouter {
    config: ServerConfig,
    root: PathBuf,
    registry: Arc<ComponentRegistry>,
    storage: Option<Arc<dyn RemoteStorage>>,
    emulator: Arc<dyn Emulator>,
    query_log: Option<QueryLogger>,
    trainer: TrainingOrchestrator,
    projects: RwLock<HashMap<String, Arc<Project>>>,
}

impl DataRouter {
    /// Build the router, discover projects and pre-load the configured ones.
    pub async fn new(
        config: ServerConfig,
        registry: Arc<ComponentRegistry>,
        executor: Arc<dyn TrainingExecutor>,
    ) -> Result<Self> {
        let root = config.model_root();
        std::fs::create_dir_all(&root)?;
        let storage = create_storage(config.storage.as_deref())?;
        let emulator = create_emulator(config.emulate.as_deref())?;
        let query_log = match &config.response_log {
            Some(dir) => Some(QueryLogger::new(Path::new(dir))?),
            None => None,
        };
        let trainer = TrainingOrchestrator::new(
            executor,
            config.training_processes(),
            config.training_timeout_secs.map(Duration::from_secs),
        );

        let router = Self {
            root,
            registry,
            storage,
            emulator,
            query_log,
            trainer,
            projects: RwLock::new(HashMap::new()),
            config,
        };
        router.create_project_store().await;
        router.pre_load().await;
        Ok(router)
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Local model root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The active emulator.
    pub fn emulator(&self) -> &dyn Emulator {
        self.emulator.as_ref()
    }

    async fn create_project_store(&self) {
        let mut names = self.list_projects().await;
        if names.is_empty() {
            names.push(self.config.default_project.clone());
        }
        for name in names {
            self.open_project(&name).await;
        }
        let projects = self.projects.read().await;
        info!(projects = ?projects.keys().collect::<Vec<_>>(), "project store ready");
    }

    async fn pre_load(&self) {
        for name in &self.config.pre_load {
            let Some(project) = self.projects.read().await.get(name).cloned() else {
                warn!(project = %name, "cannot pre-load unknown project");
                continue;
            };
            match project.load_model().await {
                Ok(model) => info!(project = %name, model = %model, "pre-loaded model"),
                Err(e) => warn!(project = %name, error = %e, "failed to pre-load model"),
            }
        }
    }

    /// Project names present locally or in remote storage.
    async fn list_projects(&self) -> Vec<String> {
        let mut names = match list_subdirectories(&self.root) {
            Ok(names) => names,
            Err(e) => {
                warn!(path = %self.root.display(), error = %e, "failed to list local projects");
                Vec::new()
            }
        };
        if let Some(storage) = &self.storage {
            match storage.list_projects().await {
                Ok(remote) => names.extend(remote),
                Err(e) => warn!(error = %e, "failed to list remote projects"),
            }
        }
        names.sort();
        names.dedup();
        names
    }

    /// Open `name` and register it unless another task got there first.
    async fn open_project(&self, name: &str) -> Arc<Project> {
        if let Some(project) = self.projects.read().await.get(name) {
            return Arc::clone(project);
        }
        let project = Arc::new(
            Project::open(name, &self.root, Arc::clone(&self.registry), self.storage.clone()).await,
        );
        let mut projects = self.projects.write().await;
        Arc::clone(projects.entry(name.to_string()).or_insert(project))
    }

    /// An existing or discoverable project.
    async fn find_project(&self, name: &str) -> Result<Arc<Project>> {
        if let Some(project) = self.projects.read().await.get(name) {
            return Ok(Arc::clone(project));
        }
        if self.list_projects().await.iter().any(|n| n == name) {
            debug!(project = %name, "discovered project in storage");
            return Ok(self.open_project(name).await);
        }
        Err(QuillError::InvalidProject {
            message: format!("no project found with name '{name}'"),
        })
    }

    fn project_name<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .filter(|p| !p.is_empty())
            .unwrap_or(self.config.default_project.as_str())
    }

    /// Parse a raw request (JSON body or query map) through the emulator.
    pub async fn parse_json(&self, data: &Value) -> Result<Value> {
        let request = self.emulator.normalise_request(data)?;
        self.parse(request).await
    }

    /// Parse a normalised request.
    pub async fn parse(&self, request: ParseRequest) -> Result<Value> {
        let project_name = self.project_name(request.project.as_deref()).to_string();
        let project = self.find_project(&project_name).await?;
        let (result, model) = project
            .parse(&request.text, request.time, request.model.as_deref())
            .await?;
        if let Some(log) = &self.query_log {
            log.log(&project_name, &model, &result).await;
        }
        Ok(self.emulator.normalise_response(&result))
    }

    /// Start training `config` on `data` for `project`.
    pub async fn start_train_process(
        &self,
        data: &TrainingData,
        project: &str,
        config: ModelConfig,
        fixed_model_name: Option<String>,
    ) -> Result<TrainingHandle> {
        if project.is_empty() {
            return Err(QuillError::InvalidProject {
                message: "missing project name to train".into(),
            });
        }
        validate_path_segment("project", project)?;
        if let Some(name) = &fixed_model_name {
            validate_path_segment("model", name)?;
        }
        let mut job = TrainingJob::new(project, config, data, self.root.clone())?;
        job.fixed_model_name = fixed_model_name;
        job.storage = self.config.storage.clone();

        let target = self.open_project(project).await;
        target.begin_training()?;
        info!(project = %project, "new training queued");
        Ok(self.trainer.submit(job, target))
    }

    /// Run the intent examples of `data` through a model and score them.
    pub async fn evaluate(
        &self,
        data: &TrainingData,
        project: Option<&str>,
        model: Option<&str>,
    ) -> Result<EvaluationResult> {
        let project = self.find_project(self.project_name(project)).await?;
        let mut predictions = Vec::new();
        for example in data.intent_examples() {
            let (result, _) = project.parse(example.text(), None, model).await?;
            predictions.push(IntentPrediction {
                text: example.text().to_string(),
                intent: clean_intent_label(example.intent_name()),
                predicted: clean_intent_label(Some(result.intent.name.as_str())),
                confidence: result.intent.confidence,
            });
        }
        Ok(EvaluationResult::from_predictions(predictions))
    }

    /// Unload `model` from `project`.
    pub async fn unload_model(&self, project: Option<&str>, model: Option<&str>) -> Result<String> {
        let project = project.filter(|p| !p.is_empty()).ok_or_else(|| QuillError::InvalidProject {
            message: "no project specified".into(),
        })?;
        let model = model
            .filter(|m| !m.is_empty())
            .ok_or_else(|| QuillError::config("no model specified"))?;
        let target = self
            .projects
            .read()
            .await
            .get(project)
            .cloned()
            .ok_or_else(|| QuillError::InvalidProject {
                message: format!("project '{project}' could not be found"),
            })?;
        target.unload(model).await
    }

    /// Status of every project and the training pool.
    pub async fn status(&self) -> RouterStatus {
        let projects: Vec<(String, Arc<Project>)> = self
            .projects
            .read()
            .await
            .iter()
            .map(|(name, project)| (name.clone(), Arc::clone(project)))
            .collect();
        let mut available_projects = BTreeMap::new();
        for (name, project) in projects {
            available_projects.insert(name, project.as_info().await);
        }
        RouterStatus {
            available_projects,
            max_training_processes: self.trainer.capacity(),
            current_training_processes: self.trainer.active(),
        }
    }
}

impl std::fmt::Debug for DataRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataRouter")
            .field("root", &self.root)
            .field("emulator", &self.emulator.name())
            .field("trainer", &self.trainer)
            .finish()
    }
}
