//! The component pipeline engine.
//!
//! [`Pipeline::build`] resolves and validates a configured component list,
//! [`Pipeline::train`] turns it into a [`Model`], and [`Model`] handles
//! persisting, loading and serving-time processing. Processing order always
//! equals training order: persisted metadata keeps the pipeline sequence.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use quill_types::config::{ComponentConfig, ModelConfig};
use quill_types::message::{Message, ParseResult};
use quill_types::training::TrainingData;
use quill_types::{QuillError, Result};

use crate::component::{Component, ComponentFactory, Context};
use crate::metadata::{ModelMetadata, timestamp};
use crate::registry::ComponentRegistry;
use crate::training_data;

/// File name of the training data stored with a model.
pub const TRAINING_DATA_FILE: &str = "training_data.json";

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check the requires/provides ordering of a component sequence.
///
/// Each item is `(name, requires, provides)`. Every required key must be
/// provided by a strictly earlier item; the first violation is reported.
pub fn validate_requirements<'a, I, R, P>(stages: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, R, P)>,
    R: IntoIterator<Item = &'a str>,
    P: IntoIterator<Item = &'a str>,
{
    let mut provided: BTreeSet<&str> = BTreeSet::new();
    for (name, requires, provides) in stages {
        if let Some(missing) = requires.into_iter().find(|r| !provided.contains(r)) {
            return Err(QuillError::PipelineConfiguration {
                component: name.into(),
                missing: missing.into(),
            });
        }
        provided.extend(provides);
    }
    Ok(())
}

fn validate_factories(factories: &[Arc<dyn ComponentFactory>]) -> Result<()> {
    validate_requirements(factories.iter().map(|f| {
        (
            f.name(),
            f.requires().iter().copied(),
            f.provides().iter().copied(),
        )
    }))
}

fn recognized_keys(factories: &[Arc<dyn ComponentFactory>]) -> BTreeSet<String> {
    factories
        .iter()
        .flat_map(|f| f.provides().iter().chain(f.context_provides()))
        .map(|k| k.to_string())
        .collect()
}

fn resolve(entries: &[ComponentConfig], registry: &ComponentRegistry) -> Result<Vec<Arc<dyn ComponentFactory>>> {
    entries
        .iter()
        .map(|entry| {
            let class = entry
                .class()
                .ok_or_else(|| QuillError::config("pipeline entry has no 'name'"))?;
            registry.get(class)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// A component together with the factory that created it.
pub struct Stage {
    factory: Arc<dyn ComponentFactory>,
    component: Box<dyn Component>,
}

impl Stage {
    /// Name used in errors and logs.
    pub fn name(&self) -> &str {
        self.component.config().name().unwrap_or_else(|| self.factory.name())
    }

    /// Registry identifier of the component kind.
    pub fn class(&self) -> &str {
        self.factory.name()
    }

    /// The component instance.
    pub fn component(&self) -> &dyn Component {
        self.component.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A validated, untrained sequence of components.
pub struct Pipeline {
    stages: Vec<Stage>,
    recognized: BTreeSet<String>,
    config: ModelConfig,
}

impl Pipeline {
    /// Resolve, validate and instantiate the configured components.
    ///
    /// Nothing is instantiated unless every name resolves and the ordering
    /// is valid.
    pub fn build(config: &ModelConfig, registry: &ComponentRegistry) -> Result<Self> {
        let entries = config.component_configs()?;
        let factories = resolve(&entries, registry)?;
        validate_factories(&factories)?;

        let mut stages = Vec::with_capacity(entries.len());
        for (entry, factory) in entries.iter().zip(&factories) {
            let merged = factory.defaults().override_with(entry);
            let component = factory.create(merged, config)?;
            stages.push(Stage {
                factory: Arc::clone(factory),
                component,
            });
        }
        debug!(components = stages.len(), "built pipeline");
        Ok(Self {
            stages,
            recognized: recognized_keys(&factories),
            config: config.clone(),
        })
    }

    /// Component names in order.
    pub fn component_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Train every component in order on a private copy of `data`.
    pub fn train(mut self, data: &TrainingData) -> Result<Model> {
        let factories: Vec<_> = self.stages.iter().map(|s| Arc::clone(&s.factory)).collect();
        validate_factories(&factories)?;

        let mut working = data.clone();
        let mut context = Context::new(self.recognized.clone());
        for stage in &self.stages {
            if let Some(update) = stage.component.provide_context() {
                context.extend(stage.name(), update)?;
            }
        }
        for stage in &mut self.stages {
            let name = stage.component.config().name().unwrap_or_else(|| stage.factory.name()).to_string();
            info!(component = %name, "starting to train component");
            if let Some(update) = stage.component.train(&mut working, &self.config, &context)? {
                context.extend(&name, update)?;
            }
            debug!(component = %name, "finished training component");
        }

        Ok(Model {
            stages: self.stages,
            context,
            language: self.config.language,
        })
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A trained pipeline and the context it produced.
///
/// Immutable once created; shared between concurrent parses behind an `Arc`.
pub struct Model {
    stages: Vec<Stage>,
    context: Context,
    language: String,
}

impl Model {
    /// Load the model stored in `model_dir`.
    pub fn load(model_dir: &Path, registry: &ComponentRegistry) -> Result<Self> {
        let metadata = ModelMetadata::load(model_dir)?;
        metadata.ensure_compatible()?;
        Self::from_metadata(&metadata, model_dir, registry)
    }

    /// Instantiate a model from metadata, reading artifacts from `model_dir`.
    pub fn from_metadata(metadata: &ModelMetadata, model_dir: &Path, registry: &ComponentRegistry) -> Result<Self> {
        let factories = resolve(&metadata.pipeline, registry)?;
        validate_factories(&factories)?;

        let mut context = Context::new(recognized_keys(&factories));
        let mut stages = Vec::with_capacity(factories.len());
        for (entry, factory) in metadata.pipeline.iter().zip(&factories) {
            let config = factory.defaults().override_with(entry);
            let component = factory.load(model_dir, config, &context)?;
            if let Some(update) = component.provide_context() {
                context.extend(factory.name(), update)?;
            }
            stages.push(Stage {
                factory: Arc::clone(factory),
                component,
            });
        }
        Ok(Self {
            stages,
            context,
            language: metadata.language.clone(),
        })
    }

    /// The keyword-backed model used when a project has nothing trained.
    pub fn fallback(registry: &ComponentRegistry) -> Result<Self> {
        Self::from_metadata(&ModelMetadata::fallback(), Path::new(""), registry)
    }

    /// Language the model was trained for.
    pub fn language(&self) -> &str {
        &self.language
    }

    /// The shared context built at training or load time.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Stages in processing order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run `message` through every component. Stops at the first failure.
    pub fn process(&self, message: &mut Message) -> Result<()> {
        for stage in &self.stages {
            stage
                .component
                .process(message, &self.context)
                .map_err(|e| match e {
                    e @ QuillError::ComponentFailed { .. } => e,
                    other => QuillError::component(stage.name(), other.to_string()),
                })?;
        }
        Ok(())
    }

    /// Parse `text` into the canonical result shape.
    ///
    /// Empty text yields the default output without running the pipeline.
    pub fn parse(&self, text: &str, time: Option<String>) -> Result<ParseResult> {
        if text.trim().is_empty() {
            return Ok(ParseResult::empty(text));
        }
        let mut message = Message::new(text).with_time(time);
        self.process(&mut message)?;
        Ok(ParseResult::from_message(&message))
    }

    /// Persist into `path/<project>/<model name>` and return the directory.
    ///
    /// The model name is `fixed_name` or `model_<timestamp>`.
    pub fn persist(
        &self,
        path: &Path,
        project: &str,
        fixed_name: Option<&str>,
        training_data: Option<&TrainingData>,
    ) -> Result<PathBuf> {
        let model_name = match fixed_name {
            Some(name) => name.to_string(),
            None => format!("model_{}", timestamp()),
        };
        let dir = path.join(project).join(&model_name);
        std::fs::create_dir_all(&dir)?;

        let mut entries = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let mut entry = stage.component.config().clone();
            entry.insert("class", serde_json::Value::String(stage.class().into()));
            if let Some(extra) = stage.component.persist(&dir)? {
                entry = entry.override_with(&extra);
            }
            entries.push(entry);
        }

        let mut metadata = ModelMetadata::new(self.language.clone(), entries);
        if let Some(data) = training_data {
            std::fs::write(dir.join(TRAINING_DATA_FILE), training_data::rasa::to_json_string(data)?)?;
            metadata.training_data = Some(TRAINING_DATA_FILE.into());
        }
        metadata.persist(&dir)?;
        info!(project = %project, model = %model_name, path = %dir.display(), "persisted model");
        Ok(dir)
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("language", &self.language)
            .field("stages", &self.stages.iter().map(Stage::name).collect::<Vec<_>>())
            .field("context", &self.context)
            .finish()
    }
}
