//! The component contract and the shared pipeline context.
//!
//! A pipeline is built from [`ComponentFactory`] descriptors, each of which
//! declares the property keys it reads (`requires`) and writes (`provides`)
//! and knows how to create a fresh [`Component`] or load a trained one from
//! a model directory. Components exchange training-time values through a
//! [`Context`] whose set of keys is fixed when the pipeline is built.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use quill_types::config::{ComponentConfig, ModelConfig};
use quill_types::message::Message;
use quill_types::training::TrainingData;
use quill_types::{QuillError, Result};

/// Values a component contributes to the [`Context`].
pub type ContextUpdate = BTreeMap<String, serde_json::Value>;

// ── Context ─────────────────────────────────────────────────────────────

/// Accumulating key-value store threaded through the stages of a pipeline.
///
/// Only keys declared by the pipeline's factories (their `provides` and
/// `context_provides` lists) may be stored. Updates from stage `i` are
/// visible to stages `i + 1..n`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    recognized: BTreeSet<String>,
    values: BTreeMap<String, serde_json::Value>,
}

impl Context {
    /// An empty context accepting exactly `recognized` keys.
    pub fn new(recognized: BTreeSet<String>) -> Self {
        Self {
            recognized,
            values: BTreeMap::new(),
        }
    }

    /// Merge an update produced by `component`.
    ///
    /// Fails without applying anything if the update carries an undeclared key.
    pub fn extend(&mut self, component: &str, update: ContextUpdate) -> Result<()> {
        if let Some(key) = update.keys().find(|k| !self.recognized.contains(*k)) {
            return Err(QuillError::component(
                component,
                format!("context key '{key}' is not declared by any component in the pipeline"),
            ));
        }
        self.values.extend(update);
        Ok(())
    }

    /// Raw value lookup.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Unsigned integer lookup.
    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
    }

    /// Keys this context accepts.
    pub fn recognized(&self) -> &BTreeSet<String> {
        &self.recognized
    }

    /// Whether no value has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ── Component ───────────────────────────────────────────────────────────

/// One stage of a pipeline: tokenizer, featurizer, classifier or extractor.
///
/// Trained state is created by [`train`](Component::train) (or restored by
/// [`ComponentFactory::load`]) and never mutated while serving, which is
/// why [`process`](Component::process) takes `&self`.
pub trait Component: Send + Sync {
    /// The merged configuration this instance was created with.
    fn config(&self) -> &ComponentConfig;

    /// Context values available right after creation or loading.
    fn provide_context(&self) -> Option<ContextUpdate> {
        None
    }

    /// Train on the full (working copy of the) data set.
    ///
    /// Components may annotate the examples they own, e.g. attach tokens or
    /// features for later stages.
    fn train(
        &mut self,
        _data: &mut TrainingData,
        _config: &ModelConfig,
        _context: &Context,
    ) -> Result<Option<ContextUpdate>> {
        Ok(None)
    }

    /// Annotate a message at serving time.
    fn process(&self, message: &mut Message, context: &Context) -> Result<()>;

    /// Write private artifacts into `model_dir`.
    ///
    /// Returns config entries (typically artifact file names) recorded in
    /// this component's metadata entry and handed back to `load`.
    fn persist(&self, _model_dir: &Path) -> Result<Option<ComponentConfig>> {
        Ok(None)
    }
}

/// Describes a component kind and constructs its instances.
///
/// Factories are registered in a
/// [`ComponentRegistry`](crate::registry::ComponentRegistry) under
/// [`name`](ComponentFactory::name), which is also the `class` recorded in
/// persisted metadata.
pub trait ComponentFactory: Send + Sync {
    /// Unique registry identifier.
    fn name(&self) -> &str;

    /// Message property keys written by the component.
    fn provides(&self) -> &[&str] {
        &[]
    }

    /// Message property keys that an earlier component must provide.
    fn requires(&self) -> &[&str] {
        &[]
    }

    /// Context keys the component contributes during training or loading.
    fn context_provides(&self) -> &[&str] {
        &[]
    }

    /// Default configuration, overridden by the user's pipeline entry.
    fn defaults(&self) -> ComponentConfig {
        ComponentConfig::named(self.name())
    }

    /// Create an untrained instance.
    fn create(&self, config: ComponentConfig, model_config: &ModelConfig) -> Result<Box<dyn Component>>;

    /// Restore a trained instance from `model_dir`.
    ///
    /// The default suits components without artifacts.
    fn load(
        &self,
        _model_dir: &Path,
        config: ComponentConfig,
        _context: &Context,
    ) -> Result<Box<dyn Component>> {
        self.create(config, &ModelConfig::default())
    }
}

/// Attach `values` to the message's feature vector, keeping earlier features.
pub fn append_features(message: &mut Message, values: &[f64]) {
    use quill_types::message::{Property, keys};

    let mut features = message.features().map(<[f64]>::to_vec).unwrap_or_default();
    features.extend_from_slice(values);
    message.set(keys::TEXT_FEATURES, Property::Features(features));
}
