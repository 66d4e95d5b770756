//! Built-in components.
//!
//! Tokenizers, featurizers, intent classifiers and entity extractors that
//! ship with quill. Each kind is a [`ComponentFactory`] registered by
//! [`register_builtins`].

pub mod classifiers;
pub mod extractors;
pub mod featurizers;
pub mod tokenizers;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use quill_types::config::ComponentConfig;
use quill_types::{QuillError, Result};

use crate::registry::ComponentRegistry;

/// Register every built-in factory.
pub fn register_builtins(registry: &mut ComponentRegistry) {
    registry.register(Arc::new(tokenizers::WhitespaceTokenizerFactory));
    registry.register(Arc::new(tokenizers::DictionaryTokenizerFactory));
    registry.register(Arc::new(featurizers::CountVectorsFeaturizerFactory));
    registry.register(Arc::new(featurizers::RegexFeaturizerFactory));
    registry.register(Arc::new(classifiers::KeywordClassifierFactory));
    registry.register(Arc::new(classifiers::NaiveBayesClassifierFactory));
    registry.register(Arc::new(extractors::LookupExtractorFactory));
    registry.register(Arc::new(extractors::SynonymMapperFactory));
}

/// Serialize `value` as `model_dir/file_name` and return the config entry
/// pointing at it.
pub(crate) fn write_artifact<T: Serialize>(
    model_dir: &Path,
    key: &str,
    file_name: &str,
    value: &T,
) -> Result<Option<ComponentConfig>> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(model_dir.join(file_name), json)?;
    let mut entry = ComponentConfig::default();
    entry.insert(key, serde_json::Value::String(file_name.into()));
    Ok(Some(entry))
}

/// Read the artifact named by `config[key]`, if the entry is present.
pub(crate) fn read_artifact<T: DeserializeOwned>(
    model_dir: &Path,
    config: &ComponentConfig,
    key: &str,
) -> Result<Option<T>> {
    let Some(file_name) = config.get_str(key) else {
        return Ok(None);
    };
    let path = model_dir.join(file_name);
    let contents = std::fs::read_to_string(&path).map_err(|e| {
        QuillError::component(
            config.name().unwrap_or(key),
            format!("failed to read '{}': {e}", path.display()),
        )
    })?;
    Ok(Some(serde_json::from_str(&contents)?))
}
