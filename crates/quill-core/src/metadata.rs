//! Persisted model metadata (`metadata.json`).

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use quill_types::config::{ComponentConfig, ModelConfig, PipelineSpec};
use quill_types::{QuillError, Result};

/// File name of the metadata descriptor inside a model directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Version written into new models.
pub const QUILL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Oldest model version this build can load.
pub const MINIMUM_COMPATIBLE_VERSION: &str = "0.1.0";

/// Descriptor of a persisted model.
///
/// `pipeline` preserves training order; each entry is the merged component
/// config plus `class` and any artifact names the component returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Language of the training data.
    #[serde(default = "default_language")]
    pub language: String,

    /// Ordered component entries.
    #[serde(default)]
    pub pipeline: Vec<ComponentConfig>,

    /// Training timestamp, `YYYYmmdd-HHMMSS`.
    #[serde(default)]
    pub trained_at: String,

    /// Version of quill that wrote the model.
    #[serde(default = "unknown_version")]
    pub quill_version: String,

    /// Training data file stored next to the metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_data: Option<String>,
}

fn default_language() -> String {
    "en".into()
}

fn unknown_version() -> String {
    "0.0.0".into()
}

impl ModelMetadata {
    /// Metadata for a model about to be written.
    pub fn new(language: impl Into<String>, pipeline: Vec<ComponentConfig>) -> Self {
        Self {
            language: language.into(),
            pipeline,
            trained_at: timestamp(),
            quill_version: QUILL_VERSION.into(),
            training_data: None,
        }
    }

    /// In-memory metadata of the keyword-backed fallback model.
    pub fn fallback() -> Self {
        let mut entry = ComponentConfig::named("intent_classifier_keyword");
        entry.insert("class", serde_json::Value::String("intent_classifier_keyword".into()));
        Self::new("en", vec![entry])
    }

    /// Read `model_dir/metadata.json`.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(METADATA_FILE);
        let invalid = |reason: String| QuillError::InvalidMetadata {
            path: path.display().to_string(),
            reason,
        };
        let contents = std::fs::read_to_string(&path).map_err(|e| invalid(e.to_string()))?;
        serde_json::from_str(&contents).map_err(|e| invalid(e.to_string()))
    }

    /// Write `model_dir/metadata.json`.
    pub fn persist(&self, model_dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(model_dir.join(METADATA_FILE), json)?;
        Ok(())
    }

    /// Reject models written by a version older than the minimum.
    pub fn ensure_compatible(&self) -> Result<()> {
        if version_tuple(&self.quill_version) < version_tuple(MINIMUM_COMPATIBLE_VERSION) {
            return Err(QuillError::UnsupportedModel {
                model_version: self.quill_version.clone(),
                minimum: MINIMUM_COMPATIBLE_VERSION.into(),
            });
        }
        Ok(())
    }

    /// The model config this metadata describes.
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            language: self.language.clone(),
            pipeline: PipelineSpec::Components(self.pipeline.clone()),
            data: None,
        }
    }
}

/// Current time formatted as `YYYYmmdd-HHMMSS`.
pub fn timestamp() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Numeric `(major, minor, patch)`; unparsable parts count as zero.
fn version_tuple(version: &str) -> (u64, u64, u64) {
    let mut parts = version
        .split(['.', '-', '+'])
        .map(|p| p.parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}
