//! Error types for the quill framework.
//!
//! Provides [`QuillError`] as the single error type crossing every public
//! boundary (parse, train, evaluate, unload). Variants are grouped by the
//! way a caller is expected to react: fix the configuration, look for a
//! different resource, retry later, or inspect a training failure.

use thiserror::Error;

/// Top-level error type for the quill framework.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum QuillError {
    // ── Configuration ────────────────────────────────────────────────

    /// A pipeline references a component name the registry cannot resolve.
    #[error(
        "failed to find component class for '{name}': unknown component name. \
         Check your configured pipeline and make sure the component is registered"
    )]
    UnknownComponent {
        /// The unresolvable identifier.
        name: String,
    },

    /// A component requires a property no earlier component provides.
    #[error("component '{component}' requires '{missing}' which no earlier component provides")]
    PipelineConfiguration {
        /// The component whose requirement is unsatisfied.
        component: String,
        /// The first missing property key.
        missing: String,
    },

    /// A pipeline template name is not known.
    #[error("unknown pipeline template '{template}'. Known pipeline templates: {known}")]
    UnknownTemplate {
        /// The requested template.
        template: String,
        /// Comma separated list of known templates.
        known: String,
    },

    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    // ── Not found ────────────────────────────────────────────────────

    /// The project does not exist and is not discoverable.
    #[error("{message}")]
    InvalidProject {
        /// Explanation naming the project involved.
        message: String,
    },

    /// The requested model id does not exist in the project.
    #[error("model '{model}' not found in project '{project}'")]
    ModelNotFound {
        /// Project that was searched.
        project: String,
        /// Model id that was requested.
        model: String,
    },

    // ── Conflicts ────────────────────────────────────────────────────

    /// A training run was requested for a project that is already training.
    #[error("the project '{project}' is already being trained")]
    AlreadyTraining {
        /// Project that is busy.
        project: String,
    },

    // ── Training ─────────────────────────────────────────────────────

    /// Training failed inside a worker.
    #[error("training of project '{project}' failed: {message}")]
    Training {
        /// Project the failed job was training.
        project: String,
        /// Worker-supplied failure description.
        message: String,
    },

    // ── Data & models ────────────────────────────────────────────────

    /// Training data does not match any supported format.
    #[error("unknown data format for {source_name}")]
    UnknownDataFormat {
        /// File name or description of the data source.
        source_name: String,
    },

    /// Training data matched a format but failed validation.
    #[error("invalid training data: {reason}")]
    InvalidTrainingData {
        /// Which rule was violated.
        reason: String,
    },

    /// Model metadata could not be read.
    #[error("failed to load model metadata from '{path}': {reason}")]
    InvalidMetadata {
        /// Metadata file that was read.
        path: String,
        /// Underlying failure.
        reason: String,
    },

    /// The model was persisted by an incompatible version.
    #[error("the model version {model_version} is too old to be loaded; minimum compatible version is {minimum}")]
    UnsupportedModel {
        /// Version recorded in the model metadata.
        model_version: String,
        /// Minimum version this build can load.
        minimum: String,
    },

    // ── Serving ──────────────────────────────────────────────────────

    /// A component failed while processing a message.
    #[error("component '{component}' failed: {reason}")]
    ComponentFailed {
        /// Name of the failing component.
        component: String,
        /// What went wrong.
        reason: String,
    },

    /// Remote storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Backend-supplied message.
        message: String,
    },

    // ── Transport ────────────────────────────────────────────────────

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization / deserialization error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl QuillError {
    /// Shorthand for [`QuillError::InvalidConfig`].
    pub fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`QuillError::ComponentFailed`].
    pub fn component(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ComponentFailed {
            component: component.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`QuillError::InvalidTrainingData`].
    pub fn training_data(reason: impl Into<String>) -> Self {
        Self::InvalidTrainingData {
            reason: reason.into(),
        }
    }

    /// Whether the error denotes a missing project or model.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::InvalidProject { .. } | Self::ModelNotFound { .. })
    }
}

/// A convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, QuillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_component_names_identifier() {
        let err = QuillError::UnknownComponent {
            name: "my_made_up_component".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("my_made_up_component"));
        assert!(msg.contains("unknown component name"));
    }

    #[test]
    fn pipeline_configuration_display() {
        let err = QuillError::PipelineConfiguration {
            component: "intent_classifier_naive_bayes".into(),
            missing: "text_features".into(),
        };
        assert_eq!(
            err.to_string(),
            "component 'intent_classifier_naive_bayes' requires 'text_features' \
             which no earlier component provides"
        );
    }

    #[test]
    fn training_error_carries_project() {
        let err = QuillError::Training {
            project: "p1".into(),
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "training of project 'p1' failed: boom");
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: QuillError = io_err.into();
        assert!(matches!(err, QuillError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad}}").unwrap_err();
        let err: QuillError = json_err.into();
        assert!(matches!(err, QuillError::Json(_)));
    }

    #[test]
    fn not_found_classification() {
        assert!(
            QuillError::ModelNotFound {
                project: "p".into(),
                model: "m".into()
            }
            .is_not_found()
        );
        assert!(
            QuillError::InvalidProject {
                message: "gone".into()
            }
            .is_not_found()
        );
        assert!(!QuillError::AlreadyTraining { project: "p".into() }.is_not_found());
    }
}
