//! Configuration schema types.
//!
//! Two documents are configured: the [`ServerConfig`] of a serving process
//! and the [`ModelConfig`] describing one pipeline to train. Both load from
//! YAML or JSON, support `camelCase` aliases and ignore unknown fields.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{QuillError, Result};

/// Name of the project used when a request does not carry one.
pub const DEFAULT_PROJECT_NAME: &str = "default";

/// Environment variable naming the server config file.
pub const CONFIG_ENV_VAR: &str = "QUILL_CONFIG";

/// Config file looked up in the working directory when nothing else is given.
pub const DEFAULT_CONFIG_LOCATION: &str = "quill.yml";

/// Ready-made pipelines, referenced by name from [`PipelineSpec::Template`].
pub const PIPELINE_TEMPLATES: &[(&str, &[&str])] = &[
    ("keyword", &["intent_classifier_keyword"]),
    (
        "bag_of_words",
        &[
            "tokenizer_whitespace",
            "intent_featurizer_count_vectors",
            "intent_featurizer_regex",
            "intent_classifier_naive_bayes",
        ],
    ),
    (
        "bag_of_words_entities",
        &[
            "tokenizer_whitespace",
            "intent_featurizer_count_vectors",
            "intent_featurizer_regex",
            "intent_classifier_naive_bayes",
            "ner_lookup",
            "ner_synonyms",
        ],
    ),
];

/// Look up a pipeline template by name.
pub fn pipeline_template(name: &str) -> Option<&'static [&'static str]> {
    PIPELINE_TEMPLATES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, components)| *components)
}

// ── Component config ─────────────────────────────────────────────────────

/// Free-form per-component configuration.
///
/// Always contains `name`; persisted entries additionally contain `class`
/// (the registry identifier used to load the component back) and any
/// artifact file names returned by the component's persist step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentConfig(pub serde_json::Map<String, serde_json::Value>);

impl ComponentConfig {
    /// An entry holding only a name.
    pub fn named(name: &str) -> Self {
        let mut map = serde_json::Map::new();
        map.insert("name".into(), serde_json::Value::String(name.into()));
        Self(map)
    }

    /// Build from a JSON object value. Non-objects yield an empty config.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    /// Component name, if present.
    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    /// Registry identifier the component was persisted under, falling back to the name.
    pub fn class(&self) -> Option<&str> {
        self.get_str("class").or_else(|| self.name())
    }

    /// Raw value lookup.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// String value lookup.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// Float value lookup.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(|v| v.as_f64())
    }

    /// Unsigned integer value lookup.
    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.0.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
    }

    /// Boolean value lookup.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(|v| v.as_bool())
    }

    /// Set a value.
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    /// Overlay `custom` on top of `self` (the defaults).
    pub fn override_with(mut self, custom: &ComponentConfig) -> Self {
        for (k, v) in &custom.0 {
            self.0.insert(k.clone(), v.clone());
        }
        self
    }
}

// ── Model config ─────────────────────────────────────────────────────────

/// How a pipeline is specified: a template name or an explicit list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipelineSpec {
    /// A name from [`PIPELINE_TEMPLATES`].
    Template(String),
    /// An ordered list of component entries.
    Components(Vec<ComponentConfig>),
}

impl Default for PipelineSpec {
    fn default() -> Self {
        Self::Components(Vec::new())
    }
}

/// Configuration of one model training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Language of the training data.
    #[serde(default = "default_language")]
    pub language: String,

    /// The pipeline to train.
    #[serde(default)]
    pub pipeline: PipelineSpec,

    /// Inline training data (string in any supported format, or a JSON object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

fn default_language() -> String {
    "en".into()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            pipeline: PipelineSpec::default(),
            data: None,
        }
    }
}

impl ModelConfig {
    /// Config for a named template.
    pub fn from_template(name: &str) -> Result<Self> {
        let cfg = Self {
            pipeline: PipelineSpec::Template(name.into()),
            ..Self::default()
        };
        cfg.component_configs()?;
        Ok(cfg)
    }

    /// Load from a YAML or JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let cfg: Self = load_config_file(path)?;
        cfg.component_configs()?;
        Ok(cfg)
    }

    /// Parse from a request body (JSON first, then YAML).
    pub fn from_body(body: &str) -> Result<Self> {
        let cfg: Self = match serde_json::from_str(body) {
            Ok(cfg) => cfg,
            Err(_) => serde_yaml::from_str(body)?,
        };
        cfg.component_configs()?;
        Ok(cfg)
    }

    /// Resolve the pipeline into an ordered list of component entries.
    pub fn component_configs(&self) -> Result<Vec<ComponentConfig>> {
        match &self.pipeline {
            PipelineSpec::Template(name) => pipeline_template(name)
                .map(|names| names.iter().map(|n| ComponentConfig::named(n)).collect())
                .ok_or_else(|| QuillError::UnknownTemplate {
                    template: name.clone(),
                    known: PIPELINE_TEMPLATES
                        .iter()
                        .map(|(n, _)| *n)
                        .collect::<Vec<_>>()
                        .join(", "),
                }),
            PipelineSpec::Components(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    if entry.name().is_none() {
                        return Err(QuillError::config(format!(
                            "pipeline entry {i} has no 'name'"
                        )));
                    }
                }
                Ok(entries.clone())
            }
        }
    }

    /// Component names in pipeline order.
    pub fn component_names(&self) -> Result<Vec<String>> {
        Ok(self
            .component_configs()?
            .iter()
            .filter_map(|c| c.name().map(str::to_string))
            .collect())
    }

    /// The user entry for a component, merged over `defaults`.
    pub fn for_component(&self, name: &str, defaults: ComponentConfig) -> Result<ComponentConfig> {
        let entry = self
            .component_configs()?
            .into_iter()
            .find(|c| c.name() == Some(name));
        Ok(match entry {
            Some(custom) => defaults.override_with(&custom),
            None => defaults,
        })
    }
}

// ── Server config ────────────────────────────────────────────────────────

/// Configuration of a serving process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Root directory holding `<project>/<model>/` directories.
    #[serde(default = "default_path")]
    pub path: String,

    /// Interface to bind the HTTP server to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the HTTP server.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of concurrent training workers (at least 1).
    #[serde(default = "default_max_training_processes", alias = "maxTrainingProcesses")]
    pub max_training_processes: usize,

    /// Directory the query log is written to. Disabled when absent.
    #[serde(default, alias = "responseLog")]
    pub response_log: Option<String>,

    /// Output emulation mode (`wit`, `luis`). Identity when absent.
    #[serde(default)]
    pub emulate: Option<String>,

    /// Remote model storage, e.g. `dir:/mnt/models`.
    #[serde(default)]
    pub storage: Option<String>,

    /// Projects whose latest model is loaded at start-up.
    #[serde(default, alias = "preLoad")]
    pub pre_load: Vec<String>,

    /// Project used when a request names none.
    #[serde(default = "default_project", alias = "defaultProject")]
    pub default_project: String,

    /// Deadline for a single training job.
    #[serde(default, alias = "trainingTimeoutSecs")]
    pub training_timeout_secs: Option<u64>,

    /// Executable spawned for training workers. Defaults to the running binary.
    #[serde(default, alias = "workerProgram")]
    pub worker_program: Option<String>,

    /// Allowed CORS origins. Empty means permissive.
    #[serde(default, alias = "corsOrigins")]
    pub cors_origins: Vec<String>,
}

fn default_path() -> String {
    "models".into()
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5000
}
fn default_max_training_processes() -> usize {
    1
}
fn default_project() -> String {
    DEFAULT_PROJECT_NAME.into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            host: default_host(),
            port: default_port(),
            max_training_processes: default_max_training_processes(),
            response_log: None,
            emulate: None,
            storage: None,
            pre_load: Vec::new(),
            default_project: default_project(),
            training_timeout_secs: None,
            worker_program: None,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load from a YAML or JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        load_config_file(path)
    }

    /// Load from an explicit path, `$QUILL_CONFIG`, `./quill.yml`, or defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&env_path));
        }
        let local = Path::new(DEFAULT_CONFIG_LOCATION);
        if local.is_file() {
            return Self::load(local);
        }
        Ok(Self::default())
    }

    /// Model root made absolute against the working directory.
    pub fn model_root(&self) -> PathBuf {
        make_path_absolute(Path::new(&self.path))
    }

    /// Worker pool size, never below one.
    pub fn training_processes(&self) -> usize {
        self.max_training_processes.max(1)
    }
}

/// Join a relative path onto the current working directory.
pub fn make_path_absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Read a config document, choosing the parser by file extension.
pub fn load_config_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        QuillError::config(format!("failed to read configuration file '{}': {e}", path.display()))
    })?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_str(&contents)?)
    } else {
        serde_yaml::from_str(&contents).map_err(|e| {
            QuillError::config(format!("failed to read configuration file '{}': {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let cfg: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.path, "models");
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.max_training_processes, 1);
        assert_eq!(cfg.default_project, "default");
        assert!(cfg.response_log.is_none());
    }

    #[test]
    fn server_camel_case_aliases() {
        let cfg: ServerConfig =
            serde_json::from_str(r#"{"maxTrainingProcesses": 0, "preLoad": ["p1"]}"#).unwrap();
        assert_eq!(cfg.max_training_processes, 0);
        assert_eq!(cfg.training_processes(), 1);
        assert_eq!(cfg.pre_load, vec!["p1"]);
    }

    #[test]
    fn template_resolves_to_components() {
        let cfg = ModelConfig::from_template("bag_of_words").unwrap();
        let names = cfg.component_names().unwrap();
        assert_eq!(names.first().map(String::as_str), Some("tokenizer_whitespace"));
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn unknown_template_lists_known() {
        let err = ModelConfig::from_template("nope").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("nope"));
        assert!(msg.contains("keyword"));
    }

    #[test]
    fn yaml_model_config_with_components() {
        let yaml = "language: de\npipeline:\n  - name: tokenizer_whitespace\n  - name: intent_classifier_keyword\n    keywords:\n      greet: [hallo]\n";
        let cfg: ModelConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.language, "de");
        let entry = cfg
            .for_component("intent_classifier_keyword", ComponentConfig::named("intent_classifier_keyword"))
            .unwrap();
        assert_eq!(entry.get("keywords").unwrap()["greet"][0], "hallo");
    }

    #[test]
    fn entry_without_name_is_rejected() {
        let cfg: ModelConfig = serde_json::from_str(r#"{"pipeline": [{"alpha": 1}]}"#).unwrap();
        assert!(matches!(
            cfg.component_configs(),
            Err(QuillError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn override_defaults_prefers_custom() {
        let mut defaults = ComponentConfig::named("x");
        defaults.insert("alpha", serde_json::json!(1.0));
        defaults.insert("keep", serde_json::json!(true));
        let mut custom = ComponentConfig::named("x");
        custom.insert("alpha", serde_json::json!(0.5));
        let merged = defaults.override_with(&custom);
        assert_eq!(merged.get_f64("alpha"), Some(0.5));
        assert_eq!(merged.get_bool("keep"), Some(true));
    }

    #[test]
    fn load_config_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("server.json");
        std::fs::write(&json, r#"{"port": 8080}"#).unwrap();
        assert_eq!(ServerConfig::load(&json).unwrap().port, 8080);

        let yaml = dir.path().join("server.yml");
        std::fs::write(&yaml, "port: 9090\nemulate: wit\n").unwrap();
        let cfg = ServerConfig::load(&yaml).unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.emulate.as_deref(), Some("wit"));
    }

    #[test]
    fn malformed_yaml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("model.yml");
        std::fs::write(&yaml, "pipeline: [unclosed\n").unwrap();
        assert!(matches!(
            ModelConfig::load(&yaml),
            Err(QuillError::InvalidConfig { .. })
        ));
    }
}
