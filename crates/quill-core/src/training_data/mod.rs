//! Training data readers, writers and format detection.
//!
//! Two formats are supported: rasa JSON ([`rasa`]) and markdown
//! ([`markdown`]). The format of a document is guessed from its structure;
//! anything unrecognised is an [`UnknownDataFormat`](QuillError::UnknownDataFormat)
//! error.

pub mod markdown;
pub mod rasa;

use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use quill_types::training::TrainingData;
use quill_types::{QuillError, Result};

/// A supported training data format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// rasa JSON.
    Json,
    /// Markdown sections.
    Markdown,
}

impl DataFormat {
    /// Parse a format name as used on the command line.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "json" | "rasa" | "rasa_nlu" => Ok(Self::Json),
            "md" | "markdown" => Ok(Self::Markdown),
            other => Err(QuillError::config(format!(
                "unknown training data format '{other}', expected 'json' or 'md'"
            ))),
        }
    }
}

/// Guess the format of `content`.
pub fn guess_format(content: &str) -> Option<DataFormat> {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(js) => rasa::is_rasa(&js).then_some(DataFormat::Json),
        Err(_) => markdown::is_markdown(content).then_some(DataFormat::Markdown),
    }
}

/// Read a single document. `source_name` names it in errors.
pub fn load_data_from_str(content: &str, source_name: &str) -> Result<TrainingData> {
    let format = guess_format(content).ok_or_else(|| QuillError::UnknownDataFormat {
        source_name: source_name.to_string(),
    })?;
    info!(source = %source_name, format = ?format, "reading training data");
    match format {
        DataFormat::Json => rasa::read(serde_json::from_str(content)?),
        DataFormat::Markdown => markdown::read(content),
    }
}

/// Read training data from JSON: a rasa document, or a string holding any
/// supported format.
pub fn load_data_from_value(value: &serde_json::Value) -> Result<TrainingData> {
    match value {
        serde_json::Value::String(content) => load_data_from_str(content, "inline training data"),
        js if rasa::is_rasa(js) => rasa::read(js.clone()),
        _ => Err(QuillError::UnknownDataFormat {
            source_name: "inline training data".into(),
        }),
    }
}

/// Read a file, or every non-hidden file below a directory, and merge them.
pub fn load_data(path: &Path) -> Result<TrainingData> {
    if !path.exists() {
        return Err(QuillError::training_data(format!(
            "training data path '{}' does not exist",
            path.display()
        )));
    }
    let mut data_sets = Vec::new();
    let walker = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker {
        let entry = entry.map_err(|e| QuillError::training_data(format!("failed to list training data: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let content = std::fs::read_to_string(entry.path())?;
        data_sets.push(load_data_from_str(&content, &entry.path().display().to_string())?);
    }
    debug!(files = data_sets.len(), "loaded training data files");
    let mut sets = data_sets.into_iter();
    Ok(match sets.next() {
        Some(first) => first.merge(sets),
        None => TrainingData::default(),
    })
}

/// Serialize `data` in `format`.
pub fn to_string(data: &TrainingData, format: DataFormat) -> Result<String> {
    match format {
        DataFormat::Json => rasa::to_json_string(data),
        DataFormat::Markdown => Ok(markdown::to_markdown(data)),
    }
}

/// Reject examples with empty text or entity offsets outside the text.
pub fn validate(data: &TrainingData) -> Result<()> {
    for example in &data.training_examples {
        if example.text().trim().is_empty() {
            return Err(QuillError::training_data("example with empty text"));
        }
        let len = example.text().chars().count();
        for entity in example.entities() {
            if entity.start >= entity.end || entity.end > len {
                return Err(QuillError::training_data(format!(
                    "entity '{}' [{}, {}) is out of range for example '{}'",
                    entity.entity,
                    entity.start,
                    entity.end,
                    example.text()
                )));
            }
        }
    }
    Ok(())
}
