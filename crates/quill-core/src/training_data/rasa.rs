//! The rasa JSON training data format.
//!
//! ```json
//! {"rasa_nlu_data": {
//!     "common_examples": [{"text": "...", "intent": "...", "entities": [...]}],
//!     "intent_examples": [...],
//!     "entity_examples": [...],
//!     "entity_synonyms": [{"value": "new york", "synonyms": ["nyc"]}],
//!     "regex_features": [{"name": "zip", "pattern": "[0-9]{5}"}]
//! }}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use quill_types::message::{Entity, Message};
use quill_types::training::{RegexFeature, TrainingData};
use quill_types::{QuillError, Result};

/// Top-level key identifying the format.
pub const ROOT_KEY: &str = "rasa_nlu_data";

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    rasa_nlu_data: Section,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Section {
    #[serde(default)]
    common_examples: Vec<Example>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    intent_examples: Vec<Example>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    entity_examples: Vec<Example>,
    #[serde(default)]
    entity_synonyms: Vec<Synonyms>,
    #[serde(default)]
    regex_features: Vec<RegexFeature>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Example {
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    intent: Option<String>,
    #[serde(default)]
    entities: Vec<Entity>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Synonyms {
    value: String,
    synonyms: Vec<String>,
}

/// Whether `js` looks like rasa JSON.
pub fn is_rasa(js: &serde_json::Value) -> bool {
    js.get(ROOT_KEY).is_some()
}

/// Read rasa JSON.
pub fn read(js: serde_json::Value) -> Result<TrainingData> {
    let doc: Document = serde_json::from_value(js)
        .map_err(|e| QuillError::training_data(format!("malformed {ROOT_KEY} document: {e}")))?;
    let section = doc.rasa_nlu_data;

    let examples = section
        .common_examples
        .into_iter()
        .chain(section.intent_examples)
        .chain(section.entity_examples)
        .map(|ex| Message::training_example(ex.text, ex.intent, ex.entities))
        .collect();

    let mut synonyms = BTreeMap::new();
    for group in section.entity_synonyms {
        for synonym in group.synonyms {
            synonyms.insert(synonym.to_lowercase(), group.value.clone());
        }
    }

    let data = TrainingData::new(examples, synonyms, section.regex_features);
    super::validate(&data)?;
    Ok(data)
}

/// Write `data` as rasa JSON. All examples go to `common_examples`.
pub fn to_json_string(data: &TrainingData) -> Result<String> {
    let common_examples = data
        .training_examples
        .iter()
        .map(|m| Example {
            text: m.text().to_string(),
            intent: m.intent_name().map(str::to_string),
            entities: m.entities().to_vec(),
        })
        .collect();

    let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (synonym, value) in &data.entity_synonyms {
        grouped.entry(value.as_str()).or_default().push(synonym.clone());
    }
    let entity_synonyms = grouped
        .into_iter()
        .map(|(value, synonyms)| Synonyms {
            value: value.to_string(),
            synonyms,
        })
        .collect();

    let doc = Document {
        rasa_nlu_data: Section {
            common_examples,
            entity_synonyms,
            regex_features: data.regex_features.clone(),
            ..Section::default()
        },
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_all_example_lists() {
        let js = serde_json::json!({
            "rasa_nlu_data": {
                "common_examples": [
                    {"text": "hey", "intent": "greet"},
                    {"text": "show me restaurants in berlin", "intent": "search",
                     "entities": [{"start": 23, "end": 29, "value": "berlin", "entity": "location"}]}
                ],
                "intent_examples": [{"text": "bye", "intent": "goodbye"}],
                "entity_examples": [{"text": "in NYC", "entities": [{"start": 3, "end": 6, "value": "new york", "entity": "location"}]}],
                "entity_synonyms": [{"value": "new york", "synonyms": ["NYC", "big apple"]}],
                "regex_features": [{"name": "zip", "pattern": "[0-9]{5}"}]
            }
        });
        let data = read(js).unwrap();
        assert_eq!(data.training_examples.len(), 4);
        assert_eq!(data.intent_examples().count(), 3);
        assert_eq!(data.entity_examples().count(), 2);
        assert_eq!(data.entity_synonyms["nyc"], "new york");
        assert_eq!(data.regex_features[0].name, "zip");
    }

    #[test]
    fn out_of_range_entity_is_rejected() {
        let js = serde_json::json!({
            "rasa_nlu_data": {"common_examples": [
                {"text": "hi", "intent": "greet",
                 "entities": [{"start": 0, "end": 9, "value": "hi", "entity": "x"}]}
            ]}
        });
        assert!(matches!(read(js), Err(QuillError::InvalidTrainingData { .. })));
    }

    #[test]
    fn written_document_reads_back() {
        let js = serde_json::json!({
            "rasa_nlu_data": {
                "common_examples": [{"text": "hey", "intent": "greet"}],
                "entity_synonyms": [{"value": "new york", "synonyms": ["nyc"]}]
            }
        });
        let data = read(js).unwrap();
        let written = to_json_string(&data).unwrap();
        let again = read(serde_json::from_str(&written).unwrap()).unwrap();
        assert_eq!(again, data);
    }
}
