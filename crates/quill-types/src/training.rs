//! Training data container.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// A named regular expression used as an intent feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexFeature {
    /// Feature name.
    pub name: String,
    /// Pattern in `regex` crate syntax.
    pub pattern: String,
}

/// A training data set: examples plus entity synonyms and regex features.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingData {
    /// All examples, in file order.
    pub training_examples: Vec<Message>,
    /// Synonym surface form (lowercased) -> canonical value.
    pub entity_synonyms: BTreeMap<String, String>,
    /// Regex features, in file order.
    pub regex_features: Vec<RegexFeature>,
}

impl TrainingData {
    /// Create a data set from its parts.
    pub fn new(
        training_examples: Vec<Message>,
        entity_synonyms: BTreeMap<String, String>,
        regex_features: Vec<RegexFeature>,
    ) -> Self {
        Self {
            training_examples,
            entity_synonyms,
            regex_features,
        }
    }

    /// Examples carrying an intent label.
    pub fn intent_examples(&self) -> impl Iterator<Item = &Message> {
        self.training_examples
            .iter()
            .filter(|m| m.intent_name().is_some())
    }

    /// Examples carrying at least one entity annotation.
    pub fn entity_examples(&self) -> impl Iterator<Item = &Message> {
        self.training_examples
            .iter()
            .filter(|m| !m.entities().is_empty())
    }

    /// Distinct intent labels, sorted.
    pub fn intents(&self) -> BTreeSet<String> {
        self.intent_examples()
            .filter_map(|m| m.intent_name().map(str::to_string))
            .collect()
    }

    /// Distinct entity types, sorted.
    pub fn entity_types(&self) -> BTreeSet<String> {
        self.entity_examples()
            .flat_map(|m| m.entities().iter().map(|e| e.entity.clone()))
            .collect()
    }

    /// Whether the data set has no examples at all.
    pub fn is_empty(&self) -> bool {
        self.training_examples.is_empty()
    }

    /// Merge other data sets into this one. Later synonyms win.
    pub fn merge(mut self, others: impl IntoIterator<Item = TrainingData>) -> Self {
        for other in others {
            self.training_examples.extend(other.training_examples);
            self.entity_synonyms.extend(other.entity_synonyms);
            self.regex_features.extend(other.regex_features);
        }
        self
    }
}
