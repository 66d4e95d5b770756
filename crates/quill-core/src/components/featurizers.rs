//! Intent featurizers: turn a message into a dense feature vector.
//!
//! Both featurizers append to any `text_features` already present, so they
//! can be stacked in one pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use quill_types::config::{ComponentConfig, ModelConfig};
use quill_types::message::{Message, keys};
use quill_types::training::{RegexFeature, TrainingData};
use quill_types::{QuillError, Result};

use super::{read_artifact, write_artifact};
use crate::component::{Component, ComponentFactory, Context, ContextUpdate, append_features};

/// Context key carrying the learned vocabulary size.
pub const VOCABULARY_SIZE: &str = "vocabulary_size";

// ---------------------------------------------------------------------------
// Count vectors
// ---------------------------------------------------------------------------

const COUNT_VECTORS_FILE: &str = "count_vectors_featurizer.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Vocabulary {
    vocabulary: Vec<String>,
}

/// Bag-of-words token counts over a vocabulary learned at training time.
pub struct CountVectorsFeaturizer {
    config: ComponentConfig,
    vocabulary: BTreeMap<String, usize>,
}

impl CountVectorsFeaturizer {
    fn with_vocabulary(config: ComponentConfig, words: Vec<String>) -> Self {
        let vocabulary = words.into_iter().enumerate().map(|(i, w)| (w, i)).collect();
        Self { config, vocabulary }
    }

    fn lowercase(&self) -> bool {
        self.config.get_bool("lowercase").unwrap_or(true)
    }

    fn normalise(&self, token: &str) -> String {
        if self.lowercase() {
            token.to_lowercase()
        } else {
            token.to_string()
        }
    }

    fn features(&self, message: &Message) -> Vec<f64> {
        let mut counts = vec![0.0; self.vocabulary.len()];
        for token in message.tokens().unwrap_or_default() {
            if let Some(&i) = self.vocabulary.get(&self.normalise(&token.text)) {
                counts[i] += 1.0;
            }
        }
        counts
    }

    fn context_update(&self) -> ContextUpdate {
        ContextUpdate::from([(VOCABULARY_SIZE.to_string(), serde_json::json!(self.vocabulary.len()))])
    }
}

impl Component for CountVectorsFeaturizer {
    fn config(&self) -> &ComponentConfig {
        &self.config
    }

    fn provide_context(&self) -> Option<ContextUpdate> {
        (!self.vocabulary.is_empty()).then(|| self.context_update())
    }

    fn train(
        &mut self,
        data: &mut TrainingData,
        _config: &ModelConfig,
        _context: &Context,
    ) -> Result<Option<ContextUpdate>> {
        let words: BTreeSet<String> = data
            .training_examples
            .iter()
            .flat_map(|m| m.tokens().unwrap_or_default())
            .map(|t| self.normalise(&t.text))
            .collect();
        self.vocabulary = words.into_iter().enumerate().map(|(i, w)| (w, i)).collect();

        for example in &mut data.training_examples {
            let features = self.features(example);
            append_features(example, &features);
        }
        Ok(Some(self.context_update()))
    }

    fn process(&self, message: &mut Message, _context: &Context) -> Result<()> {
        let features = self.features(message);
        append_features(message, &features);
        Ok(())
    }

    fn persist(&self, model_dir: &Path) -> Result<Option<ComponentConfig>> {
        let mut words: Vec<(&String, &usize)> = self.vocabulary.iter().collect();
        words.sort_by_key(|(_, i)| **i);
        let artifact = Vocabulary {
            vocabulary: words.into_iter().map(|(w, _)| w.clone()).collect(),
        };
        write_artifact(model_dir, "featurizer_file", COUNT_VECTORS_FILE, &artifact)
    }
}

/// Factory for [`CountVectorsFeaturizer`].
pub struct CountVectorsFeaturizerFactory;

impl ComponentFactory for CountVectorsFeaturizerFactory {
    fn name(&self) -> &str {
        "intent_featurizer_count_vectors"
    }

    fn provides(&self) -> &[&str] {
        &[keys::TEXT_FEATURES]
    }

    fn requires(&self) -> &[&str] {
        &[keys::TOKENS]
    }

    fn context_provides(&self) -> &[&str] {
        &[VOCABULARY_SIZE]
    }

    fn defaults(&self) -> ComponentConfig {
        let mut config = ComponentConfig::named(self.name());
        config.insert("lowercase", serde_json::Value::Bool(true));
        config
    }

    fn create(&self, config: ComponentConfig, _: &ModelConfig) -> Result<Box<dyn Component>> {
        Ok(Box::new(CountVectorsFeaturizer::with_vocabulary(config, Vec::new())))
    }

    fn load(&self, model_dir: &Path, config: ComponentConfig, _: &Context) -> Result<Box<dyn Component>> {
        let artifact: Vocabulary = read_artifact(model_dir, &config, "featurizer_file")?.unwrap_or_default();
        Ok(Box::new(CountVectorsFeaturizer::with_vocabulary(config, artifact.vocabulary)))
    }
}

// ---------------------------------------------------------------------------
// Regex features
// ---------------------------------------------------------------------------

const REGEX_FILE: &str = "regex_featurizer.json";

/// One binary feature per regex pattern found in the training data.
pub struct RegexFeaturizer {
    config: ComponentConfig,
    patterns: Vec<RegexFeature>,
    compiled: Vec<Regex>,
}

impl RegexFeaturizer {
    fn with_patterns(config: ComponentConfig, patterns: Vec<RegexFeature>) -> Result<Self> {
        let compiled = patterns
            .iter()
            .map(|p| {
                Regex::new(&p.pattern).map_err(|e| {
                    QuillError::training_data(format!("invalid regex feature '{}': {e}", p.name))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config,
            patterns,
            compiled,
        })
    }

    fn features(&self, message: &Message) -> Vec<f64> {
        self.compiled
            .iter()
            .map(|re| if re.is_match(message.text()) { 1.0 } else { 0.0 })
            .collect()
    }
}

impl Component for RegexFeaturizer {
    fn config(&self) -> &ComponentConfig {
        &self.config
    }

    fn train(
        &mut self,
        data: &mut TrainingData,
        _config: &ModelConfig,
        _context: &Context,
    ) -> Result<Option<ContextUpdate>> {
        *self = Self::with_patterns(self.config.clone(), data.regex_features.clone())?;
        for example in &mut data.training_examples {
            let features = self.features(example);
            append_features(example, &features);
        }
        Ok(None)
    }

    fn process(&self, message: &mut Message, _context: &Context) -> Result<()> {
        let features = self.features(message);
        append_features(message, &features);
        Ok(())
    }

    fn persist(&self, model_dir: &Path) -> Result<Option<ComponentConfig>> {
        write_artifact(model_dir, "regex_file", REGEX_FILE, &self.patterns)
    }
}

/// Factory for [`RegexFeaturizer`].
pub struct RegexFeaturizerFactory;

impl ComponentFactory for RegexFeaturizerFactory {
    fn name(&self) -> &str {
        "intent_featurizer_regex"
    }

    fn provides(&self) -> &[&str] {
        &[keys::TEXT_FEATURES]
    }

    fn create(&self, config: ComponentConfig, _: &ModelConfig) -> Result<Box<dyn Component>> {
        Ok(Box::new(RegexFeaturizer::with_patterns(config, Vec::new())?))
    }

    fn load(&self, model_dir: &Path, config: ComponentConfig, _: &Context) -> Result<Box<dyn Component>> {
        let patterns: Vec<RegexFeature> = read_artifact(model_dir, &config, "regex_file")?.unwrap_or_default();
        Ok(Box::new(RegexFeaturizer::with_patterns(config, patterns)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_types::message::{Property, Token};

    fn tokenized(text: &str) -> Message {
        let mut msg = Message::training_example(text, Some("greet".into()), vec![]);
        let tokens = crate::components::tokenizers::tokenize_whitespace(text);
        msg.set(keys::TOKENS, Property::Tokens(tokens));
        msg
    }

    #[test]
    fn count_vectors_learn_sorted_vocabulary() {
        let mut data = TrainingData::new(vec![tokenized("Hello there"), tokenized("hello hello")], Default::default(), vec![]);
        let factory = CountVectorsFeaturizerFactory;
        let mut component = factory.create(factory.defaults(), &ModelConfig::default()).unwrap();
        let update = component
            .train(&mut data, &ModelConfig::default(), &Context::default())
            .unwrap()
            .unwrap();
        assert_eq!(update[VOCABULARY_SIZE], 2);
        // vocabulary: ["hello", "there"]
        assert_eq!(data.training_examples[0].features(), Some(&[1.0, 1.0][..]));
        assert_eq!(data.training_examples[1].features(), Some(&[2.0, 0.0][..]));
    }

    #[test]
    fn count_vectors_ignore_unknown_tokens() {
        let featurizer = CountVectorsFeaturizer::with_vocabulary(
            ComponentConfig::named("intent_featurizer_count_vectors"),
            vec!["hello".into()],
        );
        let mut msg = Message::new("bonjour");
        msg.set(keys::TOKENS, Property::Tokens(vec![Token::new("bonjour", 0)]));
        featurizer.process(&mut msg, &Context::default()).unwrap();
        assert_eq!(msg.features(), Some(&[0.0][..]));
    }

    #[test]
    fn regex_features_append() {
        let featurizer = RegexFeaturizer::with_patterns(
            ComponentConfig::named("intent_featurizer_regex"),
            vec![
                RegexFeature { name: "zip".into(), pattern: "[0-9]{5}".into() },
                RegexFeature { name: "greet".into(), pattern: "(?i)\\bhey\\b".into() },
            ],
        )
        .unwrap();
        let mut msg = Message::new("my zip is 12345");
        append_features(&mut msg, &[7.0]);
        featurizer.process(&mut msg, &Context::default()).unwrap();
        assert_eq!(msg.features(), Some(&[7.0, 1.0, 0.0][..]));
    }

    #[test]
    fn invalid_regex_is_training_data_error() {
        let err = RegexFeaturizer::with_patterns(
            ComponentConfig::named("intent_featurizer_regex"),
            vec![RegexFeature { name: "bad".into(), pattern: "(".into() }],
        )
        .err()
        .unwrap();
        assert!(matches!(err, QuillError::InvalidTrainingData { .. }));
    }

    #[test]
    fn count_vectors_persist_and_load() {
        let featurizer = CountVectorsFeaturizer::with_vocabulary(
            ComponentConfig::named("intent_featurizer_count_vectors"),
            vec!["bye".into(), "hello".into()],
        );
        let dir = tempfile::tempdir().unwrap();
        let entry = featurizer.persist(dir.path()).unwrap().unwrap();
        let config = featurizer.config().clone().override_with(&entry);
        let loaded = CountVectorsFeaturizerFactory
            .load(dir.path(), config, &Context::default())
            .unwrap();
        assert_eq!(loaded.provide_context().unwrap()[VOCABULARY_SIZE], 2);
    }
}
