//! Intent classifiers.
//!
//! - [`KeywordClassifier`]: rule-based, no training. Backs the fallback model.
//! - [`NaiveBayesClassifier`]: multinomial naive Bayes over `text_features`.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use quill_types::config::{ComponentConfig, ModelConfig};
use quill_types::message::{Intent, Message, Property, keys};
use quill_types::training::TrainingData;
use quill_types::{QuillError, Result};

use super::{read_artifact, write_artifact};
use crate::component::{Component, ComponentFactory, Context, ContextUpdate};

// ---------------------------------------------------------------------------
// Keyword classifier
// ---------------------------------------------------------------------------

/// Keywords used when the config names none.
const DEFAULT_KEYWORDS: &[(&str, &[&str])] = &[
    ("greet", &["hello", "hi", "hey"]),
    ("goodbye", &["bye", "goodbye"]),
];

/// Matches whole-word keywords, case-insensitively.
///
/// Intents are tried in name order; the first one with a matching keyword
/// wins with confidence `1.0`.
pub struct KeywordClassifier {
    config: ComponentConfig,
    patterns: Vec<(String, Regex)>,
}

impl KeywordClassifier {
    fn from_config(config: ComponentConfig) -> Result<Self> {
        let keywords: BTreeMap<String, Vec<String>> = match config.get("keywords") {
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
                QuillError::config(format!("intent_classifier_keyword: invalid 'keywords': {e}"))
            })?,
            None => BTreeMap::new(),
        };
        let mut patterns = Vec::with_capacity(keywords.len());
        for (intent, words) in keywords {
            if words.is_empty() {
                continue;
            }
            let alternatives: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
            let re = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
                .map_err(|e| QuillError::config(format!("intent_classifier_keyword: {e}")))?;
            patterns.push((intent, re));
        }
        Ok(Self { config, patterns })
    }

    /// The intent for `text`, if any keyword matches.
    pub fn classify(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(intent, _)| intent.as_str())
    }
}

impl Component for KeywordClassifier {
    fn config(&self) -> &ComponentConfig {
        &self.config
    }

    fn process(&self, message: &mut Message, _context: &Context) -> Result<()> {
        if let Some(intent) = self.classify(message.text()) {
            message.set_output(keys::INTENT, Property::Intent(Intent::new(intent, 1.0)));
        }
        Ok(())
    }
}

/// Factory for [`KeywordClassifier`].
pub struct KeywordClassifierFactory;

impl ComponentFactory for KeywordClassifierFactory {
    fn name(&self) -> &str {
        "intent_classifier_keyword"
    }

    fn provides(&self) -> &[&str] {
        &[keys::INTENT]
    }

    fn defaults(&self) -> ComponentConfig {
        let mut config = ComponentConfig::named(self.name());
        let keywords: serde_json::Map<String, serde_json::Value> = DEFAULT_KEYWORDS
            .iter()
            .map(|(intent, words)| ((*intent).to_string(), serde_json::json!(words)))
            .collect();
        config.insert("keywords", serde_json::Value::Object(keywords));
        config
    }

    fn create(&self, config: ComponentConfig, _: &ModelConfig) -> Result<Box<dyn Component>> {
        Ok(Box::new(KeywordClassifier::from_config(config)?))
    }
}

// ---------------------------------------------------------------------------
// Naive Bayes
// ---------------------------------------------------------------------------

const NAIVE_BAYES_FILE: &str = "naive_bayes_classifier.json";

/// Learned parameters of a multinomial naive Bayes model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NaiveBayesModel {
    /// Class labels, sorted.
    pub classes: Vec<String>,
    /// `ln P(class)`.
    pub class_log_prior: Vec<f64>,
    /// `ln P(feature | class)`, one row per class.
    pub feature_log_prob: Vec<Vec<f64>>,
}

impl NaiveBayesModel {
    /// Fit on `(features, label)` pairs with additive smoothing `alpha`.
    pub fn fit(samples: &[(&[f64], &str)], alpha: f64) -> Self {
        let mut by_class: BTreeMap<&str, Vec<&[f64]>> = BTreeMap::new();
        for (features, label) in samples {
            by_class.entry(*label).or_default().push(*features);
        }
        let n_features = samples.iter().map(|(f, _)| f.len()).max().unwrap_or(0);
        let total = samples.len() as f64;

        let mut model = Self::default();
        for (label, rows) in by_class {
            let mut counts = vec![alpha; n_features];
            for row in &rows {
                for (c, x) in counts.iter_mut().zip(row.iter()) {
                    *c += x.max(0.0);
                }
            }
            let sum: f64 = counts.iter().sum();
            model.classes.push(label.to_string());
            model.class_log_prior.push((rows.len() as f64 / total).ln());
            model
                .feature_log_prob
                .push(counts.iter().map(|c| if sum > 0.0 { (c / sum).ln() } else { 0.0 }).collect());
        }
        model
    }

    /// Class probabilities for `features`, in class order.
    pub fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        let joint: Vec<f64> = self
            .class_log_prior
            .iter()
            .zip(&self.feature_log_prob)
            .map(|(prior, log_probs)| {
                prior + log_probs.iter().zip(features).map(|(lp, x)| lp * x).sum::<f64>()
            })
            .collect();
        let max = joint.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = joint.iter().map(|j| (j - max).exp()).collect();
        let norm: f64 = exp.iter().sum();
        exp.into_iter().map(|e| e / norm).collect()
    }

    /// Ranked intents, best first, ties broken by name.
    pub fn rank(&self, features: &[f64], limit: usize) -> Vec<Intent> {
        let mut ranking: Vec<Intent> = self
            .classes
            .iter()
            .zip(self.predict_proba(features))
            .map(|(name, p)| Intent::new(name.clone(), p))
            .collect();
        ranking.sort_by(|a, b| b.confidence.total_cmp(&a.confidence).then_with(|| a.name.cmp(&b.name)));
        ranking.truncate(limit);
        ranking
    }
}

/// Multinomial naive Bayes intent classifier.
pub struct NaiveBayesClassifier {
    config: ComponentConfig,
    model: NaiveBayesModel,
}

impl NaiveBayesClassifier {
    fn alpha(&self) -> f64 {
        self.config.get_f64("alpha").unwrap_or(1.0)
    }

    fn max_ranking(&self) -> usize {
        self.config.get_usize("max_ranking").unwrap_or(10)
    }
}

impl Component for NaiveBayesClassifier {
    fn config(&self) -> &ComponentConfig {
        &self.config
    }

    fn train(
        &mut self,
        data: &mut TrainingData,
        _config: &ModelConfig,
        _context: &Context,
    ) -> Result<Option<ContextUpdate>> {
        let samples: Vec<(&[f64], &str)> = data
            .training_examples
            .iter()
            .filter_map(|m| Some((m.features()?, m.intent_name()?)))
            .collect();
        self.model = NaiveBayesModel::fit(&samples, self.alpha());
        debug!(
            classes = self.model.classes.len(),
            examples = samples.len(),
            "trained naive bayes classifier"
        );
        Ok(None)
    }

    fn process(&self, message: &mut Message, _context: &Context) -> Result<()> {
        if self.model.classes.is_empty() {
            return Ok(());
        }
        let features = message.features().unwrap_or_default();
        let ranking = self.model.rank(features, self.max_ranking());
        if let Some(top) = ranking.first().cloned() {
            message.set_output(keys::INTENT, Property::Intent(top));
            message.set_output(keys::INTENT_RANKING, Property::Ranking(ranking));
        }
        Ok(())
    }

    fn persist(&self, model_dir: &Path) -> Result<Option<ComponentConfig>> {
        write_artifact(model_dir, "classifier_file", NAIVE_BAYES_FILE, &self.model)
    }
}

/// Factory for [`NaiveBayesClassifier`].
pub struct NaiveBayesClassifierFactory;

impl ComponentFactory for NaiveBayesClassifierFactory {
    fn name(&self) -> &str {
        "intent_classifier_naive_bayes"
    }

    fn provides(&self) -> &[&str] {
        &[keys::INTENT, keys::INTENT_RANKING]
    }

    fn requires(&self) -> &[&str] {
        &[keys::TEXT_FEATURES]
    }

    fn defaults(&self) -> ComponentConfig {
        let mut config = ComponentConfig::named(self.name());
        config.insert("alpha", serde_json::json!(1.0));
        config.insert("max_ranking", serde_json::json!(10));
        config
    }

    fn create(&self, config: ComponentConfig, _: &ModelConfig) -> Result<Box<dyn Component>> {
        Ok(Box::new(NaiveBayesClassifier {
            config,
            model: NaiveBayesModel::default(),
        }))
    }

    fn load(&self, model_dir: &Path, config: ComponentConfig, _: &Context) -> Result<Box<dyn Component>> {
        let model = read_artifact(model_dir, &config, "classifier_file")?.unwrap_or_default();
        Ok(Box::new(NaiveBayesClassifier { config, model }))
    }
}
