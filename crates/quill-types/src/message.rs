//! Messages flowing through a pipeline and the result shape returned to callers.
//!
//! A [`Message`] carries the raw text plus a property map that components
//! fill in one after another. Properties flagged as output end up in the
//! [`ParseResult`] handed back to the caller.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Well-known property keys written by the built-in components.
pub mod keys {
    /// Tokenized text ([`Property::Tokens`](super::Property::Tokens)).
    pub const TOKENS: &str = "tokens";
    /// Dense feature vector ([`Property::Features`](super::Property::Features)).
    pub const TEXT_FEATURES: &str = "text_features";
    /// Top intent ([`Property::Intent`](super::Property::Intent)).
    pub const INTENT: &str = "intent";
    /// Ranked intents ([`Property::Ranking`](super::Property::Ranking)).
    pub const INTENT_RANKING: &str = "intent_ranking";
    /// Extracted entities ([`Property::Entities`](super::Property::Entities)).
    pub const ENTITIES: &str = "entities";
}

/// A single token and its char offset in the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Token surface text.
    pub text: String,
    /// Offset of the first char of the token, in chars.
    pub offset: usize,
}

impl Token {
    /// Create a token.
    pub fn new(text: impl Into<String>, offset: usize) -> Self {
        Self {
            text: text.into(),
            offset,
        }
    }

    /// Char offset one past the last char of the token.
    pub fn end(&self) -> usize {
        self.offset + self.text.chars().count()
    }
}

/// An intent label with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Intent name; empty when nothing was predicted.
    pub name: String,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
}

impl Intent {
    /// Create an intent prediction.
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }

    /// The "nothing predicted" intent.
    pub fn empty() -> Self {
        Self::new("", 0.0)
    }
}

impl Default for Intent {
    fn default() -> Self {
        Self::empty()
    }
}

/// An entity annotation or prediction. Offsets are char offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Start char offset (inclusive).
    pub start: usize,
    /// End char offset (exclusive).
    pub end: usize,
    /// Normalised value.
    pub value: String,
    /// Entity type.
    pub entity: String,
    /// Component that produced the entity (absent for gold annotations).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extractor: Option<String>,
    /// Components that rewrote the value after extraction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processors: Vec<String>,
}

impl Entity {
    /// Create an annotation without extractor information.
    pub fn new(start: usize, end: usize, value: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            start,
            end,
            value: value.into(),
            entity: entity.into(),
            extractor: None,
            processors: Vec::new(),
        }
    }
}

/// A typed property value attached to a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Property {
    /// Tokenized text.
    Tokens(Vec<Token>),
    /// Numeric feature vector.
    Features(Vec<f64>),
    /// A single intent.
    Intent(Intent),
    /// A ranked list of intents.
    Ranking(Vec<Intent>),
    /// A list of entities.
    Entities(Vec<Entity>),
    /// Anything else.
    Value(serde_json::Value),
}

impl Property {
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A unit of text under analysis.
///
/// Owned exclusively by one pipeline execution (or one training example)
/// and mutated in place by each component.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    text: String,
    time: Option<String>,
    properties: BTreeMap<String, Property>,
    output_properties: BTreeSet<String>,
}

impl Message {
    /// Create a message with no properties.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            time: None,
            properties: BTreeMap::new(),
            output_properties: BTreeSet::new(),
        }
    }

    /// Create a training example with optional gold intent and entities.
    pub fn training_example(
        text: impl Into<String>,
        intent: Option<String>,
        entities: Vec<Entity>,
    ) -> Self {
        let mut msg = Self::new(text);
        if let Some(intent) = intent.filter(|i| !i.is_empty()) {
            msg.set(keys::INTENT, Property::Value(serde_json::Value::String(intent)));
        }
        if !entities.is_empty() {
            msg.set(keys::ENTITIES, Property::Entities(entities));
        }
        msg
    }

    /// Attach the reference time passed along with a parse request.
    pub fn with_time(mut self, time: Option<String>) -> Self {
        self.time = time;
        self
    }

    /// Raw text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Reference time, if any.
    pub fn time(&self) -> Option<&str> {
        self.time.as_deref()
    }

    /// Set a property without flagging it as output.
    pub fn set(&mut self, key: impl Into<String>, value: Property) {
        self.properties.insert(key.into(), value);
    }

    /// Set a property and flag it as output.
    pub fn set_output(&mut self, key: impl Into<String>, value: Property) {
        let key = key.into();
        self.output_properties.insert(key.clone());
        self.properties.insert(key, value);
    }

    /// Look up a property.
    pub fn get(&self, key: &str) -> Option<&Property> {
        self.properties.get(key)
    }

    /// Whether a property is present.
    pub fn has(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Tokens, if a tokenizer ran.
    pub fn tokens(&self) -> Option<&[Token]> {
        match self.properties.get(keys::TOKENS) {
            Some(Property::Tokens(t)) => Some(t),
            _ => None,
        }
    }

    /// Feature vector, if a featurizer ran.
    pub fn features(&self) -> Option<&[f64]> {
        match self.properties.get(keys::TEXT_FEATURES) {
            Some(Property::Features(f)) => Some(f),
            _ => None,
        }
    }

    /// Entities (gold or predicted). Empty when none are set.
    pub fn entities(&self) -> &[Entity] {
        match self.properties.get(keys::ENTITIES) {
            Some(Property::Entities(e)) => e,
            _ => &[],
        }
    }

    /// Intent name, either a gold label or a predicted intent.
    pub fn intent_name(&self) -> Option<&str> {
        match self.properties.get(keys::INTENT) {
            Some(Property::Intent(i)) if !i.name.is_empty() => Some(&i.name),
            Some(Property::Value(serde_json::Value::String(s))) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Predicted intent, if a classifier ran.
    pub fn intent(&self) -> Option<&Intent> {
        match self.properties.get(keys::INTENT) {
            Some(Property::Intent(i)) => Some(i),
            _ => None,
        }
    }

    /// Output properties as a JSON map.
    pub fn output(&self) -> serde_json::Map<String, serde_json::Value> {
        self.output_properties
            .iter()
            .filter_map(|k| self.properties.get(k).map(|v| (k.clone(), v.to_json())))
            .collect()
    }
}

/// The canonical parse result returned by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    /// Top intent (empty when nothing was predicted).
    pub intent: Intent,
    /// Ranked alternatives, best first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intent_ranking: Vec<Intent>,
    /// Extracted entities.
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// The parsed text.
    pub text: String,
    /// Additional output properties written by custom components.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ParseResult {
    /// Default output attributes for `text`.
    pub fn empty(text: impl Into<String>) -> Self {
        Self {
            intent: Intent::empty(),
            intent_ranking: Vec::new(),
            entities: Vec::new(),
            text: text.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Build the result from a processed message, falling back to defaults.
    pub fn from_message(message: &Message) -> Self {
        let mut result = Self::empty(message.text());
        for (key, value) in message.output() {
            match key.as_str() {
                keys::INTENT => {
                    if let Some(Property::Intent(i)) = message.get(keys::INTENT) {
                        result.intent = i.clone();
                    }
                }
                keys::INTENT_RANKING => {
                    if let Some(Property::Ranking(r)) = message.get(keys::INTENT_RANKING) {
                        result.intent_ranking = r.clone();
                    }
                }
                keys::ENTITIES => result.entities = message.entities().to_vec(),
                _ => {
                    result.extra.insert(key, value);
                }
            }
        }
        result
    }
}

/// Slice `text` by char offsets `[start, end)`.
pub fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_only_contains_flagged_properties() {
        let mut msg = Message::new("hello there");
        msg.set(keys::TOKENS, Property::Tokens(vec![Token::new("hello", 0)]));
        msg.set_output(keys::INTENT, Property::Intent(Intent::new("greet", 0.9)));

        let out = msg.output();
        assert!(out.contains_key("intent"));
        assert!(!out.contains_key("tokens"));
        assert_eq!(out["intent"]["name"], "greet");
    }

    #[test]
    fn parse_result_defaults_for_empty_message() {
        let result = ParseResult::from_message(&Message::new("xyz"));
        assert_eq!(result.intent, Intent::empty());
        assert!(result.entities.is_empty());
        assert_eq!(result.text, "xyz");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["intent"]["name"], "");
        assert_eq!(json["intent"]["confidence"], 0.0);
        assert!(json.get("intent_ranking").is_none());
    }

    #[test]
    fn parse_result_keeps_custom_outputs() {
        let mut msg = Message::new("hi");
        msg.set_output("sentiment", Property::Value(serde_json::json!("positive")));
        let result = ParseResult::from_message(&msg);
        assert_eq!(result.extra["sentiment"], "positive");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["sentiment"], "positive");
    }

    #[test]
    fn training_example_keeps_gold_labels() {
        let msg = Message::training_example(
            "fly to berlin",
            Some("book_flight".into()),
            vec![Entity::new(7, 13, "berlin", "city")],
        );
        assert_eq!(msg.intent_name(), Some("book_flight"));
        assert_eq!(msg.entities().len(), 1);
        assert!(msg.intent().is_none());
    }

    #[test]
    fn char_slice_handles_multibyte() {
        assert_eq!(char_slice("hey ńöñàśçií you", 4, 12), "ńöñàśçií");
        assert_eq!(Token::new("ńöñàśçií", 4).end(), 12);
    }
}
