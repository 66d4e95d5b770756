//! The markdown training data format.
//!
//! ```text
//! ## intent:restaurant_search
//! - show me [mexican](cuisine) places
//! - food in [NYC](location:new york)
//!
//! ## synonym:new york
//! - big apple
//!
//! ## regex:zipcode
//! - [0-9]{5}
//! ```

use std::collections::BTreeMap;

use regex::Regex;
use tracing::warn;

use quill_types::message::{Entity, Message, char_slice};
use quill_types::training::{RegexFeature, TrainingData};
use quill_types::{QuillError, Result};

const INTENT: &str = "intent";
const SYNONYM: &str = "synonym";
const REGEX: &str = "regex";

/// Section names that may follow `## `.
pub const AVAILABLE_SECTIONS: &[&str] = &[INTENT, SYNONYM, REGEX];

const ENTITY_ANNOTATION: &str = r"\[(?P<text>[^\]]+)\]\((?P<entity>[^:)]+)(?::(?P<value>[^)]+))?\)";

fn annotation_regex() -> Result<Regex> {
    Regex::new(ENTITY_ANNOTATION).map_err(|e| QuillError::training_data(e.to_string()))
}

/// Whether `content` contains any known section marker.
pub fn is_markdown(content: &str) -> bool {
    AVAILABLE_SECTIONS
        .iter()
        .any(|s| content.contains(&format!("## {s}:")))
}

enum Section {
    Intent(String),
    Synonym(String),
    Regex(String),
}

/// Parse one example line into plain text and entity annotations.
fn parse_example(annotation: &Regex, line: &str) -> (String, Vec<Entity>) {
    let mut text = String::new();
    let mut entities = Vec::new();
    let mut last = 0;
    for caps in annotation.captures_iter(line) {
        let (Some(whole), Some(surface), Some(entity)) = (caps.get(0), caps.name("text"), caps.name("entity")) else {
            continue;
        };
        text.push_str(&line[last..whole.start()]);
        let start = text.chars().count();
        text.push_str(surface.as_str());
        let end = text.chars().count();
        let value = caps
            .name("value")
            .map_or_else(|| surface.as_str().to_string(), |v| v.as_str().to_string());
        entities.push(Entity::new(start, end, value, entity.as_str().trim()));
        last = whole.end();
    }
    text.push_str(&line[last..]);
    (text, entities)
}

/// Read markdown training data.
pub fn read(content: &str) -> Result<TrainingData> {
    let annotation = annotation_regex()?;
    let mut examples = Vec::new();
    let mut synonyms = BTreeMap::new();
    let mut regex_features = Vec::new();
    let mut section: Option<Section> = None;

    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if let Some(header) = line.strip_prefix("## ") {
            let (kind, name) = header.split_once(':').ok_or_else(|| {
                QuillError::training_data(format!("line {}: malformed section header '{line}'", lineno + 1))
            })?;
            let name = name.trim().to_string();
            section = Some(match kind.trim() {
                INTENT => Section::Intent(name),
                SYNONYM => Section::Synonym(name),
                REGEX => Section::Regex(name),
                other => {
                    return Err(QuillError::training_data(format!(
                        "line {}: unknown section '{other}', expected one of {}",
                        lineno + 1,
                        AVAILABLE_SECTIONS.join(", ")
                    )));
                }
            });
            continue;
        }
        let Some(item) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) else {
            continue;
        };
        match &section {
            Some(Section::Intent(intent)) => {
                let (text, entities) = parse_example(&annotation, item);
                for e in &entities {
                    let surface = char_slice(&text, e.start, e.end);
                    if surface != e.value {
                        synonyms.insert(surface.to_lowercase(), e.value.clone());
                    }
                }
                examples.push(Message::training_example(text, Some(intent.clone()), entities));
            }
            Some(Section::Synonym(value)) => {
                synonyms.insert(item.trim().to_lowercase(), value.clone());
            }
            Some(Section::Regex(name)) => regex_features.push(RegexFeature {
                name: name.clone(),
                pattern: item.trim().to_string(),
            }),
            None => {
                return Err(QuillError::training_data(format!(
                    "line {}: list item outside of any section",
                    lineno + 1
                )));
            }
        }
    }

    let data = TrainingData::new(examples, synonyms, regex_features);
    super::validate(&data)?;
    Ok(data)
}

fn annotate(message: &Message) -> String {
    let text = message.text();
    let mut entities: Vec<&Entity> = message.entities().iter().collect();
    entities.sort_by_key(|e| e.start);

    let mut out = String::new();
    let mut pos = 0;
    for e in entities {
        if e.start < pos {
            continue;
        }
        out.push_str(&char_slice(text, pos, e.start));
        let surface = char_slice(text, e.start, e.end);
        if surface == e.value {
            out.push_str(&format!("[{surface}]({})", e.entity));
        } else {
            out.push_str(&format!("[{surface}]({}:{})", e.entity, e.value));
        }
        pos = e.end;
    }
    out.push_str(&char_slice(text, pos, text.chars().count()));
    out
}

/// Write `data` as markdown.
///
/// Examples without an intent label cannot be expressed and are skipped.
pub fn to_markdown(data: &TrainingData) -> String {
    let mut by_intent: BTreeMap<&str, Vec<&Message>> = BTreeMap::new();
    let mut skipped = 0;
    for example in &data.training_examples {
        match example.intent_name() {
            Some(intent) => by_intent.entry(intent).or_default().push(example),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(skipped, "examples without an intent cannot be written as markdown");
    }

    let mut out = String::new();
    for (intent, examples) in by_intent {
        out.push_str(&format!("## {INTENT}:{intent}\n"));
        for example in examples {
            out.push_str(&format!("- {}\n", annotate(example)));
        }
        out.push('\n');
    }

    let mut by_value: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (synonym, value) in &data.entity_synonyms {
        by_value.entry(value.as_str()).or_default().push(synonym.as_str());
    }
    for (value, synonyms) in by_value {
        out.push_str(&format!("## {SYNONYM}:{value}\n"));
        for synonym in synonyms {
            out.push_str(&format!("- {synonym}\n"));
        }
        out.push('\n');
    }

    for feature in &data.regex_features {
        out.push_str(&format!("## {REGEX}:{}\n- {}\n\n", feature.name, feature.pattern));
    }
    out
}
