//! Output emulators.
//!
//! An [`Emulator`] normalises incoming parse requests and maps the canonical
//! [`ParseResult`] into a third-party response shape. Response mapping is a
//! pure function of the result.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use quill_types::message::ParseResult;
use quill_types::{QuillError, Result};

/// A normalised parse request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseRequest {
    /// Text to parse.
    pub text: String,
    /// Target project; the router's default project when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Explicit model id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Reference time passed to components.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

fn string_field(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(|v| v.as_str()).map(str::to_string),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Request and response shape adapter.
pub trait Emulator: Send + Sync {
    /// Mode name.
    fn name(&self) -> &str;

    /// Extract a [`ParseRequest`] from a JSON body or query map.
    ///
    /// Accepts the text under `q` or `text`.
    fn normalise_request(&self, data: &Value) -> Result<ParseRequest> {
        let text = string_field(data, "q")
            .or_else(|| string_field(data, "text"))
            .ok_or_else(|| QuillError::config("invalid parse parameter specified: expected 'q' or 'text'"))?;
        Ok(ParseRequest {
            text,
            project: string_field(data, "project"),
            model: string_field(data, "model"),
            time: string_field(data, "time"),
        })
    }

    /// Map a canonical result into the emulated shape.
    fn normalise_response(&self, result: &ParseResult) -> Value;
}

/// Identity emulator: the canonical result shape.
pub struct NoEmulator;

impl Emulator for NoEmulator {
    fn name(&self) -> &str {
        "none"
    }

    fn normalise_response(&self, result: &ParseResult) -> Value {
        serde_json::to_value(result).unwrap_or(Value::Null)
    }
}

/// wit.ai response shape.
pub struct WitEmulator;

impl Emulator for WitEmulator {
    fn name(&self) -> &str {
        "wit"
    }

    fn normalise_response(&self, result: &ParseResult) -> Value {
        let mut entities = serde_json::Map::new();
        for e in &result.entities {
            entities.insert(
                e.entity.clone(),
                json!({
                    "confidence": null,
                    "type": "value",
                    "value": e.value,
                    "start": e.start,
                    "end": e.end,
                }),
            );
        }
        json!([{
            "_text": result.text,
            "confidence": null,
            "intent": result.intent.name,
            "entities": entities,
        }])
    }
}

/// LUIS response shape.
pub struct LuisEmulator;

impl Emulator for LuisEmulator {
    fn name(&self) -> &str {
        "luis"
    }

    fn normalise_response(&self, result: &ParseResult) -> Value {
        let intent = |name: &str, score: f64| json!({"intent": name, "score": score});
        let intents: Vec<Value> = if result.intent_ranking.is_empty() {
            vec![intent(&result.intent.name, result.intent.confidence)]
        } else {
            result
                .intent_ranking
                .iter()
                .map(|i| intent(&i.name, i.confidence))
                .collect()
        };
        let entities: Vec<Value> = result
            .entities
            .iter()
            .map(|e| {
                json!({
                    "entity": e.value,
                    "type": e.entity,
                    "startIndex": e.start,
                    "endIndex": e.end.saturating_sub(1),
                    "score": null,
                })
            })
            .collect();
        json!({
            "query": result.text,
            "topScoringIntent": intent(&result.intent.name, result.intent.confidence),
            "intents": intents,
            "entities": entities,
        })
    }
}

/// Create the emulator for `mode`. `None` selects the identity emulator.
pub fn create_emulator(mode: Option<&str>) -> Result<Arc<dyn Emulator>> {
    match mode.map(str::to_lowercase).as_deref() {
        None | Some("") | Some("none") => Ok(Arc::new(NoEmulator)),
        Some("wit") => Ok(Arc::new(WitEmulator)),
        Some("luis") => Ok(Arc::new(LuisEmulator)),
        Some(other) => Err(QuillError::config(format!(
            "unknown emulation mode '{other}', expected one of: wit, luis"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_types::message::{Entity, Intent};

    fn result() -> ParseResult {
        let mut r = ParseResult::empty("fly to berlin");
        r.intent = Intent::new("book", 0.8);
        r.entities = vec![Entity::new(7, 13, "berlin", "city")];
        r
    }

    #[test]
    fn request_accepts_q_or_text() {
        let em = NoEmulator;
        let req = em.normalise_request(&json!({"q": "hello", "project": "p1"})).unwrap();
        assert_eq!(req.text, "hello");
        assert_eq!(req.project.as_deref(), Some("p1"));
        let req = em.normalise_request(&json!({"text": "hi", "model": "m"})).unwrap();
        assert_eq!(req.text, "hi");
        assert_eq!(req.model.as_deref(), Some("m"));
        assert!(em.normalise_request(&json!({"project": "p1"})).is_err());
    }

    #[test]
    fn identity_is_canonical() {
        let js = NoEmulator.normalise_response(&result());
        assert_eq!(js["intent"]["name"], "book");
        assert_eq!(js["entities"][0]["value"], "berlin");
    }

    #[test]
    fn wit_shape() {
        let js = WitEmulator.normalise_response(&result());
        assert_eq!(js[0]["_text"], "fly to berlin");
        assert_eq!(js[0]["intent"], "book");
        assert_eq!(js[0]["entities"]["city"]["value"], "berlin");
    }

    #[test]
    fn luis_shape() {
        let js = LuisEmulator.normalise_response(&result());
        assert_eq!(js["topScoringIntent"]["intent"], "book");
        assert_eq!(js["intents"][0]["score"], 0.8);
        assert_eq!(js["entities"][0]["endIndex"], 12);
    }

    #[test]
    fn response_mapping_is_pure() {
        let r = result();
        assert_eq!(LuisEmulator.normalise_response(&r), LuisEmulator.normalise_response(&r));
        assert_eq!(r, result());
    }

    #[test]
    fn unknown_mode_is_config_error() {
        assert_eq!(create_emulator(None).unwrap().name(), "none");
        assert_eq!(create_emulator(Some("WIT")).unwrap().name(), "wit");
        assert!(matches!(
            create_emulator(Some("dialogflow")).err().unwrap(),
            QuillError::InvalidConfig { .. }
        ));
    }
}
