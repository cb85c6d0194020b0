//! Response normalization for buffered (non-streaming) bodies.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Error;
use crate::request::ResponseFormat;

/// Share of non-ASCII characters above which a translation is suspected
/// to still be in the source language (one in five).
const NON_ASCII_DIVISOR: usize = 5;

/// Uniform result shape: at least `{text}` for plain formats, the provider's
/// full JSON object (segments, words, ...) for JSON formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranscriptResult(Value);

impl TranscriptResult {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(json!({ "text": text.into() }))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// The `text` field, when present and a string
    pub fn text(&self) -> Option<&str> {
        self.0.get("text").and_then(Value::as_str)
    }

    /// Text for a text event: the `text` field, or the whole result rendered
    /// as JSON when there is none.
    pub fn display_text(&self) -> String {
        match self.0.get("text") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => self.0.to_string(),
        }
    }

    /// Replace the `text` field, keeping any other provider fields
    pub fn with_text(self, text: impl Into<String>) -> Self {
        match self.0 {
            Value::Object(mut map) => {
                map.insert("text".to_string(), Value::String(text.into()));
                Self(Value::Object(map))
            }
            _ => Self::from_text(text),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Normalize a buffered response body.
///
/// JSON formats are parsed and kept as-is. For every other format the body
/// may still be JSON (Azure translation answers with JSON even when `text`
/// was requested), so a JSON object carrying `text` is reduced to `{text}`
/// and anything else is taken verbatim as the text.
pub fn normalize(raw_body: &str, response_format: ResponseFormat) -> Result<TranscriptResult, Error> {
    if response_format.is_json() {
        let value: Value = serde_json::from_str(raw_body).map_err(|e| {
            Error::InvalidResponse(format!("expected a {} body: {}", response_format, e))
        })?;
        return Ok(TranscriptResult(value));
    }

    match serde_json::from_str::<Value>(raw_body) {
        Ok(Value::Object(map)) if map.contains_key("text") => {
            Ok(TranscriptResult(json!({ "text": map["text"] })))
        }
        _ => Ok(TranscriptResult::from_text(raw_body)),
    }
}

/// Best-effort guess that `text` is not English: more than 20% of its
/// characters are outside ASCII.
///
/// This is a heuristic, not a language detector. Short English strings with
/// typographic punctuation or accented loanwords can trip it.
pub fn looks_non_english(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let non_ascii = text.chars().filter(|c| !c.is_ascii()).count();
    non_ascii * NON_ASCII_DIVISOR > total
}
