use serde::Serialize;

use crate::normalize::TranscriptResult;
use crate::request::OutputMode;

/// What an invocation yields to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    Text { text: String },
    Json { result: TranscriptResult },
}

impl OutputEvent {
    pub fn text(text: impl Into<String>) -> Self {
        OutputEvent::Text { text: text.into() }
    }

    pub fn json(result: TranscriptResult) -> Self {
        OutputEvent::Json { result }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            OutputEvent::Text { text } => Some(text),
            OutputEvent::Json { .. } => None,
        }
    }

    pub fn as_result(&self) -> Option<&TranscriptResult> {
        match self {
            OutputEvent::Json { result } => Some(result),
            OutputEvent::Text { .. } => None,
        }
    }
}

/// Events for a buffered result: `json_only` yields the result, `text_only`
/// its text, and the default mode both, JSON first.
pub fn for_result(result: TranscriptResult, mode: OutputMode) -> Vec<OutputEvent> {
    match mode {
        OutputMode::JsonOnly => vec![OutputEvent::json(result)],
        OutputMode::TextOnly => vec![OutputEvent::text(result.display_text())],
        OutputMode::Default => {
            let text = result.display_text();
            vec![OutputEvent::json(result), OutputEvent::text(text)]
        }
    }
}

/// Trailing event after a stream ends: the full text as a result, unless
/// nothing arrived or only text was requested.
pub fn stream_summary(text: &str, mode: OutputMode) -> Option<OutputEvent> {
    if text.is_empty() || mode == OutputMode::TextOnly {
        return None;
    }
    Some(OutputEvent::json(TranscriptResult::from_text(text)))
}
