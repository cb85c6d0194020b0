use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use crate::audio::{self, AudioSource};
use crate::error::Error;
use crate::settings::Settings;

pub const WHISPER_MODEL: &str = "whisper-1";
pub const DEFAULT_MODEL: &str = "gpt-4o-transcribe";
/// Model family prefix that supports streamed transcription
pub const STREAMING_MODEL_PREFIX: &str = "gpt-4o";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    #[default]
    Transcribe,
    Translate,
}

impl Operation {
    /// Path segment under `/audio/`
    pub fn path(self) -> &'static str {
        match self {
            Operation::Transcribe => "transcriptions",
            Operation::Translate => "translations",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
    VerboseJson,
    Srt,
    Vtt,
}

impl ResponseFormat {
    /// Formats only Whisper models can produce
    pub fn is_whisper_only(self) -> bool {
        matches!(
            self,
            ResponseFormat::VerboseJson | ResponseFormat::Srt | ResponseFormat::Vtt
        )
    }

    pub fn is_json(self) -> bool {
        matches!(self, ResponseFormat::Json | ResponseFormat::VerboseJson)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TimestampGranularities {
    #[default]
    None,
    Segment,
    Word,
    SegmentAndWord,
}

impl TimestampGranularities {
    /// Values sent as repeated `timestamp_granularities[]` form fields
    pub fn values(self) -> &'static [&'static str] {
        match self {
            TimestampGranularities::None => &[],
            TimestampGranularities::Segment => &["segment"],
            TimestampGranularities::Word => &["word"],
            TimestampGranularities::SegmentAndWord => &["segment", "word"],
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Default,
    JsonOnly,
    TextOnly,
}

/// Per-call options, keyed the way the host runtime names its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    #[serde(rename = "transcription_type")]
    pub operation: Operation,
    pub model: String,
    pub response_format: ResponseFormat,
    pub prompt: String,
    pub language: String,
    pub timestamp_granularities: TimestampGranularities,
    pub stream: bool,
    #[serde(rename = "output_format")]
    pub output_mode: OutputMode,
    #[serde(rename = "azure_deployment")]
    pub deployment_override: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            operation: Operation::default(),
            model: DEFAULT_MODEL.to_string(),
            response_format: ResponseFormat::default(),
            prompt: String::new(),
            language: String::new(),
            timestamp_granularities: TimestampGranularities::default(),
            stream: false,
            output_mode: OutputMode::default(),
            deployment_override: None,
        }
    }
}

impl RequestOptions {
    /// Parse options from the host's flat parameter mapping.
    ///
    /// `null` values count as absent; the `file` entry is handled separately.
    pub fn from_parameters(parameters: &Map<String, Value>) -> Result<Self, Error> {
        let cleaned: Map<String, Value> = parameters
            .iter()
            .filter(|(key, value)| !value.is_null() && key.as_str() != "file")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        serde_json::from_value(Value::Object(cleaned))
            .map_err(|e| Error::InvalidParameter(e.to_string()))
    }

    /// Deployment override with blank values treated as absent
    pub fn deployment_override(&self) -> Option<&str> {
        self.deployment_override
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// One invocation: the audio to send plus the per-call options.
pub struct InvocationRequest {
    pub audio: Option<Box<dyn AudioSource>>,
    pub options: RequestOptions,
}

impl fmt::Debug for InvocationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationRequest")
            .field("audio", &self.audio.as_ref().map(|a| a.name().to_string()))
            .field("options", &self.options)
            .finish()
    }
}

impl InvocationRequest {
    pub fn new(audio: impl AudioSource + 'static, options: RequestOptions) -> Self {
        Self {
            audio: Some(Box::new(audio)),
            options,
        }
    }

    /// Build a request from the host's parameter mapping, including its `file` entry.
    pub fn from_parameters(
        parameters: &Map<String, Value>,
        settings: &Settings,
    ) -> Result<Self, Error> {
        let audio = match parameters.get("file") {
            Some(value) if !value.is_null() => Some(audio::from_parameter(value, settings)?),
            _ => None,
        };

        Ok(Self {
            audio,
            options: RequestOptions::from_parameters(parameters)?,
        })
    }
}
