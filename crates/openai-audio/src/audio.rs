//! Audio sources.
//!
//! The planner and transport never care where audio came from. Every origin
//! implements [`AudioSource`], and an invocation buffers it exactly once into
//! an [`AudioBlob`] that every network attempt re-reads.

use std::io::Read;
use std::time::Duration;

use log::{debug, error};
use serde_json::Value;

use crate::error::Error;
use crate::settings::Settings;

const DEFAULT_FILE_NAME: &str = "audio_file";
const DEFAULT_URL_FILE_NAME: &str = "audio_file.mp4";

/// Capability interface for anything that can provide audio bytes.
pub trait AudioSource: Send {
    /// File name declared to the provider
    fn name(&self) -> &str;

    /// Declared MIME type, empty when unknown
    fn mime_type(&self) -> &str;

    /// Fetch the audio content
    fn bytes(&mut self) -> Result<Vec<u8>, Error>;
}

/// Audio content buffered in memory, re-sendable across retries
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlob {
    name: String,
    mime_type: String,
    bytes: Vec<u8>,
}

impl AudioBlob {
    pub fn load(source: &mut dyn AudioSource) -> Result<Self, Error> {
        let bytes = source.bytes()?;
        if bytes.is_empty() {
            error!("Empty audio content for {}", source.name());
            return Err(Error::UnsupportedFile("Empty file content".to_string()));
        }

        debug!(
            "Buffered audio {} ({} bytes, type {:?})",
            source.name(),
            bytes.len(),
            source.mime_type()
        );

        Ok(Self {
            name: source.name().to_string(),
            mime_type: source.mime_type().to_string(),
            bytes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Audio already held in memory
#[derive(Debug, Clone)]
pub struct InlineAudio {
    name: String,
    mime_type: String,
    content: Vec<u8>,
}

impl InlineAudio {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            content: content.into(),
        }
    }
}

impl AudioSource for InlineAudio {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn bytes(&mut self) -> Result<Vec<u8>, Error> {
        Ok(self.content.clone())
    }
}

/// Audio read once from an arbitrary stream
pub struct ReaderAudio {
    name: String,
    mime_type: String,
    reader: Option<Box<dyn Read + Send>>,
}

impl ReaderAudio {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        reader: impl Read + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            reader: Some(Box::new(reader)),
        }
    }
}

impl AudioSource for ReaderAudio {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn bytes(&mut self) -> Result<Vec<u8>, Error> {
        let mut reader = self.reader.take().ok_or_else(|| {
            Error::UnsupportedFile("Audio stream was already consumed".to_string())
        })?;
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        Ok(content)
    }
}

/// Audio referenced by URL, downloaded on first use
#[derive(Debug, Clone)]
pub struct UrlAudio {
    url: String,
    name: String,
    mime_type: String,
    max_bytes: u64,
    timeout: Duration,
}

impl UrlAudio {
    pub fn new(
        url: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        settings: &Settings,
    ) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            max_bytes: settings.max_download_bytes,
            timeout: settings.request_timeout,
        }
    }
}

impl AudioSource for UrlAudio {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn bytes(&mut self) -> Result<Vec<u8>, Error> {
        debug!("Downloading audio from {}", self.url);

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        let response = client.get(&self.url).send()?;

        let status = response.status();
        if status.as_u16() != 200 {
            error!("Audio download failed ({}): {}", status, self.url);
            return Err(Error::UnsupportedFile(format!(
                "Failed to download file from URL: {}",
                status.as_u16()
            )));
        }

        if let Some(size_bytes) = response.content_length() {
            if size_bytes > self.max_bytes {
                error!(
                    "File too large: {} bytes > {} bytes",
                    size_bytes, self.max_bytes
                );
                return Err(Error::FileTooLarge {
                    size_bytes,
                    max_bytes: self.max_bytes,
                });
            }
        }

        // Content-Length may be absent or wrong; cap the actual read too
        let mut content = Vec::new();
        response
            .take(self.max_bytes + 1)
            .read_to_end(&mut content)?;
        let size_bytes = content.len() as u64;
        if size_bytes > self.max_bytes {
            error!(
                "File too large: more than {} bytes downloaded",
                self.max_bytes
            );
            return Err(Error::FileTooLarge {
                size_bytes,
                max_bytes: self.max_bytes,
            });
        }

        Ok(content)
    }
}

/// Turn the host's `file` parameter into an [`AudioSource`].
///
/// Accepts `{url, filename|name, extension, type|mime_type}` references and
/// `{content, name, type}` inline objects where content is a string or a
/// byte array.
pub fn from_parameter(value: &Value, settings: &Settings) -> Result<Box<dyn AudioSource>, Error> {
    let map = match value {
        Value::Object(map) => map,
        Value::Null => return Err(Error::UnsupportedFile("No audio file provided".to_string())),
        other => {
            return Err(Error::UnsupportedFile(format!(
                "Unsupported file data type: {}",
                json_type_name(other)
            )))
        }
    };

    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    if let Some(url) = field(&["url"]) {
        let name = field(&["filename", "name"]).unwrap_or_else(|| match field(&["extension"]) {
            Some(ext) if ext.starts_with('.') => format!("{}{}", DEFAULT_FILE_NAME, ext),
            Some(ext) => format!("{}.{}", DEFAULT_FILE_NAME, ext),
            None => DEFAULT_URL_FILE_NAME.to_string(),
        });
        let mime_type = field(&["mime_type", "type"]).unwrap_or_default();
        return Ok(Box::new(UrlAudio::new(url, name, mime_type, settings)));
    }

    let content = match map.get("content") {
        Some(Value::String(text)) => text.as_bytes().to_vec(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| {
                Error::UnsupportedFile("File content must be a byte array".to_string())
            })?,
        Some(Value::Null) | None => {
            return Err(Error::UnsupportedFile(
                "File object does not have accessible content".to_string(),
            ))
        }
        Some(other) => {
            return Err(Error::UnsupportedFile(format!(
                "Unsupported file content type: {}",
                json_type_name(other)
            )))
        }
    };

    let name = field(&["name", "filename"]).unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
    let mime_type = field(&["type", "mime_type"]).unwrap_or_default();

    Ok(Box::new(InlineAudio::new(name, mime_type, content)))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
