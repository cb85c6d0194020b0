use strum::{AsRefStr, Display};

const MEGABYTE: u64 = 1024 * 1024;

/// Coarse error category exposed to the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum ErrorKind {
    ConfigurationError,
    UnsupportedFileError,
    UpstreamError,
    TransportError,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Unsupported file: {0}")]
    UnsupportedFile(String),
    #[error("File too large: {size_bytes} bytes (limit {max_bytes})")]
    FileTooLarge { size_bytes: u64, max_bytes: u64 },
    #[error("Error {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("Credential validation failed: {0}")]
    InvalidCredentials(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) | Error::InvalidParameter(_) | Error::InvalidCredentials(_) => {
                ErrorKind::ConfigurationError
            }
            Error::UnsupportedFile(_) | Error::FileTooLarge { .. } => {
                ErrorKind::UnsupportedFileError
            }
            Error::Upstream { .. } | Error::InvalidResponse(_) => ErrorKind::UpstreamError,
            Error::Http(_) | Error::Io(_) => ErrorKind::TransportError,
        }
    }

    /// Returns a user-friendly description suitable for surfacing to the host
    pub fn user_message(&self) -> String {
        match self {
            Error::Configuration(msg) => format!("Configuration problem: {}", msg),
            Error::InvalidParameter(msg) => format!("Invalid tool parameter: {}", msg),
            Error::UnsupportedFile(msg) => format!("Cannot use audio file: {}", msg),
            Error::FileTooLarge {
                size_bytes,
                max_bytes,
            } => format!(
                "Audio file too large ({}MB). Maximum is {}MB.",
                size_bytes / MEGABYTE,
                max_bytes / MEGABYTE
            ),
            Error::Upstream { status, message } => match status {
                401 => "Invalid API key. Check your credentials.".to_string(),
                404 => format!("Deployment or API version not found: {}", message),
                429 => "Rate limit reached. Please wait and retry.".to_string(),
                _ => format!("Transcription failed ({}): {}", status, message),
            },
            Error::InvalidCredentials(msg) => msg.clone(),
            Error::InvalidResponse(msg) => format!("Unexpected provider response: {}", msg),
            Error::Http(e) if e.is_timeout() => "Transcription took too long. Try again.".to_string(),
            Error::Http(e) => format!("Request failed: {}", e),
            Error::Io(e) => format!("Failed to read audio data: {}", e),
        }
    }
}
