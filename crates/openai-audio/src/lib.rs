//! Speech-to-text and speech-to-English translation against OpenAI or
//! Azure OpenAI.
//!
//! A call takes a flat credential mapping and per-call options, picks the
//! provider and deployment, sends one multipart request (with Azure API
//! version and translation fallbacks where needed) and yields a lazy
//! sequence of [`OutputEvent`]s, either all at once or streamed.
//!
//! # Example
//!
//! ```no_run
//! use openai_audio::{AudioTool, Credentials, InlineAudio, InvocationRequest, RequestOptions};
//!
//! fn main() -> Result<(), openai_audio::Error> {
//!     let tool = AudioTool::from_env()?;
//!     let mut credentials = Credentials::new();
//!     credentials.insert("api_key".to_string(), "sk-...".to_string());
//!
//!     let audio = InlineAudio::new("note.wav", "audio/wav", std::fs::read("note.wav")?);
//!     let request = InvocationRequest::new(audio, RequestOptions::default());
//!
//!     for event in tool.invoke(request, &credentials) {
//!         println!("{:?}", event?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod credentials;
mod error;
pub mod events;
pub mod executor;
mod invoke;
pub mod normalize;
pub mod planner;
pub mod request;
pub mod settings;
pub mod stream;
pub mod transport;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use audio::{AudioBlob, AudioSource, InlineAudio, ReaderAudio, UrlAudio};
pub use credentials::{Credentials, Provider, ProviderConfig};
pub use error::{Error, ErrorKind};
pub use events::OutputEvent;
pub use invoke::{invoke, AudioTool, Invocation};
pub use normalize::TranscriptResult;
pub use planner::ExecutionPlan;
pub use request::{
    InvocationRequest, Operation, OutputMode, RequestOptions, ResponseFormat,
    TimestampGranularities,
};
pub use settings::Settings;
pub use transport::{HttpRequest, RawResponse, ReqwestTransport, Transport};
pub use validation::CredentialValidator;
