use derive_more::{Display, From};

#[derive(Debug, Display, From)]
pub enum Error {
    #[from]
    Audio(openai_audio::Error),

    #[from]
    Io(std::io::Error),

    #[from]
    Json(serde_json::Error),

    /// Required environment variable missing for the chosen provider
    MissingCredential(String),
}

impl Error {
    /// Message printed before exiting
    pub fn user_message(&self) -> String {
        match self {
            Error::Audio(e) => e.user_message(),
            Error::Io(e) => format!("Failed to read audio file: {}", e),
            Error::Json(e) => format!("Failed to render output: {}", e),
            Error::MissingCredential(msg) => msg.clone(),
        }
    }
}
