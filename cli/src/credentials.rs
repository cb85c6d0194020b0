//! Credentials for manual runs, taken from the environment (and `.env`).

use log::debug;
use openai_audio::Credentials;

use crate::error::Error;

/// Environment variable to credential key
const ENV_CREDENTIALS: &[(&str, &str)] = &[
    ("OPENAI_API_KEY", "api_key"),
    ("AZURE_OPENAI_API_KEY", "azure_api_key"),
    ("AZURE_OPENAI_ENDPOINT", "azure_endpoint"),
    ("AZURE_OPENAI_DEPLOYMENT", "azure_deployment"),
    ("AZURE_OPENAI_API_VERSION", "azure_api_version"),
    ("AZURE_OPENAI_WHISPER_API_KEY", "azure_api_key_whisper"),
    ("AZURE_OPENAI_WHISPER_ENDPOINT", "azure_endpoint_whisper"),
    ("AZURE_OPENAI_WHISPER_DEPLOYMENT", "azure_deployment_whisper"),
    ("AZURE_OPENAI_WHISPER_API_VERSION", "azure_api_version_whisper"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProviderChoice {
    Openai,
    Azure,
}

pub fn from_env() -> Credentials {
    collect(|name| std::env::var(name).ok())
}

fn collect(lookup: impl Fn(&str) -> Option<String>) -> Credentials {
    ENV_CREDENTIALS
        .iter()
        .filter_map(|(var, key)| {
            let value = lookup(var)?.trim().to_string();
            if value.is_empty() {
                return None;
            }
            debug!("Using {} for {}", var, key);
            Some((key.to_string(), value))
        })
        .collect()
}

/// Check that the chosen provider can run, and scope the credentials to it.
///
/// OpenAI runs drop every Azure key so a configured Azure endpoint cannot
/// take over the invocation.
pub fn for_provider(
    mut credentials: Credentials,
    provider: ProviderChoice,
    azure_deployment: Option<&str>,
) -> Result<Credentials, Error> {
    match provider {
        ProviderChoice::Openai => {
            if !credentials.contains_key("api_key") {
                return Err(Error::MissingCredential(
                    "Missing OPENAI_API_KEY in environment or .env".to_string(),
                ));
            }
            credentials.retain(|key, _| !key.starts_with("azure_"));
        }
        ProviderChoice::Azure => {
            if !credentials.contains_key("azure_endpoint")
                && !credentials.contains_key("azure_endpoint_whisper")
            {
                return Err(Error::MissingCredential(
                    "Missing AZURE_OPENAI_ENDPOINT in environment or .env".to_string(),
                ));
            }
            let has_key = ["azure_api_key", "azure_api_key_whisper", "api_key"]
                .iter()
                .any(|key| credentials.contains_key(*key));
            if !has_key {
                return Err(Error::MissingCredential(
                    "Missing AZURE_OPENAI_API_KEY or OPENAI_API_KEY in environment or .env"
                        .to_string(),
                ));
            }
            if let Some(deployment) = azure_deployment {
                credentials.insert("azure_deployment".to_string(), deployment.to_string());
            }
        }
    }

    Ok(credentials)
}
