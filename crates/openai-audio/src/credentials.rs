//! Credential resolution.
//!
//! The host hands over a flat mapping that has accumulated several naming
//! schemes over time. Every logical field is looked up through one table of
//! accepted keys, in priority order, so the rest of the crate only ever sees
//! a normalized [`ProviderConfig`].

use std::collections::HashMap;
use std::fmt;

use log::debug;
use secrecy::SecretString;

use crate::error::Error;

pub const DEFAULT_TRANSCRIBE_API_VERSION: &str = "2024-12-01-preview";
pub const DEFAULT_WHISPER_API_VERSION: &str = "2024-02-01";

/// Flat credential mapping as supplied by the host runtime
pub type Credentials = HashMap<String, String>;

/// Provider types supported by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    AzureOpenAI,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    OpenAIKey,
    TranscribeEndpoint,
    TranscribeKey,
    TranscribeVersion,
    TranscribeDeployment,
    WhisperEndpoint,
    WhisperKey,
    WhisperVersion,
    WhisperDeployment,
}

/// Accepted source keys per logical field, most preferred first.
const FIELD_SOURCES: &[(Field, &[&str])] = &[
    (Field::OpenAIKey, &["api_key"]),
    (
        Field::TranscribeEndpoint,
        &[
            "azure_endpoint_transcribe",
            "azure_openai_transcribe_endpoint",
            "azure_endpoint",
        ],
    ),
    (
        Field::TranscribeKey,
        &[
            "azure_api_key_transcribe",
            "azure_openai_transcribe_api_key",
            "azure_api_key",
            "api_key",
        ],
    ),
    (
        Field::TranscribeVersion,
        &[
            "azure_api_version_transcribe",
            "azure_openai_transcribe_api_version",
            "azure_api_version",
        ],
    ),
    (
        Field::TranscribeDeployment,
        &[
            "azure_deployment_transcribe",
            "azure_openai_transcribe_deployment",
            "azure_deployment_gpt4o",
            "azure_deployment",
        ],
    ),
    (
        Field::WhisperEndpoint,
        &["azure_endpoint_whisper", "azure_openai_whisper_endpoint"],
    ),
    (
        Field::WhisperKey,
        &["azure_api_key_whisper", "azure_openai_whisper_api_key"],
    ),
    (
        Field::WhisperVersion,
        &["azure_api_version_whisper", "azure_openai_whisper_api_version"],
    ),
    (
        Field::WhisperDeployment,
        &["azure_deployment_whisper", "azure_openai_whisper_deployment"],
    ),
];

fn lookup(credentials: &Credentials, field: Field) -> Option<String> {
    let keys = FIELD_SOURCES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, keys)| *keys)
        .unwrap_or_default();

    keys.iter()
        .filter_map(|key| credentials.get(*key))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Normalizes a user-entered endpoint: trims whitespace, strips trailing
/// slashes and collapses repeated slashes after the scheme separator.
pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    match trimmed.split_once("://") {
        Some((scheme, rest)) => format!("{}://{}", scheme, collapse_slashes(rest)),
        None => collapse_slashes(trimmed),
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' && previous_slash {
            continue;
        }
        previous_slash = c == '/';
        out.push(c);
    }
    out
}

/// One Azure OpenAI resource: endpoint, key, API version and deployment.
#[derive(Clone)]
pub struct AzureResource {
    /// Normalized endpoint, no trailing slash
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub api_version: String,
    pub deployment: Option<String>,
}

impl fmt::Debug for AzureResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureResource")
            .field("endpoint", &self.endpoint)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_version", &self.api_version)
            .field("deployment", &self.deployment)
            .finish()
    }
}

/// Resolved provider configuration, immutable for one invocation
#[derive(Clone)]
pub struct ProviderConfig {
    pub openai_api_key: Option<SecretString>,
    /// GPT-4o-class transcription resource
    pub azure_transcribe: Option<AzureResource>,
    pub azure_whisper: Option<AzureResource>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("azure_transcribe", &self.azure_transcribe)
            .field("azure_whisper", &self.azure_whisper)
            .finish()
    }
}

impl ProviderConfig {
    /// Any Azure endpoint switches the whole invocation to Azure.
    pub fn provider(&self) -> Provider {
        if self.azure_transcribe.is_some() || self.azure_whisper.is_some() {
            Provider::AzureOpenAI
        } else {
            Provider::OpenAI
        }
    }

    pub fn is_azure(&self) -> bool {
        self.provider() == Provider::AzureOpenAI
    }
}

/// Resolve the flat credential mapping into a [`ProviderConfig`].
///
/// Pure: performs no I/O. Fails when neither an OpenAI key nor any Azure
/// endpoint is present.
pub fn resolve(credentials: &Credentials) -> Result<ProviderConfig, Error> {
    let endpoint = |field| {
        lookup(credentials, field)
            .map(|raw| normalize_endpoint(&raw))
            .filter(|ep| !ep.is_empty())
    };

    let openai_api_key = lookup(credentials, Field::OpenAIKey).map(SecretString::from);
    let transcribe_key = lookup(credentials, Field::TranscribeKey);

    let azure_transcribe = endpoint(Field::TranscribeEndpoint).map(|endpoint| AzureResource {
        endpoint,
        api_key: transcribe_key.clone().map(SecretString::from),
        api_version: lookup(credentials, Field::TranscribeVersion)
            .unwrap_or_else(|| DEFAULT_TRANSCRIBE_API_VERSION.to_string()),
        deployment: lookup(credentials, Field::TranscribeDeployment),
    });

    let azure_whisper = endpoint(Field::WhisperEndpoint).map(|endpoint| AzureResource {
        endpoint,
        api_key: lookup(credentials, Field::WhisperKey)
            .or_else(|| transcribe_key.clone())
            .map(SecretString::from),
        api_version: lookup(credentials, Field::WhisperVersion)
            .unwrap_or_else(|| DEFAULT_WHISPER_API_VERSION.to_string()),
        deployment: lookup(credentials, Field::WhisperDeployment),
    });

    if openai_api_key.is_none() && azure_transcribe.is_none() && azure_whisper.is_none() {
        return Err(Error::Configuration(
            "API key not found in credentials".to_string(),
        ));
    }

    let config = ProviderConfig {
        openai_api_key,
        azure_transcribe,
        azure_whisper,
    };
    debug!("Resolved provider config: {:?}", config);

    Ok(config)
}
