//! Request planning.
//!
//! Turns a resolved [`ProviderConfig`] and the per-call [`RequestOptions`]
//! into an [`ExecutionPlan`]: URL, auth header, form fields and whether the
//! response is streamed. Illegal parameter combinations are downgraded
//! silently rather than rejected.

use std::fmt;

use log::debug;
use secrecy::{ExposeSecret, SecretString};

use crate::credentials::{AzureResource, Provider, ProviderConfig};
use crate::error::Error;
use crate::request::{
    Operation, RequestOptions, ResponseFormat, TimestampGranularities, STREAMING_MODEL_PREFIX,
    WHISPER_MODEL,
};
use crate::settings::DEFAULT_OPENAI_BASE_URL;

/// Authentication attached to every attempt
#[derive(Clone)]
pub enum Auth {
    /// `Authorization: Bearer <key>` (OpenAI)
    Bearer(SecretString),
    /// `api-key: <key>` (Azure OpenAI)
    ApiKey(SecretString),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Bearer(_) => f.write_str("Bearer([REDACTED])"),
            Auth::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    OpenAI {
        base_url: String,
    },
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub provider: Provider,
    pub operation: Operation,
    /// Effective model after operation forcing and resource selection
    pub model: String,
    pub target: Target,
    pub auth: Auth,
    /// Response format actually sent
    pub response_format: ResponseFormat,
    /// Multipart text fields, in send order
    pub fields: Vec<(String, String)>,
    pub streaming: bool,
}

impl ExecutionPlan {
    pub fn url(&self) -> String {
        match &self.target {
            Target::OpenAI { base_url } => {
                format!("{}/audio/{}", base_url, self.operation.path())
            }
            Target::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/audio/{}?api-version={}",
                endpoint,
                deployment,
                self.operation.path(),
                api_version
            ),
        }
    }

    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match &self.auth {
            Auth::Bearer(key) => vec![(
                "Authorization",
                format!("Bearer {}", key.expose_secret()),
            )],
            Auth::ApiKey(key) => vec![("api-key", key.expose_secret().to_string())],
        }
    }

    pub fn api_version(&self) -> Option<&str> {
        match &self.target {
            Target::Azure { api_version, .. } => Some(api_version),
            Target::OpenAI { .. } => None,
        }
    }

    /// First value of a form field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Same request against another Azure API version
    pub fn with_api_version(&self, version: &str) -> Self {
        let mut plan = self.clone();
        if let Target::Azure { api_version, .. } = &mut plan.target {
            *api_version = version.to_string();
        }
        plan
    }

    /// Transcription with `translate=true` against the same deployment,
    /// used when a translation came back in the source language.
    pub fn as_translate_fallback(&self) -> Self {
        let mut plan = self.clone();
        plan.operation = Operation::Transcribe;
        plan.streaming = false;
        plan.fields.retain(|(key, _)| key != "stream");
        plan.fields
            .push(("translate".to_string(), "true".to_string()));
        plan
    }
}

struct AzureSelection<'a> {
    resource: &'a AzureResource,
    deployment: String,
    /// Whisper resource selected, so the deployment implies `whisper-1`
    whisper: bool,
}

fn with_deployment(resource: &Option<AzureResource>) -> Option<(&AzureResource, String)> {
    resource
        .as_ref()
        .and_then(|r| r.deployment.clone().map(|d| (r, d)))
}

fn select_azure<'a>(
    config: &'a ProviderConfig,
    options: &RequestOptions,
) -> Result<AzureSelection<'a>, Error> {
    if options.operation == Operation::Translate {
        let (resource, deployment) = with_deployment(&config.azure_whisper).ok_or_else(|| {
            Error::Configuration(
                "Azure Whisper deployment is required for Azure translate".to_string(),
            )
        })?;
        return Ok(AzureSelection {
            resource,
            deployment,
            whisper: true,
        });
    }

    if let Some(deployment) = options.deployment_override() {
        if let Some(resource) = &config.azure_transcribe {
            return Ok(AzureSelection {
                resource,
                deployment: deployment.to_string(),
                whisper: false,
            });
        }
        if let Some(resource) = &config.azure_whisper {
            return Ok(AzureSelection {
                resource,
                deployment: deployment.to_string(),
                whisper: true,
            });
        }
    }

    if options.model == WHISPER_MODEL {
        if let Some((resource, deployment)) = with_deployment(&config.azure_whisper) {
            return Ok(AzureSelection {
                resource,
                deployment,
                whisper: true,
            });
        }
    }

    if let Some((resource, deployment)) = with_deployment(&config.azure_transcribe) {
        return Ok(AzureSelection {
            resource,
            deployment,
            whisper: false,
        });
    }

    if let Some((resource, deployment)) = with_deployment(&config.azure_whisper) {
        return Ok(AzureSelection {
            resource,
            deployment,
            whisper: true,
        });
    }

    Err(Error::Configuration(
        "Azure deployment name is required for Azure transcribe".to_string(),
    ))
}

/// Plan a request against the public OpenAI base URL.
pub fn plan(config: &ProviderConfig, options: &RequestOptions) -> Result<ExecutionPlan, Error> {
    plan_with_base_url(config, options, DEFAULT_OPENAI_BASE_URL)
}

pub fn plan_with_base_url(
    config: &ProviderConfig,
    options: &RequestOptions,
    openai_base_url: &str,
) -> Result<ExecutionPlan, Error> {
    let operation = options.operation;
    let provider = config.provider();

    // Translation only exists for Whisper
    let mut model = match operation {
        Operation::Translate => WHISPER_MODEL.to_string(),
        Operation::Transcribe => options.model.clone(),
    };

    let (target, auth) = match provider {
        Provider::OpenAI => {
            let key = config.openai_api_key.clone().ok_or_else(|| {
                Error::Configuration("OpenAI API key not found in credentials".to_string())
            })?;
            let target = Target::OpenAI {
                base_url: openai_base_url.trim_end_matches('/').to_string(),
            };
            (target, Auth::Bearer(key))
        }
        Provider::AzureOpenAI => {
            let selection = select_azure(config, options)?;
            if selection.whisper {
                model = WHISPER_MODEL.to_string();
            }
            let key = selection.resource.api_key.clone().ok_or_else(|| {
                Error::Configuration(format!(
                    "Azure API key is required for {}",
                    selection.resource.endpoint
                ))
            })?;
            let target = Target::Azure {
                endpoint: selection.resource.endpoint.clone(),
                deployment: selection.deployment,
                api_version: selection.resource.api_version.clone(),
            };
            (target, Auth::ApiKey(key))
        }
    };

    let is_whisper = model == WHISPER_MODEL;

    let mut response_format = options.response_format;
    let mut granularities = options.timestamp_granularities;
    if !is_whisper {
        if response_format.is_whisper_only() {
            debug!(
                "Model {} cannot produce {}, falling back to text",
                model, response_format
            );
            response_format = ResponseFormat::Text;
        }
        granularities = TimestampGranularities::None;
    }

    let streaming = options.stream
        && match provider {
            Provider::OpenAI => model.starts_with(STREAMING_MODEL_PREFIX),
            Provider::AzureOpenAI => operation != Operation::Translate,
        };
    if options.stream && !streaming {
        debug!("Streaming disabled for model {} ({})", model, operation);
    }

    let forward_granularities = granularities != TimestampGranularities::None
        && match provider {
            Provider::OpenAI => is_whisper,
            // Azure translations drop timestamps even though they run on whisper-1
            Provider::AzureOpenAI => operation == Operation::Transcribe,
        };
    if forward_granularities {
        // Timestamps only come back in verbose_json
        response_format = ResponseFormat::VerboseJson;
    }

    let mut fields: Vec<(String, String)> = Vec::new();
    if provider == Provider::OpenAI {
        fields.push(("model".to_string(), model.clone()));
    }
    fields.push((
        "response_format".to_string(),
        response_format.as_ref().to_string(),
    ));
    if !options.prompt.trim().is_empty() {
        fields.push(("prompt".to_string(), options.prompt.clone()));
    }
    if !options.language.trim().is_empty() {
        fields.push(("language".to_string(), options.language.clone()));
    }
    if forward_granularities {
        for value in granularities.values() {
            fields.push(("timestamp_granularities[]".to_string(), value.to_string()));
        }
    }
    if streaming {
        fields.push(("stream".to_string(), "true".to_string()));
    }

    let plan = ExecutionPlan {
        provider,
        operation,
        model,
        target,
        auth,
        response_format,
        fields,
        streaming,
    };

    debug!(
        "Planned {} via {:?}: {} (model {}, format {}, streaming {})",
        plan.operation,
        plan.provider,
        plan.url(),
        plan.model,
        plan.response_format,
        plan.streaming
    );

    Ok(plan)
}
