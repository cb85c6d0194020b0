//! Credential validation against the providers' discovery endpoints.
//!
//! Used when credentials are saved, before any audio is sent. Every
//! configured Azure resource must list its deployments; without Azure, an
//! OpenAI key must be able to list models. Having nothing configured is
//! accepted here and fails at invocation time instead.

use std::time::Duration;

use log::{debug, info, warn};
use reqwest::blocking::{Client, Response};
use secrecy::ExposeSecret;
use serde_json::Value;

use crate::credentials::{self, AzureResource, Credentials};
use crate::error::Error;
use crate::settings::Settings;

pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(15);

pub struct CredentialValidator {
    client: Client,
    openai_base_url: String,
}

impl CredentialValidator {
    pub fn new(settings: &Settings) -> Result<Self, Error> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(VALIDATION_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            openai_base_url: settings.openai_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn validate(&self, credentials: &Credentials) -> Result<(), Error> {
        let config = match credentials::resolve(credentials) {
            Ok(config) => config,
            Err(_) => {
                info!("No provider credentials configured, skipping validation");
                return Ok(());
            }
        };

        if let Some(resource) = &config.azure_transcribe {
            self.validate_azure("Azure Transcribe", resource)?;
        }
        if let Some(resource) = &config.azure_whisper {
            self.validate_azure("Azure Whisper", resource)?;
        }

        if !config.is_azure() {
            if let Some(key) = &config.openai_api_key {
                self.validate_openai(key.expose_secret())?;
            }
        }

        Ok(())
    }

    fn validate_azure(&self, label: &str, resource: &AzureResource) -> Result<(), Error> {
        let key = resource.api_key.as_ref().ok_or_else(|| {
            Error::InvalidCredentials(format!(
                "{} API key is required when its endpoint is set",
                label
            ))
        })?;

        let url = format!(
            "{}/openai/deployments?api-version={}",
            resource.endpoint, resource.api_version
        );
        debug!("Validating {} via {}", label, url);

        let response = self
            .client
            .get(&url)
            .header("api-key", key.expose_secret())
            .send()?;
        let (status, body) = read(response)?;

        if status != 200 {
            let message = match azure_error_message(&body) {
                Some(message) => format!("{} validation failed: {}", label, message),
                None => format!("{} validation failed ({})", label, status),
            };
            return Err(Error::InvalidCredentials(message));
        }

        if let Some(deployment) = &resource.deployment {
            let names = deployment_names(&body);
            if !names.iter().any(|name| name == deployment) {
                warn!(
                    "{} deployment '{}' not found. Available: {:?}",
                    label, deployment, names
                );
            }
        }

        info!("{} credentials are valid", label);
        Ok(())
    }

    fn validate_openai(&self, api_key: &str) -> Result<(), Error> {
        let url = format!("{}/models", self.openai_base_url);
        debug!("Validating OpenAI key via {}", url);

        let response = self.client.get(&url).bearer_auth(api_key).send()?;
        let (status, body) = read(response)?;

        if status != 200 {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                });
            let message = match message {
                Some(message) => format!("API key validation failed: {}", message),
                None => format!("API key validation failed with status code: {}", status),
            };
            return Err(Error::InvalidCredentials(message));
        }

        info!("OpenAI credentials are valid");
        Ok(())
    }
}

fn read(response: Response) -> Result<(u16, String), Error> {
    let status = response.status().as_u16();
    let body = response.text()?;
    Ok((status, body))
}

/// `error.message`, or the whole `error` value when it has no message
fn azure_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match error {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        });
    Some(message)
}

/// Deployment names from a `data` or `value` listing
fn deployment_names(body: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Vec::new();
    };
    let mut names: Vec<String> = value
        .get("data")
        .or_else(|| value.get("value"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
