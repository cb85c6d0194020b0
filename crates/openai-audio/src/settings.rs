//! Operational settings read from the process environment.
//!
//! Credentials never come from here; they are supplied per invocation.
//! These knobs only affect the transport (timeouts, fallback versions,
//! base URL) and the URL download guard.

use std::collections::HashMap;
use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AZURE_FALLBACK_VERSIONS: [&str; 2] = ["2024-02-15-preview", "2024-12-01-preview"];
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const MAX_DOWNLOAD_BYTES: u64 = 25 * 1024 * 1024; // 25MB limit

/// Type-safe configuration key that associates a variable name with its value type
#[derive(Debug, Clone, Copy)]
pub struct ConfigKey<T> {
    name: &'static str,
    _phantom: PhantomData<T>,
}

impl<T> ConfigKey<T> {
    const fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    pub fn key_name(&self) -> &'static str {
        self.name
    }
}

impl ConfigKey<u64> {
    pub const REQUEST_TIMEOUT_SECS: Self = Self::new("OPENAI_AUDIO_TIMEOUT_SECS");
    pub const CONNECT_TIMEOUT_SECS: Self = Self::new("OPENAI_AUDIO_CONNECT_TIMEOUT_SECS");
    pub const MAX_DOWNLOAD_BYTES: Self = Self::new("OPENAI_AUDIO_MAX_DOWNLOAD_BYTES");
}

impl ConfigKey<String> {
    pub const OPENAI_BASE_URL: Self = Self::new("OPENAI_AUDIO_OPENAI_BASE_URL");
    /// Comma-separated list of Azure API versions tried after a 404
    pub const AZURE_FALLBACK_VERSIONS: Self = Self::new("OPENAI_AUDIO_AZURE_FALLBACK_VERSIONS");
}

pub trait ConfigStore {
    fn raw(&self, name: &str) -> Option<String>;

    fn get<T>(&self, key: &ConfigKey<T>) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.raw(key.key_name())?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        match trimmed.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    "Ignoring invalid value for {}: {} ({})",
                    key.key_name(),
                    trimmed,
                    e
                );
                None
            }
        }
    }
}

/// Reads settings from the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvStore;

impl ConfigStore for EnvStore {
    fn raw(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl ConfigStore for HashMap<String, String> {
    fn raw(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub azure_fallback_versions: Vec<String>,
    pub openai_base_url: String,
    pub max_download_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            azure_fallback_versions: DEFAULT_AZURE_FALLBACK_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            max_download_bytes: MAX_DOWNLOAD_BYTES,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::load(&EnvStore)
    }

    pub fn load(store: &impl ConfigStore) -> Self {
        let mut settings = Self::default();

        if let Some(secs) = store.get(&ConfigKey::REQUEST_TIMEOUT_SECS) {
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = store.get(&ConfigKey::CONNECT_TIMEOUT_SECS) {
            settings.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(bytes) = store.get(&ConfigKey::MAX_DOWNLOAD_BYTES) {
            settings.max_download_bytes = bytes;
        }
        if let Some(url) = store.get(&ConfigKey::OPENAI_BASE_URL) {
            settings.openai_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(list) = store.get(&ConfigKey::AZURE_FALLBACK_VERSIONS) {
            let versions: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            if !versions.is_empty() {
                settings.azure_fallback_versions = versions;
            }
        }

        settings
    }
}
