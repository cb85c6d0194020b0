//! Executes a plan: one POST, plus the Azure API-version and translation
//! fallbacks when they apply.

use log::{debug, error, info, warn};
use serde_json::Value;

use crate::audio::AudioBlob;
use crate::credentials::Provider;
use crate::error::Error;
use crate::normalize::{self, TranscriptResult};
use crate::planner::ExecutionPlan;
use crate::request::Operation;
use crate::transport::{HttpRequest, RawResponse, Transport};

pub struct Executor<'a> {
    transport: &'a dyn Transport,
    fallback_versions: &'a [String],
}

impl<'a> Executor<'a> {
    pub fn new(transport: &'a dyn Transport, fallback_versions: &'a [String]) -> Self {
        Self {
            transport,
            fallback_versions,
        }
    }

    /// Send the plan and return the first successful response.
    ///
    /// An Azure 404 outside translation is retried once per fallback API
    /// version (skipping the one just tried). When every retry fails the
    /// original 404 is reported.
    pub fn execute(&self, plan: &ExecutionPlan, audio: &AudioBlob) -> Result<RawResponse, Error> {
        let response = self.send(plan, audio)?;
        if response.is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text()?;

        let retry_versions = status == 404
            && plan.provider == Provider::AzureOpenAI
            && plan.operation != Operation::Translate;
        if retry_versions {
            if let Some(response) = self.retry_api_versions(plan, audio) {
                return Ok(response);
            }
        }

        Err(upstream_error(status, &body))
    }

    fn send(&self, plan: &ExecutionPlan, audio: &AudioBlob) -> Result<RawResponse, Error> {
        self.transport.send(&HttpRequest::from_plan(plan, audio))
    }

    fn retry_api_versions(&self, plan: &ExecutionPlan, audio: &AudioBlob) -> Option<RawResponse> {
        let tried = plan.api_version().unwrap_or_default();

        for version in self.fallback_versions.iter().filter(|v| v.as_str() != tried) {
            warn!(
                "Azure returned 404 for api-version {}, retrying with {}",
                tried, version
            );
            match self.send(&plan.with_api_version(version), audio) {
                Ok(response) if response.is_success() => {
                    info!("Azure request succeeded with api-version {}", version);
                    return Some(response);
                }
                Ok(response) => {
                    debug!("api-version {} failed with {}", version, response.status());
                }
                Err(e) => {
                    warn!("api-version {} request failed: {}", version, e);
                }
            }
        }

        None
    }

    /// Azure translations sometimes come back in the source language. When
    /// the text looks non-English, ask again as a transcription with
    /// `translate=true` and take that text instead. Any failure there keeps
    /// the original result.
    pub fn translate_fallback(
        &self,
        plan: &ExecutionPlan,
        audio: &AudioBlob,
        result: TranscriptResult,
    ) -> TranscriptResult {
        if plan.provider != Provider::AzureOpenAI
            || plan.operation != Operation::Translate
            || plan.streaming
        {
            return result;
        }
        match result.text() {
            Some(text) if normalize::looks_non_english(text) => {}
            _ => return result,
        }

        info!("Translation does not look like English, retrying with translate=true");
        let fallback = plan.as_translate_fallback();

        let response = match self.send(&fallback, audio) {
            Ok(response) => response,
            Err(e) => {
                warn!("Translate fallback request failed: {}", e);
                return result;
            }
        };
        if !response.is_success() {
            warn!(
                "Translate fallback returned {}, keeping original translation",
                response.status()
            );
            return result;
        }

        let text = response
            .text()
            .and_then(|body| normalize::normalize(&body, fallback.response_format));
        match text {
            Ok(fallback_result) => match fallback_result.text() {
                Some(text) => {
                    debug!("Translate fallback produced {} characters", text.len());
                    result.with_text(text)
                }
                None => result,
            },
            Err(e) => {
                warn!("Translate fallback response unreadable: {}", e);
                result
            }
        }
    }
}

/// Best human-readable message in an error body: `error.message`, then
/// `message`, then a string `error`, else the body itself.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .or_else(|| value.get("error"))
            .and_then(Value::as_str);
        if let Some(message) = message {
            return message.to_string();
        }
    }

    let body = body.trim();
    if body.is_empty() {
        "empty response body".to_string()
    } else {
        body.to_string()
    }
}

fn upstream_error(status: u16, body: &str) -> Error {
    error!("API error response ({}): {}", status, body);
    Error::Upstream {
        status,
        message: extract_error_message(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::InlineAudio;
    use crate::credentials;
    use crate::planner;
    use crate::request::{RequestOptions, ResponseFormat};
    use crate::settings::DEFAULT_AZURE_FALLBACK_VERSIONS;
    use crate::test_support::{credential_map, respond, ScriptedTransport};

    fn audio() -> AudioBlob {
        AudioBlob::load(&mut InlineAudio::new("a.wav", "audio/wav", b"RIFF".to_vec())).unwrap()
    }

    fn fallback_versions() -> Vec<String> {
        DEFAULT_AZURE_FALLBACK_VERSIONS
            .iter()
            .map(|v| v.to_string())
            .collect()
    }

    fn azure_plan(options: RequestOptions) -> ExecutionPlan {
        let config = credentials::resolve(&credential_map(&[
            ("azure_endpoint", "https://res.openai.azure.com"),
            ("azure_api_key", "k"),
            ("azure_deployment", "gpt4o-dep"),
            ("azure_api_version", "2025-03-01-preview"),
            ("azure_endpoint_whisper", "https://w.openai.azure.com"),
            ("azure_deployment_whisper", "whisper-dep"),
        ]))
        .unwrap();
        planner::plan(&config, &options).unwrap()
    }

    #[test]
    fn test_api_version_fallback_stops_at_first_success() {
        let transport = ScriptedTransport::new(|request| {
            if request.url.contains("api-version=2024-02-15-preview") {
                respond(200, "ok")
            } else {
                respond(404, r#"{"error":{"message":"Resource not found"}}"#)
            }
        });
        let versions = fallback_versions();
        let executor = Executor::new(transport.as_ref(), &versions);

        let response = executor
            .execute(&azure_plan(RequestOptions::default()), &audio())
            .unwrap();
        assert_eq!(response.text().unwrap(), "ok");

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].ends_with("api-version=2025-03-01-preview"));
        assert!(urls[1].ends_with("api-version=2024-02-15-preview"));
    }

    #[test]
    fn test_api_version_fallback_exhausted_reports_original_404() {
        let transport = ScriptedTransport::new(|request| {
            if request.url.contains("2025-03-01-preview") {
                respond(404, r#"{"error":{"message":"Resource not found"}}"#)
            } else {
                respond(500, "server error")
            }
        });
        let versions = fallback_versions();
        let executor = Executor::new(transport.as_ref(), &versions);

        let result = executor.execute(&azure_plan(RequestOptions::default()), &audio());
        match result {
            Err(Error::Upstream { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "Resource not found");
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn test_fallback_skips_version_already_tried() {
        let transport = ScriptedTransport::new(|_| respond(404, "not found"));
        let versions = fallback_versions();
        let executor = Executor::new(transport.as_ref(), &versions);
        let plan = azure_plan(RequestOptions::default()).with_api_version("2024-12-01-preview");

        assert!(executor.execute(&plan, &audio()).is_err());

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls.len(), 2);
        assert!(urls[1].ends_with("api-version=2024-02-15-preview"));
    }

    #[test]
    fn test_no_version_fallback_for_translate_or_other_statuses() {
        let test_cases = vec![
            (
                "translate 404",
                RequestOptions {
                    operation: Operation::Translate,
                    ..Default::default()
                },
                404,
            ),
            ("transcribe 401", RequestOptions::default(), 401),
        ];

        for (description, options, status) in test_cases {
            let transport = ScriptedTransport::new(move |_| respond(status, "nope"));
            let versions = fallback_versions();
            let executor = Executor::new(transport.as_ref(), &versions);

            let result = executor.execute(&azure_plan(options), &audio());
            assert!(
                matches!(result, Err(Error::Upstream { status: s, .. }) if s == status),
                "{}",
                description
            );
            assert_eq!(transport.requests().len(), 1, "{}", description);
        }
    }

    #[test]
    fn test_translate_fallback_replaces_non_english_text() {
        let transport = ScriptedTransport::new(|request| {
            assert!(request.url.contains("/audio/transcriptions"));
            assert_eq!(request.field("translate"), Some("true"));
            respond(200, "Hello world")
        });
        let versions = fallback_versions();
        let executor = Executor::new(transport.as_ref(), &versions);
        let plan = azure_plan(RequestOptions {
            operation: Operation::Translate,
            ..Default::default()
        });

        let result =
            executor.translate_fallback(&plan, &audio(), TranscriptResult::from_text("你好世界"));
        assert_eq!(result.text(), Some("Hello world"));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.contains("/deployments/whisper-dep/"));
    }

    #[test]
    fn test_translate_fallback_keeps_original_on_failure() {
        let transport = ScriptedTransport::new(|_| respond(400, "translate not supported"));
        let versions = fallback_versions();
        let executor = Executor::new(transport.as_ref(), &versions);
        let plan = azure_plan(RequestOptions {
            operation: Operation::Translate,
            ..Default::default()
        });

        let result =
            executor.translate_fallback(&plan, &audio(), TranscriptResult::from_text("你好世界"));
        assert_eq!(result.text(), Some("你好世界"));
    }

    #[test]
    fn test_translate_fallback_not_triggered() {
        let transport = ScriptedTransport::new(|_| respond(200, "unexpected"));
        let versions = fallback_versions();
        let executor = Executor::new(transport.as_ref(), &versions);

        let test_cases = vec![
            (
                "english translation",
                RequestOptions {
                    operation: Operation::Translate,
                    ..Default::default()
                },
                "Hello world",
            ),
            ("transcription", RequestOptions::default(), "你好世界"),
        ];

        for (description, options, text) in test_cases {
            let plan = azure_plan(options);
            let result =
                executor.translate_fallback(&plan, &audio(), TranscriptResult::from_text(text));
            assert_eq!(result.text(), Some(text), "{}", description);
        }
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_translate_fallback_keeps_json_fields() {
        let transport = ScriptedTransport::new(|_| respond(200, r#"{"text":"Hello"}"#));
        let versions = fallback_versions();
        let executor = Executor::new(transport.as_ref(), &versions);
        let plan = azure_plan(RequestOptions {
            operation: Operation::Translate,
            response_format: ResponseFormat::VerboseJson,
            ..Default::default()
        });

        let original = TranscriptResult::from_value(serde_json::json!({
            "text": "你好", "duration": 2.0
        }));
        let result = executor.translate_fallback(&plan, &audio(), original);
        assert_eq!(result.text(), Some("Hello"));
        assert_eq!(result.as_value()["duration"], serde_json::json!(2.0));
    }

    #[test]
    fn test_extract_error_message() {
        let test_cases = vec![
            ("nested", r#"{"error":{"message":"bad key","code":"401"}}"#, "bad key"),
            ("top-level message", r#"{"message":"slow down"}"#, "slow down"),
            ("string error", r#"{"error":"quota"}"#, "quota"),
            ("plain text", "Bad Gateway\n", "Bad Gateway"),
            ("json without message", r#"{"code":1}"#, r#"{"code":1}"#),
            ("empty", "", "empty response body"),
        ];

        for (description, body, expected) in test_cases {
            assert_eq!(extract_error_message(body), expected, "{}", description);
        }
    }
}
