//! The invocation entry point.
//!
//! Nothing happens until the returned [`Invocation`] is first polled: the
//! first `next()` resolves credentials, plans, buffers the audio and sends
//! the request. Dropping the invocation early releases the connection.

use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::sync::Arc;

use log::{error, info};
use serde_json::{Map, Value};

use crate::audio::AudioBlob;
use crate::credentials::{self, Credentials};
use crate::error::Error;
use crate::events::{self, OutputEvent};
use crate::executor::Executor;
use crate::normalize;
use crate::planner;
use crate::request::{InvocationRequest, OutputMode};
use crate::settings::Settings;
use crate::stream::{SseDecoder, TranscriptBuffer};
use crate::transport::{ByteLines, RawResponse, ReqwestTransport, Transport};

const EVENT_STREAM: &str = "text/event-stream";

/// Reusable adapter: a transport plus operational settings.
#[derive(Clone)]
pub struct AudioTool {
    transport: Arc<dyn Transport>,
    settings: Settings,
}

impl AudioTool {
    pub fn new(settings: Settings) -> Result<Self, Error> {
        let transport = ReqwestTransport::new(&settings)?;
        Ok(Self::with_transport(Arc::new(transport), settings))
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::new(Settings::from_env())
    }

    pub fn with_transport(transport: Arc<dyn Transport>, settings: Settings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn invoke(&self, request: InvocationRequest, credentials: &Credentials) -> Invocation {
        Invocation::pending(self.clone(), Ok(request), credentials.clone())
    }

    /// Invoke with the host's flat parameter mapping. Parameter errors
    /// surface on the first poll, like every other failure.
    pub fn invoke_parameters(
        &self,
        parameters: &Map<String, Value>,
        credentials: &Credentials,
    ) -> Invocation {
        let request = InvocationRequest::from_parameters(parameters, &self.settings);
        Invocation::pending(self.clone(), request, credentials.clone())
    }
}

/// Invoke with settings from the environment and the default transport.
pub fn invoke(parameters: &Map<String, Value>, credentials: &Credentials) -> Invocation {
    match AudioTool::from_env() {
        Ok(tool) => tool.invoke_parameters(parameters, credentials),
        Err(e) => Invocation::failed(e),
    }
}

struct Pending {
    tool: AudioTool,
    request: Result<InvocationRequest, Error>,
    credentials: Credentials,
}

struct Streaming {
    decoder: SseDecoder<ByteLines>,
    buffer: TranscriptBuffer,
    output_mode: OutputMode,
}

enum State {
    Pending(Box<Pending>),
    Failed(Error),
    Streaming(Box<Streaming>),
    Queued(VecDeque<OutputEvent>),
    Done,
}

/// Lazy, fused sequence of output events for one call.
pub struct Invocation {
    state: State,
}

impl Invocation {
    fn pending(
        tool: AudioTool,
        request: Result<InvocationRequest, Error>,
        credentials: Credentials,
    ) -> Self {
        Self {
            state: State::Pending(Box::new(Pending {
                tool,
                request,
                credentials,
            })),
        }
    }

    fn failed(error: Error) -> Self {
        Self {
            state: State::Failed(error),
        }
    }
}

impl Pending {
    fn start(self) -> Result<State, Error> {
        let Pending {
            tool,
            request,
            credentials,
        } = self;
        let request = request?;

        let config = credentials::resolve(&credentials)?;
        let plan =
            planner::plan_with_base_url(&config, &request.options, &tool.settings.openai_base_url)?;

        let mut source = request
            .audio
            .ok_or_else(|| Error::UnsupportedFile("No audio file provided".to_string()))?;
        let audio = AudioBlob::load(source.as_mut())?;
        drop(source);

        info!(
            "Starting {} of {} with {} via {:?}",
            plan.operation, audio.name(), plan.model, plan.provider
        );

        let executor = Executor::new(tool.transport.as_ref(), &tool.settings.azure_fallback_versions);
        let response = executor.execute(&plan, &audio)?;
        let output_mode = request.options.output_mode;

        if plan.streaming && is_event_stream(&response) {
            return Ok(State::Streaming(Box::new(Streaming {
                decoder: SseDecoder::new(response.lines()),
                buffer: TranscriptBuffer::default(),
                output_mode,
            })));
        }

        let body = response.text()?;
        let result = normalize::normalize(&body, plan.response_format)?;
        let result = executor.translate_fallback(&plan, &audio, result);

        info!(
            "Transcription finished ({} characters)",
            result.text().map(str::len).unwrap_or_default()
        );

        Ok(State::Queued(events::for_result(result, output_mode).into()))
    }
}

/// Streams announced with another content type are read as one buffered body
fn is_event_stream(response: &RawResponse) -> bool {
    response
        .content_type()
        .map(|ct| ct.contains(EVENT_STREAM))
        .unwrap_or(true)
}

impl Iterator for Invocation {
    type Item = Result<OutputEvent, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match std::mem::replace(&mut self.state, State::Done) {
                State::Pending(pending) => match pending.start() {
                    Ok(state) => self.state = state,
                    Err(e) => {
                        error!("Audio invocation failed: {}", e);
                        return Some(Err(e));
                    }
                },
                State::Failed(e) => {
                    error!("Audio invocation failed: {}", e);
                    return Some(Err(e));
                }
                State::Queued(mut events) => {
                    let event = events.pop_front()?;
                    self.state = State::Queued(events);
                    return Some(Ok(event));
                }
                State::Streaming(mut stream) => match stream.decoder.next() {
                    Some(Ok(chunk)) => {
                        let text = stream.buffer.apply(chunk);
                        self.state = State::Streaming(stream);
                        return Some(Ok(OutputEvent::text(text)));
                    }
                    Some(Err(e)) => {
                        error!("Stream interrupted: {}", e);
                        return Some(Err(Error::Io(e)));
                    }
                    None => {
                        info!(
                            "Stream finished ({} characters)",
                            stream.buffer.text().len()
                        );
                        return events::stream_summary(stream.buffer.text(), stream.output_mode)
                            .map(Ok);
                    }
                },
                State::Done => return None,
            }
        }
    }
}

impl FusedIterator for Invocation {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::InlineAudio;
    use crate::normalize::TranscriptResult;
    use crate::request::{Operation, RequestOptions, ResponseFormat, TimestampGranularities};
    use crate::test_support::{credential_map, respond, respond_stream, ScriptedTransport};
    use serde_json::json;

    fn wav() -> InlineAudio {
        InlineAudio::new("speech.wav", "audio/wav", b"RIFF....WAVE".to_vec())
    }

    fn collect(invocation: Invocation) -> Vec<OutputEvent> {
        invocation.map(|event| event.unwrap()).collect()
    }

    #[test]
    fn test_nothing_is_sent_until_polled() {
        let transport = ScriptedTransport::new(|_| respond(200, "hi"));
        let tool = AudioTool::with_transport(transport.clone(), Settings::default());

        let mut invocation = tool.invoke(
            InvocationRequest::new(wav(), RequestOptions::default()),
            &credential_map(&[("api_key", "sk-test")]),
        );
        assert!(transport.requests().is_empty());

        assert!(invocation.next().is_some());
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_openai_default_output() {
        let transport = ScriptedTransport::new(|_| respond(200, "hello world"));
        let tool = AudioTool::with_transport(transport.clone(), Settings::default());

        let events = collect(tool.invoke(
            InvocationRequest::new(wav(), RequestOptions::default()),
            &credential_map(&[("api_key", "sk-test")]),
        ));
        assert_eq!(
            events,
            vec![
                OutputEvent::json(TranscriptResult::from_text("hello world")),
                OutputEvent::text("hello world"),
            ]
        );

        let request = &transport.requests()[0];
        assert_eq!(request.url, "https://api.openai.com/v1/audio/transcriptions");
        assert_eq!(request.header("Authorization"), Some("Bearer sk-test"));
        assert_eq!(request.field("model"), Some("gpt-4o-transcribe"));
        assert_eq!(request.file_name, "speech.wav");
        assert_eq!(request.audio, b"RIFF....WAVE");
    }

    #[test]
    fn test_azure_version_fallback_scenario() {
        let transport = ScriptedTransport::new(|request| {
            if request.url.ends_with("api-version=2024-02-15-preview") {
                respond(200, "hello world")
            } else {
                respond(404, r#"{"error":{"code":"404","message":"Resource not found"}}"#)
            }
        });
        let tool = AudioTool::with_transport(transport.clone(), Settings::default());
        let options = RequestOptions {
            output_mode: OutputMode::JsonOnly,
            ..Default::default()
        };

        let events = collect(tool.invoke(
            InvocationRequest::new(wav(), options),
            &credential_map(&[
                ("azure_endpoint", "https://res.openai.azure.com/"),
                ("azure_api_key", "az-key"),
                ("azure_deployment", "gpt-4o-transcribe"),
            ]),
        ));
        assert_eq!(
            events,
            vec![OutputEvent::json(TranscriptResult::from_text("hello world"))]
        );

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].url.ends_with("api-version=2024-12-01-preview"));
        assert_eq!(requests[1].header("api-key"), Some("az-key"));
        assert_eq!(requests[1].audio, requests[0].audio);
    }

    #[test]
    fn test_streaming_scenario() {
        let transport = ScriptedTransport::new(|_| {
            respond_stream(concat!(
                "data: {\"type\":\"transcript.text.delta\",\"delta\":\"Hello \"}\n\n",
                "data: {\"type\":\"transcript.text.delta\",\"delta\":\"world\"}\n\n",
                "data: [DONE]\n\n",
            ))
        });
        let tool = AudioTool::with_transport(transport.clone(), Settings::default());
        let options = RequestOptions {
            stream: true,
            ..Default::default()
        };

        let events = collect(tool.invoke(
            InvocationRequest::new(wav(), options),
            &credential_map(&[("api_key", "sk-test")]),
        ));
        assert_eq!(
            events,
            vec![
                OutputEvent::text("Hello "),
                OutputEvent::text("world"),
                OutputEvent::json(TranscriptResult::from_text("Hello world")),
            ]
        );

        let request = &transport.requests()[0];
        assert!(request.streaming);
        assert_eq!(request.field("stream"), Some("true"));
    }

    #[test]
    fn test_streaming_survives_non_utf8_line() {
        let mut body = b"data: {\"type\":\"transcript.text.delta\",\"delta\":\"Hello \"}\n\n".to_vec();
        body.extend_from_slice(b": keep-alive \xff\xfe\n\n");
        body.extend_from_slice(b"data: {\"type\":\"transcript.text.delta\",\"delta\":\"world\"}\n\n");
        body.extend_from_slice(b"data: [DONE]\n\n");

        let transport = ScriptedTransport::new(move |_| {
            Ok(RawResponse::new(
                200,
                Some("text/event-stream".to_string()),
                std::io::Cursor::new(body.clone()),
            ))
        });
        let tool = AudioTool::with_transport(transport, Settings::default());
        let options = RequestOptions {
            stream: true,
            ..Default::default()
        };

        let events = collect(tool.invoke(
            InvocationRequest::new(wav(), options),
            &credential_map(&[("api_key", "sk-test")]),
        ));
        assert_eq!(
            events,
            vec![
                OutputEvent::text("Hello "),
                OutputEvent::text("world"),
                OutputEvent::json(TranscriptResult::from_text("Hello world")),
            ]
        );
    }

    #[test]
    fn test_streaming_text_only_has_no_summary() {
        let transport = ScriptedTransport::new(|_| {
            respond_stream("data: {\"type\":\"transcript.text.done\",\"text\":\"Hi\"}\n")
        });
        let tool = AudioTool::with_transport(transport, Settings::default());
        let options = RequestOptions {
            stream: true,
            output_mode: OutputMode::TextOnly,
            ..Default::default()
        };

        let events = collect(tool.invoke(
            InvocationRequest::new(wav(), options),
            &credential_map(&[("api_key", "sk-test")]),
        ));
        assert_eq!(events, vec![OutputEvent::text("Hi")]);
    }

    #[test]
    fn test_stream_answered_with_json_is_buffered() {
        let transport = ScriptedTransport::new(|_| {
            Ok(RawResponse::new(
                200,
                Some("application/json".to_string()),
                std::io::Cursor::new(br#"{"text":"whole"}"#.to_vec()),
            ))
        });
        let tool = AudioTool::with_transport(transport, Settings::default());
        let options = RequestOptions {
            stream: true,
            output_mode: OutputMode::TextOnly,
            ..Default::default()
        };

        let events = collect(tool.invoke(
            InvocationRequest::new(wav(), options),
            &credential_map(&[("api_key", "sk-test")]),
        ));
        assert_eq!(events, vec![OutputEvent::text("whole")]);
    }

    #[test]
    fn test_whisper_verbose_json_scenario() {
        let transport = ScriptedTransport::new(|_| {
            respond(
                200,
                r#"{"text":"Hi","segments":[{"id":0,"start":0.0,"end":0.8,"text":"Hi"}]}"#,
            )
        });
        let tool = AudioTool::with_transport(transport.clone(), Settings::default());
        let options = RequestOptions {
            model: "whisper-1".to_string(),
            response_format: ResponseFormat::VerboseJson,
            timestamp_granularities: TimestampGranularities::Segment,
            output_mode: OutputMode::JsonOnly,
            ..Default::default()
        };

        let events = collect(tool.invoke(
            InvocationRequest::new(wav(), options),
            &credential_map(&[("api_key", "sk-test")]),
        ));
        assert_eq!(events.len(), 1);
        let result = events[0].as_result().unwrap();
        assert!(result.as_value().get("segments").is_some());

        let request = &transport.requests()[0];
        assert_eq!(request.field("response_format"), Some("verbose_json"));
        assert_eq!(request.field("timestamp_granularities[]"), Some("segment"));
    }

    #[test]
    fn test_azure_translate_language_fallback_scenario() {
        let transport = ScriptedTransport::new(|request| {
            if request.url.contains("/audio/translations") {
                respond(200, r#"{"text": "你好世界"}"#)
            } else {
                respond(200, r#"{"text": "Hello world"}"#)
            }
        });
        let tool = AudioTool::with_transport(transport.clone(), Settings::default());
        let options = RequestOptions {
            operation: Operation::Translate,
            output_mode: OutputMode::TextOnly,
            ..Default::default()
        };

        let events = collect(tool.invoke(
            InvocationRequest::new(wav(), options),
            &credential_map(&[
                ("azure_endpoint_whisper", "https://whisper.openai.azure.com"),
                ("azure_api_key_whisper", "w-key"),
                ("azure_deployment_whisper", "whisper"),
            ]),
        ));
        assert_eq!(events, vec![OutputEvent::text("Hello world")]);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].url.contains("/deployments/whisper/audio/translations"));
        assert!(requests[1].url.contains("/deployments/whisper/audio/transcriptions"));
        assert_eq!(requests[1].field("translate"), Some("true"));
    }

    #[test]
    fn test_failures_surface_on_first_poll_then_fuse() {
        let transport = ScriptedTransport::new(|_| respond(200, "unused"));
        let tool = AudioTool::with_transport(transport.clone(), Settings::default());

        let test_cases = vec![
            (
                "no credentials",
                tool.invoke(
                    InvocationRequest::new(wav(), RequestOptions::default()),
                    &Credentials::new(),
                ),
            ),
            (
                "no audio",
                tool.invoke(
                    InvocationRequest {
                        audio: None,
                        options: RequestOptions::default(),
                    },
                    &credential_map(&[("api_key", "sk-test")]),
                ),
            ),
            (
                "azure translate without whisper",
                tool.invoke(
                    InvocationRequest::new(
                        wav(),
                        RequestOptions {
                            operation: Operation::Translate,
                            ..Default::default()
                        },
                    ),
                    &credential_map(&[
                        ("azure_endpoint", "https://res.openai.azure.com"),
                        ("azure_api_key", "k"),
                        ("azure_deployment", "d"),
                    ]),
                ),
            ),
        ];

        for (description, mut invocation) in test_cases {
            assert!(
                matches!(invocation.next(), Some(Err(_))),
                "{}: expected an error",
                description
            );
            assert!(invocation.next().is_none(), "{}: expected fused", description);
        }
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_upstream_error_message() {
        let transport = ScriptedTransport::new(|_| {
            respond(401, r#"{"error":{"message":"Incorrect API key provided"}}"#)
        });
        let tool = AudioTool::with_transport(transport, Settings::default());

        let mut invocation = tool.invoke(
            InvocationRequest::new(wav(), RequestOptions::default()),
            &credential_map(&[("api_key", "sk-bad")]),
        );
        match invocation.next() {
            Some(Err(e)) => assert_eq!(e.to_string(), "Error 401: Incorrect API key provided"),
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[test]
    fn test_invoke_parameters() {
        let transport = ScriptedTransport::new(|_| respond(200, "bonjour"));
        let tool = AudioTool::with_transport(transport.clone(), Settings::default());

        let parameters = json!({
            "file": {"name": "clip.mp3", "type": "audio/mpeg", "content": "abc"},
            "language": "fr",
            "output_format": "text_only",
            "prompt": null
        });
        let Value::Object(parameters) = parameters else {
            unreachable!()
        };

        let events = collect(
            tool.invoke_parameters(&parameters, &credential_map(&[("api_key", "sk-test")])),
        );
        assert_eq!(events, vec![OutputEvent::text("bonjour")]);

        let request = &transport.requests()[0];
        assert_eq!(request.file_name, "clip.mp3");
        assert_eq!(request.field("language"), Some("fr"));
        assert_eq!(request.field("prompt"), None);
    }

    #[test]
    fn test_invalid_parameters_are_reported_lazily() {
        let transport = ScriptedTransport::new(|_| respond(200, "unused"));
        let tool = AudioTool::with_transport(transport, Settings::default());

        let Value::Object(parameters) = json!({"response_format": "mp3"}) else {
            unreachable!()
        };
        let mut invocation =
            tool.invoke_parameters(&parameters, &credential_map(&[("api_key", "sk-test")]));
        assert!(matches!(
            invocation.next(),
            Some(Err(Error::InvalidParameter(_)))
        ));
    }
}
