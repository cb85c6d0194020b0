use std::io::Cursor;
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::transport::{HttpRequest, RawResponse, Transport};

/// What a [`ScriptedTransport`] saw for one attempt
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub fields: Vec<(String, String)>,
    pub file_name: String,
    pub audio: Vec<u8>,
    pub streaming: bool,
}

impl RecordedRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

type Handler = dyn Fn(&RecordedRequest) -> Result<RawResponse, Error> + Send + Sync;

/// Transport that answers from a closure and records every request
pub(crate) struct ScriptedTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&RecordedRequest) -> Result<RawResponse, Error> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &HttpRequest<'_>) -> Result<RawResponse, Error> {
        let recorded = RecordedRequest {
            url: request.url.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            fields: request.fields.to_vec(),
            file_name: request.audio.name().to_string(),
            audio: request.audio.bytes().to_vec(),
            streaming: request.streaming,
        };
        let response = (self.handler)(&recorded);
        self.requests.lock().unwrap().push(recorded);
        response
    }
}

pub(crate) fn respond(status: u16, body: &str) -> Result<RawResponse, Error> {
    Ok(RawResponse::new(
        status,
        None,
        Cursor::new(body.as_bytes().to_vec()),
    ))
}

pub(crate) fn respond_stream(body: &str) -> Result<RawResponse, Error> {
    Ok(RawResponse::new(
        200,
        Some("text/event-stream".to_string()),
        Cursor::new(body.as_bytes().to_vec()),
    ))
}

pub(crate) fn credential_map(pairs: &[(&str, &str)]) -> crate::credentials::Credentials {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
