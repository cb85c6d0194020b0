use std::fmt;
use std::io::{BufRead, BufReader, Read, Split};

use log::{debug, error};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::header::{ACCEPT, CONTENT_TYPE};

use crate::audio::AudioBlob;
use crate::error::Error;
use crate::planner::ExecutionPlan;
use crate::settings::Settings;

/// One multipart POST, fully described.
pub struct HttpRequest<'a> {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub fields: &'a [(String, String)],
    pub audio: &'a AudioBlob,
    pub streaming: bool,
}

impl<'a> HttpRequest<'a> {
    pub fn from_plan(plan: &'a ExecutionPlan, audio: &'a AudioBlob) -> Self {
        Self {
            url: plan.url(),
            headers: plan.headers(),
            fields: &plan.fields,
            audio,
            streaming: plan.streaming,
        }
    }
}

/// Undecoded body lines, without their `\n`
pub type ByteLines = Split<BufReader<Box<dyn Read + Send>>>;

/// Status plus a body that has not been read yet.
///
/// Dropping it releases the underlying connection.
pub struct RawResponse {
    status: u16,
    content_type: Option<String>,
    body: Box<dyn Read + Send>,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl RawResponse {
    pub fn new(
        status: u16,
        content_type: Option<String>,
        body: impl Read + Send + 'static,
    ) -> Self {
        Self {
            status,
            content_type,
            body: Box::new(body),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Read the whole body as text
    pub fn text(mut self) -> Result<String, Error> {
        let mut raw = Vec::new();
        self.body.read_to_end(&mut raw)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Read the body as raw `\n`-separated lines, for event streams.
    /// Decoding is left to the caller.
    pub fn lines(self) -> ByteLines {
        BufReader::new(self.body).split(b'\n')
    }
}

/// Sends planned requests. The seam between planning and the network.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest<'_>) -> Result<RawResponse, Error>;
}

/// Blocking reqwest transport with bounded connect and overall timeouts
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(settings: &Settings) -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

fn file_part(audio: &AudioBlob) -> Part {
    let part = || Part::bytes(audio.bytes().to_vec()).file_name(audio.name().to_string());

    if audio.mime_type().is_empty() {
        return part();
    }

    part().mime_str(audio.mime_type()).unwrap_or_else(|e| {
        debug!(
            "Ignoring unparseable MIME type {:?}: {}",
            audio.mime_type(),
            e
        );
        part()
    })
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest<'_>) -> Result<RawResponse, Error> {
        // Every attempt gets a fresh copy of the buffered audio
        let mut form = Form::new();
        for (name, value) in request.fields {
            form = form.text(name.clone(), value.clone());
        }
        form = form.part("file", file_part(request.audio));

        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if request.streaming {
            builder = builder.header(ACCEPT, "text/event-stream");
        }

        debug!("POST {} ({} bytes)", request.url, request.audio.bytes().len());

        let response = builder.multipart(form).send().map_err(|e| {
            error!("API request error: {}", e);
            Error::Http(e)
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        debug!("Response {} ({:?}) from {}", status, content_type, request.url);

        Ok(RawResponse::new(status, content_type, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_raw_response_text_is_lossy() {
        let response = RawResponse::new(200, None, Cursor::new(vec![b'h', b'i', 0xff]));
        assert!(response.is_success());
        assert_eq!(response.text().unwrap(), "hi\u{fffd}");
    }

    #[test]
    fn test_raw_response_lines() {
        let response = RawResponse::new(
            200,
            Some("text/event-stream".to_string()),
            Cursor::new(b"data: a\r\n\ndata: b\n".to_vec()),
        );
        assert_eq!(response.content_type(), Some("text/event-stream"));
        let lines: Vec<Vec<u8>> = response.lines().map(|l| l.unwrap()).collect();
        assert_eq!(
            lines,
            vec![b"data: a\r".to_vec(), Vec::new(), b"data: b".to_vec()]
        );
    }

    #[test]
    fn test_only_200_counts_as_success() {
        for status in [201, 204, 404, 500] {
            let response = RawResponse::new(status, None, Cursor::new(Vec::new()));
            assert!(!response.is_success(), "{} should not be success", status);
        }
    }
}
