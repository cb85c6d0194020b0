//! Server-sent event decoding for streamed transcriptions.

use std::io;

use log::debug;
use serde_json::Value;

const DONE_SENTINEL: &str = "[DONE]";

/// One piece of streamed transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Incremental text, appended to what came before
    Delta(String),
    /// Final text, replaces everything accumulated so far
    Done(String),
}

enum Line {
    Chunk(StreamChunk),
    Terminate,
    Skip,
}

fn parse_line(line: &str) -> Line {
    let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
        return Line::Skip;
    };
    let data = data.trim();
    if data.is_empty() {
        return Line::Skip;
    }
    if data == DONE_SENTINEL {
        return Line::Terminate;
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            debug!("Skipping malformed stream payload: {}", e);
            return Line::Skip;
        }
    };

    let text_of = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

    let chunk = match value.get("type").and_then(Value::as_str) {
        Some("transcript.text.delta") => text_of("delta").map(StreamChunk::Delta),
        Some("transcript.text.done") => text_of("text").map(StreamChunk::Done),
        _ => value
            .pointer("/choices/0/delta/text")
            .and_then(Value::as_str)
            .map(|text| StreamChunk::Delta(text.to_string())),
    };

    chunk.map(Line::Chunk).unwrap_or(Line::Skip)
}

/// Decodes `data:` lines into [`StreamChunk`]s.
///
/// Takes raw body lines. Ends at `[DONE]` or when the lines run out. Lines
/// that are not UTF-8, are not data lines, or whose payload is not JSON are
/// skipped. A read error is yielded once and ends the stream.
pub struct SseDecoder<I> {
    lines: I,
    finished: bool,
}

impl<I> SseDecoder<I>
where
    I: Iterator<Item = io::Result<Vec<u8>>>,
{
    pub fn new(lines: I) -> Self {
        Self {
            lines,
            finished: false,
        }
    }
}

impl<I> Iterator for SseDecoder<I>
where
    I: Iterator<Item = io::Result<Vec<u8>>>,
{
    type Item = io::Result<StreamChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let line = match self.lines.next() {
                Some(Ok(raw)) => match String::from_utf8(raw) {
                    Ok(line) => line,
                    Err(e) => {
                        debug!("Skipping stream line that is not UTF-8: {}", e);
                        continue;
                    }
                },
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            };

            match parse_line(&line) {
                Line::Chunk(chunk) => return Some(Ok(chunk)),
                Line::Terminate => {
                    self.finished = true;
                    return None;
                }
                Line::Skip => continue,
            }
        }
    }
}

impl<I> std::iter::FusedIterator for SseDecoder<I> where I: Iterator<Item = io::Result<Vec<u8>>> {}

/// Accumulated transcript text
#[derive(Debug, Default, Clone)]
pub struct TranscriptBuffer {
    text: String,
}

impl TranscriptBuffer {
    /// Apply a chunk and return the text to emit for it
    pub fn apply(&mut self, chunk: StreamChunk) -> String {
        match chunk {
            StreamChunk::Delta(delta) => {
                self.text.push_str(&delta);
                delta
            }
            StreamChunk::Done(text) => {
                self.text.clone_from(&text);
                text
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
