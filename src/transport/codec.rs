//! Wire codec
//!
//! Every frame is one newline-terminated line. Requests are JSON records
//! tagged by `type`; legacy clients wrap that JSON in standard base64, which
//! is accepted as well. Deliveries are always plain JSON. An empty line from
//! the broker is a heartbeat and carries nothing.
//!
//! Request lines are framed as raw bytes by `RequestLineCodec`, so a line
//! that is not UTF-8 or is too long is reported as a frame of its own and
//! the stream keeps going.

use std::io;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::Decoder;

use crate::broker::message::{EncodedMessage, Message};
use crate::utils::error::DecodeError;

/// A decoded request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "PRODUCE")]
    Publish {
        topic: String,
        #[serde(default)]
        body: String,
    },

    #[serde(rename = "CONSUME")]
    Subscribe { topic: String },
}

impl Request {
    /// Topic the request is addressed to.
    pub fn topic(&self) -> &str {
        match self {
            Request::Publish { topic, .. } | Request::Subscribe { topic } => topic,
        }
    }
}

/// One request line as read off a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFrame {
    /// Line contents without the terminating newline.
    Line(Bytes),
    /// A line longer than the frame limit. Its bytes were discarded.
    Oversized,
}

/// Newline framing for request lines.
///
/// Unlike `LinesCodec` this never fails on content: bytes are handed out as
/// they are, and a line over `max_length` is skipped up to its newline and
/// reported once as `RequestFrame::Oversized`. Only I/O errors end the
/// stream.
#[derive(Debug, Clone)]
pub struct RequestLineCodec {
    max_length: usize,
    next_index: usize,
    discarding: bool,
}

impl RequestLineCodec {
    /// Codec accepting lines of at most `max_length` bytes.
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Decoder for RequestLineCodec {
    type Item = RequestFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RequestFrame>, io::Error> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match newline {
                Some(end) if self.discarding => {
                    src.advance(end + 1);
                    self.next_index = 0;
                    self.discarding = false;
                    return Ok(Some(RequestFrame::Oversized));
                }
                None if self.discarding => {
                    src.advance(src.len());
                    self.next_index = 0;
                    return Ok(None);
                }
                Some(end) if end <= self.max_length => {
                    let mut line = src.split_to(end + 1);
                    line.truncate(end);
                    self.next_index = 0;
                    return Ok(Some(RequestFrame::Line(line.freeze())));
                }
                Some(_) => self.discarding = true,
                None if src.len() > self.max_length => self.discarding = true,
                None => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<RequestFrame>, io::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        // unterminated last line
        self.next_index = 0;
        if self.discarding || src.is_empty() {
            self.discarding = false;
            src.clear();
            return Ok(None);
        }
        Ok(Some(RequestFrame::Line(src.split().freeze())))
    }
}

/// Decodes one request line. The line may still carry a trailing `\r`.
pub fn decode_request(line: &[u8]) -> Result<Request, DecodeError> {
    let line = std::str::from_utf8(line)?.trim();
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) if line.starts_with('{') => return Err(e.into()),
        Err(_) => serde_json::from_slice(&STANDARD.decode(line)?)?,
    };

    if request.topic().is_empty() {
        return Err(DecodeError::EmptyTopic);
    }
    Ok(request)
}

/// Encodes a request as a single line, without the trailing newline.
pub fn encode_request(request: &Request) -> Result<String, serde_json::Error> {
    serde_json::to_string(request)
}

/// Encodes a delivery frame, without the trailing newline.
pub fn encode_delivery(message: &Message) -> Result<EncodedMessage, serde_json::Error> {
    serde_json::to_string(message).map(Arc::from)
}

/// Decodes one delivery line. Heartbeats must be filtered out first.
pub fn decode_delivery(line: &str) -> Result<Message, DecodeError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Whether `line` is a broker heartbeat rather than a delivery.
pub fn is_heartbeat(line: &str) -> bool {
    line.trim().is_empty()
}
