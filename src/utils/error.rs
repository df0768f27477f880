//! Error types used across `relaymq`.
//!
//! Per-connection failures never leave the connection task; they are logged
//! there. Only `ServerError` crosses the library boundary into the binary.

use std::io;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Why an inbound line was not turned into a request or delivery.
///
/// On the broker side every variant is recoverable: the line is dropped and
/// the connection keeps reading.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("line is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("invalid record: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("line is neither JSON nor base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("request has an empty topic")]
    EmptyTopic,
}

/// Why a publish was not fanned out.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("failed to encode delivery: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fatal errors raised while starting or running the listener.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("unsupported transport protocol `{0}`, only `tcp` is available")]
    UnsupportedProtocol(String),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Errors seen by the bundled producer/consumer clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("framing error: {0}")]
    Framing(#[from] LinesCodecError),
    #[error("undecodable delivery: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}
