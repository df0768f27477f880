//! Message definitions for the broker
//!
//! `Message` is what a consumer receives for every publish on its topic.
//! It lives only for the duration of one fan-out.
//!
//! Notes on fields:
//! - `timestamp`: RFC 3339 time at which the broker accepted the publish;
//!   producers cannot supply it
//! - `payload`: the publish body, passed through untouched

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A message encoded once per publish and shared by every delivery channel.
pub type EncodedMessage = Arc<str>;

/// A published payload with its broker-side timestamp. Serialises as a
/// delivery record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub timestamp: String,
    pub payload: String,
}

impl Message {
    /// Stamp `payload` with the current time.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            payload: payload.into(),
        }
    }
}
