//! Shared utilities: the crate's error types and tracing initialisation.

pub mod error;
pub mod logging;
