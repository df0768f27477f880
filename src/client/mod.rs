//! Minimal producer and consumer clients for the broker's line protocol.
//!
//! The CLI's `produce`/`consume` subcommands are thin wrappers around these,
//! and the end-to-end tests drive the broker through them.

pub mod consumer;
pub mod producer;

pub use consumer::Consumer;
pub use producer::publish;
