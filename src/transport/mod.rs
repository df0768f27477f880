//! The `transport` module carries the broker's line protocol over TCP.
//!
//! `codec` turns lines into requests and messages into lines; `server` owns
//! the listener and the per-connection task that hands requests to the
//! broker.

pub mod codec;
pub mod server;

pub use server::Server;

#[cfg(test)]
mod tests;
