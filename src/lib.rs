//! # RelayMQ
//!
//! `relaymq` is a minimal in-memory message broker speaking a line-based
//! JSON protocol over TCP. Producers connect, publish one message to a topic
//! and are disconnected; consumers connect, subscribe to one topic and
//! receive every later message on it for as long as their connection lives.
//! Nothing is stored: a message reaches whoever is subscribed when it is
//! published, at most once.
//!
//! ## Core Modules
//!
//! - `broker`: topic registry, subscriptions, fan-out, liveness monitoring.
//! - `transport`: the wire codec and the TCP listener.
//! - `metrics`: the observer the broker reports events to.
//! - `config`: loading settings from files and the environment.
//! - `client`: small producer/consumer clients.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod metrics;
pub mod transport;
pub mod utils;

pub use broker::Broker;
pub use transport::Server;
