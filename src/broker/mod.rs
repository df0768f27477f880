//! The broker core: topic registry, subscriptions, fan-out and consumer
//! liveness monitoring.

pub mod engine;
pub mod liveness;
pub mod message;
pub mod registry;
pub mod subscription;
pub mod topic;

pub use engine::Broker;
