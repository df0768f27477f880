//! Broker event observer.
//!
//! The broker core reports what happens through `MetricsObserver` and never
//! reads values back. `BrokerMetrics` records the events through the
//! `metrics` facade as four Prometheus series; the binary installs a
//! Prometheus recorder and logs its rendering.

use ::metrics::{Counter, Gauge, Recorder, counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const MESSAGES_RECEIVED: &str = "messages_received";
pub const MESSAGES_SENT: &str = "messages_sent";
pub const ACTIVE_CHANNELS: &str = "active_channels";
pub const TOPICS: &str = "topics";

/// Receives broker events. Every call must return promptly and never fail.
///
/// Implementations are invoked outside of the broker's registry locks, so
/// they may take their own locks freely.
pub trait MetricsObserver: Send + Sync {
    /// A publish passed validation and is about to be fanned out.
    fn on_message_received(&self);
    /// One delivery frame was written to a consumer.
    fn on_message_sent(&self);
    fn on_channel_opened(&self);
    fn on_channel_closed(&self);
    /// A topic name was seen for the first time.
    fn on_topic_created(&self);
}

/// Observer that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsObserver for NoopMetrics {
    fn on_message_received(&self) {}
    fn on_message_sent(&self) {}
    fn on_channel_opened(&self) {}
    fn on_channel_closed(&self) {}
    fn on_topic_created(&self) {}
}

/// Handles to the received/sent counters, the active channel gauge and the
/// topic counter.
///
/// The handles are bound to whichever recorder was current when the value
/// was built.
#[derive(Debug, Clone)]
pub struct BrokerMetrics {
    messages_received: Counter,
    messages_sent: Counter,
    active_channels: Gauge,
    topics: Counter,
}

impl Default for BrokerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerMetrics {
    /// Registers the series with the globally installed recorder.
    pub fn new() -> Self {
        describe_counter!(MESSAGES_RECEIVED, "Messages accepted from producers");
        describe_counter!(MESSAGES_SENT, "Delivery frames written to consumers");
        describe_gauge!(ACTIVE_CHANNELS, "Consumers currently subscribed");
        describe_counter!(TOPICS, "Topics created");

        Self {
            messages_received: counter!(MESSAGES_RECEIVED),
            messages_sent: counter!(MESSAGES_SENT),
            active_channels: gauge!(ACTIVE_CHANNELS),
            topics: counter!(TOPICS),
        }
    }

    /// Registers the series with `recorder` instead of the global one.
    pub fn with_recorder(recorder: &dyn Recorder) -> Self {
        ::metrics::with_local_recorder(recorder, Self::new)
    }
}

impl MetricsObserver for BrokerMetrics {
    fn on_message_received(&self) {
        self.messages_received.increment(1);
    }

    fn on_message_sent(&self) {
        self.messages_sent.increment(1);
    }

    fn on_channel_opened(&self) {
        self.active_channels.increment(1.0);
    }

    fn on_channel_closed(&self) {
        self.active_channels.decrement(1.0);
    }

    fn on_topic_created(&self) {
        self.topics.increment(1);
    }
}

/// Installs the Prometheus recorder as the process-wide recorder.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Reads the value of an unlabelled series from a Prometheus text rendering.
pub fn sample(rendered: &str, name: &str) -> Option<f64> {
    rendered
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (series, value) = line.split_once(' ')?;
            if series != name {
                return None;
            }
            value.trim().parse().ok()
        })
}

/// One-line summary of the four broker series, for log output.
pub fn summary(handle: &PrometheusHandle) -> String {
    let rendered = handle.render();
    [MESSAGES_RECEIVED, MESSAGES_SENT, ACTIVE_CHANNELS, TOPICS]
        .iter()
        .map(|name| format!("{name}={}", sample(&rendered, name).unwrap_or(0.0)))
        .collect::<Vec<_>>()
        .join(" ")
}
