use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the listener, the broker core, logging and metrics.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub log: LogSettings,
    pub metrics: MetricsSettings,
}

/// Where and how the listener binds.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub address: String,
    pub protocol: String,
}

/// Operational limits of the broker core.
///
/// Handed to the broker once at start-up and never re-read.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Largest accepted publish body, in bytes.
    pub max_payload_bytes: usize,
    /// Interval between liveness probes on consumer connections.
    pub heartbeat_interval_ms: u64,
    /// Capacity of each subscriber's delivery channel.
    pub channel_capacity: usize,
    /// How long fan-out waits on a full delivery channel before dropping.
    pub delivery_timeout_ms: u64,
    /// Longest request line the codec will buffer.
    pub max_frame_bytes: usize,
}

impl BrokerSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub debug: bool,
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsSettings {
    /// Seconds between periodic metrics log lines, `0` disables them.
    pub log_interval_secs: u64,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub log: Option<PartialLogSettings>,
    pub metrics: Option<PartialMetricsSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub address: Option<String>,
    pub protocol: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_payload_bytes: Option<usize>,
    pub heartbeat_interval_ms: Option<u64>,
    pub channel_capacity: Option<usize>,
    pub delivery_timeout_ms: Option<u64>,
    pub max_frame_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub debug: Option<bool>,
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialMetricsSettings {
    pub log_interval_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                address: "0.0.0.0:8000".to_string(),
                protocol: "tcp".to_string(),
            },
            broker: BrokerSettings::default(),
            log: LogSettings {
                debug: false,
                level: "info".to_string(),
            },
            metrics: MetricsSettings {
                log_interval_secs: 60,
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1000,
            heartbeat_interval_ms: 2000,
            channel_capacity: 256,
            delivery_timeout_ms: 100,
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server;
        let broker = self.broker;
        let log = self.log;
        let metrics = self.metrics;

        Settings {
            server: ServerSettings {
                address: server
                    .as_ref()
                    .and_then(|s| s.address.clone())
                    .unwrap_or(default.server.address),
                protocol: server
                    .as_ref()
                    .and_then(|s| s.protocol.clone())
                    .unwrap_or(default.server.protocol),
            },
            broker: BrokerSettings {
                max_payload_bytes: broker
                    .as_ref()
                    .and_then(|b| b.max_payload_bytes)
                    .unwrap_or(default.broker.max_payload_bytes),
                heartbeat_interval_ms: broker
                    .as_ref()
                    .and_then(|b| b.heartbeat_interval_ms)
                    .unwrap_or(default.broker.heartbeat_interval_ms),
                channel_capacity: broker
                    .as_ref()
                    .and_then(|b| b.channel_capacity)
                    .unwrap_or(default.broker.channel_capacity),
                delivery_timeout_ms: broker
                    .as_ref()
                    .and_then(|b| b.delivery_timeout_ms)
                    .unwrap_or(default.broker.delivery_timeout_ms),
                max_frame_bytes: broker
                    .as_ref()
                    .and_then(|b| b.max_frame_bytes)
                    .unwrap_or(default.broker.max_frame_bytes),
            },
            log: LogSettings {
                debug: log
                    .as_ref()
                    .and_then(|l| l.debug)
                    .unwrap_or(default.log.debug),
                level: log
                    .as_ref()
                    .and_then(|l| l.level.clone())
                    .unwrap_or(default.log.level),
            },
            metrics: MetricsSettings {
                log_interval_secs: metrics
                    .as_ref()
                    .and_then(|m| m.log_interval_secs)
                    .unwrap_or(default.metrics.log_interval_secs),
            },
        }
    }
}
