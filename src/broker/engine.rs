//! Broker engine
//!
//! `Broker` ties the topic registry to the two things a connection can do:
//! - `publish`: validate a payload, stamp it, encode it once and fan it out
//!   to the topic's current subscribers
//! - `consume`: register a subscription, relay its delivery channel to the
//!   connection until the channel closes or the connection fails, then
//!   unregister
//!
//! Concurrency notes:
//! - The broker is shared as `Arc<Broker>`; all methods take `&self`.
//! - No lock is held across an await. Fan-out works on a snapshot of the
//!   subscription set, so registry operations never wait on a slow consumer.
//! - Metrics observer calls are made outside every broker lock.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info};

use crate::broker::liveness::LivenessMonitor;
use crate::broker::message::Message;
use crate::broker::registry::TopicRegistry;
use crate::broker::subscription::{self, CloseHandle, SubscriptionId};
use crate::broker::topic::{FanOutReport, Topic};
use crate::config::BrokerSettings;
use crate::metrics::{MetricsObserver, NoopMetrics};
use crate::transport::codec::{self, RequestLineCodec};
use crate::utils::error::PublishError;

/// The in-memory broker shared by every connection task.
pub struct Broker {
    registry: TopicRegistry,
    settings: BrokerSettings,
    metrics: Arc<dyn MetricsObserver>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

impl Broker {
    /// Broker that reports to `NoopMetrics`.
    pub fn new(settings: BrokerSettings) -> Self {
        Self::with_metrics(settings, Arc::new(NoopMetrics))
    }

    /// Broker that reports every event to `metrics`.
    pub fn with_metrics(settings: BrokerSettings, metrics: Arc<dyn MetricsObserver>) -> Self {
        Self {
            registry: TopicRegistry::new(metrics.clone()),
            settings,
            metrics,
        }
    }

    /// Limits and timings the broker was built with.
    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Live topics and their subscriptions.
    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// Fans `body` out to every current subscriber of `topic`.
    ///
    /// The topic is created if it does not exist yet, even when nobody is
    /// listening. Oversized payloads are rejected before the topic is
    /// touched.
    pub async fn publish(&self, topic: &str, body: String) -> Result<FanOutReport, PublishError> {
        let max = self.settings.max_payload_bytes;
        if body.len() > max {
            return Err(PublishError::PayloadTooLarge {
                size: body.len(),
                max,
            });
        }

        let topic = self.registry.ensure_topic(topic);
        let message = Message::new(body);
        self.metrics.on_message_received();

        let encoded = codec::encode_delivery(&message)?;
        let report = topic
            .fan_out(encoded, self.settings.delivery_timeout())
            .await;

        debug!(
            topic = %topic.name(),
            delivered = report.delivered,
            dropped = report.dropped,
            "message published"
        );
        Ok(report)
    }

    /// Runs the consumer side of a connection that subscribed to `topic`.
    ///
    /// Returns once the subscription is gone: the delivery channel was
    /// closed (liveness failure or shutdown), a write failed, or reading
    /// from the peer failed. A peer that only closes its sending side keeps
    /// receiving. The subscription is unregistered and the transport
    /// dropped before this returns.
    pub async fn consume<R, W>(
        &self,
        topic: &str,
        mut reader: FramedRead<R, RequestLineCodec>,
        writer: FramedWrite<W, LinesCodec>,
        peer: &str,
    ) where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (subscription, mut delivery) = subscription::channel(self.settings.channel_capacity);
        let id = subscription.id();
        let close = subscription.close_handle();

        let topic = self.registry.subscribe(topic, subscription);
        let guard = SubscriptionGuard {
            registry: &self.registry,
            metrics: self.metrics.as_ref(),
            topic,
            id,
            close: close.clone(),
        };
        self.metrics.on_channel_opened();
        info!(%peer, topic = %guard.topic.name(), subscription = %id, "consumer subscribed");

        let writer = Arc::new(AsyncMutex::new(writer));
        LivenessMonitor::new(
            id,
            Arc::downgrade(&writer),
            close.clone(),
            self.settings.heartbeat_interval(),
        )
        .spawn();

        let mut reading = true;
        loop {
            let frame = tokio::select! {
                frame = delivery.recv() => match frame {
                    Some(frame) => frame,
                    None => {
                        debug!(%peer, subscription = %id, "delivery channel closed");
                        break;
                    }
                },
                inbound = reader.next(), if reading => match inbound {
                    // consumers have nothing more to say; ignore it
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(%peer, subscription = %id, error = %e, "consumer read failed");
                        break;
                    }
                    None => {
                        debug!(%peer, subscription = %id, "consumer finished sending");
                        reading = false;
                        continue;
                    }
                },
            };

            let mut sink = writer.lock().await;
            let sent = tokio::select! {
                biased;
                _ = close.closed() => break,
                sent = sink.send(&*frame) => sent,
            };
            match sent {
                Ok(()) => self.metrics.on_message_sent(),
                Err(e) => {
                    debug!(%peer, subscription = %id, error = %e, "delivery write failed");
                    break;
                }
            }
        }

        drop(writer);
        drop(reader);
        drop(guard);
        info!(%peer, subscription = %id, "consumer disconnected");
    }

    /// Closes every delivery channel so all consumer connections wind down.
    pub fn shutdown(&self) {
        info!("closing all subscriptions");
        self.registry.close_all();
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Unregisters a subscription exactly once, whichever way the relay loop
/// ended.
struct SubscriptionGuard<'a> {
    registry: &'a TopicRegistry,
    metrics: &'a dyn MetricsObserver,
    topic: Arc<Topic>,
    id: SubscriptionId,
    close: CloseHandle,
}

impl Drop for SubscriptionGuard<'_> {
    fn drop(&mut self) {
        self.close.close();
        if self.registry.unsubscribe(&self.topic, &self.id) {
            self.metrics.on_channel_closed();
        }
    }
}
