//! Liveness monitor for consumer connections
//!
//! Consumers never talk back after subscribing, so a peer that vanished
//! without closing its socket is only noticed when a write to it fails. The
//! monitor writes an empty line (the heartbeat frame) every interval; when
//! that write fails or cannot complete within an interval it closes the
//! subscription's delivery channel and stops. It never touches the
//! subscription set: removal belongs to the consumer path.

use std::sync::Weak;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::codec::{FramedWrite, LinesCodec};
use tracing::debug;

use crate::broker::subscription::{CloseHandle, SubscriptionId};

/// Write side of a consumer connection, shared by the relay loop and the
/// monitor.
pub type SharedWriter<W> = AsyncMutex<FramedWrite<W, LinesCodec>>;

const HEARTBEAT: &str = "";

/// Periodic heartbeat writer for one consumer connection.
pub struct LivenessMonitor<W> {
    subscription: SubscriptionId,
    writer: Weak<SharedWriter<W>>,
    close: CloseHandle,
    interval: Duration,
}

impl<W> LivenessMonitor<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        subscription: SubscriptionId,
        writer: Weak<SharedWriter<W>>,
        close: CloseHandle,
        interval: Duration,
    ) -> Self {
        Self {
            subscription,
            writer,
            close,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Spawns the monitor onto the runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Probes every interval until the channel closes or the connection
    /// goes away.
    pub async fn run(self) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.close.closed() => return,
                _ = ticker.tick() => {}
            }

            // The relay loop dropped the connection: nothing left to watch.
            let Some(writer) = self.writer.upgrade() else {
                return;
            };

            let probe = async {
                let mut sink = writer.lock().await;
                sink.send(HEARTBEAT).await
            };

            match time::timeout(self.interval, probe).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(subscription = %self.subscription, error = %e, "heartbeat failed, closing delivery channel");
                    self.close.close();
                    return;
                }
                Err(_) => {
                    debug!(subscription = %self.subscription, "heartbeat timed out, closing delivery channel");
                    self.close.close();
                    return;
                }
            }
        }
    }
}
