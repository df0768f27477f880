//! Subscriptions and their delivery channels
//!
//! A subscription is split in two when it is created:
//! - `Subscription` is the producer-facing side stored in the topic's
//!   subscription set; fan-out clones its sender
//! - `Delivery` is the receiving side owned by the consumer's relay loop
//!
//! Both share a `CloseHandle`. Closing it is the only way a delivery channel
//! ends; whatever is still queued at that point is discarded.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::message::EncodedMessage;

/// Identifies one subscription for its whole lifetime.
pub type SubscriptionId = Uuid;

/// Creates a fresh subscription with a delivery channel holding at most
/// `capacity` undelivered messages.
pub fn channel(capacity: usize) -> (Subscription, Delivery) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let close = CloseHandle::new();
    let id = Uuid::new_v4();

    (
        Subscription {
            id,
            sender,
            close: close.clone(),
        },
        Delivery {
            id,
            receiver,
            close,
        },
    )
}

/// Closes a delivery channel. Cloning shares the same underlying signal.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle {
    token: CancellationToken,
}

impl CloseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the channel has been closed.
    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}

/// Outcome of a single send attempt onto a delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    TimedOut,
    Closed,
}

/// Sending side of a delivery channel, held in the topic's Subscription Set.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    sender: mpsc::Sender<EncodedMessage>,
    close: CloseHandle,
}

impl Subscription {
    /// Id shared by both ends of the channel.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    /// Queue `message`, waiting at most `timeout` for room.
    pub async fn deliver(&self, message: EncodedMessage, timeout: Duration) -> SendOutcome {
        if self.close.is_closed() {
            return SendOutcome::Closed;
        }
        match self.sender.send_timeout(message, timeout).await {
            Ok(()) => SendOutcome::Queued,
            Err(SendTimeoutError::Timeout(_)) => SendOutcome::TimedOut,
            Err(SendTimeoutError::Closed(_)) => SendOutcome::Closed,
        }
    }
}

/// Receiving side of a delivery channel, drained by the consumer relay loop.
#[derive(Debug)]
pub struct Delivery {
    id: SubscriptionId,
    receiver: mpsc::Receiver<EncodedMessage>,
    close: CloseHandle,
}

impl Delivery {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    /// Next queued message in publish order, or `None` once the channel has
    /// been closed.
    pub async fn recv(&mut self) -> Option<EncodedMessage> {
        tokio::select! {
            biased;
            _ = self.close.closed() => None,
            message = self.receiver.recv() => message,
        }
    }
}
