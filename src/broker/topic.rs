//! Topic management
//!
//! A `Topic` owns the subscription set for one topic name and performs
//! fan-out for it. The set has its own lock so publishes on unrelated
//! topics never contend; structural changes still go through
//! `TopicRegistry`, which takes the registry lock before this one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::broker::message::EncodedMessage;
use crate::broker::subscription::{SendOutcome, Subscription, SubscriptionId};

/// How a fan-out went, counted per subscriber.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// A named topic and its Subscription Set.
#[derive(Debug)]
pub struct Topic {
    name: String,
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
}

impl Topic {
    /// Topic with no subscribers.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of subscriptions currently registered.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Whether subscription `id` is registered on this topic.
    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.lock().contains_key(id)
    }

    pub(crate) fn insert(&self, subscription: Subscription) {
        self.lock().insert(subscription.id(), subscription);
    }

    pub(crate) fn remove(&self, id: &SubscriptionId) -> Option<Subscription> {
        self.lock().remove(id)
    }

    /// Copy of the current subscription set, taken under the topic lock.
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.lock().values().cloned().collect()
    }

    /// Offers `message` to every subscriber registered at the time of the
    /// call. Each send waits at most `timeout`; a subscriber that cannot take
    /// the message in time misses it while the others proceed.
    pub async fn fan_out(&self, message: EncodedMessage, timeout: Duration) -> FanOutReport {
        let targets = self.snapshot();
        if targets.is_empty() {
            debug!(topic = %self.name, "no subscribers, message dropped");
            return FanOutReport::default();
        }

        let sends = targets.iter().map(|sub| {
            let message = message.clone();
            async move { (sub.id(), sub.deliver(message, timeout).await) }
        });

        let mut report = FanOutReport::default();
        for (id, outcome) in join_all(sends).await {
            match outcome {
                SendOutcome::Queued => {
                    debug!(topic = %self.name, subscription = %id, "message queued");
                    report.delivered += 1;
                }
                SendOutcome::TimedOut => {
                    warn!(topic = %self.name, subscription = %id, "subscriber too slow, message dropped");
                    report.dropped += 1;
                }
                SendOutcome::Closed => {
                    debug!(topic = %self.name, subscription = %id, "subscriber closing, message dropped");
                    report.dropped += 1;
                }
            }
        }
        report
    }

    pub(crate) fn close_all(&self) {
        for sub in self.lock().values() {
            sub.close_handle().close();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
