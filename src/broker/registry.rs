//! Topic registry
//!
//! Maps topic names to `Topic`s and is the only place that mutates a topic's
//! subscription set. Lock order is always registry, then topic; fan-out only
//! ever takes the topic lock, so a slow subscriber never holds up registry
//! operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::broker::subscription::{Subscription, SubscriptionId};
use crate::broker::topic::Topic;
use crate::metrics::MetricsObserver;

/// Every topic the broker has seen, keyed by exact name.
pub struct TopicRegistry {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    metrics: Arc<dyn MetricsObserver>,
}

impl TopicRegistry {
    pub fn new(metrics: Arc<dyn MetricsObserver>) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Returns the topic called `name`, creating it on first use.
    pub fn ensure_topic(&self, name: &str) -> Arc<Topic> {
        let (topic, created) = {
            let mut topics = self.lock();
            Self::lookup_or_create(&mut topics, name)
        };
        if created {
            self.topic_created(name);
        }
        topic
    }

    /// Registers `subscription` on `name`, creating the topic if needed.
    pub fn subscribe(&self, name: &str, subscription: Subscription) -> Arc<Topic> {
        let (topic, created) = {
            let mut topics = self.lock();
            let (topic, created) = Self::lookup_or_create(&mut topics, name);
            topic.insert(subscription);
            (topic, created)
        };
        if created {
            self.topic_created(name);
        }
        topic
    }

    /// Removes subscription `id` from `topic`. Returns whether it was
    /// still registered.
    pub fn unsubscribe(&self, topic: &Topic, id: &SubscriptionId) -> bool {
        let _topics = self.lock();
        topic.remove(id).is_some()
    }

    /// Looks up `name` without creating it.
    pub fn get(&self, name: &str) -> Option<Arc<Topic>> {
        self.lock().get(name).cloned()
    }

    /// Number of topics created so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Topic names in sorted order.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Closes the delivery channel of every registered subscription.
    pub fn close_all(&self) {
        let topics: Vec<Arc<Topic>> = self.lock().values().cloned().collect();
        for topic in topics {
            topic.close_all();
        }
    }

    fn lookup_or_create(
        topics: &mut HashMap<String, Arc<Topic>>,
        name: &str,
    ) -> (Arc<Topic>, bool) {
        if let Some(topic) = topics.get(name) {
            return (topic.clone(), false);
        }
        let topic = Arc::new(Topic::new(name));
        topics.insert(name.to_string(), topic.clone());
        (topic, true)
    }

    fn topic_created(&self, name: &str) {
        info!(topic = %name, "topic created");
        self.metrics.on_topic_created();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Topic>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("topics", &self.topic_names())
            .finish()
    }
}
