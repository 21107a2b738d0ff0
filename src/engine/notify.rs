//! Topic-based fan-out of refreshed voting results.
//!
//! Topics are keyed by (organization, proposal url). Delivery is
//! best-effort: there is no replay log, a subscriber connected after a
//! publish simply re-fetches the current result over the query path.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::entities::voting_result;

const TOPIC_CAPACITY: usize = 64;

/// The payload pushed to subscribers on every committed tally change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultEvent {
    pub organization_id: String,
    pub proposal_url: String,
    pub in_favor: i64,
    pub against: i64,
    pub updated_at: i64,
}

impl From<voting_result::Model> for ResultEvent {
    fn from(model: voting_result::Model) -> Self {
        Self {
            organization_id: model.organization_id,
            proposal_url: model.proposal_url,
            in_favor: model.in_favor,
            against: model.against,
            updated_at: model.updated_at.timestamp(),
        }
    }
}

type TopicKey = (String, String);

/// Per-topic broadcast channels, created lazily on first subscribe or
/// publish and pruned once every receiver is gone.
#[derive(Default)]
pub struct ResultBus {
    topics: RwLock<HashMap<TopicKey, broadcast::Sender<ResultEvent>>>,
}

impl ResultBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live subscription for (organization, proposal url).
    pub fn subscribe(&self, organization_id: &str, proposal_url: &str) -> broadcast::Receiver<ResultEvent> {
        let key = (organization_id.to_owned(), proposal_url.to_owned());
        let mut topics = self.topics.write().expect("result bus lock poisoned");
        topics
            .entry(key)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Fire-and-forget publish. Call only after the owning transaction has
    /// committed; a rolled-back write must never emit an event.
    pub fn publish(&self, event: ResultEvent) {
        let key = (event.organization_id.clone(), event.proposal_url.clone());
        let delivered = {
            let topics = self.topics.read().expect("result bus lock poisoned");
            match topics.get(&key) {
                Some(sender) => sender.send(event).is_ok(),
                None => return,
            }
        };

        if !delivered {
            // Last receiver went away; drop the idle topic.
            let mut topics = self.topics.write().expect("result bus lock poisoned");
            if let Some(sender) = topics.get(&key) {
                if sender.receiver_count() == 0 {
                    topics.remove(&key);
                }
            }
            debug!("Dropped notification for idle topic {}/{}", key.0, key.1);
        }
    }

    #[cfg(test)]
    fn topic_count(&self) -> usize {
        self.topics.read().expect("result bus lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(in_favor: i64, against: i64) -> ResultEvent {
        ResultEvent {
            organization_id: "acme".to_string(),
            proposal_url: "https://proposals.example/1".to_string(),
            in_favor,
            against,
            updated_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_result() {
        let bus = ResultBus::new();
        let mut receiver = bus.subscribe("acme", "https://proposals.example/1");

        bus.publish(event(3, 0));
        let received = receiver.recv().await.expect("event delivered");
        assert_eq!(received.in_favor, 3);
        assert_eq!(received.against, 0);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = ResultBus::new();
        bus.publish(event(1, 0));
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = ResultBus::new();
        let mut other = bus.subscribe("acme", "https://proposals.example/2");

        bus.publish(event(2, 1));
        assert!(matches!(
            other.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_publish() {
        let bus = ResultBus::new();
        {
            let _early = bus.subscribe("acme", "https://proposals.example/1");
            bus.publish(event(1, 0));
        }
        let mut late = bus.subscribe("acme", "https://proposals.example/1");
        bus.publish(event(2, 0));

        let received = late.recv().await.expect("only the later event");
        assert_eq!(received.in_favor, 2);
        assert!(matches!(
            late.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn idle_topic_is_pruned_after_publish() {
        let bus = ResultBus::new();
        drop(bus.subscribe("acme", "https://proposals.example/1"));
        bus.publish(event(1, 0));
        assert_eq!(bus.topic_count(), 0);
    }
}
