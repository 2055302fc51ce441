//! Publish-out of ingested events to subscribers.
//!
//! Delivery is best effort. The pipeline publishes only after an event is
//! stored, and a failed publish is logged and otherwise ignored.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

/// One event as seen by subscribers: a topic and the event's canonical JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Errors a publisher may report. Never surfaced to the ingesting caller.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("publisher unavailable: {0}")]
    Unavailable(String),
}

/// Outbound seam for subscriber delivery.
///
/// Implementations must not block for long: `publish` runs inline on the
/// ingestion path. See [`crate::mqtt::BrokerPublisher`] for the broker side.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

/// In-process publisher backed by a `tokio` broadcast channel.
///
/// Every subscriber sees every message; filtering by topic is the
/// subscriber's job. A subscriber that falls more than `capacity` messages
/// behind loses the oldest ones.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedMessage>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedMessage> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<PublishedMessage> {
        self.tx.clone()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let message = PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        match self.tx.send(message) {
            Ok(receivers) => {
                tracing::debug!(topic, receivers, "published event");
            }
            Err(_) => {
                // Nobody is listening right now; nothing was lost.
                tracing::debug!(topic, "published event with no subscribers");
            }
        }
        Ok(())
    }
}

/// Hands every message to each target in turn.
///
/// A failing target does not stop delivery to the others; the first error
/// is reported once all targets have been tried.
pub struct FanoutPublisher {
    targets: Vec<Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    pub fn new(targets: Vec<Arc<dyn EventPublisher>>) -> Self {
        Self { targets }
    }
}

impl EventPublisher for FanoutPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut first_error = None;
        for target in &self.targets {
            if let Err(e) = target.publish(topic, payload) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Offline;

    impl EventPublisher for Offline {
        fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), PublishError> {
            Err(PublishError::Unavailable("broker offline".to_string()))
        }
    }

    #[test]
    fn subscribers_receive_published_messages() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();

        publisher.publish("/channel/app", b"{}").unwrap();

        let message = rx.try_recv().unwrap();
        assert_eq!(message.topic, "/channel/app");
        assert_eq!(message.payload, b"{}");
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let publisher = BroadcastPublisher::new(8);
        assert!(publisher.publish("/channel/app", b"{}").is_ok());
    }

    #[test]
    fn fanout_reaches_healthy_targets_past_a_failing_one() {
        let broadcast = BroadcastPublisher::new(8);
        let mut rx = broadcast.subscribe();
        let targets: Vec<Arc<dyn EventPublisher>> = vec![Arc::new(Offline), Arc::new(broadcast)];
        let fanout = FanoutPublisher::new(targets);

        let err = fanout.publish("/channel/app", b"{}").unwrap_err();
        assert!(matches!(err, PublishError::Unavailable(_)));
        assert_eq!(rx.try_recv().unwrap().topic, "/channel/app");
    }
}
