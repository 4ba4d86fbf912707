// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain Event Publisher
//!
//! Turns completed state transitions into [`EventEnvelope`]s and hands them
//! to the outbound [`MessageBus`] from a background worker.
//!
//! Delivery contract is at-most-once:
//! - `publish` never waits. Envelopes go into a bounded queue; a full queue
//!   drops the event with a warning.
//! - The worker publishes each envelope once. Failures are logged and
//!   counted, never retried, never reported back to the caller.
//!
//! Routing: user and organization events go to the user topic, team events
//! to the team topic. The partition key is the envelope subject.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::events::{AggregateKind, EventEnvelope, IdentityEvent, MessageBus};
use crate::domain::identity_config::EventsConfig;

#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub source: String,
    pub user_topic: String,
    pub team_topic: String,
    pub queue_capacity: usize,
}

impl PublisherSettings {
    pub fn topic_for(&self, aggregate: AggregateKind) -> &str {
        match aggregate {
            AggregateKind::User | AggregateKind::Organization => &self.user_topic,
            AggregateKind::Team => &self.team_topic,
        }
    }
}

impl Default for PublisherSettings {
    fn default() -> Self {
        PublisherSettings::from(&EventsConfig::default())
    }
}

impl From<&EventsConfig> for PublisherSettings {
    fn from(config: &EventsConfig) -> Self {
        Self {
            source: config.source.clone(),
            user_topic: config.user_topic.clone(),
            team_topic: config.team_topic.clone(),
            queue_capacity: config.publish_queue_capacity.max(1),
        }
    }
}

struct Outbound {
    topic: String,
    envelope: EventEnvelope,
}

/// Cheap-to-clone handle used by the service facades.
#[derive(Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<Outbound>,
    settings: Arc<PublisherSettings>,
}

impl EventPublisher {
    /// Spawn the delivery worker. It exits once every `EventPublisher`
    /// clone has been dropped and the queue is drained.
    pub fn start(bus: Arc<dyn MessageBus>, settings: PublisherSettings) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity);
        info!(
            queue_capacity = settings.queue_capacity,
            user_topic = %settings.user_topic,
            team_topic = %settings.team_topic,
            "Starting event publisher worker"
        );
        let handle = tokio::spawn(deliver(bus, receiver));
        (
            Self {
                sender,
                settings: Arc::new(settings),
            },
            handle,
        )
    }

    /// Enqueue a domain event. Returns `false` if it was dropped.
    pub fn publish(&self, event: impl Into<IdentityEvent>, correlation_id: Option<&str>) -> bool {
        let event = event.into();
        let topic = self.settings.topic_for(event.event_type().aggregate()).to_string();
        let envelope = EventEnvelope::from_event(&event, &self.settings.source)
            .with_correlation_id(correlation_id.map(str::to_string));
        self.enqueue(topic, envelope)
    }

    fn enqueue(&self, topic: String, envelope: EventEnvelope) -> bool {
        match self.sender.try_send(Outbound { topic, envelope }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(outbound)) => {
                metrics::counter!("aegis_identity_events_dropped_total", "reason" => "queue_full")
                    .increment(1);
                warn!(
                    event_type = %outbound.envelope.event_type,
                    event_id = %outbound.envelope.event_id,
                    "Publish queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(outbound)) => {
                metrics::counter!("aegis_identity_events_dropped_total", "reason" => "closed")
                    .increment(1);
                warn!(
                    event_type = %outbound.envelope.event_type,
                    event_id = %outbound.envelope.event_id,
                    "Publisher worker stopped, dropping event"
                );
                false
            }
        }
    }
}

async fn deliver(bus: Arc<dyn MessageBus>, mut receiver: mpsc::Receiver<Outbound>) {
    let mut published = 0u64;
    let mut failed = 0u64;

    while let Some(Outbound { topic, envelope }) = receiver.recv().await {
        match bus
            .publish(&topic, envelope.partition_key(), &envelope)
            .await
        {
            Ok(()) => {
                published += 1;
                metrics::counter!("aegis_identity_events_published_total", "topic" => topic.clone())
                    .increment(1);
                debug!(
                    topic = %topic,
                    event_type = %envelope.event_type,
                    event_id = %envelope.event_id,
                    "Published event"
                );
            }
            Err(e) => {
                failed += 1;
                metrics::counter!("aegis_identity_events_failed_total", "topic" => topic.clone())
                    .increment(1);
                error!(
                    topic = %topic,
                    event_type = %envelope.event_type,
                    event_id = %envelope.event_id,
                    error = %e,
                    "Failed to publish event"
                );
            }
        }
    }

    info!(
        "Event publisher shut down (published {} events, {} failures)",
        published, failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{BusError, BusSubscription, UserEvent};
    use crate::domain::user::UserId;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, String, EventEnvelope)>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageBus for RecordingBus {
        async fn publish(
            &self,
            topic: &str,
            partition_key: &str,
            envelope: &EventEnvelope,
        ) -> Result<(), BusError> {
            if self.fail {
                return Err(BusError::Unavailable("broker down".into()));
            }
            self.published
                .lock()
                .push((topic.to_string(), partition_key.to_string(), envelope.clone()));
            Ok(())
        }

        async fn subscribe(&self, _topic: &str) -> Result<Box<dyn BusSubscription>, BusError> {
            Err(BusError::Unavailable("not supported".into()))
        }
    }

    fn deleted(user: &str) -> UserEvent {
        UserEvent::UserDeleted {
            user_id: UserId::new(user),
            deleted_by: UserId::new(user),
            deleted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_events_are_routed_and_keyed_by_subject() {
        let bus = Arc::new(RecordingBus::default());
        let (publisher, handle) = EventPublisher::start(bus.clone(), PublisherSettings::default());

        assert!(publisher.publish(deleted("alice"), Some("req-7")));
        drop(publisher);
        handle.await.unwrap();

        let published = bus.published.lock();
        assert_eq!(published.len(), 1);
        let (topic, key, envelope) = &published[0];
        assert_eq!(topic, "user.events");
        assert_eq!(key, "alice");
        assert_eq!(envelope.event_type, "user.deleted");
        assert_eq!(envelope.source, "user-service");
        assert_eq!(envelope.correlation_id.as_deref(), Some("req-7"));
    }

    #[tokio::test]
    async fn test_publish_failures_are_swallowed() {
        let bus = Arc::new(RecordingBus {
            fail: true,
            ..Default::default()
        });
        let (publisher, handle) = EventPublisher::start(bus.clone(), PublisherSettings::default());

        assert!(publisher.publish(deleted("alice"), None));
        drop(publisher);
        handle.await.unwrap();
        assert!(bus.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (sender, _receiver) = mpsc::channel(1);
        let publisher = EventPublisher {
            sender,
            settings: Arc::new(PublisherSettings::default()),
        };

        assert!(publisher.publish(deleted("a"), None));
        assert!(!publisher.publish(deleted("b"), None));
    }

    #[test]
    fn test_topic_routing() {
        let settings = PublisherSettings::default();
        assert_eq!(settings.topic_for(AggregateKind::User), "user.events");
        assert_eq!(settings.topic_for(AggregateKind::Organization), "user.events");
        assert_eq!(settings.topic_for(AggregateKind::Team), "team.events");
    }
}
