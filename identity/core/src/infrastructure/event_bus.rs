// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-Memory Message Bus - Topic Pub/Sub for Event Envelopes
//
// One tokio broadcast channel per topic, created on first use. Messages
// carry the serialized envelope plus transport headers, so consumers see
// exactly what a broker-backed bus would hand them.
//
// Events are lost on restart and a subscriber that falls more than
// `capacity` messages behind loses the oldest ones.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::{BusError, BusMessage, BusSubscription, EventEnvelope, MessageBus};

/// Message bus backed by per-topic broadcast channels
#[derive(Clone)]
pub struct InMemoryMessageBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<BusMessage>>>>,
    capacity: usize,
}

impl InMemoryMessageBus {
    /// Create a bus whose topics buffer up to `capacity` messages each
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Create bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        self.topics
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribe without going through the async trait. Messages published
    /// before this call are not seen.
    pub fn subscribe_topic(&self, topic: &str) -> TopicSubscription {
        TopicSubscription {
            topic: topic.to_string(),
            receiver: self.sender(topic).subscribe(),
        }
    }

    /// Get the number of active subscribers on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), BusError> {
        let message = BusMessage {
            topic: topic.to_string(),
            key: partition_key.to_string(),
            headers: envelope.headers(),
            payload: serde_json::to_vec(envelope)?,
        };

        // send() fails only when nobody is listening; the message is simply gone.
        let receivers = self.sender(topic).send(message).unwrap_or(0);
        if receivers == 0 {
            debug!(topic = %topic, event_type = %envelope.event_type, "No subscribers on topic");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn BusSubscription>, BusError> {
        Ok(Box::new(self.subscribe_topic(topic)))
    }
}

/// Receiver for one topic
pub struct TopicSubscription {
    topic: String,
    receiver: broadcast::Receiver<BusMessage>,
}

#[async_trait]
impl BusSubscription for TopicSubscription {
    async fn next(&mut self) -> Option<Result<BusMessage, BusError>> {
        match self.receiver.recv().await {
            Ok(message) => Some(Ok(message)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(topic = %self.topic, "Subscriber lagged by {} messages", n);
                Some(Err(BusError::Lagged(n)))
            }
        }
    }
}
