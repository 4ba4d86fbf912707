// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event Consumer
//!
//! Infrastructure component that pulls envelopes off [`MessageBus`] topics
//! and dispatches them to registered [`EventHandler`]s.
//!
//! # Event Flow
//!
//! ```text
//! Upstream service
//!   |
//!   | publish(auth.events, envelope)
//!   v
//! MessageBus topic
//!   |
//!   | one background task per topic
//!   v
//! EventConsumer: decode envelope, match (topic, event type)
//!   |
//!   v
//! EventHandler::handle()
//! ```
//!
//! Handler errors are logged and counted; they are never fed back to the
//! bus and the message is not redelivered by this layer.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::events::{BusError, BusMessage, BusSubscription, EventEnvelope, EventHandler, MessageBus};

/// Event type that matches every message on a topic.
pub const ANY_EVENT_TYPE: &str = "*";

struct Route {
    event_type: String,
    handler: Arc<dyn EventHandler>,
}

impl Route {
    fn matches(&self, event_type: &str) -> bool {
        self.event_type == ANY_EVENT_TYPE || self.event_type == event_type
    }
}

pub struct EventConsumer {
    bus: Arc<dyn MessageBus>,
    routes: HashMap<String, Vec<Route>>,
}

impl EventConsumer {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            routes: HashMap::new(),
        }
    }

    /// Route `event_type` on `topic` to `handler`. Use [`ANY_EVENT_TYPE`]
    /// to receive everything on the topic.
    pub fn register(
        &mut self,
        topic: impl Into<String>,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        self.routes.entry(topic.into()).or_default().push(Route {
            event_type: event_type.into(),
            handler,
        });
        self
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Subscribe to every registered topic and spawn one consumer task per
    /// topic. Subscriptions are in place when this returns; the tasks stop
    /// when `cancel` fires or the topic closes.
    pub async fn start(self, cancel: CancellationToken) -> Result<Vec<JoinHandle<()>>, BusError> {
        let mut handles = Vec::with_capacity(self.routes.len());
        for (topic, routes) in self.routes {
            let subscription = self.bus.subscribe(&topic).await?;
            info!(topic = %topic, handlers = routes.len(), "Subscribed to topic");
            handles.push(tokio::spawn(consume(
                topic,
                subscription,
                Arc::new(routes),
                cancel.clone(),
            )));
        }
        Ok(handles)
    }
}

async fn consume(
    topic: String,
    mut subscription: Box<dyn BusSubscription>,
    routes: Arc<Vec<Route>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(topic = %topic, "Event consumer stopping");
                break;
            }
            next = subscription.next() => match next {
                Some(Ok(message)) => dispatch(&topic, &routes, &message).await,
                Some(Err(BusError::Lagged(n))) => {
                    metrics::counter!("aegis_identity_inbound_events_total", "event_type" => "*", "outcome" => "lagged")
                        .increment(n);
                    warn!(topic = %topic, skipped = n, "Consumer lagged, messages were skipped");
                }
                Some(Err(e)) => {
                    error!(topic = %topic, error = %e, "Failed to receive from topic");
                }
                None => {
                    info!(topic = %topic, "Topic closed, consumer exiting");
                    break;
                }
            }
        }
    }
}

async fn dispatch(topic: &str, routes: &[Route], message: &BusMessage) {
    let envelope: EventEnvelope = match serde_json::from_slice(&message.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            metrics::counter!("aegis_identity_inbound_events_total", "event_type" => "unknown", "outcome" => "undecodable")
                .increment(1);
            warn!(topic = %topic, key = %message.key, error = %e, "Dropping undecodable message");
            return;
        }
    };

    let mut handled = false;
    for route in routes.iter().filter(|r| r.matches(&envelope.event_type)) {
        handled = true;
        if let Err(e) = route.handler.handle(&envelope).await {
            warn!(
                topic = %topic,
                event_type = %envelope.event_type,
                event_id = %envelope.event_id,
                correlation_id = envelope.correlation_id.as_deref().unwrap_or("-"),
                error = %e,
                "Event handler failed"
            );
        }
    }
    if !handled {
        debug!(topic = %topic, event_type = %envelope.event_type, "No handler for event type");
    }
}
