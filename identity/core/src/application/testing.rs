// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory wiring shared by the service unit tests.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::application::context::{OperationContext, OperationSettings};
use crate::application::publisher::{EventPublisher, PublisherSettings};
use crate::application::repository_factory::Repositories;
use crate::application::services::IdentityServices;
use crate::domain::events::{BusSubscription, EventEnvelope};
use crate::domain::user::{NewUser, User, UserId, UserRole};
use crate::infrastructure::event_bus::{InMemoryMessageBus, TopicSubscription};

const EVENT_WAIT: Duration = Duration::from_secs(1);
const QUIET_WAIT: Duration = Duration::from_millis(100);

pub(crate) struct Harness {
    pub services: IdentityServices,
    pub repos: Repositories,
    user_events: TopicSubscription,
    team_events: TopicSubscription,
    _worker: JoinHandle<()>,
}

impl Harness {
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let bus = InMemoryMessageBus::new(256);
        let settings = PublisherSettings::default();
        let user_events = bus.subscribe_topic(&settings.user_topic);
        let team_events = bus.subscribe_topic(&settings.team_topic);
        let (publisher, worker) = EventPublisher::start(Arc::new(bus), settings);

        let repos = Repositories::in_memory();
        let services = IdentityServices::new(&repos, publisher, OperationSettings::default());
        Self {
            services,
            repos,
            user_events,
            team_events,
            _worker: worker,
        }
    }

    pub fn new_user(id: &str, role: UserRole) -> NewUser {
        NewUser {
            user_id: UserId::new(id),
            email: format!("{id}@example.com"),
            first_name: id.to_string(),
            last_name: "Tester".to_string(),
            role,
        }
    }

    pub async fn seed_user(&mut self, id: &str, role: UserRole) -> User {
        let ctx = OperationContext::new(id);
        self.services
            .users
            .create_user(&ctx, Self::new_user(id, role))
            .await
            .unwrap()
    }

    pub async fn next_user_event(&mut self) -> EventEnvelope {
        next_event(&mut self.user_events, EVENT_WAIT)
            .await
            .expect("no event on user topic")
    }

    pub async fn next_team_event(&mut self) -> EventEnvelope {
        next_event(&mut self.team_events, EVENT_WAIT)
            .await
            .expect("no event on team topic")
    }

    pub async fn no_pending_user_events(&mut self) -> bool {
        next_event(&mut self.user_events, QUIET_WAIT).await.is_none()
    }

    pub async fn drain_user_events(&mut self) {
        while next_event(&mut self.user_events, QUIET_WAIT).await.is_some() {}
    }
}

async fn next_event(subscription: &mut TopicSubscription, wait: Duration) -> Option<EventEnvelope> {
    let message = tokio::time::timeout(wait, subscription.next())
        .await
        .ok()??
        .ok()?;
    Some(serde_json::from_slice(&message.payload).expect("undecodable envelope"))
}
