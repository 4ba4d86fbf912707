// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Inbound identity events flowing bus -> consumer -> subscriber -> store,
//! and deadline handling on the facades.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use aegis_identity_core::application::context::{OperationContext, OperationSettings};
use aegis_identity_core::application::error::ServiceError;
use aegis_identity_core::application::identity_subscriber::{IdentityEventHandler, IDENTITY_CREATED_EVENT};
use aegis_identity_core::application::publisher::{EventPublisher, PublisherSettings};
use aegis_identity_core::application::repository_factory::Repositories;
use aegis_identity_core::application::services::IdentityServices;
use aegis_identity_core::domain::events::{BusSubscription, EventEnvelope, MessageBus};
use aegis_identity_core::domain::identity_config::EventsConfig;
use aegis_identity_core::domain::membership::GroupRef;
use aegis_identity_core::domain::pagination::{Page, Paged};
use aegis_identity_core::domain::repository::{RepositoryError, UserRepository};
use aegis_identity_core::domain::user::{NewUser, User, UserId, UserRole};
use aegis_identity_core::infrastructure::event_bus::InMemoryMessageBus;
use aegis_identity_core::infrastructure::event_consumer::EventConsumer;
use aegis_identity_core::infrastructure::repositories::InMemoryUserRepository;

fn identity_created(id: &str) -> EventEnvelope {
    EventEnvelope::new(
        IDENTITY_CREATED_EVENT,
        "auth-service",
        Some(id.to_string()),
        json!({
            "id": id,
            "email": format!("{id}@example.com"),
            "firstName": "Grace",
            "lastName": "Hopper",
            "role": "admin",
        }),
    )
}

#[tokio::test]
async fn test_redelivered_identity_event_provisions_one_user() {
    let events = EventsConfig::default();
    let bus = Arc::new(InMemoryMessageBus::new(64));
    let mut user_topic = bus.subscribe_topic(&events.user_topic);
    let (publisher, _worker) = EventPublisher::start(bus.clone(), PublisherSettings::from(&events));
    let repos = Repositories::in_memory();
    let services = IdentityServices::new(&repos, publisher, OperationSettings::default());

    let mut consumer = EventConsumer::new(bus.clone());
    consumer.register(
        events.auth_topic.clone(),
        IDENTITY_CREATED_EVENT,
        Arc::new(IdentityEventHandler::new(repos.users.clone(), services.users.clone())),
    );
    let cancel = CancellationToken::new();
    let handles = consumer.start(cancel.clone()).await.unwrap();

    let event = identity_created("auth0|grace");
    for _ in 0..3 {
        bus.publish(&events.auth_topic, "auth0|grace", &event).await.unwrap();
    }

    let message = tokio::time::timeout(Duration::from_secs(1), user_topic.next())
        .await
        .expect("user.created was not published")
        .unwrap()
        .unwrap();
    let created: EventEnvelope = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(created.event_type, "user.created");
    assert_eq!(created.source, events.source);
    assert_eq!(message.key, "auth0|grace");

    // Nothing else follows for the redeliveries.
    assert!(tokio::time::timeout(Duration::from_millis(200), user_topic.next())
        .await
        .is_err());

    let all = repos.users.list(Page::default(), None).await.unwrap();
    assert_eq!(all.total, 1);
    assert_eq!(all.items[0].role, UserRole::Admin);
    assert_eq!(all.items[0].email, "auth0|grace@example.com");

    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}

/// User store that answers every lookup after a fixed delay.
struct SlowUsers {
    inner: InMemoryUserRepository,
    delay: Duration,
}

#[async_trait]
impl UserRepository for SlowUsers {
    async fn create(&self, user: &User) -> Result<User, RepositoryError> {
        self.inner.create(user).await
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_by_email(email).await
    }

    async fn update(&self, user: &User) -> Result<User, RepositoryError> {
        self.inner.update(user).await
    }

    async fn delete(&self, id: &UserId) -> Result<(), RepositoryError> {
        self.inner.delete(id).await
    }

    async fn list(&self, page: Page, search: Option<&str>) -> Result<Paged<User>, RepositoryError> {
        self.inner.list(page, search).await
    }

    async fn add_group_ref(&self, id: &UserId, group: GroupRef) -> Result<bool, RepositoryError> {
        self.inner.add_group_ref(id, group).await
    }

    async fn remove_group_ref(&self, id: &UserId, group: GroupRef) -> Result<bool, RepositoryError> {
        self.inner.remove_group_ref(id, group).await
    }
}

#[tokio::test]
async fn test_operation_past_deadline_times_out() {
    let inner = InMemoryUserRepository::new();
    inner
        .create(&User::new(
            NewUser {
                user_id: UserId::new("slow"),
                email: "slow@example.com".to_string(),
                first_name: "Slow".to_string(),
                last_name: "Poke".to_string(),
                role: UserRole::User,
            },
            chrono::Utc::now(),
        ))
        .await
        .unwrap();

    let mut repos = Repositories::in_memory();
    repos.users = Arc::new(SlowUsers {
        inner,
        delay: Duration::from_millis(300),
    });
    let (publisher, _worker) =
        EventPublisher::start(Arc::new(InMemoryMessageBus::new(8)), PublisherSettings::default());
    let services = IdentityServices::new(&repos, publisher, OperationSettings::default());

    let hurried = OperationContext::new("slow").with_timeout(Duration::from_millis(50));
    let err = services
        .users
        .get_user(&hurried, &UserId::new("slow"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Timeout));
    assert_eq!(err.reason(), "timeout");

    let patient = OperationContext::new("slow").with_timeout(Duration::from_secs(5));
    let user = services.users.get_user(&patient, &UserId::new("slow")).await.unwrap();
    assert_eq!(user.email, "slow@example.com");
}
