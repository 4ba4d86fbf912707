// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Identity Event Subscriber
//!
//! Consumes `user.created` from the upstream authentication service and
//! provisions the matching User aggregate. The bus delivers at-least-once,
//! so the handler is idempotent: a user that already exists, or one created
//! by a concurrent redelivery, is left alone. A create that collides with a
//! different user (same email, other id) is reported as a conflict.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::context::OperationContext;
use crate::application::error::ServiceError;
use crate::application::user_service::UserService;
use crate::domain::events::{EventEnvelope, EventHandler, SubscriberError};
use crate::domain::repository::UserRepository;
use crate::domain::user::{NewUser, UserId, UserRole};

/// Upstream event type this handler accepts.
pub const IDENTITY_CREATED_EVENT: &str = "user.created";

pub struct IdentityEventHandler {
    users: Arc<dyn UserRepository>,
    user_service: Arc<dyn UserService>,
}

impl IdentityEventHandler {
    pub fn new(users: Arc<dyn UserRepository>, user_service: Arc<dyn UserService>) -> Self {
        Self { users, user_service }
    }

    fn parse(envelope: &EventEnvelope) -> Result<NewUser, SubscriberError> {
        let role = envelope
            .data
            .get("role")
            .and_then(|v| v.as_str())
            .map(UserRole::from_upstream)
            .unwrap_or_default();
        Ok(NewUser {
            user_id: UserId::new(envelope.data_str("id")?),
            email: envelope.data_str("email")?.to_string(),
            first_name: envelope.data_str("firstName")?.to_string(),
            last_name: envelope.data_str("lastName")?.to_string(),
            role,
        })
    }

    async fn provision(&self, envelope: &EventEnvelope) -> Result<&'static str, SubscriberError> {
        let input = Self::parse(envelope)?;
        let user_id = input.user_id.clone();

        let existing = self
            .users
            .find_by_id(&user_id)
            .await
            .map_err(|e| SubscriberError::Failed(e.to_string()))?;
        if existing.is_some() {
            debug!(user_id = %user_id, event_id = %envelope.event_id, "User already exists, skipping");
            return Ok("duplicate");
        }

        let mut ctx = OperationContext::new(user_id.clone());
        ctx.correlation_id = envelope.correlation_id.clone();

        match self.user_service.create_user(&ctx, input).await {
            Ok(user) => {
                info!(user_id = %user.user_id, event_id = %envelope.event_id, "Provisioned user from identity event");
                Ok("created")
            }
            Err(ServiceError::Conflict(reason)) => {
                // Duplicate only if the record now exists under this id.
                let created = self
                    .users
                    .find_by_id(&user_id)
                    .await
                    .map_err(|e| SubscriberError::Failed(e.to_string()))?;
                if created.is_some() {
                    debug!(user_id = %user_id, reason = %reason, "User created concurrently, skipping");
                    return Ok("duplicate");
                }
                warn!(
                    user_id = %user_id,
                    event_id = %envelope.event_id,
                    reason = %reason,
                    "Identity event conflicts with an existing user, not provisioned"
                );
                Err(SubscriberError::Conflict(reason))
            }
            Err(e) => Err(SubscriberError::Failed(e.to_string())),
        }
    }
}

#[async_trait]
impl EventHandler for IdentityEventHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), SubscriberError> {
        let result = self.provision(envelope).await;
        let outcome = match &result {
            Ok(outcome) => *outcome,
            Err(SubscriberError::MalformedPayload { .. }) => "malformed",
            Err(SubscriberError::Conflict(_)) => "conflict",
            Err(SubscriberError::Failed(_)) => "failed",
        };
        metrics::counter!(
            "aegis_identity_inbound_events_total",
            "event_type" => envelope.event_type.clone(),
            "outcome" => outcome
        )
        .increment(1);
        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::Harness;
    use crate::domain::pagination::Page;
    use serde_json::json;

    fn identity_created(data: serde_json::Value) -> EventEnvelope {
        EventEnvelope::new(IDENTITY_CREATED_EVENT, "auth-service", None, data)
            .with_correlation_id(Some("auth-req-1".to_string()))
    }

    fn handler(h: &Harness) -> IdentityEventHandler {
        IdentityEventHandler::new(h.repos.users.clone(), h.services.users.clone())
    }

    #[tokio::test]
    async fn test_redelivery_creates_exactly_one_user() {
        let mut h = Harness::new();
        let handler = handler(&h);
        let event = identity_created(json!({
            "id": "auth0|alice",
            "email": "alice@example.com",
            "firstName": "Alice",
            "lastName": "Liddell",
            "role": "presenter",
        }));

        handler.handle(&event).await.unwrap();
        handler.handle(&event).await.unwrap();

        let all = h.repos.users.list(Page::default(), None).await.unwrap();
        assert_eq!(all.total, 1);
        let alice = &all.items[0];
        assert_eq!(alice.role, UserRole::Presenter);

        let published = h.next_user_event().await;
        assert_eq!(published.event_type, "user.created");
        assert_eq!(published.correlation_id.as_deref(), Some("auth-req-1"));
        assert!(h.no_pending_user_events().await);
    }

    #[tokio::test]
    async fn test_unknown_role_defaults_to_user() {
        let h = Harness::new();
        handler(&h)
            .handle(&identity_created(json!({
                "id": "u1",
                "email": "u1@example.com",
                "firstName": "U",
                "lastName": "One",
                "role": "superhero",
            })))
            .await
            .unwrap();
        let user = h.repos.users.find_by_id(&UserId::new("u1")).await.unwrap().unwrap();
        assert_eq!(user.role, UserRole::User);
    }

    #[tokio::test]
    async fn test_missing_field_is_malformed() {
        let h = Harness::new();
        let err = handler(&h)
            .handle(&identity_created(json!({
                "id": "u1",
                "email": "u1@example.com",
                "firstName": "U",
            })))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubscriberError::MalformedPayload { field: "lastName", .. }
        ));

        let err = handler(&h)
            .handle(&identity_created(json!({
                "id": 42,
                "email": "u1@example.com",
                "firstName": "U",
                "lastName": "One",
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriberError::MalformedPayload { field: "id", .. }));
    }

    #[tokio::test]
    async fn test_email_taken_by_other_user_is_conflict() {
        let mut h = Harness::new();
        h.seed_user("local-1", UserRole::User).await;
        h.drain_user_events().await;

        let err = handler(&h)
            .handle(&identity_created(json!({
                "id": "auth0|new",
                "email": "local-1@example.com",
                "firstName": "Grace",
                "lastName": "Hopper",
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriberError::Conflict(_)));

        let missing = h.repos.users.find_by_id(&UserId::new("auth0|new")).await.unwrap();
        assert!(missing.is_none());
        assert!(h.no_pending_user_events().await);
    }
}
