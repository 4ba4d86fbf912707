// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Identity Domain Events
//!
//! Every completed mutation of a User, Organization or Team is described by
//! one of the event enums below and leaves the service wrapped in an
//! [`EventEnvelope`]. The envelope JSON shape is a contract other services
//! consume:
//!
//! ```json
//! {"eventId": "…", "type": "team.member.added", "source": "user-service",
//!  "subject": "<team id>", "time": "…", "data": {…}, "correlationId": "…"}
//! ```
//!
//! The transport is abstracted by [`MessageBus`]; inbound events reach the
//! service through [`EventHandler`] implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::membership::{Member, OrganizationRole, TeamRole};
use crate::domain::organization::{Organization, OrganizationId};
use crate::domain::team::{Team, TeamId};
use crate::domain::user::{User, UserId};

/// Default `source` tag stamped on outbound envelopes.
pub const DEFAULT_EVENT_SOURCE: &str = "user-service";

// ============================================================================
// Event types
// ============================================================================

/// Aggregate an event is about. Used to route events to topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    User,
    Organization,
    Team,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    UserCreated,
    UserUpdated,
    UserDeleted,
    UserActivated,
    UserDeactivated,
    OrganizationCreated,
    OrganizationUpdated,
    OrganizationDeleted,
    OrganizationMemberAdded,
    OrganizationMemberUpdated,
    OrganizationMemberRemoved,
    TeamCreated,
    TeamUpdated,
    TeamDeleted,
    TeamMemberAdded,
    TeamMemberUpdated,
    TeamMemberRemoved,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::UserCreated => "user.created",
            EventType::UserUpdated => "user.updated",
            EventType::UserDeleted => "user.deleted",
            EventType::UserActivated => "user.activated",
            EventType::UserDeactivated => "user.deactivated",
            EventType::OrganizationCreated => "organization.created",
            EventType::OrganizationUpdated => "organization.updated",
            EventType::OrganizationDeleted => "organization.deleted",
            EventType::OrganizationMemberAdded => "organization.member.added",
            EventType::OrganizationMemberUpdated => "organization.member.updated",
            EventType::OrganizationMemberRemoved => "organization.member.removed",
            EventType::TeamCreated => "team.created",
            EventType::TeamUpdated => "team.updated",
            EventType::TeamDeleted => "team.deleted",
            EventType::TeamMemberAdded => "team.member.added",
            EventType::TeamMemberUpdated => "team.member.updated",
            EventType::TeamMemberRemoved => "team.member.removed",
        }
    }

    pub fn aggregate(self) -> AggregateKind {
        match self {
            EventType::UserCreated
            | EventType::UserUpdated
            | EventType::UserDeleted
            | EventType::UserActivated
            | EventType::UserDeactivated => AggregateKind::User,
            EventType::OrganizationCreated
            | EventType::OrganizationUpdated
            | EventType::OrganizationDeleted
            | EventType::OrganizationMemberAdded
            | EventType::OrganizationMemberUpdated
            | EventType::OrganizationMemberRemoved => AggregateKind::Organization,
            EventType::TeamCreated
            | EventType::TeamUpdated
            | EventType::TeamDeleted
            | EventType::TeamMemberAdded
            | EventType::TeamMemberUpdated
            | EventType::TeamMemberRemoved => AggregateKind::Team,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Domain events
// ============================================================================

#[derive(Debug, Clone)]
pub enum UserEvent {
    UserCreated {
        user: User,
    },
    UserUpdated {
        user: User,
        updated_by: UserId,
    },
    UserActivated {
        user_id: UserId,
        activated_by: UserId,
        activated_at: DateTime<Utc>,
    },
    UserDeactivated {
        user_id: UserId,
        deactivated_by: UserId,
        deactivated_at: DateTime<Utc>,
    },
    UserDeleted {
        user_id: UserId,
        deleted_by: UserId,
        deleted_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub enum OrganizationEvent {
    OrganizationCreated {
        organization: Organization,
    },
    OrganizationUpdated {
        organization: Organization,
        updated_by: UserId,
    },
    OrganizationDeleted {
        organization_id: OrganizationId,
        name: String,
        deleted_by: UserId,
        deleted_at: DateTime<Utc>,
    },
    MemberAdded {
        organization_id: OrganizationId,
        organization_name: String,
        member: Member<OrganizationRole>,
        user_email: Option<String>,
        user_name: Option<String>,
    },
    MemberUpdated {
        organization_id: OrganizationId,
        organization_name: String,
        user_id: UserId,
        role: OrganizationRole,
        previous_role: Option<OrganizationRole>,
        updated_by: UserId,
        updated_at: DateTime<Utc>,
    },
    MemberRemoved {
        organization_id: OrganizationId,
        organization_name: String,
        user_id: UserId,
        removed_by: UserId,
        removed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub enum TeamEvent {
    TeamCreated {
        team: Team,
    },
    TeamUpdated {
        team: Team,
        updated_by: UserId,
    },
    TeamDeleted {
        team_id: TeamId,
        organization_id: OrganizationId,
        name: String,
        deleted_by: UserId,
        deleted_at: DateTime<Utc>,
    },
    MemberAdded {
        team_id: TeamId,
        team_name: String,
        organization_id: OrganizationId,
        member: Member<TeamRole>,
    },
    MemberUpdated {
        team_id: TeamId,
        team_name: String,
        user_id: UserId,
        role: TeamRole,
        previous_role: Option<TeamRole>,
        updated_by: UserId,
        updated_at: DateTime<Utc>,
    },
    MemberRemoved {
        team_id: TeamId,
        team_name: String,
        user_id: UserId,
        removed_by: UserId,
        removed_at: DateTime<Utc>,
    },
}

/// Unified identity event, the unit handed to the publisher.
#[derive(Debug, Clone)]
pub enum IdentityEvent {
    User(UserEvent),
    Organization(OrganizationEvent),
    Team(TeamEvent),
}

impl From<UserEvent> for IdentityEvent {
    fn from(event: UserEvent) -> Self {
        IdentityEvent::User(event)
    }
}

impl From<OrganizationEvent> for IdentityEvent {
    fn from(event: OrganizationEvent) -> Self {
        IdentityEvent::Organization(event)
    }
}

impl From<TeamEvent> for IdentityEvent {
    fn from(event: TeamEvent) -> Self {
        IdentityEvent::Team(event)
    }
}

impl IdentityEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            IdentityEvent::User(e) => match e {
                UserEvent::UserCreated { .. } => EventType::UserCreated,
                UserEvent::UserUpdated { .. } => EventType::UserUpdated,
                UserEvent::UserActivated { .. } => EventType::UserActivated,
                UserEvent::UserDeactivated { .. } => EventType::UserDeactivated,
                UserEvent::UserDeleted { .. } => EventType::UserDeleted,
            },
            IdentityEvent::Organization(e) => match e {
                OrganizationEvent::OrganizationCreated { .. } => EventType::OrganizationCreated,
                OrganizationEvent::OrganizationUpdated { .. } => EventType::OrganizationUpdated,
                OrganizationEvent::OrganizationDeleted { .. } => EventType::OrganizationDeleted,
                OrganizationEvent::MemberAdded { .. } => EventType::OrganizationMemberAdded,
                OrganizationEvent::MemberUpdated { .. } => EventType::OrganizationMemberUpdated,
                OrganizationEvent::MemberRemoved { .. } => EventType::OrganizationMemberRemoved,
            },
            IdentityEvent::Team(e) => match e {
                TeamEvent::TeamCreated { .. } => EventType::TeamCreated,
                TeamEvent::TeamUpdated { .. } => EventType::TeamUpdated,
                TeamEvent::TeamDeleted { .. } => EventType::TeamDeleted,
                TeamEvent::MemberAdded { .. } => EventType::TeamMemberAdded,
                TeamEvent::MemberUpdated { .. } => EventType::TeamMemberUpdated,
                TeamEvent::MemberRemoved { .. } => EventType::TeamMemberRemoved,
            },
        }
    }

    /// Identifier of the aggregate the event is about; used as partition key.
    pub fn subject(&self) -> String {
        match self {
            IdentityEvent::User(e) => match e {
                UserEvent::UserCreated { user } | UserEvent::UserUpdated { user, .. } => {
                    user.user_id.to_string()
                }
                UserEvent::UserActivated { user_id, .. }
                | UserEvent::UserDeactivated { user_id, .. }
                | UserEvent::UserDeleted { user_id, .. } => user_id.to_string(),
            },
            IdentityEvent::Organization(e) => match e {
                OrganizationEvent::OrganizationCreated { organization }
                | OrganizationEvent::OrganizationUpdated { organization, .. } => {
                    organization.id.to_string()
                }
                OrganizationEvent::OrganizationDeleted { organization_id, .. }
                | OrganizationEvent::MemberAdded { organization_id, .. }
                | OrganizationEvent::MemberUpdated { organization_id, .. }
                | OrganizationEvent::MemberRemoved { organization_id, .. } => {
                    organization_id.to_string()
                }
            },
            IdentityEvent::Team(e) => match e {
                TeamEvent::TeamCreated { team } | TeamEvent::TeamUpdated { team, .. } => {
                    team.id.to_string()
                }
                TeamEvent::TeamDeleted { team_id, .. }
                | TeamEvent::MemberAdded { team_id, .. }
                | TeamEvent::MemberUpdated { team_id, .. }
                | TeamEvent::MemberRemoved { team_id, .. } => team_id.to_string(),
            },
        }
    }

    /// Event-specific `data` object of the envelope.
    pub fn payload(&self) -> Value {
        match self {
            IdentityEvent::User(e) => user_payload(e),
            IdentityEvent::Organization(e) => organization_payload(e),
            IdentityEvent::Team(e) => team_payload(e),
        }
    }
}

fn user_payload(event: &UserEvent) -> Value {
    match event {
        UserEvent::UserCreated { user } => json!({
            "userId": user.user_id,
            "email": user.email,
            "firstName": user.first_name,
            "lastName": user.last_name,
            "role": user.role,
            "status": user.status,
            "createdAt": user.created_at,
        }),
        UserEvent::UserUpdated { user, updated_by } => json!({
            "userId": user.user_id,
            "email": user.email,
            "firstName": user.first_name,
            "lastName": user.last_name,
            "status": user.status,
            "updatedBy": updated_by,
            "updatedAt": user.updated_at,
        }),
        UserEvent::UserActivated {
            user_id,
            activated_by,
            activated_at,
        } => json!({
            "userId": user_id,
            "activatedBy": activated_by,
            "activatedAt": activated_at,
        }),
        UserEvent::UserDeactivated {
            user_id,
            deactivated_by,
            deactivated_at,
        } => json!({
            "userId": user_id,
            "deactivatedBy": deactivated_by,
            "deactivatedAt": deactivated_at,
        }),
        UserEvent::UserDeleted {
            user_id,
            deleted_by,
            deleted_at,
        } => json!({
            "userId": user_id,
            "deletedBy": deleted_by,
            "deletedAt": deleted_at,
        }),
    }
}

fn organization_payload(event: &OrganizationEvent) -> Value {
    match event {
        OrganizationEvent::OrganizationCreated { organization } => json!({
            "orgId": organization.id,
            "name": organization.name,
            "description": organization.description,
            "createdBy": organization.created_by,
            "createdAt": organization.created_at,
        }),
        OrganizationEvent::OrganizationUpdated {
            organization,
            updated_by,
        } => json!({
            "orgId": organization.id,
            "name": organization.name,
            "description": organization.description,
            "settings": organization.settings,
            "updatedBy": updated_by,
            "updatedAt": organization.updated_at,
        }),
        OrganizationEvent::OrganizationDeleted {
            organization_id,
            name,
            deleted_by,
            deleted_at,
        } => json!({
            "orgId": organization_id,
            "name": name,
            "deletedBy": deleted_by,
            "deletedAt": deleted_at,
        }),
        OrganizationEvent::MemberAdded {
            organization_id,
            organization_name,
            member,
            user_email,
            user_name,
        } => json!({
            "orgId": organization_id,
            "orgName": organization_name,
            "userId": member.user_id,
            "userEmail": user_email,
            "userName": user_name,
            "role": member.role,
            "invitedBy": member.invited_by,
            "joinedAt": member.joined_at,
        }),
        OrganizationEvent::MemberUpdated {
            organization_id,
            organization_name,
            user_id,
            role,
            previous_role,
            updated_by,
            updated_at,
        } => json!({
            "orgId": organization_id,
            "orgName": organization_name,
            "userId": user_id,
            "role": role,
            "previousRole": previous_role,
            "updatedBy": updated_by,
            "updatedAt": updated_at,
        }),
        OrganizationEvent::MemberRemoved {
            organization_id,
            organization_name,
            user_id,
            removed_by,
            removed_at,
        } => json!({
            "orgId": organization_id,
            "orgName": organization_name,
            "userId": user_id,
            "removedBy": removed_by,
            "removedAt": removed_at,
        }),
    }
}

fn team_payload(event: &TeamEvent) -> Value {
    match event {
        TeamEvent::TeamCreated { team } => json!({
            "teamId": team.id,
            "name": team.name,
            "description": team.description,
            "organizationId": team.organization_id,
            "createdBy": team.created_by,
            "createdAt": team.created_at,
        }),
        TeamEvent::TeamUpdated { team, updated_by } => json!({
            "teamId": team.id,
            "name": team.name,
            "description": team.description,
            "organizationId": team.organization_id,
            "updatedBy": updated_by,
            "updatedAt": team.updated_at,
        }),
        TeamEvent::TeamDeleted {
            team_id,
            organization_id,
            name,
            deleted_by,
            deleted_at,
        } => json!({
            "teamId": team_id,
            "name": name,
            "organizationId": organization_id,
            "deletedBy": deleted_by,
            "deletedAt": deleted_at,
        }),
        TeamEvent::MemberAdded {
            team_id,
            team_name,
            organization_id,
            member,
        } => json!({
            "teamId": team_id,
            "teamName": team_name,
            "organizationId": organization_id,
            "userId": member.user_id,
            "role": member.role,
            "invitedBy": member.invited_by,
            "joinedAt": member.joined_at,
        }),
        TeamEvent::MemberUpdated {
            team_id,
            team_name,
            user_id,
            role,
            previous_role,
            updated_by,
            updated_at,
        } => json!({
            "teamId": team_id,
            "teamName": team_name,
            "userId": user_id,
            "role": role,
            "previousRole": previous_role,
            "updatedBy": updated_by,
            "updatedAt": updated_at,
        }),
        TeamEvent::MemberRemoved {
            team_id,
            team_name,
            user_id,
            removed_by,
            removed_at,
        } => json!({
            "teamId": team_id,
            "teamName": team_name,
            "userId": user_id,
            "removedBy": removed_by,
            "removedAt": removed_at,
        }),
    }
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl EventEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        subject: Option<String>,
        data: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            source: source.into(),
            subject,
            time: Utc::now(),
            data,
            correlation_id: None,
        }
    }

    pub fn from_event(event: &IdentityEvent, source: &str) -> Self {
        Self::new(
            event.event_type().as_str(),
            source,
            Some(event.subject()),
            event.payload(),
        )
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Bus ordering key: the subject, or the event type when there is none.
    pub fn partition_key(&self) -> &str {
        self.subject.as_deref().unwrap_or(&self.event_type)
    }

    /// Transport headers carried alongside the serialized envelope.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("event-type".to_string(), self.event_type.clone()),
            ("source".to_string(), self.source.clone()),
            ("id".to_string(), self.event_id.to_string()),
            ("time".to_string(), self.time.to_rfc3339()),
        ];
        if let Some(correlation_id) = &self.correlation_id {
            headers.push(("correlation-id".to_string(), correlation_id.clone()));
        }
        headers
    }

    /// Required string field of `data`.
    pub fn data_str(&self, field: &'static str) -> Result<&str, SubscriberError> {
        match self.data.get(field) {
            None | Some(Value::Null) => Err(SubscriberError::MalformedPayload {
                field,
                problem: "is missing",
            }),
            Some(Value::String(s)) if s.trim().is_empty() => Err(SubscriberError::MalformedPayload {
                field,
                problem: "is empty",
            }),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(SubscriberError::MalformedPayload {
                field,
                problem: "is not a string",
            }),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Raw message as carried by a bus topic.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub key: String,
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Message bus is closed")]
    Closed,

    #[error("Subscriber lagged by {0} messages (messages were dropped)")]
    Lagged(u64),

    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Message bus unavailable: {0}")]
    Unavailable(String),
}

/// Outbound/inbound message transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), BusError>;

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn BusSubscription>, BusError>;
}

/// Stream of messages from one topic.
#[async_trait]
pub trait BusSubscription: Send {
    /// `None` once the topic is closed.
    async fn next(&mut self) -> Option<Result<BusMessage, BusError>>;
}

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("Malformed payload: field `{field}` {problem}")]
    MalformedPayload {
        field: &'static str,
        problem: &'static str,
    },

    /// The event collides with state owned by a different identity.
    #[error("Event conflicts with existing state: {0}")]
    Conflict(String),

    #[error("Event handling failed: {0}")]
    Failed(String),
}

/// Handler for one inbound event type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), SubscriberError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::team::NewTeam;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = EventEnvelope::new(
            EventType::UserCreated.as_str(),
            DEFAULT_EVENT_SOURCE,
            Some("auth0|alice".to_string()),
            json!({"userId": "auth0|alice"}),
        )
        .with_correlation_id(Some("req-42".to_string()));

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "user.created");
        assert_eq!(json["source"], "user-service");
        assert_eq!(json["subject"], "auth0|alice");
        assert_eq!(json["correlationId"], "req-42");
        assert!(json.get("eventId").is_some());
        assert!(json.get("time").is_some());
        assert_eq!(json["data"]["userId"], "auth0|alice");
    }

    #[test]
    fn test_partition_key_falls_back_to_type() {
        let with_subject = EventEnvelope::new("team.created", "svc", Some("t-1".into()), Value::Null);
        assert_eq!(with_subject.partition_key(), "t-1");

        let without = EventEnvelope::new("team.created", "svc", None, Value::Null);
        assert_eq!(without.partition_key(), "team.created");
    }

    #[test]
    fn test_headers_include_correlation_only_when_present() {
        let envelope = EventEnvelope::new("user.updated", "svc", None, Value::Null);
        let names: Vec<String> = envelope.headers().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["event-type", "source", "id", "time"]);

        let envelope = envelope.with_correlation_id(Some("c".into()));
        assert!(envelope.headers().iter().any(|(k, v)| k == "correlation-id" && v == "c"));
    }

    #[test]
    fn test_team_member_added_payload() {
        let creator = UserId::new("alice");
        let team = Team::new(
            NewTeam {
                organization_id: OrganizationId::new(),
                name: "Platform".to_string(),
                description: None,
                logo_url: None,
            },
            creator.clone(),
            Utc::now(),
        );
        let member = team.members.get(&creator).cloned().unwrap();
        let event = IdentityEvent::from(TeamEvent::MemberAdded {
            team_id: team.id,
            team_name: team.name.clone(),
            organization_id: team.organization_id,
            member,
        });

        assert_eq!(event.event_type(), EventType::TeamMemberAdded);
        assert_eq!(event.event_type().aggregate(), AggregateKind::Team);
        assert_eq!(event.subject(), team.id.to_string());
        let data = event.payload();
        assert_eq!(data["userId"], "alice");
        assert_eq!(data["role"], "owner");
        assert_eq!(data["invitedBy"], "alice");
        assert_eq!(data["teamName"], "Platform");
    }

    #[test]
    fn test_data_str_rejects_missing_and_mistyped() {
        let envelope = EventEnvelope::new(
            "user.created",
            "auth-service",
            None,
            json!({"id": "u1", "email": 7, "firstName": ""}),
        );
        assert_eq!(envelope.data_str("id").ok(), Some("u1"));
        assert!(matches!(
            envelope.data_str("email"),
            Err(SubscriberError::MalformedPayload { field: "email", problem: "is not a string" })
        ));
        assert!(matches!(
            envelope.data_str("firstName"),
            Err(SubscriberError::MalformedPayload { problem: "is empty", .. })
        ));
        assert!(matches!(
            envelope.data_str("lastName"),
            Err(SubscriberError::MalformedPayload { problem: "is missing", .. })
        ));
    }
}
