// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::membership::{GroupKind, GroupRef, Members, MembershipGroup, OrganizationRole};
use crate::domain::team::TeamId;
use crate::domain::user::UserId;

// ============================================================================
// Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrganizationId(pub Uuid);

impl OrganizationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for OrganizationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationFeatures {
    pub allow_public_events: bool,
    pub allow_external_users: bool,
    pub enable_teams: bool,
}

impl Default for OrganizationFeatures {
    fn default() -> Self {
        Self {
            allow_public_events: true,
            allow_external_users: false,
            enable_teams: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationBranding {
    pub primary_color: String,
    pub secondary_color: String,
}

impl Default for OrganizationBranding {
    fn default() -> Self {
        Self {
            primary_color: "#3f51b5".to_string(),
            secondary_color: "#f50057".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSettings {
    /// Role given to users who join without an explicit role.
    pub default_user_role: OrganizationRole,
    #[serde(default)]
    pub features: OrganizationFeatures,
    #[serde(default)]
    pub branding: OrganizationBranding,
}

impl Default for OrganizationSettings {
    fn default() -> Self {
        Self {
            default_user_role: OrganizationRole::Member,
            features: OrganizationFeatures::default(),
            branding: OrganizationBranding::default(),
        }
    }
}

// ============================================================================
// Aggregate
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrganization {
    pub name: String,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub location: Option<String>,
    pub settings: Option<OrganizationSettings>,
}

/// Organization aggregate root.
///
/// `team_ids` lists child teams; like a user's reverse references it is
/// maintained best-effort and the teams' own `organization_id` is
/// authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub created_by: UserId,
    pub members: Members<OrganizationRole>,
    #[serde(default)]
    pub team_ids: BTreeSet<TeamId>,
    #[serde(default)]
    pub settings: OrganizationSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Organization {
    pub fn new(input: NewOrganization, creator: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: OrganizationId::new(),
            name: input.name,
            description: input.description,
            logo_url: input.logo_url,
            website: input.website,
            industry: input.industry,
            size: input.size,
            location: input.location,
            members: Members::founded_by(creator.clone(), now),
            created_by: creator,
            team_ids: BTreeSet::new(),
            settings: OrganizationSettings::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn apply_update(&mut self, update: OrganizationUpdate, now: DateTime<Utc>) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(logo_url) = update.logo_url {
            self.logo_url = Some(logo_url);
        }
        if let Some(website) = update.website {
            self.website = Some(website);
        }
        if let Some(industry) = update.industry {
            self.industry = Some(industry);
        }
        if let Some(size) = update.size {
            self.size = Some(size);
        }
        if let Some(location) = update.location {
            self.location = Some(location);
        }
        if let Some(settings) = update.settings {
            self.settings = settings;
        }
        self.updated_at = now;
    }

    pub fn matches_search(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.name.to_lowercase().contains(&term)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&term))
    }
}

impl MembershipGroup for Organization {
    type Id = OrganizationId;
    type Role = OrganizationRole;

    const KIND: GroupKind = GroupKind::Organization;

    fn id(&self) -> OrganizationId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn group_ref(&self) -> GroupRef {
        GroupRef::Organization(self.id)
    }

    fn members(&self) -> &Members<OrganizationRole> {
        &self.members
    }

    fn members_mut(&mut self) -> &mut Members<OrganizationRole> {
        &mut self.members
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_organization_has_creator_as_owner_and_default_settings() {
        let creator = UserId::new("alice");
        let org = Organization::new(
            NewOrganization {
                name: "Acme".to_string(),
                ..Default::default()
            },
            creator.clone(),
            Utc::now(),
        );

        assert_eq!(org.members.role_of(&creator), Some(OrganizationRole::Owner));
        assert_eq!(org.members.len(), 1);
        assert_eq!(org.settings.default_user_role, OrganizationRole::Member);
        assert!(org.settings.features.allow_public_events);
        assert!(!org.settings.features.allow_external_users);
        assert!(org.settings.features.enable_teams);
        assert_eq!(org.settings.branding.primary_color, "#3f51b5");
        assert_eq!(org.settings.branding.secondary_color, "#f50057");
        assert!(org.team_ids.is_empty());
    }

    #[test]
    fn test_apply_update_advances_timestamp() {
        let created = Utc::now();
        let mut org = Organization::new(
            NewOrganization {
                name: "Acme".to_string(),
                ..Default::default()
            },
            UserId::new("alice"),
            created,
        );
        let later = created + chrono::Duration::seconds(30);
        org.apply_update(
            OrganizationUpdate {
                description: Some("Rockets".to_string()),
                ..Default::default()
            },
            later,
        );
        assert_eq!(org.name, "Acme");
        assert_eq!(org.description.as_deref(), Some("Rockets"));
        assert_eq!(org.updated_at, later);
    }
}
