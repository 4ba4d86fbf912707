// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::membership::{GroupKind, GroupRef, Members, MembershipGroup, TeamRole};
use crate::domain::organization::OrganizationId;
use crate::domain::user::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamId(pub Uuid);

impl TeamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TeamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTeam {
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub logo_url: Option<String>,
}

/// Partial update. The parent organization cannot be changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub logo_url: Option<String>,
}

/// Team aggregate root. Always belongs to exactly one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    pub organization_id: OrganizationId,
    pub created_by: UserId,
    pub members: Members<TeamRole>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Team {
    pub fn new(input: NewTeam, creator: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: TeamId::new(),
            name: input.name,
            description: input.description,
            logo_url: input.logo_url,
            organization_id: input.organization_id,
            members: Members::founded_by(creator.clone(), now),
            created_by: creator,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn apply_update(&mut self, update: TeamUpdate, now: DateTime<Utc>) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(logo_url) = update.logo_url {
            self.logo_url = Some(logo_url);
        }
        self.updated_at = now;
    }
}

impl MembershipGroup for Team {
    type Id = TeamId;
    type Role = TeamRole;

    const KIND: GroupKind = GroupKind::Team;

    fn id(&self) -> TeamId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn group_ref(&self) -> GroupRef {
        GroupRef::Team(self.id)
    }

    fn members(&self) -> &Members<TeamRole> {
        &self.members
    }

    fn members_mut(&mut self) -> &mut Members<TeamRole> {
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
    fn test_new_team_is_owned_by_creator() {
        let org = OrganizationId::new();
        let creator = UserId::new("alice");
        let team = Team::new(
            NewTeam {
                organization_id: org,
                name: "Platform".to_string(),
                description: None,
                logo_url: None,
            },
            creator.clone(),
            Utc::now(),
        );

        assert_eq!(team.organization_id, org);
        assert_eq!(team.members.role_of(&creator), Some(TeamRole::Owner));
        assert_eq!(team.members.owner_count(), 1);
        assert_eq!(team.group_ref(), GroupRef::Team(team.id));
    }

    #[test]
    fn test_team_json_shape() {
        let team = Team::new(
            NewTeam {
                organization_id: OrganizationId::new(),
                name: "Platform".to_string(),
                description: Some("infra".to_string()),
                logo_url: None,
            },
            UserId::new("alice"),
            Utc::now(),
        );
        let json = serde_json::to_value(&team).unwrap();
        assert!(json.get("organizationId").is_some());
        assert_eq!(json["members"][0]["userId"], "alice");
        assert_eq!(json["members"][0]["role"], "owner");
        assert!(json.get("logoUrl").is_none());
    }
}
