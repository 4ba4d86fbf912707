// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository contracts defined in
//! `crate::domain::repository`.
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresUserRepository** - User documents plus reverse-reference arrays
//! - **PostgresOrganizationRepository** - Organization documents plus child team array
//! - **PostgresTeamRepository** - Team documents keyed by `(organization_id, name)`
//!
//! ## In-Memory Repositories
//!
//! HashMap-backed implementations for tests and single-node development:
//! - **InMemoryUserRepository**
//! - **InMemoryOrganizationRepository**
//! - **InMemoryTeamRepository**
//!
//! Both families honor the same write semantics: version-checked `update`,
//! natural-key uniqueness, and reverse-reference sets that only change
//! through the per-element operations.

pub mod postgres;
pub mod postgres_user;
pub mod postgres_organization;
pub mod postgres_team;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::membership::{GroupRef, MembershipGroup};
use crate::domain::organization::{Organization, OrganizationId};
use crate::domain::pagination::{Page, Paged};
use crate::domain::repository::{
    GroupRepository, OrganizationRepository, RepositoryError, TeamRepository, UserRepository,
};
use crate::domain::team::{Team, TeamId};
use crate::domain::user::{User, UserId};

// ============================================================================
// Users
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<UserId, User>>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: &User) -> Result<User, RepositoryError> {
        let mut users = self.users.write();
        if users.contains_key(&user.user_id) {
            return Err(RepositoryError::Conflict(format!(
                "user {} already exists",
                user.user_id
            )));
        }
        if users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(RepositoryError::Conflict(format!(
                "email {} is already registered",
                user.email
            )));
        }
        let mut stored = user.clone();
        stored.version = 1;
        users.insert(stored.user_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.read().get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update(&self, user: &User) -> Result<User, RepositoryError> {
        let mut users = self.users.write();
        let existing = users
            .get(&user.user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user.user_id)))?;
        if existing.version != user.version {
            return Err(RepositoryError::VersionConflict {
                entity: format!("user {}", user.user_id),
                expected: user.version,
            });
        }
        if users
            .values()
            .any(|u| u.user_id != user.user_id && u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(RepositoryError::Conflict(format!(
                "email {} is already registered",
                user.email
            )));
        }

        let mut stored = user.clone();
        stored.organization_ids = existing.organization_ids.clone();
        stored.team_ids = existing.team_ids.clone();
        stored.version = existing.version + 1;
        users.insert(stored.user_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: &UserId) -> Result<(), RepositoryError> {
        self.users
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", id)))
    }

    async fn list(&self, page: Page, search: Option<&str>) -> Result<Paged<User>, RepositoryError> {
        let mut matches: Vec<User> = self
            .users
            .read()
            .values()
            .filter(|u| search.is_none_or(|term| u.matches_search(term)))
            .cloned()
            .collect();
        matches.sort_by_cached_key(|u| (u.last_name.to_lowercase(), u.first_name.to_lowercase()));
        Ok(page.apply(matches))
    }

    async fn add_group_ref(&self, id: &UserId, group: GroupRef) -> Result<bool, RepositoryError> {
        let mut users = self.users.write();
        let user = users
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", id)))?;
        Ok(user.add_group_ref(group))
    }

    async fn remove_group_ref(&self, id: &UserId, group: GroupRef) -> Result<bool, RepositoryError> {
        let mut users = self.users.write();
        let user = users
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", id)))?;
        Ok(user.remove_group_ref(&group))
    }
}

// ============================================================================
// Organizations
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryOrganizationRepository {
    organizations: Arc<RwLock<HashMap<OrganizationId, Organization>>>,
}

impl InMemoryOrganizationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn by_name<G: MembershipGroup>(mut groups: Vec<G>) -> Vec<G> {
    groups.sort_by(|a, b| a.name().cmp(b.name()));
    groups
}

#[async_trait]
impl GroupRepository<Organization> for InMemoryOrganizationRepository {
    async fn create(&self, organization: &Organization) -> Result<Organization, RepositoryError> {
        let mut organizations = self.organizations.write();
        if organizations.contains_key(&organization.id) {
            return Err(RepositoryError::Conflict(format!(
                "organization {} already exists",
                organization.id
            )));
        }
        if organizations.values().any(|o| o.name == organization.name) {
            return Err(RepositoryError::Conflict(format!(
                "organization name '{}' is taken",
                organization.name
            )));
        }
        let mut stored = organization.clone();
        stored.version = 1;
        organizations.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: OrganizationId) -> Result<Option<Organization>, RepositoryError> {
        Ok(self.organizations.read().get(&id).cloned())
    }

    async fn update(&self, organization: &Organization) -> Result<Organization, RepositoryError> {
        let mut organizations = self.organizations.write();
        let existing = organizations
            .get(&organization.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("organization {}", organization.id)))?;
        if existing.version != organization.version {
            return Err(RepositoryError::VersionConflict {
                entity: format!("organization {}", organization.id),
                expected: organization.version,
            });
        }
        if organizations
            .values()
            .any(|o| o.id != organization.id && o.name == organization.name)
        {
            return Err(RepositoryError::Conflict(format!(
                "organization name '{}' is taken",
                organization.name
            )));
        }

        let mut stored = organization.clone();
        stored.team_ids = existing.team_ids.clone();
        stored.version = existing.version + 1;
        organizations.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: OrganizationId) -> Result<(), RepositoryError> {
        self.organizations
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("organization {}", id)))
    }

    async fn list_by_member(
        &self,
        user_id: &UserId,
        page: Page,
    ) -> Result<Paged<Organization>, RepositoryError> {
        let matches = self
            .organizations
            .read()
            .values()
            .filter(|o| o.members.contains(user_id))
            .cloned()
            .collect();
        Ok(page.apply(by_name(matches)))
    }
}

#[async_trait]
impl OrganizationRepository for InMemoryOrganizationRepository {
    async fn find_by_name(&self, name: &str) -> Result<Option<Organization>, RepositoryError> {
        Ok(self
            .organizations
            .read()
            .values()
            .find(|o| o.name == name)
            .cloned())
    }

    async fn list(
        &self,
        page: Page,
        search: Option<&str>,
    ) -> Result<Paged<Organization>, RepositoryError> {
        let matches = self
            .organizations
            .read()
            .values()
            .filter(|o| search.is_none_or(|term| o.matches_search(term)))
            .cloned()
            .collect();
        Ok(page.apply(by_name(matches)))
    }

    async fn add_team(&self, id: OrganizationId, team_id: TeamId) -> Result<bool, RepositoryError> {
        let mut organizations = self.organizations.write();
        let organization = organizations
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("organization {}", id)))?;
        Ok(organization.team_ids.insert(team_id))
    }

    async fn remove_team(&self, id: OrganizationId, team_id: TeamId) -> Result<bool, RepositoryError> {
        let mut organizations = self.organizations.write();
        let organization = organizations
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("organization {}", id)))?;
        Ok(organization.team_ids.remove(&team_id))
    }
}

// ============================================================================
// Teams
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryTeamRepository {
    teams: Arc<RwLock<HashMap<TeamId, Team>>>,
}

impl InMemoryTeamRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupRepository<Team> for InMemoryTeamRepository {
    async fn create(&self, team: &Team) -> Result<Team, RepositoryError> {
        let mut teams = self.teams.write();
        if teams.contains_key(&team.id) {
            return Err(RepositoryError::Conflict(format!("team {} already exists", team.id)));
        }
        if teams
            .values()
            .any(|t| t.organization_id == team.organization_id && t.name == team.name)
        {
            return Err(RepositoryError::Conflict(format!(
                "team name '{}' is taken in organization {}",
                team.name, team.organization_id
            )));
        }
        let mut stored = team.clone();
        stored.version = 1;
        teams.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: TeamId) -> Result<Option<Team>, RepositoryError> {
        Ok(self.teams.read().get(&id).cloned())
    }

    async fn update(&self, team: &Team) -> Result<Team, RepositoryError> {
        let mut teams = self.teams.write();
        let existing = teams
            .get(&team.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("team {}", team.id)))?;
        if existing.version != team.version {
            return Err(RepositoryError::VersionConflict {
                entity: format!("team {}", team.id),
                expected: team.version,
            });
        }
        let organization_id = existing.organization_id;
        if teams
            .values()
            .any(|t| t.id != team.id && t.organization_id == organization_id && t.name == team.name)
        {
            return Err(RepositoryError::Conflict(format!(
                "team name '{}' is taken in organization {}",
                team.name, organization_id
            )));
        }

        let mut stored = team.clone();
        stored.organization_id = organization_id;
        stored.version += 1;
        teams.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: TeamId) -> Result<(), RepositoryError> {
        self.teams
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("team {}", id)))
    }

    async fn list_by_member(&self, user_id: &UserId, page: Page) -> Result<Paged<Team>, RepositoryError> {
        let matches = self
            .teams
            .read()
            .values()
            .filter(|t| t.members.contains(user_id))
            .cloned()
            .collect();
        Ok(page.apply(by_name(matches)))
    }
}

#[async_trait]
impl TeamRepository for InMemoryTeamRepository {
    async fn find_by_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Option<Team>, RepositoryError> {
        Ok(self
            .teams
            .read()
            .values()
            .find(|t| t.organization_id == organization_id && t.name == name)
            .cloned())
    }

    async fn list_by_organization(
        &self,
        organization_id: OrganizationId,
        page: Page,
    ) -> Result<Paged<Team>, RepositoryError> {
        let matches = self
            .teams
            .read()
            .values()
            .filter(|t| t.organization_id == organization_id)
            .cloned()
            .collect();
        Ok(page.apply(by_name(matches)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::membership::TeamRole;
    use crate::domain::organization::NewOrganization;
    use crate::domain::team::NewTeam;
    use crate::domain::user::{NewUser, UserRole};
    use chrono::Utc;

    fn user(id: &str, first: &str, last: &str) -> User {
        User::new(
            NewUser {
                user_id: UserId::new(id),
                email: format!("{id}@example.com"),
                first_name: first.to_string(),
                last_name: last.to_string(),
                role: UserRole::User,
            },
            Utc::now(),
        )
    }

    fn team(org: OrganizationId, name: &str) -> Team {
        Team::new(
            NewTeam {
                organization_id: org,
                name: name.to_string(),
                description: None,
                logo_url: None,
            },
            UserId::new("owner"),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_user_natural_keys_are_unique() {
        let repo = InMemoryUserRepository::new();
        repo.create(&user("u1", "Ann", "Lee")).await.unwrap();

        let same_id = repo.create(&user("u1", "Other", "Person")).await;
        assert!(matches!(same_id, Err(RepositoryError::Conflict(_))));

        let mut same_email = user("u2", "Ann", "Lee");
        same_email.email = "U1@EXAMPLE.COM".to_string();
        assert!(matches!(
            repo.create(&same_email).await,
            Err(RepositoryError::Conflict(_))
        ));
        assert!(repo.find_by_email("u1@Example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_user_update_is_rejected() {
        let repo = InMemoryUserRepository::new();
        let stored = repo.create(&user("u1", "Ann", "Lee")).await.unwrap();

        let mut first = stored.clone();
        first.first_name = "Anne".to_string();
        let first = repo.update(&first).await.unwrap();
        assert_eq!(first.version, stored.version + 1);

        let mut stale = stored;
        stale.first_name = "Annie".to_string();
        assert!(matches!(
            repo.update(&stale).await,
            Err(RepositoryError::VersionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_user_update_keeps_reverse_references() {
        let repo = InMemoryUserRepository::new();
        let stored = repo.create(&user("u1", "Ann", "Lee")).await.unwrap();
        let team_ref = GroupRef::Team(TeamId::new());

        // Reference added after the profile was read must survive the replace.
        assert!(repo.add_group_ref(&stored.user_id, team_ref).await.unwrap());
        let mut edited = stored.clone();
        edited.bio = Some("hi".to_string());
        let updated = repo.update(&edited).await.unwrap();

        assert!(updated.has_group_ref(&team_ref));
        assert!(!repo.add_group_ref(&stored.user_id, team_ref).await.unwrap());
        assert!(repo.remove_group_ref(&stored.user_id, team_ref).await.unwrap());
    }

    #[tokio::test]
    async fn test_user_list_search_and_order() {
        let repo = InMemoryUserRepository::new();
        repo.create(&user("u1", "Zed", "Adams")).await.unwrap();
        repo.create(&user("u2", "Amy", "Brown")).await.unwrap();
        repo.create(&user("u3", "Bob", "adams")).await.unwrap();

        let all = repo.list(Page::default(), None).await.unwrap();
        let ids: Vec<&str> = all.items.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u3", "u1", "u2"]);

        let found = repo.list(Page::default(), Some("ADAMS")).await.unwrap();
        assert_eq!(found.total, 2);
    }

    #[tokio::test]
    async fn test_team_name_unique_within_organization() {
        let repo = InMemoryTeamRepository::new();
        let org_a = OrganizationId::new();
        let org_b = OrganizationId::new();
        repo.create(&team(org_a, "Core")).await.unwrap();
        repo.create(&team(org_b, "Core")).await.unwrap();
        assert!(matches!(
            repo.create(&team(org_a, "Core")).await,
            Err(RepositoryError::Conflict(_))
        ));

        let listed = repo.list_by_organization(org_a, Page::default()).await.unwrap();
        assert_eq!(listed.total, 1);
        assert!(repo.find_by_name(org_b, "Core").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_team_update_cannot_move_organization() {
        let repo = InMemoryTeamRepository::new();
        let org = OrganizationId::new();
        let stored = repo.create(&team(org, "Core")).await.unwrap();

        let mut moved = stored.clone();
        moved.organization_id = OrganizationId::new();
        moved
            .members
            .insert_or_update(&UserId::new("bob"), TeamRole::Member, &UserId::new("owner"), Utc::now());
        let updated = repo.update(&moved).await.unwrap();
        assert_eq!(updated.organization_id, org);
        assert!(updated.members.contains(&UserId::new("bob")));
    }

    #[tokio::test]
    async fn test_organization_team_ids_are_per_element() {
        let repo = InMemoryOrganizationRepository::new();
        let org = Organization::new(
            NewOrganization {
                name: "Acme".into(),
                ..Default::default()
            },
            UserId::new("owner"),
            Utc::now(),
        );
        let stored = repo.create(&org).await.unwrap();
        let team_id = TeamId::new();

        assert!(repo.add_team(stored.id, team_id).await.unwrap());
        // A whole-document update from a stale read keeps the team list.
        let mut edited = stored.clone();
        edited.description = Some("Rockets".into());
        let updated = repo.update(&edited).await.unwrap();
        assert!(updated.team_ids.contains(&team_id));

        assert!(repo.remove_team(stored.id, team_id).await.unwrap());
        assert!(!repo.remove_team(stored.id, team_id).await.unwrap());
        assert!(matches!(
            repo.delete(OrganizationId::new()).await,
            Err(RepositoryError::NotFound(_))
        ));
    }
}
