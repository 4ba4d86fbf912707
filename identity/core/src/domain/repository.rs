// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the three identity aggregates, one repository
//! per aggregate root, implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `UserRepository` | `User` | `InMemoryUserRepository`, `PostgresUserRepository` |
//! | `OrganizationRepository` | `Organization` | `InMemoryOrganizationRepository`, `PostgresOrganizationRepository` |
//! | `TeamRepository` | `Team` | `InMemoryTeamRepository`, `PostgresTeamRepository` |
//!
//! ## Write semantics
//!
//! There are no cross-aggregate transactions. Each aggregate is written on
//! its own:
//!
//! - `update` is a whole-aggregate replace guarded by the aggregate's
//!   `version`. If the stored version differs from the one the caller read,
//!   the write fails with [`RepositoryError::VersionConflict`] and nothing is
//!   changed. On success the stored copy (with its new version) is returned.
//! - Reverse-reference sets (`User::organization_ids`, `User::team_ids`,
//!   `Organization::team_ids`) are only changed through the per-element
//!   operations below. `update` never overwrites them, and the per-element
//!   operations do not bump `version`.
//!
//! Reads return `Ok(None)` when the aggregate does not exist.

use async_trait::async_trait;

use crate::domain::membership::{GroupRef, MembershipGroup};
use crate::domain::organization::{Organization, OrganizationId};
use crate::domain::pagination::{Page, Paged};
use crate::domain::team::{Team, TeamId};
use crate::domain::user::{User, UserId};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Repository interface for User aggregates
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user. `Conflict` if the id or the email is taken.
    async fn create(&self, user: &User) -> Result<User, RepositoryError>;

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    /// Version-checked replace of the profile. Reverse references are kept.
    async fn update(&self, user: &User) -> Result<User, RepositoryError>;

    /// Hard delete. The service soft-deletes through `update` instead.
    async fn delete(&self, id: &UserId) -> Result<(), RepositoryError>;

    /// Sorted by last name, then first name. `search` matches first name,
    /// last name or email, case-insensitively.
    async fn list(&self, page: Page, search: Option<&str>) -> Result<Paged<User>, RepositoryError>;

    /// Returns `true` if the reference was added.
    async fn add_group_ref(&self, id: &UserId, group: GroupRef) -> Result<bool, RepositoryError>;

    /// Returns `true` if the reference was present.
    async fn remove_group_ref(&self, id: &UserId, group: GroupRef) -> Result<bool, RepositoryError>;
}

/// Operations shared by every group aggregate (Organization, Team).
#[async_trait]
pub trait GroupRepository<G: MembershipGroup>: Send + Sync {
    async fn create(&self, group: &G) -> Result<G, RepositoryError>;

    async fn find_by_id(&self, id: G::Id) -> Result<Option<G>, RepositoryError>;

    /// Version-checked whole-aggregate replace.
    async fn update(&self, group: &G) -> Result<G, RepositoryError>;

    /// `NotFound` if the group does not exist.
    async fn delete(&self, id: G::Id) -> Result<(), RepositoryError>;

    /// Groups whose member list contains `user_id`, sorted by name.
    async fn list_by_member(&self, user_id: &UserId, page: Page) -> Result<Paged<G>, RepositoryError>;
}

/// Repository interface for Organization aggregates
#[async_trait]
pub trait OrganizationRepository: GroupRepository<Organization> {
    async fn find_by_name(&self, name: &str) -> Result<Option<Organization>, RepositoryError>;

    /// Sorted by name. `search` matches name or description.
    async fn list(&self, page: Page, search: Option<&str>) -> Result<Paged<Organization>, RepositoryError>;

    /// Returns `true` if the team was added to `team_ids`.
    async fn add_team(&self, id: OrganizationId, team_id: TeamId) -> Result<bool, RepositoryError>;

    /// Returns `true` if the team was present in `team_ids`.
    async fn remove_team(&self, id: OrganizationId, team_id: TeamId) -> Result<bool, RepositoryError>;
}

/// Repository interface for Team aggregates
#[async_trait]
pub trait TeamRepository: GroupRepository<Team> {
    /// Team names are unique within their organization.
    async fn find_by_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Option<Team>, RepositoryError>;

    /// Teams of one organization, sorted by name.
    async fn list_by_organization(
        &self,
        organization_id: OrganizationId,
        page: Page,
    ) -> Result<Paged<Team>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Version conflict on {entity}: expected version {expected}")]
    VersionConflict { entity: String, expected: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
