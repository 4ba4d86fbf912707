// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Organization Repository
//!
//! `OrganizationRepository` backed by the `organizations` table. Member user
//! ids are mirrored into `member_ids` (GIN indexed) so "organizations of a
//! user" does not have to scan documents. Child team ids live in `team_ids`
//! and change one element at a time.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::organization::{Organization, OrganizationId};
use crate::domain::pagination::{Page, Paged};
use crate::domain::repository::{GroupRepository, OrganizationRepository, RepositoryError};
use crate::domain::team::TeamId;
use crate::domain::user::UserId;
use crate::infrastructure::repositories::postgres::{
    page_bounds, paged, search_pattern, version_from_db, version_to_db,
};

const ORGANIZATION_COLUMNS: &str = "doc, team_ids, version";

pub struct PostgresOrganizationRepository {
    pool: PgPool,
}

impl PostgresOrganizationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<Organization, RepositoryError> {
        let doc: serde_json::Value = row.try_get("doc")?;
        let mut organization: Organization = serde_json::from_value(doc)?;
        let team_ids: Vec<Uuid> = row.try_get("team_ids")?;
        organization.team_ids = team_ids.into_iter().map(TeamId).collect();
        organization.version = version_from_db(row.try_get("version")?);
        Ok(organization)
    }

    fn member_ids(organization: &Organization) -> Vec<String> {
        organization.members.user_ids().map(|u| u.0.clone()).collect()
    }

    async fn exists(&self, id: OrganizationId) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM organizations WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn unchanged_or_missing(&self, id: OrganizationId) -> Result<bool, RepositoryError> {
        if self.exists(id).await? {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound(format!("organization {}", id)))
        }
    }
}

#[async_trait]
impl GroupRepository<Organization> for PostgresOrganizationRepository {
    async fn create(&self, organization: &Organization) -> Result<Organization, RepositoryError> {
        let mut stored = organization.clone();
        stored.version = 1;
        let doc = serde_json::to_value(&stored)?;
        let team_ids: Vec<Uuid> = stored.team_ids.iter().map(|t| t.0).collect();

        sqlx::query(
            r#"
            INSERT INTO organizations (
                id, name, doc, member_ids, team_ids, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 1, $6, $7)
            "#,
        )
        .bind(stored.id.0)
        .bind(&stored.name)
        .bind(doc)
        .bind(Self::member_ids(&stored))
        .bind(&team_ids)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match RepositoryError::from(e) {
            RepositoryError::Conflict(_) => RepositoryError::Conflict(format!(
                "organization name '{}' already exists",
                stored.name
            )),
            other => other,
        })?;

        Ok(stored)
    }

    async fn find_by_id(&self, id: OrganizationId) -> Result<Option<Organization>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn update(&self, organization: &Organization) -> Result<Organization, RepositoryError> {
        let expected = version_to_db(organization.version)?;
        let mut doc_organization = organization.clone();
        doc_organization.version = organization.version + 1;
        let doc = serde_json::to_value(&doc_organization)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE organizations
            SET name = $2, doc = $3, member_ids = $4,
                version = version + 1, updated_at = $5
            WHERE id = $1 AND version = $6
            RETURNING {ORGANIZATION_COLUMNS}
            "#
        ))
        .bind(organization.id.0)
        .bind(&organization.name)
        .bind(doc)
        .bind(Self::member_ids(organization))
        .bind(organization.updated_at)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match RepositoryError::from(e) {
            RepositoryError::Conflict(_) => RepositoryError::Conflict(format!(
                "organization name '{}' already exists",
                organization.name
            )),
            other => other,
        })?;

        match row {
            Some(row) => Self::from_row(&row),
            None if self.exists(organization.id).await? => Err(RepositoryError::VersionConflict {
                entity: format!("organization {}", organization.id),
                expected: organization.version,
            }),
            None => Err(RepositoryError::NotFound(format!("organization {}", organization.id))),
        }
    }

    async fn delete(&self, id: OrganizationId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("organization {}", id)));
        }
        Ok(())
    }

    async fn list_by_member(
        &self,
        user_id: &UserId,
        page: Page,
    ) -> Result<Paged<Organization>, RepositoryError> {
        let (limit, offset) = page_bounds(page);
        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM organizations WHERE $1 = ANY(member_ids)",
        )
        .bind(user_id.as_str())
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORGANIZATION_COLUMNS} FROM organizations
            WHERE $1 = ANY(member_ids)
            ORDER BY name, id
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let organizations = rows.iter().map(Self::from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(paged(organizations, total, page))
    }
}

#[async_trait]
impl OrganizationRepository for PostgresOrganizationRepository {
    async fn find_by_name(&self, name: &str) -> Result<Option<Organization>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list(
        &self,
        page: Page,
        search: Option<&str>,
    ) -> Result<Paged<Organization>, RepositoryError> {
        let pattern = search_pattern(search);
        let (limit, offset) = page_bounds(page);
        let filter = "($1::text IS NULL OR name ILIKE $1 OR doc->>'description' ILIKE $1)";

        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM organizations WHERE {filter}"
        ))
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORGANIZATION_COLUMNS} FROM organizations
            WHERE {filter}
            ORDER BY name, id
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let organizations = rows.iter().map(Self::from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(paged(organizations, total, page))
    }

    async fn add_team(&self, id: OrganizationId, team_id: TeamId) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            r#"
            UPDATE organizations SET team_ids = array_append(team_ids, $2)
            WHERE id = $1 AND NOT ($2 = ANY(team_ids))
            RETURNING id
            "#,
        )
        .bind(id.0)
        .bind(team_id.0)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(_) => Ok(true),
            None => self.unchanged_or_missing(id).await,
        }
    }

    async fn remove_team(&self, id: OrganizationId, team_id: TeamId) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            r#"
            UPDATE organizations SET team_ids = array_remove(team_ids, $2)
            WHERE id = $1 AND $2 = ANY(team_ids)
            RETURNING id
            "#,
        )
        .bind(id.0)
        .bind(team_id.0)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(_) => Ok(true),
            None => self.unchanged_or_missing(id).await,
        }
    }
}
