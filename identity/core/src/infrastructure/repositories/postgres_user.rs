// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL User Repository
//!
//! `UserRepository` backed by the `users` table. The profile is stored as a
//! JSONB document; email and names are mirrored into columns for the
//! uniqueness index, ordering and search. The reverse-reference sets live
//! in `organization_ids` / `team_ids` and are only touched by the
//! per-element operations.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::membership::GroupRef;
use crate::domain::organization::OrganizationId;
use crate::domain::pagination::{Page, Paged};
use crate::domain::repository::{RepositoryError, UserRepository};
use crate::domain::team::TeamId;
use crate::domain::user::{User, UserId};
use crate::infrastructure::repositories::postgres::{
    page_bounds, paged, search_pattern, version_from_db, version_to_db,
};

const USER_COLUMNS: &str = "doc, organization_ids, team_ids, version";

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<User, RepositoryError> {
        let doc: serde_json::Value = row.try_get("doc")?;
        let mut user: User = serde_json::from_value(doc)?;
        let organization_ids: Vec<Uuid> = row.try_get("organization_ids")?;
        let team_ids: Vec<Uuid> = row.try_get("team_ids")?;
        user.organization_ids = organization_ids.into_iter().map(OrganizationId).collect();
        user.team_ids = team_ids.into_iter().map(TeamId).collect();
        user.version = version_from_db(row.try_get("version")?);
        Ok(user)
    }

    async fn exists(&self, id: &UserId) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM users WHERE user_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Zero rows changed by a guarded per-element update: either the user is
    /// gone or the set was already in the requested state.
    async fn unchanged_or_missing(&self, id: &UserId) -> Result<bool, RepositoryError> {
        if self.exists(id).await? {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound(format!("user {}", id)))
        }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn create(&self, user: &User) -> Result<User, RepositoryError> {
        let mut stored = user.clone();
        stored.version = 1;
        let doc = serde_json::to_value(&stored)?;
        let organization_ids: Vec<Uuid> = stored.organization_ids.iter().map(|o| o.0).collect();
        let team_ids: Vec<Uuid> = stored.team_ids.iter().map(|t| t.0).collect();

        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, email, first_name, last_name, doc,
                organization_ids, team_ids, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, $9)
            "#,
        )
        .bind(stored.user_id.as_str())
        .bind(&stored.email)
        .bind(&stored.first_name)
        .bind(&stored.last_name)
        .bind(doc)
        .bind(&organization_ids)
        .bind(&team_ids)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match RepositoryError::from(e) {
            RepositoryError::Conflict(_) => RepositoryError::Conflict(format!(
                "user {} or email {} already exists",
                stored.user_id, stored.email
            )),
            other => other,
        })?;

        Ok(stored)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn update(&self, user: &User) -> Result<User, RepositoryError> {
        let expected = version_to_db(user.version)?;
        let mut doc_user = user.clone();
        doc_user.version = user.version + 1;
        let doc = serde_json::to_value(&doc_user)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET email = $2, first_name = $3, last_name = $4, doc = $5,
                version = version + 1, updated_at = $6
            WHERE user_id = $1 AND version = $7
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.user_id.as_str())
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(doc)
        .bind(user.updated_at)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::from_row(&row),
            None if self.exists(&user.user_id).await? => Err(RepositoryError::VersionConflict {
                entity: format!("user {}", user.user_id),
                expected: user.version,
            }),
            None => Err(RepositoryError::NotFound(format!("user {}", user.user_id))),
        }
    }

    async fn delete(&self, id: &UserId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    async fn list(&self, page: Page, search: Option<&str>) -> Result<Paged<User>, RepositoryError> {
        let pattern = search_pattern(search);
        let (limit, offset) = page_bounds(page);
        let filter = r#"
            ($1::text IS NULL
             OR first_name ILIKE $1
             OR last_name ILIKE $1
             OR email ILIKE $1)
        "#;

        let total: i64 = sqlx::query(&format!("SELECT COUNT(*) AS total FROM users WHERE {filter}"))
            .bind(&pattern)
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE {filter}
            ORDER BY lower(last_name), lower(first_name), user_id
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let users = rows.iter().map(Self::from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(paged(users, total, page))
    }

    async fn add_group_ref(&self, id: &UserId, group: GroupRef) -> Result<bool, RepositoryError> {
        let (sql, group_id) = match group {
            GroupRef::Organization(org) => (
                "UPDATE users SET organization_ids = array_append(organization_ids, $2) \
                 WHERE user_id = $1 AND NOT ($2 = ANY(organization_ids)) RETURNING user_id",
                org.0,
            ),
            GroupRef::Team(team) => (
                "UPDATE users SET team_ids = array_append(team_ids, $2) \
                 WHERE user_id = $1 AND NOT ($2 = ANY(team_ids)) RETURNING user_id",
                team.0,
            ),
        };
        let row = sqlx::query(sql)
            .bind(id.as_str())
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(_) => Ok(true),
            None => self.unchanged_or_missing(id).await,
        }
    }

    async fn remove_group_ref(&self, id: &UserId, group: GroupRef) -> Result<bool, RepositoryError> {
        let (sql, group_id) = match group {
            GroupRef::Organization(org) => (
                "UPDATE users SET organization_ids = array_remove(organization_ids, $2) \
                 WHERE user_id = $1 AND $2 = ANY(organization_ids) RETURNING user_id",
                org.0,
            ),
            GroupRef::Team(team) => (
                "UPDATE users SET team_ids = array_remove(team_ids, $2) \
                 WHERE user_id = $1 AND $2 = ANY(team_ids) RETURNING user_id",
                team.0,
            ),
        };
        let row = sqlx::query(sql)
            .bind(id.as_str())
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(_) => Ok(true),
            None => self.unchanged_or_missing(id).await,
        }
    }
}
