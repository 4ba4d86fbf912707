// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Team Repository
//!
//! `TeamRepository` backed by the `teams` table. `(organization_id, name)`
//! is unique; `organization_id` is fixed at insert and never rewritten.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::organization::OrganizationId;
use crate::domain::pagination::{Page, Paged};
use crate::domain::repository::{GroupRepository, RepositoryError, TeamRepository};
use crate::domain::team::{Team, TeamId};
use crate::domain::user::UserId;
use crate::infrastructure::repositories::postgres::{page_bounds, paged, version_from_db, version_to_db};

const TEAM_COLUMNS: &str = "doc, organization_id, version";

pub struct PostgresTeamRepository {
    pool: PgPool,
}

impl PostgresTeamRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<Team, RepositoryError> {
        let doc: serde_json::Value = row.try_get("doc")?;
        let mut team: Team = serde_json::from_value(doc)?;
        let organization_id: Uuid = row.try_get("organization_id")?;
        team.organization_id = OrganizationId(organization_id);
        team.version = version_from_db(row.try_get("version")?);
        Ok(team)
    }

    fn member_ids(team: &Team) -> Vec<String> {
        team.members.user_ids().map(|u| u.0.clone()).collect()
    }

    fn name_conflict(team: &Team) -> impl FnOnce(sqlx::Error) -> RepositoryError + '_ {
        move |e| match RepositoryError::from(e) {
            RepositoryError::Conflict(_) => RepositoryError::Conflict(format!(
                "team '{}' already exists in organization {}",
                team.name, team.organization_id
            )),
            other => other,
        }
    }

    async fn page_where(
        &self,
        filter: &str,
        key: Bind<'_>,
        page: Page,
    ) -> Result<Paged<Team>, RepositoryError> {
        let (limit, offset) = page_bounds(page);

        let count_sql = format!("SELECT COUNT(*) AS total FROM teams WHERE {filter}");
        let rows_sql = format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE {filter} ORDER BY name, id LIMIT $2 OFFSET $3"
        );

        let (total, rows) = match key {
            Bind::Member(user_id) => {
                let total: i64 = sqlx::query(&count_sql)
                    .bind(user_id)
                    .fetch_one(&self.pool)
                    .await?
                    .try_get("total")?;
                let rows = sqlx::query(&rows_sql)
                    .bind(user_id)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;
                (total, rows)
            }
            Bind::Organization(organization_id) => {
                let total: i64 = sqlx::query(&count_sql)
                    .bind(organization_id)
                    .fetch_one(&self.pool)
                    .await?
                    .try_get("total")?;
                let rows = sqlx::query(&rows_sql)
                    .bind(organization_id)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;
                (total, rows)
            }
        };

        let teams = rows.iter().map(Self::from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(paged(teams, total, page))
    }
}

enum Bind<'a> {
    Member(&'a str),
    Organization(Uuid),
}

#[async_trait]
impl GroupRepository<Team> for PostgresTeamRepository {
    async fn create(&self, team: &Team) -> Result<Team, RepositoryError> {
        let mut stored = team.clone();
        stored.version = 1;
        let doc = serde_json::to_value(&stored)?;

        sqlx::query(
            r#"
            INSERT INTO teams (
                id, organization_id, name, doc, member_ids, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 1, $6, $7)
            "#,
        )
        .bind(stored.id.0)
        .bind(stored.organization_id.0)
        .bind(&stored.name)
        .bind(doc)
        .bind(Self::member_ids(&stored))
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Self::name_conflict(&stored))?;

        Ok(stored)
    }

    async fn find_by_id(&self, id: TeamId) -> Result<Option<Team>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn update(&self, team: &Team) -> Result<Team, RepositoryError> {
        let expected = version_to_db(team.version)?;
        let current = self
            .find_by_id(team.id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("team {}", team.id)))?;

        let mut doc_team = team.clone();
        doc_team.organization_id = current.organization_id;
        doc_team.version = team.version + 1;
        let doc = serde_json::to_value(&doc_team)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE teams
            SET name = $2, doc = $3, member_ids = $4,
                version = version + 1, updated_at = $5
            WHERE id = $1 AND version = $6
            RETURNING {TEAM_COLUMNS}
            "#
        ))
        .bind(team.id.0)
        .bind(&team.name)
        .bind(doc)
        .bind(Self::member_ids(team))
        .bind(team.updated_at)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::name_conflict(&doc_team))?;

        match row {
            Some(row) => Self::from_row(&row),
            None => Err(RepositoryError::VersionConflict {
                entity: format!("team {}", team.id),
                expected: team.version,
            }),
        }
    }

    async fn delete(&self, id: TeamId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM teams WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("team {}", id)));
        }
        Ok(())
    }

    async fn list_by_member(&self, user_id: &UserId, page: Page) -> Result<Paged<Team>, RepositoryError> {
        self.page_where("$1 = ANY(member_ids)", Bind::Member(user_id.as_str()), page)
            .await
    }
}

#[async_trait]
impl TeamRepository for PostgresTeamRepository {
    async fn find_by_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Option<Team>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE organization_id = $1 AND name = $2"
        ))
        .bind(organization_id.0)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_by_organization(
        &self,
        organization_id: OrganizationId,
        page: Page,
    ) -> Result<Paged<Team>, RepositoryError> {
        self.page_where(
            "organization_id = $1",
            Bind::Organization(organization_id.0),
            page,
        )
        .await
    }
}
