// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Builds the three aggregate repositories for the configured storage
//! backend. The domain only sees the traits; which implementation backs
//! them is decided here.

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tracing::info;

use crate::domain::repository::{
    OrganizationRepository, StorageBackend, TeamRepository, UserRepository,
};
use crate::infrastructure::repositories::postgres::migrate;
use crate::infrastructure::repositories::postgres_organization::PostgresOrganizationRepository;
use crate::infrastructure::repositories::postgres_team::PostgresTeamRepository;
use crate::infrastructure::repositories::postgres_user::PostgresUserRepository;
use crate::infrastructure::repositories::{
    InMemoryOrganizationRepository, InMemoryTeamRepository, InMemoryUserRepository,
};

/// One handle per aggregate store.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub organizations: Arc<dyn OrganizationRepository>,
    pub teams: Arc<dyn TeamRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(InMemoryUserRepository::new()),
            organizations: Arc::new(InMemoryOrganizationRepository::new()),
            teams: Arc::new(InMemoryTeamRepository::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PostgresUserRepository::new(pool.clone())),
            organizations: Arc::new(PostgresOrganizationRepository::new(pool.clone())),
            teams: Arc::new(PostgresTeamRepository::new(pool)),
        }
    }
}

/// Create repositories for `backend`. For PostgreSQL this connects and
/// applies pending migrations first.
pub async fn create_repositories(backend: &StorageBackend) -> Result<Repositories> {
    match backend {
        StorageBackend::InMemory => {
            info!("Using in-memory repositories");
            Ok(Repositories::in_memory())
        }
        StorageBackend::PostgreSQL(config) => {
            info!(max_connections = config.max_connections, "Connecting to PostgreSQL");
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.connection_string)
                .await
                .context("Failed to connect to database")?;
            migrate(&pool).await.context("Failed to apply migrations")?;
            info!("Database schema is up to date");
            Ok(Repositories::postgres(pool))
        }
    }
}
