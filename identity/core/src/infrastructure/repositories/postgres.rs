// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared plumbing for the PostgreSQL repositories: the embedded migration
//! set and the conversions every table needs.

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPool;

use crate::domain::pagination::{Page, Paged};
use crate::domain::repository::RepositoryError;

/// Schema migrations shipped with the crate.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply every pending migration.
pub async fn migrate(pool: &PgPool) -> Result<(), RepositoryError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to apply migrations: {}", e)))
}

pub(crate) fn version_to_db(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version)
        .map_err(|_| RepositoryError::Serialization(format!("version {} out of range", version)))
}

pub(crate) fn version_from_db(version: i64) -> u64 {
    version.max(0) as u64
}

/// `LIMIT` / `OFFSET` bind values for a page.
pub(crate) fn page_bounds(page: Page) -> (i64, i64) {
    (page.limit() as i64, page.offset() as i64)
}

pub(crate) fn paged<T>(items: Vec<T>, total: i64, page: Page) -> Paged<T> {
    Paged {
        items,
        total: total.max(0) as usize,
        page: page.page(),
        limit: page.limit(),
    }
}

/// Case-insensitive substring pattern for `ILIKE`, with wildcards in the
/// search term escaped. Blank terms mean "no filter".
pub(crate) fn search_pattern(search: Option<&str>) -> Option<String> {
    let term = search.map(str::trim).filter(|t| !t.is_empty())?;
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    Some(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_pattern_escapes_wildcards() {
        assert_eq!(search_pattern(Some("ann")).as_deref(), Some("%ann%"));
        assert_eq!(search_pattern(Some(" 50%_off ")).as_deref(), Some("%50\\%\\_off%"));
        assert_eq!(search_pattern(Some("   ")), None);
        assert_eq!(search_pattern(None), None);
    }

    #[test]
    fn test_version_conversion() {
        assert_eq!(version_to_db(7).unwrap(), 7);
        assert!(version_to_db(u64::MAX).is_err());
        assert_eq!(version_from_db(-1), 0);
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(page_bounds(Page::new(3, 10)), (10, 20));
        let p = paged(vec![1, 2], 12, Page::new(1, 2));
        assert_eq!(p.total, 12);
        assert!(p.has_more());
    }
}
