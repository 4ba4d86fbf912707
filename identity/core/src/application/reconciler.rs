// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reverse-reference reconciliation.
//!
//! Recomputes a user's `organization_ids` / `team_ids` from the member lists
//! of every group (the source of truth) and repairs the difference with
//! per-element operations. Run lazily on profile reads.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::application::error::ServiceError;
use crate::domain::membership::{GroupRef, MembershipGroup};
use crate::domain::organization::Organization;
use crate::domain::pagination::Page;
use crate::domain::repository::{
    GroupRepository, OrganizationRepository, RepositoryError, TeamRepository, UserRepository,
};
use crate::domain::team::Team;
use crate::domain::user::UserId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<GroupRef>,
    pub removed: Vec<GroupRef>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct ReferenceReconciler {
    users: Arc<dyn UserRepository>,
    organizations: Arc<dyn OrganizationRepository>,
    teams: Arc<dyn TeamRepository>,
}

impl ReferenceReconciler {
    pub fn new(
        users: Arc<dyn UserRepository>,
        organizations: Arc<dyn OrganizationRepository>,
        teams: Arc<dyn TeamRepository>,
    ) -> Self {
        Self {
            users,
            organizations,
            teams,
        }
    }

    pub async fn reconcile_user(&self, user_id: &UserId) -> Result<ReconcileReport, ServiceError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("user", user_id))?;

        let mut truth = member_refs::<Organization, _>(self.organizations.as_ref(), user_id).await?;
        truth.extend(member_refs::<Team, _>(self.teams.as_ref(), user_id).await?);
        let recorded = user.group_refs();

        let mut report = ReconcileReport::default();
        for missing in truth.difference(&recorded) {
            if self.users.add_group_ref(user_id, *missing).await? {
                report.added.push(*missing);
            }
        }
        for stale in recorded.difference(&truth) {
            if self.users.remove_group_ref(user_id, *stale).await? {
                report.removed.push(*stale);
            }
        }

        if !report.is_clean() {
            metrics::counter!("aegis_identity_reverse_refs_repaired_total")
                .increment((report.added.len() + report.removed.len()) as u64);
            info!(
                user_id = %user_id,
                added = report.added.len(),
                removed = report.removed.len(),
                "Repaired drifted reverse references"
            );
        }
        Ok(report)
    }
}

/// Every group of one kind whose member list contains `user_id`.
async fn member_refs<G, R>(repo: &R, user_id: &UserId) -> Result<BTreeSet<GroupRef>, RepositoryError>
where
    G: MembershipGroup,
    R: GroupRepository<G> + ?Sized,
{
    let mut refs = BTreeSet::new();
    let mut page = 1;
    loop {
        let batch = repo.list_by_member(user_id, Page::max(page)).await?;
        refs.extend(batch.items.iter().map(|group| group.group_ref()));
        if !batch.has_more() {
            return Ok(refs);
        }
        page += 1;
    }
}
