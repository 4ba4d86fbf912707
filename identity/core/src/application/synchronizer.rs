// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Membership Synchronizer
//!
//! Performs membership changes that touch two independently stored
//! aggregates: the group (Organization or Team) and the member's User record.
//!
//! Write order for every change:
//!
//! 1. Load the group and re-run the Role Policy Engine against its current
//!    members.
//! 2. Mutate in memory and write the group with a version-checked replace.
//!    This write is authoritative; if it fails the operation fails.
//! 3. Update the user's reverse reference. Failures are logged and counted,
//!    not rolled back; [`ReferenceReconciler`](crate::application::reconciler::ReferenceReconciler)
//!    repairs drift later.
//! 4. For adds and role changes, re-read the group so the returned entry is
//!    the stored one.
//!
//! A version conflict in step 2 restarts from step 1, up to
//! `max_update_attempts` times.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::error::ServiceError;
use crate::domain::membership::{GroupRef, Member, MembershipGroup, Upsert};
use crate::domain::policy::{self, GroupAction};
use crate::domain::repository::{GroupRepository, RepositoryError, UserRepository};
use crate::domain::user::UserId;

/// Outcome of an add or role change.
#[derive(Debug, Clone)]
pub struct MemberUpsert<G: MembershipGroup> {
    pub group: G,
    /// Entry as stored after the write.
    pub member: Member<G::Role>,
    /// `None` when the user was newly added.
    pub previous_role: Option<G::Role>,
}

#[derive(Debug, Clone)]
pub struct MemberRemoval<G: MembershipGroup> {
    pub group: G,
    pub removed: Member<G::Role>,
}

pub struct MembershipSynchronizer<G: MembershipGroup> {
    groups: Arc<dyn GroupRepository<G>>,
    users: Arc<dyn UserRepository>,
    max_attempts: u32,
}

impl<G: MembershipGroup> MembershipSynchronizer<G> {
    pub fn new(
        groups: Arc<dyn GroupRepository<G>>,
        users: Arc<dyn UserRepository>,
        max_attempts: u32,
    ) -> Self {
        Self {
            groups,
            users,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn load(&self, id: G::Id) -> Result<G, ServiceError> {
        self.groups
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(G::KIND.as_str(), id))
    }

    /// Load the group and check that `actor` may add `target` with `role`.
    /// Runs before the target user is looked up; [`add_member`](Self::add_member)
    /// checks again against the state it writes.
    pub async fn authorize_add(
        &self,
        id: G::Id,
        actor: &UserId,
        target: &UserId,
        role: G::Role,
    ) -> Result<G, ServiceError> {
        let group = self.load(id).await?;
        let action = GroupAction::AddMember {
            target: target.clone(),
            role,
        };
        policy::authorize(group.members(), actor, &action)
            .map_err(|denial| ServiceError::denied(denial, Some(target)))?;
        Ok(group)
    }

    /// Add `target` with `role`, or change their role if already a member.
    pub async fn add_member(
        &self,
        id: G::Id,
        actor: &UserId,
        target: &UserId,
        role: G::Role,
    ) -> Result<MemberUpsert<G>, ServiceError> {
        let action = GroupAction::AddMember {
            target: target.clone(),
            role,
        };
        self.upsert(id, actor, target, role, &action).await
    }

    /// Change the role of an existing member.
    pub async fn change_role(
        &self,
        id: G::Id,
        actor: &UserId,
        target: &UserId,
        new_role: G::Role,
    ) -> Result<MemberUpsert<G>, ServiceError> {
        let action = GroupAction::ChangeRole {
            target: target.clone(),
            new_role,
        };
        self.upsert(id, actor, target, new_role, &action).await
    }

    async fn upsert(
        &self,
        id: G::Id,
        actor: &UserId,
        target: &UserId,
        role: G::Role,
        action: &GroupAction<G::Role>,
    ) -> Result<MemberUpsert<G>, ServiceError> {
        let (stored, upsert) = self
            .write_with_retry(id, actor, action, |group, now| {
                Ok(group.members_mut().insert_or_update(target, role, actor, now))
            })
            .await?;

        debug!(
            group = %stored.group_ref(),
            user_id = %target,
            role = %role,
            version = stored.version(),
            "Membership written"
        );

        self.link(target, stored.group_ref()).await;

        let canonical = match self.reread(id).await {
            Some(group) if group.members().contains(target) => group,
            _ => stored,
        };
        let member = canonical
            .members()
            .get(target)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("member", target))?;

        let previous_role = match upsert {
            Upsert::Inserted => None,
            Upsert::Updated { previous } => Some(previous),
        };

        Ok(MemberUpsert {
            group: canonical,
            member,
            previous_role,
        })
    }

    pub async fn remove_member(
        &self,
        id: G::Id,
        actor: &UserId,
        target: &UserId,
    ) -> Result<MemberRemoval<G>, ServiceError> {
        let action = GroupAction::RemoveMember {
            target: target.clone(),
        };
        let (stored, removed) = self
            .write_with_retry(id, actor, &action, |group, _now| {
                group
                    .members_mut()
                    .remove(target)
                    .ok_or_else(|| ServiceError::not_found("member", target))
            })
            .await?;

        debug!(
            group = %stored.group_ref(),
            user_id = %target,
            version = stored.version(),
            "Member removed"
        );

        self.unlink(target, stored.group_ref()).await;

        Ok(MemberRemoval {
            group: stored,
            removed,
        })
    }

    /// Policy-checked, version-checked write of a group-level change.
    pub async fn update_group<F>(
        &self,
        id: G::Id,
        actor: &UserId,
        action: GroupAction<G::Role>,
        mutate: F,
    ) -> Result<G, ServiceError>
    where
        F: FnMut(&mut G, DateTime<Utc>) -> Result<(), ServiceError> + Send,
    {
        let (stored, ()) = self.write_with_retry(id, actor, &action, mutate).await?;
        Ok(stored)
    }

    /// Delete the group record, then clear every member's reverse reference.
    pub async fn delete_group(&self, group: &G) -> Result<(), ServiceError> {
        self.groups.delete(group.id()).await?;
        let members: Vec<UserId> = group.members().user_ids().cloned().collect();
        self.unlink_all(group.group_ref(), &members).await;
        Ok(())
    }

    async fn write_with_retry<O, F>(
        &self,
        id: G::Id,
        actor: &UserId,
        action: &GroupAction<G::Role>,
        mut mutate: F,
    ) -> Result<(G, O), ServiceError>
    where
        O: Send,
        F: FnMut(&mut G, DateTime<Utc>) -> Result<O, ServiceError> + Send,
    {
        let target = action_target(action);
        let mut attempt = 1;
        loop {
            let mut group = self.load(id).await?;
            policy::authorize(group.members(), actor, action)
                .map_err(|denial| ServiceError::denied(denial, target))?;

            let now = Utc::now();
            let outcome = mutate(&mut group, now)?;
            group.touch(now);

            match self.groups.update(&group).await {
                Ok(stored) => return Ok((stored, outcome)),
                Err(RepositoryError::VersionConflict { expected, .. })
                    if attempt < self.max_attempts =>
                {
                    metrics::counter!(
                        "aegis_identity_update_retries_total",
                        "aggregate" => G::KIND.as_str()
                    )
                    .increment(1);
                    debug!(
                        group = %group.group_ref(),
                        action = action.name(),
                        attempt,
                        expected,
                        "Concurrent modification, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn reread(&self, id: G::Id) -> Option<G> {
        match self.groups.find_by_id(id).await {
            Ok(group) => group,
            Err(e) => {
                debug!(kind = %G::KIND, id = %id, error = %e, "Re-read failed, using written copy");
                None
            }
        }
    }

    /// Best-effort: add `group` to the user's reverse references.
    pub async fn link(&self, user_id: &UserId, group: GroupRef) {
        if let Err(e) = self.users.add_group_ref(user_id, group).await {
            metrics::counter!("aegis_identity_reverse_ref_failures_total", "op" => "add")
                .increment(1);
            warn!(
                user_id = %user_id,
                group = %group,
                error = %e,
                "Failed to add reverse reference, leaving for reconciliation"
            );
        }
    }

    /// Best-effort: remove `group` from the user's reverse references.
    pub async fn unlink(&self, user_id: &UserId, group: GroupRef) {
        if let Err(e) = self.users.remove_group_ref(user_id, group).await {
            metrics::counter!("aegis_identity_reverse_ref_failures_total", "op" => "remove")
                .increment(1);
            warn!(
                user_id = %user_id,
                group = %group,
                error = %e,
                "Failed to remove reverse reference, leaving for reconciliation"
            );
        }
    }

    pub async fn unlink_all(&self, group: GroupRef, user_ids: &[UserId]) {
        join_all(user_ids.iter().map(|user_id| self.unlink(user_id, group))).await;
    }
}

fn action_target<R>(action: &GroupAction<R>) -> Option<&UserId> {
    match action {
        GroupAction::AddMember { target, .. }
        | GroupAction::ChangeRole { target, .. }
        | GroupAction::RemoveMember { target } => Some(target),
        GroupAction::UpdateSettings | GroupAction::DeleteGroup => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::membership::TeamRole;
    use crate::domain::organization::OrganizationId;
    use crate::domain::team::{NewTeam, Team};
    use crate::domain::user::{NewUser, User, UserRole};
    use crate::infrastructure::repositories::{InMemoryTeamRepository, InMemoryUserRepository};

    async fn setup() -> (
        MembershipSynchronizer<Team>,
        Arc<InMemoryTeamRepository>,
        Arc<InMemoryUserRepository>,
        Team,
    ) {
        let teams = Arc::new(InMemoryTeamRepository::new());
        let users = Arc::new(InMemoryUserRepository::new());
        for id in ["owner", "bob"] {
            users
                .create(&User::new(
                    NewUser {
                        user_id: UserId::new(id),
                        email: format!("{id}@example.com"),
                        first_name: id.to_string(),
                        last_name: "Test".to_string(),
                        role: UserRole::User,
                    },
                    Utc::now(),
                ))
                .await
                .unwrap();
        }
        let team = Team::new(
            NewTeam {
                organization_id: OrganizationId::new(),
                name: "Core".to_string(),
                description: None,
                logo_url: None,
            },
            UserId::new("owner"),
            Utc::now(),
        );
        let team = teams.create(&team).await.unwrap();
        let sync = MembershipSynchronizer::new(teams.clone(), users.clone(), 3);
        (sync, teams, users, team)
    }

    #[tokio::test]
    async fn test_add_member_writes_group_then_reverse_reference() {
        let (sync, teams, users, team) = setup().await;
        let owner = UserId::new("owner");
        let bob = UserId::new("bob");

        let result = sync
            .add_member(team.id, &owner, &bob, TeamRole::Viewer)
            .await
            .unwrap();
        assert_eq!(result.member.role, TeamRole::Viewer);
        assert_eq!(result.member.invited_by, owner);
        assert!(result.previous_role.is_none());

        let stored = teams.find_by_id(team.id).await.unwrap().unwrap();
        assert_eq!(stored.members.role_of(&bob), Some(TeamRole::Viewer));
        assert!(stored.updated_at >= team.updated_at);

        let bob_record = users.find_by_id(&bob).await.unwrap().unwrap();
        assert!(bob_record.team_ids.contains(&team.id));
    }

    #[tokio::test]
    async fn test_reverse_reference_failure_does_not_fail_add() {
        let (sync, teams, _users, team) = setup().await;
        let ghost = UserId::new("ghost");

        let result = sync
            .add_member(team.id, &UserId::new("owner"), &ghost, TeamRole::Member)
            .await;
        assert!(result.is_ok());
        let stored = teams.find_by_id(team.id).await.unwrap().unwrap();
        assert!(stored.members.contains(&ghost));
    }

    #[tokio::test]
    async fn test_denied_change_writes_nothing() {
        let (sync, teams, _users, team) = setup().await;
        let owner = UserId::new("owner");

        let err = sync
            .change_role(team.id, &owner, &owner, TeamRole::Member)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvariantViolation(_)));

        let stored = teams.find_by_id(team.id).await.unwrap().unwrap();
        assert_eq!(stored.version, team.version);
        assert_eq!(stored.members.role_of(&owner), Some(TeamRole::Owner));
    }

    #[tokio::test]
    async fn test_remove_member_clears_reverse_reference() {
        let (sync, _teams, users, team) = setup().await;
        let owner = UserId::new("owner");
        let bob = UserId::new("bob");
        sync.add_member(team.id, &owner, &bob, TeamRole::Member)
            .await
            .unwrap();

        let removal = sync.remove_member(team.id, &owner, &bob).await.unwrap();
        assert_eq!(removal.removed.user_id, bob);
        assert!(!removal.group.members.contains(&bob));

        let bob_record = users.find_by_id(&bob).await.unwrap().unwrap();
        assert!(!bob_record.team_ids.contains(&team.id));
    }

    #[tokio::test]
    async fn test_missing_group_is_not_found() {
        let (sync, _teams, _users, _team) = setup().await;
        let err = sync
            .add_member(
                crate::domain::team::TeamId::new(),
                &UserId::new("owner"),
                &UserId::new("bob"),
                TeamRole::Member,
            )
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "not_found");
    }
}
