// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Organization Service
//!
//! Facade over the Organization aggregate. Membership changes go through the
//! [`MembershipSynchronizer`]; this layer adds the structural preconditions,
//! the delete cascade and event emission.
//!
//! Organizations are hard-deleted. Deleting one first deletes every child
//! Team (best-effort per Team), then the Organization record, then clears the
//! members' reverse references.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::context::{OperationContext, OperationSettings};
use crate::application::error::ServiceError;
use crate::application::publisher::EventPublisher;
use crate::application::synchronizer::MembershipSynchronizer;
use crate::domain::events::{OrganizationEvent, TeamEvent};
use crate::domain::membership::{Member, MembershipGroup, OrganizationRole};
use crate::domain::organization::{NewOrganization, Organization, OrganizationId, OrganizationUpdate};
use crate::domain::pagination::{Page, Paged};
use crate::domain::policy::{self, GroupAction, PolicyDenial};
use crate::domain::repository::{OrganizationRepository, TeamRepository, UserRepository};
use crate::domain::team::{Team, TeamId};
use crate::domain::user::{User, UserId};

#[async_trait]
pub trait OrganizationService: Send + Sync {
    async fn create_organization(
        &self,
        ctx: &OperationContext,
        input: NewOrganization,
    ) -> Result<Organization, ServiceError>;
    async fn get_organization(
        &self,
        ctx: &OperationContext,
        id: OrganizationId,
    ) -> Result<Organization, ServiceError>;
    async fn update_organization(
        &self,
        ctx: &OperationContext,
        id: OrganizationId,
        update: OrganizationUpdate,
    ) -> Result<Organization, ServiceError>;
    async fn delete_organization(&self, ctx: &OperationContext, id: OrganizationId) -> Result<(), ServiceError>;
    async fn list_organizations(
        &self,
        ctx: &OperationContext,
        page: Page,
        search: Option<&str>,
    ) -> Result<Paged<Organization>, ServiceError>;
    async fn list_user_organizations(
        &self,
        ctx: &OperationContext,
        user_id: &UserId,
        page: Page,
    ) -> Result<Paged<Organization>, ServiceError>;
    async fn add_member(
        &self,
        ctx: &OperationContext,
        id: OrganizationId,
        user_id: &UserId,
        role: OrganizationRole,
    ) -> Result<Member<OrganizationRole>, ServiceError>;
    async fn update_member_role(
        &self,
        ctx: &OperationContext,
        id: OrganizationId,
        user_id: &UserId,
        role: OrganizationRole,
    ) -> Result<Member<OrganizationRole>, ServiceError>;
    async fn remove_member(
        &self,
        ctx: &OperationContext,
        id: OrganizationId,
        user_id: &UserId,
    ) -> Result<(), ServiceError>;
    async fn list_organization_teams(
        &self,
        ctx: &OperationContext,
        id: OrganizationId,
        page: Page,
    ) -> Result<Paged<Team>, ServiceError>;
}

pub struct StandardOrganizationService {
    organizations: Arc<dyn OrganizationRepository>,
    teams: Arc<dyn TeamRepository>,
    users: Arc<dyn UserRepository>,
    organization_sync: MembershipSynchronizer<Organization>,
    team_sync: MembershipSynchronizer<Team>,
    publisher: EventPublisher,
    settings: OperationSettings,
}

impl StandardOrganizationService {
    pub fn new(
        organizations: Arc<dyn OrganizationRepository>,
        teams: Arc<dyn TeamRepository>,
        users: Arc<dyn UserRepository>,
        publisher: EventPublisher,
        settings: OperationSettings,
    ) -> Self {
        let organization_sync = MembershipSynchronizer::new(
            organizations.clone(),
            users.clone(),
            settings.max_update_attempts,
        );
        let team_sync =
            MembershipSynchronizer::new(teams.clone(), users.clone(), settings.max_update_attempts);
        Self {
            organizations,
            teams,
            users,
            organization_sync,
            team_sync,
            publisher,
            settings,
        }
    }

    async fn active_user(&self, id: &UserId) -> Result<User, ServiceError> {
        match self.users.find_by_id(id).await? {
            Some(user) if !user.is_deleted() => Ok(user),
            _ => Err(ServiceError::not_found("user", id)),
        }
    }

    async fn ensure_name_free(
        &self,
        name: &str,
        except: Option<OrganizationId>,
    ) -> Result<(), ServiceError> {
        match self.organizations.find_by_name(name).await? {
            Some(existing) if Some(existing.id) != except => Err(ServiceError::Conflict(format!(
                "organization name '{}' is taken",
                name
            ))),
            _ => Ok(()),
        }
    }

    /// Child teams from both the parent's list and the team store, so a
    /// team whose parent link was never written is still cascaded.
    async fn child_team_ids(&self, organization: &Organization) -> Result<BTreeSet<TeamId>, ServiceError> {
        let mut ids = organization.team_ids.clone();
        let mut page = 1;
        loop {
            let batch = self
                .teams
                .list_by_organization(organization.id, Page::max(page))
                .await?;
            ids.extend(batch.items.iter().map(|team| team.id));
            if !batch.has_more() {
                return Ok(ids);
            }
            page += 1;
        }
    }

    async fn cascade_team(&self, ctx: &OperationContext, team_id: TeamId) {
        let team = match self.teams.find_by_id(team_id).await {
            Ok(Some(team)) => team,
            Ok(None) => return,
            Err(e) => {
                warn!(team_id = %team_id, error = %e, "Failed to load team for cascade delete");
                return;
            }
        };
        if let Err(e) = self.team_sync.delete_group(&team).await {
            metrics::counter!("aegis_identity_cascade_failures_total").increment(1);
            warn!(
                team_id = %team_id,
                organization_id = %team.organization_id,
                error = %e,
                "Failed to delete child team, continuing"
            );
            return;
        }
        self.publisher.publish(
            TeamEvent::TeamDeleted {
                team_id,
                organization_id: team.organization_id,
                name: team.name,
                deleted_by: ctx.actor_id.clone(),
                deleted_at: Utc::now(),
            },
            ctx.correlation_id(),
        );
    }

    fn publish_member_updated(
        &self,
        ctx: &OperationContext,
        organization: &Organization,
        member: &Member<OrganizationRole>,
        previous_role: Option<OrganizationRole>,
    ) {
        self.publisher.publish(
            OrganizationEvent::MemberUpdated {
                organization_id: organization.id,
                organization_name: organization.name.clone(),
                user_id: member.user_id.clone(),
                role: member.role,
                previous_role,
                updated_by: ctx.actor_id.clone(),
                updated_at: organization.updated_at,
            },
            ctx.correlation_id(),
        );
    }
}

#[async_trait]
impl OrganizationService for StandardOrganizationService {
    async fn create_organization(
        &self,
        ctx: &OperationContext,
        mut input: NewOrganization,
    ) -> Result<Organization, ServiceError> {
        ctx.run(self.settings.timeout, async {
            input.name = input.name.trim().to_string();
            if input.name.is_empty() {
                return Err(ServiceError::validation("organization name must not be empty"));
            }
            match self.users.find_by_id(&ctx.actor_id).await? {
                Some(creator) if !creator.is_deleted() => {}
                _ => {
                    return Err(ServiceError::validation(format!(
                        "creator {} does not exist",
                        ctx.actor_id
                    )))
                }
            }
            self.ensure_name_free(&input.name, None).await?;

            let organization = Organization::new(input, ctx.actor_id.clone(), Utc::now());
            let stored = self.organizations.create(&organization).await?;
            info!(
                organization_id = %stored.id,
                name = %stored.name,
                created_by = %ctx.actor_id,
                "Created organization"
            );

            self.organization_sync.link(&ctx.actor_id, stored.group_ref()).await;
            self.publisher.publish(
                OrganizationEvent::OrganizationCreated {
                    organization: stored.clone(),
                },
                ctx.correlation_id(),
            );
            Ok(stored)
        })
        .await
    }

    async fn get_organization(
        &self,
        ctx: &OperationContext,
        id: OrganizationId,
    ) -> Result<Organization, ServiceError> {
        ctx.run(self.settings.timeout, self.organization_sync.load(id))
            .await
    }

    async fn update_organization(
        &self,
        ctx: &OperationContext,
        id: OrganizationId,
        mut update: OrganizationUpdate,
    ) -> Result<Organization, ServiceError> {
        ctx.run(self.settings.timeout, async {
            if let Some(name) = update.name.as_mut() {
                *name = name.trim().to_string();
                if name.is_empty() {
                    return Err(ServiceError::validation("organization name must not be empty"));
                }
                self.ensure_name_free(name, Some(id)).await?;
            }

            let stored = self
                .organization_sync
                .update_group(id, &ctx.actor_id, GroupAction::UpdateSettings, |organization, now| {
                    organization.apply_update(update.clone(), now);
                    Ok(())
                })
                .await?;

            self.publisher.publish(
                OrganizationEvent::OrganizationUpdated {
                    organization: stored.clone(),
                    updated_by: ctx.actor_id.clone(),
                },
                ctx.correlation_id(),
            );
            Ok(stored)
        })
        .await
    }

    async fn delete_organization(&self, ctx: &OperationContext, id: OrganizationId) -> Result<(), ServiceError> {
        ctx.run(self.settings.timeout, async {
            let organization = self.organization_sync.load(id).await?;
            policy::authorize(organization.members(), &ctx.actor_id, &GroupAction::DeleteGroup)
                .map_err(|denial| ServiceError::denied(denial, None))?;

            let team_ids = self.child_team_ids(&organization).await?;
            for team_id in &team_ids {
                self.cascade_team(ctx, *team_id).await;
            }

            self.organization_sync.delete_group(&organization).await?;
            info!(
                organization_id = %id,
                teams = team_ids.len(),
                deleted_by = %ctx.actor_id,
                "Deleted organization"
            );

            self.publisher.publish(
                OrganizationEvent::OrganizationDeleted {
                    organization_id: id,
                    name: organization.name,
                    deleted_by: ctx.actor_id.clone(),
                    deleted_at: Utc::now(),
                },
                ctx.correlation_id(),
            );
            Ok(())
        })
        .await
    }

    async fn list_organizations(
        &self,
        ctx: &OperationContext,
        page: Page,
        search: Option<&str>,
    ) -> Result<Paged<Organization>, ServiceError> {
        ctx.run(self.settings.timeout, async {
            let search = search.map(str::trim).filter(|s| !s.is_empty());
            Ok(self.organizations.list(page, search).await?)
        })
        .await
    }

    async fn list_user_organizations(
        &self,
        ctx: &OperationContext,
        user_id: &UserId,
        page: Page,
    ) -> Result<Paged<Organization>, ServiceError> {
        ctx.run(self.settings.timeout, async {
            Ok(self.organizations.list_by_member(user_id, page).await?)
        })
        .await
    }

    async fn add_member(
        &self,
        ctx: &OperationContext,
        id: OrganizationId,
        user_id: &UserId,
        role: OrganizationRole,
    ) -> Result<Member<OrganizationRole>, ServiceError> {
        ctx.run(self.settings.timeout, async {
            self.organization_sync
                .authorize_add(id, &ctx.actor_id, user_id, role)
                .await?;
            let user = self.active_user(user_id).await?;
            let outcome = self
                .organization_sync
                .add_member(id, &ctx.actor_id, user_id, role)
                .await?;

            match outcome.previous_role {
                Some(previous) => {
                    self.publish_member_updated(ctx, &outcome.group, &outcome.member, Some(previous))
                }
                None => {
                    info!(
                        organization_id = %id,
                        user_id = %user_id,
                        role = %role,
                        "Added organization member"
                    );
                    self.publisher.publish(
                        OrganizationEvent::MemberAdded {
                            organization_id: id,
                            organization_name: outcome.group.name.clone(),
                            member: outcome.member.clone(),
                            user_email: Some(user.email.clone()),
                            user_name: Some(user.display_name()),
                        },
                        ctx.correlation_id(),
                    );
                }
            }
            Ok(outcome.member)
        })
        .await
    }

    async fn update_member_role(
        &self,
        ctx: &OperationContext,
        id: OrganizationId,
        user_id: &UserId,
        role: OrganizationRole,
    ) -> Result<Member<OrganizationRole>, ServiceError> {
        ctx.run(self.settings.timeout, async {
            let outcome = self
                .organization_sync
                .change_role(id, &ctx.actor_id, user_id, role)
                .await?;
            self.publish_member_updated(ctx, &outcome.group, &outcome.member, outcome.previous_role);
            Ok(outcome.member)
        })
        .await
    }

    async fn remove_member(
        &self,
        ctx: &OperationContext,
        id: OrganizationId,
        user_id: &UserId,
    ) -> Result<(), ServiceError> {
        ctx.run(self.settings.timeout, async {
            let removal = self
                .organization_sync
                .remove_member(id, &ctx.actor_id, user_id)
                .await?;
            info!(organization_id = %id, user_id = %user_id, "Removed organization member");

            self.publisher.publish(
                OrganizationEvent::MemberRemoved {
                    organization_id: id,
                    organization_name: removal.group.name,
                    user_id: removal.removed.user_id,
                    removed_by: ctx.actor_id.clone(),
                    removed_at: Utc::now(),
                },
                ctx.correlation_id(),
            );
            Ok(())
        })
        .await
    }

    async fn list_organization_teams(
        &self,
        ctx: &OperationContext,
        id: OrganizationId,
        page: Page,
    ) -> Result<Paged<Team>, ServiceError> {
        ctx.run(self.settings.timeout, async {
            let organization = self.organization_sync.load(id).await?;
            if !organization.members.contains(&ctx.actor_id) {
                return Err(ServiceError::PermissionDenied(PolicyDenial::NotAMember));
            }
            Ok(self.teams.list_by_organization(id, page).await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::application::context::OperationContext;
    use crate::application::error::ServiceError;
    use crate::application::testing::Harness;
    use crate::domain::membership::OrganizationRole;
    use crate::domain::organization::{NewOrganization, OrganizationUpdate};
    use crate::domain::pagination::Page;
    use crate::domain::policy::PolicyDenial;
    use crate::domain::repository::UserRepository;
    use crate::domain::user::{UserId, UserRole};

    fn acme() -> NewOrganization {
        NewOrganization {
            name: "  Acme ".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_creator_becomes_owner() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        h.drain_user_events().await;
        let ctx = OperationContext::new("alice").with_correlation_id("req-1");

        let org = h.services.organizations.create_organization(&ctx, acme()).await.unwrap();
        assert_eq!(org.name, "Acme");
        assert_eq!(org.members.role_of(&UserId::new("alice")), Some(OrganizationRole::Owner));

        let alice = h.repos.users.find_by_id(&UserId::new("alice")).await.unwrap().unwrap();
        assert!(alice.organization_ids.contains(&org.id));

        let event = h.next_user_event().await;
        assert_eq!(event.event_type, "organization.created");
        assert_eq!(event.correlation_id.as_deref(), Some("req-1"));
        assert_eq!(event.subject, Some(org.id.to_string()));

        let dup = h
            .services
            .organizations
            .create_organization(&ctx, acme())
            .await
            .unwrap_err();
        assert_eq!(dup.reason(), "conflict");
    }

    #[tokio::test]
    async fn test_unknown_creator_is_rejected() {
        let h = Harness::new();
        let err = h
            .services
            .organizations
            .create_organization(&OperationContext::new("ghost"), acme())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "validation_failure");
    }

    #[tokio::test]
    async fn test_add_member_twice_updates_role_in_place() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        h.seed_user("bob", UserRole::User).await;
        let ctx = OperationContext::new("alice");
        let org = h.services.organizations.create_organization(&ctx, acme()).await.unwrap();
        h.drain_user_events().await;
        let bob = UserId::new("bob");

        h.services
            .organizations
            .add_member(&ctx, org.id, &bob, OrganizationRole::Member)
            .await
            .unwrap();
        let member = h
            .services
            .organizations
            .add_member(&ctx, org.id, &bob, OrganizationRole::Admin)
            .await
            .unwrap();
        assert_eq!(member.role, OrganizationRole::Admin);

        let stored = h.repos.organizations.find_by_id(org.id).await.unwrap().unwrap();
        assert_eq!(stored.members.len(), 2);

        let added = h.next_user_event().await;
        assert_eq!(added.event_type, "organization.member.added");
        assert_eq!(added.data["userEmail"], "bob@example.com");
        let updated = h.next_user_event().await;
        assert_eq!(updated.event_type, "organization.member.updated");
        assert_eq!(updated.data["previousRole"], "member");
    }

    #[tokio::test]
    async fn test_add_unknown_or_deleted_user_is_not_found() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        h.seed_user("gone", UserRole::User).await;
        let ctx = OperationContext::new("alice");
        let org = h.services.organizations.create_organization(&ctx, acme()).await.unwrap();
        h.services
            .users
            .delete_user(&OperationContext::new("gone"), &UserId::new("gone"))
            .await
            .unwrap();

        for target in ["ghost", "gone"] {
            let err = h
                .services
                .organizations
                .add_member(&ctx, org.id, &UserId::new(target), OrganizationRole::Member)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::NotFound { entity: "user", .. }));
        }
    }

    #[tokio::test]
    async fn test_outsider_add_is_denied_before_target_lookup() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        h.seed_user("mallory", UserRole::User).await;
        let org = h
            .services
            .organizations
            .create_organization(&OperationContext::new("alice"), acme())
            .await
            .unwrap();

        let err = h
            .services
            .organizations
            .add_member(
                &OperationContext::new("mallory"),
                org.id,
                &UserId::new("ghost"),
                OrganizationRole::Member,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(PolicyDenial::NotAMember)));
    }

    #[tokio::test]
    async fn test_deleted_creator_is_rejected() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        let alice = OperationContext::new("alice");
        h.services.users.delete_user(&alice, &UserId::new("alice")).await.unwrap();

        let err = h
            .services
            .organizations
            .create_organization(&alice, acme())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "validation_failure");
    }

    #[tokio::test]
    async fn test_update_checks_policy_and_name() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        h.seed_user("bob", UserRole::User).await;
        let alice = OperationContext::new("alice");
        let org = h.services.organizations.create_organization(&alice, acme()).await.unwrap();
        h.services
            .organizations
            .create_organization(
                &alice,
                NewOrganization {
                    name: "Globex".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        h.services
            .organizations
            .add_member(&alice, org.id, &UserId::new("bob"), OrganizationRole::Member)
            .await
            .unwrap();

        let rename = |name: &str| OrganizationUpdate {
            name: Some(name.to_string()),
            ..Default::default()
        };
        let denied = h
            .services
            .organizations
            .update_organization(&OperationContext::new("bob"), org.id, rename("Bobco"))
            .await
            .unwrap_err();
        assert_eq!(denied.reason(), "insufficient_role");

        let taken = h
            .services
            .organizations
            .update_organization(&alice, org.id, rename("Globex"))
            .await
            .unwrap_err();
        assert_eq!(taken.reason(), "conflict");

        let renamed = h
            .services
            .organizations
            .update_organization(&alice, org.id, rename("Acme Corp"))
            .await
            .unwrap();
        assert_eq!(renamed.name, "Acme Corp");
        assert!(renamed.version > org.version);
    }

    #[tokio::test]
    async fn test_list_teams_requires_membership() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        h.seed_user("mallory", UserRole::User).await;
        let org = h
            .services
            .organizations
            .create_organization(&OperationContext::new("alice"), acme())
            .await
            .unwrap();

        let err = h
            .services
            .organizations
            .list_organization_teams(&OperationContext::new("mallory"), org.id, Page::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(PolicyDenial::NotAMember)));

        let teams = h
            .services
            .organizations
            .list_organization_teams(&OperationContext::new("alice"), org.id, Page::default())
            .await
            .unwrap();
        assert_eq!(teams.total, 0);

        let mine = h
            .services
            .organizations
            .list_user_organizations(&OperationContext::new("alice"), &UserId::new("alice"), Page::default())
            .await
            .unwrap();
        assert_eq!(mine.total, 1);
    }

    #[tokio::test]
    async fn test_delete_requires_owner() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        h.seed_user("bob", UserRole::User).await;
        let alice = OperationContext::new("alice");
        let org = h.services.organizations.create_organization(&alice, acme()).await.unwrap();
        h.services
            .organizations
            .add_member(&alice, org.id, &UserId::new("bob"), OrganizationRole::Admin)
            .await
            .unwrap();

        let err = h
            .services
            .organizations
            .delete_organization(&OperationContext::new("bob"), org.id)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "insufficient_role");
        assert!(h.repos.organizations.find_by_id(org.id).await.unwrap().is_some());
    }
}
