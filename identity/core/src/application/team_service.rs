// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Team Service
//!
//! Facade over the Team aggregate. A team lives under exactly one
//! Organization: creation requires the parent to exist and the creator to
//! be one of its members, and only parent members can join a team.
//! The parent's `team_ids` list is maintained best-effort.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::context::{OperationContext, OperationSettings};
use crate::application::error::ServiceError;
use crate::application::publisher::EventPublisher;
use crate::application::synchronizer::MembershipSynchronizer;
use crate::domain::events::TeamEvent;
use crate::domain::membership::{Member, MembershipGroup, TeamRole};
use crate::domain::organization::OrganizationId;
use crate::domain::pagination::{Page, Paged};
use crate::domain::policy::{self, GroupAction};
use crate::domain::repository::{OrganizationRepository, TeamRepository, UserRepository};
use crate::domain::team::{NewTeam, Team, TeamId, TeamUpdate};
use crate::domain::user::UserId;

#[async_trait]
pub trait TeamService: Send + Sync {
    async fn create_team(&self, ctx: &OperationContext, input: NewTeam) -> Result<Team, ServiceError>;
    async fn get_team(&self, ctx: &OperationContext, id: TeamId) -> Result<Team, ServiceError>;
    async fn update_team(
        &self,
        ctx: &OperationContext,
        id: TeamId,
        update: TeamUpdate,
    ) -> Result<Team, ServiceError>;
    async fn delete_team(&self, ctx: &OperationContext, id: TeamId) -> Result<(), ServiceError>;
    async fn list_teams_by_organization(
        &self,
        ctx: &OperationContext,
        organization_id: OrganizationId,
        page: Page,
    ) -> Result<Paged<Team>, ServiceError>;
    async fn list_user_teams(
        &self,
        ctx: &OperationContext,
        user_id: &UserId,
        page: Page,
    ) -> Result<Paged<Team>, ServiceError>;
    async fn add_member(
        &self,
        ctx: &OperationContext,
        id: TeamId,
        user_id: &UserId,
        role: TeamRole,
    ) -> Result<Member<TeamRole>, ServiceError>;
    async fn update_member_role(
        &self,
        ctx: &OperationContext,
        id: TeamId,
        user_id: &UserId,
        role: TeamRole,
    ) -> Result<Member<TeamRole>, ServiceError>;
    async fn remove_member(&self, ctx: &OperationContext, id: TeamId, user_id: &UserId) -> Result<(), ServiceError>;
}

pub struct StandardTeamService {
    teams: Arc<dyn TeamRepository>,
    organizations: Arc<dyn OrganizationRepository>,
    users: Arc<dyn UserRepository>,
    sync: MembershipSynchronizer<Team>,
    publisher: EventPublisher,
    settings: OperationSettings,
}

impl StandardTeamService {
    pub fn new(
        teams: Arc<dyn TeamRepository>,
        organizations: Arc<dyn OrganizationRepository>,
        users: Arc<dyn UserRepository>,
        publisher: EventPublisher,
        settings: OperationSettings,
    ) -> Self {
        let sync = MembershipSynchronizer::new(teams.clone(), users.clone(), settings.max_update_attempts);
        Self {
            teams,
            organizations,
            users,
            sync,
            publisher,
            settings,
        }
    }

    async fn ensure_name_free(
        &self,
        organization_id: OrganizationId,
        name: &str,
        except: Option<TeamId>,
    ) -> Result<(), ServiceError> {
        match self.teams.find_by_name(organization_id, name).await? {
            Some(existing) if Some(existing.id) != except => Err(ServiceError::Conflict(format!(
                "team name '{}' is taken in organization {}",
                name, organization_id
            ))),
            _ => Ok(()),
        }
    }

    async fn detach_from_parent(&self, team: &Team) {
        if let Err(e) = self.organizations.remove_team(team.organization_id, team.id).await {
            metrics::counter!("aegis_identity_reverse_ref_failures_total", "op" => "remove_team")
                .increment(1);
            warn!(
                team_id = %team.id,
                organization_id = %team.organization_id,
                error = %e,
                "Failed to remove team from organization"
            );
        }
    }

    fn publish_member_updated(
        &self,
        ctx: &OperationContext,
        team: &Team,
        member: &Member<TeamRole>,
        previous_role: Option<TeamRole>,
    ) {
        self.publisher.publish(
            TeamEvent::MemberUpdated {
                team_id: team.id,
                team_name: team.name.clone(),
                user_id: member.user_id.clone(),
                role: member.role,
                previous_role,
                updated_by: ctx.actor_id.clone(),
                updated_at: team.updated_at,
            },
            ctx.correlation_id(),
        );
    }
}

#[async_trait]
impl TeamService for StandardTeamService {
    async fn create_team(&self, ctx: &OperationContext, mut input: NewTeam) -> Result<Team, ServiceError> {
        ctx.run(self.settings.timeout, async {
            input.name = input.name.trim().to_string();
            if input.name.is_empty() {
                return Err(ServiceError::validation("team name must not be empty"));
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

            let organization = self
                .organizations
                .find_by_id(input.organization_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::validation(format!(
                        "organization {} does not exist",
                        input.organization_id
                    ))
                })?;
            if !organization.settings.features.enable_teams {
                return Err(ServiceError::validation(format!(
                    "teams are disabled for organization {}",
                    organization.id
                )));
            }
            if !organization.members.contains(&ctx.actor_id) {
                return Err(ServiceError::validation(format!(
                    "{} is not a member of organization {}",
                    ctx.actor_id, organization.id
                )));
            }
            self.ensure_name_free(organization.id, &input.name, None).await?;

            let team = Team::new(input, ctx.actor_id.clone(), Utc::now());
            let stored = self.teams.create(&team).await?;
            info!(
                team_id = %stored.id,
                organization_id = %stored.organization_id,
                name = %stored.name,
                created_by = %ctx.actor_id,
                "Created team"
            );

            if let Err(e) = self.organizations.add_team(organization.id, stored.id).await {
                metrics::counter!("aegis_identity_reverse_ref_failures_total", "op" => "add_team")
                    .increment(1);
                warn!(
                    team_id = %stored.id,
                    organization_id = %organization.id,
                    error = %e,
                    "Failed to add team to organization"
                );
            }
            self.sync.link(&ctx.actor_id, stored.group_ref()).await;

            self.publisher.publish(
                TeamEvent::TeamCreated {
                    team: stored.clone(),
                },
                ctx.correlation_id(),
            );
            Ok(stored)
        })
        .await
    }

    async fn get_team(&self, ctx: &OperationContext, id: TeamId) -> Result<Team, ServiceError> {
        ctx.run(self.settings.timeout, self.sync.load(id)).await
    }

    async fn update_team(
        &self,
        ctx: &OperationContext,
        id: TeamId,
        mut update: TeamUpdate,
    ) -> Result<Team, ServiceError> {
        ctx.run(self.settings.timeout, async {
            if let Some(name) = update.name.as_mut() {
                *name = name.trim().to_string();
                if name.is_empty() {
                    return Err(ServiceError::validation("team name must not be empty"));
                }
                let current = self.sync.load(id).await?;
                self.ensure_name_free(current.organization_id, name, Some(id)).await?;
            }

            let stored = self
                .sync
                .update_group(id, &ctx.actor_id, GroupAction::UpdateSettings, |team, now| {
                    team.apply_update(update.clone(), now);
                    Ok(())
                })
                .await?;

            self.publisher.publish(
                TeamEvent::TeamUpdated {
                    team: stored.clone(),
                    updated_by: ctx.actor_id.clone(),
                },
                ctx.correlation_id(),
            );
            Ok(stored)
        })
        .await
    }

    async fn delete_team(&self, ctx: &OperationContext, id: TeamId) -> Result<(), ServiceError> {
        ctx.run(self.settings.timeout, async {
            let team = self.sync.load(id).await?;
            policy::authorize(team.members(), &ctx.actor_id, &GroupAction::DeleteGroup)
                .map_err(|denial| ServiceError::denied(denial, None))?;

            self.sync.delete_group(&team).await?;
            self.detach_from_parent(&team).await;
            info!(team_id = %id, organization_id = %team.organization_id, "Deleted team");

            self.publisher.publish(
                TeamEvent::TeamDeleted {
                    team_id: id,
                    organization_id: team.organization_id,
                    name: team.name,
                    deleted_by: ctx.actor_id.clone(),
                    deleted_at: Utc::now(),
                },
                ctx.correlation_id(),
            );
            Ok(())
        })
        .await
    }

    async fn list_teams_by_organization(
        &self,
        ctx: &OperationContext,
        organization_id: OrganizationId,
        page: Page,
    ) -> Result<Paged<Team>, ServiceError> {
        ctx.run(self.settings.timeout, async {
            Ok(self.teams.list_by_organization(organization_id, page).await?)
        })
        .await
    }

    async fn list_user_teams(
        &self,
        ctx: &OperationContext,
        user_id: &UserId,
        page: Page,
    ) -> Result<Paged<Team>, ServiceError> {
        ctx.run(self.settings.timeout, async {
            Ok(self.teams.list_by_member(user_id, page).await?)
        })
        .await
    }

    async fn add_member(
        &self,
        ctx: &OperationContext,
        id: TeamId,
        user_id: &UserId,
        role: TeamRole,
    ) -> Result<Member<TeamRole>, ServiceError> {
        ctx.run(self.settings.timeout, async {
            let team = self.sync.authorize_add(id, &ctx.actor_id, user_id, role).await?;
            match self.users.find_by_id(user_id).await? {
                Some(user) if !user.is_deleted() => {}
                _ => return Err(ServiceError::not_found("user", user_id)),
            }
            let parent_member = self
                .organizations
                .find_by_id(team.organization_id)
                .await?
                .is_some_and(|organization| organization.members.contains(user_id));
            if !parent_member {
                return Err(ServiceError::validation(format!(
                    "{} is not a member of organization {}",
                    user_id, team.organization_id
                )));
            }

            let outcome = self.sync.add_member(id, &ctx.actor_id, user_id, role).await?;
            match outcome.previous_role {
                Some(previous) => {
                    self.publish_member_updated(ctx, &outcome.group, &outcome.member, Some(previous))
                }
                None => {
                    info!(team_id = %id, user_id = %user_id, role = %role, "Added team member");
                    self.publisher.publish(
                        TeamEvent::MemberAdded {
                            team_id: id,
                            team_name: outcome.group.name.clone(),
                            organization_id: outcome.group.organization_id,
                            member: outcome.member.clone(),
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
        id: TeamId,
        user_id: &UserId,
        role: TeamRole,
    ) -> Result<Member<TeamRole>, ServiceError> {
        ctx.run(self.settings.timeout, async {
            let outcome = self.sync.change_role(id, &ctx.actor_id, user_id, role).await?;
            self.publish_member_updated(ctx, &outcome.group, &outcome.member, outcome.previous_role);
            Ok(outcome.member)
        })
        .await
    }

    async fn remove_member(&self, ctx: &OperationContext, id: TeamId, user_id: &UserId) -> Result<(), ServiceError> {
        ctx.run(self.settings.timeout, async {
            let removal = self.sync.remove_member(id, &ctx.actor_id, user_id).await?;
            info!(team_id = %id, user_id = %user_id, "Removed team member");

            self.publisher.publish(
                TeamEvent::MemberRemoved {
                    team_id: id,
                    team_name: removal.group.name,
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
}
