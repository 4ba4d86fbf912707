// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;

use crate::application::context::OperationSettings;
use crate::application::organization_service::{OrganizationService, StandardOrganizationService};
use crate::application::publisher::EventPublisher;
use crate::application::reconciler::ReferenceReconciler;
use crate::application::repository_factory::Repositories;
use crate::application::team_service::{StandardTeamService, TeamService};
use crate::application::user_service::{StandardUserService, UserService};

/// The three service facades wired against one set of repositories and one
/// publisher.
#[derive(Clone)]
pub struct IdentityServices {
    pub users: Arc<dyn UserService>,
    pub organizations: Arc<dyn OrganizationService>,
    pub teams: Arc<dyn TeamService>,
}

impl IdentityServices {
    pub fn new(repos: &Repositories, publisher: EventPublisher, settings: OperationSettings) -> Self {
        let reconciler = Arc::new(ReferenceReconciler::new(
            repos.users.clone(),
            repos.organizations.clone(),
            repos.teams.clone(),
        ));

        Self {
            users: Arc::new(StandardUserService::new(
                repos.users.clone(),
                reconciler,
                publisher.clone(),
                settings,
            )),
            organizations: Arc::new(StandardOrganizationService::new(
                repos.organizations.clone(),
                repos.teams.clone(),
                repos.users.clone(),
                publisher.clone(),
                settings,
            )),
            teams: Arc::new(StandardTeamService::new(
                repos.teams.clone(),
                repos.organizations.clone(),
                repos.users.clone(),
                publisher,
                settings,
            )),
        }
    }
}
