// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! User Service
//!
//! Facade over the User aggregate. Users are soft-deleted: `delete_user`
//! flips the status to Inactive and stamps `deleted_at`, the record stays
//! readable. Membership in groups is untouched by account status changes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::context::{OperationContext, OperationSettings};
use crate::application::error::ServiceError;
use crate::application::publisher::EventPublisher;
use crate::application::reconciler::ReferenceReconciler;
use crate::domain::events::UserEvent;
use crate::domain::pagination::{Page, Paged};
use crate::domain::policy::{self, AccountAction};
use crate::domain::repository::{RepositoryError, UserRepository};
use crate::domain::user::{NewUser, User, UserId, UserUpdate};

#[async_trait]
pub trait UserService: Send + Sync {
    async fn create_user(&self, ctx: &OperationContext, input: NewUser) -> Result<User, ServiceError>;
    async fn get_user(&self, ctx: &OperationContext, id: &UserId) -> Result<User, ServiceError>;
    async fn get_user_by_email(&self, ctx: &OperationContext, email: &str) -> Result<User, ServiceError>;
    async fn update_user(
        &self,
        ctx: &OperationContext,
        id: &UserId,
        update: UserUpdate,
    ) -> Result<User, ServiceError>;
    async fn activate_user(&self, ctx: &OperationContext, id: &UserId) -> Result<User, ServiceError>;
    async fn deactivate_user(&self, ctx: &OperationContext, id: &UserId) -> Result<User, ServiceError>;
    async fn delete_user(&self, ctx: &OperationContext, id: &UserId) -> Result<(), ServiceError>;
    async fn record_login(&self, ctx: &OperationContext, id: &UserId) -> Result<User, ServiceError>;
    async fn list_users(
        &self,
        ctx: &OperationContext,
        page: Page,
        search: Option<&str>,
    ) -> Result<Paged<User>, ServiceError>;
}

pub struct StandardUserService {
    users: Arc<dyn UserRepository>,
    reconciler: Arc<ReferenceReconciler>,
    publisher: EventPublisher,
    settings: OperationSettings,
}

impl StandardUserService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        reconciler: Arc<ReferenceReconciler>,
        publisher: EventPublisher,
        settings: OperationSettings,
    ) -> Self {
        Self {
            users,
            reconciler,
            publisher,
            settings,
        }
    }

    async fn load(&self, id: &UserId) -> Result<User, ServiceError> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("user", id))
    }

    async fn check_account(
        &self,
        ctx: &OperationContext,
        target: &UserId,
        action: AccountAction,
    ) -> Result<(), ServiceError> {
        let actor_is_admin = match self.users.find_by_id(&ctx.actor_id).await? {
            Some(actor) => actor.is_platform_admin() && !actor.is_deleted(),
            None => false,
        };
        policy::authorize_account(&ctx.actor_id, actor_is_admin, target, action)
            .map_err(ServiceError::PermissionDenied)
    }

    /// Read-modify-write with version-conflict retry. `change` returns
    /// `false` when there is nothing to write.
    async fn modify<F>(&self, id: &UserId, mut change: F) -> Result<(User, bool), ServiceError>
    where
        F: FnMut(&mut User, DateTime<Utc>) -> bool + Send,
    {
        let mut attempt = 1;
        loop {
            let mut user = self.load(id).await?;
            if !change(&mut user, Utc::now()) {
                return Ok((user, false));
            }
            match self.users.update(&user).await {
                Ok(stored) => return Ok((stored, true)),
                Err(RepositoryError::VersionConflict { .. })
                    if attempt < self.settings.max_update_attempts =>
                {
                    metrics::counter!("aegis_identity_update_retries_total", "aggregate" => "user")
                        .increment(1);
                    debug!(user_id = %id, attempt, "Concurrent user modification, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn validate_new_user(input: &NewUser) -> Result<(), ServiceError> {
    if input.user_id.as_str().trim().is_empty() {
        return Err(ServiceError::validation("user id must not be empty"));
    }
    let email = input.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ServiceError::validation(format!(
            "'{}' is not a valid email address",
            input.email
        )));
    }
    Ok(())
}

#[async_trait]
impl UserService for StandardUserService {
    async fn create_user(&self, ctx: &OperationContext, input: NewUser) -> Result<User, ServiceError> {
        ctx.run(self.settings.timeout, async {
            validate_new_user(&input)?;
            if self.users.find_by_id(&input.user_id).await?.is_some() {
                return Err(ServiceError::Conflict(format!(
                    "user {} already exists",
                    input.user_id
                )));
            }
            if self.users.find_by_email(input.email.trim()).await?.is_some() {
                return Err(ServiceError::Conflict(format!(
                    "email {} is already registered",
                    input.email
                )));
            }

            let user = User::new(input, Utc::now());
            let stored = self.users.create(&user).await?;
            info!(user_id = %stored.user_id, email = %stored.email, "Created user");

            self.publisher.publish(
                UserEvent::UserCreated {
                    user: stored.clone(),
                },
                ctx.correlation_id(),
            );
            Ok(stored)
        })
        .await
    }

    async fn get_user(&self, ctx: &OperationContext, id: &UserId) -> Result<User, ServiceError> {
        ctx.run(self.settings.timeout, async {
            let user = self.load(id).await?;
            match self.reconciler.reconcile_user(id).await {
                Ok(report) if report.is_clean() => Ok(user),
                Ok(_) => self.load(id).await,
                Err(e) => {
                    warn!(user_id = %id, error = %e, "Reverse reference reconciliation failed");
                    Ok(user)
                }
            }
        })
        .await
    }

    async fn get_user_by_email(&self, ctx: &OperationContext, email: &str) -> Result<User, ServiceError> {
        ctx.run(self.settings.timeout, async {
            if email.trim().is_empty() {
                return Err(ServiceError::validation("email must not be empty"));
            }
            self.users
                .find_by_email(email.trim())
                .await?
                .ok_or_else(|| ServiceError::not_found("user", email))
        })
        .await
    }

    async fn update_user(
        &self,
        ctx: &OperationContext,
        id: &UserId,
        update: UserUpdate,
    ) -> Result<User, ServiceError> {
        ctx.run(self.settings.timeout, async {
            if update.is_empty() {
                return Err(ServiceError::validation("no fields to update"));
            }
            self.check_account(ctx, id, AccountAction::UpdateProfile).await?;

            let (stored, _) = self
                .modify(id, |user, now| {
                    user.apply_update(update.clone(), now);
                    true
                })
                .await?;
            debug!(user_id = %id, version = stored.version, "Updated user profile");

            self.publisher.publish(
                UserEvent::UserUpdated {
                    user: stored.clone(),
                    updated_by: ctx.actor_id.clone(),
                },
                ctx.correlation_id(),
            );
            Ok(stored)
        })
        .await
    }

    async fn activate_user(&self, ctx: &OperationContext, id: &UserId) -> Result<User, ServiceError> {
        ctx.run(self.settings.timeout, async {
            self.check_account(ctx, id, AccountAction::Activate).await?;
            let (stored, _) = self
                .modify(id, |user, now| {
                    user.activate(now);
                    true
                })
                .await?;
            info!(user_id = %id, activated_by = %ctx.actor_id, "Activated user");

            self.publisher.publish(
                UserEvent::UserActivated {
                    user_id: id.clone(),
                    activated_by: ctx.actor_id.clone(),
                    activated_at: stored.updated_at,
                },
                ctx.correlation_id(),
            );
            Ok(stored)
        })
        .await
    }

    async fn deactivate_user(&self, ctx: &OperationContext, id: &UserId) -> Result<User, ServiceError> {
        ctx.run(self.settings.timeout, async {
            self.check_account(ctx, id, AccountAction::Deactivate).await?;
            let (stored, _) = self
                .modify(id, |user, now| {
                    user.deactivate(now);
                    true
                })
                .await?;
            info!(user_id = %id, deactivated_by = %ctx.actor_id, "Deactivated user");

            self.publisher.publish(
                UserEvent::UserDeactivated {
                    user_id: id.clone(),
                    deactivated_by: ctx.actor_id.clone(),
                    deactivated_at: stored.updated_at,
                },
                ctx.correlation_id(),
            );
            Ok(stored)
        })
        .await
    }

    async fn delete_user(&self, ctx: &OperationContext, id: &UserId) -> Result<(), ServiceError> {
        ctx.run(self.settings.timeout, async {
            self.check_account(ctx, id, AccountAction::Delete).await?;
            let (stored, changed) = self
                .modify(id, |user, now| {
                    if user.is_deleted() {
                        return false;
                    }
                    user.mark_deleted(now);
                    true
                })
                .await?;

            // Repeated deletes succeed without a second event.
            if !changed {
                debug!(user_id = %id, "User already deleted");
                return Ok(());
            }
            info!(user_id = %id, deleted_by = %ctx.actor_id, "Soft-deleted user");

            self.publisher.publish(
                UserEvent::UserDeleted {
                    user_id: id.clone(),
                    deleted_by: ctx.actor_id.clone(),
                    deleted_at: stored.deleted_at.unwrap_or(stored.updated_at),
                },
                ctx.correlation_id(),
            );
            Ok(())
        })
        .await
    }

    async fn record_login(&self, ctx: &OperationContext, id: &UserId) -> Result<User, ServiceError> {
        ctx.run(self.settings.timeout, async {
            self.check_account(ctx, id, AccountAction::UpdateProfile).await?;
            let (stored, _) = self
                .modify(id, |user, now| {
                    user.record_login(now);
                    true
                })
                .await?;
            Ok(stored)
        })
        .await
    }

    async fn list_users(
        &self,
        ctx: &OperationContext,
        page: Page,
        search: Option<&str>,
    ) -> Result<Paged<User>, ServiceError> {
        ctx.run(self.settings.timeout, async {
            let search = search.map(str::trim).filter(|s| !s.is_empty());
            Ok(self.users.list(page, search).await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::application::context::OperationContext;
    use crate::application::testing::Harness;
    use crate::domain::membership::GroupRef;
    use crate::domain::organization::OrganizationId;
    use crate::domain::pagination::Page;
    use crate::domain::user::{UserId, UserRole, UserStatus, UserUpdate};

    #[tokio::test]
    async fn test_create_user_rejects_duplicates() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;

        let ctx = OperationContext::new("alice");
        let dup_id = h
            .services
            .users
            .create_user(&ctx, Harness::new_user("alice", UserRole::User))
            .await
            .unwrap_err();
        assert_eq!(dup_id.reason(), "conflict");

        let mut dup_email = Harness::new_user("alice2", UserRole::User);
        dup_email.email = "alice@example.com".into();
        let err = h.services.users.create_user(&ctx, dup_email).await.unwrap_err();
        assert_eq!(err.reason(), "conflict");

        let created = h.next_user_event().await;
        assert_eq!(created.event_type, "user.created");
        assert!(h.no_pending_user_events().await);
    }

    #[tokio::test]
    async fn test_invalid_email_is_rejected() {
        let h = Harness::new();
        let mut input = Harness::new_user("bob", UserRole::User);
        input.email = "not-an-address".into();
        let err = h
            .services
            .users
            .create_user(&OperationContext::new("bob"), input)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "validation_failure");
    }

    #[tokio::test]
    async fn test_update_requires_self_or_platform_admin() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        h.seed_user("bob", UserRole::User).await;
        h.seed_user("root", UserRole::Admin).await;
        h.drain_user_events().await;

        let update = UserUpdate {
            bio: Some("hello".into()),
            ..Default::default()
        };
        let alice = UserId::new("alice");

        let denied = h
            .services
            .users
            .update_user(&OperationContext::new("bob"), &alice, update.clone())
            .await
            .unwrap_err();
        assert_eq!(denied.reason(), "not_account_owner");

        let own = h
            .services
            .users
            .update_user(&OperationContext::new("alice"), &alice, update.clone())
            .await
            .unwrap();
        assert_eq!(own.bio.as_deref(), Some("hello"));

        assert!(h
            .services
            .users
            .update_user(&OperationContext::new("root"), &alice, update)
            .await
            .is_ok());

        assert_eq!(h.next_user_event().await.event_type, "user.updated");
        assert_eq!(h.next_user_event().await.event_type, "user.updated");
    }

    #[tokio::test]
    async fn test_status_changes_need_platform_admin() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        h.seed_user("root", UserRole::Admin).await;
        h.drain_user_events().await;
        let alice = UserId::new("alice");

        let err = h
            .services
            .users
            .deactivate_user(&OperationContext::new("alice"), &alice)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "platform_admin_required");

        let root = OperationContext::new("root");
        let inactive = h.services.users.deactivate_user(&root, &alice).await.unwrap();
        assert_eq!(inactive.status, UserStatus::Inactive);
        let active = h.services.users.activate_user(&root, &alice).await.unwrap();
        assert_eq!(active.status, UserStatus::Active);

        assert_eq!(h.next_user_event().await.event_type, "user.deactivated");
        assert_eq!(h.next_user_event().await.event_type, "user.activated");
    }

    #[tokio::test]
    async fn test_delete_is_soft_and_idempotent() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        h.drain_user_events().await;
        let ctx = OperationContext::new("alice");
        let alice = UserId::new("alice");

        h.services.users.delete_user(&ctx, &alice).await.unwrap();
        h.services.users.delete_user(&ctx, &alice).await.unwrap();

        let stored = h.services.users.get_user(&ctx, &alice).await.unwrap();
        assert!(stored.is_deleted());
        assert_eq!(stored.status, UserStatus::Inactive);

        let deleted = h.next_user_event().await;
        assert_eq!(deleted.event_type, "user.deleted");
        assert!(h.no_pending_user_events().await);
    }

    #[tokio::test]
    async fn test_get_user_repairs_reverse_references() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        let alice = UserId::new("alice");
        let phantom = GroupRef::Organization(OrganizationId::new());
        h.repos.users.add_group_ref(&alice, phantom).await.unwrap();

        let user = h
            .services
            .users
            .get_user(&OperationContext::new("alice"), &alice)
            .await
            .unwrap();
        assert!(!user.has_group_ref(&phantom));
    }

    #[tokio::test]
    async fn test_list_and_lookup_by_email() {
        let mut h = Harness::new();
        h.seed_user("alice", UserRole::User).await;
        h.seed_user("bob", UserRole::User).await;
        let ctx = OperationContext::new("alice");

        let found = h
            .services
            .users
            .get_user_by_email(&ctx, "BOB@example.com")
            .await
            .unwrap();
        assert_eq!(found.user_id, UserId::new("bob"));

        let listed = h
            .services
            .users
            .list_users(&ctx, Page::new(1, 1), Some("example"))
            .await
            .unwrap();
        assert_eq!(listed.total, 2);
        assert_eq!(listed.items.len(), 1);
        assert!(listed.has_more());

        let login = h.services.users.record_login(&ctx, &UserId::new("alice")).await.unwrap();
        assert!(login.last_login.is_some());
    }
}
