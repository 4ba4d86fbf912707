// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Role Policy Engine
//!
//! Pure authorization rules for membership groups. No I/O, no clock: given
//! the current member list, the acting user and the requested action,
//! [`authorize`] either allows the action or returns the specific rule that
//! denies it.
//!
//! Organizations (Owner/Admin/Member) and Teams (Owner/Admin/Member/Viewer)
//! share the same rules through [`MemberRole`].
//!
//! | Action | Requirement |
//! |--------|-------------|
//! | `AddMember` (new user) | actor Owner or Admin; granting Owner needs Owner |
//! | `AddMember` (existing user) | evaluated as `ChangeRole` |
//! | `UpdateSettings` | actor Owner or Admin |
//! | `DeleteGroup` | actor Owner |
//! | `ChangeRole` | actor Owner or Admin; touching an Owner or granting Owner needs Owner |
//! | `RemoveMember` | actor Owner, or actor is target, or Admin removing a non-Owner |
//!
//! Demoting or removing the only Owner is always denied, for every actor.
//! That check runs before the role checks.

use thiserror::Error;

use crate::domain::membership::{MemberRole, Members};
use crate::domain::user::UserId;

/// Action requested against a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupAction<R> {
    AddMember { target: UserId, role: R },
    ChangeRole { target: UserId, new_role: R },
    RemoveMember { target: UserId },
    UpdateSettings,
    DeleteGroup,
}

impl<R> GroupAction<R> {
    pub fn name(&self) -> &'static str {
        match self {
            GroupAction::AddMember { .. } => "add_member",
            GroupAction::ChangeRole { .. } => "change_role",
            GroupAction::RemoveMember { .. } => "remove_member",
            GroupAction::UpdateSettings => "update_settings",
            GroupAction::DeleteGroup => "delete_group",
        }
    }
}

/// Reason an action was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyDenial {
    #[error("actor is not a member of the group")]
    NotAMember,

    #[error("{action} requires the {required} role")]
    InsufficientRole {
        action: &'static str,
        required: &'static str,
    },

    #[error("only an owner may change the role of an owner")]
    OwnerRoleChangeRequiresOwner,

    #[error("only an owner may grant the owner role")]
    OwnerGrantRequiresOwner,

    #[error("an owner can only be removed by an owner or by themselves")]
    CannotRemoveOwner,

    #[error("cannot demote the last owner of the group")]
    LastOwnerDemotion,

    #[error("cannot remove the last owner of the group")]
    LastOwnerRemoval,

    #[error("target user is not a member of the group")]
    TargetNotMember,

    #[error("only the account holder or a platform admin may do this")]
    NotAccountOwner,

    #[error("platform admin role required")]
    PlatformAdminRequired,
}

impl PolicyDenial {
    /// Stable machine-readable code.
    pub fn reason(&self) -> &'static str {
        match self {
            PolicyDenial::NotAMember => "not_a_member",
            PolicyDenial::InsufficientRole { .. } => "insufficient_role",
            PolicyDenial::OwnerRoleChangeRequiresOwner => "owner_role_change_requires_owner",
            PolicyDenial::OwnerGrantRequiresOwner => "owner_grant_requires_owner",
            PolicyDenial::CannotRemoveOwner => "cannot_remove_owner",
            PolicyDenial::LastOwnerDemotion => "last_owner_demotion",
            PolicyDenial::LastOwnerRemoval => "last_owner_removal",
            PolicyDenial::TargetNotMember => "target_not_member",
            PolicyDenial::NotAccountOwner => "not_account_owner",
            PolicyDenial::PlatformAdminRequired => "platform_admin_required",
        }
    }

    /// Denials that protect the at-least-one-Owner invariant.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            PolicyDenial::LastOwnerDemotion | PolicyDenial::LastOwnerRemoval
        )
    }
}

/// Decide whether `actor` may perform `action` on a group with `members`.
pub fn authorize<R: MemberRole>(
    members: &Members<R>,
    actor: &UserId,
    action: &GroupAction<R>,
) -> Result<(), PolicyDenial> {
    let actor_role = members.role_of(actor).ok_or(PolicyDenial::NotAMember)?;

    match action {
        GroupAction::UpdateSettings => require_manager(actor_role, action),
        GroupAction::DeleteGroup => {
            if actor_role.is_owner() {
                Ok(())
            } else {
                Err(PolicyDenial::InsufficientRole {
                    action: action.name(),
                    required: "owner",
                })
            }
        }
        GroupAction::AddMember { target, role } => match members.role_of(target) {
            Some(current) => check_role_change(members, actor_role, current, *role, action),
            None => {
                require_manager(actor_role, action)?;
                if role.is_owner() && !actor_role.is_owner() {
                    return Err(PolicyDenial::OwnerGrantRequiresOwner);
                }
                Ok(())
            }
        },
        GroupAction::ChangeRole { target, new_role } => {
            let current = members
                .role_of(target)
                .ok_or(PolicyDenial::TargetNotMember)?;
            check_role_change(members, actor_role, current, *new_role, action)
        }
        GroupAction::RemoveMember { target } => {
            let current = members
                .role_of(target)
                .ok_or(PolicyDenial::TargetNotMember)?;

            if current.is_owner() && members.owner_count() <= 1 {
                return Err(PolicyDenial::LastOwnerRemoval);
            }

            let self_removal = actor == target;
            if actor_role.is_owner() || self_removal {
                return Ok(());
            }
            if actor_role.is_admin() {
                return if current.is_owner() {
                    Err(PolicyDenial::CannotRemoveOwner)
                } else {
                    Ok(())
                };
            }
            Err(PolicyDenial::InsufficientRole {
                action: action.name(),
                required: "owner or admin",
            })
        }
    }
}

/// Action requested against a User account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountAction {
    UpdateProfile,
    Delete,
    Activate,
    Deactivate,
}

/// Account rules: the holder may edit or delete their own account, a
/// platform admin may do anything, and only a platform admin flips status.
pub fn authorize_account(
    actor: &UserId,
    actor_is_platform_admin: bool,
    target: &UserId,
    action: AccountAction,
) -> Result<(), PolicyDenial> {
    if actor_is_platform_admin {
        return Ok(());
    }
    match action {
        AccountAction::UpdateProfile | AccountAction::Delete if actor == target => Ok(()),
        AccountAction::UpdateProfile | AccountAction::Delete => Err(PolicyDenial::NotAccountOwner),
        AccountAction::Activate | AccountAction::Deactivate => {
            Err(PolicyDenial::PlatformAdminRequired)
        }
    }
}

fn require_manager<R: MemberRole>(
    actor_role: R,
    action: &GroupAction<R>,
) -> Result<(), PolicyDenial> {
    if actor_role.can_manage() {
        Ok(())
    } else {
        Err(PolicyDenial::InsufficientRole {
            action: action.name(),
            required: "owner or admin",
        })
    }
}

fn check_role_change<R: MemberRole>(
    members: &Members<R>,
    actor_role: R,
    current: R,
    new_role: R,
    action: &GroupAction<R>,
) -> Result<(), PolicyDenial> {
    if current.is_owner() && !new_role.is_owner() && members.owner_count() <= 1 {
        return Err(PolicyDenial::LastOwnerDemotion);
    }

    require_manager(actor_role, action)?;

    if current.is_owner() && !actor_role.is_owner() {
        return Err(PolicyDenial::OwnerRoleChangeRequiresOwner);
    }
    if new_role.is_owner() && !current.is_owner() && !actor_role.is_owner() {
        return Err(PolicyDenial::OwnerGrantRequiresOwner);
    }
    Ok(())
}
