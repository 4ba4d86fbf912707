// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Group Membership
//!
//! Membership entries never exist on their own: they are embedded in the
//! owning [`Organization`](crate::domain::organization::Organization) or
//! [`Team`](crate::domain::team::Team). Both group kinds share the same
//! shape, so the types here are generic over the group's role set.
//!
//! ## Invariants
//!
//! - At most one entry per `user_id` within a `Members` sequence.
//! - Insertion order is preserved; re-adding an existing user updates the
//!   entry in place.
//! - A role-only change keeps the original `joined_at` and `invited_by`.
//!
//! The at-least-one-Owner rule is *not* enforced here; that is the job of
//! [`crate::domain::policy`], which runs before any mutation.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

use crate::domain::organization::OrganizationId;
use crate::domain::team::TeamId;
use crate::domain::user::UserId;

/// Role set of a membership group.
pub trait MemberRole:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Highest privilege role. Every group must keep at least one.
    const OWNER: Self;

    fn is_admin(self) -> bool;

    fn as_str(self) -> &'static str;

    fn is_owner(self) -> bool {
        self == Self::OWNER
    }

    /// Owner or Admin.
    fn can_manage(self) -> bool {
        self.is_owner() || self.is_admin()
    }
}

/// Roles inside an Organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole for OrganizationRole {
    const OWNER: Self = OrganizationRole::Owner;

    fn is_admin(self) -> bool {
        self == OrganizationRole::Admin
    }

    fn as_str(self) -> &'static str {
        match self {
            OrganizationRole::Owner => "owner",
            OrganizationRole::Admin => "admin",
            OrganizationRole::Member => "member",
        }
    }
}

impl fmt::Display for OrganizationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roles inside a Team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl MemberRole for TeamRole {
    const OWNER: Self = TeamRole::Owner;

    fn is_admin(self) -> bool {
        self == TeamRole::Admin
    }

    fn as_str(self) -> &'static str {
        match self {
            TeamRole::Owner => "owner",
            TeamRole::Admin => "admin",
            TeamRole::Member => "member",
            TeamRole::Viewer => "viewer",
        }
    }
}

impl fmt::Display for TeamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `(user, role, joined_at, invited_by)` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member<R> {
    pub user_id: UserId,
    pub role: R,
    pub joined_at: DateTime<Utc>,
    pub invited_by: UserId,
}

/// Result of [`Members::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert<R> {
    Inserted,
    Updated { previous: R },
}

/// Insertion-ordered member list keyed by `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Members<R>(Vec<Member<R>>);

impl<R: MemberRole> Members<R> {
    /// Member list for a freshly created group: the creator as sole Owner.
    pub fn founded_by(creator: UserId, now: DateTime<Utc>) -> Self {
        Self(vec![Member {
            user_id: creator.clone(),
            role: R::OWNER,
            joined_at: now,
            invited_by: creator,
        }])
    }

    pub fn get(&self, user_id: &UserId) -> Option<&Member<R>> {
        self.0.iter().find(|m| &m.user_id == user_id)
    }

    pub fn role_of(&self, user_id: &UserId) -> Option<R> {
        self.get(user_id).map(|m| m.role)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.get(user_id).is_some()
    }

    pub fn owner_count(&self) -> usize {
        self.0.iter().filter(|m| m.role.is_owner()).count()
    }

    pub fn insert_or_update(
        &mut self,
        user_id: &UserId,
        role: R,
        invited_by: &UserId,
        now: DateTime<Utc>,
    ) -> Upsert<R> {
        if let Some(existing) = self.0.iter_mut().find(|m| &m.user_id == user_id) {
            let previous = existing.role;
            existing.role = role;
            return Upsert::Updated { previous };
        }

        self.0.push(Member {
            user_id: user_id.clone(),
            role,
            joined_at: now,
            invited_by: invited_by.clone(),
        });
        Upsert::Inserted
    }

    pub fn remove(&mut self, user_id: &UserId) -> Option<Member<R>> {
        let index = self.0.iter().position(|m| &m.user_id == user_id)?;
        Some(self.0.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member<R>> {
        self.0.iter()
    }

    pub fn user_ids(&self) -> impl Iterator<Item = &UserId> {
        self.0.iter().map(|m| &m.user_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Which kind of group an identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    Organization,
    Team,
}

impl GroupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupKind::Organization => "organization",
            GroupKind::Team => "team",
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed pointer to a group, as stored in a user's reverse-reference sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum GroupRef {
    Organization(OrganizationId),
    Team(TeamId),
}

impl GroupRef {
    pub fn kind(&self) -> GroupKind {
        match self {
            GroupRef::Organization(_) => GroupKind::Organization,
            GroupRef::Team(_) => GroupKind::Team,
        }
    }
}

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupRef::Organization(id) => write!(f, "organization:{}", id),
            GroupRef::Team(id) => write!(f, "team:{}", id),
        }
    }
}

/// Aggregate that owns a member list.
pub trait MembershipGroup: Clone + Send + Sync + 'static {
    type Id: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;
    type Role: MemberRole;

    const KIND: GroupKind;

    fn id(&self) -> Self::Id;

    fn name(&self) -> &str;

    fn group_ref(&self) -> GroupRef;

    fn members(&self) -> &Members<Self::Role>;

    fn members_mut(&mut self) -> &mut Members<Self::Role>;

    /// Advance `updated_at`.
    fn touch(&mut self, now: DateTime<Utc>);

    fn version(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_founded_by_creates_sole_owner() {
        let alice = UserId::new("alice");
        let members: Members<TeamRole> = Members::founded_by(alice.clone(), Utc::now());
        assert_eq!(members.len(), 1);
        assert_eq!(members.role_of(&alice), Some(TeamRole::Owner));
        assert_eq!(members.owner_count(), 1);
        assert_eq!(members.get(&alice).map(|m| &m.invited_by), Some(&alice));
    }

    #[test]
    fn test_upsert_updates_in_place_and_keeps_joined_at() {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let created = Utc::now();
        let mut members: Members<OrganizationRole> = Members::founded_by(alice.clone(), created);

        let first = members.insert_or_update(&bob, OrganizationRole::Member, &alice, created);
        assert_eq!(first, Upsert::Inserted);
        let joined_at = members.get(&bob).map(|m| m.joined_at);

        let later = created + chrono::Duration::minutes(5);
        let second = members.insert_or_update(&bob, OrganizationRole::Admin, &bob, later);
        assert_eq!(second, Upsert::Updated { previous: OrganizationRole::Member });

        assert_eq!(members.len(), 2);
        let entry = members.get(&bob).cloned();
        assert_eq!(entry.as_ref().map(|m| m.role), Some(OrganizationRole::Admin));
        assert_eq!(entry.as_ref().map(|m| m.joined_at), joined_at);
        assert_eq!(entry.map(|m| m.invited_by), Some(alice));
    }

    #[test]
    fn test_remove_preserves_order() {
        let now = Utc::now();
        let owner = UserId::new("owner");
        let mut members: Members<TeamRole> = Members::founded_by(owner.clone(), now);
        for name in ["a", "b", "c"] {
            members.insert_or_update(&UserId::new(name), TeamRole::Member, &owner, now);
        }

        let removed = members.remove(&UserId::new("b"));
        assert_eq!(removed.map(|m| m.user_id), Some(UserId::new("b")));
        assert!(members.remove(&UserId::new("b")).is_none());

        let order: Vec<&str> = members.user_ids().map(|u| u.as_str()).collect();
        assert_eq!(order, vec!["owner", "a", "c"]);
    }

    #[test]
    fn test_role_serialization_is_lowercase() {
        assert_eq!(serde_json::to_string(&TeamRole::Viewer).unwrap(), "\"viewer\"");
        assert_eq!(serde_json::to_string(&OrganizationRole::Owner).unwrap(), "\"owner\"");
        assert!(TeamRole::Owner.can_manage());
        assert!(TeamRole::Admin.can_manage());
        assert!(!TeamRole::Member.can_manage());
    }
}
