// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # User Aggregate
//!
//! A `User` is created by the upstream identity provider (see
//! [`crate::application::identity_subscriber`]) or through the user facade and
//! is addressed by the identifier that provider assigned.
//!
//! The `organization_ids` / `team_ids` sets are denormalized reverse
//! references. They are derived from the membership lists held by
//! [`Organization`](crate::domain::organization::Organization) and
//! [`Team`](crate::domain::team::Team) and may lag or drift; the group
//! aggregates are always the source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::membership::GroupRef;
use crate::domain::organization::OrganizationId;
use crate::domain::team::TeamId;

// ============================================================================
// Value Objects
// ============================================================================

/// Identifier assigned to a user by the upstream identity service.
///
/// Opaque to this service: it is never parsed, only compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Platform-wide role. Unrelated to the roles a user holds inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Presenter,
    Admin,
}

impl UserRole {
    /// Lenient parse used for upstream payloads: unknown values fall back to `User`.
    pub fn from_upstream(value: &str) -> Self {
        match value {
            "admin" => UserRole::Admin,
            "presenter" => UserRole::Presenter,
            _ => UserRole::User,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
    Pending,
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Pending => "pending",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub email: bool,
    pub push: bool,
    pub in_app: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email: true,
            push: true,
            in_app: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyPreferences {
    pub show_profile_to_everyone: bool,
    pub show_email_to_everyone: bool,
}

impl Default for PrivacyPreferences {
    fn default() -> Self {
        Self {
            show_profile_to_everyone: true,
            show_email_to_everyone: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    pub language: String,
    pub theme: String,
    pub timezone: String,
    #[serde(default)]
    pub notifications: NotificationPreferences,
    #[serde(default)]
    pub privacy: PrivacyPreferences,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            theme: "light".to_string(),
            timezone: "UTC".to_string(),
            notifications: NotificationPreferences::default(),
            privacy: PrivacyPreferences::default(),
        }
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// Input for creating a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub user_id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub role: UserRole,
}

/// Partial profile update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub job_title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub profile_picture: Option<String>,
    pub social_links: Option<SocialLinks>,
    pub preferences: Option<UserPreferences>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        *self == UserUpdate::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub status: UserStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub social_links: SocialLinks,
    #[serde(default)]
    pub preferences: UserPreferences,
    #[serde(default)]
    pub organization_ids: BTreeSet<OrganizationId>,
    #[serde(default)]
    pub team_ids: BTreeSet<TeamId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, assigned by the store.
    #[serde(default)]
    pub version: u64,
}

impl User {
    /// New users start `Active` with default preferences and no group references.
    pub fn new(input: NewUser, now: DateTime<Utc>) -> Self {
        Self {
            user_id: input.user_id,
            email: input.email,
            first_name: input.first_name,
            last_name: input.last_name,
            role: input.role,
            status: UserStatus::Active,
            bio: None,
            job_title: None,
            company: None,
            location: None,
            profile_picture: None,
            social_links: SocialLinks::default(),
            preferences: UserPreferences::default(),
            organization_ids: BTreeSet::new(),
            team_ids: BTreeSet::new(),
            last_login: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: 0,
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_platform_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn apply_update(&mut self, update: UserUpdate, now: DateTime<Utc>) {
        if let Some(first_name) = update.first_name {
            self.first_name = first_name;
        }
        if let Some(last_name) = update.last_name {
            self.last_name = last_name;
        }
        if let Some(bio) = update.bio {
            self.bio = Some(bio);
        }
        if let Some(job_title) = update.job_title {
            self.job_title = Some(job_title);
        }
        if let Some(company) = update.company {
            self.company = Some(company);
        }
        if let Some(location) = update.location {
            self.location = Some(location);
        }
        if let Some(picture) = update.profile_picture {
            self.profile_picture = Some(picture);
        }
        if let Some(links) = update.social_links {
            self.social_links = links;
        }
        if let Some(preferences) = update.preferences {
            self.preferences = preferences;
        }
        self.updated_at = now;
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.status = UserStatus::Active;
        self.deleted_at = None;
        self.updated_at = now;
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.status = UserStatus::Inactive;
        self.updated_at = now;
    }

    /// Soft delete: the record is kept so membership references stay resolvable.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.status = UserStatus::Inactive;
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    pub fn record_login(&mut self, now: DateTime<Utc>) {
        self.last_login = Some(now);
        self.updated_at = now;
    }

    pub fn has_group_ref(&self, group: &GroupRef) -> bool {
        match group {
            GroupRef::Organization(id) => self.organization_ids.contains(id),
            GroupRef::Team(id) => self.team_ids.contains(id),
        }
    }

    /// Returns `true` if the reference was not already present.
    pub fn add_group_ref(&mut self, group: GroupRef) -> bool {
        match group {
            GroupRef::Organization(id) => self.organization_ids.insert(id),
            GroupRef::Team(id) => self.team_ids.insert(id),
        }
    }

    /// Returns `true` if the reference was present.
    pub fn remove_group_ref(&mut self, group: &GroupRef) -> bool {
        match group {
            GroupRef::Organization(id) => self.organization_ids.remove(id),
            GroupRef::Team(id) => self.team_ids.remove(id),
        }
    }

    /// Every group this user believes it belongs to.
    pub fn group_refs(&self) -> BTreeSet<GroupRef> {
        self.organization_ids
            .iter()
            .copied()
            .map(GroupRef::Organization)
            .chain(self.team_ids.iter().copied().map(GroupRef::Team))
            .collect()
    }

    /// Case-insensitive match on first name, last name or email.
    pub fn matches_search(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.first_name.to_lowercase().contains(&term)
            || self.last_name.to_lowercase().contains(&term)
            || self.email.to_lowercase().contains(&term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> User {
        User::new(
            NewUser {
                user_id: UserId::new("auth0|alice"),
                email: "alice@example.com".to_string(),
                first_name: "Alice".to_string(),
                last_name: "Liddell".to_string(),
                role: UserRole::User,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_new_user_defaults() {
        let user = sample();
        assert_eq!(user.status, UserStatus::Active);
        assert_eq!(user.preferences.language, "en");
        assert_eq!(user.preferences.theme, "light");
        assert_eq!(user.preferences.timezone, "UTC");
        assert!(user.preferences.notifications.in_app);
        assert!(user.preferences.privacy.show_profile_to_everyone);
        assert!(!user.preferences.privacy.show_email_to_everyone);
        assert!(user.organization_ids.is_empty());
        assert!(user.team_ids.is_empty());
    }

    #[test]
    fn test_group_refs_are_sets() {
        let mut user = sample();
        let org = GroupRef::Organization(OrganizationId::new());
        let team = GroupRef::Team(TeamId::new());

        assert!(user.add_group_ref(org));
        assert!(!user.add_group_ref(org));
        assert!(user.add_group_ref(team));
        assert_eq!(user.group_refs().len(), 2);

        assert!(user.remove_group_ref(&org));
        assert!(!user.remove_group_ref(&org));
        assert!(!user.has_group_ref(&org));
        assert!(user.has_group_ref(&team));
    }

    #[test]
    fn test_soft_delete_and_reactivate() {
        let mut user = sample();
        user.mark_deleted(Utc::now());
        assert_eq!(user.status, UserStatus::Inactive);
        assert!(user.is_deleted());

        user.activate(Utc::now());
        assert_eq!(user.status, UserStatus::Active);
        assert!(!user.is_deleted());
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let user = sample();
        assert!(user.matches_search("ALICE"));
        assert!(user.matches_search("liddell"));
        assert!(user.matches_search("example.COM"));
        assert!(!user.matches_search("bob"));
    }

    #[test]
    fn test_upstream_role_parse() {
        assert_eq!(UserRole::from_upstream("admin"), UserRole::Admin);
        assert_eq!(UserRole::from_upstream("presenter"), UserRole::Presenter);
        assert_eq!(UserRole::from_upstream("superuser"), UserRole::User);
    }
}
