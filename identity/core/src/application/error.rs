// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Error taxonomy returned by every service facade method.
//!
//! Each variant carries a stable [`ServiceError::reason`] code so the HTTP
//! layer can pick a status code without re-deriving why the call failed.

use thiserror::Error;

use crate::domain::policy::PolicyDenial;
use crate::domain::repository::RepositoryError;
use crate::domain::user::UserId;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(PolicyDenial),

    #[error("Invariant violation: {0}")]
    InvariantViolation(PolicyDenial),

    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Operation deadline exceeded")]
    Timeout,
}

impl ServiceError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        ServiceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::ValidationFailure(message.into())
    }

    /// Map a policy denial. `target` names the member for `TargetNotMember`.
    pub fn denied(denial: PolicyDenial, target: Option<&UserId>) -> Self {
        match denial {
            PolicyDenial::TargetNotMember => ServiceError::NotFound {
                entity: "member",
                id: target.map(|t| t.to_string()).unwrap_or_default(),
            },
            d if d.is_invariant_violation() => ServiceError::InvariantViolation(d),
            d => ServiceError::PermissionDenied(d),
        }
    }

    /// Stable machine-readable code.
    pub fn reason(&self) -> &'static str {
        match self {
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::PermissionDenied(d) | ServiceError::InvariantViolation(d) => d.reason(),
            ServiceError::ValidationFailure(_) => "validation_failure",
            ServiceError::Upstream(_) => "upstream_failure",
            ServiceError::Timeout => "timeout",
        }
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => ServiceError::NotFound {
                entity: "aggregate",
                id,
            },
            RepositoryError::Conflict(msg) => ServiceError::Conflict(msg),
            RepositoryError::VersionConflict { entity, expected } => ServiceError::Conflict(format!(
                "{} was modified concurrently (expected version {})",
                entity, expected
            )),
            other => ServiceError::Upstream(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_mapping() {
        let target = UserId::new("bob");
        assert!(matches!(
            ServiceError::denied(PolicyDenial::LastOwnerDemotion, None),
            ServiceError::InvariantViolation(PolicyDenial::LastOwnerDemotion)
        ));
        assert!(matches!(
            ServiceError::denied(PolicyDenial::CannotRemoveOwner, None),
            ServiceError::PermissionDenied(PolicyDenial::CannotRemoveOwner)
        ));
        match ServiceError::denied(PolicyDenial::TargetNotMember, Some(&target)) {
            ServiceError::NotFound { entity, id } => {
                assert_eq!(entity, "member");
                assert_eq!(id, "bob");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_reasons_are_specific() {
        assert_eq!(
            ServiceError::denied(PolicyDenial::LastOwnerRemoval, None).reason(),
            "last_owner_removal"
        );
        assert_eq!(ServiceError::Timeout.reason(), "timeout");
        let upstream: ServiceError = RepositoryError::Database("connection reset".into()).into();
        assert_eq!(upstream.reason(), "upstream_failure");
        let conflict: ServiceError = RepositoryError::VersionConflict {
            entity: "team".into(),
            expected: 3,
        }
        .into();
        assert_eq!(conflict.reason(), "conflict");
    }
}
