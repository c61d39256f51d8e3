//! Error types for TeamGate

use crate::domain::value_objects::{LimitKey, PlanTier};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// TeamGate error type
///
/// Every check in the engine fails with one of these variants and the error
/// travels to the caller unmodified.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    /// No principal on the request
    #[error("authentication required")]
    Unauthenticated,

    /// Principal present, permission absent. Deliberately says nothing about
    /// whether the team exists.
    #[error("not authorized to perform this action")]
    Unauthorized,

    /// Tier limit reached for a metered resource
    #[error("You've reached the {key} limit for the {} plan", .tier.display_name())]
    PlanLimitExceeded {
        /// Limit that was hit
        key: LimitKey,
        /// Usage at the time of the check
        current: i64,
        /// Tier limit
        limit: i64,
        /// Effective tier of the team
        tier: PlanTier,
        /// Where the caller can upgrade
        upgrade_url: String,
    },

    /// Tier does not include a gated feature
    #[error("{feature} is not available on the {} plan", .tier.display_name())]
    FeatureNotEntitled {
        /// Feature name
        feature: String,
        /// Effective tier of the team
        tier: PlanTier,
        /// Where the caller can upgrade
        upgrade_url: String,
    },

    /// Token bucket empty
    #[error("rate limit exceeded for {operation}, retry after {}ms", .retry_after.as_millis())]
    RateLimited {
        /// Operation name
        operation: String,
        /// Earliest time a retry can succeed
        retry_after: Duration,
    },

    /// Business rule refused the mutation
    #[error("{0}")]
    InvariantViolation(Violation),

    /// Target entity missing in a mutation path
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Unique index collision
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed input
    #[error("invalid input: {0}")]
    Validation(String),

    /// Store failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl GateError {
    /// Not-found error for an entity kind
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for UI mapping
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::PlanLimitExceeded { .. } | Self::FeatureNotEntitled { .. } => {
                "PLAN_LIMIT_EXCEEDED"
            }
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::InvariantViolation(_) => "INVARIANT_VIOLATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Validation(_) => "VALIDATION",
            Self::Storage(_) => "STORAGE",
        }
    }

    /// Whether the same request may succeed later without any user action
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<Violation> for GateError {
    fn from(violation: Violation) -> Self {
        Self::InvariantViolation(violation)
    }
}

/// Business rules the engine refuses to break. Messages are shown verbatim.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    #[error("Cannot remove or demote the team owner. Use Transfer Ownership instead.")]
    OwnerImmutable,
    #[error("Ownership can only be granted through Transfer Ownership")]
    OwnerAssignment,
    #[error("There must be at least one admin left on the team")]
    NoPrivilegedMemberLeft,
    #[error("Target member is not on this team")]
    MemberNotInTeam,
    #[error("Target member has been removed from the team")]
    MemberRemoved,
    #[error("Cannot transfer ownership to yourself")]
    SelfTransfer,
    #[error("Cannot impersonate yourself")]
    SelfImpersonation,
    #[error("Not currently impersonating anyone")]
    NotImpersonating,
    #[error("Personal teams cannot be deleted")]
    PersonalTeam,
    #[error("This invite was sent to a different email address")]
    InviteEmailMismatch,
}

/// Result type for TeamGate
pub type GateResult<T> = Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_limit_message_names_key_and_tier() {
        let err = GateError::PlanLimitExceeded {
            key: LimitKey::AiCredits,
            current: 100,
            limit: 100,
            tier: PlanTier::Free,
            upgrade_url: "/settings/billing".into(),
        };

        assert_eq!(err.to_string(), "You've reached the aiCredits limit for the Free plan");
        assert_eq!(err.code(), "PLAN_LIMIT_EXCEEDED");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unauthorized_is_generic() {
        let msg = GateError::Unauthorized.to_string();
        assert!(!msg.contains("team"));
    }

    #[test]
    fn test_violation_converts() {
        let err: GateError = Violation::SelfTransfer.into();
        assert_eq!(err, GateError::InvariantViolation(Violation::SelfTransfer));
        assert_eq!(err.to_string(), "Cannot transfer ownership to yourself");
    }
}
