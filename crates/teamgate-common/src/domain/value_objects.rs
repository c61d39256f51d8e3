//! Value Objects - identifiers and closed vocabularies
//!
//! Every identifier is a distinct newtype so a member id can never be passed
//! where a user id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Principal (user) identifier
    UserId
);
uuid_id!(
    /// Team (tenant) identifier
    TeamId
);
uuid_id!(
    /// Membership identifier
    MemberId
);
uuid_id!(
    /// Invite identifier
    InviteId
);
uuid_id!(
    /// Custom role identifier
    CustomRoleId
);
uuid_id!(
    /// Usage record identifier
    UsageRecordId
);
uuid_id!(
    /// Audit entry identifier
    AuditEntryId
);

/// Subscription tier, ordered from lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Pro,
    Enterprise,
}

impl PlanTier {
    /// All tiers, lowest first
    pub const ALL: [PlanTier; 3] = [PlanTier::Free, PlanTier::Pro, PlanTier::Enterprise];

    /// Lowest tier; the fallback for anything unrecognized
    pub const LOWEST: PlanTier = PlanTier::Free;

    /// Resolve the raw tier string written by the billing webhook.
    ///
    /// Missing, empty or unknown values resolve to the lowest tier so a
    /// garbage string can never unlock higher limits.
    pub fn resolve(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("free") => Self::Free,
            Some("pro") => Self::Pro,
            Some("enterprise") => Self::Enterprise,
            _ => Self::LOWEST,
        }
    }

    /// Wire name, as stored on the team
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    /// Name shown to users
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Pro => "Pro",
            Self::Enterprise => "Enterprise",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How usage for a limit key accumulates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accrual {
    /// Counted from live memberships
    Headcount,
    /// Summed from usage records in the current calendar month
    Monthly,
    /// Net sum of every usage record ever written
    Lifetime,
}

/// Limited resource keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LimitKey {
    #[serde(rename = "members")]
    Members,
    #[serde(rename = "aiCredits")]
    AiCredits,
    #[serde(rename = "notes")]
    Notes,
    #[serde(rename = "storageQuotaMB")]
    StorageQuotaMb,
}

impl LimitKey {
    /// Every limit key
    pub const ALL: [LimitKey; 4] = [
        LimitKey::Members,
        LimitKey::AiCredits,
        LimitKey::Notes,
        LimitKey::StorageQuotaMb,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Members => "members",
            Self::AiCredits => "aiCredits",
            Self::Notes => "notes",
            Self::StorageQuotaMb => "storageQuotaMB",
        }
    }

    /// Accumulation strategy for this key
    pub fn accrual(&self) -> Accrual {
        match self {
            Self::Members => Accrual::Headcount,
            Self::AiCredits => Accrual::Monthly,
            Self::Notes | Self::StorageQuotaMb => Accrual::Lifetime,
        }
    }
}

impl fmt::Display for LimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tier_resolution_defaults_to_lowest() {
        assert_eq!(PlanTier::resolve(Some("pro")), PlanTier::Pro);
        assert_eq!(PlanTier::resolve(Some("enterprise")), PlanTier::Enterprise);
        assert_eq!(PlanTier::resolve(None), PlanTier::Free);
        assert_eq!(PlanTier::resolve(Some("")), PlanTier::Free);
        assert_eq!(PlanTier::resolve(Some("ENTERPRISE")), PlanTier::Free);
        assert_eq!(PlanTier::resolve(Some("unlimited")), PlanTier::Free);
        assert_eq!(PlanTier::resolve(Some("__proto__")), PlanTier::Free);
    }

    proptest! {
        #[test]
        fn prop_only_exact_tier_names_escalate(
            raw in " ?(free|pro|enterprise|Pro|ENTERPRISE|unlimited)? ?|\\PC{0,24}"
        ) {
            let expected = PlanTier::ALL
                .into_iter()
                .find(|t| t.as_str() == raw.trim())
                .unwrap_or(PlanTier::LOWEST);
            prop_assert_eq!(PlanTier::resolve(Some(&raw)), expected);
        }
    }

    #[test]
    fn test_tiers_are_ordered() {
        assert!(PlanTier::Free < PlanTier::Pro);
        assert!(PlanTier::Pro < PlanTier::Enterprise);
        assert_eq!(PlanTier::ALL[0], PlanTier::LOWEST);
    }

    #[test]
    fn test_limit_key_wire_names() {
        let json = serde_json::to_string(&LimitKey::StorageQuotaMb).unwrap();
        assert_eq!(json, "\"storageQuotaMB\"");
        for key in LimitKey::ALL {
            assert_eq!(
                serde_json::to_string(&key).unwrap(),
                format!("\"{}\"", key.as_str())
            );
        }
    }

    #[test]
    fn test_ids_are_distinct() {
        assert_ne!(UserId::new(), UserId::new());
    }
}
