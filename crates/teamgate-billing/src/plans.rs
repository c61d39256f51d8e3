//! Plan catalog
//!
//! Every tier, limit, gated feature and AI credit cost lives here.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use teamgate_common::{LimitKey, PlanTier};

/// Limit value meaning "no limit"
pub const UNLIMITED: i64 = -1;

/// Credit cost for models missing from [`AI_CREDIT_COSTS`]
pub const DEFAULT_CREDIT_COST: i64 = 5;

/// Credits charged per completion, by model id
pub const AI_CREDIT_COSTS: &[(&str, i64)] = &[
    ("gpt-4o", 10),
    ("gpt-4o-mini", 2),
    ("claude-sonnet-4-5-20250929", 8),
    ("claude-haiku-4-5-20251001", 2),
];

/// Credits charged for one completion on `model`
pub fn credit_cost(model: &str) -> i64 {
    AI_CREDIT_COSTS
        .iter()
        .find(|(id, _)| *id == model)
        .map(|(_, cost)| *cost)
        .unwrap_or(DEFAULT_CREDIT_COST)
}

/// Tier-gated capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    Basic,
    Notes,
    Ai,
    Api,
    Analytics,
    CustomRoles,
    Sso,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Notes => "notes",
            Self::Ai => "ai",
            Self::Api => "api",
            Self::Analytics => "analytics",
            Self::CustomRoles => "custom-roles",
            Self::Sso => "sso",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tier limits, [`UNLIMITED`] for no cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub members: i64,
    pub ai_credits: i64,
    pub notes: i64,
    pub storage_quota_mb: i64,
}

impl PlanLimits {
    /// Limit for `key`
    pub fn get(&self, key: LimitKey) -> i64 {
        match key {
            LimitKey::Members => self.members,
            LimitKey::AiCredits => self.ai_credits,
            LimitKey::Notes => self.notes,
            LimitKey::StorageQuotaMb => self.storage_quota_mb,
        }
    }
}

/// Catalog entry for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanConfig {
    pub tier: PlanTier,
    pub description: &'static str,
    /// Whole US dollars per month
    pub monthly_price_usd: i64,
    pub limits: PlanLimits,
    pub features: &'static [Feature],
}

const FREE: PlanConfig = PlanConfig {
    tier: PlanTier::Free,
    description: "For individuals and small teams",
    monthly_price_usd: 0,
    limits: PlanLimits {
        members: 3,
        ai_credits: 100,
        notes: 50,
        storage_quota_mb: 100,
    },
    features: &[Feature::Basic, Feature::Notes],
};

const PRO: PlanConfig = PlanConfig {
    tier: PlanTier::Pro,
    description: "For growing teams",
    monthly_price_usd: 29,
    limits: PlanLimits {
        members: 20,
        ai_credits: 5000,
        notes: UNLIMITED,
        storage_quota_mb: 1000,
    },
    features: &[
        Feature::Basic,
        Feature::Notes,
        Feature::Ai,
        Feature::Api,
        Feature::Analytics,
    ],
};

const ENTERPRISE: PlanConfig = PlanConfig {
    tier: PlanTier::Enterprise,
    description: "For large organizations",
    monthly_price_usd: 99,
    limits: PlanLimits {
        members: UNLIMITED,
        ai_credits: UNLIMITED,
        notes: UNLIMITED,
        storage_quota_mb: UNLIMITED,
    },
    features: &[
        Feature::Basic,
        Feature::Notes,
        Feature::Ai,
        Feature::Api,
        Feature::Analytics,
        Feature::CustomRoles,
        Feature::Sso,
    ],
};

/// Catalog entry for `tier`
pub fn plan(tier: PlanTier) -> &'static PlanConfig {
    match tier {
        PlanTier::Free => &FREE,
        PlanTier::Pro => &PRO,
        PlanTier::Enterprise => &ENTERPRISE,
    }
}

impl PlanConfig {
    pub fn display_name(&self) -> &'static str {
        self.tier.display_name()
    }

    pub fn monthly_price(&self) -> Decimal {
        Decimal::from(self.monthly_price_usd)
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn limit(&self, key: LimitKey) -> i64 {
        self.limits.get(key)
    }
}
