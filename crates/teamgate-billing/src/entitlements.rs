//! Tenant Entitlements and Feature Gating
//!
//! Sits between authorization and execution: authorization answers "may this
//! principal act", entitlement answers "can this team afford it".

use crate::config::BillingConfig;
use crate::metering::Metering;
use crate::plans::{plan, Feature, UNLIMITED};
use rust_decimal::Decimal;
use serde::Serialize;
use teamgate_common::{Accrual, GateError, GateResult, LimitKey, PlanTier, TeamId, Transaction};
use tracing::debug;

/// Share of a limit, in percent, at which the team is warned
pub const LIMIT_WARNING_PERCENT: i64 = 80;

/// Usage against one limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageLine {
    pub key: LimitKey,
    pub current: i64,
    /// [`UNLIMITED`] when uncapped
    pub limit: i64,
}

/// Billing page view of a team
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingSnapshot {
    pub tier: PlanTier,
    pub display_name: &'static str,
    pub status: String,
    pub monthly_price: Decimal,
    pub features: Vec<Feature>,
    /// One line per limit key
    pub usage: Vec<UsageLine>,
}

impl BillingSnapshot {
    /// Line for `key`
    pub fn line(&self, key: LimitKey) -> Option<&UsageLine> {
        self.usage.iter().find(|line| line.key == key)
    }
}

/// Entitlement checks against the plan catalog
#[derive(Clone)]
pub struct Entitlements {
    metering: Metering,
    config: BillingConfig,
}

impl Entitlements {
    pub fn new(metering: Metering, config: BillingConfig) -> Self {
        Self { metering, config }
    }

    pub fn metering(&self) -> &Metering {
        &self.metering
    }

    /// Allow when usage for `key` is below the tier limit or the limit is
    /// unlimited. Unlimited keys never compute usage.
    pub fn check_entitlement(
        &self,
        tx: &dyn Transaction,
        team_id: TeamId,
        key: LimitKey,
    ) -> GateResult<()> {
        let team = tx.require_team(team_id)?;
        let tier = team.tier();
        let limit = plan(tier).limit(key);

        if limit == UNLIMITED {
            return Ok(());
        }

        let current = self.current_usage(tx, team_id, key);
        if current >= limit {
            debug!(team_id = %team_id, %key, current, limit, %tier, "plan limit reached");
            return Err(GateError::PlanLimitExceeded {
                key,
                current,
                limit,
                tier,
                upgrade_url: self.config.upgrade_url.clone(),
            });
        }
        Ok(())
    }

    /// Allow when the team's tier includes `feature`
    pub fn check_feature(
        &self,
        tx: &dyn Transaction,
        team_id: TeamId,
        feature: Feature,
    ) -> GateResult<()> {
        let tier = tx.require_team(team_id)?.tier();
        if plan(tier).has_feature(feature) {
            return Ok(());
        }
        debug!(team_id = %team_id, %feature, %tier, "feature not entitled");
        Err(GateError::FeatureNotEntitled {
            feature: feature.to_string(),
            tier,
            upgrade_url: self.config.upgrade_url.clone(),
        })
    }

    /// Current usage for `key`
    pub fn current_usage(&self, tx: &dyn Transaction, team_id: TeamId, key: LimitKey) -> i64 {
        match key.accrual() {
            Accrual::Headcount => tx.team_members(team_id).len() as i64,
            Accrual::Monthly => self.metering.usage_in_current_period(tx, team_id, key),
            Accrual::Lifetime => self.metering.lifetime_balance(tx, team_id, key),
        }
    }

    /// The usage line for `key` when adding `added` moved it across
    /// [`LIMIT_WARNING_PERCENT`] of a finite limit. Call after the usage
    /// is written.
    pub fn limit_warning(
        &self,
        tx: &dyn Transaction,
        team_id: TeamId,
        key: LimitKey,
        added: i64,
    ) -> Option<UsageLine> {
        let limit = plan(tx.team(team_id)?.tier()).limit(key);
        if added <= 0 || limit <= 0 {
            return None;
        }
        let current = self.current_usage(tx, team_id, key);
        let threshold = limit * LIMIT_WARNING_PERCENT;
        let crossed = (current - added) * 100 < threshold && current * 100 >= threshold;
        crossed.then_some(UsageLine { key, current, limit })
    }

    /// Tier, status and usage for every limit key. Never fails on over-limit.
    pub fn billing_snapshot(
        &self,
        tx: &dyn Transaction,
        team_id: TeamId,
    ) -> GateResult<BillingSnapshot> {
        let team = tx.require_team(team_id)?;
        let config = plan(team.tier());

        let usage = LimitKey::ALL
            .into_iter()
            .map(|key| UsageLine {
                key,
                current: self.current_usage(tx, team_id, key),
                limit: config.limit(key),
            })
            .collect();

        Ok(BillingSnapshot {
            tier: config.tier,
            display_name: config.display_name(),
            status: team.status().to_string(),
            monthly_price: config.monthly_price(),
            features: config.features.to_vec(),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use teamgate_common::{
        ManualClock, Member, MemoryStore, MeteredResource, Role, Store, Team, User,
    };

    fn setup() -> (MemoryStore, Entitlements) {
        let start = Utc.with_ymd_and_hms(2026, 5, 12, 10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = MemoryStore::new(clock.clone());
        let entitlements = Entitlements::new(Metering::new(clock), BillingConfig::default());
        (store, entitlements)
    }

    fn team_on(tx: &mut dyn Transaction, tier: Option<&str>) -> TeamId {
        let mut team = Team::new("Acme", "acme", false);
        team.subscription_tier = tier.map(str::to_string);
        tx.insert_team(team).unwrap().id
    }

    fn team_on_slug(tx: &mut dyn Transaction, tier: &str, slug: &str) -> TeamId {
        let mut team = Team::new(slug, slug, false);
        team.subscription_tier = Some(tier.to_string());
        tx.insert_team(team).unwrap().id
    }

    fn add_members(tx: &mut dyn Transaction, team_id: TeamId, n: usize) {
        let start = tx.team_members(team_id).len();
        for i in start..start + n {
            let user = tx.insert_user(User::new(format!("u{i}@x.io"), "U")).unwrap();
            tx.insert_member(Member::new(team_id, &user, Role::Member)).unwrap();
        }
    }

    fn consume_credits(tx: &mut dyn Transaction, team_id: TeamId, n: i64) {
        let resource = MeteredResource::AiCredits { model: "test".into(), token_count: 1 };
        tx.append_usage(teamgate_common::UsageRecord::new(team_id, resource, n)).unwrap();
    }

    #[test]
    fn test_member_limit_boundary() {
        let (store, entitlements) = setup();
        let mut tx = store.begin();
        let team = team_on(tx.as_mut(), None);

        add_members(tx.as_mut(), team, 2);
        assert!(entitlements.check_entitlement(tx.as_ref(), team, LimitKey::Members).is_ok());

        add_members(tx.as_mut(), team, 1);
        let err = entitlements
            .check_entitlement(tx.as_ref(), team, LimitKey::Members)
            .unwrap_err();
        assert_eq!(
            err,
            GateError::PlanLimitExceeded {
                key: LimitKey::Members,
                current: 3,
                limit: 3,
                tier: PlanTier::Free,
                upgrade_url: "/settings/billing".into(),
            }
        );
    }

    #[test]
    fn test_limit_warning_fires_on_crossing_only() {
        let (store, entitlements) = setup();
        let mut tx = store.begin();
        let team = team_on(tx.as_mut(), None);

        consume_credits(tx.as_mut(), team, 79);
        assert_eq!(entitlements.limit_warning(tx.as_ref(), team, LimitKey::AiCredits, 79), None);
        consume_credits(tx.as_mut(), team, 5);
        assert_eq!(
            entitlements.limit_warning(tx.as_ref(), team, LimitKey::AiCredits, 5),
            Some(UsageLine {
                key: LimitKey::AiCredits,
                current: 84,
                limit: 100,
            })
        );
        consume_credits(tx.as_mut(), team, 5);
        assert_eq!(entitlements.limit_warning(tx.as_ref(), team, LimitKey::AiCredits, 5), None);

        let unlimited = team_on_slug(tx.as_mut(), "enterprise", "big");
        consume_credits(tx.as_mut(), unlimited, 1_000_000);
        assert_eq!(
            entitlements.limit_warning(tx.as_ref(), unlimited, LimitKey::AiCredits, 1_000_000),
            None
        );
    }

    #[test]
    fn test_credit_limit_boundary() {
        let (store, entitlements) = setup();
        let mut tx = store.begin();
        let team = team_on(tx.as_mut(), Some("free"));

        consume_credits(tx.as_mut(), team, 99);
        assert!(entitlements.check_entitlement(tx.as_ref(), team, LimitKey::AiCredits).is_ok());
        consume_credits(tx.as_mut(), team, 1);
        assert!(matches!(
            entitlements.check_entitlement(tx.as_ref(), team, LimitKey::AiCredits),
            Err(GateError::PlanLimitExceeded { current: 100, limit: 100, .. })
        ));
    }

    #[test]
    fn test_unlimited_ignores_usage() {
        let (store, entitlements) = setup();
        let mut tx = store.begin();
        let team = team_on(tx.as_mut(), Some("enterprise"));

        consume_credits(tx.as_mut(), team, 1_000_000_000);
        for key in LimitKey::ALL {
            assert!(entitlements.check_entitlement(tx.as_ref(), team, key).is_ok());
        }
    }

    #[test]
    fn test_garbage_tier_gets_free_limits() {
        let (store, entitlements) = setup();
        let mut tx = store.begin();
        let team = team_on(tx.as_mut(), Some("platinum-unlimited"));

        add_members(tx.as_mut(), team, 3);
        assert!(matches!(
            entitlements.check_entitlement(tx.as_ref(), team, LimitKey::Members),
            Err(GateError::PlanLimitExceeded { tier: PlanTier::Free, limit: 3, .. })
        ));
    }

    #[test]
    fn test_missing_team_is_not_found() {
        let (store, entitlements) = setup();
        let tx = store.begin();
        assert!(matches!(
            entitlements.check_entitlement(tx.as_ref(), TeamId::new(), LimitKey::Notes),
            Err(GateError::NotFound { .. })
        ));
    }

    #[test]
    fn test_feature_gate() {
        let (store, entitlements) = setup();
        let mut tx = store.begin();
        let pro = team_on(tx.as_mut(), Some("pro"));

        assert!(entitlements.check_feature(tx.as_ref(), pro, Feature::Analytics).is_ok());
        let err = entitlements
            .check_feature(tx.as_ref(), pro, Feature::CustomRoles)
            .unwrap_err();
        assert_eq!(err.code(), "PLAN_LIMIT_EXCEEDED");
    }

    #[test]
    fn test_snapshot_reports_over_limit_without_failing() {
        let (store, entitlements) = setup();
        let mut tx = store.begin();
        let team = team_on(tx.as_mut(), None);
        consume_credits(tx.as_mut(), team, 250);
        add_members(tx.as_mut(), team, 1);

        let snapshot = entitlements.billing_snapshot(tx.as_ref(), team).unwrap();
        assert_eq!(snapshot.tier, PlanTier::Free);
        assert_eq!(snapshot.display_name, "Free");
        assert_eq!(snapshot.status, "active");
        assert_eq!(snapshot.usage.len(), LimitKey::ALL.len());
        assert_eq!(
            snapshot.line(LimitKey::AiCredits),
            Some(&UsageLine { key: LimitKey::AiCredits, current: 250, limit: 100 })
        );
        assert_eq!(snapshot.line(LimitKey::Members).map(|l| l.current), Some(1));
    }
}
