//! Subscription webhook effect
//!
//! The payment provider's webhook lands here and only ever writes the raw
//! tier/status strings. Tier resolution happens at read time.

use serde::Deserialize;
use teamgate_common::{GateResult, Team, TeamId, Transaction};
use tracing::info;

/// Fields the webhook may set
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubscriptionUpdate {
    pub tier: Option<String>,
    pub status: Option<String>,
    /// Left untouched when `None`
    pub billing_customer_id: Option<String>,
}

/// Store the subscription fields on a team
pub fn set_tenant_subscription(
    tx: &mut dyn Transaction,
    team_id: TeamId,
    update: SubscriptionUpdate,
) -> GateResult<Team> {
    let mut team = tx.require_team(team_id)?;
    team.subscription_tier = update.tier;
    team.subscription_status = update.status;
    if let Some(customer) = update.billing_customer_id {
        team.billing_customer_id = Some(customer);
    }
    tx.update_team(&team)?;

    info!(
        team_id = %team_id,
        tier = %team.tier(),
        status = team.status(),
        "subscription updated"
    );
    Ok(team)
}

/// Team owning a billing customer id
pub fn team_by_billing_customer(tx: &dyn Transaction, customer_id: &str) -> Option<Team> {
    tx.team_by_billing_customer(customer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use teamgate_common::{ManualClock, MemoryStore, PlanTier, Store};

    #[test]
    fn test_webhook_writes_raw_values() {
        let store = MemoryStore::new(Arc::new(ManualClock::new(Utc::now())));
        let mut tx = store.begin();
        let team = tx.insert_team(Team::new("Acme", "acme", false)).unwrap();

        let update = SubscriptionUpdate {
            tier: Some("pro".into()),
            status: Some("past_due".into()),
            billing_customer_id: Some("cus_123".into()),
        };
        let team = set_tenant_subscription(tx.as_mut(), team.id, update).unwrap();
        assert_eq!(team.tier(), PlanTier::Pro);
        assert_eq!(team.status(), "past_due");

        let found = team_by_billing_customer(tx.as_ref(), "cus_123").unwrap();
        assert_eq!(found.id, team.id);

        let garbage = SubscriptionUpdate { tier: Some("diamond".into()), ..Default::default() };
        let team = set_tenant_subscription(tx.as_mut(), team.id, garbage).unwrap();
        assert_eq!(team.subscription_tier.as_deref(), Some("diamond"));
        assert_eq!(team.tier(), PlanTier::Free);
        assert_eq!(team.status(), "active");
        assert_eq!(team.billing_customer_id.as_deref(), Some("cus_123"));
    }
}
