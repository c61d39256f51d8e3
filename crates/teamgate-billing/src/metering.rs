//! Metering Engine
//!
//! Usage records are append-only. Monthly keys are summed over the current
//! calendar month (UTC); cumulative keys over every record ever written.

use crate::plans::credit_cost;
use std::sync::Arc;
use teamgate_common::{
    start_of_month, Clock, GateError, GateResult, LimitKey, MeteredResource, TeamId, Transaction,
    UsageRecord,
};
use tracing::debug;

/// Metering engine for usage collection
#[derive(Clone)]
pub struct Metering {
    clock: Arc<dyn Clock>,
}

impl Metering {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Append one usage record stamped with the current time
    pub fn record_usage(
        &self,
        tx: &mut dyn Transaction,
        team_id: TeamId,
        resource: MeteredResource,
        quantity: i64,
    ) -> GateResult<UsageRecord> {
        if quantity == 0 {
            return Err(GateError::Validation("usage quantity must be non-zero".into()));
        }
        if matches!(resource, MeteredResource::AiCredits { .. }) && quantity < 0 {
            return Err(GateError::Validation("AI credits cannot be refunded".into()));
        }
        tx.require_team(team_id)?;

        let record = tx.append_usage(UsageRecord::new(team_id, resource, quantity))?;
        debug!(
            team_id = %team_id,
            key = %record.resource.limit_key(),
            quantity,
            "usage recorded"
        );
        Ok(record)
    }

    /// Meter one AI completion at the model's credit cost
    pub fn record_ai_completion(
        &self,
        tx: &mut dyn Transaction,
        team_id: TeamId,
        model: &str,
        token_count: u64,
    ) -> GateResult<UsageRecord> {
        let resource = MeteredResource::AiCredits {
            model: model.to_string(),
            token_count,
        };
        self.record_usage(tx, team_id, resource, credit_cost(model))
    }

    /// Sum for `key` since the start of the current calendar month
    pub fn usage_in_current_period(
        &self,
        tx: &dyn Transaction,
        team_id: TeamId,
        key: LimitKey,
    ) -> i64 {
        let since = start_of_month(self.clock.now());
        sum_for(tx.team_usage(team_id, Some(since)), key)
    }

    /// Net sum for `key` over the whole history
    pub fn lifetime_balance(&self, tx: &dyn Transaction, team_id: TeamId, key: LimitKey) -> i64 {
        sum_for(tx.team_usage(team_id, None), key).max(0)
    }
}

fn sum_for(records: Vec<UsageRecord>, key: LimitKey) -> i64 {
    records
        .iter()
        .filter(|r| r.resource.limit_key() == key)
        .map(|r| r.quantity)
        .sum()
}
