//! Platform administration queries
//!
//! Gated by the super-admin flag, never by team membership.

use crate::impersonation::require_super_admin;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use teamgate_common::{AuditEntry, GateResult, PlanTier, Team, Transaction, User, UserId};

/// Team row for the admin console
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamSummary {
    pub team: Team,
    pub tier: PlanTier,
    pub member_count: usize,
}

/// Platform-wide counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardMetrics {
    pub total_users: usize,
    pub total_teams: usize,
    pub personal_teams: usize,
    pub teams_by_tier: BTreeMap<PlanTier, usize>,
    pub active_impersonations: usize,
}

pub fn list_users(tx: &dyn Transaction, session: Option<UserId>) -> GateResult<Vec<User>> {
    require_super_admin(tx, session)?;
    Ok(tx.users())
}

pub fn list_teams(tx: &dyn Transaction, session: Option<UserId>) -> GateResult<Vec<TeamSummary>> {
    require_super_admin(tx, session)?;
    Ok(tx
        .teams()
        .into_iter()
        .map(|team| TeamSummary {
            tier: team.tier(),
            member_count: tx.team_members(team.id).len(),
            team,
        })
        .collect())
}

pub fn dashboard_metrics(
    tx: &dyn Transaction,
    session: Option<UserId>,
    now: DateTime<Utc>,
) -> GateResult<DashboardMetrics> {
    require_super_admin(tx, session)?;
    let users = tx.users();
    let teams = tx.teams();

    let mut teams_by_tier: BTreeMap<PlanTier, usize> =
        PlanTier::ALL.into_iter().map(|t| (t, 0)).collect();
    for team in &teams {
        *teams_by_tier.entry(team.tier()).or_default() += 1;
    }

    Ok(DashboardMetrics {
        total_users: users.len(),
        total_teams: teams.len(),
        personal_teams: teams.iter().filter(|t| t.is_personal).count(),
        teams_by_tier,
        active_impersonations: users
            .iter()
            .filter_map(|u| u.impersonation)
            .filter(|grant| !grant.is_expired(now))
            .count(),
    })
}

/// Newest first, at most `limit` entries
pub fn list_audit_log(
    tx: &dyn Transaction,
    session: Option<UserId>,
    limit: Option<usize>,
) -> GateResult<Vec<AuditEntry>> {
    require_super_admin(tx, session)?;
    let mut entries = tx.audit_entries();
    entries.reverse();
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    Ok(entries)
}
