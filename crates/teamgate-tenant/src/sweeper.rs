//! Maintenance sweeper
//!
//! Tidies state whose expiry is otherwise only recomputed on read:
//! lapsed impersonation sessions, stale invites, soft-deleted teams past
//! their grace period and idle rate-limit buckets. Correctness never
//! depends on it running.

use crate::config::EngineConfig;
use crate::impersonation::Impersonation;
use crate::invites::purge_stale_invites;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use teamgate_billing::RateLimiter;
use teamgate_common::{Clock, GateResult, Store};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// What one pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_impersonations: usize,
    pub stale_invites: usize,
    pub purged_teams: usize,
    pub pruned_buckets: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Periodic maintenance job
pub struct Sweeper {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    limiter: Arc<RateLimiter>,
    impersonation: Impersonation,
    invite_ttl: Duration,
    deletion_grace: Duration,
    interval: std::time::Duration,
    last_report: RwLock<Option<SweepReport>>,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        limiter: Arc<RateLimiter>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            impersonation: Impersonation::new(clock.clone(), config.impersonation_duration()),
            store,
            clock,
            limiter,
            invite_ttl: config.invite_ttl(),
            deletion_grace: config.deletion_grace(),
            interval: std::time::Duration::from_secs(config.sweeper.interval_secs),
            last_report: RwLock::new(None),
        }
    }

    /// One pass in a single transaction
    pub fn run_once(&self) -> GateResult<SweepReport> {
        let now = self.clock.now();
        let mut tx = self.store.begin();

        let expired_impersonations = self.impersonation.sweep_expired(tx.as_mut())?;
        let stale_invites = purge_stale_invites(tx.as_mut(), now, self.invite_ttl)?;

        let mut purged_teams = 0;
        for team in tx.teams_pending_deletion() {
            if team.is_purgeable(now, self.deletion_grace) {
                tx.purge_team(team.id)?;
                info!(team_id = %team.id, slug = %team.slug, "team purged");
                purged_teams += 1;
            }
        }
        tx.commit()?;
        let pruned_buckets = self.limiter.prune();

        let report = SweepReport {
            expired_impersonations,
            stale_invites,
            purged_teams,
            pruned_buckets,
        };
        if !report.is_empty() {
            info!(
                expired_impersonations,
                stale_invites, purged_teams, pruned_buckets, "sweep finished"
            );
        }
        Ok(report)
    }

    /// Result of the latest pass run by [`Sweeper::spawn`]
    pub async fn last_report(&self) -> Option<SweepReport> {
        *self.last_report.read().await
    }

    /// Run forever on the configured interval. The first pass runs
    /// immediately.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                interval.tick().await;
                match self.run_once() {
                    Ok(report) => *self.last_report.write().await = Some(report),
                    Err(e) => error!(error = %e, "sweep failed"),
                }
            }
        })
    }
}
