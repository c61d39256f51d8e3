//! Privileged access (impersonation)
//!
//! ```text
//!   Idle ──start──► Impersonating ──stop──► Idle      (reason: manual_exit)
//!                        │
//!                        └──expiry + sweep──► Idle    (reason: expired)
//! ```
//!
//! Every start and stop writes an audit entry in the same transaction.
//! Reading the status never clears a lapsed session.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use teamgate_common::{
    AuditAction, AuditEntry, Clock, GateError, GateResult, ImpersonationGrant, Transaction, User,
    UserId, Violation,
};
use tracing::{info, warn};

/// Impersonation state as seen by the admin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImpersonationStatus {
    /// Not a super-admin, or no session
    None,
    Active {
        target: UserId,
        target_email: Option<String>,
        expires_at: DateTime<Utc>,
    },
    /// Stored expiry has passed; fields still set until stop or sweep
    Expired {
        target: UserId,
        expired_at: DateTime<Utc>,
    },
}

/// Super-admin caller or the matching error
pub fn require_super_admin(tx: &dyn Transaction, session: Option<UserId>) -> GateResult<User> {
    let id = session.ok_or(GateError::Unauthenticated)?;
    let user = tx.user(id).ok_or(GateError::Unauthenticated)?;
    if !user.is_super_admin {
        warn!(user_id = %id, "super-admin operation refused");
        return Err(GateError::Unauthorized);
    }
    Ok(user)
}

/// Never fails; false for unauthenticated callers
pub fn is_super_admin(tx: &dyn Transaction, session: Option<UserId>) -> bool {
    session
        .and_then(|id| tx.user(id))
        .is_some_and(|user| user.is_super_admin)
}

/// Impersonation service
#[derive(Clone)]
pub struct Impersonation {
    clock: Arc<dyn Clock>,
    duration: Duration,
}

impl Impersonation {
    pub fn new(clock: Arc<dyn Clock>, duration: Duration) -> Self {
        Self { clock, duration }
    }

    /// Begin acting as `target_id`. A running session is replaced.
    pub fn start(
        &self,
        tx: &mut dyn Transaction,
        session: Option<UserId>,
        target_id: UserId,
    ) -> GateResult<DateTime<Utc>> {
        let mut admin = require_super_admin(tx, session)?;
        if admin.id == target_id {
            return Err(Violation::SelfImpersonation.into());
        }
        let target = tx.require_user(target_id)?;

        let expires_at = self.clock.now() + self.duration;
        if let Some(previous) = admin.impersonation {
            info!(
                admin = %admin.id,
                previous = %previous.target,
                "replacing impersonation session"
            );
        }
        admin.impersonation = Some(ImpersonationGrant {
            target: target.id,
            expires_at,
        });
        tx.update_user(&admin)?;
        tx.append_audit(AuditEntry::new(
            admin.id,
            AuditAction::ImpersonationStart,
            Some(target.id),
            json!({
                "target_email": target.email,
                "target_name": target.full_name,
                "expires_at": expires_at,
            }),
        ))?;

        info!(admin = %admin.id, target = %target.id, %expires_at, "impersonation started");
        Ok(expires_at)
    }

    /// End the caller's session, lapsed or not
    pub fn stop(&self, tx: &mut dyn Transaction, session: Option<UserId>) -> GateResult<()> {
        let mut admin = require_super_admin(tx, session)?;
        let grant = admin.impersonation.take().ok_or(Violation::NotImpersonating)?;

        tx.update_user(&admin)?;
        tx.append_audit(AuditEntry::new(
            admin.id,
            AuditAction::ImpersonationStop,
            Some(grant.target),
            json!({ "reason": "manual_exit" }),
        ))?;
        info!(admin = %admin.id, target = %grant.target, "impersonation stopped");
        Ok(())
    }

    /// Current state; expiry recomputed against the clock
    pub fn status(&self, tx: &dyn Transaction, session: Option<UserId>) -> ImpersonationStatus {
        let Some(admin) = session.and_then(|id| tx.user(id)).filter(|u| u.is_super_admin) else {
            return ImpersonationStatus::None;
        };
        let Some(grant) = admin.impersonation else {
            return ImpersonationStatus::None;
        };
        if grant.is_expired(self.clock.now()) {
            return ImpersonationStatus::Expired {
                target: grant.target,
                expired_at: grant.expires_at,
            };
        }
        ImpersonationStatus::Active {
            target: grant.target,
            target_email: tx.user(grant.target).and_then(|u| u.email),
            expires_at: grant.expires_at,
        }
    }

    /// Clear every lapsed session; returns how many
    pub fn sweep_expired(&self, tx: &mut dyn Transaction) -> GateResult<usize> {
        let now = self.clock.now();
        let mut cleared = 0;
        for mut admin in tx.users() {
            let Some(grant) = admin.impersonation.filter(|g| g.is_expired(now)) else {
                continue;
            };
            admin.impersonation = None;
            tx.update_user(&admin)?;
            tx.append_audit(AuditEntry::new(
                admin.id,
                AuditAction::ImpersonationStop,
                Some(grant.target),
                json!({ "reason": "expired" }),
            ))?;
            cleared += 1;
        }
        Ok(cleared)
    }
}
