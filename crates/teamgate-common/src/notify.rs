//! Outbound notifications
//!
//! Delivery is fire-and-forget. A failed send is logged and never undoes
//! the write that triggered it.

use crate::domain::{LimitKey, PlanTier, UserId};
use crate::rbac::Role;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Message handed to the delivery collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Someone was invited to a team
    InviteSent {
        /// Team display name
        team_name: String,
        /// Invitee address
        email: String,
        /// Who sent it
        inviter_email: String,
        /// Role granted on acceptance
        role: Role,
    },
    /// An invitee joined
    InviteAccepted {
        team_name: String,
        /// Address of the new member
        email: String,
        inviter_email: String,
    },
    /// Someone lost their membership
    MemberRemoved {
        team_name: String,
        /// Address of the removed member, when known
        email: Option<String>,
    },
    /// A team changed hands
    OwnershipTransferred {
        /// Team display name
        team_name: String,
        /// Address of the new owner, when known
        new_owner_email: Option<String>,
    },
    /// The billing webhook moved a team to another tier or status
    SubscriptionChanged {
        team_name: String,
        tier: PlanTier,
        status: String,
    },
    /// Usage crossed the warning share of a plan limit
    ApproachingLimit {
        team_name: String,
        key: LimitKey,
        current: i64,
        limit: i64,
    },
    ImpersonationStarted {
        admin: UserId,
        target: UserId,
        target_email: Option<String>,
        expires_at: DateTime<Utc>,
    },
    ImpersonationStopped {
        admin: UserId,
        target: UserId,
    },
}

/// Delivery failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Email / push delivery seam
pub trait Notifier: Send + Sync {
    /// Attempt delivery
    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Keeps sent notifications in memory (for testing and development)
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: bool,
}

impl MemoryNotifier {
    /// Notifier that records every message
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier whose every send fails
    pub fn failing() -> Self {
        Self { sent: Mutex::new(Vec::new()), failing: true }
    }

    /// Messages delivered so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing {
            return Err(NotifyError("transport unavailable".into()));
        }
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

/// Send and swallow the error
pub fn deliver(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(e) = notifier.send(notification) {
        warn!(error = %e, ?notification, "notification dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> Notification {
        Notification::InviteSent {
            team_name: "Acme".into(),
            email: "b@x.io".into(),
            inviter_email: "a@x.io".into(),
            role: Role::Member,
        }
    }

    #[test]
    fn test_memory_notifier_records() {
        let notifier = MemoryNotifier::new();
        deliver(&notifier, &invite());
        assert_eq!(notifier.sent(), vec![invite()]);
    }

    #[test]
    fn test_failed_delivery_is_swallowed() {
        let notifier = MemoryNotifier::failing();
        deliver(&notifier, &invite());
        assert!(notifier.sent().is_empty());
        assert!(notifier.send(&invite()).is_err());
    }
}
