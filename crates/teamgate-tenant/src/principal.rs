//! Principal resolution
//!
//! Turns the session identity of a request into the user the engine acts
//! for. A super-admin with a live impersonation session acts as the target;
//! expiry is recomputed on every resolve.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use teamgate_common::{normalize_email, Clock, GateError, GateResult, Transaction, User, UserId};
use tracing::debug;

/// Resolved calling identity
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    /// User the request acts as
    pub user: User,
    /// Real super-admin behind an impersonated request
    pub impersonator: Option<UserId>,
}

impl Principal {
    /// Direct, non-impersonated principal
    pub fn direct(user: User) -> Self {
        Self { user, impersonator: None }
    }

    pub fn id(&self) -> UserId {
        self.user.id
    }

    pub fn email(&self) -> Option<&str> {
        self.user.email.as_deref()
    }

    pub fn is_impersonated(&self) -> bool {
        self.impersonator.is_some()
    }
}

/// Principal resolver
#[derive(Clone)]
pub struct PrincipalResolver {
    clock: Arc<dyn Clock>,
}

impl PrincipalResolver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The session's own user, ignoring impersonation. Fails closed.
    pub fn authenticate(&self, tx: &dyn Transaction, session: Option<UserId>) -> GateResult<User> {
        let id = session.ok_or(GateError::Unauthenticated)?;
        tx.user(id).ok_or(GateError::Unauthenticated)
    }

    /// Effective principal for tenant-scoped checks
    pub fn resolve(&self, tx: &dyn Transaction, session: Option<UserId>) -> GateResult<Principal> {
        let user = self.authenticate(tx, session)?;

        let grant = match user.impersonation {
            Some(grant) if user.is_super_admin => grant,
            _ => return Ok(Principal::direct(user)),
        };
        if grant.is_expired(self.now()) {
            debug!(admin = %user.id, "impersonation lapsed, acting as self");
            return Ok(Principal::direct(user));
        }
        match tx.user(grant.target) {
            Some(target) => Ok(Principal {
                user: target,
                impersonator: Some(user.id),
            }),
            None => Ok(Principal::direct(user)),
        }
    }

    /// Existing user for `email`, or a new one on first sign-in
    pub fn get_or_create_user(
        &self,
        tx: &mut dyn Transaction,
        email: &str,
        full_name: Option<&str>,
    ) -> GateResult<(User, bool)> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(GateError::Validation(format!("not an email address: {email}")));
        }
        if let Some(user) = tx.user_by_email(&email) {
            return Ok((user, false));
        }
        let user = tx.insert_user(User::new(email, full_name.unwrap_or("")))?;
        debug!(user_id = %user.id, "user created on first sign-in");
        Ok((user, true))
    }
}
