//! Team invitations
//!
//! An invite expires `ttl` after creation. Staleness is recomputed on
//! every read; the sweeper only tidies up.

use crate::authz::{authorize, authorize_or_throw};
use crate::guard::check_assignable;
use crate::membership::add_member;
use crate::principal::Principal;
use chrono::{DateTime, Duration, Utc};
use teamgate_billing::Entitlements;
use teamgate_common::{
    normalize_email, GateError, GateResult, Invite, InviteId, LimitKey, Member, Permission, Role,
    TeamId, Transaction, Violation,
};
use tracing::info;

/// Insert an invite. Runs after the caller has passed authorization,
/// entitlement and rate limiting.
pub fn create_invite(
    tx: &mut dyn Transaction,
    principal: &Principal,
    team_id: TeamId,
    email: &str,
    role: Role,
    now: DateTime<Utc>,
    ttl: Duration,
) -> GateResult<Invite> {
    check_assignable(role)?;
    let email = normalize_email(email);
    if !email.contains('@') {
        return Err(GateError::Validation(format!("not an email address: {email}")));
    }
    if let Some(user) = tx.user_by_email(&email) {
        if tx.member_of(team_id, user.id).is_some() {
            return Err(GateError::Conflict(format!("{email} is already a member")));
        }
    }
    if let Some(existing) = tx.invite_by_email(&email) {
        if !existing.is_stale(now, ttl) {
            return Err(GateError::Conflict(format!("invite already pending for {email}")));
        }
        tx.delete_invite(existing.id)?;
    }

    let inviter = principal.email().unwrap_or_default();
    let invite = tx.insert_invite(Invite::new(team_id, &email, inviter, role))?;
    info!(team_id = %team_id, invite_id = %invite.id, role = %role, "invite sent");
    Ok(invite)
}

/// Live invite or `NotFound`
fn live_invite(
    tx: &dyn Transaction,
    invite_id: InviteId,
    now: DateTime<Utc>,
    ttl: Duration,
) -> GateResult<Invite> {
    tx.invite(invite_id)
        .filter(|invite| !invite.is_stale(now, ttl))
        .ok_or_else(|| GateError::not_found("invite", invite_id))
}

/// Join the team named by an invite addressed to the principal
pub fn accept_invite(
    tx: &mut dyn Transaction,
    principal: &Principal,
    invite_id: InviteId,
    entitlements: &Entitlements,
    now: DateTime<Utc>,
    ttl: Duration,
) -> GateResult<Member> {
    let invite = live_invite(tx, invite_id, now, ttl)?;
    let email = principal.email().map(normalize_email);
    if email.as_deref() != Some(invite.email.as_str()) {
        return Err(Violation::InviteEmailMismatch.into());
    }
    tx.require_team(invite.team_id)?;
    entitlements.check_entitlement(tx, invite.team_id, LimitKey::Members)?;

    let member = add_member(tx, invite.team_id, &principal.user, invite.role)?;
    tx.delete_invite(invite.id)?;
    info!(team_id = %invite.team_id, invite_id = %invite.id, "invite accepted");
    Ok(member)
}

/// Withdraw a pending invite
pub fn revoke_invite(
    tx: &mut dyn Transaction,
    principal: &Principal,
    invite_id: InviteId,
) -> GateResult<()> {
    let invite = tx.invite(invite_id).ok_or(GateError::Unauthorized)?;
    authorize_or_throw(tx, principal, invite.team_id, Permission::InviteMembers)?;
    tx.delete_invite(invite.id)
}

/// Pending, non-stale invites of a team; empty without "Invite Members"
pub fn list_invites(
    tx: &dyn Transaction,
    principal: &Principal,
    team_id: TeamId,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Vec<Invite> {
    if authorize(tx, principal, team_id, Permission::InviteMembers).is_none() {
        return Vec::new();
    }
    tx.team_invites(team_id)
        .into_iter()
        .filter(|invite| !invite.is_stale(now, ttl))
        .collect()
}

/// Delete every stale invite; returns how many went
pub fn purge_stale_invites(
    tx: &mut dyn Transaction,
    now: DateTime<Utc>,
    ttl: Duration,
) -> GateResult<usize> {
    let stale: Vec<_> = tx
        .invites()
        .into_iter()
        .filter(|invite| invite.is_stale(now, ttl))
        .collect();
    for invite in &stale {
        tx.delete_invite(invite.id)?;
    }
    Ok(stale.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::teams::create_team;
    use chrono::TimeZone;
    use std::sync::Arc;
    use teamgate_billing::{BillingConfig, Metering};
    use teamgate_common::{Clock, ManualClock, MemoryStore, Store, User};

    struct Env {
        clock: Arc<ManualClock>,
        store: MemoryStore,
        entitlements: Entitlements,
    }

    fn env() -> Env {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()));
        Env {
            store: MemoryStore::new(clock.clone()),
            entitlements: Entitlements::new(Metering::new(clock.clone()), BillingConfig::default()),
            clock,
        }
    }

    fn ttl() -> Duration {
        Duration::days(7)
    }

    #[test]
    fn test_invite_and_accept() {
        let env = env();
        let mut tx = env.store.begin();
        let owner = tx.insert_user(User::new("o@x.io", "O")).unwrap();
        let team = create_team(tx.as_mut(), &owner, "Acme", false).unwrap();
        let owner = Principal::direct(owner);
        let now = env.clock.now();

        let invite =
            create_invite(tx.as_mut(), &owner, team.id, "New@X.io", Role::Admin, now, ttl())
                .unwrap();
        assert_eq!(invite.email, "new@x.io");
        assert_eq!(invite.inviter_email, "o@x.io");
        assert_eq!(list_invites(tx.as_ref(), &owner, team.id, now, ttl()).len(), 1);

        let dup = create_invite(tx.as_mut(), &owner, team.id, "new@x.io", Role::Member, now, ttl());
        assert!(matches!(dup, Err(GateError::Conflict(_))));

        let newcomer = Principal::direct(tx.insert_user(User::new("new@x.io", "N")).unwrap());
        let member =
            accept_invite(tx.as_mut(), &newcomer, invite.id, &env.entitlements, now, ttl())
                .unwrap();
        assert_eq!(member.role, Role::Admin);
        assert!(tx.invite(invite.id).is_none());

        let again =
            create_invite(tx.as_mut(), &owner, team.id, "new@x.io", Role::Member, now, ttl());
        assert!(matches!(again, Err(GateError::Conflict(_))));
    }

    #[test]
    fn test_owner_role_cannot_be_invited() {
        let env = env();
        let mut tx = env.store.begin();
        let owner = tx.insert_user(User::new("o@x.io", "O")).unwrap();
        let team = create_team(tx.as_mut(), &owner, "Acme", false).unwrap();
        let result = create_invite(
            tx.as_mut(),
            &Principal::direct(owner),
            team.id,
            "b@x.io",
            Role::Owner,
            env.clock.now(),
            ttl(),
        );
        assert_eq!(result, Err(Violation::OwnerAssignment.into()));
    }

    #[test]
    fn test_stale_and_mismatched_invites_are_refused() {
        let env = env();
        let mut tx = env.store.begin();
        let owner = tx.insert_user(User::new("o@x.io", "O")).unwrap();
        let team = create_team(tx.as_mut(), &owner, "Acme", false).unwrap();
        let owner = Principal::direct(owner);
        let now = env.clock.now();
        let invite =
            create_invite(tx.as_mut(), &owner, team.id, "b@x.io", Role::Member, now, ttl())
                .unwrap();

        let intruder = Principal::direct(tx.insert_user(User::new("c@x.io", "C")).unwrap());
        assert_eq!(
            accept_invite(tx.as_mut(), &intruder, invite.id, &env.entitlements, now, ttl()),
            Err(Violation::InviteEmailMismatch.into())
        );

        env.clock.advance(Duration::days(7));
        let now = env.clock.now();
        let invitee = Principal::direct(tx.insert_user(User::new("b@x.io", "B")).unwrap());
        assert!(matches!(
            accept_invite(tx.as_mut(), &invitee, invite.id, &env.entitlements, now, ttl()),
            Err(GateError::NotFound { .. })
        ));
        assert!(list_invites(tx.as_ref(), &owner, team.id, now, ttl()).is_empty());

        // a stale invite does not block a fresh one
        create_invite(tx.as_mut(), &owner, team.id, "b@x.io", Role::Member, now, ttl()).unwrap();
        env.clock.advance(Duration::days(8));
        assert_eq!(purge_stale_invites(tx.as_mut(), env.clock.now(), ttl()).unwrap(), 1);
        assert!(tx.invites().is_empty());
    }

    #[test]
    fn test_accept_rechecks_member_limit() {
        let env = env();
        let mut tx = env.store.begin();
        let owner = tx.insert_user(User::new("o@x.io", "O")).unwrap();
        let team = create_team(tx.as_mut(), &owner, "Acme", false).unwrap();
        let owner = Principal::direct(owner);
        let now = env.clock.now();

        let invite =
            create_invite(tx.as_mut(), &owner, team.id, "late@x.io", Role::Member, now, ttl())
                .unwrap();
        for email in ["a@x.io", "b@x.io"] {
            let user = tx.insert_user(User::new(email, "F")).unwrap();
            add_member(tx.as_mut(), team.id, &user, Role::Member).unwrap();
        }
        let late = Principal::direct(tx.insert_user(User::new("late@x.io", "L")).unwrap());
        assert!(matches!(
            accept_invite(tx.as_mut(), &late, invite.id, &env.entitlements, now, ttl()),
            Err(GateError::PlanLimitExceeded { current: 3, limit: 3, .. })
        ));
    }

    #[test]
    fn test_revoke_requires_invite_permission() {
        let env = env();
        let mut tx = env.store.begin();
        let owner = tx.insert_user(User::new("o@x.io", "O")).unwrap();
        let team = create_team(tx.as_mut(), &owner, "Acme", false).unwrap();
        let owner = Principal::direct(owner);
        let now = env.clock.now();
        let invite =
            create_invite(tx.as_mut(), &owner, team.id, "b@x.io", Role::Member, now, ttl())
                .unwrap();

        let member_user = tx.insert_user(User::new("m@x.io", "M")).unwrap();
        add_member(tx.as_mut(), team.id, &member_user, Role::Member).unwrap();
        assert_eq!(
            revoke_invite(tx.as_mut(), &Principal::direct(member_user), invite.id),
            Err(GateError::Unauthorized)
        );
        revoke_invite(tx.as_mut(), &owner, invite.id).unwrap();
        assert!(tx.invite(invite.id).is_none());
        // gone and never-existed look alike
        assert_eq!(revoke_invite(tx.as_mut(), &owner, invite.id), Err(GateError::Unauthorized));
        assert_eq!(
            revoke_invite(tx.as_mut(), &owner, InviteId::new()),
            Err(GateError::Unauthorized)
        );
    }
}
