//! Authorization
//!
//! principal × team × permission → membership or denial. Pure reads; a
//! denial never says whether the team exists.

use crate::principal::Principal;
use teamgate_common::{GateError, GateResult, Member, Permission, TeamId, Transaction};
use tracing::debug;

/// Live membership of a live team, when its role grants `permission`
pub fn authorize(
    tx: &dyn Transaction,
    principal: &Principal,
    team_id: TeamId,
    permission: Permission,
) -> Option<Member> {
    tx.team(team_id)?;
    tx.member_of(team_id, principal.id())
        .filter(|member| member.role.grants(permission))
}

/// [`authorize`], failing with `Unauthorized`
pub fn authorize_or_throw(
    tx: &dyn Transaction,
    principal: &Principal,
    team_id: TeamId,
    permission: Permission,
) -> GateResult<Member> {
    authorize(tx, principal, team_id, permission).ok_or_else(|| {
        debug!(user_id = %principal.id(), team_id = %team_id, %permission, "permission denied");
        GateError::Unauthorized
    })
}

/// Caller's permissions on a team, empty for non-members
pub fn viewer_permissions(
    tx: &dyn Transaction,
    principal: &Principal,
    team_id: TeamId,
) -> Vec<Permission> {
    if tx.team(team_id).is_none() {
        return Vec::new();
    }
    tx.member_of(team_id, principal.id())
        .map(|member| member.role.permissions())
        .unwrap_or_default()
}
