//! Ownership transfer
//!
//! The only path that grants Owner. The old owner is demoted to Admin and
//! the target promoted in the same transaction.

use crate::authz::{authorize, authorize_or_throw};
use crate::guard::owners;
use crate::membership::MemberView;
use crate::principal::Principal;
use serde::Serialize;
use teamgate_common::{
    GateError, GateResult, MemberId, Permission, Role, TeamId, Transaction, UserId, Violation,
};
use tracing::info;

/// Result of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OwnershipTransfer {
    pub old_owner_id: UserId,
    pub new_owner_id: UserId,
}

/// Hand the team to another live member
pub fn transfer_ownership(
    tx: &mut dyn Transaction,
    principal: &Principal,
    team_id: TeamId,
    new_owner_member_id: MemberId,
) -> GateResult<OwnershipTransfer> {
    let mut current = authorize_or_throw(tx, principal, team_id, Permission::TransferOwnership)?;

    let mut target = tx
        .member(new_owner_member_id)
        .ok_or_else(|| GateError::not_found("member", new_owner_member_id))?;
    if target.team_id != team_id {
        return Err(Violation::MemberNotInTeam.into());
    }
    if !target.is_live() {
        return Err(Violation::MemberRemoved.into());
    }
    if target.id == current.id {
        return Err(Violation::SelfTransfer.into());
    }

    current.role = Role::Admin;
    target.role = Role::Owner;
    tx.update_member(&current)?;
    tx.update_member(&target)?;

    info!(
        team_id = %team_id,
        old_owner = %current.user_id,
        new_owner = %target.user_id,
        "ownership transferred"
    );
    Ok(OwnershipTransfer {
        old_owner_id: current.user_id,
        new_owner_id: target.user_id,
    })
}

/// Current owner; `None` for callers without "Read Members"
pub fn get_owner(
    tx: &dyn Transaction,
    principal: &Principal,
    team_id: TeamId,
) -> Option<MemberView> {
    authorize(tx, principal, team_id, Permission::ReadMembers)?;
    owners(tx, team_id).into_iter().next().map(|m| MemberView::load(tx, m))
}

/// Members who could receive ownership; empty for callers without
/// "Read Members"
pub fn transfer_candidates(
    tx: &dyn Transaction,
    principal: &Principal,
    team_id: TeamId,
) -> Vec<MemberView> {
    if authorize(tx, principal, team_id, Permission::ReadMembers).is_none() {
        return Vec::new();
    }
    tx.team_members(team_id)
        .into_iter()
        .filter(|m| m.role != Role::Owner)
        .map(|m| MemberView::load(tx, m))
        .collect()
}
