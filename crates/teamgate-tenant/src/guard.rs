//! Tenant invariant guard
//!
//! Structural rules every membership mutation goes through:
//! - the Owner membership is never changed directly
//! - Owner is only ever granted by ownership transfer
//! - at least one Owner or Admin stays on the team
//!
//! Callers run these checks and the mutation inside one transaction.

use teamgate_common::{GateResult, Member, Role, TeamId, Transaction, Violation};
use tracing::warn;

/// Refuse changes to the Owner and changes that would leave the team
/// without a privileged member
pub fn check_can_remove_or_demote(tx: &dyn Transaction, member: &Member) -> GateResult<()> {
    if member.role == Role::Owner {
        warn!(member_id = %member.id, "refused change to team owner");
        return Err(Violation::OwnerImmutable.into());
    }

    let others_privileged = tx
        .team_members(member.team_id)
        .iter()
        .filter(|m| m.id != member.id && m.role.is_privileged())
        .count();
    if others_privileged == 0 {
        warn!(team_id = %member.team_id, "refused change to last privileged member");
        return Err(Violation::NoPrivilegedMemberLeft.into());
    }
    Ok(())
}

/// Owner can only be assigned by transfer
pub fn check_assignable(role: Role) -> GateResult<()> {
    if role == Role::Owner {
        return Err(Violation::OwnerAssignment.into());
    }
    Ok(())
}

/// Live Owner memberships of a team
pub fn owners(tx: &dyn Transaction, team_id: TeamId) -> Vec<Member> {
    tx.team_members(team_id)
        .into_iter()
        .filter(|m| m.role == Role::Owner)
        .collect()
}
